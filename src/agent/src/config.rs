use crate::cli::Cli;
use anyhow::{bail, Context, Result};
use autoinst_common::constants::{
    DEFAULT_CONFIG_FILE, DEFAULT_CONFIG_UPDATE_BUFFER, DEFAULT_LOG_LEVEL,
    DEFAULT_PROCESS_EVENT_BUFFER, DEFAULT_PROCESS_POLLING_INTERVAL_MS, FORWARDED_ENV_VARS,
    WORKING_DIR,
};
use config::{Config as RConfig, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const ENV_PREFIX: &str = "AUTOINST";

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AgentConfig {
    pub log_level: String,
    pub log_dir: PathBuf,
    pub process_polling_interval_ms: u64,
    pub process_event_buffer: usize,
    pub config_update_buffer: usize,
    pub forwarded_env_vars: Vec<String>,
}

impl AgentConfig {
    pub fn process_polling_interval(&self) -> Duration {
        Duration::from_millis(self.process_polling_interval_ms)
    }

    /// Command line flags win over every other source.
    pub fn apply_cli_overrides(&mut self, cli: &Cli) {
        if let Some(log_level) = &cli.log_level {
            self.log_level = log_level.clone();
        }
        if let Some(log_dir) = &cli.log_dir {
            self.log_dir = log_dir.clone();
        }
        if let Some(interval) = cli.poll_interval_ms {
            self.process_polling_interval_ms = interval;
        }
    }

    fn validate(&self) -> Result<()> {
        if self.process_polling_interval_ms == 0 {
            bail!("process_polling_interval_ms must be greater than zero");
        }
        if self.process_event_buffer == 0 {
            bail!("process_event_buffer must be greater than zero");
        }
        if self.config_update_buffer == 0 {
            bail!("config_update_buffer must be greater than zero");
        }
        Ok(())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Defaults, then the config file, then `AUTOINST_*` environment
    /// variables. An explicitly given file must exist; the default one is
    /// optional.
    pub fn load(config_file: Option<&Path>) -> Result<AgentConfig> {
        let env = Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("forwarded_env_vars");

        Self::load_from(config_file, Some(env))
    }

    fn load_from(config_file: Option<&Path>, env: Option<Environment>) -> Result<AgentConfig> {
        let mut builder = RConfig::builder();

        // set defaults
        builder = builder
            .set_default("log_level", DEFAULT_LOG_LEVEL)?
            .set_default("log_dir", WORKING_DIR)?
            .set_default(
                "process_polling_interval_ms",
                DEFAULT_PROCESS_POLLING_INTERVAL_MS,
            )?
            .set_default("process_event_buffer", DEFAULT_PROCESS_EVENT_BUFFER as u64)?
            .set_default("config_update_buffer", DEFAULT_CONFIG_UPDATE_BUFFER as u64)?
            .set_default("forwarded_env_vars", FORWARDED_ENV_VARS.to_vec())?;

        builder = match config_file {
            Some(path) => builder.add_source(File::from(path).format(FileFormat::Toml).required(true)),
            None => builder.add_source(
                File::with_name(DEFAULT_CONFIG_FILE)
                    .format(FileFormat::Toml)
                    .required(false),
            ),
        };

        if let Some(env) = env {
            builder = builder.add_source(env);
        }

        let config: AgentConfig = builder
            .build()?
            .try_deserialize()
            .context("failed to parse agent config")?;

        config.validate()?;

        Ok(config)
    }
}
