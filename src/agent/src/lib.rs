pub mod agent;
pub mod cli;
pub mod config;
pub mod logging;
pub mod reporter;
pub mod settings;
pub mod workload;

pub use agent::Agent;
pub use config::{AgentConfig, ConfigLoader};
