pub const WORKING_DIR: &str = "/var/log/autoinst/";
pub const LOG_FILE_NAME: &str = "agent.log";
pub const DEFAULT_CONFIG_FILE: &str = "/etc/autoinst/agent.toml";

// Environment variables injected into instrumented containers by the pod webhook.
pub const ENV_POD_NAME: &str = "AUTOINST_POD_NAME";
pub const ENV_POD_NAMESPACE: &str = "AUTOINST_POD_NAMESPACE";
pub const ENV_WORKLOAD_NAME: &str = "AUTOINST_WORKLOAD_NAME";
pub const ENV_CONTAINER_NAME: &str = "AUTOINST_CONTAINER_NAME";
pub const ENV_DISTRO_NAME: &str = "AUTOINST_DISTRO_NAME";

pub const OTEL_SERVICE_NAME_ENV: &str = "OTEL_SERVICE_NAME";
pub const OTEL_RESOURCE_ATTRIBUTES_ENV: &str = "OTEL_RESOURCE_ATTRIBUTES";

/// Environment variables the process detector forwards with every exec event.
/// Everything else in a process environment is dropped at the source.
pub const FORWARDED_ENV_VARS: &[&str] = &[
    ENV_POD_NAME,
    ENV_POD_NAMESPACE,
    ENV_WORKLOAD_NAME,
    ENV_CONTAINER_NAME,
    ENV_DISTRO_NAME,
    OTEL_SERVICE_NAME_ENV,
    OTEL_RESOURCE_ATTRIBUTES_ENV,
];

pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_PROCESS_POLLING_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_PROCESS_EVENT_BUFFER: usize = 100;
pub const DEFAULT_CONFIG_UPDATE_BUFFER: usize = 16;
