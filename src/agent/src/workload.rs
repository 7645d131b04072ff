use anyhow::Result;
use autoinst_common::constants::{
    ENV_CONTAINER_NAME, ENV_DISTRO_NAME, ENV_POD_NAME, ENV_POD_NAMESPACE, ENV_WORKLOAD_NAME,
};
use autoinst_common::{ExecDetails, OtelDistribution, Pid, ProcessEvent, ProgrammingLanguage};
use autoinst_instrumentation::{
    ConfigGroupResolver, DistributionMatcher, InstrumentationError, ProcessDetailsResolver,
    ProcessGroupResolver,
};
use std::fmt;
use std::path::Path;

/// Executables that launch the real runtime rather than being it.
const LAUNCHER_EXECUTABLES: &[&str] = &["sh", "bash", "dash", "ash", "zsh", "env", "tini"];

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorkloadError {
    #[error("exec event for pid {0} carries no exec details")]
    MissingExecDetails(Pid),
    #[error("process {pid} has no {var} in its environment")]
    MissingEnv { pid: Pid, var: &'static str },
}

/// A process running inside a Kubernetes workload, identified from the
/// environment variables injected into its container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadProcessDetails {
    pub pid: Pid,
    pub pod_name: String,
    pub namespace: String,
    pub workload_name: String,
    pub container_name: Option<String>,
    pub distro_name: Option<String>,
    pub exec_details: ExecDetails,
}

impl WorkloadProcessDetails {
    pub fn env(&self, key: &str) -> Option<&str> {
        self.exec_details.environments.get(key).map(String::as_str)
    }
}

impl fmt::Display for WorkloadProcessDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod_name)?;
        if let Some(container) = &self.container_name {
            write!(f, "/{container}")?;
        }
        write!(f, " (pid {})", self.pid)
    }
}

fn required_env(event: &ProcessEvent, var: &'static str) -> Result<String, WorkloadError> {
    event
        .env(var)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(WorkloadError::MissingEnv {
            pid: event.pid,
            var,
        })
}

fn optional_env(event: &ProcessEvent, var: &str) -> Option<String> {
    event
        .env(var)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

pub struct EnvProcessDetailsResolver;

#[async_trait::async_trait]
impl ProcessDetailsResolver<WorkloadProcessDetails> for EnvProcessDetailsResolver {
    async fn resolve(&self, event: &ProcessEvent) -> Result<WorkloadProcessDetails> {
        let Some(exec_details) = &event.exec_details else {
            return Err(WorkloadError::MissingExecDetails(event.pid).into());
        };

        let pod_name = required_env(event, ENV_POD_NAME)?;
        let namespace = required_env(event, ENV_POD_NAMESPACE)?;

        Ok(WorkloadProcessDetails {
            pid: event.pid,
            workload_name: optional_env(event, ENV_WORKLOAD_NAME).unwrap_or_else(|| pod_name.clone()),
            pod_name,
            namespace,
            container_name: optional_env(event, ENV_CONTAINER_NAME),
            distro_name: optional_env(event, ENV_DISTRO_NAME),
            exec_details: exec_details.clone(),
        })
    }
}

/// Picks the distribution declared for the container. Shell launchers in
/// front of the runtime are reported as a language mismatch.
pub struct EnvDistributionMatcher;

#[async_trait::async_trait]
impl DistributionMatcher<WorkloadProcessDetails> for EnvDistributionMatcher {
    async fn distribution(&self, details: &WorkloadProcessDetails) -> Result<OtelDistribution> {
        let Some(distro_name) = &details.distro_name else {
            return Err(WorkloadError::MissingEnv {
                pid: details.pid,
                var: ENV_DISTRO_NAME,
            }
            .into());
        };

        let distribution: OtelDistribution = distro_name.parse()?;

        if is_launcher(&details.exec_details.exe_path) {
            return Err(InstrumentationError::LanguageMismatch.into());
        }

        Ok(distribution)
    }
}

fn is_launcher(exe_path: &str) -> bool {
    Path::new(exe_path)
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| LAUNCHER_EXECUTABLES.contains(&name))
}

/// Replicas of one container share a group, so one config change reaches all
/// of them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadConfigGroup {
    pub namespace: String,
    pub workload_name: String,
    pub container_name: Option<String>,
    pub language: ProgrammingLanguage,
}

pub struct WorkloadConfigGroupResolver;

#[async_trait::async_trait]
impl ConfigGroupResolver<WorkloadProcessDetails, WorkloadConfigGroup> for WorkloadConfigGroupResolver {
    async fn resolve(
        &self,
        details: &WorkloadProcessDetails,
        distribution: &OtelDistribution,
    ) -> Result<WorkloadConfigGroup> {
        Ok(WorkloadConfigGroup {
            namespace: details.namespace.clone(),
            workload_name: details.workload_name.clone(),
            container_name: details.container_name.clone(),
            language: distribution.language,
        })
    }
}

/// Processes of one pod, instrumented and un-instrumented together.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadProcessGroup {
    pub namespace: String,
    pub pod_name: String,
}

impl fmt::Display for WorkloadProcessGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod_name)
    }
}

pub struct PodProcessGroupResolver;

#[async_trait::async_trait]
impl ProcessGroupResolver<WorkloadProcessDetails, WorkloadProcessGroup> for PodProcessGroupResolver {
    async fn resolve(&self, details: &WorkloadProcessDetails) -> Result<WorkloadProcessGroup> {
        Ok(WorkloadProcessGroup {
            namespace: details.namespace.clone(),
            pod_name: details.pod_name.clone(),
        })
    }
}
