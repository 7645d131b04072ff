use anyhow::Result;
use autoinst_common::{OtelDistribution, Pid, ProcessEvent};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::Arc;
use typed_builder::TypedBuilder;

/// Identity of a process as produced by a [`ProcessDetailsResolver`].
/// Displayed in logs and passed back to every other collaborator.
pub trait ProcessDetails: Display + Debug + Clone + Send + Sync + 'static {}

impl<T> ProcessDetails for T where T: Display + Debug + Clone + Send + Sync + 'static {}

/// Key under which configuration updates are fanned out to related processes.
pub trait ConfigGroup: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> ConfigGroup for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Key for processes of one workload that are instrumented and
/// un-instrumented together.
pub trait ProcessGroup: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> ProcessGroup for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Opaque SDK configuration document handed to an instrumentation as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config(pub serde_json::Value);

impl From<serde_json::Value> for Config {
    fn from(value: serde_json::Value) -> Self {
        Self(value)
    }
}

/// One batch of configuration changes, keyed by group.
pub type ConfigUpdate<C> = HashMap<C, Config>;

/// Explicit request to the manager, independent of detector events.
#[derive(Debug, Clone)]
pub enum Request<P: ProcessDetails, G: ProcessGroup> {
    /// Instrument the given, already resolved processes. Pids that are
    /// already instrumented are skipped.
    Instrument(HashMap<Pid, P>),
    /// Tear down every tracked process of the group.
    Uninstrument(G),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttribute {
    pub key: String,
    pub value: String,
}

impl ResourceAttribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Inputs an instrumentation factory needs to attach to a process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub service_name: String,
    pub resource_attributes: Vec<ResourceAttribute>,
    pub initial_config: Option<Config>,
}

#[async_trait::async_trait]
pub trait ProcessDetailsResolver<P: ProcessDetails>: Send + Sync {
    async fn resolve(&self, event: &ProcessEvent) -> Result<P>;
}

#[async_trait::async_trait]
pub trait DistributionMatcher<P: ProcessDetails>: Send + Sync {
    async fn distribution(&self, details: &P) -> Result<OtelDistribution>;
}

#[async_trait::async_trait]
pub trait ConfigGroupResolver<P: ProcessDetails, C: ConfigGroup>: Send + Sync {
    async fn resolve(&self, details: &P, distribution: &OtelDistribution) -> Result<C>;
}

#[async_trait::async_trait]
pub trait ProcessGroupResolver<P: ProcessDetails, G: ProcessGroup>: Send + Sync {
    async fn resolve(&self, details: &P) -> Result<G>;
}

#[async_trait::async_trait]
pub trait SettingsGetter<P: ProcessDetails>: Send + Sync {
    async fn settings(&self, details: &P, distribution: &OtelDistribution) -> Result<Settings>;
}

/// Status sink for lifecycle transitions. Errors returned here are logged by
/// the manager and go no further.
#[async_trait::async_trait]
pub trait Reporter<P: ProcessDetails>: Send + Sync {
    async fn on_init(&self, pid: Pid, err: Option<&anyhow::Error>, details: &P) -> Result<()>;

    async fn on_load(&self, pid: Pid, err: Option<&anyhow::Error>, details: &P) -> Result<()>;

    async fn on_run(&self, pid: Pid, err: &anyhow::Error, details: &P) -> Result<()>;

    async fn on_exit(&self, pid: Pid, details: &P) -> Result<()>;
}

/// The resolver chain and reporter the manager drives for every process.
#[derive(TypedBuilder)]
pub struct Handler<P: ProcessDetails, C: ConfigGroup, G: ProcessGroup> {
    pub process_details_resolver: Arc<dyn ProcessDetailsResolver<P>>,
    pub distribution_matcher: Arc<dyn DistributionMatcher<P>>,
    pub config_group_resolver: Arc<dyn ConfigGroupResolver<P, C>>,
    pub process_group_resolver: Arc<dyn ProcessGroupResolver<P, G>>,
    pub settings_getter: Arc<dyn SettingsGetter<P>>,
    pub reporter: Arc<dyn Reporter<P>>,
}

impl<P: ProcessDetails, C: ConfigGroup, G: ProcessGroup> Clone for Handler<P, C, G> {
    fn clone(&self) -> Self {
        Self {
            process_details_resolver: Arc::clone(&self.process_details_resolver),
            distribution_matcher: Arc::clone(&self.distribution_matcher),
            config_group_resolver: Arc::clone(&self.config_group_resolver),
            process_group_resolver: Arc::clone(&self.process_group_resolver),
            settings_getter: Arc::clone(&self.settings_getter),
            reporter: Arc::clone(&self.reporter),
        }
    }
}
