use crate::types::{Config, Settings};
use anyhow::Result;
use autoinst_common::{OtelDistribution, Pid};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// A per-process instrumentation session created by a [`Factory`].
///
/// The manager calls `load` once, then `run` at most once if the load
/// succeeded, `apply_config` any number of times while the process is
/// tracked, and `close` exactly once when the process exits or the manager
/// shuts down. `run` and `close` may overlap, so implementations must be
/// internally synchronised.
#[async_trait::async_trait]
pub trait Instrumentation: Send + Sync {
    /// Attaches to the target process.
    async fn load(&self) -> Result<()>;

    /// Drives the instrumentation until `cancel` fires or it fails.
    /// Returning [`crate::InstrumentationError::Cancelled`] is not a failure.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;

    async fn apply_config(&self, config: &Config) -> Result<()>;

    /// Detaches and releases every resource held for the process.
    async fn close(&self) -> Result<()>;
}

#[async_trait::async_trait]
pub trait Factory: Send + Sync {
    async fn create(&self, pid: Pid, settings: Settings) -> Result<Box<dyn Instrumentation>>;
}

/// Distribution to factory registry. Read-only once handed to the manager.
#[derive(Clone, Default)]
pub struct Factories {
    factories: HashMap<OtelDistribution, Arc<dyn Factory>>,
}

impl Factories {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, distribution: OtelDistribution, factory: Arc<dyn Factory>) {
        self.factories.insert(distribution, factory);
    }

    pub fn with(mut self, distribution: OtelDistribution, factory: Arc<dyn Factory>) -> Self {
        self.insert(distribution, factory);
        self
    }

    pub fn get(&self, distribution: &OtelDistribution) -> Option<&Arc<dyn Factory>> {
        self.factories.get(distribution)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    pub fn distributions(&self) -> impl Iterator<Item = &OtelDistribution> {
        self.factories.keys()
    }
}

impl FromIterator<(OtelDistribution, Arc<dyn Factory>)> for Factories {
    fn from_iter<I: IntoIterator<Item = (OtelDistribution, Arc<dyn Factory>)>>(iter: I) -> Self {
        Self {
            factories: iter.into_iter().collect(),
        }
    }
}
