pub mod error;
pub mod instrumentation;
pub mod manager;
pub mod metrics;
pub mod tracking;
pub mod types;

pub use error::{is_cancellation, is_language_mismatch, ApplyConfigErrors, InstrumentationError};
pub use instrumentation::{Factories, Factory, Instrumentation};
pub use manager::{Manager, ManagerOptions};
pub use metrics::{DistributionMetrics, ManagerMetrics};
pub use types::{
    Config, ConfigGroup, ConfigGroupResolver, ConfigUpdate, DistributionMatcher, Handler,
    ProcessDetails, ProcessDetailsResolver, ProcessGroup, ProcessGroupResolver, Reporter, Request,
    ResourceAttribute, Settings, SettingsGetter,
};
