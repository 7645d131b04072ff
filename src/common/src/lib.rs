pub mod constants;
pub mod distribution;
pub mod process_event;

pub use distribution::{OtelDistribution, OtelSdk, ParseDistributionError, ProgrammingLanguage};
pub use process_event::{ExecDetails, Pid, ProcessEvent, ProcessEventKind};
