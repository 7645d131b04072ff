use autoinst_common::{OtelDistribution, Pid};

/// Conditions the manager reacts to specifically. Collaborators return them
/// inside an `anyhow::Error`, possibly wrapped in context.
#[derive(Debug, thiserror::Error)]
pub enum InstrumentationError {
    #[error("instrumentation run cancelled")]
    Cancelled,
    /// The process runs a different language than the distribution declared
    /// for its container, e.g. a shell launcher in front of the real runtime.
    #[error("process language does not match the declared distribution")]
    LanguageMismatch,
    #[error("no instrumentation factory registered for {0}")]
    NoFactory(OtelDistribution),
}

fn chain_contains(err: &anyhow::Error, wanted: fn(&InstrumentationError) -> bool) -> bool {
    err.chain()
        .filter_map(|cause| cause.downcast_ref::<InstrumentationError>())
        .any(wanted)
}

pub fn is_cancellation(err: &anyhow::Error) -> bool {
    chain_contains(err, |e| matches!(e, InstrumentationError::Cancelled))
}

pub fn is_language_mismatch(err: &anyhow::Error) -> bool {
    chain_contains(err, |e| matches!(e, InstrumentationError::LanguageMismatch))
}

/// Every `apply_config` failure of one configuration batch.
#[derive(Debug, thiserror::Error)]
#[error("failed to apply config to {} process(es){}", .failures.len(), list_failures(.failures))]
pub struct ApplyConfigErrors {
    pub failures: Vec<(Pid, anyhow::Error)>,
}

fn list_failures(failures: &[(Pid, anyhow::Error)]) -> String {
    failures
        .iter()
        .map(|(pid, err)| format!("; pid {pid}: {err:#}"))
        .collect()
}
