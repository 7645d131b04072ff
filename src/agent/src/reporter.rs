use anyhow::Result;
use autoinst_common::Pid;
use autoinst_instrumentation::{ProcessDetails, Reporter};
use std::marker::PhantomData;
use tracing::{error, info, warn};

/// Writes every lifecycle transition to the structured log.
pub struct LogReporter<P> {
    _details: PhantomData<fn(&P)>,
}

impl<P> LogReporter<P> {
    pub fn new() -> Self {
        Self {
            _details: PhantomData,
        }
    }
}

impl<P> Default for LogReporter<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl<P: ProcessDetails> Reporter<P> for LogReporter<P> {
    async fn on_init(&self, pid: Pid, err: Option<&anyhow::Error>, details: &P) -> Result<()> {
        match err {
            None => info!(pid, details = %details, "instrumentation created"),
            Some(e) => error!(pid, details = %details, error = ?e, "instrumentation creation failed"),
        }
        Ok(())
    }

    async fn on_load(&self, pid: Pid, err: Option<&anyhow::Error>, details: &P) -> Result<()> {
        match err {
            None => info!(pid, details = %details, "instrumentation loaded"),
            Some(e) => error!(pid, details = %details, error = ?e, "instrumentation load failed"),
        }
        Ok(())
    }

    async fn on_run(&self, pid: Pid, err: &anyhow::Error, details: &P) -> Result<()> {
        warn!(pid, details = %details, error = ?err, "instrumentation stopped running");
        Ok(())
    }

    async fn on_exit(&self, pid: Pid, details: &P) -> Result<()> {
        info!(pid, details = %details, "instrumented process exited");
        Ok(())
    }
}
