use anyhow::Result;
use autoinst_common::ProcessEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Source of process exec/exit events.
///
/// A detector runs once: `run` takes the boxed detector by value and produces
/// events into `events` until `cancel` fires or its own source is exhausted.
/// Returning an error is fatal for whoever drives the detector.
#[async_trait::async_trait]
pub trait Detector: Send {
    async fn run(
        self: Box<Self>,
        events: mpsc::Sender<ProcessEvent>,
        cancel: CancellationToken,
    ) -> Result<()>;
}
