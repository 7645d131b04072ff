use crate::detector::Detector;
use anyhow::Result;
use autoinst_common::ProcessEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Adapts an externally fed event channel (e.g. a kernel probe reader running
/// in its own thread) to the [`Detector`] port.
pub struct ChannelDetector {
    source: mpsc::Receiver<ProcessEvent>,
}

impl ChannelDetector {
    pub fn new(source: mpsc::Receiver<ProcessEvent>) -> Self {
        Self { source }
    }
}

#[async_trait::async_trait]
impl Detector for ChannelDetector {
    async fn run(
        mut self: Box<Self>,
        events: mpsc::Sender<ProcessEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("ChannelDetector cancelled");
                    return Ok(());
                }
                received = self.source.recv() => {
                    let Some(event) = received else {
                        info!("process event source closed, stopping detector");
                        return Ok(());
                    };
                    if events.send(event).await.is_err() {
                        debug!("process event consumer dropped, stopping detector");
                        return Ok(());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_forwards_events_until_source_closes() {
        let (source_tx, source_rx) = mpsc::channel(4);
        let (events_tx, mut events_rx) = mpsc::channel(4);

        source_tx.send(ProcessEvent::exit(1)).await.unwrap();
        source_tx.send(ProcessEvent::exit(2)).await.unwrap();
        drop(source_tx);

        Box::new(ChannelDetector::new(source_rx))
            .run(events_tx, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(events_rx.recv().await, Some(ProcessEvent::exit(1)));
        assert_eq!(events_rx.recv().await, Some(ProcessEvent::exit(2)));
        assert_eq!(events_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_stops_on_cancellation() {
        let (_source_tx, source_rx) = mpsc::channel(4);
        let (events_tx, _events_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = Box::new(ChannelDetector::new(source_rx))
            .run(events_tx, cancel)
            .await;

        assert!(result.is_ok());
    }
}
