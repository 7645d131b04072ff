use crate::config::AgentConfig;
use crate::reporter::LogReporter;
use crate::settings::EnvSettingsGetter;
use crate::workload::{
    EnvDistributionMatcher, EnvProcessDetailsResolver, PodProcessGroupResolver,
    WorkloadConfigGroup, WorkloadConfigGroupResolver, WorkloadProcessDetails,
    WorkloadProcessGroup,
};
use anyhow::Result;
use autoinst_common::constants::ENV_POD_NAME;
use autoinst_common::OtelDistribution;
use autoinst_detector::{Detector, PollingDetector};
use autoinst_instrumentation::{
    ConfigUpdate, Factories, Factory, Handler, Manager, ManagerOptions, Request,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub type WorkloadHandler = Handler<WorkloadProcessDetails, WorkloadConfigGroup, WorkloadProcessGroup>;
pub type WorkloadConfigUpdate = ConfigUpdate<WorkloadConfigGroup>;
pub type WorkloadRequest = Request<WorkloadProcessDetails, WorkloadProcessGroup>;

/// Node agent: wires the polling detector and the workload resolvers into an
/// instrumentation manager.
pub struct Agent {
    config: AgentConfig,
    factories: Factories,
    config_updates_tx: mpsc::Sender<WorkloadConfigUpdate>,
    config_updates_rx: mpsc::Receiver<WorkloadConfigUpdate>,
    requests_tx: mpsc::Sender<WorkloadRequest>,
    requests_rx: mpsc::Receiver<WorkloadRequest>,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        let (config_updates_tx, config_updates_rx) = mpsc::channel(config.config_update_buffer.max(1));
        let (requests_tx, requests_rx) = mpsc::channel(config.config_update_buffer.max(1));
        Self {
            config,
            factories: Factories::new(),
            config_updates_tx,
            config_updates_rx,
            requests_tx,
            requests_rx,
        }
    }

    pub fn register_factory(&mut self, distribution: OtelDistribution, factory: Arc<dyn Factory>) {
        info!(%distribution, "Registering instrumentation factory");
        self.factories.insert(distribution, factory);
    }

    /// Sender for configuration changes. Updates sent after [`Agent::run`]
    /// returns are dropped.
    pub fn config_updates(&self) -> mpsc::Sender<WorkloadConfigUpdate> {
        self.config_updates_tx.clone()
    }

    /// Sender for explicit instrument and un-instrument requests.
    pub fn requests(&self) -> mpsc::Sender<WorkloadRequest> {
        self.requests_tx.clone()
    }

    pub fn handler() -> WorkloadHandler {
        Handler::builder()
            .process_details_resolver(Arc::new(EnvProcessDetailsResolver))
            .distribution_matcher(Arc::new(EnvDistributionMatcher))
            .config_group_resolver(Arc::new(WorkloadConfigGroupResolver))
            .process_group_resolver(Arc::new(PodProcessGroupResolver))
            .settings_getter(Arc::new(EnvSettingsGetter))
            .reporter(Arc::new(LogReporter::<WorkloadProcessDetails>::new()))
            .build()
    }

    fn detector(&self) -> PollingDetector {
        PollingDetector::new(self.config.process_polling_interval())
            .with_forwarded_env_vars(self.config.forwarded_env_vars.iter().cloned())
            .with_required_env_var(ENV_POD_NAME)
    }

    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let detector = Box::new(self.detector());
        self.run_with_detector(detector, cancel).await
    }

    pub async fn run_with_detector(
        self,
        detector: Box<dyn Detector>,
        cancel: CancellationToken,
    ) -> Result<()> {
        if self.factories.is_empty() {
            warn!("No instrumentation factories registered, no process will be instrumented");
        }

        let Agent {
            config,
            factories,
            config_updates_tx,
            config_updates_rx,
            requests_tx,
            requests_rx,
        } = self;

        let manager = Manager::new(
            ManagerOptions::builder()
                .handler(Self::handler())
                .factories(factories)
                .detector(detector)
                .config_updates(config_updates_rx)
                .requests(requests_rx)
                .process_event_buffer(config.process_event_buffer)
                .build(),
        )?;
        let metrics = manager.metrics();

        let result = manager.run(cancel).await;

        for (distribution, counters) in metrics.snapshot() {
            info!(
                %distribution,
                instrumented = counters.instrumented_processes,
                failed = counters.failed_instrumentations,
                "Instrumentation totals"
            );
        }

        // held until the manager is done so neither stream closes early
        drop(config_updates_tx);
        drop(requests_tx);

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::tests::{checkout_envs, workload_event};
    use autoinst_common::{OtelSdk, Pid, ProcessEvent, ProgrammingLanguage};
    use autoinst_detector::ChannelDetector;
    use autoinst_instrumentation::{Config, Instrumentation, Settings};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorded {
        created: Mutex<Vec<(Pid, Settings)>>,
        configs: Mutex<Vec<Config>>,
        closes: Mutex<u32>,
    }

    struct RecordingFactory(Arc<Recorded>);

    struct RecordingInstrumentation(Arc<Recorded>);

    #[async_trait::async_trait]
    impl Instrumentation for RecordingInstrumentation {
        async fn load(&self) -> Result<()> {
            Ok(())
        }

        async fn run(&self, cancel: CancellationToken) -> Result<()> {
            cancel.cancelled().await;
            Ok(())
        }

        async fn apply_config(&self, config: &Config) -> Result<()> {
            self.0.configs.lock().unwrap().push(config.clone());
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            *self.0.closes.lock().unwrap() += 1;
            Ok(())
        }
    }

    #[async_trait::async_trait]
    impl Factory for RecordingFactory {
        async fn create(&self, pid: Pid, settings: Settings) -> Result<Box<dyn Instrumentation>> {
            self.0.created.lock().unwrap().push((pid, settings));
            Ok(Box::new(RecordingInstrumentation(Arc::clone(&self.0))))
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..400 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    fn test_config() -> AgentConfig {
        AgentConfig {
            log_level: "debug".to_string(),
            log_dir: std::env::temp_dir(),
            process_polling_interval_ms: 100,
            process_event_buffer: 8,
            config_update_buffer: 2,
            forwarded_env_vars: vec![],
        }
    }

    #[tokio::test]
    async fn test_agent_instruments_workload_process() {
        let recorded = Arc::new(Recorded::default());
        let mut agent = Agent::new(test_config());
        agent.register_factory(
            OtelDistribution::new(ProgrammingLanguage::Go, OtelSdk::Ebpf),
            Arc::new(RecordingFactory(Arc::clone(&recorded))),
        );
        let config_updates = agent.config_updates();
        let requests = agent.requests();

        let (events_tx, events_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let running = tokio::spawn(
            agent.run_with_detector(Box::new(ChannelDetector::new(events_rx)), cancel.clone()),
        );

        events_tx
            .send(workload_event(4242, "/app/checkout", &checkout_envs()))
            .await
            .unwrap();
        events_tx
            .send(ProcessEvent::exec(4243, Default::default()))
            .await
            .unwrap();
        wait_until(|| recorded.created.lock().unwrap().len() == 1).await;

        let (pid, settings) = recorded.created.lock().unwrap()[0].clone();
        assert_eq!(pid, 4242);
        assert_eq!(settings.service_name, "checkout");

        let group = WorkloadConfigGroup {
            namespace: "shop".to_string(),
            workload_name: "checkout".to_string(),
            container_name: Some("app".to_string()),
            language: ProgrammingLanguage::Go,
        };
        config_updates
            .send(HashMap::from([(group, Config(json!({"enabled": true})))]))
            .await
            .unwrap();
        wait_until(|| recorded.configs.lock().unwrap().len() == 1).await;

        requests
            .send(Request::Uninstrument(WorkloadProcessGroup {
                namespace: "shop".to_string(),
                pod_name: "checkout-6f7d8-x2x9q".to_string(),
            }))
            .await
            .unwrap();
        wait_until(|| *recorded.closes.lock().unwrap() == 1).await;

        cancel.cancel();
        running.await.unwrap().unwrap();
        assert_eq!(*recorded.closes.lock().unwrap(), 1);
    }
}
