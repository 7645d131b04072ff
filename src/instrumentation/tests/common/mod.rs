#![allow(dead_code)]

use anyhow::{bail, Result};
use autoinst_common::{ExecDetails, OtelDistribution, OtelSdk, Pid, ProcessEvent, ProgrammingLanguage};
use autoinst_instrumentation::{
    Config, ConfigGroupResolver, DistributionMatcher, Factory, Handler, Instrumentation,
    InstrumentationError, ProcessDetailsResolver, ProcessGroupResolver, Reporter, Settings,
    SettingsGetter,
};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const GO_EBPF: OtelDistribution = OtelDistribution::new(ProgrammingLanguage::Go, OtelSdk::Ebpf);
pub const JAVA_COMMUNITY: OtelDistribution =
    OtelDistribution::new(ProgrammingLanguage::Java, OtelSdk::Community);

pub const SERVICE_ENV: &str = "SERVICE";
pub const DISTRO_ENV: &str = "DISTRO";
pub const POD_ENV: &str = "POD";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestDetails {
    pub pid: Pid,
    pub service: String,
    pub distro: String,
    pub pod: String,
}

impl TestDetails {
    pub fn new(pid: Pid, service: &str, pod: &str) -> Self {
        Self {
            pid,
            service: service.to_string(),
            distro: GO_EBPF.to_string(),
            pod: pod.to_string(),
        }
    }
}

impl fmt::Display for TestDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.service, self.pid)
    }
}

pub fn exec_event(pid: Pid, service: &str, distro: &str) -> ProcessEvent {
    pod_exec_event(pid, service, distro, &format!("{service}-0"))
}

pub fn pod_exec_event(pid: Pid, service: &str, distro: &str, pod: &str) -> ProcessEvent {
    let environments = HashMap::from([
        (SERVICE_ENV.to_string(), service.to_string()),
        (DISTRO_ENV.to_string(), distro.to_string()),
        (POD_ENV.to_string(), pod.to_string()),
    ]);
    ProcessEvent::exec(
        pid,
        ExecDetails {
            exe_path: format!("/usr/local/bin/{service}"),
            cmd_line: service.to_string(),
            environments,
            container_process_id: Some(1),
        },
    )
}

/// Resolves everything from the `SERVICE`, `DISTRO` and `POD` variables of
/// the event. The config group is the service name, the process group the pod.
pub struct EnvResolvers;

#[async_trait::async_trait]
impl ProcessDetailsResolver<TestDetails> for EnvResolvers {
    async fn resolve(&self, event: &ProcessEvent) -> Result<TestDetails> {
        let Some(service) = event.env(SERVICE_ENV) else {
            bail!("process {} has no service", event.pid);
        };
        Ok(TestDetails {
            pid: event.pid,
            service: service.to_string(),
            distro: event.env(DISTRO_ENV).unwrap_or_default().to_string(),
            pod: event.env(POD_ENV).unwrap_or(service).to_string(),
        })
    }
}

#[async_trait::async_trait]
impl DistributionMatcher<TestDetails> for EnvResolvers {
    async fn distribution(&self, details: &TestDetails) -> Result<OtelDistribution> {
        if details.distro == "mismatch" {
            return Err(InstrumentationError::LanguageMismatch.into());
        }
        Ok(details.distro.parse()?)
    }
}

#[async_trait::async_trait]
impl ConfigGroupResolver<TestDetails, String> for EnvResolvers {
    async fn resolve(&self, details: &TestDetails, _distribution: &OtelDistribution) -> Result<String> {
        Ok(details.service.clone())
    }
}

#[async_trait::async_trait]
impl ProcessGroupResolver<TestDetails, String> for EnvResolvers {
    async fn resolve(&self, details: &TestDetails) -> Result<String> {
        Ok(details.pod.clone())
    }
}

#[async_trait::async_trait]
impl SettingsGetter<TestDetails> for EnvResolvers {
    async fn settings(&self, details: &TestDetails, _distribution: &OtelDistribution) -> Result<Settings> {
        Ok(Settings {
            service_name: details.service.clone(),
            ..Default::default()
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportedCall {
    Init { pid: Pid, failed: bool },
    Load { pid: Pid, failed: bool },
    Run { pid: Pid },
    Exit { pid: Pid },
}

#[derive(Default)]
pub struct RecordingReporter {
    calls: Mutex<Vec<ReportedCall>>,
}

impl RecordingReporter {
    pub fn calls(&self) -> Vec<ReportedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, pid: Pid) -> Vec<ReportedCall> {
        self.calls()
            .into_iter()
            .filter(|call| match call {
                ReportedCall::Init { pid: p, .. }
                | ReportedCall::Load { pid: p, .. }
                | ReportedCall::Run { pid: p }
                | ReportedCall::Exit { pid: p } => *p == pid,
            })
            .collect()
    }

    pub fn contains(&self, call: &ReportedCall) -> bool {
        self.calls.lock().unwrap().contains(call)
    }

    fn record(&self, call: ReportedCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait::async_trait]
impl Reporter<TestDetails> for RecordingReporter {
    async fn on_init(&self, pid: Pid, err: Option<&anyhow::Error>, _details: &TestDetails) -> Result<()> {
        self.record(ReportedCall::Init {
            pid,
            failed: err.is_some(),
        });
        Ok(())
    }

    async fn on_load(&self, pid: Pid, err: Option<&anyhow::Error>, _details: &TestDetails) -> Result<()> {
        self.record(ReportedCall::Load {
            pid,
            failed: err.is_some(),
        });
        Ok(())
    }

    async fn on_run(&self, pid: Pid, _err: &anyhow::Error, _details: &TestDetails) -> Result<()> {
        self.record(ReportedCall::Run { pid });
        Ok(())
    }

    async fn on_exit(&self, pid: Pid, _details: &TestDetails) -> Result<()> {
        self.record(ReportedCall::Exit { pid });
        Ok(())
    }
}

/// Counts every call the manager makes on one instrumentation.
#[derive(Debug, Default)]
pub struct MockInstrumentation {
    pub fail_load: bool,
    pub fail_run: bool,
    pub fail_apply_config: bool,
    pub loads: Mutex<u32>,
    pub runs: Mutex<u32>,
    pub closes: Mutex<u32>,
    pub configs: Mutex<Vec<Config>>,
}

impl MockInstrumentation {
    pub fn closes(&self) -> u32 {
        *self.closes.lock().unwrap()
    }

    pub fn runs(&self) -> u32 {
        *self.runs.lock().unwrap()
    }

    pub fn configs(&self) -> Vec<Config> {
        self.configs.lock().unwrap().clone()
    }
}

struct MockHandle(Arc<MockInstrumentation>);

#[async_trait::async_trait]
impl Instrumentation for MockHandle {
    async fn load(&self) -> Result<()> {
        *self.0.loads.lock().unwrap() += 1;
        if self.0.fail_load {
            bail!("uprobe attach failed");
        }
        Ok(())
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        *self.0.runs.lock().unwrap() += 1;
        if self.0.fail_run {
            bail!("perf buffer reader crashed");
        }
        cancel.cancelled().await;
        Err(InstrumentationError::Cancelled.into())
    }

    async fn apply_config(&self, config: &Config) -> Result<()> {
        self.0.configs.lock().unwrap().push(config.clone());
        if self.0.fail_apply_config {
            bail!("config map update failed");
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        *self.0.closes.lock().unwrap() += 1;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Failures {
    pub create: bool,
    pub load: bool,
    pub run: bool,
    pub apply_config: bool,
}

/// Builds [`MockInstrumentation`]s, failing them per pid as configured, and
/// keeps them for inspection.
#[derive(Default)]
pub struct MockFactory {
    failures: HashMap<Pid, Failures>,
    created: Mutex<HashMap<Pid, Arc<MockInstrumentation>>>,
    settings: Mutex<HashMap<Pid, Settings>>,
}

impl MockFactory {
    pub fn failing(failures: impl IntoIterator<Item = (Pid, Failures)>) -> Self {
        Self {
            failures: failures.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn instrumentation(&self, pid: Pid) -> Option<Arc<MockInstrumentation>> {
        self.created.lock().unwrap().get(&pid).cloned()
    }

    pub fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub fn settings(&self, pid: Pid) -> Option<Settings> {
        self.settings.lock().unwrap().get(&pid).cloned()
    }

    pub fn all(&self) -> Vec<Arc<MockInstrumentation>> {
        self.created.lock().unwrap().values().cloned().collect()
    }
}

#[async_trait::async_trait]
impl Factory for MockFactory {
    async fn create(&self, pid: Pid, settings: Settings) -> Result<Box<dyn Instrumentation>> {
        let failures = self.failures.get(&pid).copied().unwrap_or_default();
        if failures.create {
            bail!("no process image for pid {pid}");
        }

        let instrumentation = Arc::new(MockInstrumentation {
            fail_load: failures.load,
            fail_run: failures.run,
            fail_apply_config: failures.apply_config,
            ..Default::default()
        });
        self.created
            .lock()
            .unwrap()
            .insert(pid, Arc::clone(&instrumentation));
        self.settings.lock().unwrap().insert(pid, settings);

        Ok(Box::new(MockHandle(instrumentation)))
    }
}

pub fn handler(reporter: Arc<RecordingReporter>) -> Handler<TestDetails, String, String> {
    let resolvers = Arc::new(EnvResolvers);
    Handler::builder()
        .process_details_resolver(resolvers.clone())
        .distribution_matcher(resolvers.clone())
        .config_group_resolver(resolvers.clone())
        .process_group_resolver(resolvers.clone())
        .settings_getter(resolvers)
        .reporter(reporter)
        .build()
}

/// Polls `condition` until it holds, failing after two seconds.
pub async fn wait_for<F>(description: &str, mut condition: F) -> Result<()>
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        if tokio::time::Instant::now() > deadline {
            bail!("timed out waiting for {description}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    Ok(())
}

/// Awaits `fut` for at most two seconds.
pub async fn within_timeout<T>(fut: impl Future<Output = T>) -> Result<T> {
    Ok(tokio::time::timeout(Duration::from_secs(2), fut).await?)
}
