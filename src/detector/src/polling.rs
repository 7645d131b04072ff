use crate::detector::Detector;
use anyhow::Result;
use autoinst_common::constants::FORWARDED_ENV_VARS;
use autoinst_common::{ExecDetails, Pid, ProcessEvent};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use sysinfo::{Process, ProcessRefreshKind, System};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Detects exec/exit by diffing the host process table on a fixed interval.
///
/// Processes already running when polling starts are reported as execs on the
/// first tick. Short-lived processes that start and end between two ticks are
/// never seen. An exit is only reported for a pid whose exec was reported.
/// A pid is identified together with its start time, so a pid reused between
/// two ticks is reported as an exit followed by an exec.
pub struct PollingDetector {
    poll_interval: Duration,
    forwarded_env_vars: HashSet<String>,
    required_env_var: Option<String>,
}

impl PollingDetector {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval,
            forwarded_env_vars: FORWARDED_ENV_VARS.iter().map(|v| v.to_string()).collect(),
            required_env_var: None,
        }
    }

    /// Only report processes whose environment carries `key`, e.g. the pod
    /// name injected into instrumented containers.
    pub fn with_required_env_var(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.forwarded_env_vars.insert(key.clone());
        self.required_env_var = Some(key);
        self
    }

    pub fn with_forwarded_env_vars<I, S>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forwarded_env_vars = vars.into_iter().map(Into::into).collect();
        self
    }

    fn exec_details(&self, pid: Pid, process: &Process) -> ExecDetails {
        ExecDetails {
            exe_path: process
                .exe()
                .map(|path| path.to_string_lossy().to_string())
                .unwrap_or_default(),
            cmd_line: process.cmd().join(" "),
            environments: filter_environment(process.environ(), &self.forwarded_env_vars),
            container_process_id: read_container_pid(pid),
        }
    }
}

#[async_trait::async_trait]
impl Detector for PollingDetector {
    async fn run(
        self: Box<Self>,
        events: mpsc::Sender<ProcessEvent>,
        cancel: CancellationToken,
    ) -> Result<()> {
        info!(
            interval_ms = self.poll_interval.as_millis() as u64,
            "Starting process polling"
        );

        let mut system = System::new();
        let mut known_processes: ProcessTable = HashMap::new();
        let mut reported_processes: HashSet<Pid> = HashSet::new();
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("Process polling cancelled");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            system.refresh_processes_specifics(ProcessRefreshKind::everything());

            let current_processes: ProcessTable = system
                .processes()
                .iter()
                .map(|(pid, process)| (pid.as_u32(), process.start_time()))
                .collect();
            let diff = diff_process_table(&known_processes, &current_processes);

            if !diff.started.is_empty() || !diff.exited.is_empty() {
                debug!(
                    started = diff.started.len(),
                    exited = diff.exited.len(),
                    "Process table changed"
                );
            }

            // exits first so a reused pid is torn down before it is re-instrumented
            for pid in diff.exited {
                if !reported_processes.remove(&pid) {
                    continue;
                }
                if events.send(ProcessEvent::exit(pid)).await.is_err() {
                    debug!("process event consumer dropped, stopping polling");
                    return Ok(());
                }
            }

            for pid in diff.started {
                let Some(process) = system.process(sysinfo::Pid::from_u32(pid)) else {
                    continue;
                };
                let details = self.exec_details(pid, process);
                if let Some(key) = &self.required_env_var {
                    if !details.environments.contains_key(key) {
                        continue;
                    }
                }

                reported_processes.insert(pid);
                if events.send(ProcessEvent::exec(pid, details)).await.is_err() {
                    debug!("process event consumer dropped, stopping polling");
                    return Ok(());
                }
            }

            known_processes = current_processes;
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct ProcessTableDiff {
    pub started: Vec<Pid>,
    pub exited: Vec<Pid>,
}

/// Pid to process start time, in seconds since the epoch.
pub(crate) type ProcessTable = HashMap<Pid, u64>;

/// Pids in `current` but not `known` started, pids in `known` but not
/// `current` exited. A pid whose start time changed is in both lists. Both
/// lists are sorted.
pub(crate) fn diff_process_table(known: &ProcessTable, current: &ProcessTable) -> ProcessTableDiff {
    let mut started: Vec<Pid> = current
        .iter()
        .filter(|(pid, start_time)| known.get(*pid) != Some(*start_time))
        .map(|(pid, _)| *pid)
        .collect();
    let mut exited: Vec<Pid> = known
        .iter()
        .filter(|(pid, start_time)| current.get(*pid) != Some(*start_time))
        .map(|(pid, _)| *pid)
        .collect();
    started.sort_unstable();
    exited.sort_unstable();

    ProcessTableDiff { started, exited }
}

/// Keeps the `KEY=VALUE` entries whose key is in `forwarded`. Entries without
/// a `=` are dropped.
pub(crate) fn filter_environment<S: AsRef<str>>(
    environ: &[S],
    forwarded: &HashSet<String>,
) -> HashMap<String, String> {
    environ
        .iter()
        .filter_map(|entry| entry.as_ref().split_once('='))
        .filter(|(key, _)| forwarded.contains(*key))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn read_container_pid(pid: Pid) -> Option<Pid> {
    match std::fs::read_to_string(format!("/proc/{pid}/status")) {
        Ok(status) => parse_nspid(&status),
        Err(e) => {
            debug!(pid, error = %e, "Failed to read process status");
            None
        }
    }
}

/// Reads the innermost namespace pid from the `NSpid:` line of
/// `/proc/<pid>/status`. A single entry means the process shares the host pid
/// namespace, so there is no container pid.
pub(crate) fn parse_nspid(status: &str) -> Option<Pid> {
    let line = status.lines().find(|line| line.starts_with("NSpid:"))?;
    let pids: Vec<&str> = line["NSpid:".len()..].split_whitespace().collect();
    if pids.len() < 2 {
        return None;
    }
    pids.last()?.parse().ok()
}
