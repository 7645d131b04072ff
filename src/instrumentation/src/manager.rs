use crate::error::{is_cancellation, is_language_mismatch, ApplyConfigErrors, InstrumentationError};
use crate::instrumentation::{Factories, Instrumentation};
use crate::metrics::ManagerMetrics;
use crate::tracking::{Attachment, TrackedProcess, Tracker};
use crate::types::{
    ConfigGroup, ConfigUpdate, Handler, ProcessDetails, ProcessGroup, Reporter, Request, Settings,
};
use anyhow::{anyhow, bail, Context, Result};
use autoinst_common::constants::DEFAULT_PROCESS_EVENT_BUFFER;
use autoinst_common::{Pid, ProcessEvent, ProcessEventKind};
use autoinst_detector::Detector;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use typed_builder::TypedBuilder;

#[derive(TypedBuilder)]
pub struct ManagerOptions<P: ProcessDetails, C: ConfigGroup, G: ProcessGroup> {
    handler: Handler<P, C, G>,
    factories: Factories,
    detector: Box<dyn Detector>,
    /// Config changes keyed by group. The sender must outlive [`Manager::run`].
    config_updates: mpsc::Receiver<ConfigUpdate<C>>,
    /// Explicit instrument and un-instrument requests.
    #[builder(default, setter(strip_option))]
    requests: Option<mpsc::Receiver<Request<P, G>>>,
    #[builder(default = DEFAULT_PROCESS_EVENT_BUFFER)]
    process_event_buffer: usize,
}

/// Attaches instrumentations to processes as they start and detaches them as
/// they exit.
pub struct Manager<P: ProcessDetails, C: ConfigGroup, G: ProcessGroup> {
    handler: Handler<P, C, G>,
    factories: Arc<Factories>,
    detector: Box<dyn Detector>,
    config_updates: mpsc::Receiver<ConfigUpdate<C>>,
    requests: Option<mpsc::Receiver<Request<P, G>>>,
    process_event_buffer: usize,
    metrics: Arc<ManagerMetrics>,
}

impl<P: ProcessDetails, C: ConfigGroup, G: ProcessGroup> Manager<P, C, G> {
    pub fn new(options: ManagerOptions<P, C, G>) -> Result<Self> {
        if options.process_event_buffer == 0 {
            bail!("process event buffer must be greater than zero");
        }

        Ok(Self {
            handler: options.handler,
            factories: Arc::new(options.factories),
            detector: options.detector,
            config_updates: options.config_updates,
            requests: options.requests,
            process_event_buffer: options.process_event_buffer,
            metrics: Arc::new(ManagerMetrics::new()),
        })
    }

    pub fn metrics(&self) -> Arc<ManagerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Runs the detector and the event loop until `cancel` fires or either of
    /// them fails. Every tracked instrumentation is closed before returning.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let cancel = cancel.child_token();
        let (events_tx, events_rx) = mpsc::channel(self.process_event_buffer);

        info!(
            factories = self.factories.len(),
            requests = self.requests.is_some(),
            "Starting instrumentation manager"
        );

        let mut tasks: JoinSet<Result<()>> = JoinSet::new();

        let detector = self.detector;
        let detector_cancel = cancel.clone();
        tasks.spawn(async move {
            detector
                .run(events_tx, detector_cancel)
                .await
                .context("process detector failed")
        });

        let event_loop = EventLoop::new(self.handler, self.factories, self.metrics, cancel.clone());
        tasks.spawn(event_loop.run(events_rx, self.config_updates, self.requests));

        let mut first_error: Option<anyhow::Error> = None;
        while let Some(joined) = tasks.join_next().await {
            let result = joined
                .map_err(|e| anyhow!(e))
                .and_then(|result| result)
                .context("instrumentation manager task failed");

            if let Err(e) = result {
                error!(error = ?e, "Stopping instrumentation manager");
                cancel.cancel();
                first_error.get_or_insert(e);
            }
        }

        info!("Instrumentation manager stopped");

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Next request, or never when there is no request stream.
async fn next_request<P: ProcessDetails, G: ProcessGroup>(
    requests: &mut Option<mpsc::Receiver<Request<P, G>>>,
) -> Option<Request<P, G>> {
    match requests {
        Some(requests) => requests.recv().await,
        None => std::future::pending().await,
    }
}

/// Owns the tracking indices. Every mutation happens on this task.
struct EventLoop<P: ProcessDetails, C: ConfigGroup, G: ProcessGroup> {
    handler: Handler<P, C, G>,
    factories: Arc<Factories>,
    metrics: Arc<ManagerMetrics>,
    tracker: Tracker<P, C, G>,
    run_tasks: JoinSet<()>,
    cancel: CancellationToken,
}

impl<P: ProcessDetails, C: ConfigGroup, G: ProcessGroup> EventLoop<P, C, G> {
    fn new(
        handler: Handler<P, C, G>,
        factories: Arc<Factories>,
        metrics: Arc<ManagerMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            handler,
            factories,
            metrics,
            tracker: Tracker::new(),
            run_tasks: JoinSet::new(),
            cancel,
        }
    }

    async fn run(
        mut self,
        mut process_events: mpsc::Receiver<ProcessEvent>,
        mut config_updates: mpsc::Receiver<ConfigUpdate<C>>,
        mut requests: Option<mpsc::Receiver<Request<P, G>>>,
    ) -> Result<()> {
        let mut config_updates_open = true;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!("Instrumentation manager cancelled");
                    break;
                }
                event = process_events.recv() => {
                    let Some(event) = event else {
                        info!("Process event stream ended");
                        break;
                    };
                    self.handle_process_event(event).await;
                }
                request = next_request(&mut requests), if requests.is_some() => {
                    match request {
                        Some(request) => self.handle_request(request).await,
                        None => {
                            warn!("Instrumentation request stream closed, no further requests will be handled");
                            requests = None;
                        }
                    }
                }
                update = config_updates.recv(), if config_updates_open => {
                    match update {
                        Some(update) => self.apply_config_update(update).await,
                        None => {
                            warn!("Config update stream closed, no further config changes will be applied");
                            config_updates_open = false;
                        }
                    }
                }
                Some(joined) = self.run_tasks.join_next(), if !self.run_tasks.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Instrumentation run task aborted");
                    }
                }
            }
        }

        self.cancel.cancel();
        self.shutdown().await;

        Ok(())
    }

    async fn handle_process_event(&mut self, event: ProcessEvent) {
        match event.kind {
            ProcessEventKind::Exec => self.handle_exec(event).await,
            ProcessEventKind::Exit => self.handle_exit(event.pid).await,
        }
    }

    async fn handle_request(&mut self, request: Request<P, G>) {
        match request {
            Request::Instrument(details_by_pid) => self.handle_instrument_request(details_by_pid).await,
            Request::Uninstrument(process_group) => self.handle_uninstrument_request(process_group).await,
        }
    }

    async fn handle_instrument_request(&mut self, details_by_pid: HashMap<Pid, P>) {
        for (pid, details) in details_by_pid {
            // requests may be repeated by whatever issues them
            if self.tracker.is_instrumented(pid) {
                debug!(pid, details = %details, "Process already instrumented, ignoring request");
                continue;
            }

            // a load-failed handle gets a fresh attempt
            if let Some(stale) = self.tracker.stop_track(pid) {
                self.teardown(pid, stale).await;
            }

            info!(pid, details = %details, "Received explicit instrumentation request");
            self.instrument(pid, details).await;
        }
    }

    async fn handle_uninstrument_request(&mut self, process_group: G) {
        let Some(members) = self.tracker.process_group_members(&process_group) else {
            debug!(?process_group, "No tracked processes for process group");
            return;
        };

        let pids: Vec<Pid> = members.iter().copied().collect();
        info!(?process_group, processes = pids.len(), "Received explicit un-instrumentation request");

        for pid in pids {
            if let Some(tracked) = self.tracker.stop_track(pid) {
                self.teardown(pid, tracked).await;
            }
        }
    }

    async fn handle_exec(&mut self, event: ProcessEvent) {
        let pid = event.pid;

        if self.tracker.contains(pid) {
            debug!(pid, "Received exec for already tracked process, ignoring");
            return;
        }

        // Step 1: resolve process details
        let details = match self.handler.process_details_resolver.resolve(&event).await {
            Ok(details) => details,
            Err(e) => {
                error!(pid, error = ?e, "Failed to resolve process details");
                return;
            }
        };

        self.instrument(pid, details).await;
    }

    /// Runs the rest of the chain for a resolved process.
    async fn instrument(&mut self, pid: Pid, details: P) {
        // Step 2: pick the distribution
        let distribution = match self.handler.distribution_matcher.distribution(&details).await {
            Ok(distribution) => distribution,
            Err(e) if is_language_mismatch(&e) => {
                debug!(pid, details = %details, "Process language differs from its container's distribution, skipping");
                return;
            }
            Err(e) => {
                error!(pid, details = %details, error = ?e, "Failed to match distribution");
                return;
            }
        };

        // Step 3: resolve the config and process groups
        let group = match self
            .handler
            .config_group_resolver
            .resolve(&details, &distribution)
            .await
        {
            Ok(group) => group,
            Err(e) => {
                error!(pid, details = %details, %distribution, error = ?e, "Failed to resolve config group");
                return;
            }
        };
        let process_group = match self.handler.process_group_resolver.resolve(&details).await {
            Ok(process_group) => process_group,
            Err(e) => {
                error!(pid, details = %details, %distribution, error = ?e, "Failed to resolve process group");
                return;
            }
        };

        // Step 4: find a factory; most distributions have none on a given node
        let Some(factory) = self.factories.get(&distribution).cloned() else {
            debug!(pid, details = %details, "{}", InstrumentationError::NoFactory(distribution));
            return;
        };

        // Step 5: settings, falling back to defaults
        let settings = match self
            .handler
            .settings_getter
            .settings(&details, &distribution)
            .await
        {
            Ok(settings) => settings,
            Err(e) => {
                warn!(pid, details = %details, error = ?e, "Failed to get instrumentation settings, using defaults");
                Settings::default()
            }
        };

        // Step 6: create
        let handle: Arc<dyn Instrumentation> = match factory.create(pid, settings).await {
            Ok(handle) => Arc::from(handle),
            Err(e) => {
                error!(pid, details = %details, %distribution, error = ?e, "Failed to create instrumentation");
                report_init(&self.handler.reporter, pid, Some(&e), &details).await;
                return;
            }
        };
        report_init(&self.handler.reporter, pid, None, &details).await;

        // Step 7: load, tracking the process whatever the outcome
        let load_result = handle.load().await;
        match &load_result {
            Ok(()) => self.metrics.record_instrumented(distribution),
            Err(_) => self.metrics.record_failed(distribution),
        }
        report_load(&self.handler.reporter, pid, load_result.as_ref().err(), &details).await;

        if let Err(e) = load_result {
            error!(pid, details = %details, %distribution, error = ?e, "Failed to load instrumentation");
            self.tracker.start_track(
                pid,
                TrackedProcess {
                    attachment: Attachment::LoadFailed(handle),
                    details,
                    group,
                    process_group,
                    distribution,
                },
            );
            return;
        }

        info!(pid, details = %details, %distribution, ?group, "Instrumentation loaded");
        let run = self.cancel.child_token();
        self.tracker.start_track(
            pid,
            TrackedProcess {
                attachment: Attachment::Active {
                    handle: Arc::clone(&handle),
                    run: run.clone(),
                },
                details: details.clone(),
                group,
                process_group,
                distribution,
            },
        );

        // Step 8: run until the process goes away or the manager stops
        self.spawn_run(pid, handle, details, run);
    }

    fn spawn_run(&mut self, pid: Pid, handle: Arc<dyn Instrumentation>, details: P, run: CancellationToken) {
        let reporter = Arc::clone(&self.handler.reporter);

        self.run_tasks.spawn(async move {
            match handle.run(run).await {
                Ok(()) => debug!(pid, "Instrumentation run finished"),
                Err(e) if is_cancellation(&e) => debug!(pid, "Instrumentation run cancelled"),
                Err(e) => {
                    error!(pid, details = %details, error = ?e, "Instrumentation run failed");
                    if let Err(report_err) = reporter.on_run(pid, &e, &details).await {
                        warn!(pid, error = ?report_err, "Failed to report run error");
                    }
                }
            }
        });
    }

    async fn handle_exit(&mut self, pid: Pid) {
        let Some(tracked) = self.tracker.stop_track(pid) else {
            debug!(pid, "Received exit for untracked process");
            return;
        };

        info!(pid, details = %tracked.details, "Tracked process exited");
        self.teardown(pid, tracked).await;
    }

    /// Stops the run task, closes the retained handle and reports the exit.
    /// The process must already be evicted from the tracker.
    async fn teardown(&mut self, pid: Pid, tracked: TrackedProcess<P, C, G>) {
        if let Attachment::Active { run, .. } = &tracked.attachment {
            run.cancel();
        }

        if let Err(e) = tracked.attachment.handle().close().await {
            warn!(pid, details = %tracked.details, error = ?e, "Failed to close instrumentation");
        }

        match tracked.attachment {
            Attachment::Active { .. } => self.metrics.record_uninstrumented(tracked.distribution),
            Attachment::LoadFailed(_) => {}
        }

        if let Err(e) = self.handler.reporter.on_exit(pid, &tracked.details).await {
            warn!(pid, error = ?e, "Failed to report process exit");
        }
    }

    async fn apply_config_update(&mut self, update: ConfigUpdate<C>) {
        for (group, config) in update {
            let Some(members) = self.tracker.group_members(&group) else {
                debug!(?group, "No tracked processes for config group");
                continue;
            };

            let handles: Vec<(Pid, Arc<dyn Instrumentation>)> = members
                .iter()
                .filter_map(|pid| {
                    let tracked = self.tracker.get(*pid)?;
                    match &tracked.attachment {
                        Attachment::Active { handle, .. } => Some((*pid, Arc::clone(handle))),
                        Attachment::LoadFailed(_) => None,
                    }
                })
                .collect();

            debug!(?group, processes = handles.len(), "Applying config update");

            let mut failures = Vec::new();
            for (pid, handle) in handles {
                if let Err(e) = handle.apply_config(&config).await {
                    failures.push((pid, e));
                }
            }

            if !failures.is_empty() {
                let err = ApplyConfigErrors { failures };
                error!(?group, error = %err, "Failed to apply config update");
            }
        }
    }

    async fn shutdown(&mut self) {
        let tracked: Vec<(Pid, TrackedProcess<P, C, G>)> = self.tracker.drain().collect();
        info!(processes = tracked.len(), "Closing all instrumentations");

        for (pid, tracked) in tracked {
            self.teardown(pid, tracked).await;
        }

        while let Some(joined) = self.run_tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Instrumentation run task aborted");
            }
        }
    }
}

async fn report_init<P: ProcessDetails>(
    reporter: &Arc<dyn Reporter<P>>,
    pid: Pid,
    err: Option<&anyhow::Error>,
    details: &P,
) {
    if let Err(report_err) = reporter.on_init(pid, err, details).await {
        warn!(pid, error = ?report_err, "Failed to report instrumentation init");
    }
}

async fn report_load<P: ProcessDetails>(
    reporter: &Arc<dyn Reporter<P>>,
    pid: Pid,
    err: Option<&anyhow::Error>,
    details: &P,
) {
    if let Err(report_err) = reporter.on_load(pid, err, details).await {
        warn!(pid, error = ?report_err, "Failed to report instrumentation load");
    }
}
