use crate::instrumentation::Instrumentation;
use crate::types::{ConfigGroup, ProcessDetails, ProcessGroup};
use autoinst_common::{OtelDistribution, Pid};
use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// What the manager holds for a tracked process.
#[derive(Clone)]
pub enum Attachment {
    /// `load` succeeded; the handle is running and accepts config. `run`
    /// stops the handle's run task and nothing else.
    Active {
        handle: Arc<dyn Instrumentation>,
        run: CancellationToken,
    },
    /// `load` failed. Kept only so it can be closed when the process goes away.
    LoadFailed(Arc<dyn Instrumentation>),
}

impl Attachment {
    pub fn handle(&self) -> &Arc<dyn Instrumentation> {
        match self {
            Attachment::Active { handle, .. } | Attachment::LoadFailed(handle) => handle,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Attachment::Active { .. })
    }
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Attachment::Active { run, .. } => f
                .debug_struct("Active")
                .field("cancelled", &run.is_cancelled())
                .finish(),
            Attachment::LoadFailed(_) => f.write_str("LoadFailed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackedProcess<P: ProcessDetails, C: ConfigGroup, G: ProcessGroup> {
    pub attachment: Attachment,
    pub details: P,
    pub group: C,
    pub process_group: G,
    pub distribution: OtelDistribution,
}

/// Tracking indices. Owned by the event loop, never shared.
#[derive(Debug)]
pub struct Tracker<P: ProcessDetails, C: ConfigGroup, G: ProcessGroup> {
    by_pid: HashMap<Pid, TrackedProcess<P, C, G>>,
    by_group: HashMap<C, HashSet<Pid>>,
    by_process_group: HashMap<G, HashSet<Pid>>,
}

impl<P: ProcessDetails, C: ConfigGroup, G: ProcessGroup> Default for Tracker<P, C, G> {
    fn default() -> Self {
        Self {
            by_pid: HashMap::new(),
            by_group: HashMap::new(),
            by_process_group: HashMap::new(),
        }
    }
}

fn remove_member<K: Eq + Hash>(index: &mut HashMap<K, HashSet<Pid>>, key: &K, pid: Pid) {
    if let Some(members) = index.get_mut(key) {
        members.remove(&pid);
        if members.is_empty() {
            index.remove(key);
        }
    }
}

impl<P: ProcessDetails, C: ConfigGroup, G: ProcessGroup> Tracker<P, C, G> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks `pid` under its groups. A pid that is already tracked is
    /// evicted from its previous groups first so it never sits in two buckets.
    pub fn start_track(&mut self, pid: Pid, tracked: TrackedProcess<P, C, G>) {
        if self.by_pid.contains_key(&pid) {
            self.stop_track(pid);
        }

        self.by_group
            .entry(tracked.group.clone())
            .or_default()
            .insert(pid);
        self.by_process_group
            .entry(tracked.process_group.clone())
            .or_default()
            .insert(pid);
        self.by_pid.insert(pid, tracked);
    }

    /// Removes `pid` from every index, dropping group buckets once empty.
    pub fn stop_track(&mut self, pid: Pid) -> Option<TrackedProcess<P, C, G>> {
        let tracked = self.by_pid.remove(&pid)?;

        remove_member(&mut self.by_group, &tracked.group, pid);
        remove_member(&mut self.by_process_group, &tracked.process_group, pid);

        Some(tracked)
    }

    pub fn get(&self, pid: Pid) -> Option<&TrackedProcess<P, C, G>> {
        self.by_pid.get(&pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.by_pid.contains_key(&pid)
    }

    /// Tracked with a handle that loaded.
    pub fn is_instrumented(&self, pid: Pid) -> bool {
        self.by_pid
            .get(&pid)
            .is_some_and(|tracked| tracked.attachment.is_active())
    }

    pub fn group_members(&self, group: &C) -> Option<&HashSet<Pid>> {
        self.by_group.get(group)
    }

    pub fn has_group(&self, group: &C) -> bool {
        self.by_group.contains_key(group)
    }

    pub fn process_group_members(&self, process_group: &G) -> Option<&HashSet<Pid>> {
        self.by_process_group.get(process_group)
    }

    pub fn len(&self) -> usize {
        self.by_pid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_pid.is_empty()
    }

    pub fn group_count(&self) -> usize {
        self.by_group.len()
    }

    pub fn process_group_count(&self) -> usize {
        self.by_process_group.len()
    }

    /// Empties every index, yielding every tracked process.
    pub fn drain(&mut self) -> impl Iterator<Item = (Pid, TrackedProcess<P, C, G>)> + '_ {
        self.by_group.clear();
        self.by_process_group.clear();
        self.by_pid.drain()
    }
}
