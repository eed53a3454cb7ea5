//! Recorded task steps, replayed instead of re-executed when nothing they read has changed.

use crate::cell::{CellIndex, Event};
use crate::directive::ActivityDirectiveId;
use crate::duration::Duration;
use crate::task::{InSpan, Task, TaskRoot, TaskStatus};
use ahash::AHashMap;
use smallvec::SmallVec;
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Identifies a task across runs: its root, then the ordinal of each ancestor among its
/// parent's children.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct TaskKey {
    pub root: TaskRoot,
    pub path: SmallVec<u32, 4>,
}

impl Default for TaskKey {
    fn default() -> Self {
        Self::root(TaskRoot::Daemon(0))
    }
}

impl Ord for TaskKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.root, self.path.as_slice()).cmp(&(other.root, other.path.as_slice()))
    }
}

impl PartialOrd for TaskKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl TaskKey {
    pub fn root(root: TaskRoot) -> Self {
        Self {
            root,
            path: SmallVec::new(),
        }
    }

    pub fn child(&self, ordinal: u32) -> Self {
        let mut path = self.path.clone();
        path.push(ordinal);
        Self {
            root: self.root,
            path,
        }
    }

    /// Root tasks are kernel glue and are always executed.
    pub fn is_traced(&self) -> bool {
        !self.path.is_empty()
    }
}

/// One thing a task did during a step, in order.
pub(crate) enum StepOp {
    Read { cell: CellIndex, fingerprint: u64 },
    Emit(Event),
    StartActivity(Event),
    EndActivity(Event),
    StartDirective(ActivityDirectiveId),
    Spawn(InSpan, Box<dyn Task>),
}

impl StepOp {
    fn duplicate(&self) -> Self {
        match self {
            StepOp::Read { cell, fingerprint } => StepOp::Read {
                cell: *cell,
                fingerprint: *fingerprint,
            },
            StepOp::Emit(e) => StepOp::Emit(e.clone()),
            StepOp::StartActivity(e) => StepOp::StartActivity(e.clone()),
            StepOp::EndActivity(e) => StepOp::EndActivity(e.clone()),
            StepOp::StartDirective(d) => StepOp::StartDirective(*d),
            StepOp::Spawn(s, t) => StepOp::Spawn(*s, t.duplicate()),
        }
    }
}

pub(crate) struct StepRecord {
    pub time: Duration,
    pub ops: Vec<StepOp>,
    pub status: TaskStatus,
}

impl StepRecord {
    pub fn duplicate(&self) -> Self {
        Self {
            time: self.time,
            ops: self.ops.iter().map(StepOp::duplicate).collect(),
            status: self.status.duplicate(),
        }
    }
}

/// The step history of every traced task in one run.
#[derive(Default)]
pub struct TraceStore {
    traces: AHashMap<TaskKey, Vec<StepRecord>>,
    executions: BTreeMap<TaskRoot, usize>,
}

impl TraceStore {
    pub(crate) fn step(&self, key: &TaskKey, index: usize) -> Option<&StepRecord> {
        self.traces.get(key)?.get(index)
    }

    pub(crate) fn push(&mut self, key: &TaskKey, record: StepRecord) {
        self.traces.entry(key.clone()).or_default().push(record);
    }

    pub(crate) fn count_execution(&mut self, root: TaskRoot) {
        *self.executions.entry(root).or_default() += 1;
    }

    /// How many task steps under `root` were actually executed, rather than replayed.
    pub fn executions(&self, root: TaskRoot) -> usize {
        self.executions.get(&root).copied().unwrap_or(0)
    }

    /// Forgets every trace under a root.
    pub fn invalidate(&mut self, root: TaskRoot) {
        self.traces.retain(|key, _| key.root != root);
    }

    pub fn len(&self) -> usize {
        self.traces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.is_empty()
    }
}

/// Trace state of an engine that is replaying a previous run while recording the current one.
#[derive(Default)]
pub(crate) struct Tracer {
    pub previous: TraceStore,
    pub current: TraceStore,
}
