//! The discrete event engine.
//!
//! Time advances in instants. At each instant the engine takes every job scheduled for the
//! earliest pending time and runs them as one batch: tasks step, conditions are evaluated and
//! resources are sampled. Everything a batch emits is combined into one event graph and
//! committed to the timeline at once, so jobs in the same batch never observe each other.
//!
//! Within a task's step, children it spawns or calls run right after it in the same batch.
//! A child sees what its parent emitted before starting it, and its events are concurrent
//! with whatever the parent emits afterwards.

pub(crate) mod context;
pub(crate) mod schedule;
pub(crate) mod span;

use crate::cell::{CellId, CellIndex, CellType, ErasedCell, Event, TopicIndex};
use crate::directive::ActivityDirectiveId;
use crate::duration::Duration;
use crate::error::TaskFault;
use crate::event_graph::EventGraph;
use crate::incremental::trace::{StepOp, StepRecord, TaskKey, TraceStore, Tracer};
use crate::model::{MissionModel, ResourceGetter, TopicKind};
use crate::results::RealDynamics;
use crate::task::{Condition, InSpan, Scheduler, Task, TaskRoot, TaskStatus};
use crate::timeline::{LiveCells, TemporalEventSource};
use ahash::AHashMap;
use anyhow::{Context, Result, anyhow, bail};
use context::{EngineQuerier, StepContext};
use schedule::{ConditionId, JobId, JobSchedule, SpanId, TaskId};
use span::{ActivityRecord, Spans};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, trace, warn};

enum TaskState {
    Ready(Box<dyn Task>),
    /// Waiting for a called child, and everything it spawned, to complete.
    Blocked(Box<dyn Task>, u32),
    Awaiting(Box<dyn Task>, ConditionId),
    Running,
}

impl TaskState {
    fn duplicate(&self) -> Self {
        match self {
            TaskState::Ready(t) => TaskState::Ready(t.duplicate()),
            TaskState::Blocked(t, n) => TaskState::Blocked(t.duplicate(), *n),
            TaskState::Awaiting(t, c) => TaskState::Awaiting(t.duplicate(), *c),
            TaskState::Running => TaskState::Running,
        }
    }
}

struct TaskEntry {
    span: SpanId,
    caller: Option<TaskId>,
    /// Started by `call` rather than spawned.
    called: bool,
    children: Vec<TaskId>,
    key: TaskKey,
    /// Still following the previous run's trace.
    replaying: bool,
    steps: usize,
    state: TaskState,
}

impl TaskEntry {
    fn duplicate(&self) -> Self {
        Self {
            span: self.span,
            caller: self.caller,
            called: self.called,
            children: self.children.clone(),
            key: self.key.clone(),
            replaying: self.replaying,
            steps: self.steps,
            state: self.state.duplicate(),
        }
    }
}

#[derive(Clone)]
struct ConditionEntry {
    condition: Condition,
    task: TaskId,
    /// The next job for this condition resumes the task instead of re-evaluating.
    signal: bool,
}

/// A sampled resource value.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Dynamics {
    Real(RealDynamics),
    Discrete(serde_json::Value),
}

/// Runs a daemon as the only child of a root task, so that the daemon's own steps are traced.
struct DaemonRoot {
    root: TaskRoot,
    daemon: Box<dyn Task>,
}

impl Task for DaemonRoot {
    fn step(self: Box<Self>, _: &mut dyn Scheduler) -> Result<TaskStatus> {
        TaskStatus::calling(InSpan::Parent, self.daemon, |_: &mut dyn Scheduler| {
            TaskStatus::completed()
        })
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(DaemonRoot {
            root: self.root,
            daemon: self.daemon.duplicate(),
        })
    }

    fn root(&self) -> Option<TaskRoot> {
        Some(self.root)
    }
}

pub struct SimulationEngine {
    pub(crate) model: Arc<MissionModel>,
    cells: LiveCells,
    pub(crate) timeline: TemporalEventSource,
    schedule: JobSchedule,
    tasks: BTreeMap<TaskId, TaskEntry>,
    conditions: BTreeMap<ConditionId, ConditionEntry>,
    subscribers: AHashMap<TopicIndex, BTreeSet<JobId>>,
    subscriptions: AHashMap<JobId, BTreeSet<TopicIndex>>,
    pub(crate) spans: Spans,
    /// Samples per resource, in time order.
    pub(crate) profiles: Vec<Vec<(Duration, Dynamics)>>,
    pub(crate) faults: Vec<TaskFault>,
    elapsed: Duration,
    horizon: Duration,
    next_task: u64,
    next_condition: u64,
    tracer: Option<Tracer>,
}

impl SimulationEngine {
    /// An engine at time zero with the model's daemons started and every resource due for
    /// its first sample.
    pub fn new(model: Arc<MissionModel>) -> Self {
        let initial = model.cells.iter().map(|c| c.duplicate()).collect();
        let cells = LiveCells::new(initial, Duration::ZERO);
        let mut engine = Self {
            cells,
            timeline: TemporalEventSource::new(),
            schedule: JobSchedule::default(),
            tasks: BTreeMap::new(),
            conditions: BTreeMap::new(),
            subscribers: AHashMap::new(),
            subscriptions: AHashMap::new(),
            spans: Spans::default(),
            profiles: vec![vec![]; model.resources.len()],
            faults: vec![],
            elapsed: Duration::ZERO,
            horizon: Duration::MAX,
            next_task: 0,
            next_condition: 0,
            tracer: None,
            model,
        };
        for index in 0..engine.model.resources.len() {
            engine
                .schedule
                .schedule(JobId::Resource(index), Duration::ZERO);
        }
        let daemons: Vec<Box<dyn Task>> = engine
            .model
            .daemons
            .iter()
            .map(|(_, factory)| factory())
            .collect();
        for (index, daemon) in daemons.into_iter().enumerate() {
            let root = TaskRoot::Daemon(index as u32);
            engine.spawn_root(
                TaskKey::root(root),
                Box::new(DaemonRoot { root, daemon }),
                Duration::ZERO,
            );
        }
        engine
    }

    /// Replays steps from `previous` where they are still valid, recording a fresh trace.
    pub(crate) fn with_traces(mut self, previous: TraceStore) -> Self {
        self.tracer = Some(Tracer {
            previous,
            current: TraceStore::default(),
        });
        // Daemons were created before tracing was enabled.
        for entry in self.tasks.values_mut() {
            entry.replaying = true;
        }
        self
    }

    pub(crate) fn take_traces(&mut self) -> Option<TraceStore> {
        self.tracer.take().map(|t| t.current)
    }

    pub fn model(&self) -> &Arc<MissionModel> {
        &self.model
    }

    /// Time of the last instant processed, or the horizon once a run has finished.
    pub fn elapsed_time(&self) -> Duration {
        self.elapsed
    }

    pub fn next_job_time(&self) -> Option<Duration> {
        self.schedule.next_time()
    }

    pub fn faults(&self) -> &[TaskFault] {
        &self.faults
    }

    /// A cell's state at any time the engine has already simulated, rebuilt from its initial
    /// state. Includes every commit made at `time`.
    pub fn cell_state_at<C: CellType>(&self, cell: CellId<C>, time: Duration) -> Result<C::State> {
        if time > self.elapsed {
            bail!(
                "cannot look at {time}, the engine is only at {}",
                self.elapsed
            );
        }
        self.cells
            .state_at(cell.index(), &self.timeline, time)
            .ok_or_else(|| anyhow!("no cell with index {}", cell.index().0))?
            .clone_state()
            .downcast::<C::State>()
            .map(|state| *state)
            .map_err(|_| {
                anyhow!(
                    "cell {} does not hold the requested state type",
                    cell.index().0
                )
            })
    }

    /// Starts a root task, such as a directive, at an absolute time.
    pub fn schedule_root(&mut self, task: Box<dyn Task>, at: Duration) -> Result<()> {
        let Some(root) = task.root() else {
            bail!("only root tasks can be scheduled directly");
        };
        if at < self.elapsed {
            bail!(
                "cannot schedule a task at {at}, the engine is already at {}",
                self.elapsed
            );
        }
        self.spawn_root(TaskKey::root(root), task, at);
        Ok(())
    }

    fn spawn_root(&mut self, key: TaskKey, task: Box<dyn Task>, at: Duration) -> TaskId {
        let span = self.spans.open(None, at, key.clone());
        self.spans.add_contributor(span);
        let id = self.insert_task(TaskEntry {
            span,
            caller: None,
            called: false,
            children: vec![],
            key,
            replaying: self.tracer.is_some(),
            steps: 0,
            state: TaskState::Ready(task),
        });
        self.schedule.schedule(JobId::Task(id), at);
        id
    }

    fn insert_task(&mut self, entry: TaskEntry) -> TaskId {
        let id = TaskId(self.next_task);
        self.next_task += 1;
        self.tasks.insert(id, entry);
        id
    }

    /// Registers a child of `parent`. The child is ready to run, but not scheduled; the
    /// caller runs it as part of the parent's frame.
    pub(crate) fn create_child(
        &mut self,
        parent: TaskId,
        in_span: InSpan,
        task: Box<dyn Task>,
        blocks_parent: bool,
    ) -> TaskId {
        let now = self.elapsed;
        let tracing = self.tracer.is_some();
        let (parent_span, key, replaying, inherited_caller) = match self.tasks.get(&parent) {
            Some(p) => {
                let key = match task.root() {
                    Some(root) => TaskKey::root(root),
                    None => p.key.child(p.children.len() as u32),
                };
                (Some(p.span), key, p.replaying, p.caller)
            }
            None => (None, TaskKey::root(TaskRoot::Daemon(u32::MAX)), false, None),
        };
        // Spawned tasks hold up whoever is waiting on their spawner.
        let caller = if blocks_parent {
            Some(parent)
        } else {
            inherited_caller
        };
        if !blocks_parent {
            if let Some(waiting) = caller.and_then(|c| self.tasks.get_mut(&c)) {
                if let TaskState::Blocked(_, waiting_on) = &mut waiting.state {
                    *waiting_on += 1;
                }
            }
        }
        let span = match (in_span, parent_span) {
            (InSpan::Parent, Some(span)) => span,
            (_, parent_span) => self.spans.open(parent_span, now, key.clone()),
        };
        self.spans.add_contributor(span);
        let id = self.insert_task(TaskEntry {
            span,
            caller,
            called: blocks_parent,
            children: vec![],
            replaying: replaying && tracing,
            key,
            steps: 0,
            state: TaskState::Ready(task),
        });
        if let Some(p) = self.tasks.get_mut(&parent) {
            p.children.push(id);
        }
        id
    }

    /// A cell as seen by a task: committed state at the current instant, plus `visible`.
    pub(crate) fn view(
        &mut self,
        cell: CellIndex,
        now: Duration,
        visible: &EventGraph<Event>,
    ) -> Result<Box<dyn ErasedCell>> {
        let mut view = self
            .cells
            .get(cell, &self.timeline, now)
            .ok_or_else(|| anyhow!("no cell with index {}", cell.0))?
            .duplicate();
        if !visible.is_empty() {
            view.apply_graph(visible);
        }
        Ok(view)
    }

    pub(crate) fn mark_activity(&mut self, task: TaskId, event: &Event) {
        let Some(span) = self.tasks.get(&task).map(|t| t.span) else {
            return;
        };
        let activity_type = match self.model.topic_info(event.topic()) {
            Some(info) => match &info.kind {
                TopicKind::ActivityInput(name) => name.clone(),
                _ => info.name.clone(),
            },
            None => format!("topic {}", event.topic().0),
        };
        let arguments = self.model.event_json(event);
        if let Some(span) = self.spans.get_mut(span) {
            span.activity = Some(ActivityRecord {
                activity_type,
                arguments,
                output: None,
            });
        }
    }

    pub(crate) fn mark_activity_output(&mut self, task: TaskId, event: &Event) {
        let Some(span) = self.tasks.get(&task).map(|t| t.span) else {
            return;
        };
        let output = self.model.event_json(event);
        if let Some(activity) = self.spans.get_mut(span).and_then(|s| s.activity.as_mut()) {
            activity.output = Some(output);
        }
    }

    pub(crate) fn mark_directive(&mut self, task: TaskId, directive: ActivityDirectiveId) {
        let Some(span) = self.tasks.get(&task).map(|t| t.span) else {
            return;
        };
        if let Some(span) = self.spans.get_mut(span) {
            span.directive = Some(directive);
        }
    }

    /// Runs one batch: every job at the earliest scheduled time, if that is at or before
    /// `horizon`. Returns the time of the batch, or `None` when there is nothing left to do.
    ///
    /// Resources are not sampled at the horizon itself.
    pub fn step(&mut self, horizon: Duration) -> Result<Option<Duration>> {
        self.horizon = horizon;
        let Some((time, jobs)) = self.schedule.extract_next(horizon) else {
            return Ok(None);
        };
        let (deferred, jobs): (Vec<JobId>, Vec<JobId>) = jobs
            .into_iter()
            .partition(|job| time >= horizon && matches!(job, JobId::Resource(_)));
        for job in &deferred {
            self.schedule.schedule(*job, time);
        }
        if jobs.is_empty() {
            return Ok(None);
        }

        self.elapsed = time;
        let mut batch = EventGraph::empty();
        for job in jobs {
            let graph = match job {
                JobId::Task(id) => self.run_task(id, &EventGraph::empty()),
                JobId::Condition(id) => match self.update_condition(id) {
                    Some(task) => self.run_task(task, &EventGraph::empty()),
                    None => EventGraph::empty(),
                },
                JobId::Resource(index) => {
                    self.update_resource(index)?;
                    EventGraph::empty()
                }
            };
            batch = EventGraph::concurrently(batch, graph);
        }

        let topics = self.timeline.add(time, batch);
        trace!(%time, topics = topics.len(), "committed batch");
        self.invalidate(&topics);
        Ok(Some(time))
    }

    /// Steps until nothing is scheduled at or before `horizon`, or `cancel` returns true.
    /// Cancellation is only checked between instants.
    ///
    /// Returns whether the run reached the horizon.
    pub fn run_until(&mut self, horizon: Duration, cancel: &dyn Fn() -> bool) -> Result<bool> {
        loop {
            if cancel() {
                debug!(elapsed = %self.elapsed, "simulation cancelled");
                return Ok(false);
            }
            if self.step(horizon)?.is_none() {
                break;
            }
        }
        self.elapsed = self.elapsed.max(horizon);
        Ok(true)
    }

    /// Removes directive roots that are scheduled after `time` and have not started yet.
    pub fn unschedule_directives_after(&mut self, time: Duration) {
        let pending: Vec<TaskId> = self
            .tasks
            .iter()
            .filter(|(id, t)| {
                matches!(t.key.root, TaskRoot::Directive(_))
                    && !t.key.is_traced()
                    && t.steps == 0
                    && self
                        .schedule
                        .time_of(JobId::Task(**id))
                        .is_some_and(|at| at > time)
            })
            .map(|(id, _)| *id)
            .collect();
        for id in pending {
            if let Some(entry) = self.tasks.remove(&id) {
                self.schedule.unschedule(JobId::Task(id));
                self.spans.discard(entry.span);
            }
        }
    }

    /// Whether the activity started for `directive` has finished.
    pub fn directive_finished(&self, directive: ActivityDirectiveId) -> bool {
        self.spans
            .directive_span(directive)
            .is_some_and(|s| s.end.is_some())
    }

    /// Whether every activity started so far has finished.
    pub fn all_activities_finished(&self) -> bool {
        self.spans
            .iter()
            .filter(|(_, s)| s.activity.is_some())
            .all(|(_, s)| s.end.is_some())
    }

    /// An independent copy of the engine, including every in-flight task. Traces are not
    /// copied.
    pub fn duplicate(&self) -> Self {
        Self {
            model: self.model.clone(),
            cells: self.cells.duplicate(),
            timeline: self.timeline.clone(),
            schedule: self.schedule.clone(),
            tasks: self
                .tasks
                .iter()
                .map(|(id, t)| (*id, t.duplicate()))
                .collect(),
            conditions: self.conditions.clone(),
            subscribers: self.subscribers.clone(),
            subscriptions: self.subscriptions.clone(),
            spans: self.spans.clone(),
            profiles: self.profiles.clone(),
            faults: self.faults.clone(),
            elapsed: self.elapsed,
            horizon: self.horizon,
            next_task: self.next_task,
            next_condition: self.next_condition,
            tracer: None,
        }
    }

    /// Runs one step of a task, then every child it started, and returns the events of the
    /// whole frame.
    fn run_task(&mut self, id: TaskId, inherited: &EventGraph<Event>) -> EventGraph<Event> {
        let now = self.elapsed;
        let Some(entry) = self.tasks.get_mut(&id) else {
            return EventGraph::empty();
        };
        let task = match std::mem::replace(&mut entry.state, TaskState::Running) {
            TaskState::Ready(task) => task,
            other => {
                entry.state = other;
                return EventGraph::empty();
            }
        };
        let key = entry.key.clone();
        let recording = self.tracer.is_some() && key.is_traced();

        let replay = if recording {
            self.replayable_step(id, now, inherited)
        } else {
            None
        };
        let executing = recording && replay.is_none();
        let mut context = StepContext::new(self, id, now, inherited.clone(), executing);
        let result = match &replay {
            Some(record) => {
                context.replay(&record.ops);
                Ok(record.status.duplicate())
            }
            None => task.step(&mut context),
        };
        let output = context.finish();
        let result = result.and_then(|status| match status {
            TaskStatus::Delayed(d, _) if d.is_negative() => {
                Err(anyhow!("task delayed by a negative duration ({d})"))
            }
            status => Ok(status),
        });

        let status = match result {
            Ok(status) => status,
            Err(error) => {
                self.fault(id, error);
                return EventGraph::empty();
            }
        };

        if let Some(tracer) = &mut self.tracer {
            if recording {
                match (replay, output.ops) {
                    (Some(record), _) => tracer.current.push(&key, record),
                    (None, Some(ops)) => {
                        tracer.current.count_execution(key.root);
                        tracer.current.push(
                            &key,
                            StepRecord {
                                time: now,
                                ops,
                                status: status.duplicate(),
                            },
                        );
                    }
                    (None, None) => {}
                }
            }
        }

        let mut branches = output.branches;
        let mut tail = output.tail;
        if let Some(entry) = self.tasks.get_mut(&id) {
            entry.steps += 1;
        }
        match status {
            TaskStatus::Completed(_) => self.complete(id),
            TaskStatus::Delayed(duration, next) => {
                self.set_state(id, TaskState::Ready(next));
                self.schedule.schedule(JobId::Task(id), now + duration);
            }
            TaskStatus::AwaitingCondition(condition, next) => {
                let condition_id = ConditionId(self.next_condition);
                self.next_condition += 1;
                self.conditions.insert(
                    condition_id,
                    ConditionEntry {
                        condition,
                        task: id,
                        signal: false,
                    },
                );
                self.set_state(id, TaskState::Awaiting(next, condition_id));
                self.schedule.schedule(JobId::Condition(condition_id), now);
            }
            TaskStatus::CallingTask(in_span, child, next) => {
                self.set_state(id, TaskState::Blocked(next, 1));
                let child = self.create_child(id, in_span, child, true);
                branches.push((std::mem::take(&mut tail), child));
            }
        }

        let mut visible = inherited.clone();
        let mut child_graphs = Vec::with_capacity(branches.len());
        for (segment, child) in &branches {
            visible = EventGraph::sequentially(visible, segment.clone());
            child_graphs.push(self.run_task(*child, &visible));
        }
        let mut graph = tail;
        for ((segment, _), child_graph) in branches.into_iter().zip(child_graphs).rev() {
            graph = EventGraph::sequentially(segment, EventGraph::concurrently(child_graph, graph));
        }
        graph
    }

    /// The previous run's record for this task's next step, if everything it read then
    /// still reads the same.
    fn replayable_step(
        &mut self,
        id: TaskId,
        now: Duration,
        inherited: &EventGraph<Event>,
    ) -> Option<StepRecord> {
        let entry = self.tasks.get(&id)?;
        if !entry.replaying {
            return None;
        }
        let record = self
            .tracer
            .as_ref()?
            .previous
            .step(&entry.key, entry.steps)
            .map(StepRecord::duplicate);

        let valid = record.as_ref().is_some_and(|record| {
            if record.time != now {
                return false;
            }
            let mut own = EventGraph::empty();
            for op in &record.ops {
                match op {
                    StepOp::Read { cell, fingerprint } => {
                        let visible = EventGraph::sequentially(inherited.clone(), own.clone());
                        match self.view(*cell, now, &visible) {
                            Ok(view) if view.fingerprint() == *fingerprint => {}
                            _ => return false,
                        }
                    }
                    StepOp::Emit(e) | StepOp::StartActivity(e) | StepOp::EndActivity(e) => {
                        own = EventGraph::sequentially(own, EventGraph::atom(e.clone()));
                    }
                    StepOp::StartDirective(_) | StepOp::Spawn(..) => {}
                }
            }
            true
        });

        if valid {
            record
        } else {
            if let Some(entry) = self.tasks.get_mut(&id) {
                trace!(key = ?entry.key, step = entry.steps, "trace diverged");
                entry.replaying = false;
            }
            None
        }
    }

    fn set_state(&mut self, id: TaskId, state: TaskState) {
        if let Some(entry) = self.tasks.get_mut(&id) {
            entry.state = state;
        }
    }

    fn complete(&mut self, id: TaskId) {
        let Some(entry) = self.tasks.remove(&id) else {
            return;
        };
        let now = self.elapsed;
        self.spans.remove_contributor(entry.span, now);
        if let Some(caller) = entry.caller {
            self.release_caller(caller, now);
        }
    }

    /// One fewer task is holding up `caller`; resumes it if that was the last.
    fn release_caller(&mut self, caller_id: TaskId, now: Duration) {
        let Some(caller) = self.tasks.get_mut(&caller_id) else {
            return;
        };
        match std::mem::replace(&mut caller.state, TaskState::Running) {
            TaskState::Blocked(next, 1) => {
                caller.state = TaskState::Ready(next);
                self.schedule.schedule(JobId::Task(caller_id), now);
            }
            TaskState::Blocked(next, waiting_on) => {
                caller.state = TaskState::Blocked(next, waiting_on - 1)
            }
            other => caller.state = other,
        }
    }

    /// Records a fault and aborts the task with its descendants, then every caller blocked on
    /// it through `call`. A spawned task that faults only takes down its own subtree.
    fn fault(&mut self, id: TaskId, error: anyhow::Error) {
        let span = self.tasks.get(&id).map(|t| t.span);
        let fault = TaskFault {
            time: self.elapsed,
            directive: span.and_then(|s| self.spans.nearest_directive(s)),
            activity_type: span.and_then(|s| self.spans.nearest_activity_type(s)),
            message: format!("{error:#}"),
        };
        warn!(time = %fault.time, directive = ?fault.directive, "task fault: {}", fault.message);
        self.faults.push(fault);

        let mut removed = vec![];
        self.abort(id, &mut removed);
        let mut link = removed.first().filter(|e| e.called).and_then(|e| e.caller);
        while let Some(caller) = link {
            let Some(entry) = self.remove_task(caller) else {
                break;
            };
            link = entry.caller.filter(|_| entry.called);
            removed.push(entry);
        }

        // Aborted spans stay unfinished, but stop holding up their parents and callers.
        let now = self.elapsed;
        for entry in removed {
            self.spans.abandon(entry.span, now);
            if let Some(caller) = entry.caller {
                self.release_caller(caller, now);
            }
        }
    }

    /// Removes a task and its descendants, collecting their entries.
    fn abort(&mut self, id: TaskId, removed: &mut Vec<TaskEntry>) {
        let Some(entry) = self.remove_task(id) else {
            return;
        };
        let children = entry.children.clone();
        removed.push(entry);
        for child in children {
            self.abort(child, removed);
        }
    }

    fn remove_task(&mut self, id: TaskId) -> Option<TaskEntry> {
        let entry = self.tasks.remove(&id)?;
        self.schedule.unschedule(JobId::Task(id));
        if let TaskState::Awaiting(_, condition) = &entry.state {
            self.remove_condition(*condition);
        }
        Some(entry)
    }

    fn remove_condition(&mut self, id: ConditionId) -> Option<ConditionEntry> {
        self.schedule.unschedule(JobId::Condition(id));
        self.subscribe(JobId::Condition(id), BTreeSet::new());
        self.conditions.remove(&id)
    }

    /// Evaluates a condition, or fires it if its prediction has come due. Returns the task to
    /// resume now, if any.
    fn update_condition(&mut self, id: ConditionId) -> Option<TaskId> {
        let now = self.elapsed;
        let entry = self.conditions.get(&id)?.clone();
        if entry.signal {
            self.remove_condition(id);
            let waiting = self.tasks.get_mut(&entry.task)?;
            if let TaskState::Awaiting(next, _) =
                std::mem::replace(&mut waiting.state, TaskState::Running)
            {
                waiting.state = TaskState::Ready(next);
                return Some(entry.task);
            }
            return None;
        }

        let mut querier = EngineQuerier::new(&mut self.cells, &self.timeline, now);
        let at_latest = self.horizon.saturating_sub(now).max(Duration::ZERO);
        let prediction = entry
            .condition
            .next_satisfied(&mut querier, Duration::ZERO, at_latest);
        let (topics, expiry) = querier.into_reads();
        self.subscribe(JobId::Condition(id), topics);

        match prediction {
            Err(error) => {
                self.remove_condition(id);
                self.fault(entry.task, error.context("condition evaluation failed"));
            }
            Ok(Some(offset)) if expiry.is_none_or(|e| offset < e) => {
                if let Some(c) = self.conditions.get_mut(&id) {
                    c.signal = true;
                }
                self.schedule.schedule(JobId::Condition(id), now + offset);
            }
            Ok(_) => {
                if let Some(expiry) = expiry {
                    let recheck = now.saturating_add(expiry.max(Duration::EPSILON));
                    self.schedule.schedule(JobId::Condition(id), recheck);
                }
            }
        }
        None
    }

    fn update_resource(&mut self, index: usize) -> Result<()> {
        let now = self.elapsed;
        let model = self.model.clone();
        let resource = model
            .resources
            .get(index)
            .ok_or_else(|| anyhow!("no resource with index {index}"))?;
        let mut querier = EngineQuerier::new(&mut self.cells, &self.timeline, now);
        let dynamics = match &resource.getter {
            ResourceGetter::Real(getter) => getter(&mut querier).map(Dynamics::Real),
            ResourceGetter::Discrete(getter) => getter(&mut querier).map(Dynamics::Discrete),
        }
        .with_context(|| format!("sampling resource {}", resource.name))?;
        let (topics, expiry) = querier.into_reads();
        self.subscribe(JobId::Resource(index), topics);

        let profile = &mut self.profiles[index];
        match profile.last_mut() {
            Some((time, last)) if *time == now => *last = dynamics,
            _ => profile.push((now, dynamics)),
        }
        if let Some(expiry) = expiry {
            let resample = now.saturating_add(expiry.max(Duration::EPSILON));
            self.schedule.schedule(JobId::Resource(index), resample);
        }
        Ok(())
    }

    /// Replaces the set of topics whose writes re-trigger `job`.
    fn subscribe(&mut self, job: JobId, topics: BTreeSet<TopicIndex>) {
        if let Some(previous) = self.subscriptions.remove(&job) {
            for topic in previous {
                if let Some(jobs) = self.subscribers.get_mut(&topic) {
                    jobs.remove(&job);
                }
            }
        }
        for topic in &topics {
            self.subscribers.entry(*topic).or_default().insert(job);
        }
        if !topics.is_empty() {
            self.subscriptions.insert(job, topics);
        }
    }

    /// Reschedules every condition and resource that read a topic just written to.
    fn invalidate(&mut self, topics: &[TopicIndex]) {
        let now = self.elapsed;
        let jobs: BTreeSet<JobId> = topics
            .iter()
            .filter_map(|t| self.subscribers.get(t))
            .flatten()
            .copied()
            .collect();
        for job in jobs {
            if let JobId::Condition(id) = job {
                if let Some(c) = self.conditions.get_mut(&id) {
                    c.signal = false;
                }
            }
            self.schedule.schedule(job, now);
        }
    }
}
