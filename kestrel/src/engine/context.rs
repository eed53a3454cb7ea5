use crate::cell::{CellIndex, Event, ReadCells, Topic, TopicIndex};
use crate::directive::ActivityDirectiveId;
use crate::duration::Duration;
use crate::engine::SimulationEngine;
use crate::engine::schedule::TaskId;
use crate::event_graph::EventGraph;
use crate::incremental::trace::StepOp;
use crate::model::DIRECTIVE_TOPIC;
use crate::task::{InSpan, Querier, Scheduler, Task};
use crate::timeline::{LiveCells, TemporalEventSource};
use anyhow::{Result, anyhow};
use std::any::Any;
use std::collections::BTreeSet;

/// What a step produced, split at the points where it started children.
pub(crate) struct StepOutput {
    /// Each segment of the task's own events, followed by the child started after it.
    pub branches: Vec<(EventGraph<Event>, TaskId)>,
    pub tail: EventGraph<Event>,
    pub ops: Option<Vec<StepOp>>,
}

/// The [Scheduler] handed to a task for one step.
pub(crate) struct StepContext<'e> {
    engine: &'e mut SimulationEngine,
    task: TaskId,
    now: Duration,
    /// Events from earlier in this instant that the task is ordered after.
    inherited: EventGraph<Event>,
    /// Everything the task has emitted this step, in order.
    own: EventGraph<Event>,
    tip: EventGraph<Event>,
    branches: Vec<(EventGraph<Event>, TaskId)>,
    ops: Option<Vec<StepOp>>,
}

impl<'e> StepContext<'e> {
    pub fn new(
        engine: &'e mut SimulationEngine,
        task: TaskId,
        now: Duration,
        inherited: EventGraph<Event>,
        recording: bool,
    ) -> Self {
        Self {
            engine,
            task,
            now,
            inherited,
            own: EventGraph::empty(),
            tip: EventGraph::empty(),
            branches: vec![],
            ops: recording.then(Vec::new),
        }
    }

    fn record(&mut self, op: impl FnOnce() -> StepOp) {
        if let Some(ops) = &mut self.ops {
            ops.push(op());
        }
    }

    fn push_event(&mut self, event: Event) {
        let atom = EventGraph::atom(event);
        self.own = EventGraph::sequentially(std::mem::take(&mut self.own), atom.clone());
        self.tip = EventGraph::sequentially(std::mem::take(&mut self.tip), atom);
    }

    /// Re-applies a recorded step's effects without running the task.
    pub fn replay(&mut self, ops: &[StepOp]) {
        for op in ops {
            match op {
                StepOp::Read { .. } => {}
                StepOp::Emit(e) => self.push_event(e.clone()),
                StepOp::StartActivity(e) => self.start_activity_event(e.clone()),
                StepOp::EndActivity(e) => self.end_activity_event(e.clone()),
                StepOp::StartDirective(d) => self.start_directive(*d),
                StepOp::Spawn(in_span, t) => self.spawn_task(*in_span, t.duplicate()),
            }
        }
    }

    pub fn finish(self) -> StepOutput {
        StepOutput {
            branches: self.branches,
            tail: self.tip,
            ops: self.ops,
        }
    }
}

impl ReadCells for StepContext<'_> {
    fn read_cell(&mut self, cell: CellIndex) -> Result<Box<dyn Any + Send>> {
        let visible = EventGraph::sequentially(self.inherited.clone(), self.own.clone());
        let view = self.engine.view(cell, self.now, &visible)?;
        let fingerprint = view.fingerprint();
        self.record(|| StepOp::Read { cell, fingerprint });
        Ok(view.clone_state())
    }
}

impl Scheduler for StepContext<'_> {
    fn now(&self) -> Duration {
        self.now
    }

    fn emit_event(&mut self, event: Event) {
        self.record(|| StepOp::Emit(event.clone()));
        self.push_event(event);
    }

    fn spawn_task(&mut self, in_span: InSpan, task: Box<dyn Task>) {
        self.record(|| StepOp::Spawn(in_span, task.duplicate()));
        let child = self.engine.create_child(self.task, in_span, task, false);
        let segment = std::mem::take(&mut self.tip);
        self.branches.push((segment, child));
    }

    fn start_activity_event(&mut self, event: Event) {
        self.record(|| StepOp::StartActivity(event.clone()));
        self.engine.mark_activity(self.task, &event);
        self.push_event(event);
    }

    fn end_activity_event(&mut self, event: Event) {
        self.record(|| StepOp::EndActivity(event.clone()));
        self.engine.mark_activity_output(self.task, &event);
        self.push_event(event);
    }

    fn start_directive(&mut self, directive: ActivityDirectiveId) {
        self.record(|| StepOp::StartDirective(directive));
        self.engine.mark_directive(self.task, directive);
        self.push_event(Event::new(
            Topic::<ActivityDirectiveId>::new(DIRECTIVE_TOPIC),
            directive,
        ));
    }
}

/// Read-only access for conditions and resources, tracking what was read.
pub(crate) struct EngineQuerier<'e> {
    cells: &'e mut LiveCells,
    timeline: &'e TemporalEventSource,
    now: Duration,
    topics: BTreeSet<TopicIndex>,
    /// Soonest expiry of any cell read.
    expiry: Option<Duration>,
}

impl<'e> EngineQuerier<'e> {
    pub fn new(cells: &'e mut LiveCells, timeline: &'e TemporalEventSource, now: Duration) -> Self {
        Self {
            cells,
            timeline,
            now,
            topics: BTreeSet::new(),
            expiry: None,
        }
    }

    /// The topics read, and the soonest expiry among the cells read.
    pub fn into_reads(self) -> (BTreeSet<TopicIndex>, Option<Duration>) {
        (self.topics, self.expiry)
    }
}

impl ReadCells for EngineQuerier<'_> {
    fn read_cell(&mut self, cell: CellIndex) -> Result<Box<dyn Any + Send>> {
        let live = self
            .cells
            .get(cell, self.timeline, self.now)
            .ok_or_else(|| anyhow!("no cell with index {}", cell.0))?;
        self.topics.insert(live.topic());
        if let Some(expiry) = live.expiry() {
            self.expiry = Some(self.expiry.map_or(expiry, |e| e.min(expiry)));
        }
        Ok(live.clone_state())
    }
}

impl Querier for EngineQuerier<'_> {
    fn now(&self) -> Duration {
        self.now
    }
}
