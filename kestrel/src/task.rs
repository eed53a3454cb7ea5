//! Tasks: resumable computations driven by the engine, one step per resumption.
//!
//! A task never blocks a thread. Each call to [Task::step] runs until the next suspension
//! point and returns a [TaskStatus] carrying the continuation to resume later. Continuations
//! are ordinary cloneable closures, which is what lets the engine duplicate in-flight tasks
//! for checkpoints and replay them for incremental simulation.

use crate::cell::{Event, ReadCells, Topic};
use crate::directive::ActivityDirectiveId;
use crate::duration::Duration;
use anyhow::Result;
use serde::Serialize;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

pub trait Task: Send + 'static {
    fn step(self: Box<Self>, scheduler: &mut dyn Scheduler) -> Result<TaskStatus>;

    /// An independent copy of this task in its current state.
    fn duplicate(&self) -> Box<dyn Task>;

    /// Set on tasks that start a new root of the task tree, such as a directive.
    #[doc(hidden)]
    fn root(&self) -> Option<TaskRoot> {
        None
    }
}

/// The origin of a tree of tasks. Together with a path of child ordinals it identifies a
/// task across runs of the same plan.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum TaskRoot {
    Directive(ActivityDirectiveId),
    Daemon(u32),
}

impl<F> Task for F
where
    F: FnOnce(&mut dyn Scheduler) -> Result<TaskStatus> + Clone + Send + 'static,
{
    fn step(self: Box<Self>, scheduler: &mut dyn Scheduler) -> Result<TaskStatus> {
        (*self)(scheduler)
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(self.clone())
    }
}

/// Boxes a closure as a task.
pub fn task<F>(f: F) -> Box<dyn Task>
where
    F: FnOnce(&mut dyn Scheduler) -> Result<TaskStatus> + Clone + Send + 'static,
{
    Box::new(f)
}

/// Which span a child task contributes to.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Hash)]
pub enum InSpan {
    /// The child works on behalf of its parent's span.
    Parent,
    /// The child opens a new span nested under its parent's.
    Fresh,
}

pub enum TaskStatus {
    Completed(Option<serde_json::Value>),
    Delayed(Duration, Box<dyn Task>),
    AwaitingCondition(Condition, Box<dyn Task>),
    /// Start `child` now and resume `continuation` when it completes.
    CallingTask(InSpan, Box<dyn Task>, Box<dyn Task>),
}

impl TaskStatus {
    pub fn completed() -> Result<Self> {
        Ok(TaskStatus::Completed(None))
    }

    pub fn completed_with(output: impl Serialize) -> Result<Self> {
        Ok(TaskStatus::Completed(Some(serde_json::to_value(output)?)))
    }

    pub fn delayed<F>(duration: Duration, continuation: F) -> Result<Self>
    where
        F: FnOnce(&mut dyn Scheduler) -> Result<TaskStatus> + Clone + Send + 'static,
    {
        Ok(TaskStatus::Delayed(duration, task(continuation)))
    }

    pub fn awaiting<F>(condition: Condition, continuation: F) -> Result<Self>
    where
        F: FnOnce(&mut dyn Scheduler) -> Result<TaskStatus> + Clone + Send + 'static,
    {
        Ok(TaskStatus::AwaitingCondition(condition, task(continuation)))
    }

    pub fn calling<F>(in_span: InSpan, child: Box<dyn Task>, continuation: F) -> Result<Self>
    where
        F: FnOnce(&mut dyn Scheduler) -> Result<TaskStatus> + Clone + Send + 'static,
    {
        Ok(TaskStatus::CallingTask(in_span, child, task(continuation)))
    }

    pub fn duplicate(&self) -> Self {
        match self {
            TaskStatus::Completed(output) => TaskStatus::Completed(output.clone()),
            TaskStatus::Delayed(d, t) => TaskStatus::Delayed(*d, t.duplicate()),
            TaskStatus::AwaitingCondition(c, t) => {
                TaskStatus::AwaitingCondition(c.clone(), t.duplicate())
            }
            TaskStatus::CallingTask(s, child, t) => {
                TaskStatus::CallingTask(*s, child.duplicate(), t.duplicate())
            }
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            TaskStatus::Completed(_) => "completed",
            TaskStatus::Delayed(..) => "delayed",
            TaskStatus::AwaitingCondition(..) => "awaiting condition",
            TaskStatus::CallingTask(..) => "calling task",
        }
    }
}

impl Debug for TaskStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Delayed(d, _) => write!(f, "Delayed({d})"),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// The capability object handed to a task on each resumption.
///
/// Every read and emission made through the scheduler is attributed to the running task.
pub trait Scheduler: ReadCells {
    fn now(&self) -> Duration;
    fn emit_event(&mut self, event: Event);
    fn spawn_task(&mut self, in_span: InSpan, task: Box<dyn Task>);

    /// Marks the current span as an activity and emits its input.
    fn start_activity_event(&mut self, event: Event);
    /// Emits the current activity's output.
    fn end_activity_event(&mut self, event: Event);
    /// Associates the current span with the directive it was instantiated from.
    fn start_directive(&mut self, directive: ActivityDirectiveId);
}

pub trait SchedulerExt: Scheduler {
    fn emit<T: Serialize + Send + Sync + 'static>(&mut self, value: T, topic: Topic<T>) {
        self.emit_event(Event::new(topic, value));
    }

    fn spawn<F>(&mut self, in_span: InSpan, f: F)
    where
        F: FnOnce(&mut dyn Scheduler) -> Result<TaskStatus> + Clone + Send + 'static,
    {
        self.spawn_task(in_span, task(f));
    }

    fn start_activity<T: Serialize + Send + Sync + 'static>(&mut self, input: T, topic: Topic<T>) {
        self.start_activity_event(Event::new(topic, input));
    }

    fn end_activity<T: Serialize + Send + Sync + 'static>(&mut self, output: T, topic: Topic<T>) {
        self.end_activity_event(Event::new(topic, output));
    }
}

impl<S: Scheduler + ?Sized> SchedulerExt for S {}

/// Read access for conditions and resources, which observe but never emit.
pub trait Querier: ReadCells {
    fn now(&self) -> Duration;
}

type Predicate =
    dyn Fn(&mut dyn Querier, Duration, Duration) -> Result<Option<Duration>> + Send + Sync;

/// A predicate over cell states that a task can wait on.
///
/// [Condition::next_satisfied] answers "what is the earliest offset from now, within
/// `[at_earliest, at_latest]`, at which the predicate holds", or `None` if it doesn't hold
/// anywhere in that window given the current trajectories of the cells it reads.
#[derive(Clone)]
pub struct Condition(Arc<Predicate>);

impl Condition {
    pub fn new(
        f: impl Fn(&mut dyn Querier, Duration, Duration) -> Result<Option<Duration>>
        + Send
        + Sync
        + 'static,
    ) -> Self {
        Condition(Arc::new(f))
    }

    /// A condition that is only checked at the current instant.
    ///
    /// It is rechecked whenever a cell it read changes or expires.
    pub fn when(f: impl Fn(&mut dyn Querier) -> Result<bool> + Send + Sync + 'static) -> Self {
        Condition::new(move |querier, at_earliest, _| {
            Ok(if at_earliest.is_zero() && f(querier)? {
                Some(Duration::ZERO)
            } else {
                None
            })
        })
    }

    pub fn always() -> Self {
        Condition::new(|_, at_earliest, _| Ok(Some(at_earliest)))
    }

    pub fn next_satisfied(
        &self,
        querier: &mut dyn Querier,
        at_earliest: Duration,
        at_latest: Duration,
    ) -> Result<Option<Duration>> {
        (self.0)(querier, at_earliest, at_latest)
    }
}

impl Debug for Condition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Condition")
    }
}
