//! The boundary between mission models and the kernel.
//!
//! A [ModelType] registers its topics, cells, daemons, resources and activity types with an
//! [Initializer], which hands back typed handles (plain indices). The result is a
//! [MissionModel]: an immutable description that any number of engines can be built from.

use crate::Time;
use crate::cell::{CellId, CellIndex, CellType, ErasedCell, Event, Topic, TopicIndex, TypedCell};
use crate::directive::ActivityDirectiveId;
use crate::error::SimulationError;
use crate::results::RealDynamics;
use crate::task::{InSpan, Querier, Scheduler, SchedulerExt, Task, TaskStatus, task};
use anyhow::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// A kind of mission model, able to instantiate itself from a configuration.
pub trait ModelType: Send + Sync + 'static {
    type Config: DeserializeOwned + Default;

    /// Identifies the model for checkpoint keys. Must change whenever behavior changes.
    fn id(&self) -> String {
        std::any::type_name::<Self>().to_string()
    }

    fn instantiate(
        &self,
        plan_start: Time,
        config: Self::Config,
        initializer: &mut Initializer,
    ) -> Result<()>;
}

/// Builds a model. A `null` configuration falls back on the default config.
pub fn build_model<M: ModelType>(
    model_type: &M,
    plan_start: Time,
    configuration: &serde_json::Value,
) -> Result<Arc<MissionModel>> {
    let config = if configuration.is_null() {
        M::Config::default()
    } else {
        serde_json::from_value(configuration.clone()).map_err(|e| SimulationError::Model {
            message: format!("invalid configuration: {e}"),
        })?
    };
    let mut initializer = Initializer::new();
    model_type
        .instantiate(plan_start, config, &mut initializer)
        .map_err(|e| SimulationError::Model {
            message: format!("{e:#}"),
        })?;
    let model = initializer.finish(model_type.id());
    debug!(
        model = model.id,
        topics = model.topics.len(),
        cells = model.cells.len(),
        resources = model.resources.len(),
        "built mission model"
    );
    Ok(Arc::new(model))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TopicKind {
    Plain,
    ActivityInput(String),
    ActivityOutput(String),
    Directive,
}

pub(crate) struct TopicInfo {
    pub name: String,
    pub schema: String,
    pub kind: TopicKind,
    pub to_json: Arc<dyn Fn(&dyn Any) -> serde_json::Value + Send + Sync>,
}

pub(crate) type RealGetter = Arc<dyn Fn(&mut dyn Querier) -> Result<RealDynamics> + Send + Sync>;
pub(crate) type DiscreteGetter =
    Arc<dyn Fn(&mut dyn Querier) -> Result<serde_json::Value> + Send + Sync>;

#[derive(Clone)]
pub(crate) enum ResourceGetter {
    Real(RealGetter),
    Discrete(DiscreteGetter),
}

pub(crate) struct ResourceDef {
    pub name: String,
    pub getter: ResourceGetter,
}

/// Registry handed to [ModelType::instantiate].
pub struct Initializer {
    topics: Vec<TopicInfo>,
    cells: Vec<Box<dyn ErasedCell>>,
    daemons: Vec<(String, DaemonFactory)>,
    resources: Vec<ResourceDef>,
    directive_types: BTreeMap<String, Arc<dyn DirectiveType>>,
}

pub(crate) type DaemonFactory = Arc<dyn Fn() -> Box<dyn Task> + Send + Sync>;

pub(crate) const DIRECTIVE_TOPIC: TopicIndex = TopicIndex(0);

impl Initializer {
    fn new() -> Self {
        let mut initializer = Self {
            topics: vec![],
            cells: vec![],
            daemons: vec![],
            resources: vec![],
            directive_types: BTreeMap::new(),
        };
        let directive_topic = initializer
            .topic_of_kind::<ActivityDirectiveId>("ActivityDirective", TopicKind::Directive);
        debug_assert_eq!(DIRECTIVE_TOPIC, directive_topic.index());
        initializer
    }

    fn topic_of_kind<T: Serialize + Send + Sync + 'static>(
        &mut self,
        name: impl Into<String>,
        kind: TopicKind,
    ) -> Topic<T> {
        let index = TopicIndex(self.topics.len() as u32);
        self.topics.push(TopicInfo {
            name: name.into(),
            schema: std::any::type_name::<T>().to_string(),
            kind,
            to_json: Arc::new(|value: &dyn Any| {
                value
                    .downcast_ref::<T>()
                    .and_then(|v| serde_json::to_value(v).ok())
                    .unwrap_or(serde_json::Value::Null)
            }),
        });
        Topic::new(index)
    }

    pub fn topic<T: Serialize + Send + Sync + 'static>(
        &mut self,
        name: impl Into<String>,
    ) -> Topic<T> {
        self.topic_of_kind(name, TopicKind::Plain)
    }

    /// Allocates a cell that receives the effects emitted on `topic`, through `projection`.
    pub fn cell<C: CellType, T: 'static>(
        &mut self,
        cell_type: C,
        initial: C::State,
        topic: Topic<T>,
        projection: impl Fn(&T) -> C::Effect + Send + Sync + 'static,
    ) -> CellId<C> {
        let index = CellIndex(self.cells.len() as u32);
        self.cells.push(Box::new(TypedCell::new(
            Arc::new(cell_type),
            topic,
            projection,
            initial,
        )));
        CellId::new(index)
    }

    /// Allocates a cell together with a fresh topic carrying its effects directly.
    pub fn allocate<C>(
        &mut self,
        name: impl Into<String>,
        cell_type: C,
        initial: C::State,
    ) -> (CellId<C>, Topic<C::Effect>)
    where
        C: CellType,
        C::Effect: Serialize,
    {
        let topic = self.topic::<C::Effect>(name);
        let cell = self.cell(cell_type, initial, topic, Clone::clone);
        (cell, topic)
    }

    /// A task started at the beginning of every simulation.
    pub fn daemon<F>(&mut self, name: impl Into<String>, body: F)
    where
        F: FnOnce(&mut dyn Scheduler) -> Result<TaskStatus> + Clone + Send + Sync + 'static,
    {
        self.daemons
            .push((name.into(), Arc::new(move || task(body.clone()))));
    }

    pub fn real_resource(
        &mut self,
        name: impl Into<String>,
        getter: impl Fn(&mut dyn Querier) -> Result<RealDynamics> + Send + Sync + 'static,
    ) {
        self.resources.push(ResourceDef {
            name: name.into(),
            getter: ResourceGetter::Real(Arc::new(getter)),
        });
    }

    pub fn discrete_resource<T: Serialize>(
        &mut self,
        name: impl Into<String>,
        getter: impl Fn(&mut dyn Querier) -> Result<T> + Send + Sync + 'static,
    ) {
        self.resources.push(ResourceDef {
            name: name.into(),
            getter: ResourceGetter::Discrete(Arc::new(move |querier| {
                Ok(serde_json::to_value(getter(querier)?)?)
            })),
        });
    }

    /// Registers an activity type, which can both be spawned by other tasks and be
    /// instantiated from plan directives under `name`.
    pub fn activity<A>(
        &mut self,
        name: impl Into<String>,
        body: impl Fn(A) -> Box<dyn Task> + Send + Sync + 'static,
    ) -> ActivityType<A>
    where
        A: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let name: String = name.into();
        let input_topic = self.topic_of_kind::<A>(
            format!("ActivityType.Input.{name}"),
            TopicKind::ActivityInput(name.clone()),
        );
        let output_topic = self.topic_of_kind::<serde_json::Value>(
            format!("ActivityType.Output.{name}"),
            TopicKind::ActivityOutput(name.clone()),
        );
        let activity_type = ActivityType {
            name: name.clone().into(),
            input_topic,
            output_topic,
            body: Arc::new(body),
        };
        self.directive_types
            .insert(name, Arc::new(activity_type.clone()));
        activity_type
    }

    fn finish(self, id: String) -> MissionModel {
        MissionModel {
            id,
            topics: self.topics,
            cells: self.cells,
            daemons: self.daemons,
            resources: self.resources,
            directive_types: self.directive_types,
        }
    }
}

/// An instantiated mission model.
pub struct MissionModel {
    pub(crate) id: String,
    pub(crate) topics: Vec<TopicInfo>,
    pub(crate) cells: Vec<Box<dyn ErasedCell>>,
    pub(crate) daemons: Vec<(String, DaemonFactory)>,
    pub(crate) resources: Vec<ResourceDef>,
    pub(crate) directive_types: BTreeMap<String, Arc<dyn DirectiveType>>,
}

impl MissionModel {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn directive_types(&self) -> &BTreeMap<String, Arc<dyn DirectiveType>> {
        &self.directive_types
    }

    pub fn directive_type(&self, name: &str) -> Option<&Arc<dyn DirectiveType>> {
        self.directive_types.get(name)
    }

    /// `(index, name, schema)` of every topic, in registration order.
    pub fn topics(&self) -> Vec<(TopicIndex, String, String)> {
        self.topics
            .iter()
            .enumerate()
            .map(|(i, t)| (TopicIndex(i as u32), t.name.clone(), t.schema.clone()))
            .collect()
    }

    pub(crate) fn topic_info(&self, topic: TopicIndex) -> Option<&TopicInfo> {
        self.topics.get(topic.0 as usize)
    }

    pub(crate) fn event_json(&self, event: &Event) -> serde_json::Value {
        self.topic_info(event.topic())
            .map(|info| (info.to_json)(event.value_any()))
            .unwrap_or(serde_json::Value::Null)
    }
}

/// A directive type: deserializes arguments into a task.
pub trait DirectiveType: Send + Sync {
    fn name(&self) -> &str;
    /// Rust type name of the input.
    fn input_schema(&self) -> String;
    fn instantiate(&self, arguments: &serde_json::Value) -> Result<Box<dyn Task>>;
}

/// A typed handle to a registered activity type.
pub struct ActivityType<A> {
    name: Arc<str>,
    input_topic: Topic<A>,
    output_topic: Topic<serde_json::Value>,
    body: Arc<dyn Fn(A) -> Box<dyn Task> + Send + Sync>,
}

impl<A> Clone for ActivityType<A> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            input_topic: self.input_topic,
            output_topic: self.output_topic,
            body: self.body.clone(),
        }
    }
}

impl<A> ActivityType<A>
where
    A: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_topic(&self) -> Topic<A> {
        self.input_topic
    }

    /// A task running this activity in whatever span it is started in.
    pub fn task(&self, input: A) -> Box<dyn Task> {
        Box::new(ActivityTask {
            input_topic: self.input_topic,
            output_topic: self.output_topic,
            phase: ActivityPhase::Start(input, self.body.clone()),
        })
    }

    /// Spawns this activity as a child of the current task, in a fresh span.
    pub fn spawn(&self, scheduler: &mut dyn Scheduler, input: A) {
        scheduler.spawn_task(InSpan::Fresh, self.task(input));
    }

    /// Calls this activity in a fresh span, resuming `continuation` when it finishes.
    pub fn call<F>(&self, input: A, continuation: F) -> Result<TaskStatus>
    where
        F: FnOnce(&mut dyn Scheduler) -> Result<TaskStatus> + Clone + Send + 'static,
    {
        TaskStatus::calling(InSpan::Fresh, self.task(input), continuation)
    }
}

impl<A> DirectiveType for ActivityType<A>
where
    A: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn input_schema(&self) -> String {
        std::any::type_name::<A>().to_string()
    }

    fn instantiate(&self, arguments: &serde_json::Value) -> Result<Box<dyn Task>> {
        let input: A = serde_json::from_value(arguments.clone())
            .with_context(|| format!("invalid arguments for {}", self.name))?;
        Ok(self.task(input))
    }
}

enum ActivityPhase<A> {
    Start(A, Arc<dyn Fn(A) -> Box<dyn Task> + Send + Sync>),
    Running(Box<dyn Task>),
}

/// Emits the activity's input, runs its body, and emits the body's output when it completes.
struct ActivityTask<A> {
    input_topic: Topic<A>,
    output_topic: Topic<serde_json::Value>,
    phase: ActivityPhase<A>,
}

impl<A> ActivityTask<A>
where
    A: Serialize + Clone + Send + Sync + 'static,
{
    fn running(
        input_topic: Topic<A>,
        output_topic: Topic<serde_json::Value>,
        body: Box<dyn Task>,
    ) -> Box<dyn Task> {
        Box::new(ActivityTask {
            input_topic,
            output_topic,
            phase: ActivityPhase::Running(body),
        })
    }
}

impl<A> Task for ActivityTask<A>
where
    A: Serialize + Clone + Send + Sync + 'static,
{
    fn step(self: Box<Self>, scheduler: &mut dyn Scheduler) -> Result<TaskStatus> {
        let ActivityTask {
            input_topic,
            output_topic,
            phase,
        } = *self;
        let body = match phase {
            ActivityPhase::Start(input, factory) => {
                scheduler.start_activity(input.clone(), input_topic);
                factory(input)
            }
            ActivityPhase::Running(body) => body,
        };
        let wrap =
            |next: Box<dyn Task>| ActivityTask::<A>::running(input_topic, output_topic, next);
        Ok(match body.step(scheduler)? {
            TaskStatus::Completed(output) => {
                scheduler.end_activity(
                    output.clone().unwrap_or(serde_json::Value::Null),
                    output_topic,
                );
                TaskStatus::Completed(output)
            }
            TaskStatus::Delayed(d, next) => TaskStatus::Delayed(d, wrap(next)),
            TaskStatus::AwaitingCondition(c, next) => TaskStatus::AwaitingCondition(c, wrap(next)),
            TaskStatus::CallingTask(s, child, next) => {
                TaskStatus::CallingTask(s, child, wrap(next))
            }
        })
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(ActivityTask {
            input_topic: self.input_topic,
            output_topic: self.output_topic,
            phase: match &self.phase {
                ActivityPhase::Start(input, factory) => {
                    ActivityPhase::Start(input.clone(), factory.clone())
                }
                ActivityPhase::Running(body) => ActivityPhase::Running(body.duplicate()),
            },
        })
    }
}
