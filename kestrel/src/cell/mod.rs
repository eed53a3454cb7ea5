//! Cells: units of simulated state, mutated only through effects emitted on topics.

use crate::duration::Duration;
use crate::event_graph::{EffectTrait, EventGraph};
use crate::fingerprint;
use anyhow::{Result, anyhow};
use serde::Serialize;
use std::any::Any;
use std::fmt::{Debug, Display, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

pub mod counter;
pub mod linear;
pub mod register;

pub use counter::Counter;
pub use linear::{Linear, LinearEffect, LinearState};
pub use register::{Register, RegisterEffect, RegisterState};

/// The behavior of a kind of cell: an effect algebra plus how effects and time act on state.
///
/// `concurrently` must be commutative and associative. Cells whose domain cannot merge
/// concurrent effects must record the conflict in the combined effect instead of picking
/// a winner.
pub trait CellType: Send + Sync + 'static {
    type State: Clone + Serialize + Debug + Send + Sync + 'static;
    type Effect: Clone + Send + Sync + 'static;

    fn empty(&self) -> Self::Effect;
    fn sequentially(&self, prefix: Self::Effect, suffix: Self::Effect) -> Self::Effect;
    fn concurrently(&self, left: Self::Effect, right: Self::Effect) -> Self::Effect;

    /// An independent copy of the state, used when forking engines.
    fn duplicate(&self, state: &Self::State) -> Self::State {
        state.clone()
    }

    fn apply(&self, state: &mut Self::State, effect: &Self::Effect);

    /// Advances the state through `elapsed` time without any effects.
    fn step(&self, _state: &mut Self::State, _elapsed: Duration) {}

    /// The soonest time from now at which the observable state may change on its own.
    fn expiry(&self, _state: &Self::State) -> Option<Duration> {
        None
    }
}

struct Effects<'a, C>(&'a C);

impl<C: CellType> EffectTrait<C::Effect> for Effects<'_, C> {
    fn empty(&self) -> C::Effect {
        self.0.empty()
    }

    fn sequentially(&self, prefix: C::Effect, suffix: C::Effect) -> C::Effect {
        self.0.sequentially(prefix, suffix)
    }

    fn concurrently(&self, left: C::Effect, right: C::Effect) -> C::Effect {
        self.0.concurrently(left, right)
    }
}

/// Position of a topic in a model's topic registry.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, serde::Deserialize)]
pub struct TopicIndex(pub u32);

/// Position of a cell in a model's cell arena.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, serde::Deserialize)]
pub struct CellIndex(pub u32);

/// A typed channel that tasks emit values of type `T` on.
pub struct Topic<T> {
    index: TopicIndex,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Topic<T> {
    pub(crate) fn new(index: TopicIndex) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> TopicIndex {
        self.index
    }
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<T> Copy for Topic<T> {}

impl<T> Debug for Topic<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Topic({})", self.index.0)
    }
}

/// A typed handle to a cell allocated in a model.
pub struct CellId<C> {
    index: CellIndex,
    _marker: PhantomData<fn() -> C>,
}

impl<C> CellId<C> {
    pub(crate) fn new(index: CellIndex) -> Self {
        Self {
            index,
            _marker: PhantomData,
        }
    }

    pub fn index(&self) -> CellIndex {
        self.index
    }
}

impl<C> Clone for CellId<C> {
    fn clone(&self) -> Self {
        *self
    }
}
impl<C> Copy for CellId<C> {}

impl<C> Debug for CellId<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cell({})", self.index.0)
    }
}

/// One emitted value on a topic.
///
/// The value is kept both as a typed object (for cells to project) and as canonical bytes
/// (for ordering, fingerprints and equality).
#[derive(Clone)]
pub struct Event {
    topic: TopicIndex,
    value: Arc<dyn Any + Send + Sync>,
    bytes: Arc<[u8]>,
}

impl Event {
    pub fn new<T: Serialize + Send + Sync + 'static>(topic: Topic<T>, value: T) -> Self {
        let bytes = fingerprint::encode(&value);
        Self {
            topic: topic.index,
            value: Arc::new(value),
            bytes: bytes.into(),
        }
    }

    pub fn topic(&self) -> TopicIndex {
        self.topic
    }

    pub fn value<T: 'static>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }

    pub(crate) fn value_any(&self) -> &(dyn Any + Send + Sync) {
        &*self.value
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Ordering key used to canonicalize graphs of events.
    pub fn canonical_key(&self) -> (TopicIndex, Arc<[u8]>) {
        (self.topic, self.bytes.clone())
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.topic == other.topic && self.bytes == other.bytes
    }
}
impl Eq for Event {}

impl Debug for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event(topic {}, {:?})", self.topic.0, &*self.bytes)
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let digest = fingerprint::of_bytes(&self.bytes);
        write!(f, "{}#{digest:016x}", self.topic.0)
    }
}

pub(crate) type Projection<E> = Arc<dyn Fn(&Event) -> Option<E> + Send + Sync>;

/// Type-erased interface the engine uses to drive cells.
pub(crate) trait ErasedCell: Send + Sync {
    fn topic(&self) -> TopicIndex;
    fn apply_graph(&mut self, graph: &EventGraph<Event>);
    fn step(&mut self, elapsed: Duration);
    fn expiry(&self) -> Option<Duration>;
    fn duplicate(&self) -> Box<dyn ErasedCell>;
    fn fingerprint(&self) -> u64;
    fn clone_state(&self) -> Box<dyn Any + Send>;
}

pub(crate) struct TypedCell<C: CellType> {
    cell_type: Arc<C>,
    topic: TopicIndex,
    projection: Projection<C::Effect>,
    state: C::State,
}

impl<C: CellType> TypedCell<C> {
    pub(crate) fn new<T: 'static>(
        cell_type: Arc<C>,
        topic: Topic<T>,
        projection: impl Fn(&T) -> C::Effect + Send + Sync + 'static,
        state: C::State,
    ) -> Self {
        let projection: Projection<C::Effect> =
            Arc::new(move |event: &Event| event.value::<T>().map(&projection));
        Self {
            cell_type,
            topic: topic.index,
            projection,
            state,
        }
    }
}

impl<C: CellType> ErasedCell for TypedCell<C> {
    fn topic(&self) -> TopicIndex {
        self.topic
    }

    fn apply_graph(&mut self, graph: &EventGraph<Event>) {
        let topic = self.topic;
        if !graph.any(&|e: &Event| e.topic == topic) {
            return;
        }
        let cell_type = &*self.cell_type;
        let effect = graph.evaluate(&Effects(cell_type), &|e: &Event| {
            if e.topic == topic {
                (self.projection)(e).unwrap_or_else(|| cell_type.empty())
            } else {
                cell_type.empty()
            }
        });
        cell_type.apply(&mut self.state, &effect);
    }

    fn step(&mut self, elapsed: Duration) {
        if !elapsed.is_zero() {
            self.cell_type.step(&mut self.state, elapsed);
        }
    }

    fn expiry(&self) -> Option<Duration> {
        self.cell_type.expiry(&self.state)
    }

    fn duplicate(&self) -> Box<dyn ErasedCell> {
        Box::new(TypedCell {
            cell_type: self.cell_type.clone(),
            topic: self.topic,
            projection: self.projection.clone(),
            state: self.cell_type.duplicate(&self.state),
        })
    }

    fn fingerprint(&self) -> u64 {
        fingerprint::of_serialized(&self.state)
    }

    fn clone_state(&self) -> Box<dyn Any + Send> {
        Box::new(self.state.clone())
    }
}

/// Anything that can read cell states: task schedulers and condition/resource queriers.
pub trait ReadCells {
    /// Reads a type-erased copy of a cell's current state.
    fn read_cell(&mut self, cell: CellIndex) -> Result<Box<dyn Any + Send>>;
}

pub trait ReadCellsExt: ReadCells {
    /// Reads the current state of a cell.
    fn get<C: CellType>(&mut self, cell: CellId<C>) -> Result<C::State> {
        self.read_cell(cell.index())?
            .downcast::<C::State>()
            .map(|state| *state)
            .map_err(|_| {
                anyhow!(
                    "cell {} does not hold the requested state type",
                    cell.index().0
                )
            })
    }
}

impl<T: ReadCells + ?Sized> ReadCellsExt for T {}
