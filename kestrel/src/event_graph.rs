//! Algebraic records of what happened during a single simulation instant.
//!
//! An [EventGraph] combines atomic events with two operators: `sequentially`, for events
//! that are observably ordered, and `concurrently`, for events that happened without any
//! knowledge of each other. [EventGraph::Empty] is the identity of both.
//!
//! Graphs are immutable and share structure through [Arc]; nothing ever mutates a node in
//! place, so a graph can be handed to cells, timelines and checkpoints freely.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::sync::Arc;

/// Interprets event graphs into some effect type.
///
/// `empty` must be the identity of both combinators, `sequentially` must be associative, and
/// `concurrently` must be associative and commutative (or detect the conflict in its result).
pub trait EffectTrait<Effect> {
    fn empty(&self) -> Effect;
    fn sequentially(&self, prefix: Effect, suffix: Effect) -> Effect;
    fn concurrently(&self, left: Effect, right: Effect) -> Effect;
}

/// The free effect algebra: interprets a graph back into an event graph.
#[derive(Copy, Clone, Debug, Default)]
pub struct IdentityTrait;

impl<E: Clone> EffectTrait<EventGraph<E>> for IdentityTrait {
    fn empty(&self) -> EventGraph<E> {
        EventGraph::Empty
    }

    fn sequentially(&self, prefix: EventGraph<E>, suffix: EventGraph<E>) -> EventGraph<E> {
        EventGraph::sequentially(prefix, suffix)
    }

    fn concurrently(&self, left: EventGraph<E>, right: EventGraph<E>) -> EventGraph<E> {
        EventGraph::concurrently(left, right)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EventGraph<E> {
    #[default]
    Empty,
    Atom(E),
    Sequentially(Arc<EventGraph<E>>, Arc<EventGraph<E>>),
    Concurrently(Arc<EventGraph<E>>, Arc<EventGraph<E>>),
}

impl<E> EventGraph<E> {
    pub fn empty() -> Self {
        EventGraph::Empty
    }

    pub fn atom(event: E) -> Self {
        EventGraph::Atom(event)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, EventGraph::Empty)
    }

    pub fn sequentially(prefix: Self, suffix: Self) -> Self {
        match (prefix.is_empty(), suffix.is_empty()) {
            (true, _) => suffix,
            (_, true) => prefix,
            _ => EventGraph::Sequentially(Arc::new(prefix), Arc::new(suffix)),
        }
    }

    pub fn concurrently(left: Self, right: Self) -> Self {
        match (left.is_empty(), right.is_empty()) {
            (true, _) => right,
            (_, true) => left,
            _ => EventGraph::Concurrently(Arc::new(left), Arc::new(right)),
        }
    }

    /// Folds from the empty graph, so `[a, b, c]` becomes `((a; b); c)`.
    pub fn sequentially_all(graphs: impl IntoIterator<Item = Self>) -> Self {
        graphs
            .into_iter()
            .fold(EventGraph::Empty, EventGraph::sequentially)
    }

    pub fn concurrently_all(graphs: impl IntoIterator<Item = Self>) -> Self {
        graphs
            .into_iter()
            .fold(EventGraph::Empty, EventGraph::concurrently)
    }

    /// Interprets the graph, substituting each atom with an effect.
    pub fn evaluate<Effect>(
        &self,
        effect_trait: &impl EffectTrait<Effect>,
        substitution: &impl Fn(&E) -> Effect,
    ) -> Effect {
        match self {
            EventGraph::Empty => effect_trait.empty(),
            EventGraph::Atom(e) => substitution(e),
            EventGraph::Sequentially(prefix, suffix) => effect_trait.sequentially(
                prefix.evaluate(effect_trait, substitution),
                suffix.evaluate(effect_trait, substitution),
            ),
            EventGraph::Concurrently(left, right) => effect_trait.concurrently(
                left.evaluate(effect_trait, substitution),
                right.evaluate(effect_trait, substitution),
            ),
        }
    }

    pub fn map<F>(&self, f: &impl Fn(&E) -> F) -> EventGraph<F> {
        match self {
            EventGraph::Empty => EventGraph::Empty,
            EventGraph::Atom(e) => EventGraph::Atom(f(e)),
            EventGraph::Sequentially(a, b) => EventGraph::sequentially(a.map(f), b.map(f)),
            EventGraph::Concurrently(a, b) => EventGraph::concurrently(a.map(f), b.map(f)),
        }
    }

    /// Every atom, in left-to-right order.
    pub fn atoms(&self) -> Vec<&E> {
        let mut result = vec![];
        self.collect_atoms(&mut result);
        result
    }

    fn collect_atoms<'a>(&'a self, into: &mut Vec<&'a E>) {
        match self {
            EventGraph::Empty => {}
            EventGraph::Atom(e) => into.push(e),
            EventGraph::Sequentially(a, b) | EventGraph::Concurrently(a, b) => {
                a.collect_atoms(into);
                b.collect_atoms(into);
            }
        }
    }

    pub fn any(&self, predicate: &impl Fn(&E) -> bool) -> bool {
        match self {
            EventGraph::Empty => false,
            EventGraph::Atom(e) => predicate(e),
            EventGraph::Sequentially(a, b) | EventGraph::Concurrently(a, b) => {
                a.any(predicate) || b.any(predicate)
            }
        }
    }
}

impl<E: Clone> EventGraph<E> {
    /// Removes every atom that fails the predicate.
    ///
    /// Subtrees that are left unchanged are shared with the original graph.
    pub fn filter(&self, predicate: &impl Fn(&E) -> bool) -> Self {
        self.filter_changed(predicate)
            .unwrap_or_else(|| self.clone())
    }

    /// `None` if nothing was removed.
    fn filter_changed(&self, predicate: &impl Fn(&E) -> bool) -> Option<Self> {
        match self {
            EventGraph::Empty => None,
            EventGraph::Atom(e) => (!predicate(e)).then_some(EventGraph::Empty),
            EventGraph::Sequentially(a, b) => {
                filter_pair(a, b, predicate).map(|(a, b)| rebuild(a, b, EventGraph::Sequentially))
            }
            EventGraph::Concurrently(a, b) => {
                filter_pair(a, b, predicate).map(|(a, b)| rebuild(a, b, EventGraph::Concurrently))
            }
        }
    }

    /// Canonicalizes the graph.
    ///
    /// Sequential chains are reassociated to the right, concurrent spines are flattened,
    /// sorted by the canonical key of each branch and refolded to the right. Two graphs
    /// that differ only by associativity of either operator or commutativity of
    /// `concurrently` rebalance to equal graphs.
    pub fn rebalance<K: Ord + Clone>(&self, key: &impl Fn(&E) -> K) -> Self {
        self.canonical(key).0
    }

    fn canonical<K: Ord + Clone>(&self, key: &impl Fn(&E) -> K) -> (Self, CanonicalKey<K>) {
        match self {
            EventGraph::Empty => (EventGraph::Empty, CanonicalKey::Empty),
            EventGraph::Atom(e) => (self.clone(), CanonicalKey::Atom(key(e))),
            EventGraph::Sequentially(..) => {
                let mut parts = vec![];
                self.flatten_sequential(&mut parts);
                let canonical: Vec<_> = parts
                    .into_iter()
                    .map(|g| g.canonical(key))
                    .filter(|(g, _)| !g.is_empty())
                    .collect();
                fold_right(
                    canonical,
                    EventGraph::sequentially,
                    CanonicalKey::Sequentially,
                )
            }
            EventGraph::Concurrently(..) => {
                let mut parts = vec![];
                self.flatten_concurrent(&mut parts);
                let mut canonical: Vec<_> = parts
                    .into_iter()
                    .map(|g| g.canonical(key))
                    .filter(|(g, _)| !g.is_empty())
                    .collect();
                canonical.sort_by(|(_, a), (_, b)| a.cmp(b));
                fold_right(
                    canonical,
                    EventGraph::concurrently,
                    CanonicalKey::Concurrently,
                )
            }
        }
    }

    fn flatten_sequential<'a>(&'a self, into: &mut Vec<&'a Self>) {
        match self {
            EventGraph::Sequentially(a, b) => {
                a.flatten_sequential(into);
                b.flatten_sequential(into);
            }
            other => into.push(other),
        }
    }

    fn flatten_concurrent<'a>(&'a self, into: &mut Vec<&'a Self>) {
        match self {
            EventGraph::Concurrently(a, b) => {
                a.flatten_concurrent(into);
                b.flatten_concurrent(into);
            }
            other => into.push(other),
        }
    }
}

type Pair<E> = (Arc<EventGraph<E>>, Arc<EventGraph<E>>);

fn filter_pair<E: Clone>(
    a: &Arc<EventGraph<E>>,
    b: &Arc<EventGraph<E>>,
    predicate: &impl Fn(&E) -> bool,
) -> Option<Pair<E>> {
    match (a.filter_changed(predicate), b.filter_changed(predicate)) {
        (None, None) => None,
        (fa, fb) => Some((
            fa.map(Arc::new).unwrap_or_else(|| a.clone()),
            fb.map(Arc::new).unwrap_or_else(|| b.clone()),
        )),
    }
}

fn rebuild<E: Clone>(
    a: Arc<EventGraph<E>>,
    b: Arc<EventGraph<E>>,
    node: fn(Arc<EventGraph<E>>, Arc<EventGraph<E>>) -> EventGraph<E>,
) -> EventGraph<E> {
    if a.is_empty() {
        (*b).clone()
    } else if b.is_empty() {
        (*a).clone()
    } else {
        node(a, b)
    }
}

fn fold_right<E, K>(
    parts: Vec<(EventGraph<E>, CanonicalKey<K>)>,
    combine: fn(EventGraph<E>, EventGraph<E>) -> EventGraph<E>,
    key: fn(Vec<CanonicalKey<K>>) -> CanonicalKey<K>,
) -> (EventGraph<E>, CanonicalKey<K>) {
    if parts.len() < 2 {
        return parts
            .into_iter()
            .next()
            .unwrap_or((EventGraph::Empty, CanonicalKey::Empty));
    }
    let mut keys = Vec::with_capacity(parts.len());
    let mut graph = EventGraph::Empty;
    for (g, k) in parts.into_iter().rev() {
        graph = combine(g, graph);
        keys.push(k);
    }
    keys.reverse();
    (graph, key(keys))
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum CanonicalKey<K> {
    Empty,
    Atom(K),
    Sequentially(Vec<CanonicalKey<K>>),
    Concurrently(Vec<CanonicalKey<K>>),
}

impl<E: Display> Display for EventGraph<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            EventGraph::Empty => write!(f, "{{}}"),
            EventGraph::Atom(e) => write!(f, "{e}"),
            EventGraph::Sequentially(a, b) => {
                write_operand(f, a, matches!(**a, EventGraph::Concurrently(..)))?;
                write!(f, "; ")?;
                write_operand(f, b, matches!(**b, EventGraph::Concurrently(..)))
            }
            EventGraph::Concurrently(a, b) => {
                write_operand(f, a, matches!(**a, EventGraph::Sequentially(..)))?;
                write!(f, " | ")?;
                write_operand(f, b, matches!(**b, EventGraph::Sequentially(..)))
            }
        }
    }
}

fn write_operand<E: Display>(
    f: &mut Formatter<'_>,
    graph: &EventGraph<E>,
    parenthesize: bool,
) -> std::fmt::Result {
    if parenthesize {
        write!(f, "({graph})")
    } else {
        write!(f, "{graph}")
    }
}
