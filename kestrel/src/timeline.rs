//! The committed history of a simulation, and the live cells that read from it.
//!
//! [TemporalEventSource] is append-only: one [Commit] per batch of jobs, in non-decreasing
//! time order. [LiveCells] keeps each cell's state together with a cursor into the source, and
//! only replays the commits a cell hasn't seen yet when the cell is read.

use crate::cell::{CellIndex, ErasedCell, Event, TopicIndex};
use crate::duration::Duration;
use crate::event_graph::EventGraph;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// The events of one batch, committed atomically.
#[derive(Clone, Debug)]
pub struct Commit {
    pub time: Duration,
    pub graph: EventGraph<Event>,
    topics: SmallVec<TopicIndex, 4>,
}

impl Commit {
    pub fn topics(&self) -> &[TopicIndex] {
        &self.topics
    }

    pub fn touches(&self, topic: TopicIndex) -> bool {
        self.topics.contains(&topic)
    }
}

#[derive(Clone, Debug, Default)]
pub struct TemporalEventSource {
    commits: Vec<Commit>,
}

impl TemporalEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a batch's events. Empty graphs are not recorded.
    ///
    /// Returns the topics the commit wrote to.
    pub fn add(&mut self, time: Duration, graph: EventGraph<Event>) -> SmallVec<TopicIndex, 4> {
        if graph.is_empty() {
            return SmallVec::new();
        }
        debug_assert!(self.commits.last().is_none_or(|c| c.time <= time));
        let mut topics = SmallVec::<TopicIndex, 4>::new();
        for event in graph.atoms() {
            if !topics.contains(&event.topic()) {
                topics.push(event.topic());
            }
        }
        topics.sort();
        self.commits.push(Commit {
            time,
            graph,
            topics: topics.clone(),
        });
        topics
    }

    pub fn commits(&self) -> &[Commit] {
        &self.commits
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }

    /// Commits made at or before `time`.
    pub fn until(&self, time: Duration) -> &[Commit] {
        let end = self.commits.partition_point(|c| c.time <= time);
        &self.commits[..end]
    }

    /// The committed graphs grouped by time, preserving commit order within a time.
    pub fn by_time(&self) -> BTreeMap<Duration, Vec<EventGraph<Event>>> {
        let mut result: BTreeMap<Duration, Vec<EventGraph<Event>>> = BTreeMap::new();
        for commit in &self.commits {
            result
                .entry(commit.time)
                .or_default()
                .push(commit.graph.clone());
        }
        result
    }

    /// Replays commits `from..` that are at or before `until` onto a cell whose state is
    /// valid at `time`. Returns the new cursor.
    fn replay(
        &self,
        cell: &mut dyn ErasedCell,
        time: &mut Duration,
        from: usize,
        until: Duration,
    ) -> usize {
        let topic = cell.topic();
        let mut cursor = from;
        for commit in &self.commits[from..] {
            if commit.time > until {
                break;
            }
            if commit.touches(topic) {
                cell.step(commit.time - *time);
                *time = commit.time;
                cell.apply_graph(&commit.graph);
            }
            cursor += 1;
        }
        cell.step(until - *time);
        *time = until;
        cursor
    }
}

struct LiveCell {
    cell: Box<dyn ErasedCell>,
    cursor: usize,
    time: Duration,
}

/// Cell states that catch up with a [TemporalEventSource] lazily.
pub(crate) struct LiveCells {
    origin: Vec<Box<dyn ErasedCell>>,
    origin_time: Duration,
    cells: Vec<LiveCell>,
}

impl LiveCells {
    pub fn new(cells: Vec<Box<dyn ErasedCell>>, time: Duration) -> Self {
        let live = cells
            .iter()
            .map(|c| LiveCell {
                cell: c.duplicate(),
                cursor: 0,
                time,
            })
            .collect();
        Self {
            origin: cells,
            origin_time: time,
            cells: live,
        }
    }

    /// The state of a cell at `now`, including every commit made at or before `now`.
    pub fn get(
        &mut self,
        index: CellIndex,
        source: &TemporalEventSource,
        now: Duration,
    ) -> Option<&dyn ErasedCell> {
        let live = self.cells.get_mut(index.0 as usize)?;
        if live.time <= now {
            live.cursor = source.replay(&mut *live.cell, &mut live.time, live.cursor, now);
        }
        Some(&*live.cell)
    }

    /// Reconstructs a cell's state as of an arbitrary time by replaying from the origin.
    pub fn state_at(
        &self,
        index: CellIndex,
        source: &TemporalEventSource,
        time: Duration,
    ) -> Option<Box<dyn ErasedCell>> {
        let mut cell = self.origin.get(index.0 as usize)?.duplicate();
        let mut cell_time = self.origin_time;
        source.replay(&mut *cell, &mut cell_time, 0, time);
        Some(cell)
    }

    pub fn duplicate(&self) -> Self {
        Self {
            origin: self.origin.iter().map(|c| c.duplicate()).collect(),
            origin_time: self.origin_time,
            cells: self
                .cells
                .iter()
                .map(|c| LiveCell {
                    cell: c.cell.duplicate(),
                    cursor: c.cursor,
                    time: c.time,
                })
                .collect(),
        }
    }
}
