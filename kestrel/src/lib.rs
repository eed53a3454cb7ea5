//! # Kestrel
//!
//! A discrete event simulation kernel for spacecraft mission plans.
//!
//! Kestrel takes a mission model (state, behavior and the activities that can be commanded) and
//! a plan of activity directives, and simulates how the spacecraft's state evolves over a time
//! window. The results are the profiles of every registered resource, every activity that ran
//! (with its timing and parent/child structure), and a log of every event that was committed.
//!
//! Two things set it apart from a plain event loop. First, it is deterministic down to the
//! structure of its event log: the same model, plan and configuration always produce equal
//! results, regardless of the order tasks happened to run in. Second, it avoids repeated work
//! when a plan is edited. It can either resume from a saved engine that ran the unchanged
//! prefix of the plan, or replay every task whose inputs haven't changed and only execute the
//! rest.
//!
//! ## Concepts
//!
//! ### Cells, Topics & Events
//!
//! All simulated state lives in cells. A cell is never written directly; tasks emit events on
//! topics, and each cell projects the events on its topic into effects of its own type. Effects
//! form a small algebra: they can be composed sequentially or concurrently, and the cell type
//! decides what concurrent effects mean. A [counter][cell::Counter] adds them up. A
//! [register][cell::Register] can't reconcile two different concurrent writes, so it keeps its
//! old value and marks itself conflicted. Cells can also evolve on their own between events,
//! like a [linear][cell::Linear] value with a rate, and report when their state will next change
//! by itself.
//!
//! ### Tasks & Instants
//!
//! Behavior is written as [tasks][task::Task]: resumable steps that read cells, emit events and
//! then yield. A task can delay, wait on a [condition][task::Condition], or spawn and call other
//! tasks. Time advances in instants, and everything that happens in one batch of an instant is
//! committed to the timeline as a single event graph, so tasks in the same batch never see each
//! other's writes. A child task does see what its parent emitted before starting it.
//!
//! Continuations are ordinary cloneable closures. That is what lets the engine copy itself
//! in the middle of a simulation.
//!
//! ### Directives & Anchors
//!
//! A plan is a set of [directives][directive::ActivityDirective], each with an offset from an
//! anchor: the plan's start or end, or the start or end of another directive. Anchors are
//! resolved by the [StartOffsetReducer][anchor::StartOffsetReducer] before simulation.
//! Start-anchored chains collapse into fixed offsets. End-anchored directives are started by the
//! engine once their target has finished. Directives that would start before the simulation are
//! dropped along with everything anchored to them.
//!
//! ### Incremental Simulation & Checkpoints
//!
//! The [incremental driver][incremental::IncrementalSimulationDriver] records every step of every
//! task, along with fingerprints of what it read. When the plan changes, steps whose reads still
//! fingerprint the same are replayed from the record instead of executed. Edited directives lose
//! their records entirely.
//!
//! The [checkpoint driver][checkpoint::simulate_with_checkpoints] saves copies of the engine at
//! chosen times. A later run of an edited plan picks the furthest saved engine that stopped before
//! the earliest edit, and resumes from there.
//!
//! ## Quick-start
//!
//! Declare a model by implementing [ModelType][model::ModelType]:
//!
//! ```ignore
//! use kestrel::*;
//! use kestrel::cell::{Counter, ReadCellsExt};
//! use kestrel::task::{Scheduler, SchedulerExt, TaskStatus};
//!
//! struct Rover;
//!
//! impl ModelType for Rover {
//!     type Config = ();
//!
//!     fn instantiate(&self, _: Time, _: (), init: &mut Initializer) -> Result<()> {
//!         let (sols, sol_topic) = init.allocate("sols", Counter::<u32>::new(), 1000);
//!         init.activity("IncrementSol", move |_: ()| {
//!             kestrel::task::task(move |s: &mut dyn Scheduler| {
//!                 s.emit(1, sol_topic);
//!                 TaskStatus::completed()
//!             })
//!         });
//!         init.discrete_resource("sols", move |q| q.get(sols));
//!         Ok(())
//!     }
//! }
//! ```
//!
//! Then build it and simulate a plan:
//!
//! ```ignore
//! let start = Time::from_gregorian_utc_at_midnight(2030, 1, 1);
//! let model = build_model(&Rover, start, &serde_json::Value::Null)?;
//! let increment = ActivityDirective::new(Duration::HOUR, "IncrementSol", json!(null));
//! let plan: Schedule = [(ActivityDirectiveId::new(1), increment)].into();
//! let window = SimulationWindow::whole_plan(start, Duration::DAY);
//! let results = simulate(&model, &plan, &window, &|| false)?;
//! ```
//!
//! ## Timekeeping
//!
//! Absolute times are hifitime [Epoch][Time]s, renamed here to [Time]. Everything inside a
//! simulation is a [Duration] from the simulation start, a signed count of microseconds that
//! saturates instead of overflowing.
//!
//! ## Restrictions
//!
//! - **Hidden state;** tasks must not keep state outside of cells and their own continuations.
//!   Replaying a task assumes that the same reads produce the same behavior.
//! - **Non-determinism;** tasks must not depend on wall-clock time, randomness or thread
//!   scheduling. The engine itself is single-threaded.

pub mod anchor;
pub mod cell;
pub mod checkpoint;
pub mod directive;
pub mod driver;
pub mod duration;
pub mod engine;
pub mod error;
pub mod event_graph;
#[doc(hidden)]
pub mod fingerprint;
pub mod incremental;
pub mod model;
pub mod results;
pub mod task;
pub mod timeline;

pub use anyhow::{Context, Error, Result, anyhow, bail};
pub use checkpoint::{
    CachedEngineStore, CachedSimulationEngine, InMemoryCachedEngineStore,
    SimulationEngineConfiguration, simulate_with_checkpoints,
};
pub use directive::{ActivityDirective, ActivityDirectiveId, AnchorPoint, Schedule};
pub use driver::{SimulationWindow, simulate};
pub use duration::Duration;
pub use engine::SimulationEngine;
pub use error::{AnchorError, InstantiationError, SimulationError, TaskFault};
pub use hifitime::Epoch as Time;
pub use incremental::IncrementalSimulationDriver;
pub use model::{Initializer, MissionModel, ModelType, build_model};
pub use results::SimulationResults;
