//! Simulating from saved engines.
//!
//! A [CachedSimulationEngine] is a frozen engine together with the plan it was simulating and
//! the time it stopped at. When the plan changes, any cached engine that stopped before the
//! earliest point the change could have an effect can be resumed instead of starting over:
//! directives that already started in it are left alone, and the rest of the new plan is
//! scheduled on top.

use crate::Time;
use crate::anchor::{AnchorMap, minimum_start_times};
use crate::directive::{ActivityDirectiveId, Schedule, ScheduleDiff};
use crate::driver::{PreparedPlan, SimulationWindow, resolve_anchors};
use crate::duration::Duration;
use crate::engine::SimulationEngine;
use crate::error::{InstantiationError, SimulationError};
use crate::fingerprint;
use crate::model::MissionModel;
use crate::results::SimulationResults;
use anyhow::Result;
use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, info};

/// An engine saved at `ends_at`, while simulating `directives`.
pub struct CachedSimulationEngine {
    pub ends_at: Duration,
    pub directives: Schedule,
    pub window: Option<SimulationWindow>,
    engine: Mutex<SimulationEngine>,
}

impl CachedSimulationEngine {
    pub fn new(
        ends_at: Duration,
        directives: Schedule,
        window: SimulationWindow,
        engine: SimulationEngine,
    ) -> Self {
        Self {
            ends_at,
            directives,
            window: Some(window),
            engine: Mutex::new(engine),
        }
    }

    /// A fresh engine that hasn't simulated anything, usable with any plan.
    pub fn empty(model: Arc<MissionModel>) -> Self {
        Self {
            ends_at: Duration::MIN,
            directives: Schedule::new(),
            window: None,
            engine: Mutex::new(SimulationEngine::new(model)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ends_at == Duration::MIN
    }

    pub fn engine(&self) -> MutexGuard<'_, SimulationEngine> {
        self.engine.lock()
    }
}

/// Identifies engines that are interchangeable: same model, same configuration, same start.
#[derive(Clone, Debug, PartialEq)]
pub struct SimulationEngineConfiguration {
    pub simulation_configuration: serde_json::Value,
    pub simulation_start_time: Time,
    pub mission_model_id: String,
}

impl SimulationEngineConfiguration {
    /// A stable key for stores that index engines by configuration.
    pub fn fingerprint(&self) -> u64 {
        fingerprint::of_serialized(&(
            &self.simulation_configuration,
            self.simulation_start_time.to_string(),
            &self.mission_model_id,
        ))
    }
}

pub trait CachedEngineStore: Send + Sync {
    fn save(&self, engine: CachedSimulationEngine, configuration: &SimulationEngineConfiguration);

    /// Every engine saved under `configuration`, most recently used last.
    fn get_cached_engines(
        &self,
        configuration: &SimulationEngineConfiguration,
    ) -> Vec<Arc<CachedSimulationEngine>>;

    /// How many engines the store keeps. With one or fewer, a run saves only its final engine
    /// instead of copying it at every checkpoint.
    fn capacity(&self) -> usize;
}

/// Keeps the most recently used engines in memory.
pub struct InMemoryCachedEngineStore {
    capacity: usize,
    entries: Mutex<VecDeque<(u64, Arc<CachedSimulationEngine>)>>,
}

impl InMemoryCachedEngineStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl CachedEngineStore for InMemoryCachedEngineStore {
    fn save(&self, engine: CachedSimulationEngine, configuration: &SimulationEngineConfiguration) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.lock();
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        debug!(ends_at = %engine.ends_at, "saved engine");
        entries.push_back((configuration.fingerprint(), Arc::new(engine)));
    }

    fn get_cached_engines(
        &self,
        configuration: &SimulationEngineConfiguration,
    ) -> Vec<Arc<CachedSimulationEngine>> {
        let key = configuration.fingerprint();
        let mut entries = self.entries.lock();
        let (mut hits, misses): (VecDeque<_>, VecDeque<_>) =
            entries.drain(..).partition(|(k, _)| *k == key);
        let result = hits.iter().map(|(_, e)| e.clone()).collect();
        *entries = misses;
        entries.append(&mut hits);
        result
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Where a run is when the checkpoint and stop predicates are consulted.
pub struct SimulationState<'a> {
    /// Time of the last instant simulated.
    pub current_time: Duration,
    /// Time of the next instant, or [Duration::MAX] if nothing is scheduled.
    pub next_time: Duration,
    pub engine: &'a SimulationEngine,
    pub schedule: &'a Schedule,
}

/// Checkpoints once the run has passed each of `times`, before anything later happens.
pub fn desired_checkpoints(mut times: Vec<Duration>) -> impl Fn(&SimulationState) -> bool {
    times.sort();
    move |state| {
        times
            .iter()
            .any(|t| state.current_time <= *t && *t < state.next_time)
    }
}

/// Also checkpoints when nothing is left to simulate.
pub fn checkpoint_at_end(
    inner: impl Fn(&SimulationState) -> bool,
) -> impl Fn(&SimulationState) -> bool {
    move |state| state.next_time == Duration::MAX || inner(state)
}

pub fn no_condition() -> impl Fn(&SimulationState) -> bool {
    |_| false
}

/// Stops once the activity of every directive in the plan has finished.
pub fn once_all_activities_are_finished() -> impl Fn(&SimulationState) -> bool {
    |state| {
        state
            .schedule
            .keys()
            .all(|id| state.engine.directive_finished(*id))
    }
}

pub fn stop_once_activity_has_finished(
    directive: ActivityDirectiveId,
) -> impl Fn(&SimulationState) -> bool {
    move |state| state.engine.directive_finished(directive)
}

/// Earliest simulation time at which a directive could affect anything, counting from when
/// its end-anchored chain is first scheduled.
fn effect_times(anchors: &AnchorMap) -> BTreeMap<ActivityDirectiveId, Duration> {
    let starts = minimum_start_times(anchors);
    let mut effects = BTreeMap::new();
    for (root, offset) in anchors.get(&None).into_iter().flatten() {
        let mut frontier = vec![*root];
        while let Some(id) = frontier.pop() {
            let start = starts.get(&id).copied().unwrap_or(*offset);
            effects.insert(id, start.min(*offset));
            let dependents = anchors.get(&Some(id)).into_iter().flatten();
            frontier.extend(dependents.map(|(d, _)| *d));
        }
    }
    effects
}

/// The earliest time at which `schedule` stops agreeing with what `cached` simulated, or
/// `None` if the two agree everywhere.
fn invalidation_time(
    cached: &CachedSimulationEngine,
    schedule: &Schedule,
    new_effects: &BTreeMap<ActivityDirectiveId, Duration>,
    window: &SimulationWindow,
) -> Option<Duration> {
    let Ok(old_anchors) = resolve_anchors(&cached.directives, window) else {
        return Some(Duration::MIN);
    };
    let old_effects = effect_times(&old_anchors);
    let diff = ScheduleDiff::between(&cached.directives, schedule);
    // Pruned directives never ran, so edits to them only matter if they now run.
    diff.changed()
        .filter_map(|id| {
            let old = old_effects.get(&id).copied();
            let new = new_effects.get(&id).copied();
            match (old, new) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            }
        })
        .min()
}

/// Picks the engine that got furthest without passing the first change between its plan and
/// `schedule`.
pub fn best_cached_engine(
    schedule: &Schedule,
    cached_engines: &[Arc<CachedSimulationEngine>],
    window: &SimulationWindow,
) -> Result<Option<Arc<CachedSimulationEngine>>> {
    let new_effects = effect_times(&resolve_anchors(schedule, window)?);
    let mut best: Option<&Arc<CachedSimulationEngine>> = None;
    for cached in cached_engines {
        if cached.is_empty() || !same_plan_window(cached, window) {
            continue;
        }
        let usable = match invalidation_time(cached, schedule, &new_effects, window) {
            Some(invalidated) => cached.ends_at < invalidated,
            None => true,
        };
        if usable && best.is_none_or(|b| b.ends_at < cached.ends_at) {
            best = Some(cached);
        }
    }
    if let Some(best) = best {
        debug!(ends_at = %best.ends_at, "resuming from cached engine");
    }
    Ok(best.cloned())
}

/// Only the simulated duration may differ between runs that share an engine.
fn same_plan_window(cached: &CachedSimulationEngine, window: &SimulationWindow) -> bool {
    cached.window.is_some_and(|w| {
        w.plan_start == window.plan_start
            && w.plan_duration == window.plan_duration
            && w.simulation_start == window.simulation_start
    })
}

/// A finished checkpointed run.
pub struct CheckpointRun {
    pub engine: SimulationEngine,
    pub simulation_start: Time,
    pub instantiation_errors: Vec<InstantiationError>,
    /// Whether the run was resumed from a saved engine.
    pub resumed_from: Option<Duration>,
}

impl CheckpointRun {
    pub fn compute_results(&self) -> SimulationResults {
        let mut results = self.engine.compute_results(self.simulation_start);
        results.instantiation_errors = self.instantiation_errors.clone();
        results
    }
}

/// Simulates `schedule`, starting from `cached`.
///
/// Checkpoints are saved to `store` whenever `should_take_checkpoint` holds between two
/// instants. The run stops at the window's end, when `stop_condition` holds, or when `cancel`
/// returns true. If the store keeps only one engine, the final engine is saved instead.
#[allow(clippy::too_many_arguments)]
pub fn simulate_with_checkpoints(
    model: &Arc<MissionModel>,
    schedule: &Schedule,
    window: &SimulationWindow,
    cached: &CachedSimulationEngine,
    should_take_checkpoint: &dyn Fn(&SimulationState) -> bool,
    stop_condition: &dyn Fn(&SimulationState) -> bool,
    store: &dyn CachedEngineStore,
    configuration: &SimulationEngineConfiguration,
    cancel: &dyn Fn() -> bool,
) -> Result<CheckpointRun> {
    if !cached.is_empty() && !same_plan_window(cached, window) {
        return Err(SimulationError::IncompatibleCheckpoint {
            ends_at: cached.ends_at,
            start: window.start_offset(),
        }
        .into());
    }
    let duplication_is_ok = store.capacity() > 1;
    let mut engine = cached.engine().duplicate();
    let resumed_from = (!cached.is_empty()).then_some(cached.ends_at);
    if let Some(ends_at) = resumed_from {
        engine.unschedule_directives_after(ends_at);
    }

    let plan = PreparedPlan::new(model, schedule, window)?;
    let from = cached
        .ends_at
        .saturating_add(Duration::EPSILON)
        .max(Duration::ZERO);
    let instantiation_errors = plan.schedule_into(&mut engine, from)?;

    let horizon = window.simulation_duration;
    let save = |engine: &SimulationEngine, ends_at: Duration| {
        store.save(
            CachedSimulationEngine::new(ends_at, schedule.clone(), *window, engine.duplicate()),
            configuration,
        );
    };
    let mut last_saved = None;
    let mut finished = false;
    loop {
        if cancel() {
            debug!(elapsed = %engine.elapsed_time(), "checkpointed simulation cancelled");
            break;
        }
        let state = SimulationState {
            current_time: engine.elapsed_time(),
            next_time: engine
                .next_job_time()
                .filter(|t| *t <= horizon)
                .unwrap_or(Duration::MAX),
            engine: &engine,
            schedule,
        };
        if duplication_is_ok && should_take_checkpoint(&state) {
            save(&engine, state.current_time);
            last_saved = Some(state.current_time);
        }
        if stop_condition(&state) {
            break;
        }
        if engine.step(horizon)?.is_none() {
            finished = true;
            break;
        }
    }

    if finished {
        engine.run_until(horizon, &|| false)?;
        let state = SimulationState {
            current_time: engine.elapsed_time(),
            next_time: Duration::MAX,
            engine: &engine,
            schedule,
        };
        if duplication_is_ok
            && last_saved != Some(state.current_time)
            && should_take_checkpoint(&state)
        {
            save(&engine, state.current_time);
        }
    }
    if !duplication_is_ok {
        save(&engine, engine.elapsed_time());
    }

    info!(
        directives = schedule.len(),
        resumed_from = ?resumed_from,
        elapsed = %engine.elapsed_time(),
        "checkpointed simulation complete"
    );
    Ok(CheckpointRun {
        engine,
        simulation_start: window.simulation_start,
        instantiation_errors,
        resumed_from,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn configuration(restock: bool) -> SimulationEngineConfiguration {
        SimulationEngineConfiguration {
            simulation_configuration: json!({"restock": restock}),
            simulation_start_time: Time::from_gregorian_utc_at_midnight(2030, 1, 1),
            mission_model_id: "model".to_string(),
        }
    }

    #[test]
    fn configuration_fingerprint_follows_contents() {
        assert_eq!(
            configuration(true).fingerprint(),
            configuration(true).fingerprint()
        );
        assert_ne!(
            configuration(true).fingerprint(),
            configuration(false).fingerprint()
        );

        let mut later = configuration(true);
        later.simulation_start_time = Time::from_gregorian_utc_at_midnight(2030, 1, 2);
        assert_ne!(configuration(true).fingerprint(), later.fingerprint());
    }
}
