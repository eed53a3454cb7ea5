//! Re-simulating an edited plan without re-running tasks whose inputs did not change.
//!
//! Every step of every traced task is recorded along with a fingerprint of each cell it read,
//! as seen at the moment of the read. On the next run, a task whose next recorded step is at
//! the same time, and whose reads would all produce the same fingerprints, has the step's
//! effects replayed instead of being run. Once a task diverges it runs live for the rest of
//! the simulation, and so does everything it starts afterwards.
//!
//! Directives that were added, removed or edited lose their traces entirely.

pub mod trace;

use crate::directive::{ActivityDirectiveId, Schedule, ScheduleDiff};
use crate::driver::{PreparedPlan, SimulationWindow};
use crate::duration::Duration;
use crate::engine::SimulationEngine;
use crate::model::MissionModel;
use crate::results::SimulationResults;
use crate::task::TaskRoot;
use anyhow::Result;
use std::sync::Arc;
use trace::TraceStore;
use tracing::{debug, info};

pub struct IncrementalSimulationDriver {
    model: Arc<MissionModel>,
    window: SimulationWindow,
    previous: Option<(Schedule, TraceStore)>,
}

impl IncrementalSimulationDriver {
    pub fn new(model: Arc<MissionModel>, window: SimulationWindow) -> Self {
        Self {
            model,
            window,
            previous: None,
        }
    }

    pub fn simulate(&mut self, schedule: &Schedule) -> Result<SimulationResults> {
        self.simulate_with_cancel(schedule, &|| false)
    }

    /// Simulates `schedule`, reusing whatever the last run recorded.
    ///
    /// A cancelled run still records traces up to where it stopped.
    pub fn simulate_with_cancel(
        &mut self,
        schedule: &Schedule,
        cancel: &dyn Fn() -> bool,
    ) -> Result<SimulationResults> {
        let plan = PreparedPlan::new(&self.model, schedule, &self.window)?;

        let traces = match self.previous.take() {
            Some((old, mut traces)) => {
                let diff = ScheduleDiff::between(&old, schedule);
                for id in diff.changed() {
                    traces.invalidate(TaskRoot::Directive(id));
                }
                debug!(
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    modified = diff.modified.len(),
                    "reusing traces"
                );
                traces
            }
            None => TraceStore::default(),
        };

        let mut engine = SimulationEngine::new(self.model.clone()).with_traces(traces);
        let errors = plan.schedule_into(&mut engine, Duration::ZERO)?;
        let finished = engine.run_until(self.window.simulation_duration, cancel)?;

        let mut results = engine.compute_results(self.window.simulation_start);
        results.instantiation_errors = errors;
        let traces = engine.take_traces().unwrap_or_default();
        info!(
            directives = schedule.len(),
            finished,
            traced_tasks = traces.len(),
            "incremental simulation complete"
        );
        self.previous = Some((schedule.clone(), traces));
        Ok(results)
    }

    /// How many steps under a directive actually ran in the last simulation.
    pub fn executions(&self, directive: ActivityDirectiveId) -> usize {
        self.last_run()
            .map_or(0, |t| t.executions(TaskRoot::Directive(directive)))
    }

    /// How many steps of a daemon actually ran in the last simulation. Daemons are numbered
    /// in the order the model registered them.
    pub fn daemon_executions(&self, daemon: u32) -> usize {
        self.last_run()
            .map_or(0, |t| t.executions(TaskRoot::Daemon(daemon)))
    }

    pub fn last_run(&self) -> Option<&TraceStore> {
        self.previous.as_ref().map(|(_, traces)| traces)
    }

    /// Forgets every trace, so the next run executes everything.
    pub fn clear(&mut self) {
        self.previous = None;
    }
}
