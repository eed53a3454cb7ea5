//! Turning a plan into root tasks, and running them to a horizon.

use crate::Time;
use crate::anchor::{
    AnchorMap, StartOffsetReducer, adjust_start_offset, filter_out_negative_start_offset,
};
use crate::directive::{ActivityDirectiveId, Schedule};
use crate::duration::Duration;
use crate::engine::SimulationEngine;
use crate::error::{AnchorError, InstantiationError, SimulationError};
use crate::model::MissionModel;
use crate::results::SimulationResults;
use crate::task::{InSpan, Scheduler, Task, TaskRoot, TaskStatus};
use anyhow::Result;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a plan sits in absolute time, and which part of it to simulate.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SimulationWindow {
    pub plan_start: Time,
    pub plan_duration: Duration,
    pub simulation_start: Time,
    pub simulation_duration: Duration,
}

impl SimulationWindow {
    /// Simulates the whole plan.
    pub fn whole_plan(plan_start: Time, plan_duration: Duration) -> Self {
        Self {
            plan_start,
            plan_duration,
            simulation_start: plan_start,
            simulation_duration: plan_duration,
        }
    }

    /// How far into the plan the simulation starts.
    pub fn start_offset(&self) -> Duration {
        Duration::from_hifitime(self.simulation_start - self.plan_start)
    }
}

#[derive(Clone, Copy)]
enum WrapperPhase {
    Wait,
    Start,
    Finish,
}

/// The root task of a directive.
///
/// Waits out its offset, runs the directive's activity in a fresh span, then starts every
/// directive anchored to the activity's end.
pub(crate) struct DirectiveWrapper {
    id: ActivityDirectiveId,
    delay: Duration,
    activity: Option<Box<dyn Task>>,
    dependents: Vec<DirectiveWrapper>,
    phase: WrapperPhase,
}

impl DirectiveWrapper {
    fn duplicate_wrapper(&self) -> Self {
        Self {
            id: self.id,
            delay: self.delay,
            activity: self.activity.as_ref().map(|a| a.duplicate()),
            dependents: self
                .dependents
                .iter()
                .map(|d| d.duplicate_wrapper())
                .collect(),
            phase: self.phase,
        }
    }

    fn in_phase(mut self: Box<Self>, phase: WrapperPhase) -> Box<Self> {
        self.phase = phase;
        self
    }
}

impl Task for DirectiveWrapper {
    fn step(mut self: Box<Self>, scheduler: &mut dyn Scheduler) -> Result<TaskStatus> {
        let phase = self.phase;
        match phase {
            WrapperPhase::Wait if !self.delay.is_zero() => {
                let delay = self.delay;
                Ok(TaskStatus::Delayed(delay, self.in_phase(WrapperPhase::Start)))
            }
            WrapperPhase::Wait | WrapperPhase::Start => {
                let activity = DirectiveActivity {
                    id: self.id,
                    activity: self.activity.take(),
                };
                Ok(TaskStatus::CallingTask(
                    InSpan::Fresh,
                    Box::new(activity),
                    self.in_phase(WrapperPhase::Finish),
                ))
            }
            WrapperPhase::Finish => {
                for dependent in std::mem::take(&mut self.dependents) {
                    scheduler.spawn_task(InSpan::Parent, Box::new(dependent));
                }
                TaskStatus::completed()
            }
        }
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(self.duplicate_wrapper())
    }

    fn root(&self) -> Option<TaskRoot> {
        Some(TaskRoot::Directive(self.id))
    }
}

/// Tags its span with the directive, then becomes the activity.
struct DirectiveActivity {
    id: ActivityDirectiveId,
    activity: Option<Box<dyn Task>>,
}

impl Task for DirectiveActivity {
    fn step(self: Box<Self>, scheduler: &mut dyn Scheduler) -> Result<TaskStatus> {
        scheduler.start_directive(self.id);
        match self.activity {
            Some(activity) => activity.step(scheduler),
            None => TaskStatus::completed(),
        }
    }

    fn duplicate(&self) -> Box<dyn Task> {
        Box::new(DirectiveActivity {
            id: self.id,
            activity: self.activity.as_ref().map(|a| a.duplicate()),
        })
    }
}

/// A plan resolved into root tasks, ready to be scheduled on an engine.
pub(crate) struct PreparedPlan {
    /// Plan-anchored directives with their start times relative to the simulation start.
    pub roots: Vec<(Duration, DirectiveWrapper)>,
    pub errors: Vec<InstantiationError>,
}

impl PreparedPlan {
    pub fn new(
        model: &MissionModel,
        schedule: &Schedule,
        window: &SimulationWindow,
    ) -> Result<Self> {
        let anchors = resolve_anchors(schedule, window)?;
        let pruned = schedule.len() - anchors.values().map(Vec::len).sum::<usize>();
        if pruned > 0 {
            debug!(pruned, "dropped directives starting before the simulation");
        }

        let mut errors = vec![];
        let mut roots = vec![];
        for (id, offset) in anchors.get(&None).into_iter().flatten() {
            if let Some(wrapper) =
                wrap(model, schedule, &anchors, *id, Duration::ZERO, &mut errors)
            {
                roots.push((*offset, wrapper));
            }
        }
        for error in &errors {
            warn!("{error}");
        }
        Ok(Self { roots, errors })
    }

    /// Schedules every root whose start is at or after `from`. Earlier roots are dropped, as
    /// they already ran in whatever engine is being resumed.
    pub fn schedule_into(
        self,
        engine: &mut SimulationEngine,
        from: Duration,
    ) -> Result<Vec<InstantiationError>> {
        for (offset, wrapper) in self.roots {
            if offset >= from {
                engine.schedule_root(Box::new(wrapper), offset)?;
            }
        }
        Ok(self.errors)
    }
}

/// Resolves anchors, shifts plan-anchored offsets to be relative to the simulation start, and
/// drops whatever would start before it.
pub(crate) fn resolve_anchors(
    schedule: &Schedule,
    window: &SimulationWindow,
) -> Result<AnchorMap, AnchorError> {
    let mut anchors = StartOffsetReducer::new(window.plan_duration, schedule).compute()?;
    if let Some(plan_anchored) = anchors.get_mut(&None) {
        *plan_anchored = adjust_start_offset(plan_anchored, window.start_offset());
    }
    filter_out_negative_start_offset(&anchors)
}

fn wrap(
    model: &MissionModel,
    schedule: &Schedule,
    anchors: &AnchorMap,
    id: ActivityDirectiveId,
    delay: Duration,
    errors: &mut Vec<InstantiationError>,
) -> Option<DirectiveWrapper> {
    let directive = schedule.get(&id)?;
    let activity = match model.directive_type(&directive.activity_type) {
        Some(directive_type) => directive_type.instantiate(&directive.arguments),
        None => Err(SimulationError::UnknownDirectiveType {
            activity_type: directive.activity_type.clone(),
        }
        .into()),
    };
    let activity = match activity {
        Ok(activity) => activity,
        Err(e) => {
            errors.push(InstantiationError {
                directive: id,
                activity_type: directive.activity_type.clone(),
                message: format!("{e:#}"),
            });
            return None;
        }
    };
    let dependents = anchors
        .get(&Some(id))
        .into_iter()
        .flatten()
        .filter_map(|(dependent, offset)| {
            wrap(model, schedule, anchors, *dependent, *offset, errors)
        })
        .collect();
    Some(DirectiveWrapper {
        id,
        delay,
        activity: Some(activity),
        dependents,
        phase: WrapperPhase::Wait,
    })
}

/// Simulates a plan from scratch.
///
/// `cancel` is polled between instants. A cancelled run still returns results, up to the
/// last instant simulated.
pub fn simulate(
    model: &Arc<MissionModel>,
    schedule: &Schedule,
    window: &SimulationWindow,
    cancel: &dyn Fn() -> bool,
) -> Result<SimulationResults> {
    let plan = PreparedPlan::new(model, schedule, window)?;
    let mut engine = SimulationEngine::new(model.clone());
    let errors = plan.schedule_into(&mut engine, Duration::ZERO)?;
    let finished = engine.run_until(window.simulation_duration, cancel)?;
    info!(
        directives = schedule.len(),
        finished,
        elapsed = %engine.elapsed_time(),
        "simulation complete"
    );
    let mut results = engine.compute_results(window.simulation_start);
    results.instantiation_errors = errors;
    Ok(results)
}
