//! What a simulation produces: resource profiles, simulated activities, the event log and any
//! faults.

use crate::Time;
use crate::cell::{LinearState, TopicIndex};
use crate::directive::ActivityDirectiveId;
use crate::duration::Duration;
use crate::engine::{Dynamics, SimulationEngine};
use crate::error::{InstantiationError, TaskFault};
use crate::event_graph::EventGraph;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

/// A value changing linearly from `initial`, at `rate` per second.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub struct RealDynamics {
    pub initial: f64,
    pub rate: f64,
}

impl RealDynamics {
    pub fn constant(value: f64) -> Self {
        Self {
            initial: value,
            rate: 0.0,
        }
    }

    pub fn linear(initial: f64, rate: f64) -> Self {
        Self { initial, rate }
    }

    pub fn value_at(&self, elapsed: Duration) -> f64 {
        self.initial + self.rate * elapsed.as_seconds_f64()
    }
}

impl From<LinearState> for RealDynamics {
    fn from(state: LinearState) -> Self {
        Self::linear(state.value, state.rate)
    }
}

/// One piece of a profile: `dynamics` holds for `extent`, starting where the previous segment
/// ended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileSegment<D> {
    pub extent: Duration,
    pub dynamics: D,
}

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityInstanceId(pub u64);

impl Display for ActivityInstanceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulatedActivity {
    pub activity_type: String,
    pub arguments: serde_json::Value,
    #[serde(serialize_with = "serialize_time")]
    pub start: Time,
    pub duration: Duration,
    pub parent: Option<ActivityInstanceId>,
    pub children: Vec<ActivityInstanceId>,
    pub directive_id: Option<ActivityDirectiveId>,
    pub computed_attributes: serde_json::Value,
}

/// An activity that had not finished when the simulation stopped.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UnfinishedActivity {
    pub activity_type: String,
    pub arguments: serde_json::Value,
    #[serde(serialize_with = "serialize_time")]
    pub start: Time,
    pub parent: Option<ActivityInstanceId>,
    pub children: Vec<ActivityInstanceId>,
    pub directive_id: Option<ActivityDirectiveId>,
}

/// An event in the log, with its value rendered by its topic's serializer.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SerializedEvent {
    pub topic: TopicIndex,
    pub value: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TopicDescription {
    pub index: TopicIndex,
    pub name: String,
    pub schema: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationResults {
    #[serde(serialize_with = "serialize_time")]
    pub start_time: Time,
    pub duration: Duration,
    pub real_profiles: BTreeMap<String, Vec<ProfileSegment<RealDynamics>>>,
    pub discrete_profiles: BTreeMap<String, Vec<ProfileSegment<serde_json::Value>>>,
    pub simulated_activities: BTreeMap<ActivityInstanceId, SimulatedActivity>,
    pub unfinished_activities: BTreeMap<ActivityInstanceId, UnfinishedActivity>,
    pub topics: Vec<TopicDescription>,
    /// Committed events per instant, one graph per batch, in canonical form.
    pub events: BTreeMap<Duration, Vec<EventGraph<SerializedEvent>>>,
    pub faults: Vec<TaskFault>,
    pub instantiation_errors: Vec<InstantiationError>,
}

fn serialize_time<S: Serializer>(time: &Time, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(time)
}

impl SimulationResults {
    /// The activity simulated for a directive, if it finished.
    pub fn activity_for(&self, directive: ActivityDirectiveId) -> Option<&SimulatedActivity> {
        self.simulated_activities
            .get(&ActivityInstanceId(directive.0))
            .filter(|a| a.directive_id == Some(directive))
    }

    /// Activities of a type, in instance id order.
    pub fn activities_of_type<'a>(
        &'a self,
        activity_type: &'a str,
    ) -> impl Iterator<Item = &'a SimulatedActivity> {
        self.simulated_activities
            .values()
            .filter(move |a| a.activity_type == activity_type)
    }
}

impl SimulationEngine {
    /// Builds results from everything simulated so far. `start_time` is the absolute time of
    /// the engine's time zero.
    pub fn compute_results(&self, start_time: Time) -> SimulationResults {
        let elapsed = self.elapsed_time();
        let model = &self.model;

        let mut real_profiles = BTreeMap::new();
        let mut discrete_profiles = BTreeMap::new();
        for (resource, samples) in model.resources.iter().zip(&self.profiles) {
            let mut real = vec![];
            let mut discrete = vec![];
            for (i, (time, dynamics)) in samples.iter().enumerate() {
                let end = samples.get(i + 1).map_or(elapsed, |(next, _)| *next);
                let extent = end - *time;
                if !extent.is_positive() {
                    continue;
                }
                match dynamics {
                    Dynamics::Real(d) => real.push(ProfileSegment {
                        extent,
                        dynamics: *d,
                    }),
                    Dynamics::Discrete(d) => discrete.push(ProfileSegment {
                        extent,
                        dynamics: d.clone(),
                    }),
                }
            }
            match resource.getter {
                crate::model::ResourceGetter::Real(_) => {
                    real_profiles.insert(resource.name.clone(), real);
                }
                crate::model::ResourceGetter::Discrete(_) => {
                    discrete_profiles.insert(resource.name.clone(), discrete);
                }
            }
        }

        // Directive activities keep their directive's id; the rest count up around them in
        // order of start, then of the task that opened them, so ids don't depend on how the
        // engine happened to number its spans.
        let mut activity_spans: Vec<_> = self
            .spans
            .iter()
            .filter(|(_, s)| s.activity.is_some())
            .collect();
        activity_spans.sort_by(|(_, a), (_, b)| (a.start, &a.origin).cmp(&(b.start, &b.origin)));
        let taken: BTreeSet<u64> = activity_spans
            .iter()
            .filter_map(|(_, s)| s.directive.map(|d| d.0))
            .collect();
        let mut next = 0u64;
        let mut instance_ids = BTreeMap::new();
        for (span_id, span) in &activity_spans {
            let id = match span.directive {
                Some(directive) => directive.0,
                None => {
                    while taken.contains(&next) {
                        next += 1;
                    }
                    next += 1;
                    next - 1
                }
            };
            instance_ids.insert(*span_id, ActivityInstanceId(id));
        }

        let mut children: BTreeMap<ActivityInstanceId, Vec<ActivityInstanceId>> = BTreeMap::new();
        let mut parents = BTreeMap::new();
        for (span_id, _) in &activity_spans {
            let parent = self
                .spans
                .parent_activity(*span_id)
                .and_then(|p| instance_ids.get(&p).copied());
            if let Some(parent) = parent {
                children
                    .entry(parent)
                    .or_default()
                    .push(instance_ids[span_id]);
            }
            parents.insert(*span_id, parent);
        }
        for kids in children.values_mut() {
            kids.sort();
        }

        let mut simulated_activities = BTreeMap::new();
        let mut unfinished_activities = BTreeMap::new();
        for (span_id, span) in &activity_spans {
            let Some(activity) = &span.activity else { continue };
            let id = instance_ids[span_id];
            let start = start_time + span.start.to_hifitime();
            let kids = children.get(&id).cloned().unwrap_or_default();
            match span.end {
                Some(end) => {
                    simulated_activities.insert(
                        id,
                        SimulatedActivity {
                            activity_type: activity.activity_type.clone(),
                            arguments: activity.arguments.clone(),
                            start,
                            duration: end - span.start,
                            parent: parents[span_id],
                            children: kids,
                            directive_id: span.directive,
                            computed_attributes: activity
                                .output
                                .clone()
                                .unwrap_or(serde_json::Value::Null),
                        },
                    );
                }
                None => {
                    unfinished_activities.insert(
                        id,
                        UnfinishedActivity {
                            activity_type: activity.activity_type.clone(),
                            arguments: activity.arguments.clone(),
                            start,
                            parent: parents[span_id],
                            children: kids,
                            directive_id: span.directive,
                        },
                    );
                }
            }
        }

        let events = self
            .timeline
            .by_time()
            .into_iter()
            .map(|(time, graphs)| {
                let graphs = graphs
                    .iter()
                    .map(|graph| {
                        graph
                            .rebalance(&|e| e.canonical_key())
                            .map(&|e| SerializedEvent {
                                topic: e.topic(),
                                value: model.event_json(e),
                            })
                    })
                    .collect();
                (time, graphs)
            })
            .collect();

        SimulationResults {
            start_time,
            duration: elapsed,
            real_profiles,
            discrete_profiles,
            simulated_activities,
            unfinished_activities,
            topics: model
                .topics()
                .into_iter()
                .map(|(index, name, schema)| TopicDescription {
                    index,
                    name,
                    schema,
                })
                .collect(),
            events,
            faults: self.faults.clone(),
            instantiation_errors: vec![],
        }
    }
}
