#![allow(dead_code)]

use kestrel::cell::{
    Counter, Linear, LinearEffect, LinearState, ReadCellsExt, Register, RegisterEffect,
    RegisterState,
};
use kestrel::results::RealDynamics;
use kestrel::task::{Condition, Scheduler, SchedulerExt, TaskStatus, task};
use kestrel::*;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn start() -> Time {
    Time::from_gregorian_utc_at_midnight(2030, 1, 1)
}

#[derive(Deserialize)]
#[serde(default)]
pub struct TestbedConfig {
    pub initial_register: i64,
}

impl Default for TestbedConfig {
    fn default() -> Self {
        Self {
            initial_register: 1,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SetRegister {
    pub value: i64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Increment {
    pub amount: i64,
    #[serde(default)]
    pub seconds: i64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Spawner {
    pub count: u32,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Ramp {
    pub rate: f64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct WaitForLevel {
    pub threshold: f64,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Delay {
    pub seconds: i64,
}

/// Counts how many times activity bodies were entered, across every engine built from the
/// same model.
#[derive(Clone, Default)]
pub struct EvalCounter(Arc<AtomicUsize>);

impl EvalCounter {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// A model with one of each kind of cell, and activities that poke at them.
///
/// - `register`: a [Register] starting at the configured value.
/// - `counter`: a [Counter], added to by `Increment`.
/// - `level`: a [Linear] value, whose rate is changed by `Ramp`.
/// - `beats`: a [Counter] that a daemon increments every minute, reading nothing.
pub struct Testbed {
    pub evaluations: EvalCounter,
}

impl Testbed {
    pub fn new() -> Self {
        Self {
            evaluations: EvalCounter::default(),
        }
    }
}

fn beat(topic: kestrel::cell::Topic<i64>, s: &mut dyn Scheduler) -> Result<TaskStatus> {
    s.emit(1, topic);
    TaskStatus::delayed(Duration::MINUTE, move |s: &mut dyn Scheduler| {
        beat(topic, s)
    })
}

impl ModelType for Testbed {
    type Config = TestbedConfig;

    fn id(&self) -> String {
        "testbed".to_string()
    }

    fn instantiate(&self, _: Time, config: TestbedConfig, init: &mut Initializer) -> Result<()> {
        let (register, register_topic) = init.allocate(
            "register",
            Register::<i64>::new(),
            RegisterState::new(config.initial_register),
        );
        let (counter, counter_topic) = init.allocate("counter", Counter::<i64>::new(), 0);
        let (level, level_topic) = init.allocate("level", Linear, LinearState::constant(0.0));
        let (beats, beats_topic) = init.allocate("beats", Counter::<i64>::new(), 0);

        init.daemon("heartbeat", move |s: &mut dyn Scheduler| {
            beat(beats_topic, s)
        });

        let evaluations = self.evaluations.clone();
        let set_register = init.activity("SetRegister", move |input: SetRegister| {
            let evaluations = evaluations.clone();
            task(move |s: &mut dyn Scheduler| {
                evaluations.hit();
                s.emit(RegisterEffect::set(input.value), register_topic);
                TaskStatus::completed()
            })
        });

        let evaluations = self.evaluations.clone();
        let increment = init.activity("Increment", move |input: Increment| {
            let evaluations = evaluations.clone();
            task(move |s: &mut dyn Scheduler| {
                evaluations.hit();
                s.emit(input.amount, counter_topic);
                TaskStatus::delayed(Duration::seconds(input.seconds), |_: &mut dyn Scheduler| {
                    TaskStatus::completed()
                })
            })
        });

        // Reads the counter and writes it into the register, so its outcome depends on
        // whatever ran before it.
        let evaluations = self.evaluations.clone();
        init.activity("CopyCounter", move |_: ()| {
            let evaluations = evaluations.clone();
            task(move |s: &mut dyn Scheduler| {
                evaluations.hit();
                let value = s.get(counter)?;
                s.emit(RegisterEffect::set(value), register_topic);
                TaskStatus::completed_with(value)
            })
        });

        init.activity("ReadCounter", move |_: ()| {
            task(move |s: &mut dyn Scheduler| {
                let value = s.get(counter)?;
                TaskStatus::completed_with(value)
            })
        });

        let child = set_register.clone();
        init.activity("ConflictParent", move |_: ()| {
            let child = child.clone();
            task(move |s: &mut dyn Scheduler| {
                child.spawn(s, SetRegister { value: 2 });
                child.call(SetRegister { value: 3 }, move |s: &mut dyn Scheduler| {
                    let state = s.get(register)?;
                    TaskStatus::completed_with(json!({
                        "value": state.value,
                        "conflicted": state.conflicted,
                    }))
                })
            })
        });

        let reader = init.activity("ReadCounterChild", move |_: ()| {
            task(move |s: &mut dyn Scheduler| TaskStatus::completed_with(s.get(counter)?))
        });
        init.activity("AddThenSpawn", move |input: Increment| {
            let reader = reader.clone();
            task(move |s: &mut dyn Scheduler| {
                s.emit(input.amount, counter_topic);
                reader.spawn(s, ());
                s.emit(input.amount, counter_topic);
                TaskStatus::completed()
            })
        });

        let child = increment.clone();
        init.activity("Spawner", move |input: Spawner| {
            let child = child.clone();
            task(move |s: &mut dyn Scheduler| {
                for _ in 0..input.count {
                    child.spawn(
                        s,
                        Increment {
                            amount: 1,
                            seconds: 10,
                        },
                    );
                }
                TaskStatus::completed()
            })
        });

        let child = increment.clone();
        init.activity("CallIncrement", move |input: Increment| {
            let child = child.clone();
            task(move |_: &mut dyn Scheduler| {
                child.call(input, |_: &mut dyn Scheduler| TaskStatus::completed())
            })
        });

        init.activity("Ramp", move |input: Ramp| {
            task(move |s: &mut dyn Scheduler| {
                s.emit(LinearEffect::add_rate(input.rate), level_topic);
                TaskStatus::completed()
            })
        });

        init.activity("WaitForLevel", move |input: WaitForLevel| {
            task(move |_: &mut dyn Scheduler| {
                let threshold = input.threshold;
                let condition = Condition::new(move |q, at_earliest, at_latest| {
                    let state = q.get(level)?;
                    Ok(state
                        .first_at_least(threshold, at_latest)
                        .map(|t| t.max(at_earliest)))
                });
                TaskStatus::awaiting(condition, move |s: &mut dyn Scheduler| {
                    TaskStatus::completed_with(s.now())
                })
            })
        });

        init.activity("Delay", move |input: Delay| {
            task(move |_: &mut dyn Scheduler| {
                TaskStatus::delayed(Duration::seconds(input.seconds), |_: &mut dyn Scheduler| {
                    TaskStatus::completed()
                })
            })
        });

        init.activity("Fail", move |_: ()| {
            task(move |_: &mut dyn Scheduler| -> Result<TaskStatus> { bail!("commanded failure") })
        });

        let fail_later = init.activity("FailLater", move |input: Delay| {
            task(move |_: &mut dyn Scheduler| {
                TaskStatus::delayed(
                    Duration::seconds(input.seconds),
                    |_: &mut dyn Scheduler| -> Result<TaskStatus> { bail!("commanded failure") },
                )
            })
        });
        init.activity("SpawnFailure", move |input: Delay| {
            let fail_later = fail_later.clone();
            task(move |s: &mut dyn Scheduler| {
                fail_later.spawn(s, input);
                TaskStatus::completed()
            })
        });

        init.discrete_resource("register", move |q| Ok(q.get(register)?.value));
        init.discrete_resource("conflicted", move |q| Ok(q.get(register)?.conflicted));
        init.discrete_resource("counter", move |q| q.get(counter));
        init.discrete_resource("beats", move |q| q.get(beats));
        init.real_resource("level", move |q| Ok(RealDynamics::from(q.get(level)?)));
        Ok(())
    }
}

pub fn model() -> Result<Arc<MissionModel>> {
    build_model(&Testbed::new(), start(), &Value::Null)
}

pub fn model_with(testbed: &Testbed) -> Result<Arc<MissionModel>> {
    build_model(testbed, start(), &Value::Null)
}

pub fn window(duration: Duration) -> SimulationWindow {
    SimulationWindow::whole_plan(start(), duration)
}

pub fn id(n: u64) -> ActivityDirectiveId {
    ActivityDirectiveId::new(n)
}

pub fn directive(offset: Duration, activity_type: &str, arguments: Value) -> ActivityDirective {
    ActivityDirective::new(offset, activity_type, arguments)
}

pub fn plan(directives: impl IntoIterator<Item = (u64, ActivityDirective)>) -> Schedule {
    directives.into_iter().map(|(n, d)| (id(n), d)).collect()
}

pub fn run(schedule: &Schedule, duration: Duration) -> Result<SimulationResults> {
    simulate(&model()?, schedule, &window(duration), &|| false)
}

/// The value of a discrete profile at `time`.
pub fn discrete_at(results: &SimulationResults, resource: &str, time: Duration) -> Option<Value> {
    let mut elapsed = Duration::ZERO;
    for segment in results.discrete_profiles.get(resource)? {
        if time < elapsed + segment.extent {
            return Some(segment.dynamics.clone());
        }
        elapsed += segment.extent;
    }
    None
}

/// Offset of an activity's start from the simulation start.
pub fn start_offset(results: &SimulationResults, directive: u64) -> Option<Duration> {
    let activity = results.activity_for(id(directive))?;
    Some(Duration::from_hifitime(activity.start - results.start_time))
}
