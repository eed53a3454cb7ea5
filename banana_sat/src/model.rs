use crate::activities;
use kestrel::cell::{
    CellId, Counter, Linear, LinearEffect, LinearState, ReadCellsExt, Register, RegisterEffect,
    RegisterState, Topic,
};
use kestrel::results::RealDynamics;
use kestrel::task::{Condition, Scheduler, SchedulerExt, TaskStatus};
use kestrel::{Duration, Initializer, ModelType, Result, Time};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BananaConfig {
    pub initial_fruit: f64,
    pub initial_peel: i64,
    pub initial_producer: String,
    /// Restock the fruit whenever it drops below one.
    pub restock: bool,
}

impl Default for BananaConfig {
    fn default() -> Self {
        Self {
            initial_fruit: 4.0,
            initial_peel: 4,
            initial_producer: "Chiquita".to_string(),
            restock: false,
        }
    }
}

/// Handles to every cell in the model, passed to the activities when they are registered.
#[derive(Copy, Clone)]
pub struct Bananas {
    pub fruit: CellId<Linear>,
    pub fruit_topic: Topic<LinearEffect>,
    pub peel: CellId<Counter<i64>>,
    pub peel_topic: Topic<i64>,
    pub flag: CellId<Register<String>>,
    pub flag_topic: Topic<RegisterEffect<String>>,
    pub producer: CellId<Register<String>>,
    pub producer_topic: Topic<RegisterEffect<String>>,
}

pub struct BananaSat;

impl ModelType for BananaSat {
    type Config = BananaConfig;

    fn id(&self) -> String {
        "banana_sat-1".to_string()
    }

    fn instantiate(
        &self,
        _plan_start: Time,
        config: BananaConfig,
        init: &mut Initializer,
    ) -> Result<()> {
        let (fruit, fruit_topic) = init.allocate(
            "/fruit",
            Linear,
            LinearState::constant(config.initial_fruit),
        );
        let (peel, peel_topic) = init.allocate("/peel", Counter::<i64>::new(), config.initial_peel);
        let (flag, flag_topic) = init.allocate(
            "/flag",
            Register::new(),
            RegisterState::new("A".to_string()),
        );
        let (producer, producer_topic) = init.allocate(
            "/producer",
            Register::new(),
            RegisterState::new(config.initial_producer),
        );

        let cells = Bananas {
            fruit,
            fruit_topic,
            peel,
            peel_topic,
            flag,
            flag_topic,
            producer,
            producer_topic,
        };
        activities::register_all(init, cells);

        if config.restock {
            init.daemon("restock", move |s: &mut dyn Scheduler| restock(cells, s));
        }

        init.real_resource("/fruit", move |q| Ok(RealDynamics::from(q.get(fruit)?)));
        init.discrete_resource("/peel", move |q| q.get(peel));
        init.discrete_resource("/flag", move |q| Ok(q.get(flag)?.value));
        init.discrete_resource("/flag/conflicted", move |q| Ok(q.get(flag)?.conflicted));
        init.discrete_resource("/producer", move |q| Ok(q.get(producer)?.value));
        Ok(())
    }
}

fn restock(cells: Bananas, _: &mut dyn Scheduler) -> Result<TaskStatus> {
    let fruit = cells.fruit;
    let running_low = Condition::new(move |q, at_earliest, at_latest| {
        let state = q.get(fruit)?;
        let crossing = state.first_at_most(0.999, at_latest);
        Ok(crossing.map(|t| t.max(at_earliest)))
    });
    TaskStatus::awaiting(running_low, move |s: &mut dyn Scheduler| {
        s.emit(LinearEffect::add(4.0), cells.fruit_topic);
        TaskStatus::delayed(Duration::SECOND, move |s: &mut dyn Scheduler| {
            restock(cells, s)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel::{
        ActivityDirective, ActivityDirectiveId, IncrementalSimulationDriver, Schedule,
        SimulationWindow, build_model, simulate,
    };
    use serde_json::{Value, json};

    fn window() -> SimulationWindow {
        SimulationWindow::whole_plan(
            Time::from_gregorian_utc_at_midnight(2030, 1, 1),
            Duration::seconds(10),
        )
    }

    fn peel_at(seconds: i64) -> Schedule {
        [(
            ActivityDirectiveId::new(0),
            ActivityDirective::new(Duration::seconds(seconds), "PeelBanana", json!({})),
        )]
        .into()
    }

    #[test]
    fn peeling_takes_one_fruit() -> Result<()> {
        let window = window();
        let model = build_model(&BananaSat, window.plan_start, &Value::Null)?;
        let results = simulate(&model, &peel_at(5), &window, &|| false)?;

        let fruit = &results.real_profiles["/fruit"];
        assert_eq!(2, fruit.len());
        assert_eq!(4.0, fruit[0].dynamics.initial);
        assert_eq!(Duration::seconds(5), fruit[0].extent);
        assert_eq!(3.0, fruit[1].dynamics.initial);
        assert_eq!(json!(3), results.discrete_profiles["/peel"][1].dynamics);
        Ok(())
    }

    #[test]
    fn remove_then_add_peel() -> Result<()> {
        let window = window();
        let model = build_model(&BananaSat, window.plan_start, &Value::Null)?;
        let mut driver = IncrementalSimulationDriver::new(model, window);

        driver.simulate(&peel_at(5))?;
        let results = driver.simulate(&Schedule::new())?;
        assert!(results.simulated_activities.is_empty());
        assert_eq!(1, results.real_profiles["/fruit"].len());

        let results = driver.simulate(&peel_at(3))?;
        let fruit = &results.real_profiles["/fruit"];
        assert_eq!(1, results.simulated_activities.len());
        assert_eq!(Duration::seconds(3), fruit[0].extent);
        assert_eq!(3.0, fruit[1].dynamics.initial);
        Ok(())
    }

    #[test]
    fn big_bites_raise_the_flag() -> Result<()> {
        let window = window();
        let model = build_model(&BananaSat, window.plan_start, &Value::Null)?;
        let schedule: Schedule = [
            (
                ActivityDirectiveId::new(0),
                ActivityDirective::new(Duration::SECOND, "BiteBanana", json!({"biteSize": 3.0})),
            ),
            (
                ActivityDirectiveId::new(1),
                ActivityDirective::new(Duration::seconds(2), "BiteBanana", json!({})),
            ),
        ]
        .into();
        let results = simulate(&model, &schedule, &window, &|| false)?;

        let big = results.activity_for(ActivityDirectiveId::new(0)).unwrap();
        assert_eq!(
            json!({"biteSizeWasBig": true, "newFlag": "B"}),
            big.computed_attributes
        );
        let flags: Vec<_> = results.discrete_profiles["/flag"]
            .iter()
            .map(|s| s.dynamics.clone())
            .collect();
        assert_eq!(vec![json!("A"), json!("B"), json!("A")], flags);
        Ok(())
    }

    #[test]
    fn restock_refills_the_fruit() -> Result<()> {
        let window = window();
        let model = build_model(&BananaSat, window.plan_start, &json!({"restock": true}))?;
        let schedule: Schedule = [(
            ActivityDirectiveId::new(0),
            ActivityDirective::new(Duration::seconds(2), "BiteBanana", json!({"biteSize": 3.5})),
        )]
        .into();
        let results = simulate(&model, &schedule, &window, &|| false)?;

        let fruit = &results.real_profiles["/fruit"];
        assert_eq!(4.5, fruit.last().unwrap().dynamics.initial);
        Ok(())
    }
}
