mod util;

use kestrel::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use util::*;

fn base_plan() -> Schedule {
    plan([
        (
            1,
            directive(Duration::minutes(1), "Increment", json!({"amount": 1})),
        ),
        (
            2,
            directive(Duration::minutes(2), "SetRegister", json!({"value": 4})),
        ),
        (
            3,
            directive(Duration::minutes(3), "CopyCounter", json!(null)),
        ),
        (
            4,
            directive(
                Duration::minutes(4),
                "Increment",
                json!({"amount": 2, "seconds": 20}),
            ),
        ),
    ])
}

#[test]
fn unchanged_directives_are_not_rerun() -> Result<()> {
    let testbed = Testbed::new();
    let model = model_with(&testbed)?;
    let window = window(Duration::minutes(10));
    let mut driver = IncrementalSimulationDriver::new(model.clone(), window);

    driver.simulate(&base_plan())?;
    assert_eq!(4, testbed.evaluations.get());

    let mut edited = base_plan();
    edited.get_mut(&id(4)).unwrap().arguments = json!({"amount": 5, "seconds": 20});
    let results = driver.simulate(&edited)?;

    assert_eq!(5, testbed.evaluations.get());
    for unchanged in [1, 2, 3] {
        assert_eq!(0, driver.executions(id(unchanged)));
    }
    assert_eq!(0, driver.daemon_executions(0));
    assert!(driver.executions(id(4)) > 0);

    assert_eq!(simulate(&model, &edited, &window, &|| false)?, results);
    assert_eq!(
        Some(json!(6)),
        discrete_at(&results, "counter", Duration::minutes(5))
    );
    Ok(())
}

#[test]
fn readers_of_changed_cells_rerun() -> Result<()> {
    let testbed = Testbed::new();
    let model = model_with(&testbed)?;
    let window = window(Duration::minutes(10));
    let mut driver = IncrementalSimulationDriver::new(model.clone(), window);
    driver.simulate(&base_plan())?;

    let mut edited = base_plan();
    edited.get_mut(&id(1)).unwrap().arguments = json!({"amount": 7});
    let results = driver.simulate(&edited)?;

    assert_eq!(6, testbed.evaluations.get());
    assert!(driver.executions(id(1)) > 0);
    assert!(driver.executions(id(3)) > 0);
    assert_eq!(0, driver.executions(id(2)));
    assert_eq!(0, driver.executions(id(4)));

    assert_eq!(
        json!(7),
        results.activity_for(id(3)).unwrap().computed_attributes
    );
    assert_eq!(
        Some(json!(7)),
        discrete_at(
            &results,
            "register",
            Duration::minutes(3) + Duration::SECOND,
        )
    );
    assert_eq!(simulate(&model, &edited, &window, &|| false)?, results);
    Ok(())
}

#[test]
fn removed_and_added_directives() -> Result<()> {
    let testbed = Testbed::new();
    let model = model_with(&testbed)?;
    let window = window(Duration::minutes(10));
    let mut driver = IncrementalSimulationDriver::new(model.clone(), window);
    driver.simulate(&base_plan())?;

    let mut edited = base_plan();
    edited.remove(&id(2));
    edited.insert(
        id(5),
        directive(Duration::minutes(6), "ReadCounter", json!(null)),
    );
    let results = driver.simulate(&edited)?;

    assert_eq!(0, driver.executions(id(1)));
    assert!(driver.executions(id(5)) > 0);
    assert!(results.activity_for(id(2)).is_none());
    assert_eq!(
        json!(3),
        results.activity_for(id(5)).unwrap().computed_attributes
    );
    assert_eq!(simulate(&model, &edited, &window, &|| false)?, results);
    Ok(())
}

#[test]
fn identical_plan_replays_everything() -> Result<()> {
    let testbed = Testbed::new();
    let model = model_with(&testbed)?;
    let mut driver = IncrementalSimulationDriver::new(model, window(Duration::minutes(10)));

    let first = driver.simulate(&base_plan())?;
    let second = driver.simulate(&base_plan())?;

    assert_eq!(first, second);
    assert_eq!(4, testbed.evaluations.get());
    assert!(driver.last_run().is_some_and(|t| !t.is_empty()));

    driver.clear();
    assert!(driver.last_run().is_none());
    let third = driver.simulate(&base_plan())?;
    assert_eq!(first, third);
    assert_eq!(8, testbed.evaluations.get());
    Ok(())
}

#[test]
fn children_of_changed_directives_rerun() -> Result<()> {
    let testbed = Testbed::new();
    let model = model_with(&testbed)?;
    let window = window(Duration::minutes(10));
    let schedule = plan([
        (
            1,
            directive(Duration::MINUTE, "Spawner", json!({"count": 2})),
        ),
        (
            2,
            directive(Duration::minutes(5), "Spawner", json!({"count": 1})),
        ),
    ]);
    let mut driver = IncrementalSimulationDriver::new(model.clone(), window);
    driver.simulate(&schedule)?;
    assert_eq!(3, testbed.evaluations.get());

    let mut edited = schedule.clone();
    edited.get_mut(&id(2)).unwrap().arguments = json!({"count": 3});
    let results = driver.simulate(&edited)?;

    assert_eq!(6, testbed.evaluations.get());
    assert_eq!(5, results.activities_of_type("Increment").count());
    assert_eq!(simulate(&model, &edited, &window, &|| false)?, results);
    Ok(())
}

/// Random plans and random edits give the same results incrementally as from scratch, with
/// anchor chains and nested spawns and calls.
#[test]
fn matches_fresh_simulation_on_random_edits() -> Result<()> {
    let model = model()?;
    let window = window(Duration::minutes(30));
    let kinds = [
        "Increment",
        "SetRegister",
        "CopyCounter",
        "ReadCounter",
        "Spawner",
        "CallIncrement",
        "ConflictParent",
        "AddThenSpawn",
        "Ramp",
        "WaitForLevel",
        "Delay",
    ];

    let random_directive = |rng: &mut StdRng, n: u64, schedule: &Schedule| {
        let kind = kinds[rng.random_range(0..kinds.len())];
        let arguments = match kind {
            "Increment" | "CallIncrement" | "AddThenSpawn" => {
                json!({"amount": rng.random_range(-5..=5), "seconds": rng.random_range(0..120)})
            }
            "SetRegister" => json!({"value": rng.random_range(0..4)}),
            "Spawner" => json!({"count": rng.random_range(0..3)}),
            "Ramp" => json!({"rate": rng.random_range(-2.0..2.0)}),
            "WaitForLevel" => json!({"threshold": rng.random_range(-50.0..50.0)}),
            "Delay" => json!({"seconds": rng.random_range(0..90)}),
            _ => json!(null),
        };
        let earlier: Vec<_> = schedule.keys().filter(|k| k.0 < n).copied().collect();
        if !earlier.is_empty() && rng.random_bool(0.4) {
            let anchor = earlier[rng.random_range(0..earlier.len())];
            let point = if rng.random_bool(0.5) {
                AnchorPoint::Start
            } else {
                AnchorPoint::End
            };
            let offset = Duration::seconds(rng.random_range(0..300));
            directive(offset, kind, arguments).anchored_to(anchor, point)
        } else {
            let start = Duration::seconds(rng.random_range(0..1800));
            directive(start, kind, arguments)
        }
    };

    for seed in 0..8 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut schedule = Schedule::new();
        for n in 0..20 {
            let next = random_directive(&mut rng, n, &schedule);
            schedule.insert(id(n), next);
        }
        let mut driver = IncrementalSimulationDriver::new(model.clone(), window);
        driver.simulate(&schedule)?;

        for _ in 0..4 {
            for _ in 0..rng.random_range(1..4) {
                let n = rng.random_range(0..25);
                if rng.random_bool(0.2) {
                    schedule.remove(&id(n));
                } else {
                    let next = random_directive(&mut rng, n, &schedule);
                    schedule.insert(id(n), next);
                }
            }
            // Directives whose anchor was removed fall back to the plan.
            let present: Vec<_> = schedule.keys().copied().collect();
            for entry in schedule.values_mut() {
                if entry.anchor_id.is_some_and(|a| !present.contains(&a)) {
                    entry.anchor_id = None;
                    entry.anchor_point = AnchorPoint::Start;
                }
            }

            let incremental = driver.simulate(&schedule)?;
            let fresh = simulate(&model, &schedule, &window, &|| false)?;
            assert_eq!(fresh, incremental, "seed {seed}");
        }
    }
    Ok(())
}
