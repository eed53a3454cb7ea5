mod util;

use kestrel::*;
use serde_json::json;
use util::*;

fn busy_plan() -> Schedule {
    plan([
        (1, directive(Duration::ZERO, "ConflictParent", json!(null))),
        (
            2,
            directive(Duration::seconds(10), "Spawner", json!({"count": 4})),
        ),
        (
            3,
            directive(
                Duration::seconds(10),
                "Increment",
                json!({"amount": 3, "seconds": 5}),
            ),
        ),
        (
            4,
            directive(Duration::seconds(10), "AddThenSpawn", json!({"amount": 2})),
        ),
        (
            5,
            directive(Duration::seconds(15), "CopyCounter", json!(null)),
        ),
        (
            6,
            directive(Duration::seconds(20), "Ramp", json!({"rate": 2.0})),
        ),
        (
            7,
            directive(
                Duration::seconds(20),
                "WaitForLevel",
                json!({"threshold": 30.0}),
            ),
        ),
        (
            8,
            directive(
                Duration::SECOND,
                "CallIncrement",
                json!({"amount": 1, "seconds": 2}),
            )
                .anchored_to(id(3), AnchorPoint::End),
        ),
    ])
}

#[test]
fn repeated_runs_are_equal() -> Result<()> {
    let first = run(&busy_plan(), Duration::minutes(5))?;
    for _ in 0..5 {
        assert_eq!(first, run(&busy_plan(), Duration::minutes(5))?);
    }
    assert_eq!(
        serde_json::to_string(&first)?,
        serde_json::to_string(&run(&busy_plan(), Duration::minutes(5))?)?
    );
    Ok(())
}

#[test]
fn runs_on_other_threads_are_equal() -> Result<()> {
    let expected = run(&busy_plan(), Duration::minutes(5))?;
    let results: Vec<SimulationResults> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| run(&busy_plan(), Duration::minutes(5))))
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("simulation thread panicked"))
            .collect::<Result<_>>()
    })?;
    for result in results {
        assert_eq!(expected, result);
    }
    Ok(())
}

#[test]
fn concurrent_effects_do_not_depend_on_directive_order() -> Result<()> {
    let forward = plan([
        (
            1,
            directive(Duration::seconds(5), "Increment", json!({"amount": 3})),
        ),
        (
            2,
            directive(Duration::seconds(5), "Increment", json!({"amount": 4})),
        ),
        (
            3,
            directive(Duration::seconds(5), "SetRegister", json!({"value": 9})),
        ),
    ]);
    let backward = plan([
        (
            1,
            directive(Duration::seconds(5), "SetRegister", json!({"value": 9})),
        ),
        (
            2,
            directive(Duration::seconds(5), "Increment", json!({"amount": 4})),
        ),
        (
            3,
            directive(Duration::seconds(5), "Increment", json!({"amount": 3})),
        ),
    ]);
    let forward = run(&forward, Duration::MINUTE)?;
    let backward = run(&backward, Duration::MINUTE)?;

    assert_eq!(forward.discrete_profiles, backward.discrete_profiles);
    assert_eq!(
        Some(json!(7)),
        discrete_at(&forward, "counter", Duration::seconds(6))
    );
    assert_eq!(
        Some(json!(9)),
        discrete_at(&forward, "register", Duration::seconds(6))
    );
    assert_eq!(
        Some(json!(false)),
        discrete_at(&forward, "conflicted", Duration::seconds(6))
    );
    Ok(())
}

#[test]
fn busy_plan_outcome() -> Result<()> {
    let results = run(&busy_plan(), Duration::minutes(5))?;

    assert!(results.faults.is_empty());
    assert!(results.unfinished_activities.is_empty());
    assert_eq!(Some(Duration::seconds(16)), start_offset(&results, 8));
    assert_eq!(
        json!(11),
        results.activity_for(id(5)).unwrap().computed_attributes
    );
    assert_eq!(
        Duration::seconds(15),
        results.activity_for(id(7)).unwrap().duration
    );
    assert_eq!(
        Some(json!(12)),
        discrete_at(&results, "counter", Duration::minutes(1))
    );
    Ok(())
}
