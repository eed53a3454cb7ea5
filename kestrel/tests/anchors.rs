mod util;

use kestrel::anchor::{AnchorMap, StartOffsetReducer, filter_out_negative_start_offset};
use kestrel::{
    ActivityDirectiveId, AnchorError, AnchorPoint, Duration, Result, Schedule, SimulationWindow,
    simulate,
};
use serde_json::json;
use util::*;

fn chain(length: u64, end_anchored: impl Fn(u64) -> bool) -> Schedule {
    let mut schedule = Schedule::new();
    schedule.insert(
        id(0),
        directive(Duration::MINUTE, "Delay", json!({"seconds": 0})),
    );
    for l in 1..length {
        let point = if end_anchored(l) {
            AnchorPoint::End
        } else {
            AnchorPoint::Start
        };
        schedule.insert(
            id(l),
            directive(Duration::MINUTE, "Delay", json!({"seconds": 0}))
                .anchored_to(id(l - 1), point),
        );
    }
    schedule
}

fn group(entries: &[(u64, Duration)]) -> Vec<(ActivityDirectiveId, Duration)> {
    entries.iter().map(|(n, d)| (id(*n), *d)).collect()
}

#[test]
fn end_anchored_chain_keeps_every_link() -> Result<()> {
    let schedule = chain(400, |_| true);
    let anchors = StartOffsetReducer::new(Duration::DAY * 10, &schedule).compute()?;

    assert_eq!(400, anchors.len());
    assert_eq!(vec![(id(0), Duration::MINUTE)], anchors[&None]);
    for l in 1..399 {
        assert_eq!(vec![(id(l + 1), Duration::MINUTE)], anchors[&Some(id(l))]);
    }
    Ok(())
}

#[test]
fn start_anchors_collapse_between_end_anchors() -> Result<()> {
    let schedule = chain(400, |l| l % 5 == 0);
    let anchors = StartOffsetReducer::new(Duration::DAY * 10, &schedule).compute()?;

    assert_eq!(80, anchors.len());
    let expected: Vec<_> = (0..5)
        .map(|i| (id(i), Duration::minutes(i as i64 + 1)))
        .collect();
    assert_eq!(expected, anchors[&None]);
    for l in (5..400).step_by(5) {
        let expected: Vec<_> = (0..5)
            .map(|i| (id(l + i), Duration::minutes(i as i64 + 1)))
            .collect();
        assert_eq!(expected, anchors[&Some(id(l - 1))]);
    }
    Ok(())
}

#[test]
fn filter_removes_negative_roots_and_their_chains() -> Result<()> {
    let m = Duration::MINUTE;

    let mut input = AnchorMap::new();
    input.insert(
        None,
        group(&[(1, m * -10), (2, m), (3, Duration::ZERO), (4, -m)]),
    );
    input.insert(Some(id(1)), group(&[(5, m), (6, Duration::ZERO)]));
    input.insert(Some(id(2)), group(&[(7, m), (8, -m)]));
    input.insert(
        Some(id(5)),
        group(&[(9, m), (10, Duration::ZERO), (11, -m)]),
    );
    input.insert(Some(id(7)), group(&[(12, Duration::ZERO)]));

    let mut expected = AnchorMap::new();
    expected.insert(None, group(&[(2, m), (3, Duration::ZERO)]));
    expected.insert(Some(id(2)), group(&[(7, m), (8, -m)]));
    expected.insert(Some(id(7)), group(&[(12, Duration::ZERO)]));

    assert_eq!(expected, filter_out_negative_start_offset(&input)?);
    assert_eq!(5, input.len());
    Ok(())
}

#[test]
fn filter_needs_a_plan_group() {
    let mut input = AnchorMap::new();
    input.insert(Some(id(1)), vec![(id(2), Duration::ZERO)]);
    assert_eq!(
        Err(AnchorError::NoPlanAnchor),
        filter_out_negative_start_offset(&input)
    );
}

#[test]
fn directives_before_the_plan_are_dropped_with_dependents() -> Result<()> {
    let schedule = plan([
        (
            1,
            directive(Duration::seconds(-10), "Increment", json!({"amount": 1})),
        ),
        (
            2,
            directive(Duration::ZERO, "Increment", json!({"amount": 10}))
                .anchored_to(id(1), AnchorPoint::Start),
        ),
        (
            3,
            directive(Duration::ZERO, "Increment", json!({"amount": 100})),
        ),
    ]);
    let results = run(&schedule, Duration::MINUTE)?;

    assert_eq!(1, results.simulated_activities.len());
    assert!(results.activity_for(id(1)).is_none());
    assert!(results.activity_for(id(2)).is_none());
    assert!(results.activity_for(id(3)).is_some());
    assert!(results.instantiation_errors.is_empty());
    assert_eq!(
        Some(json!(100)),
        discrete_at(&results, "counter", Duration::SECOND)
    );
    Ok(())
}

#[test]
fn anchored_directives_start_at_resolved_times() -> Result<()> {
    let schedule = plan([
        (
            1,
            directive(Duration::MINUTE, "Delay", json!({"seconds": 30})),
        ),
        (
            2,
            directive(Duration::seconds(10), "Delay", json!({"seconds": 20}))
                .anchored_to(id(1), AnchorPoint::End),
        ),
        (
            3,
            directive(Duration::seconds(5), "Delay", json!({"seconds": 0}))
                .anchored_to(id(2), AnchorPoint::Start),
        ),
        (
            4,
            directive(-Duration::MINUTE, "Delay", json!({"seconds": 0})).anchored_to_plan_end(),
        ),
        (
            5,
            directive(Duration::ZERO, "Delay", json!({"seconds": 0}))
                .anchored_to(id(2), AnchorPoint::End),
        ),
    ]);
    let results = run(&schedule, Duration::minutes(10))?;

    assert_eq!(Some(Duration::MINUTE), start_offset(&results, 1));
    assert_eq!(Some(Duration::seconds(100)), start_offset(&results, 2));
    assert_eq!(Some(Duration::seconds(105)), start_offset(&results, 3));
    assert_eq!(Some(Duration::minutes(9)), start_offset(&results, 4));
    assert_eq!(Some(Duration::seconds(120)), start_offset(&results, 5));
    Ok(())
}

#[test]
fn end_anchor_waits_for_spawned_children() -> Result<()> {
    let schedule = plan([
        (1, directive(Duration::ZERO, "Spawner", json!({"count": 2}))),
        (
            2,
            directive(Duration::SECOND, "ReadCounter", json!(null))
                .anchored_to(id(1), AnchorPoint::End),
        ),
    ]);
    let results = run(&schedule, Duration::MINUTE)?;

    assert_eq!(Some(Duration::seconds(11)), start_offset(&results, 2));
    assert_eq!(
        json!(2),
        results.activity_for(id(2)).unwrap().computed_attributes
    );
    Ok(())
}

#[test]
fn late_simulation_start_shifts_plan_directives() -> Result<()> {
    let schedule = plan([
        (
            1,
            directive(Duration::seconds(30), "Increment", json!({"amount": 1})),
        ),
        (
            2,
            directive(Duration::minutes(2), "Increment", json!({"amount": 2})),
        ),
    ]);
    let mut window = window(Duration::minutes(10));
    window.simulation_start = start() + Duration::MINUTE.to_hifitime();
    window.simulation_duration = Duration::minutes(5);
    let results = simulate(&model()?, &schedule, &window, &|| false)?;

    assert!(results.activity_for(id(1)).is_none());
    assert_eq!(Some(Duration::MINUTE), start_offset(&results, 2));
    Ok(())
}

#[test]
fn missing_anchor_rejects_the_plan() -> Result<()> {
    let schedule = plan([(
        1,
        directive(Duration::ZERO, "Delay", json!({"seconds": 0}))
            .anchored_to(id(9), AnchorPoint::Start),
    )]);
    let error = run(&schedule, Duration::MINUTE).unwrap_err();

    assert_eq!(
        Some(&AnchorError::MissingAnchor {
            directive: id(1),
            anchor: id(9)
        }),
        error.downcast_ref::<AnchorError>()
    );
    Ok(())
}

#[test]
fn anchor_cycle_rejects_the_plan() {
    let schedule = plan([
        (
            1,
            directive(Duration::ZERO, "Delay", json!({"seconds": 0}))
                .anchored_to(id(2), AnchorPoint::Start),
        ),
        (
            2,
            directive(Duration::ZERO, "Delay", json!({"seconds": 0}))
                .anchored_to(id(1), AnchorPoint::End),
        ),
    ]);
    let window: SimulationWindow = window(Duration::MINUTE);
    let error = StartOffsetReducer::new(window.plan_duration, &schedule)
        .compute()
        .unwrap_err();
    assert!(matches!(error, AnchorError::Cycle { .. }));
}
