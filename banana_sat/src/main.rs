use crate::model::BananaSat;
use kestrel::checkpoint::{best_cached_engine, desired_checkpoints, no_condition};
use kestrel::*;
use serde_json::json;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod activities;
mod model;

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    let plan_start = Time::from_gregorian_utc_at_midnight(2030, 1, 1);
    let configuration = json!({"restock": true});
    let model = build_model(&BananaSat, plan_start, &configuration)?;
    let window = SimulationWindow::whole_plan(plan_start, Duration::HOUR * 6);

    let bite = |size: f64| json!({ "biteSize": size });
    let grow = json!({"quantity": 2, "growingDuration": 3_600_000_000i64});
    let producer = json!({"producer": "Fyffes"});
    let mut plan: Schedule = [
        (1, Duration::minutes(5), "PeelBanana", json!({})),
        (2, Duration::minutes(20), "BiteBanana", bite(2.0)),
        (3, Duration::minutes(30), "GrowBanana", grow),
        (4, Duration::hours(2), "ChangeProducer", producer),
        (6, Duration::hours(4), "BiteBanana", bite(3.0)),
    ]
    .into_iter()
    .map(|(id, start, activity_type, arguments)| {
        let directive = ActivityDirective::new(start, activity_type, arguments);
        (ActivityDirectiveId::new(id), directive)
    })
    .collect();
    // Lunch starts ten minutes after the bananas have grown.
    let label = json!({"label": "lunch"});
    let lunch = ActivityDirective::new(Duration::minutes(10), "ParentActivity", label)
        .anchored_to(ActivityDirectiveId::new(3), AnchorPoint::End);
    plan.insert(ActivityDirectiveId::new(5), lunch);

    let timer = Instant::now();
    let results = simulate(&model, &plan, &window, &|| false)?;
    info!(elapsed = ?timer.elapsed(), "simulated plan from scratch");
    print_results(&results);

    // Edit the last bite, first by resuming from a checkpoint, then by replaying traces.
    let store = InMemoryCachedEngineStore::new(4);
    let engine_configuration = SimulationEngineConfiguration {
        simulation_configuration: configuration,
        simulation_start_time: plan_start,
        mission_model_id: model.id().to_string(),
    };
    simulate_with_checkpoints(
        &model,
        &plan,
        &window,
        &CachedSimulationEngine::empty(model.clone()),
        &desired_checkpoints(vec![Duration::hours(1), Duration::hours(3)]),
        &no_condition(),
        &store,
        &engine_configuration,
        &|| false,
    )?;

    let mut incremental = IncrementalSimulationDriver::new(model.clone(), window);
    incremental.simulate(&plan)?;

    if let Some(bite) = plan.get_mut(&ActivityDirectiveId::new(6)) {
        bite.arguments = json!({"biteSize": 0.5});
    }

    let timer = Instant::now();
    let cached = store.get_cached_engines(&engine_configuration);
    let resumed = match best_cached_engine(&plan, &cached, &window)? {
        Some(engine) => engine,
        None => std::sync::Arc::new(CachedSimulationEngine::empty(model.clone())),
    };
    let run = simulate_with_checkpoints(
        &model,
        &plan,
        &window,
        &resumed,
        &no_condition(),
        &no_condition(),
        &store,
        &engine_configuration,
        &|| false,
    )?;
    info!(
        elapsed = ?timer.elapsed(),
        resumed_from = ?run.resumed_from,
        "resimulated from checkpoint"
    );

    let timer = Instant::now();
    let replayed = incremental.simulate(&plan)?;
    info!(
        elapsed = ?timer.elapsed(),
        executed = incremental.executions(ActivityDirectiveId::new(6)),
        "resimulated incrementally"
    );

    if run.compute_results() != replayed {
        bail!("checkpointed and incremental results disagree");
    }
    print_results(&replayed);
    Ok(())
}

fn print_results(results: &SimulationResults) {
    for (id, activity) in &results.simulated_activities {
        println!(
            "{id:?} {} at {} for {}: {}",
            activity.activity_type, activity.start, activity.duration, activity.computed_attributes
        );
    }
    let mut elapsed = Duration::ZERO;
    for segment in results.real_profiles.get("/fruit").into_iter().flatten() {
        println!(
            "/fruit from {elapsed}: {:.3} + {:.3e}/s",
            segment.dynamics.initial, segment.dynamics.rate
        );
        elapsed += segment.extent;
    }
    for fault in &results.faults {
        println!("{fault}");
    }
}
