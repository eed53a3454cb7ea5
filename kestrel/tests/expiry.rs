mod util;

use kestrel::cell::{CellType, ReadCellsExt, Register, RegisterEffect, RegisterState};
use kestrel::task::{Condition, Scheduler, SchedulerExt, TaskStatus};
use kestrel::*;
use serde_json::{Value, json};
use util::{discrete_at, start, window};

/// A clock that ticks over every `period`, with no events involved.
struct Ticker {
    period: Duration,
}

impl CellType for Ticker {
    type State = Duration;
    type Effect = ();

    fn empty(&self) {}
    fn sequentially(&self, _: (), _: ()) {}
    fn concurrently(&self, _: (), _: ()) {}
    fn apply(&self, _: &mut Duration, _: &()) {}

    fn step(&self, state: &mut Duration, elapsed: Duration) {
        *state += elapsed;
    }

    fn expiry(&self, state: &Duration) -> Option<Duration> {
        Some(self.period - state.remainder_of(self.period))
    }
}

struct Clockwork;

impl ModelType for Clockwork {
    type Config = ();

    fn instantiate(&self, _: Time, _: (), init: &mut Initializer) -> Result<()> {
        let period = Duration::millis(500);
        let (ticker, _) = init.allocate("ticker", Ticker { period }, Duration::ZERO);
        let (fired, fired_topic) =
            init.allocate("fired", Register::<i64>::new(), RegisterState::new(0));

        init.daemon("alarm", move |_: &mut dyn Scheduler| {
            let condition = Condition::when(move |q| Ok(q.get(ticker)?.whole_units(period) >= 3));
            TaskStatus::awaiting(condition, move |s: &mut dyn Scheduler| {
                let now = s.now();
                s.emit(RegisterEffect::set(now.in_micros()), fired_topic);
                TaskStatus::completed()
            })
        });

        init.discrete_resource("ticks", move |q| Ok(q.get(ticker)?.whole_units(period)));
        init.discrete_resource("fired", move |q| Ok(q.get(fired)?.value));
        Ok(())
    }
}

fn clockwork(duration: Duration) -> Result<SimulationResults> {
    let model = build_model(&Clockwork, start(), &Value::Null)?;
    simulate(&model, &Schedule::new(), &window(duration), &|| false)
}

#[test]
fn expiring_cell_is_resampled_every_period() -> Result<()> {
    let results = clockwork(Duration::seconds(5))?;

    let ticks = &results.discrete_profiles["ticks"];
    assert_eq!(10, ticks.len());
    for (i, segment) in ticks.iter().enumerate() {
        assert_eq!(Duration::millis(500), segment.extent);
        assert_eq!(json!(i), segment.dynamics);
    }
    Ok(())
}

#[test]
fn condition_is_rechecked_on_expiry() -> Result<()> {
    let results = clockwork(Duration::seconds(5))?;

    assert_eq!(
        Some(json!(0)),
        discrete_at(&results, "fired", Duration::millis(1400))
    );
    assert_eq!(
        Some(json!(Duration::millis(1500).in_micros())),
        discrete_at(&results, "fired", Duration::millis(1600))
    );
    Ok(())
}

#[test]
fn profile_covers_the_whole_window() -> Result<()> {
    let results = clockwork(Duration::millis(1750))?;

    let ticks = &results.discrete_profiles["ticks"];
    assert_eq!(4, ticks.len());
    assert_eq!(Duration::millis(250), ticks[3].extent);
    let total: Duration = ticks.iter().map(|s| s.extent).sum();
    assert_eq!(Duration::millis(1750), total);
    Ok(())
}
