use crate::model::Bananas;
use kestrel::cell::LinearEffect;
use kestrel::task::{Scheduler, SchedulerExt, TaskStatus, task};
use kestrel::{Duration, Initializer, bail};
use serde::{Deserialize, Serialize};

/// Grows `quantity` bananas, linearly over `growing_duration`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GrowBanana {
    pub quantity: i64,
    pub growing_duration: Duration,
}

impl Default for GrowBanana {
    fn default() -> Self {
        Self {
            quantity: 1,
            growing_duration: Duration::HOUR,
        }
    }
}

pub fn register(init: &mut Initializer, cells: Bananas) {
    init.activity("GrowBanana", move |input: GrowBanana| {
        task(move |s: &mut dyn Scheduler| {
            if !input.growing_duration.is_positive() {
                bail!(
                    "growing duration must be positive, got {}",
                    input.growing_duration
                );
            }
            let rate = input.quantity as f64 / input.growing_duration.as_seconds_f64();
            s.emit(LinearEffect::add_rate(rate), cells.fruit_topic);
            TaskStatus::delayed(input.growing_duration, move |s: &mut dyn Scheduler| {
                s.emit(LinearEffect::add_rate(-rate), cells.fruit_topic);
                TaskStatus::completed()
            })
        })
    });
}
