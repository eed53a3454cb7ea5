use crate::model::Bananas;
use kestrel::Initializer;
use kestrel::cell::LinearEffect;
use kestrel::task::{Scheduler, SchedulerExt, TaskStatus, task};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PeelDirection {
    #[default]
    FromStem,
    FromTip,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PeelBanana {
    pub peel_direction: PeelDirection,
}

pub fn register(init: &mut Initializer, cells: Bananas) {
    init.activity("PeelBanana", move |input: PeelBanana| {
        task(move |s: &mut dyn Scheduler| {
            // Peeling from the tip mushes a bit of the fruit.
            let lost = match input.peel_direction {
                PeelDirection::FromStem => 1.0,
                PeelDirection::FromTip => 1.5,
            };
            s.emit(LinearEffect::add(-lost), cells.fruit_topic);
            s.emit(-1, cells.peel_topic);
            TaskStatus::completed()
        })
    });
}
