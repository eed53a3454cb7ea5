use crate::model::Bananas;
use kestrel::Initializer;
use kestrel::cell::{LinearEffect, RegisterEffect};
use kestrel::task::{Scheduler, SchedulerExt, TaskStatus, task};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BiteBanana {
    pub bite_size: f64,
}

impl Default for BiteBanana {
    fn default() -> Self {
        Self { bite_size: 1.0 }
    }
}

pub fn register(init: &mut Initializer, cells: Bananas) {
    init.activity("BiteBanana", move |input: BiteBanana| {
        task(move |s: &mut dyn Scheduler| {
            let big = input.bite_size > 1.0;
            let new_flag = if big { "B" } else { "A" };
            s.emit(RegisterEffect::set(new_flag.to_string()), cells.flag_topic);
            s.emit(LinearEffect::add(-input.bite_size), cells.fruit_topic);
            TaskStatus::completed_with(json!({
                "biteSizeWasBig": big,
                "newFlag": new_flag,
            }))
        })
    });
}
