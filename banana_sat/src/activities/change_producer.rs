use crate::model::Bananas;
use kestrel::Initializer;
use kestrel::cell::{ReadCellsExt, RegisterEffect};
use kestrel::task::{Scheduler, SchedulerExt, TaskStatus, task};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChangeProducer {
    pub producer: String,
}

impl Default for ChangeProducer {
    fn default() -> Self {
        Self {
            producer: "Dole".to_string(),
        }
    }
}

pub fn register(init: &mut Initializer, cells: Bananas) {
    init.activity("ChangeProducer", move |input: ChangeProducer| {
        task(move |s: &mut dyn Scheduler| {
            let previous = s.get(cells.producer)?.value;
            s.emit(RegisterEffect::set(input.producer), cells.producer_topic);
            TaskStatus::completed_with(previous)
        })
    });
}
