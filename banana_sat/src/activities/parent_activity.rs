use crate::model::Bananas;
use kestrel::cell::ReadCellsExt;
use kestrel::task::{Scheduler, TaskStatus, task};
use kestrel::{Duration, Initializer};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParentActivity {
    pub label: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChildActivity {
    pub counter: i64,
}

impl Default for ChildActivity {
    fn default() -> Self {
        Self { counter: 1 }
    }
}

/// A parent that spawns one child and waits on another, to show activity nesting.
pub fn register(init: &mut Initializer, cells: Bananas) {
    let child = init.activity("ChildActivity", move |input: ChildActivity| {
        task(move |_: &mut dyn Scheduler| {
            TaskStatus::delayed(Duration::seconds(input.counter), move |s: &mut dyn Scheduler| {
                TaskStatus::completed_with(s.get(cells.peel)?)
            })
        })
    });

    init.activity("ParentActivity", move |input: ParentActivity| {
        let child = child.clone();
        task(move |s: &mut dyn Scheduler| {
            child.spawn(s, ChildActivity { counter: 2 });
            child.call(ChildActivity { counter: 1 }, move |_: &mut dyn Scheduler| {
                TaskStatus::completed_with(input.label)
            })
        })
    });
}
