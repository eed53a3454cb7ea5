use crate::model::Bananas;
use kestrel::Initializer;

pub mod bite_banana;
pub mod change_producer;
pub mod grow_banana;
pub mod parent_activity;
pub mod peel_banana;

pub fn register_all(init: &mut Initializer, cells: Bananas) {
    peel_banana::register(init, cells);
    bite_banana::register(init, cells);
    grow_banana::register(init, cells);
    change_producer::register(init, cells);
    parent_activity::register(init, cells);
}
