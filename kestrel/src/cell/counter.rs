use crate::cell::CellType;
use serde::Serialize;
use std::fmt::Debug;
use std::marker::PhantomData;
use std::ops::Add;

/// A cell that accumulates deltas. Every combination of effects is a sum, so concurrent
/// writes never conflict.
pub struct Counter<T>(PhantomData<fn() -> T>);

impl<T> Counter<T> {
    pub fn new() -> Self {
        Counter(PhantomData)
    }
}

impl<T> Default for Counter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CellType for Counter<T>
where
    T: Copy + Default + Add<Output = T> + Serialize + Debug + Send + Sync + 'static,
{
    type State = T;
    type Effect = T;

    fn empty(&self) -> T {
        T::default()
    }

    fn sequentially(&self, prefix: T, suffix: T) -> T {
        prefix + suffix
    }

    fn concurrently(&self, left: T, right: T) -> T {
        left + right
    }

    fn apply(&self, state: &mut T, effect: &T) {
        *state = *state + *effect;
    }
}
