use crate::cell::CellType;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::marker::PhantomData;

/// A cell holding a single value that can only be overwritten.
///
/// Concurrent writes of different values cannot be reconciled. The cell keeps its previous
/// value and reports itself as conflicted until the next write.
pub struct Register<T>(PhantomData<fn() -> T>);

impl<T> Register<T> {
    pub fn new() -> Self {
        Register(PhantomData)
    }
}

impl<T> Default for Register<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterState<T> {
    pub value: T,
    pub conflicted: bool,
}

impl<T> RegisterState<T> {
    pub fn new(value: T) -> Self {
        Self {
            value,
            conflicted: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegisterEffect<T> {
    pub value: Option<T>,
    pub conflicted: bool,
}

impl<T> RegisterEffect<T> {
    pub fn set(value: T) -> Self {
        Self {
            value: Some(value),
            conflicted: false,
        }
    }

    pub fn none() -> Self {
        Self {
            value: None,
            conflicted: false,
        }
    }

    fn conflict() -> Self {
        Self {
            value: None,
            conflicted: true,
        }
    }
}

impl<T> CellType for Register<T>
where
    T: Clone + PartialEq + Serialize + Debug + Send + Sync + 'static,
{
    type State = RegisterState<T>;
    type Effect = RegisterEffect<T>;

    fn empty(&self) -> Self::Effect {
        RegisterEffect::none()
    }

    fn sequentially(&self, prefix: Self::Effect, suffix: Self::Effect) -> Self::Effect {
        if suffix.value.is_some() {
            suffix
        } else {
            RegisterEffect {
                value: prefix.value,
                conflicted: prefix.conflicted || suffix.conflicted,
            }
        }
    }

    fn concurrently(&self, left: Self::Effect, right: Self::Effect) -> Self::Effect {
        if left.conflicted || right.conflicted {
            return RegisterEffect::conflict();
        }
        match (left.value, right.value) {
            (Some(l), Some(r)) if l != r => RegisterEffect::conflict(),
            (Some(v), _) | (None, Some(v)) => RegisterEffect::set(v),
            (None, None) => RegisterEffect::none(),
        }
    }

    fn apply(&self, state: &mut Self::State, effect: &Self::Effect) {
        if let Some(value) = &effect.value {
            state.value = value.clone();
            state.conflicted = effect.conflicted;
        } else if effect.conflicted {
            state.conflicted = true;
        }
    }
}
