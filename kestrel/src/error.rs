use crate::directive::ActivityDirectiveId;
use crate::duration::Duration;
use derive_more::{Display, Error};
use serde::{Deserialize, Serialize};

/// Rejections from anchor resolution. These abort a run before any task starts.
#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum AnchorError {
    #[display("directive {directive} is anchored to {anchor}, which is not in the plan")]
    MissingAnchor {
        directive: ActivityDirectiveId,
        anchor: ActivityDirectiveId,
    },
    #[display("directives {directives:?} are anchored in a cycle")]
    Cycle {
        directives: Vec<ActivityDirectiveId>,
    },
    #[display("none of the activities to filter are anchored to the plan")]
    NoPlanAnchor,
}

/// Failures that halt a whole run.
#[derive(Debug, Display, Error)]
pub enum SimulationError {
    #[display("could not instantiate the mission model: {message}")]
    Model { message: String },
    #[display("no directive type named {activity_type:?} is registered")]
    UnknownDirectiveType { activity_type: String },
    #[display("checkpoint engine ends at {ends_at} but the run starts at {start}")]
    IncompatibleCheckpoint { ends_at: Duration, start: Duration },
    #[display("internal simulation error: {message}")]
    Internal { message: String },
}

/// A directive whose arguments could not be turned into a task.
///
/// Reported per directive; the rest of the plan is simulated without it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Display, Error)]
#[display("directive {directive} ({activity_type}) failed to instantiate: {message}")]
pub struct InstantiationError {
    pub directive: ActivityDirectiveId,
    pub activity_type: String,
    pub message: String,
}

/// An error raised inside a task body.
///
/// The faulting task and every task blocked on it are aborted. Nothing already committed is
/// rolled back, and unrelated tasks keep running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Display, Error)]
#[display("task fault at {time}: {message}")]
pub struct TaskFault {
    pub time: Duration,
    pub directive: Option<ActivityDirectiveId>,
    pub activity_type: Option<String>,
    pub message: String,
}
