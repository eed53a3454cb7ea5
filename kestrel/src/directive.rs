use crate::duration::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

/// Unique, stable identifier of a directive within a plan.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Debug, Default,
)]
#[serde(transparent)]
pub struct ActivityDirectiveId(pub u64);

impl ActivityDirectiveId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }
}

impl Display for ActivityDirectiveId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which point of the anchor target a directive's start offset is measured from.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize, Debug, Default)]
pub enum AnchorPoint {
    #[default]
    Start,
    End,
}

/// A request to run an activity, placed relative to the plan or to another directive.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityDirective {
    pub start_offset: Duration,
    pub activity_type: String,
    pub arguments: serde_json::Value,
    /// `None` anchors to the plan itself.
    pub anchor_id: Option<ActivityDirectiveId>,
    pub anchor_point: AnchorPoint,
}

impl ActivityDirective {
    /// A directive anchored to the start of the plan.
    pub fn new(
        start_offset: Duration,
        activity_type: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            start_offset,
            activity_type: activity_type.into(),
            arguments,
            anchor_id: None,
            anchor_point: AnchorPoint::Start,
        }
    }

    /// Anchors to the start or end of another directive.
    pub fn anchored_to(mut self, anchor: ActivityDirectiveId, point: AnchorPoint) -> Self {
        self.anchor_id = Some(anchor);
        self.anchor_point = point;
        self
    }

    /// Anchors to the end of the plan.
    pub fn anchored_to_plan_end(mut self) -> Self {
        self.anchor_id = None;
        self.anchor_point = AnchorPoint::End;
        self
    }

    pub fn anchored_to_start(&self) -> bool {
        self.anchor_point == AnchorPoint::Start
    }
}

/// A plan's directives, iterated in id order.
pub type Schedule = BTreeMap<ActivityDirectiveId, ActivityDirective>;

/// How one schedule differs from another.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScheduleDiff {
    pub added: BTreeSet<ActivityDirectiveId>,
    pub removed: BTreeSet<ActivityDirectiveId>,
    pub modified: BTreeSet<ActivityDirectiveId>,
    pub unchanged: BTreeSet<ActivityDirectiveId>,
}

impl ScheduleDiff {
    pub fn between(old: &Schedule, new: &Schedule) -> Self {
        let mut diff = ScheduleDiff::default();
        for (id, directive) in new {
            match old.get(id) {
                None => diff.added.insert(*id),
                Some(previous) if previous == directive => diff.unchanged.insert(*id),
                Some(_) => diff.modified.insert(*id),
            };
        }
        diff.removed = old
            .keys()
            .filter(|id| !new.contains_key(id))
            .copied()
            .collect();
        diff
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    /// Directives that exist in only one schedule or differ between them.
    pub fn changed(&self) -> impl Iterator<Item = ActivityDirectiveId> + '_ {
        self.added
            .iter()
            .chain(&self.removed)
            .chain(&self.modified)
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_classifies_directives() {
        let id = ActivityDirectiveId::new;
        let a = ActivityDirective::new(Duration::ZERO, "A", json!({}));
        let b = ActivityDirective::new(Duration::SECOND, "B", json!({}));
        let old: Schedule = [(id(1), a.clone()), (id(2), b.clone())].into();
        let mut moved = b.clone();
        moved.start_offset = Duration::MINUTE;
        let new: Schedule = [(id(1), a), (id(2), moved), (id(3), b)].into();

        let diff = ScheduleDiff::between(&old, &new);
        assert_eq!(BTreeSet::from([id(3)]), diff.added);
        assert_eq!(BTreeSet::from([id(2)]), diff.modified);
        assert_eq!(BTreeSet::from([id(1)]), diff.unchanged);
        assert!(diff.removed.is_empty());

        let back = ScheduleDiff::between(&new, &old);
        assert_eq!(BTreeSet::from([id(3)]), back.removed);
    }
}
