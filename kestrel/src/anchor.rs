//! Resolution of relatively anchored directives into offsets from their nearest fixed anchor.
//!
//! A directive anchored to another's *start* can be resolved by offset arithmetic alone, so
//! start-anchored chains collapse into the group of their root. A directive anchored to
//! another's *end* depends on a duration that is only known once the target has been
//! simulated, so it stays grouped under its target and is started by the engine after the
//! target finishes.

use crate::directive::{ActivityDirectiveId, Schedule};
use crate::duration::Duration;
use crate::error::AnchorError;
use ahash::AHashMap;
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Resolved offsets grouped by anchor target. The `None` key is the plan itself.
pub type AnchorMap = BTreeMap<Option<ActivityDirectiveId>, Vec<(ActivityDirectiveId, Duration)>>;

/// Below this many directives a reduction is done sequentially.
const SEQUENTIAL_THRESHOLD: usize = 256;

#[derive(Copy, Clone, Debug)]
enum Link {
    /// Offset is relative to the given fixed anchor.
    Resolved(Option<ActivityDirectiveId>),
    /// Offset is relative to the start of the given directive, whose own link is not yet folded in.
    Pending(usize),
}

pub struct StartOffsetReducer<'a> {
    plan_duration: Duration,
    schedule: &'a Schedule,
}

impl<'a> StartOffsetReducer<'a> {
    pub fn new(plan_duration: Duration, schedule: &'a Schedule) -> Self {
        Self {
            plan_duration,
            schedule,
        }
    }

    /// Groups every directive under its nearest fixed anchor.
    ///
    /// Directives anchored to the plan's end are resolved against the plan duration. Within
    /// a group, directives keep the order of their ids.
    pub fn compute(&self) -> Result<AnchorMap, AnchorError> {
        if self.schedule.is_empty() {
            return Ok(AnchorMap::new());
        }

        let ids: Vec<ActivityDirectiveId> = self.schedule.keys().copied().collect();
        let positions: AHashMap<ActivityDirectiveId, usize> =
            ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut links = Vec::with_capacity(ids.len());
        for (id, directive) in self.schedule {
            let link = match directive.anchor_id {
                None if directive.anchored_to_start() => {
                    (Link::Resolved(None), directive.start_offset)
                }
                None => (
                    Link::Resolved(None),
                    self.plan_duration + directive.start_offset,
                ),
                Some(anchor) => {
                    let Some(&position) = positions.get(&anchor) else {
                        return Err(AnchorError::MissingAnchor {
                            directive: *id,
                            anchor,
                        });
                    };
                    if directive.anchored_to_start() {
                        (Link::Pending(position), directive.start_offset)
                    } else {
                        (Link::Resolved(Some(anchor)), directive.start_offset)
                    }
                }
            };
            links.push(link);
        }

        // Pointer jumping: every round halves the length of each remaining start-anchored chain.
        let mut rounds = 0;
        while links.iter().any(|(l, _)| matches!(l, Link::Pending(_))) {
            if rounds > usize::BITS - links.len().leading_zeros() + 1 {
                let directives = links
                    .iter()
                    .zip(&ids)
                    .filter(|((l, _), _)| matches!(l, Link::Pending(_)))
                    .map(|(_, id)| *id)
                    .collect();
                return Err(AnchorError::Cycle { directives });
            }
            links = links
                .par_iter()
                .map(|&(link, offset)| match link {
                    Link::Pending(target) => {
                        let (target_link, target_offset) = links[target];
                        (target_link, offset + target_offset)
                    }
                    resolved => (resolved, offset),
                })
                .collect();
            rounds += 1;
        }
        trace!("resolved start anchors in {rounds} rounds");

        let resolved: Vec<(ActivityDirectiveId, Option<ActivityDirectiveId>, Duration)> = ids
            .iter()
            .zip(links)
            .map(|(id, (link, offset))| match link {
                Link::Resolved(anchor) => (*id, anchor, offset),
                Link::Pending(_) => unreachable!("all links resolved above"),
            })
            .collect();

        let map = group(&resolved);
        check_reachable(&map, &ids)?;
        Ok(map)
    }
}

/// Halving reduction into target groups. Merging concatenates, so input order is preserved.
fn group(resolved: &[(ActivityDirectiveId, Option<ActivityDirectiveId>, Duration)]) -> AnchorMap {
    if resolved.len() <= SEQUENTIAL_THRESHOLD {
        let mut map = AnchorMap::new();
        for (id, anchor, offset) in resolved {
            map.entry(*anchor).or_default().push((*id, *offset));
        }
        return map;
    }
    let (left, right) = resolved.split_at(resolved.len() / 2);
    let (mut left, right) = rayon::join(|| group(left), || group(right));
    for (anchor, entries) in right {
        left.entry(anchor).or_default().extend(entries);
    }
    left
}

/// End anchors can still form cycles that never reach the plan.
fn check_reachable(map: &AnchorMap, ids: &[ActivityDirectiveId]) -> Result<(), AnchorError> {
    let mut reached = BTreeSet::new();
    let mut frontier = vec![None];
    while let Some(anchor) = frontier.pop() {
        for (id, _) in map.get(&anchor).into_iter().flatten() {
            if reached.insert(*id) {
                frontier.push(Some(*id));
            }
        }
    }
    if reached.len() == ids.len() {
        Ok(())
    } else {
        Err(AnchorError::Cycle {
            directives: ids
                .iter()
                .filter(|id| !reached.contains(id))
                .copied()
                .collect(),
        })
    }
}

/// Removes plan-anchored directives that would start before the plan, along with everything
/// anchored to them, directly or through a chain.
///
/// Negative offsets relative to another directive are kept. The input is not modified.
pub fn filter_out_negative_start_offset(to_filter: &AnchorMap) -> Result<AnchorMap, AnchorError> {
    if to_filter.is_empty() {
        return Ok(AnchorMap::new());
    }
    let Some(plan_anchored) = to_filter.get(&None) else {
        return Err(AnchorError::NoPlanAnchor);
    };

    let mut result = to_filter.clone();
    let mut removed: Vec<ActivityDirectiveId> = plan_anchored
        .iter()
        .filter(|(_, offset)| offset.is_negative())
        .map(|(id, _)| *id)
        .collect();
    result.insert(
        None,
        plan_anchored
            .iter()
            .filter(|(_, offset)| !offset.is_negative())
            .copied()
            .collect(),
    );

    while let Some(id) = removed.pop() {
        if let Some(dependents) = result.remove(&Some(id)) {
            removed.extend(dependents.into_iter().map(|(dependent, _)| dependent));
        }
    }
    Ok(result)
}

/// Shifts every offset in a group by `difference`, as when the simulation starts
/// `difference` after the plan.
pub fn adjust_start_offset(
    group: &[(ActivityDirectiveId, Duration)],
    difference: Duration,
) -> Vec<(ActivityDirectiveId, Duration)> {
    group
        .iter()
        .map(|(id, offset)| (*id, *offset - difference))
        .collect()
}

/// The earliest time each directive could start, for directives whose start doesn't depend on
/// another directive's duration. End-anchored chains are assumed to start no earlier than
/// their target.
pub fn minimum_start_times(map: &AnchorMap) -> BTreeMap<ActivityDirectiveId, Duration> {
    let mut result = BTreeMap::new();
    let mut frontier: Vec<(Option<ActivityDirectiveId>, Duration)> = vec![(None, Duration::ZERO)];
    while let Some((anchor, base)) = frontier.pop() {
        for (id, offset) in map.get(&anchor).into_iter().flatten() {
            let start = base + *offset;
            result.insert(*id, start);
            frontier.push((Some(*id), start));
        }
    }
    result
}
