use crate::directive::ActivityDirectiveId;
use crate::duration::Duration;
use crate::engine::schedule::SpanId;
use crate::incremental::trace::TaskKey;
use std::collections::BTreeMap;

/// The activity a span was marked with by `start_activity`.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ActivityRecord {
    pub activity_type: String,
    pub arguments: serde_json::Value,
    pub output: Option<serde_json::Value>,
}

/// An interval of simulated time attributed to a group of tasks.
///
/// A span stays open while any task in it, or any span nested in it, is unfinished.
#[derive(Clone, Debug)]
pub(crate) struct Span {
    pub parent: Option<SpanId>,
    pub start: Duration,
    pub end: Option<Duration>,
    contributors: u32,
    /// A task in it was aborted, so it never finishes.
    abandoned: bool,
    pub activity: Option<ActivityRecord>,
    pub directive: Option<ActivityDirectiveId>,
    /// The task the span was opened for.
    pub origin: TaskKey,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct Spans {
    spans: BTreeMap<SpanId, Span>,
    next: u64,
}

impl Spans {
    /// Opens an empty span. A nested span counts as a contributor to its parent.
    pub fn open(&mut self, parent: Option<SpanId>, start: Duration, origin: TaskKey) -> SpanId {
        let id = SpanId(self.next);
        self.next += 1;
        if let Some(parent) = parent.and_then(|p| self.spans.get_mut(&p)) {
            parent.contributors += 1;
        }
        self.spans.insert(
            id,
            Span {
                parent,
                start,
                end: None,
                contributors: 0,
                abandoned: false,
                activity: None,
                directive: None,
                origin,
            },
        );
        id
    }

    pub fn add_contributor(&mut self, id: SpanId) {
        if let Some(span) = self.spans.get_mut(&id) {
            span.contributors += 1;
        }
    }

    /// Closes every span whose last contributor this was, walking up the nesting.
    pub fn remove_contributor(&mut self, id: SpanId, now: Duration) {
        let mut current = Some(id);
        while let Some(span) = current.and_then(|id| self.spans.get_mut(&id)) {
            span.contributors = span.contributors.saturating_sub(1);
            if span.contributors > 0 {
                break;
            }
            if !span.abandoned {
                span.end = Some(now);
            }
            current = span.parent;
        }
    }

    /// Removes a contributor that was aborted. The span is left unfinished.
    pub fn abandon(&mut self, id: SpanId, now: Duration) {
        if let Some(span) = self.spans.get_mut(&id) {
            span.abandoned = true;
        }
        self.remove_contributor(id, now);
    }

    /// Forgets a span that never had any work done in it.
    pub fn discard(&mut self, id: SpanId) {
        if let Some(parent) = self.spans.remove(&id).and_then(|s| s.parent) {
            if let Some(parent) = self.spans.get_mut(&parent) {
                parent.contributors = parent.contributors.saturating_sub(1);
            }
        }
    }

    #[cfg(test)]
    pub fn get(&self, id: SpanId) -> Option<&Span> {
        self.spans.get(&id)
    }

    pub fn get_mut(&mut self, id: SpanId) -> Option<&mut Span> {
        self.spans.get_mut(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SpanId, &Span)> {
        self.spans.iter().map(|(id, span)| (*id, span))
    }

    fn ancestors(&self, id: SpanId) -> impl Iterator<Item = &Span> {
        let mut current = self.spans.get(&id);
        std::iter::from_fn(move || {
            let span = current?;
            current = span.parent.and_then(|p| self.spans.get(&p));
            Some(span)
        })
    }

    pub fn nearest_directive(&self, id: SpanId) -> Option<ActivityDirectiveId> {
        self.ancestors(id).find_map(|s| s.directive)
    }

    pub fn nearest_activity_type(&self, id: SpanId) -> Option<String> {
        self.ancestors(id)
            .find_map(|s| s.activity.as_ref().map(|a| a.activity_type.clone()))
    }

    /// The closest proper ancestor that is an activity.
    pub fn parent_activity(&self, id: SpanId) -> Option<SpanId> {
        let mut current = self.spans.get(&id)?.parent;
        while let Some(parent) = current {
            let span = self.spans.get(&parent)?;
            if span.activity.is_some() {
                return Some(parent);
            }
            current = span.parent;
        }
        None
    }

    pub fn directive_span(&self, directive: ActivityDirectiveId) -> Option<&Span> {
        self.spans.values().find(|s| s.directive == Some(directive))
    }
}
