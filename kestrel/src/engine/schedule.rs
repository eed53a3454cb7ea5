use crate::duration::Duration;
use ahash::AHashMap;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TaskId(pub u64);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ConditionId(pub u64);

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct SpanId(pub u64);

/// Something the engine has to do at a scheduled time.
///
/// Within one instant, jobs run in this order: tasks, then conditions, then resources.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum JobId {
    Task(TaskId),
    Condition(ConditionId),
    Resource(usize),
}

/// Jobs keyed by time. A job is scheduled at most once; rescheduling moves it.
#[derive(Clone, Default, Debug)]
pub struct JobSchedule {
    by_time: BTreeMap<Duration, BTreeSet<JobId>>,
    scheduled: AHashMap<JobId, Duration>,
}

impl JobSchedule {
    pub fn schedule(&mut self, job: JobId, time: Duration) {
        if let Some(previous) = self.scheduled.insert(job, time) {
            self.remove_at(job, previous);
        }
        self.by_time.entry(time).or_default().insert(job);
    }

    pub fn unschedule(&mut self, job: JobId) {
        if let Some(previous) = self.scheduled.remove(&job) {
            self.remove_at(job, previous);
        }
    }

    fn remove_at(&mut self, job: JobId, time: Duration) {
        if let Some(jobs) = self.by_time.get_mut(&time) {
            jobs.remove(&job);
            if jobs.is_empty() {
                self.by_time.remove(&time);
            }
        }
    }

    pub fn time_of(&self, job: JobId) -> Option<Duration> {
        self.scheduled.get(&job).copied()
    }

    pub fn next_time(&self) -> Option<Duration> {
        self.by_time.keys().next().copied()
    }

    /// Removes and returns every job at the earliest scheduled time, if that time is at or
    /// before `max`.
    pub fn extract_next(&mut self, max: Duration) -> Option<(Duration, Vec<JobId>)> {
        let time = self.next_time().filter(|t| *t <= max)?;
        let jobs = self.by_time.remove(&time).unwrap_or_default();
        for job in &jobs {
            self.scheduled.remove(job);
        }
        Some((time, jobs.into_iter().collect()))
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.scheduled.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rescheduling_moves_jobs() {
        let mut schedule = JobSchedule::default();
        schedule.schedule(JobId::Resource(0), Duration::seconds(5));
        schedule.schedule(JobId::Task(TaskId(1)), Duration::seconds(5));
        schedule.schedule(JobId::Resource(0), Duration::seconds(1));

        assert_eq!(Some(Duration::seconds(1)), schedule.next_time());
        assert_eq!(None, schedule.extract_next(Duration::ZERO));
        assert_eq!(
            Some((Duration::seconds(1), vec![JobId::Resource(0)])),
            schedule.extract_next(Duration::MAX)
        );
        assert_eq!(
            Some((Duration::seconds(5), vec![JobId::Task(TaskId(1))])),
            schedule.extract_next(Duration::MAX)
        );
        assert!(schedule.is_empty());
    }

    #[test]
    fn jobs_in_a_batch_are_ordered_by_kind() {
        let mut schedule = JobSchedule::default();
        schedule.schedule(JobId::Resource(3), Duration::ZERO);
        schedule.schedule(JobId::Condition(ConditionId(0)), Duration::ZERO);
        schedule.schedule(JobId::Task(TaskId(7)), Duration::ZERO);
        schedule.schedule(JobId::Task(TaskId(2)), Duration::ZERO);
        let (_, jobs) = schedule.extract_next(Duration::ZERO).unwrap();
        assert_eq!(
            vec![
                JobId::Task(TaskId(2)),
                JobId::Task(TaskId(7)),
                JobId::Condition(ConditionId(0)),
                JobId::Resource(3)
            ],
            jobs
        );
    }
}
