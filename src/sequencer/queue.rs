use super::job::IrrigationJob;
use crate::types::{compare_priority_desc, Priority};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Priority queue: `Critical > High > Normal > Low`, FIFO within a
/// priority (spec.md §4.5).
pub struct JobQueue {
    inner: Mutex<VecDeque<IrrigationJob>>,
}

impl JobQueue {
    pub fn new() -> Self {
        Self { inner: Mutex::new(VecDeque::new()) }
    }

    /// Inserts `job` after the last job of equal-or-higher priority. Within
    /// a priority, orders driest-first by `vwc_margin`, then by zone id,
    /// then FIFO (spec.md §4.3 "driest first" tie-break).
    pub fn push(&self, job: IrrigationJob) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let insert_at = guard
            .iter()
            .position(|existing| match compare_priority_desc(existing.priority, job.priority) {
                std::cmp::Ordering::Greater => true,
                std::cmp::Ordering::Equal => same_priority_goes_after(existing, &job),
                std::cmp::Ordering::Less => false,
            })
            .unwrap_or(guard.len());
        guard.insert(insert_at, job);
    }

    pub fn pop_front(&self) -> Option<IrrigationJob> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn cancel_zone(&self, zone: crate::ids::ZoneId) {
        let mut guard = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        guard.retain(|job| !job.zone_ids().contains(&zone));
    }
}

impl Default for JobQueue {
    fn default() -> Self {
        Self::new()
    }
}

/// True if `existing` should stay behind `incoming` among same-priority
/// jobs: `incoming` is drier (larger `vwc_margin`), or tied and its lowest
/// zone id sorts first. Ties on both fall through to FIFO.
fn same_priority_goes_after(existing: &IrrigationJob, incoming: &IrrigationJob) -> bool {
    match incoming.vwc_margin.partial_cmp(&existing.vwc_margin) {
        Some(std::cmp::Ordering::Greater) => true,
        Some(std::cmp::Ordering::Less) | None => false,
        Some(std::cmp::Ordering::Equal) => incoming.zone_ids().into_iter().min() < existing.zone_ids().into_iter().min(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::EntityRef;
    use chrono::Utc;

    fn job(priority: Priority, reason: &'static str) -> IrrigationJob {
        IrrigationJob {
            shots: vec![],
            pump: EntityRef::switch("switch.pump"),
            main_valve: EntityRef::switch("switch.main"),
            priority,
            enqueued_at: Utc::now(),
            vwc_margin: 0.0,
            reason,
        }
    }

    #[test]
    fn higher_priority_jumps_ahead_of_lower() {
        let q = JobQueue::new();
        q.push(job(Priority::Normal, "a"));
        q.push(job(Priority::Normal, "b"));
        q.push(job(Priority::Critical, "c"));
        assert_eq!(q.pop_front().unwrap().reason, "c");
        assert_eq!(q.pop_front().unwrap().reason, "a");
        assert_eq!(q.pop_front().unwrap().reason, "b");
    }

    #[test]
    fn fifo_within_same_priority() {
        let q = JobQueue::new();
        q.push(job(Priority::High, "first"));
        q.push(job(Priority::High, "second"));
        assert_eq!(q.pop_front().unwrap().reason, "first");
        assert_eq!(q.pop_front().unwrap().reason, "second");
    }

    #[test]
    fn driest_margin_jumps_ahead_within_same_priority() {
        let q = JobQueue::new();
        let mut damp = job(Priority::Normal, "damp");
        damp.vwc_margin = 1.0;
        let mut dry = job(Priority::Normal, "dry");
        dry.vwc_margin = 8.0;
        q.push(damp);
        q.push(dry);
        assert_eq!(q.pop_front().unwrap().reason, "dry");
        assert_eq!(q.pop_front().unwrap().reason, "damp");
    }
}
