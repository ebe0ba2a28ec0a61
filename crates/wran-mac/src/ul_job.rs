use std::time::Duration;

use wran_core::{Sfid, SsId};

use crate::service_flow::SchedulingType;

/// What a job asks for: a data grant, or a unicast polling opportunity to
/// send a bandwidth request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReqType {
    Data,
    UnicastPolling,
}

/// One unit of schedulable uplink demand.
///
/// A job lives in exactly one of the three priority queues; migration
/// between queues is pop-then-push, never duplication.
#[derive(Debug, Clone, PartialEq)]
pub struct UlJob {
    pub ss: SsId,
    pub sfid: Sfid,
    pub scheduling: SchedulingType,
    pub req_type: ReqType,
    /// Demand in bytes; meaningful for Data jobs only
    pub size: u32,
    pub release_time: Duration,
    pub period: Duration,
    pub deadline: Duration,
}

/// Promotion candidate produced by the minimum-bandwidth pass: an
/// intermediate-queue index with its computed priority.
#[derive(Debug, Clone, Copy)]
pub(crate) struct PriorityUlJob {
    pub priority: i64,
    pub backlogged: u32,
    /// Index into the intermediate queue at computation time
    pub index: usize,
}

/// Sort promotion candidates: highest priority first; on equal priority the
/// smaller backlog wins, so small flows finish instead of large ones
/// starving them further.
pub(crate) fn sort_priority_jobs(candidates: &mut [PriorityUlJob]) {
    candidates.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then(a.backlogged.cmp(&b.backlogged))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ordering_with_tie_break() {
        let mut candidates = vec![
            PriorityUlJob { priority: 100, backlogged: 500, index: 0 },
            PriorityUlJob { priority: 200, backlogged: 900, index: 1 },
            PriorityUlJob { priority: 100, backlogged: 200, index: 2 },
            PriorityUlJob { priority: -10000, backlogged: 10, index: 3 },
        ];
        sort_priority_jobs(&mut candidates);

        let order: Vec<usize> = candidates.iter().map(|c| c.index).collect();
        // Highest priority first; the 100-tie is broken by lower backlog
        assert_eq!(order, vec![1, 2, 0, 3]);
    }
}
