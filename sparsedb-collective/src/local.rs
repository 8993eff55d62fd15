use crate::{Cohort, SharedCounter};

/// A degenerate single-rank cohort: every collective is the identity or
/// a local no-op. Used when the host process is not itself distributed,
/// or in tests that only need one rank's worth of behavior.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalCohort;

impl LocalCohort {
    pub fn new() -> Self {
        LocalCohort
    }
}

impl Cohort for LocalCohort {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn allreduce_sum_u64(&self, local: u64) -> u64 {
        local
    }

    fn allreduce_sum_vec_u64(&self, local: &[u64]) -> Vec<u64> {
        local.to_vec()
    }

    fn exscan_sum_u64(&self, _local: u64) -> Option<u64> {
        None
    }

    fn broadcast_bytes(&self, from_rank: usize, data: &[u8]) -> Vec<u8> {
        debug_assert_eq!(from_rank, 0, "only rank 0 exists in a LocalCohort");
        data.to_vec()
    }

    fn shared_counter(&self, base: u64) -> SharedCounter {
        SharedCounter::new(base)
    }
}
