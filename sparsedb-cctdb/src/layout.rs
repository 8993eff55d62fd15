//! Phase A (per-context byte offsets) and Phase B (work grouping) of
//! the transpose (spec §4.5).

use sparsedb_codec::align8;
use sparsedb_codec::constants::{
    CCT_DB_HEADER_SIZE, CTX_INFO_RECORD_SIZE, MAX_GROUP_SIZE, METRIC_INDEX_PAIR_SIZE,
    VALUE_PROFIDX_PAIR_SIZE,
};
use sparsedb_collective::Cohort;
use sparsedb_model::{CtxGroup, CtxOffsets};

/// Computes the global, byte-exact start offset of every context's
/// metric block in `cct.db`, plus a trailing total (spec §4.5 Phase A).
///
/// Every rank passes its own per-context nonzero-value and
/// nonzero-metric-id counts, both dense arrays of length `ctxcnt`. Only
/// rank 0's nonzero-metric-id count is used when sizing the trailing
/// metric-index table: rank 0 owns the summary profile, whose
/// per-context metric-id set is the union over every thread in the
/// whole run, so it alone carries a globally correct count. Other
/// ranks' local distinct-metric counts are partial and are not added
/// (spec §9, preserved verbatim from the source format).
pub fn compute_ctx_offsets(
    cohort: &dyn Cohort,
    local_ctx_nzval_counts: &[u64],
    local_ctx_nzmids_counts: &[u64],
) -> CtxOffsets {
    let ctxcnt = local_ctx_nzval_counts.len();
    debug_assert_eq!(local_ctx_nzmids_counts.len(), ctxcnt);

    let seed = if cohort.rank() == 0 {
        align8(ctxcnt as u64 * CTX_INFO_RECORD_SIZE) + CCT_DB_HEADER_SIZE
    } else {
        0
    };

    let mut prefixed = vec![0u64; ctxcnt + 1];
    let mut running = seed;
    for i in 0..ctxcnt {
        prefixed[i] = running;
        let mut size = local_ctx_nzval_counts[i] * VALUE_PROFIDX_PAIR_SIZE;
        if cohort.rank() == 0 && local_ctx_nzmids_counts[i] > 0 {
            size += (local_ctx_nzmids_counts[i] + 1) * METRIC_INDEX_PAIR_SIZE;
        }
        running += size;
    }
    prefixed[ctxcnt] = running;

    CtxOffsets(cohort.allreduce_sum_vec_u64(&prefixed))
}

/// Splits `0..ctxcnt` into groups no heavier than `min(3 GiB,
/// total-bytes / (3 * world-size))`, the unit of dynamic work
/// distribution for Phase D (spec §4.5 Phase B).
pub fn compute_groups(ctx_offsets: &CtxOffsets, world_size: usize) -> Vec<CtxGroup> {
    let ctxcnt = ctx_offsets.num_contexts();
    if ctxcnt == 0 {
        return Vec::new();
    }
    let total = ctx_offsets.0[ctxcnt] - ctx_offsets.0[0];
    let limit = MAX_GROUP_SIZE.min(total / (3 * world_size as u64).max(1)).max(1);

    let mut boundaries = vec![0u32];
    let mut cur_size = 0u64;
    for i in 0..ctxcnt {
        let size = ctx_offsets.block_len(i);
        if cur_size + size > limit {
            boundaries.push(i as u32);
            cur_size = 0;
        }
        cur_size += size;
    }
    boundaries.push(ctxcnt as u32);

    boundaries
        .windows(2)
        .map(|w| CtxGroup { first_ctx: w[0], last_ctx: w[1] })
        .collect()
}

/// Splits one group's context range into up to `team_size` sub-ranges
/// of roughly equal byte size, for distributing a single group's merge
/// across a rank's own worker threads (spec §4.5 Phase D, the
/// `ctxRanges` intra-group split).
pub fn split_group_for_threads(group: CtxGroup, ctx_offsets: &CtxOffsets, team_size: usize) -> Vec<CtxGroup> {
    if group.is_empty() || team_size <= 1 {
        return vec![group];
    }
    let total = ctx_offsets.0[group.last_ctx as usize] - ctx_offsets.0[group.first_ctx as usize];
    let target = total / team_size as u64;

    let mut ranges = Vec::with_capacity(team_size);
    let mut cur_size = 0u64;
    let mut range_start = group.first_ctx;
    for id in group.first_ctx..group.last_ctx {
        if ranges.len() + 1 == team_size {
            break;
        }
        cur_size += ctx_offsets.block_len(id as usize);
        if cur_size > target {
            ranges.push(CtxGroup { first_ctx: range_start, last_ctx: id + 1 });
            range_start = id + 1;
            cur_size = 0;
        }
    }
    if ranges.is_empty() || ranges.last().unwrap().last_ctx < group.last_ctx {
        ranges.push(CtxGroup { first_ctx: range_start, last_ctx: group.last_ctx });
    }
    ranges
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparsedb_collective::LocalCohort;

    #[test]
    fn single_rank_offsets_seed_with_header_and_ctx_info_size() {
        let cohort = LocalCohort::new();
        let nzval = [2u64, 0, 5];
        let nzmids = [1u64, 0, 2];
        let offsets = compute_ctx_offsets(&cohort, &nzval, &nzmids);

        let seed = align8(3 * CTX_INFO_RECORD_SIZE) + CCT_DB_HEADER_SIZE;
        assert_eq!(offsets.0[0], seed);
        // ctx 0: 2 vals * 12B + (1+1) metric pairs * 10B
        assert_eq!(offsets.block_len(0), 2 * VALUE_PROFIDX_PAIR_SIZE + 2 * METRIC_INDEX_PAIR_SIZE);
        // ctx 1: no values, no metric table at all (nzmids = 0)
        assert_eq!(offsets.block_len(1), 0);
        // ctx 2: 5 vals * 12B + (2+1) metric pairs * 10B
        assert_eq!(offsets.block_len(2), 5 * VALUE_PROFIDX_PAIR_SIZE + 3 * METRIC_INDEX_PAIR_SIZE);
    }

    #[test]
    fn groups_split_on_byte_limit() {
        let offsets = CtxOffsets(vec![0, 100, 200, 300, 400]);
        let groups = compute_groups(&offsets, 1);
        // total=400, limit=min(3GiB,400/3)=133
        assert!(groups.iter().all(|g| !g.is_empty() || g.first_ctx == g.last_ctx));
        assert_eq!(groups.first().unwrap().first_ctx, 0);
        assert_eq!(groups.last().unwrap().last_ctx, 4);
    }

    #[test]
    fn empty_cctdb_has_no_groups() {
        let offsets = CtxOffsets(vec![0]);
        assert!(compute_groups(&offsets, 4).is_empty());
    }
}
