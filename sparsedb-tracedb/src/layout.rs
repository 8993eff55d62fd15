//! Header assignment: each thread's reserved `[pStart, pEnd)` sample
//! window, computed collectively at wavefront-complete (spec §4.6).

use sparsedb_codec::align8;
use sparsedb_codec::constants::{TRACE_DB_HEADER_SIZE, TRACE_HEADER_RECORD_SIZE, TRACE_SAMPLE_RECORD_SIZE};
use sparsedb_collective::Cohort;

/// The collectively-agreed placement of `trace.db`'s sections: the
/// trace-header array, and, for this rank, each local thread's reserved
/// sample window within the data region.
pub struct TraceLayout {
    pub trace_hdrs_sec_ptr: u64,
    pub num_threads: u32,
    pub data_region_base: u64,
    /// Total bytes reserved for sample data across every rank, used to
    /// place the footer: the data region's size is fixed by each
    /// thread's maximum possible sample count, not by how much it
    /// actually writes.
    pub total_reserved_bytes: u64,
    /// Per local thread, in the same order as the input slice: its
    /// reserved `[pStart, pEnd)` window.
    pub thread_windows: Vec<(u64, u64)>,
}

/// `local_max_sample_counts[i]` is the maximum possible sample count for
/// this rank's i-th thread, known once its wavefront completes.
pub fn compute_layout(cohort: &dyn Cohort, local_max_sample_counts: &[u32]) -> TraceLayout {
    let local_thread_count = local_max_sample_counts.len() as u64;
    let total_threads = cohort.allreduce_sum_u64(local_thread_count);

    let trace_hdrs_sec_ptr = TRACE_DB_HEADER_SIZE;
    // Slot 0 is reserved for the summary profile, which never owns a
    // trace thread; thread-header records are addressed by the global
    // `ProfileIndex` space (1..=total_threads), so the array must hold
    // one more slot than the real thread count (mirrors profile.db's
    // `1 + total_threads` prof-info reservation).
    let reserved_slots = total_threads + 1;
    let data_region_base = align8(trace_hdrs_sec_ptr + reserved_slots * TRACE_HEADER_RECORD_SIZE);

    let sizes: Vec<u64> = local_max_sample_counts
        .iter()
        .map(|&count| align8(count as u64 * TRACE_SAMPLE_RECORD_SIZE))
        .collect();
    let local_total: u64 = sizes.iter().sum();

    let total_reserved_bytes = cohort.allreduce_sum_u64(local_total);
    let rank_bias = cohort.exscan_sum_u64(local_total).unwrap_or(0);
    let rank_base = data_region_base + rank_bias;

    let mut thread_windows = Vec::with_capacity(sizes.len());
    let mut cursor = rank_base;
    for &size in &sizes {
        thread_windows.push((cursor, cursor + size));
        cursor += size;
    }

    TraceLayout {
        trace_hdrs_sec_ptr,
        num_threads: total_threads as u32,
        data_region_base,
        total_reserved_bytes,
        thread_windows,
    }
}
