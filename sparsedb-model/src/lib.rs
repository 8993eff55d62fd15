//! Shared data-model types consumed by every `sparsedb-*` crate.
//!
//! These are newtype handles and small value types in the style of
//! `fxprof-processed-profile`'s `ThreadHandle`/`ProcessLibIndex`: cheap,
//! `Copy`, ordered where ordering matters for the k-way merge.

mod accumulator;
mod ids;
mod rank;
mod thread;

pub use accumulator::{Accumulator, MetricScope, PerMetric};
pub use ids::{ContextId, CtxRef, MetricId, ProfileIndex};
pub use rank::{RankIndex, WorldSize};
pub use thread::{IdTupleElement, ThreadId, ThreadIdentity};

pub use sparsedb_codec::constants::{LAST_MID_END, LAST_NODE_END, SUMMARY_PROFILE_INDEX};

/// Whether a context is a "line" scope context, load-bearing for the
/// formatter's function→execution metric duplication (spec §4.4 item 3,
/// §9 "line-scope duplication" open question). Preserved verbatim: do
/// not reinterpret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineScopeness {
    Line,
    NotLine,
}

/// A context as the core sees it: a dense id plus enough classification
/// to drive the formatter. Lexical/source information is owned by the
/// meta layer and out of scope here (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextInfo {
    pub id: ContextId,
    pub scope: LineScopeness,
}

/// Bookkeeping for one thread's `profile.db` record: built at the
/// wavefront, patched during the streaming flush (the offset field),
/// finally written to disk in the collective writer step (spec §3).
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileInfo {
    pub id_tuple_ptr: u64,
    pub num_vals: u64,
    pub num_nz_ctxs: u32,
    /// Absolute byte offset of this profile's data block. Starts at
    /// `u64::MAX` as a sentinel meaning "not yet patched"; the
    /// double-buffered output patches it in on flush.
    pub offset: u64,
}

impl ProfileInfo {
    pub const UNPATCHED_OFFSET: u64 = u64::MAX;

    pub fn new() -> Self {
        ProfileInfo {
            id_tuple_ptr: 0,
            num_vals: 0,
            num_nz_ctxs: 0,
            offset: Self::UNPATCHED_OFFSET,
        }
    }
}

/// Per-context byte offsets into `cct.db`, indexed `0..=num_contexts`
/// (the last entry is the end-of-data sentinel, spec §3 `CtxOffsets`).
#[derive(Debug, Clone, Default)]
pub struct CtxOffsets(pub Vec<u64>);

impl CtxOffsets {
    pub fn block_len(&self, ctx_index: usize) -> u64 {
        self.0[ctx_index + 1] - self.0[ctx_index]
    }

    pub fn num_contexts(&self) -> usize {
        self.0.len().saturating_sub(1)
    }
}

/// A contiguous half-open range of context ids forming one unit of
/// dynamic transpose work (spec §3 `CtxGroup`, §4.5 Phase B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtxGroup {
    pub first_ctx: u32,
    pub last_ctx: u32,
}

impl CtxGroup {
    pub fn len(&self) -> u32 {
        self.last_ctx - self.first_ctx
    }

    pub fn is_empty(&self) -> bool {
        self.last_ctx <= self.first_ctx
    }

    pub fn contains(&self, ctx_id: u32) -> bool {
        ctx_id >= self.first_ctx && ctx_id < self.last_ctx
    }
}

/// Per-thread timeline bookkeeping (spec §3 `ThreadTrace`).
#[derive(Debug, Clone, Copy)]
pub struct ThreadTraceHeader {
    pub profile_index: ProfileIndex,
    pub p_start: u64,
    pub p_end: u64,
}
