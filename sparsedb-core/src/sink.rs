use sparsedb_model::{Accumulator, ContextId, CtxRef, ProfileIndex, ThreadIdentity};
use sparsedb_tracedb::CtxRefResolver;

use crate::error::AssembleError;

/// Announces a thread the host is about to measure. `local_index` is a
/// per-rank ordinal the host assigns (dense, starting at 0); the core
/// resolves it to the true global `ProfileIndex` once every rank's
/// thread count is known at [`ProfileSink::wavefront_complete`].
#[derive(Debug, Clone)]
pub struct ThreadStart {
    pub local_index: u32,
    pub identity: ThreadIdentity,
}

/// One thread's finished metric accumulation, ready to format into
/// `profile.db` (spec §3 `Accumulator`).
pub type ThreadAccumulators = Accumulator;

/// The seam the measurement layer drives to assemble `profile.db`,
/// `cct.db`, and `trace.db` for one rank (spec §6 EXTERNAL INTERFACES).
/// Every method that touches the cohort's collective operations must be
/// called by every rank, in the same order; `thread_final`, `timepoint`,
/// and `rewind` are local once `wavefront_complete` has returned.
pub trait ProfileSink {
    /// Registers a thread before its wavefront completes. May be called
    /// any number of times before [`wavefront_complete`](Self::wavefront_complete).
    fn thread_start(&self, thread: ThreadStart);

    /// Signals that every thread this rank will ever register has been
    /// announced, and that `contexts` is the full, dense context id
    /// space for the run. Collective: every rank must call this with
    /// its own local thread count.
    fn wavefront_complete(&self, contexts: Vec<ContextId>, threads: usize) -> Result<(), AssembleError>;

    /// Submits a thread's final accumulated metrics for formatting into
    /// its `profile.db` data block.
    fn thread_final(&self, thread: ProfileIndex, accumulators: ThreadAccumulators) -> Result<(), AssembleError>;

    /// Appends `(timestamp, context-reference)` samples to a thread's
    /// trace timeline.
    fn timepoint(&self, thread: ProfileIndex, samples: &[(u64, CtxRef)], resolver: &dyn CtxRefResolver) -> Result<(), AssembleError>;

    /// Discards every sample appended to a thread's timeline since its
    /// window opened; only the last pass before `write` is kept.
    fn rewind(&self, thread: ProfileIndex) -> Result<(), AssembleError>;

    /// Drains all three files to completion. Collective.
    fn write(self) -> Result<(), AssembleError>;
}
