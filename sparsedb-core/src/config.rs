use sparsedb_codec::constants::NOMINAL_BUFFER_SIZE;

/// Tunables for one rank's assembly run. The defaults match the values
/// named in spec §9 DESIGN NOTES; callers running under memory or
/// worker-count constraints can override them.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Flush threshold for `profile.db`'s double-buffered output.
    pub nominal_buffer_size: usize,
    /// Rayon thread-pool size used for `cct.db`'s Phase D transpose.
    /// Zero means "use rayon's default global pool".
    pub worker_threads: usize,
    /// Per-thread `CtxRef` resolution cache size in `trace.db`.
    pub trace_cache_capacity: usize,
    /// Flush threshold for one thread's buffered trace samples.
    pub trace_buffer_threshold: usize,
    /// Upper bound on samples a single thread may append to `trace.db`.
    /// `trace.db`'s per-thread window is reserved at wavefront-complete,
    /// before any samples exist, so it must be sized from a configured
    /// ceiling rather than an observed count.
    pub max_samples_per_thread: u32,
}

impl Default for WriterConfig {
    fn default() -> Self {
        WriterConfig {
            nominal_buffer_size: NOMINAL_BUFFER_SIZE as usize,
            worker_threads: 0,
            trace_cache_capacity: 64,
            trace_buffer_threshold: 1024 * 1024,
            max_samples_per_thread: 1_000_000,
        }
    }
}
