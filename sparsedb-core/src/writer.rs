//! Wires [`sparsedb_profiledb`], [`sparsedb_cctdb`], and
//! [`sparsedb_tracedb`] behind one [`ProfileSink`] (spec §6).

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use sparsedb_cctdb::CctDbWriter;
use sparsedb_codec::constants::SUMMARY_PROFILE_INDEX;
use sparsedb_codec::records::IdTuple;
use sparsedb_collective::Cohort;
use sparsedb_model::{Accumulator, ContextId, ContextInfo, CtxRef, MetricId, ProfileIndex, ThreadIdentity};
use sparsedb_profiledb::{format_thread, to_wire_id_tuple, MetricScopeIds, ProfileDbWriter};
use sparsedb_tracedb::{CtxRefResolver, TraceDbWriter};

use crate::config::WriterConfig;
use crate::error::{AssembleError, Result};
use crate::formats::write_formats_doc;
use crate::sink::{ProfileSink, ThreadAccumulators, ThreadStart};

/// This rank's output file paths.
#[derive(Debug, Clone)]
pub struct SparseDbPaths {
    pub profile_db: PathBuf,
    pub cct_db: PathBuf,
    pub trace_db: PathBuf,
    pub formats_md: PathBuf,
}

struct PendingThread {
    local_index: u32,
    identity: ThreadIdentity,
}

struct ActiveState {
    local_to_global: HashMap<u32, ProfileIndex>,
    id_tuple_ptrs: HashMap<u32, u64>,
    profile_writer: ProfileDbWriter,
    trace_writer: TraceDbWriter,
    cct_db_file: File,
    ctx_nzval_counts: Vec<u64>,
    ctx_nzmids: Vec<HashSet<MetricId>>,
    track_nzmids: bool,
}

enum Phase {
    Collecting(Vec<PendingThread>),
    Active(ActiveState),
}

/// Assembles one rank's share of `profile.db`, `cct.db`, and `trace.db`
/// behind a single [`ProfileSink`]. Threads are addressed throughout by
/// the same per-rank local ordinal the host picked in
/// [`ThreadStart::local_index`]; the true, collectively-resolved global
/// profile index never crosses this trait's boundary.
pub struct SparseDbWriter {
    cohort: Arc<dyn Cohort>,
    paths: SparseDbPaths,
    config: WriterConfig,
    contexts: Vec<ContextInfo>,
    metric_scope_ids: HashMap<MetricId, MetricScopeIds>,
    phase: Mutex<Phase>,
}

impl SparseDbWriter {
    /// `contexts` is the full, dense context space for this run,
    /// pre-built by the calling-context-tree collaborator the core
    /// never constructs (spec §6).
    pub fn new(
        cohort: Arc<dyn Cohort>,
        paths: SparseDbPaths,
        contexts: Vec<ContextInfo>,
        metric_scope_ids: HashMap<MetricId, MetricScopeIds>,
        config: WriterConfig,
    ) -> Self {
        SparseDbWriter {
            cohort,
            paths,
            config,
            contexts,
            metric_scope_ids,
            phase: Mutex::new(Phase::Collecting(Vec::new())),
        }
    }
}

impl ProfileSink for SparseDbWriter {
    fn thread_start(&self, thread: ThreadStart) {
        let mut phase = self.phase.lock();
        match &mut *phase {
            Phase::Collecting(pending) => pending.push(PendingThread {
                local_index: thread.local_index,
                identity: thread.identity,
            }),
            Phase::Active(_) => {
                log::error!(
                    "sparsedb-core: thread_start({}) called after wavefront_complete; ignoring",
                    thread.local_index
                );
            }
        }
    }

    fn wavefront_complete(&self, contexts: Vec<ContextId>, threads: usize) -> Result<()> {
        let mut phase = self.phase.lock();
        let pending = match &mut *phase {
            Phase::Collecting(pending) => std::mem::take(pending),
            Phase::Active(_) => return Ok(()),
        };
        debug_assert_eq!(pending.len(), threads, "reported thread count disagrees with thread_start calls");
        debug_assert_eq!(contexts.len(), self.contexts.len(), "wavefront context set disagrees with the pre-built context list");

        let local_thread_count = pending.len() as u32;
        let local_id_tuple_bytes: u64 = pending
            .iter()
            .map(|p| to_wire_id_tuple(&p.identity).encoded_len())
            .sum();

        let profile_writer = ProfileDbWriter::setup(
            Arc::clone(&self.cohort),
            open_rw(&self.paths.profile_db)?,
            local_thread_count,
            local_id_tuple_bytes,
            self.config.nominal_buffer_size,
        )?;

        // Global index 0 is reserved for the summary profile; real
        // threads on this rank start at 1 + this rank's thread-count
        // prefix sum.
        let bias = 1 + self.cohort.exscan_sum_u64(local_thread_count as u64).unwrap_or(0);

        let mut local_to_global = HashMap::with_capacity(pending.len());
        let mut id_tuple_ptrs = HashMap::with_capacity(pending.len());
        let mut trace_threads = Vec::with_capacity(pending.len());
        for p in &pending {
            let global = ProfileIndex((bias + p.local_index as u64) as u32);
            let ptr = profile_writer.register_id_tuple(&to_wire_id_tuple(&p.identity))?;
            local_to_global.insert(p.local_index, global);
            id_tuple_ptrs.insert(p.local_index, ptr);
            trace_threads.push((global, self.config.max_samples_per_thread));
        }

        let track_nzmids = self.cohort.rank() == 0;
        if track_nzmids {
            // The summary profile's accumulator is the union over the
            // whole run, computed upstream of this crate (spec §1
            // Non-goals: the analysis pass that derives it is out of
            // scope); absent that input, an empty accumulator produces
            // the well-formed degenerate record spec §8 describes for
            // "accumulator empty for every context".
            let summary_ptr = profile_writer.register_id_tuple(&IdTuple::default())?;
            let summary = format_thread(&Accumulator::new(), &self.contexts, &self.metric_scope_ids)?;
            profile_writer.write_thread(SUMMARY_PROFILE_INDEX, summary_ptr, &summary)?;
        }

        let trace_writer = TraceDbWriter::setup(
            Arc::clone(&self.cohort),
            open_rw(&self.paths.trace_db)?,
            &trace_threads,
            self.config.trace_cache_capacity,
            self.config.trace_buffer_threshold,
        );

        let ctxcnt = self.contexts.len();
        *phase = Phase::Active(ActiveState {
            local_to_global,
            id_tuple_ptrs,
            profile_writer,
            trace_writer,
            cct_db_file: open_rw(&self.paths.cct_db)?,
            ctx_nzval_counts: vec![0u64; ctxcnt],
            ctx_nzmids: (0..ctxcnt).map(|_| HashSet::new()).collect(),
            track_nzmids,
        });
        Ok(())
    }

    fn thread_final(&self, thread: ProfileIndex, accumulators: ThreadAccumulators) -> Result<()> {
        let mut phase = self.phase.lock();
        let state = active_mut(&mut phase, thread.0)?;

        let global = *state
            .local_to_global
            .get(&thread.0)
            .ok_or(AssembleError::UnknownThread(thread.0))?;
        let id_tuple_ptr = *state
            .id_tuple_ptrs
            .get(&thread.0)
            .ok_or(AssembleError::UnknownThread(thread.0))?;

        let formatted = format_thread(&accumulators, &self.contexts, &self.metric_scope_ids)?;

        for window in formatted.ci_pairs.windows(2) {
            let (cur, next) = (window[0], window[1]);
            let count = next.start_index - cur.start_index;
            state.ctx_nzval_counts[cur.ctx_id as usize] += count;
            if state.track_nzmids {
                let start = cur.start_index as usize;
                let end = next.start_index as usize;
                let entry = &mut state.ctx_nzmids[cur.ctx_id as usize];
                for mv in &formatted.mv_pairs[start..end] {
                    entry.insert(MetricId(mv.metric_id));
                }
            }
        }

        state.profile_writer.write_thread(global.0, id_tuple_ptr, &formatted)?;
        Ok(())
    }

    fn timepoint(&self, thread: ProfileIndex, samples: &[(u64, CtxRef)], resolver: &dyn CtxRefResolver) -> Result<()> {
        let mut phase = self.phase.lock();
        let state = active_mut(&mut phase, thread.0)?;
        let global = *state
            .local_to_global
            .get(&thread.0)
            .ok_or(AssembleError::UnknownThread(thread.0))?;
        state.trace_writer.timepoint(global, samples, resolver)?;
        Ok(())
    }

    fn rewind(&self, thread: ProfileIndex) -> Result<()> {
        let mut phase = self.phase.lock();
        let state = active_mut(&mut phase, thread.0)?;
        let global = *state
            .local_to_global
            .get(&thread.0)
            .ok_or(AssembleError::UnknownThread(thread.0))?;
        state.trace_writer.rewind(global)?;
        Ok(())
    }

    fn write(self) -> Result<()> {
        let state = match self.phase.into_inner() {
            Phase::Active(s) => s,
            Phase::Collecting(_) => return Err(AssembleError::EmptyWavefront),
        };

        state.profile_writer.finalize()?;

        let local_ctx_nzmids_counts: Vec<u64> = if state.track_nzmids {
            state.ctx_nzmids.iter().map(|s| s.len() as u64).collect()
        } else {
            vec![0u64; state.ctx_nzval_counts.len()]
        };

        let profile_db_read = File::open(&self.paths.profile_db)?;
        let (cct_writer, profiles) = CctDbWriter::setup(
            Arc::clone(&self.cohort),
            state.cct_db_file,
            &profile_db_read,
            &state.ctx_nzval_counts,
            &local_ctx_nzmids_counts,
        )?;

        if self.config.worker_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.worker_threads)
                .build()
                .map_err(|e| AssembleError::ThreadPool(e.to_string()))?;
            pool.install(|| cct_writer.run(&profiles))?;
        } else {
            cct_writer.run(&profiles)?;
        }

        state.trace_writer.write()?;

        write_formats_doc(&self.paths.formats_md);
        Ok(())
    }
}

fn active_mut(phase: &mut Phase, local_index: u32) -> Result<&mut ActiveState> {
    match phase {
        Phase::Active(state) => Ok(state),
        Phase::Collecting(_) => Err(AssembleError::UnknownThread(local_index)),
    }
}

fn open_rw(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().read(true).write(true).create(true).truncate(true).open(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparsedb_codec::records::{CctDbHeader, ProfileDbHeader, TraceDbHeader};
    use sparsedb_codec::ByteReader;
    use sparsedb_collective::LocalCohort;
    use sparsedb_model::{CtxRef, LineScopeness, MetricScope};

    struct IdentityResolver;
    impl CtxRefResolver for IdentityResolver {
        fn resolve(&self, ctx_ref: CtxRef) -> ContextId {
            ContextId(ctx_ref.0 as u32)
        }
    }

    fn scope_ids(metrics: &[u16]) -> HashMap<MetricId, MetricScopeIds> {
        metrics
            .iter()
            .map(|&m| (MetricId(m), MetricScopeIds { function: MetricId(m * 2), execution: MetricId(m * 2 + 1) }))
            .collect()
    }

    #[test]
    fn single_rank_end_to_end_produces_all_three_valid_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SparseDbPaths {
            profile_db: dir.path().join("profile.db"),
            cct_db: dir.path().join("cct.db"),
            trace_db: dir.path().join("trace.db"),
            formats_md: dir.path().join("FORMATS.md"),
        };

        let contexts = vec![
            ContextInfo { id: ContextId(0), scope: LineScopeness::NotLine },
            ContextInfo { id: ContextId(1), scope: LineScopeness::NotLine },
        ];
        let cohort: Arc<dyn Cohort> = Arc::new(LocalCohort::new());
        let writer = SparseDbWriter::new(cohort, paths.clone(), contexts, scope_ids(&[1]), WriterConfig::default());

        writer.thread_start(ThreadStart { local_index: 0, identity: ThreadIdentity::empty() });
        writer
            .wavefront_complete(vec![ContextId(0), ContextId(1)], 1)
            .unwrap();

        let mut acc = Accumulator::new();
        acc.record(ContextId(0), MetricId(1), MetricScope::Function, 3.0);
        writer.thread_final(ProfileIndex(0), acc).unwrap();

        writer
            .timepoint(ProfileIndex(0), &[(10, CtxRef(0))], &IdentityResolver)
            .unwrap();

        writer.write().unwrap();

        let profile_bytes = std::fs::read(&paths.profile_db).unwrap();
        let mut r = ByteReader::new(&profile_bytes);
        let header = ProfileDbHeader::decode(&mut r).unwrap();
        assert_eq!(header.num_profiles, 2); // summary + 1 thread

        let cct_bytes = std::fs::read(&paths.cct_db).unwrap();
        let mut r = ByteReader::new(&cct_bytes);
        let header = CctDbHeader::decode(&mut r).unwrap();
        assert_eq!(header.num_contexts, 2);

        let trace_bytes = std::fs::read(&paths.trace_db).unwrap();
        let mut r = ByteReader::new(&trace_bytes);
        let header = TraceDbHeader::decode(&mut r).unwrap();
        assert_eq!(header.num_threads, 1);
        assert_eq!(header.min_ts_ns, 10);
        assert_eq!(header.max_ts_ns, 10);

        assert!(paths.formats_md.exists());
    }

    #[test]
    fn write_before_wavefront_complete_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = SparseDbPaths {
            profile_db: dir.path().join("profile.db"),
            cct_db: dir.path().join("cct.db"),
            trace_db: dir.path().join("trace.db"),
            formats_md: dir.path().join("FORMATS.md"),
        };
        let cohort: Arc<dyn Cohort> = Arc::new(LocalCohort::new());
        let writer = SparseDbWriter::new(cohort, paths, Vec::new(), HashMap::new(), WriterConfig::default());
        assert!(matches!(writer.write(), Err(AssembleError::EmptyWavefront)));
    }
}
