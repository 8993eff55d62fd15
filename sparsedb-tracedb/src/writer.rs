//! Orchestrates the `trace.db` write: header assignment, per-thread
//! sample streaming with rewind, and finalization (spec §4.6).

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use sparsedb_codec::constants::TRACE_DB_FOOTER;
use sparsedb_codec::records::{TraceDbHeader, TraceHeaderRecord, TraceSample};
use sparsedb_codec::{ByteWriter, CodecError};
use sparsedb_collective::Cohort;
use sparsedb_model::{ContextId, CtxRef, ProfileIndex};

use crate::ctx_cache::CtxRefCache;
use crate::layout::{compute_layout, TraceLayout};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TraceDbError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("timepoint for unregistered thread {0}")]
    UnknownThread(u32),
}

pub type Result<T> = std::result::Result<T, TraceDbError>;

/// Resolves an opaque context reference to a dense context id. The
/// calling-context tree that owns this mapping is a collaborator the
/// core never constructs (spec §1 Non-goals); this trait is the seam.
pub trait CtxRefResolver: Send + Sync {
    fn resolve(&self, ctx_ref: CtxRef) -> ContextId;
}

struct ThreadState {
    p_start: u64,
    buf: Vec<u8>,
    flushed: u64,
    cache: CtxRefCache,
    finalized: Option<u64>,
}

/// Writes one rank's share of `trace.db`. Every method here is
/// collective except `timepoint`/`rewind`/`thread_final`, which operate
/// purely on this rank's already-reserved thread windows.
pub struct TraceDbWriter {
    cohort: Arc<dyn Cohort>,
    file: File,
    trace_hdrs_sec_ptr: u64,
    num_threads: u32,
    data_region_base: u64,
    total_reserved_bytes: u64,
    threads: Mutex<HashMap<u32, ThreadState>>,
    buffer_threshold: usize,
    min_ts: AtomicU64,
    max_ts: AtomicU64,
}

impl TraceDbWriter {
    /// Computes the collective layout and registers one reserved window
    /// per local thread (spec §4.6 "Header assignment").
    pub fn setup(
        cohort: Arc<dyn Cohort>,
        file: File,
        local_threads: &[(ProfileIndex, u32)],
        cache_capacity: usize,
        buffer_threshold: usize,
    ) -> Self {
        let max_counts: Vec<u32> = local_threads.iter().map(|&(_, count)| count).collect();
        let TraceLayout {
            trace_hdrs_sec_ptr,
            num_threads,
            data_region_base,
            total_reserved_bytes,
            thread_windows,
        } = compute_layout(&*cohort, &max_counts);

        let mut threads = HashMap::with_capacity(local_threads.len());
        for (&(profile_index, _), &(p_start, _)) in local_threads.iter().zip(thread_windows.iter()) {
            threads.insert(
                profile_index.0,
                ThreadState {
                    p_start,
                    buf: Vec::new(),
                    flushed: 0,
                    cache: CtxRefCache::new(cache_capacity),
                    finalized: None,
                },
            );
        }

        cohort.barrier();

        TraceDbWriter {
            cohort,
            file,
            trace_hdrs_sec_ptr,
            num_threads,
            data_region_base,
            total_reserved_bytes,
            threads: Mutex::new(threads),
            buffer_threshold,
            min_ts: AtomicU64::new(u64::MAX),
            max_ts: AtomicU64::new(0),
        }
    }

    /// Appends samples for `thread`, resolving context references
    /// through `resolver` behind the per-thread LRU cache (spec §4.6
    /// "Sample append").
    pub fn timepoint(&self, thread: ProfileIndex, samples: &[(u64, CtxRef)], resolver: &dyn CtxRefResolver) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        let mut threads = self.threads.lock();
        let state = threads
            .get_mut(&thread.0)
            .ok_or(TraceDbError::UnknownThread(thread.0))?;

        let mut w = ByteWriter::with_capacity(samples.len() * TraceSample::SIZE as usize);
        for &(timestamp_ns, ctx_ref) in samples {
            let ctx_id = match state.cache.get(ctx_ref) {
                Some(id) => id,
                None => {
                    let id = resolver.resolve(ctx_ref);
                    state.cache.insert(ctx_ref, id);
                    id
                }
            };
            TraceSample { timestamp_ns, ctx_id: ctx_id.0 }.encode(&mut w);
            self.min_ts.fetch_min(timestamp_ns, Ordering::Relaxed);
            self.max_ts.fetch_max(timestamp_ns, Ordering::Relaxed);
        }
        state.buf.extend_from_slice(w.as_slice());

        if state.buf.len() >= self.buffer_threshold {
            flush_locked(&self.file, state)?;
        }
        Ok(())
    }

    /// Discards every byte appended since this thread's window opened:
    /// the last pass through a thread's timeline is authoritative (spec
    /// §4.6 "Rewind").
    pub fn rewind(&self, thread: ProfileIndex) -> Result<()> {
        let mut threads = self.threads.lock();
        let state = threads
            .get_mut(&thread.0)
            .ok_or(TraceDbError::UnknownThread(thread.0))?;
        state.buf.clear();
        state.flushed = 0;
        Ok(())
    }

    /// Flushes any buffered bytes and fixes this thread's actual sample
    /// count (spec §4.6 "Finalization"). Threads with no samples end up
    /// with `pEnd == pStart`.
    pub fn thread_final(&self, thread: ProfileIndex) -> Result<()> {
        let mut threads = self.threads.lock();
        let state = threads
            .get_mut(&thread.0)
            .ok_or(TraceDbError::UnknownThread(thread.0))?;
        flush_locked(&self.file, state)?;
        state.finalized = Some(state.p_start + state.flushed);
        Ok(())
    }

    /// Writes every local thread's trace-header record, then (rank 0)
    /// the file header and (the highest-indexed rank) the footer.
    pub fn write(self) -> Result<()> {
        let mut threads = self.threads.lock();
        for (&profile_index, state) in threads.iter_mut() {
            if state.finalized.is_none() {
                flush_locked(&self.file, state)?;
                state.finalized = Some(state.p_start + state.flushed);
            }
            let rec = TraceHeaderRecord {
                profile_index,
                p_start: state.p_start,
                p_end: state.finalized.unwrap(),
            };
            let mut w = ByteWriter::with_capacity(TraceHeaderRecord::SIZE as usize);
            rec.encode(&mut w);
            let slot = self.trace_hdrs_sec_ptr + profile_index as u64 * TraceHeaderRecord::SIZE;
            self.file.write_all_at(w.as_slice(), slot)?;
        }
        drop(threads);

        self.cohort.barrier();

        let local_min = self.min_ts.load(Ordering::Relaxed);
        let local_max = self.max_ts.load(Ordering::Relaxed);
        let (global_min, global_max) = allgather_min_max(&*self.cohort, local_min, local_max);

        if self.cohort.rank() == 0 {
            let header = TraceDbHeader {
                num_threads: self.num_threads,
                trace_hdrs_sec_ptr: self.trace_hdrs_sec_ptr,
                min_ts_ns: global_min,
                max_ts_ns: global_max,
            };
            let mut hw = ByteWriter::with_capacity(TraceDbHeader::SIZE as usize);
            header.encode(&mut hw);
            self.file.write_all_at(hw.as_slice(), 0)?;
        }

        self.cohort.barrier();
        if self.cohort.rank() + 1 == self.cohort.size() {
            let footer_offset = self.data_region_base + self.total_reserved_bytes;
            let mut fw = ByteWriter::with_capacity(8);
            fw.write_u64(TRACE_DB_FOOTER);
            self.file.write_all_at(fw.as_slice(), footer_offset)?;
            log::debug!("sparsedb-tracedb: wrote footer at {footer_offset}");
        }
        Ok(())
    }
}

fn flush_locked(file: &File, state: &mut ThreadState) -> Result<()> {
    if state.buf.is_empty() {
        return Ok(());
    }
    file.write_all_at(&state.buf, state.p_start + state.flushed)?;
    state.flushed += state.buf.len() as u64;
    state.buf.clear();
    Ok(())
}

/// Gathers every rank's `(min, max)` pair via a round of broadcasts,
/// since `Cohort` exposes only sum-based reductions, not a dedicated
/// min/max one (spec §4.6 "Final file header").
fn allgather_min_max(cohort: &dyn Cohort, local_min: u64, local_max: u64) -> (u64, u64) {
    let mut buf = [0u8; 16];
    buf[..8].copy_from_slice(&local_min.to_be_bytes());
    buf[8..].copy_from_slice(&local_max.to_be_bytes());

    let mut global_min = u64::MAX;
    let mut global_max = 0u64;
    for rank in 0..cohort.size() {
        let got = cohort.broadcast_bytes(rank, &buf);
        let min_r = u64::from_be_bytes(got[0..8].try_into().unwrap());
        let max_r = u64::from_be_bytes(got[8..16].try_into().unwrap());
        global_min = global_min.min(min_r);
        global_max = global_max.max(max_r);
    }
    if global_min == u64::MAX {
        global_min = 0;
    }
    (global_min, global_max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparsedb_codec::ByteReader;
    use sparsedb_collective::LocalCohort;

    struct IdentityResolver;
    impl CtxRefResolver for IdentityResolver {
        fn resolve(&self, ctx_ref: CtxRef) -> ContextId {
            ContextId(ctx_ref.0 as u32)
        }
    }

    fn temp_file() -> (tempfile::NamedTempFile, File) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = tmp.reopen().unwrap();
        (tmp, file)
    }

    #[test]
    fn thread_with_no_samples_gets_pstart_equal_pend() {
        let (tmp, file) = temp_file();
        let cohort: Arc<dyn Cohort> = Arc::new(LocalCohort::new());
        let writer = TraceDbWriter::setup(cohort, file, &[(ProfileIndex(1), 5)], 8, 4096);
        writer.thread_final(ProfileIndex(1)).unwrap();
        writer.write().unwrap();

        let bytes = std::fs::read(tmp.path()).unwrap();
        let mut r = ByteReader::new(&bytes);
        let header = TraceDbHeader::decode(&mut r).unwrap();
        r.seek((header.trace_hdrs_sec_ptr + 1 * TraceHeaderRecord::SIZE) as usize);
        let th = TraceHeaderRecord::decode(&mut r).unwrap();
        assert_eq!(th.p_start, th.p_end);
    }

    #[test]
    fn rewind_discards_prior_samples_and_final_header_reflects_only_the_last_pass() {
        let (tmp, file) = temp_file();
        let cohort: Arc<dyn Cohort> = Arc::new(LocalCohort::new());
        let writer = TraceDbWriter::setup(cohort, file, &[(ProfileIndex(1), 10)], 8, 4096);
        let resolver = IdentityResolver;

        writer
            .timepoint(ProfileIndex(1), &[(1, CtxRef(1)), (2, CtxRef(2)), (3, CtxRef(3))], &resolver)
            .unwrap();
        writer.rewind(ProfileIndex(1)).unwrap();
        writer.timepoint(ProfileIndex(1), &[(100, CtxRef(7))], &resolver).unwrap();
        writer.thread_final(ProfileIndex(1)).unwrap();
        writer.write().unwrap();

        let bytes = std::fs::read(tmp.path()).unwrap();
        let mut r = ByteReader::new(&bytes);
        let header = TraceDbHeader::decode(&mut r).unwrap();
        assert_eq!(header.num_threads, 1);
        assert_eq!(header.min_ts_ns, 100);
        assert_eq!(header.max_ts_ns, 100);

        r.seek((header.trace_hdrs_sec_ptr + 1 * TraceHeaderRecord::SIZE) as usize);
        let th = TraceHeaderRecord::decode(&mut r).unwrap();
        assert_eq!(th.profile_index, 1);
        assert_eq!(th.p_end - th.p_start, TraceSample::SIZE);

        r.seek(th.p_start as usize);
        let sample = TraceSample::decode(&mut r).unwrap();
        assert_eq!(sample.timestamp_ns, 100);
        assert_eq!(sample.ctx_id, 7);

        let footer_at = bytes.len() - 8;
        let mut fr = ByteReader::new(&bytes[footer_at..]);
        assert_eq!(fr.read_u64().unwrap(), TRACE_DB_FOOTER);
    }
}
