//! The `profile.db` writer: lays out the header and its two sections
//! collectively, then streams each thread's data block through
//! [`sparsedb_iobuf::DoubleBufferedOutput`] as threads finish (spec
//! §4.1, §4.4).

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use sparsedb_codec::align8;
use sparsedb_codec::constants::PROFILE_DB_FOOTER;
use sparsedb_codec::records::{ContextIndexPair, IdTuple, ProfInfoRecord, ProfileDbHeader, ValueMetricPair};
use sparsedb_codec::ByteWriter;
use sparsedb_collective::Cohort;
use sparsedb_iobuf::{DoubleBufferedOutput, IoBufError, PatchFn};
use sparsedb_model::ProfileInfo;

use crate::format::FormattedThread;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProfileDbError {
    #[error(transparent)]
    Io(#[from] IoBufError),
    #[error(transparent)]
    RawIo(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProfileDbError>;

/// Writes one rank's share of `profile.db`. Every method that touches
/// the [`Cohort`] (`setup`, `finalize`) must be called by every rank,
/// in the same order; `register_id_tuple` and `write_thread` are
/// purely local once `setup` has returned.
pub struct ProfileDbWriter {
    cohort: Arc<dyn Cohort>,
    out: DoubleBufferedOutput,
    prof_info_sec_ptr: u64,
    id_tuple_base_offset: u64,
    id_tuple_cursor: AtomicU64,
    data_region_base: u64,
    local_data_bytes: AtomicU64,
    profile_infos: Arc<Mutex<HashMap<u32, ProfileInfo>>>,
}

impl ProfileDbWriter {
    /// Lays out `profile.db`'s header and sections and writes the
    /// header (rank 0 only). `local_thread_count` and
    /// `local_id_tuple_bytes` are this rank's contribution before any
    /// thread's data has been formatted.
    pub fn setup(
        cohort: Arc<dyn Cohort>,
        file: File,
        local_thread_count: u32,
        local_id_tuple_bytes: u64,
        nominal_buffer_size: usize,
    ) -> Result<Self> {
        let total_threads = cohort.allreduce_sum_u64(local_thread_count as u64);
        let total_num_profiles = 1 + total_threads as u32;

        let prof_info_sec_ptr = ProfileDbHeader::SIZE;
        let prof_info_sec_size = total_num_profiles as u64 * ProfInfoRecord::SIZE;
        let id_tuple_sec_ptr = align8(prof_info_sec_ptr + prof_info_sec_size);

        let local_prefix = cohort.exscan_sum_u64(local_id_tuple_bytes).unwrap_or(0);
        let id_tuple_sec_size = cohort.allreduce_sum_u64(local_id_tuple_bytes);
        let id_tuple_base_offset = id_tuple_sec_ptr + local_prefix;

        let data_region_base = align8(id_tuple_sec_ptr + id_tuple_sec_size);
        let counter = cohort.shared_counter(data_region_base);

        if cohort.rank() == 0 {
            let header = ProfileDbHeader {
                num_profiles: total_num_profiles,
                prof_info_sec_size,
                prof_info_sec_ptr,
                id_tuple_sec_size,
                id_tuple_sec_ptr,
            };
            let mut w = ByteWriter::with_capacity(ProfileDbHeader::SIZE as usize);
            header.encode(&mut w);
            file.write_all_at(w.as_slice(), 0)?;
            log::debug!(
                "sparsedb-profiledb: wrote header ({total_num_profiles} profiles, {id_tuple_sec_size}B id-tuples)"
            );
        }
        cohort.barrier();

        let out = DoubleBufferedOutput::new(file, counter, nominal_buffer_size);

        Ok(ProfileDbWriter {
            cohort,
            out,
            prof_info_sec_ptr,
            id_tuple_base_offset,
            id_tuple_cursor: AtomicU64::new(0),
            data_region_base,
            local_data_bytes: AtomicU64::new(0),
            profile_infos: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Writes `tuple` into this rank's slice of the id-tuple section
    /// and returns its absolute file offset, for the matching
    /// `ProfInfoRecord.id_tuple_ptr`.
    pub fn register_id_tuple(&self, tuple: &IdTuple) -> Result<u64> {
        let len = tuple.encoded_len();
        let local_off = self.id_tuple_cursor.fetch_add(len, Ordering::SeqCst);
        let abs_off = self.id_tuple_base_offset + local_off;
        let mut w = ByteWriter::with_capacity(len as usize);
        tuple.encode(&mut w);
        self.out.write_at_direct(abs_off, w.as_slice())?;
        Ok(abs_off)
    }

    /// Enqueues a formatted thread's data block for streaming append.
    /// Its `ProfInfoRecord` is assembled now but not written to disk
    /// until [`finalize`](Self::finalize), once the block's offset has
    /// been patched in by the buffer flush.
    pub fn write_thread(
        &self,
        profile_index: u32,
        id_tuple_ptr: u64,
        formatted: &FormattedThread,
    ) -> Result<()> {
        let capacity = formatted.num_vals * ValueMetricPair::SIZE
            + formatted.ci_pairs.len() as u64 * ContextIndexPair::SIZE;
        let mut w = ByteWriter::with_capacity(capacity as usize);
        for p in &formatted.mv_pairs {
            p.encode(&mut w);
        }
        for p in &formatted.ci_pairs {
            p.encode(&mut w);
        }
        let bytes = w.into_bytes();
        self.local_data_bytes
            .fetch_add(bytes.len() as u64, Ordering::Relaxed);

        let mut info = ProfileInfo::new();
        info.id_tuple_ptr = id_tuple_ptr;
        info.num_vals = formatted.num_vals;
        info.num_nz_ctxs = formatted.num_nz_ctxs;
        self.profile_infos.lock().insert(profile_index, info);

        let infos = Arc::clone(&self.profile_infos);
        let patch: PatchFn = Box::new(move |offset| {
            if let Some(info) = infos.lock().get_mut(&profile_index) {
                info.offset = offset;
            }
        });
        self.out.write(&bytes, Some(patch))?;
        Ok(())
    }

    /// Drains the double buffer, writes every profile this rank owns
    /// into the prof-info section, and (the highest-indexed rank only)
    /// writes the trailing footer once every rank's byte total is
    /// known.
    pub fn finalize(&self) -> Result<()> {
        self.out.flush()?;

        {
            let infos = self.profile_infos.lock();
            for (&profile_index, info) in infos.iter() {
                debug_assert_ne!(info.offset, ProfileInfo::UNPATCHED_OFFSET);
                let rec = ProfInfoRecord {
                    id_tuple_ptr: info.id_tuple_ptr,
                    num_vals: info.num_vals,
                    num_nz_ctxs: info.num_nz_ctxs,
                    data_block_offset: info.offset,
                };
                let mut w = ByteWriter::with_capacity(ProfInfoRecord::SIZE as usize);
                rec.encode(&mut w);
                let at = self.prof_info_sec_ptr + profile_index as u64 * ProfInfoRecord::SIZE;
                self.out.write_at_direct(at, w.as_slice())?;
            }
        }
        self.cohort.barrier();

        let local_bytes = self.local_data_bytes.load(Ordering::Relaxed);
        let total_bytes = self.cohort.allreduce_sum_u64(local_bytes);
        if self.cohort.rank() + 1 == self.cohort.size() {
            let footer_offset = self.data_region_base + total_bytes;
            let mut w = ByteWriter::with_capacity(8);
            w.write_u64(PROFILE_DB_FOOTER);
            self.out.write_at_direct(footer_offset, w.as_slice())?;
            log::debug!("sparsedb-profiledb: wrote footer at {footer_offset}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparsedb_codec::records::ContextIndexPair;
    use sparsedb_codec::ByteReader;
    use sparsedb_collective::LocalCohort;

    fn single_value_thread(value: f64) -> FormattedThread {
        FormattedThread {
            mv_pairs: vec![ValueMetricPair { value, metric_id: 1 }],
            ci_pairs: vec![
                ContextIndexPair { ctx_id: 0, start_index: 0 },
                ContextIndexPair {
                    ctx_id: sparsedb_codec::constants::LAST_NODE_END,
                    start_index: 1,
                },
            ],
            num_vals: 1,
            num_nz_ctxs: 1,
        }
    }

    #[test]
    fn single_rank_round_trips_header_prof_info_and_footer() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = tmp.reopen().unwrap();
        let cohort: Arc<dyn Cohort> = Arc::new(LocalCohort::new());

        let writer = ProfileDbWriter::setup(cohort, file, 1, 0, 4096).unwrap();
        let tuple = IdTuple::default();
        let id_tuple_ptr = writer.register_id_tuple(&tuple).unwrap();
        writer.write_thread(1, id_tuple_ptr, &single_value_thread(42.0)).unwrap();
        writer.finalize().unwrap();

        let bytes = std::fs::read(tmp.path()).unwrap();
        let mut r = ByteReader::new(&bytes);
        let header = ProfileDbHeader::decode(&mut r).unwrap();
        assert_eq!(header.num_profiles, 2); // summary + 1 thread

        r.seek((header.prof_info_sec_ptr + 1 * ProfInfoRecord::SIZE) as usize);
        let rec = ProfInfoRecord::decode(&mut r).unwrap();
        assert_eq!(rec.num_vals, 1);
        assert_eq!(rec.num_nz_ctxs, 1);
        assert_eq!(rec.id_tuple_ptr, id_tuple_ptr);

        r.seek(rec.data_block_offset as usize);
        let mv = ValueMetricPair::decode(&mut r).unwrap();
        assert_eq!(mv.value, 42.0);
        let ci0 = ContextIndexPair::decode(&mut r).unwrap();
        assert_eq!(ci0.ctx_id, 0);
        let terminator = ContextIndexPair::decode(&mut r).unwrap();
        assert!(terminator.is_terminator());

        let footer_offset = bytes.len() - 8;
        let mut fr = ByteReader::new(&bytes[footer_offset..]);
        assert_eq!(fr.read_u64().unwrap(), PROFILE_DB_FOOTER);
    }
}
