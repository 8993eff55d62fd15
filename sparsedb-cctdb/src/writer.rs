//! Orchestrates the full `cct.db` write: Phase A/B layout, Phase C
//! profile re-parsing, Phase D the dynamic group loop, Phase E
//! finalization (spec §4.5).

use std::fs::File;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use rayon::prelude::*;
use thiserror::Error;

use sparsedb_codec::constants::CCT_DB_FOOTER;
use sparsedb_codec::records::{CctDbHeader, CtxInfoRecord};
use sparsedb_codec::{ByteWriter, CodecError};
use sparsedb_collective::Cohort;
use sparsedb_model::{CtxGroup, CtxOffsets};

use crate::layout::{compute_ctx_offsets, compute_groups, split_group_for_threads};
use crate::profile_source::{load_profiles, ProfileSourceError};
use crate::transpose::write_context_range;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CctDbError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    ProfileSource(#[from] ProfileSourceError),
}

pub type Result<T> = std::result::Result<T, CctDbError>;

/// Writes one rank's share of `cct.db`, given the already-finalized
/// `profile.db` to transpose from. Every method here is collective:
/// every rank must call it, in the same order (spec §4.2).
pub struct CctDbWriter {
    cohort: Arc<dyn Cohort>,
    cct_file: File,
    ctx_offsets: CtxOffsets,
    groups: Vec<CtxGroup>,
}

impl CctDbWriter {
    /// Runs Phase A (offsets) and Phase B (grouping), writes the
    /// header and ctx-info section (rank 0 only), and re-parses
    /// `profile_db_file` in parallel (Phase C).
    pub fn setup(
        cohort: Arc<dyn Cohort>,
        cct_file: File,
        profile_db_file: &File,
        local_ctx_nzval_counts: &[u64],
        local_ctx_nzmids_counts: &[u64],
    ) -> Result<(Self, Vec<crate::profile_source::ProfileRecord>)> {
        let ctx_offsets = compute_ctx_offsets(&*cohort, local_ctx_nzval_counts, local_ctx_nzmids_counts);
        let groups = compute_groups(&ctx_offsets, cohort.size());

        if cohort.rank() == 0 {
            write_header_and_ctx_info(&cct_file, &ctx_offsets, local_ctx_nzmids_counts)?;
        }
        cohort.barrier();

        let profiles = load_profiles(profile_db_file)?;

        Ok((
            CctDbWriter {
                cohort,
                cct_file,
                ctx_offsets,
                groups,
            },
            profiles,
        ))
    }

    pub fn ctx_offsets(&self) -> &CtxOffsets {
        &self.ctx_offsets
    }

    /// Runs Phase D: claims groups (rank-local pre-allocation, then a
    /// shared counter) until none remain, transposing each into
    /// `cct.db`, then Phase E's footer write on the highest-indexed
    /// rank.
    pub fn run(&self, profiles: &[crate::profile_source::ProfileRecord]) -> Result<()> {
        let rank = self.cohort.rank();
        let size = self.cohort.size();
        let num_groups = self.groups.len();

        // Ranks other than 0 get one group pre-allocated by rank
        // number; rank 0 and every rank that exhausts its
        // pre-allocation draw from the shared counter, seeded past the
        // pre-allocated range.
        let counter = self.cohort.shared_counter((size.saturating_sub(1)) as u64);
        let mut idx = if rank > 0 { rank - 1 } else { counter.fetch_add(1) as usize };

        let team_size = rayon::current_num_threads();
        while idx < num_groups {
            let group = self.groups[idx];
            if !group.is_empty() {
                let sub_ranges = split_group_for_threads(group, &self.ctx_offsets, team_size);
                sub_ranges
                    .into_par_iter()
                    .try_for_each(|range| {
                        write_context_range(&self.cct_file, range.first_ctx, range.last_ctx, profiles, &self.ctx_offsets)
                    })?;
            }
            idx = counter.fetch_add(1) as usize;
        }

        self.cohort.barrier();
        if rank + 1 == size {
            let footer_offset = self.ctx_offsets.0[self.ctx_offsets.num_contexts()];
            let mut w = ByteWriter::with_capacity(8);
            w.write_u64(CCT_DB_FOOTER);
            self.cct_file.write_all_at(w.as_slice(), footer_offset)?;
            log::debug!("sparsedb-cctdb: wrote footer at {footer_offset}");
        }
        Ok(())
    }
}

fn write_header_and_ctx_info(cct_file: &File, ctx_offsets: &CtxOffsets, local_ctx_nzmids_counts: &[u64]) -> Result<()> {
    let ctxcnt = local_ctx_nzmids_counts.len();
    let ctx_info_sec_ptr = CctDbHeader::SIZE;
    let ctx_info_sec_size = ctxcnt as u64 * CtxInfoRecord::SIZE;

    let header = CctDbHeader {
        num_contexts: ctxcnt as u32,
        ctx_info_sec_size,
        ctx_info_sec_ptr,
    };
    let mut hw = ByteWriter::with_capacity(CctDbHeader::SIZE as usize);
    header.encode(&mut hw);
    cct_file.write_all_at(hw.as_slice(), 0)?;

    let mut body = ByteWriter::with_capacity(ctx_info_sec_size as usize);
    for i in 0..ctxcnt {
        let n_metrics = local_ctx_nzmids_counts[i];
        let block_len = ctx_offsets.block_len(i);
        let n_vals = if n_metrics == 0 {
            0
        } else {
            (block_len - (n_metrics + 1) * sparsedb_codec::constants::METRIC_INDEX_PAIR_SIZE)
                / sparsedb_codec::constants::VALUE_PROFIDX_PAIR_SIZE
        };
        let rec = CtxInfoRecord {
            ctx_id: i as u32,
            num_vals: n_vals,
            num_nz_mids: n_metrics as u16,
            block_offset: ctx_offsets.0[i],
        };
        rec.encode(&mut body);
    }
    cct_file.write_all_at(body.as_slice(), ctx_info_sec_ptr)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparsedb_codec::records::{ContextIndexPair, ProfInfoRecord, ProfileDbHeader, ValueMetricPair};
    use sparsedb_codec::ByteReader;
    use sparsedb_collective::LocalCohort;

    fn build_single_profile_db(ctx_id: u32, value: f64, metric_id: u16) -> (tempfile::NamedTempFile, File) {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = tmp.reopen().unwrap();

        let prof_info_sec_ptr = ProfileDbHeader::SIZE;
        let prof_info_sec_size = 2 * ProfInfoRecord::SIZE;
        let id_tuple_sec_ptr = prof_info_sec_ptr + prof_info_sec_size;
        let data_offset = id_tuple_sec_ptr + 8;

        let header = ProfileDbHeader {
            num_profiles: 2,
            prof_info_sec_size,
            prof_info_sec_ptr,
            id_tuple_sec_size: 0,
            id_tuple_sec_ptr,
        };
        let mut hw = ByteWriter::new();
        header.encode(&mut hw);
        file.write_all_at(&hw.into_bytes(), 0).unwrap();

        let mut blob = ByteWriter::new();
        ValueMetricPair { value, metric_id }.encode(&mut blob);
        ContextIndexPair { ctx_id, start_index: 0 }.encode(&mut blob);
        ContextIndexPair {
            ctx_id: sparsedb_codec::constants::LAST_NODE_END,
            start_index: 1,
        }
        .encode(&mut blob);
        file.write_all_at(&blob.into_bytes(), data_offset).unwrap();

        let rec = ProfInfoRecord {
            id_tuple_ptr: 0,
            num_vals: 1,
            num_nz_ctxs: 1,
            data_block_offset: data_offset,
        };
        let mut rw = ByteWriter::new();
        rec.encode(&mut rw);
        file.write_all_at(&rw.into_bytes(), prof_info_sec_ptr + ProfInfoRecord::SIZE)
            .unwrap();

        (tmp, file)
    }

    #[test]
    fn single_rank_writes_header_ctx_info_block_and_footer() {
        let (_tmp_p, profile_db) = build_single_profile_db(0, 9.5, 3);
        let cct_tmp = tempfile::NamedTempFile::new().unwrap();
        let cct_file = cct_tmp.reopen().unwrap();

        let cohort: Arc<dyn Cohort> = Arc::new(LocalCohort::new());
        let ctxcnt = 1;
        let local_nzval = vec![1u64; ctxcnt];
        let local_nzmids = vec![1u64; ctxcnt];

        let (writer, profiles) =
            CctDbWriter::setup(cohort, cct_file, &profile_db, &local_nzval, &local_nzmids).unwrap();
        writer.run(&profiles).unwrap();

        let bytes = std::fs::read(cct_tmp.path()).unwrap();
        let mut r = ByteReader::new(&bytes);
        let header = CctDbHeader::decode(&mut r).unwrap();
        assert_eq!(header.num_contexts, 1);

        r.seek(header.ctx_info_sec_ptr as usize);
        let ci = CtxInfoRecord::decode(&mut r).unwrap();
        assert_eq!(ci.num_vals, 1);
        assert_eq!(ci.num_nz_mids, 1);

        r.seek(ci.block_offset as usize);
        let pv = sparsedb_codec::records::ValueProfIdxPair::decode(&mut r).unwrap();
        assert_eq!(pv.value, 9.5);
        assert_eq!(pv.prof_index, 1);
        let mi = sparsedb_codec::records::MetricIndexPair::decode(&mut r).unwrap();
        assert_eq!(mi.metric_id, 3);
        let term = sparsedb_codec::records::MetricIndexPair::decode(&mut r).unwrap();
        assert!(term.is_terminator());

        let footer_at = bytes.len() - 8;
        let mut fr = ByteReader::new(&bytes[footer_at..]);
        assert_eq!(fr.read_u64().unwrap(), CCT_DB_FOOTER);
    }
}
