//! Phase C: re-parses a finalized `profile.db`'s prof-info and ci-pair
//! sections, in parallel, once per transpose run (spec §4.5 Phase C).

use std::fs::File;
use std::os::unix::fs::FileExt;

use rayon::prelude::*;
use thiserror::Error;

use sparsedb_codec::constants::{LAST_NODE_END, VALUE_METRIC_PAIR_SIZE};
use sparsedb_codec::records::{ContextIndexPair, ProfInfoRecord, ProfileDbHeader};
use sparsedb_codec::{ByteReader, CodecError};

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProfileSourceError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, ProfileSourceError>;

/// One profile's data-block offset, global profile index, and parsed
/// `(ctx-id, starting-index)` table (terminator included, ascending by
/// ctx id), cached so every context group's merge reuses it without
/// re-reading `profile.db` (spec §4.5 Phase C `ProfileData`).
pub struct ProfileRecord {
    pub offset: u64,
    pub index: u32,
    pub ctx_pairs: Vec<(u32, u64)>,
}

/// Reads every non-summary profile's prof-info record and ci-pair
/// table from an already-finalized `profile.db`, in parallel.
pub fn load_profiles(file: &File) -> Result<Vec<ProfileRecord>> {
    let mut hdr_buf = vec![0u8; ProfileDbHeader::SIZE as usize];
    file.read_exact_at(&mut hdr_buf, 0)?;
    let header = ProfileDbHeader::decode(&mut ByteReader::new(&hdr_buf))?;

    if header.num_profiles == 0 {
        return Ok(Vec::new());
    }

    (1..header.num_profiles)
        .into_par_iter()
        .map(|index| load_one_profile(file, &header, index))
        .collect()
}

fn load_one_profile(file: &File, header: &ProfileDbHeader, index: u32) -> Result<ProfileRecord> {
    let rec_at = header.prof_info_sec_ptr + index as u64 * ProfInfoRecord::SIZE;
    let mut buf = vec![0u8; ProfInfoRecord::SIZE as usize];
    file.read_exact_at(&mut buf, rec_at)?;
    let info = ProfInfoRecord::decode(&mut ByteReader::new(&buf))?;

    if info.num_nz_ctxs == 0 {
        return Ok(ProfileRecord {
            offset: info.data_block_offset,
            index,
            ctx_pairs: Vec::new(),
        });
    }

    let ci_at = info.data_block_offset + info.num_vals * VALUE_METRIC_PAIR_SIZE;
    let ci_len = (info.num_nz_ctxs as u64 + 1) * ContextIndexPair::SIZE;
    let mut ci_buf = vec![0u8; ci_len as usize];
    file.read_exact_at(&mut ci_buf, ci_at)?;

    let mut cr = ByteReader::new(&ci_buf);
    let mut ctx_pairs = Vec::with_capacity(info.num_nz_ctxs as usize + 1);
    for _ in 0..=info.num_nz_ctxs {
        let pair = ContextIndexPair::decode(&mut cr)?;
        ctx_pairs.push((pair.ctx_id, pair.start_index));
    }
    debug_assert_eq!(ctx_pairs.last().map(|p| p.0), Some(LAST_NODE_END));

    Ok(ProfileRecord {
        offset: info.data_block_offset,
        index,
        ctx_pairs,
    })
}
