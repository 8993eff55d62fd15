//! Phase D: the k-way merge that transposes profile-indexed sparse
//! metric vectors into context-indexed ones (spec §4.5 Phase D).

use std::collections::{BTreeMap, BinaryHeap};
use std::cmp::Reverse;
use std::fs::File;
use std::os::unix::fs::FileExt;

use sparsedb_codec::constants::{LAST_MID_END, VALUE_METRIC_PAIR_SIZE, VALUE_PROFIDX_PAIR_SIZE};
use sparsedb_codec::records::{ValueMetricPair, ValueProfIdxPair};
use sparsedb_codec::{ByteReader, ByteWriter, CodecError};
use sparsedb_model::CtxOffsets;

use crate::profile_source::ProfileRecord;

/// One profile's ci-pair window restricted to a context range, plus the
/// raw mv-pair bytes for that window, loaded once per group (spec §4.5
/// Phase D `LoadedProfile`).
struct LoadedProfile {
    window: Vec<(u32, u64)>,
    cursor: usize,
    index: u32,
    mv_blob: Vec<u8>,
    base_start: u64,
}

impl LoadedProfile {
    fn load(file: &File, profile: &ProfileRecord, first_ctx: u32, last_ctx: u32) -> std::io::Result<Self> {
        if profile.ctx_pairs.len() <= 1 || first_ctx >= last_ctx {
            return Ok(LoadedProfile {
                window: Vec::new(),
                cursor: 0,
                index: profile.index,
                mv_blob: Vec::new(),
                base_start: 0,
            });
        }

        let body = &profile.ctx_pairs[..profile.ctx_pairs.len() - 1];
        let lo = body.partition_point(|p| p.0 < first_ctx);
        let hi = profile.ctx_pairs[lo..].partition_point(|p| p.0 < last_ctx) + lo;

        if lo == hi {
            return Ok(LoadedProfile {
                window: Vec::new(),
                cursor: 0,
                index: profile.index,
                mv_blob: Vec::new(),
                base_start: 0,
            });
        }

        let window: Vec<(u32, u64)> = profile.ctx_pairs[lo..=hi].to_vec();
        let base_start = window[0].1;
        let end = window[window.len() - 1].1;
        let mut mv_blob = vec![0u8; ((end - base_start) * VALUE_METRIC_PAIR_SIZE) as usize];
        file.read_exact_at(&mut mv_blob, profile.offset + base_start * VALUE_METRIC_PAIR_SIZE)?;

        Ok(LoadedProfile {
            window,
            cursor: 0,
            index: profile.index,
            mv_blob,
            base_start,
        })
    }

    fn is_exhausted(&self) -> bool {
        self.cursor + 1 >= self.window.len()
    }

    fn current_ctx_id(&self) -> u32 {
        self.window[self.cursor].0
    }

    fn take_current_pairs(&self) -> Result<Vec<(f64, u16)>, CodecError> {
        let cur = self.window[self.cursor];
        let next = self.window[self.cursor + 1];
        let count = next.1 - cur.1;
        let byte_off = ((cur.1 - self.base_start) * VALUE_METRIC_PAIR_SIZE) as usize;
        let mut r = ByteReader::new(&self.mv_blob[byte_off..]);
        (0..count)
            .map(|_| {
                let p = ValueMetricPair::decode(&mut r)?;
                Ok((p.value, p.metric_id))
            })
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct HeapKey {
    ctx_id: u32,
    profile_index: u32,
}

/// Merges every loaded profile's data for contexts in `[first_ctx,
/// last_ctx)` and writes the resulting blocks directly into `cct.db`
/// at their precomputed offsets.
pub fn write_context_range(
    file: &File,
    first_ctx: u32,
    last_ctx: u32,
    profiles: &[ProfileRecord],
    ctx_offsets: &CtxOffsets,
) -> Result<(), CodecError> {
    if first_ctx >= last_ctx {
        return Ok(());
    }

    let mut loaded = Vec::with_capacity(profiles.len());
    for p in profiles {
        let lp = LoadedProfile::load(file, p, first_ctx, last_ctx)
            .expect("profile.db reads within precomputed bounds do not fail");
        if !lp.is_exhausted() {
            loaded.push(lp);
        }
    }
    if loaded.is_empty() {
        return Ok(());
    }

    let mut heap: BinaryHeap<Reverse<(HeapKey, usize)>> = loaded
        .iter()
        .enumerate()
        .map(|(i, lp)| {
            Reverse((
                HeapKey { ctx_id: lp.current_ctx_id(), profile_index: lp.index },
                i,
            ))
        })
        .collect();

    let mut out = ByteWriter::new();
    let mut first_ctx_written: Option<u32> = None;

    while let Some(&Reverse((top, _))) = heap.peek() {
        if top.ctx_id >= last_ctx {
            break;
        }
        let ctx_id = top.ctx_id;
        if first_ctx_written.is_none() {
            first_ctx_written = Some(ctx_id);
        }

        let mut by_metric: BTreeMap<u16, ByteWriter> = BTreeMap::new();
        let mut total_pairs = 0u64;

        while let Some(&Reverse((entry, loaded_idx))) = heap.peek() {
            if entry.ctx_id != ctx_id {
                break;
            }
            heap.pop();

            let pairs = loaded[loaded_idx].take_current_pairs()?;
            for (value, metric_id) in pairs {
                total_pairs += 1;
                let pair = ValueProfIdxPair { value, prof_index: entry.profile_index };
                pair.encode(by_metric.entry(metric_id).or_default());
            }

            let lp = &mut loaded[loaded_idx];
            lp.cursor += 1;
            if !lp.is_exhausted() {
                heap.push(Reverse((
                    HeapKey { ctx_id: lp.current_ctx_id(), profile_index: lp.index },
                    loaded_idx,
                )));
            }
        }

        let block_start = out.len() as u64;
        for bucket in by_metric.values() {
            out.write_bytes(bucket.as_slice());
        }
        let mut running = 0u64;
        for (&mid, bucket) in &by_metric {
            out.write_u16(mid);
            out.write_u64(running);
            running += bucket.len() as u64 / VALUE_PROFIDX_PAIR_SIZE;
        }
        out.write_u16(LAST_MID_END);
        out.write_u64(running);
        debug_assert_eq!(running, total_pairs);
        debug_assert_eq!(
            ctx_offsets.0[ctx_id as usize] + (out.len() as u64 - block_start),
            ctx_offsets.0[ctx_id as usize + 1],
            "computed block size must match the Phase A layout exactly"
        );
    }

    if out.is_empty() {
        return Ok(());
    }
    let start = first_ctx_written.expect("non-empty output implies a first written ctx id");
    file.write_all_at(out.as_slice(), ctx_offsets.0[start as usize])
        .expect("cct.db write within precomputed bounds does not fail");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparsedb_codec::constants::LAST_NODE_END;
    use sparsedb_codec::records::{MetricIndexPair, ValueProfIdxPair};

    fn write_profile_mv_blob(file: &File, offset: u64, pairs: &[(f64, u16)]) {
        let mut w = ByteWriter::new();
        for &(value, metric_id) in pairs {
            ValueMetricPair { value, metric_id }.encode(&mut w);
        }
        file.write_all_at(&w.into_bytes(), offset).unwrap();
    }

    #[test]
    fn two_profiles_merge_one_context_in_ascending_metric_order() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = tmp.reopen().unwrap();

        // Profile 1: ctx 5 has one (metric 2) pair.
        write_profile_mv_blob(&file, 0, &[(1.5, 2)]);
        let p1 = ProfileRecord {
            offset: 0,
            index: 1,
            ctx_pairs: vec![(5, 0), (LAST_NODE_END, 1)],
        };
        // Profile 2: ctx 5 has one (metric 1) pair.
        write_profile_mv_blob(&file, 100, &[(2.5, 1)]);
        let p2 = ProfileRecord {
            offset: 100,
            index: 2,
            ctx_pairs: vec![(5, 0), (LAST_NODE_END, 1)],
        };

        // ctx 5's block: 2 values * 12B + (2+1) metric pairs * 10B.
        let cct_base = 500u64;
        let block_len = 2 * VALUE_PROFIDX_PAIR_SIZE + 3 * sparsedb_codec::constants::METRIC_INDEX_PAIR_SIZE;
        let ctx_offsets = CtxOffsets(vec![cct_base, cct_base + block_len]);

        write_context_range(&file, 5, 6, &[p1, p2], &ctx_offsets).unwrap();

        let mut buf = vec![0u8; block_len as usize];
        file.read_exact_at(&mut buf, cct_base).unwrap();
        let mut r = ByteReader::new(&buf);

        // metric 1's pair comes first (ascending metric id).
        let pv0 = ValueProfIdxPair::decode(&mut r).unwrap();
        assert_eq!(pv0.value, 2.5);
        assert_eq!(pv0.prof_index, 2);
        let pv1 = ValueProfIdxPair::decode(&mut r).unwrap();
        assert_eq!(pv1.value, 1.5);
        assert_eq!(pv1.prof_index, 1);

        let mi0 = MetricIndexPair::decode(&mut r).unwrap();
        assert_eq!(mi0, MetricIndexPair { metric_id: 1, start: 0 });
        let mi1 = MetricIndexPair::decode(&mut r).unwrap();
        assert_eq!(mi1, MetricIndexPair { metric_id: 2, start: 1 });
        let term = MetricIndexPair::decode(&mut r).unwrap();
        assert!(term.is_terminator());
        assert_eq!(term.start, 2);
    }

    #[test]
    fn context_range_outside_any_profile_writes_nothing() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let file = tmp.reopen().unwrap();
        let ctx_offsets = CtxOffsets(vec![0, 10]);
        write_context_range(&file, 3, 4, &[], &ctx_offsets).unwrap();
        assert_eq!(std::fs::metadata(tmp.path()).unwrap().len(), 0);
    }
}
