//! In-memory record types and their fixed on-disk encodings.

use crate::{align8, constants::*, ByteReader, ByteWriter, Result};

/// `profile.db` file header (56 bytes + sections).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileDbHeader {
    pub num_profiles: u32,
    pub prof_info_sec_size: u64,
    pub prof_info_sec_ptr: u64,
    pub id_tuple_sec_size: u64,
    pub id_tuple_sec_ptr: u64,
}

impl ProfileDbHeader {
    pub const SIZE: u64 = PROFILE_DB_HEADER_SIZE;

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_bytes(PROFILE_DB_MAGIC);
        w.write_u8(FORMAT_MAJOR_VERSION);
        w.write_u8(FORMAT_MINOR_VERSION);
        w.write_u32(self.num_profiles);
        w.write_u16(PROFILE_DB_NUM_SECTIONS);
        w.write_u64(self.prof_info_sec_size);
        w.write_u64(self.prof_info_sec_ptr);
        w.write_u64(self.id_tuple_sec_size);
        w.write_u64(self.id_tuple_sec_ptr);
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self> {
        r.expect_magic(PROFILE_DB_MAGIC)?;
        let _major = r.read_u8()?;
        let _minor = r.read_u8()?;
        let num_profiles = r.read_u32()?;
        let _num_sections = r.read_u16()?;
        let prof_info_sec_size = r.read_u64()?;
        let prof_info_sec_ptr = r.read_u64()?;
        let id_tuple_sec_size = r.read_u64()?;
        let id_tuple_sec_ptr = r.read_u64()?;
        Ok(ProfileDbHeader {
            num_profiles,
            prof_info_sec_size,
            prof_info_sec_ptr,
            id_tuple_sec_size,
            id_tuple_sec_ptr,
        })
    }
}

/// A `prof-info` record (52 bytes) inside `profile.db`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfInfoRecord {
    pub id_tuple_ptr: u64,
    pub num_vals: u64,
    pub num_nz_ctxs: u32,
    pub data_block_offset: u64,
}

impl ProfInfoRecord {
    pub const SIZE: u64 = PROF_INFO_RECORD_SIZE;

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u64(self.id_tuple_ptr);
        w.write_u64(0); // metadata pointer, spare
        w.write_u64(0); // spare
        w.write_u64(0); // spare
        w.write_u64(self.num_vals);
        w.write_u32(self.num_nz_ctxs);
        w.write_u64(self.data_block_offset);
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self> {
        let id_tuple_ptr = r.read_u64()?;
        let _metadata_ptr = r.read_u64()?;
        let _spare0 = r.read_u64()?;
        let _spare1 = r.read_u64()?;
        let num_vals = r.read_u64()?;
        let num_nz_ctxs = r.read_u32()?;
        let data_block_offset = r.read_u64()?;
        Ok(ProfInfoRecord {
            id_tuple_ptr,
            num_vals,
            num_nz_ctxs,
            data_block_offset,
        })
    }

    /// Byte extent of this profile's data block in `profile.db`, per the
    /// bound named in spec §3's invariants.
    pub fn data_block_len(&self) -> u64 {
        self.num_vals * VALUE_METRIC_PAIR_SIZE + (self.num_nz_ctxs as u64 + 1) * CONTEXT_INDEX_PAIR_SIZE
    }
}

/// One `(kind, physical-index, logical-index)` triple of an id-tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdTupleElement {
    pub kind: u16,
    pub physical_index: u64,
    pub logical_index: u64,
}

impl IdTupleElement {
    pub const SIZE: u64 = 18;

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u16(self.kind);
        w.write_u64(self.physical_index);
        w.write_u64(self.logical_index);
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self> {
        Ok(IdTupleElement {
            kind: r.read_u16()?,
            physical_index: r.read_u64()?,
            logical_index: r.read_u64()?,
        })
    }
}

/// An id-tuple: `2B length` then `length * (2B kind + 8B phys + 8B logical)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdTuple(pub Vec<IdTupleElement>);

impl IdTuple {
    pub fn encoded_len(&self) -> u64 {
        2 + self.0.len() as u64 * IdTupleElement::SIZE
    }

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u16(self.0.len() as u16);
        for elem in &self.0 {
            elem.encode(w);
        }
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self> {
        let len = r.read_u16()? as usize;
        let mut elems = Vec::with_capacity(len);
        for _ in 0..len {
            elems.push(IdTupleElement::decode(r)?);
        }
        Ok(IdTuple(elems))
    }
}

/// A `(value, metric-id)` pair (10 bytes) in the mv-pair blob.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueMetricPair {
    pub value: f64,
    pub metric_id: u16,
}

impl ValueMetricPair {
    pub const SIZE: u64 = VALUE_METRIC_PAIR_SIZE;

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_f64_bits(self.value);
        w.write_u16(self.metric_id);
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self> {
        Ok(ValueMetricPair {
            value: r.read_f64_bits()?,
            metric_id: r.read_u16()?,
        })
    }
}

/// A `(context-id, starting-index)` pair (12 bytes) in the ci-pair blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextIndexPair {
    pub ctx_id: u32,
    pub start_index: u64,
}

impl ContextIndexPair {
    pub const SIZE: u64 = CONTEXT_INDEX_PAIR_SIZE;

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u32(self.ctx_id);
        w.write_u64(self.start_index);
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self> {
        Ok(ContextIndexPair {
            ctx_id: r.read_u32()?,
            start_index: r.read_u64()?,
        })
    }

    pub fn is_terminator(&self) -> bool {
        self.ctx_id == LAST_NODE_END
    }
}

/// `cct.db` file header (40 bytes + sections).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CctDbHeader {
    pub num_contexts: u32,
    pub ctx_info_sec_size: u64,
    pub ctx_info_sec_ptr: u64,
}

impl CctDbHeader {
    pub const SIZE: u64 = CCT_DB_HEADER_SIZE;

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_bytes(CCT_DB_MAGIC);
        w.write_u8(FORMAT_MAJOR_VERSION);
        w.write_u8(FORMAT_MINOR_VERSION);
        w.write_u32(self.num_contexts);
        w.write_u16(CCT_DB_NUM_SECTIONS);
        w.write_u64(self.ctx_info_sec_size);
        w.write_u64(self.ctx_info_sec_ptr);
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self> {
        r.expect_magic(CCT_DB_MAGIC)?;
        let _major = r.read_u8()?;
        let _minor = r.read_u8()?;
        let num_contexts = r.read_u32()?;
        let _num_sections = r.read_u16()?;
        let ctx_info_sec_size = r.read_u64()?;
        let ctx_info_sec_ptr = r.read_u64()?;
        Ok(CctDbHeader {
            num_contexts,
            ctx_info_sec_size,
            ctx_info_sec_ptr,
        })
    }
}

/// A `ctx-info` record (22 bytes) inside `cct.db`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtxInfoRecord {
    pub ctx_id: u32,
    pub num_vals: u64,
    pub num_nz_mids: u16,
    pub block_offset: u64,
}

impl CtxInfoRecord {
    pub const SIZE: u64 = CTX_INFO_RECORD_SIZE;

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u32(self.ctx_id);
        w.write_u64(self.num_vals);
        w.write_u16(self.num_nz_mids);
        w.write_u64(self.block_offset);
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self> {
        Ok(CtxInfoRecord {
            ctx_id: r.read_u32()?,
            num_vals: r.read_u64()?,
            num_nz_mids: r.read_u16()?,
            block_offset: r.read_u64()?,
        })
    }
}

/// A `(metric-id, start/cumulative-count)` pair (10 bytes) ending a
/// cct.db context block's metric-index table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricIndexPair {
    pub metric_id: u16,
    pub start: u64,
}

impl MetricIndexPair {
    pub const SIZE: u64 = METRIC_INDEX_PAIR_SIZE;

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u16(self.metric_id);
        w.write_u64(self.start);
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self> {
        Ok(MetricIndexPair {
            metric_id: r.read_u16()?,
            start: r.read_u64()?,
        })
    }

    pub fn is_terminator(&self) -> bool {
        self.metric_id == LAST_MID_END
    }
}

/// A `(value, prof-index)` pair (12 bytes) in a cct.db context block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueProfIdxPair {
    pub value: f64,
    pub prof_index: u32,
}

impl ValueProfIdxPair {
    pub const SIZE: u64 = VALUE_PROFIDX_PAIR_SIZE;

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_f64_bits(self.value);
        w.write_u32(self.prof_index);
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self> {
        Ok(ValueProfIdxPair {
            value: r.read_f64_bits()?,
            prof_index: r.read_u32()?,
        })
    }
}

/// `trace.db` file header (46 bytes): magic, versions, a section header
/// locating the trace-header array, and global min/max timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceDbHeader {
    pub num_threads: u32,
    pub trace_hdrs_sec_ptr: u64,
    pub min_ts_ns: u64,
    pub max_ts_ns: u64,
}

impl TraceDbHeader {
    pub const SIZE: u64 = TRACE_DB_HEADER_SIZE;

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_bytes(TRACE_DB_MAGIC);
        w.write_u8(FORMAT_MAJOR_VERSION);
        w.write_u8(FORMAT_MINOR_VERSION);
        w.write_u32(self.num_threads);
        w.write_u64(self.trace_hdrs_sec_ptr);
        w.write_u64(self.min_ts_ns);
        w.write_u64(self.max_ts_ns);
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self> {
        r.expect_magic(TRACE_DB_MAGIC)?;
        let _major = r.read_u8()?;
        let _minor = r.read_u8()?;
        let num_threads = r.read_u32()?;
        let trace_hdrs_sec_ptr = r.read_u64()?;
        let min_ts_ns = r.read_u64()?;
        let max_ts_ns = r.read_u64()?;
        Ok(TraceDbHeader {
            num_threads,
            trace_hdrs_sec_ptr,
            min_ts_ns,
            max_ts_ns,
        })
    }
}

/// A per-thread trace-header record (24 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceHeaderRecord {
    pub profile_index: u32,
    pub p_start: u64,
    pub p_end: u64,
}

impl TraceHeaderRecord {
    pub const SIZE: u64 = TRACE_HEADER_RECORD_SIZE;

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u32(self.profile_index);
        w.write_u64(self.p_start);
        w.write_u64(self.p_end);
        w.write_u32(0); // pad
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self> {
        let profile_index = r.read_u32()?;
        let p_start = r.read_u64()?;
        let p_end = r.read_u64()?;
        let _pad = r.read_u32()?;
        Ok(TraceHeaderRecord {
            profile_index,
            p_start,
            p_end,
        })
    }
}

/// A single timeline sample (12 bytes): `(timestamp-ns, ctx-id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceSample {
    pub timestamp_ns: u64,
    pub ctx_id: u32,
}

impl TraceSample {
    pub const SIZE: u64 = TRACE_SAMPLE_RECORD_SIZE;

    pub fn encode(&self, w: &mut ByteWriter) {
        w.write_u64(self.timestamp_ns);
        w.write_u32(self.ctx_id);
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self> {
        Ok(TraceSample {
            timestamp_ns: r.read_u64()?,
            ctx_id: r.read_u32()?,
        })
    }
}

/// Rounds a running byte cursor up to the next 8-byte boundary, the rule
/// every section start in these formats follows.
pub fn section_align(offset: u64) -> u64 {
    align8(offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_db_header_roundtrips() {
        let hdr = ProfileDbHeader {
            num_profiles: 42,
            prof_info_sec_size: 100,
            prof_info_sec_ptr: 32,
            id_tuple_sec_size: 50,
            id_tuple_sec_ptr: 132,
        };
        let mut w = ByteWriter::new();
        hdr.encode(&mut w);
        assert_eq!(w.len() as u64, ProfileDbHeader::SIZE);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(ProfileDbHeader::decode(&mut r).unwrap(), hdr);
    }

    #[test]
    fn prof_info_record_roundtrips_and_bounds_data_block() {
        let rec = ProfInfoRecord {
            id_tuple_ptr: 7,
            num_vals: 3,
            num_nz_ctxs: 2,
            data_block_offset: 1000,
        };
        let mut w = ByteWriter::new();
        rec.encode(&mut w);
        assert_eq!(w.len() as u64, ProfInfoRecord::SIZE);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        let decoded = ProfInfoRecord::decode(&mut r).unwrap();
        assert_eq!(decoded, rec);
        // 3 values * 10B + (2+1) ctx pairs * 12B
        assert_eq!(decoded.data_block_len(), 3 * 10 + 3 * 12);
    }

    #[test]
    fn id_tuple_roundtrips_with_multiple_elements() {
        let tuple = IdTuple(vec![
            IdTupleElement {
                kind: 1,
                physical_index: 2,
                logical_index: 3,
            },
            IdTupleElement {
                kind: 4,
                physical_index: 5,
                logical_index: 6,
            },
        ]);
        let mut w = ByteWriter::new();
        tuple.encode(&mut w);
        assert_eq!(w.len() as u64, tuple.encoded_len());
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(IdTuple::decode(&mut r).unwrap(), tuple);
    }

    #[test]
    fn ci_pair_terminator_is_recognized() {
        let term = ContextIndexPair {
            ctx_id: LAST_NODE_END,
            start_index: 9,
        };
        assert!(term.is_terminator());
        let not_term = ContextIndexPair {
            ctx_id: 5,
            start_index: 1,
        };
        assert!(!not_term.is_terminator());
    }

    #[test]
    fn cct_db_header_and_ctx_info_roundtrip() {
        let hdr = CctDbHeader {
            num_contexts: 10,
            ctx_info_sec_size: 220,
            ctx_info_sec_ptr: 32,
        };
        let mut w = ByteWriter::new();
        hdr.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(CctDbHeader::decode(&mut r).unwrap(), hdr);

        let ci = CtxInfoRecord {
            ctx_id: 3,
            num_vals: 4,
            num_nz_mids: 1,
            block_offset: 64,
        };
        let mut w2 = ByteWriter::new();
        ci.encode(&mut w2);
        assert_eq!(w2.len() as u64, CtxInfoRecord::SIZE);
        let bytes2 = w2.into_bytes();
        let mut r2 = ByteReader::new(&bytes2);
        assert_eq!(CtxInfoRecord::decode(&mut r2).unwrap(), ci);
    }

    #[test]
    fn trace_records_roundtrip() {
        let hdr = TraceDbHeader {
            num_threads: 2,
            trace_hdrs_sec_ptr: 32,
            min_ts_ns: 100,
            max_ts_ns: 100,
        };
        let mut w = ByteWriter::new();
        hdr.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(TraceDbHeader::decode(&mut r).unwrap(), hdr);

        let th = TraceHeaderRecord {
            profile_index: 1,
            p_start: 32,
            p_end: 44,
        };
        let mut w2 = ByteWriter::new();
        th.encode(&mut w2);
        assert_eq!(w2.len() as u64, TraceHeaderRecord::SIZE);
        let bytes2 = w2.into_bytes();
        let mut r2 = ByteReader::new(&bytes2);
        assert_eq!(TraceHeaderRecord::decode(&mut r2).unwrap(), th);

        let sample = TraceSample {
            timestamp_ns: 100,
            ctx_id: 7,
        };
        let mut w3 = ByteWriter::new();
        sample.encode(&mut w3);
        assert_eq!(w3.len() as u64, TraceSample::SIZE);
        let bytes3 = w3.into_bytes();
        let mut r3 = ByteReader::new(&bytes3);
        assert_eq!(TraceSample::decode(&mut r3).unwrap(), sample);
    }
}
