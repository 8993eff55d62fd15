//! Magic strings, version numbers, sentinels, and footer constants.
//!
//! These are part of the external format contract (spec §4.1, §9) and
//! must never change independently of a deliberate format version bump.

/// `profile.db` file magic (16 bytes).
pub const PROFILE_DB_MAGIC: &[u8; 16] = b"HPCPROF-tmsdb___";
/// `cct.db` file magic (16 bytes).
pub const CCT_DB_MAGIC: &[u8; 16] = b"HPCPROF-cmsdb___";
/// `trace.db` file magic (16 bytes).
pub const TRACE_DB_MAGIC: &[u8; 16] = b"HPCPROF-trace___";

pub const FORMAT_MAJOR_VERSION: u8 = 1;
pub const FORMAT_MINOR_VERSION: u8 = 0;

/// Number of sections in `profile.db`'s header (prof-info, id-tuples).
pub const PROFILE_DB_NUM_SECTIONS: u16 = 2;
/// Number of sections in `cct.db`'s header (ctx-info).
pub const CCT_DB_NUM_SECTIONS: u16 = 1;

/// 8-byte footer written at the very end of `profile.db`, spelling out
/// `b"PROFDBft"` when read as big-endian bytes (spec: `0x50524f4644426674`).
pub const PROFILE_DB_FOOTER: u64 = 0x5052_4f46_4442_6674;
/// 8-byte footer written at the very end of `cct.db`, spelling out
/// `b"CCTDB ft"`-flavored bytes (spec gives the leading 7 bytes as
/// `0x43435444426674`; the eighth byte is zero-padded per DESIGN.md).
pub const CCT_DB_FOOTER: u64 = 0x4343_5444_4266_7400;
/// 8-byte footer written at the very end of `trace.db`, spelling out
/// `b"TRACEDBf"`.
pub const TRACE_DB_FOOTER: u64 = 0x5452_4143_4544_4266;

/// Sentinel terminating a profile's `(context-id, idx)` pair list.
pub const LAST_NODE_END: u32 = 0xFFFF_FFFF;
/// Sentinel terminating a cct.db block's `(metric-id, start)` table.
pub const LAST_MID_END: u16 = 0xFFFF;

/// Profile index reserved for the rank-0-owned summary profile.
pub const SUMMARY_PROFILE_INDEX: u32 = 0;

pub const PROF_INFO_RECORD_SIZE: u64 = 52;
pub const VALUE_METRIC_PAIR_SIZE: u64 = 10;
pub const CONTEXT_INDEX_PAIR_SIZE: u64 = 12;
pub const CTX_INFO_RECORD_SIZE: u64 = 22;
pub const METRIC_INDEX_PAIR_SIZE: u64 = 10;
pub const VALUE_PROFIDX_PAIR_SIZE: u64 = 12;
pub const TRACE_HEADER_RECORD_SIZE: u64 = 24;
pub const TRACE_SAMPLE_RECORD_SIZE: u64 = 12;

/// `profile.db` header: 16-byte magic + major + minor + num_profiles(u32)
/// + num_sections(u16) + 4 section size/ptr fields (u64 each) = 56 bytes.
pub const PROFILE_DB_HEADER_SIZE: u64 = 56;
/// `cct.db` header: 16-byte magic + major + minor + num_contexts(u32)
/// + num_sections(u16) + 2 section size/ptr fields (u64 each) = 40 bytes.
pub const CCT_DB_HEADER_SIZE: u64 = 40;
/// `trace.db` header: 16-byte magic + major + minor + num_threads(u32)
/// + 3 u64 fields (trace_hdrs_sec_ptr, min_ts_ns, max_ts_ns) = 46 bytes.
pub const TRACE_DB_HEADER_SIZE: u64 = 46;

/// Nominal flush threshold for the double-buffered output (§4.3).
pub const NOMINAL_BUFFER_SIZE: u64 = 64 * 1024 * 1024;
/// Hard cap on a single cct.db work group's byte size (§4.5 Phase B).
pub const MAX_GROUP_SIZE: u64 = 3 * 1024 * 1024 * 1024;
