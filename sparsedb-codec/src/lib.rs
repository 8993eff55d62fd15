//! Fixed-endian byte codec for the `sparsedb` file family.
//!
//! Every multi-byte integer in `profile.db`, `cct.db`, and `trace.db` is
//! big-endian; floating-point values are written as the raw 8-byte
//! IEEE-754 bit pattern, big-endian. This crate owns the record layouts
//! (byte sizes, field order, magics, footer constants) as the single
//! source of truth for every other `sparsedb-*` crate, the same role
//! `raw_data.rs` plays for `perf.data` records in the upstream profiler
//! this crate is modeled on.

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

pub mod constants;
pub mod records;

/// Errors raised while decoding a byte slice that does not hold a
/// well-formed record.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    #[error("unexpected end of input: needed {needed} bytes, had {available}")]
    UnexpectedEof { needed: usize, available: usize },

    #[error("bad magic: expected {expected:?}, found {found:?}")]
    BadMagic {
        expected: &'static [u8],
        found: Vec<u8>,
    },
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// A read-only cursor over a byte slice, decoding big-endian fields.
///
/// Mirrors the `RawData`/`read_u64::<T>()` split in the teacher's PERF
/// reader, specialized to the one endianness this format ever uses.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteReader { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::UnexpectedEof {
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n)?;
        Ok(())
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(BigEndian::read_u16(self.take(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(self.take(8)?))
    }

    pub fn read_f64_bits(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.take(n)
    }

    pub fn expect_magic(&mut self, expected: &'static [u8]) -> Result<()> {
        let found = self.take(expected.len())?;
        if found != expected {
            return Err(CodecError::BadMagic {
                expected,
                found: found.to_vec(),
            });
        }
        Ok(())
    }
}

/// An append-only byte writer, encoding big-endian fields.
///
/// Distinct from [`ByteReader`] rather than a single bidirectional type
/// because every writer in this crate family only ever appends; the
/// double-buffered output (`sparsedb-iobuf`) owns patch-in-place
/// separately via byte-offset slices, not through this type.
#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        ByteWriter { buf: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        ByteWriter {
            buf: Vec::with_capacity(cap),
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        let mut tmp = [0u8; 2];
        BigEndian::write_u16(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
    }

    pub fn write_u32(&mut self, v: u32) {
        let mut tmp = [0u8; 4];
        BigEndian::write_u32(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
    }

    pub fn write_u64(&mut self, v: u64) {
        let mut tmp = [0u8; 8];
        BigEndian::write_u64(&mut tmp, v);
        self.buf.extend_from_slice(&tmp);
    }

    pub fn write_f64_bits(&mut self, v: f64) {
        self.write_u64(v.to_bits());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pads with zero bytes until `self.len()` is a multiple of 8.
    pub fn pad_to_8(&mut self) {
        let rem = self.buf.len() % 8;
        if rem != 0 {
            self.buf.resize(self.buf.len() + (8 - rem), 0);
        }
    }

    /// Patches an already-written 8-byte big-endian field in place.
    pub fn patch_u64(&mut self, at: usize, v: u64) {
        let mut tmp = [0u8; 8];
        BigEndian::write_u64(&mut tmp, v);
        self.buf[at..at + 8].copy_from_slice(&tmp);
    }
}

/// Rounds `v` up to the next multiple of 8, the section-alignment unit
/// used throughout every file header in this format.
pub fn align8(v: u64) -> u64 {
    (v + 7) & !7
}
