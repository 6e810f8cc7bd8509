//! Fixed, little-endian wire types for the matching, coarsening and fold exchanges.
//!
//! Records are `bytemuck` Pod structs whose multi-byte integers are stored
//! pre-LE with `.to_le()` and decoded with `.from_le()`. Received buffers are
//! never reinterpreted in place: decoding goes through
//! [`bytemuck::pod_read_unaligned`] so no alignment is assumed.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem::{align_of, size_of};
use thiserror::Error;

use crate::graph::Gnum;

/// A received buffer could not be decoded.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("expected a multiple of {record} bytes, got {len}")]
    Length { len: usize, record: usize },
    #[error("message truncated at byte {at}")]
    Truncated { at: usize },
    #[error("value {0} does not fit the graph number type")]
    Overflow(i64),
}

/// Matching request `(requesting vertex, requested vertex)` or reply
/// `(requesting vertex, mate of the requested vertex or -1)`, both as global
/// numbers.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireMatePair {
    pub vert_le: i64,
    pub mate_le: i64,
}

impl WireMatePair {
    pub const SIZE: usize = 16;

    pub fn new(vert: Gnum, mate: Gnum) -> Self {
        Self {
            vert_le: (vert as i64).to_le(),
            mate_le: (mate as i64).to_le(),
        }
    }

    pub fn vert(&self) -> Result<Gnum, WireError> {
        narrow(i64::from_le(self.vert_le))
    }

    pub fn mate(&self) -> Result<Gnum, WireError> {
        narrow(i64::from_le(self.mate_le))
    }
}

/// Coarse number of a multinode, sent by its creator to the owner of the
/// remote half: `(fine global vertex on the receiver, coarse global number)`.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Pod, Zeroable)]
pub struct WireCoarseLink {
    pub fine_le: i64,
    pub coarse_le: i64,
}

impl WireCoarseLink {
    pub fn new(fine: Gnum, coarse: Gnum) -> Self {
        Self {
            fine_le: (fine as i64).to_le(),
            coarse_le: (coarse as i64).to_le(),
        }
    }

    pub fn fine(&self) -> Result<Gnum, WireError> {
        narrow(i64::from_le(self.fine_le))
    }

    pub fn coarse(&self) -> Result<Gnum, WireError> {
        narrow(i64::from_le(self.coarse_le))
    }
}

const_assert_eq!(size_of::<WireMatePair>(), WireMatePair::SIZE);
const_assert_eq!(align_of::<WireMatePair>(), 8);
const_assert_eq!(size_of::<WireCoarseLink>(), 16);

#[inline]
fn narrow(v: i64) -> Result<Gnum, WireError> {
    Gnum::try_from(v).map_err(|_| WireError::Overflow(v))
}

/// View a record slice as bytes for sending.
pub fn encode_records<T: Pod>(records: &[T]) -> &[u8] {
    bytemuck::cast_slice(records)
}

/// Decode a byte buffer holding whole records of type `T`.
pub fn decode_records<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, WireError> {
    let record = size_of::<T>();
    if record == 0 || bytes.len() % record != 0 {
        return Err(WireError::Length {
            len: bytes.len(),
            record,
        });
    }
    Ok(bytes
        .chunks_exact(record)
        .map(bytemuck::pod_read_unaligned::<T>)
        .collect())
}

/// Append-only encoder for variable-length messages made of graph numbers.
#[derive(Debug, Default, Clone)]
pub struct GnumWriter {
    buf: Vec<u8>,
}

impl GnumWriter {
    pub fn with_capacity(values: usize) -> Self {
        Self {
            buf: Vec::with_capacity(values * 8),
        }
    }

    #[inline]
    pub fn put(&mut self, v: Gnum) {
        self.buf.extend_from_slice(&(v as i64).to_le_bytes());
    }

    pub fn put_all(&mut self, vs: &[Gnum]) {
        self.buf.reserve(vs.len() * 8);
        for &v in vs {
            self.put(v);
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len() / 8
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a message written by [`GnumWriter`].
#[derive(Debug, Clone)]
pub struct GnumReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> GnumReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn next_gnum(&mut self) -> Result<Gnum, WireError> {
        let end = self.pos + 8;
        let bytes: [u8; 8] = self
            .data
            .get(self.pos..end)
            .and_then(|b| b.try_into().ok())
            .ok_or(WireError::Truncated { at: self.pos })?;
        self.pos = end;
        narrow(i64::from_le_bytes(bytes))
    }

    /// Read a count field, which must be non-negative.
    pub fn next_len(&mut self) -> Result<usize, WireError> {
        let at = self.pos;
        let n = self.next_gnum()?;
        usize::try_from(n).map_err(|_| WireError::Truncated { at })
    }

    pub fn read_into(&mut self, n: usize, out: &mut Vec<Gnum>) -> Result<(), WireError> {
        out.reserve(n);
        for _ in 0..n {
            out.push(self.next_gnum()?);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// Decode a whole buffer of graph numbers.
pub fn decode_gnums(bytes: &[u8]) -> Result<Vec<Gnum>, WireError> {
    if bytes.len() % 8 != 0 {
        return Err(WireError::Length {
            len: bytes.len(),
            record: 8,
        });
    }
    bytes
        .chunks_exact(8)
        .map(|c| {
            let mut b = [0u8; 8];
            b.copy_from_slice(c);
            narrow(i64::from_le_bytes(b))
        })
        .collect()
}

/// Encode a slice of graph numbers.
pub fn encode_gnums(vs: &[Gnum]) -> Vec<u8> {
    let mut w = GnumWriter::with_capacity(vs.len());
    w.put_all(vs);
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mate_pairs_survive_unaligned_buffers() {
        let v = vec![WireMatePair::new(1, 2), WireMatePair::new(3, -1)];
        let mut bytes = vec![0u8];
        bytes.extend_from_slice(encode_records(&v));
        let out: Vec<WireMatePair> = decode_records(&bytes[1..]).unwrap();
        assert_eq!(out[0].vert().unwrap(), 1);
        assert_eq!(out[1].mate().unwrap(), -1);
    }

    #[test]
    fn partial_record_is_rejected() {
        let err = decode_records::<WireMatePair>(&[0u8; 20]).unwrap_err();
        assert_eq!(err, WireError::Length { len: 20, record: 16 });
    }

    #[test]
    fn reader_reports_truncation() {
        let mut w = GnumWriter::default();
        w.put(2);
        w.put(7);
        let mut bytes = w.into_bytes();
        bytes.truncate(12);
        let mut r = GnumReader::new(&bytes);
        assert_eq!(r.next_len().unwrap(), 2);
        assert_eq!(r.next_gnum(), Err(WireError::Truncated { at: 8 }));
    }

    #[test]
    fn negative_length_is_rejected() {
        let bytes = encode_gnums(&[-3]);
        assert!(GnumReader::new(&bytes).next_len().is_err());
    }
}
