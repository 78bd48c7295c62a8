//!  Blob operations for array storage.
//!
//! Each sample of a column is stored as one blob in a compact binary format:
//!
//! ```text
//! magic "STKA" | version u8 | dtype code u8 | rank u32 | dims u64 * rank | payload
//! ```
//!
//! all integers are little-endian. numeric payloads are the row-major
//! elements, booleans one byte each, strings a u64 byte length followed by
//! the UTF-8 bytes.

use std::path::Path;

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::types::{element_count, Array, ArrayData, DType};

const MAGIC: &[u8; 4] = b"STKA";
const FORMAT_VERSION: u8 = 1;

macro_rules! put_le {
    ($out:expr, $values:expr) => {
        for value in $values {
            $out.extend_from_slice(&value.to_le_bytes());
        }
    };
}

/// serialize an array to bytes
pub fn encode_array(array: &Array) -> Vec<u8> {
    let header = 4 + 1 + 1 + 4 + 8 * array.rank();
    let payload = array.dtype().item_size().unwrap_or(16) * array.len();
    let mut out = Vec::with_capacity(header + payload);

    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.push(array.dtype().code());
    out.extend_from_slice(&(array.rank() as u32).to_le_bytes());
    for dim in array.shape() {
        out.extend_from_slice(&(*dim as u64).to_le_bytes());
    }

    match array.data() {
        ArrayData::Bool(v) => out.extend(v.iter().map(|b| u8::from(*b))),
        ArrayData::U8(v) => out.extend_from_slice(v),
        ArrayData::U16(v) => put_le!(out, v),
        ArrayData::U32(v) => put_le!(out, v),
        ArrayData::U64(v) => put_le!(out, v),
        ArrayData::I8(v) => put_le!(out, v),
        ArrayData::I16(v) => put_le!(out, v),
        ArrayData::I32(v) => put_le!(out, v),
        ArrayData::I64(v) => put_le!(out, v),
        ArrayData::F32(v) => put_le!(out, v),
        ArrayData::F64(v) => put_le!(out, v),
        ArrayData::Str(v) => {
            for s in v {
                out.extend_from_slice(&(s.len() as u64).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }
    out
}

/// deserialize an array from bytes
///
/// `path` is only used for error reporting.
pub fn decode_array(bytes: &[u8], path: &Path) -> StorageResult<Array> {
    let mut reader = Reader { bytes, pos: 0, path };

    if reader.take(4)? != MAGIC {
        return Err(reader.corrupted("bad magic"));
    }
    let version = reader.u8()?;
    if version != FORMAT_VERSION {
        return Err(reader.corrupted(format!("unsupported format version {}", version)));
    }
    let code = reader.u8()?;
    let dtype = DType::from_code(code)
        .ok_or_else(|| reader.corrupted(format!("unknown dtype code {}", code)))?;

    let rank = reader.u32()? as usize;
    let mut shape = Vec::with_capacity(rank.min(32));
    for _ in 0..rank {
        let dim = reader.u64()?;
        shape.push(usize::try_from(dim).map_err(|_| reader.corrupted("dimension too large"))?);
    }
    let count = shape
        .iter()
        .try_fold(1usize, |acc, dim| acc.checked_mul(*dim))
        .ok_or_else(|| reader.corrupted("element count overflows"))?;
    debug_assert_eq!(count, element_count(&shape));

    let data = match dtype {
        DType::Bool => {
            let raw = reader.take(count)?;
            let mut values = Vec::with_capacity(count);
            for byte in raw {
                match byte {
                    0 => values.push(false),
                    1 => values.push(true),
                    other => return Err(reader.corrupted(format!("invalid bool byte {}", other))),
                }
            }
            ArrayData::Bool(values)
        }
        DType::U8 => ArrayData::U8(reader.take(count)?.to_vec()),
        DType::U16 => ArrayData::U16(reader.read_le(count, u16::from_le_bytes)?),
        DType::U32 => ArrayData::U32(reader.read_le(count, u32::from_le_bytes)?),
        DType::U64 => ArrayData::U64(reader.read_le(count, u64::from_le_bytes)?),
        DType::I8 => ArrayData::I8(reader.read_le(count, i8::from_le_bytes)?),
        DType::I16 => ArrayData::I16(reader.read_le(count, i16::from_le_bytes)?),
        DType::I32 => ArrayData::I32(reader.read_le(count, i32::from_le_bytes)?),
        DType::I64 => ArrayData::I64(reader.read_le(count, i64::from_le_bytes)?),
        DType::F32 => ArrayData::F32(reader.read_le(count, f32::from_le_bytes)?),
        DType::F64 => ArrayData::F64(reader.read_le(count, f64::from_le_bytes)?),
        DType::Str => {
            let mut values = Vec::with_capacity(count.min(1024));
            for _ in 0..count {
                let len = usize::try_from(reader.u64()?)
                    .map_err(|_| reader.corrupted("string too long"))?;
                let raw = reader.take(len)?;
                let s = std::str::from_utf8(raw)
                    .map_err(|_| reader.corrupted("string is not UTF-8"))?;
                values.push(s.to_string());
            }
            ArrayData::Str(values)
        }
    };

    if reader.pos != bytes.len() {
        return Err(reader.corrupted(format!("{} trailing bytes", bytes.len() - reader.pos)));
    }
    Array::new(shape, data)
}

/// write an array as a blob to the repository
pub(crate) fn write_blob(repo: &git2::Repository, array: &Array) -> StorageResult<git2::Oid> {
    Ok(repo.blob(&encode_array(array))?)
}

/// read and decode an array blob
pub(crate) fn read_blob(
    repo: &git2::Repository,
    oid: git2::Oid,
    path: &Path,
) -> StorageResult<Array> {
    let blob = repo.find_blob(oid)?;
    decode_array(blob.content(), path)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    path: &'a Path,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> StorageResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| self.corrupted("unexpected end of data"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> StorageResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> StorageResult<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    fn u64(&mut self) -> StorageResult<u64> {
        let mut buf = [0u8; 8];
        buf.copy_from_slice(self.take(8)?);
        Ok(u64::from_le_bytes(buf))
    }

    fn read_le<T, const N: usize>(
        &mut self,
        count: usize,
        from: fn([u8; N]) -> T,
    ) -> StorageResult<Vec<T>> {
        let len = count
            .checked_mul(N)
            .ok_or_else(|| self.corrupted("payload size overflows"))?;
        let raw = self.take(len)?;
        Ok(raw
            .chunks_exact(N)
            .map(|chunk| {
                let mut buf = [0u8; N];
                buf.copy_from_slice(chunk);
                from(buf)
            })
            .collect())
    }

    fn corrupted(&self, reason: impl Into<String>) -> StorageError {
        StorageError::CorruptedData {
            path: self.path.to_path_buf(),
            reason: reason.into(),
        }
    }
}
