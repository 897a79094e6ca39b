//! # Chunk Wire Codec
//!
//! Binary serialization for time-series chunks and the regular index.
//!
//! Format: 4-byte big-endian codec version, UTF-8 type tag written as a
//! 2-byte big-endian length plus bytes, then the type-specific payload.
//! Integers and floats are big-endian; strings inside payloads carry a
//! 4-byte length prefix. Arrays carry a 4-byte element count; the two
//! parallel arrays of a compressed chunk share one count.
//!
//! This exact layout is what any physical backend's column/blob serializer
//! must reproduce. The codec recognizes only the regular (evenly spaced)
//! index variant — irregular indexes travel through the JSON archive form
//! instead, and whether a given backend can round-trip them is a per-backend
//! capability.

use crate::timeseries::{
    Chunk, TAG_COMPRESSED_DOUBLE, TAG_COMPRESSED_STRING, TAG_UNCOMPRESSED_DOUBLE,
    TAG_UNCOMPRESSED_STRING, TimeSeriesIndex,
};
use crate::types::StoreError;

/// Current wire codec version.
pub const CHUNK_CODEC_VERSION: i32 = 1;

/// Wire tag for the evenly spaced index.
const TAG_REGULAR_INDEX: &str = "regular";

// =============================================================================
// BYTE WRITER HELPERS
// =============================================================================

fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_i64(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_f64(out: &mut Vec<u8>, value: f64) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn write_tag(out: &mut Vec<u8>, tag: &str) -> Result<(), StoreError> {
    let len = u16::try_from(tag.len())
        .map_err(|_| StoreError::Serialization(format!("tag too long: {}", tag.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(tag.as_bytes());
    Ok(())
}

fn write_string(out: &mut Vec<u8>, value: &str) -> Result<(), StoreError> {
    let len = u32::try_from(value.len())
        .map_err(|_| StoreError::Serialization(format!("string too long: {}", value.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(value.as_bytes());
    Ok(())
}

fn write_count(out: &mut Vec<u8>, count: usize) -> Result<(), StoreError> {
    let count = i32::try_from(count)
        .map_err(|_| StoreError::Serialization(format!("array too long: {}", count)))?;
    write_i32(out, count);
    Ok(())
}

// =============================================================================
// BYTE READER
// =============================================================================

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], StoreError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| StoreError::Serialization("truncated chunk payload".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_i32(&mut self) -> Result<i32, StoreError> {
        let bytes = self.take(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn read_i64(&mut self) -> Result<i64, StoreError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(i64::from_be_bytes(raw))
    }

    fn read_f64(&mut self) -> Result<f64, StoreError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(f64::from_be_bytes(raw))
    }

    fn read_tag(&mut self) -> Result<String, StoreError> {
        let bytes = self.take(2)?;
        let len = u16::from_be_bytes([bytes[0], bytes[1]]) as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| StoreError::Serialization("type tag is not UTF-8".to_string()))
    }

    fn read_string(&mut self) -> Result<String, StoreError> {
        let bytes = self.take(4)?;
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| StoreError::Serialization("string value is not UTF-8".to_string()))
    }

    fn read_count(&mut self) -> Result<usize, StoreError> {
        let count = self.read_i32()?;
        usize::try_from(count)
            .map_err(|_| StoreError::Serialization(format!("negative array count: {}", count)))
    }
}

// =============================================================================
// CHUNK ENCODE / DECODE
// =============================================================================

/// Encode one chunk to its wire form.
pub fn encode_chunk(chunk: &Chunk) -> Result<Vec<u8>, StoreError> {
    let mut out = Vec::new();
    write_i32(&mut out, CHUNK_CODEC_VERSION);
    write_tag(&mut out, chunk.type_tag())?;

    match chunk {
        Chunk::UncompressedDouble { offset, values } => {
            write_i64(&mut out, *offset);
            write_count(&mut out, values.len())?;
            for value in values {
                write_f64(&mut out, *value);
            }
        }
        Chunk::CompressedDouble {
            offset,
            uncompressed_length,
            step_values,
            step_lengths,
        } => {
            write_i64(&mut out, *offset);
            write_i64(&mut out, *uncompressed_length);
            write_count(&mut out, step_values.len())?;
            for value in step_values {
                write_f64(&mut out, *value);
            }
            for len in step_lengths {
                write_i64(&mut out, *len);
            }
        }
        Chunk::UncompressedString { offset, values } => {
            write_i64(&mut out, *offset);
            write_count(&mut out, values.len())?;
            for value in values {
                write_string(&mut out, value)?;
            }
        }
        Chunk::CompressedString {
            offset,
            uncompressed_length,
            step_values,
            step_lengths,
        } => {
            write_i64(&mut out, *offset);
            write_i64(&mut out, *uncompressed_length);
            write_count(&mut out, step_values.len())?;
            for value in step_values {
                write_string(&mut out, value)?;
            }
            for len in step_lengths {
                write_i64(&mut out, *len);
            }
        }
    }
    Ok(out)
}

/// Decode one chunk from its wire form.
///
/// # Errors
///
/// [`StoreError::UnexpectedChunkType`] for a tag outside the four known
/// variants; [`StoreError::Serialization`] for a truncated or malformed
/// payload — distinct errors so callers can tell unsupported data from
/// corruption.
pub fn decode_chunk(bytes: &[u8]) -> Result<Chunk, StoreError> {
    let mut reader = ByteReader::new(bytes);
    let version = reader.read_i32()?;
    if version != CHUNK_CODEC_VERSION {
        return Err(StoreError::Serialization(format!(
            "unsupported chunk codec version: {}",
            version
        )));
    }

    let tag = reader.read_tag()?;
    match tag.as_str() {
        TAG_UNCOMPRESSED_DOUBLE => {
            let offset = reader.read_i64()?;
            let count = reader.read_count()?;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(reader.read_f64()?);
            }
            Ok(Chunk::UncompressedDouble { offset, values })
        }
        TAG_COMPRESSED_DOUBLE => {
            let offset = reader.read_i64()?;
            let uncompressed_length = reader.read_i64()?;
            let count = reader.read_count()?;
            let mut step_values = Vec::with_capacity(count);
            for _ in 0..count {
                step_values.push(reader.read_f64()?);
            }
            let mut step_lengths = Vec::with_capacity(count);
            for _ in 0..count {
                step_lengths.push(reader.read_i64()?);
            }
            Ok(Chunk::CompressedDouble {
                offset,
                uncompressed_length,
                step_values,
                step_lengths,
            })
        }
        TAG_UNCOMPRESSED_STRING => {
            let offset = reader.read_i64()?;
            let count = reader.read_count()?;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(reader.read_string()?);
            }
            Ok(Chunk::UncompressedString { offset, values })
        }
        TAG_COMPRESSED_STRING => {
            let offset = reader.read_i64()?;
            let uncompressed_length = reader.read_i64()?;
            let count = reader.read_count()?;
            let mut step_values = Vec::with_capacity(count);
            for _ in 0..count {
                step_values.push(reader.read_string()?);
            }
            let mut step_lengths = Vec::with_capacity(count);
            for _ in 0..count {
                step_lengths.push(reader.read_i64()?);
            }
            Ok(Chunk::CompressedString {
                offset,
                uncompressed_length,
                step_values,
                step_lengths,
            })
        }
        other => Err(StoreError::UnexpectedChunkType(other.to_string())),
    }
}

// =============================================================================
// INDEX ENCODE / DECODE
// =============================================================================

/// Encode a time-series index to its wire form.
///
/// # Errors
///
/// [`StoreError::IrregularIndex`] — only the regular variant has a wire
/// shape.
pub fn encode_index(index: &TimeSeriesIndex) -> Result<Vec<u8>, StoreError> {
    match index {
        TimeSeriesIndex::Regular {
            start,
            end,
            spacing,
        } => {
            let mut out = Vec::new();
            write_i32(&mut out, CHUNK_CODEC_VERSION);
            write_tag(&mut out, TAG_REGULAR_INDEX)?;
            write_i64(&mut out, *start);
            write_i64(&mut out, *end);
            write_i64(&mut out, *spacing);
            Ok(out)
        }
        TimeSeriesIndex::Irregular { .. } => Err(StoreError::IrregularIndex),
    }
}

/// Decode a time-series index from its wire form.
///
/// # Errors
///
/// [`StoreError::IrregularIndex`] for any tag other than the regular one.
pub fn decode_index(bytes: &[u8]) -> Result<TimeSeriesIndex, StoreError> {
    let mut reader = ByteReader::new(bytes);
    let version = reader.read_i32()?;
    if version != CHUNK_CODEC_VERSION {
        return Err(StoreError::Serialization(format!(
            "unsupported index codec version: {}",
            version
        )));
    }

    let tag = reader.read_tag()?;
    if tag != TAG_REGULAR_INDEX {
        return Err(StoreError::IrregularIndex);
    }
    Ok(TimeSeriesIndex::Regular {
        start: reader.read_i64()?,
        end: reader.read_i64()?,
        spacing: reader.read_i64()?,
    })
}

// =============================================================================
// TESTS
// =============================================================================
