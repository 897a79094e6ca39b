//! # Time Series Types
//!
//! Versioned time-series storage types: the index describing where points
//! sit, and the chunks carrying the values.
//!
//! A chunk is one segment of a series' values, either dense ("uncompressed",
//! an offset plus a value array) or run-length encoded ("compressed", an
//! offset, a declared uncompressed length, and parallel step-value /
//! step-length arrays).
//!
//! The JSON forms defined here are the archive wire format; the binary wire
//! form lives in [`crate::formats::chunk_codec`].

use crate::types::StoreError;
use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// DATA TYPE & INDEX
// =============================================================================

/// The scalar type of a time series' values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit float points.
    #[serde(rename = "double")]
    Double,
    /// UTF-8 string points.
    #[serde(rename = "string")]
    String,
}

/// The index of a time series: where its points sit on the time axis.
///
/// The JSON archive form carries both variants transparently; the binary
/// wire codec only accepts [`TimeSeriesIndex::Regular`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "indexType", rename_all = "camelCase")]
pub enum TimeSeriesIndex {
    /// Evenly spaced instants over `[start, end]` with the given spacing.
    #[serde(rename = "regular")]
    Regular {
        /// First instant.
        start: i64,
        /// Last instant.
        end: i64,
        /// Step between consecutive instants.
        spacing: i64,
    },
    /// Explicitly listed instants.
    #[serde(rename = "irregular")]
    Irregular {
        /// The instants, in ascending order.
        instants: Vec<i64>,
    },
}

impl TimeSeriesIndex {
    /// Number of points this index describes.
    #[must_use]
    pub fn point_count(&self) -> usize {
        match self {
            Self::Regular {
                start,
                end,
                spacing,
            } => {
                if *spacing <= 0 || end < start {
                    0
                } else {
                    ((end - start) / spacing + 1) as usize
                }
            }
            Self::Irregular { instants } => instants.len(),
        }
    }
}

/// Metadata of one time series: its value type and its index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSeriesMetadata {
    /// Scalar type of the points.
    pub data_type: DataType,
    /// Position of the points on the time axis.
    #[serde(flatten)]
    pub index: TimeSeriesIndex,
}

// =============================================================================
// CHUNKS
// =============================================================================

/// Wire tag for a dense double chunk.
pub const TAG_UNCOMPRESSED_DOUBLE: &str = "uncompressed-double";
/// Wire tag for a run-length-encoded double chunk.
pub const TAG_COMPRESSED_DOUBLE: &str = "compressed-double";
/// Wire tag for a dense string chunk.
pub const TAG_UNCOMPRESSED_STRING: &str = "uncompressed-string";
/// Wire tag for a run-length-encoded string chunk.
pub const TAG_COMPRESSED_STRING: &str = "compressed-string";

/// Deserialize a string array tolerating `null` entries.
///
/// Physical backends serialize absent points as nulls; the store normalizes
/// them to empty strings on the way in.
fn nullable_strings<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Vec<Option<String>> = Vec::deserialize(deserializer)?;
    Ok(raw.into_iter().map(Option::unwrap_or_default).collect())
}

/// One segment of a time series' values at a given version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "chunkType")]
pub enum Chunk {
    /// Dense double values starting at `offset`.
    #[serde(rename = "uncompressed-double", rename_all = "camelCase")]
    UncompressedDouble {
        /// Index of the first value within the series.
        offset: i64,
        /// The values, one per point.
        values: Vec<f64>,
    },

    /// Run-length-encoded double values starting at `offset`.
    #[serde(rename = "compressed-double", rename_all = "camelCase")]
    CompressedDouble {
        /// Index of the first value within the series.
        offset: i64,
        /// Number of points this chunk expands to.
        uncompressed_length: i64,
        /// One value per run. Parallel to `step_lengths`.
        step_values: Vec<f64>,
        /// Run lengths. Parallel to `step_values`.
        step_lengths: Vec<i64>,
    },

    /// Dense string values starting at `offset`.
    #[serde(rename = "uncompressed-string", rename_all = "camelCase")]
    UncompressedString {
        /// Index of the first value within the series.
        offset: i64,
        /// The values, one per point. Nulls normalize to empty strings.
        #[serde(deserialize_with = "nullable_strings")]
        values: Vec<String>,
    },

    /// Run-length-encoded string values starting at `offset`.
    #[serde(rename = "compressed-string", rename_all = "camelCase")]
    CompressedString {
        /// Index of the first value within the series.
        offset: i64,
        /// Number of points this chunk expands to.
        uncompressed_length: i64,
        /// One value per run. Nulls normalize to empty strings.
        #[serde(deserialize_with = "nullable_strings")]
        step_values: Vec<String>,
        /// Run lengths. Parallel to `step_values`.
        step_lengths: Vec<i64>,
    },
}

impl Chunk {
    /// The wire tag of this chunk's variant.
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::UncompressedDouble { .. } => TAG_UNCOMPRESSED_DOUBLE,
            Self::CompressedDouble { .. } => TAG_COMPRESSED_DOUBLE,
            Self::UncompressedString { .. } => TAG_UNCOMPRESSED_STRING,
            Self::CompressedString { .. } => TAG_COMPRESSED_STRING,
        }
    }

    /// Index of the first point this chunk covers.
    #[must_use]
    pub fn offset(&self) -> i64 {
        match self {
            Self::UncompressedDouble { offset, .. }
            | Self::CompressedDouble { offset, .. }
            | Self::UncompressedString { offset, .. }
            | Self::CompressedString { offset, .. } => *offset,
        }
    }

    /// Number of points this chunk describes once expanded.
    #[must_use]
    pub fn point_count(&self) -> i64 {
        match self {
            Self::UncompressedDouble { values, .. } => values.len() as i64,
            Self::UncompressedString { values, .. } => values.len() as i64,
            Self::CompressedDouble {
                uncompressed_length,
                ..
            }
            | Self::CompressedString {
                uncompressed_length,
                ..
            } => *uncompressed_length,
        }
    }

    /// Whether this chunk matches the given scalar type.
    #[must_use]
    pub fn matches_data_type(&self, data_type: DataType) -> bool {
        match self {
            Self::UncompressedDouble { .. } | Self::CompressedDouble { .. } => {
                data_type == DataType::Double
            }
            Self::UncompressedString { .. } | Self::CompressedString { .. } => {
                data_type == DataType::String
            }
        }
    }

    /// Structural equality that compares doubles bitwise, so chunks holding
    /// NaN points still compare equal to their round-tripped selves.
    #[must_use]
    pub fn bitwise_eq(&self, other: &Self) -> bool {
        fn bits(values: &[f64]) -> Vec<u64> {
            values.iter().map(|v| v.to_bits()).collect()
        }
        match (self, other) {
            (
                Self::UncompressedDouble { offset, values },
                Self::UncompressedDouble {
                    offset: o2,
                    values: v2,
                },
            ) => offset == o2 && bits(values) == bits(v2),
            (
                Self::CompressedDouble {
                    offset,
                    uncompressed_length,
                    step_values,
                    step_lengths,
                },
                Self::CompressedDouble {
                    offset: o2,
                    uncompressed_length: l2,
                    step_values: sv2,
                    step_lengths: sl2,
                },
            ) => {
                offset == o2
                    && uncompressed_length == l2
                    && bits(step_values) == bits(sv2)
                    && step_lengths == sl2
            }
            _ => self == other,
        }
    }

    /// Validate the internal shape of this chunk.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidChunks`] when a compressed chunk's
    /// parallel arrays disagree, a run length is not positive, or the run
    /// lengths expand past the declared uncompressed length.
    pub fn validate(&self) -> Result<(), StoreError> {
        match self {
            Self::UncompressedDouble { .. } | Self::UncompressedString { .. } => Ok(()),
            Self::CompressedDouble {
                uncompressed_length,
                step_values,
                step_lengths,
                ..
            } => validate_runs(*uncompressed_length, step_values.len(), step_lengths),
            Self::CompressedString {
                uncompressed_length,
                step_values,
                step_lengths,
                ..
            } => validate_runs(*uncompressed_length, step_values.len(), step_lengths),
        }
    }
}

fn validate_runs(
    uncompressed_length: i64,
    value_count: usize,
    step_lengths: &[i64],
) -> Result<(), StoreError> {
    if value_count != step_lengths.len() {
        return Err(StoreError::InvalidChunks(format!(
            "parallel arrays disagree: {} step values, {} step lengths",
            value_count,
            step_lengths.len()
        )));
    }
    let mut total: i64 = 0;
    for len in step_lengths {
        if *len <= 0 {
            return Err(StoreError::InvalidChunks(format!(
                "non-positive run length {}",
                len
            )));
        }
        total = total.saturating_add(*len);
    }
    if total > uncompressed_length {
        return Err(StoreError::InvalidChunks(format!(
            "runs expand to {} points, declared length is {}",
            total, uncompressed_length
        )));
    }
    Ok(())
}

/// Validate one version's chunk list: every chunk well-formed, all chunks of
/// the series' scalar type, and no two chunks overlapping on the index axis.
///
/// # Errors
///
/// Returns [`StoreError::InvalidChunks`] on the first violation.
pub fn validate_version_chunks(data_type: DataType, chunks: &[Chunk]) -> Result<(), StoreError> {
    for chunk in chunks {
        chunk.validate()?;
        if !chunk.matches_data_type(data_type) {
            return Err(StoreError::InvalidChunks(format!(
                "chunk {} does not match series data type {:?}",
                chunk.type_tag(),
                data_type
            )));
        }
    }

    let mut ranges: Vec<(i64, i64)> = chunks
        .iter()
        .map(|c| (c.offset(), c.offset().saturating_add(c.point_count())))
        .collect();
    ranges.sort_unstable();
    for window in ranges.windows(2) {
        if window[1].0 < window[0].1 {
            return Err(StoreError::InvalidChunks(format!(
                "chunks overlap: [{}, {}) and [{}, {})",
                window[0].0, window[0].1, window[1].0, window[1].1
            )));
        }
    }
    Ok(())
}

// =============================================================================
// TESTS
// =============================================================================
