//! # Core Type Definitions
//!
//! This module contains all core types for the Trellis hierarchical store:
//! - Node identifiers and instants (`NodeId`, `Timestamp`)
//! - Node records and tagged metadata values (`Node`, `MetadataValue`)
//! - Dependency edge references (`NodeDependency`, `BackwardDependency`)
//! - Error types (`StoreError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Implement `Ord` where they key a `BTreeMap`/`BTreeSet`
//! - Use saturating arithmetic for counters to prevent overflow
//! - Carry instants as opaque ordered values; binding them to wall-clock
//!   time is a backend concern

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS & INSTANTS
// =============================================================================

/// Unique identifier for a node in the store.
///
/// Ids are opaque and stable: they never change for the lifetime of a node,
/// and they are only reassigned by an unarchive operation, which allocates
/// fresh ids for every restored node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An opaque instant with a total order.
///
/// The reference in-memory backend assigns timestamps from a logical
/// monotonic counter; physical backends map them to wall-clock epochs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Create a new timestamp with the given value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Get the raw instant value.
    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// The later of two instants. Modification times never move backwards.
    #[must_use]
    pub fn later_of(self, other: Self) -> Self {
        if other.0 > self.0 { other } else { self }
    }
}

// =============================================================================
// METADATA VALUES
// =============================================================================

/// A tagged metadata value attached to a node under a name.
///
/// One map keyed by name replaces the per-scalar-type tables a physical
/// backend may use underneath; the store contract only ever speaks this
/// tagged union. One value per name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum MetadataValue {
    /// A UTF-8 string value.
    #[serde(rename = "string")]
    Str(String),
    /// A 64-bit float value.
    #[serde(rename = "double")]
    Dbl(f64),
    /// A 64-bit integer value.
    #[serde(rename = "int")]
    Int(i64),
    /// A boolean value.
    #[serde(rename = "boolean")]
    Bool(bool),
}

impl MetadataValue {
    /// The wire tag of this value's type.
    #[must_use]
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Dbl(_) => "double",
            Self::Int(_) => "int",
            Self::Bool(_) => "boolean",
        }
    }
}

// =============================================================================
// NODE
// =============================================================================

/// A node record in the hierarchical store.
///
/// Nodes carry named binary blobs and versioned time series (addressed
/// through the store contract, not stored inline here) and link to each
/// other via named dependency edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// The stable node identifier.
    pub id: NodeId,
    /// The node name. Mandatory; among the children of one parent the name
    /// addresses a child slot.
    pub name: String,
    /// A string tag identifying the semantic type of the node's content,
    /// interpreted by callers outside this crate.
    pub pseudo_class: String,
    /// Free-form description.
    pub description: String,
    /// Instant of creation.
    pub creation_time: Timestamp,
    /// Instant of last mutation. Monotonically non-decreasing.
    pub modification_time: Timestamp,
    /// Caller-managed integer version.
    pub version: i32,
    /// Finalized flag. A node becomes visible to sibling listings only after
    /// the single `false -> true` transition.
    pub consistent: bool,
    /// Name-keyed tagged metadata.
    pub metadata: BTreeMap<String, MetadataValue>,
}

// =============================================================================
// DEPENDENCY EDGES
// =============================================================================

/// A named, directed dependency edge as seen from its source node.
///
/// Edges are a set per `(from, name)`: several targets may share one name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeDependency {
    /// The edge name.
    pub name: String,
    /// The target node.
    pub to: NodeId,
}

/// A dependency edge as seen from its target node (reverse index entry).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BackwardDependency {
    /// The source node.
    pub from: NodeId,
    /// The edge name.
    pub name: String,
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors produced by the Trellis core.
///
/// - No silent failures
/// - Use `Result<T, StoreError>` for fallible operations
/// - Codec tag/shape failures are distinct variants from I/O so callers can
///   tell corrupt or unsupported data from a transport failure
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested node does not exist.
    #[error("Node not found: {0:?}")]
    NodeNotFound(NodeId),

    /// The node was already finalized; the transition happens exactly once.
    #[error("Node already consistent: {0:?}")]
    NodeAlreadyConsistent(NodeId),

    /// The store's boundary node cannot be deleted or moved.
    #[error("The root node cannot be deleted or moved")]
    RootIsImmovable,

    /// No data blob under this name on this node.
    #[error("Data not found: {name} on {node:?}")]
    DataNotFound {
        /// Owning node.
        node: NodeId,
        /// Blob name.
        name: String,
    },

    /// No time series under this name on this node.
    #[error("Time series not found: {name} on {node:?}")]
    TimeSeriesNotFound {
        /// Owning node.
        node: NodeId,
        /// Series name.
        name: String,
    },

    /// A time series with this name already exists on this node.
    #[error("Time series already exists: {name} on {node:?}")]
    TimeSeriesAlreadyExists {
        /// Owning node.
        node: NodeId,
        /// Series name.
        name: String,
    },

    /// A chunk list violates the per-version layout invariant.
    #[error("Invalid chunks: {0}")]
    InvalidChunks(String),

    /// The wire codec met a type tag outside the four known chunk variants.
    #[error("Unexpected chunk type: {0}")]
    UnexpectedChunkType(String),

    /// The wire codec only carries evenly-spaced indexes.
    #[error("Index is not a regular time series index")]
    IrregularIndex,

    /// An archive directory does not follow the expected layout. Fatal:
    /// archives are machine-written, a malformed entry is never skipped.
    #[error("Corrupt archive: {0}")]
    CorruptArchive(String),

    /// A check name not present in the checker's capability set.
    #[error("Unknown consistency check: {0}")]
    UnknownCheck(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_later_of_never_moves_backwards() {
        let t1 = Timestamp::new(10);
        let t2 = Timestamp::new(5);
        assert_eq!(t1.later_of(t2), t1);
        assert_eq!(t2.later_of(t1), t1);
        assert_eq!(t1.later_of(t1), t1);
    }

    #[test]
    fn metadata_value_type_tags() {
        assert_eq!(MetadataValue::Str("x".into()).type_tag(), "string");
        assert_eq!(MetadataValue::Dbl(1.5).type_tag(), "double");
        assert_eq!(MetadataValue::Int(3).type_tag(), "int");
        assert_eq!(MetadataValue::Bool(true).type_tag(), "boolean");
    }

    #[test]
    fn metadata_value_json_shape() {
        let v = MetadataValue::Int(42);
        let json = serde_json::to_value(&v).expect("serialize");
        assert_eq!(json["type"], "int");
        assert_eq!(json["value"], 42);

        let back: MetadataValue = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, v);
    }

    #[test]
    fn io_error_converts_to_store_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = StoreError::from(io);
        assert!(matches!(err, StoreError::Io(_)));
    }

    #[test]
    fn codec_errors_are_distinct_from_io() {
        let tag_err = StoreError::UnexpectedChunkType("bogus".into());
        assert!(!matches!(tag_err, StoreError::Io(_)));
        assert_eq!(
            StoreError::IrregularIndex.to_string(),
            "Index is not a regular time series index"
        );
    }
}
