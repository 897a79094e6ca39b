//! # trellis-core
//!
//! The backend-agnostic hierarchical node store for Trellis - THE STORE.
//!
//! Tree-structured application data lives in nodes that carry named binary
//! blobs and versioned time series, link to each other via named dependency
//! edges, and become visible to siblings only once explicitly finalized.
//! Around that store this crate implements the three hard pieces:
//!
//! - An **archive engine** that serializes an arbitrary subtree — including
//!   out-of-subtree dependency targets — to a portable directory format and
//!   rebuilds it with fresh identifiers and resolved cross-references.
//! - A **consistency toolkit** that detects and repairs the corruption
//!   classes a non-transactional physical backend can produce.
//! - A **coalescing event bus** that batches change notifications and
//!   dispatches them to weakly-coupled listeners without blocking producers.
//!
//! ## Architectural Constraints
//!
//! - Pure Rust: no async, no network dependencies
//! - Deterministic: `BTreeMap` only, no `HashMap`, no randomness
//! - Backend-agnostic: everything above the contract sees only
//!   [`store::NodeStore`]; concrete physical backends plug in from outside
//! - Single-threaded engines: archive and checks are synchronous and
//!   blocking; only the event bus carries locks, and never across delivery

// =============================================================================
// MODULES
// =============================================================================

pub mod archive;
pub mod checks;
pub mod events;
pub mod formats;
pub mod storage;
pub mod store;
pub mod timeseries;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    BackwardDependency, MetadataValue, Node, NodeDependency, NodeId, StoreError, Timestamp,
};

// =============================================================================
// RE-EXPORTS: Store Contract & Backends
// =============================================================================

pub use storage::MemoryStore;
pub use store::{MaintainableStore, NodeStore, RawNodeRow, StoreInspect};

// =============================================================================
// RE-EXPORTS: Time Series & Wire Codec
// =============================================================================

pub use formats::chunk_codec::{
    CHUNK_CODEC_VERSION, decode_chunk, decode_index, encode_chunk, encode_index,
};
pub use timeseries::{Chunk, DataType, TimeSeriesIndex, TimeSeriesMetadata};

// =============================================================================
// RE-EXPORTS: Archive Engine
// =============================================================================

pub use archive::{ArchiveOptions, Archiver, REPRODUCIBLE_DATA_NAMES, Unarchiver};

// =============================================================================
// RE-EXPORTS: Consistency Checker
// =============================================================================

pub use checks::{
    CheckOptions, ConsistencyCheck, ConsistencyChecker, EXPIRED_INCONSISTENT_NODES,
    ExpiredInconsistentNodesCheck, INVALID_NODE, Issue, InvalidNodeCheck, ORPHAN_DATA,
    ORPHAN_NODE, OrphanDataCheck, OrphanNodeCheck, REFERENCE_NOT_FOUND, ReferenceNotFoundCheck,
};

// =============================================================================
// RE-EXPORTS: Event Bus
// =============================================================================

pub use events::{EventBus, EventListener, NodeEvent, NodeEventKind, SubscriptionId};
