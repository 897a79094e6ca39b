//! # Store Contract
//!
//! The backend-agnostic CRUD boundary of the Trellis store.
//!
//! Everything above the storage layer — the archive engine, the consistency
//! checker, transport adapters — consumes [`NodeStore`] and nothing else.
//! Backends implement it over whatever physical layout they like, as long as
//! the contract semantics hold:
//!
//! - Nodes are created `consistent = false` and excluded from child listings
//!   until [`NodeStore::finalize_node`] performs the single
//!   `false -> true` transition.
//! - Dependency edges are a set per `(from, name)`, with a derived reverse
//!   index.
//! - Deleting a node cascades over children, both dependency directions,
//!   blobs and time series.
//! - Modification times never move backwards.
//!
//! [`StoreInspect`] is the second, low-level surface: it exposes backend
//! states the contract cannot represent (nameless rows, dangling child
//! slots, orphaned blobs), for the consistency checker and for tests that
//! need to reproduce what a non-atomic backend leaves behind.

use crate::timeseries::{Chunk, TimeSeriesMetadata};
use crate::types::{
    BackwardDependency, MetadataValue, Node, NodeDependency, NodeId, StoreError, Timestamp,
};

// =============================================================================
// NODE STORE CONTRACT
// =============================================================================

/// The abstract CRUD interface over nodes, dependency edges, binary blobs
/// and time series.
///
/// All fallible operations return `Result<T, StoreError>` so in-memory and
/// persistent backends share one signature. The trait is object-safe; the
/// consistency checker works against `&mut dyn` stores.
pub trait NodeStore {
    /// The store's name. Doubles as the event-bus topic for its change
    /// notifications.
    fn name(&self) -> &str;

    /// The boundary node every store starts with.
    fn root(&self) -> NodeId;

    /// Create a node under `parent` with `consistent = false`. Returns the
    /// freshly allocated id.
    fn create_node(
        &mut self,
        parent: NodeId,
        name: &str,
        pseudo_class: &str,
    ) -> Result<NodeId, StoreError>;

    /// Fetch the full node record.
    fn get_node(&self, id: NodeId) -> Result<Node, StoreError>;

    /// The node's parent, or `None` for the root.
    fn get_parent(&self, id: NodeId) -> Result<Option<NodeId>, StoreError>;

    /// Consistent children of `id`, in slot order. Nodes not yet finalized
    /// are excluded.
    fn get_children(&self, id: NodeId) -> Result<Vec<NodeId>, StoreError>;

    /// Look up a consistent child of `parent` by name. Names address child
    /// slots; the first matching slot wins.
    fn get_child(&self, parent: NodeId, name: &str) -> Result<Option<NodeId>, StoreError>;

    /// Rename the node in place.
    fn rename_node(&mut self, id: NodeId, name: &str) -> Result<(), StoreError>;

    /// Replace the node's description.
    fn set_description(&mut self, id: NodeId, description: &str) -> Result<(), StoreError>;

    /// Set or replace one metadata value under `name`.
    fn set_metadata(
        &mut self,
        id: NodeId,
        name: &str,
        value: MetadataValue,
    ) -> Result<(), StoreError>;

    /// Remove one metadata value. Returns whether it existed.
    fn remove_metadata(&mut self, id: NodeId, name: &str) -> Result<bool, StoreError>;

    /// Overwrite the caller-managed version counter.
    fn set_version(&mut self, id: NodeId, version: i32) -> Result<(), StoreError>;

    /// Increment the caller-managed version counter. Returns the new value.
    fn bump_version(&mut self, id: NodeId) -> Result<i32, StoreError>;

    /// Perform the single `consistent = false -> true` transition.
    ///
    /// # Errors
    ///
    /// [`StoreError::NodeAlreadyConsistent`] when called twice.
    fn finalize_node(&mut self, id: NodeId) -> Result<(), StoreError>;

    /// Reparent the node under `new_parent`.
    fn move_node(&mut self, id: NodeId, new_parent: NodeId) -> Result<(), StoreError>;

    /// Delete the node recursively: children, dependency edges in both
    /// directions, blobs, time series. Returns the former parent.
    fn delete_node(&mut self, id: NodeId) -> Result<NodeId, StoreError>;

    /// Add a dependency edge `(from, name, to)`. Edges form a set: adding
    /// the same triple twice is a no-op.
    fn add_dependency(&mut self, from: NodeId, name: &str, to: NodeId) -> Result<(), StoreError>;

    /// All outgoing edges of `from`.
    fn get_dependencies(&self, from: NodeId) -> Result<Vec<NodeDependency>, StoreError>;

    /// Targets of the outgoing edges named `name`.
    fn get_dependency_targets(&self, from: NodeId, name: &str) -> Result<Vec<NodeId>, StoreError>;

    /// The reverse index: every `(from, name)` pair pointing at `to`.
    fn get_backward_dependencies(&self, to: NodeId) -> Result<Vec<BackwardDependency>, StoreError>;

    /// Remove one dependency edge. Returns whether it existed.
    fn remove_dependency(
        &mut self,
        from: NodeId,
        name: &str,
        to: NodeId,
    ) -> Result<bool, StoreError>;

    /// Write (or overwrite) a named blob.
    fn write_data(&mut self, id: NodeId, name: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Read a named blob, `None` when absent.
    fn read_data(&self, id: NodeId, name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Names of all blobs on this node.
    fn data_names(&self, id: NodeId) -> Result<Vec<String>, StoreError>;

    /// Remove a named blob. Returns whether it existed.
    fn remove_data(&mut self, id: NodeId, name: &str) -> Result<bool, StoreError>;

    /// Create a time series under `(id, name)`.
    ///
    /// # Errors
    ///
    /// [`StoreError::TimeSeriesAlreadyExists`] on a duplicate name.
    fn create_time_series(
        &mut self,
        id: NodeId,
        name: &str,
        metadata: TimeSeriesMetadata,
    ) -> Result<(), StoreError>;

    /// Names of all time series on this node.
    fn time_series_names(&self, id: NodeId) -> Result<Vec<String>, StoreError>;

    /// Metadata of one time series.
    fn get_time_series_metadata(
        &self,
        id: NodeId,
        name: &str,
    ) -> Result<TimeSeriesMetadata, StoreError>;

    /// Append chunks to one version of a time series. The merged chunk list
    /// of the version is validated: chunks must match the series' scalar
    /// type and must not overlap.
    fn add_chunks(
        &mut self,
        id: NodeId,
        name: &str,
        version: i32,
        chunks: Vec<Chunk>,
    ) -> Result<(), StoreError>;

    /// Ordered chunk list of one version. Empty when the version holds no
    /// chunks yet.
    fn get_chunks(&self, id: NodeId, name: &str, version: i32) -> Result<Vec<Chunk>, StoreError>;

    /// All versions of a time series that hold chunks, ascending.
    fn time_series_versions(&self, id: NodeId, name: &str) -> Result<Vec<i32>, StoreError>;

    /// Remove a time series and all its versions. Returns whether it
    /// existed.
    fn remove_time_series(&mut self, id: NodeId, name: &str) -> Result<bool, StoreError>;

    /// Durability point. The unarchiver flushes after finalizing each node
    /// so a mid-run failure leaves at most one incomplete node behind.
    fn flush(&mut self) -> Result<(), StoreError>;
}

// =============================================================================
// LOW-LEVEL INSPECTION SURFACE
// =============================================================================

/// A node row as the physical backend sees it.
///
/// Unlike [`Node`], the name is optional here: a row with no name is exactly
/// the corruption class the consistency checker hunts, a state the contract
/// itself cannot represent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNodeRow {
    /// Row id.
    pub id: NodeId,
    /// Row name; `None` marks an invalid row.
    pub name: Option<String>,
    /// Finalized flag.
    pub consistent: bool,
    /// Instant of last mutation.
    pub modification_time: Timestamp,
}

/// Low-level scan and repair surface, bypassing the store contract.
///
/// The consistency checker snapshots backend state through these methods and
/// repairs through the targeted deletes. The insertion methods exist so
/// maintenance tooling and tests can reproduce the anomalies a non-atomic
/// backend leaves behind; a healthy code path never calls them.
pub trait StoreInspect {
    /// Snapshot every node row, valid or not.
    fn scan_node_rows(&self) -> Result<Vec<RawNodeRow>, StoreError>;

    /// Snapshot every `(parent, child)` slot pair, including slots whose
    /// child row no longer exists.
    fn scan_child_slots(&self) -> Result<Vec<(NodeId, NodeId)>, StoreError>;

    /// Snapshot every `(owner, name)` blob key, including blobs whose owner
    /// row no longer exists.
    fn scan_data_keys(&self) -> Result<Vec<(NodeId, String)>, StoreError>;

    /// Remove one child slot from a parent, touching nothing else. Returns
    /// whether the slot existed.
    fn remove_child_slot(&mut self, parent: NodeId, child: NodeId) -> Result<bool, StoreError>;

    /// Delete one node row directly, bypassing the cascading delete. Child
    /// slots, blobs and series of the row are left untouched. Returns
    /// whether the row existed.
    fn delete_node_row(&mut self, id: NodeId) -> Result<bool, StoreError>;

    /// Delete one blob by raw key, regardless of whether its owner exists.
    /// Returns whether the blob existed.
    fn delete_data_raw(&mut self, id: NodeId, name: &str) -> Result<bool, StoreError>;

    /// Insert a child slot without validating the child. Anomaly injector.
    fn insert_child_slot(&mut self, parent: NodeId, child: NodeId) -> Result<(), StoreError>;

    /// Erase a row's name, making it invalid. Anomaly injector.
    fn clear_node_name(&mut self, id: NodeId) -> Result<(), StoreError>;

    /// Insert a blob by raw key without validating the owner. Anomaly
    /// injector.
    fn insert_data_raw(&mut self, id: NodeId, name: &str, data: &[u8]) -> Result<(), StoreError>;
}

/// Everything the consistency checker needs: the contract for cascading
/// repairs plus the raw surface for scans and targeted deletes.
pub trait MaintainableStore: NodeStore + StoreInspect {}

impl<T: NodeStore + StoreInspect> MaintainableStore for T {}
