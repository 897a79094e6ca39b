//! # In-Memory Store
//!
//! The reference implementation of the store contract.
//!
//! All state lives in `BTreeMap`s for deterministic ordering. The hierarchy
//! and the dependency graph are held as id-indexed tables (an arena), never
//! as object references: edges survive serialization trivially and cycles in
//! the dependency graph cannot produce unbounded traversals.
//!
//! Timestamps come from a logical monotonic counter that ticks on every
//! mutation. Binding instants to wall-clock time is a physical-backend
//! concern; the contract only requires a total order.
//!
//! When an [`EventBus`] is attached, every contract-level mutation pushes a
//! [`NodeEvent`] under the store's name as topic, and [`NodeStore::flush`]
//! flushes the bus so buffered batches reach listeners at durability points.

use crate::events::{EventBus, NodeEvent, NodeEventKind};
use crate::store::{NodeStore, RawNodeRow, StoreInspect};
use crate::timeseries::{Chunk, TimeSeriesMetadata, validate_version_chunks};
use crate::types::{
    BackwardDependency, MetadataValue, Node, NodeDependency, NodeId, StoreError, Timestamp,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Name and pseudo-class of the boundary node every store starts with.
pub const ROOT_NODE_NAME: &str = "root";

// =============================================================================
// ROW TYPES
// =============================================================================

#[derive(Debug, Clone)]
struct NodeRowData {
    /// `None` models the invalid-row state a broken backend can produce.
    name: Option<String>,
    pseudo_class: String,
    description: String,
    creation_time: Timestamp,
    modification_time: Timestamp,
    version: i32,
    consistent: bool,
    metadata: BTreeMap<String, MetadataValue>,
}

#[derive(Debug, Clone)]
struct SeriesEntry {
    metadata: TimeSeriesMetadata,
    /// Version -> chunk list, kept sorted by offset.
    versions: BTreeMap<i32, Vec<Chunk>>,
}

// =============================================================================
// MEMORY STORE
// =============================================================================

/// `BTreeMap`-backed store implementing both the contract and the low-level
/// inspection surface.
pub struct MemoryStore {
    name: String,
    rows: BTreeMap<NodeId, NodeRowData>,
    parents: BTreeMap<NodeId, NodeId>,
    children: BTreeMap<NodeId, Vec<NodeId>>,
    /// from -> name -> set of targets.
    dependencies: BTreeMap<NodeId, BTreeMap<String, BTreeSet<NodeId>>>,
    /// to -> set of (from, name). Derived reverse index.
    backward: BTreeMap<NodeId, BTreeSet<(NodeId, String)>>,
    data: BTreeMap<(NodeId, String), Vec<u8>>,
    series: BTreeMap<(NodeId, String), SeriesEntry>,
    root: NodeId,
    next_node_id: u64,
    clock: i64,
    bus: Option<Arc<EventBus>>,
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.name)
            .field("node_count", &self.rows.len())
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    /// Create an empty store with its root node in place.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let root = NodeId(0);
        let mut rows = BTreeMap::new();
        rows.insert(
            root,
            NodeRowData {
                name: Some(ROOT_NODE_NAME.to_string()),
                pseudo_class: ROOT_NODE_NAME.to_string(),
                description: String::new(),
                creation_time: Timestamp::new(0),
                modification_time: Timestamp::new(0),
                version: 0,
                consistent: true,
                metadata: BTreeMap::new(),
            },
        );
        Self {
            name: name.into(),
            rows,
            parents: BTreeMap::new(),
            children: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            backward: BTreeMap::new(),
            data: BTreeMap::new(),
            series: BTreeMap::new(),
            root,
            next_node_id: 1,
            clock: 0,
            bus: None,
        }
    }

    /// Attach an event bus. Mutations push under the store's name as topic.
    #[must_use]
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Number of node rows, valid or not.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.rows.len()
    }

    fn tick(&mut self) -> Timestamp {
        self.clock = self.clock.saturating_add(1);
        Timestamp::new(self.clock)
    }

    fn emit(&self, id: NodeId, kind: NodeEventKind) {
        if let Some(bus) = &self.bus {
            bus.push_event(NodeEvent::new(id, kind), &self.name);
        }
    }

    fn row(&self, id: NodeId) -> Result<&NodeRowData, StoreError> {
        self.rows.get(&id).ok_or(StoreError::NodeNotFound(id))
    }

    /// Update a row's modification time, never backwards, and return a
    /// mutable handle on it.
    fn touch(&mut self, id: NodeId) -> Result<&mut NodeRowData, StoreError> {
        let now = self.tick();
        let row = self
            .rows
            .get_mut(&id)
            .ok_or(StoreError::NodeNotFound(id))?;
        row.modification_time = row.modification_time.later_of(now);
        Ok(row)
    }

    fn data_names_of(&self, id: NodeId) -> Vec<String> {
        self.data
            .keys()
            .filter(|(owner, _)| *owner == id)
            .map(|(_, name)| name.clone())
            .collect()
    }

    fn series_names_of(&self, id: NodeId) -> Vec<String> {
        self.series
            .keys()
            .filter(|(owner, _)| *owner == id)
            .map(|(_, name)| name.clone())
            .collect()
    }

    /// Drop every dependency edge touching `id`, in both directions.
    fn unlink_dependencies(&mut self, id: NodeId) {
        if let Some(outgoing) = self.dependencies.remove(&id) {
            for (name, targets) in outgoing {
                for to in targets {
                    if let Some(back) = self.backward.get_mut(&to) {
                        back.remove(&(id, name.clone()));
                    }
                }
            }
        }
        if let Some(incoming) = self.backward.remove(&id) {
            for (from, name) in incoming {
                if let Some(by_name) = self.dependencies.get_mut(&from) {
                    if let Some(targets) = by_name.get_mut(&name) {
                        targets.remove(&id);
                        if targets.is_empty() {
                            by_name.remove(&name);
                        }
                    }
                }
            }
        }
    }

    fn delete_recursive(&mut self, id: NodeId) -> Result<(), StoreError> {
        let child_ids: Vec<NodeId> = self.children.get(&id).cloned().unwrap_or_default();
        for child in child_ids {
            // Dangling slots (no row behind them) are skipped; the
            // consistency checker owns those.
            if self.rows.contains_key(&child) {
                self.delete_recursive(child)?;
            }
        }

        self.unlink_dependencies(id);
        for name in self.data_names_of(id) {
            self.data.remove(&(id, name));
        }
        for name in self.series_names_of(id) {
            self.series.remove(&(id, name));
        }
        self.rows.remove(&id);
        self.children.remove(&id);
        self.parents.remove(&id);
        self.emit(id, NodeEventKind::NodeDeleted);
        Ok(())
    }
}

// =============================================================================
// NODE STORE CONTRACT
// =============================================================================

impl NodeStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn root(&self) -> NodeId {
        self.root
    }

    fn create_node(
        &mut self,
        parent: NodeId,
        name: &str,
        pseudo_class: &str,
    ) -> Result<NodeId, StoreError> {
        self.row(parent)?;
        let id = NodeId(self.next_node_id);
        self.next_node_id = self.next_node_id.saturating_add(1);
        let now = self.tick();
        self.rows.insert(
            id,
            NodeRowData {
                name: Some(name.to_string()),
                pseudo_class: pseudo_class.to_string(),
                description: String::new(),
                creation_time: now,
                modification_time: now,
                version: 0,
                consistent: false,
                metadata: BTreeMap::new(),
            },
        );
        self.parents.insert(id, parent);
        self.children.entry(parent).or_default().push(id);
        self.emit(id, NodeEventKind::NodeCreated);
        Ok(id)
    }

    fn get_node(&self, id: NodeId) -> Result<Node, StoreError> {
        let row = self.row(id)?;
        // Invalid rows are invisible to the contract.
        let name = row.name.clone().ok_or(StoreError::NodeNotFound(id))?;
        Ok(Node {
            id,
            name,
            pseudo_class: row.pseudo_class.clone(),
            description: row.description.clone(),
            creation_time: row.creation_time,
            modification_time: row.modification_time,
            version: row.version,
            consistent: row.consistent,
            metadata: row.metadata.clone(),
        })
    }

    fn get_parent(&self, id: NodeId) -> Result<Option<NodeId>, StoreError> {
        self.row(id)?;
        Ok(self.parents.get(&id).copied())
    }

    fn get_children(&self, id: NodeId) -> Result<Vec<NodeId>, StoreError> {
        self.row(id)?;
        Ok(self
            .children
            .get(&id)
            .into_iter()
            .flatten()
            .copied()
            .filter(|child| {
                self.rows
                    .get(child)
                    .is_some_and(|row| row.consistent && row.name.is_some())
            })
            .collect())
    }

    fn get_child(&self, parent: NodeId, name: &str) -> Result<Option<NodeId>, StoreError> {
        for child in self.get_children(parent)? {
            if self
                .rows
                .get(&child)
                .and_then(|row| row.name.as_deref())
                .is_some_and(|n| n == name)
            {
                return Ok(Some(child));
            }
        }
        Ok(None)
    }

    fn rename_node(&mut self, id: NodeId, name: &str) -> Result<(), StoreError> {
        let row = self.touch(id)?;
        row.name = Some(name.to_string());
        self.emit(id, NodeEventKind::NodeRenamed);
        Ok(())
    }

    fn set_description(&mut self, id: NodeId, description: &str) -> Result<(), StoreError> {
        let row = self.touch(id)?;
        row.description = description.to_string();
        self.emit(id, NodeEventKind::NodeUpdated);
        Ok(())
    }

    fn set_metadata(
        &mut self,
        id: NodeId,
        name: &str,
        value: MetadataValue,
    ) -> Result<(), StoreError> {
        let row = self.touch(id)?;
        row.metadata.insert(name.to_string(), value);
        self.emit(id, NodeEventKind::NodeUpdated);
        Ok(())
    }

    fn remove_metadata(&mut self, id: NodeId, name: &str) -> Result<bool, StoreError> {
        let row = self.touch(id)?;
        let existed = row.metadata.remove(name).is_some();
        if existed {
            self.emit(id, NodeEventKind::NodeUpdated);
        }
        Ok(existed)
    }

    fn set_version(&mut self, id: NodeId, version: i32) -> Result<(), StoreError> {
        let row = self.touch(id)?;
        row.version = version;
        self.emit(id, NodeEventKind::NodeUpdated);
        Ok(())
    }

    fn bump_version(&mut self, id: NodeId) -> Result<i32, StoreError> {
        let row = self.touch(id)?;
        row.version = row.version.saturating_add(1);
        let version = row.version;
        self.emit(id, NodeEventKind::NodeUpdated);
        Ok(version)
    }

    fn finalize_node(&mut self, id: NodeId) -> Result<(), StoreError> {
        if self.row(id)?.consistent {
            return Err(StoreError::NodeAlreadyConsistent(id));
        }
        let row = self.touch(id)?;
        row.consistent = true;
        self.emit(id, NodeEventKind::NodeConsistent);
        Ok(())
    }

    fn move_node(&mut self, id: NodeId, new_parent: NodeId) -> Result<(), StoreError> {
        if id == self.root {
            return Err(StoreError::RootIsImmovable);
        }
        self.row(id)?;
        self.row(new_parent)?;
        if let Some(old_parent) = self.parents.get(&id).copied() {
            if let Some(slots) = self.children.get_mut(&old_parent) {
                slots.retain(|child| *child != id);
            }
        }
        self.parents.insert(id, new_parent);
        self.children.entry(new_parent).or_default().push(id);
        self.touch(id)?;
        self.emit(id, NodeEventKind::NodeMoved);
        Ok(())
    }

    fn delete_node(&mut self, id: NodeId) -> Result<NodeId, StoreError> {
        if id == self.root {
            return Err(StoreError::RootIsImmovable);
        }
        self.row(id)?;
        let parent = self
            .parents
            .get(&id)
            .copied()
            .ok_or(StoreError::NodeNotFound(id))?;
        if let Some(slots) = self.children.get_mut(&parent) {
            slots.retain(|child| *child != id);
        }
        self.delete_recursive(id)?;
        self.touch(parent)?;
        Ok(parent)
    }

    fn add_dependency(&mut self, from: NodeId, name: &str, to: NodeId) -> Result<(), StoreError> {
        self.row(from)?;
        self.row(to)?;
        self.dependencies
            .entry(from)
            .or_default()
            .entry(name.to_string())
            .or_default()
            .insert(to);
        self.backward
            .entry(to)
            .or_default()
            .insert((from, name.to_string()));
        self.touch(from)?;
        self.emit(from, NodeEventKind::DependencyAdded);
        Ok(())
    }

    fn get_dependencies(&self, from: NodeId) -> Result<Vec<NodeDependency>, StoreError> {
        self.row(from)?;
        Ok(self
            .dependencies
            .get(&from)
            .into_iter()
            .flat_map(|by_name| {
                by_name.iter().flat_map(|(name, targets)| {
                    targets.iter().map(|to| NodeDependency {
                        name: name.clone(),
                        to: *to,
                    })
                })
            })
            .collect())
    }

    fn get_dependency_targets(&self, from: NodeId, name: &str) -> Result<Vec<NodeId>, StoreError> {
        self.row(from)?;
        Ok(self
            .dependencies
            .get(&from)
            .and_then(|by_name| by_name.get(name))
            .into_iter()
            .flatten()
            .copied()
            .collect())
    }

    fn get_backward_dependencies(
        &self,
        to: NodeId,
    ) -> Result<Vec<BackwardDependency>, StoreError> {
        self.row(to)?;
        Ok(self
            .backward
            .get(&to)
            .into_iter()
            .flatten()
            .map(|(from, name)| BackwardDependency {
                from: *from,
                name: name.clone(),
            })
            .collect())
    }

    fn remove_dependency(
        &mut self,
        from: NodeId,
        name: &str,
        to: NodeId,
    ) -> Result<bool, StoreError> {
        self.row(from)?;
        let mut existed = false;
        if let Some(by_name) = self.dependencies.get_mut(&from) {
            if let Some(targets) = by_name.get_mut(name) {
                existed = targets.remove(&to);
                if targets.is_empty() {
                    by_name.remove(name);
                }
            }
        }
        if existed {
            if let Some(back) = self.backward.get_mut(&to) {
                back.remove(&(from, name.to_string()));
            }
            self.touch(from)?;
            self.emit(from, NodeEventKind::DependencyRemoved);
        }
        Ok(existed)
    }

    fn write_data(&mut self, id: NodeId, name: &str, data: &[u8]) -> Result<(), StoreError> {
        self.row(id)?;
        self.data.insert((id, name.to_string()), data.to_vec());
        self.touch(id)?;
        self.emit(id, NodeEventKind::DataUpdated);
        Ok(())
    }

    fn read_data(&self, id: NodeId, name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.row(id)?;
        Ok(self.data.get(&(id, name.to_string())).cloned())
    }

    fn data_names(&self, id: NodeId) -> Result<Vec<String>, StoreError> {
        self.row(id)?;
        Ok(self.data_names_of(id))
    }

    fn remove_data(&mut self, id: NodeId, name: &str) -> Result<bool, StoreError> {
        self.row(id)?;
        let existed = self.data.remove(&(id, name.to_string())).is_some();
        if existed {
            self.touch(id)?;
            self.emit(id, NodeEventKind::DataUpdated);
        }
        Ok(existed)
    }

    fn create_time_series(
        &mut self,
        id: NodeId,
        name: &str,
        metadata: TimeSeriesMetadata,
    ) -> Result<(), StoreError> {
        self.row(id)?;
        let key = (id, name.to_string());
        if self.series.contains_key(&key) {
            return Err(StoreError::TimeSeriesAlreadyExists {
                node: id,
                name: name.to_string(),
            });
        }
        self.series.insert(
            key,
            SeriesEntry {
                metadata,
                versions: BTreeMap::new(),
            },
        );
        self.touch(id)?;
        self.emit(id, NodeEventKind::TimeSeriesUpdated);
        Ok(())
    }

    fn time_series_names(&self, id: NodeId) -> Result<Vec<String>, StoreError> {
        self.row(id)?;
        Ok(self.series_names_of(id))
    }

    fn get_time_series_metadata(
        &self,
        id: NodeId,
        name: &str,
    ) -> Result<TimeSeriesMetadata, StoreError> {
        self.row(id)?;
        self.series
            .get(&(id, name.to_string()))
            .map(|entry| entry.metadata.clone())
            .ok_or_else(|| StoreError::TimeSeriesNotFound {
                node: id,
                name: name.to_string(),
            })
    }

    fn add_chunks(
        &mut self,
        id: NodeId,
        name: &str,
        version: i32,
        chunks: Vec<Chunk>,
    ) -> Result<(), StoreError> {
        self.row(id)?;
        let key = (id, name.to_string());
        let entry =
            self.series
                .get(&key)
                .ok_or_else(|| StoreError::TimeSeriesNotFound {
                    node: id,
                    name: name.to_string(),
                })?;

        let mut merged: Vec<Chunk> = entry
            .versions
            .get(&version)
            .cloned()
            .unwrap_or_default();
        merged.extend(chunks);
        validate_version_chunks(entry.metadata.data_type, &merged)?;
        merged.sort_by_key(Chunk::offset);

        if let Some(entry) = self.series.get_mut(&key) {
            entry.versions.insert(version, merged);
        }
        self.touch(id)?;
        self.emit(id, NodeEventKind::ChunksAdded);
        Ok(())
    }

    fn get_chunks(&self, id: NodeId, name: &str, version: i32) -> Result<Vec<Chunk>, StoreError> {
        self.row(id)?;
        let entry =
            self.series
                .get(&(id, name.to_string()))
                .ok_or_else(|| StoreError::TimeSeriesNotFound {
                    node: id,
                    name: name.to_string(),
                })?;
        Ok(entry.versions.get(&version).cloned().unwrap_or_default())
    }

    fn time_series_versions(&self, id: NodeId, name: &str) -> Result<Vec<i32>, StoreError> {
        self.row(id)?;
        let entry =
            self.series
                .get(&(id, name.to_string()))
                .ok_or_else(|| StoreError::TimeSeriesNotFound {
                    node: id,
                    name: name.to_string(),
                })?;
        Ok(entry.versions.keys().copied().collect())
    }

    fn remove_time_series(&mut self, id: NodeId, name: &str) -> Result<bool, StoreError> {
        self.row(id)?;
        let existed = self.series.remove(&(id, name.to_string())).is_some();
        if existed {
            self.touch(id)?;
            self.emit(id, NodeEventKind::TimeSeriesUpdated);
        }
        Ok(existed)
    }

    fn flush(&mut self) -> Result<(), StoreError> {
        // Memory is always durable; the flush point still drives event
        // delivery so listeners observe batches at the same boundaries a
        // persistent backend would give them.
        if let Some(bus) = &self.bus {
            bus.flush();
        }
        Ok(())
    }
}

// =============================================================================
// LOW-LEVEL INSPECTION SURFACE
// =============================================================================

impl StoreInspect for MemoryStore {
    fn scan_node_rows(&self) -> Result<Vec<RawNodeRow>, StoreError> {
        Ok(self
            .rows
            .iter()
            .map(|(id, row)| RawNodeRow {
                id: *id,
                name: row.name.clone(),
                consistent: row.consistent,
                modification_time: row.modification_time,
            })
            .collect())
    }

    fn scan_child_slots(&self) -> Result<Vec<(NodeId, NodeId)>, StoreError> {
        Ok(self
            .children
            .iter()
            .flat_map(|(parent, slots)| slots.iter().map(|child| (*parent, *child)))
            .collect())
    }

    fn scan_data_keys(&self) -> Result<Vec<(NodeId, String)>, StoreError> {
        Ok(self.data.keys().cloned().collect())
    }

    fn remove_child_slot(&mut self, parent: NodeId, child: NodeId) -> Result<bool, StoreError> {
        let Some(slots) = self.children.get_mut(&parent) else {
            return Ok(false);
        };
        let before = slots.len();
        slots.retain(|slot| *slot != child);
        Ok(slots.len() != before)
    }

    fn delete_node_row(&mut self, id: NodeId) -> Result<bool, StoreError> {
        Ok(self.rows.remove(&id).is_some())
    }

    fn delete_data_raw(&mut self, id: NodeId, name: &str) -> Result<bool, StoreError> {
        Ok(self.data.remove(&(id, name.to_string())).is_some())
    }

    fn insert_child_slot(&mut self, parent: NodeId, child: NodeId) -> Result<(), StoreError> {
        self.children.entry(parent).or_default().push(child);
        self.parents.insert(child, parent);
        Ok(())
    }

    fn clear_node_name(&mut self, id: NodeId) -> Result<(), StoreError> {
        let row = self
            .rows
            .get_mut(&id)
            .ok_or(StoreError::NodeNotFound(id))?;
        row.name = None;
        Ok(())
    }

    fn insert_data_raw(&mut self, id: NodeId, name: &str, data: &[u8]) -> Result<(), StoreError> {
        self.data.insert((id, name.to_string()), data.to_vec());
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
