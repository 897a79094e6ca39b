//! # Archive Engine
//!
//! Serializes a node subtree to a portable directory format and rebuilds it
//! with fresh identifiers.
//!
//! Layout, per node:
//!
//! ```text
//! <nodeId>/info.json                                  full node record
//! <nodeId>/dependencies.json                          outgoing edges (original ids), only when present
//! <nodeId>/data/<encoded-name>.gz                     gzip blob
//! <nodeId>/time-series/<encoded-name>/metadata.json   series metadata
//! <nodeId>/time-series/<encoded-name>/chunks-<v>.json.gz
//! <nodeId>/children/<childId>/...                     recursive
//! <nodeId>/dependencies/<depId>/...                   recursive, on request
//! ```
//!
//! Restore is two-phase: every node is created parent-first with a fresh id
//! while dependency declarations accumulate in a pending list, then every
//! pending edge is resolved through the `old id -> new id` mapping. A target
//! missing from the mapping is taken as a node that already existed outside
//! the archived region, under its original id.
//!
//! Any I/O or store failure aborts the whole run; there is no rollback of
//! nodes already created, so a failed restore leaves a partially populated
//! destination for the caller to clean up or retry elsewhere.

use crate::store::NodeStore;
use crate::storage::memory::ROOT_NODE_NAME;
use crate::timeseries::{Chunk, TimeSeriesMetadata};
use crate::types::{MetadataValue, Node, NodeId, StoreError};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

const INFO_FILE: &str = "info.json";
const DEPENDENCIES_FILE: &str = "dependencies.json";
const DATA_DIR: &str = "data";
const TIME_SERIES_DIR: &str = "time-series";
const SERIES_METADATA_FILE: &str = "metadata.json";
const CHILDREN_DIR: &str = "children";
const DEPENDENCIES_DIR: &str = "dependencies";
const CHUNKS_PREFIX: &str = "chunks-";
const CHUNKS_SUFFIX: &str = ".json.gz";
const GZ_SUFFIX: &str = ".gz";

/// Blob names archived by default: the reproducible inputs of a node.
/// Everything else is treated as computed output and dropped unless
/// [`ArchiveOptions::keep_all_data`] is set.
pub const REPRODUCIBLE_DATA_NAMES: [&str; 2] = ["parameters", "scriptContent"];

// =============================================================================
// OPTIONS
// =============================================================================

/// Archive behavior switches.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveOptions {
    /// Also archive dependency targets, under `dependencies/`.
    pub include_dependencies: bool,
    /// Archive every blob instead of the reproducible-inputs allow-list.
    pub keep_all_data: bool,
}

impl ArchiveOptions {
    /// Create default options: no dependency targets, allow-listed data only.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also archive dependency targets.
    #[must_use]
    pub fn with_dependencies(mut self) -> Self {
        self.include_dependencies = true;
        self
    }

    /// Archive every blob.
    #[must_use]
    pub fn keeping_all_data(mut self) -> Self {
        self.keep_all_data = true;
        self
    }
}

// =============================================================================
// ON-DISK DTOS
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct MetadataEntry {
    name: String,
    #[serde(flatten)]
    value: MetadataValue,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NodeInfo {
    id: u64,
    name: String,
    pseudo_class: String,
    description: String,
    creation_time: i64,
    modification_time: i64,
    version: i32,
    metadata: Vec<MetadataEntry>,
}

impl NodeInfo {
    fn from_node(node: &Node) -> Self {
        Self {
            id: node.id.0,
            name: node.name.clone(),
            pseudo_class: node.pseudo_class.clone(),
            description: node.description.clone(),
            creation_time: node.creation_time.value(),
            modification_time: node.modification_time.value(),
            version: node.version,
            metadata: node
                .metadata
                .iter()
                .map(|(name, value)| MetadataEntry {
                    name: name.clone(),
                    value: value.clone(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DependencyDto {
    node_id: u64,
    name: String,
}

// =============================================================================
// FILE NAME ENCODING
// =============================================================================

/// Percent-encode a blob or series name into a safe file name.
fn encode_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'.' | b'-' | b'_' => {
                out.push(byte as char);
            }
            _ => {
                out.push('%');
                out.push_str(&format!("{:02X}", byte));
            }
        }
    }
    out
}

fn hex_value(byte: u8) -> Result<u8, StoreError> {
    (byte as char)
        .to_digit(16)
        .map(|digit| digit as u8)
        .ok_or_else(|| {
            StoreError::CorruptArchive(format!("invalid percent escape byte: {:#x}", byte))
        })
}

/// Decode a percent-encoded file name back into the original name.
fn decode_file_name(encoded: &str) -> Result<String, StoreError> {
    let mut bytes = Vec::with_capacity(encoded.len());
    let mut iter = encoded.bytes();
    while let Some(byte) = iter.next() {
        if byte == b'%' {
            let hi = iter.next().ok_or_else(|| {
                StoreError::CorruptArchive(format!("truncated percent escape in {}", encoded))
            })?;
            let lo = iter.next().ok_or_else(|| {
                StoreError::CorruptArchive(format!("truncated percent escape in {}", encoded))
            })?;
            bytes.push((hex_value(hi)? << 4) | hex_value(lo)?);
        } else {
            bytes.push(byte);
        }
    }
    String::from_utf8(bytes)
        .map_err(|_| StoreError::CorruptArchive(format!("file name is not UTF-8: {}", encoded)))
}

// =============================================================================
// GZIP HELPERS
// =============================================================================

fn write_gzip(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let file = fs::File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(bytes)?;
    encoder.finish()?;
    Ok(())
}

fn read_gzip(path: &Path) -> Result<Vec<u8>, StoreError> {
    let file = fs::File::open(path)?;
    let mut decoder = GzDecoder::new(file);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, StoreError> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Directory entries sorted by file name, for a stable traversal order.
fn sorted_entries(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()?;
    entries.sort();
    Ok(entries)
}

fn file_name_of(path: &Path) -> Result<&str, StoreError> {
    path.file_name().and_then(|name| name.to_str()).ok_or_else(|| {
        StoreError::CorruptArchive(format!("unreadable file name: {}", path.display()))
    })
}

// =============================================================================
// ARCHIVER
// =============================================================================

/// Serializes subtrees to the portable directory format.
///
/// Depth-first, one node at a time. An id already written in the current run
/// is skipped, which keeps cyclic dependency graphs from recursing forever
/// and keeps in-subtree dependency targets in their `children/` position.
pub struct Archiver<'a, S: NodeStore> {
    store: &'a S,
    options: ArchiveOptions,
    archived: BTreeSet<NodeId>,
}

impl<'a, S: NodeStore> Archiver<'a, S> {
    /// Create an archiver over a live store with default options.
    pub fn new(store: &'a S) -> Self {
        Self {
            store,
            options: ArchiveOptions::default(),
            archived: BTreeSet::new(),
        }
    }

    /// Replace the options.
    #[must_use]
    pub fn with_options(mut self, options: ArchiveOptions) -> Self {
        self.options = options;
        self
    }

    /// Archive the subtree rooted at `node` into `dest`.
    ///
    /// # Errors
    ///
    /// The first I/O or store failure aborts the whole run.
    pub fn archive(&mut self, node: NodeId, dest: &Path) -> Result<(), StoreError> {
        fs::create_dir_all(dest)?;
        self.archive_node(node, dest)
    }

    fn archive_node(&mut self, id: NodeId, parent_dir: &Path) -> Result<(), StoreError> {
        if !self.archived.insert(id) {
            return Ok(());
        }
        let node = self.store.get_node(id)?;
        tracing::debug!(id = %id, name = %node.name, "archiving node");

        let node_dir = parent_dir.join(id.to_string());
        fs::create_dir_all(&node_dir)?;
        write_json(&node_dir.join(INFO_FILE), &NodeInfo::from_node(&node))?;

        let dependencies = self.store.get_dependencies(id)?;
        if !dependencies.is_empty() {
            let dtos: Vec<DependencyDto> = dependencies
                .iter()
                .map(|dep| DependencyDto {
                    node_id: dep.to.0,
                    name: dep.name.clone(),
                })
                .collect();
            write_json(&node_dir.join(DEPENDENCIES_FILE), &dtos)?;
        }

        self.archive_data(id, &node_dir)?;
        self.archive_time_series(id, &node_dir)?;

        let children_dir = node_dir.join(CHILDREN_DIR);
        fs::create_dir_all(&children_dir)?;
        for child in self.store.get_children(id)? {
            self.archive_node(child, &children_dir)?;
        }

        if self.options.include_dependencies && !dependencies.is_empty() {
            let deps_dir = node_dir.join(DEPENDENCIES_DIR);
            fs::create_dir_all(&deps_dir)?;
            for dep in dependencies {
                self.archive_dependency_target(dep.to, &deps_dir)?;
            }
        }
        Ok(())
    }

    fn archive_data(&self, id: NodeId, node_dir: &Path) -> Result<(), StoreError> {
        let mut data_dir_created = false;
        for name in self.store.data_names(id)? {
            if !self.options.keep_all_data
                && !REPRODUCIBLE_DATA_NAMES.contains(&name.as_str())
            {
                continue;
            }
            let Some(bytes) = self.store.read_data(id, &name)? else {
                continue;
            };
            let data_dir = node_dir.join(DATA_DIR);
            if !data_dir_created {
                fs::create_dir_all(&data_dir)?;
                data_dir_created = true;
            }
            let file = data_dir.join(format!("{}{}", encode_file_name(&name), GZ_SUFFIX));
            write_gzip(&file, &bytes)?;
        }
        Ok(())
    }

    fn archive_time_series(&self, id: NodeId, node_dir: &Path) -> Result<(), StoreError> {
        for name in self.store.time_series_names(id)? {
            let metadata = self.store.get_time_series_metadata(id, &name)?;
            let series_dir = node_dir
                .join(TIME_SERIES_DIR)
                .join(encode_file_name(&name));
            fs::create_dir_all(&series_dir)?;
            write_json(&series_dir.join(SERIES_METADATA_FILE), &metadata)?;

            for version in self.store.time_series_versions(id, &name)? {
                let chunks = self.store.get_chunks(id, &name, version)?;
                let json = serde_json::to_vec(&chunks)?;
                let file =
                    series_dir.join(format!("{}{}{}", CHUNKS_PREFIX, version, CHUNKS_SUFFIX));
                write_gzip(&file, &json)?;
            }
        }
        Ok(())
    }

    /// Archive a dependency target that may lie outside the subtree.
    ///
    /// The target's ancestor chain is rebuilt first so a restore can put the
    /// target back in its position relative to the boundary node. Ancestors
    /// become skeletons — info.json plus an empty children directory, no
    /// data, no descendants — and ones already materialized on disk are not
    /// duplicated.
    fn archive_dependency_target(
        &mut self,
        target: NodeId,
        deps_dir: &Path,
    ) -> Result<(), StoreError> {
        if self.archived.contains(&target) {
            return Ok(());
        }

        // Walk upwards to the boundary. The boundary is recognized by the
        // conventional root name; an ordinary node carrying that name stops
        // the walk early (see DESIGN.md).
        let mut chain: Vec<Node> = Vec::new();
        let mut current = target;
        while let Some(parent_id) = self.store.get_parent(current)? {
            let parent = self.store.get_node(parent_id)?;
            if parent.name == ROOT_NODE_NAME {
                break;
            }
            chain.push(parent);
            current = parent_id;
        }
        chain.reverse();

        let mut current_dir = deps_dir.to_path_buf();
        for ancestor in &chain {
            let ancestor_dir = current_dir.join(ancestor.id.to_string());
            if !ancestor_dir.exists() {
                fs::create_dir_all(&ancestor_dir)?;
                write_json(&ancestor_dir.join(INFO_FILE), &NodeInfo::from_node(ancestor))?;
                fs::create_dir_all(ancestor_dir.join(CHILDREN_DIR))?;
            }
            current_dir = ancestor_dir.join(CHILDREN_DIR);
        }

        self.archive_node(target, &current_dir)
    }
}

// =============================================================================
// UNARCHIVER
// =============================================================================

struct PendingDependency {
    from: NodeId,
    name: String,
    old_target: u64,
}

/// Rebuilds archived subtrees with freshly allocated ids.
pub struct Unarchiver<'a, S: NodeStore> {
    store: &'a mut S,
    mapping: BTreeMap<u64, NodeId>,
    pending: Vec<PendingDependency>,
}

impl<'a, S: NodeStore> Unarchiver<'a, S> {
    /// Create an unarchiver writing into a live store.
    pub fn new(store: &'a mut S) -> Self {
        Self {
            store,
            mapping: BTreeMap::new(),
            pending: Vec::new(),
        }
    }

    /// Restore every archived subtree under `source` as children of
    /// `parent`, then resolve dependency edges.
    ///
    /// # Errors
    ///
    /// The first I/O or store failure aborts the whole run. Nodes already
    /// restored stay in the store.
    pub fn unarchive(&mut self, source: &Path, parent: NodeId) -> Result<(), StoreError> {
        for entry in sorted_entries(source)? {
            if entry.is_dir() {
                self.restore_node(&entry, parent)?;
            }
        }
        self.resolve_pending()
    }

    fn restore_node(&mut self, dir: &Path, parent: NodeId) -> Result<NodeId, StoreError> {
        let info_path = dir.join(INFO_FILE);
        if !info_path.is_file() {
            return Err(StoreError::CorruptArchive(format!(
                "missing {} in {}",
                INFO_FILE,
                dir.display()
            )));
        }
        let info: NodeInfo = read_json(&info_path)?;

        // A node can surface more than once: as a skeleton ancestor on a
        // dependency chain and again as its full directory. The first
        // sighting creates it; later sightings only add what the earlier
        // ones did not carry (a skeleton has no data and no series).
        if let Some(&existing) = self.mapping.get(&info.id) {
            self.collect_pending(dir, existing)?;
            self.restore_data(dir, existing)?;
            self.restore_time_series(dir, existing)?;
            self.restore_children(dir, existing)?;
            self.restore_dependency_trees(dir)?;
            return Ok(existing);
        }

        let new_id = self
            .store
            .create_node(parent, &info.name, &info.pseudo_class)?;
        self.mapping.insert(info.id, new_id);
        tracing::debug!(old_id = info.id, new_id = %new_id, name = %info.name, "restoring node");

        if !info.description.is_empty() {
            self.store.set_description(new_id, &info.description)?;
        }
        for entry in &info.metadata {
            self.store
                .set_metadata(new_id, &entry.name, entry.value.clone())?;
        }
        if info.version != 0 {
            self.store.set_version(new_id, info.version)?;
        }

        self.collect_pending(dir, new_id)?;
        self.restore_data(dir, new_id)?;
        self.restore_time_series(dir, new_id)?;

        // Finalize and flush before descending: a mid-run failure leaves a
        // strict prefix of complete nodes plus at most one incomplete node,
        // never a consistent node missing its data.
        self.store.finalize_node(new_id)?;
        self.store.flush()?;

        self.restore_children(dir, new_id)?;
        self.restore_dependency_trees(dir)?;
        Ok(new_id)
    }

    /// Queue the node's dependency declarations. Targets may be created
    /// later in traversal order or may already exist outside the archived
    /// region, so nothing resolves before phase 2.
    fn collect_pending(&mut self, dir: &Path, from: NodeId) -> Result<(), StoreError> {
        let deps_path = dir.join(DEPENDENCIES_FILE);
        if !deps_path.is_file() {
            return Ok(());
        }
        let dtos: Vec<DependencyDto> = read_json(&deps_path)?;
        for dto in dtos {
            self.pending.push(PendingDependency {
                from,
                name: dto.name,
                old_target: dto.node_id,
            });
        }
        Ok(())
    }

    fn restore_children(&mut self, dir: &Path, parent: NodeId) -> Result<(), StoreError> {
        let children_dir = dir.join(CHILDREN_DIR);
        if !children_dir.is_dir() {
            return Ok(());
        }
        for entry in sorted_entries(&children_dir)? {
            if entry.is_dir() {
                self.restore_node(&entry, parent)?;
            }
        }
        Ok(())
    }

    /// Archived dependency subtrees carry their own ancestor chains starting
    /// at the boundary, so they restore under the store root.
    fn restore_dependency_trees(&mut self, dir: &Path) -> Result<(), StoreError> {
        let deps_dir = dir.join(DEPENDENCIES_DIR);
        if !deps_dir.is_dir() {
            return Ok(());
        }
        let root = self.store.root();
        for entry in sorted_entries(&deps_dir)? {
            if entry.is_dir() {
                self.restore_node(&entry, root)?;
            }
        }
        Ok(())
    }

    fn restore_data(&mut self, dir: &Path, id: NodeId) -> Result<(), StoreError> {
        let data_dir = dir.join(DATA_DIR);
        if !data_dir.is_dir() {
            return Ok(());
        }
        for entry in sorted_entries(&data_dir)? {
            let file_name = file_name_of(&entry)?;
            let Some(encoded) = file_name.strip_suffix(GZ_SUFFIX) else {
                return Err(StoreError::CorruptArchive(format!(
                    "unexpected data file: {}",
                    entry.display()
                )));
            };
            let name = decode_file_name(encoded)?;
            let bytes = read_gzip(&entry)?;
            self.store.write_data(id, &name, &bytes)?;
        }
        Ok(())
    }

    fn restore_time_series(&mut self, dir: &Path, id: NodeId) -> Result<(), StoreError> {
        let series_root = dir.join(TIME_SERIES_DIR);
        if !series_root.is_dir() {
            return Ok(());
        }
        for series_dir in sorted_entries(&series_root)? {
            if !series_dir.is_dir() {
                return Err(StoreError::CorruptArchive(format!(
                    "unexpected time-series entry: {}",
                    series_dir.display()
                )));
            }
            let name = decode_file_name(file_name_of(&series_dir)?)?;
            let metadata: TimeSeriesMetadata =
                read_json(&series_dir.join(SERIES_METADATA_FILE))?;
            self.store.create_time_series(id, &name, metadata)?;

            for entry in sorted_entries(&series_dir)? {
                let file_name = file_name_of(&entry)?;
                if file_name == SERIES_METADATA_FILE {
                    continue;
                }
                let version = parse_chunk_version(file_name)?;
                let json = read_gzip(&entry)?;
                let chunks: Vec<Chunk> = serde_json::from_slice(&json)?;
                self.store.add_chunks(id, &name, version, chunks)?;
            }
        }
        Ok(())
    }

    fn resolve_pending(&mut self) -> Result<(), StoreError> {
        let pending = std::mem::take(&mut self.pending);
        for dep in pending {
            // A target missing from the mapping already existed outside the
            // archived region, under its original id.
            let target = self
                .mapping
                .get(&dep.old_target)
                .copied()
                .unwrap_or(NodeId(dep.old_target));
            self.store.add_dependency(dep.from, &dep.name, target)?;
        }
        Ok(())
    }
}

/// Parse `chunks-<version>.json.gz`. Anything else in a time-series
/// directory is a fatal layout violation, not a recoverable condition.
fn parse_chunk_version(file_name: &str) -> Result<i32, StoreError> {
    file_name
        .strip_prefix(CHUNKS_PREFIX)
        .and_then(|rest| rest.strip_suffix(CHUNKS_SUFFIX))
        .and_then(|version| version.parse::<i32>().ok())
        .ok_or_else(|| {
            StoreError::CorruptArchive(format!("unexpected chunk file name: {}", file_name))
        })
}

// =============================================================================
// TESTS
// =============================================================================
