//! # Archive Round-Trip Tests
//!
//! End-to-end coverage of the archive engine against the reference
//! in-memory backend: subtree serialization, two-phase restore with fresh
//! ids, pending-edge resolution, out-of-subtree dependency targets with
//! ancestor reconstruction, data filtering, and the fatal layout checks.

#![allow(clippy::unwrap_used, clippy::panic)]

use tempfile::TempDir;
use trellis_core::{
    ArchiveOptions, Archiver, Chunk, DataType, MemoryStore, MetadataValue, NodeId, NodeStore,
    StoreError, TimeSeriesIndex, TimeSeriesMetadata, Unarchiver,
};

// =============================================================================
// FIXTURE
// =============================================================================

struct SampleTree {
    store: MemoryStore,
    study: NodeId,
    network: NodeId,
    script: NodeId,
    results: NodeId,
    run1: NodeId,
    shared: NodeId,
}

fn load_metadata() -> TimeSeriesMetadata {
    TimeSeriesMetadata {
        data_type: DataType::Double,
        index: TimeSeriesIndex::Regular {
            start: 0,
            end: 3600,
            spacing: 900,
        },
    }
}

fn labels_metadata() -> TimeSeriesMetadata {
    TimeSeriesMetadata {
        data_type: DataType::String,
        index: TimeSeriesIndex::Irregular {
            instants: vec![120, 600, 2400],
        },
    }
}

/// root
/// |- study
/// |  |- network   (metadata, blobs, forward dependency on run1)
/// |  |- script    (scriptContent blob, dependency on shared outside study)
/// |  \- results   (parameters blob)
/// |     \- run1   (two time series, one with an irregular index)
/// \- library
///    \- shared-case
fn sample_tree() -> SampleTree {
    let mut store = MemoryStore::new("source");
    let root = store.root();

    let study = store.create_node(root, "study", "folder").expect("create");
    let network = store.create_node(study, "network", "case").expect("create");
    let script = store.create_node(study, "script", "script").expect("create");
    let results = store.create_node(study, "results", "folder").expect("create");
    let run1 = store
        .create_node(results, "run1", "simulation")
        .expect("create");
    let library = store.create_node(root, "library", "folder").expect("create");
    let shared = store
        .create_node(library, "shared-case", "case")
        .expect("create");

    store
        .set_metadata(network, "country", MetadataValue::Str("FR".into()))
        .expect("metadata");
    store
        .set_metadata(network, "nominalVoltage", MetadataValue::Dbl(380.0))
        .expect("metadata");
    store
        .set_metadata(network, "snapshotCount", MetadataValue::Int(3))
        .expect("metadata");
    store
        .set_metadata(network, "approved", MetadataValue::Bool(true))
        .expect("metadata");
    store
        .write_data(network, "parameters", b"net-params")
        .expect("data");
    store
        .write_data(network, "bigResult", b"computed-output")
        .expect("data");

    store
        .write_data(script, "scriptContent", b"print(42)")
        .expect("data");
    store
        .write_data(results, "parameters", b"res-params")
        .expect("data");

    store
        .set_description(run1, "first run")
        .expect("describe");
    store
        .create_time_series(run1, "load", load_metadata())
        .expect("series");
    store
        .add_chunks(
            run1,
            "load",
            0,
            vec![Chunk::UncompressedDouble {
                offset: 0,
                values: vec![1.0, 2.0, 3.0, 4.0, 5.0],
            }],
        )
        .expect("chunks");
    store
        .add_chunks(
            run1,
            "load",
            1,
            vec![
                Chunk::UncompressedDouble {
                    offset: 0,
                    values: vec![1.5, 2.5],
                },
                Chunk::CompressedDouble {
                    offset: 2,
                    uncompressed_length: 3,
                    step_values: vec![9.0],
                    step_lengths: vec![3],
                },
            ],
        )
        .expect("chunks");
    store
        .create_time_series(run1, "labels", labels_metadata())
        .expect("series");
    store
        .add_chunks(
            run1,
            "labels",
            0,
            vec![Chunk::CompressedString {
                offset: 0,
                uncompressed_length: 3,
                step_values: vec!["ok".into()],
                step_lengths: vec![3],
            }],
        )
        .expect("chunks");

    for id in [study, network, script, results, run1, library, shared] {
        store.finalize_node(id).expect("finalize");
    }

    // Forward reference inside the subtree: run1 is created later in
    // traversal order than network.
    store.add_dependency(network, "out", run1).expect("dep");
    // Target outside the study subtree.
    store.add_dependency(script, "lib", shared).expect("dep");

    SampleTree {
        store,
        study,
        network,
        script,
        results,
        run1,
        shared,
    }
}

fn child_by_name(store: &MemoryStore, parent: NodeId, name: &str) -> NodeId {
    store
        .get_child(parent, name)
        .expect("lookup")
        .unwrap_or_else(|| panic!("no child named {}", name))
}

fn child_names(store: &MemoryStore, parent: NodeId) -> Vec<String> {
    let mut names: Vec<String> = store
        .get_children(parent)
        .expect("children")
        .into_iter()
        .map(|child| store.get_node(child).expect("node").name)
        .collect();
    names.sort();
    names
}

// =============================================================================
// ROUND TRIP
// =============================================================================

#[test]
fn round_trip_rebuilds_isomorphic_tree_with_remapped_edges() {
    let tree = sample_tree();
    let dir = TempDir::new().expect("tempdir");

    Archiver::new(&tree.store)
        .with_options(ArchiveOptions::new().with_dependencies())
        .archive(tree.study, dir.path())
        .expect("archive");

    let mut restored = MemoryStore::new("restored");
    let root = restored.root();
    // Occupy the first id so restored ids visibly diverge from archived ones.
    let preexisting = restored
        .create_node(root, "preexisting", "folder")
        .expect("create");
    restored.finalize_node(preexisting).expect("finalize");

    Unarchiver::new(&mut restored)
        .unarchive(dir.path(), root)
        .expect("unarchive");

    let study = child_by_name(&restored, root, "study");
    assert!(restored.get_node(study).expect("node").consistent);
    assert_ne!(study, tree.study, "restored nodes get freshly allocated ids");
    assert_eq!(
        child_names(&restored, study),
        vec!["network", "results", "script"]
    );

    // Metadata survives with types intact.
    let network = child_by_name(&restored, study, "network");
    let network_node = restored.get_node(network).expect("node");
    let original = tree.store.get_node(tree.network).expect("node");
    assert_eq!(network_node.metadata, original.metadata);
    assert_eq!(network_node.pseudo_class, "case");

    // Default filter: reproducible inputs kept, computed results dropped.
    assert_eq!(
        restored.read_data(network, "parameters").expect("read"),
        Some(b"net-params".to_vec())
    );
    assert_eq!(restored.read_data(network, "bigResult").expect("read"), None);

    let script = child_by_name(&restored, study, "script");
    assert_eq!(
        restored.read_data(script, "scriptContent").expect("read"),
        Some(b"print(42)".to_vec())
    );

    let results = child_by_name(&restored, study, "results");
    assert_eq!(
        restored.read_data(results, "parameters").expect("read"),
        Some(b"res-params".to_vec())
    );

    // Time series: all versions, all chunks, both index variants.
    let run1 = child_by_name(&restored, results, "run1");
    assert_eq!(
        restored.get_node(run1).expect("node").description,
        "first run"
    );
    assert_eq!(
        restored.get_time_series_metadata(run1, "load").expect("ts"),
        load_metadata()
    );
    assert_eq!(
        restored.get_time_series_metadata(run1, "labels").expect("ts"),
        labels_metadata()
    );
    assert_eq!(
        restored.time_series_versions(run1, "load").expect("versions"),
        vec![0, 1]
    );
    assert_eq!(
        restored.get_chunks(run1, "load", 1).expect("chunks"),
        tree.store.get_chunks(tree.run1, "load", 1).expect("chunks")
    );
    assert_eq!(
        restored.get_chunks(run1, "labels", 0).expect("chunks"),
        tree.store
            .get_chunks(tree.run1, "labels", 0)
            .expect("chunks")
    );

    // The forward in-subtree edge is remapped to the restored run1.
    assert_eq!(
        restored.get_dependency_targets(network, "out").expect("deps"),
        vec![run1]
    );

    // The out-of-subtree target was restored under its rebuilt ancestor
    // chain, relative to the boundary node.
    let library = child_by_name(&restored, root, "library");
    let shared = child_by_name(&restored, library, "shared-case");
    assert_eq!(
        restored.get_dependency_targets(script, "lib").expect("deps"),
        vec![shared]
    );
    // The skeleton ancestor carries no data.
    assert!(restored.data_names(library).expect("names").is_empty());
    // The dependency target itself travels in full.
    assert_eq!(
        restored.read_data(shared, "parameters").expect("read"),
        Some(b"shared-params".to_vec())
    );
}

#[test]
fn dependency_ids_in_archive_use_original_ids() {
    let tree = sample_tree();
    let dir = TempDir::new().expect("tempdir");

    Archiver::new(&tree.store)
        .archive(tree.study, dir.path())
        .expect("archive");

    let deps_file = dir
        .path()
        .join(tree.study.to_string())
        .join("children")
        .join(tree.script.to_string())
        .join("dependencies.json");
    let json: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&deps_file).expect("read")).expect("parse");
    assert_eq!(json[0]["nodeId"], tree.shared.0);
    assert_eq!(json[0]["name"], "lib");
}

#[test]
fn keep_all_data_archives_computed_blobs_too() {
    let tree = sample_tree();
    let dir = TempDir::new().expect("tempdir");

    Archiver::new(&tree.store)
        .with_options(ArchiveOptions::new().keeping_all_data())
        .archive(tree.network, dir.path())
        .expect("archive");

    let mut restored = MemoryStore::new("restored");
    let root = restored.root();
    Unarchiver::new(&mut restored)
        .unarchive(dir.path(), root)
        .expect("unarchive");

    let network = child_by_name(&restored, root, "network");
    assert_eq!(
        restored.read_data(network, "bigResult").expect("read"),
        Some(b"computed-output".to_vec())
    );
}

// =============================================================================
// PENDING-EDGE RESOLUTION
// =============================================================================

#[test]
fn unmapped_target_resolves_to_original_id_in_destination_store() {
    let mut source = MemoryStore::new("source");
    let root = source.root();
    let consumer = source.create_node(root, "consumer", "case").expect("create");
    let provider = source.create_node(root, "provider", "case").expect("create");
    source.finalize_node(consumer).expect("finalize");
    source.finalize_node(provider).expect("finalize");
    source.add_dependency(consumer, "input", provider).expect("dep");

    let dir = TempDir::new().expect("tempdir");
    // Dependency targets are NOT archived: the edge keeps the original id.
    Archiver::new(&source)
        .archive(consumer, dir.path())
        .expect("archive");

    // The destination already holds a node under the provider's id.
    let mut dest = MemoryStore::new("dest");
    let dest_root = dest.root();
    let existing1 = dest
        .create_node(dest_root, "existing1", "case")
        .expect("create");
    let existing2 = dest
        .create_node(dest_root, "existing2", "case")
        .expect("create");
    dest.finalize_node(existing1).expect("finalize");
    dest.finalize_node(existing2).expect("finalize");
    assert_eq!(existing2, provider, "fixture relies on matching ids");

    Unarchiver::new(&mut dest)
        .unarchive(dir.path(), dest_root)
        .expect("unarchive");

    let restored = child_by_name(&dest, dest_root, "consumer");
    assert_eq!(
        dest.get_dependency_targets(restored, "input").expect("deps"),
        vec![existing2]
    );
}

#[test]
fn unmapped_target_missing_from_destination_fails_the_restore() {
    let mut source = MemoryStore::new("source");
    let root = source.root();
    let consumer = source.create_node(root, "consumer", "case").expect("create");
    let provider = source.create_node(root, "provider", "case").expect("create");
    source.finalize_node(consumer).expect("finalize");
    source.finalize_node(provider).expect("finalize");
    source.add_dependency(consumer, "input", provider).expect("dep");

    let dir = TempDir::new().expect("tempdir");
    Archiver::new(&source)
        .archive(consumer, dir.path())
        .expect("archive");

    let mut dest = MemoryStore::new("dest");
    let dest_root = dest.root();
    let result = Unarchiver::new(&mut dest).unarchive(dir.path(), dest_root);
    assert!(matches!(result, Err(StoreError::NodeNotFound(_))));
}

#[test]
fn cyclic_dependency_graph_archives_and_restores() {
    let mut source = MemoryStore::new("source");
    let root = source.root();
    let a = source.create_node(root, "a", "case").expect("create");
    let b = source.create_node(root, "b", "case").expect("create");
    source.finalize_node(a).expect("finalize");
    source.finalize_node(b).expect("finalize");
    source.add_dependency(a, "next", b).expect("dep");
    source.add_dependency(b, "next", a).expect("dep");

    let dir = TempDir::new().expect("tempdir");
    Archiver::new(&source)
        .with_options(ArchiveOptions::new().with_dependencies())
        .archive(a, dir.path())
        .expect("archive");

    let mut restored = MemoryStore::new("restored");
    let root = restored.root();
    Unarchiver::new(&mut restored)
        .unarchive(dir.path(), root)
        .expect("unarchive");

    let a2 = child_by_name(&restored, root, "a");
    let b2 = child_by_name(&restored, root, "b");
    assert_eq!(
        restored.get_dependency_targets(a2, "next").expect("deps"),
        vec![b2]
    );
    assert_eq!(
        restored.get_dependency_targets(b2, "next").expect("deps"),
        vec![a2]
    );
}

#[test]
fn multiple_targets_per_edge_name_are_all_restored() {
    let mut source = MemoryStore::new("source");
    let root = source.root();
    let folder = source.create_node(root, "f", "folder").expect("create");
    let consumer = source.create_node(folder, "consumer", "case").expect("create");
    let t1 = source.create_node(folder, "t1", "case").expect("create");
    let t2 = source.create_node(folder, "t2", "case").expect("create");
    for id in [folder, consumer, t1, t2] {
        source.finalize_node(id).expect("finalize");
    }
    source.add_dependency(consumer, "input", t1).expect("dep");
    source.add_dependency(consumer, "input", t2).expect("dep");

    let dir = TempDir::new().expect("tempdir");
    Archiver::new(&source)
        .archive(folder, dir.path())
        .expect("archive");

    let mut restored = MemoryStore::new("restored");
    let root = restored.root();
    Unarchiver::new(&mut restored)
        .unarchive(dir.path(), root)
        .expect("unarchive");

    let folder2 = child_by_name(&restored, root, "f");
    let consumer2 = child_by_name(&restored, folder2, "consumer");
    let targets = restored
        .get_dependency_targets(consumer2, "input")
        .expect("deps");
    assert_eq!(targets.len(), 2);
    let target_names: Vec<String> = targets
        .iter()
        .map(|id| restored.get_node(*id).expect("node").name)
        .collect();
    assert!(target_names.contains(&"t1".to_string()));
    assert!(target_names.contains(&"t2".to_string()));
}

// =============================================================================
// LAYOUT FAILURES
// =============================================================================

#[test]
fn malformed_chunk_file_name_aborts_the_restore() {
    let tree = sample_tree();
    let dir = TempDir::new().expect("tempdir");
    Archiver::new(&tree.store)
        .archive(tree.run1, dir.path())
        .expect("archive");

    let series_dir = dir
        .path()
        .join(tree.run1.to_string())
        .join("time-series")
        .join("load");
    std::fs::rename(
        series_dir.join("chunks-0.json.gz"),
        series_dir.join("chunks-zero.json.gz"),
    )
    .expect("rename");

    let mut restored = MemoryStore::new("restored");
    let root = restored.root();
    let result = Unarchiver::new(&mut restored).unarchive(dir.path(), root);
    assert!(matches!(result, Err(StoreError::CorruptArchive(_))));
}

#[test]
fn node_directory_without_info_json_aborts_the_restore() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::create_dir(dir.path().join("12")).expect("mkdir");

    let mut restored = MemoryStore::new("restored");
    let root = restored.root();
    let result = Unarchiver::new(&mut restored).unarchive(dir.path(), root);
    assert!(matches!(result, Err(StoreError::CorruptArchive(_))));
}

#[test]
fn failed_restore_leaves_finalized_prefix_only() {
    let tree = sample_tree();
    let dir = TempDir::new().expect("tempdir");
    Archiver::new(&tree.store)
        .archive(tree.study, dir.path())
        .expect("archive");

    // Corrupt a chunk file deep in the tree; everything restored before the
    // failure stays, finalized.
    let series_dir = dir
        .path()
        .join(tree.study.to_string())
        .join("children")
        .join(tree.results.to_string())
        .join("children")
        .join(tree.run1.to_string())
        .join("time-series")
        .join("load");
    std::fs::rename(
        series_dir.join("chunks-1.json.gz"),
        series_dir.join("broken.json.gz"),
    )
    .expect("rename");

    let mut restored = MemoryStore::new("restored");
    let root = restored.root();
    let result = Unarchiver::new(&mut restored).unarchive(dir.path(), root);
    assert!(matches!(result, Err(StoreError::CorruptArchive(_))));

    // The study and its earlier children were finalized before the failure.
    let study = child_by_name(&restored, root, "study");
    let node = restored.get_node(study).expect("node");
    assert!(node.consistent);
}

// =============================================================================
// BLOB NAME ENCODING
// =============================================================================

#[test]
fn blob_names_needing_escaping_round_trip() {
    let mut source = MemoryStore::new("source");
    let root = source.root();
    let node = source.create_node(root, "n", "case").expect("create");
    source.finalize_node(node).expect("finalize");
    source
        .write_data(node, "parameters", b"safe")
        .expect("data");

    let awkward = "load profile/1 50%";
    source.write_data(node, awkward, b"escaped").expect("data");

    let dir = TempDir::new().expect("tempdir");
    Archiver::new(&source)
        .with_options(ArchiveOptions::new().keeping_all_data())
        .archive(node, dir.path())
        .expect("archive");

    let mut restored = MemoryStore::new("restored");
    let root = restored.root();
    Unarchiver::new(&mut restored)
        .unarchive(dir.path(), root)
        .expect("unarchive");

    let node2 = child_by_name(&restored, root, "n");
    assert_eq!(
        restored.read_data(node2, awkward).expect("read"),
        Some(b"escaped".to_vec())
    );
}
