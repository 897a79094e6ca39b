//! # Consistency Checker
//!
//! Detects and repairs the corruption classes a non-transactional,
//! multi-table physical backend can produce: dangling child references,
//! invalid rows, orphaned blobs, abandoned in-progress nodes.
//!
//! Checks scan backend state directly through [`StoreInspect`] — the
//! anomalies they look for are states the store contract cannot represent —
//! and repair either through the contract (cascading deletes) or through
//! targeted low-level deletes.
//!
//! Every check snapshots the relevant tables into memory first, then reports,
//! then repairs when asked. The snapshot-then-repair pattern is not
//! transactional with concurrent writers: this is a maintenance-window tool,
//! with O(scanned-table-size) memory.
//!
//! The registry is an explicit capability set built by the caller, not a
//! global static: tests inject doubles and operators run partial sets
//! without touching shared state.

use crate::store::MaintainableStore;
use crate::types::{NodeId, StoreError, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// =============================================================================
// ISSUES & OPTIONS
// =============================================================================

/// One detected (and possibly repaired) inconsistency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Name of the check that produced this issue.
    pub issue_type: String,
    /// The node concerned, when one can be named.
    pub node_id: Option<NodeId>,
    /// Its name, when the row still carries one.
    pub node_name: Option<String>,
    /// Human-readable account of what is broken.
    pub description: String,
    /// Whether a repair was performed.
    pub repaired: bool,
    /// Human-readable account of the repair, empty when none ran.
    pub resolution_description: String,
}

impl Issue {
    fn new(issue_type: &str, node_id: Option<NodeId>, node_name: Option<String>) -> Self {
        Self {
            issue_type: issue_type.to_string(),
            node_id,
            node_name,
            description: String::new(),
            repaired: false,
            resolution_description: String::new(),
        }
    }

    fn describe(mut self, description: String) -> Self {
        self.description = description;
        self
    }

    fn resolve(&mut self, resolution: String) {
        self.repaired = true;
        self.resolution_description = resolution;
        tracing::info!(
            issue_type = %self.issue_type,
            node = ?self.node_id,
            resolution = %self.resolution_description,
            "repaired inconsistency"
        );
    }
}

/// Check run configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct CheckOptions {
    /// Perform repairs, not just detection.
    pub repair: bool,
    /// Cutoff for [`ExpiredInconsistentNodesCheck`]: never-finalized nodes
    /// last touched strictly before this instant are flagged. Without a
    /// cutoff that check reports nothing.
    pub inconsistent_expiration: Option<Timestamp>,
}

impl CheckOptions {
    /// Detection-only options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable repairs.
    #[must_use]
    pub fn with_repair(mut self) -> Self {
        self.repair = true;
        self
    }

    /// Set the expiration cutoff.
    #[must_use]
    pub fn with_expiration(mut self, cutoff: Timestamp) -> Self {
        self.inconsistent_expiration = Some(cutoff);
        self
    }
}

// =============================================================================
// CHECK TRAIT & REGISTRY
// =============================================================================

/// One independent consistency check.
///
/// Detection must be pure: running a non-repairing check twice reports the
/// same issues. A scan or repair failure aborts the whole run of the check —
/// no partial issue list comes back on error.
pub trait ConsistencyCheck {
    /// Stable name callers select the check by.
    fn name(&self) -> &'static str;

    /// Scan, report, and — when `options.repair` — remediate.
    fn run(
        &self,
        store: &mut dyn MaintainableStore,
        options: &CheckOptions,
    ) -> Result<Vec<Issue>, StoreError>;
}

/// Name of [`ReferenceNotFoundCheck`].
pub const REFERENCE_NOT_FOUND: &str = "REFERENCE_NOT_FOUND";
/// Name of [`InvalidNodeCheck`].
pub const INVALID_NODE: &str = "INVALID_NODE";
/// Name of [`OrphanNodeCheck`].
pub const ORPHAN_NODE: &str = "ORPHAN_NODE";
/// Name of [`OrphanDataCheck`].
pub const ORPHAN_DATA: &str = "ORPHAN_DATA";
/// Name of [`ExpiredInconsistentNodesCheck`].
pub const EXPIRED_INCONSISTENT_NODES: &str = "EXPIRED_INCONSISTENT_NODES";

/// An explicit, constructed-at-startup set of checks.
pub struct ConsistencyChecker {
    checks: Vec<Box<dyn ConsistencyCheck>>,
}

impl ConsistencyChecker {
    /// Build a checker from an explicit capability set.
    #[must_use]
    pub fn new(checks: Vec<Box<dyn ConsistencyCheck>>) -> Self {
        Self { checks }
    }

    /// The standard five checks.
    #[must_use]
    pub fn with_default_checks() -> Self {
        Self::new(vec![
            Box::new(ReferenceNotFoundCheck),
            Box::new(InvalidNodeCheck),
            Box::new(OrphanNodeCheck),
            Box::new(OrphanDataCheck),
            Box::new(ExpiredInconsistentNodesCheck),
        ])
    }

    /// Names of the registered checks, in run order.
    #[must_use]
    pub fn check_names(&self) -> Vec<&'static str> {
        self.checks.iter().map(|check| check.name()).collect()
    }

    /// Run the named subset, in registration order, concatenating issues.
    ///
    /// # Errors
    ///
    /// [`StoreError::UnknownCheck`] when a selected name is not registered;
    /// nothing runs in that case.
    pub fn run_checks(
        &self,
        store: &mut dyn MaintainableStore,
        names: &[&str],
        options: &CheckOptions,
    ) -> Result<Vec<Issue>, StoreError> {
        let known: BTreeSet<&str> = self.checks.iter().map(|check| check.name()).collect();
        for name in names {
            if !known.contains(name) {
                return Err(StoreError::UnknownCheck((*name).to_string()));
            }
        }

        let selected: BTreeSet<&str> = names.iter().copied().collect();
        let mut issues = Vec::new();
        for check in &self.checks {
            if selected.contains(check.name()) {
                issues.extend(check.run(store, options)?);
            }
        }
        Ok(issues)
    }

    /// Run every registered check.
    pub fn run_all(
        &self,
        store: &mut dyn MaintainableStore,
        options: &CheckOptions,
    ) -> Result<Vec<Issue>, StoreError> {
        let names = self.check_names();
        self.run_checks(store, &names, options)
    }
}

// =============================================================================
// REFERENCE NOT FOUND
// =============================================================================

/// A parent's child slot references a node id with no row behind it.
pub struct ReferenceNotFoundCheck;

impl ConsistencyCheck for ReferenceNotFoundCheck {
    fn name(&self) -> &'static str {
        REFERENCE_NOT_FOUND
    }

    fn run(
        &self,
        store: &mut dyn MaintainableStore,
        options: &CheckOptions,
    ) -> Result<Vec<Issue>, StoreError> {
        let rows = store.scan_node_rows()?;
        let ids: BTreeSet<NodeId> = rows.iter().map(|row| row.id).collect();
        let names: BTreeMap<NodeId, Option<String>> =
            rows.into_iter().map(|row| (row.id, row.name)).collect();

        let mut issues = Vec::new();
        for (parent, child) in store.scan_child_slots()? {
            if ids.contains(&child) {
                continue;
            }
            let mut issue = Issue::new(
                REFERENCE_NOT_FOUND,
                Some(child),
                names.get(&parent).cloned().flatten(),
            )
            .describe(format!(
                "node {} references missing child {}",
                parent, child
            ));
            if options.repair {
                store.remove_child_slot(parent, child)?;
                issue.resolve(format!("removed reference to {} from {}", child, parent));
            }
            issues.push(issue);
        }
        Ok(issues)
    }
}

// =============================================================================
// INVALID NODE
// =============================================================================

/// A node row has no name. The name is mandatory; such a row is unusable
/// through the contract.
pub struct InvalidNodeCheck;

impl ConsistencyCheck for InvalidNodeCheck {
    fn name(&self) -> &'static str {
        INVALID_NODE
    }

    fn run(
        &self,
        store: &mut dyn MaintainableStore,
        options: &CheckOptions,
    ) -> Result<Vec<Issue>, StoreError> {
        let rows = store.scan_node_rows()?;

        let mut issues = Vec::new();
        for row in rows {
            if row.name.is_some() {
                continue;
            }
            let mut issue = Issue::new(INVALID_NODE, Some(row.id), None)
                .describe(format!("node row {} has no name", row.id));
            if options.repair {
                // The row is unreachable through the contract, so the
                // cascading delete cannot apply; drop the row directly.
                store.delete_node_row(row.id)?;
                issue.resolve(format!("deleted node row {}", row.id));
            }
            issues.push(issue);
        }
        Ok(issues)
    }
}

// =============================================================================
// ORPHAN NODE
// =============================================================================

/// A child slot whose owner row is itself invalid (nameless): the child is
/// unreachable except through that broken slot.
pub struct OrphanNodeCheck;

impl ConsistencyCheck for OrphanNodeCheck {
    fn name(&self) -> &'static str {
        ORPHAN_NODE
    }

    fn run(
        &self,
        store: &mut dyn MaintainableStore,
        options: &CheckOptions,
    ) -> Result<Vec<Issue>, StoreError> {
        let rows = store.scan_node_rows()?;
        let invalid: BTreeSet<NodeId> = rows
            .iter()
            .filter(|row| row.name.is_none())
            .map(|row| row.id)
            .collect();
        let names: BTreeMap<NodeId, Option<String>> =
            rows.into_iter().map(|row| (row.id, row.name)).collect();

        let mut issues = Vec::new();
        for (parent, child) in store.scan_child_slots()? {
            if !invalid.contains(&parent) || !names.contains_key(&child) {
                continue;
            }
            let mut issue = Issue::new(
                ORPHAN_NODE,
                Some(child),
                names.get(&child).cloned().flatten(),
            )
            .describe(format!(
                "node {} is only reachable through invalid node {}",
                child, parent
            ));
            if options.repair {
                match store.delete_node(child) {
                    Ok(_) => {}
                    // An earlier cascade in this run may already have
                    // removed the row.
                    Err(StoreError::NodeNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                store.remove_child_slot(parent, child)?;
                issue.resolve(format!(
                    "deleted orphan {} and its reference from {}",
                    child, parent
                ));
            }
            issues.push(issue);
        }
        Ok(issues)
    }
}

// =============================================================================
// ORPHAN DATA
// =============================================================================

/// A data blob whose owning node row no longer exists.
pub struct OrphanDataCheck;

impl ConsistencyCheck for OrphanDataCheck {
    fn name(&self) -> &'static str {
        ORPHAN_DATA
    }

    fn run(
        &self,
        store: &mut dyn MaintainableStore,
        options: &CheckOptions,
    ) -> Result<Vec<Issue>, StoreError> {
        let ids: BTreeSet<NodeId> = store
            .scan_node_rows()?
            .into_iter()
            .map(|row| row.id)
            .collect();

        let mut issues = Vec::new();
        for (owner, name) in store.scan_data_keys()? {
            if ids.contains(&owner) {
                continue;
            }
            let mut issue = Issue::new(ORPHAN_DATA, Some(owner), None).describe(format!(
                "data blob '{}' owned by missing node {}",
                name, owner
            ));
            if options.repair {
                store.delete_data_raw(owner, &name)?;
                issue.resolve(format!("deleted data blob '{}'", name));
            }
            issues.push(issue);
        }
        Ok(issues)
    }
}

// =============================================================================
// EXPIRED INCONSISTENT NODES
// =============================================================================

/// A node that was never finalized and whose modification time lies strictly
/// before the caller-supplied cutoff: an abandoned in-progress creation.
pub struct ExpiredInconsistentNodesCheck;

impl ConsistencyCheck for ExpiredInconsistentNodesCheck {
    fn name(&self) -> &'static str {
        EXPIRED_INCONSISTENT_NODES
    }

    fn run(
        &self,
        store: &mut dyn MaintainableStore,
        options: &CheckOptions,
    ) -> Result<Vec<Issue>, StoreError> {
        let Some(cutoff) = options.inconsistent_expiration else {
            return Ok(Vec::new());
        };
        let rows = store.scan_node_rows()?;

        let mut issues = Vec::new();
        for row in rows {
            if row.consistent || row.modification_time >= cutoff {
                continue;
            }
            let mut issue = Issue::new(
                EXPIRED_INCONSISTENT_NODES,
                Some(row.id),
                row.name.clone(),
            )
            .describe(format!(
                "node {} was never finalized and untouched since {:?}",
                row.id, row.modification_time
            ));
            if options.repair {
                match store.delete_node(row.id) {
                    Ok(_) => {}
                    // Removed by an earlier cascade in this same run.
                    Err(StoreError::NodeNotFound(_)) => {}
                    Err(e) => return Err(e),
                }
                issue.resolve(format!("deleted expired inconsistent node {}", row.id));
            }
            issues.push(issue);
        }
        Ok(issues)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::store::{NodeStore, StoreInspect};

    fn checker() -> ConsistencyChecker {
        ConsistencyChecker::with_default_checks()
    }

    #[test]
    fn default_registry_lists_the_five_checks() {
        assert_eq!(
            checker().check_names(),
            vec![
                REFERENCE_NOT_FOUND,
                INVALID_NODE,
                ORPHAN_NODE,
                ORPHAN_DATA,
                EXPIRED_INCONSISTENT_NODES,
            ]
        );
    }

    #[test]
    fn unknown_check_name_is_rejected() {
        let mut store = MemoryStore::new("mem");
        let result = checker().run_checks(&mut store, &["NOPE"], &CheckOptions::new());
        assert!(matches!(result, Err(StoreError::UnknownCheck(_))));
    }

    #[test]
    fn healthy_store_reports_nothing() {
        let mut store = MemoryStore::new("mem");
        let root = store.root();
        let id = store.create_node(root, "a", "folder").expect("create");
        store.finalize_node(id).expect("finalize");

        let issues = checker()
            .run_all(&mut store, &CheckOptions::new())
            .expect("run");
        assert!(issues.is_empty());
    }

    #[test]
    fn reference_not_found_detects_and_repairs() {
        let mut store = MemoryStore::new("mem");
        let root = store.root();
        store.insert_child_slot(root, NodeId(404)).expect("inject");

        // Detection is pure: two runs, same single issue, no state change.
        for _ in 0..2 {
            let issues = checker()
                .run_checks(&mut store, &[REFERENCE_NOT_FOUND], &CheckOptions::new())
                .expect("run");
            assert_eq!(issues.len(), 1);
            assert_eq!(issues[0].node_id, Some(NodeId(404)));
            assert!(!issues[0].repaired);
        }

        let issues = checker()
            .run_checks(
                &mut store,
                &[REFERENCE_NOT_FOUND],
                &CheckOptions::new().with_repair(),
            )
            .expect("run");
        assert_eq!(issues.len(), 1);
        assert!(issues[0].repaired);

        let issues = checker()
            .run_checks(&mut store, &[REFERENCE_NOT_FOUND], &CheckOptions::new())
            .expect("run");
        assert!(issues.is_empty());
    }

    #[test]
    fn invalid_node_flagged_regardless_of_consistency_or_age() {
        let mut store = MemoryStore::new("mem");
        let root = store.root();
        let finalized = store.create_node(root, "a", "x").expect("create");
        store.finalize_node(finalized).expect("finalize");
        let fresh = store.create_node(root, "b", "x").expect("create");
        store.clear_node_name(finalized).expect("inject");
        store.clear_node_name(fresh).expect("inject");

        let issues = checker()
            .run_checks(&mut store, &[INVALID_NODE], &CheckOptions::new())
            .expect("run");
        assert_eq!(issues.len(), 2);

        let issues = checker()
            .run_checks(
                &mut store,
                &[INVALID_NODE],
                &CheckOptions::new().with_repair(),
            )
            .expect("run");
        assert!(issues.iter().all(|issue| issue.repaired));

        let issues = checker()
            .run_checks(&mut store, &[INVALID_NODE], &CheckOptions::new())
            .expect("run");
        assert!(issues.is_empty());
    }

    #[test]
    fn orphan_node_deleted_with_its_broken_slot() {
        let mut store = MemoryStore::new("mem");
        let root = store.root();
        let broken_parent = store.create_node(root, "p", "folder").expect("create");
        let orphan = store.create_node(broken_parent, "o", "leaf").expect("create");
        store.finalize_node(broken_parent).expect("finalize");
        store.finalize_node(orphan).expect("finalize");
        store.clear_node_name(broken_parent).expect("inject");

        let issues = checker()
            .run_checks(&mut store, &[ORPHAN_NODE], &CheckOptions::new())
            .expect("run");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].node_id, Some(orphan));
        assert_eq!(issues[0].node_name.as_deref(), Some("o"));

        let issues = checker()
            .run_checks(
                &mut store,
                &[ORPHAN_NODE],
                &CheckOptions::new().with_repair(),
            )
            .expect("run");
        assert!(issues[0].repaired);
        assert!(matches!(
            store.get_node(orphan),
            Err(StoreError::NodeNotFound(_))
        ));

        let issues = checker()
            .run_checks(&mut store, &[ORPHAN_NODE], &CheckOptions::new())
            .expect("run");
        assert!(issues.is_empty());
    }

    #[test]
    fn orphan_data_detects_and_repairs() {
        let mut store = MemoryStore::new("mem");
        store
            .insert_data_raw(NodeId(555), "leftover", b"bytes")
            .expect("inject");

        let issues = checker()
            .run_checks(&mut store, &[ORPHAN_DATA], &CheckOptions::new())
            .expect("run");
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].node_id, Some(NodeId(555)));

        let issues = checker()
            .run_checks(
                &mut store,
                &[ORPHAN_DATA],
                &CheckOptions::new().with_repair(),
            )
            .expect("run");
        assert!(issues[0].repaired);
        assert!(store.scan_data_keys().expect("keys").is_empty());
    }

    #[test]
    fn expired_inconsistent_nodes_respects_cutoff_and_flag() {
        let mut store = MemoryStore::new("mem");
        let root = store.root();
        let stale = store.create_node(root, "stale", "x").expect("create");
        let finalized = store.create_node(root, "done", "x").expect("create");
        store.finalize_node(finalized).expect("finalize");

        let cutoff = store
            .get_node(finalized)
            .expect("get")
            .modification_time;
        let fresh = store.create_node(root, "fresh", "x").expect("create");

        // Without a cutoff the check reports nothing.
        let issues = checker()
            .run_checks(
                &mut store,
                &[EXPIRED_INCONSISTENT_NODES],
                &CheckOptions::new(),
            )
            .expect("run");
        assert!(issues.is_empty());

        let options = CheckOptions::new().with_expiration(cutoff);
        let issues = checker()
            .run_checks(&mut store, &[EXPIRED_INCONSISTENT_NODES], &options)
            .expect("run");
        // Only the stale never-finalized node: the finalized one is
        // consistent, the fresh one is newer than the cutoff.
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].node_id, Some(stale));

        let issues = checker()
            .run_checks(
                &mut store,
                &[EXPIRED_INCONSISTENT_NODES],
                &options.with_repair(),
            )
            .expect("run");
        assert!(issues[0].repaired);
        assert!(matches!(
            store.get_node(stale),
            Err(StoreError::NodeNotFound(_))
        ));
        // The fresh in-progress node survived.
        assert!(store.get_node(fresh).is_ok());
    }

    #[test]
    fn checks_run_in_any_combination() {
        let mut store = MemoryStore::new("mem");
        let root = store.root();
        store.insert_child_slot(root, NodeId(404)).expect("inject");
        store
            .insert_data_raw(NodeId(555), "leftover", b"x")
            .expect("inject");

        let issues = checker()
            .run_checks(
                &mut store,
                &[ORPHAN_DATA, REFERENCE_NOT_FOUND],
                &CheckOptions::new(),
            )
            .expect("run");
        // Registration order, not selection order.
        assert_eq!(issues[0].issue_type, REFERENCE_NOT_FOUND);
        assert_eq!(issues[1].issue_type, ORPHAN_DATA);
    }

    #[test]
    fn custom_capability_set_replaces_the_default_registry() {
        let registry = ConsistencyChecker::new(vec![Box::new(OrphanDataCheck)]);
        assert_eq!(registry.check_names(), vec![ORPHAN_DATA]);

        let mut store = MemoryStore::new("mem");
        assert!(matches!(
            registry.run_checks(&mut store, &[INVALID_NODE], &CheckOptions::new()),
            Err(StoreError::UnknownCheck(_))
        ));
    }
}
