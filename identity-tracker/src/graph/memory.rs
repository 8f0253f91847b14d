//! In-process graph store

use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use super::GraphStore;
use crate::error::{Result, TrackerError};
use crate::mapping::Metadata;

/// Typed, directed edge between two node ids
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Relationship {
    pub src_id: String,
    pub dst_id: String,
    pub rel_type: String,
}

/// `DashMap`-backed graph store
#[derive(Default)]
pub struct MemoryGraphStore {
    /// (label, id) -> properties
    nodes: DashMap<(String, String), Metadata>,
    relationships: DashMap<Relationship, ()>,
    closed: AtomicBool,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    pub fn has_node(&self, label: &str, id: &str) -> bool {
        self.nodes.contains_key(&(label.to_string(), id.to_string()))
    }

    pub fn node_props(&self, label: &str, id: &str) -> Option<Metadata> {
        self.nodes
            .get(&(label.to_string(), id.to_string()))
            .map(|e| e.value().clone())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TrackerError::connection("graph store is closed"));
        }
        Ok(())
    }

    fn id_exists(&self, id: &str) -> bool {
        self.nodes.iter().any(|e| e.key().1 == id)
    }
}

impl GraphStore for MemoryGraphStore {
    fn merge_node(&self, label: &str, id: &str, props: &Metadata) -> Result<()> {
        self.ensure_open()?;
        let mut entry = self
            .nodes
            .entry((label.to_string(), id.to_string()))
            .or_default();
        for (key, value) in props {
            entry.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    fn delete_node(&self, label: &str, id: &str) -> Result<bool> {
        self.ensure_open()?;
        let removed = self
            .nodes
            .remove(&(label.to_string(), id.to_string()))
            .is_some();
        if removed && !self.id_exists(id) {
            self.relationships
                .retain(|rel, _| rel.src_id != id && rel.dst_id != id);
        }
        Ok(removed)
    }

    fn merge_relationship(&self, src_id: &str, dst_id: &str, rel_type: &str) -> Result<()> {
        self.ensure_open()?;
        for id in [src_id, dst_id] {
            if !self.id_exists(id) {
                return Err(TrackerError::not_found(format!("graph node '{}'", id)));
            }
        }
        self.relationships.insert(
            Relationship {
                src_id: src_id.to_string(),
                dst_id: dst_id.to_string(),
                rel_type: rel_type.to_string(),
            },
            (),
        );
        Ok(())
    }

    fn delete_relationship(&self, src_id: &str, dst_id: &str, rel_type: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self
            .relationships
            .remove(&Relationship {
                src_id: src_id.to_string(),
                dst_id: dst_id.to_string(),
                rel_type: rel_type.to_string(),
            })
            .is_some())
    }

    fn node_ids(&self, label: &str) -> Result<HashSet<String>> {
        self.ensure_open()?;
        Ok(self
            .nodes
            .iter()
            .filter(|e| e.key().0 == label)
            .map(|e| e.key().1.clone())
            .collect())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn props(value: serde_json::Value) -> Metadata {
        crate::mapping::metadata_from_value(value).unwrap()
    }

    #[test]
    fn test_merge_node_is_unique_per_label() {
        let graph = MemoryGraphStore::new();
        graph.merge_node("User", "user_1", &props(json!({"name": "a"}))).unwrap();
        graph.merge_node("User", "user_1", &props(json!({"email": "a@x"}))).unwrap();

        assert_eq!(graph.node_count(), 1);
        let merged = graph.node_props("User", "user_1").unwrap();
        assert_eq!(merged["name"], "a");
        assert_eq!(merged["email"], "a@x");
    }

    #[test]
    fn test_delete_node_is_idempotent() {
        let graph = MemoryGraphStore::new();
        graph.merge_node("User", "user_1", &Metadata::new()).unwrap();
        assert!(graph.delete_node("User", "user_1").unwrap());
        assert!(!graph.delete_node("User", "user_1").unwrap());
    }

    #[test]
    fn test_delete_node_detaches_relationships() {
        let graph = MemoryGraphStore::new();
        graph.merge_node("User", "user_1", &Metadata::new()).unwrap();
        graph.merge_node("BugReport", "bug_report_1", &Metadata::new()).unwrap();
        graph.merge_node("BugReport", "bug_report_2", &Metadata::new()).unwrap();
        graph.merge_relationship("user_1", "bug_report_1", "REPORTED").unwrap();
        graph.merge_relationship("user_1", "bug_report_2", "REPORTED").unwrap();

        graph.delete_node("BugReport", "bug_report_1").unwrap();
        assert_eq!(graph.relationship_count(), 1);
        assert!(!graph
            .delete_relationship("user_1", "bug_report_1", "REPORTED")
            .unwrap());
        assert!(graph
            .delete_relationship("user_1", "bug_report_2", "REPORTED")
            .unwrap());
    }

    #[test]
    fn test_relationship_requires_nodes() {
        let graph = MemoryGraphStore::new();
        graph.merge_node("User", "user_1", &Metadata::new()).unwrap();
        let err = graph
            .merge_relationship("user_1", "ghost", "LINKED")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_node_ids_by_label() {
        let graph = MemoryGraphStore::new();
        graph.merge_node("User", "user_1", &Metadata::new()).unwrap();
        graph.merge_node("User", "user_2", &Metadata::new()).unwrap();
        graph.merge_node("FeedbackEntry", "feedback_1", &Metadata::new()).unwrap();

        let users = graph.node_ids("User").unwrap();
        assert_eq!(users.len(), 2);
        assert!(users.contains("user_2"));
        assert!(graph.node_ids("Missing").unwrap().is_empty());
    }
}
