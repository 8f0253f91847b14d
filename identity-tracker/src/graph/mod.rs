//! Graph store holding denormalized relationship data
//!
//! Nodes are unique per `(label, id)`. The tracker never creates nodes; it
//! only lists and deletes them when they lose their relational record.

mod memory;

pub use memory::MemoryGraphStore;

use std::collections::HashSet;

use crate::error::Result;
use crate::mapping::Metadata;

/// Contract the consistency checker requires from a graph database
pub trait GraphStore: Send + Sync {
    /// Create the node or merge `props` into the existing one
    fn merge_node(&self, label: &str, id: &str, props: &Metadata) -> Result<()>;

    /// Delete a node and its relationships; `Ok(false)` if it was already gone
    fn delete_node(&self, label: &str, id: &str) -> Result<bool>;

    /// Create a typed relationship between two existing nodes
    fn merge_relationship(&self, src_id: &str, dst_id: &str, rel_type: &str) -> Result<()>;

    /// `Ok(false)` if the relationship did not exist
    fn delete_relationship(&self, src_id: &str, dst_id: &str, rel_type: &str) -> Result<bool>;

    /// Ids of every node carrying the label
    fn node_ids(&self, label: &str) -> Result<HashSet<String>>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
