//! Graph consistency checking
//!
//! Removes graph nodes whose external id no longer has a canonical relational
//! record. The pass takes no lock on the graph store, so it is written to be
//! safely repeatable: a node deleted by someone else in the meantime simply
//! counts as already gone.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::Result;
use crate::graph::GraphStore;
use crate::tracker::IdentityTracker;

/// Outcome of one label's pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LabelSummary {
    pub label: String,
    pub nodes_seen: usize,
    pub orphans_found: usize,
    pub orphans_deleted: usize,
    /// Orphans that disappeared before we got to them
    pub already_gone: usize,
    pub failures: usize,
    /// Set when the label's node ids could not be listed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of a full integrity pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IntegritySummary {
    pub canonical_ids: usize,
    pub labels: Vec<LabelSummary>,
}

impl IntegritySummary {
    pub fn orphans_deleted(&self) -> usize {
        self.labels.iter().map(|l| l.orphans_deleted).sum()
    }

    pub fn failures(&self) -> usize {
        self.labels
            .iter()
            .map(|l| l.failures + usize::from(l.error.is_some()))
            .sum()
    }

    pub fn is_clean(&self) -> bool {
        self.labels
            .iter()
            .all(|l| l.orphans_found == 0 && l.error.is_none())
    }
}

/// Deletes graph nodes that lost their relational record
pub struct GraphConsistencyChecker {
    graph: Arc<dyn GraphStore>,
    tracker: Arc<IdentityTracker>,
    labels: Vec<String>,
}

impl GraphConsistencyChecker {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        tracker: Arc<IdentityTracker>,
        labels: Vec<String>,
    ) -> Self {
        Self {
            graph,
            tracker,
            labels,
        }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn graph(&self) -> &Arc<dyn GraphStore> {
        &self.graph
    }

    /// Delete every orphan node under each tracked label
    ///
    /// Fails only if the canonical id set cannot be read. Listing or deletion
    /// failures are logged, counted and skipped.
    pub fn ensure_integrity(&self) -> Result<IntegritySummary> {
        let canonical: HashSet<String> = self
            .tracker
            .list_all()?
            .into_iter()
            .map(|m| m.external_id)
            .collect();

        let mut summary = IntegritySummary {
            canonical_ids: canonical.len(),
            labels: Vec::with_capacity(self.labels.len()),
        };

        for label in &self.labels {
            summary.labels.push(self.check_label(label, &canonical));
        }

        if summary.is_clean() {
            log::debug!(
                "All graph nodes are consistent with the relational store ({} labels)",
                self.labels.len()
            );
        } else {
            log::info!(
                "Graph integrity pass removed {} orphan node(s), {} failure(s)",
                summary.orphans_deleted(),
                summary.failures()
            );
        }
        Ok(summary)
    }

    fn check_label(&self, label: &str, canonical: &HashSet<String>) -> LabelSummary {
        let mut result = LabelSummary {
            label: label.to_string(),
            ..Default::default()
        };

        let graph_ids = match self.graph.node_ids(label) {
            Ok(ids) => ids,
            Err(e) => {
                log::error!("Failed to list '{}' nodes from graph store: {}", label, e);
                result.error = Some(e.to_string());
                return result;
            }
        };
        result.nodes_seen = graph_ids.len();

        let mut orphans: Vec<&String> = graph_ids.difference(canonical).collect();
        orphans.sort();
        result.orphans_found = orphans.len();

        if !orphans.is_empty() {
            log::warn!(
                "Found {} '{}' node(s) in graph store missing from relational store",
                orphans.len(),
                label
            );
        }

        for id in orphans {
            match self.graph.delete_node(label, id) {
                Ok(true) => {
                    result.orphans_deleted += 1;
                    log::debug!("Deleted orphan '{}' node '{}'", label, id);
                }
                Ok(false) => result.already_gone += 1,
                Err(e) => {
                    result.failures += 1;
                    log::error!("Failed to delete orphan '{}' node '{}': {}", label, id, e);
                }
            }
        }

        result
    }
}
