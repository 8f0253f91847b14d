//! Vector similarity index
//!
//! The tracker only depends on the [`VectorIndex`] contract. [`HnswVectorIndex`]
//! is the bundled local backend.

mod hnsw;

pub use hnsw::HnswVectorIndex;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::mapping::Metadata;

/// One nearest-neighbour hit
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    pub id: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// A stored vector as the index knows it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Contract the adapter and scheduler require from a vector service
pub trait VectorIndex: Send + Sync {
    /// Expected embedding length
    fn dimension(&self) -> usize;

    fn upsert(&self, id: &str, embedding: &[f32], metadata: &Metadata) -> Result<()>;

    /// Nearest vectors, best first
    fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorMatch>>;

    /// Delete the given ids; unknown ids are ignored
    fn delete(&self, ids: &[String]) -> Result<()>;

    fn fetch(&self, id: &str) -> Result<Option<VectorRecord>>;

    /// Every stored vector id, or `None` when the backend cannot enumerate
    fn list_ids(&self) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_length_mismatch() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }
}
