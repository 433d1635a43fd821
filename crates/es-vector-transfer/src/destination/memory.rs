//! In-memory vector store with cosine similarity search.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::destination::{
    validate_items, DestinationWriter, IndexStats, NamespaceStats, QueryMatch, UpsertItem,
    UpsertResult,
};
use crate::error::Result;

#[derive(Debug, Clone)]
struct StoredVector {
    vector: Vec<f32>,
    metadata: Map<String, Value>,
}

type Namespaces = BTreeMap<String, BTreeMap<String, StoredVector>>;

/// Vector store kept in process memory. Vectors of the wrong dimension are
/// rejected per item.
#[derive(Debug)]
pub struct InMemoryStore {
    dimension: usize,
    namespaces: RwLock<Namespaces>,
}

impl InMemoryStore {
    /// Creates an empty store for `dimension`-long vectors.
    #[must_use]
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            namespaces: RwLock::new(BTreeMap::new()),
        }
    }

    /// Vectors stored in `namespace`.
    #[must_use]
    pub fn vector_count(&self, namespace: &str) -> usize {
        self.namespaces.read().get(namespace).map_or(0, BTreeMap::len)
    }

    /// Stored vector and metadata for `id`, if present.
    #[must_use]
    pub fn get(&self, namespace: &str, id: &str) -> Option<(Vec<f32>, Map<String, Value>)> {
        self.namespaces
            .read()
            .get(namespace)
            .and_then(|ns| ns.get(id))
            .map(|v| (v.vector.clone(), v.metadata.clone()))
    }
}

#[async_trait]
impl DestinationWriter for InMemoryStore {
    fn destination_type(&self) -> &'static str {
        "memory"
    }

    async fn upsert(&self, items: &[UpsertItem], namespace: &str) -> Result<UpsertResult> {
        let mut result = UpsertResult::default();
        let valid = validate_items(items, Some(self.dimension), &mut result);

        let mut namespaces = self.namespaces.write();
        let ns = namespaces.entry(namespace.to_string()).or_default();
        for item in valid {
            ns.insert(
                item.id.clone(),
                StoredVector {
                    vector: item.vector.clone(),
                    metadata: item.metadata.clone(),
                },
            );
            result.accepted_count += 1;
        }
        Ok(result)
    }

    async fn index_stats(&self) -> Result<IndexStats> {
        let namespaces = self.namespaces.read();
        let per_ns: BTreeMap<String, NamespaceStats> = namespaces
            .iter()
            .map(|(name, vectors)| {
                (
                    name.clone(),
                    NamespaceStats {
                        vector_count: vectors.len() as u64,
                    },
                )
            })
            .collect();

        Ok(IndexStats {
            dimension: Some(self.dimension),
            total_vector_count: per_ns.values().map(|ns| ns.vector_count).sum(),
            namespaces: per_ns,
        })
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>> {
        let namespaces = self.namespaces.read();
        let Some(ns) = namespaces.get(namespace) else {
            return Ok(Vec::new());
        };

        let mut matches: Vec<QueryMatch> = ns
            .iter()
            .map(|(id, stored)| QueryMatch {
                id: id.clone(),
                score: cosine_similarity(vector, &stored.vector),
                metadata: include_metadata.then(|| stored.metadata.clone()),
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(top_k);
        Ok(matches)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(id: &str, vector: Vec<f32>) -> UpsertItem {
        let mut metadata = Map::new();
        metadata.insert("title".to_string(), json!(format!("Doc {id}")));
        UpsertItem {
            id: id.to_string(),
            vector,
            metadata,
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let store = InMemoryStore::new(2);
        let items = vec![item("a", vec![1.0, 0.0]), item("b", vec![0.0, 1.0])];

        store.upsert(&items, "default").await.unwrap();
        store.upsert(&items, "default").await.unwrap();

        assert_eq!(store.vector_count("default"), 2);
        let stats = store.index_stats().await.unwrap();
        assert_eq!(stats.total_vector_count, 2);
        assert_eq!(stats.dimension, Some(2));
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected_per_item() {
        let store = InMemoryStore::new(2);
        let items = vec![item("a", vec![1.0, 0.0]), item("b", vec![1.0, 0.0, 0.0])];

        let result = store.upsert(&items, "default").await.unwrap();
        assert_eq!(result.accepted_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].id, "b");
    }

    #[tokio::test]
    async fn test_query_orders_by_similarity() {
        let store = InMemoryStore::new(2);
        let items = vec![
            item("east", vec![1.0, 0.0]),
            item("north", vec![0.0, 1.0]),
            item("north-east", vec![1.0, 1.0]),
        ];
        store.upsert(&items, "geo").await.unwrap();

        let matches = store.query(&[1.0, 0.1], 2, "geo", true).await.unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "east");
        assert_eq!(matches[1].id, "north-east");
        assert!(matches[0].score >= matches[1].score);
        assert_eq!(matches[0].metadata.as_ref().unwrap()["title"], "Doc east");

        let bare = store.query(&[1.0, 0.1], 1, "geo", false).await.unwrap();
        assert!(bare[0].metadata.is_none());
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let store = InMemoryStore::new(2);
        store.upsert(&[item("a", vec![1.0, 0.0])], "one").await.unwrap();
        store.upsert(&[item("a", vec![0.0, 1.0])], "two").await.unwrap();

        assert!(store.query(&[1.0, 0.0], 5, "missing", false).await.unwrap().is_empty());
        assert_eq!(store.get("one", "a").unwrap().0, vec![1.0, 0.0]);
        assert_eq!(store.index_stats().await.unwrap().namespaces.len(), 2);
    }
}
