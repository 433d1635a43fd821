//! Destination writers: the vector stores documents are transferred into.

pub mod memory;
pub mod pinecone;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::TransferConfig;
use crate::error::Result;

pub use memory::InMemoryStore;
pub use pinecone::PineconeWriter;

/// A vector ready to be written. The ID is the source document ID, so a
/// second transfer overwrites instead of duplicating.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpsertItem {
    /// Vector ID.
    pub id: String,
    /// Embedding.
    pub vector: Vec<f32>,
    /// Metadata stored with the vector.
    pub metadata: Map<String, Value>,
}

/// A single item the store refused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// Rejected item ID.
    pub id: String,
    /// Reason given by the store or by local validation.
    pub message: String,
}

/// Outcome of one upsert call.
///
/// `accepted_count + errors.len()` always equals the number of items sent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpsertResult {
    /// Items written.
    pub accepted_count: usize,
    /// Items rejected.
    pub errors: Vec<ItemError>,
}

impl UpsertResult {
    /// Marks every item in `ids` as rejected with the same message.
    pub fn reject_all<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>, message: &str) {
        self.errors.extend(ids.into_iter().map(|id| ItemError {
            id: id.to_string(),
            message: message.to_string(),
        }));
    }
}

/// Per-namespace statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceStats {
    /// Vectors stored in the namespace.
    pub vector_count: u64,
}

/// Index-level statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexStats {
    /// Vector dimension declared by the index, if any.
    pub dimension: Option<usize>,
    /// Vectors across all namespaces.
    pub total_vector_count: u64,
    /// Namespace name to its statistics.
    pub namespaces: BTreeMap<String, NamespaceStats>,
}

impl IndexStats {
    /// Vectors stored in `namespace` (0 if absent).
    #[must_use]
    pub fn namespace_count(&self, namespace: &str) -> u64 {
        self.namespaces.get(namespace).map_or(0, |ns| ns.vector_count)
    }
}

/// One similarity search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryMatch {
    /// Vector ID.
    pub id: String,
    /// Similarity score (higher is closer).
    pub score: f32,
    /// Stored metadata, when requested.
    pub metadata: Option<Map<String, Value>>,
}

/// Write and query access to a vector store.
///
/// Partial failures are reported inside [`UpsertResult`]; an `Err` from
/// [`DestinationWriter::upsert`] means the store is unusable for the rest of
/// the transfer.
#[async_trait]
pub trait DestinationWriter: Send + Sync {
    /// Store type name.
    fn destination_type(&self) -> &'static str;

    /// Inserts or replaces `items` in `namespace`.
    async fn upsert(&self, items: &[UpsertItem], namespace: &str) -> Result<UpsertResult>;

    /// Returns index statistics.
    async fn index_stats(&self) -> Result<IndexStats>;

    /// Returns the `top_k` nearest vectors in `namespace`, best first.
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        namespace: &str,
        include_metadata: bool,
    ) -> Result<Vec<QueryMatch>>;
}

/// Rejects items a vector store would refuse anyway. Returns the valid items
/// and records the others in `result`.
pub fn validate_items<'a>(
    items: &'a [UpsertItem],
    dimension: Option<usize>,
    result: &mut UpsertResult,
) -> Vec<&'a UpsertItem> {
    let mut valid = Vec::with_capacity(items.len());
    for item in items {
        let problem = if item.id.trim().is_empty() {
            Some("empty id".to_string())
        } else if item.vector.iter().any(|x| !x.is_finite()) {
            Some("vector contains non-finite values".to_string())
        } else {
            match dimension {
                Some(d) if item.vector.len() != d => Some(format!(
                    "vector has {} dimensions, index expects {d}",
                    item.vector.len()
                )),
                _ => None,
            }
        };

        match problem {
            Some(message) => result.errors.push(ItemError {
                id: item.id.clone(),
                message,
            }),
            None => valid.push(item),
        }
    }
    valid
}

/// Creates the Pinecone writer described by `config`.
///
/// # Errors
///
/// Returns an error if the Pinecone settings are incomplete.
pub fn create_destination_writer(config: &TransferConfig) -> Result<Arc<dyn DestinationWriter>> {
    Ok(Arc::new(PineconeWriter::from_config(config)?))
}
