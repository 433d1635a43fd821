// Transfer tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # es-vector-transfer
//!
//! `es-vector-transfer` is a CLI tool and library that reads documents from
//! an Elasticsearch index, turns selected fields into embeddings and upserts
//! the vectors, with metadata, into a Pinecone index.
//!
//! ## Embedding backends
//!
//! | Backend | Status | Notes |
//! |---------|--------|-------|
//! | `OpenAI` | ✅ | `/embeddings`, any compatible endpoint |
//! | Ollama | ✅ | Local server, `/api/embed` |
//! | Hash | ✅ | Offline feature hashing, for tests and previews |
//!
//! ## Quick Start
//!
//! ```bash
//! # Preview, confirm, then transfer
//! es-vector-transfer --config transfer.toml transfer
//!
//! # Dry run only
//! es-vector-transfer --config transfer.toml transfer --dry-run
//!
//! # Query the destination
//! es-vector-transfer search "ownership and borrowing" --top-k 5
//! ```
//!
//! ## Configuration Example
//!
//! ```toml
//! es_host = "http://localhost:9200"
//! es_index = "articles"
//!
//! embedding_type = "openai"
//! openai_model = "text-embedding-3-small"
//!
//! pinecone_index_name = "articles"
//! default_namespace = "default"
//!
//! batch_size = 50
//! max_threads = 4
//! fields_to_embed = ["title", "content"]
//! metadata_fields = ["title", "author", "publish_date"]
//!
//! [field_mapping]
//! title = "document_title"
//! ```
//!
//! Every key can also be set through the environment (`ES_HOST`,
//! `PINECONE_API_KEY`, `BATCH_SIZE`, ...).

#![warn(missing_docs)]

pub mod config;
pub mod destination;
pub mod embeddings;
pub mod error;
pub mod http;
pub mod mapping;
pub mod pipeline;
pub mod progress;
pub mod retry;
pub mod source;
pub mod ui;

pub use config::{EmbeddingType, Secret, TransferConfig};
pub use destination::{
    DestinationWriter, InMemoryStore, IndexStats, PineconeWriter, QueryMatch, UpsertItem,
    UpsertResult,
};
pub use embeddings::{EmbeddingGenerator, HashEmbedder, OllamaEmbedder, OpenAiEmbedder};
pub use error::{Error, Result};
pub use mapping::{FieldMapper, MappedRecord};
pub use pipeline::{PipelineState, RunOptions, TransferPipeline, TransferStats};
pub use progress::{ProgressBarReporter, ProgressCallback};
pub use retry::RetryConfig;
pub use source::{ElasticsearchReader, InMemorySource, Record, RecordPager, SourceReader};
