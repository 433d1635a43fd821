//! Configuration for es-vector-transfer.
//!
//! A [`TransferConfig`] is an immutable snapshot of every recognized option.
//! It is assembled once, then shared by reference with every component.
//!
//! # Priority (highest to lowest)
//!
//! 1. Explicit overrides passed to [`TransferConfig::load`]
//! 2. Environment variables (`ES_HOST`, `BATCH_SIZE`, ...)
//! 3. Configuration file (TOML, optional)
//! 4. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};

/// Every key read from the environment. Variable names are the upper-case keys.
pub const ENV_KEYS: &[&str] = &[
    "es_host",
    "es_username",
    "es_password",
    "es_api_key",
    "es_index",
    "es_sort_field",
    "es_verify_certs",
    "embedding_type",
    "embedding_dimension",
    "openai_api_key",
    "openai_model",
    "openai_base_url",
    "openai_max_inputs",
    "ollama_host",
    "ollama_model",
    "pinecone_api_key",
    "pinecone_index_name",
    "pinecone_index_host",
    "pinecone_controller_url",
    "batch_size",
    "max_threads",
    "fields_to_embed",
    "metadata_fields",
    "store_embed_text",
    "default_namespace",
    "request_timeout_secs",
    "max_retries",
];

/// Supported embedding backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingType {
    /// `OpenAI` embeddings API (or any compatible endpoint).
    #[default]
    OpenAi,
    /// Local Ollama server.
    Ollama,
    /// Offline feature hashing, no network.
    Hash,
}

impl EmbeddingType {
    /// Configuration name of the backend.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAi => "openai",
            Self::Ollama => "ollama",
            Self::Hash => "hash",
        }
    }
}

impl fmt::Display for EmbeddingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A credential that never shows up in logs or `Debug` output.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    /// Wraps a credential.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the raw credential for use in a request.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl<'de> Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        lenient_string(deserializer).map(Secret)
    }
}

/// Transfer configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Elasticsearch URL.
    pub es_host: String,
    /// Username for Basic auth.
    #[serde(deserialize_with = "lenient_opt_string")]
    pub es_username: Option<String>,
    /// Password for Basic auth.
    pub es_password: Option<Secret>,
    /// API key (takes precedence over Basic auth).
    pub es_api_key: Option<Secret>,
    /// Index to read documents from.
    #[serde(deserialize_with = "lenient_string")]
    pub es_index: String,
    /// Field used to order `search_after` pagination.
    pub es_sort_field: String,
    /// Verify TLS certificates of the Elasticsearch host.
    pub es_verify_certs: bool,

    /// Embedding backend.
    pub embedding_type: EmbeddingType,
    /// Explicit output dimension (otherwise derived from the model).
    pub embedding_dimension: Option<usize>,
    /// `OpenAI` API key.
    pub openai_api_key: Option<Secret>,
    /// `OpenAI` embedding model.
    pub openai_model: String,
    /// `OpenAI`-compatible API base URL.
    pub openai_base_url: String,
    /// Maximum inputs per embeddings request.
    pub openai_max_inputs: usize,
    /// Ollama server URL.
    pub ollama_host: String,
    /// Ollama embedding model.
    pub ollama_model: String,

    /// Pinecone API key.
    pub pinecone_api_key: Option<Secret>,
    /// Pinecone index name (resolved to a host through the control plane).
    #[serde(deserialize_with = "lenient_string")]
    pub pinecone_index_name: String,
    /// Pinecone index host; skips the control plane lookup when set.
    #[serde(deserialize_with = "lenient_opt_string")]
    pub pinecone_index_host: Option<String>,
    /// Pinecone control plane URL.
    pub pinecone_controller_url: String,

    /// Documents per batch.
    pub batch_size: usize,
    /// Batches processed concurrently.
    pub max_threads: usize,
    /// Fields concatenated into the embedding text (empty = all).
    #[serde(deserialize_with = "field_list")]
    pub fields_to_embed: Vec<String>,
    /// Fields kept as vector metadata (empty = all).
    #[serde(deserialize_with = "field_list")]
    pub metadata_fields: Vec<String>,
    /// Initial source field -> destination field renames.
    pub field_mapping: BTreeMap<String, String>,
    /// Keep the embedded text in metadata under `text`.
    pub store_embed_text: bool,
    /// Namespace written to when a run does not override it.
    #[serde(deserialize_with = "lenient_string")]
    pub default_namespace: String,

    /// Per-request timeout for every HTTP client.
    pub request_timeout_secs: u64,
    /// Retries for transient source, embedding and upsert failures.
    pub max_retries: u32,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            es_host: "http://localhost:9200".to_string(),
            es_username: None,
            es_password: None,
            es_api_key: None,
            es_index: String::new(),
            es_sort_field: "_id".to_string(),
            es_verify_certs: true,
            embedding_type: EmbeddingType::OpenAi,
            embedding_dimension: None,
            openai_api_key: None,
            openai_model: "text-embedding-ada-002".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_max_inputs: 2048,
            ollama_host: "http://localhost:11434".to_string(),
            ollama_model: "nomic-embed-text".to_string(),
            pinecone_api_key: None,
            pinecone_index_name: String::new(),
            pinecone_index_host: None,
            pinecone_controller_url: "https://api.pinecone.io".to_string(),
            batch_size: 50,
            max_threads: 4,
            fields_to_embed: Vec::new(),
            metadata_fields: Vec::new(),
            field_mapping: BTreeMap::new(),
            store_embed_text: false,
            default_namespace: "default".to_string(),
            request_timeout_secs: 30,
            max_retries: 3,
        }
    }
}

impl TransferConfig {
    /// Loads configuration from defaults and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::load(None, &serde_json::Map::new())
    }

    /// Loads configuration from defaults, an optional TOML file, the
    /// environment and explicit overrides, in increasing priority.
    ///
    /// # Errors
    ///
    /// Returns an error if any layer fails to parse.
    pub fn load<T: Serialize>(path: Option<&Path>, overrides: &T) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "configuration file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        let figment = figment
            .merge(Env::raw().only(ENV_KEYS))
            .merge(Serialized::globals(overrides));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        Ok(config)
    }

    /// Builds a configuration from a TOML string layered over the defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Validates the pipeline options.
    ///
    /// Store- and backend-specific keys are checked by the component that
    /// uses them, so in-memory stores work without remote credentials.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is out of range.
    pub fn validate(&self) -> Result<()> {
        if !(1..=10_000).contains(&self.batch_size) {
            return Err(Error::Config(format!(
                "batch_size {} is out of range [1, 10000]",
                self.batch_size
            )));
        }
        if !(1..=64).contains(&self.max_threads) {
            return Err(Error::Config(format!(
                "max_threads {} is out of range [1, 64]",
                self.max_threads
            )));
        }
        if self.default_namespace.contains('\0') {
            return Err(Error::Config(
                "default_namespace must not contain NUL".to_string(),
            ));
        }
        if self.embedding_dimension == Some(0) {
            return Err(Error::Config(
                "embedding_dimension must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Request timeout as a [`std::time::Duration`].
    #[must_use]
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

/// Scalars as they may arrive from the environment (`ES_PASSWORD=1234` parses as a number).
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Unsigned(u64),
    Signed(i64),
    Float(f64),
    Bool(bool),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Self::Text(s) => s,
            Self::Unsigned(n) => n.to_string(),
            Self::Signed(n) => n.to_string(),
            Self::Float(n) => n.to_string(),
            Self::Bool(b) => b.to_string(),
        }
    }
}

fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    Scalar::deserialize(deserializer).map(Scalar::into_string)
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(Option::<Scalar>::deserialize(deserializer)?.map(Scalar::into_string))
}

/// Accepts either a list or a comma-separated string; blank entries are dropped.
fn field_list<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ListOrString {
        List(Vec<String>),
        Text(String),
    }

    let raw = match ListOrString::deserialize(deserializer)? {
        ListOrString::List(items) => items,
        ListOrString::Text(s) => s.split(',').map(str::to_string).collect(),
    };
    Ok(raw
        .into_iter()
        .map(|f| f.trim().to_string())
        .filter(|f| !f.is_empty())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = TransferConfig::default();
        assert_eq!(config.batch_size, 50);
        assert_eq!(config.max_threads, 4);
        assert_eq!(config.default_namespace, "default");
        assert_eq!(config.embedding_type, EmbeddingType::OpenAi);
        assert!(config.fields_to_embed.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_toml_parse() {
        let config = TransferConfig::from_toml(
            r#"
es_index = "articles"
embedding_type = "hash"
embedding_dimension = 64
batch_size = 25
fields_to_embed = ["title", "content"]
metadata_fields = "title, author,"

[field_mapping]
title = "document_title"
"#,
        )
        .unwrap();

        assert_eq!(config.es_index, "articles");
        assert_eq!(config.embedding_type, EmbeddingType::Hash);
        assert_eq!(config.embedding_dimension, Some(64));
        assert_eq!(config.batch_size, 25);
        assert_eq!(config.fields_to_embed, vec!["title", "content"]);
        assert_eq!(config.metadata_fields, vec!["title", "author"]);
        assert_eq!(
            config.field_mapping.get("title").map(String::as_str),
            Some("document_title")
        );
        assert_eq!(config.max_threads, 4);
    }

    #[test]
    fn test_config_validate_batch_size() {
        let config = TransferConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_config_validate_threads() {
        let config = TransferConfig {
            max_threads: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_unknown_embedding_type() {
        let result = TransferConfig::from_toml(r#"embedding_type = "word2vec""#);
        assert!(result.is_err());
    }

    #[test]
    fn test_overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("transfer.toml");
        std::fs::write(&path, "batch_size = 10\nes_index = \"from-file\"\n").unwrap();

        let overrides = serde_json::json!({ "batch_size": 99 });
        let config = TransferConfig::load(Some(&path), &overrides).unwrap();

        assert_eq!(config.batch_size, 99);
        assert_eq!(config.es_index, "from-file");
    }

    #[test]
    fn test_missing_config_file() {
        let result = TransferConfig::load(
            Some(Path::new("/definitely/not/here.toml")),
            &serde_json::Map::new(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_secret_is_masked() {
        let config = TransferConfig {
            openai_api_key: Some(Secret::new("sk-very-secret")),
            ..Default::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_numeric_secret_from_toml() {
        let config = TransferConfig::from_toml("es_password = 123456").unwrap();
        assert_eq!(
            config.es_password.as_ref().map(Secret::expose),
            Some("123456")
        );
    }
}
