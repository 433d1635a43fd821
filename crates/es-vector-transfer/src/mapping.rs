//! Field selection and renaming.
//!
//! A [`FieldMapper`] splits a source [`Record`] into the text sent to the
//! embedding backend and the metadata stored next to the vector.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::config::TransferConfig;
use crate::error::{Error, Result};
use crate::source::Record;

/// Metadata key holding the embedded text when `store_embed_text` is on.
pub const EMBED_TEXT_KEY: &str = "text";

/// Separator between the fields concatenated into the embedding text.
const FIELD_SEPARATOR: &str = "\n";

/// A record reshaped for embedding and upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappedRecord {
    /// Source document ID.
    pub id: String,
    /// Text sent to the embedding backend; empty when no embeddable field was present.
    pub embed_text: String,
    /// Metadata stored alongside the vector, with renamed keys.
    pub metadata: Map<String, Value>,
}

/// Selects and renames record fields.
#[derive(Debug, Clone, Default)]
pub struct FieldMapper {
    fields_to_embed: Vec<String>,
    metadata_fields: Vec<String>,
    field_mapping: BTreeMap<String, String>,
    store_embed_text: bool,
}

impl FieldMapper {
    /// Creates a mapper without renames.
    #[must_use]
    pub fn new(fields_to_embed: Vec<String>, metadata_fields: Vec<String>) -> Self {
        Self {
            fields_to_embed,
            metadata_fields,
            ..Self::default()
        }
    }

    /// Creates a mapper from the pipeline configuration.
    #[must_use]
    pub fn from_config(config: &TransferConfig) -> Self {
        Self {
            fields_to_embed: config.fields_to_embed.clone(),
            metadata_fields: config.metadata_fields.clone(),
            field_mapping: config.field_mapping.clone(),
            store_embed_text: config.store_embed_text,
        }
    }

    /// Replaces the source -> destination renames.
    #[must_use]
    pub fn with_field_mapping(mut self, mapping: BTreeMap<String, String>) -> Self {
        self.field_mapping = mapping;
        self
    }

    /// Keeps the embedded text in metadata under [`EMBED_TEXT_KEY`].
    #[must_use]
    pub fn with_embed_text(mut self, store: bool) -> Self {
        self.store_embed_text = store;
        self
    }

    /// Current renames.
    #[must_use]
    pub fn field_mapping(&self) -> &BTreeMap<String, String> {
        &self.field_mapping
    }

    fn destination_name<'a>(&'a self, source: &'a str) -> &'a str {
        self.field_mapping
            .get(source)
            .map_or(source, String::as_str)
    }

    /// Finds the source field a configured name refers to, either directly
    /// or through its destination name.
    fn resolve<'r>(&self, record: &'r Record, name: &str) -> Option<&'r Value> {
        record.fields.get(name).or_else(|| {
            self.field_mapping
                .iter()
                .find(|(_, dest)| dest.as_str() == name)
                .and_then(|(source, _)| record.fields.get(source))
        })
    }

    fn keeps_metadata(&self, source: &str) -> bool {
        self.metadata_fields.is_empty()
            || self
                .metadata_fields
                .iter()
                .any(|f| f == source || f == self.destination_name(source))
    }

    /// Maps one record.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Mapping`] if the record has no ID or two fields are
    /// renamed onto the same metadata key.
    pub fn map(&self, record: &Record) -> Result<MappedRecord> {
        if record.id.trim().is_empty() {
            return Err(Error::Mapping("record has an empty id".to_string()));
        }

        let parts: Vec<String> = if self.fields_to_embed.is_empty() {
            record.fields.values().filter_map(value_to_text).collect()
        } else {
            self.fields_to_embed
                .iter()
                .filter_map(|name| self.resolve(record, name))
                .filter_map(value_to_text)
                .collect()
        };
        let embed_text = parts.join(FIELD_SEPARATOR);

        let mut metadata = Map::new();
        for (source, value) in &record.fields {
            if !self.keeps_metadata(source) {
                continue;
            }
            let Some(value) = sanitize_metadata(value) else {
                continue;
            };
            let key = self.destination_name(source);
            if metadata.insert(key.to_string(), value).is_some() {
                return Err(Error::Mapping(format!(
                    "record '{}': more than one field maps to metadata key '{}'",
                    record.id, key
                )));
            }
        }

        if self.store_embed_text && !embed_text.is_empty() {
            metadata.insert(EMBED_TEXT_KEY.to_string(), Value::String(embed_text.clone()));
        }

        Ok(MappedRecord {
            id: record.id.clone(),
            embed_text,
            metadata,
        })
    }
}

/// One-shot form of [`FieldMapper::map`].
///
/// # Errors
///
/// See [`FieldMapper::map`].
pub fn map_record(
    record: &Record,
    fields_to_embed: &[String],
    metadata_fields: &[String],
    field_mapping: &BTreeMap<String, String>,
) -> Result<MappedRecord> {
    FieldMapper::new(fields_to_embed.to_vec(), metadata_fields.to_vec())
        .with_field_mapping(field_mapping.clone())
        .map(record)
}

/// Renders a field value as embedding text. Nulls and blank strings yield `None`.
fn value_to_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(value_to_text)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    };
    (!text.is_empty()).then_some(text)
}

/// Converts a value to a metadata-safe shape: scalars, or lists of strings.
fn sanitize_metadata(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(_) | Value::Bool(_) | Value::Number(_) => Some(value.clone()),
        Value::Object(_) => Some(Value::String(value.to_string())),
        Value::Array(items) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| match item {
                    Value::Null => None,
                    Value::String(s) => Some(Value::String(s.clone())),
                    other => Some(Value::String(other.to_string())),
                })
                .collect(),
        )),
    }
}
