//! Source readers: paginated access to the document store being transferred.

pub mod elasticsearch;
pub mod memory;

use async_trait::async_trait;
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::config::TransferConfig;
use crate::error::Result;
use crate::retry::{with_retry, RetryConfig};

pub use elasticsearch::ElasticsearchReader;
pub use memory::InMemorySource;

/// A document extracted from the source store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Source document ID; becomes the vector ID.
    pub id: String,
    /// Document fields.
    pub fields: Map<String, Value>,
}

impl Record {
    /// Creates a record from an ID and a JSON object. Non-object values yield
    /// a record without fields.
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        let fields = match fields {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            fields,
        }
    }
}

/// One page of records plus the cursor for the next one.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Records in source order.
    pub records: Vec<Record>,
    /// Cursor for the next page; `None` once the source is exhausted.
    pub next_cursor: Option<Value>,
}

/// Read access to a document store.
///
/// Readers never retry; a failure is reported as
/// [`crate::Error::SourceUnavailable`] (or a rate limit / auth error) and the
/// caller decides what to do.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// Reader type name.
    fn source_type(&self) -> &'static str;

    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<()>;

    /// Counts documents matching `filter` (all documents when `None`).
    async fn count(&self, filter: Option<&Value>) -> Result<u64>;

    /// Fetches up to `page_size` records after `cursor` in one round trip.
    async fn fetch_page(
        &self,
        filter: Option<&Value>,
        cursor: Option<&Value>,
        page_size: usize,
    ) -> Result<Page>;
}

/// Lazy, finite, restartable page sequence over a [`SourceReader`].
pub struct RecordPager {
    reader: Arc<dyn SourceReader>,
    filter: Option<Value>,
    page_size: usize,
    retry: RetryConfig,
    cursor: Option<Value>,
    exhausted: bool,
    pages_read: usize,
}

impl RecordPager {
    /// Creates a pager starting at the beginning of the source.
    pub fn new(reader: Arc<dyn SourceReader>, filter: Option<Value>, page_size: usize) -> Self {
        Self {
            reader,
            filter,
            page_size: page_size.max(1),
            retry: RetryConfig::no_retry(),
            cursor: None,
            exhausted: false,
            pages_read: 0,
        }
    }

    /// Retries transient page fetch failures with `retry`.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Number of non-empty pages returned since the last reset.
    #[must_use]
    pub fn pages_read(&self) -> usize {
        self.pages_read
    }

    /// Returns the next non-empty page, or `None` when the source is exhausted.
    ///
    /// # Errors
    ///
    /// Returns the reader's error once the retry budget is spent.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Record>>> {
        if self.exhausted {
            return Ok(None);
        }

        let reader = &self.reader;
        let filter = self.filter.as_ref();
        let cursor = self.cursor.as_ref();
        let page_size = self.page_size;
        let page = with_retry(&self.retry, "fetch_page", || {
            reader.fetch_page(filter, cursor, page_size)
        })
        .await?;

        if page.records.is_empty() {
            self.exhausted = true;
            return Ok(None);
        }

        match page.next_cursor {
            Some(next) => self.cursor = Some(next),
            None => self.exhausted = true,
        }
        self.pages_read += 1;
        debug!(
            "Fetched page {} ({} records) from {}",
            self.pages_read,
            page.records.len(),
            self.reader.source_type()
        );
        Ok(Some(page.records))
    }

    /// Rewinds to the first page.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.exhausted = false;
        self.pages_read = 0;
    }

    /// Turns the pager into a stream of pages.
    pub fn into_stream(self) -> impl Stream<Item = Result<Vec<Record>>> {
        stream::try_unfold(self, |mut pager| async move {
            let page = pager.next_page().await?;
            Ok::<_, crate::error::Error>(page.map(|page| (page, pager)))
        })
    }
}

/// Creates the Elasticsearch reader described by `config`.
///
/// # Errors
///
/// Returns an error if the Elasticsearch settings are incomplete.
pub fn create_source_reader(config: &TransferConfig) -> Result<Arc<dyn SourceReader>> {
    Ok(Arc::new(ElasticsearchReader::from_config(config)?))
}
