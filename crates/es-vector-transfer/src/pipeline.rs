//! Transfer pipeline orchestration.
//!
//! A single dispatcher pulls pages from the source in order and hands each
//! one to a worker task; at most `max_threads` batches are in flight. A
//! worker maps, embeds and upserts its batch, then records the outcome and
//! fires the progress callback. Per-record and per-batch failures are counted
//! in [`TransferStats::failed`]; only an unusable source or destination stops
//! the run.

use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::config::TransferConfig;
use crate::destination::{create_destination_writer, DestinationWriter, IndexStats, QueryMatch, UpsertItem};
use crate::embeddings::{check_embeddings, create_embedding_generator, EmbeddingGenerator};
use crate::error::{Error, Result};
use crate::mapping::FieldMapper;
use crate::progress::{notify, ProgressCallback};
use crate::retry::{with_retry, RetryConfig};
use crate::source::{create_source_reader, Record, RecordPager, SourceReader};

/// Transfer statistics.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferStats {
    /// Documents read from the source.
    pub processed: u64,
    /// Vectors accepted by the destination (always 0 in a dry run).
    pub upserted: u64,
    /// Documents that could not be mapped, embedded or written.
    pub failed: u64,
    /// Batches completed.
    pub batches: u64,
    /// Wall-clock duration in seconds.
    pub duration_secs: f64,
}

impl TransferStats {
    /// Percentage of processed documents that were upserted.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.processed == 0 {
            0.0
        } else {
            self.upserted as f64 / self.processed as f64 * 100.0
        }
    }

    /// Upserted documents per second.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn throughput(&self) -> f64 {
        if self.duration_secs > 0.0 {
            self.upserted as f64 / self.duration_secs
        } else {
            0.0
        }
    }
}

/// Lifecycle of a pipeline. Finished pipelines may run again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    /// Built, never run.
    Initialized,
    /// A transfer is in progress.
    Running,
    /// The last transfer finished.
    Completed,
    /// The last transfer stopped on a fatal error.
    Aborted,
}

/// Options for one transfer.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Source query; all documents when `None`.
    pub query: Option<Value>,
    /// Map and embed but skip the upsert.
    pub dry_run: bool,
    /// Destination namespace; `default_namespace` when `None`.
    pub namespace: Option<String>,
}

/// Counts produced by one batch.
#[derive(Debug, Clone, Copy, Default)]
struct BatchOutcome {
    processed: u64,
    upserted: u64,
    failed: u64,
}

/// State shared by the workers of one run.
struct BatchContext {
    mapper: FieldMapper,
    embedder: Arc<dyn EmbeddingGenerator>,
    writer: Arc<dyn DestinationWriter>,
    namespace: String,
    dry_run: bool,
    retry: RetryConfig,
    total_batches: usize,
    callback: Option<Arc<dyn ProgressCallback>>,
    stats: Mutex<TransferStats>,
    completed_batches: Mutex<usize>,
    abort: Mutex<Option<Error>>,
}

impl BatchContext {
    fn record(&self, outcome: BatchOutcome) {
        {
            let mut stats = self.stats.lock();
            stats.processed += outcome.processed;
            stats.upserted += outcome.upserted;
            stats.failed += outcome.failed;
            stats.batches += 1;
        }

        // Held across the callback so batch numbers reach it in order.
        let mut completed = self.completed_batches.lock();
        *completed += 1;
        let current = *completed;
        let total = self.total_batches.max(current);
        debug!("Batch {}/{} done: {:?}", current, total, outcome);
        if let Some(callback) = &self.callback {
            notify(callback.as_ref(), current, total);
        }
    }

    /// Counts vectors a failed batch wrote before the store gave out. The
    /// batch itself is not counted as completed.
    fn record_written(&self, written: usize) {
        if written == 0 {
            return;
        }
        let mut stats = self.stats.lock();
        stats.processed += written as u64;
        stats.upserted += written as u64;
    }

    fn set_abort(&self, err: Error) {
        let mut slot = self.abort.lock();
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    fn is_aborted(&self) -> bool {
        self.abort.lock().is_some()
    }
}

/// Resets the pipeline state when a run ends, including by cancellation.
struct RunGuard<'a> {
    state: &'a Mutex<PipelineState>,
    outcome: PipelineState,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock() = self.outcome;
    }
}

/// Moves documents from a source reader into a destination writer.
pub struct TransferPipeline {
    config: Arc<TransferConfig>,
    source: Arc<dyn SourceReader>,
    embedder: Arc<dyn EmbeddingGenerator>,
    writer: Arc<dyn DestinationWriter>,
    mapper: Mutex<FieldMapper>,
    progress: Mutex<Option<Arc<dyn ProgressCallback>>>,
    state: Mutex<PipelineState>,
    retry: RetryConfig,
}

impl TransferPipeline {
    /// Creates a pipeline over explicit components.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration is invalid.
    pub fn new(
        config: TransferConfig,
        source: Arc<dyn SourceReader>,
        embedder: Arc<dyn EmbeddingGenerator>,
        writer: Arc<dyn DestinationWriter>,
    ) -> Result<Self> {
        config.validate()?;
        let mapper = FieldMapper::from_config(&config);
        let retry = RetryConfig::with_max_retries(config.max_retries);

        Ok(Self {
            config: Arc::new(config),
            source,
            embedder,
            writer,
            mapper: Mutex::new(mapper),
            progress: Mutex::new(None),
            state: Mutex::new(PipelineState::Initialized),
            retry,
        })
    }

    /// Creates the Elasticsearch → Pinecone pipeline described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or a component
    /// cannot be built.
    pub fn from_config(config: TransferConfig) -> Result<Self> {
        config.validate()?;
        let source = create_source_reader(&config)?;
        let embedder = create_embedding_generator(&config)?;
        let writer = create_destination_writer(&config)?;
        Self::new(config, source, embedder, writer)
    }

    /// Replaces the retry policy for page fetches, counts and embedding calls.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> PipelineState {
        *self.state.lock()
    }

    fn is_running(&self) -> bool {
        self.state() == PipelineState::Running
    }

    /// Replaces the source → destination field renames for later runs.
    pub fn set_field_mapping(&self, mapping: BTreeMap<String, String>) {
        if self.is_running() {
            warn!("Ignoring field mapping change while a transfer is running");
            return;
        }
        let mut mapper = self.mapper.lock();
        *mapper = mapper.clone().with_field_mapping(mapping);
    }

    /// Installs the progress callback for later runs.
    pub fn set_progress_callback(&self, callback: impl ProgressCallback + 'static) {
        if self.is_running() {
            warn!("Ignoring progress callback change while a transfer is running");
            return;
        }
        *self.progress.lock() = Some(Arc::new(callback));
    }

    /// Counts source documents matching `query`.
    ///
    /// # Errors
    ///
    /// Returns the source error once retries are exhausted.
    pub async fn count(&self, query: Option<&Value>) -> Result<u64> {
        let source = &self.source;
        with_retry(&self.retry, "count", || source.count(query)).await
    }

    /// Checks that both the source and the destination answer.
    ///
    /// # Errors
    ///
    /// Returns the first failure.
    pub async fn ping(&self) -> Result<()> {
        self.source.ping().await?;
        self.writer.index_stats().await?;
        Ok(())
    }

    /// Destination index statistics.
    ///
    /// # Errors
    ///
    /// Returns the destination error.
    pub async fn index_stats(&self) -> Result<IndexStats> {
        self.writer.index_stats().await
    }

    /// Embeds `text` and returns the closest stored documents.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is blank, embedding fails or the
    /// destination query fails.
    pub async fn search(
        &self,
        text: &str,
        top_k: usize,
        namespace: Option<&str>,
    ) -> Result<Vec<QueryMatch>> {
        if text.trim().is_empty() {
            return Err(Error::Embedding("search text is empty".to_string()));
        }

        let texts = vec![text.to_string()];
        let vectors = self.embed(&texts).await?;
        let vector = vectors
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("no embedding returned".to_string()))?;

        let namespace = namespace.unwrap_or(self.config.default_namespace.as_str());
        self.writer.query(&vector, top_k, namespace, true).await
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let embedder = &self.embedder;
        let vectors = with_retry(&self.retry, "generate_embeddings", || {
            embedder.generate_embeddings(texts)
        })
        .await?;
        check_embeddings(&vectors, texts.len(), embedder.dimension())?;
        Ok(vectors)
    }

    /// Transfers every document matching `query`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Aborted`] with the partial statistics if the source
    /// or the destination becomes unusable, or [`Error::DimensionMismatch`]
    /// if the index and the embedding backend disagree.
    pub async fn run(&self, query: Option<Value>, dry_run: bool) -> Result<TransferStats> {
        self.run_with(RunOptions {
            query,
            dry_run,
            namespace: None,
        })
        .await
    }

    /// Transfers with explicit options.
    ///
    /// # Errors
    ///
    /// See [`TransferPipeline::run`].
    pub async fn run_with(&self, options: RunOptions) -> Result<TransferStats> {
        {
            let mut state = self.state.lock();
            if *state == PipelineState::Running {
                return Err(Error::Internal("a transfer is already running".to_string()));
            }
            *state = PipelineState::Running;
        }

        // Leaves `Aborted` behind if the caller drops this future mid-run.
        let mut guard = RunGuard {
            state: &self.state,
            outcome: PipelineState::Aborted,
        };
        let result = self.execute(options).await;
        if result.is_ok() {
            guard.outcome = PipelineState::Completed;
        }
        result
    }

    async fn preflight(&self) -> Result<()> {
        let writer = &self.writer;
        let stats = with_retry(&self.retry, "index_stats", || writer.index_stats()).await?;
        let embedding = self.embedder.dimension();
        match stats.dimension {
            Some(index) if index != embedding => Err(Error::DimensionMismatch { embedding, index }),
            _ => Ok(()),
        }
    }

    #[allow(clippy::cognitive_complexity)]
    async fn execute(&self, options: RunOptions) -> Result<TransferStats> {
        let start = Instant::now();
        let aborted = |source: Error, stats: TransferStats| {
            error!("Transfer aborted: {}", source);
            Error::Aborted {
                stats: TransferStats {
                    duration_secs: start.elapsed().as_secs_f64(),
                    ..stats
                },
                source: Box::new(source),
            }
        };

        if !options.dry_run {
            match self.preflight().await {
                Ok(()) => {}
                Err(e @ Error::DimensionMismatch { .. }) => return Err(e),
                Err(e) => return Err(aborted(e, TransferStats::default())),
            }
        }

        let total = self
            .count(options.query.as_ref())
            .await
            .map_err(|e| aborted(e, TransferStats::default()))?;
        let batch_size = self.config.batch_size;
        let total_batches = usize::try_from(total.div_ceil(batch_size as u64)).unwrap_or(usize::MAX);

        let namespace = options
            .namespace
            .unwrap_or_else(|| self.config.default_namespace.clone());
        info!(
            "Starting transfer of {} documents in {} batches into '{}' (batch_size={}, max_threads={}, dry_run={})",
            total, total_batches, namespace, batch_size, self.config.max_threads, options.dry_run
        );
        if options.dry_run {
            info!("Dry run mode - not writing to destination");
        }

        let ctx = Arc::new(BatchContext {
            mapper: self.mapper.lock().clone(),
            embedder: Arc::clone(&self.embedder),
            writer: Arc::clone(&self.writer),
            namespace,
            dry_run: options.dry_run,
            retry: self.retry.clone(),
            total_batches,
            callback: self.progress.lock().clone(),
            stats: Mutex::new(TransferStats::default()),
            completed_batches: Mutex::new(0),
            abort: Mutex::new(None),
        });

        let semaphore = Arc::new(Semaphore::new(self.config.max_threads));
        let mut pager = RecordPager::new(Arc::clone(&self.source), options.query, batch_size)
            .with_retry(self.retry.clone());
        let mut tasks = JoinSet::new();
        let mut source_error = None;

        loop {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| Error::Internal(format!("worker pool closed: {e}")))?;
            if ctx.is_aborted() {
                break;
            }

            match pager.next_page().await {
                Ok(Some(records)) => {
                    tasks.spawn(process_batch(Arc::clone(&ctx), records, permit));
                }
                Ok(None) => break,
                Err(e) => {
                    source_error = Some(e);
                    break;
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                ctx.set_abort(Error::Internal(format!("batch worker failed: {e}")));
            }
        }

        let stats = {
            let mut stats = ctx.stats.lock().clone();
            stats.duration_secs = start.elapsed().as_secs_f64();
            stats
        };

        if let Some(fatal) = ctx.abort.lock().take().or(source_error) {
            return Err(aborted(fatal, stats));
        }

        info!(
            "Transfer complete: {} processed, {} upserted, {} failed in {:.2}s ({:.0} docs/sec, {:.1}% success)",
            stats.processed,
            stats.upserted,
            stats.failed,
            stats.duration_secs,
            stats.throughput(),
            stats.success_rate()
        );
        Ok(stats)
    }
}

/// Worker body. The permit is released only after the outcome is recorded,
/// so the dispatcher sees an abort before pulling another page.
async fn process_batch(ctx: Arc<BatchContext>, records: Vec<Record>, permit: OwnedSemaphorePermit) {
    match AssertUnwindSafe(transfer_batch(&ctx, records)).catch_unwind().await {
        Ok(Ok(outcome)) => ctx.record(outcome),
        Ok(Err(e)) => {
            ctx.record_written(e.written_before_failure());
            ctx.set_abort(e);
        }
        Err(_) => ctx.set_abort(Error::Internal("batch worker panicked".to_string())),
    }
    drop(permit);
}

async fn transfer_batch(ctx: &BatchContext, records: Vec<Record>) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome {
        processed: records.len() as u64,
        ..BatchOutcome::default()
    };

    let mut mapped = Vec::with_capacity(records.len());
    for record in &records {
        match ctx.mapper.map(record) {
            Ok(m) if !m.embed_text.trim().is_empty() => mapped.push(m),
            Ok(m) => {
                debug!("Record {} has no text to embed", m.id);
                outcome.failed += 1;
            }
            Err(e) => {
                warn!("Skipping record {}: {}", record.id, e);
                outcome.failed += 1;
            }
        }
    }
    if mapped.is_empty() {
        return Ok(outcome);
    }

    let texts: Vec<String> = mapped.iter().map(|m| m.embed_text.clone()).collect();
    let inputs = texts.as_slice();
    let embedder = &ctx.embedder;
    let embedded = with_retry(&ctx.retry, "generate_embeddings", || {
        embedder.generate_embeddings(inputs)
    })
    .await
    .and_then(|vectors| {
        check_embeddings(&vectors, texts.len(), embedder.dimension())?;
        Ok(vectors)
    });
    let vectors = match embedded {
        Ok(vectors) => vectors,
        Err(e) => {
            warn!("Embedding failed for a batch of {} records: {}", mapped.len(), e);
            outcome.failed += mapped.len() as u64;
            return Ok(outcome);
        }
    };

    if ctx.dry_run {
        return Ok(outcome);
    }

    let items: Vec<UpsertItem> = mapped
        .into_iter()
        .zip(vectors)
        .map(|(m, vector)| UpsertItem {
            id: m.id,
            vector,
            metadata: m.metadata,
        })
        .collect();

    match ctx.writer.upsert(&items, &ctx.namespace).await {
        Ok(result) => {
            let accepted = result.accepted_count.min(items.len());
            for rejected in result.errors.iter().take(5) {
                debug!("Rejected {}: {}", rejected.id, rejected.message);
            }
            outcome.upserted += accepted as u64;
            outcome.failed += (items.len() - accepted) as u64;
            Ok(outcome)
        }
        Err(e) if e.is_destination_fatal() => Err(e),
        Err(e) => {
            warn!("Upsert failed for a batch of {} vectors: {}", items.len(), e);
            outcome.failed += items.len() as u64;
            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::destination::InMemoryStore;
    use crate::embeddings::HashEmbedder;
    use crate::source::InMemorySource;
    use serde_json::json;

    fn pipeline(records: Vec<Record>, dimension: usize) -> TransferPipeline {
        let config = TransferConfig {
            batch_size: 2,
            max_threads: 1,
            fields_to_embed: vec!["title".to_string()],
            ..Default::default()
        };
        TransferPipeline::new(
            config,
            Arc::new(InMemorySource::new(records)),
            Arc::new(HashEmbedder::new(8)),
            Arc::new(InMemoryStore::new(dimension)),
        )
        .unwrap()
    }

    #[test]
    fn test_transfer_stats_rates() {
        let stats = TransferStats {
            processed: 200,
            upserted: 150,
            failed: 50,
            batches: 4,
            duration_secs: 3.0,
        };
        assert!((stats.success_rate() - 75.0).abs() < 1e-9);
        assert!((stats.throughput() - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_transfer_stats_zero() {
        let stats = TransferStats::default();
        assert_eq!(stats.success_rate(), 0.0);
        assert_eq!(stats.throughput(), 0.0);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = TransferConfig {
            batch_size: 0,
            ..Default::default()
        };
        let result = TransferPipeline::new(
            config,
            Arc::new(InMemorySource::default()),
            Arc::new(HashEmbedder::new(8)),
            Arc::new(InMemoryStore::new(8)),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let p = pipeline(vec![Record::new("1", json!({"title": "a"}))], 8);
        assert_eq!(p.state(), PipelineState::Initialized);

        p.run(None, false).await.unwrap();
        assert_eq!(p.state(), PipelineState::Completed);

        p.run(None, true).await.unwrap();
        assert_eq!(p.state(), PipelineState::Completed);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_before_any_batch() {
        let p = pipeline(vec![Record::new("1", json!({"title": "a"}))], 16);
        let err = p.run(None, false).await.unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                embedding: 8,
                index: 16
            }
        ));
        assert_eq!(p.state(), PipelineState::Aborted);

        let stats = p.run(None, true).await.unwrap();
        assert_eq!(stats.processed, 1);
    }

    #[tokio::test]
    async fn test_empty_source() {
        let p = pipeline(vec![], 8);
        let stats = p.run(None, false).await.unwrap();
        assert_eq!(stats, TransferStats { duration_secs: stats.duration_secs, ..Default::default() });
    }

    #[tokio::test]
    async fn test_search_blank_text() {
        let p = pipeline(vec![], 8);
        assert!(matches!(p.search("   ", 3, None).await, Err(Error::Embedding(_))));
    }
}
