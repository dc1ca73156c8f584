//! Per-table transfer engine with a read-ahead pipeline.
//!
//! A reader task fetches pages into a bounded channel while the consumer maps,
//! resolves and writes the records of the previous page. Page requests are
//! bounded by a timeout and retried with exponential backoff.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::core::{TableMapping, TransformedDocument};
use crate::error::{MigrateError, Result};
use crate::mapper::map_record;
use crate::report::{Anomaly, RunPhase};
use crate::resolve::LinkResolver;
use crate::source::{Page, SourceReader};
use crate::target::{WriteOutcome, Writer};

/// Transfer engine configuration.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Records requested per page.
    pub page_size: usize,
    /// Number of pages buffered ahead of the consumer.
    pub read_ahead_pages: usize,
    /// Timeout for one page request.
    pub call_timeout: Duration,
    /// Retries after the first failed page request.
    pub max_retries: u32,
    /// Backoff before the first retry; doubled for each further retry.
    pub retry_backoff: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            read_ahead_pages: 2,
            call_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl TransferConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            page_size: config.source.page_size,
            read_ahead_pages: config.migration.read_ahead_pages.max(1),
            call_timeout: config.source.call_timeout(),
            max_retries: config.source.max_retries,
            retry_backoff: config.source.retry_backoff(),
        }
    }
}

/// Statistics and by-products of one table's first pass.
#[derive(Debug, Default)]
pub struct TransferStats {
    /// Records received from the source.
    pub extracted: u64,

    /// Records persisted.
    pub written: u64,

    /// Records received but not persisted.
    pub skipped: u64,

    /// Pages received.
    pub pages: u64,

    /// Time spent waiting on the source.
    pub read_time: Duration,

    /// Time spent mapping, resolving and writing.
    pub write_time: Duration,

    pub anomalies: Vec<Anomaly>,

    /// Written documents that still hold link placeholders.
    pub deferred: Vec<TransformedDocument>,

    /// Whether the run was cancelled while this table was in progress.
    pub cancelled: bool,

    /// Set when extraction failed after retries. Records already written stay.
    pub failure: Option<MigrateError>,
}

/// A page with its fetch timing.
#[derive(Debug)]
struct PageChunk {
    page: Page,
    read_time: Duration,
}

/// Fetch one page, retrying retryable failures and timeouts.
///
/// Returns [`MigrateError::Cancelled`] if cancellation arrives during a backoff.
pub async fn fetch_page_with_retry(
    source: &dyn SourceReader,
    table: &str,
    cursor: Option<&str>,
    config: &TransferConfig,
    cancel: &CancellationToken,
) -> Result<Page> {
    let mut backoff = config.retry_backoff;
    let mut attempt = 0u32;

    loop {
        let result = tokio::time::timeout(
            config.call_timeout,
            source.list_page(table, cursor, config.page_size),
        )
        .await;

        let err = match result {
            Ok(Ok(page)) => return Ok(page),
            Ok(Err(e)) if !e.is_retryable() => return Err(e),
            Ok(Err(e)) => e,
            Err(_) => MigrateError::source_unavailable(
                table,
                format!("page request timed out after {:?}", config.call_timeout),
            ),
        };

        if attempt >= config.max_retries {
            return Err(err);
        }
        attempt += 1;

        warn!(
            "{}: page request failed (attempt {}/{}): {}. Retrying in {:?}",
            table,
            attempt,
            config.max_retries + 1,
            err,
            backoff
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(MigrateError::Cancelled),
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = backoff.saturating_mul(2);
    }
}

/// Read every page of a table into the channel. Stops early on cancellation
/// or when the consumer hangs up.
async fn read_pages(
    source: Arc<dyn SourceReader>,
    table: String,
    config: TransferConfig,
    cancel: CancellationToken,
    tx: mpsc::Sender<PageChunk>,
) -> Result<()> {
    let mut cursor: Option<String> = None;
    let mut page_num = 0u64;

    loop {
        if cancel.is_cancelled() {
            debug!("{}: cancelled, no further pages requested", table);
            return Ok(());
        }

        let read_start = Instant::now();
        let page =
            fetch_page_with_retry(source.as_ref(), &table, cursor.as_deref(), &config, &cancel)
                .await?;
        page_num += 1;

        debug!(
            "{}: read page {} with {} records in {:?}",
            table,
            page_num,
            page.records.len(),
            read_start.elapsed()
        );

        let next = page.next.clone();
        let chunk = PageChunk {
            page,
            read_time: read_start.elapsed(),
        };
        if tx.send(chunk).await.is_err() {
            return Ok(());
        }

        match next {
            Some(c) => cursor = Some(c),
            None => return Ok(()),
        }
    }
}

/// Transfer engine moving one table from the source into the store.
pub struct TransferEngine {
    source: Arc<dyn SourceReader>,
    writer: Writer,
    resolver: LinkResolver,
    config: TransferConfig,
}

impl TransferEngine {
    pub fn new(
        source: Arc<dyn SourceReader>,
        writer: Writer,
        resolver: LinkResolver,
        config: TransferConfig,
    ) -> Self {
        Self {
            source,
            writer,
            resolver,
            config,
        }
    }

    /// Run the first pass for one table: extract, map, resolve known links, write.
    ///
    /// Cancellation is checked between records, so a write that has started
    /// always completes.
    pub async fn execute(
        &self,
        mapping: &TableMapping,
        cancel: &CancellationToken,
        phase: &watch::Sender<RunPhase>,
    ) -> TransferStats {
        let table = mapping.table.clone();
        let display_field = mapping.display_field.as_deref();
        info!(
            "Starting transfer for {} -> {} (page size: {}, read-ahead: {})",
            table,
            mapping.collection_name(),
            self.config.page_size,
            self.config.read_ahead_pages
        );

        let start = Instant::now();
        let mut stats = TransferStats::default();
        phase.send_replace(RunPhase::Extracting(table.clone()));

        let (tx, mut rx) = mpsc::channel::<PageChunk>(self.config.read_ahead_pages);
        let reader_handle = tokio::spawn(read_pages(
            self.source.clone(),
            table.clone(),
            self.config.clone(),
            cancel.clone(),
            tx,
        ));

        'pages: while let Some(chunk) = rx.recv().await {
            stats.pages += 1;
            stats.read_time += chunk.read_time;
            let page_len = chunk.page.records.len() as u64;
            stats.extracted += page_len;

            let write_start = Instant::now();
            for (done, record) in chunk.page.records.into_iter().enumerate() {
                if cancel.is_cancelled() {
                    stats.skipped += page_len - done as u64;
                    stats.cancelled = true;
                    break 'pages;
                }

                phase.send_replace(RunPhase::Mapping(table.clone()));
                let mapped = map_record(mapping, &record);
                stats.anomalies.extend(mapped.anomalies);
                let mut doc = mapped.document;
                stats
                    .anomalies
                    .extend(self.resolver.resolve_links(&mut doc).await);

                phase.send_replace(RunPhase::Writing(table.clone()));
                match self.writer.write(&mut doc, display_field).await {
                    WriteOutcome::Written { conflict, .. } => {
                        stats.written += 1;
                        stats.anomalies.extend(conflict);
                        if doc.has_placeholders() {
                            stats.deferred.push(doc);
                        }
                    }
                    WriteOutcome::Failed(anomaly) => {
                        stats.skipped += 1;
                        stats.anomalies.push(anomaly);
                    }
                }
            }
            stats.write_time += write_start.elapsed();
        }
        drop(rx);

        match reader_handle.await {
            Ok(Ok(())) => {}
            Ok(Err(MigrateError::Cancelled)) => stats.cancelled = true,
            Ok(Err(e)) => stats.failure = Some(e),
            Err(e) => {
                stats.failure = Some(MigrateError::table_failed(
                    &table,
                    format!("Reader task failed: {}", e),
                ))
            }
        }
        if cancel.is_cancelled() {
            stats.cancelled = true;
        }

        let elapsed = start.elapsed();
        info!(
            "{}: extracted {}, wrote {}, skipped {} in {:?} ({} pages, read: {:?}, write: {:?}, deferred: {})",
            table,
            stats.extracted,
            stats.written,
            stats.skipped,
            elapsed,
            stats.pages,
            stats.read_time,
            stats.write_time,
            stats.deferred.len()
        );

        stats
    }
}
