//! Migration orchestrator - main workflow coordinator.
//!
//! Tables run one at a time in declared order. Links that point at records not
//! yet written are left as placeholders in pass one and rewritten once every
//! selected table has been processed.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::core::{ComputedRule, TableMapping, TransformedDocument};
use crate::error::{MigrateError, Result};
use crate::report::{Anomaly, MigrationRun, RunPhase, RunStatus, TableStatus};
use crate::resolve::{IdTranslationTable, LinkResolver, SharedTranslations};
use crate::source::{sample_fields, AirtableSource, SourceReader};
use crate::target::{DocumentStore, MongoStore, WriteOutcome, Writer};
use crate::transfer::{fetch_page_with_retry, TransferConfig, TransferEngine};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    source: Arc<dyn SourceReader>,
    store: Arc<dyn DocumentStore>,
    phase: watch::Sender<RunPhase>,
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub target_connected: bool,
    pub target_latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_error: Option<String>,
    pub healthy: bool,
}

/// Comparison of a table's mapping against the fields seen in the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MappingCheck {
    pub table: String,

    /// Source fields with a rule.
    pub covered: Vec<String>,

    /// Source fields with no rule; they would land in the catch-all bucket.
    pub uncovered: Vec<String>,

    /// Source fields named by a rule but absent from the sample.
    pub unseen_rules: Vec<String>,
}

impl MappingCheck {
    pub fn is_complete(&self) -> bool {
        self.uncovered.is_empty()
    }
}

impl Orchestrator {
    /// Create an orchestrator over already built collaborators.
    pub fn new(config: Config, source: Arc<dyn SourceReader>, store: Arc<dyn DocumentStore>) -> Self {
        let (phase, _) = watch::channel(RunPhase::Pending);
        Self {
            config,
            source,
            store,
            phase,
        }
    }

    /// Build the Airtable source and MongoDB store without contacting either.
    pub async fn from_config(config: Config) -> Result<Self> {
        let source = AirtableSource::new(&config.source)?;
        let store = MongoStore::new(&config.target).await?;
        Ok(Self::new(config, Arc::new(source), Arc::new(store)))
    }

    /// Build the collaborators and verify both systems answer.
    pub async fn connect(config: Config) -> Result<Self> {
        let orchestrator = Self::from_config(config).await?;
        let first = orchestrator.config.migration.tables.first().map(|m| m.table.clone());
        orchestrator
            .verify_connections(first.as_deref(), &CancellationToken::new())
            .await?;
        Ok(orchestrator)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Watch the run phase.
    pub fn subscribe(&self) -> watch::Receiver<RunPhase> {
        self.phase.subscribe()
    }

    /// Fail with [`MigrateError::Setup`] when the source or the store cannot be
    /// reached at all.
    ///
    /// The source is read through `table` with the run's retry policy. A
    /// refusal scoped to that table proves the source answered, so it is left
    /// for the table's own extraction to report.
    async fn verify_connections(&self, table: Option<&str>, cancel: &CancellationToken) -> Result<()> {
        if let Some(table) = table {
            let mut transfer = TransferConfig::from_config(&self.config);
            transfer.page_size = 1;
            match fetch_page_with_retry(self.source.as_ref(), table, None, &transfer, cancel).await {
                Ok(_) | Err(MigrateError::Cancelled) => {}
                Err(e @ MigrateError::TableUnavailable { .. }) => {
                    warn!("{} source answered but refused {}: {}", self.source.source_type(), table, e);
                }
                Err(e) => {
                    return Err(MigrateError::Setup(format!(
                        "{} source unreachable: {}",
                        self.source.source_type(),
                        e
                    )));
                }
            }
        }
        self.store.ping().await.map_err(|e| {
            MigrateError::Setup(format!("{} store unreachable: {}", self.store.store_type(), e))
        })?;
        Ok(())
    }

    /// Resolve the requested tables to mappings in declared order.
    ///
    /// An empty selection means every declared table.
    fn select_tables(&self, tables: &[String]) -> Result<Vec<&TableMapping>> {
        let declared = &self.config.migration.tables;
        if tables.is_empty() {
            return Ok(declared.iter().collect());
        }

        let unknown: Vec<&str> = tables
            .iter()
            .filter(|t| self.config.migration.mapping(t).is_none())
            .map(String::as_str)
            .collect();
        if !unknown.is_empty() {
            return Err(MigrateError::Config(format!(
                "Unknown table(s): {}",
                unknown.join(", ")
            )));
        }

        let wanted: BTreeSet<&str> = tables.iter().map(String::as_str).collect();
        Ok(declared
            .iter()
            .filter(|m| wanted.contains(m.table.as_str()))
            .collect())
    }

    /// Run the migration for `tables` (empty for all).
    ///
    /// With `resume`, the translation table is first seeded from documents
    /// already in the destination, so links into tables migrated by an
    /// earlier run resolve without re-extracting them.
    ///
    /// Only a bad table selection is returned as an error. Everything else,
    /// including an unreachable source or store, ends up in the report.
    pub async fn run_migration(
        &self,
        tables: &[String],
        resume: bool,
        cancel: CancellationToken,
    ) -> Result<MigrationRun> {
        let selected = self.select_tables(tables)?;
        let pairs: Vec<(String, String)> = selected
            .iter()
            .map(|m| (m.table.clone(), m.collection_name().to_string()))
            .collect();

        let mut run = MigrationRun::new(self.config.hash(), &pairs);
        run.resumed = resume;
        run.status = RunStatus::Running;
        self.phase.send_replace(RunPhase::Pending);

        info!(
            "Starting migration run {} ({} tables{})",
            run.run_id,
            selected.len(),
            if resume { ", resuming" } else { "" }
        );

        let translations = IdTranslationTable::shared();
        if let Err(e) = self.prepare(&selected, resume, &translations, &cancel).await {
            error!("Migration aborted: {}", e);
            run.abort(&e.to_string());
            self.phase.send_replace(RunPhase::Aborted);
            return Ok(run);
        }

        let writer = Writer::new(self.store.clone(), translations.clone());
        let resolver = LinkResolver::new(translations.clone());
        let engine = TransferEngine::new(
            self.source.clone(),
            writer.clone(),
            resolver.clone(),
            TransferConfig::from_config(&self.config),
        );

        let mut deferred: Vec<(TransformedDocument, Option<String>)> = Vec::new();
        let mut cancelled = false;

        for mapping in &selected {
            if cancel.is_cancelled() {
                cancelled = true;
                info!("Cancelled; {} not started", mapping.table);
                continue;
            }

            let table = mapping.table.as_str();
            run.set_table_status(table, TableStatus::Extracting);
            let stats = engine.execute(mapping, &cancel, &self.phase).await;

            run.record_anomalies(stats.anomalies);
            let display = display_without_links(mapping);
            deferred.extend(stats.deferred.into_iter().map(|d| (d, display.clone())));

            if let Some(report) = run.table_mut(table) {
                report.extracted = stats.extracted;
                report.written = stats.written;
                report.skipped = stats.skipped;

                if let Some(e) = stats.failure {
                    let failure = match e {
                        MigrateError::TableMigrationFailed { .. } => e,
                        other => MigrateError::table_failed(table, other.to_string()),
                    };
                    error!("{}", failure);
                    report.mark_failed(&failure.to_string());
                } else if stats.cancelled {
                    warn!("{}: interrupted by cancellation", table);
                    report.mark_failed("interrupted by cancellation");
                } else {
                    report.mark_completed();
                }
            }
            cancelled |= stats.cancelled;
        }

        // Pass two always runs so no written document keeps a placeholder.
        if !deferred.is_empty() {
            self.phase.send_replace(RunPhase::ResolvingLinks);
            let anomalies = resolve_deferred(&resolver, &writer, deferred).await;
            run.record_anomalies(anomalies);
        }

        let status = if cancelled {
            RunStatus::Cancelled
        } else {
            RunStatus::Done
        };
        run.finish(status);
        self.phase.send_replace(match status {
            RunStatus::Cancelled => RunPhase::Cancelled,
            _ => RunPhase::Done,
        });

        let summary = run.summary();
        info!(
            "Migration {:?}: {}/{} tables, {} written, {} skipped, {} anomalies in {:.1}s",
            run.status,
            summary.tables_completed,
            summary.tables_total,
            summary.records_written,
            summary.records_skipped,
            run.anomalies.len(),
            run.duration_seconds().unwrap_or_default()
        );
        for table in &summary.failed_tables {
            warn!("Table failed: {}", table);
        }

        Ok(run)
    }

    /// Verify connections, prepare collections and optionally seed translations.
    async fn prepare(
        &self,
        selected: &[&TableMapping],
        resume: bool,
        translations: &SharedTranslations,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let first = selected.first().map(|m| m.table.as_str());
        self.verify_connections(first, cancel).await?;

        for mapping in selected {
            self.store
                .ensure_collection(mapping.collection_name())
                .await
                .map_err(|e| {
                    MigrateError::Setup(format!(
                        "Failed to prepare collection {}: {}",
                        mapping.collection_name(),
                        e
                    ))
                })?;
        }

        if resume {
            let mut table = translations.write().await;
            for mapping in &self.config.migration.tables {
                let entries = self
                    .store
                    .load_translations(
                        mapping.collection_name(),
                        &mapping.table,
                        mapping.display_field.as_deref(),
                    )
                    .await
                    .map_err(|e| {
                        MigrateError::Setup(format!(
                            "Failed to load translations for {}: {}",
                            mapping.table, e
                        ))
                    })?;
                let count = entries.len();
                for entry in entries {
                    table.insert(entry);
                }
                debug!("{}: seeded {} translations", mapping.table, count);
            }
            info!("Seeded {} translations from the destination", table.len());
        }

        Ok(())
    }

    /// Compare a table's mapping with the fields on the first source page.
    pub async fn check_mapping(&self, table: &str) -> Result<MappingCheck> {
        let mapping = self
            .config
            .migration
            .mapping(table)
            .ok_or_else(|| MigrateError::Config(format!("Unknown table: {}", table)))?;

        let seen = sample_fields(
            self.source.as_ref(),
            table,
            self.config.source.page_size,
        )
        .await?;

        let (covered, uncovered): (Vec<String>, Vec<String>) =
            seen.iter().cloned().partition(|f| mapping.covers(f));

        let mut unseen_rules: Vec<String> = mapping
            .rules
            .iter()
            .flat_map(|r| r.covered_fields())
            .filter(|f| !seen.contains(*f))
            .map(str::to_string)
            .collect();
        unseen_rules.sort();
        unseen_rules.dedup();

        Ok(MappingCheck {
            table: table.to_string(),
            covered,
            uncovered,
            unseen_rules,
        })
    }

    /// Check source and store connectivity.
    ///
    /// The source is read through the first declared table. A refusal scoped
    /// to that table still counts as connected and is shown as the error.
    pub async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let source = match self.config.migration.tables.first() {
            Some(first) => self.source.health_check(&first.table).await,
            None => Err(MigrateError::Config("no tables declared".into())),
        };
        let source_latency_ms = start.elapsed().as_millis() as u64;
        let source_connected = matches!(source, Ok(()) | Err(MigrateError::TableUnavailable { .. }));

        let start = Instant::now();
        let target = self.store.ping().await;
        let target_latency_ms = start.elapsed().as_millis() as u64;

        HealthCheckResult {
            source_connected,
            source_latency_ms,
            source_error: source.as_ref().err().map(|e| e.to_string()),
            target_connected: target.is_ok(),
            target_latency_ms,
            target_error: target.as_ref().err().map(|e| e.to_string()),
            healthy: source_connected && target.is_ok(),
        }
    }
}

/// Display field for the pass-two rewrite, or `None` when the display field is
/// itself derived from links and could not be labelled in pass one.
fn display_without_links(mapping: &TableMapping) -> Option<String> {
    let display = mapping.display_field.as_deref()?;
    let from_links = mapping.rules.iter().any(|r| {
        r.dest_field() == display
            && (r.is_link() || matches!(r.computed, Some(ComputedRule::LinkedDisplay { .. })))
    });
    (!from_links).then(|| display.to_string())
}

/// Pass two: settle every remaining placeholder and rewrite the document.
async fn resolve_deferred(
    resolver: &LinkResolver,
    writer: &Writer,
    deferred: Vec<(TransformedDocument, Option<String>)>,
) -> Vec<Anomaly> {
    info!("Resolving links for {} deferred documents", deferred.len());
    let mut anomalies = Vec::new();
    let mut rewritten = 0usize;

    for (mut doc, display) in deferred {
        anomalies.extend(resolver.finalize(&mut doc).await);
        match writer.write(&mut doc, display.as_deref()).await {
            WriteOutcome::Written { conflict, .. } => {
                rewritten += 1;
                anomalies.extend(conflict);
            }
            WriteOutcome::Failed(anomaly) => anomalies.push(anomaly),
        }
    }

    info!("Rewrote {} documents with resolved links", rewritten);
    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldRule;
    use crate::source::MemorySource;
    use crate::target::MemoryStore;
    use serde_json::json;

    fn config() -> Config {
        Config::from_yaml(
            r#"
source:
  base_id: appAGRI
  api_key: patTEST
  max_retries: 1
  retry_backoff_ms: 1
target:
  uri: mongodb://localhost:27017
migration:
  tables:
    - table: 圃場
      collection: fields
      display_field: name
      rules:
        - { source: 圃場名, dest: name, kind: rename, coerce: text }
    - table: タスク
      collection: tasks
      rules:
        - { source: タイトル, dest: title, kind: rename, coerce: text }
        - { source: 圃場, dest: field_ids, kind: rename, coerce: array_of_ids, link_table: 圃場 }
"#,
        )
        .unwrap()
    }

    fn source() -> MemorySource {
        MemorySource::new()
            .with_record("圃場", "recF1", json!({"圃場名": "北1"}))
            .with_record("タスク", "recT1", json!({"タイトル": "播種", "圃場": ["recF1"]}))
    }

    #[tokio::test]
    async fn test_select_tables_keeps_declared_order() {
        let orch = Orchestrator::new(config(), Arc::new(source()), Arc::new(MemoryStore::new()));
        let selected = orch
            .select_tables(&["タスク".to_string(), "圃場".to_string()])
            .unwrap();
        let names: Vec<_> = selected.iter().map(|m| m.table.as_str()).collect();
        assert_eq!(names, vec!["圃場", "タスク"]);

        assert!(orch.select_tables(&["nope".to_string()]).is_err());
    }

    #[tokio::test]
    async fn test_run_migration_writes_and_links() {
        let store = Arc::new(MemoryStore::new());
        let orch = Orchestrator::new(config(), Arc::new(source()), store.clone());

        let run = orch
            .run_migration(&[], false, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Done);
        let field = store.get("fields", "recF1").unwrap();
        let task = store.get("tasks", "recT1").unwrap();
        assert_eq!(task["field_ids"], json!([field["_id"]]));
        assert_eq!(*orch.subscribe().borrow(), RunPhase::Done);
    }

    #[tokio::test]
    async fn test_unreachable_store_aborts() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let orch = Orchestrator::new(config(), Arc::new(source()), store);

        let run = orch
            .run_migration(&[], false, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Aborted);
        assert!(run.error.is_some());
        assert!(run
            .table_reports
            .values()
            .all(|r| r.status == TableStatus::Skipped));
    }

    #[tokio::test]
    async fn test_unreachable_source_aborts_after_retries() {
        let source = Arc::new(source().offline());
        let orch = Orchestrator::new(config(), source.clone(), Arc::new(MemoryStore::new()));

        let run = orch
            .run_migration(&["タスク".to_string()], false, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Aborted);
        assert!(run.error.as_deref().unwrap().contains("source unreachable"));
        // One attempt plus one retry, both against the selected table.
        assert_eq!(source.calls_for("タスク"), 2);
        assert_eq!(source.calls_for("圃場"), 0);
    }

    #[tokio::test]
    async fn test_refused_first_table_does_not_abort() {
        let source = MemorySource::new()
            .with_record("タスク", "recT1", json!({"タイトル": "播種"}));
        let store = Arc::new(MemoryStore::new());
        let orch = Orchestrator::new(config(), Arc::new(source), store.clone());

        let run = orch
            .run_migration(&[], false, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(run.status, RunStatus::Done);
        assert_eq!(run.table_reports["圃場"].status, TableStatus::Failed);
        assert_eq!(run.table_reports["タスク"].status, TableStatus::Completed);
        assert!(store.get("tasks", "recT1").is_some());
    }

    #[tokio::test]
    async fn test_check_mapping_reports_uncovered_fields() {
        let source = MemorySource::new()
            .with_record("圃場", "recF1", json!({"圃場名": "北1", "面積": 1.2}));
        let orch = Orchestrator::new(config(), Arc::new(source), Arc::new(MemoryStore::new()));

        let check = orch.check_mapping("圃場").await.unwrap();
        assert_eq!(check.covered, vec!["圃場名".to_string()]);
        assert_eq!(check.uncovered, vec!["面積".to_string()]);
        assert!(check.unseen_rules.is_empty());
        assert!(!check.is_complete());

        assert!(orch.check_mapping("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_health_check() {
        let orch = Orchestrator::new(config(), Arc::new(source()), Arc::new(MemoryStore::new()));
        assert!(orch.health_check().await.healthy);

        let orch = Orchestrator::new(
            config(),
            Arc::new(MemorySource::new().offline()),
            Arc::new(MemoryStore::new()),
        );
        let result = orch.health_check().await;
        assert!(!result.healthy);
        assert!(!result.source_connected);
        assert!(result.target_connected);
        assert!(result.source_error.is_some());

        // 圃場 is declared first but absent: the source still answered.
        let orch = Orchestrator::new(
            config(),
            Arc::new(MemorySource::new().with_table("タスク")),
            Arc::new(MemoryStore::new()),
        );
        let result = orch.health_check().await;
        assert!(result.healthy);
        assert!(result.source_connected);
        assert!(result.source_error.is_some());
    }

    #[test]
    fn test_display_without_links() {
        let plain = TableMapping::new("t")
            .with_display_field("name")
            .with_rule(FieldRule::rename("名前", "name"));
        assert_eq!(display_without_links(&plain).as_deref(), Some("name"));

        let linked = TableMapping::new("t")
            .with_display_field("crop")
            .with_rule(FieldRule::link("作物", "crop", "作物マスター"));
        assert_eq!(display_without_links(&linked), None);
    }
}
