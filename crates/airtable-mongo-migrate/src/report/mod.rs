//! Run report: the aggregate outcome of one migration invocation.
//!
//! The report is the primary debugging surface. Per-record problems never
//! raise errors; they land here as [`Anomaly`] entries.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Done,
    Cancelled,
    Aborted,
}

/// Per-table status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableStatus {
    Pending,
    /// Being extracted, mapped and written. Live progress is on [`RunPhase`].
    Extracting,
    Completed,
    Failed,
    /// Not attempted because the run was cancelled first.
    Skipped,
}

/// Where a run currently is. Published on a watch channel while running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase", content = "table")]
pub enum RunPhase {
    Pending,
    Extracting(String),
    Mapping(String),
    Writing(String),
    ResolvingLinks,
    Done,
    Cancelled,
    Aborted,
}

/// Kind of per-record irregularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    UnmappedField,
    CoercionFailure,
    UnresolvedLink,
    PermanentlyUnresolvedLink,
    WriteFailure,
    /// A second destination id was offered for an already translated source id.
    TranslationConflict,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::UnmappedField => "unmapped_field",
            AnomalyKind::CoercionFailure => "coercion_failure",
            AnomalyKind::UnresolvedLink => "unresolved_link",
            AnomalyKind::PermanentlyUnresolvedLink => "permanently_unresolved_link",
            AnomalyKind::WriteFailure => "write_failure",
            AnomalyKind::TranslationConflict => "translation_conflict",
        }
    }
}

/// A non-fatal irregularity for one record or field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub table: String,
    pub source_id: String,
    /// Field concerned, if the anomaly is field-level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    pub kind: AnomalyKind,
    pub reason: String,
}

impl Anomaly {
    pub fn new(
        kind: AnomalyKind,
        table: impl Into<String>,
        source_id: impl Into<String>,
        field: Option<&str>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            source_id: source_id.into(),
            field: field.map(str::to_string),
            kind,
            reason: reason.into(),
        }
    }
}

/// Per-table counts and outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableReport {
    pub status: TableStatus,

    /// Destination collection.
    pub collection: String,

    /// Records read from the source.
    pub extracted: u64,

    /// Records persisted.
    pub written: u64,

    /// Records extracted but not persisted.
    pub skipped: u64,

    /// Error message if the table failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl TableReport {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            status: TableStatus::Pending,
            collection: collection.into(),
            extracted: 0,
            written: 0,
            skipped: 0,
            error: None,
            completed_at: None,
        }
    }

    pub fn mark_completed(&mut self) {
        self.status = TableStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: &str) {
        self.status = TableStatus::Failed;
        self.error = Some(error.to_string());
        self.completed_at = Some(Utc::now());
    }
}

/// The run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationRun {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA256 hash of the mapping configuration.
    pub config_hash: String,

    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    pub status: RunStatus,

    /// Whether the translation table was pre-seeded from the destination.
    #[serde(default)]
    pub resumed: bool,

    /// Tables in processing order.
    pub tables: Vec<String>,

    /// Per-table outcome, keyed by source table name.
    pub table_reports: BTreeMap<String, TableReport>,

    /// Anomalies in the order they were encountered.
    pub anomalies: Vec<Anomaly>,

    /// Setup error that aborted the run.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate view of a run, for printing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub tables_total: usize,
    pub tables_completed: usize,
    pub tables_failed: usize,
    pub records_extracted: u64,
    pub records_written: u64,
    pub records_skipped: u64,
    pub anomalies_by_kind: BTreeMap<String, usize>,
    pub failed_tables: Vec<String>,
}

impl MigrationRun {
    /// Create a run report for the given tables and collections.
    pub fn new(config_hash: String, tables: &[(String, String)]) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            config_hash,
            started_at: Utc::now(),
            completed_at: None,
            status: RunStatus::Pending,
            resumed: false,
            tables: tables.iter().map(|(t, _)| t.clone()).collect(),
            table_reports: tables
                .iter()
                .map(|(t, c)| (t.clone(), TableReport::new(c.clone())))
                .collect(),
            anomalies: Vec::new(),
            error: None,
        }
    }

    pub fn table_mut(&mut self, table: &str) -> Option<&mut TableReport> {
        self.table_reports.get_mut(table)
    }

    pub fn set_table_status(&mut self, table: &str, status: TableStatus) {
        if let Some(report) = self.table_reports.get_mut(table) {
            report.status = status;
        }
    }

    pub fn record_anomalies(&mut self, anomalies: impl IntoIterator<Item = Anomaly>) {
        self.anomalies.extend(anomalies);
    }

    pub fn anomalies_of(&self, kind: AnomalyKind) -> impl Iterator<Item = &Anomaly> {
        self.anomalies.iter().filter(move |a| a.kind == kind)
    }

    /// Abort the run on a setup failure.
    pub fn abort(&mut self, error: &str) {
        self.error = Some(error.to_string());
        self.finish(RunStatus::Aborted);
    }

    /// Finish the run. Tables never started are marked skipped.
    pub fn finish(&mut self, status: RunStatus) {
        for report in self.table_reports.values_mut() {
            if report.status == TableStatus::Pending {
                report.status = TableStatus::Skipped;
            }
        }
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            tables_total: self.tables.len(),
            ..Default::default()
        };

        for table in &self.tables {
            let Some(report) = self.table_reports.get(table) else {
                continue;
            };
            match report.status {
                TableStatus::Completed => summary.tables_completed += 1,
                TableStatus::Failed => {
                    summary.tables_failed += 1;
                    summary.failed_tables.push(table.clone());
                }
                _ => {}
            }
            summary.records_extracted += report.extracted;
            summary.records_written += report.written;
            summary.records_skipped += report.skipped;
        }

        for anomaly in &self.anomalies {
            *summary
                .anomalies_by_kind
                .entry(anomaly.kind.as_str().to_string())
                .or_insert(0) += 1;
        }

        summary
    }

    /// Duration in seconds, if finished.
    pub fn duration_seconds(&self) -> Option<f64> {
        self.completed_at
            .map(|end| (end - self.started_at).num_milliseconds() as f64 / 1000.0)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Save the report as pretty JSON (atomic write).
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = self.to_json()?;

        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Load a previously saved report.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Default report file name, timestamped like `migration_report_2025-07-08T10-00-00Z.json`.
    pub fn default_file_name(&self) -> String {
        format!(
            "migration_report_{}.json",
            self.started_at.format("%Y-%m-%dT%H-%M-%SZ")
        )
    }
}
