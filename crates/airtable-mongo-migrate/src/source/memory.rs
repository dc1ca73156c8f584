//! Deterministic in-memory source.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use super::{Page, SourceReader};
use crate::core::SourceRecord;
use crate::error::{MigrateError, Result};

/// In-memory tables with offset cursors and injectable failures.
#[derive(Debug, Default)]
pub struct MemorySource {
    tables: BTreeMap<String, Vec<SourceRecord>>,
    /// Remaining injected failures per table.
    failures: Mutex<HashMap<String, usize>>,
    /// `list_page` calls per table.
    calls: Mutex<HashMap<String, usize>>,
    offline: bool,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record. Creation times increase with insertion order.
    pub fn with_record(mut self, table: &str, source_id: &str, fields: Value) -> Self {
        let records = self.tables.entry(table.to_string()).or_default();
        let created_at = fixed_time(records.len());
        records.push(SourceRecord::from_json(table, source_id, fields, created_at));
        self
    }

    /// Declare an empty table.
    pub fn with_table(mut self, table: &str) -> Self {
        self.tables.entry(table.to_string()).or_default();
        self
    }

    /// Fail the next `times` page requests for `table`.
    pub fn failing(self, table: &str, times: usize) -> Self {
        self.lock_failures().insert(table.to_string(), times);
        self
    }

    /// Fail every request as if the source were unreachable.
    pub fn offline(mut self) -> Self {
        self.offline = true;
        self
    }

    /// Total `list_page` calls so far.
    pub fn calls(&self) -> usize {
        self.lock_calls().values().sum()
    }

    /// `list_page` calls for one table so far.
    pub fn calls_for(&self, table: &str) -> usize {
        self.lock_calls().get(table).copied().unwrap_or(0)
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, HashMap<String, usize>> {
        self.failures
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn fixed_time(offset_secs: usize) -> DateTime<Utc> {
    let base = Utc
        .with_ymd_and_hms(2025, 7, 1, 9, 0, 0)
        .single()
        .unwrap_or_default();
    base + chrono::Duration::seconds(offset_secs as i64)
}

#[async_trait]
impl SourceReader for MemorySource {
    async fn list_page(
        &self,
        table: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page> {
        *self.lock_calls().entry(table.to_string()).or_default() += 1;

        if self.offline {
            return Err(MigrateError::source_unavailable(table, "source is offline"));
        }
        {
            let mut failures = self.lock_failures();
            if let Some(remaining) = failures.get_mut(table).filter(|n| **n > 0) {
                *remaining -= 1;
                return Err(MigrateError::source_unavailable(
                    table,
                    "injected transport failure",
                ));
            }
        }

        let records = self.tables.get(table).ok_or_else(|| {
            MigrateError::table_unavailable(table, "HTTP 404: table does not exist")
        })?;

        let start = match cursor {
            None => 0,
            Some(c) => c.parse::<usize>().map_err(|_| {
                MigrateError::source_unavailable(table, format!("invalid cursor {:?}", c))
            })?,
        };
        let end = (start + page_size.max(1)).min(records.len());
        let page = records.get(start..end).unwrap_or_default().to_vec();

        Ok(Page {
            records: page,
            next: (end < records.len()).then(|| end.to_string()),
        })
    }

    fn source_type(&self) -> &str {
        "memory"
    }
}
