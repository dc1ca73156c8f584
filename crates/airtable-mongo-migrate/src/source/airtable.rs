//! Airtable REST source.
//!
//! Uses `ureq` (sync) inside `tokio::task::spawn_blocking` so page fetches do
//! not block the runtime.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use super::{Page, SourceReader};
use crate::config::SourceConfig;
use crate::core::SourceRecord;
use crate::error::{MigrateError, Result};

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<ApiRecord>,
    #[serde(default)]
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiRecord {
    id: String,
    created_time: DateTime<Utc>,
    #[serde(default)]
    fields: BTreeMap<String, Value>,
}

/// Source reading an Airtable base through the list-records endpoint.
pub struct AirtableSource {
    agent: ureq::Agent,
    api_url: String,
    base_id: String,
    api_key: String,
}

impl AirtableSource {
    /// Create a source from configuration. Resolves the API key.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let api_key = config.resolve_api_key()?;
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(config.call_timeout()))
            .build()
            .into();

        info!(
            "Airtable source: base {} via {}",
            config.base_id, config.api_url
        );

        Ok(Self {
            agent,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            base_id: config.base_id.clone(),
            api_key,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!(
            "{}/{}/{}",
            self.api_url,
            self.base_id,
            encode_path_segment(table)
        )
    }

    async fn fetch(&self, table: &str, cursor: Option<&str>, page_size: usize) -> Result<Page> {
        let agent = self.agent.clone();
        let url = self.table_url(table);
        let auth = format!("Bearer {}", self.api_key);
        let cursor = cursor.map(str::to_string);
        let table_name = table.to_string();

        let response = tokio::task::spawn_blocking(move || -> Result<ListResponse> {
            let mut request = agent
                .get(&url)
                .header("Authorization", &auth)
                .query("pageSize", page_size.to_string());
            if let Some(offset) = &cursor {
                request = request.query("offset", offset);
            }

            let response = request.call().map_err(|e| classify(&table_name, e))?;

            response.into_body().read_json::<ListResponse>().map_err(|e| {
                MigrateError::source_unavailable(
                    &table_name,
                    format!("failed to decode list response: {}", e),
                )
            })
        })
        .await
        .map_err(|e| MigrateError::source_unavailable(table, format!("task join error: {}", e)))??;

        debug!(
            "{}: fetched {} records (more: {})",
            table,
            response.records.len(),
            response.offset.is_some()
        );

        Ok(Page {
            records: response
                .records
                .into_iter()
                .map(|r| SourceRecord::new(table, r.id, r.fields, r.created_time))
                .collect(),
            next: response.offset.filter(|o| !o.is_empty()),
        })
    }
}

/// Split request failures into table-scoped refusals and source outages.
///
/// 403, 404 and 422 name a table the token cannot see or that no longer
/// exists. Everything else, 401 included, means the base is out of reach.
fn classify(table: &str, err: ureq::Error) -> MigrateError {
    match err {
        ureq::Error::StatusCode(code @ (403 | 404 | 422)) => {
            MigrateError::table_unavailable(table, format!("HTTP {}", code))
        }
        other => MigrateError::source_unavailable(table, other.to_string()),
    }
}

/// Percent-encode a table name for use as one URL path segment.
fn encode_path_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

#[async_trait]
impl SourceReader for AirtableSource {
    async fn list_page(
        &self,
        table: &str,
        cursor: Option<&str>,
        page_size: usize,
    ) -> Result<Page> {
        self.fetch(table, cursor, page_size).await
    }

    fn source_type(&self) -> &str {
        "airtable"
    }
}
