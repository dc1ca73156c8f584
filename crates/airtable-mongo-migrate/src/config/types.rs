//! Configuration type definitions.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::TableMapping;
use crate::error::{MigrateError, Result};

/// Environment variable consulted when `source.api_key` is absent.
pub const API_KEY_ENV: &str = "AIRTABLE_API_KEY";

/// Largest page the Airtable list endpoint returns.
pub const MAX_PAGE_SIZE: usize = 100;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source base (Airtable) configuration.
    pub source: SourceConfig,

    /// Destination (MongoDB) configuration.
    pub target: TargetConfig,

    /// Table mappings and run behaviour.
    #[serde(default)]
    pub migration: MigrationConfig,
}

/// Source base (Airtable) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Base id (`appXXXXXXXXXXXXXX`).
    pub base_id: String,

    /// API token. Never serialized.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// API root (default: "https://api.airtable.com/v0").
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Records per page (default: 100, max: 100).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Per-request timeout in seconds (default: 30).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first failed page request (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Initial retry backoff in milliseconds, doubled per retry (default: 500).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl SourceConfig {
    /// API token from the config file, else from `AIRTABLE_API_KEY`.
    pub fn resolve_api_key(&self) -> Result<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.is_empty()))
            .ok_or_else(|| {
                MigrateError::Config(format!(
                    "source.api_key is not set and {} is empty",
                    API_KEY_ENV
                ))
            })
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("base_id", &self.base_id)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_url", &self.api_url)
            .field("page_size", &self.page_size)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

/// Destination (MongoDB) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Connection string (`mongodb://` or `mongodb+srv://`).
    pub uri: String,

    /// Database name (default: "agri_ai_db").
    #[serde(default = "default_database")]
    pub database: String,
}

impl TargetConfig {
    /// Connection string with any `user:password@` credentials masked.
    pub fn redacted_uri(&self) -> String {
        let Some((scheme, rest)) = self.uri.split_once("://") else {
            return self.uri.clone();
        };
        match rest.rsplit_once('@') {
            Some((_, host)) => format!("{}://[REDACTED]@{}", scheme, host),
            None => self.uri.clone(),
        }
    }
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("uri", &self.redacted_uri())
            .field("database", &self.database)
            .finish()
    }
}

/// Table mappings and run behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Table mappings in dependency order (masters first).
    #[serde(default)]
    pub tables: Vec<TableMapping>,

    /// Pages fetched ahead of the page being written (default: 2).
    #[serde(default = "default_read_ahead_pages")]
    pub read_ahead_pages: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            read_ahead_pages: default_read_ahead_pages(),
        }
    }
}

impl MigrationConfig {
    /// Mapping for a source table.
    pub fn mapping(&self, table: &str) -> Option<&TableMapping> {
        self.tables.iter().find(|m| m.table == table)
    }

    /// Declared table names in order.
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|m| m.table.clone()).collect()
    }
}

fn default_api_url() -> String {
    "https://api.airtable.com/v0".to_string()
}

fn default_page_size() -> usize {
    MAX_PAGE_SIZE
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_database() -> String {
    "agri_ai_db".to_string()
}

fn default_read_ahead_pages() -> usize {
    2
}
