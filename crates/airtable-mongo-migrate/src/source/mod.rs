//! Source extraction: paginated listing of a source table's records.

mod airtable;
mod memory;

pub use airtable::AirtableSource;
pub use memory::MemorySource;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::core::SourceRecord;
use crate::error::Result;

/// One page of records and the cursor for the next page.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<SourceRecord>,
    /// `None` once the table is exhausted.
    pub next: Option<String>,
}

/// Trait for source operations.
///
/// Listing is restartable from any cursor: a page is either returned whole
/// or the call fails. [`crate::MigrateError::SourceUnavailable`] means the
/// source itself could not be reached and is retried;
/// [`crate::MigrateError::TableUnavailable`] means only `table` was refused.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// List one page of `table`, starting at `cursor` (`None` for the first page).
    async fn list_page(&self, table: &str, cursor: Option<&str>, page_size: usize)
        -> Result<Page>;

    /// Check the source answers for `table` and the credentials are accepted.
    async fn health_check(&self, table: &str) -> Result<()> {
        self.list_page(table, None, 1).await.map(|_| ())
    }

    /// Get the source type.
    fn source_type(&self) -> &str;
}

/// Union of the field names seen on the first page of `table`.
pub async fn sample_fields(
    source: &dyn SourceReader,
    table: &str,
    page_size: usize,
) -> Result<BTreeSet<String>> {
    let page = source.list_page(table, None, page_size).await?;
    Ok(page
        .records
        .iter()
        .flat_map(|r| r.fields.keys().cloned())
        .collect())
}
