//! Core types shared by every migration stage.
//!
//! - [`record`]: source records and destination-shaped documents
//! - [`value`]: the tagged field value union and link slots
//! - [`mapping`]: declarative per-table field rules
//!
//! Data flows strictly forward through these types:
//! `SourceRecord` → (mapper) → `TransformedDocument` → (resolver) → (writer).

pub mod mapping;
pub mod record;
pub mod value;

pub use mapping::{Coercion, ComputedRule, FieldRule, RuleKind, TableMapping};
pub use record::{PendingComputed, SourceRecord, TransformedDocument};
pub use value::{DestId, FieldValue, LinkSlot};

/// Destination field carrying the immutable source record id.
pub const SOURCE_ID_FIELD: &str = "source_id";

/// Destination field carrying the source table name.
pub const SOURCE_TABLE_FIELD: &str = "source_table";

/// Destination field carrying the source record's creation time.
pub const CREATED_TIME_FIELD: &str = "created_time";

/// Destination field stamped by the writer.
pub const MIGRATED_AT_FIELD: &str = "migrated_at";

/// Catch-all bucket for source fields no rule covers.
pub const UNMAPPED_FIELD: &str = "_unmapped";

/// Field names the writer owns; mapping rules may not target them.
pub const RESERVED_FIELDS: [&str; 5] = [
    SOURCE_ID_FIELD,
    SOURCE_TABLE_FIELD,
    CREATED_TIME_FIELD,
    MIGRATED_AT_FIELD,
    UNMAPPED_FIELD,
];
