//! Configuration validation.

use std::collections::HashSet;

use tracing::warn;

use super::{Config, MAX_PAGE_SIZE};
use crate::core::{ComputedRule, RuleKind, RESERVED_FIELDS};
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.base_id.is_empty() {
        return Err(MigrateError::Config("source.base_id is required".into()));
    }
    if config.source.page_size == 0 || config.source.page_size > MAX_PAGE_SIZE {
        return Err(MigrateError::Config(format!(
            "source.page_size must be between 1 and {}, got {}",
            MAX_PAGE_SIZE, config.source.page_size
        )));
    }
    if config.source.timeout_secs == 0 {
        return Err(MigrateError::Config(
            "source.timeout_secs must be at least 1".into(),
        ));
    }

    // Target validation
    let uri = &config.target.uri;
    if !uri.starts_with("mongodb://") && !uri.starts_with("mongodb+srv://") {
        return Err(MigrateError::Config(
            "target.uri must start with mongodb:// or mongodb+srv://".into(),
        ));
    }
    if config.target.database.is_empty() {
        return Err(MigrateError::Config("target.database is required".into()));
    }

    if config.migration.read_ahead_pages == 0 {
        return Err(MigrateError::Config(
            "migration.read_ahead_pages must be at least 1".into(),
        ));
    }

    validate_mappings(config)
}

fn validate_mappings(config: &Config) -> Result<()> {
    let tables = &config.migration.tables;
    let declared: HashSet<&str> = tables.iter().map(|m| m.table.as_str()).collect();

    let mut seen_tables = HashSet::new();
    let mut seen_collections = HashSet::new();

    for mapping in tables {
        if mapping.table.is_empty() {
            return Err(MigrateError::Config("table name cannot be empty".into()));
        }
        if !seen_tables.insert(mapping.table.as_str()) {
            return Err(MigrateError::Config(format!(
                "table {} is declared more than once",
                mapping.table
            )));
        }
        if !seen_collections.insert(mapping.collection_name()) {
            return Err(MigrateError::Config(format!(
                "collection {} is the destination of more than one table",
                mapping.collection_name()
            )));
        }

        let mut dest_fields = HashSet::new();
        for rule in &mapping.rules {
            let context = format!("{}: rule for '{}'", mapping.table, rule.source);

            match rule.kind {
                RuleKind::Computed => {
                    let Some(computed) = &rule.computed else {
                        return Err(MigrateError::Config(format!(
                            "{}: computed rule for '{}' has no computed definition",
                            mapping.table,
                            rule.dest_field()
                        )));
                    };
                    if rule.dest.as_deref().map_or(true, str::is_empty) {
                        return Err(MigrateError::Config(format!(
                            "{}: computed rule needs a dest field",
                            mapping.table
                        )));
                    }
                    if let ComputedRule::LinkedDisplay { link_field } = computed {
                        let is_link = mapping
                            .rule_for(link_field)
                            .is_some_and(|r| r.is_link());
                        if !is_link {
                            return Err(MigrateError::Config(format!(
                                "{}: linked_display refers to '{}', which is not a link field",
                                mapping.table, link_field
                            )));
                        }
                    }
                }
                _ if rule.source.is_empty() => {
                    return Err(MigrateError::Config(format!(
                        "{}: rule has an empty source field",
                        mapping.table
                    )));
                }
                _ => {}
            }

            if rule.kind == RuleKind::Drop {
                continue;
            }

            let dest = rule.dest_field();
            if dest.is_empty() {
                return Err(MigrateError::Config(format!("{} has an empty dest", context)));
            }
            if RESERVED_FIELDS.contains(&dest) || dest == "_id" {
                return Err(MigrateError::Config(format!(
                    "{} targets reserved field '{}'",
                    context, dest
                )));
            }
            if !dest_fields.insert(dest) {
                return Err(MigrateError::Config(format!(
                    "{}: dest field '{}' is written by more than one rule",
                    mapping.table, dest
                )));
            }

            if let Some(link_table) = &rule.link_table {
                if !declared.contains(link_table.as_str()) {
                    warn!(
                        "{} links to undeclared table {}; its links will stay unresolved",
                        context, link_table
                    );
                }
            }
        }

        if let Some(display) = &mapping.display_field {
            if !dest_fields.contains(display.as_str()) {
                return Err(MigrateError::Config(format!(
                    "{}: display_field '{}' is not produced by any rule",
                    mapping.table, display
                )));
            }
        }
    }

    Ok(())
}
