//! Declarative field-mapping rules.
//!
//! A [`TableMapping`] is the full rule set for one source table. Mappings are
//! declared in the YAML configuration, in dependency order (masters first).

use serde::{Deserialize, Serialize};

/// What a rule does with its source field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Copy the value under the same name.
    Passthrough,
    /// Copy the value under `dest`.
    Rename,
    /// Derive `dest` from one or more source fields.
    Computed,
    /// Discard the field.
    Drop,
}

/// Destination type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Coercion {
    Text,
    Number,
    Date,
    ArrayOfIds,
    ArrayOfText,
}

impl Coercion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Coercion::Text => "text",
            Coercion::Number => "number",
            Coercion::Date => "date",
            Coercion::ArrayOfIds => "array_of_ids",
            Coercion::ArrayOfText => "array_of_text",
        }
    }
}

/// Derivation for a computed rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ComputedRule {
    /// Join the text form of several fields.
    Concat {
        fields: Vec<String>,
        #[serde(default = "default_separator")]
        separator: String,
    },

    /// First non-empty value among alternate field names.
    FirstOf { fields: Vec<String> },

    /// Labels of the records linked from `link_field`. Evaluated by the
    /// link resolver once the linked records are known.
    LinkedDisplay { link_field: String },
}

impl ComputedRule {
    /// Source fields this rule reads.
    pub fn source_fields(&self) -> Vec<&str> {
        match self {
            ComputedRule::Concat { fields, .. } | ComputedRule::FirstOf { fields } => {
                fields.iter().map(String::as_str).collect()
            }
            ComputedRule::LinkedDisplay { link_field } => vec![link_field.as_str()],
        }
    }
}

fn default_separator() -> String {
    " ".to_string()
}

/// One field rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Source field name. Unused by computed rules.
    #[serde(default)]
    pub source: String,

    /// Destination field name. Defaults to `source`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,

    pub kind: RuleKind,

    /// Destination type. Absent keeps the raw value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coerce: Option<Coercion>,

    /// Table a link field points into. Defaults to the owning table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_table: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed: Option<ComputedRule>,
}

impl FieldRule {
    pub fn passthrough(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dest: None,
            kind: RuleKind::Passthrough,
            coerce: None,
            link_table: None,
            computed: None,
        }
    }

    pub fn rename(source: impl Into<String>, dest: impl Into<String>) -> Self {
        Self {
            dest: Some(dest.into()),
            kind: RuleKind::Rename,
            ..Self::passthrough(source)
        }
    }

    pub fn drop(source: impl Into<String>) -> Self {
        Self {
            kind: RuleKind::Drop,
            ..Self::passthrough(source)
        }
    }

    pub fn computed(dest: impl Into<String>, rule: ComputedRule) -> Self {
        Self {
            source: String::new(),
            dest: Some(dest.into()),
            kind: RuleKind::Computed,
            coerce: None,
            link_table: None,
            computed: Some(rule),
        }
    }

    /// Link rule: the field holds ids of records in `link_table`.
    pub fn link(
        source: impl Into<String>,
        dest: impl Into<String>,
        link_table: impl Into<String>,
    ) -> Self {
        Self {
            dest: Some(dest.into()),
            kind: RuleKind::Rename,
            coerce: Some(Coercion::ArrayOfIds),
            link_table: Some(link_table.into()),
            ..Self::passthrough(source)
        }
    }

    pub fn with_coercion(mut self, coercion: Coercion) -> Self {
        self.coerce = Some(coercion);
        self
    }

    /// Effective destination field name.
    pub fn dest_field(&self) -> &str {
        self.dest.as_deref().unwrap_or(&self.source)
    }

    pub fn is_link(&self) -> bool {
        self.coerce == Some(Coercion::ArrayOfIds)
    }

    /// Source field names this rule accounts for.
    pub fn covered_fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        if !self.source.is_empty() {
            fields.push(self.source.as_str());
        }
        if let Some(computed) = &self.computed {
            fields.extend(computed.source_fields());
        }
        fields
    }
}

/// Rule set for one source table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMapping {
    /// Source table name.
    pub table: String,

    /// Destination collection. Defaults to the table name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    /// Destination field used as this table's record label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_field: Option<String>,

    #[serde(default)]
    pub rules: Vec<FieldRule>,
}

impl TableMapping {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            collection: None,
            display_field: None,
            rules: Vec::new(),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    pub fn with_display_field(mut self, field: impl Into<String>) -> Self {
        self.display_field = Some(field.into());
        self
    }

    pub fn with_rule(mut self, rule: FieldRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn collection_name(&self) -> &str {
        self.collection.as_deref().unwrap_or(&self.table)
    }

    /// Whether any rule accounts for the source field.
    pub fn covers(&self, source_field: &str) -> bool {
        self.rules
            .iter()
            .any(|r| r.covered_fields().contains(&source_field))
    }

    /// Rule that reads `source_field` directly, if any.
    pub fn rule_for(&self, source_field: &str) -> Option<&FieldRule> {
        self.rules
            .iter()
            .find(|r| r.kind != RuleKind::Computed && r.source == source_field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yaml_rule_forms() {
        let yaml = r#"
table: 作業履歴
collection: work_history
display_field: 作業内容
rules:
  - { source: 作業内容, kind: passthrough, coerce: text }
  - { source: 実施日, dest: date, kind: rename, coerce: date }
  - { source: 圃場, dest: field_ids, kind: rename, coerce: array_of_ids, link_table: 圃場管理 }
  - { source: Notes, kind: drop }
  - kind: computed
    dest: field_names
    computed: { op: linked_display, link_field: 圃場 }
  - kind: computed
    dest: worker
    computed: { op: first_of, fields: [作業者, Worker] }
"#;
        let mapping: TableMapping = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(mapping.collection_name(), "work_history");
        assert_eq!(mapping.rules.len(), 6);
        assert!(mapping.rules[2].is_link());
        assert_eq!(mapping.rules[1].dest_field(), "date");
        assert_eq!(mapping.rules[0].dest_field(), "作業内容");
        assert!(mapping.covers("Worker"));
        assert!(mapping.covers("Notes"));
        assert!(!mapping.covers("謎のフィールド2"));
    }

    #[test]
    fn test_concat_default_separator() {
        let rule: ComputedRule =
            serde_yaml::from_str("{ op: concat, fields: [a, b] }").unwrap();
        assert_eq!(
            rule,
            ComputedRule::Concat {
                fields: vec!["a".into(), "b".into()],
                separator: " ".into()
            }
        );
    }

    #[test]
    fn test_collection_defaults_to_table() {
        let mapping = TableMapping::new("crops");
        assert_eq!(mapping.collection_name(), "crops");
    }

    #[test]
    fn test_rule_for_ignores_computed() {
        let mapping = TableMapping::new("t")
            .with_rule(FieldRule::computed(
                "label",
                ComputedRule::FirstOf {
                    fields: vec!["name".into()],
                },
            ))
            .with_rule(FieldRule::rename("name", "label_src"));
        assert_eq!(
            mapping.rule_for("name").map(|r| r.dest_field()),
            Some("label_src")
        );
    }
}
