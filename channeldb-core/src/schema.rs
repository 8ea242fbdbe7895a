//! Table schemas and their structural validation.

use crate::config::SubstrateLimits;
use crate::error::{CapacityError, ChannelDbResult, UsageError};
use crate::value::{FieldValue, TypeTag};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Name of the hidden structured field carrying identity and write token.
pub const ROW_FIELD: &str = "_row";

/// Container naming rule of the substrate: lowercase, digits, `_` and `-`.
static TABLE_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9_-]{0,99}$").expect("table name pattern is valid")
});

/// One declared field of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub tag: TypeTag,
    /// Value used when a stored entry predates this field.
    pub default: Option<FieldValue>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, tag: TypeTag) -> Self {
        Self {
            name: name.into(),
            tag,
            default: None,
        }
    }
}

/// A table definition: a name plus an ordered list of typed fields.
///
/// # Example
///
/// ```
/// use channeldb_core::{TableSchema, TypeTag};
///
/// let user = TableSchema::new("user")
///     .field("name", TypeTag::String)
///     .field("password", TypeTag::String);
/// assert_eq!(user.field_names().collect::<Vec<_>>(), vec!["name", "password"]);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub fields: Vec<FieldDef>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Append a field.
    pub fn field(mut self, name: impl Into<String>, tag: TypeTag) -> Self {
        self.fields.push(FieldDef::new(name, tag));
        self
    }

    /// Append a field with a default for entries written before it existed.
    pub fn field_with_default(
        mut self,
        name: impl Into<String>,
        tag: TypeTag,
        default: impl Into<FieldValue>,
    ) -> Self {
        let mut def = FieldDef::new(name, tag);
        def.default = Some(default.into());
        self.fields.push(def);
        self
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn tag_of(&self, name: &str) -> Option<TypeTag> {
        self.get_field(name).map(|f| f.tag)
    }

    /// `(name, tag)` pairs in declaration order.
    pub fn manifest(&self) -> Vec<(String, TypeTag)> {
        self.fields.iter().map(|f| (f.name.clone(), f.tag)).collect()
    }

    /// Check the schema against naming rules and substrate limits.
    ///
    /// One structured-field slot is reserved for [`ROW_FIELD`].
    pub fn validate(&self, limits: &SubstrateLimits) -> ChannelDbResult<()> {
        if !TABLE_NAME_RE.is_match(&self.name) {
            return Err(UsageError::InvalidSchema {
                table: self.name.clone(),
                reason: "table names must be 1-100 characters of [a-z0-9_-]".to_string(),
            }
            .into());
        }

        if self.fields.is_empty() {
            return Err(UsageError::InvalidSchema {
                table: self.name.clone(),
                reason: "a table needs at least one field".to_string(),
            }
            .into());
        }

        let capacity = limits.max_fields.saturating_sub(1);
        if self.fields.len() > capacity {
            return Err(CapacityError::TooManyFields {
                table: self.name.clone(),
                count: self.fields.len(),
                limit: capacity,
            }
            .into());
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            if field.name.is_empty() || field.name == ROW_FIELD {
                return Err(UsageError::InvalidSchema {
                    table: self.name.clone(),
                    reason: format!("field name {:?} is not allowed", field.name),
                }
                .into());
            }

            let size = field.name.chars().count();
            if size > limits.max_field_name_len {
                return Err(CapacityError::FieldNameTooLong {
                    table: self.name.clone(),
                    field: field.name.clone(),
                    size,
                    limit: limits.max_field_name_len,
                }
                .into());
            }

            if !seen.insert(field.name.as_str()) {
                return Err(UsageError::InvalidSchema {
                    table: self.name.clone(),
                    reason: format!("field {} is declared twice", field.name),
                }
                .into());
            }

            if let Some(default) = &field.default {
                if default.type_tag() != field.tag {
                    return Err(UsageError::InvalidSchema {
                        table: self.name.clone(),
                        reason: format!(
                            "default for {} is {}, field is {}",
                            field.name,
                            default.type_tag(),
                            field.tag
                        ),
                    }
                    .into());
                }
            }
        }

        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ChannelDbError;

    fn limits() -> SubstrateLimits {
        SubstrateLimits::default()
    }

    #[test]
    fn test_valid_schema() {
        let schema = TableSchema::new("user")
            .field("name", TypeTag::String)
            .field("age", TypeTag::Integer);
        assert!(schema.validate(&limits()).is_ok());
        assert_eq!(schema.tag_of("age"), Some(TypeTag::Integer));
        assert_eq!(schema.tag_of("missing"), None);
    }

    #[test]
    fn test_rejects_bad_table_names() {
        for name in ["", "User", "has space", "-leading"] {
            let schema = TableSchema::new(name).field("x", TypeTag::String);
            let err = schema.validate(&limits()).unwrap_err();
            assert!(
                matches!(err, ChannelDbError::Usage(UsageError::InvalidSchema { .. })),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_reserved_and_duplicate_fields() {
        let reserved = TableSchema::new("t").field(ROW_FIELD, TypeTag::String);
        assert!(reserved.validate(&limits()).is_err());

        let dup = TableSchema::new("t")
            .field("a", TypeTag::String)
            .field("a", TypeTag::Integer);
        assert!(dup.validate(&limits()).is_err());
    }

    #[test]
    fn test_too_many_fields_reserves_row_slot() {
        let mut limits = limits();
        limits.max_fields = 3;

        let ok = TableSchema::new("t")
            .field("a", TypeTag::String)
            .field("b", TypeTag::String);
        assert!(ok.validate(&limits).is_ok());

        let too_many = ok.clone().field("c", TypeTag::String);
        let err = too_many.validate(&limits).unwrap_err();
        assert_eq!(
            err,
            ChannelDbError::Capacity(CapacityError::TooManyFields {
                table: "t".to_string(),
                count: 3,
                limit: 2,
            })
        );
    }

    #[test]
    fn test_field_name_too_long() {
        let mut limits = limits();
        limits.max_field_name_len = 4;
        let schema = TableSchema::new("t").field("toolong", TypeTag::String);
        assert!(matches!(
            schema.validate(&limits),
            Err(ChannelDbError::Capacity(CapacityError::FieldNameTooLong { .. }))
        ));
    }

    #[test]
    fn test_default_must_match_tag() {
        let schema = TableSchema::new("t").field_with_default("n", TypeTag::Integer, "zero");
        assert!(schema.validate(&limits()).is_err());
    }
}
