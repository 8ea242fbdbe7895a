//! Encoder/Decoder between records and substrate entries.
//!
//! Field values are stored as their JSON text form, one structured field per
//! schema field, plus the hidden [`ROW_FIELD`] carrying identity and write
//! token. Everything here is synchronous; size limits are enforced before
//! any network call is made.

use channeldb_core::{
    CapacityError, ChannelDbResult, FieldValue, IntegrityError, QueryError, Record, RowTag,
    SubstrateLimits, TableSchema, TypeTag, UsageError, ROW_FIELD,
};
use channeldb_storage::{EntryField, EntryPayload, StoredEntry};
use std::collections::BTreeMap;

/// Schema fields of a record, validated and rendered, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFields(Vec<EntryField>);

impl EncodedFields {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Coerce `value` to `tag`. Integers widen to floats; nothing else converts.
pub(crate) fn conform(
    schema: &TableSchema,
    field: &str,
    tag: TypeTag,
    value: &FieldValue,
) -> ChannelDbResult<FieldValue> {
    match (tag, value) {
        (TypeTag::Float, FieldValue::Integer(i)) => Ok(FieldValue::Float(*i as f64)),
        (tag, value) if value.type_tag() == tag => Ok(value.clone()),
        (tag, value) => Err(QueryError::TypeMismatch {
            table: schema.name.clone(),
            field: field.to_string(),
            expected: tag.to_string(),
            got: value.type_tag().to_string(),
        }
        .into()),
    }
}

/// Check a record against its schema and the substrate limits, rendering
/// each field.
pub fn validate(
    schema: &TableSchema,
    record: &Record,
    limits: &SubstrateLimits,
) -> ChannelDbResult<EncodedFields> {
    if let Some(unknown) = record
        .values()
        .keys()
        .find(|name| schema.get_field(name).is_none())
    {
        return Err(QueryError::UnknownField {
            table: schema.name.clone(),
            field: unknown.clone(),
        }
        .into());
    }

    if schema.fields.len() + 1 > limits.max_fields {
        return Err(CapacityError::TooManyFields {
            table: schema.name.clone(),
            count: schema.fields.len(),
            limit: limits.max_fields.saturating_sub(1),
        }
        .into());
    }

    let mut rendered = Vec::with_capacity(schema.fields.len());
    for def in &schema.fields {
        let value = match record.get(&def.name).or(def.default.as_ref()) {
            Some(v) => conform(schema, &def.name, def.tag, v)?,
            None => {
                return Err(UsageError::MissingField {
                    table: schema.name.clone(),
                    field: def.name.clone(),
                }
                .into())
            }
        };

        let json = value.to_json().map_err(|e| QueryError::TypeMismatch {
            table: schema.name.clone(),
            field: def.name.clone(),
            expected: "finite float".to_string(),
            got: e.input,
        })?;
        let text = json.to_string();

        let size = text.chars().count();
        if size > limits.max_field_value_len {
            return Err(CapacityError::FieldTooLarge {
                table: schema.name.clone(),
                field: def.name.clone(),
                size,
                limit: limits.max_field_value_len,
            }
            .into());
        }

        rendered.push(EntryField {
            name: def.name.clone(),
            value: text,
        });
    }

    Ok(EncodedFields(rendered))
}

/// Assemble the entry for a record with its row tag.
pub fn encode(
    schema: &TableSchema,
    fields: EncodedFields,
    row: RowTag,
    limits: &SubstrateLimits,
) -> ChannelDbResult<EntryPayload> {
    let content = format!("{}#{}", schema.name, row.id);
    let size = content.chars().count();
    if size > limits.max_content_len {
        return Err(CapacityError::ContentTooLarge {
            table: schema.name.clone(),
            size,
            limit: limits.max_content_len,
        }
        .into());
    }

    let mut payload = EntryPayload {
        content,
        fields: fields.0,
    };
    payload.fields.push(EntryField {
        name: ROW_FIELD.to_string(),
        value: row.render().map_err(|e| IntegrityError::Decode {
            table: schema.name.clone(),
            field: ROW_FIELD.to_string(),
            reason: e.to_string(),
        })?,
    });
    Ok(payload)
}

/// Row tag of a stored entry, if it carries a well-formed one.
pub fn row_tag(payload: &EntryPayload) -> Option<RowTag> {
    payload.field(ROW_FIELD).and_then(RowTag::parse)
}

/// Rebuild a saved record from a stored entry.
pub fn decode(schema: &TableSchema, stored: &StoredEntry) -> ChannelDbResult<Record> {
    let decode_err = |field: &str, reason: String| IntegrityError::Decode {
        table: schema.name.clone(),
        field: field.to_string(),
        reason,
    };

    let row = row_tag(&stored.payload)
        .ok_or_else(|| decode_err(ROW_FIELD, "missing or malformed row tag".to_string()))?;

    let mut values = BTreeMap::new();
    for def in &schema.fields {
        let value = match stored.payload.field(&def.name) {
            Some(text) => {
                let json: serde_json::Value = serde_json::from_str(text)
                    .map_err(|e| decode_err(&def.name, e.to_string()))?;
                FieldValue::from_json(def.tag, &json)
                    .map_err(|e| decode_err(&def.name, e.to_string()))?
            }
            None => def
                .default
                .clone()
                .ok_or_else(|| decode_err(&def.name, "field is missing".to_string()))?,
        };
        values.insert(def.name.clone(), value);
    }

    Ok(Record::from_stored(
        schema.name.clone(),
        values,
        row.id,
        stored.entry,
    ))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use channeldb_core::{ChannelDbError, EntryRef, Identity, RecordId, WriteToken};

    fn user() -> TableSchema {
        TableSchema::new("user")
            .field("name", TypeTag::String)
            .field("age", TypeTag::Integer)
            .field("score", TypeTag::Float)
    }

    fn row(id: u64) -> RowTag {
        RowTag {
            id: RecordId(id),
            token: WriteToken::new(),
        }
    }

    #[test]
    fn test_encode_layout() {
        let limits = SubstrateLimits::default();
        let record = Record::new("user")
            .with("name", "Peter")
            .with("age", 30)
            .with("score", 1.5);
        let fields = validate(&user(), &record, &limits).unwrap();
        let tag = row(4);
        let payload = encode(&user(), fields, tag, &limits).unwrap();

        assert_eq!(payload.content, "user#4");
        assert_eq!(payload.field("name"), Some("\"Peter\""));
        assert_eq!(payload.field("age"), Some("30"));
        assert_eq!(payload.fields.last().unwrap().name, ROW_FIELD);
        assert_eq!(row_tag(&payload), Some(tag));
    }

    #[test]
    fn test_decode_restores_saved_record() {
        let limits = SubstrateLimits::default();
        let record = Record::new("user")
            .with("name", "Peter")
            .with("age", 30)
            .with("score", 2);
        let fields = validate(&user(), &record, &limits).unwrap();
        let payload = encode(&user(), fields, row(9), &limits).unwrap();
        let stored = StoredEntry {
            entry: EntryRef(77),
            payload,
        };

        let decoded = decode(&user(), &stored).unwrap();
        assert_eq!(decoded.identity(), Identity::Assigned(RecordId(9)));
        assert_eq!(decoded.location(), Some(EntryRef(77)));
        assert_eq!(decoded.get("score"), Some(&FieldValue::Float(2.0)));
    }

    #[test]
    fn test_field_too_large() {
        let mut limits = SubstrateLimits::default();
        limits.max_field_value_len = 8;
        let record = Record::new("user")
            .with("name", "a name that is far too long")
            .with("age", 1)
            .with("score", 0.0);
        let err = validate(&user(), &record, &limits).unwrap_err();
        assert!(matches!(
            err,
            ChannelDbError::Capacity(CapacityError::FieldTooLarge { ref field, .. }) if field == "name"
        ));
    }

    #[test]
    fn test_unknown_missing_and_mistyped_fields() {
        let limits = SubstrateLimits::default();
        let base = Record::new("user")
            .with("name", "x")
            .with("age", 1)
            .with("score", 0.5);

        let unknown = base.clone().with("email", "x@y");
        assert!(matches!(
            validate(&user(), &unknown, &limits),
            Err(ChannelDbError::Query(QueryError::UnknownField { .. }))
        ));

        let missing = Record::new("user").with("name", "x");
        assert!(matches!(
            validate(&user(), &missing, &limits),
            Err(ChannelDbError::Usage(UsageError::MissingField { .. }))
        ));

        let mistyped = base.clone().with("age", "old");
        assert!(matches!(
            validate(&user(), &mistyped, &limits),
            Err(ChannelDbError::Query(QueryError::TypeMismatch { .. }))
        ));

        let infinite = base.with("score", f64::INFINITY);
        assert!(validate(&user(), &infinite, &limits).is_err());
    }

    #[test]
    fn test_defaults_fill_missing_values() {
        let schema = TableSchema::new("flag")
            .field("name", TypeTag::String)
            .field_with_default("on", TypeTag::Boolean, false);
        let limits = SubstrateLimits::default();

        let fields = validate(&schema, &Record::new("flag").with("name", "a"), &limits).unwrap();
        assert_eq!(fields.len(), 2);

        // An entry written before "on" existed decodes with the default.
        let stored = StoredEntry {
            entry: EntryRef(1),
            payload: EntryPayload::new("flag#1")
                .with_field("name", "\"a\"")
                .with_field(ROW_FIELD, row(1).render().unwrap()),
        };
        let decoded = decode(&schema, &stored).unwrap();
        assert_eq!(decoded.get("on"), Some(&FieldValue::Boolean(false)));
    }

    #[test]
    fn test_decode_rejects_tampered_entries() {
        let schema = TableSchema::new("t").field("n", TypeTag::Integer);

        let no_row = StoredEntry {
            entry: EntryRef(1),
            payload: EntryPayload::new("t#1").with_field("n", "1"),
        };
        assert!(matches!(
            decode(&schema, &no_row),
            Err(ChannelDbError::Integrity(IntegrityError::Decode { ref field, .. })) if field == ROW_FIELD
        ));

        let wrong_type = StoredEntry {
            entry: EntryRef(1),
            payload: EntryPayload::new("t#1")
                .with_field("n", "\"one\"")
                .with_field(ROW_FIELD, row(1).render().unwrap()),
        };
        assert!(decode(&schema, &wrong_type).is_err());

        let garbled = StoredEntry {
            entry: EntryRef(1),
            payload: EntryPayload::new("t#1")
                .with_field("n", "{not json")
                .with_field(ROW_FIELD, row(1).render().unwrap()),
        };
        assert!(decode(&schema, &garbled).is_err());
    }
}
