//! Whitelist queries evaluated by linear scan.
//!
//! A query names the fields it constrains; every other field is
//! unconstrained. The substrate has no query language, so every lookup
//! pages through the whole container and filters client-side.

use crate::codec::{self, conform};
use crate::engine::TableEngine;
use channeldb_core::{ChannelDbResult, FieldValue, QueryError, Record, TableSchema, UsageError};
use std::fmt;

/// Field equality constraints, combined with AND.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    terms: Vec<(String, FieldValue)>,
}

impl Query {
    /// The empty query: matches every record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Require `field` to equal `value`.
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.terms.push((field.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn terms(&self) -> &[(String, FieldValue)] {
        &self.terms
    }

    /// Check fields and types against `schema`, widening integers where a
    /// float is declared.
    fn resolve(&self, schema: &TableSchema) -> ChannelDbResult<Vec<(String, FieldValue)>> {
        self.terms
            .iter()
            .map(|(field, value)| -> ChannelDbResult<(String, FieldValue)> {
                let tag = schema
                    .tag_of(field)
                    .ok_or_else(|| QueryError::UnknownField {
                        table: schema.name.clone(),
                        field: field.clone(),
                    })?;
                Ok((field.clone(), conform(schema, field, tag, value)?))
            })
            .collect()
    }
}

impl<K: Into<String>, V: Into<FieldValue>> FromIterator<(K, V)> for Query {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Query::all(), |query, (field, value)| query.filter(field, value))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (field, value)) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match value {
                FieldValue::String(s) => write!(f, "{}: {:?}", field, s)?,
                other => write!(f, "{}: {}", field, other)?,
            }
        }
        write!(f, "}}")
    }
}

// ============================================================================
// UNIQUE LOOKUP MODES
// ============================================================================

/// Result contract of a unique lookup.
pub trait UniqueMode {
    type Output;

    /// Whether the scan may stop at the first match.
    const FIRST_MATCH_ONLY: bool;

    fn select(table: &str, query: &Query, matches: Vec<Record>) -> ChannelDbResult<Self::Output>;
}

/// Exactly one match, or an error.
#[derive(Debug, Clone, Copy)]
pub struct Strict;

/// The first match, if any. Cardinality is never an error.
#[derive(Debug, Clone, Copy)]
pub struct Lenient;

impl UniqueMode for Strict {
    type Output = Record;
    const FIRST_MATCH_ONLY: bool = false;

    fn select(table: &str, query: &Query, mut matches: Vec<Record>) -> ChannelDbResult<Record> {
        match matches.len() {
            0 => Err(QueryError::NotFound {
                table: table.to_string(),
                query: query.to_string(),
            }
            .into()),
            1 => Ok(matches.remove(0)),
            count => Err(QueryError::MultipleResults {
                table: table.to_string(),
                query: query.to_string(),
                count,
            }
            .into()),
        }
    }
}

impl UniqueMode for Lenient {
    type Output = Option<Record>;
    const FIRST_MATCH_ONLY: bool = true;

    fn select(_: &str, _: &Query, matches: Vec<Record>) -> ChannelDbResult<Option<Record>> {
        Ok(matches.into_iter().next())
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

impl TableEngine {
    async fn scan_matching(
        &self,
        table: &str,
        query: &Query,
        first_only: bool,
    ) -> ChannelDbResult<Vec<Record>> {
        let (schema, container) = self.registry().container_of(table)?;
        let terms = query.resolve(&schema)?;

        let mut scan = self.dispatcher().scan(table, container);
        let mut matches = Vec::new();
        while let Some(entry) = scan.next().await? {
            let record = codec::decode(&schema, &entry)?;
            if terms.iter().all(|(field, value)| record.get(field) == Some(value)) {
                matches.push(record);
                if first_only {
                    break;
                }
            }
        }
        Ok(matches)
    }

    /// Every record matching `query`, in scan order. The empty query
    /// returns the whole table.
    pub async fn find(&self, table: &str, query: &Query) -> ChannelDbResult<Vec<Record>> {
        self.scan_matching(table, query, false).await
    }

    /// Look up a single record under the contract chosen by `M`.
    ///
    /// The query must constrain at least one field.
    pub async fn find_unique<M: UniqueMode>(
        &self,
        table: &str,
        query: &Query,
    ) -> ChannelDbResult<M::Output> {
        if query.is_empty() {
            return Err(UsageError::InvalidQuery {
                table: table.to_string(),
                reason: "a unique lookup needs at least one field".to_string(),
            }
            .into());
        }
        let matches = self.scan_matching(table, query, M::FIRST_MATCH_ONLY).await?;
        M::select(table, query, matches)
    }

    /// First record matching `query`, if any.
    pub async fn find_first(&self, table: &str, query: &Query) -> ChannelDbResult<Option<Record>> {
        self.find_unique::<Lenient>(table, query).await
    }

    pub async fn count(&self, table: &str, query: &Query) -> ChannelDbResult<usize> {
        Ok(self.find(table, query).await?.len())
    }
}

// =============================================================================
// TESTS
// =============================================================================
