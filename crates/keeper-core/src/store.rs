//! Document store collaborator.
//!
//! The store is a flat collection of JSON documents keyed by generated ids.
//! It answers equality-filtered queries, optionally ordered by one numeric
//! field. Combining a filter with an ordering needs a provisioned composite
//! index, and the store reports [`StoreError::MissingIndex`] when that index
//! is absent.

pub mod file;
pub mod memory;

use std::cmp::Reverse;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::datetime::from_millis;

pub use file::FileStore;
pub use memory::MemoryStore;

pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub fields: Fields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Asc => f.write_str("asc"),
            Direction::Desc => f.write_str("desc"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: vec![],
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    /// Same filters, no store-side ordering.
    pub fn unordered(&self) -> Self {
        Self {
            collection: self.collection.clone(),
            filters: self.filters.clone(),
            order_by: None,
        }
    }

    /// The composite index this query needs, if any.
    pub fn required_index(&self) -> Option<IndexSpec> {
        let order = self.order_by.as_ref()?;
        if self.filters.is_empty() {
            return None;
        }
        Some(IndexSpec::new(
            &self.collection,
            self.filters.iter().map(|f| f.field.as_str()),
            &order.field,
            order.direction,
        ))
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.filters
            .iter()
            .all(|filter| doc.fields.get(&filter.field) == Some(&filter.value))
    }

    /// Filters and orders `docs`. Ordering is stable and ranks a missing or
    /// non-numeric order field as the smallest value.
    pub fn evaluate<'a, I>(&self, docs: I) -> Vec<Document>
    where
        I: IntoIterator<Item = &'a Document>,
    {
        let mut out: Vec<Document> = docs
            .into_iter()
            .filter(|doc| self.matches(doc))
            .cloned()
            .collect();

        if let Some(order) = &self.order_by {
            let key = |doc: &Document| numeric_key(doc.fields.get(&order.field));
            match order.direction {
                Direction::Asc => out.sort_by_key(key),
                Direction::Desc => out.sort_by_key(|doc| Reverse(key(doc))),
            }
        }

        out
    }
}

/// Order fields hold epoch millis; anything that is not a representable
/// timestamp ranks with the missing values.
fn numeric_key(value: Option<&Value>) -> i64 {
    value
        .and_then(Value::as_i64)
        .filter(|millis| from_millis(*millis).is_some())
        .unwrap_or(i64::MIN)
}

/// Composite index: equality fields plus one ordered field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub collection: String,
    pub equality_fields: Vec<String>,
    pub order_field: String,
    pub direction: Direction,
}

impl IndexSpec {
    pub fn new<'a, I>(collection: &str, equality_fields: I, order_field: &str, direction: Direction) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut equality_fields: Vec<String> =
            equality_fields.into_iter().map(str::to_string).collect();
        equality_fields.sort();
        equality_fields.dedup();
        Self {
            collection: collection.to_string(),
            equality_fields,
            order_field: order_field.to_string(),
            direction,
        }
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.collection)?;
        for field in &self.equality_fields {
            write!(f, "{field} ==, ")?;
        }
        write!(f, "{} {})", self.order_field, self.direction)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("query requires composite index {index}")]
    MissingIndex { index: IndexSpec },

    #[error("document {id} not found in {collection}")]
    NotFound { collection: String, id: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("document {id} is malformed: {reason}")]
    Malformed { id: String, reason: String },

    #[error("failed parsing {} line {line}", path.display())]
    Corrupt {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("i/o error on {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn is_missing_index(&self) -> bool {
        matches!(self, StoreError::MissingIndex { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a document under a generated id. When `server_timestamp`
    /// names a field, the store writes its own creation time there.
    async fn insert(
        &self,
        collection: &str,
        fields: Fields,
        server_timestamp: Option<&str>,
    ) -> Result<Document, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Merges `fields` into an existing document.
    async fn update_partial(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError>;

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Provisions a composite index. Returns false if it already existed.
    async fn create_index(&self, index: IndexSpec) -> Result<bool, StoreError>;

    async fn indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError>;
}

pub(crate) fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Next server timestamp in epoch millis, strictly after `last`.
pub(crate) fn next_server_millis(last: i64) -> i64 {
    Utc::now().timestamp_millis().max(last.saturating_add(1))
}

pub(crate) fn check_index(indexes: &[IndexSpec], query: &Query) -> Result<(), StoreError> {
    match query.required_index() {
        Some(index) if !indexes.contains(&index) => Err(StoreError::MissingIndex { index }),
        _ => Ok(()),
    }
}

pub(crate) fn validate_collection(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidQuery(format!(
            "invalid collection name: {name:?}"
        )))
    }
}
