use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::datetime::{from_millis, to_millis};
use crate::store::{Document, Fields, StoreError};

pub const FIELD_TEXT: &str = "text";
pub const FIELD_COMPLETED: &str = "completed";
pub const FIELD_OWNER: &str = "ownerId";
pub const FIELD_CREATED_AT: &str = "createdAt";
pub const FIELD_PRIORITY: &str = "priority";
pub const FIELD_DUE_DATE: &str = "dueDate";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TodoId(String);

impl TodoId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TodoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raised when a textual enum value (priority, filter, sort order) is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} `{value}`")]
pub struct ParseVariantError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseVariantError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Sort rank: high first.
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseVariantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "l" | "low" => Ok(Priority::Low),
            "m" | "med" | "medium" => Ok(Priority::Medium),
            "h" | "high" => Ok(Priority::High),
            _ => Err(ParseVariantError::new("priority", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Todo {
    pub id: TodoId,
    pub text: String,
    pub completed: bool,
    pub owner_id: OwnerId,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

impl Todo {
    /// Creation time in epoch milliseconds, with a missing stamp counted as 0.
    pub fn created_millis(&self) -> i64 {
        self.created_at.map(to_millis).unwrap_or(0)
    }

    #[tracing::instrument(skip(doc), fields(id = %doc.id))]
    pub fn from_document(doc: Document) -> Result<Self, StoreError> {
        let Document { id, fields } = doc;

        let text = required_str(&fields, FIELD_TEXT, &id)?;
        let owner_id = required_str(&fields, FIELD_OWNER, &id)?;
        let completed = fields
            .get(FIELD_COMPLETED)
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let priority = match fields.get(FIELD_PRIORITY).and_then(Value::as_str) {
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!(id = %id, priority = raw, "unknown stored priority; using medium");
                Priority::Medium
            }),
            None => Priority::Medium,
        };

        Ok(Self {
            id: TodoId::new(id),
            text,
            completed,
            owner_id: OwnerId::new(owner_id),
            created_at: timestamp_field(&fields, FIELD_CREATED_AT),
            priority,
            due_date: timestamp_field(&fields, FIELD_DUE_DATE),
        })
    }
}

/// Client-supplied part of a new todo. The store supplies id and creation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewTodo {
    pub text: String,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub due_date: Option<DateTime<Utc>>,
}

impl NewTodo {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_due_date(mut self, due: Option<DateTime<Utc>>) -> Self {
        self.due_date = due;
        self
    }

    /// Field map for insertion; `createdAt` is left for the store to stamp.
    pub fn to_fields(&self, owner: &OwnerId, text: &str) -> Fields {
        let mut fields = Map::new();
        fields.insert(FIELD_TEXT.to_string(), Value::from(text));
        fields.insert(FIELD_COMPLETED.to_string(), Value::Bool(false));
        fields.insert(FIELD_OWNER.to_string(), Value::from(owner.as_str()));
        fields.insert(FIELD_PRIORITY.to_string(), Value::from(self.priority.as_str()));
        fields.insert(FIELD_DUE_DATE.to_string(), timestamp_value(self.due_date));
        fields
    }
}

/// A single-field change. Each variant touches exactly one stored field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    Completed(bool),
    Text(String),
    Priority(Priority),
    DueDate(Option<DateTime<Utc>>),
}

impl FieldUpdate {
    pub fn field_name(&self) -> &'static str {
        match self {
            FieldUpdate::Completed(_) => FIELD_COMPLETED,
            FieldUpdate::Text(_) => FIELD_TEXT,
            FieldUpdate::Priority(_) => FIELD_PRIORITY,
            FieldUpdate::DueDate(_) => FIELD_DUE_DATE,
        }
    }

    pub fn to_fields(&self) -> Fields {
        let value = match self {
            FieldUpdate::Completed(done) => Value::Bool(*done),
            FieldUpdate::Text(text) => Value::from(text.as_str()),
            FieldUpdate::Priority(priority) => Value::from(priority.as_str()),
            FieldUpdate::DueDate(due) => timestamp_value(*due),
        };
        let mut fields = Map::new();
        fields.insert(self.field_name().to_string(), value);
        fields
    }
}

fn required_str(fields: &Fields, key: &str, id: &str) -> Result<String, StoreError> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StoreError::Malformed {
            id: id.to_string(),
            reason: format!("missing string field `{key}`"),
        })
}

fn timestamp_field(fields: &Fields, key: &str) -> Option<DateTime<Utc>> {
    fields.get(key).and_then(Value::as_i64).and_then(from_millis)
}

fn timestamp_value(ts: Option<DateTime<Utc>>) -> Value {
    ts.map(|dt| Value::from(to_millis(dt))).unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;

    fn doc(value: serde_json::Value) -> Document {
        let Value::Object(fields) = value else {
            panic!("expected object");
        };
        Document {
            id: "abc".to_string(),
            fields,
        }
    }

    #[test]
    fn decodes_defaults_for_missing_fields() {
        let todo = Todo::from_document(doc(json!({
            "text": "water plants",
            "ownerId": "u1"
        })))
        .expect("decode");

        assert_eq!(todo.id.as_str(), "abc");
        assert!(!todo.completed);
        assert_eq!(todo.priority, Priority::Medium);
        assert_eq!(todo.created_at, None);
        assert_eq!(todo.due_date, None);
        assert_eq!(todo.created_millis(), 0);
    }

    #[test]
    fn decodes_timestamps_and_priority() {
        let todo = Todo::from_document(doc(json!({
            "text": "file taxes",
            "ownerId": "u1",
            "completed": true,
            "priority": "high",
            "createdAt": 1_700_000_000_000_i64,
            "dueDate": null
        })))
        .expect("decode");

        assert!(todo.completed);
        assert_eq!(todo.priority, Priority::High);
        assert_eq!(
            todo.created_at,
            Some(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
        );
        assert_eq!(todo.due_date, None);
    }

    #[test]
    fn unknown_priority_falls_back_to_medium() {
        let todo = Todo::from_document(doc(json!({
            "text": "x",
            "ownerId": "u1",
            "priority": "urgent"
        })))
        .expect("decode");
        assert_eq!(todo.priority, Priority::Medium);
    }

    #[test]
    fn missing_text_is_malformed() {
        let err = Todo::from_document(doc(json!({ "ownerId": "u1" }))).unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[test]
    fn field_update_touches_one_field() {
        let fields = FieldUpdate::DueDate(None).to_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields.get(FIELD_DUE_DATE), Some(&Value::Null));

        let fields = FieldUpdate::Priority(Priority::Low).to_fields();
        assert_eq!(fields.get(FIELD_PRIORITY), Some(&json!("low")));
    }

    #[test]
    fn priority_parses_short_forms() {
        assert_eq!("H".parse::<Priority>().unwrap(), Priority::High);
        assert_eq!("med".parse::<Priority>().unwrap(), Priority::Medium);
        assert!("urgent".parse::<Priority>().is_err());
    }
}
