use std::cmp::Reverse;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use crate::advisory::{Advisory, AdvisorySink, TracingAdvisories};
use crate::store::{Direction, Document, DocumentStore, IndexSpec, Query, StoreError};
use crate::todo::{
    FIELD_CREATED_AT, FIELD_OWNER, FieldUpdate, NewTodo, OwnerId, Priority, Todo, TodoId,
};

pub const DEFAULT_COLLECTION: &str = "todos";

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("todo text must not be empty")]
    EmptyText,

    #[error("failed to {op} todo")]
    Store {
        op: &'static str,
        #[source]
        source: StoreError,
    },
}

impl RepoError {
    pub fn is_validation(&self) -> bool {
        matches!(self, RepoError::EmptyText)
    }

    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            RepoError::Store { source, .. } => Some(source),
            RepoError::EmptyText => None,
        }
    }
}

fn store_err(op: &'static str) -> impl FnOnce(StoreError) -> RepoError {
    move |source| RepoError::Store { op, source }
}

fn validated_text(raw: &str) -> Result<String, RepoError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(RepoError::EmptyText);
    }
    Ok(trimmed.to_string())
}

/// Owner-scoped todo operations over a [`DocumentStore`].
///
/// `list` asks the store for the owner's todos newest first. That query needs
/// a composite index; when the store reports it missing, the repository
/// re-runs the query unordered, sorts client-side and raises an
/// [`Advisory::MissingIndex`] instead of failing.
pub struct TodoRepository<S> {
    store: S,
    collection: String,
    advisories: Arc<dyn AdvisorySink>,
    index_warned: AtomicBool,
}

impl<S: DocumentStore> TodoRepository<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            collection: DEFAULT_COLLECTION.to_string(),
            advisories: Arc::new(TracingAdvisories),
            index_warned: AtomicBool::new(false),
        }
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_advisories(mut self, sink: Arc<dyn AdvisorySink>) -> Self {
        self.advisories = sink;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn list_query(&self, owner: &OwnerId) -> Query {
        Query::collection(&self.collection)
            .where_eq(FIELD_OWNER, owner.as_str())
            .order_by(FIELD_CREATED_AT, Direction::Desc)
    }

    /// The composite index `list` runs against when it is provisioned.
    pub fn required_index(&self) -> IndexSpec {
        IndexSpec::new(
            &self.collection,
            [FIELD_OWNER],
            FIELD_CREATED_AT,
            Direction::Desc,
        )
    }

    #[instrument(skip(self), fields(collection = %self.collection))]
    pub async fn provision_index(&self) -> Result<bool, RepoError> {
        let created = self
            .store
            .create_index(self.required_index())
            .await
            .map_err(store_err("index"))?;
        info!(created, "list index provisioned");
        Ok(created)
    }

    #[instrument(skip(self, new), fields(owner = %owner, priority = %new.priority))]
    pub async fn create(&self, owner: &OwnerId, new: NewTodo) -> Result<Todo, RepoError> {
        let text = validated_text(&new.text)?;
        let fields = new.to_fields(owner, &text);
        let doc = self
            .store
            .insert(&self.collection, fields, Some(FIELD_CREATED_AT))
            .await
            .map_err(store_err("create"))?;
        let todo = Todo::from_document(doc).map_err(store_err("create"))?;
        info!(id = %todo.id, "created todo");
        Ok(todo)
    }

    #[instrument(skip(self), fields(owner = %owner))]
    pub async fn list(&self, owner: &OwnerId) -> Result<Vec<Todo>, RepoError> {
        let query = self.list_query(owner);
        match self.store.query(&query).await {
            Ok(docs) => {
                let todos = decode_all(docs)?;
                debug!(count = todos.len(), "listed todos");
                Ok(todos)
            }
            Err(StoreError::MissingIndex { index }) => self.list_degraded(&query, index).await,
            Err(err) => Err(store_err("list")(err)),
        }
    }

    async fn list_degraded(&self, query: &Query, index: IndexSpec) -> Result<Vec<Todo>, RepoError> {
        if !self.index_warned.swap(true, Ordering::Relaxed) {
            warn!(%index, "composite index missing; falling back to unordered query");
        } else {
            debug!(%index, "composite index still missing; using unordered query");
        }
        self.advisories.notify(Advisory::MissingIndex { index });

        let docs = self
            .store
            .query(&query.unordered())
            .await
            .map_err(store_err("list"))?;
        let mut todos = decode_all(docs)?;
        todos.sort_by_key(|todo| Reverse(todo.created_at));
        debug!(count = todos.len(), "listed todos via fallback");
        Ok(todos)
    }

    #[instrument(skip(self, update), fields(id = %id, field = update.field_name()))]
    pub async fn update_field(&self, id: &TodoId, update: FieldUpdate) -> Result<(), RepoError> {
        let update = match update {
            FieldUpdate::Text(text) => FieldUpdate::Text(validated_text(&text)?),
            other => other,
        };
        self.store
            .update_partial(&self.collection, id.as_str(), update.to_fields())
            .await
            .map_err(store_err("update"))?;
        debug!("updated todo field");
        Ok(())
    }

    pub async fn set_completed(&self, id: &TodoId, completed: bool) -> Result<(), RepoError> {
        self.update_field(id, FieldUpdate::Completed(completed)).await
    }

    pub async fn set_text(&self, id: &TodoId, text: &str) -> Result<(), RepoError> {
        self.update_field(id, FieldUpdate::Text(text.to_string()))
            .await
    }

    pub async fn set_priority(&self, id: &TodoId, priority: Priority) -> Result<(), RepoError> {
        self.update_field(id, FieldUpdate::Priority(priority)).await
    }

    pub async fn set_due_date(
        &self,
        id: &TodoId,
        due: Option<DateTime<Utc>>,
    ) -> Result<(), RepoError> {
        self.update_field(id, FieldUpdate::DueDate(due)).await
    }

    #[instrument(skip(self), fields(id = %id))]
    pub async fn remove(&self, id: &TodoId) -> Result<(), RepoError> {
        self.store
            .delete(&self.collection, id.as_str())
            .await
            .map_err(store_err("delete"))?;
        info!("deleted todo");
        Ok(())
    }
}

fn decode_all(docs: Vec<Document>) -> Result<Vec<Todo>, RepoError> {
    docs.into_iter()
        .map(Todo::from_document)
        .collect::<Result<Vec<_>, _>>()
        .map_err(store_err("list"))
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::advisory::AdvisoryLog;
    use crate::store::{Fields, MemoryStore};

    fn owner() -> OwnerId {
        OwnerId::new("u1")
    }

    struct DeniedStore;

    #[async_trait]
    impl DocumentStore for DeniedStore {
        async fn insert(&self, _: &str, _: Fields, _: Option<&str>) -> Result<Document, StoreError> {
            Err(StoreError::PermissionDenied("insert".into()))
        }

        async fn query(&self, _: &Query) -> Result<Vec<Document>, StoreError> {
            Err(StoreError::PermissionDenied("query".into()))
        }

        async fn update_partial(&self, _: &str, _: &str, _: Fields) -> Result<(), StoreError> {
            Err(StoreError::PermissionDenied("update".into()))
        }

        async fn delete(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::PermissionDenied("delete".into()))
        }

        async fn create_index(&self, _: IndexSpec) -> Result<bool, StoreError> {
            Err(StoreError::PermissionDenied("index".into()))
        }

        async fn indexes(&self, _: &str) -> Result<Vec<IndexSpec>, StoreError> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn blank_text_never_reaches_the_store() {
        let store = MemoryStore::new();
        let repo = TodoRepository::new(store.clone());

        for text in ["", "   ", "\t\n"] {
            let err = repo.create(&owner(), NewTodo::new(text)).await.unwrap_err();
            assert!(err.is_validation());
        }
        let err = repo
            .set_text(&TodoId::new("anything"), "  ")
            .await
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn create_trims_and_applies_defaults() {
        let repo = TodoRepository::new(MemoryStore::new());
        let todo = repo
            .create(&owner(), NewTodo::new("  buy milk  "))
            .await
            .unwrap();

        assert_eq!(todo.text, "buy milk");
        assert!(!todo.completed);
        assert_eq!(todo.priority, Priority::Medium);
        assert_eq!(todo.owner_id, owner());
        assert!(todo.created_at.is_some());
        assert!(todo.due_date.is_none());
    }

    #[tokio::test]
    async fn missing_index_falls_back_with_one_advisory() {
        let store = MemoryStore::new();
        let advisories = AdvisoryLog::new();
        let repo = TodoRepository::new(store.clone()).with_advisories(Arc::new(advisories.clone()));

        let first = repo.create(&owner(), NewTodo::new("first")).await.unwrap();
        let second = repo.create(&owner(), NewTodo::new("second")).await.unwrap();
        repo.create(&OwnerId::new("someone-else"), NewTodo::new("theirs"))
            .await
            .unwrap();

        let degraded = repo.list(&owner()).await.unwrap();
        assert_eq!(
            degraded.iter().map(|t| t.id.clone()).collect::<Vec<_>>(),
            vec![second.id.clone(), first.id.clone()]
        );
        let raised = advisories.drain();
        assert_eq!(
            raised,
            vec![Advisory::MissingIndex {
                index: repo.required_index()
            }]
        );

        assert!(repo.provision_index().await.unwrap());
        let indexed = repo.list(&owner()).await.unwrap();
        assert_eq!(indexed, degraded);
        assert!(advisories.is_empty());
    }

    #[tokio::test]
    async fn fallback_sorts_missing_timestamp_last() {
        let store = MemoryStore::new();
        let put = |id: &str, created: Option<i64>| {
            let mut value = json!({ "text": id, "ownerId": "u1" });
            if let Some(ts) = created {
                value["createdAt"] = json!(ts);
            }
            let Value::Object(fields) = value else {
                unreachable!()
            };
            store.put_raw(
                DEFAULT_COLLECTION,
                Document {
                    id: id.to_string(),
                    fields,
                },
            );
        };
        put("c", None);
        put("a", Some(100));
        put("b", Some(200));
        put("d", Some(i64::MAX));

        let repo = TodoRepository::new(store.clone()).with_advisories(Arc::new(AdvisoryLog::new()));
        let degraded: Vec<String> = repo
            .list(&owner())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(degraded, vec!["b", "a", "c", "d"]);

        repo.provision_index().await.unwrap();
        let ordered: Vec<String> = repo
            .list(&owner())
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.text)
            .collect();
        assert_eq!(ordered, degraded);
    }

    #[tokio::test]
    async fn other_store_failures_propagate() {
        let advisories = AdvisoryLog::new();
        let repo = TodoRepository::new(DeniedStore).with_advisories(Arc::new(advisories.clone()));

        let err = repo.list(&owner()).await.unwrap_err();
        assert!(matches!(
            err.store_error(),
            Some(StoreError::PermissionDenied(_))
        ));
        assert!(advisories.is_empty());

        let err = repo.set_completed(&TodoId::new("x"), true).await.unwrap_err();
        assert!(!err.is_validation());
        assert_eq!(err.to_string(), "failed to update todo");
    }

    #[tokio::test]
    async fn removing_unknown_id_is_an_error() {
        let repo = TodoRepository::new(MemoryStore::new());
        let err = repo.remove(&TodoId::new("ghost")).await.unwrap_err();
        assert!(err.store_error().is_some_and(StoreError::is_not_found));
    }

    #[tokio::test]
    async fn field_updates_change_only_their_field() {
        let repo = TodoRepository::new(MemoryStore::new());
        let todo = repo
            .create(
                &owner(),
                NewTodo::new("draft memo").with_priority(Priority::Low),
            )
            .await
            .unwrap();

        repo.set_completed(&todo.id, true).await.unwrap();
        repo.set_priority(&todo.id, Priority::High).await.unwrap();
        repo.set_text(&todo.id, " final memo ").await.unwrap();

        let listed = repo.list(&owner()).await.unwrap();
        let stored = &listed[0];
        assert!(stored.completed);
        assert_eq!(stored.priority, Priority::High);
        assert_eq!(stored.text, "final memo");
        assert_eq!(stored.created_at, todo.created_at);
        assert_eq!(stored.owner_id, todo.owner_id);
    }
}
