use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{
    DocumentStore, Document, Fields, IndexSpec, Query, StoreError, check_index, generate_id,
    next_server_millis, validate_collection,
};

/// In-process document store. Clones share the same state.
///
/// Query results without an ordering come back in insertion order.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    collections: BTreeMap<String, Vec<Document>>,
    indexes: Vec<IndexSpec>,
    last_stamp: i64,
    calls: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(self, index: IndexSpec) -> Self {
        {
            let mut state = self.inner.lock();
            if !state.indexes.contains(&index) {
                state.indexes.push(index);
            }
        }
        self
    }

    /// Stores a document verbatim, bypassing id generation and timestamps.
    pub fn put_raw(&self, collection: &str, doc: Document) {
        let mut state = self.inner.lock();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(doc);
    }

    /// Number of store operations invoked so far (raw puts excluded).
    pub fn call_count(&self) -> usize {
        self.inner.lock().calls
    }

    pub fn len(&self, collection: &str) -> usize {
        self.inner
            .lock()
            .collections
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    #[instrument(skip(self, fields))]
    async fn insert(
        &self,
        collection: &str,
        mut fields: Fields,
        server_timestamp: Option<&str>,
    ) -> Result<Document, StoreError> {
        validate_collection(collection)?;
        let mut state = self.inner.lock();
        state.calls += 1;

        if let Some(field) = server_timestamp {
            let stamp = next_server_millis(state.last_stamp);
            state.last_stamp = stamp;
            fields.insert(field.to_string(), Value::from(stamp));
        }

        let doc = Document {
            id: generate_id(),
            fields,
        };
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(doc.clone());
        debug!(id = %doc.id, "inserted document");
        Ok(doc)
    }

    #[instrument(skip(self), fields(collection = %query.collection))]
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        validate_collection(&query.collection)?;
        let mut state = self.inner.lock();
        state.calls += 1;
        check_index(&state.indexes, query)?;

        let docs = state
            .collections
            .get(&query.collection)
            .map(|docs| query.evaluate(docs))
            .unwrap_or_default();
        debug!(count = docs.len(), "query returned documents");
        Ok(docs)
    }

    #[instrument(skip(self, fields))]
    async fn update_partial(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        state.calls += 1;

        let doc = state
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|doc| doc.id == id))
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        doc.fields.extend(fields);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let mut state = self.inner.lock();
        state.calls += 1;

        let docs = state.collections.get_mut(collection);
        let idx = docs
            .as_ref()
            .and_then(|docs| docs.iter().position(|doc| doc.id == id));
        match (docs, idx) {
            (Some(docs), Some(idx)) => {
                docs.remove(idx);
                Ok(())
            }
            _ => Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            }),
        }
    }

    #[instrument(skip(self), fields(index = %index))]
    async fn create_index(&self, index: IndexSpec) -> Result<bool, StoreError> {
        validate_collection(&index.collection)?;
        let mut state = self.inner.lock();
        state.calls += 1;
        if state.indexes.contains(&index) {
            return Ok(false);
        }
        state.indexes.push(index);
        Ok(true)
    }

    async fn indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError> {
        let mut state = self.inner.lock();
        state.calls += 1;
        Ok(state
            .indexes
            .iter()
            .filter(|index| index.collection == collection)
            .cloned()
            .collect())
    }
}
