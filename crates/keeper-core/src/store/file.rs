use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

use super::{
    DocumentStore, Document, Fields, IndexSpec, Query, StoreError, check_index, generate_id,
    next_server_millis, validate_collection,
};

const INDEX_MANIFEST: &str = "indexes.jsonl";

/// Document store kept in a data directory: one `<collection>.jsonl` file per
/// collection and an index manifest. Every write replaces the file atomically.
#[derive(Debug)]
pub struct FileStore {
    pub data_dir: PathBuf,
    pub index_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    #[instrument(skip(data_dir))]
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let data_dir = data_dir.to_path_buf();
        fs::create_dir_all(&data_dir).map_err(|source| StoreError::Io {
            path: data_dir.clone(),
            source,
        })?;

        let index_path = data_dir.join(INDEX_MANIFEST);
        if !index_path.exists() {
            fs::write(&index_path, "").map_err(|source| StoreError::Io {
                path: index_path.clone(),
                source,
            })?;
        }

        info!(
            data_dir = %data_dir.display(),
            indexes = %index_path.display(),
            "opened file store"
        );

        Ok(Self {
            data_dir,
            index_path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn collection_path(&self, collection: &str) -> PathBuf {
        self.data_dir.join(format!("{collection}.jsonl"))
    }

    fn load_collection(&self, collection: &str) -> Result<Vec<Document>, StoreError> {
        validate_collection(collection)?;
        let path = self.collection_path(collection);
        if !path.exists() {
            return Ok(vec![]);
        }
        load_jsonl(&path)
    }

    fn save_collection(&self, collection: &str, docs: &[Document]) -> Result<(), StoreError> {
        save_jsonl_atomic(&self.collection_path(collection), docs)
    }

    fn load_indexes(&self) -> Result<Vec<IndexSpec>, StoreError> {
        load_jsonl(&self.index_path)
    }

    fn not_found(collection: &str, id: &str) -> StoreError {
        StoreError::NotFound {
            collection: collection.to_string(),
            id: id.to_string(),
        }
    }
}

#[async_trait]
impl DocumentStore for FileStore {
    #[instrument(skip(self, fields))]
    async fn insert(
        &self,
        collection: &str,
        mut fields: Fields,
        server_timestamp: Option<&str>,
    ) -> Result<Document, StoreError> {
        let _guard = self.write_lock.lock();
        let mut docs = self.load_collection(collection)?;

        if let Some(field) = server_timestamp {
            let last = docs
                .iter()
                .filter_map(|doc| doc.fields.get(field).and_then(Value::as_i64))
                .max()
                .unwrap_or(0);
            fields.insert(field.to_string(), Value::from(next_server_millis(last)));
        }

        let doc = Document {
            id: generate_id(),
            fields,
        };
        docs.push(doc.clone());
        self.save_collection(collection, &docs)?;
        debug!(id = %doc.id, count = docs.len(), "inserted document");
        Ok(doc)
    }

    #[instrument(skip(self), fields(collection = %query.collection))]
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        check_index(&self.load_indexes()?, query)?;
        let docs = self.load_collection(&query.collection)?;
        let out = query.evaluate(&docs);
        debug!(scanned = docs.len(), count = out.len(), "query returned documents");
        Ok(out)
    }

    #[instrument(skip(self, fields))]
    async fn update_partial(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut docs = self.load_collection(collection)?;
        let doc = docs
            .iter_mut()
            .find(|doc| doc.id == id)
            .ok_or_else(|| Self::not_found(collection, id))?;
        doc.fields.extend(fields);
        self.save_collection(collection, &docs)
    }

    #[instrument(skip(self))]
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        let mut docs = self.load_collection(collection)?;
        let idx = docs
            .iter()
            .position(|doc| doc.id == id)
            .ok_or_else(|| Self::not_found(collection, id))?;
        docs.remove(idx);
        self.save_collection(collection, &docs)
    }

    #[instrument(skip(self), fields(index = %index))]
    async fn create_index(&self, index: IndexSpec) -> Result<bool, StoreError> {
        validate_collection(&index.collection)?;
        let _guard = self.write_lock.lock();
        let mut indexes = self.load_indexes()?;
        if indexes.contains(&index) {
            debug!("index already provisioned");
            return Ok(false);
        }
        indexes.push(index);
        save_jsonl_atomic(&self.index_path, &indexes)?;
        info!(count = indexes.len(), "provisioned index");
        Ok(true)
    }

    async fn indexes(&self, collection: &str) -> Result<Vec<IndexSpec>, StoreError> {
        Ok(self
            .load_indexes()?
            .into_iter()
            .filter(|index| index.collection == collection)
            .collect())
    }
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

#[instrument(skip(path))]
fn load_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    debug!(file = %path.display(), "loading jsonl");
    let file = fs::File::open(path).map_err(io_err(path))?;
    let reader = BufReader::new(file);

    let mut out = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.map_err(io_err(path))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let item = serde_json::from_str(trimmed).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            line: idx + 1,
            source,
        })?;
        out.push(item);
    }

    Ok(out)
}

#[instrument(skip(path, items))]
fn save_jsonl_atomic<T: Serialize>(path: &Path, items: &[T]) -> Result<(), StoreError> {
    debug!(file = %path.display(), count = items.len(), "saving jsonl atomically");

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    for item in items {
        let serialized = serde_json::to_string(item).map_err(|source| StoreError::Corrupt {
            path: path.to_path_buf(),
            line: 0,
            source,
        })?;
        writeln!(temp, "{serialized}").map_err(io_err(path))?;
    }
    temp.flush().map_err(io_err(path))?;

    temp.persist(path).map_err(|err| StoreError::Io {
        path: path.to_path_buf(),
        source: err.error,
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::store::Direction;

    fn fields(value: Value) -> Fields {
        let Value::Object(map) = value else {
            panic!("expected object");
        };
        map
    }

    #[tokio::test]
    async fn documents_survive_reopen() {
        let temp = tempdir().expect("tempdir");
        let id = {
            let store = FileStore::open(temp.path()).expect("open");
            store
                .insert("todos", fields(json!({ "ownerId": "u1" })), Some("createdAt"))
                .await
                .expect("insert")
                .id
        };

        let store = FileStore::open(temp.path()).expect("reopen");
        let docs = store.query(&Query::collection("todos")).await.expect("query");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, id);
        assert!(docs[0].fields["createdAt"].is_i64());
        assert!(store.collection_path("todos").exists());
    }

    #[tokio::test]
    async fn index_manifest_round_trips() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open");
        let query = Query::collection("todos")
            .where_eq("ownerId", "u1")
            .order_by("createdAt", Direction::Desc);

        assert!(store.query(&query).await.unwrap_err().is_missing_index());

        let index = query.required_index().expect("index");
        assert!(store.create_index(index.clone()).await.expect("create"));

        let reopened = FileStore::open(temp.path()).expect("reopen");
        assert_eq!(reopened.indexes("todos").await.expect("list"), vec![index]);
        assert!(reopened.query(&query).await.expect("query").is_empty());
    }

    #[tokio::test]
    async fn corrupt_line_reports_location() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open");
        fs::write(store.collection_path("todos"), "{\"id\":\"a\"}\nnot json\n").expect("write");

        let err = store.query(&Query::collection("todos")).await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { line: 2, .. }));
    }

    #[tokio::test]
    async fn deleting_unknown_id_fails() {
        let temp = tempdir().expect("tempdir");
        let store = FileStore::open(temp.path()).expect("open");
        let err = store.delete("todos", "nope").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
