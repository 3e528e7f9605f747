use anyhow::anyhow;
use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::reconcile::{
    PriorityFilter, ReconciledView, StatusFilter, ViewParams, reconcile_view,
};
use crate::repository::{RepoError, TodoRepository};
use crate::store::DocumentStore;
use crate::todo::{NewTodo, OwnerId, Priority, Todo, TodoId};

/// One owner's todo list as a front end sees it.
///
/// Every intent goes to the repository and is followed by a full refetch, so
/// `view()` always reflects the store rather than locally patched state.
/// Blank text on add or edit is a no-op, not an error.
pub struct TodoBoard<S> {
    repo: TodoRepository<S>,
    owner: OwnerId,
    params: ViewParams,
    todos: Vec<Todo>,
    view: ReconciledView,
}

impl<S: DocumentStore> TodoBoard<S> {
    pub fn new(repo: TodoRepository<S>, owner: OwnerId) -> Self {
        Self {
            repo,
            owner,
            params: ViewParams::default(),
            todos: vec![],
            view: ReconciledView::default(),
        }
    }

    pub fn with_params(mut self, params: ViewParams) -> Self {
        self.params = params;
        self.recompute();
        self
    }

    pub fn owner(&self) -> &OwnerId {
        &self.owner
    }

    pub fn repository(&self) -> &TodoRepository<S> {
        &self.repo
    }

    pub fn params(&self) -> ViewParams {
        self.params
    }

    /// Last fetched todos, newest first.
    pub fn todos(&self) -> &[Todo] {
        &self.todos
    }

    pub fn view(&self) -> &ReconciledView {
        &self.view
    }

    #[instrument(skip(self), fields(owner = %self.owner))]
    pub async fn refresh(&mut self) -> Result<&ReconciledView, RepoError> {
        self.todos = self.repo.list(&self.owner).await?;
        self.recompute();
        debug!(count = self.todos.len(), "board refreshed");
        Ok(&self.view)
    }

    pub async fn list_todos(&mut self) -> Result<&[Todo], RepoError> {
        self.refresh().await?;
        Ok(&self.todos)
    }

    pub fn set_view(&mut self, params: ViewParams) -> &ReconciledView {
        self.params = params;
        self.recompute();
        &self.view
    }

    /// Resets the status and priority filters; the sort order stays.
    pub fn clear_filters(&mut self) -> &ReconciledView {
        self.set_view(ViewParams {
            status: StatusFilter::All,
            priority: PriorityFilter::All,
            sort: self.params.sort,
        })
    }

    #[instrument(skip(self, new), fields(owner = %self.owner))]
    pub async fn add_todo(&mut self, new: NewTodo) -> Result<Option<Todo>, RepoError> {
        match self.repo.create(&self.owner, new).await {
            Ok(todo) => {
                self.refresh().await?;
                Ok(Some(todo))
            }
            Err(err) if err.is_validation() => {
                debug!(error = %err, "add ignored");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn set_completed(&mut self, id: &TodoId, completed: bool) -> Result<(), RepoError> {
        self.repo.set_completed(id, completed).await?;
        self.refresh().await?;
        Ok(())
    }

    /// Returns false when the text was blank and nothing was sent.
    pub async fn set_text(&mut self, id: &TodoId, text: &str) -> Result<bool, RepoError> {
        match self.repo.set_text(id, text).await {
            Ok(()) => {
                self.refresh().await?;
                Ok(true)
            }
            Err(err) if err.is_validation() => {
                debug!(id = %id, "edit ignored: blank text");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn set_priority(&mut self, id: &TodoId, priority: Priority) -> Result<(), RepoError> {
        self.repo.set_priority(id, priority).await?;
        self.refresh().await?;
        Ok(())
    }

    pub async fn set_due_date(
        &mut self,
        id: &TodoId,
        due: Option<DateTime<Utc>>,
    ) -> Result<(), RepoError> {
        self.repo.set_due_date(id, due).await?;
        self.refresh().await?;
        Ok(())
    }

    pub async fn remove_todo(&mut self, id: &TodoId) -> Result<(), RepoError> {
        self.repo.remove(id).await?;
        self.refresh().await?;
        Ok(())
    }

    /// Resolves a full id or a unique id prefix against the last snapshot.
    pub fn resolve_id(&self, prefix: &str) -> anyhow::Result<TodoId> {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            return Err(anyhow!("todo id must not be empty"));
        }
        if let Some(exact) = self.todos.iter().find(|t| t.id.as_str() == prefix) {
            return Ok(exact.id.clone());
        }

        let mut matches = self
            .todos
            .iter()
            .filter(|t| t.id.as_str().starts_with(prefix));
        let first = matches
            .next()
            .ok_or_else(|| anyhow!("no todo matches id {prefix}"))?;
        if matches.next().is_some() {
            return Err(anyhow!("todo id {prefix} is ambiguous"));
        }
        Ok(first.id.clone())
    }

    pub fn find(&self, id: &TodoId) -> Option<&Todo> {
        self.todos.iter().find(|t| &t.id == id)
    }

    fn recompute(&mut self) {
        self.view = reconcile_view(&self.todos, self.params);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::advisory::AdvisoryLog;
    use crate::reconcile::SortOrder;
    use crate::store::MemoryStore;

    fn board(store: &MemoryStore) -> TodoBoard<MemoryStore> {
        let repo = TodoRepository::new(store.clone()).with_advisories(Arc::new(AdvisoryLog::new()));
        TodoBoard::new(repo, OwnerId::new("u1"))
    }

    #[tokio::test]
    async fn mutations_refetch_and_recompute() {
        let store = MemoryStore::new();
        let mut board = board(&store);

        let milk = board
            .add_todo(NewTodo::new("milk").with_priority(Priority::High))
            .await
            .unwrap()
            .expect("created");
        board.add_todo(NewTodo::new("bread")).await.unwrap();
        assert_eq!(board.view().stats.total, 2);

        board.set_completed(&milk.id, true).await.unwrap();
        assert_eq!(board.view().stats.completed, 1);
        assert_eq!(board.view().stats.completion_pct, 50);

        board.set_view(ViewParams {
            status: StatusFilter::Active,
            ..ViewParams::default()
        });
        let visible: Vec<&str> = board.view().visible.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(visible, ["bread"]);

        board.remove_todo(&milk.id).await.unwrap();
        assert_eq!(board.view().stats.total, 1);
        assert!(board.find(&milk.id).is_none());
    }

    #[tokio::test]
    async fn blank_intents_are_noops() {
        let store = MemoryStore::new();
        let mut board = board(&store);

        assert!(board.add_todo(NewTodo::new("   ")).await.unwrap().is_none());
        assert!(!board.set_text(&TodoId::new("x"), "").await.unwrap());
        assert_eq!(store.call_count(), 0);
    }

    #[tokio::test]
    async fn clear_filters_keeps_sort() {
        let store = MemoryStore::new();
        let mut board = board(&store).with_params(ViewParams {
            status: StatusFilter::Completed,
            priority: PriorityFilter::Low,
            sort: SortOrder::Alphabetical,
        });

        board.clear_filters();
        assert_eq!(
            board.params(),
            ViewParams {
                status: StatusFilter::All,
                priority: PriorityFilter::All,
                sort: SortOrder::Alphabetical,
            }
        );
    }

    #[tokio::test]
    async fn resolves_unique_prefixes() {
        let store = MemoryStore::new();
        let mut board = board(&store);
        let todo = board
            .add_todo(NewTodo::new("one"))
            .await
            .unwrap()
            .expect("created");

        let id = todo.id.as_str();
        assert_eq!(board.resolve_id(id).unwrap(), todo.id);
        assert_eq!(board.resolve_id(&id[..6]).unwrap(), todo.id);
        assert!(board.resolve_id("zzzz-not-an-id").is_err());
        assert!(board.resolve_id(" ").is_err());
    }

    #[tokio::test]
    async fn missing_record_errors_propagate() {
        let store = MemoryStore::new();
        let mut board = board(&store);
        let err = board
            .set_priority(&TodoId::new("ghost"), Priority::Low)
            .await
            .unwrap_err();
        assert!(err.store_error().is_some_and(|e| e.is_not_found()));
    }
}
