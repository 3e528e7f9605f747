use std::cmp::Reverse;
use std::fmt;
use std::str::FromStr;

use deunicode::deunicode;
use serde::{
  Deserialize,
  Serialize
};
use tracing::trace;

use crate::todo::{
  ParseVariantError,
  Priority,
  Todo
};

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
  #[default]
  All,
  Active,
  Completed
}

impl StatusFilter {
  pub fn as_str(self) -> &'static str {
    match self {
      | StatusFilter::All => "all",
      | StatusFilter::Active => "active",
      | StatusFilter::Completed => {
        "completed"
      }
    }
  }

  fn keeps(self, todo: &Todo) -> bool {
    match self {
      | StatusFilter::All => true,
      | StatusFilter::Active => {
        !todo.completed
      }
      | StatusFilter::Completed => {
        todo.completed
      }
    }
  }
}

impl FromStr for StatusFilter {
  type Err = ParseVariantError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "all" => Ok(StatusFilter::All),
      | "active" | "pending" => {
        Ok(StatusFilter::Active)
      }
      | "completed" | "done" => {
        Ok(StatusFilter::Completed)
      }
      | _ => {
        Err(ParseVariantError::new(
          "status filter",
          s
        ))
      }
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PriorityFilter {
  #[default]
  All,
  Low,
  Medium,
  High
}

impl PriorityFilter {
  pub fn priority(
    self
  ) -> Option<Priority> {
    match self {
      | PriorityFilter::All => None,
      | PriorityFilter::Low => {
        Some(Priority::Low)
      }
      | PriorityFilter::Medium => {
        Some(Priority::Medium)
      }
      | PriorityFilter::High => {
        Some(Priority::High)
      }
    }
  }

  pub fn as_str(self) -> &'static str {
    self
      .priority()
      .map(Priority::as_str)
      .unwrap_or("all")
  }

  fn keeps(self, todo: &Todo) -> bool {
    self
      .priority()
      .is_none_or(|p| todo.priority == p)
  }
}

impl From<Priority> for PriorityFilter {
  fn from(priority: Priority) -> Self {
    match priority {
      | Priority::Low => {
        PriorityFilter::Low
      }
      | Priority::Medium => {
        PriorityFilter::Medium
      }
      | Priority::High => {
        PriorityFilter::High
      }
    }
  }
}

impl FromStr for PriorityFilter {
  type Err = ParseVariantError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    if s.trim().eq_ignore_ascii_case("all")
    {
      return Ok(PriorityFilter::All);
    }
    s.parse::<Priority>()
      .map(PriorityFilter::from)
      .map_err(|_| {
        ParseVariantError::new(
          "priority filter",
          s
        )
      })
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum SortOrder {
  #[default]
  Newest,
  Oldest,
  Priority,
  Alphabetical,
  DueDate
}

impl SortOrder {
  pub fn as_str(self) -> &'static str {
    match self {
      | SortOrder::Newest => "newest",
      | SortOrder::Oldest => "oldest",
      | SortOrder::Priority => {
        "priority"
      }
      | SortOrder::Alphabetical => {
        "alphabetical"
      }
      | SortOrder::DueDate => "dueDate"
    }
  }
}

impl FromStr for SortOrder {
  type Err = ParseVariantError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    match s
      .trim()
      .to_ascii_lowercase()
      .as_str()
    {
      | "newest" => Ok(SortOrder::Newest),
      | "oldest" => Ok(SortOrder::Oldest),
      | "priority" => {
        Ok(SortOrder::Priority)
      }
      | "alphabetical" | "alpha" => {
        Ok(SortOrder::Alphabetical)
      }
      | "duedate" | "due-date"
      | "due_date" | "due" => {
        Ok(SortOrder::DueDate)
      }
      | _ => {
        Err(ParseVariantError::new(
          "sort order",
          s
        ))
      }
    }
  }
}

macro_rules! display_as_str {
  ($($ty:ty),+) => {
    $(impl fmt::Display for $ty {
      fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
      }
    })+
  };
}

display_as_str!(
  StatusFilter,
  PriorityFilter,
  SortOrder
);

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct ViewParams {
  pub status:   StatusFilter,
  pub priority: PriorityFilter,
  pub sort:     SortOrder
}

impl ViewParams {
  pub fn parse(
    status: &str,
    priority: &str,
    sort: &str
  ) -> Result<Self, ParseVariantError> {
    Ok(Self {
      status:   status.parse()?,
      priority: priority.parse()?,
      sort:     sort.parse()?
    })
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct PriorityCounts {
  pub low:    usize,
  pub medium: usize,
  pub high:   usize
}

impl PriorityCounts {
  pub fn get(
    &self,
    priority: Priority
  ) -> usize {
    match priority {
      | Priority::Low => self.low,
      | Priority::Medium => self.medium,
      | Priority::High => self.high
    }
  }
}

#[derive(
  Debug,
  Clone,
  Copy,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct TodoStats {
  pub total:          usize,
  pub completed:      usize,
  pub active:         usize,
  pub completion_pct: u8,
  pub by_priority:    PriorityCounts
}

#[derive(
  Debug,
  Clone,
  Default,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
)]
pub struct ReconciledView {
  pub visible: Vec<Todo>,
  pub stats:   TodoStats,
  pub params:  ViewParams
}

impl ReconciledView {
  /// "3 active tasks", "5 total tasks".
  pub fn summary_label(&self) -> String {
    let kind = match self.params.status {
      | StatusFilter::All => "total",
      | StatusFilter::Active => "active",
      | StatusFilter::Completed => {
        "completed"
      }
    };
    format!(
      "{} {kind} tasks",
      self.visible.len()
    )
  }

  /// Nothing visible although todos exist.
  pub fn filtered_out_everything(
    &self
  ) -> bool {
    self.visible.is_empty()
      && self.stats.total > 0
  }
}

pub fn reconcile(
  todos: &[Todo],
  status: StatusFilter,
  priority: PriorityFilter,
  sort: SortOrder
) -> ReconciledView {
  reconcile_view(
    todos,
    ViewParams {
      status,
      priority,
      sort
    }
  )
}

#[tracing::instrument(skip(todos), fields(count = todos.len()))]
pub fn reconcile_view(
  todos: &[Todo],
  params: ViewParams
) -> ReconciledView {
  let mut visible: Vec<Todo> = todos
    .iter()
    .filter(|todo| {
      params.status.keeps(todo)
        && params.priority.keeps(todo)
    })
    .cloned()
    .collect();

  sort_todos(&mut visible, params.sort);
  trace!(
    visible = visible.len(),
    "reconciled view"
  );

  ReconciledView {
    visible,
    stats: compute_stats(todos),
    params
  }
}

/// Stable sort; equal keys keep their input order.
pub fn sort_todos(
  todos: &mut [Todo],
  order: SortOrder
) {
  match order {
    | SortOrder::Newest => {
      todos.sort_by_key(|t| {
        Reverse(t.created_millis())
      })
    }
    | SortOrder::Oldest => {
      todos.sort_by_key(|t| {
        t.created_millis()
      })
    }
    | SortOrder::Priority => {
      todos.sort_by_key(|t| {
        t.priority.rank()
      })
    }
    | SortOrder::Alphabetical => {
      todos.sort_by_cached_key(|t| {
        collation_key(&t.text)
      })
    }
    | SortOrder::DueDate => {
      todos.sort_by_key(|t| {
        (t.due_date.is_none(), t.due_date)
      })
    }
  }
}

/// Accent- and case-insensitive key approximating locale collation.
fn collation_key(text: &str) -> String {
  deunicode(text).to_lowercase()
}

pub fn compute_stats(
  todos: &[Todo]
) -> TodoStats {
  let total = todos.len();
  let completed = todos
    .iter()
    .filter(|t| t.completed)
    .count();

  let mut by_priority =
    PriorityCounts::default();
  for todo in todos {
    match todo.priority {
      | Priority::Low => {
        by_priority.low += 1
      }
      | Priority::Medium => {
        by_priority.medium += 1
      }
      | Priority::High => {
        by_priority.high += 1
      }
    }
  }

  let completion_pct = if total == 0 {
    0
  } else {
    ((completed as f64 / total as f64)
      * 100.0)
      .round() as u8
  };

  TodoStats {
    total,
    completed,
    active: total - completed,
    completion_pct,
    by_priority
  }
}
