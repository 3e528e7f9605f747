//! Operator advisories: notices that something should be fixed out of band
//! while the operation itself still succeeded.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::store::IndexSpec;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// A list query ran in degraded mode because this index is missing.
    MissingIndex { index: IndexSpec },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Advisory::MissingIndex { index } => write!(
                f,
                "optimized queries require the composite index {index}; \
                 using a simplified query for now"
            ),
        }
    }
}

pub trait AdvisorySink: Send + Sync {
    fn notify(&self, advisory: Advisory);
}

/// Forwards advisories to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAdvisories;

impl AdvisorySink for TracingAdvisories {
    fn notify(&self, advisory: Advisory) {
        info!(%advisory, "advisory");
    }
}

/// Collects advisories so a front end can show them after an operation.
#[derive(Debug, Clone, Default)]
pub struct AdvisoryLog {
    entries: Arc<Mutex<Vec<Advisory>>>,
}

impl AdvisoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Advisory> {
        std::mem::take(&mut *self.entries.lock())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl AdvisorySink for AdvisoryLog {
    fn notify(&self, advisory: Advisory) {
        self.entries.lock().push(advisory);
    }
}
