//! Occurrence filters
//!
//! Filters decide whether an occurrence is reported at all. `pre_process`
//! runs before assembly on the raw call arguments; `post_process` runs on
//! the finished occurrence. Returning `true` drops it.

use crate::error_report::ErrorReport;
use crate::types::{Level, Occurrence};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;

pub trait Filter: Send + Sync {
    fn pre_process(
        &self,
        _level: Level,
        _error: Option<&ErrorReport>,
        _custom: Option<&Map<String, Value>>,
        _message: Option<&str>,
    ) -> bool {
        false
    }

    fn post_process(&self, _data: &Occurrence) -> bool {
        false
    }
}

/// Drops occurrences below a minimum level.
#[derive(Debug, Clone, Copy)]
pub struct MinimumLevel(pub Level);

impl Filter for MinimumLevel {
    fn pre_process(
        &self,
        level: Level,
        _error: Option<&ErrorReport>,
        _custom: Option<&Map<String, Value>>,
        _message: Option<&str>,
    ) -> bool {
        level < self.0
    }
}

/// Runs filters in order; the first one to drop wins.
#[derive(Clone, Default)]
pub struct FilterPipeline {
    filters: Vec<Arc<dyn Filter>>,
}

impl FilterPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filter: impl Filter + 'static) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    pub fn push(&mut self, filter: Arc<dyn Filter>) {
        self.filters.push(filter);
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Filter for FilterPipeline {
    fn pre_process(
        &self,
        level: Level,
        error: Option<&ErrorReport>,
        custom: Option<&Map<String, Value>>,
        message: Option<&str>,
    ) -> bool {
        self.filters
            .iter()
            .any(|f| f.pre_process(level, error, custom, message))
    }

    fn post_process(&self, data: &Occurrence) -> bool {
        self.filters.iter().any(|f| f.post_process(data))
    }
}

impl fmt::Debug for FilterPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterPipeline")
            .field("filters", &self.filters.len())
            .finish()
    }
}
