//! Execution options threaded through every `start`/`body`/`end` call and
//! through the executor's scheduling loop: a typed concurrency mode plus
//! an open `extra` bag for task-specific parameters.

use std::collections::HashMap;
use std::sync::Arc;

/// How the executor should bound concurrency across task/sentinel
/// vertices. Identifier vertices are always free (never gated).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// One vertex at a time, in topological order.
    Sequential,
    /// At most `N` task/sentinel vertices executing simultaneously.
    Bounded(usize),
    /// No bound beyond what the DAG's topology already enforces.
    Unbounded,
}

/// Options passed to `Task::start`/`body`/`end` and to `Executor::run`.
///
/// Cheap to clone: `extra` is `Arc`-shared, so cloning `ExecOptions` for
/// each vertex invocation does not copy task-supplied parameters.
#[derive(Debug, Clone)]
pub struct ExecOptions {
    concurrency: Concurrency,
    extra: Arc<HashMap<String, String>>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            concurrency: Concurrency::Unbounded,
            extra: Arc::new(HashMap::new()),
        }
    }
}

impl ExecOptions {
    pub fn sequential() -> Self {
        Self {
            concurrency: Concurrency::Sequential,
            ..Self::default()
        }
    }

    pub fn max_active_run(n: usize) -> Self {
        Self {
            concurrency: Concurrency::Bounded(n),
            ..Self::default()
        }
    }

    pub fn concurrency(&self) -> Concurrency {
        self.concurrency
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.extra).insert(key.into(), value.into());
        self
    }

    pub fn extra(&self, key: &str) -> Option<&str> {
        self.extra.get(key).map(String::as_str)
    }
}
