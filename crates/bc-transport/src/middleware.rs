//! Ordered request transforms
//!
//! Each stage takes a [`RequestDescriptor`] and returns the one the next
//! stage sees. A stage that returns an error aborts the call before any
//! network I/O.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::descriptor::RequestDescriptor;
use crate::error::Result;

/// A single request transform.
///
/// Object-safe so stages of different types can share one pipeline.
pub trait Middleware: Send + Sync {
    /// Stage name for logging.
    fn name(&self) -> &str;

    fn apply(&self, request: RequestDescriptor) -> Result<RequestDescriptor>;
}

/// Adapter that turns a closure into a [`Middleware`].
pub struct FnMiddleware<F> {
    name: String,
    f: F,
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(RequestDescriptor) -> Result<RequestDescriptor> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, request: RequestDescriptor) -> Result<RequestDescriptor> {
        (self.f)(request)
    }
}

/// Wrap a closure as a named stage.
pub fn from_fn<F>(name: impl Into<String>, f: F) -> FnMiddleware<F>
where
    F: Fn(RequestDescriptor) -> Result<RequestDescriptor> + Send + Sync,
{
    FnMiddleware {
        name: name.into(),
        f,
    }
}

/// Stages applied in registration order.
#[derive(Clone, Default)]
pub struct MiddlewarePipeline {
    stages: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for MiddlewarePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl MiddlewarePipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage. Stages run in the order they were added.
    pub fn with(mut self, stage: impl Middleware + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    pub fn push(&mut self, stage: Arc<dyn Middleware>) {
        self.stages.push(stage);
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage; the first error stops the chain.
    pub fn apply(&self, mut request: RequestDescriptor) -> Result<RequestDescriptor> {
        for stage in &self.stages {
            request = stage.apply(request)?;
            debug!(stage = stage.name(), "middleware applied");
        }
        Ok(request)
    }
}
