//! Job handler registration and dispatch.
//!
//! Replaces a dynamic `job_type -> trait object` const registry with a
//! typed table: handlers are `async fn(Value) -> Result<Value, EngineError>`
//! closures keyed by the job type they accept, resolved once per job by
//! the worker pool.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::error::EngineError;

/// A handler's future, boxed so the registry can hold handlers of
/// differing concrete future types behind one trait object.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<Value, EngineError>> + Send>>;

/// The contract a job handler must satisfy: take the job's payload,
/// return a JSON result or an [`EngineError`]. Implementations must be
/// safely re-runnable, since a reclaimed job is redelivered at least
/// once.
pub trait JobHandler: Send + Sync {
    fn call(&self, payload: Value) -> HandlerFuture;
}

impl<F, Fut> JobHandler for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, EngineError>> + Send + 'static,
{
    fn call(&self, payload: Value) -> HandlerFuture {
        Box::pin(self(payload))
    }
}

/// A table mapping `job_type` to the handler that executes it.
///
/// Cloning a registry is cheap — handlers are reference-counted, so the
/// same table can be shared across every worker lane.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `job_type`, replacing any previous
    /// registration for the same type.
    pub fn register(&mut self, job_type: impl Into<String>, handler: impl JobHandler + 'static) -> &mut Self {
        self.handlers.insert(job_type.into(), Arc::new(handler));
        self
    }

    /// Resolves the handler for `job_type`, if one is registered.
    #[must_use]
    pub fn resolve(&self, job_type: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(job_type).cloned()
    }

    /// Invokes the handler registered for `job_type`, or a synthetic
    /// `UnregisteredJobType` failure if none is.
    pub async fn dispatch(&self, job_type: &str, payload: Value) -> Result<Value, EngineError> {
        match self.resolve(job_type) {
            Some(handler) => handler.call(payload).await,
            None => Err(EngineError::UnregisteredJobType(job_type.to_string())),
        }
    }

    /// The set of job types this registry knows how to execute.
    #[must_use]
    pub fn registered_types(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn dispatches_to_registered_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", |payload: Value| async move { Ok(payload) });

        let result = registry.dispatch("echo", json!({"n": 1})).await.unwrap();
        assert_eq!(result, json!({"n": 1}));
    }

    #[tokio::test]
    async fn unregistered_job_type_raises_synthetic_failure() {
        let registry = HandlerRegistry::new();
        let err = registry.dispatch("nope", json!(null)).await.unwrap_err();
        assert!(matches!(err, EngineError::UnregisteredJobType(ref t) if t == "nope"));
    }

    #[tokio::test]
    async fn handler_failure_propagates() {
        let mut registry = HandlerRegistry::new();
        registry.register("always_fails", |_: Value| async move {
            Err(EngineError::HandlerFailed("boom".to_string()))
        });

        let err = registry.dispatch("always_fails", json!(null)).await.unwrap_err();
        assert!(matches!(err, EngineError::HandlerFailed(_)));
    }

    #[test]
    fn registered_types_lists_every_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register("a", |p: Value| async move { Ok(p) });
        registry.register("b", |p: Value| async move { Ok(p) });

        let mut types = registry.registered_types();
        types.sort_unstable();
        assert_eq!(types, vec!["a", "b"]);
    }
}
