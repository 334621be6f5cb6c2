//! Module registry — named handler surfaces exposed to clients.
//!
//! DESIGN
//! ======
//! Two-level lookup: module name → [`Handler`], then method name →
//! [`Method`]. Nothing is known at compile time about which names exist;
//! the registry is filled at startup and read by every connection afterwards.
//!
//! Methods are type-erased async closures so modules with different payload
//! types live in the same map. [`MethodTable`] is the stock handler; anything
//! else that can resolve a method by name may implement [`Handler`] directly.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

// =============================================================================
// METHODS
// =============================================================================

/// Error returned by a method. Only its message text crosses the wire.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct MethodError {
    message: String,
}

impl MethodError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for MethodError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for MethodError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<serde_json::Error> for MethodError {
    fn from(err: serde_json::Error) -> Self {
        Self::new(err.to_string())
    }
}

/// Type-erased async method. Takes the request payload, yields the response
/// payload. Wrapped in `Arc` so dispatch can clone it into a spawned task.
pub type Method = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, MethodError>> + Send + Sync>;

/// An object exposing zero or more invokable methods by name.
pub trait Handler: Send + Sync {
    /// Resolve a callable by name. `None` when the method does not exist.
    fn method(&self, name: &str) -> Option<Method>;

    /// Names of every callable method, for diagnostics.
    fn method_names(&self) -> Vec<String>;
}

/// Handler backed by a name → closure map.
#[derive(Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, Method>,
}

impl MethodTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a method operating on raw JSON payloads.
    #[must_use]
    pub fn method<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, MethodError>> + Send + 'static,
    {
        let method: Method = Arc::new(move |payload: Value| -> BoxFuture<'static, Result<Value, MethodError>> {
            Box::pin(f(payload))
        });
        self.methods.insert(name.into(), method);
        self
    }

    /// Add a method with typed request and response payloads.
    ///
    /// A payload that does not deserialize into `Req` fails the call with an
    /// `invalid payload` error instead of reaching the closure.
    #[must_use]
    pub fn typed<F, Fut, Req, Resp>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Req) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<Resp, MethodError>> + Send + 'static,
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
    {
        self.method(name, move |payload: Value| {
            let f = f.clone();
            async move {
                let req: Req = serde_json::from_value(payload)
                    .map_err(|e| MethodError::new(format!("invalid payload: {e}")))?;
                let resp = f(req).await?;
                Ok(serde_json::to_value(resp)?)
            }
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.methods.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl Handler for MethodTable {
    fn method(&self, name: &str) -> Option<Method> {
        self.methods.get(name).cloned()
    }

    fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.keys().cloned().collect();
        names.sort();
        names
    }
}

// =============================================================================
// REGISTRY
// =============================================================================

/// A named handler surface.
#[derive(Clone)]
pub struct ModuleRecord {
    pub name: String,
    pub handler: Arc<dyn Handler>,
}

/// Process-wide map of module name → handler. Written at startup only.
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, ModuleRecord>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `name`. A second registration under the same
    /// name replaces the first.
    pub fn register(&mut self, name: impl Into<String>, handler: impl Handler + 'static) -> &mut Self {
        let name = name.into();
        let record = ModuleRecord { name: name.clone(), handler: Arc::new(handler) };
        if self.modules.insert(name.clone(), record).is_some() {
            warn!(module = %name, "registry: module replaced");
        }
        self
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ModuleRecord> {
        self.modules.get(name)
    }

    /// Registered module names, sorted.
    #[must_use]
    pub fn module_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.keys().cloned().collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
