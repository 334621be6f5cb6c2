//! Invoker — resolves a request against the registry and runs it.
//!
//! Every request produces exactly one response, correlated through
//! `request_id`. Resolution misses, method failures and method panics all
//! become the uniform `{error, code}` payload; none of them are transport
//! failures.

use frames::{ErrorCode, Message, error_payload};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::registry::{MethodError, ModuleRegistry};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Module {0} not found.")]
    ModuleNotFound(String),
    #[error("Method {module}.{method} not found.")]
    MethodNotFound { module: String, method: String },
    #[error("{0}")]
    Invocation(#[from] MethodError),
    #[error("Method {module}.{method} panicked.")]
    Panicked { module: String, method: String },
    #[error("Method {module}.{method} was aborted.")]
    Aborted { module: String, method: String },
}

impl ErrorCode for DispatchError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ModuleNotFound(_) => "E_MODULE_NOT_FOUND",
            Self::MethodNotFound { .. } => "E_METHOD_NOT_FOUND",
            Self::Invocation(_) => "E_INVOCATION_FAILED",
            Self::Panicked { .. } => "E_INVOCATION_PANICKED",
            Self::Aborted { .. } => "E_INVOCATION_ABORTED",
        }
    }
}

/// Handle one request and build its response.
pub async fn dispatch(registry: &ModuleRegistry, request: &Message) -> Message {
    log_listener_calls(request);

    let payload = match invoke(registry, request).await {
        Ok(value) => value,
        Err(err) => {
            warn!(id = %request.id, module = %request.target, method = request.method_name(), error = %err, "invoke: call failed");
            error_payload(&err)
        }
    };
    request.response(payload)
}

/// Resolve `(target, method)` and run the method with the request payload.
///
/// The method runs in its own task so a panic inside it is caught and
/// reported instead of tearing down the connection.
///
/// # Errors
///
/// Returns a [`DispatchError`] describing the resolution or invocation failure.
pub async fn invoke(registry: &ModuleRegistry, request: &Message) -> Result<Value, DispatchError> {
    let module = request.target.as_str();
    let method_name = request.method_name();

    let Some(record) = registry.get(module) else {
        return Err(DispatchError::ModuleNotFound(module.to_owned()));
    };
    let Some(method) = record.handler.method(method_name) else {
        return Err(DispatchError::MethodNotFound { module: module.to_owned(), method: method_name.to_owned() });
    };

    debug!(id = %request.id, module, method = method_name, "invoke: start");
    let payload = request.payload.clone();
    match tokio::spawn(async move { method(payload).await }).await {
        Ok(result) => Ok(result?),
        Err(join) if join.is_panic() => {
            Err(DispatchError::Panicked { module: module.to_owned(), method: method_name.to_owned() })
        }
        Err(_) => Err(DispatchError::Aborted { module: module.to_owned(), method: method_name.to_owned() }),
    }
}

/// Listener management is not implemented by the broker; these names are
/// logged and then dispatched like any other method.
fn log_listener_calls(request: &Message) {
    match request.method_name() {
        "on" | "addEventListener" => {
            info!(module = %request.target, payload = %request.payload, "invoke: adding event listener");
        }
        "off" | "removeEventListener" => {
            info!(module = %request.target, payload = %request.payload, "invoke: removing event listener");
        }
        _ => {}
    }
}

#[cfg(test)]
#[path = "invoker_test.rs"]
mod tests;
