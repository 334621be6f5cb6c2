//! Demo `core` module served by the broker binary.

use serde_json::{Value, json};
use server::{MethodError, MethodTable};

pub const MODULE_NAME: &str = "core";

/// `greet` answers `"hello"`, `echo` returns its payload, `time` returns the
/// server clock in epoch milliseconds, `fail` always errors (with the payload
/// string as the message when one is given).
pub fn module() -> MethodTable {
    MethodTable::new()
        .method("greet", |_payload| async { Ok(json!("hello")) })
        .method("echo", |payload| async move { Ok(payload) })
        .method("time", |_payload| async { Ok(json!(frames::now_ms())) })
        .method("fail", |payload: Value| async move {
            let message = payload.as_str().unwrap_or("boom").to_owned();
            Err(MethodError::new(message))
        })
}

#[cfg(test)]
#[path = "demo_test.rs"]
mod tests;
