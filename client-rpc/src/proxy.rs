//! Module proxies — `client.module("core").call("greet", payload)`.
//!
//! A [`ModuleProxy`] names a remote module; [`ModuleProxy::method`] binds a
//! method name to it. Neither checks that the module or method exists: the
//! broker answers unknown names with an error payload.

use std::sync::{Arc, Weak};

use frames::RemoteError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::ClientError;
use crate::client::Inner;

/// Proxy for one remote module. Cloning shares the same proxy.
#[derive(Clone)]
pub struct ModuleProxy {
    inner: Arc<ProxyInner>,
}

struct ProxyInner {
    name: String,
    client: Weak<Inner>,
}

impl ModuleProxy {
    pub(crate) fn new(name: &str, client: Weak<Inner>) -> Self {
        Self { inner: Arc::new(ProxyInner { name: name.to_owned(), client }) }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Bind `method` to this module.
    #[must_use]
    pub fn method(&self, method: impl Into<String>) -> RemoteMethod {
        RemoteMethod { proxy: self.clone(), method: method.into() }
    }

    /// Call `method` with a raw JSON payload.
    ///
    /// # Errors
    ///
    /// See [`BrokerClient::call`](crate::BrokerClient::call). `Closed` when the
    /// owning client has been dropped.
    pub async fn call(&self, method: &str, payload: Value) -> Result<Value, ClientError> {
        let client = self.inner.client.upgrade().ok_or(ClientError::Closed)?;
        client.call(&self.inner.name, method, payload).await
    }

    /// Call `method` with typed request and response bodies.
    ///
    /// An `{error, code}` response payload becomes [`ClientError::Remote`].
    ///
    /// # Errors
    ///
    /// Everything [`call`](Self::call) returns, plus `Payload` when either side
    /// fails to convert and `Remote` for broker-side failures.
    pub async fn call_typed<Req, Resp>(&self, method: &str, request: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_value(request)?;
        let response = self.call(method, payload).await?;
        if let Some(remote) = RemoteError::from_payload(&response) {
            return Err(remote.into());
        }
        Ok(serde_json::from_value(response)?)
    }

    /// True when both handles are the same cached proxy.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ModuleProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleProxy").field("name", &self.inner.name).finish()
    }
}

/// A method bound to its module, callable any number of times.
#[derive(Clone, Debug)]
pub struct RemoteMethod {
    proxy: ModuleProxy,
    method: String,
}

impl RemoteMethod {
    #[must_use]
    pub fn module(&self) -> &str {
        self.proxy.name()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.method
    }

    /// # Errors
    ///
    /// See [`ModuleProxy::call`].
    pub async fn call(&self, payload: Value) -> Result<Value, ClientError> {
        self.proxy.call(&self.method, payload).await
    }
}
