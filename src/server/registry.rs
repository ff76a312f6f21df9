//! Handler registry.
//!
//! Maps method names to handlers for inbound requests and notifications.
//! Populated once through [`HandlerRegistryBuilder`], then read-only for the
//! life of the connection.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

use crate::lsp::capabilities::ServerCapabilities;
use crate::rpc::error::HandlerError;

use super::peer::Peer;

/// Boxed future returned by handlers.
pub type HandlerFuture<T> = Pin<Box<dyn Future<Output = Result<T, HandlerError>> + Send + 'static>>;

/// Handles one inbound request method.
pub trait RequestHandler: Send + Sync + 'static {
    fn call(&self, params: Option<Value>, peer: Peer) -> HandlerFuture<Value>;
}

/// Handles one inbound notification method.
pub trait NotificationHandler: Send + Sync + 'static {
    fn call(&self, params: Option<Value>, peer: Peer) -> HandlerFuture<()>;
}

struct FnRequestHandler<F>(F);

impl<F, Fut> RequestHandler for FnRequestHandler<F>
where
    F: Fn(Option<Value>, Peer) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    fn call(&self, params: Option<Value>, peer: Peer) -> HandlerFuture<Value> {
        Box::pin((self.0)(params, peer))
    }
}

struct FnNotificationHandler<F>(F);

impl<F, Fut> NotificationHandler for FnNotificationHandler<F>
where
    F: Fn(Option<Value>, Peer) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    fn call(&self, params: Option<Value>, peer: Peer) -> HandlerFuture<()> {
        Box::pin((self.0)(params, peer))
    }
}

/// Deserialize handler params, mapping failure to `InvalidParams`.
///
/// Absent params are treated as `null`, so `Option<T>` and `()` accept them.
///
/// # Errors
///
/// `HandlerError::InvalidParams` if the params do not match `P`.
pub fn decode_params<P: DeserializeOwned>(params: Option<Value>) -> Result<P, HandlerError> {
    serde_json::from_value(params.unwrap_or(Value::Null)).map_err(HandlerError::invalid_params)
}

/// Static method-name-to-handler table plus the declared capabilities.
pub struct HandlerRegistry {
    requests: HashMap<String, Arc<dyn RequestHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
    capabilities: ServerCapabilities,
}

impl HandlerRegistry {
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    pub fn request_handler(&self, method: &str) -> Option<Arc<dyn RequestHandler>> {
        self.requests.get(method).cloned()
    }

    pub fn notification_handler(&self, method: &str) -> Option<Arc<dyn NotificationHandler>> {
        self.notifications.get(method).cloned()
    }

    /// Capabilities declared in the `initialize` result.
    pub fn capabilities(&self) -> &ServerCapabilities {
        &self.capabilities
    }

    /// Registered request method names, sorted.
    pub fn request_methods(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.requests.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        HandlerRegistryBuilder::default().build()
    }
}

/// Builder for [`HandlerRegistry`].
///
/// # Example
///
/// ```ignore
/// let registry = HandlerRegistry::builder()
///     .on_request("textDocument/hover", |params, _peer| async move {
///         Ok(json!({"contents": "MgO rock salt"}))
///     })
///     .on_notification("textDocument/didOpen", |params, peer| async move {
///         peer.publish_diagnostics(uri, vec![]).await?;
///         Ok(())
///     })
///     .build();
/// ```
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    requests: HashMap<String, Arc<dyn RequestHandler>>,
    notifications: HashMap<String, Arc<dyn NotificationHandler>>,
    capabilities: Option<ServerCapabilities>,
}

impl HandlerRegistryBuilder {
    /// Register a request handler from a closure over raw params.
    pub fn on_request<F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Value>, Peer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.request_handler(method, Arc::new(FnRequestHandler(handler)))
    }

    /// Register a request handler whose params and result are typed.
    ///
    /// Params that fail to deserialize into `P` produce `InvalidParams`
    /// without calling the handler.
    pub fn on_request_typed<P, R, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        R: Serialize + Send + 'static,
        F: Fn(P, Peer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, HandlerError>> + Send + 'static,
    {
        self.on_request(method, move |params: Option<Value>, peer: Peer| {
            let call = decode_params::<P>(params).map(|p| handler(p, peer));
            async move {
                let result = call?.await?;
                serde_json::to_value(result).map_err(|e| HandlerError::Internal(e.into()))
            }
        })
    }

    /// Register a notification handler from a closure over raw params.
    pub fn on_notification<F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Option<Value>, Peer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.notification_handler(method, Arc::new(FnNotificationHandler(handler)))
    }

    /// Register a notification handler whose params are typed.
    pub fn on_notification_typed<P, F, Fut>(self, method: impl Into<String>, handler: F) -> Self
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, Peer) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.on_notification(method, move |params: Option<Value>, peer: Peer| {
            let call = decode_params::<P>(params).map(|p| handler(p, peer));
            async move { call?.await }
        })
    }

    /// Register an existing request handler object.
    pub fn request_handler(
        mut self,
        method: impl Into<String>,
        handler: Arc<dyn RequestHandler>,
    ) -> Self {
        let method = method.into();
        if self.requests.insert(method.clone(), handler).is_some() {
            warn!("Replacing request handler for {}", method);
        }
        self
    }

    /// Register an existing notification handler object.
    pub fn notification_handler(
        mut self,
        method: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) -> Self {
        let method = method.into();
        if self.notifications.insert(method.clone(), handler).is_some() {
            warn!("Replacing notification handler for {}", method);
        }
        self
    }

    /// Declare capabilities explicitly instead of deriving them.
    pub fn capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    pub fn build(self) -> HandlerRegistry {
        let capabilities = self.capabilities.unwrap_or_else(|| {
            ServerCapabilities::derive_from(
                self.requests
                    .keys()
                    .chain(self.notifications.keys())
                    .map(String::as_str),
            )
        });

        HandlerRegistry {
            requests: self.requests,
            notifications: self.notifications,
            capabilities,
        }
    }
}
