//! Payload handler trait.
//!
//! A [`PayloadHandler<P>`] receives every payload of type `P` the client
//! decodes. Handlers for the same type run concurrently and independently:
//! a failing or panicking handler never affects its siblings.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;

use crate::client::ClientId;

/// Context handed to each handler invocation.
#[derive(Debug, Clone)]
pub struct DispatchContext {
    client_id: ClientId,
    payload_type: &'static str,
    cancel: CancellationToken,
}

impl DispatchContext {
    /// Create a context.
    pub fn new(client_id: ClientId, payload_type: &'static str, cancel: CancellationToken) -> Self {
        Self {
            client_id,
            payload_type,
            cancel,
        }
    }

    /// Id of the client that received the payload.
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    /// Rust type name of the payload.
    pub fn payload_type(&self) -> &'static str {
        self.payload_type
    }

    /// Token cancelled when the client stops.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Whether the client is stopping.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Handles payloads of type `P`.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use census_stream::{DispatchContext, Heartbeat, PayloadHandler};
///
/// struct LogHeartbeats;
///
/// impl PayloadHandler<Heartbeat> for LogHeartbeats {
///     async fn handle(&self, _ctx: DispatchContext, heartbeat: Arc<Heartbeat>) -> anyhow::Result<()> {
///         println!("{} endpoints reported", heartbeat.online.len());
///         Ok(())
///     }
/// }
/// ```
pub trait PayloadHandler<P>: Send + Sync + 'static
where
    P: Send + Sync + 'static,
{
    /// Handle one payload.
    ///
    /// Errors are logged by the dispatcher together with their cause chain
    /// and reported in the dispatch outcome.
    fn handle(
        &self,
        ctx: DispatchContext,
        payload: Arc<P>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send;
}

/// A closure-based handler.
///
/// ```
/// use census_stream::{DispatchContext, FnHandler, HandlerRegistry, ServiceMessage};
///
/// let mut handlers = HandlerRegistry::new();
/// handlers.register::<ServiceMessage<serde_json::Value>, _>(FnHandler::new(
///     |_ctx: DispatchContext, message: std::sync::Arc<ServiceMessage<serde_json::Value>>| async move {
///         println!("{}", message.payload);
///         anyhow::Ok(())
///     },
/// ));
/// ```
pub struct FnHandler<F, P, Fut>
where
    F: Fn(DispatchContext, Arc<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    P: Send + Sync + 'static,
{
    func: F,
    _phantom: PhantomData<fn(P) -> Fut>,
}

impl<F, P, Fut> FnHandler<F, P, Fut>
where
    F: Fn(DispatchContext, Arc<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    P: Send + Sync + 'static,
{
    /// Wrap a closure.
    pub const fn new(func: F) -> Self {
        Self {
            func,
            _phantom: PhantomData,
        }
    }
}

impl<F, P, Fut> PayloadHandler<P> for FnHandler<F, P, Fut>
where
    F: Fn(DispatchContext, Arc<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    P: Send + Sync + 'static,
{
    fn handle(
        &self,
        ctx: DispatchContext,
        payload: Arc<P>,
    ) -> impl Future<Output = anyhow::Result<()>> + Send {
        (self.func)(ctx, payload)
    }
}

/// Type-erased handler stored in the [`HandlerRegistry`](crate::HandlerRegistry).
pub(crate) trait ErasedHandler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn invoke(
        &self,
        ctx: DispatchContext,
        payload: Arc<dyn Any + Send + Sync>,
    ) -> BoxFuture<'static, anyhow::Result<()>>;
}

pub(crate) struct TypedHandler<P, H> {
    handler: Arc<H>,
    _payload: PhantomData<fn(P)>,
}

impl<P, H> TypedHandler<P, H>
where
    P: Send + Sync + 'static,
    H: PayloadHandler<P>,
{
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
            _payload: PhantomData,
        }
    }
}

impl<P, H> ErasedHandler for TypedHandler<P, H>
where
    P: Send + Sync + 'static,
    H: PayloadHandler<P>,
{
    fn name(&self) -> &'static str {
        std::any::type_name::<H>()
    }

    fn invoke(
        &self,
        ctx: DispatchContext,
        payload: Arc<dyn Any + Send + Sync>,
    ) -> BoxFuture<'static, anyhow::Result<()>> {
        let handler = Arc::clone(&self.handler);
        Box::pin(async move {
            let payload = payload.downcast::<P>().map_err(|_| {
                anyhow::anyhow!(
                    "payload is not a {}",
                    std::any::type_name::<P>()
                )
            })?;
            handler.handle(ctx, payload).await
        })
    }
}
