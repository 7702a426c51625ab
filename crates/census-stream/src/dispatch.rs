//! Handler fan-out.
//!
//! The [`DispatchEngine`] runs the pre-dispatch filters for a payload and
//! then invokes every handler registered for its type, each on its own
//! task. All handlers are awaited; failures and panics are logged and
//! collected into a [`DispatchReport`] without cancelling siblings.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::client::ClientId;
use crate::error::StreamError;
use crate::filter::{FilterVerdict, PreDispatchFilter};
use crate::handler::DispatchContext;
use crate::metrics;
use crate::registry::HandlerRegistry;
use crate::router::RoutedPayload;

/// What happened to one payload.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// A filter rejected the payload.
    Vetoed {
        /// Name of the rejecting filter.
        filter: &'static str,
    },
    /// No handler is registered for the payload type.
    NoHandlers,
    /// Every handler ran.
    Completed(DispatchReport),
}

impl DispatchOutcome {
    /// The report, if handlers ran.
    pub fn report(&self) -> Option<&DispatchReport> {
        match self {
            Self::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Results of one fan-out.
#[derive(Debug)]
pub struct DispatchReport {
    /// Rust type name of the payload.
    pub payload_type: &'static str,
    /// Number of handlers invoked.
    pub invoked: usize,
    /// Handlers that failed, in registration order.
    pub failures: Vec<HandlerFailure>,
}

impl DispatchReport {
    /// Number of handlers that completed without error.
    pub fn succeeded(&self) -> usize {
        self.invoked - self.failures.len()
    }
}

/// A handler that returned an error or panicked.
#[derive(Debug)]
pub struct HandlerFailure {
    /// Handler type name.
    pub handler: &'static str,
    /// Whether the handler panicked.
    pub panicked: bool,
    /// The error, with its cause chain.
    pub error: anyhow::Error,
}

/// Runs filters and handlers for routed payloads.
pub struct DispatchEngine {
    handlers: Arc<HandlerRegistry>,
    filters: Vec<Arc<dyn PreDispatchFilter>>,
    client_id: ClientId,
    cancel: CancellationToken,
}

impl DispatchEngine {
    /// Create an engine with no filters.
    pub fn new(handlers: Arc<HandlerRegistry>, client_id: ClientId, cancel: CancellationToken) -> Self {
        Self {
            handlers,
            filters: Vec::new(),
            client_id,
            cancel,
        }
    }

    /// Append a filter to the chain.
    pub fn with_filter(mut self, filter: Arc<dyn PreDispatchFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Context for dispatching `payload`.
    pub fn context(&self, payload: &RoutedPayload) -> DispatchContext {
        DispatchContext::new(self.client_id, payload.type_name(), self.cancel.clone())
    }

    /// Run the filter chain. Returns the name of the rejecting filter, if any.
    pub fn screen(&self, payload: &RoutedPayload, ctx: &DispatchContext) -> Option<&'static str> {
        let vetoed_by = self
            .filters
            .iter()
            .find(|filter| filter.check(payload, ctx) == FilterVerdict::Reject)
            .map(|filter| filter.name());
        if let Some(filter) = vetoed_by {
            debug!(
                client_id = %self.client_id,
                payload_type = payload.type_name(),
                filter,
                "Payload vetoed"
            );
        }
        vetoed_by
    }

    /// Whether any handler is registered for `payload`'s type.
    pub fn has_handlers(&self, payload: &RoutedPayload) -> bool {
        self.handlers.count(payload.type_key()) > 0
    }

    /// Filter and fan out one payload.
    pub async fn dispatch(&self, payload: RoutedPayload) -> DispatchOutcome {
        let ctx = self.context(&payload);
        if let Some(filter) = self.screen(&payload, &ctx) {
            return DispatchOutcome::Vetoed { filter };
        }
        self.fan_out(payload, ctx).await
    }

    /// Invoke every handler for `payload` and wait for all of them.
    pub async fn fan_out(&self, payload: RoutedPayload, ctx: DispatchContext) -> DispatchOutcome {
        let handlers = self.handlers.handlers(payload.type_key());
        if handlers.is_empty() {
            trace!(payload_type = payload.type_name(), "No handlers registered");
            return DispatchOutcome::NoHandlers;
        }

        let started = Instant::now();
        let mut tasks = JoinSet::new();
        for (index, handler) in handlers.iter().enumerate() {
            let invocation = handler.invoke(ctx.clone(), payload.value());
            tasks.spawn(async move {
                let result = AssertUnwindSafe(invocation).catch_unwind().await;
                (index, result)
            });
        }

        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (index, failure) = match joined {
                Ok((_, Ok(Ok(())))) => continue,
                Ok((index, Ok(Err(error)))) => (Some(index), (false, error)),
                Ok((index, Err(panic))) => (
                    Some(index),
                    (true, anyhow::anyhow!("handler panicked: {}", panic_message(&*panic))),
                ),
                Err(join_error) => (None, (join_error.is_panic(), anyhow::Error::new(join_error))),
            };
            let handler = index.map_or("unknown", |i| handlers[i].name());
            self.log_failure(&ctx, handler, &failure.1);
            failures.push((
                index.unwrap_or(usize::MAX),
                HandlerFailure {
                    handler,
                    panicked: failure.0,
                    error: failure.1,
                },
            ));
        }
        failures.sort_by_key(|(index, _)| *index);

        metrics::record_dispatch_duration(payload.type_name(), started.elapsed());
        DispatchOutcome::Completed(DispatchReport {
            payload_type: payload.type_name(),
            invoked: handlers.len(),
            failures: failures.into_iter().map(|(_, failure)| failure).collect(),
        })
    }

    fn log_failure(&self, ctx: &DispatchContext, handler: &'static str, error: &anyhow::Error) {
        let cancelled = ctx.is_cancelled()
            || error
                .downcast_ref::<StreamError>()
                .is_some_and(StreamError::is_cancellation);
        if cancelled {
            debug!(
                client_id = %self.client_id,
                payload_type = ctx.payload_type(),
                handler,
                error = %format_args!("{error:#}"),
                "Handler stopped by cancellation"
            );
        } else {
            metrics::record_handler_failure(ctx.payload_type());
            error!(
                client_id = %self.client_id,
                payload_type = ctx.payload_type(),
                handler,
                error = %format_args!("{error:#}"),
                "Handler failed"
            );
        }
    }
}

impl fmt::Debug for DispatchEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchEngine")
            .field("client_id", &self.client_id)
            .field("filters", &self.filters)
            .field("handlers", &self.handlers)
            .finish()
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
