//! Handler Registry
//!
//! Caller-supplied handlers keyed by message kind. Dispatch runs every
//! handler of a kind in registration order, one at a time. A handler that
//! returns an error or panics is logged and counted; the rest still run.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::domain::streaming::{MessageEnvelope, MessageKind};
use crate::error::HandlerError;
use crate::infrastructure::metrics;

/// Receives messages of the kinds it is registered for.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one message.
    async fn handle(&self, message: &MessageEnvelope) -> Result<(), HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(&MessageEnvelope) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, message: &MessageEnvelope) -> Result<(), HandlerError> {
        (self.0)(message)
    }
}

struct AsyncFnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for AsyncFnHandler<F>
where
    F: Fn(MessageEnvelope) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: &MessageEnvelope) -> Result<(), HandlerError> {
        (self.0)(message.clone()).await
    }
}

/// Wrap a synchronous closure as a handler.
pub fn handler_fn<F>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(&MessageEnvelope) -> Result<(), HandlerError> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

/// Wrap an async closure as a handler. The closure gets its own copy of the
/// message.
pub fn async_handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(MessageEnvelope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(AsyncFnHandler(f))
}

/// Handlers grouped by message kind.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<MessageKind, Vec<Arc<dyn MessageHandler>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts: HashMap<&MessageKind, usize> =
            self.handlers.iter().map(|(k, v)| (k, v.len())).collect();
        f.debug_struct("HandlerRegistry")
            .field("handlers", &counts)
            .finish()
    }
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `kind`.
    pub fn register(&mut self, kind: MessageKind, handler: Arc<dyn MessageHandler>) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    /// At least one handler is registered for `kind`.
    #[must_use]
    pub fn has_handlers(&self, kind: &MessageKind) -> bool {
        self.handlers.get(kind).is_some_and(|h| !h.is_empty())
    }

    /// Run every handler for the message's kind.
    ///
    /// Returns how many handlers failed.
    pub async fn dispatch(&self, message: &MessageEnvelope) -> usize {
        let Some(handlers) = self.handlers.get(message.kind()) else {
            return 0;
        };

        let mut failures = 0;
        for (index, handler) in handlers.iter().enumerate() {
            let outcome = AssertUnwindSafe(handler.handle(message))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::error!(kind = %message.kind(), handler = index, error = %e, "Handler failed");
                    metrics::record_handler_failure(message.kind());
                }
                Err(panic) => {
                    failures += 1;
                    tracing::error!(
                        kind = %message.kind(),
                        handler = index,
                        panic = panic_message(panic.as_ref()),
                        "Handler panicked"
                    );
                    metrics::record_handler_failure(message.kind());
                }
            }
        }

        metrics::record_dispatched(message.kind());
        failures
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
