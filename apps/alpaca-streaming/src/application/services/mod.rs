//! Application Services
//!
//! - `HandlerRegistry`: per-kind handler lists with failure isolation
//! - `MessageRouter`: decodes frames and classifies each message
//! - `ResubscribeStrategy`: what to replay after a reconnect
//! - `StreamSession`: the run loop, subscriptions, and recovery

pub mod handlers;
pub mod resubscribe;
pub mod router;
pub mod session;

pub use handlers::{HandlerRegistry, MessageHandler, async_handler_fn, handler_fn};
pub use resubscribe::ResubscribeStrategy;
pub use router::{MessageRouter, RouteSummary};
pub use session::{StopHandle, StreamSession};
