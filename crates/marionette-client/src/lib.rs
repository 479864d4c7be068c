//! Controller-side core: one [`Client`] per target process.
//!
//! A client owns two channels to the agent living in its target. The
//! control channel carries strict one-request/one-response
//! transactions, serialized by an exclusive per-client lock. The
//! callback channel is read by a single dispatch worker that turns
//! agent-initiated calls into invocations of controller-registered
//! handler functions. [`ClientRegistry`] caches clients by target pid
//! so each process is connected at most once.

pub mod args;
pub mod channel;
pub mod client;
mod dispatch;
pub mod error;
pub mod functions;
pub mod registry;

pub use args::CallArg;
pub use channel::{ChannelCloser, MessageChannel};
pub use client::{Client, ClientConfig};
pub use error::{ClientError, Result};
pub use functions::{CallbackHandler, CallbackResponse};
pub use registry::ClientRegistry;
