//! Command an already-running remote process over local IPC.
//!
//! marionette lets a controller process direct an agent attached to a
//! target process: read, write, allocate, protect, and query its
//! memory, call native functions inside it, and register controller
//! functions the target can call back into.
//!
//! # Crate Structure
//!
//! - [`transport`] — Local duplex streams and endpoint naming
//! - [`proto`] — Binary message codec and framed channel I/O
//! - [`client`] — Per-process client, control transactions, callback
//!   dispatch, and the client registry
//! - [`inject`] — One-shot library-injection bootstrap

/// Re-export transport types.
pub mod transport {
    pub use marionette_transport::*;
}

/// Re-export protocol types.
pub mod proto {
    pub use marionette_proto::*;
}

/// Re-export client types.
pub mod client {
    pub use marionette_client::*;
}

/// Re-export the injection bootstrap.
pub mod inject {
    pub use marionette_inject::*;
}

#[cfg(feature = "logging")]
pub mod logging;

pub use marionette_client::{
    CallArg, CallbackResponse, Client, ClientConfig, ClientError, ClientRegistry,
};
pub use marionette_proto::{MemoryAllocation, MemoryProtection, Pointer, ResponseFlags};
