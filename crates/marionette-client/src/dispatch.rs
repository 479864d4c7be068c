//! The callback dispatch loop.
//!
//! One worker per client, sole reader and writer of the callback
//! channel. A handler fault must never take the loop down: the agent
//! is blocked inside the target process waiting for a response, so
//! every request gets an answer, faulted or not.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use marionette_proto::{Message, Pointer, ProtoError};
use tracing::{debug, warn};

use crate::channel::MessageChannel;
use crate::error::ClientError;
use crate::functions::{CallbackResponse, FunctionRegistry};

pub(crate) fn run(
    mut channel: MessageChannel,
    functions: Arc<FunctionRegistry>,
    shutdown: Arc<AtomicBool>,
    pid: u32,
) {
    loop {
        let message = match channel.receive() {
            Ok(message) => message,
            Err(ClientError::Proto(ProtoError::UnknownTag(tag))) => {
                // Frame already consumed; the channel is still in sync.
                warn!(pid, tag, "unknown message tag on callback channel");
                continue;
            }
            Err(err) => {
                if shutdown.load(Ordering::SeqCst) {
                    debug!(pid, "dispatch worker stopping");
                } else {
                    warn!(pid, %err, "callback channel lost, dispatch worker exiting");
                }
                return;
            }
        };

        let Message::RemoteCallRequest { name, args } = message else {
            warn!(
                pid,
                kind = message.kind(),
                "unexpected message kind on callback channel"
            );
            continue;
        };

        let response = invoke(&functions, &name, &args);
        let reply = Message::RemoteCallResponse {
            return_value: response.return_value,
            flags: response.flags,
        };
        if let Err(err) = channel.send(&reply) {
            if !shutdown.load(Ordering::SeqCst) {
                warn!(pid, %err, "failed to answer remote call, dispatch worker exiting");
            }
            return;
        }
    }
}

fn invoke(functions: &FunctionRegistry, name: &str, args: &[Pointer]) -> CallbackResponse {
    let Some(handler) = functions.handler(name) else {
        debug!(name, "remote call for unregistered function");
        return CallbackResponse::default();
    };

    match catch_unwind(AssertUnwindSafe(|| handler(args))) {
        Ok(response) => response,
        Err(_) => {
            warn!(name, "callback handler panicked");
            CallbackResponse::default()
        }
    }
}
