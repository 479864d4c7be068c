//! The per-process client facade.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;

use bytes::Bytes;
use marionette_proto::{
    MemoryAllocation, MemoryProtection, Message, Pointer, ProtoError,
};
use marionette_transport::{default_base_dir, ChannelEndpoint, ChannelRole};
use tracing::{debug, info, warn};

use crate::args::{lower_args, CallArg};
use crate::channel::{ChannelCloser, MessageChannel};
use crate::dispatch;
use crate::error::{ClientError, Result};
use crate::functions::{CallbackResponse, FunctionRegistry};

/// Client construction settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Directory the agent's channel endpoints live under.
    pub base_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

const STATE_READY: u8 = 0;
const STATE_DISPOSING: u8 = 1;
const STATE_DISPOSED: u8 = 2;

/// One connected target process.
///
/// Owns the control channel, the callback channel (driven by the
/// dispatch worker), and the function registry. Control operations
/// serialize on an exclusive per-client lock spanning one full
/// request/response round trip; operations against different clients
/// proceed in parallel.
pub struct Client {
    pid: u32,
    control: Mutex<Option<MessageChannel>>,
    functions: Arc<FunctionRegistry>,
    shutdown: Arc<AtomicBool>,
    callback_closer: ChannelCloser,
    worker: Mutex<Option<JoinHandle<()>>>,
    state: AtomicU8,
}

impl Client {
    /// Connect both channels to the agent serving `pid` and start the
    /// dispatch worker.
    ///
    /// The agent (or an injected library providing one) must already
    /// be listening; see the injection bootstrap crate.
    pub fn connect(config: &ClientConfig, pid: u32) -> Result<Client> {
        let control_endpoint =
            ChannelEndpoint::with_base_dir(ChannelRole::Control, pid, config.base_dir.clone());
        let callback_endpoint =
            ChannelEndpoint::with_base_dir(ChannelRole::Callback, pid, config.base_dir.clone());

        let control = MessageChannel::connect(&control_endpoint)?;
        let callback = MessageChannel::connect(&callback_endpoint)?;
        let callback_closer = callback.closer();

        let functions = Arc::new(FunctionRegistry::new());
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker = std::thread::Builder::new()
            .name(format!("marionette-dispatch-{pid}"))
            .spawn({
                let functions = Arc::clone(&functions);
                let shutdown = Arc::clone(&shutdown);
                move || dispatch::run(callback, functions, shutdown, pid)
            })
            .map_err(ClientError::WorkerSpawn)?;

        info!(pid, "client connected");

        Ok(Client {
            pid,
            control: Mutex::new(Some(control)),
            functions,
            shutdown,
            callback_closer,
            worker: Mutex::new(Some(worker)),
            state: AtomicU8::new(STATE_READY),
        })
    }

    /// The target process id this client is bound to.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whether this client has been closed or disposed. A disposed
    /// client stays disposed; reconnect through the registry.
    pub fn is_disposed(&self) -> bool {
        self.state.load(Ordering::SeqCst) != STATE_READY
    }

    /// Probe whether the agent is alive and answering.
    pub fn is_valid(&self) -> Result<bool> {
        self.status_transact(&Message::IsValidRequest)
    }

    /// Ask the agent to terminate the target process, then release the
    /// control channel. Best effort: transport errors are swallowed,
    /// since the process going away mid-reply is the expected outcome.
    pub fn close(&self) {
        let mut guard = self.lock_control();
        if let Some(channel) = guard.as_mut() {
            match channel.send(&Message::CloseProcessRequest) {
                Ok(()) => {
                    if let Err(err) = channel.receive() {
                        debug!(pid = self.pid, %err, "no close acknowledgement");
                    }
                }
                Err(err) => debug!(pid = self.pid, %err, "close request not delivered"),
            }
        }
        *guard = None;
    }

    /// Read `out.len()` bytes of target memory at `address`.
    ///
    /// Returns `Ok(false)` — with `out` untouched — if the agent
    /// reports failure or returns a byte count different from the
    /// requested size. Callers wanting an offset slice the buffer.
    pub fn read_memory(&self, address: Pointer, out: &mut [u8]) -> Result<bool> {
        let size = u32::try_from(out.len()).map_err(|_| ProtoError::PayloadTooLarge {
            size: out.len(),
            max: u32::MAX as usize,
        })?;
        let (success, value) =
            self.value_transact(&Message::ReadMemoryRequest { address, size })?;
        if !success || value.len() != out.len() {
            return Ok(false);
        }
        out.copy_from_slice(&value);
        Ok(true)
    }

    /// Write `data` into target memory at `address`.
    ///
    /// The slice is copied into a private send buffer; callers wanting
    /// an offset/length window sub-slice their buffer, and nothing
    /// outside the slice is ever transmitted.
    pub fn write_memory(&self, address: Pointer, data: &[u8]) -> Result<bool> {
        self.status_transact(&Message::WriteMemoryRequest {
            address,
            data: Bytes::copy_from_slice(data),
        })
    }

    /// Allocate `size` bytes in the target.
    pub fn allocate_memory(
        &self,
        size: u32,
        allocation: MemoryAllocation,
        protection: MemoryProtection,
    ) -> Result<Pointer> {
        let (success, value) = self.value_transact(&Message::AllocateMemoryRequest {
            size,
            allocation,
            protection,
        })?;
        if !success {
            return Err(remote_failure("allocate_memory", &value));
        }
        pointer_from_payload("allocate_memory", &value)
    }

    /// Free a target allocation made through [`allocate_memory`](Self::allocate_memory).
    pub fn free_memory(&self, address: Pointer) -> Result<bool> {
        self.status_transact(&Message::FreeMemoryRequest { address })
    }

    /// Change page protection on a target region.
    pub fn protect_memory(
        &self,
        address: Pointer,
        size: u32,
        protection: MemoryProtection,
    ) -> Result<bool> {
        self.status_transact(&Message::ProtectMemoryRequest {
            address,
            size,
            protection,
        })
    }

    /// Query the page protection of the region containing `address`.
    pub fn query_memory(&self, address: Pointer) -> Result<MemoryProtection> {
        let (success, value) = self.value_transact(&Message::QueryMemoryRequest { address })?;
        if !success {
            return Err(remote_failure("query_memory", &value));
        }
        let bits: [u8; 4] = value.as_ref().try_into().map_err(|_| {
            ClientError::MalformedResponse {
                operation: "query_memory",
                expected: 4,
                actual: value.len(),
            }
        })?;
        Ok(MemoryProtection::from_bits(u32::from_le_bytes(bits)))
    }

    /// Ask the agent to allocate a console for the target.
    pub fn allocate_console(&self) -> Result<bool> {
        self.status_transact(&Message::AllocateConsoleRequest)
    }

    /// Invoke a native function at `address` inside the target.
    ///
    /// Arguments are lowered to pointer-width values before anything
    /// is sent; see [`CallArg`] for the widening and sole-sequence
    /// expansion rules. Returns the function's pointer-width return
    /// value, or the agent's failure text as an error.
    pub fn call_function(&self, address: Pointer, args: &[CallArg]) -> Result<Pointer> {
        let args = lower_args(args)?;
        let (success, value) =
            self.value_transact(&Message::CallFunctionRequest { address, args })?;
        if !success {
            return Err(remote_failure("call_function", &value));
        }
        pointer_from_payload("call_function", &value)
    }

    /// Register `handler` under `name` and have the agent build a
    /// `arity`-argument trampoline for it in the target. Returns the
    /// trampoline address, callable from target code.
    ///
    /// The handler is registered locally only once the agent confirms,
    /// so registry and agent agree from that instant onward.
    pub fn create_function<F>(&self, name: &str, arity: u32, handler: F) -> Result<Pointer>
    where
        F: Fn(&[Pointer]) -> CallbackResponse + Send + Sync + 'static,
    {
        let mut guard = self.lock_control();
        let channel = guard.as_mut().ok_or(ClientError::Disposed)?;

        if self.functions.contains(name) {
            return Err(ClientError::DuplicateFunction(name.to_owned()));
        }

        channel.send(&Message::CreateFunctionRequest {
            name: name.to_owned(),
            arity,
        })?;
        let (success, value) = expect_status_value(channel.receive()?)?;
        if !success {
            return Err(remote_failure("create_function", &value));
        }
        let address = pointer_from_payload("create_function", &value)?;
        self.functions
            .insert(name.to_owned(), Arc::new(handler), address);
        debug!(pid = self.pid, name, %address, "function registered");
        Ok(address)
    }

    /// Unregister `name` locally and ask the agent to tear down its
    /// trampoline.
    ///
    /// Returns `Ok(false)` with zero transport traffic if the name was
    /// never registered. Local removal happens first and is not rolled
    /// back, whatever the agent answers.
    pub fn free_function(&self, name: &str) -> Result<bool> {
        if !self.functions.remove(name) {
            return Ok(false);
        }
        self.status_transact(&Message::FreeFunctionRequest {
            name: name.to_owned(),
        })
    }

    /// Tear the client down: best-effort free of every registered
    /// function, cooperative shutdown and join of the dispatch worker,
    /// then release of both channels. Idempotent; operations after
    /// disposal fail with [`ClientError::Disposed`].
    pub fn dispose(&self) {
        if self
            .state
            .compare_exchange(
                STATE_READY,
                STATE_DISPOSING,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_err()
        {
            return;
        }

        for name in self.functions.names() {
            if let Err(err) = self.free_function(&name) {
                debug!(pid = self.pid, name = %name, %err, "free during dispose failed");
            }
        }

        self.shutdown.store(true, Ordering::SeqCst);
        self.callback_closer.close();
        if let Some(handle) = self.lock_worker().take() {
            if handle.join().is_err() {
                warn!(pid = self.pid, "dispatch worker panicked");
            }
        }

        self.functions.clear();
        *self.lock_control() = None;
        self.state.store(STATE_DISPOSED, Ordering::SeqCst);
        info!(pid = self.pid, "client disposed");
    }

    /// One full control transaction: lock, send, receive, unlock.
    fn transact(&self, request: &Message) -> Result<Message> {
        let mut guard = self.lock_control();
        let channel = guard.as_mut().ok_or(ClientError::Disposed)?;
        channel.send(request)?;
        channel.receive()
    }

    fn status_transact(&self, request: &Message) -> Result<bool> {
        match self.transact(request)? {
            Message::StatusResponse { success } => Ok(success),
            other => Err(ClientError::UnexpectedMessage {
                expected: "StatusResponse",
                got: other.kind(),
            }),
        }
    }

    fn value_transact(&self, request: &Message) -> Result<(bool, Bytes)> {
        expect_status_value(self.transact(request)?)
    }

    fn lock_control(&self) -> MutexGuard<'_, Option<MessageChannel>> {
        self.control
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("pid", &self.pid)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn expect_status_value(response: Message) -> Result<(bool, Bytes)> {
    match response {
        Message::StatusWithValueResponse { success, value } => Ok((success, value)),
        other => Err(ClientError::UnexpectedMessage {
            expected: "StatusWithValueResponse",
            got: other.kind(),
        }),
    }
}

fn remote_failure(operation: &'static str, payload: &Bytes) -> ClientError {
    ClientError::RemoteFailure {
        operation,
        detail: String::from_utf8_lossy(payload).into_owned(),
    }
}

fn pointer_from_payload(operation: &'static str, payload: &Bytes) -> Result<Pointer> {
    let bits: [u8; 8] =
        payload
            .as_ref()
            .try_into()
            .map_err(|_| ClientError::MalformedResponse {
                operation,
                expected: 8,
                actual: payload.len(),
            })?;
    Ok(Pointer::new(u64::from_le_bytes(bits)))
}
