/// Errors surfaced by client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (connect, channel broken).
    #[error("transport error: {0}")]
    Transport(#[from] marionette_transport::TransportError),

    /// Codec or channel-level protocol failure.
    #[error("protocol error: {0}")]
    Proto(#[from] marionette_proto::ProtoError),

    /// The agent answered with a response of the wrong kind for the
    /// request that was sent.
    #[error("protocol desync: expected {expected}, got {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },

    /// The agent reported failure for an operation whose contract is
    /// fatal-on-failure; `detail` is the failure payload as text.
    #[error("{operation} failed in target: {detail}")]
    RemoteFailure {
        operation: &'static str,
        detail: String,
    },

    /// A success response carried a payload of the wrong size.
    #[error("malformed {operation} response: expected {expected} bytes, got {actual}")]
    MalformedResponse {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A function with this name is already registered on this client.
    #[error("function {0:?} is already registered")]
    DuplicateFunction(String),

    /// An argument cannot be marshaled to a pointer-width value.
    #[error("unsupported call argument: {0}")]
    UnsupportedArgument(&'static str),

    /// Failed to start the callback dispatch worker.
    #[error("failed to start dispatch worker: {0}")]
    WorkerSpawn(std::io::Error),

    /// The client has been closed or disposed.
    #[error("client is disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, ClientError>;
