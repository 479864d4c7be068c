//! Binary wire protocol between a controller and an in-process agent.
//!
//! Every message is framed on the byte stream as:
//! - A 2-byte magic number ("MN") for stream synchronization
//! - A 4-byte little-endian payload length
//!
//! and the payload itself is a 4-byte little-endian type tag followed
//! by a variant-specific body. Pointers are a fixed 8 bytes regardless
//! of either side's native width; strings and byte buffers are
//! length-prefixed. [`MessageReader`] and [`MessageWriter`] turn any
//! byte stream into whole-message receive/send — no partial reads, no
//! buffer management in user code.

pub mod error;
pub mod frame;
pub mod message;
pub mod reader;
pub mod types;
pub mod writer;

pub use error::{ProtoError, Result};
pub use frame::{decode_frame, encode_frame, FrameConfig, DEFAULT_MAX_PAYLOAD, HEADER_SIZE, MAGIC};
pub use message::Message;
pub use reader::MessageReader;
pub use types::{MemoryAllocation, MemoryProtection, Pointer, ResponseFlags};
pub use writer::MessageWriter;
