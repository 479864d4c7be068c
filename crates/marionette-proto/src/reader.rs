use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use marionette_transport::IpcStream;

use crate::error::{ProtoError, Result};
use crate::frame::{decode_frame, FrameConfig};
use crate::message::Message;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads whole decoded messages from any `Read` stream.
///
/// Partial reads are reassembled internally; callers always get one
/// complete [`Message`] per call.
pub struct MessageReader<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Read> MessageReader<T> {
    /// Create a message reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a message reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Read the next complete message (blocking).
    ///
    /// Returns `Err(ProtoError::ConnectionClosed)` when EOF is reached
    /// before a full frame, and `Err(ProtoError::UnknownTag)` for a
    /// well-framed payload whose tag no variant claims — the frame is
    /// consumed either way, so the stream stays usable.
    pub fn read_message(&mut self) -> Result<Message> {
        loop {
            if let Some(payload) = decode_frame(&mut self.buf, self.config.max_payload_size)? {
                return Message::decode(&payload);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ProtoError::Io(err)),
            };

            if read == 0 {
                return Err(ProtoError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl MessageReader<IpcStream> {
    /// Create a message reader for `IpcStream`, applying the read
    /// timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_proto_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_proto_error(err: marionette_transport::TransportError) -> ProtoError {
    match err {
        marionette_transport::TransportError::Io(io)
        | marionette_transport::TransportError::Accept(io) => ProtoError::Io(io),
        marionette_transport::TransportError::Bind { source, .. }
        | marionette_transport::TransportError::Connect { source, .. } => ProtoError::Io(source),
        other => ProtoError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BufMut;

    use super::*;
    use crate::frame::{encode_frame, MAGIC};
    use crate::types::Pointer;

    fn wire_for(messages: &[Message]) -> Vec<u8> {
        let mut wire = BytesMut::new();
        for message in messages {
            encode_frame(&message.encode_to_bytes(), &mut wire).unwrap();
        }
        wire.to_vec()
    }

    #[test]
    fn read_single_message() {
        let wire = wire_for(&[Message::IsValidRequest]);
        let mut reader = MessageReader::new(Cursor::new(wire));
        assert_eq!(reader.read_message().unwrap(), Message::IsValidRequest);
    }

    #[test]
    fn read_multiple_messages_in_order() {
        let wire = wire_for(&[
            Message::IsValidRequest,
            Message::StatusResponse { success: true },
            Message::FreeMemoryRequest {
                address: Pointer::new(0x10),
            },
        ]);
        let mut reader = MessageReader::new(Cursor::new(wire));

        assert_eq!(reader.read_message().unwrap(), Message::IsValidRequest);
        assert_eq!(
            reader.read_message().unwrap(),
            Message::StatusResponse { success: true }
        );
        assert_eq!(
            reader.read_message().unwrap(),
            Message::FreeMemoryRequest {
                address: Pointer::new(0x10),
            }
        );
    }

    #[test]
    fn reassembles_byte_by_byte_stream() {
        let wire = wire_for(&[Message::ReadMemoryRequest {
            address: Pointer::new(0x2000),
            size: 64,
        }]);
        let mut reader = MessageReader::new(ByteByByteReader { bytes: wire, pos: 0 });

        assert_eq!(
            reader.read_message().unwrap(),
            Message::ReadMemoryRequest {
                address: Pointer::new(0x2000),
                size: 64,
            }
        );
    }

    #[test]
    fn eof_is_connection_closed() {
        let mut reader = MessageReader::new(Cursor::new(Vec::<u8>::new()));
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, ProtoError::ConnectionClosed));
    }

    #[test]
    fn eof_mid_frame_is_connection_closed() {
        let mut partial = BytesMut::new();
        partial.put_slice(&MAGIC);
        partial.put_u32_le(32);
        partial.put_slice(b"short");

        let mut reader = MessageReader::new(Cursor::new(partial.to_vec()));
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, ProtoError::ConnectionClosed));
    }

    #[test]
    fn unknown_tag_consumes_frame_and_keeps_stream_usable() {
        let mut wire = BytesMut::new();
        let mut bogus = BytesMut::new();
        bogus.put_u32_le(4040);
        encode_frame(&bogus, &mut wire).unwrap();
        encode_frame(&Message::IsValidRequest.encode_to_bytes(), &mut wire).unwrap();

        let mut reader = MessageReader::new(Cursor::new(wire.to_vec()));
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, ProtoError::UnknownTag(4040)));

        // The next message decodes cleanly after the bad frame.
        assert_eq!(reader.read_message().unwrap(), Message::IsValidRequest);
    }

    #[test]
    fn desynced_stream_is_invalid_magic() {
        let mut reader = MessageReader::new(Cursor::new(vec![0u8; 16]));
        let err = reader.read_message().unwrap_err();
        assert!(matches!(err, ProtoError::InvalidMagic));
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }
}
