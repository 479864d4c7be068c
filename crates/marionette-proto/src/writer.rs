use std::io::{ErrorKind, Write};

use bytes::BytesMut;
use marionette_transport::IpcStream;

use crate::error::{ProtoError, Result};
use crate::frame::{encode_frame, FrameConfig};
use crate::message::Message;
use crate::reader::transport_to_proto_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes whole messages to any `Write` stream.
pub struct MessageWriter<T> {
    inner: T,
    payload: BytesMut,
    wire: BytesMut,
    config: FrameConfig,
}

impl<T: Write> MessageWriter<T> {
    /// Create a message writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a message writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            payload: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            wire: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and send one message (blocking), flushing the stream.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        self.payload.clear();
        message.encode(&mut self.payload);

        if self.payload.len() > self.config.max_payload_size {
            return Err(ProtoError::PayloadTooLarge {
                size: self.payload.len(),
                max: self.config.max_payload_size,
            });
        }

        self.wire.clear();
        encode_frame(&self.payload, &mut self.wire)?;

        let mut offset = 0usize;
        while offset < self.wire.len() {
            match self.inner.write(&self.wire[offset..]) {
                Ok(0) => return Err(ProtoError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(ProtoError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(ProtoError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl MessageWriter<IpcStream> {
    /// Create a message writer for `IpcStream`, applying the write
    /// timeout from config.
    pub fn with_config_ipc(inner: IpcStream, config: FrameConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_proto_error)?;
        Ok(Self::with_config(inner, config))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::reader::MessageReader;
    use crate::types::Pointer;

    #[test]
    fn written_messages_read_back() {
        let mut writer = MessageWriter::new(Cursor::new(Vec::<u8>::new()));
        writer.send(&Message::IsValidRequest).unwrap();
        writer
            .send(&Message::CallFunctionRequest {
                address: Pointer::new(0xC0DE),
                args: vec![Pointer::new(7)],
            })
            .unwrap();

        let wire = writer.into_inner().into_inner();
        let mut reader = MessageReader::new(Cursor::new(wire));

        assert_eq!(reader.read_message().unwrap(), Message::IsValidRequest);
        assert_eq!(
            reader.read_message().unwrap(),
            Message::CallFunctionRequest {
                address: Pointer::new(0xC0DE),
                args: vec![Pointer::new(7)],
            }
        );
    }

    #[test]
    fn oversized_message_rejected_before_write() {
        let config = FrameConfig {
            max_payload_size: 16,
            ..FrameConfig::default()
        };
        let mut writer = MessageWriter::with_config(Cursor::new(Vec::<u8>::new()), config);

        let err = writer
            .send(&Message::WriteMemoryRequest {
                address: Pointer::new(0x1000),
                data: bytes::Bytes::from(vec![0u8; 64]),
            })
            .unwrap_err();
        assert!(matches!(err, ProtoError::PayloadTooLarge { .. }));

        let wire = writer.into_inner().into_inner();
        assert!(wire.is_empty(), "nothing hits the stream on rejection");
    }

    #[test]
    fn interrupted_write_retries() {
        struct InterruptedOnce {
            tripped: bool,
            data: Vec<u8>,
        }

        impl Write for InterruptedOnce {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                if !self.tripped {
                    self.tripped = true;
                    return Err(std::io::Error::from(ErrorKind::Interrupted));
                }
                self.data.extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut writer = MessageWriter::new(InterruptedOnce {
            tripped: false,
            data: Vec::new(),
        });
        writer.send(&Message::AllocateConsoleRequest).unwrap();
        assert!(!writer.get_ref().data.is_empty());
    }

    #[test]
    fn zero_write_is_connection_closed() {
        struct ZeroWriter;

        impl Write for ZeroWriter {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Ok(0)
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut writer = MessageWriter::new(ZeroWriter);
        let err = writer.send(&Message::IsValidRequest).unwrap_err();
        assert!(matches!(err, ProtoError::ConnectionClosed));
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_socket_pair() {
        let (left, right) = std::os::unix::net::UnixStream::pair().unwrap();
        let mut writer = MessageWriter::new(left);
        let mut reader = MessageReader::new(right);

        writer
            .send(&Message::StatusResponse { success: true })
            .unwrap();
        assert_eq!(
            reader.read_message().unwrap(),
            Message::StatusResponse { success: true }
        );
    }
}
