use std::sync::Arc;

use marionette_proto::{FrameConfig, Message, MessageReader, MessageWriter};
use marionette_transport::{ChannelEndpoint, IpcStream};

use crate::error::Result;

/// A duplex, message-boundary-preserving wrapper around one channel
/// connection.
///
/// Exclusively owned by one client-side role (control or callback);
/// supports only whole-message send/receive. The paired
/// [`ChannelCloser`] lets another thread interrupt a blocked receive.
pub struct MessageChannel {
    reader: MessageReader<IpcStream>,
    writer: MessageWriter<IpcStream>,
    closer: ChannelCloser,
}

impl MessageChannel {
    /// Connect to a channel endpoint with default framing config.
    pub fn connect(endpoint: &ChannelEndpoint) -> Result<Self> {
        Self::connect_with_config(endpoint, FrameConfig::default())
    }

    /// Connect to a channel endpoint with explicit framing config.
    pub fn connect_with_config(endpoint: &ChannelEndpoint, config: FrameConfig) -> Result<Self> {
        #[cfg(not(unix))]
        {
            let _ = (endpoint, config);
            Err(marionette_transport::TransportError::Unsupported.into())
        }

        #[cfg(unix)]
        {
            let stream = marionette_transport::connect(endpoint)?;
            Self::from_stream_with_config(stream, config)
        }
    }

    /// Wrap an already-connected stream (the accepting side).
    pub fn from_stream(stream: IpcStream) -> Result<Self> {
        Self::from_stream_with_config(stream, FrameConfig::default())
    }

    /// Wrap an already-connected stream with explicit framing config.
    pub fn from_stream_with_config(stream: IpcStream, config: FrameConfig) -> Result<Self> {
        let reader_stream = stream.try_clone()?;
        let closer = ChannelCloser {
            stream: Arc::new(stream.try_clone()?),
        };
        let reader = MessageReader::with_config_ipc(reader_stream, config.clone())?;
        let writer = MessageWriter::with_config_ipc(stream, config)?;
        Ok(Self {
            reader,
            writer,
            closer,
        })
    }

    /// Send one whole message.
    pub fn send(&mut self, message: &Message) -> Result<()> {
        self.writer.send(message)?;
        Ok(())
    }

    /// Receive one whole message (blocking).
    pub fn receive(&mut self) -> Result<Message> {
        Ok(self.reader.read_message()?)
    }

    /// A handle that can interrupt this channel from another thread.
    pub fn closer(&self) -> ChannelCloser {
        self.closer.clone()
    }
}

/// Interrupts a [`MessageChannel`]'s blocked receive from outside.
///
/// Closing shuts down the connection in both directions; the blocked
/// reader observes EOF promptly. The channel must not be used after.
#[derive(Clone)]
pub struct ChannelCloser {
    stream: Arc<IpcStream>,
}

impl ChannelCloser {
    /// Shut the channel down. Errors are ignored: the peer may already
    /// be gone, which is the state being requested anyway.
    pub fn close(&self) {
        let _ = self.stream.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use marionette_proto::Message;
    use marionette_transport::{ChannelListener, ChannelRole};

    use super::*;

    fn bound_pair(tag: &str) -> (MessageChannel, MessageChannel) {
        let dir =
            std::env::temp_dir().join(format!("marionette-chan-{tag}-{}", std::process::id()));
        let endpoint = ChannelEndpoint::with_base_dir(ChannelRole::Control, 1, dir);
        let listener = ChannelListener::bind(&endpoint).unwrap();

        let connector = {
            let endpoint = endpoint.clone();
            std::thread::spawn(move || MessageChannel::connect(&endpoint).unwrap())
        };
        let accepted = MessageChannel::from_stream(listener.accept().unwrap()).unwrap();
        let connected = connector.join().unwrap();
        (connected, accepted)
    }

    #[test]
    fn whole_message_roundtrip() {
        let (mut client, mut agent) = bound_pair("roundtrip");

        client.send(&Message::IsValidRequest).unwrap();
        assert_eq!(agent.receive().unwrap(), Message::IsValidRequest);

        agent
            .send(&Message::StatusResponse { success: true })
            .unwrap();
        assert_eq!(
            client.receive().unwrap(),
            Message::StatusResponse { success: true }
        );
    }

    #[test]
    fn closer_interrupts_blocked_receive() {
        let (mut client, _agent) = bound_pair("closer");
        let closer = client.closer();

        let receiver = std::thread::spawn(move || client.receive());
        std::thread::sleep(std::time::Duration::from_millis(20));
        closer.close();

        let result = receiver.join().unwrap();
        assert!(result.is_err(), "receive must return once closed");
    }
}
