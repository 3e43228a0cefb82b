//! Binds a byte-stream collaborator to the protocol engine and manages the
//! connection lifecycle.

use std::io;

use crate::client::DebugClient;
use crate::error::DebugError;

/// The bidirectional byte stream a medium drives: a serial port, a TCP
/// socket, or an in-memory pair in tests.
///
/// Reads are non-blocking in spirit: `read_buf` returns `Ok(0)` when nothing
/// is available right now, and an `Err` when the stream is gone. The medium
/// treats a read error like an external disconnect.
pub trait ByteStream {
    /// Acquire the underlying resource. Called once per connection attempt.
    fn open(&mut self) -> io::Result<()>;

    /// Release the underlying resource. Must be safe to call repeatedly.
    fn close(&mut self);

    /// Read whatever is available into `buf`, returning the byte count.
    fn read_buf(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all of `data` to the stream.
    fn write_buf(&mut self, data: &[u8]) -> io::Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Owns a [`ByteStream`] and a [`DebugClient`] and shuttles bytes between
/// them.
///
/// On a successful [`connect`](Medium::connect) the engine is reset and a
/// broadcast scan is queued, so discovery starts the moment the bus is up.
/// [`pump`](Medium::pump) must be called whenever the stream may have data
/// (from a poll loop, a readiness callback, or a timer): it feeds received
/// bytes to the engine and writes out everything the engine queued.
pub struct Medium<S: ByteStream> {
    stream: S,
    client: DebugClient,
    state: ConnectionState,
}

impl<S: ByteStream> Medium<S> {
    pub fn new(stream: S, client: DebugClient) -> Self {
        Medium {
            stream,
            client,
            state: ConnectionState::Disconnected,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn client(&self) -> &DebugClient {
        &self.client
    }

    /// The engine, for issuing requests. Frames queued here go out on the
    /// next [`pump`](Medium::pump) or [`flush`](Medium::flush).
    pub fn client_mut(&mut self) -> &mut DebugClient {
        &mut self.client
    }

    /// Open the stream and start a discovery scan.
    ///
    /// On failure the stream stays closed, the state stays
    /// `Disconnected` and the error is returned. Connecting while already
    /// connected is a no-op.
    pub fn connect(&mut self) -> Result<(), DebugError> {
        if self.state != ConnectionState::Disconnected {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        if let Err(err) = self.stream.open() {
            self.state = ConnectionState::Disconnected;
            return Err(err.into());
        }
        self.client.reset();
        self.state = ConnectionState::Connected;
        self.client.scan();
        self.flush()
    }

    /// Tear down the connection: close the stream and drop all session
    /// state. The next connect starts from a clean slate.
    pub fn disconnect(&mut self) {
        if self.state == ConnectionState::Disconnected {
            return;
        }
        self.state = ConnectionState::Disconnecting;
        self.stream.close();
        self.client.reset();
        self.state = ConnectionState::Disconnected;
    }

    /// Move pending bytes in both directions. A stream error tears the
    /// connection down (like an external disconnect) and is returned.
    pub fn pump(&mut self) -> Result<(), DebugError> {
        if self.state != ConnectionState::Connected {
            return Err(DebugError::NotConnected);
        }
        let mut buf = [0u8; 4096];
        loop {
            match self.stream.read_buf(&mut buf) {
                Ok(0) => break,
                Ok(n) => self.client.receive_bytes(&buf[..n]),
                Err(err) => {
                    self.disconnect();
                    return Err(err.into());
                }
            }
        }
        self.flush()
    }

    /// Write out every frame the engine has queued.
    pub fn flush(&mut self) -> Result<(), DebugError> {
        if self.state != ConnectionState::Connected {
            return Err(DebugError::NotConnected);
        }
        for frame in self.client.take_outbound() {
            if let Err(err) = self.stream.write_buf(&frame) {
                self.disconnect();
                return Err(err.into());
            }
        }
        Ok(())
    }
}
