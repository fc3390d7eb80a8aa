use std::time::Duration;

use actionlink_frame::FrameConfig;

/// Settings shared by [`PipeServer`](crate::PipeServer) and
/// [`PipeClient`](crate::PipeClient).
#[derive(Debug, Clone)]
pub struct PipeConfig {
    /// Payload limit and stream timeouts for data pipes.
    pub frame: FrameConfig,
    /// Bound on each blocking step of the handshake exchange.
    pub handshake_timeout: Duration,
    /// How long the server waits for a client on its private data pipe.
    pub data_accept_timeout: Duration,
    /// How long a client keeps retrying a pipe that is not listening yet.
    pub connect_timeout: Duration,
    /// Restart the client handshake when the connection drops.
    pub auto_reconnect: bool,
    /// How long a stopping [`PipeChannel`](crate::PipeChannel) lets queued
    /// messages finish writing.
    pub drain_timeout: Duration,
}

impl Default for PipeConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            handshake_timeout: Duration::from_secs(5),
            data_accept_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            auto_reconnect: true,
            drain_timeout: Duration::from_secs(1),
        }
    }
}
