//! Named-pipe transport for actions.
//!
//! A [`PipeServer`] listens on a well-known pipe name and hands every client
//! a private data pipe during a one-frame handshake. A [`PipeClient`]
//! performs that handshake in the background and reconnects when the pipe
//! drops. Both exchange length-prefixed frames carrying any
//! [`PipeMessage`]; [`PipeChannel`] layers the action protocol on top.

pub mod channel;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod message;
pub mod server;

pub use channel::PipeChannel;
pub use client::PipeClient;
pub use config::PipeConfig;
pub use connection::Connection;
pub use error::{PipeError, Result};
pub use message::PipeMessage;
pub use server::PipeServer;
