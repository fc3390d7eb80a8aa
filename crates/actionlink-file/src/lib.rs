//! Action channel over two shared files.
//!
//! The server creates a server→client file and a client→server file in a
//! directory both processes can reach. Each side appends encoded actions to
//! its outbound file and polls its inbound file, reading and clearing it in
//! one step. Every file access happens under a named cross-process lock.
//!
//! Connection state is simulated: the client sends `Handshake` and waits
//! for the server's echo; `Disconnect` (or the inbound file vanishing)
//! marks the peer as gone.

pub mod channel;
pub mod config;
pub mod paths;

pub use channel::FileChannel;
pub use config::FileChannelConfig;
pub use paths::{process_dir, ChannelPaths};
