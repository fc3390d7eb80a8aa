//! OS-level building blocks shared by the actionlink transports.
//!
//! Two processes that know nothing about each other except a shared key can
//! rendezvous through:
//! - [`NamedLock`], a cross-process mutual-exclusion handle (POSIX named semaphore)
//! - [`UnixDomainSocket`], a full-duplex "named pipe" bound at a path derived
//!   from a pipe name (see [`pipe_path`])
//!
//! This is the lowest layer of actionlink. The file channel builds on the
//! lock; the pipe transport builds on [`IpcStream`].

pub mod error;
pub mod traits;

#[cfg(unix)]
pub mod lock;
#[cfg(unix)]
pub mod pipe_name;
#[cfg(unix)]
pub mod uds;

pub use error::{Result, TransportError};
pub use traits::IpcStream;

#[cfg(unix)]
pub use lock::{LockGuard, NamedLock};
#[cfg(unix)]
pub use pipe_name::{pipe_dir, pipe_path, validate_pipe_name, PIPE_DIR_ENV};
#[cfg(unix)]
pub use uds::UnixDomainSocket;
