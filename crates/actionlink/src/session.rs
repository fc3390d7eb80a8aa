use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use actionlink_core::{Action, Channel, Dispatcher, Hooks, LinkError, Result, Role};
use actionlink_file::{process_dir, ChannelPaths, FileChannel, FileChannelConfig};
use actionlink_pipe::{PipeChannel, PipeConfig};
use tracing::{debug, info};

/// Which mechanism carries the actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Two shared files named after `key` inside `dir`.
    File { dir: PathBuf, key: String },
    /// A well-known pipe `name` plus one private pipe per client.
    Pipe { name: String },
}

impl Transport {
    /// Shared files keyed by the server's process id, next to its executable.
    pub fn for_server_process(pid: u32) -> Self {
        Transport::File {
            dir: process_dir(pid),
            key: pid.to_string(),
        }
    }
}

/// Everything needed to open a [`Session`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub transport: Transport,
    pub role: Role,
    /// Bound on the client handshake in [`Session::connect`]. Default: 5 s.
    pub connect_timeout: Duration,
    pub file: FileChannelConfig,
    pub pipe: PipeConfig,
}

impl SessionConfig {
    pub fn new(transport: Transport, role: Role) -> Self {
        Self {
            transport,
            role,
            connect_timeout: Duration::from_secs(5),
            file: FileChannelConfig::default(),
            pipe: PipeConfig::default(),
        }
    }

    /// Shared files `<key>.s2c` / `<key>.c2s` in `dir`.
    pub fn file(dir: impl Into<PathBuf>, key: impl Into<String>, role: Role) -> Self {
        Self::new(
            Transport::File {
                dir: dir.into(),
                key: key.into(),
            },
            role,
        )
    }

    pub fn pipe(name: impl Into<String>, role: Role) -> Self {
        Self::new(Transport::Pipe { name: name.into() }, role)
    }
}

/// One end of an action channel, owned by the caller.
///
/// Register handlers through [`dispatcher`](Self::dispatcher) before
/// [`connect`](Self::connect) so no early action is missed. Dropping the
/// session closes it.
pub struct Session {
    config: SessionConfig,
    hooks: Hooks,
    channel: Box<dyn Channel>,
}

impl Session {
    /// Build the channel described by `config`. Nothing talks to the peer
    /// until [`connect`](Self::connect).
    pub fn open(config: SessionConfig) -> Result<Self> {
        let hooks = Hooks::new();
        let channel: Box<dyn Channel> = match &config.transport {
            Transport::File { dir, key } => {
                if key.is_empty() {
                    return Err(LinkError::resource(
                        "invalid file transport",
                        "key must not be empty",
                    ));
                }
                Box::new(FileChannel::with_hooks(
                    ChannelPaths::new(dir, key),
                    config.role,
                    config.file.clone(),
                    hooks.clone(),
                )?)
            }
            Transport::Pipe { name } => Box::new(PipeChannel::with_hooks(
                name,
                config.role,
                config.pipe.clone(),
                hooks.clone(),
            )?),
        };
        debug!(transport = ?config.transport, role = %config.role, "session opened");

        Ok(Self {
            config,
            hooks,
            channel,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    /// Connect using [`SessionConfig::connect_timeout`].
    pub fn connect(&self) -> Result<bool> {
        self.connect_timeout(self.config.connect_timeout)
    }

    /// `Ok(false)` when no peer answered within `timeout`.
    pub fn connect_timeout(&self, timeout: Duration) -> Result<bool> {
        let connected = self.channel.connect(timeout)?;
        if connected {
            info!(role = %self.config.role, "session connected");
        }
        Ok(connected)
    }

    pub fn send(&self, action: Action, params: &[&str]) -> Result<()> {
        self.channel.send(action, params)
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        self.channel.dispatcher()
    }

    /// Receive the human-readable log lines of this session.
    pub fn on_log<F>(&self, sink: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.hooks.on_log(sink);
    }

    /// Receive errors that happen off the caller's thread.
    pub fn on_error<F>(&self, sink: F)
    where
        F: Fn(&LinkError) + Send + Sync + 'static,
    {
        self.hooks.on_error(sink);
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn channel(&self) -> &dyn Channel {
        self.channel.as_ref()
    }

    /// Stop the channel. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        self.channel.stop()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            debug!(error = %err, "session close on drop failed");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("transport", &self.config.transport)
            .field("role", &self.config.role)
            .field("connected", &self.is_connected())
            .finish()
    }
}
