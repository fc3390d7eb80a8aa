use std::path::{Path, PathBuf};

use actionlink_core::Role;

/// File and lock names shared by both ends of a file channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPaths {
    server_to_client: PathBuf,
    client_to_server: PathBuf,
    lock_key: String,
}

impl ChannelPaths {
    /// Paths for `key` inside `dir`: `<key>.s2c`, `<key>.c2s` and the lock
    /// `actionlink_<key>`.
    pub fn new(dir: impl AsRef<Path>, key: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            server_to_client: dir.join(format!("{key}.s2c")),
            client_to_server: dir.join(format!("{key}.c2s")),
            lock_key: format!("actionlink_{key}"),
        }
    }

    /// Paths keyed by the server process id, placed next to that process's
    /// executable when it can be found and in the temp dir otherwise.
    pub fn for_process(pid: u32) -> Self {
        Self::new(process_dir(pid), &pid.to_string())
    }

    pub fn server_to_client(&self) -> &Path {
        &self.server_to_client
    }

    pub fn client_to_server(&self) -> &Path {
        &self.client_to_server
    }

    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    /// The file `role` reads from.
    pub fn inbound(&self, role: Role) -> &Path {
        match role {
            Role::Server => &self.client_to_server,
            Role::Client => &self.server_to_client,
        }
    }

    /// The file `role` appends to.
    pub fn outbound(&self, role: Role) -> &Path {
        match role {
            Role::Server => &self.server_to_client,
            Role::Client => &self.client_to_server,
        }
    }
}

/// Directory holding the executable of process `pid`, or the temp dir when
/// that cannot be determined.
pub fn process_dir(pid: u32) -> PathBuf {
    executable_dir(pid).unwrap_or_else(std::env::temp_dir)
}

#[cfg(target_os = "linux")]
fn executable_dir(pid: u32) -> Option<PathBuf> {
    let exe = std::fs::read_link(format!("/proc/{pid}/exe")).ok()?;
    exe.parent().map(Path::to_path_buf)
}

#[cfg(not(target_os = "linux"))]
fn executable_dir(_pid: u32) -> Option<PathBuf> {
    None
}
