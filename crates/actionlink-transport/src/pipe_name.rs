//! Mapping from pipe names to socket paths.
//!
//! Both processes agree on a pipe *name* out of band (a fixed string or one
//! containing a process id). The name is turned into a socket path inside a
//! shared directory so either side can address it without further setup.

use std::path::PathBuf;

use crate::error::{Result, TransportError};

/// Environment variable overriding the directory that holds pipe sockets.
pub const PIPE_DIR_ENV: &str = "ACTIONLINK_PIPE_DIR";

const MAX_PIPE_NAME_LEN: usize = 64;

/// Directory holding pipe sockets: `$ACTIONLINK_PIPE_DIR`, else the system temp dir.
pub fn pipe_dir() -> PathBuf {
    match std::env::var_os(PIPE_DIR_ENV) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => std::env::temp_dir(),
    }
}

/// Socket path for the pipe called `name`.
pub fn pipe_path(name: &str) -> Result<PathBuf> {
    validate_pipe_name(name)?;
    Ok(pipe_dir().join(format!("{name}.pipe")))
}

/// Check that `name` is usable as a pipe name.
///
/// Names are limited to ASCII letters, digits, `_`, `-` and `.`, so they map
/// to a single path component on every platform.
pub fn validate_pipe_name(name: &str) -> Result<()> {
    let invalid = |reason| TransportError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_PIPE_NAME_LEN {
        return Err(invalid("name is longer than 64 bytes"));
    }
    if name.starts_with('.') {
        return Err(invalid("name must not start with '.'"));
    }
    if !name
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
    {
        return Err(invalid("only ASCII letters, digits, '_', '-' and '.' are allowed"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_typical_names() {
        assert!(validate_pipe_name("actionlink").is_ok());
        assert!(validate_pipe_name("actionlink_4242").is_ok());
        assert!(validate_pipe_name("host-plugin.v1").is_ok());
    }

    #[test]
    fn rejects_path_like_names() {
        assert!(validate_pipe_name("").is_err());
        assert!(validate_pipe_name("../escape").is_err());
        assert!(validate_pipe_name("a/b").is_err());
        assert!(validate_pipe_name(".hidden").is_err());
        assert!(validate_pipe_name("with space").is_err());
        assert!(validate_pipe_name(&"x".repeat(65)).is_err());
    }

    #[test]
    fn path_lands_in_pipe_dir() {
        let path = pipe_path("demo_7").unwrap();
        assert_eq!(path.file_name().unwrap(), "demo_7.pipe");
        assert_eq!(path.parent().unwrap(), pipe_dir().as_path());
    }
}
