use std::fmt;

use actionlink_core::{ErrorKind, LinkError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn link_error(context: &str, err: LinkError) -> CliError {
    let code = match &err {
        LinkError::NotConnected => TIMEOUT,
        other => match other.kind() {
            ErrorKind::Resource => TRANSPORT_ERROR,
            ErrorKind::Protocol => DATA_INVALID,
            ErrorKind::Arity => USAGE,
            ErrorKind::Timeout => TIMEOUT,
            ErrorKind::Handler => FAILURE,
        },
    };
    CliError::new(code, format!("{context}: {err}"))
}
