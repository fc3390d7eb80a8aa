use std::path::PathBuf;
use std::time::Duration;

use actionlink::{Role, SessionConfig, Transport};
use clap::{Args, Subcommand, ValueEnum};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod send;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a server and print every action received.
    Serve(ServeArgs),
    /// Connect as a client and send one action.
    Send(SendArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args, format),
        Command::Send(args) => send::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum TransportKind {
    File,
    Pipe,
}

impl TransportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportKind::File => "file",
            TransportKind::Pipe => "pipe",
        }
    }
}

#[derive(Args, Debug)]
pub struct TransportArgs {
    /// Mechanism carrying the actions.
    #[arg(long, value_enum, default_value = "file", env = "ACTIONLINK_TRANSPORT")]
    pub transport: TransportKind,
    /// Shared key: the file name stem, or the pipe name.
    #[arg(long, env = "ACTIONLINK_KEY")]
    pub key: String,
    /// Directory holding the shared files (file transport only).
    #[arg(long, value_name = "DIR", env = "ACTIONLINK_DIR")]
    pub dir: Option<PathBuf>,
    /// Delay between shared-file checks (e.g. 100ms, 1s).
    #[arg(long, default_value = "100ms")]
    pub poll_interval: String,
}

impl TransportArgs {
    pub fn session_config(&self, role: Role) -> CliResult<SessionConfig> {
        let transport = match self.transport {
            TransportKind::File => Transport::File {
                dir: self.dir.clone().unwrap_or_else(std::env::temp_dir),
                key: self.key.clone(),
            },
            TransportKind::Pipe => {
                if self.dir.is_some() {
                    return Err(CliError::new(
                        USAGE,
                        "--dir only applies to the file transport",
                    ));
                }
                Transport::Pipe {
                    name: self.key.clone(),
                }
            }
        };
        let mut config = SessionConfig::new(transport, role);
        config.file.poll_interval = parse_duration(&self.poll_interval)?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub transport: TransportArgs,
    /// Exit after receiving N actions (handshakes and disconnects excluded).
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub transport: TransportArgs,
    /// How long to wait for the server to answer (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
    /// Action name, e.g. Print or ToggleWatch.
    pub action: String,
    /// Up to two parameters.
    #[arg(num_args = 0..=2)]
    pub params: Vec<String>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
