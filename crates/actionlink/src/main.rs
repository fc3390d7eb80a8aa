mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "actionlink", version, about = "Send actions between processes")]
struct Cli {
    /// Output format for received actions.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::TransportKind;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "actionlink",
            "send",
            "--transport",
            "pipe",
            "--key",
            "demo",
            "Command",
            "open",
            "notes.txt",
        ])
        .expect("send args should parse");

        match cli.command {
            Command::Send(args) => {
                assert_eq!(args.transport.transport, TransportKind::Pipe);
                assert_eq!(args.action, "Command");
                assert_eq!(args.params, vec!["open", "notes.txt"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_more_than_two_params() {
        let result = Cli::try_parse_from([
            "actionlink",
            "send",
            "--key",
            "demo",
            "Command",
            "a",
            "b",
            "c",
        ]);

        assert!(result.is_err(), "three params should fail");
    }

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::try_parse_from([
            "actionlink",
            "--format",
            "json",
            "serve",
            "--key",
            "demo",
            "--count",
            "3",
        ])
        .expect("serve args should parse");
        match cli.command {
            Command::Serve(args) => {
                assert_eq!(args.count, Some(3));
                assert_eq!(args.transport.transport, TransportKind::File);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
