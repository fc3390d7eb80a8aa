use std::io::IsTerminal;
use std::time::{SystemTime, UNIX_EPOCH};

use actionlink_core::{Action, Role};
use clap::ValueEnum;
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
pub struct ActionOutput<'a> {
    pub action: Action,
    pub params: &'a [String],
    pub role: Role,
    pub transport: &'a str,
    pub timestamp: String,
}

impl<'a> ActionOutput<'a> {
    pub fn new(action: Action, params: &'a [String], role: Role, transport: &'a str) -> Self {
        Self {
            action,
            params,
            role,
            transport,
            timestamp: now_unix_seconds(),
        }
    }
}

pub fn print_action(out: &ActionOutput<'_>, format: OutputFormat) {
    println!("{}", render_action(out, format));
}

pub fn render_action(out: &ActionOutput<'_>, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
        }
        OutputFormat::Pretty => {
            let params = out
                .params
                .iter()
                .map(|p| format!("{p:?}"))
                .collect::<Vec<_>>()
                .join(" ");
            if params.is_empty() {
                format!("{} via {}", out.action, out.transport)
            } else {
                format!("{} {} via {}", out.action, params, out.transport)
            }
        }
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
