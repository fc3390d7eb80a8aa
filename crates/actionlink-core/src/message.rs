//! Line encoding for actions.
//!
//! ```text
//! Redraw "Alice"
//! Command "/say hello there"
//! ToggleWatch
//! ```
//!
//! The action name comes first, followed by each parameter wrapped in double
//! quotes. Splitting honours the quotes, so parameters may contain spaces.
//! There is no escaping: a parameter containing `"` or a line break cannot be
//! carried intact.

use std::fmt;

use serde::Serialize;

use crate::action::Action;
use crate::error::{LinkError, Result};

/// One decoded action with its parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub action: Action,
    pub params: Vec<String>,
}

impl Message {
    pub fn new<I, S>(action: Action, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            action,
            params: params.into_iter().map(Into::into).collect(),
        }
    }

    /// Encode as one line (without the trailing newline).
    pub fn encode(&self) -> String {
        encode(self.action, &self.params)
    }

    /// Decode one line. See [`decode`].
    pub fn decode(line: &str) -> Result<Self> {
        decode(line)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// Encode `action` and `params` as `Action "p1" "p2"`.
pub fn encode<S: AsRef<str>>(action: Action, params: &[S]) -> String {
    let mut line = String::from(action.as_str());
    for param in params {
        line.push_str(" \"");
        line.push_str(param.as_ref());
        line.push('"');
    }
    line
}

/// Decode one line produced by [`encode`].
///
/// Tokens are split on whitespace outside quoted spans. Each token is
/// trimmed and then loses one pair of enclosing quotes.
pub fn decode(line: &str) -> Result<Message> {
    let mut tokens = split_tokens(line).into_iter().map(unquote);

    let name = tokens.next().ok_or(LinkError::EmptyLine)?;
    let action: Action = name.parse()?;

    Ok(Message {
        action,
        params: tokens.map(str::to_string).collect(),
    })
}

fn split_tokens(line: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut start: Option<usize> = None;
    let mut in_quotes = false;

    for (idx, ch) in line.char_indices() {
        if ch == '"' {
            in_quotes = !in_quotes;
        } else if ch.is_whitespace() && !in_quotes {
            if let Some(begin) = start.take() {
                tokens.push(&line[begin..idx]);
            }
            continue;
        }
        if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(begin) = start {
        tokens.push(&line[begin..]);
    }
    tokens
}

fn unquote(token: &str) -> &str {
    let token = token.trim();
    token
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_quoted_params() {
        assert_eq!(encode(Action::Redraw, &["Alice"]), r#"Redraw "Alice""#);
        assert_eq!(encode::<&str>(Action::ToggleWatch, &[]), "ToggleWatch");
        assert_eq!(
            encode(Action::Command, &["/say hi", ""]),
            r#"Command "/say hi" """#
        );
    }

    #[test]
    fn decodes_quoted_params_with_spaces() {
        let msg = decode(r#"Command "/say hello there""#).unwrap();
        assert_eq!(msg, Message::new(Action::Command, ["/say hello there"]));
    }

    #[test]
    fn decodes_bare_and_padded_tokens() {
        let msg = decode("  Print\t hello   \"big world\"  ").unwrap();
        assert_eq!(msg.action, Action::Print);
        assert_eq!(msg.params, vec!["hello", "big world"]);
    }

    #[test]
    fn round_trips_params_without_quotes_or_newlines() {
        let cases: Vec<(Action, Vec<&str>)> = vec![
            (Action::Handshake, vec![]),
            (Action::Redraw, vec!["Alice"]),
            (Action::Command, vec!["/reload all", "  padded  "]),
            (Action::Print, vec!["", "tab\tinside", "ünïcödé"]),
            (Action::Disconnect, vec!["a", "b", "c", "d"]),
        ];

        for (action, params) in cases {
            let decoded = decode(&encode(action, &params)).unwrap();
            assert_eq!(decoded.action, action);
            assert_eq!(decoded.params, params);
        }
    }

    #[test]
    fn unknown_action_is_rejected() {
        let err = decode(r#"Explode "now""#).unwrap_err();
        assert!(matches!(err, LinkError::UnknownAction(ref name) if name == "Explode"));
    }

    #[test]
    fn blank_line_is_rejected() {
        assert!(matches!(decode(""), Err(LinkError::EmptyLine)));
        assert!(matches!(decode(" \t "), Err(LinkError::EmptyLine)));
    }

    #[test]
    fn display_matches_encode() {
        let msg = Message::new(Action::Print, ["hi"]);
        assert_eq!(msg.to_string(), r#"Print "hi""#);
        assert_eq!(Message::decode(&msg.to_string()).unwrap(), msg);
    }

    #[test]
    fn embedded_quote_is_not_preserved() {
        let line = encode(Action::Print, &[r#"a" "b"#]);
        let decoded = decode(&line).unwrap();
        assert_eq!(decoded.params, vec!["a", "b"]);
    }
}
