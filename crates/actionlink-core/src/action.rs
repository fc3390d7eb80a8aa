use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LinkError;

/// Version of the action set below. Bumped whenever a variant is added,
/// removed or changes arity.
pub const PROTOCOL_VERSION: u32 = 1;

/// Every action either side may send.
///
/// The wire name of each action is its variant name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Action {
    /// Liveness probe; the server echoes it back.
    Handshake,
    /// The sending side is going away.
    Disconnect,
    /// Redraw the named target.
    Redraw,
    /// Flip the host's file watcher on or off.
    ToggleWatch,
    /// Run one host command line.
    Command,
    /// Show text to the user.
    Print,
}

impl Action {
    pub const ALL: [Action; 6] = [
        Action::Handshake,
        Action::Disconnect,
        Action::Redraw,
        Action::ToggleWatch,
        Action::Command,
        Action::Print,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Action::Handshake => "Handshake",
            Action::Disconnect => "Disconnect",
            Action::Redraw => "Redraw",
            Action::ToggleWatch => "ToggleWatch",
            Action::Command => "Command",
            Action::Print => "Print",
        }
    }

    /// Number of parameters senders conventionally attach.
    ///
    /// Informational only: each registered handler declares its own arity
    /// and the dispatcher checks against that.
    pub fn arity(self) -> usize {
        match self {
            Action::Handshake | Action::Disconnect | Action::ToggleWatch => 0,
            Action::Redraw | Action::Command | Action::Print => 1,
        }
    }

    /// Whether channels interpret this action themselves (in addition to
    /// dispatching it).
    pub fn is_protocol(self) -> bool {
        matches!(self, Action::Handshake | Action::Disconnect)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Handshake" => Ok(Action::Handshake),
            "Disconnect" => Ok(Action::Disconnect),
            "Redraw" => Ok(Action::Redraw),
            "ToggleWatch" => Ok(Action::ToggleWatch),
            "Command" => Ok(Action::Command),
            "Print" => Ok(Action::Print),
            other => Err(LinkError::UnknownAction(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for action in Action::ALL {
            assert_eq!(action.as_str().parse::<Action>().unwrap(), action);
            assert_eq!(action.to_string(), action.as_str());
        }
    }

    #[test]
    fn names_are_case_sensitive() {
        assert!(matches!(
            "print".parse::<Action>(),
            Err(LinkError::UnknownAction(name)) if name == "print"
        ));
        assert!("".parse::<Action>().is_err());
    }

    #[test]
    fn protocol_actions() {
        let protocol: Vec<_> = Action::ALL.into_iter().filter(|a| a.is_protocol()).collect();
        assert_eq!(protocol, vec![Action::Handshake, Action::Disconnect]);
    }

    #[test]
    fn serializes_as_wire_name() {
        let json = serde_json::to_string(&Action::ToggleWatch).unwrap();
        assert_eq!(json, "\"ToggleWatch\"");
    }
}
