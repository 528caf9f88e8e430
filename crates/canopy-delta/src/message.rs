//! Identifiers and diagnostic annotations shared by all delta messages.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Chosen by the client; unique among its own commands.
    CommandId
);
string_id!(QueryId);
string_id!(
    /// Handed out by the repository on sign-on.
    ParticipationId
);
string_id!(ClientId);

/// Per-recipient event counter. The first event a participation receives is 1.
pub type EventSequenceNumber = u64;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

/// Diagnostic annotation attached to any message; never affects semantics.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub data: Vec<KeyValue>,
}

impl ProtocolMessage {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.push(KeyValue {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data
            .iter()
            .find(|kv| kv.key == key)
            .map(|kv| kv.value.as_str())
    }
}

/// The command an event originates from.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSource {
    pub participation_id: ParticipationId,
    pub command_id: CommandId,
}

impl CommandSource {
    pub fn new(participation: impl Into<ParticipationId>, command: impl Into<CommandId>) -> Self {
        Self {
            participation_id: participation.into(),
            command_id: command.into(),
        }
    }
}

/// Stable, machine-readable kind of a failure reported to a client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    NotSignedOn,
    AlreadySignedOn,
    UnsupportedProtocolVersion,
    UnknownRepository,
    ReconnectMismatch,
    UnknownPartition,
    /// The command could not be applied to the repository's forest.
    CommandRejected,
    MalformedMessage,
    Internal,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::NotSignedOn => "NotSignedOn",
            ErrorCode::AlreadySignedOn => "AlreadySignedOn",
            ErrorCode::UnsupportedProtocolVersion => "UnsupportedProtocolVersion",
            ErrorCode::UnknownRepository => "UnknownRepository",
            ErrorCode::ReconnectMismatch => "ReconnectMismatch",
            ErrorCode::UnknownPartition => "UnknownPartition",
            ErrorCode::CommandRejected => "CommandRejected",
            ErrorCode::MalformedMessage => "MalformedMessage",
            ErrorCode::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
