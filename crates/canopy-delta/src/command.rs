//! Commands: client → repository mutation requests.

use crate::message::{CommandId, ProtocolMessage};
use canopy_core::{Change, Notification};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum CommandBody {
    /// One elementary mutation.
    Change(Change),
    /// Sub-commands applied in order as one atomic unit.
    Composite(Vec<Command>),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub body: CommandBody,
    #[serde(default)]
    pub messages: Vec<ProtocolMessage>,
}

impl Command {
    /// A command for `change`. A composite change becomes a composite
    /// command whose parts are numbered `{id}-0`, `{id}-1`, ...
    pub fn new(id: impl Into<CommandId>, change: Change) -> Self {
        let id = id.into();
        let body = match change {
            Change::Composite(parts) => CommandBody::Composite(
                parts
                    .into_iter()
                    .enumerate()
                    .map(|(k, part)| Command::new(format!("{}-{}", id, k), part))
                    .collect(),
            ),
            change => CommandBody::Change(change),
        };
        Self {
            id,
            body,
            messages: Vec::new(),
        }
    }

    pub fn composite(id: impl Into<CommandId>, parts: Vec<Command>) -> Self {
        Self {
            id: id.into(),
            body: CommandBody::Composite(parts),
            messages: Vec::new(),
        }
    }

    pub fn from_notification(id: impl Into<CommandId>, notification: &Notification) -> Self {
        Self::new(id, notification.change())
    }

    pub fn with_message(mut self, message: ProtocolMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.body, CommandBody::Composite(_))
    }

    /// The whole command as one change tree.
    pub fn change(&self) -> Change {
        match &self.body {
            CommandBody::Change(change) => change.clone(),
            CommandBody::Composite(parts) => Change::Composite(parts.iter().map(Command::change).collect()),
        }
    }

    /// Number of elementary changes.
    pub fn elementary_count(&self) -> usize {
        match &self.body {
            CommandBody::Change(Change::Composite(parts)) => {
                parts.iter().cloned().flat_map(Change::flatten).count()
            }
            CommandBody::Change(_) => 1,
            CommandBody::Composite(parts) => parts.iter().map(Command::elementary_count).sum(),
        }
    }
}
