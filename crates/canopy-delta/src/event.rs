//! Events: repository → client confirmations of mutations.

use crate::message::{CommandSource, ErrorCode, EventSequenceNumber, ProtocolMessage};
use canopy_core::Change;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum EventBody {
    Change(Change),
    Composite(Vec<EventBody>),
    /// The originating command caused nothing visible to this recipient.
    NoOp,
    Error { code: ErrorCode, message: String },
}

impl EventBody {
    /// Elementary changes stay as they are; composites are split.
    pub fn from_change(change: Change) -> Self {
        match change {
            Change::Composite(parts) => {
                EventBody::Composite(parts.into_iter().map(EventBody::from_change).collect())
            }
            change => EventBody::Change(change),
        }
    }

    /// The change carried, if any. `NoOp` and `Error` carry none; inside a
    /// composite they are left out.
    pub fn change(&self) -> Option<Change> {
        match self {
            EventBody::Change(change) => Some(change.clone()),
            EventBody::Composite(parts) => Some(Change::Composite(
                parts.iter().filter_map(EventBody::change).collect(),
            )),
            EventBody::NoOp | EventBody::Error { .. } => None,
        }
    }

    pub fn elementary_count(&self) -> usize {
        match self {
            EventBody::Change(_) => 1,
            EventBody::Composite(parts) => parts.iter().map(EventBody::elementary_count).sum(),
            EventBody::NoOp | EventBody::Error { .. } => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub sequence: EventSequenceNumber,
    #[serde(default)]
    pub origin: Vec<CommandSource>,
    pub body: EventBody,
    #[serde(default)]
    pub messages: Vec<ProtocolMessage>,
}

impl Event {
    pub fn new(sequence: EventSequenceNumber, origin: Vec<CommandSource>, body: EventBody) -> Self {
        Self {
            sequence,
            origin,
            body,
            messages: Vec::new(),
        }
    }

    pub fn error(
        sequence: EventSequenceNumber,
        origin: Option<CommandSource>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            sequence,
            origin.into_iter().collect(),
            EventBody::Error {
                code,
                message: message.into(),
            },
        )
    }

    pub fn with_message(mut self, message: ProtocolMessage) -> Self {
        self.messages.push(message);
        self
    }

    pub fn is_error(&self) -> bool {
        matches!(self.body, EventBody::Error { .. })
    }

    /// Whether `source` is among the commands this event originates from.
    pub fn originates_from(&self, source: &CommandSource) -> bool {
        self.origin.contains(source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_core::NodeId;

    #[test]
    fn test_composite_change_becomes_composite_body() {
        let delete = |p: &str| Change::DeletePartition {
            partition: NodeId::from(p),
        };
        let body = EventBody::from_change(Change::Composite(vec![
            delete("a"),
            Change::Composite(vec![delete("b"), delete("c")]),
        ]));
        assert_eq!(body.elementary_count(), 3);
        assert!(matches!(&body, EventBody::Composite(parts) if parts.len() == 2));
    }

    #[test]
    fn test_error_event() {
        let source = CommandSource::new("p", "c");
        let event = Event::error(4, Some(source.clone()), ErrorCode::CommandRejected, "gone");
        assert!(event.is_error());
        assert!(event.originates_from(&source));
        assert_eq!(event.body.change(), None);

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["body"]["kind"], "Error");
        assert_eq!(json["body"]["data"]["code"], "CommandRejected");
    }
}
