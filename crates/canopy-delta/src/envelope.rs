//! Top-level message envelopes, one per direction.

use crate::command::Command;
use crate::event::Event;
use crate::query::{QueryRequest, QueryResponse};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum ClientMessage {
    Command(Command),
    Query(QueryRequest),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum ServerMessage {
    Event(Event),
    Response(QueryResponse),
}
