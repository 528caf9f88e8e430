//! Canopy Delta - the delta protocol's message taxonomy
//!
//! Three disjoint message families replicate forest mutations between a
//! repository and its clients:
//!
//! - **Commands** ([`Command`]): a client asks the repository to apply one
//!   elementary change, or a composite of sub-commands as one atomic unit.
//! - **Events** ([`Event`]): the repository confirms mutations to each
//!   interested client, numbered per recipient starting at 1, carrying the
//!   [`CommandSource`]s they originate from.
//! - **Queries** ([`QueryRequest`] / [`QueryResponse`]): session control,
//!   discovery and subscription management.
//!
//! Every message may carry [`ProtocolMessage`] diagnostics. The [`apply`]
//! module replays the carried changes on a forest replica.
//!
//! ```text
//! client forest ──notifications──▶ Command ──▶ repository forest
//!                                                   │
//! client forest ◀──apply_event_body── Event ◀──notifications
//! ```

pub mod apply;
pub mod command;
pub mod envelope;
pub mod error;
pub mod event;
pub mod message;
pub mod query;
pub mod sequence;

pub use apply::{apply_change, apply_command, apply_event_body, PROTOCOL_VERSION};
pub use command::{Command, CommandBody};
pub use envelope::{ClientMessage, ServerMessage};
pub use error::{DeltaError, Result};
pub use event::{Event, EventBody};
pub use message::{
    ClientId, CommandId, CommandSource, ErrorCode, EventSequenceNumber, KeyValue,
    ParticipationId, ProtocolMessage, QueryId,
};
pub use query::{PartitionInfo, QueryBody, QueryRequest, QueryResponse, ResponseBody};
pub use sequence::{SequenceCounter, SequenceTracker};
