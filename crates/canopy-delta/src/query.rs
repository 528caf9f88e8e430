//! Queries: request/response pairs for session control, discovery and
//! subscriptions.

use crate::message::{
    ClientId, ErrorCode, EventSequenceNumber, ParticipationId, ProtocolMessage, QueryId,
};
use canopy_core::{MetaPointer, NodeId, SerializedChunk};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all_fields = "camelCase")]
pub enum QueryBody {
    SignOn {
        protocol_version: String,
        client_id: ClientId,
        repository_id: String,
    },
    SignOff,
    Reconnect {
        participation_id: ParticipationId,
        last_received_sequence: EventSequenceNumber,
    },
    ListPartitions,
    GetAvailableIds {
        count: usize,
    },
    SubscribeToChangingPartitions {
        creation: bool,
        deletion: bool,
        /// Subscribe to the contents of partitions created from now on.
        partitions: bool,
    },
    SubscribeToPartitionContents {
        partition: NodeId,
    },
    UnsubscribeFromPartitionContents {
        partition: NodeId,
    },
}

impl QueryBody {
    pub fn name(&self) -> &'static str {
        match self {
            QueryBody::SignOn { .. } => "SignOn",
            QueryBody::SignOff => "SignOff",
            QueryBody::Reconnect { .. } => "Reconnect",
            QueryBody::ListPartitions => "ListPartitions",
            QueryBody::GetAvailableIds { .. } => "GetAvailableIds",
            QueryBody::SubscribeToChangingPartitions { .. } => "SubscribeToChangingPartitions",
            QueryBody::SubscribeToPartitionContents { .. } => "SubscribeToPartitionContents",
            QueryBody::UnsubscribeFromPartitionContents { .. } => "UnsubscribeFromPartitionContents",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub id: QueryId,
    pub body: QueryBody,
    #[serde(default)]
    pub messages: Vec<ProtocolMessage>,
}

impl QueryRequest {
    pub fn new(id: impl Into<QueryId>, body: QueryBody) -> Self {
        Self {
            id: id.into(),
            body,
            messages: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    pub id: NodeId,
    pub classifier: MetaPointer,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all_fields = "camelCase")]
pub enum ResponseBody {
    SignOn {
        participation_id: ParticipationId,
    },
    SignOff,
    Reconnect {
        participation_id: ParticipationId,
        last_sequence: EventSequenceNumber,
    },
    ListPartitions {
        partitions: Vec<PartitionInfo>,
    },
    GetAvailableIds {
        ids: Vec<NodeId>,
    },
    SubscribeToChangingPartitions,
    SubscribeToPartitionContents {
        contents: SerializedChunk,
    },
    UnsubscribeFromPartitionContents,
    Failed {
        code: ErrorCode,
        message: String,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub id: QueryId,
    pub body: ResponseBody,
    #[serde(default)]
    pub messages: Vec<ProtocolMessage>,
}

impl QueryResponse {
    pub fn new(id: QueryId, body: ResponseBody) -> Self {
        Self {
            id,
            body,
            messages: Vec::new(),
        }
    }

    pub fn failed(id: QueryId, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(
            id,
            ResponseBody::Failed {
                code,
                message: message.into(),
            },
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.body, ResponseBody::Failed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_json_uses_camel_case_fields() {
        let request = QueryRequest::new(
            "q1",
            QueryBody::Reconnect {
                participation_id: "p".into(),
                last_received_sequence: 3,
            },
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["body"]["kind"], "Reconnect");
        assert_eq!(json["body"]["data"]["lastReceivedSequence"], 3);
        assert_eq!(request.body.name(), "Reconnect");
    }

    #[test]
    fn test_failed_response() {
        let response = QueryResponse::failed("q".into(), ErrorCode::NotSignedOn, "sign on first");
        assert!(response.is_failure());
    }
}
