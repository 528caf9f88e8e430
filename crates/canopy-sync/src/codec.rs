//! Frames ↔ messages. JSON is the default text encoding.

use crate::error::{Result, SyncError};
use serde::de::DeserializeOwned;
use serde::Serialize;

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(message).map_err(|e| SyncError::Codec(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T> {
    serde_json::from_slice(frame).map_err(|e| SyncError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_delta::{ClientMessage, QueryBody, QueryRequest};

    #[test]
    fn test_query_frame() {
        let message = ClientMessage::Query(QueryRequest::new("q1", QueryBody::ListPartitions));
        let frame = encode(&message).unwrap();
        let back: ClientMessage = decode(&frame).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_garbage_is_a_codec_error() {
        assert!(matches!(decode::<ClientMessage>(b"{nope"), Err(SyncError::Codec(_))));
    }
}
