//! Worker wire protocol
//!
//! Requests are tagged by `action`, responses by `type`; field names are
//! camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Message posted to the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum WorkerRequest {
    Init,
    #[serde(rename_all = "camelCase")]
    Write { id: u64, stream_id: u64, data: String },
    #[serde(rename_all = "camelCase")]
    Reset { stream_id: u64 },
}

/// Message posted back by the worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerResponse {
    Initialized {
        version: String,
    },
    #[serde(rename_all = "camelCase")]
    Wrote {
        id: u64,
        stream_id: u64,
        result: Vec<u8>,
        trailer: Vec<u8>,
        additional_bytes_count: usize,
    },
    #[serde(rename_all = "camelCase")]
    Errored {
        /// Always the string form of the failure
        error: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        stream_id: Option<u64>,
    },
}

impl WorkerResponse {
    /// Stream the response belongs to, if any
    pub fn stream_id(&self) -> Option<u64> {
        match self {
            WorkerResponse::Initialized { .. } => None,
            WorkerResponse::Wrote { stream_id, .. } => Some(*stream_id),
            WorkerResponse::Errored { stream_id, .. } => *stream_id,
        }
    }
}
