//! Transport contract
//!
//! The recorder produces payloads; delivering them (retries, beacons, queueing
//! while offline) is the job of the [`HttpRequest`] implementation.

mod batch;

pub use batch::Batch;

use serde::Serialize;

use crate::segment::SegmentMetadata;
use crate::RecordError;

/// One part of a multipart body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadPart {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: &'static str,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadBody {
    Text(String),
    Multipart(Vec<PayloadPart>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub body: PayloadBody,
    pub bytes_count: usize,
}

impl Payload {
    pub fn part(&self, name: &str) -> Option<&PayloadPart> {
        match &self.body {
            PayloadBody::Multipart(parts) => parts.iter().find(|part| part.name == name),
            PayloadBody::Text(_) => None,
        }
    }
}

/// Sends payloads to the intake
pub trait HttpRequest {
    fn send(&self, payload: Payload);

    /// Send while the page is going away
    fn send_on_exit(&self, payload: Payload);
}

#[derive(Serialize)]
struct ReplayEvent<'a> {
    raw_segment_size: usize,
    compressed_segment_size: usize,
    #[serde(flatten)]
    metadata: &'a SegmentMetadata,
}

/// Multipart payload for one compressed segment: the `segment` file named
/// `<session id>-<start>` and the `event` JSON describing it
pub fn build_replay_payload(
    data: Vec<u8>,
    metadata: &SegmentMetadata,
    raw_segment_size: usize,
) -> Result<Payload, RecordError> {
    let event = serde_json::to_vec(&ReplayEvent {
        raw_segment_size,
        compressed_segment_size: data.len(),
        metadata,
    })?;
    let bytes_count = data.len();
    Ok(Payload {
        body: PayloadBody::Multipart(vec![
            PayloadPart {
                name: "segment".to_string(),
                filename: Some(format!("{}-{}", metadata.context.session.id, metadata.start)),
                content_type: "application/octet-stream",
                data,
            },
            PayloadPart {
                name: "event".to_string(),
                filename: None,
                content_type: "application/json",
                data: event,
            },
        ]),
        bytes_count,
    })
}
