//! Recorder configuration

use serde::Deserialize;

use crate::privacy::NodePrivacyLevel;

/// Segment and recording settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// RUM application the segments belong to
    pub application_id: String,
    /// Privacy level applied where the page asks for none
    pub default_privacy_level: NodePrivacyLevel,
    /// A segment is flushed this long after its first record
    pub segment_duration_limit_ms: f64,
    /// A segment is flushed once its compressed size exceeds this
    pub segment_bytes_limit: usize,
    /// Deflate worker stream used for segments
    pub stream_id: u64,
    /// Batch carrying view replay stats
    pub batch: BatchConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            application_id: String::new(),
            default_privacy_level: NodePrivacyLevel::Mask,
            segment_duration_limit_ms: 5_000.0,
            segment_bytes_limit: 60_000,
            stream_id: 1,
            batch: BatchConfig::default(),
        }
    }
}

impl RecorderConfig {
    pub fn new(application_id: &str) -> Self {
        Self {
            application_id: application_id.to_string(),
            ..Self::default()
        }
    }

    /// Parse a JSON configuration; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Batch flush thresholds
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Flush once this many messages are buffered
    pub messages_limit: usize,
    /// Flush once the buffered messages reach this many bytes
    pub bytes_limit: usize,
    /// Messages larger than this are dropped
    pub message_bytes_limit: usize,
    /// Flush this long after the first buffered message
    pub flush_timeout_ms: f64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            messages_limit: 50,
            bytes_limit: 16 * 1024,
            message_bytes_limit: 256 * 1024,
            flush_timeout_ms: 30_000.0,
        }
    }
}
