//! fOS Replay Record - Session replay recorder
//!
//! Turns a live page into a stream of replay records and ships them as
//! compressed segments:
//!
//! ```text
//! Document ──> observers ──> Record ──> SegmentCollection ──> DeflateEncoder
//!    │             ^                          │                    │
//!    └─ serializer ┘ (full snapshots)         │              replay-worker
//!                                             └──> HttpRequest <───┘
//! ```
//!
//! - Nodes get stable ids the first time they are serialized; every record
//!   refers to nodes by those ids.
//! - Privacy levels are resolved per node and applied before any text,
//!   attribute or input value leaves the page.
//! - Pending mutations are emitted before any other record.

pub mod config;
pub mod encoder;
pub mod full_snapshot;
pub mod ids;
pub mod lifecycle;
pub mod observers;
pub mod privacy;
pub mod recorder;
pub mod recording;
pub mod records;
pub mod replay_stats;
pub mod scope;
pub mod segment;
pub mod segment_collection;
pub mod serialize;
pub mod shadow_roots;
pub mod transport;

pub use config::{BatchConfig, RecorderConfig};
pub use encoder::{DeflateEncoder, EncoderResult, EncoderSyncResult};
pub use ids::{NodeId, NodeIdRegistry, RecordId, RecordIdRegistry};
pub use lifecycle::{
    observe_page_exit, LifeCycle, LifeCycleEvent, LifeCycleEventType, PageExitReason, Subscription, ViewCreated,
};
pub use observers::{ListenerTracker, Tracker};
pub use privacy::{AttributePrivacyPolicy, NodePrivacyLevel, PrivacyPolicy};
pub use recorder::{record, Recorder};
pub use recording::{start_recording, Recording, ViewContext};
pub use records::{IncrementalData, IncrementalSource, Record, RecordType, TimeStamp};
pub use replay_stats::{ReplayStats, ViewReplayStats};
pub use scope::{RecordCallback, RecordScope};
pub use segment::{CreationReason, SegmentContext, SegmentMetadata};
pub use segment_collection::{SegmentCollection, SegmentLimits};
pub use serialize::{serialize_document, SerializationStatus};
pub use shadow_roots::ShadowRootsController;
pub use transport::{Batch, HttpRequest, Payload, PayloadBody, PayloadPart};

/// Recorder errors
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("DOM error: {0}")]
    Dom(#[from] replay_dom::DomError),

    #[error("Worker error: {0}")]
    Worker(#[from] replay_worker::WorkerError),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Segment has no records")]
    EmptySegment,

    #[error("Compression failed, segment of view {view_id} dropped")]
    CompressionFailed { view_id: String },

    #[error("Message of {bytes} bytes exceeds the {limit} bytes limit")]
    MessageTooLarge { bytes: usize, limit: usize },
}
