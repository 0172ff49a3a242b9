//! Segments
//!
//! A segment is streamed to the encoder as it grows:
//!
//! ```text
//! {"records":[<r1>,<r2>,...],<metadata fields>}\n
//! ```
//!
//! The opening of the body is written with the first record; the metadata is
//! only known when the segment is flushed.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use serde::Serialize;

use crate::encoder::{DeflateEncoder, EncoderResult};
use crate::lifecycle::PageExitReason;
use crate::records::{Record, RecordType, TimeStamp};
use crate::replay_stats::ReplayStats;
use crate::RecordError;

/// Why a segment was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreationReason {
    Init,
    SegmentDurationLimit,
    SegmentBytesLimit,
    ViewChange,
    BeforeUnload,
    VisibilityHidden,
}

impl CreationReason {
    pub fn is_page_exit(self) -> bool {
        matches!(self, CreationReason::BeforeUnload | CreationReason::VisibilityHidden)
    }
}

impl From<PageExitReason> for CreationReason {
    fn from(reason: PageExitReason) -> Self {
        match reason {
            PageExitReason::BeforeUnload => CreationReason::BeforeUnload,
            PageExitReason::VisibilityHidden => CreationReason::VisibilityHidden,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdRef {
    pub id: String,
}

/// Who a segment belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentContext {
    pub application: IdRef,
    pub session: IdRef,
    pub view: IdRef,
}

impl SegmentContext {
    pub fn new(application_id: &str, session_id: &str, view_id: &str) -> Self {
        Self {
            application: IdRef {
                id: application_id.to_string(),
            },
            session: IdRef {
                id: session_id.to_string(),
            },
            view: IdRef {
                id: view_id.to_string(),
            },
        }
    }

    pub fn view_id(&self) -> &str {
        &self.view.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SegmentMetadata {
    pub start: TimeStamp,
    pub end: TimeStamp,
    pub creation_reason: CreationReason,
    pub records_count: u64,
    pub has_full_snapshot: bool,
    pub index_in_view: u64,
    pub source: &'static str,
    #[serde(flatten)]
    pub context: SegmentContext,
}

/// Segment being written to the encoder
pub struct Segment {
    encoder: DeflateEncoder,
    stats: Rc<RefCell<ReplayStats>>,
    metadata: SegmentMetadata,
    encoded_bytes_count: Rc<Cell<usize>>,
    /// Encoder stream this segment writes to
    generation: u64,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("metadata", &self.metadata)
            .field("encoded_bytes_count", &self.encoded_bytes_count.get())
            .finish()
    }
}

impl Segment {
    pub fn new(
        encoder: DeflateEncoder,
        context: SegmentContext,
        creation_reason: CreationReason,
        stats: Rc<RefCell<ReplayStats>>,
    ) -> Self {
        let index_in_view = {
            let mut stats = stats.borrow_mut();
            let index = stats.segments_count(context.view_id());
            stats.add_segment(context.view_id());
            index
        };
        Self {
            generation: encoder.generation(),
            encoder,
            stats,
            metadata: SegmentMetadata {
                start: TimeStamp::MAX,
                end: 0,
                creation_reason,
                records_count: 0,
                has_full_snapshot: false,
                index_in_view,
                source: "browser",
                context,
            },
            encoded_bytes_count: Rc::new(Cell::new(0)),
        }
    }

    pub fn metadata(&self) -> &SegmentMetadata {
        &self.metadata
    }

    /// Append `record`. `callback` receives the segment's compressed size
    /// once the record has been compressed.
    pub fn add_record(&mut self, record: &Record, callback: impl FnOnce(usize) + 'static) -> Result<(), RecordError> {
        let json = serde_json::to_string(record)?;

        let metadata = &mut self.metadata;
        metadata.start = metadata.start.min(record.timestamp());
        metadata.end = metadata.end.max(record.timestamp());
        metadata.records_count += 1;
        metadata.has_full_snapshot |= record.record_type() == RecordType::FullSnapshot;

        let prefix = if self.encoder.is_empty() { "{\"records\":[" } else { "," };
        let encoded = Rc::clone(&self.encoded_bytes_count);
        self.encoder.write(format!("{prefix}{json}"), move |additional| {
            encoded.set(encoded.get() + additional);
            callback(encoded.get());
        });
        Ok(())
    }

    /// Close the segment. `callback` receives the metadata and the complete
    /// compressed body once the encoder is done with it.
    pub fn flush(self, callback: impl FnOnce(SegmentMetadata, EncoderResult) + 'static) -> Result<(), RecordError> {
        if self.encoder.generation() != self.generation {
            self.encoder.discard();
            return Err(RecordError::CompressionFailed {
                view_id: self.metadata.context.view.id.clone(),
            });
        }
        if self.encoder.is_empty() {
            return Err(RecordError::EmptySegment);
        }

        let metadata_json = serde_json::to_string(&self.metadata)?;
        // Reopen the object the records array lives in
        let fields = metadata_json.strip_prefix('{').unwrap_or(&metadata_json);
        self.encoder.write_silently(format!("],{fields}\n"));

        let metadata = self.metadata;
        let stats = self.stats;
        self.encoder.finish(move |result| {
            stats
                .borrow_mut()
                .add_wrote_data(metadata.context.view_id(), result.raw_bytes_count);
            callback(metadata, result);
        });
        Ok(())
    }
}
