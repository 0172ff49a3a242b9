//! Segment collection
//!
//! Cuts the record stream into segments and sends them.
//!
//! ```text
//!                  first record (context available)
//! WaitingForInitialRecord ─────────────────────────────> SegmentPending
//!          ^                                                   │
//!          └──── duration / bytes limit, view change, exit ────┘
//!
//!                      stop (from any state) ──> Stopped
//! ```
//!
//! A flush sets the creation reason of the next segment. A segment whose
//! compression failed is dropped, never retried.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::rc::{Rc, Weak};

use replay_dom::{Document, TimerId};

use crate::encoder::DeflateEncoder;
use crate::lifecycle::{LifeCycle, LifeCycleEvent, LifeCycleEventType, Subscription};
use crate::records::{Record, RecordType, TimeStamp};
use crate::replay_stats::ReplayStats;
use crate::segment::{CreationReason, Segment, SegmentContext, SegmentMetadata};
use crate::transport::{build_replay_payload, HttpRequest};

pub const SEGMENT_DURATION_LIMIT_MS: f64 = 5_000.0;
pub const SEGMENT_BYTES_LIMIT: usize = 60_000;

/// Why the current segment is flushed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    /// Starts the next segment with this reason
    Next(CreationReason),
    Stop,
}

/// Limits applied to every segment
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentLimits {
    pub duration_ms: f64,
    pub bytes: usize,
}

impl Default for SegmentLimits {
    fn default() -> Self {
        Self {
            duration_ms: SEGMENT_DURATION_LIMIT_MS,
            bytes: SEGMENT_BYTES_LIMIT,
        }
    }
}

pub type SegmentContextProvider = Rc<dyn Fn() -> Option<SegmentContext>>;
pub type FullSnapshotProvider = Box<dyn Fn(TimeStamp) -> Vec<Record>>;
/// Called with every segment handed to the transport
pub type SegmentSentCallback = Box<dyn Fn(&SegmentMetadata)>;

enum CollectionState {
    WaitingForInitialRecord { next_creation_reason: CreationReason },
    SegmentPending { segment: Segment, expiration: TimerId, generation: u64 },
    Stopped,
}

struct CollectionInner {
    doc: Document,
    limits: SegmentLimits,
    context: SegmentContextProvider,
    request: Rc<dyn HttpRequest>,
    encoder: DeflateEncoder,
    stats: Rc<RefCell<ReplayStats>>,
    state: RefCell<CollectionState>,
    generation: Cell<u64>,
    views_with_full_snapshot: RefCell<HashSet<String>>,
    full_snapshot: RefCell<Option<FullSnapshotProvider>>,
    on_segment_sent: RefCell<Option<SegmentSentCallback>>,
    subscriptions: RefCell<Vec<Subscription>>,
}

#[derive(Clone)]
pub struct SegmentCollection {
    inner: Rc<CollectionInner>,
}

impl std::fmt::Debug for SegmentCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.state.borrow() {
            CollectionState::WaitingForInitialRecord { .. } => "waiting",
            CollectionState::SegmentPending { .. } => "pending",
            CollectionState::Stopped => "stopped",
        };
        f.debug_struct("SegmentCollection").field("state", &state).finish()
    }
}

pub fn start_segment_collection(
    doc: &Document,
    lifecycle: &LifeCycle,
    limits: SegmentLimits,
    context: SegmentContextProvider,
    request: Rc<dyn HttpRequest>,
    encoder: DeflateEncoder,
    stats: Rc<RefCell<ReplayStats>>,
) -> SegmentCollection {
    let collection = SegmentCollection {
        inner: Rc::new(CollectionInner {
            doc: doc.clone(),
            limits,
            context,
            request,
            encoder,
            stats,
            state: RefCell::new(CollectionState::WaitingForInitialRecord {
                next_creation_reason: CreationReason::Init,
            }),
            generation: Cell::new(0),
            views_with_full_snapshot: RefCell::new(HashSet::new()),
            full_snapshot: RefCell::new(None),
            on_segment_sent: RefCell::new(None),
            subscriptions: RefCell::new(Vec::new()),
        }),
    };

    let weak = Rc::downgrade(&collection.inner);
    let view_created = lifecycle.subscribe(LifeCycleEventType::ViewCreated, move |_| {
        if let Some(collection) = upgrade(&weak) {
            collection.flush(FlushReason::Next(CreationReason::ViewChange));
        }
    });
    let weak = Rc::downgrade(&collection.inner);
    let page_exited = lifecycle.subscribe(LifeCycleEventType::PageExited, move |event| {
        if let (Some(collection), LifeCycleEvent::PageExited { reason }) = (upgrade(&weak), event) {
            collection.flush(FlushReason::Next((*reason).into()));
        }
    });
    collection
        .inner
        .subscriptions
        .borrow_mut()
        .extend([view_created, page_exited]);
    collection
}

fn upgrade(weak: &Weak<CollectionInner>) -> Option<SegmentCollection> {
    weak.upgrade().map(|inner| SegmentCollection { inner })
}

impl SegmentCollection {
    /// Source of full snapshots for segments opening on a view that has
    /// none yet
    pub fn set_full_snapshot_provider(&self, provider: impl Fn(TimeStamp) -> Vec<Record> + 'static) {
        *self.inner.full_snapshot.borrow_mut() = Some(Box::new(provider));
    }

    pub fn on_segment_sent(&self, callback: impl Fn(&SegmentMetadata) + 'static) {
        *self.inner.on_segment_sent.borrow_mut() = Some(Box::new(callback));
    }

    pub fn is_stopped(&self) -> bool {
        matches!(*self.inner.state.borrow(), CollectionState::Stopped)
    }

    pub fn has_pending_segment(&self) -> bool {
        matches!(*self.inner.state.borrow(), CollectionState::SegmentPending { .. })
    }

    pub fn add_record(&self, record: Record) {
        let creation_reason = match &*self.inner.state.borrow() {
            CollectionState::Stopped => return,
            CollectionState::WaitingForInitialRecord { next_creation_reason } => Some(*next_creation_reason),
            CollectionState::SegmentPending { .. } => None,
        };

        if let Some(creation_reason) = creation_reason {
            let Some(context) = (self.inner.context)() else {
                tracing::debug!("no segment context, dropping record");
                return;
            };
            let view_id = context.view_id().to_string();
            self.open_segment(context, creation_reason);

            let needs_snapshot = !self.inner.views_with_full_snapshot.borrow().contains(&view_id)
                && !matches!(record.record_type(), RecordType::Meta | RecordType::FullSnapshot);
            if needs_snapshot {
                let snapshot = self
                    .inner
                    .full_snapshot
                    .borrow()
                    .as_ref()
                    .map(|provider| provider(record.timestamp()));
                for snapshot_record in snapshot.into_iter().flatten() {
                    self.append(snapshot_record);
                }
            }
        }
        self.append(record);
    }

    fn open_segment(&self, context: SegmentContext, creation_reason: CreationReason) {
        let generation = self.inner.generation.get() + 1;
        self.inner.generation.set(generation);

        let weak = Rc::downgrade(&self.inner);
        let expiration = self.inner.doc.set_timeout(self.inner.limits.duration_ms, move |_| {
            if let Some(collection) = upgrade(&weak) {
                collection.flush_generation(generation, CreationReason::SegmentDurationLimit);
            }
        });
        let segment = Segment::new(
            self.inner.encoder.clone(),
            context,
            creation_reason,
            Rc::clone(&self.inner.stats),
        );
        *self.inner.state.borrow_mut() = CollectionState::SegmentPending {
            segment,
            expiration,
            generation,
        };
    }

    fn append(&self, record: Record) {
        let generation = self.inner.generation.get();
        let bytes_limit = self.inner.limits.bytes;
        let weak = Rc::downgrade(&self.inner);
        let mut state = self.inner.state.borrow_mut();
        let CollectionState::SegmentPending { segment, .. } = &mut *state else {
            return;
        };
        if record.record_type() == RecordType::FullSnapshot {
            self.inner
                .views_with_full_snapshot
                .borrow_mut()
                .insert(segment.metadata().context.view_id().to_string());
        }
        let added = segment.add_record(&record, move |encoded_bytes_count| {
            if encoded_bytes_count > bytes_limit {
                if let Some(collection) = upgrade(&weak) {
                    collection.flush_generation(generation, CreationReason::SegmentBytesLimit);
                }
            }
        });
        if let Err(err) = added {
            tracing::warn!(%err, "failed to add record to segment");
        }
    }

    /// Flush only if the segment that asked for it is still the current one
    fn flush_generation(&self, generation: u64, reason: CreationReason) {
        let current = matches!(
            &*self.inner.state.borrow(),
            CollectionState::SegmentPending { generation: g, .. } if *g == generation
        );
        if current {
            self.flush(FlushReason::Next(reason));
        }
    }

    pub fn flush(&self, reason: FlushReason) {
        let next = match reason {
            FlushReason::Next(next_creation_reason) => CollectionState::WaitingForInitialRecord { next_creation_reason },
            FlushReason::Stop => CollectionState::Stopped,
        };
        let previous = {
            let mut state = self.inner.state.borrow_mut();
            if matches!(*state, CollectionState::Stopped) {
                return;
            }
            std::mem::replace(&mut *state, next)
        };
        let CollectionState::SegmentPending {
            segment, expiration, ..
        } = previous
        else {
            return;
        };
        self.inner.doc.clear_timeout(expiration);

        let on_exit = matches!(reason, FlushReason::Next(r) if r.is_page_exit());
        let weak = Rc::downgrade(&self.inner);
        let flushed = segment.flush(move |metadata, result| {
            let Some(collection) = upgrade(&weak) else {
                return;
            };
            match build_replay_payload(result.output, &metadata, result.raw_bytes_count) {
                Ok(payload) => {
                    tracing::debug!(
                        view_id = metadata.context.view_id(),
                        records = metadata.records_count,
                        bytes = payload.bytes_count,
                        "sending segment"
                    );
                    if on_exit {
                        collection.inner.request.send_on_exit(payload);
                    } else {
                        collection.inner.request.send(payload);
                    }
                    if let Some(callback) = collection.inner.on_segment_sent.borrow().as_ref() {
                        callback(&metadata);
                    }
                }
                Err(err) => tracing::warn!(%err, "failed to build replay payload"),
            }
        });
        if let Err(err) = flushed {
            tracing::warn!(%err, "segment dropped");
        }
    }

    /// Flush the current segment and refuse further records
    pub fn stop(&self) {
        self.flush(FlushReason::Stop);
        for subscription in self.inner.subscriptions.borrow_mut().drain(..) {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{PageExitReason, ViewCreated};
    use crate::records::FocusData;
    use crate::transport::Payload;
    use replay_worker::DeflateWorker;
    use std::io::Read;
    use std::time::Duration;

    #[derive(Default)]
    struct Sent {
        payloads: RefCell<Vec<(Payload, bool)>>,
    }

    impl HttpRequest for Sent {
        fn send(&self, payload: Payload) {
            self.payloads.borrow_mut().push((payload, false));
        }

        fn send_on_exit(&self, payload: Payload) {
            self.payloads.borrow_mut().push((payload, true));
        }
    }

    struct Fixture {
        doc: Document,
        lifecycle: LifeCycle,
        encoder: DeflateEncoder,
        sent: Rc<Sent>,
        view: Rc<RefCell<Option<String>>>,
        collection: SegmentCollection,
    }

    impl Fixture {
        fn new(limits: SegmentLimits) -> Self {
            let doc = Document::new("https://example.com/");
            let lifecycle = LifeCycle::new();
            let encoder = DeflateEncoder::new(Rc::new(DeflateWorker::start().unwrap()), 1);
            let sent = Rc::new(Sent::default());
            let view = Rc::new(RefCell::new(Some("view-1".to_string())));
            let current = Rc::clone(&view);
            let collection = start_segment_collection(
                &doc,
                &lifecycle,
                limits,
                Rc::new(move || {
                    current
                        .borrow()
                        .as_ref()
                        .map(|view| SegmentContext::new("app", "session", view))
                }),
                Rc::clone(&sent) as Rc<dyn HttpRequest>,
                encoder.clone(),
                Rc::new(RefCell::new(ReplayStats::new())),
            );
            Self {
                doc,
                lifecycle,
                encoder,
                sent,
                view,
                collection,
            }
        }

        fn settle(&self) {
            assert!(self.encoder.wait_idle(Duration::from_secs(5)));
        }

        fn events(&self) -> Vec<(serde_json::Value, bool)> {
            self.sent
                .payloads
                .borrow()
                .iter()
                .map(|(payload, on_exit)| {
                    let event = serde_json::from_slice(&payload.part("event").unwrap().data).unwrap();
                    (event, *on_exit)
                })
                .collect()
        }

        fn bodies(&self) -> Vec<serde_json::Value> {
            self.sent
                .payloads
                .borrow()
                .iter()
                .map(|(payload, _)| {
                    let mut raw = String::new();
                    flate2::read::ZlibDecoder::new(&payload.part("segment").unwrap().data[..])
                        .read_to_string(&mut raw)
                        .unwrap();
                    serde_json::from_str(&raw).unwrap()
                })
                .collect()
        }
    }

    fn focus(timestamp: TimeStamp) -> Record {
        Record::Focus {
            timestamp,
            data: FocusData { has_focus: true },
        }
    }

    #[test]
    fn test_duration_limit() {
        let fx = Fixture::new(SegmentLimits::default());
        fx.collection.add_record(focus(1));
        fx.collection.add_record(focus(2));
        fx.doc.advance_time(SEGMENT_DURATION_LIMIT_MS);
        fx.settle();

        fx.collection.add_record(focus(3));
        fx.collection.stop();
        fx.settle();

        let events = fx.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0["creation_reason"], "init");
        assert_eq!(events[0].0["records_count"], 2);
        assert_eq!(events[1].0["creation_reason"], "segment_duration_limit");
        assert_eq!(events[1].0["records_count"], 1);
    }

    #[test]
    fn test_view_change_and_page_exit() {
        let fx = Fixture::new(SegmentLimits::default());
        fx.collection.add_record(focus(1));
        *fx.view.borrow_mut() = Some("view-2".to_string());
        fx.lifecycle.notify(LifeCycleEvent::ViewCreated(ViewCreated {
            id: "view-2".into(),
            start_timestamp: 2,
        }));
        fx.collection.add_record(focus(3));
        fx.lifecycle.notify(LifeCycleEvent::PageExited {
            reason: PageExitReason::VisibilityHidden,
        });
        fx.settle();

        let events = fx.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0["view"]["id"], "view-1");
        assert!(!events[0].1);
        assert_eq!(events[1].0["view"]["id"], "view-2");
        assert_eq!(events[1].0["creation_reason"], "view_change");
        assert!(events[1].1);
    }

    #[test]
    fn test_bytes_limit() {
        let fx = Fixture::new(SegmentLimits {
            bytes: 10,
            ..SegmentLimits::default()
        });
        for timestamp in 1..=3 {
            fx.collection.add_record(focus(timestamp));
        }
        fx.settle();
        // The compressed size crossed the limit: segment closed
        assert!(!fx.collection.has_pending_segment());
        fx.settle();

        fx.collection.add_record(focus(4));
        fx.collection.add_record(focus(5));
        fx.collection.stop();
        fx.settle();

        let events = fx.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0["creation_reason"], "init");
        assert_eq!(events[1].0["creation_reason"], "segment_bytes_limit");
        let bodies = fx.bodies();
        for ((event, _), (body, expected)) in events.iter().zip(bodies.iter().zip([3, 2])) {
            assert_eq!(event["records_count"], expected);
            assert_eq!(body["records"].as_array().unwrap().len(), expected);
        }
        assert_eq!(bodies[1]["records"][0]["timestamp"], 4);
    }

    #[test]
    fn test_no_context_drops_records() {
        let fx = Fixture::new(SegmentLimits::default());
        *fx.view.borrow_mut() = None;
        fx.collection.add_record(focus(1));
        assert!(!fx.collection.has_pending_segment());
        assert!(fx.encoder.is_empty());
    }

    #[test]
    fn test_full_snapshot_injected_for_new_view() {
        let fx = Fixture::new(SegmentLimits::default());
        fx.collection.set_full_snapshot_provider(|timestamp| {
            vec![Record::Meta {
                timestamp,
                data: crate::records::MetaData {
                    href: "https://example.com/".into(),
                    width: 1,
                    height: 1,
                },
            }]
        });
        fx.collection.add_record(focus(9));
        fx.collection.stop();
        fx.settle();

        let events = fx.events();
        assert_eq!(events[0].0["records_count"], 2);
        assert_eq!(events[0].0["start"], 9);
    }

    #[test]
    fn test_stopped_refuses_records() {
        let fx = Fixture::new(SegmentLimits::default());
        fx.collection.stop();
        fx.collection.add_record(focus(1));
        assert!(fx.collection.is_stopped());
        assert!(fx.encoder.is_empty());
        assert_eq!(fx.lifecycle.subscriber_count(), 0);
    }
}
