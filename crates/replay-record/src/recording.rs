//! Recording entry point
//!
//! Wires the recorder, the segment collection and the deflate encoder for one
//! page. The segment collection subscribes to the life cycle before the
//! recorder does, so a view change closes the old segment before the new
//! view's full snapshot is emitted.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use std::time::Duration;

use replay_dom::{Document, TimerId};
use replay_worker::{DeflateWorker, WorkerRequest};
use serde::Serialize;

use crate::config::RecorderConfig;
use crate::encoder::DeflateEncoder;
use crate::lifecycle::{observe_page_exit, LifeCycle, LifeCycleEventType, Subscription};
use crate::observers::{ListenerTracker, Tracker};
use crate::privacy::AttributePrivacyPolicy;
use crate::recorder::{record, Recorder};
use crate::records::Record;
use crate::replay_stats::{ReplayStats, ViewReplayStats};
use crate::scope::RecordScope;
use crate::segment::{IdRef, SegmentContext};
use crate::segment_collection::{start_segment_collection, SegmentCollection, SegmentLimits};
use crate::transport::{Batch, HttpRequest};
use crate::RecordError;

/// How often the page scheduler picks up worker responses
pub const WORKER_POLL_INTERVAL_MS: f64 = 100.0;

/// Session and view the page currently belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewContext {
    pub session_id: String,
    pub view_id: String,
}

impl ViewContext {
    pub fn new(session_id: &str, view_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            view_id: view_id.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ReplayStatsUpdate<'a> {
    view: &'a IdRef,
    #[serde(rename = "_dd")]
    dd: ReplayStatsInternal,
}

#[derive(Serialize)]
struct ReplayStatsInternal {
    replay_stats: ViewReplayStats,
}

/// A running session replay recording
pub struct Recording {
    recorder: Rc<Recorder>,
    collection: SegmentCollection,
    encoder: DeflateEncoder,
    stats: Rc<RefCell<ReplayStats>>,
    lifecycle: LifeCycle,
    page_exit: ListenerTracker,
    stats_batch: Rc<RefCell<Option<Batch>>>,
    stats_flush: RefCell<Option<Subscription>>,
    poll: Rc<WorkerPoll>,
    stopped: Cell<bool>,
}

/// Picks up worker responses from the page scheduler so segments are sent
/// without the host asking. Keeps going after stop until the last segment
/// is out.
struct WorkerPoll {
    doc: Document,
    encoder: DeflateEncoder,
    timer: Cell<Option<TimerId>>,
    stopping: Cell<bool>,
}

impl WorkerPoll {
    fn schedule(self: &Rc<Self>) {
        let weak: Weak<Self> = Rc::downgrade(self);
        let timer = self.doc.set_timeout(WORKER_POLL_INTERVAL_MS, move |_| {
            let Some(poll) = weak.upgrade() else {
                return;
            };
            poll.timer.set(None);
            poll.encoder.process_responses();
            let done = poll.stopping.get() && poll.encoder.pending_count() == 0;
            if !done {
                poll.schedule();
            }
        });
        self.timer.set(Some(timer));
    }

    fn cancel(&self) {
        if let Some(timer) = self.timer.take() {
            self.doc.clear_timeout(timer);
        }
    }
}

impl std::fmt::Debug for Recording {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recording")
            .field("recorder", &self.recorder)
            .field("collection", &self.collection)
            .field("stopped", &self.stopped.get())
            .finish()
    }
}

/// Start recording `doc`. Segments are compressed on `worker` and handed to
/// `request`; `view_context` tells which session and view they belong to.
pub fn start_recording(
    doc: &Document,
    lifecycle: &LifeCycle,
    config: &RecorderConfig,
    view_context: impl Fn() -> Option<ViewContext> + 'static,
    request: Rc<dyn HttpRequest>,
    worker: Rc<DeflateWorker>,
) -> Result<Recording, RecordError> {
    worker.post(WorkerRequest::Init)?;

    let application_id = config.application_id.clone();
    let context = Rc::new(move || {
        view_context().map(|view| SegmentContext::new(&application_id, &view.session_id, &view.view_id))
    });

    let encoder = DeflateEncoder::new(worker, config.stream_id);
    let stats = Rc::new(RefCell::new(ReplayStats::new()));
    let collection = start_segment_collection(
        doc,
        lifecycle,
        SegmentLimits {
            duration_ms: config.segment_duration_limit_ms,
            bytes: config.segment_bytes_limit,
        },
        context.clone(),
        request,
        encoder.clone(),
        Rc::clone(&stats),
    );

    let stats_batch: Rc<RefCell<Option<Batch>>> = Rc::new(RefCell::new(None));
    let sent_stats = Rc::clone(&stats);
    let sent_batch = Rc::clone(&stats_batch);
    collection.on_segment_sent(move |metadata| {
        let batch = sent_batch.borrow().clone();
        let Some(batch) = batch else {
            return;
        };
        let Some(replay_stats) = sent_stats.borrow().get(metadata.context.view_id()) else {
            return;
        };
        let update = ReplayStatsUpdate {
            view: &metadata.context.view,
            dd: ReplayStatsInternal { replay_stats },
        };
        if let Err(err) = batch.upsert(&update, metadata.context.view_id()) {
            tracing::warn!(%err, "failed to report replay stats");
        }
    });

    let emit_collection = collection.clone();
    let emit_stats = Rc::clone(&stats);
    let emit_context = context;
    let recorder = Rc::new(record(
        doc,
        lifecycle,
        RecordScope::new(AttributePrivacyPolicy::new(config.default_privacy_level)),
        Rc::new(move |record: Record| {
            if let Some(context) = emit_context() {
                emit_stats.borrow_mut().add_record(context.view_id());
            }
            emit_collection.add_record(record);
        }),
    ));

    let snapshot_recorder = Rc::downgrade(&recorder);
    collection.set_full_snapshot_provider(move |timestamp| {
        snapshot_recorder
            .upgrade()
            .map(|recorder| recorder.take_full_snapshot(timestamp))
            .unwrap_or_default()
    });

    let page_exit = observe_page_exit(doc, lifecycle);
    let poll = Rc::new(WorkerPoll {
        doc: doc.clone(),
        encoder: encoder.clone(),
        timer: Cell::new(None),
        stopping: Cell::new(false),
    });
    poll.schedule();
    tracing::debug!(stream_id = config.stream_id, "recording started");

    Ok(Recording {
        recorder,
        collection,
        encoder,
        stats,
        lifecycle: lifecycle.clone(),
        page_exit,
        stats_batch,
        stats_flush: RefCell::new(None),
        poll,
        stopped: Cell::new(false),
    })
}

impl Recording {
    /// Upsert each view's replay stats into `batch` whenever one of its
    /// segments is sent. The batch is flushed when the page exits.
    pub fn report_stats_to(&self, batch: Batch) {
        let on_exit = batch.clone();
        *self.stats_batch.borrow_mut() = Some(batch);
        let subscription = self
            .lifecycle
            .subscribe(LifeCycleEventType::PageExited, move |_| on_exit.flush_on_exit());
        if let Some(previous) = self.stats_flush.borrow_mut().replace(subscription) {
            previous.unsubscribe();
        }
    }

    pub fn stats(&self, view_id: &str) -> Option<ViewReplayStats> {
        self.stats.borrow().get(view_id)
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn segments(&self) -> &SegmentCollection {
        &self.collection
    }

    /// Handle the worker responses already available
    pub fn process_worker_responses(&self) -> usize {
        self.encoder.process_responses()
    }

    /// Block until the worker answered every write, at most `timeout`
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.encoder.wait_idle(timeout)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    /// Stop observing and flush the current segment. The segment is sent
    /// once the worker has compressed it, picked up by the page scheduler or
    /// by `process_worker_responses`/`wait_idle`.
    pub fn stop(&self) {
        if self.stopped.replace(true) {
            return;
        }
        self.recorder.stop();
        self.page_exit.stop();
        self.collection.stop();
        self.poll.stopping.set(true);
        if let Some(subscription) = self.stats_flush.borrow_mut().take() {
            subscription.unsubscribe();
        }
        tracing::debug!("recording stopped");
    }
}

impl Drop for Recording {
    fn drop(&mut self) {
        self.stop();
        self.poll.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{LifeCycleEvent, ViewCreated};
    use crate::transport::{Payload, PayloadBody};
    use replay_dom::VisibilityState;

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

    fn start(doc: &Document, lifecycle: &LifeCycle, view: &Rc<RefCell<String>>) -> (Recording, Rc<Sent>) {
        let sent = Rc::new(Sent::default());
        let current = Rc::clone(view);
        let recording = start_recording(
            doc,
            lifecycle,
            &RecorderConfig::new("app"),
            move || Some(ViewContext::new("session", &current.borrow())),
            Rc::clone(&sent) as Rc<dyn HttpRequest>,
            Rc::new(DeflateWorker::start().unwrap()),
        )
        .unwrap();
        (recording, sent)
    }

    fn event(payload: &Payload) -> serde_json::Value {
        serde_json::from_slice(&payload.part("event").unwrap().data).unwrap()
    }

    #[test]
    fn test_initial_segment_has_full_snapshot() {
        let doc = Document::new("https://example.com/");
        let lifecycle = LifeCycle::new();
        let view = Rc::new(RefCell::new("view-1".to_string()));
        let (recording, sent) = start(&doc, &lifecycle, &view);

        recording.stop();
        assert!(recording.wait_idle(Duration::from_secs(5)));

        let payloads = sent.payloads.borrow();
        assert_eq!(payloads.len(), 1);
        let event = event(&payloads[0].0);
        assert_eq!(event["has_full_snapshot"], true);
        assert_eq!(event["creation_reason"], "init");
        assert_eq!(event["application"]["id"], "app");
        assert_eq!(event["session"]["id"], "session");
        assert_eq!(recording.stats("view-1").unwrap().segments_count, 1);
    }

    #[test]
    fn test_view_change_splits_segments() {
        let doc = Document::new("https://example.com/");
        let lifecycle = LifeCycle::new();
        let view = Rc::new(RefCell::new("view-1".to_string()));
        let (recording, sent) = start(&doc, &lifecycle, &view);

        *view.borrow_mut() = "view-2".to_string();
        lifecycle.notify(LifeCycleEvent::ViewCreated(ViewCreated {
            id: "view-2".into(),
            start_timestamp: 10,
        }));
        recording.stop();
        assert!(recording.wait_idle(Duration::from_secs(5)));

        let payloads = sent.payloads.borrow();
        assert_eq!(payloads.len(), 2);
        let second = event(&payloads[1].0);
        assert_eq!(second["view"]["id"], "view-2");
        assert_eq!(second["creation_reason"], "view_change");
        assert_eq!(second["has_full_snapshot"], true);
    }

    #[test]
    fn test_hidden_page_sends_on_exit_and_reports_stats() {
        let doc = Document::new("https://example.com/");
        let lifecycle = LifeCycle::new();
        let view = Rc::new(RefCell::new("view-1".to_string()));
        let (recording, sent) = start(&doc, &lifecycle, &view);
        let stats_sent = Rc::new(Sent::default());
        recording.report_stats_to(Batch::new(
            &doc,
            Default::default(),
            Rc::clone(&stats_sent) as Rc<dyn HttpRequest>,
        ));

        doc.set_visibility(VisibilityState::Hidden);
        assert!(recording.wait_idle(Duration::from_secs(5)));
        assert!(sent.payloads.borrow()[0].1);

        doc.set_visibility(VisibilityState::Visible);
        doc.set_visibility(VisibilityState::Hidden);
        let stats = stats_sent.payloads.borrow();
        let PayloadBody::Text(body) = &stats[0].0.body else {
            panic!("stats are sent as text");
        };
        let value: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(value["view"]["id"], "view-1");
        assert_eq!(value["_dd"]["replay_stats"]["segments_count"], 1);
        assert_eq!(stats[0].1, true);
    }

    #[test]
    fn test_scheduler_sends_segments_without_host() {
        let doc = Document::new("https://example.com/");
        let lifecycle = LifeCycle::new();
        let view = Rc::new(RefCell::new("view-1".to_string()));
        let (recording, sent) = start(&doc, &lifecycle, &view);
        recording.stop();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while sent.payloads.borrow().is_empty() && std::time::Instant::now() < deadline {
            doc.advance_time(WORKER_POLL_INTERVAL_MS);
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(sent.payloads.borrow().len(), 1);
        // Nothing left in flight, so polling ends
        doc.advance_time(WORKER_POLL_INTERVAL_MS);
        assert_eq!(doc.pending_timers(), 0);
    }

    #[test]
    fn test_drop_cancels_polling() {
        let doc = Document::new("https://example.com/");
        let lifecycle = LifeCycle::new();
        let view = Rc::new(RefCell::new("view-1".to_string()));
        let (recording, _sent) = start(&doc, &lifecycle, &view);
        assert!(doc.pending_timers() > 0);
        drop(recording);
        assert_eq!(doc.pending_timers(), 0);
    }

    #[test]
    fn test_stop_detaches() {
        let doc = Document::new("https://example.com/");
        let lifecycle = LifeCycle::new();
        let view = Rc::new(RefCell::new("view-1".to_string()));
        let (recording, _sent) = start(&doc, &lifecycle, &view);
        recording.stop();
        recording.stop();
        assert!(recording.is_stopped());
        assert_eq!(doc.listener_count(), 0);
        assert_eq!(lifecycle.subscriber_count(), 0);
    }
}
