//! Message batch
//!
//! Buffers JSON messages, newline separated, and hands them to an
//! [`HttpRequest`] when a count, size or time threshold is hit. Upserted
//! messages replace the previous message with the same key.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use replay_dom::{Document, TimerId};
use serde::Serialize;

use super::{HttpRequest, Payload, PayloadBody};
use crate::config::BatchConfig;
use crate::RecordError;

#[derive(Default)]
struct BatchState {
    messages: Vec<String>,
    upserts: Vec<(String, String)>,
    bytes_count: usize,
    timer: Option<TimerId>,
}

impl BatchState {
    fn message_count(&self) -> usize {
        self.messages.len() + self.upserts.len()
    }
}

struct BatchInner {
    doc: Document,
    config: BatchConfig,
    request: Rc<dyn HttpRequest>,
    state: RefCell<BatchState>,
}

#[derive(Clone)]
pub struct Batch {
    inner: Rc<BatchInner>,
}

impl std::fmt::Debug for Batch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Batch")
            .field("messages", &state.message_count())
            .field("bytes_count", &state.bytes_count)
            .finish()
    }
}

impl Batch {
    pub fn new(doc: &Document, config: BatchConfig, request: Rc<dyn HttpRequest>) -> Self {
        Self {
            inner: Rc::new(BatchInner {
                doc: doc.clone(),
                config,
                request,
                state: RefCell::new(BatchState::default()),
            }),
        }
    }

    pub fn add(&self, message: &impl Serialize) -> Result<(), RecordError> {
        self.add_or_update(message, None)
    }

    pub fn upsert(&self, message: &impl Serialize, key: &str) -> Result<(), RecordError> {
        self.add_or_update(message, Some(key))
    }

    pub fn message_count(&self) -> usize {
        self.inner.state.borrow().message_count()
    }

    pub fn bytes_count(&self) -> usize {
        self.inner.state.borrow().bytes_count
    }

    /// Send everything buffered
    pub fn flush(&self) {
        if let Some(payload) = self.take_payload() {
            self.inner.request.send(payload);
        }
    }

    /// Send everything buffered while the page is going away
    pub fn flush_on_exit(&self) {
        if let Some(payload) = self.take_payload() {
            self.inner.request.send_on_exit(payload);
        }
    }

    fn add_or_update(&self, message: &impl Serialize, key: Option<&str>) -> Result<(), RecordError> {
        let serialized = serde_json::to_string(message)?;
        let message_bytes = serialized.len();
        if message_bytes >= self.inner.config.message_bytes_limit {
            tracing::warn!(
                bytes = message_bytes,
                limit = self.inner.config.message_bytes_limit,
                "discarding message over the batch size limit"
            );
            return Err(RecordError::MessageTooLarge {
                bytes: message_bytes,
                limit: self.inner.config.message_bytes_limit,
            });
        }

        if let Some(key) = key {
            self.remove_upsert(key);
        }
        if self.bytes_count() + message_bytes >= self.inner.config.bytes_limit {
            self.flush();
        }

        {
            let mut state = self.inner.state.borrow_mut();
            if state.message_count() > 0 {
                state.bytes_count += 1;
            }
            state.bytes_count += message_bytes;
            match key {
                Some(key) => state.upserts.push((key.to_string(), serialized)),
                None => state.messages.push(serialized),
            }
        }
        self.schedule_flush();

        let (count, bytes) = {
            let state = self.inner.state.borrow();
            (state.message_count(), state.bytes_count)
        };
        if count >= self.inner.config.messages_limit || bytes >= self.inner.config.bytes_limit {
            self.flush();
        }
        Ok(())
    }

    fn remove_upsert(&self, key: &str) {
        let mut state = self.inner.state.borrow_mut();
        if let Some(index) = state.upserts.iter().position(|(k, _)| k == key) {
            let (_, removed) = state.upserts.remove(index);
            let separator = usize::from(state.message_count() > 0);
            state.bytes_count = state.bytes_count.saturating_sub(removed.len() + separator);
        }
    }

    fn schedule_flush(&self) {
        if self.inner.state.borrow().timer.is_some() {
            return;
        }
        let weak: Weak<BatchInner> = Rc::downgrade(&self.inner);
        let timer = self
            .inner
            .doc
            .set_timeout(self.inner.config.flush_timeout_ms, move |_| {
                if let Some(inner) = weak.upgrade() {
                    inner.state.borrow_mut().timer = None;
                    Batch { inner }.flush();
                }
            });
        self.inner.state.borrow_mut().timer = Some(timer);
    }

    fn take_payload(&self) -> Option<Payload> {
        let state = std::mem::take(&mut *self.inner.state.borrow_mut());
        if let Some(timer) = state.timer {
            self.inner.doc.clear_timeout(timer);
        }
        if state.message_count() == 0 {
            return None;
        }
        let data = state
            .messages
            .into_iter()
            .chain(state.upserts.into_iter().map(|(_, message)| message))
            .collect::<Vec<_>>()
            .join("\n");
        Some(Payload {
            bytes_count: data.len(),
            body: PayloadBody::Text(data),
        })
    }
}
