//! Deflate encoder
//!
//! Caller side of the compression worker protocol for one `streamId`. Writes
//! are posted immediately and answered later; answers are matched against a
//! FIFO of pending actions by write id. Responses are picked up by
//! [`DeflateEncoder::process_responses`] (non-blocking) or
//! [`DeflateEncoder::wait_idle`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use replay_worker::{DeflateWorker, WorkerRequest, WorkerResponse};

/// Compressed output of everything written since the last finish
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncoderResult {
    /// Complete zlib stream (empty when nothing was written)
    pub output: Vec<u8>,
    pub raw_bytes_count: usize,
    pub output_bytes_count: usize,
}

/// Result of [`DeflateEncoder::finish_sync`]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EncoderSyncResult {
    pub result: EncoderResult,
    /// Data posted but not compressed yet
    pub pending_data: String,
}

enum ActionCallback {
    Write(Box<dyn FnOnce(usize)>),
    Finish(Box<dyn FnOnce(EncoderResult)>),
    Discarded,
}

struct PendingAction {
    id: u64,
    /// Stream generation the write belongs to
    generation: u64,
    data: String,
    callback: ActionCallback,
}

#[derive(Default)]
struct EncoderState {
    raw_bytes_count: usize,
    compressed: Vec<Vec<u8>>,
    trailer: Vec<u8>,
    next_write_id: u64,
    /// Bumped every time the worker stream is reset
    generation: u64,
    pending: VecDeque<PendingAction>,
    stopped: bool,
    failures: u64,
}

impl EncoderState {
    fn consume_result(&mut self) -> EncoderResult {
        let mut output = Vec::new();
        if !self.compressed.is_empty() {
            for chunk in self.compressed.drain(..) {
                output.extend_from_slice(&chunk);
            }
            output.extend_from_slice(&self.trailer);
        }
        let result = EncoderResult {
            output_bytes_count: output.len(),
            output,
            raw_bytes_count: self.raw_bytes_count,
        };
        self.raw_bytes_count = 0;
        self.trailer.clear();
        result
    }

    /// Whether the compressed chunks held so far belong to `generation`.
    /// Answers are handled in FIFO order, so they belong to the generation
    /// of the oldest write still in flight.
    fn holds_output_of(&self, generation: u64) -> bool {
        self.pending.front().is_none_or(|action| action.generation == generation)
    }

    fn clear_output(&mut self) {
        self.compressed.clear();
        self.trailer.clear();
        self.raw_bytes_count = 0;
    }

    /// Swallow the answers of every write of `generation` still in flight
    fn abandon(&mut self, generation: u64) -> String {
        let mut data = String::new();
        for action in self.pending.iter_mut().filter(|a| a.generation == generation) {
            action.callback = ActionCallback::Discarded;
            action.id |= DISCARDED_FLAG;
            data.push_str(&std::mem::take(&mut action.data));
        }
        data
    }
}

/// Streaming encoder over the deflate worker
#[derive(Clone)]
pub struct DeflateEncoder {
    worker: Rc<DeflateWorker>,
    stream_id: u64,
    state: Rc<RefCell<EncoderState>>,
}

impl std::fmt::Debug for DeflateEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.borrow();
        f.debug_struct("DeflateEncoder")
            .field("stream_id", &self.stream_id)
            .field("generation", &state.generation)
            .field("next_write_id", &state.next_write_id)
            .field("pending", &state.pending.len())
            .finish()
    }
}

impl DeflateEncoder {
    pub fn new(worker: Rc<DeflateWorker>, stream_id: u64) -> Self {
        Self {
            worker,
            stream_id,
            state: Rc::new(RefCell::new(EncoderState::default())),
        }
    }

    pub fn stream_id(&self) -> u64 {
        self.stream_id
    }

    /// Generation of the stream being written. It changes on every finish,
    /// discard or compression failure of the current stream, so a writer
    /// that sees it change knows its stream is gone.
    pub fn generation(&self) -> u64 {
        self.state.borrow().generation
    }

    /// Nothing written since the last finish
    pub fn is_empty(&self) -> bool {
        self.state.borrow().next_write_id == 0
    }

    /// Number of writes still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    /// Compression failures seen on this stream so far
    pub fn failure_count(&self) -> u64 {
        self.state.borrow().failures
    }

    /// Post `data`; `callback` receives the compressed size of this write
    pub fn write(&self, data: String, callback: impl FnOnce(usize) + 'static) {
        self.post_write(data, ActionCallback::Write(Box::new(callback)));
    }

    /// Post `data` without caring about its compressed size
    pub fn write_silently(&self, data: String) {
        self.post_write(data, ActionCallback::Discarded);
    }

    fn post_write(&self, data: String, callback: ActionCallback) {
        let (id, generation) = {
            let mut state = self.state.borrow_mut();
            let id = state.next_write_id;
            state.next_write_id += 1;
            (id, state.generation)
        };
        let request = WorkerRequest::Write {
            id,
            stream_id: self.stream_id,
            data: data.clone(),
        };
        if let Err(err) = self.worker.post(request) {
            tracing::error!(stream_id = self.stream_id, %err, "failed to post write to deflate worker");
            self.fail(generation);
            return;
        }
        self.state.borrow_mut().pending.push_back(PendingAction {
            id,
            generation,
            data,
            callback,
        });
    }

    /// Close the current stream. `callback` receives the whole compressed
    /// stream once every pending write is answered.
    pub fn finish(&self, callback: impl FnOnce(EncoderResult) + 'static) {
        let generation = self.send_reset_if_needed();
        let mut state = self.state.borrow_mut();
        let last_is_ours = state.pending.back().is_some_and(|a| a.generation == generation);
        if !last_is_ours {
            let result = if state.holds_output_of(generation) {
                state.consume_result()
            } else {
                EncoderResult::default()
            };
            drop(state);
            callback(result);
            return;
        }
        for action in state.pending.iter_mut().filter(|a| a.generation == generation) {
            if matches!(action.callback, ActionCallback::Write(_)) {
                action.callback = ActionCallback::Discarded;
            }
        }
        if let Some(last) = state.pending.back_mut() {
            last.callback = ActionCallback::Finish(Box::new(callback));
        }
    }

    /// Close the current stream now: what is compressed so far plus the data
    /// still in flight, uncompressed
    pub fn finish_sync(&self) -> EncoderSyncResult {
        let generation = self.send_reset_if_needed();
        let mut state = self.state.borrow_mut();
        let result = if state.holds_output_of(generation) {
            state.consume_result()
        } else {
            EncoderResult::default()
        };
        // Answers for these writes must not leak into the next stream
        let pending_data = state.abandon(generation);
        EncoderSyncResult { result, pending_data }
    }

    /// Stop listening for responses
    pub fn stop(&self) {
        let mut state = self.state.borrow_mut();
        state.stopped = true;
        state.pending.clear();
    }

    /// Drop the current stream and everything in flight for it
    pub fn discard(&self) {
        let generation = self.send_reset_if_needed();
        let mut state = self.state.borrow_mut();
        if state.holds_output_of(generation) {
            state.clear_output();
        }
        state.abandon(generation);
    }

    /// Ends the current stream if anything was written to it. Returns the
    /// generation that was current before the call.
    fn send_reset_if_needed(&self) -> u64 {
        let (had_writes, generation) = {
            let mut state = self.state.borrow_mut();
            let had_writes = std::mem::replace(&mut state.next_write_id, 0) > 0;
            let generation = state.generation;
            if had_writes {
                state.generation += 1;
            }
            (had_writes, generation)
        };
        if had_writes {
            if let Err(err) = self.worker.post(WorkerRequest::Reset {
                stream_id: self.stream_id,
            }) {
                tracing::warn!(stream_id = self.stream_id, %err, "failed to reset deflate stream");
            }
        }
        generation
    }

    /// Give up on `generation`. Writes of later generations are untouched.
    fn fail(&self, generation: u64) {
        let current = {
            let mut state = self.state.borrow_mut();
            state.failures += 1;
            if state.holds_output_of(generation) {
                state.clear_output();
            }
            state.abandon(generation);
            state.generation == generation
        };
        if current {
            // Later writes of the failed stream must not reach a fresh one
            self.send_reset_if_needed();
        }
    }

    /// Handle every response already available. Returns how many were
    /// handled.
    pub fn process_responses(&self) -> usize {
        let mut handled = 0;
        loop {
            if self.state.borrow().stopped {
                return handled;
            }
            match self.worker.try_recv() {
                Ok(Some(response)) => {
                    self.handle_response(response);
                    handled += 1;
                }
                Ok(None) => return handled,
                Err(err) => {
                    tracing::warn!(stream_id = self.stream_id, %err, "deflate worker is gone");
                    self.stop();
                    return handled;
                }
            }
        }
    }

    /// Block until every pending write is answered or `timeout` elapses.
    /// Returns whether the encoder is idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let state = self.state.borrow();
                if state.pending.is_empty() {
                    return true;
                }
                if state.stopped {
                    return false;
                }
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            match self.worker.recv_timeout(remaining) {
                Ok(Some(response)) => self.handle_response(response),
                Ok(None) => return false,
                Err(err) => {
                    tracing::warn!(stream_id = self.stream_id, %err, "deflate worker is gone");
                    self.stop();
                    return false;
                }
            }
        }
    }

    pub(crate) fn handle_response(&self, response: WorkerResponse) {
        match response {
            WorkerResponse::Wrote {
                id,
                stream_id,
                result,
                trailer,
                additional_bytes_count,
            } if stream_id == self.stream_id => {
                self.handle_wrote(id, result, trailer, additional_bytes_count)
            }
            WorkerResponse::Errored {
                error,
                stream_id: Some(stream_id),
            } if stream_id == self.stream_id => {
                // The failed write is the oldest one in flight
                let failed = {
                    let mut state = self.state.borrow_mut();
                    let failed = state.pending.pop_front();
                    if failed.is_some() {
                        state.clear_output();
                    }
                    failed
                };
                let Some(failed) = failed else {
                    tracing::warn!(stream_id, %error, "deflate worker failed with nothing in flight");
                    return;
                };
                tracing::error!(
                    stream_id,
                    generation = failed.generation,
                    %error,
                    "deflate worker failed, dropping stream"
                );
                self.fail(failed.generation);
            }
            WorkerResponse::Initialized { version } => {
                tracing::debug!(%version, "deflate worker initialized");
            }
            other => {
                tracing::debug!(stream_id = ?other.stream_id(), "ignoring response for another stream");
            }
        }
    }

    fn handle_wrote(&self, id: u64, result: Vec<u8>, trailer: Vec<u8>, additional_bytes_count: usize) {
        let mut state = self.state.borrow_mut();
        let Some(action) = state.pending.pop_front() else {
            drop(state);
            self.out_of_order(id);
            return;
        };
        if action.id & DISCARDED_FLAG != 0 {
            if action.id & !DISCARDED_FLAG != id {
                drop(state);
                self.out_of_order(id);
            }
            return;
        }
        if action.id != id {
            drop(state);
            self.out_of_order(id);
            return;
        }

        let compressed_len = result.len();
        state.raw_bytes_count += additional_bytes_count;
        state.compressed.push(result);
        state.trailer = trailer;
        match action.callback {
            ActionCallback::Write(callback) => {
                drop(state);
                callback(compressed_len);
            }
            ActionCallback::Finish(callback) => {
                let result = state.consume_result();
                drop(state);
                callback(result);
            }
            ActionCallback::Discarded => {}
        }
    }

    fn out_of_order(&self, id: u64) {
        tracing::warn!(stream_id = self.stream_id, id, "worker responses received out of order");
        self.stop();
    }
}

/// Marks writes whose answers belong to an abandoned stream
const DISCARDED_FLAG: u64 = 1 << 63;
