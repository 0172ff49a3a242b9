//! Deflate worker thread
//!
//! Requests are handled strictly in the order they were posted, so responses
//! for one stream come back in submission order.

use std::collections::HashMap;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};

use crate::protocol::{WorkerRequest, WorkerResponse};
use crate::stream::DeflateStream;
use crate::WorkerError;

/// Reported in the `initialized` response
pub const WORKER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Per-stream compression state, keyed by `streamId`
#[derive(Debug, Default)]
pub struct WorkerStreams {
    streams: HashMap<u64, DeflateStream>,
}

impl WorkerStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle one request. `reset` produces no response.
    pub fn handle(&mut self, request: WorkerRequest) -> Option<WorkerResponse> {
        match request {
            WorkerRequest::Init => Some(WorkerResponse::Initialized {
                version: WORKER_VERSION.to_string(),
            }),
            WorkerRequest::Write {
                id,
                stream_id,
                data,
            } => {
                let stream = self.streams.entry(stream_id).or_default();
                match stream.write(&data) {
                    Ok(output) => Some(WorkerResponse::Wrote {
                        id,
                        stream_id,
                        result: output.result,
                        trailer: output.trailer,
                        additional_bytes_count: output.additional_bytes_count,
                    }),
                    Err(err) => {
                        self.streams.remove(&stream_id);
                        Some(WorkerResponse::Errored {
                            error: err.to_string(),
                            stream_id: Some(stream_id),
                        })
                    }
                }
            }
            WorkerRequest::Reset { stream_id } => {
                self.streams.remove(&stream_id);
                None
            }
        }
    }

    /// Handle a JSON-encoded request and answer in JSON. Unparseable
    /// messages are answered with `errored` carrying no stream id.
    pub fn handle_message(&mut self, message: &str) -> Option<String> {
        let response = match serde_json::from_str::<WorkerRequest>(message) {
            Ok(request) => self.handle(request)?,
            Err(err) => WorkerResponse::Errored {
                error: WorkerError::from(err).to_string(),
                stream_id: None,
            },
        };
        match serde_json::to_string(&response) {
            Ok(json) => Some(json),
            Err(err) => Some(format!(
                r#"{{"type":"errored","error":{:?}}}"#,
                err.to_string()
            )),
        }
    }

    /// Number of open streams
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

enum WorkerCommand {
    Request(WorkerRequest),
    Shutdown,
}

/// Handle on the worker thread
pub struct DeflateWorker {
    commands: Sender<WorkerCommand>,
    responses: Receiver<WorkerResponse>,
    thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DeflateWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflateWorker")
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl DeflateWorker {
    /// Spawn the worker thread
    pub fn start() -> Result<Self, WorkerError> {
        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (response_tx, response_rx) = crossbeam_channel::unbounded();
        let thread = thread::Builder::new()
            .name("replay-deflate".to_string())
            .spawn(move || run_worker_loop(command_rx, response_tx))?;
        tracing::debug!("deflate worker started");
        Ok(Self {
            commands: command_tx,
            responses: response_rx,
            thread: Some(thread),
        })
    }

    /// Post a request (never blocks)
    pub fn post(&self, request: WorkerRequest) -> Result<(), WorkerError> {
        self.commands
            .send(WorkerCommand::Request(request))
            .map_err(|_| WorkerError::Disconnected)
    }

    /// Next response, if one is ready
    pub fn try_recv(&self) -> Result<Option<WorkerResponse>, WorkerError> {
        match self.responses.try_recv() {
            Ok(response) => Ok(Some(response)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }

    /// Wait up to `timeout` for the next response
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<WorkerResponse>, WorkerError> {
        match self.responses.recv_timeout(timeout) {
            Ok(response) => Ok(Some(response)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(WorkerError::Disconnected),
        }
    }

    /// Stop the thread after it drains already posted requests
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(WorkerCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("deflate worker panicked");
            }
        }
    }
}

impl Drop for DeflateWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker_loop(commands: Receiver<WorkerCommand>, responses: Sender<WorkerResponse>) {
    let mut streams = WorkerStreams::new();
    while let Ok(command) = commands.recv() {
        match command {
            WorkerCommand::Request(request) => {
                let Some(response) = streams.handle(request) else {
                    continue;
                };
                if let WorkerResponse::Errored { error, stream_id } = &response {
                    tracing::warn!(?stream_id, %error, "deflate worker failed to compress");
                }
                if responses.send(response).is_err() {
                    break;
                }
            }
            WorkerCommand::Shutdown => break,
        }
    }
    tracing::debug!(streams = streams.len(), "deflate worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(id: u64, stream_id: u64, data: &str) -> WorkerRequest {
        WorkerRequest::Write {
            id,
            stream_id,
            data: data.to_string(),
        }
    }

    fn result_of(response: Option<WorkerResponse>) -> Vec<u8> {
        match response {
            Some(WorkerResponse::Wrote { result, .. }) => result,
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn test_reset_starts_fresh_stream() {
        let mut streams = WorkerStreams::new();
        let first = result_of(streams.handle(write(0, 5, "foo")));
        let second = result_of(streams.handle(write(1, 5, "bar")));
        assert!(streams.handle(WorkerRequest::Reset { stream_id: 5 }).is_none());
        let third = result_of(streams.handle(write(2, 5, "bar")));

        assert_eq!(&first[..2], &[0x78, 0x9c]);
        assert_ne!(&second[..2], &[0x78, 0x9c]);
        assert_eq!(&third[..2], &[0x78, 0x9c]);
    }

    #[test]
    fn test_streams_are_independent() {
        let mut streams = WorkerStreams::new();
        result_of(streams.handle(write(0, 1, "a")));
        let other = result_of(streams.handle(write(0, 2, "b")));
        assert_eq!(&other[..2], &[0x78, 0x9c]);
        assert_eq!(streams.len(), 2);
    }

    #[test]
    fn test_init_reports_version() {
        let mut streams = WorkerStreams::new();
        assert_eq!(
            streams.handle(WorkerRequest::Init),
            Some(WorkerResponse::Initialized {
                version: WORKER_VERSION.to_string()
            })
        );
    }

    #[test]
    fn test_malformed_message() {
        let mut streams = WorkerStreams::new();
        let reply = streams.handle_message(r#"{"action":"explode"}"#).unwrap();
        let reply: WorkerResponse = serde_json::from_str(&reply).unwrap();
        assert!(matches!(reply, WorkerResponse::Errored { stream_id: None, .. }));

        assert!(streams
            .handle_message(r#"{"action":"reset","streamId":1}"#)
            .is_none());
    }

    #[test]
    fn test_thread_round_trip() {
        let worker = DeflateWorker::start().unwrap();
        worker.post(WorkerRequest::Init).unwrap();
        worker.post(write(0, 9, "hello")).unwrap();

        let init = worker.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(init, Some(WorkerResponse::Initialized { .. })));
        let wrote = worker.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(wrote, Some(WorkerResponse::Wrote { id: 0, stream_id: 9, .. })));
    }
}
