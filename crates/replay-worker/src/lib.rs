//! fOS Replay Worker - Segment compression off the main thread
//!
//! A dedicated thread keeps one incremental zlib stream per `streamId` and
//! answers `write` requests with the bytes produced by a sync flush plus a
//! trailer that would close the stream at that point.
//!
//! Message flow:
//! ```text
//! caller                         worker thread
//!   |-- {action: init} ------------->|
//!   |<----------- {type: initialized}|
//!   |-- {action: write, id, ...} --->|  deflate(data, SYNC_FLUSH)
//!   |<---- {type: wrote, id, ...} ---|
//!   |-- {action: reset, streamId} -->|  drop stream state (no response)
//! ```

mod protocol;
mod stream;
mod worker;

pub use protocol::{WorkerRequest, WorkerResponse};
pub use stream::{Adler32, DeflateStream, WriteOutput};
pub use worker::{DeflateWorker, WorkerStreams, WORKER_VERSION};

/// Worker errors
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("Compression failed: {0}")]
    Compression(#[from] flate2::CompressError),

    #[error("Malformed worker message: {0}")]
    Message(#[from] serde_json::Error),

    #[error("Failed to start worker thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("Worker is no longer running")]
    Disconnected,
}
