//! Incremental zlib stream
//!
//! Every write ends with a sync flush so the output so far is byte aligned.
//! Appending `[0x03, 0x00]` (an empty final fixed-Huffman block) and the
//! big-endian Adler-32 of all input turns the concatenated outputs into a
//! complete zlib stream.

use flate2::{Compress, Compression, FlushCompress, Status};

use crate::WorkerError;

const ADLER_MOD: u32 = 65_521;
/// Largest n such that 255n(n+1)/2 + (n+1)(MOD-1) fits in u32
const ADLER_NMAX: usize = 5_552;

/// Running Adler-32 checksum
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adler32 {
    a: u32,
    b: u32,
}

impl Default for Adler32 {
    fn default() -> Self {
        Self { a: 1, b: 0 }
    }
}

impl Adler32 {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(ADLER_NMAX) {
            for &byte in chunk {
                self.a += u32::from(byte);
                self.b += self.a;
            }
            self.a %= ADLER_MOD;
            self.b %= ADLER_MOD;
        }
    }

    pub fn value(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

/// Result of one `write`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutput {
    pub result: Vec<u8>,
    pub trailer: Vec<u8>,
    pub additional_bytes_count: usize,
}

/// One zlib stream, default compression level
pub struct DeflateStream {
    compress: Compress,
    checksum: Adler32,
}

impl Default for DeflateStream {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for DeflateStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeflateStream")
            .field("total_in", &self.compress.total_in())
            .field("total_out", &self.compress.total_out())
            .finish()
    }
}

impl DeflateStream {
    pub fn new() -> Self {
        Self {
            compress: Compress::new(Compression::default(), true),
            checksum: Adler32::new(),
        }
    }

    /// Compress `data` with a sync flush
    pub fn write(&mut self, data: &str) -> Result<WriteOutput, WorkerError> {
        let input = data.as_bytes();
        let start = self.compress.total_in();
        let mut out = Vec::with_capacity(input.len() / 2 + 64);

        loop {
            if out.len() == out.capacity() {
                out.reserve(out.capacity().max(64));
            }
            let consumed = (self.compress.total_in() - start) as usize;
            let status = self
                .compress
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)?;
            let consumed = (self.compress.total_in() - start) as usize;
            let flushed = consumed == input.len() && out.len() < out.capacity();
            if flushed || (status == Status::BufError && out.len() < out.capacity()) {
                break;
            }
        }

        self.checksum.update(input);
        Ok(WriteOutput {
            result: out,
            trailer: self.trailer(),
            additional_bytes_count: input.len(),
        })
    }

    /// Bytes that close the stream after everything written so far
    pub fn trailer(&self) -> Vec<u8> {
        let mut trailer = vec![0x03, 0x00];
        trailer.extend_from_slice(&self.checksum.value().to_be_bytes());
        trailer
    }

    /// Uncompressed bytes written so far
    pub fn total_in(&self) -> u64 {
        self.compress.total_in()
    }
}
