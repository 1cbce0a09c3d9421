//! Probe log scanning
//!
//! Raw log buffers are decoded lazily into text chunks, then fed to
//! [`SentinelScanner`]s that keep a short suffix of what they have seen so a
//! sentinel split across two reads is still found.

use futures::{Stream, StreamExt};
use tracing::debug;

use crate::error::E2eResult;
use crate::k8s::resources::{FLOW_CLOSED, FLOW_OPEN};
use crate::k8s::LogStream;

/// UTF-8 decoder that never splits a multi-byte character across chunks
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    /// Decode `bytes`, holding back an incomplete trailing character until
    /// the next call. Invalid sequences become U+FFFD.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();

        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete character at the end, wait for more bytes
                        None => {
                            self.pending.drain(..valid);
                            break;
                        }
                        Some(invalid) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + invalid);
                        }
                    }
                }
            }
        }

        out
    }
}

/// Lazily decode a raw log stream into text chunks
pub fn decode_chunks(stream: LogStream) -> impl Stream<Item = E2eResult<String>> + Send {
    let mut decoder = Utf8ChunkDecoder::default();
    stream.map(move |chunk| chunk.map(|bytes| decoder.decode(&bytes)))
}

/// Counts occurrences of a sentinel across a sequence of text chunks
#[derive(Debug, Clone)]
pub struct SentinelScanner {
    sentinel: String,
    tail: String,
    seen: usize,
}

impl SentinelScanner {
    pub fn new(sentinel: &str) -> Self {
        Self {
            sentinel: sentinel.to_string(),
            tail: String::new(),
            seen: 0,
        }
    }

    /// Feed the next chunk; returns how many new occurrences it completed
    pub fn feed(&mut self, chunk: &str) -> usize {
        let mut window = std::mem::take(&mut self.tail);
        window.push_str(chunk);

        let mut found = 0;
        let mut last_end = 0;
        for (at, matched) in window.match_indices(self.sentinel.as_str()) {
            found += 1;
            last_end = at + matched.len();
        }
        self.seen += found;

        // Shorter than the sentinel and clear of the last match, so no
        // occurrence is counted twice or shares bytes with a counted one
        let keep = self.sentinel.len().saturating_sub(1);
        let mut start = window.len().saturating_sub(keep).max(last_end);
        while !window.is_char_boundary(start) {
            start += 1;
        }
        self.tail = window[start..].to_string();

        found
    }

    /// Total occurrences seen so far
    pub fn seen(&self) -> usize {
        self.seen
    }
}

/// What the probe output showed before the scan stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowObservation {
    /// The open sentinel appeared
    Open { closed_probes: usize },
    /// The stream ended without it
    StreamEnded { closed_probes: usize },
}

/// Consume probe output until the flow is reported open or the stream ends
///
/// A read error ends the scan with that error.
pub async fn watch_flow<S>(chunks: S) -> E2eResult<FlowObservation>
where
    S: Stream<Item = E2eResult<String>>,
{
    futures::pin_mut!(chunks);
    let mut open = SentinelScanner::new(FLOW_OPEN);
    let mut closed = SentinelScanner::new(FLOW_CLOSED);

    while let Some(chunk) = chunks.next().await {
        let chunk = chunk?;
        if closed.feed(&chunk) > 0 {
            debug!(closed_probes = closed.seen(), "Flow still reported closed");
        }
        if open.feed(&chunk) > 0 {
            return Ok(FlowObservation::Open {
                closed_probes: closed.seen(),
            });
        }
    }

    Ok(FlowObservation::StreamEnded {
        closed_probes: closed.seen(),
    })
}
