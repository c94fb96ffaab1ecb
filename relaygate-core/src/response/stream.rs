//! Streaming pipeline
//!
//! A background task reads the upstream byte stream, splits it into frames,
//! runs each frame through the adapter's chunk transform and writes canonical
//! SSE lines into a bounded channel. When the consumer drops its end the next
//! write fails, the task returns and the upstream connection is dropped with it.
//! An upstream read error flushes the buffered tail, emits one error chunk and
//! still ends with the terminal sentinel.

use crate::error::GatewayError;
use crate::protocol::function::Function;
use crate::protocol::request::CanonicalRequest;
use crate::protocol::response::ChunkStream;
use crate::providers::adapter::{ChunkContext, ProviderAdapter, StreamFraming, StreamPacing, StreamState};
use crate::providers::error::CanonicalError;
use crate::response::eventstream::EventStreamDecoder;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::fmt::Display;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Terminal sentinel; emitted exactly once per stream
pub const DONE_LINE: &str = "data: [DONE]\n\n";

/// Bound on canonical lines buffered ahead of the consumer
const CHANNEL_CAPACITY: usize = 32;

/// Splits an upstream byte stream into transformable frames
pub trait Framer: Send {
    /// Append bytes and return the frames completed by them
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, GatewayError>;

    /// Flush whatever remains once the upstream ends
    fn finish(&mut self) -> Option<String>;
}

/// Text frames separated by a delimiter
#[derive(Debug)]
pub struct SseFramer {
    delimiter: Vec<u8>,
    buf: Vec<u8>,
}

impl SseFramer {
    pub fn new(delimiter: &str) -> Self {
        let delimiter = if delimiter.is_empty() { "\n\n" } else { delimiter };
        Self {
            delimiter: delimiter.as_bytes().to_vec(),
            buf: Vec::new(),
        }
    }
}

impl Framer for SseFramer {
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, GatewayError> {
        // Normalize CRLF so "\r\n\r\n" framed streams split on "\n\n"
        if bytes.contains(&b'\r') {
            self.buf
                .extend(bytes.iter().copied().filter(|b| *b != b'\r'));
        } else {
            self.buf.extend_from_slice(bytes);
        }

        let mut frames = Vec::new();
        while let Some(idx) = find(&self.buf, &self.delimiter) {
            let frame: Vec<u8> = self.buf.drain(..idx + self.delimiter.len()).collect();
            let text = String::from_utf8_lossy(&frame[..idx]).trim().to_string();
            if !text.is_empty() {
                frames.push(text);
            }
        }
        Ok(frames)
    }

    fn finish(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buf))
            .trim()
            .to_string();
        (!rest.is_empty()).then_some(rest)
    }
}

/// Binary event-stream messages, each yielding its JSON payload
#[derive(Debug, Default)]
pub struct EventStreamFramer {
    decoder: EventStreamDecoder,
}

impl Framer for EventStreamFramer {
    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>, GatewayError> {
        Ok(self
            .decoder
            .push(bytes)?
            .iter()
            .filter_map(|m| m.json_payload())
            .collect())
    }

    fn finish(&mut self) -> Option<String> {
        if self.decoder.remaining() > 0 {
            warn!(
                "Discarding {} trailing bytes of an incomplete event-stream message",
                self.decoder.remaining()
            );
        }
        None
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

pub fn framer_for(framing: &StreamFraming) -> Box<dyn Framer> {
    match framing {
        StreamFraming::Sse { delimiter } => Box::new(SseFramer::new(delimiter)),
        StreamFraming::EventStream => Box::new(EventStreamFramer::default()),
    }
}

/// Everything the producer task needs, owned
pub struct StreamSetup {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub function: Function,
    pub request: CanonicalRequest,
    pub fallback_id: String,
    pub strict_compliance: bool,
}

/// Start the producer task and return the consumer side
pub fn spawn_stream<S, E>(upstream: S, setup: StreamSetup) -> ChunkStream
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(produce(Box::pin(upstream), setup, tx));
    ChunkStream::from_receiver(rx)
}

struct Sender {
    tx: mpsc::Sender<Result<Bytes, GatewayError>>,
    pacing: Option<StreamPacing>,
    sent: usize,
}

impl Sender {
    /// Returns false once the consumer is gone
    async fn send(&mut self, line: String) -> bool {
        if let Some(pacing) = self.pacing {
            let wait = if self.sent == 0 {
                pacing.before_first
            } else {
                pacing.between_chunks
            };
            if !wait.is_zero() {
                tokio::time::sleep(wait).await;
            }
        }
        self.sent += 1;
        self.tx.send(Ok(Bytes::from(line))).await.is_ok()
    }
}

async fn produce<S, E>(
    mut upstream: std::pin::Pin<Box<S>>,
    setup: StreamSetup,
    tx: mpsc::Sender<Result<Bytes, GatewayError>>,
) where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Display,
{
    let adapter = setup.adapter.as_ref();
    let mut framer = framer_for(&adapter.stream_framing());
    let mut state = StreamState::default();
    let ctx = ChunkContext {
        fallback_id: &setup.fallback_id,
        strict_compliance: setup.strict_compliance,
        request: &setup.request,
    };
    let mut out = Sender {
        tx,
        pacing: adapter.stream_pacing(),
        sent: 0,
    };

    let mut failure = None;
    while let Some(item) = upstream.next().await {
        let frames = match item.map_err(|e| GatewayError::Stream(e.to_string())) {
            Ok(bytes) => framer.push(&bytes),
            Err(e) => Err(e),
        };
        let frames = match frames {
            Ok(frames) => frames,
            Err(e) => {
                warn!("Upstream stream from {} failed: {}", adapter.id(), e);
                failure = Some(e);
                break;
            }
        };
        for frame in frames {
            for line in adapter.transform_chunk(setup.function, &frame, &mut state, &ctx) {
                if !out.send(line).await {
                    debug!("Stream consumer dropped, closing upstream from {}", adapter.id());
                    return;
                }
            }
        }
    }

    if let Some(rest) = framer.finish() {
        for line in adapter.transform_chunk(setup.function, &rest, &mut state, &ctx) {
            if !out.send(line).await {
                return;
            }
        }
    }

    if let Some(err) = failure {
        if !out.send(error_line(adapter.id(), &err)).await {
            return;
        }
    }

    debug!("Upstream stream from {} ended after {} chunks", adapter.id(), out.sent);
    let _ = out.tx.send(Ok(Bytes::from_static(DONE_LINE.as_bytes()))).await;
}

/// Canonical error envelope as an SSE line, sent before the terminal sentinel
fn error_line(provider: &str, err: &GatewayError) -> String {
    let envelope = CanonicalError::new(
        err.to_string(),
        Some("stream_error".to_string()),
        provider,
        err.status().as_u16(),
    );
    format!("data: {}\n\n", envelope.to_value())
}
