//! Response normalization and streaming
//!
//! Everything between "the provider answered" and "the caller gets a canonical
//! response": content-type dispatch, the streaming pipeline for SSE and binary
//! event streams, synthesized streams for cache hits, and the accumulator that
//! folds a canonical stream back into a buffered response.

pub mod accumulate;
pub mod eventstream;
pub mod normalizer;
pub mod simulate;
pub mod stream;

pub use accumulate::{accumulate_sse, accumulate_stream, StreamAccumulator};
pub use eventstream::{EventMessage, EventStreamDecoder};
pub use normalizer::{from_cache, normalize, normalize_buffered, timeout_response, NormalizeContext};
pub use simulate::simulate_stream;
pub use stream::{spawn_stream, Framer, SseFramer, StreamSetup, DONE_LINE};
