/// Chunk-boundary-safe line reassembly for streamed response bodies.
pub mod decoder;
/// Sticky event-type classification of decoded lines into typed events.
pub mod event;

pub use decoder::LineDecoder;
pub use event::{EventInterpreter, StreamEvent};
