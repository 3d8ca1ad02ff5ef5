pub mod decoder;
pub mod reconciler;

pub use decoder::{StreamDecoder, StreamEvent, decode_stream};
pub use reconciler::{Flow, Reconciler, TurnOutcome};
