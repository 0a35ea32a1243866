//! Batching of incoming values before they reach the delivery queue.

pub mod value_buffer;

pub use value_buffer::{BufferConfig, BufferEntry, FlushReason, ValueBuffer};
