//! Pipeline tracer
//!
//! Durable record of every context-assembly and memory-extraction run, with
//! one step per sub-operation, keyed by the message that triggered it.

pub mod handler;
pub mod store;
pub mod types;

pub use handler::{tracer_router, TracerState};
pub use store::TraceStore;
pub use types::*;
