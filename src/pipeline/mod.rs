//! Memory pipelines
//!
//! - [`ContextAssembler`]: parallel tier fan-out composed into a bounded context
//! - [`MemoryExtractor`]: model-driven extraction into graph and vector memory
//! - [`ExtractionQueue`]: bounded background worker pool for extraction
//! - [`LinkPredictor`]: proposes edges between co-occurring, unlinked entities
//!
//! Every context and extraction run is traced through [`crate::tracer`].

pub mod context;
pub mod extraction;
pub mod handler;
pub mod link_prediction;
pub mod queue;

pub use context::{compose, AssembledContext, ContextAssembler, ContextRequest, TierReport};
pub use extraction::{extraction_schema, ExtractionJob, ExtractionSummary, MemoryExtractor};
pub use handler::{pipeline_router, PipelineState};
pub use link_prediction::{LinkPredictor, LinkProposal};
pub use queue::{ExtractionQueue, ExtractionRequest};
