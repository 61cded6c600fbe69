//! Cogmem - Cognitive memory backend for AI assistants
//!
//! Cogmem gives a conversational assistant long-term memory: a typed
//! knowledge graph, a vector store of facts, and the conversation log,
//! queried together to build context for each turn and written back by a
//! background extraction pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                          HTTP API (axum)                          │
//! │  /entities  /predicates  /validation-rules  /conversations        │
//! │  /memory/context  /memory/pipeline  /inspect  /pipeline-runs      │
//! └──────┬───────────────────────┬────────────────────────┬───────────┘
//!        │                       │                        │
//! ┌──────▼───────────┐  ┌────────▼──────────┐  ┌──────────▼──────────┐
//! │ ContextAssembler │  │  ExtractionQueue  │  │    LinkPredictor    │
//! │  parallel tiers  │  │  bounded workers  │  │ co-occurrence + LLM │
//! └──────┬───────────┘  └────────┬──────────┘  └──────────┬──────────┘
//!        │                       │ MemoryExtractor        │
//! ┌──────▼───────────────────────▼────────────────────────▼───────────┐
//! │  Tiers: episodic │ semantic │ structured │ graph                  │
//! └──────┬────────────────┬──────────────┬───────────────┬────────────┘
//!        │                │              │               │
//! ┌──────▼──────┐  ┌──────▼──────┐  ┌────▼──────────────────────────┐
//! │Conversations│  │ VectorIndex │  │ GraphStore (entities, edges,  │
//! │             │  │ + Embedder  │  │ predicates, validation rules) │
//! └──────┬──────┘  └─────────────┘  └────┬──────────────────────────┘
//!        └──────────────┬────────────────┘
//!                ┌──────▼──────┐      ┌─────────────┐
//!                │   SQLite    │◄─────┤ TraceStore  │
//!                └─────────────┘      └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`graph`]: entities, predicates, relationships, merge/split, bulk actions
//! - [`conversation`]: message log and message-entity lineage
//! - [`tiers`]: the four memory backends queried during context assembly
//! - [`pipeline`]: context assembly, extraction, queue and link prediction
//! - [`tracer`]: durable pipeline runs and steps
//! - [`vector`]: embedders and the vector index
//! - [`llm`]: generative model adapter
//! - [`storage`]: SQLite connection and schema
//! - [`api`]: HTTP router and error envelope
//! - [`config`]: Configuration management

pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod graph;
pub mod llm;
pub mod pipeline;
pub mod storage;
pub mod tiers;
pub mod tracer;
pub mod vector;

pub use config::CogmemConfig;
pub use error::{Error, Result};
