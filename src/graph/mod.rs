//! Knowledge graph
//!
//! Typed entities connected by predicate-labeled edges, with per-type
//! validation rules and the consistency operations (duplicate detection,
//! merge, split, bulk actions) that keep the graph clean.

pub mod bulk;
pub mod consistency;
pub mod handler;
pub mod similarity;
pub mod store;
pub mod types;
pub mod validation;

pub use bulk::{BulkAction, BulkActionRequest, BulkActionResult};
pub use consistency::{
    DuplicateCandidate, MergeOutcome, MergeRequest, MigrationDecision, RelationshipMigration,
    SplitOutcome, SplitRequest,
};
pub use handler::{graph_router, GraphState};
pub use store::{EntityFilter, GraphStore};
pub use types::*;
pub use validation::{FieldRule, RuleField, RuleKind, ValidationRule};
