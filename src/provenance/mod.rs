//! Provenance tracking: origin tags for entities and matrix cells.

mod tracker;
pub mod types;

pub use tracker::ProvenanceTracker;
pub use types::{EntityKind, Origin};
