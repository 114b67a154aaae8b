//! soa-reconcile: Schedule-of-Activities reconciliation and provenance engine
//!
//! Turns the independent extraction passes over a protocol's Schedule of
//! Activities table into one cross-referenced timeline, recording where
//! every entity and matrix cell came from.
//!
//! # Core Concepts
//!
//! - **Header**: the column/row skeleton whose ids every later pass uses
//! - **Matrix cell**: an (activity, planned timepoint) pair
//! - **Provenance**: per-entity and per-cell origin; disagreement becomes `both`
//! - **Reconciliation**: merging independently identified timelines by name
//!
//! # Example
//!
//! ```
//! use soa_reconcile::{Origin, ProvenanceTracker};
//!
//! let mut provenance = ProvenanceTracker::new();
//! provenance.tag_cell("act1", "tp1", Origin::Text);
//! provenance.tag_cell("act1", "tp1", Origin::Vision);
//! assert_eq!(provenance.cell_origin("act1", "tp1"), Some(Origin::Both));
//! ```

pub mod config;
pub mod fixup;
pub mod llm;
pub mod model;
pub mod pipeline;
pub mod provenance;
pub mod reconcile;
pub mod response;
pub mod storage;
pub mod validate;

pub use config::{ConfigError, ReconcileConfig};
pub use fixup::{CellVerdict, FixupApplier, FixupOutcome};
pub use llm::{CommandProvider, MockProvider, PageImage, Provider, ServiceClient, ServiceError};
pub use model::{
    Activity, ActivityGroup, ActivityTimepoint, Encounter, Epoch, HeaderStructure, ModelError,
    PlannedTimepoint, Timeline, TimelineDocument,
};
pub use pipeline::{
    merge_sources, ExtractionInput, Pipeline, PipelineError, PipelineOutput, PipelineReport, Stage,
};
pub use provenance::{EntityKind, Origin, ProvenanceTracker};
pub use reconcile::{IdentityMerger, MergeError, MergeInputError, MergeOutcome, MergeSource};
pub use response::ParseError;
pub use storage::{FileStore, OpenStore, StorageError, StorageResult, TimelineStore};
pub use validate::{validate, LinkageError, LinkageKind, ValidationReport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
