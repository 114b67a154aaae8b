//! Structural validation: referential integrity with id-alias normalization

mod alias;
mod linkage;

pub use alias::{encounter_number, ids_match, normalize_id, AliasIndex};
pub use linkage::{
    validate, validate_with_metrics, CompletenessMetrics, LinkageError, LinkageKind,
    ValidationReport,
};
