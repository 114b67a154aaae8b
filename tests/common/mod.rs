//! Shared helpers for the integration tests
//!
//! Fixtures build small timelines and persisted documents; the service
//! helpers wire a pipeline to a canned provider. Live-provider tests would
//! enable the `real_llm` feature instead.

pub mod fixtures;

#[cfg(not(feature = "real_llm"))]
pub mod service;

pub use fixtures::{named_timeline, study_document, write_json};

#[cfg(not(feature = "real_llm"))]
pub use service::{header_response, mock_pipeline};
