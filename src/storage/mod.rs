//! Storage backends for timelines
//!
//! Timelines are persisted through the `TimelineStore` trait. The
//! implementation is `FileStore`: one JSON document per timeline with a
//! `<stem>_provenance.json` sibling.

mod file;
mod traits;

pub use file::{provenance_path, read_timeline, write_timeline, FileStore};
pub use traits::{OpenStore, StorageError, StorageResult, StoredTimeline, TimelineStore};
