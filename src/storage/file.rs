//! Filesystem storage: pretty-printed JSON files in one directory
//!
//! A timeline named `study` is stored as `study.json`, its provenance as
//! the sibling `study_provenance.json`. The free functions work on
//! arbitrary paths with the same sibling convention.

use super::traits::{OpenStore, StorageError, StorageResult, StoredTimeline, TimelineStore};
use crate::model::TimelineDocument;
use crate::provenance::ProvenanceTracker;
use serde_json::Value;
use std::path::{Path, PathBuf};

const PROVENANCE_SUFFIX: &str = "_provenance";

/// Path of the provenance sibling of a timeline file:
/// `dir/<stem>_provenance.json`.
pub fn provenance_path(timeline_path: &Path) -> PathBuf {
    let stem = timeline_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    timeline_path.with_file_name(format!("{}{}.json", stem, PROVENANCE_SUFFIX))
}

/// Read a timeline document and, when present, its provenance sibling.
pub fn read_timeline(path: &Path) -> StorageResult<StoredTimeline> {
    let value: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
    let document = TimelineDocument::from_value(&value)?;

    let prov_path = provenance_path(path);
    let provenance = if prov_path.exists() {
        let value: Value = serde_json::from_str(&std::fs::read_to_string(&prov_path)?)?;
        ProvenanceTracker::from_value(&value)?
    } else {
        ProvenanceTracker::new()
    };

    Ok(StoredTimeline {
        document,
        provenance,
    })
}

/// Write a timeline document and its provenance sibling.
pub fn write_timeline(
    path: &Path,
    document: &TimelineDocument,
    provenance: &ProvenanceTracker,
) -> StorageResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&document.to_value()?)?)?;
    std::fs::write(
        provenance_path(path),
        serde_json::to_string_pretty(&provenance.to_value()?)?,
    )?;
    tracing::debug!(path = %path.display(), "timeline written");
    Ok(())
}

/// Directory-backed store
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> StorageResult<PathBuf> {
        let valid = !name.is_empty()
            && !name.ends_with(PROVENANCE_SUFFIX)
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !name.starts_with('.');
        if !valid {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(format!("{}.json", name)))
    }
}

impl OpenStore for FileStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }
}

impl TimelineStore for FileStore {
    fn save(
        &self,
        name: &str,
        document: &TimelineDocument,
        provenance: &ProvenanceTracker,
    ) -> StorageResult<()> {
        write_timeline(&self.path_for(name)?, document, provenance)
    }

    fn load(&self, name: &str) -> StorageResult<Option<StoredTimeline>> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Ok(None);
        }
        read_timeline(&path).map(Some)
    }

    fn delete(&self, name: &str) -> StorageResult<bool> {
        let path = self.path_for(name)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)?;
        let prov = provenance_path(&path);
        if prov.exists() {
            std::fs::remove_file(prov)?;
        }
        Ok(true)
    }

    fn list(&self) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if !stem.ends_with(PROVENANCE_SUFFIX) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Activity, ActivityTimepoint, Encounter, PlannedTimepoint, Timeline};
    use crate::provenance::{EntityKind, Origin};
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, FileStore) {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path().join("timelines")).unwrap();
        (dir, store)
    }

    fn create_test_timeline() -> (TimelineDocument, ProvenanceTracker) {
        let mut t = Timeline::new();
        t.activities.push(Activity::new("act1", "ECG"));
        let enc = Encounter::new("enc1", "Screening");
        t.planned_timepoints.push(PlannedTimepoint::for_encounter("tp1", &enc));
        t.encounters.push(enc);
        t.add_cell(ActivityTimepoint::new("act1", "tp1"));
        let mut p = ProvenanceTracker::new();
        p.tag_timeline(&t, Origin::Text);
        (TimelineDocument::new(t), p)
    }

    #[test]
    fn provenance_sibling_uses_stem() {
        assert_eq!(
            provenance_path(Path::new("/out/study_soa.json")),
            PathBuf::from("/out/study_soa_provenance.json")
        );
    }

    #[test]
    fn test_save_and_load_timeline() {
        let (_dir, store) = create_test_store();
        let (doc, prov) = create_test_timeline();
        store.save("study", &doc, &prov).unwrap();

        let loaded = store.load("study").unwrap().unwrap();
        assert_eq!(loaded.document, doc);
        assert_eq!(loaded.provenance, prov);
        assert!(store.root().join("study_provenance.json").exists());
    }

    #[test]
    fn test_load_missing_returns_none() {
        let (_dir, store) = create_test_store();
        assert!(store.load("nothing").unwrap().is_none());
    }

    #[test]
    fn test_missing_provenance_loads_empty() {
        let (_dir, store) = create_test_store();
        let (doc, prov) = create_test_timeline();
        store.save("study", &doc, &prov).unwrap();
        std::fs::remove_file(store.root().join("study_provenance.json")).unwrap();

        let loaded = store.load("study").unwrap().unwrap();
        assert_eq!(loaded.provenance.cell_count(), 0);
        assert_eq!(loaded.document, doc);
    }

    #[test]
    fn test_list_and_delete() {
        let (_dir, store) = create_test_store();
        let (doc, prov) = create_test_timeline();
        store.save("b", &doc, &prov).unwrap();
        store.save("a", &doc, &prov).unwrap();
        assert_eq!(store.list().unwrap(), vec!["a", "b"]);

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(!store.root().join("a_provenance.json").exists());
        assert_eq!(store.list().unwrap(), vec!["b"]);
    }

    #[test]
    fn test_rejects_path_like_names() {
        let (_dir, store) = create_test_store();
        let (doc, prov) = create_test_timeline();
        for name in ["../escape", "", ".hidden", "x_provenance", "a/b"] {
            assert!(
                matches!(store.save(name, &doc, &prov), Err(StorageError::InvalidName(_))),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_malformed_document_is_model_error() {
        let (_dir, store) = create_test_store();
        std::fs::write(store.root().join("bad.json"), "{\"study\": {}}").unwrap();
        assert!(matches!(store.load("bad"), Err(StorageError::Model(_))));
    }

    #[test]
    fn test_provenance_round_trip_through_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("run.json");
        let (doc, mut prov) = create_test_timeline();
        prov.tag_entity(EntityKind::Activities, "act1", Origin::Vision);
        prov.stamp_run();
        write_timeline(&path, &doc, &prov).unwrap();

        let loaded = read_timeline(&path).unwrap();
        assert_eq!(loaded.provenance, prov);
        assert_eq!(
            loaded.provenance.entity_origin(EntityKind::Activities, "act1"),
            Some(Origin::Both)
        );
    }
}
