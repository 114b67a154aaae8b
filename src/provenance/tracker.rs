//! ProvenanceTracker: per-entity and per-cell origin records
//!
//! Tags follow one rule: the first tag is kept, a repeated identical tag
//! is a no-op, and any differing tag turns the record into `Both`. The
//! rule is commutative and associative, so trackers filled by independent
//! passes can be merged in any order.

use super::types::{EntityKind, Origin};
use crate::model::{cell_key, Timeline};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Origin records for one timeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceTracker {
    #[serde(default)]
    entities: BTreeMap<EntityKind, BTreeMap<String, Origin>>,
    #[serde(default)]
    cells: BTreeMap<String, Origin>,
    #[serde(default)]
    metadata: Map<String, Value>,
}

impl ProvenanceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag an entity. Returns the resulting origin.
    pub fn tag_entity(&mut self, kind: EntityKind, id: impl Into<String>, origin: Origin) -> Origin {
        let slot = self.entities.entry(kind).or_default();
        let id = id.into();
        let merged = slot
            .get(&id)
            .copied()
            .map_or(origin, |existing| existing.combine(origin));
        slot.insert(id, merged);
        merged
    }

    /// Tag a matrix cell. Returns the resulting origin.
    pub fn tag_cell(&mut self, activity_id: &str, timepoint_id: &str, origin: Origin) -> Origin {
        self.tag_cell_key(cell_key(activity_id, timepoint_id), origin)
    }

    /// Tag a cell by its precomputed `"{activityId}|{timepointId}"` key.
    pub fn tag_cell_key(&mut self, key: String, origin: Origin) -> Origin {
        let merged = self
            .cells
            .get(&key)
            .copied()
            .map_or(origin, |existing| existing.combine(origin));
        self.cells.insert(key, merged);
        merged
    }

    pub fn entity_origin(&self, kind: EntityKind, id: &str) -> Option<Origin> {
        self.entities.get(&kind).and_then(|m| m.get(id)).copied()
    }

    pub fn cell_origin(&self, activity_id: &str, timepoint_id: &str) -> Option<Origin> {
        self.cells.get(&cell_key(activity_id, timepoint_id)).copied()
    }

    /// Drop the record of a cell that no longer exists.
    pub fn remove_cell(&mut self, activity_id: &str, timepoint_id: &str) -> Option<Origin> {
        self.cells.remove(&cell_key(activity_id, timepoint_id))
    }

    /// Fold every record of `other` into `self` using the tag rule.
    ///
    /// Metadata keys already present in `self` are kept.
    pub fn merge(&mut self, other: &ProvenanceTracker) {
        for (kind, ids) in &other.entities {
            for (id, origin) in ids {
                self.tag_entity(*kind, id.clone(), *origin);
            }
        }
        for (key, origin) in &other.cells {
            self.tag_cell_key(key.clone(), *origin);
        }
        for (k, v) in &other.metadata {
            self.metadata.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }

    /// Tag every entity and cell of `timeline` with `origin`.
    pub fn tag_timeline(&mut self, timeline: &Timeline, origin: Origin) {
        for a in &timeline.activities {
            self.tag_entity(EntityKind::Activities, a.id.clone(), origin);
        }
        for t in &timeline.planned_timepoints {
            self.tag_entity(EntityKind::PlannedTimepoints, t.id.clone(), origin);
        }
        for e in &timeline.encounters {
            self.tag_entity(EntityKind::Encounters, e.id.clone(), origin);
        }
        for e in &timeline.epochs {
            self.tag_entity(EntityKind::Epochs, e.id.clone(), origin);
        }
        for g in &timeline.activity_groups {
            self.tag_entity(EntityKind::ActivityGroups, g.id.clone(), origin);
        }
        for c in &timeline.activity_timepoints {
            self.tag_cell_key(c.key(), origin);
        }
    }

    pub fn entities(&self, kind: EntityKind) -> impl Iterator<Item = (&str, Origin)> {
        self.entities
            .get(&kind)
            .into_iter()
            .flat_map(|m| m.iter().map(|(id, o)| (id.as_str(), *o)))
    }

    pub fn cells(&self) -> impl Iterator<Item = (&str, Origin)> {
        self.cells.iter().map(|(k, o)| (k.as_str(), *o))
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.values().map(|m| m.len()).sum()
    }

    /// Number of cells per origin.
    pub fn cell_origin_counts(&self) -> BTreeMap<Origin, usize> {
        let mut counts = BTreeMap::new();
        for origin in self.cells.values() {
            *counts.entry(*origin).or_insert(0) += 1;
        }
        counts
    }

    /// Number of entities per origin, across all kinds.
    pub fn entity_origin_counts(&self) -> BTreeMap<Origin, usize> {
        let mut counts = BTreeMap::new();
        for origin in self.entities.values().flat_map(|m| m.values()) {
            *counts.entry(*origin).or_insert(0) += 1;
        }
        counts
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    /// Stamp `runId` and `generatedAt` into the metadata.
    pub fn stamp_run(&mut self) -> Uuid {
        let run_id = Uuid::new_v4();
        self.set_metadata("runId", Value::String(run_id.to_string()));
        self.set_metadata("generatedAt", Value::String(Utc::now().to_rfc3339()));
        run_id
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value.clone())
    }
}
