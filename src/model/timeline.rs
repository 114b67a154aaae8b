//! Timeline: the aggregate root that is persisted and exchanged

use super::entity::{
    Activity, ActivityGroup, ActivityTimepoint, Encounter, Epoch, PlannedTimepoint,
    ScheduleTimeline,
};
use super::header::HeaderStructure;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::OnceLock;
use thiserror::Error;

/// USDM version written into persisted documents.
pub const USDM_VERSION: &str = "4.0.0";
/// System name written into persisted documents.
pub const SYSTEM_NAME: &str = "soa-reconcile";

/// JSON pointer to the timeline inside a persisted document.
pub const TIMELINE_POINTER: &str = "/study/versions/0/timeline";

/// Errors from building model values out of JSON.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("missing expected path: {0}")]
    MissingPath(&'static str),

    #[error("invalid entity data: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// All six entity collections of one extracted schedule.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeline {
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub planned_timepoints: Vec<PlannedTimepoint>,
    #[serde(default)]
    pub encounters: Vec<Encounter>,
    #[serde(default)]
    pub epochs: Vec<Epoch>,
    #[serde(default)]
    pub activity_groups: Vec<ActivityGroup>,
    #[serde(default)]
    pub activity_timepoints: Vec<ActivityTimepoint>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub schedule_timelines: Vec<ScheduleTimeline>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a timeline from the header skeleton.
    ///
    /// The header's ids are carried over verbatim; they stay authoritative
    /// for every downstream pass.
    pub fn from_header(header: &HeaderStructure) -> Self {
        Self {
            epochs: header.epochs.clone(),
            encounters: header.encounters.clone(),
            planned_timepoints: header.planned_timepoints.clone(),
            activity_groups: header.activity_groups.clone(),
            ..Default::default()
        }
    }

    /// Decode a bare timeline object (the value at [`TIMELINE_POINTER`]).
    pub fn from_value(value: &Value) -> Result<Self, ModelError> {
        Ok(serde_json::from_value(value.clone())?)
    }

    /// Add a matrix cell. Returns false when the pair is already present.
    pub fn add_cell(&mut self, cell: ActivityTimepoint) -> bool {
        if self.has_cell(&cell.activity_id, &cell.planned_timepoint_id) {
            return false;
        }
        self.activity_timepoints.push(cell);
        true
    }

    pub fn has_cell(&self, activity_id: &str, timepoint_id: &str) -> bool {
        self.activity_timepoints
            .iter()
            .any(|c| c.activity_id == activity_id && c.planned_timepoint_id == timepoint_id)
    }

    /// Remove a matrix cell. Returns true if it was present.
    pub fn remove_cell(&mut self, activity_id: &str, timepoint_id: &str) -> bool {
        let before = self.activity_timepoints.len();
        self.activity_timepoints
            .retain(|c| !(c.activity_id == activity_id && c.planned_timepoint_id == timepoint_id));
        before != self.activity_timepoints.len()
    }

    /// Collapse duplicate cells, keeping first-seen order.
    ///
    /// Returns how many duplicates were dropped.
    pub fn dedupe_cells(&mut self) -> usize {
        let mut seen = HashSet::new();
        let before = self.activity_timepoints.len();
        self.activity_timepoints.retain(|c| seen.insert(c.clone()));
        before - self.activity_timepoints.len()
    }

    pub fn activity(&self, id: &str) -> Option<&Activity> {
        self.activities.iter().find(|a| a.id == id)
    }

    pub fn encounter(&self, id: &str) -> Option<&Encounter> {
        self.encounters.iter().find(|e| e.id == id)
    }

    pub fn planned_timepoint(&self, id: &str) -> Option<&PlannedTimepoint> {
        self.planned_timepoints.iter().find(|t| t.id == id)
    }

    /// Total number of entities across all collections, cells included.
    pub fn entity_count(&self) -> usize {
        self.activities.len()
            + self.planned_timepoints.len()
            + self.encounters.len()
            + self.epochs.len()
            + self.activity_groups.len()
            + self.activity_timepoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entity_count() == 0
    }
}

/// The persisted document wrapping a timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineDocument {
    #[serde(default = "default_usdm_version")]
    pub usdm_version: String,
    #[serde(default = "default_system_name")]
    pub system_name: String,
    #[serde(default = "default_system_version")]
    pub system_version: String,
    pub study: Study,
}

/// A study with at least one version when decoded.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "StudyWire")]
pub struct Study {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub versions: Vec<StudyVersion>,
}

#[derive(Deserialize)]
struct StudyWire {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    versions: Vec<StudyVersion>,
}

impl TryFrom<StudyWire> for Study {
    type Error = &'static str;

    fn try_from(wire: StudyWire) -> Result<Self, Self::Error> {
        if wire.versions.is_empty() {
            return Err("study has no versions");
        }
        Ok(Self {
            id: wire.id,
            name: wire.name,
            versions: wire.versions,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudyVersion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub timeline: Timeline,
}

fn default_usdm_version() -> String {
    USDM_VERSION.to_string()
}

fn default_system_name() -> String {
    SYSTEM_NAME.to_string()
}

fn default_system_version() -> String {
    crate::VERSION.to_string()
}

impl TimelineDocument {
    /// Wrap a timeline in a single-version study.
    pub fn new(timeline: Timeline) -> Self {
        Self {
            usdm_version: default_usdm_version(),
            system_name: default_system_name(),
            system_version: default_system_version(),
            study: Study {
                id: None,
                name: None,
                versions: vec![StudyVersion {
                    id: None,
                    timeline,
                }],
            },
        }
    }

    /// Decode a persisted document.
    ///
    /// Fails with [`ModelError::MissingPath`] when the nested timeline path
    /// is absent, so callers can tell a malformed source from bad entities.
    pub fn from_value(value: &Value) -> Result<Self, ModelError> {
        if value.pointer(TIMELINE_POINTER).is_none() {
            return Err(ModelError::MissingPath("study.versions[0].timeline"));
        }
        Ok(serde_json::from_value(value.clone())?)
    }

    pub fn to_value(&self) -> Result<Value, ModelError> {
        Ok(serde_json::to_value(self)?)
    }

    /// The first version's timeline; empty if a hand-built study has none.
    pub fn timeline(&self) -> &Timeline {
        static EMPTY: OnceLock<Timeline> = OnceLock::new();
        match self.study.versions.first() {
            Some(version) => &version.timeline,
            None => EMPTY.get_or_init(Timeline::default),
        }
    }

    /// The first version's timeline, adding an empty version if needed.
    pub fn timeline_mut(&mut self) -> &mut Timeline {
        if self.study.versions.is_empty() {
            self.study.versions.push(StudyVersion::default());
        }
        &mut self.study.versions[0].timeline
    }

    pub fn into_timeline(self) -> Timeline {
        self.study
            .versions
            .into_iter()
            .next()
            .map(|version| version.timeline)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Timeline {
        let mut t = Timeline::new();
        t.activities.push(Activity::new("act1", "Vital Signs"));
        let enc = Encounter::new("enc_1", "Visit 1");
        t.planned_timepoints
            .push(PlannedTimepoint::for_encounter("tp1", &enc));
        t.encounters.push(enc);
        t
    }

    #[test]
    fn add_cell_collapses_duplicates() {
        let mut t = sample();
        assert!(t.add_cell(ActivityTimepoint::new("act1", "tp1")));
        assert!(!t.add_cell(ActivityTimepoint::new("act1", "tp1")));
        assert_eq!(t.activity_timepoints.len(), 1);
    }

    #[test]
    fn dedupe_cells_keeps_first_order() {
        let mut t = sample();
        t.activity_timepoints = vec![
            ActivityTimepoint::new("a", "1"),
            ActivityTimepoint::new("b", "1"),
            ActivityTimepoint::new("a", "1"),
        ];
        assert_eq!(t.dedupe_cells(), 1);
        assert_eq!(t.activity_timepoints[0].activity_id, "a");
        assert_eq!(t.activity_timepoints[1].activity_id, "b");
    }

    #[test]
    fn remove_cell_reports_presence() {
        let mut t = sample();
        t.add_cell(ActivityTimepoint::new("act1", "tp1"));
        assert!(t.remove_cell("act1", "tp1"));
        assert!(!t.remove_cell("act1", "tp1"));
    }

    #[test]
    fn document_round_trips_through_json() {
        let doc = TimelineDocument::new(sample());
        let value = doc.to_value().unwrap();
        assert_eq!(value["usdmVersion"], USDM_VERSION);
        assert!(value.pointer(TIMELINE_POINTER).is_some());
        assert_eq!(
            value["study"]["versions"][0]["timeline"]["plannedTimepoints"][0]["encounterId"],
            "enc_1"
        );

        let back = TimelineDocument::from_value(&value).unwrap();
        assert_eq!(back, doc);
    }

    #[test]
    fn document_without_timeline_path_is_missing_path() {
        let err = TimelineDocument::from_value(&json!({"study": {"versions": []}})).unwrap_err();
        assert!(matches!(err, ModelError::MissingPath(_)));
    }

    #[test]
    fn study_without_versions_does_not_decode() {
        let direct = serde_json::from_value::<TimelineDocument>(json!({"study": {"versions": []}}));
        assert!(direct.unwrap_err().to_string().contains("no versions"));
    }

    #[test]
    fn hand_built_study_without_versions_reads_as_empty() {
        let mut doc = TimelineDocument::new(sample());
        doc.study.versions.clear();
        assert!(doc.timeline().is_empty());
        assert!(doc.clone().into_timeline().is_empty());

        doc.timeline_mut().activities.push(Activity::new("act1", "ECG"));
        assert_eq!(doc.study.versions.len(), 1);
        assert_eq!(doc.timeline().activities.len(), 1);
    }

    #[test]
    fn document_with_nameless_activity_is_invalid() {
        let value = json!({
            "study": {"versions": [{"timeline": {"activities": [{"id": "a1"}]}}]}
        });
        let err = TimelineDocument::from_value(&value).unwrap_err();
        assert!(matches!(err, ModelError::Invalid(_)));
    }

    #[test]
    fn missing_collections_default_to_empty() {
        let value = json!({"study": {"versions": [{"timeline": {}}]}});
        let doc = TimelineDocument::from_value(&value).unwrap();
        assert!(doc.timeline().is_empty());
        assert_eq!(doc.system_name, SYSTEM_NAME);
    }
}
