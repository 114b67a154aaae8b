//! Entity types of the Schedule of Activities graph
//!
//! Every entity carries a string id that is only meaningful inside the
//! extraction run that produced it. References between entities are plain
//! id strings; the structural validator checks that they resolve.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A coded value (`{code, decode}`), used for encounter types,
/// timepoint types and terminology references.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Code {
    #[serde(default)]
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decode: Option<String>,
}

impl Code {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            decode: None,
        }
    }

    pub fn with_decode(mut self, decode: impl Into<String>) -> Self {
        self.decode = Some(decode.into());
        self
    }
}

/// Study phase (screening, treatment, follow-up, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Epoch {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl Epoch {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            position: None,
        }
    }

    pub fn with_position(mut self, position: u32) -> Self {
        self.position = Some(position);
        self
    }
}

/// Timing window of a visit, e.g. "Day 1 ± 3 days relative to randomization".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimingWindow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upper: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
}

impl TimingWindow {
    pub fn labelled(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.label.is_none()
            && self.lower.is_none()
            && self.upper.is_none()
            && self.unit.is_none()
            && self.anchor.is_none()
    }
}

/// A visit: one column of the Schedule of Activities table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encounter {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_id: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub encounter_type: Option<Code>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<TimingWindow>,
}

impl Encounter {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            epoch_id: None,
            encounter_type: None,
            description: None,
            window: None,
        }
    }

    pub fn in_epoch(mut self, epoch_id: impl Into<String>) -> Self {
        self.epoch_id = Some(epoch_id.into());
        self
    }

    pub fn with_window(mut self, window: TimingWindow) -> Self {
        self.window = Some(window);
        self
    }
}

/// The scheduled moment belonging to an encounter.
///
/// The name always equals the owning encounter's name. Build timepoints
/// through [`PlannedTimepoint::for_encounter`] so that holds by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedTimepoint {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Human label as printed in the table header ("Day 1", "Week 4").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_lower: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_upper: Option<f64>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub timing_type: Option<Code>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_to: Option<Code>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PlannedTimepoint {
    /// Create the timepoint of `encounter`, copying its name.
    pub fn for_encounter(id: impl Into<String>, encounter: &Encounter) -> Self {
        Self {
            id: id.into(),
            name: encounter.name.clone(),
            encounter_id: Some(encounter.id.clone()),
            value: None,
            unit: None,
            value_label: None,
            window_lower: None,
            window_upper: None,
            timing_type: None,
            relative_to: None,
            description: None,
        }
    }

    pub fn with_offset(mut self, value: f64, unit: impl Into<String>) -> Self {
        self.value = Some(value);
        self.unit = Some(unit.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.value_label = Some(label.into());
        self
    }

    /// Re-point the timepoint at `encounter`, restoring the name rule.
    pub fn attach_to(&mut self, encounter: &Encounter) {
        self.encounter_id = Some(encounter.id.clone());
        self.name = encounter.name.clone();
    }
}

/// A procedure or assessment: one row of the table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concept: Option<Code>,
}

impl Activity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
            activity_group_id: None,
            concept: None,
        }
    }

    pub fn in_group(mut self, group_id: impl Into<String>) -> Self {
        self.activity_group_id = Some(group_id.into());
        self
    }
}

/// Optional row section ("Laboratory", "Safety Assessments").
///
/// Before resolution the members are known by name only; [`resolve`]
/// fills `activity_ids` from a list of activities.
///
/// [`resolve`]: ActivityGroup::resolve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityGroup {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activity_names: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activity_ids: Vec<String>,
}

impl ActivityGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            activity_names: Vec::new(),
            activity_ids: Vec::new(),
        }
    }

    pub fn with_members<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.activity_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Resolve member names to activity ids (case-insensitive name match).
    ///
    /// Returns the member names that matched no activity.
    pub fn resolve(&mut self, activities: &[Activity]) -> Vec<String> {
        let mut unresolved = Vec::new();
        let mut ids = Vec::new();
        for member in &self.activity_names {
            let wanted = member.trim().to_lowercase();
            match activities
                .iter()
                .find(|a| a.name.trim().to_lowercase() == wanted)
            {
                Some(activity) => {
                    if !ids.contains(&activity.id) {
                        ids.push(activity.id.clone());
                    }
                }
                None => unresolved.push(member.clone()),
            }
        }
        self.activity_ids = ids;
        unresolved
    }
}

/// One matrix cell: `activity_id` is performed at `planned_timepoint_id`.
///
/// The pair is the whole identity; two cells with the same pair are the
/// same cell.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityTimepoint {
    pub activity_id: String,
    pub planned_timepoint_id: String,
}

impl ActivityTimepoint {
    pub fn new(activity_id: impl Into<String>, planned_timepoint_id: impl Into<String>) -> Self {
        Self {
            activity_id: activity_id.into(),
            planned_timepoint_id: planned_timepoint_id.into(),
        }
    }

    /// Provenance key of this cell: `"{activityId}|{timepointId}"`.
    pub fn key(&self) -> String {
        cell_key(&self.activity_id, &self.planned_timepoint_id)
    }
}

impl fmt::Display for ActivityTimepoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.activity_id, self.planned_timepoint_id)
    }
}

/// Build the cell key used by provenance records.
pub fn cell_key(activity_id: &str, timepoint_id: &str) -> String {
    format!("{}|{}", activity_id, timepoint_id)
}

/// A scheduled activity instance: the activities performed at one
/// encounter, as emitted by schedule-level extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledActivityInstance {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encounter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activity_ids: Vec<String>,
}

/// Higher-level schedule grouping scheduled instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTimeline {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub instances: Vec<ScheduledActivityInstance>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timepoint_takes_encounter_name() {
        let enc = Encounter::new("enc_1", "Screening");
        let tp = PlannedTimepoint::for_encounter("tp_1", &enc);
        assert_eq!(tp.name, "Screening");
        assert_eq!(tp.encounter_id.as_deref(), Some("enc_1"));
    }

    #[test]
    fn attach_to_restores_name_rule() {
        let enc_a = Encounter::new("enc_1", "Screening");
        let enc_b = Encounter::new("enc_2", "Day 1");
        let mut tp = PlannedTimepoint::for_encounter("tp_1", &enc_a);
        tp.attach_to(&enc_b);
        assert_eq!(tp.name, "Day 1");
        assert_eq!(tp.encounter_id.as_deref(), Some("enc_2"));
    }

    #[test]
    fn group_resolves_names_case_insensitively() {
        let activities = vec![
            Activity::new("act1", "Vital Signs"),
            Activity::new("act2", "Hematology"),
        ];
        let mut group = ActivityGroup::new("grp1", "Safety")
            .with_members(["vital signs", "Hematology", "ECG"]);

        let unresolved = group.resolve(&activities);
        assert_eq!(group.activity_ids, vec!["act1", "act2"]);
        assert_eq!(unresolved, vec!["ECG"]);
    }

    #[test]
    fn missing_id_is_rejected() {
        let result = serde_json::from_str::<Activity>(r#"{"name": "ECG"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn encounter_type_uses_usdm_field_name() {
        let enc: Encounter = serde_json::from_str(
            r#"{"id": "enc_1", "name": "Screening", "type": {"code": "C25716", "decode": "Visit"}}"#,
        )
        .unwrap();
        assert_eq!(enc.encounter_type.as_ref().map(|c| c.code.as_str()), Some("C25716"));

        let json = serde_json::to_value(&enc).unwrap();
        assert_eq!(json["type"]["decode"], "Visit");
        assert!(json.get("epochId").is_none());
    }

    #[test]
    fn cell_key_joins_with_pipe() {
        let cell = ActivityTimepoint::new("act1", "tp3");
        assert_eq!(cell.key(), "act1|tp3");
    }
}
