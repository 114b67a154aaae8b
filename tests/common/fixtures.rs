//! Timeline fixtures

#![allow(dead_code)]

use serde_json::{json, Value};
use soa_reconcile::{Activity, ActivityTimepoint, Encounter, PlannedTimepoint, Timeline};
use std::path::{Path, PathBuf};

/// A timeline with one activity, one visit and the cell joining them,
/// under the given run-local ids.
pub fn named_timeline(
    activity: (&str, &str),
    visit: (&str, &str),
) -> Timeline {
    let (activity_id, activity_name) = activity;
    let (timepoint_id, visit_name) = visit;
    let encounter = Encounter::new(format!("enc_{}", timepoint_id), visit_name);
    let mut t = Timeline::new();
    t.activities.push(Activity::new(activity_id, activity_name));
    t.planned_timepoints
        .push(PlannedTimepoint::for_encounter(timepoint_id, &encounter));
    t.encounters.push(encounter);
    t.activity_timepoints
        .push(ActivityTimepoint::new(activity_id, timepoint_id));
    t
}

/// A persisted timeline document with the given arrays.
pub fn study_document(timeline: Value) -> Value {
    json!({
        "usdmVersion": "3.0.0",
        "systemName": "fixture",
        "systemVersion": "0",
        "study": {"versions": [{"timeline": timeline}]}
    })
}

/// Write `value` as pretty JSON into `dir/name` and return the path.
pub fn write_json(dir: &Path, name: &str, value: &Value) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    path
}
