//! Prompt assembly for the three service-backed passes
//!
//! Only the task line and the JSON contract are fixed here; each task
//! line is unique so responses can be routed by it in tests.

use crate::model::HeaderStructure;
use serde_json::Value;

pub const HEADER_TASK: &str = "TASK: soa-header";
pub const TEXT_TASK: &str = "TASK: soa-text";
pub const VALIDATION_TASK: &str = "TASK: soa-validation";

pub fn header_prompt() -> String {
    format!(
        "{}\nIdentify the column structure of the Schedule of Activities table in the attached pages.\n\
         Respond with JSON only: {{\"columnHierarchy\": {{\"epochs\": [], \"encounters\": [], \"plannedTimepoints\": []}}, \
         \"rowGroups\": [{{\"id\": \"\", \"name\": \"\", \"activityNames\": []}}]}}",
        HEADER_TASK
    )
}

/// Text-pass prompt for one chunk, anchored to the header's ids.
pub fn text_prompt(header: &Value, chunk: &str) -> String {
    format!(
        "{}\nUsing ONLY the plannedTimepoint ids of this header:\n{}\n\
         list every activity in the text below and every (activity, timepoint) cell that is ticked.\n\
         Respond with JSON only: {{\"activities\": [{{\"id\": \"\", \"name\": \"\"}}], \
         \"activityTimepoints\": [{{\"activityId\": \"\", \"plannedTimepointId\": \"\"}}]}}\n\
         ---\n{}",
        TEXT_TASK, header, chunk
    )
}

/// Validation-pass prompt listing the cells to confirm.
pub fn validation_prompt(header: &HeaderStructure, cells: &Value) -> String {
    let columns: Vec<String> = header
        .planned_timepoints
        .iter()
        .map(|tp| format!("{} = {}", tp.id, tp.name))
        .collect();
    format!(
        "{}\nColumns: {}\nFor each cell below, report whether a tick is visible in the attached pages.\n\
         Respond with JSON only: {{\"cells\": [{{\"activityId\": \"\", \"plannedTimepointId\": \"\", \
         \"visible\": true, \"confidence\": 0.0}}]}}\n{}",
        VALIDATION_TASK,
        columns.join("; "),
        cells
    )
}
