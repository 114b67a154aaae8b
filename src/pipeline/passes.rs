//! Service-backed passes: header anchor, text extraction, validation
//!
//! Within a pass every service call runs as its own task, bounded by the
//! pipeline semaphore. The pass waits for all of them, then a single
//! collector folds the per-call results in input order. A failed or
//! timed-out call is recorded and its contribution dropped; siblings are
//! never cancelled.

use super::prompts;
use super::report::{PipelineReport, Stage};
use super::{Pipeline, PipelineError};
use crate::fixup::{CellVerdict, VerdictResponse};
use crate::llm::PageImage;
use crate::model::{Activity, ActivityTimepoint, HeaderStructure, Timeline};
use crate::reconcile::canonical_key;
use crate::response;
use crate::validate::{normalize_id, AliasIndex};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinSet;

/// Text-pass response of one chunk.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct TextResponse {
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub activity_timepoints: Vec<ActivityTimepoint>,
}

/// Activities and cells folded from every chunk of the text pass.
#[derive(Debug, Default)]
pub struct TextPassOutput {
    pub activities: Vec<Activity>,
    pub cells: Vec<ActivityTimepoint>,
}

impl Pipeline {
    /// Fan out one call per prompt and collect `(index, result)` pairs in
    /// input order.
    async fn fan_out<T>(
        &self,
        stage: Stage,
        calls: Vec<(String, Vec<PageImage>)>,
        report: &mut PipelineReport,
    ) -> Vec<(usize, T)>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let mut set = JoinSet::new();
        for (index, (prompt, images)) in calls.into_iter().enumerate() {
            let client = self.client.clone();
            let semaphore = Arc::clone(&self.semaphore);
            set.spawn(async move {
                let result: Result<T, String> = async {
                    let _permit = semaphore.acquire_owned().await.map_err(|e| e.to_string())?;
                    let text = client.call(&prompt, &images).await.map_err(|e| e.to_string())?;
                    response::parse_as::<T>(&text).map_err(|e| e.to_string())
                }
                .await;
                (index, result)
            });
        }

        // Join barrier: nothing is folded until every call has finished
        let mut finished = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => finished.push(pair),
                Err(e) => {
                    report.record_attempt(stage, false);
                    report.record_issue(stage, format!("task failed: {}", e));
                }
            }
        }
        finished.sort_by_key(|(index, _)| *index);

        let mut collected = Vec::with_capacity(finished.len());
        for (index, result) in finished {
            match result {
                Ok(value) => {
                    report.record_attempt(stage, true);
                    collected.push((index, value));
                }
                Err(message) => {
                    tracing::warn!(stage = %stage, unit = index, error = %message, "service call dropped");
                    report.record_attempt(stage, false);
                    report.record_issue(stage, format!("unit {}: {}", index + 1, message));
                }
            }
        }
        collected
    }

    /// Anchor pass: one call over all page images.
    ///
    /// A failed anchor yields an empty header and an issue; the text pass
    /// can still produce activities.
    pub async fn header_pass(
        &self,
        images: &[PageImage],
        report: &mut PipelineReport,
    ) -> HeaderStructure {
        let calls = vec![(prompts::header_prompt(), images.to_vec())];
        let results: Vec<(usize, Value)> = self.fan_out(Stage::Header, calls, report).await;

        match results.into_iter().next() {
            Some((_, value)) => match HeaderStructure::from_value(&value) {
                Ok(header) => {
                    tracing::info!(
                        epochs = header.epochs.len(),
                        encounters = header.encounters.len(),
                        timepoints = header.planned_timepoints.len(),
                        groups = header.activity_groups.len(),
                        "header anchored"
                    );
                    header
                }
                Err(e) => {
                    report.record_issue(Stage::Header, format!("unusable header: {}", e));
                    HeaderStructure::default()
                }
            },
            None => HeaderStructure::default(),
        }
    }

    /// Text pass: one call per chunk, anchored to the header's ids.
    pub async fn text_pass(
        &self,
        header: &HeaderStructure,
        chunks: &[String],
        report: &mut PipelineReport,
    ) -> Result<TextPassOutput, PipelineError> {
        let header_json = header.to_value()?;
        let calls = chunks
            .iter()
            .map(|chunk| (prompts::text_prompt(&header_json, chunk), Vec::new()))
            .collect();
        let results: Vec<(usize, TextResponse)> = self.fan_out(Stage::Text, calls, report).await;

        let mut collector = TextCollector::new(header);
        for (index, response) in results {
            collector.absorb(index, response);
        }
        let output = collector.finish();
        tracing::info!(
            chunks = chunks.len(),
            activities = output.activities.len(),
            cells = output.cells.len(),
            "text pass complete"
        );
        Ok(output)
    }

    /// Validation pass: one call per page image, each asked about every
    /// current cell.
    pub async fn validation_pass(
        &self,
        header: &HeaderStructure,
        timeline: &Timeline,
        images: &[PageImage],
        report: &mut PipelineReport,
    ) -> Vec<CellVerdict> {
        if timeline.activity_timepoints.is_empty() {
            return Vec::new();
        }
        let cells: Vec<Value> = timeline
            .activity_timepoints
            .iter()
            .map(|c| {
                let name = timeline.activity(&c.activity_id).map(|a| a.name.as_str());
                json!({
                    "activityId": c.activity_id,
                    "activityName": name,
                    "plannedTimepointId": c.planned_timepoint_id,
                })
            })
            .collect();
        let prompt = prompts::validation_prompt(header, &Value::Array(cells));
        let calls = images
            .iter()
            .map(|image| (prompt.clone(), vec![image.clone()]))
            .collect();
        let results: Vec<(usize, VerdictResponse)> =
            self.fan_out(Stage::Validation, calls, report).await;

        let verdicts = combine_verdicts(results.into_iter().map(|(_, r)| r.into_verdicts()));
        tracing::info!(pages = images.len(), verdicts = verdicts.len(), "validation pass complete");
        verdicts
    }
}

/// Folds chunk responses into one activity list and matrix.
///
/// Activities are deduplicated by canonical name across chunks; a later
/// chunk reusing an earlier id for a different activity gets a fresh id.
/// Cell timepoint references are resolved against the header, accepting
/// encounter ids in place of their timepoint ids.
struct TextCollector {
    activities: Vec<Activity>,
    by_name: HashMap<String, String>,
    used_ids: HashSet<String>,
    cells: Vec<ActivityTimepoint>,
    seen_cells: HashSet<(String, String)>,
    timepoints: AliasIndex,
    encounters: AliasIndex,
    timepoint_of_encounter: HashMap<String, String>,
}

impl TextCollector {
    fn new(header: &HeaderStructure) -> Self {
        let timepoint_of_encounter = header
            .planned_timepoints
            .iter()
            .filter_map(|tp| Some((tp.encounter_id.clone()?, tp.id.clone())))
            .collect();
        Self {
            activities: Vec::new(),
            by_name: HashMap::new(),
            used_ids: HashSet::new(),
            cells: Vec::new(),
            seen_cells: HashSet::new(),
            timepoints: AliasIndex::new(header.planned_timepoints.iter().map(|t| t.id.as_str())),
            encounters: AliasIndex::for_encounters(header.encounters.iter().map(|e| e.id.as_str())),
            timepoint_of_encounter,
        }
    }

    fn absorb(&mut self, chunk: usize, response: TextResponse) {
        let mut remap: HashMap<String, String> = HashMap::new();

        for mut activity in response.activities {
            let local = normalize_id(&activity.id);
            let key = canonical_key(&activity.name);
            if let Some(existing) = self.by_name.get(&key) {
                remap.insert(local, existing.clone());
                continue;
            }
            if self.used_ids.contains(&local) {
                activity.id = self.fresh_id(&activity.id, chunk);
            }
            self.used_ids.insert(normalize_id(&activity.id));
            self.by_name.insert(key, activity.id.clone());
            remap.insert(local, activity.id.clone());
            self.activities.push(activity);
        }

        for cell in response.activity_timepoints {
            let activity_id = remap
                .get(&normalize_id(&cell.activity_id))
                .cloned()
                .unwrap_or(cell.activity_id);
            let timepoint_id = self.resolve_timepoint(&cell.planned_timepoint_id);
            if self
                .seen_cells
                .insert((normalize_id(&activity_id), normalize_id(&timepoint_id)))
            {
                self.cells.push(ActivityTimepoint::new(activity_id, timepoint_id));
            }
        }
    }

    fn resolve_timepoint(&self, reference: &str) -> String {
        if let Some(id) = self.timepoints.resolve(reference) {
            return id.to_string();
        }
        self.encounters
            .resolve(reference)
            .and_then(|enc| self.timepoint_of_encounter.get(enc))
            .cloned()
            .unwrap_or_else(|| reference.to_string())
    }

    fn fresh_id(&self, base: &str, chunk: usize) -> String {
        let mut n = chunk + 1;
        loop {
            let candidate = format!("{}_c{}", base, n);
            if !self.used_ids.contains(&normalize_id(&candidate)) {
                return candidate;
            }
            n += 1;
        }
    }

    fn finish(self) -> TextPassOutput {
        TextPassOutput {
            activities: self.activities,
            cells: self.cells,
        }
    }
}

/// Combine per-page verdicts into one verdict per cell.
///
/// A cell seen on any page is visible, with the highest confidence among
/// the pages that saw it. A cell seen on no page is not visible, with the
/// lowest confidence reported, since a tick may sit on a page that was
/// less sure.
pub fn combine_verdicts(pages: impl IntoIterator<Item = Vec<CellVerdict>>) -> Vec<CellVerdict> {
    let mut combined: BTreeMap<(String, String), CellVerdict> = BTreeMap::new();
    let mut order = Vec::new();

    for verdict in pages.into_iter().flatten() {
        let key = (
            normalize_id(&verdict.activity_id),
            normalize_id(&verdict.planned_timepoint_id),
        );
        match combined.get_mut(&key) {
            None => {
                order.push(key.clone());
                combined.insert(key, verdict);
            }
            Some(existing) => match (existing.visible, verdict.visible) {
                (true, true) => existing.confidence = existing.confidence.max(verdict.confidence),
                (false, true) => *existing = verdict,
                (false, false) => existing.confidence = existing.confidence.min(verdict.confidence),
                (true, false) => {}
            },
        }
    }

    order
        .into_iter()
        .filter_map(|key| combined.remove(&key))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Encounter, PlannedTimepoint};

    fn header() -> HeaderStructure {
        HeaderStructure::new(
            Vec::new(),
            vec![Encounter::new("enc_1", "Screening"), Encounter::new("enc_2", "Day 1")],
            vec![
                PlannedTimepoint::for_encounter("tp_1", &Encounter::new("enc_1", "Screening")),
                PlannedTimepoint::for_encounter("tp_2", &Encounter::new("enc_2", "Day 1")),
            ],
            Vec::new(),
        )
    }

    fn chunk_response(acts: &[(&str, &str)], cells: &[(&str, &str)]) -> TextResponse {
        TextResponse {
            activities: acts.iter().map(|(id, name)| Activity::new(*id, *name)).collect(),
            activity_timepoints: cells
                .iter()
                .map(|(a, t)| ActivityTimepoint::new(*a, *t))
                .collect(),
        }
    }

    #[test]
    fn same_activity_in_two_chunks_is_kept_once() {
        let h = header();
        let mut c = TextCollector::new(&h);
        c.absorb(0, chunk_response(&[("act_1", "ECG")], &[("act_1", "tp_1")]));
        c.absorb(1, chunk_response(&[("a9", "ecg")], &[("a9", "tp_2")]));
        let out = c.finish();
        assert_eq!(out.activities.len(), 1);
        assert_eq!(
            out.cells,
            vec![
                ActivityTimepoint::new("act_1", "tp_1"),
                ActivityTimepoint::new("act_1", "tp_2")
            ]
        );
    }

    #[test]
    fn reused_id_for_other_activity_gets_fresh_id() {
        let h = header();
        let mut c = TextCollector::new(&h);
        c.absorb(0, chunk_response(&[("act_1", "ECG")], &[]));
        c.absorb(1, chunk_response(&[("act_1", "Hematology")], &[("act_1", "tp_1")]));
        let out = c.finish();
        assert_eq!(out.activities[1].id, "act_1_c2");
        assert_eq!(out.cells, vec![ActivityTimepoint::new("act_1_c2", "tp_1")]);
    }

    #[test]
    fn encounter_ids_resolve_to_their_timepoints() {
        let h = header();
        let mut c = TextCollector::new(&h);
        c.absorb(
            0,
            chunk_response(&[("act_1", "ECG")], &[("act_1", "encounter_2"), ("act-1", "tp-1"), ("act_1", "tp_1")]),
        );
        let out = c.finish();
        assert_eq!(
            out.cells,
            vec![
                ActivityTimepoint::new("act_1", "tp_2"),
                ActivityTimepoint::new("act_1", "tp_1")
            ]
        );
    }

    #[test]
    fn verdicts_from_pages_are_combined() {
        let page1 = vec![
            CellVerdict::new("a", "t1", false, 0.9),
            CellVerdict::new("a", "t2", false, 0.95),
        ];
        let page2 = vec![
            CellVerdict::new("a", "t1", true, 0.6),
            CellVerdict::new("a", "t2", false, 0.4),
        ];
        let combined = combine_verdicts([page1, page2]);
        assert_eq!(
            combined,
            vec![
                CellVerdict::new("a", "t1", true, 0.6),
                CellVerdict::new("a", "t2", false, 0.4)
            ]
        );
    }
}
