//! Identity-resolution merger for independently identified timelines
//!
//! Each source timeline uses its own run-local ids. The merger maps every
//! source id to a canonical name, deduplicates entities by that name
//! (first seen wins for field values), takes the union of all matrix
//! cells as (activity name, timepoint name) pairs, and finally re-creates
//! every entity under fresh sequential ids. No source id survives the
//! merge.

use super::canonical::{canonical_key, split_timing, NameResolver};
use crate::model::{
    Activity, ActivityGroup, ActivityTimepoint, Encounter, Epoch, PlannedTimepoint, Timeline,
    TimelineDocument, TimingWindow,
};
use crate::provenance::{EntityKind, Origin, ProvenanceTracker};
use crate::validate::normalize_id;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// A source timeline was unusable and has been skipped.
#[derive(Debug, Clone, Error)]
#[error("source '{label}' skipped: {reason}")]
pub struct MergeInputError {
    pub label: String,
    pub reason: String,
}

/// Fatal merge failures.
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("no valid input: all {attempted} source(s) were unusable")]
    NoValidInput {
        attempted: usize,
        skipped: Vec<MergeInputError>,
    },
}

/// One independently extracted timeline document.
#[derive(Debug, Clone)]
pub struct MergeSource {
    /// Name used in logs and skip reports ("text", "vision", a file name).
    pub label: String,
    /// Origin tag given to everything this source contributes.
    pub origin: Origin,
    /// The persisted timeline document as JSON.
    pub document: Value,
    /// Why the document could not be loaded, if it could not.
    pub load_error: Option<String>,
}

impl MergeSource {
    pub fn new(label: impl Into<String>, origin: Origin, document: Value) -> Self {
        Self {
            label: label.into(),
            origin,
            document,
            load_error: None,
        }
    }

    /// A source that could not be loaded; the merger skips it with `reason`.
    pub fn unreadable(label: impl Into<String>, origin: Origin, reason: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            origin,
            document: Value::Null,
            load_error: Some(reason.into()),
        }
    }

    /// Read a timeline file. Read and JSON errors are kept as the skip reason.
    pub fn read(path: &Path, origin: Origin) -> Self {
        let label = path.display().to_string();
        let parsed = std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read: {}", e))
            .and_then(|text| {
                serde_json::from_str::<Value>(&text).map_err(|e| format!("invalid JSON: {}", e))
            });
        match parsed {
            Ok(document) => Self::new(label, origin, document),
            Err(reason) => Self::unreadable(label, origin, reason),
        }
    }

    /// Wrap an already-built timeline.
    pub fn from_timeline(
        label: impl Into<String>,
        origin: Origin,
        timeline: Timeline,
    ) -> Result<Self, crate::model::ModelError> {
        Ok(Self::new(label, origin, TimelineDocument::new(timeline).to_value()?))
    }
}

/// Result of a successful merge.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub timeline: Timeline,
    pub provenance: ProvenanceTracker,
    /// Sources that were skipped.
    pub skipped: Vec<MergeInputError>,
    /// Cells dropped because a source referenced ids it never defined.
    pub unresolved_cells: Vec<String>,
    /// Number of sources that contributed.
    pub sources_used: usize,
}

/// Insertion-ordered map from canonical key to a draft entity and the
/// combined origin of every source that contributed it.
struct Registry<T> {
    resolver: NameResolver,
    index: HashMap<String, usize>,
    entries: Vec<(String, T, Origin)>,
}

impl<T> Registry<T> {
    fn new(threshold: f64) -> Self {
        Self {
            resolver: NameResolver::new(threshold),
            index: HashMap::new(),
            entries: Vec::new(),
        }
    }

    /// Resolve `key`, insert `make()` if unseen, and fold `origin` in.
    ///
    /// `fill` runs on an existing entry so later sources can supply fields
    /// the first one left empty.
    fn upsert(
        &mut self,
        key: &str,
        origin: Origin,
        make: impl FnOnce() -> T,
        fill: impl FnOnce(&mut T),
    ) -> String {
        let key = self.resolver.resolve(key);
        match self.index.get(&key) {
            Some(&i) => {
                let entry = &mut self.entries[i];
                fill(&mut entry.1);
                entry.2 = entry.2.combine(origin);
            }
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key.clone(), make(), origin));
            }
        }
        key
    }

    fn get_mut(&mut self, key: &str) -> Option<&mut T> {
        let i = *self.index.get(key)?;
        Some(&mut self.entries[i].1)
    }
}

/// A visit column: encounter and timepoint share one name key.
struct ColumnDraft {
    encounter: Option<Encounter>,
    timepoint: Option<PlannedTimepoint>,
    epoch_key: Option<String>,
}

struct ActivityDraft {
    activity: Activity,
    group_key: Option<String>,
}

struct GroupDraft {
    group: ActivityGroup,
    member_keys: Vec<String>,
}

/// Merges independently identified timelines by name.
#[derive(Debug, Clone)]
pub struct IdentityMerger {
    name_match_threshold: f64,
}

impl Default for IdentityMerger {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_NAME_MATCH_THRESHOLD)
    }
}

struct MergeState {
    epochs: Registry<Epoch>,
    columns: Registry<ColumnDraft>,
    activities: Registry<ActivityDraft>,
    groups: Registry<GroupDraft>,
    cells: Registry<()>,
    unresolved_cells: Vec<String>,
}

impl IdentityMerger {
    pub fn new(name_match_threshold: f64) -> Self {
        Self {
            name_match_threshold,
        }
    }

    pub fn name_match_threshold(&self) -> f64 {
        self.name_match_threshold
    }

    /// Merge all usable sources into one re-indexed timeline.
    pub fn merge(&self, sources: &[MergeSource]) -> Result<MergeOutcome, MergeError> {
        let threshold = self.name_match_threshold;
        let mut state = MergeState {
            epochs: Registry::new(threshold),
            columns: Registry::new(threshold),
            activities: Registry::new(threshold),
            groups: Registry::new(threshold),
            // Cell keys are already canonical pairs; no fuzzy matching
            cells: Registry::new(1.0),
            unresolved_cells: Vec::new(),
        };
        let mut skipped = Vec::new();
        let mut used = 0;

        for source in sources {
            let loaded = match &source.load_error {
                Some(reason) => Err(reason.clone()),
                None => TimelineDocument::from_value(&source.document).map_err(|e| e.to_string()),
            };
            match loaded {
                Ok(doc) => {
                    tracing::debug!(source = %source.label, origin = %source.origin, "merging source");
                    self.collect(&mut state, doc.timeline(), source);
                    used += 1;
                }
                Err(e) => {
                    tracing::warn!(source = %source.label, error = %e, "skipping unusable merge source");
                    skipped.push(MergeInputError {
                        label: source.label.clone(),
                        reason: e,
                    });
                }
            }
        }

        if used == 0 {
            return Err(MergeError::NoValidInput {
                attempted: sources.len(),
                skipped,
            });
        }

        let (timeline, provenance) = reindex(state.epochs, state.columns, state.activities, state.groups, &state.cells);

        tracing::info!(
            sources = used,
            skipped = skipped.len(),
            activities = timeline.activities.len(),
            timepoints = timeline.planned_timepoints.len(),
            cells = timeline.activity_timepoints.len(),
            "identity-resolution merge complete"
        );

        Ok(MergeOutcome {
            timeline,
            provenance,
            skipped,
            unresolved_cells: state.unresolved_cells,
            sources_used: used,
        })
    }

    /// Phase one: map this source's ids to canonical keys and register its
    /// entities and cells.
    fn collect(&self, state: &mut MergeState, timeline: &Timeline, source: &MergeSource) {
        let origin = source.origin;
        let mut epoch_keys: HashMap<String, String> = HashMap::new();
        let mut column_keys: HashMap<String, String> = HashMap::new();
        let mut timepoint_keys: HashMap<String, String> = HashMap::new();
        let mut activity_keys: HashMap<String, String> = HashMap::new();
        let mut group_keys: HashMap<String, String> = HashMap::new();

        for epoch in &timeline.epochs {
            let key = state.epochs.upsert(
                &canonical_key(&epoch.name),
                origin,
                || epoch.clone(),
                |existing| {
                    if existing.description.is_none() {
                        existing.description = epoch.description.clone();
                    }
                },
            );
            epoch_keys.insert(normalize_id(&epoch.id), key);
        }

        for encounter in &timeline.encounters {
            let (label, timing) = split_timing(&encounter.name);
            let epoch_key = encounter
                .epoch_id
                .as_deref()
                .and_then(|id| epoch_keys.get(&normalize_id(id)).cloned());
            let draft = with_timing(encounter.clone(), &label, timing);
            let key = state.columns.upsert(
                &canonical_key(&label),
                origin,
                || ColumnDraft {
                    encounter: Some(draft.clone()),
                    timepoint: None,
                    epoch_key: epoch_key.clone(),
                },
                |column| {
                    if column.encounter.is_none() {
                        column.encounter = Some(draft.clone());
                    }
                    if column.epoch_key.is_none() {
                        column.epoch_key = epoch_key.clone();
                    }
                },
            );
            column_keys.insert(normalize_id(&encounter.id), key);
        }

        for tp in &timeline.planned_timepoints {
            // Prefer the owning encounter's key; fall back to the name
            let key = match tp
                .encounter_id
                .as_deref()
                .and_then(|id| column_keys.get(&normalize_id(id)))
            {
                Some(key) => key.clone(),
                None => {
                    let (label, timing) = split_timing(&tp.name);
                    let mut draft = tp.clone();
                    draft.name = label.clone();
                    if draft.value_label.is_none() {
                        draft.value_label = timing;
                    }
                    state.columns.upsert(
                        &canonical_key(&label),
                        origin,
                        || ColumnDraft {
                            encounter: None,
                            timepoint: Some(draft.clone()),
                            epoch_key: None,
                        },
                        |_| {},
                    )
                }
            };
            if let Some(column) = state.columns.get_mut(&key) {
                if column.timepoint.is_none() {
                    column.timepoint = Some(tp.clone());
                }
            }
            timepoint_keys.insert(normalize_id(&tp.id), key);
        }

        for group in &timeline.activity_groups {
            let key = state.groups.upsert(
                &canonical_key(&group.name),
                origin,
                || GroupDraft {
                    group: group.clone(),
                    member_keys: Vec::new(),
                },
                |_| {},
            );
            group_keys.insert(normalize_id(&group.id), key);
        }

        for activity in &timeline.activities {
            let group_key = activity
                .activity_group_id
                .as_deref()
                .and_then(|id| group_keys.get(&normalize_id(id)).cloned());
            let key = state.activities.upsert(
                &canonical_key(&activity.name),
                origin,
                || ActivityDraft {
                    activity: activity.clone(),
                    group_key: group_key.clone(),
                },
                |draft| {
                    if draft.activity.description.is_none() {
                        draft.activity.description = activity.description.clone();
                    }
                    if draft.group_key.is_none() {
                        draft.group_key = group_key.clone();
                    }
                },
            );
            activity_keys.insert(normalize_id(&activity.id), key);
        }

        // Group membership, by member name or by member id
        for group in &timeline.activity_groups {
            let Some(group_key) = group_keys.get(&normalize_id(&group.id)).cloned() else {
                continue;
            };
            let mut members: Vec<String> = group
                .activity_ids
                .iter()
                .filter_map(|id| activity_keys.get(&normalize_id(id)).cloned())
                .collect();
            members.extend(group.activity_names.iter().map(|n| canonical_key(n)));
            if let Some(draft) = state.groups.get_mut(&group_key) {
                for m in members {
                    if !draft.member_keys.contains(&m) {
                        draft.member_keys.push(m);
                    }
                }
            }
        }

        for cell in &timeline.activity_timepoints {
            let act_key = activity_keys.get(&normalize_id(&cell.activity_id));
            let tp_key = timepoint_keys
                .get(&normalize_id(&cell.planned_timepoint_id))
                .or_else(|| column_keys.get(&normalize_id(&cell.planned_timepoint_id)));
            match (act_key, tp_key) {
                (Some(a), Some(t)) => {
                    state
                        .cells
                        .upsert(&pair_key(a, t), origin, || (), |_| {});
                }
                _ => {
                    tracing::warn!(source = %source.label, cell = %cell, "cell references undefined ids");
                    state
                        .unresolved_cells
                        .push(format!("{}: {}", source.label, cell.key()));
                }
            }
        }
    }
}

/// Canonical pair key; `\u{1f}` cannot occur in a folded name.
fn pair_key(activity_key: &str, timepoint_key: &str) -> String {
    format!("{}\u{1f}{}", activity_key, timepoint_key)
}

fn split_pair_key(key: &str) -> Option<(&str, &str)> {
    key.split_once('\u{1f}')
}

/// Rename an encounter to its label, moving the timing fragment into the
/// window label when that is still empty.
fn with_timing(mut encounter: Encounter, label: &str, timing: Option<String>) -> Encounter {
    encounter.name = label.to_string();
    if let Some(timing) = timing {
        let window = encounter.window.get_or_insert_with(TimingWindow::default);
        if window.label.is_none() {
            window.label = Some(timing);
        }
    }
    encounter
}

/// Phase two: fresh sequential ids and matrix reconstruction.
fn reindex(
    epochs: Registry<Epoch>,
    columns: Registry<ColumnDraft>,
    activities: Registry<ActivityDraft>,
    groups: Registry<GroupDraft>,
    cells: &Registry<()>,
) -> (Timeline, ProvenanceTracker) {
    let mut timeline = Timeline::new();
    let mut provenance = ProvenanceTracker::new();

    let mut epoch_ids: HashMap<String, String> = HashMap::new();
    for (n, (key, mut epoch, origin)) in epochs.entries.into_iter().enumerate() {
        epoch.id = format!("epoch{}", n + 1);
        epoch.position = Some(n as u32 + 1);
        provenance.tag_entity(EntityKind::Epochs, epoch.id.clone(), origin);
        epoch_ids.insert(key, epoch.id.clone());
        timeline.epochs.push(epoch);
    }

    let mut group_ids: HashMap<String, String> = HashMap::new();
    let mut group_drafts = Vec::new();
    for (n, (key, draft, origin)) in groups.entries.into_iter().enumerate() {
        let id = format!("grp{}", n + 1);
        provenance.tag_entity(EntityKind::ActivityGroups, id.clone(), origin);
        group_ids.insert(key, id.clone());
        group_drafts.push((id, draft));
    }

    let mut activity_ids: HashMap<String, String> = HashMap::new();
    for (n, (key, draft, origin)) in activities.entries.into_iter().enumerate() {
        let mut activity = draft.activity;
        activity.id = format!("act{}", n + 1);
        activity.activity_group_id = draft.group_key.and_then(|k| group_ids.get(&k).cloned());
        provenance.tag_entity(EntityKind::Activities, activity.id.clone(), origin);
        activity_ids.insert(key, activity.id.clone());
        timeline.activities.push(activity);
    }

    for (id, draft) in group_drafts {
        let mut group = draft.group;
        group.id = id;
        group.activity_ids = Vec::new();
        group.activity_names = Vec::new();
        for member in draft.member_keys {
            if let Some(act_id) = activity_ids.get(&member) {
                if !group.activity_ids.contains(act_id) {
                    group.activity_ids.push(act_id.clone());
                    if let Some(a) = timeline.activities.iter().find(|a| &a.id == act_id) {
                        group.activity_names.push(a.name.clone());
                    }
                }
            }
        }
        timeline.activity_groups.push(group);
    }

    let mut timepoint_ids: HashMap<String, String> = HashMap::new();
    for (n, (key, draft, origin)) in columns.entries.into_iter().enumerate() {
        let enc_id = format!("enc{}", n + 1);
        let tp_id = format!("tp{}", n + 1);

        let mut encounter = match (draft.encounter, &draft.timepoint) {
            (Some(e), _) => e,
            // Timepoint-only sources still need a visit for the timepoint
            (None, Some(tp)) => Encounter::new("", tp.name.clone()),
            (None, None) => Encounter::new("", key.clone()),
        };
        encounter.id = enc_id;
        encounter.epoch_id = draft.epoch_key.and_then(|k| epoch_ids.get(&k).cloned());

        let timepoint = match draft.timepoint {
            Some(mut tp) => {
                tp.id = tp_id;
                tp.attach_to(&encounter);
                tp
            }
            None => PlannedTimepoint::for_encounter(tp_id, &encounter),
        };

        provenance.tag_entity(EntityKind::Encounters, encounter.id.clone(), origin);
        provenance.tag_entity(EntityKind::PlannedTimepoints, timepoint.id.clone(), origin);
        timepoint_ids.insert(key, timepoint.id.clone());
        timeline.encounters.push(encounter);
        timeline.planned_timepoints.push(timepoint);
    }

    for (key, (), origin) in &cells.entries {
        let Some((act_key, tp_key)) = split_pair_key(key) else {
            continue;
        };
        if let (Some(a), Some(t)) = (activity_ids.get(act_key), timepoint_ids.get(tp_key)) {
            let cell = ActivityTimepoint::new(a.clone(), t.clone());
            provenance.tag_cell_key(cell.key(), *origin);
            timeline.add_cell(cell);
        }
    }

    (timeline, provenance)
}
