//! Referential-integrity checks over a timeline

use super::alias::AliasIndex;
use crate::model::Timeline;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

/// Which reference failed to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkageKind {
    EncounterEpoch,
    TimepointEncounter,
    TimepointName,
    CellActivity,
    CellTimepoint,
    InstanceEncounter,
    InstanceEpoch,
    InstanceActivity,
    ActivityGroup,
    GroupMember,
    DuplicateId,
}

impl LinkageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EncounterEpoch => "encounter_epoch",
            Self::TimepointEncounter => "timepoint_encounter",
            Self::TimepointName => "timepoint_name",
            Self::CellActivity => "cell_activity",
            Self::CellTimepoint => "cell_timepoint",
            Self::InstanceEncounter => "instance_encounter",
            Self::InstanceEpoch => "instance_epoch",
            Self::InstanceActivity => "instance_activity",
            Self::ActivityGroup => "activity_group",
            Self::GroupMember => "group_member",
            Self::DuplicateId => "duplicate_id",
        }
    }
}

impl fmt::Display for LinkageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A dangling or inconsistent reference.
///
/// Advisory: the validator reports these, callers decide what is fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkageError {
    pub kind: LinkageKind,
    /// Id of the entity holding the reference (cell key for matrix cells).
    pub entity_id: String,
    /// The reference that did not resolve.
    pub reference: String,
}

impl LinkageError {
    pub fn new(kind: LinkageKind, entity_id: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            kind,
            entity_id: entity_id.into(),
            reference: reference.into(),
        }
    }
}

impl fmt::Display for LinkageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (e, r) = (&self.entity_id, &self.reference);
        let message = match self.kind {
            LinkageKind::EncounterEpoch => {
                format!("Encounter '{}' references unknown epochId '{}'", e, r)
            }
            LinkageKind::TimepointEncounter => {
                format!("PlannedTimepoint '{}' references unknown encounterId '{}'", e, r)
            }
            LinkageKind::TimepointName => format!(
                "PlannedTimepoint '{}' name differs from its encounter '{}'",
                e, r
            ),
            LinkageKind::CellActivity => {
                format!("ActivityTimepoint '{}' references unknown activityId '{}'", e, r)
            }
            LinkageKind::CellTimepoint => format!(
                "ActivityTimepoint '{}' references unknown plannedTimepointId '{}'",
                e, r
            ),
            LinkageKind::InstanceEncounter => format!(
                "ScheduledActivityInstance '{}' references unknown encounterId '{}'",
                e, r
            ),
            LinkageKind::InstanceEpoch => format!(
                "ScheduledActivityInstance '{}' references unknown epochId '{}'",
                e, r
            ),
            LinkageKind::InstanceActivity => format!(
                "ScheduledActivityInstance '{}' references unknown activityId '{}'",
                e, r
            ),
            LinkageKind::ActivityGroup => {
                format!("Activity '{}' references unknown activityGroupId '{}'", e, r)
            }
            LinkageKind::GroupMember => {
                format!("ActivityGroup '{}' lists unknown activity id '{}'", e, r)
            }
            LinkageKind::DuplicateId => format!("duplicate id '{}' in {}", e, r),
        };
        f.write_str(&message)
    }
}

impl std::error::Error for LinkageError {}

/// Per-collection counts, reported alongside linkage errors.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletenessMetrics {
    pub activities: usize,
    pub planned_timepoints: usize,
    pub encounters: usize,
    pub epochs: usize,
    pub activity_groups: usize,
    pub activity_timepoints: usize,
    pub scheduled_instances: usize,
    /// Activities that appear in no matrix cell.
    pub activities_without_cells: usize,
    /// Timepoints that appear in no matrix cell.
    pub timepoints_without_cells: usize,
}

impl CompletenessMetrics {
    pub fn of(timeline: &Timeline) -> Self {
        let used_activities: HashSet<&str> = timeline
            .activity_timepoints
            .iter()
            .map(|c| c.activity_id.as_str())
            .collect();
        let used_timepoints: HashSet<&str> = timeline
            .activity_timepoints
            .iter()
            .map(|c| c.planned_timepoint_id.as_str())
            .collect();

        Self {
            activities: timeline.activities.len(),
            planned_timepoints: timeline.planned_timepoints.len(),
            encounters: timeline.encounters.len(),
            epochs: timeline.epochs.len(),
            activity_groups: timeline.activity_groups.len(),
            activity_timepoints: timeline.activity_timepoints.len(),
            scheduled_instances: timeline
                .schedule_timelines
                .iter()
                .map(|s| s.instances.len())
                .sum(),
            activities_without_cells: timeline
                .activities
                .iter()
                .filter(|a| !used_activities.contains(a.id.as_str()))
                .count(),
            timepoints_without_cells: timeline
                .planned_timepoints
                .iter()
                .filter(|t| !used_timepoints.contains(t.id.as_str()))
                .count(),
        }
    }
}

/// Validation result: errors plus completeness metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub errors: Vec<LinkageError>,
    pub metrics: CompletenessMetrics,
}

impl ValidationReport {
    /// True when no linkage error was found. Says nothing about whether the
    /// timeline is complete enough to ship.
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn errors_of(&self, kind: LinkageKind) -> impl Iterator<Item = &LinkageError> {
        self.errors.iter().filter(move |e| e.kind == kind)
    }
}

/// Check every reference in `timeline`. Never fails.
pub fn validate(timeline: &Timeline) -> Vec<LinkageError> {
    let epochs = AliasIndex::new(timeline.epochs.iter().map(|e| e.id.as_str()));
    let encounters = AliasIndex::for_encounters(timeline.encounters.iter().map(|e| e.id.as_str()));
    let timepoints = AliasIndex::new(timeline.planned_timepoints.iter().map(|t| t.id.as_str()));
    let activities = AliasIndex::new(timeline.activities.iter().map(|a| a.id.as_str()));
    let groups = AliasIndex::new(timeline.activity_groups.iter().map(|g| g.id.as_str()));

    let mut errors = Vec::new();

    check_duplicates(timeline, &mut errors);

    for encounter in &timeline.encounters {
        if let Some(epoch_id) = &encounter.epoch_id {
            if !epochs.contains(epoch_id) {
                errors.push(LinkageError::new(
                    LinkageKind::EncounterEpoch,
                    &encounter.id,
                    epoch_id,
                ));
            }
        }
    }

    for tp in &timeline.planned_timepoints {
        let Some(enc_ref) = &tp.encounter_id else {
            continue;
        };
        match encounters.resolve(enc_ref).and_then(|id| timeline.encounter(id)) {
            Some(encounter) => {
                if encounter.name != tp.name {
                    errors.push(LinkageError::new(
                        LinkageKind::TimepointName,
                        &tp.id,
                        &encounter.id,
                    ));
                }
            }
            None => errors.push(LinkageError::new(
                LinkageKind::TimepointEncounter,
                &tp.id,
                enc_ref,
            )),
        }
    }

    for cell in &timeline.activity_timepoints {
        if !activities.contains(&cell.activity_id) {
            errors.push(LinkageError::new(
                LinkageKind::CellActivity,
                cell.key(),
                &cell.activity_id,
            ));
        }
        if !timepoints.contains(&cell.planned_timepoint_id) {
            errors.push(LinkageError::new(
                LinkageKind::CellTimepoint,
                cell.key(),
                &cell.planned_timepoint_id,
            ));
        }
    }

    for schedule in &timeline.schedule_timelines {
        for instance in &schedule.instances {
            if let Some(enc_ref) = &instance.encounter_id {
                if !encounters.contains(enc_ref) {
                    errors.push(LinkageError::new(
                        LinkageKind::InstanceEncounter,
                        &instance.id,
                        enc_ref,
                    ));
                }
            }
            if let Some(epoch_ref) = &instance.epoch_id {
                if !epochs.contains(epoch_ref) {
                    errors.push(LinkageError::new(
                        LinkageKind::InstanceEpoch,
                        &instance.id,
                        epoch_ref,
                    ));
                }
            }
            for act_ref in &instance.activity_ids {
                if !activities.contains(act_ref) {
                    errors.push(LinkageError::new(
                        LinkageKind::InstanceActivity,
                        &instance.id,
                        act_ref,
                    ));
                }
            }
        }
    }

    for activity in &timeline.activities {
        if let Some(group_ref) = &activity.activity_group_id {
            if !groups.contains(group_ref) {
                errors.push(LinkageError::new(
                    LinkageKind::ActivityGroup,
                    &activity.id,
                    group_ref,
                ));
            }
        }
    }

    for group in &timeline.activity_groups {
        for member in &group.activity_ids {
            if !activities.contains(member) {
                errors.push(LinkageError::new(LinkageKind::GroupMember, &group.id, member));
            }
        }
    }

    errors
}

/// Validate and compute completeness metrics in one pass.
pub fn validate_with_metrics(timeline: &Timeline) -> ValidationReport {
    let errors = validate(timeline);
    let metrics = CompletenessMetrics::of(timeline);
    tracing::debug!(
        errors = errors.len(),
        activities = metrics.activities,
        timepoints = metrics.planned_timepoints,
        cells = metrics.activity_timepoints,
        "structural validation complete"
    );
    ValidationReport { errors, metrics }
}

fn check_duplicates(timeline: &Timeline, errors: &mut Vec<LinkageError>) {
    fn scan<'a>(
        collection: &str,
        ids: impl Iterator<Item = &'a str>,
        errors: &mut Vec<LinkageError>,
    ) {
        let mut seen = HashSet::new();
        let mut reported = HashSet::new();
        for id in ids {
            if !seen.insert(id) && reported.insert(id) {
                errors.push(LinkageError::new(LinkageKind::DuplicateId, id, collection));
            }
        }
    }

    scan("epochs", timeline.epochs.iter().map(|e| e.id.as_str()), errors);
    scan("encounters", timeline.encounters.iter().map(|e| e.id.as_str()), errors);
    scan(
        "plannedTimepoints",
        timeline.planned_timepoints.iter().map(|t| t.id.as_str()),
        errors,
    );
    scan("activities", timeline.activities.iter().map(|a| a.id.as_str()), errors);
    scan(
        "activityGroups",
        timeline.activity_groups.iter().map(|g| g.id.as_str()),
        errors,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Activity, ActivityGroup, ActivityTimepoint, Encounter, Epoch, PlannedTimepoint,
        ScheduleTimeline, ScheduledActivityInstance,
    };

    fn clean() -> Timeline {
        let mut t = Timeline::new();
        t.epochs.push(Epoch::new("epoch_1", "Treatment"));
        let enc = Encounter::new("enc_1", "Visit 1").in_epoch("epoch_1");
        t.planned_timepoints.push(PlannedTimepoint::for_encounter("tp_1", &enc));
        t.encounters.push(enc);
        t.activity_groups.push(ActivityGroup::new("grp_1", "Safety"));
        t.activities.push(Activity::new("act_1", "Vital Signs").in_group("grp_1"));
        t.add_cell(ActivityTimepoint::new("act_1", "tp_1"));
        t
    }

    #[test]
    fn clean_timeline_has_no_errors() {
        assert!(validate(&clean()).is_empty());
    }

    #[test]
    fn dangling_epoch_is_the_only_error() {
        let mut t = clean();
        t.encounters[0].epoch_id = Some("epoch_99".into());

        let errors = validate(&t);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, LinkageKind::EncounterEpoch);
        let message = errors[0].to_string();
        assert!(message.contains("enc_1"), "{}", message);
        assert!(message.contains("epoch_99"), "{}", message);
    }

    #[test]
    fn hyphenated_references_resolve() {
        let mut t = clean();
        t.activity_timepoints = vec![ActivityTimepoint::new("act-1", "tp-1")];
        t.encounters[0].epoch_id = Some("epoch-1".into());
        assert!(validate(&t).is_empty());
    }

    #[test]
    fn numbered_encounter_alias_resolves() {
        let mut t = clean();
        t.planned_timepoints[0].encounter_id = Some("encounter_1".into());
        assert!(validate(&t).is_empty());
    }

    #[test]
    fn dangling_cell_references_are_reported_separately() {
        let mut t = clean();
        t.add_cell(ActivityTimepoint::new("act_9", "tp_9"));
        let errors = validate(&t);
        let kinds: Vec<_> = errors.iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![LinkageKind::CellActivity, LinkageKind::CellTimepoint]);
        assert_eq!(errors[0].entity_id, "act_9|tp_9");
    }

    #[test]
    fn timepoint_name_mismatch_is_flagged() {
        let mut t = clean();
        t.planned_timepoints[0].name = "Day 1".into();
        let errors = validate(&t);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, LinkageKind::TimepointName);
    }

    #[test]
    fn scheduled_instances_are_checked() {
        let mut t = clean();
        t.schedule_timelines.push(ScheduleTimeline {
            id: "sched_1".into(),
            name: "Main".into(),
            instances: vec![ScheduledActivityInstance {
                id: "sai_1".into(),
                encounter_id: Some("enc_5".into()),
                epoch_id: Some("epoch_1".into()),
                activity_ids: vec!["act_1".into(), "act_2".into()],
            }],
        });
        let errors = validate(&t);
        let kinds: Vec<_> = errors.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![LinkageKind::InstanceEncounter, LinkageKind::InstanceActivity]
        );
    }

    #[test]
    fn group_references_are_checked() {
        let mut t = clean();
        t.activities[0].activity_group_id = Some("grp_7".into());
        t.activity_groups[0].activity_ids = vec!["act_1".into(), "act_3".into()];
        let kinds: Vec<_> = validate(&t).iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![LinkageKind::ActivityGroup, LinkageKind::GroupMember]);
    }

    #[test]
    fn duplicate_ids_reported_once() {
        let mut t = clean();
        t.activities.push(Activity::new("act_1", "Vital Signs"));
        t.activities.push(Activity::new("act_1", "Vital Signs"));
        let errors = validate(&t);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, LinkageKind::DuplicateId);
    }

    #[test]
    fn metrics_count_collections_and_orphans() {
        let mut t = clean();
        t.activities.push(Activity::new("act_2", "ECG"));
        let report = validate_with_metrics(&t);
        assert!(report.is_clean());
        assert_eq!(report.metrics.activities, 2);
        assert_eq!(report.metrics.activity_timepoints, 1);
        assert_eq!(report.metrics.activities_without_cells, 1);
        assert_eq!(report.metrics.timepoints_without_cells, 0);
    }
}
