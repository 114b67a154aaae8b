//! Header structure: the column/row skeleton produced by the anchor pass
//!
//! Wire format (as emitted by the vision anchor pass):
//! ```json
//! {
//!   "columnHierarchy": {
//!     "epochs": [...], "encounters": [...], "plannedTimepoints": [...]
//!   },
//!   "rowGroups": [{ "id": "grp_1", "name": "Labs", "activityNames": ["..."] }]
//! }
//! ```

use super::entity::{ActivityGroup, Encounter, Epoch, PlannedTimepoint};
use super::timeline::ModelError;
use crate::validate::AliasIndex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ColumnHierarchy {
    #[serde(default)]
    epochs: Vec<Epoch>,
    #[serde(default)]
    encounters: Vec<Encounter>,
    #[serde(default)]
    planned_timepoints: Vec<PlannedTimepoint>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeaderWire {
    #[serde(default)]
    column_hierarchy: ColumnHierarchy,
    #[serde(default)]
    row_groups: Vec<ActivityGroup>,
}

/// The structural skeleton and identifier authority for one document.
///
/// Created once per document; downstream passes reference its ids and
/// never mutate it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct HeaderStructure {
    pub epochs: Vec<Epoch>,
    pub encounters: Vec<Encounter>,
    pub planned_timepoints: Vec<PlannedTimepoint>,
    pub activity_groups: Vec<ActivityGroup>,
}

impl HeaderStructure {
    /// Build a header from its entity lists, enforcing the timepoint naming
    /// rule.
    pub fn new(
        epochs: Vec<Epoch>,
        encounters: Vec<Encounter>,
        planned_timepoints: Vec<PlannedTimepoint>,
        activity_groups: Vec<ActivityGroup>,
    ) -> Self {
        let mut header = Self {
            epochs,
            encounters,
            planned_timepoints,
            activity_groups,
        };
        header.bind_timepoints();
        header
    }

    /// Decode the anchor pass output.
    pub fn from_value(value: &Value) -> Result<Self, ModelError> {
        let wire: HeaderWire = serde_json::from_value(value.clone())?;
        Ok(Self::new(
            wire.column_hierarchy.epochs,
            wire.column_hierarchy.encounters,
            wire.column_hierarchy.planned_timepoints,
            wire.row_groups,
        ))
    }

    /// Encode back to the anchor wire format (used to seed later passes).
    pub fn to_value(&self) -> Result<Value, ModelError> {
        let wire = HeaderWire {
            column_hierarchy: ColumnHierarchy {
                epochs: self.epochs.clone(),
                encounters: self.encounters.clone(),
                planned_timepoints: self.planned_timepoints.clone(),
            },
            row_groups: self.activity_groups.clone(),
        };
        Ok(serde_json::to_value(wire)?)
    }

    pub fn is_empty(&self) -> bool {
        self.encounters.is_empty() && self.planned_timepoints.is_empty()
    }

    pub fn encounter(&self, id: &str) -> Option<&Encounter> {
        self.encounters.iter().find(|e| e.id == id)
    }

    /// Tie every timepoint to its encounter and copy the encounter's name.
    ///
    /// Encounter ids resolve through aliases (`encounter_1` names `enc_1`).
    /// Timepoints without an encounter id are matched to an encounter of
    /// the same name. Encounters left without a timepoint get one, so every
    /// column has a timepoint id for the matrix to reference.
    fn bind_timepoints(&mut self) {
        let index = AliasIndex::for_encounters(self.encounters.iter().map(|e| e.id.as_str()));
        for tp in &mut self.planned_timepoints {
            let target = match tp.encounter_id.as_deref() {
                Some(enc_id) => index
                    .resolve(enc_id)
                    .and_then(|id| self.encounters.iter().find(|e| e.id == id)),
                None => self
                    .encounters
                    .iter()
                    .find(|e| e.name.trim().eq_ignore_ascii_case(tp.name.trim())),
            };
            if let Some(encounter) = target {
                tp.attach_to(encounter);
            }
        }

        let mut next = self.planned_timepoints.len() + 1;
        for encounter in &self.encounters {
            let covered = self
                .planned_timepoints
                .iter()
                .any(|tp| tp.encounter_id.as_deref() == Some(encounter.id.as_str()));
            if covered {
                continue;
            }
            let mut id = format!("pt_{}", next);
            while self.planned_timepoints.iter().any(|tp| tp.id == id) {
                next += 1;
                id = format!("pt_{}", next);
            }
            next += 1;
            self.planned_timepoints
                .push(PlannedTimepoint::for_encounter(id, encounter));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn anchor() -> Value {
        json!({
            "columnHierarchy": {
                "epochs": [{"id": "epoch_1", "name": "Screening"}],
                "encounters": [
                    {"id": "enc_1", "name": "Visit 1", "epochId": "epoch_1"},
                    {"id": "enc_2", "name": "Visit 2", "epochId": "epoch_1"}
                ],
                "plannedTimepoints": [
                    {"id": "pt_1", "name": "Day -14", "encounterId": "enc_1", "valueLabel": "Day -14"}
                ]
            },
            "rowGroups": [
                {"id": "grp_1", "name": "Safety", "activityNames": ["Vital Signs"]}
            ]
        })
    }

    #[test]
    fn timepoint_name_is_rewritten_from_encounter() {
        let header = HeaderStructure::from_value(&anchor()).unwrap();
        let pt = &header.planned_timepoints[0];
        assert_eq!(pt.name, "Visit 1");
        assert_eq!(pt.value_label.as_deref(), Some("Day -14"));
    }

    #[test]
    fn uncovered_encounter_gets_a_timepoint() {
        let header = HeaderStructure::from_value(&anchor()).unwrap();
        assert_eq!(header.planned_timepoints.len(), 2);
        let pt = &header.planned_timepoints[1];
        assert_eq!(pt.id, "pt_2");
        assert_eq!(pt.name, "Visit 2");
        assert_eq!(pt.encounter_id.as_deref(), Some("enc_2"));
    }

    #[test]
    fn encounter_alias_binds_timepoint() {
        let value = json!({
            "columnHierarchy": {
                "encounters": [{"id": "enc_1", "name": "Screening"}],
                "plannedTimepoints": [{"id": "pt_1", "name": "x", "encounterId": "encounter_1"}]
            }
        });
        let header = HeaderStructure::from_value(&value).unwrap();
        assert_eq!(header.planned_timepoints.len(), 1);
        let pt = &header.planned_timepoints[0];
        assert_eq!(pt.name, "Screening");
        assert_eq!(pt.encounter_id.as_deref(), Some("enc_1"));
    }

    #[test]
    fn timepoint_without_encounter_id_binds_by_name() {
        let value = json!({
            "columnHierarchy": {
                "encounters": [{"id": "enc_1", "name": "Baseline"}],
                "plannedTimepoints": [{"id": "pt_9", "name": "baseline"}]
            }
        });
        let header = HeaderStructure::from_value(&value).unwrap();
        assert_eq!(header.planned_timepoints.len(), 1);
        assert_eq!(header.planned_timepoints[0].encounter_id.as_deref(), Some("enc_1"));
        assert_eq!(header.planned_timepoints[0].name, "Baseline");
    }

    #[test]
    fn row_groups_become_activity_groups() {
        let header = HeaderStructure::from_value(&anchor()).unwrap();
        assert_eq!(header.activity_groups.len(), 1);
        assert_eq!(header.activity_groups[0].activity_names, vec!["Vital Signs"]);
    }

    #[test]
    fn wire_format_round_trips() {
        let header = HeaderStructure::from_value(&anchor()).unwrap();
        let value = header.to_value().unwrap();
        assert!(value["columnHierarchy"]["encounters"].is_array());
        assert_eq!(HeaderStructure::from_value(&value).unwrap(), header);
    }

    #[test]
    fn encounter_without_name_is_rejected() {
        let value = json!({"columnHierarchy": {"encounters": [{"id": "enc_1"}]}});
        assert!(HeaderStructure::from_value(&value).is_err());
    }
}
