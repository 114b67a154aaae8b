//! Validation fixup: apply per-cell vision verdicts to the matrix
//!
//! The validation pass looks at the page images and reports, for each
//! cell it checked, whether a tick is visible and how sure it is. Those
//! verdicts prune likely hallucinations from the text-pass matrix and
//! confirm the rest. Cells the vision pass reports but the text pass
//! never produced are flagged for review, never added.

use crate::config::FixupConfig;
use crate::model::{ActivityTimepoint, Timeline};
use crate::provenance::{Origin, ProvenanceTracker};
use crate::response::{self, ParseError};
use crate::validate::normalize_id;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One validation-pass verdict about a matrix cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CellVerdict {
    pub activity_id: String,
    pub planned_timepoint_id: String,
    pub visible: bool,
    /// Confidence in `0..=1`. Missing means no confidence.
    #[serde(default)]
    pub confidence: f64,
}

impl CellVerdict {
    pub fn new(
        activity_id: impl Into<String>,
        planned_timepoint_id: impl Into<String>,
        visible: bool,
        confidence: f64,
    ) -> Self {
        Self {
            activity_id: activity_id.into(),
            planned_timepoint_id: planned_timepoint_id.into(),
            visible,
            confidence,
        }
    }

    fn normalized_key(&self) -> (String, String) {
        (
            normalize_id(&self.activity_id),
            normalize_id(&self.planned_timepoint_id),
        )
    }
}

/// Validation-pass output: `{"cells": [...]}` or a bare verdict array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VerdictResponse {
    Wrapped { cells: Vec<CellVerdict> },
    Bare(Vec<CellVerdict>),
}

impl VerdictResponse {
    pub fn into_verdicts(self) -> Vec<CellVerdict> {
        match self {
            Self::Wrapped { cells } | Self::Bare(cells) => cells,
        }
    }
}

/// Recover verdicts from raw validation-pass text.
pub fn parse_verdicts(text: &str) -> Result<Vec<CellVerdict>, ParseError> {
    response::parse_as::<VerdictResponse>(text).map(VerdictResponse::into_verdicts)
}

/// What one fixup run did to the matrix.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FixupOutcome {
    /// Cells removed as probable hallucinations.
    pub removed: Vec<ActivityTimepoint>,
    /// Cells present in the matrix and seen by the vision pass.
    pub confirmed: Vec<ActivityTimepoint>,
    /// Cells seen by the vision pass but absent from the matrix.
    pub needs_review: Vec<ActivityTimepoint>,
    /// Cells the vision pass did not see that were nevertheless kept,
    /// either below the confidence threshold or with pruning disabled.
    pub disputed: Vec<ActivityTimepoint>,
}

impl FixupOutcome {
    /// True when the run left the matrix untouched.
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Applies verdicts with a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct FixupApplier {
    config: FixupConfig,
}

impl FixupApplier {
    pub fn new(config: FixupConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FixupConfig {
        &self.config
    }

    /// Apply `verdicts` to `timeline` and `provenance` in place.
    ///
    /// Verdict ids are matched against matrix ids after alias
    /// normalization. Applying the same verdicts again changes nothing.
    pub fn apply(
        &self,
        timeline: &mut Timeline,
        provenance: &mut ProvenanceTracker,
        verdicts: &[CellVerdict],
    ) -> FixupOutcome {
        let mut outcome = FixupOutcome::default();
        // Alias spellings of one cell share a key; every member is acted on
        let mut present: HashMap<(String, String), Vec<ActivityTimepoint>> = HashMap::new();
        for cell in &timeline.activity_timepoints {
            present
                .entry((normalize_id(&cell.activity_id), normalize_id(&cell.planned_timepoint_id)))
                .or_default()
                .push(cell.clone());
        }

        for verdict in verdicts {
            let key = verdict.normalized_key();
            match (present.get(&key).cloned(), verdict.visible) {
                (Some(cells), true) => {
                    for cell in cells {
                        provenance.tag_cell_key(cell.key(), Origin::Vision);
                        push_unique(&mut outcome.confirmed, cell);
                    }
                }
                (Some(cells), false) => {
                    let trusted = verdict.confidence >= self.config.confidence_threshold;
                    if trusted && self.config.remove_hallucinations {
                        present.remove(&key);
                        for cell in cells {
                            tracing::debug!(
                                cell = %cell,
                                confidence = verdict.confidence,
                                "removing cell not seen by validation pass"
                            );
                            timeline.remove_cell(&cell.activity_id, &cell.planned_timepoint_id);
                            provenance.remove_cell(&cell.activity_id, &cell.planned_timepoint_id);
                            outcome.confirmed.retain(|c| c != &cell);
                            outcome.disputed.retain(|c| c != &cell);
                            push_unique(&mut outcome.removed, cell);
                        }
                    } else {
                        for cell in cells {
                            push_unique(&mut outcome.disputed, cell);
                        }
                    }
                }
                (None, true) => {
                    let cell = ActivityTimepoint::new(
                        verdict.activity_id.clone(),
                        verdict.planned_timepoint_id.clone(),
                    );
                    provenance.tag_cell_key(cell.key(), Origin::NeedsReview);
                    push_unique(&mut outcome.needs_review, cell);
                }
                // Absent and not seen: nothing to do
                (None, false) => {}
            }
        }

        tracing::info!(
            removed = outcome.removed.len(),
            confirmed = outcome.confirmed.len(),
            needs_review = outcome.needs_review.len(),
            disputed = outcome.disputed.len(),
            threshold = self.config.confidence_threshold,
            "validation fixup applied"
        );
        outcome
    }
}

fn push_unique(cells: &mut Vec<ActivityTimepoint>, cell: ActivityTimepoint) {
    if !cells.contains(&cell) {
        cells.push(cell);
    }
}
