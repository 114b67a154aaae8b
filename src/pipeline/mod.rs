//! Extraction pipeline: header anchor → text pass → validation pass →
//! fixup → structural check
//!
//! Stages run strictly in order; each consumes the complete output of the
//! one before. The legacy mode replaces the three service passes with an
//! identity-resolution merge of independently extracted timelines, then
//! runs the same structural check.

mod passes;
pub mod prompts;
mod report;

pub use passes::{combine_verdicts, TextPassOutput};
pub use report::{PipelineReport, Stage, StageReport, MAX_SAMPLES};

use crate::config::ReconcileConfig;
use crate::fixup::{FixupApplier, FixupOutcome};
use crate::llm::{PageImage, ServiceClient};
use crate::model::{HeaderStructure, ModelError, Timeline, TimelineDocument};
use crate::provenance::{EntityKind, Origin, ProvenanceTracker};
use crate::reconcile::{IdentityMerger, MergeError, MergeSource};
use crate::validate::{validate_with_metrics, ValidationReport};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;

/// Fatal pipeline failures. Everything else lands in the report.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no entities were extracted")]
    NothingExtracted,

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),
}

/// Inputs of one extraction run.
#[derive(Debug, Clone, Default)]
pub struct ExtractionInput {
    /// Rendered pages of the table, for the anchor and validation passes.
    pub page_images: Vec<PageImage>,
    /// Document text, pre-split into chunks.
    pub text_chunks: Vec<String>,
    /// A header from an earlier anchor pass; skips the header call.
    pub header: Option<HeaderStructure>,
}

/// Result of a pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub document: TimelineDocument,
    pub provenance: ProvenanceTracker,
    pub report: PipelineReport,
    pub linkage: ValidationReport,
    /// Present when a validation pass ran.
    pub fixup: Option<FixupOutcome>,
}

impl PipelineOutput {
    pub fn timeline(&self) -> &Timeline {
        self.document.timeline()
    }
}

/// Runs the stages against an injected service client.
pub struct Pipeline {
    client: ServiceClient,
    config: ReconcileConfig,
    semaphore: Arc<Semaphore>,
}

impl Pipeline {
    pub fn new(client: ServiceClient, config: ReconcileConfig) -> Self {
        let semaphore = Arc::new(Semaphore::new(config.service.max_concurrency.max(1)));
        Self {
            client,
            config,
            semaphore,
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Run header, text, validation, fixup and structural check.
    pub async fn run(&self, input: &ExtractionInput) -> Result<PipelineOutput, PipelineError> {
        let mut report = PipelineReport::new();
        let mut provenance = ProvenanceTracker::new();
        let run_id = provenance.stamp_run();
        tracing::info!(
            %run_id,
            pages = input.page_images.len(),
            chunks = input.text_chunks.len(),
            provider = self.client.provider_name(),
            "pipeline started"
        );

        let header = match &input.header {
            Some(header) => header.clone(),
            None if input.page_images.is_empty() => {
                report.record_issue(Stage::Header, "no page images; header pass skipped");
                HeaderStructure::default()
            }
            None => self.header_pass(&input.page_images, &mut report).await,
        };

        let mut timeline = Timeline::from_header(&header);
        provenance.tag_timeline(&timeline, Origin::Header);

        let text = self.text_pass(&header, &input.text_chunks, &mut report).await?;
        for activity in &text.activities {
            provenance.tag_entity(EntityKind::Activities, activity.id.clone(), Origin::Text);
        }
        for cell in &text.cells {
            provenance.tag_cell_key(cell.key(), Origin::Text);
        }
        timeline.activities = text.activities;
        timeline.activity_timepoints = text.cells;
        resolve_groups(&mut timeline, &mut report);

        if timeline.is_empty() {
            tracing::warn!(%run_id, "nothing extracted");
            return Err(PipelineError::NothingExtracted);
        }

        let fixup = if input.page_images.is_empty() {
            None
        } else {
            let verdicts = self
                .validation_pass(&header, &timeline, &input.page_images, &mut report)
                .await;
            let applier = FixupApplier::new(self.config.fixup.clone());
            let outcome = applier.apply(&mut timeline, &mut provenance, &verdicts);
            for cell in &outcome.needs_review {
                report.record_issue(Stage::Fixup, format!("needs review: {}", cell));
            }
            for cell in &outcome.removed {
                report.record_issue(Stage::Fixup, format!("removed: {}", cell));
            }
            Some(outcome)
        };

        let linkage = structural_check(&timeline, &mut report);
        tracing::info!(%run_id, issues = report.total_issues(), "pipeline finished");

        Ok(PipelineOutput {
            document: TimelineDocument::new(timeline),
            provenance,
            report,
            linkage,
            fixup,
        })
    }

    /// Legacy mode: merge independently extracted timelines by name.
    pub fn run_legacy_merge(&self, sources: &[MergeSource]) -> Result<PipelineOutput, PipelineError> {
        merge_sources(&self.config, sources)
    }
}

/// Identity-resolution merge followed by the structural check.
///
/// Needs no service client, so it is usable on persisted files alone.
pub fn merge_sources(
    config: &ReconcileConfig,
    sources: &[MergeSource],
) -> Result<PipelineOutput, PipelineError> {
    let mut report = PipelineReport::new();
    let merger = IdentityMerger::new(config.merge.name_match_threshold);
    let outcome = merger.merge(sources)?;

    for _ in 0..outcome.sources_used {
        report.record_attempt(Stage::Merge, true);
    }
    for skipped in &outcome.skipped {
        report.record_attempt(Stage::Merge, false);
        report.record_issue(Stage::Merge, skipped.to_string());
    }
    for cell in &outcome.unresolved_cells {
        report.record_issue(Stage::Merge, format!("unresolved cell {}", cell));
    }

    let mut provenance = outcome.provenance;
    provenance.stamp_run();
    let linkage = structural_check(&outcome.timeline, &mut report);

    Ok(PipelineOutput {
        document: TimelineDocument::new(outcome.timeline),
        provenance,
        report,
        linkage,
        fixup: None,
    })
}

/// Fill group member ids from member names and point members at their
/// group.
fn resolve_groups(timeline: &mut Timeline, report: &mut PipelineReport) {
    let Timeline {
        activities,
        activity_groups,
        ..
    } = timeline;
    for group in activity_groups.iter_mut() {
        if group.activity_names.is_empty() {
            continue;
        }
        for name in group.resolve(activities.as_slice()) {
            report.record_issue(
                Stage::Text,
                format!("group '{}' member '{}' not extracted", group.name, name),
            );
        }
        for activity in activities.iter_mut() {
            if activity.activity_group_id.is_none() && group.activity_ids.contains(&activity.id) {
                activity.activity_group_id = Some(group.id.clone());
            }
        }
    }
}

fn structural_check(timeline: &Timeline, report: &mut PipelineReport) -> ValidationReport {
    let linkage = validate_with_metrics(timeline);
    report.record_attempt(Stage::Structure, linkage.is_clean());
    for error in &linkage.errors {
        report.record_issue(Stage::Structure, error.to_string());
    }
    linkage
}
