//! End-to-end pipeline runs against a canned analysis service

mod common;

use common::{header_response, mock_pipeline};
use soa_reconcile::pipeline::prompts;
use soa_reconcile::storage::{read_timeline, write_timeline};
use soa_reconcile::{
    ActivityTimepoint, EntityKind, ExtractionInput, MockProvider, Origin, PageImage,
    PipelineError, Stage,
};

const VITALS_CHUNK: &str = "chunk-vitals";
const ECG_CHUNK: &str = "chunk-ecg";

fn two_chunk_mock() -> MockProvider {
    MockProvider::available()
        .with_response(prompts::HEADER_TASK, header_response())
        .with_response(
            VITALS_CHUNK,
            r#"{"activities": [{"id": "act-1", "name": "Vital Signs"}],
                "activityTimepoints": [
                    {"activityId": "act-1", "plannedTimepointId": "PT-1"},
                    {"activityId": "act-1", "plannedTimepointId": "enc_2"}
                ]}"#,
        )
        // Second chunk reuses act-1 for a different row and repeats vitals under another id
        .with_response(
            ECG_CHUNK,
            r#"Extracted rows:
```json
{"activities": [{"id": "act-1", "name": "ECG"}, {"id": "act-9", "name": "vital  signs"}],
 "activityTimepoints": [
    {"activityId": "act-1", "plannedTimepointId": "pt-2"},
    {"activityId": "act-9", "plannedTimepointId": "pt-1"},
 ]}
```"#,
        )
        .with_response(
            prompts::VALIDATION_TASK,
            r#"{"cells": [
                {"activityId": "act-1", "plannedTimepointId": "pt-1", "visible": true, "confidence": 0.95},
                {"activityId": "act-1", "plannedTimepointId": "pt-2", "visible": false, "confidence": 0.9},
                {"activityId": "act-1_c2", "plannedTimepointId": "pt-2", "visible": false, "confidence": 0.4},
                {"activityId": "act-1_c2", "plannedTimepointId": "pt-1", "visible": true, "confidence": 0.8}
            ]}"#,
        )
}

fn input(pages: u32) -> ExtractionInput {
    ExtractionInput {
        page_images: (1..=pages)
            .map(|p| PageImage::new(p, format!("soa_page_{}.png", p)))
            .collect(),
        text_chunks: vec![VITALS_CHUNK.to_string(), ECG_CHUNK.to_string()],
        header: None,
    }
}

#[tokio::test]
async fn run_reconciles_chunks_and_applies_verdicts() {
    let out = mock_pipeline(two_chunk_mock()).run(&input(2)).await.unwrap();
    let t = out.timeline();

    let names: Vec<&str> = t.activities.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Vital Signs", "ECG"]);
    assert_eq!(t.activities[1].id, "act-1_c2");

    assert_eq!(
        t.activity_timepoints,
        vec![
            ActivityTimepoint::new("act-1", "pt-1"),
            ActivityTimepoint::new("act-1_c2", "pt-2"),
        ]
    );
    assert_eq!(out.provenance.cell_origin("act-1", "pt-1"), Some(Origin::Both));
    assert_eq!(out.provenance.cell_origin("act-1_c2", "pt-2"), Some(Origin::Text));
    assert_eq!(out.provenance.cell_origin("act-1", "pt-2"), None);
    assert_eq!(
        out.provenance.cell_origin("act-1_c2", "pt-1"),
        Some(Origin::NeedsReview)
    );
    assert!(!t.has_cell("act-1_c2", "pt-1"));

    let fixup = out.fixup.as_ref().unwrap();
    assert_eq!(fixup.removed, vec![ActivityTimepoint::new("act-1", "pt-2")]);
    assert_eq!(fixup.disputed, vec![ActivityTimepoint::new("act-1_c2", "pt-2")]);
    assert_eq!(fixup.needs_review.len(), 1);

    assert_eq!(t.activity_groups[0].activity_ids, vec!["act-1", "act-1_c2"]);
    assert_eq!(
        out.provenance.entity_origin(EntityKind::Encounters, "enc-2"),
        Some(Origin::Header)
    );
    assert!(out.linkage.is_clean(), "{:?}", out.linkage.errors);

    let validation = out.report.stage(Stage::Validation).unwrap();
    assert_eq!((validation.attempted, validation.succeeded), (2, 2));
}

#[tokio::test]
async fn run_output_survives_persistence() {
    let out = mock_pipeline(two_chunk_mock()).run(&input(1)).await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("protocol_soa.json");

    write_timeline(&path, &out.document, &out.provenance).unwrap();
    assert!(dir.path().join("protocol_soa_provenance.json").exists());

    let stored = read_timeline(&path).unwrap();
    assert_eq!(stored.document, out.document);
    assert_eq!(stored.provenance, out.provenance);
}

#[tokio::test]
async fn header_failure_still_yields_text_activities() {
    let mock = two_chunk_mock().failing_model("fixture-model");
    let err = mock_pipeline(mock).run(&input(1)).await.unwrap_err();
    assert!(matches!(err, PipelineError::NothingExtracted));

    let mock = MockProvider::available()
        .with_failure(prompts::HEADER_TASK, "quota exceeded")
        .with_response(
            prompts::TEXT_TASK,
            r#"{"activities": [{"id": "a1", "name": "Physical Exam"}]}"#,
        );
    let out = mock_pipeline(mock)
        .run(&ExtractionInput {
            page_images: vec![PageImage::new(1, "p1.png")],
            text_chunks: vec!["exam table".to_string()],
            header: None,
        })
        .await
        .unwrap();
    assert_eq!(out.timeline().activities.len(), 1);
    assert!(out.timeline().encounters.is_empty());
    assert_eq!(out.report.issues(Stage::Header), 1);
    // No cells, so the validation pass has nothing to ask about
    assert!(out.fixup.as_ref().unwrap().is_noop());
}

#[test]
fn supplied_header_runs_without_images() {
    let header = soa_reconcile::HeaderStructure::from_value(
        &soa_reconcile::response::parse(&header_response()).unwrap(),
    )
    .unwrap();
    let mock = MockProvider::available().with_response(
        prompts::TEXT_TASK,
        r#"{"activities": [{"id": "a1", "name": "Vital Signs"}],
            "activityTimepoints": [{"activityId": "a1", "plannedTimepointId": "enc-2"}]}"#,
    );
    let log = mock.call_log();
    let run = ExtractionInput {
        page_images: Vec::new(),
        text_chunks: vec!["vitals at week 4".to_string()],
        header: Some(header),
    };

    let out = tokio_test::block_on(mock_pipeline(mock).run(&run)).unwrap();
    assert_eq!(
        out.timeline().activity_timepoints,
        vec![ActivityTimepoint::new("a1", "pt-2")]
    );
    assert!(out.fixup.is_none());
    assert_eq!(log.lock().unwrap().len(), 1);
}
