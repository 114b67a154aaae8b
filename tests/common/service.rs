//! Canned analysis service wiring

#![allow(dead_code)]

use soa_reconcile::{MockProvider, Pipeline, ReconcileConfig, ServiceClient};
use std::sync::Arc;
use std::time::Duration;

/// Pipeline over `mock` with a single model and default thresholds.
pub fn mock_pipeline(mock: MockProvider) -> Pipeline {
    mock_pipeline_with(mock, ReconcileConfig::default())
}

pub fn mock_pipeline_with(mock: MockProvider, config: ReconcileConfig) -> Pipeline {
    let client = ServiceClient::new(
        Arc::new(mock),
        vec!["fixture-model".to_string()],
        Duration::from_secs(5),
    );
    Pipeline::new(client, config)
}

/// Anchor-pass answer: two visits in one epoch and one row group, wrapped
/// in a fenced block like a chatty model would.
pub fn header_response() -> String {
    r#"Sure, here is the table header:
```json
{
  "columnHierarchy": {
    "epochs": [{"id": "epoch-1", "name": "Treatment"}],
    "encounters": [
      {"id": "enc-1", "name": "Screening", "epochId": "epoch_1"},
      {"id": "enc-2", "name": "Week 4", "epochId": "epoch_1"}
    ],
    "plannedTimepoints": [
      {"id": "pt-1", "name": "Screening", "encounterId": "enc-1"},
      {"id": "pt-2", "name": "Week 4", "encounterId": "enc-2"}
    ]
  },
  "rowGroups": [{"id": "grp-1", "name": "Safety", "activityNames": ["Vital Signs", "ECG"]}]
}
```"#
        .to_string()
}
