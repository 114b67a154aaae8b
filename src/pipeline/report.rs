//! Structured report of non-fatal issues
//!
//! Stages never interleave warnings with control flow; they record them
//! here and carry on. Batch callers read the counts and apply their own
//! accept/reject policy.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Sample messages kept per stage.
pub const MAX_SAMPLES: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Header,
    Text,
    Validation,
    Fixup,
    Merge,
    Structure,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Header => "header",
            Stage::Text => "text",
            Stage::Validation => "validation",
            Stage::Fixup => "fixup",
            Stage::Merge => "merge",
            Stage::Structure => "structure",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters and sample issues of one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageReport {
    /// Units of work attempted (service calls, sources, checks).
    pub attempted: usize,
    pub succeeded: usize,
    /// Total issues, including those not kept as samples.
    pub issues: usize,
    pub samples: Vec<String>,
}

impl StageReport {
    pub fn failed(&self) -> usize {
        self.attempted.saturating_sub(self.succeeded)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PipelineReport {
    stages: BTreeMap<Stage, StageReport>,
}

impl PipelineReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one unit of work and whether it succeeded.
    pub fn record_attempt(&mut self, stage: Stage, succeeded: bool) {
        let entry = self.stages.entry(stage).or_default();
        entry.attempted += 1;
        if succeeded {
            entry.succeeded += 1;
        }
    }

    /// Record a non-fatal issue.
    pub fn record_issue(&mut self, stage: Stage, message: impl Into<String>) {
        let entry = self.stages.entry(stage).or_default();
        entry.issues += 1;
        if entry.samples.len() < MAX_SAMPLES {
            entry.samples.push(message.into());
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.get(&stage)
    }

    pub fn stages(&self) -> impl Iterator<Item = (Stage, &StageReport)> {
        self.stages.iter().map(|(s, r)| (*s, r))
    }

    pub fn issues(&self, stage: Stage) -> usize {
        self.stages.get(&stage).map_or(0, |r| r.issues)
    }

    pub fn total_issues(&self) -> usize {
        self.stages.values().map(|r| r.issues).sum()
    }

    pub fn is_clean(&self) -> bool {
        self.total_issues() == 0
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (stage, report) in &self.stages {
            writeln!(
                f,
                "{}: {}/{} succeeded, {} issue(s)",
                stage, report.succeeded, report.attempted, report.issues
            )?;
            for sample in &report.samples {
                writeln!(f, "  - {}", sample)?;
            }
        }
        Ok(())
    }
}
