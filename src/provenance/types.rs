//! Origin tags and entity kinds used by provenance records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a piece of extracted data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Text,
    Vision,
    Both,
    NeedsReview,
    Header,
    Default,
    LlmInferred,
}

impl Origin {
    pub const ALL: [Origin; 7] = [
        Origin::Text,
        Origin::Vision,
        Origin::Both,
        Origin::NeedsReview,
        Origin::Header,
        Origin::Default,
        Origin::LlmInferred,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Vision => "vision",
            Self::Both => "both",
            Self::NeedsReview => "needs_review",
            Self::Header => "header",
            Self::Default => "default",
            Self::LlmInferred => "llm_inferred",
        }
    }

    /// Combine an existing tag with a new one: equal tags stay, anything
    /// else becomes `Both`.
    pub fn combine(self, other: Origin) -> Origin {
        if self == other {
            self
        } else {
            Origin::Both
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Origin {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Origin::ALL
            .iter()
            .copied()
            .find(|o| o.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown origin: {}", s))
    }
}

/// Entity collections that carry provenance, keyed like the timeline arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Activities,
    PlannedTimepoints,
    Encounters,
    Epochs,
    ActivityGroups,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activities => "activities",
            Self::PlannedTimepoints => "plannedTimepoints",
            Self::Encounters => "encounters",
            Self::Epochs => "epochs",
            Self::ActivityGroups => "activityGroups",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
