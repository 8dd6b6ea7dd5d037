//! Canonical stage set
//!
//! One versioned pipeline contract: five stages, strictly sequential, each
//! consuming the outputs of every stage before it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Version tag of the stage contract recorded on every job
pub const PIPELINE_VERSION: &str = "v2-5stage";

/// Pipeline stage identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageId {
    /// Resolve the target into a company profile
    Research,
    /// Extract pain/intent signals from the profile
    Signals,
    /// Score the opportunity
    Scoring,
    /// Choose offer, entry point and persona
    Strategy,
    /// Draft the outreach message
    Outreach,
}

impl StageId {
    /// All stages in execution order
    pub const ALL: [StageId; 5] = [
        StageId::Research,
        StageId::Signals,
        StageId::Scoring,
        StageId::Strategy,
        StageId::Outreach,
    ];

    /// Number of stages in the pipeline
    pub const COUNT: usize = Self::ALL.len();

    pub fn as_str(&self) -> &'static str {
        match self {
            StageId::Research => "research",
            StageId::Signals => "signals",
            StageId::Scoring => "scoring",
            StageId::Strategy => "strategy",
            StageId::Outreach => "outreach",
        }
    }

    /// Zero-based position in the pipeline
    pub fn position(&self) -> usize {
        Self::ALL
            .iter()
            .position(|s| s == self)
            .unwrap_or(Self::COUNT)
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
