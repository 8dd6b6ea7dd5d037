//! Typed stage outputs
//!
//! Every stage produces exactly one `StageOutput` variant. Payloads deny
//! unknown fields so a stage (or a stored record) with an unexpected shape
//! is rejected instead of being defaulted.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::stage::StageId;

/// Three-level rating used for priority, pain level and confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    High,
    Medium,
    Low,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::High => "HIGH",
            Level::Medium => "MEDIUM",
            Level::Low => "LOW",
        }
    }

    /// Parse the uppercase wire form, case-insensitively
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Some(Level::High),
            "MEDIUM" => Some(Level::Medium),
            "LOW" => Some(Level::Low),
            _ => None,
        }
    }

    /// Sort rank, HIGH first
    pub fn rank(&self) -> i64 {
        match self {
            Level::High => 3,
            Level::Medium => 2,
            Level::Low => 1,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Company headcount bracket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanySize {
    Small,
    Mid,
    Large,
}

impl CompanySize {
    pub fn from_employees(employees: u32) -> Self {
        match employees {
            0..=199 => CompanySize::Small,
            200..=1999 => CompanySize::Mid,
            _ => CompanySize::Large,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompanySize::Small => "small",
            CompanySize::Mid => "mid",
            CompanySize::Large => "large",
        }
    }
}

/// Stage 1: resolved company profile
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResearchProfile {
    /// Resolved company name (becomes the job's target label)
    pub company_name: String,
    pub domain: String,
    pub industry: String,
    pub size: CompanySize,
    pub estimated_employees: u32,
    pub region: String,
    /// One-line description shown on the lead board
    pub descriptor: String,
    /// Sources consulted
    pub sources: Vec<String>,
}

/// Where a signal was observed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Evidence {
    pub text: String,
    /// careers | news | tech_stack | blog | github | web
    pub source: String,
}

/// Category of buying signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Pivot,
    TechDebt,
    FiscalPressure,
    Hiring,
    Expansion,
}

/// A single extracted signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Signal {
    pub kind: SignalKind,
    pub label: String,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub evidence: Vec<Evidence>,
}

/// Stage 2: signal set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SignalSet {
    pub signals: Vec<Signal>,
    pub pain_level: Level,
    pub pain_tags: Vec<String>,
    pub expansion_score: f64,
    pub strain_score: f64,
    pub risk_score: f64,
    /// Fraction of requested sources that yielded evidence (0.0 - 1.0)
    pub coverage: f64,
}

/// One bar of the score breakdown chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoreComponent {
    pub label: String,
    pub value: u32,
    pub max: u32,
}

/// Stage 3: scoring breakdown
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScoreBreakdown {
    /// 0.0 - 1.0
    pub opportunity_score: f64,
    pub priority: Level,
    pub intent_score: f64,
    pub conversion_score: f64,
    pub deal_size_score: f64,
    pub components: Vec<ScoreComponent>,
    pub summary: String,
}

impl ScoreBreakdown {
    /// Integer 0-100 score shown on the lead board
    pub fn score(&self) -> i64 {
        ((self.opportunity_score * 100.0).round() as i64).clamp(0, 100)
    }
}

/// Stage 4: engagement strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyPlan {
    pub buying_style: String,
    pub offer: String,
    pub entry_point: String,
    /// Role to approach first
    pub persona: String,
    pub timing_window: String,
    pub note: String,
}

/// Stage 5: outreach draft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutreachDraft {
    pub persona: String,
    pub channel: String,
    pub subject: String,
    pub email: String,
    pub linkedin: String,
    pub call_opener: String,
    pub tone: String,
}

/// Output of one stage, tagged by the stage that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", content = "output", rename_all = "lowercase")]
pub enum StageOutput {
    Research(ResearchProfile),
    Signals(SignalSet),
    Scoring(ScoreBreakdown),
    Strategy(StrategyPlan),
    Outreach(OutreachDraft),
}

impl StageOutput {
    /// Stage this variant belongs to
    pub fn stage(&self) -> StageId {
        match self {
            StageOutput::Research(_) => StageId::Research,
            StageOutput::Signals(_) => StageId::Signals,
            StageOutput::Scoring(_) => StageId::Scoring,
            StageOutput::Strategy(_) => StageId::Strategy,
            StageOutput::Outreach(_) => StageId::Outreach,
        }
    }

    /// Trace action line describing what the stage did
    pub fn describe(&self) -> String {
        match self {
            StageOutput::Research(p) => format!(
                "Found {} ({}) - {}, {}, {}",
                p.company_name,
                p.domain,
                p.industry,
                p.size.as_str(),
                p.region
            ),
            StageOutput::Signals(s) => format!(
                "Pain: {} from {} signals (expansion={:.2}, strain={:.2}, risk={:.2})",
                s.pain_level,
                s.signals.len(),
                s.expansion_score,
                s.strain_score,
                s.risk_score
            ),
            StageOutput::Scoring(s) => format!(
                "Score: {}/100, Priority: {}, Intent: {:.2}, Conversion: {:.2}",
                s.score(),
                s.priority,
                s.intent_score,
                s.conversion_score
            ),
            StageOutput::Strategy(s) => format!(
                "Style: {} - {} via {} (persona: {})",
                s.buying_style, s.offer, s.entry_point, s.persona
            ),
            StageOutput::Outreach(o) => format!(
                "Persona: {} · Channel: {} · Subject: {}",
                o.persona, o.channel, o.subject
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breakdown(opportunity_score: f64) -> ScoreBreakdown {
        ScoreBreakdown {
            opportunity_score,
            priority: Level::Medium,
            intent_score: 0.5,
            conversion_score: 0.5,
            deal_size_score: 0.5,
            components: Vec::new(),
            summary: String::new(),
        }
    }

    #[test]
    fn score_is_rounded_and_clamped() {
        assert_eq!(breakdown(0.734).score(), 73);
        assert_eq!(breakdown(0.736).score(), 74);
        assert_eq!(breakdown(1.7).score(), 100);
        assert_eq!(breakdown(-0.2).score(), 0);
    }

    #[test]
    fn tagged_output_rejects_unknown_fields() {
        let json = r#"{"stage":"strategy","output":{
            "buying_style":"x","offer":"x","entry_point":"x","persona":"x",
            "timing_window":"x","note":"x","legacy_offer":"x"}}"#;
        assert!(serde_json::from_str::<StageOutput>(json).is_err());
    }

    #[test]
    fn level_parse_is_case_insensitive() {
        assert_eq!(Level::parse("high"), Some(Level::High));
        assert_eq!(Level::parse(" Medium "), Some(Level::Medium));
        assert_eq!(Level::parse("urgent"), None);
    }

    #[test]
    fn company_size_brackets() {
        assert_eq!(CompanySize::from_employees(40), CompanySize::Small);
        assert_eq!(CompanySize::from_employees(800), CompanySize::Mid);
        assert_eq!(CompanySize::from_employees(12_000), CompanySize::Large);
    }
}
