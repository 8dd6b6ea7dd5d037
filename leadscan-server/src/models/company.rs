//! Reconciled company records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::stage::StageId;
use super::stage_output::{
    Level, OutreachDraft, ResearchProfile, ScoreBreakdown, SignalSet, StrategyPlan,
};

/// One audit line recorded by the executor as a stage completes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub time: DateTime<Utc>,
    pub agent: StageId,
    pub action: String,
}

impl TraceEntry {
    pub fn now(agent: StageId, action: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            agent,
            action: action.into(),
        }
    }
}

/// Full reconciled company record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    /// Slug of the resolved name
    pub id: String,
    pub name: String,
    pub descriptor: String,
    /// 0 - 100
    pub score: i64,
    pub confidence: Level,
    /// 0 - 100
    pub coverage: i64,
    pub receptivity: String,
    /// Job that produced the current version of this record
    pub job_id: Uuid,
    pub profile: ResearchProfile,
    pub signals: SignalSet,
    pub scoring: ScoreBreakdown,
    pub strategy: StrategyPlan,
    pub outreach: OutreachDraft,
    pub trace: Vec<TraceEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Company {
    /// Lead board row for this company
    pub fn summary(&self) -> CompanySummary {
        CompanySummary {
            id: self.id.clone(),
            name: self.name.clone(),
            descriptor: self.descriptor.clone(),
            score: self.score,
            confidence: self.confidence,
            coverage: self.coverage,
            receptivity: self.receptivity.clone(),
            pain_level: self.signals.pain_level,
            pain_tags: self.signals.pain_tags.clone(),
            persona: self.strategy.persona.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Lead board row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanySummary {
    pub id: String,
    pub name: String,
    pub descriptor: String,
    pub score: i64,
    pub confidence: Level,
    pub coverage: i64,
    pub receptivity: String,
    pub pain_level: Level,
    pub pain_tags: Vec<String>,
    pub persona: String,
    pub updated_at: DateTime<Utc>,
}

/// Receptivity label for a priority
pub fn receptivity_for(priority: Level) -> &'static str {
    match priority {
        Level::High => "HIGH — ACT WITHIN 90 DAYS",
        Level::Medium => "MODERATE — ACT WITHIN 6 MONTHS",
        Level::Low => "LOW — MONITOR",
    }
}

/// Leading words stripped from a free-text query before it is used as a name
const QUERY_VERBS: [&str; 6] = ["analyze", "analyse", "scan", "research", "profile", "find"];

/// Company name from a free-text query ("Analyze Slice" -> "Slice")
pub fn resolve_company_name(query: &str) -> String {
    let mut words: Vec<&str> = query.split_whitespace().collect();
    if words.len() > 1 && QUERY_VERBS.contains(&words[0].to_lowercase().as_str()) {
        words.remove(0);
    }
    words.join(" ")
}

/// Company id for a resolved name.
///
/// Lowercase ASCII alphanumerics; whitespace, `-` and `_` runs collapse to a
/// single `-`; everything else is dropped.
pub fn company_slug(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else if ch.is_whitespace() || ch == '-' || ch == '_' {
            pending_dash = true;
        }
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slug_matches_lead_board_ids() {
        assert_eq!(company_slug("Meridian Systems"), "meridian-systems");
        assert_eq!(company_slug("Slice"), "slice");
        assert_eq!(company_slug("  Acme.io  Labs "), "acmeio-labs");
        assert_eq!(company_slug("Data--Vex_AI"), "data-vex-ai");
        assert_eq!(company_slug("..."), "");
        assert_eq!(company_slug("-Slice-"), "slice");
        assert_eq!(company_slug("North _ - South"), "north-south");
        assert_eq!(company_slug("Zeta\tLabs\n"), "zeta-labs");
    }

    #[test]
    fn resolved_name_drops_leading_query_verb() {
        assert_eq!(resolve_company_name("Analyze Slice"), "Slice");
        assert_eq!(resolve_company_name("  research   Meridian Systems "), "Meridian Systems");
        assert_eq!(resolve_company_name("Scan"), "Scan");
        assert_eq!(resolve_company_name("Slice Analyze"), "Slice Analyze");
        assert_eq!(
            company_slug(&resolve_company_name("PROFILE slice")),
            company_slug(&resolve_company_name("slice"))
        );
    }

    #[test]
    fn receptivity_tracks_priority() {
        assert_eq!(receptivity_for(Level::High), "HIGH — ACT WITHIN 90 DAYS");
        assert_eq!(receptivity_for(Level::Low), "LOW — MONITOR");
    }
}
