//! Built-in offline stages
//!
//! Deterministic heuristics over the target name: the same target always
//! yields the same profile, signals, score, strategy and draft. They keep the
//! service usable without network access and give tests stable outputs.

use async_trait::async_trait;

use super::{RunContext, Stage, StageError};
use crate::models::{
    company_slug, resolve_company_name, Capability, CompanySize, Evidence, Level, OutreachDraft,
    ResearchProfile, ScanDepth, ScoreBreakdown, ScoreComponent, Signal, SignalKind, SignalSet,
    StageId, StageOutput, StrategyPlan,
};

const INDUSTRIES: [&str; 6] = [
    "Fintech",
    "E-commerce",
    "Logistics",
    "Healthtech",
    "Developer Tools",
    "Media",
];

const REGIONS: [&str; 5] = ["US", "India", "UK", "Germany", "Singapore"];

/// 64-bit FNV-1a over the lowercase name
fn fingerprint(name: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in name.to_lowercase().bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Value in [0, 1) derived from the fingerprint and a salt
fn unit(hash: u64, salt: u64) -> f64 {
    let mixed = (hash ^ salt.wrapping_mul(0x9e37_79b9_7f4a_7c15)).rotate_left((salt % 64) as u32);
    (mixed % 10_000) as f64 / 10_000.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn level_for(value: f64, high: f64, medium: f64) -> Level {
    if value >= high {
        Level::High
    } else if value >= medium {
        Level::Medium
    } else {
        Level::Low
    }
}

/// Stage 1: resolve the target into a company profile
#[derive(Debug, Default, Clone, Copy)]
pub struct ResearchStage;

#[async_trait]
impl Stage for ResearchStage {
    fn id(&self) -> StageId {
        StageId::Research
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let company_name = resolve_company_name(&ctx.target_hint);
        let slug = company_slug(&company_name);
        if slug.is_empty() {
            return Err(StageError::MalformedData(format!(
                "cannot resolve a company name from '{}'",
                ctx.target_hint
            )));
        }

        let hash = fingerprint(&company_name);
        let industry = INDUSTRIES[(hash % INDUSTRIES.len() as u64) as usize];
        let region = REGIONS[((hash >> 8) % REGIONS.len() as u64) as usize];
        let estimated_employees = 40 + ((hash >> 16) % 6_000) as u32;
        let size = CompanySize::from_employees(estimated_employees);

        let sources = match ctx.depth {
            ScanDepth::Quick => ctx.sources.iter().take(1).cloned().collect(),
            ScanDepth::Full => ctx.sources.clone(),
        };

        Ok(StageOutput::Research(ResearchProfile {
            descriptor: format!(
                "{} company, {} ({} employees), {}",
                industry,
                size.as_str(),
                estimated_employees,
                region
            ),
            domain: format!("{}.com", slug.replace('-', "")),
            company_name,
            industry: industry.to_string(),
            size,
            estimated_employees,
            region: region.to_string(),
            sources,
        }))
    }
}

/// Stage 2: extract pain and intent signals
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalsStage;

#[async_trait]
impl Stage for SignalsStage {
    fn id(&self) -> StageId {
        StageId::Signals
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let profile = ctx.research()?;
        let hash = fingerprint(&profile.company_name);

        let expansion_score = round2(unit(hash, 1));
        let strain_score = round2(unit(hash, 2));
        let risk_score = round2(unit(hash, 3) * 0.6);

        let candidates = [
            (SignalKind::Expansion, "Regional expansion", expansion_score, "news"),
            (SignalKind::Hiring, "Data engineering hiring", round2(unit(hash, 4)), "careers"),
            (SignalKind::TechDebt, "Legacy pipeline strain", strain_score, "tech_stack"),
            (SignalKind::FiscalPressure, "Cost reduction push", risk_score, "news"),
            (SignalKind::Pivot, "Product pivot", round2(unit(hash, 5) * 0.8), "blog"),
        ];

        let signals: Vec<Signal> = candidates
            .iter()
            .filter(|(_, _, confidence, _)| *confidence >= 0.35)
            .enumerate()
            .map(|(i, (kind, label, confidence, default_source))| {
                let source = if profile.sources.is_empty() {
                    default_source.to_string()
                } else {
                    profile.sources[i % profile.sources.len()].clone()
                };
                Signal {
                    kind: *kind,
                    label: label.to_string(),
                    confidence: *confidence,
                    evidence: vec![Evidence {
                        text: format!("{} observed for {}", label, profile.company_name),
                        source,
                    }],
                }
            })
            .collect();

        let with_evidence = profile
            .sources
            .iter()
            .filter(|src| {
                signals
                    .iter()
                    .any(|s| s.evidence.iter().any(|e| &e.source == *src))
            })
            .count();
        let requested = ctx.sources.len().max(1);
        let coverage = round2(with_evidence as f64 / requested as f64);

        Ok(StageOutput::Signals(SignalSet {
            pain_level: level_for(strain_score, 0.66, 0.33),
            pain_tags: signals.iter().map(|s| s.label.clone()).collect(),
            signals,
            expansion_score,
            strain_score,
            risk_score,
            coverage,
        }))
    }
}

/// Stage 3: score the opportunity
#[derive(Debug, Default, Clone, Copy)]
pub struct ScoringStage;

#[async_trait]
impl Stage for ScoringStage {
    fn id(&self) -> StageId {
        StageId::Scoring
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let profile = ctx.research()?;
        let signals = ctx.signals()?;

        let intent_score = round2(0.5 * signals.strain_score + 0.5 * signals.expansion_score);
        let conversion_score = round2((1.0 - signals.risk_score) * 0.7 + signals.coverage * 0.3);
        let deal_size_score = round2(
            ((profile.estimated_employees.max(1) as f64).ln() / 10_000f64.ln()).clamp(0.0, 1.0),
        );
        let opportunity_score = round2(
            0.35 * intent_score
                + 0.25 * conversion_score
                + 0.2 * deal_size_score
                + 0.2 * signals.expansion_score,
        );
        let priority = level_for(opportunity_score, 0.65, 0.45);

        let components = vec![
            ScoreComponent {
                label: "Intent".to_string(),
                value: (intent_score * 35.0).round() as u32,
                max: 35,
            },
            ScoreComponent {
                label: "Conversion".to_string(),
                value: (conversion_score * 25.0).round() as u32,
                max: 25,
            },
            ScoreComponent {
                label: "Deal size".to_string(),
                value: (deal_size_score * 20.0).round() as u32,
                max: 20,
            },
            ScoreComponent {
                label: "Expansion".to_string(),
                value: (signals.expansion_score * 20.0).round() as u32,
                max: 20,
            },
        ];

        Ok(StageOutput::Scoring(ScoreBreakdown {
            summary: format!(
                "{} is a {} priority lead with {} pain",
                profile.company_name,
                priority.as_str().to_lowercase(),
                signals.pain_level.as_str().to_lowercase()
            ),
            opportunity_score,
            priority,
            intent_score,
            conversion_score,
            deal_size_score,
            components,
        }))
    }
}

/// Stage 4: choose offer, entry point and persona
#[derive(Debug, Default, Clone, Copy)]
pub struct StrategyStage;

#[async_trait]
impl Stage for StrategyStage {
    fn id(&self) -> StageId {
        StageId::Strategy
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let profile = ctx.research()?;
        let signals = ctx.signals()?;
        let scoring = ctx.scoring()?;

        let (buying_style, persona) = match profile.size {
            CompanySize::Small => ("founder-led", "CTO"),
            CompanySize::Mid => ("committee", "VP Engineering"),
            CompanySize::Large => ("procurement-driven", "Head of Data Platform"),
        };

        let dominant = signals
            .signals
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence));
        let kind = dominant.map_or(SignalKind::Expansion, |s| s.kind);
        let offer = Capability::for_signal(kind).name;
        let entry_point = match kind {
            SignalKind::TechDebt => "architecture review",
            SignalKind::FiscalPressure => "cost audit",
            SignalKind::Pivot => "product roadmap session",
            SignalKind::Hiring => "team scaling workshop",
            SignalKind::Expansion => "platform assessment",
        };

        let timing_window = match scoring.priority {
            Level::High => "0-90 days",
            Level::Medium => "3-6 months",
            Level::Low => "6-12 months",
        };

        Ok(StageOutput::Strategy(StrategyPlan {
            note: format!(
                "Lead with {} for a {} {} team",
                offer,
                profile.size.as_str(),
                profile.industry
            ),
            buying_style: buying_style.to_string(),
            offer: offer.to_string(),
            entry_point: entry_point.to_string(),
            persona: persona.to_string(),
            timing_window: timing_window.to_string(),
        }))
    }
}

/// Stage 5: draft the outreach message
#[derive(Debug, Default, Clone, Copy)]
pub struct OutreachStage;

#[async_trait]
impl Stage for OutreachStage {
    fn id(&self) -> StageId {
        StageId::Outreach
    }

    async fn run(&self, ctx: &RunContext) -> Result<StageOutput, StageError> {
        let profile = ctx.research()?;
        let signals = ctx.signals()?;
        let scoring = ctx.scoring()?;
        let strategy = ctx.strategy()?;

        let channel = match scoring.priority {
            Level::High => "email",
            _ => "linkedin",
        };
        let tone = match strategy.buying_style.as_str() {
            "founder-led" => "direct",
            "committee" => "consultative",
            _ => "formal",
        };
        let hook = signals
            .pain_tags
            .first()
            .map(|t| t.to_lowercase())
            .unwrap_or_else(|| "data platform growth".to_string());

        Ok(StageOutput::Outreach(OutreachDraft {
            subject: format!("{} at {}", strategy.offer, profile.company_name),
            email: format!(
                "Hi,\n\nTeams at {} seem to be dealing with {}. We help {} companies \
                 with {}. Would a short {} be useful in the next few weeks?\n",
                profile.company_name,
                hook,
                profile.industry,
                strategy.offer.to_lowercase(),
                strategy.entry_point
            ),
            linkedin: format!(
                "Noticed {} at {}. Open to comparing notes on {}?",
                hook,
                profile.company_name,
                strategy.offer.to_lowercase()
            ),
            call_opener: format!(
                "I'm calling because {} often comes up for {} teams your size.",
                hook, profile.industry
            ),
            persona: strategy.persona.clone(),
            channel: channel.to_string(),
            tone: tone.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::StageSet;
    use uuid::Uuid;

    async fn run_all(hint: &str) -> RunContext {
        let mut ctx = RunContext::new(
            Uuid::new_v4(),
            hint,
            ScanDepth::Full,
            vec!["github".to_string(), "web".to_string(), "news".to_string()],
        );
        for stage in StageSet::offline().iter() {
            let output = stage.run(&ctx).await.unwrap();
            assert_eq!(output.stage(), stage.id());
            ctx.push(output);
        }
        ctx
    }

    #[tokio::test]
    async fn offline_pipeline_is_deterministic() {
        let a = run_all("Slice").await;
        let b = run_all("Slice").await;
        assert_eq!(a.outputs(), b.outputs());
        assert_eq!(a.research().unwrap().company_name, "Slice");
    }

    #[tokio::test]
    async fn query_verbs_are_stripped() {
        let ctx = run_all("Analyze Meridian Systems").await;
        let profile = ctx.research().unwrap();
        assert_eq!(profile.company_name, "Meridian Systems");
        assert_eq!(profile.domain, "meridiansystems.com");
    }

    #[tokio::test]
    async fn scores_stay_in_range() {
        for name in ["Slice", "Acme", "Zepto", "Meridian Systems", "Northwind"] {
            let ctx = run_all(name).await;
            let scoring = ctx.scoring().unwrap();
            assert!((0..=100).contains(&scoring.score()));
            let signals = ctx.signals().unwrap();
            assert!((0.0..=1.0).contains(&signals.coverage));
        }
    }

    #[tokio::test]
    async fn unresolvable_target_is_malformed() {
        let ctx = RunContext::new(Uuid::new_v4(), "???", ScanDepth::Full, Vec::new());
        let result = ResearchStage.run(&ctx).await;
        assert!(matches!(result, Err(StageError::MalformedData(_))));
    }

    #[tokio::test]
    async fn quick_depth_consults_one_source() {
        let ctx = RunContext::new(
            Uuid::new_v4(),
            "Slice",
            ScanDepth::Quick,
            vec!["github".to_string(), "web".to_string()],
        );
        let StageOutput::Research(profile) = ResearchStage.run(&ctx).await.unwrap() else {
            panic!("research stage returned another variant");
        };
        assert_eq!(profile.sources, vec!["github".to_string()]);
    }

    #[tokio::test]
    async fn signals_need_research() {
        let ctx = RunContext::new(Uuid::new_v4(), "Slice", ScanDepth::Full, Vec::new());
        assert_eq!(
            SignalsStage.run(&ctx).await.unwrap_err(),
            StageError::MissingDependency(StageId::Research)
        );
    }
}
