//! Offer catalogue and per-company capability matching

use serde::Serialize;

use super::company::Company;
use super::stage_output::SignalKind;

/// One offer the strategy stage can lead with
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Capability {
    pub id: &'static str,
    pub name: &'static str,
    /// Delivery strength, 0 - 100
    pub score: u8,
    pub description: &'static str,
}

/// Static offer catalogue
pub static CAPABILITIES: [Capability; 5] = [
    Capability {
        id: "pipeline-repair",
        name: "Real-Time Pipeline Repair",
        score: 96,
        description: "Automated detection and self-healing of broken data connectors.",
    },
    Capability {
        id: "legacy-migration",
        name: "Legacy Stack Migration",
        score: 84,
        description: "Migration from monolithic warehouses to composable architectures with zero-downtime cutover.",
    },
    Capability {
        id: "schema-evolution",
        name: "Schema Evolution Management",
        score: 88,
        description: "Schema drift detection and downstream contract enforcement.",
    },
    Capability {
        id: "observability",
        name: "Data Observability Layer",
        score: 91,
        description: "Lineage tracking, anomaly detection and SLA alerting across pipeline stages.",
    },
    Capability {
        id: "vector-search",
        name: "Vector Search Infrastructure",
        score: 73,
        description: "Embedding pipelines and vector index management for AI-native data products.",
    },
];

impl Capability {
    /// Offer that answers a signal of this kind
    pub fn for_signal(kind: SignalKind) -> &'static Capability {
        match kind {
            SignalKind::FiscalPressure => &CAPABILITIES[0],
            SignalKind::TechDebt => &CAPABILITIES[1],
            SignalKind::Expansion => &CAPABILITIES[2],
            SignalKind::Hiring => &CAPABILITIES[3],
            SignalKind::Pivot => &CAPABILITIES[4],
        }
    }

    pub fn by_name(name: &str) -> Option<&'static Capability> {
        CAPABILITIES.iter().find(|capability| capability.name == name)
    }
}

/// One capability scored against a company's signals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityMatchEntry {
    pub capability_id: String,
    pub capability: String,
    /// Strongest answering signal confidence times capability score, 0 - 100
    pub score: i64,
    /// Label of the strongest signal this capability answers
    pub pain: String,
    /// Evidence items behind the answering signals
    pub evidence_count: usize,
}

/// GET /api/v1/companies/{id}/capability-match body
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapabilityMatch {
    pub company_id: String,
    /// The offer the strategy stage chose, when it is in the catalogue
    pub strongest_match: Option<CapabilityMatchEntry>,
    /// Capabilities with at least one answering signal, best first
    pub matches: Vec<CapabilityMatchEntry>,
}

impl CapabilityMatch {
    /// Project a reconciled company onto the catalogue
    pub fn for_company(company: &Company) -> Self {
        let mut matches: Vec<CapabilityMatchEntry> = CAPABILITIES
            .iter()
            .filter_map(|capability| {
                let answering: Vec<_> = company
                    .signals
                    .signals
                    .iter()
                    .filter(|signal| Capability::for_signal(signal.kind).id == capability.id)
                    .collect();
                let strongest = answering
                    .iter()
                    .max_by(|a, b| a.confidence.total_cmp(&b.confidence))?;

                Some(CapabilityMatchEntry {
                    capability_id: capability.id.to_string(),
                    capability: capability.name.to_string(),
                    score: (strongest.confidence.clamp(0.0, 1.0) * f64::from(capability.score))
                        .round() as i64,
                    pain: strongest.label.clone(),
                    evidence_count: answering.iter().map(|s| s.evidence.len()).sum(),
                })
            })
            .collect();
        matches.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.capability_id.cmp(&b.capability_id))
        });

        let strongest_match = Capability::by_name(&company.strategy.offer).map(|offer| {
            matches
                .iter()
                .find(|entry| entry.capability_id == offer.id)
                .cloned()
                .unwrap_or_else(|| CapabilityMatchEntry {
                    capability_id: offer.id.to_string(),
                    capability: offer.name.to_string(),
                    score: 0,
                    pain: String::new(),
                    evidence_count: 0,
                })
        });

        Self {
            company_id: company.id.clone(),
            strongest_match,
            matches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_signal_kind_maps_into_catalogue() {
        for kind in [
            SignalKind::Pivot,
            SignalKind::TechDebt,
            SignalKind::FiscalPressure,
            SignalKind::Hiring,
            SignalKind::Expansion,
        ] {
            let capability = Capability::for_signal(kind);
            assert!(CAPABILITIES.contains(capability));
            assert_eq!(Capability::by_name(capability.name), Some(capability));
        }
    }

    #[test]
    fn catalogue_ids_are_unique() {
        for (i, a) in CAPABILITIES.iter().enumerate() {
            assert!(a.score <= 100);
            assert!(CAPABILITIES[i + 1..].iter().all(|b| b.id != a.id));
        }
    }
}
