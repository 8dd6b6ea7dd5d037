//! Data models for leadscan-server
//!
//! - Scan job state machine and poll snapshot
//! - Canonical stage set and typed stage outputs
//! - Reconciled company records
//! - Offer catalogue and capability matching

pub mod capability;
pub mod company;
pub mod scan_job;
pub mod stage;
pub mod stage_output;

pub use capability::{Capability, CapabilityMatch, CapabilityMatchEntry, CAPABILITIES};
pub use company::{
    company_slug, receptivity_for, resolve_company_name, Company, CompanySummary, TraceEntry,
};
pub use scan_job::{
    FailureCode, JobFailure, JobUpdate, ScanDepth, ScanJob, ScanSnapshot, ScanStatus,
    TransitionError,
};
pub use stage::{StageId, PIPELINE_VERSION};
pub use stage_output::{
    CompanySize, Evidence, Level, OutreachDraft, ResearchProfile, ScoreBreakdown,
    ScoreComponent, Signal, SignalKind, SignalSet, StageOutput, StrategyPlan,
};
