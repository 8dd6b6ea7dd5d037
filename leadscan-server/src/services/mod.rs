//! Scan orchestration services
//!
//! - Single-flight guard: one active scan process-wide
//! - Pipeline executor: runs the stage set for one job
//! - Reconciler: writes completed runs into the company store
//! - Watchdog: force-fails scans that stop making progress
//! - Scan service: trigger/poll/cancel boundary used by the API

pub mod pipeline;
pub mod reconciler;
pub mod scan_service;
pub mod single_flight;
pub mod watchdog;

pub use pipeline::{PipelineExecutor, RunOutcome};
pub use reconciler::{ReconcileError, Reconciler};
pub use scan_service::{
    CancelTokens, ScanAccepted, ScanError, ScanService, ScanTarget, SystemStatus, DEFAULT_SOURCES,
};
pub use single_flight::{FlightPermit, SingleFlightGuard};
pub use watchdog::Watchdog;
