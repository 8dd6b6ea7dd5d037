//! HTTP API handlers for leadscan-server
//!
//! REST over axum; clients observe scans by polling.

pub mod companies;
pub mod health;
pub mod scan;
pub mod system;

pub use companies::company_routes;
pub use health::health_routes;
pub use scan::scan_routes;
pub use system::system_routes;
