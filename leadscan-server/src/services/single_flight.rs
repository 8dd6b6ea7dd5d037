//! Single-flight guard
//!
//! At most one scan job holds the flight at a time. Acquisition is a
//! mutex-protected check-and-set that records the owning job id, and the
//! returned [`FlightPermit`] gives the flight back when released or dropped.

use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

/// Process-wide "one scan at a time" cell
#[derive(Debug, Clone, Default)]
pub struct SingleFlightGuard {
    owner: Arc<Mutex<Option<Uuid>>>,
}

impl SingleFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Uuid>> {
        // The cell holds a plain id, so a poisoned lock still has a valid value
        self.owner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Take the flight for `job_id`, or `None` if another job holds it
    pub fn try_acquire(&self, job_id: Uuid) -> Option<FlightPermit> {
        let mut owner = self.lock();
        if owner.is_some() {
            return None;
        }
        *owner = Some(job_id);
        Some(FlightPermit {
            guard: self.clone(),
            job_id,
            released: false,
        })
    }

    /// Job currently holding the flight
    pub fn active_job(&self) -> Option<Uuid> {
        *self.lock()
    }

    pub fn is_idle(&self) -> bool {
        self.lock().is_none()
    }

    /// Release the flight if `job_id` still owns it
    ///
    /// Used by the permit and by the watchdog when it takes over a wedged job.
    /// Returns true if the flight was released.
    pub fn force_release(&self, job_id: Uuid) -> bool {
        let mut owner = self.lock();
        if *owner == Some(job_id) {
            *owner = None;
            true
        } else {
            false
        }
    }
}

/// Ownership of the flight for one job
#[derive(Debug)]
pub struct FlightPermit {
    guard: SingleFlightGuard,
    job_id: Uuid,
    released: bool,
}

impl FlightPermit {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Give the flight back; false if it was already taken over
    pub fn release(mut self) -> bool {
        self.released = true;
        self.guard.force_release(self.job_id)
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        if !self.released && self.guard.force_release(self.job_id) {
            tracing::debug!(scan_id = %self.job_id, "Flight released on drop");
        }
    }
}
