//! Runtime fault counters.
//!
//! Several failure policies in this firmware are deliberately silent at
//! the point of occurrence (ISR context has no error channel; a full
//! timer pool is only observable as a timer that never fires).  Every
//! such policy bumps a counter here so the failures are countable from
//! the heartbeat log and any attached maintenance tool.

use crate::error::{Error, ResourceError};
use log::info;

/// Monotonic counters for recoverable faults.  Plain `u32`s: the struct
/// lives with the main loop and is only read or written there; ISR-side
/// faults reach it via the error event, not directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct FaultCounters {
    /// Timer registrations rejected (pool full or duplicate id).
    pub timer_register_failures: u32,
    /// Command enqueues rejected with a full ring, main-loop side.
    pub ring_full_rejects: u32,
    /// Exchanges dropped in ISR context because the ring was full.
    pub isr_ring_full_drops: u32,
    /// Convergence faults raised by the bus master.
    pub convergence_faults: u32,
    /// Times the bus entered the sleep degraded state.
    pub bus_sleep_entries: u32,
}

impl FaultCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a surfaced error from a fallible main-loop operation.
    pub fn record(&mut self, error: Error) {
        match error {
            Error::Resource(ResourceError::TimerPoolFull) => {
                self.timer_register_failures += 1;
            }
            Error::Resource(ResourceError::CommandRingFull) => {
                self.ring_full_rejects += 1;
            }
            Error::Resource(ResourceError::PayloadTooLong) | Error::Config(_) => {
                // Build/init-time mistakes; counted with registrations.
                self.timer_register_failures += 1;
            }
            Error::Convergence { .. } => {
                self.convergence_faults += 1;
            }
        }
    }

    /// Sum of all counters.
    pub fn total(&self) -> u32 {
        self.timer_register_failures
            + self.ring_full_rejects
            + self.isr_ring_full_drops
            + self.convergence_faults
            + self.bus_sleep_entries
    }

    /// Heartbeat summary line.
    pub fn log_summary(&self, uptime_secs: u64) {
        info!(
            "diag: up={}s timer_reg_fail={} ring_reject={} isr_drop={} converge_fail={} bus_sleeps={}",
            uptime_secs,
            self.timer_register_failures,
            self.ring_full_rejects,
            self.isr_ring_full_drops,
            self.convergence_faults,
            self.bus_sleep_entries,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_start_at_zero() {
        assert_eq!(FaultCounters::new().total(), 0);
    }

    #[test]
    fn record_routes_by_category() {
        let mut c = FaultCounters::new();
        c.record(ResourceError::CommandRingFull.into());
        c.record(ResourceError::CommandRingFull.into());
        c.record(ResourceError::TimerPoolFull.into());
        c.record(Error::Convergence { slave: 3 });

        assert_eq!(c.ring_full_rejects, 2);
        assert_eq!(c.timer_register_failures, 1);
        assert_eq!(c.convergence_faults, 1);
        assert_eq!(c.total(), 4);
    }
}
