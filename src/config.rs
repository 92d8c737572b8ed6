//! System configuration parameters
//!
//! All tunable parameters for a LumiBus node.  Persistence (EEPROM/NVS)
//! belongs to an external collaborator; this module only defines the
//! structure, defaults and serialisation.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on bus topology, sizing the master's mirror arrays.
pub const MAX_SLAVES: usize = 16;

/// Core node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    // --- Timing ---
    /// Hardware tick period driving the software timer pool (milliseconds).
    pub tick_period_ms: u32,
    /// Bus poll interval, in ticks (one address broadcast per interval).
    pub poll_interval_ticks: u32,

    // --- Bus topology ---
    /// Number of slave nodes on the shared bus.
    pub num_slaves: u8,

    // --- Convergence policy ---
    /// Polling rounds a freshly commanded slave may lag behind its
    /// command before divergence counts as disobedience.  A command
    /// takes one round to reach the slave and one more for its status
    /// to reflect it, so this should be at least 1.
    pub stale_tolerance_rounds: u8,
    /// Consecutive disobedient status reports tolerated before the
    /// scheduler raises a convergence fault.
    pub patience_rounds: u8,
    /// Whether a convergence fault suspends polling (bus sleep).
    /// Bus sleep never auto-resumes; `wake()` is required.
    pub bus_sleep_enabled: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            // Timing
            tick_period_ms: 1,       // 1 kHz tick
            poll_interval_ticks: 20, // one address every 20 ms

            // Topology
            num_slaves: 4,

            // Convergence
            stale_tolerance_rounds: 1,
            patience_rounds: 8,
            bus_sleep_enabled: true,
        }
    }
}

impl NodeConfig {
    /// Bounds-check the configuration.  The struct is externally
    /// deserializable, so nothing here can be trusted until validated:
    /// an oversized slave count would walk the master's cursor past its
    /// mirror arrays, and `num_slaves >= 128` overflows the `u8`
    /// address arithmetic.
    pub fn validate(&self) -> Result<()> {
        if self.num_slaves == 0 || usize::from(self.num_slaves) > MAX_SLAVES {
            return Err(Error::Config("slave count out of range"));
        }
        if self.tick_period_ms == 0 || self.poll_interval_ticks == 0 {
            return Err(Error::Config("timing periods must be non-zero"));
        }
        Ok(())
    }

    /// First polled bus address (slave 1, command).
    pub fn start_address(&self) -> u8 {
        2
    }

    /// Last polled bus address (last slave, status).  Meaningful only
    /// for a validated topology.
    pub fn end_address(&self) -> u8 {
        2 * self.num_slaves + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = NodeConfig::default();
        assert!(c.tick_period_ms > 0);
        assert!(c.poll_interval_ticks > 0);
        assert!(c.num_slaves > 0);
        assert!(c.stale_tolerance_rounds >= 1);
        assert!(c.patience_rounds > c.stale_tolerance_rounds);
    }

    #[test]
    fn address_range_covers_two_per_slave() {
        let c = NodeConfig::default();
        let span = c.end_address() - c.start_address() + 1;
        assert_eq!(span, 2 * c.num_slaves);
    }

    #[test]
    fn validate_accepts_default() {
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_bounds_slave_count() {
        for bad in [0u8, 17, 128, 200] {
            let c = NodeConfig {
                num_slaves: bad,
                ..NodeConfig::default()
            };
            assert!(matches!(c.validate(), Err(Error::Config(_))), "num_slaves = {bad}");
        }
        let c = NodeConfig {
            num_slaves: MAX_SLAVES as u8,
            ..NodeConfig::default()
        };
        assert!(c.validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_periods() {
        let c = NodeConfig {
            poll_interval_ticks: 0,
            ..NodeConfig::default()
        };
        assert!(c.validate().is_err());
    }

    #[test]
    fn deserialized_topology_is_not_trusted() {
        // A round trip preserves the out-of-range count; validation is
        // the only gate.
        let c = NodeConfig {
            num_slaves: 200,
            ..NodeConfig::default()
        };
        let json = serde_json::to_string(&c).unwrap();
        let c2: NodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c2.num_slaves, 200);
        assert!(matches!(c2.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn serde_roundtrip() {
        let c = NodeConfig::default();
        let json = serde_json::to_string(&c).unwrap();
        let c2: NodeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(c.num_slaves, c2.num_slaves);
        assert_eq!(c.poll_interval_ticks, c2.poll_interval_ticks);
        assert_eq!(c.patience_rounds, c2.patience_rounds);
    }

    #[test]
    fn postcard_roundtrip() {
        let c = NodeConfig::default();
        let bytes = postcard::to_allocvec(&c).unwrap();
        let c2: NodeConfig = postcard::from_bytes(&bytes).unwrap();
        assert_eq!(c.tick_period_ms, c2.tick_period_ms);
        assert_eq!(c.stale_tolerance_rounds, c2.stale_tolerance_rounds);
    }
}
