//! Bus scheduler — master role.
//!
//! Drives the shared multi-drop bus by broadcasting one address per poll
//! interval.  The addressed slave either accepts a queued command (even
//! addresses) or answers with its status pair (odd addresses).  The
//! master mirrors both sides and checks that slave state converges to
//! the last commanded state ("obedience").
//!
//! ```text
//!   poll timer ──▶ Event::BusPoll ──▶ poll_tick()
//!                                        │ enqueue address broadcast
//!                                        ▼
//!                                  CommandQueue (bus A)
//!                                        │ status reply (ISR)
//!                                        ▼
//!                            ExchangeSink::on_exchange_complete
//!                                        │ update status mirror,
//!                                        ▼ re-evaluate obedience
//!                                  bus sleep on persistent divergence
//! ```
//!
//! Slave addressing: slave `s` (1-based) owns the adjacent pair
//! `2s` (command) and `2s + 1` (status); the low-order bit distinguishes
//! the two.  The cursor walks from address 2 to `2 * num_slaves + 1` and
//! wraps.
//!
//! A freshly issued command legitimately diverges from status for up to
//! one full polling round (one cycle to reach the slave, one more for
//! the status to reflect it), so divergence within
//! `stale_tolerance_rounds` never counts as disobedience.  Divergence
//! beyond `patience_rounds` raises a convergence fault and, when
//! enabled, suspends polling entirely — bus sleep is a defined degraded
//! state that only an explicit [`wake`](BusMaster::wake) leaves.

use crate::config::NodeConfig;
use crate::error::{Error, Result};
use crate::events::EventSet;
use crate::transport::{CommandQueue, CommandTag, Exchange, ExchangeSink, NullSink, SerialPort};
use log::{info, warn};

/// Command byte meaning "no change requested"; excluded from
/// convergence comparison.
pub const NO_CHANGE: u8 = 0xFF;

pub use crate::config::MAX_SLAVES;

/// Byte indices within a command/status pair.
const INTENSITY: usize = 0;
const POSITION: usize = 1;

// ═══════════════════════════════════════════════════════════════
//  Master scheduler
// ═══════════════════════════════════════════════════════════════

/// Round-robin bus master with per-slave command/status mirrors.
pub struct BusMaster {
    num_slaves: u8,
    /// Address currently being polled.
    cursor: u8,
    /// Last commanded (intensity, position) per slave.
    commands: [[u8; 2]; MAX_SLAVES],
    /// Last reported (intensity, position) per slave.
    statuses: [[u8; 2]; MAX_SLAVES],
    /// Completed polling rounds since the slave was last commanded.
    rounds_since_command: [u8; MAX_SLAVES],
    /// Consecutive disobedient status reports beyond the stale window.
    strikes: [u8; MAX_SLAVES],
    stale_tolerance_rounds: u8,
    patience_rounds: u8,
    sleep_enabled: bool,
    asleep: bool,
    /// Convergence fault recorded in ISR context, drained by the main
    /// loop (no logging or propagation is possible in the sink).
    fault_pending: Option<Error>,
}

impl BusMaster {
    /// Fails with a config error on an invalid topology.  The config is
    /// externally deserializable, and an oversized slave count would
    /// index past the mirror arrays once the cursor walked that far.
    pub fn new(config: &NodeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            num_slaves: config.num_slaves,
            cursor: config.start_address(),
            commands: [[NO_CHANGE; 2]; MAX_SLAVES],
            statuses: [[0; 2]; MAX_SLAVES],
            rounds_since_command: [0; MAX_SLAVES],
            strikes: [0; MAX_SLAVES],
            stale_tolerance_rounds: config.stale_tolerance_rounds,
            patience_rounds: config.patience_rounds,
            sleep_enabled: config.bus_sleep_enabled,
            asleep: false,
            fault_pending: None,
        })
    }

    // ── Polling ───────────────────────────────────────────────────

    /// Broadcast the cursor address, then advance the cursor.
    ///
    /// Called from the main loop on [`Event::BusPoll`](crate::events::Event).
    /// Suspended entirely while asleep.  The ring rejecting the
    /// broadcast is surfaced; the cursor does not advance in that case,
    /// so the same address is retried next interval.
    pub fn poll_tick<const R: usize, const K: usize>(
        &mut self,
        queue: &mut CommandQueue<R, K>,
        port: &mut impl SerialPort,
        events: &EventSet,
    ) -> Result<()> {
        if self.asleep {
            return Ok(());
        }

        let addr = self.cursor;
        let slave = addr >> 1;
        let index = usize::from(slave) - 1;

        let exchange: Exchange<K> = if addr & 1 == 0 {
            let pair = self.commands[index];
            Exchange::write(
                CommandTag::SlaveCommand { slave },
                &[addr, pair[INTENSITY], pair[POSITION]],
            )?
        } else {
            Exchange::query(CommandTag::SlaveStatus { slave }, &[addr], 2)?
        };

        // Completions route back through this master as the sink from
        // the serial ISR; the inline sink here only covers degenerate
        // zero-length rows, which the poll never produces.
        queue.enqueue(exchange, port, events, &mut NullSink)?;
        self.advance_cursor();
        Ok(())
    }

    /// Current schedule-cursor address (next to be broadcast).
    pub fn cursor(&self) -> u8 {
        self.cursor
    }

    /// Leave bus sleep and resume polling from the start of the
    /// schedule.  The explicit external trigger required by the
    /// degraded-state contract.
    pub fn wake(&mut self) {
        if self.asleep {
            info!("master: bus wake — resuming polling");
        }
        self.asleep = false;
        self.cursor = 2;
        self.strikes = [0; MAX_SLAVES];
    }

    /// Whether polling is suspended.
    pub fn is_asleep(&self) -> bool {
        self.asleep
    }

    // ── Command/status mirrors ────────────────────────────────────

    /// Record a new commanded (intensity, position) pair for a slave.
    /// The light-placement collaborator calls this; the next command
    /// broadcast for the slave carries the pair.
    pub fn set_slave_command(&mut self, slave: u8, intensity: u8, position: u8) -> Result<()> {
        let index = self.index_of(slave)?;
        self.commands[index] = [intensity, position];
        self.rounds_since_command[index] = 0;
        self.strikes[index] = 0;
        Ok(())
    }

    /// Last commanded pair for a slave.
    pub fn slave_command(&self, slave: u8) -> Result<[u8; 2]> {
        Ok(self.commands[self.index_of(slave)?])
    }

    /// Last reported status pair for a slave.
    pub fn slave_status(&self, slave: u8) -> Result<[u8; 2]> {
        Ok(self.statuses[self.index_of(slave)?])
    }

    // ── Obedience ─────────────────────────────────────────────────

    /// Byte-wise convergence check for one slave: every command byte
    /// that is not the no-op sentinel must equal the mirrored status
    /// byte.  Out-of-range slaves are vacuously obedient.
    pub fn did_single_slave_obey(&self, slave: u8) -> bool {
        let Ok(index) = self.index_of(slave) else {
            return true;
        };
        self.commands[index]
            .iter()
            .zip(&self.statuses[index])
            .all(|(cmd, status)| *cmd == NO_CHANGE || cmd == status)
    }

    /// Convergence across the whole bus.
    pub fn all_obeyed(&self) -> bool {
        (1..=self.num_slaves).all(|s| self.did_single_slave_obey(s))
    }

    /// Take the pending convergence fault, if one was raised since the
    /// last call.  Main-loop only; this is where logging happens.
    pub fn take_fault(&mut self) -> Option<Error> {
        let fault = self.fault_pending.take();
        if let Some(Error::Convergence { slave }) = fault {
            warn!(
                "master: slave {} failed to converge{}",
                slave,
                if self.asleep { " — bus sleep" } else { "" }
            );
        }
        fault
    }

    // ── Internal ──────────────────────────────────────────────────

    fn index_of(&self, slave: u8) -> Result<usize> {
        if slave == 0 || slave > self.num_slaves {
            return Err(Error::Config("slave index out of range"));
        }
        Ok(usize::from(slave) - 1)
    }

    fn advance_cursor(&mut self) {
        let end = 2 * self.num_slaves + 1;
        if self.cursor >= end {
            self.cursor = 2;
            self.complete_round();
        } else {
            self.cursor += 1;
        }
    }

    /// A full polling round finished: every slave's command had a
    /// chance to reach it and be reflected in status.
    fn complete_round(&mut self) {
        for rounds in &mut self.rounds_since_command[..usize::from(self.num_slaves)] {
            *rounds = rounds.saturating_add(1);
        }
    }

    /// Re-evaluate one slave after a status update.  ISR context: no
    /// logging, no allocation; faults are parked for the main loop.
    fn evaluate_obedience(&mut self, slave: u8) {
        let Ok(index) = self.index_of(slave) else {
            return;
        };

        if self.did_single_slave_obey(slave) {
            self.strikes[index] = 0;
            return;
        }

        // Fresh commands lag status by design; don't strike inside the
        // tolerance window.
        if self.rounds_since_command[index] <= self.stale_tolerance_rounds {
            return;
        }

        self.strikes[index] = self.strikes[index].saturating_add(1);
        if self.strikes[index] > self.patience_rounds {
            self.fault_pending = Some(Error::Convergence { slave });
            if self.sleep_enabled {
                self.asleep = true;
            }
        }
    }
}

/// Status replies from the bus route straight into the mirrors.
impl ExchangeSink for BusMaster {
    fn on_exchange_complete(&mut self, tag: CommandTag, rx: &[u8]) {
        if let CommandTag::SlaveStatus { slave } = tag {
            if rx.len() == 2 {
                if let Ok(index) = self.index_of(slave) {
                    self.statuses[index] = [rx[0], rx[1]];
                    self.evaluate_obedience(slave);
                }
            }
            // Short replies are a framing problem for the excluded
            // peripheral driver; the stale mirror is kept as-is.
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
