//! Software timer pool.
//!
//! Multiplexes a fixed pool of virtual timers onto the single periodic
//! hardware tick (nominally 1 ms).  The tick handler runs in interrupt
//! context and is O(pool size); everything else runs in the main loop.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Hardware tick (1 kHz)                    │
//! │                             │                                │
//! │                             ▼                                │
//! │  ┌────────────────────────────────────────────────────────┐  │
//! │  │  TimerPool::tick — scan slots, fire expired timers     │  │
//! │  │   Post   → EventSet bits (main loop drains later)      │  │
//! │  │   Notify → TickDelegate::on_timer_fired(id)            │  │
//! │  └────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A timer is identified by a [`TimerId`] — a closed enum, not a pointer —
//! and is inert until `start`ed.  When its remaining-tick counter reaches
//! zero it is deactivated *before* its action runs, so an action that
//! restarts the same timer (the common periodic pattern) is safe.

use crate::error::{Error, ResourceError, Result};
use crate::events::{EventMask, EventSet};
use log::info;

// ═══════════════════════════════════════════════════════════════
//  Timer identity and actions
// ═══════════════════════════════════════════════════════════════

/// Identity of every software timer in the system.
///
/// A closed set: adding a timer means adding a variant here, which keeps
/// registration mistakes at compile time instead of runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TimerId {
    /// Drives the master's round-robin address broadcast.
    BusPoll = 0,
    /// Liveness watchdog layered over the secondary link transport.
    LinkWatchdog = 1,
    /// Periodic diagnostics heartbeat.
    Heartbeat = 2,
    /// One-shot delay used by slave-side convergence settling.
    Settle = 3,
}

/// What a timer does when it expires.
///
/// Function-pointer callbacks from the original firmware generation are
/// represented as tagged dispatch: either post event bits (with an
/// optional auto-restart period), or notify the tick delegate, whose
/// return value may restart the timer re-entrantly.
#[derive(Debug, Clone, Copy)]
pub enum TimerAction {
    /// Post the given event bits; restart with the given period if set.
    Post {
        events: EventMask,
        restart: Option<u32>,
    },
    /// Call [`TickDelegate::on_timer_fired`] with the timer's id.
    Notify,
}

/// Receives `Notify` expirations from [`TimerPool::tick`].
///
/// Returning `Some(duration_ticks)` restarts the same timer — this is the
/// sanctioned re-entrant restart path, legal because the slot is already
/// deactivated when the delegate runs.
pub trait TickDelegate {
    fn on_timer_fired(&mut self, id: TimerId) -> Option<u32>;
}

/// Delegate that ignores every expiration.  Useful when all timers in a
/// deployment use `Post` actions.
pub struct NullDelegate;

impl TickDelegate for NullDelegate {
    fn on_timer_fired(&mut self, _id: TimerId) -> Option<u32> {
        None
    }
}

// ═══════════════════════════════════════════════════════════════
//  Timer pool
// ═══════════════════════════════════════════════════════════════

/// One registered timer.
#[derive(Debug, Clone, Copy)]
struct TimerSlot {
    id: TimerId,
    action: TimerAction,
    active: bool,
    /// Ticks since the last `start`.
    elapsed: u32,
    /// Ticks until expiry.  Stale once `active` is false.
    remaining: u32,
}

/// Fixed pool of software timers, capacity `N`.
///
/// Registration assigns slots in order and is done once at init; timers
/// are started and stopped any number of times but never deregistered.
/// In the interrupt-driven deployment the pool lives in a
/// `critical_section::Mutex<RefCell<…>>` static shared between the tick
/// ISR and the main loop (see `drivers::hw_tick`).
pub struct TimerPool<const N: usize> {
    slots: [Option<TimerSlot>; N],
}

impl<const N: usize> TimerPool<N> {
    pub const fn new() -> Self {
        Self { slots: [None; N] }
    }

    /// Register a timer, inactive.  Fails with
    /// [`ResourceError::TimerPoolFull`] when every slot is taken and with
    /// a config error on duplicate registration — both were silent no-ops
    /// in the original firmware generation and are now countable.
    pub fn register(&mut self, id: TimerId, action: TimerAction) -> Result<()> {
        if self.find(id).is_some() {
            return Err(Error::Config("duplicate timer registration"));
        }
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                info!("timers: registered {:?} at slot {}", id, i);
                *slot = Some(TimerSlot {
                    id,
                    action,
                    active: false,
                    elapsed: 0,
                    remaining: 0,
                });
                return Ok(());
            }
        }
        Err(ResourceError::TimerPoolFull.into())
    }

    /// Activate a timer.  `duration_ticks == 0` fires on the very next
    /// tick.  Resets the elapsed counter and overwrites any stale state
    /// left by a previous run.
    pub fn start(&mut self, id: TimerId, duration_ticks: u32) -> Result<()> {
        let slot = self
            .find_mut(id)
            .ok_or(Error::Config("timer not registered"))?;
        slot.active = true;
        slot.elapsed = 0;
        slot.remaining = duration_ticks;
        Ok(())
    }

    /// Deactivate a timer immediately and unconditionally.  A no-op for
    /// unregistered or already-stopped timers.  Counters are left stale
    /// and are overwritten by the next `start`.
    pub fn stop(&mut self, id: TimerId) {
        if let Some(slot) = self.find_mut(id) {
            slot.active = false;
        }
    }

    /// Ticks elapsed since the last `start`, or `None` if the timer was
    /// never registered.
    pub fn elapsed(&self, id: TimerId) -> Option<u32> {
        self.find(id).map(|s| s.elapsed)
    }

    /// Whether the timer is currently counting down.
    pub fn is_active(&self, id: TimerId) -> bool {
        self.find(id).is_some_and(|s| s.active)
    }

    /// Advance every active timer by one hardware tick.
    ///
    /// Runs in interrupt context: O(N) over the pool, no allocation, no
    /// logging.  An expiring slot is deactivated *before* its action
    /// runs, so `Post { restart }` and a `Some` delegate return restart
    /// the timer cleanly.
    pub fn tick(&mut self, events: &EventSet, delegate: &mut dyn TickDelegate) {
        for slot in self.slots.iter_mut() {
            let Some(slot) = slot else { continue };
            if !slot.active {
                continue;
            }

            slot.elapsed = slot.elapsed.wrapping_add(1);
            if slot.remaining > 0 {
                slot.remaining -= 1;
            }
            if slot.remaining > 0 {
                continue;
            }

            // Deactivate first: the action may restart this very slot.
            slot.active = false;

            let restart = match slot.action {
                TimerAction::Post { events: mask, restart } => {
                    events.post(mask);
                    restart
                }
                TimerAction::Notify => delegate.on_timer_fired(slot.id),
            };

            if let Some(duration) = restart {
                slot.active = true;
                slot.elapsed = 0;
                slot.remaining = duration;
            }
        }
    }

    /// Number of registered timers.
    pub fn registered_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    // ── Internal ──────────────────────────────────────────────────

    fn find(&self, id: TimerId) -> Option<&TimerSlot> {
        self.slots
            .iter()
            .flatten()
            .find(|s| s.id == id)
    }

    fn find_mut(&mut self, id: TimerId) -> Option<&mut TimerSlot> {
        self.slots
            .iter_mut()
            .flatten()
            .find(|s| s.id == id)
    }
}

impl<const N: usize> Default for TimerPool<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════
