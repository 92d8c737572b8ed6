//! Hardware tick source using ESP-IDF's esp_timer API.
//!
//! Runs the software timer pool off one periodic 1 ms callback.  The
//! callback executes in the ESP timer task context, so it may touch the
//! shared pool through the critical-section mutex and post events.
//!
//! Drift handling: `esp_timer_start_periodic` schedules each expiry
//! relative to the previous deadline (modular against the free-running
//! microsecond counter), not relative to callback entry, so cumulative
//! drift does not compound.  On simulation targets the main loop drives
//! ticks itself via [`tick_once`].

use core::cell::RefCell;

use critical_section::Mutex;

use crate::events::EventSet;
use crate::timers::{NullDelegate, TimerPool};

/// Software timer pool capacity.  Four ids are defined today; the spare
/// slots cost 20 bytes each.
pub const TIMER_POOL_CAP: usize = 8;

/// The process-wide event set, shared between tick/serial context and
/// the main loop.
pub static EVENTS: EventSet = EventSet::new();

/// The process-wide software timer pool.
static TIMERS: Mutex<RefCell<TimerPool<TIMER_POOL_CAP>>> =
    Mutex::new(RefCell::new(TimerPool::new()));

/// Run a closure against the shared timer pool (registration, start,
/// stop, elapsed).  Keep the closure minimal: interrupts are masked for
/// its whole duration.
pub fn with_timers<R>(f: impl FnOnce(&mut TimerPool<TIMER_POOL_CAP>) -> R) -> R {
    critical_section::with(|cs| f(&mut TIMERS.borrow_ref_mut(cs)))
}

/// Advance the pool by one tick.  Called from the esp_timer callback on
/// target and from the simulation loop on host.  All registered timers
/// use `Post` actions, so the null delegate suffices.
pub fn tick_once() {
    critical_section::with(|cs| {
        TIMERS
            .borrow_ref_mut(cs)
            .tick(&EVENTS, &mut NullDelegate);
    });
}

#[cfg(target_os = "espidf")]
use esp_idf_svc::sys::*;

#[cfg(target_os = "espidf")]
static mut TICK_TIMER: esp_timer_handle_t = core::ptr::null_mut();

#[cfg(target_os = "espidf")]
unsafe extern "C" fn tick_cb(_arg: *mut core::ffi::c_void) {
    tick_once();
}

/// Start the periodic hardware tick.
#[cfg(target_os = "espidf")]
pub fn start_tick(period_ms: u32) {
    // SAFETY: TICK_TIMER is written here once at boot from the single
    // main-task context before the callback can fire.  The callback
    // only touches critical-section-guarded statics.
    unsafe {
        let args = esp_timer_create_args_t {
            callback: Some(tick_cb),
            arg: core::ptr::null_mut(),
            dispatch_method: esp_timer_dispatch_t_ESP_TIMER_TASK,
            name: b"tick\0".as_ptr() as *const _,
            skip_unhandled_events: false,
        };
        let ret = esp_timer_create(&args, &raw mut TICK_TIMER);
        if ret != ESP_OK {
            log::error!("hw_tick: timer create failed (rc={}) — no ticks", ret);
            return;
        }
        let ret = esp_timer_start_periodic(TICK_TIMER, u64::from(period_ms) * 1000);
        if ret != ESP_OK {
            log::error!("hw_tick: timer start failed (rc={})", ret);
            return;
        }
    }
    log::info!("hw_tick: {}ms periodic tick started", period_ms);
}

#[cfg(not(target_os = "espidf"))]
pub fn start_tick(_period_ms: u32) {
    log::info!("hw_tick(sim): ticks driven by the sleep loop");
}

/// Stop the hardware tick.
#[cfg(target_os = "espidf")]
pub fn stop_tick() {
    // SAFETY: TICK_TIMER is a valid handle if start_tick() succeeded;
    // the null check prevents stopping a never-created timer.
    unsafe {
        let t = *(&raw const TICK_TIMER);
        if !t.is_null() {
            esp_timer_stop(t);
        }
    }
}

#[cfg(not(target_os = "espidf"))]
pub fn stop_tick() {}
