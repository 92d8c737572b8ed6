//! LumiBus Firmware — Main Entry Point
//!
//! Event-driven execution around one 1 ms hardware tick.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │  esp_timer tick ──▶ TimerPool ──▶ EventSet bits                │
//! │  UART A/B rx    ──▶ CommandQueue::on_byte_complete             │
//! │                                                                │
//! │  main loop: drain EventSet in priority order                   │
//! │    BusPoll          → BusMaster::poll_tick (address broadcast) │
//! │    BusExchangeDone  → convergence fault check                  │
//! │    BusWake          → BusMaster::wake                          │
//! │    Heartbeat        → diagnostics summary                      │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

use anyhow::Result;
use log::{info, warn};

use lumibus::config::NodeConfig;
use lumibus::diagnostics::FaultCounters;
use lumibus::drivers::bus_uart::{BusUart, BUS_A_UART, BUS_B_UART};
use lumibus::drivers::hw_tick::{self, EVENTS};
use lumibus::events::Event;
use lumibus::master::BusMaster;
use lumibus::timers::{TimerAction, TimerId};
use lumibus::transport::{CommandQueue, NullSink};

/// Bus A ring: shallow — one poll in flight plus a couple of
/// application commands.
const BUS_RING: usize = 8;
/// Bus A row payload capacity (address + command pair, or address +
/// two status bytes).
const BUS_ROW: usize = 8;
/// Bus B (secondary link) ring and row sizing.
const LINK_RING: usize = 4;
const LINK_ROW: usize = 16;

/// Heartbeat period in ticks (10 s at the 1 ms tick).
const HEARTBEAT_TICKS: u32 = 10_000;

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("LumiBus node v{}", env!("CARGO_PKG_VERSION"));

    // ── 2. Configuration (persistence is an external concern) ─
    let config = NodeConfig::default();

    // ── 3. Serial peripherals ─────────────────────────────────
    let mut bus_a = BusUart::new(BUS_A_UART, 115_200)?;
    let mut bus_b = BusUart::new(BUS_B_UART, 115_200)?;

    // ── 4. Core components ────────────────────────────────────
    let mut bus_queue: CommandQueue<BUS_RING, BUS_ROW> = CommandQueue::new(Event::BusExchangeDone);
    let mut link_queue: CommandQueue<LINK_RING, LINK_ROW> =
        CommandQueue::new(Event::LinkExchangeDone);
    let mut master = BusMaster::new(&config).map_err(|e| anyhow::anyhow!("{e}"))?;
    let mut link_sink = NullSink;
    let mut counters = FaultCounters::new();

    // ── 5. Timers ─────────────────────────────────────────────
    hw_tick::with_timers(|timers| -> Result<()> {
        timers
            .register(
                TimerId::BusPoll,
                TimerAction::Post {
                    events: Event::BusPoll.mask(),
                    restart: Some(config.poll_interval_ticks),
                },
            )
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        timers
            .register(
                TimerId::Heartbeat,
                TimerAction::Post {
                    events: Event::Heartbeat.mask(),
                    restart: Some(HEARTBEAT_TICKS),
                },
            )
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        timers
            .start(TimerId::BusPoll, config.poll_interval_ticks)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        timers
            .start(TimerId::Heartbeat, HEARTBEAT_TICKS)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        Ok(())
    })?;
    hw_tick::start_tick(config.tick_period_ms);

    info!("System ready. Entering event loop.");

    // ── 6. Event loop ─────────────────────────────────────────
    let mut uptime_secs: u64 = 0;

    loop {
        // Byte completions: ESP-IDF delivers them through the UART
        // driver FIFO rather than a raw ISR; pump them into the queues.
        while let Some(byte) = bus_a.poll_rx() {
            bus_queue.on_byte_complete(byte, &mut bus_a, &EVENTS, &mut master);
        }
        while let Some(byte) = bus_b.poll_rx() {
            link_queue.on_byte_complete(byte, &mut bus_b, &EVENTS, &mut link_sink);
        }

        EVENTS.drain(|event| match event {
            Event::TransportFault => {
                counters.isr_ring_full_drops += 1;
                warn!("transport fault (ISR-side drop)");
            }
            Event::BusExchangeDone => {
                if let Some(fault) = master.take_fault() {
                    counters.record(fault);
                    if master.is_asleep() {
                        counters.bus_sleep_entries += 1;
                    }
                }
            }
            Event::LinkExchangeDone => {
                // Secondary-link consumers react here once wired.
            }
            Event::BusPoll => {
                if let Err(e) = master.poll_tick(&mut bus_queue, &mut bus_a, &EVENTS) {
                    counters.record(e);
                }
            }
            Event::BusWake => master.wake(),
            Event::Heartbeat => {
                uptime_secs += u64::from(HEARTBEAT_TICKS) / 1000;
                counters.log_summary(uptime_secs);
            }
        });

        // Yield to the IDLE task; all work is event-driven.
        std::thread::sleep(std::time::Duration::from_millis(1));
    }
}
