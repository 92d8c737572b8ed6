//! Interrupt-driven command-queue transport.
//!
//! Performs multi-byte asynchronous exchanges over a serial peripheral
//! without blocking the caller and preserving submission order.  Two
//! independent instances exist in a deployed node: one for the shared
//! multi-drop bus (bus A) and one for the secondary synchronous link
//! (bus B); each is constructed with its own completion event bit.
//!
//! ```text
//!            enqueue()                on_byte_complete() (ISR)
//!               │                              │
//!               ▼                              ▼
//! ┌──────────────────────┐    ┌────────────────────────────────────┐
//! │  Row ring buffer     │    │  Idle → Sending → Receiving → Idle │
//! │  produce ──▶ consume │───▶│  byte pump, back-to-back drain     │
//! └──────────────────────┘    └────────────────────────────────────┘
//!                                              │
//!                              ExchangeSink + completion event
//! ```
//!
//! The producer cursor (next free row) and the consumer cursor (row in
//! flight) advance independently with modular increment and never pass
//! each other; an unused row is `None`, which keeps a legitimately
//! zero-length exchange distinguishable from a free slot.
//!
//! There is no cancellation and no internal timeout: once enqueued, a
//! command runs to completion, and a peer that stops responding stalls
//! the instance until external reset.  Callers needing liveness layer a
//! watchdog through the timer pool.

mod port;

pub use port::{NullPort, SerialPort};

use crate::error::{ResourceError, Result};
use crate::events::{Event, EventSet};
use heapless::Vec;

// ═══════════════════════════════════════════════════════════════
//  Exchange description
// ═══════════════════════════════════════════════════════════════

/// Identifies a completed exchange to the [`ExchangeSink`].
///
/// The original firmware generation stored raw destination pointers per
/// received byte; the tag plus sink delivery replaces that without any
/// caller lifetime obligations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTag {
    /// Address broadcast carrying a slave's command byte-pair.
    SlaveCommand { slave: u8 },
    /// Address broadcast answered by a slave's status byte-pair.
    SlaveStatus { slave: u8 },
    /// Completion matters only as an event (no payload routing).
    Untagged,
}

/// One pending multi-byte exchange: what to send, how many reply bytes
/// to expect, and the tag under which the reply is delivered.
#[derive(Debug, Clone)]
pub struct Exchange<const K: usize> {
    tx: Vec<u8, K>,
    rx_len: usize,
    tag: CommandTag,
}

impl<const K: usize> Exchange<K> {
    /// A write-only exchange (no reply expected).
    pub fn write(tag: CommandTag, tx: &[u8]) -> Result<Self> {
        Self::build(tag, tx, 0)
    }

    /// A write followed by `rx_len` reply bytes.
    pub fn query(tag: CommandTag, tx: &[u8], rx_len: usize) -> Result<Self> {
        Self::build(tag, tx, rx_len)
    }

    fn build(tag: CommandTag, tx: &[u8], rx_len: usize) -> Result<Self> {
        if tx.len() + rx_len > K {
            return Err(ResourceError::PayloadTooLong.into());
        }
        let mut buf = Vec::new();
        // Length was checked above; the push cannot fail.
        let _ = buf.extend_from_slice(tx);
        Ok(Self {
            tx: buf,
            rx_len,
            tag,
        })
    }
}

/// Receives the reply bytes of each completed exchange, in ISR context.
///
/// Implementations must be short and allocation-free; the master node
/// implements this to copy status replies into its mirror arrays.
pub trait ExchangeSink {
    fn on_exchange_complete(&mut self, tag: CommandTag, rx: &[u8]);
}

/// Sink that drops every completion (event-only consumers).
pub struct NullSink;

impl ExchangeSink for NullSink {
    fn on_exchange_complete(&mut self, _tag: CommandTag, _rx: &[u8]) {}
}

// ═══════════════════════════════════════════════════════════════
//  Command queue state machine
// ═══════════════════════════════════════════════════════════════

/// Transfer phase of the in-flight row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Sending,
    Receiving,
}

/// One occupied ring slot.
#[derive(Debug, Clone)]
struct Row<const K: usize> {
    tx: Vec<u8, K>,
    rx_len: usize,
    rx: Vec<u8, K>,
    tag: CommandTag,
}

/// Ring of `R` pending exchanges with payload capacity `K` per row,
/// driven byte-by-byte from the transmission-complete interrupt.
///
/// All mutation happens either in the main loop (`enqueue`) or in the
/// serial ISR (`on_byte_complete`); the integration layer serialises the
/// two through a `critical_section::Mutex<RefCell<…>>` static, mirroring
/// the timer pool.
pub struct CommandQueue<const R: usize, const K: usize> {
    rows: [Option<Row<K>>; R],
    /// Producer cursor: next free row.
    produce: usize,
    /// Consumer cursor: row currently in flight.
    consume: usize,
    phase: Phase,
    /// Next tx byte index within the in-flight row.
    tx_cursor: usize,
    /// Posted once per completed row.
    done_event: Event,
}

impl<const R: usize, const K: usize> CommandQueue<R, K> {
    pub const fn new(done_event: Event) -> Self {
        Self {
            rows: [const { None }; R],
            produce: 0,
            consume: 0,
            phase: Phase::Idle,
            tx_cursor: 0,
            done_event,
        }
    }

    /// Append an exchange to the ring and, when the queue is idle, start
    /// it immediately.
    ///
    /// Fails with [`ResourceError::CommandRingFull`] when every row is
    /// occupied — surfaced to the caller, never silently dropped.  ISR
    /// callers, which have no error channel, use
    /// [`enqueue_from_isr`](Self::enqueue_from_isr) instead.
    pub fn enqueue(
        &mut self,
        exchange: Exchange<K>,
        port: &mut impl SerialPort,
        events: &EventSet,
        sink: &mut impl ExchangeSink,
    ) -> Result<()> {
        if self.rows[self.produce].is_some() {
            return Err(ResourceError::CommandRingFull.into());
        }
        self.rows[self.produce] = Some(Row {
            tx: exchange.tx,
            rx_len: exchange.rx_len,
            rx: Vec::new(),
            tag: exchange.tag,
        });
        self.produce = (self.produce + 1) % R;

        if self.phase == Phase::Idle {
            self.start_next(port, events, sink);
        }
        Ok(())
    }

    /// Enqueue from interrupt context, where no error channel exists.
    ///
    /// A full ring drops the exchange and posts
    /// [`Event::TransportFault`]; the main loop counts the drop from
    /// that event.  Otherwise identical to [`enqueue`](Self::enqueue).
    pub fn enqueue_from_isr(
        &mut self,
        exchange: Exchange<K>,
        port: &mut impl SerialPort,
        events: &EventSet,
        sink: &mut impl ExchangeSink,
    ) {
        if self.enqueue(exchange, port, events, sink).is_err() {
            events.post(Event::TransportFault);
        }
    }

    /// Byte-complete interrupt handler.
    ///
    /// `rx_byte` is the byte clocked in during the completed transfer;
    /// it is meaningful only in the Receiving phase.  O(1), no
    /// allocation, no logging.
    pub fn on_byte_complete(
        &mut self,
        rx_byte: u8,
        port: &mut impl SerialPort,
        events: &EventSet,
        sink: &mut impl ExchangeSink,
    ) {
        match self.phase {
            // Spurious interrupt (e.g. a byte after external reset).
            Phase::Idle => {}

            Phase::Sending => {
                let Some(row) = self.rows[self.consume].as_ref() else {
                    self.phase = Phase::Idle;
                    return;
                };
                if self.tx_cursor < row.tx.len() {
                    let byte = row.tx[self.tx_cursor];
                    self.tx_cursor += 1;
                    port.load_tx(byte);
                } else if row.rx_len > 0 {
                    self.phase = Phase::Receiving;
                } else {
                    self.complete_row(port, events, sink);
                }
            }

            Phase::Receiving => {
                let Some(row) = self.rows[self.consume].as_mut() else {
                    self.phase = Phase::Idle;
                    return;
                };
                // Capacity was validated at build time.
                let _ = row.rx.push(rx_byte);
                if row.rx.len() >= row.rx_len {
                    self.complete_row(port, events, sink);
                }
            }
        }
    }

    /// Whether no row is currently in flight.
    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Tag of the row currently in flight, if any.
    pub fn in_flight(&self) -> Option<CommandTag> {
        if self.phase == Phase::Idle {
            None
        } else {
            self.rows[self.consume].as_ref().map(|r| r.tag)
        }
    }

    /// Number of occupied rows (in flight plus queued).
    pub fn queued(&self) -> usize {
        self.rows.iter().filter(|r| r.is_some()).count()
    }

    /// Total ring capacity.
    pub const fn capacity(&self) -> usize {
        R
    }

    // ── Internal ──────────────────────────────────────────────────

    /// Free the in-flight row, deliver its reply, post the completion
    /// event, and start the next row back-to-back (no idle gap).
    fn complete_row(
        &mut self,
        port: &mut impl SerialPort,
        events: &EventSet,
        sink: &mut impl ExchangeSink,
    ) {
        if let Some(row) = self.rows[self.consume].take() {
            self.consume = (self.consume + 1) % R;
            sink.on_exchange_complete(row.tag, &row.rx);
            events.post(self.done_event);
        }
        self.start_next(port, events, sink);
    }

    /// Begin transmitting the row under the consumer cursor, if any.
    /// Zero-length exchanges complete inline, so this loops until a row
    /// actually occupies the wire or the ring is drained.
    fn start_next(
        &mut self,
        port: &mut impl SerialPort,
        events: &EventSet,
        sink: &mut impl ExchangeSink,
    ) {
        loop {
            let Some(row) = self.rows[self.consume].as_ref() else {
                self.phase = Phase::Idle;
                return;
            };

            if !row.tx.is_empty() {
                self.phase = Phase::Sending;
                let byte = row.tx[0];
                self.tx_cursor = 1;
                port.load_tx(byte);
                return;
            }
            if row.rx_len > 0 {
                // Pure receive: wait for the peer's first byte.
                self.phase = Phase::Receiving;
                return;
            }

            // Degenerate zero/zero exchange: completes immediately.
            if let Some(row) = self.rows[self.consume].take() {
                self.consume = (self.consume + 1) % R;
                sink.on_exchange_complete(row.tag, &row.rx);
                events.post(self.done_event);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    /// Port that records every byte loaded into the transmit register.
    struct RecordingPort {
        loaded: std::vec::Vec<u8>,
    }

    impl RecordingPort {
        fn new() -> Self {
            Self { loaded: std::vec::Vec::new() }
        }
    }

    impl SerialPort for RecordingPort {
        fn load_tx(&mut self, byte: u8) {
            self.loaded.push(byte);
        }
    }

    /// Sink that records each completion's tag and reply bytes.
    struct RecordingSink {
        completions: std::vec::Vec<(CommandTag, std::vec::Vec<u8>)>,
    }

    impl RecordingSink {
        fn new() -> Self {
            Self { completions: std::vec::Vec::new() }
        }
    }

    impl ExchangeSink for RecordingSink {
        fn on_exchange_complete(&mut self, tag: CommandTag, rx: &[u8]) {
            self.completions.push((tag, rx.to_vec()));
        }
    }

    type Queue = CommandQueue<4, 8>;

    fn done_count(events: &EventSet) -> u32 {
        let mut n = 0;
        events.drain(|e| {
            if e == Event::BusExchangeDone {
                n += 1;
            }
        });
        n
    }

    #[test]
    fn write_exchange_pumps_all_bytes() {
        let mut q = Queue::new(Event::BusExchangeDone);
        let mut port = RecordingPort::new();
        let mut sink = RecordingSink::new();
        let events = EventSet::new();

        let cmd = Exchange::write(CommandTag::Untagged, &[0x10, 0x20, 0x30]).unwrap();
        q.enqueue(cmd, &mut port, &events, &mut sink).unwrap();

        // enqueue on an idle queue loads the first byte immediately.
        assert_eq!(port.loaded, vec![0x10]);
        assert!(!q.is_idle());

        q.on_byte_complete(0, &mut port, &events, &mut sink);
        q.on_byte_complete(0, &mut port, &events, &mut sink);
        assert_eq!(port.loaded, vec![0x10, 0x20, 0x30]);

        // Final byte completes the row: one completion, queue idle.
        q.on_byte_complete(0, &mut port, &events, &mut sink);
        assert!(q.is_idle());
        assert_eq!(sink.completions.len(), 1);
        assert_eq!(done_count(&events), 1);
    }

    #[test]
    fn query_sends_then_receives() {
        let mut q = Queue::new(Event::BusExchangeDone);
        let mut port = RecordingPort::new();
        let mut sink = RecordingSink::new();
        let events = EventSet::new();

        // tx_len = 3, rx_len = 2: exactly 3 transmit loads, then 2
        // receive advances, then exactly one completion.
        let cmd = Exchange::query(CommandTag::SlaveStatus { slave: 1 }, &[7, 8, 9], 2).unwrap();
        q.enqueue(cmd, &mut port, &events, &mut sink).unwrap();

        q.on_byte_complete(0, &mut port, &events, &mut sink); // tx 2
        q.on_byte_complete(0, &mut port, &events, &mut sink); // tx 3
        q.on_byte_complete(0, &mut port, &events, &mut sink); // tx done → receiving
        assert_eq!(port.loaded.len(), 3);
        assert!(sink.completions.is_empty());

        q.on_byte_complete(0xAA, &mut port, &events, &mut sink);
        assert!(sink.completions.is_empty());
        q.on_byte_complete(0xBB, &mut port, &events, &mut sink);

        assert_eq!(sink.completions.len(), 1);
        let (tag, rx) = &sink.completions[0];
        assert_eq!(*tag, CommandTag::SlaveStatus { slave: 1 });
        assert_eq!(rx, &vec![0xAA, 0xBB]);
        assert_eq!(done_count(&events), 1);
        assert!(q.is_idle());
    }

    #[test]
    fn queued_rows_drain_back_to_back() {
        let mut q = Queue::new(Event::BusExchangeDone);
        let mut port = RecordingPort::new();
        let mut sink = RecordingSink::new();
        let events = EventSet::new();

        q.enqueue(
            Exchange::write(CommandTag::Untagged, &[1]).unwrap(),
            &mut port,
            &events,
            &mut sink,
        )
        .unwrap();
        q.enqueue(
            Exchange::write(CommandTag::Untagged, &[2]).unwrap(),
            &mut port,
            &events,
            &mut sink,
        )
        .unwrap();

        // First row's only byte completes: the second row must start in
        // the same interrupt, with no idle gap.
        q.on_byte_complete(0, &mut port, &events, &mut sink);
        assert_eq!(port.loaded, vec![1, 2]);
        assert!(!q.is_idle());

        q.on_byte_complete(0, &mut port, &events, &mut sink);
        assert!(q.is_idle());
        assert_eq!(sink.completions.len(), 2);
    }

    #[test]
    fn ring_full_is_surfaced_and_reclaimed() {
        let mut q = Queue::new(Event::BusExchangeDone);
        let mut port = NullPort;
        let mut sink = NullSink;
        let events = EventSet::new();

        // Rows are two bytes each; the first starts in flight but its
        // slot stays occupied until completion.
        for i in 0..4 {
            q.enqueue(
                Exchange::write(CommandTag::Untagged, &[i, i]).unwrap(),
                &mut port,
                &events,
                &mut sink,
            )
            .unwrap();
        }
        assert_eq!(q.queued(), 4);

        let err = q
            .enqueue(
                Exchange::write(CommandTag::Untagged, &[9]).unwrap(),
                &mut port,
                &events,
                &mut sink,
            )
            .unwrap_err();
        assert_eq!(
            err,
            crate::error::Error::Resource(ResourceError::CommandRingFull)
        );

        // Drain everything: 2 interrupts per row.
        for _ in 0..8 {
            q.on_byte_complete(0, &mut port, &events, &mut sink);
        }
        assert!(q.is_idle());
        assert_eq!(q.queued(), 0);

        // Full capacity reclaimed.
        for i in 0..4 {
            q.enqueue(
                Exchange::write(CommandTag::Untagged, &[i]).unwrap(),
                &mut port,
                &events,
                &mut sink,
            )
            .unwrap();
        }
    }

    #[test]
    fn isr_enqueue_drops_when_full_and_flags_the_loop() {
        let mut q = Queue::new(Event::BusExchangeDone);
        let mut port = NullPort;
        let mut sink = NullSink;
        let events = EventSet::new();

        for i in 0..4 {
            q.enqueue(
                Exchange::write(CommandTag::Untagged, &[i, i]).unwrap(),
                &mut port,
                &events,
                &mut sink,
            )
            .unwrap();
        }

        // Full ring: the exchange is dropped, the fault bit raised.
        q.enqueue_from_isr(
            Exchange::write(CommandTag::Untagged, &[9]).unwrap(),
            &mut port,
            &events,
            &mut sink,
        );
        assert_eq!(q.queued(), 4);
        assert!(events.pending().contains(Event::TransportFault));

        // With a free row it behaves exactly like enqueue.
        for _ in 0..8 {
            q.on_byte_complete(0, &mut port, &events, &mut sink);
        }
        events.drain(|_| {});
        q.enqueue_from_isr(
            Exchange::write(CommandTag::Untagged, &[1]).unwrap(),
            &mut port,
            &events,
            &mut sink,
        );
        assert_eq!(q.queued(), 1);
        assert!(!events.pending().contains(Event::TransportFault));
    }

    #[test]
    fn oversized_payload_rejected_at_build() {
        let err = Exchange::<8>::query(CommandTag::Untagged, &[0; 6], 3).unwrap_err();
        assert_eq!(
            err,
            crate::error::Error::Resource(ResourceError::PayloadTooLong)
        );
    }

    #[test]
    fn pure_receive_waits_for_peer() {
        let mut q = Queue::new(Event::LinkExchangeDone);
        let mut port = RecordingPort::new();
        let mut sink = RecordingSink::new();
        let events = EventSet::new();

        let cmd = Exchange::query(CommandTag::Untagged, &[], 2).unwrap();
        q.enqueue(cmd, &mut port, &events, &mut sink).unwrap();

        // Nothing transmitted; the queue sits in the receiving phase.
        assert!(port.loaded.is_empty());
        assert!(!q.is_idle());

        q.on_byte_complete(0x01, &mut port, &events, &mut sink);
        q.on_byte_complete(0x02, &mut port, &events, &mut sink);
        assert_eq!(sink.completions[0].1, vec![0x01, 0x02]);
        assert!(q.is_idle());
    }

    #[test]
    fn zero_length_exchange_completes_inline() {
        let mut q = Queue::new(Event::BusExchangeDone);
        let mut port = RecordingPort::new();
        let mut sink = RecordingSink::new();
        let events = EventSet::new();

        let cmd = Exchange::write(CommandTag::Untagged, &[]).unwrap();
        q.enqueue(cmd, &mut port, &events, &mut sink).unwrap();

        assert!(q.is_idle());
        assert_eq!(sink.completions.len(), 1);
        assert!(sink.completions[0].1.is_empty());
        assert_eq!(done_count(&events), 1);
    }

    #[test]
    fn spurious_interrupt_while_idle_is_ignored() {
        let mut q = Queue::new(Event::BusExchangeDone);
        let mut port = RecordingPort::new();
        let mut sink = RecordingSink::new();
        let events = EventSet::new();

        q.on_byte_complete(0xFF, &mut port, &events, &mut sink);
        assert!(q.is_idle());
        assert!(sink.completions.is_empty());
        assert!(events.pending().is_empty());
    }

    #[test]
    fn submission_order_is_preserved() {
        let mut q = Queue::new(Event::BusExchangeDone);
        let mut port = RecordingPort::new();
        let mut sink = RecordingSink::new();
        let events = EventSet::new();

        for slave in 1..=3 {
            q.enqueue(
                Exchange::write(CommandTag::SlaveCommand { slave }, &[slave]).unwrap(),
                &mut port,
                &events,
                &mut sink,
            )
            .unwrap();
        }
        for _ in 0..3 {
            q.on_byte_complete(0, &mut port, &events, &mut sink);
        }

        let tags: std::vec::Vec<_> = sink.completions.iter().map(|(t, _)| *t).collect();
        assert_eq!(
            tags,
            vec![
                CommandTag::SlaveCommand { slave: 1 },
                CommandTag::SlaveCommand { slave: 2 },
                CommandTag::SlaveCommand { slave: 3 },
            ]
        );
    }
}
