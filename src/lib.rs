//! LumiBus node firmware library.
//!
//! Cooperative runtime and asynchronous transport engine for a
//! bus-networked lighting-control node: software timer pool, sticky
//! event bitmask, interrupt-driven command-queue transport, and the
//! master-role bus scheduler.  All core logic is host-testable; the
//! ESP-IDF integration is confined to `drivers` and the binary target.

#![deny(unused_must_use)]

pub mod config;
pub mod diagnostics;
pub mod events;
pub mod master;
pub mod timers;
pub mod transport;

pub mod error;

pub mod drivers;
