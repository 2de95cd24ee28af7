//! # Teal
//!
//! A sans-I/O implementation of the Cyphal/CAN (UAVCAN v1) transport layer
//! for Classic CAN 2.0B and CAN FD.
//!
//! The crate turns application-level *transfers* — messages and service
//! request/response exchanges with a priority, a port, addressing and an
//! opaque payload — into wire frames and back:
//!
//! * [`Instance::tx_push`] fragments a transfer into padded, CRC-protected,
//!   DLC-aligned frames and files them in a transmit queue ordered the way
//!   the bus arbitrates; the driver drains it with [`Instance::tx_peek`] and
//!   [`Instance::tx_pop`].
//! * [`Instance::rx_accept`] validates inbound frames, tracks one reassembly
//!   session per subscription and source node, and hands out completed
//!   transfers; channels are selected with [`Instance::rx_subscribe`].
//!
//! There is no I/O, no clock and no allocator assumption inside: the driver
//! owns the bus, timestamps come from the caller, and every payload buffer
//! is obtained through the [`MemoryResource`] the instance is created with,
//! which makes the engine usable from bare-metal pools to the global heap
//! (the [`Heap`] default).
//!
//! The engine performs no internal locking; see [`Instance`] for the
//! intended threading arrangement.
#![no_std]

extern crate alloc;

pub use teal_core as core;

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

mod can_id;
pub mod frame;
pub mod format;
mod instance;
pub mod memory;
mod rx;
pub mod transfer;
mod tx;

pub use instance::Instance;
pub use memory::{Heap, MemoryResource};

/// Caller-supplied timestamps and timeouts, microsecond resolution.
///
/// The engine never reads a clock; it only compares and stores instants the
/// caller passes in.
pub mod time {
    pub type Instant = fugit::TimerInstantU64<1_000_000>;
    pub type Duration = fugit::TimerDurationU64<1_000_000>;
}

/// Failures the engine reports to the caller.
///
/// Wire-level trouble is deliberately absent: frames that violate the
/// protocol are dropped silently, keeping the receive loop trivial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// The transfer cannot be expressed on the wire: anonymous multi-frame
    /// or service transfers, a service transfer without both endpoints.
    InvalidArgument,
    /// The memory resource was exhausted; the operation was rolled back and
    /// no state changed.
    OutOfMemory,
}
