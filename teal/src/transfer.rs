//! Application-visible transfer model.

use alloc::vec::Vec;

use crate::core::{NodeId, Priority, ServiceId, SubjectId, TransferId};
use crate::time::Instant;

/// The three categories of transfers the transport distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferKind {
    Message,
    Request,
    Response,
}

impl TransferKind {
    pub(crate) const COUNT: usize = 3;

    pub(crate) const fn index(self) -> usize {
        self as usize
    }
}

/// The logical channel a transfer travels on: a broadcast subject or one
/// direction of a service exchange.
///
/// Carrying the port identifier inside the kind makes a message with a
/// service-id (or vice versa) unrepresentable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PortId {
    Message(SubjectId),
    Request(ServiceId),
    Response(ServiceId),
}

impl PortId {
    pub const fn kind(self) -> TransferKind {
        match self {
            PortId::Message(_) => TransferKind::Message,
            PortId::Request(_) => TransferKind::Request,
            PortId::Response(_) => TransferKind::Response,
        }
    }

    pub(crate) const fn raw(self) -> u16 {
        match self {
            PortId::Message(subject) => subject.get(),
            PortId::Request(service) | PortId::Response(service) => service.get(),
        }
    }
}

/// Everything that identifies a transfer besides its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferMetadata {
    pub priority: Priority,
    pub port: PortId,
    /// The other endpoint: the destination on transmission, the source on
    /// reception. `None` means broadcast on transmission and an anonymous
    /// source on reception.
    pub remote: Option<NodeId>,
    pub transfer_id: TransferId,
}

/// A transfer handed to the engine for transmission.
///
/// The payload is borrowed and copied into the transmit queue by
/// [`tx_push`](crate::Instance::tx_push); the caller keeps ownership.
#[derive(Debug, Clone, Copy)]
pub struct TxTransfer<'a> {
    /// Latest useful transmission time; stored with each frame and echoed by
    /// [`tx_peek`](crate::Instance::tx_peek) so the driver can drop late
    /// frames. Never interpreted by the engine.
    pub deadline: Instant,
    pub metadata: TransferMetadata,
    pub payload: &'a [u8],
}

/// A reassembled transfer handed to the application.
#[derive(Debug)]
pub struct RxTransfer<'frame> {
    /// Reception time of the first frame of the transfer.
    pub timestamp: Instant,
    pub metadata: TransferMetadata,
    pub payload: RxPayload<'frame>,
}

/// Payload of a received transfer.
///
/// Reassembled transfers own their accumulator buffer, which must go back to
/// the instance through [`free_payload`](crate::Instance::free_payload) once
/// consumed. Anonymous transfers are served zero-copy straight out of the
/// inbound frame; copy the bytes if they must outlive it.
#[derive(Debug)]
pub enum RxPayload<'frame> {
    Owned(Vec<u8>),
    Borrowed(&'frame [u8]),
}

impl RxPayload<'_> {
    pub fn as_slice(&self) -> &[u8] {
        match self {
            RxPayload::Owned(buffer) => buffer,
            RxPayload::Borrowed(bytes) => bytes,
        }
    }
}

impl core::ops::Deref for RxPayload<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl AsRef<[u8]> for RxPayload<'_> {
    fn as_ref(&self) -> &[u8] {
        self.as_slice()
    }
}
