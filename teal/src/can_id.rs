//! 29-bit CAN identifier codec and inbound frame parsing.
//!
//! The identifier layout is fixed by the protocol and deliberately not
//! parameterized; the tests pin it down with literal constants.

use crate::core::{NodeId, Priority, ServiceId, SubjectId, TransferId};
use crate::format::{TailByte, TransferCrc};
use crate::frame::Frame;
use crate::time::Instant;
use crate::transfer::{PortId, TransferMetadata};
use crate::Error;

const PRIORITY_OFFSET: u32 = 26;
const SERVICE_ID_OFFSET: u32 = 14;
const SUBJECT_ID_OFFSET: u32 = 8;
const DESTINATION_OFFSET: u32 = 7;

const FLAG_SERVICE_NOT_MESSAGE: u32 = 1 << 25;
const FLAG_ANONYMOUS_MESSAGE: u32 = 1 << 24;
const FLAG_REQUEST_NOT_RESPONSE: u32 = 1 << 24;
const FLAG_RESERVED_23: u32 = 1 << 23;
const FLAG_RESERVED_07: u32 = 1 << 7;

fn message_id(subject: SubjectId, source: NodeId) -> u32 {
    u32::from(source.get()) | u32::from(subject.get()) << SUBJECT_ID_OFFSET
}

fn service_id(service: ServiceId, request: bool, source: NodeId, destination: NodeId) -> u32 {
    u32::from(source.get())
        | u32::from(destination.get()) << DESTINATION_OFFSET
        | u32::from(service.get()) << SERVICE_ID_OFFSET
        | if request { FLAG_REQUEST_NOT_RESPONSE } else { 0 }
        | FLAG_SERVICE_NOT_MESSAGE
}

/// Builds the identifier for an outbound transfer.
///
/// `single_frame_limit` is the presentation-layer MTU; it gates the anonymous
/// path, which must fit one frame because a source pseudo-id derived from the
/// payload cannot survive reassembly interleaving.
pub(crate) fn make_can_id(
    metadata: &TransferMetadata,
    local_id: Option<NodeId>,
    payload: &[u8],
    single_frame_limit: usize,
) -> Result<u32, Error> {
    let base = match (metadata.port, local_id) {
        (PortId::Message(_), _) if metadata.remote.is_some() => {
            return Err(Error::InvalidArgument);
        }
        (PortId::Message(subject), Some(source)) => message_id(subject, source),
        (PortId::Message(subject), None) => {
            if payload.len() > single_frame_limit {
                return Err(Error::InvalidArgument);
            }
            let mut crc = TransferCrc::new();
            crc.add_all(payload);
            let pseudo = NodeId::from_truncating(crc.get() as u8);
            message_id(subject, pseudo) | FLAG_ANONYMOUS_MESSAGE
        }
        (PortId::Request(_) | PortId::Response(_), None) => {
            return Err(Error::InvalidArgument);
        }
        (PortId::Request(service), Some(source)) => {
            let destination = metadata.remote.ok_or(Error::InvalidArgument)?;
            service_id(service, true, source, destination)
        }
        (PortId::Response(service), Some(source)) => {
            let destination = metadata.remote.ok_or(Error::InvalidArgument)?;
            service_id(service, false, source, destination)
        }
    };
    Ok(base | u32::from(metadata.priority.code()) << PRIORITY_OFFSET)
}

/// An inbound frame decoded down to the transport fields.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameModel<'a> {
    pub timestamp: Instant,
    pub priority: Priority,
    pub port: PortId,
    /// `None` for anonymous message frames.
    pub source: Option<NodeId>,
    /// `None` for message frames.
    pub destination: Option<NodeId>,
    pub transfer_id: TransferId,
    pub start_of_transfer: bool,
    pub end_of_transfer: bool,
    pub toggle: bool,
    /// Wire payload with the tail byte cut off.
    pub payload: &'a [u8],
}

impl<'a> FrameModel<'a> {
    /// Decodes a frame, or `None` if it is not a valid transport frame.
    ///
    /// Rejections are silent by design: foreign traffic on a shared bus is
    /// not an error condition.
    pub fn parse(frame: &Frame<'a>) -> Option<Self> {
        let (tail, payload) = frame.payload.split_last()?;
        let tail = TailByte::from(*tail);
        let can_id = frame.id.as_raw();

        if can_id & FLAG_RESERVED_23 != 0 {
            return None;
        }

        let (port, source, destination) = if can_id & FLAG_SERVICE_NOT_MESSAGE == 0 {
            if can_id & FLAG_RESERVED_07 != 0 {
                return None;
            }
            let subject = SubjectId::from_truncating((can_id >> SUBJECT_ID_OFFSET) as u16);
            let source = if can_id & FLAG_ANONYMOUS_MESSAGE != 0 {
                None
            } else {
                Some(NodeId::from_truncating(can_id as u8))
            };
            (PortId::Message(subject), source, None)
        } else {
            let service = ServiceId::from_truncating((can_id >> SERVICE_ID_OFFSET) as u16);
            let port = if can_id & FLAG_REQUEST_NOT_RESPONSE != 0 {
                PortId::Request(service)
            } else {
                PortId::Response(service)
            };
            let source = Some(NodeId::from_truncating(can_id as u8));
            let destination = Some(NodeId::from_truncating((can_id >> DESTINATION_OFFSET) as u8));
            (port, source, destination)
        };

        let model = Self {
            timestamp: frame.timestamp,
            priority: Priority::from_code_truncating((can_id >> PRIORITY_OFFSET) as u8),
            port,
            source,
            destination,
            transfer_id: tail.transfer_id(),
            start_of_transfer: tail.start_of_transfer(),
            end_of_transfer: tail.end_of_transfer(),
            toggle: tail.toggle(),
            payload,
        };

        // A start frame with the toggle cleared is a v0 frame.
        if model.start_of_transfer && !model.toggle {
            return None;
        }
        // Anonymous transfers carry no session state, so they must be
        // complete in one frame.
        if model.source.is_none() && !(model.start_of_transfer && model.end_of_transfer) {
            return None;
        }
        Some(model)
    }

    pub fn metadata(&self) -> TransferMetadata {
        TransferMetadata {
            priority: self.priority,
            port: self.port,
            remote: self.source,
            transfer_id: self.transfer_id,
        }
    }
}
