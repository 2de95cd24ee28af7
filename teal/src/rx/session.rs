//! Per-source transfer reassembly state.

use alloc::vec::Vec;

use crate::can_id::FrameModel;
use crate::core::TransferId;
use crate::format::{TransferCrc, SOT_TOGGLE};
use crate::memory::MemoryResource;
use crate::time::{Duration, Instant};
use crate::Error;

/// A transfer that finished reassembly; the buffer ownership moves out of
/// the session.
pub(crate) struct Completed {
    pub timestamp: Instant,
    pub transfer_id: TransferId,
    pub payload: Vec<u8>,
}

/// Reassembly state for one (subscription, source node) pair.
///
/// A session is created on the first start-of-transfer frame from its source
/// and lives until the subscription is dropped. Between transfers it is
/// dormant: the accumulator buffer is only held while a transfer is in
/// flight.
///
/// Frames that violate the protocol sequencing are dropped without touching
/// the state; wire corruption is not an error the application hears about.
pub(crate) struct RxSession {
    /// Reception time of the current transfer's start frame.
    transfer_timestamp: Instant,
    /// Wire bytes accepted so far, CRC trailer included and truncation
    /// ignored.
    total_size: usize,
    /// Accumulator of `extent` bytes from the memory resource; `Some` while
    /// a transfer is in flight.
    payload: Option<Vec<u8>>,
    crc: TransferCrc,
    transfer_id: TransferId,
    /// Toggle value the next frame must carry.
    toggle: bool,
    iface_index: u8,
}

impl RxSession {
    pub fn new(iface_index: u8) -> Self {
        Self {
            transfer_timestamp: Instant::from_ticks(0),
            total_size: 0,
            payload: None,
            crc: TransferCrc::new(),
            transfer_id: TransferId::default(),
            toggle: SOT_TOGGLE,
            iface_index,
        }
    }

    fn in_progress(&self) -> bool {
        self.payload.is_some()
    }

    /// Feeds one parsed frame through the state machine.
    ///
    /// `Ok(Some(_))` when the frame completed a transfer, `Ok(None)` when it
    /// was consumed (or dropped) without one, `Err` only when the
    /// accumulator could not be allocated.
    pub fn update<M: MemoryResource>(
        &mut self,
        memory: &mut M,
        frame: &FrameModel<'_>,
        iface_index: u8,
        timeout: Duration,
        extent: usize,
    ) -> Result<Option<Completed>, Error> {
        if self.in_progress() {
            let timed_out = frame
                .timestamp
                .checked_duration_since(self.transfer_timestamp)
                .is_some_and(|elapsed| elapsed > timeout);
            if timed_out {
                trace!("rx session: transfer-id timeout, discarding partial transfer");
                self.abandon(memory);
            }
        }

        if !self.in_progress() {
            if !frame.start_of_transfer {
                return Ok(None);
            }
            return self.begin(memory, frame, iface_index, extent);
        }

        // A start flag cannot continue a transfer, and a frame whose
        // transfer-id or toggle disagrees with the expectation belongs to a
        // lost or reordered sequence. Either way the session is left as-is.
        if frame.start_of_transfer
            || frame.transfer_id != self.transfer_id
            || frame.toggle != self.toggle
        {
            trace!("rx session: out-of-sequence frame dropped");
            return Ok(None);
        }

        self.accumulate(frame.payload, extent);
        if frame.end_of_transfer {
            Ok(self.finish(memory, extent))
        } else {
            Ok(None)
        }
    }

    /// Starts a fresh transfer from a start-of-transfer frame.
    fn begin<M: MemoryResource>(
        &mut self,
        memory: &mut M,
        frame: &FrameModel<'_>,
        iface_index: u8,
        extent: usize,
    ) -> Result<Option<Completed>, Error> {
        debug_assert!(frame.start_of_transfer && frame.toggle == SOT_TOGGLE);
        let buffer = match memory.allocate(extent) {
            Some(buffer) => buffer,
            None => {
                warn!("rx session: out of memory");
                return Err(Error::OutOfMemory);
            }
        };

        self.transfer_timestamp = frame.timestamp;
        self.total_size = 0;
        self.payload = Some(buffer);
        self.crc = TransferCrc::new();
        self.transfer_id = frame.transfer_id;
        self.toggle = SOT_TOGGLE;
        self.iface_index = iface_index;

        self.accumulate(frame.payload, extent);
        if frame.end_of_transfer {
            // Single-frame transfers carry no CRC trailer.
            let mut payload = unwrap!(self.payload.take());
            payload.truncate(self.total_size.min(extent));
            Ok(Some(Completed {
                timestamp: self.transfer_timestamp,
                transfer_id: self.transfer_id,
                payload,
            }))
        } else {
            Ok(None)
        }
    }

    /// Stores what fits, counts and hashes everything.
    ///
    /// Bytes beyond the subscription extent are dropped from the buffer but
    /// still run through the CRC, so a truncated transfer validates like the
    /// full one.
    fn accumulate(&mut self, bytes: &[u8], extent: usize) {
        let buffer = unwrap!(self.payload.as_mut());
        let offset = self.total_size.min(extent);
        let store = bytes.len().min(extent - offset);
        buffer[offset..offset + store].copy_from_slice(&bytes[..store]);
        self.crc.add_all(bytes);
        self.total_size += bytes.len();
        self.toggle = !self.toggle;
    }

    /// Closes a multi-frame transfer on its end frame.
    fn finish<M: MemoryResource>(&mut self, memory: &mut M, extent: usize) -> Option<Completed> {
        // The accumulated stream ends with its own CRC, so an intact
        // transfer leaves the accumulator at zero.
        if self.total_size < TransferCrc::SIZE || self.crc.get() != 0 {
            trace!("rx session: transfer crc mismatch, discarding");
            self.abandon(memory);
            return None;
        }
        trace!(
            "rx session: transfer {} complete on iface {}",
            self.transfer_id.get(),
            self.iface_index
        );
        let mut payload = unwrap!(self.payload.take());
        payload.truncate((self.total_size - TransferCrc::SIZE).min(extent));
        Some(Completed {
            timestamp: self.transfer_timestamp,
            transfer_id: self.transfer_id,
            payload,
        })
    }

    /// Drops the transfer in flight, returning the accumulator.
    fn abandon<M: MemoryResource>(&mut self, memory: &mut M) {
        if let Some(buffer) = self.payload.take() {
            memory.free(buffer);
        }
    }

    /// Releases whatever the session still holds; used on unsubscription.
    pub fn release<M: MemoryResource>(mut self, memory: &mut M) {
        self.abandon(memory);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{NodeId, Priority, SubjectId};
    use crate::transfer::PortId;

    const TIMEOUT: Duration = Duration::micros(2_000_000);
    const EXTENT: usize = 32;
    const IFACE: u8 = 0;

    fn model(payload: &[u8], tail: u8, at: u64) -> FrameModel<'_> {
        FrameModel {
            timestamp: Instant::from_ticks(at),
            priority: Priority::Nominal,
            port: PortId::Message(SubjectId::from_truncating(0x55)),
            source: Some(NodeId::from_truncating(9)),
            destination: None,
            transfer_id: TransferId::from_truncating(tail),
            start_of_transfer: tail & 0x80 != 0,
            end_of_transfer: tail & 0x40 != 0,
            toggle: tail & 0x20 != 0,
            payload,
        }
    }

    fn feed(
        session: &mut RxSession,
        payload: &[u8],
        tail: u8,
        at: u64,
    ) -> Option<Completed> {
        session
            .update(&mut crate::memory::Heap, &model(payload, tail, at), IFACE, TIMEOUT, EXTENT)
            .unwrap()
    }

    #[test]
    fn test_single_frame_transfer() {
        let mut session = RxSession::new(IFACE);
        let done = feed(&mut session, &[1, 2, 3], 0xe0 + 7, 50).unwrap();
        assert_eq!(done.payload, [1, 2, 3]);
        assert_eq!(done.transfer_id.get(), 7);
        assert_eq!(done.timestamp, Instant::from_ticks(50));
        assert!(!session.in_progress());
    }

    #[test]
    fn test_two_frame_transfer() {
        let mut session = RxSession::new(IFACE);
        assert!(feed(&mut session, &[0, 1, 2, 3, 4, 5, 6], 0xa0 + 27, 10).is_none());
        let done = feed(&mut session, &[7, 0x17, 0x8d], 0x40 + 27, 20).unwrap();
        assert_eq!(done.payload, [0, 1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(done.timestamp, Instant::from_ticks(10));
    }

    #[test]
    fn test_missing_start_is_dropped() {
        let mut session = RxSession::new(IFACE);
        assert!(feed(&mut session, &[7, 0x17, 0x8d], 0x40 + 27, 10).is_none());
        assert!(!session.in_progress());
    }

    #[test]
    fn test_toggle_violation_drops_frame_not_session() {
        let mut session = RxSession::new(IFACE);
        assert!(feed(&mut session, &[0, 1, 2, 3, 4, 5, 6], 0xa0 + 27, 10).is_none());
        // Repeated toggle: a duplicate of the first frame.
        assert!(feed(&mut session, &[0, 1, 2, 3, 4, 5, 6], 0x20 + 27, 11).is_none());
        assert!(session.in_progress());
        // The expected continuation still completes the transfer.
        assert!(feed(&mut session, &[7, 0x17, 0x8d], 0x40 + 27, 12).is_some());
    }

    #[test]
    fn test_transfer_id_mismatch_dropped() {
        let mut session = RxSession::new(IFACE);
        assert!(feed(&mut session, &[0, 1, 2, 3, 4, 5, 6], 0xa0 + 27, 10).is_none());
        assert!(feed(&mut session, &[7, 0x17, 0x8d], 0x40 + 26, 11).is_none());
        assert!(session.in_progress());
    }

    #[test]
    fn test_crc_mismatch_discards_silently() {
        let mut session = RxSession::new(IFACE);
        assert!(feed(&mut session, &[0, 1, 2, 3, 4, 5, 6], 0xa0 + 27, 10).is_none());
        assert!(feed(&mut session, &[7, 0x17, 0x8e], 0x40 + 27, 11).is_none());
        assert!(!session.in_progress());
    }

    #[test]
    fn test_timeout_restarts_on_start_frame() {
        let mut session = RxSession::new(IFACE);
        assert!(feed(&mut session, &[0, 1, 2, 3, 4, 5, 6], 0xa0 + 27, 10).is_none());
        // Way past the timeout: the partial transfer is abandoned and the
        // start frame opens a new one.
        let done = feed(&mut session, &[9], 0xe0 + 28, 3_000_000);
        assert_eq!(done.unwrap().payload, [9]);
    }

    #[test]
    fn test_timeout_without_start_goes_idle() {
        let mut session = RxSession::new(IFACE);
        assert!(feed(&mut session, &[0, 1, 2, 3, 4, 5, 6], 0xa0 + 27, 10).is_none());
        assert!(feed(&mut session, &[7, 0x17, 0x8d], 0x40 + 27, 3_000_000).is_none());
        assert!(!session.in_progress());
    }

    #[test]
    fn test_truncation_keeps_crc_honest() {
        // Extent of 4 truncates an 8-byte transfer; the CRC still covers the
        // full wire stream so the transfer is accepted.
        let mut session = RxSession::new(IFACE);
        let mut memory = crate::memory::Heap;
        let frame = model(&[0, 1, 2, 3, 4, 5, 6], 0xa0 + 27, 10);
        assert!(session.update(&mut memory, &frame, IFACE, TIMEOUT, 4).unwrap().is_none());
        let frame = model(&[7, 0x17, 0x8d], 0x40 + 27, 11);
        let done = session.update(&mut memory, &frame, IFACE, TIMEOUT, 4).unwrap().unwrap();
        assert_eq!(done.payload, [0, 1, 2, 3]);
    }
}
