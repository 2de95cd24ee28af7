//! CAN frame model shared by the transmit and receive paths.

pub use embedded_can::ExtendedId;

use crate::time::Instant;

/// Largest payload of a Classic CAN 2.0B data frame.
pub const MTU_CAN_CLASSIC: usize = 8;

/// Largest payload of a CAN FD data frame.
pub const MTU_CAN_FD: usize = 64;

/// A payload length a CAN or CAN FD data frame can actually carry.
///
/// The four-bit DLC field cannot express arbitrary lengths above eight bytes,
/// so frame payloads are restricted to sixteen discrete sizes. Every frame
/// the engine emits has one of these lengths; the gap between the transfer
/// data and the next valid length is closed with padding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FrameLength(u8);

impl FrameLength {
    pub const MAX: FrameLength = FrameLength(64);

    /// Valid payload lengths indexed by DLC.
    const BY_DLC: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

    /// Accepts `len` only if a DLC encodes it exactly.
    pub const fn new(len: usize) -> Option<Self> {
        match Self::new_ceil(len) {
            Some(this) if this.0 as usize == len => Some(this),
            _ => None,
        }
    }

    /// Rounds `len` up to the nearest valid payload length.
    pub const fn new_ceil(len: usize) -> Option<Self> {
        let mut dlc = 0;
        while dlc < Self::BY_DLC.len() {
            if Self::BY_DLC[dlc] as usize >= len {
                return Some(Self(Self::BY_DLC[dlc]));
            }
            dlc += 1;
        }
        None
    }

    /// Payload length encoded by the four-bit `dlc`, upper bits ignored.
    pub const fn from_dlc(dlc: u8) -> Self {
        Self(Self::BY_DLC[(dlc & 0x0f) as usize])
    }

    /// The DLC encoding this length.
    pub const fn dlc(self) -> u8 {
        let mut dlc = 0;
        while Self::BY_DLC[dlc] != self.0 {
            dlc += 1;
        }
        dlc as u8
    }

    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl From<FrameLength> for usize {
    fn from(value: FrameLength) -> Self {
        value.as_usize()
    }
}

/// A single CAN data frame as exchanged with the media driver.
///
/// The payload is borrowed: on reception it lives in the driver's buffer for
/// the duration of the call, and on [`tx_peek`](crate::Instance::tx_peek) it
/// points into the transmit queue until the frame is popped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Reception time of an inbound frame; transmission deadline of an
    /// outbound one.
    pub timestamp: Instant,
    /// 29-bit extended identifier. Base-format frames do not occur in this
    /// transport.
    pub id: ExtendedId,
    pub payload: &'a [u8],
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: [usize; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 12, 16, 20, 24, 32, 48, 64];

    #[test]
    fn test_round_up() {
        for len in 0..=64usize {
            let rounded = FrameLength::new_ceil(len).unwrap().as_usize();
            let expected = *VALID.iter().find(|&&v| v >= len).unwrap();
            assert_eq!(rounded, expected, "len {len}");
        }
        assert!(FrameLength::new_ceil(65).is_none());
    }

    #[test]
    fn test_exact_lengths_only() {
        for len in 0..=64usize {
            assert_eq!(FrameLength::new(len).is_some(), VALID.contains(&len));
        }
    }

    #[test]
    fn test_dlc_round_trip() {
        for dlc in 0..=15u8 {
            let len = FrameLength::from_dlc(dlc);
            assert_eq!(len.as_usize(), VALID[dlc as usize]);
            assert_eq!(len.dlc(), dlc);
        }
        assert_eq!(FrameLength::from_dlc(0xf9).as_usize(), 12);
    }
}
