//! Transmit pipeline: transfer fragmentation and the outbound frame queue.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use embedded_can::ExtendedId;

use crate::core::TransferId;
use crate::format::{TailByte, TransferCrc, PADDING, SOT_TOGGLE};
use crate::frame::{Frame, FrameLength};
use crate::memory::MemoryResource;
use crate::time::Instant;
use crate::Error;

struct TxQueueItem {
    deadline: Instant,
    can_id: u32,
    /// Complete wire payload including padding, CRC and tail byte. Obtained
    /// from the memory resource, returned on pop.
    payload: Vec<u8>,
}

/// Outbound frame queue ordered like the bus arbitrates: by CAN identifier
/// ascending, first-in-first-out among equal identifiers.
///
/// All frames of one transfer share an identifier and are spliced in as one
/// contiguous run, so no later push can interleave with them.
#[derive(Default)]
pub(crate) struct TxQueue {
    items: VecDeque<TxQueueItem>,
}

impl TxQueue {
    /// Fragments a transfer and enqueues the resulting frames; returns how
    /// many. On allocation failure the queue and the memory resource are left
    /// exactly as they were.
    pub fn push<M: MemoryResource>(
        &mut self,
        memory: &mut M,
        mtu: usize,
        can_id: u32,
        deadline: Instant,
        transfer_id: TransferId,
        payload: &[u8],
    ) -> Result<usize, Error> {
        debug_assert!(mtu > 0 && mtu < FrameLength::MAX.as_usize());
        if payload.len() <= mtu {
            self.push_single_frame(memory, can_id, deadline, transfer_id, payload)
        } else {
            self.push_multi_frame(memory, mtu, can_id, deadline, transfer_id, payload)
        }
    }

    fn push_single_frame<M: MemoryResource>(
        &mut self,
        memory: &mut M,
        can_id: u32,
        deadline: Instant,
        transfer_id: TransferId,
        payload: &[u8],
    ) -> Result<usize, Error> {
        let frame_size = unwrap!(FrameLength::new_ceil(payload.len() + 1)).as_usize();
        let mut buffer = match memory.allocate(frame_size) {
            Some(buffer) => buffer,
            None => {
                warn!("tx push: out of memory");
                return Err(Error::OutOfMemory);
            }
        };
        buffer[..payload.len()].copy_from_slice(payload);
        // Bytes between the payload and the tail are already zero, which is
        // the padding value.
        buffer[frame_size - 1] = TailByte::single_frame(transfer_id).into();

        let index = self.insertion_index(can_id);
        self.items.insert(
            index,
            TxQueueItem {
                deadline,
                can_id,
                payload: buffer,
            },
        );
        Ok(1)
    }

    fn push_multi_frame<M: MemoryResource>(
        &mut self,
        memory: &mut M,
        mtu: usize,
        can_id: u32,
        deadline: Instant,
        transfer_id: TransferId,
        payload: &[u8],
    ) -> Result<usize, Error> {
        // The transfer stream on the wire is payload ‖ crc, chopped into
        // frames of `mtu` bytes plus a tail each; only the last frame is
        // DLC-rounded and padded. The CRC covers payload and padding both.
        let total_size = payload.len() + TransferCrc::SIZE;
        let mut crc = TransferCrc::new();
        crc.add_all(payload);

        // Frames are staged aside and spliced in as one run only once every
        // allocation has succeeded.
        let mut staged: Vec<TxQueueItem> = Vec::new();
        let mut offset = 0;
        let mut start_of_transfer = true;
        let mut toggle = SOT_TOGGLE;

        while offset < total_size {
            let remaining = total_size - offset;
            let frame_size = if remaining < mtu {
                unwrap!(FrameLength::new_ceil(remaining + 1)).as_usize()
            } else {
                mtu + 1
            };
            let mut buffer = match memory.allocate(frame_size) {
                Some(buffer) => buffer,
                None => {
                    warn!("tx push: out of memory, rolling back {} frames", staged.len());
                    for item in staged {
                        memory.free(item.payload);
                    }
                    return Err(Error::OutOfMemory);
                }
            };

            let capacity = frame_size - 1;
            let mut frame_offset = 0;

            if offset < payload.len() {
                let take = (payload.len() - offset).min(capacity);
                buffer[..take].copy_from_slice(&payload[offset..offset + take]);
                frame_offset += take;
                offset += take;
            }

            if offset >= payload.len() {
                // Padding precedes the CRC and is folded into it.
                while frame_offset + TransferCrc::SIZE < capacity {
                    buffer[frame_offset] = PADDING;
                    crc.add(PADDING);
                    frame_offset += 1;
                }
                // The two CRC bytes may straddle a frame boundary.
                if frame_offset < capacity && offset == payload.len() {
                    buffer[frame_offset] = (crc.get() >> 8) as u8;
                    frame_offset += 1;
                    offset += 1;
                }
                if frame_offset < capacity && offset > payload.len() {
                    buffer[frame_offset] = crc.get() as u8;
                    frame_offset += 1;
                    offset += 1;
                }
            }

            debug_assert_eq!(frame_offset + 1, frame_size);
            buffer[frame_offset] = TailByte::new(
                start_of_transfer,
                offset >= total_size,
                toggle,
                transfer_id,
            )
            .into();
            staged.push(TxQueueItem {
                deadline,
                can_id,
                payload: buffer,
            });
            start_of_transfer = false;
            toggle = !toggle;
        }

        debug_assert!(staged.len() >= 2);
        let index = self.insertion_index(can_id);
        let count = staged.len();
        for (run, item) in staged.into_iter().enumerate() {
            self.items.insert(index + run, item);
        }
        Ok(count)
    }

    /// Index right after the last queued item whose identifier does not
    /// exceed `can_id`; inserting there keeps the order and the FIFO
    /// tie-break.
    fn insertion_index(&self, can_id: u32) -> usize {
        self.items.partition_point(|item| item.can_id <= can_id)
    }

    /// Non-owning view of the head frame, with the deadline in the timestamp
    /// field.
    pub fn peek(&self) -> Option<Frame<'_>> {
        self.items.front().map(|item| Frame {
            timestamp: item.deadline,
            id: unwrap!(ExtendedId::new(item.can_id)),
            payload: &item.payload,
        })
    }

    /// Detaches the head frame and returns its buffer to the memory
    /// resource. No-op on an empty queue.
    pub fn pop<M: MemoryResource>(&mut self, memory: &mut M) {
        if let Some(item) = self.items.pop_front() {
            memory.free(item.payload);
        }
    }

    /// Returns every queued buffer to the memory resource.
    pub fn drain<M: MemoryResource>(&mut self, memory: &mut M) {
        while !self.items.is_empty() {
            self.pop(memory);
        }
    }
}
