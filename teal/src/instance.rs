//! Transport engine instance: the transmit and receive operations.

use crate::can_id::{self, FrameModel};
use crate::core::NodeId;
use crate::frame::{Frame, FrameLength, MTU_CAN_CLASSIC, MTU_CAN_FD};
use crate::memory::{Heap, MemoryResource};
use crate::rx::SubscriptionTable;
use crate::time::Duration;
use crate::transfer::{PortId, RxPayload, RxTransfer, TxTransfer};
use crate::tx::TxQueue;
use crate::Error;

/// One independent protocol endpoint.
///
/// An instance is a plain synchronous state machine: nothing inside blocks,
/// sleeps or keeps time, and no two operations may run concurrently on the
/// same instance. A typical node wires three loops to it — the application
/// pushing transfers, the driver's transmit side peeking and popping frames,
/// the driver's receive side feeding frames in — serialized by one mutex
/// around the instance.
///
/// All buffer memory flows through the [`MemoryResource`] the instance was
/// created with; dropping the instance returns everything it still holds.
pub struct Instance<M: MemoryResource = Heap> {
    memory: M,
    mtu: usize,
    node_id: Option<NodeId>,
    tx_queue: TxQueue,
    subscriptions: SubscriptionTable,
}

impl Default for Instance<Heap> {
    fn default() -> Self {
        Self::new(Heap)
    }
}

impl<M: MemoryResource> Instance<M> {
    /// Creates an instance in the default state: CAN FD MTU, no node-id.
    pub fn new(memory: M) -> Self {
        Self {
            memory,
            mtu: MTU_CAN_FD,
            node_id: None,
            tx_queue: TxQueue::default(),
            subscriptions: SubscriptionTable::default(),
        }
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.node_id
    }

    /// Sets the local node address, or clears it to make the instance
    /// anonymous again.
    ///
    /// Without a node-id the instance can only emit single-frame broadcast
    /// messages and will not accept service frames.
    pub fn set_node_id(&mut self, node_id: Option<NodeId>) {
        self.node_id = node_id;
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Sets the transport MTU in bytes.
    ///
    /// Values are clamped to the Classic CAN / CAN FD range and rounded up
    /// to a valid DLC payload length when frames are built, so any value in
    /// `8..=64` is usable.
    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = mtu.clamp(MTU_CAN_CLASSIC, MTU_CAN_FD);
    }

    /// Frame payload bytes available to transfer data: the MTU rounded up to
    /// a valid frame length, minus the tail byte.
    fn presentation_layer_mtu(&self) -> usize {
        unwrap!(FrameLength::new_ceil(self.mtu)).as_usize() - 1
    }

    /// Fragments a transfer into frames and inserts them into the transmit
    /// queue; returns the number of frames enqueued.
    ///
    /// The queue mirrors bus arbitration: frames leave in CAN-ID order,
    /// first-in-first-out among equals, and the frames of one transfer form
    /// an unbreakable run. On failure nothing is enqueued.
    pub fn tx_push(&mut self, transfer: &TxTransfer<'_>) -> Result<usize, Error> {
        let mtu = self.presentation_layer_mtu();
        let can_id = can_id::make_can_id(&transfer.metadata, self.node_id, transfer.payload, mtu)?;
        self.tx_queue.push(
            &mut self.memory,
            mtu,
            can_id,
            transfer.deadline,
            transfer.metadata.transfer_id,
            transfer.payload,
        )
    }

    /// Borrows the next frame to put on the bus, if any. The frame's
    /// timestamp field carries the transmission deadline of its transfer.
    pub fn tx_peek(&self) -> Option<Frame<'_>> {
        self.tx_queue.peek()
    }

    /// Discards the frame [`tx_peek`](Self::tx_peek) showed. No-op when the
    /// queue is empty.
    pub fn tx_pop(&mut self) {
        self.tx_queue.pop(&mut self.memory);
    }

    /// Processes one received frame.
    ///
    /// Returns a transfer when this frame completed one; `Ok(None)` when the
    /// frame was consumed without producing a transfer, which covers
    /// everything from a mid-transfer fragment to foreign or corrupt bus
    /// traffic. The `iface_index` is an arbitrary caller-side label stored
    /// with the reassembly state; sources are reassembled independently per
    /// interface-agnostic session.
    pub fn rx_accept<'a>(
        &mut self,
        frame: &Frame<'a>,
        iface_index: u8,
    ) -> Result<Option<RxTransfer<'a>>, Error> {
        let Some(model) = FrameModel::parse(frame) else {
            return Ok(None);
        };
        if let Some(destination) = model.destination {
            if self.node_id != Some(destination) {
                // Service frame for somebody else.
                return Ok(None);
            }
        }
        self.subscriptions.accept(&mut self.memory, &model, iface_index)
    }

    /// Starts accepting transfers on a channel.
    ///
    /// `extent` bounds the reassembled payload: longer transfers are
    /// truncated (their integrity still checked over the full length).
    /// `timeout` bounds how long a transfer may stay in flight per source.
    /// An existing subscription on the same channel is torn down first;
    /// returns `true` if there was one.
    pub fn rx_subscribe(&mut self, port: PortId, extent: usize, timeout: Duration) -> bool {
        self.subscriptions
            .subscribe(&mut self.memory, port, extent, timeout)
    }

    /// Stops accepting transfers on a channel, releasing every reassembly
    /// buffer held for it; returns `true` if the subscription existed.
    pub fn rx_unsubscribe(&mut self, port: PortId) -> bool {
        self.subscriptions.unsubscribe(&mut self.memory, port)
    }

    /// Returns a received payload to the memory resource.
    ///
    /// Borrowed (anonymous) payloads have nothing to return and are
    /// accepted for uniformity.
    pub fn free_payload(&mut self, payload: RxPayload<'_>) {
        if let RxPayload::Owned(buffer) = payload {
            self.memory.free(buffer);
        }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }
}

impl<M: MemoryResource> Drop for Instance<M> {
    fn drop(&mut self) {
        self.tx_queue.drain(&mut self.memory);
        self.subscriptions.clear(&mut self.memory);
    }
}
