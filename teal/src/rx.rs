//! Receive pipeline: subscriptions and frame-to-transfer dispatch.

mod session;

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::can_id::FrameModel;
use crate::core::NodeId;
use crate::memory::MemoryResource;
use crate::time::Duration;
use crate::transfer::{PortId, RxPayload, RxTransfer, TransferKind};
use crate::Error;

use session::RxSession;

/// One reassembly slot per possible source node address.
const SESSIONS_PER_SUBSCRIPTION: usize = NodeId::MAX.get() as usize + 1;

/// An active subscription on one (kind, port) channel.
///
/// Sources are reassembled independently: each gets its own session slot, so
/// interleaved transfers from different nodes never disturb one another.
struct RxSubscription {
    port_id: u16,
    /// Accumulator size; payload beyond it is truncated away.
    extent: usize,
    /// Transfer-id timeout: the longest a transfer may stay in flight before
    /// a new start frame may displace it.
    timeout: Duration,
    sessions: [Option<Box<RxSession>>; SESSIONS_PER_SUBSCRIPTION],
}

impl RxSubscription {
    fn new(port_id: u16, extent: usize, timeout: Duration) -> Self {
        Self {
            port_id,
            extent,
            timeout,
            sessions: core::array::from_fn(|_| None),
        }
    }

    fn release_sessions<M: MemoryResource>(&mut self, memory: &mut M) {
        for slot in &mut self.sessions {
            if let Some(session) = slot.take() {
                session.release(memory);
            }
        }
    }
}

/// All subscriptions of an instance, one list per transfer kind.
#[derive(Default)]
pub(crate) struct SubscriptionTable {
    lists: [Vec<RxSubscription>; TransferKind::COUNT],
}

impl SubscriptionTable {
    /// Opens a subscription, displacing any previous one on the same
    /// channel; returns whether one was displaced.
    ///
    /// The displacement is not an optimization: a prior subscription with a
    /// smaller extent may still own shorter accumulators that a larger
    /// extent would overrun, so its sessions must go.
    pub fn subscribe<M: MemoryResource>(
        &mut self,
        memory: &mut M,
        port: PortId,
        extent: usize,
        timeout: Duration,
    ) -> bool {
        let displaced = self.unsubscribe(memory, port);
        self.lists[port.kind().index()].push(RxSubscription::new(port.raw(), extent, timeout));
        displaced
    }

    /// Closes the subscription on the channel, returning every session
    /// buffer to the memory resource; returns whether one existed.
    pub fn unsubscribe<M: MemoryResource>(&mut self, memory: &mut M, port: PortId) -> bool {
        let list = &mut self.lists[port.kind().index()];
        match list.iter().position(|sub| sub.port_id == port.raw()) {
            Some(index) => {
                let mut subscription = list.swap_remove(index);
                subscription.release_sessions(memory);
                true
            }
            None => false,
        }
    }

    /// Routes a parsed, address-filtered frame to its session.
    pub fn accept<'a, M: MemoryResource>(
        &mut self,
        memory: &mut M,
        frame: &FrameModel<'a>,
        iface_index: u8,
    ) -> Result<Option<RxTransfer<'a>>, Error> {
        let list = &mut self.lists[frame.port.kind().index()];
        let Some(subscription) = list
            .iter_mut()
            .find(|sub| sub.port_id == frame.port.raw())
        else {
            // Nobody asked for this channel.
            return Ok(None);
        };

        let Some(source) = frame.source else {
            // Anonymous transfers are stateless; the frame is the transfer.
            return Ok(Some(RxTransfer {
                timestamp: frame.timestamp,
                metadata: frame.metadata(),
                payload: RxPayload::Borrowed(frame.payload),
            }));
        };

        let slot = &mut subscription.sessions[usize::from(source)];
        if slot.is_none() {
            // Creating a session for a mid-transfer frame would be futile:
            // the transfer cannot complete without its start.
            if !frame.start_of_transfer {
                return Ok(None);
            }
            *slot = Some(Box::new(RxSession::new(iface_index)));
        }

        let completed = unwrap!(slot.as_mut()).update(
            memory,
            frame,
            iface_index,
            subscription.timeout,
            subscription.extent,
        )?;

        Ok(completed.map(|done| RxTransfer {
            timestamp: done.timestamp,
            metadata: crate::transfer::TransferMetadata {
                transfer_id: done.transfer_id,
                ..frame.metadata()
            },
            payload: RxPayload::Owned(done.payload),
        }))
    }

    /// Tears down every subscription, returning all buffers.
    pub fn clear<M: MemoryResource>(&mut self, memory: &mut M) {
        for list in &mut self.lists {
            for subscription in list.iter_mut() {
                subscription.release_sessions(memory);
            }
            list.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ServiceId, SubjectId};
    use crate::memory::Heap;

    fn subject(value: u16) -> PortId {
        PortId::Message(SubjectId::new(value).unwrap())
    }

    const TIMEOUT: Duration = Duration::micros(1_000_000);

    #[test]
    fn test_subscribe_reports_displacement() {
        let mut table = SubscriptionTable::default();
        assert!(!table.subscribe(&mut Heap, subject(7), 16, TIMEOUT));
        assert!(table.subscribe(&mut Heap, subject(7), 32, TIMEOUT));
        assert!(!table.subscribe(&mut Heap, subject(8), 16, TIMEOUT));
    }

    #[test]
    fn test_unsubscribe_reports_presence() {
        let mut table = SubscriptionTable::default();
        table.subscribe(&mut Heap, subject(7), 16, TIMEOUT);
        assert!(table.unsubscribe(&mut Heap, subject(7)));
        assert!(!table.unsubscribe(&mut Heap, subject(7)));
    }

    #[test]
    fn test_kinds_do_not_collide() {
        // A service and a subject may share the same numeric port.
        let mut table = SubscriptionTable::default();
        table.subscribe(&mut Heap, subject(9), 16, TIMEOUT);
        assert!(!table.subscribe(
            &mut Heap,
            PortId::Request(ServiceId::new(9).unwrap()),
            16,
            TIMEOUT
        ));
        assert!(table.unsubscribe(&mut Heap, subject(9)));
        assert!(table.unsubscribe(&mut Heap, PortId::Request(ServiceId::new(9).unwrap())));
    }
}
