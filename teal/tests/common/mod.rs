//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::cell::Cell;
use std::rc::Rc;

use teal::core::{NodeId, Priority, ServiceId, SubjectId, TransferId};
use teal::frame::{ExtendedId, Frame};
use teal::memory::MemoryResource;
use teal::time::{Duration, Instant};
use teal::transfer::{PortId, TransferMetadata, TxTransfer};
use teal::Instance;

pub const TIMEOUT: Duration = Duration::micros(2_000_000);

/// Instrumented memory resource: counts traffic and can be told to refuse
/// allocations after a quota.
pub struct TestMemory {
    stats: Rc<MemoryStats>,
}

#[derive(Default)]
pub struct MemoryStats {
    allocated: Cell<usize>,
    freed: Cell<usize>,
    quota: Cell<Option<usize>>,
}

impl MemoryStats {
    pub fn allocated(&self) -> usize {
        self.allocated.get()
    }

    pub fn freed(&self) -> usize {
        self.freed.get()
    }

    /// Buffers currently outstanding.
    pub fn balance(&self) -> usize {
        self.allocated.get() - self.freed.get()
    }

    /// Permits `n` further allocations, then refuses all of them.
    pub fn set_quota(&self, n: usize) {
        self.quota.set(Some(n));
    }

    pub fn lift_quota(&self) {
        self.quota.set(None);
    }
}

impl TestMemory {
    pub fn new() -> (Self, Rc<MemoryStats>) {
        let stats = Rc::new(MemoryStats::default());
        (
            Self {
                stats: Rc::clone(&stats),
            },
            stats,
        )
    }
}

impl MemoryResource for TestMemory {
    fn allocate(&mut self, size: usize) -> Option<Vec<u8>> {
        match self.stats.quota.get() {
            Some(0) => return None,
            Some(n) => self.stats.quota.set(Some(n - 1)),
            None => {}
        }
        self.stats.allocated.set(self.stats.allocated.get() + 1);
        Some(vec![0; size])
    }

    fn free(&mut self, buffer: Vec<u8>) {
        self.stats.freed.set(self.stats.freed.get() + 1);
        drop(buffer);
    }
}

pub fn instrumented_instance() -> (Instance<TestMemory>, Rc<MemoryStats>) {
    let (memory, stats) = TestMemory::new();
    (Instance::new(memory), stats)
}

pub fn node(value: u8) -> NodeId {
    NodeId::new(value).unwrap()
}

pub fn subject(value: u16) -> PortId {
    PortId::Message(SubjectId::new(value).unwrap())
}

pub fn request(value: u16) -> PortId {
    PortId::Request(ServiceId::new(value).unwrap())
}

pub fn message_transfer<'a>(
    priority: Priority,
    subject_id: u16,
    transfer_id: u8,
    payload: &'a [u8],
) -> TxTransfer<'a> {
    TxTransfer {
        deadline: Instant::from_ticks(10_000),
        metadata: TransferMetadata {
            priority,
            port: subject(subject_id),
            remote: None,
            transfer_id: TransferId::new(transfer_id).unwrap(),
        },
        payload,
    }
}

/// A transmit-queue frame lifted out of the borrow so it can be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedFrame {
    pub can_id: u32,
    pub payload: Vec<u8>,
}

impl OwnedFrame {
    pub fn as_frame(&self, at: u64) -> Frame<'_> {
        Frame {
            timestamp: Instant::from_ticks(at),
            id: ExtendedId::new(self.can_id).unwrap(),
            payload: &self.payload,
        }
    }
}

/// Pops the whole transmit queue in peek order.
pub fn drain_tx<M: MemoryResource>(instance: &mut Instance<M>) -> Vec<OwnedFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = instance.tx_peek() {
        frames.push(OwnedFrame {
            can_id: frame.id.as_raw(),
            payload: frame.payload.to_vec(),
        });
        instance.tx_pop();
    }
    frames
}
