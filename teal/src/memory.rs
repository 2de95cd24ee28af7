//! Pluggable payload memory.

use alloc::vec::Vec;

/// Source of every payload buffer the engine owns.
///
/// Transmit queue payloads, reception accumulators and the reassembled
/// payloads handed to the application all come from, and return to, the one
/// resource the instance was created with. Exhaustion is reported by
/// returning `None`; the engine then rolls the current operation back and
/// surfaces [`Error::OutOfMemory`](crate::Error::OutOfMemory), leaving its
/// state untouched.
///
/// Implementations must not call back into the instance they serve.
pub trait MemoryResource {
    /// Returns a zero-filled buffer with `len() == size`, or `None` when the
    /// resource is exhausted.
    fn allocate(&mut self, size: usize) -> Option<Vec<u8>>;

    /// Takes back a buffer previously produced by
    /// [`allocate`](Self::allocate). The buffer may have been truncated.
    fn free(&mut self, buffer: Vec<u8>);
}

/// Global-heap memory resource.
///
/// Allocation failure is reported through the fallible reservation API
/// instead of aborting, so even heap-backed instances honor the rollback
/// contract.
#[derive(Debug, Default, Clone, Copy)]
pub struct Heap;

impl MemoryResource for Heap {
    fn allocate(&mut self, size: usize) -> Option<Vec<u8>> {
        let mut buffer = Vec::new();
        buffer.try_reserve_exact(size).ok()?;
        buffer.resize(size, 0);
        Some(buffer)
    }

    fn free(&mut self, buffer: Vec<u8>) {
        drop(buffer);
    }
}
