//! Bounded FIFO of block references between the capture interrupt and the
//! main loop.
//!
//! The interrupt side never waits: when the ring is full the new block is
//! handed back to be released and the drop counter goes up.
use core::cell::RefCell;

use critical_section::Mutex;

use crate::{interrupt, pool::BlockRef};

struct Ring<const Q: usize> {
    slots: [Option<BlockRef>; Q],
    head: usize,
    len: usize,
    dropped: u32,
}

pub struct CaptureQueue<const Q: usize> {
    ring: Mutex<RefCell<Ring<Q>>>,
}

impl<const Q: usize> Default for CaptureQueue<Q> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const Q: usize> CaptureQueue<Q> {
    pub const fn new() -> Self {
        CaptureQueue {
            ring: Mutex::new(RefCell::new(Ring {
                slots: [const { None }; Q],
                head: 0,
                len: 0,
                dropped: 0,
            })),
        }
    }

    pub const fn capacity(&self) -> usize {
        Q
    }

    /// Append `block`. A full queue keeps its contents, counts a drop and
    /// returns the block so the caller can release it.
    pub fn push(&self, block: BlockRef) -> Result<(), BlockRef> {
        interrupt::free(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            if ring.len == Q {
                ring.dropped = ring.dropped.wrapping_add(1);
                return Err(block);
            }
            let tail = (ring.head + ring.len) % Q;
            ring.slots[tail] = Some(block);
            ring.len += 1;
            Ok(())
        })
    }

    /// Oldest pending block, if any.
    pub fn read_buffer(&self) -> Option<BlockRef> {
        interrupt::free(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            if ring.len == 0 {
                return None;
            }
            let head = ring.head;
            let block = ring.slots[head].take();
            ring.head = (head + 1) % Q;
            ring.len -= 1;
            block
        })
    }

    /// Number of pending blocks.
    pub fn available(&self) -> usize {
        interrupt::free(|cs| self.ring.borrow_ref(cs).len)
    }

    /// Count a frame lost before it reached this queue.
    pub fn record_drop(&self) {
        interrupt::free(|cs| {
            let mut ring = self.ring.borrow_ref_mut(cs);
            ring.dropped = ring.dropped.wrapping_add(1);
        })
    }

    /// Frames lost since boot. Never cleared; readers keep their own
    /// previous value and take the wrapping difference.
    pub fn dropped(&self) -> u32 {
        interrupt::free(|cs| self.ring.borrow_ref(cs).dropped)
    }
}
