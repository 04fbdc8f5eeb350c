//! Fixed capacity pool of reference counted sample blocks.
//!
//! The capture interrupt allocates a block per frame and hands references to
//! one or more channel queues; the main loop copies the samples out and
//! releases its reference. A block goes back to the free set exactly when
//! its last reference is released.
//!
//! Free slots are tracked in a bitmap (bit set = free). Allocation scans from
//! a word cursor for the first non-zero word and takes its lowest set bit, so
//! the lowest free index is always handed out first. Every word below the
//! cursor is zero; a release below the cursor moves it back.
use core::cell::RefCell;

use critical_section::Mutex;

use crate::{interrupt, sample::Sample, Error};

/// Upper bound on pool capacity, fixes the bitmap size.
pub const MAX_BLOCKS: usize = 1024;
const MAP_WORDS: usize = MAX_BLOCKS / 32;

/// Backing storage for one block.
pub struct Slot<S, const N: usize> {
    samples: [S; N],
    refs: u16,
}

impl<S: Sample, const N: usize> Slot<S, N> {
    /// Unused slot, for static initializers.
    pub const EMPTY: Self = Slot {
        samples: [S::ZERO; N],
        refs: 0,
    };
}

/// Handle to an allocated block. Each live handle accounts for one count on
/// the block; hand it back with [`BlockPool::release`].
#[must_use = "dropping a BlockRef leaks the pool slot"]
#[derive(Debug, PartialEq, Eq)]
pub struct BlockRef(u16);

impl BlockRef {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

struct Inner<'a, S, const N: usize> {
    slots: &'a mut [Slot<S, N>],
    free: [u32; MAP_WORDS],
    cursor: usize,
    in_use: usize,
    high_water: usize,
}

impl<S: Sample, const N: usize> Inner<'_, S, N> {
    fn take_first_free(&mut self) -> Option<usize> {
        let words = self.slots.len().div_ceil(32);
        let mut word = self.cursor;
        while word < words {
            let bits = self.free[word];
            if bits != 0 {
                let bit = bits.trailing_zeros() as usize;
                self.free[word] = bits & !(1 << bit);
                self.cursor = word;
                return Some(word * 32 + bit);
            }
            word += 1;
        }
        self.cursor = words;
        None
    }

    fn put_free(&mut self, index: usize) {
        let word = index / 32;
        self.free[word] |= 1 << (index % 32);
        if word < self.cursor {
            self.cursor = word;
        }
    }

    fn allocate(&mut self) -> Option<BlockRef> {
        let index = self.take_first_free()?;
        let slot = &mut self.slots[index];
        slot.refs = 1;
        slot.samples = [S::ZERO; N];
        self.in_use += 1;
        self.high_water = self.high_water.max(self.in_use);
        Some(BlockRef(index as u16))
    }

    fn release(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        debug_assert!(slot.refs > 0, "release of free block {}", index);
        match slot.refs {
            0 => {}
            1 => {
                slot.refs = 0;
                self.in_use -= 1;
                self.put_free(index);
            }
            _ => slot.refs -= 1,
        }
    }
}

pub struct BlockPool<'a, S, const N: usize> {
    inner: Mutex<RefCell<Inner<'a, S, N>>>,
    capacity: usize,
}

impl<'a, S: Sample, const N: usize> BlockPool<'a, S, N> {
    /// Build a pool over `slots`; its length is the pool capacity.
    pub fn new(slots: &'a mut [Slot<S, N>]) -> Result<Self, Error> {
        let capacity = slots.len();
        if capacity == 0 || capacity > MAX_BLOCKS {
            return Err(Error::Config("pool capacity must be 1..=1024 blocks"));
        }
        let mut free = [0u32; MAP_WORDS];
        for (word, bits) in free.iter_mut().enumerate().take(capacity.div_ceil(32)) {
            let remaining = capacity - word * 32;
            *bits = if remaining >= 32 {
                u32::MAX
            } else {
                (1u32 << remaining) - 1
            };
        }
        for slot in slots.iter_mut() {
            slot.refs = 0;
        }
        Ok(BlockPool {
            inner: Mutex::new(RefCell::new(Inner {
                slots,
                free,
                cursor: 0,
                in_use: 0,
                high_water: 0,
            })),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Take a zeroed block with a count of one. `None` means the pool is
    /// exhausted; callers treat that as backpressure and drop the frame.
    pub fn allocate(&self) -> Option<BlockRef> {
        interrupt::free(|cs| self.inner.borrow_ref_mut(cs).allocate())
    }

    /// Add a reference for another holder of `block`.
    pub fn retain(&self, block: &BlockRef) -> BlockRef {
        interrupt::free(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let slot = &mut inner.slots[block.index()];
            slot.refs = slot.refs.saturating_add(1);
        });
        BlockRef(block.0)
    }

    /// Drop one reference. The slot returns to the free set with the last one.
    pub fn release(&self, block: BlockRef) {
        interrupt::free(|cs| self.inner.borrow_ref_mut(cs).release(block.index()))
    }

    pub fn ref_count(&self, block: &BlockRef) -> u16 {
        interrupt::free(|cs| self.inner.borrow_ref(cs).slots[block.index()].refs)
    }

    /// Read the samples of `block`. Runs with interrupts masked, keep `f` short.
    pub fn read<R>(&self, block: &BlockRef, f: impl FnOnce(&[S; N]) -> R) -> R {
        interrupt::free(|cs| f(&self.inner.borrow_ref(cs).slots[block.index()].samples))
    }

    /// Mutate the samples of `block` if this is its only reference.
    /// Returns `None` for shared blocks, see [`make_mut`](Self::make_mut).
    pub fn write<R>(&self, block: &BlockRef, f: impl FnOnce(&mut [S; N]) -> R) -> Option<R> {
        interrupt::free(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let slot = &mut inner.slots[block.index()];
            if slot.refs != 1 {
                return None;
            }
            Some(f(&mut slot.samples))
        })
    }

    /// Get a block that can be written: `block` itself when unshared,
    /// otherwise a private copy (the shared original loses this reference).
    /// Hands `block` back untouched if no slot is free for the copy.
    pub fn make_mut(&self, block: BlockRef) -> Result<BlockRef, BlockRef> {
        interrupt::free(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            let index = block.index();
            if inner.slots[index].refs == 1 {
                return Ok(block);
            }
            let Some(copy) = inner.allocate() else {
                return Err(block);
            };
            let samples = inner.slots[index].samples;
            inner.slots[copy.index()].samples = samples;
            inner.release(index);
            Ok(copy)
        })
    }

    pub fn in_use(&self) -> usize {
        interrupt::free(|cs| self.inner.borrow_ref(cs).in_use)
    }

    /// Most blocks ever allocated at once since the last reset.
    pub fn high_water(&self) -> usize {
        interrupt::free(|cs| self.inner.borrow_ref(cs).high_water)
    }

    pub fn reset_high_water(&self) {
        interrupt::free(|cs| {
            let mut inner = self.inner.borrow_ref_mut(cs);
            inner.high_water = inner.in_use;
        })
    }
}
