//! Capture dispatch: the interrupt side of the data path.
//!
//! Each incoming frame is interleaved over `inputs` codec channels. A fixed
//! list of [`Route`]s says which input channel feeds which queue; routes are
//! visited in order and an input channel read by several routes is copied
//! into one block that all of its queues share.
use crate::{
    pool::{BlockPool, BlockRef, Slot},
    queue::CaptureQueue,
    sample::Sample,
    Error,
};

/// One input channel of the frame feeding one channel queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub input: u8,
    pub queue: u8,
}

impl Route {
    pub const fn new(input: u8, queue: u8) -> Self {
        Route { input, queue }
    }
}

/// Pool, channel queues and routing for one recording session.
///
/// Shared by reference between the capture interrupt ([`on_frame`]) and the
/// main loop (everything else).
///
/// [`on_frame`]: Capture::on_frame
pub struct Capture<'a, S, const N: usize, const CH: usize, const Q: usize> {
    pool: BlockPool<'a, S, N>,
    queues: [CaptureQueue<Q>; CH],
    routes: &'a [Route],
    inputs: usize,
}

impl<'a, S: Sample, const N: usize, const CH: usize, const Q: usize> Capture<'a, S, N, CH, Q> {
    /// `inputs` is the number of interleaved channels in each frame.
    pub fn new(slots: &'a mut [Slot<S, N>], routes: &'a [Route], inputs: usize) -> Result<Self, Error> {
        if routes.is_empty() {
            return Err(Error::Config("no capture routes"));
        }
        for route in routes {
            if route.input as usize >= inputs {
                return Err(Error::Config("route reads a missing input channel"));
            }
            if route.queue as usize >= CH {
                return Err(Error::Config("route targets a missing queue"));
            }
        }
        for queue in 0..CH {
            if !routes.iter().any(|r| r.queue as usize == queue) {
                return Err(Error::Config("channel queue has no route"));
            }
        }
        Ok(Capture {
            pool: BlockPool::new(slots)?,
            queues: core::array::from_fn(|_| CaptureQueue::new()),
            routes,
            inputs,
        })
    }

    pub fn pool(&self) -> &BlockPool<'a, S, N> {
        &self.pool
    }

    pub fn queue(&self, channel: usize) -> &CaptureQueue<Q> {
        &self.queues[channel]
    }

    /// Interrupt entry: split one interleaved frame of `N * inputs` samples
    /// into blocks and queue them. Never blocks; frames that find no free
    /// block or a full queue are counted as dropped.
    pub fn on_frame(&self, frame: &[S]) {
        debug_assert_eq!(frame.len(), N * self.inputs);
        for (i, route) in self.routes.iter().enumerate() {
            // first route of each input channel does the copy for all of them
            if self.routes[..i].iter().any(|r| r.input == route.input) {
                continue;
            }
            let input = route.input;
            let Some(block) = self.pool.allocate() else {
                self.fan_out(input, |queue| queue.record_drop());
                continue;
            };
            let channel = input as usize;
            let stride = self.inputs;
            let filled = self.pool.write(&block, |samples| {
                for (n, sample) in samples.iter_mut().enumerate() {
                    *sample = frame.get(n * stride + channel).copied().unwrap_or(S::ZERO);
                }
            });
            debug_assert!(filled.is_some());

            self.fan_out(input, |queue| {
                if let Err(rejected) = queue.push(self.pool.retain(&block)) {
                    self.pool.release(rejected);
                }
            });
            self.pool.release(block);
        }
    }

    fn fan_out(&self, input: u8, mut f: impl FnMut(&CaptureQueue<Q>)) {
        self.routes
            .iter()
            .filter(|r| r.input == input)
            .for_each(|r| f(&self.queues[r.queue as usize]));
    }

    /// Every channel has at least one block waiting.
    pub fn frames_ready(&self) -> bool {
        self.queues.iter().all(|q| q.available() > 0)
    }

    pub fn read_buffer(&self, channel: usize) -> Option<BlockRef> {
        self.queues[channel].read_buffer()
    }

    pub fn copy_block(&self, block: &BlockRef, out: &mut [S; N]) {
        self.pool.read(block, |samples| out.copy_from_slice(samples));
    }

    /// Give the main loop's reference back to the pool.
    pub fn free_buffer(&self, block: BlockRef) {
        self.pool.release(block);
    }

    /// Release everything pending, e.g. while acquisition is stopped.
    pub fn discard_pending(&self) -> usize {
        let mut discarded = 0;
        for queue in &self.queues {
            while let Some(block) = queue.read_buffer() {
                self.pool.release(block);
                discarded += 1;
            }
        }
        discarded
    }

    /// Drops over all channels since boot.
    pub fn dropped(&self) -> u32 {
        self.queues.iter().fold(0u32, |n, q| n.wrapping_add(q.dropped()))
    }
}
