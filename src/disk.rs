//! Sector aligned staging buffer in front of the card.
//!
//! Small capture blocks are gathered here and handed to the card in writes
//! of exactly `SIZE` bytes. The only shorter write is the explicit
//! [`flush_partial`](DiskAggregator::flush_partial) used when a file is
//! closed. Each flush blocks the main loop for the duration of the card
//! write; that stall is the worst case the capture queues must absorb.
use crate::{Error, SECTOR_SIZE};

pub struct DiskAggregator<const SIZE: usize> {
    buffer: [u8; SIZE],
    cursor: usize,
    flushes: u32,
}

impl<const SIZE: usize> Default for DiskAggregator<SIZE> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const SIZE: usize> DiskAggregator<SIZE> {
    const ALIGNED: () = assert!(
        SIZE > 0 && SIZE % SECTOR_SIZE == 0,
        "disk buffer must be a whole number of sectors"
    );

    pub const fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::ALIGNED;
        DiskAggregator {
            buffer: [0; SIZE],
            cursor: 0,
            flushes: 0,
        }
    }

    /// Bytes waiting for the next flush.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    /// Flushes issued since creation, full and partial.
    pub fn flushes(&self) -> u32 {
        self.flushes
    }

    /// Copy `data` in. Every time the buffer fills, `flush` receives all
    /// `SIZE` bytes and the cursor restarts at zero; the rest carries over.
    pub fn append(
        &mut self,
        mut data: &[u8],
        mut flush: impl FnMut(&[u8]) -> Result<(), Error>,
    ) -> Result<(), Error> {
        while !data.is_empty() {
            let room = SIZE - self.cursor;
            let take = room.min(data.len());
            self.buffer[self.cursor..self.cursor + take].copy_from_slice(&data[..take]);
            self.cursor += take;
            data = &data[take..];
            if self.cursor == SIZE {
                self.flushes = self.flushes.wrapping_add(1);
                self.cursor = 0;
                flush(&self.buffer)?;
            }
        }
        Ok(())
    }

    /// Write out whatever is buffered, even if it is less than `SIZE`.
    pub fn flush_partial(
        &mut self,
        flush: impl FnOnce(&[u8]) -> Result<(), Error>,
    ) -> Result<(), Error> {
        if self.cursor == 0 {
            return Ok(());
        }
        let len = core::mem::take(&mut self.cursor);
        self.flushes = self.flushes.wrapping_add(1);
        flush(&self.buffer[..len])
    }

    /// Forget buffered bytes without writing them.
    pub fn clear(&mut self) {
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect<const S: usize>(
        disk: &mut DiskAggregator<S>,
        chunks: &[&[u8]],
    ) -> Vec<Vec<u8>> {
        let mut writes = Vec::new();
        for chunk in chunks {
            disk.append(chunk, |buf| {
                writes.push(buf.to_vec());
                Ok(())
            })
            .unwrap();
        }
        writes
    }

    #[test]
    fn exact_fill_flushes_once() {
        let mut disk = DiskAggregator::<1024>::new();
        let half = [1u8; 512];
        let writes = collect(&mut disk, &[&half, &half]);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 1024);
        assert_eq!(disk.cursor(), 0);
    }

    #[test]
    fn remainder_carries_over() {
        let mut disk = DiskAggregator::<512>::new();
        let block: Vec<u8> = (0..300u16).map(|i| i as u8).collect();
        let writes = collect(&mut disk, &[&block, &block]);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].len(), 512);
        assert_eq!(&writes[0][300..], &block[..212]);
        assert_eq!(disk.cursor(), 88);

        let mut tail = Vec::new();
        disk.flush_partial(|buf| {
            tail.extend_from_slice(buf);
            Ok(())
        })
        .unwrap();
        assert_eq!(tail, &block[212..]);
        assert!(disk.is_empty());
        assert_eq!(disk.flushes(), 2);
    }

    #[test]
    fn large_append_emits_several_full_writes() {
        let mut disk = DiskAggregator::<512>::new();
        let writes = collect(&mut disk, &[&[7u8; 1600]]);
        assert_eq!(writes.iter().map(Vec::len).collect::<Vec<_>>(), vec![512; 3]);
        assert_eq!(disk.cursor(), 64);
    }

    #[test]
    fn partial_flush_of_empty_buffer_is_a_no_op() {
        let mut disk = DiskAggregator::<512>::new();
        disk.flush_partial(|_| panic!("nothing to write")).unwrap();
        assert_eq!(disk.flushes(), 0);
    }

    #[test]
    fn failed_flush_propagates() {
        let mut disk = DiskAggregator::<512>::new();
        let err = disk
            .append(&[0u8; 512], |_| Err(Error::State("card gone")))
            .unwrap_err();
        assert_eq!(err, Error::State("card gone"));
    }
}
