// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Page-aligned write buffering.
//!
//! Sinks such as page blobs (or files opened for unbuffered I/O) only accept
//! writes whose offset and length are multiples of a fixed page size.
//! `PageBuffer` absorbs variable-length records and re-aligns them: every
//! flush zero-pads the pending bytes to a page boundary and writes the whole
//! block at the start of the first partially-filled page. The partial tail is
//! kept and rewritten together with the next records, so no gap is ever left.

use crate::error::Result;

/// Destination of aligned page blocks.
pub trait PageSink: Send {
    /// Writes `block` at `offset`. Both are multiples of the page size.
    fn write_pages(&mut self, offset: u64, block: &[u8]) -> Result<()>;

    /// Human-readable name for logs.
    fn name(&self) -> &str;
}

pub struct PageBuffer<S: PageSink> {
    sink: S,
    page_size: usize,
    capacity: u64,
    /// Bytes not yet covered by a full page on the sink.
    pending: Vec<u8>,
    full_pages_flushed: u64,
    bytes_written: u64,
}

impl<S: PageSink> PageBuffer<S> {
    pub fn new(sink: S, page_size: usize, capacity: u64) -> Self {
        Self {
            sink,
            page_size,
            capacity,
            pending: Vec::with_capacity(page_size),
            full_pages_flushed: 0,
            bytes_written: 0,
        }
    }

    /// True when `len` more bytes still fit in the segment.
    pub fn fits(&self, len: usize) -> bool {
        self.bytes_written + len as u64 <= self.capacity
    }

    pub fn write(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        self.bytes_written += bytes.len() as u64;
    }

    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }

        let size = self.pending.len();
        let full_pages = size / self.page_size;
        let tail = size % self.page_size;
        let padded = if tail == 0 {
            size
        } else {
            size + (self.page_size - tail)
        };

        let mut block = std::mem::take(&mut self.pending);
        block.resize(padded, 0);

        let offset = self.full_pages_flushed * self.page_size as u64;
        self.sink.write_pages(offset, &block)?;

        let tail_start = full_pages * self.page_size;
        self.pending = block[tail_start..tail_start + tail].to_vec();
        self.full_pages_flushed += full_pages as u64;
        Ok(())
    }

    /// Logical bytes accepted so far, padding excluded.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

impl PageSink for Box<dyn PageSink> {
    fn write_pages(&mut self, offset: u64, block: &[u8]) -> Result<()> {
        (**self).write_pages(offset, block)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that records every write and mirrors them into a flat image.
    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<(u64, usize)>,
        image: Vec<u8>,
    }

    impl PageSink for RecordingSink {
        fn write_pages(&mut self, offset: u64, block: &[u8]) -> Result<()> {
            self.writes.push((offset, block.len()));
            let end = offset as usize + block.len();
            if self.image.len() < end {
                self.image.resize(end, 0);
            }
            self.image[offset as usize..end].copy_from_slice(block);
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    #[test]
    fn test_flush_pads_to_page() {
        let mut buffer = PageBuffer::new(RecordingSink::default(), 16, 64);
        buffer.write(b"hello");
        buffer.flush().unwrap();

        let sink = buffer.sink();
        assert_eq!(sink.writes, vec![(0, 16)]);
        assert_eq!(&sink.image[..5], b"hello");
        assert!(sink.image[5..].iter().all(|b| *b == 0));
        assert_eq!(buffer.pending_len(), 5);
        assert_eq!(buffer.bytes_written(), 5);
    }

    #[test]
    fn test_partial_page_is_rewritten() {
        let mut buffer = PageBuffer::new(RecordingSink::default(), 16, 64);
        buffer.write(&[1u8; 10]);
        buffer.flush().unwrap();
        buffer.write(&[2u8; 10]);
        buffer.flush().unwrap();

        let sink = buffer.into_sink();
        // Second flush starts again at page 0: 20 bytes padded to 32.
        assert_eq!(sink.writes, vec![(0, 16), (0, 32)]);
        assert_eq!(&sink.image[..10], &[1u8; 10]);
        assert_eq!(&sink.image[10..20], &[2u8; 10]);
        assert!(sink.image[20..32].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_full_pages_advance_offset() {
        let mut buffer = PageBuffer::new(RecordingSink::default(), 16, 64);
        buffer.write(&[7u8; 20]);
        buffer.flush().unwrap();
        assert_eq!(buffer.pending_len(), 4);

        buffer.write(&[8u8; 12]);
        buffer.flush().unwrap();
        // Exactly one page pending, no tail retained afterwards.
        assert_eq!(buffer.pending_len(), 0);

        buffer.write(&[9u8; 1]);
        buffer.flush().unwrap();

        let sink = buffer.into_sink();
        assert_eq!(sink.writes, vec![(0, 32), (16, 16), (32, 16)]);
        assert_eq!(&sink.image[..20], &[7u8; 20]);
        assert_eq!(&sink.image[20..32], &[8u8; 12]);
        assert_eq!(sink.image[32], 9);
    }

    #[test]
    fn test_empty_flush_writes_nothing() {
        let mut buffer = PageBuffer::new(RecordingSink::default(), 16, 64);
        buffer.flush().unwrap();
        assert!(buffer.sink().writes.is_empty());
    }

    #[test]
    fn test_fits_counts_unflushed_bytes() {
        let mut buffer = PageBuffer::new(RecordingSink::default(), 16, 32);
        assert!(buffer.fits(32));
        assert!(!buffer.fits(33));

        buffer.write(&[0xAA; 30]);
        assert!(buffer.fits(2));
        assert!(!buffer.fits(3));
    }
}
