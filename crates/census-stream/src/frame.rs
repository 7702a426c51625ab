//! Inbound frame reassembly.
//!
//! Fragments received from the socket are copied into fixed-size blocks
//! borrowed from a [`SegmentPool`]. When the final fragment of a message
//! arrives, the chain of blocks is exposed as a single [`MessageSequence`]
//! without concatenating it. Blocks go back to the pool when their
//! [`Segment`] is dropped, so every acquired block is returned exactly once.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

/// Default size of a pooled block in bytes.
pub const DEFAULT_SEGMENT_SIZE: usize = 4096;

/// Default number of idle blocks the pool keeps for reuse.
pub const DEFAULT_MAX_IDLE_SEGMENTS: usize = 16;

/// Pool of fixed-size byte blocks backing inbound segments.
#[derive(Debug, Clone)]
pub struct SegmentPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    block_size: usize,
    max_idle: usize,
    idle: Mutex<Vec<BytesMut>>,
    acquired: AtomicU64,
    released: AtomicU64,
}

/// Snapshot of pool usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Blocks handed out since the pool was created.
    pub acquired: u64,
    /// Blocks returned since the pool was created.
    pub released: u64,
}

impl PoolStats {
    /// Blocks currently held by segments.
    pub fn outstanding(&self) -> u64 {
        self.acquired - self.released
    }
}

impl SegmentPool {
    /// Create a pool of `block_size` blocks keeping at most `max_idle` idle.
    pub fn new(block_size: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                block_size: block_size.max(1),
                max_idle,
                idle: Mutex::new(Vec::with_capacity(max_idle)),
                acquired: AtomicU64::new(0),
                released: AtomicU64::new(0),
            }),
        }
    }

    /// Size of each block.
    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    /// Take a block from the pool, allocating if none is idle.
    pub fn acquire(&self, running_index: usize) -> Segment {
        let block = self
            .inner
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.inner.block_size));
        self.inner.acquired.fetch_add(1, Ordering::Relaxed);
        Segment {
            block,
            running_index,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Current usage counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            acquired: self.inner.acquired.load(Ordering::Relaxed),
            released: self.inner.released.load(Ordering::Relaxed),
        }
    }

    /// Number of idle blocks ready for reuse.
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }
}

impl Default for SegmentPool {
    fn default() -> Self {
        Self::new(DEFAULT_SEGMENT_SIZE, DEFAULT_MAX_IDLE_SEGMENTS)
    }
}

impl PoolInner {
    fn release(&self, mut block: BytesMut) {
        self.released.fetch_add(1, Ordering::Relaxed);
        block.clear();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(block);
        }
    }
}

/// One pooled block in a message chain.
///
/// `running_index` is the offset of this segment's first byte within the
/// whole message.
#[derive(Debug)]
pub struct Segment {
    block: BytesMut,
    running_index: usize,
    pool: Arc<PoolInner>,
}

impl Segment {
    /// Bytes held by this segment.
    pub fn as_slice(&self) -> &[u8] {
        &self.block
    }

    /// Number of bytes held.
    pub fn len(&self) -> usize {
        self.block.len()
    }

    /// Whether the segment holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.block.is_empty()
    }

    /// Offset of this segment within the message.
    pub fn running_index(&self) -> usize {
        self.running_index
    }

    fn remaining(&self) -> usize {
        self.pool.block_size.saturating_sub(self.block.len())
    }

    fn fill(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.remaining());
        self.block.extend_from_slice(&data[..n]);
        n
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.block));
    }
}

/// Accumulates fragments of one inbound message at a time.
#[derive(Debug)]
pub struct FrameAssembler {
    pool: SegmentPool,
    segments: Vec<Segment>,
    len: usize,
    complete: bool,
}

impl FrameAssembler {
    /// Create an assembler drawing blocks from `pool`.
    pub fn new(pool: SegmentPool) -> Self {
        Self {
            pool,
            segments: Vec::new(),
            len: 0,
            complete: false,
        }
    }

    /// The pool backing this assembler.
    pub fn pool(&self) -> &SegmentPool {
        &self.pool
    }

    /// Bytes accumulated for the message in progress.
    pub fn buffered_len(&self) -> usize {
        self.len
    }

    /// Whether a message is partially assembled.
    pub fn has_partial(&self) -> bool {
        !self.complete && self.len > 0
    }

    /// Append a fragment; on the final fragment return the whole message.
    ///
    /// A final fragment with nothing accumulated yields `None`. A completed
    /// message that was not released is released before new data is taken.
    pub fn push(&mut self, fragment: &[u8], fin: bool) -> Option<MessageSequence<'_>> {
        if self.complete {
            self.release();
        }

        let mut rest = fragment;
        while !rest.is_empty() {
            let needs_segment = self.segments.last().map_or(true, |s| s.remaining() == 0);
            if needs_segment {
                self.segments.push(self.pool.acquire(self.len));
            }
            let Some(segment) = self.segments.last_mut() else {
                break;
            };
            let written = segment.fill(rest);
            self.len += written;
            rest = &rest[written..];
        }

        if !fin {
            return None;
        }
        if self.len == 0 {
            self.release();
            return None;
        }
        self.complete = true;
        Some(MessageSequence {
            segments: &self.segments,
            len: self.len,
        })
    }

    /// Return every segment of the current chain to the pool.
    pub fn release(&mut self) {
        self.segments.clear();
        self.len = 0;
        self.complete = false;
    }

    /// Discard a partially received message. Returns the bytes dropped.
    pub fn abandon(&mut self) -> usize {
        let dropped = self.len;
        self.release();
        dropped
    }
}

impl Default for FrameAssembler {
    fn default() -> Self {
        Self::new(SegmentPool::default())
    }
}

/// A complete inbound message spread across pooled segments.
#[derive(Debug, Clone, Copy)]
pub struct MessageSequence<'a> {
    segments: &'a [Segment],
    len: usize,
}

impl<'a> MessageSequence<'a> {
    /// Total length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the message is empty. Never true for sequences produced by
    /// [`FrameAssembler::push`].
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The segments in order.
    pub fn segments(&self) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.segments.iter().map(Segment::as_slice)
    }

    /// Number of segments in the chain.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Reader over the whole message, crossing segment boundaries.
    pub fn reader(&self) -> SequenceReader<'a> {
        SequenceReader {
            segments: self.segments,
            index: 0,
            offset: 0,
        }
    }

    /// Content hash of the message (first 8 bytes of its SHA-256).
    pub fn content_hash(&self) -> u64 {
        let mut hasher = Sha256::new();
        for segment in self.segments() {
            hasher.update(segment);
        }
        let digest = hasher.finalize();
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix)
    }

    /// Copy the message out as text, replacing invalid UTF-8.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.to_vec()).into_owned()
    }

    /// Copy the message into one contiguous vector.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len);
        for segment in self.segments() {
            out.extend_from_slice(segment);
        }
        out
    }
}

/// [`io::Read`] over a [`MessageSequence`].
#[derive(Debug)]
pub struct SequenceReader<'a> {
    segments: &'a [Segment],
    index: usize,
    offset: usize,
}

impl io::Read for SequenceReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while let Some(segment) = self.segments.get(self.index) {
            let bytes = &segment.as_slice()[self.offset..];
            if bytes.is_empty() {
                self.index += 1;
                self.offset = 0;
                continue;
            }
            let n = bytes.len().min(buf.len());
            buf[..n].copy_from_slice(&bytes[..n]);
            self.offset += n;
            return Ok(n);
        }
        Ok(0)
    }
}
