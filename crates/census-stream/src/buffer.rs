//! Reusable outbound serialization buffer.

use std::io;

use bytes::{BufMut, BytesMut};

/// Growable byte buffer that outbound commands are serialized into.
///
/// The buffer is reused across sends. After an unusually large command the
/// backing allocation can be dropped with [`reset_if_oversized`](Self::reset_if_oversized)
/// so one big send does not pin memory for the lifetime of the client.
#[derive(Debug)]
pub struct ChunkBuffer {
    inner: BytesMut,
    default_capacity: usize,
}

impl ChunkBuffer {
    /// Create a buffer with the given starting capacity.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            inner: BytesMut::with_capacity(default_capacity),
            default_capacity,
        }
    }

    /// Writer appending to the buffer, for use with `serde_json::to_writer`.
    pub fn writer(&mut self) -> impl io::Write + '_ {
        (&mut self.inner).writer()
    }

    /// Bytes written so far.
    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }

    /// Number of bytes written.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Current capacity of the backing allocation.
    pub fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    /// Split the contents into chunks of at most `frame_size` bytes.
    ///
    /// Each item carries a flag marking the final chunk. An empty buffer
    /// yields exactly one empty final chunk.
    pub fn chunks(&self, frame_size: usize) -> Chunks<'_> {
        Chunks {
            remaining: &self.inner,
            frame_size: frame_size.max(1),
            done: false,
        }
    }

    /// Discard the contents, keeping the allocation.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Replace the backing allocation when it has grown past `threshold`.
    ///
    /// Returns true if the buffer was reallocated.
    pub fn reset_if_oversized(&mut self, threshold: usize) -> bool {
        if self.inner.capacity() <= threshold {
            return false;
        }
        self.inner = BytesMut::with_capacity(self.default_capacity);
        true
    }
}

/// Iterator over frame-sized chunks of a [`ChunkBuffer`].
#[derive(Debug)]
pub struct Chunks<'a> {
    remaining: &'a [u8],
    frame_size: usize,
    done: bool,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = (&'a [u8], bool);

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let take = self.remaining.len().min(self.frame_size);
        let (chunk, rest) = self.remaining.split_at(take);
        self.remaining = rest;
        let last = rest.is_empty();
        self.done = last;
        Some((chunk, last))
    }
}
