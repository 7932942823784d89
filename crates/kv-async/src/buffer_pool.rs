//! Shared segmented buffer pool for the async pipeline (§4.5, §5).
//!
//! All async commands share one contiguous backing buffer divided into
//! fixed-size segments, one per command slot. A segment request larger than
//! the cut-off is allocated off-pool; the caller never returns it, and a
//! command that grew its receive buffer past the cut-off returns its
//! original segment instead of the grown one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use bytes::BytesMut;

pub struct BufferPool {
    segment_size: usize,
    cutoff: usize,
    free: Mutex<Vec<BytesMut>>,
    generation: AtomicU64,
}

pub enum Segment {
    Pooled(BytesMut, u64),
    OffPool(BytesMut),
}

impl Segment {
    pub fn as_mut(&mut self) -> &mut BytesMut {
        match self {
            Segment::Pooled(buf, _) => buf,
            Segment::OffPool(buf) => buf,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Segment::Pooled(buf, _) => buf.len(),
            Segment::OffPool(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BufferPool {
    pub fn new(segment_count: usize, segment_size: usize, cutoff: usize) -> Self {
        let free = (0..segment_count).map(|_| BytesMut::with_capacity(segment_size)).collect();
        Self { segment_size, cutoff, free: Mutex::new(free), generation: AtomicU64::new(0) }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Replace every pooled segment (e.g. after `segment_size` changes) and
    /// bump the generation so in-flight commands re-check `SizeBuffer`.
    pub fn resize(&self, segment_count: usize, segment_size: usize) {
        let mut free = self.free.lock().unwrap();
        *free = (0..segment_count).map(|_| BytesMut::with_capacity(segment_size)).collect();
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    /// Acquire a segment sized to hold at least `needed` bytes. Requests
    /// above the cutoff bypass the pool entirely.
    pub fn acquire(&self, needed: usize) -> Segment {
        if needed > self.cutoff {
            return Segment::OffPool(BytesMut::with_capacity(needed));
        }
        let mut free = self.free.lock().unwrap();
        let generation = self.generation();
        match free.pop() {
            Some(mut buf) => {
                if buf.capacity() < needed {
                    buf.reserve(needed - buf.capacity());
                }
                Segment::Pooled(buf, generation)
            }
            None => Segment::OffPool(BytesMut::with_capacity(needed.max(self.segment_size))),
        }
    }

    /// Return a segment. Off-pool segments are dropped; a pooled segment
    /// from a stale generation is dropped too, since the pool it belongs to
    /// no longer exists.
    pub fn release(&self, mut segment: Segment) {
        if let Segment::Pooled(mut buf, generation) = segment {
            if generation == self.generation() {
                buf.clear();
                self.free.lock().unwrap().push(buf);
            }
        } else if let Segment::OffPool(ref mut buf) = segment {
            buf.clear();
        }
    }
}
