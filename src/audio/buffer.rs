//! Bounded per-session audio buffer.

/// Append-only sample store with a consumption offset and a hard capacity
/// bound. When an append would exceed the cap, the oldest samples are
/// evicted first and all indices shift down by the evicted count.
///
/// Indices handed out by this buffer (offsets, spans) are positions into the
/// retained history; callers holding indices must rebase them by the count
/// returned from [`append`](Self::append) and passed to
/// [`reset`](Self::reset).
#[derive(Debug)]
pub struct AudioRingBuffer {
    data: Vec<f32>,
    consume_offset: usize,
    max_samples: usize,
}

impl AudioRingBuffer {
    pub fn new(max_samples: usize) -> Self {
        Self {
            data: Vec::new(),
            consume_offset: 0,
            max_samples: max_samples.max(1),
        }
    }

    /// Append new samples, evicting the oldest first if the cap would be
    /// exceeded. Returns the number of evicted samples; the consumption
    /// offset is adjusted downward by the same amount (never below zero).
    pub fn append(&mut self, samples: &[f32]) -> usize {
        self.data.extend_from_slice(samples);
        let evicted = self.data.len().saturating_sub(self.max_samples);
        if evicted > 0 {
            self.data.drain(..evicted);
            self.consume_offset = self.consume_offset.saturating_sub(evicted);
        }
        evicted
    }

    /// Next `size` unconsumed samples, advancing the offset; `None` when
    /// fewer than `size` remain (the caller holds until more arrive).
    pub fn consume_window(&mut self, size: usize) -> Option<Vec<f32>> {
        if size == 0 || self.data.len() - self.consume_offset < size {
            return None;
        }
        let window = self.data[self.consume_offset..self.consume_offset + size].to_vec();
        self.consume_offset += size;
        Some(window)
    }

    /// Truncate history strictly before `from` (a segment boundary) and
    /// rebase the consumption offset accordingly.
    pub fn reset(&mut self, from: usize) {
        let cut = from.min(self.data.len());
        self.data.drain(..cut);
        self.consume_offset = self.consume_offset.saturating_sub(cut);
    }

    /// Copy of the samples in `start..end`, clamped to the retained range.
    pub fn span(&self, start: usize, end: usize) -> Vec<f32> {
        let end = end.min(self.data.len());
        let start = start.min(end);
        self.data[start..end].to_vec()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn consume_offset(&self) -> usize {
        self.consume_offset
    }

    /// Samples appended but not yet consumed as VAD windows.
    pub fn unconsumed(&self) -> usize {
        self.data.len() - self.consume_offset
    }
}
