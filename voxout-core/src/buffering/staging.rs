//! Producer-side staging buffer.

/// A fixed-capacity block of mono i16 samples filled one sample at a time.
///
/// The buffer is handed off exactly when it becomes full, so the fill count
/// never exceeds the capacity.
#[derive(Debug, Clone)]
pub struct StagingBuffer {
    samples: Box<[i16]>,
    filled: usize,
}

impl StagingBuffer {
    /// Allocate a zeroed buffer of `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0i16; capacity].into_boxed_slice(),
            filled: 0,
        }
    }

    /// Append one sample. Returns `true` when the buffer just became full.
    ///
    /// Callers must [`take`](Self::take) a full buffer before pushing again.
    #[inline]
    pub fn push(&mut self, sample: i16) -> bool {
        debug_assert!(self.filled < self.samples.len());
        self.samples[self.filled] = sample;
        self.filled += 1;
        self.filled == self.samples.len()
    }

    /// The filled prefix.
    pub fn filled(&self) -> &[i16] {
        &self.samples[..self.filled]
    }

    /// Return the filled prefix and reset the fill count.
    ///
    /// The returned slice stays valid until the next `push`.
    pub fn take(&mut self) -> &[i16] {
        let n = std::mem::take(&mut self.filled);
        &self.samples[..n]
    }

    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }
}
