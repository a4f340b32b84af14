//! Frame-level shuffling cache.
//!
//! Utterances are appended frame by frame until the cache is full, the
//! buffered frames are optionally permuted, then drained in bunches of a fixed
//! size. Capacity is a multiple of the bunch size, so every bunch is full
//! except the last one of a stream.

use crate::{matrix::ensure_shape, CodeatError, Result};
use ndarray::{s, Array2, ArrayView1, ArrayView2, Axis};
use rand::{seq::SliceRandom, Rng};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Filling,
    Full,
    Draining,
}

pub struct ShuffleCache {
    capacity: usize,
    bunch_size: usize,
    dim: Option<usize>,
    features: Array2<f32>,
    labels: Vec<usize>,
    filled: usize,
    drain_pos: usize,
    // frames of the last utterance that did not fit; row-major
    held_features: Vec<f32>,
    held_labels: Vec<usize>,
    state: CacheState,
    randomized: bool,
}

impl ShuffleCache {
    pub fn new(capacity: usize, bunch_size: usize) -> Result<Self> {
        if bunch_size == 0 {
            return Err(CodeatError::InvalidConfig(
                "bunch size must be positive".to_string(),
            ));
        }
        let capacity = (capacity / bunch_size) * bunch_size;
        if capacity == 0 {
            return Err(CodeatError::InvalidConfig(format!(
                "cache size must hold at least one bunch of {} frames",
                bunch_size
            )));
        }
        Ok(Self {
            capacity,
            bunch_size,
            dim: None,
            features: Array2::zeros((0, 0)),
            labels: Vec::with_capacity(capacity),
            filled: 0,
            drain_pos: 0,
            held_features: Vec::new(),
            held_labels: Vec::new(),
            state: CacheState::Empty,
            randomized: false,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bunch_size(&self) -> usize {
        self.bunch_size
    }

    pub fn state(&self) -> CacheState {
        self.state
    }

    /// Number of buffered entries not yet taken.
    pub fn len(&self) -> usize {
        self.filled - self.drain_pos
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity
    }

    pub fn is_randomized(&self) -> bool {
        self.randomized
    }

    /// Frames waiting for the next fill because they did not fit.
    pub fn held_over(&self) -> usize {
        self.held_labels.len()
    }

    pub fn has_held_over(&self) -> bool {
        !self.held_labels.is_empty()
    }

    pub fn add_utterance(&mut self, features: ArrayView2<f32>, labels: &[usize]) -> Result<()> {
        if self.is_full() {
            return Err(CodeatError::CacheFull {
                capacity: self.capacity,
            });
        }
        let (frames, dim) = features.dim();
        if labels.len() != frames {
            return Err(CodeatError::LabelMismatch {
                frames,
                labels: labels.len(),
            });
        }
        if frames == 0 {
            return Ok(());
        }
        self.set_dim(dim)?;
        self.compact();

        let fit = frames.min(self.capacity - self.filled);
        self.features
            .slice_mut(s![self.filled..self.filled + fit, ..])
            .assign(&features.slice(s![..fit, ..]));
        self.labels.extend_from_slice(&labels[..fit]);
        self.filled += fit;
        if fit < frames {
            self.held_features
                .extend(features.slice(s![fit.., ..]).iter().copied());
            self.held_labels.extend_from_slice(&labels[fit..]);
        }
        self.randomized = false;
        self.update_state();
        Ok(())
    }

    /// Moves held-over frames back in, as many as fit.
    pub fn refill(&mut self) {
        if self.held_labels.is_empty() {
            return;
        }
        let Some(dim) = self.dim else {
            return;
        };
        self.compact();
        let rows = self.held_labels.len().min(self.capacity - self.filled);
        if rows == 0 {
            return;
        }
        let moved: Vec<f32> = self.held_features.drain(..rows * dim).collect();
        for (r, frame) in moved.chunks_exact(dim).enumerate() {
            self.features
                .row_mut(self.filled + r)
                .assign(&ArrayView1::from(frame));
        }
        self.labels.extend(self.held_labels.drain(..rows));
        self.filled += rows;
        self.randomized = false;
        self.update_state();
    }

    /// Permutes the entries not yet taken. The multiset of (frame, label)
    /// pairs is unchanged.
    pub fn randomize<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        if self.len() < 2 {
            self.randomized = true;
            return;
        }
        let mut order: Vec<usize> = (self.drain_pos..self.filled).collect();
        order.shuffle(rng);
        let shuffled = self.features.select(Axis(0), &order);
        self.features
            .slice_mut(s![self.drain_pos..self.filled, ..])
            .assign(&shuffled);
        let shuffled_labels: Vec<usize> = order.iter().map(|&i| self.labels[i]).collect();
        self.labels[self.drain_pos..self.filled].copy_from_slice(&shuffled_labels);
        self.randomized = true;
    }

    /// Moves the next bunch into the given buffers, overwriting them, and
    /// returns its length: `bunch_size` or whatever is left if less.
    pub fn take_bunch(
        &mut self,
        features_out: &mut Array2<f32>,
        labels_out: &mut Vec<usize>,
    ) -> Result<usize> {
        if self.is_empty() {
            return Err(CodeatError::CacheEmpty);
        }
        let n = self.bunch_size.min(self.len());
        let end = self.drain_pos + n;
        ensure_shape(features_out, n, self.features.ncols());
        features_out.assign(&self.features.slice(s![self.drain_pos..end, ..]));
        labels_out.clear();
        labels_out.extend_from_slice(&self.labels[self.drain_pos..end]);
        self.drain_pos = end;
        self.state = CacheState::Draining;
        if self.drain_pos == self.filled {
            self.filled = 0;
            self.drain_pos = 0;
            self.labels.clear();
            self.randomized = false;
            self.state = CacheState::Empty;
        }
        Ok(n)
    }

    /// Drops every buffered and held-over entry.
    pub fn clear(&mut self) {
        self.filled = 0;
        self.drain_pos = 0;
        self.labels.clear();
        self.held_features.clear();
        self.held_labels.clear();
        self.randomized = false;
        self.state = CacheState::Empty;
    }

    fn set_dim(&mut self, dim: usize) -> Result<()> {
        if dim == 0 {
            return Err(CodeatError::FeatureDimMismatch {
                expected: self.dim.unwrap_or(1),
                actual: 0,
            });
        }
        match self.dim {
            Some(expected) if expected != dim && (!self.is_empty() || self.has_held_over()) => {
                Err(CodeatError::FeatureDimMismatch {
                    expected,
                    actual: dim,
                })
            }
            Some(expected) if expected == dim => Ok(()),
            _ => {
                self.dim = Some(dim);
                self.features = Array2::zeros((self.capacity, dim));
                Ok(())
            }
        }
    }

    // shifts untaken entries to the front so that new frames append at `filled`
    fn compact(&mut self) {
        if self.drain_pos == 0 {
            return;
        }
        let remaining = self.len();
        let kept = self
            .features
            .slice(s![self.drain_pos..self.filled, ..])
            .to_owned();
        self.features.slice_mut(s![..remaining, ..]).assign(&kept);
        self.labels.drain(..self.drain_pos);
        self.filled = remaining;
        self.drain_pos = 0;
    }

    fn update_state(&mut self) {
        self.state = if self.is_full() {
            CacheState::Full
        } else if self.is_empty() {
            CacheState::Empty
        } else {
            CacheState::Filling
        };
    }
}
