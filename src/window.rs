//! Splits a frame sequence into contiguous, non-overlapping windows. Windows are index ranges
//! into the trajectory; no frame data is copied.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{DccmError, Result};

/// What to do with the `F mod W` frames left over after the last full window.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrailingWindow {
    /// The last full window absorbs the remainder, so it has `W + R` frames.
    #[default]
    Extend,
    /// The remainder becomes its own short window of `R` frames.
    Separate,
    /// Remainder frames are dropped.
    Discard,
}

/// A lazy, restartable sequence of frame ranges. Clone it to iterate again.
#[derive(Clone, Debug)]
pub struct Windows {
    frame_count: usize,
    size: usize,
    trailing: TrailingWindow,
    /// Number of full windows.
    full: usize,
    next: usize,
    total: usize,
}

impl Windows {
    /// `size` must be at least 1. If `frame_count < size`, the sequence is empty under every policy.
    pub fn new(frame_count: usize, size: usize, trailing: TrailingWindow) -> Result<Self> {
        if size == 0 {
            return Err(DccmError::InvalidWindowSize);
        }

        let full = frame_count / size;
        let rest = frame_count % size;

        let total = match trailing {
            TrailingWindow::Separate if full > 0 && rest > 0 => full + 1,
            _ => full,
        };

        Ok(Self {
            frame_count,
            size,
            trailing,
            full,
            next: 0,
            total,
        })
    }

    pub fn window_size(&self) -> usize {
        self.size
    }

    /// The range for window `i`, regardless of iteration state.
    pub fn range(&self, i: usize) -> Option<Range<usize>> {
        if i >= self.total {
            return None;
        }

        let start = i * self.size;
        if i == self.full {
            // Only reachable under `Separate`.
            return Some(start..self.frame_count);
        }

        let end = if i + 1 == self.full && self.trailing == TrailingWindow::Extend {
            self.frame_count
        } else {
            start + self.size
        };

        Some(start..end)
    }
}

impl Iterator for Windows {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        let r = self.range(self.next)?;
        self.next += 1;
        Some(r)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.total - self.next;
        (n, Some(n))
    }
}

impl ExactSizeIterator for Windows {}
