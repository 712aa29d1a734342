//! Upper-triangular compaction of symmetric matrices. Row `i` comes before row `i + 1`; within
//! a row, columns `j >= i` ascend. An `n × n` matrix compacts to `n(n+1)/2` values.

use crate::correlation::CorrMatrix;

/// Number of stored values for an `n × n` symmetric matrix.
pub const fn triu_len(n: usize) -> usize {
    n * (n + 1) / 2
}

/// Position of `(i, j)` in the compacted sequence. Order of `i` and `j` doesn't matter.
pub fn triu_index(n: usize, i: usize, j: usize) -> usize {
    let (r, c) = if i <= j { (i, j) } else { (j, i) };
    // Rows before `r` hold n + (n-1) + ... + (n-r+1) values.
    r * n - r * (r.saturating_sub(1)) / 2 + (c - r)
}

#[cfg_attr(feature = "encode", derive(bincode::Encode, bincode::Decode))]
#[derive(Clone, Debug, PartialEq)]
pub struct CompactMatrix {
    pub n: usize,
    pub values: Vec<f32>,
}

impl CompactMatrix {
    pub fn from_values(n: usize, values: Vec<f32>) -> Option<Self> {
        (values.len() == triu_len(n)).then_some(Self { n, values })
    }

    pub fn get(&self, i: usize, j: usize) -> f32 {
        self.values[triu_index(self.n, i, j)]
    }

    /// Rebuilds the full matrix; the lower triangle is the transpose of the upper.
    pub fn expand(&self) -> CorrMatrix {
        let mut out = CorrMatrix::zeros(self.n);
        let mut vals = self.values.iter();

        for i in 0..self.n {
            for j in i..self.n {
                // `values` has exactly triu_len(n) entries, checked at construction.
                let v = vals.next().copied().unwrap_or_default();
                out.set(i, j, v);
                out.set(j, i, v);
            }
        }
        out
    }
}

impl From<&CorrMatrix> for CompactMatrix {
    fn from(m: &CorrMatrix) -> Self {
        let mut values = Vec::with_capacity(triu_len(m.n));
        for i in 0..m.n {
            values.extend_from_slice(&m.row(i)[i..]);
        }
        Self { n: m.n, values }
    }
}
