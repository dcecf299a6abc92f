//! Triplet sparse matrices for the network coupling blocks.
//!
//! The coupling matrices are tiny compared to the unit blocks (one entry per
//! connected component), are rebuilt from scratch on every topology change and
//! are only ever applied, never factorized. Triplet storage keeps assembly
//! trivial; between topology changes the structure is immutable and only
//! values may change.

use fnet_core::{Ad, LinearValue};

/// Sparse matrix in triplet form with entries of type `T`.
#[derive(Debug, Clone)]
pub struct SparseMat<T> {
    rows: Vec<usize>,
    cols: Vec<usize>,
    vals: Vec<T>,
}

impl<T> Default for SparseMat<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SparseMat<T> {
    pub fn new() -> Self {
        Self {
            rows: Vec::new(),
            cols: Vec::new(),
            vals: Vec::new(),
        }
    }

    pub fn with_capacity(nnz: usize) -> Self {
        Self {
            rows: Vec::with_capacity(nnz),
            cols: Vec::with_capacity(nnz),
            vals: Vec::with_capacity(nnz),
        }
    }

    /// Remove all entries, keeping the allocation.
    pub fn clear(&mut self) {
        self.rows.clear();
        self.cols.clear();
        self.vals.clear();
    }

    pub fn add_element(&mut self, row: usize, col: usize, val: T) {
        self.rows.push(row);
        self.cols.push(col);
        self.vals.push(val);
    }

    pub fn nnz(&self) -> usize {
        self.vals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, &T)> {
        self.rows
            .iter()
            .zip(self.cols.iter())
            .zip(self.vals.iter())
            .map(|((&r, &c), v)| (r, c, v))
    }
}

impl<T: LinearValue> SparseMat<T> {
    /// `out[row] += val * x[col]` for every entry.
    pub fn multiply_add(&self, x: &[f64], out: &mut [T]) {
        for (r, c, v) in self.iter() {
            out[r].add_scaled(v, x[c]);
        }
    }

    /// `out[row] -= val * x[col]` for every entry.
    pub fn multiply_sub(&self, x: &[f64], out: &mut [T]) {
        for (r, c, v) in self.iter() {
            out[r].sub_scaled(v, x[c]);
        }
    }

    /// `out[row] += alpha * val * x[col]` for every entry.
    pub fn multiply_add_scaled(&self, x: &[f64], alpha: f64, out: &mut [T]) {
        for (r, c, v) in self.iter() {
            out[r].add_scaled(v, alpha * x[c]);
        }
    }

    /// `out = A * x`. The output is fully overwritten, so sparsity-pattern
    /// gaps can never leak stale scratch values between applications.
    pub fn multiply_vector(&self, x: &[f64], out: &mut [T]) {
        for o in out.iter_mut() {
            o.set_constant(0.0);
        }
        self.multiply_add(x, out);
    }
}

impl SparseMat<f64> {
    /// `out[row] += val * x[col]` into any value kind, touching only the plain
    /// value part. Constant coefficients carry no parameter derivative.
    pub fn multiply_add_values<U: LinearValue>(&self, x: &[f64], out: &mut [U]) {
        for (r, c, v) in self.iter() {
            out[r].add_value(v * x[c]);
        }
    }
}

impl SparseMat<Ad> {
    /// Numeric shadow: same structure, plain values.
    pub fn values(&self) -> SparseMat<f64> {
        SparseMat {
            rows: self.rows.clone(),
            cols: self.cols.clone(),
            vals: self.vals.iter().map(|v| v.value()).collect(),
        }
    }

    /// `out[row] -= (d val / d dir) * x[col]` for every entry.
    pub fn multiply_deriv_sub(&self, x: &[f64], dir: usize, out: &mut [f64]) {
        for (r, c, v) in self.iter() {
            out[r] -= v.deriv(dir) * x[c];
        }
    }
}
