//! Dense matrix addressed by 1-based label numbers.
//!
//! Every relationship matrix in the tracker (overlap, cost, division, fusion)
//! is indexed by object labels, which start at 1. `Matrix` keeps the 0-based
//! `nalgebra` storage private and only exposes 1-based accessors, so label
//! arithmetic never leaks `+1`/`-1` corrections into the tracking stages.
//!
//! `NaN` entries mean "no relationship" and are skipped by every reduction.

use nalgebra::DMatrix;

use crate::{Error, Result};

/// Per-row or per-column extremum with its 1-based position.
///
/// A row or column made only of `NaN` yields a `NaN` value and `None` index.
#[derive(Debug, Clone, PartialEq)]
pub struct Extrema {
    pub values: Vec<f64>,
    pub indices: Vec<Option<usize>>,
}

impl Extrema {
    /// Value and index of entry `k` (1-based), `None` when that line was all `NaN`.
    pub fn get(&self, k: usize) -> Option<(f64, usize)> {
        self.indices[k - 1].map(|idx| (self.values[k - 1], idx))
    }

    /// 1-based position of the extremum in line `k`.
    pub fn index(&self, k: usize) -> Option<usize> {
        self.indices[k - 1]
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Clone, Copy)]
enum Pick {
    Min,
    Max,
}

impl Pick {
    // Strict comparison: ties keep the first occurrence.
    fn better(self, candidate: f64, current: f64) -> bool {
        match self {
            Pick::Min => candidate < current,
            Pick::Max => candidate > current,
        }
    }
}

/// Dense `rows x cols` matrix of `f64` with 1-based addressing.
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    data: DMatrix<f64>,
}

impl Matrix {
    /// Create a matrix filled with zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, 0.0)
    }

    /// Create a matrix filled with `NaN` ("no relationship anywhere").
    pub fn nan(rows: usize, cols: usize) -> Self {
        Self::filled(rows, cols, f64::NAN)
    }

    /// Create a matrix with every entry set to `value`.
    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            data: DMatrix::from_element(rows, cols, value),
        }
    }

    /// Build a matrix from row-major values.
    ///
    /// # Arguments
    /// * `rows` - Number of rows
    /// * `cols` - Number of columns
    /// * `values` - Row-major data, must hold exactly `rows * cols` entries
    pub fn from_row_slice(rows: usize, cols: usize, values: &[f64]) -> Result<Self> {
        if values.len() != rows * cols {
            return Err(Error::ShapeMismatch {
                expected: format!("{} values for a {}x{} matrix", rows * cols, rows, cols),
                got: format!("{} values", values.len()),
            });
        }
        Ok(Self {
            data: DMatrix::from_row_slice(rows, cols, values),
        })
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Largest dimension, the element count of a row or column vector.
    pub fn length(&self) -> usize {
        self.rows().max(self.cols())
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Borrow the underlying 0-based storage.
    pub fn as_dmatrix(&self) -> &DMatrix<f64> {
        &self.data
    }

    #[inline]
    fn offset(&self, i: usize, j: usize) -> (usize, usize) {
        assert!(
            i >= 1 && j >= 1 && i <= self.rows() && j <= self.cols(),
            "matrix index ({}, {}) outside 1..={} x 1..={}",
            i,
            j,
            self.rows(),
            self.cols()
        );
        (i - 1, j - 1)
    }

    /// Entry at row `i`, column `j` (both 1-based).
    #[inline]
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[self.offset(i, j)]
    }

    #[inline]
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        let at = self.offset(i, j);
        self.data[at] = value;
    }

    #[inline]
    pub fn increment(&mut self, i: usize, j: usize) {
        self.add(i, j, 1.0);
    }

    #[inline]
    pub fn add(&mut self, i: usize, j: usize, value: f64) {
        let at = self.offset(i, j);
        self.data[at] += value;
    }

    /// Entry `k` of a row or column vector.
    #[inline]
    pub fn at(&self, k: usize) -> f64 {
        if self.cols() == 1 {
            self.get(k, 1)
        } else {
            self.get(1, k)
        }
    }

    /// Set entry `k` of a row or column vector.
    #[inline]
    pub fn set_at(&mut self, k: usize, value: f64) {
        if self.cols() == 1 {
            self.set(k, 1, value);
        } else {
            self.set(1, k, value);
        }
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    /// Set every entry of row `i` to `value`.
    pub fn fill_row(&mut self, i: usize, value: f64) {
        assert!(i >= 1 && i <= self.rows(), "row {} outside 1..={}", i, self.rows());
        self.data.row_mut(i - 1).fill(value);
    }

    /// Set every entry of column `j` to `value`.
    pub fn fill_col(&mut self, j: usize, value: f64) {
        assert!(j >= 1 && j <= self.cols(), "column {} outside 1..={}", j, self.cols());
        self.data.column_mut(j - 1).fill(value);
    }

    /// Row `i` as a vector (entry `k` is column `k + 1`).
    pub fn row(&self, i: usize) -> Vec<f64> {
        assert!(i >= 1 && i <= self.rows(), "row {} outside 1..={}", i, self.rows());
        self.data.row(i - 1).iter().copied().collect()
    }

    /// Column `j` as a vector (entry `k` is row `k + 1`).
    pub fn col(&self, j: usize) -> Vec<f64> {
        assert!(j >= 1 && j <= self.cols(), "column {} outside 1..={}", j, self.cols());
        self.data.column(j - 1).iter().copied().collect()
    }

    // ===== Reductions =====

    fn reduce<'a, I>(line: I, pick: Pick) -> (f64, Option<usize>)
    where
        I: Iterator<Item = &'a f64>,
    {
        let mut best = f64::NAN;
        let mut best_idx = None;
        for (k, &v) in line.enumerate() {
            if v.is_nan() {
                continue;
            }
            if best_idx.is_none() || pick.better(v, best) {
                best = v;
                best_idx = Some(k + 1);
            }
        }
        (best, best_idx)
    }

    fn row_wise(&self, pick: Pick) -> Extrema {
        let mut values = Vec::with_capacity(self.rows());
        let mut indices = Vec::with_capacity(self.rows());
        for row in self.data.row_iter() {
            let (v, idx) = Self::reduce(row.iter(), pick);
            values.push(v);
            indices.push(idx);
        }
        Extrema { values, indices }
    }

    fn col_wise(&self, pick: Pick) -> Extrema {
        let mut values = Vec::with_capacity(self.cols());
        let mut indices = Vec::with_capacity(self.cols());
        for col in self.data.column_iter() {
            let (v, idx) = Self::reduce(col.iter(), pick);
            values.push(v);
            indices.push(idx);
        }
        Extrema { values, indices }
    }

    /// Minimum of each row, skipping `NaN`.
    pub fn row_min(&self) -> Extrema {
        self.row_wise(Pick::Min)
    }

    /// Maximum of each row, skipping `NaN`.
    pub fn row_max(&self) -> Extrema {
        self.row_wise(Pick::Max)
    }

    /// Minimum of each column, skipping `NaN`.
    pub fn col_min(&self) -> Extrema {
        self.col_wise(Pick::Min)
    }

    /// Maximum of each column, skipping `NaN`.
    pub fn col_max(&self) -> Extrema {
        self.col_wise(Pick::Max)
    }

    /// Row-wise minimum written into caller-provided `rows x 1` buffers.
    ///
    /// Indices are stored as 1-based values, `NaN` where the row had no
    /// finite entry.
    ///
    /// # Errors
    /// `Error::ShapeMismatch` if either buffer is not `rows x 1`.
    pub fn row_min_into(&self, values: &mut Matrix, indices: &mut Matrix) -> Result<()> {
        Self::check_shape(values, self.rows(), 1)?;
        Self::check_shape(indices, self.rows(), 1)?;
        Self::write_extrema(&self.row_min(), values, indices);
        Ok(())
    }

    /// Row-wise maximum written into caller-provided `rows x 1` buffers.
    pub fn row_max_into(&self, values: &mut Matrix, indices: &mut Matrix) -> Result<()> {
        Self::check_shape(values, self.rows(), 1)?;
        Self::check_shape(indices, self.rows(), 1)?;
        Self::write_extrema(&self.row_max(), values, indices);
        Ok(())
    }

    /// Column-wise minimum written into caller-provided `1 x cols` buffers.
    pub fn col_min_into(&self, values: &mut Matrix, indices: &mut Matrix) -> Result<()> {
        Self::check_shape(values, 1, self.cols())?;
        Self::check_shape(indices, 1, self.cols())?;
        Self::write_extrema(&self.col_min(), values, indices);
        Ok(())
    }

    /// Column-wise maximum written into caller-provided `1 x cols` buffers.
    pub fn col_max_into(&self, values: &mut Matrix, indices: &mut Matrix) -> Result<()> {
        Self::check_shape(values, 1, self.cols())?;
        Self::check_shape(indices, 1, self.cols())?;
        Self::write_extrema(&self.col_max(), values, indices);
        Ok(())
    }

    fn check_shape(buffer: &Matrix, rows: usize, cols: usize) -> Result<()> {
        if buffer.rows() != rows || buffer.cols() != cols {
            return Err(Error::ShapeMismatch {
                expected: format!("{}x{}", rows, cols),
                got: format!("{}x{}", buffer.rows(), buffer.cols()),
            });
        }
        Ok(())
    }

    fn write_extrema(extrema: &Extrema, values: &mut Matrix, indices: &mut Matrix) {
        for k in 1..=extrema.len() {
            values.set_at(k, extrema.values[k - 1]);
            indices.set_at(k, extrema.indices[k - 1].map_or(f64::NAN, |idx| idx as f64));
        }
    }

    /// Sum of all entries (`NaN` propagates).
    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Per-row totals as a `rows x 1` column vector.
    pub fn sum_rows(&self) -> Matrix {
        let mut out = Matrix::zeros(self.rows(), 1);
        for (r, row) in self.data.row_iter().enumerate() {
            out.data[(r, 0)] = row.iter().sum();
        }
        out
    }

    /// Per-column totals as a `1 x cols` row vector.
    pub fn sum_cols(&self) -> Matrix {
        let mut out = Matrix::zeros(1, self.cols());
        for (c, col) in self.data.column_iter().enumerate() {
            out.data[(0, c)] = col.iter().sum();
        }
        out
    }

    /// Number of entries different from zero. `NaN` counts as nonzero.
    pub fn nonzero_count(&self) -> usize {
        self.data.iter().filter(|&&v| v != 0.0).count()
    }

    /// Whether at least one entry is finite.
    pub fn any_finite(&self) -> bool {
        self.data.iter().any(|v| v.is_finite())
    }

    /// Distinct values in ascending order, `NaN` (if present) last.
    pub fn unique_sorted_values(&self) -> Vec<f64> {
        let mut values: Vec<f64> = self.data.iter().copied().collect();
        values.sort_by(|a, b| a.total_cmp(b));
        values.dedup_by(|a, b| a == b || (a.is_nan() && b.is_nan()));
        values
    }

    /// Nonzero entries as `(row, col, value)` in column-major order, 1-based.
    pub fn iter_nonzero(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        let rows = self.rows();
        self.data
            .iter()
            .enumerate()
            .filter(|(_, &v)| v != 0.0)
            .map(move |(k, &v)| (k % rows + 1, k / rows + 1, v))
    }
}
