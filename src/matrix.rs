//! Dense row-major matrix.
//!
//! `Matrix` is the value type every other module speaks: layer parameters, batched
//! activations, gradients and dataset batches are all `Matrix` values.
//!
//! Shape rules:
//! - `rows > 0` and `cols > 0`, fixed at construction.
//! - `multiply` requires `a.cols == b.rows`.
//! - `add` accepts identical shapes, or a single row broadcast over every row of `self`.
//! - `subtract` / `hadamard` require identical shapes.
//!
//! Incompatible operands are reported as [`Error::DimensionMismatch`]; invalid
//! construction as [`Error::Shape`].

use std::f32::consts::PI;
use std::ops::Index;

use rand::Rng;

use crate::matmul::{self, View};
use crate::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

/// Weight initialization scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Init {
    /// Gaussian with std `sqrt(2 / fan_in)`. Intended for ReLU layers.
    He,
    /// Gaussian with std `sqrt(2 / (fan_in + fan_out))`. Intended for sigmoid/softmax layers.
    Xavier,
}

impl Init {
    /// Draw a `rows x cols` matrix; `rows` is the fan-in.
    pub fn matrix<R: Rng + ?Sized>(self, rows: usize, cols: usize, rng: &mut R) -> Result<Matrix> {
        match self {
            Init::He => Matrix::he_init(rows, cols, rng),
            Init::Xavier => Matrix::xavier_init(rows, cols, rng),
        }
    }
}

impl Matrix {
    /// Zero-filled `rows x cols` matrix.
    pub fn new(rows: usize, cols: usize) -> Result<Self> {
        check_dims(rows, cols)?;
        Ok(Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        })
    }

    #[inline]
    pub fn zeros(rows: usize, cols: usize) -> Result<Self> {
        Self::new(rows, cols)
    }

    /// Build from a flat row-major buffer of exactly `rows * cols` values.
    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Result<Self> {
        check_dims(rows, cols)?;
        if data.len() != rows * cols {
            return Err(Error::Shape(format!(
                "expected {rows}x{cols} = {} values, got {}",
                rows * cols,
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from nested rows. Every row must have the same, non-zero length.
    pub fn from_rows(rows: &[Vec<f32>]) -> Result<Self> {
        let n_rows = rows.len();
        let n_cols = rows.first().map_or(0, Vec::len);
        check_dims(n_rows, n_cols)?;

        let mut data = Vec::with_capacity(n_rows * n_cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != n_cols {
                return Err(Error::Shape(format!(
                    "row {i} has {} columns, expected {n_cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: n_rows,
            cols: n_cols,
            data,
        })
    }

    /// `1 x n` matrix.
    pub fn row_vector(values: Vec<f32>) -> Result<Self> {
        let cols = values.len();
        Self::from_vec(1, cols, values)
    }

    pub fn identity(n: usize) -> Result<Self> {
        let mut m = Self::new(n, n)?;
        for i in 0..n {
            m.data[i * n + i] = 1.0;
        }
        Ok(m)
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Panics if out of bounds.
    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self[(row, col)]
    }

    /// Panics if out of bounds.
    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        assert!(
            row < self.rows && col < self.cols,
            "index ({row}, {col}) out of bounds for {}x{} matrix",
            self.rows,
            self.cols
        );
        self.data[row * self.cols + col] = value;
    }

    /// Returns the `idx`-th row. Panics if `idx >= rows`.
    #[inline]
    pub fn row(&self, idx: usize) -> &[f32] {
        let start = idx * self.cols;
        &self.data[start..start + self.cols]
    }

    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    #[inline]
    pub(crate) fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn to_rows(&self) -> Vec<Vec<f32>> {
        self.data.chunks(self.cols).map(<[f32]>::to_vec).collect()
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    fn view(&self) -> View<'_> {
        View::row_major(&self.data, self.rows, self.cols)
    }

    /// Matrix product `self · rhs`.
    pub fn multiply(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.cols != rhs.rows {
            return Err(Error::DimensionMismatch(format!(
                "cannot multiply {}x{} by {}x{}: inner dimensions {} != {}",
                self.rows, self.cols, rhs.rows, rhs.cols, self.cols, rhs.rows
            )));
        }
        let mut out = Matrix::new(self.rows, rhs.cols)?;
        matmul::gemm(self.view(), rhs.view(), &mut out.data);
        Ok(out)
    }

    /// `selfᵗ · rhs` without materializing the transpose.
    pub(crate) fn t_multiply(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.rows != rhs.rows {
            return Err(Error::DimensionMismatch(format!(
                "cannot multiply transposed {}x{} by {}x{}",
                self.rows, self.cols, rhs.rows, rhs.cols
            )));
        }
        let mut out = Matrix::new(self.cols, rhs.cols)?;
        matmul::gemm(self.view().t(), rhs.view(), &mut out.data);
        Ok(out)
    }

    /// `self · rhsᵗ` without materializing the transpose.
    pub(crate) fn multiply_t(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.cols != rhs.cols {
            return Err(Error::DimensionMismatch(format!(
                "cannot multiply {}x{} by transposed {}x{}",
                self.rows, self.cols, rhs.rows, rhs.cols
            )));
        }
        let mut out = Matrix::new(self.rows, rhs.rows)?;
        matmul::gemm(self.view(), rhs.view().t(), &mut out.data);
        Ok(out)
    }

    /// Elementwise sum, or broadcast of a `1 x cols` row over every row of `self`.
    pub fn add(&self, rhs: &Matrix) -> Result<Matrix> {
        if self.shape() == rhs.shape() {
            return Ok(self.zip_with(rhs, |a, b| a + b));
        }
        if rhs.rows == 1 && rhs.cols == self.cols {
            return Ok(self.map(|v, _, c| v + rhs.data[c]));
        }
        Err(Error::DimensionMismatch(format!(
            "cannot add {}x{} and {}x{} (broadcast needs a 1x{} row)",
            self.rows, self.cols, rhs.rows, rhs.cols, self.cols
        )))
    }

    pub fn subtract(&self, rhs: &Matrix) -> Result<Matrix> {
        self.same_shape("subtract", rhs)?;
        Ok(self.zip_with(rhs, |a, b| a - b))
    }

    /// Elementwise product.
    pub fn hadamard(&self, rhs: &Matrix) -> Result<Matrix> {
        self.same_shape("hadamard", rhs)?;
        Ok(self.zip_with(rhs, |a, b| a * b))
    }

    pub fn multiply_scalar(&self, k: f32) -> Matrix {
        self.map(|v, _, _| v * k)
    }

    pub fn transpose(&self) -> Matrix {
        let mut data = vec![0.0; self.data.len()];
        for r in 0..self.rows {
            for c in 0..self.cols {
                data[c * self.rows + r] = self.data[r * self.cols + c];
            }
        }
        Matrix {
            rows: self.cols,
            cols: self.rows,
            data,
        }
    }

    /// Elementwise transform; `f` receives `(value, row, col)`.
    pub fn map<F>(&self, mut f: F) -> Matrix
    where
        F: FnMut(f32, usize, usize) -> f32,
    {
        let cols = self.cols;
        let data = self
            .data
            .iter()
            .enumerate()
            .map(|(idx, &v)| f(v, idx / cols, idx % cols))
            .collect();
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }

    /// True iff every element is finite.
    pub fn is_valid(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    /// Column sums as a `1 x cols` row (sum over the batch dimension).
    pub fn sum_rows(&self) -> Matrix {
        let mut data = vec![0.0; self.cols];
        for row in self.data.chunks(self.cols) {
            for (acc, &v) in data.iter_mut().zip(row) {
                *acc += v;
            }
        }
        Matrix {
            rows: 1,
            cols: self.cols,
            data,
        }
    }

    /// Index of the largest value in each row. Ties resolve to the first index.
    pub fn argmax_rows(&self) -> Vec<usize> {
        self.data
            .chunks(self.cols)
            .map(crate::metrics::argmax)
            .collect()
    }

    /// Standard-normal sample via Box-Muller.
    pub fn randn<R: Rng + ?Sized>(rng: &mut R) -> f32 {
        let u = open_unit(rng);
        let v = open_unit(rng);
        (-2.0 * u.ln()).sqrt() * (2.0 * PI * v).cos()
    }

    /// Gaussian with std `sqrt(2 / rows)`; `rows` is the fan-in.
    pub fn he_init<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Result<Matrix> {
        check_dims(rows, cols)?;
        let std = (2.0 / rows as f32).sqrt();
        Ok(Self::gaussian(rows, cols, std, rng))
    }

    /// Gaussian with std `sqrt(2 / (rows + cols))`.
    pub fn xavier_init<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Result<Matrix> {
        check_dims(rows, cols)?;
        let std = (2.0 / (rows + cols) as f32).sqrt();
        Ok(Self::gaussian(rows, cols, std, rng))
    }

    fn gaussian<R: Rng + ?Sized>(rows: usize, cols: usize, std: f32, rng: &mut R) -> Matrix {
        let data = (0..rows * cols).map(|_| Self::randn(rng) * std).collect();
        Matrix { rows, cols, data }
    }

    fn zip_with(&self, rhs: &Matrix, f: impl Fn(f32, f32) -> f32) -> Matrix {
        debug_assert_eq!(self.shape(), rhs.shape());
        let data = self
            .data
            .iter()
            .zip(&rhs.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Matrix {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }

    fn same_shape(&self, op: &str, rhs: &Matrix) -> Result<()> {
        if self.shape() != rhs.shape() {
            return Err(Error::DimensionMismatch(format!(
                "{op} needs identical shapes, got {}x{} and {}x{}",
                self.rows, self.cols, rhs.rows, rhs.cols
            )));
        }
        Ok(())
    }
}

impl Index<(usize, usize)> for Matrix {
    type Output = f32;

    #[inline]
    fn index(&self, (row, col): (usize, usize)) -> &f32 {
        assert!(
            row < self.rows && col < self.cols,
            "index ({row}, {col}) out of bounds for {}x{} matrix",
            self.rows,
            self.cols
        );
        &self.data[row * self.cols + col]
    }
}

#[inline]
fn check_dims(rows: usize, cols: usize) -> Result<()> {
    if rows == 0 || cols == 0 {
        return Err(Error::Shape(format!(
            "dimensions must be positive, got {rows}x{cols}"
        )));
    }
    Ok(())
}

/// Uniform sample in the open interval (0, 1).
#[inline]
fn open_unit<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    loop {
        let u: f32 = rng.gen_range(0.0..1.0);
        if u > 0.0 {
            return u;
        }
    }
}
