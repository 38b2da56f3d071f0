//! Small GEMM wrapper behind `Matrix::multiply` and the transposed products used in backprop.
//!
//! Operands are strided views, so `Aᵗ·B` and `A·Bᵗ` never materialize a transpose.
//! - default: a simple, safe triple-loop implementation
//! - optional: a faster backend via the `matrixmultiply` feature

/// Read-only strided view over a row-major buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct View<'a> {
    pub data: &'a [f32],
    pub rows: usize,
    pub cols: usize,
    pub row_stride: usize,
    pub col_stride: usize,
}

impl<'a> View<'a> {
    #[inline]
    pub(crate) fn row_major(data: &'a [f32], rows: usize, cols: usize) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Self {
            data,
            rows,
            cols,
            row_stride: cols,
            col_stride: 1,
        }
    }

    /// Same buffer, rows and columns swapped.
    #[inline]
    pub(crate) fn t(self) -> Self {
        Self {
            data: self.data,
            rows: self.cols,
            cols: self.rows,
            row_stride: self.col_stride,
            col_stride: self.row_stride,
        }
    }

    #[cfg_attr(feature = "matrixmultiply", allow(dead_code))]
    #[inline]
    fn at(&self, r: usize, c: usize) -> f32 {
        self.data[r * self.row_stride + c * self.col_stride]
    }
}

/// Overwrites `out` (row-major, `a.rows x b.cols`) with `a · b`.
///
/// Callers validate `a.cols == b.rows` and the output length.
#[inline]
pub(crate) fn gemm(a: View<'_>, b: View<'_>, out: &mut [f32]) {
    debug_assert_eq!(a.cols, b.rows);
    debug_assert_eq!(out.len(), a.rows * b.cols);

    let (m, k, n) = (a.rows, a.cols, b.cols);
    if m == 0 || n == 0 {
        return;
    }

    #[cfg(feature = "matrixmultiply")]
    {
        // matrixmultiply supports arbitrary strides.
        unsafe {
            matrixmultiply::sgemm(
                m,
                k,
                n,
                1.0,
                a.data.as_ptr(),
                a.row_stride as isize,
                a.col_stride as isize,
                b.data.as_ptr(),
                b.row_stride as isize,
                b.col_stride as isize,
                0.0,
                out.as_mut_ptr(),
                n as isize,
                1,
            );
        }
    }

    #[cfg(not(feature = "matrixmultiply"))]
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0_f32;
            for p in 0..k {
                acc = a.at(i, p).mul_add(b.at(p, j), acc);
            }
            out[i * n + j] = acc;
        }
    }
}
