//! Matrix products behind [`Tensor::matmul`](crate::Tensor::matmul) and its
//! transposed variants.
//!
//! Operands are [`MatView`]s: a borrowed row-major buffer read either as stored
//! or as its transpose, so `x · Wᵀ` and `gᵀ · x` never copy a matrix. The
//! default kernel is a safe `i-p-j` loop; the `matrixmultiply` feature hands
//! the same strides to `matrixmultiply::dgemm`.

/// A read-only `(rows, cols)` view over a row-major buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct MatView<'a> {
    data: &'a [f64],
    rows: usize,
    cols: usize,
    row_stride: usize,
    col_stride: usize,
}

impl<'a> MatView<'a> {
    /// View `data` as a stored `(rows, cols)` matrix.
    pub(crate) fn new(data: &'a [f64], rows: usize, cols: usize) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        Self {
            data,
            rows,
            cols,
            row_stride: cols,
            col_stride: 1,
        }
    }

    /// The same buffer read as its transpose.
    pub(crate) fn t(self) -> Self {
        Self {
            rows: self.cols,
            cols: self.rows,
            row_stride: self.col_stride,
            col_stride: self.row_stride,
            ..self
        }
    }

    #[inline]
    #[cfg_attr(feature = "matrixmultiply", allow(dead_code))]
    fn at(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.row_stride + j * self.col_stride]
    }
}

/// `a · b` as a fresh row-major `(a.rows, b.cols)` buffer.
///
/// Inner dimensions are checked by the tensor layer before dispatching here.
pub(crate) fn matmul(a: MatView<'_>, b: MatView<'_>) -> Vec<f64> {
    debug_assert_eq!(a.cols, b.rows);
    let (m, k, n) = (a.rows, a.cols, b.cols);
    let mut out = vec![0.0; m * n];
    if m == 0 || k == 0 || n == 0 {
        return out;
    }

    #[cfg(feature = "matrixmultiply")]
    {
        // SAFETY: both views index inside their buffers for every (i, j) in range,
        // and `out` is exactly `m * n` contiguous values.
        unsafe {
            matrixmultiply::dgemm(
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
    for (i, out_row) in out.chunks_exact_mut(n).enumerate() {
        for p in 0..k {
            let aip = a.at(i, p);
            for (j, o) in out_row.iter_mut().enumerate() {
                *o = aip.mul_add(b.at(p, j), *o);
            }
        }
    }

    out
}
