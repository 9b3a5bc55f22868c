//! Dense, row-major `f64` tensors.
//!
//! A `Tensor` owns its shape and a contiguous buffer whose length is always the
//! product of the shape. Operations never broadcast implicitly; the single
//! exception is [`Tensor::add_row_vector`], which adds a bias vector to every row
//! of a matrix.

use crate::matmul::{self, MatView};
use crate::{Error, Result, Scalar};

#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<Scalar>,
}

impl Tensor {
    /// Build a tensor from a flat buffer and a shape.
    ///
    /// Fails if the shape is empty, has a zero dimension, or does not match the
    /// buffer length.
    pub fn new(data: Vec<Scalar>, shape: Vec<usize>) -> Result<Self> {
        if shape.is_empty() || shape.contains(&0) {
            return Err(Error::Shape(format!(
                "shape must be non-empty with positive dims, got {shape:?}"
            )));
        }
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            return Err(Error::Shape(format!(
                "shape {shape:?} holds {numel} values but buffer has {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    /// A zero-filled tensor. Same shape rules as [`Tensor::new`].
    pub fn zeros(shape: &[usize]) -> Result<Self> {
        let numel = shape.iter().product();
        Self::new(vec![0.0; numel], shape.to_vec())
    }

    /// A zero-filled tensor with the shape of `self`.
    pub fn zeros_like(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            data: vec![0.0; self.data.len()],
        }
    }

    /// A 1-D tensor.
    pub fn vector(data: Vec<Scalar>) -> Result<Self> {
        let len = data.len();
        Self::new(data, vec![len])
    }

    /// A 2-D tensor from equal-length rows.
    pub fn from_rows(rows: &[Vec<Scalar>]) -> Result<Self> {
        let cols = rows.first().map(Vec::len).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(Error::Shape(format!(
                    "row {i} has len {}, expected {cols}",
                    row.len()
                )));
            }
            data.extend_from_slice(row);
        }
        Self::new(data, vec![rows.len(), cols])
    }

    #[inline]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[inline]
    pub fn data(&self) -> &[Scalar] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [Scalar] {
        &mut self.data
    }

    /// Number of scalars.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Always false: tensors have positive dimensions.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// `(rows, cols)` of a 2-D tensor.
    pub fn dims2(&self) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            &[r, c] => Ok((r, c)),
            other => Err(Error::Shape(format!(
                "expected a 2-D tensor, got shape {other:?}"
            ))),
        }
    }

    /// Row `i` of a 2-D tensor.
    ///
    /// Panics if the tensor is not 2-D or `i` is out of range.
    #[inline]
    pub fn row(&self, i: usize) -> &[Scalar] {
        let cols = self.shape[self.shape.len() - 1];
        &self.data[i * cols..(i + 1) * cols]
    }

    /// Same buffer, different shape.
    pub fn reshape(self, shape: Vec<usize>) -> Result<Self> {
        Self::new(self.data, shape)
    }

    /// Copy of rows `start..end` of a 2-D tensor.
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Self> {
        let (rows, cols) = self.dims2()?;
        if start >= end || end > rows {
            return Err(Error::Shape(format!(
                "row range {start}..{end} out of bounds for shape {:?}",
                self.shape
            )));
        }
        Ok(Self {
            shape: vec![end - start, cols],
            data: self.data[start * cols..end * cols].to_vec(),
        })
    }

    pub fn fill(&mut self, value: Scalar) {
        self.data.fill(value);
    }

    pub fn fill_zero(&mut self) {
        self.fill(0.0);
    }

    /// True if every entry is finite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|v| v.is_finite())
    }

    fn check_same_shape(&self, other: &Tensor, op: &str) -> Result<()> {
        if self.shape != other.shape {
            return Err(Error::mismatch(op, &self.shape, &other.shape));
        }
        Ok(())
    }

    fn zip_with(
        &self,
        other: &Tensor,
        op: &str,
        f: impl Fn(Scalar, Scalar) -> Scalar,
    ) -> Result<Self> {
        self.check_same_shape(other, op)?;
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Self {
            shape: self.shape.clone(),
            data,
        })
    }

    /// Element-wise map into a new tensor.
    pub fn map(&self, f: impl Fn(Scalar) -> Scalar) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    pub fn add(&self, other: &Tensor) -> Result<Self> {
        self.zip_with(other, "add", |a, b| a + b)
    }

    pub fn sub(&self, other: &Tensor) -> Result<Self> {
        self.zip_with(other, "sub", |a, b| a - b)
    }

    /// Element-wise (Hadamard) product.
    pub fn mul(&self, other: &Tensor) -> Result<Self> {
        self.zip_with(other, "mul", |a, b| a * b)
    }

    pub fn add_scalar(&self, value: Scalar) -> Self {
        self.map(|v| v + value)
    }

    pub fn scale(&self, alpha: Scalar) -> Self {
        self.map(|v| v * alpha)
    }

    /// In-place scaled accumulate: `self += alpha * other`.
    ///
    /// Shapes must match exactly.
    pub fn axpy(&mut self, alpha: Scalar, other: &Tensor) -> Result<()> {
        self.check_same_shape(other, "axpy")?;
        for (s, &o) in self.data.iter_mut().zip(&other.data) {
            *s = alpha.mul_add(o, *s);
        }
        Ok(())
    }

    /// Transpose of a 2-D tensor.
    pub fn transpose(&self) -> Result<Self> {
        let (rows, cols) = self.dims2()?;
        let mut data = vec![0.0; rows * cols];
        for r in 0..rows {
            for c in 0..cols {
                data[c * rows + r] = self.data[r * cols + c];
            }
        }
        Ok(Self {
            shape: vec![cols, rows],
            data,
        })
    }

    /// Standard matrix product `self · other` of two 2-D tensors.
    pub fn matmul(&self, other: &Tensor) -> Result<Self> {
        let (m, k) = self.dims2()?;
        let (k2, n) = other.dims2()?;
        if k != k2 {
            return Err(Error::mismatch("matmul", &self.shape, &other.shape));
        }
        let lhs = MatView::new(&self.data, m, k);
        let rhs = MatView::new(&other.data, k, n);
        Ok(Self {
            shape: vec![m, n],
            data: matmul::matmul(lhs, rhs),
        })
    }

    /// `self · otherᵀ` without materializing the transpose.
    ///
    /// `self: (m, k)`, `other: (n, k)` → `(m, n)`.
    pub fn matmul_t(&self, other: &Tensor) -> Result<Self> {
        let (m, k) = self.dims2()?;
        let (n, k2) = other.dims2()?;
        if k != k2 {
            return Err(Error::mismatch("matmul_t", &self.shape, &other.shape));
        }
        let lhs = MatView::new(&self.data, m, k);
        let rhs = MatView::new(&other.data, n, k).t();
        Ok(Self {
            shape: vec![m, n],
            data: matmul::matmul(lhs, rhs),
        })
    }

    /// `selfᵀ · other` without materializing the transpose.
    ///
    /// `self: (k, m)`, `other: (k, n)` → `(m, n)`.
    pub fn t_matmul(&self, other: &Tensor) -> Result<Self> {
        let (k, m) = self.dims2()?;
        let (k2, n) = other.dims2()?;
        if k != k2 {
            return Err(Error::mismatch("t_matmul", &self.shape, &other.shape));
        }
        let lhs = MatView::new(&self.data, k, m).t();
        let rhs = MatView::new(&other.data, k, n);
        Ok(Self {
            shape: vec![m, n],
            data: matmul::matmul(lhs, rhs),
        })
    }

    /// Adds a `[cols]` vector to every row of a `[rows, cols]` matrix.
    pub fn add_row_vector(&self, bias: &Tensor) -> Result<Self> {
        let (_, cols) = self.dims2()?;
        if bias.shape != [cols] {
            return Err(Error::mismatch("add_row_vector", &self.shape, &bias.shape));
        }
        let mut out = self.clone();
        for row in out.data.chunks_exact_mut(cols) {
            for (v, &b) in row.iter_mut().zip(&bias.data) {
                *v += b;
            }
        }
        Ok(out)
    }

    /// Column sums of a 2-D tensor, shape `[cols]`.
    pub fn sum_rows(&self) -> Result<Self> {
        let (_, cols) = self.dims2()?;
        let mut out = vec![0.0; cols];
        for row in self.data.chunks_exact(cols) {
            for (acc, &v) in out.iter_mut().zip(row) {
                *acc += v;
            }
        }
        Ok(Self {
            shape: vec![cols],
            data: out,
        })
    }

    /// Index of the largest entry in each row; ties go to the lowest index.
    pub fn argmax_rows(&self) -> Result<Vec<usize>> {
        let (_, cols) = self.dims2()?;
        Ok(self
            .data
            .chunks_exact(cols)
            .map(|row| {
                let mut best = 0;
                for (j, &v) in row.iter().enumerate().skip(1) {
                    if v > row[best] {
                        best = j;
                    }
                }
                best
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(data: &[f64], shape: &[usize]) -> Tensor {
        Tensor::new(data.to_vec(), shape.to_vec()).unwrap()
    }

    #[test]
    fn new_validates_buffer_length() {
        assert!(Tensor::new(vec![1.0, 2.0, 3.0], vec![2, 2]).is_err());
        assert!(Tensor::new(vec![], vec![0]).is_err());
        assert!(Tensor::new(vec![1.0; 6], vec![2, 3]).is_ok());
    }

    #[test]
    fn zeros_rejects_empty_and_zero_dims() {
        assert!(matches!(Tensor::zeros(&[0, 2]), Err(Error::Shape(_))));
        assert!(matches!(Tensor::zeros(&[]), Err(Error::Shape(_))));
        let z = Tensor::zeros(&[2, 3]).unwrap();
        assert!(!z.is_empty());
        assert_eq!(z.zeros_like(), z);
    }

    #[test]
    fn reshape_flattens_image_samples() {
        let img = t(&[0.0, 0.25, 0.5, 1.0], &[1, 2, 2]);
        let flat = img.reshape(vec![1, 4]).unwrap();
        assert_eq!(flat.dims2().unwrap(), (1, 4));
        assert_eq!(flat.row(0), &[0.0, 0.25, 0.5, 1.0]);
        assert!(flat.reshape(vec![3]).is_err());
    }

    #[test]
    fn matmul_matches_hand_computation() {
        let a = t(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = t(&[2.0, 0.0, 1.0, 2.0], &[2, 2]);
        let c = a.matmul(&b).unwrap();
        assert_eq!(c.data(), &[4.0, 4.0, 10.0, 8.0]);
    }

    #[test]
    fn matmul_rejects_inner_dim_mismatch() {
        let a = t(&[1.0; 6], &[2, 3]);
        let b = t(&[1.0; 8], &[4, 2]);
        let err = a.matmul(&b).unwrap_err();
        assert_eq!(err, Error::Shape("matmul: [2, 3] vs [4, 2]".to_owned()));
    }

    #[test]
    fn transposed_products_agree_with_explicit_transpose() {
        let a = t(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let b = t(
            &[0.5, -1.0, 2.0, 1.5, 0.0, -0.5, 3.0, 1.0, -2.0, 0.25, 0.75, 1.0],
            &[4, 3],
        );

        let direct = a.matmul(&b.transpose().unwrap()).unwrap();
        assert_eq!(a.matmul_t(&b).unwrap(), direct);

        let c = t(&[1.0, -1.0, 2.0, 0.5], &[2, 2]);
        let direct = a.transpose().unwrap().matmul(&c).unwrap();
        assert_eq!(a.t_matmul(&c).unwrap(), direct);
    }

    #[test]
    fn transpose_swaps_axes() {
        let a = t(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let at = a.transpose().unwrap();
        assert_eq!(at.shape(), &[3, 2]);
        assert_eq!(at.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn elementwise_ops_require_matching_shapes() {
        let a = t(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = t(&[1.0, 2.0, 3.0, 4.0], &[4, 1]);
        assert!(a.add(&b).is_err());
        assert!(a.sub(&b).is_err());
        assert!(a.mul(&b).is_err());

        let c = t(&[2.0, 3.0, 4.0, 5.0], &[2, 2]);
        assert_eq!(a.add(&c).unwrap().data(), &[3.0, 5.0, 7.0, 9.0]);
        assert_eq!(a.mul(&c).unwrap().data(), &[2.0, 6.0, 12.0, 20.0]);
        assert_eq!(c.sub(&a).unwrap().data(), &[1.0; 4]);
        assert_eq!(a.scale(2.0).data(), &[2.0, 4.0, 6.0, 8.0]);
        assert_eq!(a.add_scalar(1.0).data(), &[2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn axpy_accumulates_in_place() {
        let mut a = t(&[1.0, 1.0], &[2]);
        let b = t(&[2.0, -4.0], &[2]);
        a.axpy(0.5, &b).unwrap();
        assert_eq!(a.data(), &[2.0, -1.0]);

        let wrong = t(&[1.0, 1.0], &[1, 2]);
        assert!(a.axpy(1.0, &wrong).is_err());
    }

    #[test]
    fn bias_broadcast_and_column_sum() {
        let a = t(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let bias = t(&[10.0, 20.0, 30.0], &[3]);
        let out = a.add_row_vector(&bias).unwrap();
        assert_eq!(out.data(), &[11.0, 22.0, 33.0, 14.0, 25.0, 36.0]);
        assert_eq!(a.sum_rows().unwrap().data(), &[5.0, 7.0, 9.0]);

        let bad = t(&[1.0, 2.0], &[2]);
        assert!(a.add_row_vector(&bad).is_err());
    }

    #[test]
    fn slicing_and_argmax() {
        let a = t(&[0.1, 0.9, 0.5, 0.5, 3.0, -1.0], &[3, 2]);
        let s = a.slice_rows(1, 3).unwrap();
        assert_eq!(s.shape(), &[2, 2]);
        assert_eq!(s.row(1), &[3.0, -1.0]);
        assert!(a.slice_rows(2, 4).is_err());
        // Ties resolve to the lowest index.
        assert_eq!(a.argmax_rows().unwrap(), vec![1, 0, 0]);
    }

    #[test]
    fn zero_fill_and_finiteness() {
        let mut a = t(&[1.0, f64::NAN], &[2]);
        assert!(!a.is_finite());
        a.fill_zero();
        assert!(a.is_finite());
        assert!(a.data().iter().all(|&v| v == 0.0));
    }
}
