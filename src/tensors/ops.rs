#![allow(clippy::cast_precision_loss)]
//! Elementwise arithmetic, maps and reductions on [`Tensor`].
//!
//! Binary operations require identical shapes and report
//! [`Error::ShapeMismatch`] otherwise. Everything here works on the logical
//! row-major positions of a tensor, so views and owning tensors behave the
//! same.

use super::Tensor;
use crate::error::{Error, Result};

#[allow(clippy::should_implement_trait)]
impl Tensor {
    fn check_same(&self, other: &Self) -> Result<()> {
        if self.same_shape(other) {
            Ok(())
        } else {
            Err(Error::shape(self.shape(), other.shape()))
        }
    }

    /// Adds `other` elementwise, in place.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn add(&mut self, other: &Self) -> Result<()> {
        self.apply_with(other, |a, b| a + b)
    }

    /// Subtracts `other` elementwise, in place.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn sub(&mut self, other: &Self) -> Result<()> {
        self.apply_with(other, |a, b| a - b)
    }

    /// Multiplies by `other` elementwise, in place.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn mult(&mut self, other: &Self) -> Result<()> {
        self.apply_with(other, |a, b| a * b)
    }

    /// Divides by `other` elementwise, in place.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn div(&mut self, other: &Self) -> Result<()> {
        self.apply_with(other, |a, b| a / b)
    }

    /// Adds `value` to every element.
    pub fn add_scalar(&mut self, value: f64) {
        self.apply(|a| a + value);
    }

    /// Multiplies every element by `value`.
    pub fn mul_scalar(&mut self, value: f64) {
        self.apply(|a| a * value);
    }

    /// Divides every element by `value`.
    pub fn div_scalar(&mut self, value: f64) {
        self.apply(|a| a / value);
    }

    /// Returns a new tensor with `f` applied to every element.
    #[must_use]
    pub fn map(&self, f: impl FnMut(f64) -> f64) -> Self {
        let mut out = self.clone();
        out.apply(f);
        out
    }

    /// Applies `f` to every element in place.
    pub fn apply(&mut self, mut f: impl FnMut(f64) -> f64) {
        for p in 0..self.len() {
            let v = self.get_flat(p);
            self.set_flat(p, f(v));
        }
    }

    /// Returns `f(self[i], other[i])` for every position.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn map_with(&self, other: &Self, f: impl FnMut(f64, f64) -> f64) -> Result<Self> {
        let mut out = self.clone();
        out.apply_with(other, f)?;
        Ok(out)
    }

    /// Sets `self[i] = f(self[i], other[i])` for every position.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn apply_with(&mut self, other: &Self, mut f: impl FnMut(f64, f64) -> f64) -> Result<()> {
        self.check_same(other)?;
        for p in 0..self.len() {
            let v = f(self.get_flat(p), other.get_flat(p));
            self.set_flat(p, v);
        }
        Ok(())
    }

    /// Sets every element to `value`.
    pub fn fill(&mut self, value: f64) {
        for p in 0..self.len() {
            self.set_flat(p, value);
        }
    }

    /// Sets every element to zero.
    pub fn zero(&mut self) {
        self.fill(0.0);
    }

    /// Copies the values of `other` into `self`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the shapes differ.
    pub fn copy_from(&mut self, other: &Self) -> Result<()> {
        self.apply_with(other, |_, b| b)
    }

    /// Copies row-major `values` into `self`.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if `values.len()` differs from the element
    /// count.
    pub fn copy_from_slice(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.len() {
            return Err(Error::shape(&[self.len()], &[values.len()]));
        }
        for (p, v) in values.iter().enumerate() {
            self.set_flat(p, *v);
        }
        Ok(())
    }

    /// Matrix product of two 2-D tensors.
    ///
    /// # Errors
    ///
    /// - [`Error::UnsupportedOperation`] if either operand is not 2-D
    /// - [`Error::ShapeMismatch`] if the inner dimensions differ
    pub fn matmul(&self, other: &Self) -> Result<Self> {
        let (&[m, k], &[k2, n]) = (self.shape(), other.shape()) else {
            return Err(Error::unsupported(format!(
                "matmul needs two 2-D tensors, got ranks {} and {}",
                self.ndim(),
                other.ndim()
            )));
        };
        if k != k2 {
            return Err(Error::shape(&[k, n], other.shape()));
        }

        let mut out = Self::zeros(&[m, n])?;
        for i in 0..m {
            for j in 0..n {
                let mut acc = 0.0;
                for p in 0..k {
                    acc += self.get_flat(i * k + p) * other.get_flat(p * n + j);
                }
                out.set_flat(i * n + j, acc);
            }
        }
        Ok(out)
    }

    /// Sum of all elements.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.iter().sum()
    }

    /// Arithmetic mean of all elements.
    #[must_use]
    pub fn mean(&self) -> f64 {
        self.sum() / self.len() as f64
    }

    /// Largest element.
    #[must_use]
    pub fn max(&self) -> f64 {
        self.iter().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Smallest element.
    #[must_use]
    pub fn min(&self) -> f64 {
        self.iter().fold(f64::INFINITY, f64::min)
    }

    /// Row-major position of the largest element, the first one on ties.
    #[must_use]
    pub fn argmax(&self) -> usize {
        let mut best = 0;
        for (i, x) in self.iter().enumerate() {
            if x > self.get_flat(best) {
                best = i;
            }
        }
        best
    }

    /// Population standard deviation (Welford, single pass).
    #[must_use]
    pub fn std(&self) -> f64 {
        let mut mean = 0.0;
        let mut m2 = 0.0;
        for (n, x) in self.iter().enumerate() {
            let delta = x - mean;
            mean += delta / (n + 1) as f64;
            m2 += delta * (x - mean);
        }
        (m2 / self.len() as f64).sqrt()
    }

    /// Rescales every element in place from the tensor's own `[min, max]`
    /// range into `[min, max]`.
    ///
    /// A constant tensor maps every element to `min`.
    pub fn normalize(&mut self, min: f64, max: f64) {
        let (lo, hi) = self
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| (lo.min(x), hi.max(x)));
        let span = hi - lo;
        if span == 0.0 {
            self.fill(min);
            return;
        }
        self.apply(|x| (x - lo) / span * (max - min) + min);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn elementwise_ops_check_shapes() {
        let mut a = tensor!([1.0, 2.0, 3.0]);
        let b = tensor!([1.0, 1.0, 1.0]);
        a.add(&b).unwrap();
        assert_eq!(a.to_vec(), vec![2.0, 3.0, 4.0]);
        a.mult(&tensor!([2.0, 2.0, 0.5])).unwrap();
        assert_eq!(a.to_vec(), vec![4.0, 6.0, 2.0]);

        let c = tensor!([[1.0, 1.0, 1.0]]);
        assert!(matches!(a.sub(&c), Err(Error::ShapeMismatch { .. })));
        // failed op leaves the tensor untouched
        assert_eq!(a.to_vec(), vec![4.0, 6.0, 2.0]);
    }

    #[test]
    fn writes_through_a_view_reach_the_parent() {
        let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
        let mut col = t.slice(&[0, 1], &[2, 2]).unwrap();
        col.mul_scalar(10.0);
        assert_eq!(t.to_vec(), vec![1.0, 20.0, 3.0, 40.0]);
    }

    #[test]
    fn matmul_2x3_by_3x2() {
        let a = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let b = tensor!([[7.0, 8.0], [9.0, 10.0], [11.0, 12.0]]);
        assert_eq!(a.matmul(&b).unwrap(), tensor!([[58.0, 64.0], [139.0, 154.0]]));
        assert!(matches!(a.matmul(&a), Err(Error::ShapeMismatch { .. })));
        assert!(matches!(
            tensor!([1.0]).matmul(&a),
            Err(Error::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn reductions() {
        let t = tensor!([[2.0, 4.0], [4.0, 4.0], [5.0, 5.0], [7.0, 9.0]]);
        assert_eq!(t.sum(), 40.0);
        assert_eq!(t.mean(), 5.0);
        assert_eq!(t.max(), 9.0);
        assert_eq!(t.min(), 2.0);
        assert!((t.std() - 2.0).abs() < 1e-12);
        assert_eq!(t.argmax(), 7);
        assert_eq!(tensor!([3.0, 1.0, 3.0]).argmax(), 0);
    }

    #[test]
    fn normalize_rescales_and_handles_constants() {
        let mut t = tensor!([0.0, 5.0, 10.0]);
        t.normalize(-1.0, 1.0);
        assert_eq!(t.to_vec(), vec![-1.0, 0.0, 1.0]);

        let mut c = tensor!([3.0, 3.0]);
        c.normalize(0.5, 1.0);
        assert_eq!(c.to_vec(), vec![0.5, 0.5]);
    }

    #[test]
    fn copy_from_slice_checks_length() {
        let mut t = Tensor::zeros(&[2, 2]).unwrap();
        t.copy_from_slice(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(t, tensor!([[1.0, 2.0], [3.0, 4.0]]));
        assert!(t.copy_from_slice(&[1.0]).is_err());
    }
}
