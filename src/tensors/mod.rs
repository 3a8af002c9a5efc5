//! Core tensor data structures and operations.
//!
//! # Core Tensor Utilities
//!
//! This module defines the n-dimensional array every layer, loss and
//! optimizer in the crate computes with.
//!
//! It supports:
//! - Construction from shapes, flat data, nested vectors, the [`tensor!`]
//!   macro and JSON-style text (`"[[1, 2], [3, 4]]".parse()`)
//! - Multi-index element access with bounds checking
//! - Aliasing views: [`Tensor::reshape`], [`Tensor::transpose`],
//!   [`Tensor::slice`], [`Tensor::squeeze`] and [`Tensor::unsqueeze`] return
//!   tensors that read and write the *same* cells as their parent
//! - Shape-checked elementwise arithmetic, unary/binary maps and reductions
//!
//! ## Design Highlights
//! - A tensor is a shape plus a view over shared [`Scalar`] cells
//! - [`Clone`] is a deep copy with fresh cells; [`Tensor::alias`] is the
//!   shallow handle
//! - Shapes are fixed after construction; only views change them
//! - Every dimension is at least one and every tensor has rank one or more
//!
//! ## Example
//!
//! ```rust
//! use cellnet::tensor;
//!
//! let t = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
//! let mut row = t.slice(&[1, 0], &[2, 3]).unwrap();
//! row.fill(0.0);
//! assert_eq!(t.to_vec(), vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);
//! ```

mod cell;
mod ops;
mod parse;

pub use self::cell::Scalar;
pub use self::parse::{MAX_TEXT_RANK, parse_tensor};

use self::cell::Cells;
use crate::error::{Error, Result};
use std::fmt;

/// Represents an N-dimensional tensor with a shape and row-major cells.
///
/// - `shape` defines the structure, e.g. `[2, 3]` for a 2×3 matrix.
/// - The cells are addressed in row-major order and may be shared with
///   other tensors (see the module docs).
pub struct Tensor {
    shape: Vec<usize>,
    cells: Cells,
}

impl Tensor {
    /// Creates a zero-filled tensor.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `shape` is empty or contains a zero.
    pub fn zeros(shape: &[usize]) -> Result<Self> {
        Self::filled(shape, 0.0)
    }

    /// Creates a tensor with every cell set to `value`.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if `shape` is empty or contains a zero.
    pub fn filled(shape: &[usize], value: f64) -> Result<Self> {
        let len = checked_len(shape)?;
        Ok(Self {
            shape: shape.to_vec(),
            cells: Cells::fresh(std::iter::repeat_n(value, len)),
        })
    }

    /// Creates a tensor from flat row-major data.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the shape is invalid or the number of
    /// elements in `data` does not match the shape product.
    pub fn from_vec(data: Vec<f64>, shape: &[usize]) -> Result<Self> {
        let len = checked_len(shape)?;
        if data.len() != len {
            return Err(Error::config(format!(
                "shape {shape:?} is incompatible with {} data elements",
                data.len()
            )));
        }
        Ok(Self {
            shape: shape.to_vec(),
            cells: Cells::fresh(data),
        })
    }

    /// Backs the [`tensor!`] macro.
    ///
    /// # Panics
    ///
    /// Panics if the literal produced an invalid shape, which the macro
    /// rules out for any non-empty literal.
    #[doc(hidden)]
    #[must_use]
    pub fn from_literal(parts: (Vec<usize>, Vec<f64>)) -> Self {
        let (shape, data) = parts;
        match Self::from_vec(data, &shape) {
            Ok(t) => t,
            Err(e) => panic!("invalid tensor literal: {e}"),
        }
    }

    /// Returns a tensor viewing the same cells as `self`.
    ///
    /// Writes through either handle are visible through the other.
    #[must_use]
    pub fn alias(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            cells: self.cells.alias(),
        }
    }

    /// Whether `self` and `other` are backed by the same cells.
    #[must_use]
    pub fn shares_cells(&self, other: &Self) -> bool {
        self.cells.shares(&other.cells)
    }

    /// The dimensions of the tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// Always `false`: every dimension is at least one.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `other` has exactly the same shape.
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.shape == other.shape
    }

    /// Computes the row-major position of a multi-index.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`] if the index rank differs from the tensor
    /// rank or any coordinate is past its dimension.
    pub fn position(&self, index: &[usize]) -> Result<usize> {
        if index.len() != self.shape.len() || index.iter().zip(&self.shape).any(|(i, d)| i >= d) {
            return Err(Error::IndexOutOfRange {
                index: index.to_vec(),
                shape: self.shape.clone(),
            });
        }
        Ok(flatten(index, &self.shape))
    }

    /// Reads the element at `index`.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`] on an invalid index.
    pub fn get(&self, index: &[usize]) -> Result<f64> {
        Ok(self.cells.slot(self.position(index)?).get())
    }

    /// Writes `value` at `index`.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`] on an invalid index.
    pub fn set(&mut self, index: &[usize], value: f64) -> Result<()> {
        self.cells.slot(self.position(index)?).set(value);
        Ok(())
    }

    /// Adds `value` to the element at `index`.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`] on an invalid index.
    pub fn add_at(&mut self, index: &[usize], value: f64) -> Result<()> {
        self.cells.slot(self.position(index)?).add(value);
        Ok(())
    }

    /// Reads the element at row-major position `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos >= self.len()`.
    #[inline]
    #[must_use]
    pub fn get_flat(&self, pos: usize) -> f64 {
        self.cells.slot(pos).get()
    }

    /// Writes the element at row-major position `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos >= self.len()`.
    #[inline]
    pub fn set_flat(&mut self, pos: usize, value: f64) {
        self.cells.slot(pos).set(value);
    }

    /// Adds to the element at row-major position `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos >= self.len()`.
    #[inline]
    pub fn add_flat(&mut self, pos: usize, value: f64) {
        self.cells.slot(pos).add(value);
    }

    /// The value of a single-element tensor.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the tensor holds more than one element.
    pub fn item(&self) -> Result<f64> {
        if self.len() != 1 {
            return Err(Error::shape(&[1], &self.shape));
        }
        Ok(self.get_flat(0))
    }

    /// Iterates over the values in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        (0..self.len()).map(|p| self.cells.slot(p).get())
    }

    /// Copies the values out in row-major order.
    #[must_use]
    pub fn to_vec(&self) -> Vec<f64> {
        self.iter().collect()
    }

    /// Returns a view with a new shape over the same cells.
    ///
    /// # Errors
    ///
    /// [`Error::ShapeMismatch`] if the element counts differ,
    /// [`Error::Configuration`] if `shape` itself is invalid.
    pub fn reshape(&self, shape: &[usize]) -> Result<Self> {
        let len = checked_len(shape)?;
        if len != self.len() {
            return Err(Error::shape(&self.shape, shape));
        }
        Ok(Self {
            shape: shape.to_vec(),
            cells: self.cells.alias(),
        })
    }

    /// Returns a `[1, len]` view over the same cells.
    #[must_use]
    pub fn as_row(&self) -> Self {
        Self {
            shape: vec![1, self.len()],
            cells: self.cells.alias(),
        }
    }

    /// Returns a transposed view.
    ///
    /// - `[n]` becomes the column vector `[n, 1]`
    /// - anything else has its axis order reversed, so transposing a 2-D
    ///   tensor twice gives it back
    #[must_use]
    pub fn transpose(&self) -> Self {
        match self.shape.as_slice() {
            [n] => Self {
                shape: vec![*n, 1],
                cells: self.cells.alias(),
            },
            _ => {
                let rank = self.shape.len();
                let shape: Vec<usize> = self.shape.iter().rev().copied().collect();
                let mut idx = vec![0usize; rank];
                let mut src = vec![0usize; rank];
                let mut positions = Vec::with_capacity(self.len());
                loop {
                    for (d, s) in src.iter_mut().enumerate() {
                        *s = idx[rank - 1 - d];
                    }
                    positions.push(flatten(&src, &self.shape));
                    if !next_index(&mut idx, &shape) {
                        break;
                    }
                }
                Self {
                    shape,
                    cells: self.cells.select(positions.into_iter()),
                }
            }
        }
    }

    /// Returns the half-open block `start[d]..end[d]` along every axis as a
    /// view sharing the parent's cells.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`] if the bounds do not have one entry per
    /// axis, or any range is empty or past its dimension.
    pub fn slice(&self, start: &[usize], end: &[usize]) -> Result<Self> {
        let rank = self.shape.len();
        let valid = start.len() == rank
            && end.len() == rank
            && (0..rank).all(|d| start[d] < end[d] && end[d] <= self.shape[d]);
        if !valid {
            let index = if start.len() == rank && start.iter().zip(&self.shape).all(|(s, d)| s < d) {
                end.to_vec()
            } else {
                start.to_vec()
            };
            return Err(Error::IndexOutOfRange {
                index,
                shape: self.shape.clone(),
            });
        }

        let shape: Vec<usize> = start.iter().zip(end).map(|(s, e)| e - s).collect();
        let mut idx = vec![0usize; rank];
        let mut src = vec![0usize; rank];
        let mut positions = Vec::with_capacity(shape.iter().product());
        loop {
            for d in 0..rank {
                src[d] = start[d] + idx[d];
            }
            positions.push(flatten(&src, &self.shape));
            if !next_index(&mut idx, &shape) {
                break;
            }
        }

        Ok(Self {
            shape,
            cells: self.cells.select(positions.into_iter()),
        })
    }

    /// Removes axis `dim` if its size is one. Rank-one tensors and axes of
    /// any other size are returned unchanged (as views).
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`] if `dim` is not an axis.
    pub fn squeeze(&self, dim: usize) -> Result<Self> {
        if dim >= self.shape.len() {
            return Err(Error::IndexOutOfRange {
                index: vec![dim],
                shape: self.shape.clone(),
            });
        }
        let mut shape = self.shape.clone();
        if shape.len() > 1 && shape[dim] == 1 {
            shape.remove(dim);
        }
        Ok(Self {
            shape,
            cells: self.cells.alias(),
        })
    }

    /// Inserts an axis of size one before `dim`.
    ///
    /// # Errors
    ///
    /// [`Error::IndexOutOfRange`] if `dim > self.ndim()`.
    pub fn unsqueeze(&self, dim: usize) -> Result<Self> {
        if dim > self.shape.len() {
            return Err(Error::IndexOutOfRange {
                index: vec![dim],
                shape: self.shape.clone(),
            });
        }
        let mut shape = self.shape.clone();
        shape.insert(dim, 1);
        Ok(Self {
            shape,
            cells: self.cells.alias(),
        })
    }
}

/// Deep copy: the clone owns fresh cells holding the same values.
impl Clone for Tensor {
    fn clone(&self) -> Self {
        Self {
            shape: self.shape.clone(),
            cells: Cells::fresh(self.iter()),
        }
    }
}

impl PartialEq for Tensor {
    fn eq(&self, other: &Self) -> bool {
        self.shape == other.shape && self.iter().eq(other.iter())
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .field("data", &self.to_vec())
            .finish()
    }
}

impl fmt::Display for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn level(t: &Tensor, f: &mut fmt::Formatter<'_>, dim: usize, base: usize) -> fmt::Result {
            let stride: usize = t.shape[dim + 1..].iter().product();
            f.write_str("[")?;
            for i in 0..t.shape[dim] {
                if i > 0 {
                    f.write_str(", ")?;
                }
                if dim + 1 == t.shape.len() {
                    write!(f, "{}", t.get_flat(base + i))?;
                } else {
                    level(t, f, dim + 1, base + i * stride)?;
                }
            }
            f.write_str("]")
        }
        level(self, f, 0, 0)
    }
}

impl From<Vec<f64>> for Tensor {
    /// Builds a rank-one tensor. An empty vector becomes the single-element
    /// tensor `[0.0]`.
    fn from(data: Vec<f64>) -> Self {
        if data.is_empty() {
            return Self {
                shape: vec![1],
                cells: Cells::fresh([0.0]),
            };
        }
        Self {
            shape: vec![data.len()],
            cells: Cells::fresh(data),
        }
    }
}

impl TryFrom<Vec<Vec<f64>>> for Tensor {
    type Error = Error;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.iter().any(|r| r.len() != cols) {
            return Err(Error::config("ragged nested data (rows have mismatched lengths)"));
        }
        let shape = [rows.len(), cols];
        Self::from_vec(rows.into_iter().flatten().collect(), &shape)
    }
}

impl TryFrom<Vec<Vec<Vec<f64>>>> for Tensor {
    type Error = Error;

    fn try_from(planes: Vec<Vec<Vec<f64>>>) -> Result<Self> {
        let rows = planes.first().map_or(0, Vec::len);
        let cols = planes
            .first()
            .and_then(|p| p.first())
            .map_or(0, Vec::len);
        let ragged = planes
            .iter()
            .any(|p| p.len() != rows || p.iter().any(|r| r.len() != cols));
        if ragged {
            return Err(Error::config("ragged nested data (planes have mismatched shapes)"));
        }
        let shape = [planes.len(), rows, cols];
        Self::from_vec(planes.into_iter().flatten().flatten().collect(), &shape)
    }
}

/// Validates a shape and returns its element count.
pub(crate) fn checked_len(shape: &[usize]) -> Result<usize> {
    if shape.is_empty() || shape.contains(&0) {
        return Err(Error::config(format!(
            "tensor shape must have at least one axis and no zero dimensions, got {shape:?}"
        )));
    }
    Ok(shape.iter().product())
}

/// Row-major position of `idx` in a tensor of `shape` (no bounds checks).
#[inline]
pub(crate) fn flatten(idx: &[usize], shape: &[usize]) -> usize {
    let mut stride = 1;
    let mut out = 0;

    for d in (0..idx.len()).rev() {
        out += idx[d] * stride;
        stride *= shape[d];
    }
    out
}

/// Advances `idx` to the next multi-index in row-major order, returning
/// `false` once it wraps around.
#[inline]
pub(crate) fn next_index(idx: &mut [usize], limits: &[usize]) -> bool {
    for d in (0..idx.len()).rev() {
        idx[d] += 1;
        if idx[d] < limits[d] {
            return true;
        }
        idx[d] = 0;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn rejects_bad_shapes() {
        assert!(matches!(Tensor::zeros(&[]), Err(Error::Configuration(_))));
        assert!(matches!(Tensor::zeros(&[2, 0]), Err(Error::Configuration(_))));
        assert!(matches!(
            Tensor::from_vec(vec![1.0, 2.0, 3.0], &[2, 2]),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn index_out_of_range_reports_index_and_shape() {
        let t = Tensor::zeros(&[2, 3]).unwrap();
        match t.get(&[1, 3]) {
            Err(Error::IndexOutOfRange { index, shape }) => {
                assert_eq!(index, vec![1, 3]);
                assert_eq!(shape, vec![2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(t.get(&[1]).is_err());
    }

    #[test]
    fn clone_is_deep_alias_is_shallow() {
        let t = tensor!([1.0, 2.0]);
        let mut deep = t.clone();
        let mut shallow = t.alias();

        deep.set(&[0], 10.0).unwrap();
        assert_eq!(t.get(&[0]).unwrap(), 1.0);

        shallow.set(&[1], 20.0).unwrap();
        assert_eq!(t.get(&[1]).unwrap(), 20.0);
        assert!(t.shares_cells(&shallow));
        assert!(!t.shares_cells(&deep));
    }

    #[test]
    fn reshape_views_the_same_cells() {
        let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
        let mut flat = t.reshape(&[4]).unwrap();
        flat.set(&[3], 40.0).unwrap();
        assert_eq!(t.get(&[1, 1]).unwrap(), 40.0);

        assert!(matches!(t.reshape(&[3]), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn as_row_is_a_row_view() {
        let t = tensor!([[[1.0], [2.0]], [[3.0], [4.0]]]);
        let mut row = t.as_row();
        assert_eq!(row.shape(), &[1, 4]);
        row.set(&[0, 2], 30.0).unwrap();
        assert_eq!(t.get(&[1, 0, 0]).unwrap(), 30.0);
    }

    #[test]
    fn transpose_special_cases() {
        let v = tensor!([1.0, 2.0, 3.0]);
        assert_eq!(v.transpose().shape(), &[3, 1]);
        assert_eq!(v.transpose().transpose().shape(), &[1, 3]);

        let row = tensor!([[1.0, 2.0]]);
        assert_eq!(row.transpose().shape(), &[2, 1]);
        assert_eq!(row.transpose().transpose(), row);

        let m = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let mt = m.transpose();
        assert_eq!(mt.shape(), &[3, 2]);
        assert_eq!(mt.to_vec(), vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(mt.transpose(), m);
    }

    #[test]
    fn transpose_reverses_axes_of_3d() {
        let t = Tensor::from_vec((0..24).map(f64::from).collect(), &[2, 3, 4]).unwrap();
        let r = t.transpose();
        assert_eq!(r.shape(), &[4, 3, 2]);
        assert_eq!(r.get(&[3, 1, 0]).unwrap(), t.get(&[0, 1, 3]).unwrap());
        assert_eq!(r.get(&[2, 2, 1]).unwrap(), t.get(&[1, 2, 2]).unwrap());
    }

    #[test]
    fn slice_aliases_parent() {
        let t = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let mut s = t.slice(&[0, 1], &[2, 3]).unwrap();
        assert_eq!(s.shape(), &[2, 2]);
        assert_eq!(s.to_vec(), vec![2.0, 3.0, 5.0, 6.0]);

        s.set(&[1, 0], -5.0).unwrap();
        assert_eq!(t.get(&[1, 1]).unwrap(), -5.0);

        // slicing a slice still reaches the root cells
        let mut inner = s.slice(&[0, 1], &[1, 2]).unwrap();
        inner.set(&[0, 0], 30.0).unwrap();
        assert_eq!(t.get(&[0, 2]).unwrap(), 30.0);
    }

    #[test]
    fn slice_rejects_empty_or_out_of_bounds_ranges() {
        let t = Tensor::zeros(&[2, 2]).unwrap();
        assert!(matches!(t.slice(&[0, 0], &[0, 2]), Err(Error::IndexOutOfRange { .. })));
        assert!(matches!(t.slice(&[0, 0], &[2, 3]), Err(Error::IndexOutOfRange { .. })));
        assert!(matches!(t.slice(&[0], &[1]), Err(Error::IndexOutOfRange { .. })));
    }

    #[test]
    fn squeeze_and_unsqueeze() {
        let t = Tensor::zeros(&[1, 3]).unwrap();
        assert_eq!(t.squeeze(0).unwrap().shape(), &[3]);
        assert_eq!(t.squeeze(1).unwrap().shape(), &[1, 3]);
        assert_eq!(t.unsqueeze(2).unwrap().shape(), &[1, 3, 1]);
        assert!(t.unsqueeze(3).is_err());
        assert!(t.squeeze(2).is_err());
    }

    #[test]
    fn nested_vectors() {
        let t = Tensor::try_from(vec![vec![1.0, 2.0], vec![3.0, 4.0]]).unwrap();
        assert_eq!(t, tensor!([[1.0, 2.0], [3.0, 4.0]]));
        assert!(Tensor::try_from(vec![vec![1.0], vec![2.0, 3.0]]).is_err());

        let c = Tensor::try_from(vec![vec![vec![1.0, 2.0]], vec![vec![3.0, 4.0]]]).unwrap();
        assert_eq!(c.shape(), &[2, 1, 2]);
    }

    #[test]
    fn display_is_nested() {
        let t = tensor!([[1.0, 2.5], [3.0, 4.0]]);
        assert_eq!(t.to_string(), "[[1, 2.5], [3, 4]]");
    }
}
