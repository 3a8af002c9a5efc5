//! Scalar cells and the shared store tensors are views over.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A mutable single-value holder.
///
/// Cells are shared between tensors that view the same data (a parent and
/// its slice, a tensor and its reshape), so writes go through `&self`. The
/// value is kept as raw `f64` bits in an [`AtomicU64`] which makes cells
/// `Sync`: a forked inference worker can read parameters owned by another
/// thread without locking. Writers are still expected to be unique; `add`
/// is a load followed by a store, not a read-modify-write.
#[derive(Debug, Default)]
pub struct Scalar(AtomicU64);

impl Scalar {
    /// Creates a cell holding `value`.
    #[must_use]
    pub const fn new(value: f64) -> Self {
        Self(AtomicU64::new(value.to_bits()))
    }

    /// Reads the current value.
    #[inline]
    #[must_use]
    pub fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    /// Overwrites the current value.
    #[inline]
    pub fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }

    /// Adds `value` to the current value.
    #[inline]
    pub fn add(&self, value: f64) {
        self.set(self.get() + value);
    }
}

impl Clone for Scalar {
    fn clone(&self) -> Self {
        Self::new(self.get())
    }
}

/// The cells seen by one tensor.
///
/// `store` is shared by every view of the same data. When `map` is `None`
/// the view covers the whole store in order; otherwise `map[p]` is the store
/// slot backing row-major position `p`.
#[derive(Debug)]
pub(crate) struct Cells {
    store: Arc<[Scalar]>,
    map: Option<Arc<[usize]>>,
}

impl Cells {
    /// Allocates fresh cells holding `values`.
    pub(crate) fn fresh(values: impl IntoIterator<Item = f64>) -> Self {
        Self {
            store: values.into_iter().map(Scalar::new).collect(),
            map: None,
        }
    }

    /// Returns the cell at row-major position `pos`.
    ///
    /// # Panics
    ///
    /// Panics if `pos` is past the end of the view.
    #[inline]
    pub(crate) fn slot(&self, pos: usize) -> &Scalar {
        match &self.map {
            None => &self.store[pos],
            Some(map) => &self.store[map[pos]],
        }
    }

    /// Another handle on exactly the same cells.
    pub(crate) fn alias(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            map: self.map.clone(),
        }
    }

    /// A view over the same store whose `i`-th position is this view's
    /// `positions[i]`-th position.
    pub(crate) fn select(&self, positions: impl Iterator<Item = usize>) -> Self {
        let map: Arc<[usize]> = match &self.map {
            None => positions.collect(),
            Some(old) => positions.map(|p| old[p]).collect(),
        };
        Self {
            store: Arc::clone(&self.store),
            map: Some(map),
        }
    }

    /// Whether both views are backed by the same store.
    pub(crate) fn shares(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrips_bits() {
        let s = Scalar::new(-0.0);
        assert!(s.get().is_sign_negative());
        s.set(f64::NAN);
        assert!(s.get().is_nan());
        s.set(1.5);
        s.add(2.0);
        assert_eq!(s.get(), 3.5);
    }

    #[test]
    fn selected_views_share_store() {
        let cells = Cells::fresh([1.0, 2.0, 3.0, 4.0]);
        let odd = cells.select([1, 3].into_iter());
        let last = odd.select([1].into_iter());

        last.slot(0).set(40.0);
        assert_eq!(cells.slot(3).get(), 40.0);
        assert!(cells.shares(&last));
        assert!(!cells.shares(&Cells::fresh([1.0])));
    }
}
