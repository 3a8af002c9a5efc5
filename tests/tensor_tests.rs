use cellnet::tensors::{Tensor, parse_tensor};
use cellnet::{Error, tensor};
use proptest::prelude::*;

#[test]
fn test_tensor_creation() {
    let t = Tensor::from_vec(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
    assert_eq!(t.shape(), &[2, 2]);
    assert_eq!(t.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);
    assert!(matches!(
        Tensor::from_vec(vec![1.0, 2.0, 3.0], &[2, 2]),
        Err(Error::Configuration(_))
    ));
    assert!(matches!(Tensor::zeros(&[2, 0]), Err(Error::Configuration(_))));
}

#[test]
fn test_tensor_macro() {
    let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    assert_eq!(t.shape(), &[2, 2]);
    assert_eq!(t.to_vec(), vec![1.0, 2.0, 3.0, 4.0]);

    let cube = tensor!([[[1, 2], [3, 4]], [[5, 6], [7, 8]]]);
    assert_eq!(cube.shape(), &[2, 2, 2]);
    assert_eq!(cube.get(&[1, 0, 1]).unwrap(), 6.0);
}

#[test]
fn test_parse_matches_macro() {
    let parsed: Tensor = "[[1, 2.5], [-3, 4e1]]".parse().unwrap();
    assert_eq!(parsed, tensor!([[1.0, 2.5], [-3.0, 40.0]]));
    assert!(parse_tensor("[[1, 2], [3]]").is_err());
    assert!(parse_tensor("[1, 2] extra").is_err());
}

#[test]
fn test_slice_writes_reach_the_parent() {
    let parent = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0], [7.0, 8.0, 9.0]]);
    let mut block = parent.slice(&[1, 1], &[3, 3]).unwrap();
    assert_eq!(block.to_vec(), vec![5.0, 6.0, 8.0, 9.0]);

    block.fill(0.0);
    assert_eq!(
        parent.to_vec(),
        vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0, 7.0, 0.0, 0.0]
    );
}

#[test]
fn test_transpose_is_a_view() {
    let m = tensor!([[1.0, 2.0], [3.0, 4.0]]);
    let mut t = m.transpose();
    t.set(&[0, 1], 30.0).unwrap();
    assert_eq!(m.get(&[1, 0]).unwrap(), 30.0);
}

#[test]
fn test_clone_is_independent() {
    let a = tensor!([1.0, 2.0]);
    let mut b = a.clone();
    b.set_flat(0, 9.0);
    assert_eq!(a.get_flat(0), 1.0);

    let mut c = a.alias();
    c.set_flat(1, 7.0);
    assert_eq!(a.get_flat(1), 7.0);
}

#[test]
fn test_elementwise_shape_checks() {
    let mut a = tensor!([1.0, 2.0, 3.0]);
    let b = tensor!([[1.0, 2.0, 3.0]]);
    assert!(matches!(a.add(&b), Err(Error::ShapeMismatch { .. })));
    a.add(&tensor!([1.0, 1.0, 1.0])).unwrap();
    assert_eq!(a.to_vec(), vec![2.0, 3.0, 4.0]);
}

#[test]
fn test_index_out_of_range() {
    let t = Tensor::zeros(&[2, 3]).unwrap();
    assert!(matches!(t.get(&[2, 0]), Err(Error::IndexOutOfRange { .. })));
    assert!(matches!(t.get(&[0]), Err(Error::IndexOutOfRange { .. })));
}

#[test]
fn test_matmul() {
    let a = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
    let b = tensor!([[7.0, 8.0], [9.0, 10.0], [11.0, 12.0]]);
    let c = a.matmul(&b).unwrap();
    assert_eq!(c, tensor!([[58.0, 64.0], [139.0, 154.0]]));
    assert!(matches!(a.matmul(&a), Err(Error::ShapeMismatch { .. })));
}

#[test]
fn test_reductions() {
    let t = tensor!([[2.0, 4.0], [4.0, 4.0], [5.0, 5.0], [7.0, 9.0]]);
    assert_eq!(t.sum(), 40.0);
    assert_eq!(t.mean(), 5.0);
    assert_eq!(t.max(), 9.0);
    assert_eq!(t.min(), 2.0);
    assert!((t.std() - 2.0).abs() < 1e-12);
}

fn shape_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..5, 1..4)
}

proptest! {
    #[test]
    fn prop_reshape_preserves_count(shape in shape_strategy()) {
        let n: usize = shape.iter().product();
        let data: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let t = Tensor::from_vec(data.clone(), &shape).unwrap();

        let flat = t.reshape(&[n]).unwrap();
        prop_assert_eq!(flat.len(), n);
        prop_assert_eq!(flat.to_vec(), data);
        prop_assert!(flat.shares_cells(&t));

        let err = t.reshape(&[n + 1]);
        prop_assert!(
            matches!(err, Err(Error::ShapeMismatch { .. })),
            "reshape to {} accepted",
            n + 1
        );
    }

    #[test]
    fn prop_transpose_twice_is_identity(
        rows in 1usize..6,
        cols in 1usize..6,
        seed in any::<u64>(),
    ) {
        let data: Vec<f64> = (0..rows * cols)
            .map(|i| (seed.wrapping_mul(i as u64 + 1) % 1000) as f64 / 10.0)
            .collect();
        let t = Tensor::from_vec(data, &[rows, cols]).unwrap();
        let tt = t.transpose();
        prop_assert_eq!(tt.shape(), &[cols, rows][..]);
        prop_assert_eq!(tt.transpose(), t);
    }
}
