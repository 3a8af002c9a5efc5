use cellnet::activation::Activation;
use cellnet::layers::{AvgPool, Conv, Dense, Flatten};
use cellnet::loss::Loss;
use cellnet::model::{Sequential, TrainConfig};
use cellnet::modelio::{load_model, save_model};
use cellnet::optim::Sgd;
use cellnet::tensors::Tensor;
use cellnet::{Error, tensor};
use std::env;
use std::fs;
use std::path::PathBuf;

fn temp_path(name: &str) -> PathBuf {
    env::temp_dir().join(format!("cellnet-{}-{name}.txt", std::process::id()))
}

fn trained_model() -> Sequential {
    let mut model = Sequential::new();
    model.configure(TrainConfig::default().with_seed(21)).unwrap();
    model.add(
        Conv::new(2, [2, 2], Activation::LeakyReLU(0.1))
            .unwrap()
            .with_stride([1, 2])
            .unwrap(),
    );
    model.add(AvgPool::new([2, 1]).unwrap());
    model.add(Flatten::new());
    model.add(Dense::new(2, Activation::Softplus).unwrap().with_bias(false));
    model
        .compile(&[1, 5, 4], Box::new(Sgd::new(0.01).unwrap()), Loss::MeanAbsoluteError)
        .unwrap();

    let inputs = vec![Tensor::filled(&[1, 5, 4], 0.5).unwrap()];
    let targets = vec![tensor!([[1.0, -1.0]])];
    model.train(&inputs, &targets, 3, 1).unwrap();
    model
}

#[test]
fn test_save_and_load_model() {
    let path = temp_path("roundtrip");
    let mut original = trained_model();
    save_model(&path, &original).unwrap();
    let mut loaded = load_model(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(loaded.len(), original.len());
    assert_eq!(loaded.num_params(), original.num_params());
    for id in [0, 3] {
        assert_eq!(loaded.kernel_of(id).unwrap(), original.kernel_of(id).unwrap());
        assert_eq!(
            loaded.bias_of(id).unwrap().map(Tensor::to_vec),
            original.bias_of(id).unwrap().map(Tensor::to_vec)
        );
    }

    let x = Tensor::from_vec((0..20).map(|i| f64::from(i) / 10.0).collect(), &[1, 5, 4]).unwrap();
    let expected = original.forward(&x).unwrap().clone();
    assert_eq!(loaded.forward(&x).unwrap(), &expected);
}

#[test]
fn test_loaded_model_can_keep_training() {
    let path = temp_path("resume");
    save_model(&path, &trained_model()).unwrap();
    let mut model = load_model(&path).unwrap();
    fs::remove_file(&path).unwrap();

    let before = model.kernel_of(3).unwrap().clone();
    model
        .compile(&[1, 5, 4], Box::new(Sgd::new(0.01).unwrap()), Loss::MeanAbsoluteError)
        .unwrap();
    assert_eq!(model.kernel_of(3).unwrap(), &before);

    let inputs = vec![Tensor::filled(&[1, 5, 4], 0.5).unwrap()];
    let targets = vec![tensor!([[1.0, -1.0]])];
    model.train(&inputs, &targets, 1, 1).unwrap();
    assert_ne!(model.kernel_of(3).unwrap(), &before);
}

#[test]
fn test_loaded_model_checks_its_input_shape() {
    let path = temp_path("shape");
    save_model(&path, &trained_model()).unwrap();
    let mut model = load_model(&path).unwrap();
    fs::remove_file(&path).unwrap();

    assert!(matches!(
        model.compile(&[1, 4, 4], Box::new(Sgd::new(0.01).unwrap()), Loss::MeanAbsoluteError),
        Err(Error::ShapeMismatch { .. })
    ));
}

#[test]
fn test_missing_or_corrupt_files() {
    let missing = temp_path("missing");
    assert!(matches!(load_model(&missing), Err(Error::Io(_))));

    let corrupt = temp_path("corrupt");
    fs::write(&corrupt, "cellnet\n2\ndense\n").unwrap();
    let result = load_model(&corrupt);
    fs::remove_file(&corrupt).unwrap();
    assert!(matches!(result, Err(Error::Persistence(_))));

    let header = temp_path("header");
    fs::write(&header, "not a model\n").unwrap();
    let result = load_model(&header);
    fs::remove_file(&header).unwrap();
    assert!(matches!(result, Err(Error::Persistence(_))));
}
