//! cellnet: a from-scratch neural network library in Rust.
//!
//! Layers compute their own local gradients by hand; there is no general
//! computation graph. Tensors are views over shared scalar cells, so
//! reshaping, transposing and slicing never copy.
//!
//! # Features
//!
//! - N-dimensional tensors with aliasing views and shape-checked arithmetic.
//! - Dense, convolutional, max/average pooling and flatten layers.
//! - Activations, losses and seeded parameter initializers.
//! - Nine optimizers, from plain gradient descent to Lion.
//! - A sequential model with batched training and parallel inference.
//! - An ordered text value stream for saving and loading layers.
//!
//! # Modules
//!
//! - [`tensors`]: Tensor storage, views, arithmetic and the `tensor!` macro.
//! - [`activation`]: Elementwise activation functions and their derivatives.
//! - [`loss`]: Loss values and gradients.
//! - [`init`]: Parameter initializers.
//! - [`layers`]: The layer contract and the concrete layers.
//! - [`optim`]: Update rules.
//! - [`model`]: The [`Sequential`](model::Sequential) container and training loop.
//! - [`modelio`]: Saving and loading layers and models.
//! - [`error`]: The crate-wide [`Error`].
//!
//! # Example
//!
//! ```rust
//! use cellnet::activation::Activation;
//! use cellnet::layers::Dense;
//! use cellnet::loss::Loss;
//! use cellnet::model::{Sequential, TrainConfig};
//! use cellnet::optim::Adam;
//! use cellnet::tensor;
//!
//! let inputs = vec![tensor!([0.0, 1.0]), tensor!([1.0, 0.0])];
//! let targets = vec![tensor!([1.0]), tensor!([0.0])];
//!
//! let mut model = Sequential::new();
//! model.configure(TrainConfig::default().with_seed(1)).unwrap();
//! model.add(Dense::new(4, Activation::Tanh).unwrap());
//! model.add(Dense::new(1, Activation::Sigmoid).unwrap());
//! model
//!     .compile(&[2], Box::new(Adam::new(0.01).unwrap()), Loss::MeanSquaredError)
//!     .unwrap();
//!
//! let config = TrainConfig::default().with_epochs(10);
//! model.fit(&inputs, &targets, &config).unwrap();
//! let loss = model.evaluate(&inputs, &targets).unwrap();
//! assert!(loss.is_finite());
//! ```

pub mod activation;
pub mod error;
pub mod init;
pub mod layers;
pub mod loss;
pub mod model;
pub mod modelio;
pub mod optim;
pub mod tensors;

pub use error::{Error, Result};
pub use tensors::Tensor;
