//! A small dense neural network for handwritten digit recognition.
//!
//! `digit-mlp` is a from-scratch feed-forward network (dense layers with relu, sigmoid or
//! softmax activations) trained by plain mini-batch SGD, together with everything around it
//! needed to classify a digit drawn on a canvas: MNIST IDX loading, batch sampling, the
//! bitmap-to-28x28 preprocessing pipeline, and a JSON weight interchange format.
//!
//! # Data layout and shapes
//!
//! - Scalars are `f32`.
//! - Batches are [`Matrix`] values with one sample per row.
//! - Layer weights have shape `(input_size, output_size)`, biases `(1, output_size)`, and a
//!   layer computes `activation(x W + b)`.
//!
//! # Training step
//!
//! [`Network::train`] forwards a batch, seeds the backward sweep from the configured
//! [`Loss`], and updates every layer. How a divergence (non-finite values) is handled is
//! set by [`UpdatePolicy`]: by default a failed step changes nothing.
//!
//! # Observing training
//!
//! [`Network::subscribe`] returns a channel receiver that gets one [`StepEvent`] per
//! successful step. The library logs through the [`log`] facade and never installs a logger.
//!
//! # Quick start
//!
//! ```rust
//! use digit_mlp::{Activation, Matrix, NetworkBuilder};
//!
//! # fn main() -> digit_mlp::Result<()> {
//! let mut net = NetworkBuilder::new(2)?
//!     .add_layer(8, Activation::Relu)?
//!     .add_layer(2, Activation::Softmax)?
//!     .build_with_seed(0)?;
//!
//! let x = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]])?;
//! let y = Matrix::from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0]])?;
//! for _ in 0..100 {
//!     net.train(&x, &y, 0.5)?;
//! }
//! let p = net.predict(&x)?;
//! assert_eq!(p.shape(), (2, 2));
//! println!("predicted classes: {:?}", p.argmax_rows());
//! # Ok(())
//! # }
//! ```

pub mod activation;
pub mod builder;
pub mod data;
pub mod error;
pub mod events;
pub mod idx;
pub mod layer;
pub mod loss;
pub(crate) mod matmul;
pub mod matrix;
pub mod metrics;
pub mod network;
pub mod preprocess;
pub mod record;
pub mod train;

pub use activation::Activation;
pub use builder::NetworkBuilder;
pub use data::{Batch, Dataset, EpochBatches};
pub use error::{Error, Result};
pub use events::{StepEvent, StepPublisher};
pub use layer::{Dense, Layer, LayerGradients};
pub use loss::Loss;
pub use matrix::{Init, Matrix};
pub use network::{InferenceModel, Network, NetworkConfig, UpdatePolicy};
pub use preprocess::{preprocess, Bitmap};
pub use record::{DenseRecord, LayerRecord, NetworkRecord};
pub use train::{EpochReport, EvalReport, FitConfig, FitReport};
