//! A small feed-forward classifier with hand-written backprop.
//!
//! `mlp-classifier` trains and evaluates dense networks on batches of labeled
//! samples (e.g. 28x28 grayscale digits flattened to 784 features). Every layer
//! implements its own closed-form backward rule; there is no autodiff graph.
//!
//! # Pieces
//!
//! - [`Tensor`]: row-major `f64` buffer with an owned shape.
//! - [`Layer`]: `Linear`, `Relu`, `Sigmoid`, `Tanh`, `LogSoftmax`, each with
//!   `forward(input, mode)` and `backward(grad_output)`.
//! - [`Loss`]: cross-entropy over logits, NLL over log-probabilities, or MSE
//!   against one-hot targets.
//! - [`Sgd`]: stochastic gradient descent with momentum.
//! - [`Network`]: an ordered stack of layers that owns all parameters.
//! - [`Trainer`]: the epoch loop (train pass, then eval pass) with a
//!   cooperative [`StopHandle`].
//! - [`DataSource`] / [`Reporter`] / [`InferenceSink`]: the seams to the
//!   outside world.
//!
//! # Errors
//!
//! Everything fallible returns [`Result`]. Shape mismatches (including labels
//! out of range) are [`Error::Shape`], calls in the wrong order are
//! [`Error::State`], and bad hyperparameters are [`Error::Config`]. A NaN or
//! infinite loss is not an error: it is surfaced as a [`NumericalWarning`] and
//! training continues.
//!
//! # Logging
//!
//! The crate emits `tracing` events and spans but never installs a subscriber.
//!
//! # Quick start
//!
//! ```rust
//! use mlp_classifier::{
//!     InMemorySource, LogReporter, Loss, Network, SgdConfig, TrainConfig, Trainer, data,
//! };
//!
//! # fn main() -> mlp_classifier::Result<()> {
//! let centers = [vec![-1.0, -1.0], vec![1.0, 1.0]];
//! let train = data::blobs(&centers, 64, 0.4, 1)?;
//! let test = data::blobs(&centers, 16, 0.4, 2)?;
//! let mut source = InMemorySource::new(train, test, 0)?;
//!
//! let net = Network::builder(2)
//!     .linear(8)
//!     .relu()
//!     .linear(2)
//!     .log_softmax()
//!     .build_with_seed(0)?;
//!
//! let mut trainer = Trainer::new(
//!     net,
//!     TrainConfig {
//!         epochs: 5,
//!         batch_size: 16,
//!         test_batch_size: 32,
//!         loss: Loss::Nll,
//!         optimizer: SgdConfig { lr: 0.1, momentum: 0.9 },
//!         ..TrainConfig::default()
//!     },
//! )?;
//! let report = trainer.fit(&mut source, &mut LogReporter)?;
//! assert_eq!(report.epochs.len(), 5);
//! # Ok(())
//! # }
//! ```

pub mod data;
pub mod error;
pub mod infer;
pub mod init;
pub mod layer;
pub mod loss;
pub(crate) mod matmul;
pub mod metrics;
pub mod network;
pub mod optim;
pub mod report;
pub mod tensor;
pub mod train;

/// Scalar type used by every tensor.
pub type Scalar = f64;

pub use data::{Batch, DataSource, Dataset, InMemorySource, Sample, Split};
pub use error::{Error, Result};
pub use infer::{GrayImage, Inference, InferenceSink, visualize_inferences};
pub use init::Init;
pub use layer::{Layer, LayerKind, Linear, LogSoftmax, Mode, ParamMut, Relu, Sigmoid, Tanh};
pub use loss::Loss;
pub use metrics::{EpochReport, PhaseStats, RunningMetrics};
pub use network::{Network, NetworkBuilder};
pub use optim::{Sgd, SgdConfig};
#[cfg(feature = "serde")]
pub use report::JsonLinesReporter;
pub use report::{LogReporter, NumericalWarning, Reporter};
pub use tensor::Tensor;
pub use train::{EvalReport, FitReport, Phase, StopHandle, TrainConfig, Trainer, evaluate};
