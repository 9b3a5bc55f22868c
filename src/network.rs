//! Sequential network and its builder.
//!
//! `NetworkBuilder` is the recommended way to define a model: it tracks the
//! running width so each `Linear` layer is created with the right input size.
//!
//! ```rust
//! use mlp_classifier::Network;
//!
//! # fn main() -> mlp_classifier::Result<()> {
//! let net = Network::builder(784)
//!     .linear(128)
//!     .relu()
//!     .linear(10)
//!     .log_softmax()
//!     .build_with_seed(0)?;
//! assert_eq!(net.output_dim(), 10);
//! # Ok(())
//! # }
//! ```

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::data::Batch;
use crate::layer::{Layer, LayerKind, Mode, ParamMut};
use crate::{Error, Init, Result, Tensor};

/// An ordered stack of layers that owns every parameter.
#[derive(Debug, Clone)]
pub struct Network {
    input_dim: usize,
    output_dim: usize,
    layers: Vec<Layer>,
}

impl Network {
    pub fn builder(input_dim: usize) -> NetworkBuilder {
        NetworkBuilder::new(input_dim)
    }

    /// Assemble a network from ready-made layers.
    ///
    /// The input width is taken from the first `Linear` layer; every later
    /// `Linear` must consume the width produced before it.
    pub fn from_layers(layers: Vec<Layer>) -> Result<Self> {
        let input_dim = layers
            .iter()
            .find_map(Layer::as_linear)
            .map(|l| l.in_dim())
            .ok_or_else(|| {
                Error::Config("network needs at least one linear layer".to_owned())
            })?;

        let mut width = input_dim;
        for (i, layer) in layers.iter().enumerate() {
            if let Some(linear) = layer.as_linear() {
                if linear.in_dim() != width {
                    return Err(Error::Shape(format!(
                        "layer {i} expects {} inputs but receives {width}",
                        linear.in_dim()
                    )));
                }
            }
            width = layer.out_dim(width);
        }

        Ok(Self {
            input_dim,
            output_dim: width,
            layers,
        })
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    #[inline]
    pub fn output_dim(&self) -> usize {
        self.output_dim
    }

    #[inline]
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    pub fn kinds(&self) -> Vec<LayerKind> {
        self.layers.iter().map(Layer::kind).collect()
    }

    /// Total number of trainable scalars.
    pub fn num_parameters(&self) -> usize {
        self.layers
            .iter()
            .filter_map(Layer::as_linear)
            .map(|l| l.weight().len() + l.bias().len())
            .sum()
    }

    fn check_input(&self, input: &Tensor) -> Result<()> {
        let (_, cols) = input.dims2()?;
        if cols != self.input_dim {
            return Err(Error::Shape(format!(
                "network expects {} input features, got {:?}",
                self.input_dim,
                input.shape()
            )));
        }
        Ok(())
    }

    /// Thread `input` through every layer in order.
    pub fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        self.check_input(input)?;
        let mut x = input.clone();
        for layer in &mut self.layers {
            x = layer.forward(&x, mode)?;
        }
        Ok(x)
    }

    /// Forward pass that leaves every cache untouched.
    pub fn apply(&self, input: &Tensor) -> Result<Tensor> {
        self.check_input(input)?;
        let mut x = input.clone();
        for layer in &self.layers {
            x = layer.apply(&x)?;
        }
        Ok(x)
    }

    /// Thread `grad_output` through the layers in reverse.
    ///
    /// Parameter gradients accumulate inside each `Linear`; the gradient with
    /// respect to the network input is discarded.
    pub fn backward(&mut self, grad_output: &Tensor) -> Result<()> {
        let mut g = grad_output.clone();
        for layer in self.layers.iter_mut().rev() {
            g = layer.backward(&g)?;
        }
        Ok(())
    }

    /// Every parameter with its gradient, in layer order (weight, then bias).
    pub fn parameters(&mut self) -> Vec<ParamMut<'_>> {
        self.layers
            .iter_mut()
            .filter_map(Layer::as_linear_mut)
            .flat_map(|l| l.params_mut())
            .collect()
    }

    /// Gradient buffers in the same order as [`Network::parameters`].
    pub fn gradients(&self) -> Vec<&Tensor> {
        self.layers
            .iter()
            .filter_map(Layer::as_linear)
            .flat_map(|l| [l.grad_weight(), l.grad_bias()])
            .collect()
    }

    pub fn zero_grad(&mut self) {
        for layer in &mut self.layers {
            layer.zero_grad();
        }
    }

    /// Predicted class per row of a `[B, input_dim]` input tensor: argmax over
    /// the output, ties to the lowest index.
    pub fn predict(&self, inputs: &Tensor) -> Result<Vec<usize>> {
        self.apply(inputs)?.argmax_rows()
    }

    /// [`Network::predict`] on a batch's inputs; labels are ignored.
    pub fn predict_batch(&self, batch: &Batch) -> Result<Vec<usize>> {
        self.predict(batch.inputs())
    }
}

/// Builder for a [`Network`].
#[derive(Debug, Clone)]
pub struct NetworkBuilder {
    input_dim: usize,
    layers: Vec<(LayerKind, Init)>,
}

impl NetworkBuilder {
    /// Start a network that accepts `input_dim` features per sample.
    pub fn new(input_dim: usize) -> Self {
        Self {
            input_dim,
            layers: Vec::new(),
        }
    }

    /// Dense layer with the default initializer ([`Init::FanInUniform`]).
    pub fn linear(self, out_dim: usize) -> Self {
        self.linear_with_init(out_dim, Init::default())
    }

    pub fn linear_with_init(mut self, out_dim: usize, init: Init) -> Self {
        self.layers.push((LayerKind::Linear { out_dim }, init));
        self
    }

    pub fn relu(self) -> Self {
        self.add(LayerKind::Relu)
    }

    pub fn sigmoid(self) -> Self {
        self.add(LayerKind::Sigmoid)
    }

    pub fn tanh(self) -> Self {
        self.add(LayerKind::Tanh)
    }

    pub fn log_softmax(self) -> Self {
        self.add(LayerKind::LogSoftmax)
    }

    pub fn add(mut self, kind: LayerKind) -> Self {
        self.layers.push((kind, Init::default()));
        self
    }

    /// Append layers parsed from a comma-separated list such as
    /// `"linear:128,relu,linear:10,log_softmax"`.
    pub fn parse_layers(mut self, list: &str) -> Result<Self> {
        for item in list.split(',').filter(|s| !s.trim().is_empty()) {
            self = self.add(item.parse()?);
        }
        Ok(self)
    }

    /// Build using a deterministic seed.
    pub fn build_with_seed(self, seed: u64) -> Result<Network> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.build_with_rng(&mut rng)
    }

    /// Build using the provided RNG.
    pub fn build_with_rng<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Network> {
        if self.input_dim == 0 {
            return Err(Error::Config("input_dim must be > 0".to_owned()));
        }
        if self.layers.is_empty() {
            return Err(Error::Config(
                "network must have at least one layer".to_owned(),
            ));
        }
        if !matches!(self.layers.first(), Some((LayerKind::Linear { .. }, _))) {
            return Err(Error::Config(
                "activations before the first linear layer are not supported".to_owned(),
            ));
        }

        let mut layers = Vec::with_capacity(self.layers.len());
        let mut width = self.input_dim;
        for (kind, init) in self.layers {
            let layer = Layer::from_kind(kind, width, init, rng)?;
            width = layer.out_dim(width);
            layers.push(layer);
        }

        Network::from_layers(layers)
    }
}
