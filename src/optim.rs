//! Stochastic gradient descent with momentum.
//!
//! Design notes:
//! - Momentum buffers live in the optimizer, not in the network.
//! - Buffers are allocated lazily on the first step, one per parameter tensor,
//!   and persist across batches and epochs.
//! - Every step checks that the parameter list still matches the buffers.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::layer::ParamMut;
use crate::{Error, Network, Result, Scalar, Tensor};

/// SGD hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SgdConfig {
    pub lr: Scalar,
    pub momentum: Scalar,
}

impl Default for SgdConfig {
    fn default() -> Self {
        Self {
            lr: 0.01,
            momentum: 0.9,
        }
    }
}

impl SgdConfig {
    /// Validate optimizer hyperparameters.
    pub fn validate(&self) -> Result<()> {
        if !(self.lr.is_finite() && self.lr > 0.0) {
            return Err(Error::Config(format!(
                "learning rate must be finite and > 0, got {}",
                self.lr
            )));
        }
        if !(self.momentum.is_finite() && (0.0..1.0).contains(&self.momentum)) {
            return Err(Error::Config(format!(
                "momentum must be finite and in [0,1), got {}",
                self.momentum
            )));
        }
        Ok(())
    }
}

/// SGD with momentum: `M = momentum * M + G`, `P = P - lr * M`.
#[derive(Debug, Clone)]
pub struct Sgd {
    lr: Scalar,
    momentum: Scalar,
    velocity: Vec<Tensor>,
}

impl Sgd {
    /// Returns an error if `lr` is not finite and positive, or `momentum` is
    /// outside `[0, 1)`.
    pub fn new(config: SgdConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            lr: config.lr,
            momentum: config.momentum,
            velocity: Vec::new(),
        })
    }

    #[inline]
    pub fn lr(&self) -> Scalar {
        self.lr
    }

    #[inline]
    pub fn momentum(&self) -> Scalar {
        self.momentum
    }

    /// Momentum buffers, in parameter order. Empty before the first step.
    #[inline]
    pub fn velocity(&self) -> &[Tensor] {
        &self.velocity
    }

    /// Reset every gradient buffer of `network` to zero.
    #[instrument(level = "trace", skip_all)]
    pub fn zero_grad(&self, network: &mut Network) {
        network.zero_grad();
    }

    /// Apply one update to every parameter of `network`.
    pub fn step(&mut self, network: &mut Network) -> Result<()> {
        self.step_params(network.parameters())
    }

    /// Apply one update to an explicit parameter list.
    ///
    /// The first call allocates one zeroed momentum buffer per parameter.
    /// Later calls must pass the same number of parameters with the same
    /// shapes, otherwise this returns [`Error::State`].
    #[instrument(level = "debug", skip_all, fields(params = params.len(), lr = self.lr))]
    pub fn step_params(&mut self, mut params: Vec<ParamMut<'_>>) -> Result<()> {
        if params.is_empty() {
            return Err(Error::State("optimizer step with no parameters".to_owned()));
        }
        if self.velocity.is_empty() {
            self.velocity = params.iter().map(|p| p.value.zeros_like()).collect();
        }
        if self.velocity.len() != params.len() {
            return Err(Error::State(format!(
                "optimizer holds {} momentum buffers but got {} parameters",
                self.velocity.len(),
                params.len()
            )));
        }
        for (i, (p, v)) in params.iter().zip(&self.velocity).enumerate() {
            if p.grad.shape() != p.value.shape() || v.shape() != p.value.shape() {
                return Err(Error::State(format!(
                    "parameter {i}: value {:?}, grad {:?}, momentum {:?}",
                    p.value.shape(),
                    p.grad.shape(),
                    v.shape()
                )));
            }
        }

        for (p, v) in params.iter_mut().zip(&mut self.velocity) {
            for (m, &g) in v.data_mut().iter_mut().zip(p.grad.data()) {
                *m = self.momentum * *m + g;
            }
            p.value.axpy(-self.lr, v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::layer::{Layer, Linear, Mode};

    fn one_unit_network(w: f64, b: f64) -> Network {
        let weight = Tensor::new(vec![w], vec![1, 1]).unwrap();
        let bias = Tensor::vector(vec![b]).unwrap();
        Network::from_layers(vec![Layer::Linear(
            Linear::from_parts(weight, bias).unwrap(),
        )])
        .unwrap()
    }

    // Forward x=1 and backward g so that dW = g, db = g.
    fn accumulate(net: &mut Network, g: f64) {
        let x = Tensor::new(vec![1.0], vec![1, 1]).unwrap();
        net.forward(&x, Mode::Train).unwrap();
        net.backward(&Tensor::new(vec![g], vec![1, 1]).unwrap()).unwrap();
    }

    fn params(net: &Network) -> (f64, f64) {
        let l = net.layers()[0].as_linear().unwrap();
        (l.weight().data()[0], l.bias().data()[0])
    }

    #[test]
    fn rejects_bad_hyperparams() {
        for (lr, momentum) in [(0.0, 0.0), (-1.0, 0.0), (f64::NAN, 0.0), (0.1, 1.0), (0.1, -0.1)] {
            assert!(matches!(
                Sgd::new(SgdConfig { lr, momentum }),
                Err(Error::Config(_))
            ));
        }
    }

    #[test]
    fn zero_momentum_is_plain_gradient_descent() {
        let mut net = one_unit_network(1.0, 2.0);
        let mut opt = Sgd::new(SgdConfig {
            lr: 0.1,
            momentum: 0.0,
        })
        .unwrap();

        accumulate(&mut net, 3.0);
        opt.step(&mut net).unwrap();
        let (w, b) = params(&net);
        assert!((w - (1.0 - 0.1 * 3.0)).abs() < 1e-12);
        assert!((b - (2.0 - 0.1 * 3.0)).abs() < 1e-12);
    }

    #[test]
    fn momentum_accumulates_across_steps() {
        let mut net = one_unit_network(0.0, 0.0);
        let mut opt = Sgd::new(SgdConfig {
            lr: 0.1,
            momentum: 0.5,
        })
        .unwrap();

        accumulate(&mut net, 1.0);
        opt.step(&mut net).unwrap();
        opt.zero_grad(&mut net);
        accumulate(&mut net, 1.0);
        opt.step(&mut net).unwrap();

        // M1 = 1, M2 = 0.5 + 1 = 1.5; P = -0.1 * (1 + 1.5).
        let (w, _) = params(&net);
        assert!((w + 0.25).abs() < 1e-12);
        assert!((opt.velocity()[0].data()[0] - 1.5).abs() < 1e-12);
    }

    #[test]
    fn zero_grad_clears_every_buffer() {
        let mut net = one_unit_network(1.0, 1.0);
        accumulate(&mut net, 2.0);
        let opt = Sgd::new(SgdConfig::default()).unwrap();
        opt.zero_grad(&mut net);
        assert!(net
            .gradients()
            .iter()
            .all(|g| g.data().iter().all(|&v| v == 0.0)));
    }

    #[test]
    fn mismatched_parameter_set_is_a_state_error() {
        let mut small = one_unit_network(1.0, 1.0);
        let mut big = Network::builder(3).linear(2).linear(2).build_with_seed(0).unwrap();
        let mut opt = Sgd::new(SgdConfig::default()).unwrap();
        opt.step(&mut small).unwrap();
        assert!(matches!(opt.step(&mut big), Err(Error::State(_))));
        assert!(matches!(opt.step_params(Vec::new()), Err(Error::State(_))));
    }
}
