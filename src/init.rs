//! Weight initialization for `Linear` layers.

use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::{Error, Result, Scalar, Tensor};

/// Parameter initialization scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Init {
    /// All weights and biases are zero.
    Zeros,
    /// Weights ~ U[0, 1), biases ~ U[-0.01, 0.01].
    Uniform,
    /// Glorot normal: weights ~ N(0, sqrt(2 / (fan_in + fan_out))), small uniform biases.
    Xavier,
    /// Kaiming normal: weights ~ N(0, sqrt(2 / fan_in)), zero biases.
    He,
    /// Weights and biases ~ U[-1/sqrt(fan_in), 1/sqrt(fan_in)].
    #[default]
    FanInUniform,
}

const BIAS_JITTER: Scalar = 0.01;

impl Init {
    /// Draw a `[out_dim, in_dim]` weight matrix and a `[out_dim]` bias vector.
    pub fn params<R: Rng + ?Sized>(
        self,
        in_dim: usize,
        out_dim: usize,
        rng: &mut R,
    ) -> Result<(Tensor, Tensor)> {
        if in_dim == 0 || out_dim == 0 {
            return Err(Error::Config(format!(
                "layer dims must be > 0, got in_dim={in_dim} out_dim={out_dim}"
            )));
        }

        let mut weight = Tensor::zeros(&[out_dim, in_dim])?;
        let mut bias = Tensor::zeros(&[out_dim])?;

        match self {
            Init::Zeros => {}
            Init::Uniform => {
                fill_uniform(weight.data_mut(), 0.0, 1.0, rng);
                fill_uniform(bias.data_mut(), -BIAS_JITTER, BIAS_JITTER, rng);
            }
            Init::Xavier => {
                let std = (2.0 / (in_dim + out_dim) as Scalar).sqrt();
                fill_normal(weight.data_mut(), std, rng)?;
                fill_uniform(bias.data_mut(), -BIAS_JITTER, BIAS_JITTER, rng);
            }
            Init::He => {
                let std = (2.0 / in_dim as Scalar).sqrt();
                fill_normal(weight.data_mut(), std, rng)?;
            }
            Init::FanInUniform => {
                let bound = 1.0 / (in_dim as Scalar).sqrt();
                fill_uniform(weight.data_mut(), -bound, bound, rng);
                fill_uniform(bias.data_mut(), -bound, bound, rng);
            }
        }

        Ok((weight, bias))
    }
}

fn fill_uniform<R: Rng + ?Sized>(buf: &mut [Scalar], low: Scalar, high: Scalar, rng: &mut R) {
    for v in buf {
        *v = rng.gen_range(low..high);
    }
}

fn fill_normal<R: Rng + ?Sized>(buf: &mut [Scalar], std: Scalar, rng: &mut R) -> Result<()> {
    let normal = Normal::new(0.0, std)
        .map_err(|e| Error::Config(format!("invalid normal std {std}: {e}")))?;
    for v in buf {
        *v = normal.sample(rng);
    }
    Ok(())
}
