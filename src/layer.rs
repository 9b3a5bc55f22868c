//! Layers with hand-written backward rules.
//!
//! Every layer maps a `[batch, in_dim]` tensor to a `[batch, out_dim]` tensor.
//! `forward` in [`Mode::Train`] caches what `backward` needs for exactly one
//! subsequent `backward` call; `backward` consumes that cache. Calling `backward`
//! without a recorded forward pass fails with [`Error::State`].
//!
//! `Linear` accumulates parameter gradients into its own buffers (it never
//! overwrites them), so callers must zero them before each batch.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::{Error, Init, Result, Scalar, Tensor};

/// Whether a forward pass should record state for a subsequent backward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Cache intermediates for backward.
    #[default]
    Train,
    /// Forward only; any previously recorded cache is dropped.
    Eval,
}

/// Layer description used by builders and string configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Linear { out_dim: usize },
    Relu,
    Sigmoid,
    Tanh,
    LogSoftmax,
}

impl FromStr for LayerKind {
    type Err = Error;

    /// Parses `linear:<out_dim>`, `relu`, `sigmoid`, `tanh` or `log_softmax`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        if let Some(width) = s.strip_prefix("linear:") {
            let out_dim: usize = width
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid linear width {width:?}")))?;
            if out_dim == 0 {
                return Err(Error::Config("linear width must be > 0".to_owned()));
            }
            return Ok(LayerKind::Linear { out_dim });
        }
        match s.as_str() {
            "relu" => Ok(LayerKind::Relu),
            "sigmoid" => Ok(LayerKind::Sigmoid),
            "tanh" => Ok(LayerKind::Tanh),
            "log_softmax" | "logsoftmax" => Ok(LayerKind::LogSoftmax),
            _ => Err(Error::Config(format!("unknown layer kind {s:?}"))),
        }
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayerKind::Linear { out_dim } => write!(f, "linear:{out_dim}"),
            LayerKind::Relu => f.write_str("relu"),
            LayerKind::Sigmoid => f.write_str("sigmoid"),
            LayerKind::Tanh => f.write_str("tanh"),
            LayerKind::LogSoftmax => f.write_str("log_softmax"),
        }
    }
}

/// A parameter tensor paired with its gradient buffer.
#[derive(Debug)]
pub struct ParamMut<'a> {
    pub value: &'a mut Tensor,
    pub grad: &'a Tensor,
}

/// Fully-connected layer: `output = input · weightᵀ + bias`.
#[derive(Debug, Clone)]
pub struct Linear {
    /// Shape `[out_dim, in_dim]`.
    weight: Tensor,
    /// Shape `[out_dim]`.
    bias: Tensor,
    grad_weight: Tensor,
    grad_bias: Tensor,
    input: Option<Tensor>,
}

impl Linear {
    pub fn new_with_rng<R: Rng + ?Sized>(
        in_dim: usize,
        out_dim: usize,
        init: Init,
        rng: &mut R,
    ) -> Result<Self> {
        let (weight, bias) = init.params(in_dim, out_dim, rng)?;
        Self::from_parts(weight, bias)
    }

    /// Build a layer from explicit parameters. Gradient buffers start at zero.
    pub fn from_parts(weight: Tensor, bias: Tensor) -> Result<Self> {
        let (out_dim, _) = weight.dims2()?;
        if bias.shape() != [out_dim] {
            return Err(Error::mismatch("linear bias", weight.shape(), bias.shape()));
        }
        Ok(Self {
            grad_weight: weight.zeros_like(),
            grad_bias: bias.zeros_like(),
            weight,
            bias,
            input: None,
        })
    }

    #[inline]
    pub fn in_dim(&self) -> usize {
        self.weight.shape()[1]
    }

    #[inline]
    pub fn out_dim(&self) -> usize {
        self.weight.shape()[0]
    }

    #[inline]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    #[inline]
    pub fn bias(&self) -> &Tensor {
        &self.bias
    }

    #[inline]
    pub fn grad_weight(&self) -> &Tensor {
        &self.grad_weight
    }

    #[inline]
    pub fn grad_bias(&self) -> &Tensor {
        &self.grad_bias
    }

    #[inline]
    pub fn weight_mut(&mut self) -> &mut Tensor {
        &mut self.weight
    }

    #[inline]
    pub fn bias_mut(&mut self) -> &mut Tensor {
        &mut self.bias
    }

    /// `[weight, bias]` with their gradient buffers.
    pub fn params_mut(&mut self) -> [ParamMut<'_>; 2] {
        let Linear {
            weight,
            bias,
            grad_weight,
            grad_bias,
            ..
        } = self;
        [
            ParamMut {
                value: weight,
                grad: grad_weight,
            },
            ParamMut {
                value: bias,
                grad: grad_bias,
            },
        ]
    }

    pub fn zero_grad(&mut self) {
        self.grad_weight.fill_zero();
        self.grad_bias.fill_zero();
    }

    pub fn apply(&self, input: &Tensor) -> Result<Tensor> {
        let (_, cols) = input.dims2()?;
        if cols != self.in_dim() {
            return Err(Error::mismatch("linear", input.shape(), self.weight.shape()));
        }
        input.matmul_t(&self.weight)?.add_row_vector(&self.bias)
    }

    pub fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        let out = self.apply(input)?;
        self.input = match mode {
            Mode::Train => Some(input.clone()),
            Mode::Eval => None,
        };
        Ok(out)
    }

    /// Returns `dL/d(input)` and accumulates `dL/d(weight)` and `dL/d(bias)`.
    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = self.input.take().ok_or_else(Error::no_forward)?;
        let (batch, _) = input.dims2()?;
        if grad_output.shape() != [batch, self.out_dim()] {
            return Err(Error::mismatch(
                "linear backward",
                grad_output.shape(),
                &[batch, self.out_dim()],
            ));
        }

        let grad_input = grad_output.matmul(&self.weight)?;
        self.grad_weight.axpy(1.0, &grad_output.t_matmul(&input)?)?;
        self.grad_bias.axpy(1.0, &grad_output.sum_rows()?)?;
        Ok(grad_input)
    }
}

fn take_cache(cache: &mut Option<Tensor>, grad_output: &Tensor, op: &str) -> Result<Tensor> {
    let cached = cache.take().ok_or_else(Error::no_forward)?;
    if cached.shape() != grad_output.shape() {
        return Err(Error::mismatch(op, grad_output.shape(), cached.shape()));
    }
    Ok(cached)
}

fn record(cache: &mut Option<Tensor>, value: &Tensor, mode: Mode) {
    *cache = match mode {
        Mode::Train => Some(value.clone()),
        Mode::Eval => None,
    };
}

/// `max(0, x)` element-wise. The derivative at exactly 0 is 0.
#[derive(Debug, Clone, Default)]
pub struct Relu {
    input: Option<Tensor>,
}

impl Relu {
    pub fn apply(&self, input: &Tensor) -> Result<Tensor> {
        Ok(input.map(|x| if x > 0.0 { x } else { 0.0 }))
    }

    pub fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        let out = self.apply(input)?;
        record(&mut self.input, input, mode);
        Ok(out)
    }

    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let input = take_cache(&mut self.input, grad_output, "relu backward")?;
        let mut grad = grad_output.clone();
        for (g, &x) in grad.data_mut().iter_mut().zip(input.data()) {
            if x <= 0.0 {
                *g = 0.0;
            }
        }
        Ok(grad)
    }
}

/// Logistic sigmoid. Backward uses the cached output: `g * y * (1 - y)`.
#[derive(Debug, Clone, Default)]
pub struct Sigmoid {
    output: Option<Tensor>,
}

impl Sigmoid {
    pub fn apply(&self, input: &Tensor) -> Result<Tensor> {
        Ok(input.map(sigmoid))
    }

    pub fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        let out = self.apply(input)?;
        record(&mut self.output, &out, mode);
        Ok(out)
    }

    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let y = take_cache(&mut self.output, grad_output, "sigmoid backward")?;
        let mut grad = grad_output.clone();
        for (g, &y) in grad.data_mut().iter_mut().zip(y.data()) {
            *g *= y * (1.0 - y);
        }
        Ok(grad)
    }
}

/// Hyperbolic tangent. Backward uses the cached output: `g * (1 - y^2)`.
#[derive(Debug, Clone, Default)]
pub struct Tanh {
    output: Option<Tensor>,
}

impl Tanh {
    pub fn apply(&self, input: &Tensor) -> Result<Tensor> {
        Ok(input.map(Scalar::tanh))
    }

    pub fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        let out = self.apply(input)?;
        record(&mut self.output, &out, mode);
        Ok(out)
    }

    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let y = take_cache(&mut self.output, grad_output, "tanh backward")?;
        let mut grad = grad_output.clone();
        for (g, &y) in grad.data_mut().iter_mut().zip(y.data()) {
            *g *= 1.0 - y * y;
        }
        Ok(grad)
    }
}

/// Row-wise log-softmax over the class dimension.
///
/// `output = x - rowMax - ln(sum(exp(x - rowMax)))`, so every row of
/// `exp(output)` sums to 1.
#[derive(Debug, Clone, Default)]
pub struct LogSoftmax {
    output: Option<Tensor>,
}

impl LogSoftmax {
    pub fn apply(&self, input: &Tensor) -> Result<Tensor> {
        let (_, cols) = input.dims2()?;
        let mut out = input.clone();
        for row in out.data_mut().chunks_exact_mut(cols) {
            let lse = log_sum_exp(row);
            for v in row.iter_mut() {
                *v -= lse;
            }
        }
        Ok(out)
    }

    pub fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        let out = self.apply(input)?;
        record(&mut self.output, &out, mode);
        Ok(out)
    }

    /// `grad_input = g - softmax(x) * rowSum(g)`.
    ///
    /// Composed with NLL (`g = -oneHot / batch`) this is
    /// `(softmax(x) - oneHot) / batch`.
    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        let out = take_cache(&mut self.output, grad_output, "log_softmax backward")?;
        let (_, cols) = out.dims2()?;
        let mut grad = grad_output.clone();
        for (g_row, y_row) in grad
            .data_mut()
            .chunks_exact_mut(cols)
            .zip(out.data().chunks_exact(cols))
        {
            let g_sum: Scalar = g_row.iter().sum();
            for (g, &y) in g_row.iter_mut().zip(y_row) {
                *g -= y.exp() * g_sum;
            }
        }
        Ok(grad)
    }
}

/// A network layer.
#[derive(Debug, Clone)]
pub enum Layer {
    Linear(Linear),
    Relu(Relu),
    Sigmoid(Sigmoid),
    Tanh(Tanh),
    LogSoftmax(LogSoftmax),
}

impl Layer {
    /// Build a layer of `kind` that consumes `in_dim` features.
    pub fn from_kind<R: Rng + ?Sized>(
        kind: LayerKind,
        in_dim: usize,
        init: Init,
        rng: &mut R,
    ) -> Result<Self> {
        Ok(match kind {
            LayerKind::Linear { out_dim } => {
                Layer::Linear(Linear::new_with_rng(in_dim, out_dim, init, rng)?)
            }
            LayerKind::Relu => Layer::Relu(Relu::default()),
            LayerKind::Sigmoid => Layer::Sigmoid(Sigmoid::default()),
            LayerKind::Tanh => Layer::Tanh(Tanh::default()),
            LayerKind::LogSoftmax => Layer::LogSoftmax(LogSoftmax::default()),
        })
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Layer::Linear(l) => LayerKind::Linear {
                out_dim: l.out_dim(),
            },
            Layer::Relu(_) => LayerKind::Relu,
            Layer::Sigmoid(_) => LayerKind::Sigmoid,
            Layer::Tanh(_) => LayerKind::Tanh,
            Layer::LogSoftmax(_) => LayerKind::LogSoftmax,
        }
    }

    /// Output width for an input of width `in_dim`.
    pub fn out_dim(&self, in_dim: usize) -> usize {
        match self {
            Layer::Linear(l) => l.out_dim(),
            _ => in_dim,
        }
    }

    pub fn as_linear(&self) -> Option<&Linear> {
        match self {
            Layer::Linear(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_linear_mut(&mut self) -> Option<&mut Linear> {
        match self {
            Layer::Linear(l) => Some(l),
            _ => None,
        }
    }

    /// Forward pass without touching any cache.
    pub fn apply(&self, input: &Tensor) -> Result<Tensor> {
        match self {
            Layer::Linear(l) => l.apply(input),
            Layer::Relu(l) => l.apply(input),
            Layer::Sigmoid(l) => l.apply(input),
            Layer::Tanh(l) => l.apply(input),
            Layer::LogSoftmax(l) => l.apply(input),
        }
    }

    pub fn forward(&mut self, input: &Tensor, mode: Mode) -> Result<Tensor> {
        match self {
            Layer::Linear(l) => l.forward(input, mode),
            Layer::Relu(l) => l.forward(input, mode),
            Layer::Sigmoid(l) => l.forward(input, mode),
            Layer::Tanh(l) => l.forward(input, mode),
            Layer::LogSoftmax(l) => l.forward(input, mode),
        }
    }

    pub fn backward(&mut self, grad_output: &Tensor) -> Result<Tensor> {
        match self {
            Layer::Linear(l) => l.backward(grad_output),
            Layer::Relu(l) => l.backward(grad_output),
            Layer::Sigmoid(l) => l.backward(grad_output),
            Layer::Tanh(l) => l.backward(grad_output),
            Layer::LogSoftmax(l) => l.backward(grad_output),
        }
    }

    pub fn zero_grad(&mut self) {
        if let Layer::Linear(l) = self {
            l.zero_grad();
        }
    }
}

#[inline]
fn sigmoid(x: Scalar) -> Scalar {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

/// `ln(sum(exp(xs)))`, shifted by the max for stability.
#[inline]
pub(crate) fn log_sum_exp(xs: &[Scalar]) -> Scalar {
    let max_x = xs.iter().copied().fold(Scalar::NEG_INFINITY, Scalar::max);
    if !max_x.is_finite() {
        return max_x;
    }
    let sum_exp: Scalar = xs.iter().map(|&x| (x - max_x).exp()).sum();
    max_x + sum_exp.ln()
}
