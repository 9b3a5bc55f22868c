//! Classification losses.
//!
//! Each loss takes the network's final output `[batch, classes]` plus integer
//! labels and returns the mean loss over the batch together with
//! `dL/d(output)`. Labels are validated before any tensor is read, so a bad
//! label never reaches the arithmetic.

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::layer::log_sum_exp;
use crate::{Error, Result, Scalar, Tensor};

/// Supported loss functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Loss {
    /// Softmax cross-entropy over raw logits.
    ///
    /// Use this when the last layer is `Linear`.
    CrossEntropy,
    /// Negative log-likelihood over log-probabilities.
    ///
    /// Use this when the last layer is `LogSoftmax`.
    #[default]
    Nll,
    /// Mean squared error against one-hot targets.
    Mse,
}

impl FromStr for Loss {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cross_entropy" | "crossentropy" | "ce" => Ok(Loss::CrossEntropy),
            "nll" => Ok(Loss::Nll),
            "mse" => Ok(Loss::Mse),
            other => Err(Error::Config(format!("unknown loss {other:?}"))),
        }
    }
}

impl fmt::Display for Loss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Loss::CrossEntropy => "cross_entropy",
            Loss::Nll => "nll",
            Loss::Mse => "mse",
        })
    }
}

/// Checks that `output` is `[labels.len(), classes]` and every label is
/// `< classes`. Returns `(batch, classes)`.
pub fn validate_labels(output: &Tensor, labels: &[usize]) -> Result<(usize, usize)> {
    let (batch, classes) = output.dims2()?;
    if batch != labels.len() {
        return Err(Error::Shape(format!(
            "output has {batch} rows but {} labels were given",
            labels.len()
        )));
    }
    if let Some((i, &label)) = labels.iter().enumerate().find(|&(_, &l)| l >= classes) {
        return Err(Error::Shape(format!(
            "label {label} at index {i} is out of range for {classes} classes"
        )));
    }
    Ok((batch, classes))
}

impl Loss {
    /// Mean loss over the batch.
    pub fn forward(self, output: &Tensor, labels: &[usize]) -> Result<Scalar> {
        let (batch, classes) = validate_labels(output, labels)?;
        let inv_b = 1.0 / batch as Scalar;

        let total: Scalar = match self {
            Loss::CrossEntropy => output
                .data()
                .chunks_exact(classes)
                .zip(labels)
                .map(|(row, &y)| log_sum_exp(row) - row[y])
                .sum(),
            Loss::Nll => output
                .data()
                .chunks_exact(classes)
                .zip(labels)
                .map(|(row, &y)| -row[y])
                .sum(),
            Loss::Mse => {
                let sq: Scalar = output
                    .data()
                    .chunks_exact(classes)
                    .zip(labels)
                    .map(|(row, &y)| {
                        row.iter()
                            .enumerate()
                            .map(|(j, &o)| {
                                let d = o - one_hot(j, y);
                                d * d
                            })
                            .sum::<Scalar>()
                    })
                    .sum();
                return Ok(sq * inv_b / classes as Scalar);
            }
        };
        Ok(total * inv_b)
    }

    /// `dL/d(output)` for the mean-reduced loss.
    pub fn backward(self, output: &Tensor, labels: &[usize]) -> Result<Tensor> {
        let (batch, classes) = validate_labels(output, labels)?;
        let inv_b = 1.0 / batch as Scalar;
        let mut grad = output.zeros_like();

        let rows = grad
            .data_mut()
            .chunks_exact_mut(classes)
            .zip(output.data().chunks_exact(classes))
            .zip(labels);

        match self {
            Loss::CrossEntropy => {
                for ((g_row, x_row), &y) in rows {
                    let lse = log_sum_exp(x_row);
                    for (j, (g, &x)) in g_row.iter_mut().zip(x_row).enumerate() {
                        *g = ((x - lse).exp() - one_hot(j, y)) * inv_b;
                    }
                }
            }
            Loss::Nll => {
                for ((g_row, _), &y) in rows {
                    g_row[y] = -inv_b;
                }
            }
            Loss::Mse => {
                let scale = 2.0 * inv_b / classes as Scalar;
                for ((g_row, o_row), &y) in rows {
                    for (j, (g, &o)) in g_row.iter_mut().zip(o_row).enumerate() {
                        *g = scale * (o - one_hot(j, y));
                    }
                }
            }
        }
        Ok(grad)
    }

    /// Loss value and gradient in one call.
    pub fn forward_backward(self, output: &Tensor, labels: &[usize]) -> Result<(Scalar, Tensor)> {
        Ok((self.forward(output, labels)?, self.backward(output, labels)?))
    }
}

#[inline]
fn one_hot(j: usize, label: usize) -> Scalar {
    if j == label {
        1.0
    } else {
        0.0
    }
}
