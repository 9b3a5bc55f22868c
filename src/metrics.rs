//! Epoch-level metrics.
//!
//! Metrics are evaluation helpers (they do not participate in backprop).
//! Accumulators are scoped to one phase of one epoch and passed explicitly
//! through the loop; nothing here is global.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, Result, Scalar, Tensor};

/// Loss and accuracy for one phase of one epoch.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PhaseStats {
    /// Mean of the per-batch mean losses.
    pub loss: Scalar,
    /// `100 * correct / total`.
    pub accuracy: Scalar,
}

/// One completed epoch. Appended to the history once, never mutated.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EpochReport {
    /// 1-based epoch index.
    pub epoch: usize,
    pub train_loss: Scalar,
    pub train_accuracy: Scalar,
    pub test_loss: Scalar,
    pub test_accuracy: Scalar,
}

impl EpochReport {
    pub fn new(epoch: usize, train: PhaseStats, test: PhaseStats) -> Self {
        Self {
            epoch,
            train_loss: train.loss,
            train_accuracy: train.accuracy,
            test_loss: test.loss,
            test_accuracy: test.accuracy,
        }
    }

    pub fn train(&self) -> PhaseStats {
        PhaseStats {
            loss: self.train_loss,
            accuracy: self.train_accuracy,
        }
    }

    pub fn test(&self) -> PhaseStats {
        PhaseStats {
            loss: self.test_loss,
            accuracy: self.test_accuracy,
        }
    }
}

/// Running sums for one phase.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMetrics {
    loss_sum: Scalar,
    batches: usize,
    correct: usize,
    total: usize,
}

impl RunningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one batch: its mean loss, how many predictions were right, and
    /// how many samples it held.
    pub fn update(&mut self, batch_loss: Scalar, correct: usize, samples: usize) {
        debug_assert!(correct <= samples);
        self.loss_sum += batch_loss;
        self.batches += 1;
        self.correct += correct;
        self.total += samples;
    }

    #[inline]
    pub fn batches(&self) -> usize {
        self.batches
    }

    #[inline]
    pub fn samples(&self) -> usize {
        self.total
    }

    #[inline]
    pub fn correct(&self) -> usize {
        self.correct
    }

    /// Fails with [`Error::State`] if no batch was recorded.
    pub fn finish(&self) -> Result<PhaseStats> {
        if self.batches == 0 || self.total == 0 {
            return Err(Error::State("phase produced no batches".to_owned()));
        }
        Ok(PhaseStats {
            loss: self.loss_sum / self.batches as Scalar,
            accuracy: 100.0 * self.correct as Scalar / self.total as Scalar,
        })
    }
}

/// Number of rows of `output` whose argmax equals the label.
pub fn count_correct(output: &Tensor, labels: &[usize]) -> Result<usize> {
    let preds = output.argmax_rows()?;
    if preds.len() != labels.len() {
        return Err(Error::Shape(format!(
            "{} predictions but {} labels",
            preds.len(),
            labels.len()
        )));
    }
    Ok(preds.iter().zip(labels).filter(|(p, l)| p == l).count())
}

/// `matrix[true][predicted]` counts.
pub fn confusion_matrix(
    predictions: &[usize],
    labels: &[usize],
    num_classes: usize,
) -> Result<Vec<Vec<usize>>> {
    if predictions.len() != labels.len() {
        return Err(Error::Shape(format!(
            "{} predictions but {} labels",
            predictions.len(),
            labels.len()
        )));
    }
    let mut cm = vec![vec![0; num_classes]; num_classes];
    for (&p, &t) in predictions.iter().zip(labels) {
        if p >= num_classes || t >= num_classes {
            return Err(Error::Shape(format!(
                "class pair ({t}, {p}) out of range for {num_classes} classes"
            )));
        }
        cm[t][p] += 1;
    }
    Ok(cm)
}
