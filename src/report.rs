//! Where epoch results and numerical warnings go.
//!
//! The training loop makes no assumption about how reports are displayed or
//! persisted; it just calls a [`Reporter`].

use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{EpochReport, Scalar, Split};

/// A non-finite value surfaced during a run.
///
/// Warnings never stop training.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum NumericalWarning {
    NonFiniteLoss {
        phase: Split,
        epoch: usize,
        batch: usize,
        value: Scalar,
    },
}

impl fmt::Display for NumericalWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NumericalWarning::NonFiniteLoss {
                phase,
                epoch,
                batch,
                value,
            } => write!(
                f,
                "non-finite {phase} loss {value} at epoch {epoch}, batch {batch}"
            ),
        }
    }
}

/// Receives one record per completed epoch.
pub trait Reporter {
    fn on_epoch(&mut self, report: &EpochReport);

    /// Called for every numerical warning. Default: ignore.
    fn on_warning(&mut self, _warning: &NumericalWarning) {}
}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn on_epoch(&mut self, report: &EpochReport) {
        (**self).on_epoch(report);
    }

    fn on_warning(&mut self, warning: &NumericalWarning) {
        (**self).on_warning(warning);
    }
}

/// Collects every epoch in memory.
impl Reporter for Vec<EpochReport> {
    fn on_epoch(&mut self, report: &EpochReport) {
        self.push(*report);
    }
}

/// Emits `tracing` events.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

impl Reporter for LogReporter {
    fn on_epoch(&mut self, r: &EpochReport) {
        tracing::info!(
            epoch = r.epoch,
            train_loss = r.train_loss,
            train_accuracy = r.train_accuracy,
            test_loss = r.test_loss,
            test_accuracy = r.test_accuracy,
            "Epoch {}: Train loss {:.5}, Train accuracy {:.2}%, Test loss {:.5}, Test accuracy {:.2}%",
            r.epoch,
            r.train_loss,
            r.train_accuracy,
            r.test_loss,
            r.test_accuracy,
        );
    }

    fn on_warning(&mut self, warning: &NumericalWarning) {
        tracing::warn!(%warning, "numerical instability");
    }
}

/// Writes one JSON object per epoch (JSON Lines), e.g. for external plotting.
///
/// Write errors do not interrupt training; the first one is kept and returned
/// by [`JsonLinesReporter::into_inner`].
#[cfg(feature = "serde")]
#[derive(Debug)]
pub struct JsonLinesReporter<W: std::io::Write> {
    writer: W,
    error: Option<std::io::Error>,
}

#[cfg(feature = "serde")]
impl<W: std::io::Write> JsonLinesReporter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            error: None,
        }
    }

    pub fn into_inner(self) -> std::io::Result<W> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.writer),
        }
    }

    fn write_line<T: Serialize>(&mut self, value: &T) {
        if self.error.is_some() {
            return;
        }
        let res = serde_json::to_writer(&mut self.writer, value)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"));
        if let Err(e) = res {
            tracing::warn!(error = %e, "failed to write json report");
            self.error = Some(e);
        }
    }
}

#[cfg(feature = "serde")]
impl<W: std::io::Write> Reporter for JsonLinesReporter<W> {
    fn on_epoch(&mut self, report: &EpochReport) {
        self.write_line(report);
    }

    fn on_warning(&mut self, warning: &NumericalWarning) {
        self.write_line(warning);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(epoch: usize) -> EpochReport {
        EpochReport {
            epoch,
            train_loss: 0.25,
            train_accuracy: 90.0,
            test_loss: 0.5,
            test_accuracy: 80.0,
        }
    }

    #[test]
    fn vec_reporter_collects_in_order() {
        let mut history: Vec<EpochReport> = Vec::new();
        {
            let r: &mut dyn Reporter = &mut history;
            r.on_epoch(&report(1));
            r.on_epoch(&report(2));
            r.on_warning(&NumericalWarning::NonFiniteLoss {
                phase: Split::Train,
                epoch: 2,
                batch: 0,
                value: f64::NAN,
            });
        }
        assert_eq!(history.iter().map(|r| r.epoch).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[test]
    fn warning_display_names_location() {
        let w = NumericalWarning::NonFiniteLoss {
            phase: Split::Test,
            epoch: 3,
            batch: 7,
            value: f64::INFINITY,
        };
        assert_eq!(w.to_string(), "non-finite test loss inf at epoch 3, batch 7");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_lines_reporter_writes_one_object_per_epoch() {
        let mut r = JsonLinesReporter::new(Vec::new());
        r.on_epoch(&report(1));
        r.on_epoch(&report(2));
        let out = String::from_utf8(r.into_inner().unwrap()).unwrap();
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        let back: EpochReport = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(back, report(2));
    }
}
