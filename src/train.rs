//! Epoch loop: alternate one training pass and one evaluation pass per epoch.
//!
//! ```text
//! Idle -> Training{1} -> Evaluating{1} -> Training{2} -> ... -> Done
//! ```
//!
//! Training batches run `zero_grad -> forward -> loss -> backward -> step`.
//! Evaluation batches run the forward pass and the loss only; they never touch
//! gradients, caches, or momentum. A [`StopHandle`] is checked between batches;
//! when it fires, the partial epoch is discarded and the trainer moves to
//! `Done`.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::data::{Batch, DataSource, Split};
use crate::layer::Mode;
use crate::metrics::{PhaseStats, RunningMetrics, count_correct};
use crate::report::{NumericalWarning, Reporter};
use crate::{EpochReport, Error, Loss, Network, Result, Scalar, Sgd, SgdConfig};

/// Training hyperparameters.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrainConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub test_batch_size: usize,
    /// Reshuffle the training split every epoch.
    pub shuffle: bool,
    pub loss: Loss,
    pub optimizer: SgdConfig,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 10,
            batch_size: 64,
            test_batch_size: 1000,
            shuffle: true,
            loss: Loss::Nll,
            optimizer: SgdConfig::default(),
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(Error::Config("epochs must be > 0".to_owned()));
        }
        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be > 0".to_owned()));
        }
        if self.test_batch_size == 0 {
            return Err(Error::Config("test_batch_size must be > 0".to_owned()));
        }
        self.optimizer.validate()
    }

    /// Parse and validate a JSON config. Missing fields take their defaults.
    #[cfg(feature = "serde")]
    pub fn from_json_str(json: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid train config: {e}")))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Where the trainer is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Training {
        epoch: usize,
    },
    Evaluating {
        epoch: usize,
    },
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => f.write_str("idle"),
            Phase::Training { epoch } => write!(f, "training epoch {epoch}"),
            Phase::Evaluating { epoch } => write!(f, "evaluating epoch {epoch}"),
            Phase::Done => f.write_str("done"),
        }
    }
}

/// Cooperative cancellation flag, shareable across threads.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the run to stop at the next batch boundary.
    pub fn request_stop(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of [`Trainer::fit`].
#[derive(Debug, Clone, PartialEq)]
pub struct FitReport {
    /// Completed epochs, in order.
    pub epochs: Vec<EpochReport>,
    /// `true` if a stop request cut the run short.
    pub stopped: bool,
    pub warnings: Vec<NumericalWarning>,
}

impl FitReport {
    pub fn last(&self) -> Option<&EpochReport> {
        self.epochs.last()
    }
}

/// Outcome of a forward-only pass over one split.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EvalReport {
    pub loss: Scalar,
    /// Percent of samples classified correctly.
    pub accuracy: Scalar,
    pub samples: usize,
}

/// Owns a network and its optimizer and drives them through epochs.
#[derive(Debug)]
pub struct Trainer {
    network: Network,
    optimizer: Sgd,
    config: TrainConfig,
    phase: Phase,
    history: Vec<EpochReport>,
    stop: StopHandle,
}

impl Trainer {
    pub fn new(network: Network, config: TrainConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            optimizer: Sgd::new(config.optimizer)?,
            network,
            config,
            phase: Phase::Idle,
            history: Vec::new(),
            stop: StopHandle::new(),
        })
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Completed epochs so far. Append-only.
    #[inline]
    pub fn history(&self) -> &[EpochReport] {
        &self.history
    }

    #[inline]
    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    #[inline]
    pub fn network(&self) -> &Network {
        &self.network
    }

    #[inline]
    pub fn optimizer(&self) -> &Sgd {
        &self.optimizer
    }

    pub fn into_network(self) -> Network {
        self.network
    }

    /// A handle that stops this trainer at the next batch boundary.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// One optimization step. Returns the batch's mean loss and how many of its
    /// predictions were correct (measured before the update).
    pub fn train_batch(&mut self, batch: &Batch) -> Result<(Scalar, usize)> {
        check_labels(&self.network, batch)?;

        self.optimizer.zero_grad(&mut self.network);
        let output = self.network.forward(batch.inputs(), Mode::Train)?;
        let (loss, grad) = self.config.loss.forward_backward(&output, batch.labels())?;
        self.network.backward(&grad)?;
        self.optimizer.step(&mut self.network)?;

        Ok((loss, count_correct(&output, batch.labels())?))
    }

    /// Forward-only loss and correct count for one batch.
    pub fn eval_batch(&self, batch: &Batch) -> Result<(Scalar, usize)> {
        eval_batch(&self.network, self.config.loss, batch)
    }

    /// Run every configured epoch, reporting each one to `reporter`.
    ///
    /// Can be called once; afterwards the trainer is `Done`. An error aborts
    /// the run and also leaves the trainer `Done`.
    pub fn fit<S, R>(&mut self, source: &mut S, reporter: &mut R) -> Result<FitReport>
    where
        S: DataSource + ?Sized,
        R: Reporter + ?Sized,
    {
        if self.phase != Phase::Idle {
            return Err(Error::State(format!("cannot fit while {}", self.phase)));
        }

        let span = info_span!(
            "fit",
            epochs = self.config.epochs,
            batch_size = self.config.batch_size,
            lr = self.config.optimizer.lr,
            momentum = self.config.optimizer.momentum,
        );
        let _enter = span.enter();

        let mut warnings = Vec::new();
        let result = self.run_epochs(source, reporter, &mut warnings);
        self.phase = Phase::Done;
        let stopped = result?;

        Ok(FitReport {
            epochs: self.history.clone(),
            stopped,
            warnings,
        })
    }

    // Returns whether a stop request ended the run.
    fn run_epochs<S, R>(
        &mut self,
        source: &mut S,
        reporter: &mut R,
        warnings: &mut Vec<NumericalWarning>,
    ) -> Result<bool>
    where
        S: DataSource + ?Sized,
        R: Reporter + ?Sized,
    {
        for epoch in 1..=self.config.epochs {
            self.phase = Phase::Training { epoch };
            let Some(train) = self.train_epoch(source, reporter, warnings, epoch)? else {
                info!(epoch, "stop requested during training; epoch discarded");
                return Ok(true);
            };

            self.phase = Phase::Evaluating { epoch };
            let Some(test) = self.eval_epoch(source, reporter, warnings, epoch)? else {
                info!(epoch, "stop requested during evaluation; epoch discarded");
                return Ok(true);
            };

            let report = EpochReport::new(epoch, train, test);
            info!(
                epoch,
                train_loss = report.train_loss,
                train_accuracy = report.train_accuracy,
                test_loss = report.test_loss,
                test_accuracy = report.test_accuracy,
                "epoch complete"
            );
            self.history.push(report);
            reporter.on_epoch(&report);
        }
        Ok(false)
    }

    fn train_epoch<S, R>(
        &mut self,
        source: &mut S,
        reporter: &mut R,
        warnings: &mut Vec<NumericalWarning>,
        epoch: usize,
    ) -> Result<Option<PhaseStats>>
    where
        S: DataSource + ?Sized,
        R: Reporter + ?Sized,
    {
        let mut metrics = RunningMetrics::new();
        let batches =
            source.iter_batches(Split::Train, self.config.batch_size, self.config.shuffle)?;
        for (idx, batch) in batches.enumerate() {
            if self.stop.is_stop_requested() {
                return Ok(None);
            }
            let batch = batch?;
            let (loss, correct) = self.train_batch(&batch)?;
            debug!(epoch, batch = idx, loss, "train batch");
            check_loss(Split::Train, epoch, idx, loss, reporter, warnings);
            metrics.update(loss, correct, batch.len());
        }
        metrics.finish().map(Some)
    }

    fn eval_epoch<S, R>(
        &self,
        source: &mut S,
        reporter: &mut R,
        warnings: &mut Vec<NumericalWarning>,
        epoch: usize,
    ) -> Result<Option<PhaseStats>>
    where
        S: DataSource + ?Sized,
        R: Reporter + ?Sized,
    {
        let mut metrics = RunningMetrics::new();
        let batches = source.iter_batches(Split::Test, self.config.test_batch_size, false)?;
        for (idx, batch) in batches.enumerate() {
            if self.stop.is_stop_requested() {
                return Ok(None);
            }
            let batch = batch?;
            let (loss, correct) = self.eval_batch(&batch)?;
            debug!(epoch, batch = idx, loss, "eval batch");
            check_loss(Split::Test, epoch, idx, loss, reporter, warnings);
            metrics.update(loss, correct, batch.len());
        }
        metrics.finish().map(Some)
    }
}

/// Forward-only pass of `network` over one split of `source`.
///
/// Takes the network by shared reference: evaluation cannot change
/// parameters, gradients, or layer caches.
pub fn evaluate<S: DataSource + ?Sized>(
    network: &Network,
    source: &mut S,
    split: Split,
    batch_size: usize,
    loss: Loss,
) -> Result<EvalReport> {
    let mut metrics = RunningMetrics::new();
    for batch in source.iter_batches(split, batch_size, false)? {
        let batch = batch?;
        let (batch_loss, correct) = eval_batch(network, loss, &batch)?;
        if !batch_loss.is_finite() {
            warn!(%split, loss = batch_loss, "non-finite loss during evaluation");
        }
        metrics.update(batch_loss, correct, batch.len());
    }
    let stats = metrics.finish()?;
    Ok(EvalReport {
        loss: stats.loss,
        accuracy: stats.accuracy,
        samples: metrics.samples(),
    })
}

fn eval_batch(network: &Network, loss: Loss, batch: &Batch) -> Result<(Scalar, usize)> {
    check_labels(network, batch)?;
    let output = network.apply(batch.inputs())?;
    let value = loss.forward(&output, batch.labels())?;
    Ok((value, count_correct(&output, batch.labels())?))
}

// Label range is checked against the network's class count before the batch
// reaches any tensor op.
fn check_labels(network: &Network, batch: &Batch) -> Result<()> {
    let classes = network.output_dim();
    if let Some((i, &label)) = batch
        .labels()
        .iter()
        .enumerate()
        .find(|&(_, &l)| l >= classes)
    {
        return Err(Error::Shape(format!(
            "label {label} at index {i} is out of range for {classes} classes"
        )));
    }
    Ok(())
}

fn check_loss<R: Reporter + ?Sized>(
    phase: Split,
    epoch: usize,
    batch: usize,
    value: Scalar,
    reporter: &mut R,
    warnings: &mut Vec<NumericalWarning>,
) {
    if value.is_finite() {
        return;
    }
    let warning = NumericalWarning::NonFiniteLoss {
        phase,
        epoch,
        batch,
        value,
    };
    warn!(%warning, "numerical instability");
    reporter.on_warning(&warning);
    warnings.push(warning);
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::data::{Dataset, InMemorySource, blobs};
    use crate::layer::{Layer, Linear};
    use crate::Tensor;

    fn source() -> InMemorySource {
        let centers = [vec![-2.0, -2.0], vec![2.0, 2.0]];
        let train = blobs(&centers, 32, 0.5, 1).unwrap();
        let test = blobs(&centers, 8, 0.5, 2).unwrap();
        InMemorySource::new(train, test, 0).unwrap()
    }

    fn network() -> Network {
        Network::builder(2)
            .linear(4)
            .relu()
            .linear(2)
            .log_softmax()
            .build_with_seed(0)
            .unwrap()
    }

    fn config(epochs: usize) -> TrainConfig {
        TrainConfig {
            epochs,
            batch_size: 8,
            test_batch_size: 16,
            optimizer: SgdConfig {
                lr: 0.1,
                momentum: 0.5,
            },
            ..TrainConfig::default()
        }
    }

    // Requests a stop once the `arm_on_call`-th pass over `split` has yielded
    // `after` batches.
    struct StoppingSource {
        inner: InMemorySource,
        stop: StopHandle,
        split: Split,
        arm_on_call: usize,
        after: usize,
        calls: usize,
    }

    impl StoppingSource {
        fn new(stop: StopHandle, split: Split, arm_on_call: usize, after: usize) -> Self {
            Self {
                inner: source(),
                stop,
                split,
                arm_on_call,
                after,
                calls: 0,
            }
        }
    }

    impl DataSource for StoppingSource {
        fn iter_batches(
            &mut self,
            split: Split,
            batch_size: usize,
            shuffle: bool,
        ) -> Result<crate::data::BatchIter<'_>> {
            if split == self.split {
                self.calls += 1;
            }
            let armed = split == self.split && self.calls == self.arm_on_call;
            let after = self.after;
            let stop = self.stop.clone();
            let it = self.inner.iter_batches(split, batch_size, shuffle)?;
            Ok(Box::new(it.enumerate().map(move |(i, b)| {
                if armed && i + 1 >= after {
                    stop.request_stop();
                }
                b
            })))
        }
    }

    #[test]
    fn config_validation() {
        assert!(TrainConfig::default().validate().is_ok());
        for bad in [
            TrainConfig {
                epochs: 0,
                ..TrainConfig::default()
            },
            TrainConfig {
                batch_size: 0,
                ..TrainConfig::default()
            },
            TrainConfig {
                test_batch_size: 0,
                ..TrainConfig::default()
            },
        ] {
            assert!(matches!(bad.validate(), Err(Error::Config(_))));
            assert!(matches!(Trainer::new(network(), bad), Err(Error::Config(_))));
        }
    }

    #[test]
    fn fit_walks_phases_and_records_history() {
        let mut trainer = Trainer::new(network(), config(3)).unwrap();
        assert_eq!(trainer.phase(), Phase::Idle);

        let mut reported: Vec<EpochReport> = Vec::new();
        let report = trainer.fit(&mut source(), &mut reported).unwrap();

        assert_eq!(trainer.phase(), Phase::Done);
        assert!(!report.stopped);
        assert_eq!(report.epochs.len(), 3);
        assert_eq!(reported, report.epochs);
        assert_eq!(trainer.history(), &report.epochs[..]);
        assert_eq!(
            report.epochs.iter().map(|r| r.epoch).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(matches!(
            trainer.fit(&mut source(), &mut reported),
            Err(Error::State(_))
        ));
    }

    #[test]
    fn stop_during_training_discards_partial_epoch() {
        let mut trainer = Trainer::new(network(), config(5)).unwrap();
        let mut src = StoppingSource::new(trainer.stop_handle(), Split::Train, 1, 3);
        let mut reported: Vec<EpochReport> = Vec::new();
        let report = trainer.fit(&mut src, &mut reported).unwrap();
        assert!(report.stopped);
        assert!(report.epochs.is_empty());
        assert!(reported.is_empty());
        assert_eq!(trainer.phase(), Phase::Done);
    }

    #[test]
    fn stop_during_evaluation_keeps_completed_epochs_only() {
        let cfg = TrainConfig {
            test_batch_size: 4,
            ..config(5)
        };
        let mut trainer = Trainer::new(network(), cfg).unwrap();
        // Second evaluation pass stops after two of its four batches.
        let mut src = StoppingSource::new(trainer.stop_handle(), Split::Test, 2, 2);
        let mut reported: Vec<EpochReport> = Vec::new();
        let report = trainer.fit(&mut src, &mut reported).unwrap();
        assert!(report.stopped);
        assert_eq!(report.epochs.len(), 1);
        assert_eq!(reported, report.epochs);
        assert_eq!(trainer.history().len(), 1);
        assert_eq!(trainer.phase(), Phase::Done);
    }

    #[test]
    fn stop_before_fit_runs_nothing() {
        let mut trainer = Trainer::new(network(), config(2)).unwrap();
        trainer.stop_handle().request_stop();
        let report = trainer.fit(&mut source(), &mut Vec::<EpochReport>::new()).unwrap();
        assert!(report.stopped);
        assert!(report.epochs.is_empty());
    }

    #[test]
    fn eval_batch_leaves_network_untouched() {
        let mut trainer = Trainer::new(network(), config(1)).unwrap();
        let mut src = source();
        let batch = src
            .iter_batches(Split::Train, 8, false)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        trainer.train_batch(&batch).unwrap();

        let before = format!("{:?}", trainer.network());
        let velocity = trainer.optimizer().velocity().to_vec();
        trainer.eval_batch(&batch).unwrap();
        evaluate(trainer.network(), &mut src, Split::Test, 4, Loss::Nll).unwrap();
        assert_eq!(format!("{:?}", trainer.network()), before);
        assert_eq!(trainer.optimizer().velocity(), &velocity[..]);
    }

    #[test]
    fn bad_label_fails_before_forward() {
        let mut trainer = Trainer::new(network(), config(1)).unwrap();
        let batch = Batch::new(Tensor::zeros(&[2, 2]).unwrap(), vec![0, 2]).unwrap();
        let before = format!("{:?}", trainer.network());
        assert!(matches!(trainer.train_batch(&batch), Err(Error::Shape(_))));
        assert_eq!(format!("{:?}", trainer.network()), before);
    }

    #[test]
    fn non_finite_loss_is_reported_but_training_continues() {
        // A NaN weight poisons every output, so every loss is NaN.
        let weight = Tensor::new(vec![f64::NAN, 0.0, 0.0, 0.0], vec![2, 2]).unwrap();
        let linear = Linear::from_parts(weight, Tensor::zeros(&[2]).unwrap()).unwrap();
        let net = Network::from_layers(vec![
            Layer::Linear(linear),
            Layer::LogSoftmax(Default::default()),
        ])
        .unwrap();

        struct Count(usize);
        impl Reporter for Count {
            fn on_epoch(&mut self, _: &EpochReport) {}
            fn on_warning(&mut self, _: &NumericalWarning) {
                self.0 += 1;
            }
        }

        let mut trainer = Trainer::new(net, config(2)).unwrap();
        let mut count = Count(0);
        let report = trainer.fit(&mut source(), &mut count).unwrap();
        assert_eq!(report.epochs.len(), 2);
        assert!(report.epochs[0].train_loss.is_nan());
        // 8 train batches + 1 test batch per epoch.
        assert_eq!(report.warnings.len(), 2 * (8 + 1));
        assert_eq!(count.0, report.warnings.len());
    }

    #[test]
    fn evaluate_reports_samples_and_percent_accuracy() {
        let rows = [vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 0.0]];
        let ds = Dataset::from_rows(&rows, &[0, 1, 1], 2).unwrap();
        let mut src = InMemorySource::new(ds.clone(), ds, 0).unwrap();
        let identity = Linear::from_parts(
            Tensor::new(vec![1.0, 0.0, 0.0, 1.0], vec![2, 2]).unwrap(),
            Tensor::zeros(&[2]).unwrap(),
        )
        .unwrap();
        let net = Network::from_layers(vec![Layer::Linear(identity)]).unwrap();
        let r = evaluate(&net, &mut src, Split::Test, 2, Loss::CrossEntropy).unwrap();
        assert_eq!(r.samples, 3);
        assert!((r.accuracy - 200.0 / 3.0).abs() < 1e-9);
        assert!(r.loss.is_finite());
    }

    #[cfg(feature = "serde")]
    #[test]
    fn json_config_fills_defaults_and_validates() {
        let cfg = TrainConfig::from_json_str(
            r#"{"epochs": 3, "loss": "cross_entropy", "optimizer": {"lr": 0.05}}"#,
        )
        .unwrap();
        assert_eq!(cfg.epochs, 3);
        assert_eq!(cfg.loss, Loss::CrossEntropy);
        assert_eq!(cfg.optimizer.lr, 0.05);
        assert_eq!(cfg.optimizer.momentum, 0.9);
        assert_eq!(cfg.batch_size, 64);
        assert!(matches!(
            TrainConfig::from_json_str(r#"{"batch_size": 0}"#),
            Err(Error::Config(_))
        ));
    }
}
