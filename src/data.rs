//! Labeled datasets and the batch source the training loop pulls from.
//!
//! A [`Dataset`] stores samples contiguously in row-major layout:
//! `inputs.len() == len * prod(sample_shape)`. Batches flatten each sample into
//! one feature row, so `[1, 28, 28]` images become rows of 784 features.

use std::fmt;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{Error, Result, Scalar, Tensor};

/// Which half of a source to iterate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Split {
    Train,
    Test,
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Split::Train => "train",
            Split::Test => "test",
        })
    }
}

/// One labeled sample borrowed from a [`Dataset`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample<'a> {
    pub input: &'a [Scalar],
    pub label: usize,
}

/// An immutable set of labeled samples.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    inputs: Vec<Scalar>,
    labels: Vec<usize>,
    sample_shape: Vec<usize>,
    feature_dim: usize,
    num_classes: usize,
}

impl Dataset {
    /// Build a dataset from a flat buffer.
    ///
    /// Fails if the buffer length is not `labels.len() * prod(sample_shape)`,
    /// if any label is `>= num_classes`, or if the dataset would be empty.
    pub fn new(
        inputs: Vec<Scalar>,
        labels: Vec<usize>,
        sample_shape: Vec<usize>,
        num_classes: usize,
    ) -> Result<Self> {
        if labels.is_empty() {
            return Err(Error::Config("dataset must not be empty".to_owned()));
        }
        if sample_shape.is_empty() || sample_shape.contains(&0) {
            return Err(Error::Shape(format!(
                "sample shape must have positive dims, got {sample_shape:?}"
            )));
        }
        if num_classes == 0 {
            return Err(Error::Config("num_classes must be > 0".to_owned()));
        }
        let feature_dim: usize = sample_shape.iter().product();
        if inputs.len() != labels.len() * feature_dim {
            return Err(Error::Shape(format!(
                "{} samples of shape {sample_shape:?} need {} values, got {}",
                labels.len(),
                labels.len() * feature_dim,
                inputs.len()
            )));
        }
        if let Some((i, &label)) = labels
            .iter()
            .enumerate()
            .find(|&(_, &l)| l >= num_classes)
        {
            return Err(Error::Shape(format!(
                "label {label} of sample {i} is out of range for {num_classes} classes"
            )));
        }

        Ok(Self {
            inputs,
            labels,
            sample_shape,
            feature_dim,
            num_classes,
        })
    }

    /// Build a dataset of flat feature rows.
    ///
    /// This is a convenience constructor (it copies into contiguous storage).
    pub fn from_rows(rows: &[Vec<Scalar>], labels: &[usize], num_classes: usize) -> Result<Self> {
        if rows.len() != labels.len() {
            return Err(Error::Shape(format!(
                "{} rows but {} labels",
                rows.len(),
                labels.len()
            )));
        }
        let feature_dim = rows.first().map(Vec::len).unwrap_or(0);
        let mut flat = Vec::with_capacity(rows.len() * feature_dim);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != feature_dim {
                return Err(Error::Shape(format!(
                    "row {i} has len {}, expected {feature_dim}",
                    row.len()
                )));
            }
            flat.extend_from_slice(row);
        }
        Self::new(flat, labels.to_vec(), vec![feature_dim], num_classes)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Per-sample shape, e.g. `[1, 28, 28]`.
    #[inline]
    pub fn sample_shape(&self) -> &[usize] {
        &self.sample_shape
    }

    /// Flattened features per sample.
    #[inline]
    pub fn feature_dim(&self) -> usize {
        self.feature_dim
    }

    #[inline]
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    #[inline]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    pub fn sample(&self, idx: usize) -> Option<Sample<'_>> {
        let label = *self.labels.get(idx)?;
        let start = idx * self.feature_dim;
        Some(Sample {
            input: &self.inputs[start..start + self.feature_dim],
            label,
        })
    }

    /// Gather the samples at `indices` into one batch.
    pub fn batch(&self, indices: &[usize]) -> Result<Batch> {
        let mut inputs = Vec::with_capacity(indices.len() * self.feature_dim);
        let mut labels = Vec::with_capacity(indices.len());
        for &idx in indices {
            let s = self.sample(idx).ok_or_else(|| {
                Error::Shape(format!("sample index {idx} out of range for {}", self.len()))
            })?;
            inputs.extend_from_slice(s.input);
            labels.push(s.label);
        }
        Batch::new(
            Tensor::new(inputs, vec![indices.len(), self.feature_dim])?,
            labels,
        )
    }
}

/// A group of samples: inputs `[batch, features]` and one label per row.
///
/// Created fresh for every iteration; never reused.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    inputs: Tensor,
    labels: Vec<usize>,
}

impl Batch {
    pub fn new(inputs: Tensor, labels: Vec<usize>) -> Result<Self> {
        let (rows, _) = inputs.dims2()?;
        if rows != labels.len() {
            return Err(Error::Shape(format!(
                "batch has {rows} input rows but {} labels",
                labels.len()
            )));
        }
        Ok(Self { inputs, labels })
    }

    #[inline]
    pub fn inputs(&self) -> &Tensor {
        &self.inputs
    }

    #[inline]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Lazy, finite batch iterator over one split.
pub type BatchIter<'a> = Box<dyn Iterator<Item = Result<Batch>> + 'a>;

/// Where batches come from.
///
/// Every call starts a fresh pass over the split; with `shuffle` set, each
/// call draws a new order. The last batch may be shorter than `batch_size`.
pub trait DataSource {
    fn iter_batches(&mut self, split: Split, batch_size: usize, shuffle: bool)
        -> Result<BatchIter<'_>>;
}

/// A source backed by two in-memory datasets.
#[derive(Debug, Clone)]
pub struct InMemorySource {
    train: Dataset,
    test: Dataset,
    rng: StdRng,
}

impl InMemorySource {
    /// Both splits must agree on feature width and class count.
    pub fn new(train: Dataset, test: Dataset, seed: u64) -> Result<Self> {
        if train.sample_shape() != test.sample_shape() {
            return Err(Error::mismatch(
                "train/test sample shape",
                train.sample_shape(),
                test.sample_shape(),
            ));
        }
        if train.num_classes() != test.num_classes() {
            return Err(Error::Config(format!(
                "train has {} classes but test has {}",
                train.num_classes(),
                test.num_classes()
            )));
        }
        Ok(Self {
            train,
            test,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn dataset(&self, split: Split) -> &Dataset {
        match split {
            Split::Train => &self.train,
            Split::Test => &self.test,
        }
    }

    #[inline]
    pub fn feature_dim(&self) -> usize {
        self.train.feature_dim()
    }

    #[inline]
    pub fn num_classes(&self) -> usize {
        self.train.num_classes()
    }
}

impl DataSource for InMemorySource {
    fn iter_batches(
        &mut self,
        split: Split,
        batch_size: usize,
        shuffle: bool,
    ) -> Result<BatchIter<'_>> {
        if batch_size == 0 {
            return Err(Error::Config("batch_size must be > 0".to_owned()));
        }
        let mut order: Vec<usize> = (0..self.dataset(split).len()).collect();
        if shuffle {
            order.shuffle(&mut self.rng);
        }
        let data = self.dataset(split);
        Ok(Box::new(
            order
                .chunks(batch_size)
                .map(|idx| idx.to_vec())
                .collect::<Vec<_>>()
                .into_iter()
                .map(move |idx| data.batch(&idx)),
        ))
    }
}

/// Synthetic clusters: `n_per_class` points per center, each coordinate drawn
/// uniformly from `center ± spread`. Class `i` is the `i`-th center.
pub fn blobs(
    centers: &[Vec<Scalar>],
    n_per_class: usize,
    spread: Scalar,
    seed: u64,
) -> Result<Dataset> {
    let dim = centers.first().map(Vec::len).unwrap_or(0);
    if dim == 0 || centers.iter().any(|c| c.len() != dim) {
        return Err(Error::Config(
            "centers must be non-empty with equal, positive length".to_owned(),
        ));
    }
    if n_per_class == 0 {
        return Err(Error::Config("n_per_class must be > 0".to_owned()));
    }
    if !(spread.is_finite() && spread >= 0.0) {
        return Err(Error::Config(format!(
            "spread must be finite and >= 0, got {spread}"
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut inputs = Vec::with_capacity(centers.len() * n_per_class * dim);
    let mut labels = Vec::with_capacity(centers.len() * n_per_class);
    for (class, center) in centers.iter().enumerate() {
        for _ in 0..n_per_class {
            for &c in center {
                let noise = if spread > 0.0 {
                    rng.gen_range(-spread..=spread)
                } else {
                    0.0
                };
                inputs.push(c + noise);
            }
            labels.push(class);
        }
    }
    Dataset::new(inputs, labels, vec![dim], centers.len())
}
