//! Per-sample predictions paired with a displayable image.
//!
//! Rendering is left to an [`InferenceSink`]; this module only produces
//! `(predicted class, 8-bit grayscale image)` pairs.

use std::ops::ControlFlow;

use crate::data::{DataSource, Split};
use crate::{Error, Network, Result, Scalar};

/// An 8-bit grayscale image, row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayImage {
    width: usize,
    height: usize,
    pixels: Vec<u8>,
}

impl GrayImage {
    /// Min-max normalize one sample into `[0, 255]`.
    ///
    /// Size-1 dimensions are squeezed, so `[1, 28, 28]` becomes a 28x28 image.
    /// A constant sample maps to all zeros; non-finite values map to 0.
    pub fn from_sample(values: &[Scalar], sample_shape: &[usize]) -> Result<Self> {
        let numel: usize = sample_shape.iter().product();
        if sample_shape.is_empty() || numel != values.len() {
            return Err(Error::Shape(format!(
                "sample shape {sample_shape:?} does not fit {} values",
                values.len()
            )));
        }

        let dims: Vec<usize> = sample_shape.iter().copied().filter(|&d| d != 1).collect();
        let (height, width) = match dims.as_slice() {
            [] => (1, 1),
            [w] => (1, *w),
            [rest @ .., w] => (rest.iter().product(), *w),
        };

        let (lo, hi) = values
            .iter()
            .filter(|v| v.is_finite())
            .fold((Scalar::INFINITY, Scalar::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        let range = hi - lo;
        let pixels = values
            .iter()
            .map(|&v| {
                if !v.is_finite() || range <= 0.0 {
                    0
                } else {
                    ((v - lo) / range * 255.0).round() as u8
                }
            })
            .collect();

        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn get(&self, row: usize, col: usize) -> Option<u8> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.pixels.get(row * self.width + col).copied()
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.pixels.chunks_exact(self.width)
    }
}

/// One visited sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Inference {
    /// Position within the pass, starting at 0.
    pub index: usize,
    pub predicted: usize,
    pub label: usize,
}

/// Consumes predictions one sample at a time.
pub trait InferenceSink {
    /// Return `ControlFlow::Break(())` to end the pass early.
    fn on_inference(&mut self, inference: Inference, image: &GrayImage) -> ControlFlow<()>;
}

impl<F> InferenceSink for F
where
    F: FnMut(Inference, &GrayImage) -> ControlFlow<()>,
{
    fn on_inference(&mut self, inference: Inference, image: &GrayImage) -> ControlFlow<()> {
        self(inference, image)
    }
}

/// Predict every sample of `split` in order and hand each one to `sink`.
///
/// Returns how many samples were delivered.
pub fn visualize_inferences<S, K>(
    network: &Network,
    source: &mut S,
    split: Split,
    batch_size: usize,
    sample_shape: &[usize],
    sink: &mut K,
) -> Result<usize>
where
    S: DataSource + ?Sized,
    K: InferenceSink + ?Sized,
{
    let mut seen = 0;
    for batch in source.iter_batches(split, batch_size, false)? {
        let batch = batch?;
        let preds = network.predict_batch(&batch)?;
        for (i, (&predicted, &label)) in preds.iter().zip(batch.labels()).enumerate() {
            let image = GrayImage::from_sample(batch.inputs().row(i), sample_shape)?;
            let flow = sink.on_inference(
                Inference {
                    index: seen,
                    predicted,
                    label,
                },
                &image,
            );
            seen += 1;
            if flow.is_break() {
                tracing::debug!(seen, "inference pass ended by sink");
                return Ok(seen);
            }
        }
    }
    Ok(seen)
}
