//! Train on tiny 8x8 glyphs and print a few predictions as ASCII art.

use std::ops::ControlFlow;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use mlp_classifier::{
    Dataset, GrayImage, InMemorySource, Inference, LogReporter, Network, Split, TrainConfig,
    Trainer, visualize_inferences,
};

const SIDE: usize = 8;
const CLASSES: usize = 4;

// 0: horizontal bar, 1: vertical bar, 2: diagonal, 3: hollow box.
fn glyph(class: usize, r: usize, c: usize) -> bool {
    match class {
        0 => r == 3 || r == 4,
        1 => c == 3 || c == 4,
        2 => r == c || r + 1 == c,
        _ => r == 1 || r == 6 || c == 1 || c == 6,
    }
}

fn glyphs(n_per_class: usize, seed: u64) -> mlp_classifier::Result<Dataset> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut inputs = Vec::with_capacity(CLASSES * n_per_class * SIDE * SIDE);
    let mut labels = Vec::with_capacity(CLASSES * n_per_class);
    for class in 0..CLASSES {
        for _ in 0..n_per_class {
            for r in 0..SIDE {
                for c in 0..SIDE {
                    let ink = if glyph(class, r, c) { 1.0 } else { 0.0 };
                    inputs.push(ink + rng.gen_range(-0.3..0.3));
                }
            }
            labels.push(class);
        }
    }
    Dataset::new(inputs, labels, vec![1, SIDE, SIDE], CLASSES)
}

fn render(inference: Inference, image: &GrayImage) -> ControlFlow<()> {
    const SHADES: &[u8] = b" .:-=+*#%@";
    println!(
        "sample {} (label {}): predicted {}",
        inference.index, inference.label, inference.predicted
    );
    for row in image.rows() {
        let line: String = row
            .iter()
            .map(|&p| SHADES[p as usize * (SHADES.len() - 1) / 255] as char)
            .collect();
        println!("  {line}");
    }
    if inference.index + 1 >= 6 {
        ControlFlow::Break(())
    } else {
        ControlFlow::Continue(())
    }
}

fn main() -> mlp_classifier::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut source = InMemorySource::new(glyphs(64, 0)?, glyphs(8, 1)?, 0)?;
    let net = Network::builder(SIDE * SIDE)
        .linear(32)
        .relu()
        .linear(CLASSES)
        .log_softmax()
        .build_with_seed(0)?;

    let mut trainer = Trainer::new(
        net,
        TrainConfig {
            epochs: 5,
            batch_size: 16,
            test_batch_size: 32,
            ..TrainConfig::default()
        },
    )?;
    trainer.fit(&mut source, &mut LogReporter)?;

    let shown = visualize_inferences(
        trainer.network(),
        &mut source,
        Split::Test,
        8,
        &[1, SIDE, SIDE],
        &mut render,
    )?;
    println!("shown {shown} samples");
    Ok(())
}
