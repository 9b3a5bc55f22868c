//! Drive a run from a JSON config and stream epoch reports as JSON Lines.
//!
//! `cargo run --example json_config --features serde`

use serde::Deserialize;

use mlp_classifier::{InMemorySource, JsonLinesReporter, Network, TrainConfig, Trainer, data};

#[derive(Debug, Deserialize)]
struct RunConfig {
    layers: String,
    seed: u64,
    train: serde_json::Value,
}

const CONFIG: &str = r#"{
    "layers": "linear:16, tanh, linear:2",
    "seed": 3,
    "train": {
        "epochs": 8,
        "batch_size": 32,
        "test_batch_size": 100,
        "loss": "cross_entropy",
        "optimizer": { "lr": 0.05, "momentum": 0.9 }
    }
}"#;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let run: RunConfig = serde_json::from_str(CONFIG)?;
    let train_cfg = TrainConfig::from_json_str(&run.train.to_string())?;

    let centers = [vec![-1.5, 0.0], vec![1.5, 0.0]];
    let mut source = InMemorySource::new(
        data::blobs(&centers, 200, 1.0, run.seed)?,
        data::blobs(&centers, 50, 1.0, run.seed + 1)?,
        run.seed,
    )?;

    let net = Network::builder(2)
        .parse_layers(&run.layers)?
        .build_with_seed(run.seed)?;

    let mut trainer = Trainer::new(net, train_cfg)?;
    let mut reporter = JsonLinesReporter::new(std::io::stdout().lock());
    let report = trainer.fit(&mut source, &mut reporter)?;
    reporter.into_inner()?;

    eprintln!("{} epochs, stopped: {}", report.epochs.len(), report.stopped);
    Ok(())
}
