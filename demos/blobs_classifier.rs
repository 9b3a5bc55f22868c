//! Train a small classifier on three synthetic clusters.
//!
//! Run with `RUST_LOG=debug` to see per-batch losses.

use tracing_subscriber::EnvFilter;

use mlp_classifier::metrics::confusion_matrix;
use mlp_classifier::{
    DataSource, InMemorySource, LogReporter, Loss, Network, SgdConfig, Split, TrainConfig, Trainer,
    data,
};

fn main() -> mlp_classifier::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let centers = [vec![-1.0, -1.0], vec![1.0, -1.0], vec![0.0, 1.0]];
    let train = data::blobs(&centers, 256, 0.6, 0)?;
    let test = data::blobs(&centers, 64, 0.6, 1)?;
    let mut source = InMemorySource::new(train, test, 0)?;

    let net = Network::builder(2)
        .linear(16)
        .relu()
        .linear(3)
        .log_softmax()
        .build_with_seed(0)?;
    println!("parameters: {}", net.num_parameters());

    let mut trainer = Trainer::new(
        net,
        TrainConfig {
            epochs: 15,
            batch_size: 32,
            test_batch_size: 64,
            loss: Loss::Nll,
            optimizer: SgdConfig {
                lr: 0.05,
                momentum: 0.9,
            },
            ..TrainConfig::default()
        },
    )?;
    let report = trainer.fit(&mut source, &mut LogReporter)?;
    if let Some(last) = report.last() {
        println!(
            "final: train loss {:.4}, test accuracy {:.2}%",
            last.train_loss, last.test_accuracy
        );
    }

    let net = trainer.into_network();
    let mut preds = Vec::new();
    let mut labels = Vec::new();
    for batch in source.iter_batches(Split::Test, 64, false)? {
        let batch = batch?;
        preds.extend(net.predict(batch.inputs())?);
        labels.extend_from_slice(batch.labels());
    }
    println!("confusion matrix (rows = true class):");
    for row in confusion_matrix(&preds, &labels, centers.len())? {
        println!("  {row:?}");
    }
    Ok(())
}
