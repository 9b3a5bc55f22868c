use criterion::{Criterion, black_box, criterion_group, criterion_main};

use mlp_classifier::{Batch, Loss, Mode, Network, SgdConfig, Tensor, TrainConfig, Trainer};

const BATCH: usize = 64;

fn mnist_sized() -> Network {
    Network::builder(784)
        .linear(128)
        .relu()
        .linear(10)
        .log_softmax()
        .build_with_seed(0)
        .expect("valid network")
}

fn input() -> Tensor {
    let data = (0..BATCH * 784).map(|i| (i % 255) as f64 / 255.0).collect();
    Tensor::new(data, vec![BATCH, 784]).expect("valid input")
}

fn labels() -> Vec<usize> {
    (0..BATCH).map(|i| i % 10).collect()
}

fn forward_bench(c: &mut Criterion) {
    let net = mnist_sized();
    let x = input();

    c.bench_function("forward_784_128_10_batch64", |b| {
        b.iter(|| black_box(net.apply(black_box(&x)).expect("forward")))
    });
}

fn backward_bench(c: &mut Criterion) {
    let mut net = mnist_sized();
    let x = input();
    let y = labels();

    c.bench_function("forward_backward_784_128_10_batch64", |b| {
        b.iter(|| {
            net.zero_grad();
            let out = net.forward(black_box(&x), Mode::Train).expect("forward");
            let grad = Loss::Nll.backward(&out, &y).expect("loss");
            net.backward(&grad).expect("backward");
        })
    });
}

fn train_step_bench(c: &mut Criterion) {
    let config = TrainConfig {
        optimizer: SgdConfig {
            lr: 0.01,
            momentum: 0.9,
        },
        ..TrainConfig::default()
    };
    let mut trainer = Trainer::new(mnist_sized(), config).expect("valid config");
    let batch = Batch::new(input(), labels()).expect("valid batch");

    c.bench_function("train_batch_784_128_10_batch64", |b| {
        b.iter(|| black_box(trainer.train_batch(black_box(&batch)).expect("train step")))
    });
}

criterion_group!(benches, forward_bench, backward_bench, train_step_bench);
criterion_main!(benches);
