use mlp_classifier::{
    Batch, Layer, Linear, LogSoftmax, Loss, Mode, Network, Sgd, SgdConfig, Tensor, TrainConfig,
    Trainer,
};

fn assert_all_close(actual: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(actual.len(), expected.len());
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!((a - e).abs() <= tol, "index {i}: got {a}, expected {e}");
    }
}

fn fixed_network() -> Network {
    let weight = Tensor::new(vec![0.1, -0.2, 0.3, 0.4], vec![2, 2]).unwrap();
    let bias = Tensor::vector(vec![0.05, -0.05]).unwrap();
    Network::from_layers(vec![
        Layer::Linear(Linear::from_parts(weight, bias).unwrap()),
        Layer::LogSoftmax(LogSoftmax::default()),
    ])
    .unwrap()
}

fn fixed_batch() -> Batch {
    let inputs = Tensor::from_rows(&[
        vec![1.0, 2.0],
        vec![-1.0, 0.5],
        vec![0.3, -0.7],
        vec![2.0, 1.0],
    ])
    .unwrap();
    Batch::new(inputs, vec![0, 1, 1, 0]).unwrap()
}

#[test]
fn single_sgd_step_matches_reference_values() {
    let config = TrainConfig {
        loss: Loss::Nll,
        optimizer: SgdConfig {
            lr: 0.1,
            momentum: 0.0,
        },
        ..TrainConfig::default()
    };
    let mut trainer = Trainer::new(fixed_network(), config).unwrap();
    let (loss, _) = trainer.train_batch(&fixed_batch()).unwrap();
    assert!((loss - 1.1061691816498258).abs() < 1e-12, "loss {loss}");

    let linear = trainer.network().layers()[0].as_linear().unwrap();
    assert_all_close(
        linear.weight().data(),
        &[
            0.16309574338626914,
            -0.13845676519980862,
            0.23690425661373085,
            0.3384567651998086,
        ],
        1e-12,
    );
    assert_all_close(
        linear.bias().data(),
        &[0.05959425773820568, -0.05959425773820568],
        1e-12,
    );
    assert_all_close(
        linear.grad_weight().data(),
        &[
            -0.6309574338626914,
            -0.6154323480019139,
            0.6309574338626913,
            0.6154323480019139,
        ],
        1e-12,
    );
}

#[test]
fn zero_momentum_step_is_plain_gradient_descent() {
    let mut net = fixed_network();
    let batch = fixed_batch();

    net.zero_grad();
    let out = net.forward(batch.inputs(), Mode::Train).unwrap();
    let grad = Loss::Nll.backward(&out, batch.labels()).unwrap();
    net.backward(&grad).unwrap();

    let before: Vec<Vec<f64>> = net
        .parameters()
        .iter()
        .map(|p| p.value.data().to_vec())
        .collect();
    let grads: Vec<Vec<f64>> = net.gradients().iter().map(|g| g.data().to_vec()).collect();

    let mut opt = Sgd::new(SgdConfig {
        lr: 0.25,
        momentum: 0.0,
    })
    .unwrap();
    opt.step(&mut net).unwrap();

    for ((p, old), g) in net.parameters().iter().zip(&before).zip(&grads) {
        let expected: Vec<f64> = old.iter().zip(g).map(|(w, g)| w - 0.25 * g).collect();
        assert_all_close(p.value.data(), &expected, 1e-15);
    }
}
