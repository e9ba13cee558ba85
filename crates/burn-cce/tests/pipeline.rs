use burn_core as burn;

use burn::tensor::activation::log_softmax;
use burn::tensor::{Device, Int, Tensor, TensorData, Tolerance, ops::FloatElem};
use burn_cce::{CutCrossEntropy, CutCrossEntropyConfig, LossReduction, TargetLayout};

#[cfg(all(
    test,
    not(feature = "test-tch"),
    not(feature = "test-wgpu"),
    not(feature = "test-cuda")
))]
pub type B = burn_ndarray::NdArray<f32>;

#[cfg(all(test, feature = "test-tch"))]
/// Backend for test cases
pub type B = burn_tch::LibTorch<f32>;

#[cfg(all(test, feature = "test-wgpu"))]
/// Backend for test cases
pub type B = burn_wgpu::Wgpu;

#[cfg(all(test, feature = "test-cuda"))]
/// Backend for test cases
pub type B = burn_cuda::Cuda;

type FT = FloatElem<B>;

const IGNORE: i64 = -100;
const HIDDEN: usize = 3;
const VOCAB: usize = 5;
const TARGETS: [[i64; 4]; 2] = [[2, IGNORE, 0, 4], [IGNORE, 1, 3, IGNORE]];

fn embeddings(device: &Device<B>) -> Tensor<B, 3> {
    let values = (0..2 * 4 * HIDDEN)
        .map(|i| ((i * 7 % 11) as f32 - 5.0) / 4.0)
        .collect::<Vec<_>>();
    Tensor::from_data(TensorData::new(values, [2, 4, HIDDEN]), device)
}

fn classifier(device: &Device<B>) -> Tensor<B, 2> {
    let values = (0..VOCAB * HIDDEN)
        .map(|i| ((i * 5 % 13) as f32 - 6.0) / 3.0)
        .collect::<Vec<_>>();
    Tensor::from_data(TensorData::new(values, [VOCAB, HIDDEN]), device)
}

/// Per-target loss on the compacted rows, standing in for the fused vocabulary kernel.
fn compacted_loss(
    loss_fn: &CutCrossEntropy,
    layout: &TargetLayout<B>,
    embeddings: Tensor<B, 3>,
    classifier: Tensor<B, 2>,
    targets: Tensor<B, 2, Int>,
) -> Tensor<B, 1> {
    let rows = layout.select_embeddings(embeddings);
    let labels = layout.select_targets(targets);
    let logits = loss_fn.softcap_logits(rows.matmul(classifier.transpose()));

    log_softmax(logits, 1)
        .gather(1, labels.unsqueeze_dim(1))
        .neg()
        .squeeze_dim::<1>(1)
}

/// Log-probabilities of every position against the whole vocabulary, `[8, VOCAB]` row-major.
fn full_log_probs(loss_fn: &CutCrossEntropy, device: &Device<B>) -> Vec<f32> {
    let rows = embeddings(device).reshape([2 * 4, HIDDEN]);
    let logits = loss_fn.softcap_logits(rows.matmul(classifier(device).transpose()));

    log_softmax(logits, 1).into_data().iter::<f32>().collect()
}

fn expected_per_target(loss_fn: &CutCrossEntropy, device: &Device<B>, shift: bool) -> Vec<f32> {
    let log_probs = full_log_probs(loss_fn, device);
    let mut expected = vec![0.0; 2 * 4];

    for (row, labels) in TARGETS.iter().enumerate() {
        for col in 0..4 {
            // With shift, the prediction at `col - 1` is scored against the label at `col`.
            let (position, label) = match shift {
                false => (row * 4 + col, labels[col]),
                true if col == 0 => continue,
                true => (row * 4 + col - 1, labels[col]),
            };
            if label == IGNORE {
                continue;
            }
            let slot = if shift { position + 1 } else { position };
            expected[slot] = -log_probs[position * VOCAB + label as usize];
        }
    }

    expected
}

fn run(config: CutCrossEntropyConfig) -> (CutCrossEntropy, TargetLayout<B>, Tensor<B, 1>) {
    let device = Default::default();
    let loss_fn = config.init();
    let targets = Tensor::<B, 2, Int>::from_data(TARGETS, &device);

    let layout = loss_fn.prepare_targets(targets.clone());
    let loss = compacted_loss(
        &loss_fn,
        &layout,
        embeddings(&device),
        classifier(&device),
        targets,
    );

    (loss_fn, layout, loss)
}

#[test]
fn reduction_none_matches_direct_computation() {
    let device = Default::default();
    let (loss_fn, layout, loss) = run(
        CutCrossEntropyConfig::new()
            .with_softcap(Some(2.0))
            .with_reduction(LossReduction::None),
    );

    assert_eq!(layout.num_valid(), 5);
    let expected = expected_per_target(&loss_fn, &device, false);
    let output: Tensor<B, 2> = loss_fn.finalize_none(layout, loss);

    output.into_data().assert_approx_eq::<FT>(
        &TensorData::new(expected, [2, 4]),
        Tolerance::default(),
    );
}

#[test]
fn shifted_reduction_none_matches_direct_computation() {
    let device = Default::default();
    let (loss_fn, layout, loss) = run(
        CutCrossEntropyConfig::new()
            .with_shift(true)
            .with_reduction(LossReduction::None),
    );

    // Labels at columns 1..4 that are not ignored: 0, 4 in the first row, 1, 3 in the second.
    assert_eq!(layout.num_valid(), 4);
    let expected = expected_per_target(&loss_fn, &device, true);
    let output: Tensor<B, 2> = loss_fn.finalize_none(layout, loss);

    output.into_data().assert_approx_eq::<FT>(
        &TensorData::new(expected, [2, 4]),
        Tolerance::default(),
    );
}

#[test]
fn mean_reduction_averages_valid_targets_only() {
    let device = Default::default();
    let (loss_fn, _layout, loss) = run(CutCrossEntropyConfig::new().with_softcap(Some(2.0)));

    let expected = expected_per_target(&loss_fn, &device, false);
    let mean = expected.iter().sum::<f32>() / 5.0;

    loss_fn
        .finalize(loss)
        .into_data()
        .assert_approx_eq::<FT>(&TensorData::from([mean]), Tolerance::default());
}

#[test]
fn sum_reduction_adds_valid_targets() {
    let device = Default::default();
    let (loss_fn, _layout, loss) = run(
        CutCrossEntropyConfig::new()
            .with_shift(true)
            .with_reduction(LossReduction::Sum),
    );

    let expected = expected_per_target(&loss_fn, &device, true);
    let sum = expected.iter().sum::<f32>();

    loss_fn
        .finalize(loss)
        .into_data()
        .assert_approx_eq::<FT>(&TensorData::from([sum]), Tolerance::default());
}
