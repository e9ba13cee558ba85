use burn_core as burn;

use burn::config::Config;
use burn::tensor::backend::Backend;
use burn::tensor::{IndexingUpdateOp, Int, Shape, Tensor};

/// How the per-token losses are aggregated.
#[derive(Config, Debug, PartialEq)]
pub enum LossReduction {
    /// Keep one loss per target, zero at ignored positions.
    None,
    /// Sum of the losses of the valid targets.
    Sum,
    /// Mean over the valid targets.
    Mean,
}

/// Expands the compacted loss of the valid targets back to `batch_shape`.
///
/// When `valids` is `None` every target was valid and `loss` already holds one value per
/// position, so it is only reshaped. Otherwise `loss[i]` is written at `valids[i]` (or
/// `valids[i] + 1` with `shift`, undoing the offset of [build_flat_valids](crate::build_flat_valids))
/// and every other position is zero.
///
/// # Panics
///
/// If `D` differs from the rank of `batch_shape` or if `valids` and `loss` differ in length.
///
/// # Shapes
///
/// - valids: `[num_valid]`
/// - loss: `[num_valid]`, or `[batch_shape.num_elements()]` without `valids`
/// - output: `batch_shape`
pub fn handle_reduction_none<B: Backend, const D: usize>(
    batch_shape: Shape,
    valids: Option<Tensor<B, 1, Int>>,
    shift: bool,
    loss: Tensor<B, 1>,
) -> Tensor<B, D> {
    assert_eq!(
        batch_shape.num_dims(),
        D,
        "Batch shape {batch_shape:?} does not have rank {D}."
    );

    let numel = batch_shape.num_elements();
    if numel == 0 {
        return Tensor::empty(batch_shape, (&loss.device(), loss.dtype()));
    }

    let Some(valids) = valids else {
        return loss.reshape(batch_shape);
    };

    let [num_valid] = valids.dims();
    let [num_loss] = loss.dims();
    assert_eq!(
        num_valid, num_loss,
        "Expected one loss value per valid target, got {num_loss} for {num_valid} targets."
    );

    let full = Tensor::<B, 1>::zeros([numel], (&loss.device(), loss.dtype()));
    if num_valid == 0 {
        return full.reshape(batch_shape);
    }

    let positions = if shift { valids.add_scalar(1) } else { valids };

    full.select_assign(0, positions, loss, IndexingUpdateOp::Add)
        .reshape(batch_shape)
}

/// Aggregates the compacted loss of the valid targets.
///
/// The mean of an empty loss is zero, matching a batch where every target is ignored.
///
/// # Panics
///
/// With [LossReduction::None], which keeps the per-target losses; see [handle_reduction_none].
///
/// # Shapes
///
/// - loss: `[num_valid]`
/// - output: `[1]`
pub fn reduce_loss<B: Backend>(loss: Tensor<B, 1>, reduction: &LossReduction) -> Tensor<B, 1> {
    match reduction {
        LossReduction::None => {
            panic!("Reduction `None` keeps one loss per target, use `handle_reduction_none`.")
        }
        LossReduction::Sum => loss.sum(),
        LossReduction::Mean if loss.dims()[0] == 0 => {
            Tensor::zeros([1], (&loss.device(), loss.dtype()))
        }
        LossReduction::Mean => loss.mean(),
    }
}
