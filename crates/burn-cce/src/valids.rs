use alloc::vec;
use alloc::vec::Vec;

use burn_core as burn;

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor, TensorData};

/// Row-major strides of a tensor with the given dimensions.
///
/// ```rust
/// use burn_cce::contiguous_strides;
///
/// assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
/// ```
pub fn contiguous_strides(dims: &[usize]) -> Vec<usize> {
    let mut strides = vec![1; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1];
    }
    strides
}

/// Positions of the targets that are not `ignore_index`, in flattened order.
///
/// Without `shift`, the positions index the flattened targets. `None` is returned when
/// every target is valid, so callers can skip gathering and scattering altogether.
///
/// With `shift`, the first target of every row (along the last dimension) is dropped to align
/// predictions with next-token labels. The remaining coordinates are weighted by the strides of
/// the *unshifted* targets, so each offset plus one is the flat position of the label in the
/// original layout. Shift mode always returns the positions, even if all of them are valid.
///
/// Burn tensors are logically row-major, so the strides are those of [contiguous_strides] and
/// the last dimension always has unit stride.
///
/// # Shapes
///
/// - targets: `[...dims]`
/// - output: `[num_valid]`
pub fn build_flat_valids<B: Backend, const D: usize>(
    targets: Tensor<B, D, Int>,
    ignore_index: i64,
    shift: bool,
) -> Option<Tensor<B, 1, Int>> {
    if shift {
        Some(shifted_valids(targets, ignore_index))
    } else {
        flat_valids(targets, ignore_index)
    }
}

fn flat_valids<B: Backend, const D: usize>(
    targets: Tensor<B, D, Int>,
    ignore_index: i64,
) -> Option<Tensor<B, 1, Int>> {
    let numel = targets.shape().num_elements();
    if numel == 0 {
        return None;
    }

    let coords = targets
        .reshape([numel])
        .not_equal_elem(ignore_index)
        .argwhere();
    let [num_valid, width] = coords.dims();

    assert_eq!(width, 1, "Flattened targets should yield one coordinate per entry.");
    log::trace!("{num_valid} of {numel} targets are valid");

    if num_valid == numel {
        return None;
    }

    Some(coords.squeeze_dim::<1>(1))
}

fn shifted_valids<B: Backend, const D: usize>(
    targets: Tensor<B, D, Int>,
    ignore_index: i64,
) -> Tensor<B, 1, Int> {
    let dims = targets.dims();
    let device = targets.device();
    let len = dims[D - 1];
    if len <= 1 {
        // Nothing is left to predict once the first label of every row is dropped.
        return empty_positions(&device);
    }

    let coords = targets
        .narrow(D - 1, 1, len - 1)
        .not_equal_elem(ignore_index)
        .argwhere();
    let [num_valid, _] = coords.dims();

    log::trace!(
        "{num_valid} of {} shifted targets are valid",
        dims[..D - 1].iter().product::<usize>() * (len - 1)
    );

    if num_valid == 0 {
        return empty_positions(&device);
    }

    let strides = contiguous_strides(&dims)
        .into_iter()
        .map(|s| s as i64)
        .collect::<Vec<_>>();
    let strides = Tensor::<B, 1, Int>::from_data(TensorData::new(strides, [D]), &device)
        .unsqueeze::<2>();

    coords.mul(strides).sum_dim(1).squeeze_dim::<1>(1)
}

fn empty_positions<B: Backend>(device: &B::Device) -> Tensor<B, 1, Int> {
    Tensor::from_data(TensorData::new(Vec::<i64>::new(), [0]), device)
}
