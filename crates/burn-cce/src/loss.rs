use burn_core as burn;

use burn::config::Config;
use burn::tensor::backend::Backend;
use burn::tensor::{DType, Int, Shape, Tensor};

use crate::eps::{FilterEps, resolve_eps};
use crate::reduction::{LossReduction, handle_reduction_none, reduce_loss};
use crate::softcap::{Softcap, SoftcapConfig};
use crate::valids::build_flat_valids;

/// Configuration to create a [CutCrossEntropy] loss.
#[derive(Config, Debug, PartialEq)]
pub struct CutCrossEntropyConfig {
    /// Target value excluded from the loss.
    #[config(default = "-100")]
    pub ignore_index: i64,
    /// Drop the first label of every sequence so that position `t` predicts label `t + 1`.
    #[config(default = false)]
    pub shift: bool,
    /// Bound applied to the logits with [softcapping](crate::softcapping), disabled if `None`.
    pub softcap: Option<f32>,
    /// Threshold under which gradient contributions are skipped, disabled if `None`.
    #[config(default = "Some(FilterEps::Auto)")]
    pub filter_eps: Option<FilterEps>,
    /// Aggregation of the per-target losses.
    #[config(default = "LossReduction::Mean")]
    pub reduction: LossReduction,
}

impl CutCrossEntropyConfig {
    /// Initialize [CutCrossEntropy].
    pub fn init(&self) -> CutCrossEntropy {
        self.assertions();
        CutCrossEntropy {
            ignore_index: self.ignore_index,
            shift: self.shift,
            softcap: self.softcap.map(|cap| SoftcapConfig::new(cap).init()),
            filter_eps: self.filter_eps,
            reduction: self.reduction.clone(),
        }
    }

    fn assertions(&self) {
        if let Some(FilterEps::Value(eps)) = self.filter_eps {
            assert!(
                eps >= 0.0,
                "Filter eps must be a non-negative number, got {eps}."
            );
        }
    }
}

/// Settings shared by the passes of a cut cross-entropy loss.
///
/// The fused kernel that streams over the vocabulary is not part of this type: it consumes
/// the compacted rows and targets of a [TargetLayout], the soft-capped logits and the filter
/// threshold, and hands back one loss per valid target that [finalize](Self::finalize) or
/// [finalize_none](Self::finalize_none) turns into the requested output.
///
/// Should be created with [CutCrossEntropyConfig].
#[derive(Debug, Clone)]
pub struct CutCrossEntropy {
    /// Target value excluded from the loss.
    pub ignore_index: i64,
    /// Whether labels are shifted by one position.
    pub shift: bool,
    /// Logit soft-capping, if any.
    pub softcap: Option<Softcap>,
    /// Gradient filter policy, if any.
    pub filter_eps: Option<FilterEps>,
    /// Aggregation of the per-target losses.
    pub reduction: LossReduction,
}

impl CutCrossEntropy {
    /// Locates the targets that contribute to the loss.
    pub fn prepare_targets<B: Backend, const D: usize>(
        &self,
        targets: Tensor<B, D, Int>,
    ) -> TargetLayout<B> {
        let batch_shape = targets.shape();
        let valids = build_flat_valids(targets, self.ignore_index, self.shift);

        TargetLayout {
            batch_shape,
            valids,
            shift: self.shift,
        }
    }

    /// Applies the configured soft-capping, or returns the logits untouched.
    pub fn softcap_logits<B: Backend, const D: usize>(
        &self,
        logits: Tensor<B, D>,
    ) -> Tensor<B, D> {
        match &self.softcap {
            Some(softcap) => softcap.forward(logits),
            None => logits,
        }
    }

    /// Gradient filter threshold for logits computed in `dtype`.
    pub fn filter_threshold(&self, dtype: DType) -> crate::Result<Option<f64>> {
        resolve_eps(self.filter_eps.as_ref(), dtype)
    }

    /// Aggregates the loss of the valid targets with a `Sum` or `Mean` reduction.
    ///
    /// # Panics
    ///
    /// If the reduction is [LossReduction::None], use [finalize_none](Self::finalize_none).
    ///
    /// # Shapes
    ///
    /// - loss: `[num_valid]`
    /// - output: `[1]`
    pub fn finalize<B: Backend>(&self, loss: Tensor<B, 1>) -> Tensor<B, 1> {
        reduce_loss(loss, &self.reduction)
    }

    /// Spreads the loss of the valid targets over the original target shape.
    ///
    /// # Shapes
    ///
    /// - loss: `[num_valid]`
    /// - output: `batch_shape`
    pub fn finalize_none<B: Backend, const D: usize>(
        &self,
        layout: TargetLayout<B>,
        loss: Tensor<B, 1>,
    ) -> Tensor<B, D> {
        handle_reduction_none(layout.batch_shape, layout.valids, layout.shift, loss)
    }
}

/// Where the valid targets of a batch are, as found by [build_flat_valids].
#[derive(Debug, Clone)]
pub struct TargetLayout<B: Backend> {
    /// Shape of the targets before flattening.
    pub batch_shape: Shape,
    /// Flat positions of the valid targets, `None` when all of them are valid.
    pub valids: Option<Tensor<B, 1, Int>>,
    /// Whether the positions are shifted by one.
    pub shift: bool,
}

impl<B: Backend> TargetLayout<B> {
    /// Number of targets that contribute to the loss.
    pub fn num_valid(&self) -> usize {
        match &self.valids {
            Some(valids) => valids.dims()[0],
            None => self.batch_shape.num_elements(),
        }
    }

    /// Rows of `embeddings` whose prediction is scored, flattened to `[num_valid, hidden]`.
    ///
    /// # Shapes
    ///
    /// - embeddings: `[...batch_shape, hidden]`
    /// - output: `[num_valid, hidden]`
    pub fn select_embeddings<const D: usize>(&self, embeddings: Tensor<B, D>) -> Tensor<B, 2> {
        let hidden = embeddings.dims()[D - 1];
        let rows = embeddings.reshape([-1, hidden as i64]);

        match &self.valids {
            Some(valids) => rows.select(0, valids.clone()),
            None => rows,
        }
    }

    /// Labels matching the rows of [select_embeddings](Self::select_embeddings).
    ///
    /// # Shapes
    ///
    /// - targets: `batch_shape`
    /// - output: `[num_valid]`
    pub fn select_targets<const D: usize>(
        &self,
        targets: Tensor<B, D, Int>,
    ) -> Tensor<B, 1, Int> {
        let targets = targets.reshape([-1]);

        match &self.valids {
            Some(valids) if self.shift => targets.select(0, valids.clone().add_scalar(1)),
            Some(valids) => targets.select(0, valids.clone()),
            None => targets,
        }
    }
}
