use burn_core as burn;

use burn::module::{Content, DisplaySettings, ModuleDisplay};
use burn::tensor::Tensor;
use burn::tensor::backend::Backend;
use burn::{config::Config, module::Module};

/// Bounds the magnitude of `logits` with a scaled hyperbolic tangent.
///
/// `y = tanh(x / softcap) * softcap`
///
/// Every output lies in the closed interval `[-softcap, softcap]`: `tanh` saturates in floating
/// point, so logits far beyond the cap land exactly on it. The map is non-decreasing, so the
/// ranking of the logits is preserved.
///
/// # Panics
///
/// If `softcap` is not a positive finite number.
///
/// # Shapes
///
/// - logits: `[..., any]`
/// - output: `[..., any]`
pub fn softcapping<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    softcap: f32,
) -> Tensor<B, D> {
    check_softcap(softcap);
    logits.div_scalar(softcap).tanh().mul_scalar(softcap)
}

/// Derivative of [softcapping] with respect to `logits`.
///
/// `dy/dx = 1 - tanh(x / softcap)^2`
///
/// Used by kernels that recompute logits chunk by chunk and apply the chain rule
/// themselves instead of recording an autodiff graph.
pub fn softcapping_grad<B: Backend, const D: usize>(
    logits: Tensor<B, D>,
    softcap: f32,
) -> Tensor<B, D> {
    check_softcap(softcap);
    logits
        .div_scalar(softcap)
        .tanh()
        .square()
        .neg()
        .add_scalar(1.0)
}

fn check_softcap(softcap: f32) {
    assert!(
        softcap.is_finite() && softcap > 0.0,
        "Softcap must be a positive finite number, got {softcap}."
    );
}

/// Configuration to create a [Softcap] module.
#[derive(Config, Debug)]
pub struct SoftcapConfig {
    /// Upper bound of the output magnitude.
    pub cap: f32,
}

impl SoftcapConfig {
    /// Initialize a new [Softcap] module.
    pub fn init(&self) -> Softcap {
        self.assertions();
        Softcap { cap: self.cap }
    }

    fn assertions(&self) {
        check_softcap(self.cap);
    }
}

/// Applies [softcapping] element-wise.
///
/// Should be created with [SoftcapConfig].
#[derive(Module, Clone, Debug)]
#[module(custom_display)]
pub struct Softcap {
    /// Upper bound of the output magnitude.
    pub cap: f32,
}

impl ModuleDisplay for Softcap {
    fn custom_settings(&self) -> Option<DisplaySettings> {
        DisplaySettings::new()
            .with_new_line_after_attribute(false)
            .optional()
    }

    fn custom_content(&self, content: Content) -> Option<Content> {
        content.add("cap", &self.cap).optional()
    }
}

impl Softcap {
    /// Applies the forward pass on the input tensor.
    ///
    /// # Shapes
    ///
    /// - logits: `[..., any]`
    /// - output: `[..., any]`
    pub fn forward<B: Backend, const D: usize>(&self, logits: Tensor<B, D>) -> Tensor<B, D> {
        softcapping(logits, self.cap)
    }

    /// Derivative of the forward pass with respect to its input.
    pub fn backward<B: Backend, const D: usize>(&self, logits: Tensor<B, D>) -> Tensor<B, D> {
        softcapping_grad(logits, self.cap)
    }
}
