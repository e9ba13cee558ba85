#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Numeric building blocks of a memory-efficient cut cross-entropy loss.
//!
//! A cut cross-entropy kernel never materializes the `[tokens, vocabulary]` logits: it streams
//! over vocabulary chunks and keeps only a log-sum-exp per token. This crate provides the pieces
//! around such a kernel:
//!
//! - [softcapping] bounds the logits before the log-sum-exp.
//! - [resolve_eps] turns a [FilterEps] policy into a gradient filtering threshold.
//! - [build_flat_valids] finds the targets that are not ignored.
//! - [handle_reduction_none] spreads the compacted loss back over the batch.
//!
//! [CutCrossEntropyConfig] ties them together.

extern crate alloc;

mod error;
mod eps;
mod loss;
mod reduction;
mod softcap;
mod valids;

pub use eps::*;
pub use error::*;
pub use loss::*;
pub use reduction::*;
pub use softcap::*;
pub use valids::*;

/// Backend for test cases
#[cfg(all(
    test,
    not(feature = "test-tch"),
    not(feature = "test-wgpu"),
    not(feature = "test-cuda")
))]
pub type TestBackend = burn_ndarray::NdArray<f32>;

#[cfg(all(test, feature = "test-tch"))]
/// Backend for test cases
pub type TestBackend = burn_tch::LibTorch<f32>;

#[cfg(all(test, feature = "test-wgpu"))]
/// Backend for test cases
pub type TestBackend = burn_wgpu::Wgpu;

#[cfg(all(test, feature = "test-cuda"))]
/// Backend for test cases
pub type TestBackend = burn_cuda::Cuda;

/// Backend for autodiff test cases
#[cfg(test)]
pub type TestAutodiffBackend = burn_autodiff::Autodiff<TestBackend>;
