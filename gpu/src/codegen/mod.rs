//! GEMM kernel source generation.
//!
//! Translates a validated `GemmParams` into backend-neutral kernel text. The
//! text uses the placeholders of [`keywords`]; a backend substitutes them and
//! compiles the result.

pub mod gemm;
pub mod keywords;
pub mod reduce;
pub mod stream;

use symbolic::NumericType;

use crate::params::GemmParams;

pub use gemm::{gemm_kernel_name, generate};
pub use reduce::reduce_kernel_name;
pub use stream::KernelStream;

/// One program's worth of kernel text, ready for a compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelSource {
    /// Name suffix shared by every kernel in `text`.
    pub suffix: String,
    pub text: String,
    pub params: GemmParams,
    pub dtype: NumericType,
}

impl KernelSource {
    pub fn generate(params: &GemmParams, dtype: NumericType, suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        KernelSource {
            text: generate(params, dtype, &suffix),
            suffix,
            params: *params,
            dtype,
        }
    }

    pub fn gemm_name(&self) -> String {
        gemm_kernel_name(&self.suffix)
    }

    /// Name of the reduction kernel, present only with split depth.
    pub fn reduce_name(&self) -> Option<String> {
        (self.params.depth() > 1).then(|| reduce_kernel_name(&self.suffix))
    }
}
