//! Resource estimates for a parameter set.
//!
//! Tuners use these to discard candidates that would not fit a device before
//! paying for generation and compilation.

use serde::Serialize;
use symbolic::{preset, ExpressionTree, ExtractError, NumericType};

use crate::params::{GemmParams, Transpose};

/// Shape of the two staging buffers, as `[leading, other]` element counts.
///
/// Layouts that read along `kL` are padded by one column (`kL + 1`) so that
/// threads of a fetch row land in different memory banks. Extents saturate,
/// so any parameter set yields a layout; only validated ones are meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagingLayout {
    pub a: [u32; 2],
    pub b: [u32; 2],
}

impl StagingLayout {
    pub fn of(params: &GemmParams) -> Self {
        let (ml, nl, kl) = (params.ml(), params.nl(), params.kl());
        let a = match params.a_trans() {
            Transpose::N => [ml, kl],
            Transpose::T => [kl.saturating_add(1), ml],
        };
        let b = match params.b_trans() {
            Transpose::T => [nl, kl],
            Transpose::N => [kl.saturating_add(1), nl],
        };
        StagingLayout { a, b }
    }

    pub fn a_len(&self) -> u64 {
        u64::from(self.a[0]) * u64::from(self.a[1])
    }

    pub fn b_len(&self) -> u64 {
        u64::from(self.b[0]) * u64::from(self.b[1])
    }
}

/// Bytes of local memory one work-group needs for staging.
pub fn local_memory_bytes(params: &GemmParams, dtype: NumericType) -> u64 {
    let layout = StagingLayout::of(params);
    layout
        .a_len()
        .saturating_add(layout.b_len())
        .saturating_mul(dtype.size_of() as u64)
}

/// Bytes of registers one thread needs for its accumulator and operand tiles.
pub fn register_bytes(params: &GemmParams, dtype: NumericType) -> u64 {
    let (ms, ks, ns) = (params.ms() as u64, params.ks() as u64, params.ns() as u64);
    (ms * ns)
        .saturating_add(ms * ks)
        .saturating_add(ks * ns)
        .saturating_mul(dtype.size_of() as u64)
}

/// Elements of the split-depth workspace; zero without split-depth.
pub fn workspace_elements(params: &GemmParams, m: usize, n: usize) -> u64 {
    if params.depth() > 1 {
        (m as u64)
            .saturating_mul(n as u64)
            .saturating_mul(params.depth() as u64)
    } else {
        0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResourceUsage {
    pub local_memory_bytes: u64,
    pub register_bytes: u64,
    pub workspace_elements: u64,
}

/// Estimate the resources needed to evaluate `tree` with `params`.
pub fn estimate(params: &GemmParams, tree: &ExpressionTree) -> Result<ResourceUsage, ExtractError> {
    let args = preset::extract(tree)?;
    let (m, n, _) = args.sizes(params.a_trans());
    let dtype = args.dtype();
    Ok(ResourceUsage {
        local_memory_bytes: local_memory_bytes(params, dtype),
        register_bytes: register_bytes(params, dtype),
        workspace_elements: workspace_elements(params, m, n),
    })
}
