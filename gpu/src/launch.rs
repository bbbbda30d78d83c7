//! Launch configuration and submission.
//!
//! Turns an expression tree into one main launch plus, with split depth, one
//! reduction launch. Arguments are bound positionally in the order the
//! generated signatures declare them.

use smallvec::smallvec;
use symbolic::{preset, ArrayInfo, ExpressionTree, ExtractError, GemmArgs, GemmOperand, ScalarValue};
use thiserror::Error;

use crate::backend::{BufferHandle, CommandQueue, KernelArg, KernelArgs, KernelLaunch, LaunchError, NdRange};
use crate::codegen::{gemm_kernel_name, reduce_kernel_name};
use crate::params::{GemmParams, GemmVariant, Transpose};
use crate::resources::workspace_elements;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum GemmError {
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error("expression is a {found} product but the program was generated for {expected}")]
    VariantMismatch {
        expected: GemmVariant,
        found: GemmVariant,
    },
    #[error("operand {operand} cannot be read with {vector_width}-wide vectors: {reason}")]
    Misaligned {
        operand: GemmOperand,
        vector_width: u32,
        reason: &'static str,
    },
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

/// Round `x` up to a multiple of `to`.
pub fn align(x: usize, to: usize) -> usize {
    x.div_ceil(to) * to
}

/// NDRange of the main kernel for an `m × n` output.
pub fn main_grid(params: &GemmParams, m: usize, n: usize) -> NdRange {
    let (ls0, ls1) = (params.ls0() as usize, params.ls1() as usize);
    NdRange {
        global: [
            align(m.div_ceil(params.ms() as usize), ls0),
            align(n.div_ceil(params.ns() as usize), ls1),
            params.depth() as usize,
        ],
        local: [ls0, ls1, 1],
    }
}

/// NDRange of the reduction kernel for an `m × n` output.
pub fn reduce_grid(params: &GemmParams, m: usize, n: usize) -> NdRange {
    let (ls0, ls1) = (params.ls0() as usize, params.ls1() as usize);
    NdRange {
        global: [align(m, ls0), align(n, ls1), 1],
        local: [ls0, ls1, 1],
    }
}

/// Where the main kernel writes: the destination view, or the split-depth
/// workspace laid out as `depth` dense `M × N` slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputBinding {
    pub handle: BufferHandle,
    pub ld: usize,
    pub offset: usize,
    pub stride1: usize,
}

impl OutputBinding {
    pub fn view(c: &ArrayInfo) -> Self {
        OutputBinding {
            handle: c.handle,
            ld: c.ld(),
            offset: c.offset(),
            stride1: c.row_stride(),
        }
    }

    pub fn workspace(handle: BufferHandle, m: usize) -> Self {
        OutputBinding {
            handle,
            ld: m,
            offset: 0,
            stride1: 1,
        }
    }
}

fn size(v: usize) -> KernelArg {
    KernelArg::Size(v as u64)
}

/// Positional arguments of `gemm{suffix}`:
/// `M, N, K, C, ldc, offc, Cstride1, alpha, A, lda, offa, Astride1, B, ldb, offb, Bstride1, beta`.
#[allow(clippy::too_many_arguments)]
pub fn gemm_arguments(
    m: usize,
    n: usize,
    k: usize,
    out: &OutputBinding,
    alpha: ScalarValue,
    a: &ArrayInfo,
    b: &ArrayInfo,
    beta: ScalarValue,
) -> KernelArgs {
    smallvec![
        size(m),
        size(n),
        size(k),
        KernelArg::Buffer(out.handle),
        size(out.ld),
        size(out.offset),
        size(out.stride1),
        KernelArg::Scalar(alpha),
        KernelArg::Buffer(a.handle),
        size(a.ld()),
        size(a.offset()),
        size(a.row_stride()),
        KernelArg::Buffer(b.handle),
        size(b.ld()),
        size(b.offset()),
        size(b.row_stride()),
        KernelArg::Scalar(beta),
    ]
}

/// Positional arguments of `reduce{suffix}`:
/// `M, N, D, Z, Zld, C, ldc, Cstart, Cstride, beta`.
pub fn reduce_arguments(
    params: &GemmParams,
    m: usize,
    n: usize,
    workspace: BufferHandle,
    c: &ArrayInfo,
    beta: ScalarValue,
) -> KernelArgs {
    smallvec![
        size(m),
        size(n),
        size(params.depth() as usize),
        KernelArg::Buffer(workspace),
        size(m),
        KernelArg::Buffer(c.handle),
        size(c.ld()),
        size(c.offset()),
        size(c.row_stride()),
        KernelArg::Scalar(beta),
    ]
}

/// Vector loads read `vw` consecutive elements, so the vectorized extent must
/// not straddle the matrix edge and the vectorized axis must be dense.
pub fn check_alignment(params: &GemmParams, args: &GemmArgs, m: usize, n: usize) -> Result<(), GemmError> {
    let vw = params.vw();
    if vw == 1 {
        return Ok(());
    }
    let misaligned = |operand, reason| GemmError::Misaligned {
        operand,
        vector_width: vw,
        reason,
    };
    if args.a.row_stride() != 1 {
        return Err(misaligned(GemmOperand::A, "row stride is not 1"));
    }
    if params.a_trans() == Transpose::N && m % vw as usize != 0 {
        return Err(misaligned(GemmOperand::A, "M is not a multiple of the vector width"));
    }
    if args.b.row_stride() != 1 {
        return Err(misaligned(GemmOperand::B, "row stride is not 1"));
    }
    if params.b_trans() == Transpose::T && n % vw as usize != 0 {
        return Err(misaligned(GemmOperand::B, "N is not a multiple of the vector width"));
    }
    Ok(())
}

/// Extract the GEMM in `tree` and submit it to `queue` using the program
/// generated for `params` under `suffix`.
pub fn enqueue<Q: CommandQueue>(
    queue: &mut Q,
    params: &GemmParams,
    suffix: &str,
    tree: &ExpressionTree,
) -> Result<(), GemmError> {
    let args = preset::extract(tree)?;
    enqueue_args(queue, params, suffix, &args)
}

/// Submit already extracted operands.
pub fn enqueue_args<Q: CommandQueue>(
    queue: &mut Q,
    params: &GemmParams,
    suffix: &str,
    args: &GemmArgs,
) -> Result<(), GemmError> {
    let found = GemmVariant::from_flags(args.a_trans, args.b_trans);
    if found != params.variant() {
        return Err(GemmError::VariantMismatch {
            expected: params.variant(),
            found,
        });
    }

    let (m, n, k) = args.sizes(params.a_trans());
    if m == 0 || n == 0 || k == 0 {
        log::debug!("gemm{}: empty problem {}x{}x{}, nothing to launch", suffix, m, n, k);
        return Ok(());
    }
    check_alignment(params, args, m, n)?;

    let split = params.depth() > 1;
    let workspace = if split {
        let elements = workspace_elements(params, m, n) as usize;
        Some(queue.workspace(elements, args.dtype())?)
    } else {
        None
    };
    let out = match workspace {
        Some(handle) => OutputBinding::workspace(handle, m),
        None => OutputBinding::view(&args.c),
    };

    let main = KernelLaunch {
        kernel: gemm_kernel_name(suffix),
        range: main_grid(params, m, n),
        args: gemm_arguments(m, n, k, &out, args.alpha, &args.a, &args.b, args.beta),
    };
    log::debug!("enqueue {} ({}x{}x{}) {}", main.kernel, m, n, k, main.range);
    queue.enqueue(main)?;

    if let Some(handle) = workspace {
        let reduce = KernelLaunch {
            kernel: reduce_kernel_name(suffix),
            range: reduce_grid(params, m, n),
            args: reduce_arguments(params, m, n, handle, &args.c, args.beta),
        };
        log::debug!("enqueue {} {}", reduce.kernel, reduce.range);
        queue.enqueue(reduce)?;
    }
    Ok(())
}
