//! Execution-side collaborators.
//!
//! The generator never talks to a device. Callers plug in a
//! [`ProgramCompiler`] that turns kernel text into something runnable and a
//! [`CommandQueue`] that accepts launches in submission order.

use std::fmt;

use smallvec::SmallVec;
use symbolic::{ArrayHandle, NumericType, ScalarValue};
use thiserror::Error;

use crate::codegen::KernelSource;

/// Handle of a device buffer. Array views refer to buffers by the same
/// handle type.
pub type BufferHandle = ArrayHandle;

// ---------------------------------------------------------------------------
// Launch description
// ---------------------------------------------------------------------------

/// One positional kernel argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelArg {
    /// An unsigned size, offset or stride.
    Size(u64),
    Buffer(BufferHandle),
    Scalar(ScalarValue),
}

impl fmt::Display for KernelArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelArg::Size(v) => write!(f, "{}", v),
            KernelArg::Buffer(h) => write!(f, "{}", h),
            KernelArg::Scalar(v) => write!(f, "{}", v),
        }
    }
}

/// Argument list of a launch; the main GEMM kernel takes 17.
pub type KernelArgs = SmallVec<[KernelArg; 17]>;

/// Global and local work sizes of a 3-D launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NdRange {
    pub global: [usize; 3],
    pub local: [usize; 3],
}

impl NdRange {
    /// Work-groups per dimension.
    pub fn groups(&self) -> [usize; 3] {
        [
            self.global[0] / self.local[0].max(1),
            self.global[1] / self.local[1].max(1),
            self.global[2] / self.local[2].max(1),
        ]
    }
}

impl fmt::Display for NdRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "global {}x{}x{} local {}x{}x{}",
            self.global[0],
            self.global[1],
            self.global[2],
            self.local[0],
            self.local[1],
            self.local[2]
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KernelLaunch {
    pub kernel: String,
    pub range: NdRange,
    pub args: KernelArgs,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure reported by a command queue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LaunchError {
    #[error("no compiled kernel named `{0}`")]
    UnknownKernel(String),
    #[error("kernel `{kernel}` takes {expected} arguments, got {found}")]
    ArgumentCount {
        kernel: String,
        expected: usize,
        found: usize,
    },
    #[error("argument {index} of `{kernel}` must be a {expected}")]
    ArgumentType {
        kernel: String,
        index: usize,
        expected: &'static str,
    },
    #[error("unknown buffer {0}")]
    UnknownBuffer(BufferHandle),
    #[error("access to {region}[{index}] outside {len} elements")]
    OutOfBounds {
        region: String,
        index: i64,
        len: usize,
    },
    #[error("invalid launch range for `{kernel}`: {range}")]
    InvalidRange { kernel: String, range: NdRange },
    #[error("work-items of `{kernel}` reached different barriers")]
    BarrierDivergence { kernel: String },
    #[error("a work-item of `{kernel}` exceeded {limit} steps")]
    StepLimit { kernel: String, limit: u64 },
    #[error("`{kernel}` failed: {message}")]
    Execution { kernel: String, message: String },
    #[error("backend error: {0}")]
    Backend(String),
}

/// Failure reported by a program compiler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to compile program `{suffix}`: {message}")]
pub struct CompileError {
    pub suffix: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Collaborator traits
// ---------------------------------------------------------------------------

/// In-order command queue.
pub trait CommandQueue {
    /// A scratch buffer of at least `elements` elements of `dtype`, valid
    /// until the next call.
    fn workspace(&mut self, elements: usize, dtype: NumericType)
        -> Result<BufferHandle, LaunchError>;

    /// Submit a launch. Launches execute in submission order.
    fn enqueue(&mut self, launch: KernelLaunch) -> Result<(), LaunchError>;
}

/// Turns generated kernel text into a backend program.
pub trait ProgramCompiler {
    type Program;

    fn compile(&mut self, source: &KernelSource) -> Result<Self::Program, CompileError>;
}
