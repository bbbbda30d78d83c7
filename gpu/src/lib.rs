//! Tiled GEMM kernel generation.
//!
//! Given a [`GemmParams`] tiling, this crate emits backend-neutral kernel
//! text computing `C = alpha*op(A)*op(B) + beta*C`, checks parameter sets
//! against the generator's structural rules, estimates their resource usage,
//! and binds an expression tree's operands to launches on a caller-supplied
//! [`CommandQueue`].
//!
//! Modules:
//! - [`params`]: tiling parameters and GEMM variants
//! - [`validate`]: structural validity rules
//! - [`resources`]: staging layouts and memory estimates
//! - [`codegen`]: kernel text emission
//! - [`backend`]: compiler and queue collaborator traits
//! - [`kernel_cache`]: compiled program cache
//! - [`launch`]: grid sizing, argument binding and submission
//! - [`reference`]: host-side execution of generated programs

pub mod backend;
pub mod codegen;
pub mod kernel_cache;
pub mod launch;
pub mod params;
pub mod reference;
pub mod resources;
pub mod validate;

pub use backend::{
    BufferHandle, CommandQueue, CompileError, KernelArg, KernelArgs, KernelLaunch, LaunchError,
    NdRange, ProgramCompiler,
};
pub use codegen::{generate, KernelSource};
pub use kernel_cache::{CachedProgram, ProgramCache};
pub use launch::{enqueue, enqueue_args, GemmError};
pub use params::{FetchPolicy, GemmParams, GemmVariant, Tiling, Transpose};
pub use reference::{HostQueue, LaunchRecord};
pub use resources::{estimate, ResourceUsage, StagingLayout};
pub use validate::{validate, Violation};
