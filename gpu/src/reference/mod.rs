//! Host reference queue.
//!
//! `HostQueue` is a [`CommandQueue`] and [`ProgramCompiler`] that runs
//! generated programs on the CPU. Compilation parses the kernel text and
//! lowers each kernel to a flat instruction list; every launch then
//! interprets that list for each work-item of each work-group, treating
//! barriers as phase boundaries across the group. Buffer accesses are
//! bounds-checked and counted, so indexing mistakes in the emitted text
//! surface as [`LaunchError::OutOfBounds`] instead of silent corruption.

mod exec;
mod lower;
mod syntax;

use fxhash::FxHashMap;
use symbolic::{ArrayHandle, GemmArgs, NumericType, Transpose};

use crate::backend::{
    BufferHandle, CommandQueue, CompileError, KernelLaunch, LaunchError, NdRange, ProgramCompiler,
};
use crate::codegen::KernelSource;
use crate::params::GemmParams;
use crate::validate::validate;

/// Instructions one work-item may execute per launch before the launch is
/// abandoned.
pub const DEFAULT_STEP_LIMIT: u64 = 1 << 26;

#[derive(Debug, Clone)]
struct HostBuffer {
    data: Vec<f64>,
    dtype: NumericType,
    reads: usize,
    writes: usize,
}

/// Round `v` to what an element of `dtype` can hold.
fn narrow(dtype: NumericType, v: f64) -> f64 {
    match dtype {
        NumericType::Float32 => v as f32 as f64,
        NumericType::Float64 => v,
        NumericType::Int32 => v as i32 as f64,
        NumericType::Int64 => v as i64 as f64,
    }
}

/// Buffers owned by a host queue.
#[derive(Debug, Default)]
struct HostMemory {
    buffers: FxHashMap<BufferHandle, HostBuffer>,
    next_handle: u64,
}

impl HostMemory {
    fn upload(&mut self, dtype: NumericType, data: Vec<f64>) -> BufferHandle {
        let handle = ArrayHandle(self.next_handle);
        self.next_handle += 1;
        let data = data.into_iter().map(|v| narrow(dtype, v)).collect();
        self.buffers.insert(
            handle,
            HostBuffer {
                data,
                dtype,
                reads: 0,
                writes: 0,
            },
        );
        handle
    }

    fn buffer(&self, handle: BufferHandle) -> Result<&HostBuffer, LaunchError> {
        self.buffers
            .get(&handle)
            .ok_or(LaunchError::UnknownBuffer(handle))
    }

    fn data(&self, handle: BufferHandle) -> Option<&[f64]> {
        self.buffers.get(&handle).map(|b| b.data.as_slice())
    }

    fn dtype(&self, handle: BufferHandle) -> Result<NumericType, LaunchError> {
        self.buffer(handle).map(|b| b.dtype)
    }

    fn load(&mut self, handle: BufferHandle, index: i64) -> Result<f64, LaunchError> {
        let buffer = self
            .buffers
            .get_mut(&handle)
            .ok_or(LaunchError::UnknownBuffer(handle))?;
        let value = usize::try_from(index)
            .ok()
            .and_then(|i| buffer.data.get(i).copied())
            .ok_or_else(|| LaunchError::OutOfBounds {
                region: handle.to_string(),
                index,
                len: buffer.data.len(),
            })?;
        buffer.reads += 1;
        Ok(value)
    }

    fn store(&mut self, handle: BufferHandle, index: i64, value: f64) -> Result<(), LaunchError> {
        let buffer = self
            .buffers
            .get_mut(&handle)
            .ok_or(LaunchError::UnknownBuffer(handle))?;
        let len = buffer.data.len();
        let dtype = buffer.dtype;
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| buffer.data.get_mut(i))
            .ok_or_else(|| LaunchError::OutOfBounds {
                region: handle.to_string(),
                index,
                len,
            })?;
        *slot = narrow(dtype, value);
        buffer.writes += 1;
        Ok(())
    }
}

/// One executed launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRecord {
    pub kernel: String,
    pub range: NdRange,
}

struct CompiledKernel {
    kernel: lower::Kernel,
    params: GemmParams,
    /// The GEMM kernel proper, as opposed to its reduction.
    main: bool,
}

pub struct HostQueue {
    memory: HostMemory,
    kernels: FxHashMap<String, CompiledKernel>,
    workspace: Option<BufferHandle>,
    history: Vec<LaunchRecord>,
    step_limit: u64,
}

impl Default for HostQueue {
    fn default() -> Self {
        HostQueue {
            memory: HostMemory::default(),
            kernels: FxHashMap::default(),
            workspace: None,
            history: Vec::new(),
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }
}

impl HostQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue that abandons any launch in which one work-item executes
    /// more than `limit` instructions.
    pub fn with_step_limit(limit: u64) -> Self {
        HostQueue {
            step_limit: limit,
            ..Self::default()
        }
    }

    /// Copy `data` into a new buffer.
    pub fn upload(&mut self, dtype: NumericType, data: Vec<f64>) -> BufferHandle {
        self.memory.upload(dtype, data)
    }

    /// A new zero-filled buffer.
    pub fn alloc(&mut self, dtype: NumericType, len: usize) -> BufferHandle {
        self.upload(dtype, vec![0.0; len])
    }

    pub fn read(&self, handle: BufferHandle) -> Option<&[f64]> {
        self.memory.data(handle)
    }

    /// Element reads performed on `handle` by executed launches.
    pub fn reads(&self, handle: BufferHandle) -> usize {
        self.memory.buffers.get(&handle).map_or(0, |b| b.reads)
    }

    /// Element writes performed on `handle` by executed launches.
    pub fn writes(&self, handle: BufferHandle) -> usize {
        self.memory.buffers.get(&handle).map_or(0, |b| b.writes)
    }

    pub fn history(&self) -> &[LaunchRecord] {
        &self.history
    }

    /// Naive evaluation of `args` over the current buffer contents.
    ///
    /// Returns what C's whole buffer should hold after the GEMM; empty
    /// problems leave it untouched.
    pub fn naive_gemm(&self, args: &GemmArgs) -> Result<Vec<f64>, LaunchError> {
        let a = self.memory.buffer(args.a.handle)?;
        let b = self.memory.buffer(args.b.handle)?;
        let c = self.memory.buffer(args.c.handle)?;
        let mut out = c.data.clone();
        let (m, n, k) = args.sizes(args.a_trans);
        if m == 0 || n == 0 || k == 0 {
            return Ok(out);
        }

        let get = |buffer: &HostBuffer, handle: BufferHandle, index: usize| {
            buffer
                .data
                .get(index)
                .copied()
                .ok_or_else(|| LaunchError::OutOfBounds {
                    region: handle.to_string(),
                    index: index as i64,
                    len: buffer.data.len(),
                })
        };
        let (alpha, beta) = (args.alpha.as_f64(), args.beta.as_f64());
        for j in 0..n {
            for i in 0..m {
                let mut acc = 0.0;
                for q in 0..k {
                    let ai = match args.a_trans {
                        Transpose::N => args.a.index(i, q),
                        Transpose::T => args.a.index(q, i),
                    };
                    let bi = match args.b_trans {
                        Transpose::N => args.b.index(q, j),
                        Transpose::T => args.b.index(j, q),
                    };
                    acc += get(a, args.a.handle, ai)? * get(b, args.b.handle, bi)?;
                }
                let ci = args.c.index(i, j);
                let mut value = alpha * acc;
                if !args.beta.is_zero() {
                    value += beta * get(c, args.c.handle, ci)?;
                }
                if let Some(slot) = out.get_mut(ci) {
                    *slot = narrow(c.dtype, value);
                }
            }
        }
        Ok(out)
    }

    /// Reject ranges the kernel cannot be launched with: uneven or empty
    /// work-groups anywhere, and for a GEMM kernel a work-group shape or
    /// depth other than the one it was generated for.
    fn check_range(&self, compiled: &CompiledKernel, range: &NdRange) -> Result<(), LaunchError> {
        let uneven = (0..3).any(|d| range.local[d] == 0 || range.global[d] % range.local[d] != 0);
        let p = &compiled.params;
        let mismatched = compiled.main
            && (range.local != [p.ls0() as usize, p.ls1() as usize, 1]
                || range.global[2] != p.depth() as usize);
        if uneven || mismatched {
            return Err(LaunchError::InvalidRange {
                kernel: compiled.kernel.name.clone(),
                range: *range,
            });
        }
        Ok(())
    }
}

impl CommandQueue for HostQueue {
    fn workspace(&mut self, elements: usize, dtype: NumericType) -> Result<BufferHandle, LaunchError> {
        if let Some(handle) = self.workspace {
            let fits = self
                .memory
                .buffers
                .get(&handle)
                .is_some_and(|b| b.dtype == dtype && b.data.len() >= elements);
            if fits {
                return Ok(handle);
            }
            self.memory.buffers.remove(&handle);
        }
        let handle = self.alloc(dtype, elements);
        self.workspace = Some(handle);
        Ok(handle)
    }

    fn enqueue(&mut self, launch: KernelLaunch) -> Result<(), LaunchError> {
        let compiled = self
            .kernels
            .get(&launch.kernel)
            .ok_or_else(|| LaunchError::UnknownKernel(launch.kernel.clone()))?;
        self.check_range(compiled, &launch.range)?;
        let params = exec::bind(&compiled.kernel, &launch.args, &self.memory)?;
        exec::execute(
            &compiled.kernel,
            &params,
            &launch.range,
            &mut self.memory,
            self.step_limit,
        )?;
        log::trace!("host executed {} ({})", launch.kernel, launch.range);
        self.history.push(LaunchRecord {
            kernel: launch.kernel,
            range: launch.range,
        });
        Ok(())
    }
}

impl ProgramCompiler for HostQueue {
    type Program = String;

    fn compile(&mut self, source: &KernelSource) -> Result<String, CompileError> {
        let fail = |message: String| CompileError {
            suffix: source.suffix.clone(),
            message,
        };
        validate(&source.params).map_err(|v| fail(v.to_string()))?;
        let kernels = syntax::parse_program(&source.text)
            .map_err(fail)?
            .iter()
            .map(lower::lower)
            .collect::<Result<Vec<_>, _>>()
            .map_err(fail)?;

        let main = source.gemm_name();
        let mut names = vec![main.clone()];
        names.extend(source.reduce_name());
        for name in &names {
            if !kernels.iter().any(|k| &k.name == name) {
                return Err(fail(format!("kernel `{}` not found in source", name)));
            }
        }
        for kernel in kernels {
            log::trace!(
                "host compiled {}: {} instructions, {} slots",
                kernel.name,
                kernel.code.len(),
                kernel.slots.len()
            );
            self.kernels.insert(
                kernel.name.clone(),
                CompiledKernel {
                    main: kernel.name == main,
                    kernel,
                    params: source.params,
                },
            );
        }
        Ok(source.suffix.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::KernelArg;
    use crate::launch::{enqueue, GemmError};
    use crate::params::{GemmVariant, Tiling};
    use symbolic::{gemm_expression, ArrayInfo, ExpressionTree, ScalarValue};

    const F64: NumericType = NumericType::Float64;

    fn scenario_params() -> GemmParams {
        GemmParams::nn(Tiling {
            vector_width: 1,
            local_size: [2, 2],
            kl: 4,
            depth: 1,
            register_tile: [2, 2, 2],
            local_fetch: [2, 2],
            ..Tiling::default()
        })
    }

    fn column_major(rows: usize, cols: usize, f: impl Fn(usize, usize) -> f64) -> Vec<f64> {
        let mut data = Vec::with_capacity(rows * cols);
        for j in 0..cols {
            for i in 0..rows {
                data.push(f(i, j));
            }
        }
        data
    }

    #[test]
    fn test_identity_times_b() {
        let params = scenario_params();
        let mut queue = HostQueue::new();
        let suffix = queue
            .compile(&KernelSource::generate(&params, F64, "_nn0"))
            .unwrap();

        let a = queue.upload(F64, column_major(4, 4, |i, j| if i == j { 1.0 } else { 0.0 }));
        let b_data = column_major(4, 4, |i, j| (i * 4 + j) as f64 + 0.25);
        let b = queue.upload(F64, b_data.clone());
        let c = queue.alloc(F64, 16);
        let tree = gemm_expression(
            ArrayInfo::dense(c, F64, 4, 4),
            ScalarValue::F64(1.0),
            ArrayInfo::dense(a, F64, 4, 4),
            Transpose::N,
            ArrayInfo::dense(b, F64, 4, 4),
            Transpose::N,
            ScalarValue::F64(0.0),
        );
        enqueue(&mut queue, &params, &suffix, &tree).unwrap();
        assert_eq!(queue.read(c).unwrap(), b_data.as_slice());
        // beta == 0 never reads C
        assert_eq!(queue.reads(c), 0);
        assert_eq!(queue.writes(c), 16);
    }

    #[test]
    fn test_ragged_rows_stay_in_bounds() {
        let params = scenario_params();
        let mut queue = HostQueue::new();
        queue
            .compile(&KernelSource::generate(&params, F64, "_nn0"))
            .unwrap();

        // Buffers sized exactly; any stray access fails the launch.
        let a = queue.upload(F64, column_major(5, 4, |i, j| (i + 2 * j) as f64));
        let b = queue.upload(F64, column_major(4, 4, |i, j| (3 * i + j) as f64 - 4.0));
        let c = queue.alloc(F64, 20);
        let cv = ArrayInfo::dense(c, F64, 5, 4);
        let av = ArrayInfo::dense(a, F64, 5, 4);
        let bv = ArrayInfo::dense(b, F64, 4, 4);
        let tree = gemm_expression(cv, ScalarValue::F64(1.0), av, Transpose::N, bv, Transpose::N, ScalarValue::F64(0.0));
        let expected = queue.naive_gemm(&symbolic::extract(&tree).unwrap()).unwrap();

        enqueue(&mut queue, &params, "_nn0", &tree).unwrap();
        assert_eq!(queue.read(c).unwrap(), expected.as_slice());
    }

    #[test]
    fn test_out_of_bounds_is_reported() {
        let params = scenario_params();
        let mut queue = HostQueue::new();
        queue
            .compile(&KernelSource::generate(&params, F64, "_nn0"))
            .unwrap();
        let a = queue.alloc(F64, 15);
        let b = queue.alloc(F64, 16);
        let c = queue.alloc(F64, 16);
        let tree = gemm_expression(
            ArrayInfo::dense(c, F64, 4, 4),
            ScalarValue::F64(1.0),
            ArrayInfo::dense(a, F64, 4, 4),
            Transpose::N,
            ArrayInfo::dense(b, F64, 4, 4),
            Transpose::N,
            ScalarValue::F64(0.0),
        );
        let err = enqueue(&mut queue, &params, "_nn0", &tree).unwrap_err();
        assert!(matches!(
            err,
            crate::launch::GemmError::Launch(LaunchError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_rejects_unknown_and_invalid() {
        let mut queue = HostQueue::new();
        let launch = KernelLaunch {
            kernel: "gemm_zz9".into(),
            range: NdRange {
                global: [2, 2, 1],
                local: [2, 2, 1],
            },
            args: Default::default(),
        };
        assert_eq!(
            queue.enqueue(launch),
            Err(LaunchError::UnknownKernel("gemm_zz9".into()))
        );

        let mut bad = Tiling::default();
        bad.register_tile[1] = bad.kl;
        let source = KernelSource::generate(&GemmParams::nn(bad), F64, "_nn0");
        assert!(queue.compile(&source).is_err());
    }

    #[test]
    fn test_argument_count_checked() {
        let params = scenario_params();
        let mut queue = HostQueue::new();
        queue
            .compile(&KernelSource::generate(&params, F64, "_nn0"))
            .unwrap();
        let launch = KernelLaunch {
            kernel: "gemm_nn0".into(),
            range: NdRange {
                global: [2, 2, 1],
                local: [2, 2, 1],
            },
            args: smallvec::smallvec![KernelArg::Size(4)],
        };
        assert!(matches!(
            queue.enqueue(launch),
            Err(LaunchError::ArgumentCount {
                expected: 17,
                found: 1,
                ..
            })
        ));
    }

    #[test]
    fn test_workspace_reuse() {
        let mut queue = HostQueue::new();
        let first = queue.workspace(32, F64).unwrap();
        assert_eq!(queue.workspace(16, F64).unwrap(), first);
        let bigger = queue.workspace(64, F64).unwrap();
        assert_ne!(bigger, first);
        assert!(queue.read(first).is_none());
        assert_eq!(queue.read(bigger).unwrap().len(), 64);
    }

    /// `C = A@B` over dense `m × k` and `k × n` buffers sized exactly.
    fn exact_problem(queue: &mut HostQueue, m: usize, n: usize, k: usize) -> ExpressionTree {
        let a = queue.upload(F64, column_major(m, k, |i, j| (i + 3 * j) as f64 - 2.0));
        let b = queue.upload(F64, column_major(k, n, |i, j| (2 * i + j) as f64 * 0.5));
        let c = queue.alloc(F64, m * n);
        gemm_expression(
            ArrayInfo::dense(c, F64, m, n),
            ScalarValue::F64(1.0),
            ArrayInfo::dense(a, F64, m, k),
            Transpose::N,
            ArrayInfo::dense(b, F64, k, n),
            Transpose::N,
            ScalarValue::F64(0.0),
        )
    }

    /// The generated program with `edit` applied to its text.
    fn edited(params: &GemmParams, edit: impl Fn(&str) -> String) -> KernelSource {
        let source = KernelSource::generate(params, F64, "_nn0");
        KernelSource {
            text: edit(&source.text),
            ..source
        }
    }

    /// The generated signature of `gemm_nn0` with a replacement body.
    fn with_body(params: &GemmParams, body: &str) -> KernelSource {
        edited(params, |text| {
            let header = text.split('{').next().unwrap_or_default();
            format!("{}{}", header, body)
        })
    }

    fn launch_error(err: GemmError) -> LaunchError {
        match err {
            GemmError::Launch(e) => e,
            other => panic!("expected a launch error, got {:?}", other),
        }
    }

    #[test]
    fn test_every_generated_program_compiles() {
        let scalar = Tiling {
            vector_width: 1,
            local_size: [4, 4],
            kl: 8,
            depth: 1,
            register_tile: [2, 2, 2],
            local_fetch: [4, 4],
            ..Tiling::default()
        };
        let vector = Tiling {
            vector_width: 2,
            local_fetch: [2, 8],
            ..scalar
        };
        for variant in GemmVariant::ALL {
            for tiling in [scalar, vector] {
                for depth in [1, 2] {
                    let params = GemmParams::new(variant, Tiling { depth, ..tiling });
                    for dtype in [NumericType::Float32, NumericType::Int64] {
                        let mut queue = HostQueue::new();
                        let source = KernelSource::generate(&params, dtype, "_x");
                        queue.compile(&source).unwrap();
                        assert!(queue.kernels.get("gemm_x").is_some_and(|k| k.main));
                        assert_eq!(queue.kernels.contains_key("reduce_x"), depth > 1);
                    }
                }
            }
        }
    }

    #[test]
    fn test_missing_depth_decrement_runs_off_the_operands() {
        let params = scenario_params();
        let mut queue = HostQueue::new();
        let source = edited(&params, |text| {
            assert!(text.contains("Kr -= 4;"));
            text.replace("Kr -= 4;", "")
        });
        queue.compile(&source).unwrap();
        let tree = exact_problem(&mut queue, 4, 4, 4);
        let err = launch_error(enqueue(&mut queue, &params, "_nn0", &tree).unwrap_err());
        assert!(matches!(err, LaunchError::OutOfBounds { .. }), "{:?}", err);
    }

    #[test]
    fn test_loose_tail_predicate_reads_past_k() {
        let params = scenario_params();

        // one full block plus a single tail column
        let mut queue = HostQueue::new();
        queue
            .compile(&KernelSource::generate(&params, F64, "_nn0"))
            .unwrap();
        let tree = exact_problem(&mut queue, 4, 4, 5);
        let expected = queue.naive_gemm(&symbolic::extract(&tree).unwrap()).unwrap();
        enqueue(&mut queue, &params, "_nn0", &tree).unwrap();
        let c = symbolic::extract(&tree).unwrap().c.handle;
        assert_eq!(queue.read(c).unwrap(), expected.as_slice());

        let mut queue = HostQueue::new();
        let source = edited(&params, |text| {
            assert!(text.contains("int condy0 = 0 < Ky;"));
            text.replace(" < Ky;", " <= Ky;")
        });
        queue.compile(&source).unwrap();
        let tree = exact_problem(&mut queue, 4, 4, 5);
        let err = launch_error(enqueue(&mut queue, &params, "_nn0", &tree).unwrap_err());
        assert!(matches!(err, LaunchError::OutOfBounds { .. }), "{:?}", err);
    }

    #[test]
    fn test_barriers_order_staging_and_compute() {
        let params = scenario_params();
        let mut queue = HostQueue::new();
        let source = edited(&params, |text| text.replace("$LOCAL_BARRIER;", ""));
        queue.compile(&source).unwrap();

        let a = queue.upload(F64, column_major(4, 4, |i, j| if i == j { 1.0 } else { 0.0 }));
        let b_data = column_major(4, 4, |i, j| (i * 4 + j) as f64 + 0.25);
        let b = queue.upload(F64, b_data.clone());
        let c = queue.alloc(F64, 16);
        let tree = gemm_expression(
            ArrayInfo::dense(c, F64, 4, 4),
            ScalarValue::F64(1.0),
            ArrayInfo::dense(a, F64, 4, 4),
            Transpose::N,
            ArrayInfo::dense(b, F64, 4, 4),
            Transpose::N,
            ScalarValue::F64(0.0),
        );
        // without barriers each item computes before its neighbours stage
        enqueue(&mut queue, &params, "_nn0", &tree).unwrap();
        assert_ne!(queue.read(c).unwrap(), b_data.as_slice());
    }

    #[test]
    fn test_step_limit_stops_runaway_loops() {
        let params = scenario_params();
        let mut queue = HostQueue::with_step_limit(1_000);
        queue
            .compile(&with_body(&params, "{\n    while(1) {\n    }\n}\n"))
            .unwrap();
        let tree = exact_problem(&mut queue, 4, 4, 4);
        let err = launch_error(enqueue(&mut queue, &params, "_nn0", &tree).unwrap_err());
        assert_eq!(
            err,
            LaunchError::StepLimit {
                kernel: "gemm_nn0".into(),
                limit: 1_000,
            }
        );
        assert!(queue.history().is_empty());
    }

    #[test]
    fn test_divergent_barrier_is_reported() {
        let params = scenario_params();
        let mut queue = HostQueue::new();
        queue
            .compile(&with_body(
                &params,
                "{\n    if($LOCAL_IDX_0 > 0) return;\n    $LOCAL_BARRIER;\n}\n",
            ))
            .unwrap();
        let tree = exact_problem(&mut queue, 4, 4, 4);
        let err = launch_error(enqueue(&mut queue, &params, "_nn0", &tree).unwrap_err());
        assert_eq!(
            err,
            LaunchError::BarrierDivergence {
                kernel: "gemm_nn0".into()
            }
        );
    }

    #[test]
    fn test_malformed_text_fails_to_compile() {
        let params = scenario_params();
        let mut queue = HostQueue::new();
        let err = queue
            .compile(&edited(&params, |text| text.replace("Kr -= 4;", "Kr -= ;")))
            .unwrap_err();
        assert_eq!(err.suffix, "_nn0");
        assert!(err.message.contains("syntax error on line"), "{}", err.message);

        let err = queue
            .compile(&edited(&params, |text| text.replace("gemm_nn0", "gemm_nn9")))
            .unwrap_err();
        assert!(err.message.contains("`gemm_nn0` not found"), "{}", err.message);

        let err = queue
            .compile(&edited(&params, |text| text.replace("$GROUP_IDX_1", "$GROUP_ID_1")))
            .unwrap_err();
        assert!(err.message.contains("unknown placeholder"), "{}", err.message);
    }

    #[test]
    fn test_range_must_match_tiling() {
        let params = scenario_params();
        let mut queue = HostQueue::new();
        queue
            .compile(&KernelSource::generate(&params, F64, "_nn0"))
            .unwrap();
        for (global, local) in [([4, 4, 1], [4, 1, 1]), ([2, 2, 2], [2, 2, 1]), ([3, 2, 1], [2, 2, 1])] {
            let launch = KernelLaunch {
                kernel: "gemm_nn0".into(),
                range: NdRange { global, local },
                args: Default::default(),
            };
            assert!(matches!(
                queue.enqueue(launch),
                Err(LaunchError::InvalidRange { .. })
            ));
        }
    }
}
