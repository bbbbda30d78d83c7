//! Host verification of a tuning profile.
//!
//! Runs the generated program for the profile's problem on random operands
//! through the host reference queue and compares against a naive product.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use symbolic::{extract, NumericType};
use tilegen_gpu::{enqueue, validate, GemmParams, HostQueue, ProgramCache};

use crate::profile::Problem;

#[derive(Debug, Clone, PartialEq)]
pub struct VerifyReport {
    /// Largest relative error over all elements of C.
    pub max_error: f64,
    pub tolerance: f64,
    /// Kernels launched (1, or 2 with split depth).
    pub launches: usize,
}

impl VerifyReport {
    pub fn passed(&self) -> bool {
        self.max_error <= self.tolerance
    }
}

/// Accepted relative error per element type.
pub fn tolerance(dtype: NumericType) -> f64 {
    match dtype {
        NumericType::Float32 => 1e-5,
        NumericType::Float64 => 1e-12,
        NumericType::Int32 | NumericType::Int64 => 0.0,
    }
}

fn sample(dtype: NumericType, rng: &mut StdRng) -> f64 {
    if dtype.is_floating() {
        rng.gen_range(-1.0..1.0)
    } else {
        f64::from(rng.gen_range(-4i32..=4))
    }
}

pub fn verify(params: &GemmParams, problem: &Problem, seed: u64) -> Result<VerifyReport, String> {
    validate(params).map_err(|v| format!("invalid parameters: {} (code {})", v, v.code()))?;

    let dtype = problem.dtype;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut random = |len: usize| -> Vec<f64> { (0..len).map(|_| sample(dtype, &mut rng)).collect() };
    let [(ar, ac), (br, bc)] = problem.operand_shapes(params);

    let mut queue = HostQueue::new();
    let c = queue.upload(dtype, random(problem.m * problem.n));
    let a = queue.upload(dtype, random(ar * ac));
    let b = queue.upload(dtype, random(br * bc));
    let tree = problem.expression(params, [c, a, b]);

    let args = extract(&tree).map_err(|e| e.to_string())?;
    let expected = queue.naive_gemm(&args).map_err(|e| e.to_string())?;

    let mut cache = ProgramCache::new();
    let suffix = cache
        .get_or_compile(&mut queue, params, dtype)
        .map_err(|e| e.to_string())?
        .suffix
        .clone();
    enqueue(&mut queue, params, &suffix, &tree).map_err(|e| e.to_string())?;

    let actual = queue
        .read(c)
        .ok_or_else(|| format!("result buffer {} missing", c))?;
    let max_error = actual
        .iter()
        .zip(&expected)
        .map(|(x, y)| (x - y).abs() / (1.0 + y.abs()))
        .fold(0.0, f64::max);
    log::debug!("verified {} with max relative error {:e}", params, max_error);

    Ok(VerifyReport {
        max_error,
        tolerance: tolerance(dtype),
        launches: queue.history().len(),
    })
}
