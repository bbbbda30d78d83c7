//! Parameter-set validation.
//!
//! Rules are evaluated in a fixed order and the first failure is reported, so
//! a given parameter set always maps to the same violation. Autotuners call
//! this on every candidate, so it allocates nothing and logs at `trace` only.

use thiserror::Error;

use crate::params::{FetchPolicy, GemmParams, Transpose};

/// Largest block-tile extent a single work-group may own.
pub const MAX_BLOCK_DIM: u32 = 256;

/// Why a parameter set cannot be generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum Violation {
    #[error("operand A must be staged through local memory")]
    AFetchPolicy = 1,
    #[error("operand B must be staged through local memory")]
    BFetchPolicy = 2,
    #[error("register tile (mS, nS) must be a multiple of the vector width")]
    RegisterTileNotVectorMultiple = 3,
    #[error("block tile exceeds 256 rows or columns")]
    BlockTooLarge = 4,
    #[error("kS must not be a multiple of kL")]
    KsMultipleOfKl = 5,
    #[error("local fetch layout lf0*lf1 must equal the work-group size ls0*ls1")]
    LocalFetchProductMismatch = 6,
    #[error("A staging extent is not divisible by lf1")]
    ALocalFetch1 = 7,
    #[error("A staging extent is not divisible by lf0*vw")]
    ALocalFetch0 = 8,
    #[error("B staging extent is not divisible by lf1")]
    BLocalFetch1 = 9,
    #[error("B staging extent is not divisible by lf0*vw")]
    BLocalFetch0 = 10,
    #[error("kL must be a multiple of kS")]
    KsNotDivisorOfKl = 11,
    #[error("tiling knobs must all be non-zero")]
    ZeroParameter = 12,
}

impl Violation {
    /// Stable numeric code, suitable for tuning logs.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Check `params` against every generation constraint.
pub fn validate(params: &GemmParams) -> Result<(), Violation> {
    let result = check(params);
    if let Err(violation) = result {
        log::trace!("rejected [{}]: {}", params, violation);
    }
    result
}

fn check(p: &GemmParams) -> Result<(), Violation> {
    let knobs = [
        p.vw(),
        p.ls0(),
        p.ls1(),
        p.kl(),
        p.ms(),
        p.ks(),
        p.ns(),
        p.depth(),
        p.lf0(),
        p.lf1(),
    ];
    if knobs.contains(&0) {
        return Err(Violation::ZeroParameter);
    }

    if p.a_fetch() != FetchPolicy::Local {
        return Err(Violation::AFetchPolicy);
    }
    if p.b_fetch() != FetchPolicy::Local {
        return Err(Violation::BFetchPolicy);
    }

    if p.ms() % p.vw() != 0 || p.ns() % p.vw() != 0 {
        return Err(Violation::RegisterTileNotVectorMultiple);
    }

    if p.ml() > MAX_BLOCK_DIM || p.nl() > MAX_BLOCK_DIM {
        return Err(Violation::BlockTooLarge);
    }

    if p.ks() % p.kl() == 0 {
        return Err(Violation::KsMultipleOfKl);
    }

    // Both operands are staged past this point.
    let wide = |a: u32, b: u32| u64::from(a) * u64::from(b);
    if wide(p.lf0(), p.lf1()) != wide(p.ls0(), p.ls1()) {
        return Err(Violation::LocalFetchProductMismatch);
    }

    let lane = wide(p.lf0(), p.vw());
    let (a_bound1, a_bound0) = match p.a_trans() {
        Transpose::N => (p.kl(), u64::from(p.ml())),
        Transpose::T => (p.ml(), u64::from(p.kl())),
    };
    if a_bound1 % p.lf1() != 0 {
        return Err(Violation::ALocalFetch1);
    }
    if a_bound0 % lane != 0 {
        return Err(Violation::ALocalFetch0);
    }

    let (b_bound1, b_bound0) = match p.b_trans() {
        Transpose::T => (p.kl(), u64::from(p.nl())),
        Transpose::N => (p.nl(), u64::from(p.kl())),
    };
    if b_bound1 % p.lf1() != 0 {
        return Err(Violation::BLocalFetch1);
    }
    if b_bound0 % lane != 0 {
        return Err(Violation::BLocalFetch0);
    }

    if p.kl() % p.ks() != 0 {
        return Err(Violation::KsNotDivisorOfKl);
    }

    Ok(())
}
