//! GEMM tuning parameters.
//!
//! A `GemmParams` is built once per candidate configuration and never
//! changes afterwards. The block tile follows from the register tile and the
//! work-group shape: each thread owns `mS` interleaved rows and `nS`
//! interleaved columns, so `mL = mS * ls0` and `nL = nS * ls1`.

use std::fmt;

use serde::{Deserialize, Serialize};

pub use symbolic::Transpose;

/// How an operand reaches the compute loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchPolicy {
    /// Read straight from global memory at every use.
    Global,
    /// Staged once per tile through local (on-chip shared) memory.
    Local,
}

/// Transpose combination of (A, B).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GemmVariant {
    NN,
    TN,
    NT,
    TT,
}

impl GemmVariant {
    pub fn from_flags(a_trans: Transpose, b_trans: Transpose) -> Self {
        match (a_trans, b_trans) {
            (Transpose::N, Transpose::N) => Self::NN,
            (Transpose::T, Transpose::N) => Self::TN,
            (Transpose::N, Transpose::T) => Self::NT,
            (Transpose::T, Transpose::T) => Self::TT,
        }
    }

    pub fn a_trans(self) -> Transpose {
        match self {
            Self::NN | Self::NT => Transpose::N,
            Self::TN | Self::TT => Transpose::T,
        }
    }

    pub fn b_trans(self) -> Transpose {
        match self {
            Self::NN | Self::TN => Transpose::N,
            Self::NT | Self::TT => Transpose::T,
        }
    }

    /// Lower-case tag used in kernel suffixes.
    pub fn name(self) -> &'static str {
        match self {
            Self::NN => "nn",
            Self::TN => "tn",
            Self::NT => "nt",
            Self::TT => "tt",
        }
    }

    pub const ALL: [GemmVariant; 4] = [Self::NN, Self::TN, Self::NT, Self::TT];
}

impl fmt::Display for GemmVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [self.a_trans().as_char(), self.b_trans().as_char()];
        write!(f, "{}{}", flags[0], flags[1])
    }
}

/// Tiling knobs shared by all four variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Tiling {
    /// Elements loaded, stored and computed together (`vw`).
    pub vector_width: u32,
    /// Work-group shape `[ls0, ls1]`.
    pub local_size: [u32; 2],
    /// Depth of one staged block (`kL`).
    pub kl: u32,
    /// Split-depth factor; `1` disables the reduction pass.
    #[serde(default = "default_depth")]
    pub depth: u32,
    /// Per-thread register tile `[mS, kS, nS]`.
    pub register_tile: [u32; 3],
    /// Fetch policy of `[A, B]`.
    pub fetch: [FetchPolicy; 2],
    /// Staging-thread layout `[lf0, lf1]`.
    pub local_fetch: [u32; 2],
}

fn default_depth() -> u32 {
    1
}

impl Default for Tiling {
    fn default() -> Self {
        Tiling {
            vector_width: 1,
            local_size: [8, 8],
            kl: 8,
            depth: 1,
            register_tile: [4, 2, 4],
            fetch: [FetchPolicy::Local, FetchPolicy::Local],
            local_fetch: [8, 8],
        }
    }
}

/// Immutable GEMM parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GemmParams {
    variant: GemmVariant,
    #[serde(flatten)]
    tiling: Tiling,
}

impl GemmParams {
    pub fn new(variant: GemmVariant, tiling: Tiling) -> Self {
        GemmParams { variant, tiling }
    }

    pub fn nn(tiling: Tiling) -> Self {
        Self::new(GemmVariant::NN, tiling)
    }

    pub fn tn(tiling: Tiling) -> Self {
        Self::new(GemmVariant::TN, tiling)
    }

    pub fn nt(tiling: Tiling) -> Self {
        Self::new(GemmVariant::NT, tiling)
    }

    pub fn tt(tiling: Tiling) -> Self {
        Self::new(GemmVariant::TT, tiling)
    }

    pub fn variant(&self) -> GemmVariant {
        self.variant
    }

    pub fn tiling(&self) -> &Tiling {
        &self.tiling
    }

    pub fn a_trans(&self) -> Transpose {
        self.variant.a_trans()
    }

    pub fn b_trans(&self) -> Transpose {
        self.variant.b_trans()
    }

    pub fn vw(&self) -> u32 {
        self.tiling.vector_width
    }

    pub fn ls0(&self) -> u32 {
        self.tiling.local_size[0]
    }

    pub fn ls1(&self) -> u32 {
        self.tiling.local_size[1]
    }

    pub fn ms(&self) -> u32 {
        self.tiling.register_tile[0]
    }

    pub fn ks(&self) -> u32 {
        self.tiling.register_tile[1]
    }

    pub fn ns(&self) -> u32 {
        self.tiling.register_tile[2]
    }

    /// Block-tile rows, `mS * ls0`, saturating at `u32::MAX`.
    pub fn ml(&self) -> u32 {
        self.ms().saturating_mul(self.ls0())
    }

    /// Block-tile columns, `nS * ls1`, saturating at `u32::MAX`.
    pub fn nl(&self) -> u32 {
        self.ns().saturating_mul(self.ls1())
    }

    pub fn kl(&self) -> u32 {
        self.tiling.kl
    }

    pub fn depth(&self) -> u32 {
        self.tiling.depth
    }

    pub fn a_fetch(&self) -> FetchPolicy {
        self.tiling.fetch[0]
    }

    pub fn b_fetch(&self) -> FetchPolicy {
        self.tiling.fetch[1]
    }

    pub fn lf0(&self) -> u32 {
        self.tiling.local_fetch[0]
    }

    pub fn lf1(&self) -> u32 {
        self.tiling.local_fetch[1]
    }

    /// Number of staged A rows (normal) or columns (transposed) each fetch
    /// thread is responsible for.
    pub fn a_fetch_count(&self) -> u32 {
        match self.a_trans() {
            Transpose::N => self.ml() / self.lf0().saturating_mul(self.vw()).max(1),
            Transpose::T => self.ml() / self.lf1().max(1),
        }
    }

    /// Same as [`a_fetch_count`](Self::a_fetch_count) for B.
    pub fn b_fetch_count(&self) -> u32 {
        match self.b_trans() {
            Transpose::T => self.nl() / self.lf0().saturating_mul(self.vw()).max(1),
            Transpose::N => self.nl() / self.lf1().max(1),
        }
    }
}

impl fmt::Display for GemmParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} vw={} ls={}x{} tile={}x{}x{} reg={}x{}x{} depth={} lf={}x{}",
            self.variant,
            self.vw(),
            self.ls0(),
            self.ls1(),
            self.ml(),
            self.nl(),
            self.kl(),
            self.ms(),
            self.ks(),
            self.ns(),
            self.depth(),
            self.lf0(),
            self.lf1()
        )
    }
}
