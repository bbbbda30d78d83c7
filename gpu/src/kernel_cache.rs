//! Program cache: generate and compile each GEMM program once.
//!
//! Keyed by (GemmParams, dtype), since that pair fully determines the kernel
//! text up to its name suffix. Each new entry gets a fresh suffix
//! `_{variant}{n}` so programs for different parameter sets can be loaded
//! side by side.

use std::collections::hash_map::Entry;

use fxhash::FxHashMap;
use symbolic::NumericType;

use crate::backend::{CompileError, ProgramCompiler};
use crate::codegen::KernelSource;
use crate::params::GemmParams;

/// Cache key: (parameter set, element type).
type CacheKey = (GemmParams, NumericType);

/// Compiled program with the suffix its kernels were generated under.
#[derive(Debug)]
pub struct CachedProgram<P> {
    pub suffix: String,
    pub program: P,
}

pub struct ProgramCache<P> {
    entries: FxHashMap<CacheKey, CachedProgram<P>>,
    next_id: usize,
}

impl<P> Default for ProgramCache<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P> ProgramCache<P> {
    pub fn new() -> Self {
        ProgramCache {
            entries: FxHashMap::default(),
            next_id: 0,
        }
    }

    /// Get or generate-and-compile the program for `params` and `dtype`.
    ///
    /// A failed compilation is not cached and does not consume a suffix.
    pub fn get_or_compile<C>(
        &mut self,
        compiler: &mut C,
        params: &GemmParams,
        dtype: NumericType,
    ) -> Result<&CachedProgram<P>, CompileError>
    where
        C: ProgramCompiler<Program = P>,
    {
        match self.entries.entry((*params, dtype)) {
            Entry::Occupied(e) => Ok(&*e.into_mut()),
            Entry::Vacant(e) => {
                let suffix = format!("_{}{}", params.variant().name(), self.next_id);
                let source = KernelSource::generate(params, dtype, suffix.clone());
                let program = compiler.compile(&source)?;
                log::debug!("compiled program {} [{}] ({})", suffix, params, dtype);
                self.next_id += 1;
                Ok(&*e.insert(CachedProgram { suffix, program }))
            }
        }
    }

    pub fn get(&self, params: &GemmParams, dtype: NumericType) -> Option<&CachedProgram<P>> {
        self.entries.get(&(*params, dtype))
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cached programs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{GemmVariant, Tiling};

    #[derive(Default)]
    struct CountingCompiler {
        compiled: Vec<String>,
        fail: bool,
    }

    impl ProgramCompiler for CountingCompiler {
        type Program = usize;

        fn compile(&mut self, source: &KernelSource) -> Result<usize, CompileError> {
            if self.fail {
                return Err(CompileError {
                    suffix: source.suffix.clone(),
                    message: "rejected".into(),
                });
            }
            self.compiled.push(source.suffix.clone());
            Ok(source.text.len())
        }
    }

    #[test]
    fn test_compiles_once_per_key() {
        let mut cache = ProgramCache::new();
        let mut compiler = CountingCompiler::default();
        let params = GemmParams::nn(Tiling::default());

        let first = cache
            .get_or_compile(&mut compiler, &params, NumericType::Float32)
            .unwrap()
            .suffix
            .clone();
        let again = cache
            .get_or_compile(&mut compiler, &params, NumericType::Float32)
            .unwrap()
            .suffix
            .clone();
        assert_eq!(first, "_nn0");
        assert_eq!(first, again);
        assert_eq!(compiler.compiled.len(), 1);

        let other = cache
            .get_or_compile(&mut compiler, &params, NumericType::Float64)
            .unwrap()
            .suffix
            .clone();
        assert_eq!(other, "_nn1");
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_variants_coexist() {
        let mut cache = ProgramCache::new();
        let mut compiler = CountingCompiler::default();
        for variant in GemmVariant::ALL {
            let params = GemmParams::new(variant, Tiling::default());
            cache
                .get_or_compile(&mut compiler, &params, NumericType::Float32)
                .unwrap();
        }
        assert_eq!(compiler.compiled, vec!["_nn0", "_tn1", "_nt2", "_tt3"]);
        let tt = GemmParams::tt(Tiling::default());
        assert_eq!(cache.get(&tt, NumericType::Float32).unwrap().suffix, "_tt3");
    }

    #[test]
    fn test_failure_not_cached() {
        let mut cache: ProgramCache<usize> = ProgramCache::new();
        let mut compiler = CountingCompiler {
            fail: true,
            ..Default::default()
        };
        let params = GemmParams::nn(Tiling::default());
        assert!(cache
            .get_or_compile(&mut compiler, &params, NumericType::Float32)
            .is_err());
        assert!(cache.is_empty());

        compiler.fail = false;
        let entry = cache
            .get_or_compile(&mut compiler, &params, NumericType::Float32)
            .unwrap();
        assert_eq!(entry.suffix, "_nn0");
    }
}
