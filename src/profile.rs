//! TOML tuning profiles.
//!
//! A profile names one parameter set under `[params]` and, optionally, a
//! problem instance under `[problem]` for `estimate` and `verify`.

use serde::Deserialize;
use symbolic::{gemm_expression, ArrayHandle, ArrayInfo, ExpressionTree, NumericType, ScalarValue};
use tilegen_gpu::{GemmParams, Transpose};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Profile {
    pub params: GemmParams,
    pub problem: Option<Problem>,
}

/// `[problem]` section.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Problem {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    #[serde(default = "default_dtype")]
    pub dtype: NumericType,
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    #[serde(default)]
    pub beta: f64,
}

fn default_dtype() -> NumericType {
    NumericType::Float32
}

fn default_alpha() -> f64 {
    1.0
}

impl Problem {
    /// Dense `(rows, cols)` of A and B in the layout `params` reads them.
    pub fn operand_shapes(&self, params: &GemmParams) -> [(usize, usize); 2] {
        let a = match params.a_trans() {
            Transpose::N => (self.m, self.k),
            Transpose::T => (self.k, self.m),
        };
        let b = match params.b_trans() {
            Transpose::N => (self.k, self.n),
            Transpose::T => (self.n, self.k),
        };
        [a, b]
    }

    /// `C = alpha*op(A)*op(B) + beta*C` over dense views of the buffers
    /// `[c, a, b]`.
    pub fn expression(&self, params: &GemmParams, handles: [ArrayHandle; 3]) -> ExpressionTree {
        let [(ar, ac), (br, bc)] = self.operand_shapes(params);
        let dtype = self.dtype;
        gemm_expression(
            ArrayInfo::dense(handles[0], dtype, self.m, self.n),
            ScalarValue::from_f64(dtype, self.alpha),
            ArrayInfo::dense(handles[1], dtype, ar, ac),
            params.a_trans(),
            ArrayInfo::dense(handles[2], dtype, br, bc),
            params.b_trans(),
            ScalarValue::from_f64(dtype, self.beta),
        )
    }
}

pub fn parse_profile(content: &str) -> Result<Profile, String> {
    toml::from_str(content).map_err(|e| format!("Failed to parse profile: {}", e))
}

pub fn load_profile(path: &std::path::Path) -> Result<Profile, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let profile = parse_profile(&content).map_err(|e| format!("{}: {}", path.display(), e))?;
    log::info!("loaded profile {} [{}]", path.display(), profile.params);
    Ok(profile)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tilegen_gpu::{FetchPolicy, GemmVariant};

    const FULL: &str = r#"
[params]
variant = "TN"
vector-width = 2
local-size = [8, 8]
kl = 16
depth = 2
register-tile = [4, 2, 4]
fetch = ["local", "local"]
local-fetch = [8, 8]

[problem]
m = 64
n = 32
k = 100
dtype = "f64"
alpha = 2.0
beta = 0.5
"#;

    #[test]
    fn test_parse_full_profile() {
        let profile = parse_profile(FULL).unwrap();
        let params = profile.params;
        assert_eq!(params.variant(), GemmVariant::TN);
        assert_eq!(params.vw(), 2);
        assert_eq!((params.ls0(), params.ls1()), (8, 8));
        assert_eq!(params.kl(), 16);
        assert_eq!(params.depth(), 2);
        assert_eq!((params.ms(), params.ks(), params.ns()), (4, 2, 4));
        assert_eq!(params.a_fetch(), FetchPolicy::Local);
        assert_eq!((params.lf0(), params.lf1()), (8, 8));

        let problem = profile.problem.unwrap();
        assert_eq!((problem.m, problem.n, problem.k), (64, 32, 100));
        assert_eq!(problem.dtype, NumericType::Float64);
        assert_eq!(problem.alpha, 2.0);
        assert_eq!(problem.beta, 0.5);
    }

    #[test]
    fn test_defaults() {
        let src = r#"
[params]
variant = "NN"
vector-width = 1
local-size = [4, 4]
kl = 8
register-tile = [2, 2, 2]
fetch = ["local", "local"]
local-fetch = [4, 4]

[problem]
m = 3
n = 4
k = 5
"#;
        let profile = parse_profile(src).unwrap();
        assert_eq!(profile.params.depth(), 1);
        let problem = profile.problem.unwrap();
        assert_eq!(problem.dtype, NumericType::Float32);
        assert_eq!(problem.alpha, 1.0);
        assert_eq!(problem.beta, 0.0);
    }

    #[test]
    fn test_rejects_bad_profiles() {
        assert!(parse_profile("[params]\nvariant = \"NX\"").is_err());
        let unknown = FULL.replace("beta = 0.5", "beta = 0.5\ngamma = 1.0");
        let err = parse_profile(&unknown).unwrap_err();
        assert!(err.starts_with("Failed to parse profile"));
    }

    #[test]
    fn test_problem_expression_shapes() {
        let profile = parse_profile(FULL).unwrap();
        let params = profile.params;
        let problem = profile.problem.unwrap();
        assert_eq!(problem.operand_shapes(&params), [(100, 64), (100, 32)]);

        let tree = problem.expression(&params, [ArrayHandle(0), ArrayHandle(1), ArrayHandle(2)]);
        let args = symbolic::extract(&tree).unwrap();
        assert_eq!(args.sizes(params.a_trans()), (64, 32, 100));
        assert_eq!(args.a_trans, Transpose::T);
        assert_eq!(args.b_trans, Transpose::N);
        assert_eq!(args.dtype(), NumericType::Float64);
    }
}
