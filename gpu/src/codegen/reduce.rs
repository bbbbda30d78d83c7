//! Split-depth reduction kernel.
//!
//! Sums the `D` partial products the main kernel left in the workspace
//! (slice `k` at `Z + k*Zld*N`) and blends the result into C. Dispatched as a
//! 2-D grid-stride loop so any grid covers any `M × N`.

use symbolic::NumericType;

use super::keywords::{self, GLOBAL, KERNEL, SIZE_T};

/// Name of the reduction kernel for a program suffix.
pub fn reduce_kernel_name(suffix: &str) -> String {
    format!("reduce{}", suffix)
}

/// Generate the reduction kernel source.
///
/// Arguments: M, N, D, Z (workspace), Zld, C, ldc, Cstart, Cstride, beta.
pub fn emit_reduce(dtype: NumericType, suffix: &str) -> String {
    let t = dtype.kernel_name();
    let name = reduce_kernel_name(suffix);
    let (gid0, gid1) = (keywords::global_idx(0), keywords::global_idx(1));
    let (gsize0, gsize1) = (keywords::global_size(0), keywords::global_size(1));

    format!(
        r#"{KERNEL} void {name}({SIZE_T} M, {SIZE_T} N, {SIZE_T} D,
    {GLOBAL} {t}* Z, {SIZE_T} Zld,
    {GLOBAL} {t}* C, {SIZE_T} ldc, {SIZE_T} Cstart, {SIZE_T} Cstride,
    {t} beta)
{{
    C += Cstart;
    for(unsigned int i = {gid0}; i < M; i += {gsize0}) {{
        for(unsigned int j = {gid1}; j < N; j += {gsize1}) {{
            {t} acc = 0;
            for(unsigned int k = 0; k < D; k++)
                acc += Z[i + j*Zld + k*Zld*N];
            C[i*Cstride + j*ldc] = acc + ((beta != 0) ? beta*C[i*Cstride + j*ldc] : 0);
        }}
    }}
}}
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_f32() {
        let src = emit_reduce(NumericType::Float32, "_nn3");
        assert!(src.starts_with("$KERNEL void reduce_nn3($SIZE_T M, $SIZE_T N, $SIZE_T D,"));
        assert!(src.contains("$GLOBAL float* Z, $SIZE_T Zld,"));
        assert!(src.contains("float beta)"));
        assert!(src.contains("i += $GLOBAL_SIZE_0"));
        assert!(src.contains("j = $GLOBAL_IDX_1"));
        assert!(src.contains("acc += Z[i + j*Zld + k*Zld*N];"));
        assert!(src.contains("C += Cstart;"));
    }

    #[test]
    fn test_reduce_i64() {
        let src = emit_reduce(NumericType::Int64, "_tt0");
        assert!(src.contains("long acc = 0;"));
        assert_eq!(reduce_kernel_name("_tt0"), "reduce_tt0");
    }
}
