//! Backend-neutral placeholders.
//!
//! Generated kernels never spell a backend keyword directly. A backend layer
//! substitutes each placeholder (for example `$LOCAL_BARRIER` becomes
//! `barrier(CLK_LOCAL_MEM_FENCE)` on OpenCL or `__syncthreads()` on CUDA)
//! before handing the text to its compiler.

use std::collections::BTreeSet;

pub const KERNEL: &str = "$KERNEL";
pub const GLOBAL: &str = "$GLOBAL";
pub const LOCAL: &str = "$LOCAL";
pub const LOCAL_PTR: &str = "$LOCAL_PTR";
pub const SIZE_T: &str = "$SIZE_T";
pub const LOCAL_BARRIER: &str = "$LOCAL_BARRIER";

/// Every placeholder stem, parameterized ones included.
pub const VOCABULARY: &[&str] = &[
    "$KERNEL",
    "$GLOBAL",
    "$LOCAL",
    "$LOCAL_PTR",
    "$SIZE_T",
    "$LOCAL_BARRIER",
    "$MAD",
    "$GROUP_IDX",
    "$LOCAL_IDX",
    "$GLOBAL_IDX",
    "$GLOBAL_SIZE",
    "$VLOAD",
    "$VSTORE",
    "$LANE",
];

/// Fused multiply-add `a*b + c`.
pub fn mad(a: &str, b: &str, c: &str) -> String {
    format!("$MAD({}, {}, {})", a, b, c)
}

pub fn group_idx(dim: usize) -> String {
    format!("$GROUP_IDX_{}", dim)
}

pub fn local_idx(dim: usize) -> String {
    format!("$LOCAL_IDX_{}", dim)
}

pub fn global_idx(dim: usize) -> String {
    format!("$GLOBAL_IDX_{}", dim)
}

pub fn global_size(dim: usize) -> String {
    format!("$GLOBAL_SIZE_{}", dim)
}

/// Load `width` contiguous elements starting at `ptr`.
pub fn vload(width: u32, ptr: &str) -> String {
    format!("$VLOAD{}({})", width, ptr)
}

/// Store the `width`-wide `value` to contiguous elements starting at `ptr`.
pub fn vstore(width: u32, value: &str, ptr: &str) -> String {
    format!("$VSTORE{}({}, {})", width, value, ptr)
}

/// Lane `s` of a vector value; scalars are their own single lane.
pub fn lane(expr: &str, s: u32, width: u32) -> String {
    if width == 1 {
        expr.to_string()
    } else {
        format!("$LANE({}, {})", expr, s)
    }
}

/// `width`-wide vector of `scalar`, e.g. `float4`.
pub fn vector_type(scalar: &str, width: u32) -> String {
    if width == 1 {
        scalar.to_string()
    } else {
        format!("{}{}", scalar, width)
    }
}

/// Placeholders occurring in `text`, with their numeric suffix when present
/// (`$GROUP_IDX_0`, `$VLOAD4`).
pub fn placeholders(text: &str) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let bytes = text.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let start = i;
            i += 1;
            while i < bytes.len()
                && (bytes[i].is_ascii_uppercase() || bytes[i].is_ascii_digit() || bytes[i] == b'_')
            {
                i += 1;
            }
            if i > start + 1 {
                found.insert(text[start..i].to_string());
            }
        } else {
            i += 1;
        }
    }
    found
}

/// The vocabulary stem a placeholder token belongs to, if any.
pub fn stem(token: &str) -> Option<&'static str> {
    let trimmed = token.trim_end_matches(|c: char| c.is_ascii_digit() || c == '_');
    VOCABULARY.iter().copied().find(|stem| *stem == trimmed)
}
