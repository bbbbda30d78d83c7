//! Numeric element types and typed scalar values.
//!
//! Every array view and scalar in an expression tree carries a
//! `NumericType`; the kernel generator uses it to pick the emitted element
//! type and the resource estimator to convert element counts into bytes.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Element type of an array or scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NumericType {
    #[serde(rename = "f32")]
    Float32,
    #[serde(rename = "f64")]
    Float64,
    #[serde(rename = "i32")]
    Int32,
    #[serde(rename = "i64")]
    Int64,
}

impl NumericType {
    /// Byte size per element.
    pub fn size_of(self) -> u32 {
        match self {
            Self::Float32 | Self::Int32 => 4,
            Self::Float64 | Self::Int64 => 8,
        }
    }

    /// Element type name as spelled in generated kernel source.
    pub fn kernel_name(self) -> &'static str {
        match self {
            Self::Float32 => "float",
            Self::Float64 => "double",
            Self::Int32 => "int",
            Self::Int64 => "long",
        }
    }

    /// Short tag used in kernel suffixes and profile files.
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Float32 => "f32",
            Self::Float64 => "f64",
            Self::Int32 => "i32",
            Self::Int64 => "i64",
        }
    }

    pub fn is_floating(self) -> bool {
        matches!(self, Self::Float32 | Self::Float64)
    }
}

impl fmt::Display for NumericType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// A scalar value tagged with its numeric type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScalarValue {
    F32(f32),
    F64(f64),
    I32(i32),
    I64(i64),
}

impl ScalarValue {
    /// Build a scalar of `dtype` from an `f64`, truncating for integer types.
    pub fn from_f64(dtype: NumericType, value: f64) -> Self {
        match dtype {
            NumericType::Float32 => Self::F32(value as f32),
            NumericType::Float64 => Self::F64(value),
            NumericType::Int32 => Self::I32(value as i32),
            NumericType::Int64 => Self::I64(value as i64),
        }
    }

    pub fn one(dtype: NumericType) -> Self {
        Self::from_f64(dtype, 1.0)
    }

    pub fn zero(dtype: NumericType) -> Self {
        Self::from_f64(dtype, 0.0)
    }

    pub fn dtype(&self) -> NumericType {
        match self {
            Self::F32(_) => NumericType::Float32,
            Self::F64(_) => NumericType::Float64,
            Self::I32(_) => NumericType::Int32,
            Self::I64(_) => NumericType::Int64,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match *self {
            Self::F32(v) => v as f64,
            Self::F64(v) => v,
            Self::I32(v) => v as f64,
            Self::I64(v) => v as f64,
        }
    }

    /// Whether this is the additive identity of its type.
    pub fn is_zero(&self) -> bool {
        match *self {
            Self::F32(v) => v == 0.0,
            Self::F64(v) => v == 0.0,
            Self::I32(v) => v == 0,
            Self::I64(v) => v == 0,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::F32(v) => write!(f, "{}f32", v),
            Self::F64(v) => write!(f, "{}f64", v),
            Self::I32(v) => write!(f, "{}i32", v),
            Self::I64(v) => write!(f, "{}i64", v),
        }
    }
}
