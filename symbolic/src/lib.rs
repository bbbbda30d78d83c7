//! Symbolic array expressions for the tilegen kernel generator.
//!
//! - [`dtype`]: element types and typed scalars
//! - [`expression`]: flat expression trees over array views
//! - [`preset`]: recognition of GEMM-shaped trees and operand extraction

pub mod dtype;
pub mod expression;
pub mod preset;

pub use dtype::{NumericType, ScalarValue};
pub use expression::{
    ArrayHandle, ArrayInfo, ExpressionTree, Leaf, Node, NodeIndex, OperandRef, Operator,
    RepeatInfo, TreeError,
};
pub use preset::{extract, extract_at, gemm_expression, ExtractError, GemmArgs, GemmOperand, Transpose};
