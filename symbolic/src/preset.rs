//! GEMM operand extraction.
//!
//! Recognizes trees of the shape
//! ```text
//! C = alpha * (op(A) @ op(B)) + beta * C
//! ```
//! where `op` is identity or transposition, either scaling may be omitted
//! (defaults: `alpha = 1`, `beta = 0`), scalars may sit on either side of
//! their multiplication and the two terms of the sum may come in any order.
//! Anything else is rejected with an [`ExtractError`].

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dtype::{NumericType, ScalarValue};
use crate::expression::{ArrayInfo, ExpressionTree, Leaf, Node, Operator, OperandRef};

/// Whether an operand is read in its stored order or transposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transpose {
    N,
    T,
}

impl Transpose {
    pub fn is_transposed(self) -> bool {
        self == Transpose::T
    }

    pub fn as_char(self) -> char {
        match self {
            Transpose::N => 'N',
            Transpose::T => 'T',
        }
    }
}

/// Which GEMM operand an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GemmOperand {
    A,
    B,
    C,
}

impl fmt::Display for GemmOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GemmOperand::A => f.write_str("A"),
            GemmOperand::B => f.write_str("B"),
            GemmOperand::C => f.write_str("C"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExtractError {
    #[error("expression tree is empty")]
    EmptyTree,
    #[error("root index {root} is outside a tree of {len} nodes")]
    RootIndexOutOfRange { root: usize, len: usize },
    #[error("node {index} does not refer strictly backwards")]
    MalformedTree { index: usize },
    #[error("root operator is `{found}`, expected an assignment")]
    NotAnAssignment { found: Operator },
    #[error("assignment destination is not an array")]
    DestinationNotArray,
    #[error("operand {operand} of the matrix product is not an array")]
    OperandNotArray { operand: GemmOperand },
    #[error("operator `{operator}` does not fit the GEMM pattern")]
    UnsupportedPattern { operator: Operator },
    #[error("expression contains no matrix product")]
    MissingProduct,
    #[error("{term} appears more than once")]
    DuplicateTerm { term: &'static str },
    #[error("accumulated array {} is not the destination view of {}", .found.handle, .expected.handle)]
    ForeignAccumulator { expected: Box<ArrayInfo>, found: Box<ArrayInfo> },
    #[error("{what} has type {found}, expected {expected}")]
    DtypeMismatch {
        what: &'static str,
        expected: NumericType,
        found: NumericType,
    },
    #[error("shape mismatch: op(A) is {a:?}, op(B) is {b:?}, C is {c:?}")]
    ShapeMismatch {
        a: [usize; 2],
        b: [usize; 2],
        c: [usize; 2],
    },
}

/// Operands of one GEMM call, resolved from an expression tree.
#[derive(Debug, Clone, PartialEq)]
pub struct GemmArgs {
    pub c: ArrayInfo,
    pub a: ArrayInfo,
    pub b: ArrayInfo,
    pub alpha: ScalarValue,
    pub beta: ScalarValue,
    pub a_trans: Transpose,
    pub b_trans: Transpose,
}

impl GemmArgs {
    /// `(M, N, K)`: `M, N` from C, `K` from A's shape read through `a_trans`.
    pub fn sizes(&self, a_trans: Transpose) -> (usize, usize, usize) {
        let k = match a_trans {
            Transpose::T => self.a.rows(),
            Transpose::N => self.a.cols(),
        };
        (self.c.rows(), self.c.cols(), k)
    }

    pub fn dtype(&self) -> NumericType {
        self.c.dtype
    }
}

/// Extract GEMM operands from the tree's root.
pub fn extract(tree: &ExpressionTree) -> Result<GemmArgs, ExtractError> {
    if tree.is_empty() {
        return Err(ExtractError::EmptyTree);
    }
    extract_at(tree, tree.root())
}

/// Extract GEMM operands from the assignment at `root`.
pub fn extract_at(tree: &ExpressionTree, root: usize) -> Result<GemmArgs, ExtractError> {
    if tree.is_empty() {
        return Err(ExtractError::EmptyTree);
    }
    let assign = tree.node(root).ok_or(ExtractError::RootIndexOutOfRange {
        root,
        len: tree.len(),
    })?;
    if assign.op != Operator::Assign {
        return Err(ExtractError::NotAnAssignment { found: assign.op });
    }
    let c = *assign.lhs.as_array().ok_or(ExtractError::DestinationNotArray)?;

    let mut matcher = Matcher {
        tree,
        c,
        product: None,
        alpha: None,
        beta: None,
    };
    match assign.rhs {
        OperandRef::SubExpr(index) => {
            let node = matcher.child(root, index)?;
            if node.op == Operator::Add {
                matcher.term(index as usize, node.lhs)?;
                matcher.term(index as usize, node.rhs)?;
            } else {
                matcher.term(root, assign.rhs)?;
            }
        }
        _ => return Err(ExtractError::MissingProduct),
    }
    matcher.finish()
}

struct Product {
    a: ArrayInfo,
    a_trans: Transpose,
    b: ArrayInfo,
    b_trans: Transpose,
}

struct Matcher<'t> {
    tree: &'t ExpressionTree,
    c: ArrayInfo,
    product: Option<Product>,
    alpha: Option<ScalarValue>,
    beta: Option<ScalarValue>,
}

impl<'t> Matcher<'t> {
    /// Fetch node `index` referenced from node `parent`, enforcing backward links.
    fn child(&self, parent: usize, index: u32) -> Result<&'t Node, ExtractError> {
        let index = index as usize;
        if index >= parent {
            return Err(ExtractError::MalformedTree { index: parent });
        }
        self.tree
            .node(index)
            .ok_or(ExtractError::MalformedTree { index: parent })
    }

    /// Classify one summand of the right-hand side.
    fn term(&mut self, parent: usize, operand: OperandRef) -> Result<(), ExtractError> {
        match operand {
            OperandRef::Array(array) => self.set_beta(ScalarValue::one(self.c.dtype), array),
            OperandRef::SubExpr(index) => {
                let node = self.child(parent, index)?;
                let index = index as usize;
                match node.op {
                    Operator::MatMul => self.set_product(index, node),
                    Operator::Mul => self.scaled(index, node),
                    other => Err(ExtractError::UnsupportedPattern { operator: other }),
                }
            }
            OperandRef::Scalar(_) | OperandRef::Repeat(_) | OperandRef::Absent => {
                Err(ExtractError::MissingProduct)
            }
        }
    }

    /// `scalar * x` or `x * scalar`, where `x` is the product or the destination.
    fn scaled(&mut self, index: usize, node: &'t Node) -> Result<(), ExtractError> {
        let leading = self
            .tree
            .lhs_most(index)
            .ok_or(ExtractError::MalformedTree { index })?;
        let (scalar, other) = match (leading.lhs.as_scalar(), node.rhs.as_scalar()) {
            (Some(s), _) if std::ptr::eq(leading, node) => (s, node.rhs),
            (_, Some(s)) => (s, node.lhs),
            _ => return Err(ExtractError::UnsupportedPattern { operator: node.op }),
        };
        match other {
            OperandRef::Array(array) => self.set_beta(scalar, array),
            OperandRef::SubExpr(child) => {
                let inner = self.child(index, child)?;
                if inner.op != Operator::MatMul {
                    return Err(ExtractError::UnsupportedPattern { operator: inner.op });
                }
                self.set_product(child as usize, inner)?;
                self.set_alpha(scalar)
            }
            _ => Err(ExtractError::UnsupportedPattern { operator: node.op }),
        }
    }

    fn set_product(&mut self, index: usize, node: &'t Node) -> Result<(), ExtractError> {
        if self.product.is_some() {
            return Err(ExtractError::DuplicateTerm { term: "matrix product" });
        }
        let (a, a_trans) = self.product_operand(index, node.lhs, GemmOperand::A)?;
        let (b, b_trans) = self.product_operand(index, node.rhs, GemmOperand::B)?;
        self.product = Some(Product {
            a,
            a_trans,
            b,
            b_trans,
        });
        Ok(())
    }

    fn product_operand(
        &self,
        parent: usize,
        operand: OperandRef,
        which: GemmOperand,
    ) -> Result<(ArrayInfo, Transpose), ExtractError> {
        match operand {
            OperandRef::Array(array) => Ok((array, Transpose::N)),
            OperandRef::SubExpr(index) => {
                let node = self.child(parent, index)?;
                match (node.op, node.lhs) {
                    (Operator::Trans, OperandRef::Array(array)) => Ok((array, Transpose::T)),
                    _ => Err(ExtractError::OperandNotArray { operand: which }),
                }
            }
            _ => Err(ExtractError::OperandNotArray { operand: which }),
        }
    }

    fn set_alpha(&mut self, alpha: ScalarValue) -> Result<(), ExtractError> {
        if self.alpha.replace(alpha).is_some() {
            return Err(ExtractError::DuplicateTerm { term: "alpha" });
        }
        Ok(())
    }

    fn set_beta(&mut self, beta: ScalarValue, array: ArrayInfo) -> Result<(), ExtractError> {
        // same buffer is not enough: the window must be C's own
        if array != self.c {
            return Err(ExtractError::ForeignAccumulator {
                expected: Box::new(self.c),
                found: Box::new(array),
            });
        }
        if self.beta.replace(beta).is_some() {
            return Err(ExtractError::DuplicateTerm { term: "beta" });
        }
        Ok(())
    }

    fn finish(self) -> Result<GemmArgs, ExtractError> {
        let dtype = self.c.dtype;
        let product = self.product.ok_or(ExtractError::MissingProduct)?;
        let alpha = self.alpha.unwrap_or(ScalarValue::one(dtype));
        let beta = self.beta.unwrap_or(ScalarValue::zero(dtype));

        for (what, found) in [
            ("A", product.a.dtype),
            ("B", product.b.dtype),
            ("alpha", alpha.dtype()),
            ("beta", beta.dtype()),
        ] {
            if found != dtype {
                return Err(ExtractError::DtypeMismatch {
                    what,
                    expected: dtype,
                    found,
                });
            }
        }

        let op_a = logical_shape(&product.a, product.a_trans);
        let op_b = logical_shape(&product.b, product.b_trans);
        let c = self.c.shape;
        if op_a[0] != c[0] || op_b[1] != c[1] || op_a[1] != op_b[0] {
            return Err(ExtractError::ShapeMismatch {
                a: op_a,
                b: op_b,
                c,
            });
        }

        log::trace!(
            "gemm operands: C={} A={}{} B={}{} alpha={} beta={}",
            self.c.handle,
            product.a.handle,
            product.a_trans.as_char(),
            product.b.handle,
            product.b_trans.as_char(),
            alpha,
            beta
        );

        Ok(GemmArgs {
            c: self.c,
            a: product.a,
            b: product.b,
            alpha,
            beta,
            a_trans: product.a_trans,
            b_trans: product.b_trans,
        })
    }
}

fn logical_shape(array: &ArrayInfo, trans: Transpose) -> [usize; 2] {
    match trans {
        Transpose::N => array.shape,
        Transpose::T => [array.shape[1], array.shape[0]],
    }
}

/// Build `C = alpha * (op(A) @ op(B)) + beta * C`.
pub fn gemm_expression(
    c: ArrayInfo,
    alpha: ScalarValue,
    a: ArrayInfo,
    a_trans: Transpose,
    b: ArrayInfo,
    b_trans: Transpose,
    beta: ScalarValue,
) -> ExpressionTree {
    let dtype = c.dtype;
    let shape = c.shape;
    let transposed = |array: ArrayInfo| {
        ExpressionTree::leaf(
            array,
            Operator::Trans,
            Leaf::Absent,
            dtype,
            logical_shape(&array, Transpose::T),
        )
    };

    let product = match (a_trans, b_trans) {
        (Transpose::N, Transpose::N) => ExpressionTree::leaf(a, Operator::MatMul, b, dtype, shape),
        (Transpose::T, Transpose::N) => transposed(a).with_rhs(Operator::MatMul, b, dtype, shape),
        (Transpose::N, Transpose::T) => {
            ExpressionTree::with_lhs(a, Operator::MatMul, transposed(b), dtype, shape)
        }
        (Transpose::T, Transpose::T) => {
            ExpressionTree::concat(transposed(a), Operator::MatMul, transposed(b), dtype, shape)
        }
    };
    let scaled = ExpressionTree::with_lhs(alpha, Operator::Mul, product, dtype, shape);
    let accumulated = ExpressionTree::leaf(beta, Operator::Mul, c, dtype, shape);
    let sum = ExpressionTree::concat(scaled, Operator::Add, accumulated, dtype, shape);
    ExpressionTree::with_lhs(c, Operator::Assign, sum, dtype, shape)
}
