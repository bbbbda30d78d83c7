//! Flat, index-linked expression trees over array views and scalars.
//!
//! A tree is an append-only sequence of ternary nodes (operator plus two
//! operand slots). Composite operands refer to other nodes by index, and a
//! node only ever refers to indices below its own, so the root at the end of
//! the sequence transitively reaches only earlier nodes.
//!
//! Example: `C = alpha * (A @ B)` is stored as
//! ```text
//! [0] MatMul(Array A, Array B)
//! [1] Mul(Scalar alpha, SubExpr 0)
//! [2] Assign(Array C, SubExpr 1)      <- root
//! ```
//!
//! Joining two independently built trees copies both sequences and shifts the
//! right-hand side's internal indices by the left-hand side's length; nodes
//! are never shared between trees.

use std::fmt;

use thiserror::Error;

use crate::dtype::{NumericType, ScalarValue};

/// Index of a node inside its tree.
pub type NodeIndex = u32;

/// Operators understood by the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    // Binary
    Assign,
    Add,
    Sub,
    Mul,

    // Unary: operate on the left operand, right operand is absent
    Neg,
    Trans,

    // Matrix product of the two operands
    MatMul,
}

impl Operator {
    /// Number of operand slots this operator uses.
    pub fn arity(self) -> usize {
        match self {
            Self::Neg | Self::Trans => 1,
            Self::Assign | Self::Add | Self::Sub | Self::Mul | Self::MatMul => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Assign => "assign",
            Self::Add => "add",
            Self::Sub => "sub",
            Self::Mul => "mul",
            Self::Neg => "neg",
            Self::Trans => "trans",
            Self::MatMul => "matmul",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque handle to an externally owned device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayHandle(pub u64);

impl fmt::Display for ArrayHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf#{}", self.0)
    }
}

/// A column-major 2-D view of a buffer.
///
/// Element `(i, j)` of the view lives at
/// `(start[0] + i*stride[0]) * leading_dims[0] + (start[1] + j*stride[1]) * leading_dims[1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayInfo {
    pub handle: ArrayHandle,
    pub dtype: NumericType,
    pub shape: [usize; 2],
    pub start: [usize; 2],
    pub stride: [usize; 2],
    /// Pitch of the underlying storage per dimension: `[1, ld]` when dense.
    pub leading_dims: [usize; 2],
}

impl ArrayInfo {
    /// An unsliced `rows × cols` view over a dense column-major buffer.
    pub fn dense(handle: ArrayHandle, dtype: NumericType, rows: usize, cols: usize) -> Self {
        ArrayInfo {
            handle,
            dtype,
            shape: [rows, cols],
            start: [0, 0],
            stride: [1, 1],
            leading_dims: [1, rows.max(1)],
        }
    }

    /// Narrow this view to `shape` elements starting at `start`, stepping by
    /// `step` along each dimension (all in this view's coordinates).
    pub fn sub_view(&self, start: [usize; 2], shape: [usize; 2], step: [usize; 2]) -> Self {
        ArrayInfo {
            shape,
            start: [
                self.start[0] + start[0] * self.stride[0],
                self.start[1] + start[1] * self.stride[1],
            ],
            stride: [self.stride[0] * step[0], self.stride[1] * step[1]],
            ..*self
        }
    }

    pub fn rows(&self) -> usize {
        self.shape[0]
    }

    pub fn cols(&self) -> usize {
        self.shape[1]
    }

    /// Distance between consecutive rows of the view (`stride1` in kernels).
    pub fn row_stride(&self) -> usize {
        self.stride[0] * self.leading_dims[0]
    }

    /// Distance between consecutive columns of the view (`ld` in kernels).
    pub fn ld(&self) -> usize {
        self.stride[1] * self.leading_dims[1]
    }

    /// Element offset of `(0, 0)` inside the buffer.
    pub fn offset(&self) -> usize {
        self.start[0] * self.leading_dims[0] + self.start[1] * self.leading_dims[1]
    }

    /// Buffer position of element `(i, j)`.
    pub fn index(&self, i: usize, j: usize) -> usize {
        self.offset() + i * self.row_stride() + j * self.ld()
    }

    /// Minimum buffer length (in elements) that covers every element.
    pub fn required_len(&self) -> usize {
        if self.shape[0] == 0 || self.shape[1] == 0 {
            return 0;
        }
        self.index(self.shape[0] - 1, self.shape[1] - 1) + 1
    }
}

/// Shape-info tuple: a sub-shape repeated along each dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RepeatInfo {
    pub sub: [usize; 2],
    pub reps: [usize; 2],
}

/// An operand that can appear in a node without referring to another node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Leaf {
    Absent,
    Array(ArrayInfo),
    Scalar(ScalarValue),
    Repeat(RepeatInfo),
}

impl From<ArrayInfo> for Leaf {
    fn from(a: ArrayInfo) -> Self {
        Leaf::Array(a)
    }
}

impl From<ScalarValue> for Leaf {
    fn from(v: ScalarValue) -> Self {
        Leaf::Scalar(v)
    }
}

impl From<RepeatInfo> for Leaf {
    fn from(r: RepeatInfo) -> Self {
        Leaf::Repeat(r)
    }
}

/// Contents of one operand slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperandRef {
    Absent,
    SubExpr(NodeIndex),
    Array(ArrayInfo),
    Scalar(ScalarValue),
    Repeat(RepeatInfo),
}

impl OperandRef {
    pub fn is_composite(&self) -> bool {
        matches!(self, OperandRef::SubExpr(_))
    }

    pub fn as_array(&self) -> Option<&ArrayInfo> {
        match self {
            OperandRef::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_scalar(&self) -> Option<ScalarValue> {
        match self {
            OperandRef::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_sub_expr(&self) -> Option<NodeIndex> {
        match self {
            OperandRef::SubExpr(i) => Some(*i),
            _ => None,
        }
    }

    fn shifted(self, by: NodeIndex) -> Self {
        match self {
            OperandRef::SubExpr(i) => OperandRef::SubExpr(i + by),
            other => other,
        }
    }
}

impl From<Leaf> for OperandRef {
    fn from(leaf: Leaf) -> Self {
        match leaf {
            Leaf::Absent => OperandRef::Absent,
            Leaf::Array(a) => OperandRef::Array(a),
            Leaf::Scalar(v) => OperandRef::Scalar(v),
            Leaf::Repeat(r) => OperandRef::Repeat(r),
        }
    }
}

/// One node of a tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub op: Operator,
    pub lhs: OperandRef,
    pub rhs: OperandRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
    #[error("cannot reshape {from:?} into {to:?}: element counts differ")]
    ReshapeSize { from: [usize; 2], to: [usize; 2] },
}

/// An expression tree with its result type and shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionTree {
    nodes: Vec<Node>,
    root: NodeIndex,
    dtype: NumericType,
    shape: [usize; 2],
}

impl ExpressionTree {
    /// A single-node tree over two leaves.
    pub fn leaf(
        lhs: impl Into<Leaf>,
        op: Operator,
        rhs: impl Into<Leaf>,
        dtype: NumericType,
        shape: [usize; 2],
    ) -> Self {
        ExpressionTree {
            nodes: vec![Node {
                op,
                lhs: lhs.into().into(),
                rhs: rhs.into().into(),
            }],
            root: 0,
            dtype,
            shape,
        }
    }

    /// Append `op(self, rhs)` as the new root.
    pub fn with_rhs(
        self,
        op: Operator,
        rhs: impl Into<Leaf>,
        dtype: NumericType,
        shape: [usize; 2],
    ) -> Self {
        let lhs = OperandRef::SubExpr(self.root);
        self.push_root(op, lhs, rhs.into().into(), dtype, shape)
    }

    /// Append `op(lhs, rhs)` as the new root of `rhs`.
    pub fn with_lhs(
        lhs: impl Into<Leaf>,
        op: Operator,
        rhs: ExpressionTree,
        dtype: NumericType,
        shape: [usize; 2],
    ) -> Self {
        let rhs_ref = OperandRef::SubExpr(rhs.root);
        rhs.push_root(op, lhs.into().into(), rhs_ref, dtype, shape)
    }

    /// Append a unary operator over the current root. Transposition swaps
    /// the recorded shape.
    pub fn unary(self, op: Operator) -> Self {
        let dtype = self.dtype;
        let shape = match op {
            Operator::Trans => [self.shape[1], self.shape[0]],
            _ => self.shape,
        };
        let lhs = OperandRef::SubExpr(self.root);
        self.push_root(op, lhs, OperandRef::Absent, dtype, shape)
    }

    /// Join two trees under a new root `op(lhs, rhs)`.
    ///
    /// The right-hand nodes are appended after the left-hand ones, with their
    /// sub-expression indices shifted by the left-hand length.
    pub fn concat(
        lhs: ExpressionTree,
        op: Operator,
        rhs: ExpressionTree,
        dtype: NumericType,
        shape: [usize; 2],
    ) -> Self {
        let offset = lhs.nodes.len() as NodeIndex;
        let lhs_root = lhs.root;
        let rhs_root = rhs.root + offset;

        let mut nodes = lhs.nodes;
        nodes.reserve(rhs.nodes.len() + 1);
        nodes.extend(rhs.nodes.into_iter().map(|node| Node {
            op: node.op,
            lhs: node.lhs.shifted(offset),
            rhs: node.rhs.shifted(offset),
        }));

        let tree = ExpressionTree {
            nodes,
            root: lhs_root,
            dtype,
            shape,
        };
        tree.push_root(
            op,
            OperandRef::SubExpr(lhs_root),
            OperandRef::SubExpr(rhs_root),
            dtype,
            shape,
        )
    }

    fn push_root(
        mut self,
        op: Operator,
        lhs: OperandRef,
        rhs: OperandRef,
        dtype: NumericType,
        shape: [usize; 2],
    ) -> Self {
        self.nodes.push(Node { op, lhs, rhs });
        self.root = (self.nodes.len() - 1) as NodeIndex;
        self.dtype = dtype;
        self.shape = shape;
        self
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn node(&self, index: usize) -> Option<&Node> {
        self.nodes.get(index)
    }

    pub fn root(&self) -> usize {
        self.root as usize
    }

    pub fn root_node(&self) -> &Node {
        &self.nodes[self.root as usize]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn dtype(&self) -> NumericType {
        self.dtype
    }

    pub fn shape(&self) -> [usize; 2] {
        self.shape
    }

    /// Number of dimensions larger than one.
    pub fn nshape(&self) -> usize {
        self.shape.iter().filter(|&&d| d > 1).count()
    }

    pub fn reshape(&mut self, rows: usize, cols: usize) -> Result<(), TreeError> {
        if rows * cols != self.shape[0] * self.shape[1] {
            return Err(TreeError::ReshapeSize {
                from: self.shape,
                to: [rows, cols],
            });
        }
        self.shape = [rows, cols];
        Ok(())
    }

    /// Leftmost non-composite node below `index`: follows left operands while
    /// they refer to sub-expressions.
    pub fn lhs_most(&self, index: usize) -> Option<&Node> {
        let mut current = self.nodes.get(index)?;
        while let OperandRef::SubExpr(next) = current.lhs {
            current = self.nodes.get(next as usize)?;
        }
        Some(current)
    }

    /// Whether every sub-expression reference points strictly backwards.
    pub fn is_well_formed(&self) -> bool {
        if self.root as usize >= self.nodes.len() {
            return false;
        }
        self.nodes.iter().enumerate().all(|(i, node)| {
            [node.lhs, node.rhs].iter().all(|operand| match operand {
                OperandRef::SubExpr(j) => (*j as usize) < i,
                _ => true,
            })
        })
    }

    /// Longest chain of nodes from the root to a leaf-only node.
    pub fn depth(&self) -> usize {
        // Backward references let a single forward pass settle every node.
        let mut depths = vec![0usize; self.nodes.len()];
        for (i, node) in self.nodes.iter().enumerate() {
            let child = |operand: &OperandRef| match operand {
                OperandRef::SubExpr(j) => depths.get(*j as usize).copied().unwrap_or(0),
                _ => 0,
            };
            let depth = 1 + child(&node.lhs).max(child(&node.rhs));
            depths[i] = depth;
        }
        depths.get(self.root as usize).copied().unwrap_or(0)
    }
}
