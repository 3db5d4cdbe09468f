use std::fmt;

use crate::value::{Value, ValueType, Word64};

mod error;

pub use error::{ExpressionError, ExpressionResult};

/// Handle to a node stored in an [`ExpressionTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExprId(u32);

impl ExprId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
}

impl BinaryOperator {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOperator::Add => "add",
            BinaryOperator::Sub => "sub",
            BinaryOperator::Mul => "mul",
            BinaryOperator::Div => "div",
        }
    }
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExpressionKind {
    /// Literal word, tagged by the node type.
    Constant(Word64),
    /// Slot `index` of the runtime argument array.
    Argument { index: usize },
    /// Numeric conversion of `child` (of type `child_type`) into the node type.
    Cast { child: ExprId, child_type: ValueType },
    /// Arithmetic over two operands of the node type.
    Binary {
        op: BinaryOperator,
        left: ExprId,
        right: ExprId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub ty: ValueType,
    pub kind: ExpressionKind,
}

/// Arena owning every node of one or more expressions.
///
/// Children are created before their parents and referenced by [`ExprId`],
/// so a tree can share subexpressions but never contain a cycle. Nodes are
/// immutable once pushed.
#[derive(Debug, Clone, Default)]
pub struct ExpressionTree {
    nodes: Vec<Node>,
}

impl ExpressionTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: ExprId) -> ExpressionResult<&Node> {
        self.nodes
            .get(id.index())
            .ok_or(ExpressionError::UnknownNode {
                id: id.index(),
                len: self.nodes.len(),
            })
    }

    pub fn value_type(&self, id: ExprId) -> ExpressionResult<ValueType> {
        Ok(self.node(id)?.ty)
    }

    pub fn constant(&mut self, value: Value) -> ExprId {
        self.push(value.value_type(), ExpressionKind::Constant(value.to_word()))
    }

    pub fn constant_int(&mut self, value: i64) -> ExprId {
        self.constant(Value::Int64(value))
    }

    pub fn constant_double(&mut self, value: f64) -> ExprId {
        self.constant(Value::Double(value))
    }

    /// Reference to argument slot `index`, read as `ty`.
    ///
    /// The slot is not checked here; backends report an out-of-range index
    /// when the expression runs with too few arguments.
    pub fn argument(&mut self, index: usize, ty: ValueType) -> ExprId {
        self.push(ty, ExpressionKind::Argument { index })
    }

    pub fn cast(&mut self, child: ExprId, ty: ValueType) -> ExpressionResult<ExprId> {
        let child_type = self.value_type(child)?;
        Ok(self.push(ty, ExpressionKind::Cast { child, child_type }))
    }

    pub fn binary(
        &mut self,
        op: BinaryOperator,
        left: ExprId,
        right: ExprId,
    ) -> ExpressionResult<ExprId> {
        let left_type = self.value_type(left)?;
        let right_type = self.value_type(right)?;
        if left_type != right_type {
            return Err(ExpressionError::TypeMismatch {
                operator: op,
                left: left_type,
                right: right_type,
            });
        }
        Ok(self.push(left_type, ExpressionKind::Binary { op, left, right }))
    }

    pub fn add(&mut self, left: ExprId, right: ExprId) -> ExpressionResult<ExprId> {
        self.binary(BinaryOperator::Add, left, right)
    }

    pub fn sub(&mut self, left: ExprId, right: ExprId) -> ExpressionResult<ExprId> {
        self.binary(BinaryOperator::Sub, left, right)
    }

    pub fn mul(&mut self, left: ExprId, right: ExprId) -> ExpressionResult<ExprId> {
        self.binary(BinaryOperator::Mul, left, right)
    }

    pub fn div(&mut self, left: ExprId, right: ExprId) -> ExpressionResult<ExprId> {
        self.binary(BinaryOperator::Div, left, right)
    }

    /// Highest argument index reachable from `root`, or `None` when the
    /// expression reads no argument.
    pub fn highest_argument(&self, root: ExprId) -> ExpressionResult<Option<usize>> {
        self.walk(root, &mut HighestArgument)
    }

    /// Number of argument slots an evaluation of `root` reads: one past the
    /// highest reachable argument index, or 0 when none is reachable.
    pub fn required_arguments(&self, root: ExprId) -> ExpressionResult<usize> {
        Ok(self
            .highest_argument(root)?
            .map_or(0, |index| index.saturating_add(1)))
    }

    /// Visits every node reachable from `root` in post-order, left operand
    /// before right, and returns what `visitor` produced for the root.
    ///
    /// The traversal keeps its own stack, so tree depth is bounded by memory
    /// rather than by the thread stack. A node shared by several parents is
    /// visited once per path.
    pub fn walk<V: ExpressionVisitor>(
        &self,
        root: ExprId,
        visitor: &mut V,
    ) -> Result<V::Output, V::Error> {
        let mut frames: Vec<Frame<V::Output>> = Vec::new();
        let mut next = root;
        'descend: loop {
            let mut value = loop {
                let node = *self.node(next)?;
                match node.kind {
                    ExpressionKind::Constant(word) => break visitor.constant(node.ty, word)?,
                    ExpressionKind::Argument { index } => break visitor.argument(node.ty, index)?,
                    ExpressionKind::Cast { child, child_type } => {
                        frames.push(Frame::Cast {
                            from: child_type,
                            to: node.ty,
                        });
                        next = child;
                    }
                    ExpressionKind::Binary { op, left, right } => {
                        frames.push(Frame::Left {
                            ty: node.ty,
                            op,
                            right,
                        });
                        next = left;
                    }
                }
            };
            while let Some(frame) = frames.pop() {
                match frame {
                    Frame::Cast { from, to } => value = visitor.cast(from, to, value)?,
                    Frame::Left { ty, op, right } => {
                        frames.push(Frame::Right {
                            ty,
                            op,
                            left: value,
                        });
                        next = right;
                        continue 'descend;
                    }
                    Frame::Right { ty, op, left } => {
                        value = visitor.binary(ty, op, left, value)?;
                    }
                }
            }
            return Ok(value);
        }
    }

    /// S-expression rendering of the expression rooted at `root`.
    pub fn display(&self, root: ExprId) -> DisplayExpression<'_> {
        DisplayExpression { tree: self, root }
    }

    fn push(&mut self, ty: ValueType, kind: ExpressionKind) -> ExprId {
        let id = ExprId(self.nodes.len() as u32);
        self.nodes.push(Node { ty, kind });
        id
    }
}

pub struct DisplayExpression<'a> {
    tree: &'a ExpressionTree,
    root: ExprId,
}

enum Piece {
    Node(ExprId),
    Text(&'static str),
}

impl fmt::Display for DisplayExpression<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pieces = vec![Piece::Node(self.root)];
        while let Some(piece) = pieces.pop() {
            let id = match piece {
                Piece::Text(text) => {
                    f.write_str(text)?;
                    continue;
                }
                Piece::Node(id) => id,
            };
            let Ok(node) = self.tree.node(id) else {
                write!(f, "<unknown {id}>")?;
                continue;
            };
            match node.kind {
                ExpressionKind::Constant(word) => {
                    write!(f, "(const {} {})", Value::from_word(node.ty, word), node.ty)?;
                }
                ExpressionKind::Argument { index } => write!(f, "(arg {index} {})", node.ty)?,
                ExpressionKind::Cast { child, .. } => {
                    write!(f, "(cast {} ", node.ty)?;
                    pieces.extend([Piece::Text(")"), Piece::Node(child)]);
                }
                ExpressionKind::Binary { op, left, right } => {
                    write!(f, "({op} ")?;
                    pieces.extend([
                        Piece::Text(")"),
                        Piece::Node(right),
                        Piece::Text(" "),
                        Piece::Node(left),
                    ]);
                }
            }
        }
        Ok(())
    }
}

/// Per-kind callbacks for [`ExpressionTree::walk`].
///
/// Operands arrive already visited, so implementations never recurse.
pub trait ExpressionVisitor {
    type Output;
    type Error: From<ExpressionError>;

    fn constant(&mut self, ty: ValueType, word: Word64) -> Result<Self::Output, Self::Error>;

    fn argument(&mut self, ty: ValueType, index: usize) -> Result<Self::Output, Self::Error>;

    fn cast(
        &mut self,
        from: ValueType,
        to: ValueType,
        child: Self::Output,
    ) -> Result<Self::Output, Self::Error>;

    fn binary(
        &mut self,
        ty: ValueType,
        op: BinaryOperator,
        left: Self::Output,
        right: Self::Output,
    ) -> Result<Self::Output, Self::Error>;
}

/// Pending parent of the subtree `walk` is currently inside.
enum Frame<T> {
    Cast {
        from: ValueType,
        to: ValueType,
    },
    /// Left operand in progress.
    Left {
        ty: ValueType,
        op: BinaryOperator,
        right: ExprId,
    },
    /// Right operand in progress.
    Right {
        ty: ValueType,
        op: BinaryOperator,
        left: T,
    },
}

struct HighestArgument;

impl ExpressionVisitor for HighestArgument {
    type Output = Option<usize>;
    type Error = ExpressionError;

    fn constant(&mut self, _ty: ValueType, _word: Word64) -> ExpressionResult<Option<usize>> {
        Ok(None)
    }

    fn argument(&mut self, _ty: ValueType, index: usize) -> ExpressionResult<Option<usize>> {
        Ok(Some(index))
    }

    fn cast(
        &mut self,
        _from: ValueType,
        _to: ValueType,
        child: Option<usize>,
    ) -> ExpressionResult<Option<usize>> {
        Ok(child)
    }

    fn binary(
        &mut self,
        _ty: ValueType,
        _op: BinaryOperator,
        left: Option<usize>,
        right: Option<usize>,
    ) -> ExpressionResult<Option<usize>> {
        Ok(left.max(right))
    }
}
