//! High-level Intermediate Representation (HIR)
//!
//! A small, analysis-oriented view of the Python AST. Every expression gets a
//! program-unique [`ExprId`] so the inference engine can key analysis nodes
//! on `(expression, context)` pairs without holding references into the tree.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Program-unique identity of one source expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExprId(pub u32);

impl fmt::Display for ExprId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
    MatMul,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
            BinOp::BitXor => "^",
            BinOp::LShift => "<<",
            BinOp::RShift => ">>",
            BinOp::MatMul => "@",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    Invert,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirExpr {
    pub id: ExprId,
    pub line: usize,
    pub kind: ExprKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    Name(String),
    Attribute {
        value: Box<HirExpr>,
        attr: String,
    },
    Call {
        func: Box<HirExpr>,
        args: Vec<HirExpr>,
        keywords: Vec<(String, HirExpr)>,
    },
    Binary {
        op: BinOp,
        left: Box<HirExpr>,
        right: Box<HirExpr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<HirExpr>,
    },
    /// `and` / `or` chains. The value is one of the operands.
    BoolOp(Vec<HirExpr>),
    /// Comparison chain; always yields `bool`.
    Compare {
        left: Box<HirExpr>,
        comparators: Vec<HirExpr>,
    },
    IfExpr {
        test: Box<HirExpr>,
        body: Box<HirExpr>,
        orelse: Box<HirExpr>,
    },
    List(Vec<HirExpr>),
    Tuple(Vec<HirExpr>),
    Set(Vec<HirExpr>),
    Dict(Vec<(HirExpr, HirExpr)>),
    Index {
        base: Box<HirExpr>,
        index: Box<HirExpr>,
    },
    Slice {
        base: Box<HirExpr>,
        bounds: Vec<HirExpr>,
    },
    ListComp {
        element: Box<HirExpr>,
        generators: Vec<Comprehension>,
    },
    /// f-string; the parts are evaluated for their side effects only.
    FString(Vec<HirExpr>),
    /// Construct outside the supported subset; carries a short description.
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comprehension {
    pub target: HirExpr,
    pub iter: HirExpr,
    pub conditions: Vec<HirExpr>,
}

impl HirExpr {
    /// Integer value of a literal, used for constant tuple indexing.
    pub fn as_int_literal(&self) -> Option<i64> {
        match &self.kind {
            ExprKind::Literal(Literal::Int(n)) => Some(*n),
            ExprKind::Unary {
                op: UnaryOp::Neg,
                operand,
            } => operand.as_int_literal().map(|n| -n),
            _ => None,
        }
    }

    /// Visit this expression and all sub-expressions in pre-order.
    pub fn walk<'a>(&'a self, f: &mut dyn FnMut(&'a HirExpr)) {
        f(self);
        match &self.kind {
            ExprKind::Literal(_) | ExprKind::Name(_) | ExprKind::Unsupported(_) => {}
            ExprKind::Attribute { value, .. } => value.walk(f),
            ExprKind::Call { func, args, keywords } => {
                func.walk(f);
                args.iter().for_each(|a| a.walk(f));
                keywords.iter().for_each(|(_, v)| v.walk(f));
            }
            ExprKind::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            ExprKind::Unary { operand, .. } => operand.walk(f),
            ExprKind::BoolOp(values)
            | ExprKind::List(values)
            | ExprKind::Tuple(values)
            | ExprKind::Set(values)
            | ExprKind::FString(values) => values.iter().for_each(|v| v.walk(f)),
            ExprKind::Compare { left, comparators } => {
                left.walk(f);
                comparators.iter().for_each(|c| c.walk(f));
            }
            ExprKind::IfExpr { test, body, orelse } => {
                test.walk(f);
                body.walk(f);
                orelse.walk(f);
            }
            ExprKind::Dict(items) => {
                for (k, v) in items {
                    k.walk(f);
                    v.walk(f);
                }
            }
            ExprKind::Index { base, index } => {
                base.walk(f);
                index.walk(f);
            }
            ExprKind::Slice { base, bounds } => {
                base.walk(f);
                bounds.iter().for_each(|b| b.walk(f));
            }
            ExprKind::ListComp { element, generators } => {
                for gen in generators {
                    gen.iter.walk(f);
                    gen.target.walk(f);
                    gen.conditions.iter().for_each(|c| c.walk(f));
                }
                element.walk(f);
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirStmt {
    pub line: usize,
    pub kind: StmtKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    /// `a = b = value`; targets may be names, attributes, subscripts or
    /// tuple/list patterns.
    Assign {
        targets: Vec<HirExpr>,
        value: HirExpr,
    },
    AugAssign {
        target: HirExpr,
        op: BinOp,
        value: HirExpr,
    },
    Expr(HirExpr),
    Return(Option<HirExpr>),
    If {
        test: HirExpr,
        body: Vec<HirStmt>,
        orelse: Vec<HirStmt>,
    },
    While {
        test: HirExpr,
        body: Vec<HirStmt>,
        orelse: Vec<HirStmt>,
    },
    For {
        target: HirExpr,
        iter: HirExpr,
        body: Vec<HirStmt>,
        orelse: Vec<HirStmt>,
    },
    FunctionDef(Arc<HirFunction>),
    ClassDef(Arc<HirClass>),
    Import(Vec<ImportAlias>),
    ImportFrom {
        module: String,
        names: Vec<ImportAlias>,
    },
    Global(Vec<String>),
    Assert {
        test: HirExpr,
        msg: Option<HirExpr>,
    },
    Pass,
    Break,
    Continue,
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportAlias {
    pub name: String,
    pub asname: Option<String>,
}

impl ImportAlias {
    /// Name the import binds in the importing scope.
    pub fn bound_name(&self) -> &str {
        self.asname.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirParam {
    pub name: String,
    pub default: Option<HirExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirFunction {
    pub name: String,
    pub params: Vec<HirParam>,
    pub body: Vec<HirStmt>,
    pub line: usize,
    /// Identity of the `def` itself, used to attach annotations to its line.
    pub id: ExprId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirClass {
    pub name: String,
    pub bases: Vec<HirExpr>,
    pub body: Vec<HirStmt>,
    pub line: usize,
    pub id: ExprId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HirModule {
    pub name: String,
    pub body: Vec<HirStmt>,
}

/// Visit every statement in a block, descending into compound statements
/// but not into nested function or class bodies.
pub fn walk_block<'a>(stmts: &'a [HirStmt], f: &mut dyn FnMut(&'a HirStmt)) {
    for stmt in stmts {
        f(stmt);
        match &stmt.kind {
            StmtKind::If { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::For { body, orelse, .. } => {
                walk_block(body, f);
                walk_block(orelse, f);
            }
            _ => {}
        }
    }
}

/// Visit every expression directly owned by a statement.
pub fn stmt_exprs<'a>(stmt: &'a HirStmt, f: &mut dyn FnMut(&'a HirExpr)) {
    match &stmt.kind {
        StmtKind::Assign { targets, value } => {
            value.walk(f);
            targets.iter().for_each(|t| t.walk(f));
        }
        StmtKind::AugAssign { target, value, .. } => {
            target.walk(f);
            value.walk(f);
        }
        StmtKind::Expr(e) => e.walk(f),
        StmtKind::Return(Some(e)) => e.walk(f),
        StmtKind::If { test, .. } | StmtKind::While { test, .. } => test.walk(f),
        StmtKind::For { target, iter, .. } => {
            iter.walk(f);
            target.walk(f);
        }
        StmtKind::Assert { test, msg } => {
            test.walk(f);
            if let Some(m) = msg {
                m.walk(f);
            }
        }
        _ => {}
    }
}
