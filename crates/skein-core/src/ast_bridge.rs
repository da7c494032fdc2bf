//! Lowering from the rustpython AST into HIR
//!
//! Expression ids are allocated from a counter that the loader threads
//! through every module of a program, so ids stay unique program-wide.

use crate::hir::*;
use anyhow::{anyhow, Result};
use rustpython_ast::{self as ast, Ranged};
use rustpython_parser::Parse;
use std::sync::Arc;

/// Maps byte offsets to 1-based line numbers.
#[derive(Debug, Clone)]
struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn line(&self, offset: usize) -> usize {
        self.starts.partition_point(|&s| s <= offset).max(1)
    }
}

pub struct AstBridge {
    lines: LineIndex,
    next_id: u32,
}

impl AstBridge {
    pub fn new(source: &str, first_id: u32) -> Self {
        Self {
            lines: LineIndex::new(source),
            next_id: first_id,
        }
    }

    /// Parse `source` and lower it in one step.
    pub fn parse_module(name: &str, source: &str, path: &str, first_id: u32) -> Result<(HirModule, u32)> {
        let statements = ast::Suite::parse(source, path).map_err(|e| anyhow!("Python parse error: {}", e))?;
        let mut bridge = AstBridge::new(source, first_id);
        let body = bridge.lower_block(&statements);
        Ok((
            HirModule {
                name: name.to_string(),
                body,
            },
            bridge.next_id,
        ))
    }

    /// First id not handed out yet.
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    fn fresh_id(&mut self) -> ExprId {
        let id = ExprId(self.next_id);
        self.next_id += 1;
        id
    }

    fn line_of(&self, node: &impl Ranged) -> usize {
        self.lines.line(u32::from(node.range().start()) as usize)
    }

    fn mk(&mut self, line: usize, kind: ExprKind) -> HirExpr {
        HirExpr {
            id: self.fresh_id(),
            line,
            kind,
        }
    }

    pub fn lower_block(&mut self, stmts: &[ast::Stmt]) -> Vec<HirStmt> {
        let mut out = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            self.lower_stmt(stmt, &mut out);
        }
        out
    }

    fn lower_stmt(&mut self, stmt: &ast::Stmt, out: &mut Vec<HirStmt>) {
        let line = self.line_of(stmt);
        let kind = match stmt {
            ast::Stmt::FunctionDef(f) => {
                if !f.decorator_list.is_empty() {
                    out.push(unsupported(line, "function decorators"));
                }
                let a = &f.args;
                if a.vararg.is_some() || a.kwarg.is_some() || !a.kwonlyargs.is_empty() {
                    out.push(unsupported(line, "variadic or keyword-only parameters"));
                }
                let id = self.fresh_id();
                let params = a
                    .posonlyargs
                    .iter()
                    .chain(a.args.iter())
                    .map(|p| HirParam {
                        name: p.def.arg.as_str().to_string(),
                        default: p.default.as_ref().map(|d| self.lower_expr(d)),
                    })
                    .collect();
                let body = self.lower_block(&f.body);
                StmtKind::FunctionDef(Arc::new(HirFunction {
                    name: f.name.as_str().to_string(),
                    params,
                    body,
                    line,
                    id,
                }))
            }
            ast::Stmt::ClassDef(c) => {
                if !c.keywords.is_empty() || !c.decorator_list.is_empty() {
                    out.push(unsupported(line, "class keywords or decorators"));
                }
                let id = self.fresh_id();
                let bases = c.bases.iter().map(|b| self.lower_expr(b)).collect();
                let body = self.lower_block(&c.body);
                StmtKind::ClassDef(Arc::new(HirClass {
                    name: c.name.as_str().to_string(),
                    bases,
                    body,
                    line,
                    id,
                }))
            }
            ast::Stmt::Return(r) => StmtKind::Return(r.value.as_ref().map(|v| self.lower_expr(v))),
            ast::Stmt::Assign(a) => {
                let value = self.lower_expr(&a.value);
                let targets = a.targets.iter().map(|t| self.lower_expr(t)).collect();
                StmtKind::Assign { targets, value }
            }
            ast::Stmt::AugAssign(a) => {
                let target = self.lower_expr(&a.target);
                let value = self.lower_expr(&a.value);
                StmtKind::AugAssign {
                    target,
                    op: lower_operator(&a.op),
                    value,
                }
            }
            ast::Stmt::AnnAssign(a) => match &a.value {
                Some(v) => {
                    let value = self.lower_expr(v);
                    let target = self.lower_expr(&a.target);
                    StmtKind::Assign {
                        targets: vec![target],
                        value,
                    }
                }
                None => StmtKind::Pass,
            },
            ast::Stmt::For(f) => {
                let iter = self.lower_expr(&f.iter);
                let target = self.lower_expr(&f.target);
                StmtKind::For {
                    target,
                    iter,
                    body: self.lower_block(&f.body),
                    orelse: self.lower_block(&f.orelse),
                }
            }
            ast::Stmt::While(w) => StmtKind::While {
                test: self.lower_expr(&w.test),
                body: self.lower_block(&w.body),
                orelse: self.lower_block(&w.orelse),
            },
            ast::Stmt::If(i) => StmtKind::If {
                test: self.lower_expr(&i.test),
                body: self.lower_block(&i.body),
                orelse: self.lower_block(&i.orelse),
            },
            ast::Stmt::Expr(e) => StmtKind::Expr(self.lower_expr(&e.value)),
            ast::Stmt::Import(i) => StmtKind::Import(i.names.iter().map(lower_alias).collect()),
            ast::Stmt::ImportFrom(i) => match &i.module {
                Some(module) => StmtKind::ImportFrom {
                    module: module.as_str().to_string(),
                    names: i.names.iter().map(lower_alias).collect(),
                },
                None => StmtKind::Unsupported("relative import".to_string()),
            },
            ast::Stmt::Global(g) => StmtKind::Global(g.names.iter().map(|n| n.as_str().to_string()).collect()),
            ast::Stmt::Assert(a) => StmtKind::Assert {
                test: self.lower_expr(&a.test),
                msg: a.msg.as_ref().map(|m| self.lower_expr(m)),
            },
            ast::Stmt::Pass(_) => StmtKind::Pass,
            ast::Stmt::Break(_) => StmtKind::Break,
            ast::Stmt::Continue(_) => StmtKind::Continue,
            other => StmtKind::Unsupported(unsupported_stmt_name(other).to_string()),
        };
        out.push(HirStmt { line, kind });
    }

    pub fn lower_expr(&mut self, expr: &ast::Expr) -> HirExpr {
        let line = self.line_of(expr);
        let kind = match expr {
            ast::Expr::BoolOp(b) => ExprKind::BoolOp(b.values.iter().map(|v| self.lower_expr(v)).collect()),
            ast::Expr::BinOp(b) => ExprKind::Binary {
                op: lower_operator(&b.op),
                left: Box::new(self.lower_expr(&b.left)),
                right: Box::new(self.lower_expr(&b.right)),
            },
            ast::Expr::UnaryOp(u) => ExprKind::Unary {
                op: match u.op {
                    ast::UnaryOp::Not => UnaryOp::Not,
                    ast::UnaryOp::USub => UnaryOp::Neg,
                    ast::UnaryOp::UAdd => UnaryOp::Pos,
                    ast::UnaryOp::Invert => UnaryOp::Invert,
                },
                operand: Box::new(self.lower_expr(&u.operand)),
            },
            ast::Expr::IfExp(i) => ExprKind::IfExpr {
                test: Box::new(self.lower_expr(&i.test)),
                body: Box::new(self.lower_expr(&i.body)),
                orelse: Box::new(self.lower_expr(&i.orelse)),
            },
            ast::Expr::Dict(d) => {
                if d.keys.iter().any(Option::is_none) {
                    ExprKind::Unsupported("dict unpacking".to_string())
                } else {
                    let items = d
                        .keys
                        .iter()
                        .flatten()
                        .zip(d.values.iter())
                        .map(|(k, v)| (self.lower_expr(k), self.lower_expr(v)))
                        .collect();
                    ExprKind::Dict(items)
                }
            }
            ast::Expr::Set(s) => ExprKind::Set(s.elts.iter().map(|e| self.lower_expr(e)).collect()),
            ast::Expr::ListComp(c) => {
                // generators are lowered first so their ids precede the element
                let generators = c
                    .generators
                    .iter()
                    .map(|g| {
                        let iter = self.lower_expr(&g.iter);
                        let target = self.lower_expr(&g.target);
                        let conditions = g.ifs.iter().map(|i| self.lower_expr(i)).collect();
                        Comprehension {
                            target,
                            iter,
                            conditions,
                        }
                    })
                    .collect();
                ExprKind::ListComp {
                    element: Box::new(self.lower_expr(&c.elt)),
                    generators,
                }
            }
            ast::Expr::Compare(c) => ExprKind::Compare {
                left: Box::new(self.lower_expr(&c.left)),
                comparators: c.comparators.iter().map(|e| self.lower_expr(e)).collect(),
            },
            ast::Expr::Call(c) => {
                let func = Box::new(self.lower_expr(&c.func));
                let args = c.args.iter().map(|a| self.lower_expr(a)).collect();
                let mut keywords = Vec::with_capacity(c.keywords.len());
                let mut splat = false;
                for kw in &c.keywords {
                    match &kw.arg {
                        Some(name) => keywords.push((name.as_str().to_string(), self.lower_expr(&kw.value))),
                        None => splat = true,
                    }
                }
                if splat {
                    ExprKind::Unsupported("keyword argument unpacking".to_string())
                } else {
                    ExprKind::Call { func, args, keywords }
                }
            }
            ast::Expr::JoinedStr(j) => ExprKind::FString(j.values.iter().map(|v| self.lower_expr(v)).collect()),
            ast::Expr::FormattedValue(f) => return self.lower_expr(&f.value),
            ast::Expr::Constant(c) => self.lower_constant(line, &c.value),
            ast::Expr::Attribute(a) => ExprKind::Attribute {
                value: Box::new(self.lower_expr(&a.value)),
                attr: a.attr.as_str().to_string(),
            },
            ast::Expr::Subscript(s) => {
                let base = Box::new(self.lower_expr(&s.value));
                match s.slice.as_ref() {
                    ast::Expr::Slice(sl) => {
                        let bounds = [&sl.lower, &sl.upper, &sl.step]
                            .into_iter()
                            .flatten()
                            .map(|b| self.lower_expr(b))
                            .collect();
                        ExprKind::Slice { base, bounds }
                    }
                    index => ExprKind::Index {
                        base,
                        index: Box::new(self.lower_expr(index)),
                    },
                }
            }
            ast::Expr::Name(n) => ExprKind::Name(n.id.as_str().to_string()),
            ast::Expr::List(l) => ExprKind::List(l.elts.iter().map(|e| self.lower_expr(e)).collect()),
            ast::Expr::Tuple(t) => ExprKind::Tuple(t.elts.iter().map(|e| self.lower_expr(e)).collect()),
            ast::Expr::Lambda(_) => ExprKind::Unsupported("lambda".to_string()),
            ast::Expr::NamedExpr(_) => ExprKind::Unsupported("assignment expression".to_string()),
            ast::Expr::SetComp(_) | ast::Expr::DictComp(_) => {
                ExprKind::Unsupported("set or dict comprehension".to_string())
            }
            ast::Expr::GeneratorExp(_) | ast::Expr::Yield(_) | ast::Expr::YieldFrom(_) => {
                ExprKind::Unsupported("generator".to_string())
            }
            ast::Expr::Await(_) => ExprKind::Unsupported("await".to_string()),
            ast::Expr::Starred(_) => ExprKind::Unsupported("starred expression".to_string()),
            ast::Expr::Slice(_) => ExprKind::Unsupported("slice outside subscript".to_string()),
        };
        self.mk(line, kind)
    }

    fn lower_constant(&mut self, line: usize, constant: &ast::Constant) -> ExprKind {
        match constant {
            ast::Constant::None => ExprKind::Literal(Literal::None),
            ast::Constant::Bool(b) => ExprKind::Literal(Literal::Bool(*b)),
            ast::Constant::Str(s) => ExprKind::Literal(Literal::String(s.clone())),
            ast::Constant::Int(i) => match i.to_string().parse::<i64>() {
                Ok(n) => ExprKind::Literal(Literal::Int(n)),
                Err(_) => ExprKind::Unsupported("integer literal out of range".to_string()),
            },
            ast::Constant::Float(f) => ExprKind::Literal(Literal::Float(*f)),
            ast::Constant::Tuple(items) => {
                let elems = items
                    .iter()
                    .map(|c| {
                        let kind = self.lower_constant(line, c);
                        self.mk(line, kind)
                    })
                    .collect();
                ExprKind::Tuple(elems)
            }
            ast::Constant::Bytes(_) => ExprKind::Unsupported("bytes literal".to_string()),
            ast::Constant::Complex { .. } => ExprKind::Unsupported("complex literal".to_string()),
            ast::Constant::Ellipsis => ExprKind::Unsupported("ellipsis".to_string()),
        }
    }
}

fn unsupported(line: usize, what: &str) -> HirStmt {
    HirStmt {
        line,
        kind: StmtKind::Unsupported(what.to_string()),
    }
}

fn lower_alias(alias: &ast::Alias) -> ImportAlias {
    ImportAlias {
        name: alias.name.as_str().to_string(),
        asname: alias.asname.as_ref().map(|a| a.as_str().to_string()),
    }
}

fn lower_operator(op: &ast::Operator) -> BinOp {
    match op {
        ast::Operator::Add => BinOp::Add,
        ast::Operator::Sub => BinOp::Sub,
        ast::Operator::Mult => BinOp::Mul,
        ast::Operator::MatMult => BinOp::MatMul,
        ast::Operator::Div => BinOp::Div,
        ast::Operator::Mod => BinOp::Mod,
        ast::Operator::Pow => BinOp::Pow,
        ast::Operator::LShift => BinOp::LShift,
        ast::Operator::RShift => BinOp::RShift,
        ast::Operator::BitOr => BinOp::BitOr,
        ast::Operator::BitXor => BinOp::BitXor,
        ast::Operator::BitAnd => BinOp::BitAnd,
        ast::Operator::FloorDiv => BinOp::FloorDiv,
    }
}

fn unsupported_stmt_name(stmt: &ast::Stmt) -> &'static str {
    match stmt {
        ast::Stmt::AsyncFunctionDef(_) | ast::Stmt::AsyncFor(_) | ast::Stmt::AsyncWith(_) => "async statement",
        ast::Stmt::Delete(_) => "del statement",
        ast::Stmt::With(_) => "with statement",
        ast::Stmt::Raise(_) => "raise statement",
        ast::Stmt::Try(_) | ast::Stmt::TryStar(_) => "try statement",
        ast::Stmt::Nonlocal(_) => "nonlocal statement",
        ast::Stmt::Match(_) => "match statement",
        _ => "statement",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower(source: &str) -> HirModule {
        AstBridge::parse_module("test", source, "<test>", 0).unwrap().0
    }

    #[test]
    fn test_line_index() {
        let idx = LineIndex::new("a\nbb\nccc\n");
        assert_eq!(idx.line(0), 1);
        assert_eq!(idx.line(2), 2);
        assert_eq!(idx.line(5), 3);
    }

    #[test]
    fn test_lower_function_with_defaults() {
        let module = lower("def f(x, y=2):\n    return x + y\n");
        let StmtKind::FunctionDef(f) = &module.body[0].kind else {
            panic!("expected function");
        };
        assert_eq!(f.name, "f");
        assert_eq!(f.params.len(), 2);
        assert!(f.params[0].default.is_none());
        assert!(f.params[1].default.is_some());
        assert_eq!(f.body[0].line, 2);
    }

    #[test]
    fn test_expression_ids_are_unique() {
        let module = lower("a = [1, 2, (3, 4)]\nb = a[0] + len(a)\n");
        let mut ids = Vec::new();
        for stmt in &module.body {
            stmt_exprs(stmt, &mut |e| ids.push(e.id));
        }
        let count = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), count);
    }

    #[test]
    fn test_ids_continue_from_first_id() {
        let (_, next) = AstBridge::parse_module("m", "x = 1\n", "<m>", 100).unwrap();
        assert!(next > 100);
    }

    #[test]
    fn test_unsupported_constructs_are_kept() {
        let module = lower("try:\n    pass\nexcept E:\n    pass\nf = lambda x: x\n");
        assert!(matches!(module.body[0].kind, StmtKind::Unsupported(_)));
        let StmtKind::Assign { value, .. } = &module.body[1].kind else {
            panic!("expected assignment");
        };
        assert!(matches!(value.kind, ExprKind::Unsupported(_)));
    }

    #[test]
    fn test_slice_and_index() {
        let module = lower("y = x[1:2]\nz = x[0]\n");
        let StmtKind::Assign { value, .. } = &module.body[0].kind else {
            panic!()
        };
        assert!(matches!(value.kind, ExprKind::Slice { .. }));
        let StmtKind::Assign { value, .. } = &module.body[1].kind else {
            panic!()
        };
        assert!(matches!(value.kind, ExprKind::Index { .. }));
    }

    #[test]
    fn test_parse_error() {
        assert!(AstBridge::parse_module("bad", "def (:\n", "<bad>", 0).is_err());
    }
}
