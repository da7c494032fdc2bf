//! Constraint graph builder
//!
//! Walks the body owned by one context (a module, a class body or one
//! function variant) and turns it into nodes, edges, seeds and
//! constraints. Expression nodes are created on first visit only, so
//! building is memoized per `(expression, context)`.

use super::builtins::BuiltinFunction;
use super::constraint::{CallSite, Callee, Structural, StructuralKind, Transfer, TransferKind};
use super::context::ContextId;
use super::engine::Analysis;
use super::node::{EdgeFilter, NodeId, NodeKey};
use crate::diagnostics::DiagnosticKind;
use crate::error::{Result, SkeinError};
use crate::hir::{ExprKind, HirExpr, HirStmt, Literal, StmtKind};
use crate::program::{Binding, ClassId, FuncId, ModuleId, Scope, VarId};
use crate::types::{BuiltinType, ContainerKind, Slot, TypeId, MAX_TUPLE_SLOTS};
use tracing::trace;

/// What a name refers to from the scope being built.
#[derive(Debug, Clone, Copy)]
enum NameRef {
    Var(VarId, ContextId),
    Function(FuncId),
    Class(ClassId),
    Module(ModuleId),
    Builtin(BuiltinFunction),
    Unknown,
}

pub(crate) struct ConstraintBuilder<'a, 'p> {
    an: &'a mut Analysis<'p>,
    ctx: ContextId,
    module: ModuleId,
    scope: Scope,
}

impl<'a, 'p> ConstraintBuilder<'a, 'p> {
    pub(crate) fn new(an: &'a mut Analysis<'p>, ctx: ContextId) -> Self {
        let module = an.contexts.get(ctx).module;
        Self {
            an,
            ctx,
            module,
            scope: Scope::Module(module),
        }
    }

    pub(crate) fn build_module(&mut self, module: ModuleId) -> Result<()> {
        let program = self.an.program;
        self.module = module;
        self.scope = Scope::Module(module);
        self.block(&program.module(module).hir.body)
    }

    pub(crate) fn build_class(&mut self, class: ClassId) -> Result<()> {
        let program = self.an.program;
        let c = program.class(class);
        self.module = c.module;
        self.scope = Scope::Class(class);
        self.block(&c.def.body)
    }

    pub(crate) fn build_function(&mut self, func: FuncId) -> Result<()> {
        let program = self.an.program;
        let f = program.function(func);
        self.module = f.module;
        self.scope = Scope::Function(func);
        trace!("building {} in {}", program.function_name(func), self.ctx);

        for index in 0..f.formals.len() {
            if let Some(var) = f.formal_var(index) {
                self.var_node(var, self.ctx);
            }
        }
        let ret = self.return_node();
        let mut returns_value = false;
        crate::hir::walk_block(&f.def.body, &mut |s| {
            returns_value |= matches!(s.kind, StmtKind::Return(Some(_)));
        });
        if !returns_value {
            self.seed(ret, BuiltinType::None);
        }
        self.block(&f.def.body)
    }

    fn warn(&mut self, line: usize, kind: DiagnosticKind, message: impl Into<String>) {
        self.an.warn(self.module, line, kind, message);
    }

    fn seed(&mut self, node: NodeId, b: BuiltinType) {
        let ty = self.an.program.universe.builtin(b);
        self.an.add_type(node, ty);
    }

    fn site(&self, kind: ContainerKind, e: &HirExpr) -> Result<TypeId> {
        self.an.program.universe.container(kind, e.id, 0).ok_or_else(|| {
            SkeinError::InternalInvariant(format!("no {} identity enumerated for {}", kind.name(), e.id))
        })
    }

    fn structural(&mut self, kind: StructuralKind, line: usize) {
        let s = Structural::new(kind, self.ctx, self.module, line);
        self.an.constraints.add_structural(s);
    }

    fn transfer(&mut self, kind: TransferKind, out: NodeId, line: usize) -> Result<()> {
        let id = self.an.constraints.add_transfer(Transfer {
            kind,
            out,
            module: self.module,
            line,
        });
        self.an.evaluate_transfer(id)
    }

    fn return_node(&mut self) -> NodeId {
        self.an.nodes.register(NodeKey::Return(self.ctx), Some(self.module), 0).0
    }

    fn var_node(&mut self, var: VarId, ctx: ContextId) -> NodeId {
        let program = self.an.program;
        let v = program.variable(var);
        let module = match v.scope {
            Scope::Module(m) => m,
            Scope::Function(f) => program.function(f).module,
            Scope::Class(c) => program.class(c).module,
        };
        self.an.nodes.register(NodeKey::Var(var, ctx), Some(module), v.line).0
    }

    fn module_var(&mut self, module: ModuleId, var: VarId) -> NodeId {
        let (ctx, _) = self.an.contexts.module_context(module);
        self.var_node(var, ctx)
    }

    fn resolve_name(&mut self, name: &str) -> NameRef {
        let program = self.an.program;
        match self.scope {
            Scope::Function(f) => {
                let f = program.function(f);
                if !f.globals.contains(name) {
                    if let Some(&v) = f.vars.get(name) {
                        return NameRef::Var(v, self.ctx);
                    }
                }
            }
            Scope::Class(c) => {
                if let Some(&v) = program.class(c).vars.get(name) {
                    return NameRef::Var(v, self.ctx);
                }
            }
            Scope::Module(_) => {}
        }
        match program.resolve_global(self.module, name) {
            Some(Binding::Variable(v)) => match program.variable(v).scope {
                Scope::Module(m) => NameRef::Var(v, self.an.contexts.module_context(m).0),
                _ => NameRef::Unknown,
            },
            Some(Binding::Function(f)) => NameRef::Function(f),
            Some(Binding::Class(c)) => NameRef::Class(c),
            Some(Binding::Module(m)) => NameRef::Module(m),
            None => BuiltinFunction::from_name(name)
                .map(NameRef::Builtin)
                .unwrap_or(NameRef::Unknown),
        }
    }

    /// Variable node an assignment to `name` writes.
    fn store_name(&mut self, name: &str) -> Option<NodeId> {
        let program = self.an.program;
        let var = match self.scope {
            Scope::Function(f) => {
                let f = program.function(f);
                if f.globals.contains(name) {
                    let v = *program.module(f.module).visitor.globals.get(name)?;
                    return Some(self.module_var(f.module, v));
                }
                *f.vars.get(name)?
            }
            Scope::Class(c) => *program.class(c).vars.get(name)?,
            Scope::Module(m) => *program.module(m).visitor.globals.get(name)?,
        };
        Some(self.var_node(var, self.ctx))
    }

    fn block(&mut self, stmts: &'p [HirStmt]) -> Result<()> {
        for stmt in stmts {
            self.stmt(stmt)?;
        }
        Ok(())
    }

    fn stmt(&mut self, stmt: &'p HirStmt) -> Result<()> {
        match &stmt.kind {
            StmtKind::Assign { targets, value } => {
                let v = self.expr(value)?;
                for target in targets {
                    self.bind_target(target, v)?;
                }
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.expr(target)?;
                let rhs = self.expr(value)?;
                self.transfer(
                    TransferKind::Binary {
                        op: *op,
                        left: current,
                        right: rhs,
                        site: target.id,
                    },
                    current,
                    stmt.line,
                )?;
                self.bind_target(target, current)?;
            }
            StmtKind::Expr(e) => {
                self.expr(e)?;
            }
            StmtKind::Return(value) => {
                if !matches!(self.scope, Scope::Function(_)) {
                    self.warn(stmt.line, DiagnosticKind::UnsupportedConstruct, "'return' outside function");
                    return Ok(());
                }
                let ret = self.return_node();
                match value {
                    Some(v) => {
                        let v = self.expr(v)?;
                        self.an.link(v, ret, EdgeFilter::All);
                    }
                    None => self.seed(ret, BuiltinType::None),
                }
            }
            StmtKind::If { test, body, orelse } | StmtKind::While { test, body, orelse } => {
                self.expr(test)?;
                self.block(body)?;
                self.block(orelse)?;
            }
            StmtKind::For {
                target,
                iter,
                body,
                orelse,
            } => {
                let iterable = self.expr(iter)?;
                let element = self.target_node(target);
                self.structural(StructuralKind::Iterate { iterable, out: element }, stmt.line);
                self.bind_target(target, element)?;
                self.block(body)?;
                self.block(orelse)?;
            }
            StmtKind::FunctionDef(def) => match self.scope {
                Scope::Module(_) | Scope::Class(_) => {
                    // defaults are evaluated where the function is defined
                    for param in &def.params {
                        if let Some(default) = &param.default {
                            self.expr(default)?;
                        }
                    }
                }
                Scope::Function(_) => self.warn(
                    stmt.line,
                    DiagnosticKind::UnsupportedConstruct,
                    format!("nested function '{}'", def.name),
                ),
            },
            StmtKind::ClassDef(def) => match self.scope {
                Scope::Module(_) => {
                    let Some(&class) = self.an.class_by_def.get(&def.id) else {
                        return Err(SkeinError::InternalInvariant(format!("class '{}' was never declared", def.name)));
                    };
                    let (ctx, created) = self.an.contexts.class_context(class, self.module);
                    if created {
                        self.an.build_context(ctx)?;
                    }
                }
                _ => self.warn(
                    stmt.line,
                    DiagnosticKind::UnsupportedConstruct,
                    format!("nested class '{}'", def.name),
                ),
            },
            StmtKind::Import(_) | StmtKind::ImportFrom { .. } => {
                if !matches!(self.scope, Scope::Module(_)) {
                    self.warn(stmt.line, DiagnosticKind::UnsupportedConstruct, "import outside module scope");
                }
            }
            StmtKind::Assert { test, msg } => {
                self.expr(test)?;
                if let Some(m) = msg {
                    self.expr(m)?;
                }
            }
            StmtKind::Global(_) | StmtKind::Pass | StmtKind::Break | StmtKind::Continue => {}
            StmtKind::Unsupported(what) => {
                self.warn(stmt.line, DiagnosticKind::UnsupportedConstruct, what.clone());
            }
        }
        Ok(())
    }

    /// Node holding what gets stored into an assignment target.
    fn target_node(&mut self, target: &HirExpr) -> NodeId {
        self.an
            .nodes
            .register(NodeKey::Expr(target.id, self.ctx), Some(self.module), target.line)
            .0
    }

    fn bind_target(&mut self, target: &'p HirExpr, value: NodeId) -> Result<()> {
        match &target.kind {
            ExprKind::Name(name) => {
                let node = self.target_node(target);
                self.an.link(value, node, EdgeFilter::All);
                match self.store_name(name) {
                    Some(var) => self.an.link(value, var, EdgeFilter::All),
                    None => self.warn(
                        target.line,
                        DiagnosticKind::UnresolvedName,
                        format!("cannot assign to undeclared name '{name}'"),
                    ),
                }
            }
            ExprKind::Tuple(elts) | ExprKind::List(elts) => {
                let node = self.target_node(target);
                self.an.link(value, node, EdgeFilter::All);
                let targets: Vec<NodeId> = elts.iter().map(|e| self.target_node(e)).collect();
                self.structural(
                    StructuralKind::Unpack {
                        source: value,
                        targets: targets.clone(),
                    },
                    target.line,
                );
                for (elt, node) in elts.iter().zip(targets) {
                    self.bind_target(elt, node)?;
                }
            }
            ExprKind::Attribute { value: receiver, attr } => {
                if let Some(m) = self.module_ref(receiver) {
                    let program = self.an.program;
                    match program.module(m).visitor.globals.get(attr) {
                        Some(&var) => {
                            let node = self.module_var(m, var);
                            self.an.link(value, node, EdgeFilter::All);
                        }
                        None => self.warn(
                            target.line,
                            DiagnosticKind::DynamicAttribute,
                            format!("module '{}' has no variable '{}'", program.module(m).name, attr),
                        ),
                    }
                    return Ok(());
                }
                let recv = self.expr(receiver)?;
                self.structural(
                    StructuralKind::SetAttr {
                        receiver: recv,
                        attr: attr.clone(),
                        value,
                    },
                    target.line,
                );
                let node = self.target_node(target);
                self.structural(
                    StructuralKind::GetAttr {
                        receiver: recv,
                        attr: attr.clone(),
                        out: node,
                    },
                    target.line,
                );
            }
            ExprKind::Index { base, index } => {
                let base = self.expr(base)?;
                let index = self.expr(index)?;
                self.structural(StructuralKind::StoreSubscript { base, index, value }, target.line);
            }
            _ => self.warn(
                target.line,
                DiagnosticKind::UnsupportedConstruct,
                "unsupported assignment target",
            ),
        }
        Ok(())
    }

    /// The module a `name` expression refers to, if any.
    fn module_ref(&mut self, e: &HirExpr) -> Option<ModuleId> {
        match &e.kind {
            ExprKind::Name(name) => match self.resolve_name(name) {
                NameRef::Module(m) => Some(m),
                _ => None,
            },
            _ => None,
        }
    }

    fn expr(&mut self, e: &'p HirExpr) -> Result<NodeId> {
        let (node, created) = self
            .an
            .nodes
            .register(NodeKey::Expr(e.id, self.ctx), Some(self.module), e.line);
        if created {
            self.build_expr(e, node)?;
        }
        Ok(node)
    }

    fn build_expr(&mut self, e: &'p HirExpr, node: NodeId) -> Result<()> {
        match &e.kind {
            ExprKind::Literal(lit) => {
                let b = match lit {
                    Literal::Int(_) => BuiltinType::Int,
                    Literal::Float(_) => BuiltinType::Float,
                    Literal::String(_) => BuiltinType::Str,
                    Literal::Bool(_) => BuiltinType::Bool,
                    Literal::None => BuiltinType::None,
                };
                self.seed(node, b);
            }
            ExprKind::Name(name) => match self.resolve_name(name) {
                NameRef::Var(var, ctx) => {
                    let v = self.var_node(var, ctx);
                    self.an.link(v, node, EdgeFilter::All);
                }
                NameRef::Unknown => {
                    self.warn(e.line, DiagnosticKind::UnresolvedName, format!("name '{name}' is not defined"));
                }
                NameRef::Function(_) | NameRef::Class(_) | NameRef::Module(_) | NameRef::Builtin(_) => {}
            },
            ExprKind::Attribute { value, attr } => {
                if let Some(m) = self.module_ref(value) {
                    let program = self.an.program;
                    match program.resolve_global(m, attr) {
                        Some(Binding::Variable(var)) => {
                            let v = self.module_var(m, var);
                            self.an.link(v, node, EdgeFilter::All);
                        }
                        Some(_) => {}
                        None => self.warn(
                            e.line,
                            DiagnosticKind::UnresolvedAttribute,
                            format!("module '{}' has no attribute '{}'", program.module(m).name, attr),
                        ),
                    }
                    return Ok(());
                }
                let receiver = self.expr(value)?;
                self.structural(
                    StructuralKind::GetAttr {
                        receiver,
                        attr: attr.clone(),
                        out: node,
                    },
                    e.line,
                );
            }
            ExprKind::Call { func, args, keywords } => self.call(e, func, args, keywords, node)?,
            ExprKind::Binary { op, left, right } => {
                let l = self.expr(left)?;
                let r = self.expr(right)?;
                self.transfer(
                    TransferKind::Binary {
                        op: *op,
                        left: l,
                        right: r,
                        site: e.id,
                    },
                    node,
                    e.line,
                )?;
            }
            ExprKind::Unary { op, operand } => {
                let operand = self.expr(operand)?;
                self.transfer(TransferKind::Unary { op: *op, operand }, node, e.line)?;
            }
            ExprKind::BoolOp(values) => {
                for v in values {
                    let v = self.expr(v)?;
                    self.an.link(v, node, EdgeFilter::All);
                }
            }
            ExprKind::Compare { left, comparators } => {
                self.expr(left)?;
                for c in comparators {
                    self.expr(c)?;
                }
                self.seed(node, BuiltinType::Bool);
            }
            ExprKind::IfExpr { test, body, orelse } => {
                self.expr(test)?;
                for branch in [body, orelse] {
                    let b = self.expr(branch)?;
                    self.an.link(b, node, EdgeFilter::All);
                }
            }
            ExprKind::List(elts) | ExprKind::Set(elts) => {
                let kind = if matches!(e.kind, ExprKind::List(_)) {
                    ContainerKind::List
                } else {
                    ContainerKind::Set
                };
                let ty = self.site(kind, e)?;
                self.an.add_type(node, ty);
                let elem = self.an.unit(ty, Slot::Elem);
                for elt in elts {
                    let v = self.expr(elt)?;
                    self.an.link(v, elem, EdgeFilter::All);
                }
            }
            ExprKind::Tuple(elts) => {
                let ty = self.site(ContainerKind::Tuple, e)?;
                let positional = elts.len() <= MAX_TUPLE_SLOTS;
                if positional {
                    self.an.positional.insert(ty);
                }
                self.an.add_type(node, ty);
                let elem = self.an.unit(ty, Slot::Elem);
                for (i, elt) in elts.iter().enumerate() {
                    let v = self.expr(elt)?;
                    self.an.link(v, elem, EdgeFilter::All);
                    if positional {
                        let slot = self.an.unit(ty, Slot::Index(i as u8));
                        self.an.link(v, slot, EdgeFilter::All);
                    }
                }
            }
            ExprKind::Dict(items) => {
                let ty = self.site(ContainerKind::Dict, e)?;
                self.an.add_type(node, ty);
                let (keys, values) = (self.an.unit(ty, Slot::Elem), self.an.unit(ty, Slot::Value));
                for (k, v) in items {
                    let k = self.expr(k)?;
                    let v = self.expr(v)?;
                    self.an.link(k, keys, EdgeFilter::All);
                    self.an.link(v, values, EdgeFilter::All);
                }
            }
            ExprKind::Index { base, index } => {
                let b = self.expr(base)?;
                let i = self.expr(index)?;
                self.structural(
                    StructuralKind::Subscript {
                        base: b,
                        index: i,
                        literal: index.as_int_literal(),
                        slice: false,
                        out: node,
                    },
                    e.line,
                );
            }
            ExprKind::Slice { base, bounds } => {
                let b = self.expr(base)?;
                for bound in bounds {
                    self.expr(bound)?;
                }
                self.structural(
                    StructuralKind::Subscript {
                        base: b,
                        index: b,
                        literal: None,
                        slice: true,
                        out: node,
                    },
                    e.line,
                );
            }
            ExprKind::ListComp { element, generators } => {
                let ty = self.site(ContainerKind::List, e)?;
                self.an.add_type(node, ty);
                for gen in generators {
                    let iterable = self.expr(&gen.iter)?;
                    let target = self.target_node(&gen.target);
                    self.structural(StructuralKind::Iterate { iterable, out: target }, e.line);
                    self.bind_target(&gen.target, target)?;
                    for cond in &gen.conditions {
                        self.expr(cond)?;
                    }
                }
                let v = self.expr(element)?;
                let elem = self.an.unit(ty, Slot::Elem);
                self.an.link(v, elem, EdgeFilter::All);
            }
            ExprKind::FString(parts) => {
                for part in parts {
                    self.expr(part)?;
                }
                self.seed(node, BuiltinType::Str);
            }
            ExprKind::Unsupported(what) => {
                self.warn(e.line, DiagnosticKind::UnsupportedConstruct, what.clone());
            }
        }
        Ok(())
    }

    fn call(
        &mut self,
        e: &'p HirExpr,
        func: &'p HirExpr,
        args: &'p [HirExpr],
        keywords: &'p [(String, HirExpr)],
        out: NodeId,
    ) -> Result<()> {
        let args = args.iter().map(|a| self.expr(a)).collect::<Result<Vec<_>>>()?;
        let keywords = keywords
            .iter()
            .map(|(k, v)| self.expr(v).map(|n| (k.clone(), n)))
            .collect::<Result<Vec<_>>>()?;

        let (callee, name) = match &func.kind {
            ExprKind::Name(name) => {
                let callee = match self.resolve_name(name) {
                    NameRef::Function(f) => Callee::Function(f),
                    NameRef::Class(c) => Callee::Construct(c),
                    NameRef::Builtin(b) => Callee::Builtin(b),
                    NameRef::Var(..) | NameRef::Module(_) => {
                        self.expr(func)?;
                        Callee::Unknown(name.clone())
                    }
                    NameRef::Unknown => {
                        self.warn(e.line, DiagnosticKind::UnresolvedName, format!("name '{name}' is not defined"));
                        Callee::Unknown(name.clone())
                    }
                };
                (callee, name.clone())
            }
            ExprKind::Attribute { value, attr } => match self.module_ref(value) {
                Some(m) => {
                    let program = self.an.program;
                    let qualified = format!("{}.{}", program.module(m).name, attr);
                    let callee = match program.resolve_global(m, attr) {
                        Some(Binding::Function(f)) => Callee::Function(f),
                        Some(Binding::Class(c)) => Callee::Construct(c),
                        _ => Callee::Unknown(qualified.clone()),
                    };
                    (callee, qualified)
                }
                None => {
                    let receiver = self.expr(value)?;
                    (
                        Callee::Method {
                            receiver,
                            name: attr.clone(),
                        },
                        format!(".{attr}"),
                    )
                }
            },
            _ => {
                self.expr(func)?;
                (Callee::Unknown("<expression>".into()), "<expression>".to_string())
            }
        };

        let call = CallSite::new(e.id, name, callee, args, keywords, out);
        self.structural(StructuralKind::Call(Box::new(call)), e.line);
        Ok(())
    }
}
