//! Declaration pass
//!
//! Runs once after every module has been parsed. It fills each module's
//! [`ModuleVisitor`](crate::program::ModuleVisitor), creates function, class
//! and variable records, links base classes, copies inherited methods into
//! subclasses and enumerates the type universe before freezing it.

use crate::diagnostics::{DiagnosticKind, DiagnosticSink};
use crate::error::Result;
use crate::hir::*;
use crate::program::*;
use crate::types::{ContainerKind, TypeKind};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Builtin calls that allocate a container at the call site.
const LIST_PRODUCERS: &[&str] = &["list", "sorted", "reversed", "range"];
const PAIR_PRODUCERS: &[&str] = &["enumerate", "zip"];
const LIST_METHODS: &[&str] = &["split", "rsplit", "splitlines", "keys", "values"];

pub fn declare_program(
    program: &mut Program,
    module_ids: &HashMap<String, ModuleId>,
    diagnostics: &mut DiagnosticSink,
) -> Result<()> {
    let mut sites = Vec::new();
    for idx in 0..program.modules.len() {
        declare_module(program, ModuleId(idx as u32), &mut sites);
    }
    resolve_imports(program, module_ids, diagnostics);
    link_bases(program, diagnostics);
    copy_inherited_methods(program);

    for idx in 0..program.classes.len() {
        program.universe.intern(TypeKind::Class(ClassId(idx as u32)))?;
    }
    for site in sites {
        program.universe.intern(site)?;
    }
    program.universe.freeze();
    debug!(
        "declared {} functions, {} classes, {} type identities",
        program.functions.len(),
        program.classes.len(),
        program.universe.len()
    );
    Ok(())
}

fn new_variable(program: &mut Program, name: &str, scope: Scope, line: usize) -> VarId {
    let id = VarId(program.variables.len() as u32);
    program.variables.push(Variable {
        id,
        name: name.to_string(),
        scope,
        line,
    });
    id
}

fn declare_module(program: &mut Program, module: ModuleId, sites: &mut Vec<TypeKind>) {
    let body = program.module(module).hir.body.clone();

    // expression bookkeeping covers nested bodies as well
    let mut exprs: Vec<(ExprId, ExprKindTag)> = Vec::new();
    let mut defs: Vec<ExprId> = Vec::new();
    visit_stmts_deep(&body, &mut |e| exprs.push((e.id, tag_of(e))), &mut |id| defs.push(id));
    exprs.extend(defs.into_iter().map(|id| (id, ExprKindTag::Definition)));
    for stmt in all_stmts_deep(&body) {
        if let StmtKind::AugAssign {
            target,
            op: BinOp::Add,
            ..
        } = &stmt.kind
        {
            push_concat_sites(sites, target.id);
        }
    }
    for (id, tag) in exprs {
        program.expr_modules.insert(id, module);
        match tag {
            ExprKindTag::Call(callee) => {
                program.modules[module.0 as usize].visitor.callfuncs.push(id);
                call_sites(sites, id, &callee);
            }
            ExprKindTag::Attribute(receiver, attr) => {
                program.attr_exprs.insert(id, AttrAccess { receiver, attr });
            }
            ExprKindTag::Container(kind) => sites.push(container(kind, id, 0)),
            ExprKindTag::Concat => push_concat_sites(sites, id),
            ExprKindTag::Definition | ExprKindTag::Other => {}
        }
    }

    let mut global_names: Vec<(String, usize)> = Vec::new();
    walk_block(&body, &mut |stmt| match &stmt.kind {
        StmtKind::FunctionDef(def) => {
            let f = declare_function(program, module, None, def.clone());
            let name = def.name.clone();
            program.modules[module.0 as usize].visitor.funcs.insert(name, f);
        }
        StmtKind::ClassDef(def) => {
            declare_class(program, module, def.clone());
        }
        _ => {
            for (name, line) in assigned_names(stmt) {
                global_names.push((name, line));
            }
        }
    });
    for (name, line) in global_names {
        if program.module(module).visitor.globals.contains_key(&name) {
            continue;
        }
        let v = new_variable(program, &name, Scope::Module(module), line);
        program.modules[module.0 as usize].visitor.globals.insert(name, v);
    }
    // `global x` inside a function declares a module variable too
    let declared: Vec<(String, usize)> = program
        .functions
        .iter()
        .filter(|f| f.module == module)
        .flat_map(|f| f.globals.iter().map(move |g| (g.clone(), f.def.line)))
        .collect();
    for (name, line) in declared {
        if !program.module(module).visitor.globals.contains_key(&name) {
            let v = new_variable(program, &name, Scope::Module(module), line);
            program.modules[module.0 as usize].visitor.globals.insert(name, v);
        }
    }
}

fn declare_function(program: &mut Program, module: ModuleId, class: Option<ClassId>, def: Arc<HirFunction>) -> FuncId {
    let id = FuncId(program.functions.len() as u32);
    let formals: Vec<String> = def.params.iter().map(|p| p.name.clone()).collect();

    let mut globals = HashSet::new();
    walk_block(&def.body, &mut |stmt| {
        if let StmtKind::Global(names) = &stmt.kind {
            globals.extend(names.iter().cloned());
        }
    });

    let mut locals: Vec<(String, usize)> = formals.iter().map(|f| (f.clone(), def.line)).collect();
    walk_block(&def.body, &mut |stmt| locals.extend(assigned_names(stmt)));

    let mut vars = IndexMap::new();
    for (name, line) in locals {
        if globals.contains(&name) || vars.contains_key(&name) {
            continue;
        }
        let v = new_variable(program, &name, Scope::Function(id), line);
        vars.insert(name, v);
    }

    program.functions.push(Function {
        id,
        name: def.name.clone(),
        module,
        class,
        def,
        formals,
        vars,
        globals,
        inherited: false,
    });
    id
}

fn declare_class(program: &mut Program, module: ModuleId, def: Arc<HirClass>) -> ClassId {
    let id = ClassId(program.classes.len() as u32);
    program.classes.push(Class {
        id,
        name: def.name.clone(),
        module,
        def: def.clone(),
        vars: IndexMap::new(),
        funcs: IndexMap::new(),
    });
    program.hierarchy.add_class(id);
    program.modules[module.0 as usize]
        .visitor
        .classes
        .insert(def.name.clone(), id);

    let mut class_vars: Vec<(String, usize)> = Vec::new();
    walk_block(&def.body, &mut |stmt| match &stmt.kind {
        StmtKind::FunctionDef(method) => {
            let f = declare_function(program, module, Some(id), method.clone());
            program.classes[id.0 as usize].funcs.insert(method.name.clone(), f);
            if let Some(self_name) = method.params.first().map(|p| p.name.clone()) {
                walk_block(&method.body, &mut |s| class_vars.extend(self_attributes(s, &self_name)));
            }
        }
        StmtKind::ClassDef(_) => {}
        _ => class_vars.extend(assigned_names(stmt)),
    });
    for (name, line) in class_vars {
        if program.class(id).vars.contains_key(&name) {
            continue;
        }
        let v = new_variable(program, &name, Scope::Class(id), line);
        program.classes[id.0 as usize].vars.insert(name, v);
    }
    id
}

fn resolve_imports(program: &mut Program, module_ids: &HashMap<String, ModuleId>, diagnostics: &mut DiagnosticSink) {
    // from-imports can chain through other modules' imports; iterate until
    // nothing new binds
    let mut pending: Vec<(ModuleId, usize, ImportRequest)> = Vec::new();
    for module in &program.modules {
        walk_block(&module.hir.body, &mut |stmt| match &stmt.kind {
            StmtKind::Import(aliases) => {
                for alias in aliases {
                    pending.push((
                        module.id,
                        stmt.line,
                        ImportRequest::Module {
                            module: alias.name.clone(),
                            bound: alias.bound_name().to_string(),
                        },
                    ));
                }
            }
            StmtKind::ImportFrom { module: from, names } => {
                for alias in names {
                    pending.push((
                        module.id,
                        stmt.line,
                        ImportRequest::Name {
                            module: from.clone(),
                            name: alias.name.clone(),
                            bound: alias.bound_name().to_string(),
                        },
                    ));
                }
            }
            _ => {}
        });
    }

    loop {
        let before = pending.len();
        pending.retain(|(importer, _, request)| !bind_import(program, module_ids, *importer, request));
        if pending.is_empty() || pending.len() == before {
            break;
        }
    }

    for (importer, line, request) in pending {
        let m = program.module(importer);
        let message = match &request {
            ImportRequest::Module { module, .. } => format!("cannot import module '{module}'"),
            ImportRequest::Name { module, name, .. } => format!("cannot import name '{name}' from '{module}'"),
        };
        diagnostics.warn(&m.name, &m.path, line, DiagnosticKind::UnresolvedName, message);
    }
}

#[derive(Debug, Clone)]
enum ImportRequest {
    Module { module: String, bound: String },
    Name { module: String, name: String, bound: String },
}

fn bind_import(
    program: &mut Program,
    module_ids: &HashMap<String, ModuleId>,
    importer: ModuleId,
    request: &ImportRequest,
) -> bool {
    match request {
        ImportRequest::Module { module, bound } => {
            let Some(&target) = module_ids.get(module) else {
                return false;
            };
            program.modules[importer.0 as usize]
                .visitor
                .imports
                .insert(bound.clone(), Binding::Module(target));
            true
        }
        ImportRequest::Name { module, name, bound } => {
            let Some(&target) = module_ids.get(module) else {
                return false;
            };
            if name == "*" {
                let visitor = &program.module(target).visitor;
                let mut all: Vec<(String, Binding)> = Vec::new();
                all.extend(visitor.funcs.iter().map(|(n, f)| (n.clone(), Binding::Function(*f))));
                all.extend(visitor.classes.iter().map(|(n, c)| (n.clone(), Binding::Class(*c))));
                all.extend(visitor.globals.iter().map(|(n, v)| (n.clone(), Binding::Variable(*v))));
                let imports = &mut program.modules[importer.0 as usize].visitor.imports;
                for (n, b) in all {
                    imports.entry(n).or_insert(b);
                }
                return true;
            }
            match program.resolve_global(target, name) {
                Some(binding) => {
                    program.modules[importer.0 as usize]
                        .visitor
                        .imports
                        .insert(bound.clone(), binding);
                    true
                }
                None => false,
            }
        }
    }
}

fn link_bases(program: &mut Program, diagnostics: &mut DiagnosticSink) {
    for idx in 0..program.classes.len() {
        let class = program.classes[idx].clone();
        for base in &class.def.bases {
            let resolved = match &base.kind {
                ExprKind::Name(name) if name == "object" => continue,
                ExprKind::Name(name) => program.resolve_global(class.module, name),
                ExprKind::Attribute { value, attr } => match &value.kind {
                    ExprKind::Name(m) => match program.resolve_global(class.module, m) {
                        Some(Binding::Module(target)) => program.resolve_global(target, attr),
                        _ => None,
                    },
                    _ => None,
                },
                _ => None,
            };
            match resolved {
                Some(Binding::Class(base_id)) => program.hierarchy.add_base(class.id, base_id),
                _ => {
                    let m = program.module(class.module);
                    diagnostics.warn(
                        &m.name,
                        &m.path,
                        class.def.line,
                        DiagnosticKind::UnresolvedName,
                        format!("unknown base class of '{}'", class.name),
                    );
                }
            }
        }
    }
}

fn copy_inherited_methods(program: &mut Program) {
    for idx in 0..program.classes.len() {
        let class_id = ClassId(idx as u32);
        let mro = program.hierarchy.mro(class_id);
        for &ancestor in mro.iter().skip(1) {
            let originals: Vec<(String, FuncId)> = program
                .class(ancestor)
                .funcs
                .iter()
                .filter(|(_, f)| !program.function(**f).inherited)
                .map(|(n, f)| (n.clone(), *f))
                .collect();
            for (name, original) in originals {
                if program.class(class_id).funcs.contains_key(&name) {
                    continue;
                }
                let copy = inherit_function(program, original, class_id);
                program.classes[idx].funcs.insert(name, copy);
            }
        }
    }
}

fn inherit_function(program: &mut Program, original: FuncId, class: ClassId) -> FuncId {
    let id = FuncId(program.functions.len() as u32);
    let source = program.function(original).clone();
    let mut vars = IndexMap::new();
    for (name, var) in &source.vars {
        let line = program.variable(*var).line;
        let v = new_variable(program, name, Scope::Function(id), line);
        vars.insert(name.clone(), v);
    }
    program.functions.push(Function {
        id,
        class: Some(class),
        vars,
        inherited: true,
        ..source
    });
    id
}

/// Names bound by a statement at its own scope level.
fn assigned_names(stmt: &HirStmt) -> Vec<(String, usize)> {
    let mut names = Vec::new();
    match &stmt.kind {
        StmtKind::Assign { targets, value } => {
            for t in targets {
                target_names(t, &mut names);
            }
            comprehension_names(value, &mut names);
        }
        StmtKind::AugAssign { target, .. } => target_names(target, &mut names),
        StmtKind::For { target, iter, .. } => {
            target_names(target, &mut names);
            comprehension_names(iter, &mut names);
        }
        StmtKind::Expr(e) | StmtKind::Return(Some(e)) => comprehension_names(e, &mut names),
        _ => {}
    }
    names.into_iter().map(|n| (n, stmt.line)).collect()
}

fn target_names(target: &HirExpr, out: &mut Vec<String>) {
    match &target.kind {
        ExprKind::Name(n) => out.push(n.clone()),
        ExprKind::Tuple(elts) | ExprKind::List(elts) => elts.iter().for_each(|e| target_names(e, out)),
        _ => {}
    }
}

/// Comprehension variables live in the enclosing scope.
fn comprehension_names(expr: &HirExpr, out: &mut Vec<String>) {
    expr.walk(&mut |e| {
        if let ExprKind::ListComp { generators, .. } = &e.kind {
            for gen in generators {
                target_names(&gen.target, out);
            }
        }
    });
}

fn self_attributes(stmt: &HirStmt, self_name: &str) -> Vec<(String, usize)> {
    let mut found = Vec::new();
    let mut check = |target: &HirExpr| {
        let mut stack = vec![target];
        while let Some(t) = stack.pop() {
            match &t.kind {
                ExprKind::Attribute { value, attr } => {
                    if matches!(&value.kind, ExprKind::Name(n) if n == self_name) {
                        found.push((attr.clone(), stmt.line));
                    }
                }
                ExprKind::Tuple(elts) | ExprKind::List(elts) => stack.extend(elts.iter()),
                _ => {}
            }
        }
    };
    match &stmt.kind {
        StmtKind::Assign { targets, .. } => targets.iter().for_each(&mut check),
        StmtKind::AugAssign { target, .. } => check(target),
        StmtKind::For { target, .. } => check(target),
        _ => {}
    }
    found
}

#[derive(Debug, Clone)]
enum ExprKindTag {
    Call(Option<CalleeShape>),
    Attribute(ExprId, String),
    Container(ContainerKind),
    Concat,
    Definition,
    Other,
}

#[derive(Debug, Clone)]
enum CalleeShape {
    Name(String),
    Method(String),
}

fn tag_of(e: &HirExpr) -> ExprKindTag {
    match &e.kind {
        ExprKind::Call { func, .. } => ExprKindTag::Call(match &func.kind {
            ExprKind::Name(n) => Some(CalleeShape::Name(n.clone())),
            ExprKind::Attribute { attr, .. } => Some(CalleeShape::Method(attr.clone())),
            _ => None,
        }),
        ExprKind::Attribute { value, attr } => ExprKindTag::Attribute(value.id, attr.clone()),
        ExprKind::List(_) | ExprKind::ListComp { .. } => ExprKindTag::Container(ContainerKind::List),
        ExprKind::Tuple(_) => ExprKindTag::Container(ContainerKind::Tuple),
        ExprKind::Set(_) => ExprKindTag::Container(ContainerKind::Set),
        ExprKind::Dict(_) => ExprKindTag::Container(ContainerKind::Dict),
        ExprKind::Binary { op: BinOp::Add, .. } => ExprKindTag::Concat,
        _ => ExprKindTag::Other,
    }
}

fn container(kind: ContainerKind, site: ExprId, depth: u8) -> TypeKind {
    TypeKind::Container { kind, site, depth }
}

fn push_concat_sites(sites: &mut Vec<TypeKind>, id: ExprId) {
    sites.push(container(ContainerKind::List, id, 0));
    sites.push(container(ContainerKind::Tuple, id, 0));
}

fn call_sites(sites: &mut Vec<TypeKind>, id: ExprId, callee: &Option<CalleeShape>) {
    match callee {
        Some(CalleeShape::Name(n)) if LIST_PRODUCERS.contains(&n.as_str()) => {
            sites.push(container(ContainerKind::List, id, 0))
        }
        Some(CalleeShape::Name(n)) if PAIR_PRODUCERS.contains(&n.as_str()) => {
            sites.push(container(ContainerKind::List, id, 0));
            sites.push(container(ContainerKind::Tuple, id, 1));
        }
        Some(CalleeShape::Name(n)) if n == "tuple" => sites.push(container(ContainerKind::Tuple, id, 0)),
        Some(CalleeShape::Name(n)) if n == "set" => sites.push(container(ContainerKind::Set, id, 0)),
        Some(CalleeShape::Name(n)) if n == "dict" => sites.push(container(ContainerKind::Dict, id, 0)),
        Some(CalleeShape::Method(m)) if LIST_METHODS.contains(&m.as_str()) => {
            sites.push(container(ContainerKind::List, id, 0))
        }
        Some(CalleeShape::Method(m)) if m == "items" => {
            sites.push(container(ContainerKind::List, id, 0));
            sites.push(container(ContainerKind::Tuple, id, 1));
        }
        _ => {}
    }
}

/// Visit every expression in a block, including nested function and class
/// bodies, parameter defaults and base lists. `on_def` receives the ids of
/// `def` and `class` statements.
pub(crate) fn visit_stmts_deep<'a>(
    stmts: &'a [HirStmt],
    on_expr: &mut dyn FnMut(&'a HirExpr),
    on_def: &mut dyn FnMut(ExprId),
) {
    for stmt in stmts {
        stmt_exprs(stmt, on_expr);
        match &stmt.kind {
            StmtKind::If { body, orelse, .. }
            | StmtKind::While { body, orelse, .. }
            | StmtKind::For { body, orelse, .. } => {
                visit_stmts_deep(body, on_expr, on_def);
                visit_stmts_deep(orelse, on_expr, on_def);
            }
            StmtKind::FunctionDef(def) => {
                on_def(def.id);
                for p in &def.params {
                    if let Some(d) = &p.default {
                        d.walk(on_expr);
                    }
                }
                visit_stmts_deep(&def.body, on_expr, on_def);
            }
            StmtKind::ClassDef(def) => {
                on_def(def.id);
                def.bases.iter().for_each(|b| b.walk(on_expr));
                visit_stmts_deep(&def.body, on_expr, on_def);
            }
            _ => {}
        }
    }
}

pub(crate) fn all_stmts_deep(stmts: &[HirStmt]) -> Vec<&HirStmt> {
    let mut out = Vec::new();
    fn go<'a>(stmts: &'a [HirStmt], out: &mut Vec<&'a HirStmt>) {
        for stmt in stmts {
            out.push(stmt);
            match &stmt.kind {
                StmtKind::If { body, orelse, .. }
                | StmtKind::While { body, orelse, .. }
                | StmtKind::For { body, orelse, .. } => {
                    go(body, out);
                    go(orelse, out);
                }
                StmtKind::FunctionDef(def) => go(&def.body, out),
                StmtKind::ClassDef(def) => go(&def.body, out),
                _ => {}
            }
        }
    }
    go(stmts, &mut out);
    out
}
