//! Whole-program model produced by the loader
//!
//! Modules own a [`ModuleVisitor`] with their top-level declarations;
//! functions, classes and variables live in program-wide arenas and are
//! referred to by id.

use crate::hierarchy::ClassHierarchy;
use crate::hir::{ExprId, HirClass, HirFunction, HirModule};
use crate::types::TypeUniverse;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClassId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VarId(pub u32);

/// What a module-level name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    Module(ModuleId),
    Function(FuncId),
    Class(ClassId),
    Variable(VarId),
}

/// Per-module declarations.
#[derive(Debug, Clone, Default)]
pub struct ModuleVisitor {
    pub funcs: IndexMap<String, FuncId>,
    pub classes: IndexMap<String, ClassId>,
    pub globals: IndexMap<String, VarId>,
    /// Names bound by `import` / `from ... import`.
    pub imports: IndexMap<String, Binding>,
    /// Every call expression in the module, in source order.
    pub callfuncs: Vec<ExprId>,
}

#[derive(Debug, Clone)]
pub struct Module {
    pub id: ModuleId,
    pub name: String,
    pub path: PathBuf,
    /// Found in a library directory rather than next to the main module.
    pub builtin: bool,
    pub source: String,
    pub hir: HirModule,
    pub visitor: ModuleVisitor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Module(ModuleId),
    Function(FuncId),
    Class(ClassId),
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub id: VarId,
    pub name: String,
    pub scope: Scope,
    pub line: usize,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub id: FuncId,
    pub name: String,
    pub module: ModuleId,
    /// Owning class for methods.
    pub class: Option<ClassId>,
    pub def: Arc<HirFunction>,
    /// Ordered formal parameter names.
    pub formals: Vec<String>,
    pub vars: IndexMap<String, VarId>,
    /// Names declared `global` in the body.
    pub globals: HashSet<String>,
    /// Copied into a subclass that does not override it.
    pub inherited: bool,
}

impl Function {
    pub fn formal_var(&self, index: usize) -> Option<VarId> {
        self.formals.get(index).and_then(|name| self.vars.get(name).copied())
    }

    pub fn is_method(&self) -> bool {
        self.class.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Class {
    pub id: ClassId,
    pub name: String,
    pub module: ModuleId,
    pub def: Arc<HirClass>,
    pub vars: IndexMap<String, VarId>,
    pub funcs: IndexMap<String, FuncId>,
}

/// An attribute access `receiver.attr` as written in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrAccess {
    pub receiver: ExprId,
    pub attr: String,
}

#[derive(Debug, Clone, Default)]
pub struct Program {
    pub modules: Vec<Module>,
    pub functions: Vec<Function>,
    pub classes: Vec<Class>,
    pub variables: Vec<Variable>,
    pub universe: TypeUniverse,
    pub hierarchy: ClassHierarchy,
    pub attr_exprs: HashMap<ExprId, AttrAccess>,
    pub expr_modules: HashMap<ExprId, ModuleId>,
    pub main: Option<ModuleId>,
}

impl Program {
    pub fn module(&self, id: ModuleId) -> &Module {
        &self.modules[id.0 as usize]
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub fn class(&self, id: ClassId) -> &Class {
        &self.classes[id.0 as usize]
    }

    pub fn variable(&self, id: VarId) -> &Variable {
        &self.variables[id.0 as usize]
    }

    pub fn module_by_name(&self, name: &str) -> Option<&Module> {
        self.modules.iter().find(|m| m.name == name)
    }

    pub fn main_module(&self) -> Option<&Module> {
        self.main.map(|m| self.module(m))
    }

    /// Module-level lookup of a name: declarations first, then imports.
    pub fn resolve_global(&self, module: ModuleId, name: &str) -> Option<Binding> {
        let visitor = &self.module(module).visitor;
        if let Some(&f) = visitor.funcs.get(name) {
            return Some(Binding::Function(f));
        }
        if let Some(&c) = visitor.classes.get(name) {
            return Some(Binding::Class(c));
        }
        if let Some(&v) = visitor.globals.get(name) {
            return Some(Binding::Variable(v));
        }
        visitor.imports.get(name).copied()
    }

    /// Find a method along the MRO of `class`.
    pub fn lookup_method(&self, class: ClassId, name: &str) -> Option<FuncId> {
        // inherited copies make the class's own table complete
        self.class(class).funcs.get(name).copied().or_else(|| {
            self.hierarchy
                .mro(class)
                .into_iter()
                .find_map(|c| self.class(c).funcs.get(name).copied())
        })
    }

    /// Find the class declaring instance/class variable `name` along the
    /// MRO of `class`.
    pub fn lookup_var(&self, class: ClassId, name: &str) -> Option<VarId> {
        self.hierarchy
            .mro(class)
            .into_iter()
            .find_map(|c| self.class(c).vars.get(name).copied())
    }

    /// Which module an expression was written in.
    pub fn module_of_expr(&self, expr: ExprId) -> Option<ModuleId> {
        self.expr_modules.get(&expr).copied()
    }

    /// Qualified display name, e.g. `Point.norm` or `helper`.
    pub fn function_name(&self, id: FuncId) -> String {
        let f = self.function(id);
        match f.class {
            Some(c) => format!("{}.{}", self.class(c).name, f.name),
            None => f.name.clone(),
        }
    }

    /// Every function and method of a module, classes' methods included.
    pub fn functions_of(&self, module: ModuleId) -> impl Iterator<Item = &Function> {
        self.functions.iter().filter(move |f| f.module == module)
    }
}
