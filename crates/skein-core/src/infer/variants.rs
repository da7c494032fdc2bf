//! Variant generation and call resolution
//!
//! Calls are resolved with the cartesian product algorithm: every
//! combination of single argument types is a signature of its own, routed
//! to a variant built for exactly (or at least) that signature. Argument
//! edges are filtered by the signature component, so a variant never sees
//! types that belong to a sibling.

use super::constraint::{CallSite, CallTarget, Callee, Structural, StructuralKind};
use super::context::{Component, ContextId, ContextTable, Signature};
use super::engine::Analysis;
use super::node::{EdgeFilter, NodeId, NodeKey};
use crate::diagnostics::DiagnosticKind;
use crate::error::{Result, SkeinError};
use crate::program::{FuncId, ModuleId};
use crate::types::{TypeId, TypeKind, TypeSet};
use std::collections::BTreeSet;
use tracing::debug;

/// Signatures per call past which the whole call goes to the fallback.
const MAX_PRODUCT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub context: ContextId,
    pub created: bool,
    pub fallback: bool,
}

#[derive(Debug, Clone)]
pub struct VariantGenerator {
    max_variants: usize,
    capped: BTreeSet<FuncId>,
}

impl VariantGenerator {
    pub fn new(max_variants: usize) -> Self {
        Self {
            max_variants: max_variants.max(1),
            capped: BTreeSet::new(),
        }
    }

    /// Pick the variant for `signature`: an identical one, else the first
    /// one that subsumes it, else a new one while under the cap, else the
    /// generic fallback.
    pub fn route(&mut self, contexts: &mut ContextTable, func: FuncId, module: ModuleId, signature: &Signature) -> Route {
        let variants = contexts.variants(func);
        let existing = variants
            .iter()
            .find(|c| contexts.get(**c).signature.as_ref() == Some(signature))
            .or_else(|| {
                variants.iter().find(|c| {
                    contexts
                        .get(**c)
                        .signature
                        .as_ref()
                        .is_some_and(|s| s.subsumes(signature))
                })
            })
            .copied();
        if let Some(context) = existing {
            return Route {
                context,
                created: false,
                fallback: false,
            };
        }
        if variants.len() < self.max_variants {
            let context = contexts.add_variant(func, module, signature.clone());
            return Route {
                context,
                created: true,
                fallback: false,
            };
        }
        self.fallback(contexts, func, module)
    }

    pub fn fallback(&mut self, contexts: &mut ContextTable, func: FuncId, module: ModuleId) -> Route {
        let created = contexts.fallback(func).is_none();
        self.capped.insert(func);
        Route {
            context: contexts.add_fallback(func, module),
            created,
            fallback: true,
        }
    }

    /// Functions that hit the cap.
    pub fn capped(&self) -> &BTreeSet<FuncId> {
        &self.capped
    }

    pub fn max_variants(&self) -> usize {
        self.max_variants
    }
}

/// Cartesian product of per-position choices, in lexicographic order.
fn product(choices: &[Vec<Component>]) -> Vec<Signature> {
    let mut out = vec![Vec::with_capacity(choices.len())];
    for options in choices {
        out = out
            .into_iter()
            .flat_map(|prefix: Vec<Component>| {
                options.iter().map(move |c| {
                    let mut next = prefix.clone();
                    next.push(*c);
                    next
                })
            })
            .collect();
    }
    out.into_iter().map(Signature).collect()
}

impl<'p> Analysis<'p> {
    /// Resolve one call constraint against the current type sets.
    pub(crate) fn resolve_call(&mut self, s: &mut Structural, deferred_phase: bool) -> Result<()> {
        let (module, line, context) = (s.module, s.line, s.context);
        let StructuralKind::Call(call) = &mut s.kind else {
            return Ok(());
        };
        let program = self.program;
        match call.callee.clone() {
            Callee::Function(func) => self.call_function(call, func, None, true, deferred_phase)?,
            Callee::Construct(class) => {
                let ty = program.universe.class(class).ok_or_else(|| {
                    SkeinError::InternalInvariant(format!("class '{}' has no type identity", program.class(class).name))
                })?;
                self.add_type(call.out, ty);
                match program.lookup_method(class, "__init__") {
                    Some(init) => self.call_function(call, init, Some(ty), false, deferred_phase)?,
                    None if !call.args.is_empty() || !call.keywords.is_empty() => {
                        call.mismatch = Some(format!("{}() takes no arguments", program.class(class).name));
                    }
                    None => {
                        call.state.add(CallTarget::Builtin(format!("{}()", program.class(class).name)));
                    }
                }
            }
            Callee::Builtin(builtin) => {
                let effects = builtin.effects(call.args.len());
                self.apply_effects(context, call, None, &effects)?;
                call.state.add(CallTarget::Builtin(builtin.name().to_string()));
            }
            Callee::Method { receiver, name } => {
                let receiver_types = self.nodes.types(receiver).clone();
                for ty in receiver_types.iter() {
                    self.call_method(module, line, context, call, ty, &name, deferred_phase)?;
                }
            }
            Callee::Unknown(_) => {}
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn call_method(
        &mut self,
        module: ModuleId,
        line: usize,
        context: ContextId,
        call: &mut CallSite,
        ty: TypeId,
        name: &str,
        deferred_phase: bool,
    ) -> Result<()> {
        let program = self.program;
        let receiver = match program.universe.kind(ty) {
            TypeKind::Class(class) => {
                if let Some(func) = program.lookup_method(class, name) {
                    return self.call_function(call, func, Some(ty), true, deferred_phase);
                }
                if program.lookup_var(class, name).is_some() {
                    call.mismatch = Some(format!("calling attribute '{name}' of '{}' is not supported", program.class(class).name));
                    return Ok(());
                }
                None
            }
            TypeKind::Builtin(crate::types::BuiltinType::Str) => Some(super::builtins::Receiver::Str),
            TypeKind::Container { kind, .. } => Some(super::builtins::Receiver::Container(kind)),
            TypeKind::Builtin(_) => None,
        };
        let effects = receiver.and_then(|r| super::builtins::method_effects(r, name, call.args.len()));
        match effects {
            Some(effects) => {
                self.apply_effects(context, call, Some(ty), &effects)?;
                call.state.add(CallTarget::Builtin(format!("{}.{}", crate::typestr::shallow_name(program, ty), name)));
            }
            None => {
                let owner = crate::typestr::shallow_name(program, ty);
                if call.missing_method.insert(owner.clone()) {
                    self.warn(
                        module,
                        line,
                        DiagnosticKind::UnresolvedAttribute,
                        format!("'{owner}' has no method '{name}'"),
                    );
                }
            }
        }
        Ok(())
    }

    /// Bind arguments to the formals of `func` and route every signature
    /// of the product. `self_ty` is the receiver for methods and
    /// constructors.
    fn call_function(
        &mut self,
        call: &mut CallSite,
        func: FuncId,
        self_ty: Option<TypeId>,
        link_return: bool,
        deferred_phase: bool,
    ) -> Result<()> {
        let program = self.program;
        let f = program.function(func);
        let offset = usize::from(self_ty.is_some());
        let fname = program.function_name(func);

        let mut bound: Vec<Option<NodeId>> = vec![None; f.formals.len()];
        if call.args.len() + offset > f.formals.len() {
            call.mismatch = Some(format!(
                "'{}' takes {} arguments, {} given",
                fname,
                f.formals.len() - offset.min(f.formals.len()),
                call.args.len()
            ));
            return Ok(());
        }
        for (i, arg) in call.args.iter().enumerate() {
            bound[i + offset] = Some(*arg);
        }
        for (keyword, node) in &call.keywords {
            match f.formals.iter().position(|p| p == keyword) {
                Some(pos) if pos >= offset && bound[pos].is_none() => bound[pos] = Some(*node),
                Some(_) => {
                    call.mismatch = Some(format!("'{fname}' got multiple values for argument '{keyword}'"));
                    return Ok(());
                }
                None => {
                    call.mismatch = Some(format!("'{fname}' got an unexpected keyword argument '{keyword}'"));
                    return Ok(());
                }
            }
        }
        for (pos, slot) in bound.iter().enumerate().skip(offset) {
            if slot.is_none() && f.def.params[pos].default.is_none() {
                call.mismatch = Some(format!("'{}' missing argument '{}'", fname, f.formals[pos]));
                return Ok(());
            }
        }

        let mut choices: Vec<Vec<Component>> = Vec::with_capacity(bound.len());
        if let Some(t) = self_ty {
            choices.push(vec![Component::Type(t)]);
        }
        for slot in bound.iter().skip(offset) {
            choices.push(match slot {
                None => vec![Component::Default],
                Some(node) => {
                    let types = self.nodes.types(*node);
                    if types.is_empty() {
                        vec![Component::Empty]
                    } else {
                        types.iter().map(Component::Type).collect()
                    }
                }
            });
        }

        let size: usize = choices.iter().map(Vec::len).product();
        if size > MAX_PRODUCT {
            let route = self.variants.fallback(&mut self.contexts, func, f.module);
            return self.bind_route(call, func, route, &bound, self_ty, link_return, None);
        }

        for signature in product(&choices) {
            if call.routed.contains(&(func, signature.clone())) {
                continue;
            }
            if signature.has_empty() && !deferred_phase {
                call.deferred = true;
                continue;
            }
            let route = self.variants.route(&mut self.contexts, func, f.module, &signature);
            call.routed.insert((func, signature.clone()));
            self.bind_route(call, func, route, &bound, self_ty, link_return, Some(&signature))?;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn bind_route(
        &mut self,
        call: &mut CallSite,
        func: FuncId,
        route: Route,
        bound: &[Option<NodeId>],
        self_ty: Option<TypeId>,
        link_return: bool,
        signature: Option<&Signature>,
    ) -> Result<()> {
        let program = self.program;
        let f = program.function(func);
        let ctx = route.context;
        if route.created {
            debug!(
                "new {} {} for {} from call at {}",
                if route.fallback { "fallback" } else { "variant" },
                ctx,
                program.function_name(func),
                call.expr
            );
            if route.fallback {
                self.warn(
                    f.module,
                    f.def.line,
                    DiagnosticKind::VariantCapExceeded,
                    format!(
                        "'{}' exceeded {} variants; further signatures share one generic variant",
                        program.function_name(func),
                        self.variants.max_variants()
                    ),
                );
            }
            self.build_context(ctx)?;
        }

        for (pos, slot) in bound.iter().enumerate() {
            let Some(var) = f.formal_var(pos) else {
                continue;
            };
            let formal = self.nodes.register(NodeKey::Var(var, ctx), Some(f.module), f.def.line).0;
            if pos == 0 {
                if let Some(t) = self_ty {
                    self.add_type(formal, t);
                    continue;
                }
            }
            match slot {
                Some(arg) => {
                    let component = signature.map(|s| s.0[pos]);
                    let filter = match component {
                        _ if route.fallback => Some(EdgeFilter::All),
                        Some(Component::Type(t)) => Some(EdgeFilter::Only(TypeSet::single(t))),
                        _ => None,
                    };
                    if let Some(filter) = filter {
                        self.link(*arg, formal, filter);
                    }
                }
                None => {
                    if let Some(default) = &f.def.params[pos].default {
                        for node in self.nodes.nodes_of_expr(default.id).to_vec() {
                            self.link(node, formal, EdgeFilter::All);
                        }
                    }
                }
            }
        }
        if link_return {
            let ret = self.nodes.register(NodeKey::Return(ctx), Some(f.module), f.def.line).0;
            self.link(ret, call.out, EdgeFilter::All);
        }
        call.state.add(CallTarget::Variant(ctx));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_product_order() {
        let a = Component::Type(TypeId(2));
        let b = Component::Type(TypeId(3));
        let sigs = product(&[vec![a, b], vec![Component::Default]]);
        assert_eq!(
            sigs,
            vec![Signature(vec![a, Component::Default]), Signature(vec![b, Component::Default])]
        );
        assert_eq!(product(&[]), vec![Signature(vec![])]);
    }

    #[test]
    fn test_route_reuses_and_caps() {
        let mut contexts = ContextTable::new();
        let mut gen = VariantGenerator::new(2);
        let f = FuncId(0);
        let m = ModuleId(0);
        let int = Signature(vec![Component::Type(TypeId(2))]);
        let float = Signature(vec![Component::Type(TypeId(3))]);
        let s = Signature(vec![Component::Type(TypeId(4))]);

        let first = gen.route(&mut contexts, f, m, &int);
        assert!(first.created);
        assert_eq!(gen.route(&mut contexts, f, m, &int).context, first.context);

        // an empty component is subsumed by an existing variant
        let empty = gen.route(&mut contexts, f, m, &Signature(vec![Component::Empty]));
        assert_eq!(empty.context, first.context);
        assert!(!empty.created);

        assert!(gen.route(&mut contexts, f, m, &float).created);
        let capped = gen.route(&mut contexts, f, m, &s);
        assert!(capped.fallback && capped.created);
        let again = gen.route(&mut contexts, f, m, &Signature(vec![Component::Type(TypeId(5))]));
        assert_eq!(again.context, capped.context);
        assert!(!again.created);
        assert!(gen.capped().contains(&f));
    }
}
