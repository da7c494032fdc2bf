//! Human-readable type names
//!
//! Used by diagnostics, the annotator and the type manifest.

use crate::infer::MergedTypeMap;
use crate::program::Program;
use crate::types::{ContainerKind, Slot, TypeId, TypeKind, TypeSet, MAX_TUPLE_SLOTS};

/// Nesting depth past which container contents print as `...`.
const MAX_DEPTH: usize = 3;

/// Name of one identity without its contents: `int`, `Point`, `list`.
pub fn shallow_name(program: &Program, ty: TypeId) -> String {
    match program.universe.kind(ty) {
        TypeKind::Builtin(b) => b.name().to_string(),
        TypeKind::Class(c) => program.class(c).name.clone(),
        TypeKind::Container { kind, .. } => kind.name().to_string(),
    }
}

/// Render a merged type set, e.g. `int | float` or `dict(str, list(int))`.
/// Returns `None` for an empty set.
pub fn describe(program: &Program, merged: &MergedTypeMap, types: &TypeSet) -> Option<String> {
    if types.is_empty() {
        return None;
    }
    Some(TypeNamer { program, merged }.set(types, 0))
}

struct TypeNamer<'a> {
    program: &'a Program,
    merged: &'a MergedTypeMap,
}

impl TypeNamer<'_> {
    fn set(&self, types: &TypeSet, depth: usize) -> String {
        if types.is_empty() {
            return "?".to_string();
        }
        let mut parts: Vec<String> = Vec::new();
        for ty in types.iter() {
            let name = self.one(ty, depth);
            if !parts.contains(&name) {
                parts.push(name);
            }
        }
        parts.join(" | ")
    }

    fn slot(&self, ty: TypeId, slot: Slot, depth: usize) -> String {
        match self.merged.unit(ty, slot) {
            Some(types) => self.set(types, depth + 1),
            None => "?".to_string(),
        }
    }

    fn one(&self, ty: TypeId, depth: usize) -> String {
        let TypeKind::Container { kind, .. } = self.program.universe.kind(ty) else {
            return shallow_name(self.program, ty);
        };
        if depth >= MAX_DEPTH {
            return format!("{}(...)", kind.name());
        }
        let inner = match kind {
            ContainerKind::Dict => format!(
                "{}, {}",
                self.slot(ty, Slot::Elem, depth),
                self.slot(ty, Slot::Value, depth)
            ),
            ContainerKind::Tuple if self.merged.unit(ty, Slot::Index(0)).is_some() => (0..MAX_TUPLE_SLOTS as u8)
                .take_while(|i| self.merged.unit(ty, Slot::Index(*i)).is_some())
                .map(|i| self.slot(ty, Slot::Index(i), depth))
                .collect::<Vec<_>>()
                .join(", "),
            _ => self.slot(ty, Slot::Elem, depth),
        };
        format!("{}({})", kind.name(), inner)
    }
}
