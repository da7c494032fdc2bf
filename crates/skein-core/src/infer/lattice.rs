//! Operator type rules
//!
//! Rules are evaluated per pair of concrete types; the propagator applies
//! them to the cartesian product of the operand sets and joins the results.
//! - numeric widening follows `bool < int < float`
//! - sequence `+` yields the concatenation site's own container identity

use crate::hir::{BinOp, UnaryOp};
use crate::types::{BuiltinType, ContainerKind, TypeId, TypeKind, TypeSet, TypeUniverse};

/// Result of applying a binary operator to one pair of types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOutcome {
    Type(TypeId),
    /// Same-kind sequence concatenation; the result is the site container.
    Concat(ContainerKind),
    Unsupported,
}

/// Join two numeric builtins along the tower.
pub fn widen(a: BuiltinType, b: BuiltinType) -> Option<BuiltinType> {
    let ra = a.numeric_rank()?;
    let rb = b.numeric_rank()?;
    Some(match ra.max(rb) {
        0 => BuiltinType::Bool,
        1 => BuiltinType::Int,
        _ => BuiltinType::Float,
    })
}

fn arithmetic(op: BinOp, a: BuiltinType, b: BuiltinType) -> Option<BuiltinType> {
    let joined = widen(a, b)?;
    match op {
        BinOp::Div => Some(BuiltinType::Float),
        BinOp::BitAnd | BinOp::BitOr | BinOp::BitXor => match joined {
            BuiltinType::Bool => Some(BuiltinType::Bool),
            BuiltinType::Int => Some(BuiltinType::Int),
            _ => None,
        },
        BinOp::LShift | BinOp::RShift => match joined {
            BuiltinType::Float => None,
            _ => Some(BuiltinType::Int),
        },
        BinOp::MatMul => None,
        // arithmetic on bools yields int
        _ => Some(if joined == BuiltinType::Bool { BuiltinType::Int } else { joined }),
    }
}

pub fn binary(universe: &TypeUniverse, op: BinOp, left: TypeId, right: TypeId) -> BinaryOutcome {
    use BuiltinType::{Bool, Int, Str};
    let builtin = |b: BuiltinType| BinaryOutcome::Type(universe.builtin(b));
    match (universe.kind(left), universe.kind(right)) {
        (TypeKind::Builtin(a), TypeKind::Builtin(b)) => {
            if let Some(result) = arithmetic(op, a, b) {
                return builtin(result);
            }
            match (op, a, b) {
                (BinOp::Add, Str, Str) => builtin(Str),
                (BinOp::Mul, Str, Int | Bool) | (BinOp::Mul, Int | Bool, Str) => builtin(Str),
                (BinOp::Mod, Str, _) => builtin(Str),
                _ => BinaryOutcome::Unsupported,
            }
        }
        (TypeKind::Builtin(Str), _) if op == BinOp::Mod => builtin(Str),
        (TypeKind::Container { kind: a, .. }, TypeKind::Container { kind: b, .. })
            if op == BinOp::Add && a == b && a.is_sequence() =>
        {
            BinaryOutcome::Concat(a)
        }
        (TypeKind::Container { kind, .. }, TypeKind::Builtin(Int | Bool)) if op == BinOp::Mul && kind.is_sequence() => {
            BinaryOutcome::Type(left)
        }
        (TypeKind::Builtin(Int | Bool), TypeKind::Container { kind, .. }) if op == BinOp::Mul && kind.is_sequence() => {
            BinaryOutcome::Type(right)
        }
        _ => BinaryOutcome::Unsupported,
    }
}

pub fn unary(universe: &TypeUniverse, op: UnaryOp, operand: TypeId) -> Option<TypeId> {
    if op == UnaryOp::Not {
        return Some(universe.builtin(BuiltinType::Bool));
    }
    let b = universe.as_builtin(operand)?;
    let result = match (op, b) {
        (UnaryOp::Neg | UnaryOp::Pos, BuiltinType::Float) => BuiltinType::Float,
        (UnaryOp::Neg | UnaryOp::Pos | UnaryOp::Invert, BuiltinType::Int | BuiltinType::Bool) => BuiltinType::Int,
        _ => return None,
    };
    Some(universe.builtin(result))
}

/// Numeric view of a set: bools count as ints. Used by `abs` and `sum`.
pub fn promote_bools(universe: &TypeUniverse, types: &TypeSet) -> TypeSet {
    let bool_ty = universe.builtin(BuiltinType::Bool);
    let int_ty = universe.builtin(BuiltinType::Int);
    types.iter().map(|t| if t == bool_ty { int_ty } else { t }).collect()
}

fn all_numeric(universe: &TypeUniverse, types: &TypeSet) -> bool {
    types
        .iter()
        .all(|t| universe.as_builtin(t).and_then(|b| b.numeric_rank()).is_some())
}

/// Element sets of two concatenated sequences are compatible when either is
/// still unknown, they share a type, or both are purely numeric.
pub fn elements_compatible(universe: &TypeUniverse, left: &TypeSet, right: &TypeSet) -> bool {
    left.is_empty()
        || right.is_empty()
        || !left.is_disjoint(right)
        || (all_numeric(universe, left) && all_numeric(universe, right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::ExprId;

    fn universe() -> (TypeUniverse, TypeId, TypeId) {
        let mut u = TypeUniverse::new();
        let list_a = u
            .intern(TypeKind::Container { kind: ContainerKind::List, site: ExprId(1), depth: 0 })
            .unwrap();
        let tuple_b = u
            .intern(TypeKind::Container { kind: ContainerKind::Tuple, site: ExprId(2), depth: 0 })
            .unwrap();
        (u, list_a, tuple_b)
    }

    #[test]
    fn test_numeric_widening() {
        let (u, ..) = universe();
        let int = u.builtin(BuiltinType::Int);
        let float = u.builtin(BuiltinType::Float);
        let bool_ty = u.builtin(BuiltinType::Bool);
        assert_eq!(binary(&u, BinOp::Add, int, int), BinaryOutcome::Type(int));
        assert_eq!(binary(&u, BinOp::Add, int, float), BinaryOutcome::Type(float));
        assert_eq!(binary(&u, BinOp::Add, bool_ty, bool_ty), BinaryOutcome::Type(int));
        assert_eq!(binary(&u, BinOp::Div, int, int), BinaryOutcome::Type(float));
        assert_eq!(binary(&u, BinOp::BitAnd, bool_ty, bool_ty), BinaryOutcome::Type(bool_ty));
        assert_eq!(binary(&u, BinOp::LShift, float, int), BinaryOutcome::Unsupported);
    }

    #[test]
    fn test_string_rules() {
        let (u, list_a, _) = universe();
        let s = u.builtin(BuiltinType::Str);
        let int = u.builtin(BuiltinType::Int);
        assert_eq!(binary(&u, BinOp::Add, s, s), BinaryOutcome::Type(s));
        assert_eq!(binary(&u, BinOp::Mul, int, s), BinaryOutcome::Type(s));
        assert_eq!(binary(&u, BinOp::Mod, s, list_a), BinaryOutcome::Type(s));
        assert_eq!(binary(&u, BinOp::Add, s, int), BinaryOutcome::Unsupported);
    }

    #[test]
    fn test_sequence_rules() {
        let (u, list_a, tuple_b) = universe();
        let int = u.builtin(BuiltinType::Int);
        assert_eq!(binary(&u, BinOp::Add, list_a, list_a), BinaryOutcome::Concat(ContainerKind::List));
        assert_eq!(binary(&u, BinOp::Add, list_a, tuple_b), BinaryOutcome::Unsupported);
        assert_eq!(binary(&u, BinOp::Mul, list_a, int), BinaryOutcome::Type(list_a));
        assert_eq!(binary(&u, BinOp::Mul, int, tuple_b), BinaryOutcome::Type(tuple_b));
    }

    #[test]
    fn test_unary() {
        let (u, list_a, _) = universe();
        let int = u.builtin(BuiltinType::Int);
        let bool_ty = u.builtin(BuiltinType::Bool);
        assert_eq!(unary(&u, UnaryOp::Neg, bool_ty), Some(int));
        assert_eq!(unary(&u, UnaryOp::Not, list_a), Some(bool_ty));
        assert_eq!(unary(&u, UnaryOp::Neg, list_a), None);
    }

    #[test]
    fn test_elements_compatible() {
        let u = TypeUniverse::new();
        let int = TypeSet::single(u.builtin(BuiltinType::Int));
        let float = TypeSet::single(u.builtin(BuiltinType::Float));
        let s = TypeSet::single(u.builtin(BuiltinType::Str));
        assert!(elements_compatible(&u, &int, &float));
        assert!(elements_compatible(&u, &TypeSet::new(), &s));
        assert!(!elements_compatible(&u, &int, &s));
    }
}
