//! Type identities and type sets
//!
//! The universe of type identities is finite: builtin scalars, one identity
//! per declared class, and one identity per container allocation site. It is
//! enumerated while the program loads and frozen before propagation starts.

use crate::error::{Result, SkeinError};
use crate::hir::ExprId;
use crate::program::ClassId;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuiltinType {
    None,
    Bool,
    Int,
    Float,
    Str,
}

impl BuiltinType {
    pub const ALL: [BuiltinType; 5] = [
        BuiltinType::None,
        BuiltinType::Bool,
        BuiltinType::Int,
        BuiltinType::Float,
        BuiltinType::Str,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BuiltinType::None => "None",
            BuiltinType::Bool => "bool",
            BuiltinType::Int => "int",
            BuiltinType::Float => "float",
            BuiltinType::Str => "str",
        }
    }

    /// Position in the numeric tower `bool < int < float`.
    pub fn numeric_rank(&self) -> Option<u8> {
        match self {
            BuiltinType::Bool => Some(0),
            BuiltinType::Int => Some(1),
            BuiltinType::Float => Some(2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ContainerKind {
    List,
    Tuple,
    Dict,
    Set,
}

impl ContainerKind {
    pub fn name(&self) -> &'static str {
        match self {
            ContainerKind::List => "list",
            ContainerKind::Tuple => "tuple",
            ContainerKind::Dict => "dict",
            ContainerKind::Set => "set",
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, ContainerKind::List | ContainerKind::Tuple)
    }
}

/// Storage slot of a container's element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Slot {
    /// Elements of a list/set/tuple, keys of a dict.
    Elem,
    /// Values of a dict.
    Value,
    /// One position of a tuple.
    Index(u8),
}

/// Tuple positions tracked individually; longer tuples only use `Slot::Elem`.
pub const MAX_TUPLE_SLOTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeKind {
    Builtin(BuiltinType),
    Class(ClassId),
    Container {
        kind: ContainerKind,
        site: ExprId,
        depth: u8,
    },
}

/// Append-only table of type identities, frozen before propagation.
#[derive(Debug, Clone)]
pub struct TypeUniverse {
    kinds: IndexSet<TypeKind>,
    frozen: bool,
}

impl TypeUniverse {
    pub fn new() -> Self {
        let mut kinds = IndexSet::new();
        for b in BuiltinType::ALL {
            kinds.insert(TypeKind::Builtin(b));
        }
        Self { kinds, frozen: false }
    }

    pub fn builtin(&self, b: BuiltinType) -> TypeId {
        // builtins are interned first, in declaration order
        TypeId(BuiltinType::ALL.iter().position(|x| *x == b).unwrap_or(0) as u32)
    }

    pub fn intern(&mut self, kind: TypeKind) -> Result<TypeId> {
        if let Some(idx) = self.kinds.get_index_of(&kind) {
            return Ok(TypeId(idx as u32));
        }
        if self.frozen {
            return Err(SkeinError::InternalInvariant(format!(
                "type identity {kind:?} discovered after the universe was frozen"
            )));
        }
        let (idx, _) = self.kinds.insert_full(kind);
        Ok(TypeId(idx as u32))
    }

    pub fn lookup(&self, kind: &TypeKind) -> Option<TypeId> {
        self.kinds.get_index_of(kind).map(|i| TypeId(i as u32))
    }

    pub fn class(&self, class: ClassId) -> Option<TypeId> {
        self.lookup(&TypeKind::Class(class))
    }

    pub fn container(&self, kind: ContainerKind, site: ExprId, depth: u8) -> Option<TypeId> {
        self.lookup(&TypeKind::Container { kind, site, depth })
    }

    pub fn kind(&self, id: TypeId) -> TypeKind {
        self.kinds[id.0 as usize]
    }

    pub fn as_builtin(&self, id: TypeId) -> Option<BuiltinType> {
        match self.kind(id) {
            TypeKind::Builtin(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_class(&self, id: TypeId) -> Option<ClassId> {
        match self.kind(id) {
            TypeKind::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_container(&self, id: TypeId) -> Option<ContainerKind> {
        match self.kind(id) {
            TypeKind::Container { kind, .. } => Some(kind),
            _ => None,
        }
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

impl Default for TypeUniverse {
    fn default() -> Self {
        Self::new()
    }
}

/// Sorted set of type identities attached to an analysis node.
///
/// Only ever grows during propagation: every mutating method is a join.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeSet {
    types: SmallVec<[TypeId; 4]>,
}

impl TypeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(ty: TypeId) -> Self {
        let mut set = Self::new();
        set.insert(ty);
        set
    }

    /// Add one identity; returns true if the set grew.
    pub fn insert(&mut self, ty: TypeId) -> bool {
        match self.types.binary_search(&ty) {
            Ok(_) => false,
            Err(pos) => {
                self.types.insert(pos, ty);
                true
            }
        }
    }

    /// Join `other` into `self`; returns true if the set grew.
    pub fn union_with(&mut self, other: &TypeSet) -> bool {
        let mut grew = false;
        for &ty in &other.types {
            grew |= self.insert(ty);
        }
        grew
    }

    /// Members of `self` that are also in `other`.
    pub fn intersection(&self, other: &TypeSet) -> TypeSet {
        TypeSet {
            types: self.types.iter().copied().filter(|t| other.contains(*t)).collect(),
        }
    }

    pub fn contains(&self, ty: TypeId) -> bool {
        self.types.binary_search(&ty).is_ok()
    }

    pub fn is_subset(&self, other: &TypeSet) -> bool {
        self.types.iter().all(|t| other.contains(*t))
    }

    pub fn is_disjoint(&self, other: &TypeSet) -> bool {
        !self.types.iter().any(|t| other.contains(*t))
    }

    pub fn iter(&self) -> impl Iterator<Item = TypeId> + '_ {
        self.types.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl FromIterator<TypeId> for TypeSet {
    fn from_iter<I: IntoIterator<Item = TypeId>>(iter: I) -> Self {
        let mut set = TypeSet::new();
        for ty in iter {
            set.insert(ty);
        }
        set
    }
}

impl fmt::Display for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, t) in self.types.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "t{}", t.0)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    fn set(ids: &[u32]) -> TypeSet {
        ids.iter().map(|&i| TypeId(i)).collect()
    }

    #[test]
    fn test_builtins_have_fixed_ids() {
        let universe = TypeUniverse::new();
        assert_eq!(universe.builtin(BuiltinType::None), TypeId(0));
        assert_eq!(universe.builtin(BuiltinType::Float), TypeId(3));
        assert_eq!(universe.as_builtin(TypeId(2)), Some(BuiltinType::Int));
    }

    #[test]
    fn test_frozen_universe_rejects_new_identities() {
        let mut universe = TypeUniverse::new();
        let site = ExprId(7);
        let list = TypeKind::Container {
            kind: ContainerKind::List,
            site,
            depth: 0,
        };
        let id = universe.intern(list).unwrap();
        universe.freeze();
        assert_eq!(universe.intern(list).unwrap(), id);
        let dict = TypeKind::Container {
            kind: ContainerKind::Dict,
            site,
            depth: 0,
        };
        assert!(universe.intern(dict).is_err());
    }

    #[test]
    fn test_insert_reports_growth() {
        let mut s = TypeSet::new();
        assert!(s.insert(TypeId(3)));
        assert!(!s.insert(TypeId(3)));
        assert!(s.insert(TypeId(1)));
        assert_eq!(s.iter().collect::<Vec<_>>(), vec![TypeId(1), TypeId(3)]);
    }

    #[test]
    fn test_intersection_and_disjoint() {
        let a = set(&[1, 2, 3]);
        let b = set(&[2, 3, 4]);
        assert_eq!(a.intersection(&b), set(&[2, 3]));
        assert!(set(&[1]).is_disjoint(&set(&[2])));
        assert!(!a.is_disjoint(&b));
    }

    #[quickcheck]
    fn prop_union_is_monotone(a: Vec<u8>, b: Vec<u8>) -> bool {
        let a: TypeSet = a.into_iter().map(|i| TypeId(i as u32)).collect();
        let b: TypeSet = b.into_iter().map(|i| TypeId(i as u32)).collect();
        let mut joined = a.clone();
        joined.union_with(&b);
        a.is_subset(&joined) && b.is_subset(&joined)
    }

    #[quickcheck]
    fn prop_union_is_idempotent_and_commutative(a: Vec<u8>, b: Vec<u8>) -> bool {
        let a: TypeSet = a.into_iter().map(|i| TypeId(i as u32)).collect();
        let b: TypeSet = b.into_iter().map(|i| TypeId(i as u32)).collect();
        let mut ab = a.clone();
        ab.union_with(&b);
        let mut ba = b.clone();
        ba.union_with(&a);
        let grew_again = ab.clone().union_with(&b);
        ab == ba && !grew_again
    }
}
