//! Builtin functions and methods
//!
//! Builtins are described as lists of [`Effect`]s over the call's
//! arguments, receiver and result. The engine applies them each time the
//! inputs of a call grow.

use crate::types::{BuiltinType, ContainerKind, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BuiltinFunction {
    Len,
    Abs,
    Min,
    Max,
    Sum,
    Int,
    Float,
    Str,
    Bool,
    Repr,
    Ord,
    Chr,
    Round,
    Hash,
    Isinstance,
    Print,
    Input,
    Range,
    List,
    Tuple,
    Set,
    Dict,
    Sorted,
    Reversed,
    Enumerate,
    Zip,
}

impl BuiltinFunction {
    const TABLE: [(&'static str, BuiltinFunction); 26] = [
        ("len", BuiltinFunction::Len),
        ("abs", BuiltinFunction::Abs),
        ("min", BuiltinFunction::Min),
        ("max", BuiltinFunction::Max),
        ("sum", BuiltinFunction::Sum),
        ("int", BuiltinFunction::Int),
        ("float", BuiltinFunction::Float),
        ("str", BuiltinFunction::Str),
        ("bool", BuiltinFunction::Bool),
        ("repr", BuiltinFunction::Repr),
        ("ord", BuiltinFunction::Ord),
        ("chr", BuiltinFunction::Chr),
        ("round", BuiltinFunction::Round),
        ("hash", BuiltinFunction::Hash),
        ("isinstance", BuiltinFunction::Isinstance),
        ("print", BuiltinFunction::Print),
        ("input", BuiltinFunction::Input),
        ("range", BuiltinFunction::Range),
        ("list", BuiltinFunction::List),
        ("tuple", BuiltinFunction::Tuple),
        ("set", BuiltinFunction::Set),
        ("dict", BuiltinFunction::Dict),
        ("sorted", BuiltinFunction::Sorted),
        ("reversed", BuiltinFunction::Reversed),
        ("enumerate", BuiltinFunction::Enumerate),
        ("zip", BuiltinFunction::Zip),
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::TABLE.iter().find(|(n, _)| *n == name).map(|(_, f)| *f)
    }

    pub fn name(&self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(_, f)| f == self)
            .map(|(n, _)| *n)
            .unwrap_or("?")
    }

    /// Effects of calling this builtin with `argc` positional arguments.
    pub fn effects(&self, argc: usize) -> Vec<Effect> {
        use BuiltinFunction as F;
        use BuiltinType as B;
        match self {
            F::Len | F::Hash | F::Ord | F::Int => vec![Effect::returns(B::Int)],
            F::Round if argc >= 2 => vec![Effect::returns(B::Float)],
            F::Round => vec![Effect::returns(B::Int)],
            F::Float => vec![Effect::returns(B::Float)],
            F::Str | F::Repr | F::Chr | F::Input => vec![Effect::returns(B::Str)],
            F::Bool | F::Isinstance => vec![Effect::returns(B::Bool)],
            F::Print => vec![Effect::returns(B::None)],
            F::Abs => vec![Effect::ReturnsNumeric(Source::Arg(0))],
            F::Min | F::Max if argc == 1 => vec![Effect::Returns(Source::Elements(0))],
            F::Min | F::Max => (0..argc).map(|i| Effect::Returns(Source::Arg(i))).collect(),
            F::Sum => {
                let mut effects = vec![Effect::ReturnsNumeric(Source::Elements(0))];
                if argc >= 2 {
                    effects.push(Effect::Returns(Source::Arg(1)));
                }
                effects
            }
            F::Range => vec![Effect::produce(ContainerKind::List, vec![(Slot::Elem, Source::Builtin(B::Int))])],
            F::List | F::Sorted | F::Reversed => {
                Effect::produce_from_iterable(ContainerKind::List, argc)
            }
            F::Tuple => Effect::produce_from_iterable(ContainerKind::Tuple, argc),
            F::Set => Effect::produce_from_iterable(ContainerKind::Set, argc),
            F::Dict if argc == 0 => vec![Effect::produce(ContainerKind::Dict, vec![])],
            F::Dict => vec![Effect::DictFrom(0)],
            F::Enumerate => vec![Effect::ProducePairs(vec![Source::Builtin(B::Int), Source::Elements(0)])],
            F::Zip => vec![Effect::ProducePairs((0..argc).map(Source::Elements).collect())],
        }
    }
}

/// Where a flow of types comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Builtin(BuiltinType),
    /// Types of argument `i`.
    Arg(usize),
    /// What iterating argument `i` yields.
    Elements(usize),
    /// The receiver's own type.
    Receiver,
    /// A storage slot of the receiver.
    ReceiverUnit(Slot),
    /// What iterating the receiver yields.
    ReceiverElements,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The call's result receives the source.
    Returns(Source),
    /// Like `Returns`, with bools promoted to int.
    ReturnsNumeric(Source),
    /// A slot of the receiver receives the source.
    Store(Slot, Source),
    /// Copy every slot of argument `i` into the matching receiver slot.
    MergeUnits(usize),
    /// The result is the call site's container; its slots receive the
    /// listed sources.
    Produce {
        kind: ContainerKind,
        fill: Vec<(Slot, Source)>,
    },
    /// The result is the call site's list of depth-1 tuples whose
    /// positions receive the listed sources.
    ProducePairs(Vec<Source>),
    /// `dict(x)`: copy a dict, or build one from a sequence of pairs.
    DictFrom(usize),
}

impl Effect {
    fn returns(b: BuiltinType) -> Self {
        Effect::Returns(Source::Builtin(b))
    }

    fn produce(kind: ContainerKind, fill: Vec<(Slot, Source)>) -> Self {
        Effect::Produce { kind, fill }
    }

    fn produce_from_iterable(kind: ContainerKind, argc: usize) -> Vec<Effect> {
        let fill = if argc == 0 { vec![] } else { vec![(Slot::Elem, Source::Elements(0))] };
        vec![Effect::produce(kind, fill)]
    }
}

/// Receiver categories for builtin methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Receiver {
    Str,
    Container(ContainerKind),
}

/// Effects of `receiver.name(...)`, or `None` when the method is unknown.
pub fn method_effects(receiver: Receiver, name: &str, argc: usize) -> Option<Vec<Effect>> {
    use BuiltinType as B;
    use ContainerKind as K;
    let returns = |b| vec![Effect::returns(b)];
    let effects = match (receiver, name) {
        (Receiver::Str, "upper" | "lower" | "strip" | "lstrip" | "rstrip" | "replace" | "join" | "capitalize"
            | "title" | "format" | "zfill" | "ljust" | "rjust" | "center" | "swapcase") => returns(B::Str),
        (Receiver::Str, "split" | "splitlines" | "rsplit") => {
            vec![Effect::produce(K::List, vec![(Slot::Elem, Source::Builtin(B::Str))])]
        }
        (Receiver::Str, "find" | "rfind" | "index" | "rindex" | "count") => returns(B::Int),
        (Receiver::Str, "startswith" | "endswith" | "isdigit" | "isalpha" | "isalnum" | "isspace"
            | "isupper" | "islower") => returns(B::Bool),

        (Receiver::Container(K::List), "append") => vec![Effect::Store(Slot::Elem, Source::Arg(0)), Effect::returns(B::None)],
        (Receiver::Container(K::List), "insert") => vec![Effect::Store(Slot::Elem, Source::Arg(1)), Effect::returns(B::None)],
        (Receiver::Container(K::List), "extend") => {
            vec![Effect::Store(Slot::Elem, Source::Elements(0)), Effect::returns(B::None)]
        }
        (Receiver::Container(K::List), "pop") => vec![Effect::Returns(Source::ReceiverUnit(Slot::Elem))],
        (Receiver::Container(K::List), "remove" | "sort" | "reverse" | "clear") => returns(B::None),
        (Receiver::Container(K::List), "copy") => vec![Effect::Returns(Source::Receiver)],
        (Receiver::Container(K::List | K::Tuple), "index" | "count") => returns(B::Int),

        (Receiver::Container(K::Dict), "get") => {
            let mut effects = vec![Effect::Returns(Source::ReceiverUnit(Slot::Value))];
            if argc >= 2 {
                effects.push(Effect::Returns(Source::Arg(1)));
            } else {
                effects.push(Effect::returns(B::None));
            }
            effects
        }
        (Receiver::Container(K::Dict), "setdefault") => vec![
            Effect::Store(Slot::Elem, Source::Arg(0)),
            Effect::Store(Slot::Value, Source::Arg(1)),
            Effect::Returns(Source::ReceiverUnit(Slot::Value)),
        ],
        (Receiver::Container(K::Dict), "pop") => vec![Effect::Returns(Source::ReceiverUnit(Slot::Value))],
        (Receiver::Container(K::Dict), "keys") => {
            vec![Effect::produce(K::List, vec![(Slot::Elem, Source::ReceiverUnit(Slot::Elem))])]
        }
        (Receiver::Container(K::Dict), "values") => {
            vec![Effect::produce(K::List, vec![(Slot::Elem, Source::ReceiverUnit(Slot::Value))])]
        }
        (Receiver::Container(K::Dict), "items") => vec![Effect::ProducePairs(vec![
            Source::ReceiverUnit(Slot::Elem),
            Source::ReceiverUnit(Slot::Value),
        ])],
        (Receiver::Container(K::Dict), "update") => vec![Effect::MergeUnits(0), Effect::returns(B::None)],
        (Receiver::Container(K::Dict | K::Set), "clear") => returns(B::None),
        (Receiver::Container(K::Dict | K::Set), "copy") => vec![Effect::Returns(Source::Receiver)],

        (Receiver::Container(K::Set), "add") => vec![Effect::Store(Slot::Elem, Source::Arg(0)), Effect::returns(B::None)],
        (Receiver::Container(K::Set), "update") => {
            vec![Effect::Store(Slot::Elem, Source::Elements(0)), Effect::returns(B::None)]
        }
        (Receiver::Container(K::Set), "remove" | "discard") => returns(B::None),
        (Receiver::Container(K::Set), "pop") => vec![Effect::Returns(Source::ReceiverElements)],
        (Receiver::Container(K::Set), "union" | "intersection" | "difference" | "symmetric_difference") => {
            vec![Effect::Returns(Source::Receiver), Effect::Store(Slot::Elem, Source::Elements(0))]
        }
        (Receiver::Container(K::Set), "issubset" | "issuperset" | "isdisjoint") => returns(B::Bool),
        _ => return None,
    };
    Some(effects)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_roundtrip() {
        for (name, f) in BuiltinFunction::TABLE {
            assert_eq!(BuiltinFunction::from_name(name), Some(f));
            assert_eq!(f.name(), name);
        }
        assert_eq!(BuiltinFunction::from_name("eval"), None);
    }

    #[test]
    fn test_min_max_arity() {
        assert_eq!(
            BuiltinFunction::Max.effects(1),
            vec![Effect::Returns(Source::Elements(0))]
        );
        assert_eq!(BuiltinFunction::Min.effects(3).len(), 3);
    }

    #[test]
    fn test_unknown_method() {
        assert!(method_effects(Receiver::Str, "decode", 0).is_none());
        assert!(method_effects(Receiver::Container(ContainerKind::Tuple), "append", 1).is_none());
        assert!(method_effects(Receiver::Container(ContainerKind::List), "append", 1).is_some());
    }
}
