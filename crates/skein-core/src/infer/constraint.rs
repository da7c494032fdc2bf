//! Constraints attached to the flow graph
//!
//! Plain assignments are edges. Everything else is a constraint:
//! transfers (operators) are re-evaluated as soon as an operand grows,
//! structural constraints (calls, attribute and subscript access,
//! iteration, unpacking) only at quiescence points, in creation order.

use super::builtins::BuiltinFunction;
use super::context::{ContextId, Signature};
use super::node::NodeId;
use crate::hir::{BinOp, ExprId, UnaryOp};
use crate::program::{ClassId, FuncId, ModuleId};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u32);

#[derive(Debug, Clone)]
pub enum TransferKind {
    Binary {
        op: BinOp,
        left: NodeId,
        right: NodeId,
        /// Expression that owns the concatenation container identity.
        site: ExprId,
    },
    Unary {
        op: UnaryOp,
        operand: NodeId,
    },
}

#[derive(Debug, Clone)]
pub struct Transfer {
    pub kind: TransferKind,
    pub out: NodeId,
    pub module: ModuleId,
    pub line: usize,
}

impl Transfer {
    pub fn inputs(&self) -> Vec<NodeId> {
        match &self.kind {
            TransferKind::Binary { left, right, .. } => vec![*left, *right],
            TransferKind::Unary { operand, .. } => vec![*operand],
        }
    }
}

/// A resolved callee of a call site.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CallTarget {
    Variant(ContextId),
    Builtin(String),
}

/// Grows from `Unresolved` to an ever larger set of targets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CallState {
    #[default]
    Unresolved,
    Resolved(BTreeSet<CallTarget>),
}

impl CallState {
    pub fn add(&mut self, target: CallTarget) -> bool {
        match self {
            CallState::Unresolved => {
                *self = CallState::Resolved(BTreeSet::from([target]));
                true
            }
            CallState::Resolved(targets) => targets.insert(target),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, CallState::Resolved(_))
    }

    pub fn variants(&self) -> Vec<ContextId> {
        match self {
            CallState::Unresolved => Vec::new(),
            CallState::Resolved(targets) => targets
                .iter()
                .filter_map(|t| match t {
                    CallTarget::Variant(c) => Some(*c),
                    CallTarget::Builtin(_) => None,
                })
                .collect(),
        }
    }
}

/// What a call expression calls, as far as the builder could tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Callee {
    Function(FuncId),
    Construct(ClassId),
    Builtin(BuiltinFunction),
    Method { receiver: NodeId, name: String },
    /// Callee expression the engine cannot model (a variable, a call
    /// result, an unknown name).
    Unknown(String),
}

#[derive(Debug, Clone)]
pub struct CallSite {
    pub expr: ExprId,
    /// Callee as written, for diagnostics.
    pub name: String,
    pub callee: Callee,
    pub args: Vec<NodeId>,
    pub keywords: Vec<(String, NodeId)>,
    pub out: NodeId,
    pub state: CallState,
    /// Signatures already routed, per target function.
    pub routed: HashSet<(FuncId, Signature)>,
    /// Some signature with an empty component is waiting for the deferred
    /// phase.
    pub deferred: bool,
    pub mismatch: Option<String>,
    /// Receiver types that have no such method.
    pub missing_method: BTreeSet<String>,
}

impl CallSite {
    pub fn new(
        expr: ExprId,
        name: String,
        callee: Callee,
        args: Vec<NodeId>,
        keywords: Vec<(String, NodeId)>,
        out: NodeId,
    ) -> Self {
        Self {
            expr,
            name,
            callee,
            args,
            keywords,
            out,
            state: CallState::Unresolved,
            routed: HashSet::new(),
            deferred: false,
            mismatch: None,
            missing_method: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum StructuralKind {
    Call(Box<CallSite>),
    GetAttr {
        receiver: NodeId,
        attr: String,
        out: NodeId,
    },
    SetAttr {
        receiver: NodeId,
        attr: String,
        value: NodeId,
    },
    Subscript {
        base: NodeId,
        index: NodeId,
        literal: Option<i64>,
        slice: bool,
        out: NodeId,
    },
    StoreSubscript {
        base: NodeId,
        index: NodeId,
        value: NodeId,
    },
    Iterate {
        iterable: NodeId,
        out: NodeId,
    },
    Unpack {
        source: NodeId,
        targets: Vec<NodeId>,
    },
}

#[derive(Debug, Clone)]
pub struct Structural {
    pub kind: StructuralKind,
    pub context: ContextId,
    pub module: ModuleId,
    pub line: usize,
    /// Input set sizes when last resolved; unchanged sizes mean nothing new
    /// to do since sets only grow.
    pub stamp: Option<Vec<usize>>,
}

impl Structural {
    pub fn new(kind: StructuralKind, context: ContextId, module: ModuleId, line: usize) -> Self {
        Self {
            kind,
            context,
            module,
            line,
            stamp: None,
        }
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        match &self.kind {
            StructuralKind::Call(call) => {
                let mut inputs = call.args.clone();
                inputs.extend(call.keywords.iter().map(|(_, n)| *n));
                if let Callee::Method { receiver, .. } = &call.callee {
                    inputs.push(*receiver);
                }
                inputs
            }
            StructuralKind::GetAttr { receiver, .. } | StructuralKind::SetAttr { receiver, .. } => vec![*receiver],
            StructuralKind::Subscript { base, .. } => vec![*base],
            StructuralKind::StoreSubscript { base, .. } => vec![*base],
            StructuralKind::Iterate { iterable, .. } => vec![*iterable],
            StructuralKind::Unpack { source, .. } => vec![*source],
        }
    }

    pub fn as_call(&self) -> Option<&CallSite> {
        match &self.kind {
            StructuralKind::Call(call) => Some(call),
            _ => None,
        }
    }
}

/// All constraints of one analysis run.
#[derive(Debug, Default, Clone)]
pub struct ConstraintTable {
    pub transfers: Vec<Transfer>,
    /// Transfers to re-evaluate when a node grows.
    pub dependents: HashMap<NodeId, Vec<TransferId>>,
    pub structural: Vec<Structural>,
}

impl ConstraintTable {
    pub fn add_transfer(&mut self, transfer: Transfer) -> TransferId {
        let id = TransferId(self.transfers.len() as u32);
        for input in transfer.inputs() {
            self.dependents.entry(input).or_default().push(id);
        }
        self.transfers.push(transfer);
        id
    }

    pub fn transfer(&self, id: TransferId) -> &Transfer {
        &self.transfers[id.0 as usize]
    }

    pub fn dependents_of(&self, node: NodeId) -> &[TransferId] {
        self.dependents.get(&node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn add_structural(&mut self, structural: Structural) {
        self.structural.push(structural);
    }

    pub fn calls(&self) -> impl Iterator<Item = (&Structural, &CallSite)> {
        self.structural.iter().filter_map(|s| s.as_call().map(|c| (s, c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_state_only_grows() {
        let mut state = CallState::default();
        assert!(!state.is_resolved());
        assert!(state.add(CallTarget::Variant(ContextId(3))));
        assert!(!state.add(CallTarget::Variant(ContextId(3))));
        assert!(state.add(CallTarget::Builtin("len".into())));
        assert_eq!(state.variants(), vec![ContextId(3)]);
    }
}
