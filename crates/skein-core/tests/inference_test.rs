use skein_core::hir::{stmt_exprs, walk_block, ExprKind, HirExpr};
use skein_core::infer::NodeKey;
use skein_core::program::Function;
use skein_core::types::{BuiltinType, TypeId, TypeSet};
use skein_core::{Analyzed, CompilerOptions, DiagnosticKind, InferenceConfig, Program, SkeinPipeline};

fn analyze(python: &str) -> Analyzed {
    analyze_with(python, InferenceConfig::default())
}

fn analyze_with(python: &str, inference: InferenceConfig) -> Analyzed {
    let options = CompilerOptions {
        inference,
        ..CompilerOptions::default()
    };
    SkeinPipeline::new(options).analyze_source("demo", python).unwrap()
}

fn function<'a>(program: &'a Program, name: &str) -> &'a Function {
    program
        .functions
        .iter()
        .find(|f| f.name == name && !f.inherited)
        .unwrap_or_else(|| panic!("no function {name}"))
}

fn exprs_of(f: &Function) -> Vec<&HirExpr> {
    let mut out = Vec::new();
    walk_block(&f.def.body, &mut |stmt| stmt_exprs(stmt, &mut |e| out.push(e)));
    out
}

fn builtin(program: &Program, b: BuiltinType) -> TypeId {
    program.universe.builtin(b)
}

fn set(types: &[TypeId]) -> TypeSet {
    types.iter().copied().collect()
}

// ============================================================================
// Variants
// ============================================================================

#[test]
fn test_identical_signatures_share_one_variant() {
    let a = analyze(
        r#"
def inc(argument):
    return argument + 1

a = inc(1)
b = inc(2)
"#,
    );
    let program = &a.program;
    let inc = function(program, "inc");
    let int = builtin(program, BuiltinType::Int);

    let variants = a.result.variants(inc.id);
    assert_eq!(variants.len(), 1);
    assert_eq!(a.result.param_types(program, inc.id, variants[0], 0), set(&[int]));
    assert_eq!(a.result.return_types(variants[0]), set(&[int]));
    assert_eq!(a.describe_global("b").as_deref(), Some("int"));
}

#[test]
fn test_distinct_signatures_get_their_own_variants() {
    let a = analyze(
        r#"
def inc(argument):
    return argument + 1

a = inc(1)
b = inc(1.5)
"#,
    );
    let program = &a.program;
    let inc = function(program, "inc");
    let int = builtin(program, BuiltinType::Int);
    let float = builtin(program, BuiltinType::Float);

    let variants = a.result.variants(inc.id);
    assert_eq!(variants.len(), 2);
    assert_eq!(a.result.return_types(variants[0]), set(&[int]));
    assert_eq!(a.result.return_types(variants[1]), set(&[float]));

    let sum = exprs_of(inc)
        .into_iter()
        .find(|e| matches!(e.kind, ExprKind::Binary { .. }))
        .unwrap();
    assert_eq!(a.result.merged.expr(sum.id), Some(&set(&[int, float])));
    assert_eq!(a.describe_global("a").as_deref(), Some("int"));
    assert_eq!(a.describe_global("b").as_deref(), Some("float"));
}

#[test]
fn test_unassigned_argument_leaves_parameter_empty() {
    let a = analyze(
        r#"
def show(value):
    return value

show(missing)
"#,
    );
    let program = &a.program;
    let show = function(program, "show");
    let formal = show.formal_var(0).unwrap();
    assert!(a.result.merged.var(formal).map_or(true, TypeSet::is_empty));

    let kinds: Vec<DiagnosticKind> = a.diagnostics().iter().map(|d| d.kind).collect();
    assert!(kinds.contains(&DiagnosticKind::UnresolvedParameterType));
    assert!(kinds.contains(&DiagnosticKind::UnresolvedName));
    assert!(!a.result.stats.interrupted);
}

#[test]
fn test_late_argument_types_do_not_leave_an_empty_variant() {
    let a = analyze(
        r#"
def five():
    return 5

def keep(v):
    return v

a = keep(five())
"#,
    );
    let program = &a.program;
    let keep = function(program, "keep");
    let int = builtin(program, BuiltinType::Int);

    let variants = a.result.variants(keep.id);
    assert_eq!(variants.len(), 1);
    assert_eq!(a.result.param_types(program, keep.id, variants[0], 0), set(&[int]));
    assert!(a.result.diagnostics.of_kind(DiagnosticKind::UnresolvedParameterType).is_empty());
}

#[test]
fn test_argument_filled_by_another_deferred_call_gets_one_variant() {
    let a = analyze(
        r#"
def mk(v):
    return 1

def use(w):
    return w

a = mk(missing)
b = use(a)
"#,
    );
    let program = &a.program;
    let use_fn = function(program, "use");
    let int = builtin(program, BuiltinType::Int);

    let variants = a.result.variants(use_fn.id);
    assert_eq!(variants.len(), 1);
    assert_eq!(a.result.param_types(program, use_fn.id, variants[0], 0), set(&[int]));
    assert_eq!(a.describe_global("b").as_deref(), Some("int"));

    let unresolved = a.result.diagnostics.of_kind(DiagnosticKind::UnresolvedParameterType);
    assert_eq!(unresolved.len(), 1);
    assert!(unresolved[0].message.contains("'v' of 'mk'"));
}

#[test]
fn test_variant_cap_folds_into_fallback() {
    let a = analyze_with(
        r#"
def ident(v):
    return v

a = ident(1)
b = ident("s")
c = ident(2.0)
"#,
        InferenceConfig::default().with_max_variants(1),
    );
    let program = &a.program;
    let ident = function(program, "ident");

    let variants = a.result.variants(ident.id);
    assert_eq!(variants.len(), 2);
    let fallback = *variants.last().unwrap();
    assert!(a.result.contexts.get(fallback).fallback);
    let str_ty = builtin(program, BuiltinType::Str);
    let float = builtin(program, BuiltinType::Float);
    assert_eq!(a.result.return_types(fallback), set(&[float, str_ty]));
    assert_eq!(a.result.diagnostics.of_kind(DiagnosticKind::VariantCapExceeded).len(), 1);
    assert_eq!(a.describe_global("a").as_deref(), Some("int"));
}

#[test]
fn test_recursion_reaches_fixpoint() {
    let a = analyze(
        r#"
def fact(n):
    if n <= 1:
        return 1
    return n * fact(n - 1)

f = fact(10)
"#,
    );
    assert_eq!(a.describe_global("f").as_deref(), Some("int"));
    let fact = function(&a.program, "fact");
    assert_eq!(a.result.variants(fact.id).len(), 1);
    assert!(a.diagnostics().is_empty(), "{:?}", a.diagnostics());
}

#[test]
fn test_keyword_and_default_arguments() {
    let a = analyze(
        r#"
def scale(value, factor=2):
    return value * factor

a = scale(3)
b = scale(value=1.5, factor=2)
"#,
    );
    assert_eq!(a.describe_global("a").as_deref(), Some("int"));
    assert_eq!(a.describe_global("b").as_deref(), Some("float"));
}

#[test]
fn test_argument_mismatch_is_a_warning() {
    let a = analyze(
        r#"
def one(x):
    return x

y = one(1, 2)
"#,
    );
    let mismatches = a.result.diagnostics.of_kind(DiagnosticKind::ArgumentMismatch);
    assert_eq!(mismatches.len(), 1);
    assert!(mismatches[0].message.contains("takes 1 arguments"));
}

// ============================================================================
// Classes
// ============================================================================

#[test]
fn test_inherited_attribute_access_sees_subclass_types() {
    let python = r#"
class A:
    def __init__(self):
        self.x = 1

class B(A):
    def __init__(self):
        self.x = "b"

def get(a):
    return a.x

r = get(A())
B()
"#;
    let a = analyze(python);
    let program = &a.program;
    let int = builtin(program, BuiltinType::Int);
    let str_ty = builtin(program, BuiltinType::Str);

    let access = exprs_of(function(program, "get"))
        .into_iter()
        .find(|e| matches!(&e.kind, ExprKind::Attribute { attr, .. } if attr == "x"))
        .unwrap();
    assert_eq!(a.result.merged.expr(access.id), Some(&set(&[int, str_ty])));

    let flat = a.result.merge(program, false).unwrap();
    assert_eq!(flat.expr(access.id), Some(&set(&[int])));
}

#[test]
fn test_methods_and_instance_attributes() {
    let a = analyze(
        r#"
class Point:
    def __init__(self, x, y):
        self.x = x
        self.y = y

    def norm(self):
        return self.x * self.x + self.y * self.y

p = Point(3, 4.0)
n = p.norm()
"#,
    );
    let program = &a.program;
    assert_eq!(a.describe_global("p").as_deref(), Some("Point"));
    assert_eq!(a.describe_global("n").as_deref(), Some("float"));
    let point = program.classes.iter().find(|c| c.name == "Point").unwrap();
    let x = point.vars["x"];
    let int = builtin(program, BuiltinType::Int);
    assert_eq!(a.result.merged.var(x), Some(&set(&[int])));
}

#[test]
fn test_inherited_method_runs_on_subclass() {
    let a = analyze(
        r#"
class Base:
    def name(self):
        return "base"

class Child(Base):
    pass

s = Child().name()
"#,
    );
    assert_eq!(a.describe_global("s").as_deref(), Some("str"));
    let copies: Vec<_> = a.program.functions.iter().filter(|f| f.inherited).collect();
    assert_eq!(copies.len(), 1);
}

#[test]
fn test_missing_method_is_reported() {
    let a = analyze(
        r#"
class Empty:
    pass

e = Empty()
e.run()
"#,
    );
    let warnings = a.result.diagnostics.of_kind(DiagnosticKind::UnresolvedAttribute);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].message.contains("'Empty' has no method 'run'"));
}

// ============================================================================
// Containers
// ============================================================================

#[test]
fn test_list_elements_follow_appends() {
    let a = analyze(
        r#"
xs = []
xs.append(1)
xs.append(2.5)
total = 0
for x in xs:
    total = total + x
"#,
    );
    assert_eq!(a.describe_global("xs").as_deref(), Some("list(int | float)"));
    assert_eq!(a.describe_global("x").as_deref(), Some("int | float"));
    assert_eq!(a.describe_global("total").as_deref(), Some("int | float"));
}

#[test]
fn test_dict_and_tuple_displays() {
    let a = analyze(
        r#"
d = {"a": 1}
v = d["a"]
t = (1, "x")
first, second = t
"#,
    );
    assert_eq!(a.describe_global("d").as_deref(), Some("dict(str, int)"));
    assert_eq!(a.describe_global("v").as_deref(), Some("int"));
    assert_eq!(a.describe_global("t").as_deref(), Some("tuple(int, str)"));
    assert_eq!(a.describe_global("first").as_deref(), Some("int"));
    assert_eq!(a.describe_global("second").as_deref(), Some("str"));
}

#[test]
fn test_enumerate_yields_index_and_element() {
    let a = analyze(
        r#"
names = ["a", "b"]
for i, name in enumerate(names):
    pass
"#,
    );
    assert_eq!(a.describe_global("i").as_deref(), Some("int"));
    assert_eq!(a.describe_global("name").as_deref(), Some("str"));
}

#[test]
fn test_list_comprehension() {
    let a = analyze(
        r#"
squares = [n * n for n in range(10)]
"#,
    );
    assert_eq!(a.describe_global("squares").as_deref(), Some("list(int)"));
}

// ============================================================================
// Operators and diagnostics
// ============================================================================

#[test]
fn test_numeric_widening_and_division() {
    let a = analyze(
        r#"
a = True + True
b = 1 + 2.0
c = 4 / 2
s = "x" * 3
"#,
    );
    assert_eq!(a.describe_global("a").as_deref(), Some("int"));
    assert_eq!(a.describe_global("b").as_deref(), Some("float"));
    assert_eq!(a.describe_global("c").as_deref(), Some("float"));
    assert_eq!(a.describe_global("s").as_deref(), Some("str"));
}

#[test]
fn test_unsupported_operands_warn() {
    let a = analyze("x = 1 + \"a\"\n");
    assert_eq!(a.result.diagnostics.of_kind(DiagnosticKind::UnsupportedOperands).len(), 1);
    assert_eq!(a.describe_global("x"), None);
}

#[test]
fn test_unsupported_construct_does_not_abort() {
    let a = analyze(
        r#"
f = lambda v: v
y = 3
"#,
    );
    assert!(!a.result.diagnostics.of_kind(DiagnosticKind::UnsupportedConstruct).is_empty());
    assert_eq!(a.describe_global("y").as_deref(), Some("int"));
}

#[test]
fn test_round_limit_interrupts_with_partial_results() {
    let a = analyze_with(
        r#"
def ident(v):
    return v

y = ident(1)
z = 2
"#,
        InferenceConfig::default().with_round_limit(0),
    );
    assert!(a.result.stats.interrupted);
    assert_eq!(a.result.diagnostics.of_kind(DiagnosticKind::Interrupted).len(), 1);
    assert_eq!(a.describe_global("z").as_deref(), Some("int"));
}

#[test]
fn test_merge_is_idempotent() {
    let a = analyze(
        r#"
class Node:
    def __init__(self, value):
        self.value = value
        self.next = None

n = Node(1)
n.next = Node(2.0)
"#,
    );
    let once = a.result.merge(&a.program, true).unwrap();
    let twice = a.result.merge(&a.program, true).unwrap();
    assert_eq!(once, twice);
    assert_eq!(once, a.result.merged);
}

#[test]
fn test_every_context_holds_only_its_own_nodes() {
    let a = analyze(
        r#"
def pair(a, b):
    return (a, b)

p = pair(1, "x")
q = pair(2.0, None)
"#,
    );
    for node in a.result.nodes.iter() {
        if let NodeKey::Expr(_, ctx) | NodeKey::Var(_, ctx) | NodeKey::Return(ctx) = node.key {
            assert!((ctx.0 as usize) < a.result.contexts.len());
        }
    }
    let pair = function(&a.program, "pair");
    assert_eq!(a.result.variants(pair.id).len(), 2);
}
