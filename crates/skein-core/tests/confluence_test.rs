//! The merged type map must not depend on the order the worklist is
//! drained in.

use proptest::prelude::*;
use skein_core::{CompilerOptions, InferenceConfig, SkeinPipeline, WorklistOrder};

const FRAGMENTS: &[&str] = &[
    "def ident(v):\n    return v\n",
    "def add(a, b):\n    return a + b\n",
    "x1 = add(1, 2.5)\n",
    "x2 = ident([1, 2])\n",
    "class P:\n    def __init__(self, v):\n        self.v = v\n    def get(self):\n        return self.v\n",
    "p = P(ident(3))\nq = p.get()\n",
    "xs = []\nxs.append(ident('s'))\nfor e in xs:\n    y = e + 's'\n",
    "d = {}\nd['k'] = add(1, 1)\n",
    "def fact(n):\n    if n <= 1:\n        return 1\n    return n * fact(n - 1)\nf = fact(5)\n",
    "pairs = list(enumerate(['a', 'b']))\nfor i, s in pairs:\n    z = i\n",
    "w = ident(ident(ident(2.0)))\n",
    "t = (1, 'one')\nk, l = t\nm = add(k, k)\n",
];

fn run(source: &str, order: WorklistOrder) -> skein_core::Analyzed {
    let options = CompilerOptions {
        inference: InferenceConfig::default().with_order(order),
        ..CompilerOptions::default()
    };
    SkeinPipeline::new(options).analyze_source("generated", source).unwrap()
}

fn program_strategy() -> impl Strategy<Value = String> {
    proptest::sample::subsequence(FRAGMENTS.to_vec(), 1..=FRAGMENTS.len())
        .prop_shuffle()
        .prop_map(|parts| parts.concat())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_merged_map_is_order_independent(source in program_strategy()) {
        let fifo = run(&source, WorklistOrder::Fifo);
        let lifo = run(&source, WorklistOrder::Lifo);
        prop_assert_eq!(&fifo.result.merged, &lifo.result.merged);
        prop_assert_eq!(fifo.diagnostics(), lifo.diagnostics());
    }

    #[test]
    fn prop_stable_sets_only_grow(source in program_strategy()) {
        let a = run(&source, WorklistOrder::Lifo);
        for node in a.result.nodes.iter() {
            prop_assert!(node.types.len() >= node.stable_len);
        }
        prop_assert!(a.result.contexts.all_stable());
    }
}

#[test]
fn test_all_fragments_together() {
    let source = FRAGMENTS.concat();
    let fifo = run(&source, WorklistOrder::Fifo);
    let lifo = run(&source, WorklistOrder::Lifo);
    assert_eq!(fifo.result.merged, lifo.result.merged);
    assert_eq!(fifo.describe_global("x1").as_deref(), Some("float"));
    assert_eq!(fifo.describe_global("q").as_deref(), Some("int"));
    assert_eq!(fifo.describe_global("w").as_deref(), Some("float"));
}
