//! Determinism, equivalence and sensitivity of fingerprints.

use std::sync::Arc;

use cairn_conformance::{penguins_schema, read, Harness, MemoryFrames};
use cairn_fingerprint::bind_table;
use cairn_ir::{BinaryOp, DataType, JoinKind, Namespace, NodeId, OpGraph, OpKind, ScalarValue, Schema};

fn heavy_filter(graph: &mut OpGraph, source: NodeId, threshold: i64) -> NodeId {
    let mass = graph.column(source, "body_mass_g").unwrap();
    let lit = graph.literal(ScalarValue::Int(threshold)).unwrap();
    let pred = graph.binary(BinaryOp::Gt, mass, lit).unwrap();
    graph.filter(source, vec![pred]).unwrap()
}

#[test]
fn same_inputs_same_token() {
    let h = Harness::new();
    h.fs.put("data/penguins.csv", 1_700_000_000, 4096);
    let mut graph = OpGraph::new();
    let r = read(&mut graph, "read_csv", "data/penguins.csv");
    let f = heavy_filter(&mut graph, r, 4000);

    let first = h.fingerprinter.fingerprint(&graph, f).unwrap();
    for _ in 0..5 {
        assert_eq!(h.fingerprinter.fingerprint(&graph, f).unwrap(), first);
    }
}

#[test]
fn separately_built_equal_graphs_agree() {
    let h = Harness::new();
    let build = |padding: usize| {
        let mut graph = OpGraph::new();
        // Unrelated nodes shift every id without changing the computation.
        for i in 0..padding {
            graph.literal(ScalarValue::Int(i as i64)).unwrap();
        }
        let t = graph.unbound_table("penguins", penguins_schema()).unwrap();
        let f = heavy_filter(&mut graph, t, 4000);
        let s = graph.select(f, &["species", "island"]).unwrap();
        (graph, s)
    };
    let (a, ra) = build(0);
    let (b, rb) = build(7);
    assert_ne!(ra, rb);
    assert_eq!(
        h.fingerprinter.fingerprint(&a, ra).unwrap(),
        h.fingerprinter.fingerprint(&b, rb).unwrap()
    );
}

#[test]
fn changed_literal_changes_token() {
    let h = Harness::new();
    let mut graph = OpGraph::new();
    let t = graph.unbound_table("penguins", penguins_schema()).unwrap();
    let light = heavy_filter(&mut graph, t, 3000);
    let heavy = heavy_filter(&mut graph, t, 4000);
    assert_ne!(
        h.fingerprinter.fingerprint(&graph, light).unwrap(),
        h.fingerprinter.fingerprint(&graph, heavy).unwrap()
    );
}

#[test]
fn disjoint_source_change_leaves_token_alone() {
    let h = Harness::new();
    h.fs.put("data/penguins.csv", 100, 10);
    h.fs.put("data/islands.csv", 100, 10);
    let mut graph = OpGraph::new();
    let penguins = read(&mut graph, "read_csv", "data/penguins.csv");
    let islands = read(&mut graph, "read_csv", "data/islands.csv");
    let a = heavy_filter(&mut graph, penguins, 4000);
    let b = heavy_filter(&mut graph, islands, 4000);

    let before_a = h.fingerprinter.fingerprint(&graph, a).unwrap();
    let before_b = h.fingerprinter.fingerprint(&graph, b).unwrap();
    h.fs.touch("data/islands.csv");
    assert_eq!(h.fingerprinter.fingerprint(&graph, a).unwrap(), before_a);
    assert_ne!(h.fingerprinter.fingerprint(&graph, b).unwrap(), before_b);
}

#[test]
fn repeated_read_counts_once() {
    let h = Harness::new();
    h.fs.put("data/penguins.csv", 100, 10);
    let mut graph = OpGraph::new();
    let r1 = read(&mut graph, "read_csv", "data/penguins.csv");
    let r2 = read(&mut graph, "read_csv", "data/penguins.csv");
    let union = graph
        .add(OpKind::Union {
            left: r1,
            right: r2,
            distinct: false,
        })
        .unwrap();
    let shared = graph
        .add(OpKind::Union {
            left: r1,
            right: r1,
            distinct: false,
        })
        .unwrap();
    assert_eq!(
        h.fingerprinter.fingerprint(&graph, union).unwrap(),
        h.fingerprinter.fingerprint(&graph, shared).unwrap()
    );
    assert_eq!(h.fs.stat_calls(), 2);
}

#[test]
fn shared_and_copied_backend_tables_agree() {
    let frames = Arc::new(MemoryFrames::new(7));
    frames.create("penguins", penguins_schema());
    frames.append("penguins", "Adelie,Torgersen,3750");
    let h = Harness::with_connectors(vec![frames.clone()]);
    let mut graph = OpGraph::new();
    let t1 = bind_table(&mut graph, frames.as_ref(), "penguins", Namespace::default()).unwrap();
    let t2 = bind_table(&mut graph, frames.as_ref(), "penguins", Namespace::default()).unwrap();
    let union = |graph: &mut OpGraph, left, right| {
        graph
            .add(OpKind::Union {
                left,
                right,
                distinct: false,
            })
            .unwrap()
    };
    let shared = union(&mut graph, t1, t1);
    let copied = union(&mut graph, t1, t2);

    let token = h.fingerprinter.fingerprint(&graph, shared).unwrap();
    assert_eq!(frames.batch_calls(), 1);
    assert_eq!(h.fingerprinter.fingerprint(&graph, copied).unwrap(), token);
    assert_eq!(frames.batch_calls(), 2);
}

fn emp_semi_join(graph: &mut OpGraph, left_is_manager: bool) -> NodeId {
    let schema = Schema::from_pairs([("id", DataType::Int64), ("mgr", DataType::Int64)]).unwrap();
    let a = graph.unbound_table("emp", schema.clone()).unwrap();
    let b = graph.unbound_table("emp", schema).unwrap();
    let (mgr, id) = if left_is_manager {
        (graph.column(b, "mgr").unwrap(), graph.column(a, "id").unwrap())
    } else {
        (graph.column(a, "mgr").unwrap(), graph.column(b, "id").unwrap())
    };
    let pred = graph.binary(BinaryOp::Eq, mgr, id).unwrap();
    graph
        .add(OpKind::Join {
            kind: JoinKind::Semi,
            left: a,
            right: b,
            predicates: vec![pred],
        })
        .unwrap()
}

#[test]
fn self_join_direction_changes_token() {
    let h = Harness::new();
    let mut graph = OpGraph::new();
    let has_manager = emp_semi_join(&mut graph, false);
    let is_manager = emp_semi_join(&mut graph, true);
    assert_ne!(
        h.fingerprinter.fingerprint(&graph, has_manager).unwrap(),
        h.fingerprinter.fingerprint(&graph, is_manager).unwrap()
    );
}

#[test]
fn self_contained_plan_never_probes() {
    let h = Harness::new();
    let mut graph = OpGraph::new();
    let t = graph.unbound_table("penguins", penguins_schema()).unwrap();
    let f = heavy_filter(&mut graph, t, 4000);
    h.fingerprinter.fingerprint(&graph, f).unwrap();
    assert_eq!(h.fs.stat_calls(), 0);
}

#[test]
fn batch_results_match_single_calls() {
    let h = Harness::new();
    h.fs.put("data/penguins.csv", 100, 10);
    let mut graph = OpGraph::new();
    let r = read(&mut graph, "read_csv", "data/penguins.csv");
    let a = heavy_filter(&mut graph, r, 3000);
    let b = heavy_filter(&mut graph, r, 4000);
    let missing = read(&mut graph, "read_csv", "data/missing.csv");

    let all = h.fingerprinter.fingerprint_all(&graph, &[a, missing, b]);
    assert_eq!(all.len(), 3);
    assert_eq!(
        all[0].as_ref().unwrap(),
        &h.fingerprinter.fingerprint(&graph, a).unwrap()
    );
    assert!(all[1].as_ref().unwrap_err().is_transient());
    assert_eq!(
        all[2].as_ref().unwrap(),
        &h.fingerprinter.fingerprint(&graph, b).unwrap()
    );
}
