// Cert regression suite: every listing in the corpus must satisfy all
// stage certificates after every pass, and the boundary behaviors of
// the builder and linearizer must hold.

use std::path::{Path, PathBuf};

use rkb::graph::{verify_graph, AsmGraph};
use rkb::inst::Op;
use rkb::layout;
use rkb::linear::to_linear;
use rkb::listing::parse;
use rkb::locator::CfgId;
use rkb::maybe_store::{remove_maybes, verify_no_maybe_stores};
use rkb::optimize::optimize;
use rkb::pass::StageCert;

fn data_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/data")
}

const INLINE_CORPUS: &[&str] = &[
    // Branch immediately followed by its inverse folds into one node.
    "\
.fn main
.entry main

main:
    beq yes
    bne no
yes:
    lda #1
    rts
no:
    lda #2
    rts
",
    // Loop nest with a maybe-store on the exit path.
    "\
.fn main writes=total
.gmember total
.gmember i
.entry main

main:
    lda #0
    sta i
loop:
    inc total
    inc i
    lda i
    bne loop
    sta? total
    rts
",
    // Mode function call: precheck groups drive the read oracle.
    "\
.gmember flags group=io
.fn main
.fn blink mode groups=io
.entry main

main:
    sta flags
    jsr blink
    rts
",
];

fn run_all_passes(source: &str) {
    let result = parse(source);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let listing = result.listing.unwrap();
    let fun = listing.entry.fn_id().unwrap();

    let mut graph = AsmGraph::new(listing.entry);
    graph.append_code(&listing.code, &listing.registry).unwrap();
    graph.finish_appending().unwrap();
    let cert = verify_graph(&graph);
    assert!(cert.all_pass(), "after build: {:?}", cert.obligations());

    optimize(&mut graph);
    let cert = verify_graph(&graph);
    assert!(cert.all_pass(), "after optimize: {:?}", cert.obligations());

    let lvars = rkb::lvars::build_lvars(&graph, fun, &listing.registry);
    // The interference relation is symmetric.
    for (i, _) in lvars.map().iter() {
        for (j, _) in lvars.map().iter() {
            assert_eq!(lvars.interferes(i, j), lvars.interferes(j, i));
        }
    }

    remove_maybes(&mut graph, fun, &listing.registry);
    assert!(verify_no_maybe_stores(&graph).all_pass());
    let cert = verify_graph(&graph);
    assert!(cert.all_pass(), "after stores: {:?}", cert.obligations());

    let order = layout::order(&graph, &listing.registry);
    assert_eq!(order.len(), graph.node_count());

    let stream = to_linear(&mut graph, &order);
    assert!(!stream.is_empty());
}

#[test]
fn inline_corpus_passes_all_certs() {
    for (i, source) in INLINE_CORPUS.iter().enumerate() {
        run_all_passes(source);
        println!("inline corpus entry {i} ok");
    }
}

#[test]
fn data_corpus_passes_all_certs() {
    for name in ["demo.rasm", "switch.rasm"] {
        let source = std::fs::read_to_string(data_dir().join(name)).unwrap();
        run_all_passes(&source);
    }
}

#[test]
fn inverse_branch_pair_folds_into_one_node() {
    let result = parse(INLINE_CORPUS[0]);
    let listing = result.listing.unwrap();
    let mut graph = AsmGraph::new(listing.entry);
    graph.append_code(&listing.code, &listing.registry).unwrap();
    graph.finish_appending().unwrap();

    // The entry carries both edges itself; no empty fall-through block
    // was synthesized between the paired branches.
    let entry = graph.node(graph.entry());
    assert_eq!(entry.outputs().len(), 2);
    for edge in entry.outputs() {
        assert!(!graph.node(edge.target()).code.is_empty());
    }
}

#[test]
fn full_range_switch_emits_256_slots() {
    let source = "\
.fn main
.cfg 0
.switch 0 0=a 1=b 255=c
.entry main

main:
c0:
    switch 0
a:
    rts
b:
    rts
c:
    rts
";
    let result = parse(source);
    assert!(result.errors.is_empty(), "{:?}", result.errors);
    let listing = result.listing.unwrap();
    let mut graph = AsmGraph::new(listing.entry);
    graph.append_code(&listing.code, &listing.registry).unwrap();
    graph.finish_appending().unwrap();
    optimize(&mut graph);

    let order = layout::order(&graph, &listing.registry);
    let stream = to_linear(&mut graph, &order);

    let data = stream.iter().filter(|i| i.op == Op::DATA).count();
    assert_eq!(data, 512);

    // min == 0 leaves the terminator offsets alone.
    let switch_inst = stream.iter().find(|i| i.op == Op::SWITCH).unwrap();
    assert_eq!(switch_inst.arg.offset, 0);
    assert_eq!(switch_inst.alt.offset, 0);
    assert_eq!(switch_inst.arg.cfg_node(), Some(CfgId(0)));
}

#[test]
fn shifted_switch_adjusts_terminator_offsets() {
    let source = "\
.fn main
.cfg 0
.switch 0 10=a 11=b 12=c
.entry main

main:
c0:
    switch 0
a:
    rts
b:
    rts
c:
    rts
";
    let result = parse(source);
    let listing = result.listing.unwrap();
    let mut graph = AsmGraph::new(listing.entry);
    graph.append_code(&listing.code, &listing.registry).unwrap();
    graph.finish_appending().unwrap();
    optimize(&mut graph);

    let order = layout::order(&graph, &listing.registry);
    let stream = to_linear(&mut graph, &order);

    let data = stream.iter().filter(|i| i.op == Op::DATA).count();
    assert_eq!(data, 6);

    let switch_inst = stream.iter().find(|i| i.op == Op::SWITCH).unwrap();
    assert_eq!(switch_inst.arg.offset, -10);
    assert_eq!(switch_inst.alt.offset, -10);
}
