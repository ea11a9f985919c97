// dot.rs — Graphviz DOT output for assembly control-flow graphs
//
// Transforms an `AsmGraph` into DOT format suitable for rendering with
// `dot`, `neato`, or other Graphviz layout engines.
//
// Preconditions: `graph` is fully constructed.
// Postconditions: returns a valid DOT string representing the graph.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::graph::{AsmGraph, NodeId};
use crate::listing::format_locator;
use crate::registry::Registry;

/// Emit the graph as a Graphviz DOT string.
pub fn emit_dot(graph: &AsmGraph, registry: &Registry) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph acfg {{").unwrap();
    writeln!(buf, "    rankdir=TB;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10, shape=box];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();
    writeln!(buf).unwrap();

    for id in graph.node_ids() {
        let node = graph.node(id);
        let mut label = if node.label.is_some() {
            format_locator(&node.label, registry)
        } else {
            format!("n{}", id.0)
        };
        let _ = write!(label, "\\n{} inst", node.code.len());
        if let Some(term) = node.output_inst {
            let _ = write!(label, "\\n{}", term.op.mn.name());
        }

        let attrs = if node.label == graph.entry_label() {
            format!("label=\"{label}\", style=filled, fillcolor=lightblue")
        } else {
            format!("label=\"{label}\"")
        };
        writeln!(buf, "    n{} [{}];", id.0, attrs).unwrap();
    }

    writeln!(buf).unwrap();

    for id in graph.node_ids() {
        let node = graph.node(id);
        for (i, edge) in node.outputs().iter().enumerate() {
            let target = edge.target();
            if edge.case_value >= 0 {
                writeln!(
                    buf,
                    "    n{} -> n{} [label=\"{}\"];",
                    id.0, target.0, edge.case_value
                )
                .unwrap();
            } else if node.outputs().len() == 2 && i == 1 {
                // Branch fall-through edge.
                writeln!(buf, "    n{} -> n{} [style=dashed];", id.0, target.0).unwrap();
            } else {
                writeln!(buf, "    n{} -> n{};", id.0, target.0).unwrap();
            }
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

/// Node ids in DOT source, for tooling that post-processes the output.
pub fn dot_node_id(id: NodeId) -> String {
    format!("n{}", id.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listing;
    use crate::optimize::optimize;

    fn build(source: &str) -> (AsmGraph, Registry) {
        let result = listing::parse(source);
        assert!(result.errors.is_empty(), "{:?}", result.errors);
        let parsed = result.listing.unwrap();
        let mut graph = AsmGraph::new(parsed.entry);
        graph.append_code(&parsed.code, &parsed.registry).unwrap();
        graph.finish_appending().unwrap();
        optimize(&mut graph);
        (graph, parsed.registry)
    }

    const DIAMOND: &str = "\
.fn main
.entry main

main:
    beq other
    lda #1
    jmp join
other:
    lda #2
join:
    rts
";

    #[test]
    fn valid_dot_structure() {
        let (graph, registry) = build(DIAMOND);
        let dot = emit_dot(&graph, &registry);
        assert!(dot.starts_with("digraph acfg {"));
        assert!(dot.trim_end().ends_with('}'));
        assert!(dot.contains("label=\"main"), "entry label missing: {dot}");
    }

    #[test]
    fn branch_fallthrough_is_dashed() {
        let (graph, registry) = build(DIAMOND);
        let dot = emit_dot(&graph, &registry);
        assert!(dot.contains("style=dashed"), "missing fall-through edge: {dot}");
    }

    #[test]
    fn switch_arms_are_labeled_with_case_values() {
        let (graph, registry) = build(
            "\
.fn main
.cfg 0
.switch 0 0=a 5=b
.entry main

main:
c0:
    switch 0
a:
    rts
b:
    rts
",
        );
        let dot = emit_dot(&graph, &registry);
        assert!(dot.contains("label=\"0\""), "case 0 edge missing: {dot}");
        assert!(dot.contains("label=\"5\""), "case 5 edge missing: {dot}");
    }

    #[test]
    fn deterministic_output() {
        let (graph, registry) = build(DIAMOND);
        assert_eq!(emit_dot(&graph, &registry), emit_dot(&graph, &registry));
    }
}
