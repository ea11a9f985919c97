// linear.rs — Reflow the graph into a linear instruction stream
//
// Walks the chosen node order, emitting labels only where control can
// arrive from somewhere other than the previous instruction, eliding
// jumps to the next node, inverting branches whose taken edge is the
// fall-through, and materializing switch jump tables (packed to the
// smallest case range) after the main code.
//
// Preconditions: `order` is a permutation of the graph's live nodes;
//                maybe-stores are resolved.
// Postconditions: every label referenced by the stream is defined in it;
//                 switch terminator offsets index zero-based tables.
// Failure modes: none for verified graphs; switch case values outside
//                0..=255 are a back-end bug and panic.
// Side effects: rewrites switch terminator offsets in place.

use crate::graph::{AsmGraph, NodeId};
use crate::inst::{AsmInst, Op};
use crate::locator::{Is, LocClass, Locator};

/// Emit the graph as a flat instruction vector, following `order`.
pub fn to_linear(graph: &mut AsmGraph, order: &[NodeId]) -> Vec<AsmInst> {
    // Assign each node a unique id by order position; minor labels are
    // renumbered from these.
    let mut vids = vec![0u32; graph.arena_len()];
    let mut estimated_size = 0;
    for (i, &id) in order.iter().enumerate() {
        vids[id.0 as usize] = i as u32;
        estimated_size += graph.node(id).code.len() + 2;
    }

    let mut code: Vec<AsmInst> = Vec::with_capacity(estimated_size);
    let mut table_code: Vec<AsmInst> = Vec::new();

    // Prepare switch tables first.
    for &id in order {
        if !graph.node(id).is_switch() {
            continue;
        }

        let mut min = 0xff_i32;
        let mut max = 0_i32;
        for edge in graph.node(id).outputs() {
            assert!((0..=0xff).contains(&edge.case_value));
            min = min.min(edge.case_value);
            max = max.max(edge.case_value);
        }
        let size = (max - min + 1) as usize;
        assert!(size <= 256);

        // Shift the terminator's offsets so the emitted table is indexed
        // from zero.
        let mut table = vec![Locator::const_byte(0); size];
        for edge in graph.node(id).outputs() {
            table[(edge.case_value - min) as usize] =
                effective_label(graph, &vids, edge.target()).with_advance_offset(-1);
        }

        let term = graph
            .node_mut(id)
            .output_inst
            .as_mut()
            .expect("switch node without terminator");
        term.arg.advance_offset(-(min as i16));
        term.alt.advance_offset(-(min as i16));
        let cfg = term.arg.cfg_node().expect("switch arg without CFG handle");

        table_code.reserve(table.len() * 2 + 2);
        table_code.push(AsmInst::with_arg(Op::LABEL, Locator::switch_lo_table(cfg)));
        for &loc in &table {
            table_code.push(AsmInst::with_arg(Op::DATA, loc.with_is(Is::Ptr)));
        }
        table_code.push(AsmInst::with_arg(Op::LABEL, Locator::switch_hi_table(cfg)));
        for &loc in &table {
            table_code.push(AsmInst::with_arg(Op::DATA, loc.with_is(Is::PtrHi)));
        }
    }

    // Main code.
    for (i, &id) in order.iter().enumerate() {
        let node = graph.node(id);
        let prev = if i > 0 { Some(order[i - 1]) } else { None };
        let next = order.get(i + 1).copied();

        let needs_label = node.label == graph.entry_label()
            || node.inputs().len() > 1
            || (node.inputs().len() == 1 && prev != Some(node.inputs()[0]))
            || node
                .inputs()
                .iter()
                .any(|&input| graph.node(input).is_switch());
        if needs_label {
            code.push(AsmInst::with_arg(
                Op::LABEL,
                effective_label(graph, &vids, id),
            ));
        }

        code.extend(node.code.iter().copied());

        if let Some(term) = node.output_inst {
            if node.is_switch() || node.outputs().is_empty() {
                code.push(term);
            } else {
                assert!(node.outputs().len() <= 2);
                for (j, edge) in node.outputs().iter().enumerate() {
                    let target = edge.target();
                    if Some(target) == next {
                        // Fall-through: no instruction needed.
                        continue;
                    }
                    let mut op = term.op;
                    if j > 0 && op.is_branch() {
                        op = op.invert_branch().expect("branch with no inverse");
                    }
                    code.push(AsmInst::with_arg(
                        op,
                        effective_label(graph, &vids, target),
                    ));
                }
            }
        } else {
            debug_assert!(node.outputs().is_empty());
        }
    }

    code.extend(table_code);
    code
}

/// The label a node is addressed by in the output stream: its own label
/// when it is a real one, otherwise a minor label derived from the
/// node's position in the order.
fn effective_label(graph: &AsmGraph, vids: &[u32], id: NodeId) -> Locator {
    let node = graph.node(id);
    if node.label.is_some() && node.label.lclass() != LocClass::MinorLabel {
        node.label
    } else {
        Locator::minor_label(vids[id.0 as usize])
    }
}
