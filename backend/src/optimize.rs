// optimize.rs — Graph optimizer: stub elimination, branch simplification,
// return merging, and intra-block peephole, run to a joint fixpoint.
//
// Every sub-pass is monotone on a finite lattice (node count decreases or
// a terminator specializes), so the fixpoint terminates.
//
// Preconditions: `finish_appending` has run; all edges are resolved.
// Postconditions: re-running `optimize` produces zero changes.
// Failure modes: none (graceful no-op when nothing applies).
// Side effects: none.

use crate::graph::{AsmGraph, Edge, NodeId};
use crate::inst::{AsmInst, Mn, Op};

/// Run all graph optimizations to a joint fixpoint.
pub fn optimize(graph: &mut AsmGraph) {
    loop {
        let mut changed = false;
        changed |= remove_stubs(graph);
        changed |= remove_branches(graph);
        changed |= merge_returns(graph);
        changed |= peephole(graph);
        if !changed {
            break;
        }
    }
}

// ── Stub elimination ─────────────────────────────────────────────────────

/// Delete any non-entry node with no code that is either fully dead
/// (no inputs) or a single-output bypass to a different node. Bypass
/// inputs are rewired past the stub, preserving their edge positions and
/// case values.
pub fn remove_stubs(graph: &mut AsmGraph) -> bool {
    let mut changed = false;
    let ids: Vec<NodeId> = graph.node_ids().collect();

    for id in ids {
        let node = graph.node(id);
        if !node.code.is_empty() || node.label == graph.entry_label() {
            continue;
        }

        if node.inputs().is_empty() {
            graph.prune(id);
            changed = true;
            continue;
        }

        if node.outputs().len() == 1 && node.outputs()[0].node != Some(id) {
            let target = node.outputs()[0].target();
            while !graph.node(id).inputs().is_empty() {
                let input = graph.node(id).inputs()[0];
                let output_index = graph
                    .find_output(input, id)
                    .expect("input without a reciprocal output");
                graph.replace_output(input, output_index, Some(target));
            }
            graph.prune(id);
            changed = true;
        }
    }

    changed
}

// ── Branch simplification ────────────────────────────────────────────────

/// Rewrite any node whose outputs all name the same edge (same target,
/// same case value) into a single-edge unconditional jump.
pub fn remove_branches(graph: &mut AsmGraph) -> bool {
    let mut changed = false;
    let ids: Vec<NodeId> = graph.node_ids().collect();

    for id in ids {
        let node = graph.node(id);
        if node.outputs().len() < 2 {
            continue;
        }
        let first = node.outputs()[0];
        if node.outputs()[1..].iter().any(|edge| *edge != first) {
            continue;
        }

        while graph.node(id).outputs().len() > 1 {
            graph.remove_output(id, 0);
        }
        graph.node_mut(id).output_inst = Some(AsmInst::of(Op::JMP_ABS));
        changed = true;
    }

    changed
}

// ── Return merging ───────────────────────────────────────────────────────

/// Tail-call promotion and common-suffix factoring over terminal nodes.
pub fn merge_returns(graph: &mut AsmGraph) -> bool {
    let mut changed = false;

    let returns: Vec<NodeId> = graph
        .node_ids()
        .filter(|&id| graph.node(id).outputs().is_empty())
        .collect();

    // Tail-call promotion: a call immediately before a plain return
    // becomes the terminator itself.
    for &id in &returns {
        let node = graph.node(id);
        let Some(term) = node.output_inst else {
            continue;
        };
        if term.op != Op::RTS || node.code.is_empty() {
            continue;
        }
        let last = *node.code.last().expect("non-empty code");
        if let Some(new_op) = last.op.tail_call_op() {
            let node = graph.node_mut(id);
            let mut promoted = last;
            promoted.op = new_op;
            node.output_inst = Some(promoted);
            node.code.pop();
            changed = true;
        }
    }

    // Common-suffix factoring: pairs of terminal nodes with identical
    // terminators share their longest common code suffix (length >= 2)
    // through a new terminal node.
    for i in 0..returns.len() {
        for j in i + 1..returns.len() {
            let (a_id, b_id) = (returns[i], returns[j]);
            let a = graph.node(a_id);
            let b = graph.node(b_id);

            // A node that already gained an output was merged earlier in
            // this sweep and is no longer terminal.
            if !a.outputs().is_empty() || !b.outputs().is_empty() {
                continue;
            }
            if a.output_inst != b.output_inst {
                continue;
            }
            if a.is_switch() || b.is_switch() {
                continue;
            }

            let min_size = a.code.len().min(b.code.len());
            let mut match_len = 0;
            while match_len < min_size
                && a.code[a.code.len() - 1 - match_len] == b.code[b.code.len() - 1 - match_len]
            {
                match_len += 1;
            }
            if match_len < 2 {
                continue;
            }

            let term = a.output_inst;
            debug_assert_eq!(term, b.output_inst);
            let cfg = a.cfg.or(b.cfg);
            let suffix = a.code[a.code.len() - match_len..].to_vec();

            let tail = graph.add_node();
            {
                let node = graph.node_mut(tail);
                node.cfg = cfg;
                node.code = suffix;
                node.output_inst = term;
            }
            for &id in &[a_id, b_id] {
                let node = graph.node_mut(id);
                let new_len = node.code.len() - match_len;
                node.code.truncate(new_len);
                node.output_inst = Some(AsmInst::of(Op::JMP_ABS));
                graph.push_output(id, Edge::to(tail));
            }
            changed = true;
        }
    }

    changed
}

// ── Peephole ─────────────────────────────────────────────────────────────

/// Conservative intra-block rewriter. Only ever removes instructions, so
/// it is confluent with the structural passes under the fixpoint loop.
pub fn peephole(graph: &mut AsmGraph) -> bool {
    let mut changed = false;
    let ids: Vec<NodeId> = graph.node_ids().collect();
    for id in ids {
        changed |= peephole_block(&mut graph.node_mut(id).code);
    }
    changed
}

fn peephole_block(code: &mut Vec<AsmInst>) -> bool {
    let mut changed = false;
    let mut out: Vec<AsmInst> = Vec::with_capacity(code.len());

    for &inst in code.iter() {
        if inst.op == Op::PRUNED {
            changed = true;
            continue;
        }
        if let Some(&prev) = out.last() {
            // A load identical to the previous instruction recomputes the
            // same registers and flags.
            if inst == prev && matches!(inst.op.mn, Mn::Lda | Mn::Ldx | Mn::Ldy) {
                changed = true;
                continue;
            }
            // A transfer that round-trips the previous transfer restores
            // the same value and the same flags.
            if transfer_roundtrip(prev.op.mn, inst.op.mn) {
                changed = true;
                continue;
            }
        }
        out.push(inst);
    }

    if changed {
        *code = out;
    }
    changed
}

fn transfer_roundtrip(first: Mn, second: Mn) -> bool {
    matches!(
        (first, second),
        (Mn::Tax, Mn::Txa) | (Mn::Txa, Mn::Tax) | (Mn::Tay, Mn::Tya) | (Mn::Tya, Mn::Tay)
    )
}
