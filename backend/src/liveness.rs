// liveness.rs — Backward liveness over a locator-indexed variable map
//
// Computes per-block live-in/live-out bitsets for any insertion-ordered
// set of locators. The same engine serves two callers: local-variable
// interference construction (`lvars`) and maybe-store resolution
// (`maybe_store`).
//
// Preconditions: the graph is finalized (all edges resolved).
// Postconditions: every live node has in/out sets of width `map.len()`;
//                 out = union of successor in-sets.
// Failure modes: none; nodes unreachable from any terminal (infinite
//                loops) are still processed to a fixed point.
// Side effects: none.

use std::collections::HashMap;

use bitvec::vec::BitVec;

use crate::graph::{AsmGraph, NodeId};
use crate::inst::{indirect_addr_mode, regf, AsmInst};
use crate::locator::{LocClass, LocKind, Locator};
use crate::registry::{FnClass, FnMeta, Registry};

// ── Variable map ─────────────────────────────────────────────────────────

/// An insertion-ordered set of locators. A variable's bit index is its
/// insertion position.
#[derive(Debug, Clone, Default)]
pub struct VarMap {
    locs: Vec<Locator>,
    index: HashMap<Locator, usize>,
}

impl VarMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a locator, returning its bit index. Idempotent.
    pub fn insert(&mut self, loc: Locator) -> usize {
        if let Some(&i) = self.index.get(&loc) {
            return i;
        }
        let i = self.locs.len();
        self.index.insert(loc, i);
        self.locs.push(loc);
        i
    }

    pub fn index_of(&self, loc: &Locator) -> Option<usize> {
        self.index.get(loc).copied()
    }

    pub fn get(&self, i: usize) -> Locator {
        self.locs[i]
    }

    pub fn len(&self) -> usize {
        self.locs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, Locator)> + '_ {
        self.locs.iter().copied().enumerate()
    }
}

// ── Worklist ─────────────────────────────────────────────────────────────

/// LIFO worklist with membership dedup, sized to the node arena.
struct Worklist {
    stack: Vec<NodeId>,
    queued: Vec<bool>,
}

impl Worklist {
    fn new(arena: usize) -> Self {
        Self {
            stack: Vec::with_capacity(arena),
            queued: vec![false; arena],
        }
    }

    fn push(&mut self, id: NodeId) {
        let i = id.0 as usize;
        if !self.queued[i] {
            self.queued[i] = true;
            self.stack.push(id);
        }
    }

    fn pop(&mut self) -> Option<NodeId> {
        let id = self.stack.pop()?;
        self.queued[id.0 as usize] = false;
        Some(id)
    }
}

// ── Per-instruction read/write oracle ────────────────────────────────────

/// Report, for every map index an instruction touches, whether it reads
/// and/or writes that variable. The callback receives `(index, read,
/// write)`; callers must apply the read effect before the write effect,
/// because an instruction that both reads and writes a location (INC) is
/// a use.
pub fn do_inst_rw(
    fun: &FnMeta,
    registry: &Registry,
    map: &VarMap,
    inst: &AsmInst,
    mut rw: impl FnMut(usize, bool, bool),
) {
    if let LocKind::Fn(call_id) = inst.arg.kind {
        let call = registry.fn_meta(call_id);
        for (i, loc) in map.iter() {
            if loc.has_fn() && loc.fn_id() == Some(call_id) {
                rw(
                    i,
                    loc.lclass() == LocClass::Arg,
                    loc.lclass() == LocClass::Return,
                );
            }
            if let LocKind::Gmember(g) = loc.kind {
                if call.fclass == FnClass::Mode {
                    rw(
                        i,
                        call.precheck_groups.contains(&registry.gmember_group(g)),
                        false,
                    );
                } else {
                    rw(i, call.reads.contains(&g), call.writes.contains(&g));
                }
            }
        }
    }

    if inst.is_return() {
        for (i, loc) in map.iter() {
            match loc.kind {
                // Every return slot is consumed by the return itself.
                LocKind::Return { .. } => rw(i, true, false),
                // Gmembers the function writes must hold their final
                // value at the return.
                LocKind::Gmember(g) => rw(i, fun.writes.contains(&g), false),
                _ => {}
            }
        }
    } else if !matches!(inst.arg.kind, LocKind::Fn(_)) {
        let input = inst.op.input_regs() & regf::M != 0;
        let output = inst.op.output_regs() & regf::M != 0;
        if let Some(i) = map.index_of(&inst.arg) {
            rw(i, input, output);
        }
        // Indirect modes address through a two-byte pointer; the high
        // byte is a distinct variable.
        if indirect_addr_mode(inst.op.addr_mode()) {
            debug_assert!(inst.arg.is_some());
            debug_assert!(inst.alt.is_some() && inst.alt != inst.arg);
            if let Some(i) = map.index_of(&inst.alt) {
                rw(i, input, output);
            }
        }
    }
}

// ── Liveness results ─────────────────────────────────────────────────────

/// Per-node live-in/live-out sets, indexed by `NodeId`.
#[derive(Debug)]
pub struct Liveness {
    width: usize,
    live_in: Vec<BitVec>,
    live_out: Vec<BitVec>,
}

impl Liveness {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn live_in(&self, id: NodeId) -> &BitVec {
        &self.live_in[id.0 as usize]
    }

    pub fn live_out(&self, id: NodeId) -> &BitVec {
        &self.live_out[id.0 as usize]
    }
}

fn do_read(gen: &mut BitVec, kill_complement: &BitVec, i: usize) {
    if kill_complement[i] {
        gen.set(i, true);
    }
}

/// `dst |= src`.
pub fn union_into(dst: &mut BitVec, src: &BitVec) {
    for i in src.iter_ones() {
        dst.set(i, true);
    }
}

/// `dst &= src`.
pub fn intersect_with(dst: &mut BitVec, src: &BitVec) {
    let ones: Vec<usize> = dst.iter_ones().collect();
    for i in ones {
        if !src[i] {
            dst.set(i, false);
        }
    }
}

// ── Fixpoint ─────────────────────────────────────────────────────────────

/// Compute liveness of `map`'s variables over the whole graph.
///
/// Staging: each node's `out` starts as the complement of its KILL set
/// and `in` as its GEN set; the worklist then iterates
/// `in = (union of successor in) & out | in` from the terminal nodes
/// backward. Nodes unreachable from any terminal are re-seeded until
/// everything has been processed. Finalization replaces `out` with the
/// true union of successor in-sets.
pub fn calc_liveness(
    graph: &AsmGraph,
    fun: &FnMeta,
    registry: &Registry,
    map: &VarMap,
) -> Liveness {
    let width = map.len();
    let arena = graph.arena_len();
    let mut live_in = vec![BitVec::repeat(false, width); arena];
    let mut live_out = vec![BitVec::repeat(false, width); arena];

    // Stage GEN into `in` and the KILL-complement into `out`.
    for id in graph.node_ids() {
        let idx = id.0 as usize;
        live_out[idx].fill(true);

        // Arguments are live on entry to the function.
        if id == graph.entry() {
            for (i, loc) in map.iter() {
                if loc.lclass() == LocClass::Arg {
                    do_read(&mut live_in[idx], &live_out[idx], i);
                }
            }
        }

        let node = graph.node(id);
        for inst in node.code.iter().chain(node.output_inst.iter()) {
            do_inst_rw(fun, registry, map, inst, |i, read, write| {
                // Read before write within one instruction.
                if read {
                    do_read(&mut live_in[idx], &live_out[idx], i);
                }
                if write {
                    live_out[idx].set(i, false);
                }
            });
        }
    }

    // Backward fixpoint from the terminal nodes.
    let mut worklist = Worklist::new(arena);
    let mut processed = vec![false; arena];

    for id in graph.node_ids() {
        if graph.node(id).outputs().is_empty() {
            worklist.push(id);
        }
    }

    loop {
        while let Some(id) = worklist.pop() {
            let idx = id.0 as usize;

            let mut temp = BitVec::repeat(false, width);
            for edge in graph.node(id).outputs() {
                union_into(&mut temp, &live_in[edge.target().0 as usize]);
            }
            intersect_with(&mut temp, &live_out[idx]);
            union_into(&mut temp, &live_in[idx]);

            if !processed[idx] || temp != live_in[idx] {
                processed[idx] = true;
                for &input in graph.node(id).inputs() {
                    worklist.push(input);
                }
            }
            live_in[idx] = temp;
        }

        // Nodes not reachable travelling backwards from any exit
        // (infinite loops) still need sets.
        let mut reseeded = false;
        for id in graph.node_ids() {
            if !processed[id.0 as usize] {
                worklist.push(id);
                reseeded = true;
            }
        }
        if !reseeded {
            break;
        }
    }

    // Replace the staged KILL-complement with the true live-out.
    for id in graph.node_ids() {
        let idx = id.0 as usize;
        let mut out = BitVec::repeat(false, width);
        for edge in graph.node(id).outputs() {
            union_into(&mut out, &live_in[edge.target().0 as usize]);
        }
        live_out[idx] = out;
    }

    Liveness {
        width,
        live_in,
        live_out,
    }
}
