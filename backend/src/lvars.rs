// lvars.rs — Local-variable interference manager
//
// Collects every argument/return slot the function's code touches,
// computes liveness over them, and records which pairs are ever live at
// the same time (so they must not share storage), plus which variables
// are live across which calls (so they must not share storage with the
// callee's own slots).
//
// Preconditions: the graph is optimized and finalized.
// Postconditions: the interference relation is symmetric and irreflexive;
//                 referenced parameters of the function mutually interfere.
// Failure modes: none.
// Side effects: none.

use std::collections::HashSet;

use bitvec::vec::BitVec;

use crate::graph::AsmGraph;
use crate::inst::flag;
use crate::liveness::{calc_liveness, do_inst_rw, union_into, VarMap};
use crate::locator::{FnId, LocClass, LocKind, Locator};
use crate::registry::Registry;

/// Interference data for one function's local variables.
#[derive(Debug)]
pub struct LvarsManager {
    map: VarMap,
    /// Symmetric adjacency matrix, one row per variable.
    interference: Vec<BitVec>,
    /// Calls each variable is live across.
    fn_interference: Vec<HashSet<FnId>>,
}

impl LvarsManager {
    fn with_map(map: VarMap) -> Self {
        let n = map.len();
        Self {
            map,
            interference: vec![BitVec::repeat(false, n); n],
            fn_interference: vec![HashSet::new(); n],
        }
    }

    pub fn map(&self) -> &VarMap {
        &self.map
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Bit index of a locator, if it is tracked.
    pub fn index(&self, loc: &Locator) -> Option<usize> {
        self.map.index_of(loc)
    }

    /// Mark every pair of variables in `live` as interfering.
    pub fn add_lvar_interferences(&mut self, live: &BitVec) {
        for i in live.iter_ones() {
            union_into(&mut self.interference[i], live);
        }
    }

    /// Mark a variable as live across a call to `fun`.
    pub fn add_fn_interference(&mut self, i: usize, fun: FnId) {
        self.fn_interference[i].insert(fun);
    }

    /// True if two distinct variables were ever live together.
    pub fn interferes(&self, a: usize, b: usize) -> bool {
        a != b && self.interference[a][b]
    }

    /// Calls variable `i` is live across.
    pub fn fn_interferences(&self, i: usize) -> &HashSet<FnId> {
        &self.fn_interference[i]
    }
}

/// Collect the function's lvar map, run liveness, and populate the
/// interference relation by stepping backwards through each block.
pub fn build_lvars(graph: &AsmGraph, fun: FnId, registry: &Registry) -> LvarsManager {
    // Every arg/return slot referenced anywhere in the code is tracked,
    // in first-appearance order.
    let mut map = VarMap::new();
    graph.for_each_inst(|inst| {
        for loc in [inst.arg, inst.alt] {
            if matches!(loc.lclass(), LocClass::Arg | LocClass::Return) {
                map.insert(loc.mem_head());
            }
        }
    });

    let fun_meta = registry.fn_meta(fun).clone();
    let liveness = calc_liveness(graph, &fun_meta, registry, &map);
    let mut lvars = LvarsManager::with_map(map);

    for id in graph.node_ids() {
        let node = graph.node(id);

        // Walking backwards: start from the block's live-out state.
        let mut live = liveness.live_out(id).clone();
        lvars.add_lvar_interferences(&live);

        for inst in node
            .output_inst
            .iter()
            .chain(node.code.iter().rev())
        {
            if inst.op.flags() & flag::CALL != 0 {
                if let LocKind::Fn(callee) = inst.arg.kind {
                    // Every variable live across the call interferes
                    // with the callee.
                    for i in live.iter_ones() {
                        lvars.add_fn_interference(i, callee);
                    }
                }
            }

            do_inst_rw(&fun_meta, registry, &lvars.map, inst, |i, read, write| {
                if read {
                    live.set(i, true);
                } else if write {
                    // Only reached when `read` is false.
                    live.set(i, false);
                }
            });

            lvars.add_lvar_interferences(&live);
        }
    }

    // All referenced parameters occupy their slots at once on entry.
    let mut live = BitVec::repeat(false, lvars.len());
    for loc in registry.referenced_param_locators(fun) {
        if let Some(i) = lvars.index(&loc) {
            live.set(i, true);
        }
    }
    lvars.add_lvar_interferences(&live);

    lvars
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{AddrMode, AsmInst, Mn, Op};
    use crate::registry::FnMeta;

    fn sta(loc: Locator) -> AsmInst {
        AsmInst::with_arg(Op::new(Mn::Sta, AddrMode::Absolute), loc)
    }

    fn lda_abs(loc: Locator) -> AsmInst {
        AsmInst::with_arg(Op::new(Mn::Lda, AddrMode::Absolute), loc)
    }

    fn rts() -> AsmInst {
        AsmInst::of(Op::RTS)
    }

    fn setup(
        main_args: u8,
        callee_args: u8,
    ) -> (Registry, FnId, FnId) {
        let mut registry = Registry::new();
        let mut main = FnMeta::new("main");
        main.args = main_args;
        let main = registry.insert_fn(main).unwrap();
        let mut callee = FnMeta::new("callee");
        callee.args = callee_args;
        callee.returns = 1;
        let callee = registry.insert_fn(callee).unwrap();
        (registry, main, callee)
    }

    #[test]
    fn disjoint_lifetimes_do_not_interfere() {
        let (registry, main, callee) = setup(0, 2);
        let a0 = Locator::arg(callee, 0);
        let a1 = Locator::arg(callee, 1);

        // a0 dies at its load before a1 is born.
        let code = [lda_abs(a0), sta(a1), rts()];
        let mut graph = AsmGraph::new(Locator::function(main));
        graph.append_code(&code, &registry).unwrap();
        graph.finish_appending().unwrap();

        let lvars = build_lvars(&graph, main, &registry);
        let i0 = lvars.index(&a0).unwrap();
        let i1 = lvars.index(&a1).unwrap();
        assert!(!lvars.interferes(i0, i1));
    }

    #[test]
    fn overlapping_lifetimes_interfere() {
        let (registry, main, callee) = setup(0, 2);
        let a0 = Locator::arg(callee, 0);
        let a1 = Locator::arg(callee, 1);

        // Both slots are written, then both read: their lifetimes overlap.
        let code = [sta(a0), sta(a1), lda_abs(a0), lda_abs(a1), rts()];
        let mut graph = AsmGraph::new(Locator::function(main));
        graph.append_code(&code, &registry).unwrap();
        graph.finish_appending().unwrap();

        let lvars = build_lvars(&graph, main, &registry);
        let i0 = lvars.index(&a0).unwrap();
        let i1 = lvars.index(&a1).unwrap();
        assert!(lvars.interferes(i0, i1));
        assert!(lvars.interferes(i1, i0));
        assert!(!lvars.interferes(i0, i0));
    }

    #[test]
    fn live_across_call_interferes_with_callee() {
        let (registry, main, callee) = setup(1, 1);
        let own_arg = Locator::arg(main, 0);
        let callee_arg = Locator::arg(callee, 0);

        // main's own argument is read after the call, so it is live
        // across the call site.
        let code = [
            sta(callee_arg),
            AsmInst::with_arg(Op::JSR_ABS, Locator::function(callee)),
            lda_abs(own_arg),
            rts(),
        ];
        let mut graph = AsmGraph::new(Locator::function(main));
        graph.append_code(&code, &registry).unwrap();
        graph.finish_appending().unwrap();

        let lvars = build_lvars(&graph, main, &registry);
        let i = lvars.index(&own_arg).unwrap();
        assert!(lvars.fn_interferences(i).contains(&callee));

        // The callee's own argument dies at the call and does not
        // interfere with it.
        let j = lvars.index(&callee_arg).unwrap();
        assert!(!lvars.fn_interferences(j).contains(&callee));
    }

    #[test]
    fn referenced_params_mutually_interfere() {
        let (registry, main, _callee) = setup(2, 0);
        let p0 = Locator::arg(main, 0);
        let p1 = Locator::arg(main, 1);

        // p1 dies at the first load and p0 is reborn by the store, so
        // the backward walk alone never sees them live together; the
        // entry rule still forces them apart.
        let code = [lda_abs(p1), sta(p0), lda_abs(p0), rts()];
        let mut graph = AsmGraph::new(Locator::function(main));
        graph.append_code(&code, &registry).unwrap();
        graph.finish_appending().unwrap();

        let lvars = build_lvars(&graph, main, &registry);
        let i0 = lvars.index(&p0).unwrap();
        let i1 = lvars.index(&p1).unwrap();
        assert!(lvars.interferes(i0, i1));
    }
}
