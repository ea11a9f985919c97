// maybe_store.rs — Resolve placeholder stores against liveness
//
// Earlier lowering emits "maybe" stores for values that might only live
// in a register. Once the graph is final, liveness decides each one:
// a store whose target is live downstream becomes a real absolute store;
// a dead one is pruned.
//
// Preconditions: the graph is optimized and finalized.
// Postconditions: no maybe-store op remains anywhere in the graph.
// Failure modes: none for well-formed graphs; a maybe-store operand
//                missing from its own map is a back-end bug and panics.
// Side effects: none.

use crate::graph::{AsmGraph, NodeId};
use crate::inst::{flag, AddrMode, Mn, Op};
use crate::liveness::{calc_liveness, do_inst_rw, VarMap};
use crate::locator::{FnId, Locator};
use crate::pass::StageCert;
use crate::registry::Registry;

/// Rewrite every maybe-store in the graph into a real store or a pruned
/// placeholder, depending on whether its target is live afterwards.
pub fn remove_maybes(graph: &mut AsmGraph, fun: FnId, registry: &Registry) {
    // Map every maybe-store operand head.
    let mut map = VarMap::new();
    graph.for_each_inst(|inst| {
        if inst.op.flags() & flag::MAYBE_STORE == 0 {
            return;
        }
        if inst.arg.is_some() {
            map.insert(inst.arg.mem_head());
        }
        if inst.alt.is_some() {
            map.insert(inst.alt.mem_head());
        }
    });

    let fun_meta = registry.fn_meta(fun).clone();
    let liveness = calc_liveness(graph, &fun_meta, registry, &map);

    let ids: Vec<NodeId> = graph.node_ids().collect();
    for id in ids {
        // Walking backwards: start from the block's live-out state.
        let mut live = liveness.live_out(id).clone();

        if let Some(term) = graph.node(id).output_inst {
            do_inst_rw(&fun_meta, registry, &map, &term, |i, read, write| {
                if read {
                    live.set(i, true);
                } else if write {
                    live.set(i, false);
                }
            });
        }

        for index in (0..graph.node(id).code.len()).rev() {
            let mut inst = graph.node(id).code[index];

            if inst.op.flags() & flag::MAYBE_STORE != 0 {
                let i = map
                    .index_of(&inst.arg.mem_head())
                    .expect("maybe-store operand missing from its map");
                debug_assert!(inst.op.output_regs() & crate::inst::regf::M != 0);

                if live[i] {
                    inst.op = match inst.op.change_addr_mode(AddrMode::Absolute) {
                        Some(op) => op,
                        // The flag stores have no re-addressable form.
                        None => match inst.op.mn {
                            Mn::StoreC => Op::new(Mn::StoreC, AddrMode::Absolute),
                            Mn::StoreZ => Op::new(Mn::StoreZ, AddrMode::Absolute),
                            _ => unreachable!("unhandled maybe-store op"),
                        },
                    };
                } else {
                    inst.op = Op::PRUNED;
                    inst.arg = Locator::NONE;
                    inst.alt = Locator::NONE;
                }
                graph.node_mut(id).code[index] = inst;
            }

            // Update the running live set with the rewritten instruction.
            do_inst_rw(&fun_meta, registry, &map, &inst, |i, read, write| {
                if read {
                    live.set(i, true);
                } else if write {
                    live.set(i, false);
                }
            });
        }
    }
}

// ── Verification ─────────────────────────────────────────────────────────

/// Machine-checkable evidence for store resolution (M1).
#[derive(Debug, Clone)]
pub struct StoreCert {
    /// M1: no maybe-store op remains in the graph.
    pub m1_no_maybe_stores: bool,
}

impl StageCert for StoreCert {
    fn all_pass(&self) -> bool {
        self.m1_no_maybe_stores
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![("M1_no_maybe_stores", self.m1_no_maybe_stores)]
    }
}

/// Verify the store-resolution postcondition.
pub fn verify_no_maybe_stores(graph: &AsmGraph) -> StoreCert {
    let mut found = false;
    graph.for_each_inst(|inst| {
        if inst.op.flags() & flag::MAYBE_STORE != 0 {
            found = true;
        }
    });
    StoreCert {
        m1_no_maybe_stores: !found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::AsmInst;
    use crate::locator::GmemberId;
    use crate::registry::FnMeta;

    fn gm(n: u32) -> Locator {
        Locator::gmember(GmemberId(n))
    }

    fn maybe_sta(loc: Locator) -> AsmInst {
        AsmInst::with_arg(Op::new(Mn::Sta, AddrMode::Maybe), loc)
    }

    fn lda_abs(loc: Locator) -> AsmInst {
        AsmInst::with_arg(Op::new(Mn::Lda, AddrMode::Absolute), loc)
    }

    fn rts() -> AsmInst {
        AsmInst::of(Op::RTS)
    }

    fn setup(code: &[AsmInst], writes: &[GmemberId]) -> (AsmGraph, Registry, FnId) {
        let mut registry = Registry::new();
        let mut meta = FnMeta::new("main");
        for &g in writes {
            meta.writes.insert(g);
        }
        let fun = registry.insert_fn(meta).unwrap();
        let mut graph = AsmGraph::new(Locator::function(fun));
        graph.append_code(code, &registry).unwrap();
        graph.finish_appending().unwrap();
        (graph, registry, fun)
    }

    #[test]
    fn dead_store_is_pruned() {
        // Nothing reads g0 after the maybe-store and the function does
        // not publish it, so the store disappears.
        let (mut graph, registry, fun) = setup(&[maybe_sta(gm(0)), rts()], &[]);
        remove_maybes(&mut graph, fun, &registry);

        let entry = graph.node(graph.entry());
        assert_eq!(entry.code[0].op, Op::PRUNED);
        assert_eq!(entry.code[0].arg, Locator::NONE);
        assert!(verify_no_maybe_stores(&graph).all_pass());
    }

    #[test]
    fn live_store_is_promoted() {
        // g0 is read again after the maybe-store.
        let (mut graph, registry, fun) = setup(
            &[maybe_sta(gm(0)), lda_abs(gm(0)), rts()],
            &[],
        );
        remove_maybes(&mut graph, fun, &registry);

        let entry = graph.node(graph.entry());
        assert_eq!(entry.code[0].op, Op::new(Mn::Sta, AddrMode::Absolute));
        assert_eq!(entry.code[0].arg, gm(0));
        assert!(verify_no_maybe_stores(&graph).all_pass());
    }

    #[test]
    fn store_kept_alive_by_function_write_summary() {
        // The function's summary says it writes g0, so the return reads
        // it and the maybe-store must materialize.
        let mut registry = Registry::new();
        let g = registry.intern_gmember("counter", "state");
        let mut meta = FnMeta::new("main");
        meta.writes.insert(g);
        let fun = registry.insert_fn(meta).unwrap();

        let mut graph = AsmGraph::new(Locator::function(fun));
        graph
            .append_code(&[maybe_sta(Locator::gmember(g)), rts()], &registry)
            .unwrap();
        graph.finish_appending().unwrap();

        remove_maybes(&mut graph, fun, &registry);
        let entry = graph.node(graph.entry());
        assert_eq!(entry.code[0].op, Op::new(Mn::Sta, AddrMode::Absolute));
    }

    #[test]
    fn flag_stores_rewrite_to_absolute_forms() {
        let (mut graph, registry, fun) = setup(
            &[
                AsmInst::with_arg(Op::new(Mn::StoreC, AddrMode::Maybe), gm(0)),
                AsmInst::with_arg(Op::new(Mn::StoreZ, AddrMode::Maybe), gm(1)),
                lda_abs(gm(0)),
                lda_abs(gm(1)),
                rts(),
            ],
            &[],
        );
        remove_maybes(&mut graph, fun, &registry);

        let entry = graph.node(graph.entry());
        assert_eq!(entry.code[0].op, Op::new(Mn::StoreC, AddrMode::Absolute));
        assert_eq!(entry.code[1].op, Op::new(Mn::StoreZ, AddrMode::Absolute));
    }

    #[test]
    fn consecutive_stores_shadow_each_other() {
        // The first maybe-store is immediately overwritten by the second.
        let (mut graph, registry, fun) = setup(
            &[
                maybe_sta(gm(0)),
                maybe_sta(gm(0)),
                lda_abs(gm(0)),
                rts(),
            ],
            &[],
        );
        remove_maybes(&mut graph, fun, &registry);

        let entry = graph.node(graph.entry());
        assert_eq!(entry.code[0].op, Op::PRUNED);
        assert_eq!(entry.code[1].op, Op::new(Mn::Sta, AddrMode::Absolute));
    }
}
