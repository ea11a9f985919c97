// graph.rs — Assembly control-flow graph: node/edge model and builder
//
// Organizes a straight-line pseudo-instruction buffer into basic blocks
// with explicit, bidirectional edges. Nodes live in an arena and are
// addressed by `NodeId`; pruned nodes are tombstoned in place so ids stay
// stable. Edge-list mutation goes through graph methods so both endpoints
// are updated together — bidirectional consistency is an invariant
// (checked by `verify_graph`), not a type-level guarantee.
//
// Preconditions: instruction buffers are register-allocated pseudo-asm;
//                switch tables for every switch terminator are registered.
// Postconditions: after `finish_appending`, every edge targets a node and
//                 `label_map` resolves every internally referenced label.
// Failure modes: duplicate label, unresolved label, missing switch table
//                → `Diagnostic` (fatal for the enclosing function).
// Side effects: none.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::diag::{codes, DiagLevel, Diagnostic, Span};
use crate::inst::{flag, AsmInst, Op};
use crate::locator::{CfgId, LocClass, LocKind, Locator};
use crate::pass::StageCert;
use crate::registry::Registry;

// ── Ids and edges ────────────────────────────────────────────────────────

/// Index of a node in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

/// An outgoing edge. `node` is `None` only between `append_code` and
/// `finish_appending`, while the target label is still unresolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge {
    pub node: Option<NodeId>,
    /// `-1` marks a non-switch edge; `0..=255` marks a switch arm.
    pub case_value: i32,
}

impl Edge {
    pub fn to(node: NodeId) -> Self {
        Self {
            node: Some(node),
            case_value: -1,
        }
    }

    /// Resolved target. Panics on an unresolved edge — only reachable
    /// through a back-end bug, not through bad input.
    pub fn target(&self) -> NodeId {
        self.node.expect("edge target still unresolved")
    }
}

// ── Nodes ────────────────────────────────────────────────────────────────

/// A basic block of non-control-flow instructions plus one terminator.
#[derive(Debug)]
pub struct AsmNode {
    /// Entry label, or `Locator::NONE`.
    pub label: Locator,
    /// Straight-line body. Never contains control flow.
    pub code: Vec<AsmInst>,
    /// The single terminator: branch, jump, switch, or return.
    /// An unconditional fall-through is modeled as an absolute jump.
    pub output_inst: Option<AsmInst>,
    /// Owning IR CFG node, if any. Only used for edge-weight scaling and
    /// switch-table naming.
    pub cfg: Option<CfgId>,
    /// Creation rank; used as a tie-breaker by the layout pass.
    pub original_order: u32,
    outputs: SmallVec<[Edge; 2]>,
    inputs: SmallVec<[NodeId; 2]>,
    alive: bool,
}

impl AsmNode {
    fn new(label: Locator, original_order: u32) -> Self {
        Self {
            label,
            code: Vec::new(),
            output_inst: None,
            cfg: None,
            original_order,
            outputs: SmallVec::new(),
            inputs: SmallVec::new(),
            alive: true,
        }
    }

    pub fn outputs(&self) -> &[Edge] {
        &self.outputs
    }

    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// True when the terminator is a switch.
    pub fn is_switch(&self) -> bool {
        self.output_inst
            .map(|inst| inst.op.flags() & flag::SWITCH != 0)
            .unwrap_or(false)
    }
}

// ── Deferred label lookups ───────────────────────────────────────────────

#[derive(Debug)]
struct DeferredEdge {
    node: NodeId,
    output: usize,
    label: Locator,
}

// ── Graph ────────────────────────────────────────────────────────────────

/// The assembly control-flow graph of one function.
#[derive(Debug)]
pub struct AsmGraph {
    nodes: Vec<AsmNode>,
    entry_label: Locator,
    label_map: HashMap<Locator, NodeId>,
    to_lookup: Vec<DeferredEdge>,
    next_order: u32,
}

impl AsmGraph {
    /// Create a graph whose first node carries the function's entry label.
    /// Minor labels get renumbered by the linearizer and cannot serve as
    /// the entry.
    pub fn new(entry_label: Locator) -> Self {
        assert_ne!(entry_label.lclass(), LocClass::MinorLabel);
        let mut graph = Self {
            nodes: Vec::new(),
            entry_label,
            label_map: HashMap::new(),
            to_lookup: Vec::new(),
            next_order: 0,
        };
        graph
            .push_back(entry_label, false)
            .expect("entry label cannot collide in an empty graph");
        graph
    }

    pub fn entry_label(&self) -> Locator {
        self.entry_label
    }

    /// The entry node. The entry is never pruned.
    pub fn entry(&self) -> NodeId {
        self.label_map[&self.entry_label]
    }

    pub fn node(&self, id: NodeId) -> &AsmNode {
        &self.nodes[id.0 as usize]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut AsmNode {
        &mut self.nodes[id.0 as usize]
    }

    /// Capacity of the arena, counting tombstones. Per-pass side tables
    /// index by `NodeId`, so they size to this.
    pub fn arena_len(&self) -> usize {
        self.nodes.len()
    }

    /// Number of live nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.alive).count()
    }

    /// Live node ids, in creation order.
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.alive)
            .map(|(i, _)| NodeId(i as u32))
    }

    /// Node registered for a label, if any.
    pub fn labeled(&self, label: Locator) -> Option<NodeId> {
        self.label_map.get(&label).copied()
    }

    // ── Edge primitives ──────────────────────────────────────────────

    /// Append an outgoing edge; if resolved, record the reciprocal input.
    pub fn push_output(&mut self, src: NodeId, edge: Edge) {
        self.nodes[src.0 as usize].outputs.push(edge);
        if let Some(target) = edge.node {
            self.nodes[target.0 as usize].inputs.push(src);
        }
    }

    /// Unlink the reciprocal input entry of `outputs[i]` (swap-pop on the
    /// target's input list).
    fn remove_outputs_input(&mut self, src: NodeId, i: usize) {
        if let Some(target) = self.nodes[src.0 as usize].outputs[i].node {
            let inputs = &mut self.nodes[target.0 as usize].inputs;
            let pos = inputs
                .iter()
                .position(|&input| input == src)
                .expect("reciprocal input missing");
            inputs.swap_remove(pos);
        }
    }

    /// Remove `outputs[i]` by swap-pop. Edge order within `outputs` is
    /// not preserved; callers that rely on edge position (branch index 0
    /// vs 1) must use `replace_output` instead.
    pub fn remove_output(&mut self, src: NodeId, i: usize) {
        self.remove_outputs_input(src, i);
        self.nodes[src.0 as usize].outputs.swap_remove(i);
    }

    /// Redirect `outputs[i]` at `with`, preserving its position and case
    /// value. `with = None` leaves the edge dangling (builder only).
    pub fn replace_output(&mut self, src: NodeId, i: usize, with: Option<NodeId>) {
        self.remove_outputs_input(src, i);
        if let Some(target) = with {
            self.nodes[target.0 as usize].inputs.push(src);
        }
        self.nodes[src.0 as usize].outputs[i].node = with;
    }

    /// First output index whose target is `target`.
    pub fn find_output(&self, src: NodeId, target: NodeId) -> Option<usize> {
        self.nodes[src.0 as usize]
            .outputs
            .iter()
            .position(|edge| edge.node == Some(target))
    }

    /// First input index referencing `source`.
    pub fn find_input(&self, node: NodeId, source: NodeId) -> Option<usize> {
        self.nodes[node.0 as usize]
            .inputs
            .iter()
            .position(|&input| input == source)
    }

    /// Tombstone a node after detaching all of its outputs. The caller
    /// must already have rewired every input away.
    pub fn prune(&mut self, id: NodeId) {
        assert_ne!(self.nodes[id.0 as usize].label, self.entry_label);
        while !self.nodes[id.0 as usize].outputs.is_empty() {
            self.remove_output(id, 0);
        }
        assert!(self.nodes[id.0 as usize].inputs.is_empty());
        let label = self.nodes[id.0 as usize].label;
        if label.is_some() {
            self.label_map.remove(&label);
        }
        self.nodes[id.0 as usize].alive = false;
    }

    /// Create a fresh unlabeled, unlinked node (used by the return-merge
    /// optimization).
    pub fn add_node(&mut self) -> NodeId {
        self.push_back(Locator::NONE, false)
            .expect("unlabeled node cannot collide")
    }

    fn push_back(&mut self, label: Locator, succeed: bool) -> Result<NodeId, Diagnostic> {
        let id = NodeId(self.nodes.len() as u32);
        let node = AsmNode::new(label, self.next_order);
        self.next_order += 1;
        self.nodes.push(node);

        if succeed && id.0 > 0 {
            let prev = NodeId(id.0 - 1);
            self.push_output(prev, Edge::to(id));
            self.nodes[id.0 as usize].cfg = self.nodes[prev.0 as usize].cfg;
        }

        if label.is_some() {
            if self.label_map.insert(label, id).is_some() {
                return Err(Diagnostic::new(
                    DiagLevel::Error,
                    Span::none(),
                    format!("duplicate label {label} in assembly"),
                )
                .with_code(codes::E0200));
            }
        }
        Ok(id)
    }

    // ── Builder ──────────────────────────────────────────────────────

    /// Consume a straight-line instruction buffer, splitting it into
    /// blocks. May be called repeatedly before `finish_appending`. Branch
    /// and jump targets are recorded as deferred lookups and resolved at
    /// finalization.
    pub fn append_code(&mut self, code: &[AsmInst], registry: &Registry) -> Result<(), Diagnostic> {
        let mut i = 0;
        while i < code.len() {
            let inst = code[i];
            let cur = NodeId(self.nodes.len() as u32 - 1);

            if inst.op == Op::LABEL {
                self.nodes[cur.0 as usize].output_inst = Some(AsmInst::of(Op::JMP_ABS));
                let new = self.push_back(inst.arg, true)?;
                if let LocKind::CfgLabel { cfg, .. } = inst.arg.kind {
                    self.nodes[new.0 as usize].cfg = Some(cfg);
                }
            } else if inst.is_return() {
                self.nodes[cur.0 as usize].output_inst = Some(inst);
                self.push_back(Locator::NONE, false)?;
            } else if inst.op.flags() & flag::SWITCH != 0 {
                let cfg = inst.arg.cfg_node().ok_or_else(|| {
                    Diagnostic::new(
                        DiagLevel::Error,
                        Span::none(),
                        "switch terminator carries no CFG handle".to_string(),
                    )
                    .with_code(codes::E0203)
                })?;
                let table = registry.switch_table(cfg).ok_or_else(|| {
                    Diagnostic::new(
                        DiagLevel::Error,
                        Span::none(),
                        format!("no switch table registered for CFG node {}", cfg.0),
                    )
                    .with_code(codes::E0202)
                })?;
                for &(value, label) in table.cases.iter() {
                    self.delay_lookup(cur, label, value as i32);
                }
                self.nodes[cur.0 as usize].output_inst = Some(inst);
                self.push_back(Locator::NONE, false)?;
            } else if inst.op.flags() & flag::JUMP != 0 {
                self.nodes[cur.0 as usize].output_inst = Some(inst);
                self.delay_lookup(cur, inst.arg, -1);
                self.push_back(Locator::NONE, false)?;
            } else if inst.op.is_branch() {
                self.nodes[cur.0 as usize].output_inst = Some(inst);
                self.delay_lookup(cur, inst.arg, -1);
                // A branch followed by its inverse folds into one
                // two-output node instead of an empty fall-through block.
                if i + 1 < code.len() && Some(code[i + 1].op) == inst.op.invert_branch() {
                    self.delay_lookup(cur, code[i + 1].arg, -1);
                    i += 1;
                    self.push_back(Locator::NONE, false)?;
                } else {
                    self.push_back(Locator::NONE, true)?;
                }
            } else if inst.op != Op::PRUNED {
                self.nodes[cur.0 as usize].code.push(inst);
            }

            i += 1;
        }
        Ok(())
    }

    fn delay_lookup(&mut self, node: NodeId, label: Locator, case_value: i32) {
        self.to_lookup.push(DeferredEdge {
            node,
            output: self.nodes[node.0 as usize].outputs.len(),
            label,
        });
        self.push_output(
            node,
            Edge {
                node: None,
                case_value,
            },
        );
    }

    /// Resolve every deferred edge against `label_map`.
    pub fn finish_appending(&mut self) -> Result<(), Diagnostic> {
        let lookups = std::mem::take(&mut self.to_lookup);
        for lookup in &lookups {
            match self.label_map.get(&lookup.label).copied() {
                Some(target) => self.replace_output(lookup.node, lookup.output, Some(target)),
                None => {
                    return Err(Diagnostic::new(
                        DiagLevel::Error,
                        Span::none(),
                        format!("missing label {} in assembly", lookup.label),
                    )
                    .with_code(codes::E0201));
                }
            }
        }
        Ok(())
    }

    /// Visit every instruction in the graph, terminators included.
    pub fn for_each_inst(&self, mut f: impl FnMut(&AsmInst)) {
        for id in self.node_ids() {
            let node = self.node(id);
            for inst in &node.code {
                f(inst);
            }
            if let Some(inst) = &node.output_inst {
                f(inst);
            }
        }
    }
}

// ── Verification ─────────────────────────────────────────────────────────

/// Machine-checkable evidence for graph well-formedness (G1-G4).
#[derive(Debug, Clone)]
pub struct GraphCert {
    /// G1: every output edge has exactly one reciprocal input entry.
    pub g1_bidirectional_edges: bool,
    /// G2: out-degree is consistent with the terminator kind.
    pub g2_degree_matches_terminator: bool,
    /// G3: no two live nodes share a non-empty label.
    pub g3_labels_unique: bool,
    /// G4: every edge targets a live node (no deferred lookups remain).
    pub g4_edges_resolved: bool,
}

impl StageCert for GraphCert {
    fn all_pass(&self) -> bool {
        self.g1_bidirectional_edges
            && self.g2_degree_matches_terminator
            && self.g3_labels_unique
            && self.g4_edges_resolved
    }

    fn obligations(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("G1_bidirectional_edges", self.g1_bidirectional_edges),
            (
                "G2_degree_matches_terminator",
                self.g2_degree_matches_terminator,
            ),
            ("G3_labels_unique", self.g3_labels_unique),
            ("G4_edges_resolved", self.g4_edges_resolved),
        ]
    }
}

/// Verify graph invariants. Cheap enough to run after every pass in
/// tests; the pipeline runs it after construction and optimization.
pub fn verify_graph(graph: &AsmGraph) -> GraphCert {
    GraphCert {
        g1_bidirectional_edges: verify_g1(graph),
        g2_degree_matches_terminator: verify_g2(graph),
        g3_labels_unique: verify_g3(graph),
        g4_edges_resolved: verify_g4(graph),
    }
}

/// G1: for every pair (A, B), the number of edges A→B equals the number
/// of times A appears in B's input list.
fn verify_g1(graph: &AsmGraph) -> bool {
    let mut forward: HashMap<(NodeId, NodeId), usize> = HashMap::new();
    let mut backward: HashMap<(NodeId, NodeId), usize> = HashMap::new();
    for id in graph.node_ids() {
        for edge in graph.node(id).outputs() {
            match edge.node {
                Some(target) => *forward.entry((id, target)).or_insert(0) += 1,
                None => return false,
            }
        }
        for &input in graph.node(id).inputs() {
            if !graph.node(input).is_alive() {
                return false;
            }
            *backward.entry((input, id)).or_insert(0) += 1;
        }
    }
    forward == backward
}

/// G2: returns have 0 outputs, jumps 1, branches 2, switches ≥ 2;
/// a node with no terminator has no outputs. A jump straight to a
/// function (a promoted tail call) is terminal.
fn verify_g2(graph: &AsmGraph) -> bool {
    graph.node_ids().all(|id| {
        let node = graph.node(id);
        let degree = node.outputs().len();
        match node.output_inst {
            None => degree == 0,
            Some(inst) if inst.is_return() => degree == 0,
            Some(inst) if inst.op.flags() & flag::SWITCH != 0 => degree >= 2,
            Some(inst) if inst.op.is_branch() => degree == 2,
            Some(inst) if inst.op.flags() & flag::JUMP != 0 => {
                degree == 1 || (degree == 0 && inst.arg.has_fn())
            }
            Some(_) => degree == 1,
        }
    })
}

/// G3: the label map covers exactly the live labeled nodes, one each.
fn verify_g3(graph: &AsmGraph) -> bool {
    let mut seen = 0usize;
    for id in graph.node_ids() {
        let label = graph.node(id).label;
        if label.is_some() {
            if graph.labeled(label) != Some(id) {
                return false;
            }
            seen += 1;
        }
    }
    seen == graph.label_map.len()
}

/// G4: no unresolved edges and no pending lookups.
fn verify_g4(graph: &AsmGraph) -> bool {
    graph.to_lookup.is_empty()
        && graph.node_ids().all(|id| {
            graph.node(id).outputs().iter().all(|edge| {
                edge.node
                    .map(|t| graph.node(t).is_alive())
                    .unwrap_or(false)
            })
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::{AddrMode, Mn};
    use crate::locator::FnId;

    fn entry() -> Locator {
        Locator::function(FnId(0))
    }

    fn label(n: u32) -> Locator {
        Locator::minor_label(n)
    }

    fn lda(n: u8) -> AsmInst {
        AsmInst::with_arg(Op::new(Mn::Lda, AddrMode::Immediate), Locator::const_byte(n))
    }

    fn label_inst(loc: Locator) -> AsmInst {
        AsmInst::with_arg(Op::LABEL, loc)
    }

    fn jmp(loc: Locator) -> AsmInst {
        AsmInst::with_arg(Op::JMP_ABS, loc)
    }

    fn beq(loc: Locator) -> AsmInst {
        AsmInst::with_arg(Op::new(Mn::Beq, AddrMode::Relative), loc)
    }

    fn bne(loc: Locator) -> AsmInst {
        AsmInst::with_arg(Op::new(Mn::Bne, AddrMode::Relative), loc)
    }

    fn rts() -> AsmInst {
        AsmInst::of(Op::RTS)
    }

    fn build(code: &[AsmInst]) -> AsmGraph {
        let registry = Registry::new();
        let mut graph = AsmGraph::new(entry());
        graph.append_code(code, &registry).unwrap();
        graph.finish_appending().unwrap();
        graph
    }

    #[test]
    fn edge_primitives_keep_reciprocals() {
        let mut graph = AsmGraph::new(entry());
        let a = graph.entry();
        let b = graph.add_node();
        let c = graph.add_node();

        graph.push_output(a, Edge::to(b));
        graph.push_output(a, Edge::to(c));
        assert_eq!(graph.node(b).inputs(), &[a]);
        assert_eq!(graph.node(c).inputs(), &[a]);

        graph.replace_output(a, 0, Some(c));
        assert!(graph.node(b).inputs().is_empty());
        assert_eq!(graph.node(c).inputs().len(), 2);

        graph.remove_output(a, 0);
        graph.remove_output(a, 0);
        assert!(graph.node(c).inputs().is_empty());
        assert!(graph.node(a).outputs().is_empty());
    }

    #[test]
    fn prune_requires_detached_inputs() {
        let mut graph = AsmGraph::new(entry());
        let a = graph.entry();
        let b = graph.add_node();
        graph.push_output(a, Edge::to(b));
        graph.replace_output(a, 0, None);
        graph.remove_output(a, 0);
        graph.prune(b);
        assert!(!graph.node(b).is_alive());
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn builder_splits_at_labels() {
        let graph = build(&[lda(1), label_inst(label(1)), lda(2), rts()]);
        // entry block, labeled block, plus the trailing open block.
        let ids: Vec<_> = graph.node_ids().collect();
        assert_eq!(ids.len(), 3);

        let entry_node = graph.node(graph.entry());
        assert_eq!(entry_node.code, vec![lda(1)]);
        assert_eq!(entry_node.output_inst, Some(AsmInst::of(Op::JMP_ABS)));
        assert_eq!(entry_node.outputs().len(), 1);

        let l1 = graph.labeled(label(1)).unwrap();
        assert_eq!(graph.node(l1).code, vec![lda(2)]);
        assert_eq!(graph.node(l1).output_inst, Some(rts()));
        assert!(graph.node(l1).outputs().is_empty());
    }

    #[test]
    fn builder_folds_inverse_branch_pair() {
        let graph = build(&[
            beq(label(1)),
            bne(label(2)),
            label_inst(label(1)),
            rts(),
            label_inst(label(2)),
            rts(),
        ]);
        let entry_node = graph.node(graph.entry());
        assert_eq!(entry_node.outputs().len(), 2);
        assert_eq!(
            entry_node.outputs()[0].node,
            graph.labeled(label(1))
        );
        assert_eq!(
            entry_node.outputs()[1].node,
            graph.labeled(label(2))
        );
        assert!(verify_graph(&graph).all_pass());
    }

    #[test]
    fn builder_creates_fallthrough_for_lone_branch() {
        let graph = build(&[beq(label(1)), lda(3), rts(), label_inst(label(1)), rts()]);
        let entry_node = graph.node(graph.entry());
        assert_eq!(entry_node.outputs().len(), 2);
        // Edge 0 is the taken target, edge 1 the synthesized fall-through.
        assert_eq!(entry_node.outputs()[0].node, graph.labeled(label(1)));
        let fall = entry_node.outputs()[1].target();
        assert_eq!(graph.node(fall).code, vec![lda(3)]);
        assert!(verify_graph(&graph).all_pass());
    }

    #[test]
    fn duplicate_label_is_a_construction_error() {
        let registry = Registry::new();
        let mut graph = AsmGraph::new(entry());
        let err = graph
            .append_code(
                &[label_inst(label(1)), rts(), label_inst(label(1))],
                &registry,
            )
            .unwrap_err();
        assert_eq!(err.code, Some(codes::E0200));
    }

    #[test]
    fn missing_label_is_a_finalization_error() {
        let registry = Registry::new();
        let mut graph = AsmGraph::new(entry());
        graph.append_code(&[jmp(label(9))], &registry).unwrap();
        let err = graph.finish_appending().unwrap_err();
        assert_eq!(err.code, Some(codes::E0201));
    }

    #[test]
    fn switch_without_table_is_rejected() {
        let registry = Registry::new();
        let mut graph = AsmGraph::new(entry());
        let switch = AsmInst::with_args(
            Op::SWITCH,
            Locator::switch_lo_table(CfgId(0)),
            Locator::switch_hi_table(CfgId(0)),
        );
        let err = graph.append_code(&[switch], &registry).unwrap_err();
        assert_eq!(err.code, Some(codes::E0202));
    }

    #[test]
    fn verify_detects_degree_mismatch() {
        let mut graph = build(&[beq(label(1)), lda(3), rts(), label_inst(label(1)), rts()]);
        assert!(verify_graph(&graph).all_pass());
        let entry_id = graph.entry();
        graph.remove_output(entry_id, 0);
        let cert = verify_graph(&graph);
        assert!(!cert.g2_degree_matches_terminator);
        assert!(!cert.all_pass());
    }
}
