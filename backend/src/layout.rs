// layout.rs — Block placement: greedy path cover + annealed path order
//
// Chooses a linear placement of graph nodes that (a) turns as many heavy
// edges as possible into fall-throughs and (b) keeps conditional branches
// short and on-page. Edges are weighted by shape and loop depth, a greedy
// path cover strings nodes into fall-through chains, and the chains are
// then ordered by exhaustive permutation (few paths) or a seeded
// annealing search (many paths).
//
// Preconditions: the graph is optimized; maybe-stores are resolved.
// Postconditions: the returned order is a permutation of the live nodes;
//                 repeated calls return identical orders (fixed RNG seed).
// Failure modes: none.
// Side effects: none.

use std::collections::BTreeSet;

use crate::graph::{AsmGraph, NodeId};
use crate::inst::{size_in_bytes, Op};
use crate::locator::{CfgId, LocKind};
use crate::registry::Registry;

const SOLVE_OPTIMALLY_LIMIT: usize = 4;
const INITIAL_SHUFFLES: u32 = 4;
const ATTEMPTS_PER_ITER: u32 = 4;
const ANNEAL_SEED: u32 = 0xDEAD_BEEF;

// ── Deterministic RNG ────────────────────────────────────────────────────

/// Minimal-standard LCG (multiplier 48271 over the Mersenne prime 2³¹−1).
/// The layout search must reproduce bit-identical orders across runs, so
/// the generator and its seed are part of the pass's contract.
struct Lcg(u64);

impl Lcg {
    fn new(seed: u32) -> Self {
        let s = u64::from(seed) % 0x7fff_ffff;
        Self(if s == 0 { 1 } else { s })
    }

    fn next(&mut self) -> u32 {
        self.0 = self.0 * 48271 % 0x7fff_ffff;
        self.0 as u32
    }

    fn below(&mut self, n: usize) -> usize {
        self.next() as usize % n
    }
}

fn shuffle(arr: &mut [usize], rng: &mut Lcg) {
    for i in (1..arr.len()).rev() {
        let j = rng.below(i + 1);
        arr.swap(i, j);
    }
}

/// Lexicographic next permutation; false once `arr` is the last one.
fn next_permutation(arr: &mut [usize]) -> bool {
    if arr.len() < 2 {
        return false;
    }
    let mut i = arr.len() - 1;
    while i > 0 && arr[i - 1] >= arr[i] {
        i -= 1;
    }
    if i == 0 {
        return false;
    }
    let mut j = arr.len() - 1;
    while arr[j] <= arr[i - 1] {
        j -= 1;
    }
    arr.swap(i - 1, j);
    arr[i..].reverse();
    true
}

// ── Path-cover state ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct CoverState {
    path_input: i32,
    path_output: i32,
    list_end: Option<NodeId>,
}

impl Default for CoverState {
    fn default() -> Self {
        Self {
            path_input: -1,
            path_output: -1,
            list_end: None,
        }
    }
}

#[derive(Debug)]
struct EdgeCand {
    from: NodeId,
    output: usize,
    weight: u32,
}

#[derive(Debug, Clone, Copy)]
struct PathBranch {
    from_offset: i32,
    to_offset: i32,
    to_path: usize,
}

#[derive(Debug, Default)]
struct Path {
    nodes: Vec<NodeId>,
    branches: Vec<PathBranch>,
    /// Estimated byte size of the whole chain.
    code_size: u32,
}

// ── Edge weighting ───────────────────────────────────────────────────────

/// Collect the CFG nodes feeding a multi-entry region. Secondary entry
/// labels of the same CFG node chain backwards through their inputs until
/// a different CFG node is found.
fn build_incoming(
    graph: &AsmGraph,
    incoming: &mut BTreeSet<CfgId>,
    seen: &mut BTreeSet<NodeId>,
    id: NodeId,
    cfg: CfgId,
) {
    if !seen.insert(id) {
        return;
    }
    let node = graph.node(id);
    if node.cfg != Some(cfg) {
        if let Some(other) = node.cfg {
            incoming.insert(other);
        }
    } else if matches!(node.label.kind, LocKind::CfgLabel { index, .. } if index > 0) {
        for &input in node.inputs() {
            build_incoming(graph, incoming, seen, input, cfg);
        }
    }
}

/// Depth scale of the edge `node → other`: 4^depth, saturating at 2¹⁶.
fn depth_scale(graph: &AsmGraph, registry: &Registry, id: NodeId, other_id: NodeId) -> u32 {
    let node = graph.node(id);
    let Some(node_cfg) = node.cfg else {
        return 1;
    };
    let other_cfg = graph.node(other_id).cfg.unwrap_or(node_cfg);

    let mut incoming = BTreeSet::new();
    if node_cfg == other_cfg {
        let mut seen = BTreeSet::new();
        build_incoming(graph, &mut incoming, &mut seen, id, node_cfg);
    }

    let depth = if incoming.is_empty() {
        registry.edge_depth(node_cfg, other_cfg)
    } else {
        incoming
            .iter()
            .map(|&cfg| registry.edge_depth(cfg, other_cfg))
            .max()
            .unwrap_or(0)
    };

    1u32 << (2 * depth).min(16)
}

// ── Order search ─────────────────────────────────────────────────────────

/// Running best over candidate path orders.
struct OrderSearch {
    best_order: Vec<usize>,
    lowest_cost: u32,
    offsets: Vec<u32>,
}

impl OrderSearch {
    fn new(paths: usize) -> Self {
        Self {
            best_order: (0..paths).collect(),
            lowest_cost: u32::MAX,
            offsets: vec![0; paths],
        }
    }

    /// Score `order`, keep it if it beats the best so far, and return the
    /// best cost seen.
    fn check(&mut self, paths: &[Path], order: &[usize]) -> u32 {
        let cost = order_cost(paths, order, &mut self.offsets);
        if cost < self.lowest_cost {
            self.lowest_cost = cost;
            self.best_order.clear();
            self.best_order.extend_from_slice(order);
        }
        self.lowest_cost
    }
}

/// Cost of a candidate path order: +1 per page-crossing branch, +3 per
/// branch beyond the relative range (with safety margin).
fn order_cost(paths: &[Path], order: &[usize], offsets: &mut [u32]) -> u32 {
    let mut code_size = 0u32;
    for &p in order {
        offsets[p] = code_size;
        code_size += paths[p].code_size;
    }
    let mut cost = 0u32;
    for &p in order {
        for branch in &paths[p].branches {
            let from = branch.from_offset + offsets[p] as i32;
            let to = branch.to_offset + offsets[branch.to_path] as i32;
            if (from & 0xff) != (to & 0xff) {
                cost += 1;
            }
            if (from - to).abs() > 127 - 4 {
                cost += 3;
            }
        }
    }
    cost
}

// ── Ordering ─────────────────────────────────────────────────────────────

/// Compute a linearization order for the graph's live nodes.
pub fn order(graph: &AsmGraph, registry: &Registry) -> Vec<NodeId> {
    let arena = graph.arena_len();

    // Build an elimination order for graph edges. Unconditional jumps
    // weigh the most (a fall-through erases the whole instruction);
    // branch edges prefer the target created first; switch arms carry no
    // weight at all.
    let mut cands: Vec<EdgeCand> = Vec::with_capacity(graph.node_count() * 2);
    for id in graph.node_ids() {
        let outputs = graph.node(id).outputs();
        match outputs.len() {
            0 => {}
            1 => cands.push(EdgeCand {
                from: id,
                output: 0,
                weight: 3 * depth_scale(graph, registry, id, outputs[0].target()),
            }),
            2 => {
                let first = graph.node(outputs[0].target()).original_order;
                let second = graph.node(outputs[1].target()).original_order;
                let i = usize::from(first > second);
                cands.push(EdgeCand {
                    from: id,
                    output: i,
                    weight: 2 * depth_scale(graph, registry, id, outputs[i].target()),
                });
                cands.push(EdgeCand {
                    from: id,
                    output: 1 - i,
                    weight: depth_scale(graph, registry, id, outputs[1 - i].target()),
                });
            }
            _ => {
                for output in 0..outputs.len() {
                    cands.push(EdgeCand {
                        from: id,
                        output,
                        weight: 0,
                    });
                }
            }
        }
    }
    // Stable sort: equal weights keep discovery order, which keeps the
    // whole pass deterministic.
    cands.sort_by(|l, r| r.weight.cmp(&l.weight));

    // Greedy path cover. `list_end` chains let the cycle check walk to a
    // path's current end in O(path length).
    let mut cover: Vec<CoverState> = vec![CoverState::default(); arena];
    for cand in &cands {
        let to = graph.node(cand.from).outputs()[cand.output].target();

        if cover[cand.from.0 as usize].path_output >= 0 {
            continue;
        }
        if cover[to.0 as usize].path_input >= 0 {
            continue;
        }

        let mut end = to;
        while let Some(next) = cover[end.0 as usize].list_end {
            end = next;
        }
        if end == cand.from {
            continue;
        }

        cover[cand.from.0 as usize].list_end = Some(end);
        cover[cand.from.0 as usize].path_output = cand.output as i32;
        cover[to.0 as usize].path_input = graph
            .find_input(to, cand.from)
            .expect("cover edge without reciprocal input")
            as i32;
    }

    // Collect the paths. A path starts wherever no cover edge arrives.
    let mut paths: Vec<Path> = Vec::new();
    for id in graph.node_ids() {
        if cover[id.0 as usize].path_input >= 0 {
            continue;
        }
        let mut path = Path::default();
        let mut it = id;
        loop {
            path.nodes.push(it);
            let po = cover[it.0 as usize].path_output;
            if po < 0 {
                break;
            }
            it = graph.node(it).outputs()[po as usize].target();
        }
        paths.push(path);
    }

    // Per-node offsets and byte sizes within each path. A branch node
    // costs its branch instruction, plus a fall-through jump when it ends
    // the path; a single-output node costs its jump only at the path end.
    let mut node_path = vec![0usize; arena];
    let mut node_offset = vec![0u32; arena];
    for (pi, path) in paths.iter_mut().enumerate() {
        let last = *path.nodes.last().expect("paths are never empty");
        for &id in &path.nodes {
            let node = graph.node(id);
            let term_size = node.output_inst.map(|inst| inst.op.size()).unwrap_or(0);
            let mut size = size_in_bytes(&node.code);
            match node.outputs().len() {
                0 => size += term_size,
                1 => {
                    if id == last {
                        size += term_size;
                    }
                }
                2 => {
                    size += term_size;
                    if id == last {
                        size += Op::JMP_ABS.size();
                    }
                }
                _ => size += term_size,
            }
            node_path[id.0 as usize] = pi;
            node_offset[id.0 as usize] = path.code_size;
            path.code_size += size;
        }
    }

    // Gather the inter-path branches the cost model scores.
    let mut branches: Vec<Vec<PathBranch>> = vec![Vec::new(); paths.len()];
    for (pi, path) in paths.iter().enumerate() {
        for &id in &path.nodes {
            let node = graph.node(id);
            if !node.output_inst.map(|t| t.op.is_branch()).unwrap_or(false) {
                continue;
            }
            for edge in node.outputs() {
                let target = edge.target();
                if node_path[target.0 as usize] != pi {
                    branches[pi].push(PathBranch {
                        from_offset: node_offset[id.0 as usize] as i32,
                        to_offset: node_offset[target.0 as usize] as i32,
                        to_path: node_path[target.0 as usize],
                    });
                }
            }
        }
    }
    for (path, brs) in paths.iter_mut().zip(branches) {
        path.branches = brs;
    }

    let mut search = OrderSearch::new(paths.len());

    if paths.len() <= SOLVE_OPTIMALLY_LIMIT {
        // Small sizes are solved optimally.
        let mut current: Vec<usize> = (0..paths.len()).collect();
        loop {
            if search.check(&paths, &current) == 0 {
                break;
            }
            if !next_permutation(&mut current) {
                break;
            }
        }
    } else {
        let mut rng = Lcg::new(ANNEAL_SEED);
        let mut current: Vec<usize> = (0..paths.len()).collect();
        search.check(&paths, &current);

        // A few random restarts first.
        for _ in 0..INITIAL_SHUFFLES {
            shuffle(&mut current, &mut rng);
            search.check(&paths, &current);
        }

        // Annealing: shrink the perturbation from |paths| swaps down to
        // 1, retrying from the best order at each level.
        'anneal: for swaps in (1..=paths.len()).rev() {
            for _ in 0..ATTEMPTS_PER_ITER {
                current.copy_from_slice(&search.best_order);
                for _ in 0..swaps {
                    let a = rng.below(paths.len());
                    let b = rng.below(paths.len());
                    current.swap(a, b);
                }
                if search.check(&paths, &current) == 0 {
                    break 'anneal;
                }
            }
        }
    }
    let best_order = search.best_order;

    let mut result = Vec::with_capacity(graph.node_count());
    for &p in &best_order {
        result.extend_from_slice(&paths[p].nodes);
    }
    result
}
