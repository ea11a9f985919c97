// pass.rs — Pass descriptor module: metadata, dependency resolution, artifact IDs
//
// Declares the back-end's 6 passes, their dependency edges, and the
// artifacts they produce. Used by the pipeline runner to compute minimal
// pass subsets for each --emit target.

use std::collections::HashSet;

// ── Pass and Artifact identifiers ──────────────────────────────────────────

/// Identifies each back-end pass (listing parse excluded — handled before
/// the runner).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    BuildGraph,
    Optimize,
    BuildLvars,
    ResolveStores,
    Order,
    Linearize,
}

/// Machine-readable artifact identifiers. Each maps to a concrete type
/// in the back-end state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Graph,  // AsmGraph
    Lvars,  // LvarsManager
    Order,  // Vec<NodeId>
    Linear, // Vec<AsmInst>
}

// ── Pass descriptor ────────────────────────────────────────────────────────

/// Static metadata about a back-end pass.
pub struct PassDescriptor {
    /// Human-readable name for diagnostics/verbose output.
    pub name: &'static str,
    /// Pass dependencies (other passes whose outputs this pass consumes).
    pub inputs: &'static [PassId],
    /// Artifacts this pass produces or rewrites.
    pub outputs: &'static [ArtifactId],
    /// Pre/post conditions (documentation only).
    pub invariants: &'static str,
}

/// Return the static descriptor for a given pass.
pub fn descriptor(id: PassId) -> PassDescriptor {
    match id {
        PassId::BuildGraph => PassDescriptor {
            name: "build_graph",
            inputs: &[],
            outputs: &[ArtifactId::Graph],
            invariants: "all labels resolved, edges bidirectional",
        },
        PassId::Optimize => PassDescriptor {
            name: "optimize",
            inputs: &[PassId::BuildGraph],
            outputs: &[ArtifactId::Graph],
            invariants: "stub/branch/return passes at joint fixpoint",
        },
        PassId::BuildLvars => PassDescriptor {
            name: "build_lvars",
            inputs: &[PassId::Optimize],
            outputs: &[ArtifactId::Lvars],
            invariants: "interference graph covers all live pairs",
        },
        PassId::ResolveStores => PassDescriptor {
            name: "resolve_stores",
            inputs: &[PassId::Optimize],
            outputs: &[ArtifactId::Graph],
            invariants: "no maybe-store ops remain",
        },
        PassId::Order => PassDescriptor {
            name: "order",
            inputs: &[PassId::ResolveStores],
            outputs: &[ArtifactId::Order],
            invariants: "order is a permutation of live nodes",
        },
        PassId::Linearize => PassDescriptor {
            name: "linearize",
            inputs: &[PassId::Order],
            outputs: &[ArtifactId::Linear],
            invariants: "every referenced label is emitted exactly once",
        },
    }
}

// ── Dependency resolution ──────────────────────────────────────────────────

/// All 6 pass IDs in declaration order (used for iteration).
pub const ALL_PASSES: [PassId; 6] = [
    PassId::BuildGraph,
    PassId::Optimize,
    PassId::BuildLvars,
    PassId::ResolveStores,
    PassId::Order,
    PassId::Linearize,
];

/// Compute the minimal ordered set of passes needed to produce `terminal`.
/// Returns passes in topological (execution) order.
pub fn required_passes(terminal: PassId) -> Vec<PassId> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(terminal, &mut visited, &mut order);
    order
}

fn visit(id: PassId, visited: &mut HashSet<PassId>, order: &mut Vec<PassId>) {
    if !visited.insert(id) {
        return;
    }
    for &dep in descriptor(id).inputs {
        visit(dep, visited, order);
    }
    order.push(id);
}

// ── Stage certificates ─────────────────────────────────────────────────────

/// Machine-checkable evidence that a pass's postconditions hold.
pub trait StageCert {
    fn all_pass(&self) -> bool;
    fn obligations(&self) -> Vec<(&'static str, bool)>;
}

/// Names of the failed obligations, for diagnostics.
pub fn failed_obligations(cert: &dyn StageCert) -> Vec<&'static str> {
    cert.obligations()
        .iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| *name)
        .collect()
}

// ── Tests ──────────────────────────────────────────────────────────────────
