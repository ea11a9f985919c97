// pipeline.rs — Back-end state and pass orchestration
//
// Holds all pass artifacts and runs the minimal set of passes for a given
// terminal PassId, with per-pass timing and post-pass verification.
//
// Preconditions: a parsed Listing must be supplied.
// Postconditions: artifacts for all required passes are populated, or
//                 has_error is set.
// Failure modes: construction errors or cert failures in any pass.
// Side effects: calls on_pass_complete after each pass for immediate
//               display; verbose mode prints timing to stderr.

use std::time::Instant;

use sha2::{Digest, Sha256};

use crate::diag::{codes, DiagLevel, Diagnostic, Span};
use crate::graph::{verify_graph, AsmGraph, NodeId};
use crate::inst::AsmInst;
use crate::layout;
use crate::linear::to_linear;
use crate::listing::Listing;
use crate::locator::{FnId, LocKind};
use crate::lvars::{build_lvars, LvarsManager};
use crate::maybe_store::{remove_maybes, verify_no_maybe_stores};
use crate::optimize::optimize;
use crate::pass::{descriptor, failed_obligations, required_passes, PassId, StageCert};
use crate::registry::Registry;

// ── Provenance ─────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic builds and cache-key use.
///
/// `source_hash`: SHA-256 of the raw listing text.
/// `registry_fingerprint`: SHA-256 of `Registry::canonical_json()`.
/// `compiler_version`: crate version from `Cargo.toml`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub source_hash: [u8; 32],
    pub registry_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    /// Hex string of the source hash (64 characters).
    pub fn source_hash_hex(&self) -> String {
        bytes_to_hex(&self.source_hash)
    }

    /// Hex string of the registry fingerprint (64 characters).
    pub fn registry_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.registry_fingerprint)
    }

    /// Serialize provenance as a JSON string for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"source_hash\": \"{}\",\n  \"registry_fingerprint\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.source_hash_hex(),
            self.registry_fingerprint_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&result);
    hash
}

/// Compute provenance from listing text and registry.
///
/// The registry fingerprint is computed from `Registry::canonical_json()`
/// (compact JSON, sorted) to ensure stability independent of insertion
/// order.
pub fn compute_provenance(source: &str, registry: &Registry) -> Provenance {
    Provenance {
        source_hash: sha256(source.as_bytes()),
        registry_fingerprint: sha256(registry.canonical_json().as_bytes()),
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Back-end state ─────────────────────────────────────────────────────────

/// Holds the parsed listing, all pass artifacts, and accumulated
/// diagnostics.
#[derive(Debug)]
pub struct BackendState {
    pub listing: Listing,
    /// The function the listing lowers (from the entry locator).
    pub fun: FnId,
    pub graph: Option<AsmGraph>,
    pub lvars: Option<LvarsManager>,
    pub order: Option<Vec<NodeId>>,
    pub linear: Option<Vec<AsmInst>>,
    pub diagnostics: Vec<Diagnostic>,
    pub has_error: bool,
    pub provenance: Option<Provenance>,
}

impl BackendState {
    pub fn new(listing: Listing) -> Self {
        let fun = match listing.entry.kind {
            LocKind::Fn(fun) => fun,
            _ => unreachable!("listing entry is always a function locator"),
        };
        Self {
            listing,
            fun,
            graph: None,
            lvars: None,
            order: None,
            linear: None,
            diagnostics: Vec::new(),
            has_error: false,
            provenance: None,
        }
    }
}

// ── Error type ─────────────────────────────────────────────────────────────

/// Pipeline execution failed due to error-level diagnostics in a pass.
/// The specific diagnostics are available in `BackendState.diagnostics`.
#[derive(Debug)]
pub struct PipelineError {
    /// The pass that produced the error.
    pub failing_pass: PassId,
}

// ── Per-pass post-processing ───────────────────────────────────────────────

fn finish_pass(
    state: &mut BackendState,
    pass_id: PassId,
    diags: Vec<Diagnostic>,
    elapsed: std::time::Duration,
    verbose: bool,
    on_pass_complete: &mut impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    on_pass_complete(pass_id, &diags);
    let is_err = crate::diag::has_errors(&diags);
    state.diagnostics.extend(diags);
    if verbose {
        eprintln!(
            "rkb: {} complete, {:.1}ms",
            descriptor(pass_id).name,
            elapsed.as_secs_f64() * 1000.0
        );
    }
    if is_err {
        state.has_error = true;
        return Err(PipelineError {
            failing_pass: pass_id,
        });
    }
    Ok(())
}

fn cert_diag(code: crate::diag::DiagCode, what: &str, cert: &dyn StageCert) -> Diagnostic {
    Diagnostic::new(
        DiagLevel::Error,
        Span::none(),
        format!(
            "{} verification failed: {}",
            what,
            failed_obligations(cert).join(", ")
        ),
    )
    .with_code(code)
}

// ── Pipeline runner ────────────────────────────────────────────────────────

/// Run the minimal set of passes to produce `terminal`.
///
/// Per-pass sequence: execute → verify → on_pass_complete(callback) →
/// verbose → error check.
pub fn run_backend(
    state: &mut BackendState,
    terminal: PassId,
    verbose: bool,
    mut on_pass_complete: impl FnMut(PassId, &[Diagnostic]),
) -> Result<(), PipelineError> {
    let passes = required_passes(terminal);

    for &pass_id in &passes {
        match pass_id {
            PassId::BuildGraph => {
                let t = Instant::now();
                let mut diags = Vec::new();
                let mut graph = AsmGraph::new(state.listing.entry);
                let built = graph
                    .append_code(&state.listing.code, &state.listing.registry)
                    .and_then(|()| graph.finish_appending());
                match built {
                    Ok(()) => {
                        let cert = verify_graph(&graph);
                        if !cert.all_pass() {
                            diags.push(cert_diag(codes::E0500, "graph", &cert));
                        }
                        state.graph = Some(graph);
                    }
                    Err(diag) => diags.push(diag),
                }
                finish_pass(
                    state,
                    PassId::BuildGraph,
                    diags,
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Optimize => {
                let t = Instant::now();
                let graph = state.graph.as_mut().unwrap();
                optimize(graph);
                let cert = verify_graph(graph);
                let mut diags = Vec::new();
                if !cert.all_pass() {
                    diags.push(cert_diag(codes::E0500, "graph", &cert));
                }
                finish_pass(
                    state,
                    PassId::Optimize,
                    diags,
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::BuildLvars => {
                let t = Instant::now();
                let graph = state.graph.as_ref().unwrap();
                state.lvars = Some(build_lvars(graph, state.fun, &state.listing.registry));
                finish_pass(
                    state,
                    PassId::BuildLvars,
                    Vec::new(),
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::ResolveStores => {
                let t = Instant::now();
                let graph = state.graph.as_mut().unwrap();
                remove_maybes(graph, state.fun, &state.listing.registry);
                let cert = verify_no_maybe_stores(graph);
                let mut diags = Vec::new();
                if !cert.all_pass() {
                    diags.push(cert_diag(codes::E0501, "store resolution", &cert));
                }
                finish_pass(
                    state,
                    PassId::ResolveStores,
                    diags,
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Order => {
                let t = Instant::now();
                let graph = state.graph.as_ref().unwrap();
                state.order = Some(layout::order(graph, &state.listing.registry));
                finish_pass(
                    state,
                    PassId::Order,
                    Vec::new(),
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
            PassId::Linearize => {
                let t = Instant::now();
                let graph = state.graph.as_mut().unwrap();
                let order = state.order.as_ref().unwrap();
                state.linear = Some(to_linear(graph, order));
                finish_pass(
                    state,
                    PassId::Linearize,
                    Vec::new(),
                    t.elapsed(),
                    verbose,
                    &mut on_pass_complete,
                )?;
            }
        }
    }
    Ok(())
}

/// Parse a listing and run the whole back-end. Convenience wrapper for
/// tests and simple callers; the CLI drives `run_backend` directly.
pub fn assemble(source: &str) -> Result<BackendState, Vec<Diagnostic>> {
    let parsed = crate::listing::parse(source);
    let Some(listing) = parsed.listing else {
        return Err(parsed.errors);
    };
    let mut state = BackendState::new(listing);
    state.provenance = Some(compute_provenance(source, &state.listing.registry));
    match run_backend(&mut state, PassId::Linearize, false, |_, _| {}) {
        Ok(()) => Ok(state),
        Err(_) => Err(state.diagnostics),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inst::Op;

    const SIMPLE: &str = "\
.fn main
.gmember counter
.entry main

main:
    lda #1
    sta counter
    rts
";

    #[test]
    fn assemble_simple_listing() {
        let state = assemble(SIMPLE).unwrap();
        let linear = state.linear.unwrap();
        assert_eq!(linear[0].op, Op::LABEL);
        assert!(linear.iter().any(|i| i.op == Op::RTS));
    }

    #[test]
    fn required_artifacts_only() {
        let parsed = crate::listing::parse(SIMPLE);
        let mut state = BackendState::new(parsed.listing.unwrap());
        run_backend(&mut state, PassId::Optimize, false, |_, _| {}).unwrap();
        assert!(state.graph.is_some());
        assert!(state.order.is_none());
        assert!(state.linear.is_none());
        assert!(state.lvars.is_none());
    }

    #[test]
    fn missing_label_fails_build_graph() {
        let source = "\
.fn main
.entry main

main:
    jmp nowhere
";
        let err = assemble(source).unwrap_err();
        assert!(err.iter().any(|d| d.code == Some(codes::E0201)));
    }

    #[test]
    fn pass_callback_fires_in_order() {
        let parsed = crate::listing::parse(SIMPLE);
        let mut state = BackendState::new(parsed.listing.unwrap());
        let mut seen = Vec::new();
        run_backend(&mut state, PassId::Linearize, false, |id, _| seen.push(id)).unwrap();
        assert_eq!(
            seen,
            vec![
                PassId::BuildGraph,
                PassId::Optimize,
                PassId::ResolveStores,
                PassId::Order,
                PassId::Linearize,
            ]
        );
    }

    #[test]
    fn provenance_is_stable() {
        let a = assemble(SIMPLE).unwrap();
        let b = assemble(SIMPLE).unwrap();
        assert_eq!(
            a.provenance.as_ref().unwrap().source_hash,
            b.provenance.as_ref().unwrap().source_hash
        );
        assert_eq!(
            a.provenance.as_ref().unwrap().registry_fingerprint,
            b.provenance.as_ref().unwrap().registry_fingerprint
        );
    }
}
