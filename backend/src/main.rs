use clap::Parser;
use std::path::PathBuf;

use rkb::diag::Diagnostic;
use rkb::graph::AsmGraph;
use rkb::listing::{format_code, format_locator};
use rkb::liveness::calc_liveness;
use rkb::pass::PassId;
use rkb::pipeline::{compute_provenance, run_backend, BackendState};
use rkb::registry::Registry;

#[derive(Debug, Clone, clap::ValueEnum)]
enum EmitStage {
    Linear,
    Cfg,
    Dot,
    Lvars,
    Liveness,
    BuildInfo,
    Manifest,
}

#[derive(Parser, Debug)]
#[command(
    name = "rkb",
    version,
    about = "rkc assembly back-end — lowers .rasm pseudo-assembly listings to linear 6502 code"
)]
struct Cli {
    /// Input .rasm listing
    source: PathBuf,

    /// Output file path (stdout when omitted)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Function metadata manifest (fns.meta.json)
    #[arg(long)]
    fn_meta: Option<PathBuf>,

    /// Output stage
    #[arg(long, value_enum, default_value_t = EmitStage::Linear)]
    emit: EmitStage,

    /// Print back-end passes and timing
    #[arg(long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.verbose {
        eprintln!("rkb: source = {}", cli.source.display());
        eprintln!("rkb: emit   = {:?}", cli.emit);
    }

    let source = match std::fs::read_to_string(&cli.source) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("rkb: error: cannot read {}: {}", cli.source.display(), e);
            std::process::exit(2);
        }
    };

    // ── Parse the listing ──
    let parsed = rkb::listing::parse(&source);
    report_diagnostics(&parsed.errors);
    let Some(mut listing) = parsed.listing else {
        std::process::exit(1);
    };

    // ── Merge external function metadata ──
    if let Some(path) = &cli.fn_meta {
        match listing.registry.load_manifest(path) {
            Ok(n) => {
                if cli.verbose {
                    eprintln!("rkb: loaded {} summaries from {}", n, path.display());
                }
            }
            Err(e) => {
                eprintln!("rkb: error: {}", e);
                std::process::exit(2);
            }
        }
    }

    let terminal = match cli.emit {
        EmitStage::Linear => PassId::Linearize,
        EmitStage::Cfg | EmitStage::Dot => PassId::Optimize,
        EmitStage::Lvars | EmitStage::Liveness => PassId::BuildLvars,
        EmitStage::BuildInfo | EmitStage::Manifest => PassId::BuildGraph,
    };

    let mut state = BackendState::new(listing);
    state.provenance = Some(compute_provenance(
        &source,
        &state.listing.registry,
    ));

    let run = run_backend(&mut state, terminal, cli.verbose, |_, diags| {
        report_diagnostics(diags);
    });
    if run.is_err() {
        std::process::exit(1);
    }

    let out = render(&cli.emit, &state);
    match &cli.output {
        Some(path) => {
            if let Err(e) = std::fs::write(path, out) {
                eprintln!("rkb: error: cannot write {}: {}", path.display(), e);
                std::process::exit(2);
            }
        }
        None => print!("{out}"),
    }
}

fn report_diagnostics(diags: &[Diagnostic]) {
    for diag in diags {
        eprintln!("rkb: {}", diag);
    }
}

fn render(emit: &EmitStage, state: &BackendState) -> String {
    let registry = &state.listing.registry;
    match emit {
        EmitStage::Linear => format_code(state.linear.as_ref().unwrap(), registry),
        EmitStage::Dot => rkb::dot::emit_dot(state.graph.as_ref().unwrap(), registry),
        EmitStage::Cfg => render_cfg(state.graph.as_ref().unwrap(), registry),
        EmitStage::Lvars => render_lvars(state),
        EmitStage::Liveness => render_liveness(state),
        EmitStage::BuildInfo => state.provenance.as_ref().unwrap().to_json(),
        EmitStage::Manifest => registry.generate_manifest(),
    }
}

/// Textual block dump, one paragraph per node.
fn render_cfg(graph: &AsmGraph, registry: &Registry) -> String {
    use std::fmt::Write;
    let mut out = String::new();
    for id in graph.node_ids() {
        let node = graph.node(id);
        write!(out, "block n{}", id.0).unwrap();
        if node.label.is_some() {
            write!(out, " ({})", format_locator(&node.label, registry)).unwrap();
        }
        writeln!(out, ":").unwrap();
        out.push_str(&format_code(&node.code, registry));
        if let Some(term) = node.output_inst {
            writeln!(out, "  terminator: {}", term.op.mn.name()).unwrap();
        }
        let outputs: Vec<String> = node
            .outputs()
            .iter()
            .map(|edge| {
                let target = edge.target();
                if edge.case_value >= 0 {
                    format!("n{} (case {})", target.0, edge.case_value)
                } else {
                    format!("n{}", target.0)
                }
            })
            .collect();
        if !outputs.is_empty() {
            writeln!(out, "  outputs: {}", outputs.join(", ")).unwrap();
        }
        writeln!(out).unwrap();
    }
    out
}

fn render_lvars(state: &BackendState) -> String {
    use std::fmt::Write;
    let registry = &state.listing.registry;
    let lvars = state.lvars.as_ref().unwrap();
    let mut out = String::new();
    for (i, loc) in lvars.map().iter() {
        let interferes: Vec<String> = lvars
            .map()
            .iter()
            .filter(|&(j, _)| lvars.interferes(i, j))
            .map(|(_, other)| format_locator(&other, registry))
            .collect();
        let mut fns: Vec<String> = lvars
            .fn_interferences(i)
            .iter()
            .map(|&f| registry.fn_meta(f).name.clone())
            .collect();
        fns.sort();
        writeln!(
            out,
            "{}: interferes=[{}] across=[{}]",
            format_locator(&loc, registry),
            interferes.join(", "),
            fns.join(", "),
        )
        .unwrap();
    }
    out
}

fn render_liveness(state: &BackendState) -> String {
    use std::fmt::Write;
    let registry = &state.listing.registry;
    let graph = state.graph.as_ref().unwrap();
    let lvars = state.lvars.as_ref().unwrap();
    let fun = registry.fn_meta(state.fun).clone();
    let live = calc_liveness(graph, &fun, registry, lvars.map());

    let names = |bits: &bitvec::vec::BitVec| -> String {
        bits.iter_ones()
            .map(|i| format_locator(&lvars.map().get(i), registry))
            .collect::<Vec<_>>()
            .join(", ")
    };

    let mut out = String::new();
    for id in graph.node_ids() {
        writeln!(
            out,
            "n{}: in=[{}] out=[{}]",
            id.0,
            names(live.live_in(id)),
            names(live.live_out(id)),
        )
        .unwrap();
    }
    out
}
