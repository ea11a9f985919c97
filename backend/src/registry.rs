// registry.rs — Function, memory, and CFG metadata consumed by the back-end
//
// The back-end does not see the front half of the compiler. Everything it
// needs to know about the surrounding program — function summaries (reads,
// writes, argument counts), global memory members and their groups, IR CFG
// loop depths, and per-switch case tables — arrives through this registry.
// Metadata is populated from listing directives, from a JSON manifest
// (`fns.meta.json` schema v1), or directly by tests.
//
// Preconditions: none.
// Postconditions: ids are dense indices, assigned in insertion order.
// Failure modes: manifest I/O and schema errors → `RegistryError`.
// Side effects: `load_manifest` reads the filesystem.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::locator::{CfgId, FnId, GmemberId, Locator};

// ── Metadata types ───────────────────────────────────────────────────────

/// Stable identifier for a variable group (gmembers that share storage
/// lifetime decisions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub u32);

/// Function classification. `Mode` functions are entered by state switch
/// and never return; their memory effects are summarized by precheck
/// groups rather than read/write sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FnClass {
    Fn,
    Mode,
}

/// Summary of one function, as the back-end sees it.
#[derive(Debug, Clone)]
pub struct FnMeta {
    pub name: String,
    pub fclass: FnClass,
    pub args: u8,
    pub returns: u8,
    /// Gmembers the function may read.
    pub reads: HashSet<GmemberId>,
    /// Gmembers the function may write.
    pub writes: HashSet<GmemberId>,
    /// For `Mode` functions: groups touched before entry is committed.
    pub precheck_groups: HashSet<GroupId>,
}

impl FnMeta {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fclass: FnClass::Fn,
            args: 0,
            returns: 0,
            reads: HashSet::new(),
            writes: HashSet::new(),
            precheck_groups: HashSet::new(),
        }
    }
}

/// A global memory member and the group it belongs to.
#[derive(Debug, Clone)]
pub struct GmemberMeta {
    pub name: String,
    pub group: GroupId,
}

/// Case table of one switch terminator: `(case value, target label)`
/// pairs in selector order.
#[derive(Debug, Clone, Default)]
pub struct SwitchTable {
    pub cases: Vec<(u8, Locator)>,
}

// ── Errors ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum RegistryError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        file: PathBuf,
        message: String,
    },
    DuplicateFn {
        name: String,
    },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::IoError { path, source } => {
                write!(f, "cannot read {}: {}", path.display(), source)
            }
            RegistryError::ParseError { file, message } => {
                write!(f, "{}: {}", file.display(), message)
            }
            RegistryError::DuplicateFn { name } => {
                write!(f, "duplicate function summary '{}'", name)
            }
        }
    }
}

impl std::error::Error for RegistryError {}

// ── Registry ─────────────────────────────────────────────────────────────

/// All external-program metadata, keyed by dense ids.
#[derive(Debug, Default)]
pub struct Registry {
    fns: Vec<FnMeta>,
    fn_index: HashMap<String, FnId>,
    gmembers: Vec<GmemberMeta>,
    gmember_index: HashMap<String, GmemberId>,
    groups: Vec<String>,
    group_index: HashMap<String, GroupId>,
    cfg_depths: HashMap<CfgId, u32>,
    switch_tables: HashMap<CfgId, SwitchTable>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Functions ────────────────────────────────────────────────────

    /// Insert a function summary. Errors if the name is already taken.
    pub fn insert_fn(&mut self, meta: FnMeta) -> Result<FnId, RegistryError> {
        if self.fn_index.contains_key(&meta.name) {
            return Err(RegistryError::DuplicateFn {
                name: meta.name.clone(),
            });
        }
        let id = FnId(self.fns.len() as u32);
        self.fn_index.insert(meta.name.clone(), id);
        self.fns.push(meta);
        Ok(id)
    }

    pub fn fn_id(&self, name: &str) -> Option<FnId> {
        self.fn_index.get(name).copied()
    }

    pub fn fn_meta(&self, id: FnId) -> &FnMeta {
        &self.fns[id.0 as usize]
    }

    pub fn fns(&self) -> impl Iterator<Item = (FnId, &FnMeta)> {
        self.fns
            .iter()
            .enumerate()
            .map(|(i, m)| (FnId(i as u32), m))
    }

    /// Argument-slot locators of `fun` that are referenced by name
    /// anywhere in the program, so must occupy distinct storage.
    pub fn referenced_param_locators(&self, fun: FnId) -> impl Iterator<Item = Locator> + '_ {
        let args = self.fn_meta(fun).args;
        (0..args).map(move |i| Locator::arg(fun, i))
    }

    // ── Gmembers and groups ──────────────────────────────────────────

    /// Intern a gmember, creating it (in the given group) on first use.
    pub fn intern_gmember(&mut self, name: &str, group: &str) -> GmemberId {
        if let Some(&id) = self.gmember_index.get(name) {
            return id;
        }
        let group = self.intern_group(group);
        let id = GmemberId(self.gmembers.len() as u32);
        self.gmember_index.insert(name.to_string(), id);
        self.gmembers.push(GmemberMeta {
            name: name.to_string(),
            group,
        });
        id
    }

    pub fn gmember_id(&self, name: &str) -> Option<GmemberId> {
        self.gmember_index.get(name).copied()
    }

    pub fn gmember_meta(&self, id: GmemberId) -> &GmemberMeta {
        &self.gmembers[id.0 as usize]
    }

    pub fn gmember_group(&self, id: GmemberId) -> GroupId {
        self.gmembers[id.0 as usize].group
    }

    pub fn intern_group(&mut self, name: &str) -> GroupId {
        if let Some(&id) = self.group_index.get(name) {
            return id;
        }
        let id = GroupId(self.groups.len() as u32);
        self.group_index.insert(name.to_string(), id);
        self.groups.push(name.to_string());
        id
    }

    pub fn group_id(&self, name: &str) -> Option<GroupId> {
        self.group_index.get(name).copied()
    }

    // ── CFG shape ────────────────────────────────────────────────────

    pub fn set_loop_depth(&mut self, cfg: CfgId, depth: u32) {
        self.cfg_depths.insert(cfg, depth);
    }

    /// Loop-nest depth of a CFG node; 0 if undeclared.
    pub fn loop_depth(&self, cfg: CfgId) -> u32 {
        self.cfg_depths.get(&cfg).copied().unwrap_or(0)
    }

    /// Loop-nest depth of the edge between two CFG nodes: 0 for an edge
    /// to self, otherwise the depth of the shallower endpoint.
    pub fn edge_depth(&self, a: CfgId, b: CfgId) -> u32 {
        if a == b {
            0
        } else {
            self.loop_depth(a).min(self.loop_depth(b))
        }
    }

    // ── Switch tables ────────────────────────────────────────────────

    pub fn set_switch_table(&mut self, cfg: CfgId, table: SwitchTable) {
        self.switch_tables.insert(cfg, table);
    }

    pub fn switch_table(&self, cfg: CfgId) -> Option<&SwitchTable> {
        self.switch_tables.get(&cfg)
    }

    pub fn switch_tables(&self) -> &HashMap<CfgId, SwitchTable> {
        &self.switch_tables
    }

    // ── Manifest ─────────────────────────────────────────────────────

    /// Load summaries from a JSON manifest file (`fns.meta.json`
    /// schema v1). Returns the number of functions loaded.
    pub fn load_manifest(&mut self, path: &Path) -> Result<usize, RegistryError> {
        let source = std::fs::read_to_string(path).map_err(|e| RegistryError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.load_manifest_str(&source).map_err(|message| {
            RegistryError::ParseError {
                file: path.to_path_buf(),
                message,
            }
        })
    }

    /// Load summaries from manifest JSON text.
    pub fn load_manifest_str(&mut self, source: &str) -> Result<usize, String> {
        let manifest: Manifest =
            serde_json::from_str(source).map_err(|e| format!("invalid manifest JSON: {}", e))?;

        if manifest.schema != 1 {
            return Err(format!(
                "invalid fn metadata schema (expected: 1, found: {})",
                manifest.schema
            ));
        }

        for gm in &manifest.gmembers {
            self.intern_gmember(&gm.name, gm.group.as_deref().unwrap_or("default"));
        }
        for cfg in &manifest.cfg_nodes {
            self.set_loop_depth(CfgId(cfg.id), cfg.depth);
        }

        let count = manifest.fns.len();
        for f in manifest.fns {
            let mut meta = FnMeta::new(&f.name);
            meta.fclass = f.class;
            meta.args = f.args;
            meta.returns = f.returns;
            for name in &f.reads {
                let id = self.intern_gmember(name, "default");
                meta.reads.insert(id);
            }
            for name in &f.writes {
                let id = self.intern_gmember(name, "default");
                meta.writes.insert(id);
            }
            for name in &f.groups {
                let id = self.intern_group(name);
                meta.precheck_groups.insert(id);
            }
            self.insert_fn(meta).map_err(|e| e.to_string())?;
        }

        Ok(count)
    }

    /// Pretty-printed manifest for display and `--emit manifest`-style
    /// tooling.
    pub fn generate_manifest(&self) -> String {
        serde_json::to_string_pretty(&self.build_manifest())
            .expect("manifest serialization should not fail")
    }

    /// Compact canonical JSON for fingerprint computation. Sorted by
    /// name so the hash is independent of insertion order.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(&self.build_manifest())
            .expect("manifest serialization should not fail")
    }

    fn build_manifest(&self) -> Manifest {
        let mut fns: Vec<ManifestFn> = self
            .fns
            .iter()
            .map(|meta| {
                let mut reads: Vec<String> = meta
                    .reads
                    .iter()
                    .map(|&g| self.gmember_meta(g).name.clone())
                    .collect();
                reads.sort();
                let mut writes: Vec<String> = meta
                    .writes
                    .iter()
                    .map(|&g| self.gmember_meta(g).name.clone())
                    .collect();
                writes.sort();
                let mut groups: Vec<String> = meta
                    .precheck_groups
                    .iter()
                    .map(|&g| self.groups[g.0 as usize].clone())
                    .collect();
                groups.sort();
                ManifestFn {
                    name: meta.name.clone(),
                    class: meta.fclass,
                    args: meta.args,
                    returns: meta.returns,
                    reads,
                    writes,
                    groups,
                }
            })
            .collect();
        fns.sort_by(|a, b| a.name.cmp(&b.name));

        let mut gmembers: Vec<ManifestGmember> = self
            .gmembers
            .iter()
            .map(|gm| ManifestGmember {
                name: gm.name.clone(),
                group: Some(self.groups[gm.group.0 as usize].clone()),
            })
            .collect();
        gmembers.sort_by(|a, b| a.name.cmp(&b.name));

        let mut cfg_nodes: Vec<ManifestCfg> = self
            .cfg_depths
            .iter()
            .map(|(&cfg, &depth)| ManifestCfg { id: cfg.0, depth })
            .collect();
        cfg_nodes.sort_by_key(|c| c.id);

        Manifest {
            schema: 1,
            fns,
            gmembers,
            cfg_nodes,
        }
    }
}

// ── Manifest (fns.meta.json) ─────────────────────────────────────────────

/// Top-level structure of `fns.meta.json` (schema v1).
#[derive(Debug, Serialize, Deserialize)]
pub struct Manifest {
    pub schema: u32,
    #[serde(default)]
    pub fns: Vec<ManifestFn>,
    #[serde(default)]
    pub gmembers: Vec<ManifestGmember>,
    #[serde(default)]
    pub cfg_nodes: Vec<ManifestCfg>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestFn {
    pub name: String,
    #[serde(default = "default_fn_class")]
    pub class: FnClass,
    #[serde(default)]
    pub args: u8,
    #[serde(default)]
    pub returns: u8,
    #[serde(default)]
    pub reads: Vec<String>,
    #[serde(default)]
    pub writes: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
}

fn default_fn_class() -> FnClass {
    FnClass::Fn
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestGmember {
    pub name: String,
    #[serde(default)]
    pub group: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ManifestCfg {
    pub id: u32,
    pub depth: u32,
}
