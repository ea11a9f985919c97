// locator.rs — Symbolic operand values
//
// A `Locator` identifies what an instruction operand refers to: a label,
// an argument or return slot, a global memory member, a function, a jump
// table, or a constant byte. Locators are small value types: they are
// compared, hashed, and used as map keys throughout the back-end.
//
// Preconditions: none (types only).
// Postconditions: none (types only).
// Failure modes: none.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Handle types ─────────────────────────────────────────────────────────

/// Stable identifier for a function known to the back-end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FnId(pub u32);

/// Handle of a node in the higher-level IR control-flow graph.
///
/// The back-end never inspects the IR graph itself; CFG handles only feed
/// loop-depth lookups and jump-table naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CfgId(pub u32);

/// Stable identifier for a global memory member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GmemberId(pub u32);

// ── Locator class ────────────────────────────────────────────────────────

/// Discriminant of a locator, without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocClass {
    None,
    MinorLabel,
    CfgLabel,
    Arg,
    Return,
    Gmember,
    Fn,
    SwitchLoTable,
    SwitchHiTable,
    ConstByte,
}

/// Indirection tag: how the locator's value is consumed.
///
/// `Ptr` / `PtrHi` mark jump-table entries holding the low or high byte
/// of a code pointer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Is {
    #[default]
    Value,
    Ptr,
    PtrHi,
}

// ── Locator ──────────────────────────────────────────────────────────────

/// Payload of a locator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LocKind {
    None,
    /// Compiler-internal label, renumbered freely by the linearizer.
    MinorLabel(u32),
    /// Entry label of an IR CFG node. Index 0 is the primary entry;
    /// higher indices are extra entrances of the same node.
    CfgLabel { cfg: CfgId, index: u32 },
    /// Argument slot of a function.
    Arg { fun: FnId, index: u8 },
    /// Return slot of a function.
    Return { fun: FnId },
    /// Global memory member.
    Gmember(GmemberId),
    /// A function itself (entry label or call target).
    Fn(FnId),
    /// Low-byte jump table of a switch in the given CFG node.
    SwitchLoTable(CfgId),
    /// High-byte jump table of a switch in the given CFG node.
    SwitchHiTable(CfgId),
    /// Constant byte (table filler, immediates).
    ConstByte(u8),
}

/// A symbolic operand: payload plus byte offset and indirection tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator {
    pub kind: LocKind,
    pub offset: i16,
    pub is: Is,
}

impl Locator {
    pub const NONE: Locator = Locator {
        kind: LocKind::None,
        offset: 0,
        is: Is::Value,
    };

    fn of(kind: LocKind) -> Self {
        Self {
            kind,
            offset: 0,
            is: Is::Value,
        }
    }

    pub fn minor_label(index: u32) -> Self {
        Self::of(LocKind::MinorLabel(index))
    }

    pub fn cfg_label(cfg: CfgId, index: u32) -> Self {
        Self::of(LocKind::CfgLabel { cfg, index })
    }

    pub fn arg(fun: FnId, index: u8) -> Self {
        Self::of(LocKind::Arg { fun, index })
    }

    pub fn ret(fun: FnId) -> Self {
        Self::of(LocKind::Return { fun })
    }

    pub fn gmember(id: GmemberId) -> Self {
        Self::of(LocKind::Gmember(id))
    }

    pub fn function(fun: FnId) -> Self {
        Self::of(LocKind::Fn(fun))
    }

    pub fn switch_lo_table(cfg: CfgId) -> Self {
        Self::of(LocKind::SwitchLoTable(cfg))
    }

    pub fn switch_hi_table(cfg: CfgId) -> Self {
        Self::of(LocKind::SwitchHiTable(cfg))
    }

    pub fn const_byte(b: u8) -> Self {
        Self::of(LocKind::ConstByte(b))
    }

    pub fn lclass(&self) -> LocClass {
        match self.kind {
            LocKind::None => LocClass::None,
            LocKind::MinorLabel(_) => LocClass::MinorLabel,
            LocKind::CfgLabel { .. } => LocClass::CfgLabel,
            LocKind::Arg { .. } => LocClass::Arg,
            LocKind::Return { .. } => LocClass::Return,
            LocKind::Gmember(_) => LocClass::Gmember,
            LocKind::Fn(_) => LocClass::Fn,
            LocKind::SwitchLoTable(_) => LocClass::SwitchLoTable,
            LocKind::SwitchHiTable(_) => LocClass::SwitchHiTable,
            LocKind::ConstByte(_) => LocClass::ConstByte,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self.kind, LocKind::None)
    }

    pub fn is_some(&self) -> bool {
        !self.is_none()
    }

    /// CFG handle carried by this locator, if any.
    pub fn cfg_node(&self) -> Option<CfgId> {
        match self.kind {
            LocKind::CfgLabel { cfg, .. }
            | LocKind::SwitchLoTable(cfg)
            | LocKind::SwitchHiTable(cfg) => Some(cfg),
            _ => None,
        }
    }

    /// Function handle carried by this locator, if any.
    pub fn fn_id(&self) -> Option<FnId> {
        match self.kind {
            LocKind::Arg { fun, .. } | LocKind::Return { fun } | LocKind::Fn(fun) => Some(fun),
            _ => None,
        }
    }

    /// True for locator classes that carry a function handle.
    pub fn has_fn(&self) -> bool {
        self.fn_id().is_some()
    }

    /// True if this locator can serve as a block label.
    pub fn is_label(&self) -> bool {
        matches!(
            self.lclass(),
            LocClass::MinorLabel
                | LocClass::CfgLabel
                | LocClass::Fn
                | LocClass::SwitchLoTable
                | LocClass::SwitchHiTable
        )
    }

    pub fn with_is(mut self, is: Is) -> Self {
        self.is = is;
        self
    }

    pub fn with_advance_offset(mut self, n: i16) -> Self {
        self.offset += n;
        self
    }

    pub fn advance_offset(&mut self, n: i16) {
        self.offset += n;
    }

    /// The memory head of this locator: offset and indirection stripped.
    ///
    /// Two operands address the same variable iff their heads are equal.
    pub fn mem_head(&self) -> Self {
        Self::of(self.kind)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            LocKind::None => write!(f, "-")?,
            LocKind::MinorLabel(n) => write!(f, "__L{n}")?,
            LocKind::CfgLabel { cfg, index } => {
                if index == 0 {
                    write!(f, "c{}", cfg.0)?
                } else {
                    write!(f, "c{}_{}", cfg.0, index)?
                }
            }
            LocKind::Arg { fun, index } => write!(f, "arg(f{},{})", fun.0, index)?,
            LocKind::Return { fun } => write!(f, "ret(f{})", fun.0)?,
            LocKind::Gmember(g) => write!(f, "g{}", g.0)?,
            LocKind::Fn(fun) => write!(f, "f{}", fun.0)?,
            LocKind::SwitchLoTable(cfg) => write!(f, "__switch_lo_{}", cfg.0)?,
            LocKind::SwitchHiTable(cfg) => write!(f, "__switch_hi_{}", cfg.0)?,
            LocKind::ConstByte(b) => write!(f, "#${b:02x}")?,
        }
        if self.offset != 0 {
            write!(f, "{:+}", self.offset)?;
        }
        match self.is {
            Is::Value => {}
            Is::Ptr => write!(f, ".lo")?,
            Is::PtrHi => write!(f, ".hi")?,
        }
        Ok(())
    }
}
