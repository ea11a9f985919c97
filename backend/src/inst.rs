// inst.rs — Target instruction set and per-op metadata
//
// The back-end works on 6502-family instructions plus a handful of
// pseudo-ops. An `Op` is a mnemonic paired with an addressing mode;
// everything a pass needs to know about an op (control-flow flags,
// register reads/writes, encoded size, branch inversion, tail-call
// transform) is answered here from closed match tables.
//
// Preconditions: none (types and pure tables).
// Postconditions: none.
// Failure modes: none.
// Side effects: none.

use crate::locator::Locator;

// ── Mnemonics ────────────────────────────────────────────────────────────

/// Instruction mnemonics: the 6502 subset emitted by instruction
/// selection, plus back-end pseudo mnemonics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mn {
    Lda,
    Ldx,
    Ldy,
    Sta,
    Stx,
    Sty,
    Adc,
    Sbc,
    And,
    Ora,
    Eor,
    Cmp,
    Cpx,
    Cpy,
    Inc,
    Dec,
    Asl,
    Lsr,
    Rol,
    Ror,
    Inx,
    Iny,
    Dex,
    Dey,
    Tax,
    Txa,
    Tay,
    Tya,
    Pha,
    Pla,
    Clc,
    Sec,
    Nop,
    Beq,
    Bne,
    Bcc,
    Bcs,
    Bmi,
    Bpl,
    Bvc,
    Bvs,
    Jmp,
    Jsr,
    Rts,
    Rti,
    /// Pseudo: block label definition. `arg` is the label locator.
    Label,
    /// Pseudo: raw data byte. `arg` is the value locator.
    Data,
    /// Pseudo: instruction removed by a pass; ignored downstream.
    Pruned,
    /// Pseudo: indirect jump through a pair of case tables.
    /// `arg`/`alt` are the low/high table locators.
    Switch,
    /// Pseudo: store the carry flag to memory.
    StoreC,
    /// Pseudo: store the zero flag to memory.
    StoreZ,
}

impl Mn {
    /// Listing mnemonic text. Pseudo mnemonics that have no listing
    /// spelling (labels) render through the formatter instead.
    pub fn name(self) -> &'static str {
        match self {
            Mn::Lda => "lda",
            Mn::Ldx => "ldx",
            Mn::Ldy => "ldy",
            Mn::Sta => "sta",
            Mn::Stx => "stx",
            Mn::Sty => "sty",
            Mn::Adc => "adc",
            Mn::Sbc => "sbc",
            Mn::And => "and",
            Mn::Ora => "ora",
            Mn::Eor => "eor",
            Mn::Cmp => "cmp",
            Mn::Cpx => "cpx",
            Mn::Cpy => "cpy",
            Mn::Inc => "inc",
            Mn::Dec => "dec",
            Mn::Asl => "asl",
            Mn::Lsr => "lsr",
            Mn::Rol => "rol",
            Mn::Ror => "ror",
            Mn::Inx => "inx",
            Mn::Iny => "iny",
            Mn::Dex => "dex",
            Mn::Dey => "dey",
            Mn::Tax => "tax",
            Mn::Txa => "txa",
            Mn::Tay => "tay",
            Mn::Tya => "tya",
            Mn::Pha => "pha",
            Mn::Pla => "pla",
            Mn::Clc => "clc",
            Mn::Sec => "sec",
            Mn::Nop => "nop",
            Mn::Beq => "beq",
            Mn::Bne => "bne",
            Mn::Bcc => "bcc",
            Mn::Bcs => "bcs",
            Mn::Bmi => "bmi",
            Mn::Bpl => "bpl",
            Mn::Bvc => "bvc",
            Mn::Bvs => "bvs",
            Mn::Jmp => "jmp",
            Mn::Jsr => "jsr",
            Mn::Rts => "rts",
            Mn::Rti => "rti",
            Mn::Label => "label",
            Mn::Data => ".byte",
            Mn::Pruned => "pruned",
            Mn::Switch => "switch",
            Mn::StoreC => "stc",
            Mn::StoreZ => "stz",
        }
    }

    /// Parse a listing mnemonic. Pseudo mnemonics with dedicated listing
    /// syntax (labels, directives) are not reachable through this path.
    pub fn parse(text: &str) -> Option<Mn> {
        Some(match text {
            "lda" => Mn::Lda,
            "ldx" => Mn::Ldx,
            "ldy" => Mn::Ldy,
            "sta" => Mn::Sta,
            "stx" => Mn::Stx,
            "sty" => Mn::Sty,
            "adc" => Mn::Adc,
            "sbc" => Mn::Sbc,
            "and" => Mn::And,
            "ora" => Mn::Ora,
            "eor" => Mn::Eor,
            "cmp" => Mn::Cmp,
            "cpx" => Mn::Cpx,
            "cpy" => Mn::Cpy,
            "inc" => Mn::Inc,
            "dec" => Mn::Dec,
            "asl" => Mn::Asl,
            "lsr" => Mn::Lsr,
            "rol" => Mn::Rol,
            "ror" => Mn::Ror,
            "inx" => Mn::Inx,
            "iny" => Mn::Iny,
            "dex" => Mn::Dex,
            "dey" => Mn::Dey,
            "tax" => Mn::Tax,
            "txa" => Mn::Txa,
            "tay" => Mn::Tay,
            "tya" => Mn::Tya,
            "pha" => Mn::Pha,
            "pla" => Mn::Pla,
            "clc" => Mn::Clc,
            "sec" => Mn::Sec,
            "nop" => Mn::Nop,
            "beq" => Mn::Beq,
            "bne" => Mn::Bne,
            "bcc" => Mn::Bcc,
            "bcs" => Mn::Bcs,
            "bmi" => Mn::Bmi,
            "bpl" => Mn::Bpl,
            "bvc" => Mn::Bvc,
            "bvs" => Mn::Bvs,
            "jmp" => Mn::Jmp,
            "jsr" => Mn::Jsr,
            "rts" => Mn::Rts,
            "rti" => Mn::Rti,
            "switch" => Mn::Switch,
            "stc" => Mn::StoreC,
            "stz" => Mn::StoreZ,
            _ => return None,
        })
    }
}

// ── Addressing modes ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddrMode {
    Implied,
    Immediate,
    Absolute,
    Relative,
    /// Zero-page-pointer indexed indirect. `arg` is the pointer low byte,
    /// `alt` the pointer high byte.
    IndirectY,
    /// Placeholder store: becomes `Absolute` or `Pruned` once liveness is
    /// known.
    Maybe,
}

/// True for addressing modes whose `alt` operand names a second memory
/// location (pointer high byte).
pub fn indirect_addr_mode(mode: AddrMode) -> bool {
    mode == AddrMode::IndirectY
}

// ── Op ───────────────────────────────────────────────────────────────────

/// An opcode: mnemonic plus addressing mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Op {
    pub mn: Mn,
    pub mode: AddrMode,
}

/// Control-flow and pass-relevant op attributes, queried as a bitmask.
pub mod flag {
    pub const JUMP: u8 = 1 << 0;
    pub const BRANCH: u8 = 1 << 1;
    pub const SWITCH: u8 = 1 << 2;
    pub const CALL: u8 = 1 << 3;
    pub const MAYBE_STORE: u8 = 1 << 4;
}

/// Register bitmask values for `input_regs` / `output_regs`.
pub mod regf {
    pub const A: u8 = 1 << 0;
    pub const X: u8 = 1 << 1;
    pub const Y: u8 = 1 << 2;
    pub const C: u8 = 1 << 3;
    pub const Z: u8 = 1 << 4;
    pub const N: u8 = 1 << 5;
    /// The memory operand itself.
    pub const M: u8 = 1 << 6;
}

impl Op {
    pub const fn new(mn: Mn, mode: AddrMode) -> Self {
        Self { mn, mode }
    }

    pub const JMP_ABS: Op = Op::new(Mn::Jmp, AddrMode::Absolute);
    pub const JSR_ABS: Op = Op::new(Mn::Jsr, AddrMode::Absolute);
    pub const RTS: Op = Op::new(Mn::Rts, AddrMode::Implied);
    pub const LABEL: Op = Op::new(Mn::Label, AddrMode::Implied);
    pub const DATA: Op = Op::new(Mn::Data, AddrMode::Implied);
    pub const PRUNED: Op = Op::new(Mn::Pruned, AddrMode::Implied);
    pub const SWITCH: Op = Op::new(Mn::Switch, AddrMode::IndirectY);

    pub fn flags(self) -> u8 {
        match self.mn {
            Mn::Jmp => flag::JUMP,
            Mn::Beq | Mn::Bne | Mn::Bcc | Mn::Bcs | Mn::Bmi | Mn::Bpl | Mn::Bvc | Mn::Bvs => {
                flag::BRANCH
            }
            Mn::Switch => flag::SWITCH,
            Mn::Jsr => flag::CALL,
            _ if self.mode == AddrMode::Maybe => flag::MAYBE_STORE,
            _ => 0,
        }
    }

    /// Encoded size in bytes. Pseudo-ops that emit nothing are size 0.
    pub fn size(self) -> u32 {
        match self.mn {
            Mn::Label | Mn::Pruned => 0,
            Mn::Data => 1,
            Mn::Switch => 3,
            _ => match self.mode {
                AddrMode::Implied => 1,
                AddrMode::Immediate | AddrMode::Relative | AddrMode::IndirectY => 2,
                AddrMode::Absolute | AddrMode::Maybe => 3,
            },
        }
    }

    pub fn addr_mode(self) -> AddrMode {
        self.mode
    }

    /// Registers read by this op, including `regf::M` for ops that read
    /// their memory operand.
    pub fn input_regs(self) -> u8 {
        use regf::*;
        let mem_in = match self.mode {
            AddrMode::Absolute | AddrMode::IndirectY => M,
            _ => 0,
        };
        match self.mn {
            Mn::Lda | Mn::Ldx | Mn::Ldy => mem_in,
            Mn::Sta | Mn::Pha | Mn::Tax | Mn::Tay => A,
            Mn::Stx | Mn::Txa => X,
            Mn::Sty | Mn::Tya => Y,
            Mn::Adc | Mn::Sbc => A | C | mem_in,
            Mn::And | Mn::Ora | Mn::Eor | Mn::Cmp => A | mem_in,
            Mn::Cpx => X | mem_in,
            Mn::Cpy => Y | mem_in,
            // Read-modify-write: the memory operand is a use.
            Mn::Inc | Mn::Dec => M,
            Mn::Asl | Mn::Lsr => {
                if self.mode == AddrMode::Implied {
                    A
                } else {
                    M
                }
            }
            Mn::Rol | Mn::Ror => {
                if self.mode == AddrMode::Implied {
                    A | C
                } else {
                    M | C
                }
            }
            Mn::Inx | Mn::Dex => X,
            Mn::Iny | Mn::Dey => Y,
            Mn::Beq | Mn::Bne => Z,
            Mn::Bcc | Mn::Bcs => C,
            Mn::Bmi | Mn::Bpl => N,
            Mn::StoreC => C,
            Mn::StoreZ => Z,
            Mn::Switch => A,
            _ => 0,
        }
    }

    /// Registers written by this op, including `regf::M` for stores.
    pub fn output_regs(self) -> u8 {
        use regf::*;
        match self.mn {
            Mn::Lda | Mn::Pla | Mn::Txa | Mn::Tya => A | Z | N,
            Mn::Ldx | Mn::Tax => X | Z | N,
            Mn::Ldy | Mn::Tay => Y | Z | N,
            Mn::Sta | Mn::Stx | Mn::Sty | Mn::StoreC | Mn::StoreZ => M,
            Mn::Adc | Mn::Sbc => A | C | Z | N,
            Mn::And | Mn::Ora | Mn::Eor => A | Z | N,
            Mn::Cmp | Mn::Cpx | Mn::Cpy => C | Z | N,
            Mn::Inc | Mn::Dec => M | Z | N,
            Mn::Asl | Mn::Lsr | Mn::Rol | Mn::Ror => {
                if self.mode == AddrMode::Implied {
                    A | C | Z | N
                } else {
                    M | C | Z | N
                }
            }
            Mn::Inx | Mn::Dex => X | Z | N,
            Mn::Iny | Mn::Dey => Y | Z | N,
            Mn::Clc | Mn::Sec => C,
            _ => 0,
        }
    }

    pub fn is_branch(self) -> bool {
        self.flags() & flag::BRANCH != 0
    }

    pub fn is_return(self) -> bool {
        matches!(self.mn, Mn::Rts | Mn::Rti)
    }

    /// Inverse of a conditional branch; `None` for anything else.
    pub fn invert_branch(self) -> Option<Op> {
        let mn = match self.mn {
            Mn::Beq => Mn::Bne,
            Mn::Bne => Mn::Beq,
            Mn::Bcc => Mn::Bcs,
            Mn::Bcs => Mn::Bcc,
            Mn::Bmi => Mn::Bpl,
            Mn::Bpl => Mn::Bmi,
            Mn::Bvc => Mn::Bvs,
            Mn::Bvs => Mn::Bvc,
            _ => return None,
        };
        Some(Op::new(mn, self.mode))
    }

    /// The op a call becomes when promoted to a tail call.
    pub fn tail_call_op(self) -> Option<Op> {
        match (self.mn, self.mode) {
            (Mn::Jsr, AddrMode::Absolute) => Some(Op::JMP_ABS),
            _ => None,
        }
    }

    /// Re-address a real 6502 op. Pseudo mnemonics (including the flag
    /// stores) are not re-addressable and return `None`.
    pub fn change_addr_mode(self, mode: AddrMode) -> Option<Op> {
        match self.mn {
            Mn::Label | Mn::Data | Mn::Pruned | Mn::Switch | Mn::StoreC | Mn::StoreZ => None,
            Mn::Sta | Mn::Stx | Mn::Sty => match mode {
                AddrMode::Absolute | AddrMode::IndirectY | AddrMode::Maybe => {
                    Some(Op::new(self.mn, mode))
                }
                _ => None,
            },
            _ => Some(Op::new(self.mn, mode)),
        }
    }
}

// ── Instructions ─────────────────────────────────────────────────────────

/// A single pseudo-assembly instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AsmInst {
    pub op: Op,
    pub arg: Locator,
    pub alt: Locator,
}

impl AsmInst {
    pub fn of(op: Op) -> Self {
        Self {
            op,
            arg: Locator::NONE,
            alt: Locator::NONE,
        }
    }

    pub fn with_arg(op: Op, arg: Locator) -> Self {
        Self {
            op,
            arg,
            alt: Locator::NONE,
        }
    }

    pub fn with_args(op: Op, arg: Locator, alt: Locator) -> Self {
        Self { op, arg, alt }
    }

    pub fn is_return(&self) -> bool {
        self.op.is_return()
    }
}

/// Total encoded size of an instruction slice.
pub fn size_in_bytes(code: &[AsmInst]) -> u32 {
    code.iter().map(|inst| inst.op.size()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locator::GmemberId;

    #[test]
    fn branch_inversion_is_involutive() {
        let branches = [
            Mn::Beq,
            Mn::Bne,
            Mn::Bcc,
            Mn::Bcs,
            Mn::Bmi,
            Mn::Bpl,
            Mn::Bvc,
            Mn::Bvs,
        ];
        for mn in branches {
            let op = Op::new(mn, AddrMode::Relative);
            let inv = op.invert_branch().unwrap();
            assert_ne!(op, inv);
            assert_eq!(inv.invert_branch(), Some(op));
        }
        assert_eq!(Op::JMP_ABS.invert_branch(), None);
    }

    #[test]
    fn maybe_store_flag_and_promotion() {
        let maybe = Op::new(Mn::Sta, AddrMode::Maybe);
        assert_ne!(maybe.flags() & flag::MAYBE_STORE, 0);
        assert_eq!(
            maybe.change_addr_mode(AddrMode::Absolute),
            Some(Op::new(Mn::Sta, AddrMode::Absolute))
        );

        // Flag stores cannot be re-addressed; their promotion is spelled
        // out by the store-resolution pass.
        let store_c = Op::new(Mn::StoreC, AddrMode::Maybe);
        assert_ne!(store_c.flags() & flag::MAYBE_STORE, 0);
        assert_eq!(store_c.change_addr_mode(AddrMode::Absolute), None);
    }

    #[test]
    fn inc_reads_and_writes_memory() {
        let inc = Op::new(Mn::Inc, AddrMode::Absolute);
        assert_ne!(inc.input_regs() & regf::M, 0);
        assert_ne!(inc.output_regs() & regf::M, 0);
    }

    #[test]
    fn tail_call_transform() {
        assert_eq!(Op::JSR_ABS.tail_call_op(), Some(Op::JMP_ABS));
        assert_eq!(Op::RTS.tail_call_op(), None);
    }

    #[test]
    fn sizes() {
        assert_eq!(Op::RTS.size(), 1);
        assert_eq!(Op::new(Mn::Lda, AddrMode::Immediate).size(), 2);
        assert_eq!(Op::new(Mn::Sta, AddrMode::Absolute).size(), 3);
        assert_eq!(Op::new(Mn::Beq, AddrMode::Relative).size(), 2);
        assert_eq!(Op::LABEL.size(), 0);
        assert_eq!(Op::PRUNED.size(), 0);
        assert_eq!(Op::DATA.size(), 1);

        let code = [
            AsmInst::with_arg(Op::new(Mn::Lda, AddrMode::Immediate), Locator::const_byte(1)),
            AsmInst::with_arg(
                Op::new(Mn::Sta, AddrMode::Absolute),
                Locator::gmember(GmemberId(0)),
            ),
        ];
        assert_eq!(size_in_bytes(&code), 5);
    }

    #[test]
    fn switch_is_indirect() {
        assert!(indirect_addr_mode(Op::SWITCH.mode));
        assert_ne!(Op::SWITCH.flags() & flag::SWITCH, 0);
    }
}
