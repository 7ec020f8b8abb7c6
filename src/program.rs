//! Flat bytecode program: fixed-width instructions plus the metadata the VM
//! needs to seed, skip, and deduplicate threads.
//!
//! # Invariants
//! - Instructions are 8 bytes and immutable once `codegen` returns.
//! - Addresses (`arg` of Jump/Fork and jump-table entries) always point at
//!   a valid instruction index.
//! - Check indices are in `1..num_checked`; index 0 is the dirty flag.

use crate::analysis::SkipTable;
use crate::stdx::ByteSet;
use std::fmt;

/// Instruction discriminant.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Consume the current byte if it equals `b0`.
    Lit,
    /// Consume if the byte is `b0` or `b1`.
    Either,
    /// Consume if `b0 <= byte <= b1`.
    Range,
    /// Set pc to `arg`; non-consuming.
    Jump,
    /// Spawn a sibling thread at `arg`; fall through; non-consuming.
    Fork,
    /// Byte-indexed dispatch through the following 256 entries; consuming.
    JumpTable,
    /// Dedup guard in front of a Fork: if check `arg` is set, skip the
    /// guarded instruction.
    CheckBranch,
    /// Dedup guard that kills the thread when check `arg` is already set.
    CheckHalt,
    /// Record a match for label `arg` ending at the current offset.
    Match,
    /// Kill the thread.
    Halt,
}

/// One fixed-width instruction. `b0`/`b1` carry byte operands, `arg`
/// carries an address, check index, or label depending on the opcode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub op: OpCode,
    pub b0: u8,
    pub b1: u8,
    pub arg: u32,
}

impl Instruction {
    pub fn lit(b: u8) -> Self {
        Self { op: OpCode::Lit, b0: b, b1: 0, arg: 0 }
    }

    pub fn either(a: u8, b: u8) -> Self {
        Self { op: OpCode::Either, b0: a, b1: b, arg: 0 }
    }

    pub fn range(lo: u8, hi: u8) -> Self {
        Self { op: OpCode::Range, b0: lo, b1: hi, arg: 0 }
    }

    pub fn jump(addr: u32) -> Self {
        Self { op: OpCode::Jump, b0: 0, b1: 0, arg: addr }
    }

    pub fn fork(addr: u32) -> Self {
        Self { op: OpCode::Fork, b0: 0, b1: 0, arg: addr }
    }

    pub fn jump_table() -> Self {
        Self { op: OpCode::JumpTable, b0: 0, b1: 0, arg: 0 }
    }

    pub fn check_branch(idx: u32) -> Self {
        Self { op: OpCode::CheckBranch, b0: 0, b1: 0, arg: idx }
    }

    pub fn check_halt(idx: u32) -> Self {
        Self { op: OpCode::CheckHalt, b0: 0, b1: 0, arg: idx }
    }

    pub fn match_(label: u32) -> Self {
        Self { op: OpCode::Match, b0: 0, b1: 0, arg: label }
    }

    pub fn halt() -> Self {
        Self { op: OpCode::Halt, b0: 0, b1: 0, arg: 0 }
    }
}

const _: () = assert!(std::mem::size_of::<Instruction>() == 8);

fn fmt_byte(b: u8) -> String {
    if b.is_ascii_graphic() || b == b' ' {
        format!("'{}'", b as char)
    } else {
        format!("0x{b:02x}")
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            OpCode::Lit => write!(f, "Lit {}", fmt_byte(self.b0)),
            OpCode::Either => write!(f, "Either {}, {}", fmt_byte(self.b0), fmt_byte(self.b1)),
            OpCode::Range => write!(f, "Range {}-{}", fmt_byte(self.b0), fmt_byte(self.b1)),
            OpCode::Jump => write!(f, "Jump {:04}", self.arg),
            OpCode::Fork => write!(f, "Fork {:04}", self.arg),
            OpCode::JumpTable => write!(f, "JumpTable"),
            OpCode::CheckBranch => write!(f, "CheckBranch {}", self.arg),
            OpCode::CheckHalt => write!(f, "CheckHalt {}", self.arg),
            OpCode::Match => write!(f, "Match {}", self.arg),
            OpCode::Halt => write!(f, "Halt"),
        }
    }
}

/// Compiled program: the instruction stream plus seed/skip metadata.
#[derive(Clone, Debug)]
pub struct Program {
    pub insts: Vec<Instruction>,
    /// Check bitset size: allocated check indices plus the dirty flag.
    pub num_checked: u32,
    /// Bytes that can begin a match; gates thread seeding.
    pub first_bytes: ByteSet,
    pub skip: SkipTable,
    /// Shortest possible match length in bytes.
    pub l_min: u32,
}

impl Program {
    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }

    /// Highest match label plus one; sizes the VM's reconciliation buffer.
    pub fn num_labels(&self) -> u32 {
        self.insts
            .iter()
            .filter(|i| i.op == OpCode::Match)
            .map(|i| i.arg + 1)
            .max()
            .unwrap_or(0)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, inst) in self.insts.iter().enumerate() {
            writeln!(f, "{i:04}: {inst}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::SkipTable;
    use crate::graph::Graph;

    fn dummy_program(insts: Vec<Instruction>) -> Program {
        let g = Graph::new();
        let depths = crate::analysis::bfs_depths(&g);
        Program {
            insts,
            num_checked: 1,
            first_bytes: ByteSet::empty(),
            skip: SkipTable::build(&g, &depths, 1),
            l_min: 1,
        }
    }

    #[test]
    fn num_labels_scans_match_ops() {
        let p = dummy_program(vec![
            Instruction::lit(b'a'),
            Instruction::match_(2),
            Instruction::match_(0),
            Instruction::halt(),
        ]);
        assert_eq!(p.num_labels(), 3);
        assert_eq!(dummy_program(vec![Instruction::halt()]).num_labels(), 0);
    }

    #[test]
    fn display_is_one_instruction_per_line() {
        let p = dummy_program(vec![
            Instruction::lit(b'a'),
            Instruction::fork(7),
            Instruction::halt(),
        ]);
        let text = p.to_string();
        assert_eq!(text, "0000: Lit 'a'\n0001: Fork 0007\n0002: Halt\n");
    }
}
