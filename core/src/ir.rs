use std::collections::VecDeque;
use std::fmt;

/// IR opcodes produced by the VU translator.
///
/// Only a subset is lowered by the x86-64 backend; the rest are
/// rejected at compile time rather than approximated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// `dest = imm`
    LoadImmediate,
    /// `dest = source`
    MoveRegister,
    /// `pc = jump_dest`
    Branch,
    /// `pc = jump_dest; dest = return_addr`
    BranchAndLink,
    /// `pc = source << 3`
    BranchIndirect,
    /// `dest = source + imm` (16-bit wraparound)
    AddImmediateUnsigned,
    /// Vector `dest = dest * scalar`. Not lowered yet.
    MultiplyVectorByScalar,
    /// Hand the raw instruction word to an interpreter helper.
    FallbackInterpreter,

    // Produced by the translator but not lowered by any backend.
    AndInt,
    OrInt,
    BranchEqual,
    BranchNotEqual,
    LoadInt,
    StoreInt,
    VAddVectors,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single IR instruction.
///
/// Field meaning depends on `op`; unused fields are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction {
    pub op: Opcode,
    pub dest: u8,
    pub source: u8,
    pub imm: u16,
    pub jump_dest: u32,
    pub return_addr: u16,
    /// Raw guest instruction word (for `FallbackInterpreter`).
    pub raw: u32,
}

impl Instruction {
    /// An instruction with every operand field zeroed.
    pub const fn new(op: Opcode) -> Self {
        Self {
            op,
            dest: 0,
            source: 0,
            imm: 0,
            jump_dest: 0,
            return_addr: 0,
            raw: 0,
        }
    }

    pub const fn load_immediate(dest: u8, imm: u16) -> Self {
        Self {
            dest,
            imm,
            ..Self::new(Opcode::LoadImmediate)
        }
    }

    pub const fn move_register(dest: u8, source: u8) -> Self {
        Self {
            dest,
            source,
            ..Self::new(Opcode::MoveRegister)
        }
    }

    pub const fn branch(target: u32) -> Self {
        Self {
            jump_dest: target,
            ..Self::new(Opcode::Branch)
        }
    }

    pub const fn branch_and_link(dest: u8, target: u32, return_addr: u16) -> Self {
        Self {
            dest,
            jump_dest: target,
            return_addr,
            ..Self::new(Opcode::BranchAndLink)
        }
    }

    pub const fn branch_indirect(source: u8) -> Self {
        Self {
            source,
            ..Self::new(Opcode::BranchIndirect)
        }
    }

    pub const fn add_immediate_unsigned(dest: u8, source: u8, imm: u16) -> Self {
        Self {
            dest,
            source,
            imm,
            ..Self::new(Opcode::AddImmediateUnsigned)
        }
    }

    pub const fn multiply_vector_by_scalar(dest: u8) -> Self {
        Self {
            dest,
            ..Self::new(Opcode::MultiplyVectorByScalar)
        }
    }

    pub const fn fallback(raw: u32) -> Self {
        Self {
            raw,
            ..Self::new(Opcode::FallbackInterpreter)
        }
    }
}

/// A translated run of guest instructions.
///
/// Drained front to back exactly once by the block compiler; there
/// is no way to rewind it.
#[derive(Debug, Clone)]
pub struct IrBlock {
    pc: u32,
    cycle_count: u32,
    instrs: VecDeque<Instruction>,
}

impl IrBlock {
    pub fn new(pc: u32, cycle_count: u32) -> Self {
        Self {
            pc,
            cycle_count,
            instrs: VecDeque::new(),
        }
    }

    /// Guest PC of the first instruction.
    #[inline]
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Guest cycles the block costs when executed.
    #[inline]
    pub fn cycle_count(&self) -> u32 {
        self.cycle_count
    }

    pub fn push(&mut self, instr: Instruction) {
        self.instrs.push_back(instr);
    }

    /// Remove and return the next instruction in program order.
    pub fn next_instr(&mut self) -> Option<Instruction> {
        self.instrs.pop_front()
    }

    #[inline]
    pub fn instruction_count(&self) -> usize {
        self.instrs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instrs.is_empty()
    }
}

impl Extend<Instruction> for IrBlock {
    fn extend<I: IntoIterator<Item = Instruction>>(&mut self, iter: I) {
        self.instrs.extend(iter);
    }
}
