//! Per-opcode lowering of IR instructions to host code.

use log::{trace, warn};
use vujit_core::{Instruction, JitError, Opcode, Pool, Result, VuState};

use crate::abi::AbiState;
use crate::regalloc::{RegAlloc, HARDWIRED_GUEST};
use crate::{EmitCx, HostCodeGen};

/// Interpreter entry point for instructions the backend hands off:
/// `(state, raw instruction word)`.
pub type FallbackFn = extern "C" fn(state: *mut VuState, raw: u32);

/// Host helpers generated code may call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Helpers {
    pub fallback: Option<FallbackFn>,
}

/// Lowers one IR instruction at a time into the current block.
pub struct Dispatcher<'d, 'a, B: HostCodeGen> {
    pub cx: &'d mut EmitCx<'a, B>,
    pub alloc: &'d mut RegAlloc,
    pub abi: &'d mut AbiState,
    pub helpers: &'d Helpers,
}

impl<'d, 'a, B: HostCodeGen> Dispatcher<'d, 'a, B> {
    pub fn dispatch(&mut self, instr: &Instruction) -> Result<()> {
        trace!("lowering {instr:?}");
        match instr.op {
            Opcode::LoadImmediate => self.load_immediate(instr),
            Opcode::MoveRegister => self.move_register(instr),
            Opcode::Branch => {
                self.branch(instr);
                Ok(())
            }
            Opcode::BranchAndLink => self.branch_and_link(instr),
            Opcode::BranchIndirect => self.branch_indirect(instr),
            Opcode::AddImmediateUnsigned => self.add_immediate_unsigned(instr),
            Opcode::MultiplyVectorByScalar => self.multiply_vector_by_scalar(instr),
            Opcode::FallbackInterpreter => self.fallback(instr),
            op => Err(JitError::UnsupportedOpcode(op)),
        }
    }

    /// Host slot for an integer destination, or `None` when the
    /// destination is the hardwired vi0 and the write is dropped.
    fn int_dest(&mut self, guest: u8) -> Result<Option<u8>> {
        if guest == HARDWIRED_GUEST {
            trace!("discarding write to vi{guest}");
            return Ok(None);
        }
        self.alloc.acquire(self.cx, Pool::Int, guest, false).map(Some)
    }

    fn load_immediate(&mut self, instr: &Instruction) -> Result<()> {
        if let Some(dest) = self.int_dest(instr.dest)? {
            self.cx.host.out_movi16(self.cx.buf, dest, instr.imm);
        }
        Ok(())
    }

    fn move_register(&mut self, instr: &Instruction) -> Result<()> {
        Pool::Int.check(instr.source)?;
        if instr.dest == instr.source {
            return Ok(());
        }
        let Some(dest) = self.int_dest(instr.dest)? else {
            return Ok(());
        };
        let source = self.alloc.acquire(self.cx, Pool::Int, instr.source, true)?;
        self.cx.host.out_mov16(self.cx.buf, dest, source);
        Ok(())
    }

    fn branch(&mut self, instr: &Instruction) {
        let pc = self.cx.state.pc();
        self.cx.host.out_sti32(self.cx.buf, pc, instr.jump_dest);
    }

    fn branch_and_link(&mut self, instr: &Instruction) -> Result<()> {
        self.branch(instr);
        if let Some(link) = self.int_dest(instr.dest)? {
            self.cx.host.out_movi16(self.cx.buf, link, instr.return_addr);
        }
        Ok(())
    }

    /// The guest encodes indirect targets as instruction indices;
    /// the PC field holds byte addresses (8 bytes per instruction).
    fn branch_indirect(&mut self, instr: &Instruction) -> Result<()> {
        let source = self.alloc.acquire(self.cx, Pool::Int, instr.source, true)?;
        let pc = self.cx.state.pc();
        let host = self.cx.host;
        host.out_zext16(self.cx.buf, source);
        host.out_st32(self.cx.buf, source, pc);
        host.out_shli32_mem(self.cx.buf, pc, 3);
        Ok(())
    }

    fn add_immediate_unsigned(&mut self, instr: &Instruction) -> Result<()> {
        Pool::Int.check(instr.source)?;
        let dest = if instr.dest == instr.source {
            if instr.dest == HARDWIRED_GUEST {
                return Ok(());
            }
            self.alloc.acquire(self.cx, Pool::Int, instr.dest, true)?
        } else {
            let Some(dest) = self.int_dest(instr.dest)? else {
                return Ok(());
            };
            let source = self.alloc.acquire(self.cx, Pool::Int, instr.source, true)?;
            self.cx.host.out_mov16(self.cx.buf, dest, source);
            dest
        };
        self.cx.host.out_addi16(self.cx.buf, dest, instr.imm);
        Ok(())
    }

    fn multiply_vector_by_scalar(&mut self, instr: &Instruction) -> Result<()> {
        self.alloc.acquire(self.cx, Pool::Vector, instr.dest, false)?;
        warn!("{} has no x86-64 lowering", instr.op);
        Err(JitError::UnimplementedOpcode(instr.op))
    }

    /// Write back all cached guest registers, then call the
    /// interpreter with `(state, raw)`.
    fn fallback(&mut self, instr: &Instruction) -> Result<()> {
        let Some(helper) = self.helpers.fallback else {
            return Err(JitError::UnsupportedOpcode(instr.op));
        };
        self.alloc.flush(self.cx);
        let state = self.cx.state.base;
        self.abi.prepare_argument(self.alloc, self.cx, state)?;
        self.abi.prepare_argument(self.alloc, self.cx, instr.raw as u64)?;
        self.abi.issue_call(self.alloc, self.cx, helper as usize as u64);
        Ok(())
    }
}
