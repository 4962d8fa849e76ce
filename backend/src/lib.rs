//! Host code generation for the VU recompiler: register
//! allocation, instruction lowering, helper calls and block
//! compilation into an executable code buffer.

pub mod abi;
pub mod block_cache;
pub mod code_buffer;
pub mod compile;
pub mod dispatch;
pub mod regalloc;
pub mod x86_64;

pub use abi::AbiState;
pub use block_cache::{BlockCache, CachedBlock};
pub use code_buffer::CodeBuffer;
pub use compile::{BlockCompiler, MAX_INSN_BYTES};
pub use dispatch::{Dispatcher, FallbackFn, Helpers};
pub use regalloc::{HostSlot, RegAlloc, RegPool};
pub use x86_64::X86_64CodeGen;

use vujit_core::{GuestMem, StateRef};

/// Everything needed to emit code for one guest-state instance:
/// the output buffer, the host code generator and the state being
/// compiled against.
pub struct EmitCx<'a, B: HostCodeGen> {
    pub buf: &'a mut CodeBuffer,
    pub host: &'a B,
    pub state: StateRef,
}

/// Register conventions of a host calling convention, as raw
/// host register numbers.
///
/// Every vector register is treated as caller-saved.
#[derive(Debug)]
pub struct HostAbi {
    /// Integer registers never handed out by the allocator.
    pub locked_int: &'static [u8],
    /// Integer argument registers, in argument order.
    pub int_args: &'static [u8],
    /// Allocatable integer registers a helper call may clobber.
    pub caller_saved_int: &'static [u8],
}

/// Trait for host architecture code generators.
///
/// The allocator, ABI bridge and dispatcher only ever emit code
/// through these primitives. Register arguments are host register
/// numbers (GPRs for integer operations, XMM numbers for vector
/// operations); guest-state operands are [`GuestMem`] values.
pub trait HostCodeGen {
    /// Register conventions used by allocation and helper calls.
    fn abi(&self) -> &'static HostAbi;

    /// Emit the run trampoline: save host registers, call the
    /// block entry passed as first argument, restore, return.
    fn emit_trampoline(&mut self, buf: &mut CodeBuffer);

    /// Offset of the trampoline emitted by `emit_trampoline`.
    fn trampoline_offset(&self) -> usize;

    /// Emit the per-block frame setup.
    fn emit_prologue(&self, buf: &mut CodeBuffer);

    /// Emit the per-block frame teardown and return.
    fn emit_epilogue(&self, buf: &mut CodeBuffer);

    /// Load the block's return value into the return register.
    fn out_set_return(&self, buf: &mut CodeBuffer, val: u32);

    /// Load a 16-bit immediate into the low half of `dst`.
    fn out_movi16(&self, buf: &mut CodeBuffer, dst: u8, imm: u16);

    /// Load a 64-bit immediate into `dst`.
    fn out_movi64(&self, buf: &mut CodeBuffer, dst: u8, val: u64);

    /// Copy the low 16 bits of `src` into `dst`.
    fn out_mov16(&self, buf: &mut CodeBuffer, dst: u8, src: u8);

    /// 16-bit add with wraparound.
    fn out_addi16(&self, buf: &mut CodeBuffer, dst: u8, imm: u16);

    /// Zero-extend the low 16 bits of `reg` in place.
    fn out_zext16(&self, buf: &mut CodeBuffer, reg: u8);

    /// Fill an integer slot from guest memory (16-bit, zero-extended).
    fn out_ld_int(&self, buf: &mut CodeBuffer, dst: u8, mem: GuestMem);

    /// Spill an integer slot to guest memory (16-bit).
    fn out_st_int(&self, buf: &mut CodeBuffer, src: u8, mem: GuestMem);

    /// Fill a vector slot from guest memory (aligned 128-bit).
    fn out_ld_vec(&self, buf: &mut CodeBuffer, dst: u8, mem: GuestMem);

    /// Spill a vector slot to guest memory (aligned 128-bit).
    fn out_st_vec(&self, buf: &mut CodeBuffer, src: u8, mem: GuestMem);

    /// Store the low 32 bits of `src` to guest memory.
    fn out_st32(&self, buf: &mut CodeBuffer, src: u8, mem: GuestMem);

    /// Store a 32-bit immediate to guest memory.
    fn out_sti32(&self, buf: &mut CodeBuffer, mem: GuestMem, imm: u32);

    /// Shift a 32-bit word of guest memory left by `shift`.
    fn out_shli32_mem(&self, buf: &mut CodeBuffer, mem: GuestMem, shift: u8);

    /// Call the host function at absolute address `addr`.
    fn out_call(&self, buf: &mut CodeBuffer, addr: u64);
}
