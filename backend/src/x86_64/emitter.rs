#![allow(non_upper_case_globals)]

use vujit_core::GuestMem;

use crate::code_buffer::CodeBuffer;
use crate::x86_64::regs::{
    Reg, Xmm, CALLER_SAVED, CALL_ARG_REGS, LOCKED_REGS, RETURN_REG, SCRATCH,
    TRAMPOLINE_ADDEND, TRAMPOLINE_SAVED,
};
use crate::{HostAbi, HostCodeGen};

// -- Prefix flags --

pub const P_EXT: u32 = 0x100; // 0x0F prefix
pub const P_DATA16: u32 = 0x400; // 0x66 prefix
pub const P_REXW: u32 = 0x1000; // REX.W = 1

// -- Opcode constants (OPC_*) --

// Arithmetic
pub const OPC_ARITH_EvIb: u32 = 0x83;
pub const OPC_ARITH_EvIz: u32 = 0x81;

// Shift
pub const OPC_SHIFT_1: u32 = 0xD1;
pub const OPC_SHIFT_Ib: u32 = 0xC1;

// Data movement
pub const OPC_MOVL_EvGv: u32 = 0x89;
pub const OPC_MOVL_EvIz: u32 = 0xC7;
pub const OPC_MOVL_Iv: u32 = 0xB8;
pub const OPC_MOVZWL: u32 = 0xB7 | P_EXT;
pub const OPC_XORL_GvEv: u32 = 0x33;

// SSE
pub const OPC_MOVAPS_VxWx: u32 = 0x28 | P_EXT;
pub const OPC_MOVAPS_WxVx: u32 = 0x29 | P_EXT;

// Control flow
pub const OPC_GRP5: u32 = 0xFF;
pub const OPC_PUSH_r32: u32 = 0x50;
pub const OPC_POP_r32: u32 = 0x58;
pub const OPC_RET: u32 = 0xC3;

// -- Sub-operation enums --

/// Arithmetic sub-opcodes (used in /r field of 0x81/0x83).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ArithOp {
    Add = 0,
    Sub = 5,
}

/// Shift sub-opcodes (used in /r field of 0xC1/0xD1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ShiftOp {
    Shl = 4,
}

/// Group 5 extension codes (used in /r field of 0xFF).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Ext5Op {
    CallN = 2,
}

// -- Core encoding functions --

#[inline]
fn rexw_flag(rexw: bool) -> u32 {
    if rexw {
        P_REXW
    } else {
        0
    }
}

/// Emit opcode with REX prefix. `r` is the reg field, `rm` is the r/m field.
/// Both are raw register numbers (0-15). Pass 0 for unused fields.
pub fn emit_opc(buf: &mut CodeBuffer, opc: u32, r: u8, rm: u8) {
    let mut rex: u8 = 0;
    if opc & P_REXW != 0 {
        rex |= 0x08; // REX.W
    }
    if r >= 8 {
        rex |= 0x04; // REX.R
    }
    if rm >= 8 {
        rex |= 0x01; // REX.B
    }

    // Operand-size prefix goes before REX
    if opc & P_DATA16 != 0 {
        buf.emit_u8(0x66);
    }
    if rex != 0 {
        buf.emit_u8(0x40 | rex);
    }
    if opc & P_EXT != 0 {
        buf.emit_u8(0x0F);
    }
    buf.emit_u8(opc as u8);
}

/// Emit opcode + ModR/M for register-register operation.
pub fn emit_modrm(buf: &mut CodeBuffer, opc: u32, r: Reg, rm: Reg) {
    emit_opc(buf, opc, r as u8, rm as u8);
    buf.emit_u8(0xC0 | (r.low3() << 3) | rm.low3());
}

/// Emit opcode + ModR/M with /r extension (for group opcodes).
pub fn emit_modrm_ext(buf: &mut CodeBuffer, opc: u32, ext: u8, rm: Reg) {
    emit_opc(buf, opc, ext, rm as u8);
    buf.emit_u8(0xC0 | (ext << 3) | rm.low3());
}

/// Emit opcode + ModR/M + displacement for memory [base + offset].
/// `r` is a raw reg-field value: a GPR, an XMM number, or a /r extension.
/// Handles special cases: RBP/R13 need explicit disp8=0, RSP/R12 need SIB.
fn emit_modrm_offset_raw(buf: &mut CodeBuffer, opc: u32, r: u8, base: Reg, offset: i32) {
    emit_opc(buf, opc, r, base as u8);

    let r3 = r & 0x7;
    let b3 = base.low3();

    if offset == 0 && b3 != 5 {
        // [base] — mod=00
        if b3 == 4 {
            buf.emit_u8((r3 << 3) | 0x04);
            buf.emit_u8(0x24); // SIB: index=none, base=RSP
        } else {
            buf.emit_u8((r3 << 3) | b3);
        }
    } else if (-128..=127).contains(&offset) {
        // [base + disp8] — mod=01
        if b3 == 4 {
            buf.emit_u8(0x44 | (r3 << 3));
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8(0x40 | (r3 << 3) | b3);
        }
        buf.emit_u8(offset as u8);
    } else {
        // [base + disp32] — mod=10
        if b3 == 4 {
            buf.emit_u8(0x84 | (r3 << 3));
            buf.emit_u8(0x24);
        } else {
            buf.emit_u8(0x80 | (r3 << 3) | b3);
        }
        buf.emit_u32(offset as u32);
    }
}

/// Emit opcode + ModR/M + displacement for memory [base + offset].
pub fn emit_modrm_offset(buf: &mut CodeBuffer, opc: u32, r: Reg, base: Reg, offset: i32) {
    emit_modrm_offset_raw(buf, opc, r as u8, base, offset);
}

/// Emit opcode + ModR/M with /r extension for memory [base + offset].
pub fn emit_modrm_ext_offset(buf: &mut CodeBuffer, opc: u32, ext: u8, base: Reg, offset: i32) {
    emit_modrm_offset_raw(buf, opc, ext, base, offset);
}

// -- Arithmetic instructions --

/// Emit arithmetic reg, imm (auto-selects imm8 vs imm32).
pub fn emit_arith_ri(buf: &mut CodeBuffer, op: ArithOp, rexw: bool, dst: Reg, imm: i32) {
    let w = rexw_flag(rexw);
    if (-128..=127).contains(&imm) {
        emit_modrm_ext(buf, OPC_ARITH_EvIb | w, op as u8, dst);
        buf.emit_u8(imm as u8);
    } else {
        emit_modrm_ext(buf, OPC_ARITH_EvIz | w, op as u8, dst);
        buf.emit_u32(imm as u32);
    }
}

/// Emit 16-bit arithmetic reg, imm (auto-selects imm8 vs imm16).
pub fn emit_arith_ri16(buf: &mut CodeBuffer, op: ArithOp, dst: Reg, imm: u16) {
    let simm = imm as i16;
    if (-128..=127).contains(&simm) {
        emit_modrm_ext(buf, OPC_ARITH_EvIb | P_DATA16, op as u8, dst);
        buf.emit_u8(simm as u8);
    } else {
        emit_modrm_ext(buf, OPC_ARITH_EvIz | P_DATA16, op as u8, dst);
        buf.emit_u16(imm);
    }
}

// -- Shift instructions --

/// Emit 32-bit shift [base+offset], imm8.
pub fn emit_shift_mi(buf: &mut CodeBuffer, op: ShiftOp, base: Reg, offset: i32, imm: u8) {
    if imm == 1 {
        emit_modrm_ext_offset(buf, OPC_SHIFT_1, op as u8, base, offset);
    } else {
        emit_modrm_ext_offset(buf, OPC_SHIFT_Ib, op as u8, base, offset);
        buf.emit_u8(imm);
    }
}

// -- Data movement --

/// Emit MOV reg, reg (32-bit or 64-bit).
pub fn emit_mov_rr(buf: &mut CodeBuffer, rexw: bool, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_MOVL_EvGv | rexw_flag(rexw), src, dst);
}

/// Emit MOV r16, r16.
pub fn emit_mov_rr16(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_MOVL_EvGv | P_DATA16, src, dst);
}

/// Emit MOV reg, imm (32-bit or 64-bit).
pub fn emit_mov_ri(buf: &mut CodeBuffer, rexw: bool, reg: Reg, val: u64) {
    if val == 0 {
        // xor r32, r32 zero-extends into the full register
        emit_modrm(buf, OPC_XORL_GvEv, reg, reg);
    } else if !rexw || val <= u32::MAX as u64 {
        emit_opc(buf, OPC_MOVL_Iv + (reg.low3() as u32), 0, reg as u8);
        buf.emit_u32(val as u32);
    } else if val as i64 >= i32::MIN as i64 && val as i64 <= i32::MAX as i64 {
        emit_modrm_ext(buf, OPC_MOVL_EvIz | P_REXW, 0, reg);
        buf.emit_u32(val as u32);
    } else {
        emit_opc(
            buf,
            (OPC_MOVL_Iv + (reg.low3() as u32)) | P_REXW,
            0,
            reg as u8,
        );
        buf.emit_u64(val);
    }
}

/// Emit MOV r16, imm16. Upper bits of the register are preserved.
pub fn emit_mov_ri16(buf: &mut CodeBuffer, reg: Reg, val: u16) {
    emit_opc(
        buf,
        (OPC_MOVL_Iv + (reg.low3() as u32)) | P_DATA16,
        0,
        reg as u8,
    );
    buf.emit_u16(val);
}

/// Emit MOVZWL dst, src (zero-extend low 16 bits into 64).
pub fn emit_movzx16(buf: &mut CodeBuffer, dst: Reg, src: Reg) {
    emit_modrm(buf, OPC_MOVZWL, dst, src);
}

// -- Memory operations --

/// Emit MOVZWL reg, word [base+offset].
pub fn emit_load_zx16(buf: &mut CodeBuffer, dst: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, OPC_MOVZWL, dst, base, offset);
}

/// Emit MOV [base+offset], reg (32-bit or 64-bit store).
pub fn emit_store(buf: &mut CodeBuffer, rexw: bool, src: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, OPC_MOVL_EvGv | rexw_flag(rexw), src, base, offset);
}

/// Emit MOV word [base+offset], r16.
pub fn emit_store16(buf: &mut CodeBuffer, src: Reg, base: Reg, offset: i32) {
    emit_modrm_offset(buf, OPC_MOVL_EvGv | P_DATA16, src, base, offset);
}

/// Emit MOV dword [base+offset], imm32.
pub fn emit_store_imm(buf: &mut CodeBuffer, base: Reg, offset: i32, imm: u32) {
    emit_modrm_ext_offset(buf, OPC_MOVL_EvIz, 0, base, offset);
    buf.emit_u32(imm);
}

/// Emit MOVAPS xmm, [base+offset] (aligned 128-bit load).
pub fn emit_movaps_load(buf: &mut CodeBuffer, dst: Xmm, base: Reg, offset: i32) {
    emit_modrm_offset_raw(buf, OPC_MOVAPS_VxWx, dst.0, base, offset);
}

/// Emit MOVAPS [base+offset], xmm (aligned 128-bit store).
pub fn emit_movaps_store(buf: &mut CodeBuffer, src: Xmm, base: Reg, offset: i32) {
    emit_modrm_offset_raw(buf, OPC_MOVAPS_WxVx, src.0, base, offset);
}

// -- Control flow --

/// Emit indirect CALL through register.
pub fn emit_call_reg(buf: &mut CodeBuffer, reg: Reg) {
    emit_modrm_ext(buf, OPC_GRP5, Ext5Op::CallN as u8, reg);
}

/// Emit PUSH reg.
pub fn emit_push(buf: &mut CodeBuffer, reg: Reg) {
    emit_opc(buf, OPC_PUSH_r32 + (reg.low3() as u32), 0, reg as u8);
}

/// Emit POP reg.
pub fn emit_pop(buf: &mut CodeBuffer, reg: Reg) {
    emit_opc(buf, OPC_POP_r32 + (reg.low3() as u32), 0, reg as u8);
}

/// Emit RET.
pub fn emit_ret(buf: &mut CodeBuffer) {
    buf.emit_u8(OPC_RET as u8);
}

// ==========================================================
// X86_64CodeGen — backend code generator struct
// ==========================================================

static X86_64_ABI: HostAbi = HostAbi {
    locked_int: &[LOCKED_REGS[0] as u8, LOCKED_REGS[1] as u8],
    int_args: &[
        CALL_ARG_REGS[0] as u8,
        CALL_ARG_REGS[1] as u8,
        CALL_ARG_REGS[2] as u8,
        CALL_ARG_REGS[3] as u8,
        CALL_ARG_REGS[4] as u8,
        CALL_ARG_REGS[5] as u8,
    ],
    caller_saved_int: &[
        CALLER_SAVED[0] as u8,
        CALLER_SAVED[1] as u8,
        CALLER_SAVED[2] as u8,
        CALLER_SAVED[3] as u8,
        CALLER_SAVED[4] as u8,
        CALLER_SAVED[5] as u8,
        CALLER_SAVED[6] as u8,
        CALLER_SAVED[7] as u8,
    ],
};

/// x86-64 backend code generator.
///
/// Guest-state operands are addressed as `[SCRATCH + offset]`
/// after loading the state base address into `SCRATCH`.
pub struct X86_64CodeGen {
    trampoline_offset: usize,
}

impl X86_64CodeGen {
    pub fn new() -> Self {
        Self {
            trampoline_offset: 0,
        }
    }

    /// Materialize a guest-state base address in the scratch register.
    fn state_base(&self, buf: &mut CodeBuffer, mem: GuestMem) -> Reg {
        emit_mov_ri(buf, true, SCRATCH, mem.base);
        SCRATCH
    }
}

impl Default for X86_64CodeGen {
    fn default() -> Self {
        Self::new()
    }
}

impl HostCodeGen for X86_64CodeGen {
    fn abi(&self) -> &'static HostAbi {
        &X86_64_ABI
    }

    fn emit_trampoline(&mut self, buf: &mut CodeBuffer) {
        self.trampoline_offset = buf.offset();

        for &reg in TRAMPOLINE_SAVED {
            emit_push(buf, reg);
        }
        if TRAMPOLINE_ADDEND != 0 {
            emit_arith_ri(buf, ArithOp::Sub, true, Reg::Rsp, TRAMPOLINE_ADDEND as i32);
        }

        // call *rdi (first argument = block entry point)
        emit_call_reg(buf, CALL_ARG_REGS[0]);

        if TRAMPOLINE_ADDEND != 0 {
            emit_arith_ri(buf, ArithOp::Add, true, Reg::Rsp, TRAMPOLINE_ADDEND as i32);
        }
        for &reg in TRAMPOLINE_SAVED.iter().rev() {
            emit_pop(buf, reg);
        }
        emit_ret(buf);
    }

    fn trampoline_offset(&self) -> usize {
        self.trampoline_offset
    }

    fn emit_prologue(&self, buf: &mut CodeBuffer) {
        emit_push(buf, Reg::Rbp);
        emit_mov_rr(buf, true, Reg::Rbp, Reg::Rsp);
    }

    fn emit_epilogue(&self, buf: &mut CodeBuffer) {
        emit_pop(buf, Reg::Rbp);
        emit_ret(buf);
    }

    fn out_set_return(&self, buf: &mut CodeBuffer, val: u32) {
        emit_mov_ri(buf, false, RETURN_REG, val as u64);
    }

    fn out_movi16(&self, buf: &mut CodeBuffer, dst: u8, imm: u16) {
        emit_mov_ri16(buf, Reg::from_u8(dst), imm);
    }

    fn out_movi64(&self, buf: &mut CodeBuffer, dst: u8, val: u64) {
        emit_mov_ri(buf, true, Reg::from_u8(dst), val);
    }

    fn out_mov16(&self, buf: &mut CodeBuffer, dst: u8, src: u8) {
        if dst == src {
            return;
        }
        emit_mov_rr16(buf, Reg::from_u8(dst), Reg::from_u8(src));
    }

    fn out_addi16(&self, buf: &mut CodeBuffer, dst: u8, imm: u16) {
        emit_arith_ri16(buf, ArithOp::Add, Reg::from_u8(dst), imm);
    }

    fn out_zext16(&self, buf: &mut CodeBuffer, reg: u8) {
        let r = Reg::from_u8(reg);
        emit_movzx16(buf, r, r);
    }

    fn out_ld_int(&self, buf: &mut CodeBuffer, dst: u8, mem: GuestMem) {
        let base = self.state_base(buf, mem);
        emit_load_zx16(buf, Reg::from_u8(dst), base, mem.offset);
    }

    fn out_st_int(&self, buf: &mut CodeBuffer, src: u8, mem: GuestMem) {
        let base = self.state_base(buf, mem);
        emit_store16(buf, Reg::from_u8(src), base, mem.offset);
    }

    fn out_ld_vec(&self, buf: &mut CodeBuffer, dst: u8, mem: GuestMem) {
        let base = self.state_base(buf, mem);
        emit_movaps_load(buf, Xmm(dst), base, mem.offset);
    }

    fn out_st_vec(&self, buf: &mut CodeBuffer, src: u8, mem: GuestMem) {
        let base = self.state_base(buf, mem);
        emit_movaps_store(buf, Xmm(src), base, mem.offset);
    }

    fn out_st32(&self, buf: &mut CodeBuffer, src: u8, mem: GuestMem) {
        let base = self.state_base(buf, mem);
        emit_store(buf, false, Reg::from_u8(src), base, mem.offset);
    }

    fn out_sti32(&self, buf: &mut CodeBuffer, mem: GuestMem, imm: u32) {
        let base = self.state_base(buf, mem);
        emit_store_imm(buf, base, mem.offset, imm);
    }

    fn out_shli32_mem(&self, buf: &mut CodeBuffer, mem: GuestMem, shift: u8) {
        let base = self.state_base(buf, mem);
        emit_shift_mi(buf, ShiftOp::Shl, base, mem.offset, shift);
    }

    fn out_call(&self, buf: &mut CodeBuffer, addr: u64) {
        emit_mov_ri(buf, true, SCRATCH, addr);
        emit_call_reg(buf, SCRATCH);
    }
}
