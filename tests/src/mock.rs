//! A `HostCodeGen` that records emission calls instead of encoding
//! them, so allocator and ABI decisions can be checked without
//! running generated code.

use std::cell::RefCell;

use vujit_backend::{CodeBuffer, EmitCx, HostAbi, HostCodeGen};
use vujit_core::{GuestMem, StateRef, VuState};

/// Same register conventions as the x86-64 backend: rax/rsp
/// locked, System V argument order.
pub static MOCK_ABI: HostAbi = HostAbi {
    locked_int: &[0, 4],
    int_args: &[7, 6, 2, 1, 8, 9],
    caller_saved_int: &[1, 2, 6, 7, 8, 9, 10, 11],
};

/// Fake state base; offsets are what the tests look at.
pub const STATE_BASE: u64 = 0x1000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Emitted {
    Trampoline,
    Prologue,
    Epilogue,
    SetReturn(u32),
    MovI16 { dst: u8, imm: u16 },
    MovI64 { dst: u8, val: u64 },
    Mov16 { dst: u8, src: u8 },
    AddI16 { dst: u8, imm: u16 },
    Zext16(u8),
    LdInt { dst: u8, offset: i32 },
    StInt { src: u8, offset: i32 },
    LdVec { dst: u8, offset: i32 },
    StVec { src: u8, offset: i32 },
    St32 { src: u8, offset: i32 },
    StI32 { offset: i32, imm: u32 },
    ShlI32Mem { offset: i32, shift: u8 },
    Call(u64),
}

#[derive(Default)]
pub struct Recorder {
    log: RefCell<Vec<Emitted>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything recorded so far.
    pub fn take(&self) -> Vec<Emitted> {
        std::mem::take(&mut *self.log.borrow_mut())
    }

    fn record(&self, buf: &mut CodeBuffer, e: Emitted) {
        // One byte per operation keeps block sizes non-zero.
        buf.emit_u8(0x90);
        self.log.borrow_mut().push(e);
    }
}

impl HostCodeGen for Recorder {
    fn abi(&self) -> &'static HostAbi {
        &MOCK_ABI
    }

    fn emit_trampoline(&mut self, buf: &mut CodeBuffer) {
        self.record(buf, Emitted::Trampoline);
    }

    fn trampoline_offset(&self) -> usize {
        0
    }

    fn emit_prologue(&self, buf: &mut CodeBuffer) {
        self.record(buf, Emitted::Prologue);
    }

    fn emit_epilogue(&self, buf: &mut CodeBuffer) {
        self.record(buf, Emitted::Epilogue);
    }

    fn out_set_return(&self, buf: &mut CodeBuffer, val: u32) {
        self.record(buf, Emitted::SetReturn(val));
    }

    fn out_movi16(&self, buf: &mut CodeBuffer, dst: u8, imm: u16) {
        self.record(buf, Emitted::MovI16 { dst, imm });
    }

    fn out_movi64(&self, buf: &mut CodeBuffer, dst: u8, val: u64) {
        self.record(buf, Emitted::MovI64 { dst, val });
    }

    fn out_mov16(&self, buf: &mut CodeBuffer, dst: u8, src: u8) {
        self.record(buf, Emitted::Mov16 { dst, src });
    }

    fn out_addi16(&self, buf: &mut CodeBuffer, dst: u8, imm: u16) {
        self.record(buf, Emitted::AddI16 { dst, imm });
    }

    fn out_zext16(&self, buf: &mut CodeBuffer, reg: u8) {
        self.record(buf, Emitted::Zext16(reg));
    }

    fn out_ld_int(&self, buf: &mut CodeBuffer, dst: u8, mem: GuestMem) {
        self.record(buf, Emitted::LdInt { dst, offset: mem.offset });
    }

    fn out_st_int(&self, buf: &mut CodeBuffer, src: u8, mem: GuestMem) {
        self.record(buf, Emitted::StInt { src, offset: mem.offset });
    }

    fn out_ld_vec(&self, buf: &mut CodeBuffer, dst: u8, mem: GuestMem) {
        self.record(buf, Emitted::LdVec { dst, offset: mem.offset });
    }

    fn out_st_vec(&self, buf: &mut CodeBuffer, src: u8, mem: GuestMem) {
        self.record(buf, Emitted::StVec { src, offset: mem.offset });
    }

    fn out_st32(&self, buf: &mut CodeBuffer, src: u8, mem: GuestMem) {
        self.record(buf, Emitted::St32 { src, offset: mem.offset });
    }

    fn out_sti32(&self, buf: &mut CodeBuffer, mem: GuestMem, imm: u32) {
        self.record(buf, Emitted::StI32 { offset: mem.offset, imm });
    }

    fn out_shli32_mem(&self, buf: &mut CodeBuffer, mem: GuestMem, shift: u8) {
        self.record(buf, Emitted::ShlI32Mem { offset: mem.offset, shift });
    }

    fn out_call(&self, buf: &mut CodeBuffer, addr: u64) {
        self.record(buf, Emitted::Call(addr));
    }
}

pub fn state_ref() -> StateRef {
    StateRef {
        base: STATE_BASE,
        layout: VuState::layout(),
    }
}

/// Offset of integer register `id` in guest state.
pub fn vi(id: u8) -> i32 {
    VuState::layout().reg_offset(vujit_core::Pool::Int, id)
}

/// Offset of vector register `id` in guest state.
pub fn vf(id: u8) -> i32 {
    VuState::layout().reg_offset(vujit_core::Pool::Vector, id)
}

pub fn pc() -> i32 {
    VuState::layout().pc
}

/// A writable buffer plus recorder.
pub struct Harness {
    pub buf: CodeBuffer,
    pub host: Recorder,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            buf: CodeBuffer::new(64 * 1024).unwrap(),
            host: Recorder::new(),
        }
    }
}

/// Emission context over a harness's fields, leaving the recorder
/// readable while the context is alive.
pub fn cx<'a>(buf: &'a mut CodeBuffer, host: &'a Recorder) -> EmitCx<'a, Recorder> {
    EmitCx {
        buf,
        host,
        state: state_ref(),
    }
}
