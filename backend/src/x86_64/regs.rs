/// x86-64 general-purpose register indices.
///
/// Encoding matches the x86-64 ModR/M and REX register numbering,
/// and doubles as the slot index in the integer register pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    const ALL: [Reg; 16] = [
        Reg::Rax,
        Reg::Rcx,
        Reg::Rdx,
        Reg::Rbx,
        Reg::Rsp,
        Reg::Rbp,
        Reg::Rsi,
        Reg::Rdi,
        Reg::R8,
        Reg::R9,
        Reg::R10,
        Reg::R11,
        Reg::R12,
        Reg::R13,
        Reg::R14,
        Reg::R15,
    ];

    /// Register with hardware number `n` (0-15).
    #[inline]
    pub fn from_u8(n: u8) -> Self {
        Self::ALL[n as usize]
    }

    /// Low 3 bits of the register encoding (for ModR/M).
    #[inline]
    pub const fn low3(self) -> u8 {
        (self as u8) & 0x7
    }

    /// Whether this register requires a REX prefix (R8-R15).
    #[inline]
    pub const fn needs_rex(self) -> bool {
        (self as u8) >= 8
    }
}

/// SSE register number (xmm0-xmm15); slot index in the vector pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Xmm(pub u8);

impl Xmm {
    #[inline]
    pub const fn low3(self) -> u8 {
        self.0 & 0x7
    }
}

/// Host registers per pool (16 GPRs, 16 XMM registers).
pub const NUM_HOST_REGS: usize = 16;

/// Scratch register for materializing guest-state addresses.
/// Also carries the block's cycle count back to the caller.
pub const SCRATCH: Reg = Reg::Rax;

/// Register holding the block return value.
pub const RETURN_REG: Reg = Reg::Rax;

/// GPRs permanently excluded from allocation: the scratch /
/// return register and the stack pointer.
pub const LOCKED_REGS: &[Reg] = &[Reg::Rax, Reg::Rsp];

/// Function argument registers (System V AMD64 ABI).
pub const CALL_ARG_REGS: &[Reg] = &[Reg::Rdi, Reg::Rsi, Reg::Rdx, Reg::Rcx, Reg::R8, Reg::R9];

/// Allocatable GPRs a called helper may clobber (System V AMD64 ABI).
pub const CALLER_SAVED: &[Reg] = &[
    Reg::Rcx,
    Reg::Rdx,
    Reg::Rsi,
    Reg::Rdi,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
];

/// Registers the trampoline saves around generated code: every
/// GPR except the return register and the stack pointer.
pub const TRAMPOLINE_SAVED: &[Reg] = &[
    Reg::Rbx,
    Reg::Rcx,
    Reg::Rdx,
    Reg::Rsi,
    Reg::Rdi,
    Reg::Rbp,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
];

/// Stack alignment required at call sites.
pub const STACK_ALIGN: usize = 16;

/// Bytes pushed by the trampoline: return address + saved registers.
pub const TRAMPOLINE_PUSH_SIZE: usize = (1 + TRAMPOLINE_SAVED.len()) * 8;

/// Stack adjustment restoring call-site alignment inside the trampoline.
pub const TRAMPOLINE_ADDEND: usize = {
    let aligned = (TRAMPOLINE_PUSH_SIZE + STACK_ALIGN - 1) & !(STACK_ALIGN - 1);
    aligned - TRAMPOLINE_PUSH_SIZE
};
