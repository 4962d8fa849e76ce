//! VU architectural state and its memory layout.

use memoffset::offset_of;

use crate::error::JitError;

/// Number of integer registers (vi0-vi15).
pub const NUM_INT_REGS: usize = 16;
/// Number of vector registers (vf0-vf31).
pub const NUM_VECTOR_REGS: usize = 32;

/// Register pool a guest register lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pool {
    Int,
    Vector,
}

impl Pool {
    /// Number of guest registers addressable in this pool.
    pub const fn guest_limit(self) -> usize {
        match self {
            Pool::Int => NUM_INT_REGS,
            Pool::Vector => NUM_VECTOR_REGS,
        }
    }

    /// Reject guest ids outside the pool's register file.
    pub fn check(self, index: u8) -> Result<(), JitError> {
        if (index as usize) < self.guest_limit() {
            Ok(())
        } else {
            Err(JitError::InvalidRegisterIndex {
                pool: self,
                index,
                limit: self.guest_limit(),
            })
        }
    }
}

impl std::fmt::Display for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Pool::Int => f.write_str("integer"),
            Pool::Vector => f.write_str("vector"),
        }
    }
}

/// One 128-bit vector register, four 32-bit lanes (raw bits).
#[repr(C, align(16))]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Vector(pub [u32; 4]);

impl Vector {
    pub const ZERO: Vector = Vector([0; 4]);

    pub fn from_f32(lanes: [f32; 4]) -> Self {
        Vector(lanes.map(f32::to_bits))
    }
}

/// VU architectural state.
///
/// Layout must be `#[repr(C)]` so generated code can address
/// fields at fixed offsets from the state base address. The
/// 16-byte alignment lets vector registers use aligned moves.
#[repr(C, align(16))]
#[derive(Debug, Clone)]
pub struct VuState {
    /// Vector registers vf0-vf31. vf0 is hardwired to (0, 0, 0, 1).
    pub vf: [Vector; NUM_VECTOR_REGS],
    /// Integer registers vi0-vi15. vi0 is hardwired to zero.
    pub vi: [u16; NUM_INT_REGS],
    /// Program counter (byte address in micro memory).
    pub pc: u32,
}

impl VuState {
    pub fn new() -> Self {
        let mut vf = [Vector::ZERO; NUM_VECTOR_REGS];
        vf[0] = Vector::from_f32([0.0, 0.0, 0.0, 1.0]);
        Self {
            vf,
            vi: [0; NUM_INT_REGS],
            pc: 0,
        }
    }

    /// Field offsets of this struct.
    pub fn layout() -> StateLayout {
        StateLayout {
            vector_base: offset_of!(VuState, vf) as i32,
            vector_stride: std::mem::size_of::<Vector>() as i32,
            int_base: offset_of!(VuState, vi) as i32,
            int_stride: std::mem::size_of::<u16>() as i32,
            pc: offset_of!(VuState, pc) as i32,
        }
    }

    /// Address + layout handle that generated code is compiled against.
    pub fn state_ref(&mut self) -> StateRef {
        StateRef {
            base: self as *mut VuState as u64,
            layout: Self::layout(),
        }
    }
}

impl Default for VuState {
    fn default() -> Self {
        Self::new()
    }
}

/// Byte offsets of the guest register files and PC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateLayout {
    pub vector_base: i32,
    pub vector_stride: i32,
    pub int_base: i32,
    pub int_stride: i32,
    pub pc: i32,
}

impl StateLayout {
    pub fn reg_offset(&self, pool: Pool, id: u8) -> i32 {
        match pool {
            Pool::Int => self.int_base + self.int_stride * id as i32,
            Pool::Vector => self.vector_base + self.vector_stride * id as i32,
        }
    }
}

/// A guest-state instance as seen by the code generator: a stable
/// base address plus the layout to find fields inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateRef {
    pub base: u64,
    pub layout: StateLayout,
}

impl StateRef {
    /// Memory operand for guest register `id` of `pool`.
    pub fn reg(&self, pool: Pool, id: u8) -> GuestMem {
        GuestMem {
            base: self.base,
            offset: self.layout.reg_offset(pool, id),
        }
    }

    /// Memory operand for the program counter.
    pub fn pc(&self) -> GuestMem {
        GuestMem {
            base: self.base,
            offset: self.layout.pc,
        }
    }
}

/// Memory operand `[base + offset]` into guest state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestMem {
    pub base: u64,
    pub offset: i32,
}
