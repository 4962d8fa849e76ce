//! Shared types for the VU recompiler: IR, guest-state layout and
//! the error taxonomy.

pub mod error;
pub mod ir;
pub mod state;

pub use error::{JitError, Result};
pub use ir::{Instruction, IrBlock, Opcode};
pub use state::{
    GuestMem, Pool, StateLayout, StateRef, Vector, VuState, NUM_INT_REGS,
    NUM_VECTOR_REGS,
};
