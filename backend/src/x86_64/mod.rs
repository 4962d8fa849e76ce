pub mod emitter;
pub mod regs;

pub use emitter::X86_64CodeGen;
pub use regs::{Reg, Xmm};

// Each allocator pool maps one-to-one onto the host register file.
const _: () = assert!(regs::NUM_HOST_REGS == crate::regalloc::NUM_SLOTS);
