//! Marshaling literal arguments into host argument registers and
//! calling host helpers from generated code.

use log::trace;
use vujit_core::{JitError, Pool, Result};

use crate::regalloc::{RegAlloc, NUM_SLOTS};
use crate::{EmitCx, HostCodeGen};

/// Argument registers consumed by the call being built.
///
/// An argument register stays locked in the allocator from
/// `prepare_argument` until `issue_call`, so operand allocation in
/// between cannot overwrite it.
#[derive(Debug, Clone, Default)]
pub struct AbiState {
    int_args: usize,
}

impl AbiState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Integer arguments prepared since the last call.
    #[inline]
    pub fn int_args(&self) -> usize {
        self.int_args
    }

    /// Load `value` into the next integer argument register.
    ///
    /// A guest register cached in that host register is spilled
    /// first. Returns the argument register used.
    pub fn prepare_argument<B: HostCodeGen>(
        &mut self,
        alloc: &mut RegAlloc,
        cx: &mut EmitCx<'_, B>,
        value: u64,
    ) -> Result<u8> {
        let regs = cx.host.abi().int_args;
        let Some(&reg) = regs.get(self.int_args) else {
            return Err(JitError::ArgumentLimitExceeded { max: regs.len() });
        };

        alloc.spill_slot(cx, Pool::Int, reg);
        alloc.pool_mut(Pool::Int).lock(reg);
        cx.host.out_movi64(cx.buf, reg, value);
        self.int_args += 1;

        trace!("abi arg {} = {value:#x} in host reg {reg}", self.int_args - 1);
        Ok(reg)
    }

    /// Call the host function at `addr` with the prepared arguments.
    ///
    /// Guest registers cached in caller-saved host registers are
    /// spilled before the call. Argument registers are released and
    /// the counters reset afterwards.
    pub fn issue_call<B: HostCodeGen>(
        &mut self,
        alloc: &mut RegAlloc,
        cx: &mut EmitCx<'_, B>,
        addr: u64,
    ) {
        let abi = cx.host.abi();
        for &reg in abi.caller_saved_int {
            alloc.spill_slot(cx, Pool::Int, reg);
        }
        for slot in 0..NUM_SLOTS as u8 {
            alloc.spill_slot(cx, Pool::Vector, slot);
        }

        cx.host.out_call(cx.buf, addr);
        trace!("abi call {addr:#x} with {} args", self.int_args);

        for &reg in &abi.int_args[..self.int_args] {
            alloc.pool_mut(Pool::Int).unlock(reg);
        }
        self.int_args = 0;
    }
}
