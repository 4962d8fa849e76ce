use log::debug;
use vujit_backend::{BlockCompiler, CachedBlock, HostCodeGen};
use vujit_core::{JitError, Result, StateRef, VuState};

use crate::{Translator, VuJit};

/// Signature of the trampoline emitted at the start of the code
/// buffer. Returns the cycle count of the block it entered.
pub type TrampolineFn = unsafe extern "C" fn(entry: *const u8, state: *mut VuState) -> u64;

impl<B: HostCodeGen> VuJit<B> {
    /// Host entry point of the block at `state.pc`, compiling it
    /// on a miss.
    ///
    /// A compile that runs out of code space while other blocks are
    /// cached is retried once from an empty cache.
    pub fn exec<T: Translator + ?Sized>(
        &mut self,
        state: &mut VuState,
        translator: &mut T,
    ) -> Result<*const u8> {
        let state_ref = state.state_ref();
        self.bind_state(state_ref.base);

        let pc = state.pc;
        if let Some(entry) = self.cache.lookup(pc) {
            return Ok(entry);
        }
        debug!("block miss pc={pc:#06x}");

        if self.cache.buf().remaining() < self.config.min_free_space {
            debug!(
                "code buffer low ({} bytes left), flushing",
                self.cache.buf().remaining()
            );
            self.reset();
            self.bind_state(state_ref.base);
        }

        let compiled = match self.compile(state_ref, pc, translator) {
            Err(JitError::CodeBufferFull { .. }) if !self.cache.is_empty() => {
                debug!("code buffer exhausted compiling pc={pc:#06x}, flushing and retrying");
                self.reset();
                self.bind_state(state_ref.base);
                self.compile(state_ref, pc, translator)?
            }
            other => other?,
        };

        Ok(self.cache.buf().ptr_at(compiled.host_offset))
    }

    fn compile<T: Translator + ?Sized>(
        &mut self,
        state_ref: StateRef,
        pc: u32,
        translator: &mut T,
    ) -> Result<CachedBlock> {
        let block = translator.translate(pc);
        let helpers = self.helpers();
        BlockCompiler::new(
            &mut self.cache,
            &mut self.alloc,
            &self.backend,
            &helpers,
            state_ref,
        )
        .compile(pc, block)
    }

    /// Run the block at `state.pc` once and return its cycle count.
    ///
    /// # Safety
    /// Every IR block the translator produces must be valid for the
    /// guest, and any configured fallback helper must be sound to
    /// call with `state`. Generated code writes guest state through
    /// the address of `state`.
    pub unsafe fn run<T: Translator + ?Sized>(
        &mut self,
        state: &mut VuState,
        translator: &mut T,
    ) -> Result<u32> {
        let entry = self.exec(state, translator)?;
        let trampoline: TrampolineFn = std::mem::transmute(self.trampoline_ptr());
        let cycles = trampoline(entry, state as *mut VuState);
        Ok(cycles as u32)
    }

    /// Run blocks back to back until at least `budget` cycles have
    /// elapsed, or until a block reports zero cycles. Returns the
    /// cycles actually consumed.
    ///
    /// # Safety
    /// Same contract as [`run`](Self::run).
    pub unsafe fn run_for<T: Translator + ?Sized>(
        &mut self,
        state: &mut VuState,
        translator: &mut T,
        budget: u64,
    ) -> Result<u64> {
        let mut elapsed = 0u64;
        while elapsed < budget {
            let cycles = self.run(state, translator)?;
            if cycles == 0 {
                break;
            }
            elapsed += cycles as u64;
        }
        Ok(elapsed)
    }
}
