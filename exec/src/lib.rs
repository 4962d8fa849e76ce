//! VU execution engine: block cache lookup, compile on miss and
//! entry into generated code.
//!
//! Each [`VuJit`] is one emulated vector unit's recompiler. It owns
//! its code buffer, block cache and register allocator, so several
//! instances can coexist in one process.

pub mod config;
pub mod exec_loop;

pub use config::JitConfig;

use log::debug;
use vujit_backend::{BlockCache, CodeBuffer, Helpers, HostCodeGen, RegAlloc, X86_64CodeGen};
use vujit_core::{IrBlock, Result};

/// Source of IR for guest code.
///
/// Called only on a cache miss, with the PC of the block to build.
pub trait Translator {
    fn translate(&mut self, pc: u32) -> IrBlock;
}

impl<F: FnMut(u32) -> IrBlock> Translator for F {
    fn translate(&mut self, pc: u32) -> IrBlock {
        self(pc)
    }
}

/// Recompiler instance for one vector unit.
pub struct VuJit<B: HostCodeGen = X86_64CodeGen> {
    pub cache: BlockCache,
    pub alloc: RegAlloc,
    pub backend: B,
    pub config: JitConfig,
    /// Guest-state address the cached blocks were compiled against.
    bound_state: Option<u64>,
}

impl VuJit<X86_64CodeGen> {
    /// x86-64 instance with the given settings.
    pub fn with_config(config: JitConfig) -> Result<Self> {
        Self::new(X86_64CodeGen::new(), config)
    }
}

impl<B: HostCodeGen> VuJit<B> {
    /// Map the code buffer and emit the run trampoline at its start.
    pub fn new(mut backend: B, config: JitConfig) -> Result<Self> {
        let mut buf = CodeBuffer::new(config.code_buffer_size)?;
        backend.emit_trampoline(&mut buf);
        buf.set_executable()?;

        let mut cache = BlockCache::new(buf);
        cache.set_code_start();
        let alloc = RegAlloc::new(backend.abi());
        debug!(
            "vu jit ready: {} byte code buffer, trampoline {} bytes",
            cache.buf().capacity(),
            cache.code_start()
        );

        Ok(Self {
            cache,
            alloc,
            backend,
            config,
            bound_state: None,
        })
    }

    /// Drop every compiled block and return the allocator to its
    /// cold state. The trampoline survives.
    pub fn reset(&mut self) {
        debug!("vu jit reset: dropping {} blocks", self.cache.len());
        self.cache.flush_all();
        self.alloc.reset(self.backend.abi());
        self.bound_state = None;
    }

    /// Drop the block compiled for `pc`, forcing a recompile on the
    /// next lookup. Returns whether a block was cached.
    pub fn invalidate(&mut self, pc: u32) -> bool {
        let dropped = self.cache.invalidate(pc);
        if dropped {
            debug!("invalidated block pc={pc:#06x}");
        }
        dropped
    }

    pub fn is_cached(&self, pc: u32) -> bool {
        self.cache.get(pc).is_some()
    }

    /// Entry point of the run trampoline.
    pub fn trampoline_ptr(&self) -> *const u8 {
        self.cache.buf().ptr_at(self.backend.trampoline_offset())
    }

    fn helpers(&self) -> Helpers {
        Helpers {
            fallback: self.config.fallback,
        }
    }

    /// Compiled blocks embed the state address; a different state
    /// invalidates all of them.
    fn bind_state(&mut self, base: u64) {
        match self.bound_state {
            Some(bound) if bound == base => {}
            Some(bound) => {
                debug!("guest state moved {bound:#x} -> {base:#x}");
                self.reset();
                self.bound_state = Some(base);
            }
            None => self.bound_state = Some(base),
        }
    }
}
