//! Compiling one IR block into the block cache.

use log::{debug, warn};
use vujit_core::{IrBlock, JitError, Result, StateRef};

use crate::abi::AbiState;
use crate::block_cache::{BlockCache, CachedBlock};
use crate::dispatch::{Dispatcher, Helpers};
use crate::regalloc::RegAlloc;
use crate::{EmitCx, HostCodeGen};

/// Upper bound on host bytes emitted for one IR instruction,
/// including a full flush of both pools before a helper call.
pub const MAX_INSN_BYTES: usize = 1024;

/// Single-use compiler for one block. `compile` consumes it, and
/// the cache's open-block marker tracks the emitting phase.
///
/// On success the block is sealed in the cache and the allocator
/// is cold again. On failure the partial code is discarded, the
/// buffer is executable again and the allocator is reset.
pub struct BlockCompiler<'a, B: HostCodeGen> {
    cache: &'a mut BlockCache,
    alloc: &'a mut RegAlloc,
    host: &'a B,
    helpers: &'a Helpers,
    state: StateRef,
    abi: AbiState,
}

impl<'a, B: HostCodeGen> BlockCompiler<'a, B> {
    pub fn new(
        cache: &'a mut BlockCache,
        alloc: &'a mut RegAlloc,
        host: &'a B,
        helpers: &'a Helpers,
        state: StateRef,
    ) -> Self {
        Self {
            cache,
            alloc,
            host,
            helpers,
            state,
            abi: AbiState::new(),
        }
    }

    pub fn compile(mut self, pc: u32, block: IrBlock) -> Result<CachedBlock> {
        debug_assert!(self.alloc.is_cold(), "compile entered with live bindings");

        debug!(
            "compiling block pc={pc:#06x} ({} instrs, {} cycles)",
            block.instruction_count(),
            block.cycle_count()
        );

        self.cache.begin(pc, MAX_INSN_BYTES)?;

        let cycles = match self.emit_body(block) {
            Ok(cycles) => cycles,
            Err(err) => {
                warn!("compile of pc={pc:#06x} failed: {err}");
                self.alloc.reset(self.host.abi());
                if let Err(restore) = self.cache.abandon() {
                    warn!("restoring code buffer after failed compile: {restore}");
                }
                return Err(err);
            }
        };

        let compiled = match self.cache.seal(cycles) {
            Ok(compiled) => compiled,
            Err(err) => {
                warn!("sealing pc={pc:#06x} failed: {err}");
                if let Err(restore) = self.cache.abandon() {
                    warn!("restoring code buffer after failed seal: {restore}");
                }
                return Err(err);
            }
        };
        debug!(
            "sealed pc={pc:#06x} at offset {:#x}, {} bytes",
            compiled.host_offset, compiled.host_size
        );
        Ok(compiled)
    }

    /// Steps between `begin` and `seal`: prologue, each instruction
    /// in order, flush, return value, epilogue.
    fn emit_body(&mut self, mut block: IrBlock) -> Result<u32> {
        let cycles = block.cycle_count();
        let mut cx = EmitCx {
            buf: self.cache.buf_mut(),
            host: self.host,
            state: self.state,
        };

        self.host.emit_prologue(cx.buf);
        {
            let mut dispatcher = Dispatcher {
                cx: &mut cx,
                alloc: &mut *self.alloc,
                abi: &mut self.abi,
                helpers: self.helpers,
            };
            while let Some(instr) = block.next_instr() {
                reserve(dispatcher.cx.buf.remaining())?;
                dispatcher.dispatch(&instr)?;
            }
        }

        reserve(cx.buf.remaining())?;
        self.alloc.flush(&mut cx);
        self.host.out_set_return(cx.buf, cycles);
        self.host.emit_epilogue(cx.buf);
        Ok(cycles)
    }
}

fn reserve(remaining: usize) -> Result<()> {
    if remaining < MAX_INSN_BYTES {
        return Err(JitError::CodeBufferFull {
            needed: MAX_INSN_BYTES,
            remaining,
        });
    }
    Ok(())
}
