use std::collections::HashMap;

use log::{debug, warn};
use vujit_core::{JitError, Result};

use crate::code_buffer::CodeBuffer;

/// A compiled block living in the code buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedBlock {
    /// Guest PC the block was compiled for.
    pub pc: u32,
    pub host_offset: usize,
    pub host_size: usize,
    /// Cycle count returned by the block.
    pub cycles: u32,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    pc: u32,
    start: usize,
}

/// Compiled blocks keyed by guest PC, plus the code buffer they
/// are emitted into.
///
/// The buffer is writable only between `begin` and `seal` (or
/// `abandon`); at every other time it is executable.
pub struct BlockCache {
    buf: CodeBuffer,
    blocks: HashMap<u32, CachedBlock>,
    /// Offset where block code starts (after the trampoline).
    code_start: usize,
    pending: Option<Pending>,
}

impl BlockCache {
    pub fn new(buf: CodeBuffer) -> Self {
        let code_start = buf.offset();
        Self {
            buf,
            blocks: HashMap::new(),
            code_start,
            pending: None,
        }
    }

    #[inline]
    pub fn buf(&self) -> &CodeBuffer {
        &self.buf
    }

    #[inline]
    pub fn buf_mut(&mut self) -> &mut CodeBuffer {
        &mut self.buf
    }

    /// Keep everything emitted so far across `flush_all`.
    pub fn set_code_start(&mut self) {
        self.code_start = self.buf.offset();
    }

    #[inline]
    pub fn code_start(&self) -> usize {
        self.code_start
    }

    pub fn get(&self, pc: u32) -> Option<&CachedBlock> {
        self.blocks.get(&pc)
    }

    /// Executable entry point of the block compiled for `pc`.
    /// Nothing is handed out while the buffer is writable.
    pub fn lookup(&self, pc: u32) -> Option<*const u8> {
        if !self.buf.is_executable() {
            return None;
        }
        self.blocks
            .get(&pc)
            .map(|b| self.buf.ptr_at(b.host_offset))
    }

    /// Start emitting a block for `pc`: require `min_free` bytes of
    /// headroom and make the buffer writable.
    pub fn begin(&mut self, pc: u32, min_free: usize) -> Result<()> {
        assert!(self.pending.is_none(), "block {pc:#x} begun while another is open");
        let remaining = self.buf.remaining();
        if remaining < min_free {
            return Err(JitError::CodeBufferFull {
                needed: min_free,
                remaining,
            });
        }
        self.buf.set_writable()?;
        self.pending = Some(Pending {
            pc,
            start: self.buf.offset(),
        });
        Ok(())
    }

    #[inline]
    pub fn is_emitting(&self) -> bool {
        self.pending.is_some()
    }

    /// Finish the open block: flip the buffer back to executable
    /// and record the block under its PC. If the protection change
    /// fails the block stays open for `abandon`.
    pub fn seal(&mut self, cycles: u32) -> Result<CachedBlock> {
        let Some(pending) = self.pending else {
            panic!("seal without an open block");
        };
        self.buf.set_executable()?;
        self.pending = None;
        let block = CachedBlock {
            pc: pending.pc,
            host_offset: pending.start,
            host_size: self.buf.offset() - pending.start,
            cycles,
        };
        if self.blocks.insert(block.pc, block).is_some() {
            debug!("replaced cached block for pc {:#06x}", block.pc);
        }
        Ok(block)
    }

    /// Discard the open block's partial code and restore execute
    /// protection. No-op when nothing is open.
    pub fn abandon(&mut self) -> Result<()> {
        if let Some(pending) = self.pending.take() {
            warn!(
                "abandoning block for pc {:#06x} ({} bytes emitted)",
                pending.pc,
                self.buf.offset() - pending.start
            );
            self.buf.set_offset(pending.start);
            self.buf.set_executable()?;
        }
        Ok(())
    }

    /// Drop the block compiled for `pc`. Its code space is not
    /// reclaimed until the next `flush_all`.
    pub fn invalidate(&mut self, pc: u32) -> bool {
        self.blocks.remove(&pc).is_some()
    }

    /// Drop every block and rewind the buffer to `code_start`.
    pub fn flush_all(&mut self) {
        debug!(
            "flushing {} blocks, reclaiming {} bytes",
            self.blocks.len(),
            self.buf.offset() - self.code_start
        );
        assert!(self.pending.is_none(), "flush while a block is open");
        self.blocks.clear();
        self.buf.set_offset(self.code_start);
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
