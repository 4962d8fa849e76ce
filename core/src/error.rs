use thiserror::Error;

use crate::ir::Opcode;
use crate::state::Pool;

/// Errors surfaced by the VU recompiler.
///
/// Any of these aborts the block being compiled; the instance
/// itself stays usable.
#[derive(Debug, Error)]
pub enum JitError {
    #[error("invalid {pool} register index {index} (pool holds {limit})")]
    InvalidRegisterIndex { pool: Pool, index: u8, limit: usize },

    #[error("ABI integer arguments exceeded {max}")]
    ArgumentLimitExceeded { max: usize },

    #[error("unsupported IR opcode {0}")]
    UnsupportedOpcode(Opcode),

    #[error("IR opcode {0} is recognized but not implemented")]
    UnimplementedOpcode(Opcode),

    #[error("code buffer exhausted: {remaining} bytes left, need {needed}")]
    CodeBufferFull { needed: usize, remaining: usize },

    #[error("code memory operation failed: {0}")]
    CodeMemory(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, JitError>;
