use vujit_backend::code_buffer::DEFAULT_CODE_BUF_SIZE;
use vujit_backend::FallbackFn;

/// Default headroom below which the next compile starts from an
/// empty cache.
pub const DEFAULT_MIN_FREE_SPACE: usize = 4096;

/// Per-instance settings for a [`VuJit`](crate::VuJit).
#[derive(Debug, Clone, Copy)]
pub struct JitConfig {
    /// Code buffer size in bytes (rounded up to the page size).
    pub code_buffer_size: usize,
    /// Flush every cached block when less than this remains before
    /// a compile.
    pub min_free_space: usize,
    /// Interpreter called for `FallbackInterpreter` instructions.
    pub fallback: Option<FallbackFn>,
}

impl Default for JitConfig {
    fn default() -> Self {
        Self {
            code_buffer_size: DEFAULT_CODE_BUF_SIZE,
            min_free_space: DEFAULT_MIN_FREE_SPACE,
            fallback: None,
        }
    }
}

impl JitConfig {
    pub fn code_buffer_size(mut self, bytes: usize) -> Self {
        self.code_buffer_size = bytes;
        self
    }

    pub fn min_free_space(mut self, bytes: usize) -> Self {
        self.min_free_space = bytes;
        self
    }

    pub fn fallback(mut self, helper: FallbackFn) -> Self {
        self.fallback = Some(helper);
        self
    }
}
