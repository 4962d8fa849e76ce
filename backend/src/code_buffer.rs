use std::io;
use std::ptr;

/// Default code buffer size: 16 MiB.
pub const DEFAULT_CODE_BUF_SIZE: usize = 16 * 1024 * 1024;

/// JIT code buffer backed by mmap'd memory.
///
/// Holds the trampoline followed by every compiled block.
/// Follows W^X discipline: the buffer is either writable
/// or executable, never both.
pub struct CodeBuffer {
    ptr: *mut u8,
    size: usize,
    offset: usize,
    executable: bool,
}

// SAFETY: CodeBuffer owns its mmap'd memory exclusively.
unsafe impl Send for CodeBuffer {}

impl CodeBuffer {
    /// Allocate a new code buffer of the given size (rounded up to page size).
    ///
    /// The buffer starts out writable.
    pub fn new(size: usize) -> io::Result<Self> {
        let page_size = page_size();
        let size = (size.max(1) + page_size - 1) & !(page_size - 1);

        // SAFETY: mmap with MAP_ANONYMOUS | MAP_PRIVATE, no file backing.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        Ok(Self {
            ptr: ptr as *mut u8,
            size,
            offset: 0,
            executable: false,
        })
    }

    /// Current write offset.
    #[inline]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Total capacity in bytes.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// Remaining writable bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.size - self.offset
    }

    /// Whether the buffer is currently mapped executable.
    #[inline]
    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Raw pointer to the start of the buffer.
    #[inline]
    pub fn base_ptr(&self) -> *const u8 {
        self.ptr as *const u8
    }

    /// Pointer at a given offset.
    #[inline]
    pub fn ptr_at(&self, offset: usize) -> *const u8 {
        assert!(offset <= self.size);
        unsafe { self.ptr.add(offset) as *const u8 }
    }

    /// Rewind the write offset (e.g. to drop a half-written block).
    #[inline]
    pub fn set_offset(&mut self, offset: usize) {
        assert!(offset <= self.size);
        self.offset = offset;
    }

    // -- Emit methods --

    #[inline]
    fn check_writable(&self, len: usize) {
        assert!(!self.executable, "emit into executable code buffer");
        assert!(self.offset + len <= self.size, "code buffer overflow");
    }

    #[inline]
    pub fn emit_u8(&mut self, val: u8) {
        self.check_writable(1);
        unsafe { self.ptr.add(self.offset).write(val) };
        self.offset += 1;
    }

    #[inline]
    pub fn emit_u16(&mut self, val: u16) {
        self.check_writable(2);
        unsafe { (self.ptr.add(self.offset) as *mut u16).write_unaligned(val) };
        self.offset += 2;
    }

    #[inline]
    pub fn emit_u32(&mut self, val: u32) {
        self.check_writable(4);
        unsafe { (self.ptr.add(self.offset) as *mut u32).write_unaligned(val) };
        self.offset += 4;
    }

    #[inline]
    pub fn emit_u64(&mut self, val: u64) {
        self.check_writable(8);
        unsafe { (self.ptr.add(self.offset) as *mut u64).write_unaligned(val) };
        self.offset += 8;
    }

    #[inline]
    pub fn emit_bytes(&mut self, data: &[u8]) {
        self.check_writable(data.len());
        unsafe {
            ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.ptr.add(self.offset),
                data.len(),
            );
        }
        self.offset += data.len();
    }

    // -- Permission management (W^X) --

    /// Make the buffer executable and non-writable.
    pub fn set_executable(&mut self) -> io::Result<()> {
        self.protect(libc::PROT_READ | libc::PROT_EXEC)?;
        self.executable = true;
        Ok(())
    }

    /// Make the buffer writable and non-executable.
    pub fn set_writable(&mut self) -> io::Result<()> {
        self.protect(libc::PROT_READ | libc::PROT_WRITE)?;
        self.executable = false;
        Ok(())
    }

    fn protect(&self, prot: libc::c_int) -> io::Result<()> {
        let ret = unsafe {
            libc::mprotect(self.ptr as *mut libc::c_void, self.size, prot)
        };
        if ret != 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Get the generated code as a byte slice (up to current offset).
    pub fn as_slice(&self) -> &[u8] {
        // SAFETY: ptr..ptr+offset has been written and is always readable.
        unsafe { std::slice::from_raw_parts(self.ptr, self.offset) }
    }
}

impl Drop for CodeBuffer {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe {
                libc::munmap(self.ptr as *mut libc::c_void, self.size);
            }
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf is always safe to call.
    unsafe { libc::sysconf(libc::_SC_PAGESIZE) as usize }
}
