use vujit_backend::{BlockCache, BlockCompiler, CodeBuffer, Helpers, RegAlloc, MAX_INSN_BYTES};
use vujit_core::{Instruction, IrBlock, JitError, Opcode};

use crate::mock::{pc, state_ref, vi, Emitted, Recorder, MOCK_ABI};

struct Fixture {
    cache: BlockCache,
    alloc: RegAlloc,
    host: Recorder,
    helpers: Helpers,
}

impl Fixture {
    fn new(buf_size: usize) -> Self {
        let mut buf = CodeBuffer::new(buf_size).unwrap();
        let mut host = Recorder::new();
        vujit_backend::HostCodeGen::emit_trampoline(&mut host, &mut buf);
        host.take();
        let mut cache = BlockCache::new(buf);
        cache.set_code_start();
        cache.buf_mut().set_executable().unwrap();
        Self {
            cache,
            alloc: RegAlloc::new(&MOCK_ABI),
            host,
            helpers: Helpers::default(),
        }
    }

    fn compile(&mut self, block: IrBlock) -> vujit_core::Result<vujit_backend::CachedBlock> {
        let pc = block.pc();
        BlockCompiler::new(
            &mut self.cache,
            &mut self.alloc,
            &self.host,
            &self.helpers,
            state_ref(),
        )
        .compile(pc, block)
    }
}

fn block(pc: u32, cycles: u32, instrs: &[Instruction]) -> IrBlock {
    let mut b = IrBlock::new(pc, cycles);
    b.extend(instrs.iter().copied());
    b
}

#[test]
fn test_compile_emits_frame_flush_and_return() {
    crate::init_logger();
    let mut fx = Fixture::new(64 * 1024);
    let compiled = fx
        .compile(block(
            0x30,
            12,
            &[
                Instruction::load_immediate(5, 0x1234),
                Instruction::branch(0x100),
            ],
        ))
        .unwrap();

    assert_eq!(
        fx.host.take(),
        [
            Emitted::Prologue,
            Emitted::MovI16 { dst: 1, imm: 0x1234 },
            Emitted::StI32 { offset: pc(), imm: 0x100 },
            Emitted::StInt { src: 1, offset: vi(5) },
            Emitted::SetReturn(12),
            Emitted::Epilogue,
        ]
    );
    assert_eq!(compiled.pc, 0x30);
    assert_eq!(compiled.cycles, 12);
    assert_eq!(compiled.host_offset, fx.cache.code_start());
    assert_eq!(compiled.host_size, 6);
    assert!(fx.alloc.is_cold());
    assert!(fx.cache.buf().is_executable());
    assert!(fx.cache.lookup(0x30).is_some());
}

#[test]
fn test_empty_block_still_returns_cycles() {
    let mut fx = Fixture::new(64 * 1024);
    fx.compile(IrBlock::new(0, 3)).unwrap();
    assert_eq!(
        fx.host.take(),
        [Emitted::Prologue, Emitted::SetReturn(3), Emitted::Epilogue]
    );
}

#[test]
fn test_failed_compile_rolls_back() {
    crate::init_logger();
    let mut fx = Fixture::new(64 * 1024);
    let start = fx.cache.buf().offset();

    let err = fx
        .compile(block(
            0x8,
            4,
            &[
                Instruction::load_immediate(2, 7),
                Instruction::new(Opcode::VAddVectors),
            ],
        ))
        .unwrap_err();
    assert!(matches!(err, JitError::UnsupportedOpcode(Opcode::VAddVectors)));

    assert_eq!(fx.cache.buf().offset(), start);
    assert!(fx.cache.buf().is_executable());
    assert!(fx.cache.is_empty());
    assert!(!fx.cache.is_emitting());
    assert!(fx.alloc.is_cold());

    // The instance is still usable.
    fx.compile(block(0x8, 4, &[Instruction::load_immediate(2, 7)]))
        .unwrap();
    assert_eq!(fx.cache.len(), 1);
}

#[test]
fn test_invalid_register_aborts_compile() {
    let mut fx = Fixture::new(64 * 1024);
    let err = fx
        .compile(block(0, 1, &[Instruction::load_immediate(16, 1)]))
        .unwrap_err();
    assert!(matches!(err, JitError::InvalidRegisterIndex { index: 16, .. }));
    assert!(fx.cache.is_empty());
}

#[test]
fn test_buffer_exhaustion_is_an_error() {
    let mut fx = Fixture::new(4096);
    let mut b = IrBlock::new(0, 1);
    // One recorded byte per instruction: more than fits.
    for _ in 0..5000 {
        b.push(Instruction::branch(0));
    }
    let err = fx.compile(b).unwrap_err();
    match err {
        JitError::CodeBufferFull { needed, remaining } => {
            assert_eq!(needed, MAX_INSN_BYTES);
            assert!(remaining < MAX_INSN_BYTES);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(fx.cache.is_empty());
    assert_eq!(fx.cache.buf().offset(), fx.cache.code_start());
}
