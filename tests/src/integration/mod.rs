//! End-to-end tests: compile IR blocks to x86-64 and run them
//! against a real `VuState` through the trampoline.

use vujit_core::{Instruction, IrBlock, JitError, Opcode, Vector, VuState};
use vujit_exec::{JitConfig, VuJit};

/// Compile `instrs` as the block at `state.pc` and run it once.
/// Returns the block's reported cycle count.
fn run_block(jit: &mut VuJit, state: &mut VuState, cycles: u32, instrs: &[Instruction]) -> u32 {
    let mut tr = |pc: u32| {
        let mut b = IrBlock::new(pc, cycles);
        b.extend(instrs.iter().copied());
        b
    };
    unsafe { jit.run(state, &mut tr) }.unwrap()
}

fn run_once(state: &mut VuState, cycles: u32, instrs: &[Instruction]) -> u32 {
    crate::init_logger();
    let mut jit = VuJit::with_config(JitConfig::default()).unwrap();
    run_block(&mut jit, state, cycles, instrs)
}

// -- Scenarios --

#[test]
fn test_load_immediate_reaches_state() {
    let mut state = VuState::new();
    let cycles = run_once(&mut state, 5, &[Instruction::load_immediate(5, 0x1234)]);
    assert_eq!(cycles, 5);
    assert_eq!(state.vi[5], 0x1234);
    assert_eq!(state.vi[4], 0);
    assert_eq!(state.vi[6], 0);
}

#[test]
fn test_branch_sets_pc() {
    for start in [0u32, 0x100, 0x3FF8] {
        let mut state = VuState::new();
        state.pc = start;
        run_once(&mut state, 1, &[Instruction::branch(0x100)]);
        assert_eq!(state.pc, 0x100);
    }
}

#[test]
fn test_add_immediate_wraps() {
    let mut state = VuState::new();
    state.vi[1] = 1;
    run_once(
        &mut state,
        1,
        &[Instruction::add_immediate_unsigned(2, 1, 0xFFFF)],
    );
    assert_eq!(state.vi[2], 0x0000);
    assert_eq!(state.vi[1], 1);
}

#[test]
fn test_add_immediate_in_place() {
    let mut state = VuState::new();
    state.vi[7] = 0x00FF;
    run_once(
        &mut state,
        1,
        &[
            Instruction::add_immediate_unsigned(7, 7, 0x0101),
            Instruction::add_immediate_unsigned(7, 7, 1),
        ],
    );
    assert_eq!(state.vi[7], 0x0201);
}

#[test]
fn test_eviction_preserves_values() {
    // 15 non-zero integer registers against 14 allocatable host slots.
    let mut instrs: Vec<Instruction> = (1..=15u8)
        .map(|g| Instruction::load_immediate(g, 0x1000 + g as u16))
        .collect();
    // Re-read the first (evicted) register after everything else.
    instrs.push(Instruction::add_immediate_unsigned(1, 1, 0x10));

    let mut state = VuState::new();
    run_once(&mut state, 15, &instrs);
    assert_eq!(state.vi[1], 0x1011);
    for g in 2..=15usize {
        assert_eq!(state.vi[g], 0x1000 + g as u16, "vi{g}");
    }
}

#[test]
fn test_move_register() {
    let mut state = VuState::new();
    state.vi[3] = 0xBEEF;
    run_once(
        &mut state,
        1,
        &[
            Instruction::move_register(4, 3),
            Instruction::move_register(9, 9),
        ],
    );
    assert_eq!(state.vi[4], 0xBEEF);
    assert_eq!(state.vi[3], 0xBEEF);
    assert_eq!(state.vi[9], 0);
}

#[test]
fn test_branch_and_link() {
    let mut state = VuState::new();
    run_once(
        &mut state,
        2,
        &[Instruction::branch_and_link(15, 0x200, 0x30)],
    );
    assert_eq!(state.pc, 0x200);
    assert_eq!(state.vi[15], 0x30);
}

#[test]
fn test_branch_indirect_scales_index() {
    let mut state = VuState::new();
    state.vi[6] = 0x40;
    run_once(&mut state, 1, &[Instruction::branch_indirect(6)]);
    assert_eq!(state.pc, 0x200);
    assert_eq!(state.vi[6], 0x40);
}

#[test]
fn test_branch_indirect_ignores_upper_bits() {
    // A 16-bit immediate move leaves bits 16-63 of the host register
    // as they were.
    let mut state = VuState::new();
    state.pc = 0xFFFF_FFFF;
    run_once(
        &mut state,
        1,
        &[
            Instruction::load_immediate(6, 0xFFFF),
            Instruction::branch_indirect(6),
        ],
    );
    assert_eq!(state.pc, 0xFFFF << 3);
    assert_eq!(state.vi[6], 0xFFFF);
}

#[test]
fn test_hardwired_register_reads_zero() {
    // Same answer with and without every integer slot in use.
    for pressure in [false, true] {
        let mut instrs = vec![Instruction::load_immediate(0, 0x55)];
        if pressure {
            instrs.extend((2..=15u8).map(|g| Instruction::load_immediate(g, g as u16)));
        }
        instrs.push(Instruction::add_immediate_unsigned(1, 0, 1));

        let mut state = VuState::new();
        run_once(&mut state, 1, &instrs);
        assert_eq!(state.vi[0], 0, "pressure={pressure}");
        assert_eq!(state.vi[1], 1, "pressure={pressure}");
        assert_eq!(state.vf[0], Vector::from_f32([0.0, 0.0, 0.0, 1.0]));
    }
}

#[test]
fn test_untouched_registers_survive() {
    let mut state = VuState::new();
    for (i, v) in state.vi.iter_mut().enumerate() {
        *v = 0x100 * i as u16;
    }
    state.vf[5] = Vector([1, 2, 3, 4]);
    run_once(&mut state, 1, &[Instruction::load_immediate(2, 9)]);
    assert_eq!(state.vi[2], 9);
    assert_eq!(state.vi[3], 0x300);
    assert_eq!(state.vi[15], 0xF00);
    assert_eq!(state.vf[5], Vector([1, 2, 3, 4]));
}

// -- Fallback helper --

extern "C" fn bump_helper(state: *mut VuState, raw: u32) {
    // SAFETY: generated code passes the state it was compiled against.
    let state = unsafe { &mut *state };
    state.vi[8] = state.vi[3].wrapping_add(1);
    state.vi[10] = raw as u16;
}

#[test]
fn test_fallback_sees_flushed_state() {
    crate::init_logger();
    let mut jit = VuJit::with_config(JitConfig::default().fallback(bump_helper)).unwrap();
    let mut state = VuState::new();
    run_block(
        &mut jit,
        &mut state,
        3,
        &[
            Instruction::load_immediate(3, 0x55),
            Instruction::load_immediate(11, 0x77),
            Instruction::fallback(0x0000_ABCD),
            // Reads what the helper wrote.
            Instruction::add_immediate_unsigned(9, 8, 1),
        ],
    );
    assert_eq!(state.vi[3], 0x55);
    assert_eq!(state.vi[8], 0x56);
    assert_eq!(state.vi[9], 0x57);
    assert_eq!(state.vi[10], 0xABCD);
    assert_eq!(state.vi[11], 0x77);
}

// -- Instance behavior --

#[test]
fn test_cached_block_reruns() {
    crate::init_logger();
    let mut jit = VuJit::with_config(JitConfig::default()).unwrap();
    let mut state = VuState::new();
    let instrs = [Instruction::add_immediate_unsigned(1, 1, 2)];

    for _ in 0..3 {
        assert_eq!(run_block(&mut jit, &mut state, 4, &instrs), 4);
    }
    assert_eq!(state.vi[1], 6);
    assert_eq!(jit.cache.len(), 1);
}

#[test]
fn test_recompile_is_deterministic() {
    crate::init_logger();
    let instrs = [
        Instruction::load_immediate(2, 0x20),
        Instruction::add_immediate_unsigned(3, 2, 0x5),
        Instruction::move_register(4, 3),
        Instruction::branch_and_link(5, 0x80, 0x11),
    ];
    let mut jit = VuJit::with_config(JitConfig::default()).unwrap();

    let mut first = VuState::new();
    run_block(&mut jit, &mut first, 1, &instrs);
    jit.invalidate(0);

    let mut second = Box::new(VuState::new());
    run_block(&mut jit, &mut second, 1, &instrs);

    assert_eq!(first.vi, second.vi);
    assert_eq!(first.pc, second.pc);
}

#[test]
fn test_independent_instances() {
    crate::init_logger();
    let mut jit_a = VuJit::with_config(JitConfig::default()).unwrap();
    let mut jit_b = VuJit::with_config(JitConfig::default()).unwrap();
    let mut a = VuState::new();
    let mut b = VuState::new();

    run_block(&mut jit_a, &mut a, 1, &[Instruction::load_immediate(1, 0xA)]);
    run_block(&mut jit_b, &mut b, 1, &[Instruction::load_immediate(1, 0xB)]);
    run_block(&mut jit_a, &mut a, 1, &[Instruction::load_immediate(1, 0xA)]);

    assert_eq!(a.vi[1], 0xA);
    assert_eq!(b.vi[1], 0xB);
    assert_eq!(jit_a.cache.len(), 1);
    assert_eq!(jit_b.cache.len(), 1);
}

#[test]
fn test_run_for_accumulates_cycles() {
    crate::init_logger();
    let mut jit = VuJit::with_config(JitConfig::default()).unwrap();
    let mut state = VuState::new();
    // A loop at pc 0 that counts in vi1.
    let mut tr = |pc: u32| {
        let mut b = IrBlock::new(pc, 4);
        b.push(Instruction::add_immediate_unsigned(1, 1, 1));
        b.push(Instruction::branch(0));
        b
    };
    let elapsed = unsafe { jit.run_for(&mut state, &mut tr, 10) }.unwrap();
    assert_eq!(elapsed, 12);
    assert_eq!(state.vi[1], 3);
    assert_eq!(state.pc, 0);
}

#[test]
fn test_run_surfaces_compile_errors() {
    crate::init_logger();
    let mut jit = VuJit::with_config(JitConfig::default()).unwrap();
    let mut state = VuState::new();
    let mut tr = |pc: u32| {
        let mut b = IrBlock::new(pc, 1);
        b.push(Instruction::load_immediate(2, 1));
        b.push(Instruction::new(Opcode::BranchEqual));
        b
    };
    let err = unsafe { jit.run(&mut state, &mut tr) }.unwrap_err();
    assert!(matches!(err, JitError::UnsupportedOpcode(Opcode::BranchEqual)));
    // Nothing ran.
    assert_eq!(state.vi[2], 0);
}
