use super::asm::*;
use super::{cpu_with_code, run_code, CODE_BASE};

use crate::bus::Word;
use crate::cpu::cop0::{self, Cop0, Exception};
use crate::cpu::{Irq, Stage};

fn exccode(cpu: &crate::cpu::Cpu) -> u32 {
    (cpu.cop0.read_reg(cop0::CAUSE) >> 2) & 0x1f
}

#[test]
fn zero_reg() {
    let cpu = run_code(&[
        addiu(0, 0, 5),
        ori(0, 0, 7),
        lui(0, 0x1234),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(0), 0);
}

#[test]
fn branch_delay() {
    let cpu = run_code(&[
        addiu(2, 0, 0),
        j(CODE_BASE + 16),
        addiu(2, 2, 1),
        addiu(2, 2, 40),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(2), 1);
}

#[test]
fn branch_taken() {
    let cpu = run_code(&[
        beq(0, 0, 2),
        addiu(2, 0, 5),
        addiu(3, 0, 7),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(2), 5);
    assert_eq!(cpu.read_reg(3), 0);
}

#[test]
fn branch_not_taken_runs_delay_slot() {
    let cpu = run_code(&[
        addiu(1, 0, 1),
        beq(1, 0, 4),
        addiu(2, 0, 5),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(1), 1);
    assert_eq!(cpu.read_reg(2), 5);
}

#[test]
fn branch_transitions_to_delay() {
    let (mut cpu, _ctrl) = cpu_with_code(&[beq(0, 0, 2), nop(), nop(), brk()]);

    // The first step performs the reset jump and executes the branch.
    cpu.step(&mut ());
    assert_eq!(cpu.stage, Stage::Delay);
    assert_eq!(cpu.jump_addr, CODE_BASE + 12);

    // The next step runs the delay slot and pends the jump.
    cpu.step(&mut ());
    assert_eq!(cpu.stage, Stage::Jump);
}

#[test]
fn branch_likely_not_taken_skips_delay_slot() {
    let cpu = run_code(&[
        addiu(1, 0, 1),
        bnel(1, 1, 1),
        addiu(2, 0, 5),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(2), 0);
}

#[test]
fn branch_likely_taken_runs_delay_slot() {
    let cpu = run_code(&[
        addiu(1, 0, 1),
        beql(1, 1, 1),
        addiu(2, 0, 5),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(2), 5);
}

#[test]
fn bltzl_not_taken_skips_delay_slot() {
    let cpu = run_code(&[
        bltzl(0, 1),
        addiu(2, 0, 5),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(2), 0);
}

#[test]
fn jal_links() {
    let cpu = run_code(&[
        jal(CODE_BASE + 12),
        nop(),
        brk(),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(31), CODE_BASE + 8);
}

#[test]
fn jalr_links_and_runs_delay_slot() {
    let cpu = run_code(&[
        lui(1, 0xbfc0),
        ori(1, 1, 0x14),
        jalr(31, 1),
        addiu(2, 0, 3),
        brk(),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(31), CODE_BASE + 16);
    assert_eq!(cpu.read_reg(2), 3);
}

#[test]
fn bltzal_links_even_when_not_taken() {
    let cpu = run_code(&[
        bltzal(0, 1),
        nop(),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(31), CODE_BASE + 8);
}

#[test]
fn add_overflow_faults_and_leaves_destination() {
    let (mut cpu, _ctrl) = cpu_with_code(&[
        lui(1, 0x7fff),
        ori(1, 1, 0xffff),
        addiu(2, 0, 1),
        add(3, 1, 2),
        brk(),
    ]);
    for _ in 0..4 {
        cpu.step(&mut ());
    }
    assert_eq!(cpu.read_reg(3), 0);
    assert_eq!(exccode(&cpu), 12);
    assert_eq!(cpu.cop0.read_reg(cop0::EPC), CODE_BASE + 12);
    assert_eq!(cpu.stage, Stage::Jump);
    assert_eq!(cpu.jump_addr, 0xbfc0_0180);
}

#[test]
fn sub_overflow_faults() {
    let (mut cpu, _ctrl) = cpu_with_code(&[
        lui(1, 0x8000),
        addiu(2, 0, 1),
        sub(3, 1, 2),
        brk(),
    ]);
    for _ in 0..3 {
        cpu.step(&mut ());
    }
    assert_eq!(cpu.read_reg(3), 0);
    assert_eq!(exccode(&cpu), 12);
}

#[test]
fn addi_overflow_faults() {
    let (mut cpu, _ctrl) = cpu_with_code(&[
        lui(1, 0x7fff),
        ori(1, 1, 0xffff),
        addi(2, 1, 1),
        brk(),
    ]);
    for _ in 0..3 {
        cpu.step(&mut ());
    }
    assert_eq!(cpu.read_reg(2), 0);
    assert_eq!(exccode(&cpu), 12);
}

#[test]
fn add_and_sub_in_range() {
    let cpu = run_code(&[
        addiu(1, 0, 21),
        addiu(2, 0, 2),
        add(3, 1, 2),
        sub(4, 1, 2),
        addu(5, 1, 2),
        or(7, 1, 2),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(3), 23);
    assert_eq!(cpu.read_reg(4), 19);
    assert_eq!(cpu.read_reg(5), 23);
    assert_eq!(cpu.read_reg(7), 23);
}

#[test]
fn simple_loop() {
    let cpu = run_code(&[
        addiu(2, 0, 1),
        sll(2, 2, 1),
        slti(3, 2, 1024),
        bne(3, 0, -3),
        nop(),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(2), 1024);
}

#[test]
fn regimm_branches() {
    let cpu = run_code(&[
        addiu(1, 0, -1),
        bltz(1, 2),
        addiu(2, 0, 1),
        addiu(3, 0, 1),
        bgez(1, 2),
        addiu(4, 0, 1),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(2), 1);
    assert_eq!(cpu.read_reg(3), 0);
    assert_eq!(cpu.read_reg(4), 1);
}

#[test]
fn syscall_handler_returns_with_rfe() {
    let mut code = vec![
        syscall(),
        addiu(9, 0, 55),
        brk(),
    ];
    // The exception handler sits at the boot vector, ROM offset 0x180.
    code.resize(0x180 / 4, nop());
    code.extend([
        mfc0(26, 14),
        addiu(26, 26, 4),
        jr(26),
        // The mode stack is restored from the jump's delay slot.
        rfe(),
    ]);

    let cpu = run_code(&code);
    assert_eq!(cpu.read_reg(9), 55);
    assert_eq!(cpu.read_reg(26), CODE_BASE + 4);
}

#[test]
fn divu_by_zero() {
    let cpu = run_code(&[
        addiu(4, 0, 7),
        divu(4, 0),
        mflo(5),
        mfhi(6),
        brk(),
    ]);
    assert_eq!(cpu.lo, 0xffff_ffff);
    assert_eq!(cpu.hi, 7);
    assert_eq!(cpu.read_reg(5), 0xffff_ffff);
    assert_eq!(cpu.read_reg(6), 7);
}

#[test]
fn div_by_zero_negative_numerator() {
    let cpu = run_code(&[
        addiu(4, 0, -5),
        div(4, 0),
        brk(),
    ]);
    assert_eq!(cpu.lo, 1);
    assert_eq!(cpu.hi, (-5_i32) as u32);
}

#[test]
fn div_min_by_minus_one() {
    let cpu = run_code(&[
        lui(1, 0x8000),
        addiu(2, 0, -1),
        div(1, 2),
        brk(),
    ]);
    assert_eq!(cpu.lo, 0x8000_0000);
    assert_eq!(cpu.hi, 0);
}

#[test]
fn mult_signed() {
    let cpu = run_code(&[
        addiu(1, 0, -3),
        addiu(2, 0, 4),
        mult(1, 2),
        brk(),
    ]);
    assert_eq!(cpu.lo, (-12_i64) as u32);
    assert_eq!(cpu.hi, 0xffff_ffff);
}

#[test]
fn sign_extension() {
    let cpu = run_code(&[
        ori(1, 0, 0x8080),
        sw(1, 0, 0),
        lh(2, 0, 0),
        lhu(3, 0, 0),
        lb(4, 0, 0),
        lbu(5, 0, 0),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(2), 0xffff_8080);
    assert_eq!(cpu.read_reg(3), 0x0000_8080);
    assert_eq!(cpu.read_reg(4), 0xffff_ff80);
    assert_eq!(cpu.read_reg(5), 0x0000_0080);
}

#[test]
fn byte_and_half_stores() {
    let cpu = run_code(&[
        lui(1, 0x7654),
        ori(1, 1, 0x3210),
        sw(1, 0, 0),
        ori(2, 0, 0xab),
        sb(2, 1, 0),
        ori(3, 0, 0xcdef),
        sh(3, 2, 0),
        lw(4, 0, 0),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(4), 0xcdef_ab10);
}

#[test]
fn lwl_lwr_pair() {
    let cpu = run_code(&[
        lui(1, 0x7654),
        ori(1, 1, 0x3210),
        sw(1, 0, 0),
        lui(1, 0xfedc),
        ori(1, 1, 0xba98),
        sw(1, 4, 0),
        addiu(2, 0, -1),
        lwr(2, 1, 0),
        lwl(2, 4, 0),
        addiu(3, 0, -1),
        lwl(3, 1, 0),
        addiu(4, 0, -1),
        lwr(4, 2, 0),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(2), 0x9876_5432);
    assert_eq!(cpu.read_reg(3), 0x3210_ffff);
    assert_eq!(cpu.read_reg(4), 0xffff_7654);
}

#[test]
fn swl_swr() {
    let cpu = run_code(&[
        lui(1, 0x7654),
        ori(1, 1, 0x3210),
        lui(2, 0xfedc),
        ori(2, 2, 0xba98),
        sw(1, 0, 0),
        swl(2, 1, 0),
        sw(1, 4, 0),
        swr(2, 6, 0),
        brk(),
    ]);
    assert_eq!(cpu.bus.peek::<Word>(0), Some(0x7654_fedc));
    assert_eq!(cpu.bus.peek::<Word>(4), Some(0xba98_3210));
}

#[test]
fn unaligned_load_faults() {
    let (mut cpu, _ctrl) = cpu_with_code(&[
        addiu(1, 0, 2),
        lw(2, 0, 1),
        brk(),
    ]);
    for _ in 0..2 {
        cpu.step(&mut ());
    }
    assert_eq!(cpu.read_reg(2), 0);
    // AdEL, with the failing address recorded.
    assert_eq!(exccode(&cpu), 4);
    assert_eq!(cpu.cop0.read_reg(cop0::BAD_VADDR), 2);
    assert_eq!(cpu.cop0.read_reg(cop0::EPC), CODE_BASE + 4);
}

#[test]
fn unaligned_store_faults() {
    let (mut cpu, _ctrl) = cpu_with_code(&[
        addiu(1, 0, 1),
        sh(1, 1, 0),
        brk(),
    ]);
    for _ in 0..2 {
        cpu.step(&mut ());
    }
    // AdES.
    assert_eq!(exccode(&cpu), 5);
    assert_eq!(cpu.cop0.read_reg(cop0::BAD_VADDR), 1);
}

#[test]
fn syscall_vectors() {
    let (mut cpu, _ctrl) = cpu_with_code(&[nop(), syscall(), brk()]);
    for _ in 0..2 {
        cpu.step(&mut ());
    }
    assert_eq!(exccode(&cpu), 8);
    assert_eq!(cpu.cop0.read_reg(cop0::EPC), CODE_BASE + 4);
    assert_eq!(cpu.jump_addr, 0xbfc0_0180);
}

#[test]
fn reserved_instruction_faults() {
    // Opcode 0x1f has no handler.
    let (mut cpu, ctrl) = cpu_with_code(&[0x7c00_0000, brk()]);
    cpu.step(&mut ());
    assert_eq!(exccode(&cpu), 10);
    assert!(!ctrl.halted());
}

#[test]
fn unimplemented_instruction_halts() {
    // TEQ is architecturally defined but not carried by the interpreter.
    let (mut cpu, ctrl) = cpu_with_code(&[0x0000_0034, brk()]);
    super::run_cpu(&mut cpu, &ctrl);
    assert!(ctrl.halted());
    assert!(ctrl.halted_reason().contains("TEQ"));
}

#[test]
fn translate_kernel_segments() {
    let cop0 = Cop0::new();
    assert_eq!(cop0.translate(0x8001_0000), Ok(0x0001_0000));
    assert_eq!(cop0.translate(0xa001_0000), Ok(0x0001_0000));
    assert_eq!(cop0.translate(0x0001_0000), Ok(0x0001_0000));
    assert_eq!(cop0.translate(0xc000_1234), Ok(0xc000_1234));
}

#[test]
fn translate_user_mode() {
    let mut cop0 = Cop0::new();
    let sr = cop0.read_reg(cop0::SR);
    cop0.set_reg(cop0::SR, sr | 0x2);

    assert_eq!(cop0.translate(0x0001_0000), Ok(0x0001_0000));
    assert_eq!(cop0.translate(0x8001_0000), Err(Exception::AddressError));
    assert_eq!(cop0.translate(0xa001_0000), Err(Exception::AddressError));
    assert_eq!(cop0.translate(0xc000_1234), Err(Exception::AddressError));
}

#[test]
fn interrupt_taken_between_instructions() {
    let (mut cpu, _ctrl) = cpu_with_code(&[nop(), nop(), nop(), brk()]);

    cpu.bus.irq_state.mask = 1 << Irq::Dma as u32;
    cpu.bus.irq_state.trigger(Irq::Dma);

    // Enable interrupts with IM2 unmasked, boot vectors still in ROM.
    cpu.cop0.set_reg(cop0::SR, (1 << 22) | (1 << 10) | 1);

    cpu.step(&mut ());

    assert_eq!(exccode(&cpu), 0);
    assert_eq!(cpu.cop0.read_reg(cop0::EPC), CODE_BASE);
    assert_eq!(cpu.pc, 0xbfc0_0180);
    assert!(!cpu.cop0.irq_enabled());
}

#[test]
fn interrupt_in_delay_slot_backs_up_epc() {
    let (mut cpu, _ctrl) = cpu_with_code(&[beq(0, 0, 2), nop(), nop(), brk()]);

    // Execute the branch so the pipeline sits in the delay stage.
    cpu.step(&mut ());
    assert_eq!(cpu.stage, Stage::Delay);

    cpu.bus.irq_state.mask = 1 << Irq::VBlank as u32;
    cpu.bus.irq_state.trigger(Irq::VBlank);
    cpu.cop0.set_reg(cop0::SR, (1 << 22) | (1 << 10) | 1);

    cpu.step(&mut ());

    assert_eq!(cpu.cop0.read_reg(cop0::EPC), CODE_BASE);
    assert!(cpu.cop0.read_reg(cop0::CAUSE) >> 31 == 1);
}

#[test]
fn set_interrupt_pending_fires_immediately() {
    let (mut cpu, _ctrl) = cpu_with_code(&[nop(), brk()]);

    cpu.cop0.set_reg(cop0::SR, (1 << 22) | (1 << 8) | 1);
    cpu.set_interrupt_pending(0);

    assert_eq!(exccode(&cpu), 0);
    assert_eq!(cpu.stage, Stage::Jump);
    assert_eq!(cpu.jump_addr, 0xbfc0_0180);
}

#[test]
fn clear_interrupt_pending_drops_the_bit() {
    let (mut cpu, _ctrl) = cpu_with_code(&[nop(), brk()]);

    // Interrupts disabled: the bit latches without firing.
    cpu.set_interrupt_pending(1);
    assert_eq!(cpu.cop0.read_reg(cop0::CAUSE) >> 8 & 0xff, 0x2);

    cpu.clear_interrupt_pending(1);
    assert_eq!(cpu.cop0.read_reg(cop0::CAUSE) >> 8 & 0xff, 0x0);
}

#[test]
fn interrupt_acknowledge_and_rfe() {
    let (mut cpu, _ctrl) = cpu_with_code(&[nop(), nop(), brk()]);

    cpu.bus.irq_state.mask = 1 << Irq::CdRom as u32;
    cpu.bus.irq_state.trigger(Irq::CdRom);
    cpu.cop0.set_reg(cop0::SR, (1 << 22) | (1 << 10) | 1);

    cpu.step(&mut ());
    assert!(!cpu.cop0.irq_enabled());

    // Acknowledge the line, then return from the exception.
    cpu.bus.irq_state.store(0, 0);
    assert!(!cpu.bus.irq_state.active());

    cpu.cop0.exit_exception();
    assert!(cpu.cop0.irq_enabled());
}

#[test]
fn software_interrupt_via_cause_write() {
    let (mut cpu, _ctrl) = cpu_with_code(&[
        ori(1, 0, 0x101),
        mtc0(1, 12),
        ori(2, 0, 0x100),
        mtc0(2, 13),
        brk(),
    ]);
    for _ in 0..4 {
        cpu.step(&mut ());
    }
    assert_eq!(exccode(&cpu), 0);
    assert_eq!(cpu.cop0.read_reg(cop0::EPC), CODE_BASE + 16);
    // BEV was cleared by the status write, so the RAM vector is used.
    assert_eq!(cpu.jump_addr, 0x8000_0080);
}

#[test]
fn mfc0_reads_back_debug_register() {
    let cpu = run_code(&[
        ori(1, 0, 0x404),
        mtc0(1, 9),
        mfc0(2, 9),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(2), 0x404);
}

#[test]
fn cache_isolated_stores_are_discarded() {
    let cpu = run_code(&[
        addiu(1, 0, 123),
        sw(1, 0, 0),
        lui(2, 1),
        mtc0(2, 12),
        addiu(3, 0, 45),
        sw(3, 0, 0),
        mtc0(0, 12),
        lw(4, 0, 0),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(4), 123);
    assert_eq!(cpu.bus.peek::<Word>(0), Some(123));
}

#[test]
fn gte_register_moves() {
    let cpu = run_code(&[
        ori(1, 0, 0x1234),
        mtc2(1, 5),
        mfc2(2, 5),
        ctc2(1, 7),
        cfc2(3, 7),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(2), 0x1234);
    assert_eq!(cpu.read_reg(3), 0x1234);
}

#[test]
fn gte_command_halts() {
    // An RTPS command word: COP2 with bit 25 set.
    let (mut cpu, ctrl) = cpu_with_code(&[(0x12 << 26) | (1 << 25) | 0x01, brk()]);
    super::run_cpu(&mut cpu, &ctrl);
    assert!(ctrl.halted());
    assert!(ctrl.halted_reason().contains("GTE command"));
}

#[test]
fn cop1_is_unusable() {
    let (mut cpu, _ctrl) = cpu_with_code(&[0x11 << 26, brk()]);
    cpu.step(&mut ());
    assert_eq!(exccode(&cpu), 11);
    // The faulting coprocessor number lands in cause.
    assert_eq!((cpu.cop0.read_reg(cop0::CAUSE) >> 28) & 0x3, 1);
}

#[test]
fn shifts_and_compares() {
    let cpu = run_code(&[
        addiu(1, 0, -8),
        sra(2, 1, 2),
        sll(3, 1, 1),
        sltu(4, 0, 1),
        slti(5, 1, 0),
        andi(6, 1, 0xff),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(2), (-2_i32) as u32);
    assert_eq!(cpu.read_reg(3), (-16_i32) as u32);
    assert_eq!(cpu.read_reg(4), 1);
    assert_eq!(cpu.read_reg(5), 1);
    assert_eq!(cpu.read_reg(6), 0xf8);
}

#[test]
fn jr_round_trip() {
    let cpu = run_code(&[
        lui(1, 0xbfc0),
        ori(1, 1, 0x10),
        jr(1),
        addiu(2, 0, 1),
        brk(),
    ]);
    assert_eq!(cpu.read_reg(2), 1);
}
