use super::cpu_with_code;
use crate::cpu::Cpu;

/// Event callbacks record their firing order into the register file, which
/// nothing else touches since no instructions run in these tests.
fn mark(cpu: &mut Cpu, val: u32) {
    let n = cpu.gpr[1] as usize;
    cpu.gpr[2 + n] = val;
    cpu.gpr[1] += 1;
}

fn ev50(cpu: &mut Cpu) {
    mark(cpu, 50);
}

fn ev75(cpu: &mut Cpu) {
    mark(cpu, 75);
}

fn ev100(cpu: &mut Cpu) {
    mark(cpu, 100);
}

fn chain(cpu: &mut Cpu) {
    mark(cpu, 1);
    cpu.bus.schedule.schedule_in(0, chain_next);
}

fn chain_next(cpu: &mut Cpu) {
    mark(cpu, 2);
}

#[test]
fn events_fire_in_timeout_order() {
    let (mut cpu, _ctrl) = cpu_with_code(&[]);

    cpu.bus.schedule.schedule_at(100, ev100);
    cpu.bus.schedule.schedule_at(50, ev50);
    cpu.bus.schedule.schedule_at(75, ev75);

    cpu.bus.schedule.tick(200);
    for _ in 0..3 {
        cpu.handle_event();
    }

    assert_eq!(cpu.gpr[1], 3);
    assert_eq!(&cpu.gpr[2..5], &[50, 75, 100]);

    // Pumping the drained queue is a no-op.
    cpu.handle_event();
    assert_eq!(cpu.gpr[1], 3);
}

#[test]
fn pump_runs_exactly_one_callback() {
    let (mut cpu, _ctrl) = cpu_with_code(&[]);

    cpu.bus.schedule.schedule_at(10, ev50);
    cpu.bus.schedule.schedule_at(20, ev75);

    cpu.bus.schedule.tick(100);
    cpu.handle_event();

    assert_eq!(cpu.gpr[1], 1);
    assert_eq!(cpu.gpr[2], 50);
}

#[test]
fn events_wait_for_their_timeout() {
    let (mut cpu, _ctrl) = cpu_with_code(&[]);

    cpu.bus.schedule.schedule_at(100, ev100);

    cpu.bus.schedule.tick(50);
    cpu.handle_event();
    assert_eq!(cpu.gpr[1], 0);

    cpu.bus.schedule.tick(50);
    cpu.handle_event();
    assert_eq!(cpu.gpr[1], 1);
}

#[test]
fn cancel_removes_every_match() {
    let (mut cpu, _ctrl) = cpu_with_code(&[]);

    cpu.bus.schedule.schedule_at(10, ev50);
    cpu.bus.schedule.schedule_at(20, ev50);
    cpu.bus.schedule.schedule_at(15, ev75);
    cpu.bus.schedule.cancel(ev50);

    cpu.bus.schedule.tick(100);
    for _ in 0..3 {
        cpu.handle_event();
    }

    assert_eq!(cpu.gpr[1], 1);
    assert_eq!(cpu.gpr[2], 75);
}

#[test]
fn schedule_then_cancel_leaves_queue_empty() {
    let (mut cpu, _ctrl) = cpu_with_code(&[]);

    cpu.bus.schedule.schedule_at(10, ev50);
    cpu.bus.schedule.cancel(ev50);

    cpu.bus.schedule.tick(100);
    cpu.handle_event();
    assert_eq!(cpu.gpr[1], 0);
}

#[test]
fn cancel_all_drains() {
    let (mut cpu, _ctrl) = cpu_with_code(&[]);

    cpu.bus.schedule.schedule_at(10, ev50);
    cpu.bus.schedule.schedule_at(20, ev75);
    cpu.bus.schedule.cancel_all();

    cpu.bus.schedule.tick(100);
    cpu.handle_event();
    assert_eq!(cpu.gpr[1], 0);
}

#[test]
fn equal_timeouts_fire_in_insertion_order() {
    let (mut cpu, _ctrl) = cpu_with_code(&[]);

    cpu.bus.schedule.schedule_at(10, ev75);
    cpu.bus.schedule.schedule_at(10, ev50);
    cpu.bus.schedule.schedule_at(10, ev100);

    cpu.bus.schedule.tick(10);
    for _ in 0..3 {
        cpu.handle_event();
    }

    assert_eq!(&cpu.gpr[2..5], &[75, 50, 100]);
}

#[test]
fn callback_may_reschedule() {
    let (mut cpu, _ctrl) = cpu_with_code(&[]);

    cpu.bus.schedule.schedule_at(10, chain);

    cpu.bus.schedule.tick(20);
    cpu.handle_event();
    assert_eq!(&cpu.gpr[2..3], &[1]);

    // The rescheduled event is due right away, at the next pump.
    cpu.handle_event();
    assert_eq!(&cpu.gpr[2..4], &[1, 2]);
}

#[test]
fn far_future_deadline_is_not_due() {
    let (mut cpu, _ctrl) = cpu_with_code(&[]);

    // Just under half the counter range away: still in the future.
    cpu.bus.schedule.schedule_at(u64::MAX / 2 - 1, ev50);
    cpu.handle_event();
    assert_eq!(cpu.gpr[1], 0);
}

#[test]
fn events_run_at_block_boundaries() {
    use super::asm::*;

    // An event due at cycle 1 fires once the program reaches its first
    // block boundary, not mid block.
    let (mut cpu, _ctrl) = cpu_with_code(&[
        addiu(8, 0, 1),
        beq(0, 0, 0),
        nop(),
        brk(),
    ]);
    cpu.bus.schedule.schedule_at(1, ev50);

    assert!(cpu.run_blocks(&mut (), 0));
    cpu.handle_event();
    assert_eq!(cpu.gpr[8], 1);
    assert_eq!(cpu.gpr[1], 1);
    assert_eq!(cpu.gpr[2], 50);
}
