//! Emulation of the 32-bit MIPS derived CPU.
//!
//! Instead of modelling the fetch pipeline, the interpreter runs an
//! explicit three state machine: a branch decision moves the pipeline to
//! ['Stage::Delay'], the instruction after the branch (the delay slot)
//! executes, and only then does ['Stage::Jump'] redirect the program
//! counter. The likely branch family nullifies its delay slot by moving
//! straight to ['Stage::Jump'] when the branch is not taken.
//!
//! Blocks are delimited by jump transitions. Events and the halt flag are
//! only looked at between instructions, so a callback or a control thread
//! poking at the halted machine always observes it between two
//! instructions, never mid way through one.

pub mod cop0;
pub mod irq;
pub mod opcode;

mod gte;

use frst_util::Bit;

use crate::bus::media::Media;
use crate::bus::rom::Rom;
use crate::bus::{AddrUnit, Bus, Byte, HalfWord, Word};
use crate::system::Control;
use crate::Debugger;

use cop0::{Cop0, Exception};
use gte::Gte;

use std::sync::Arc;

pub use irq::{Irq, IrqState};
pub use opcode::Opcode;

/// What the pipeline does at its next step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Evaluate the instruction at pc + 4.
    Continue,
    /// Evaluate the delay slot instruction at pc + 4, then perform the jump.
    Delay,
    /// Redirect the program counter to the pending jump address.
    Jump,
}

const PC_RESET: u32 = 0xbfc0_0000;

pub struct Cpu {
    /// Address of the instruction currently being executed. Between
    /// instructions it points at the one that just finished.
    pub pc: u32,
    /// The general purpose registers. Register 0 always reads as zero;
    /// it is forced back after every instruction rather than write
    /// protected, since firmware legally writes it to discard values.
    pub gpr: [u32; 32],
    /// The multiply/divide result pair.
    pub hi: u32,
    pub lo: u32,
    pub(crate) stage: Stage,
    pub(crate) jump_addr: u32,
    /// Set while the executing instruction sits in a branch delay slot.
    /// Exceptions use it to back EPC up to the branch.
    in_delay_slot: bool,
    pub(crate) cop0: Cop0,
    gte: Gte,
    pub bus: Bus,
    ctrl: Arc<Control>,
}

impl Cpu {
    pub fn new(rom: Rom, media: Option<Media>, ctrl: Arc<Control>) -> Box<Self> {
        Box::new(Cpu {
            pc: PC_RESET,
            gpr: [0x0; 32],
            hi: 0x0,
            lo: 0x0,
            stage: Stage::Jump,
            jump_addr: PC_RESET,
            in_delay_slot: false,
            cop0: Cop0::new(),
            gte: Gte::new(),
            bus: Bus::new(rom, media, ctrl.clone()),
            ctrl,
        })
    }

    /// Clear registers and volatile memory and return to the boot vector.
    /// The ROM and media images are preserved, as are registered
    /// peripherals. The halt flag is not touched; resuming after a reset
    /// is the controller's call.
    pub fn reset(&mut self) {
        self.bus.reset();
        self.gpr = [0x0; 32];
        self.hi = 0x0;
        self.lo = 0x0;
        self.cop0 = Cop0::new();
        self.gte = Gte::new();
        self.pc = PC_RESET;
        self.stage = Stage::Jump;
        self.jump_addr = PC_RESET;
        self.in_delay_slot = false;
    }

    pub fn read_reg(&self, idx: u32) -> u32 {
        self.gpr[idx as usize]
    }

    /// Halt the machine. Exposed on the machine itself so event callbacks
    /// can stop the worker the way bus mapped peripherals can.
    pub fn halt(&self, reason: impl Into<String>) {
        self.ctrl.halt(reason);
    }

    fn set_reg(&mut self, idx: u32, val: u32) {
        self.gpr[idx as usize] = val;
    }

    /// Load data from the bus: translate, check alignment, access.
    fn load<T: AddrUnit>(&mut self, vaddr: u32) -> Result<u32, Exception> {
        let paddr = self.cop0.translate(vaddr)?;
        if !T::is_aligned(vaddr) {
            return Err(Exception::AddressError);
        }
        self.bus.load::<T>(paddr).ok_or(Exception::BusError)
    }

    /// Store data to the bus. Discarded silently while the cache is
    /// isolated, which the bus takes care of.
    fn store<T: AddrUnit>(&mut self, vaddr: u32, val: u32) -> Result<(), Exception> {
        let paddr = self.cop0.translate(vaddr)?;
        if !T::is_aligned(vaddr) {
            return Err(Exception::AddressError);
        }
        self.bus.store::<T>(paddr, val).ok_or(Exception::BusError)
    }

    /// Raise an exception: update COP0 bookkeeping and redirect the
    /// pipeline to the handler vector. Purely architectural; the machine
    /// keeps running and the guest is expected to service the fault.
    pub fn take_exception(&mut self, ex: Exception, vaddr: u32, fetch: bool, load: bool, ce: u32) {
        trace!("exception {:?} at pc {:08x}", ex, self.pc);

        if ex == Exception::AddressError {
            self.cop0.set_bad_vaddr(vaddr);
        }
        if ex.reserved() {
            // Nothing on this machine raises the TLB or cache kinds; if one
            // shows up anyway something has gone badly wrong.
            self.ctrl.halt(format!("{ex:?} exception"));
        }

        let code = ex.code(fetch, load);
        let vector = self
            .cop0
            .enter_exception(code, ce, self.pc, self.in_delay_slot);

        self.stage = Stage::Jump;
        self.jump_addr = vector;
    }

    /// True when interrupts are globally enabled and the pending and
    /// unmasked set is non-empty. The hardware interrupt input (IP2) is
    /// derived from the interrupt controller registers rather than stored.
    fn irq_pending(&self) -> bool {
        let pending = self.cop0.irq_pending() | (self.bus.irq_state.active() as u32) << 2;
        self.cop0.irq_enabled() && self.cop0.irq_mask() & pending != 0
    }

    /// Take an interrupt exception if one is due. The program counter is
    /// first advanced as if the pipeline had completed its current step, so
    /// EPC ends up at the instruction that has not executed yet and the
    /// instruction that unmasked the interrupt is not repeated.
    pub fn check_interrupt(&mut self) {
        if !self.irq_pending() {
            return;
        }
        match self.stage {
            Stage::Continue => {
                self.pc = self.pc.wrapping_add(4);
                self.in_delay_slot = false;
            }
            Stage::Delay => {
                self.pc = self.pc.wrapping_add(4);
                self.in_delay_slot = true;
            }
            Stage::Jump => {
                self.pc = self.jump_addr;
                self.in_delay_slot = false;
            }
        }
        self.take_exception(Exception::Interrupt, 0, false, false, 0);
    }

    /// Latch a pending interrupt bit in the cause register and take the
    /// interrupt right away if it is enabled.
    pub fn set_interrupt_pending(&mut self, irq: u32) {
        self.cop0.set_irq_pending(irq);
        self.check_interrupt();
    }

    pub fn clear_interrupt_pending(&mut self, irq: u32) {
        self.cop0.clear_irq_pending(irq);
    }

    /// Run the next pending event if its timeout has elapsed. Called at
    /// block boundaries only; the queue lock is not held while the callback
    /// runs, so callbacks may schedule or cancel events of their own.
    pub fn handle_event(&mut self) {
        if let Some(callback) = self.bus.schedule.pop_ready() {
            callback(self);
            self.bus.schedule.update_next_event();
        }
    }

    /// The address of the next instruction the pipeline will execute.
    pub fn next_ins_addr(&self) -> u32 {
        match self.stage {
            Stage::Continue | Stage::Delay => self.pc.wrapping_add(4),
            Stage::Jump => self.jump_addr,
        }
    }

    /// The instruction the pipeline will execute next, peeked without side
    /// effects.
    pub fn next_ins(&self) -> Opcode {
        let ins = self
            .cop0
            .translate(self.next_ins_addr())
            .ok()
            .and_then(|paddr| self.bus.peek::<Word>(paddr))
            .unwrap_or(0xffff_ffff);
        Opcode::new(ins)
    }

    /// Advance the pipeline by exactly one instruction.
    pub fn step(&mut self, dbg: &mut impl Debugger) {
        self.check_interrupt();
        match self.stage {
            Stage::Continue => {
                self.pc = self.pc.wrapping_add(4);
                self.in_delay_slot = false;
                self.eval(dbg);
            }
            Stage::Delay => {
                self.pc = self.pc.wrapping_add(4);
                self.stage = Stage::Jump;
                self.in_delay_slot = true;
                self.eval(dbg);
            }
            Stage::Jump => {
                self.pc = self.jump_addr;
                self.stage = Stage::Continue;
                self.in_delay_slot = false;
                self.eval(dbg);
            }
        }
    }

    /// Run until the pipeline is about to perform its `jumps + 1`-th jump,
    /// checking the halt flag before every instruction. Returns true when
    /// stopped at the block boundary, false when broken by a halt.
    pub fn run_blocks(&mut self, dbg: &mut impl Debugger, mut jumps: u32) -> bool {
        loop {
            if self.ctrl.halted() {
                return false;
            }
            if self.stage == Stage::Jump {
                if jumps == 0 {
                    return true;
                }
                jumps -= 1;
            }
            self.step(dbg);
        }
    }

    /// Execute one block, halt flag or not: pump one event opportunity and
    /// run until the next block boundary. This is what single stepping the
    /// halted machine means.
    pub fn step_block(&mut self, dbg: &mut impl Debugger) {
        self.handle_event();
        let mut jumps = 1;
        loop {
            if self.stage == Stage::Jump {
                if jumps == 0 {
                    return;
                }
                jumps -= 1;
            }
            self.step(dbg);
        }
    }

    /// Fetch and execute the instruction at the current program counter.
    fn eval(&mut self, dbg: &mut impl Debugger) {
        let vaddr = self.pc;

        self.bus.schedule.tick(1);
        dbg.instruction_load(vaddr);

        let paddr = match self.cop0.translate(vaddr) {
            Ok(paddr) => paddr,
            Err(ex) => return self.take_exception(ex, vaddr, true, true, 0),
        };
        if !Word::is_aligned(vaddr) {
            return self.take_exception(Exception::AddressError, vaddr, true, true, 0);
        }
        match self.bus.load::<Word>(paddr) {
            Some(ins) => self.eval_ins(dbg, Opcode::new(ins)),
            None => self.take_exception(Exception::BusError, vaddr, true, true, 0),
        }
    }

    fn eval_ins(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        // The all zero word is 'sll $zero, $zero, 0', the canonical no-op
        // filling most delay slots. Skip dispatch for it.
        if op.0 != 0 {
            self.exec(dbg, op);
        }

        // Force the zero register back in case the instruction wrote it.
        self.gpr[0] = 0;
    }

    /// Execute opcode.
    fn exec(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        match op.op() {
            0x00 => match op.special() {
                0x00 => self.op_sll(op),
                0x02 => self.op_srl(op),
                0x03 => self.op_sra(op),
                0x04 => self.op_sllv(op),
                0x06 => self.op_srlv(op),
                0x07 => self.op_srav(op),
                0x08 => self.op_jr(op),
                0x09 => self.op_jalr(op),
                0x0a => self.unimplemented("MOVZ"),
                0x0b => self.unimplemented("MOVN"),
                0x0c => self.op_syscall(),
                0x0d => self.op_break(),
                0x0f => self.op_sync(),
                0x10 => self.op_mfhi(op),
                0x11 => self.op_mthi(op),
                0x12 => self.op_mflo(op),
                0x13 => self.op_mtlo(op),
                0x18 => self.op_mult(op),
                0x19 => self.op_multu(op),
                0x1a => self.op_div(op),
                0x1b => self.op_divu(op),
                0x20 => self.op_add(op),
                0x21 => self.op_addu(op),
                0x22 => self.op_sub(op),
                0x23 => self.op_subu(op),
                0x24 => self.op_and(op),
                0x25 => self.op_or(op),
                0x26 => self.op_xor(op),
                0x27 => self.op_nor(op),
                0x2a => self.op_slt(op),
                0x2b => self.op_sltu(op),
                0x30 => self.unimplemented("TGE"),
                0x31 => self.unimplemented("TGEU"),
                0x32 => self.unimplemented("TLT"),
                0x33 => self.unimplemented("TLTU"),
                0x34 => self.unimplemented("TEQ"),
                0x36 => self.unimplemented("TNE"),
                _ => self.op_reserved(),
            },
            0x01 => self.op_regimm(op),
            0x02 => self.op_j(op),
            0x03 => self.op_jal(op),
            0x04 => self.op_beq(op),
            0x05 => self.op_bne(op),
            0x06 => self.op_blez(op),
            0x07 => self.op_bgtz(op),
            0x08 => self.op_addi(op),
            0x09 => self.op_addiu(op),
            0x0a => self.op_slti(op),
            0x0b => self.op_sltiu(op),
            0x0c => self.op_andi(op),
            0x0d => self.op_ori(op),
            0x0e => self.op_xori(op),
            0x0f => self.op_lui(op),
            0x10 => self.op_cop0(op),
            0x11 => self.op_cop1(),
            0x12 => self.op_cop2(op),
            0x13 => self.op_cop3(),
            0x14 => self.op_beql(op),
            0x15 => self.op_bnel(op),
            0x16 => self.op_blezl(op),
            0x17 => self.op_bgtzl(op),
            0x20 => self.op_lb(dbg, op),
            0x21 => self.op_lh(dbg, op),
            0x22 => self.op_lwl(dbg, op),
            0x23 => self.op_lw(dbg, op),
            0x24 => self.op_lbu(dbg, op),
            0x25 => self.op_lhu(dbg, op),
            0x26 => self.op_lwr(dbg, op),
            0x28 => self.op_sb(dbg, op),
            0x29 => self.op_sh(dbg, op),
            0x2a => self.op_swl(dbg, op),
            0x2b => self.op_sw(dbg, op),
            0x2e => self.op_swr(dbg, op),
            0x2f => self.op_cache(),
            0x30 => self.unimplemented("LL"),
            0x31 => self.op_lwc1(),
            0x32 => self.op_lwc2(dbg, op),
            0x33 => self.op_lwc3(),
            0x38 => self.unimplemented("SC"),
            0x39 => self.op_swc1(),
            0x3a => self.op_swc2(dbg, op),
            0x3b => self.op_swc3(),
            _ => self.op_reserved(),
        }
    }

    /// The conditional branch group sub-dispatched on the rt field.
    fn op_regimm(&mut self, op: Opcode) {
        match op.rt() {
            0x00 => self.op_bltz(op),
            0x01 => self.op_bgez(op),
            0x02 => self.op_bltzl(op),
            0x03 => self.op_bgezl(op),
            0x08 => self.unimplemented("TGEI"),
            0x09 => self.unimplemented("TGEIU"),
            0x0a => self.unimplemented("TLTI"),
            0x0b => self.unimplemented("TLTIU"),
            0x0c => self.unimplemented("TEQI"),
            0x0e => self.unimplemented("TNEI"),
            0x10 => self.op_bltzal(op),
            0x11 => self.op_bgezal(op),
            0x12 => self.op_bltzall(op),
            0x13 => self.op_bgezall(op),
            _ => self.op_reserved(),
        }
    }

    /// Halt on an instruction the architecture defines but the emulation
    /// doesn't carry. Distinct from ['Cpu::op_reserved']: a reserved
    /// encoding is a guest visible fault, a missing implementation is ours.
    fn unimplemented(&mut self, what: &str) {
        self.ctrl.halt(format!("{what} unimplemented"));
    }

    /// Branch to the resolved target. The delay slot always executes.
    fn branch(&mut self, cond: bool, target: u32) {
        self.stage = Stage::Delay;
        self.jump_addr = if cond {
            target
        } else {
            self.pc.wrapping_add(8)
        };
    }

    /// A branch of the likely family: the delay slot is nullified when the
    /// branch is not taken.
    fn branch_likely(&mut self, cond: bool, target: u32) {
        self.stage = if cond { Stage::Delay } else { Stage::Jump };
        self.jump_addr = if cond {
            target
        } else {
            self.pc.wrapping_add(8)
        };
    }

    /// Unconditional jump to an absolute address.
    fn jump(&mut self, target: u32) {
        self.stage = Stage::Delay;
        self.jump_addr = target;
    }

    fn branch_target(&self, op: Opcode) -> u32 {
        self.pc.wrapping_add(4).wrapping_add(op.signed_imm() << 2)
    }
}

/// CPU opcode implementations.
impl Cpu {
    /// SLL - Shift left logical.
    fn op_sll(&mut self, op: Opcode) {
        let val = self.read_reg(op.rt()) << op.shift();
        self.set_reg(op.rd(), val);
    }

    /// SRL - Shift right logical.
    fn op_srl(&mut self, op: Opcode) {
        let val = self.read_reg(op.rt()) >> op.shift();
        self.set_reg(op.rd(), val);
    }

    /// SRA - Shift right arithmetic.
    fn op_sra(&mut self, op: Opcode) {
        let val = (self.read_reg(op.rt()) as i32) >> op.shift();
        self.set_reg(op.rd(), val as u32);
    }

    /// SLLV - Shift left logical variable.
    fn op_sllv(&mut self, op: Opcode) {
        let shift = self.read_reg(op.rs()) & 0x1f;
        let val = self.read_reg(op.rt()) << shift;
        self.set_reg(op.rd(), val);
    }

    /// SRLV - Shift right logical variable.
    fn op_srlv(&mut self, op: Opcode) {
        let shift = self.read_reg(op.rs()) & 0x1f;
        let val = self.read_reg(op.rt()) >> shift;
        self.set_reg(op.rd(), val);
    }

    /// SRAV - Shift right arithmetic variable.
    fn op_srav(&mut self, op: Opcode) {
        let shift = self.read_reg(op.rs()) & 0x1f;
        let val = (self.read_reg(op.rt()) as i32) >> shift;
        self.set_reg(op.rd(), val as u32);
    }

    /// JR - Jump register.
    fn op_jr(&mut self, op: Opcode) {
        self.jump(self.read_reg(op.rs()));
    }

    /// JALR - Jump and link register.
    fn op_jalr(&mut self, op: Opcode) {
        let target = self.read_reg(op.rs());
        self.set_reg(op.rd(), self.pc.wrapping_add(8));
        self.jump(target);
    }

    /// SYSCALL - Raises a system call exception.
    fn op_syscall(&mut self) {
        self.take_exception(Exception::SystemCall, 0, false, false, 0);
    }

    /// BREAK - Raises a breakpoint exception.
    fn op_break(&mut self) {
        self.take_exception(Exception::Breakpoint, 0, false, false, 0);
    }

    /// SYNC - Memory barrier. All accesses here are already in order.
    fn op_sync(&mut self) {}

    /// MFHI - Move from hi.
    fn op_mfhi(&mut self, op: Opcode) {
        self.set_reg(op.rd(), self.hi);
    }

    /// MTHI - Move to hi.
    fn op_mthi(&mut self, op: Opcode) {
        self.hi = self.read_reg(op.rs());
    }

    /// MFLO - Move from lo.
    fn op_mflo(&mut self, op: Opcode) {
        self.set_reg(op.rd(), self.lo);
    }

    /// MTLO - Move to lo.
    fn op_mtlo(&mut self, op: Opcode) {
        self.lo = self.read_reg(op.rs());
    }

    /// MULT - Signed multiplication. The full 64-bit product lands across
    /// hi and lo.
    fn op_mult(&mut self, op: Opcode) {
        let lhs = self.read_reg(op.rs()) as i32 as i64;
        let rhs = self.read_reg(op.rt()) as i32 as i64;
        let val = lhs * rhs;
        self.lo = val as u32;
        self.hi = (val >> 32) as u32;
    }

    /// MULTU - Unsigned multiplication.
    fn op_multu(&mut self, op: Opcode) {
        let lhs = self.read_reg(op.rs()) as u64;
        let rhs = self.read_reg(op.rt()) as u64;
        let val = lhs * rhs;
        self.lo = val as u32;
        self.hi = (val >> 32) as u32;
    }

    /// DIV - Signed division. Division by zero is not an exception: it
    /// yields the fixed lo/hi pair the hardware produces, and firmware
    /// relies on exactly that. 64-bit intermediates keep i32::MIN / -1
    /// well defined.
    fn op_div(&mut self, op: Opcode) {
        let num = self.read_reg(op.rs()) as i32 as i64;
        let denom = self.read_reg(op.rt()) as i32 as i64;

        if denom != 0 {
            self.lo = (num / denom) as u32;
            self.hi = (num % denom) as u32;
        } else {
            self.lo = if num < 0 { 1 } else { u32::MAX };
            self.hi = num as u32;
        }
    }

    /// DIVU - Unsigned division.
    fn op_divu(&mut self, op: Opcode) {
        let num = self.read_reg(op.rs());
        let denom = self.read_reg(op.rt());

        if denom != 0 {
            self.lo = num / denom;
            self.hi = num % denom;
        } else {
            self.lo = u32::MAX;
            self.hi = num;
        }
    }

    /// ADD - Add signed. Overflow is a fault and leaves the destination
    /// untouched.
    fn op_add(&mut self, op: Opcode) {
        let lhs = self.read_reg(op.rs()) as i32;
        let rhs = self.read_reg(op.rt()) as i32;

        match lhs.checked_add(rhs) {
            Some(val) => self.set_reg(op.rd(), val as u32),
            None => self.take_exception(Exception::IntegerOverflow, 0, false, false, 0),
        }
    }

    /// ADDU - Add unsigned, wrapping.
    fn op_addu(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()).wrapping_add(self.read_reg(op.rt()));
        self.set_reg(op.rd(), val);
    }

    /// SUB - Subtract signed, faulting on overflow.
    fn op_sub(&mut self, op: Opcode) {
        let lhs = self.read_reg(op.rs()) as i32;
        let rhs = self.read_reg(op.rt()) as i32;

        match lhs.checked_sub(rhs) {
            Some(val) => self.set_reg(op.rd(), val as u32),
            None => self.take_exception(Exception::IntegerOverflow, 0, false, false, 0),
        }
    }

    /// SUBU - Subtract unsigned, wrapping.
    fn op_subu(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()).wrapping_sub(self.read_reg(op.rt()));
        self.set_reg(op.rd(), val);
    }

    /// AND - Bitwise and.
    fn op_and(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()) & self.read_reg(op.rt());
        self.set_reg(op.rd(), val);
    }

    /// OR - Bitwise or.
    fn op_or(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()) | self.read_reg(op.rt());
        self.set_reg(op.rd(), val);
    }

    /// XOR - Bitwise exclusive or.
    fn op_xor(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()) ^ self.read_reg(op.rt());
        self.set_reg(op.rd(), val);
    }

    /// NOR - Bitwise not or.
    fn op_nor(&mut self, op: Opcode) {
        let val = !(self.read_reg(op.rs()) | self.read_reg(op.rt()));
        self.set_reg(op.rd(), val);
    }

    /// SLT - Set if less than, signed.
    fn op_slt(&mut self, op: Opcode) {
        let val = (self.read_reg(op.rs()) as i32) < (self.read_reg(op.rt()) as i32);
        self.set_reg(op.rd(), val as u32);
    }

    /// SLTU - Set if less than, unsigned.
    fn op_sltu(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()) < self.read_reg(op.rt());
        self.set_reg(op.rd(), val as u32);
    }

    /// BLTZ - Branch if less than zero.
    fn op_bltz(&mut self, op: Opcode) {
        let cond = (self.read_reg(op.rs()) as i32) < 0;
        self.branch(cond, self.branch_target(op));
    }

    /// BGEZ - Branch if greater than or equal to zero.
    fn op_bgez(&mut self, op: Opcode) {
        let cond = (self.read_reg(op.rs()) as i32) >= 0;
        self.branch(cond, self.branch_target(op));
    }

    /// BLTZL - Branch if less than zero, likely.
    fn op_bltzl(&mut self, op: Opcode) {
        let cond = (self.read_reg(op.rs()) as i32) < 0;
        self.branch_likely(cond, self.branch_target(op));
    }

    /// BGEZL - Branch if greater than or equal to zero, likely.
    fn op_bgezl(&mut self, op: Opcode) {
        let cond = (self.read_reg(op.rs()) as i32) >= 0;
        self.branch_likely(cond, self.branch_target(op));
    }

    /// BLTZAL - Branch if less than zero and link. The link register is
    /// written whether or not the branch is taken, and the condition reads
    /// rs before the link in case they alias.
    fn op_bltzal(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()) as i32;
        self.set_reg(31, self.pc.wrapping_add(8));
        self.branch(val < 0, self.branch_target(op));
    }

    /// BGEZAL - Branch if greater than or equal to zero and link.
    fn op_bgezal(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()) as i32;
        self.set_reg(31, self.pc.wrapping_add(8));
        self.branch(val >= 0, self.branch_target(op));
    }

    /// BLTZALL - Branch if less than zero and link, likely.
    fn op_bltzall(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()) as i32;
        self.set_reg(31, self.pc.wrapping_add(8));
        self.branch_likely(val < 0, self.branch_target(op));
    }

    /// BGEZALL - Branch if greater than or equal to zero and link, likely.
    fn op_bgezall(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()) as i32;
        self.set_reg(31, self.pc.wrapping_add(8));
        self.branch_likely(val >= 0, self.branch_target(op));
    }

    /// J - Jump.
    fn op_j(&mut self, op: Opcode) {
        self.jump((self.pc & 0xf000_0000) | (op.target() << 2));
    }

    /// JAL - Jump and link.
    fn op_jal(&mut self, op: Opcode) {
        self.set_reg(31, self.pc.wrapping_add(8));
        self.op_j(op);
    }

    /// BEQ - Branch if equal.
    fn op_beq(&mut self, op: Opcode) {
        let cond = self.read_reg(op.rs()) == self.read_reg(op.rt());
        self.branch(cond, self.branch_target(op));
    }

    /// BNE - Branch if not equal.
    fn op_bne(&mut self, op: Opcode) {
        let cond = self.read_reg(op.rs()) != self.read_reg(op.rt());
        self.branch(cond, self.branch_target(op));
    }

    /// BLEZ - Branch if less than or equal to zero.
    fn op_blez(&mut self, op: Opcode) {
        let cond = (self.read_reg(op.rs()) as i32) <= 0;
        self.branch(cond, self.branch_target(op));
    }

    /// BGTZ - Branch if greater than zero.
    fn op_bgtz(&mut self, op: Opcode) {
        let cond = (self.read_reg(op.rs()) as i32) > 0;
        self.branch(cond, self.branch_target(op));
    }

    /// BEQL - Branch if equal, likely.
    fn op_beql(&mut self, op: Opcode) {
        let cond = self.read_reg(op.rs()) == self.read_reg(op.rt());
        self.branch_likely(cond, self.branch_target(op));
    }

    /// BNEL - Branch if not equal, likely.
    fn op_bnel(&mut self, op: Opcode) {
        let cond = self.read_reg(op.rs()) != self.read_reg(op.rt());
        self.branch_likely(cond, self.branch_target(op));
    }

    /// BLEZL - Branch if less than or equal to zero, likely.
    fn op_blezl(&mut self, op: Opcode) {
        let cond = (self.read_reg(op.rs()) as i32) <= 0;
        self.branch_likely(cond, self.branch_target(op));
    }

    /// BGTZL - Branch if greater than zero, likely.
    fn op_bgtzl(&mut self, op: Opcode) {
        let cond = (self.read_reg(op.rs()) as i32) > 0;
        self.branch_likely(cond, self.branch_target(op));
    }

    /// ADDI - Add immediate signed, faulting on overflow.
    fn op_addi(&mut self, op: Opcode) {
        let lhs = self.read_reg(op.rs()) as i32;
        let rhs = op.signed_imm() as i32;

        match lhs.checked_add(rhs) {
            Some(val) => self.set_reg(op.rt(), val as u32),
            None => self.take_exception(Exception::IntegerOverflow, 0, false, false, 0),
        }
    }

    /// ADDIU - Add immediate unsigned. The immediate is still sign
    /// extended; unsigned just means wrapping.
    fn op_addiu(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        self.set_reg(op.rt(), val);
    }

    /// SLTI - Set if less than immediate, signed.
    fn op_slti(&mut self, op: Opcode) {
        let val = (self.read_reg(op.rs()) as i32) < (op.signed_imm() as i32);
        self.set_reg(op.rt(), val as u32);
    }

    /// SLTIU - Set if less than immediate, unsigned.
    fn op_sltiu(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()) < op.signed_imm();
        self.set_reg(op.rt(), val as u32);
    }

    /// ANDI - Bitwise and immediate.
    fn op_andi(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()) & op.imm();
        self.set_reg(op.rt(), val);
    }

    /// ORI - Bitwise or immediate.
    fn op_ori(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()) | op.imm();
        self.set_reg(op.rt(), val);
    }

    /// XORI - Bitwise exclusive or immediate.
    fn op_xori(&mut self, op: Opcode) {
        let val = self.read_reg(op.rs()) ^ op.imm();
        self.set_reg(op.rt(), val);
    }

    /// LUI - Load upper immediate.
    fn op_lui(&mut self, op: Opcode) {
        self.set_reg(op.rt(), op.imm() << 16);
    }

    /// COP0 - System control coprocessor instruction.
    fn op_cop0(&mut self, op: Opcode) {
        match op.cop_op() {
            // MFC0 - Move from COP0.
            0x00 => self.op_mfc0(op),
            0x02 => self.unimplemented("CFC0"),
            // MTC0 - Move to COP0.
            0x04 => self.op_mtc0(op),
            0x06 => self.unimplemented("CTC0"),
            0x10 => match op.special() {
                // RFE - Restore from exception.
                0x10 => self.op_rfe(),
                _ => self.ctrl.halt("COP0 unsupported co-function"),
            },
            _ => self.ctrl.halt("COP0 unsupported instruction"),
        }
    }

    fn op_mfc0(&mut self, op: Opcode) {
        let reg = op.rd();
        let val = match reg {
            // The hardware interrupt input is derived from the interrupt
            // controller, not stored in the cause register.
            cop0::CAUSE => {
                self.cop0.read_reg(reg) | (self.bus.irq_state.active() as u32) << 10
            }
            cop0::BPC
            | cop0::BDA
            | cop0::JUMPDEST
            | cop0::DCIC
            | cop0::BAD_VADDR
            | cop0::BDAM
            | cop0::BPCM
            | cop0::SR
            | cop0::EPC
            | cop0::PRID => self.cop0.read_reg(reg),
            _ => {
                self.ctrl.halt(format!("MFC0 of register {reg}"));
                return;
            }
        };
        trace!("cop0 register {} -> {:08x}", reg, val);
        self.set_reg(op.rt(), val);
    }

    fn op_mtc0(&mut self, op: Opcode) {
        let val = self.read_reg(op.rt());
        let reg = op.rd();
        trace!("cop0 register {} <- {:08x}", reg, val);
        match reg {
            cop0::BPC
            | cop0::BDA
            | cop0::JUMPDEST
            | cop0::DCIC
            | cop0::BAD_VADDR
            | cop0::BDAM
            | cop0::BPCM
            | cop0::EPC => self.cop0.set_reg(reg, val),
            cop0::SR => {
                self.cop0.set_reg(reg, val);
                self.bus.set_cache_isolated(self.cop0.cache_isolated());
                // The write may have unmasked a pending interrupt.
                self.check_interrupt();
            }
            cop0::CAUSE => {
                // Only the software interrupt bits are writable; they can
                // be used to raise interrupts from code.
                self.cop0.write_cause(val);
                self.check_interrupt();
            }
            cop0::PRID => self.ctrl.halt("MTC0 prid"),
            _ => self.ctrl.halt(format!("MTC0 of register {reg}")),
        }
    }

    /// RFE - Restore from exception. Pops the mode/interrupt stack, which
    /// may unmask a pending interrupt.
    fn op_rfe(&mut self) {
        self.cop0.exit_exception();
        self.check_interrupt();
    }

    /// COP1 - Does not exist on this machine.
    fn op_cop1(&mut self) {
        self.take_exception(Exception::CoprocessorUnusable, 0, false, false, 1);
    }

    /// COP2 - GTE instruction. Register moves are handled; the command
    /// arithmetic is outside the core and halts.
    fn op_cop2(&mut self, op: Opcode) {
        if op.0.bit(25) {
            self.ctrl
                .halt(format!("GTE command 0x{:02x} unimplemented", op.special()));
            return;
        }
        match op.cop_op() {
            // MFC2 - Move from GTE data register.
            0x00 => {
                let val = self.gte.data_load(op.rd());
                self.set_reg(op.rt(), val);
            }
            // CFC2 - Move from GTE control register.
            0x02 => {
                let val = self.gte.ctrl_load(op.rd());
                self.set_reg(op.rt(), val);
            }
            // MTC2 - Move to GTE data register.
            0x04 => {
                let val = self.read_reg(op.rt());
                self.gte.data_store(op.rd(), val);
            }
            // CTC2 - Move to GTE control register.
            0x06 => {
                let val = self.read_reg(op.rt());
                self.gte.ctrl_store(op.rd(), val);
            }
            _ => self.op_reserved(),
        }
    }

    /// COP3 - Does not exist on this machine.
    fn op_cop3(&mut self) {
        self.take_exception(Exception::CoprocessorUnusable, 0, false, false, 3);
    }

    /// LB - Load byte, sign extended.
    fn op_lb(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        dbg.data_load(addr, Byte::WIDTH);

        match self.load::<Byte>(addr) {
            Ok(val) => self.set_reg(op.rt(), val as i8 as u32),
            Err(ex) => self.take_exception(ex, addr, false, true, 0),
        }
    }

    /// LH - Load half word, sign extended.
    fn op_lh(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        dbg.data_load(addr, HalfWord::WIDTH);

        match self.load::<HalfWord>(addr) {
            Ok(val) => self.set_reg(op.rt(), val as i16 as u32),
            Err(ex) => self.take_exception(ex, addr, false, true, 0),
        }
    }

    /// LWL - Load word left.
    ///
    /// Loads the word containing an unaligned address and merges its upper
    /// lanes into the register; paired with LWR to assemble an unaligned
    /// word in two instructions. Skips the alignment check by design.
    fn op_lwl(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        let aligned = addr & !0x3;
        dbg.data_load(aligned, Word::WIDTH);

        match self.load::<Word>(aligned) {
            Ok(word) => {
                let cur = self.read_reg(op.rt());
                let val = match addr & 0x3 {
                    0 => (cur & 0x00ff_ffff) | (word << 24),
                    1 => (cur & 0x0000_ffff) | (word << 16),
                    2 => (cur & 0x0000_00ff) | (word << 8),
                    3 => word,
                    _ => unreachable!(),
                };
                self.set_reg(op.rt(), val);
            }
            Err(ex) => self.take_exception(ex, addr, false, true, 0),
        }
    }

    /// LW - Load word.
    fn op_lw(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        dbg.data_load(addr, Word::WIDTH);

        match self.load::<Word>(addr) {
            Ok(val) => self.set_reg(op.rt(), val),
            Err(ex) => self.take_exception(ex, addr, false, true, 0),
        }
    }

    /// LBU - Load byte unsigned.
    fn op_lbu(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        dbg.data_load(addr, Byte::WIDTH);

        match self.load::<Byte>(addr) {
            Ok(val) => self.set_reg(op.rt(), val),
            Err(ex) => self.take_exception(ex, addr, false, true, 0),
        }
    }

    /// LHU - Load half word unsigned.
    fn op_lhu(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        dbg.data_load(addr, HalfWord::WIDTH);

        match self.load::<HalfWord>(addr) {
            Ok(val) => self.set_reg(op.rt(), val),
            Err(ex) => self.take_exception(ex, addr, false, true, 0),
        }
    }

    /// LWR - Load word right. See ['Cpu::op_lwl'].
    fn op_lwr(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        let aligned = addr & !0x3;
        dbg.data_load(aligned, Word::WIDTH);

        match self.load::<Word>(aligned) {
            Ok(word) => {
                let cur = self.read_reg(op.rt());
                let val = match addr & 0x3 {
                    0 => word,
                    1 => (cur & 0xff00_0000) | (word >> 8),
                    2 => (cur & 0xffff_0000) | (word >> 16),
                    3 => (cur & 0xffff_ff00) | (word >> 24),
                    _ => unreachable!(),
                };
                self.set_reg(op.rt(), val);
            }
            Err(ex) => self.take_exception(ex, addr, false, true, 0),
        }
    }

    /// SB - Store byte.
    fn op_sb(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        dbg.data_store(addr, Byte::WIDTH);

        let val = self.read_reg(op.rt());
        if let Err(ex) = self.store::<Byte>(addr, val) {
            self.take_exception(ex, addr, false, false, 0);
        }
    }

    /// SH - Store half word.
    fn op_sh(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        dbg.data_store(addr, HalfWord::WIDTH);

        let val = self.read_reg(op.rt());
        if let Err(ex) = self.store::<HalfWord>(addr, val) {
            self.take_exception(ex, addr, false, false, 0);
        }
    }

    /// SWL - Store word left. Read-modify-write of the word containing an
    /// unaligned address; the alignment check is skipped by design.
    fn op_swl(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        let aligned = addr & !0x3;
        dbg.data_load(aligned, Word::WIDTH);
        dbg.data_store(aligned, Word::WIDTH);

        let val = self.read_reg(op.rt());
        match self.load::<Word>(aligned) {
            Ok(word) => {
                let merged = match addr & 0x3 {
                    0 => (word & 0xffff_ff00) | (val >> 24),
                    1 => (word & 0xffff_0000) | (val >> 16),
                    2 => (word & 0xff00_0000) | (val >> 8),
                    3 => val,
                    _ => unreachable!(),
                };
                if let Err(ex) = self.store::<Word>(aligned, merged) {
                    self.take_exception(ex, addr, false, false, 0);
                }
            }
            Err(ex) => self.take_exception(ex, addr, false, true, 0),
        }
    }

    /// SW - Store word.
    fn op_sw(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        dbg.data_store(addr, Word::WIDTH);

        let val = self.read_reg(op.rt());
        if let Err(ex) = self.store::<Word>(addr, val) {
            self.take_exception(ex, addr, false, false, 0);
        }
    }

    /// SWR - Store word right. See ['Cpu::op_swl'].
    fn op_swr(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        let aligned = addr & !0x3;
        dbg.data_load(aligned, Word::WIDTH);
        dbg.data_store(aligned, Word::WIDTH);

        let val = self.read_reg(op.rt());
        match self.load::<Word>(aligned) {
            Ok(word) => {
                let merged = match addr & 0x3 {
                    0 => val,
                    1 => (word & 0x0000_00ff) | (val << 8),
                    2 => (word & 0x0000_ffff) | (val << 16),
                    3 => (word & 0x00ff_ffff) | (val << 24),
                    _ => unreachable!(),
                };
                if let Err(ex) = self.store::<Word>(aligned, merged) {
                    self.take_exception(ex, addr, false, false, 0);
                }
            }
            Err(ex) => self.take_exception(ex, addr, false, true, 0),
        }
    }

    /// CACHE - Cache maintenance. The caches aren't modelled.
    fn op_cache(&mut self) {}

    /// LWC1 - Load word to coprocessor 1, which does not exist.
    fn op_lwc1(&mut self) {
        self.take_exception(Exception::CoprocessorUnusable, 0, false, true, 1);
    }

    /// LWC2 - Load word to GTE data register.
    fn op_lwc2(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        dbg.data_load(addr, Word::WIDTH);

        match self.load::<Word>(addr) {
            Ok(val) => self.gte.data_store(op.rt(), val),
            Err(ex) => self.take_exception(ex, addr, false, true, 0),
        }
    }

    /// LWC3 - Load word to coprocessor 3, which does not exist.
    fn op_lwc3(&mut self) {
        self.take_exception(Exception::CoprocessorUnusable, 0, false, true, 3);
    }

    /// SWC1 - Store word from coprocessor 1, which does not exist.
    fn op_swc1(&mut self) {
        self.take_exception(Exception::CoprocessorUnusable, 0, false, false, 1);
    }

    /// SWC2 - Store word from GTE data register.
    fn op_swc2(&mut self, dbg: &mut impl Debugger, op: Opcode) {
        let addr = self.read_reg(op.rs()).wrapping_add(op.signed_imm());
        dbg.data_store(addr, Word::WIDTH);

        let val = self.gte.data_load(op.rt());
        if let Err(ex) = self.store::<Word>(addr, val) {
            self.take_exception(ex, addr, false, false, 0);
        }
    }

    /// SWC3 - Store word from coprocessor 3, which does not exist.
    fn op_swc3(&mut self) {
        self.take_exception(Exception::CoprocessorUnusable, 0, false, false, 3);
    }

    /// An opcode or function encoding with no defined handler.
    fn op_reserved(&mut self) {
        self.take_exception(Exception::ReservedInstruction, 0, false, false, 0);
    }
}
