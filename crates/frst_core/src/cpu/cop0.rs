//! # Coprocessor 0
//!
//! The system control coprocessor: privilege mode, interrupt masking,
//! exception vectoring and the segment based address translation. The
//! machine has no TLB, so translation never touches memory and never
//! faults for any reason other than a privilege violation.

use frst_util::{Bit, BitSet};

/// The architectural exception kinds. The TLB family and the cache errors
/// are carried for the sake of the taxonomy but nothing in this machine
/// raises them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// An enabled, unmasked interrupt line is pending.
    Interrupt,
    /// Unaligned access, or a kernel segment access from user mode.
    AddressError,
    TlbRefill,
    TlbInvalid,
    TlbModified,
    CacheError,
    VirtualCoherency,
    /// The bus reported a failed access.
    BusError,
    /// ADD, ADDI or SUB overflowed in two's complement.
    IntegerOverflow,
    /// The SYSCALL instruction.
    SystemCall,
    /// The BREAK instruction.
    Breakpoint,
    /// An opcode or function field with no defined handler.
    ReservedInstruction,
    /// A coprocessor instruction for an absent coprocessor.
    CoprocessorUnusable,
}

impl Exception {
    /// The ExcCode value stored into the cause register. Address and bus
    /// errors encode the access direction.
    pub fn code(self, fetch: bool, load: bool) -> u32 {
        match self {
            Exception::Interrupt => 0,
            Exception::TlbModified => 1,
            Exception::TlbRefill | Exception::TlbInvalid => {
                if load {
                    2
                } else {
                    3
                }
            }
            Exception::AddressError => {
                if load {
                    4
                } else {
                    5
                }
            }
            Exception::BusError => {
                if fetch {
                    6
                } else {
                    7
                }
            }
            Exception::SystemCall => 8,
            Exception::Breakpoint => 9,
            Exception::ReservedInstruction => 10,
            Exception::CoprocessorUnusable => 11,
            Exception::IntegerOverflow => 12,
            Exception::CacheError | Exception::VirtualCoherency => 0,
        }
    }

    /// True for the kinds that are defined but unreachable on this machine.
    pub fn reserved(self) -> bool {
        matches!(
            self,
            Exception::TlbRefill
                | Exception::TlbInvalid
                | Exception::TlbModified
                | Exception::CacheError
                | Exception::VirtualCoherency
        )
    }
}

/// Register indices. The gaps are unnamed on real hardware too.
pub const BPC: u32 = 3;
pub const BDA: u32 = 5;
pub const JUMPDEST: u32 = 6;
pub const DCIC: u32 = 7;
pub const BAD_VADDR: u32 = 8;
pub const BDAM: u32 = 9;
pub const BPCM: u32 = 11;
pub const SR: u32 = 12;
pub const CAUSE: u32 = 13;
pub const EPC: u32 = 14;
pub const PRID: u32 = 15;

const KSEG0: u32 = 0x8000_0000;
const KSEG1: u32 = 0xa000_0000;
const KSEG2: u32 = 0xc000_0000;

/// Status register: boot exception vectors not yet moved to RAM.
const STATUS_BEV: u32 = 1 << 22;
/// Status register: TLB shutdown. Set on a machine without a TLB.
const STATUS_TS: u32 = 1 << 21;

pub struct Cop0 {
    /// # COP0 registers
    ///
    /// | Number | Name     | Usage                       |
    /// |--------|----------|-----------------------------|
    /// | 3      | bpc      | Breakpoint on execution     |
    /// | 5      | bda      | Breakpoint on data access   |
    /// | 6      | jumpdest | Memorized jump address      |
    /// | 7      | dcic     | Breakpoint control          |
    /// | 8      | badvaddr | Bad virtual address         |
    /// | 9      | bdam     | Data access breakpoint mask |
    /// | 11     | bpcm     | Execute breakpoint mask     |
    /// | 12     | sr       | Status register             |
    /// | 13     | cause    | Exception type              |
    /// | 14     | epc      | Return address from trap    |
    /// | 15     | prid     | Processor ID                |
    ///
    /// The breakpoint registers are carried so guest reads get back what
    /// they wrote, but nothing evaluates them.
    regs: [u32; 16],
}

impl Cop0 {
    pub fn new() -> Self {
        Self {
            regs: RESET_VALUES,
        }
    }

    pub fn read_reg(&self, reg: u32) -> u32 {
        self.regs[reg as usize]
    }

    pub fn set_reg(&mut self, reg: u32, val: u32) {
        self.regs[reg as usize] = val;
    }

    /// If the cache isolate bit is set, stores must not reach the bus.
    pub fn cache_isolated(&self) -> bool {
        self.regs[SR as usize].bit(16)
    }

    /// If the boot exception vectors are still in ROM.
    fn boot_vectors(&self) -> bool {
        self.regs[SR as usize].bit(22)
    }

    /// The current privilege mode (KUc).
    pub fn user_mode(&self) -> bool {
        self.regs[SR as usize].bit(1)
    }

    /// The global interrupt enable flag (IEc).
    pub fn irq_enabled(&self) -> bool {
        self.regs[SR as usize].bit(0)
    }

    /// The per level interrupt mask (IM).
    pub fn irq_mask(&self) -> u32 {
        self.regs[SR as usize].bit_range(8, 15)
    }

    /// The software visible pending interrupt bits (IP). The derived
    /// hardware line is OR'ed in by the caller, not stored here.
    pub fn irq_pending(&self) -> u32 {
        self.regs[CAUSE as usize].bit_range(8, 15)
    }

    pub fn set_irq_pending(&mut self, irq: u32) {
        self.regs[CAUSE as usize] = self.regs[CAUSE as usize].set_bit(8 + irq as usize, true);
    }

    pub fn clear_irq_pending(&mut self, irq: u32) {
        self.regs[CAUSE as usize] = self.regs[CAUSE as usize].set_bit(8 + irq as usize, false);
    }

    /// A cause register write from the guest can only touch the two
    /// software interrupt bits.
    pub fn write_cause(&mut self, val: u32) {
        let cause = self.regs[CAUSE as usize];
        self.regs[CAUSE as usize] = cause.set_bit_range(8, 9, val.bit_range(8, 9));
    }

    pub fn set_bad_vaddr(&mut self, vaddr: u32) {
        self.regs[BAD_VADDR as usize] = vaddr;
    }

    /// Virtual to physical address translation.
    ///
    /// The 32-bit virtual space is four fixed segments: the user segment
    /// maps through identity, the two kernel segments strip their base,
    /// and the top segment maps through identity again. The three kernel
    /// segments fault in user mode. Reads and writes translate alike; the
    /// load/store distinction only picks the exception code later.
    pub fn translate(&self, vaddr: u32) -> Result<u32, Exception> {
        if vaddr < KSEG0 {
            Ok(vaddr)
        } else if self.user_mode() {
            Err(Exception::AddressError)
        } else if vaddr < KSEG1 {
            Ok(vaddr - KSEG0)
        } else if vaddr < KSEG2 {
            Ok(vaddr - KSEG1)
        } else {
            Ok(vaddr)
        }
    }

    /// Start handling an exception: push two zeros onto the mode/interrupt
    /// enable stack (kernel mode, interrupts off), record the exception
    /// code, coprocessor number and return address, and pick the handler
    /// vector.
    ///
    /// `pc` is the address of the faulting instruction; when it sat in a
    /// branch delay slot, EPC backs up to the branch itself and the BD flag
    /// is set so the handler can re-run the branch.
    pub fn enter_exception(&mut self, code: u32, ce: u32, pc: u32, in_delay: bool) -> u32 {
        let sr = self.regs[SR as usize];
        let ku_ie = sr.bit_range(0, 5);
        self.regs[SR as usize] = sr.set_bit_range(0, 5, ku_ie << 2);

        self.regs[CAUSE as usize] = self.regs[CAUSE as usize]
            .set_bit_range(2, 6, code)
            .set_bit_range(28, 29, ce)
            .set_bit(31, in_delay);

        self.regs[EPC as usize] = if in_delay { pc.wrapping_sub(4) } else { pc };

        if self.boot_vectors() {
            0xbfc0_0180
        } else {
            0x8000_0080
        }
    }

    /// The RFE instruction: pop the mode/interrupt enable stack.
    pub fn exit_exception(&mut self) {
        let sr = self.regs[SR as usize];
        let ku_ie = sr.bit_range(0, 5);
        self.regs[SR as usize] = sr.set_bit_range(0, 3, ku_ie >> 2);
    }
}

/// Register reset values: boot vectors in ROM, TLB shutdown, and the
/// processor revision.
const RESET_VALUES: [u32; 16] = [
    0,
    0,
    0,
    0,
    0,
    0,
    0,
    0,
    0,
    0,
    0,
    0,
    STATUS_BEV | STATUS_TS,
    0,
    0,
    0x0000_0002,
];
