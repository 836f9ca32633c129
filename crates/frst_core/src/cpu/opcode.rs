//! Decoding of the 32-bit instruction words.
//!
//! There are three main layouts:
//! - Immediate
//!     - 6-bit op.
//!     - 5-bit source register.
//!     - 5-bit target register.
//!     - 16-bit immediate value.
//!
//! - Jump
//!     - 6-bit op.
//!     - 26-bit target address.
//!
//! - Register
//!     - 6-bit op.
//!     - 5-bit source register.
//!     - 5-bit target register.
//!     - 5-bit destination register.
//!     - 5-bit shift value.
//!     - 6-bit function field.

use frst_util::Bit;

use std::fmt;

#[derive(Clone, Copy)]
pub struct Opcode(pub u32);

impl Opcode {
    pub fn new(opcode: u32) -> Self {
        Opcode(opcode)
    }

    /// Operation.
    pub fn op(self) -> u32 {
        self.0.bit_range(26, 31)
    }

    /// Sub operation / function.
    pub fn special(self) -> u32 {
        self.0.bit_range(0, 5)
    }

    /// Coprocessor sub operation. Aliases the source register field.
    pub fn cop_op(self) -> u32 {
        self.rs()
    }

    /// Immediate value.
    pub fn imm(self) -> u32 {
        self.0.bit_range(0, 15)
    }

    /// Sign extended immediate value.
    pub fn signed_imm(self) -> u32 {
        let val = self.0.bit_range(0, 15) as i16;
        val as u32
    }

    /// Target address used for jump instructions.
    pub fn target(self) -> u32 {
        self.0.bit_range(0, 25)
    }

    pub fn shift(self) -> u32 {
        self.0.bit_range(6, 10)
    }

    /// Destination register.
    pub fn rd(self) -> u32 {
        self.0.bit_range(11, 15)
    }

    /// Target register. Also the sub operation of the REGIMM group.
    pub fn rt(self) -> u32 {
        self.0.bit_range(16, 20)
    }

    /// Source register.
    pub fn rs(self) -> u32 {
        self.0.bit_range(21, 25)
    }
}

pub const REGISTER_NAMES: [&str; 32] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6",
    "t7", "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "fp",
    "ra",
];

fn reg(idx: u32) -> &'static str {
    REGISTER_NAMES[idx as usize]
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.op() {
            0x0 => match self.special() {
                0x00 => write!(f, "sll ${} ${} {}", reg(self.rd()), reg(self.rt()), self.shift()),
                0x02 => write!(f, "srl ${} ${} {}", reg(self.rd()), reg(self.rt()), self.shift()),
                0x03 => write!(f, "sra ${} ${} {}", reg(self.rd()), reg(self.rt()), self.shift()),
                0x04 => write!(f, "sllv ${} ${} ${}", reg(self.rd()), reg(self.rt()), reg(self.rs())),
                0x06 => write!(f, "srlv ${} ${} ${}", reg(self.rd()), reg(self.rt()), reg(self.rs())),
                0x07 => write!(f, "srav ${} ${} ${}", reg(self.rd()), reg(self.rt()), reg(self.rs())),
                0x08 => write!(f, "jr ${}", reg(self.rs())),
                0x09 => write!(f, "jalr ${} ${}", reg(self.rd()), reg(self.rs())),
                0x0a => write!(f, "movz ${} ${} ${}", reg(self.rd()), reg(self.rs()), reg(self.rt())),
                0x0b => write!(f, "movn ${} ${} ${}", reg(self.rd()), reg(self.rs()), reg(self.rt())),
                0x0c => write!(f, "syscall"),
                0x0d => write!(f, "break"),
                0x0f => write!(f, "sync"),
                0x10 => write!(f, "mfhi ${}", reg(self.rd())),
                0x11 => write!(f, "mthi ${}", reg(self.rs())),
                0x12 => write!(f, "mflo ${}", reg(self.rd())),
                0x13 => write!(f, "mtlo ${}", reg(self.rs())),
                0x18 => write!(f, "mult ${} ${}", reg(self.rs()), reg(self.rt())),
                0x19 => write!(f, "multu ${} ${}", reg(self.rs()), reg(self.rt())),
                0x1a => write!(f, "div ${} ${}", reg(self.rs()), reg(self.rt())),
                0x1b => write!(f, "divu ${} ${}", reg(self.rs()), reg(self.rt())),
                0x20 => write!(f, "add ${} ${} ${}", reg(self.rd()), reg(self.rs()), reg(self.rt())),
                0x21 => write!(f, "addu ${} ${} ${}", reg(self.rd()), reg(self.rs()), reg(self.rt())),
                0x22 => write!(f, "sub ${} ${} ${}", reg(self.rd()), reg(self.rs()), reg(self.rt())),
                0x23 => write!(f, "subu ${} ${} ${}", reg(self.rd()), reg(self.rs()), reg(self.rt())),
                0x24 => write!(f, "and ${} ${} ${}", reg(self.rd()), reg(self.rs()), reg(self.rt())),
                0x25 => write!(f, "or ${} ${} ${}", reg(self.rd()), reg(self.rs()), reg(self.rt())),
                0x26 => write!(f, "xor ${} ${} ${}", reg(self.rd()), reg(self.rs()), reg(self.rt())),
                0x27 => write!(f, "nor ${} ${} ${}", reg(self.rd()), reg(self.rs()), reg(self.rt())),
                0x2a => write!(f, "slt ${} ${} ${}", reg(self.rd()), reg(self.rs()), reg(self.rt())),
                0x2b => write!(f, "sltu ${} ${} ${}", reg(self.rd()), reg(self.rs()), reg(self.rt())),
                0x30 => write!(f, "tge ${} ${}", reg(self.rs()), reg(self.rt())),
                0x31 => write!(f, "tgeu ${} ${}", reg(self.rs()), reg(self.rt())),
                0x32 => write!(f, "tlt ${} ${}", reg(self.rs()), reg(self.rt())),
                0x33 => write!(f, "tltu ${} ${}", reg(self.rs()), reg(self.rt())),
                0x34 => write!(f, "teq ${} ${}", reg(self.rs()), reg(self.rt())),
                0x36 => write!(f, "tne ${} ${}", reg(self.rs()), reg(self.rt())),
                _ => write!(f, "illegal"),
            },
            0x1 => {
                let op = match self.rt() {
                    0x00 => "bltz",
                    0x01 => "bgez",
                    0x02 => "bltzl",
                    0x03 => "bgezl",
                    0x10 => "bltzal",
                    0x11 => "bgezal",
                    0x12 => "bltzall",
                    0x13 => "bgezall",
                    _ => return write!(f, "regimm({:02x})", self.rt()),
                };
                write!(f, "{} ${} {}", op, reg(self.rs()), self.signed_imm() as i32)
            }
            0x2 => write!(f, "j {:08x}", self.target() << 2),
            0x3 => write!(f, "jal {:08x}", self.target() << 2),
            0x4 => write!(f, "beq ${} ${} {}", reg(self.rs()), reg(self.rt()), self.signed_imm() as i32),
            0x5 => write!(f, "bne ${} ${} {}", reg(self.rs()), reg(self.rt()), self.signed_imm() as i32),
            0x6 => write!(f, "blez ${} {}", reg(self.rs()), self.signed_imm() as i32),
            0x7 => write!(f, "bgtz ${} {}", reg(self.rs()), self.signed_imm() as i32),
            0x8 => write!(f, "addi ${} ${} {}", reg(self.rt()), reg(self.rs()), self.signed_imm() as i32),
            0x9 => write!(f, "addiu ${} ${} {}", reg(self.rt()), reg(self.rs()), self.signed_imm() as i32),
            0xa => write!(f, "slti ${} ${} {}", reg(self.rt()), reg(self.rs()), self.signed_imm() as i32),
            0xb => write!(f, "sltiu ${} ${} {}", reg(self.rt()), reg(self.rs()), self.signed_imm() as i32),
            0xc => write!(f, "andi ${} ${} {:x}", reg(self.rt()), reg(self.rs()), self.imm()),
            0xd => write!(f, "ori ${} ${} {:x}", reg(self.rt()), reg(self.rs()), self.imm()),
            0xe => write!(f, "xori ${} ${} {:x}", reg(self.rt()), reg(self.rs()), self.imm()),
            0xf => write!(f, "lui ${} {:x}", reg(self.rt()), self.imm()),
            0x10 => write!(f, "cop0({:02x})", self.cop_op()),
            0x11 => write!(f, "cop1"),
            0x12 => write!(f, "cop2({:02x})", self.cop_op()),
            0x13 => write!(f, "cop3"),
            0x14 => write!(f, "beql ${} ${} {}", reg(self.rs()), reg(self.rt()), self.signed_imm() as i32),
            0x15 => write!(f, "bnel ${} ${} {}", reg(self.rs()), reg(self.rt()), self.signed_imm() as i32),
            0x16 => write!(f, "blezl ${} {}", reg(self.rs()), self.signed_imm() as i32),
            0x17 => write!(f, "bgtzl ${} {}", reg(self.rs()), self.signed_imm() as i32),
            0x20 => write!(f, "lb ${} {}(${})", reg(self.rt()), self.signed_imm() as i32, reg(self.rs())),
            0x21 => write!(f, "lh ${} {}(${})", reg(self.rt()), self.signed_imm() as i32, reg(self.rs())),
            0x22 => write!(f, "lwl ${} {}(${})", reg(self.rt()), self.signed_imm() as i32, reg(self.rs())),
            0x23 => write!(f, "lw ${} {}(${})", reg(self.rt()), self.signed_imm() as i32, reg(self.rs())),
            0x24 => write!(f, "lbu ${} {}(${})", reg(self.rt()), self.signed_imm() as i32, reg(self.rs())),
            0x25 => write!(f, "lhu ${} {}(${})", reg(self.rt()), self.signed_imm() as i32, reg(self.rs())),
            0x26 => write!(f, "lwr ${} {}(${})", reg(self.rt()), self.signed_imm() as i32, reg(self.rs())),
            0x28 => write!(f, "sb ${} {}(${})", reg(self.rt()), self.signed_imm() as i32, reg(self.rs())),
            0x29 => write!(f, "sh ${} {}(${})", reg(self.rt()), self.signed_imm() as i32, reg(self.rs())),
            0x2a => write!(f, "swl ${} {}(${})", reg(self.rt()), self.signed_imm() as i32, reg(self.rs())),
            0x2b => write!(f, "sw ${} {}(${})", reg(self.rt()), self.signed_imm() as i32, reg(self.rs())),
            0x2e => write!(f, "swr ${} {}(${})", reg(self.rt()), self.signed_imm() as i32, reg(self.rs())),
            0x2f => write!(f, "cache"),
            0x30 => write!(f, "ll"),
            0x31 => write!(f, "lwc1"),
            0x32 => write!(f, "lwc2 {} {}(${})", self.rt(), self.signed_imm() as i32, reg(self.rs())),
            0x33 => write!(f, "lwc3"),
            0x38 => write!(f, "sc"),
            0x39 => write!(f, "swc1"),
            0x3a => write!(f, "swc2 {} {}(${})", self.rt(), self.signed_imm() as i32, reg(self.rs())),
            0x3b => write!(f, "swc3"),
            _ => write!(f, "illegal"),
        }
    }
}
