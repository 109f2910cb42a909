//! 8086 encoding tables
//!
//! Opcode mask/pattern pairs, the conditional-jump lookup tables and the
//! register / effective-address name tables. References are to the Intel
//! 8086 family user's manual, "Table 4-12. 8086 Instruction Encoding".

use crate::instruction::{AddressingBase, Operation, Register};

/// A first-byte opcode test: `byte & mask == pattern`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpcodePattern {
    pub mask: u8,
    pub pattern: u8,
}

impl OpcodePattern {
    const fn new(mask: u8, pattern: u8) -> Self {
        Self { mask, pattern }
    }

    #[inline]
    pub fn matches(&self, byte: u8) -> bool {
        byte & self.mask == self.pattern
    }
}

/// MOV register/memory to/from register: `100010dw`
pub const MOV_RM_REG: OpcodePattern = OpcodePattern::new(0b1111_1100, 0b1000_1000);
/// MOV immediate to register: `1011wreg`
pub const MOV_IMM_REG: OpcodePattern = OpcodePattern::new(0b1111_0000, 0b1011_0000);
/// MOV immediate to register/memory: `1100011w`
pub const MOV_IMM_RM: OpcodePattern = OpcodePattern::new(0b1111_1110, 0b1100_0110);
/// MOV memory to/from accumulator: `101000dw` (d=1 is accumulator to memory)
pub const MOV_ACC_MEM: OpcodePattern = OpcodePattern::new(0b1111_1100, 0b1010_0000);
/// ALU register/memory with register to either: `00ooo0dw`
pub const ALU_RM_REG: OpcodePattern = OpcodePattern::new(0b1100_0100, 0b0000_0000);
/// ALU immediate to register/memory: `100000sw`, operation in the `reg` field
pub const ALU_IMM_RM: OpcodePattern = OpcodePattern::new(0b1111_1100, 0b1000_0000);
/// ALU immediate to accumulator: `00ooo10w`
pub const ALU_IMM_ACC: OpcodePattern = OpcodePattern::new(0b1100_0110, 0b0000_0100);
/// Conditional jumps: `0111cccc`
pub const COND_JUMP: OpcodePattern = OpcodePattern::new(0b1111_0000, 0b0111_0000);
/// LOOP/LOOPZ/LOOPNZ/JCXZ: `111000cc`
pub const LOOP_JUMP: OpcodePattern = OpcodePattern::new(0b1111_1100, 0b1110_0000);

/// Conditional jump operations keyed by the low 4 bits of the opcode
pub const COND_JUMP_TABLE: [Operation; 16] = [
    Operation::Jo,   // 0000
    Operation::Jno,  // 0001
    Operation::Jb,   // 0010
    Operation::Jnb,  // 0011
    Operation::Je,   // 0100
    Operation::Jne,  // 0101
    Operation::Jbe,  // 0110
    Operation::Jnbe, // 0111
    Operation::Js,   // 1000
    Operation::Jns,  // 1001
    Operation::Jp,   // 1010
    Operation::Jnp,  // 1011
    Operation::Jl,   // 1100
    Operation::Jnl,  // 1101
    Operation::Jle,  // 1110
    Operation::Jnle, // 1111
];

/// Loop-family operations keyed by the low 2 bits of the opcode
pub const LOOP_JUMP_TABLE: [Operation; 4] = [
    Operation::Loopnz, // 00
    Operation::Loopz,  // 01
    Operation::Loop,   // 10
    Operation::Jcxz,   // 11
];

/// Operation selected by the 3-bit ALU operation field (bits 5-3 of the
/// opcode, or the `reg` field of the immediate group).
///
/// Only ADD (000), SUB (101) and CMP (111) are decoded; OR, ADC, SBB, AND and
/// XOR share the encodings but are not part of the instruction set here.
pub fn alu_operation(field: u8) -> Option<Operation> {
    match field & 0b111 {
        0b000 => Some(Operation::Add),
        0b101 => Some(Operation::Sub),
        0b111 => Some(Operation::Cmp),
        _ => None,
    }
}

/// Registers indexed by `reg + 8 * w` ("Table 4-9. REG (Register) Field Encoding")
pub const REGISTER_TABLE: [Register; 16] = [
    Register::AL,
    Register::CL,
    Register::DL,
    Register::BL,
    Register::AH,
    Register::CH,
    Register::DH,
    Register::BH,
    Register::AX,
    Register::CX,
    Register::DX,
    Register::BX,
    Register::SP,
    Register::BP,
    Register::SI,
    Register::DI,
];

/// Register names, same order as [`REGISTER_TABLE`]
pub const REGISTER_NAMES: [&str; 16] = [
    "al", "cl", "dl", "bl", "ah", "ch", "dh", "bh", "ax", "cx", "dx", "bx", "sp", "bp", "si", "di",
];

/// Effective-address bases indexed by `rm` when `mod != 11`
/// ("Table 4-10. R/M (Register/Memory) Field Encoding")
pub const ADDRESSING_BASE_TABLE: [AddressingBase; 8] = [
    AddressingBase::BxSi,
    AddressingBase::BxDi,
    AddressingBase::BpSi,
    AddressingBase::BpDi,
    AddressingBase::Si,
    AddressingBase::Di,
    AddressingBase::Bp,
    AddressingBase::Bx,
];

/// Base expressions as the assembler writes them, same order as [`ADDRESSING_BASE_TABLE`]
pub const ADDRESSING_BASE_NAMES: [&str; 8] = [
    "bx + si", "bx + di", "bp + si", "bp + di", "si", "di", "bp", "bx",
];

/// `rm` value that means "direct address" when `mod == 00`
pub const RM_DIRECT_ADDRESS: u8 = 0b110;
