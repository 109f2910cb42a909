//! Decoded instruction representation
//!
//! The decoder produces an [`Instruction`] per call; the renderer, execution
//! engine and clock estimator only ever look at this model, never at bytes.

use crate::tables::{ADDRESSING_BASE_TABLE, REGISTER_NAMES, REGISTER_TABLE};
use serde::{Deserialize, Serialize};

/// 8086 general purpose register, byte or word.
///
/// The discriminants are the REG field encoding: byte registers are the raw
/// 3-bit value, word registers are the raw value plus 8. Do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Register {
    AL = 0,
    CL = 1,
    DL = 2,
    BL = 3,
    AH = 4,
    CH = 5,
    DH = 6,
    BH = 7,
    AX = 8,
    CX = 9,
    DX = 10,
    BX = 11,
    SP = 12,
    BP = 13,
    SI = 14,
    DI = 15,
}

impl Register {
    /// Decode a 3-bit REG/RM field with the instruction's `w` bit
    #[inline]
    pub fn from_encoding(field: u8, wide: bool) -> Self {
        debug_assert!(field < 8, "Invalid register field: {} (must be 0-7)", field);
        REGISTER_TABLE[((field & 0b111) + 8 * wide as u8) as usize]
    }

    /// The 3-bit field value this register is encoded with
    #[inline]
    pub fn encoding(self) -> u8 {
        self as u8 & 0b111
    }

    /// True for the 16-bit registers
    #[inline]
    pub fn is_wide(self) -> bool {
        self as u8 >= 8
    }

    pub fn name(self) -> &'static str {
        REGISTER_NAMES[self as usize]
    }
}

/// Register combination of a memory operand's effective address.
///
/// Discriminants 0-7 are the R/M field encoding for `mod != 11`; `Direct`
/// stands for `mod == 00, rm == 110`. Do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum AddressingBase {
    BxSi = 0,
    BxDi = 1,
    BpSi = 2,
    BpDi = 3,
    Si = 4,
    Di = 5,
    Bp = 6,
    Bx = 7,
    Direct = 8,
}

impl AddressingBase {
    /// Decode a 3-bit R/M field of a memory operand
    #[inline]
    pub fn from_rm(rm: u8) -> Self {
        debug_assert!(rm < 8, "Invalid r/m field: {} (must be 0-7)", rm);
        ADDRESSING_BASE_TABLE[(rm & 0b111) as usize]
    }

    /// Registers summed to form the address (empty for `Direct`)
    pub fn registers(self) -> &'static [Register] {
        match self {
            AddressingBase::BxSi => &[Register::BX, Register::SI],
            AddressingBase::BxDi => &[Register::BX, Register::DI],
            AddressingBase::BpSi => &[Register::BP, Register::SI],
            AddressingBase::BpDi => &[Register::BP, Register::DI],
            AddressingBase::Si => &[Register::SI],
            AddressingBase::Di => &[Register::DI],
            AddressingBase::Bp => &[Register::BP],
            AddressingBase::Bx => &[Register::BX],
            AddressingBase::Direct => &[],
        }
    }
}

/// Memory operand: base registers plus displacement.
///
/// For [`AddressingBase::Direct`] the displacement holds the absolute
/// address, read back through [`MemoryOperand::direct_address`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryOperand {
    pub base: AddressingBase,
    pub displacement: i16,
}

impl MemoryOperand {
    pub fn new(base: AddressingBase, displacement: i16) -> Self {
        Self { base, displacement }
    }

    pub fn direct(address: u16) -> Self {
        Self {
            base: AddressingBase::Direct,
            displacement: address as i16,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.base == AddressingBase::Direct
    }

    #[inline]
    pub fn direct_address(&self) -> u16 {
        self.displacement as u16
    }
}

/// Operand width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Width {
    Byte,
    Word,
}

impl Width {
    #[inline]
    pub fn from_wide(wide: bool) -> Self {
        if wide {
            Width::Word
        } else {
            Width::Byte
        }
    }

    /// Mask of the bits a value of this width occupies
    #[inline]
    pub fn mask(self) -> u16 {
        match self {
            Width::Byte => 0x00FF,
            Width::Word => 0xFFFF,
        }
    }

    /// Mask of the sign bit (bit 7 or bit 15)
    #[inline]
    pub fn sign_bit(self) -> u16 {
        match self {
            Width::Byte => 0x0080,
            Width::Word => 0x8000,
        }
    }
}

/// Immediate operand, widened to 16 bits with its encoded width kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Immediate {
    pub value: u16,
    pub width: Width,
}

impl Immediate {
    pub fn byte(value: u8) -> Self {
        Self {
            value: value as u16,
            width: Width::Byte,
        }
    }

    pub fn word(value: u16) -> Self {
        Self {
            value,
            width: Width::Word,
        }
    }

    /// Value truncated to the encoded width
    #[inline]
    pub fn read(&self) -> u16 {
        self.value & self.width.mask()
    }
}

/// Destination operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Register(Register),
    Memory(MemoryOperand),
}

/// Source operand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceOperand {
    Register(Register),
    Memory(MemoryOperand),
    Immediate(Immediate),
}

impl From<Operand> for SourceOperand {
    fn from(operand: Operand) -> Self {
        match operand {
            Operand::Register(reg) => SourceOperand::Register(reg),
            Operand::Memory(mem) => SourceOperand::Memory(mem),
        }
    }
}

/// Decodable operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Mov,
    Add,
    Sub,
    Cmp,
    Je,
    Jl,
    Jle,
    Jb,
    Jbe,
    Jp,
    Jo,
    Js,
    Jne,
    Jnl,
    Jnle,
    Jnb,
    Jnbe,
    Jnp,
    Jno,
    Jns,
    Loop,
    Loopz,
    Loopnz,
    Jcxz,
}

impl Operation {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Operation::Mov => "mov",
            Operation::Add => "add",
            Operation::Sub => "sub",
            Operation::Cmp => "cmp",
            Operation::Je => "je",
            Operation::Jl => "jl",
            Operation::Jle => "jle",
            Operation::Jb => "jb",
            Operation::Jbe => "jbe",
            Operation::Jp => "jp",
            Operation::Jo => "jo",
            Operation::Js => "js",
            Operation::Jne => "jne",
            Operation::Jnl => "jnl",
            Operation::Jnle => "jnle",
            Operation::Jnb => "jnb",
            Operation::Jnbe => "jnbe",
            Operation::Jnp => "jnp",
            Operation::Jno => "jno",
            Operation::Jns => "jns",
            Operation::Loop => "loop",
            Operation::Loopz => "loopz",
            Operation::Loopnz => "loopnz",
            Operation::Jcxz => "jcxz",
        }
    }

    /// True for the conditional jumps and the LOOP family
    pub fn is_relative_jump(self) -> bool {
        !matches!(
            self,
            Operation::Mov | Operation::Add | Operation::Sub | Operation::Cmp
        )
    }
}

/// Operands of an instruction: a destination/source pair for data
/// operations, a signed 8-bit displacement for jumps and loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operands {
    Pair {
        destination: Operand,
        source: SourceOperand,
    },
    Relative(i8),
}

/// One decoded instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub operation: Operation,
    pub operands: Operands,
}

impl Instruction {
    pub fn new(operation: Operation, destination: Operand, source: SourceOperand) -> Self {
        Self {
            operation,
            operands: Operands::Pair {
                destination,
                source,
            },
        }
    }

    pub fn jump(operation: Operation, offset: i8) -> Self {
        debug_assert!(operation.is_relative_jump());
        Self {
            operation,
            operands: Operands::Relative(offset),
        }
    }

    pub fn destination(&self) -> Option<&Operand> {
        match &self.operands {
            Operands::Pair { destination, .. } => Some(destination),
            Operands::Relative(_) => None,
        }
    }

    pub fn source(&self) -> Option<&SourceOperand> {
        match &self.operands {
            Operands::Pair { source, .. } => Some(source),
            Operands::Relative(_) => None,
        }
    }

    /// Signed jump displacement, relative to the end of the instruction
    pub fn jump_offset(&self) -> Option<i8> {
        match self.operands {
            Operands::Relative(offset) => Some(offset),
            Operands::Pair { .. } => None,
        }
    }

    /// Operand width, derived from the operands: a register destination
    /// decides, then a register source, then the immediate's width.
    ///
    /// `None` for jumps and for memory-to-memory pairs, which the decoder
    /// never produces.
    pub fn width(&self) -> Option<Width> {
        let Operands::Pair {
            destination,
            source,
        } = &self.operands
        else {
            return None;
        };
        match (destination, source) {
            (Operand::Register(reg), _) => Some(Width::from_wide(reg.is_wide())),
            (_, SourceOperand::Register(reg)) => Some(Width::from_wide(reg.is_wide())),
            (_, SourceOperand::Immediate(imm)) => Some(imm.width),
            (Operand::Memory(_), SourceOperand::Memory(_)) => None,
        }
    }
}
