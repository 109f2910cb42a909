//! Assembly text rendering
//!
//! Produces NASM-compatible lines: re-assembling a rendered listing gives back
//! the original bytes.

use crate::instruction::{
    AddressingBase, Immediate, Instruction, MemoryOperand, Operand, Operands, Register,
    SourceOperand, Width,
};
use crate::tables::ADDRESSING_BASE_NAMES;
use std::fmt;

/// Render one instruction, without a line terminator
pub fn render(instruction: &Instruction) -> String {
    instruction.to_string()
}

/// Base register expression, e.g. `bx + si`
fn base_expression(base: AddressingBase) -> &'static str {
    match base {
        AddressingBase::Direct => {
            unreachable!("direct addresses have no base expression")
        }
        _ => ADDRESSING_BASE_NAMES[base as usize],
    }
}

fn width_qualifier(width: Width) -> &'static str {
    match width {
        Width::Byte => "byte",
        Width::Word => "word",
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for MemoryOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_direct() {
            return write!(f, "[{}]", self.direct_address());
        }
        let base = base_expression(self.base);
        match self.displacement {
            0 => write!(f, "[{}]", base),
            d if d > 0 => write!(f, "[{} + {}]", base, d),
            d => write!(f, "[{} - {}]", base, d.unsigned_abs()),
        }
    }
}

impl fmt::Display for Immediate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.read())
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(reg) => fmt::Display::fmt(reg, f),
            Operand::Memory(mem) => fmt::Display::fmt(mem, f),
        }
    }
}

impl fmt::Display for SourceOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceOperand::Register(reg) => fmt::Display::fmt(reg, f),
            SourceOperand::Memory(mem) => fmt::Display::fmt(mem, f),
            SourceOperand::Immediate(imm) => fmt::Display::fmt(imm, f),
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = self.operation.mnemonic();
        match &self.operands {
            Operands::Pair {
                destination: destination @ Operand::Memory(_),
                source: SourceOperand::Immediate(imm),
            } => write!(
                f,
                "{} {}, {} {}",
                mnemonic,
                destination,
                width_qualifier(imm.width),
                imm
            ),
            Operands::Pair {
                destination,
                source,
            } => write!(f, "{} {}, {}", mnemonic, destination, source),
            Operands::Relative(offset) => {
                // NASM's `$` is the start of the jump; the CPU's offset is
                // relative to the end of this 2-byte instruction.
                let target = *offset as i16 + 2;
                if target >= 0 {
                    write!(f, "{} $+{}", mnemonic, target)
                } else {
                    write!(f, "{} ${}", mnemonic, target)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Operation;

    fn mem(base: AddressingBase, displacement: i16) -> MemoryOperand {
        MemoryOperand::new(base, displacement)
    }

    #[test]
    fn test_register_to_register() {
        let inst = Instruction::new(
            Operation::Mov,
            Operand::Register(Register::CX),
            SourceOperand::Register(Register::BX),
        );
        assert_eq!(render(&inst), "mov cx, bx");
    }

    #[test]
    fn test_immediate_to_register_has_no_qualifier() {
        let inst = Instruction::new(
            Operation::Mov,
            Operand::Register(Register::AX),
            SourceOperand::Immediate(Immediate::word(5)),
        );
        assert_eq!(render(&inst), "mov ax, 5");
    }

    #[test]
    fn test_word_immediate_prints_unsigned() {
        let inst = Instruction::new(
            Operation::Add,
            Operand::Register(Register::CX),
            SourceOperand::Immediate(Immediate::word(0xFFF4)),
        );
        assert_eq!(render(&inst), "add cx, 65524");

        let inst = Instruction::new(
            Operation::Mov,
            Operand::Register(Register::DL),
            SourceOperand::Immediate(Immediate::byte(0xFF)),
        );
        assert_eq!(render(&inst), "mov dl, 255");
    }

    #[test]
    fn test_memory_destination_with_immediate_gets_size() {
        let inst = Instruction::new(
            Operation::Mov,
            Operand::Memory(MemoryOperand::direct(0)),
            SourceOperand::Immediate(Immediate::byte(7)),
        );
        assert_eq!(render(&inst), "mov [0], byte 7");

        let inst = Instruction::new(
            Operation::Cmp,
            Operand::Memory(mem(AddressingBase::Di, 901)),
            SourceOperand::Immediate(Immediate::word(347)),
        );
        assert_eq!(render(&inst), "cmp [di + 901], word 347");
    }

    #[test]
    fn test_displacement_sign_rendering() {
        assert_eq!(mem(AddressingBase::BxSi, 0).to_string(), "[bx + si]");
        assert_eq!(mem(AddressingBase::Bp, 4).to_string(), "[bp + 4]");
        assert_eq!(mem(AddressingBase::Bx, -3).to_string(), "[bx - 3]");
        assert_eq!(mem(AddressingBase::Si, i16::MIN).to_string(), "[si - 32768]");
    }

    #[test]
    fn test_every_base_expression() {
        let expected = [
            "[bx + si]",
            "[bx + di]",
            "[bp + si]",
            "[bp + di]",
            "[si]",
            "[di]",
            "[bp]",
            "[bx]",
        ];
        for rm in 0..8u8 {
            let operand = mem(AddressingBase::from_rm(rm), 0);
            assert_eq!(operand.to_string(), expected[rm as usize]);
        }
    }

    #[test]
    fn test_direct_address_prints_unsigned() {
        assert_eq!(MemoryOperand::direct(0xFFFE).to_string(), "[65534]");
        assert_eq!(MemoryOperand::direct(2555).to_string(), "[2555]");
    }

    #[test]
    fn test_memory_source() {
        let inst = Instruction::new(
            Operation::Mov,
            Operand::Register(Register::AH),
            SourceOperand::Memory(mem(AddressingBase::BxSi, 4)),
        );
        assert_eq!(render(&inst), "mov ah, [bx + si + 4]");
    }

    #[test]
    fn test_jump_targets() {
        assert_eq!(render(&Instruction::jump(Operation::Jne, -8)), "jne $-6");
        assert_eq!(render(&Instruction::jump(Operation::Jne, -2)), "jne $+0");
        assert_eq!(render(&Instruction::jump(Operation::Je, 2)), "je $+4");
        assert_eq!(render(&Instruction::jump(Operation::Loop, -4)), "loop $-2");
    }

    #[test]
    fn test_jump_target_extremes() {
        // No i8 overflow at the ends of the range
        assert_eq!(render(&Instruction::jump(Operation::Jcxz, 127)), "jcxz $+129");
        assert_eq!(render(&Instruction::jump(Operation::Jcxz, -128)), "jcxz $-126");
    }

    #[test]
    #[should_panic]
    fn test_direct_base_expression_is_a_model_error() {
        base_expression(AddressingBase::Direct);
    }
}
