//! Clock estimation
//!
//! Base costs and effective-address surcharges from the 8086 user's manual
//! ("Table 2-20. Effective Address Calculation Time" and the MOV/ADD rows of
//! "Table 2-21. Instruction Set Reference Data"). Only MOV and ADD are costed.

use crate::instruction::{
    AddressingBase, Instruction, MemoryOperand, Operand, Operands, Operation, Register,
    SourceOperand,
};
use crate::logging::{log, LogCategory, LogLevel};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum EstimateError {
    /// Decodable, but there is no cost model for it
    #[error("clock estimation of '{}' is not implemented", .0.mnemonic())]
    Unimplemented(Operation),
}

/// Effective-address calculation clocks for one memory operand
pub fn ea_clocks(mem: &MemoryOperand) -> u32 {
    let displacement = if mem.displacement != 0 { 4 } else { 0 };
    match mem.base {
        AddressingBase::Direct => 6,
        AddressingBase::Si | AddressingBase::Di | AddressingBase::Bp | AddressingBase::Bx => {
            5 + displacement
        }
        AddressingBase::BpDi | AddressingBase::BxSi => 7 + displacement,
        AddressingBase::BpSi | AddressingBase::BxDi => 8 + displacement,
    }
}

/// AX paired with any memory operand costs a flat 10, whatever the addressing
fn is_accumulator_transfer(destination: &Operand, source: &SourceOperand) -> bool {
    matches!(
        (destination, source),
        (Operand::Register(Register::AX), SourceOperand::Memory(_))
            | (Operand::Memory(_), SourceOperand::Register(Register::AX))
    )
}

/// Estimate the clocks one instruction takes
pub fn estimate(instruction: &Instruction) -> Result<u32, EstimateError> {
    let Operands::Pair {
        destination,
        source,
    } = &instruction.operands
    else {
        return Err(EstimateError::Unimplemented(instruction.operation));
    };

    let clocks = match instruction.operation {
        Operation::Mov => {
            if is_accumulator_transfer(destination, source) {
                10
            } else {
                match (destination, source) {
                    (Operand::Register(_), SourceOperand::Register(_)) => 2,
                    (Operand::Register(_), SourceOperand::Memory(mem)) => 8 + ea_clocks(mem),
                    (Operand::Memory(mem), SourceOperand::Register(_)) => 9 + ea_clocks(mem),
                    (Operand::Register(_), SourceOperand::Immediate(_)) => 4,
                    (Operand::Memory(mem), SourceOperand::Immediate(_)) => 10 + ea_clocks(mem),
                    (Operand::Memory(_), SourceOperand::Memory(_)) => {
                        return Err(EstimateError::Unimplemented(instruction.operation))
                    }
                }
            }
        }
        Operation::Add => match (destination, source) {
            (Operand::Register(_), SourceOperand::Register(_)) => 3,
            (Operand::Register(_), SourceOperand::Memory(mem)) => 9 + ea_clocks(mem),
            (Operand::Memory(mem), SourceOperand::Register(_)) => 16 + ea_clocks(mem),
            (Operand::Register(_), SourceOperand::Immediate(_)) => 4,
            (Operand::Memory(mem), SourceOperand::Immediate(_)) => 17 + ea_clocks(mem),
            (Operand::Memory(_), SourceOperand::Memory(_)) => {
                return Err(EstimateError::Unimplemented(instruction.operation))
            }
        },
        op => return Err(EstimateError::Unimplemented(op)),
    };

    log(LogCategory::Timing, LogLevel::Trace, || {
        format!("{} = {} clocks", instruction, clocks)
    });
    Ok(clocks)
}
