//! 8086 instruction decoding, disassembly and simulation.
//!
//! Covers MOV, ADD, SUB, CMP, the conditional jumps and the LOOP family.
//! Bytes go through [`decoder::decode`] into an [`Instruction`], which is then
//! rendered as NASM text, executed against a [`CpuState`], or costed in clocks.
//! [`Simulator`] ties memory and CPU together for a whole program.

pub mod cpu_8086;
pub mod decoder;
pub mod instruction;
pub mod logging;
pub mod memory;
pub mod renderer;
pub mod simulator;
pub mod tables;
pub mod timing;

pub use cpu_8086::{execute, CpuState, ExecuteError, Flags};
pub use decoder::{decode, DecodeError};
pub use instruction::{
    AddressingBase, Immediate, Instruction, MemoryOperand, Operand, Operands, Operation, Register,
    SourceOperand, Width,
};
pub use memory::{Memory, Memory8086, MemoryError, MEMORY_SIZE};
pub use renderer::render;
pub use simulator::{RegisterChange, RunConfig, RunSummary, SimError, Simulator, Step};
pub use timing::{estimate, EstimateError};
