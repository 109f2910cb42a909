//! 8086 register file and execution engine
//!
//! Executes MOV, ADD, SUB, CMP and JNE against a [`CpuState`] and any
//! [`Memory8086`]. Only the zero and sign flags are modelled.

use crate::instruction::{
    Instruction, MemoryOperand, Operand, Operands, Operation, Register, SourceOperand, Width,
};
use crate::logging::{log, LogCategory, LogLevel};
use crate::memory::Memory8086;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ExecuteError {
    /// Decodable, but there is no execution model for it
    #[error("execution of '{}' is not implemented", .0.mnemonic())]
    Unimplemented(Operation),
}

/// Status flags updated by ADD, SUB and CMP
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flags {
    pub zero: bool,
    pub sign: bool,
}

impl Flags {
    /// Letters of the set flags, e.g. `"ZS"`; empty when none are set
    pub fn letters(&self) -> String {
        let mut letters = String::new();
        if self.zero {
            letters.push('Z');
        }
        if self.sign {
            letters.push('S');
        }
        letters
    }
}

/// CPU register file. Byte registers are views into the low/high halves of
/// AX, CX, DX and BX.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuState {
    pub ax: u16,
    pub bx: u16,
    pub cx: u16,
    pub dx: u16,
    pub sp: u16,
    pub bp: u16,
    pub si: u16,
    pub di: u16,
    pub ip: u16,
    pub flags: Flags,
}

impl CpuState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero every register and flag
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Word registers and ip with their names, in display order
    pub fn named_registers(&self) -> [(&'static str, u16); 9] {
        [
            ("ax", self.ax),
            ("bx", self.bx),
            ("cx", self.cx),
            ("dx", self.dx),
            ("sp", self.sp),
            ("bp", self.bp),
            ("si", self.si),
            ("di", self.di),
            ("ip", self.ip),
        ]
    }

    /// Get 8-bit high register
    #[inline]
    fn get_reg8_high(&self, reg: u8) -> u8 {
        debug_assert!(reg < 4, "Invalid 8-bit high register index: {} (must be 0-3)", reg);
        (self.get_reg16(reg) >> 8) as u8
    }

    /// Get 8-bit low register
    #[inline]
    fn get_reg8_low(&self, reg: u8) -> u8 {
        debug_assert!(reg < 4, "Invalid 8-bit low register index: {} (must be 0-3)", reg);
        (self.get_reg16(reg) & 0xFF) as u8
    }

    /// Set 8-bit high register, keeping the low half
    #[inline]
    fn set_reg8_high(&mut self, reg: u8, val: u8) {
        debug_assert!(reg < 4, "Invalid 8-bit high register index: {} (must be 0-3)", reg);
        let merged = (self.get_reg16(reg) & 0x00FF) | ((val as u16) << 8);
        self.set_reg16(reg, merged);
    }

    /// Set 8-bit low register, keeping the high half
    #[inline]
    fn set_reg8_low(&mut self, reg: u8, val: u8) {
        debug_assert!(reg < 4, "Invalid 8-bit low register index: {} (must be 0-3)", reg);
        let merged = (self.get_reg16(reg) & 0xFF00) | (val as u16);
        self.set_reg16(reg, merged);
    }

    /// Get 16-bit register by REG field
    #[inline]
    fn get_reg16(&self, reg: u8) -> u16 {
        match reg {
            0 => self.ax,
            1 => self.cx,
            2 => self.dx,
            3 => self.bx,
            4 => self.sp,
            5 => self.bp,
            6 => self.si,
            7 => self.di,
            _ => unreachable!("Invalid 16-bit register index: {} (must be 0-7)", reg),
        }
    }

    /// Set 16-bit register by REG field
    #[inline]
    fn set_reg16(&mut self, reg: u8, val: u16) {
        match reg {
            0 => self.ax = val,
            1 => self.cx = val,
            2 => self.dx = val,
            3 => self.bx = val,
            4 => self.sp = val,
            5 => self.bp = val,
            6 => self.si = val,
            7 => self.di = val,
            _ => unreachable!("Invalid 16-bit register index: {} (must be 0-7)", reg),
        }
    }

    /// Read a register; byte registers come back zero-extended
    pub fn read_register(&self, reg: Register) -> u16 {
        let field = reg.encoding();
        match (reg.is_wide(), field) {
            (true, _) => self.get_reg16(field),
            (false, 0..=3) => self.get_reg8_low(field) as u16,
            (false, _) => self.get_reg8_high(field - 4) as u16,
        }
    }

    /// Write a register. Byte registers take the low 8 bits of `val` and
    /// leave the other half of the word register untouched.
    pub fn write_register(&mut self, reg: Register, val: u16) {
        let field = reg.encoding();
        match (reg.is_wide(), field) {
            (true, _) => self.set_reg16(field, val),
            (false, 0..=3) => self.set_reg8_low(field, val as u8),
            (false, _) => self.set_reg8_high(field - 4, val as u8),
        }
    }

    /// Address of a memory operand: base registers plus displacement,
    /// wrapping at 64 KiB
    pub fn effective_address(&self, mem: &MemoryOperand) -> u16 {
        if mem.is_direct() {
            return mem.direct_address();
        }
        mem.base
            .registers()
            .iter()
            .fold(mem.displacement as u16, |addr, &reg| {
                addr.wrapping_add(self.read_register(reg))
            })
    }

    /// Update zero and sign from a result already masked to `width`
    fn update_flags(&mut self, result: u16, width: Width) {
        self.flags.zero = result == 0;
        self.flags.sign = result & width.sign_bit() != 0;
        log(LogCategory::Execution, LogLevel::Debug, || {
            format!("flags: zero={} sign={}", self.flags.zero, self.flags.sign)
        });
    }
}

fn read_memory<M: Memory8086>(memory: &M, addr: u16, width: Width) -> u16 {
    match width {
        Width::Byte => memory.read(addr) as u16,
        Width::Word => memory.read_u16(addr),
    }
}

fn read_source<M: Memory8086>(
    memory: &M,
    cpu: &CpuState,
    source: &SourceOperand,
    width: Width,
) -> u16 {
    let value = match source {
        SourceOperand::Register(reg) => cpu.read_register(*reg),
        SourceOperand::Memory(mem) => read_memory(memory, cpu.effective_address(mem), width),
        SourceOperand::Immediate(imm) => imm.read(),
    };
    value & width.mask()
}

fn write_destination<M: Memory8086>(
    memory: &mut M,
    cpu: &mut CpuState,
    destination: &Operand,
    width: Width,
    value: u16,
) {
    match destination {
        Operand::Register(reg) => {
            cpu.write_register(*reg, value);
            log(LogCategory::Execution, LogLevel::Trace, || {
                format!("{} <- {:#06X}", reg.name(), cpu.read_register(*reg))
            });
        }
        Operand::Memory(mem) => {
            let addr = cpu.effective_address(mem);
            match width {
                Width::Byte => memory.write(addr, value as u8),
                Width::Word => memory.write_u16(addr, value),
            }
            log(LogCategory::Execution, LogLevel::Trace, || {
                format!("[{:04X}] <- {:#06X} ({:?})", addr, value & width.mask(), width)
            });
        }
    }
}

/// Execute one decoded instruction.
///
/// `cpu.ip` must already point past the instruction; relative jumps are
/// applied to it. Memory-to-memory operand pairs are a model error and panic.
pub fn execute<M: Memory8086>(
    memory: &mut M,
    cpu: &mut CpuState,
    instruction: &Instruction,
) -> Result<(), ExecuteError> {
    match (instruction.operation, &instruction.operands) {
        (
            Operation::Mov,
            Operands::Pair {
                destination,
                source,
            },
        ) => {
            let width = operand_width(instruction);
            let value = read_source(memory, cpu, source, width);
            write_destination(memory, cpu, destination, width, value);
            Ok(())
        }

        (
            op @ (Operation::Add | Operation::Sub | Operation::Cmp),
            Operands::Pair {
                destination,
                source,
            },
        ) => {
            let width = operand_width(instruction);
            let lhs = read_source(memory, cpu, &SourceOperand::from(*destination), width);
            let rhs = read_source(memory, cpu, source, width);
            let result = match op {
                Operation::Add => lhs.wrapping_add(rhs),
                _ => lhs.wrapping_sub(rhs),
            } & width.mask();

            cpu.update_flags(result, width);
            if op != Operation::Cmp {
                write_destination(memory, cpu, destination, width, result);
            }
            Ok(())
        }

        (Operation::Jne, Operands::Relative(offset)) => {
            if !cpu.flags.zero {
                let target = cpu.ip.wrapping_add(*offset as i16 as u16);
                log(LogCategory::Execution, LogLevel::Trace, || {
                    format!("jne taken: ip {:04X} -> {:04X}", cpu.ip, target)
                });
                cpu.ip = target;
            }
            Ok(())
        }

        (op, _) => Err(ExecuteError::Unimplemented(op)),
    }
}

fn operand_width(instruction: &Instruction) -> Width {
    match instruction.width() {
        Some(width) => width,
        None => unreachable!("no operand width for {:?}", instruction),
    }
}
