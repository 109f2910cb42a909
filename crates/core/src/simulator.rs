//! Simulation context
//!
//! [`Simulator`] owns the memory and CPU state for one program and drives the
//! decode/execute loop. It is also the single-step surface an embedding host
//! talks to: decode at an address, step, reset, raw register and memory access.

use crate::cpu_8086::{execute, CpuState, ExecuteError, Flags};
use crate::decoder::{decode, DecodeError};
use crate::instruction::{Instruction, Register};
use crate::logging::{log, LogCategory, LogLevel};
use crate::memory::{Memory, MemoryError, MEMORY_SIZE};
use crate::renderer::render;
use crate::timing::{estimate, EstimateError};
use serde::de::Error as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io::{self, Write};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Execute(#[from] ExecuteError),
    #[error(transparent)]
    Estimate(#[from] EstimateError),
    /// Disassembly stopped at instruction `index` (0-based)
    #[error("disassembly failed at instruction {index} (address {address:#06X}): {source}")]
    Listing {
        index: usize,
        address: u16,
        source: DecodeError,
    },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("invalid state snapshot: {0}")]
    State(#[from] serde_json::Error),
}

const SNAPSHOT_VERSION: u64 = 1;
const SNAPSHOT_SYSTEM: &str = "sim86";

/// Options for [`Simulator::run`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Estimate clocks for every executed instruction and keep a total
    pub estimate_clocks: bool,
    /// Stop after this many instructions
    pub step_limit: Option<u64>,
}

/// One observed state change of an executed instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RegisterChange {
    Register {
        name: &'static str,
        old: u16,
        new: u16,
    },
    Flags {
        old: Flags,
        new: Flags,
    },
}

impl fmt::Display for RegisterChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterChange::Register { name, old, new } => {
                write!(f, "{}:{:#x}->{:#x}", name, old, new)
            }
            RegisterChange::Flags { old, new } => {
                write!(f, "flags:{}->{}", old.letters(), new.letters())
            }
        }
    }
}

/// Result of one [`Simulator::step`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Address the instruction was decoded from
    pub address: u16,
    pub instruction: Instruction,
    pub before: CpuState,
    pub after: CpuState,
    /// Estimated clocks, when the run estimates them
    pub clocks: Option<u32>,
}

impl Step {
    /// Assembly text of the executed instruction
    pub fn text(&self) -> String {
        render(&self.instruction)
    }

    /// Registers (ip last) whose value changed, then the flags if they changed
    pub fn changes(&self) -> Vec<RegisterChange> {
        let mut changes: Vec<RegisterChange> = self
            .before
            .named_registers()
            .into_iter()
            .zip(self.after.named_registers())
            .filter(|((_, old), (_, new))| old != new)
            .map(|((name, old), (_, new))| RegisterChange::Register { name, old, new })
            .collect();
        if self.before.flags != self.after.flags {
            changes.push(RegisterChange::Flags {
                old: self.before.flags,
                new: self.after.flags,
            });
        }
        changes
    }
}

/// Final state of a [`Simulator::run`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub registers: CpuState,
    pub steps: u64,
    pub total_clocks: Option<u64>,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Final registers:")?;
        for (name, value) in self.registers.named_registers() {
            if value != 0 || name == "ip" {
                writeln!(f, "      {}: {:#06x} ({})", name, value, value)?;
            }
        }
        let flags = self.registers.flags.letters();
        if !flags.is_empty() {
            writeln!(f, "   flags: {}", flags)?;
        }
        if let Some(total) = self.total_clocks {
            writeln!(f, "  clocks: {}", total)?;
        }
        Ok(())
    }
}

/// Memory, CPU and the extent of the loaded program
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    memory: Memory,
    cpu: CpuState,
    program_start: u16,
    /// Exclusive end of the program; can be 0x10000
    program_end: u32,
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a program at `start` and point ip at it.
    ///
    /// Replaces the previous program extent; memory outside the new program
    /// is left as it was.
    pub fn load(&mut self, data: &[u8], start: u16) -> Result<usize, SimError> {
        let len = self.memory.load(data, start)?;
        self.program_start = start;
        self.program_end = start as u32 + len as u32;
        self.cpu.ip = start;
        Ok(len)
    }

    /// Start and exclusive end of the loaded program
    pub fn program_extent(&self) -> (u16, u32) {
        (self.program_start, self.program_end)
    }

    /// Decode the instruction at `address` without executing it.
    ///
    /// Any address in memory is accepted, not only the loaded program.
    /// Returns the number of bytes it takes and its assembly text.
    pub fn decode_one(&self, address: u16) -> Result<(u16, String), DecodeError> {
        let mut cursor = address;
        let instruction = decode(&self.memory, &mut cursor, MEMORY_SIZE as u32)?;
        Ok((cursor.wrapping_sub(address), render(&instruction)))
    }

    /// Write the NASM listing of the whole program: `bits 16`, a blank line,
    /// then one instruction per line. Returns the number of instructions.
    pub fn disassemble_to<W: Write>(&self, out: &mut W) -> Result<usize, SimError> {
        writeln!(out, "bits 16")?;
        writeln!(out)?;

        let mut position = self.program_start as u32;
        let mut index = 0;
        while position < self.program_end {
            let address = position as u16;
            let mut cursor = address;
            let instruction = decode(&self.memory, &mut cursor, self.program_end).map_err(
                |source| SimError::Listing {
                    index,
                    address,
                    source,
                },
            )?;
            writeln!(out, "{}", render(&instruction))?;
            position += cursor.wrapping_sub(address) as u32;
            index += 1;
        }

        log(LogCategory::Decoder, LogLevel::Info, || {
            format!("disassembled {} instructions", index)
        });
        Ok(index)
    }

    /// The listing of [`Simulator::disassemble_to`] as a string
    pub fn disassemble(&self) -> Result<String, SimError> {
        let mut out = Vec::new();
        self.disassemble_to(&mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Decode the instruction at ip, move ip past it and execute it.
    ///
    /// ip may point anywhere in memory. On error the CPU is left as it was
    /// before the call.
    pub fn step(&mut self) -> Result<Step, SimError> {
        self.step_within(MEMORY_SIZE as u32)
    }

    /// [`Simulator::step`] with instruction bytes limited to `end`
    fn step_within(&mut self, end: u32) -> Result<Step, SimError> {
        let before = self.cpu;
        let address = self.cpu.ip;

        let mut cursor = address;
        let instruction = decode(&self.memory, &mut cursor, end)?;
        self.cpu.ip = cursor;

        if let Err(err) = execute(&mut self.memory, &mut self.cpu, &instruction) {
            self.cpu = before;
            log(LogCategory::Execution, LogLevel::Warn, || {
                format!("{:04X}: {}", address, err)
            });
            return Err(err.into());
        }

        Ok(Step {
            address,
            instruction,
            before,
            after: self.cpu,
            clocks: None,
        })
    }

    /// Run from the current ip until it leaves the loaded program or the
    /// step limit is reached
    pub fn run(&mut self, config: &RunConfig) -> Result<RunSummary, SimError> {
        self.run_with(config, |_| {})
    }

    /// [`Simulator::run`], calling `on_step` after every executed instruction
    pub fn run_with<F>(
        &mut self,
        config: &RunConfig,
        mut on_step: F,
    ) -> Result<RunSummary, SimError>
    where
        F: FnMut(&Step),
    {
        let mut steps = 0u64;
        let mut total_clocks = config.estimate_clocks.then_some(0u64);

        while self.ip_in_program() {
            if config.step_limit.is_some_and(|limit| steps >= limit) {
                log(LogCategory::Execution, LogLevel::Info, || {
                    format!("step limit reached at ip {:04X}", self.cpu.ip)
                });
                break;
            }

            // A program's last instruction must not borrow bytes past its end
            let mut step = self.step_within(self.program_end)?;
            if let Some(total) = total_clocks.as_mut() {
                let clocks = estimate(&step.instruction)?;
                *total += clocks as u64;
                step.clocks = Some(clocks);
            }
            steps += 1;
            on_step(&step);
        }

        log(LogCategory::Execution, LogLevel::Info, || {
            format!("run finished after {} instructions", steps)
        });
        Ok(RunSummary {
            registers: self.cpu,
            steps,
            total_clocks,
        })
    }

    fn ip_in_program(&self) -> bool {
        let ip = self.cpu.ip as u32;
        ip >= self.program_start as u32 && ip < self.program_end
    }

    /// Zero the CPU and point ip back at the start of the program.
    /// Memory is untouched.
    pub fn reset_cpu(&mut self) {
        self.cpu.reset();
        self.cpu.ip = self.program_start;
    }

    pub fn cpu(&self) -> &CpuState {
        &self.cpu
    }

    pub fn cpu_mut(&mut self) -> &mut CpuState {
        &mut self.cpu
    }

    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }

    pub fn zero_flag(&self) -> bool {
        self.cpu.flags.zero
    }

    pub fn sign_flag(&self) -> bool {
        self.cpu.flags.sign
    }

    pub fn register(&self, reg: Register) -> u16 {
        self.cpu.read_register(reg)
    }

    pub fn set_register(&mut self, reg: Register, val: u16) {
        self.cpu.write_register(reg, val);
    }

    pub fn ip(&self) -> u16 {
        self.cpu.ip
    }

    pub fn set_ip(&mut self, ip: u16) {
        self.cpu.ip = ip;
    }

    /// Return a JSON snapshot of the CPU state.
    /// Memory is not included.
    pub fn save_state(&self) -> Value {
        serde_json::json!({
            "version": SNAPSHOT_VERSION,
            "system": SNAPSHOT_SYSTEM,
            "registers": self.cpu,
        })
    }

    /// Restore a snapshot made by [`Simulator::save_state`].
    ///
    /// The CPU is untouched unless the whole snapshot is valid.
    pub fn load_state(&mut self, state: &Value) -> Result<(), SimError> {
        match state.get("version").and_then(Value::as_u64) {
            Some(SNAPSHOT_VERSION) => {}
            Some(version) => {
                return Err(SimError::State(serde_json::Error::custom(format!(
                    "unsupported snapshot version {}",
                    version
                ))))
            }
            None => {
                return Err(SimError::State(serde_json::Error::missing_field(
                    "version",
                )))
            }
        }
        if state.get("system").and_then(Value::as_str) != Some(SNAPSHOT_SYSTEM) {
            return Err(SimError::State(serde_json::Error::custom(
                "snapshot is not from sim86",
            )));
        }
        let regs = state
            .get("registers")
            .ok_or_else(|| serde_json::Error::missing_field("registers"))?;
        self.cpu = CpuState::deserialize(regs)?;
        Ok(())
    }
}
