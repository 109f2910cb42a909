//! Flat 64 KiB memory
//!
//! Addresses are 16-bit, so every access wraps modulo 65536; a word read at
//! 0xFFFF takes its high byte from 0x0000. Only [`Memory::load`] can fail.

use crate::logging::{log, LogCategory, LogLevel};
use thiserror::Error;

/// Size of the addressable space (2^16 bytes)
pub const MEMORY_SIZE: usize = 0x10000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MemoryError {
    #[error("loading {len} bytes at {start:#06X} exceeds the 64 KiB address space")]
    Overflow { start: u16, len: usize },
}

/// Memory interface used by the decoder and execution engine
pub trait Memory8086 {
    /// Read a byte from memory at the given address
    fn read(&self, addr: u16) -> u8;

    /// Write a byte to memory at the given address
    fn write(&mut self, addr: u16, val: u8);

    /// Read a little-endian word; the high byte address wraps
    #[inline]
    fn read_u16(&self, addr: u16) -> u16 {
        let low_byte = self.read(addr) as u16;
        let high_byte = self.read(addr.wrapping_add(1)) as u16;
        (high_byte << 8) | low_byte
    }

    /// Write a little-endian word; the high byte address wraps
    #[inline]
    fn write_u16(&mut self, addr: u16, val: u16) {
        self.write(addr, (val & 0xFF) as u8);
        self.write(addr.wrapping_add(1), (val >> 8) as u8);
    }

    /// Read the byte at `*cursor` and advance the cursor past it
    #[inline]
    fn pull_u8(&self, cursor: &mut u16) -> u8 {
        let val = self.read(*cursor);
        *cursor = cursor.wrapping_add(1);
        val
    }

    /// Read the word at `*cursor` and advance the cursor past it
    #[inline]
    fn pull_u16(&self, cursor: &mut u16) -> u16 {
        let val = self.read_u16(*cursor);
        *cursor = cursor.wrapping_add(2);
        val
    }
}

/// The simulator's 65536-byte memory
#[derive(Clone)]
pub struct Memory {
    data: Box<[u8]>,
}

impl Memory {
    pub fn new() -> Self {
        Self {
            data: vec![0; MEMORY_SIZE].into_boxed_slice(),
        }
    }

    /// Copy `buffer` into memory at `start`.
    ///
    /// Returns the number of bytes loaded. Nothing is written when the buffer
    /// would run past the end of the address space.
    pub fn load(&mut self, buffer: &[u8], start: u16) -> Result<usize, MemoryError> {
        let begin = start as usize;
        let end = begin + buffer.len();
        if end > MEMORY_SIZE {
            log(LogCategory::Memory, LogLevel::Warn, || {
                format!(
                    "refusing to load {} bytes at {:04X}: address space ends at {:05X}",
                    buffer.len(),
                    start,
                    MEMORY_SIZE
                )
            });
            return Err(MemoryError::Overflow {
                start,
                len: buffer.len(),
            });
        }
        self.data[begin..end].copy_from_slice(buffer);
        log(LogCategory::Memory, LogLevel::Debug, || {
            format!("loaded {} bytes at {:04X}", buffer.len(), start)
        });
        Ok(buffer.len())
    }

    /// Raw view of the address space, `MEMORY_SIZE` bytes
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("size", &self.data.len())
            .finish()
    }
}

impl Memory8086 for Memory {
    #[inline]
    fn read(&self, addr: u16) -> u8 {
        self.data[addr as usize]
    }

    #[inline]
    fn write(&mut self, addr: u16, val: u8) {
        self.data[addr as usize] = val;
    }
}
