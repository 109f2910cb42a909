//! Byte-stream decoder
//!
//! Decodes one instruction at a time from [`Memory8086`]. The first byte is
//! tested against the opcode patterns in `tables` in a fixed order; the first
//! match decides how many further bytes the instruction takes.

use crate::instruction::{
    AddressingBase, Immediate, Instruction, MemoryOperand, Operand, Operation, Register,
    SourceOperand,
};
use crate::logging::{log, LogCategory, LogLevel};
use crate::memory::{Memory8086, MEMORY_SIZE};
use crate::tables::{
    alu_operation, ALU_IMM_ACC, ALU_IMM_RM, ALU_RM_REG, COND_JUMP, COND_JUMP_TABLE, LOOP_JUMP,
    LOOP_JUMP_TABLE, MOV_ACC_MEM, MOV_IMM_REG, MOV_IMM_RM, MOV_RM_REG, RM_DIRECT_ADDRESS,
};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// No bytes left; the normal end of a decode loop
    #[error("end of instruction stream")]
    EndOfStream,
    #[error("unknown opcode {opcode:#04X} at {address:#06X}")]
    UnknownOpcode { opcode: u8, address: u16 },
    /// The opcode was recognized but the stream ends inside the instruction.
    /// `needed` counts the bytes missing when the stream ran out.
    #[error("instruction at {address:#06X} is truncated ({needed} more byte(s) needed)")]
    MissingBytes { address: u16, needed: u32 },
}

/// Bounded reader over the bytes of one instruction
struct ByteStream<'a, M: Memory8086> {
    memory: &'a M,
    start: u16,
    cursor: u16,
    consumed: u32,
    available: u32,
}

impl<'a, M: Memory8086> ByteStream<'a, M> {
    fn new(memory: &'a M, start: u16, end: u32) -> Self {
        Self {
            memory,
            start,
            cursor: start,
            consumed: 0,
            available: end.saturating_sub(start as u32),
        }
    }

    fn take(&mut self, count: u32) -> Result<(), DecodeError> {
        let wanted = self.consumed + count;
        if wanted > self.available {
            return Err(DecodeError::MissingBytes {
                address: self.start,
                needed: wanted - self.available,
            });
        }
        self.consumed = wanted;
        Ok(())
    }

    fn pull_u8(&mut self) -> Result<u8, DecodeError> {
        self.take(1)?;
        Ok(self.memory.pull_u8(&mut self.cursor))
    }

    fn pull_u16(&mut self) -> Result<u16, DecodeError> {
        self.take(2)?;
        Ok(self.memory.pull_u16(&mut self.cursor))
    }

    /// 8-bit displacement, sign-extended to 16 bits
    fn pull_i8_extended(&mut self) -> Result<i16, DecodeError> {
        Ok(self.pull_u8()? as i8 as i16)
    }

    fn pull_immediate(&mut self, wide: bool) -> Result<Immediate, DecodeError> {
        if wide {
            Ok(Immediate::word(self.pull_u16()?))
        } else {
            Ok(Immediate::byte(self.pull_u8()?))
        }
    }

    fn unknown(&self, opcode: u8) -> DecodeError {
        DecodeError::UnknownOpcode {
            opcode,
            address: self.start,
        }
    }
}

/// Decode ModR/M byte and return (mod, reg, r/m)
#[inline]
fn decode_modrm(modrm: u8) -> (u8, u8, u8) {
    let modbits = (modrm >> 6) & 0x03; // Bits 7-6
    let reg = (modrm >> 3) & 0x07; // Bits 5-3
    let rm = modrm & 0x07; // Bits 2-0
    (modbits, reg, rm)
}

/// Register or memory operand selected by `mod` and `r/m`, pulling any
/// displacement bytes ("Table 4-10. R/M (Register/Memory) Field Encoding")
fn decode_reg_or_mem<M: Memory8086>(
    stream: &mut ByteStream<'_, M>,
    modbits: u8,
    rm: u8,
    wide: bool,
) -> Result<Operand, DecodeError> {
    let mem = match modbits {
        // mod = 11: Register mode
        0b11 => return Ok(Operand::Register(Register::from_encoding(rm, wide))),
        // mod = 10: 16-bit displacement
        0b10 => MemoryOperand::new(AddressingBase::from_rm(rm), stream.pull_u16()? as i16),
        // mod = 01: 8-bit displacement, sign-extended
        0b01 => MemoryOperand::new(AddressingBase::from_rm(rm), stream.pull_i8_extended()?),
        // mod = 00: no displacement, except rm = 110 which is a direct address
        _ => {
            if rm == RM_DIRECT_ADDRESS {
                MemoryOperand::direct(stream.pull_u16()?)
            } else {
                MemoryOperand::new(AddressingBase::from_rm(rm), 0)
            }
        }
    };
    Ok(Operand::Memory(mem))
}

/// Shared `xxxxxxdw mod reg r/m` form: returns (destination, source)
fn decode_reg_rm_pair<M: Memory8086>(
    stream: &mut ByteStream<'_, M>,
    opcode: u8,
) -> Result<(Operand, SourceOperand), DecodeError> {
    let wide = opcode & 0b01 != 0;
    let reg_is_destination = opcode & 0b10 != 0;

    let (modbits, reg, rm) = decode_modrm(stream.pull_u8()?);
    let reg = Register::from_encoding(reg, wide);
    let reg_or_mem = decode_reg_or_mem(stream, modbits, rm, wide)?;

    if reg_is_destination {
        Ok((Operand::Register(reg), reg_or_mem.into()))
    } else {
        Ok((reg_or_mem, SourceOperand::Register(reg)))
    }
}

/// Decode the instruction at `*cursor`.
///
/// `end` is the exclusive end of the instruction stream (at most
/// `MEMORY_SIZE`). On success the cursor is moved past the instruction; on
/// any error it is left untouched.
pub fn decode<M: Memory8086>(
    memory: &M,
    cursor: &mut u16,
    end: u32,
) -> Result<Instruction, DecodeError> {
    let end = end.min(MEMORY_SIZE as u32);
    if *cursor as u32 >= end {
        return Err(DecodeError::EndOfStream);
    }

    let mut stream = ByteStream::new(memory, *cursor, end);
    let result = decode_instruction(&mut stream);

    match &result {
        Ok(instruction) => {
            log(LogCategory::Decoder, LogLevel::Trace, || {
                format!(
                    "{:04X}: {} ({} bytes)",
                    stream.start, instruction, stream.consumed
                )
            });
            *cursor = stream.cursor;
        }
        Err(err) => {
            log(LogCategory::Decoder, LogLevel::Warn, || err.to_string());
        }
    }
    result
}

// Handy reference: "Table 4-12. 8086 Instruction Encoding"
fn decode_instruction<M: Memory8086>(
    stream: &mut ByteStream<'_, M>,
) -> Result<Instruction, DecodeError> {
    let opcode = stream.pull_u8()?;

    // MOV: Register/memory to/from register
    if MOV_RM_REG.matches(opcode) {
        let (destination, source) = decode_reg_rm_pair(stream, opcode)?;
        return Ok(Instruction::new(Operation::Mov, destination, source));
    }

    // MOV: Immediate to register
    if MOV_IMM_REG.matches(opcode) {
        let wide = opcode & 0b1000 != 0;
        let reg = Register::from_encoding(opcode & 0b111, wide);
        let imm = stream.pull_immediate(wide)?;
        return Ok(Instruction::new(
            Operation::Mov,
            Operand::Register(reg),
            SourceOperand::Immediate(imm),
        ));
    }

    // MOV: Immediate to register/memory
    if MOV_IMM_RM.matches(opcode) {
        let wide = opcode & 0b1 != 0;
        let (modbits, _, rm) = decode_modrm(stream.pull_u8()?);
        let destination = decode_reg_or_mem(stream, modbits, rm, wide)?;
        let imm = stream.pull_immediate(wide)?;
        return Ok(Instruction::new(
            Operation::Mov,
            destination,
            SourceOperand::Immediate(imm),
        ));
    }

    // MOV: Memory to accumulator / accumulator to memory (always a 16-bit address)
    if MOV_ACC_MEM.matches(opcode) {
        let wide = opcode & 0b01 != 0;
        let to_memory = opcode & 0b10 != 0;
        let accumulator = Register::from_encoding(0, wide);
        let mem = MemoryOperand::direct(stream.pull_u16()?);
        return Ok(if to_memory {
            Instruction::new(
                Operation::Mov,
                Operand::Memory(mem),
                SourceOperand::Register(accumulator),
            )
        } else {
            Instruction::new(
                Operation::Mov,
                Operand::Register(accumulator),
                SourceOperand::Memory(mem),
            )
        });
    }

    // ADD/SUB/CMP: Register/memory with register to either
    if ALU_RM_REG.matches(opcode) {
        let operation = alu_operation(opcode >> 3).ok_or_else(|| stream.unknown(opcode))?;
        let (destination, source) = decode_reg_rm_pair(stream, opcode)?;
        return Ok(Instruction::new(operation, destination, source));
    }

    // ADD/SUB/CMP: Immediate to register/memory, operation in the reg field
    if ALU_IMM_RM.matches(opcode) {
        let wide = opcode & 0b01 != 0;
        let sign_extend = opcode & 0b10 != 0;
        let (modbits, op_field, rm) = decode_modrm(stream.pull_u8()?);
        let operation = alu_operation(op_field).ok_or_else(|| stream.unknown(opcode))?;
        let destination = decode_reg_or_mem(stream, modbits, rm, wide)?;
        let imm = match (wide, sign_extend) {
            (true, true) => Immediate::word(stream.pull_i8_extended()? as u16),
            (true, false) => Immediate::word(stream.pull_u16()?),
            (false, _) => Immediate::byte(stream.pull_u8()?),
        };
        return Ok(Instruction::new(
            operation,
            destination,
            SourceOperand::Immediate(imm),
        ));
    }

    // ADD/SUB/CMP: Immediate to accumulator
    if ALU_IMM_ACC.matches(opcode) {
        let operation = alu_operation(opcode >> 3).ok_or_else(|| stream.unknown(opcode))?;
        let wide = opcode & 0b1 != 0;
        let accumulator = Register::from_encoding(0, wide);
        let imm = stream.pull_immediate(wide)?;
        return Ok(Instruction::new(
            operation,
            Operand::Register(accumulator),
            SourceOperand::Immediate(imm),
        ));
    }

    // Conditional jumps
    if COND_JUMP.matches(opcode) {
        let offset = stream.pull_u8()? as i8;
        return Ok(Instruction::jump(
            COND_JUMP_TABLE[(opcode & 0b1111) as usize],
            offset,
        ));
    }

    // LOOP, LOOPZ, LOOPNZ, JCXZ
    if LOOP_JUMP.matches(opcode) {
        let offset = stream.pull_u8()? as i8;
        return Ok(Instruction::jump(
            LOOP_JUMP_TABLE[(opcode & 0b11) as usize],
            offset,
        ));
    }

    Err(stream.unknown(opcode))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Memory;

    fn decode_bytes(bytes: &[u8]) -> Result<(Instruction, u16), DecodeError> {
        let mut mem = Memory::new();
        mem.load(bytes, 0).unwrap();
        let mut cursor = 0u16;
        let inst = decode(&mem, &mut cursor, bytes.len() as u32)?;
        Ok((inst, cursor))
    }

    fn reg(r: Register) -> Operand {
        Operand::Register(r)
    }

    fn mem(base: AddressingBase, displacement: i16) -> MemoryOperand {
        MemoryOperand::new(base, displacement)
    }

    #[test]
    fn test_decode_modrm() {
        let (modbits, reg, rm) = decode_modrm(0b11_010_001);
        assert_eq!(modbits, 0b11);
        assert_eq!(reg, 0b010);
        assert_eq!(rm, 0b001);

        let (modbits, reg, rm) = decode_modrm(0b00_101_110);
        assert_eq!(modbits, 0b00);
        assert_eq!(reg, 0b101);
        assert_eq!(rm, 0b110);
    }

    #[test]
    fn test_mov_register_to_register() {
        // mov cx, bx: direction 0, reg=BX, rm=CX
        let (inst, len) = decode_bytes(&[0x89, 0xD9]).unwrap();
        assert_eq!(len, 2);
        assert_eq!(
            inst,
            Instruction::new(Operation::Mov, reg(Register::CX), SourceOperand::Register(Register::BX))
        );
    }

    #[test]
    fn test_mov_byte_registers_with_direction() {
        // mov al, ch (8A C5): direction 1, reg=AL, rm=CH
        let (inst, _) = decode_bytes(&[0x8A, 0xC5]).unwrap();
        assert_eq!(
            inst,
            Instruction::new(Operation::Mov, reg(Register::AL), SourceOperand::Register(Register::CH))
        );
    }

    #[test]
    fn test_mov_immediate_to_register() {
        let (inst, len) = decode_bytes(&[0xB8, 0x05, 0x00]).unwrap();
        assert_eq!(len, 3);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Mov,
                reg(Register::AX),
                SourceOperand::Immediate(Immediate::word(5))
            )
        );

        let (inst, len) = decode_bytes(&[0xB1, 0x0C]).unwrap();
        assert_eq!(len, 2);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Mov,
                reg(Register::CL),
                SourceOperand::Immediate(Immediate::byte(12))
            )
        );
    }

    #[test]
    fn test_mod_01_sign_extends_displacement() {
        // mov ax, [bx + di - 37]
        let (inst, len) = decode_bytes(&[0x8B, 0x41, 0xDB]).unwrap();
        assert_eq!(len, 3);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Mov,
                reg(Register::AX),
                SourceOperand::Memory(mem(AddressingBase::BxDi, -37))
            )
        );
    }

    #[test]
    fn test_mod_10_word_displacement() {
        // mov [si - 300], cx
        let (inst, len) = decode_bytes(&[0x89, 0x8C, 0xD4, 0xFE]).unwrap();
        assert_eq!(len, 4);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Mov,
                Operand::Memory(mem(AddressingBase::Si, -300)),
                SourceOperand::Register(Register::CX)
            )
        );
    }

    #[test]
    fn test_mod_00_bp_is_direct_address() {
        // mov bp, [5]
        let (inst, len) = decode_bytes(&[0x8B, 0x2E, 0x05, 0x00]).unwrap();
        assert_eq!(len, 4);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Mov,
                reg(Register::BP),
                SourceOperand::Memory(MemoryOperand::direct(5))
            )
        );
    }

    #[test]
    fn test_mod_01_rm_110_is_bp() {
        // mov dx, [bp]
        let (inst, _) = decode_bytes(&[0x8B, 0x56, 0x00]).unwrap();
        assert_eq!(
            inst.source(),
            Some(&SourceOperand::Memory(mem(AddressingBase::Bp, 0)))
        );
    }

    #[test]
    fn test_mov_immediate_to_memory() {
        // mov [0], byte 7
        let (inst, len) = decode_bytes(&[0xC6, 0x06, 0x00, 0x00, 0x07]).unwrap();
        assert_eq!(len, 5);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Mov,
                Operand::Memory(MemoryOperand::direct(0)),
                SourceOperand::Immediate(Immediate::byte(7))
            )
        );

        // mov [di + 901], word 347
        let (inst, len) = decode_bytes(&[0xC7, 0x85, 0x85, 0x03, 0x5B, 0x01]).unwrap();
        assert_eq!(len, 6);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Mov,
                Operand::Memory(mem(AddressingBase::Di, 901)),
                SourceOperand::Immediate(Immediate::word(347))
            )
        );
    }

    #[test]
    fn test_mov_accumulator_forms() {
        // mov ax, [2555]
        let (inst, len) = decode_bytes(&[0xA1, 0xFB, 0x09]).unwrap();
        assert_eq!(len, 3);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Mov,
                reg(Register::AX),
                SourceOperand::Memory(MemoryOperand::direct(2555))
            )
        );

        // mov [16], al (byte form still carries a 16-bit address)
        let (inst, len) = decode_bytes(&[0xA2, 0x10, 0x00]).unwrap();
        assert_eq!(len, 3);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Mov,
                Operand::Memory(MemoryOperand::direct(16)),
                SourceOperand::Register(Register::AL)
            )
        );
    }

    #[test]
    fn test_alu_register_memory_forms() {
        // add bx, [bx + si]
        let (inst, _) = decode_bytes(&[0x03, 0x18]).unwrap();
        assert_eq!(inst.operation, Operation::Add);
        assert_eq!(inst.destination(), Some(&reg(Register::BX)));

        // sub bx, [bx + si]
        let (inst, _) = decode_bytes(&[0x2B, 0x18]).unwrap();
        assert_eq!(inst.operation, Operation::Sub);

        // cmp [bp + di], ax
        let (inst, _) = decode_bytes(&[0x39, 0x03]).unwrap();
        assert_eq!(inst.operation, Operation::Cmp);
        assert_eq!(
            inst.destination(),
            Some(&Operand::Memory(mem(AddressingBase::BpDi, 0)))
        );
        assert_eq!(inst.source(), Some(&SourceOperand::Register(Register::AX)));
    }

    #[test]
    fn test_alu_immediate_sign_extension() {
        // add si, 2 (83 C6 02)
        let (inst, len) = decode_bytes(&[0x83, 0xC6, 0x02]).unwrap();
        assert_eq!(len, 3);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Add,
                reg(Register::SI),
                SourceOperand::Immediate(Immediate::word(2))
            )
        );

        // add cx, -12 (83 C1 F4) sign-extends to 0xFFF4
        let (inst, _) = decode_bytes(&[0x83, 0xC1, 0xF4]).unwrap();
        assert_eq!(inst.source(), Some(&SourceOperand::Immediate(Immediate::word(0xFFF4))));

        // sub si, 2 (83 EE 02)
        let (inst, _) = decode_bytes(&[0x83, 0xEE, 0x02]).unwrap();
        assert_eq!(inst.operation, Operation::Sub);
    }

    #[test]
    fn test_alu_immediate_word_without_sign_extension() {
        // cmp [4834], word 1000
        let (inst, len) = decode_bytes(&[0x81, 0x3E, 0xE2, 0x12, 0xE8, 0x03]).unwrap();
        assert_eq!(len, 6);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Cmp,
                Operand::Memory(MemoryOperand::direct(4834)),
                SourceOperand::Immediate(Immediate::word(1000))
            )
        );
    }

    #[test]
    fn test_alu_immediate_to_byte_memory() {
        // add [bx], byte 34
        let (inst, len) = decode_bytes(&[0x80, 0x07, 0x22]).unwrap();
        assert_eq!(len, 3);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Add,
                Operand::Memory(mem(AddressingBase::Bx, 0)),
                SourceOperand::Immediate(Immediate::byte(34))
            )
        );
    }

    #[test]
    fn test_alu_immediate_to_accumulator() {
        let (inst, len) = decode_bytes(&[0x05, 0xE8, 0x03]).unwrap();
        assert_eq!(len, 3);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Add,
                reg(Register::AX),
                SourceOperand::Immediate(Immediate::word(1000))
            )
        );

        let (inst, len) = decode_bytes(&[0x3C, 0x09]).unwrap();
        assert_eq!(len, 2);
        assert_eq!(
            inst,
            Instruction::new(
                Operation::Cmp,
                reg(Register::AL),
                SourceOperand::Immediate(Immediate::byte(9))
            )
        );
    }

    #[test]
    fn test_conditional_jumps() {
        let (inst, len) = decode_bytes(&[0x75, 0xF8]).unwrap();
        assert_eq!(len, 2);
        assert_eq!(inst, Instruction::jump(Operation::Jne, -8));

        for (low, op) in COND_JUMP_TABLE.iter().enumerate() {
            let (inst, _) = decode_bytes(&[0x70 | low as u8, 0x02]).unwrap();
            assert_eq!(inst.operation, *op);
            assert_eq!(inst.jump_offset(), Some(2));
        }
    }

    #[test]
    fn test_loop_family() {
        assert_eq!(decode_bytes(&[0xE2, 0xFC]).unwrap().0, Instruction::jump(Operation::Loop, -4));
        assert_eq!(decode_bytes(&[0xE1, 0x00]).unwrap().0.operation, Operation::Loopz);
        assert_eq!(decode_bytes(&[0xE0, 0x00]).unwrap().0.operation, Operation::Loopnz);
        assert_eq!(decode_bytes(&[0xE3, 0x00]).unwrap().0.operation, Operation::Jcxz);
    }

    #[test]
    fn test_empty_stream_is_end_of_stream() {
        let mem = Memory::new();
        let mut cursor = 0u16;
        assert_eq!(decode(&mem, &mut cursor, 0), Err(DecodeError::EndOfStream));
        assert_eq!(cursor, 0);
    }

    #[test]
    fn test_cursor_at_end_is_end_of_stream() {
        let mut mem = Memory::new();
        mem.load(&[0x89, 0xD9], 0x10).unwrap();
        let mut cursor = 0x10u16;
        decode(&mem, &mut cursor, 0x12).unwrap();
        assert_eq!(cursor, 0x12);
        assert_eq!(decode(&mem, &mut cursor, 0x12), Err(DecodeError::EndOfStream));
        assert_eq!(cursor, 0x12);
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(
            decode_bytes(&[0x0F]),
            Err(DecodeError::UnknownOpcode {
                opcode: 0x0F,
                address: 0
            })
        );
    }

    #[test]
    fn test_other_alu_operations_are_unknown() {
        // or al, al
        assert!(matches!(
            decode_bytes(&[0x08, 0xC0]),
            Err(DecodeError::UnknownOpcode { opcode: 0x08, .. })
        ));
        // and ax, 1 via the immediate group (reg field 100)
        assert!(matches!(
            decode_bytes(&[0x83, 0xE0, 0x01]),
            Err(DecodeError::UnknownOpcode { opcode: 0x83, .. })
        ));
        // xor al, 1
        assert!(matches!(
            decode_bytes(&[0x34, 0x01]),
            Err(DecodeError::UnknownOpcode { opcode: 0x34, .. })
        ));
    }

    #[test]
    fn test_truncated_instruction_reports_missing_bytes() {
        let mut mem = Memory::new();
        mem.load(&[0xB8, 0x05], 0).unwrap();
        let mut cursor = 0u16;
        assert_eq!(
            decode(&mem, &mut cursor, 2),
            Err(DecodeError::MissingBytes {
                address: 0,
                needed: 1
            })
        );
        assert_eq!(cursor, 0, "cursor must not move on error");

        // Displacement missing entirely
        assert_eq!(
            decode_bytes(&[0x89, 0x8C]),
            Err(DecodeError::MissingBytes {
                address: 0,
                needed: 2
            })
        );
    }

    #[test]
    fn test_stream_ending_at_top_of_memory() {
        let mut mem = Memory::new();
        mem.load(&[0x89, 0xD9], 0xFFFE).unwrap();
        let mut cursor = 0xFFFEu16;
        let inst = decode(&mem, &mut cursor, MEMORY_SIZE as u32).unwrap();
        assert_eq!(inst.operation, Operation::Mov);
        assert_eq!(cursor, 0x0000);
    }
}
