use crate::{
    cpu::{
        opcode::{FlagEffects, Mnemonic, OpcodeTable},
        registers::{Flags, Reg8, Reg16},
    },
    error::DecodeError,
    mem::Memory,
};

use std::fmt::Display;

/// Byte which selects the extended op code table for the byte that follows it.
pub const PREFIX_BYTE: u8 = 0xCB;

/// Width of a value moved by an instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Width {
    /// 8 bits.
    Byte,
    /// 16 bits.
    Word,
}

impl Display for Width {
    /// Writes a string representation of the [`Width`] to the formatter.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Width::Byte => f.write_str("8-bit"),
            Width::Word => f.write_str("16-bit"),
        }
    }
}

/// Adjustment applied to the register pair of an indirect operand after the memory access.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum IndirectStep {
    /// The pair is left alone.
    None,
    /// The pair is incremented, written `(HL+)`.
    Increment,
    /// The pair is decremented, written `(HL-)`.
    Decrement,
}

/// Offset into the high memory region at 0xFF00.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum HighOffset {
    /// Offset read from the instruction bytes, written `(a8)`.
    Immediate(u8),
    /// Offset held in the `C` register, written `(C)`.
    C,
}

/// Enumeration of the addressing modes an operand can be resolved to. Each operand is resolved
/// once when the instruction is decoded.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Operand {
    /// 8-bit register.
    Register(Reg8),
    /// 16-bit register.
    RegisterPair(Reg16),
    /// The byte in memory at the address held in the register pair.
    Indirect { pair: Reg16, step: IndirectStep },
    /// The byte in memory at 0xFF00 plus the offset.
    HighMemory(HighOffset),
    /// The byte in memory at the absolute address, written `(a16)`.
    Absolute(u16),
    /// Value read from the instruction bytes, or fixed by the op code table.
    Immediate { value: u16, width: Width },
    /// Signed displacement from the address of the next instruction, written `r8`.
    Relative(i8),
    /// The stack pointer plus a signed displacement, written `SP+r8`.
    StackRelative(i8),
}

impl Display for Operand {
    /// Writes the operand in assembly syntax.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operand::Register(reg) => f.write_fmt(format_args!("{}", reg)),
            Operand::RegisterPair(reg) => f.write_fmt(format_args!("{}", reg)),
            Operand::Indirect { pair, step } => match step {
                IndirectStep::None => f.write_fmt(format_args!("({})", pair)),
                IndirectStep::Increment => f.write_fmt(format_args!("({}+)", pair)),
                IndirectStep::Decrement => f.write_fmt(format_args!("({}-)", pair)),
            },
            Operand::HighMemory(HighOffset::C) => f.write_str("(C)"),
            Operand::HighMemory(HighOffset::Immediate(offset)) => {
                f.write_fmt(format_args!("(0xff00+{:#04x})", offset))
            }
            Operand::Absolute(address) => f.write_fmt(format_args!("({:#06x})", address)),
            Operand::Immediate {
                value,
                width: Width::Byte,
            } => f.write_fmt(format_args!("{:#04x}", value)),
            Operand::Immediate {
                value,
                width: Width::Word,
            } => f.write_fmt(format_args!("{:#06x}", value)),
            Operand::Relative(offset) => f.write_fmt(format_args!("{}", offset)),
            Operand::StackRelative(offset) => f.write_fmt(format_args!("SP{:+}", offset)),
        }
    }
}

/// Enumeration of the flag tests available to the conditional control flow instructions.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Condition {
    /// Zero flag not on.
    NZ,
    /// Zero flag on.
    Z,
    /// Carry flag not on.
    NC,
    /// Carry flag on.
    C,
}

impl Condition {
    /// Parses a condition token.
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "NZ" => Some(Self::NZ),
            "Z" => Some(Self::Z),
            "NC" => Some(Self::NC),
            "C" => Some(Self::C),
            _ => None,
        }
    }
    /// Evaluates the condition against the flags.
    pub fn holds(self, flags: Flags) -> bool {
        match self {
            Condition::NZ => !flags.z(),
            Condition::Z => flags.z(),
            Condition::NC => !flags.c(),
            Condition::C => flags.c(),
        }
    }
}

impl Display for Condition {
    /// Writes a string representation of the [`Condition`] to the formatter.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}", self))
    }
}

/// An instruction that is ready to be executed by the [`crate::cpu::Cpu`]. It is produced by a
/// single decode and consumed by a single step.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
    /// Address the instruction was fetched from.
    pub address: u16,
    /// Op code byte. For prefixed instructions this is the byte after the prefix.
    pub opcode: u8,
    /// Whether the op code was read from the extended table.
    pub prefixed: bool,
    /// Mnemonic which selects the handler.
    pub mnemonic: Mnemonic,
    /// Number of bytes that make up the instruction.
    pub length: u16,
    /// Flag test of a conditional control flow instruction.
    pub condition: Option<Condition>,
    /// First operand, or the target of a conditional control flow instruction.
    pub operand1: Option<Operand>,
    /// Second operand.
    pub operand2: Option<Operand>,
    /// Effect of the instruction on the flags.
    pub flags: FlagEffects,
}

impl Instruction {
    /// Returns the address of the instruction which follows this one in memory.
    pub fn next_address(&self) -> u16 {
        self.address.wrapping_add(self.length)
    }
    /// Returns the raw op code bytes, including the prefix.
    pub fn opcode_bytes(&self) -> Vec<u8> {
        if self.prefixed {
            vec![PREFIX_BYTE, self.opcode]
        } else {
            vec![self.opcode]
        }
    }
    /// Iterates over the operands which are present.
    pub fn operands(&self) -> impl Iterator<Item = &Operand> {
        [&self.operand1, &self.operand2].into_iter().flatten()
    }
}

impl Display for Instruction {
    /// Writes the instruction in assembly syntax, e.g. `JR NZ, -5`.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut parts: Vec<String> = Vec::with_capacity(3);
        if let Some(condition) = self.condition {
            parts.push(condition.to_string());
        }
        parts.extend(self.operands().map(Operand::to_string));

        if parts.is_empty() {
            f.write_fmt(format_args!("{}", self.mnemonic))
        } else {
            f.write_fmt(format_args!("{} {}", self.mnemonic, parts.join(", ")))
        }
    }
}

/// Reads the immediate bytes of an instruction in order.
struct ImmediateReader<'m> {
    /// Memory the instruction is read from.
    memory: &'m Memory,
    /// Address of the next unread immediate byte.
    cursor: u16,
}

impl ImmediateReader<'_> {
    /// Reads the next byte.
    fn u8(&mut self) -> u8 {
        let value = self.memory.read_u8(self.cursor);
        self.cursor = self.cursor.wrapping_add(1);
        value
    }
    /// Reads the next byte as a signed displacement.
    fn i8(&mut self) -> i8 {
        let value = self.memory.read_i8(self.cursor);
        self.cursor = self.cursor.wrapping_add(1);
        value
    }
    /// Reads the next two bytes as a little-endian word.
    fn u16(&mut self) -> u16 {
        let value = self.memory.read_u16(self.cursor);
        self.cursor = self.cursor.wrapping_add(2);
        value
    }
}

/// Transforms the op code at `pc` into an [`Instruction`]. If the byte at `pc` is the prefix
/// byte, the byte after it selects from the extended table and immediate bytes follow both.
/// Fails with [`DecodeError::UnimplementedMnemonic`] for op codes the cpu cannot execute.
pub fn decode(table: &OpcodeTable, memory: &Memory, pc: u16) -> Result<Instruction, DecodeError> {
    decode_entry(table, memory, pc, true)
}

/// Decodes the op code at `pc` for a listing. Unlike [`decode`] this accepts every catalogued op
/// code, including those the cpu cannot execute.
pub fn decode_listing(
    table: &OpcodeTable,
    memory: &Memory,
    pc: u16,
) -> Result<Instruction, DecodeError> {
    decode_entry(table, memory, pc, false)
}

/// Shared body of [`decode`] and [`decode_listing`].
fn decode_entry(
    table: &OpcodeTable,
    memory: &Memory,
    pc: u16,
    executable: bool,
) -> Result<Instruction, DecodeError> {
    let first = memory.read_u8(pc);
    let (opcode, prefixed) = if first == PREFIX_BYTE {
        (memory.read_u8(pc.wrapping_add(1)), true)
    } else {
        (first, false)
    };

    tracing::debug!(
        "decode {}op code {:#04x} at {:#06x}",
        if prefixed { "prefixed " } else { "" },
        opcode,
        pc
    );

    let metadata = if executable {
        table.lookup(opcode, prefixed)?
    } else {
        table.metadata(opcode, prefixed)?
    };
    let mnemonic = metadata.mnemonic;

    let mut reader = ImmediateReader {
        memory,
        cursor: pc.wrapping_add(if prefixed { 2 } else { 1 }),
    };

    let mut texts = [metadata.operand1.as_deref(), metadata.operand2.as_deref()];

    let condition = match texts[0] {
        Some(text) if mnemonic.is_conditional_branch() => match Condition::from_name(text) {
            Some(condition) => {
                texts = [texts[1], None];
                Some(condition)
            }
            None => None,
        },
        _ => None,
    };

    let operand1 = texts[0]
        .map(|text| parse_operand(mnemonic, text, &mut reader))
        .transpose()?;
    let operand2 = texts[1]
        .map(|text| parse_operand(mnemonic, text, &mut reader))
        .transpose()?;

    Ok(Instruction {
        address: pc,
        opcode,
        prefixed,
        mnemonic,
        length: metadata.length,
        condition,
        operand1,
        operand2,
        flags: metadata.flags,
    })
}

/// Resolves the text of an operand from the op code table into an [`Operand`], reading any
/// immediate bytes it refers to.
fn parse_operand(
    mnemonic: Mnemonic,
    text: &str,
    reader: &mut ImmediateReader<'_>,
) -> Result<Operand, DecodeError> {
    let unknown = || DecodeError::UnknownOperand {
        mnemonic,
        text: text.to_string(),
    };

    if let Some(reg) = Reg8::from_name(text) {
        return Ok(Operand::Register(reg));
    }
    if let Some(pair) = Reg16::from_name(text) {
        return Ok(Operand::RegisterPair(pair));
    }

    match text {
        "d8" | "a8" => {
            return Ok(Operand::Immediate {
                value: reader.u8().into(),
                width: Width::Byte,
            });
        }
        "d16" | "a16" => {
            return Ok(Operand::Immediate {
                value: reader.u16(),
                width: Width::Word,
            });
        }
        "r8" => return Ok(Operand::Relative(reader.i8())),
        "SP+r8" => return Ok(Operand::StackRelative(reader.i8())),
        _ => {}
    }

    if let Some(inner) = text.strip_prefix('(').and_then(|t| t.strip_suffix(')')) {
        return match inner {
            "C" => Ok(Operand::HighMemory(HighOffset::C)),
            "a8" | "d8" => Ok(Operand::HighMemory(HighOffset::Immediate(reader.u8()))),
            "a16" | "d16" => Ok(Operand::Absolute(reader.u16())),
            _ => {
                let (name, step) = match inner.as_bytes().last() {
                    Some(b'+') => (&inner[..inner.len() - 1], IndirectStep::Increment),
                    Some(b'-') => (&inner[..inner.len() - 1], IndirectStep::Decrement),
                    _ => (inner, IndirectStep::None),
                };

                match Reg16::from_name(name) {
                    Some(pair) if pair != Reg16::SP && pair != Reg16::AF => {
                        Ok(Operand::Indirect { pair, step })
                    }
                    _ => Err(unknown()),
                }
            }
        };
    }

    parse_literal(text)
        .map(|value| Operand::Immediate {
            value: value.into(),
            width: Width::Byte,
        })
        .ok_or_else(unknown)
}

/// Parses a literal baked into the op code table: bit indices (`7`), restart vectors (`38H`) or
/// `0x`-prefixed bytes.
fn parse_literal(text: &str) -> Option<u8> {
    let digits = text
        .strip_suffix('H')
        .or_else(|| text.strip_prefix("0x"))
        .unwrap_or(text);

    if digits.is_empty() || digits.len() > 2 {
        return None;
    }

    u8::from_str_radix(digits, 16).ok()
}

/// Decodes consecutive instructions without executing them, including op codes the cpu does not
/// support. The iteration ends after the first decode error, which is yielded.
pub struct Disassembly<'a> {
    /// Table used to decode the op codes.
    table: &'a OpcodeTable,
    /// Memory the instructions are read from.
    memory: &'a Memory,
    /// Address of the next instruction, or `None` once decoding failed.
    pc: Option<u16>,
}

impl<'a> Disassembly<'a> {
    /// Creates a new [`Disassembly`] starting at the given address.
    pub fn new(table: &'a OpcodeTable, memory: &'a Memory, start: u16) -> Self {
        Self {
            table,
            memory,
            pc: Some(start),
        }
    }
}

impl Iterator for Disassembly<'_> {
    type Item = Result<Instruction, DecodeError>;

    fn next(&mut self) -> Option<Self::Item> {
        let pc = self.pc?;

        let result = decode_listing(self.table, self.memory, pc);
        self.pc = result.as_ref().ok().map(Instruction::next_address);

        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Writes the bytes at 0x0000 and decodes the first instruction.
    fn decode_bytes(bytes: &[u8]) -> Result<Instruction, DecodeError> {
        let mut memory = Memory::new();
        memory.write_block(0x0000, bytes);

        decode(&OpcodeTable::builtin(), &memory, 0x0000)
    }

    #[test]
    fn test_decode_nop() {
        let instruction = decode_bytes(&[0x00]).expect("valid op code");
        assert_eq!(Mnemonic::NOP, instruction.mnemonic);
        assert_eq!(1, instruction.length);
        assert_eq!(None, instruction.operand1);
        assert_eq!(None, instruction.operand2);
        assert_eq!("NOP", instruction.to_string());
    }

    #[test]
    fn test_decode_ld_u16_bc() {
        {
            let instruction = decode_bytes(&[0x01, 0x01, 0x00]).expect("valid op code");
            assert_eq!(3, instruction.length);
            assert_eq!(Some(Operand::RegisterPair(Reg16::BC)), instruction.operand1);
            assert_eq!(
                Some(Operand::Immediate {
                    value: 1,
                    width: Width::Word
                }),
                instruction.operand2
            );
        }
        {
            let instruction = decode_bytes(&[0x01, 0x00, 0x01]).expect("valid op code");
            assert_eq!(
                Some(Operand::Immediate {
                    value: 256,
                    width: Width::Word
                }),
                instruction.operand2
            );
        }
    }

    #[test]
    fn test_decode_ld_u8_b() {
        let instruction = decode_bytes(&[0x06, 0x42]).expect("valid op code");
        assert_eq!(Mnemonic::LD, instruction.mnemonic);
        assert_eq!(2, instruction.length);
        assert_eq!(Some(Operand::Register(Reg8::B)), instruction.operand1);
        assert_eq!(
            Some(Operand::Immediate {
                value: 0x42,
                width: Width::Byte
            }),
            instruction.operand2
        );
        assert_eq!("LD B, 0x42", instruction.to_string());
    }

    #[test]
    fn test_decode_indirect_steps() {
        let instruction = decode_bytes(&[0x22]).expect("valid op code");
        assert_eq!(
            Some(Operand::Indirect {
                pair: Reg16::HL,
                step: IndirectStep::Increment
            }),
            instruction.operand1
        );
        assert_eq!("LD (HL+), A", instruction.to_string());

        let instruction = decode_bytes(&[0x3A]).expect("valid op code");
        assert_eq!(
            Some(Operand::Indirect {
                pair: Reg16::HL,
                step: IndirectStep::Decrement
            }),
            instruction.operand2
        );

        let instruction = decode_bytes(&[0x0A]).expect("valid op code");
        assert_eq!(
            Some(Operand::Indirect {
                pair: Reg16::BC,
                step: IndirectStep::None
            }),
            instruction.operand2
        );
    }

    #[test]
    fn test_decode_jr_nz() {
        let instruction = decode_bytes(&[0x20, 0xFB]).expect("valid op code");
        assert_eq!(Mnemonic::JR, instruction.mnemonic);
        assert_eq!(Some(Condition::NZ), instruction.condition);
        assert_eq!(Some(Operand::Relative(-5)), instruction.operand1);
        assert_eq!(None, instruction.operand2);
        assert_eq!("JR NZ, -5", instruction.to_string());
    }

    #[test]
    fn test_decode_conditions_are_not_registers() {
        let instruction = decode_bytes(&[0xD8]).expect("valid op code");
        assert_eq!(Mnemonic::RET, instruction.mnemonic);
        assert_eq!(Some(Condition::C), instruction.condition);
        assert_eq!(None, instruction.operand1);

        let instruction = decode_bytes(&[0xDA, 0x34, 0x12]).expect("valid op code");
        assert_eq!(Some(Condition::C), instruction.condition);
        assert_eq!(
            Some(Operand::Immediate {
                value: 0x1234,
                width: Width::Word
            }),
            instruction.operand1
        );

        // C in an arithmetic instruction is still the register.
        let instruction = decode_bytes(&[0xB9]).expect("valid op code");
        assert_eq!(None, instruction.condition);
        assert_eq!(Some(Operand::Register(Reg8::C)), instruction.operand1);
    }

    #[test]
    fn test_decode_jp_a16() {
        let instruction = decode_bytes(&[0xC3, 0x34, 0x12]).expect("valid op code");
        assert_eq!(Mnemonic::JP, instruction.mnemonic);
        assert_eq!(3, instruction.length);
        assert_eq!(None, instruction.condition);
        assert_eq!(
            Some(Operand::Immediate {
                value: 0x1234,
                width: Width::Word
            }),
            instruction.operand1
        );
        assert_eq!("JP 0x1234", instruction.to_string());
    }

    #[test]
    fn test_decode_high_memory() {
        let instruction = decode_bytes(&[0xE0, 0x44]).expect("valid op code");
        assert_eq!(Mnemonic::LDH, instruction.mnemonic);
        assert_eq!(
            Some(Operand::HighMemory(HighOffset::Immediate(0x44))),
            instruction.operand1
        );

        let instruction = decode_bytes(&[0xF2]).expect("valid op code");
        assert_eq!(
            Some(Operand::HighMemory(HighOffset::C)),
            instruction.operand2
        );
    }

    #[test]
    fn test_decode_absolute_and_stack_relative() {
        let instruction = decode_bytes(&[0x08, 0x00, 0xC1]).expect("valid op code");
        assert_eq!(Some(Operand::Absolute(0xC100)), instruction.operand1);
        assert_eq!(Some(Operand::RegisterPair(Reg16::SP)), instruction.operand2);

        let instruction = decode_bytes(&[0xF8, 0xFE]).expect("valid op code");
        assert_eq!(Some(Operand::StackRelative(-2)), instruction.operand2);
        assert_eq!("LD HL, SP-2", instruction.to_string());
    }

    #[test]
    fn test_decode_literals() {
        let instruction = decode_bytes(&[0xFF]).expect("valid op code");
        assert_eq!(Mnemonic::RST, instruction.mnemonic);
        assert_eq!(
            Some(Operand::Immediate {
                value: 0x38,
                width: Width::Byte
            }),
            instruction.operand1
        );
    }

    #[test]
    fn test_decode_prefixed() {
        let instruction = decode_bytes(&[0xCB, 0x87]).expect("valid op code");
        assert!(instruction.prefixed);
        assert_eq!(0x87, instruction.opcode);
        assert_eq!(Mnemonic::RES, instruction.mnemonic);
        assert_eq!(2, instruction.length);
        assert_eq!(
            Some(Operand::Immediate {
                value: 0,
                width: Width::Byte
            }),
            instruction.operand1
        );
        assert_eq!(Some(Operand::Register(Reg8::A)), instruction.operand2);
        assert_eq!(vec![0xCB, 0x87], instruction.opcode_bytes());
        assert_eq!("RES 0x00, A", instruction.to_string());
    }

    #[test]
    fn test_decode_unknown_opcode() {
        assert_eq!(
            Err(DecodeError::UnknownOpcode {
                opcode: 0xD3,
                prefixed: false
            }),
            decode_bytes(&[0xD3])
        );
    }

    #[test]
    fn test_decode_halt_is_unimplemented() {
        assert!(matches!(
            decode_bytes(&[0x76]),
            Err(DecodeError::UnimplementedMnemonic {
                mnemonic: Mnemonic::HALT,
                ..
            })
        ));
    }

    #[test]
    fn test_decode_unknown_operand() {
        let json = r#"{
            "unprefixed": {"0x00": {"mnemonic": "LD", "length": 1, "operand1": "(SP)", "operand2": "A", "flags": "----"}},
            "cbprefixed": {}
        }"#;
        let table = OpcodeTable::from_json(json).expect("valid table");
        let memory = Memory::new();

        assert_eq!(
            Err(DecodeError::UnknownOperand {
                mnemonic: Mnemonic::LD,
                text: String::from("(SP)")
            }),
            decode(&table, &memory, 0x0000)
        );
    }

    #[test]
    fn test_decode_every_table_entry() {
        let table = OpcodeTable::builtin();
        let mut memory = Memory::new();

        for prefixed in [false, true] {
            for (opcode, metadata) in table.entries(prefixed) {
                if metadata.mnemonic == Mnemonic::PREFIX {
                    continue;
                }

                if prefixed {
                    memory.write_block(0x0000, &[PREFIX_BYTE, opcode]);
                } else {
                    memory.write_block(0x0000, &[opcode, 0x00]);
                }

                let result = decode(&table, &memory, 0x0000);
                if metadata.mnemonic.is_supported() {
                    let instruction = result.expect("valid op code");
                    assert_eq!(metadata.length, instruction.length);
                } else {
                    assert!(result.is_err());
                }
            }
        }
    }

    #[test]
    fn test_disassembly() {
        let mut memory = Memory::new();
        memory.write_block(0x0100, &[0x00, 0x3E, 0x10, 0xC3, 0x50, 0x01, 0xD3]);

        let table = OpcodeTable::builtin();
        let listing: Vec<_> = Disassembly::new(&table, &memory, 0x0100).collect();

        assert_eq!(4, listing.len());
        assert_eq!("NOP", listing[0].as_ref().expect("decoded").to_string());
        assert_eq!("LD A, 0x10", listing[1].as_ref().expect("decoded").to_string());
        assert_eq!(
            0x0103,
            listing[2].as_ref().expect("decoded").address
        );
        assert!(listing[3].is_err());
    }

    #[test]
    fn test_disassembly_lists_halt() {
        let mut memory = Memory::new();
        memory.write_block(0x0150, &[0x00, 0x76, 0x18, 0xFC]);

        let table = OpcodeTable::builtin();
        let listing: Vec<_> = Disassembly::new(&table, &memory, 0x0150)
            .take(3)
            .map(|result| result.expect("decoded").to_string())
            .collect();

        assert_eq!(vec!["NOP", "HALT", "JR -4"], listing);
        assert!(decode(&table, &memory, 0x0151).is_err());
    }
}
