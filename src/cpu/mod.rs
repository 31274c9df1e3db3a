pub mod alu;
pub mod decode;
pub mod opcode;
pub mod registers;

use crate::{
    cpu::{
        alu::{FlagUpdate, Shift},
        decode::{Disassembly, HighOffset, IndirectStep, Instruction, Operand, PREFIX_BYTE, Width},
        opcode::{FlagEffects, Mnemonic, OpcodeTable},
        registers::{Flags, Reg8, Reg16, Registers},
    },
    error::{DecodeError, ExecutionError, StepError},
    mem::{HIGH_MEMORY_BASE, Memory},
};

use bounded_vec_deque::BoundedVecDeque;
use std::sync::Arc;

/// Default value for the maximum number of instructions stored in the instruction execution
/// history of the [`Cpu`].
const DEFAULT_CPU_MAX_HISTORY: usize = 250;

/// Where an 8-bit operand lives once its address has been resolved.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Place {
    /// An 8-bit register.
    Register(Reg8),
    /// A byte in memory.
    Memory(u16),
}

/// How the program counter moves after an instruction.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Flow {
    /// Fall through to the next instruction in memory.
    Continue,
    /// Continue at the address.
    Jump(u16),
}

/// Result of a successful instruction handler.
#[derive(Clone, Copy, Debug)]
struct Outcome {
    /// Where execution continues.
    flow: Flow,
    /// Flags computed by the handler.
    flags: FlagUpdate,
}

impl Outcome {
    /// Falls through without computing any flag.
    fn next() -> Self {
        Self {
            flow: Flow::Continue,
            flags: FlagUpdate::none(),
        }
    }
    /// Falls through with the given computed flags.
    fn flags(flags: FlagUpdate) -> Self {
        Self {
            flow: Flow::Continue,
            flags,
        }
    }
    /// Continues at the address.
    fn jump(address: u16) -> Self {
        Self {
            flow: Flow::Jump(address),
            flags: FlagUpdate::none(),
        }
    }
}

/// Represents the central processing unit of the Game Boy system. It owns the registers, the
/// interrupt master enable flag and the memory bus, and is responsible for reading, decoding and
/// executing instructions one step at a time.
#[derive(Debug)]
pub struct Cpu {
    /// Registers read and written by the instructions.
    registers: Registers,
    /// Interrupt master enable flag.
    ime: bool,
    /// Memory bus holding the program and all data.
    memory: Memory,
    /// Op code table used by the decoder.
    table: Arc<OpcodeTable>,
    /// Tracks the history of [`Instruction`]s that were executed by the cpu, most recent first.
    history: BoundedVecDeque<Instruction>,
}

impl Default for Cpu {
    /// Creates a default [`Cpu`] using the built-in op code table and a max history size of 250.
    fn default() -> Self {
        Self::with_max_history(DEFAULT_CPU_MAX_HISTORY)
    }
}

impl Cpu {
    /// Creates a new default [`Cpu`].
    pub fn new() -> Self {
        Self::default()
    }
    /// Creates a new [`Cpu`] with the given max instruction history length.
    pub fn with_max_history(max: usize) -> Self {
        Self::with_table(OpcodeTable::builtin(), max)
    }
    /// Creates a new [`Cpu`] which decodes with the given op code table.
    pub fn with_table(table: Arc<OpcodeTable>, max_history: usize) -> Self {
        Self {
            registers: Registers::default(),
            ime: false,
            memory: Memory::new(),
            table,
            history: BoundedVecDeque::with_capacity(max_history, max_history),
        }
    }
    /// Copies the program image into memory starting at address 0 and points the program counter
    /// at the entry address.
    pub fn load(&mut self, image: &[u8], entry: u16) {
        tracing::debug!(
            "load {} byte image with entry point {:#06x}",
            image.len(),
            entry
        );

        self.memory.write_block(0x0000, image);
        self.registers.pc = entry;
    }
    /// Returns the registers.
    pub fn registers(&self) -> &Registers {
        &self.registers
    }
    /// Returns the registers for modification by a test harness or debugger.
    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }
    /// Returns the memory bus.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }
    /// Returns the memory bus for external components which write their address ranges.
    pub fn memory_mut(&mut self) -> &mut Memory {
        &mut self.memory
    }
    /// Returns the state of the interrupt master enable flag.
    pub fn ime(&self) -> bool {
        self.ime
    }
    /// Returns the op code table used by the decoder.
    pub fn table(&self) -> &OpcodeTable {
        &self.table
    }
    /// Iterates over the recently executed instructions, most recent first.
    pub fn history(&self) -> impl Iterator<Item = &Instruction> {
        self.history.iter()
    }
    /// Decodes the instruction at the program counter without executing it.
    pub fn decode_next(&self) -> Result<Instruction, DecodeError> {
        decode::decode(&self.table, &self.memory, self.registers.pc)
    }
    /// Returns a [`Disassembly`] of the memory starting at the given address.
    pub fn disassemble(&self, start: u16) -> Disassembly<'_> {
        Disassembly::new(&self.table, &self.memory, start)
    }
    /// Reads, decodes and executes the next instruction based on the current program counter,
    /// returning the executed instruction. A failed step leaves the cpu state untouched.
    pub fn step(&mut self) -> Result<Instruction, StepError> {
        let pc = self.registers.pc;

        let instruction = self.decode_next().map_err(|e| StepError {
            pc,
            opcode: self.raw_opcode(pc),
            fault: e.into(),
        })?;

        self.execute(&instruction).map_err(|e| StepError {
            pc,
            opcode: instruction.opcode_bytes(),
            fault: e.into(),
        })?;

        self.history.push_front(instruction.clone());

        Ok(instruction)
    }
    /// Returns the op code bytes at the address, including the byte after a prefix.
    fn raw_opcode(&self, pc: u16) -> Vec<u8> {
        let first = self.memory.read_u8(pc);
        if first == PREFIX_BYTE {
            vec![first, self.memory.read_u8(pc.wrapping_add(1))]
        } else {
            vec![first]
        }
    }
    /// Executes the given [`Instruction`]: runs its handler, applies the post access adjustment of
    /// `(HL+)` and `(HL-)` operands, commits the flags and moves the program counter.
    fn execute(&mut self, instruction: &Instruction) -> Result<(), ExecutionError> {
        tracing::debug!("execute instruction '{}'", instruction);

        let outcome = match instruction.mnemonic {
            Mnemonic::NOP => Outcome::next(),
            Mnemonic::STOP => {
                tracing::debug!("ignore stop instruction");
                Outcome::next()
            }
            Mnemonic::LD | Mnemonic::LDH => self.ld(instruction)?,
            Mnemonic::INC => self.inc_dec(instruction, true)?,
            Mnemonic::DEC => self.inc_dec(instruction, false)?,
            Mnemonic::ADD => self.add(instruction)?,
            Mnemonic::ADC => self.accumulate(instruction, true, alu::add)?,
            Mnemonic::SUB => self.accumulate(instruction, true, |a, b, _| alu::sub(a, b, false))?,
            Mnemonic::SBC => self.accumulate(instruction, true, alu::sub)?,
            Mnemonic::AND => self.accumulate(instruction, true, |a, b, _| alu::and(a, b))?,
            Mnemonic::XOR => self.accumulate(instruction, true, |a, b, _| alu::xor(a, b))?,
            Mnemonic::OR => self.accumulate(instruction, true, |a, b, _| alu::or(a, b))?,
            Mnemonic::CP => self.accumulate(instruction, false, |a, b, _| alu::sub(a, b, false))?,
            Mnemonic::DAA => {
                let flags = self.registers.flags();
                let (result, update) =
                    alu::daa(self.registers.get(Reg8::A), flags.n(), flags.h(), flags.c());

                self.registers.set(Reg8::A, result);
                Outcome::flags(update)
            }
            Mnemonic::CPL => {
                self.registers.set(Reg8::A, !self.registers.get(Reg8::A));
                Outcome::next()
            }
            Mnemonic::SCF => Outcome::next(),
            Mnemonic::CCF => Outcome::flags(FlagUpdate::none().c(!self.registers.flags().c())),
            Mnemonic::RLCA => self.rotate_accumulator(Shift::Rlc),
            Mnemonic::RRCA => self.rotate_accumulator(Shift::Rrc),
            Mnemonic::RLA => self.rotate_accumulator(Shift::Rl),
            Mnemonic::RRA => self.rotate_accumulator(Shift::Rr),
            Mnemonic::RLC => self.shift(instruction, Shift::Rlc)?,
            Mnemonic::RRC => self.shift(instruction, Shift::Rrc)?,
            Mnemonic::RL => self.shift(instruction, Shift::Rl)?,
            Mnemonic::RR => self.shift(instruction, Shift::Rr)?,
            Mnemonic::SLA => self.shift(instruction, Shift::Sla)?,
            Mnemonic::SRA => self.shift(instruction, Shift::Sra)?,
            Mnemonic::SRL => self.shift(instruction, Shift::Srl)?,
            Mnemonic::SWAP => {
                let target = required(instruction, instruction.operand1)?;
                let place = self.place_u8(instruction, target)?;
                let (result, update) = alu::swap(self.load_place(place));

                self.store(place, result);
                Outcome::flags(update)
            }
            Mnemonic::BIT => {
                let index = bit_index(instruction)?;
                let source = required(instruction, instruction.operand2)?;
                let value = self.read_u8(instruction, source)?;

                Outcome::flags(alu::bit(index, value))
            }
            Mnemonic::RES => self.write_bit(instruction, false)?,
            Mnemonic::SET => self.write_bit(instruction, true)?,
            Mnemonic::JP => self.jp(instruction)?,
            Mnemonic::JR => self.jr(instruction)?,
            Mnemonic::CALL => self.call(instruction)?,
            Mnemonic::RET => {
                if self.condition_holds(instruction) {
                    Outcome::jump(self.pop())
                } else {
                    Outcome::next()
                }
            }
            Mnemonic::RETI => {
                self.ime = true;
                Outcome::jump(self.pop())
            }
            Mnemonic::RST => self.rst(instruction)?,
            Mnemonic::PUSH => {
                let pair = stack_pair(instruction)?;
                self.push(self.registers.pair(pair));
                Outcome::next()
            }
            Mnemonic::POP => {
                let pair = stack_pair(instruction)?;
                let value = self.pop();
                self.registers.set_pair(pair, value);

                if pair == Reg16::AF {
                    let flags = self.registers.flags();
                    Outcome::flags(FlagUpdate::all(flags.z(), flags.n(), flags.h(), flags.c()))
                } else {
                    Outcome::next()
                }
            }
            Mnemonic::DI => {
                self.ime = false;
                Outcome::next()
            }
            Mnemonic::EI => {
                self.ime = true;
                Outcome::next()
            }
            Mnemonic::HALT | Mnemonic::PREFIX => {
                return Err(ExecutionError::UnhandledMnemonic {
                    mnemonic: instruction.mnemonic,
                });
            }
        };

        self.adjust_indirect_pairs(instruction);
        self.commit_flags(instruction.flags, outcome.flags);

        self.registers.pc = match outcome.flow {
            Flow::Continue => instruction.next_address(),
            Flow::Jump(address) => address,
        };

        Ok(())
    }
    /// `LD` and `LDH`: copies the source operand into the destination operand.
    fn ld(&mut self, instruction: &Instruction) -> Result<Outcome, ExecutionError> {
        let dst = required(instruction, instruction.operand1)?;
        let src = required(instruction, instruction.operand2)?;

        match (dst, src) {
            (Operand::RegisterPair(pair), Operand::StackRelative(offset)) => {
                let (value, update) = alu::add_signed(self.registers.sp, offset);
                self.registers.set_pair(pair, value);

                Ok(Outcome::flags(update))
            }
            (Operand::RegisterPair(pair), _) => {
                let value = self.read_u16(instruction, src)?;
                self.registers.set_pair(pair, value);

                Ok(Outcome::next())
            }
            (Operand::Absolute(address), Operand::RegisterPair(pair)) => {
                self.memory.write_u16(address, self.registers.pair(pair));

                Ok(Outcome::next())
            }
            _ => {
                let value = self.read_u8(instruction, src)?;
                let place = self.place_u8(instruction, dst)?;
                self.store(place, value);

                Ok(Outcome::next())
            }
        }
    }
    /// `INC` and `DEC`. Register pairs wrap around without touching the flags.
    fn inc_dec(
        &mut self,
        instruction: &Instruction,
        increment: bool,
    ) -> Result<Outcome, ExecutionError> {
        let target = required(instruction, instruction.operand1)?;

        if let Operand::RegisterPair(pair) = target {
            let value = self.registers.pair(pair);
            let result = if increment {
                value.wrapping_add(1)
            } else {
                value.wrapping_sub(1)
            };
            self.registers.set_pair(pair, result);

            return Ok(Outcome::next());
        }

        let place = self.place_u8(instruction, target)?;
        let value = self.load_place(place);
        let (result, update) = if increment {
            alu::inc(value)
        } else {
            alu::dec(value)
        };
        self.store(place, result);

        Ok(Outcome::flags(update))
    }
    /// `ADD` in its accumulator, `HL, rr` and `SP, r8` forms.
    fn add(&mut self, instruction: &Instruction) -> Result<Outcome, ExecutionError> {
        match (instruction.operand1, instruction.operand2) {
            (Some(Operand::RegisterPair(Reg16::SP)), Some(Operand::Relative(offset))) => {
                let (value, update) = alu::add_signed(self.registers.sp, offset);
                self.registers.sp = value;

                Ok(Outcome::flags(update))
            }
            (Some(Operand::RegisterPair(pair)), Some(src)) => {
                let value = self.read_u16(instruction, src)?;
                let (result, update) = alu::add_u16(self.registers.pair(pair), value);
                self.registers.set_pair(pair, result);

                Ok(Outcome::flags(update))
            }
            _ => self.accumulate(instruction, true, |a, b, _| alu::add(a, b, false)),
        }
    }
    /// Applies an 8-bit operation to the accumulator and the source operand, storing the result
    /// back into the accumulator unless the operation only compares.
    fn accumulate(
        &mut self,
        instruction: &Instruction,
        store: bool,
        operation: impl Fn(u8, u8, bool) -> (u8, FlagUpdate),
    ) -> Result<Outcome, ExecutionError> {
        let source = match (instruction.operand1, instruction.operand2) {
            (Some(Operand::Register(Reg8::A)), Some(source)) => source,
            (Some(source), None) => source,
            (operand, _) => {
                return Err(ExecutionError::InvalidOperand {
                    mnemonic: instruction.mnemonic,
                    operand,
                });
            }
        };

        let value = self.read_u8(instruction, source)?;
        let (result, update) = operation(
            self.registers.get(Reg8::A),
            value,
            self.registers.flags().c(),
        );

        if store {
            self.registers.set(Reg8::A, result);
        }

        Ok(Outcome::flags(update))
    }
    /// `RLCA`, `RRCA`, `RLA` and `RRA`. Unlike the prefixed forms they do not compute the zero
    /// flag.
    fn rotate_accumulator(&mut self, kind: Shift) -> Outcome {
        let (result, carry) = alu::shift(
            kind,
            self.registers.get(Reg8::A),
            self.registers.flags().c(),
        );
        self.registers.set(Reg8::A, result);

        Outcome::flags(FlagUpdate::none().c(carry))
    }
    /// The prefixed shifts and rotates of a register or `(HL)`.
    fn shift(&mut self, instruction: &Instruction, kind: Shift) -> Result<Outcome, ExecutionError> {
        let target = required(instruction, instruction.operand1)?;
        let place = self.place_u8(instruction, target)?;
        let value = self.load_place(place);
        let (result, carry) = alu::shift(kind, value, self.registers.flags().c());
        self.store(place, result);

        Ok(Outcome::flags(FlagUpdate::all(result == 0, false, false, carry)))
    }
    /// `RES` and `SET`: clears or sets one bit of a register or `(HL)`.
    fn write_bit(
        &mut self,
        instruction: &Instruction,
        on: bool,
    ) -> Result<Outcome, ExecutionError> {
        let index = bit_index(instruction)?;
        let place = self.place_u8(instruction, required(instruction, instruction.operand2)?)?;

        let value = self.load_place(place);
        let result = if on {
            value | (1 << index)
        } else {
            value & !(1 << index)
        };
        self.store(place, result);

        Ok(Outcome::next())
    }
    /// `JP`, to an absolute address or to the address held in `HL`.
    fn jp(&mut self, instruction: &Instruction) -> Result<Outcome, ExecutionError> {
        let target = match required(instruction, instruction.operand1)? {
            Operand::Immediate {
                value,
                width: Width::Word,
            } => value,
            Operand::RegisterPair(Reg16::HL) => self.registers.pair(Reg16::HL),
            operand => return Err(invalid(instruction, operand)),
        };

        Ok(self.branch(instruction, target))
    }
    /// `JR`: jumps relative to the address of the next instruction.
    fn jr(&mut self, instruction: &Instruction) -> Result<Outcome, ExecutionError> {
        let offset = match required(instruction, instruction.operand1)? {
            Operand::Relative(offset) => offset,
            operand => return Err(invalid(instruction, operand)),
        };

        let target = instruction.next_address().wrapping_add_signed(offset.into());

        Ok(self.branch(instruction, target))
    }
    /// `CALL`: pushes the address of the next instruction and jumps.
    fn call(&mut self, instruction: &Instruction) -> Result<Outcome, ExecutionError> {
        let target = match required(instruction, instruction.operand1)? {
            Operand::Immediate {
                value,
                width: Width::Word,
            } => value,
            operand => return Err(invalid(instruction, operand)),
        };

        if !self.condition_holds(instruction) {
            return Ok(Outcome::next());
        }

        self.push(instruction.next_address());

        Ok(Outcome::jump(target))
    }
    /// `RST`: calls one of the fixed restart vectors.
    fn rst(&mut self, instruction: &Instruction) -> Result<Outcome, ExecutionError> {
        let vector = match required(instruction, instruction.operand1)? {
            Operand::Immediate {
                value,
                width: Width::Byte,
            } => value,
            operand => return Err(invalid(instruction, operand)),
        };

        self.push(instruction.next_address());

        Ok(Outcome::jump(vector))
    }
    /// Jumps to the target if the condition of the instruction holds, otherwise falls through.
    fn branch(&self, instruction: &Instruction, target: u16) -> Outcome {
        if self.condition_holds(instruction) {
            Outcome::jump(target)
        } else {
            Outcome::next()
        }
    }
    /// Evaluates the branch condition of the instruction. Unconditional instructions always hold.
    fn condition_holds(&self, instruction: &Instruction) -> bool {
        instruction
            .condition
            .is_none_or(|condition| condition.holds(self.registers.flags()))
    }
    /// Pushes a 16-bit value onto the stack, low byte at the lower address.
    fn push(&mut self, value: u16) {
        self.registers.sp = self.registers.sp.wrapping_sub(2);
        self.memory.write_u16(self.registers.sp, value);
    }
    /// Pops a 16-bit value off the stack.
    fn pop(&mut self) -> u16 {
        let value = self.memory.read_u16(self.registers.sp);
        self.registers.sp = self.registers.sp.wrapping_add(2);
        value
    }
    /// Returns the memory address an operand refers to, if it refers to memory.
    fn address_of(&self, operand: Operand) -> Option<u16> {
        match operand {
            Operand::Indirect { pair, .. } => Some(self.registers.pair(pair)),
            Operand::HighMemory(HighOffset::C) => {
                Some(HIGH_MEMORY_BASE + self.registers.get(Reg8::C) as u16)
            }
            Operand::HighMemory(HighOffset::Immediate(offset)) => {
                Some(HIGH_MEMORY_BASE + offset as u16)
            }
            Operand::Absolute(address) => Some(address),
            _ => None,
        }
    }
    /// Resolves an operand which is written with an 8-bit value.
    fn place_u8(
        &self,
        instruction: &Instruction,
        operand: Operand,
    ) -> Result<Place, ExecutionError> {
        match operand {
            Operand::Register(reg) => Ok(Place::Register(reg)),
            Operand::RegisterPair(_) | Operand::StackRelative(_) => {
                Err(invalid_width(instruction, operand, Width::Byte))
            }
            _ => self
                .address_of(operand)
                .map(Place::Memory)
                .ok_or_else(|| invalid(instruction, operand)),
        }
    }
    /// Reads the 8-bit value of an operand.
    fn read_u8(&self, instruction: &Instruction, operand: Operand) -> Result<u8, ExecutionError> {
        match operand {
            Operand::Immediate {
                value,
                width: Width::Byte,
            } => Ok(value as u8),
            Operand::Immediate {
                width: Width::Word, ..
            } => Err(invalid_width(instruction, operand, Width::Byte)),
            _ => self.place_u8(instruction, operand).map(|place| self.load_place(place)),
        }
    }
    /// Reads the 16-bit value of an operand.
    fn read_u16(&self, instruction: &Instruction, operand: Operand) -> Result<u16, ExecutionError> {
        match operand {
            Operand::RegisterPair(pair) => Ok(self.registers.pair(pair)),
            Operand::Immediate {
                value,
                width: Width::Word,
            } => Ok(value),
            Operand::Relative(_) | Operand::StackRelative(_) => Err(invalid(instruction, operand)),
            _ => Err(invalid_width(instruction, operand, Width::Word)),
        }
    }
    /// Reads the byte at a resolved place.
    fn load_place(&self, place: Place) -> u8 {
        match place {
            Place::Register(reg) => self.registers.get(reg),
            Place::Memory(address) => self.memory.read_u8(address),
        }
    }
    /// Writes the byte to a resolved place.
    fn store(&mut self, place: Place, value: u8) {
        match place {
            Place::Register(reg) => self.registers.set(reg, value),
            Place::Memory(address) => self.memory.write_u8(address, value),
        }
    }
    /// Increments or decrements the pair of every `(HL+)` and `(HL-)` operand after the access.
    fn adjust_indirect_pairs(&mut self, instruction: &Instruction) {
        for operand in instruction.operands() {
            if let Operand::Indirect { pair, step } = *operand {
                let value = self.registers.pair(pair);

                match step {
                    IndirectStep::None => {}
                    IndirectStep::Increment => self.registers.set_pair(pair, value.wrapping_add(1)),
                    IndirectStep::Decrement => self.registers.set_pair(pair, value.wrapping_sub(1)),
                }
            }
        }
    }
    /// Writes the flags of an instruction: constants from the op code table first, then the values
    /// computed by the handler. Unaffected flags keep their value.
    fn commit_flags(&mut self, effects: FlagEffects, update: FlagUpdate) {
        let current = self.registers.flags();

        let mut flags = Flags::new();
        flags.set_z(effects.z.resolve(update.z, current.z()));
        flags.set_n(effects.n.resolve(update.n, current.n()));
        flags.set_h(effects.h.resolve(update.h, current.h()));
        flags.set_c(effects.c.resolve(update.c, current.c()));

        self.registers.set_flags(flags);
    }
}

/// Returns the operand, or an error naming the instruction if it is missing.
fn required(
    instruction: &Instruction,
    operand: Option<Operand>,
) -> Result<Operand, ExecutionError> {
    operand.ok_or(ExecutionError::InvalidOperand {
        mnemonic: instruction.mnemonic,
        operand: None,
    })
}

/// Error for an operand with the wrong shape.
fn invalid(instruction: &Instruction, operand: Operand) -> ExecutionError {
    ExecutionError::InvalidOperand {
        mnemonic: instruction.mnemonic,
        operand: Some(operand),
    }
}

/// Error for an operand with the wrong width.
fn invalid_width(instruction: &Instruction, operand: Operand, expected: Width) -> ExecutionError {
    ExecutionError::InvalidOperandWidth {
        mnemonic: instruction.mnemonic,
        operand,
        expected,
    }
}

/// Returns the bit index, the first operand of `BIT`, `RES` and `SET`.
fn bit_index(instruction: &Instruction) -> Result<u8, ExecutionError> {
    match required(instruction, instruction.operand1)? {
        Operand::Immediate {
            value,
            width: Width::Byte,
        } if value < 8 => Ok(value as u8),
        operand => Err(invalid(instruction, operand)),
    }
}

/// Returns the register pair of `PUSH` and `POP`.
fn stack_pair(instruction: &Instruction) -> Result<Reg16, ExecutionError> {
    match required(instruction, instruction.operand1)? {
        Operand::RegisterPair(pair) if pair != Reg16::SP => Ok(pair),
        operand => Err(invalid(instruction, operand)),
    }
}
