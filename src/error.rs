use crate::cpu::{
    decode::{Operand, Width},
    opcode::Mnemonic,
};

use thiserror::Error;

/// Errors raised while turning bytes into an [`crate::cpu::decode::Instruction`]. Decoding never
/// mutates state, so none of these leave the cpu half updated.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum DecodeError {
    /// No table entry exists for the op code.
    #[error("unknown {} op code {opcode:#04x}", table_name(.prefixed))]
    UnknownOpcode { opcode: u8, prefixed: bool },
    /// The op code is catalogued but the cpu does not support the mnemonic.
    #[error("op code {opcode:#04x} ({mnemonic}) is not implemented")]
    UnimplementedMnemonic {
        opcode: u8,
        prefixed: bool,
        mnemonic: Mnemonic,
    },
    /// The operand text in the table does not match the addressing mode grammar.
    #[error("unknown operand `{text}` for {mnemonic}")]
    UnknownOperand { mnemonic: Mnemonic, text: String },
}

/// Errors raised while executing a decoded instruction. They are detected before the first write
/// so a failed step leaves registers, flags and memory untouched.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ExecutionError {
    /// The mnemonic has no handler in the cpu.
    #[error("no handler for {mnemonic}")]
    UnhandledMnemonic { mnemonic: Mnemonic },
    /// The operand does not have the width the instruction requires.
    #[error("{mnemonic}: operand {operand} is not {expected}")]
    InvalidOperandWidth {
        mnemonic: Mnemonic,
        operand: Operand,
        expected: Width,
    },
    /// The operand has the wrong shape for its position, e.g. an immediate used as a
    /// destination, or is missing altogether.
    #[error("{mnemonic}: invalid operand {}", describe_operand(.operand))]
    InvalidOperand {
        mnemonic: Mnemonic,
        operand: Option<Operand>,
    },
}

/// Errors raised while loading an [`crate::cpu::opcode::OpcodeTable`] from JSON.
#[derive(Debug, Error)]
pub enum TableError {
    /// The document is not valid JSON or does not match the metadata format.
    #[error("invalid opcode table: {0}")]
    Json(#[from] serde_json::Error),
    /// A table key is not a `0x`-prefixed two digit hex byte.
    #[error("invalid op code key `{0}`")]
    InvalidKey(String),
    /// An entry declares a length outside of 1..=3 bytes.
    #[error("op code {key} declares invalid length {length}")]
    InvalidLength { key: String, length: u16 },
}

/// Error in a flags string such as `Z0H-`.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("invalid flags `{0}`, expected 4 characters over 0, 1, - and ZNHC")]
pub struct InvalidFlags(pub String);

/// Either half of a failed step.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Fault {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Execution(#[from] ExecutionError),
}

/// A failed [`crate::cpu::Cpu::step`], located by the program counter and the raw op code bytes
/// found there.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
#[error("step at {pc:#06x} [{}] failed: {fault}", opcode_bytes(.opcode))]
pub struct StepError {
    /// Program counter of the instruction which failed.
    pub pc: u16,
    /// Op code byte, preceded by the prefix byte for prefixed op codes.
    pub opcode: Vec<u8>,
    /// What went wrong.
    #[source]
    pub fault: Fault,
}

/// Names the op code table an op code was looked up in.
fn table_name(prefixed: &bool) -> &'static str {
    if *prefixed { "prefixed" } else { "primary" }
}

/// Formats an optional operand, which is absent when an instruction lacks a required operand.
fn describe_operand(operand: &Option<Operand>) -> String {
    match operand {
        Some(operand) => operand.to_string(),
        None => String::from("<none>"),
    }
}

/// Formats raw op code bytes as space separated hex.
fn opcode_bytes(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
