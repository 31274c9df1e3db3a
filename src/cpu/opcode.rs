use crate::error::{DecodeError, InvalidFlags, TableError};

use serde::Deserialize;
use std::{
    collections::HashMap,
    fmt::Display,
    str::FromStr,
    sync::{Arc, LazyLock},
};

/// The complete LR35902 op code table which is embedded into the binary.
const BUILTIN_OPCODES: &str = include_str!("opcodes.json");

/// Number of entries in each of the op code tables.
const TABLE_SIZE: usize = 256;

/// The built-in table, parsed on first use and shared by every [`crate::cpu::Cpu`].
static BUILTIN_TABLE: LazyLock<Arc<OpcodeTable>> = LazyLock::new(|| {
    Arc::new(OpcodeTable::from_json(BUILTIN_OPCODES).expect("embedded opcode table is valid"))
});

/// Enumeration of every mnemonic found in the LR35902 instruction set.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize)]
pub enum Mnemonic {
    ADC,
    ADD,
    AND,
    BIT,
    CALL,
    CCF,
    CP,
    CPL,
    DAA,
    DEC,
    DI,
    EI,
    HALT,
    INC,
    JP,
    JR,
    LD,
    LDH,
    NOP,
    OR,
    POP,
    /// Selects the extended table for the following byte. Consumed by the decoder and never
    /// executed.
    PREFIX,
    PUSH,
    RES,
    RET,
    RETI,
    RL,
    RLA,
    RLC,
    RLCA,
    RR,
    RRA,
    RRC,
    RRCA,
    RST,
    SBC,
    SCF,
    SET,
    SLA,
    SRA,
    SRL,
    STOP,
    SUB,
    SWAP,
    XOR,
}

impl Mnemonic {
    /// Returns `false` for the catalogued gaps in the cpu. Decoding an op code with one of these
    /// mnemonics fails instead of producing an instruction which cannot be executed.
    ///
    /// `HALT` waits for an interrupt, and interrupt servicing is not part of this core.
    pub fn is_supported(self) -> bool {
        !matches!(self, Mnemonic::HALT)
    }
    /// Returns `true` for the mnemonics which may carry a branch condition in place of their
    /// first operand.
    pub fn is_conditional_branch(self) -> bool {
        matches!(
            self,
            Mnemonic::JR | Mnemonic::JP | Mnemonic::CALL | Mnemonic::RET
        )
    }
}

impl Display for Mnemonic {
    /// Writes a string representation of the [`Mnemonic`] to the formatter.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}", self))
    }
}

/// Describes what an instruction does to a single flag.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FlagEffect {
    /// The flag keeps its value. Written as `-`.
    Unaffected,
    /// The flag is cleared. Written as `0`.
    Reset,
    /// The flag is set. Written as `1`.
    Set,
    /// The flag depends on the result of the instruction. Written as the flag letter.
    Computed,
}

impl FlagEffect {
    /// Parses one character of a flags string. `letter` is the computed marker for the flag in
    /// that position.
    fn from_char(c: char, letter: char) -> Option<Self> {
        match c {
            '-' => Some(Self::Unaffected),
            '0' => Some(Self::Reset),
            '1' => Some(Self::Set),
            c if c == letter => Some(Self::Computed),
            _ => None,
        }
    }
    /// Returns the character used for the effect in a flags string.
    fn to_char(self, letter: char) -> char {
        match self {
            Self::Unaffected => '-',
            Self::Reset => '0',
            Self::Set => '1',
            Self::Computed => letter,
        }
    }
    /// Resolves the new value of a flag. Constant effects are applied first, then a value computed
    /// by the instruction overrides them. Unaffected flags ignore both.
    pub fn resolve(self, computed: Option<bool>, current: bool) -> bool {
        match self {
            Self::Unaffected => current,
            Self::Reset => computed.unwrap_or(false),
            Self::Set => computed.unwrap_or(true),
            Self::Computed => computed.unwrap_or(current),
        }
    }
}

/// The effect of an instruction on each of the four flags, in `ZNHC` order.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize)]
#[serde(try_from = "String")]
pub struct FlagEffects {
    /// Effect on the zero flag.
    pub z: FlagEffect,
    /// Effect on the subtract flag.
    pub n: FlagEffect,
    /// Effect on the half carry flag.
    pub h: FlagEffect,
    /// Effect on the carry flag.
    pub c: FlagEffect,
}

impl FlagEffects {
    /// Flag effects of an instruction which leaves every flag alone.
    pub const UNAFFECTED: Self = Self {
        z: FlagEffect::Unaffected,
        n: FlagEffect::Unaffected,
        h: FlagEffect::Unaffected,
        c: FlagEffect::Unaffected,
    };
}

impl FromStr for FlagEffects {
    type Err = InvalidFlags;

    /// Parses a flags string such as `Z0H-`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidFlags(s.to_string());

        let chars: Vec<char> = s.chars().collect();
        let [z, n, h, c] = chars[..] else {
            return Err(invalid());
        };

        Ok(Self {
            z: FlagEffect::from_char(z, 'Z').ok_or_else(invalid)?,
            n: FlagEffect::from_char(n, 'N').ok_or_else(invalid)?,
            h: FlagEffect::from_char(h, 'H').ok_or_else(invalid)?,
            c: FlagEffect::from_char(c, 'C').ok_or_else(invalid)?,
        })
    }
}

impl TryFrom<String> for FlagEffects {
    type Error = InvalidFlags;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl Display for FlagEffects {
    /// Writes the effects back in their flags string form.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!(
            "{}{}{}{}",
            self.z.to_char('Z'),
            self.n.to_char('N'),
            self.h.to_char('H'),
            self.c.to_char('C')
        ))
    }
}

/// Static metadata for one op code.
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
pub struct OpcodeMetadata {
    /// Mnemonic of the instruction.
    pub mnemonic: Mnemonic,
    /// Total number of bytes that make up the instruction, including the prefix byte.
    pub length: u16,
    /// Text of the first operand, if any.
    pub operand1: Option<String>,
    /// Text of the second operand, if any.
    pub operand2: Option<String>,
    /// Effect of the instruction on the flags.
    pub flags: FlagEffects,
}

/// The document format of an op code table.
#[derive(Deserialize)]
struct RawTable {
    unprefixed: HashMap<String, OpcodeMetadata>,
    cbprefixed: HashMap<String, OpcodeMetadata>,
}

/// The two read-only op code tables: primary, and extended for op codes following the `0xCB`
/// prefix byte.
#[derive(Debug)]
pub struct OpcodeTable {
    /// Primary table indexed by op code.
    primary: Vec<Option<OpcodeMetadata>>,
    /// Extended table indexed by the op code following the prefix.
    extended: Vec<Option<OpcodeMetadata>>,
}

impl OpcodeTable {
    /// Returns the built-in table covering the whole LR35902 instruction set.
    pub fn builtin() -> Arc<OpcodeTable> {
        Arc::clone(&BUILTIN_TABLE)
    }
    /// Parses an [`OpcodeTable`] from a JSON document with `unprefixed` and `cbprefixed` objects
    /// keyed by op code, e.g. `"0x3e"`.
    pub fn from_json(json: &str) -> Result<Self, TableError> {
        let raw: RawTable = serde_json::from_str(json)?;

        let table = Self {
            primary: Self::index(raw.unprefixed)?,
            extended: Self::index(raw.cbprefixed)?,
        };

        tracing::debug!(
            "loaded opcode table with {} primary and {} prefixed entries",
            table.entries(false).count(),
            table.entries(true).count()
        );

        Ok(table)
    }
    /// Turns a keyed table into a vector indexed by op code.
    fn index(
        entries: HashMap<String, OpcodeMetadata>,
    ) -> Result<Vec<Option<OpcodeMetadata>>, TableError> {
        let mut table = vec![None; TABLE_SIZE];

        for (key, metadata) in entries {
            let opcode = parse_key(&key).ok_or_else(|| TableError::InvalidKey(key.clone()))?;

            if !(1..=3).contains(&metadata.length) {
                return Err(TableError::InvalidLength {
                    key,
                    length: metadata.length,
                });
            }

            table[opcode as usize] = Some(metadata);
        }

        Ok(table)
    }
    /// Looks up the metadata of an op code the cpu can execute.
    pub fn lookup(&self, opcode: u8, prefixed: bool) -> Result<&OpcodeMetadata, DecodeError> {
        let metadata = self.metadata(opcode, prefixed)?;

        if !metadata.mnemonic.is_supported() {
            return Err(DecodeError::UnimplementedMnemonic {
                opcode,
                prefixed,
                mnemonic: metadata.mnemonic,
            });
        }

        Ok(metadata)
    }
    /// Looks up the metadata of any catalogued op code, whether or not the cpu supports its
    /// mnemonic.
    pub fn metadata(&self, opcode: u8, prefixed: bool) -> Result<&OpcodeMetadata, DecodeError> {
        let table = if prefixed {
            &self.extended
        } else {
            &self.primary
        };

        table[opcode as usize]
            .as_ref()
            .ok_or(DecodeError::UnknownOpcode { opcode, prefixed })
    }
    /// Iterates over the defined entries of one of the tables in op code order.
    pub fn entries(&self, prefixed: bool) -> impl Iterator<Item = (u8, &OpcodeMetadata)> {
        let table = if prefixed {
            &self.extended
        } else {
            &self.primary
        };

        table
            .iter()
            .enumerate()
            .filter_map(|(opcode, metadata)| metadata.as_ref().map(|m| (opcode as u8, m)))
    }
    /// Returns one line per entry of the table describing the op code, its length, mnemonic,
    /// operands and flags.
    pub fn summary(&self, prefixed: bool) -> Vec<String> {
        self.entries(prefixed)
            .map(|(opcode, metadata)| {
                let operands = [&metadata.operand1, &metadata.operand2]
                    .into_iter()
                    .flatten()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(",");

                format!(
                    "{:#04x} {} {:<6} {:<12} {}",
                    opcode,
                    metadata.length,
                    metadata.mnemonic.to_string(),
                    operands,
                    metadata.flags
                )
            })
            .collect()
    }
}

/// Parses a table key such as `0x3e` into the op code byte.
fn parse_key(key: &str) -> Option<u8> {
    let digits = key.strip_prefix("0x")?;
    if digits.len() != 2 {
        return None;
    }

    u8::from_str_radix(digits, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Op codes which are not defined on the hardware.
    const UNDEFINED_OPCODES: [u8; 11] = [
        0xD3, 0xDB, 0xDD, 0xE3, 0xE4, 0xEB, 0xEC, 0xED, 0xF4, 0xFC, 0xFD,
    ];

    #[test]
    fn test_builtin_table_is_complete() {
        let table = OpcodeTable::builtin();

        assert_eq!(245, table.entries(false).count());
        assert_eq!(256, table.entries(true).count());

        for opcode in UNDEFINED_OPCODES {
            assert_eq!(
                Err(DecodeError::UnknownOpcode {
                    opcode,
                    prefixed: false
                }),
                table.lookup(opcode, false)
            );
        }
    }

    #[test]
    fn test_builtin_table_is_shared() {
        let a = OpcodeTable::builtin();
        let b = OpcodeTable::builtin();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_lookup_primary() {
        let table = OpcodeTable::builtin();

        let metadata = table.lookup(0x3E, false).expect("valid op code");
        assert_eq!(Mnemonic::LD, metadata.mnemonic);
        assert_eq!(2, metadata.length);
        assert_eq!(Some("A"), metadata.operand1.as_deref());
        assert_eq!(Some("d8"), metadata.operand2.as_deref());
        assert_eq!(FlagEffects::UNAFFECTED, metadata.flags);
    }

    #[test]
    fn test_lookup_prefixed() {
        let table = OpcodeTable::builtin();

        let metadata = table.lookup(0x7C, true).expect("valid op code");
        assert_eq!(Mnemonic::BIT, metadata.mnemonic);
        assert_eq!(2, metadata.length);
        assert_eq!(Some("7"), metadata.operand1.as_deref());
        assert_eq!(Some("H"), metadata.operand2.as_deref());
        assert_eq!("Z01-", metadata.flags.to_string());
    }

    #[test]
    fn test_lookup_halt_is_unimplemented() {
        let table = OpcodeTable::builtin();

        assert_eq!(
            Err(DecodeError::UnimplementedMnemonic {
                opcode: 0x76,
                prefixed: false,
                mnemonic: Mnemonic::HALT
            }),
            table.lookup(0x76, false)
        );
    }

    #[test]
    fn test_metadata_includes_unsupported_mnemonics() {
        let table = OpcodeTable::builtin();

        let metadata = table.metadata(0x76, false).expect("catalogued op code");
        assert_eq!(Mnemonic::HALT, metadata.mnemonic);
        assert_eq!(1, metadata.length);

        assert_eq!(
            Err(DecodeError::UnknownOpcode {
                opcode: 0xD3,
                prefixed: false
            }),
            table.metadata(0xD3, false)
        );
    }

    #[test]
    fn test_flag_effects_parse() {
        let effects: FlagEffects = "Z1HC".parse().expect("valid flags");
        assert_eq!(FlagEffect::Computed, effects.z);
        assert_eq!(FlagEffect::Set, effects.n);
        assert_eq!(FlagEffect::Computed, effects.h);
        assert_eq!(FlagEffect::Computed, effects.c);

        let effects: FlagEffects = "-00C".parse().expect("valid flags");
        assert_eq!(FlagEffect::Unaffected, effects.z);
        assert_eq!(FlagEffect::Reset, effects.n);
        assert_eq!("-00C", effects.to_string());

        assert!("ZNH".parse::<FlagEffects>().is_err());
        assert!("ZNHCZ".parse::<FlagEffects>().is_err());
        assert!("CNHZ".parse::<FlagEffects>().is_err());
        assert!("Z2H-".parse::<FlagEffects>().is_err());
    }

    #[test]
    fn test_flag_effect_resolve() {
        assert!(FlagEffect::Unaffected.resolve(Some(false), true));
        assert!(!FlagEffect::Reset.resolve(None, true));
        assert!(FlagEffect::Reset.resolve(Some(true), false));
        assert!(FlagEffect::Set.resolve(None, false));
        assert!(!FlagEffect::Computed.resolve(Some(false), true));
        assert!(FlagEffect::Computed.resolve(None, true));
    }

    #[test]
    fn test_from_json_custom_table() {
        let json = r#"{
            "unprefixed": {
                "0x00": {"mnemonic": "NOP", "length": 1, "flags": "----"},
                "0xaf": {"mnemonic": "XOR", "length": 1, "operand1": "A", "flags": "Z000"}
            },
            "cbprefixed": {}
        }"#;

        let table = OpcodeTable::from_json(json).expect("valid table");
        assert_eq!(2, table.entries(false).count());
        assert_eq!(0, table.entries(true).count());
        assert_eq!(
            Mnemonic::XOR,
            table.lookup(0xAF, false).expect("valid op code").mnemonic
        );
        assert!(matches!(
            table.lookup(0x01, false),
            Err(DecodeError::UnknownOpcode { .. })
        ));
    }

    #[test]
    fn test_from_json_rejects_bad_key() {
        let json = r#"{
            "unprefixed": {"0x0": {"mnemonic": "NOP", "length": 1, "flags": "----"}},
            "cbprefixed": {}
        }"#;

        assert!(matches!(
            OpcodeTable::from_json(json),
            Err(TableError::InvalidKey(key)) if key == "0x0"
        ));
    }

    #[test]
    fn test_from_json_rejects_bad_length() {
        let json = r#"{
            "unprefixed": {"0x00": {"mnemonic": "NOP", "length": 4, "flags": "----"}},
            "cbprefixed": {}
        }"#;

        assert!(matches!(
            OpcodeTable::from_json(json),
            Err(TableError::InvalidLength { length: 4, .. })
        ));
    }

    #[test]
    fn test_from_json_rejects_unknown_mnemonic() {
        let json = r#"{
            "unprefixed": {"0x00": {"mnemonic": "FOO", "length": 1, "flags": "----"}},
            "cbprefixed": {}
        }"#;

        assert!(matches!(
            OpcodeTable::from_json(json),
            Err(TableError::Json(_))
        ));
    }

    #[test]
    fn test_from_json_rejects_bad_flags() {
        let json = r#"{
            "unprefixed": {"0x00": {"mnemonic": "NOP", "length": 1, "flags": "--"}},
            "cbprefixed": {}
        }"#;

        assert!(matches!(
            OpcodeTable::from_json(json),
            Err(TableError::Json(_))
        ));
    }

    #[test]
    fn test_summary() {
        let table = OpcodeTable::builtin();

        let summary = table.summary(false);
        assert_eq!(245, summary.len());
        assert!(summary[0].starts_with("0x00 1 NOP"));
        assert!(
            summary
                .iter()
                .any(|line| line.contains("JR") && line.contains("NZ,r8"))
        );
    }
}
