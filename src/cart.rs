use anyhow::Context;
use std::{fmt::Display, path::Path};

/// Size in bytes of the cartridge image that is visible to the cpu without bank switching.
pub const CARTRIDGE_WINDOW_SIZE: usize = 0x8000;

/// Total number of bytes that make up the header, counted from the start of the image.
const HEADER_END: usize = 0x0150;

/// Total number of bytes that make up the Nintendo logo stored on the cartridge.
const NINTENDO_LOGO_LENGTH: usize = 48;

/// Address of the byte to start at when reading the Nintendo logo.
const NINTENDO_LOGO_START: usize = 0x0104;

/// Address of the last byte of the Nintendo logo.
const NINTENDO_LOGO_END: usize = 0x0133;

/// Address of the first byte of the title.
const TITLE_START_ADDR: usize = 0x0134;

/// Address of the last byte of the title.
const TITLE_END_ADDR: usize = 0x0143;

/// Address of the cartridge type byte.
const TYPE_ADDR: usize = 0x0147;

/// Address of the ROM size byte.
const ROM_SIZE_ADDR: usize = 0x0148;

/// Address of the RAM size byte.
const RAM_SIZE_ADDR: usize = 0x0149;

/// Address of the expected header checksum value.
const HEADER_CHECKSUM_ADDR: usize = 0x014D;

/// Address of the byte to start at when computing the header checksum.
const COMPUTE_HEADER_CHECKSUM_START: usize = 0x0134;

/// One past the address of the byte to end at when computing the header checksum.
const COMPUTE_HEADER_CHECKSUM_END: usize = 0x014D;

/// Enumerates the kinds of Game Boy cartridges by the memory bank controller they carry. Only
/// [`CartridgeKind::RomOnly`] images fit into the address space without bank switching.
#[allow(clippy::upper_case_acronyms)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CartridgeKind {
    /// No mapping required.
    RomOnly,
    /// Type 1 memory bank controller.
    MBC1 { ram: bool, battery: bool },
    /// Type 2 memory bank controller.
    MBC2 { battery: bool },
    /// Type 3 memory bank controller.
    MBC3 { ram: bool, battery: bool, timer: bool },
    /// Type 5 memory bank controller.
    MBC5 { ram: bool, battery: bool, rumble: bool },
    /// Any other cartridge type byte.
    Other(u8),
}

impl From<u8> for CartridgeKind {
    /// Creates the [`CartridgeKind`] that maps to the cartridge type byte read from the header.
    fn from(value: u8) -> Self {
        match value {
            0x00 => CartridgeKind::RomOnly,
            0x01 => CartridgeKind::MBC1 {
                ram: false,
                battery: false,
            },
            0x02 => CartridgeKind::MBC1 {
                ram: true,
                battery: false,
            },
            0x03 => CartridgeKind::MBC1 {
                ram: true,
                battery: true,
            },
            0x05 => CartridgeKind::MBC2 { battery: false },
            0x06 => CartridgeKind::MBC2 { battery: true },
            0x0F => CartridgeKind::MBC3 {
                ram: false,
                battery: true,
                timer: true,
            },
            0x10 => CartridgeKind::MBC3 {
                ram: true,
                battery: true,
                timer: true,
            },
            0x11 => CartridgeKind::MBC3 {
                ram: false,
                battery: false,
                timer: false,
            },
            0x12 => CartridgeKind::MBC3 {
                ram: true,
                battery: false,
                timer: false,
            },
            0x13 => CartridgeKind::MBC3 {
                ram: true,
                battery: true,
                timer: false,
            },
            0x19..=0x1E => CartridgeKind::MBC5 {
                ram: matches!(value, 0x1A | 0x1B | 0x1D | 0x1E),
                battery: matches!(value, 0x1B | 0x1E),
                rumble: value >= 0x1C,
            },
            other => CartridgeKind::Other(other),
        }
    }
}

impl CartridgeKind {
    /// Determines if the cartridge needs bank switching to reach all of its ROM.
    pub fn is_banked(&self) -> bool {
        !matches!(self, CartridgeKind::RomOnly)
    }
}

impl Display for CartridgeKind {
    /// Writes a string representation of the [`CartridgeKind`] to the formatter.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CartridgeKind::RomOnly => f.write_str("ROM Only"),
            CartridgeKind::MBC1 { ram, battery } => {
                f.write_fmt(format_args!("MBC1 RAM:{} Battery:{}", ram, battery))
            }
            CartridgeKind::MBC2 { battery } => {
                f.write_fmt(format_args!("MBC2 Battery:{}", battery))
            }
            CartridgeKind::MBC3 {
                ram,
                battery,
                timer,
            } => f.write_fmt(format_args!(
                "MBC3 RAM:{} Battery:{} Timer:{}",
                ram, battery, timer
            )),
            CartridgeKind::MBC5 {
                ram,
                battery,
                rumble,
            } => f.write_fmt(format_args!(
                "MBC5 RAM:{} Battery:{} Rumble:{}",
                ram, battery, rumble
            )),
            CartridgeKind::Other(value) => f.write_fmt(format_args!("Unknown ({:#04x})", value)),
        }
    }
}

/// Holds the data that makes up the header of the [`Cartridge`]. The header contains data such as
/// the [`CartridgeKind`], the title of the game and the sizes of its ROM and RAM.
#[derive(Debug)]
pub struct Header {
    /// Byte array containing the Nintendo logo that is displayed when the Game Boy is turned on.
    pub nintendo_logo: [u8; NINTENDO_LOGO_LENGTH],
    /// Title of the game in uppercase ASCII.
    pub title: String,
    /// Indicates what kind of hardware is present on the cartridge including the memory bank
    /// controller implementation.
    pub kind: CartridgeKind,
    /// Indicates how much ROM is present on the cartridge. In most cases, the ROM size is given by
    /// 32 KiB × (1 << <value>).
    pub rom_size: u8,
    /// Indicates how much RAM is present on the cartridge, if any.
    pub ram_size: u8,
    /// Contains an 8-bit checksum computed from the cartridge header bytes $0134–014C.
    pub expected_header_checksum: u8,
    /// Contains the computed header checksum.
    pub computed_header_checksum: u8,
}

impl Header {
    /// Creates a new [`Header`] by parsing the relevant bytes of the cartridge image. Fails when
    /// the image is too short to contain a header.
    pub fn parse(data: &[u8]) -> anyhow::Result<Self> {
        if data.len() < HEADER_END {
            anyhow::bail!(
                "image of {} bytes is too short for a cartridge header ({} bytes)",
                data.len(),
                HEADER_END
            );
        }

        let mut nintendo_logo = [0; NINTENDO_LOGO_LENGTH];
        nintendo_logo.copy_from_slice(&data[NINTENDO_LOGO_START..=NINTENDO_LOGO_END]);

        let title = String::from_utf8_lossy(&data[TITLE_START_ADDR..=TITLE_END_ADDR])
            .to_string()
            .replace('\0', "");

        let mut computed_header_checksum: u8 = 0;
        for value in data
            .iter()
            .take(COMPUTE_HEADER_CHECKSUM_END)
            .skip(COMPUTE_HEADER_CHECKSUM_START)
        {
            computed_header_checksum = computed_header_checksum
                .wrapping_sub(*value)
                .wrapping_sub(1);
        }

        Ok(Self {
            nintendo_logo,
            title,
            kind: data[TYPE_ADDR].into(),
            rom_size: data[ROM_SIZE_ADDR],
            ram_size: data[RAM_SIZE_ADDR],
            expected_header_checksum: data[HEADER_CHECKSUM_ADDR],
            computed_header_checksum,
        })
    }
    /// Determines if the header is valid by verifying the expected checksum value.
    pub fn is_valid(&self) -> bool {
        self.expected_header_checksum == self.computed_header_checksum
    }
    /// Returns the size of the ROM in bytes, if the size code is known.
    pub fn rom_bytes(&self) -> Option<usize> {
        match self.rom_size {
            code @ 0x00..=0x08 => Some(CARTRIDGE_WINDOW_SIZE << code),
            _ => None,
        }
    }
    /// Returns the size of the external RAM in bytes, if the size code is known.
    pub fn ram_bytes(&self) -> Option<usize> {
        match self.ram_size {
            0x00 => Some(0),
            0x01 => Some(2 * 1024),
            0x02 => Some(8 * 1024),
            0x03 => Some(32 * 1024),
            0x04 => Some(128 * 1024),
            0x05 => Some(64 * 1024),
            _ => None,
        }
    }
}

/// The [`Cartridge`] struct represents a game cartridge image along with its parsed header.
#[derive(Debug)]
pub struct Cartridge {
    /// Name of the game cartridge.
    pub name: String,
    /// Header data of the game cartridge.
    pub header: Header,
    /// Raw bytes of the cartridge image.
    data: Vec<u8>,
}

impl Cartridge {
    /// Creates a new [`Cartridge`] from the Game Boy ROM file at the specified path.
    pub fn from_rom_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        tracing::debug!("load cartridge from rom file: {:?}", path.as_ref());

        let name = path
            .as_ref()
            .file_name()
            .and_then(|s| s.to_str().map(String::from))
            .unwrap_or_else(|| String::from("Unknown"));

        let data = std::fs::read(path.as_ref())
            .context(format!("read file: {}", path.as_ref().to_string_lossy()))?;

        Self::from_bytes(name, data)
    }
    /// Creates a new [`Cartridge`] from an in-memory image. Header problems which do not prevent
    /// loading, a checksum mismatch or a banked cartridge type, are logged as warnings.
    pub fn from_bytes(name: impl Into<String>, data: Vec<u8>) -> anyhow::Result<Self> {
        let name = name.into();
        let header = Header::parse(&data).context(format!("parse header of {}", name))?;

        tracing::info!(
            "cartridge '{}' title: '{}', type: {}, rom size: {:?}, ram size: {:?}",
            name,
            header.title,
            header.kind,
            header.rom_bytes(),
            header.ram_bytes()
        );

        if !header.is_valid() {
            tracing::warn!(
                "header checksum mismatch, expected {:#04x} but computed {:#04x}",
                header.expected_header_checksum,
                header.computed_header_checksum
            );
        }

        if header.kind.is_banked() {
            tracing::warn!(
                "cartridge type {} needs bank switching, only the first {} bytes are mapped",
                header.kind,
                CARTRIDGE_WINDOW_SIZE
            );
        }

        Ok(Self { name, header, data })
    }
    /// Returns the part of the image which is mapped into the address space at 0x0000.
    pub fn image(&self) -> &[u8] {
        &self.data[..self.data.len().min(CARTRIDGE_WINDOW_SIZE)]
    }
}
