use std::ops::RangeInclusive;

/// Defines the size of the addressable memory for the emulator. The bus covers the whole 16-bit
/// address space.
pub const ADDRESSABLE_MEMORY: usize = 0x10000;

/// Video RAM, tile data followed by the two background maps.
pub const VIDEO_RAM: RangeInclusive<u16> = 0x8000..=0x9FFF;

/// Object attribute memory. 40 sprites of 4 bytes each.
pub const OAM: RangeInclusive<u16> = 0xFE00..=0xFE9F;

/// Base address of the high memory region addressed by `LDH` and `(C)` operands.
pub const HIGH_MEMORY_BASE: u16 = 0xFF00;

/// [`Memory`] represents the emulator memory bus. It is a flat byte store: there is no bank
/// switching, no write protection and no side effect attached to any address. Components such as
/// the PPU or the timer are expected to poll and write their ranges directly.
#[derive(Clone)]
pub struct Memory {
    /// Raw bytes of data contained in memory.
    data: Box<[u8; ADDRESSABLE_MEMORY]>,
}

impl Memory {
    /// Creates a new default [`Memory`].
    pub fn new() -> Self {
        Self::default()
    }
    /// Reads a single byte from memory at the given address.
    pub fn read_u8(&self, address: u16) -> u8 {
        self.data[address as usize]
    }
    /// Reads a single byte from memory at the given address and reinterprets it as a signed
    /// two's complement value.
    pub fn read_i8(&self, address: u16) -> i8 {
        self.read_u8(address) as i8
    }
    /// Reads two bytes starting at the given address. The low byte is stored at the lower
    /// address.
    pub fn read_u16(&self, address: u16) -> u16 {
        let low = self.read_u8(address);
        let high = self.read_u8(address.wrapping_add(1));

        u16::from_le_bytes([low, high])
    }
    /// Writes a single byte to memory at the given address.
    pub fn write_u8(&mut self, address: u16, byte: u8) {
        self.data[address as usize] = byte;
    }
    /// Writes a 16-bit value as two bytes, low byte first.
    pub fn write_u16(&mut self, address: u16, value: u16) {
        let [low, high] = value.to_le_bytes();

        self.write_u8(address, low);
        self.write_u8(address.wrapping_add(1), high);
    }
    /// Writes a block of bytes to memory at the given start address. Bytes which would land past
    /// the end of the address space are dropped.
    pub fn write_block(&mut self, start_addr: u16, bytes: &[u8]) {
        let dest_start = start_addr as usize;
        let available = ADDRESSABLE_MEMORY - dest_start;

        let num_bytes = if bytes.len() > available {
            tracing::warn!(
                "block of {} bytes at {:#06x} exceeds the address space, dropping {} bytes",
                bytes.len(),
                start_addr,
                bytes.len() - available
            );
            available
        } else {
            bytes.len()
        };

        tracing::debug!(
            "write {} bytes to memory starting at {:#06x}",
            num_bytes,
            start_addr
        );

        self.data[dest_start..dest_start + num_bytes].copy_from_slice(&bytes[..num_bytes]);
    }
    /// Returns the bytes in the given address range.
    pub fn slice(&self, range: RangeInclusive<u16>) -> &[u8] {
        &self.data[*range.start() as usize..=*range.end() as usize]
    }
    /// Returns the video RAM bytes consumed by a renderer.
    pub fn vram(&self) -> &[u8] {
        self.slice(VIDEO_RAM)
    }
    /// Returns the sprite attribute bytes consumed by a renderer.
    pub fn oam(&self) -> &[u8] {
        self.slice(OAM)
    }
}

impl Default for Memory {
    /// Creates a default [`Memory`] which has all data set to zero.
    fn default() -> Self {
        Self {
            data: Box::new([0; ADDRESSABLE_MEMORY]),
        }
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("size", &self.data.len())
            .finish()
    }
}
