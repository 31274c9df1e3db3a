use std::fmt::Display;

/// Enumeration of the 8-bit registers. The discriminant is the index of the register in the
/// backing storage of [`Registers`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Reg8 {
    /// Accumulator.
    A = 0,
    /// B register.
    B = 1,
    /// C register.
    C = 2,
    /// D register.
    D = 3,
    /// E register.
    E = 4,
    /// Special flags register.
    F = 5,
    /// H register.
    H = 6,
    /// L register.
    L = 7,
}

impl Reg8 {
    /// Parses a single letter register name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "A" => Some(Self::A),
            "B" => Some(Self::B),
            "C" => Some(Self::C),
            "D" => Some(Self::D),
            "E" => Some(Self::E),
            "F" => Some(Self::F),
            "H" => Some(Self::H),
            "L" => Some(Self::L),
            _ => None,
        }
    }
}

impl Display for Reg8 {
    /// Writes a string representation of the [`Reg8`] to the formatter.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}", self))
    }
}

/// Enumeration of the 16-bit registers. Every pair except `SP` is a view over two [`Reg8`]
/// registers, the first named one holding the high byte.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Reg16 {
    /// Combined AF 16-bit register.
    AF,
    /// Combined BC 16-bit register.
    BC,
    /// Combined DE 16-bit register.
    DE,
    /// Combined HL 16-bit register.
    HL,
    /// Stack pointer.
    SP,
}

impl Reg16 {
    /// Parses a two letter register pair name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AF" => Some(Self::AF),
            "BC" => Some(Self::BC),
            "DE" => Some(Self::DE),
            "HL" => Some(Self::HL),
            "SP" => Some(Self::SP),
            _ => None,
        }
    }
    /// Returns the high and low halves of the pair, or `None` for the stack pointer which has its
    /// own storage.
    fn halves(self) -> Option<(Reg8, Reg8)> {
        match self {
            Reg16::AF => Some((Reg8::A, Reg8::F)),
            Reg16::BC => Some((Reg8::B, Reg8::C)),
            Reg16::DE => Some((Reg8::D, Reg8::E)),
            Reg16::HL => Some((Reg8::H, Reg8::L)),
            Reg16::SP => None,
        }
    }
}

impl Display for Reg16 {
    /// Writes a string representation of the [`Reg16`] to the formatter.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{:?}", self))
    }
}

/// Mask of the bits of the `F` register which can hold a value. The low nibble always reads 0.
const FLAGS_MASK: u8 = 0xF0;

/// Represents the registers on the cpu. The 8-bit registers are the only storage; the combined
/// 16-bit registers are computed from their halves on every read and split on every write.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Registers {
    /// 8-bit registers indexed by [`Reg8`].
    regs: [u8; 8],
    /// Stack pointer.
    pub sp: u16,
    /// Program counter.
    pub pc: u16,
}

impl Registers {
    /// Creates a new [`Registers`] with every register cleared.
    pub fn new() -> Self {
        Self::default()
    }
    /// Returns the value of the 8-bit register.
    pub fn get(&self, reg: Reg8) -> u8 {
        self.regs[reg as usize]
    }
    /// Sets the value of the 8-bit register.
    pub fn set(&mut self, reg: Reg8, value: u8) {
        self.regs[reg as usize] = match reg {
            Reg8::F => value & FLAGS_MASK,
            _ => value,
        };
    }
    /// Returns the combined value of the 16-bit register.
    pub fn pair(&self, reg: Reg16) -> u16 {
        match reg.halves() {
            Some((high, low)) => u16::from_be_bytes([self.get(high), self.get(low)]),
            None => self.sp,
        }
    }
    /// Sets the value of the 16-bit register by splitting it into its halves.
    pub fn set_pair(&mut self, reg: Reg16, value: u16) {
        match reg.halves() {
            Some((high, low)) => {
                let [h, l] = value.to_be_bytes();
                self.set(high, h);
                self.set(low, l);
            }
            None => self.sp = value,
        }
    }
    /// Returns the flags held in the `F` register.
    pub fn flags(&self) -> Flags {
        Flags::from(self.get(Reg8::F))
    }
    /// Stores the flags into the `F` register.
    pub fn set_flags(&mut self, flags: Flags) {
        self.set(Reg8::F, flags.into());
    }
}

/// Bit position of the carry flag in the [`u8`] representation of [`Flags`].
const FLAGS_CARRY_BIT_POSITION: u8 = 4;

/// Bit position of the half carry flag in the [`u8`] representation of [`Flags`].
const FLAGS_HALF_CARRY_BIT_POSITION: u8 = 5;

/// Bit position of the subtract flag in the [`u8`] representation of [`Flags`].
const FLAGS_SUBTRACT_BIT_POSITION: u8 = 6;

/// Bit position of the zero flag in the [`u8`] representation of [`Flags`].
const FLAGS_ZERO_BIT_POSITION: u8 = 7;

/// Eases the special handling required for the `F` register which uses the top 4 bits for the
/// following flags.
///
/// 76543210 <- Bit position
/// --------
/// 00000000
/// ||||
/// |||-- Carry
/// ||--- Half Carry
/// |---- Subtract
/// ----- Zero
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Flags(u8);

impl Flags {
    /// Creates a new default [`Flags`].
    pub fn new() -> Self {
        Self::default()
    }
    /// Retrieves the current status of the carry flag.
    pub fn c(&self) -> bool {
        (self.0 >> FLAGS_CARRY_BIT_POSITION) & 1 != 0
    }
    /// Sets the status of the carry flag.
    pub fn set_c(&mut self, on: bool) {
        self.set_flag(FLAGS_CARRY_BIT_POSITION, on);
    }
    /// Retrieves the current status of the half carry flag.
    pub fn h(&self) -> bool {
        (self.0 >> FLAGS_HALF_CARRY_BIT_POSITION) & 1 != 0
    }
    /// Sets the status of the half carry flag.
    pub fn set_h(&mut self, on: bool) {
        self.set_flag(FLAGS_HALF_CARRY_BIT_POSITION, on);
    }
    /// Retrieves the current status of the subtract flag.
    pub fn n(&self) -> bool {
        (self.0 >> FLAGS_SUBTRACT_BIT_POSITION) & 1 != 0
    }
    /// Sets the status of the substract flag.
    pub fn set_n(&mut self, on: bool) {
        self.set_flag(FLAGS_SUBTRACT_BIT_POSITION, on);
    }
    /// Retrieves the current status of the zero flag.
    pub fn z(&self) -> bool {
        (self.0 >> FLAGS_ZERO_BIT_POSITION) & 1 != 0
    }
    /// Sets the status of the zero flag.
    pub fn set_z(&mut self, on: bool) {
        self.set_flag(FLAGS_ZERO_BIT_POSITION, on);
    }
    /// Sets the status of the flag at the given position.
    fn set_flag(&mut self, pos: u8, on: bool) {
        let flag = 1 << pos;
        let is_set = (self.0 & flag) != 0;

        if is_set != on {
            self.0 ^= flag
        }
    }
}

impl From<u8> for Flags {
    /// Converts the given [`u8`] into a [`Flags`]. The low nibble is discarded.
    fn from(value: u8) -> Self {
        Self(value & FLAGS_MASK)
    }
}

impl From<Flags> for u8 {
    /// Converts the given [`Flags`] into a [`u8`].
    fn from(value: Flags) -> Self {
        value.0
    }
}

impl Display for Flags {
    /// Writes the flags as `ZNHC`, with a `-` in place of every cleared flag.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let letter = |on: bool, c: char| if on { c } else { '-' };

        f.write_fmt(format_args!(
            "{}{}{}{}",
            letter(self.z(), 'Z'),
            letter(self.n(), 'N'),
            letter(self.h(), 'H'),
            letter(self.c(), 'C')
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_c() {
        let mut flags = Flags::new();
        assert!(!flags.c());

        flags.set_c(true);
        assert!(flags.c());
        assert_eq!(flags.0, 1 << FLAGS_CARRY_BIT_POSITION);

        flags.set_c(false);
        assert!(!flags.c());
    }

    #[test]
    fn test_flags_h() {
        let mut flags = Flags::new();
        assert!(!flags.h());

        flags.set_h(true);
        assert!(flags.h());
        assert_eq!(flags.0, 1 << FLAGS_HALF_CARRY_BIT_POSITION);

        flags.set_h(false);
        assert!(!flags.h());
    }

    #[test]
    fn test_flags_n() {
        let mut flags = Flags::new();
        assert!(!flags.n());

        flags.set_n(true);
        assert!(flags.n());
        assert_eq!(flags.0, 1 << FLAGS_SUBTRACT_BIT_POSITION);

        flags.set_n(false);
        assert!(!flags.n());
    }

    #[test]
    fn test_flags_z() {
        let mut flags = Flags::new();
        assert!(!flags.z());

        flags.set_z(true);
        assert!(flags.z());
        assert_eq!(flags.0, 1 << FLAGS_ZERO_BIT_POSITION);

        flags.set_z(false);
        assert!(!flags.z());
    }

    #[test]
    fn test_flags_display() {
        let mut flags = Flags::new();
        assert_eq!("----", flags.to_string());

        flags.set_z(true);
        flags.set_c(true);
        assert_eq!("Z--C", flags.to_string());
    }

    #[test]
    fn test_registers_pair_is_view_over_halves() {
        let mut registers = Registers::new();

        registers.set(Reg8::B, 0x12);
        registers.set(Reg8::C, 0x34);
        assert_eq!(0x1234, registers.pair(Reg16::BC));

        registers.set_pair(Reg16::DE, 0xBEEF);
        assert_eq!(0xBE, registers.get(Reg8::D));
        assert_eq!(0xEF, registers.get(Reg8::E));

        registers.set(Reg8::L, 0x01);
        registers.set_pair(Reg16::HL, registers.pair(Reg16::HL).wrapping_add(1));
        assert_eq!(0x0002, registers.pair(Reg16::HL));
        assert_eq!(0x00, registers.get(Reg8::H));
    }

    #[test]
    fn test_registers_sp_is_separate() {
        let mut registers = Registers::new();

        registers.set_pair(Reg16::SP, 0xFFFE);
        assert_eq!(0xFFFE, registers.sp);
        assert_eq!(0, registers.pair(Reg16::HL));
    }

    #[test]
    fn test_registers_af_masks_low_nibble() {
        let mut registers = Registers::new();

        registers.set_pair(Reg16::AF, 0x12FF);
        assert_eq!(0x12, registers.get(Reg8::A));
        assert_eq!(0xF0, registers.get(Reg8::F));
        assert_eq!(0x12F0, registers.pair(Reg16::AF));

        let flags = registers.flags();
        assert!(flags.z() && flags.n() && flags.h() && flags.c());
    }

    #[test]
    fn test_reg_from_name() {
        assert_eq!(Some(Reg8::H), Reg8::from_name("H"));
        assert_eq!(None, Reg8::from_name("X"));
        assert_eq!(Some(Reg16::SP), Reg16::from_name("SP"));
        assert_eq!(None, Reg16::from_name("HX"));
    }
}
