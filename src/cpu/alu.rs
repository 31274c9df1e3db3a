//! Arithmetic, logic and bit operations. Every function is pure: it returns the result together
//! with the flags it computes, and the cpu merges those with the op code table's flag effects.

/// Flag values computed by an instruction. `None` means the instruction does not compute the
/// flag, leaving it to the constant from the op code table.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FlagUpdate {
    pub z: Option<bool>,
    pub n: Option<bool>,
    pub h: Option<bool>,
    pub c: Option<bool>,
}

impl FlagUpdate {
    /// Creates an update which computes no flag.
    pub fn none() -> Self {
        Self::default()
    }
    /// Creates an update which computes all four flags.
    pub fn all(z: bool, n: bool, h: bool, c: bool) -> Self {
        Self {
            z: Some(z),
            n: Some(n),
            h: Some(h),
            c: Some(c),
        }
    }
    pub fn z(mut self, on: bool) -> Self {
        self.z = Some(on);
        self
    }
    pub fn n(mut self, on: bool) -> Self {
        self.n = Some(on);
        self
    }
    pub fn h(mut self, on: bool) -> Self {
        self.h = Some(on);
        self
    }
    pub fn c(mut self, on: bool) -> Self {
        self.c = Some(on);
        self
    }
}

/// Detrmines if the addtion of `b` to `a` will cause a half-carry.
fn will_half_carry_add_u8(a: u8, b: u8, carry: u8) -> bool {
    (a & 0x0F) + (b & 0x0F) + carry > 0x0F
}

/// Detrmines if the addtion of `b` to `a` will cause a half-carry. The half carry is calculated on
/// the 11th bit.
fn will_half_carry_add_u16(a: u16, b: u16) -> bool {
    (a & 0x0FFF) + (b & 0x0FFF) > 0x0FFF
}

/// Detrmines if the subtraction of `b` from `a` will cause a half-carry.
fn will_half_carry_sub_u8(a: u8, b: u8, carry: u8) -> bool {
    (((a & 0x0F) as i32) - ((b & 0x0F) as i32) - (carry as i32)) < 0
}

/// `ADD` and `ADC`: adds `b` and the incoming carry to `a`.
pub fn add(a: u8, b: u8, carry: bool) -> (u8, FlagUpdate) {
    let carry = carry as u8;
    let sum = a as u16 + b as u16 + carry as u16;
    let result = sum as u8;

    (
        result,
        FlagUpdate::all(
            result == 0,
            false,
            will_half_carry_add_u8(a, b, carry),
            sum > 0xFF,
        ),
    )
}

/// `SUB`, `SBC` and `CP`: subtracts `b` and the incoming borrow from `a`.
pub fn sub(a: u8, b: u8, carry: bool) -> (u8, FlagUpdate) {
    let carry = carry as u8;
    let result = a.wrapping_sub(b).wrapping_sub(carry);

    (
        result,
        FlagUpdate::all(
            result == 0,
            true,
            will_half_carry_sub_u8(a, b, carry),
            (a as u16) < (b as u16 + carry as u16),
        ),
    )
}

/// `AND`.
pub fn and(a: u8, b: u8) -> (u8, FlagUpdate) {
    let result = a & b;
    (result, FlagUpdate::all(result == 0, false, true, false))
}

/// `XOR`.
pub fn xor(a: u8, b: u8) -> (u8, FlagUpdate) {
    let result = a ^ b;
    (result, FlagUpdate::all(result == 0, false, false, false))
}

/// `OR`.
pub fn or(a: u8, b: u8) -> (u8, FlagUpdate) {
    let result = a | b;
    (result, FlagUpdate::all(result == 0, false, false, false))
}

/// 8-bit `INC`. The carry flag is left alone.
pub fn inc(value: u8) -> (u8, FlagUpdate) {
    let result = value.wrapping_add(1);

    (
        result,
        FlagUpdate::none()
            .z(result == 0)
            .n(false)
            .h(will_half_carry_add_u8(value, 1, 0)),
    )
}

/// 8-bit `DEC`. The carry flag is left alone.
pub fn dec(value: u8) -> (u8, FlagUpdate) {
    let result = value.wrapping_sub(1);

    (
        result,
        FlagUpdate::none()
            .z(result == 0)
            .n(true)
            .h(will_half_carry_sub_u8(value, 1, 0)),
    )
}

/// `ADD HL, rr`. The zero flag is left alone.
pub fn add_u16(a: u16, b: u16) -> (u16, FlagUpdate) {
    let (result, overflowed) = a.overflowing_add(b);

    (
        result,
        FlagUpdate::none()
            .n(false)
            .h(will_half_carry_add_u16(a, b))
            .c(overflowed),
    )
}

/// `ADD SP, r8` and `LD HL, SP+r8`. The carries come from the unsigned addition of the low byte.
pub fn add_signed(sp: u16, offset: i8) -> (u16, FlagUpdate) {
    let low = sp as u8;
    let unsigned = offset as u8;

    (
        sp.wrapping_add_signed(offset.into()),
        FlagUpdate::all(
            false,
            false,
            will_half_carry_add_u8(low, unsigned, 0),
            low as u16 + unsigned as u16 > 0xFF,
        ),
    )
}

/// `DAA`: adjusts the accumulator to binary-coded decimal after an addition or subtraction,
/// using the `N`, `H` and `C` flags left by that operation.
pub fn daa(a: u8, n: bool, h: bool, c: bool) -> (u8, FlagUpdate) {
    let mut correction = 0;
    let mut carry = c;

    if n {
        if c {
            correction |= 0x60;
        }
        if h {
            correction |= 0x06;
        }
    } else {
        if c || a > 0x99 {
            correction |= 0x60;
            carry = true;
        }
        if h || (a & 0x0F) > 0x09 {
            correction |= 0x06;
        }
    }

    let result = if n {
        a.wrapping_sub(correction)
    } else {
        a.wrapping_add(correction)
    };

    (result, FlagUpdate::none().z(result == 0).h(false).c(carry))
}

/// Enumeration of the shift and rotate operations of the prefixed table and their accumulator
/// forms.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Shift {
    /// Rotate left, bit 7 goes to the carry and bit 0.
    Rlc,
    /// Rotate right, bit 0 goes to the carry and bit 7.
    Rrc,
    /// Rotate left through the carry.
    Rl,
    /// Rotate right through the carry.
    Rr,
    /// Arithmetic shift left.
    Sla,
    /// Arithmetic shift right, bit 7 is kept.
    Sra,
    /// Logical shift right.
    Srl,
}

/// Applies the shift to the value. Returns the result and the carry out. Flags other than the
/// carry depend on the instruction form and are left to the caller.
pub fn shift(kind: Shift, value: u8, carry: bool) -> (u8, bool) {
    let carry_in = carry as u8;

    match kind {
        Shift::Rlc => (value.rotate_left(1), value & 0x80 != 0),
        Shift::Rrc => (value.rotate_right(1), value & 0x01 != 0),
        Shift::Rl => ((value << 1) | carry_in, value & 0x80 != 0),
        Shift::Rr => ((value >> 1) | (carry_in << 7), value & 0x01 != 0),
        Shift::Sla => (value << 1, value & 0x80 != 0),
        Shift::Sra => ((value >> 1) | (value & 0x80), value & 0x01 != 0),
        Shift::Srl => (value >> 1, value & 0x01 != 0),
    }
}

/// `SWAP`: exchanges the nibbles.
pub fn swap(value: u8) -> (u8, FlagUpdate) {
    let result = value.rotate_left(4);
    (result, FlagUpdate::all(result == 0, false, false, false))
}

/// `BIT`: tests a bit. The zero flag is set when the bit is clear.
pub fn bit(index: u8, value: u8) -> FlagUpdate {
    FlagUpdate::none()
        .z(value & (1 << index) == 0)
        .n(false)
        .h(true)
}
