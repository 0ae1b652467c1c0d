//! Condition-code arithmetic for the 68HC11.
//!
//! Every operation here is pure: it takes its operands and returns
//! the truncated result along with the condition-code bits it produced.
//! Which of those bits actually land in the CC register is decided by
//! the caller through the merge helpers on [`RegFile`].
//!
//! The flag bits of the CC register are exposed as constants
//! ([`CC_S`], [`CC_X`], [`CC_H`], [`CC_I`], [`CC_N`], [`CC_Z`], [`CC_V`], [`CC_C`]).
//!
//! [`RegFile`]: crate::sim::regs::RegFile

/// Stop disable.
pub const CC_S: u8 = 0x80;
/// XIRQ mask.
pub const CC_X: u8 = 0x40;
/// Half carry (out of bit 3).
pub const CC_H: u8 = 0x20;
/// IRQ mask.
pub const CC_I: u8 = 0x10;
/// Negative.
pub const CC_N: u8 = 0x08;
/// Zero.
pub const CC_Z: u8 = 0x04;
/// Two's complement overflow.
pub const CC_V: u8 = 0x02;
/// Carry/borrow.
pub const CC_C: u8 = 0x01;

/// Interprets an 8-bit value as a two's complement integer.
///
/// # Panics
/// Panics if `val` does not fit in 8 bits.
pub fn twos_c8_to_int(val: u16) -> i16 {
    assert!(val <= 0xFF, "{val:#X} is not an 8-bit value");
    val as u8 as i8 as i16
}
/// Interprets a 16-bit value as a two's complement integer.
pub fn twos_c16_to_int(val: u16) -> i16 {
    val as i16
}
/// Converts an integer into its 8-bit two's complement representation.
///
/// # Panics
/// Panics if `val` is outside `-128..=127`.
pub fn int_to_twos_c8(val: i32) -> u8 {
    assert!((-128..=127).contains(&val), "{val} does not fit in a signed byte");
    val as i8 as u8
}
/// Converts an integer into its 16-bit two's complement representation.
///
/// # Panics
/// Panics if `val` is outside `-32768..=32767`.
pub fn int_to_twos_c16(val: i32) -> u16 {
    assert!((-32768..=32767).contains(&val), "{val} does not fit in a signed word");
    val as i16 as u16
}

fn nz8(r: i32) -> u8 {
    let mut flags = 0;
    if r & 0x80 != 0 { flags |= CC_N };
    if r & 0xFF == 0 { flags |= CC_Z };
    flags
}
fn nz16(r: i32) -> u8 {
    let mut flags = 0;
    if r & 0x8000 != 0 { flags |= CC_N };
    if r & 0xFFFF == 0 { flags |= CC_Z };
    flags
}

// `u2` is wide so that ADC/SBC can pass `operand + carry` (up to 0x100) unchanged.
fn add8_wide(u1: i32, u2: i32) -> (u8, u8) {
    let r = u1 + u2;
    let mut flags = nz8(r);
    if r & 0xFF != r { flags |= CC_C };
    if (u1 & u2 | u1 & !r | u2 & !r) & 0x08 != 0 { flags |= CC_H };
    if (u1 & u2 & !r | !u1 & !u2 & r) & 0x80 != 0 { flags |= CC_V };
    (r as u8, flags)
}
fn sub8_wide(u1: i32, u2: i32) -> (u8, u8) {
    let r = u1 - u2;
    let mut flags = nz8(r);
    if r & 0xFF != r { flags |= CC_C };
    if (u1 & !u2 & !r | !u1 & u2 & r) & 0x80 != 0 { flags |= CC_V };
    (r as u8, flags)
}

/// 8-bit addition. Produces H, N, Z, V, C.
pub fn add8(a: u8, b: u8) -> (u8, u8) {
    add8_wide(a.into(), b.into())
}
/// 8-bit addition with an incoming carry (ADCA/ADCB).
pub fn adc8(a: u8, b: u8, carry: bool) -> (u8, u8) {
    add8_wide(a.into(), i32::from(b) + i32::from(carry))
}
/// 8-bit subtraction. Produces N, Z, V, C (borrow).
pub fn sub8(a: u8, b: u8) -> (u8, u8) {
    sub8_wide(a.into(), b.into())
}
/// 8-bit subtraction with an incoming borrow (SBCA/SBCB).
pub fn sbc8(a: u8, b: u8, carry: bool) -> (u8, u8) {
    sub8_wide(a.into(), i32::from(b) + i32::from(carry))
}

/// 16-bit addition. Produces N, Z, V, C.
pub fn add16(a: u16, b: u16) -> (u16, u8) {
    let (u1, u2) = (i32::from(a), i32::from(b));
    let r = u1 + u2;
    let mut flags = nz16(r);
    if r & 0xFFFF != r { flags |= CC_C };
    if (u1 & u2 & !r | !u1 & !u2 & r) & 0x8000 != 0 { flags |= CC_V };
    (r as u16, flags)
}
/// 16-bit subtraction. Produces N, Z, V, C.
pub fn sub16(a: u16, b: u16) -> (u16, u8) {
    let (u1, u2) = (i32::from(a), i32::from(b));
    let r = u1 - u2;
    let mut flags = nz16(r);
    if r & 0xFFFF != r { flags |= CC_C };
    if (u1 & !u2 & !r | !u1 & u2 & r) & 0x8000 != 0 { flags |= CC_V };
    (r as u16, flags)
}

/// Bitwise AND. Produces N, Z (V is left clear).
pub fn and8(a: u8, b: u8) -> (u8, u8) {
    let r = a & b;
    (r, test_nz8(r))
}
/// Bitwise OR. Produces N, Z (V is left clear).
pub fn or8(a: u8, b: u8) -> (u8, u8) {
    let r = a | b;
    (r, test_nz8(r))
}
/// Bitwise exclusive OR. Produces N, Z (V is left clear).
pub fn eor8(a: u8, b: u8) -> (u8, u8) {
    let r = a ^ b;
    (r, test_nz8(r))
}

// N ^ C, as used by every shift and rotate.
fn shift_flags(nz: u8, carry: bool) -> u8 {
    let mut flags = nz;
    if carry { flags |= CC_C };
    if (flags & CC_N != 0) ^ carry { flags |= CC_V };
    flags
}

/// Arithmetic shift left.
pub fn asl8(val: u8) -> (u8, u8) {
    let r = val << 1;
    (r, shift_flags(test_nz8(r), val & 0x80 != 0))
}
/// Arithmetic shift right (bit 7 is preserved).
pub fn asr8(val: u8) -> (u8, u8) {
    let r = val >> 1 | val & 0x80;
    (r, shift_flags(test_nz8(r), val & 0x01 != 0))
}
/// Logical shift right. N is always clear, so V mirrors C.
pub fn lsr8(val: u8) -> (u8, u8) {
    let r = val >> 1;
    let mut flags = test_nz8(r);
    if val & 0x01 != 0 { flags |= CC_C | CC_V };
    (r, flags)
}
/// 16-bit arithmetic shift left (LSLD).
pub fn asl16(val: u16) -> (u16, u8) {
    let r = val << 1;
    (r, shift_flags(test_nz16(r), val & 0x8000 != 0))
}
/// 16-bit logical shift right (LSRD).
pub fn lsr16(val: u16) -> (u16, u8) {
    let r = val >> 1;
    let mut flags = test_nz16(r);
    if val & 0x0001 != 0 { flags |= CC_C | CC_V };
    (r, flags)
}
/// Rotate left through carry.
pub fn rol8(val: u8, carry: bool) -> (u8, u8) {
    let r = val << 1 | u8::from(carry);
    (r, shift_flags(test_nz8(r), val & 0x80 != 0))
}
/// Rotate right through carry.
pub fn ror8(val: u8, carry: bool) -> (u8, u8) {
    let r = val >> 1 | u8::from(carry) << 7;
    (r, shift_flags(test_nz8(r), val & 0x01 != 0))
}

/// Two's complement negation.
pub fn neg8(val: u8) -> (u8, u8) {
    let r = val.wrapping_neg();
    let mut flags = test_nz8(r);
    if r == 0x80 { flags |= CC_V };
    if r != 0x00 { flags |= CC_C };
    (r, flags)
}

/// N and Z of an 8-bit value.
pub fn test_nz8(val: u8) -> u8 {
    nz8(val.into())
}
/// N and Z of a 16-bit value.
pub fn test_nz16(val: u16) -> u8 {
    nz16(val.into())
}

#[cfg(test)]
mod tests {
    use quickcheck::quickcheck;

    use super::*;

    quickcheck! {
        fn add_then_sub_recovers_operand(a: u8, b: u8) -> bool {
            let (sum, _) = add8(a, b);
            sub8(sum, b).0 == a
        }

        fn adc_without_carry_is_add(a: u8, b: u8) -> bool {
            adc8(a, b, false) == add8(a, b)
        }

        fn sub16_matches_wrapping(a: u16, b: u16) -> bool {
            let (r, flags) = sub16(a, b);
            r == a.wrapping_sub(b) && (flags & CC_C != 0) == (b > a)
        }

        fn rotate_left_then_right_is_identity(v: u8, c: bool) -> bool {
            let (r, flags) = rol8(v, c);
            ror8(r, flags & CC_C != 0).0 == v
        }
    }

    #[test]
    fn add8_boundaries() {
        assert_eq!(add8(0, 0), (0, CC_Z));
        assert_eq!(add8(0xFF, 1), (0, CC_Z | CC_C | CC_H));
        assert_eq!(add8(0x7F, 1), (0x80, CC_N | CC_V | CC_H));
        assert_eq!(add8(0x80, 0x80), (0, CC_Z | CC_V | CC_C));
        assert_eq!(add8(0x08, 0x08), (0x10, CC_H));
    }

    #[test]
    fn adc8_carries_through_ff() {
        // 0xFF + carry is a full 0x100, which must still carry out of bit 7.
        let (r, flags) = adc8(0x01, 0xFF, true);
        assert_eq!(r, 0x01);
        assert_ne!(flags & CC_C, 0);
    }

    #[test]
    fn sub8_borrow_and_overflow() {
        assert_eq!(sub8(0, 1), (0xFF, CC_N | CC_C));
        assert_eq!(sub8(0x80, 1), (0x7F, CC_V));
        assert_eq!(sub8(5, 5), (0, CC_Z));
        assert_eq!(sbc8(5, 4, true), (0, CC_Z));
    }

    #[test]
    fn add16_flags() {
        assert_eq!(add16(0xFFFF, 1), (0, CC_Z | CC_C));
        assert_eq!(add16(0x7FFF, 1), (0x8000, CC_N | CC_V));
    }

    #[test]
    fn shifts() {
        assert_eq!(asl8(0x80), (0x00, CC_Z | CC_C | CC_V));
        assert_eq!(asl8(0x40), (0x80, CC_N | CC_V));
        assert_eq!(asr8(0x81), (0xC0, CC_N | CC_C));
        assert_eq!(lsr8(0x01), (0x00, CC_Z | CC_C | CC_V));
        assert_eq!(lsr16(0x8000), (0x4000, 0));
        assert_eq!(asl16(0x8000), (0, CC_Z | CC_C | CC_V));
        assert_eq!(ror8(0x01, true), (0x80, CC_N | CC_C));
        assert_eq!(rol8(0x80, false), (0x00, CC_Z | CC_C | CC_V));
    }

    #[test]
    fn neg8_flags() {
        assert_eq!(neg8(0), (0, CC_Z));
        assert_eq!(neg8(1), (0xFF, CC_N | CC_C));
        assert_eq!(neg8(0x80), (0x80, CC_N | CC_V | CC_C));
    }

    #[test]
    fn logic_ops() {
        assert_eq!(and8(0xF0, 0x0F), (0, CC_Z));
        assert_eq!(or8(0x80, 0x01), (0x81, CC_N));
        assert_eq!(eor8(0xFF, 0xFF), (0, CC_Z));
    }

    #[test]
    fn twos_complement_conversions() {
        assert_eq!(twos_c8_to_int(0xFF), -1);
        assert_eq!(twos_c8_to_int(0x7F), 127);
        assert_eq!(twos_c16_to_int(0x8000), -32768);
        assert_eq!(int_to_twos_c8(-128), 0x80);
        assert_eq!(int_to_twos_c16(-1), 0xFFFF);
    }

    #[test]
    #[should_panic]
    fn twos_complement_out_of_range() {
        int_to_twos_c8(128);
    }
}
