//! The CPU register file.
//!
//! Registers are private; every write goes through a setter,
//! which first notifies any watchers registered for that register
//! and then commits the value.

use crate::alu::{CC_C, CC_H, CC_I, CC_N, CC_S, CC_V, CC_X, CC_Z};

use super::mem::Bus;

/// A register that can be watched (see [`RegFile::watch`]).
#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Reg {
    /// Program counter.
    PC,
    /// Stack pointer.
    SP,
    /// Index register X.
    X,
    /// Index register Y.
    Y,
    /// Accumulator A.
    A,
    /// Accumulator B.
    B,
    /// Double accumulator D (A:B).
    ///
    /// Writes through [`RegFile::set_d`] only notify the watchers of D, not those of A and B.
    D,
    /// Condition codes.
    CC,
}
impl Reg {
    const COUNT: usize = 8;

    fn index(self) -> usize {
        match self {
            Reg::PC => 0,
            Reg::SP => 1,
            Reg::X  => 2,
            Reg::Y  => 3,
            Reg::A  => 4,
            Reg::B  => 5,
            Reg::D  => 6,
            Reg::CC => 7,
        }
    }
}

/// A callback invoked with the register file (still holding the old value)
/// and the new value, before a register write is committed.
pub type Watcher = Box<dyn FnMut(&RegFile, u16) + Send>;

/// The register file.
pub struct RegFile {
    pc: u16,
    sp: u16,
    x: u16,
    y: u16,
    a: u8,
    b: u8,
    cc: u8,
    watchers: [Vec<Watcher>; Reg::COUNT],
}

macro_rules! getset {
    ($($get:ident, $set:ident: $t:ty => $reg:ident);+ $(;)?) => {
        $(
            #[doc = concat!("The value of ", stringify!($reg), ".")]
            pub fn $get(&self) -> $t {
                self.$get
            }
            #[doc = concat!("Notifies the watchers of ", stringify!($reg), " and writes it.")]
            pub fn $set(&mut self, val: $t) {
                self.notify(Reg::$reg, val.into());
                self.$get = val;
            }
        )+
    }
}

impl RegFile {
    /// Creates a register file with the reset state (everything zero, CC = `0x55`).
    pub fn new() -> Self {
        Self {
            pc: 0,
            sp: 0,
            x: 0,
            y: 0,
            a: 0,
            b: 0,
            cc: 0x55,
            watchers: Default::default(),
        }
    }

    /// Resets register values, keeping watchers.
    pub fn reset(&mut self) {
        let watchers = std::mem::take(&mut self.watchers);
        *self = Self { watchers, ..Self::new() };
    }

    /// Registers a watcher for a register.
    ///
    /// Watchers are called in registration order.
    pub fn watch(&mut self, reg: Reg, watcher: impl FnMut(&RegFile, u16) + Send + 'static) {
        self.watchers[reg.index()].push(Box::new(watcher));
    }

    fn notify(&mut self, reg: Reg, val: u16) {
        let slot = reg.index();
        if self.watchers[slot].is_empty() { return };

        let mut watchers = std::mem::take(&mut self.watchers[slot]);
        for w in &mut watchers {
            w(self, val);
        }
        self.watchers[slot] = watchers;
    }

    getset! {
        pc, set_pc: u16 => PC;
        sp, set_sp: u16 => SP;
        x,  set_x:  u16 => X;
        y,  set_y:  u16 => Y;
        a,  set_a:  u8  => A;
        b,  set_b:  u8  => B;
        cc, set_cc: u8  => CC;
    }

    /// The value of any register, widened to 16 bits.
    pub fn get(&self, reg: Reg) -> u16 {
        match reg {
            Reg::PC => self.pc,
            Reg::SP => self.sp,
            Reg::X  => self.x,
            Reg::Y  => self.y,
            Reg::A  => self.a.into(),
            Reg::B  => self.b.into(),
            Reg::D  => self.d(),
            Reg::CC => self.cc.into(),
        }
    }

    /// The double accumulator (A in the high byte, B in the low byte).
    pub fn d(&self) -> u16 {
        u16::from_be_bytes([self.a, self.b])
    }
    /// Notifies the watchers of D and splits the value into A and B.
    pub fn set_d(&mut self, val: u16) {
        self.notify(Reg::D, val);
        [self.a, self.b] = val.to_be_bytes();
    }

    fn merge(&mut self, keep: u8, flags: u8) {
        self.set_cc(self.cc & keep | flags & !keep);
    }
    /// Replaces H, N, Z, V and C with the corresponding bits of `flags`.
    pub fn set_hnzvc(&mut self, flags: u8) { self.merge(0xD0, flags) }
    /// Replaces N, Z, V and C.
    pub fn set_nzvc(&mut self, flags: u8) { self.merge(0xF0, flags) }
    /// Replaces N, Z and V.
    pub fn set_nzv(&mut self, flags: u8) { self.merge(0xF1, flags) }
    /// Replaces Z, V and C.
    pub fn set_zvc(&mut self, flags: u8) { self.merge(0xF8, flags) }
    /// Replaces C.
    pub fn set_c(&mut self, flags: u8) { self.merge(!CC_C, flags) }
    /// Replaces I.
    pub fn set_i(&mut self, flags: u8) { self.merge(!CC_I, flags) }
    /// Replaces V.
    pub fn set_v(&mut self, flags: u8) { self.merge(!CC_V, flags) }
    /// Replaces Z.
    pub fn set_z(&mut self, flags: u8) { self.merge(!CC_Z, flags) }
    /// Replaces X.
    pub fn set_x_bit(&mut self, flags: u8) { self.merge(!CC_X, flags) }

    /// Whether C is set.
    pub fn is_carry_set(&self) -> bool { self.cc & CC_C != 0 }
    /// Whether Z is set.
    pub fn is_zero_set(&self) -> bool { self.cc & CC_Z != 0 }
    /// Whether N is set.
    pub fn is_negative_set(&self) -> bool { self.cc & CC_N != 0 }
    /// Whether V is set.
    pub fn is_overflow_set(&self) -> bool { self.cc & CC_V != 0 }
    /// Whether S is set.
    pub fn is_stop_set(&self) -> bool { self.cc & CC_S != 0 }
    /// Whether H is set.
    pub fn is_half_set(&self) -> bool { self.cc & CC_H != 0 }
    /// Whether X (the XIRQ mask) is set.
    pub fn is_x_set(&self) -> bool { self.cc & CC_X != 0 }
    /// Whether I (the IRQ mask) is set.
    pub fn is_i_set(&self) -> bool { self.cc & CC_I != 0 }

    /// Pushes a byte: writes it at SP, then decrements SP.
    pub fn push8(&mut self, bus: &mut impl Bus, val: u8) {
        bus.write_u8(self.sp, val);
        self.set_sp(self.sp.wrapping_sub(1));
    }
    /// Pushes a word so that its high byte sits at the lower address.
    pub fn push16(&mut self, bus: &mut impl Bus, val: u16) {
        bus.write_u16(self.sp.wrapping_sub(1), val);
        self.set_sp(self.sp.wrapping_sub(2));
    }
    /// Pulls a byte: increments SP, then reads at SP.
    pub fn pull8(&mut self, bus: &mut impl Bus) -> u8 {
        self.set_sp(self.sp.wrapping_add(1));
        bus.read_u8(self.sp)
    }
    /// Pulls a word pushed by [`RegFile::push16`].
    pub fn pull16(&mut self, bus: &mut impl Bus) -> u16 {
        let ea = self.sp.wrapping_add(1);
        self.set_sp(self.sp.wrapping_add(2));
        bus.read_u16(ea)
    }
}
impl Default for RegFile {
    fn default() -> Self {
        Self::new()
    }
}
impl std::fmt::Display for RegFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PC-{:04X} A-{:02X} B-{:02X} D-{:04X} X-{:04X} Y-{:04X} SP-{:04X} CCR-{:02X} ",
            self.pc, self.a, self.b, self.d(), self.x, self.y, self.sp, self.cc)?;

        for (bit, name) in "SXHINZVC".chars().enumerate() {
            match self.cc & (0x80 >> bit) != 0 {
                true  => write!(f, "{name}")?,
                false => write!(f, ".")?,
            }
        }
        Ok(())
    }
}
impl std::fmt::Debug for RegFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegFile")
            .field("pc", &self.pc)
            .field("sp", &self.sp)
            .field("x", &self.x)
            .field("y", &self.y)
            .field("a", &self.a)
            .field("b", &self.b)
            .field("cc", &self.cc)
            .finish_non_exhaustive()
    }
}
