//! Memory handling for the 68HC11 simulator.
//!
//! This module consists of:
//! - [`Bus`]: The byte/word access interface the CPU and stack operations are written against.
//! - [`RawMemory`]: The 64K byte array and register window, without any side effects.
//! - [`Memory`]: [`RawMemory`] plus the memory filters that give device registers their side effects.
//! - [`SpecialReg`]: The named registers of the relocatable 64-byte register window.
//!
//! # Filters
//!
//! A [`MemFilter`] covers an address range and names up to three handlers
//! (read/write, read-only, write-only). When a filtered access happens through [`Memory`],
//! every handler registered for the accessed address is called *before* the value is read or committed,
//! in filter registration order. Handlers are identified by a [`HandlerId`] and are
//! executed by an [`AccessHandler`], which only ever receives a [`RawMemory`].
//! Since [`RawMemory`] has no filter dispatch, a handler cannot recursively trigger filters.

use std::collections::HashMap;
use std::fmt::Write as _;

use rand::rngs::StdRng;
use rand::Rng;

const N: usize = 1 << 16;

/// Size of the register window.
pub const REG_WINDOW: u16 = 0x40;
/// Location of the register window after reset.
pub const DEFAULT_REG_BASE: u16 = 0x1000;

/// Byte and word access to the 64K address space.
///
/// Words are big-endian. A word access at `0xFFFF` wraps its low byte around to `0x0000`.
pub trait Bus {
    /// Reads an unsigned byte.
    fn read_u8(&mut self, addr: u16) -> u8;
    /// Reads an unsigned big-endian word.
    fn read_u16(&mut self, addr: u16) -> u16;
    /// Writes a byte.
    fn write_u8(&mut self, addr: u16, val: u8);
    /// Writes a big-endian word.
    fn write_u16(&mut self, addr: u16, val: u16);

    /// Reads a signed byte.
    fn read_i8(&mut self, addr: u16) -> i8 {
        self.read_u8(addr) as i8
    }
    /// Reads a signed word.
    fn read_i16(&mut self, addr: u16) -> i16 {
        self.read_u16(addr) as i16
    }
    /// Writes a signed byte.
    fn write_i8(&mut self, addr: u16, val: i8) {
        self.write_u8(addr, val as u8)
    }
    /// Writes a signed word.
    fn write_i16(&mut self, addr: u16, val: i16) {
        self.write_u16(addr, val as u16)
    }
}

macro_rules! special_regs {
    ($($name:ident = $offset:literal, $reset:literal);+ $(;)?) => {
        /// A named register of the 64-byte register window.
        #[allow(clippy::upper_case_acronyms)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum SpecialReg {
            $(
                #[allow(missing_docs)]
                $name
            ),+
        }
        impl SpecialReg {
            /// Every register, in window order.
            pub const ALL: &'static [SpecialReg] = &[$(Self::$name),+];

            /// Offset of this register from the register base.
            pub fn offset(self) -> u16 {
                match self {
                    $(Self::$name => $offset),+
                }
            }
            /// Value this register takes on reset.
            pub fn reset_value(self) -> u8 {
                match self {
                    $(Self::$name => $reset),+
                }
            }
            /// The register's name.
            pub fn name(self) -> &'static str {
                match self {
                    $(Self::$name => stringify!($name)),+
                }
            }
        }
    }
}
special_regs! {
    PORTA  = 0x00, 0x00;
    PIOC   = 0x02, 0x03;
    PORTC  = 0x03, 0x00;
    PORTB  = 0x04, 0x00;
    PORTCL = 0x05, 0x00;
    DDRC   = 0x07, 0x00;
    PORTD  = 0x08, 0x00;
    DDRD   = 0x09, 0x00;
    PORTE  = 0x0A, 0x00;
    CFORC  = 0x0B, 0x00;
    OC1M   = 0x0C, 0x00;
    OC1D   = 0x0D, 0x00;
    TCNT   = 0x0E, 0x00;
    TIC1   = 0x10, 0x00;
    TIC2   = 0x12, 0x00;
    TIC3   = 0x14, 0x00;
    TOC1   = 0x16, 0x00;
    TOC2   = 0x18, 0x00;
    TOC3   = 0x1A, 0x00;
    TOC4   = 0x1C, 0x00;
    TOC5   = 0x1E, 0x00;
    TCTL1  = 0x20, 0x00;
    TCTL2  = 0x21, 0x00;
    TMSK1  = 0x22, 0x00;
    TFLG1  = 0x23, 0x00;
    TMSK2  = 0x24, 0x00;
    TFLG2  = 0x25, 0x00;
    PACTL  = 0x26, 0x00;
    PACNT  = 0x27, 0x00;
    SPCR   = 0x28, 0x04;
    SPSR   = 0x29, 0x00;
    SPDR   = 0x2A, 0x00;
    BAUD   = 0x2B, 0x00;
    SCCR1  = 0x2C, 0x00;
    SCCR2  = 0x2D, 0x00;
    SCSR   = 0x2E, 0xC0;
    ADCTL  = 0x30, 0x80;
    ADR1   = 0x31, 0x00;
    ADR2   = 0x32, 0x00;
    ADR3   = 0x33, 0x00;
    ADR4   = 0x34, 0x00;
    BPROT  = 0x35, 0x1F;
    EPROG  = 0x36, 0x00;
    OPTION = 0x39, 0x10;
    COPRST = 0x3A, 0x00;
    PPROG  = 0x3B, 0x00;
    HPRIO  = 0x3C, 0x06;
    INIT   = 0x3D, 0x01;
    TEST1  = 0x3E, 0x00;
    CONFIG = 0x3F, 0x02;
}
impl SpecialReg {
    /// Input capture 4 shares its location with output compare 5.
    pub const TIC4: SpecialReg = SpecialReg::TOC5;
}
impl std::fmt::Display for SpecialReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.name())
    }
}

/// Trait that describes types that can be used to fill memory on machine creation.
pub trait ByteFiller {
    /// Generate the data.
    fn generate(&mut self) -> u8;
}
impl ByteFiller for () {
    /// This creates unseeded, non-deterministic values.
    fn generate(&mut self) -> u8 {
        rand::random()
    }
}
impl ByteFiller for u8 {
    /// Sets each byte to the given value.
    fn generate(&mut self) -> u8 {
        *self
    }
}
impl ByteFiller for StdRng {
    /// This creates values from the standard random number generator.
    ///
    /// This can be used to create deterministic, seeded values.
    fn generate(&mut self) -> u8 {
        self.gen()
    }
}

/// Strategy used to fill the memory of the [`Simulator`] when it is created.
///
/// The register window is always set to its reset values, regardless of strategy.
///
/// [`Simulator`]: super::Simulator
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum MachineInitStrategy {
    /// Initializes each byte randomly and non-deterministically.
    Unseeded,

    /// Initializes each byte randomly and deterministically.
    Seeded {
        /// The seed the RNG was initialized with.
        seed: u64
    },

    /// Initializes each byte to a known value.
    Known {
        /// The value to initialize each byte to.
        value: u8
    }
}
impl Default for MachineInitStrategy {
    fn default() -> Self {
        MachineInitStrategy::Known { value: 0 }
    }
}
impl MachineInitStrategy {
    pub(super) fn generator(&self) -> impl ByteFiller {
        use rand::SeedableRng;

        match self {
            MachineInitStrategy::Unseeded => MIGenerator::Unseeded,
            MachineInitStrategy::Seeded { seed } => MIGenerator::Seeded(Box::new(StdRng::seed_from_u64(*seed))),
            MachineInitStrategy::Known { value } => MIGenerator::Known(*value),
        }
    }
}

enum MIGenerator {
    Unseeded,
    Seeded(Box<StdRng>),
    Known(u8)
}
impl ByteFiller for MIGenerator {
    fn generate(&mut self) -> u8 {
        match self {
            MIGenerator::Unseeded  => ().generate(),
            MIGenerator::Seeded(r) => r.generate(),
            MIGenerator::Known(k)  => k.generate(),
        }
    }
}

/// The 64K byte array, along with the location of the register window.
///
/// Accesses through this struct never trigger filters.
/// This is the only view of memory filter handlers get.
pub struct RawMemory {
    data: Box<[u8; N]>,
    reg_base: u16,
}
impl RawMemory {
    /// Creates a new memory filled by the provided filler,
    /// with the register base at `0x1000`.
    ///
    /// Unlike [`Memory::new`], this does not write the register reset values.
    pub fn new(filler: &mut impl ByteFiller) -> Self {
        Self {
            data: std::iter::repeat_with(|| filler.generate())
                .take(N)
                .collect::<Box<_>>()
                .try_into()
                .unwrap_or_else(|_| unreachable!("iterator should have had {N} elements")),
            reg_base: DEFAULT_REG_BASE,
        }
    }

    /// Reads a byte.
    pub fn read_u8(&self, addr: u16) -> u8 {
        self.data[usize::from(addr)]
    }
    /// Reads a big-endian word (the low byte of a word at `0xFFFF` comes from `0x0000`).
    pub fn read_u16(&self, addr: u16) -> u16 {
        u16::from_be_bytes([self.read_u8(addr), self.read_u8(addr.wrapping_add(1))])
    }
    /// Writes a byte.
    pub fn write_u8(&mut self, addr: u16, val: u8) {
        self.data[usize::from(addr)] = val;
    }
    /// Writes a big-endian word (the low byte of a word at `0xFFFF` goes to `0x0000`).
    pub fn write_u16(&mut self, addr: u16, val: u16) {
        let [hi, lo] = val.to_be_bytes();
        self.write_u8(addr, hi);
        self.write_u8(addr.wrapping_add(1), lo);
    }

    /// The current base address of the register window.
    pub fn reg_base(&self) -> u16 {
        self.reg_base
    }
    /// The address of a special register at the current register base.
    pub fn reg_addr(&self, reg: SpecialReg) -> u16 {
        self.reg_base.wrapping_add(reg.offset())
    }
    /// Reads a special register.
    pub fn reg(&self, reg: SpecialReg) -> u8 {
        self.read_u8(self.reg_addr(reg))
    }
    /// Writes a special register.
    pub fn set_reg(&mut self, reg: SpecialReg, val: u8) {
        self.write_u8(self.reg_addr(reg), val)
    }
    /// Reads a 16-bit special register (e.g., `TCNT`).
    pub fn reg16(&self, reg: SpecialReg) -> u16 {
        self.read_u16(self.reg_addr(reg))
    }
    /// Writes a 16-bit special register.
    pub fn set_reg16(&mut self, reg: SpecialReg, val: u16) {
        self.write_u16(self.reg_addr(reg), val)
    }

    /// Checks whether an address falls in the register window.
    pub fn in_reg_window(&self, addr: u16) -> bool {
        addr.wrapping_sub(self.reg_base) < REG_WINDOW
    }
}
impl Bus for RawMemory {
    fn read_u8(&mut self, addr: u16) -> u8 {
        RawMemory::read_u8(self, addr)
    }
    fn read_u16(&mut self, addr: u16) -> u16 {
        RawMemory::read_u16(self, addr)
    }
    fn write_u8(&mut self, addr: u16, val: u8) {
        RawMemory::write_u8(self, addr, val)
    }
    fn write_u16(&mut self, addr: u16, val: u16) {
        RawMemory::write_u16(self, addr, val)
    }
}
impl<B: Bus + ?Sized> Bus for &mut B {
    fn read_u8(&mut self, addr: u16) -> u8 {
        (**self).read_u8(addr)
    }
    fn read_u16(&mut self, addr: u16) -> u16 {
        (**self).read_u16(addr)
    }
    fn write_u8(&mut self, addr: u16, val: u8) {
        (**self).write_u8(addr, val)
    }
    fn write_u16(&mut self, addr: u16, val: u16) {
        (**self).write_u16(addr, val)
    }
}
impl std::fmt::Debug for RawMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawMemory")
            .field("reg_base", &format_args!("{:#06X}", self.reg_base))
            .finish_non_exhaustive()
    }
}

/// Identifies a filter handler: the installed peripheral which owns it,
/// and a tag the peripheral uses to tell its own handlers apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId {
    /// Index of the owning peripheral.
    pub owner: usize,
    /// Peripheral-defined tag.
    pub tag: u16,
}

/// The handlers attached to a filter, as tags of the owning peripheral.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Handlers {
    /// Called on reads and writes.
    pub rw: Option<u16>,
    /// Called on reads only.
    pub ro: Option<u16>,
    /// Called on writes only.
    pub wo: Option<u16>,
}
impl Handlers {
    /// A read-only handler.
    pub fn read(tag: u16) -> Self {
        Self { ro: Some(tag), ..Default::default() }
    }
    /// A write-only handler.
    pub fn write(tag: u16) -> Self {
        Self { wo: Some(tag), ..Default::default() }
    }
    /// A handler called for both reads and writes.
    pub fn read_write(tag: u16) -> Self {
        Self { rw: Some(tag), ..Default::default() }
    }
    /// Adds a write-only handler.
    pub fn and_write(self, tag: u16) -> Self {
        Self { wo: Some(tag), ..self }
    }
}

/// A memory filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemFilter {
    /// Lowest address covered.
    pub low: u16,
    /// Highest address covered (inclusive).
    pub high: u16,
    /// The handlers this filter calls.
    pub handlers: Handlers,
    owner: usize,
}
impl MemFilter {
    fn ids(&self, dir: AccessKind) -> impl Iterator<Item = HandlerId> {
        let Handlers { rw, ro, wo } = self.handlers;
        let second = match dir {
            AccessKind::Read  => ro,
            AccessKind::Write => wo,
        };
        let owner = self.owner;
        [rw, second].into_iter()
            .flatten()
            .map(move |tag| HandlerId { owner, tag })
    }
}

/// Direction of a memory access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    #[allow(missing_docs)]
    Read,
    #[allow(missing_docs)]
    Write
}

/// A memory access seen by a filter handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Access {
    /// The accessed address (the first byte, for word accesses).
    pub addr: u16,
    /// Width of the access, 8 or 16.
    pub bits: u8,
    /// The value being written, or 0 for reads.
    pub value: u16,
    /// Direction of the access.
    pub kind: AccessKind,
}
impl Access {
    /// Whether this is a write access.
    pub fn is_write(&self) -> bool {
        self.kind == AccessKind::Write
    }
    /// The byte written to the first address of the access.
    pub fn first_byte(&self) -> u8 {
        match self.bits {
            16 => (self.value >> 8) as u8,
            _  => self.value as u8
        }
    }
}

/// Executes filter handlers.
pub trait AccessHandler {
    /// Runs the handler identified by `id`.
    fn on_access(&mut self, id: HandlerId, access: Access, mem: &mut RawMemory);
}
impl AccessHandler for () {
    fn on_access(&mut self, _id: HandlerId, _access: Access, _mem: &mut RawMemory) {}
}
impl<F: FnMut(HandlerId, Access, &mut RawMemory)> AccessHandler for F {
    fn on_access(&mut self, id: HandlerId, access: Access, mem: &mut RawMemory) {
        self(id, access, mem)
    }
}

/// Memory.
///
/// This can be addressed with any `u16` (16-bit address).
///
/// Note that this struct provides two methods of accessing memory:
/// - [`Memory::raw`] and [`Memory::raw_mut`]: direct access to memory values,
///     which do not trigger any filters.
/// - [`Memory::read_u8`], [`Memory::write_u8`] (and the 16-bit versions):
///     accesses which call the filters' handlers through an [`AccessHandler`].
///
/// The `INIT` register is handled by memory itself:
/// reading it reports the register base's high nibble in its low nibble,
/// and writing it moves the register window (see [`Memory::map_registers`]).
///
/// ```
/// use hc11_sim::sim::mem::{Memory, SpecialReg};
///
/// let mut mem = Memory::new(&mut 0u8);
/// assert_eq!(mem.raw().reg(SpecialReg::HPRIO), 0x06);
///
/// mem.write_u8(0x103D, 0x02, &mut ());
/// assert_eq!(mem.raw().reg_base(), 0x2000);
/// assert_eq!(mem.read_u8(0x203D, &mut ()), 0x02);
/// ```
pub struct Memory {
    raw: RawMemory,
    filters: Vec<MemFilter>,
    index: HashMap<u16, Vec<usize>>,
}
impl Memory {
    /// Creates a new memory, filled by the provided filler.
    /// The register window is placed at `0x1000` and holds the reset values.
    pub fn new(filler: &mut impl ByteFiller) -> Self {
        let mut mem = Self {
            raw: RawMemory::new(filler),
            filters: vec![],
            index: HashMap::new(),
        };
        mem.reset_registers();
        mem
    }

    /// Direct access to memory.
    pub fn raw(&self) -> &RawMemory {
        &self.raw
    }
    /// Direct mutable access to memory.
    pub fn raw_mut(&mut self) -> &mut RawMemory {
        &mut self.raw
    }

    /// Writes the reset values of every special register
    /// into the register window at its current location.
    pub fn reset_registers(&mut self) {
        for &reg in SpecialReg::ALL {
            self.raw.set_reg(reg, reg.reset_value());
        }
    }

    /// Adds a filter, owned by the peripheral at index `owner`.
    pub fn add_filter(&mut self, low: u16, high: u16, owner: usize, handlers: Handlers) {
        assert!(low <= high, "filter range {low:#06X}-{high:#06X} is empty");
        let ix = self.filters.len();
        self.filters.push(MemFilter { low, high, handlers, owner });
        for addr in low..=high {
            self.index.entry(addr).or_default().push(ix);
        }
    }
    /// The filters, in registration order.
    pub fn filters(&self) -> &[MemFilter] {
        &self.filters
    }
    fn rebuild_index(&mut self) {
        self.index.clear();
        for (ix, f) in self.filters.iter().enumerate() {
            for addr in f.low..=f.high {
                self.index.entry(addr).or_default().push(ix);
            }
        }
    }

    /// Moves the register window to `base`.
    ///
    /// `base` is truncated to a 4K boundary, as the `INIT` register
    /// can only select the upper nibble of the base address.
    ///
    /// Filters starting inside the old window move with it,
    /// the window's 64 bytes are copied to the new location,
    /// and the old location is zeroed.
    pub fn map_registers(&mut self, base: u16) {
        let base = base & 0xF000;
        let old = self.raw.reg_base;
        if base == old { return };

        let delta = base.wrapping_sub(old);
        for f in &mut self.filters {
            if self.raw.in_reg_window(f.low) {
                f.low = f.low.wrapping_add(delta);
                f.high = f.high.wrapping_add(delta);
            }
        }
        self.rebuild_index();

        let (old, new) = (usize::from(old), usize::from(base));
        let len = usize::from(REG_WINDOW);
        self.raw.data.copy_within(old..old + len, new);
        self.raw.data[old..old + len].fill(0);
        self.raw.reg_base = base;

        log::debug!("register window moved from {old:#06X} to {new:#06X}");
    }

    fn dispatch(&mut self, access: Access, handler: &mut impl AccessHandler) {
        let Some(slots) = self.index.get(&access.addr) else { return };
        for &ix in slots {
            for id in self.filters[ix].ids(access.kind) {
                handler.on_access(id, access, &mut self.raw);
            }
        }
    }

    fn before_read(&mut self, addr: u16, bits: u8, handler: &mut impl AccessHandler) {
        if addr == self.raw.reg_addr(SpecialReg::INIT) {
            let val = self.raw.read_u8(addr) & 0xF0 | (self.raw.reg_base >> 12) as u8;
            self.raw.write_u8(addr, val);
        }
        self.dispatch(Access { addr, bits, value: 0, kind: AccessKind::Read }, handler);
    }
    // Returns the address the write should commit to,
    // which differs from `addr` if the write moved the register window.
    fn before_write(&mut self, addr: u16, bits: u8, value: u16, handler: &mut impl AccessHandler) -> u16 {
        let access = Access { addr, bits, value, kind: AccessKind::Write };
        self.dispatch(access, handler);
        if addr == self.raw.reg_addr(SpecialReg::INIT) {
            self.map_registers(u16::from(access.first_byte() & 0x0F) << 12);
            return self.raw.reg_addr(SpecialReg::INIT);
        }
        addr
    }

    /// Reads a byte, calling filter handlers.
    pub fn read_u8(&mut self, addr: u16, handler: &mut impl AccessHandler) -> u8 {
        self.before_read(addr, 8, handler);
        self.raw.read_u8(addr)
    }
    /// Reads a word, calling filter handlers registered at its first address.
    pub fn read_u16(&mut self, addr: u16, handler: &mut impl AccessHandler) -> u16 {
        self.before_read(addr, 16, handler);
        self.raw.read_u16(addr)
    }
    /// Writes a byte, calling filter handlers before the value is committed.
    pub fn write_u8(&mut self, addr: u16, val: u8, handler: &mut impl AccessHandler) {
        let addr = self.before_write(addr, 8, val.into(), handler);
        self.raw.write_u8(addr, val)
    }
    /// Writes a word, calling filter handlers registered at its first address
    /// before the value is committed.
    pub fn write_u16(&mut self, addr: u16, val: u16, handler: &mut impl AccessHandler) {
        let addr = self.before_write(addr, 16, val, handler);
        self.raw.write_u16(addr, val)
    }

    /// Renders `low..=high` as a hex and ASCII dump in rows of 16 bytes.
    ///
    /// Rows are aligned on 16-byte boundaries; a partial first row is indented.
    /// This reads memory without triggering filters.
    pub fn display8(&self, low: u16, high: u16) -> String {
        let mut out = String::new();
        let mut row_start = u32::from(low);
        let mut skip = usize::from(low % 16);
        let mut ix = skip;

        let _ = write!(out, "{low:04X}: {}", "   ".repeat(skip));
        for addr in u32::from(low)..=u32::from(high) {
            let _ = write!(out, "{:02X} ", self.raw.read_u8(addr as u16));
            ix += 1;
            if ix == 16 {
                out.push_str("| ");
                self.push_ascii(&mut out, row_start, addr, skip);
                out.push('\n');
                if addr < u32::from(high) {
                    let _ = write!(out, "{:04X}: ", addr + 1);
                }
                row_start = addr + 1;
                skip = 0;
                ix = 0;
            }
        }
        if ix != 0 {
            out.push_str(&"   ".repeat(16 - ix));
            out.push_str("| ");
            self.push_ascii(&mut out, row_start, u32::from(high), skip);
            out.push('\n');
        }
        out
    }
    fn push_ascii(&self, out: &mut String, start: u32, end: u32, skip: usize) {
        out.push_str(&" ".repeat(skip));
        out.extend((start..=end).map(|addr| match self.raw.read_u8(addr as u16) {
            c @ 0x20..=0x7E => char::from(c),
            _ => '.',
        }));
    }
}
impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memory")
            .field("raw", &self.raw)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}
