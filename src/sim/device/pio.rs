//! Parallel I/O ports.
//!
//! This peripheral handles:
//! - reads and writes of ports A through E,
//! - port A pins driven by output compares,
//! - edge detection on the input capture pins,
//! - the pulse accumulator.
//!
//! Ports B and C are always general purpose I/O (single-chip mode),
//! all of port D is general purpose I/O, and all of port E is general purpose input.
//! The timer keeps the input capture and pulse accumulator flags.
//!
//! Each port has an input latch (driven by [`Stimulus`]es), a write latch (written by software)
//! and, where the port can drive pins, an output latch (what is actually on the pins).
//! Pin changes are reported to a [`WaveformSink`].
//!
//! # Port A
//!
//! - Bits 0-2 are inputs.
//! - Bits 4-6 read what is driven on the pin, which is either the write latch
//!     or whatever the output compare circuitry last drove.
//! - Bit 7 is an output if `DDRA7` is set. Otherwise it is an input.
//! - Bit 3 is an output if `DDRA3` is set, or if output compare 5 or 1 currently owns it.
//!     Otherwise it is an input.

use std::collections::VecDeque;
use std::str::FromStr;

use crossbeam_channel as cbc;

use crate::sim::events::{Event, EventKind};
use crate::sim::mem::{Access, AccessKind, Handlers, SpecialReg};

use super::{Installer, PeriphCtx, Peripheral};

// PORTA pins
const PA7: u8 = 0x80; // also OC1
const OC2: u8 = 0x40;
const OC3: u8 = 0x20;
const OC4: u8 = 0x10;
const OC5: u8 = 0x08; // also IC4

// PACTL
const DDRA7: u8 = 0x80;
const PAEN: u8  = 0x40;
const PAMOD: u8 = 0x20;
const PEDGE: u8 = 0x10;
const DDRA3: u8 = 0x08;
const I4_O5: u8 = 0x04;

// TCTL1: OMn:OLn pairs for OC2..OC5, from the top
const OMOL: [(u8, u8); 4] = [(0x80, 0x40), (0x20, 0x10), (0x08, 0x04), (0x02, 0x01)];

// Number of cycles per gated pulse accumulator count (E / 64)
const GATE_PERIOD: u32 = 64;

mod tag {
    pub const PORTA: u16 = 0;
    pub const PORTB: u16 = 1;
    pub const PORTC: u16 = 2;
    pub const PORTD: u16 = 3;
    pub const PORTE: u16 = 4;
    pub const DDRC: u16  = 5;
    pub const DDRD: u16  = 6;
    pub const OC1M: u16  = 7;
    pub const PACTL: u16 = 8;
    pub const TCTL1: u16 = 9;
    pub const PACNT: u16 = 10;
}

/// A parallel I/O port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Port {
    #[allow(missing_docs)]
    A,
    #[allow(missing_docs)]
    B,
    #[allow(missing_docs)]
    C,
    #[allow(missing_docs)]
    D,
    #[allow(missing_docs)]
    E,
}

/// A port pin, written `PA0` through `PE7`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pin {
    /// The port.
    pub port: Port,
    /// The bit (0-7).
    pub bit: u8,
}
impl Pin {
    /// Creates a pin, if `bit` is a valid bit number.
    pub fn new(port: Port, bit: u8) -> Option<Self> {
        (bit < 8).then_some(Self { port, bit })
    }
    fn mask(self) -> u8 {
        1 << self.bit
    }
}
impl std::fmt::Display for Pin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "P{:?}{}", self.port, self.bit)
    }
}
/// Error from parsing a [`Pin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinParseError(String);
impl std::fmt::Display for PinParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid pin {:?}, expected PA0-PE7", self.0)
    }
}
impl std::error::Error for PinParseError {}

impl FromStr for Pin {
    type Err = PinParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || PinParseError(s.to_string());

        let upper = s.to_ascii_uppercase();
        let &[b'P', port, bit] = upper.as_bytes() else { return Err(err()) };
        let port = match port {
            b'A' => Port::A,
            b'B' => Port::B,
            b'C' => Port::C,
            b'D' => Port::D,
            b'E' => Port::E,
            _ => return Err(err())
        };
        let bit = char::from(bit).to_digit(10).ok_or_else(err)?;
        Pin::new(port, bit as u8).ok_or_else(err)
    }
}

/// An input applied to a pin at a given cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stimulus {
    /// The simulator cycle to apply this at.
    pub at: u64,
    /// The pin to drive.
    pub pin: Pin,
    /// The level to drive the pin to.
    pub level: bool,
}

/// Receives pin changes, to draw waveforms.
pub trait WaveformSink: Send + 'static {
    /// A pin driven by the microcontroller changed level at cycle `at`.
    fn pin_changed(&mut self, pin: Pin, at: u64, level: bool);
    /// A run started (`true`) or ended (`false`).
    fn simulating(&mut self, _running: bool) {}
    /// The cycle counter was reset.
    fn cycles_reset(&mut self) {}
}
/// Discards every change.
impl WaveformSink for () {
    fn pin_changed(&mut self, _pin: Pin, _at: u64, _level: bool) {}
}

/// A message sent by the [`WaveformSink`] implementation of a [`cbc::Sender`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinChange {
    /// A pin changed level.
    Level {
        /// The pin.
        pin: Pin,
        /// The cycle of the change.
        at: u64,
        /// The new level.
        level: bool,
    },
    /// A run started or ended.
    Simulating(bool),
    /// The cycle counter was reset.
    CyclesReset,
}
// A disconnected receiver just means nobody is watching anymore.
impl WaveformSink for cbc::Sender<PinChange> {
    fn pin_changed(&mut self, pin: Pin, at: u64, level: bool) {
        let _ = self.send(PinChange::Level { pin, at, level });
    }
    fn simulating(&mut self, running: bool) {
        let _ = self.send(PinChange::Simulating(running));
    }
    fn cycles_reset(&mut self) {
        let _ = self.send(PinChange::CyclesReset);
    }
}

/// The parallel I/O ports.
pub struct Pio {
    pai: u8,
    paw: u8,
    pao: u8,
    pci: u8,
    pcw: u8,
    pco: u8,
    pdi: u8,
    pdw: u8,
    pdo: u8,
    pei: u8,

    pacnt: u8,
    pa_counter: u32,
    oc1m: u8,
    tctl1: u8,
    pactl: u8,

    stimuli: Vec<Stimulus>,
    pending: VecDeque<Stimulus>,
    sink: Box<dyn WaveformSink>,
}

impl Pio {
    /// Creates the ports in their reset state, discarding pin changes.
    pub fn new() -> Self {
        Self::with_sink(())
    }
    /// Creates the ports in their reset state, reporting pin changes to `sink`.
    pub fn with_sink(sink: impl WaveformSink) -> Self {
        Self {
            pai: 0, paw: 0, pao: 0,
            pci: 0, pcw: 0, pco: 0,
            pdi: 0, pdw: 0, pdo: 0,
            pei: 0,
            pacnt: 0,
            pa_counter: 0,
            oc1m: 0,
            tctl1: 0,
            pactl: 0,
            stimuli: vec![],
            pending: VecDeque::new(),
            sink: Box::new(sink),
        }
    }

    /// Replaces the waveform sink.
    pub fn set_sink(&mut self, sink: impl WaveformSink) {
        self.sink = Box::new(sink);
    }

    /// Sets the input stimuli, replacing any previous ones.
    ///
    /// Stimuli are applied in cycle order, at the first instruction boundary at or after their cycle.
    /// They are applied again from the start every time the cycle counter is reset.
    pub fn set_stimuli(&mut self, mut stimuli: Vec<Stimulus>) {
        stimuli.sort_by_key(|s| s.at);
        self.pending = stimuli.iter().copied().collect();
        self.stimuli = stimuli;
    }
    /// The stimuli which have not been applied yet.
    pub fn pending_stimuli(&self) -> impl Iterator<Item = &Stimulus> + '_ {
        self.pending.iter()
    }

    /// The value driven on the port A pins.
    pub fn port_a_output(&self) -> u8 {
        self.pao
    }
    /// The value on the port A input pins.
    pub fn port_a_input(&self) -> u8 {
        self.pai
    }
    /// The value driven on the port C pins.
    pub fn port_c_output(&self) -> u8 {
        self.pco
    }
    /// The value driven on the port D pins.
    pub fn port_d_output(&self) -> u8 {
        self.pdo
    }
    /// The pulse accumulator count.
    pub fn pulse_count(&self) -> u8 {
        self.pacnt
    }

    // Sets the port A output latch, reporting every changed pin from 3 to 7.
    fn notify_pao(&mut self, new: u8, at: u64) {
        let diff = self.pao ^ new;
        self.pao = new;

        for bit in 3..8 {
            let m = 1 << bit;
            if diff & m != 0 {
                self.sink.pin_changed(Pin { port: Port::A, bit }, at, new & m != 0);
            }
        }
    }

    // Recomputes the port A output latch.
    // Pins owned by output compares keep their current level. The rest follow the write latch.
    fn update_pao(&mut self, now: u64) {
        let mut owned = self.oc1m;
        for (ix, &(om, ol)) in OMOL.iter().enumerate() {
            if self.tctl1 & (om | ol) != 0 {
                owned |= OC2 >> ix;
            }
        }
        if self.pactl & DDRA7 == 0 { owned &= !PA7 };
        if self.pactl & I4_O5 != 0 { owned &= !OC5 };

        let new = (self.pao & owned | self.paw & !owned) & 0xF8;
        self.notify_pao(new, now);
    }

    fn read_port_a(&self) -> u8 {
        let mut val = self.pai & 0x07 | self.pao & 0x70;

        val |= match self.pactl & DDRA7 != 0 {
            true  => self.pao & PA7,
            false => self.pai & PA7,
        };

        let oc5_owns = self.pactl & I4_O5 == 0
            && (self.tctl1 & (OMOL[3].0 | OMOL[3].1) != 0 || self.oc1m & OC5 != 0);
        val |= match self.pactl & DDRA3 != 0 || oc5_owns {
            true  => self.pao & OC5,
            false => self.pai & OC5,
        };
        val
    }

    fn update_pco(&mut self, ddrc: u8, now: u64) {
        let new = self.pcw & ddrc | self.pci & !ddrc;
        let diff = new ^ self.pco;
        self.pco = new;
        self.notify_outputs(Port::C, diff & ddrc, new, now);
    }
    fn update_pdo(&mut self, ddrd: u8, now: u64) {
        let new = self.pdw & ddrd | self.pdi & !ddrd;
        let diff = new ^ self.pdo;
        self.pdo = new;
        self.notify_outputs(Port::D, diff & ddrd & 0x3F, new, now);
    }
    fn notify_outputs(&mut self, port: Port, changed: u8, val: u8, at: u64) {
        for bit in 0..8 {
            let m = 1 << bit;
            if changed & m != 0 {
                self.sink.pin_changed(Pin { port, bit }, at, val & m != 0);
            }
        }
    }

    fn oc_event(&mut self, n: u8, at: u64, ctx: &mut PeriphCtx<'_>) {
        let tctl1 = self.tctl1;
        let pactl = self.pactl;

        if (2..=5).contains(&n) && (n != 5 || pactl & I4_O5 == 0) {
            let ix = usize::from(n - 2);
            let (om, ol) = OMOL[ix];
            let pin = OC2 >> ix;
            let new = match (tctl1 & om != 0, tctl1 & ol != 0) {
                (false, true) => Some(self.pao ^ pin),
                (true, false) => Some(self.pao & !pin),
                (true, true)  => Some(self.pao | pin),
                (false, false) => None,
            };
            if let Some(new) = new {
                self.notify_pao(new, at);
            }
        }

        // OC1 can drive every compare pin at once.
        // This is one update, so that no intermediate levels are reported.
        if n == 1 {
            let oc1d = ctx.mem.reg(SpecialReg::OC1D);
            let mut owned = self.oc1m & (OC2 | OC3 | OC4);
            if pactl & DDRA7 != 0 { owned |= self.oc1m & PA7 };
            if pactl & I4_O5 == 0 { owned |= self.oc1m & OC5 };

            self.notify_pao(self.pao & !owned | oc1d & owned, at);
        }
    }

    fn process_stimuli(&mut self, to: u64, ctx: &mut PeriphCtx<'_>) {
        while let Some(&stim) = self.pending.front() {
            if stim.at > to { break };
            self.pending.pop_front();
            self.apply(stim, ctx);
        }
    }

    fn apply(&mut self, stim: Stimulus, ctx: &mut PeriphCtx<'_>) {
        let Stimulus { at, pin, level } = stim;
        let m = pin.mask();
        let set = |latch: u8| if level { latch | m } else { latch & !m };

        match pin.port {
            Port::A if matches!(pin.bit, 0..=3 | 7) => {
                let new = set(self.pai);
                self.check_capture(pin.bit, new, at, ctx);
                self.pai = new;
            },
            Port::C => self.pci = set(self.pci),
            Port::D => self.pdi = set(self.pdi),
            Port::E => self.pei = set(self.pei),
            _ => {}
        }
    }

    // Detects edges on the input capture and pulse accumulator pins,
    // before the input latch takes its new value.
    fn check_capture(&mut self, bit: u8, new: u8, at: u64, ctx: &mut PeriphCtx<'_>) {
        let m = 1 << bit;
        if (self.pai ^ new) & m == 0 { return };

        let tctl2 = ctx.mem.reg(SpecialReg::TCTL2);
        let rising = new & m != 0;
        let edge = |shift: u8| match (tctl2 >> shift) & 0b11 {
            0b01 => rising,
            0b10 => !rising,
            0b11 => true,
            _ => false,
        };

        let capture = match bit {
            0 => edge(0).then_some(EventKind::Ic3),
            1 => edge(2).then_some(EventKind::Ic2),
            2 => edge(4).then_some(EventKind::Ic1),
            3 => (self.pactl & I4_O5 != 0 && edge(6)).then_some(EventKind::Ic4),
            _ => None,
        };
        if let Some(kind) = capture {
            ctx.events.post(kind, Some(at));
        }

        // event counting mode, with PA7 as an input
        if bit == 7 && self.pactl & (DDRA7 | PAEN | PAMOD) == PAEN {
            let pedge = self.pactl & PEDGE != 0;
            if pedge == rising {
                self.count_pulse(ctx, true);
            }
        }
    }

    fn count_pulse(&mut self, ctx: &mut PeriphCtx<'_>, edge: bool) {
        self.pacnt = self.pacnt.wrapping_add(1);
        if edge {
            ctx.events.post(EventKind::Pai, None);
        }
        if self.pacnt == 0 {
            ctx.events.post(EventKind::Paov, None);
        }
    }
}
impl Default for Pio {
    fn default() -> Self {
        Self::new()
    }
}
impl std::fmt::Debug for Pio {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pio")
            .field("pai", &self.pai)
            .field("paw", &self.paw)
            .field("pao", &self.pao)
            .field("pco", &self.pco)
            .field("pdo", &self.pdo)
            .field("pei", &self.pei)
            .field("pacnt", &self.pacnt)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl Peripheral for Pio {
    fn name(&self) -> &'static str {
        "Parallel I/O"
    }

    fn install(&mut self, inst: &mut Installer<'_>) {
        use SpecialReg::*;

        inst.filter(PORTA, Handlers::read(tag::PORTA).and_write(tag::PORTA));
        inst.filter(PORTB, Handlers::write(tag::PORTB));
        inst.filter(PORTC, Handlers::read(tag::PORTC).and_write(tag::PORTC));
        inst.filter(PORTD, Handlers::read(tag::PORTD).and_write(tag::PORTD));
        inst.filter(PORTE, Handlers::read(tag::PORTE));
        inst.filter(DDRC, Handlers::write(tag::DDRC));
        inst.filter(DDRD, Handlers::write(tag::DDRD));
        inst.filter(OC1M, Handlers::write(tag::OC1M));
        inst.filter(SpecialReg::PACTL, Handlers::write(tag::PACTL));
        inst.filter(TCTL1, Handlers::write(tag::TCTL1));
        inst.filter(PACNT, Handlers::read(tag::PACNT).and_write(tag::PACNT));

        for kind in [
            EventKind::Oc1, EventKind::Oc2, EventKind::Oc3, EventKind::Oc4, EventKind::Oc5,
            EventKind::SimStart, EventKind::SimEnd, EventKind::CycReset
        ] {
            inst.subscribe(kind);
        }
    }

    fn on_access(&mut self, tag: u16, access: Access, ctx: &mut PeriphCtx<'_>) {
        let now = ctx.cycles;
        let val = access.first_byte();

        match (tag, access.kind) {
            (tag::PORTA, AccessKind::Read) => ctx.mem.set_reg(SpecialReg::PORTA, self.read_port_a()),
            (tag::PORTA, AccessKind::Write) => {
                self.paw = val;
                self.update_pao(now);
            },
            (tag::PORTB, AccessKind::Write) => {
                // port B is output only, the register holds what is on the pins
                let old = ctx.mem.reg(SpecialReg::PORTB);
                self.notify_outputs(Port::B, old ^ val, val, now);
            },
            (tag::PORTC, AccessKind::Read) => {
                let ddrc = ctx.mem.reg(SpecialReg::DDRC);
                ctx.mem.set_reg(SpecialReg::PORTC, self.pci & !ddrc | self.pcw & ddrc);
            },
            (tag::PORTC, AccessKind::Write) => {
                self.pcw = val;
                self.update_pco(ctx.mem.reg(SpecialReg::DDRC), now);
            },
            (tag::DDRC, AccessKind::Write) => self.update_pco(val, now),
            (tag::PORTD, AccessKind::Read) => {
                let ddrd = ctx.mem.reg(SpecialReg::DDRD);
                ctx.mem.set_reg(SpecialReg::PORTD, (self.pdi & !ddrd | self.pdw & ddrd) & 0x3F);
            },
            (tag::PORTD, AccessKind::Write) => {
                self.pdw = val & 0x3F;
                self.update_pdo(ctx.mem.reg(SpecialReg::DDRD), now);
            },
            (tag::DDRD, AccessKind::Write) => self.update_pdo(val, now),
            (tag::PORTE, AccessKind::Read) => ctx.mem.set_reg(SpecialReg::PORTE, self.pei),
            (tag::OC1M, AccessKind::Write) => {
                self.oc1m = val;
                self.update_pao(now);
            },
            (tag::TCTL1, AccessKind::Write) => {
                self.tctl1 = val;
                self.update_pao(now);
            },
            (tag::PACTL, AccessKind::Write) => {
                self.pactl = val;
                self.update_pao(now);
            },
            (tag::PACNT, AccessKind::Read) => ctx.mem.set_reg(SpecialReg::PACNT, self.pacnt),
            (tag::PACNT, AccessKind::Write) => self.pacnt = val,
            _ => {}
        }
    }

    fn on_event(&mut self, event: Event, ctx: &mut PeriphCtx<'_>) {
        let at = event.at.unwrap_or(ctx.cycles);
        match event.kind {
            EventKind::Oc1 => self.oc_event(1, at, ctx),
            EventKind::Oc2 => self.oc_event(2, at, ctx),
            EventKind::Oc3 => self.oc_event(3, at, ctx),
            EventKind::Oc4 => self.oc_event(4, at, ctx),
            EventKind::Oc5 => self.oc_event(5, at, ctx),
            EventKind::SimStart => self.sink.simulating(true),
            EventKind::SimEnd => self.sink.simulating(false),
            EventKind::CycReset => {
                self.sink.cycles_reset();
                self.pending = self.stimuli.iter().copied().collect();
                self.process_stimuli(0, ctx);
            },
            _ => {}
        }
    }

    fn update(&mut self, elapsed: u32, ctx: &mut PeriphCtx<'_>) {
        self.process_stimuli(ctx.cycles, ctx);

        // gated time accumulation mode counts while PA7 is at the level PEDGE selects
        if self.pactl & PAEN != 0 && self.pactl & (PAMOD | DDRA7) == PAMOD {
            let pedge = self.pactl & PEDGE != 0;
            let pa7 = self.pai & PA7 != 0;
            if pedge != pa7 {
                self.pa_counter += elapsed;
                if self.pa_counter >= GATE_PERIOD {
                    self.pa_counter -= GATE_PERIOD;
                    // no PAI event in gated mode
                    self.count_pulse(ctx, false);
                }
            }
        }
    }

    fn reset(&mut self) {
        let sink = std::mem::replace(&mut self.sink, Box::new(()));
        let stimuli = std::mem::take(&mut self.stimuli);
        *self = Self { sink, ..Self::new() };
        self.set_stimuli(stimuli);
    }

    fn _to_slot(self, _: super::internals::ToSlotToken) -> super::internals::PeripheralSlot
        where Self: Sized
    {
        super::internals::PeripheralSlot::Pio(self)
    }
}
