//! The programmable timer.
//!
//! This peripheral:
//! - maintains the free-running counter `TCNT`,
//! - sets `TOF` on counter overflow and `RTIF` every real-time interrupt period,
//! - sets `OC1F`-`OC5F` when an output compare matches, or emits the compare events on `CFORC` writes,
//! - latches `TIC1`-`TIC4` from input capture events (which the parallel I/O generates),
//! - keeps `PAIF` and `PAOVF` for the pulse accumulator (which the parallel I/O counts),
//! - handles the write-1-to-clear flag registers `TFLG1` and `TFLG2`,
//! - signals timer interrupts for every flag enabled in `TMSK1` and `TMSK2`.

use crate::sim::events::{Event, EventKind};
use crate::sim::interrupts::IntSource;
use crate::sim::mem::{Access, AccessKind, Handlers, SpecialReg};

use super::{Installer, PeriphCtx, Peripheral};

// TMSK2
const PR_BITS: u8 = 0x03;

// TFLG2
const TOF: u8   = 0x80;
const RTIF: u8  = 0x40;
const PAOVF: u8 = 0x20;
const PAIF: u8  = 0x10;

// TFLG1
const OC1F: u8 = 0x80;
const OC2F: u8 = 0x40;
const OC3F: u8 = 0x20;
const OC4F: u8 = 0x10;
const OC5F: u8 = 0x08; // also IC4F
const IC1F: u8 = 0x04;
const IC2F: u8 = 0x02;
const IC3F: u8 = 0x01;
const OCF: [u8; 5] = [OC1F, OC2F, OC3F, OC4F, OC5F];

// PACTL
const RTR_BITS: u8 = 0x03;
const I4_O5: u8 = 0x04;

const PRESCALES: [u32; 4] = [1, 4, 8, 16];
const RTI_LIMITS: [u32; 4] = [8192, 16384, 32768, 65536];

mod tag {
    pub const TCNT: u16  = 0;
    pub const TFLG1: u16 = 1;
    pub const TFLG2: u16 = 2;
    pub const CFORC: u16 = 3;
    pub const TIC: u16   = 4;
    pub const TIC4: u16  = 5;
    pub const TMSK1: u16 = 6;
    pub const TMSK2: u16 = 7;
    pub const PACTL: u16 = 8;
    pub const TOC: u16   = 9;
}

/// The timer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timer {
    cnt: u16,
    rticnt: u32,
    // unprescaled cycles, kept to 20 bits
    cycles: u32,
    last_sim_cycles: u64,

    // TFLG1 without bit 3, which is kept as two separate flags
    tflg1: u8,
    oc5f: bool,
    ic4f: bool,
    tflg2: u8,

    tic: [u16; 4],
    toc: [u16; 5],
    tmsk1: u8,
    tmsk2: u8,
    pactl: u8,
    prescale: u32,
    rti_limit: u32,
}

impl Timer {
    /// Creates a timer in its reset state.
    pub fn new() -> Self {
        Self {
            cnt: 0,
            rticnt: 0,
            cycles: 0,
            last_sim_cycles: 0,
            tflg1: 0,
            oc5f: false,
            ic4f: false,
            tflg2: 0,
            tic: [0; 4],
            toc: [0; 5],
            tmsk1: 0,
            tmsk2: 0,
            pactl: 0,
            prescale: PRESCALES[0],
            rti_limit: RTI_LIMITS[0],
        }
    }

    /// The free-running counter.
    pub fn counter(&self) -> u16 {
        self.cnt
    }
    /// The current counter prescale factor.
    pub fn prescale(&self) -> u32 {
        self.prescale
    }
    /// The value of `TFLG1`, as a read would see it.
    pub fn tflg1(&self) -> u8 {
        let bit3 = match self.pactl & I4_O5 != 0 {
            true  => self.ic4f,
            false => self.oc5f,
        };
        self.tflg1 | if bit3 { OC5F } else { 0 }
    }
    /// The value of `TFLG2`.
    pub fn tflg2(&self) -> u8 {
        self.tflg2
    }
    /// The latched value of input capture `n` (1-4).
    pub fn input_capture(&self, n: u8) -> Option<u16> {
        self.tic.get(usize::from(n).checked_sub(1)?).copied()
    }
    /// The value of output compare register `n` (1-5), as last written.
    pub fn output_compare(&self, n: u8) -> Option<u16> {
        self.toc.get(usize::from(n).checked_sub(1)?).copied()
    }

    fn clear_tflg1(&mut self, val: u8) {
        self.tflg1 &= !(val & !OC5F);
        if val & OC5F != 0 {
            match self.pactl & I4_O5 != 0 {
                true  => self.ic4f = false,
                false => self.oc5f = false,
            }
        }
    }

    // Byte writes only replace their half of the compare register.
    fn write_toc(&mut self, access: Access, base: u16) {
        let word = access.value.to_be_bytes();
        let bytes = match access.bits {
            16 => &word[..],
            _  => &word[1..],
        };

        let toc1 = SpecialReg::TOC1.offset();
        for (k, &b) in (0..).zip(bytes) {
            let off = access.addr.wrapping_sub(base).wrapping_add(k);
            let Some(rel) = off.checked_sub(toc1).filter(|&r| r < 10) else { continue };

            let slot = &mut self.toc[usize::from(rel / 2)];
            let [hi, lo] = slot.to_be_bytes();
            *slot = match rel % 2 {
                0 => u16::from_be_bytes([b, lo]),
                _ => u16::from_be_bytes([hi, b]),
            };
        }
    }

    // Reconstructs the counter value at cycle `at`.
    //
    // If this timer's update already ran for the current cycle count,
    // the counter is ahead of `at`. Otherwise, it is behind.
    fn capture(&self, at: u64, now: u64) -> u16 {
        if self.last_sim_cycles == now {
            let diff = self.last_sim_cycles.saturating_sub(at);
            self.cnt.wrapping_sub((diff / u64::from(self.prescale)) as u16)
        } else {
            let diff = at.saturating_sub(self.last_sim_cycles);
            self.cnt.wrapping_add((diff / u64::from(self.prescale)) as u16)
        }
    }

    fn signal_interrupts(&self, ctx: &mut PeriphCtx<'_>) {
        let tmsk2 = self.tmsk2;
        if tmsk2 != 0 {
            let pending2 = self.tflg2 & tmsk2;
            if pending2 & TOF   != 0 { ctx.ints.signal(IntSource::Tov) }
            if pending2 & RTIF  != 0 { ctx.ints.signal(IntSource::Rti) }
            if pending2 & PAIF  != 0 { ctx.ints.signal(IntSource::Pai) }
            if pending2 & PAOVF != 0 { ctx.ints.signal(IntSource::Paov) }
        }

        let tmsk1 = self.tmsk1;
        if tmsk1 != 0 {
            let pending1 = self.tflg1 & tmsk1;
            if pending1 & OC1F != 0 { ctx.ints.signal(IntSource::Oc1) }
            if pending1 & OC2F != 0 { ctx.ints.signal(IntSource::Oc2) }
            if pending1 & OC3F != 0 { ctx.ints.signal(IntSource::Oc3) }
            if pending1 & OC4F != 0 { ctx.ints.signal(IntSource::Oc4) }
            if tmsk1 & OC5F != 0 {
                let i4 = self.pactl & I4_O5 != 0;
                if self.oc5f && !i4 { ctx.ints.signal(IntSource::Oc5) }
                if self.ic4f && i4 { ctx.ints.signal(IntSource::IC4) }
            }
            if pending1 & IC3F != 0 { ctx.ints.signal(IntSource::Ic3) }
            if pending1 & IC2F != 0 { ctx.ints.signal(IntSource::Ic2) }
            if pending1 & IC1F != 0 { ctx.ints.signal(IntSource::Ic1) }
        }
    }
}
impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Peripheral for Timer {
    fn name(&self) -> &'static str {
        "Timer"
    }

    fn install(&mut self, inst: &mut Installer<'_>) {
        use SpecialReg::*;

        let tcnt = inst.reg_addr(TCNT);
        inst.filter_range(tcnt, tcnt + 1, Handlers::read(tag::TCNT));
        inst.filter(TFLG1, Handlers::read(tag::TFLG1).and_write(tag::TFLG1));
        inst.filter(TFLG2, Handlers::read(tag::TFLG2).and_write(tag::TFLG2));
        inst.filter(CFORC, Handlers::write(tag::CFORC));

        let (tic1, tic3) = (inst.reg_addr(TIC1), inst.reg_addr(TIC3));
        inst.filter_range(tic1, tic3 + 1, Handlers::read(tag::TIC));
        inst.filter(SpecialReg::TIC4, Handlers::read(tag::TIC4));

        inst.filter(TMSK1, Handlers::write(tag::TMSK1));
        inst.filter(TMSK2, Handlers::write(tag::TMSK2));
        inst.filter(PACTL, Handlers::write(tag::PACTL));
        let (toc1, toc5) = (inst.reg_addr(TOC1), inst.reg_addr(TOC5));
        inst.filter_range(toc1, toc5 + 1, Handlers::write(tag::TOC));

        for kind in [EventKind::Ic1, EventKind::Ic2, EventKind::Ic3, EventKind::Ic4, EventKind::Pai, EventKind::Paov, EventKind::CycReset] {
            inst.subscribe(kind);
        }
    }

    fn on_access(&mut self, tag: u16, access: Access, ctx: &mut PeriphCtx<'_>) {
        let base = ctx.mem.reg_base();
        let val = access.first_byte();

        match (tag, access.kind) {
            (tag::TCNT, AccessKind::Read) => ctx.mem.set_reg16(SpecialReg::TCNT, self.cnt),
            (tag::TFLG1, AccessKind::Read) => ctx.mem.set_reg(SpecialReg::TFLG1, self.tflg1()),
            (tag::TFLG1, AccessKind::Write) => self.clear_tflg1(val),
            (tag::TFLG2, AccessKind::Read) => ctx.mem.set_reg(SpecialReg::TFLG2, self.tflg2),
            (tag::TFLG2, AccessKind::Write) => self.tflg2 &= !val,
            (tag::CFORC, AccessKind::Write) => {
                // forced compares set no flags and signal no interrupts
                for (n, &flag) in (1..).zip(&OCF) {
                    let allowed = flag != OC5F || self.pactl & I4_O5 == 0;
                    if val & flag != 0 && allowed {
                        if let Some(kind) = EventKind::oc(n) {
                            ctx.events.post(kind, None);
                        }
                    }
                }
            },
            (tag::TIC, AccessKind::Read) => {
                let off = access.addr.wrapping_sub(base);
                let regs = [SpecialReg::TIC1, SpecialReg::TIC2, SpecialReg::TIC3];
                if let Some(ix) = regs.iter().position(|r| r.offset() == off) {
                    ctx.mem.set_reg16(regs[ix], self.tic[ix]);
                }
            },
            (tag::TIC4, AccessKind::Read) => {
                if self.pactl & I4_O5 != 0 {
                    ctx.mem.set_reg16(SpecialReg::TIC4, self.tic[3]);
                }
            },
            (tag::TMSK1, AccessKind::Write) => self.tmsk1 = val,
            (tag::TMSK2, AccessKind::Write) => {
                self.tmsk2 = val;
                self.prescale = PRESCALES[usize::from(val & PR_BITS)];
            },
            (tag::PACTL, AccessKind::Write) => {
                self.pactl = val;
                self.rti_limit = RTI_LIMITS[usize::from(val & RTR_BITS)];
            },
            (tag::TOC, AccessKind::Write) => self.write_toc(access, base),
            _ => {}
        }
    }

    fn on_event(&mut self, event: Event, ctx: &mut PeriphCtx<'_>) {
        let at = event.at.unwrap_or(ctx.cycles);
        let (ix, flag) = match event.kind {
            EventKind::Ic1 => (0, IC1F),
            EventKind::Ic2 => (1, IC2F),
            EventKind::Ic3 => (2, IC3F),
            EventKind::Ic4 => {
                self.tic[3] = self.capture(at, ctx.cycles);
                self.ic4f = true;
                return;
            },
            EventKind::Pai  => { self.tflg2 |= PAIF; return },
            EventKind::Paov => { self.tflg2 |= PAOVF; return },
            EventKind::CycReset => { self.last_sim_cycles = 0; return },
            _ => return
        };
        self.tic[ix] = self.capture(at, ctx.cycles);
        self.tflg1 |= flag;
    }

    fn update(&mut self, elapsed: u32, ctx: &mut PeriphCtx<'_>) {
        self.cycles += elapsed;
        self.last_sim_cycles = ctx.cycles;

        let before = u32::from(self.cnt);
        self.cnt = (self.cycles / self.prescale) as u16;
        let mut after = u32::from(self.cnt);
        self.cycles &= 0xF_FFFF;
        if after < before { after += 0x1_0000 };

        // RTI is independent of the prescaler
        self.rticnt += elapsed;
        if self.rticnt >= self.rti_limit {
            self.tflg2 |= RTIF;
            self.rticnt -= self.rti_limit;
            ctx.events.post(EventKind::Rti, None);
        }
        while self.rticnt >= self.rti_limit {
            self.rticnt -= self.rti_limit;
        }

        // The counter went through before+1 ..= after during this instruction.
        // A compare that matches at position `pos` in that range occurred
        // `pos + 1` cycles after the instruction started.
        if after > before {
            if after >= 0x1_0000 {
                self.tflg2 |= TOF;
                ctx.events.post(EventKind::Tov, None);
            }

            let span = after - before;
            let start = ctx.cycles.saturating_sub(u64::from(elapsed));
            for (n, (&toc, &flag)) in (1..).zip(self.toc.iter().zip(&OCF)) {
                let pos = u32::from(toc).wrapping_sub(before + 1) & 0xFFFF;
                if pos >= span { continue };

                match flag {
                    OC5F => self.oc5f = true,
                    _ => self.tflg1 |= flag,
                }
                if let Some(kind) = EventKind::oc(n) {
                    ctx.events.post(kind, Some(start + u64::from(pos) + 1));
                }
            }
        }

        self.signal_interrupts(ctx);
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn _to_slot(self, _: super::internals::ToSlotToken) -> super::internals::PeripheralSlot
        where Self: Sized
    {
        super::internals::PeripheralSlot::Timer(self)
    }
}

#[cfg(test)]
mod tests {
    use crate::sim::events::EventQueue;
    use crate::sim::interrupts::InterruptController;
    use crate::sim::mem::RawMemory;

    use super::*;

    struct Rig {
        mem: RawMemory,
        ints: InterruptController,
        events: EventQueue,
        cycles: u64,
    }
    impl Rig {
        fn new() -> Self {
            Self { mem: RawMemory::new(&mut 0u8), ints: InterruptController::new(), events: EventQueue::default(), cycles: 0 }
        }
        fn ctx(&mut self) -> PeriphCtx<'_> {
            PeriphCtx { mem: &mut self.mem, ints: &mut self.ints, events: &mut self.events, cycles: self.cycles }
        }
        // Runs an instruction of `elapsed` cycles, the way the simulator does:
        // the cycle count includes the instruction before updates run.
        fn step(&mut self, timer: &mut Timer, elapsed: u32) {
            self.cycles += u64::from(elapsed);
            self.ints.flush();
            timer.update(elapsed, &mut self.ctx());
        }
        fn write(&mut self, timer: &mut Timer, reg: SpecialReg, bits: u8, value: u16) {
            let addr = self.mem.reg_addr(reg);
            let t = match reg {
                SpecialReg::TFLG1 => tag::TFLG1,
                SpecialReg::TFLG2 => tag::TFLG2,
                SpecialReg::CFORC => tag::CFORC,
                SpecialReg::TMSK1 => tag::TMSK1,
                SpecialReg::TMSK2 => tag::TMSK2,
                SpecialReg::PACTL => tag::PACTL,
                _ => tag::TOC,
            };
            timer.on_access(t, Access { addr, bits, value, kind: AccessKind::Write }, &mut self.ctx());
        }
        fn read(&mut self, timer: &mut Timer, reg: SpecialReg, t: u16) -> u16 {
            let addr = self.mem.reg_addr(reg);
            timer.on_access(t, Access { addr, bits: 16, value: 0, kind: AccessKind::Read }, &mut self.ctx());
            self.mem.reg16(reg)
        }
        fn drain(&mut self) -> Vec<Event> {
            std::iter::from_fn(|| self.events.pop()).collect()
        }
    }

    #[test]
    fn counter_and_overflow() {
        let mut rig = Rig::new();
        let mut timer = Timer::new();

        rig.step(&mut timer, 3);
        assert_eq!(timer.counter(), 3);
        assert_eq!(rig.read(&mut timer, SpecialReg::TCNT, tag::TCNT), 3);

        // prescale by 4
        rig.write(&mut timer, SpecialReg::TMSK2, 8, 0x01);
        assert_eq!(timer.prescale(), 4);
        rig.step(&mut timer, 5);
        assert_eq!(timer.counter(), 2);

        let mut timer = Timer::new();
        for _ in 0..(0xFFFF / 5) {
            rig.step(&mut timer, 5);
        }
        assert_eq!(timer.counter(), 0xFFFF);
        assert_eq!(timer.tflg2() & TOF, 0);
        rig.drain();

        rig.step(&mut timer, 6);
        assert_eq!(timer.counter(), 0x0005);
        assert_eq!(timer.tflg2() & TOF, TOF);
        let events = rig.drain();
        assert!(events.contains(&Event { kind: EventKind::Tov, at: None }));
        // 65536 cycles is also a whole number of RTI periods
        assert!(events.contains(&Event { kind: EventKind::Rti, at: None }));
        // every compare register is 0, which the counter just went through
        assert_eq!(events.iter().filter(|e| e.at.is_some()).count(), 5);
        assert_eq!(events.len(), 7);
        assert_eq!(timer.tflg1(), 0xF8);
        // no interrupt unless enabled
        assert!(!rig.ints.is_pending(IntSource::Tov));

        rig.write(&mut timer, SpecialReg::TMSK2, 8, 0x80);
        rig.step(&mut timer, 2);
        assert!(rig.ints.is_pending(IntSource::Tov));

        // write 1 to clear
        rig.write(&mut timer, SpecialReg::TFLG2, 8, 0x80);
        assert_eq!(timer.tflg2(), RTIF);
        rig.step(&mut timer, 2);
        assert!(!rig.ints.is_pending(IntSource::Tov));
    }

    #[test]
    fn real_time_interrupt() {
        let mut rig = Rig::new();
        let mut timer = Timer::new();
        rig.write(&mut timer, SpecialReg::TMSK2, 8, u16::from(RTIF));

        for _ in 0..(8192 / 8 - 1) {
            rig.step(&mut timer, 8);
        }
        assert_eq!(timer.tflg2(), 0);
        rig.drain();

        rig.step(&mut timer, 10);
        assert_eq!(timer.tflg2(), RTIF);
        assert!(rig.ints.is_pending(IntSource::Rti));
        assert!(rig.drain().iter().any(|e| e.kind == EventKind::Rti));
    }

    #[test]
    fn output_compare_exact_cycle() {
        let mut rig = Rig::new();
        let mut timer = Timer::new();
        rig.step(&mut timer, 10);
        assert_eq!(timer.counter(), 10);

        // compare at counter + 2, then an instruction of 2 cycles reaches it
        rig.write(&mut timer, SpecialReg::TOC1, 16, 12);
        rig.drain();
        rig.step(&mut timer, 2);

        assert_eq!(timer.tflg1(), OC1F);
        // the instruction started at cycle 10, the compare happened 2 cycles in
        assert_eq!(rig.drain(), [Event { kind: EventKind::Oc1, at: Some(12) }]);
        assert!(!rig.ints.is_pending(IntSource::Oc1));

        rig.write(&mut timer, SpecialReg::TMSK1, 8, u16::from(OC1F));
        rig.step(&mut timer, 1);
        assert!(rig.ints.is_pending(IntSource::Oc1));
    }

    #[test]
    fn compare_writes() {
        let mut rig = Rig::new();
        let mut timer = Timer::new();
        rig.write(&mut timer, SpecialReg::TOC2, 16, 0x1234);
        assert_eq!(timer.output_compare(2), Some(0x1234));

        // byte writes only replace their half
        let toc2 = rig.mem.reg_addr(SpecialReg::TOC2);
        timer.on_access(tag::TOC, Access { addr: toc2 + 1, bits: 8, value: 0xCD, kind: AccessKind::Write }, &mut rig.ctx());
        assert_eq!(timer.output_compare(2), Some(0x12CD));
        rig.write(&mut timer, SpecialReg::TOC2, 8, 0xAB);
        assert_eq!(timer.output_compare(2), Some(0xABCD));

        rig.write(&mut timer, SpecialReg::TOC5, 16, 0x0005);
        assert_eq!(timer.output_compare(5), Some(0x0005));
        assert_eq!(timer.output_compare(1), Some(0));
        assert_eq!(timer.output_compare(6), None);
    }

    #[test]
    fn aliased_flag() {
        let mut rig = Rig::new();
        let mut timer = Timer::new();
        rig.write(&mut timer, SpecialReg::TOC5, 16, 2);
        rig.write(&mut timer, SpecialReg::TMSK1, 8, u16::from(OC5F));
        rig.step(&mut timer, 3);
        assert_eq!(timer.tflg1(), OC5F);
        assert!(rig.ints.is_pending(IntSource::Oc5));

        // with I4/O5 set, bit 3 is IC4F, which is clear
        rig.write(&mut timer, SpecialReg::PACTL, 8, u16::from(I4_O5));
        assert_eq!(timer.tflg1(), 0);
        rig.step(&mut timer, 1);
        assert!(!rig.ints.is_pending(IntSource::Oc5));

        // clearing bit 3 clears IC4F, so OC5F remains
        rig.write(&mut timer, SpecialReg::TFLG1, 8, u16::from(OC5F));
        rig.write(&mut timer, SpecialReg::PACTL, 8, 0);
        assert_eq!(timer.tflg1(), OC5F);
        rig.write(&mut timer, SpecialReg::TFLG1, 8, u16::from(OC5F));
        assert_eq!(timer.tflg1(), 0);
    }

    #[test]
    fn force_compare() {
        let mut rig = Rig::new();
        let mut timer = Timer::new();
        rig.write(&mut timer, SpecialReg::CFORC, 8, 0xA8);
        assert_eq!(rig.drain(), [
            Event { kind: EventKind::Oc1, at: None },
            Event { kind: EventKind::Oc3, at: None },
            Event { kind: EventKind::Oc5, at: None },
        ]);
        assert_eq!(timer.tflg1(), 0);

        rig.write(&mut timer, SpecialReg::PACTL, 8, u16::from(I4_O5));
        rig.write(&mut timer, SpecialReg::CFORC, 8, 0x08);
        assert!(rig.drain().is_empty());
    }

    #[test]
    fn capture_after_update() {
        let mut rig = Rig::new();
        let mut timer = Timer::new();
        rig.step(&mut timer, 1000);
        assert_eq!(timer.counter(), 1000);

        // the timer already ran for cycle 1000, so an edge at 998 was 2 counts ago
        timer.on_event(Event { kind: EventKind::Ic1, at: Some(998) }, &mut rig.ctx());
        assert_eq!(timer.input_capture(1), Some(998));
        assert_eq!(timer.tflg1(), IC1F);
    }

    #[test]
    fn capture_before_update() {
        let mut rig = Rig::new();
        let mut timer = Timer::new();
        rig.write(&mut timer, SpecialReg::TMSK2, 8, 0x02);
        rig.step(&mut timer, 800);
        assert_eq!(timer.counter(), 100);

        // the simulator has moved on to cycle 816, but the timer has not updated yet:
        // an edge at 816 is 16 cycles (2 counts) ahead of the counter
        rig.cycles += 16;
        timer.on_event(Event { kind: EventKind::Ic2, at: Some(816) }, &mut rig.ctx());
        assert_eq!(timer.input_capture(2), Some(102));
        assert_eq!(timer.tflg1(), IC2F);

        rig.write(&mut timer, SpecialReg::TMSK1, 8, u16::from(IC2F));
        timer.update(0, &mut rig.ctx());
        assert!(rig.ints.is_pending(IntSource::Ic2));
    }

    #[test]
    fn capture_registers() {
        let mut rig = Rig::new();
        let mut timer = Timer::new();
        rig.step(&mut timer, 50);
        timer.on_event(Event { kind: EventKind::Ic3, at: Some(40) }, &mut rig.ctx());
        timer.on_event(Event { kind: EventKind::Ic4, at: Some(45) }, &mut rig.ctx());

        assert_eq!(rig.read(&mut timer, SpecialReg::TIC3, tag::TIC), 40);
        // TIC4 reads only go through in input capture 4 mode
        rig.write(&mut timer, SpecialReg::TOC5, 16, 0x7777);
        rig.mem.set_reg16(SpecialReg::TOC5, 0x7777);
        assert_eq!(rig.read(&mut timer, SpecialReg::TIC4, tag::TIC4), 0x7777);
        rig.write(&mut timer, SpecialReg::PACTL, 8, u16::from(I4_O5));
        assert_eq!(rig.read(&mut timer, SpecialReg::TIC4, tag::TIC4), 45);
        assert_eq!(timer.tflg1(), IC3F | OC5F);
    }

    #[test]
    fn pulse_accumulator_flags() {
        let mut rig = Rig::new();
        let mut timer = Timer::new();
        timer.on_event(Event { kind: EventKind::Pai, at: None }, &mut rig.ctx());
        timer.on_event(Event { kind: EventKind::Paov, at: None }, &mut rig.ctx());
        assert_eq!(timer.tflg2(), PAIF | PAOVF);

        rig.write(&mut timer, SpecialReg::TMSK2, 8, u16::from(PAIF));
        rig.step(&mut timer, 1);
        assert!(rig.ints.is_pending(IntSource::Pai));
        assert!(!rig.ints.is_pending(IntSource::Paov));

        timer.reset();
        assert_eq!(timer, Timer::new());
    }
}
