//! Peripherals connected to the Simulator.
//!
//! A peripheral gives device registers their side effects:
//! it installs memory filters over the registers it owns,
//! subscribes to the events it reacts to,
//! and is updated once per instruction with the number of cycles that instruction took.
//!
//! The core types here are:
//! - [`Peripheral`]: A device which can be installed into the Simulator.
//! - [`Installer`]: What a peripheral gets while it is being installed.
//! - [`PeriphCtx`]: What a peripheral gets whenever it runs.
//!     This only exposes [`RawMemory`], so a peripheral cannot trigger filters (including its own).
//! - [`Peripherals`]: The registry of installed peripherals.
//!
//! This module also provides the two on-chip peripherals:
//! - [`Timer`]: The programmable timer.
//! - [`Pio`]: The parallel I/O ports.

mod timer;
mod pio;

use std::sync::{Arc, LockResult, Mutex};

pub use pio::{Pin, PinChange, Pio, Port, Stimulus, WaveformSink};
pub use timer::Timer;

use super::events::{Event, EventKind, EventQueue, Subscriber, Subscriptions};
use super::interrupts::InterruptController;
use super::mem::{Access, AccessHandler, Bus, HandlerId, Handlers, Memory, RawMemory, SpecialReg};

/// The capabilities a peripheral has while it is running.
#[derive(Debug)]
pub struct PeriphCtx<'a> {
    /// Memory, without filters.
    pub mem: &'a mut RawMemory,
    /// The interrupt controller, to signal sources.
    pub ints: &'a mut InterruptController,
    /// Where to post events.
    pub events: &'a mut EventQueue,
    /// The simulator's cycle count.
    ///
    /// During an instruction's updates, this already includes the instruction's cycles.
    pub cycles: u64,
}

/// Installs a peripheral's memory filters and event subscriptions.
pub struct Installer<'a> {
    owner: usize,
    mem: &'a mut Memory,
    subs: &'a mut Subscriptions,
}
impl Installer<'_> {
    /// The current address of a special register.
    pub fn reg_addr(&self, reg: SpecialReg) -> u16 {
        self.mem.raw().reg_addr(reg)
    }
    /// Filters a special register.
    pub fn filter(&mut self, reg: SpecialReg, handlers: Handlers) {
        let addr = self.reg_addr(reg);
        self.filter_range(addr, addr, handlers);
    }
    /// Filters an address range (inclusive).
    ///
    /// Ranges starting in the register window move with it when it is remapped.
    pub fn filter_range(&mut self, low: u16, high: u16, handlers: Handlers) {
        self.mem.add_filter(low, high, self.owner, handlers);
    }
    /// Subscribes this peripheral to an event kind.
    pub fn subscribe(&mut self, kind: EventKind) {
        self.subs.add(kind, Subscriber::Peripheral(self.owner));
    }
}
impl std::fmt::Debug for Installer<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Installer")
            .field("owner", &self.owner)
            .finish_non_exhaustive()
    }
}

/// A peripheral, which can be installed into the Simulator.
pub trait Peripheral: Send + 'static {
    /// A human-readable name.
    fn name(&self) -> &'static str;

    /// Registers this peripheral's filters and event subscriptions.
    fn install(&mut self, inst: &mut Installer<'_>);

    /// Called when one of this peripheral's filters is hit,
    /// before a read is performed or a write is committed.
    ///
    /// `tag` is the tag this peripheral gave the handler in [`Handlers`].
    fn on_access(&mut self, _tag: u16, _access: Access, _ctx: &mut PeriphCtx<'_>) {}

    /// Called for every event this peripheral subscribed to.
    fn on_event(&mut self, _event: Event, _ctx: &mut PeriphCtx<'_>) {}

    /// Called once after every instruction, with the cycles that instruction took.
    fn update(&mut self, _elapsed: u32, _ctx: &mut PeriphCtx<'_>) {}

    /// Resets internal state.
    fn reset(&mut self) {}

    /// Hacky specialization.
    ///
    /// This allows [`super::Simulator::install`]'s signature to just require a [`Peripheral`]
    /// and still keep the built-in peripherals accessible by type.
    #[doc(hidden)]
    fn _to_slot(self, _: internals::ToSlotToken) -> internals::PeripheralSlot
        where Self: Sized
    {
        internals::PeripheralSlot::Custom(Box::new(self))
    }
}

fn resolve_lock<G>(e: LockResult<G>) -> G {
    e.unwrap_or_else(|e| e.into_inner())
}
/// A shared peripheral, so that the host can keep a handle to it.
impl<P: Peripheral> Peripheral for Arc<Mutex<P>> {
    fn name(&self) -> &'static str {
        resolve_lock(self.lock()).name()
    }
    fn install(&mut self, inst: &mut Installer<'_>) {
        resolve_lock(self.lock()).install(inst)
    }
    fn on_access(&mut self, tag: u16, access: Access, ctx: &mut PeriphCtx<'_>) {
        resolve_lock(self.lock()).on_access(tag, access, ctx)
    }
    fn on_event(&mut self, event: Event, ctx: &mut PeriphCtx<'_>) {
        resolve_lock(self.lock()).on_event(event, ctx)
    }
    fn update(&mut self, elapsed: u32, ctx: &mut PeriphCtx<'_>) {
        resolve_lock(self.lock()).update(elapsed, ctx)
    }
    fn reset(&mut self) {
        resolve_lock(self.lock()).reset()
    }
}

/// The installed peripherals, in installation order.
#[derive(Debug, Default)]
pub struct Peripherals {
    slots: Vec<internals::PeripheralSlot>,
}
impl Peripherals {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a peripheral, returning its index.
    pub(crate) fn install(&mut self, mut dev: impl Peripheral, mem: &mut Memory, subs: &mut Subscriptions) -> usize {
        let owner = self.slots.len();
        dev.install(&mut Installer { owner, mem, subs });
        log::debug!("installed peripheral {} as #{owner}", dev.name());

        self.slots.push(dev._to_slot(internals::ToSlotToken(())));
        owner
    }

    /// The number of installed peripherals.
    pub fn len(&self) -> usize {
        self.slots.len()
    }
    /// Whether no peripheral is installed.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
    /// The names of the installed peripherals.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.slots.iter().map(|s| s.name())
    }

    /// The installed timer, if any.
    pub fn timer(&self) -> Option<&Timer> {
        self.slots.iter().find_map(|s| match s {
            internals::PeripheralSlot::Timer(t) => Some(t),
            _ => None
        })
    }
    /// The installed timer, if any.
    pub fn timer_mut(&mut self) -> Option<&mut Timer> {
        self.slots.iter_mut().find_map(|s| match s {
            internals::PeripheralSlot::Timer(t) => Some(t),
            _ => None
        })
    }
    /// The installed parallel I/O, if any.
    pub fn pio(&self) -> Option<&Pio> {
        self.slots.iter().find_map(|s| match s {
            internals::PeripheralSlot::Pio(p) => Some(p),
            _ => None
        })
    }
    /// The installed parallel I/O, if any.
    pub fn pio_mut(&mut self) -> Option<&mut Pio> {
        self.slots.iter_mut().find_map(|s| match s {
            internals::PeripheralSlot::Pio(p) => Some(p),
            _ => None
        })
    }

    pub(crate) fn on_access(&mut self, id: HandlerId, access: Access, ctx: &mut PeriphCtx<'_>) {
        if let Some(dev) = self.slots.get_mut(id.owner) {
            dev.on_access(id.tag, access, ctx);
        }
    }

    /// Runs every peripheral's update in installation order,
    /// delivering the events each one posts before the next one runs.
    pub(crate) fn update_all(&mut self, elapsed: u32, subs: &mut Subscriptions, ctx: &mut PeriphCtx<'_>) {
        for ix in 0..self.slots.len() {
            self.slots[ix].update(elapsed, ctx);
            self.deliver(subs, ctx);
        }
    }

    /// Delivers every queued event, including events posted while delivering.
    pub(crate) fn deliver(&mut self, subs: &mut Subscriptions, ctx: &mut PeriphCtx<'_>) {
        while let Some(event) = ctx.events.pop() {
            for sub in subs.of_mut(event.kind) {
                match sub {
                    Subscriber::Peripheral(ix) => {
                        if let Some(dev) = self.slots.get_mut(*ix) {
                            dev.on_event(event, ctx);
                        }
                    },
                    Subscriber::Host(f) => f(&event),
                }
            }
        }
    }

    pub(crate) fn reset_all(&mut self) {
        self.slots.iter_mut().for_each(Peripheral::reset)
    }
}

/// Routes filter hits to the owning peripherals.
pub(crate) struct Dispatch<'a> {
    pub(crate) devices: &'a mut Peripherals,
    pub(crate) subs: &'a mut Subscriptions,
    pub(crate) queue: &'a mut EventQueue,
    pub(crate) ints: &'a mut InterruptController,
    pub(crate) cycles: u64,
}
impl AccessHandler for Dispatch<'_> {
    fn on_access(&mut self, id: HandlerId, access: Access, mem: &mut RawMemory) {
        let mut ctx = PeriphCtx { mem, ints: &mut *self.ints, events: &mut *self.queue, cycles: self.cycles };
        self.devices.on_access(id, access, &mut ctx);
        self.devices.deliver(self.subs, &mut ctx);
    }
}

/// Memory as the CPU sees it: every access goes through the filters.
pub(crate) struct SimBus<'a> {
    pub(crate) mem: &'a mut Memory,
    pub(crate) dispatch: Dispatch<'a>,
}
impl Bus for SimBus<'_> {
    fn read_u8(&mut self, addr: u16) -> u8 {
        self.mem.read_u8(addr, &mut self.dispatch)
    }
    fn read_u16(&mut self, addr: u16) -> u16 {
        self.mem.read_u16(addr, &mut self.dispatch)
    }
    fn write_u8(&mut self, addr: u16, val: u8) {
        self.mem.write_u8(addr, val, &mut self.dispatch)
    }
    fn write_u16(&mut self, addr: u16, val: u16) {
        self.mem.write_u16(addr, val, &mut self.dispatch)
    }
}

mod internals {
    use super::{Event, Installer, PeriphCtx, Peripheral, Pio, Timer};
    use crate::sim::mem::Access;

    pub enum PeripheralSlot {
        Timer(Timer),
        Pio(Pio),
        Custom(Box<dyn Peripheral>)
    }

    impl Peripheral for PeripheralSlot {
        fn name(&self) -> &'static str {
            match self {
                PeripheralSlot::Timer(dev) => dev.name(),
                PeripheralSlot::Pio(dev) => dev.name(),
                PeripheralSlot::Custom(dev) => dev.name(),
            }
        }

        fn install(&mut self, inst: &mut Installer<'_>) {
            match self {
                PeripheralSlot::Timer(dev) => dev.install(inst),
                PeripheralSlot::Pio(dev) => dev.install(inst),
                PeripheralSlot::Custom(dev) => dev.install(inst),
            }
        }

        fn on_access(&mut self, tag: u16, access: Access, ctx: &mut PeriphCtx<'_>) {
            match self {
                PeripheralSlot::Timer(dev) => dev.on_access(tag, access, ctx),
                PeripheralSlot::Pio(dev) => dev.on_access(tag, access, ctx),
                PeripheralSlot::Custom(dev) => dev.on_access(tag, access, ctx),
            }
        }

        fn on_event(&mut self, event: Event, ctx: &mut PeriphCtx<'_>) {
            match self {
                PeripheralSlot::Timer(dev) => dev.on_event(event, ctx),
                PeripheralSlot::Pio(dev) => dev.on_event(event, ctx),
                PeripheralSlot::Custom(dev) => dev.on_event(event, ctx),
            }
        }

        fn update(&mut self, elapsed: u32, ctx: &mut PeriphCtx<'_>) {
            match self {
                PeripheralSlot::Timer(dev) => dev.update(elapsed, ctx),
                PeripheralSlot::Pio(dev) => dev.update(elapsed, ctx),
                PeripheralSlot::Custom(dev) => dev.update(elapsed, ctx),
            }
        }

        fn reset(&mut self) {
            match self {
                PeripheralSlot::Timer(dev) => dev.reset(),
                PeripheralSlot::Pio(dev) => dev.reset(),
                PeripheralSlot::Custom(dev) => dev.reset(),
            }
        }
    }
    impl std::fmt::Debug for PeripheralSlot {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Timer(t) => f.debug_tuple("Timer").field(t).finish(),
                Self::Pio(p) => f.debug_tuple("Pio").field(p).finish(),
                Self::Custom(d) => f.debug_struct("Custom").field("name", &d.name()).finish_non_exhaustive(),
            }
        }
    }

    /// Allows `_to_slot` to be private to this file only.
    pub struct ToSlotToken(pub ());
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::sim::events::EventBus;
    use crate::sim::interrupts::IntSource;

    use super::*;

    /// Counts accesses to a register, and signals IRQ when it sees a PAI event.
    #[derive(Default)]
    struct Tracker {
        reads: usize,
        writes: Vec<u8>,
        updates: u32,
        seen: Vec<EventKind>,
        resets: usize,
    }
    impl Peripheral for Tracker {
        fn name(&self) -> &'static str {
            "Tracker"
        }
        fn install(&mut self, inst: &mut Installer<'_>) {
            inst.filter(SpecialReg::SPDR, Handlers::read(0).and_write(1));
            inst.subscribe(EventKind::Pai);
            inst.subscribe(EventKind::Paov);
        }
        fn on_access(&mut self, tag: u16, access: Access, ctx: &mut PeriphCtx<'_>) {
            match tag {
                0 => {
                    self.reads += 1;
                    ctx.mem.set_reg(SpecialReg::SPDR, 0x42);
                },
                _ => {
                    self.writes.push(access.first_byte());
                    ctx.events.post(EventKind::Pai, None);
                }
            }
        }
        fn on_event(&mut self, event: Event, ctx: &mut PeriphCtx<'_>) {
            self.seen.push(event.kind);
            if event.kind == EventKind::Pai {
                // events posted while delivering are delivered too
                ctx.events.post(EventKind::Paov, None);
                ctx.ints.signal(IntSource::Irq);
            }
        }
        fn update(&mut self, elapsed: u32, _ctx: &mut PeriphCtx<'_>) {
            self.updates += elapsed;
        }
        fn reset(&mut self) {
            self.resets += 1;
        }
    }

    struct Rig {
        mem: Memory,
        devices: Peripherals,
        events: EventBus,
        ints: InterruptController,
    }
    impl Rig {
        fn new() -> Self {
            Self {
                mem: Memory::new(&mut 0u8),
                devices: Peripherals::new(),
                events: EventBus::new(),
                ints: InterruptController::new(),
            }
        }
        fn install(&mut self, dev: impl Peripheral) -> usize {
            self.devices.install(dev, &mut self.mem, &mut self.events.subs)
        }
        fn bus(&mut self) -> SimBus<'_> {
            let EventBus { subs, queue } = &mut self.events;
            SimBus {
                mem: &mut self.mem,
                dispatch: Dispatch { devices: &mut self.devices, subs, queue, ints: &mut self.ints, cycles: 0 }
            }
        }
    }

    #[test]
    fn filters_reach_owner() {
        let tracker = Arc::new(Mutex::new(Tracker::default()));
        let mut rig = Rig::new();
        assert_eq!(rig.install(Arc::clone(&tracker)), 0);
        assert_eq!(rig.devices.names().collect::<Vec<_>>(), ["Tracker"]);

        let seen = Arc::new(Mutex::new(vec![]));
        let s = Arc::clone(&seen);
        rig.events.subscribe(EventKind::Paov, move |e| s.lock().unwrap().push(e.kind));

        let mut bus = rig.bus();
        assert_eq!(bus.read_u8(0x102A), 0x42);
        bus.write_u8(0x102A, 0x99);
        assert_eq!(bus.read_u8(0x1029), 0x00);

        let p = tracker.lock().unwrap();
        assert_eq!(p.reads, 1);
        assert_eq!(p.writes, [0x99]);
        assert_eq!(p.seen, [EventKind::Pai, EventKind::Paov]);
        assert_eq!(*seen.lock().unwrap(), [EventKind::Paov]);
        assert!(rig.ints.is_pending(IntSource::Irq));
        assert!(rig.events.queue.is_empty());
    }

    #[test]
    fn update_and_reset() {
        let tracker = Arc::new(Mutex::new(Tracker::default()));
        let mut rig = Rig::new();
        rig.install(Timer::new());
        rig.install(Arc::clone(&tracker));
        assert!(rig.devices.timer().is_some());
        assert!(rig.devices.pio().is_none());
        assert_eq!(rig.devices.len(), 2);

        let EventBus { subs, queue } = &mut rig.events;
        let mut ctx = PeriphCtx { mem: rig.mem.raw_mut(), ints: &mut rig.ints, events: queue, cycles: 6 };
        rig.devices.update_all(6, subs, &mut ctx);
        rig.devices.update_all(2, subs, &mut ctx);
        rig.devices.reset_all();

        let p = tracker.lock().unwrap();
        assert_eq!(p.updates, 8);
        assert_eq!(p.resets, 1);
    }
}
