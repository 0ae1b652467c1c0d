//! Simulating and execution for 68HC11 machine code.
//!
//! This module is focused on executing machine code already placed in memory
//! (e.g., by [`Simulator::load_s19_file`]).
//!
//! This module consists of:
//! - [`Simulator`]: The struct that simulates machine code.
//! - [`mem`]: The module handling memory, the register window, and memory filters.
//! - [`regs`]: The module handling the CPU registers.
//! - [`interrupts`]: The module handling interrupt sources and their priority.
//! - [`events`]: The module handling system events.
//! - [`device`]: The module handling peripherals (the timer and parallel I/O).
//! - [`debug`]: The module handling breakpoints and virtual functions.
//! - [`console`]: The module handling character I/O with the host.
//!
//! # Usage
//!
//! To simulate some code, you need to instantiate a Simulator and put code in it:
//!
//! ```
//! use hc11_sim::sim::{Halt, Simulator, StepOptions};
//!
//! let mut sim = Simulator::new(Default::default());
//! // LDAA #$05, DECA
//! sim.load_bytes(0xC000, &[0x86, 0x05, 0x4A]);
//! sim.regs.set_pc(0xC000);
//!
//! let halt = sim.step(StepOptions::count(2)).unwrap();
//! assert_eq!(halt, Halt::CountExhausted);
//! assert_eq!(sim.regs.a(), 4);
//! assert_eq!(sim.cycles, 4);
//! ```
//!
//! ## Flags
//!
//! The simulator above has the default flags.
//! The flags decide which peripherals are installed and how `SWI` behaves.
//! For example, to let `SWI` take its vector (rather than halting the run):
//!
//! ```
//! # use hc11_sim::sim::{Simulator, SimFlags};
//! let mut sim = Simulator::new(SimFlags { allow_swi: true, ..Default::default() });
//! ```
//!
//! All of the available flags can be found in [`SimFlags`].
//!
//! ## Execution
//!
//! Every run goes through [`Simulator::step`], which runs until something halts it.
//! A run halts when:
//! - an instruction halts it (`SWI`, `STOP`, `WAI`, `TEST`),
//! - a breakpoint fires,
//! - the instruction count or cycle limit of [`StepOptions`] is reached,
//! - the run flag ([`Simulator::run_flag`]) is cleared (e.g., by another thread),
//! - or an error occurs ([`SimErr`]).
//!
//! The halting reason is returned as a [`Halt`].
//! [`Simulator::run`], [`Simulator::call`], [`Simulator::go`] and [`Simulator::run_until_cycles`]
//! are shorthands over `step`.
//!
//! ## Debugging with breakpoints
//!
//! Breakpoints are accessible through the `breakpoints` field on [`Simulator`].
//!
//! ```
//! use hc11_sim::sim::{Halt, Simulator};
//! use hc11_sim::sim::debug::Breakpoint;
//!
//! let mut sim = Simulator::new(Default::default());
//! // NOP, NOP, BRA *
//! sim.load_bytes(0xC000, &[0x01, 0x01, 0x20, 0xFE]);
//! sim.regs.set_pc(0xC000);
//!
//! sim.breakpoints.push(Breakpoint::new(0xC002).with_text("loop"));
//! assert_eq!(sim.run().unwrap(), Halt::Breakpoint("loop".to_string()));
//! assert_eq!(sim.regs.pc(), 0xC002);
//! ```
//!
//! ## Peripherals and interrupts
//!
//! Device registers get their side effects from peripherals (see the [`device`] module),
//! which are updated after every instruction. Peripherals signal interrupt sources
//! on the interrupt controller, which are resolved at the start of the next instruction.
pub mod mem;
pub mod regs;
pub mod interrupts;
pub mod events;
pub mod device;
pub mod debug;
pub mod console;
mod exec;

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::alu::{CC_I, CC_X};
use crate::dasm;
use crate::isa::{self, Opcode};
use crate::load::map::{MapError, MapFile};
use crate::load::{self, S19Error, S19Summary};

use self::console::Console;
use self::debug::{BranchForce, Breakpoint, VirtualFunction};
use self::device::{Dispatch, PeriphCtx, Peripheral, Peripherals, Pio, SimBus, Timer};
use self::events::{EventBus, EventKind};
use self::exec::Executor;
use self::interrupts::{IntSource, InterruptController};
use self::mem::{Bus, MachineInitStrategy, Memory, SpecialReg, DEFAULT_REG_BASE};
use self::regs::RegFile;

/// The reset vector.
const RESET_VECTOR: u16 = 0xFFFE;

/// Errors that can occur during simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimErr {
    /// The opcode (or prefixed opcode) has no instruction.
    IllegalOperation {
        /// Where the opcode was fetched.
        pc: u16,
        /// The opcode.
        opcode: Opcode
    },
    /// The decoder and executor disagree about an instruction.
    InternalError(&'static str),
    /// An interrupt came through a vector nobody set up.
    UnhandledInterrupt(String),
    /// A virtual function or breakpoint predicate failed.
    Callback(String),
}
impl std::fmt::Display for SimErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SimErr::IllegalOperation { pc, opcode } => write!(f, "Illegal instruction encountered (opcode {opcode} at ${pc:04X})"),
            SimErr::InternalError(s)      => write!(f, "internal error: {s}"),
            SimErr::UnhandledInterrupt(s) => f.write_str(s),
            SimErr::Callback(s)           => write!(f, "callback failed: {s}"),
        }
    }
}
impl std::error::Error for SimErr {}

/// Why a run stopped, if it wasn't due to an error.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Halt {
    /// `SWI` was executed while SWI execution is disabled.
    Swi,
    /// `STOP` was executed while stops are enabled (CC.S clear).
    Stop,
    /// `WAI` was executed.
    Wai,
    /// `TEST` was executed.
    Test,
    /// A breakpoint fired, with the breakpoint's text.
    Breakpoint(String),
    /// The instruction count of the run ran out.
    CountExhausted,
    /// The cycle count reached the run's limit.
    CycleLimit,
    /// The run flag was cleared.
    Interrupted,
}
impl std::fmt::Display for Halt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Halt::Swi            => f.write_str("SWI instruction encountered"),
            Halt::Stop           => f.write_str("STOP instruction encountered"),
            Halt::Wai            => f.write_str("WAI instruction encountered"),
            Halt::Test           => f.write_str("TEST instruction encountered"),
            Halt::Breakpoint(s)  => f.write_str(s),
            Halt::CountExhausted => f.write_str("Instruction count reached"),
            Halt::CycleLimit     => f.write_str("Cycle limit exceeded"),
            Halt::Interrupted    => f.write_str("Execution interrupted"),
        }
    }
}

/// Anything that can cause a step to abruptly fail to finish.
enum StepBreak {
    /// The run halted.
    Halt(Halt),
    /// A simulation error occurred.
    Err(SimErr),
}
impl From<SimErr> for StepBreak {
    fn from(value: SimErr) -> Self {
        Self::Err(value)
    }
}

/// Configuration flags for [`Simulator`].
///
/// Peripheral flags only go into effect in [`Simulator::new`].
/// `allow_swi` can be changed at any time.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct SimFlags {
    /// Whether `SWI` takes its interrupt vector.
    ///
    /// If false, `SWI` halts the run with [`Halt::Swi`].
    ///
    /// By default, this flag is `false`.
    pub allow_swi: bool,

    /// Whether to install the timer.
    ///
    /// By default, this flag is `true`.
    pub timer: bool,

    /// Whether to install the parallel I/O.
    ///
    /// By default, this flag is `true`.
    pub parallel_io: bool,

    /// Whether the host should install the BUFFALO monitor (see [`crate::monitor::install`]).
    ///
    /// The simulator itself never reads this flag.
    ///
    /// By default, this flag is `true`.
    pub rom_monitor: bool,

    /// How memory is filled on creation.
    ///
    /// By default, this is [`MachineInitStrategy::default`] (all zero).
    pub machine_init: MachineInitStrategy,
}

#[allow(clippy::derivable_impls)]
impl Default for SimFlags {
    fn default() -> Self {
        Self {
            allow_swi: false,
            timer: true,
            parallel_io: true,
            rom_monitor: true,
            machine_init: Default::default(),
        }
    }
}

/// Parameters of a run (see [`Simulator::step`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StepOptions {
    /// The maximum number of instructions to execute.
    ///
    /// Virtual function calls do not count.
    /// `Some(0)` behaves like `Some(1)`.
    pub count: Option<u64>,
    /// Whether to write a trace of every instruction to the console.
    pub trace: bool,
    /// Halts the run once the cycle count reaches this value.
    pub cycle_limit: Option<u64>,
    /// Overrides the branch decision of the first instruction of the run.
    pub branch_force: Option<BranchForce>,
}
impl StepOptions {
    /// Runs at most `n` instructions.
    pub fn count(n: u64) -> Self {
        Self { count: Some(n), ..Default::default() }
    }
    /// Enables tracing.
    pub fn traced(self) -> Self {
        Self { trace: true, ..self }
    }
}

/// A handle to the run flag of a [`Simulator`].
///
/// The flag is set at the start of a run and cleared when it ends.
/// Clearing it from elsewhere (e.g., another thread) halts the run
/// at the next instruction boundary.
pub type RunFlag = Arc<AtomicBool>;

/// Executes 68HC11 machine code.
#[derive(Debug)]
pub struct Simulator {
    // ------------------ SIMULATION STATE ------------------
    // Calling [`Simulator::reset`] resets these values.

    /// The CPU registers.
    pub regs: RegFile,

    /// The simulator's memory.
    pub mem: Memory,

    /// The pending interrupt sources.
    pub ints: InterruptController,

    /// Cycles elapsed since the last cycle reset.
    ///
    /// Use [`Simulator::reset_cycles`] to reset this, so that peripherals are notified.
    pub cycles: u64,

    // ------------------ CONFIG/DEBUG STATE ------------------
    // Calling [`Simulator::reset`] does not reset these values.

    /// Subscribers of system events.
    pub events: EventBus,

    /// The installed peripherals.
    pub devices: Peripherals,

    /// Breakpoints, in insertion order.
    ///
    /// If several breakpoints share an address, only the last one is consulted.
    pub breakpoints: Vec<Breakpoint>,

    /// Virtual functions, by entry address.
    pub vfuncs: HashMap<u16, VirtualFunction>,

    /// The loaded MAP file, used to show source lines while tracing.
    pub map: Option<MapFile>,

    /// Character I/O with the host.
    pub console: Console,

    /// Configuration settings for the simulator.
    pub flags: SimFlags,

    running: RunFlag,
}
impl Simulator where Simulator: Send {}

impl Simulator {
    /// Creates a new simulator, installing the peripherals the flags ask for.
    ///
    /// The PC is left at 0; the caller decides where execution starts.
    pub fn new(flags: SimFlags) -> Self {
        let mut sim = Self {
            regs: RegFile::new(),
            mem: Memory::new(&mut flags.machine_init.generator()),
            ints: InterruptController::new(),
            cycles: 0,

            events: EventBus::new(),
            devices: Peripherals::new(),
            breakpoints: vec![],
            vfuncs: HashMap::new(),
            map: None,
            console: Console::default(),
            flags,
            running: Arc::default(),
        };

        if flags.timer {
            sim.install(Timer::new());
        }
        if flags.parallel_io {
            sim.install(Pio::new());
        }
        sim
    }

    /// Installs a peripheral, returning its index in [`Simulator::devices`].
    pub fn install(&mut self, dev: impl Peripheral) -> usize {
        self.devices.install(dev, &mut self.mem, &mut self.events.subs)
    }

    /// Installs a virtual function, replacing any other at its address.
    pub fn add_vfunc(&mut self, vf: VirtualFunction) {
        self.vfuncs.insert(vf.addr, vf);
    }

    /// Posts an event and delivers it (and anything its delivery posts) immediately.
    pub fn notify(&mut self, kind: EventKind) {
        self.events.queue.post(kind, None);

        let Self { mem, devices, events, ints, cycles, .. } = self;
        let mut ctx = PeriphCtx { mem: mem.raw_mut(), ints, events: &mut events.queue, cycles: *cycles };
        devices.deliver(&mut events.subs, &mut ctx);
    }

    /// Splits off the register file from memory as the CPU sees it.
    fn split(&mut self) -> (&mut RegFile, SimBus<'_>) {
        let Self { regs, mem, devices, events, ints, cycles, .. } = self;
        let dispatch = Dispatch {
            devices,
            subs: &mut events.subs,
            queue: &mut events.queue,
            ints,
            cycles: *cycles,
        };
        (regs, SimBus { mem, dispatch })
    }

    /// Memory as the CPU sees it.
    ///
    /// Accesses through this trigger memory filters (and so peripheral side effects).
    /// For accesses without side effects, use [`Memory::raw`].
    pub fn bus(&mut self) -> impl Bus + '_ {
        self.split().1
    }

    /// Copies bytes into memory, without side effects.
    pub fn load_bytes(&mut self, addr: u16, bytes: &[u8]) {
        let raw = self.mem.raw_mut();
        for (i, &b) in bytes.iter().enumerate() {
            raw.write_u8(addr.wrapping_add(i as u16), b);
        }
    }

    /// Pushes a word onto the stack.
    pub fn push16(&mut self, val: u16) {
        let (regs, mut bus) = self.split();
        regs.push16(&mut bus, val);
    }
    /// Pulls a word off the stack.
    pub fn pull16(&mut self) -> u16 {
        let (regs, mut bus) = self.split();
        regs.pull16(&mut bus)
    }

    /// Gets a reference to the run flag.
    pub fn run_flag(&self) -> &RunFlag {
        &self.running
    }
    /// Whether a run is in progress.
    pub fn running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Blocks until the host sends a character, polling the run flag every `poll`.
    ///
    /// Returns `None` if the run flag was cleared or the host is gone.
    pub fn wait_char(&mut self, poll: Duration) -> Option<u8> {
        self.console.wait_char(&self.running, poll)
    }

    /// Resets the machine.
    ///
    /// This resets registers, moves the register window back to `0x1000` with its reset values,
    /// clears pending interrupts and events, resets peripherals,
    /// and loads the PC from the reset vector.
    ///
    /// Note that this function preserves:
    /// - Flags
    /// - Breakpoints
    /// - Virtual functions
    /// - Installed peripherals and event subscribers
    /// - The cycle count (see [`Simulator::reset_cycles`])
    /// - Run flag reference (i.e., anything with access to the run flag can still control the Simulator)
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.map_registers(DEFAULT_REG_BASE);
        self.mem.reset_registers();
        self.ints = InterruptController::new();
        self.devices.reset_all();
        while self.events.queue.pop().is_some() {}

        let pc = self.mem.raw().read_u16(RESET_VECTOR);
        self.regs.set_pc(pc);
    }

    /// Resets the cycle count to 0, notifying peripherals with [`EventKind::CycReset`].
    pub fn reset_cycles(&mut self) {
        self.cycles = 0;
        self.notify(EventKind::CycReset);
    }

    /// Loads an S-record file into memory (through memory filters).
    ///
    /// If the path has no extension or another one, `.s19` is used.
    pub fn load_s19_file(&mut self, path: impl AsRef<Path>) -> Result<S19Summary, S19Error> {
        let path = load::add_extension(path.as_ref(), "s19");
        let text = std::fs::read_to_string(&path)?;
        let summary = load::read_s19(&text, &mut self.bus())?;
        log::debug!("loaded {} ({} bytes, start ${:04X})", path.display(), summary.bytes, summary.start);
        Ok(summary)
    }

    /// Checks memory against an S-record file.
    pub fn verify_s19_file(&mut self, path: impl AsRef<Path>) -> Result<(), S19Error> {
        let path = load::add_extension(path.as_ref(), "s19");
        let text = std::fs::read_to_string(path)?;
        load::verify_s19(&text, &mut self.bus())
    }

    /// Loads a MAP file, which is then used to show source lines while tracing.
    ///
    /// Source files are looked up relative to the MAP file's directory.
    pub fn load_map_file(&mut self, path: impl AsRef<Path>) -> Result<(), MapError> {
        let path = load::add_extension(path.as_ref(), "map");
        let map = MapFile::read(&path)?;
        log::debug!("loaded {} ({} symbols)", path.display(), map.symbols.len());
        self.map = Some(map);
        Ok(())
    }

    /// Runs until something halts the run.
    pub fn run(&mut self) -> Result<Halt, SimErr> {
        self.step(StepOptions::default())
    }

    /// Runs until the cycle count reaches `limit` (or something else halts the run).
    pub fn run_until_cycles(&mut self, limit: u64) -> Result<Halt, SimErr> {
        self.step(StepOptions { cycle_limit: Some(limit), ..Default::default() })
    }

    /// Resets the cycle count, then runs from `addr`.
    pub fn go(&mut self, addr: u16) -> Result<Halt, SimErr> {
        self.regs.set_pc(addr);
        self.reset_cycles();
        self.run()
    }

    /// Calls the subroutine at `addr`.
    ///
    /// The return address `$FFFF` is pushed, and a breakpoint that removes itself
    /// is placed there, so the run halts with `CALL breakpoint` once the subroutine returns.
    pub fn call(&mut self, addr: u16) -> Result<Halt, SimErr> {
        self.push16(0xFFFF);
        self.breakpoints.push(Breakpoint::new(0xFFFF).with_text("CALL breakpoint").autoremove());
        self.regs.set_pc(addr);
        self.run()
    }

    /// Runs instructions until something halts the run.
    ///
    /// Every instruction boundary:
    /// 1. If a virtual function is installed at the PC, it is called
    ///     and the PC is pulled off the stack. Nothing else happens in this boundary.
    /// 2. Unless this is the first boundary of the run, the breakpoint at the PC is consulted.
    /// 3. If an unmasked interrupt is pending, the machine state is stacked
    ///     and the PC is loaded from the interrupt's vector.
    /// 4. An instruction is fetched and decoded, its cycles are added to the cycle count, and it executes.
    /// 5. Pending interrupts are flushed and every peripheral is updated.
    /// 6. The instruction count, cycle limit, and run flag are checked.
    pub fn step(&mut self, opts: StepOptions) -> Result<Halt, SimErr> {
        self.running.store(true, Ordering::Relaxed);
        self.notify(EventKind::SimStart);
        self.breakpoints.iter_mut().for_each(Breakpoint::restore_count);
        log::debug!("run started at ${:04X} (cycle {})", self.regs.pc(), self.cycles);

        let mut remaining = opts.count;
        let mut first = true;
        let result = loop {
            let pc = self.regs.pc();
            if let Some(mut vf) = self.vfuncs.remove(&pc) {
                let result = vf.call(self);
                self.vfuncs.entry(pc).or_insert(vf);
                if let Err(e) = result {
                    break Err(e);
                }

                let ret = self.pull16();
                self.regs.set_pc(ret);
                first = false;

                if !self.running.load(Ordering::Relaxed) {
                    break Ok(Halt::Interrupted);
                }
                continue;
            }

            let force = if first { opts.branch_force } else { None };
            match self.boundary(first, force, opts.trace) {
                Ok(()) => {},
                Err(StepBreak::Halt(h)) => break Ok(h),
                Err(StepBreak::Err(e)) => break Err(e),
            }
            first = false;

            if let Some(n) = &mut remaining {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    break Ok(Halt::CountExhausted);
                }
            }
            if opts.cycle_limit.is_some_and(|limit| self.cycles >= limit) {
                break Ok(Halt::CycleLimit);
            }
            if !self.running.load(Ordering::Relaxed) {
                break Ok(Halt::Interrupted);
            }
        };

        self.running.store(false, Ordering::Relaxed);
        self.notify(EventKind::SimEnd);
        match &result {
            Ok(halt) => log::debug!("run halted at ${:04X} (cycle {}): {halt}", self.regs.pc(), self.cycles),
            Err(e) => log::debug!("run failed at ${:04X} (cycle {}): {e}", self.regs.pc(), self.cycles),
        }
        result
    }

    /// One instruction boundary (not including virtual functions).
    fn boundary(&mut self, first: bool, force: Option<BranchForce>, trace: bool) -> Result<(), StepBreak> {
        if !first {
            self.check_breakpoint(self.regs.pc())?;
        }

        let hprio = self.mem.raw().reg(SpecialReg::HPRIO);
        if let Some(src) = self.ints.next_int(hprio, &self.regs) {
            let (regs, mut bus) = self.split();
            exec::push_state(regs, &mut bus);
            regs.set_i(CC_I);
            if src == IntSource::Xirq {
                regs.set_x_bit(CC_X);
            }
            let vector = bus.read_u16(src.vector());
            regs.set_pc(vector);
            log::trace!("{src:?} interrupt taken through ${:04X} to ${vector:04X}", src.vector());
        }

        let (pc, x, y) = (self.regs.pc(), self.regs.x(), self.regs.y());
        let decoded = {
            let (_, mut bus) = self.split();
            isa::decode(pc, x, y, |addr| bus.read_u8(addr))
        };
        let instr = decoded.map_err(|opcode| SimErr::IllegalOperation { pc, opcode })?;

        if trace {
            let mut out = String::new();
            if let Some(map) = &self.map {
                match map.source_line(pc) {
                    Some(src) => out.push_str(&format!("{}:{} {pc:04X}  {}\n", src.file, src.line, src.text)),
                    None => out.push_str("<<< No source line found >>>\n"),
                }
            }
            out.push_str(&dasm::format_line(&instr));
            out.push('\n');
            self.console.write_str(&out);
        } else if log::log_enabled!(log::Level::Trace) {
            log::trace!("{}", dasm::format_line(&instr));
        }

        let elapsed = instr.info.cycles;
        self.cycles += u64::from(elapsed);

        let allow_swi = self.flags.allow_swi;
        let (regs, bus) = self.split();
        Executor { regs, bus, force, allow_swi }.execute(&instr)?;

        self.ints.flush();
        self.update_devices(elapsed.into());

        if trace {
            let out = format!("{}\n{}\n", self.regs, self.preview());
            self.console.write_str(&out);
        }
        Ok(())
    }

    /// Consults the breakpoint at `pc`, if there is one.
    fn check_breakpoint(&mut self, pc: u16) -> Result<(), StepBreak> {
        let Some(ix) = self.breakpoints.iter().rposition(|bp| bp.addr == pc) else { return Ok(()) };

        let allowed = match self.breakpoints[ix].predicate.take() {
            Some(mut pred) => {
                let result = pred(&*self);
                self.breakpoints[ix].predicate = Some(pred);
                result?
            },
            None => true,
        };

        if allowed && self.breakpoints[ix].count_down() {
            let text = match self.breakpoints[ix].autoremove {
                true  => self.breakpoints.remove(ix).text,
                false => self.breakpoints[ix].text.clone(),
            };
            return Err(StepBreak::Halt(Halt::Breakpoint(text)));
        }
        Ok(())
    }

    fn update_devices(&mut self, elapsed: u32) {
        let Self { mem, devices, events, ints, cycles, .. } = self;
        let mut ctx = PeriphCtx { mem: mem.raw_mut(), ints, events: &mut events.queue, cycles: *cycles };
        devices.update_all(elapsed, &mut events.subs, &mut ctx);
    }

    /// Disassembles the instruction at the PC, without side effects.
    fn preview(&self) -> String {
        let raw = self.mem.raw();
        let (pc, x, y) = (self.regs.pc(), self.regs.x(), self.regs.y());
        match isa::decode(pc, x, y, |addr| raw.read_u8(addr)) {
            Ok(instr) => dasm::format_line(&instr),
            Err(_) => format!("{pc:04X}  ILLOP"),
        }
    }
}
impl Default for Simulator {
    fn default() -> Self {
        Self::new(Default::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    use crate::alu::CC_Z;

    use super::console::Console;
    use super::debug::Comparator;
    use super::regs::Reg;
    use super::*;

    fn sim_at(code: &[u8]) -> Simulator {
        let mut sim = Simulator::new(SimFlags { timer: false, parallel_io: false, ..Default::default() });
        sim.load_bytes(0xC000, code);
        sim.regs.set_pc(0xC000);
        sim.regs.set_sp(0x00FF);
        sim.regs.set_cc(0x00);
        sim
    }

    // LDAA #3 / loop: DECA, BNE loop / BRA $C010 / ... / $C010: BRA *
    fn countdown() -> Simulator {
        let mut sim = sim_at(&[0x86, 0x03, 0x4A, 0x26, 0xFD, 0x20, 0x09]);
        sim.load_bytes(0xC010, &[0x20, 0xFE]);
        sim
    }

    #[test]
    fn run_two_instructions() {
        let mut sim = sim_at(&[0x86, 0x05, 0x4A]);
        assert_eq!(sim.step(StepOptions::count(2)), Ok(Halt::CountExhausted));
        assert_eq!(sim.regs.a(), 4);
        assert!(!sim.regs.is_zero_set());
        assert!(!sim.regs.is_negative_set());
        assert_eq!(sim.regs.pc(), 0xC003);
        assert_eq!(sim.cycles, 4);
        assert!(!sim.running());
    }

    #[test]
    fn breakpoint_fires_when_reached() {
        let mut sim = countdown();
        sim.breakpoints.push(Breakpoint::new(0xC010));

        assert_eq!(sim.run(), Ok(Halt::Breakpoint("Unknown Breakpoint".to_string())));
        assert_eq!(sim.regs.pc(), 0xC010);
        assert_eq!(sim.regs.a(), 0);
        assert_eq!(sim.breakpoints[0].count, 0);

        // again, from the top
        sim.breakpoints[0].restore_count();
        sim.regs.set_pc(0xC000);
        assert_eq!(sim.run(), Ok(Halt::Breakpoint("Unknown Breakpoint".to_string())));
        assert_eq!(sim.regs.pc(), 0xC010);
    }

    #[test]
    fn breakpoint_skipped_at_start() {
        let mut sim = countdown();
        sim.breakpoints.push(Breakpoint::new(0xC010).with_text("loop"));
        sim.regs.set_pc(0xC010);

        // the first BRA runs, and the breakpoint fires when it comes back
        assert_eq!(sim.step(StepOptions::count(5)), Ok(Halt::Breakpoint("loop".to_string())));
        assert_eq!(sim.cycles, 3);
    }

    #[test]
    fn breakpoint_counts_and_conditions() {
        let mut sim = countdown();
        sim.breakpoints.push(Breakpoint::new(0xC002).with_count(2));
        assert!(matches!(sim.run(), Ok(Halt::Breakpoint(_))));
        assert_eq!(sim.regs.a(), 2);

        let mut sim = countdown();
        sim.breakpoints.push(Breakpoint::new(0xC002).when_reg(Reg::A, Comparator::Eq(1)));
        assert!(matches!(sim.run(), Ok(Halt::Breakpoint(_))));
        assert_eq!(sim.regs.a(), 1);

        // the last breakpoint at an address wins
        let mut sim = countdown();
        sim.breakpoints.push(Breakpoint::new(0xC002).with_text("first"));
        sim.breakpoints.push(Breakpoint::new(0xC002).with_text("second").with_count(3));
        assert_eq!(sim.run(), Ok(Halt::Breakpoint("second".to_string())));
        assert_eq!(sim.regs.a(), 1);

        // predicate errors abort the run
        let mut sim = countdown();
        sim.breakpoints.push(Breakpoint::new(0xC002).with_predicate(|_| Err(SimErr::Callback("bad".to_string()))));
        assert_eq!(sim.run(), Err(SimErr::Callback("bad".to_string())));
        assert!(sim.breakpoints[0].is_conditional());
    }

    #[test]
    fn instruction_halts() {
        // SWI
        let mut sim = sim_at(&[0x3F]);
        assert_eq!(sim.run(), Ok(Halt::Swi));

        let mut sim = sim_at(&[0x3F]);
        sim.flags.allow_swi = true;
        sim.load_bytes(0xFFF6, &[0xD0, 0x00]);
        sim.load_bytes(0xD000, &[0x00]);
        assert_eq!(sim.run(), Ok(Halt::Test));
        assert_eq!(sim.regs.pc(), 0xD001);
        assert_eq!(sim.regs.sp(), 0x00F6);

        let mut sim = sim_at(&[0xCF]);
        assert_eq!(sim.run(), Ok(Halt::Stop));
        assert_eq!(Halt::Stop.to_string(), "STOP instruction encountered");
    }

    #[test]
    fn illegal_operation() {
        let mut sim = sim_at(&[0x01, 0x41]);
        let err = sim.run().unwrap_err();
        assert_eq!(err, SimErr::IllegalOperation { pc: 0xC001, opcode: Opcode { page: None, byte: 0x41 } });
        assert_eq!(sim.regs.pc(), 0xC001);
        assert!(err.to_string().starts_with("Illegal instruction encountered"));

        let mut sim = sim_at(&[0x18, 0x01]);
        assert!(matches!(sim.run(), Err(SimErr::IllegalOperation { opcode: Opcode { page: Some(0x18), byte: 0x01 }, .. })));
    }

    #[test]
    fn cycle_limit_and_interruption() {
        // BRA * (3 cycles)
        let mut sim = sim_at(&[0x20, 0xFE]);
        assert_eq!(sim.run_until_cycles(10), Ok(Halt::CycleLimit));
        assert_eq!(sim.cycles, 12);

        // a host thread stops the run
        let mut sim = sim_at(&[0x20, 0xFE]);
        let flag = Arc::clone(sim.run_flag());
        let stopper = std::thread::spawn(move || {
            while !flag.load(Ordering::Relaxed) {
                std::thread::yield_now();
            }
            flag.store(false, Ordering::Relaxed);
        });
        assert_eq!(sim.run(), Ok(Halt::Interrupted));
        stopper.join().unwrap();
    }

    #[test]
    fn branch_force_applies_to_first_instruction() {
        // BNE +2, BNE +2, NOP
        let mut sim = sim_at(&[0x26, 0x02, 0x26, 0x02, 0x01]);
        sim.regs.set_cc(CC_Z);
        let opts = StepOptions { count: Some(1), branch_force: Some(BranchForce::Always), ..Default::default() };
        assert_eq!(sim.step(opts), Ok(Halt::CountExhausted));
        assert_eq!(sim.regs.pc(), 0xC004);

        // not forced anymore
        sim.regs.set_pc(0xC002);
        assert_eq!(sim.step(StepOptions::count(1)), Ok(Halt::CountExhausted));
        assert_eq!(sim.regs.pc(), 0xC004);
        sim.regs.set_pc(0xC000);
        let opts = StepOptions { count: Some(2), branch_force: Some(BranchForce::Never), ..Default::default() };
        sim.regs.set_cc(0x00);
        assert_eq!(sim.step(opts), Ok(Halt::CountExhausted));
        // first BNE was forced not taken, second one was taken
        assert_eq!(sim.regs.pc(), 0xC006);
    }

    #[test]
    fn interrupts_before_fetch() {
        let mut sim = sim_at(&[0x01]);
        sim.load_bytes(IntSource::Irq.vector(), &[0xD0, 0x00]);
        sim.load_bytes(0xD000, &[0x01]);
        sim.regs.set_d(0x1234);

        sim.ints.signal(IntSource::Irq);
        assert_eq!(sim.step(StepOptions::count(1)), Ok(Halt::CountExhausted));
        assert_eq!(sim.regs.pc(), 0xD001);
        assert_eq!(sim.regs.sp(), 0x00F6);
        assert!(sim.regs.is_i_set());
        assert_eq!(sim.mem.raw().read_u16(0x00FE), 0xC000);
        assert_eq!(sim.mem.raw().read_u8(0x00F9), 0x12);
        // taken once
        assert!(!sim.ints.is_pending(IntSource::Irq));

        // masked: the instruction runs, and the source is flushed after it
        let mut sim = sim_at(&[0x01]);
        sim.regs.set_i(CC_I);
        sim.ints.signal(IntSource::Irq);
        assert_eq!(sim.step(StepOptions::count(1)), Ok(Halt::CountExhausted));
        assert_eq!(sim.regs.pc(), 0xC001);
        assert!(!sim.ints.is_pending(IntSource::Irq));

        // XIRQ also sets X
        let mut sim = sim_at(&[0x01]);
        sim.load_bytes(IntSource::Xirq.vector(), &[0xD0, 0x00]);
        sim.load_bytes(0xD000, &[0x01]);
        sim.ints.signal(IntSource::Xirq);
        assert_eq!(sim.step(StepOptions::count(1)), Ok(Halt::CountExhausted));
        assert!(sim.regs.is_x_set() && sim.regs.is_i_set());
    }

    #[test]
    fn virtual_functions() {
        // JSR $D000, INCA, TEST
        let mut sim = sim_at(&[0xBD, 0xD0, 0x00, 0x4C, 0x00]);
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        sim.add_vfunc(VirtualFunction::new(0xD000, "set A", move |sim| {
            counter.fetch_add(1, Ordering::Relaxed);
            sim.regs.set_a(0x41);
            Ok(())
        }));

        assert_eq!(sim.run(), Ok(Halt::Test));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert_eq!(sim.regs.a(), 0x42);
        assert_eq!(sim.regs.sp(), 0x00FF);
        // the function stays installed
        assert!(sim.vfuncs.contains_key(&0xD000));
        // JSR, INCA, TEST (virtual functions take no cycles)
        assert_eq!(sim.cycles, 6 + 2 + 1);

        // errors abort the run
        let mut sim = sim_at(&[0xBD, 0xD0, 0x00]);
        sim.add_vfunc(VirtualFunction::new(0xD000, "fail", |_| Err(SimErr::UnhandledInterrupt("!!! Unhandled interrupt".to_string()))));
        assert_eq!(sim.run().unwrap_err().to_string(), "!!! Unhandled interrupt");
    }

    #[test]
    fn call_subroutine() {
        // INCA, RTS
        let mut sim = sim_at(&[]);
        sim.load_bytes(0xD000, &[0x4C, 0x39]);

        assert_eq!(sim.call(0xD000), Ok(Halt::Breakpoint("CALL breakpoint".to_string())));
        assert_eq!(sim.regs.a(), 1);
        assert_eq!(sim.regs.pc(), 0xFFFF);
        assert_eq!(sim.regs.sp(), 0x00FF);
        assert!(sim.breakpoints.is_empty());
    }

    #[test]
    fn events_and_cycle_reset() {
        let mut sim = sim_at(&[0x01, 0x01, 0x00]);
        let seen = Arc::new(Mutex::new(vec![]));
        for &kind in &[EventKind::SimStart, EventKind::SimEnd, EventKind::CycReset] {
            let seen = Arc::clone(&seen);
            sim.events.subscribe(kind, move |e| seen.lock().unwrap().push(e.kind));
        }

        sim.cycles = 100;
        assert_eq!(sim.go(0xC000), Ok(Halt::Test));
        assert_eq!(sim.cycles, 2 + 2 + 1);
        assert_eq!(*seen.lock().unwrap(), [EventKind::CycReset, EventKind::SimStart, EventKind::SimEnd]);
    }

    #[test]
    fn reset_machine() {
        let mut sim = sim_at(&[]);
        sim.load_bytes(0xFFFE, &[0xE0, 0x00]);
        sim.mem.map_registers(0x2000);
        sim.regs.set_a(0x12);
        sim.ints.signal(IntSource::Irq);
        sim.breakpoints.push(Breakpoint::new(0xE000));

        sim.reset();
        assert_eq!(sim.regs.pc(), 0xE000);
        assert_eq!(sim.regs.a(), 0);
        assert_eq!(sim.mem.raw().reg_base(), 0x1000);
        assert_eq!(sim.mem.raw().reg(SpecialReg::HPRIO), 0x06);
        assert!(!sim.ints.is_pending(IntSource::Irq));
        assert_eq!(sim.breakpoints.len(), 1);
    }

    #[test]
    fn trace_output() {
        let mut sim = sim_at(&[0x86, 0x05, 0x4A]);
        let (console, host) = Console::pair();
        sim.console = console;

        assert_eq!(sim.step(StepOptions::count(1).traced()), Ok(Halt::CountExhausted));
        let out = host.drain();
        let lines: Vec<_> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("C000  86 05 "));
        assert!(lines[0].ends_with("[ 2]  LDAA  #$05"));
        assert!(lines[1].starts_with("PC-C002 A-05 B-00"));
        assert!(lines[2].starts_with("C002  4A "));
        assert!(lines[2].ends_with("DECA  "));

        // the preview shows illegal opcodes without failing
        sim.load_bytes(0xC002, &[0x41]);
        sim.regs.set_pc(0xC000);
        assert_eq!(sim.step(StepOptions::count(1).traced()), Ok(Halt::CountExhausted));
        assert!(host.drain().ends_with("C002  ILLOP\n"));
    }

    #[test]
    fn timer_counts_cycles() {
        let mut sim = Simulator::new(Default::default());
        assert_eq!(sim.devices.names().collect::<Vec<_>>(), ["Timer", "Parallel I/O"]);
        sim.load_bytes(0xC000, &[0x01, 0x01, 0x01, 0x00]);
        sim.regs.set_pc(0xC000);

        assert_eq!(sim.run(), Ok(Halt::Test));
        assert_eq!(sim.devices.timer().map(Timer::counter), Some(6));
    }

    #[test]
    fn program_reads_its_own_registers() {
        // LDAA $103C (HPRIO)
        let mut sim = sim_at(&[0xB6, 0x10, 0x3C]);
        assert_eq!(sim.step(StepOptions::count(1)), Ok(Halt::CountExhausted));
        assert_eq!(sim.regs.a(), 0x06);

        // moving the register window through INIT
        let mut sim = sim_at(&[0x86, 0x02, 0xB7, 0x10, 0x3D]);
        assert_eq!(sim.step(StepOptions::count(2)), Ok(Halt::CountExhausted));
        assert_eq!(sim.mem.raw().reg_base(), 0x2000);
    }
}
