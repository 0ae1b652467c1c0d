//! Emulation of the BUFFALO ROM monitor's utility subroutines.
//!
//! Programs written for the EVB/EVBU boards call into BUFFALO's jump table
//! (e.g., `JSR OUTA` at `$FFB8`) for character I/O.
//! [`install`] replaces each of these entry points with a virtual function,
//! which talks to the host through the simulator's [`Console`](crate::sim::console::Console).
//!
//! It also sets up the interrupt vectors the way BUFFALO does:
//! every vector points into a table of 3-byte jump slots in RAM at [`JSCI`],
//! which programs overwrite with `JMP handler` to install their interrupt handlers.
//! Slots that are left alone jump to [`STOPIT`], which halts the run with an
//! "Unhandled interrupt" error.
//!
//! ```
//! use hc11_sim::monitor;
//! use hc11_sim::sim::{Simulator, SimFlags};
//!
//! let mut sim = Simulator::new(SimFlags::default());
//! monitor::install(&mut sim);
//!
//! // the IRQ vector points at its slot in the jump table
//! assert_eq!(sim.mem.raw().read_u16(0xFFF2), monitor::JSCI + 42);
//! assert!(sim.vfuncs.contains_key(&monitor::OUTA));
//! ```

use std::time::Duration;

use crate::alu::CC_Z;
use crate::sim::events::EventKind;
use crate::sim::mem::Bus;
use crate::sim::debug::VirtualFunction;
use crate::sim::{SimErr, Simulator};

/// The scratch word `hexbin` shifts hex digits into (`SHFTREG` in BUFFALO 3.4).
pub const SHFTREG: u16 = 0x0096;
/// The start of the secondary interrupt jump table.
pub const JSCI: u16 = 0x00C4;
/// The routine unhandled interrupts jump to.
pub const STOPIT: u16 = 0xE371;
/// The entry point of `OUTA`, which prints the character in A.
pub const OUTA: u16 = 0xFFB8;
/// The entry point of `INCHAR`, which waits for a character and puts it in A.
pub const INCHAR: u16 = 0xFFCD;

const BUFFALO_START: u16 = 0xE000;
const JMP_EXT: u8 = 0x7E;
const SLOT_COUNT: u16 = 20;
const OUTST0_LIMIT: usize = 300;
const INPUT_POLL: Duration = Duration::from_millis(100);

type Service = fn(&mut Simulator) -> Result<(), SimErr>;

const SERVICES: [(u16, &str, Service); 18] = [
    (0xFF82, "RPRINT", rprint),
    (0xFF85, "HEXBIN", hexbin),
    (0xFF8E, "CHGBYT", chgbyt),
    (0xFFA0, "UPCASE", upcase),
    (0xFFA3, "WCHEK",  wchek),
    (0xFFAC, "INPUT",  input),
    (0xFFB2, "OUTLHL", outlhl),
    (0xFFB5, "OUTRHL", outrhl),
    (OUTA,   "OUTA",   outa),
    (0xFFBB, "OUT1BY", out1by),
    (0xFFBE, "OUT1BS", out1bs),
    (0xFFC1, "OUT2BS", out2bs),
    (0xFFC4, "OUTCRL", outcrl),
    (0xFFC7, "OUTSTR", outstr),
    (0xFFCA, "OUTST0", outst0),
    (INCHAR, "INCHAR", inchar),
    (0xFFD0, "VECINT", vecint_service),
    (STOPIT, "STOPIT", unhandled_interrupt),
];

/// Installs the BUFFALO utility subroutines and interrupt vectors into the simulator.
///
/// Every interrupt vector (`$FFD6`-`$FFFC`) is pointed at its slot in the jump table,
/// every slot is reset to `JMP STOPIT`, and the reset vector is pointed at BUFFALO's start.
pub fn install(sim: &mut Simulator) {
    for (addr, name, func) in SERVICES {
        sim.add_vfunc(VirtualFunction::new(addr, name, func));
    }

    let raw = sim.mem.raw_mut();
    for i in 0..SLOT_COUNT {
        raw.write_u16(0xFFD6 + 2 * i, JSCI + 3 * i);
    }
    raw.write_u16(0xFFFE, BUFFALO_START);
    vecint(sim, true);

    log::debug!("installed BUFFALO monitor ({} services)", SERVICES.len());
}

/// Fills the jump table with `JMP STOPIT`.
///
/// Unless `force` is set, slots that already hold a `JMP` are kept.
pub fn vecint(sim: &mut Simulator, force: bool) {
    let mut bus = sim.bus();
    for i in 0..SLOT_COUNT {
        let slot = JSCI + 3 * i;
        if force || bus.read_u8(slot) != JMP_EXT {
            bus.write_u8(slot, JMP_EXT);
            bus.write_u16(slot + 1, STOPIT);
        }
    }
}

fn vecint_service(sim: &mut Simulator) -> Result<(), SimErr> {
    vecint(sim, false);
    Ok(())
}

fn unhandled_interrupt(_: &mut Simulator) -> Result<(), SimErr> {
    Err(SimErr::UnhandledInterrupt(String::from("!!! Unhandled interrupt")))
}

fn rprint(sim: &mut Simulator) -> Result<(), SimErr> {
    let regs = format!("{}\n", sim.regs);
    sim.console.write_str(&regs);
    Ok(())
}

fn hexbin(sim: &mut Simulator) -> Result<(), SimErr> {
    // Non-hex characters are left for the program to check.
    let Some(digit) = char::from(sim.regs.a()).to_digit(16) else { return Ok(()) };

    let mut bus = sim.bus();
    let val = bus.read_u16(SHFTREG) << 4 | digit as u16;
    bus.write_u16(SHFTREG, val);
    Ok(())
}

fn chgbyt(sim: &mut Simulator) -> Result<(), SimErr> {
    let x = sim.regs.x();
    let mut bus = sim.bus();
    let val = bus.read_u8(SHFTREG + 1);
    bus.write_u8(x, val);
    Ok(())
}

fn upcase(sim: &mut Simulator) -> Result<(), SimErr> {
    let a = sim.regs.a();
    sim.regs.set_a(a.to_ascii_uppercase());
    Ok(())
}

fn wchek(sim: &mut Simulator) -> Result<(), SimErr> {
    let flags = match sim.regs.a() {
        b' ' | b',' | b'\t' => CC_Z,
        _ => 0,
    };
    sim.regs.set_z(flags);
    Ok(())
}

fn input(sim: &mut Simulator) -> Result<(), SimErr> {
    let c = sim.console.try_char().unwrap_or(0);
    sim.regs.set_a(c);
    Ok(())
}

fn inchar(sim: &mut Simulator) -> Result<(), SimErr> {
    sim.notify(EventKind::CharWait);
    // If this gives up (the run was interrupted), the step loop halts right after.
    if let Some(c) = sim.wait_char(INPUT_POLL) {
        sim.regs.set_a(c);
    }
    sim.notify(EventKind::NoCharWait);
    Ok(())
}

fn write_char(sim: &mut Simulator, c: char) {
    let mut buf = [0; 4];
    sim.console.write_str(c.encode_utf8(&mut buf));
}

fn outlhl(sim: &mut Simulator) -> Result<(), SimErr> {
    let text = format!("{:X}", sim.regs.a() >> 4);
    sim.console.write_str(&text);
    Ok(())
}

fn outrhl(sim: &mut Simulator) -> Result<(), SimErr> {
    let text = format!("{:X}", sim.regs.a() & 0x0F);
    sim.console.write_str(&text);
    Ok(())
}

fn outa(sim: &mut Simulator) -> Result<(), SimErr> {
    let c = char::from(sim.regs.a());
    write_char(sim, c);
    Ok(())
}

fn out1by(sim: &mut Simulator) -> Result<(), SimErr> {
    let x = sim.regs.x();
    let val = sim.bus().read_u8(x);
    sim.console.write_str(&format!("{val:02X}"));
    sim.regs.set_x(x.wrapping_add(1));
    Ok(())
}

fn out1bs(sim: &mut Simulator) -> Result<(), SimErr> {
    out1by(sim)?;
    write_char(sim, ' ');
    Ok(())
}

fn out2bs(sim: &mut Simulator) -> Result<(), SimErr> {
    out1by(sim)?;
    out1bs(sim)
}

fn outcrl(sim: &mut Simulator) -> Result<(), SimErr> {
    write_char(sim, '\n');
    Ok(())
}

fn outstr(sim: &mut Simulator) -> Result<(), SimErr> {
    write_char(sim, '\n');
    outst0(sim)
}

/// Prints the string at X, which ends with `EOT` (`$04`).
fn outst0(sim: &mut Simulator) -> Result<(), SimErr> {
    let mut addr = sim.regs.x();
    let mut text = String::new();
    let mut count = 0;
    {
        let mut bus = sim.bus();
        while count < OUTST0_LIMIT {
            let c = bus.read_u8(addr);
            if c == 0x04 { break; }
            text.push(char::from(c));
            addr = addr.wrapping_add(1);
            count += 1;
        }
    }

    let truncated = count >= OUTST0_LIMIT;
    text.push('\n');
    if truncated {
        text.push_str("<<<truncated to 300 characters>>>\n");
    }
    sim.console.write_str(&text);
    Ok(())
}
