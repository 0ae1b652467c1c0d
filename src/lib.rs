//! A cycle-accurate Motorola 68HC11 simulator.
//!
//! This simulates the 68HC11 CPU core, its 64KB address space (with the relocatable
//! register window), its interrupt controller, and its timer and parallel I/O peripherals.
//! It can also stand in for the BUFFALO ROM monitor of the EVB/EVBU boards.
//!
//! # Usage
//!
//! Programs are usually loaded from S-record files:
//! ```
//! use hc11_sim::load;
//! use hc11_sim::sim::{Halt, Simulator, SimFlags};
//!
//! // LDAA #5, DECA, TEST
//! let s19 = "S107C00086054A0063\nS903C0003C\n";
//!
//! let mut sim = Simulator::new(SimFlags::default());
//! let summary = load::read_s19(s19, &mut sim.bus()).unwrap();
//! sim.regs.set_pc(summary.start);
//!
//! assert_eq!(sim.run(), Ok(Halt::Test));
//! assert_eq!(sim.regs.a(), 4);
//! ```
//!
//! Programs written for the BUFFALO monitor need its routines installed first
//! (see [`monitor::install`]).
//!
//! For finer control of execution (instruction counts, cycle limits, tracing, breakpoints),
//! see the [`sim`] module.
#![warn(missing_docs)]

pub mod alu;
pub mod isa;
pub mod dasm;
pub mod sim;
pub mod load;
pub mod monitor;
pub mod err;
