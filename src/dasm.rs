//! Disassembly of decoded instructions.
//!
//! [`format_instr`] renders an instruction as its mnemonic (padded to 6 columns, even without operands)
//! and operands:
//!
//! | Mode | Operand |
//! |------|---------|
//! | immediate | `#$XX` or `#$XXXX` |
//! | extended, relative | `$XXXX` |
//! | direct | `$XX` |
//! | indexed | `N,X` or `N,Y` (decimal offset) |
//! | bit manipulation | the address as above, then ` #$XX` (mask), then ` $XXXX` (target) if it branches |
//!
//! [`format_line`] prefixes that with the address, raw bytes, and cycle count,
//! which is how the simulator traces instructions:
//!
//! ```
//! use hc11_sim::{dasm, isa};
//!
//! let code = [0x86, 0x05];
//! let instr = isa::decode(0xC000, 0, 0, |a| code[usize::from(a - 0xC000)]).unwrap();
//! assert_eq!(dasm::format_line(&instr), "C000  86 05         [ 2]  LDAA  #$05");
//! ```

use std::fmt::Write;

use crate::isa::{Instr, Mode, Op, Operand};

fn format_addr(out: &mut String, mode: Mode, addr: u16, offset: Option<u8>) {
    let _ = match (mode, offset) {
        (Mode::IndexedX | Mode::Bit2IndX | Mode::Bit3IndX, Some(off)) => write!(out, "{off},X"),
        (Mode::IndexedY | Mode::Bit2IndY | Mode::Bit3IndY, Some(off)) => write!(out, "{off},Y"),
        (Mode::Direct | Mode::Bit2Dir | Mode::Bit3Dir, _) => write!(out, "${addr:02X}"),
        _ => write!(out, "${addr:04X}"),
    };
}

/// Renders an instruction's mnemonic and operands.
pub fn format_instr(op: Op, mode: Mode, operand: Operand) -> String {
    let mut out = format!("{:<6}", op.mnemonic());

    match operand {
        Operand::None => {},
        Operand::Immediate(v) => {
            let _ = match mode {
                Mode::Imm16 => write!(out, "#${v:04X}"),
                _ => write!(out, "#${v:02X}"),
            };
        },
        Operand::Memory { addr, offset } => format_addr(&mut out, mode, addr, offset),
        Operand::Relative(target) => {
            let _ = write!(out, "${target:04X}");
        },
        Operand::BitMask { addr, offset, mask } => {
            format_addr(&mut out, mode, addr, offset);
            let _ = write!(out, " #${mask:02X}");
        },
        Operand::BitBranch { addr, offset, mask, target } => {
            format_addr(&mut out, mode, addr, offset);
            let _ = write!(out, " #${mask:02X} ${target:04X}");
        },
    }
    out
}

/// Renders a trace line: address, raw bytes, cycle count, and the disassembly.
pub fn format_line(instr: &Instr) -> String {
    let mut out = format!("{:04X}  ", instr.addr);
    for b in instr.bytes() {
        let _ = write!(out, "{b:02X} ");
    }
    out.push_str(&"   ".repeat(4usize.saturating_sub(instr.bytes().len())));
    let _ = write!(out, "  [{:2}]  ", instr.info.cycles);
    out.push_str(&format_instr(instr.info.op, instr.info.mode, instr.operand));
    out
}
