//! Loading programs into the simulator.
//!
//! This module reads Motorola S-record files (the `.S19` files assemblers produce)
//! into memory, or checks memory against them. Only `S1` (data) and `S9` (start address)
//! records are understood; other record types are counted and skipped.
//!
//! ```
//! use hc11_sim::load;
//! use hc11_sim::sim::{Simulator, SimFlags};
//!
//! let mut sim = Simulator::new(SimFlags::default());
//! let summary = load::read_s19("S106C00001020333\nS903C0003C\n", &mut sim.bus()).unwrap();
//!
//! assert_eq!(summary.start, 0xC000);
//! assert_eq!(summary.bytes, 3);
//! assert_eq!(sim.mem.raw().read_u8(0xC001), 0x02);
//! ```
//!
//! The [`map`] submodule reads the MAP files that map addresses back to source lines.

pub mod map;
mod lex;

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use crate::sim::mem::Bus;

/// What loading an S-record file produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S19Summary {
    /// The address to start executing at.
    ///
    /// This is the `S9` record's address, if there is one.
    /// Otherwise, it is the first nonzero `S1` address (or 0).
    pub start: u16,
    /// Number of data bytes written.
    pub bytes: usize,
    /// Warnings to show the user (e.g., about ignored records), if any.
    pub diagnostics: Option<String>,
}

/// Errors from reading or verifying an S-record file.
///
/// Line numbers start at 1.
#[derive(Debug)]
pub enum S19Error {
    /// The file could not be read.
    Io(std::io::Error),
    /// The line is not an S-record.
    Format {
        /// The line (starting at 1).
        line: usize
    },
    /// The record has half a byte of data.
    OddLength {
        /// The line (starting at 1).
        line: usize
    },
    /// The record's byte count does not match its length.
    CountMismatch {
        /// The line (starting at 1).
        line: usize
    },
    /// An `S9` record carries data.
    UnexpectedData {
        /// The line (starting at 1).
        line: usize
    },
    /// An `S1` record carries no data.
    EmptyRecord {
        /// The line (starting at 1).
        line: usize
    },
    /// The record's checksum is wrong.
    Checksum {
        /// The line (starting at 1).
        line: usize
    },
    /// Memory differs from the file.
    Verify {
        /// The first differing address.
        addr: u16,
        /// The value in memory.
        memory: u8,
        /// The value in the file.
        file: u8
    },
}
impl std::fmt::Display for S19Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            S19Error::Io(e) => e.fmt(f),
            S19Error::Format { line }         => write!(f, "S19 format error at line {line}"),
            S19Error::OddLength { line }      => write!(f, "Odd-length data at line {line}"),
            S19Error::CountMismatch { line }  => write!(f, "Record count mismatch at line {line}"),
            S19Error::UnexpectedData { line } => write!(f, "Unexpected data in S9 record at line {line}"),
            S19Error::EmptyRecord { line }    => write!(f, "Unexpected empty S1 record at line {line}"),
            S19Error::Checksum { line }       => write!(f, "Checksum error at line {line}"),
            S19Error::Verify { addr, memory, file } => write!(f, "Verify error at ${addr:04X}\n  Memory: ${memory:02X}  File: ${file:02X}"),
        }
    }
}
impl std::error::Error for S19Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            S19Error::Io(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for S19Error {
    fn help(&self) -> Option<Cow<'_, str>> {
        match self {
            S19Error::Io(_)                => None,
            S19Error::Format { .. }        => Some("S-records look like `S1` + count + address + data + checksum, all in hex".into()),
            S19Error::OddLength { .. }     => Some("every data byte takes two hex digits".into()),
            S19Error::CountMismatch { .. } => Some("the count byte is the number of address, data, and checksum bytes".into()),
            S19Error::UnexpectedData { .. } => Some("an S9 record only holds the start address".into()),
            S19Error::EmptyRecord { .. }   => None,
            S19Error::Checksum { .. }      => Some("the file may be corrupted; try reassembling it".into()),
            S19Error::Verify { .. }        => Some("the program has modified itself, or a different file was loaded".into()),
        }
    }
}
impl From<std::io::Error> for S19Error {
    fn from(value: std::io::Error) -> Self {
        S19Error::Io(value)
    }
}

/// A syntactically valid S-record.
struct Record<'s> {
    kind: u8,
    count: u8,
    addr: u16,
    data: &'s str,
    checksum: u8,
}

impl<'s> Record<'s> {
    /// Splits a line into its fields.
    ///
    /// The checksum is the last two hex digits of the line.
    /// Anything after the hex digits (e.g., a carriage return) is ignored.
    fn parse(line: &'s str) -> Option<Self> {
        let rest = line.strip_prefix('S')?;
        let kind = *rest.as_bytes().first()?;
        if !kind.is_ascii_digit() { return None };

        let rest = &rest[1..];
        let len = rest.find(|c: char| !c.is_ascii_hexdigit()).unwrap_or(rest.len());
        if len < 8 { return None };
        let hex = &rest[..len];

        Some(Self {
            kind: kind - b'0',
            count: u8::from_str_radix(&hex[0..2], 16).ok()?,
            addr: u16::from_str_radix(&hex[2..6], 16).ok()?,
            data: &hex[6..len - 2],
            checksum: u8::from_str_radix(&hex[len - 2..], 16).ok()?,
        })
    }

    fn data_bytes(&self) -> impl Iterator<Item = u8> + 's {
        let data = self.data;
        (0..data.len() / 2)
            .map(move |i| u8::from_str_radix(&data[2 * i..2 * i + 2], 16).unwrap_or(0))
    }
}

/// Whether the reader writes or compares data bytes.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Load,
    Verify,
}

fn process_s19(text: &str, bus: &mut impl Bus, mode: Mode) -> Result<S19Summary, S19Error> {
    let mut start = 0;
    let mut bytes = 0;
    let mut ignored = 0usize;

    for (i, line) in text.lines().enumerate() {
        let line_no = i + 1;
        let rec = Record::parse(line).ok_or(S19Error::Format { line: line_no })?;

        if !matches!(rec.kind, 1 | 9) {
            ignored += 1;
            continue;
        }
        if rec.data.len() % 2 != 0 {
            return Err(S19Error::OddLength { line: line_no });
        }
        if usize::from(rec.count) != 3 + rec.data.len() / 2 {
            return Err(S19Error::CountMismatch { line: line_no });
        }

        if rec.kind == 9 {
            if rec.count > 3 {
                return Err(S19Error::UnexpectedData { line: line_no });
            }
            let diagnostics = (ignored > 0).then(|| ignored_message(ignored));
            if let Some(d) = &diagnostics {
                log::warn!("{d}");
            }
            return Ok(S19Summary { start: rec.addr, bytes, diagnostics });
        }

        if start == 0 {
            start = rec.addr;
        }
        if rec.count <= 3 {
            return Err(S19Error::EmptyRecord { line: line_no });
        }

        // Every byte of the record, checksum included, sums to 0xFF.
        let [hi, lo] = rec.addr.to_be_bytes();
        let mut sum = rec.checksum.wrapping_add(rec.count).wrapping_add(hi).wrapping_add(lo).wrapping_add(1);

        for (addr, val) in (0..).map(|i| rec.addr.wrapping_add(i)).zip(rec.data_bytes()) {
            match mode {
                Mode::Load => bus.write_u8(addr, val),
                Mode::Verify => {
                    let memory = bus.read_u8(addr);
                    if memory != val {
                        return Err(S19Error::Verify { addr, memory, file: val });
                    }
                }
            }
            sum = sum.wrapping_add(val);
            bytes += 1;
        }

        if sum != 0 {
            return Err(S19Error::Checksum { line: line_no });
        }
    }

    let mut diagnostics = String::from("WARNING: No S9 record found");
    if ignored > 0 {
        diagnostics.push('\n');
        diagnostics.push_str(&ignored_message(ignored));
    }
    log::warn!("{diagnostics}");

    Ok(S19Summary { start, bytes, diagnostics: Some(diagnostics) })
}

fn ignored_message(n: usize) -> String {
    match n {
        1 => String::from("Ignored 1 S-record of unsupported format"),
        n => format!("Ignored {n} S-records of unsupported format"),
    }
}

/// Writes the contents of an S-record file into memory.
///
/// The bytes are written through `bus`, so memory filters see them.
/// Reading stops at the `S9` record.
///
/// If a record is malformed, this errors, leaving the bytes of the records before it written.
pub fn read_s19(text: &str, bus: &mut impl Bus) -> Result<S19Summary, S19Error> {
    process_s19(text, bus, Mode::Load)
}

/// Checks that memory holds the contents of an S-record file.
///
/// This errors at the first byte that differs.
pub fn verify_s19(text: &str, bus: &mut impl Bus) -> Result<(), S19Error> {
    process_s19(text, bus, Mode::Verify).map(|_| ())
}

/// Replaces the extension of a path (adding one if there is none).
pub fn add_extension(path: &Path, ext: &str) -> PathBuf {
    path.with_extension(ext)
}

#[cfg(test)]
mod tests {
    use crate::sim::{SimFlags, Simulator};

    use super::*;

    fn sim() -> Simulator {
        Simulator::new(SimFlags::default())
    }

    #[test]
    fn load_program() {
        let mut sim = sim();
        let summary = read_s19("S106C00001020333\nS903C0003C\n", &mut sim.bus()).unwrap();

        assert_eq!(summary, S19Summary { start: 0xC000, bytes: 3, diagnostics: None });
        assert_eq!(sim.mem.raw().read_u8(0xC000), 0x01);
        assert_eq!(sim.mem.raw().read_u8(0xC001), 0x02);
        assert_eq!(sim.mem.raw().read_u8(0xC002), 0x03);
    }

    #[test]
    fn crlf_and_ignored_records() {
        let text = "S00600004844521B\r\nS106C00001020333\r\nS903C0003C\r\n";
        let mut sim = sim();
        let summary = read_s19(text, &mut sim.bus()).unwrap();

        assert_eq!(summary.start, 0xC000);
        assert_eq!(summary.diagnostics.as_deref(), Some("Ignored 1 S-record of unsupported format"));
    }

    #[test]
    fn missing_s9() {
        let mut sim = sim();
        let summary = read_s19("S106C00001020333\n", &mut sim.bus()).unwrap();

        assert_eq!(summary.start, 0xC000);
        assert_eq!(summary.diagnostics.as_deref(), Some("WARNING: No S9 record found"));

        let summary = read_s19("", &mut sim.bus()).unwrap();
        assert_eq!(summary.start, 0);
    }

    #[test]
    fn malformed() {
        let mut sim = sim();
        let mut load = |text: &str| read_s19(text, &mut sim.bus()).unwrap_err().to_string();

        assert_eq!(load("hello\n"), "S19 format error at line 1");
        assert_eq!(load("S106C00001020333\n\nS903C0003C\n"), "S19 format error at line 2");
        assert_eq!(load("S106C000010203333\n"), "Odd-length data at line 1");
        assert_eq!(load("S107C00001020333\n"), "Record count mismatch at line 1");
        assert_eq!(load("S904C0000137\n"), "Unexpected data in S9 record at line 1");
        assert_eq!(load("S103C0003C\n"), "Unexpected empty S1 record at line 1");
        assert_eq!(load("S106C000010203FF\n"), "Checksum error at line 1");
    }

    #[test]
    fn checksum_error_keeps_written_bytes() {
        let mut sim = sim();
        let err = read_s19("S104C000AA00\n", &mut sim.bus()).unwrap_err();

        assert!(matches!(err, S19Error::Checksum { line: 1 }));
        assert_eq!(sim.mem.raw().read_u8(0xC000), 0xAA);
    }

    #[test]
    fn verify() {
        let text = "S106C00001020333\nS903C0003C\n";
        let mut sim = sim();
        read_s19(text, &mut sim.bus()).unwrap();
        verify_s19(text, &mut sim.bus()).unwrap();

        sim.mem.raw_mut().write_u8(0xC001, 0x22);
        let err = verify_s19(text, &mut sim.bus()).unwrap_err();
        assert!(matches!(err, S19Error::Verify { addr: 0xC001, memory: 0x22, file: 0x02 }));
        assert_eq!(err.to_string(), "Verify error at $C001\n  Memory: $22  File: $02");
    }

    #[test]
    fn extensions() {
        assert_eq!(add_extension(Path::new("prog"), "s19"), Path::new("prog.s19"));
        assert_eq!(add_extension(Path::new("dir/prog.asm"), "s19"), Path::new("dir/prog.s19"));
        assert_eq!(add_extension(Path::new("prog.S19"), "map"), Path::new("prog.map"));
    }
}
