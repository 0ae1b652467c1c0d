//! Reading MAP files, for source-level debugging.
//!
//! A MAP file (as written by ASM11 with `-MTA`) ties addresses to source lines and symbols:
//!
//! ```text
//! [COMMENTS]
//! ...
//! [FILES]
//!
//! prog.asm
//! [LINKS]
//! C000 1 3 START 3
//! C003 1 4
//! ```
//!
//! - `[FILES]` is followed by one skipped line, then the source files (one per line,
//!     relative to the MAP file's directory) until `[LINKS]`.
//! - Every line after `[LINKS]` is a record: hex address, file number (starting at 1),
//!     line number (starting at 1), and optionally a symbol and its size in bytes.
//!     File number 0 records only define a symbol.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;

use super::lex;

/// A line of source code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    /// The text of the line (without its line ending).
    pub text: String,
    /// The name of the file, as listed in the MAP file.
    pub file: String,
    /// The line number (starting at 1).
    pub line: usize,
}

/// The contents of a MAP file.
#[derive(Debug, Default)]
pub struct MapFile {
    /// The source files, by file number (minus 1).
    pub files: Vec<String>,
    /// The source line each address was assembled from.
    pub addr_map: HashMap<u16, SourceLine>,
    /// The address (and symbol, if any) of each `(file number, line number)`.
    pub line_map: HashMap<(usize, usize), (u16, Option<String>)>,
    /// Symbol values. Symbol names are uppercase.
    pub symbols: HashMap<String, u16>,
}

/// Errors from reading a MAP file.
///
/// Line numbers start at 1.
#[derive(Debug)]
pub enum MapError {
    /// The file could not be read.
    Io(std::io::Error),
    /// The file does not start with `[COMMENTS]`.
    NotAMapFile,
    /// A required section header is missing.
    MissingSection(&'static str),
    /// A file in the `[FILES]` section could not be read.
    SourceNotFound(String),
    /// The record could not be parsed.
    Format {
        /// The line (starting at 1).
        line: usize
    },
    /// The record refers to a file not listed in `[FILES]`.
    IllegalFileNumber {
        /// The line (starting at 1).
        line: usize
    },
    /// The record refers to a line past the end of its file.
    IllegalLineNumber {
        /// The line (starting at 1).
        line: usize
    },
}
impl std::fmt::Display for MapError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapError::Io(e) => e.fmt(f),
            MapError::NotAMapFile             => f.write_str("This does not look like a supported MAP file"),
            MapError::MissingSection(s)       => write!(f, "Did not find {s} section in MAP file"),
            MapError::SourceNotFound(name)    => write!(f, "File {name} in [FILES] section not found"),
            MapError::Format { line }         => write!(f, "MAP file format error at line {line}"),
            MapError::IllegalFileNumber { line } => write!(f, "Illegal file number at line {line} of MAP file"),
            MapError::IllegalLineNumber { line } => write!(f, "Illegal line number at line {line} of MAP file"),
        }
    }
}
impl std::error::Error for MapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MapError::Io(e) => Some(e),
            _ => None
        }
    }
}
impl crate::err::Error for MapError {
    fn help(&self) -> Option<Cow<'_, str>> {
        match self {
            MapError::Io(_)                   => None,
            MapError::NotAMapFile             => Some("MAP files are written by ASM11 with the -MTA option".into()),
            MapError::MissingSection(_)       => Some("the MAP file may be truncated; try reassembling it".into()),
            MapError::SourceNotFound(_)       => Some("source files are looked up next to the MAP file".into()),
            MapError::Format { .. }           => Some("records have the form `ADDR FILE LINE [SYMBOL SIZE]`".into()),
            MapError::IllegalFileNumber { .. } => None,
            MapError::IllegalLineNumber { .. } => Some("the source file may have changed since it was assembled".into()),
        }
    }
}
impl From<std::io::Error> for MapError {
    fn from(value: std::io::Error) -> Self {
        MapError::Io(value)
    }
}

fn parse_record(fields: &[&str], line: usize) -> Result<(u16, usize, usize, Option<String>), MapError> {
    let err = || MapError::Format { line };

    let (addr, fnum, lnum, sym) = match *fields {
        [addr, fnum, lnum, sym, _size] => (addr, fnum, lnum, Some(sym.to_ascii_uppercase())),
        [addr, fnum, lnum] => (addr, fnum, lnum, None),
        _ => return Err(err()),
    };

    Ok((
        u16::from_str_radix(addr, 16).map_err(|_| err())?,
        fnum.parse().map_err(|_| err())?,
        lnum.parse().map_err(|_| err())?,
        sym,
    ))
}

impl MapFile {
    /// Reads a MAP file, looking up its source files in its directory.
    pub fn read(path: &Path) -> Result<Self, MapError> {
        let text = std::fs::read_to_string(path)?;
        let dir = path.parent().unwrap_or(Path::new("."));
        Self::parse(&text, dir)
    }

    /// Parses the text of a MAP file, looking up its source files in `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self, MapError> {
        Self::parse_with(text, |name| {
            let bytes = std::fs::read(base_dir.join(name)).ok()?;
            Some(String::from_utf8_lossy(&bytes).into_owned())
        })
    }

    /// Parses the text of a MAP file, getting the contents of source files from `open`.
    ///
    /// `open` returns `None` if the file does not exist.
    pub fn parse_with(text: &str, mut open: impl FnMut(&str) -> Option<String>) -> Result<Self, MapError> {
        let lines: Vec<_> = text.lines().collect();

        if !lines.first().is_some_and(|l| l.starts_with("[COMMENTS]")) {
            return Err(MapError::NotAMapFile);
        }
        let files_at = lines.iter()
            .position(|l| l.starts_with("[FILES]"))
            .ok_or(MapError::MissingSection("[FILES]"))?;

        let mut map = MapFile::default();
        let mut sources: Vec<Vec<String>> = vec![];

        let mut i = files_at + 2;
        loop {
            let line = *lines.get(i).ok_or(MapError::MissingSection("[LINKS]"))?;
            if line.starts_with("[LINKS]") { break; }

            let name = line.trim();
            if !name.is_empty() {
                let content = open(name).ok_or_else(|| MapError::SourceNotFound(name.to_string()))?;
                sources.push(content.lines().map(str::to_string).collect());
                map.files.push(name.to_string());
            }
            i += 1;
        }

        for (j, &line) in lines.iter().enumerate().skip(i + 1) {
            let line_no = j + 1;
            if line.len() < 2 { continue; }

            let fields = lex::fields(line).map_err(|_| MapError::Format { line: line_no })?;
            let (addr, fnum, lnum, sym) = parse_record(&fields, line_no)?;

            if fnum > 0 {
                let src = sources.get(fnum - 1).ok_or(MapError::IllegalFileNumber { line: line_no })?;
                let text = lnum.checked_sub(1)
                    .and_then(|l| src.get(l))
                    .ok_or(MapError::IllegalLineNumber { line: line_no })?;

                map.addr_map.insert(addr, SourceLine {
                    text: text.clone(),
                    file: map.files[fnum - 1].clone(),
                    line: lnum,
                });
                map.line_map.insert((fnum, lnum), (addr, sym.clone()));
            }
            if let Some(sym) = sym {
                map.symbols.insert(sym, addr);
            }
        }

        Ok(map)
    }

    /// The source line an address was assembled from.
    pub fn source_line(&self, addr: u16) -> Option<&SourceLine> {
        self.addr_map.get(&addr)
    }

    /// The value of a symbol (case-insensitive).
    pub fn symbol(&self, name: &str) -> Option<u16> {
        self.symbols.get(&name.to_ascii_uppercase()).copied()
    }

    /// The address a source line was assembled to.
    ///
    /// `file` and `line` both start at 1.
    pub fn line_addr(&self, file: usize, line: usize) -> Option<u16> {
        self.line_map.get(&(file, line)).map(|&(addr, _)| addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = "\
[COMMENTS]
ASM11 MAP file
[FILES]

prog.asm
[LINKS]
C000 1 2 Start 3
C003 1 3

C005 1 4 loop 2
1000 0 0 REGBASE 0
";
    const PROG: &str = "        ORG $C000\r\nStart   LDX #$1000\r\n        LDAA #5\r\nloop    BRA loop\r\n";

    fn parse(text: &str) -> Result<MapFile, MapError> {
        MapFile::parse_with(text, |name| (name == "prog.asm").then(|| PROG.to_string()))
    }

    #[test]
    fn source_lines_and_symbols() {
        let map = parse(MAP).unwrap();

        assert_eq!(map.files, ["prog.asm"]);
        assert_eq!(map.source_line(0xC000), Some(&SourceLine {
            text: String::from("Start   LDX #$1000"),
            file: String::from("prog.asm"),
            line: 2,
        }));
        assert_eq!(map.source_line(0xC003).map(|s| s.line), Some(3));
        assert_eq!(map.source_line(0xC004), None);
        assert_eq!(map.source_line(0x1000), None);

        assert_eq!(map.line_map.get(&(1, 4)), Some(&(0xC005, Some(String::from("LOOP")))));
        assert_eq!(map.line_map.get(&(1, 3)), Some(&(0xC003, None)));
        assert_eq!(map.line_addr(1, 2), Some(0xC000));

        assert_eq!(map.symbols.len(), 3);
        assert_eq!(map.symbol("start"), Some(0xC000));
        assert_eq!(map.symbol("LOOP"), Some(0xC005));
        assert_eq!(map.symbol("RegBase"), Some(0x1000));
    }

    #[test]
    fn missing_sections() {
        assert!(matches!(parse("hello\n"), Err(MapError::NotAMapFile)));
        assert!(matches!(parse("[COMMENTS]\n"), Err(MapError::MissingSection("[FILES]"))));
        assert!(matches!(parse("[COMMENTS]\n[FILES]\n\nprog.asm\n"), Err(MapError::MissingSection("[LINKS]"))));
        assert!(matches!(parse("[COMMENTS]\n[FILES]\n"), Err(MapError::MissingSection("[LINKS]"))));

        let err = parse("[COMMENTS]\n[FILES]\n\nother.asm\n[LINKS]\n").unwrap_err();
        assert_eq!(err.to_string(), "File other.asm in [FILES] section not found");
    }

    #[test]
    fn bad_records() {
        let with_record = |rec: &str| parse(&format!("[COMMENTS]\n[FILES]\n\nprog.asm\n[LINKS]\n{rec}\n")).unwrap_err();

        assert!(matches!(with_record("C000 1"), MapError::Format { line: 6 }));
        assert!(matches!(with_record("C000 1 2 START"), MapError::Format { line: 6 }));
        assert!(matches!(with_record("G000 1 2"), MapError::Format { line: 6 }));
        assert!(matches!(with_record("C000 x 2"), MapError::Format { line: 6 }));
        assert!(matches!(with_record("C000 2 2"), MapError::IllegalFileNumber { line: 6 }));
        assert!(matches!(with_record("C000 1 5"), MapError::IllegalLineNumber { line: 6 }));
        assert!(matches!(with_record("C000 1 0"), MapError::IllegalLineNumber { line: 6 }));

        assert_eq!(with_record("C000 1").to_string(), "MAP file format error at line 6");
    }

    #[test]
    fn read_from_disk() {
        let dir = std::env::temp_dir().join(format!("hc11-map-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("prog.asm"), PROG).unwrap();
        std::fs::write(dir.join("prog.map"), MAP).unwrap();

        let map = MapFile::read(&dir.join("prog.map")).unwrap();
        assert_eq!(map.source_line(0xC005).map(|s| &*s.text), Some("loop    BRA loop"));

        std::fs::remove_file(dir.join("prog.asm")).unwrap();
        assert!(matches!(MapFile::read(&dir.join("prog.map")), Err(MapError::SourceNotFound(_))));
        assert!(matches!(MapFile::read(&dir.join("nothing.map")), Err(MapError::Io(_))));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
