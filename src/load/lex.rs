//! Tokenizing the symbol table of a MAP file.
//!
//! Each line after a MAP file's `[LINKS]` header is one record,
//! a whitespace-separated list of [`Token::Field`]s:
//!
//! ```text
//! C000 1 12 START 3
//! C003 1 13
//! ```
//!
//! Fields are split here and interpreted by position in [`super::map`].

use logos::Logos;

/// A unit of a MAP file record.
#[derive(Debug, Logos, PartialEq, Eq, Clone, Copy)]
#[logos(skip r"[ \t\r]+", error = LexErr)]
pub(crate) enum Token<'s> {
    /// A run of printable characters (e.g., `C000`, `12`, `START`).
    #[regex(r"[!-~]+", |lx| lx.slice())]
    Field(&'s str),

    /// A new line
    #[regex(r"\n")]
    NewLine,
}

/// Any errors raised in attempting to tokenize a record.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub(crate) enum LexErr {
    /// A character which cannot occur in a record (e.g., a control or non-ASCII character)
    #[default]
    InvalidSymbol,
}
impl std::fmt::Display for LexErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LexErr::InvalidSymbol => f.write_str("unrecognized symbol"),
        }
    }
}
impl std::error::Error for LexErr {}

/// Splits one record into its fields.
///
/// Anything after the first new line is ignored.
pub(crate) fn fields(line: &str) -> Result<Vec<&str>, LexErr> {
    let mut out = vec![];
    for tok in Token::lexer(line) {
        match tok? {
            Token::Field(f) => out.push(f),
            Token::NewLine => break,
        }
    }
    Ok(out)
}
