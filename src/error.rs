//! Crate-wide error type.
//!
//! Every failure mode named in the linker/loader/writer design is a variant
//! here rather than a process abort: callers get a `Result` and decide how
//! to report it, but none of them retry or continue linking past an `Err`.

use std::fmt;
use std::io;

use crate::assembly::{Section, Symbol};

#[derive(Debug)]
pub enum Error {
    /// A relocation referenced a symbol with no matching `Def`.
    UndefinedSymbol(Symbol),
    /// `S - R` did not fit in the width of the relocation's encoding.
    DisplacementOutOfRange { symbol: Symbol, section: Section, offset: u64, displacement: i64 },
    /// A big-endian relocation kind was asked of the AMD64 ELF writer, or an
    /// AArch64 target was asked to emit any relocation at all.
    UnsupportedRelocation(&'static str),
    /// The host word size / target machine combination isn't one of the two
    /// supported pairs.
    UnsupportedHost(&'static str),
    /// The anonymous virtual mapping could not be acquired.
    MapFailed(io::Error),
    /// `LinkedAssembly::load` was called more than once.
    AlreadyLoaded,
    /// `write_elf_executable` (declared out of scope, not yet implemented).
    Unimplemented(&'static str),
    /// Failure while serializing a fixed-size record with `scroll`.
    Scroll(scroll::Error),
    /// Failure writing the finished object file out to its sink.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UndefinedSymbol(sym) => write!(f, "undefined symbol: {sym:?}"),
            Error::DisplacementOutOfRange { symbol, section, offset, displacement } => write!(
                f,
                "difference too big for relocation of {symbol:?} in {section:?} at offset {offset}: {displacement}"
            ),
            Error::UnsupportedRelocation(msg) => write!(f, "unsupported relocation: {msg}"),
            Error::UnsupportedHost(msg) => write!(f, "unsupported host: {msg}"),
            Error::MapFailed(err) => write!(f, "failed to map anonymous pages: {err}"),
            Error::AlreadyLoaded => write!(f, "LinkedAssembly::load called more than once"),
            Error::Unimplemented(msg) => write!(f, "not implemented: {msg}"),
            Error::Scroll(err) => write!(f, "serialization error: {err}"),
            Error::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::MapFailed(err) | Error::Io(err) => Some(err),
            Error::Scroll(err) => Some(err),
            _ => None,
        }
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Self {
        Error::Scroll(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
