//! Bytecode primitives of the skua regex engine.
//!
//! This crate defines everything the compiler emits and the matchers
//! consume: the instruction set, link encoding, option words, newline
//! conventions, the compiled [`Program`] object with its capture-name
//! table, UTF-8 movement helpers, and the shared error taxonomy.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod error;
pub mod link;
pub mod op;
pub mod options;
pub mod prop;
pub mod program;
pub mod utf;
pub mod walk;

pub use error::{
    CompileError, CompileErrorKind, MatchError, SubstituteError, SubstringError, Utf8Error,
};
pub use link::LinkSize;
pub use op::Op;
pub use options::{
    Bsr, CompileOptions, ExtraOptions, MatchOptions, Newline, ProgramFlags, SubstituteOptions,
};
pub use program::{EmbeddedLimits, NameEntry, NameTable, Program, ProgramInfo, UnitHint, MAGIC};

/// Offset value marking an unset capture bound.
pub const UNSET: usize = usize::MAX;

/// Maximum number of capture groups in one pattern.
pub const MAX_CAPTURES: u32 = 65_535;

/// Maximum repeat bound in `{n,m}`.
pub const MAX_REPEAT: u32 = 65_535;

/// Longest permitted group name.
pub const MAX_NAME_LENGTH: usize = 128;

/// Longest permitted `(*MARK:…)`-style verb argument.
pub const MAX_VERB_ARG_LENGTH: usize = 255;
