//! skua regex engine: matchers and services over compiled patterns.
//!
//! This is the crate an application uses. It re-exports the compiler and
//! the bytecode primitives, and adds the two matching engines (the
//! backtracking matcher and the parallel-state matcher), substring
//! extraction and substitution.
//!
//! ```
//! use skua_vm::prelude::*;
//!
//! let program = compile(b"a(b|c)d", CompileOptions::empty(),
//!     &CompileContext::default()).unwrap();
//! let mut md = MatchData::for_program(&program);
//! let outcome = nfa_match(&program, b"acd", 0, MatchOptions::empty(),
//!     &MatchContext::default(), None, &mut md).unwrap();
//! assert!(outcome.is_match());
//! assert_eq!(md.group(1), Some((1, 2)));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod callout;
pub mod config;
pub mod context;
pub mod dfa;
pub mod match_data;
pub mod nfa;
pub mod substitute;
pub mod substring;

use static_assertions::const_assert;

// A match data block always has room for the whole-match pair.
const_assert!(core::mem::size_of::<usize>() >= 4);

/// Run the backtracking matcher. See [`nfa::exec`].
pub use nfa::exec as nfa_match;

/// Run the parallel-state matcher. See [`dfa::exec`].
pub use dfa::exec as dfa_match;

pub use callout::{enumerate as enumerate_callouts, CalloutBlock, CalloutEntry, CalloutHandler, NoopCallout};
pub use config::{config, Config};
pub use context::MatchContext;
pub use match_data::{MatchData, MatchOutcome};
pub use substitute::{substitute, CaseForce, SubstituteBlock, SubstituteHooks};

#[doc(no_inline)]
pub use skua_asm;
#[doc(no_inline)]
pub use skua_compile;
#[doc(no_inline)]
pub use skua_ucd;

pub mod prelude {
    //! One-stop imports for compiling and matching.
    #[doc(no_inline)]
    pub use skua_asm::{
        Bsr, CompileError, CompileErrorKind, CompileOptions, ExtraOptions, MatchError,
        MatchOptions, Newline, Program, SubstituteError, SubstituteOptions, SubstringError,
        UNSET,
    };
    #[doc(no_inline)]
    pub use skua_compile::{compile, CompileContext};

    pub use crate::callout::{CalloutBlock, CalloutHandler, NoopCallout};
    pub use crate::config::config;
    pub use crate::context::MatchContext;
    pub use crate::match_data::{MatchData, MatchOutcome};
    pub use crate::substitute::{substitute, SubstituteHooks};
    pub use crate::substring;
    pub use crate::{dfa_match, nfa_match};
}
