//! Pattern compiler of the skua regex engine.
//!
//! Compilation is a pipeline: the parser turns pattern text into a flat
//! vector of 32-bit meta-tokens, the class planner resolves character
//! classes to bitmaps, ranges and property items as they are met, the
//! code generator sizes and then emits the bytecode program, and the
//! start-up optimiser annotates the program with anchoring and first/last
//! character facts.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod class;
pub mod context;
pub mod meta;
pub mod optimize;
pub mod parse;

mod codegen;

use skua_asm::error::{CompileError, CompileErrorKind};
use skua_asm::options::CompileOptions;
use skua_asm::program::Program;

pub use context::CompileContext;
pub use parse::{GroupName, Parsed};

/// Engine version reported to `(?(VERSION…)` conditions and the
/// configuration query, as `(major, minor)` with a two-digit minor.
pub const VERSION: (u8, u8) = (0, 41);

/// Compile a pattern under the given options and context.
pub fn compile(
    pattern: &[u8],
    options: CompileOptions,
    ctx: &CompileContext,
) -> Result<Program, CompileError> {
    if options.contains(CompileOptions::UTF) && options.contains(CompileOptions::NEVER_UTF) {
        return Err(CompileError::at(CompileErrorKind::UtfDisabled, 0));
    }
    if options.contains(CompileOptions::UCP) && options.contains(CompileOptions::NEVER_UCP) {
        return Err(CompileError::at(CompileErrorKind::UcpDisabled, 0));
    }
    let parsed = parse::parse(pattern, options, ctx)?;
    tracing::debug!(
        tokens = parsed.tokens.len(),
        groups = parsed.top_group,
        "pattern parsed"
    );
    let program = codegen::generate(pattern, &parsed, ctx)?;
    tracing::debug!(
        code_bytes = program.code.len(),
        min_length = program.min_length,
        "pattern compiled"
    );
    Ok(program)
}

/// Compile with the default context.
pub fn compile_default(
    pattern: &[u8],
    options: CompileOptions,
) -> Result<Program, CompileError> {
    compile(pattern, options, &CompileContext::default())
}
