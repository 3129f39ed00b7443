//! Compile-time configuration.

use skua_asm::options::{Bsr, ExtraOptions, Newline};
use skua_ucd::Tables;

/// Configuration threaded through a compilation, the counterpart of the
/// per-call match context on the matching side.
#[derive(Debug, Clone)]
pub struct CompileContext {
    /// Character tables for code points below 256.
    pub tables: Tables,
    /// Default newline convention (overridable by `(*CRLF)`-style verbs).
    pub newline: Newline,
    /// Default `\R` convention.
    pub bsr: Bsr,
    /// Extra option bits.
    pub extra_options: ExtraOptions,
    /// Maximum parenthesis nesting depth.
    pub parens_nest_limit: u32,
    /// Maximum pattern length in code units.
    pub max_pattern_length: usize,
    /// Maximum size of the compiled program in bytes.
    pub max_program_length: usize,
    /// Longest permitted variable-lookbehind branch, in characters.
    pub max_varlookbehind: u16,
}

impl Default for CompileContext {
    fn default() -> Self {
        Self {
            tables: skua_ucd::DEFAULT_TABLES.clone(),
            newline: Newline::default(),
            bsr: Bsr::default(),
            extra_options: ExtraOptions::empty(),
            parens_nest_limit: 250,
            max_pattern_length: usize::MAX,
            max_program_length: u32::MAX as usize,
            max_varlookbehind: 255,
        }
    }
}

impl CompileContext {
    /// Fresh default context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the newline convention.
    pub fn newline(mut self, newline: Newline) -> Self {
        self.newline = newline;
        self
    }

    /// Set the `\R` convention.
    pub fn bsr(mut self, bsr: Bsr) -> Self {
        self.bsr = bsr;
        self
    }

    /// Set extra options.
    pub fn extra_options(mut self, extra: ExtraOptions) -> Self {
        self.extra_options = extra;
        self
    }

    /// Set the nesting limit.
    pub fn parens_nest_limit(mut self, limit: u32) -> Self {
        self.parens_nest_limit = limit;
        self
    }

    /// Set the maximum pattern length.
    pub fn max_pattern_length(mut self, limit: usize) -> Self {
        self.max_pattern_length = limit;
        self
    }

    /// Set the maximum compiled-program size.
    pub fn max_program_length(mut self, limit: usize) -> Self {
        self.max_program_length = limit;
        self
    }

    /// Set the variable-lookbehind bound.
    pub fn max_varlookbehind(mut self, limit: u16) -> Self {
        self.max_varlookbehind = limit;
        self
    }

    /// Substitute foreign character tables.
    pub fn tables(mut self, tables: Tables) -> Self {
        self.tables = tables;
        self
    }
}
