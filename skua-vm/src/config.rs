//! Library configuration queries.

use skua_asm::options::{Bsr, Newline};

/// Build-time and default configuration of the engine, the programmatic
/// counterpart of a version banner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Engine version as `(major, minor)`.
    pub version: (u8, u8),
    /// Unicode support is compiled in.
    pub unicode: bool,
    /// Unicode Character Database version of the embedded tables.
    pub unicode_version: (u8, u8, u8),
    /// Default newline convention.
    pub newline: Newline,
    /// Default `\R` convention.
    pub bsr: Bsr,
    /// Width of a subject code unit, in bits.
    pub unit_width: u8,
    /// Default parenthesis nesting limit.
    pub parens_limit: u32,
    /// Default match-steps limit.
    pub match_limit: u32,
    /// Default backtracking depth limit.
    pub depth_limit: u32,
    /// Default heap limit in KiB.
    pub heap_limit: u32,
}

/// Snapshot the engine configuration.
pub fn config() -> Config {
    let defaults = crate::context::MatchContext::default();
    let compile = skua_compile::CompileContext::default();
    Config {
        version: skua_compile::VERSION,
        unicode: true,
        unicode_version: skua_ucd::UNICODE_VERSION,
        newline: compile.newline,
        bsr: compile.bsr,
        unit_width: 8,
        parens_limit: compile.parens_nest_limit,
        match_limit: defaults.match_limit,
        depth_limit: defaults.depth_limit,
        heap_limit: defaults.heap_limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_the_embedded_unicode_version() {
        let c = config();
        assert!(c.unicode);
        assert_eq!(c.unicode_version.0, 15);
        assert_eq!(c.unit_width, 8);
    }
}
