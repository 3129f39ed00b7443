//! Per-call matching configuration.

use skua_asm::program::Program;

/// Resource limits and policies for one match call. Reusable across calls
/// and threads; each call reads, never writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchContext {
    /// Ceiling on matcher dispatch steps.
    pub match_limit: u32,
    /// Ceiling on backtracking depth (live backtrack entries).
    pub depth_limit: u32,
    /// Ceiling on backtracking heap, in KiB.
    pub heap_limit: u32,
    /// Highest subject offset at which a match may start; only honoured
    /// when the pattern was compiled with `USE_OFFSET_LIMIT`.
    pub offset_limit: Option<usize>,
}

impl Default for MatchContext {
    fn default() -> Self {
        MatchContext {
            match_limit: 10_000_000,
            depth_limit: 10_000_000,
            heap_limit: 20_000,
            offset_limit: None,
        }
    }
}

impl MatchContext {
    /// Fresh default context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the match-steps limit.
    pub fn match_limit(mut self, limit: u32) -> Self {
        self.match_limit = limit;
        self
    }

    /// Set the backtracking depth limit.
    pub fn depth_limit(mut self, limit: u32) -> Self {
        self.depth_limit = limit;
        self
    }

    /// Set the heap limit in KiB.
    pub fn heap_limit(mut self, kib: u32) -> Self {
        self.heap_limit = kib;
        self
    }

    /// Set the offset limit.
    pub fn offset_limit(mut self, limit: usize) -> Self {
        self.offset_limit = Some(limit);
        self
    }

    /// Effective limits after applying the pattern's `(*LIMIT_…)` caps,
    /// which can only lower the configured values.
    pub fn effective(&self, program: &Program) -> MatchContext {
        let mut out = *self;
        if let Some(m) = program.limits.match_limit {
            out.match_limit = out.match_limit.min(m);
        }
        if let Some(d) = program.limits.depth_limit {
            out.depth_limit = out.depth_limit.min(d);
        }
        if let Some(h) = program.limits.heap_limit {
            out.heap_limit = out.heap_limit.min(h);
        }
        out
    }
}
