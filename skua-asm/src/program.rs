//! The compiled program: write-once output of the compiler, read-only
//! input of the matchers. Safe to share between threads; every matcher
//! call carries its own mutable state.

use crate::link::LinkSize;
use crate::options::{Bsr, CompileOptions, ExtraOptions, Newline, ProgramFlags};

/// Sentinel at the front of every program; doubles as an endianness check
/// for reloaded programs.
pub const MAGIC: u32 = 0x534B_5541;

/// How the first/last code-unit hints were derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UnitHint {
    /// The unit must appear exactly.
    Exact(u8),
    /// The unit or its other case must appear.
    Caseless(u8),
}

impl UnitHint {
    /// The hinted unit value.
    pub fn unit(self) -> u8 {
        match self {
            UnitHint::Exact(u) | UnitHint::Caseless(u) => u,
        }
    }
}

/// One capture-name entry: group number plus name bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NameEntry {
    /// Capture group number.
    pub number: u16,
    /// Name bytes as written in the pattern.
    pub name: Box<[u8]>,
}

/// Alphabetically sorted capture-name table. Duplicate names (permitted
/// under `DUPNAMES`) sit adjacently, in order of appearance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NameTable {
    entries: Vec<NameEntry>,
}

impl NameTable {
    /// Insert an entry, keeping the table sorted by name and duplicates in
    /// appearance order.
    pub fn insert(&mut self, number: u16, name: &[u8]) {
        let at = self
            .entries
            .partition_point(|e| e.name.as_ref() <= name);
        self.entries.insert(
            at,
            NameEntry { number, name: name.to_vec().into_boxed_slice() },
        );
    }

    /// All entries sharing `name`, in appearance order.
    pub fn find(&self, name: &[u8]) -> &[NameEntry] {
        let start = self.entries.partition_point(|e| e.name.as_ref() < name);
        let end = self.entries.partition_point(|e| e.name.as_ref() <= name);
        &self.entries[start..end]
    }

    /// The full sorted table.
    pub fn entries(&self) -> &[NameEntry] {
        &self.entries
    }

    /// Index range of the entries sharing `name`, for duplicate-name
    /// bytecode operands.
    pub fn find_range(&self, name: &[u8]) -> (usize, usize) {
        let start = self.entries.partition_point(|e| e.name.as_ref() < name);
        let end = self.entries.partition_point(|e| e.name.as_ref() <= name);
        (start, end)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the table empty?
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Size of one fixed-width entry in the classic serialised layout:
    /// two units of group number, the longest name, and a terminator.
    pub fn entry_size(&self) -> usize {
        let longest = self.entries.iter().map(|e| e.name.len()).max().unwrap_or(0);
        if self.entries.is_empty() { 0 } else { longest + 3 }
    }
}

/// Pattern-embedded resource limits from `(*LIMIT_…)` verbs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EmbeddedLimits {
    /// `(*LIMIT_MATCH=n)`.
    pub match_limit: Option<u32>,
    /// `(*LIMIT_DEPTH=n)`.
    pub depth_limit: Option<u32>,
    /// `(*LIMIT_HEAP=n)` in KiB.
    pub heap_limit: Option<u32>,
}

/// A compiled pattern.
///
/// Immutable after construction. All jump targets are offsets within
/// [`Program::code`]; nothing points into caller memory, so the value is
/// freely movable and, with the `serde` feature, persistable (reload is
/// refused when the magic word does not match, which also catches
/// endianness changes for externally serialised forms).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Program {
    /// Sanity sentinel, always [`MAGIC`].
    pub magic: u32,
    /// Options in force at compile time.
    pub options: CompileOptions,
    /// Extra options in force at compile time.
    pub extra_options: ExtraOptions,
    /// Facts discovered during compilation.
    pub flags: ProgramFlags,
    /// Newline convention baked into the program.
    pub newline: Newline,
    /// `\R` convention baked into the program.
    pub bsr: Bsr,
    /// Width of links in [`Program::code`].
    pub link_size: LinkSize,
    /// Known-required first code unit, if analysis found one.
    pub first_unit: Option<UnitHint>,
    /// 256-bit map of feasible starting units, if analysis built one.
    pub start_bitmap: Option<[u8; 32]>,
    /// Known-required last literal unit, if analysis found one.
    pub last_unit: Option<UnitHint>,
    /// Lower bound on the length, in characters, of any match.
    pub min_length: u32,
    /// Longest lookbehind, in characters.
    pub max_lookbehind: u16,
    /// Highest capture group number.
    pub top_bracket: u16,
    /// Highest back-referenced group number.
    pub top_backref: u16,
    /// Capture-name table.
    pub names: NameTable,
    /// Limits embedded in the pattern text.
    pub limits: EmbeddedLimits,
    /// Start offset of each capture group's `CBra`, indexed by group
    /// number (entry 0 is the implicit whole-match group at offset 0).
    pub group_starts: Vec<u32>,
    /// The instruction stream, terminated by `Op::End`.
    pub code: Vec<u8>,
}

impl Program {
    /// Does the sentinel check out? Reloaded programs are verified before
    /// first use.
    pub fn magic_ok(&self) -> bool {
        self.magic == MAGIC
    }

    /// Number of capture pairs a match data block needs (group 0
    /// included).
    pub fn capture_count(&self) -> usize {
        self.top_bracket as usize + 1
    }

    /// Code offset of a capture group's opening instruction.
    pub fn group_start(&self, number: u16) -> Option<usize> {
        self.group_starts.get(number as usize).map(|&o| o as usize)
    }

    /// Is the pattern known to match only at the subject (or attempt)
    /// start?
    pub fn is_anchored(&self) -> bool {
        self.options.contains(CompileOptions::ANCHORED)
            || self.flags.contains(ProgramFlags::ANCHORED)
    }

    /// Size in bytes owned by the program.
    pub fn size(&self) -> usize {
        core::mem::size_of::<Self>()
            + self.code.len()
            + self.group_starts.len() * 4
            + self
                .names
                .entries()
                .iter()
                .map(|e| e.name.len() + core::mem::size_of::<NameEntry>())
                .sum::<usize>()
    }
}

/// Queryable facts about a compiled pattern, mirroring the classic
/// pattern-info interface as one plain struct.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    /// Compile options.
    pub options: CompileOptions,
    /// Highest back-reference.
    pub backref_max: u16,
    /// Number of capture groups.
    pub capture_count: u16,
    /// First-unit hint.
    pub first_unit: Option<UnitHint>,
    /// Start bitmap present?
    pub has_first_bitmap: bool,
    /// Last-unit hint.
    pub last_unit: Option<UnitHint>,
    /// Pattern contains literal CR or LF.
    pub has_cr_or_lf: bool,
    /// `(?J)` appeared mid-pattern.
    pub j_changed: bool,
    /// The pattern can match empty.
    pub match_empty: bool,
    /// Longest lookbehind in characters.
    pub max_lookbehind: u16,
    /// Minimum match length in characters.
    pub min_length: u32,
    /// Name-table entry count.
    pub name_count: usize,
    /// Fixed entry size of the serialised name table.
    pub name_entry_size: usize,
    /// Newline convention.
    pub newline: Newline,
    /// `\R` convention.
    pub bsr: Bsr,
    /// Total size in bytes.
    pub size: usize,
}

impl Program {
    /// Snapshot the queryable facts.
    pub fn info(&self) -> ProgramInfo {
        ProgramInfo {
            options: self.options,
            backref_max: self.top_backref,
            capture_count: self.top_bracket,
            first_unit: self.first_unit,
            has_first_bitmap: self.start_bitmap.is_some(),
            last_unit: self.last_unit,
            has_cr_or_lf: self.flags.contains(ProgramFlags::HAS_CR_OR_LF),
            j_changed: self.flags.contains(ProgramFlags::JCHANGED),
            match_empty: self.flags.contains(ProgramFlags::MATCH_EMPTY),
            max_lookbehind: self.max_lookbehind,
            min_length: self.min_length,
            name_count: self.names.len(),
            name_entry_size: self.names.entry_size(),
            newline: self.newline,
            bsr: self.bsr,
            size: self.size(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_table_sorts_alphabetically_with_stable_duplicates() {
        let mut t = NameTable::default();
        t.insert(3, b"zeta");
        t.insert(1, b"alpha");
        t.insert(2, b"mid");
        t.insert(4, b"mid");
        t.insert(5, b"mid");

        let names: Vec<&[u8]> = t.entries().iter().map(|e| e.name.as_ref()).collect();
        assert_eq!(names, vec![&b"alpha"[..], b"mid", b"mid", b"mid", b"zeta"]);

        let mids: Vec<u16> = t.find(b"mid").iter().map(|e| e.number).collect();
        assert_eq!(mids, vec![2, 4, 5], "duplicates keep appearance order");

        assert_eq!(t.find_range(b"mid"), (1, 4));
        assert!(t.find(b"nope").is_empty());
        assert_eq!(t.entry_size(), 5 + 3);
    }
}
