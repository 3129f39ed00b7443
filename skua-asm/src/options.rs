//! Option words and the newline / `\R` conventions.

use bitflags::bitflags;

bitflags! {
    /// Options fixed at compile time.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct CompileOptions: u32 {
        /// The match must start at the start offset.
        const ANCHORED = 1 << 0;
        /// `[]` is an empty class rather than an error.
        const ALLOW_EMPTY_CLASS = 1 << 1;
        /// ECMAScript-flavoured `\u`/`\x` handling.
        const ALT_BSUX = 1 << 2;
        /// In multiline mode `^` never matches after a final newline.
        const ALT_CIRCUMFLEX = 1 << 3;
        /// Process escapes inside verb names.
        const ALT_VERBNAMES = 1 << 4;
        /// Insert an automatic callout before every item.
        const AUTO_CALLOUT = 1 << 5;
        /// Case-insensitive matching.
        const CASELESS = 1 << 6;
        /// `$` matches only at the very end of the subject.
        const DOLLAR_ENDONLY = 1 << 7;
        /// `.` also matches newlines.
        const DOTALL = 1 << 8;
        /// Allow duplicate group names.
        const DUPNAMES = 1 << 9;
        /// The match must end at the end of the subject.
        const ENDANCHORED = 1 << 10;
        /// Ignore unescaped whitespace and `#` comments outside classes.
        const EXTENDED = 1 << 11;
        /// Like `EXTENDED`, and also ignore space and tab inside classes.
        const EXTENDED_MORE = 1 << 12;
        /// A match must start within the first line of the subject.
        const FIRSTLINE = 1 << 13;
        /// Treat the whole pattern as literal text.
        const LITERAL = 1 << 14;
        /// Permit matching within invalid UTF subjects.
        const MATCH_INVALID_UTF = 1 << 15;
        /// A back-reference to an unset group matches the empty string.
        const MATCH_UNSET_BACKREF = 1 << 16;
        /// `^`/`$` match at internal newlines.
        const MULTILINE = 1 << 17;
        /// Forbid `\C` in the pattern.
        const NEVER_BACKSLASH_C = 1 << 18;
        /// Refuse `(*UCP)` and the UCP option.
        const NEVER_UCP = 1 << 19;
        /// Refuse `(*UTF)` and the UTF option.
        const NEVER_UTF = 1 << 20;
        /// Plain `(…)` does not capture.
        const NO_AUTO_CAPTURE = 1 << 21;
        /// Disable the auto-possessification rewrite.
        const NO_AUTO_POSSESS = 1 << 22;
        /// Disable the leading-`.*` anchoring rewrite.
        const NO_DOTSTAR_ANCHOR = 1 << 23;
        /// Disable start-of-match optimisations entirely.
        const NO_START_OPTIMIZE = 1 << 24;
        /// The caller guarantees the pattern is valid UTF.
        const NO_UTF_CHECK = 1 << 25;
        /// `\w`, `\d`, `\s` and friends use Unicode properties.
        const UCP = 1 << 26;
        /// Invert quantifier greediness.
        const UNGREEDY = 1 << 27;
        /// Honour the match-context offset limit.
        const USE_OFFSET_LIMIT = 1 << 28;
        /// Interpret pattern and subject as UTF-8.
        const UTF = 1 << 29;
    }
}

bitflags! {
    /// Less-common compile behaviour, set through the compile context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ExtraOptions: u32 {
        /// Allow `\K` inside lookarounds.
        const ALLOW_LOOKAROUND_BSK = 1 << 0;
        /// `[a-z&&[aeiou]]`-style extended class syntax.
        const ALT_EXTENDED_CLASS = 1 << 1;
        /// `\d` stays ASCII even in UCP mode.
        const ASCII_BSD = 1 << 2;
        /// `\s` stays ASCII even in UCP mode.
        const ASCII_BSS = 1 << 3;
        /// `\w` stays ASCII even in UCP mode.
        const ASCII_BSW = 1 << 4;
        /// `{n}` interval digits stay ASCII in UCP mode.
        const ASCII_DIGIT = 1 << 5;
        /// POSIX classes stay ASCII even in UCP mode.
        const ASCII_POSIX = 1 << 6;
        /// An unrecognised escape is the literal character.
        const BAD_ESCAPE_IS_LITERAL = 1 << 7;
        /// Forbid case folds that cross the ASCII boundary.
        const CASELESS_RESTRICT = 1 << 8;
        /// `\r` in a pattern compiles to LF.
        const ESCAPED_CR_IS_LF = 1 << 9;
        /// Wrap the pattern so it must match a complete line.
        const MATCH_LINE = 1 << 10;
        /// Wrap the pattern in word boundaries.
        const MATCH_WORD = 1 << 11;
        /// Refuse callouts at compile time.
        const NEVER_CALLOUT = 1 << 12;
        /// `\0` is not a NUL escape.
        const NO_BS0 = 1 << 13;
        /// Python-style octal escape semantics.
        const PYTHON_OCTAL = 1 << 14;
        /// Turkish/Azeri dotted and dotless I casing.
        const TURKISH_CASING = 1 << 15;
    }
}

bitflags! {
    /// Options supplied per match attempt.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MatchOptions: u32 {
        /// Subject start is not the beginning of a line.
        const NOTBOL = 1 << 0;
        /// Subject end is not the end of a line.
        const NOTEOL = 1 << 1;
        /// Refuse an empty-string match anywhere.
        const NOTEMPTY = 1 << 2;
        /// Refuse an empty-string match at the start offset.
        const NOTEMPTY_ATSTART = 1 << 3;
        /// Report a partial match if a full one is impossible.
        const PARTIAL_SOFT = 1 << 4;
        /// Prefer a partial match over a full one.
        const PARTIAL_HARD = 1 << 5;
        /// The match must start at the start offset.
        const ANCHORED = 1 << 6;
        /// The match must end at the end of the subject.
        const ENDANCHORED = 1 << 7;
        /// The caller guarantees the subject is valid UTF.
        const NO_UTF_CHECK = 1 << 8;
        /// The match data keeps its own copy of the subject.
        const COPY_MATCHED_SUBJECT = 1 << 9;
        /// Disable the recursion same-position loop check.
        const DISABLE_RECURSELOOP_CHECK = 1 << 10;
        /// DFA: stop at the shortest match.
        const DFA_SHORTEST = 1 << 11;
        /// DFA: continue from a previous partial match.
        const DFA_RESTART = 1 << 12;
        /// Skip any accelerated execution engine; accepted for interface
        /// compatibility, the interpreters are always used here.
        const NO_JIT = 1 << 13;
    }
}

bitflags! {
    /// Options for the substitution engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SubstituteOptions: u32 {
        /// Replace every match, not just the first.
        const GLOBAL = 1 << 0;
        /// Enable `${name:+…}`/`${name:-…}` forms and relaxed syntax.
        const EXTENDED = 1 << 1;
        /// The replacement is literal text.
        const LITERAL = 1 << 2;
        /// Begin from an existing match in the match data.
        const MATCHED = 1 << 3;
        /// On overflow keep counting and report the needed length.
        const OVERFLOW_LENGTH = 1 << 4;
        /// Return only the replacements, not the surrounding subject.
        const REPLACEMENT_ONLY = 1 << 5;
        /// An unset group expands to the empty string.
        const UNSET_EMPTY = 1 << 6;
        /// An unknown group is treated as unset.
        const UNKNOWN_UNSET = 1 << 7;
    }
}

bitflags! {
    /// Facts about a compiled program discovered during compilation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    #[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
    pub struct ProgramFlags: u32 {
        /// An explicit CR or LF appears in the pattern.
        const HAS_CR_OR_LF = 1 << 0;
        /// `(?J)` changed the duplicate-names setting mid-pattern.
        const JCHANGED = 1 << 1;
        /// The pattern can match an empty string.
        const MATCH_EMPTY = 1 << 2;
        /// The pattern contains back-references.
        const HAS_BACKREF = 1 << 3;
        /// The pattern contains recursion or subroutine calls.
        const HAS_RECURSE = 1 << 4;
        /// Analysis proved every match starts at the subject start
        /// (or line start under `FIRSTLINE`-style reasoning).
        const ANCHORED = 1 << 5;
        /// Analysis proved a match can only start in the first line.
        const FIRSTLINE_ONLY = 1 << 6;
        /// The pattern uses `\K`.
        const HAS_BSK = 1 << 7;
        /// The pattern contains `(*ACCEPT)`.
        const HAS_ACCEPT = 1 << 8;
        /// The pattern contains a variable-length lookbehind.
        const HAS_VARIABLE_LOOKBEHIND = 1 << 9;
    }
}

/// Newline conventions for `^`, `$`, `.` and the start-position bumpalong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Newline {
    /// Carriage return only.
    Cr,
    /// Linefeed only.
    #[default]
    Lf,
    /// The two-character CRLF sequence only.
    CrLf,
    /// Any Unicode newline: CR, LF, CRLF, VT, FF, NEL, LS, PS.
    Any,
    /// CR, LF or CRLF.
    AnyCrlf,
    /// The NUL character.
    Nul,
}

impl Newline {
    /// Is there a newline sequence at `pos`? Returns its length in bytes.
    pub fn at(self, subject: &[u8], pos: usize, utf: bool) -> Option<usize> {
        let b = *subject.get(pos)?;
        match self {
            Newline::Cr => (b == b'\r').then_some(1),
            Newline::Lf => (b == b'\n').then_some(1),
            Newline::CrLf => (b == b'\r' && subject.get(pos + 1) == Some(&b'\n')).then_some(2),
            Newline::Nul => (b == 0).then_some(1),
            Newline::AnyCrlf => match b {
                b'\r' if subject.get(pos + 1) == Some(&b'\n') => Some(2),
                b'\r' | b'\n' => Some(1),
                _ => None,
            },
            Newline::Any => match b {
                b'\r' if subject.get(pos + 1) == Some(&b'\n') => Some(2),
                b'\r' | b'\n' | 0x0B | 0x0C => Some(1),
                0x85 if !utf => Some(1),
                0xC2 if utf && subject.get(pos + 1) == Some(&0x85) => Some(2),
                0xE2 if utf
                    && subject.get(pos + 1) == Some(&0x80)
                    && matches!(subject.get(pos + 2), Some(&0xA8) | Some(&0xA9)) =>
                {
                    Some(3)
                }
                _ => None,
            },
        }
    }

    /// Is there a newline sequence ending exactly at `pos` (looking
    /// backwards)? Returns its length. The interior of a CRLF does not
    /// count as a newline boundary.
    pub fn before(self, subject: &[u8], pos: usize, utf: bool) -> Option<usize> {
        for len in (1..=3usize).rev() {
            let Some(start) = pos.checked_sub(len) else { continue };
            if self.at(subject, start, utf) == Some(len) {
                return Some(len);
            }
        }
        None
    }

    /// True when a code point is a newline character under this convention
    /// (used by `.` exclusion and the start bitmap).
    pub fn is_newline_cp(self, cp: u32) -> bool {
        match self {
            Newline::Cr => cp == 0x0D,
            Newline::Lf => cp == 0x0A,
            Newline::CrLf => cp == 0x0D || cp == 0x0A,
            Newline::AnyCrlf => cp == 0x0D || cp == 0x0A,
            Newline::Nul => cp == 0,
            Newline::Any => matches!(cp, 0x0A..=0x0D | 0x85 | 0x2028 | 0x2029),
        }
    }
}

/// What `\R` matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Bsr {
    /// Any Unicode newline sequence.
    #[default]
    Unicode,
    /// CR, LF or CRLF only.
    AnyCrlf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_is_preferred_over_cr() {
        let s = b"a\r\nb";
        assert_eq!(Newline::AnyCrlf.at(s, 1, false), Some(2));
        assert_eq!(Newline::Cr.at(s, 1, false), Some(1));
        assert_eq!(Newline::CrLf.at(s, 1, false), Some(2));
        assert_eq!(Newline::CrLf.at(b"a\rb", 1, false), None);
    }

    #[test]
    fn any_matches_unicode_breaks() {
        let nel_utf = [0xC2, 0x85];
        assert_eq!(Newline::Any.at(&nel_utf, 0, true), Some(2));
        let ls = "\u{2028}".as_bytes();
        assert_eq!(Newline::Any.at(ls, 0, true), Some(3));
        let nel_raw = [0x85u8];
        assert_eq!(Newline::Any.at(&nel_raw, 0, false), Some(1));
    }

    #[test]
    fn looking_backwards() {
        let s = b"ab\r\ncd";
        assert_eq!(Newline::AnyCrlf.before(s, 4, false), Some(2));
        // Inside the CRLF pair there is no boundary.
        assert_eq!(Newline::AnyCrlf.before(s, 3, false), None);
        assert_eq!(Newline::AnyCrlf.before(s, 2, false), None);
        assert_eq!(Newline::Lf.before(b"x\ny", 2, false), Some(1));
    }
}
