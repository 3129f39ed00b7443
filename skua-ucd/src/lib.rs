//! Character tables and Unicode property data for the skua regex engine.
//!
//! Everything here is immutable static data plus pure lookup functions:
//! the classic per-locale tables for code points below 256, a Unicode
//! Character Database subset (general categories, scripts, case data,
//! grapheme break classes) and the loose-matched property name table that
//! `\p{…}` resolution consults.

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![deny(unused_must_use)]

pub mod casing;
pub mod grapheme;
pub mod names;
pub mod script;
pub mod tables;
pub mod ucd;

pub use casing::{case_set, chars_fold_equal, other_case, to_lower, to_upper, FoldRules};
pub use grapheme::{grapheme_break, GraphemeBreak};
pub use names::resolve as resolve_property;
pub use script::ScriptRun;
pub use tables::{PosixClass, Tables, DEFAULT_TABLES};
pub use ucd::{category, is_word, script, CategoryGroup, ClassProperty, GeneralCategory, Script};

/// Version of the Unicode Character Database the tables were derived from.
pub const UNICODE_VERSION: (u8, u8, u8) = (15, 0, 0);

/// Horizontal whitespace code points (`\h`).
pub static HSPACE_LIST: &[u32] = &[
    0x09, 0x20, 0xA0, 0x1680, 0x2000, 0x2001, 0x2002, 0x2003, 0x2004, 0x2005,
    0x2006, 0x2007, 0x2008, 0x2009, 0x200A, 0x202F, 0x205F, 0x3000,
];

/// Vertical whitespace code points (`\v`).
pub static VSPACE_LIST: &[u32] = &[0x0A, 0x0B, 0x0C, 0x0D, 0x85, 0x2028, 0x2029];

/// Is this code point horizontal whitespace?
pub fn is_hspace(cp: u32) -> bool {
    HSPACE_LIST.contains(&cp)
}

/// Is this code point vertical whitespace?
pub fn is_vspace(cp: u32) -> bool {
    VSPACE_LIST.contains(&cp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[test]
    fn space_lists_are_sorted_and_disjoint() {
        for w in HSPACE_LIST.windows(2) {
            assert!(w[0] < w[1]);
        }
        for w in VSPACE_LIST.windows(2) {
            assert!(w[0] < w[1]);
        }
        for h in HSPACE_LIST {
            assert!(!VSPACE_LIST.contains(h));
        }
    }

    #[quickcheck]
    fn fold_partners_are_an_equivalence(cp: u32) -> bool {
        let cp = cp % 0x11000;
        let rules = FoldRules::default();
        let (partners, n) = rules.partners(cp);
        partners[..n].iter().all(|&p| {
            let (back, m) = rules.partners(p);
            back[..m].contains(&cp)
        })
    }

    #[quickcheck]
    fn ucd_space_superset_of_classic(c: u8) -> bool {
        use tables::CTYPE_SPACE;
        // Every classic whitespace character is Unicode whitespace too.
        !DEFAULT_TABLES.is_ctype(c as u32, CTYPE_SPACE) || ucd::is_space(c as u32)
    }
}
