//! Extended grapheme cluster segmentation data for `\X`.

use crate::ucd::{category, GeneralCategory};

/// Grapheme cluster break classes (UAX #29 subset used by the matcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(missing_docs)]
pub enum GraphemeBreak {
    Cr,
    Lf,
    Control,
    Extend,
    Zwj,
    RegionalIndicator,
    Prepend,
    SpacingMark,
    HangulL,
    HangulV,
    HangulT,
    HangulLv,
    HangulLvt,
    ExtendedPictographic,
    Other,
}

/// Break class of a code point.
pub fn grapheme_break(cp: u32) -> GraphemeBreak {
    use GraphemeBreak::*;
    match cp {
        0x0D => return Cr,
        0x0A => return Lf,
        0x200D => return Zwj,
        0x200C => return Extend,
        0x1F1E6..=0x1F1FF => return RegionalIndicator,
        0x0600..=0x0605 | 0x06DD | 0x070F | 0x08E2 | 0x0D4E => return Prepend,
        0x1100..=0x115F | 0xA960..=0xA97C => return HangulL,
        0x1160..=0x11A7 | 0xD7B0..=0xD7C6 => return HangulV,
        0x11A8..=0x11FF | 0xD7CB..=0xD7FB => return HangulT,
        0xAC00..=0xD7A3 => {
            return if (cp - 0xAC00) % 28 == 0 { HangulLv } else { HangulLvt };
        }
        0x00A9 | 0x00AE | 0x203C | 0x2049 | 0x2122 | 0x2139
        | 0x2600..=0x27BF | 0x2B00..=0x2BFF
        | 0x1F000..=0x1F0FF | 0x1F300..=0x1FAFF => return ExtendedPictographic,
        _ => {}
    }
    match category(cp) {
        GeneralCategory::Cc | GeneralCategory::Cs | GeneralCategory::Zl
        | GeneralCategory::Zp => Control,
        GeneralCategory::Cf => Control,
        GeneralCategory::Mn | GeneralCategory::Me => Extend,
        GeneralCategory::Mc => SpacingMark,
        _ => Other,
    }
}

/// Does a cluster boundary fall between two adjacent code points?
/// Regional-indicator pairing and the emoji ZWJ rule need more context than
/// one character; callers track those with [`PairState`].
pub fn is_break(before: GraphemeBreak, after: GraphemeBreak, state: &mut PairState) -> bool {
    use GraphemeBreak::*;

    let ri_break = {
        // GB12/GB13: break between regional indicators only after a pair.
        if before == RegionalIndicator && after == RegionalIndicator {
            let even = state.ri_parity;
            state.ri_parity = !state.ri_parity;
            even
        } else {
            state.ri_parity = false;
            false
        }
    };

    // GB11 bookkeeping: an ExtPic base survives Extend and ZWJ characters.
    match before {
        ExtendedPictographic => state.in_pictographic = true,
        Extend | Zwj => {}
        _ => state.in_pictographic = false,
    }
    let after_zwj_pic = before == Zwj && after == ExtendedPictographic && state.in_pictographic;

    match (before, after) {
        (Cr, Lf) => false,                                   // GB3
        (Control | Cr | Lf, _) => true,                      // GB4
        (_, Control | Cr | Lf) => true,                      // GB5
        (HangulL, HangulL | HangulV | HangulLv | HangulLvt) => false, // GB6
        (HangulLv | HangulV, HangulV | HangulT) => false,    // GB7
        (HangulLvt | HangulT, HangulT) => false,             // GB8
        (_, Extend | Zwj) => false,                          // GB9
        (_, SpacingMark) => false,                           // GB9a
        (Prepend, _) => false,                               // GB9b
        (Zwj, ExtendedPictographic) if after_zwj_pic => false, // GB11
        (RegionalIndicator, RegionalIndicator) => ri_break,  // GB12/13
        _ => true,
    }
}

/// Cross-pair state for [`is_break`].
#[derive(Debug, Clone, Default)]
pub struct PairState {
    ri_parity: bool,
    in_pictographic: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clusters(s: &str) -> usize {
        let cps: Vec<u32> = s.chars().map(|c| c as u32).collect();
        if cps.is_empty() {
            return 0;
        }
        let mut state = PairState::default();
        let mut count = 1;
        for w in cps.windows(2) {
            if is_break(grapheme_break(w[0]), grapheme_break(w[1]), &mut state) {
                count += 1;
            }
        }
        count
    }

    #[test]
    fn crlf_is_one_cluster() {
        assert_eq!(clusters("\r\n"), 1);
        assert_eq!(clusters("\n\r"), 2);
    }

    #[test]
    fn combining_marks_attach() {
        assert_eq!(clusters("e\u{0301}"), 1);
        assert_eq!(clusters("e\u{0301}\u{0308}x"), 2);
    }

    #[test]
    fn hangul_syllables() {
        // L V T jamo sequence forms one cluster.
        assert_eq!(clusters("\u{1100}\u{1161}\u{11A8}"), 1);
        // Precomposed LV plus trailing T.
        assert_eq!(clusters("\u{AC00}\u{11A8}"), 1);
    }

    #[test]
    fn regional_indicators_pair_up() {
        assert_eq!(clusters("\u{1F1E6}\u{1F1E7}"), 1);
        assert_eq!(clusters("\u{1F1E6}\u{1F1E7}\u{1F1E8}"), 2);
        assert_eq!(clusters("\u{1F1E6}\u{1F1E7}\u{1F1E8}\u{1F1E9}"), 2);
    }

    #[test]
    fn zwj_emoji_sequence() {
        assert_eq!(clusters("\u{1F469}\u{200D}\u{1F4BB}"), 1); // woman + ZWJ + laptop
    }
}
