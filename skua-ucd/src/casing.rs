//! Case equivalence data: simple other-case mapping, multi-member caseless
//! sets, and the Turkish and ASCII-restricted folding modes.

use crate::ucd::{category, GeneralCategory};

/// Caseless equivalence sets with more than two members. Each set lists
/// every member; `case_set` finds the set containing a code point.
static CASELESS_SETS: &[&[u32]] = &[
    &[0x004B, 0x006B, 0x212A],         // K, k, KELVIN SIGN
    &[0x0053, 0x0073, 0x017F],         // S, s, LONG S
    &[0x00C5, 0x00E5, 0x212B],         // A-RING, a-ring, ANGSTROM SIGN
    &[0x01C4, 0x01C5, 0x01C6],         // DZ with caron
    &[0x01C7, 0x01C8, 0x01C9],         // LJ
    &[0x01CA, 0x01CB, 0x01CC],         // NJ
    &[0x01F1, 0x01F2, 0x01F3],         // DZ
    &[0x0345, 0x0399, 0x03B9, 0x1FBE], // iota subscript, IOTA, iota
    &[0x0392, 0x03B2, 0x03D0],         // BETA, beta, beta symbol
    &[0x0395, 0x03B5, 0x03F5],         // EPSILON
    &[0x0398, 0x03B8, 0x03D1, 0x03F4], // THETA
    &[0x039A, 0x03BA, 0x03F0],         // KAPPA
    &[0x039C, 0x03BC, 0x00B5],         // MU, mu, MICRO SIGN
    &[0x03A0, 0x03C0, 0x03D6],         // PI
    &[0x03A1, 0x03C1, 0x03F1],         // RHO
    &[0x03A3, 0x03C3, 0x03C2],         // SIGMA, sigma, final sigma
    &[0x03A6, 0x03C6, 0x03D5],         // PHI
    &[0x03A9, 0x03C9, 0x2126],         // OMEGA, omega, OHM SIGN
];

/// The members of the caseless set containing `cp`, if it has one.
pub fn case_set(cp: u32) -> Option<&'static [u32]> {
    CASELESS_SETS.iter().copied().find(|set| set.contains(&cp))
}

/// Simple one-to-one other-case partner of a code point, ignoring the
/// multi-member sets (consult [`case_set`] first under caseless matching).
pub fn other_case(cp: u32) -> Option<u32> {
    let other = match cp {
        // ASCII and Latin-1.
        0x0041..=0x005A => cp + 32,
        0x0061..=0x007A => cp - 32,
        0x00B5 => 0x039C,
        0x00C0..=0x00D6 | 0x00D8..=0x00DE => cp + 32,
        0x00E0..=0x00F6 | 0x00F8..=0x00FE => cp - 32,
        0x00FF => 0x0178,
        // Latin Extended-A: pairwise except the dotted/dotless I pair, the
        // isolated kra and apostrophe-n, and long s (set member).
        0x0130 | 0x0131 | 0x0138 | 0x0149 | 0x017F => return None,
        0x0178 => 0x00FF,
        0x0100..=0x0137 | 0x014A..=0x0177 => cp ^ 1,
        0x0139..=0x0148 | 0x0179..=0x017E => if cp % 2 == 1 { cp + 1 } else { cp - 1 },
        // Greek.
        0x0386 => 0x03AC,
        0x0388..=0x038A => cp + 37,
        0x038C => 0x03CC,
        0x038E..=0x038F => cp + 63,
        0x0391..=0x03A1 | 0x03A3..=0x03AB => cp + 32,
        0x03AC => 0x0386,
        0x03AD..=0x03AF => cp - 37,
        0x03B1..=0x03C1 | 0x03C3..=0x03CB => cp - 32,
        0x03C2 => 0x03A3,
        0x03CC => 0x038C,
        0x03CD..=0x03CE => cp - 63,
        0x03D8..=0x03EF => cp ^ 1,
        // Cyrillic.
        0x0400..=0x040F => cp + 80,
        0x0410..=0x042F => cp + 32,
        0x0430..=0x044F => cp - 32,
        0x0450..=0x045F => cp - 80,
        0x0460..=0x0481 | 0x048A..=0x04BF => cp ^ 1,
        0x04C1..=0x04CE => if cp % 2 == 1 { cp + 1 } else { cp - 1 },
        0x04D0..=0x052F => cp ^ 1,
        // Armenian.
        0x0531..=0x0556 => cp + 48,
        0x0561..=0x0586 => cp - 48,
        // Georgian (Asomtavruli <-> Mkhedruli is a title mapping; skip).
        // Cherokee.
        0x13A0..=0x13F5 => return None, // lowercase partners sit off-plane
        // Latin Extended Additional, skipping the unpaired 1E96..1E9F run.
        0x1E00..=0x1E95 | 0x1EA0..=0x1EFF => cp ^ 1,
        // Greek Extended: lowercase block at -8 from uppercase.
        0x1F00..=0x1F07 | 0x1F10..=0x1F15 | 0x1F20..=0x1F27 | 0x1F30..=0x1F37
        | 0x1F40..=0x1F45 | 0x1F60..=0x1F67 => cp + 8,
        0x1F08..=0x1F0F | 0x1F18..=0x1F1D | 0x1F28..=0x1F2F | 0x1F38..=0x1F3F
        | 0x1F48..=0x1F4D | 0x1F68..=0x1F6F => cp - 8,
        // Letterlike set members resolve through case_set.
        0x2126 | 0x212A | 0x212B => return None,
        // Fullwidth.
        0xFF21..=0xFF3A => cp + 32,
        0xFF41..=0xFF5A => cp - 32,
        // Deseret.
        0x10400..=0x10427 => cp + 40,
        0x10428..=0x1044F => cp - 40,
        _ => return None,
    };
    Some(other)
}

/// Folding behaviour selectors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldRules {
    /// Turkish/Azeri dotted and dotless I.
    pub turkish: bool,
    /// Forbid folds that cross the ASCII boundary (K/KELVIN, S/long-s, …).
    pub ascii_restricted: bool,
}

impl FoldRules {
    /// All case partners of `cp` under these rules, excluding `cp` itself.
    /// At most three partners exist (the largest caseless set has four
    /// members), so the result is a fixed array with a length.
    pub fn partners(self, cp: u32) -> ([u32; 3], usize) {
        let mut out = [0u32; 3];
        let mut n = 0;

        if self.turkish {
            // In Turkish mode I<->dotless-i and dotted-I<->i; the ASCII
            // pairing of I/i does not apply.
            match cp {
                0x49 => return ([0x131, 0, 0], 1),
                0x69 => return ([0x130, 0, 0], 1),
                0x130 => return ([0x69, 0, 0], 1),
                0x131 => return ([0x49, 0, 0], 1),
                _ => {}
            }
        }

        if let Some(set) = case_set(cp) {
            for &m in set {
                if m != cp && self.permits(cp, m) && n < 3 {
                    out[n] = m;
                    n += 1;
                }
            }
            return (out, n);
        }
        if let Some(o) = other_case(cp) {
            if self.permits(cp, o) {
                out[0] = o;
                n = 1;
            }
        }
        (out, n)
    }

    fn permits(self, a: u32, b: u32) -> bool {
        !(self.ascii_restricted && (a < 128) != (b < 128))
    }
}

/// Upper-case a code point for substitution case forcing.
pub fn to_upper(cp: u32, rules: FoldRules) -> u32 {
    if rules.turkish && cp == 0x69 {
        return 0x130;
    }
    if category(cp) == GeneralCategory::Ll {
        if let Some(o) = other_case(cp) {
            if category(o) == GeneralCategory::Lu && rules.permits(cp, o) {
                return o;
            }
        }
    }
    cp
}

/// Lower-case a code point for substitution case forcing.
pub fn to_lower(cp: u32, rules: FoldRules) -> u32 {
    if rules.turkish && cp == 0x49 {
        return 0x131;
    }
    if category(cp) == GeneralCategory::Lu {
        if let Some(o) = other_case(cp) {
            if category(o) == GeneralCategory::Ll && rules.permits(cp, o) {
                return o;
            }
        }
    }
    cp
}

/// Do two code points match caselessly under the given rules?
pub fn chars_fold_equal(a: u32, b: u32, rules: FoldRules) -> bool {
    if a == b {
        return true;
    }
    let (partners, n) = rules.partners(a);
    partners[..n].contains(&b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn sets_are_symmetric() {
        for set in CASELESS_SETS {
            for &m in *set {
                assert_eq!(case_set(m), Some(*set), "member {m:#x}");
            }
        }
    }

    #[test_case(b'A' as u32, Some(b'a' as u32))]
    #[test_case(0x00E9, Some(0x00C9); "e acute")]
    #[test_case(0x0106, Some(0x0107); "c acute pair")]
    #[test_case(0x013D, Some(0x013E); "l caron pair")]
    #[test_case(0x0391, Some(0x03B1); "alpha")]
    #[test_case(0x0416, Some(0x0436); "zhe")]
    #[test_case(0x0451, Some(0x0401); "io")]
    #[test_case(0x0531, Some(0x0561); "armenian ayb")]
    #[test_case(0x10428, Some(0x10400); "deseret")]
    #[test_case(b'5' as u32, None)]
    fn other_case_pairs(cp: u32, expect: Option<u32>) {
        assert_eq!(other_case(cp), expect);
        if let Some(o) = expect {
            assert_eq!(other_case(o), Some(cp), "mapping must be symmetric");
        }
    }

    #[test]
    fn kelvin_folds_to_k() {
        let rules = FoldRules::default();
        assert!(chars_fold_equal(0x212A, b'k' as u32, rules));
        assert!(chars_fold_equal(b'K' as u32, 0x212A, rules));
    }

    #[test]
    fn restricted_fold_stops_at_ascii_boundary() {
        let rules = FoldRules { ascii_restricted: true, ..Default::default() };
        assert!(!chars_fold_equal(b'k' as u32, 0x212A, rules));
        assert!(chars_fold_equal(b'k' as u32, b'K' as u32, rules));
        assert!(!chars_fold_equal(b's' as u32, 0x017F, rules));
    }

    #[test]
    fn turkish_i() {
        let rules = FoldRules { turkish: true, ..Default::default() };
        assert!(chars_fold_equal(b'I' as u32, 0x0131, rules));
        assert!(chars_fold_equal(b'i' as u32, 0x0130, rules));
        assert!(!chars_fold_equal(b'I' as u32, b'i' as u32, rules));
        assert_eq!(to_upper(b'i' as u32, rules), 0x0130);
        assert_eq!(to_lower(b'I' as u32, rules), 0x0131);
    }

    #[test]
    fn case_forcing() {
        let rules = FoldRules::default();
        assert_eq!(to_upper(0x00E9, rules), 0x00C9);
        assert_eq!(to_lower(0x0394, rules), 0x03B4);
        assert_eq!(to_upper(b'!' as u32, rules), b'!' as u32);
    }
}
