//! Script-run verification.
//!
//! A script run is a sequence of characters that could plausibly belong to
//! one writing system: Common/Inherited characters attach to any run, the
//! Han-based scripts combine per their augmented sets (Japanese, Korean,
//! Chinese usage), and every decimal digit in a run must come from the same
//! block of ten.

use crate::ucd::{digit_block_start, script, Script};

fn bit(s: Script) -> u64 {
    1u64 << (s as u32)
}

const JAPANESE: u64 = (1 << Script::Han as u32)
    | (1 << Script::Hiragana as u32)
    | (1 << Script::Katakana as u32);
const KOREAN: u64 = (1 << Script::Han as u32) | (1 << Script::Hangul as u32);
const CHINESE: u64 = (1 << Script::Han as u32) | (1 << Script::Bopomofo as u32);

/// Incremental script-run state. Feed code points with [`ScriptRun::push`];
/// the run fails as soon as a character cannot share a script identity with
/// everything seen so far.
#[derive(Debug, Clone, Default)]
pub struct ScriptRun {
    /// Bit set of non-neutral scripts seen.
    seen: u64,
    /// Decimal digit block the run is locked to.
    digit_block: Option<u32>,
}

impl ScriptRun {
    /// A fresh run that accepts any first character.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next code point; returns false when the run is broken.
    pub fn push(&mut self, cp: u32) -> bool {
        if let Some(block) = digit_block_start(cp) {
            match self.digit_block {
                Some(have) if have != block => return false,
                _ => self.digit_block = Some(block),
            }
        }

        let s = script(cp);
        if s.is_neutral() {
            return true;
        }
        if s == Script::Unknown {
            return false;
        }

        let seen = self.seen | bit(s);
        let coherent = seen.count_ones() == 1
            || seen & !JAPANESE == 0
            || seen & !KOREAN == 0
            || seen & !CHINESE == 0;
        if !coherent {
            return false;
        }
        self.seen = seen;
        true
    }

    /// Verify a whole sequence of code points as one run.
    pub fn check<I: IntoIterator<Item = u32>>(points: I) -> bool {
        let mut run = ScriptRun::new();
        points.into_iter().all(|cp| run.push(cp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_str(s: &str) -> bool {
        ScriptRun::check(s.chars().map(|c| c as u32))
    }

    #[test]
    fn single_script_passes() {
        assert!(run_str("paypal"));
        assert!(run_str("привет"));
        assert!(run_str("αβγδ"));
    }

    #[test]
    fn mixed_script_fails() {
        assert!(!run_str("pаypal")); // second letter is Cyrillic
        assert!(!run_str("abcδ"));
    }

    #[test]
    fn common_and_inherited_attach_anywhere() {
        assert!(run_str("foo123bar"));
        assert!(run_str("a\u{0301}b")); // combining acute is Inherited
        assert!(run_str("42!?"));
    }

    #[test]
    fn augmented_han_sets() {
        assert!(run_str("漢字かなカナ")); // Japanese: Han + both kana
        assert!(run_str("漢한")); // Korean: Han + Hangul
        assert!(run_str("漢ㄅㄆ")); // Chinese: Han + Bopomofo
        assert!(!run_str("かな한")); // kana with Hangul is no augmented set
        assert!(!run_str("한ㄅ"));
    }

    #[test]
    fn han_group_rejects_alphabetic_scripts() {
        assert!(!run_str("漢a"));
        assert!(!run_str("aかな"));
    }

    #[test]
    fn digits_must_share_a_block() {
        assert!(run_str("123456"));
        assert!(!run_str("1٢3")); // ASCII and Arabic-Indic digits
        assert!(run_str("٠١٢٣"));
    }
}
