//! Property name resolution for `\p{…}` and `\P{…}`.
//!
//! Names match loosely: ASCII case, spaces, hyphens and underscores are
//! ignored, so `Script_Extensions=Greek`-style spellings reduce to the same
//! key. The table is sorted by normalised name and binary searched.

use crate::ucd::{CategoryGroup, ClassProperty, GeneralCategory, Script};

use CategoryGroup as G;
use GeneralCategory as C;
use Script as S;

/// Name table. Keys are pre-normalised (lower case, separators stripped)
/// and the array is sorted by key; `resolve` binary searches it.
static PROPERTY_NAMES: &[(&str, ClassProperty)] = &[
    ("any", ClassProperty::Any),
    ("arabic", ClassProperty::Script(S::Arabic)),
    ("armenian", ClassProperty::Script(S::Armenian)),
    ("bengali", ClassProperty::Script(S::Bengali)),
    ("bopomofo", ClassProperty::Script(S::Bopomofo)),
    ("c", ClassProperty::Group(G::C)),
    ("canadianaboriginal", ClassProperty::Script(S::CanadianAboriginal)),
    ("cc", ClassProperty::Category(C::Cc)),
    ("cf", ClassProperty::Category(C::Cf)),
    ("cherokee", ClassProperty::Script(S::Cherokee)),
    ("cn", ClassProperty::Category(C::Cn)),
    ("co", ClassProperty::Category(C::Co)),
    ("common", ClassProperty::Script(S::Common)),
    ("coptic", ClassProperty::Script(S::Coptic)),
    ("cs", ClassProperty::Category(C::Cs)),
    ("cyrillic", ClassProperty::Script(S::Cyrillic)),
    ("deseret", ClassProperty::Script(S::Deseret)),
    ("devanagari", ClassProperty::Script(S::Devanagari)),
    ("ethiopic", ClassProperty::Script(S::Ethiopic)),
    ("georgian", ClassProperty::Script(S::Georgian)),
    ("gothic", ClassProperty::Script(S::Gothic)),
    ("greek", ClassProperty::Script(S::Greek)),
    ("gujarati", ClassProperty::Script(S::Gujarati)),
    ("gurmukhi", ClassProperty::Script(S::Gurmukhi)),
    ("han", ClassProperty::Script(S::Han)),
    ("hangul", ClassProperty::Script(S::Hangul)),
    ("hebrew", ClassProperty::Script(S::Hebrew)),
    ("hiragana", ClassProperty::Script(S::Hiragana)),
    ("inherited", ClassProperty::Script(S::Inherited)),
    ("kannada", ClassProperty::Script(S::Kannada)),
    ("katakana", ClassProperty::Script(S::Katakana)),
    ("khmer", ClassProperty::Script(S::Khmer)),
    ("l", ClassProperty::Group(G::L)),
    ("lao", ClassProperty::Script(S::Lao)),
    ("latin", ClassProperty::Script(S::Latin)),
    ("ll", ClassProperty::Category(C::Ll)),
    ("lm", ClassProperty::Category(C::Lm)),
    ("lo", ClassProperty::Category(C::Lo)),
    ("lt", ClassProperty::Category(C::Lt)),
    ("lu", ClassProperty::Category(C::Lu)),
    ("m", ClassProperty::Group(G::M)),
    ("malayalam", ClassProperty::Script(S::Malayalam)),
    ("mc", ClassProperty::Category(C::Mc)),
    ("me", ClassProperty::Category(C::Me)),
    ("mn", ClassProperty::Category(C::Mn)),
    ("mongolian", ClassProperty::Script(S::Mongolian)),
    ("myanmar", ClassProperty::Script(S::Myanmar)),
    ("n", ClassProperty::Group(G::N)),
    ("nd", ClassProperty::Category(C::Nd)),
    ("nl", ClassProperty::Category(C::Nl)),
    ("no", ClassProperty::Category(C::No)),
    ("oriya", ClassProperty::Script(S::Oriya)),
    ("p", ClassProperty::Group(G::P)),
    ("pc", ClassProperty::Category(C::Pc)),
    ("pd", ClassProperty::Category(C::Pd)),
    ("pe", ClassProperty::Category(C::Pe)),
    ("pf", ClassProperty::Category(C::Pf)),
    ("pi", ClassProperty::Category(C::Pi)),
    ("po", ClassProperty::Category(C::Po)),
    ("ps", ClassProperty::Category(C::Ps)),
    ("runic", ClassProperty::Script(S::Runic)),
    ("s", ClassProperty::Group(G::S)),
    ("sc", ClassProperty::Category(C::Sc)),
    ("sinhala", ClassProperty::Script(S::Sinhala)),
    ("sk", ClassProperty::Category(C::Sk)),
    ("sm", ClassProperty::Category(C::Sm)),
    ("so", ClassProperty::Category(C::So)),
    ("syriac", ClassProperty::Script(S::Syriac)),
    ("tamil", ClassProperty::Script(S::Tamil)),
    ("telugu", ClassProperty::Script(S::Telugu)),
    ("thaana", ClassProperty::Script(S::Thaana)),
    ("thai", ClassProperty::Script(S::Thai)),
    ("tibetan", ClassProperty::Script(S::Tibetan)),
    ("unknown", ClassProperty::Script(S::Unknown)),
    ("xan", ClassProperty::Alnum),
    ("xps", ClassProperty::Space),
    ("xsp", ClassProperty::Space),
    ("xuc", ClassProperty::Univ),
    ("xwd", ClassProperty::Word),
    ("yi", ClassProperty::Script(S::Yi)),
    ("z", ClassProperty::Group(G::Z)),
    ("zl", ClassProperty::Category(C::Zl)),
    ("zp", ClassProperty::Category(C::Zp)),
    ("zs", ClassProperty::Category(C::Zs)),
];

/// Normalise a property name for loose matching. Returns `None` when the
/// name is too long or carries non-ASCII.
fn normalise(name: &[u8]) -> Option<([u8; 32], usize)> {
    let mut out = [0u8; 32];
    let mut n = 0;
    for &b in name {
        match b {
            b' ' | b'-' | b'_' => continue,
            _ if b.is_ascii_alphanumeric() => {
                if n == 32 {
                    return None;
                }
                out[n] = b.to_ascii_lowercase();
                n += 1;
            }
            _ => return None,
        }
    }
    Some((out, n))
}

/// Resolve a property name (as written between `\p{` and `}`).
pub fn resolve(name: &[u8]) -> Option<ClassProperty> {
    let (key, len) = normalise(name)?;
    let key = &key[..len];
    PROPERTY_NAMES
        .binary_search_by(|(k, _)| k.as_bytes().cmp(key))
        .ok()
        .map(|i| PROPERTY_NAMES[i].1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_sorted() {
        for w in PROPERTY_NAMES.windows(2) {
            assert!(w[0].0 < w[1].0, "out of order at {:?}", w[1].0);
        }
    }

    #[test]
    fn loose_matching() {
        assert_eq!(resolve(b"Greek"), Some(ClassProperty::Script(S::Greek)));
        assert_eq!(resolve(b"g-r_e e-k"), Some(ClassProperty::Script(S::Greek)));
        assert_eq!(resolve(b"LU"), Some(ClassProperty::Category(C::Lu)));
        assert_eq!(resolve(b"Canadian_Aboriginal"),
                   Some(ClassProperty::Script(S::CanadianAboriginal)));
        assert_eq!(resolve(b"L"), Some(ClassProperty::Group(G::L)));
        assert_eq!(resolve(b"Any"), Some(ClassProperty::Any));
        assert_eq!(resolve(b"Xwd"), Some(ClassProperty::Word));
        assert_eq!(resolve(b"NoSuchScript"), None);
        assert_eq!(resolve(b"\xce\xb1"), None);
    }
}
