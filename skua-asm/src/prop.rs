//! Byte encoding of `\p{…}` property tests for the bytecode stream.

use skua_ucd::{CategoryGroup, ClassProperty, GeneralCategory, Script};

const KIND_ANY: u8 = 0;
const KIND_CATEGORY: u8 = 1;
const KIND_GROUP: u8 = 2;
const KIND_SCRIPT: u8 = 3;
const KIND_ALNUM: u8 = 4;
const KIND_SPACE: u8 = 5;
const KIND_WORD: u8 = 6;
const KIND_UNIV: u8 = 7;

static CATEGORIES: &[GeneralCategory] = &[
    GeneralCategory::Lu, GeneralCategory::Ll, GeneralCategory::Lt,
    GeneralCategory::Lm, GeneralCategory::Lo, GeneralCategory::Mn,
    GeneralCategory::Mc, GeneralCategory::Me, GeneralCategory::Nd,
    GeneralCategory::Nl, GeneralCategory::No, GeneralCategory::Pc,
    GeneralCategory::Pd, GeneralCategory::Ps, GeneralCategory::Pe,
    GeneralCategory::Pi, GeneralCategory::Pf, GeneralCategory::Po,
    GeneralCategory::Sm, GeneralCategory::Sc, GeneralCategory::Sk,
    GeneralCategory::So, GeneralCategory::Zs, GeneralCategory::Zl,
    GeneralCategory::Zp, GeneralCategory::Cc, GeneralCategory::Cf,
    GeneralCategory::Co, GeneralCategory::Cs, GeneralCategory::Cn,
];

static GROUPS: &[CategoryGroup] = &[
    CategoryGroup::L, CategoryGroup::M, CategoryGroup::N,
    CategoryGroup::P, CategoryGroup::S, CategoryGroup::Z, CategoryGroup::C,
];

static SCRIPTS: &[Script] = &[
    Script::Common, Script::Inherited, Script::Unknown, Script::Latin,
    Script::Greek, Script::Coptic, Script::Cyrillic, Script::Armenian,
    Script::Hebrew, Script::Arabic, Script::Syriac, Script::Thaana,
    Script::Devanagari, Script::Bengali, Script::Gurmukhi, Script::Gujarati,
    Script::Oriya, Script::Tamil, Script::Telugu, Script::Kannada,
    Script::Malayalam, Script::Sinhala, Script::Thai, Script::Lao,
    Script::Tibetan, Script::Myanmar, Script::Georgian, Script::Hangul,
    Script::Ethiopic, Script::Cherokee, Script::CanadianAboriginal,
    Script::Runic, Script::Khmer, Script::Mongolian, Script::Hiragana,
    Script::Katakana, Script::Bopomofo, Script::Han, Script::Yi,
    Script::Gothic, Script::Deseret,
];

/// Encode a property test to its `(kind, value)` operand bytes.
pub fn encode(prop: ClassProperty) -> (u8, u8) {
    match prop {
        ClassProperty::Any => (KIND_ANY, 0),
        ClassProperty::Category(c) => {
            let i = CATEGORIES.iter().position(|&x| x == c).unwrap_or(0);
            (KIND_CATEGORY, i as u8)
        }
        ClassProperty::Group(g) => {
            let i = GROUPS.iter().position(|&x| x == g).unwrap_or(0);
            (KIND_GROUP, i as u8)
        }
        ClassProperty::Script(s) => {
            let i = SCRIPTS.iter().position(|&x| x == s).unwrap_or(2);
            (KIND_SCRIPT, i as u8)
        }
        ClassProperty::Alnum => (KIND_ALNUM, 0),
        ClassProperty::Space => (KIND_SPACE, 0),
        ClassProperty::Word => (KIND_WORD, 0),
        ClassProperty::Univ => (KIND_UNIV, 0),
    }
}

/// Decode `(kind, value)` operand bytes back to a property test.
pub fn decode(kind: u8, value: u8) -> ClassProperty {
    match kind {
        KIND_CATEGORY => ClassProperty::Category(
            CATEGORIES.get(value as usize).copied().unwrap_or(GeneralCategory::Cn),
        ),
        KIND_GROUP => ClassProperty::Group(
            GROUPS.get(value as usize).copied().unwrap_or(CategoryGroup::C),
        ),
        KIND_SCRIPT => ClassProperty::Script(
            SCRIPTS.get(value as usize).copied().unwrap_or(Script::Unknown),
        ),
        KIND_ALNUM => ClassProperty::Alnum,
        KIND_SPACE => ClassProperty::Space,
        KIND_WORD => ClassProperty::Word,
        KIND_UNIV => ClassProperty::Univ,
        _ => ClassProperty::Any,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_property_round_trips() {
        let mut props = vec![
            ClassProperty::Any,
            ClassProperty::Alnum,
            ClassProperty::Space,
            ClassProperty::Word,
            ClassProperty::Univ,
        ];
        props.extend(CATEGORIES.iter().map(|&c| ClassProperty::Category(c)));
        props.extend(GROUPS.iter().map(|&g| ClassProperty::Group(g)));
        props.extend(SCRIPTS.iter().map(|&s| ClassProperty::Script(s)));
        for p in props {
            let (k, v) = encode(p);
            assert_eq!(decode(k, v), p);
        }
    }
}
