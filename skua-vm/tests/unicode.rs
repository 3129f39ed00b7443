//! Unicode behaviour: properties, casing modes, graphemes, extended
//! classes.

use quickcheck_macros::quickcheck;
use skua_vm::prelude::*;

fn program(pattern: &str, options: CompileOptions) -> Program {
    compile(pattern.as_bytes(), options, &CompileContext::default()).expect("compiles")
}

fn program_with(pattern: &str, options: CompileOptions, ctx: &CompileContext) -> Program {
    compile(pattern.as_bytes(), options, ctx).expect("compiles")
}

fn first_match(p: &Program, subject: &[u8]) -> Option<(usize, usize)> {
    let mut md = MatchData::for_program(p);
    let outcome = nfa_match(
        p,
        subject,
        0,
        MatchOptions::empty(),
        &MatchContext::default(),
        None,
        &mut md,
    )
    .expect("no error");
    outcome.is_match().then(|| md.group(0).unwrap())
}

#[test]
fn property_classes() {
    let utf = CompileOptions::UTF | CompileOptions::UCP;
    let p = program(r"\p{L}+", utf);
    assert_eq!(first_match(&p, "abcαβγ!".as_bytes()), Some((0, 9)));

    let p = program(r"\p{Lu}+", utf);
    assert_eq!(first_match(&p, "aABΓd".as_bytes()), Some((1, 5)));

    let p = program(r"\P{N}+", utf);
    assert_eq!(first_match(&p, "ab12".as_bytes()), Some((0, 2)));

    let p = program(r"\p{Han}+", utf);
    assert_eq!(first_match(&p, "x漢字y".as_bytes()), Some((1, 7)));
}

#[test]
fn ucp_changes_word_semantics() {
    let ascii = program(r"\w+", CompileOptions::UTF);
    assert_eq!(first_match(&ascii, "fête".as_bytes()), Some((0, 1)));

    let ucp = program(r"\w+", CompileOptions::UTF | CompileOptions::UCP);
    assert_eq!(first_match(&ucp, "fête".as_bytes()), Some((0, 5)));
}

#[test]
fn property_classes_inside_brackets() {
    let utf = CompileOptions::UTF | CompileOptions::UCP;
    let p = program(r"[\p{Greek}\d]+", utf);
    assert_eq!(first_match(&p, "abα1β2".as_bytes()), Some((2, 8)));
}

#[test]
fn negated_property_class() {
    let utf = CompileOptions::UTF | CompileOptions::UCP;
    let p = program(r"[^\p{L}]+", utf);
    assert_eq!(first_match(&p, "ab -!x".as_bytes()), Some((2, 5)));
}

#[test]
fn grapheme_clusters() {
    let p = program(r"\X", CompileOptions::UTF);
    assert_eq!(first_match(&p, "e\u{301}x".as_bytes()), Some((0, 3)));

    let p = program(r"\X\X", CompileOptions::UTF);
    assert_eq!(first_match(&p, "e\u{301}x".as_bytes()), Some((0, 4)));

    // A regional-indicator pair is one cluster.
    let p = program(r"^\X$", CompileOptions::UTF);
    assert!(first_match(&p, "\u{1F1E6}\u{1F1E7}".as_bytes()).is_some());
}

#[test]
fn turkish_casing_mode() {
    let ctx = CompileContext::default()
        .extra_options(ExtraOptions::TURKISH_CASING);
    let opts = CompileOptions::CASELESS | CompileOptions::UTF;
    let p = program_with("I", opts, &ctx);
    assert!(first_match(&p, "ı".as_bytes()).is_some(), "I folds to dotless i");
    assert!(first_match(&p, b"i").is_none(), "I no longer folds to i");

    let p = program_with("i", opts, &ctx);
    assert!(first_match(&p, "İ".as_bytes()).is_some());
}

#[test]
fn caseless_restrict_blocks_cross_ascii_folds() {
    let ctx = CompileContext::default()
        .extra_options(ExtraOptions::CASELESS_RESTRICT);
    let opts = CompileOptions::CASELESS | CompileOptions::UTF;
    let p = program_with("k", opts, &ctx);
    assert!(first_match(&p, b"K").is_some());
    assert!(first_match(&p, "\u{212A}".as_bytes()).is_none(), "no kelvin fold");
}

#[test]
fn extended_class_algebra() {
    let ctx = CompileContext::default()
        .extra_options(ExtraOptions::ALT_EXTENDED_CLASS);
    let p = program_with("[[a-z]&&[aeiou]]+", CompileOptions::empty(), &ctx);
    assert_eq!(first_match(&p, b"xeaiz"), Some((1, 4)));

    let p = program_with("[[a-z]--[aeiou]]+", CompileOptions::empty(), &ctx);
    assert_eq!(first_match(&p, b"eaxzi"), Some((2, 4)));

    let p = program_with("[[ab]~~[bc]]+", CompileOptions::empty(), &ctx);
    // Symmetric difference: a and c, not b.
    assert_eq!(first_match(&p, b"bacb"), Some((1, 3)));
}

#[test]
fn ascii_extra_options_pin_types_to_ascii() {
    let ctx = CompileContext::default().extra_options(ExtraOptions::ASCII_BSD);
    let opts = CompileOptions::UTF | CompileOptions::UCP;
    let p = program_with(r"\d+", opts, &ctx);
    // Arabic-Indic digits are Nd but ASCII_BSD keeps \d ASCII.
    assert_eq!(first_match(&p, "١٢3".as_bytes()), Some((4, 5)));
}

#[quickcheck]
fn caseless_matches_the_uppercased_subject(word: String) -> bool {
    let word: String = word.chars().filter(|c| c.is_ascii_lowercase()).take(8).collect();
    if word.is_empty() {
        return true;
    }
    let p = program(&word, CompileOptions::CASELESS);
    let upper = word.to_ascii_uppercase();
    first_match(&p, upper.as_bytes()) == Some((0, word.len()))
}

#[quickcheck]
fn matching_is_deterministic(subject: Vec<u8>) -> bool {
    let p = program(r"[ab]+c?", CompileOptions::empty());
    let a = first_match(&p, &subject);
    let b = first_match(&p, &subject);
    a == b
}

#[quickcheck]
fn match_bounds_stay_inside_the_subject(subject: Vec<u8>) -> bool {
    let p = program(r"\w+\s?", CompileOptions::empty());
    match first_match(&p, &subject) {
        None => true,
        Some((s, e)) => s <= e && e <= subject.len(),
    }
}
