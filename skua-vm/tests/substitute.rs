//! Substitution engine behaviour.

use skua_vm::prelude::*;
use skua_vm::CaseForce;

fn program(pattern: &str, options: CompileOptions) -> Program {
    compile(pattern.as_bytes(), options, &CompileContext::default()).expect("compiles")
}

#[allow(clippy::too_many_arguments)]
fn subst(
    pattern: &str,
    subject: &str,
    replacement: &str,
    options: SubstituteOptions,
) -> Result<(Vec<u8>, usize), SubstituteError> {
    let p = program(pattern, CompileOptions::empty());
    let mut md = MatchData::for_program(&p);
    substitute(
        &p,
        subject.as_bytes(),
        0,
        MatchOptions::empty(),
        options,
        &MatchContext::default(),
        replacement.as_bytes(),
        None,
        &mut md,
        SubstituteHooks::default(),
    )
}

fn subst_ok(pattern: &str, subject: &str, replacement: &str, options: SubstituteOptions) -> (String, usize) {
    let (out, n) = subst(pattern, subject, replacement, options).expect("substitution works");
    (String::from_utf8(out).unwrap(), n)
}

#[test]
fn first_match_only_by_default() {
    let (out, n) = subst_ok("a", "banana", "o", SubstituteOptions::empty());
    assert_eq!(out, "bonana");
    assert_eq!(n, 1);
}

#[test]
fn global_replaces_everything() {
    let (out, n) = subst_ok("a", "banana", "o", SubstituteOptions::GLOBAL);
    assert_eq!(out, "bonono");
    assert_eq!(n, 3);
}

#[test]
fn group_insertions() {
    let (out, _) = subst_ok("(b)(an)", "banana", "$2$1", SubstituteOptions::empty());
    assert_eq!(out, "anbana");
    let (out, _) = subst_ok("(?<x>an)", "banana", "<${x}>", SubstituteOptions::empty());
    assert_eq!(out, "b<an>ana");
    let (out, _) = subst_ok("(an)", "banana", "[$0]", SubstituteOptions::empty());
    assert_eq!(out, "b[an]ana");
}

#[test]
fn dollar_dollar_is_literal() {
    let (out, _) = subst_ok("a", "ab", "$$", SubstituteOptions::empty());
    assert_eq!(out, "$b");
}

#[test]
fn literal_mode_replacement() {
    let (out, _) = subst_ok("an", "banana", "$1\\n", SubstituteOptions::LITERAL);
    assert_eq!(out, "b$1\\nana");
}

#[test]
fn literal_substitution_round_trips() {
    // Replacing every match with the matched text reproduces the subject.
    let p = program(r"\w+", CompileOptions::empty());
    let subject = b"one two three";
    let mut md = MatchData::for_program(&p);
    let (out, n) = substitute(
        &p,
        subject,
        0,
        MatchOptions::empty(),
        SubstituteOptions::GLOBAL,
        &MatchContext::default(),
        b"$0",
        None,
        &mut md,
        SubstituteHooks::default(),
    )
    .unwrap();
    assert_eq!(out, subject);
    assert_eq!(n, 3);
}

#[test]
fn unknown_and_unset_group_policies() {
    assert!(matches!(
        subst("(a)", "abc", "$9", SubstituteOptions::empty()),
        Err(SubstituteError::UnknownGroup(_))
    ));
    assert!(matches!(
        subst("(a)|(b)", "a", "$2", SubstituteOptions::empty()),
        Err(SubstituteError::UnsetGroup(_))
    ));
    let (out, _) = subst("(a)|(b)", "a", "x$2y", SubstituteOptions::UNSET_EMPTY).unwrap();
    assert_eq!(out, b"xy");
    let (out, _) = subst("(a)", "a", "x$9y", SubstituteOptions::UNKNOWN_UNSET | SubstituteOptions::UNSET_EMPTY)
        .unwrap();
    assert_eq!(out, b"xy");
}

#[test]
fn extended_case_forcing() {
    let ext = SubstituteOptions::EXTENDED;
    let (out, _) = subst_ok("(\\w+)", "hello", r"\U$1", ext);
    assert_eq!(out, "HELLO");
    let (out, _) = subst_ok("(\\w+)", "HELLO", r"\L$1", ext);
    assert_eq!(out, "hello");
    let (out, _) = subst_ok("(\\w+)", "hello world", r"\u$1", ext);
    assert_eq!(out, "Hello world");
    let (out, _) = subst_ok("(\\w+)", "hello", r"\U$1\E!", ext);
    assert_eq!(out, "HELLO!");
}

#[test]
fn extended_default_forms() {
    let ext = SubstituteOptions::EXTENDED;
    let (out, _) = subst_ok("(a)|(b)", "a", "${1:+one:two}", ext);
    assert_eq!(out, "one");
    let (out, _) = subst_ok("(a)|(b)", "b", "${1:+one:two}", ext);
    assert_eq!(out, "two");
    let (out, _) = subst_ok("(a)?(b)", "b", "${1:-dflt}", ext);
    assert_eq!(out, "dflt");
    let (out, _) = subst_ok("(a)(b)?", "a", "${1:-dflt}", ext);
    assert_eq!(out, "a");
}

#[test]
fn mark_insertion() {
    let (out, _) = subst_ok("(*MARK:tag)x", "axb", "<${*MARK}>", SubstituteOptions::empty());
    assert_eq!(out, "a<tag>b");
}

#[test]
fn empty_match_advances_without_looping() {
    let (out, n) = subst_ok("x*", "abc", "-", SubstituteOptions::GLOBAL);
    // One empty match before every character and one at the end.
    assert_eq!(out, "-a-b-c-");
    assert_eq!(n, 4);
}

#[test]
fn empty_preferring_pattern_consumes_its_retry_match() {
    // a?? prefers the empty match, but the non-empty retry at the same
    // spot must be used as-is so the scan advances.
    let (out, n) = subst_ok("a??", "aab", "-", SubstituteOptions::GLOBAL);
    assert_eq!(out, "-----b-");
    assert_eq!(n, 6);

    let (out, n) = subst_ok("(?:|b)", "ab", "<$0>", SubstituteOptions::GLOBAL);
    assert_eq!(out, "<>a<><b><>");
    assert_eq!(n, 4);
}

#[test]
fn backslash_is_literal_outside_extended_mode() {
    // The dollar stays special after a literal backslash…
    let (out, _) = subst_ok("a", "ab", r"\$0", SubstituteOptions::empty());
    assert_eq!(out, r"\ab");
    // …and doubled backslashes copy through unchanged.
    let (out, _) = subst_ok("a", "ab", r"x\\y", SubstituteOptions::empty());
    assert_eq!(out, r"x\\yb");
    // A trailing backslash is plain text, not a bad escape.
    let (out, _) = subst_ok("a", "ab", r"z\", SubstituteOptions::empty());
    assert_eq!(out, r"z\b");
}

#[test]
fn replacement_only_output() {
    let (out, n) = subst_ok(
        r"\d+",
        "a1b22c333",
        "[$0]",
        SubstituteOptions::GLOBAL | SubstituteOptions::REPLACEMENT_ONLY,
    );
    assert_eq!(out, "[1][22][333]");
    assert_eq!(n, 3);
}

#[test]
fn overflow_reports_needed_length() {
    let p = program("a", CompileOptions::empty());
    let mut md = MatchData::for_program(&p);
    let err = substitute(
        &p,
        b"aaa",
        0,
        MatchOptions::empty(),
        SubstituteOptions::GLOBAL,
        &MatchContext::default(),
        b"xxxx",
        Some(4),
        &mut md,
        SubstituteHooks::default(),
    )
    .unwrap_err();
    assert_eq!(err, SubstituteError::Overflow { needed: 12 });
}

#[test]
fn substitute_callout_can_skip_and_abort() {
    let p = program(r"\d", CompileOptions::empty());
    let mut md = MatchData::for_program(&p);
    let mut skip_even = |block: &skua_vm::SubstituteBlock<'_>| {
        if block.count % 2 == 0 {
            1
        } else {
            0
        }
    };
    let hooks = SubstituteHooks { callout: Some(&mut skip_even), ..Default::default() };
    let (out, n) = substitute(
        &p,
        b"1 2 3",
        0,
        MatchOptions::empty(),
        SubstituteOptions::GLOBAL,
        &MatchContext::default(),
        b"x",
        None,
        &mut md,
        hooks,
    )
    .unwrap();
    assert_eq!(out, b"x 2 x");
    assert_eq!(n, 2, "the skipped replacement does not count");
}

#[test]
fn custom_case_transform() {
    let p = program("(\\w+)", CompileOptions::empty());
    let mut md = MatchData::for_program(&p);
    let mut rot = |text: &[u8], mode: CaseForce| {
        assert_eq!(mode, CaseForce::Upper);
        text.iter().map(|b| b.wrapping_add(1)).collect::<Vec<u8>>()
    };
    let hooks = SubstituteHooks { case: Some(&mut rot), ..Default::default() };
    let (out, _) = substitute(
        &p,
        b"abc",
        0,
        MatchOptions::empty(),
        SubstituteOptions::EXTENDED,
        &MatchContext::default(),
        b"\\U$1",
        None,
        &mut md,
        hooks,
    )
    .unwrap();
    assert_eq!(out, b"bcd");
}

#[test]
fn start_offset_keeps_the_prefix() {
    let p = program("a", CompileOptions::empty());
    let mut md = MatchData::for_program(&p);
    let (out, n) = substitute(
        &p,
        b"aaa",
        1,
        MatchOptions::empty(),
        SubstituteOptions::empty(),
        &MatchContext::default(),
        b"X",
        None,
        &mut md,
        SubstituteHooks::default(),
    )
    .unwrap();
    assert_eq!(out, b"aXa");
    assert_eq!(n, 1);
}
