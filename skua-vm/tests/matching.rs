use skua_vm::prelude::*;
use test_case::test_case;

fn program(pattern: &str, options: CompileOptions) -> Program {
    compile(pattern.as_bytes(), options, &CompileContext::default())
        .expect("pattern should compile")
}

fn run(p: &Program, subject: &[u8]) -> (MatchOutcome, MatchData) {
    run_at(p, subject, 0, MatchOptions::empty())
}

fn run_at(
    p: &Program,
    subject: &[u8],
    start: usize,
    options: MatchOptions,
) -> (MatchOutcome, MatchData) {
    let mut md = MatchData::for_program(p);
    let outcome = nfa_match(p, subject, start, options, &MatchContext::default(), None, &mut md)
        .expect("match should not error");
    (outcome, md)
}

fn find(pattern: &str, subject: &str) -> Option<(usize, usize)> {
    let p = program(pattern, CompileOptions::empty());
    let (outcome, md) = run(&p, subject.as_bytes());
    outcome.is_match().then(|| md.group(0).unwrap())
}

// ---- the six reference scenarios ----------------------------------------

#[test]
fn scenario_alternation_capture() {
    let p = program("a(b|c)d", CompileOptions::empty());
    let (outcome, md) = run(&p, b"acd");
    assert!(outcome.is_match());
    assert_eq!(&md.ovector()[..4], &[0, 3, 1, 2]);
}

#[test]
fn scenario_named_backreference() {
    let p = program(r"(?<x>\d+)-(?P=x)", CompileOptions::empty());
    let (outcome, md) = run(&p, b"12-12");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 5)));
    assert_eq!(md.group(1), Some((0, 2)));
    assert_eq!(
        substring::by_name(&p, &md, b"12-12", b"x").unwrap(),
        b"12"
    );
}

#[test]
fn scenario_catastrophic_pattern_hits_depth_limit() {
    let p = program("(a+)+b", CompileOptions::empty());
    let ctx = MatchContext::default().depth_limit(10);
    let mut md = MatchData::for_program(&p);
    let err = nfa_match(&p, b"aaaaX", 0, MatchOptions::empty(), &ctx, None, &mut md)
        .expect_err("tiny depth limit must trip");
    assert_eq!(err, MatchError::DepthLimit);
}

#[test]
fn scenario_greek_property_run() {
    let p = program(r"\p{Greek}+", CompileOptions::UTF | CompileOptions::UCP);
    let subject = "αβγ123".as_bytes();
    let (outcome, md) = run(&p, subject);
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 6)), "three two-byte Greek letters");
}

#[test]
fn scenario_multiline_anchor() {
    assert_eq!(find("^foo", "barfoo"), None);
    let p = program("^foo", CompileOptions::MULTILINE);
    let (outcome, md) = run(&p, b"bar\nfoo");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((4, 7)));
}

#[test]
fn scenario_swap_substitution() {
    let p = program(r"(\w+) (\w+)", CompileOptions::empty());
    let mut md = MatchData::for_program(&p);
    let (out, count) = substitute(
        &p,
        b"Jane Doe",
        0,
        MatchOptions::empty(),
        SubstituteOptions::GLOBAL,
        &MatchContext::default(),
        b"$2 $1",
        None,
        &mut md,
        SubstituteHooks::default(),
    )
    .unwrap();
    assert_eq!(out, b"Doe Jane");
    assert_eq!(count, 1);
}

// ---- bread-and-butter matching ------------------------------------------

#[test]
fn literal_and_bumpalong() {
    assert_eq!(find("needle", "haystack needle hay"), Some((9, 15)));
    assert_eq!(find("needle", "haystack"), None);
}

#[test_case("a|b|c", "xxc", Some((2, 3)); "third alternative")]
#[test_case("(x|y)z", "ayz", Some((1, 3)); "grouped alternation")]
#[test_case("colou?r", "color", Some((0, 5)); "optional vowel")]
#[test_case("colou?r", "colour", Some((0, 6)); "vowel present")]
#[test_case(r"\d+\.\d+", "pi=3.14!", Some((3, 7)); "decimal number")]
#[test_case(r"\h+", "a \t b", Some((1, 4)); "horizontal space")]
#[test_case(r"\v", "a\x0bb", Some((1, 2)); "vertical space")]
#[test_case("[]x]", "]", Some((0, 1)); "leading bracket is a class member")]
fn table_cases(pattern: &str, subject: &str, expect: Option<(usize, usize)>) {
    assert_eq!(find(pattern, subject), expect);
}

#[test]
fn greedy_lazy_possessive() {
    assert_eq!(find("a+", "aaa"), Some((0, 3)));
    assert_eq!(find("a+?", "aaa"), Some((0, 1)));
    assert_eq!(find("a*+a", "aaa"), None, "possessive repeat gives nothing back");
    assert_eq!(find("(?>a+)a", "aaa"), None, "atomic group gives nothing back");
}

#[test]
fn bounded_repeats() {
    assert_eq!(find("a{2,3}", "aaaa"), Some((0, 3)));
    assert_eq!(find("a{2,3}?", "aaaa"), Some((0, 2)));
    assert_eq!(find("a{4}", "aaa"), None);
    assert_eq!(find("(ab){2}", "ababab"), Some((0, 4)));
    assert_eq!(find("(ab){1,2}c", "ababc"), Some((0, 5)));
}

#[test]
fn group_repeat_captures_last_iteration() {
    let p = program("(a|b)+", CompileOptions::empty());
    let (outcome, md) = run(&p, b"abab");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 4)));
    assert_eq!(md.group(1), Some((3, 4)), "capture keeps the final iteration");
}

#[test]
fn classes_and_ranges() {
    assert_eq!(find("[b-d]+", "abcde"), Some((1, 4)));
    assert_eq!(find("[^b-d]+", "abcde"), Some((0, 1)));
    assert_eq!(find(r"[\d-]+", "a12-3"), Some((1, 5)));
    assert_eq!(find("[[:digit:]]+", "ab123"), Some((2, 5)));
}

#[test]
fn caseless_matching() {
    let p = program("foo", CompileOptions::CASELESS);
    assert!(run(&p, b"FOO").0.is_match());
    assert!(run(&p, b"fOo").0.is_match());

    let p = program("k", CompileOptions::CASELESS | CompileOptions::UTF);
    let kelvin = "\u{212A}";
    assert!(run(&p, kelvin.as_bytes()).0.is_match(), "kelvin sign folds to k");
}

#[test]
fn caseless_class_closure() {
    let p = program("[k]+", CompileOptions::CASELESS | CompileOptions::UTF);
    assert!(run(&p, "K\u{212A}k".as_bytes()).0.is_match());
    let (_, md) = run(&p, "K\u{212A}k".as_bytes());
    assert_eq!(md.group(0), Some((0, 5)), "all three case partners match");
}

#[test]
fn anchors_and_boundaries() {
    assert_eq!(find(r"\bword\b", "a word here"), Some((2, 6)));
    assert_eq!(find(r"\bword\b", "wordy"), None);
    assert_eq!(find(r"\Aab", "ab"), Some((0, 2)));
    assert_eq!(find(r"ab\z", "ab"), Some((0, 2)));
    assert_eq!(find(r"ab\Z", "ab\n"), Some((0, 2)));
    assert_eq!(find(r"ab\z", "ab\n"), None);
}

#[test]
fn dollar_before_final_newline_only() {
    assert_eq!(find("b$", "ab\n"), Some((1, 2)));
    assert_eq!(find("b$", "ab\nc"), None);
    let p = program("b$", CompileOptions::DOLLAR_ENDONLY);
    assert!(!run(&p, b"ab\n").0.is_match());
}

#[test]
fn dotall_and_newlines() {
    assert_eq!(find("a.b", "a\nb"), None);
    let p = program("a.b", CompileOptions::DOTALL);
    assert!(run(&p, b"a\nb").0.is_match());
}

#[test]
fn backslash_r_conventions() {
    let p = program(r"a\Rb", CompileOptions::empty());
    assert!(run(&p, b"a\r\nb").0.is_match());
    assert!(run(&p, b"a\nb").0.is_match());
    let (_, md) = run(&p, b"a\r\nb");
    assert_eq!(md.group(0), Some((0, 4)), "CRLF consumed as one sequence");
}

#[test]
fn lookarounds() {
    assert_eq!(find("foo(?=bar)", "foobar"), Some((0, 3)));
    assert_eq!(find("foo(?=bar)", "foobaz"), None);
    assert_eq!(find("(?<=foo)bar", "foobar"), Some((3, 6)));
    assert_eq!(find("(?<!foo)bar", "xxxbar"), Some((3, 6)));
    assert_eq!(find("(?<!foo)bar", "foobar"), None);
    // Bounded variable lookbehind.
    assert_eq!(find("(?<=ab?)c", "abc"), Some((2, 3)));
    assert_eq!(find("(?<=ab?)c", "ac"), Some((1, 2)));
}

#[test]
fn captures_inside_lookahead_are_kept() {
    let p = program("(?=(ab))a", CompileOptions::empty());
    let (outcome, md) = run(&p, b"ab");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 1)));
    assert_eq!(md.group(1), Some((0, 2)));
}

#[test]
fn backreferences() {
    assert_eq!(find(r"(abc)\1", "abcabc"), Some((0, 6)));
    assert_eq!(find(r"(abc)\1", "abcabd"), None);
    assert_eq!(find(r"(a+)x\1", "aaxaa"), Some((0, 5)));

    let p = program(r"(a)\1", CompileOptions::CASELESS);
    assert!(run(&p, b"aA").0.is_match());
}

#[test]
fn unset_backref_option() {
    let p = program(r"(b)?\1x", CompileOptions::empty());
    assert!(!run(&p, b"x").0.is_match());
    let p = program(r"(b)?\1x", CompileOptions::MATCH_UNSET_BACKREF);
    assert!(run(&p, b"x").0.is_match(), "unset reference matches empty");
}

#[test]
fn duplicate_named_reference_all_unset_matches_empty() {
    let p = program(
        r"(?:(?<n>a)|(?<n>b))?\k<n>x",
        CompileOptions::DUPNAMES | CompileOptions::MATCH_UNSET_BACKREF,
    );
    let (outcome, md) = run(&p, b"x");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 1)));
}

#[test]
fn conditional_groups() {
    let p = program("(a)?(?(1)b|c)", CompileOptions::empty());
    let (outcome, md) = run(&p, b"ab");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 2)));
    let (outcome, md) = run(&p, b"c");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 1)));
}

#[test]
fn conditional_on_assertion() {
    let p = program(r"(?(?=\d)\d+|\w+) ", CompileOptions::empty());
    let (_, md) = run(&p, b"123 ");
    assert_eq!(md.group(0), Some((0, 4)));
    let (_, md) = run(&p, b"abc ");
    assert_eq!(md.group(0), Some((0, 4)));
}

#[test]
fn define_groups_are_skipped() {
    let p = program(r"(?(DEFINE)(?<d>\d))x(?&d)", CompileOptions::empty());
    let (outcome, md) = run(&p, b"x5");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 2)));
}

#[test]
fn recursion_matches_nested_structure() {
    let p = program(r"\((?:[^()]+|(?R))*\)", CompileOptions::empty());
    assert!(run(&p, b"(a(b)c)").0.is_match());
    let (_, md) = run(&p, b"(a(b)c)x");
    assert_eq!(md.group(0), Some((0, 7)));
    assert!(!run(&p, b"(a(b").0.is_match());
}

#[test]
fn subroutine_call() {
    let p = program(r"(\d{2})-(?1)", CompileOptions::empty());
    let (outcome, md) = run(&p, b"12-34");
    assert!(outcome.is_match());
    assert_eq!(md.group(1), Some((0, 2)), "captures revert after the call");
}

#[test]
fn recursion_loop_is_detected() {
    let p = program(r"((?1))", CompileOptions::empty());
    let mut md = MatchData::for_program(&p);
    let err = nfa_match(
        &p,
        b"a",
        0,
        MatchOptions::empty(),
        &MatchContext::default(),
        None,
        &mut md,
    )
    .expect_err("self recursion at one position loops");
    assert_eq!(err, MatchError::RecurseLoop);
}

#[test]
fn empty_match_rules() {
    let p = program("a*", CompileOptions::empty());
    let (outcome, md) = run(&p, b"");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 0)));

    let (outcome, _) = run_at(&p, b"", 0, MatchOptions::NOTEMPTY);
    assert_eq!(outcome, MatchOutcome::NoMatch);
}

#[test]
fn anchored_and_endanchored_options() {
    let p = program("b", CompileOptions::empty());
    let (outcome, _) = run_at(&p, b"abc", 0, MatchOptions::ANCHORED);
    assert_eq!(outcome, MatchOutcome::NoMatch);

    let p = program("a+", CompileOptions::ENDANCHORED);
    let (outcome, _) = run(&p, b"aab");
    assert_eq!(outcome, MatchOutcome::NoMatch);
    let (outcome, md) = run(&p, b"aaa");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 3)));
}

#[test]
fn start_offset_and_bad_offsets() {
    let p = program("a", CompileOptions::empty());
    let (outcome, md) = run_at(&p, b"ba", 1, MatchOptions::empty());
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((1, 2)));

    let mut md = MatchData::for_program(&p);
    let err = nfa_match(
        &p,
        b"a",
        5,
        MatchOptions::empty(),
        &MatchContext::default(),
        None,
        &mut md,
    )
    .unwrap_err();
    assert_eq!(err, MatchError::BadOffset);
}

#[test]
fn utf_subject_validation() {
    let p = program("a", CompileOptions::UTF);
    let mut md = MatchData::for_program(&p);
    let err = nfa_match(
        &p,
        &[b'a', 0xFF],
        0,
        MatchOptions::empty(),
        &MatchContext::default(),
        None,
        &mut md,
    )
    .unwrap_err();
    assert!(matches!(err, MatchError::BadSubjectUtf { offset: 1, .. }));

    let err = nfa_match(
        &p,
        "é".as_bytes(),
        1,
        MatchOptions::empty(),
        &MatchContext::default(),
        None,
        &mut md,
    )
    .unwrap_err();
    assert_eq!(err, MatchError::BadUtfOffset);
}

#[test]
fn match_invalid_utf_finds_valid_fragments() {
    let p = program("ab+", CompileOptions::UTF | CompileOptions::MATCH_INVALID_UTF);
    let mut subject = Vec::from(&b"xx"[..]);
    subject.push(0xFF);
    subject.extend_from_slice(b"abbb");
    let mut md = MatchData::for_program(&p);
    let outcome = nfa_match(
        &p,
        &subject,
        0,
        MatchOptions::empty(),
        &MatchContext::default(),
        None,
        &mut md,
    )
    .unwrap();
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((3, 7)));
}

#[test]
fn partial_matching() {
    let p = program("abcd", CompileOptions::empty());
    let mut md = MatchData::for_program(&p);
    let outcome = nfa_match(
        &p,
        b"xxab",
        0,
        MatchOptions::PARTIAL_SOFT,
        &MatchContext::default(),
        None,
        &mut md,
    )
    .unwrap();
    assert_eq!(outcome, MatchOutcome::Partial);
    assert_eq!(md.ovector()[0], 2);
    assert_eq!(md.ovector()[1], 4);

    // A hard partial beats a shorter full match later in the subject.
    let p = program("dog(sbody)?", CompileOptions::empty());
    let outcome = nfa_match(
        &p,
        b"dogsb",
        0,
        MatchOptions::PARTIAL_HARD,
        &MatchContext::default(),
        None,
        &mut md,
    )
    .unwrap();
    assert_eq!(outcome, MatchOutcome::Partial);

    let outcome = nfa_match(
        &p,
        b"dogsb",
        0,
        MatchOptions::PARTIAL_SOFT,
        &MatchContext::default(),
        None,
        &mut md,
    )
    .unwrap();
    assert_eq!(outcome, MatchOutcome::Match, "soft partial prefers the full match");
}

#[test]
fn match_limit_is_enforced() {
    let p = program("(a|aa)+$", CompileOptions::empty());
    let ctx = MatchContext::default().match_limit(500);
    let mut md = MatchData::for_program(&p);
    let err = nfa_match(
        &p,
        b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaab",
        0,
        MatchOptions::empty(),
        &ctx,
        None,
        &mut md,
    )
    .unwrap_err();
    assert_eq!(err, MatchError::MatchLimit);
}

#[test]
fn offset_limit_needs_compile_option() {
    let p = program("d", CompileOptions::USE_OFFSET_LIMIT);
    let ctx = MatchContext::default().offset_limit(2);
    let mut md = MatchData::for_program(&p);
    let outcome =
        nfa_match(&p, b"abcd", 0, MatchOptions::empty(), &ctx, None, &mut md).unwrap();
    assert_eq!(outcome, MatchOutcome::NoMatch);

    let p = program("d", CompileOptions::empty());
    let err =
        nfa_match(&p, b"abcd", 0, MatchOptions::empty(), &ctx, None, &mut md).unwrap_err();
    assert_eq!(err, MatchError::OffsetLimitNotAllowed);
}

#[test]
fn backslash_c_consumes_one_code_unit() {
    let p = program(r"a\Cc", CompileOptions::UTF);
    // é is two code units; \C eats only the first, so this cannot match…
    assert!(!run(&p, "aéc".as_bytes()).0.is_match());
    // …but a single-unit character in the middle can.
    assert!(run(&p, b"abc").0.is_match());
}

#[test]
fn keep_out_resets_match_start() {
    let p = program(r"foo\Kbar", CompileOptions::empty());
    let (outcome, md) = run(&p, b"foobar");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((3, 6)));
}

#[test]
fn inline_options_scope() {
    let p = program("a(?i:b)c", CompileOptions::empty());
    assert!(run(&p, b"aBc").0.is_match());
    assert!(!run(&p, b"Abc").0.is_match());
    assert!(!run(&p, b"abC").0.is_match());
}

#[test]
fn ungreedy_swaps_quantifiers() {
    let p = program("a+", CompileOptions::UNGREEDY);
    let (_, md) = run(&p, b"aaa");
    assert_eq!(md.group(0), Some((0, 1)));
}

#[test]
fn firstline_restricts_start() {
    let p = program("foo", CompileOptions::FIRSTLINE);
    assert!(!run(&p, b"bar\nfoo").0.is_match());
    assert!(run(&p, b"fo foo\nbar").0.is_match());
}

#[test]
fn no_start_optimize_changes_nothing_observable() {
    for subject in [&b"xxabc"[..], b"", b"ab", b"abc"] {
        let plain = program("abc", CompileOptions::empty());
        let off = program("abc", CompileOptions::NO_START_OPTIMIZE);
        let a = run(&plain, subject).0;
        let b = run(&off, subject).0;
        assert_eq!(a, b, "subject {subject:?}");
    }
}

#[test]
fn leftmost_extent_includes_lookbehind() {
    let p = program("(?<=ab)c", CompileOptions::empty());
    let (outcome, md) = run(&p, b"abc");
    assert!(outcome.is_match());
    assert_eq!(md.leftchar(), 0);
    assert_eq!(md.group(0), Some((2, 3)));
}
