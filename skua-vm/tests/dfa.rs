//! Parallel-state matcher behaviour.

use rstest::rstest;
use skua_vm::dfa;
use skua_vm::prelude::*;

fn program(pattern: &str, options: CompileOptions) -> Program {
    compile(pattern.as_bytes(), options, &CompileContext::default()).expect("compiles")
}

fn run(
    p: &Program,
    subject: &[u8],
    options: MatchOptions,
) -> Result<(MatchOutcome, MatchData), MatchError> {
    let mut md = MatchData::with_pairs(8);
    let mut workspace = [0u32; 128];
    let outcome = dfa_match(
        p,
        subject,
        0,
        options,
        &MatchContext::default(),
        &mut workspace,
        &mut md,
    )?;
    Ok((outcome, md))
}

#[test]
fn finds_all_matches_at_one_position_longest_first() {
    let p = program("foo(bar)?", CompileOptions::empty());
    let (outcome, md) = run(&p, b"foobar", MatchOptions::empty()).unwrap();
    assert!(outcome.is_match());
    assert_eq!(md.ovector()[0..2], [0, 6], "longest first");
    assert_eq!(md.ovector()[2..4], [0, 3]);
    assert_eq!(dfa::match_count(&md), 2);
}

#[test]
fn shortest_option_returns_the_shortest() {
    let p = program("a+", CompileOptions::empty());
    let (outcome, md) = run(&p, b"aaa", MatchOptions::DFA_SHORTEST).unwrap();
    assert!(outcome.is_match());
    assert_eq!(md.ovector()[0..2], [0, 1]);
}

#[test]
fn agrees_with_the_backtracker_on_shared_patterns() {
    for (pattern, subject) in [
        ("a+b", "xaaab"),
        ("[0-9]{2,4}", "abc12345"),
        ("^foo|bar", "xxbar"),
        (r"\bword\b", "a word"),
    ] {
        let p = program(pattern, CompileOptions::empty());
        let (nfa_outcome, nfa_md) = {
            let mut md = MatchData::for_program(&p);
            let o = nfa_match(
                &p,
                subject.as_bytes(),
                0,
                MatchOptions::empty(),
                &MatchContext::default(),
                None,
                &mut md,
            )
            .unwrap();
            (o, md)
        };
        let (dfa_outcome, dfa_md) = run(&p, subject.as_bytes(), MatchOptions::empty()).unwrap();
        assert_eq!(nfa_outcome.is_match(), dfa_outcome.is_match(), "{pattern}");
        if nfa_outcome.is_match() {
            // The backtracker's greedy match is the parallel engine's
            // longest.
            assert_eq!(
                nfa_md.group(0),
                Some((dfa_md.ovector()[0], dfa_md.ovector()[1])),
                "{pattern}"
            );
        }
    }
}

#[test]
fn assertions_are_supported() {
    let p = program(r"foo(?=bar)", CompileOptions::empty());
    let (outcome, md) = run(&p, b"foobar", MatchOptions::empty()).unwrap();
    assert!(outcome.is_match());
    assert_eq!(md.ovector()[0..2], [0, 3]);

    let p = program(r"(?<=a)b", CompileOptions::empty());
    let (outcome, md) = run(&p, b"ab", MatchOptions::empty()).unwrap();
    assert!(outcome.is_match());
    assert_eq!(md.ovector()[0..2], [1, 2]);
}

#[rstest]
#[case(r"(a)\1", "aa")]
#[case(r"a(?R)?", "aa")]
#[case(r"a(*MARK:m)b", "ab")]
#[case(r"a\Kb", "ab")]
fn unsupported_items_are_rejected(#[case] pattern: &str, #[case] subject: &str) {
    let p = program(pattern, CompileOptions::empty());
    let err = run(&p, subject.as_bytes(), MatchOptions::empty()).unwrap_err();
    assert_eq!(err, MatchError::DfaUnsupportedItem);
}

#[test]
fn capture_conditions_are_rejected() {
    let p = program(r"(a)?(?(1)b|c)", CompileOptions::empty());
    let err = run(&p, b"ab", MatchOptions::empty()).unwrap_err();
    assert_eq!(err, MatchError::DfaUnsupportedCondition);
}

#[test]
fn workspace_must_be_large_enough() {
    let p = program("a", CompileOptions::empty());
    let mut md = MatchData::with_pairs(4);
    let mut tiny = [0u32; 4];
    let err = dfa_match(
        &p,
        b"a",
        0,
        MatchOptions::empty(),
        &MatchContext::default(),
        &mut tiny,
        &mut md,
    )
    .unwrap_err();
    assert_eq!(err, MatchError::DfaWorkspaceSize);
}

#[test]
fn partial_and_restart() {
    let p = program("abcd", CompileOptions::empty());
    let mut md = MatchData::with_pairs(4);
    let mut workspace = [0u32; 64];
    let outcome = dfa_match(
        &p,
        b"ab",
        0,
        MatchOptions::PARTIAL_HARD,
        &MatchContext::default(),
        &mut workspace,
        &mut md,
    )
    .unwrap();
    assert_eq!(outcome, MatchOutcome::Partial);

    // Continue with the rest of the data.
    let outcome = dfa_match(
        &p,
        b"cd",
        0,
        MatchOptions::DFA_RESTART,
        &MatchContext::default(),
        &mut workspace,
        &mut md,
    )
    .unwrap();
    assert_eq!(outcome, MatchOutcome::Match);

    // Restarting without a prior partial is refused.
    let mut fresh = [0u32; 64];
    let err = dfa_match(
        &p,
        b"cd",
        0,
        MatchOptions::DFA_RESTART,
        &MatchContext::default(),
        &mut fresh,
        &mut md,
    )
    .unwrap_err();
    assert_eq!(err, MatchError::DfaBadRestart);
}

#[test]
fn no_match_is_an_outcome_not_an_error() {
    let p = program("zzz", CompileOptions::empty());
    let (outcome, _) = run(&p, b"abc", MatchOptions::empty()).unwrap();
    assert_eq!(outcome, MatchOutcome::NoMatch);
}
