//! Backtracking-control verbs and callouts.

use skua_vm::prelude::*;

fn program(pattern: &str) -> Program {
    compile(
        pattern.as_bytes(),
        CompileOptions::empty(),
        &CompileContext::default(),
    )
    .expect("pattern should compile")
}

fn run(p: &Program, subject: &[u8]) -> (MatchOutcome, MatchData) {
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
    .expect("match should not error");
    (outcome, md)
}

#[test]
fn accept_ends_the_match_early() {
    let p = program("ab(*ACCEPT)cd");
    let (outcome, md) = run(&p, b"abxx");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 2)));
}

#[test]
fn accept_closes_open_captures() {
    let p = program("(ab(*ACCEPT))cd");
    let (outcome, md) = run(&p, b"abxx");
    assert!(outcome.is_match());
    assert_eq!(md.group(1), Some((0, 2)));
}

#[test]
fn fail_forces_the_other_branch() {
    let p = program("a(*FAIL)|b");
    let (outcome, md) = run(&p, b"ab");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((1, 2)));
}

#[test]
fn commit_abandons_the_whole_match() {
    let p = program("a(*COMMIT)b");
    // 'a' at offset 2 would match without the commit at offset 0's 'a'…
    let (outcome, _) = run(&p, b"ac ab");
    assert_eq!(outcome, MatchOutcome::NoMatch);
    let (outcome, _) = run(&program("ab"), b"ac ab");
    assert!(outcome.is_match());
}

#[test]
fn prune_abandons_one_start_position() {
    let p = program("a(*PRUNE)b|.c");
    // Backtracking past the prune abandons the whole attempt at offset 0,
    // remaining alternatives included.
    let (outcome, _) = run(&p, b"ac");
    assert_eq!(outcome, MatchOutcome::NoMatch);

    // The bump-along continues, unlike (*COMMIT).
    let p = program("a(*PRUNE)b");
    let (outcome, md) = run(&p, b"aab");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((1, 3)));
}

#[test]
fn skip_moves_the_restart_point() {
    let p = program("aaa(*SKIP)b");
    // After failing at offset 0, the skip forbids retrying at 1 and 2.
    let (outcome, _) = run(&p, b"aaac aaab");
    assert!(outcome.is_match());
}

#[test]
fn skip_with_unseen_tag_acts_like_plain_skip() {
    let p = program("aaa(*SKIP:T)b");
    let (outcome, _) = run(&p, b"aaac aaab");
    assert!(outcome.is_match());
}

#[test]
fn skip_to_mark() {
    let p = program("a(*MARK:here)a(*SKIP:here)b");
    let (outcome, _) = run(&p, b"aaab");
    assert!(outcome.is_match());
}

#[test]
fn then_takes_the_next_alternative() {
    let p = program("(a(*THEN)b|ac)");
    let (outcome, md) = run(&p, b"ac");
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 2)));
}

#[test]
fn mark_is_reported_on_success_and_failure() {
    let p = program("(*MARK:A)a|(*MARK:B)b");
    let (outcome, md) = run(&p, b"b");
    assert!(outcome.is_match());
    assert_eq!(md.mark(), Some(&b"B"[..]));

    let (outcome, md) = run(&p, b"z");
    assert_eq!(outcome, MatchOutcome::NoMatch);
    assert_eq!(md.mark(), Some(&b"B"[..]), "last mark seen survives failure");
}

#[test]
fn script_runs() {
    let p = compile(
        r"(*sr:\w+)".as_bytes(),
        CompileOptions::UTF | CompileOptions::UCP,
        &CompileContext::default(),
    )
    .unwrap();
    let (outcome, md) = run(&p, "abcλμ".as_bytes());
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 3)), "run truncates at the script switch");

    let (outcome, md) = run(&p, "λμν".as_bytes());
    assert!(outcome.is_match());
    assert_eq!(md.group(0), Some((0, 6)));
}

#[test]
fn atomic_script_run() {
    let p = compile(
        r"(*asr:\w+)x".as_bytes(),
        CompileOptions::UTF | CompileOptions::UCP,
        &CompileContext::default(),
    )
    .unwrap();
    // The atomic wrapper refuses to give back characters, so the trailing
    // x never matches.
    let (outcome, _) = run(&p, b"abcx");
    assert_eq!(outcome, MatchOutcome::NoMatch);
}

#[test]
fn numbered_callouts_fire_in_match_order() {
    let p = program("a(?C1)b(?C2)c");
    let mut seen = Vec::new();
    let mut handler = |block: &CalloutBlock<'_>| {
        seen.push((block.number, block.current_position));
        0
    };
    let mut md = MatchData::for_program(&p);
    let outcome = nfa_match(
        &p,
        b"abc",
        0,
        MatchOptions::empty(),
        &MatchContext::default(),
        Some(&mut handler),
        &mut md,
    )
    .unwrap();
    assert!(outcome.is_match());
    assert_eq!(seen, vec![(1, 1), (2, 2)]);
}

#[test]
fn callout_can_force_backtracking() {
    let p = program("(?C7)a|b");
    let mut fired = 0;
    let mut handler = |_: &CalloutBlock<'_>| {
        fired += 1;
        1 // refuse this path
    };
    let mut md = MatchData::for_program(&p);
    let outcome = nfa_match(
        &p,
        b"b",
        0,
        MatchOptions::empty(),
        &MatchContext::default(),
        Some(&mut handler),
        &mut md,
    )
    .unwrap();
    assert!(outcome.is_match(), "second branch still matches");
    assert_eq!(fired, 1);
}

#[test]
fn callout_abort_surfaces_as_error() {
    let p = program("a(?C1)b");
    let mut handler = |_: &CalloutBlock<'_>| -42;
    let mut md = MatchData::for_program(&p);
    let err = nfa_match(
        &p,
        b"ab",
        0,
        MatchOptions::empty(),
        &MatchContext::default(),
        Some(&mut handler),
        &mut md,
    )
    .unwrap_err();
    assert_eq!(err, MatchError::CalloutAbort(-42));
}

#[test]
fn callouts_can_be_enumerated_from_the_program() {
    let p = program("a(?C7)b(?C\"tag\")c");
    let found = skua_vm::enumerate_callouts(&p);
    assert_eq!(found.len(), 2);
    assert_eq!(found[0].number, 7);
    assert_eq!(found[1].string.map(|(s, d)| (s.to_vec(), d)), Some((b"tag".to_vec(), b'"')));
    assert!(found[0].pattern_offset < found[1].pattern_offset);
}

#[test]
fn string_callouts_deliver_their_text() {
    let p = program("a(?C\"note\")b");
    let mut seen: Option<Vec<u8>> = None;
    let mut handler = |block: &CalloutBlock<'_>| {
        seen = block.string.map(|(s, _)| s.to_vec());
        0
    };
    let mut md = MatchData::for_program(&p);
    nfa_match(
        &p,
        b"ab",
        0,
        MatchOptions::empty(),
        &MatchContext::default(),
        Some(&mut handler),
        &mut md,
    )
    .unwrap();
    assert_eq!(seen.as_deref(), Some(&b"note"[..]));
}

#[test]
fn auto_callout_walks_every_item() {
    let p = compile(
        b"ab",
        CompileOptions::AUTO_CALLOUT,
        &CompileContext::default(),
    )
    .unwrap();
    let mut count = 0;
    let mut handler = |block: &CalloutBlock<'_>| {
        assert_eq!(block.number, 255);
        count += 1;
        0
    };
    let mut md = MatchData::for_program(&p);
    nfa_match(
        &p,
        b"ab",
        0,
        MatchOptions::empty(),
        &MatchContext::default(),
        Some(&mut handler),
        &mut md,
    )
    .unwrap();
    assert_eq!(count, 3, "one per item plus the end-of-pattern callout");
}

#[test]
fn callouts_fire_inside_failing_lookbehinds() {
    let p = program("x(?<=(?C5)zx)");
    let mut fired = 0;
    let mut handler = |_: &CalloutBlock<'_>| {
        fired += 1;
        0
    };
    let mut md = MatchData::for_program(&p);
    let outcome = nfa_match(
        &p,
        b"ax",
        0,
        MatchOptions::empty(),
        &MatchContext::default(),
        Some(&mut handler),
        &mut md,
    )
    .unwrap();
    assert_eq!(outcome, MatchOutcome::NoMatch);
    assert!(fired > 0, "the callout ran even though the assertion failed");
}
