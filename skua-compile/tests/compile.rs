use skua_asm::error::CompileErrorKind as E;
use skua_asm::op::Op;
use skua_asm::options::{CompileOptions as O, ProgramFlags};
use skua_asm::program::UnitHint;
use skua_compile::{compile_default, CompileContext};
use test_case::test_case;

fn ok(pattern: &str, options: O) -> skua_asm::Program {
    compile_default(pattern.as_bytes(), options).expect("pattern should compile")
}

fn err(pattern: &str, options: O) -> E {
    compile_default(pattern.as_bytes(), options)
        .expect_err("pattern should not compile")
        .kind
}

#[test]
fn trivial_literal_program_shape() {
    let p = ok("abc", O::empty());
    assert_eq!(p.top_bracket, 0);
    assert_eq!(p.min_length, 3);
    assert_eq!(p.code[0], Op::Bra as u8);
    assert_eq!(*p.code.last().unwrap(), Op::End as u8);
    assert_eq!(p.first_unit, Some(UnitHint::Exact(b'a')));
    assert_eq!(p.last_unit, Some(UnitHint::Exact(b'c')));
}

#[test]
fn capture_groups_are_numbered_in_order() {
    let p = ok("(a)(b(c))", O::empty());
    assert_eq!(p.top_bracket, 3);
    // Each group start offset points at a CBra instruction.
    for g in 1..=3u16 {
        let at = p.group_start(g).unwrap();
        assert_eq!(p.code[at], Op::CBra as u8);
    }
}

#[test]
fn named_groups_build_a_sorted_table() {
    let p = ok("(?<year>\\d{4})-(?<month>\\d{2})", O::empty());
    assert_eq!(p.names.len(), 2);
    let names: Vec<&[u8]> = p.names.entries().iter().map(|e| e.name.as_ref()).collect();
    assert_eq!(names, vec![&b"month"[..], b"year"]);
    assert_eq!(p.names.find(b"year")[0].number, 1);
    assert_eq!(p.names.find(b"month")[0].number, 2);
}

#[test]
fn duplicate_names_need_dupnames() {
    assert_eq!(err("(?<a>x)(?<a>y)", O::empty()), E::DuplicateGroupName);
    let p = ok("(?<a>x)(?<a>y)", O::DUPNAMES);
    assert_eq!(p.names.find(b"a").len(), 2);
    assert_eq!(
        p.names.find(b"a").iter().map(|e| e.number).collect::<Vec<_>>(),
        vec![1, 2]
    );
}

#[test]
fn min_length_accounts_for_repeats() {
    assert_eq!(ok("a{3}b?", O::empty()).min_length, 3);
    assert_eq!(ok("(ab|cde)+", O::empty()).min_length, 2);
    assert_eq!(ok("x*", O::empty()).min_length, 0);
    assert!(ok("x*", O::empty()).flags.contains(ProgramFlags::MATCH_EMPTY));
}

#[test]
fn anchoring_analysis() {
    assert!(ok("^foo", O::empty()).flags.contains(ProgramFlags::ANCHORED));
    assert!(ok("\\Afoo", O::empty()).flags.contains(ProgramFlags::ANCHORED));
    assert!(!ok("foo", O::empty()).flags.contains(ProgramFlags::ANCHORED));
    // Multiline ^ restricts starts to line starts without anchoring.
    let p = ok("^foo", O::MULTILINE);
    assert!(!p.flags.contains(ProgramFlags::ANCHORED));
    assert!(p.flags.contains(ProgramFlags::FIRSTLINE_ONLY));
    // Leading .* under DOTALL anchors.
    assert!(ok(".*x", O::DOTALL).flags.contains(ProgramFlags::ANCHORED));
}

#[test]
fn start_bitmap_covers_alternate_first_units() {
    let p = ok("(foo|bar)", O::empty());
    let map = p.start_bitmap.expect("two-branch pattern builds a bitmap");
    let has = |c: u8| map[(c >> 3) as usize] & (1 << (c & 7)) != 0;
    assert!(has(b'f') && has(b'b'));
    assert!(!has(b'x'));
}

#[test]
fn caseless_first_unit_hint() {
    let p = ok("foo", O::CASELESS);
    assert_eq!(p.first_unit, Some(UnitHint::Caseless(b'f')));
}

#[test]
fn auto_possess_rewrites_disjoint_repeat() {
    let p = ok("\\d+x", O::empty());
    assert!(p.code.contains(&(Op::PosPlus as u8)));
    // Not rewritten when the follower overlaps.
    let p = ok("\\d+4", O::empty());
    assert!(!p.code.contains(&(Op::PosPlus as u8)));
    // Respects the off switch.
    let p = ok("\\d+x", O::NO_AUTO_POSSESS);
    assert!(!p.code.contains(&(Op::PosPlus as u8)));
}

#[test]
fn lookbehind_lengths() {
    let p = ok("(?<=abc)x", O::empty());
    assert_eq!(p.max_lookbehind, 3);
    assert_eq!(err("(?<=a*)x", O::empty()), E::LookbehindNotFixed);
    // Bounded variation is allowed and recorded.
    let p = ok("(?<=ab?c)x", O::empty());
    assert_eq!(p.max_lookbehind, 3);
    assert!(p.flags.contains(ProgramFlags::HAS_VARIABLE_LOOKBEHIND));
}

#[test]
fn recursion_targets_are_patched_to_group_starts() {
    let p = ok("(a(?1)?b)", O::empty());
    assert!(p.flags.contains(ProgramFlags::HAS_RECURSE));
    // The single Recurse operand must equal group 1's start offset.
    let g1 = p.group_start(1).unwrap();
    let mut pos = 0;
    let mut found = false;
    while p.code[pos] != Op::End as u8 {
        if p.code[pos] == Op::Recurse as u8 {
            assert_eq!(p.link_size.read(&p.code, pos + 1), g1);
            found = true;
        }
        pos += skua_asm::walk::header_len(&p.code, pos, p.link_size);
    }
    assert!(found);
}

#[test]
fn embedded_limits_are_recorded() {
    let p = ok("(*LIMIT_MATCH=4000)(*LIMIT_DEPTH=200)abc", O::empty());
    assert_eq!(p.limits.match_limit, Some(4000));
    assert_eq!(p.limits.depth_limit, Some(200));
}

#[test]
fn newline_verbs_override_the_context() {
    use skua_asm::options::Newline;
    let p = ok("(*CRLF)a", O::empty());
    assert_eq!(p.newline, Newline::CrLf);
    let p = ok("(*ANYCRLF)a", O::empty());
    assert_eq!(p.newline, Newline::AnyCrlf);
}

#[test_case("\\", E::EndBackslash)]
#[test_case("abc)", E::UnmatchedParenthesis)]
#[test_case("(abc", E::MissingClosingParenthesis)]
#[test_case("[abc", E::MissingSquareBracket)]
#[test_case("*abc", E::NothingToRepeat)]
#[test_case("a{4,2}", E::QuantifierOutOfOrder)]
#[test_case("a{99999}", E::QuantifierTooBig)]
#[test_case("[z-a]", E::ClassRangeOrder)]
#[test_case("\\p{Nope}", E::UnknownProperty)]
#[test_case("\\p{Greek", E::MalformedProperty)]
#[test_case("(?<1a>x)", E::GroupNameFirstChar)]
#[test_case("\\k<missing>x", E::UnknownGroupName)]
#[test_case("\\8", E::UnknownGroupNumber)]
#[test_case("(?(5)a)", E::UnknownGroupNumber)]
#[test_case("(*WAT)", E::UnknownVerb)]
#[test_case("(?C300)", E::CalloutBadNumber)]
#[test_case("[[:wrong:]]", E::UnknownPosixClass)]
#[test_case("[[.ch.]]", E::PosixCollating)]
fn compile_errors(pattern: &str, expect: E) {
    assert_eq!(err(pattern, O::empty()), expect);
}

#[test]
fn error_offsets_point_into_the_pattern() {
    let e = compile_default(b"ab(cd", O::empty()).unwrap_err();
    assert_eq!(e.kind, E::MissingClosingParenthesis);
    assert_eq!(e.offset, 2, "points at the open parenthesis");

    let e = compile_default(b"ab\\q", O::empty()).unwrap_err();
    assert_eq!(e.kind, E::UnsupportedEscape);
    assert_eq!(e.offset, 4, "points just past the escape");
}

#[test]
fn utf_pattern_validation() {
    let bad = [b'a', 0xC3];
    let e = compile_default(&bad, O::UTF).unwrap_err();
    assert!(matches!(e.kind, E::BadPatternUtf(_)));
    assert_eq!(e.offset, 1);
    // Without UTF the bytes are plain literals.
    assert!(compile_default(&bad, O::empty()).is_ok());
}

#[test]
fn never_options_veto() {
    assert_eq!(err("(*UTF)a", O::NEVER_UTF), E::UtfDisabled);
    assert_eq!(err("(*UCP)a", O::NEVER_UCP), E::UcpDisabled);
    assert_eq!(err("a\\Cb", O::NEVER_BACKSLASH_C), E::BackslashCNotAllowed);
}

#[test]
fn literal_mode_compiles_metacharacters_verbatim() {
    let p = ok("a(b)*c", O::LITERAL);
    assert_eq!(p.top_bracket, 0);
    assert_eq!(p.min_length, 6);
}

#[test]
fn inline_options_scope_to_their_group() {
    // Caseless inside the group only: the outer 'a' stays exact.
    let p = ok("a(?i:b)a", O::empty());
    assert_eq!(p.first_unit, Some(UnitHint::Exact(b'a')));
    assert!(p.code.contains(&(Op::CharI as u8)));
}

#[test]
fn extended_mode_strips_whitespace_and_comments() {
    let p = ok("a b # trailing\n c", O::EXTENDED);
    assert_eq!(p.min_length, 3);
}

#[test]
fn quantifier_unrolling_keeps_group_links_sound() {
    // {2,4} on a group with alternation: every ket must link back to a
    // group opener.
    let p = ok("(ab|c){2,4}x", O::empty());
    let link = p.link_size;
    let mut pos = 0;
    while p.code[pos] != Op::End as u8 {
        let op = Op::try_from(p.code[pos]).unwrap();
        if matches!(op, Op::Ket | Op::KetRmax | Op::KetRmin | Op::KetRpos) {
            let back = link.read(&p.code, pos + 1);
            let opener = Op::try_from(p.code[pos - back]).unwrap();
            assert!(opener.is_group_start(), "ket at {pos} links to {opener:?}");
        }
        pos += skua_asm::walk::header_len(&p.code, pos, link);
    }
}

#[test]
fn larger_context_limits_apply() {
    let ctx = CompileContext::new().parens_nest_limit(2);
    let e = skua_compile::compile(b"((((a))))", O::empty(), &ctx).unwrap_err();
    assert_eq!(e.kind, E::NestingTooDeep);
}
