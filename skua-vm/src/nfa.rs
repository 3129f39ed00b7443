//! The backtracking matcher.
//!
//! All matching state lives in an explicit heap-resident stack of entries
//! that doubles as the choice-point record and the undo journal; the host
//! call stack never recurses on subject data. Choice entries resume
//! execution at a saved code/subject position; marker entries carry side
//! effects (capture restores, group iteration starts, assertion and
//! recursion frames) that replay while unwinding.

use skua_asm::link::read_u16;
use skua_asm::op::{eclass, xclass, Op};
use skua_asm::options::{Bsr, CompileOptions as O, ExtraOptions as X, MatchOptions as M};
use skua_asm::program::Program;
use skua_asm::{utf, walk, MatchError, UNSET};
use skua_ucd::grapheme::{self, PairState};
use skua_ucd::tables::{CTYPE_DIGIT, CTYPE_SPACE, CTYPE_WORD};
use skua_ucd::{FoldRules, ScriptRun};

use crate::callout::{CalloutBlock, CalloutHandler};
use crate::context::MatchContext;
use crate::match_data::{MatchData, MatchOutcome};

/// Match a subject against a compiled program.
pub fn exec(
    program: &Program,
    subject: &[u8],
    start: usize,
    options: M,
    ctx: &MatchContext,
    mut callout: Option<&mut dyn CalloutHandler>,
    md: &mut MatchData,
) -> Result<MatchOutcome, MatchError> {
    let callout = &mut callout;
    if !program.magic_ok() {
        return Err(MatchError::BadMagic);
    }
    if start > subject.len() {
        return Err(MatchError::BadOffset);
    }
    if ctx.offset_limit.is_some() && !program.options.contains(O::USE_OFFSET_LIMIT) {
        return Err(MatchError::OffsetLimitNotAllowed);
    }
    md.reset();

    let utf_mode = program.options.contains(O::UTF);
    let skip_check = options.contains(M::NO_UTF_CHECK)
        || program.options.contains(O::NO_UTF_CHECK);
    if utf_mode && !skip_check {
        if program.options.contains(O::MATCH_INVALID_UTF) {
            if options.intersects(M::PARTIAL_SOFT | M::PARTIAL_HARD) {
                return Err(MatchError::BadOption);
            }
            return exec_invalid_utf(program, subject, start, options, ctx, callout, md);
        }
        if let Err((error, offset)) = utf::validate(subject) {
            return Err(MatchError::BadSubjectUtf { error, offset });
        }
        if !utf::is_boundary(subject, start) {
            return Err(MatchError::BadUtfOffset);
        }
    }

    let ctx = ctx.effective(program);
    let mut m = Matcher::new(program, subject, subject.len(), start, options, &ctx);
    let outcome = m.run(callout, md)?;
    finish(outcome, subject, options, md);
    Ok(outcome)
}

/// Segment an invalid-UTF subject into maximal valid spans and match each
/// span as its own subject.
fn exec_invalid_utf(
    program: &Program,
    subject: &[u8],
    start: usize,
    options: M,
    ctx: &MatchContext,
    callout: &mut Option<&mut dyn CalloutHandler>,
    md: &mut MatchData,
) -> Result<MatchOutcome, MatchError> {
    let ctx_eff = ctx.effective(program);
    let mut span_start = start;
    while span_start <= subject.len() {
        let span_len = utf::valid_span(subject, span_start);
        let span_end = span_start + span_len;
        if span_len > 0 || span_start == subject.len() {
            let mut m = Matcher::new(program, subject, span_end, span_start, options, &ctx_eff);
            let outcome = m.run(callout, md)?;
            if outcome == MatchOutcome::Match {
                finish(outcome, subject, options, md);
                return Ok(outcome);
            }
        }
        if span_start == subject.len() {
            break;
        }
        span_start = span_end + 1;
    }
    md.outcome = Some(MatchOutcome::NoMatch);
    Ok(MatchOutcome::NoMatch)
}

fn finish(outcome: MatchOutcome, subject: &[u8], options: M, md: &mut MatchData) {
    md.outcome = Some(outcome);
    if outcome == MatchOutcome::Match && options.contains(M::COPY_MATCHED_SUBJECT) {
        md.subject_copy = Some(subject.to_vec());
    }
}

const CHOICE_ENTRY_BYTES: usize = core::mem::size_of::<Entry>();

#[derive(Debug, Clone)]
enum Entry {
    /// Alternation choice: resume in the branch after the `Alt` at
    /// `alt_pos`, chaining the next alternative on entry.
    Branch { opener: u32, alt_pos: u32, pos: usize },
    /// Plain choice point.
    Resume { pc: u32, pos: usize },
    /// Stop-option of a possessive group iteration.
    PosStop { opener: u32, pc: u32, pos: usize },
    /// Lazy single-item repeat: take one more item on backtrack.
    Lazy { item: u32, after: u32, pos: usize, remaining: u32 },
    /// Variable lookbehind: try the next shorter back-step.
    VRev { after: u32, pos0: usize, step: u32, min: u32 },
    /// Choice taken when an assertion condition turns out false.
    CondChoice { pc: u32, pos: usize },
    /// Undo record for one ovector slot.
    OvSave { slot: u32, old: usize },
    /// Undo record for the reported match start (`\K`).
    SomSave { old: usize },
    /// Undo record for the mark list.
    MarkSave { old_len: u32 },
    /// Group iteration record: position at the latest entry.
    Iter { opener: u32, pos: usize },
    /// Recursion frame marker; popping it abandons the recursion.
    RecMark,
    /// Live lookaround frame.
    AssertFrame {
        opener: u32,
        kind: AssertKind,
        restore_pos: usize,
        after: u32,
        cond_below: bool,
    },
    /// Backtracking-verb markers.
    CommitMark,
    PruneMark,
    SkipMark { pos: usize, tag: Option<(u32, u32)> },
    ThenMark { opener: u32 },
    /// A neutralised entry.
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssertKind {
    Pos,
    Neg,
    NonAtomic,
}

#[derive(Debug, Clone)]
struct RecFrame {
    group_start: usize,
    return_pc: usize,
    entry_pos: usize,
    saved_ovec: Vec<usize>,
}

enum AttemptEnd {
    Matched { end: usize },
    Failed,
    /// `(*COMMIT)` forbids further start positions.
    Abandon,
    /// `(*SKIP)` moved the next start position.
    SkipTo { pos: usize },
    /// The subject ended while more input could have matched.
    HardPartial,
}

struct Matcher<'a> {
    prog: &'a Program,
    subject: &'a [u8],
    /// Effective end of the subject (shorter than the buffer when an
    /// invalid-UTF span is being matched).
    end: usize,
    /// The caller's start offset (`\G` anchor).
    start_arg: usize,
    options: M,
    limits: MatchContext,
    utf: bool,
    rules: FoldRules,

    stack: Vec<Entry>,
    ovec: Vec<usize>,
    marks: Vec<(u32, u32, usize)>,
    recursions: Vec<RecFrame>,
    pc: usize,
    pos: usize,
    match_start: usize,
    steps: u32,
    hit_end: bool,
    sticky_mark: Option<(u32, u32)>,
    leftmost: usize,
    rightmost: usize,
}

enum ItemMatch {
    Ok(usize),
    Fail,
    FailEos,
}

impl<'a> Matcher<'a> {
    fn new(
        prog: &'a Program,
        subject: &'a [u8],
        end: usize,
        start: usize,
        options: M,
        limits: &MatchContext,
    ) -> Self {
        Matcher {
            prog,
            subject,
            end,
            start_arg: start,
            options,
            limits: *limits,
            utf: prog.options.contains(O::UTF),
            rules: FoldRules {
                turkish: prog.extra_options.contains(X::TURKISH_CASING),
                ascii_restricted: prog.extra_options.contains(X::CASELESS_RESTRICT),
            },
            stack: Vec::with_capacity(64),
            ovec: vec![UNSET; prog.capture_count() * 2],
            marks: Vec::new(),
            recursions: Vec::new(),
            pc: 0,
            pos: start,
            match_start: start,
            steps: 0,
            hit_end: false,
            sticky_mark: None,
            leftmost: start,
            rightmost: start,
        }
    }

    // ---- the attempt loop --------------------------------------------

    fn run(
        &mut self,
        callout: &mut Option<&mut dyn CalloutHandler>,
        md: &mut MatchData,
    ) -> Result<MatchOutcome, MatchError> {
        let anchored = self.prog.is_anchored() || self.options.contains(M::ANCHORED);
        let partial = self.options.intersects(M::PARTIAL_SOFT | M::PARTIAL_HARD);
        let use_hints =
            !self.prog.options.contains(O::NO_START_OPTIMIZE) && !partial && !anchored;

        let mut cur = self.start_arg;
        let start_limit = self.start_limit();
        let mut soft_partial: Option<usize> = None;

        loop {
            if cur > start_limit {
                break;
            }
            if use_hints && !self.feasible_start(&mut cur, start_limit) {
                break;
            }
            tracing::trace!(start = cur, "match attempt");
            match self.attempt(cur, callout)? {
                AttemptEnd::Matched { end } => {
                    self.write_match(md, end);
                    return Ok(MatchOutcome::Match);
                }
                AttemptEnd::Abandon => break,
                AttemptEnd::HardPartial => {
                    md.ovector[0] = cur;
                    md.ovector[1] = self.end;
                    self.write_extents(md);
                    return Ok(MatchOutcome::Partial);
                }
                AttemptEnd::SkipTo { pos } => {
                    if self.hit_end && soft_partial.is_none() {
                        soft_partial = Some(cur);
                    }
                    cur = pos.max(cur + 1);
                    if anchored {
                        break;
                    }
                }
                AttemptEnd::Failed => {
                    if self.hit_end && soft_partial.is_none() {
                        soft_partial = Some(cur);
                    }
                    if anchored {
                        break;
                    }
                    cur = self.bump(cur);
                }
            }
        }

        self.write_failure_mark(md);
        if let Some(start) = soft_partial {
            if self.options.contains(M::PARTIAL_SOFT) && self.end > start {
                md.ovector[0] = start;
                md.ovector[1] = self.end;
                self.write_extents(md);
                return Ok(MatchOutcome::Partial);
            }
        }
        Ok(MatchOutcome::NoMatch)
    }

    fn start_limit(&self) -> usize {
        let mut limit = self.end;
        if self.prog.options.contains(O::FIRSTLINE) {
            let mut p = self.start_arg;
            while p < self.end {
                if let Some(n) = self.prog.newline.at(self.subject, p, self.utf) {
                    limit = limit.min(p + n - 1);
                    break;
                }
                p += 1;
            }
        }
        if let Some(off) = self.limits.offset_limit {
            limit = limit.min(off);
        }
        limit
    }

    /// Skip start positions ruled out by the compiled hints. Returns false
    /// when no feasible start remains.
    fn feasible_start(&mut self, cur: &mut usize, limit: usize) -> bool {
        if self.prog.min_length as usize > self.end.saturating_sub(*cur) {
            return false;
        }
        if self.prog.flags.contains(skua_asm::ProgramFlags::FIRSTLINE_ONLY) {
            // Only line starts can match.
            while *cur <= limit {
                if *cur == 0 || self.prog.newline.before(self.subject, *cur, self.utf).is_some() {
                    break;
                }
                *cur += 1;
            }
        }
        if let Some(hint) = self.prog.first_unit {
            let want = hint.unit();
            let other = match hint {
                skua_asm::UnitHint::Caseless(u) => skua_ucd::DEFAULT_TABLES.flip[u as usize],
                _ => want,
            };
            while *cur < self.end {
                let b = self.subject[*cur];
                if b == want || b == other {
                    break;
                }
                *cur += 1;
            }
            return *cur <= limit && (*cur < self.end || self.prog.min_length == 0);
        }
        if let Some(map) = &self.prog.start_bitmap {
            while *cur < self.end {
                let b = self.subject[*cur];
                if map[(b >> 3) as usize] & (1 << (b & 7)) != 0 {
                    break;
                }
                *cur += 1;
            }
            return *cur <= limit && (*cur < self.end || self.prog.min_length == 0);
        }
        *cur <= limit
    }

    fn bump(&self, cur: usize) -> usize {
        if cur >= self.end {
            return cur + 1;
        }
        // Step one character, treating CRLF as a unit when the newline
        // convention recognises it.
        if self.subject[cur] == b'\r'
            && self.subject.get(cur + 1) == Some(&b'\n')
            && matches!(
                self.prog.newline,
                skua_asm::Newline::CrLf | skua_asm::Newline::AnyCrlf | skua_asm::Newline::Any
            )
        {
            return cur + 2;
        }
        if self.utf {
            let (_, n) = utf::decode(self.subject, cur);
            cur + n
        } else {
            cur + 1
        }
    }

    fn write_match(&mut self, md: &mut MatchData, end: usize) {
        let pairs = md.pair_count().min(self.ovec.len() / 2);
        for i in 0..pairs * 2 {
            md.ovector[i] = self.ovec[i];
        }
        md.ovector[0] = self.match_start;
        md.ovector[1] = end;
        md.mark = self.marks.last().map(|&(off, len, _)| {
            self.prog.code[off as usize..(off + len) as usize].to_vec()
        });
        self.write_extents(md);
    }

    fn write_extents(&mut self, md: &mut MatchData) {
        md.leftchar = self.leftmost;
        md.rightchar = self.rightmost.max(self.pos);
    }

    fn write_failure_mark(&self, md: &mut MatchData) {
        if let Some((off, len)) = self.sticky_mark {
            md.mark = Some(self.prog.code[off as usize..(off + len) as usize].to_vec());
        }
    }

    // ---- one attempt --------------------------------------------------

    fn attempt(
        &mut self,
        start: usize,
        callout: &mut Option<&mut dyn CalloutHandler>,
    ) -> Result<AttemptEnd, MatchError> {
        self.stack.clear();
        self.marks.clear();
        self.recursions.clear();
        for slot in &mut self.ovec {
            *slot = UNSET;
        }
        self.pc = 0;
        self.pos = start;
        self.match_start = start;
        self.hit_end = false;
        self.leftmost = self.leftmost.min(start);

        let prog = self.prog;
        let code: &[u8] = &prog.code;
        let link = self.prog.link_size;
        let lw = link.width();

        macro_rules! fail {
            () => {
                match self.backtrack()? {
                    BtOutcome::Resumed => continue,
                    BtOutcome::Exhausted => return Ok(AttemptEnd::Failed),
                    BtOutcome::Commit => return Ok(AttemptEnd::Abandon),
                    BtOutcome::Prune => return Ok(AttemptEnd::Failed),
                    BtOutcome::Skip { pos } => return Ok(AttemptEnd::SkipTo { pos }),
                }
            };
        }
        // A hard partial triggers the moment the subject runs out while
        // more of the pattern could still match.
        macro_rules! fail_eos {
            () => {{
                self.hit_end = true;
                if self.options.contains(M::PARTIAL_HARD) && self.end > start {
                    return Ok(AttemptEnd::HardPartial);
                }
                fail!();
            }};
        }

        loop {
            self.steps += 1;
            if self.steps > self.limits.match_limit {
                return Err(MatchError::MatchLimit);
            }
            self.rightmost = self.rightmost.max(self.pos);
            let op = Op::try_from(code[self.pc])
                .map_err(|_| MatchError::Internal("unknown opcode"))?;
            tracing::trace!(pc = self.pc, pos = self.pos, ?op, "dispatch");
            match op {
                Op::End => {
                    // Whole-pattern success, subject to the empty-match
                    // and end-anchor rules.
                    if self.options.contains(M::ENDANCHORED)
                        || self.prog.options.contains(O::ENDANCHORED)
                    {
                        if self.pos != self.end {
                            fail!();
                        }
                    }
                    if self.pos == self.match_start {
                        let refuse = self.options.contains(M::NOTEMPTY)
                            || (self.options.contains(M::NOTEMPTY_ATSTART)
                                && self.match_start == self.start_arg);
                        if refuse {
                            fail!();
                        }
                    }
                    return Ok(AttemptEnd::Matched { end: self.pos });
                }

                // ---- single-character items and their repeats ----
                Op::Char | Op::CharI | Op::Not | Op::NotI | Op::AnyNoNl | Op::AllAny
                | Op::AnyByte | Op::Digit | Op::NotDigit | Op::Whitespace
                | Op::NotWhitespace | Op::WordChar | Op::NotWordChar | Op::HSpace
                | Op::NotHSpace | Op::VSpace | Op::NotVSpace | Op::AnyNewline | Op::ExtUni
                | Op::Prop | Op::NotProp | Op::Class | Op::NClass | Op::XClass
                | Op::EClass => match self.match_item(self.pc, self.pos) {
                    ItemMatch::Ok(np) => {
                        self.pos = np;
                        self.pc += walk::header_len(code, self.pc, link);
                    }
                    ItemMatch::FailEos => fail_eos!(),
                    ItemMatch::Fail => fail!(),
                },

                Op::Star | Op::Plus | Op::Upto | Op::Query | Op::Exact | Op::PosStar
                | Op::PosPlus | Op::PosUpto | Op::PosQuery => {
                    let header = walk::header_len(code, self.pc, link);
                    let item = self.pc + header;
                    let after = self.pc + walk::item_len(code, self.pc, link);
                    let (min, max) = match op {
                        Op::Star | Op::PosStar => (0, u32::MAX),
                        Op::Plus | Op::PosPlus => (1, u32::MAX),
                        Op::Query | Op::PosQuery => (0, 1),
                        Op::Upto | Op::PosUpto => (0, read_u16(code, self.pc + 1) as u32),
                        _ => {
                            let n = read_u16(code, self.pc + 1) as u32;
                            (n, n)
                        }
                    };
                    let possessive = matches!(op, Op::PosStar | Op::PosPlus | Op::PosUpto
                        | Op::PosQuery);
                    let mut count = 0u32;
                    let mut ok = true;
                    let mut eos = false;
                    while count < min {
                        match self.match_item(item, self.pos) {
                            ItemMatch::Ok(np) => {
                                self.pos = np;
                                count += 1;
                            }
                            ItemMatch::FailEos => {
                                ok = false;
                                eos = true;
                                break;
                            }
                            ItemMatch::Fail => {
                                ok = false;
                                break;
                            }
                        }
                    }
                    if !ok {
                        if eos {
                            fail_eos!();
                        }
                        fail!();
                    }
                    while count < max {
                        match self.match_item(item, self.pos) {
                            ItemMatch::Ok(np) => {
                                if !possessive {
                                    self.push(Entry::Resume { pc: after as u32, pos: self.pos })?;
                                }
                                self.pos = np;
                                count += 1;
                            }
                            ItemMatch::FailEos => {
                                self.hit_end = true;
                                if self.options.contains(M::PARTIAL_HARD) && self.end > start {
                                    return Ok(AttemptEnd::HardPartial);
                                }
                                break;
                            }
                            ItemMatch::Fail => break,
                        }
                    }
                    self.pc = after;
                }

                Op::MinStar | Op::MinPlus | Op::MinUpto | Op::MinQuery => {
                    let header = walk::header_len(code, self.pc, link);
                    let item = self.pc + header;
                    let after = self.pc + walk::item_len(code, self.pc, link);
                    let (min, max) = match op {
                        Op::MinStar => (0, u32::MAX),
                        Op::MinPlus => (1, u32::MAX),
                        Op::MinQuery => (0, 1),
                        _ => (0, read_u16(code, self.pc + 1) as u32),
                    };
                    let mut ok = true;
                    let mut eos = false;
                    for _ in 0..min {
                        match self.match_item(item, self.pos) {
                            ItemMatch::Ok(np) => self.pos = np,
                            ItemMatch::FailEos => {
                                ok = false;
                                eos = true;
                                break;
                            }
                            ItemMatch::Fail => {
                                ok = false;
                                break;
                            }
                        }
                    }
                    if !ok {
                        if eos {
                            fail_eos!();
                        }
                        fail!();
                    }
                    if max > min {
                        self.push(Entry::Lazy {
                            item: item as u32,
                            after: after as u32,
                            pos: self.pos,
                            remaining: max - min,
                        })?;
                    }
                    self.pc = after;
                }

                // ---- anchors and zero-width assertions ----
                Op::Circ => {
                    if self.pos != 0 || self.options.contains(M::NOTBOL) {
                        fail!();
                    }
                    self.pc += 1;
                }
                Op::CircM => {
                    let at_start = self.pos == 0 && !self.options.contains(M::NOTBOL);
                    let after_nl = self
                        .prog
                        .newline
                        .before(self.subject, self.pos, self.utf)
                        .is_some()
                        && (self.pos < self.end
                            || self.prog.options.contains(O::ALT_CIRCUMFLEX));
                    if !(at_start || after_nl) {
                        fail!();
                    }
                    self.pc += 1;
                }
                Op::Dollar => {
                    let at_end = self.pos == self.end && !self.options.contains(M::NOTEOL);
                    let before_final_nl = !self.prog.options.contains(O::DOLLAR_ENDONLY)
                        && !self.options.contains(M::NOTEOL)
                        && self
                            .prog
                            .newline
                            .at(self.subject, self.pos, self.utf)
                            .map_or(false, |n| self.pos + n == self.end);
                    if !(at_end || before_final_nl) {
                        if self.pos == self.end {
                            self.hit_end = true;
                        }
                        fail!();
                    }
                    self.pc += 1;
                }
                Op::DollarM => {
                    let at_end = self.pos == self.end && !self.options.contains(M::NOTEOL);
                    let before_nl = self
                        .prog
                        .newline
                        .at(self.subject, self.pos, self.utf)
                        .is_some()
                        && !self.mid_crlf(self.pos);
                    if !(at_end || before_nl) {
                        fail!();
                    }
                    self.pc += 1;
                }
                Op::Sod => {
                    if self.pos != 0 {
                        fail!();
                    }
                    self.pc += 1;
                }
                Op::Som => {
                    if self.pos != self.start_arg {
                        fail!();
                    }
                    self.pc += 1;
                }
                Op::Eod => {
                    if self.pos != self.end {
                        fail!();
                    }
                    self.pc += 1;
                }
                Op::Eodn => {
                    let ok = self.pos == self.end
                        || self
                            .prog
                            .newline
                            .at(self.subject, self.pos, self.utf)
                            .map_or(false, |n| self.pos + n == self.end);
                    if !ok {
                        fail!();
                    }
                    self.pc += 1;
                }
                Op::WordBoundary | Op::NotWordBoundary => {
                    let before = self.pos > 0 && {
                        let (cp, _) = self.char_before(self.pos);
                        self.is_word_cp(cp)
                    };
                    let here = self.pos < self.end && {
                        let (cp, _) = self.char_at(self.pos);
                        self.is_word_cp(cp)
                    };
                    let boundary = before != here;
                    if boundary != (op == Op::WordBoundary) {
                        fail!();
                    }
                    self.pc += 1;
                }
                Op::SetSom => {
                    self.push(Entry::SomSave { old: self.match_start })?;
                    self.match_start = self.pos;
                    self.pc += 1;
                }

                // ---- groups ----
                Op::Bra | Op::CBra | Op::BraPos | Op::CBraPos | Op::Once | Op::ScriptRun
                | Op::Cond => {
                    self.enter_group(op)?;
                }
                Op::BraZero => {
                    let after = walk::skip_group(code, self.pc + 1, link);
                    self.push(Entry::Resume { pc: after as u32, pos: self.pos })?;
                    self.pc += 1;
                }
                Op::BraMinZero => {
                    let group = self.pc + 1;
                    self.push(Entry::Resume { pc: group as u32, pos: self.pos })?;
                    self.pc = walk::skip_group(code, group, link);
                }
                Op::SkipZero => {
                    self.pc = walk::skip_group(code, self.pc + 1, link);
                }
                Op::Assert | Op::AssertNot | Op::NaAssert | Op::AssertBack
                | Op::AssertBackNot | Op::NaAssertBack => {
                    let after = walk::skip_group(code, self.pc, link) as u32;
                    let kind = match op {
                        Op::Assert | Op::AssertBack => AssertKind::Pos,
                        Op::AssertNot | Op::AssertBackNot => AssertKind::Neg,
                        _ => AssertKind::NonAtomic,
                    };
                    let cond_below =
                        matches!(self.stack.last(), Some(Entry::CondChoice { .. }));
                    let opener = self.pc as u32;
                    self.push(Entry::AssertFrame {
                        opener,
                        kind,
                        restore_pos: self.pos,
                        after,
                        cond_below,
                    })?;
                    // Alternation choice for the assertion's branches.
                    let target = self.pc + link.read(code, self.pc + 1);
                    if code[target] == Op::Alt as u8 {
                        self.push(Entry::Branch {
                            opener,
                            alt_pos: target as u32,
                            pos: self.pos,
                        })?;
                    }
                    self.pc += 1 + lw;
                }
                Op::Reverse => {
                    let n = read_u16(code, self.pc + 1) as usize;
                    match self.step_back(self.pos, n) {
                        Some(np) => {
                            self.pos = np;
                            self.leftmost = self.leftmost.min(np);
                            self.pc += 3;
                        }
                        None => fail!(),
                    }
                }
                Op::VReverse => {
                    let min = read_u16(code, self.pc + 1) as u32;
                    let max = read_u16(code, self.pc + 3) as u32;
                    let after = self.pc + 5;
                    let pos0 = self.pos;
                    // Longest feasible step first.
                    let mut step = max;
                    let np = loop {
                        match self.step_back(pos0, step as usize) {
                            Some(np) => break Some(np),
                            None if step > min => step -= 1,
                            None => break None,
                        }
                    };
                    match np {
                        Some(np) => {
                            if step > min {
                                self.push(Entry::VRev {
                                    after: after as u32,
                                    pos0,
                                    step: step - 1,
                                    min,
                                })?;
                            }
                            self.pos = np;
                            self.leftmost = self.leftmost.min(np);
                            self.pc = after;
                        }
                        None => fail!(),
                    }
                }

                Op::Alt => {
                    // Reached the end of a branch: continue at the group's
                    // closing ket.
                    let mut p = self.pc;
                    loop {
                        p += link.read(code, p + 1);
                        if code[p] != Op::Alt as u8 {
                            break;
                        }
                    }
                    self.pc = p;
                }

                Op::Ket | Op::KetRmax | Op::KetRmin | Op::KetRpos => {
                    match self.close_group(op)? {
                        Flow::Continue => {}
                        Flow::Backtrack => fail!(),
                    }
                }

                // ---- references and calls ----
                Op::Ref | Op::RefI | Op::DnRef | Op::DnRefI => {
                    let caseless = matches!(op, Op::RefI | Op::DnRefI);
                    let group = match op {
                        Op::Ref | Op::RefI => Some(read_u16(code, self.pc + 1)),
                        _ => {
                            let first = read_u16(code, self.pc + 1) as usize;
                            let count = read_u16(code, self.pc + 3) as usize;
                            self.prog.names.entries()[first..first + count]
                                .iter()
                                .map(|e| e.number)
                                .find(|&g| self.group_set(g))
                        }
                    };
                    let next = self.pc + walk::header_len(code, self.pc, link);
                    match self.match_backref(group, caseless) {
                        ItemMatch::Ok(np) => {
                            self.pos = np;
                            self.pc = next;
                        }
                        ItemMatch::FailEos => fail_eos!(),
                        ItemMatch::Fail => fail!(),
                    }
                }
                Op::Recurse => {
                    let target = link.read(code, self.pc + 1);
                    if !self.options.contains(M::DISABLE_RECURSELOOP_CHECK)
                        && self
                            .recursions
                            .iter()
                            .any(|f| f.group_start == target && f.entry_pos == self.pos)
                    {
                        return Err(MatchError::RecurseLoop);
                    }
                    if self.recursions.len() as u32 >= self.limits.depth_limit {
                        return Err(MatchError::DepthLimit);
                    }
                    self.recursions.push(RecFrame {
                        group_start: target,
                        return_pc: self.pc + 1 + lw,
                        entry_pos: self.pos,
                        saved_ovec: self.ovec.clone(),
                    });
                    self.push(Entry::RecMark)?;
                    self.pc = target;
                }
                Op::Close => {
                    let g = read_u16(code, self.pc + 1) as usize;
                    self.push(Entry::OvSave { slot: (2 * g + 1) as u32, old: self.ovec[2 * g + 1] })?;
                    self.ovec[2 * g + 1] = self.pos;
                    self.pc += 3;
                }

                // ---- control verbs ----
                Op::Accept => match self.accept()? {
                    Flow::Continue => {}
                    Flow::Backtrack => fail!(),
                },
                Op::Fail => fail!(),
                Op::Mark => {
                    let len = code[self.pc + 1] as u32;
                    let off = (self.pc + 2) as u32;
                    self.set_mark(off, len)?;
                    self.pc += 2 + len as usize;
                }
                Op::Commit => {
                    self.push(Entry::CommitMark)?;
                    self.pc += 1;
                }
                Op::CommitArg => {
                    let len = code[self.pc + 1] as u32;
                    let off = (self.pc + 2) as u32;
                    self.set_mark(off, len)?;
                    self.push(Entry::CommitMark)?;
                    self.pc += 2 + len as usize;
                }
                Op::Prune => {
                    self.push(Entry::PruneMark)?;
                    self.pc += 1;
                }
                Op::PruneArg => {
                    let len = code[self.pc + 1] as u32;
                    let off = (self.pc + 2) as u32;
                    self.set_mark(off, len)?;
                    self.push(Entry::PruneMark)?;
                    self.pc += 2 + len as usize;
                }
                Op::Skip => {
                    self.push(Entry::SkipMark { pos: self.pos, tag: None })?;
                    self.pc += 1;
                }
                Op::SkipArg => {
                    let len = code[self.pc + 1] as u32;
                    let off = (self.pc + 2) as u32;
                    self.push(Entry::SkipMark { pos: self.pos, tag: Some((off, len)) })?;
                    self.pc += 2 + len as usize;
                }
                Op::Then => {
                    let opener = self.enclosing_group();
                    self.push(Entry::ThenMark { opener })?;
                    self.pc += 1;
                }
                Op::ThenArg => {
                    let len = code[self.pc + 1] as u32;
                    let off = (self.pc + 2) as u32;
                    self.set_mark(off, len)?;
                    let opener = self.enclosing_group();
                    self.push(Entry::ThenMark { opener })?;
                    self.pc += 2 + len as usize;
                }

                // ---- callouts ----
                Op::Callout => {
                    let number = code[self.pc + 1];
                    let pat_off = read_u16(code, self.pc + 2) as usize;
                    let next = self.pc + 6;
                    match self.fire_callout(callout, number, pat_off, None)? {
                        Flow::Continue => self.pc = next,
                        Flow::Backtrack => fail!(),
                    }
                }
                Op::CalloutStr => {
                    let total = walk::header_len(code, self.pc, link);
                    let delim = code[self.pc + 1 + lw];
                    let pat_off = read_u16(code, self.pc + 2 + lw) as usize;
                    let str_start = self.pc + 4 + lw;
                    let string = (str_start, self.pc + total, delim);
                    match self.fire_callout(callout, 0, pat_off, Some(string))? {
                        Flow::Continue => self.pc += total,
                        Flow::Backtrack => fail!(),
                    }
                }

                // Condition tests execute only through `enter_group`.
                Op::Cref | Op::DnCref | Op::RRef | Op::DnRRef | Op::False | Op::True => {
                    return Err(MatchError::Internal("condition outside a group"));
                }
                _ => return Err(MatchError::Internal("unknown opcode")),
            }
        }
    }

    // ---- group machinery ---------------------------------------------

    fn enter_group(&mut self, op: Op) -> Result<(), MatchError> {
        let prog = self.prog;
        let code: &[u8] = &prog.code;
        let link = self.prog.link_size;
        let lw = link.width();
        let opener = self.pc as u32;
        let header = walk::header_len(code, self.pc, link);

        if op == Op::Cond {
            return self.enter_cond(header);
        }

        self.push(Entry::Iter { opener, pos: self.pos })?;
        let target = self.pc + link.read(code, self.pc + 1);
        if code[target] == Op::Alt as u8 {
            self.push(Entry::Branch { opener, alt_pos: target as u32, pos: self.pos })?;
        }
        if matches!(op, Op::CBra | Op::CBraPos) {
            let g = read_u16(code, self.pc + 1 + lw) as usize;
            self.push(Entry::OvSave { slot: (2 * g) as u32, old: self.ovec[2 * g] })?;
            self.push(Entry::OvSave { slot: (2 * g + 1) as u32, old: self.ovec[2 * g + 1] })?;
            self.ovec[2 * g] = self.pos;
            self.ovec[2 * g + 1] = UNSET;
        }
        self.pc += header;
        Ok(())
    }

    fn enter_cond(&mut self, header: usize) -> Result<(), MatchError> {
        let prog = self.prog;
        let code: &[u8] = &prog.code;
        let link = self.prog.link_size;
        let lw = link.width();
        let opener = self.pc as u32;
        let group_pc = self.pc;

        self.push(Entry::Iter { opener, pos: self.pos })?;
        // Where the no-branch begins: just after the Alt, or, with a
        // single branch, just past the ket (the two share a layout).
        let target = group_pc + link.read(code, group_pc + 1);
        let else_pc = target + 1 + lw;

        let cond_pc = group_pc + header;
        let cond_op = Op::try_from(code[cond_pc])
            .map_err(|_| MatchError::Internal("unknown opcode"))?;
        let truth = match cond_op {
            Op::Cref => {
                let g = read_u16(code, cond_pc + 1);
                Some(self.group_set(g))
            }
            Op::DnCref => {
                let first = read_u16(code, cond_pc + 1) as usize;
                let count = read_u16(code, cond_pc + 3) as usize;
                Some(
                    self.prog.names.entries()[first..first + count]
                        .iter()
                        .any(|e| self.group_set(e.number)),
                )
            }
            Op::RRef => {
                let g = read_u16(code, cond_pc + 1);
                Some(match self.recursions.last() {
                    None => false,
                    Some(f) => {
                        g == u16::MAX || {
                            let target_start = self.prog.group_start(g);
                            target_start == Some(f.group_start)
                        }
                    }
                })
            }
            Op::DnRRef => {
                let first = read_u16(code, cond_pc + 1) as usize;
                let count = read_u16(code, cond_pc + 3) as usize;
                Some(match self.recursions.last() {
                    None => false,
                    Some(f) => self.prog.names.entries()[first..first + count]
                        .iter()
                        .any(|e| self.prog.group_start(e.number) == Some(f.group_start)),
                })
            }
            Op::False => Some(false),
            Op::True => Some(true),
            _ => None,
        };

        match truth {
            Some(true) => {
                let skip = walk::header_len(code, cond_pc, link);
                self.pc = cond_pc + skip;
            }
            Some(false) => {
                self.pc = else_pc;
            }
            None => {
                // Assertion condition: a false outcome resumes at the
                // no-branch through this choice entry.
                self.push(Entry::CondChoice { pc: else_pc as u32, pos: self.pos })?;
                self.pc = cond_pc;
            }
        }
        Ok(())
    }

    /// Handle a ket. Returns whether to continue or to backtrack.
    fn close_group(&mut self, ket: Op) -> Result<Flow, MatchError> {
        let prog = self.prog;
        let code: &[u8] = &prog.code;
        let link = self.prog.link_size;
        let lw = link.width();
        let back = link.read(code, self.pc + 1);
        let opener_pos = self.pc - back;
        let opener = Op::try_from(code[opener_pos])
            .map_err(|_| MatchError::Internal("unknown opcode"))?;
        let after = self.pc + 1 + lw;

        // A recursion returns at the ket of its target group.
        if let Some(frame) = self.recursions.last() {
            if frame.group_start == opener_pos {
                let frame = self.recursions.pop().expect("frame exists");
                self.void_choices_above_recmark();
                self.ovec.copy_from_slice(&frame.saved_ovec);
                self.pc = frame.return_pc;
                return Ok(Flow::Continue);
            }
        }

        // Assertion completion.
        if opener.is_assertion() {
            return self.complete_assertion(opener_pos);
        }

        // Captures close before any repeat decision.
        if matches!(opener, Op::CBra | Op::CBraPos) {
            let g = read_u16(code, opener_pos + 1 + lw) as usize;
            self.push(Entry::OvSave { slot: (2 * g + 1) as u32, old: self.ovec[2 * g + 1] })?;
            self.ovec[2 * g + 1] = self.pos;
        }

        // Script runs verify their span at every completion.
        if opener == Op::ScriptRun {
            let start = self
                .find_iter(opener_pos as u32)
                .ok_or(MatchError::Internal("script run without entry"))?;
            if !self.script_run_ok(start, self.pos) {
                return Ok(Flow::Backtrack);
            }
        }

        // Atomic groups cut their internal choices when they complete.
        if opener == Op::Once {
            let idx = self
                .find_iter_index(opener_pos as u32)
                .ok_or(MatchError::Internal("atomic group without entry"))?;
            self.void_choices_above(idx);
        }

        match ket {
            Op::Ket => {
                self.pc = after;
                Ok(Flow::Continue)
            }
            Op::KetRmax | Op::KetRmin => {
                let iter_pos = self
                    .find_iter(opener_pos as u32)
                    .ok_or(MatchError::Internal("repeat without entry"))?;
                if self.pos == iter_pos {
                    // An empty iteration ends the loop.
                    self.pc = after;
                    return Ok(Flow::Continue);
                }
                if ket == Op::KetRmax {
                    self.push(Entry::Resume { pc: after as u32, pos: self.pos })?;
                    self.pc = opener_pos;
                } else {
                    self.push(Entry::Resume { pc: opener_pos as u32, pos: self.pos })?;
                    self.pc = after;
                }
                Ok(Flow::Continue)
            }
            Op::KetRpos => {
                let idx = self
                    .find_iter_index(opener_pos as u32)
                    .ok_or(MatchError::Internal("repeat without entry"))?;
                let iter_pos = match self.stack[idx] {
                    Entry::Iter { pos, .. } => pos,
                    _ => unreachable!("find_iter_index returns Iter"),
                };
                self.void_choices_above(idx);
                // Drop the previous iteration's stop entry: a committed
                // iteration is never given back.
                if idx > 0 {
                    if let Entry::PosStop { opener: o, .. } = self.stack[idx - 1] {
                        if o == opener_pos as u32 {
                            self.stack[idx - 1] = Entry::Void;
                        }
                    }
                }
                if self.pos == iter_pos {
                    self.pc = after;
                    return Ok(Flow::Continue);
                }
                self.push(Entry::PosStop {
                    opener: opener_pos as u32,
                    pc: after as u32,
                    pos: self.pos,
                })?;
                self.pc = opener_pos;
                Ok(Flow::Continue)
            }
            _ => Err(MatchError::Internal("not a ket")),
        }
    }

    fn complete_assertion(&mut self, opener_pos: usize) -> Result<Flow, MatchError> {
        let idx = self
            .find_assert_frame(opener_pos as u32)
            .ok_or(MatchError::Internal("assertion without frame"))?;
        let (kind, restore_pos, after, cond_below) = match self.stack[idx] {
            Entry::AssertFrame { kind, restore_pos, after, cond_below, .. } => {
                (kind, restore_pos, after, cond_below)
            }
            _ => unreachable!("find_assert_frame returns frames"),
        };
        match kind {
            AssertKind::Pos => {
                self.void_choices_above(idx);
                self.stack[idx] = Entry::Void;
                if cond_below && idx > 0 {
                    if let Entry::CondChoice { .. } = self.stack[idx - 1] {
                        self.stack[idx - 1] = Entry::Void;
                    }
                }
                self.pos = restore_pos;
                self.pc = after as usize;
                Ok(Flow::Continue)
            }
            AssertKind::NonAtomic => {
                self.pos = restore_pos;
                self.pc = after as usize;
                Ok(Flow::Continue)
            }
            AssertKind::Neg => {
                // The inner pattern matched, so the assertion fails;
                // discard everything it did.
                while self.stack.len() > idx {
                    let e = self.stack.pop().expect("len checked");
                    self.undo(e);
                }
                Ok(Flow::Backtrack)
            }
        }
    }

    fn accept(&mut self) -> Result<Flow, MatchError> {
        // Inside a recursion, ACCEPT ends the recursion; inside an
        // assertion it ends the assertion; otherwise the whole match.
        let top_frame = self
            .stack
            .iter()
            .rposition(|e| matches!(e, Entry::AssertFrame { .. } | Entry::RecMark));
        if let Some(idx) = top_frame {
            if matches!(self.stack[idx], Entry::RecMark) {
                let frame = self
                    .recursions
                    .pop()
                    .ok_or(MatchError::Internal("recursion mark without frame"))?;
                self.void_choices_above_recmark();
                self.ovec.copy_from_slice(&frame.saved_ovec);
                self.pc = frame.return_pc;
                return Ok(Flow::Continue);
            }
            let opener = match self.stack[idx] {
                Entry::AssertFrame { opener, .. } => opener,
                _ => return Err(MatchError::Internal("frame search lied")),
            };
            return self.complete_assertion(opener as usize);
        }
        // Whole-match success at the current position.
        if self.pos == self.match_start
            && (self.options.contains(M::NOTEMPTY)
                || (self.options.contains(M::NOTEMPTY_ATSTART)
                    && self.match_start == self.start_arg))
        {
            return Ok(Flow::Backtrack);
        }
        self.pc = self.prog.code.len() - 1; // the End op
        Ok(Flow::Continue)
    }

    // ---- backtracking -------------------------------------------------

    fn backtrack(&mut self) -> Result<BtOutcome, MatchError> {
        let link = self.prog.link_size;
        let lw = link.width();
        let mut then_target: Option<u32> = None;
        loop {
            let Some(entry) = self.stack.pop() else {
                return Ok(BtOutcome::Exhausted);
            };
            match entry {
                Entry::Branch { opener, alt_pos, pos } => {
                    if let Some(target) = then_target {
                        if target != opener {
                            continue; // a (*THEN) skips unrelated choices
                        }
                    }
                    let prog = self.prog;
                    let code: &[u8] = &prog.code;
                    let next = alt_pos as usize + link.read(code, alt_pos as usize + 1);
                    if code[next] == Op::Alt as u8 {
                        self.push(Entry::Branch { opener, alt_pos: next as u32, pos })?;
                    }
                    self.pc = alt_pos as usize + 1 + lw;
                    self.pos = pos;
                    return Ok(BtOutcome::Resumed);
                }
                Entry::Resume { pc, pos } | Entry::PosStop { pc, pos, .. } => {
                    if then_target.is_some() {
                        continue;
                    }
                    self.pc = pc as usize;
                    self.pos = pos;
                    return Ok(BtOutcome::Resumed);
                }
                Entry::Lazy { item, after, pos, remaining } => {
                    if then_target.is_some() {
                        continue;
                    }
                    match self.match_item(item as usize, pos) {
                        ItemMatch::Ok(np) => {
                            if remaining > 1 {
                                self.push(Entry::Lazy {
                                    item,
                                    after,
                                    pos: np,
                                    remaining: remaining - 1,
                                })?;
                            }
                            self.pc = after as usize;
                            self.pos = np;
                            return Ok(BtOutcome::Resumed);
                        }
                        ItemMatch::FailEos => {
                            self.hit_end = true;
                        }
                        ItemMatch::Fail => {}
                    }
                }
                Entry::VRev { after, pos0, step, min } => {
                    if then_target.is_some() {
                        continue;
                    }
                    let mut step = step;
                    let np = loop {
                        match self.step_back(pos0, step as usize) {
                            Some(np) => break Some((np, step)),
                            None if step > min => step -= 1,
                            None => break None,
                        }
                    };
                    if let Some((np, st)) = np {
                        if st > min {
                            self.push(Entry::VRev { after, pos0, step: st - 1, min })?;
                        }
                        self.pos = np;
                        self.pc = after as usize;
                        return Ok(BtOutcome::Resumed);
                    }
                }
                Entry::CondChoice { pc, pos } => {
                    if then_target.is_some() {
                        continue;
                    }
                    self.pc = pc as usize;
                    self.pos = pos;
                    return Ok(BtOutcome::Resumed);
                }
                Entry::AssertFrame { kind, restore_pos, after, cond_below, .. } => {
                    match kind {
                        AssertKind::Neg => {
                            // Nothing inside matched: the negative
                            // assertion succeeds.
                            if cond_below {
                                if let Some(Entry::CondChoice { .. }) = self.stack.last() {
                                    let top = self.stack.len() - 1;
                                    self.stack[top] = Entry::Void;
                                }
                            }
                            self.pos = restore_pos;
                            self.pc = after as usize;
                            return Ok(BtOutcome::Resumed);
                        }
                        AssertKind::Pos | AssertKind::NonAtomic => {}
                    }
                }
                Entry::CommitMark => return Ok(BtOutcome::Commit),
                Entry::PruneMark => return Ok(BtOutcome::Prune),
                Entry::SkipMark { pos, tag } => {
                    let target = match tag {
                        None => Some(pos),
                        Some((off, len)) => self.find_mark(off, len),
                    };
                    // An unmatched tag behaves like a plain (*SKIP).
                    return Ok(BtOutcome::Skip { pos: target.unwrap_or(pos) });
                }
                Entry::ThenMark { opener } => {
                    then_target = Some(opener);
                }
                other => self.undo(other),
            }
        }
    }

    /// Replay a marker entry's side effect while unwinding.
    fn undo(&mut self, entry: Entry) {
        match entry {
            Entry::OvSave { slot, old } => self.ovec[slot as usize] = old,
            Entry::SomSave { old } => self.match_start = old,
            Entry::MarkSave { old_len } => self.marks.truncate(old_len as usize),
            Entry::RecMark => {
                self.recursions.pop();
            }
            _ => {}
        }
    }

    fn push(&mut self, entry: Entry) -> Result<(), MatchError> {
        if self.stack.len() as u32 >= self.limits.depth_limit {
            return Err(MatchError::DepthLimit);
        }
        let bytes = (self.stack.len() + 1) * CHOICE_ENTRY_BYTES;
        if bytes > self.limits.heap_limit as usize * 1024 {
            return Err(MatchError::HeapLimit);
        }
        self.stack.push(entry);
        Ok(())
    }

    fn void_choices_above(&mut self, idx: usize) {
        for e in &mut self.stack[idx + 1..] {
            if matches!(
                e,
                Entry::Branch { .. }
                    | Entry::Resume { .. }
                    | Entry::PosStop { .. }
                    | Entry::Lazy { .. }
                    | Entry::VRev { .. }
                    | Entry::CondChoice { .. }
            ) {
                *e = Entry::Void;
            }
        }
    }

    fn void_choices_above_recmark(&mut self) {
        if let Some(idx) = self.stack.iter().rposition(|e| matches!(e, Entry::RecMark)) {
            self.void_choices_above(idx);
            self.stack[idx] = Entry::Void;
        }
    }

    fn find_iter(&self, opener: u32) -> Option<usize> {
        self.stack.iter().rev().find_map(|e| match e {
            Entry::Iter { opener: o, pos } if *o == opener => Some(*pos),
            _ => None,
        })
    }

    fn find_iter_index(&self, opener: u32) -> Option<usize> {
        self.stack.iter().rposition(|e| matches!(e, Entry::Iter { opener: o, .. } if *o == opener))
    }

    fn find_assert_frame(&self, opener: u32) -> Option<usize> {
        self.stack
            .iter()
            .rposition(|e| matches!(e, Entry::AssertFrame { opener: o, .. } if *o == opener))
    }

    fn enclosing_group(&self) -> u32 {
        self.stack
            .iter()
            .rev()
            .find_map(|e| match e {
                Entry::Iter { opener, .. } => Some(*opener),
                _ => None,
            })
            .unwrap_or(0)
    }

    fn set_mark(&mut self, off: u32, len: u32) -> Result<(), MatchError> {
        self.push(Entry::MarkSave { old_len: self.marks.len() as u32 })?;
        self.marks.push((off, len, self.pos));
        self.sticky_mark = Some((off, len));
        Ok(())
    }

    fn find_mark(&self, off: u32, len: u32) -> Option<usize> {
        let want = &self.prog.code[off as usize..(off + len) as usize];
        self.marks.iter().rev().find_map(|&(o, l, pos)| {
            let name = &self.prog.code[o as usize..(o + l) as usize];
            (name == want).then_some(pos)
        })
    }

    fn fire_callout(
        &mut self,
        handler: &mut Option<&mut dyn CalloutHandler>,
        number: u8,
        pattern_offset: usize,
        string: Option<(usize, usize, u8)>,
    ) -> Result<Flow, MatchError> {
        let Some(handler) = handler else {
            return Ok(Flow::Continue);
        };
        let capture_top = (1..self.prog.capture_count() as u16)
            .filter(|&g| self.group_set(g))
            .max()
            .unwrap_or(0);
        let string_slice =
            string.map(|(s, e, d)| (&self.prog.code[s..e], d));
        let mark = self
            .marks
            .last()
            .map(|&(o, l, _)| &self.prog.code[o as usize..(o + l) as usize]);
        let block = CalloutBlock {
            number,
            string: string_slice,
            pattern_offset,
            subject: self.subject,
            current_position: self.pos,
            start_match: self.match_start,
            capture_top,
            mark,
        };
        let rc = handler.callout(&block);
        if rc == 0 {
            Ok(Flow::Continue)
        } else if rc > 0 {
            Ok(Flow::Backtrack)
        } else {
            Err(MatchError::CalloutAbort(rc))
        }
    }

    // ---- character-level predicates ----------------------------------

    fn char_at(&self, pos: usize) -> (u32, usize) {
        if self.utf {
            utf::decode(&self.subject[..self.end], pos)
        } else {
            (self.subject[pos] as u32, 1)
        }
    }

    fn char_before(&self, pos: usize) -> (u32, usize) {
        if self.utf {
            utf::decode_before(&self.subject[..self.end], pos)
        } else {
            (self.subject[pos - 1] as u32, 1)
        }
    }

    fn step_back(&self, pos: usize, chars: usize) -> Option<usize> {
        let mut p = pos;
        for _ in 0..chars {
            if p == 0 {
                return None;
            }
            p = if self.utf {
                utf::prev_boundary(self.subject, p)
            } else {
                p - 1
            };
        }
        Some(p)
    }

    fn mid_crlf(&self, pos: usize) -> bool {
        matches!(
            self.prog.newline,
            skua_asm::Newline::CrLf | skua_asm::Newline::AnyCrlf | skua_asm::Newline::Any
        ) && pos > 0
            && self.subject.get(pos) == Some(&b'\n')
            && self.subject[pos - 1] == b'\r'
    }

    fn ucp(&self) -> bool {
        self.prog.options.contains(O::UCP)
    }

    fn is_word_cp(&self, cp: u32) -> bool {
        if self.ucp() && !self.prog.extra_options.contains(X::ASCII_BSW) {
            skua_ucd::is_word(cp)
        } else {
            skua_ucd::DEFAULT_TABLES.is_ctype(cp, CTYPE_WORD)
        }
    }

    fn is_digit_cp(&self, cp: u32) -> bool {
        if self.ucp() && !self.prog.extra_options.contains(X::ASCII_BSD) {
            skua_ucd::ucd::is_decimal(cp)
        } else {
            skua_ucd::DEFAULT_TABLES.is_ctype(cp, CTYPE_DIGIT)
        }
    }

    fn is_space_cp(&self, cp: u32) -> bool {
        if self.ucp() && !self.prog.extra_options.contains(X::ASCII_BSS) {
            skua_ucd::ucd::is_space(cp)
        } else {
            skua_ucd::DEFAULT_TABLES.is_ctype(cp, CTYPE_SPACE)
        }
    }

    fn group_set(&self, g: u16) -> bool {
        let s = self.ovec.get(2 * g as usize).copied().unwrap_or(UNSET);
        let e = self.ovec.get(2 * g as usize + 1).copied().unwrap_or(UNSET);
        s != UNSET && e != UNSET
    }

    fn script_run_ok(&self, start: usize, end: usize) -> bool {
        let mut run = ScriptRun::new();
        let mut p = start;
        while p < end {
            let (cp, n) = self.char_at(p);
            if !run.push(cp) {
                return false;
            }
            p += n;
        }
        true
    }

    fn match_backref(&mut self, group: Option<u16>, caseless: bool) -> ItemMatch {
        let Some(g) = group else {
            return self.unset_backref();
        };
        if !self.group_set(g) {
            return self.unset_backref();
        }
        let (s, e) = (self.ovec[2 * g as usize], self.ovec[2 * g as usize + 1]);
        let needed = e - s;
        if !caseless {
            if self.pos + needed > self.end {
                return ItemMatch::FailEos;
            }
            if self.subject[self.pos..self.pos + needed] == self.subject[s..e] {
                ItemMatch::Ok(self.pos + needed)
            } else {
                ItemMatch::Fail
            }
        } else {
            let mut rp = s;
            let mut sp = self.pos;
            while rp < e {
                if sp >= self.end {
                    return ItemMatch::FailEos;
                }
                let (rc, rl) = self.char_at(rp);
                let (sc, sl) = self.char_at(sp);
                let equal = if self.utf || self.ucp() {
                    skua_ucd::chars_fold_equal(rc, sc, self.rules)
                } else {
                    rc == sc
                        || (rc < 256
                            && skua_ucd::DEFAULT_TABLES.flip[rc as usize] as u32 == sc)
                };
                if !equal {
                    return ItemMatch::Fail;
                }
                rp += rl;
                sp += sl;
            }
            ItemMatch::Ok(sp)
        }
    }

    fn unset_backref(&self) -> ItemMatch {
        if self.prog.options.contains(O::MATCH_UNSET_BACKREF) {
            ItemMatch::Ok(self.pos)
        } else {
            ItemMatch::Fail
        }
    }

    /// Match one single-character item at `pos`.
    fn match_item(&self, item: usize, pos: usize) -> ItemMatch {
        let prog = self.prog;
        let code: &[u8] = &prog.code;
        let op = match Op::try_from(code[item]) {
            Ok(op) => op,
            Err(_) => return ItemMatch::Fail,
        };
        if pos >= self.end {
            return ItemMatch::FailEos;
        }
        let (cp, n) = self.char_at(pos);
        let next = pos + n;
        let matched = match op {
            Op::Char => {
                let len = code[item + 1] as usize;
                if pos + len > self.end {
                    // Partial only when the available prefix agrees.
                    let avail = self.end - pos;
                    return if self.subject[pos..self.end] == code[item + 2..item + 2 + avail] {
                        ItemMatch::FailEos
                    } else {
                        ItemMatch::Fail
                    };
                }
                return if self.subject[pos..pos + len] == code[item + 2..item + 2 + len] {
                    ItemMatch::Ok(pos + len)
                } else {
                    ItemMatch::Fail
                };
            }
            Op::CharI | Op::NotI | Op::Not => {
                let len = code[item + 1] as usize;
                let own = if self.utf {
                    utf::decode(&code[item + 2..item + 2 + len], 0).0
                } else {
                    code[item + 2] as u32
                };
                let equal = if op == Op::Not {
                    own == cp
                } else if self.utf || self.ucp() {
                    skua_ucd::chars_fold_equal(own, cp, self.rules)
                } else {
                    own == cp
                        || (own < 256
                            && skua_ucd::DEFAULT_TABLES.flip[own as usize] as u32 == cp)
                };
                if op == Op::CharI { equal } else { !equal }
            }
            Op::AnyNoNl => !self.prog.newline.is_newline_cp(cp),
            Op::AllAny => true,
            Op::AnyByte => {
                // One code unit, even inside a multi-unit character.
                return ItemMatch::Ok(pos + 1);
            }
            Op::Digit => self.is_digit_cp(cp),
            Op::NotDigit => !self.is_digit_cp(cp),
            Op::Whitespace => self.is_space_cp(cp),
            Op::NotWhitespace => !self.is_space_cp(cp),
            Op::WordChar => self.is_word_cp(cp),
            Op::NotWordChar => !self.is_word_cp(cp),
            Op::HSpace => skua_ucd::is_hspace(cp),
            Op::NotHSpace => !skua_ucd::is_hspace(cp),
            Op::VSpace => skua_ucd::is_vspace(cp),
            Op::NotVSpace => !skua_ucd::is_vspace(cp),
            Op::AnyNewline => return self.match_bsr(pos),
            Op::ExtUni => return ItemMatch::Ok(self.grapheme_end(pos)),
            Op::Prop | Op::NotProp => {
                let prop = skua_asm::prop::decode(code[item + 1], code[item + 2]);
                prop.contains(cp) != (op == Op::NotProp)
            }
            Op::Class | Op::NClass => {
                if cp < 256 {
                    let map = &code[item + 1..item + 33];
                    map[(cp >> 3) as usize] & (1 << (cp & 7)) != 0
                } else {
                    op == Op::NClass
                }
            }
            Op::XClass => {
                let end = item + walk::header_len(code, item, self.prog.link_size);
                let body = &code[item + 1 + self.prog.link_size.width()..end];
                xclass_match(body, cp)
            }
            Op::EClass => {
                let end = item + walk::header_len(code, item, self.prog.link_size);
                let body = &code[item + 1 + self.prog.link_size.width()..end];
                eclass_match(body, cp)
            }
            _ => return ItemMatch::Fail,
        };
        if matched {
            ItemMatch::Ok(next)
        } else {
            ItemMatch::Fail
        }
    }

    fn match_bsr(&self, pos: usize) -> ItemMatch {
        let s = self.subject;
        if pos >= self.end {
            return ItemMatch::FailEos;
        }
        if s[pos] == b'\r' {
            return if pos + 1 < self.end && s[pos + 1] == b'\n' {
                ItemMatch::Ok(pos + 2)
            } else {
                ItemMatch::Ok(pos + 1)
            };
        }
        let (cp, n) = self.char_at(pos);
        let is_nl = match self.prog.bsr {
            Bsr::AnyCrlf => matches!(cp, 0x0A | 0x0D),
            Bsr::Unicode => matches!(cp, 0x0A..=0x0D | 0x85 | 0x2028 | 0x2029),
        };
        if is_nl {
            ItemMatch::Ok(pos + n)
        } else {
            ItemMatch::Fail
        }
    }

    /// End of the extended grapheme cluster starting at `pos`.
    fn grapheme_end(&self, pos: usize) -> usize {
        let (first, n) = self.char_at(pos);
        let mut p = pos + n;
        if !self.utf && !self.ucp() {
            return p;
        }
        let mut state = PairState::default();
        let mut prev = grapheme::grapheme_break(first);
        while p < self.end {
            let (cp, n) = self.char_at(p);
            let cls = grapheme::grapheme_break(cp);
            if grapheme::is_break(prev, cls, &mut state) {
                break;
            }
            prev = cls;
            p += n;
        }
        p
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Backtrack,
}

enum BtOutcome {
    Resumed,
    Exhausted,
    Commit,
    Prune,
    Skip { pos: usize },
}

// ---- class evaluation ---------------------------------------------------

/// Evaluate a serialised class body (`[flags][bitmap?][items…]`).
pub(crate) fn xclass_match(body: &[u8], cp: u32) -> bool {
    let flags = body[0];
    let negated = flags & xclass::FLAG_NEGATED != 0;
    let mut p = 1;
    let inner = 'inner: {
        if flags & xclass::FLAG_HAS_MAP != 0 {
            if cp < 256 {
                let bit = body[p + (cp >> 3) as usize] & (1 << (cp & 7)) != 0;
                break 'inner bit;
            }
            p += 32;
        } else if cp < 256 {
            break 'inner false;
        }
        if flags & xclass::FLAG_ALL_WIDE != 0 {
            break 'inner true;
        }
        let mut matched = false;
        while p < body.len() {
            match body[p] {
                xclass::ITEM_RANGE => {
                    let lo = u32::from_le_bytes([body[p + 1], body[p + 2], body[p + 3], body[p + 4]]);
                    let hi = u32::from_le_bytes([body[p + 5], body[p + 6], body[p + 7], body[p + 8]]);
                    if lo <= cp && cp <= hi {
                        matched = true;
                        break;
                    }
                    p += 9;
                }
                tag @ (xclass::ITEM_PROP | xclass::ITEM_NOTPROP) => {
                    let prop = skua_asm::prop::decode(body[p + 1], body[p + 2]);
                    if prop.contains(cp) != (tag == xclass::ITEM_NOTPROP) {
                        matched = true;
                        break;
                    }
                    p += 3;
                }
                _ => break,
            }
        }
        matched
    };
    inner != negated
}

/// Evaluate an extended-class postfix expression.
pub(crate) fn eclass_match(body: &[u8], cp: u32) -> bool {
    let mut stack: [bool; 16] = [false; 16];
    let mut top = 0usize;
    let mut p = 0;
    while p < body.len() {
        match body[p] {
            eclass::PUSH => {
                let len = read_u16(body, p + 1) as usize;
                let val = xclass_match(&body[p + 3..p + 3 + len], cp);
                if top < stack.len() {
                    stack[top] = val;
                    top += 1;
                }
                p += 3 + len;
            }
            op @ (eclass::AND | eclass::OR | eclass::SUB | eclass::XOR) => {
                if top >= 2 {
                    let b = stack[top - 1];
                    let a = stack[top - 2];
                    stack[top - 2] = match op {
                        eclass::AND => a && b,
                        eclass::OR => a || b,
                        eclass::SUB => a && !b,
                        _ => a != b,
                    };
                    top -= 1;
                }
                p += 1;
            }
            eclass::NOT => {
                if top >= 1 {
                    stack[top - 1] = !stack[top - 1];
                }
                p += 1;
            }
            _ => break,
        }
    }
    top > 0 && stack[top - 1]
}
