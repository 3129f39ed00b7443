//! The parallel-state matcher.
//!
//! Walks the same bytecode as the backtracker, but advances a set of
//! simultaneous states one subject character at a time, so it finds every
//! match that starts at a position in a single pass and never backtracks.
//! Backreferences, subpattern recursion, capture-dependent conditions and
//! variable-length lookbehinds have no parallel formulation here and are
//! reported as unsupported at match time.

use skua_asm::link::read_u16;
use skua_asm::op::Op;
use skua_asm::options::{CompileOptions as O, MatchOptions as M};
use skua_asm::program::Program;
use skua_asm::{utf, walk, MatchError, UNSET};

use crate::context::MatchContext;
use crate::match_data::{MatchData, MatchOutcome};

/// Smallest permitted workspace, in entries.
pub const MIN_WORKSPACE: usize = 20;

const RESTART_TAG: u32 = 0x5744_4641;

/// Match using the parallel engine. Matches are written to the match
/// data as `(start, end)` pairs, longest first; the workspace carries
/// the active-state list and, across a partial match, the restart state.
pub fn exec(
    program: &Program,
    subject: &[u8],
    start: usize,
    options: M,
    ctx: &MatchContext,
    workspace: &mut [u32],
    md: &mut MatchData,
) -> Result<MatchOutcome, MatchError> {
    if !program.magic_ok() {
        return Err(MatchError::BadMagic);
    }
    if start > subject.len() {
        return Err(MatchError::BadOffset);
    }
    if workspace.len() < MIN_WORKSPACE {
        return Err(MatchError::DfaWorkspaceSize);
    }
    let utf_mode = program.options.contains(O::UTF);
    let skip_check =
        options.contains(M::NO_UTF_CHECK) || program.options.contains(O::NO_UTF_CHECK);
    if utf_mode && !skip_check {
        if let Err((error, offset)) = utf::validate(subject) {
            return Err(MatchError::BadSubjectUtf { error, offset });
        }
        if !utf::is_boundary(subject, start) {
            return Err(MatchError::BadUtfOffset);
        }
    }
    md.reset();

    let ctx = ctx.effective(program);
    let mut dfa = Dfa {
        prog: program,
        subject,
        end: subject.len(),
        start_arg: start,
        options,
        utf: utf_mode,
        steps: 0,
        step_limit: ctx.match_limit,
        max_threads: workspace.len().saturating_sub(4) / 2,
    };

    let anchored = program.is_anchored() || options.contains(M::ANCHORED);
    let mut restart_seed = if options.contains(M::DFA_RESTART) {
        if workspace[0] != RESTART_TAG {
            return Err(MatchError::DfaBadRestart);
        }
        let count = workspace[1] as usize;
        let mut threads = Vec::with_capacity(count);
        for i in 0..count {
            threads.push(Thread {
                pc: workspace[2 + 2 * i],
                count: workspace[3 + 2 * i] as u16,
            });
        }
        Some(threads)
    } else {
        None
    };
    workspace[0] = 0;

    let mut cur = start;
    loop {
        match dfa.attempt(cur, restart_seed.take())? {
            Scan::Matches(mut ends) => {
                ends.sort_unstable();
                ends.dedup();
                if options.contains(M::NOTEMPTY)
                    || (options.contains(M::NOTEMPTY_ATSTART) && cur == start)
                {
                    ends.retain(|&e| e != cur);
                }
                if !ends.is_empty() {
                    let pairs = md.pair_count();
                    if options.contains(M::DFA_SHORTEST) {
                        md.ovector[0] = cur;
                        md.ovector[1] = ends[0];
                    } else {
                        for (i, &e) in ends.iter().rev().take(pairs).enumerate() {
                            md.ovector[2 * i] = cur;
                            md.ovector[2 * i + 1] = e;
                        }
                    }
                    md.outcome = Some(MatchOutcome::Match);
                    return Ok(MatchOutcome::Match);
                }
            }
            Scan::Partial(threads) => {
                if options.intersects(M::PARTIAL_SOFT | M::PARTIAL_HARD) {
                    let stored = threads.len().min(dfa.max_threads);
                    workspace[0] = RESTART_TAG;
                    workspace[1] = stored as u32;
                    for (i, t) in threads.iter().take(stored).enumerate() {
                        workspace[2 + 2 * i] = t.pc;
                        workspace[3 + 2 * i] = t.count as u32;
                    }
                    md.ovector[0] = cur;
                    md.ovector[1] = dfa.end;
                    md.outcome = Some(MatchOutcome::Partial);
                    return Ok(MatchOutcome::Partial);
                }
            }
            Scan::Dead => {}
        }

        if anchored || cur >= dfa.end {
            break;
        }
        cur = if utf_mode {
            cur + utf::decode(subject, cur).1
        } else {
            cur + 1
        };
    }
    md.outcome = Some(MatchOutcome::NoMatch);
    Ok(MatchOutcome::NoMatch)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Thread {
    pc: u32,
    count: u16,
}

enum Scan {
    Matches(Vec<usize>),
    /// End of subject reached with live states.
    Partial(Vec<Thread>),
    Dead,
}

struct Dfa<'a> {
    prog: &'a Program,
    subject: &'a [u8],
    end: usize,
    start_arg: usize,
    options: M,
    utf: bool,
    steps: u32,
    step_limit: u32,
    max_threads: usize,
}

impl<'a> Dfa<'a> {
    fn attempt(&mut self, start: usize, seed: Option<Vec<Thread>>) -> Result<Scan, MatchError> {
        let mut matches = Vec::new();
        let mut active: Vec<Thread> = Vec::new();
        let mut pos = start;

        match seed {
            Some(threads) => active = threads,
            None => {
                self.closure(Thread { pc: 0, count: 0 }, pos, &mut active, &mut matches)?;
            }
        }

        loop {
            if !matches.is_empty() && self.options.contains(M::DFA_SHORTEST) {
                return Ok(Scan::Matches(matches));
            }
            if active.is_empty() {
                return if matches.is_empty() {
                    Ok(Scan::Dead)
                } else {
                    Ok(Scan::Matches(matches))
                };
            }
            if pos >= self.end {
                // Live consuming states want more input.
                return if matches.is_empty() {
                    Ok(Scan::Partial(active))
                } else {
                    Ok(Scan::Matches(matches))
                };
            }

            let (cp, n) = self.char_at(pos);
            let next_pos = pos + n;
            let mut next: Vec<Thread> = Vec::new();
            let current = core::mem::take(&mut active);
            for t in current {
                self.step(t, cp, pos, next_pos, &mut next, &mut matches)?;
            }
            active = next;
            pos = next_pos;
        }
    }

    fn char_at(&self, pos: usize) -> (u32, usize) {
        if self.utf {
            utf::decode(&self.subject[..self.end], pos)
        } else {
            (self.subject[pos] as u32, 1)
        }
    }

    /// Advance one consuming thread over `cp`.
    fn step(
        &mut self,
        t: Thread,
        cp: u32,
        pos: usize,
        next_pos: usize,
        out: &mut Vec<Thread>,
        matches: &mut Vec<usize>,
    ) -> Result<(), MatchError> {
        let prog = self.prog;
        let code: &[u8] = &prog.code;
        let link = self.prog.link_size;
        let pc = t.pc as usize;
        let op = Op::try_from(code[pc]).map_err(|_| MatchError::Internal("unknown opcode"))?;
        match op {
            // Bare consuming item.
            _ if op.is_repeatable_item() => {
                if self.item_matches(pc, cp, pos) {
                    let after = pc + walk::item_len(code, pc, link);
                    self.closure(Thread { pc: after as u32, count: 0 }, next_pos, out, matches)?;
                }
            }
            Op::Star | Op::MinStar | Op::PosStar | Op::Plus | Op::MinPlus | Op::PosPlus => {
                let item = pc + 1;
                if self.item_matches(item, cp, pos) {
                    let after = pc + walk::item_len(code, pc, link);
                    // Another repetition, or move on.
                    self.add(Thread { pc: t.pc, count: 0 }, out)?;
                    self.closure(Thread { pc: after as u32, count: 0 }, next_pos, out, matches)?;
                }
            }
            Op::Upto | Op::MinUpto | Op::PosUpto | Op::Exact => {
                let max = read_u16(code, pc + 1);
                let item = pc + 3;
                if self.item_matches(item, cp, pos) {
                    let after = pc + walk::item_len(code, pc, link);
                    let taken = t.count + 1;
                    if op == Op::Exact {
                        if taken == max {
                            self.closure(
                                Thread { pc: after as u32, count: 0 },
                                next_pos,
                                out,
                                matches,
                            )?;
                        } else {
                            self.add(Thread { pc: t.pc, count: taken }, out)?;
                        }
                    } else {
                        if taken < max {
                            self.add(Thread { pc: t.pc, count: taken }, out)?;
                        }
                        self.closure(
                            Thread { pc: after as u32, count: 0 },
                            next_pos,
                            out,
                            matches,
                        )?;
                    }
                }
            }
            _ => return Err(MatchError::DfaUnsupportedItem),
        }
        Ok(())
    }

    fn add(&self, t: Thread, out: &mut Vec<Thread>) -> Result<(), MatchError> {
        if out.contains(&t) {
            return Ok(());
        }
        if out.len() >= self.max_threads {
            return Err(MatchError::DfaWorkspaceSize);
        }
        out.push(t);
        Ok(())
    }

    /// Epsilon-expand `t` at `pos`, stopping at consuming states and
    /// recording completed matches.
    fn closure(
        &mut self,
        t: Thread,
        pos: usize,
        out: &mut Vec<Thread>,
        matches: &mut Vec<usize>,
    ) -> Result<(), MatchError> {
        let mut pending = vec![t];
        let mut visited: Vec<Thread> = Vec::new();
        while let Some(t) = pending.pop() {
            if visited.contains(&t) {
                continue;
            }
            visited.push(t);
            self.steps += 1;
            if self.steps > self.step_limit {
                return Err(MatchError::MatchLimit);
            }
            self.expand(t, pos, &mut pending, out, matches)?;
        }
        Ok(())
    }

    fn expand(
        &mut self,
        t: Thread,
        pos: usize,
        pending: &mut Vec<Thread>,
        out: &mut Vec<Thread>,
        matches: &mut Vec<usize>,
    ) -> Result<(), MatchError> {
        let prog = self.prog;
        let code: &[u8] = &prog.code;
        let link = self.prog.link_size;
        let lw = link.width();
        let pc = t.pc as usize;
        let op = Op::try_from(code[pc]).map_err(|_| MatchError::Internal("unknown opcode"))?;
        let push = |pending: &mut Vec<Thread>, pc: usize| {
            pending.push(Thread { pc: pc as u32, count: 0 });
        };
        match op {
            Op::End => matches.push(pos),

            // Cluster matching has no per-character formulation here.
            Op::ExtUni => return Err(MatchError::DfaUnsupportedItem),

            _ if op.is_repeatable_item() => self.add(t, out)?,

            Op::Star | Op::MinStar | Op::PosStar | Op::Upto | Op::MinUpto | Op::PosUpto => {
                // Zero repetitions are always on the table.
                self.add(t, out)?;
                push(pending, pc + walk::item_len(code, pc, link));
            }
            Op::Plus | Op::MinPlus | Op::PosPlus | Op::Exact => {
                self.add(t, out)?;
            }
            Op::Query | Op::MinQuery | Op::PosQuery => {
                self.add(Thread { pc: (pc + 1) as u32, count: 0 }, out)?;
                push(pending, pc + walk::item_len(code, pc, link));
            }

            Op::Bra | Op::CBra | Op::BraPos | Op::CBraPos | Op::Once => {
                let header = walk::header_len(code, pc, link);
                push(pending, pc + header);
                // Every alternative is live at once.
                let mut p = pc;
                loop {
                    let next = p + link.read(code, p + 1);
                    if code[next] != Op::Alt as u8 {
                        break;
                    }
                    push(pending, next + 1 + lw);
                    p = next;
                }
            }
            Op::Alt => {
                // End of a branch: continue at the ket.
                let mut p = pc;
                loop {
                    p += link.read(code, p + 1);
                    if code[p] != Op::Alt as u8 {
                        break;
                    }
                }
                push(pending, p);
            }
            Op::Ket => push(pending, pc + 1 + lw),
            Op::KetRmax | Op::KetRmin => {
                let opener = pc - link.read(code, pc + 1);
                push(pending, opener);
                push(pending, pc + 1 + lw);
            }
            Op::KetRpos => {
                let opener = pc - link.read(code, pc + 1);
                push(pending, opener);
                push(pending, pc + 1 + lw);
            }
            Op::BraZero | Op::BraMinZero => {
                push(pending, pc + 1);
                push(pending, walk::skip_group(code, pc + 1, link));
            }
            Op::SkipZero => push(pending, walk::skip_group(code, pc + 1, link)),

            // Zero-width tests, resolved against the current position.
            Op::Circ => {
                if pos == 0 && !self.options.contains(M::NOTBOL) {
                    push(pending, pc + 1);
                }
            }
            Op::CircM => {
                let ok = (pos == 0 && !self.options.contains(M::NOTBOL))
                    || self
                        .prog
                        .newline
                        .before(self.subject, pos, self.utf)
                        .is_some();
                if ok {
                    push(pending, pc + 1);
                }
            }
            Op::Dollar => {
                let at_end = pos == self.end && !self.options.contains(M::NOTEOL);
                let before_final = !self.prog.options.contains(O::DOLLAR_ENDONLY)
                    && self
                        .prog
                        .newline
                        .at(self.subject, pos, self.utf)
                        .map_or(false, |n| pos + n == self.end);
                if at_end || before_final {
                    push(pending, pc + 1);
                }
            }
            Op::DollarM => {
                let ok = (pos == self.end && !self.options.contains(M::NOTEOL))
                    || self.prog.newline.at(self.subject, pos, self.utf).is_some();
                if ok {
                    push(pending, pc + 1);
                }
            }
            Op::Sod => {
                if pos == 0 {
                    push(pending, pc + 1);
                }
            }
            Op::Som => {
                if pos == self.start_arg {
                    push(pending, pc + 1);
                }
            }
            Op::Eod => {
                if pos == self.end {
                    push(pending, pc + 1);
                }
            }
            Op::Eodn => {
                let ok = pos == self.end
                    || self
                        .prog
                        .newline
                        .at(self.subject, pos, self.utf)
                        .map_or(false, |n| pos + n == self.end);
                if ok {
                    push(pending, pc + 1);
                }
            }
            Op::WordBoundary | Op::NotWordBoundary => {
                let before = pos > 0 && {
                    let (cp, _) = if self.utf {
                        utf::decode_before(&self.subject[..self.end], pos)
                    } else {
                        (self.subject[pos - 1] as u32, 1)
                    };
                    self.is_word(cp)
                };
                let here = pos < self.end && {
                    let (cp, _) = self.char_at(pos);
                    self.is_word(cp)
                };
                if (before != here) == (op == Op::WordBoundary) {
                    push(pending, pc + 1);
                }
            }

            Op::Assert | Op::AssertNot => {
                let holds = self.assert_holds(pc, pos)?;
                if holds == (op == Op::Assert) {
                    push(pending, walk::skip_group(code, pc, link));
                }
            }
            Op::AssertBack | Op::AssertBackNot => {
                let holds = self.assert_holds(pc, pos)?;
                if holds == (op == Op::AssertBack) {
                    push(pending, walk::skip_group(code, pc, link));
                }
            }
            Op::NaAssert | Op::NaAssertBack => {
                let holds = self.assert_holds(pc, pos)?;
                if holds {
                    push(pending, walk::skip_group(code, pc, link));
                }
            }

            Op::Cond => {
                let header = walk::header_len(code, pc, link);
                let cond_pc = pc + header;
                // Just after the Alt, or just past the ket; same layout.
                let target = pc + link.read(code, pc + 1);
                let else_pc = target + 1 + lw;
                let cond_op = Op::try_from(code[cond_pc])
                    .map_err(|_| MatchError::Internal("unknown opcode"))?;
                match cond_op {
                    Op::False => push(pending, else_pc),
                    Op::True => {
                        push(pending, cond_pc + walk::header_len(code, cond_pc, link));
                    }
                    Op::Assert | Op::AssertNot | Op::AssertBack | Op::AssertBackNot => {
                        let holds = self.assert_holds(cond_pc, pos)?;
                        let positive =
                            matches!(cond_op, Op::Assert | Op::AssertBack);
                        if holds == positive {
                            push(pending, walk::skip_group(code, cond_pc, link));
                        } else {
                            push(pending, else_pc);
                        }
                    }
                    _ => return Err(MatchError::DfaUnsupportedCondition),
                }
            }

            Op::Fail => {}
            Op::Callout => push(pending, pc + 6),
            Op::CalloutStr => push(pending, pc + walk::header_len(code, pc, link)),

            // Lookbehind interiors run through `assert_holds`, which
            // consumes the reverse itself.
            Op::Reverse | Op::VReverse => return Err(MatchError::DfaUnsupportedItem),

            Op::Ref | Op::RefI | Op::DnRef | Op::DnRefI | Op::Recurse => {
                return Err(MatchError::DfaUnsupportedItem);
            }
            Op::ScriptRun | Op::SetSom | Op::Accept | Op::Mark | Op::Commit | Op::CommitArg
            | Op::Prune | Op::PruneArg | Op::Skip | Op::SkipArg | Op::Then | Op::ThenArg
            | Op::Close => {
                return Err(MatchError::DfaUnsupportedItem);
            }
            Op::Cref | Op::DnCref | Op::RRef | Op::DnRRef | Op::False | Op::True => {
                return Err(MatchError::DfaUnsupportedCondition);
            }
            _ => return Err(MatchError::DfaUnsupportedItem),
        }
        Ok(())
    }

    /// Run an assertion group as a nested scan. Lookbehinds step back by
    /// their fixed reverse first.
    fn assert_holds(&mut self, group_pc: usize, pos: usize) -> Result<bool, MatchError> {
        let prog = self.prog;
        let code: &[u8] = &prog.code;
        let link = self.prog.link_size;
        let lw = link.width();
        let ket = {
            let mut p = group_pc;
            loop {
                let next = p + link.read(code, p + 1);
                if code[next] != Op::Alt as u8 {
                    break next;
                }
                p = next;
            }
        };

        // Collect branch starts.
        let mut branches = vec![group_pc + 1 + lw];
        let mut p = group_pc;
        loop {
            let next = p + link.read(code, p + 1);
            if code[next] != Op::Alt as u8 {
                break;
            }
            branches.push(next + 1 + lw);
            p = next;
        }

        for branch in branches {
            let (entry, start_pos) = match Op::try_from(code[branch]) {
                Ok(Op::Reverse) => {
                    let n = read_u16(code, branch + 1) as usize;
                    match self.step_back(pos, n) {
                        Some(np) => (branch + 3, np),
                        None => continue,
                    }
                }
                Ok(Op::VReverse) => return Err(MatchError::DfaUnsupportedItem),
                _ => (branch, pos),
            };
            if self.scan_until(entry, ket, start_pos)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Does a scan from `entry` reach `target` (the assertion's ket)?
    fn scan_until(
        &mut self,
        entry: usize,
        target: usize,
        start_pos: usize,
    ) -> Result<bool, MatchError> {
        let mut active: Vec<Thread> = Vec::new();
        let mut reached = Vec::new();
        let saved_end_goal = target;

        // A tiny closure variant: reaching `target` counts as a match.
        let mut pending = vec![Thread { pc: entry as u32, count: 0 }];
        let mut visited: Vec<Thread> = Vec::new();
        let mut pos = start_pos;
        loop {
            while let Some(t) = pending.pop() {
                if visited.contains(&t) {
                    continue;
                }
                visited.push(t);
                if t.pc as usize == saved_end_goal {
                    reached.push(pos);
                    continue;
                }
                self.expand(t, pos, &mut pending, &mut active, &mut Vec::new())?;
            }
            if !reached.is_empty() {
                return Ok(true);
            }
            if active.is_empty() || pos >= self.end {
                return Ok(false);
            }
            let (cp, n) = self.char_at(pos);
            let next_pos = pos + n;
            let mut next: Vec<Thread> = Vec::new();
            for t in core::mem::take(&mut active) {
                // Step consuming threads; successors land in `pending`
                // for the next closure round.
                self.step_into(t, cp, pos, next_pos, &mut next, &mut pending)?;
            }
            active = next;
            visited.clear();
            pos = next_pos;
        }
    }

    fn step_into(
        &mut self,
        t: Thread,
        cp: u32,
        pos: usize,
        _next_pos: usize,
        out: &mut Vec<Thread>,
        pending: &mut Vec<Thread>,
    ) -> Result<(), MatchError> {
        let prog = self.prog;
        let code: &[u8] = &prog.code;
        let link = self.prog.link_size;
        let pc = t.pc as usize;
        let op = Op::try_from(code[pc]).map_err(|_| MatchError::Internal("unknown opcode"))?;
        match op {
            _ if op.is_repeatable_item() => {
                if self.item_matches(pc, cp, pos) {
                    pending.push(Thread {
                        pc: (pc + walk::item_len(code, pc, link)) as u32,
                        count: 0,
                    });
                }
            }
            Op::Star | Op::MinStar | Op::PosStar | Op::Plus | Op::MinPlus | Op::PosPlus => {
                if self.item_matches(pc + 1, cp, pos) {
                    self.add(Thread { pc: t.pc, count: 0 }, out)?;
                    pending.push(Thread {
                        pc: (pc + walk::item_len(code, pc, link)) as u32,
                        count: 0,
                    });
                }
            }
            Op::Upto | Op::MinUpto | Op::PosUpto | Op::Exact => {
                let max = read_u16(code, pc + 1);
                if self.item_matches(pc + 3, cp, pos) {
                    let taken = t.count + 1;
                    let after = (pc + walk::item_len(code, pc, link)) as u32;
                    if op == Op::Exact {
                        if taken == max {
                            pending.push(Thread { pc: after, count: 0 });
                        } else {
                            self.add(Thread { pc: t.pc, count: taken }, out)?;
                        }
                    } else {
                        if taken < max {
                            self.add(Thread { pc: t.pc, count: taken }, out)?;
                        }
                        pending.push(Thread { pc: after, count: 0 });
                    }
                }
            }
            _ => return Err(MatchError::DfaUnsupportedItem),
        }
        Ok(())
    }

    fn step_back(&self, pos: usize, chars: usize) -> Option<usize> {
        let mut p = pos;
        for _ in 0..chars {
            if p == 0 {
                return None;
            }
            p = if self.utf { utf::prev_boundary(self.subject, p) } else { p - 1 };
        }
        Some(p)
    }

    fn is_word(&self, cp: u32) -> bool {
        if self.prog.options.contains(O::UCP) {
            skua_ucd::is_word(cp)
        } else {
            skua_ucd::DEFAULT_TABLES.is_ctype(cp, skua_ucd::tables::CTYPE_WORD)
        }
    }

    /// Single-item membership test; mirrors the backtracker's items for
    /// everything the parallel engine supports.
    fn item_matches(&self, item: usize, cp: u32, pos: usize) -> bool {
        let prog = self.prog;
        let code: &[u8] = &prog.code;
        let op = match Op::try_from(code[item]) {
            Ok(op) => op,
            Err(_) => return false,
        };
        match op {
            Op::Char => {
                let len = code[item + 1] as usize;
                pos + len <= self.end && self.subject[pos..pos + len] == code[item + 2..item + 2 + len]
            }
            Op::CharI | Op::Not | Op::NotI => {
                let len = code[item + 1] as usize;
                let own = if self.utf {
                    utf::decode(&code[item + 2..item + 2 + len], 0).0
                } else {
                    code[item + 2] as u32
                };
                let equal = if op == Op::Not {
                    own == cp
                } else {
                    skua_ucd::chars_fold_equal(own, cp, Default::default())
                };
                if op == Op::CharI { equal } else { !equal }
            }
            Op::AnyNoNl => !self.prog.newline.is_newline_cp(cp),
            Op::AllAny | Op::AnyByte => true,
            Op::Digit => self.type_digit(cp),
            Op::NotDigit => !self.type_digit(cp),
            Op::Whitespace => self.type_space(cp),
            Op::NotWhitespace => !self.type_space(cp),
            Op::WordChar => self.is_word(cp),
            Op::NotWordChar => !self.is_word(cp),
            Op::HSpace => skua_ucd::is_hspace(cp),
            Op::NotHSpace => !skua_ucd::is_hspace(cp),
            Op::VSpace => skua_ucd::is_vspace(cp),
            Op::NotVSpace => !skua_ucd::is_vspace(cp),
            Op::AnyNewline => matches!(cp, 0x0A..=0x0D | 0x85 | 0x2028 | 0x2029),
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
                crate::nfa::xclass_match(body, cp)
            }
            Op::EClass => {
                let end = item + walk::header_len(code, item, self.prog.link_size);
                let body = &code[item + 1 + self.prog.link_size.width()..end];
                crate::nfa::eclass_match(body, cp)
            }
            _ => false,
        }
    }

    fn type_digit(&self, cp: u32) -> bool {
        if self.prog.options.contains(O::UCP) {
            skua_ucd::ucd::is_decimal(cp)
        } else {
            skua_ucd::DEFAULT_TABLES.is_ctype(cp, skua_ucd::tables::CTYPE_DIGIT)
        }
    }

    fn type_space(&self, cp: u32) -> bool {
        if self.prog.options.contains(O::UCP) {
            skua_ucd::ucd::is_space(cp)
        } else {
            skua_ucd::DEFAULT_TABLES.is_ctype(cp, skua_ucd::tables::CTYPE_SPACE)
        }
    }
}

/// Count of `(start, end)` match pairs a DFA call produced.
pub fn match_count(md: &MatchData) -> usize {
    md.ovector()
        .chunks(2)
        .take_while(|pair| pair[0] != UNSET && pair[1] != UNSET)
        .count()
}
