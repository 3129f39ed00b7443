//! Code generator: parsed meta-tokens to the bytecode program.
//!
//! Two passes share one emission path: the sizing pass runs emission into
//! a throwaway buffer to learn the total length (which fixes the link
//! size), the second pass emits for real. The lengths must agree exactly;
//! a mismatch is an internal error, never a user one.
//!
//! Jump linkage is local: a group opener links forward to its first
//! alternation, alternations chain forward, and the closing ket links
//! back to the opener. Subroutine-call targets are patched in a single
//! post-pass once every capture group's offset is known.

use skua_asm::error::{CompileError, CompileErrorKind as E};
use skua_asm::link::{push_u16, read_u16, LinkSize};
use skua_asm::op::{eclass, xclass, Op};
use skua_asm::options::{CompileOptions as O, ExtraOptions as X, ProgramFlags};
use skua_asm::program::{NameTable, Program, MAGIC};
use skua_asm::{utf, walk, MAX_REPEAT};
use skua_ucd::FoldRules;

use crate::class::{self, ClassPlan, PlannedClass, RpnItem, SetOp};
use crate::context::CompileContext;
use crate::meta::{escape_from, split, Escape, Kind, ANY_RECURSION, REPEAT_UNLIMITED};
use crate::parse::Parsed;

/// Generate a program from parser output.
pub fn generate(
    pattern: &[u8],
    parsed: &Parsed,
    ctx: &CompileContext,
) -> Result<Program, CompileError> {
    let mut names = NameTable::default();
    for gn in &parsed.names {
        names.insert(gn.number, &gn.name);
    }
    for &(n, off) in &parsed.ref_sites {
        if n == 0 || n > parsed.top_group {
            return Err(CompileError::at(E::UnknownGroupNumber, off));
        }
    }

    // Sizing pass(es): grow the link width until the program fits it.
    let mut link = LinkSize::Two;
    let sized_len = loop {
        let mut gen = Gen::new(pattern, parsed, ctx, &names, link);
        gen.run()?;
        let len = gen.code.len();
        let needed = LinkSize::for_length(len);
        if needed.width() <= link.width() {
            break len;
        }
        link = needed;
    };
    if sized_len > ctx.max_program_length {
        return Err(CompileError::at(E::PatternTooLarge, 0));
    }

    // Emission pass.
    let mut gen = Gen::new(pattern, parsed, ctx, &names, link);
    gen.run()?;
    if gen.code.len() != sized_len {
        return Err(CompileError::at(
            E::Internal("sizing and emission passes disagree"),
            0,
        ));
    }

    let group_starts = collect_group_starts(&gen.code, parsed.top_group, link);
    patch_recursion_targets(&mut gen.code, &group_starts, link)?;

    let mut program = Program {
        magic: MAGIC,
        options: parsed.options,
        extra_options: ctx.extra_options,
        flags: parsed.flags | gen.flags,
        newline: parsed.newline,
        bsr: parsed.bsr,
        link_size: link,
        first_unit: None,
        start_bitmap: None,
        last_unit: None,
        min_length: 0,
        max_lookbehind: gen.max_lookbehind,
        top_bracket: parsed.top_group,
        top_backref: gen.top_backref,
        names: names.clone(),
        limits: parsed.limits,
        group_starts,
        code: gen.code,
    };
    crate::optimize::analyze(&mut program);
    Ok(program)
}

fn collect_group_starts(code: &[u8], top_group: u16, link: LinkSize) -> Vec<u32> {
    let mut starts = vec![0u32; top_group as usize + 1];
    let mut seen = vec![false; top_group as usize + 1];
    seen[0] = true;
    let mut pos = 0;
    while pos < code.len() {
        let op = Op::try_from(code[pos]).expect("valid program");
        if matches!(op, Op::CBra | Op::CBraPos) {
            let g = read_u16(code, pos + 1 + link.width()) as usize;
            if !seen[g] {
                seen[g] = true;
                starts[g] = pos as u32;
            }
        }
        if op == Op::End {
            break;
        }
        pos += walk::header_len(code, pos, link);
    }
    starts
}

fn patch_recursion_targets(
    code: &mut Vec<u8>,
    group_starts: &[u32],
    link: LinkSize,
) -> Result<(), CompileError> {
    let mut pos = 0;
    while pos < code.len() {
        let op = Op::try_from(code[pos]).expect("valid program");
        if op == Op::Recurse {
            let g = link.read(code, pos + 1);
            let target = group_starts
                .get(g)
                .copied()
                .ok_or(CompileError::at(E::Internal("unpatched recursion"), 0))?;
            link.write(code, pos + 1, target as usize);
        }
        if op == Op::End {
            break;
        }
        pos += walk::header_len(code, pos, link);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AtomKind {
    /// A single-character item that repeat opcodes can carry inline.
    Single,
    /// A group (or assertion) ending in a ket.
    Group,
    /// A backreference or subroutine call: wrapped in a group to repeat.
    Wrapped,
}

struct Gen<'a> {
    pattern: &'a [u8],
    tokens: &'a [u32],
    ctx: &'a CompileContext,
    names: &'a NameTable,
    link: LinkSize,
    options: O,
    code: Vec<u8>,
    open_captures: Vec<u16>,
    top_backref: u16,
    max_lookbehind: u16,
    flags: ProgramFlags,
    depth: u32,
}

impl<'a> Gen<'a> {
    fn new(
        pattern: &'a [u8],
        parsed: &'a Parsed,
        ctx: &'a CompileContext,
        names: &'a NameTable,
        link: LinkSize,
    ) -> Self {
        Gen {
            pattern,
            tokens: &parsed.tokens,
            ctx,
            names,
            link,
            options: parsed.options,
            code: Vec::with_capacity(parsed.tokens.len() * 4),
            open_captures: Vec::new(),
            top_backref: 0,
            max_lookbehind: 0,
            flags: ProgramFlags::empty(),
            depth: 0,
        }
    }

    fn run(&mut self) -> Result<(), CompileError> {
        let mut i = 0usize;
        self.emit_group(&mut i, Op::Bra, None, None, false)?;
        self.code.push(Op::End as u8);
        Ok(())
    }

    fn fold_rules(&self) -> FoldRules {
        FoldRules {
            turkish: self.ctx.extra_options.contains(X::TURKISH_CASING),
            ascii_restricted: self.ctx.extra_options.contains(X::CASELESS_RESTRICT),
        }
    }

    fn push_link_at(&mut self, value: usize) {
        self.link.push(&mut self.code, value);
    }

    fn patch_link(&mut self, pos: usize, value: usize) {
        self.link.write(&mut self.code, pos + 1, value);
    }

    /// Emit a group: opener, branches joined by `Alt`, closing ket.
    /// `cond` carries the condition opcode for `Op::Cond` groups;
    /// `lookbehind` prefixes every branch with a back-step.
    fn emit_group(
        &mut self,
        i: &mut usize,
        opener: Op,
        operand: Option<u16>,
        cond: Option<CondOp>,
        lookbehind: bool,
    ) -> Result<(), CompileError> {
        self.depth += 1;
        if self.depth > self.ctx.parens_nest_limit.saturating_mul(2) + 8 {
            self.depth -= 1;
            return Err(CompileError::at(E::NestingTooDeep, 0));
        }
        let start = self.code.len();
        self.code.push(opener as u8);
        self.push_link_at(0);
        if let Some(g) = operand {
            push_u16(&mut self.code, g);
            self.open_captures.push(g);
        }
        let max_branches = match cond {
            Some(CondOp::Define) => Some(1),
            Some(_) => Some(2),
            None => None,
        };
        if let Some(c) = cond {
            c.emit(self);
        }

        let mut last_link = start;
        let mut branches = 1u32;
        loop {
            let branch_start = self.code.len();
            self.emit_branch(i)?;
            if lookbehind {
                self.prefix_reverse(branch_start)?;
            }
            match split(self.tokens[*i]) {
                Some((Kind::Alt, _)) => {
                    *i += 1;
                    branches += 1;
                    if let Some(max) = max_branches {
                        if branches > max as u32 {
                            return Err(CompileError::at(E::TooManyConditionBranches, 0));
                        }
                    }
                    let here = self.code.len();
                    self.patch_link(last_link, here - last_link);
                    self.code.push(Op::Alt as u8);
                    self.push_link_at(0);
                    last_link = here;
                }
                Some((Kind::Ket, _)) | Some((Kind::End, _)) => {
                    *i += 1;
                    let here = self.code.len();
                    self.patch_link(last_link, here - last_link);
                    self.code.push(Op::Ket as u8);
                    self.push_link_at(here - start);
                    if operand.is_some() {
                        self.open_captures.pop();
                    }
                    self.depth -= 1;
                    return Ok(());
                }
                _ => {
                    return Err(CompileError::at(E::Internal("unterminated group"), 0));
                }
            }
        }
    }

    /// Prefix the branch emitted at `branch_start` with its back-step.
    fn prefix_reverse(&mut self, branch_start: usize) -> Result<(), CompileError> {
        let span = crate::optimize::char_span(&self.code[branch_start..], self.link)
            .ok_or(CompileError::at(E::LookbehindNotFixed, 0))?;
        let (min, max) = span;
        if max > self.ctx.max_varlookbehind as u32 && min != max {
            return Err(CompileError::at(E::LookbehindTooLong, 0));
        }
        if max > u16::MAX as u32 {
            return Err(CompileError::at(E::LookbehindTooLong, 0));
        }
        self.max_lookbehind = self.max_lookbehind.max(max as u16);
        let mut prefix = Vec::with_capacity(5);
        if min == max {
            prefix.push(Op::Reverse as u8);
            push_u16(&mut prefix, min as u16);
        } else {
            self.flags |= ProgramFlags::HAS_VARIABLE_LOOKBEHIND;
            prefix.push(Op::VReverse as u8);
            push_u16(&mut prefix, min as u16);
            push_u16(&mut prefix, max as u16);
        }
        self.code.splice(branch_start..branch_start, prefix);
        Ok(())
    }

    /// Emit items until an alternation or group-closing token.
    fn emit_branch(&mut self, i: &mut usize) -> Result<(), CompileError> {
        loop {
            let token = self.tokens[*i];
            let Some((kind, payload)) = split(token) else {
                // Literal character.
                *i += 1;
                let atom_start = self.code.len();
                self.char_atom(token);
                let atom = self.code.split_off(atom_start);
                self.apply_quantifier(i, atom, AtomKind::Single)?;
                continue;
            };
            match kind {
                Kind::Alt | Kind::Ket | Kind::End => return Ok(()),
                Kind::Options => {
                    let bits = self.tokens[*i + 1];
                    *i += 2;
                    self.options = O::from_bits_truncate(bits);
                }
                Kind::Circumflex => {
                    *i += 1;
                    let op = if self.options.contains(O::MULTILINE) { Op::CircM } else { Op::Circ };
                    self.code.push(op as u8);
                }
                Kind::Dollar => {
                    *i += 1;
                    let op = if self.options.contains(O::MULTILINE) {
                        Op::DollarM
                    } else {
                        Op::Dollar
                    };
                    self.code.push(op as u8);
                }
                Kind::Dot => {
                    *i += 1;
                    let op = if self.options.contains(O::DOTALL) { Op::AllAny } else { Op::AnyNoNl };
                    self.single_atom(i, op)?;
                }
                Kind::Escape => {
                    *i += 1;
                    self.escape_item(i, payload)?;
                }
                Kind::Prop | Kind::NotProp => {
                    *i += 1;
                    let atom_start = self.code.len();
                    let op = if kind == Kind::Prop { Op::Prop } else { Op::NotProp };
                    self.code.push(op as u8);
                    self.code.push((payload >> 8) as u8);
                    self.code.push(payload as u8);
                    let atom = self.code.split_off(atom_start);
                    self.apply_quantifier(i, atom, AtomKind::Single)?;
                }
                Kind::Class | Kind::ClassNot => {
                    let negated = kind == Kind::ClassNot;
                    let (planned, next) =
                        class::plan(self.tokens, *i + 1, negated, self.options, self.ctx)?;
                    *i = next;
                    let atom_start = self.code.len();
                    self.class_atom(&planned)?;
                    let atom = self.code.split_off(atom_start);
                    self.apply_quantifier(i, atom, AtomKind::Single)?;
                }
                Kind::ClassEmpty => {
                    *i += 1;
                    let atom_start = self.code.len();
                    self.code.push(Op::Class as u8);
                    self.code.extend_from_slice(&[0u8; 32]);
                    let atom = self.code.split_off(atom_start);
                    self.apply_quantifier(i, atom, AtomKind::Single)?;
                }
                Kind::ClassEmptyNot => {
                    *i += 1;
                    self.single_atom(i, Op::AllAny)?;
                }
                Kind::Backref => {
                    *i += 1;
                    self.top_backref = self.top_backref.max(payload);
                    let atom_start = self.code.len();
                    let op = if self.options.contains(O::CASELESS) { Op::RefI } else { Op::Ref };
                    self.code.push(op as u8);
                    push_u16(&mut self.code, payload);
                    let atom = self.code.split_off(atom_start);
                    self.apply_quantifier(i, atom, AtomKind::Wrapped)?;
                }
                Kind::BackrefByname => {
                    let off = self.tokens[*i + 1] as usize;
                    let len = self.tokens[*i + 2] as usize;
                    *i += 3;
                    let atom_start = self.code.len();
                    self.named_ref(off, len)?;
                    let atom = self.code.split_off(atom_start);
                    self.apply_quantifier(i, atom, AtomKind::Wrapped)?;
                }
                Kind::Recurse => {
                    let target = if payload == ANY_RECURSION {
                        let off = self.tokens[*i + 1] as usize;
                        let len = self.tokens[*i + 2] as usize;
                        *i += 3;
                        let name = &self.pattern[off..off + len];
                        let entries = self.names.find(name);
                        match entries.first() {
                            Some(e) => e.number,
                            None => return Err(CompileError::at(E::UnknownGroupName, off)),
                        }
                    } else {
                        *i += 1;
                        payload
                    };
                    let atom_start = self.code.len();
                    self.code.push(Op::Recurse as u8);
                    // Holds the group number until targets are patched.
                    self.push_link_at(target as usize);
                    let atom = self.code.split_off(atom_start);
                    self.apply_quantifier(i, atom, AtomKind::Wrapped)?;
                }
                Kind::Capture => {
                    *i += 1;
                    self.group_atom(i, Op::CBra, Some(payload), None, false)?;
                }
                Kind::Nocapture => {
                    *i += 1;
                    self.group_atom(i, Op::Bra, None, None, false)?;
                }
                Kind::Atomic => {
                    *i += 1;
                    self.group_atom(i, Op::Once, None, None, false)?;
                }
                Kind::ScriptRun => {
                    *i += 1;
                    self.group_atom(i, Op::ScriptRun, None, None, false)?;
                }
                Kind::Lookahead => {
                    *i += 1;
                    self.group_atom(i, Op::Assert, None, None, false)?;
                }
                Kind::LookaheadNot => {
                    *i += 1;
                    self.group_atom(i, Op::AssertNot, None, None, false)?;
                }
                Kind::LookaheadNa => {
                    *i += 1;
                    self.group_atom(i, Op::NaAssert, None, None, false)?;
                }
                Kind::Lookbehind => {
                    *i += 2;
                    self.group_atom(i, Op::AssertBack, None, None, true)?;
                }
                Kind::LookbehindNot => {
                    *i += 2;
                    self.group_atom(i, Op::AssertBackNot, None, None, true)?;
                }
                Kind::LookbehindNa => {
                    *i += 2;
                    self.group_atom(i, Op::NaAssertBack, None, None, true)?;
                }
                Kind::CondNumber => {
                    *i += 1;
                    self.group_atom(i, Op::Cond, None, Some(CondOp::Number(payload)), false)?;
                }
                Kind::CondRnumber => {
                    *i += 1;
                    self.group_atom(i, Op::Cond, None, Some(CondOp::Recursed(payload)), false)?;
                }
                Kind::CondDefine => {
                    *i += 1;
                    self.group_atom(i, Op::Cond, None, Some(CondOp::Define), false)?;
                }
                Kind::CondVersion => {
                    *i += 1;
                    self.group_atom(i, Op::Cond, None, Some(CondOp::Fixed(payload != 0)), false)?;
                }
                Kind::CondAssert => {
                    *i += 1;
                    self.group_atom(i, Op::Cond, None, Some(CondOp::Assertion), false)?;
                }
                Kind::CondName | Kind::CondRname => {
                    let off = self.tokens[*i + 1] as usize;
                    let len = self.tokens[*i + 2] as usize;
                    *i += 3;
                    let name = &self.pattern[off..off + len];
                    let (first, end) = self.names.find_range(name);
                    if first == end {
                        return Err(CompileError::at(E::UnknownGroupName, off));
                    }
                    let cond = if kind == Kind::CondName {
                        CondOp::Name(first as u16, (end - first) as u16)
                    } else {
                        CondOp::RecursedName(first as u16, (end - first) as u16)
                    };
                    self.group_atom(i, Op::Cond, None, Some(cond), false)?;
                }
                Kind::Mark | Kind::CommitArg | Kind::PruneArg | Kind::SkipArg | Kind::ThenArg => {
                    let off = self.tokens[*i + 1] as usize;
                    let len = self.tokens[*i + 2] as usize;
                    *i += 3;
                    let op = match kind {
                        Kind::Mark => Op::Mark,
                        Kind::CommitArg => Op::CommitArg,
                        Kind::PruneArg => Op::PruneArg,
                        Kind::SkipArg => Op::SkipArg,
                        _ => Op::ThenArg,
                    };
                    self.code.push(op as u8);
                    self.code.push(len as u8);
                    let slice = self.pattern[off..off + len].to_vec();
                    self.code.extend_from_slice(&slice);
                }
                Kind::Commit => {
                    *i += 1;
                    self.code.push(Op::Commit as u8);
                }
                Kind::Prune => {
                    *i += 1;
                    self.code.push(Op::Prune as u8);
                }
                Kind::Skip => {
                    *i += 1;
                    self.code.push(Op::Skip as u8);
                }
                Kind::Then => {
                    *i += 1;
                    self.code.push(Op::Then as u8);
                }
                Kind::Accept => {
                    *i += 1;
                    for g in self.open_captures.clone().iter().rev() {
                        self.code.push(Op::Close as u8);
                        push_u16(&mut self.code, *g);
                    }
                    self.code.push(Op::Accept as u8);
                }
                Kind::Fail => {
                    *i += 1;
                    self.code.push(Op::Fail as u8);
                }
                Kind::CalloutNumber => {
                    let number = payload;
                    let pat_off = self.tokens[*i + 1];
                    *i += 2;
                    self.code.push(Op::Callout as u8);
                    self.code.push(number as u8);
                    push_u16(&mut self.code, pat_off as u16);
                    push_u16(&mut self.code, 0);
                }
                Kind::CalloutString => {
                    let delim = self.tokens[*i + 1] as u8;
                    let off = self.tokens[*i + 2] as usize;
                    let len = self.tokens[*i + 3] as usize;
                    *i += 4;
                    // Collapse doubled delimiters.
                    let mut text = Vec::with_capacity(len);
                    let raw = &self.pattern[off..off + len];
                    let mut k = 0;
                    while k < raw.len() {
                        text.push(raw[k]);
                        if raw[k] == delim {
                            k += 1;
                        }
                        k += 1;
                    }
                    self.code.push(Op::CalloutStr as u8);
                    let body = 1 + 2 + text.len();
                    self.push_link_at(self.link.width() + body);
                    self.code.push(delim);
                    push_u16(&mut self.code, off as u16);
                    self.code.extend_from_slice(&text);
                }
                _ => {
                    return Err(CompileError::at(E::Internal("unexpected token"), 0));
                }
            }
        }
    }

    /// Emit a bare one-byte single-char op as a quantifiable atom.
    fn single_atom(&mut self, i: &mut usize, op: Op) -> Result<(), CompileError> {
        let atom_start = self.code.len();
        self.code.push(op as u8);
        let atom = self.code.split_off(atom_start);
        self.apply_quantifier(i, atom, AtomKind::Single)
    }

    fn escape_item(&mut self, i: &mut usize, payload: u16) -> Result<(), CompileError> {
        let e = escape_from(payload)
            .ok_or(CompileError::at(E::Internal("bad escape payload"), 0))?;
        let single = match e {
            Escape::DecDigit => Some(Op::Digit),
            Escape::NotDecDigit => Some(Op::NotDigit),
            Escape::Whitespace => Some(Op::Whitespace),
            Escape::NotWhitespace => Some(Op::NotWhitespace),
            Escape::WordChar => Some(Op::WordChar),
            Escape::NotWordChar => Some(Op::NotWordChar),
            Escape::HSpace => Some(Op::HSpace),
            Escape::NotHSpace => Some(Op::NotHSpace),
            Escape::VSpace => Some(Op::VSpace),
            Escape::NotVSpace => Some(Op::NotVSpace),
            Escape::AnyNewline => Some(Op::AnyNewline),
            Escape::Grapheme => Some(Op::ExtUni),
            Escape::CodeUnit => Some(Op::AnyByte),
            Escape::NotNewline => Some(Op::AnyNoNl),
            _ => None,
        };
        if let Some(op) = single {
            return self.single_atom(i, op);
        }
        let op = match e {
            Escape::SubjectStart => Op::Sod,
            Escape::SubjectEndNewline => Op::Eodn,
            Escape::SubjectEnd => Op::Eod,
            Escape::WordBoundary => Op::WordBoundary,
            Escape::NotWordBoundary => Op::NotWordBoundary,
            Escape::MatchStart => Op::Som,
            Escape::KeepOut => Op::SetSom,
            _ => return Err(CompileError::at(E::Internal("unhandled escape"), 0)),
        };
        self.code.push(op as u8);
        Ok(())
    }

    fn named_ref(&mut self, off: usize, len: usize) -> Result<(), CompileError> {
        let name = &self.pattern[off..off + len];
        let (first, end) = self.names.find_range(name);
        if first == end {
            return Err(CompileError::at(E::UnknownGroupName, off));
        }
        let caseless = self.options.contains(O::CASELESS);
        let entries = &self.names.entries()[first..end];
        if end - first == 1 {
            let n = entries[0].number;
            self.top_backref = self.top_backref.max(n);
            let op = if caseless { Op::RefI } else { Op::Ref };
            self.code.push(op as u8);
            push_u16(&mut self.code, n);
        } else {
            for e in entries {
                self.top_backref = self.top_backref.max(e.number);
            }
            let op = if caseless { Op::DnRefI } else { Op::DnRef };
            self.code.push(op as u8);
            push_u16(&mut self.code, first as u16);
            push_u16(&mut self.code, (end - first) as u16);
        }
        Ok(())
    }

    fn group_atom(
        &mut self,
        i: &mut usize,
        opener: Op,
        operand: Option<u16>,
        cond: Option<CondOp>,
        lookbehind: bool,
    ) -> Result<(), CompileError> {
        let saved_options = self.options;
        let atom_start = self.code.len();
        self.emit_group(i, opener, operand, cond, lookbehind)?;
        self.options = saved_options;
        let atom = self.code.split_off(atom_start);
        self.apply_quantifier(i, atom, AtomKind::Group)
    }

    // ---- quantifier application --------------------------------------

    fn apply_quantifier(
        &mut self,
        i: &mut usize,
        atom: Vec<u8>,
        kind: AtomKind,
    ) -> Result<(), CompileError> {
        let (q, min, max) = match split(self.tokens[*i]) {
            Some((k @ (Kind::Asterisk | Kind::AsteriskQuery | Kind::AsteriskPlus), _)) => {
                *i += 1;
                (k, 0, REPEAT_UNLIMITED)
            }
            Some((k @ (Kind::Plus | Kind::PlusQuery | Kind::PlusPlus), _)) => {
                *i += 1;
                (k, 1, REPEAT_UNLIMITED)
            }
            Some((k @ (Kind::Query | Kind::QueryQuery | Kind::QueryPlus), _)) => {
                *i += 1;
                (k, 0, 1)
            }
            Some((k @ (Kind::Minmax | Kind::MinmaxQuery | Kind::MinmaxPlus), _)) => {
                let min = self.tokens[*i + 1];
                let max = self.tokens[*i + 2];
                *i += 3;
                (k, min, max)
            }
            _ => {
                self.code.extend_from_slice(&atom);
                return Ok(());
            }
        };

        let lazy = matches!(
            q,
            Kind::AsteriskQuery | Kind::PlusQuery | Kind::QueryQuery | Kind::MinmaxQuery
        );
        let possessive = matches!(
            q,
            Kind::AsteriskPlus | Kind::PlusPlus | Kind::QueryPlus | Kind::MinmaxPlus
        );

        let atom = match kind {
            AtomKind::Single => return self.repeat_single(atom, min, max, lazy, possessive),
            AtomKind::Wrapped => {
                // Bracket the item so the group machinery can repeat it.
                let mut wrapped = Vec::with_capacity(atom.len() + 2 * (2 + self.link.width()));
                wrapped.push(Op::Bra as u8);
                self.link.push(&mut wrapped, 0);
                wrapped.extend_from_slice(&atom);
                let ket_at = wrapped.len();
                self.link.write(&mut wrapped, 1, ket_at);
                wrapped.push(Op::Ket as u8);
                self.link.push(&mut wrapped, ket_at);
                wrapped
            }
            AtomKind::Group => atom,
        };
        self.repeat_group(atom, min, max, lazy, possessive)
    }

    fn repeat_single(
        &mut self,
        atom: Vec<u8>,
        min: u32,
        max: u32,
        lazy: bool,
        possessive: bool,
    ) -> Result<(), CompileError> {
        let pick = |plain: Op, lz: Op, pos: Op| {
            if possessive {
                pos
            } else if lazy {
                lz
            } else {
                plain
            }
        };
        if max == REPEAT_UNLIMITED {
            if min > 0 {
                if min > 1 {
                    self.code.push(Op::Exact as u8);
                    push_u16(&mut self.code, (min - 1) as u16);
                    self.code.extend_from_slice(&atom);
                }
                self.code.push(pick(Op::Plus, Op::MinPlus, Op::PosPlus) as u8);
                self.code.extend_from_slice(&atom);
            } else {
                self.code.push(pick(Op::Star, Op::MinStar, Op::PosStar) as u8);
                self.code.extend_from_slice(&atom);
            }
            return Ok(());
        }
        debug_assert!(max <= MAX_REPEAT);
        if min > 0 {
            if min == max {
                self.code.push(Op::Exact as u8);
                push_u16(&mut self.code, min as u16);
                self.code.extend_from_slice(&atom);
                return Ok(());
            }
            self.code.push(Op::Exact as u8);
            push_u16(&mut self.code, min as u16);
            self.code.extend_from_slice(&atom);
        }
        if max > min {
            let extra = (max - min) as u16;
            if extra == 1 {
                self.code.push(pick(Op::Query, Op::MinQuery, Op::PosQuery) as u8);
                self.code.extend_from_slice(&atom);
            } else {
                self.code.push(pick(Op::Upto, Op::MinUpto, Op::PosUpto) as u8);
                push_u16(&mut self.code, extra);
                self.code.extend_from_slice(&atom);
            }
        } else if min == 0 {
            // {0}: match nothing.
        }
        Ok(())
    }

    /// Repeat a group atom by rewriting its opener/ket and unrolling
    /// bounded counts with nested optional copies.
    fn repeat_group(
        &mut self,
        atom: Vec<u8>,
        min: u32,
        max: u32,
        lazy: bool,
        possessive: bool,
    ) -> Result<(), CompileError> {
        let once_start = if possessive && !(min == 0 && max == REPEAT_UNLIMITED)
            && !(min == 1 && max == REPEAT_UNLIMITED)
            && !(min == 0 && max == 1)
        {
            // General possessive bounds wrap in an atomic group.
            let at = self.code.len();
            self.code.push(Op::Once as u8);
            self.push_link_at(0);
            Some(at)
        } else {
            None
        };

        match (min, max) {
            (0, 0) => {
                self.code.push(Op::SkipZero as u8);
                self.code.extend_from_slice(&atom);
            }
            (0, 1) => {
                let zero = if lazy { Op::BraMinZero } else { Op::BraZero };
                self.code.push(zero as u8);
                let mut a = atom;
                if possessive {
                    self.make_possessive(&mut a);
                }
                self.code.extend_from_slice(&a);
            }
            (0, REPEAT_UNLIMITED) => {
                let zero = if lazy { Op::BraMinZero } else { Op::BraZero };
                self.code.push(zero as u8);
                let mut a = atom;
                if possessive {
                    self.make_possessive(&mut a);
                } else {
                    self.set_ket(&mut a, if lazy { Op::KetRmin } else { Op::KetRmax });
                }
                self.code.extend_from_slice(&a);
            }
            (1, REPEAT_UNLIMITED) => {
                let mut a = atom;
                if possessive {
                    self.make_possessive(&mut a);
                } else {
                    self.set_ket(&mut a, if lazy { Op::KetRmin } else { Op::KetRmax });
                }
                self.code.extend_from_slice(&a);
            }
            (n, m) if m == REPEAT_UNLIMITED => {
                for _ in 0..n - 1 {
                    self.code.extend_from_slice(&atom);
                }
                let mut a = atom;
                self.set_ket(&mut a, if lazy { Op::KetRmin } else { Op::KetRmax });
                self.code.extend_from_slice(&a);
            }
            (n, m) => {
                for _ in 0..n {
                    self.code.extend_from_slice(&atom);
                }
                let optional = self.nested_optional(&atom, (m - n) as usize, lazy);
                self.code.extend_from_slice(&optional);
            }
        }

        if let Some(at) = once_start {
            let here = self.code.len();
            self.patch_link(at, here - at);
            self.code.push(Op::Ket as u8);
            self.push_link_at(here - at);
        }
        Ok(())
    }

    /// Build `k` nested optional copies: each later copy sits inside the
    /// previous one, just before its closing ket.
    fn nested_optional(&self, atom: &[u8], k: usize, lazy: bool) -> Vec<u8> {
        if k == 0 {
            return Vec::new();
        }
        let inner = self.nested_optional(atom, k - 1, lazy);
        let link = self.link;
        let ket_len = 1 + link.width();
        let ket_at = atom.len() - ket_len;

        // Last hop of the alternation chain, found in the original copy
        // before any insertion moves the ket.
        let mut last_hop = 0;
        loop {
            let next = last_hop + link.read(atom, last_hop + 1);
            if next == ket_at {
                break;
            }
            last_hop = next;
        }

        let mut out = Vec::with_capacity(1 + atom.len() + inner.len());
        out.push(if lazy { Op::BraMinZero } else { Op::BraZero } as u8);
        out.extend_from_slice(&atom[..ket_at]);
        out.extend_from_slice(&inner);
        out.extend_from_slice(&atom[ket_at..]);

        let grown = inner.len();
        if grown > 0 {
            // Stretch the final hop and the ket's back link over the
            // inserted copy. Positions shift by one for the zero prefix.
            let new_ket = ket_at + grown;
            link.write(&mut out, 1 + last_hop + 1, new_ket - last_hop);
            link.write(&mut out, 1 + new_ket + 1, new_ket);
        }
        out
    }

    fn set_ket(&self, atom: &mut [u8], ket: Op) {
        let at = atom.len() - 1 - self.link.width();
        debug_assert!(matches!(
            Op::try_from(atom[at]).expect("valid group"),
            Op::Ket | Op::KetRmax | Op::KetRmin | Op::KetRpos
        ));
        atom[at] = ket as u8;
    }

    fn make_possessive(&self, atom: &mut [u8]) {
        match Op::try_from(atom[0]).expect("valid group") {
            Op::Bra => atom[0] = Op::BraPos as u8,
            Op::CBra => atom[0] = Op::CBraPos as u8,
            // Atomic and assertion groups need no possessive close.
            _ => return,
        }
        self.set_ket(atom, Op::KetRpos);
    }

    // ---- atoms --------------------------------------------------------

    fn char_atom(&mut self, cp: u32) {
        let caseless = self.options.contains(O::CASELESS) && self.char_has_case(cp);
        let op = if caseless { Op::CharI } else { Op::Char };
        self.code.push(op as u8);
        if self.options.contains(O::UTF) {
            let mut buf = [0u8; 4];
            let n = utf::encode(cp, &mut buf);
            self.code.push(n as u8);
            self.code.extend_from_slice(&buf[..n]);
        } else {
            self.code.push(1);
            self.code.push(cp as u8);
        }
    }

    fn char_has_case(&self, cp: u32) -> bool {
        if self.options.intersects(O::UTF | O::UCP) {
            let (_, n) = self.fold_rules().partners(cp);
            n > 0
        } else {
            cp < 256 && self.ctx.tables.flip[cp as usize] as u32 != cp
        }
    }

    fn class_atom(&mut self, planned: &PlannedClass) -> Result<(), CompileError> {
        if let Some(plan) = planned.simple() {
            return self.simple_class(plan);
        }
        // Extended class: serialise the postfix expression.
        let mut body = Vec::new();
        for item in &planned.rpn {
            match item {
                RpnItem::Operand(p) => {
                    let block = serialize_class_body(p);
                    body.push(eclass::PUSH);
                    body.extend_from_slice(&(block.len() as u16).to_le_bytes());
                    body.extend_from_slice(&block);
                }
                RpnItem::Op(SetOp::And) => body.push(eclass::AND),
                RpnItem::Op(SetOp::Or) => body.push(eclass::OR),
                RpnItem::Op(SetOp::Sub) => body.push(eclass::SUB),
                RpnItem::Op(SetOp::Xor) => body.push(eclass::XOR),
            }
        }
        if planned.negated_expression {
            body.push(eclass::NOT);
        }
        self.code.push(Op::EClass as u8);
        self.push_link_at(self.link.width() + body.len());
        self.code.extend_from_slice(&body);
        Ok(())
    }

    fn simple_class(&mut self, plan: &ClassPlan) -> Result<(), CompileError> {
        let wideless = plan.wide.is_empty() && plan.props.is_empty();
        if wideless {
            if plan.negated {
                if let Some(cp) = single_member(plan) {
                    let caseless =
                        self.options.contains(O::CASELESS) && self.char_has_case(cp);
                    let op = if caseless { Op::NotI } else { Op::Not };
                    self.code.push(op as u8);
                    if self.options.contains(O::UTF) {
                        let mut buf = [0u8; 4];
                        let n = utf::encode(cp, &mut buf);
                        self.code.push(n as u8);
                        self.code.extend_from_slice(&buf[..n]);
                    } else {
                        self.code.push(1);
                        self.code.push(cp as u8);
                    }
                    return Ok(());
                }
                self.code.push(Op::NClass as u8);
                for b in plan.bitmap {
                    self.code.push(!b);
                }
            } else {
                self.code.push(Op::Class as u8);
                self.code.extend_from_slice(&plan.bitmap);
            }
            return Ok(());
        }
        let body = serialize_class_body(plan);
        self.code.push(Op::XClass as u8);
        self.push_link_at(self.link.width() + body.len());
        self.code.extend_from_slice(&body);
        Ok(())
    }
}

/// The serialised `[flags][bitmap?][items…]` body shared by `XClass` and
/// extended-class operands.
fn serialize_class_body(plan: &ClassPlan) -> Vec<u8> {
    let mut out = Vec::with_capacity(40);
    let mut flags = 0u8;
    if plan.negated {
        flags |= xclass::FLAG_NEGATED;
    }
    if plan.has_low_bits() {
        flags |= xclass::FLAG_HAS_MAP;
    }
    if plan.matches_all_wide() {
        flags |= xclass::FLAG_ALL_WIDE;
    }
    out.push(flags);
    if flags & xclass::FLAG_HAS_MAP != 0 {
        out.extend_from_slice(&plan.bitmap);
    }
    if flags & xclass::FLAG_ALL_WIDE == 0 {
        for &(lo, hi) in &plan.wide {
            out.push(xclass::ITEM_RANGE);
            out.extend_from_slice(&lo.to_le_bytes());
            out.extend_from_slice(&hi.to_le_bytes());
        }
        for &(neg, p) in &plan.props {
            out.push(if neg { xclass::ITEM_NOTPROP } else { xclass::ITEM_PROP });
            let (k, v) = skua_asm::prop::encode(p);
            out.push(k);
            out.push(v);
        }
    }
    out
}

fn single_member(plan: &ClassPlan) -> Option<u32> {
    let mut found = None;
    for cp in 0..256u32 {
        if plan.bitmap[(cp >> 3) as usize] & (1 << (cp & 7)) != 0 {
            if found.is_some() {
                return None;
            }
            found = Some(cp);
        }
    }
    found
}

/// Condition opcodes inside `Op::Cond` groups.
#[derive(Debug, Clone, Copy)]
enum CondOp {
    Number(u16),
    Name(u16, u16),
    Recursed(u16),
    RecursedName(u16, u16),
    Define,
    Fixed(bool),
    Assertion,
}

impl CondOp {
    fn emit(self, gen: &mut Gen<'_>) {
        match self {
            CondOp::Number(n) => {
                gen.code.push(Op::Cref as u8);
                push_u16(&mut gen.code, n);
            }
            CondOp::Name(first, count) => {
                gen.code.push(Op::DnCref as u8);
                push_u16(&mut gen.code, first);
                push_u16(&mut gen.code, count);
            }
            CondOp::Recursed(n) => {
                gen.code.push(Op::RRef as u8);
                push_u16(&mut gen.code, n);
            }
            CondOp::RecursedName(first, count) => {
                gen.code.push(Op::DnRRef as u8);
                push_u16(&mut gen.code, first);
                push_u16(&mut gen.code, count);
            }
            CondOp::Define | CondOp::Fixed(false) => gen.code.push(Op::False as u8),
            CondOp::Fixed(true) => gen.code.push(Op::True as u8),
            CondOp::Assertion => {}
        }
    }
}
