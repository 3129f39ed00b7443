//! Static analysis of emitted code: auto-possessification, minimum match
//! length, start-of-match hints (first unit, start bitmap, anchoring,
//! first-line restriction) and the required trailing literal.

use skua_asm::link::{read_u16, LinkSize};
use skua_asm::op::{xclass, Op};
use skua_asm::options::{CompileOptions as O, ExtraOptions as X, ProgramFlags};
use skua_asm::program::{Program, UnitHint};
use skua_asm::{utf, walk};
use skua_ucd::tables::{CTYPE_DIGIT, CTYPE_SPACE, CTYPE_WORD};
use skua_ucd::{is_hspace, is_vspace, FoldRules, DEFAULT_TABLES};

/// Run every enabled analysis over a freshly generated program.
pub fn analyze(program: &mut Program) {
    if !program.options.contains(O::NO_AUTO_POSSESS) {
        auto_possess(program);
    }

    let min = min_length(&program.code, 0, program.link_size, 0).min(u16::MAX as u32);
    program.min_length = min;
    if min == 0 {
        program.flags |= ProgramFlags::MATCH_EMPTY;
    }

    if !program.options.contains(O::NO_START_OPTIMIZE) {
        start_scan(program);
        last_literal(program);
    }
}

// ---- lookbehind sizing (shared with the generator) ---------------------

/// Characters consumed by a branch fragment: `(min, max)`, or `None` when
/// the fragment has no computable bound (unbounded repeats, references,
/// recursion, grapheme clusters).
pub(crate) fn char_span(code: &[u8], link: LinkSize) -> Option<(u32, u32)> {
    let mut pos = 0;
    let mut min = 0u32;
    let mut max = 0u32;
    while pos < code.len() {
        let op = Op::try_from(code[pos]).ok()?;
        match op {
            Op::Char | Op::CharI | Op::Not | Op::NotI | Op::AnyNoNl | Op::AllAny
            | Op::AnyByte | Op::Digit | Op::NotDigit | Op::Whitespace | Op::NotWhitespace
            | Op::WordChar | Op::NotWordChar | Op::HSpace | Op::NotHSpace | Op::VSpace
            | Op::NotVSpace | Op::Prop | Op::NotProp | Op::Class | Op::NClass
            | Op::XClass | Op::EClass => {
                min += 1;
                max += 1;
                pos += walk::header_len(code, pos, link);
            }
            Op::AnyNewline => {
                min += 1;
                max += 2;
                pos += 1;
            }
            Op::ExtUni | Op::Ref | Op::RefI | Op::DnRef | Op::DnRefI | Op::Recurse => {
                return None;
            }
            Op::Exact => {
                let n = read_u16(code, pos + 1) as u32;
                let header = walk::header_len(code, pos, link);
                let item = walk::item_len(code, pos + header, link);
                let (imin, imax) = char_span(&code[pos + header..pos + header + item], link)?;
                min += n * imin;
                max += n * imax;
                pos += header + item;
            }
            Op::Upto | Op::MinUpto | Op::PosUpto => {
                let n = read_u16(code, pos + 1) as u32;
                let header = walk::header_len(code, pos, link);
                let item = walk::item_len(code, pos + header, link);
                let (_, imax) = char_span(&code[pos + header..pos + header + item], link)?;
                max += n * imax;
                pos += header + item;
            }
            Op::Query | Op::MinQuery | Op::PosQuery => {
                let header = 1;
                let item = walk::item_len(code, pos + header, link);
                let (_, imax) = char_span(&code[pos + header..pos + header + item], link)?;
                max += imax;
                pos += header + item;
            }
            Op::Star | Op::MinStar | Op::PosStar | Op::Plus | Op::MinPlus | Op::PosPlus => {
                return None;
            }
            Op::Bra | Op::CBra | Op::BraPos | Op::CBraPos | Op::Once | Op::ScriptRun
            | Op::Cond => {
                let (gmin, gmax, end) = group_span(code, pos, link)?;
                min += gmin;
                max += gmax;
                pos = end;
            }
            Op::BraZero | Op::BraMinZero => {
                let (_, gmax, end) = group_span(code, pos + 1, link)?;
                max += gmax;
                pos = end;
            }
            Op::SkipZero => {
                pos = walk::skip_group(code, pos + 1, link);
            }
            Op::Assert | Op::AssertNot | Op::AssertBack | Op::AssertBackNot | Op::NaAssert
            | Op::NaAssertBack => {
                pos = walk::skip_group(code, pos, link);
            }
            Op::Circ | Op::CircM | Op::Dollar | Op::DollarM | Op::Sod | Op::Som | Op::Eodn
            | Op::Eod | Op::WordBoundary | Op::NotWordBoundary | Op::SetSom | Op::Mark
            | Op::Commit | Op::CommitArg | Op::Prune | Op::PruneArg | Op::Skip
            | Op::SkipArg | Op::Then | Op::ThenArg | Op::Fail | Op::Callout
            | Op::CalloutStr | Op::Close | Op::Cref | Op::DnCref | Op::RRef | Op::DnRRef
            | Op::False | Op::True | Op::Reverse | Op::VReverse => {
                pos += walk::header_len(code, pos, link);
            }
            Op::Accept => return None,
            _ => return None,
        }
    }
    Some((min, max))
}

/// Span of a whole group including its alternation; `None` when any
/// branch is unbounded or the group repeats.
fn group_span(code: &[u8], start: usize, link: LinkSize) -> Option<(u32, u32, usize)> {
    let header = walk::header_len(code, start, link);
    let mut branch_start = start + header;
    let mut p = start;
    let mut min = u32::MAX;
    let mut max = 0u32;
    loop {
        let next = p + link.read(code, p + 1);
        let (bmin, bmax) = char_span(&code[branch_start..next], link)?;
        min = min.min(bmin);
        max = max.max(bmax);
        match Op::try_from(code[next]).ok()? {
            Op::Alt => {
                p = next;
                branch_start = next + 1 + link.width();
            }
            Op::Ket => return Some((min, max, next + 1 + link.width())),
            Op::KetRmax | Op::KetRmin | Op::KetRpos => return None,
            _ => return None,
        }
    }
}

// ---- minimum length ----------------------------------------------------

/// Sound lower bound, in characters, on the length of any match of the
/// branch sequence starting at `pos` (a group opener). Recursion depth is
/// bounded; unknown constructs contribute zero.
fn min_length(code: &[u8], pos: usize, link: LinkSize, depth: u32) -> u32 {
    if depth > 32 {
        return 0;
    }
    group_min(code, pos, link, depth).unwrap_or(0)
}

fn group_min(code: &[u8], start: usize, link: LinkSize, depth: u32) -> Option<u32> {
    let header = walk::header_len(code, start, link);
    let mut branch_start = start + header;
    let mut p = start;
    let mut min: Option<u32> = None;
    loop {
        let next = p + link.read(code, p + 1);
        if let Some(b) = branch_min(code, branch_start, next, link, depth) {
            min = Some(min.map_or(b, |m: u32| m.min(b)));
        }
        match Op::try_from(code[next]).ok()? {
            Op::Alt => {
                p = next;
                branch_start = next + 1 + link.width();
            }
            _ => return min,
        }
    }
}

/// Minimum characters for one branch; `None` when the branch cannot match
/// at all (`(*FAIL)`).
fn branch_min(code: &[u8], mut pos: usize, end: usize, link: LinkSize, depth: u32) -> Option<u32> {
    let mut sum = 0u32;
    while pos < end {
        let op = Op::try_from(code[pos]).ok()?;
        match op {
            Op::Char | Op::CharI | Op::Not | Op::NotI | Op::AnyNoNl | Op::AllAny
            | Op::AnyByte | Op::Digit | Op::NotDigit | Op::Whitespace | Op::NotWhitespace
            | Op::WordChar | Op::NotWordChar | Op::HSpace | Op::NotHSpace | Op::VSpace
            | Op::NotVSpace | Op::Prop | Op::NotProp | Op::Class | Op::NClass
            | Op::XClass | Op::EClass | Op::AnyNewline | Op::ExtUni => {
                sum = sum.saturating_add(1);
                pos += walk::header_len(code, pos, link);
            }
            Op::Exact | Op::Plus | Op::MinPlus | Op::PosPlus => {
                let n = if op == Op::Exact { read_u16(code, pos + 1) as u32 } else { 1 };
                let header = walk::header_len(code, pos, link);
                let item = walk::item_len(code, pos + header, link);
                let per = branch_min(code, pos + header, pos + header + item, link, depth)
                    .unwrap_or(0);
                sum = sum.saturating_add(n.saturating_mul(per));
                pos += header + item;
            }
            Op::Star | Op::MinStar | Op::PosStar | Op::Query | Op::MinQuery | Op::PosQuery
            | Op::Upto | Op::MinUpto | Op::PosUpto => {
                pos += walk::item_len(code, pos, link);
            }
            Op::Bra | Op::CBra | Op::BraPos | Op::CBraPos | Op::Once | Op::ScriptRun
            | Op::Cond => {
                let g = group_min(code, pos, link, depth + 1);
                sum = sum.saturating_add(g.unwrap_or(0));
                pos = walk::skip_group(code, pos, link);
            }
            Op::BraZero | Op::BraMinZero | Op::SkipZero => {
                pos = walk::skip_group(code, pos + 1, link);
            }
            Op::Assert | Op::AssertNot | Op::AssertBack | Op::AssertBackNot | Op::NaAssert
            | Op::NaAssertBack => {
                pos = walk::skip_group(code, pos, link);
            }
            Op::Accept => return Some(sum),
            Op::Fail => return None,
            Op::Ref | Op::RefI | Op::DnRef | Op::DnRefI | Op::Recurse => {
                pos += walk::header_len(code, pos, link);
            }
            _ => {
                pos += walk::header_len(code, pos, link);
            }
        }
    }
    Some(sum)
}

// ---- start-of-match hints ---------------------------------------------

struct StartScan<'a> {
    program: &'a Program,
    bitmap: [u8; 32],
    usable: bool,
    anchored: bool,
    startline: bool,
    first: FirstUnit,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum FirstUnit {
    Unset,
    Unit(UnitHint),
    Conflict,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// The branch pinned down its first character (or was proven anchored).
    Done,
    /// Zero-width so far; scanning continues with the next item.
    Continue,
    /// No useful information can be derived.
    Unknown,
}

fn start_scan(program: &mut Program) {
    let mut scan = StartScan {
        program,
        bitmap: [0u8; 32],
        usable: true,
        anchored: true,
        startline: true,
        first: FirstUnit::Unset,
    };
    let flow = scan.group(0);
    if flow == Flow::Unknown {
        scan.usable = false;
        scan.anchored = false;
        scan.startline = false;
    }
    let usable = scan.usable;
    let anchored = scan.anchored;
    let startline = scan.startline;
    let bitmap = scan.bitmap;
    let first = scan.first;

    if anchored {
        program.flags |= ProgramFlags::ANCHORED;
    } else if startline {
        program.flags |= ProgramFlags::FIRSTLINE_ONLY;
    }
    if !anchored && usable {
        if let FirstUnit::Unit(hint) = first {
            program.first_unit = Some(hint);
        }
        if program.first_unit.is_none() && bitmap.iter().any(|&b| b != 0) {
            program.start_bitmap = Some(bitmap);
        }
    }
}

impl<'a> StartScan<'a> {
    fn set(&mut self, unit: u8) {
        self.bitmap[(unit >> 3) as usize] |= 1 << (unit & 7);
    }

    fn set_range(&mut self, lo: u8, hi: u8) {
        for u in lo..=hi {
            self.set(u);
        }
    }

    fn note_first(&mut self, hint: UnitHint) {
        self.first = match self.first {
            FirstUnit::Unset => FirstUnit::Unit(hint),
            FirstUnit::Unit(h) if h == hint => self.first,
            _ => FirstUnit::Conflict,
        };
    }

    fn utf(&self) -> bool {
        self.program.options.contains(O::UTF)
    }

    fn rules(&self) -> FoldRules {
        FoldRules {
            turkish: self.program.extra_options.contains(X::TURKISH_CASING),
            ascii_restricted: self.program.extra_options.contains(X::CASELESS_RESTRICT),
        }
    }

    /// Scan a group's branches; every branch must resolve.
    fn group(&mut self, start: usize) -> Flow {
        let prog = self.program;
        let code = &prog.code;
        let link = self.program.link_size;
        let header = walk::header_len(code, start, link);
        let mut branch_start = start + header;
        let mut p = start;
        let mut out = Flow::Done;
        loop {
            let next = p + link.read(code, p + 1);
            match self.branch(branch_start, next) {
                Flow::Done => {}
                Flow::Continue => out = Flow::Continue,
                Flow::Unknown => return Flow::Unknown,
            }
            match Op::try_from(code[next]).expect("valid program") {
                Op::Alt => {
                    p = next;
                    branch_start = next + 1 + link.width();
                }
                _ => return out,
            }
        }
    }

    fn branch(&mut self, mut pos: usize, end: usize) -> Flow {
        let prog = self.program;
        let code = &prog.code;
        let link = self.program.link_size;
        let mut at_branch_head = true;
        while pos < end {
            let op = Op::try_from(code[pos]).expect("valid program");
            match op {
                // The branch can only match at the attempt start.
                Op::Circ | Op::Sod | Op::Som => return Flow::Done,
                Op::CircM => {
                    self.anchored = false;
                    return Flow::Done;
                }
                Op::Char | Op::CharI => {
                    self.anchored = false;
                    self.startline = false;
                    return self.char_item(pos, op == Op::CharI);
                }
                Op::Class | Op::NClass | Op::XClass => {
                    self.anchored = false;
                    self.startline = false;
                    self.class_units(pos, op);
                    self.first = FirstUnit::Conflict;
                    return Flow::Done;
                }
                Op::Digit | Op::NotDigit | Op::Whitespace | Op::NotWhitespace
                | Op::WordChar | Op::NotWordChar | Op::HSpace | Op::NotHSpace
                | Op::VSpace | Op::NotVSpace | Op::Prop | Op::NotProp => {
                    self.anchored = false;
                    self.startline = false;
                    self.type_units(pos, op);
                    self.first = FirstUnit::Conflict;
                    return Flow::Done;
                }
                Op::Star | Op::MinStar | Op::PosStar => {
                    // A leading .* anchors (DOTALL) or pins to line starts.
                    let item = pos + 1;
                    let item_op = Op::try_from(code[item]).expect("valid program");
                    if at_branch_head
                        && !self.program.options.contains(O::NO_DOTSTAR_ANCHOR)
                        && item_op == Op::AllAny
                    {
                        return Flow::Done;
                    }
                    if at_branch_head
                        && item_op == Op::AnyNoNl
                        && !self.program.options.contains(O::MULTILINE)
                        && !self.program.options.contains(O::NO_DOTSTAR_ANCHOR)
                    {
                        self.anchored = false;
                        return Flow::Done;
                    }
                    self.anchored = false;
                    self.startline = false;
                    match self.optional_item(item) {
                        Flow::Unknown => return Flow::Unknown,
                        _ => {
                            pos += walk::item_len(code, pos, link);
                            at_branch_head = false;
                        }
                    }
                }
                Op::Query | Op::MinQuery | Op::PosQuery | Op::Upto | Op::MinUpto
                | Op::PosUpto => {
                    self.anchored = false;
                    self.startline = false;
                    let header = walk::header_len(code, pos, link);
                    match self.optional_item(pos + header) {
                        Flow::Unknown => return Flow::Unknown,
                        _ => {
                            pos += walk::item_len(code, pos, link);
                            at_branch_head = false;
                        }
                    }
                }
                Op::Plus | Op::MinPlus | Op::PosPlus | Op::Exact => {
                    self.anchored = false;
                    self.startline = false;
                    let header = walk::header_len(code, pos, link);
                    return match self.optional_item(pos + header) {
                        Flow::Unknown => Flow::Unknown,
                        _ => {
                            self.first = FirstUnit::Conflict;
                            Flow::Done
                        }
                    };
                }
                Op::Bra | Op::CBra | Op::BraPos | Op::CBraPos | Op::Once | Op::ScriptRun
                | Op::Cond => {
                    self.anchored = false;
                    self.startline = false;
                    match self.group(pos) {
                        Flow::Done => return Flow::Done,
                        Flow::Continue => {
                            pos = walk::skip_group(code, pos, link);
                            at_branch_head = false;
                        }
                        Flow::Unknown => return Flow::Unknown,
                    }
                }
                Op::BraZero | Op::BraMinZero => {
                    self.anchored = false;
                    self.startline = false;
                    match self.group(pos + 1) {
                        Flow::Unknown => return Flow::Unknown,
                        _ => {
                            pos = walk::skip_group(code, pos + 1, link);
                            at_branch_head = false;
                        }
                    }
                }
                Op::SkipZero => {
                    pos = walk::skip_group(code, pos + 1, link);
                }
                Op::Assert => {
                    // A leading positive lookahead pins the first unit.
                    match self.group(pos) {
                        Flow::Done => return Flow::Done,
                        _ => {
                            pos = walk::skip_group(code, pos, link);
                            at_branch_head = false;
                        }
                    }
                }
                Op::AssertNot | Op::AssertBack | Op::AssertBackNot | Op::NaAssert
                | Op::NaAssertBack => {
                    pos = walk::skip_group(code, pos, link);
                    at_branch_head = false;
                }
                Op::SetSom | Op::WordBoundary | Op::NotWordBoundary | Op::Dollar
                | Op::DollarM | Op::Eod | Op::Eodn | Op::Mark | Op::Commit | Op::CommitArg
                | Op::Prune | Op::PruneArg | Op::Skip | Op::SkipArg | Op::Then
                | Op::ThenArg | Op::Callout | Op::CalloutStr | Op::Close | Op::Cref
                | Op::DnCref | Op::RRef | Op::DnRRef | Op::False | Op::True => {
                    pos += walk::header_len(code, pos, link);
                }
                Op::Fail => return Flow::Done,
                _ => return Flow::Unknown,
            }
        }
        Flow::Continue
    }

    /// Add the units of an optional single item, keeping the scan going.
    fn optional_item(&mut self, pos: usize) -> Flow {
        let prog = self.program;
        let code = &prog.code;
        let op = Op::try_from(code[pos]).expect("valid program");
        match op {
            Op::Char | Op::CharI => {
                self.char_units(pos, op == Op::CharI);
                Flow::Continue
            }
            Op::Class | Op::NClass | Op::XClass => {
                self.class_units(pos, op);
                Flow::Continue
            }
            Op::Digit | Op::NotDigit | Op::Whitespace | Op::NotWhitespace | Op::WordChar
            | Op::NotWordChar | Op::HSpace | Op::NotHSpace | Op::VSpace | Op::NotVSpace
            | Op::Prop | Op::NotProp => {
                self.type_units(pos, op);
                Flow::Continue
            }
            _ => Flow::Unknown,
        }
    }

    fn char_item(&mut self, pos: usize, caseless: bool) -> Flow {
        self.char_units(pos, caseless);
        let prog = self.program;
        let code = &prog.code;
        let unit = code[pos + 2];
        if caseless {
            // A caseless hint is only sound when every case partner is
            // ASCII; a wide partner (k and KELVIN SIGN) starts with a
            // different lead byte and must go through the bitmap.
            let len = code[pos + 1] as usize;
            let cp = if self.utf() {
                utf::decode(&code[pos + 2..pos + 2 + len], 0).0
            } else {
                unit as u32
            };
            let (partners, n) = self.rules().partners(cp);
            if cp >= 0x80 || partners[..n].iter().any(|&p| p >= 0x80) {
                self.first = FirstUnit::Conflict;
                return Flow::Done;
            }
            self.note_first(UnitHint::Caseless(unit));
            return Flow::Done;
        }
        self.note_first(UnitHint::Exact(unit));
        Flow::Done
    }

    fn char_units(&mut self, pos: usize, caseless: bool) {
        let prog = self.program;
        let code = &prog.code;
        let len = code[pos + 1] as usize;
        let bytes = &code[pos + 2..pos + 2 + len];
        self.set(bytes[0]);
        if caseless {
            let (cp, _) = if self.utf() {
                utf::decode(bytes, 0)
            } else {
                (bytes[0] as u32, 1)
            };
            if self.utf() || self.program.options.contains(O::UCP) {
                let (partners, n) = self.rules().partners(cp);
                for &p in &partners[..n] {
                    let mut buf = [0u8; 4];
                    if self.utf() {
                        utf::encode(p, &mut buf);
                        self.set(buf[0]);
                    } else if p < 256 {
                        self.set(p as u8);
                    }
                }
            } else if cp < 256 {
                self.set(DEFAULT_TABLES.flip[cp as usize]);
            }
        }
    }

    fn class_units(&mut self, pos: usize, op: Op) {
        let prog = self.program;
        let code = &prog.code;
        let link = self.program.link_size;
        match op {
            Op::Class | Op::NClass => {
                let map = &code[pos + 1..pos + 33];
                for unit in 0..256usize {
                    if map[unit >> 3] & (1 << (unit & 7)) != 0 {
                        self.set(unit as u8);
                    }
                }
                if op == Op::NClass && self.utf() {
                    self.set_range(0xC2, 0xF4);
                }
            }
            Op::XClass => {
                let mut p = pos + 1 + link.width();
                let end = pos + walk::header_len(code, pos, link);
                let flags = code[p];
                p += 1;
                let negated = flags & xclass::FLAG_NEGATED != 0;
                if flags & xclass::FLAG_HAS_MAP != 0 {
                    let map = &code[p..p + 32];
                    for unit in 0..256usize {
                        let bit = map[unit >> 3] & (1 << (unit & 7)) != 0;
                        if bit != negated {
                            self.set(unit as u8);
                        }
                    }
                    p += 32;
                } else if negated {
                    // Everything low matches.
                    for unit in 0..=255u8 {
                        self.set(unit);
                    }
                }
                if negated || flags & xclass::FLAG_ALL_WIDE != 0 {
                    if self.utf() {
                        self.set_range(0xC2, 0xF4);
                    }
                    return;
                }
                // Lead bytes for the listed ranges; properties are wide
                // and conservative.
                let mut saw_prop = false;
                while p < end {
                    match code[p] {
                        xclass::ITEM_RANGE => {
                            let lo = u32::from_le_bytes([
                                code[p + 1], code[p + 2], code[p + 3], code[p + 4],
                            ]);
                            let hi = u32::from_le_bytes([
                                code[p + 5], code[p + 6], code[p + 7], code[p + 8],
                            ]);
                            if self.utf() {
                                let mut b = [0u8; 4];
                                utf::encode(lo, &mut b);
                                let lead_lo = b[0];
                                utf::encode(hi.min(0x10FFFF), &mut b);
                                let lead_hi = b[0];
                                self.set_range(lead_lo, lead_hi);
                            }
                            p += 9;
                        }
                        _ => {
                            saw_prop = true;
                            p += 3;
                        }
                    }
                }
                if saw_prop && self.utf() {
                    self.set_range(0xC2, 0xF4);
                }
            }
            _ => {}
        }
    }

    fn type_units(&mut self, pos: usize, op: Op) {
        let ucp = self.program.options.contains(O::UCP);
        let utf = self.utf();
        let set_tab = |scan: &mut Self, bit: u8, negate: bool| {
            for unit in 0..256u32 {
                if (DEFAULT_TABLES.ctype(unit as u8) & bit != 0) != negate {
                    scan.set(unit as u8);
                }
            }
        };
        // Under UCP the Latin-1 half holds word and space characters the
        // classic tables do not know about.
        let ucp_extra = |scan: &mut Self, pred: fn(u32) -> bool| {
            if ucp && !utf {
                for unit in 128..256u32 {
                    if pred(unit) {
                        scan.set(unit as u8);
                    }
                }
            }
        };
        match op {
            Op::Digit => {
                set_tab(self, CTYPE_DIGIT, false);
                ucp_extra(self, skua_ucd::ucd::is_decimal);
                if ucp && utf {
                    self.set_range(0xC2, 0xF4);
                }
            }
            Op::NotDigit => {
                set_tab(self, CTYPE_DIGIT, true);
                if utf {
                    self.set_range(0xC2, 0xF4);
                }
            }
            Op::Whitespace => {
                set_tab(self, CTYPE_SPACE, false);
                ucp_extra(self, skua_ucd::ucd::is_space);
                if ucp && utf {
                    self.set_range(0xC2, 0xF4);
                }
            }
            Op::NotWhitespace => {
                set_tab(self, CTYPE_SPACE, true);
                if utf {
                    self.set_range(0xC2, 0xF4);
                }
            }
            Op::WordChar => {
                set_tab(self, CTYPE_WORD, false);
                ucp_extra(self, skua_ucd::is_word);
                if ucp && utf {
                    self.set_range(0xC2, 0xF4);
                }
            }
            Op::NotWordChar => {
                set_tab(self, CTYPE_WORD, true);
                if utf {
                    self.set_range(0xC2, 0xF4);
                }
            }
            Op::HSpace => {
                for &cp in skua_ucd::HSPACE_LIST {
                    if cp < 256 {
                        self.set(cp as u8);
                    } else if utf {
                        let mut b = [0u8; 4];
                        utf::encode(cp, &mut b);
                        self.set(b[0]);
                    }
                }
            }
            Op::VSpace => {
                for &cp in skua_ucd::VSPACE_LIST {
                    if cp < 256 {
                        self.set(cp as u8);
                    } else if utf {
                        let mut b = [0u8; 4];
                        utf::encode(cp, &mut b);
                        self.set(b[0]);
                    }
                }
            }
            Op::NotHSpace | Op::NotVSpace => {
                let list = if op == Op::NotHSpace {
                    skua_ucd::HSPACE_LIST
                } else {
                    skua_ucd::VSPACE_LIST
                };
                for unit in 0..256u32 {
                    if !list.contains(&unit) {
                        self.set(unit as u8);
                    }
                }
                if utf {
                    self.set_range(0xC2, 0xF4);
                }
            }
            Op::Prop | Op::NotProp => {
                let prog = self.program;
                let code = &prog.code;
                let prop = skua_asm::prop::decode(code[pos + 1], code[pos + 2]);
                let negated = op == Op::NotProp;
                for unit in 0..256u32 {
                    if prop.contains(unit) != negated {
                        self.set(unit as u8);
                    }
                }
                if utf {
                    self.set_range(0xC2, 0xF4);
                }
            }
            _ => {}
        }
    }
}

// ---- required trailing literal ----------------------------------------

fn last_literal(program: &mut Program) {
    let code = &program.code;
    let link = program.link_size;
    // Only a single top-level branch pins a required last unit.
    let first_link = link.read(code, 1);
    if Op::try_from(code[first_link]) != Ok(Op::Ket) {
        return;
    }
    let mut pos = 1 + link.width();
    let mut last: Option<UnitHint> = None;
    while pos < first_link {
        let op = Op::try_from(code[pos]).expect("valid program");
        match op {
            Op::Char | Op::CharI => {
                let len = code[pos + 1] as usize;
                let unit = code[pos + 1 + len];
                last = Some(if op == Op::CharI {
                    UnitHint::Caseless(unit)
                } else {
                    UnitHint::Exact(unit)
                });
                pos += walk::header_len(code, pos, link);
            }
            Op::Exact | Op::Plus | Op::MinPlus | Op::PosPlus => {
                let header = walk::header_len(code, pos, link);
                let item = pos + header;
                let item_op = Op::try_from(code[item]).expect("valid program");
                if matches!(item_op, Op::Char | Op::CharI) {
                    let len = code[item + 1] as usize;
                    let unit = code[item + 1 + len];
                    last = Some(if item_op == Op::CharI {
                        UnitHint::Caseless(unit)
                    } else {
                        UnitHint::Exact(unit)
                    });
                }
                pos += walk::item_len(code, pos, link);
            }
            Op::Star | Op::MinStar | Op::PosStar | Op::Query | Op::MinQuery | Op::PosQuery
            | Op::Upto | Op::MinUpto | Op::PosUpto => {
                // Optional content cannot be required.
                pos += walk::item_len(code, pos, link);
            }
            Op::Bra | Op::CBra | Op::BraPos | Op::CBraPos | Op::Once | Op::ScriptRun
            | Op::Cond | Op::Assert | Op::AssertNot | Op::AssertBack | Op::AssertBackNot
            | Op::NaAssert | Op::NaAssertBack => {
                pos = walk::skip_group(code, pos, link);
            }
            Op::BraZero | Op::BraMinZero | Op::SkipZero => {
                pos = walk::skip_group(code, pos + 1, link);
            }
            Op::Ref | Op::RefI | Op::DnRef | Op::DnRefI | Op::Recurse => {
                pos += walk::header_len(code, pos, link);
            }
            _ => {
                pos += walk::header_len(code, pos, link);
            }
        }
    }
    program.last_unit = last;
}

// ---- auto-possessification --------------------------------------------

fn auto_possess(program: &mut Program) {
    let link = program.link_size;
    let mut rewrites: Vec<(usize, Op)> = Vec::new();
    let code = &program.code;
    let mut pos = 0;
    while pos < code.len() {
        let op = match Op::try_from(code[pos]) {
            Ok(op) => op,
            Err(_) => return,
        };
        if op == Op::End {
            break;
        }
        let replacement = match op {
            Op::Star => Some(Op::PosStar),
            Op::Plus => Some(Op::PosPlus),
            Op::Upto => Some(Op::PosUpto),
            _ => None,
        };
        if let Some(new_op) = replacement {
            let header = walk::header_len(code, pos, link);
            let item = pos + header;
            let after = pos + walk::item_len(code, pos, link);
            if let Some(next_set) = follower_chars(program, after) {
                let disjoint = next_set
                    .iter()
                    .all(|&cp| item_matches(program, item, cp) == Some(false));
                if disjoint && !next_set.is_empty() {
                    rewrites.push((pos, new_op));
                }
            }
        }
        pos += walk::header_len(code, pos, link);
    }
    for (pos, op) in rewrites {
        program.code[pos] = op as u8;
    }
}

/// The concrete characters the item directly after a repeat must match,
/// when that item is a literal.
fn follower_chars(program: &Program, pos: usize) -> Option<Vec<u32>> {
    let code = &program.code;
    if pos >= code.len() {
        return None;
    }
    let op = Op::try_from(code[pos]).ok()?;
    if !matches!(op, Op::Char | Op::CharI) {
        return None;
    }
    let len = code[pos + 1] as usize;
    let bytes = &code[pos + 2..pos + 2 + len];
    let cp = if program.options.contains(O::UTF) {
        utf::decode(bytes, 0).0
    } else {
        bytes[0] as u32
    };
    let mut set = vec![cp];
    if op == Op::CharI {
        let rules = FoldRules {
            turkish: program.extra_options.contains(X::TURKISH_CASING),
            ascii_restricted: program.extra_options.contains(X::CASELESS_RESTRICT),
        };
        if program.options.intersects(O::UTF | O::UCP) {
            let (partners, n) = rules.partners(cp);
            set.extend_from_slice(&partners[..n]);
        } else if cp < 256 {
            let other = DEFAULT_TABLES.flip[cp as usize] as u32;
            if other != cp {
                set.push(other);
            }
        }
    }
    Some(set)
}

/// Does the single-character item at `pos` match `cp`? `None` when the
/// item kind is outside this analysis.
fn item_matches(program: &Program, pos: usize, cp: u32) -> Option<bool> {
    let code = &program.code;
    let link = program.link_size;
    let op = Op::try_from(code[pos]).ok()?;
    let ucp = program.options.contains(O::UCP);
    Some(match op {
        Op::Char | Op::CharI | Op::Not | Op::NotI => {
            let len = code[pos + 1] as usize;
            let bytes = &code[pos + 2..pos + 2 + len];
            let own = if program.options.contains(O::UTF) {
                utf::decode(bytes, 0).0
            } else {
                bytes[0] as u32
            };
            let caseless = matches!(op, Op::CharI | Op::NotI);
            let eq = if caseless {
                let rules = FoldRules {
                    turkish: program.extra_options.contains(X::TURKISH_CASING),
                    ascii_restricted: program.extra_options.contains(X::CASELESS_RESTRICT),
                };
                skua_ucd::chars_fold_equal(own, cp, rules)
            } else {
                own == cp
            };
            if matches!(op, Op::Not | Op::NotI) { !eq } else { eq }
        }
        Op::Class | Op::NClass => {
            if cp < 256 {
                let map = &code[pos + 1..pos + 33];
                map[(cp >> 3) as usize] & (1 << (cp & 7)) != 0
            } else {
                op == Op::NClass
            }
        }
        Op::Digit => {
            if ucp { skua_ucd::ucd::is_decimal(cp) } else { DEFAULT_TABLES.is_ctype(cp, CTYPE_DIGIT) }
        }
        Op::NotDigit => {
            !(if ucp { skua_ucd::ucd::is_decimal(cp) } else { DEFAULT_TABLES.is_ctype(cp, CTYPE_DIGIT) })
        }
        Op::Whitespace => {
            if ucp { skua_ucd::ucd::is_space(cp) } else { DEFAULT_TABLES.is_ctype(cp, CTYPE_SPACE) }
        }
        Op::NotWhitespace => {
            !(if ucp { skua_ucd::ucd::is_space(cp) } else { DEFAULT_TABLES.is_ctype(cp, CTYPE_SPACE) })
        }
        Op::WordChar => {
            if ucp { skua_ucd::is_word(cp) } else { DEFAULT_TABLES.is_ctype(cp, CTYPE_WORD) }
        }
        Op::NotWordChar => {
            !(if ucp { skua_ucd::is_word(cp) } else { DEFAULT_TABLES.is_ctype(cp, CTYPE_WORD) })
        }
        Op::HSpace => is_hspace(cp),
        Op::NotHSpace => !is_hspace(cp),
        Op::VSpace => is_vspace(cp),
        Op::NotVSpace => !is_vspace(cp),
        Op::Prop | Op::NotProp => {
            let prop = skua_asm::prop::decode(code[pos + 1], code[pos + 2]);
            prop.contains(cp) != (op == Op::NotProp)
        }
        Op::AnyNoNl => !program.newline.is_newline_cp(cp),
        Op::AllAny | Op::AnyByte => true,
        Op::XClass => {
            let _ = link;
            return None;
        }
        _ => return None,
    })
}
