//! Character-class planner.
//!
//! Consumes the class tokens the parser emitted and produces a matcher
//! description: a 256-bit bitmap for the low range, sorted merged ranges
//! for wide code points, and property items. Caseless closure walks the
//! UCD case sets; extended-class set algebra comes out as a small postfix
//! expression over operand plans.

use skua_asm::error::{CompileError, CompileErrorKind as E};
use skua_asm::options::{CompileOptions as O, ExtraOptions as X};
use skua_ucd::tables::{CTYPE_DIGIT, CTYPE_SPACE, CTYPE_WORD};
use skua_ucd::ucd::GeneralCategory;
use skua_ucd::{ClassProperty, FoldRules, PosixClass};

use crate::context::CompileContext;
use crate::meta::{escape_from, split, Escape, Kind};

/// One planned class: the low bitmap plus wide-range and property items.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassPlan {
    /// The class was written negated.
    pub negated: bool,
    /// Membership bits for code points below 256, before negation.
    pub bitmap: [u8; 32],
    /// Sorted, merged ranges of matching code points at or above 256.
    pub wide: Vec<(u32, u32)>,
    /// Property items; `(true, p)` matches when the property does not hold.
    /// Items are unioned, and apply to code points at or above 256 (the
    /// low range is already folded into the bitmap).
    pub props: Vec<(bool, ClassProperty)>,
}

/// Set operators for extended classes, in postfix order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    /// Union.
    Or,
    /// Intersection.
    And,
    /// Difference.
    Sub,
    /// Symmetric difference.
    Xor,
}

/// Postfix expression: operands interleaved with operators. A plain class
/// is a single-operand expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpnItem {
    /// Push an operand set.
    Operand(ClassPlan),
    /// Combine the top two sets.
    Op(SetOp),
}

/// Planner output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedClass {
    /// Postfix items; a single `Operand` for ordinary classes.
    pub rpn: Vec<RpnItem>,
    /// The whole expression is complemented (`[^…]` with operators).
    pub negated_expression: bool,
}

impl PlannedClass {
    /// The plan when the class is a plain single-operand one.
    pub fn simple(&self) -> Option<&ClassPlan> {
        match (&self.rpn[..], self.negated_expression) {
            ([RpnItem::Operand(p)], false) => Some(p),
            _ => None,
        }
    }
}

impl ClassPlan {
    fn add_cp(&mut self, cp: u32) {
        self.add_range(cp, cp);
    }

    fn add_range(&mut self, lo: u32, hi: u32) {
        if lo < 256 {
            for cp in lo..=hi.min(255) {
                self.bitmap[(cp >> 3) as usize] |= 1 << (cp & 7);
            }
        }
        if hi >= 256 {
            self.wide.push((lo.max(256), hi));
        }
    }

    fn add_prop(&mut self, negated: bool, prop: ClassProperty) {
        // The low range is resolved eagerly so `Class` stays bitmap-only
        // when nothing wide is involved.
        for cp in 0u32..256 {
            if prop.contains(cp) != negated {
                self.bitmap[(cp >> 3) as usize] |= 1 << (cp & 7);
            }
        }
        self.props.push((negated, prop));
    }

    /// Does the low bitmap have any bits set?
    pub fn has_low_bits(&self) -> bool {
        self.bitmap.iter().any(|&b| b != 0)
    }

    /// Is the wide part exactly "everything at or above 256"?
    pub fn matches_all_wide(&self) -> bool {
        self.props.is_empty() && self.wide == [(256, 0x10FFFF)]
    }

    fn sort_and_merge(&mut self) {
        use itertools::Itertools;
        self.wide = core::mem::take(&mut self.wide)
            .into_iter()
            .sorted_unstable()
            .coalesce(|a, b| {
                if b.0 <= a.1.saturating_add(1) {
                    Ok((a.0, a.1.max(b.1)))
                } else {
                    Err((a, b))
                }
            })
            .collect();
        self.props.sort_unstable_by_key(|&(n, p)| (n, format_key(p)));
        self.props.dedup();
    }

    /// Membership test used by compile-time analysis (auto-possess) and
    /// the extended-class evaluator.
    pub fn contains(&self, cp: u32) -> bool {
        let inner = if cp < 256 {
            self.bitmap[(cp >> 3) as usize] & (1 << (cp & 7)) != 0
        } else {
            self.wide.iter().any(|&(lo, hi)| lo <= cp && cp <= hi)
                || self.props.iter().any(|&(neg, p)| p.contains(cp) != neg)
        };
        inner != self.negated
    }
}

fn format_key(p: ClassProperty) -> u16 {
    let (k, v) = skua_asm::prop::encode(p);
    ((k as u16) << 8) | v as u16
}

/// Plan a class starting at `idx`, which points just past the
/// `Class`/`ClassNot` token. Returns the plan and the index just past the
/// matching `ClassEnd`.
pub fn plan(
    tokens: &[u32],
    idx: usize,
    negated: bool,
    options: O,
    ctx: &CompileContext,
) -> Result<(PlannedClass, usize), CompileError> {
    let mut planner = Planner { tokens, options, ctx };
    let (rpn, next) = planner.expression(idx)?;
    let mut planned = PlannedClass { rpn, negated_expression: false };
    if planned.rpn.len() == 1 {
        if let RpnItem::Operand(p) = &mut planned.rpn[0] {
            p.negated = negated;
        }
    } else {
        planned.negated_expression = negated;
    }
    Ok((planned, next))
}

struct Planner<'a> {
    tokens: &'a [u32],
    options: O,
    ctx: &'a CompileContext,
}

impl<'a> Planner<'a> {
    fn fold_rules(&self) -> FoldRules {
        FoldRules {
            turkish: self.ctx.extra_options.contains(X::TURKISH_CASING),
            ascii_restricted: self.ctx.extra_options.contains(X::CASELESS_RESTRICT),
        }
    }

    fn ucp(&self) -> bool {
        self.options.contains(O::UCP)
    }

    /// Parse operand (op operand)* until `ClassEnd`.
    fn expression(&mut self, mut idx: usize) -> Result<(Vec<RpnItem>, usize), CompileError> {
        let mut rpn = Vec::new();
        let (first, next) = self.operand(idx)?;
        rpn.push(RpnItem::Operand(first));
        idx = next;
        loop {
            match split(self.tokens[idx]) {
                Some((Kind::ClassEnd, _)) => return Ok((rpn, idx + 1)),
                Some((Kind::ClassAnd, _)) => {
                    let (p, next) = self.operand(idx + 1)?;
                    rpn.push(RpnItem::Operand(p));
                    rpn.push(RpnItem::Op(SetOp::And));
                    idx = next;
                }
                Some((Kind::ClassOr, _)) => {
                    let (p, next) = self.operand(idx + 1)?;
                    rpn.push(RpnItem::Operand(p));
                    rpn.push(RpnItem::Op(SetOp::Or));
                    idx = next;
                }
                Some((Kind::ClassSub, _)) => {
                    let (p, next) = self.operand(idx + 1)?;
                    rpn.push(RpnItem::Operand(p));
                    rpn.push(RpnItem::Op(SetOp::Sub));
                    idx = next;
                }
                Some((Kind::ClassXor, _)) => {
                    let (p, next) = self.operand(idx + 1)?;
                    rpn.push(RpnItem::Operand(p));
                    rpn.push(RpnItem::Op(SetOp::Xor));
                    idx = next;
                }
                _ => return Err(CompileError::at(E::BadExtendedClass, 0)),
            }
        }
    }

    /// One operand: a run of members; nested classes union in.
    fn operand(&mut self, mut idx: usize) -> Result<(ClassPlan, usize), CompileError> {
        let mut plan = ClassPlan::default();
        let mut ranges: Vec<(u32, u32)> = Vec::new();
        loop {
            let token = self.tokens[idx];
            match split(token) {
                None => {
                    // Literal, possibly the low bound of a range.
                    let lo = token;
                    if let Some((Kind::RangeLiteral | Kind::RangeEscaped, _)) =
                        split(self.tokens[idx + 1])
                    {
                        let hi = self.tokens[idx + 2];
                        ranges.push((lo, hi));
                        idx += 3;
                    } else {
                        ranges.push((lo, lo));
                        idx += 1;
                    }
                }
                Some((Kind::ClassEnd | Kind::ClassAnd | Kind::ClassOr | Kind::ClassSub
                    | Kind::ClassXor, _)) => break,
                Some((Kind::Class, _)) => {
                    let (nested, next) = self.nested(idx + 1, false)?;
                    union_into(&mut plan, nested);
                    idx = next;
                }
                Some((Kind::ClassNot, _)) => {
                    let (nested, next) = self.nested(idx + 1, true)?;
                    union_into(&mut plan, nested);
                    idx = next;
                }
                Some((Kind::Escape, payload)) => {
                    let e = escape_from(payload)
                        .ok_or(CompileError::at(E::Internal("bad escape payload"), 0))?;
                    self.type_escape(&mut plan, e)?;
                    idx += 1;
                }
                Some((Kind::Prop, payload)) => {
                    plan.add_prop(false, decode_payload(payload));
                    idx += 1;
                }
                Some((Kind::NotProp, payload)) => {
                    plan.add_prop(true, decode_payload(payload));
                    idx += 1;
                }
                Some((Kind::Posix, payload)) => {
                    self.posix(&mut plan, payload, false)?;
                    idx += 1;
                }
                Some((Kind::PosixNeg, payload)) => {
                    self.posix(&mut plan, payload, true)?;
                    idx += 1;
                }
                _ => return Err(CompileError::at(E::Internal("stray token in class"), 0)),
            }
        }

        // Caseless closure over the concrete ranges, then fold them in.
        if self.options.contains(O::CASELESS) {
            self.close_ranges(&mut ranges);
            self.close_props(&mut plan);
        }
        for (lo, hi) in ranges {
            plan.add_range(lo, hi);
        }
        plan.sort_and_merge();
        Ok((plan, idx))
    }

    fn nested(&mut self, idx: usize, negated: bool) -> Result<(ClassPlan, usize), CompileError> {
        let (inner, next) = self.expression(idx)?;
        if inner.len() == 1 {
            if let Some(RpnItem::Operand(mut p)) = inner.into_iter().next() {
                p.negated = negated;
                return Ok((materialize(p), next));
            }
            unreachable!("single RPN item is an operand");
        }
        // Nested expression: evaluate it into a concrete plan.
        let plan = eval_rpn(&inner, negated);
        Ok((plan, next))
    }

    fn type_escape(&mut self, plan: &mut ClassPlan, e: Escape) -> Result<(), CompileError> {
        let ex = self.ctx.extra_options;
        let utf_wide = self.options.intersects(O::UTF | O::UCP);
        match e {
            Escape::DecDigit => {
                if self.ucp() && !ex.contains(X::ASCII_BSD) {
                    plan.add_prop(false, ClassProperty::Category(GeneralCategory::Nd));
                } else {
                    self.ctype_bits(plan, CTYPE_DIGIT);
                }
            }
            Escape::NotDecDigit => {
                if self.ucp() && !ex.contains(X::ASCII_BSD) {
                    plan.add_prop(true, ClassProperty::Category(GeneralCategory::Nd));
                } else {
                    self.ctype_bits_negated(plan, CTYPE_DIGIT);
                    if utf_wide {
                        plan.wide.push((256, 0x10FFFF));
                    }
                }
            }
            Escape::Whitespace => {
                if self.ucp() && !ex.contains(X::ASCII_BSS) {
                    plan.add_prop(false, ClassProperty::Space);
                } else {
                    self.ctype_bits(plan, CTYPE_SPACE);
                }
            }
            Escape::NotWhitespace => {
                if self.ucp() && !ex.contains(X::ASCII_BSS) {
                    plan.add_prop(true, ClassProperty::Space);
                } else {
                    self.ctype_bits_negated(plan, CTYPE_SPACE);
                    if utf_wide {
                        plan.wide.push((256, 0x10FFFF));
                    }
                }
            }
            Escape::WordChar => {
                if self.ucp() && !ex.contains(X::ASCII_BSW) {
                    plan.add_prop(false, ClassProperty::Word);
                } else {
                    self.ctype_bits(plan, CTYPE_WORD);
                }
            }
            Escape::NotWordChar => {
                if self.ucp() && !ex.contains(X::ASCII_BSW) {
                    plan.add_prop(true, ClassProperty::Word);
                } else {
                    self.ctype_bits_negated(plan, CTYPE_WORD);
                    if utf_wide {
                        plan.wide.push((256, 0x10FFFF));
                    }
                }
            }
            Escape::HSpace => {
                for &cp in skua_ucd::HSPACE_LIST {
                    plan.add_cp(cp);
                }
            }
            Escape::NotHSpace => complement_list(plan, skua_ucd::HSPACE_LIST, utf_wide),
            Escape::VSpace => {
                for &cp in skua_ucd::VSPACE_LIST {
                    plan.add_cp(cp);
                }
            }
            Escape::NotVSpace => complement_list(plan, skua_ucd::VSPACE_LIST, utf_wide),
            _ => return Err(CompileError::at(E::Internal("escape not valid in class"), 0)),
        }
        Ok(())
    }

    fn ctype_bits(&self, plan: &mut ClassPlan, bit: u8) {
        for cp in 0..256u32 {
            if self.ctx.tables.ctype(cp as u8) & bit != 0 {
                plan.bitmap[(cp >> 3) as usize] |= 1 << (cp & 7);
            }
        }
    }

    fn ctype_bits_negated(&self, plan: &mut ClassPlan, bit: u8) {
        for cp in 0..256u32 {
            if self.ctx.tables.ctype(cp as u8) & bit == 0 {
                plan.bitmap[(cp >> 3) as usize] |= 1 << (cp & 7);
            }
        }
    }

    fn posix(&mut self, plan: &mut ClassPlan, payload: u16, negated: bool) -> Result<(), CompileError> {
        let mut class = posix_from(payload)?;
        // Caseless matching erases the upper/lower distinction.
        if self.options.contains(O::CASELESS)
            && matches!(class, PosixClass::Upper | PosixClass::Lower)
        {
            class = PosixClass::Alpha;
        }
        let ucp_posix = self.ucp() && !self.ctx.extra_options.contains(X::ASCII_POSIX);
        if ucp_posix {
            let prop = match class {
                PosixClass::Alpha => Some(ClassProperty::Group(skua_ucd::CategoryGroup::L)),
                PosixClass::Lower => Some(ClassProperty::Category(GeneralCategory::Ll)),
                PosixClass::Upper => Some(ClassProperty::Category(GeneralCategory::Lu)),
                PosixClass::Alnum => Some(ClassProperty::Alnum),
                PosixClass::Space => Some(ClassProperty::Space),
                PosixClass::Word => Some(ClassProperty::Word),
                PosixClass::Digit => Some(ClassProperty::Category(GeneralCategory::Nd)),
                _ => None,
            };
            if let Some(p) = prop {
                plan.add_prop(negated, p);
                return Ok(());
            }
        }
        for cp in 0..256u32 {
            if self.ctx.tables.posix(class, cp) != negated {
                plan.bitmap[(cp >> 3) as usize] |= 1 << (cp & 7);
            }
        }
        if negated && self.options.intersects(O::UTF | O::UCP) {
            plan.wide.push((256, 0x10FFFF));
        }
        Ok(())
    }

    /// Extend concrete ranges with every case partner. Folding only ever
    /// happens inside the known cased spans, so wide ranges close in time
    /// proportional to their cased intersection.
    fn close_ranges(&self, ranges: &mut Vec<(u32, u32)>) {
        let rules = self.fold_rules();
        let use_ucd = self.options.intersects(O::UTF | O::UCP);
        let mut extra = Vec::new();
        for &(lo, hi) in ranges.iter() {
            if !use_ucd {
                // Classic tables only.
                for cp in lo..=hi.min(255) {
                    let other = self.ctx.tables.flip[cp as usize];
                    if other as u32 != cp {
                        extra.push((other as u32, other as u32));
                    }
                }
                continue;
            }
            for (span_lo, span_hi) in cased_intersection(lo, hi) {
                for cp in span_lo..=span_hi {
                    let (partners, n) = rules.partners(cp);
                    for &p in &partners[..n] {
                        extra.push((p, p));
                    }
                }
            }
        }
        ranges.extend(extra);
    }

    /// Caseless property closure: the cased-letter categories become
    /// equivalent.
    fn close_props(&self, plan: &mut ClassPlan) {
        let mut extra = Vec::new();
        for &(neg, p) in &plan.props {
            if let ClassProperty::Category(c) = p {
                if c.is_cased_letter() {
                    for other in [GeneralCategory::Lu, GeneralCategory::Ll, GeneralCategory::Lt] {
                        if other != c {
                            extra.push((neg, ClassProperty::Category(other)));
                        }
                    }
                }
            }
        }
        for (neg, p) in extra {
            plan.add_prop(neg, p);
        }
    }
}

fn decode_payload(payload: u16) -> ClassProperty {
    skua_asm::prop::decode((payload >> 8) as u8, payload as u8)
}

fn posix_from(payload: u16) -> Result<PosixClass, CompileError> {
    use PosixClass::*;
    static ALL: &[PosixClass] = &[
        Alpha, Lower, Upper, Alnum, Ascii, Blank, Cntrl, Digit, Graph, Print, Punct, Space,
        Word, Xdigit,
    ];
    ALL.iter()
        .find(|&&c| c as u16 == payload)
        .copied()
        .ok_or(CompileError::at(E::Internal("bad posix payload"), 0))
}

/// Spans of the code space containing cased letters, for bounded closure.
static CASED_SPANS: &[(u32, u32)] = &[
    (0x41, 0x5A), (0x61, 0x7A), (0xB5, 0xB5), (0xC0, 0x24F), (0x345, 0x345),
    (0x370, 0x3FF), (0x400, 0x52F), (0x531, 0x586), (0x13A0, 0x13FD),
    (0x1C80, 0x1C88), (0x1E00, 0x1FFE), (0x2126, 0x2126), (0x212A, 0x212B),
    (0x2C60, 0x2CFF), (0xA640, 0xA7FF), (0xFB00, 0xFB17), (0xFF21, 0xFF5A),
    (0x10400, 0x1044F),
];

fn cased_intersection(lo: u32, hi: u32) -> impl Iterator<Item = (u32, u32)> + 'static {
    CASED_SPANS
        .iter()
        .copied()
        .filter_map(move |(slo, shi)| {
            let a = lo.max(slo);
            let b = hi.min(shi);
            (a <= b).then_some((a, b))
        })
}

fn complement_list(plan: &mut ClassPlan, list: &[u32], utf_wide: bool) {
    for cp in 0..256u32 {
        if !list.contains(&cp) {
            plan.bitmap[(cp >> 3) as usize] |= 1 << (cp & 7);
        }
    }
    if !utf_wide {
        return;
    }
    let mut start = 256u32;
    for &cp in list.iter().filter(|&&cp| cp >= 256) {
        if cp > start {
            plan.wide.push((start, cp - 1));
        }
        start = cp + 1;
    }
    plan.wide.push((start, 0x10FFFF));
}

fn union_into(into: &mut ClassPlan, from: ClassPlan) {
    let from = materialize(from);
    for i in 0..32 {
        into.bitmap[i] |= from.bitmap[i];
    }
    into.wide.extend(from.wide);
    for item in from.props {
        if !into.props.contains(&item) {
            into.props.push(item);
        }
    }
}

/// Turn property items into concrete wide ranges. Run-length scans the
/// code space once; compile-time only, and only where set algebra or
/// negation needs concrete membership.
fn flatten_props(mut plan: ClassPlan) -> ClassPlan {
    if plan.props.is_empty() {
        return plan;
    }
    let props = core::mem::take(&mut plan.props);
    let member = |cp: u32| props.iter().any(|&(neg, p)| p.contains(cp) != neg);
    let mut run_start: Option<u32> = None;
    for cp in 256u32..=0x10FFFF {
        if member(cp) {
            run_start.get_or_insert(cp);
        } else if let Some(start) = run_start.take() {
            plan.wide.push((start, cp - 1));
        }
    }
    if let Some(start) = run_start {
        plan.wide.push((start, 0x10FFFF));
    }
    plan.sort_and_merge();
    plan
}

/// Resolve a plan's own negation into explicit membership so it can take
/// part in set algebra.
fn materialize(plan: ClassPlan) -> ClassPlan {
    if !plan.negated {
        return plan;
    }
    let plan = flatten_props(plan);
    let mut out = ClassPlan::default();
    for i in 0..32 {
        out.bitmap[i] = !plan.bitmap[i];
    }
    let mut start = 256u32;
    for &(lo, hi) in &plan.wide {
        if lo > start {
            out.wide.push((start, lo - 1));
        }
        start = hi.saturating_add(1);
    }
    if start <= 0x10FFFF {
        out.wide.push((start, 0x10FFFF));
    }
    out
}

/// Evaluate a nested extended-class expression to a concrete plan. Wide
/// membership is resolved per set operation over the ranges; property
/// items survive only through unions, so intersections and differences
/// materialise them over the operand ranges first.
fn eval_rpn(rpn: &[RpnItem], negated: bool) -> ClassPlan {
    let mut stack: Vec<ClassPlan> = Vec::new();
    for item in rpn {
        match item {
            RpnItem::Operand(p) => stack.push(materialize(p.clone())),
            RpnItem::Op(op) => {
                let b = stack.pop().unwrap_or_default();
                let a = stack.pop().unwrap_or_default();
                stack.push(combine(a, b, *op));
            }
        }
    }
    let mut out = stack.pop().unwrap_or_default();
    if negated {
        out.negated = true;
        out = materialize(out);
    }
    out
}

fn combine(a: ClassPlan, b: ClassPlan, op: SetOp) -> ClassPlan {
    let mut out = ClassPlan::default();
    for i in 0..32 {
        out.bitmap[i] = match op {
            SetOp::Or => a.bitmap[i] | b.bitmap[i],
            SetOp::And => a.bitmap[i] & b.bitmap[i],
            SetOp::Sub => a.bitmap[i] & !b.bitmap[i],
            SetOp::Xor => a.bitmap[i] ^ b.bitmap[i],
        };
    }
    if op == SetOp::Or {
        out.wide = a.wide.clone();
        out.wide.extend(b.wide.iter().copied());
        out.props = a.props.clone();
        for item in &b.props {
            if !out.props.contains(item) {
                out.props.push(*item);
            }
        }
        out.sort_and_merge();
        return out;
    }

    // Non-union operators need concrete membership on both sides.
    let a = flatten_props(a);
    let b = flatten_props(b);
    let mut bounds: Vec<u32> = vec![256, 0x110000];
    for plan in [&a, &b] {
        for &(lo, hi) in &plan.wide {
            bounds.push(lo);
            bounds.push(hi.saturating_add(1));
        }
    }
    bounds.sort_unstable();
    bounds.dedup();
    let wide_member =
        |plan: &ClassPlan, cp: u32| plan.wide.iter().any(|&(lo, hi)| lo <= cp && cp <= hi);
    for w in bounds.windows(2) {
        let (lo, next) = (w[0], w[1]);
        if lo < 256 || lo >= 0x110000 {
            continue;
        }
        let am = wide_member(&a, lo);
        let bm = wide_member(&b, lo);
        let keep = match op {
            SetOp::Or => am || bm,
            SetOp::And => am && bm,
            SetOp::Sub => am && !bm,
            SetOp::Xor => am != bm,
        };
        if keep {
            out.wide.push((lo, next - 1));
        }
    }
    out.sort_and_merge();
    out
}
