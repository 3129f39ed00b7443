//! Pattern parser: pattern text to the flat meta-token vector.
//!
//! The parser resolves escapes, quantifier syntax, group forms, verbs,
//! classes and inline option changes, and diagnoses every lexical error
//! with a pattern offset. Group-name references stay symbolic (offsets
//! into the pattern) and are resolved by the code generator, which owns
//! the finished name table.

use skua_asm::error::{CompileError, CompileErrorKind as E};
use skua_asm::options::{Bsr, CompileOptions as O, ExtraOptions as X, Newline, ProgramFlags};
use skua_asm::program::EmbeddedLimits;
use skua_asm::{utf, MAX_NAME_LENGTH, MAX_REPEAT, MAX_VERB_ARG_LENGTH};
use skua_ucd::tables::{CTYPE_DIGIT, CTYPE_WORD};
use skua_ucd::PosixClass;

use crate::context::CompileContext;
use crate::meta::{meta, Escape, Kind, ANY_RECURSION, REPEAT_UNLIMITED};

/// A named capture group recorded in pattern order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupName {
    /// Name bytes.
    pub name: Vec<u8>,
    /// Group number.
    pub number: u16,
}

/// Parser output.
#[derive(Debug, Clone)]
pub struct Parsed {
    /// The meta-token vector, terminated by an `End` token.
    pub tokens: Vec<u32>,
    /// Number of capturing groups.
    pub top_group: u16,
    /// Named groups in order of appearance.
    pub names: Vec<GroupName>,
    /// Options after start-of-pattern verbs were applied.
    pub options: O,
    /// Newline convention after `(*CRLF)`-style verbs.
    pub newline: Newline,
    /// `\R` convention after `(*BSR_…)` verbs.
    pub bsr: Bsr,
    /// `(*LIMIT_…)` caps.
    pub limits: EmbeddedLimits,
    /// Flag bits discovered while parsing.
    pub flags: ProgramFlags,
    /// Pattern offset of every numeric group reference (backreference,
    /// subroutine call or condition), for late validation against the
    /// final group count.
    pub ref_sites: Vec<(u16, usize)>,
}

/// Parse a pattern.
pub fn parse(pattern: &[u8], options: O, ctx: &CompileContext) -> Result<Parsed, CompileError> {
    if pattern.len() > ctx.max_pattern_length {
        return Err(CompileError::at(E::PatternStringTooLong, pattern.len()));
    }
    let mut parser = Parser {
        pattern,
        pos: 0,
        options,
        ctx,
        tokens: Vec::with_capacity(pattern.len() + 8),
        groups: 0,
        names: Vec::new(),
        nest: Vec::new(),
        limits: EmbeddedLimits::default(),
        newline: ctx.newline,
        bsr: ctx.bsr,
        flags: ProgramFlags::empty(),
        in_lookaround: 0,
        ref_sites: Vec::new(),
        seen_names: hashbrown::HashMap::new(),
    };
    parser.run()?;
    Ok(Parsed {
        tokens: parser.tokens,
        top_group: parser.groups,
        names: parser.names,
        options: parser.options,
        newline: parser.newline,
        bsr: parser.bsr,
        limits: parser.limits,
        flags: parser.flags,
        ref_sites: parser.ref_sites,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupKind {
    Plain,
    Lookaround,
    /// `(*asr:` opens two nested groups and closes both on one `)`.
    DoubleKet,
    Cond,
}

#[derive(Debug)]
struct Frame {
    kind: GroupKind,
    saved_options: O,
    start: usize,
}

struct Parser<'a> {
    pattern: &'a [u8],
    pos: usize,
    options: O,
    ctx: &'a CompileContext,
    tokens: Vec<u32>,
    groups: u16,
    names: Vec<GroupName>,
    nest: Vec<Frame>,
    limits: EmbeddedLimits,
    newline: Newline,
    bsr: Bsr,
    flags: ProgramFlags,
    in_lookaround: u32,
    ref_sites: Vec<(u16, usize)>,
    seen_names: hashbrown::HashMap<Vec<u8>, u16>,
}

/// What `read_escape` produced.
enum Esc {
    Literal(u32),
    Type(Escape),
    Backref(u16),
    NamedRef { off: usize, len: usize },
    Prop { negated: bool, payload: u16 },
    /// `\Q`: literal span until `\E`.
    QuoteStart,
    /// Stray `\E`: ignored.
    QuoteEnd,
    /// `\g<name>`/`\g'name'`: subroutine call.
    SubroutineName { off: usize, len: usize },
    /// `\g<n>`-style numeric subroutine call.
    Subroutine(u16),
}

impl<'a> Parser<'a> {
    fn run(&mut self) -> Result<(), CompileError> {
        self.start_verbs()?;

        if self.utf() && !self.options.contains(O::NO_UTF_CHECK) {
            if let Err((e, off)) = utf::validate(self.pattern) {
                return Err(CompileError::at(E::BadPatternUtf(e), off));
            }
        }

        if self.options.contains(O::LITERAL) {
            self.literal_pattern();
            return Ok(());
        }

        let match_line = self.ctx.extra_options.contains(X::MATCH_LINE);
        let match_word = self.ctx.extra_options.contains(X::MATCH_WORD);
        if match_line {
            self.tokens.push(meta(Kind::Circumflex, 0));
            self.tokens.push(meta(Kind::Nocapture, 0));
        } else if match_word {
            self.push_escape(Escape::WordBoundary);
            self.tokens.push(meta(Kind::Nocapture, 0));
        }

        self.main_loop()?;

        if let Some(frame) = self.nest.last() {
            return Err(CompileError::at(E::MissingClosingParenthesis, frame.start));
        }
        if match_line {
            self.tokens.push(meta(Kind::Ket, 0));
            self.tokens.push(meta(Kind::Dollar, 0));
        } else if match_word {
            self.tokens.push(meta(Kind::Ket, 0));
            self.push_escape(Escape::WordBoundary);
        }
        if self.options.contains(O::AUTO_CALLOUT) {
            self.push_callout(255);
        }
        self.tokens.push(meta(Kind::End, 0));
        Ok(())
    }

    // ---- small helpers ------------------------------------------------

    fn utf(&self) -> bool {
        self.options.contains(O::UTF)
    }

    fn extended(&self) -> bool {
        self.options.intersects(O::EXTENDED | O::EXTENDED_MORE)
    }

    fn peek(&self) -> Option<u8> {
        self.pattern.get(self.pos).copied()
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.pattern.get(self.pos + ahead).copied()
    }

    fn bump(&mut self) -> u8 {
        let b = self.pattern[self.pos];
        self.pos += 1;
        b
    }

    /// Decode the next pattern character.
    fn next_char(&mut self) -> u32 {
        if self.utf() {
            let (cp, len) = utf::decode(self.pattern, self.pos);
            self.pos += len;
            cp
        } else {
            self.bump() as u32
        }
    }

    fn err(&self, kind: E) -> CompileError {
        CompileError::at(kind, self.pos)
    }

    fn push_escape(&mut self, e: Escape) {
        self.tokens.push(meta(Kind::Escape, e as u16));
    }

    fn push_literal(&mut self, cp: u32) {
        if cp == b'\r' as u32 || cp == b'\n' as u32 {
            self.flags |= ProgramFlags::HAS_CR_OR_LF;
        }
        self.tokens.push(cp);
    }

    fn push_callout(&mut self, number: u16) {
        self.tokens.push(meta(Kind::CalloutNumber, number));
        self.tokens.push(self.pos as u32);
    }

    fn word_char(&self, b: u8) -> bool {
        self.ctx.tables.ctype(b) & CTYPE_WORD != 0
    }

    // ---- start-of-pattern verbs --------------------------------------

    fn start_verbs(&mut self) -> Result<(), CompileError> {
        loop {
            let rest = &self.pattern[self.pos.min(self.pattern.len())..];
            if !rest.starts_with(b"(*") {
                return Ok(());
            }
            let body_start = self.pos + 2;
            let Some(end_rel) = rest.iter().position(|&b| b == b')') else {
                return Ok(());
            };
            let pat = self.pattern;
            let body = &pat[body_start..self.pos + end_rel];
            let consumed = self.pos + end_rel + 1;
            match body {
                b"UTF" | b"UTF8" => {
                    if self.options.contains(O::NEVER_UTF) {
                        return Err(CompileError::at(E::UtfDisabled, body_start));
                    }
                    self.options |= O::UTF;
                }
                b"UCP" => {
                    if self.options.contains(O::NEVER_UCP) {
                        return Err(CompileError::at(E::UcpDisabled, body_start));
                    }
                    self.options |= O::UCP;
                }
                b"NO_AUTO_POSSESS" => self.options |= O::NO_AUTO_POSSESS,
                b"NO_DOTSTAR_ANCHOR" => self.options |= O::NO_DOTSTAR_ANCHOR,
                b"NO_START_OPT" => self.options |= O::NO_START_OPTIMIZE,
                b"NO_JIT" => {}
                b"NOTEMPTY" | b"NOTEMPTY_ATSTART" => {}
                b"CR" => self.newline = Newline::Cr,
                b"LF" => self.newline = Newline::Lf,
                b"CRLF" => self.newline = Newline::CrLf,
                b"ANY" => self.newline = Newline::Any,
                b"ANYCRLF" => self.newline = Newline::AnyCrlf,
                b"NUL" => self.newline = Newline::Nul,
                b"BSR_ANYCRLF" => self.bsr = Bsr::AnyCrlf,
                b"BSR_UNICODE" => self.bsr = Bsr::Unicode,
                _ => {
                    if let Some(v) = body.strip_prefix(b"LIMIT_MATCH=") {
                        self.limits.match_limit = Some(parse_decimal(v, body_start)?);
                    } else if let Some(v) = body.strip_prefix(b"LIMIT_DEPTH=")
                        .or_else(|| body.strip_prefix(b"LIMIT_RECURSION="))
                    {
                        self.limits.depth_limit = Some(parse_decimal(v, body_start)?);
                    } else if let Some(v) = body.strip_prefix(b"LIMIT_HEAP=") {
                        self.limits.heap_limit = Some(parse_decimal(v, body_start)?);
                    } else {
                        // Not a start-of-pattern verb; the main loop owns it.
                        return Ok(());
                    }
                }
            }
            self.pos = consumed;
        }
    }

    fn literal_pattern(&mut self) {
        while self.pos < self.pattern.len() {
            let cp = self.next_char();
            self.push_literal(cp);
        }
        self.tokens.push(meta(Kind::End, 0));
    }

    // ---- the main walk ------------------------------------------------

    fn main_loop(&mut self) -> Result<(), CompileError> {
        let mut quantifiable = false;
        while self.pos < self.pattern.len() {
            if self.extended() && self.skip_extended_filler() {
                continue;
            }
            let b = self.pattern[self.pos];
            match b {
                b'*' | b'+' | b'?' => {
                    if !quantifiable {
                        self.pos += 1;
                        return Err(self.err(E::NothingToRepeat));
                    }
                    self.pos += 1;
                    self.quantifier(b)?;
                    quantifiable = false;
                }
                b'{' => {
                    if let Some((min, max, after)) = self.try_interval()? {
                        if !quantifiable {
                            self.pos = after;
                            return Err(self.err(E::NothingToRepeat));
                        }
                        self.pos = after;
                        self.interval_suffix(min, max)?;
                        quantifiable = false;
                    } else {
                        self.auto_callout();
                        self.pos += 1;
                        self.push_literal(b'{' as u32);
                        quantifiable = true;
                    }
                }
                b'|' => {
                    self.pos += 1;
                    self.tokens.push(meta(Kind::Alt, 0));
                    quantifiable = false;
                }
                b'^' => {
                    self.auto_callout();
                    self.pos += 1;
                    self.tokens.push(meta(Kind::Circumflex, 0));
                    quantifiable = false;
                }
                b'$' => {
                    self.auto_callout();
                    self.pos += 1;
                    self.tokens.push(meta(Kind::Dollar, 0));
                    quantifiable = false;
                }
                b'.' => {
                    self.auto_callout();
                    self.pos += 1;
                    self.tokens.push(meta(Kind::Dot, 0));
                    quantifiable = true;
                }
                b'[' => {
                    self.auto_callout();
                    self.parse_class()?;
                    quantifiable = true;
                }
                b']' => {
                    // A lone closing bracket is a literal.
                    self.auto_callout();
                    self.pos += 1;
                    self.push_literal(b']' as u32);
                    quantifiable = true;
                }
                b'(' => {
                    quantifiable = self.open_group()?;
                }
                b')' => {
                    self.pos += 1;
                    let frame = self
                        .nest
                        .pop()
                        .ok_or_else(|| self.err(E::UnmatchedParenthesis))?;
                    self.tokens.push(meta(Kind::Ket, 0));
                    if frame.kind == GroupKind::DoubleKet {
                        self.tokens.push(meta(Kind::Ket, 0));
                    }
                    if frame.kind == GroupKind::Lookaround {
                        self.in_lookaround -= 1;
                    }
                    self.options = frame.saved_options;
                    quantifiable = true;
                }
                b'\\' => {
                    quantifiable = self.escape_item()?;
                }
                _ => {
                    self.auto_callout();
                    let cp = self.next_char();
                    self.push_literal(cp);
                    quantifiable = true;
                }
            }
        }
        Ok(())
    }

    fn auto_callout(&mut self) {
        if self.options.contains(O::AUTO_CALLOUT) {
            self.push_callout(255);
        }
    }

    /// Skip whitespace and `#` comments in extended mode. Returns true when
    /// anything was consumed.
    fn skip_extended_filler(&mut self) -> bool {
        let start = self.pos;
        while let Some(b) = self.peek() {
            match b {
                b' ' | b'\t' | b'\n' | 0x0B | 0x0C | b'\r' => self.pos += 1,
                b'#' => {
                    self.pos += 1;
                    while self.pos < self.pattern.len() {
                        if let Some(len) = self.newline.at(self.pattern, self.pos, self.utf()) {
                            self.pos += len;
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        self.pos != start
    }

    // ---- quantifiers --------------------------------------------------

    fn quantifier(&mut self, which: u8) -> Result<(), CompileError> {
        let (plain, lazy, poss) = match which {
            b'*' => (Kind::Asterisk, Kind::AsteriskQuery, Kind::AsteriskPlus),
            b'+' => (Kind::Plus, Kind::PlusQuery, Kind::PlusPlus),
            _ => (Kind::Query, Kind::QueryQuery, Kind::QueryPlus),
        };
        let kind = match self.peek() {
            Some(b'?') => {
                self.pos += 1;
                lazy
            }
            Some(b'+') => {
                self.pos += 1;
                poss
            }
            _ => plain,
        };
        let kind = self.apply_ungreedy(kind, plain, lazy);
        self.tokens.push(meta(kind, 0));
        Ok(())
    }

    fn apply_ungreedy(&self, chosen: Kind, plain: Kind, lazy: Kind) -> Kind {
        if !self.options.contains(O::UNGREEDY) {
            return chosen;
        }
        // UNGREEDY swaps the plain and lazy meanings; possessive stays.
        if chosen == plain {
            lazy
        } else if chosen == lazy {
            plain
        } else {
            chosen
        }
    }

    /// Try to read `{n}`, `{n,}` or `{n,m}` starting at `{`. Returns the
    /// bounds and the position after the closing brace, or `None` when the
    /// braces are not an interval (then `{` is a literal).
    fn try_interval(&self) -> Result<Option<(u32, u32, usize)>, CompileError> {
        let mut p = self.pos + 1;
        let digits = |p: &mut usize| -> Option<u32> {
            let start = *p;
            let mut v: u32 = 0;
            while let Some(&b) = self.pattern.get(*p) {
                if !b.is_ascii_digit() {
                    break;
                }
                v = v.saturating_mul(10).saturating_add((b - b'0') as u32);
                *p += 1;
            }
            (*p > start).then_some(v)
        };
        let Some(min) = digits(&mut p) else { return Ok(None) };
        let (max, end) = match self.pattern.get(p) {
            Some(b'}') => (min, p + 1),
            Some(b',') => {
                p += 1;
                match digits(&mut p) {
                    Some(m) => match self.pattern.get(p) {
                        Some(b'}') => (m, p + 1),
                        _ => return Ok(None),
                    },
                    None => match self.pattern.get(p) {
                        Some(b'}') => (REPEAT_UNLIMITED, p + 1),
                        _ => return Ok(None),
                    },
                }
            }
            _ => return Ok(None),
        };
        if min > MAX_REPEAT || (max != REPEAT_UNLIMITED && max > MAX_REPEAT) {
            return Err(CompileError::at(E::QuantifierTooBig, end));
        }
        if max != REPEAT_UNLIMITED && min > max {
            return Err(CompileError::at(E::QuantifierOutOfOrder, end));
        }
        Ok(Some((min, max, end)))
    }

    fn interval_suffix(&mut self, min: u32, max: u32) -> Result<(), CompileError> {
        let kind = match self.peek() {
            Some(b'?') => {
                self.pos += 1;
                Kind::MinmaxQuery
            }
            Some(b'+') => {
                self.pos += 1;
                Kind::MinmaxPlus
            }
            _ => Kind::Minmax,
        };
        let kind = self.apply_ungreedy(kind, Kind::Minmax, Kind::MinmaxQuery);
        self.tokens.push(meta(kind, 0));
        self.tokens.push(min);
        self.tokens.push(max);
        Ok(())
    }

    // ---- escapes ------------------------------------------------------

    /// Handle a `\…` item in the main walk. Returns whether the emitted
    /// item is quantifiable.
    fn escape_item(&mut self) -> Result<bool, CompileError> {
        match self.read_escape(false)? {
            Esc::Literal(cp) => {
                self.auto_callout();
                self.push_literal(cp);
                Ok(true)
            }
            Esc::Type(e) => {
                let quantifiable = !matches!(
                    e,
                    Escape::SubjectStart
                        | Escape::SubjectEnd
                        | Escape::SubjectEndNewline
                        | Escape::WordBoundary
                        | Escape::NotWordBoundary
                        | Escape::MatchStart
                        | Escape::KeepOut
                );
                if matches!(e, Escape::WordBoundary | Escape::NotWordBoundary) || quantifiable {
                    self.auto_callout();
                }
                if e == Escape::KeepOut {
                    self.flags |= ProgramFlags::HAS_BSK;
                    if self.in_lookaround > 0
                        && !self.ctx.extra_options.contains(X::ALLOW_LOOKAROUND_BSK)
                    {
                        return Err(self.err(E::BackslashKInLookaround));
                    }
                }
                if e == Escape::CodeUnit && self.options.contains(O::NEVER_BACKSLASH_C) {
                    return Err(self.err(E::BackslashCNotAllowed));
                }
                self.push_escape(e);
                Ok(quantifiable)
            }
            Esc::Backref(n) => {
                self.auto_callout();
                self.ref_sites.push((n, self.pos));
                self.tokens.push(meta(Kind::Backref, n));
                self.flags |= ProgramFlags::HAS_BACKREF;
                Ok(true)
            }
            Esc::NamedRef { off, len } => {
                self.auto_callout();
                self.tokens.push(meta(Kind::BackrefByname, 0));
                self.tokens.push(off as u32);
                self.tokens.push(len as u32);
                self.flags |= ProgramFlags::HAS_BACKREF;
                Ok(true)
            }
            Esc::Prop { negated, payload } => {
                self.auto_callout();
                let kind = if negated { Kind::NotProp } else { Kind::Prop };
                self.tokens.push(meta(kind, payload));
                Ok(true)
            }
            Esc::Subroutine(n) => {
                self.auto_callout();
                self.ref_sites.push((n, self.pos));
                self.tokens.push(meta(Kind::Recurse, n));
                self.flags |= ProgramFlags::HAS_RECURSE;
                Ok(true)
            }
            Esc::SubroutineName { off, len } => {
                self.auto_callout();
                self.recurse_by_name(off, len)?;
                Ok(true)
            }
            Esc::QuoteStart => {
                self.quoted_span();
                Ok(true)
            }
            Esc::QuoteEnd => Ok(false),
        }
    }

    fn quoted_span(&mut self) {
        // \Q … \E: everything literal, \E optional at end of pattern.
        loop {
            if self.pos >= self.pattern.len() {
                return;
            }
            if self.pattern[self.pos] == b'\\' && self.peek_at(1) == Some(b'E') {
                self.pos += 2;
                return;
            }
            self.auto_callout();
            let cp = self.next_char();
            self.push_literal(cp);
        }
    }

    /// Read one escape after the backslash. `in_class` changes `\b` and
    /// rejects anchors and references.
    fn read_escape(&mut self, in_class: bool) -> Result<Esc, CompileError> {
        debug_assert_eq!(self.pattern[self.pos], b'\\');
        self.pos += 1;
        let Some(b) = self.peek() else {
            return Err(self.err(E::EndBackslash));
        };

        // Non-alphanumeric escapes are the literal character.
        if !b.is_ascii_alphanumeric() {
            if b < 0x80 {
                self.pos += 1;
                return Ok(Esc::Literal(b as u32));
            }
            // An escaped high character: take the whole character.
            let cp = self.next_char();
            return Ok(Esc::Literal(cp));
        }

        self.pos += 1;
        match b {
            b'd' => Ok(Esc::Type(Escape::DecDigit)),
            b'D' => Ok(Esc::Type(Escape::NotDecDigit)),
            b's' => Ok(Esc::Type(Escape::Whitespace)),
            b'S' => Ok(Esc::Type(Escape::NotWhitespace)),
            b'w' => Ok(Esc::Type(Escape::WordChar)),
            b'W' => Ok(Esc::Type(Escape::NotWordChar)),
            b'h' => Ok(Esc::Type(Escape::HSpace)),
            b'H' => Ok(Esc::Type(Escape::NotHSpace)),
            b'v' => Ok(Esc::Type(Escape::VSpace)),
            b'V' => Ok(Esc::Type(Escape::NotVSpace)),
            b'R' if !in_class => Ok(Esc::Type(Escape::AnyNewline)),
            b'X' if !in_class => Ok(Esc::Type(Escape::Grapheme)),
            b'C' if !in_class => Ok(Esc::Type(Escape::CodeUnit)),
            b'A' if !in_class => Ok(Esc::Type(Escape::SubjectStart)),
            b'Z' if !in_class => Ok(Esc::Type(Escape::SubjectEndNewline)),
            b'z' if !in_class => Ok(Esc::Type(Escape::SubjectEnd)),
            b'G' if !in_class => Ok(Esc::Type(Escape::MatchStart)),
            b'K' if !in_class => Ok(Esc::Type(Escape::KeepOut)),
            b'b' if !in_class => Ok(Esc::Type(Escape::WordBoundary)),
            b'b' => Ok(Esc::Literal(0x08)),
            b'B' if !in_class => Ok(Esc::Type(Escape::NotWordBoundary)),
            b'N' => self.escape_big_n(in_class),
            b'a' => Ok(Esc::Literal(0x07)),
            b'e' => Ok(Esc::Literal(0x1B)),
            b'f' => Ok(Esc::Literal(0x0C)),
            b'n' => Ok(Esc::Literal(0x0A)),
            b'r' => {
                if self.ctx.extra_options.contains(X::ESCAPED_CR_IS_LF) {
                    Ok(Esc::Literal(0x0A))
                } else {
                    Ok(Esc::Literal(0x0D))
                }
            }
            b't' => Ok(Esc::Literal(0x09)),
            b'c' => self.escape_control(),
            b'o' => self.escape_braced_octal(),
            b'x' => self.escape_hex(),
            b'u' if self.options.contains(O::ALT_BSUX) => self.escape_alt_u(),
            b'p' | b'P' => self.escape_property(b == b'P'),
            b'k' if !in_class => self.escape_named_ref(),
            b'g' if !in_class => self.escape_g(),
            b'Q' => Ok(Esc::QuoteStart),
            b'E' => Ok(Esc::QuoteEnd),
            b'0'..=b'9' => self.escape_digits(b, in_class),
            _ => {
                if self.ctx.extra_options.contains(X::BAD_ESCAPE_IS_LITERAL) {
                    Ok(Esc::Literal(b as u32))
                } else {
                    Err(self.err(E::UnsupportedEscape))
                }
            }
        }
    }

    fn escape_big_n(&mut self, in_class: bool) -> Result<Esc, CompileError> {
        if self.peek() == Some(b'{') {
            // \N{U+hhhh}
            if self.peek_at(1) == Some(b'U') && self.peek_at(2) == Some(b'+') {
                self.pos += 3;
                let cp = self.hex_until_brace(E::MalformedUnicodeName)?;
                self.check_code_point(cp)?;
                return Ok(Esc::Literal(cp));
            }
            return Err(self.err(E::MalformedUnicodeName));
        }
        if in_class {
            return Err(self.err(E::UnsupportedEscape));
        }
        Ok(Esc::Type(Escape::NotNewline))
    }

    fn escape_control(&mut self) -> Result<Esc, CompileError> {
        let Some(c) = self.peek() else {
            return Err(self.err(E::EndBackslashC));
        };
        if !(0x20..0x7F).contains(&c) {
            return Err(self.err(E::BadControlEscape));
        }
        self.pos += 1;
        let c = c.to_ascii_uppercase();
        Ok(Esc::Literal((c ^ 0x40) as u32))
    }

    fn escape_braced_octal(&mut self) -> Result<Esc, CompileError> {
        if self.peek() != Some(b'{') {
            return Err(self.err(E::MalformedOctalEscape));
        }
        self.pos += 1;
        let mut v: u32 = 0;
        let mut any = false;
        while let Some(b) = self.peek() {
            match b {
                b'0'..=b'7' => {
                    v = v
                        .checked_mul(8)
                        .and_then(|v| v.checked_add((b - b'0') as u32))
                        .ok_or_else(|| self.err(E::CodePointTooBig))?;
                    any = true;
                    self.pos += 1;
                }
                b'}' => {
                    self.pos += 1;
                    if !any {
                        return Err(self.err(E::MalformedOctalEscape));
                    }
                    self.check_code_point(v)?;
                    return Ok(Esc::Literal(v));
                }
                _ => return Err(self.err(E::MalformedOctalEscape)),
            }
        }
        Err(self.err(E::MalformedOctalEscape))
    }

    fn escape_hex(&mut self) -> Result<Esc, CompileError> {
        if self.options.contains(O::ALT_BSUX) {
            // \xhh with exactly two digits, else literal 'x'.
            let mut v = 0u32;
            for i in 0..2 {
                match self.peek_at(i).and_then(hex_value) {
                    Some(d) => v = v * 16 + d,
                    None => return Ok(Esc::Literal(b'x' as u32)),
                }
            }
            self.pos += 2;
            return Ok(Esc::Literal(v));
        }
        if self.peek() == Some(b'{') {
            self.pos += 1;
            let cp = self.hex_until_brace(E::MalformedHexEscape)?;
            self.check_code_point(cp)?;
            return Ok(Esc::Literal(cp));
        }
        // Up to two hex digits.
        let mut v = 0u32;
        for _ in 0..2 {
            match self.peek().and_then(hex_value) {
                Some(d) => {
                    v = v * 16 + d;
                    self.pos += 1;
                }
                None => break,
            }
        }
        Ok(Esc::Literal(v))
    }

    fn escape_alt_u(&mut self) -> Result<Esc, CompileError> {
        // ALT_BSUX: \uhhhh with exactly four digits, else literal 'u'.
        let mut v = 0u32;
        for i in 0..4 {
            match self.peek_at(i).and_then(hex_value) {
                Some(d) => v = v * 16 + d,
                None => return Ok(Esc::Literal(b'u' as u32)),
            }
        }
        self.pos += 4;
        self.check_code_point(v)?;
        Ok(Esc::Literal(v))
    }

    fn hex_until_brace(&mut self, err: E) -> Result<u32, CompileError> {
        let mut v: u32 = 0;
        let mut any = false;
        while let Some(b) = self.peek() {
            if b == b'}' {
                self.pos += 1;
                if !any {
                    return Err(self.err(err));
                }
                return Ok(v);
            }
            let Some(d) = hex_value(b) else {
                return Err(self.err(err));
            };
            v = v
                .checked_mul(16)
                .and_then(|v| v.checked_add(d))
                .ok_or_else(|| self.err(E::CodePointTooBig))?;
            any = true;
            self.pos += 1;
        }
        Err(self.err(err))
    }

    fn check_code_point(&self, cp: u32) -> Result<(), CompileError> {
        if self.utf() {
            if cp > 0x10FFFF {
                return Err(self.err(E::CodePointTooBig));
            }
            if (0xD800..=0xDFFF).contains(&cp) {
                return Err(self.err(E::SurrogateCodePoint));
            }
        } else if cp > 0xFF {
            return Err(self.err(E::CodePointTooBig));
        }
        Ok(())
    }

    fn escape_property(&mut self, negated: bool) -> Result<Esc, CompileError> {
        let (name_start, name_len, negated) = if self.peek() == Some(b'{') {
            self.pos += 1;
            let mut neg = negated;
            if self.peek() == Some(b'^') {
                self.pos += 1;
                neg = !neg;
            }
            let start = self.pos;
            while let Some(b) = self.peek() {
                if b == b'}' {
                    break;
                }
                self.pos += 1;
            }
            if self.peek() != Some(b'}') {
                return Err(self.err(E::MalformedProperty));
            }
            let len = self.pos - start;
            self.pos += 1;
            (start, len, neg)
        } else {
            // Single-letter form: \pL.
            let Some(b) = self.peek() else {
                return Err(self.err(E::MalformedProperty));
            };
            if !b.is_ascii_alphabetic() {
                return Err(self.err(E::MalformedProperty));
            }
            self.pos += 1;
            (self.pos - 1, 1, negated)
        };
        let name = &self.pattern[name_start..name_start + name_len];
        let prop = skua_ucd::resolve_property(name)
            .ok_or_else(|| self.err(E::UnknownProperty))?;
        let (k, v) = skua_asm::prop::encode(prop);
        Ok(Esc::Prop { negated, payload: ((k as u16) << 8) | v as u16 })
    }

    fn escape_named_ref(&mut self) -> Result<Esc, CompileError> {
        let close = match self.peek() {
            Some(b'<') => b'>',
            Some(b'\'') => b'\'',
            Some(b'{') => b'}',
            _ => return Err(self.err(E::BadBackslashK)),
        };
        self.pos += 1;
        let (off, len) = self.read_name(close)?;
        Ok(Esc::NamedRef { off, len })
    }

    fn escape_g(&mut self) -> Result<Esc, CompileError> {
        match self.peek() {
            Some(b'{') => {
                self.pos += 1;
                let n = self.signed_group_number(b'}')?;
                Ok(Esc::Backref(n))
            }
            Some(b'<') | Some(b'\'') => {
                let close = if self.bump() == b'<' { b'>' } else { b'\'' };
                // \g<…> is a subroutine call; a leading digit or sign makes
                // it numeric.
                if matches!(self.peek(), Some(b'0'..=b'9') | Some(b'+') | Some(b'-')) {
                    let n = self.signed_group_number(close)?;
                    Ok(Esc::Subroutine(n))
                } else {
                    let (off, len) = self.read_name(close)?;
                    Ok(Esc::SubroutineName { off, len })
                }
            }
            Some(b'0'..=b'9') => {
                let n = self.plain_group_number()?;
                Ok(Esc::Backref(n))
            }
            Some(b'-') | Some(b'+') => {
                let n = self.signed_group_number_unbracketed()?;
                Ok(Esc::Backref(n))
            }
            _ => Err(self.err(E::BadBackslashG)),
        }
    }

    fn plain_group_number(&mut self) -> Result<u16, CompileError> {
        let mut v: u32 = 0;
        let mut any = false;
        while let Some(b) = self.peek() {
            if !b.is_ascii_digit() {
                break;
            }
            v = v.saturating_mul(10).saturating_add((b - b'0') as u32);
            any = true;
            self.pos += 1;
        }
        if !any || v == 0 || v > skua_asm::MAX_CAPTURES {
            return Err(self.err(E::BadRelativeReference));
        }
        Ok(v as u16)
    }

    fn signed_group_number_unbracketed(&mut self) -> Result<u16, CompileError> {
        let sign = self.bump();
        let n = self.plain_group_number()? as i32;
        self.relative_group(sign, n)
    }

    fn signed_group_number(&mut self, close: u8) -> Result<u16, CompileError> {
        let sign = match self.peek() {
            Some(s @ (b'-' | b'+')) => {
                self.pos += 1;
                s
            }
            _ => 0,
        };
        let n = self.plain_group_number()? as i32;
        if self.peek() != Some(close) {
            return Err(self.err(E::BadBackslashG));
        }
        self.pos += 1;
        if sign == 0 {
            return Ok(n as u16);
        }
        self.relative_group(sign, n)
    }

    fn relative_group(&self, sign: u8, n: i32) -> Result<u16, CompileError> {
        let current = self.groups as i32;
        let absolute = if sign == b'-' { current - n + 1 } else { current + n };
        if absolute < 1 || absolute > skua_asm::MAX_CAPTURES as i32 {
            return Err(self.err(E::BadRelativeReference));
        }
        Ok(absolute as u16)
    }

    fn escape_digits(&mut self, first: u8, in_class: bool) -> Result<Esc, CompileError> {
        self.pos -= 1; // step back onto the first digit
        let python_octal = self.ctx.extra_options.contains(X::PYTHON_OCTAL);
        let no_bs0 = self.ctx.extra_options.contains(X::NO_BS0);

        if first == b'0' && !no_bs0 {
            return self.octal_chars(python_octal);
        }

        if !in_class {
            // Count the digits to decide backref versus octal.
            let start = self.pos;
            let mut v: u32 = 0;
            let mut p = start;
            while let Some(&b) = self.pattern.get(p) {
                if !b.is_ascii_digit() {
                    break;
                }
                v = v.saturating_mul(10).saturating_add((b - b'0') as u32);
                p += 1;
            }
            let is_backref = if python_octal {
                true
            } else {
                v < 10 || first > b'7' || v <= self.groups as u32
            };
            if is_backref {
                self.pos = p;
                if v == 0 || v > skua_asm::MAX_CAPTURES {
                    return Err(self.err(E::BackrefToZero));
                }
                return Ok(Esc::Backref(v as u16));
            }
        }
        if first > b'7' {
            return Err(self.err(E::UnsupportedEscape));
        }
        self.octal_chars(python_octal)
    }

    fn octal_chars(&mut self, _python: bool) -> Result<Esc, CompileError> {
        // Up to three octal digits (including a leading 0).
        let mut v: u32 = 0;
        for _ in 0..3 {
            match self.peek() {
                Some(b @ b'0'..=b'7') => {
                    v = v * 8 + (b - b'0') as u32;
                    self.pos += 1;
                }
                _ => break,
            }
        }
        if !self.utf() && v > 0xFF {
            return Err(self.err(E::OctalTooBig));
        }
        Ok(Esc::Literal(v))
    }

    fn read_name(&mut self, close: u8) -> Result<(usize, usize), CompileError> {
        let start = self.pos;
        let Some(first) = self.peek() else {
            return Err(self.err(E::BadGroupName));
        };
        if self.ctx.tables.ctype(first) & CTYPE_DIGIT != 0 {
            return Err(self.err(E::GroupNameFirstChar));
        }
        while let Some(b) = self.peek() {
            if b == close {
                break;
            }
            if !self.word_char(b) {
                return Err(self.err(E::BadGroupName));
            }
            self.pos += 1;
        }
        if self.peek() != Some(close) {
            return Err(self.err(E::BadGroupName));
        }
        let len = self.pos - start;
        self.pos += 1;
        if len == 0 {
            return Err(self.err(E::BadGroupName));
        }
        if len > MAX_NAME_LENGTH {
            return Err(CompileError::at(E::GroupNameTooLong, start));
        }
        Ok((start, len))
    }

    fn recurse_by_name(&mut self, off: usize, len: usize) -> Result<(), CompileError> {
        let name = &self.pattern[off..off + len];
        // Forward calls are legal, so the name may not be known yet; known
        // names resolve now, unknown ones stay symbolic for the generator.
        if let Some(g) = self.names.iter().find(|g| g.name == name) {
            self.tokens.push(meta(Kind::Recurse, g.number));
        } else {
            self.tokens.push(meta(Kind::Recurse, ANY_RECURSION));
            self.tokens.push(off as u32);
            self.tokens.push(len as u32);
        }
        self.flags |= ProgramFlags::HAS_RECURSE;
        Ok(())
    }

    // ---- groups -------------------------------------------------------

    /// Handle `(`. Returns whether the construct is quantifiable when it
    /// closes (always true for real groups; false for option-settings).
    fn open_group(&mut self) -> Result<bool, CompileError> {
        let start = self.pos;
        self.pos += 1;
        if self.nest.len() as u32 >= self.ctx.parens_nest_limit {
            return Err(CompileError::at(E::NestingTooDeep, start));
        }

        match self.peek() {
            Some(b'*') => {
                self.pos += 1;
                self.verb(start)
            }
            Some(b'?') => {
                self.pos += 1;
                self.query_group(start)
            }
            _ => {
                self.auto_callout();
                if self.options.contains(O::NO_AUTO_CAPTURE) {
                    self.push_group(start, GroupKind::Plain, meta(Kind::Nocapture, 0));
                } else {
                    self.new_capture(start, None)?;
                }
                Ok(false)
            }
        }
    }

    fn push_group(&mut self, start: usize, kind: GroupKind, token: u32) {
        self.nest.push(Frame { kind, saved_options: self.options, start });
        self.tokens.push(token);
        if kind == GroupKind::Lookaround {
            self.in_lookaround += 1;
        }
    }

    fn new_capture(&mut self, start: usize, name: Option<(usize, usize)>) -> Result<(), CompileError> {
        if self.groups as u32 >= skua_asm::MAX_CAPTURES {
            return Err(CompileError::at(E::TooManyCaptures, start));
        }
        self.groups += 1;
        let number = self.groups;
        if let Some((off, len)) = name {
            let name = self.pattern[off..off + len].to_vec();
            if self.seen_names.contains_key(&name) && !self.options.contains(O::DUPNAMES) {
                return Err(CompileError::at(E::DuplicateGroupName, off));
            }
            self.seen_names.insert(name.clone(), number);
            self.names.push(GroupName { name, number });
        }
        self.push_group(start, GroupKind::Plain, meta(Kind::Capture, number));
        Ok(())
    }

    fn query_group(&mut self, start: usize) -> Result<bool, CompileError> {
        let Some(b) = self.peek() else {
            return Err(self.err(E::BadGroupSyntax));
        };
        match b {
            b':' => {
                self.pos += 1;
                self.push_group(start, GroupKind::Plain, meta(Kind::Nocapture, 0));
                Ok(false)
            }
            b'#' => {
                // (?# comment )
                self.pos += 1;
                while let Some(c) = self.peek() {
                    self.pos += 1;
                    if c == b')' {
                        return Ok(false);
                    }
                }
                Err(CompileError::at(E::MissingClosingParenthesis, start))
            }
            b'=' => {
                self.pos += 1;
                self.push_group(start, GroupKind::Lookaround, meta(Kind::Lookahead, 0));
                Ok(false)
            }
            b'!' => {
                self.pos += 1;
                self.push_group(start, GroupKind::Lookaround, meta(Kind::LookaheadNot, 0));
                Ok(false)
            }
            b'>' => {
                self.pos += 1;
                self.push_group(start, GroupKind::Plain, meta(Kind::Atomic, 0));
                Ok(false)
            }
            b'<' => {
                self.pos += 1;
                match self.peek() {
                    Some(b'=') => {
                        self.pos += 1;
                        self.push_group(start, GroupKind::Lookaround, meta(Kind::Lookbehind, 0));
                        self.tokens.push(start as u32);
                        Ok(false)
                    }
                    Some(b'!') => {
                        self.pos += 1;
                        self.push_group(start, GroupKind::Lookaround, meta(Kind::LookbehindNot, 0));
                        self.tokens.push(start as u32);
                        Ok(false)
                    }
                    _ => {
                        let name = self.read_name(b'>')?;
                        self.auto_callout();
                        self.new_capture(start, Some(name))?;
                        Ok(false)
                    }
                }
            }
            b'\'' => {
                self.pos += 1;
                let name = self.read_name(b'\'')?;
                self.auto_callout();
                self.new_capture(start, Some(name))?;
                Ok(false)
            }
            b'P' => {
                self.pos += 1;
                match self.peek() {
                    Some(b'<') => {
                        self.pos += 1;
                        let name = self.read_name(b'>')?;
                        self.auto_callout();
                        self.new_capture(start, Some(name))?;
                        Ok(false)
                    }
                    Some(b'=') => {
                        self.pos += 1;
                        let (off, len) = self.read_name(b')')?;
                        self.auto_callout();
                        self.tokens.push(meta(Kind::BackrefByname, 0));
                        self.tokens.push(off as u32);
                        self.tokens.push(len as u32);
                        self.flags |= ProgramFlags::HAS_BACKREF;
                        Ok(true)
                    }
                    Some(b'>') => {
                        self.pos += 1;
                        let (off, len) = self.read_name(b')')?;
                        self.auto_callout();
                        self.recurse_by_name(off, len)?;
                        Ok(true)
                    }
                    _ => Err(self.err(E::BadGroupSyntax)),
                }
            }
            b'&' => {
                self.pos += 1;
                let (off, len) = self.read_name(b')')?;
                self.auto_callout();
                self.recurse_by_name(off, len)?;
                Ok(true)
            }
            b'R' => {
                self.pos += 1;
                if self.peek() != Some(b')') {
                    return Err(self.err(E::BadGroupSyntax));
                }
                self.pos += 1;
                self.auto_callout();
                self.tokens.push(meta(Kind::Recurse, 0));
                self.flags |= ProgramFlags::HAS_RECURSE;
                Ok(true)
            }
            b'C' => {
                self.pos += 1;
                self.callout(start)
            }
            b'(' => {
                // Conditional group: the '(' stays current for condition
                // parsing.
                self.condition(start)?;
                Ok(false)
            }
            b'|' => Err(self.err(E::BadGroupSyntax)),
            b'0'..=b'9' | b'+' | b'-' => {
                // (?n), (?+n), (?-n) subroutine calls, or (?-i) options.
                if b == b'-' && matches!(self.peek_at(1), Some(c) if c.is_ascii_alphabetic()) {
                    self.inline_options(start)
                } else {
                    let sign = if b == b'+' || b == b'-' {
                        self.pos += 1;
                        b
                    } else {
                        0
                    };
                    let n = self.plain_group_number()?;
                    if self.peek() != Some(b')') {
                        return Err(self.err(E::BadGroupSyntax));
                    }
                    self.pos += 1;
                    let target = if sign == 0 {
                        n
                    } else {
                        self.relative_group(sign, n as i32)?
                    };
                    self.auto_callout();
                    self.ref_sites.push((target, self.pos));
                    self.tokens.push(meta(Kind::Recurse, target));
                    self.flags |= ProgramFlags::HAS_RECURSE;
                    Ok(true)
                }
            }
            _ => self.inline_options(start),
        }
    }

    fn callout(&mut self, start: usize) -> Result<bool, CompileError> {
        if self.ctx.extra_options.contains(X::NEVER_CALLOUT) {
            return Err(CompileError::at(E::CalloutsDisabled, start));
        }
        match self.peek() {
            Some(b')') => {
                self.pos += 1;
                self.push_callout(0);
                Ok(true)
            }
            Some(b'0'..=b'9') => {
                let mut v: u32 = 0;
                while let Some(b @ b'0'..=b'9') = self.peek() {
                    v = v * 10 + (b - b'0') as u32;
                    if v > 255 {
                        return Err(self.err(E::CalloutBadNumber));
                    }
                    self.pos += 1;
                }
                if self.peek() != Some(b')') {
                    return Err(self.err(E::CalloutMissingParen));
                }
                self.pos += 1;
                self.push_callout(v as u16);
                Ok(true)
            }
            Some(delim @ (b'"' | b'\'' | b'`' | b'^' | b'%' | b'#' | b'$')) => {
                self.pos += 1;
                let str_start = self.pos;
                loop {
                    match self.peek() {
                        None => return Err(self.err(E::CalloutMissingParen)),
                        Some(c) if c == delim => {
                            if self.peek_at(1) == Some(delim) {
                                self.pos += 2;
                                continue;
                            }
                            break;
                        }
                        _ => self.pos += 1,
                    }
                }
                let len = self.pos - str_start;
                if len > u16::MAX as usize {
                    return Err(self.err(E::CalloutStringTooLong));
                }
                self.pos += 1;
                if self.peek() != Some(b')') {
                    return Err(self.err(E::CalloutMissingParen));
                }
                self.pos += 1;
                self.tokens.push(meta(Kind::CalloutString, 0));
                self.tokens.push(delim as u32);
                self.tokens.push(str_start as u32);
                self.tokens.push(len as u32);
                Ok(true)
            }
            _ => Err(self.err(E::CalloutBadDelimiter)),
        }
    }

    fn condition(&mut self, start: usize) -> Result<(), CompileError> {
        debug_assert_eq!(self.peek(), Some(b'('));
        // Assertion conditions keep their own '(' so the assertion parses
        // as the first element of the group.
        let after = self.peek_at(1);
        let is_assertion = matches!(after, Some(b'?') | Some(b'*'))
            && !matches!(
                (after, self.peek_at(2)),
                (Some(b'?'), Some(b'P')) | (Some(b'?'), Some(b'<')) | (Some(b'?'), Some(b'\''))
            )
            || matches!((after, self.peek_at(2)), (Some(b'?'), Some(b'<')) if matches!(self.peek_at(3), Some(b'=') | Some(b'!')));

        if is_assertion {
            self.push_group(start, GroupKind::Cond, meta(Kind::CondAssert, 0));
            return Ok(());
        }

        self.pos += 1; // consume '('
        let b = self.peek().ok_or_else(|| self.err(E::BadCondition))?;
        match b {
            b'0'..=b'9' => {
                let n = self.plain_group_number()?;
                self.expect(b')', E::BadCondition)?;
                self.ref_sites.push((n, self.pos));
                self.push_group(start, GroupKind::Cond, meta(Kind::CondNumber, n));
            }
            b'+' | b'-' => {
                self.pos += 1;
                let n = self.plain_group_number()? as i32;
                let target = self.relative_group(b, n)?;
                self.expect(b')', E::BadCondition)?;
                self.push_group(start, GroupKind::Cond, meta(Kind::CondNumber, target));
            }
            b'R' => {
                match self.peek_at(1) {
                    Some(b')') => {
                        self.pos += 2;
                        self.push_group(
                            start,
                            GroupKind::Cond,
                            meta(Kind::CondRnumber, ANY_RECURSION),
                        );
                    }
                    Some(b'&') => {
                        self.pos += 2;
                        let (off, len) = self.read_name(b')')?;
                        self.push_group(start, GroupKind::Cond, meta(Kind::CondRname, 0));
                        self.tokens.push(off as u32);
                        self.tokens.push(len as u32);
                    }
                    Some(b'0'..=b'9') => {
                        self.pos += 1;
                        let n = self.plain_group_number()?;
                        self.expect(b')', E::BadCondition)?;
                        self.push_group(start, GroupKind::Cond, meta(Kind::CondRnumber, n));
                    }
                    _ => {
                        // A name beginning with R.
                        let (off, len) = self.read_name(b')')?;
                        self.cond_name(start, off, len)?;
                    }
                }
            }
            b'<' => {
                self.pos += 1;
                let (off, len) = self.read_name(b'>')?;
                self.expect(b')', E::BadCondition)?;
                self.cond_name(start, off, len)?;
            }
            b'\'' => {
                self.pos += 1;
                let (off, len) = self.read_name(b'\'')?;
                self.expect(b')', E::BadCondition)?;
                self.cond_name(start, off, len)?;
            }
            _ => {
                let probe = &self.pattern[self.pos..];
                if probe.starts_with(b"DEFINE)") {
                    self.pos += 7;
                    self.push_group(start, GroupKind::Cond, meta(Kind::CondDefine, 0));
                } else if probe.starts_with(b"VERSION") {
                    self.pos += 7;
                    let ok = self.version_condition()?;
                    self.push_group(
                        start,
                        GroupKind::Cond,
                        meta(Kind::CondVersion, ok as u16),
                    );
                } else {
                    let (off, len) = self.read_name(b')')?;
                    self.cond_name(start, off, len)?;
                }
            }
        }
        Ok(())
    }

    fn cond_name(&mut self, start: usize, off: usize, len: usize) -> Result<(), CompileError> {
        self.push_group(start, GroupKind::Cond, meta(Kind::CondName, 0));
        self.tokens.push(off as u32);
        self.tokens.push(len as u32);
        Ok(())
    }

    fn version_condition(&mut self) -> Result<bool, CompileError> {
        // (?(VERSION>=n.m) or (?(VERSION=n.m)
        let ge = if self.peek() == Some(b'>') {
            self.pos += 1;
            true
        } else {
            false
        };
        self.expect(b'=', E::BadVersionCondition)?;
        let mut major: u32 = 0;
        let mut any = false;
        while let Some(b @ b'0'..=b'9') = self.peek() {
            major = major * 10 + (b - b'0') as u32;
            any = true;
            self.pos += 1;
        }
        if !any {
            return Err(self.err(E::BadVersionCondition));
        }
        let mut minor: u32 = 0;
        if self.peek() == Some(b'.') {
            self.pos += 1;
            let mut digits = 0;
            while let Some(b @ b'0'..=b'9') = self.peek() {
                minor = minor * 10 + (b - b'0') as u32;
                digits += 1;
                self.pos += 1;
            }
            if digits == 0 || digits > 2 {
                return Err(self.err(E::BadVersionCondition));
            }
            if digits == 1 {
                minor *= 10;
            }
        }
        self.expect(b')', E::BadVersionCondition)?;
        let (have_major, have_minor) = crate::VERSION;
        let have = (have_major as u32) * 100 + have_minor as u32;
        let want = major * 100 + minor;
        Ok(if ge { have >= want } else { have == want })
    }

    fn expect(&mut self, b: u8, err: E) -> Result<(), CompileError> {
        if self.peek() != Some(b) {
            return Err(self.err(err));
        }
        self.pos += 1;
        Ok(())
    }

    // ---- verbs --------------------------------------------------------

    fn verb(&mut self, start: usize) -> Result<bool, CompileError> {
        // Alphabetic assertions and the control verbs. `self.pos` sits
        // just after "(*".
        let pat = self.pattern;
        let body_start = self.pos;
        let mut p = self.pos;
        while let Some(&b) = pat.get(p) {
            if b == b')' || b == b':' {
                break;
            }
            p += 1;
        }
        let name = &pat[body_start..p];
        let delim = pat.get(p).copied();

        // Group-opening alphabetic forms.
        if delim == Some(b':') {
            let token = match name {
                b"positive_lookahead" | b"pla" => Some((Kind::Lookahead, GroupKind::Lookaround)),
                b"negative_lookahead" | b"nla" => {
                    Some((Kind::LookaheadNot, GroupKind::Lookaround))
                }
                b"positive_lookbehind" | b"plb" => {
                    Some((Kind::Lookbehind, GroupKind::Lookaround))
                }
                b"negative_lookbehind" | b"nlb" => {
                    Some((Kind::LookbehindNot, GroupKind::Lookaround))
                }
                b"non_atomic_positive_lookahead" | b"napla" => {
                    Some((Kind::LookaheadNa, GroupKind::Lookaround))
                }
                b"non_atomic_positive_lookbehind" | b"naplb" => {
                    Some((Kind::LookbehindNa, GroupKind::Lookaround))
                }
                b"atomic" => Some((Kind::Atomic, GroupKind::Plain)),
                b"script_run" | b"sr" => Some((Kind::ScriptRun, GroupKind::Plain)),
                b"atomic_script_run" | b"asr" => None, // special double group
                _ => return self.control_verb(start, name, p, true),
            };
            self.pos = p + 1;
            match token {
                Some((kind, gk)) => {
                    self.push_group(start, gk, meta(kind, 0));
                    if matches!(kind, Kind::Lookbehind | Kind::LookbehindNot | Kind::LookbehindNa)
                    {
                        self.tokens.push(start as u32);
                    }
                }
                None => {
                    // (*asr: …) is (*sr:(*atomic: …)).
                    self.push_group(start, GroupKind::DoubleKet, meta(Kind::ScriptRun, 0));
                    self.tokens.push(meta(Kind::Atomic, 0));
                }
            }
            return Ok(false);
        }
        self.control_verb(start, name, p, false)
    }

    fn control_verb(
        &mut self,
        start: usize,
        name: &'a [u8],
        name_end: usize,
        has_colon: bool,
    ) -> Result<bool, CompileError> {
        let (arg_off, arg_len) = if has_colon {
            let arg_start = name_end + 1;
            let mut p = arg_start;
            while let Some(&b) = self.pattern.get(p) {
                if b == b')' {
                    break;
                }
                p += 1;
            }
            if self.pattern.get(p) != Some(&b')') {
                return Err(CompileError::at(E::MissingClosingParenthesis, start));
            }
            self.pos = p + 1;
            (arg_start, p - arg_start)
        } else {
            if self.pattern.get(name_end) != Some(&b')') {
                return Err(CompileError::at(E::MissingClosingParenthesis, start));
            }
            self.pos = name_end + 1;
            (0, 0)
        };

        if arg_len > MAX_VERB_ARG_LENGTH {
            return Err(CompileError::at(E::VerbNameTooLong, arg_off));
        }

        let push_arg = |parser: &mut Self, kind: Kind| {
            parser.tokens.push(meta(kind, 0));
            parser.tokens.push(arg_off as u32);
            parser.tokens.push(arg_len as u32);
        };

        match (name, has_colon) {
            (b"", true) | (b"MARK", true) => {
                if arg_len == 0 {
                    return Err(CompileError::at(E::VerbNameMissing, arg_off));
                }
                push_arg(self, Kind::Mark);
            }
            (b"MARK", false) => {
                return Err(CompileError::at(E::VerbNameMissing, name_end));
            }
            (b"ACCEPT", false) => {
                self.flags |= ProgramFlags::HAS_ACCEPT;
                self.tokens.push(meta(Kind::Accept, 0));
            }
            (b"FAIL", false) | (b"F", false) => self.tokens.push(meta(Kind::Fail, 0)),
            (b"COMMIT", false) => self.tokens.push(meta(Kind::Commit, 0)),
            (b"COMMIT", true) => push_arg(self, Kind::CommitArg),
            (b"PRUNE", false) => self.tokens.push(meta(Kind::Prune, 0)),
            (b"PRUNE", true) => push_arg(self, Kind::PruneArg),
            (b"SKIP", false) => self.tokens.push(meta(Kind::Skip, 0)),
            (b"SKIP", true) => push_arg(self, Kind::SkipArg),
            (b"THEN", false) => self.tokens.push(meta(Kind::Then, 0)),
            (b"THEN", true) => push_arg(self, Kind::ThenArg),
            _ => return Err(CompileError::at(E::UnknownVerb, start)),
        }
        Ok(false)
    }

    // ---- inline options ----------------------------------------------

    fn inline_options(&mut self, start: usize) -> Result<bool, CompileError> {
        let mut add = O::empty();
        let mut remove = O::empty();
        let mut removing = false;
        let mut j_seen = false;

        if self.peek() == Some(b'^') {
            // (?^…) unsets the whole imnsx set before any letters apply.
            self.pos += 1;
            remove |= O::CASELESS
                | O::MULTILINE
                | O::NO_AUTO_CAPTURE
                | O::DOTALL
                | O::EXTENDED
                | O::EXTENDED_MORE;
        }

        loop {
            let Some(b) = self.peek() else {
                return Err(CompileError::at(E::MissingClosingParenthesis, start));
            };
            let bit = match b {
                b'i' => O::CASELESS,
                b'm' => O::MULTILINE,
                b's' => O::DOTALL,
                b'x' => {
                    if self.peek_at(1) == Some(b'x') {
                        self.pos += 1;
                        O::EXTENDED_MORE | O::EXTENDED
                    } else {
                        O::EXTENDED
                    }
                }
                b'n' => O::NO_AUTO_CAPTURE,
                b'J' => {
                    j_seen = true;
                    O::DUPNAMES
                }
                b'U' => O::UNGREEDY,
                b'-' => {
                    if removing {
                        return Err(self.err(E::BadOptionSetting));
                    }
                    removing = true;
                    self.pos += 1;
                    continue;
                }
                b')' | b':' => break,
                _ => return Err(self.err(E::BadOptionSetting)),
            };
            if removing {
                remove |= bit;
            } else {
                add |= bit;
            }
            self.pos += 1;
        }

        if j_seen {
            self.flags |= ProgramFlags::JCHANGED;
        }
        // Turning off EXTENDED_MORE alone also drops EXTENDED per the
        // documented `(?-x)` behaviour of clearing both.
        if remove.contains(O::EXTENDED) {
            remove |= O::EXTENDED_MORE;
        }

        let closer = self.bump();
        if closer == b':' {
            // Group-local option change.
            self.push_group(start, GroupKind::Plain, meta(Kind::Nocapture, 0));
            self.options = (self.options | add) - remove;
            self.tokens.push(meta(Kind::Options, 0));
            self.tokens.push(self.options.bits());
            Ok(false)
        } else {
            self.options = (self.options | add) - remove;
            self.tokens.push(meta(Kind::Options, 0));
            self.tokens.push(self.options.bits());
            Ok(false)
        }
    }

    // ---- classes ------------------------------------------------------

    fn parse_class(&mut self) -> Result<(), CompileError> {
        let class_start = self.pos;
        debug_assert_eq!(self.pattern[self.pos], b'[');
        self.pos += 1;

        // POSIX-style [[.x.]] and [[=x=]] at the top level are reported
        // specially when the class starts with them.
        let negated = if self.peek() == Some(b'^') {
            self.pos += 1;
            true
        } else {
            false
        };

        if self.peek() == Some(b']') && self.options.contains(O::ALLOW_EMPTY_CLASS) {
            self.pos += 1;
            let kind = if negated { Kind::ClassEmptyNot } else { Kind::ClassEmpty };
            self.tokens.push(meta(kind, 0));
            return Ok(());
        }

        let open = if negated { Kind::ClassNot } else { Kind::Class };
        self.tokens.push(meta(open, 0));
        self.class_body(class_start)?;
        self.tokens.push(meta(Kind::ClassEnd, 0));
        Ok(())
    }

    fn class_body(&mut self, class_start: usize) -> Result<(), CompileError> {
        let ext = self.ctx.extra_options.contains(X::ALT_EXTENDED_CLASS);
        let mut first = true;
        loop {
            if self.options.contains(O::EXTENDED_MORE) {
                while matches!(self.peek(), Some(b' ') | Some(b'\t')) {
                    self.pos += 1;
                }
            }
            let Some(b) = self.peek() else {
                return Err(CompileError::at(E::MissingSquareBracket, class_start));
            };
            match b {
                b']' if !first => {
                    self.pos += 1;
                    return Ok(());
                }
                b'[' if self.posix_like_ahead() => self.class_posix()?,
                b'[' if ext => {
                    // Nested class.
                    self.parse_class()?;
                }
                b'&' if ext && self.peek_at(1) == Some(b'&') => {
                    self.pos += 2;
                    self.tokens.push(meta(Kind::ClassAnd, 0));
                }
                b'|' if ext && self.peek_at(1) == Some(b'|') => {
                    self.pos += 2;
                    self.tokens.push(meta(Kind::ClassOr, 0));
                }
                b'-' if ext && self.peek_at(1) == Some(b'-') => {
                    self.pos += 2;
                    self.tokens.push(meta(Kind::ClassSub, 0));
                }
                b'~' if ext && self.peek_at(1) == Some(b'~') => {
                    self.pos += 2;
                    self.tokens.push(meta(Kind::ClassXor, 0));
                }
                b'\\' => {
                    match self.read_escape(true)? {
                        Esc::Literal(cp) => self.class_atom(cp)?,
                        Esc::Type(e) => self.tokens.push(meta(Kind::Escape, e as u16)),
                        Esc::Prop { negated, payload } => {
                            let kind = if negated { Kind::NotProp } else { Kind::Prop };
                            self.tokens.push(meta(kind, payload));
                        }
                        Esc::QuoteStart => self.class_quoted()?,
                        Esc::QuoteEnd => {}
                        _ => return Err(self.err(E::UnsupportedEscape)),
                    }
                }
                _ => {
                    let cp = self.next_char();
                    self.class_atom(cp)?;
                }
            }
            first = false;
        }
    }

    /// Emit a literal class member, folding a following `-bound` into a
    /// range token pair.
    fn class_atom(&mut self, cp: u32) -> Result<(), CompileError> {
        self.tokens.push(cp);
        if self.peek() != Some(b'-') {
            return Ok(());
        }
        // `-]` is a literal hyphen; `--` under extended classes is an
        // operator handled by the caller.
        match self.peek_at(1) {
            None => return Ok(()),
            Some(b']') => return Ok(()),
            Some(b'-') if self.ctx.extra_options.contains(X::ALT_EXTENDED_CLASS) => {
                return Ok(())
            }
            _ => {}
        }
        self.pos += 1; // consume '-'
        let range_kind = if self.peek() == Some(b'\\') {
            match self.read_escape(true)? {
                Esc::Literal(hi) => {
                    if hi < cp {
                        return Err(self.err(E::ClassRangeOrder));
                    }
                    self.tokens.push(meta(Kind::RangeEscaped, 0));
                    self.tokens.push(hi);
                    return Ok(());
                }
                // A type escape after the hyphen makes the hyphen literal.
                Esc::Type(e) => {
                    self.tokens.push(b'-' as u32);
                    self.tokens.push(meta(Kind::Escape, e as u16));
                    return Ok(());
                }
                Esc::Prop { negated, payload } => {
                    self.tokens.push(b'-' as u32);
                    let kind = if negated { Kind::NotProp } else { Kind::Prop };
                    self.tokens.push(meta(kind, payload));
                    return Ok(());
                }
                _ => return Err(self.err(E::InvalidRangeInClass)),
            }
        } else {
            Kind::RangeLiteral
        };
        let hi = self.next_char();
        if hi < cp {
            return Err(self.err(E::ClassRangeOrder));
        }
        self.tokens.push(meta(range_kind, 0));
        self.tokens.push(hi);
        Ok(())
    }

    fn class_quoted(&mut self) -> Result<(), CompileError> {
        loop {
            if self.pos >= self.pattern.len() {
                return Ok(());
            }
            if self.pattern[self.pos] == b'\\' && self.peek_at(1) == Some(b'E') {
                self.pos += 2;
                return Ok(());
            }
            if self.pattern[self.pos] == b']' {
                // Quoted ']' stays literal inside the class.
                self.pos += 1;
                self.tokens.push(b']' as u32);
                continue;
            }
            let cp = self.next_char();
            self.class_atom(cp)?;
        }
    }

    fn posix_like_ahead(&self) -> bool {
        matches!(self.peek_at(1), Some(b':') | Some(b'.') | Some(b'='))
    }

    fn class_posix(&mut self) -> Result<(), CompileError> {
        let which = self.peek_at(1).expect("caller checked");
        if which != b':' {
            return Err(CompileError::at(E::PosixCollating, self.pos));
        }
        let mut p = self.pos + 2;
        let negated = if self.pattern.get(p) == Some(&b'^') {
            p += 1;
            true
        } else {
            false
        };
        let name_start = p;
        while let Some(&b) = self.pattern.get(p) {
            if !b.is_ascii_lowercase() {
                break;
            }
            p += 1;
        }
        if self.pattern.get(p) != Some(&b':') || self.pattern.get(p + 1) != Some(&b']') {
            // Not a POSIX class after all: '[' is a literal member.
            self.pos += 1;
            self.tokens.push(b'[' as u32);
            return Ok(());
        }
        let name = &self.pattern[name_start..p];
        let class = PosixClass::by_name(name)
            .ok_or(CompileError::at(E::UnknownPosixClass, name_start))?;
        self.pos = p + 2;
        let kind = if negated { Kind::PosixNeg } else { Kind::Posix };
        self.tokens.push(meta(kind, class as u16));
        Ok(())
    }
}

fn hex_value(b: u8) -> Option<u32> {
    match b {
        b'0'..=b'9' => Some((b - b'0') as u32),
        b'a'..=b'f' => Some((b - b'a' + 10) as u32),
        b'A'..=b'F' => Some((b - b'A' + 10) as u32),
        _ => None,
    }
}

fn parse_decimal(digits: &[u8], offset: usize) -> Result<u32, CompileError> {
    if digits.is_empty() || !digits.iter().all(|b| b.is_ascii_digit()) {
        return Err(CompileError::at(E::UnknownVerb, offset));
    }
    let mut v: u32 = 0;
    for &b in digits {
        v = v.saturating_mul(10).saturating_add((b - b'0') as u32);
    }
    Ok(v)
}
