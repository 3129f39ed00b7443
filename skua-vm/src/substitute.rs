//! The substitution engine.
//!
//! Walks the replacement string expanding group insertions and case
//! forcing, matching repeatedly for a global replace. The replacement
//! grammar follows the matcher's dialect: `$$`, `$n`, `$name`, `${name}`,
//! `${*MARK}`, and under the extended option `\`-escapes, case forcing
//! (`\l`, `\u`, `\L`, `\U`, `\E`) and the `${name:-…}`/`${name:+…:…}`
//! template forms with bounded recursion.

use skua_asm::options::{CompileOptions as O, ExtraOptions as X, MatchOptions as M,
    SubstituteOptions as S};
use skua_asm::program::Program;
use skua_asm::{utf, SubstituteError, UNSET};
use skua_ucd::{to_lower, to_upper, FoldRules};

use crate::callout::CalloutHandler;
use crate::context::MatchContext;
use crate::match_data::{MatchData, MatchOutcome};
use crate::nfa;

/// Limit on nested `${…:+…}` template expansion.
const TEMPLATE_DEPTH_LIMIT: u32 = 20;

/// Reborrow a callout slot for one matcher call.
///
/// A plain `.as_deref_mut()` ties the borrow to the whole function's elided
/// lifetime (the blanket `DerefMut` impl pulls in extra implied bounds), so
/// repeated calls across loop iterations conflict; this hand-written
/// function has its own explicit lifetime and doesn't carry that baggage.
fn reborrow_callout<'a>(
    x: &'a mut Option<&mut dyn CalloutHandler>,
) -> Option<&'a mut dyn CalloutHandler> {
    match x {
        Some(h) => Some(&mut **h),
        None => None,
    }
}

/// What a substitute callout sees before each replacement is committed.
#[derive(Debug, Clone, Copy)]
pub struct SubstituteBlock<'s> {
    /// Ordinal of this substitution, starting at 1.
    pub count: usize,
    /// Bounds of the match being replaced.
    pub matched: (usize, usize),
    /// The output written so far, including the pending replacement.
    pub output: &'s [u8],
    /// Start of the pending replacement within the output.
    pub replacement_start: usize,
}

/// Hooks into the substitution process.
#[derive(Default)]
pub struct SubstituteHooks<'h> {
    /// Approves (`0`), skips (`> 0`) or aborts (`< 0`) each replacement.
    pub callout: Option<&'h mut dyn FnMut(&SubstituteBlock<'_>) -> i32>,
    /// Replaces the built-in case mapping for `\U`-style forcing.
    pub case: Option<&'h mut dyn FnMut(&[u8], CaseForce) -> Vec<u8>>,
    /// Callouts from the underlying matcher.
    pub match_callout: Option<&'h mut dyn CalloutHandler>,
}

/// Case-forcing states in a replacement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaseForce {
    /// No forcing.
    None,
    /// Force the next character to upper case.
    UpperOne,
    /// Force the next character to lower case.
    LowerOne,
    /// Force to upper case until `\E`.
    Upper,
    /// Force to lower case until `\E`.
    Lower,
}

/// Replace matches of `program` in `subject`.
///
/// Returns the rewritten subject and the number of replacements. With a
/// `max_len`, an oversized result reports [`SubstituteError::Overflow`]
/// carrying the needed length.
#[allow(clippy::too_many_arguments)]
pub fn substitute(
    program: &Program,
    subject: &[u8],
    start: usize,
    match_options: M,
    options: S,
    ctx: &MatchContext,
    replacement: &[u8],
    max_len: Option<usize>,
    md: &mut MatchData,
    mut hooks: SubstituteHooks<'_>,
) -> Result<(Vec<u8>, usize), SubstituteError> {
    let mut out = Vec::with_capacity(subject.len() + replacement.len());
    let mut count = 0usize;
    let mut cursor = start;
    let replacement_only = options.contains(S::REPLACEMENT_ONLY);

    if !replacement_only {
        out.extend_from_slice(&subject[..start.min(subject.len())]);
    }

    let mut first = true;
    'scan: loop {
        let outcome = if first && options.contains(S::MATCHED) {
            // Reuse the caller's existing match.
            md.outcome()
                .filter(|o| o.is_match())
                .ok_or(SubstituteError::Match(skua_asm::MatchError::BadOption))?
        } else {
            nfa::exec(
                program,
                subject,
                cursor,
                match_options,
                ctx,
                reborrow_callout(&mut hooks.match_callout),
                md,
            )?
        };
        first = false;

        if outcome != MatchOutcome::Match {
            break;
        }

        // Process the match held in the match data. After a zero-length
        // match, a successful non-empty retry loops back here so its
        // result is consumed directly rather than re-searched (which
        // would find the empty match again and never advance).
        'replace: loop {
            let (ms, me) = (md.ovector()[0], md.ovector()[1]);
            if !replacement_only {
                out.extend_from_slice(&subject[cursor..ms]);
            }
            let rep_start = out.len();
            expand(
                program, subject, replacement, md, options, &mut hooks, &mut out, 0,
            )?;

            count += 1;
            if let Some(cb) = hooks.callout.as_deref_mut() {
                let block = SubstituteBlock {
                    count,
                    matched: (ms, me),
                    output: &out,
                    replacement_start: rep_start,
                };
                let rc = cb(&block);
                if rc < 0 {
                    return Err(SubstituteError::CalloutAbort(rc));
                }
                if rc > 0 {
                    // Skipped: keep the original text instead.
                    out.truncate(rep_start);
                    out.extend_from_slice(&subject[ms..me]);
                    count -= 1;
                }
            }

            cursor = me;
            if !options.contains(S::GLOBAL) {
                break 'scan;
            }
            if me != ms {
                break 'replace;
            }

            // A zero-length match: retry non-empty at the same spot, else
            // move one character along (CRLF as a unit).
            let retry = nfa::exec(
                program,
                subject,
                cursor,
                match_options | M::NOTEMPTY_ATSTART | M::ANCHORED,
                ctx,
                reborrow_callout(&mut hooks.match_callout),
                md,
            )?;
            if retry == MatchOutcome::Match && md.ovector()[1] > cursor {
                continue 'replace;
            }
            if cursor >= subject.len() {
                break 'scan;
            }
            let step = if subject[cursor] == b'\r'
                && subject.get(cursor + 1) == Some(&b'\n')
            {
                2
            } else if program.options.contains(O::UTF) {
                utf::decode(subject, cursor).1
            } else {
                1
            };
            if !replacement_only {
                out.extend_from_slice(&subject[cursor..cursor + step]);
            }
            cursor += step;
            break 'replace;
        }
    }

    if !replacement_only && cursor < subject.len() {
        out.extend_from_slice(&subject[cursor..]);
    }

    if let Some(limit) = max_len {
        if out.len() > limit {
            return Err(SubstituteError::Overflow { needed: out.len() });
        }
    }
    Ok((out, count))
}

/// Expand one replacement template into `out`.
#[allow(clippy::too_many_arguments)]
fn expand(
    program: &Program,
    subject: &[u8],
    template: &[u8],
    md: &MatchData,
    options: S,
    hooks: &mut SubstituteHooks<'_>,
    out: &mut Vec<u8>,
    depth: u32,
) -> Result<(), SubstituteError> {
    if depth > TEMPLATE_DEPTH_LIMIT {
        return Err(SubstituteError::TemplateTooDeep);
    }
    if options.contains(S::LITERAL) {
        out.extend_from_slice(template);
        return Ok(());
    }

    let extended = options.contains(S::EXTENDED);
    let utf_mode = program.options.contains(O::UTF);
    let rules = FoldRules {
        turkish: program.extra_options.contains(X::TURKISH_CASING),
        ascii_restricted: program.extra_options.contains(X::CASELESS_RESTRICT),
    };
    let mut case = CaseForce::None;
    let mut i = 0usize;

    while i < template.len() {
        let b = template[i];
        match b {
            b'$' => {
                i += 1;
                let insert_start = out.len();
                i = dollar(
                    program, subject, template, i, md, options, hooks, out, depth,
                )?;
                apply_case(out, insert_start, &mut case, rules, utf_mode, hooks);
            }
            // Outside extended mode a backslash is an ordinary character;
            // only `$` is special. Whatever follows is processed on its
            // own (so `\$1` still inserts group 1 after the backslash).
            b'\\' if !extended => {
                out.push(b'\\');
                i += 1;
            }
            b'\\' => {
                i += 1;
                let Some(&e) = template.get(i) else {
                    return Err(SubstituteError::BadEscape(i));
                };
                match e {
                    b'l' => {
                        case = CaseForce::LowerOne;
                        i += 1;
                    }
                    b'u' => {
                        case = CaseForce::UpperOne;
                        i += 1;
                    }
                    b'L' => {
                        case = CaseForce::Lower;
                        i += 1;
                    }
                    b'U' => {
                        case = CaseForce::Upper;
                        i += 1;
                    }
                    b'E' => {
                        case = CaseForce::None;
                        i += 1;
                    }
                    b'Q' => {
                        // Literal span to \E.
                        i += 1;
                        while i < template.len() {
                            if template[i] == b'\\' && template.get(i + 1) == Some(&b'E') {
                                i += 2;
                                break;
                            }
                            let insert_start = out.len();
                            out.push(template[i]);
                            apply_case(out, insert_start, &mut case, rules, utf_mode, hooks);
                            i += 1;
                        }
                    }
                    b'n' | b'r' | b't' | b'f' | b'a' | b'e' | b'0'..=b'7' | b'x' | b'o' => {
                        let (cp, next) = escape_char(template, i)
                            .ok_or(SubstituteError::BadEscape(i))?;
                        let insert_start = out.len();
                        push_cp(out, cp, utf_mode);
                        apply_case(out, insert_start, &mut case, rules, utf_mode, hooks);
                        i = next;
                    }
                    _ => {
                        let insert_start = out.len();
                        out.push(e);
                        apply_case(out, insert_start, &mut case, rules, utf_mode, hooks);
                        i += 1;
                    }
                }
            }
            _ => {
                let insert_start = out.len();
                let n = if utf_mode {
                    utf::decode(template, i).1
                } else {
                    1
                };
                out.extend_from_slice(&template[i..i + n]);
                apply_case(out, insert_start, &mut case, rules, utf_mode, hooks);
                i += n;
            }
        }
    }
    Ok(())
}

/// Process the text after `$`. Returns the next template index.
#[allow(clippy::too_many_arguments)]
fn dollar(
    program: &Program,
    subject: &[u8],
    template: &[u8],
    mut i: usize,
    md: &MatchData,
    options: S,
    hooks: &mut SubstituteHooks<'_>,
    out: &mut Vec<u8>,
    depth: u32,
) -> Result<usize, SubstituteError> {
    let Some(&b) = template.get(i) else {
        return Err(SubstituteError::BadReplacement(i));
    };
    match b {
        b'$' => {
            out.push(b'$');
            Ok(i + 1)
        }
        b'{' => {
            i += 1;
            let name_start = i;
            while i < template.len()
                && !matches!(template[i], b'}' | b':')
            {
                i += 1;
            }
            let name = &template[name_start..i];
            match template.get(i) {
                Some(b'}') => {
                    insert_group(program, subject, name, md, options, out, name_start)?;
                    Ok(i + 1)
                }
                Some(b':') if options.contains(S::EXTENDED) => {
                    // ${name:-default} and ${name:+set:unset}.
                    i += 1;
                    let plus = match template.get(i) {
                        Some(b'+') => true,
                        Some(b'-') => false,
                        _ => return Err(SubstituteError::BadSubstitution(i)),
                    };
                    i += 1;
                    let (set_part, after_set) = template_part(template, i)?;
                    let (unset_part, end) = if plus {
                        if template.get(after_set) != Some(&b':') {
                            return Err(SubstituteError::BadSubstitution(after_set));
                        }
                        template_part(template, after_set + 1)?
                    } else {
                        (&template[0..0], after_set)
                    };
                    if template.get(end) != Some(&b'}') {
                        return Err(SubstituteError::MissingBrace(end));
                    }

                    let set = group_value(program, subject, name, md, options, name_start)?;
                    let chosen: &[u8] = match (plus, set) {
                        (true, Some(_)) => set_part,
                        (true, None) => unset_part,
                        (false, Some(text)) => {
                            out.extend_from_slice(text);
                            return Ok(end + 1);
                        }
                        (false, None) => set_part,
                    };
                    let chosen = chosen.to_vec();
                    expand(program, subject, &chosen, md, options, hooks, out, depth + 1)?;
                    Ok(end + 1)
                }
                _ => Err(SubstituteError::MissingBrace(i)),
            }
        }
        b'*' => {
            // ${*MARK} spelled bare: $*MARK.
            let rest = &template[i..];
            if rest.starts_with(b"*MARK") {
                if let Some(mark) = md.mark() {
                    out.extend_from_slice(mark);
                }
                Ok(i + 5)
            } else {
                Err(SubstituteError::BadSubstitution(i))
            }
        }
        b'0'..=b'9' => {
            let start = i;
            while i < template.len() && template[i].is_ascii_digit() {
                i += 1;
            }
            insert_group(program, subject, &template[start..i], md, options, out, start)?;
            Ok(i)
        }
        _ if b == b'_' || b.is_ascii_alphabetic() => {
            let start = i;
            while i < template.len()
                && (template[i] == b'_' || template[i].is_ascii_alphanumeric())
            {
                i += 1;
            }
            insert_group(program, subject, &template[start..i], md, options, out, start)?;
            Ok(i)
        }
        _ => Err(SubstituteError::BadReplacement(i)),
    }
}

/// Slice a `${…:+set:unset}` part, honouring nothing but the `:`/`}`
/// delimiters (escapes inside parts are handled on recursive expansion).
fn template_part(template: &[u8], start: usize) -> Result<(&[u8], usize), SubstituteError> {
    let mut i = start;
    let mut brace_depth = 0u32;
    while i < template.len() {
        match template[i] {
            b'{' => brace_depth += 1,
            b'}' if brace_depth > 0 => brace_depth -= 1,
            b'}' | b':' => return Ok((&template[start..i], i)),
            b'\\' => i += 1,
            _ => {}
        }
        i += 1;
    }
    Err(SubstituteError::MissingBrace(i))
}

fn group_value<'s>(
    program: &Program,
    subject: &'s [u8],
    name: &[u8],
    md: &MatchData,
    options: S,
    offset: usize,
) -> Result<Option<&'s [u8]>, SubstituteError> {
    // Numbered or named lookup.
    let number = if !name.is_empty() && name.iter().all(|b| b.is_ascii_digit()) {
        let mut n = 0usize;
        for &d in name {
            n = n * 10 + (d - b'0') as usize;
        }
        Some(n)
    } else {
        let entries = program.names.find(name);
        match entries.iter().find(|e| md.group(e.number as usize).is_some()) {
            Some(e) => Some(e.number as usize),
            None => entries.first().map(|e| e.number as usize),
        }
    };

    let Some(n) = number else {
        return if options.contains(S::UNKNOWN_UNSET) {
            Ok(None)
        } else {
            Err(SubstituteError::UnknownGroup(offset))
        };
    };
    if 2 * n + 1 >= md.ovector().len() {
        return if options.contains(S::UNKNOWN_UNSET) {
            Ok(None)
        } else {
            Err(SubstituteError::UnknownGroup(offset))
        };
    }
    let s = md.ovector()[2 * n];
    let e = md.ovector()[2 * n + 1];
    if s == UNSET || e == UNSET {
        return Ok(None);
    }
    Ok(Some(&subject[s..e]))
}

fn insert_group(
    program: &Program,
    subject: &[u8],
    name: &[u8],
    md: &MatchData,
    options: S,
    out: &mut Vec<u8>,
    offset: usize,
) -> Result<(), SubstituteError> {
    if name == b"*MARK" {
        if let Some(mark) = md.mark() {
            out.extend_from_slice(mark);
        }
        return Ok(());
    }
    match group_value(program, subject, name, md, options, offset)? {
        Some(text) => {
            out.extend_from_slice(text);
            Ok(())
        }
        None if options.contains(S::UNSET_EMPTY) => Ok(()),
        None => Err(SubstituteError::UnsetGroup(offset)),
    }
}

fn escape_char(template: &[u8], i: usize) -> Option<(u32, usize)> {
    match template[i] {
        b'n' => Some((0x0A, i + 1)),
        b'r' => Some((0x0D, i + 1)),
        b't' => Some((0x09, i + 1)),
        b'f' => Some((0x0C, i + 1)),
        b'a' => Some((0x07, i + 1)),
        b'e' => Some((0x1B, i + 1)),
        b'x' => {
            if template.get(i + 1) == Some(&b'{') {
                let mut v = 0u32;
                let mut p = i + 2;
                while let Some(&h) = template.get(p) {
                    if h == b'}' {
                        return Some((v, p + 1));
                    }
                    v = v * 16 + (h as char).to_digit(16)?;
                    p += 1;
                }
                None
            } else {
                let mut v = 0u32;
                let mut p = i + 1;
                for _ in 0..2 {
                    match template.get(p).and_then(|&h| (h as char).to_digit(16)) {
                        Some(d) => {
                            v = v * 16 + d;
                            p += 1;
                        }
                        None => break,
                    }
                }
                Some((v, p))
            }
        }
        b'o' => {
            if template.get(i + 1) != Some(&b'{') {
                return None;
            }
            let mut v = 0u32;
            let mut p = i + 2;
            while let Some(&d) = template.get(p) {
                if d == b'}' {
                    return Some((v, p + 1));
                }
                if !(b'0'..=b'7').contains(&d) {
                    return None;
                }
                v = v * 8 + (d - b'0') as u32;
                p += 1;
            }
            None
        }
        d @ b'0'..=b'7' => {
            let mut v = (d - b'0') as u32;
            let mut p = i + 1;
            for _ in 0..2 {
                match template.get(p) {
                    Some(&o @ b'0'..=b'7') => {
                        v = v * 8 + (o - b'0') as u32;
                        p += 1;
                    }
                    _ => break,
                }
            }
            Some((v, p))
        }
        _ => None,
    }
}

fn push_cp(out: &mut Vec<u8>, cp: u32, utf_mode: bool) {
    if utf_mode {
        let mut buf = [0u8; 4];
        let n = utf::encode(cp, &mut buf);
        out.extend_from_slice(&buf[..n]);
    } else {
        out.push(cp as u8);
    }
}

/// Apply any active case forcing to the text appended at `from`.
fn apply_case(
    out: &mut Vec<u8>,
    from: usize,
    case: &mut CaseForce,
    rules: FoldRules,
    utf_mode: bool,
    hooks: &mut SubstituteHooks<'_>,
) {
    if *case == CaseForce::None || out.len() == from {
        return;
    }
    let segment = out.split_off(from);
    if let Some(custom) = hooks.case.as_deref_mut() {
        let mapped = custom(&segment, *case);
        out.extend_from_slice(&mapped);
    } else {
        let mut i = 0;
        let mut first = true;
        while i < segment.len() {
            let (cp, n) = if utf_mode {
                utf::decode(&segment, i)
            } else {
                (segment[i] as u32, 1)
            };
            let mapped = match *case {
                CaseForce::Upper => to_upper(cp, rules),
                CaseForce::Lower => to_lower(cp, rules),
                CaseForce::UpperOne if first => to_upper(cp, rules),
                CaseForce::LowerOne if first => to_lower(cp, rules),
                _ => cp,
            };
            push_cp(out, mapped, utf_mode);
            first = false;
            i += n;
        }
    }
    if matches!(*case, CaseForce::UpperOne | CaseForce::LowerOne) {
        *case = CaseForce::None;
    }
}
