//! Captured-substring extraction services.

use skua_asm::program::Program;
use skua_asm::{SubstringError, UNSET};

use crate::match_data::MatchData;

/// Extract capture `n` from a successful match.
pub fn by_number<'s>(
    md: &MatchData,
    subject: &'s [u8],
    n: usize,
) -> Result<&'s [u8], SubstringError> {
    if 2 * n + 1 >= md.ovector().len() {
        return Err(SubstringError::NoSubstring);
    }
    let (s, e) = md.group(n).ok_or(SubstringError::Unset)?;
    Ok(&subject[s..e])
}

/// Length of capture `n`, without extracting it.
pub fn length_by_number(md: &MatchData, n: usize) -> Result<usize, SubstringError> {
    if 2 * n + 1 >= md.ovector().len() {
        return Err(SubstringError::NoSubstring);
    }
    let (s, e) = md.group(n).ok_or(SubstringError::Unset)?;
    Ok(e - s)
}

/// Find the group number to use for a name: the first entry whose group
/// is set, or the first entry at all when none is (so the caller sees an
/// unset error rather than an unknown-name error).
pub fn number_by_name(
    program: &Program,
    md: &MatchData,
    name: &[u8],
) -> Result<u16, SubstringError> {
    let entries = program.names.find(name);
    if entries.is_empty() {
        return Err(SubstringError::NoName);
    }
    for e in entries {
        if md.group(e.number as usize).is_some() {
            return Ok(e.number);
        }
    }
    Ok(entries[0].number)
}

/// Extract a named capture; duplicate names resolve to the first set
/// entry in pattern order.
pub fn by_name<'s>(
    program: &Program,
    md: &MatchData,
    subject: &'s [u8],
    name: &[u8],
) -> Result<&'s [u8], SubstringError> {
    let n = number_by_name(program, md, name)?;
    by_number(md, subject, n as usize)
}

/// All captures as owned slices; unset groups are `None`.
pub fn list<'s>(md: &MatchData, subject: &'s [u8]) -> Vec<Option<&'s [u8]>> {
    md.ovector()
        .chunks(2)
        .map(|pair| {
            (pair[0] != UNSET && pair[1] != UNSET).then(|| &subject[pair[0]..pair[1]])
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::match_data::MatchData;

    fn md_with(pairs: &[(usize, usize)]) -> MatchData {
        let mut md = MatchData::with_pairs(pairs.len());
        for (i, &(s, e)) in pairs.iter().enumerate() {
            md.ovector[2 * i] = s;
            md.ovector[2 * i + 1] = e;
        }
        md
    }

    #[test]
    fn numbered_extraction() {
        let subject = b"hello world";
        let md = md_with(&[(0, 11), (6, 11)]);
        assert_eq!(by_number(&md, subject, 0).unwrap(), b"hello world");
        assert_eq!(by_number(&md, subject, 1).unwrap(), b"world");
        assert_eq!(by_number(&md, subject, 7), Err(SubstringError::NoSubstring));
        assert_eq!(length_by_number(&md, 1).unwrap(), 5);
    }

    #[test]
    fn unset_is_distinguished_from_missing() {
        let subject = b"ab";
        let mut md = MatchData::with_pairs(2);
        md.ovector[0] = 0;
        md.ovector[1] = 2;
        assert_eq!(by_number(&md, subject, 1), Err(SubstringError::Unset));
        assert_eq!(by_number(&md, subject, 5), Err(SubstringError::NoSubstring));
    }

    #[test]
    fn capture_list() {
        let subject = b"xy";
        let mut md = MatchData::with_pairs(2);
        md.ovector[0] = 0;
        md.ovector[1] = 2;
        let all = list(&md, subject);
        assert_eq!(all, vec![Some(&b"xy"[..]), None]);
    }
}
