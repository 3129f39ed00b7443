//! Instruction-stream walking helpers shared by the optimiser and the
//! matchers.

use crate::link::{read_u16, LinkSize};
use crate::op::Op;

/// Header size (tag + operands, excluding any inline item) of the
/// instruction at `pos`. For repeat instructions this is the part before
/// the repeated item; use [`item_len`] for the full span.
pub fn header_len(code: &[u8], pos: usize, link: LinkSize) -> usize {
    let op = Op::try_from(code[pos]).expect("valid program");
    let l = link.width();
    match op {
        Op::End
        | Op::AnyNoNl
        | Op::AllAny
        | Op::AnyByte
        | Op::Digit
        | Op::NotDigit
        | Op::Whitespace
        | Op::NotWhitespace
        | Op::WordChar
        | Op::NotWordChar
        | Op::HSpace
        | Op::NotHSpace
        | Op::VSpace
        | Op::NotVSpace
        | Op::AnyNewline
        | Op::ExtUni
        | Op::Circ
        | Op::CircM
        | Op::Dollar
        | Op::DollarM
        | Op::Sod
        | Op::Som
        | Op::Eodn
        | Op::Eod
        | Op::WordBoundary
        | Op::NotWordBoundary
        | Op::SetSom
        | Op::BraZero
        | Op::BraMinZero
        | Op::SkipZero
        | Op::False
        | Op::True
        | Op::Commit
        | Op::Prune
        | Op::Skip
        | Op::Then
        | Op::Accept
        | Op::Fail => 1,
        Op::Char | Op::CharI | Op::Not | Op::NotI => 2 + code[pos + 1] as usize,
        Op::Prop | Op::NotProp => 3,
        Op::Class | Op::NClass => 1 + 32,
        Op::XClass | Op::EClass | Op::CalloutStr => 1 + link.read(code, pos + 1),
        Op::Star
        | Op::MinStar
        | Op::PosStar
        | Op::Plus
        | Op::MinPlus
        | Op::PosPlus
        | Op::Query
        | Op::MinQuery
        | Op::PosQuery => 1,
        Op::Upto | Op::MinUpto | Op::PosUpto | Op::Exact => 3,
        Op::Bra
        | Op::BraPos
        | Op::Once
        | Op::ScriptRun
        | Op::Assert
        | Op::AssertNot
        | Op::AssertBack
        | Op::AssertBackNot
        | Op::NaAssert
        | Op::NaAssertBack
        | Op::Cond
        | Op::Alt
        | Op::Ket
        | Op::KetRmax
        | Op::KetRmin
        | Op::KetRpos => 1 + l,
        Op::CBra | Op::CBraPos => 1 + l + 2,
        Op::Reverse => 3,
        Op::VReverse => 5,
        Op::Cref | Op::RRef | Op::Ref | Op::RefI | Op::Close => 3,
        Op::DnCref | Op::DnRRef | Op::DnRef | Op::DnRefI => 5,
        Op::Recurse => 1 + l,
        Op::Callout => 6,
        Op::Mark | Op::CommitArg | Op::PruneArg | Op::SkipArg | Op::ThenArg => {
            2 + code[pos + 1] as usize
        }
    }
}

/// Full length of the item at `pos`, including the inline operand of a
/// repeat instruction.
pub fn item_len(code: &[u8], pos: usize, link: LinkSize) -> usize {
    let op = Op::try_from(code[pos]).expect("valid program");
    let header = header_len(code, pos, link);
    match op {
        Op::Star
        | Op::MinStar
        | Op::PosStar
        | Op::Plus
        | Op::MinPlus
        | Op::PosPlus
        | Op::Query
        | Op::MinQuery
        | Op::PosQuery
        | Op::Upto
        | Op::MinUpto
        | Op::PosUpto
        | Op::Exact => header + item_len(code, pos + header, link),
        _ => header,
    }
}

/// Skip a whole group starting at `pos` (which must carry a link chain);
/// returns the offset just past its closing ket.
pub fn skip_group(code: &[u8], pos: usize, link: LinkSize) -> usize {
    debug_assert!(Op::try_from(code[pos]).expect("valid program").is_group_start());
    let mut p = pos;
    loop {
        let next = p + link.read(code, p + 1);
        let op = Op::try_from(code[next]).expect("valid program");
        if matches!(op, Op::Ket | Op::KetRmax | Op::KetRmin | Op::KetRpos) {
            return next + 1 + link.width();
        }
        debug_assert_eq!(op, Op::Alt);
        p = next;
    }
}

/// The repeat bound operand of a bounded repeat.
pub fn repeat_count(code: &[u8], pos: usize) -> u16 {
    read_u16(code, pos + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::push_u16;

    #[test]
    fn lengths_cover_char_and_repeat() {
        let link = LinkSize::Two;
        let mut code = vec![Op::Exact as u8];
        push_u16(&mut code, 3);
        code.extend_from_slice(&[Op::Char as u8, 2, 0xC3, 0xA9]);
        assert_eq!(header_len(&code, 0, link), 3);
        assert_eq!(item_len(&code, 0, link), 7);
        assert_eq!(item_len(&code, 3, link), 4);
    }

    #[test]
    fn group_skipping_follows_the_alt_chain() {
        let link = LinkSize::Two;
        // BRA -> ALT -> KET with one literal per branch.
        let mut code = vec![Op::Bra as u8];
        link.push(&mut code, 0); // patched below
        code.extend_from_slice(&[Op::Char as u8, 1, b'a']);
        let alt = code.len();
        code.push(Op::Alt as u8);
        link.push(&mut code, 0);
        code.extend_from_slice(&[Op::Char as u8, 1, b'b']);
        let ket = code.len();
        code.push(Op::Ket as u8);
        link.push(&mut code, ket);
        code.push(Op::End as u8);
        link.write(&mut code, 1, alt);
        link.write(&mut code, alt + 1, ket - alt);

        assert_eq!(skip_group(&code, 0, link), ket + 3);
    }
}
