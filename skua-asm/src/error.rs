//! Error taxonomy shared by the compiler and the matchers.

/// UTF-8 validity failures, one per byte-level cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumIter, thiserror::Error)]
pub enum Utf8Error {
    /// 2-byte character truncated at end of data.
    #[error("missing continuation byte in truncated 2-byte character")]
    Truncated2,
    /// 3-byte character truncated at end of data.
    #[error("missing continuation bytes in truncated 3-byte character")]
    Truncated3,
    /// 4-byte character truncated at end of data.
    #[error("missing continuation bytes in truncated 4-byte character")]
    Truncated4,
    /// 5-byte sequence truncated at end of data.
    #[error("missing continuation bytes in truncated 5-byte sequence")]
    Truncated5,
    /// 6-byte sequence truncated at end of data.
    #[error("missing continuation bytes in truncated 6-byte sequence")]
    Truncated6,
    /// Second byte of a 2-byte character is not a continuation byte.
    #[error("bad continuation byte in 2-byte character")]
    BadContinuation2,
    /// Bad continuation byte in a 3-byte character.
    #[error("bad continuation byte in 3-byte character")]
    BadContinuation3,
    /// Bad continuation byte in a 4-byte character.
    #[error("bad continuation byte in 4-byte character")]
    BadContinuation4,
    /// Bad continuation byte in a 5-byte sequence.
    #[error("bad continuation byte in 5-byte sequence")]
    BadContinuation5,
    /// Bad continuation byte in a 6-byte sequence.
    #[error("bad continuation byte in 6-byte sequence")]
    BadContinuation6,
    /// 5-byte sequences are not legal UTF-8.
    #[error("5-byte sequences are not permitted")]
    FiveByteChar,
    /// 6-byte sequences are not legal UTF-8.
    #[error("6-byte sequences are not permitted")]
    SixByteChar,
    /// Code point above U+10FFFF.
    #[error("code point larger than 0x10ffff")]
    TooBig,
    /// Encoded surrogate code point.
    #[error("code point is a surrogate")]
    Surrogate,
    /// Overlong 2-byte encoding.
    #[error("overlong 2-byte sequence")]
    Overlong2,
    /// Overlong 3-byte encoding.
    #[error("overlong 3-byte sequence")]
    Overlong3,
    /// Overlong 4-byte encoding.
    #[error("overlong 4-byte sequence")]
    Overlong4,
    /// Overlong 5-byte encoding.
    #[error("overlong 5-byte sequence")]
    Overlong5,
    /// Overlong 6-byte encoding.
    #[error("overlong 6-byte sequence")]
    Overlong6,
    /// Isolated continuation byte.
    #[error("isolated continuation byte")]
    IsolatedContinuation,
    /// The bytes 0xFE and 0xFF never appear in UTF-8.
    #[error("illegal byte 0xfe or 0xff")]
    IllegalByte,
}

/// What went wrong while compiling a pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CompileErrorKind {
    /// `\` at the end of the pattern.
    #[error("pattern ends with a backslash")]
    EndBackslash,
    /// `\c` at the end of the pattern.
    #[error(r"\c at end of pattern")]
    EndBackslashC,
    /// Unknown or malformed escape sequence.
    #[error("unrecognized character follows backslash")]
    UnsupportedEscape,
    /// `{n,m}` with `n > m`.
    #[error("numbers out of order in {{}} quantifier")]
    QuantifierOutOfOrder,
    /// Quantifier bound above the supported maximum.
    #[error("number too big in {{}} quantifier")]
    QuantifierTooBig,
    /// Unterminated character class.
    #[error("missing terminating ] for character class")]
    MissingSquareBracket,
    /// Class range whose start is above its end.
    #[error("range out of order in character class")]
    ClassRangeOrder,
    /// `[z-\d]`-style range bound.
    #[error("invalid range in character class")]
    InvalidRangeInClass,
    /// Empty class and `ALLOW_EMPTY_CLASS` is not set.
    #[error("empty character class")]
    EmptyClass,
    /// Quantifier with nothing before it.
    #[error("quantifier does not follow a repeatable item")]
    NothingToRepeat,
    /// `(` without matching `)`.
    #[error("missing closing parenthesis")]
    MissingClosingParenthesis,
    /// `)` without matching `(`.
    #[error("unmatched closing parenthesis")]
    UnmatchedParenthesis,
    /// Malformed `(?` sequence.
    #[error("unrecognized character after (?")]
    BadGroupSyntax,
    /// Group name with bad syntax.
    #[error("syntax error in subpattern name")]
    BadGroupName,
    /// Group name longer than the supported maximum.
    #[error("subpattern name is too long")]
    GroupNameTooLong,
    /// Group name starting with a digit.
    #[error("subpattern name must start with a non-digit")]
    GroupNameFirstChar,
    /// Duplicate name without `DUPNAMES`.
    #[error("two named subpatterns have the same name")]
    DuplicateGroupName,
    /// Reference to a name that is never defined.
    #[error("reference to non-existent named subpattern")]
    UnknownGroupName,
    /// Reference to a group number that is never defined.
    #[error("reference to non-existent subpattern")]
    UnknownGroupNumber,
    /// Relative reference `\g{-0}` or out of range.
    #[error("invalid relative subpattern reference")]
    BadRelativeReference,
    /// Lookbehind branch has no fixed (or boundable) length.
    #[error("lookbehind assertion is not fixed length")]
    LookbehindNotFixed,
    /// Lookbehind longer than the configured maximum.
    #[error("lookbehind is too long")]
    LookbehindTooLong,
    /// Unknown POSIX class name.
    #[error("unknown POSIX class name")]
    UnknownPosixClass,
    /// POSIX collating elements are unsupported.
    #[error("POSIX collating elements are not supported")]
    PosixCollating,
    /// `\x{` without `}` or bad contents.
    #[error("non-hex character or missing }} in \\x{{}}")]
    MalformedHexEscape,
    /// `\o{` without `}` or bad contents.
    #[error("non-octal character or missing }} in \\o{{}}")]
    MalformedOctalEscape,
    /// `\N{U+}` malformed or disallowed.
    #[error("malformed \\N{{U+}} escape")]
    MalformedUnicodeName,
    /// Escaped code point above the permitted maximum.
    #[error("character code point value is too large")]
    CodePointTooBig,
    /// Surrogate code point in UTF mode.
    #[error("code point is a surrogate")]
    SurrogateCodePoint,
    /// `\p{…}` with unknown property name.
    #[error("unknown property after \\P or \\p")]
    UnknownProperty,
    /// `\p` not followed by a well-formed name.
    #[error("malformed \\P or \\p sequence")]
    MalformedProperty,
    /// `\p` used while Unicode property support is disabled.
    #[error("\\P, \\p and \\X require Unicode property support")]
    PropertySupportDisabled,
    /// Condition group syntax error.
    #[error("malformed condition in conditional group")]
    BadCondition,
    /// Conditional group with more than two branches.
    #[error("conditional group contains more than two branches")]
    TooManyConditionBranches,
    /// `(?(VERSION` condition malformed.
    #[error("invalid condition (?(VERSION")]
    BadVersionCondition,
    /// Assertion expected after `(?(` but not found.
    #[error("assertion expected after (?( or (?(?C)")]
    AssertionExpected,
    /// Unknown `(*…)` verb.
    #[error("(*VERB) not recognized or malformed")]
    UnknownVerb,
    /// Verb name missing where one is required.
    #[error("(*MARK) must have an argument")]
    VerbNameMissing,
    /// Verb argument too long.
    #[error("name is too long in (*MARK), (*PRUNE), (*SKIP), or (*THEN)")]
    VerbNameTooLong,
    /// Parenthesis nesting above the configured limit.
    #[error("parentheses are too deeply nested")]
    NestingTooDeep,
    /// The compiled program would exceed the configured maximum.
    #[error("regular expression is too large")]
    PatternTooLarge,
    /// The pattern text exceeds the configured maximum length.
    #[error("pattern string is longer than the limit set by the application")]
    PatternStringTooLong,
    /// More capture groups than the engine supports.
    #[error("too many capturing groups")]
    TooManyCaptures,
    /// `\c` followed by a character outside printable ASCII.
    #[error("\\c must be followed by a printable ASCII character")]
    BadControlEscape,
    /// `\C` while `NEVER_BACKSLASH_C` is set.
    #[error("\\C is not allowed here")]
    BackslashCNotAllowed,
    /// `\K` in a lookaround without the permitting option.
    #[error("\\K is not allowed in lookarounds")]
    BackslashKInLookaround,
    /// `\g` not followed by a valid name or number.
    #[error("\\g is not followed by a valid name or number")]
    BadBackslashG,
    /// `\k` not followed by a braced, angle-bracketed or quoted name.
    #[error("\\k is not followed by a valid name")]
    BadBackslashK,
    /// Octal value above `\377` in non-UTF mode.
    #[error("octal value is greater than \\377 in 8-bit non-UTF mode")]
    OctalTooBig,
    /// Backreference to group 0.
    #[error("backreference to group 0 is not allowed")]
    BackrefToZero,
    /// Callout number above 255.
    #[error("number after (?C is greater than 255")]
    CalloutBadNumber,
    /// `(?C` without closing parenthesis.
    #[error("closing parenthesis for (?C expected")]
    CalloutMissingParen,
    /// String callout delimiter unrecognised.
    #[error("unrecognized string delimiter follows (?C")]
    CalloutBadDelimiter,
    /// String callout longer than the supported maximum.
    #[error("callout string is too long")]
    CalloutStringTooLong,
    /// Callouts forbidden by `NEVER_CALLOUT`.
    #[error("callouts are disabled by the application")]
    CalloutsDisabled,
    /// Unknown or malformed option setting in `(?…)`.
    #[error("unrecognized option bits in (?…)")]
    BadOptionSetting,
    /// UTF mode requested but vetoed by `NEVER_UTF`.
    #[error("using UTF is disabled by the application")]
    UtfDisabled,
    /// UCP mode requested but vetoed by `NEVER_UCP`.
    #[error("using UCP is disabled by the application")]
    UcpDisabled,
    /// Invalid UTF-8 in the pattern itself.
    #[error("invalid UTF-8 in pattern: {0}")]
    BadPatternUtf(Utf8Error),
    /// Extended-class syntax error.
    #[error("syntax error in extended character class")]
    BadExtendedClass,
    /// Internal consistency failure; never expected.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

/// A compile failure plus the offset into the pattern that provoked it.
///
/// The offset points just past the offending token for lexical errors and
/// at the opening parenthesis for group-level errors, matching the
/// conventions of the error table in the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("{kind} at offset {offset}")]
pub struct CompileError {
    /// What went wrong.
    pub kind: CompileErrorKind,
    /// Byte offset into the pattern.
    pub offset: usize,
}

impl CompileError {
    /// Construct an error at an offset.
    pub fn at(kind: CompileErrorKind, offset: usize) -> Self {
        Self { kind, offset }
    }
}

/// Runtime failures from the matchers.
///
/// "No match" and "partial match" are not errors; they are ordinary
/// [`MatchResult`](crate::MatchResult) values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum MatchError {
    /// The match-steps limit was exceeded.
    #[error("match limit exceeded")]
    MatchLimit,
    /// The backtracking depth limit was exceeded.
    #[error("backtracking depth limit exceeded")]
    DepthLimit,
    /// The heap limit for backtracking state was exceeded.
    #[error("heap limit exceeded")]
    HeapLimit,
    /// A recursion re-entered the same group at the same position.
    #[error("recursion loop detected")]
    RecurseLoop,
    /// The subject is not valid UTF-8.
    #[error("invalid UTF-8 in subject at offset {offset}: {error}")]
    BadSubjectUtf {
        /// Cause.
        error: Utf8Error,
        /// Offset of the faulty sequence.
        offset: usize,
    },
    /// The start offset does not sit on a character boundary.
    #[error("start offset is not at a UTF-8 character boundary")]
    BadUtfOffset,
    /// The start offset is past the end of the subject.
    #[error("start offset is past the end of the subject")]
    BadOffset,
    /// The program's magic word is wrong (corrupt or foreign data).
    #[error("compiled program has a bad magic number")]
    BadMagic,
    /// Options passed to the wrong matcher, or unsupported combinations.
    #[error("bad option bits for this operation")]
    BadOption,
    /// A callout returned a negative value, which aborts the match.
    #[error("callout aborted the match with {0}")]
    CalloutAbort(i32),
    /// The DFA met a backreference or other unsupported item.
    #[error("item unsupported by the parallel matcher")]
    DfaUnsupportedItem,
    /// The DFA met an unsupported condition kind.
    #[error("condition unsupported by the parallel matcher")]
    DfaUnsupportedCondition,
    /// The supplied DFA workspace is too small.
    #[error("parallel matcher workspace is too small")]
    DfaWorkspaceSize,
    /// `DFA_RESTART` without a preceding partial match.
    #[error("invalid restart of the parallel matcher")]
    DfaBadRestart,
    /// An offset limit was supplied without `USE_OFFSET_LIMIT`.
    #[error("offset limit set without USE_OFFSET_LIMIT at compile time")]
    OffsetLimitNotAllowed,
    /// Internal consistency failure; never expected.
    #[error("internal error: {0}")]
    Internal(&'static str),
}

/// Failures specific to substitution processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SubstituteError {
    /// Syntax error in the replacement string.
    #[error("invalid replacement string at offset {0}")]
    BadReplacement(usize),
    /// Bad escape sequence in the replacement string.
    #[error("bad escape sequence in replacement string at offset {0}")]
    BadEscape(usize),
    /// `${…}` without closing brace.
    #[error("expected closing curly bracket in replacement string at offset {0}")]
    MissingBrace(usize),
    /// Malformed extended substitution form.
    #[error("bad substitution in replacement string at offset {0}")]
    BadSubstitution(usize),
    /// Group referenced by the replacement does not exist.
    #[error("unknown substring group at offset {0}")]
    UnknownGroup(usize),
    /// Group referenced by the replacement is unset.
    #[error("unset substring group at offset {0}")]
    UnsetGroup(usize),
    /// The output buffer is too small.
    #[error("output buffer needs {needed} code units")]
    Overflow {
        /// Required buffer length.
        needed: usize,
    },
    /// Too many nested `${…:+…}` expansions.
    #[error("substitution template recursion is too deep")]
    TemplateTooDeep,
    /// The substitute callout aborted.
    #[error("substitute callout aborted with {0}")]
    CalloutAbort(i32),
    /// The underlying match failed.
    #[error(transparent)]
    Match(#[from] MatchError),
}

/// Extraction failures from the substring services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SubstringError {
    /// No group with this number.
    #[error("no substring with this number")]
    NoSubstring,
    /// No group with this name.
    #[error("no substring with this name")]
    NoName,
    /// The group did not participate in the match.
    #[error("substring is unset")]
    Unset,
}
