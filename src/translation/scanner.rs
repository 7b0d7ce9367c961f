use super::parsers::{closes_dollar_tag, dollar_tag_at, pair_at};

/// Lexical context of the byte being looked at. Placeholders only count in `Code`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) enum Lexeme {
    Code,
    /// `'...'`; `''` stays inside.
    Literal,
    /// `"..."`; `""` stays inside.
    QuotedIdent,
    /// `--` up to the newline.
    LineComment,
    /// `/* ... */`, by nesting depth.
    BlockComment(u32),
    /// `$tag$ ... $tag$`.
    DollarBody(String),
}

impl Lexeme {
    /// If a quoted or commented region opens at `idx` in code, the new context and the index
    /// of the opener's last byte.
    pub(super) fn open_at(bytes: &[u8], idx: usize) -> Option<(Self, usize)> {
        match bytes[idx] {
            b'\'' => Some((Self::Literal, idx)),
            b'"' => Some((Self::QuotedIdent, idx)),
            b'-' if pair_at(bytes, idx, b"--") => Some((Self::LineComment, idx + 1)),
            b'/' if pair_at(bytes, idx, b"/*") => Some((Self::BlockComment(1), idx + 1)),
            b'$' => dollar_tag_at(bytes, idx).map(|(tag, close)| (Self::DollarBody(tag), close)),
            _ => None,
        }
    }

    /// Step over the byte at `idx` inside a quoted or commented region. Returns the context
    /// for what follows and the index of the last byte consumed.
    pub(super) fn skip(self, bytes: &[u8], idx: usize) -> (Self, usize) {
        let b = bytes[idx];
        match self {
            Self::Literal | Self::QuotedIdent => {
                let quote = if self == Self::Literal { b'\'' } else { b'"' };
                if b != quote {
                    (self, idx)
                } else if bytes.get(idx + 1) == Some(&quote) {
                    (self, idx + 1)
                } else {
                    (Self::Code, idx)
                }
            }
            Self::LineComment if b == b'\n' => (Self::Code, idx),
            Self::BlockComment(depth) if pair_at(bytes, idx, b"/*") => {
                (Self::BlockComment(depth + 1), idx + 1)
            }
            Self::BlockComment(depth) if pair_at(bytes, idx, b"*/") => {
                let next = if depth == 1 {
                    Self::Code
                } else {
                    Self::BlockComment(depth - 1)
                };
                (next, idx + 1)
            }
            Self::DollarBody(ref tag) if closes_dollar_tag(bytes, idx, tag) => {
                let last = idx + tag.len() + 1;
                (Self::Code, last)
            }
            other => (other, idx),
        }
    }
}
