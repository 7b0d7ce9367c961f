//! Token recognisers over raw SQL bytes. Each takes a start index and reports how far the
//! token runs, or `None` when there is no token there.

/// Index of the first byte at or after `start` that fails `keep`.
fn run_end(bytes: &[u8], start: usize, keep: impl Fn(u8) -> bool) -> usize {
    bytes[start.min(bytes.len())..]
        .iter()
        .position(|&b| !keep(b))
        .map_or(bytes.len(), |len| start + len)
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// True when the two bytes at `idx` are `pair`.
pub(super) fn pair_at(bytes: &[u8], idx: usize, pair: &[u8; 2]) -> bool {
    bytes.get(idx..idx + 2) == Some(pair.as_slice())
}

/// A non-empty run of ASCII digits: `(end, digits)`.
pub(super) fn digits_at(bytes: &[u8], start: usize) -> Option<(usize, &str)> {
    let end = run_end(bytes, start, |b| b.is_ascii_digit());
    if end == start {
        return None;
    }
    std::str::from_utf8(&bytes[start..end])
        .ok()
        .map(|digits| (end, digits))
}

/// A parameter name: letter or `_`, then word bytes. Returns `(end, name)`.
pub(super) fn identifier_at(bytes: &[u8], start: usize) -> Option<(usize, &str)> {
    let first = *bytes.get(start)?;
    if !(first.is_ascii_alphabetic() || first == b'_') {
        return None;
    }
    let end = run_end(bytes, start + 1, is_word_byte);
    std::str::from_utf8(&bytes[start..end])
        .ok()
        .map(|name| (end, name))
}

/// An opening `$tag$` with `bytes[start] == b'$'`: `(tag, index of the second '$')`.
///
/// A digit right after the `$` means a positional parameter, not a quote.
pub(super) fn dollar_tag_at(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let body = start + 1;
    if bytes.get(body).is_some_and(u8::is_ascii_digit) {
        return None;
    }
    let close = run_end(bytes, body, is_word_byte);
    if bytes.get(close) != Some(&b'$') {
        return None;
    }
    let tag = std::str::from_utf8(&bytes[body..close]).ok()?;
    Some((tag.to_string(), close))
}

/// True when `$tag$` starts at `idx`.
pub(super) fn closes_dollar_tag(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let body = idx + 1;
    let close = body + tag.len();
    bytes.get(idx) == Some(&b'$')
        && bytes.get(body..close) == Some(tag.as_bytes())
        && bytes.get(close) == Some(&b'$')
}
