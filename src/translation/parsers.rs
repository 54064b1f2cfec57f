fn starts_at(bytes: &[u8], idx: usize, pat: &[u8]) -> bool {
    bytes.get(idx..idx + pat.len()) == Some(pat)
}

pub(super) fn line_comment_at(bytes: &[u8], idx: usize) -> bool {
    starts_at(bytes, idx, b"--")
}

pub(super) fn block_comment_open_at(bytes: &[u8], idx: usize) -> bool {
    starts_at(bytes, idx, b"/*")
}

pub(super) fn block_comment_close_at(bytes: &[u8], idx: usize) -> bool {
    starts_at(bytes, idx, b"*/")
}

/// Recognise `$tag$` (or `$$`) at `start`; returns the tag and the index of the closing `$`.
pub(super) fn dollar_quote_open(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let rest = bytes.get(start + 1..)?;
    let len = rest
        .iter()
        .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))?;
    if rest[len] != b'$' || rest.first().is_some_and(u8::is_ascii_digit) {
        return None;
    }
    let tag = std::str::from_utf8(&rest[..len]).ok()?.to_string();
    Some((tag, start + 1 + len))
}

/// True when `$tag$` closes at `idx`.
pub(super) fn dollar_quote_close_at(bytes: &[u8], idx: usize, tag: &str) -> bool {
    bytes.get(idx) == Some(&b'$')
        && starts_at(bytes, idx + 1, tag.as_bytes())
        && bytes.get(idx + 1 + tag.len()) == Some(&b'$')
}
