//! Byte level helpers shared by the parsers. Everything here is a pure function.

/// Splits a buffer into lines. CR, LF and CRLF are all accepted as terminators and
/// a trailing terminator does not produce an empty final line.
pub fn split_lines(bytes: &[u8]) -> Vec<&[u8]> {
    let mut lines = vec![];
    let mut start = 0;
    let mut ix = 0;
    while ix < bytes.len() {
        match bytes[ix] {
            b'\n' => {
                lines.push(&bytes[start..ix]);
                start = ix + 1;
            }
            b'\r' => {
                lines.push(&bytes[start..ix]);
                if ix + 1 < bytes.len() && bytes[ix + 1] == b'\n' {
                    ix += 1;
                }
                start = ix + 1;
            }
            _ => {}
        }
        ix += 1;
    }
    if start < bytes.len() {
        lines.push(&bytes[start..]);
    }
    lines
}

/// Strips all leading and trailing bytes <= 0x20.
pub fn trim(bytes: &[u8]) -> &[u8] {
    let start = bytes.iter().position(|b| *b > 0x20).unwrap_or(bytes.len());
    let end = bytes.iter().rposition(|b| *b > 0x20).map_or(start, |e| e + 1);
    &bytes[start..end]
}

/// Knuth-Morris-Pratt failure table for `pattern`.
fn failure_table(pattern: &[u8]) -> Vec<usize> {
    let mut table = vec![0; pattern.len()];
    let mut k = 0;
    for i in 1..pattern.len() {
        while k > 0 && pattern[k] != pattern[i] {
            k = table[k - 1];
        }
        if pattern[k] == pattern[i] {
            k += 1;
        }
        table[i] = k;
    }
    table
}

/// Finds the first occurrence of `pattern` in `data` (KMP). An empty pattern matches at 0.
pub fn index_of(data: &[u8], pattern: &[u8]) -> Option<usize> {
    index_of_from(data, pattern, 0)
}

/// Same as [`index_of`] but starts searching at `from`.
pub fn index_of_from(data: &[u8], pattern: &[u8], from: usize) -> Option<usize> {
    if pattern.is_empty() {
        return if from <= data.len() { Some(from) } else { None };
    }
    if from >= data.len() {
        return None;
    }
    let table = failure_table(pattern);
    let mut k = 0;
    for (i, b) in data.iter().enumerate().skip(from) {
        while k > 0 && pattern[k] != *b {
            k = table[k - 1];
        }
        if pattern[k] == *b {
            k += 1;
        }
        if k == pattern.len() {
            return Some(i + 1 - pattern.len());
        }
    }
    None
}

pub fn contains(data: &[u8], pattern: &[u8]) -> bool {
    index_of(data, pattern).is_some()
}

/// Converts `com/foo/Bar` (or `Lcom/foo/Bar;`) into `com.foo.Bar`.
pub fn slashes_to_dots(bytes: &[u8]) -> String {
    let inner = match bytes {
        [b'L', rest @ .., b';'] => rest,
        _ => bytes,
    };
    String::from_utf8_lossy(inner).replace('/', ".")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_mixed_terminators() {
        let lines = split_lines(b"a\r\nb\rc\n\nd");
        assert_eq!(lines, vec![&b"a"[..], b"b", b"c", b"", b"d"]);
    }

    #[test]
    fn split_trailing_terminator() {
        assert_eq!(split_lines(b"one\ntwo\n"), vec![&b"one"[..], b"two"]);
        assert!(split_lines(b"").is_empty());
    }

    #[test]
    fn trim_control_bytes() {
        assert_eq!(trim(b" \t\x0bconst/4 v0, 0x1 \x00"), b"const/4 v0, 0x1");
        assert_eq!(trim(b"   "), b"");
        assert_eq!(trim(b""), b"");
    }

    #[test]
    fn kmp_search() {
        assert_eq!(index_of(b"abababca", b"ababca"), Some(2));
        assert_eq!(index_of(b"invoke-static {v0}", b"static"), Some(7));
        assert_eq!(index_of(b"abc", b"abd"), None);
        assert_eq!(index_of(b"abc", b""), Some(0));
        assert_eq!(index_of_from(b"aXaXa", b"a", 1), Some(2));
        assert_eq!(index_of_from(b"abc", b"c", 3), None);
    }

    #[test]
    fn class_names() {
        assert_eq!(slashes_to_dots(b"Lcom/foo/Bar;"), "com.foo.Bar");
        assert_eq!(slashes_to_dots(b"com/foo/Bar"), "com.foo.Bar");
    }
}
