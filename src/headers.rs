//! The ordered header multimap and the small `Connection` /
//! `Transfer-Encoding` comma-list helpers.

/// Pseudo-header names, emitted/read ahead of ordinary fields. Stored
/// including the leading `:` so they sort and compare distinctly from
/// any real field name (field names cannot contain `:`).
pub const METHOD: &str = ":method";
pub const PATH: &str = ":path";
pub const SCHEME: &str = ":scheme";
pub const AUTHORITY: &str = ":authority";
pub const STATUS: &str = ":status";

fn is_pseudo(name: &str) -> bool {
    name.starts_with(':')
}

/// An ordered multimap of `(name, value)` pairs.
///
/// Names are lowercased on insertion (field names) or left as the fixed
/// pseudo-header spelling. Pseudo-headers precede ordinary ones because
/// they are always pushed first, during `get_headers`/`write_headers`,
/// before any field line is read or emitted.
#[derive(Debug, Clone, Default)]
pub struct HeaderList {
    entries: Vec<(String, Vec<u8>)>,
}

impl HeaderList {
    pub fn new() -> HeaderList {
        HeaderList { entries: Vec::new() }
    }

    /// Set a pseudo-header, replacing any previous value (pseudo-headers
    /// are set at most once per exchange by the state machine itself).
    pub fn set_pseudo(&mut self, name: &'static str, value: impl Into<String>) {
        debug_assert!(is_pseudo(name));
        if let Some(slot) = self.entries.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value.into().into_bytes();
        } else {
            self.entries.push((name.to_string(), value.into().into_bytes()));
        }
    }

    /// Append an ordinary field, lowercasing its name. Duplicates are
    /// preserved in order, matching RFC 7230 field-line semantics.
    pub fn push(&mut self, name: &str, value: impl Into<Vec<u8>>) {
        self.entries.push((name.to_ascii_lowercase(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        let name = name.to_ascii_lowercase();
        self.entries.iter().find(|(n, _)| *n == name).map(|(_, v)| v.as_slice())
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| std::str::from_utf8(v).ok())
    }

    /// All values for a (lowercased) name, in insertion order.
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a [u8]> {
        let name = name.to_ascii_lowercase();
        self.entries.iter().filter(move |(n, _)| *n == name).map(|(_, v)| v.as_slice())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Iterate ordinary (non-pseudo) fields in insertion order, the
    /// order `write_headers` must replay onto the wire.
    pub fn ordinary(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries
            .iter()
            .filter(|(n, _)| !is_pseudo(n))
            .map(|(n, v)| (n.as_str(), v.as_slice()))
    }

    pub fn pseudo(&self, name: &str) -> Option<&str> {
        debug_assert!(is_pseudo(name));
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| std::str::from_utf8(v).ok())
    }

    /// Merge trailer fields received after a chunked body terminator.
    /// Trailers are ordinary fields, lowercased the same way.
    pub fn extend_trailers(&mut self, trailers: Vec<(String, Vec<u8>)>) {
        for (name, value) in trailers {
            self.entries.push((name.to_ascii_lowercase(), value));
        }
    }
}

/// Last element of a comma-separated header value, trimmed, used to
/// read the final item of a `Transfer-Encoding` list (the one whose
/// presence actually decides chunked framing, per RFC 7230 §3.3.1).
pub fn comma_items(value: &[u8]) -> impl Iterator<Item = &[u8]> {
    value.split(|&b| b == b',').map(|item| trim(item))
}

fn trim(mut s: &[u8]) -> &[u8] {
    while let [first, rest @ ..] = s {
        if first.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    while let [rest @ .., last] = s {
        if last.is_ascii_whitespace() {
            s = rest;
        } else {
            break;
        }
    }
    s
}

fn eq_ignore_case(a: &[u8], b: &str) -> bool {
    a.len() == b.len() && a.iter().zip(b.bytes()).all(|(x, y)| x.eq_ignore_ascii_case(&y))
}

/// True if the last item of a `Transfer-Encoding` header value is
/// `chunked` (case-insensitive).
pub fn is_chunked(value: &[u8]) -> bool {
    comma_items(value).last().is_some_and(|item| eq_ignore_case(item, "chunked"))
}

/// True if any comma-separated item of a `Connection` header value is
/// `close` (case-insensitive).
pub fn is_close(value: &[u8]) -> bool {
    comma_items(value).any(|item| eq_ignore_case(item, "close"))
}

/// True if any comma-separated item of a `Connection` header value is
/// `keep-alive` (case-insensitive).
pub fn is_keep_alive(value: &[u8]) -> bool {
    comma_items(value).any(|item| eq_ignore_case(item, "keep-alive"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pseudo_headers_precede_ordinary() {
        let mut h = HeaderList::new();
        h.set_pseudo(METHOD, "GET");
        h.push("Host", b"example.com".to_vec());
        h.set_pseudo(PATH, "/a");
        let names: Vec<_> = h.entries.iter().map(|(n, _)| n.clone()).collect();
        assert_eq!(names, vec![":method", "host", ":path"]);
        assert_eq!(h.ordinary().collect::<Vec<_>>(), vec![("host", &b"example.com"[..])]);
    }

    #[test]
    fn transfer_encoding_chunked_is_last_item() {
        assert!(is_chunked(b"gzip, chunked"));
        assert!(!is_chunked(b"chunked, gzip"));
        assert!(is_chunked(b" chunked "));
    }

    #[test]
    fn connection_helpers() {
        assert!(is_close(b"keep-alive, close"));
        assert!(is_keep_alive(b"Keep-Alive"));
        assert!(!is_close(b"keep-alive"));
    }

    #[test]
    fn duplicate_fields_preserved() {
        let mut h = HeaderList::new();
        h.push("X-A", b"1".to_vec());
        h.push("x-a", b"2".to_vec());
        assert_eq!(h.get_all("X-A").collect::<Vec<_>>(), vec![&b"1"[..], &b"2"[..]]);
    }
}
