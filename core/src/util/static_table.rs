//! The 61-entry RFC 7541 HPACK static table, shared by the HPACK codec
//! and reused as a lookup aid wherever HTTP/3's QPACK static table
//! (delegated to the QUIC library) needs cross-referencing for
//! diagnostics.

/// `(name, value)` pairs indexed 1..=61 per RFC 7541 Appendix A. Index 0
/// is unused; callers subtract 1 when indexing into this slice.
pub const STATIC_TABLE: &[(&str, &str)] = &[
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

/// Find the lowest static-table index whose name matches, and whether its
/// value also matches. Used by the HPACK encoder to prefer indexed or
/// name-indexed representations (RFC 7541 §6.1/§6.2).
#[must_use]
pub fn find(name: &str, value: &str) -> Option<(usize, bool)> {
    let mut name_only: Option<usize> = None;
    for (i, (n, v)) in STATIC_TABLE.iter().enumerate() {
        if *n == name {
            if *v == value {
                return Some((i + 1, true));
            }
            name_only.get_or_insert(i + 1);
        }
    }
    name_only.map(|idx| (idx, false))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_61_entries() {
        assert_eq!(STATIC_TABLE.len(), 61);
    }

    #[test]
    fn exact_match_found() {
        assert_eq!(find(":method", "GET"), Some((2, true)));
        assert_eq!(find(":method", "POST"), Some((3, true)));
    }

    #[test]
    fn name_only_match_found() {
        assert_eq!(find(":method", "PUT"), Some((2, false)));
    }

    #[test]
    fn no_match() {
        assert_eq!(find("x-custom-header", "value"), None);
    }
}
