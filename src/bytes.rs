//! Low-level byte helpers shared by the leader, subfield and field-defn
//! parsers.
//!
//! Everything in an ISO 8211 file is either fixed-width ASCII digits or a
//! variable-length run of bytes closed by one of two control codes.

/// Separates subfields within a single field's data.
pub const UNIT_TERMINATOR: u8 = 0x1F;

/// Closes a field's data (and, in the directory, each directory entry area).
pub const FIELD_TERMINATOR: u8 = 0x1E;

/// Parses a run of ASCII digits as an `i64`, C `atoi()`-style.
///
/// Matches `DDFScanInt`/`atoi()`: leading whitespace is skipped, an optional
/// sign is honored, and parsing stops at the first non-digit rather than
/// requiring the whole buffer to be numeric. Returns 0 if no digits are
/// found before the first non-digit (or the buffer is empty).
pub fn scan_int(buf: &[u8]) -> i64 {
    let mut i = 0;
    while i < buf.len() && (buf[i] as char).is_whitespace() {
        i += 1;
    }
    let negative = if i < buf.len() && (buf[i] == b'-' || buf[i] == b'+') {
        let neg = buf[i] == b'-';
        i += 1;
        neg
    } else {
        false
    };
    let start = i;
    while i < buf.len() && buf[i].is_ascii_digit() {
        i += 1;
    }
    if start == i {
        return 0;
    }
    let value: i64 = std::str::from_utf8(&buf[start..i]).unwrap().parse().unwrap_or(0);
    if negative {
        -value
    } else {
        value
    }
}

/// Finds the length, in bytes, of a variable-length run in `buf` starting at
/// `start`, up to (but not including) the first occurrence of `terminator`.
///
/// Returns `None` if the terminator does not occur in `buf[start..]`.
pub fn scan_to_terminator(buf: &[u8], start: usize, terminator: u8) -> Option<usize> {
    buf[start..].iter().position(|&b| b == terminator)
}

/// Extracts the bytes of a variable-length value starting at `start`,
/// stopping at whichever of `delim1`/`delim2` occurs first, without
/// including the delimiter. Returns the value and the offset immediately
/// past the delimiter (for continued scanning).
///
/// Mirrors the original `fetch_variable`'s two-delimiter signature: a DDR
/// field-area entry's last element is closed by the record's field
/// terminator rather than a unit terminator, so callers scanning that last
/// element pass both so whichever appears first ends the scan.
pub fn fetch_variable(buf: &[u8], start: usize, delim1: u8, delim2: u8) -> Option<(&[u8], usize)> {
    let len = buf[start..].iter().position(|&b| b == delim1 || b == delim2)?;
    Some((&buf[start..start + len], start + len + 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_int_trims_and_parses() {
        assert_eq!(scan_int(b"0042"), 42);
        assert_eq!(scan_int(b"  7"), 7);
        assert_eq!(scan_int(b""), 0);
        assert_eq!(scan_int(b"   "), 0);
    }

    #[test]
    fn scan_int_stops_at_first_non_digit() {
        assert_eq!(scan_int(b"12X"), 12);
        assert_eq!(scan_int(b"00034 trailing junk"), 34);
        assert_eq!(scan_int(b"-5abc"), -5);
    }

    #[test]
    fn fetch_variable_stops_at_terminator() {
        let buf = b"ABC\x1Fdef\x1E";
        let (value, next) = fetch_variable(buf, 0, UNIT_TERMINATOR, UNIT_TERMINATOR).unwrap();
        assert_eq!(value, b"ABC");
        assert_eq!(next, 4);
        let (value, next) = fetch_variable(buf, next, UNIT_TERMINATOR, FIELD_TERMINATOR).unwrap();
        assert_eq!(value, b"def");
        assert_eq!(next, 8);
    }

    #[test]
    fn fetch_variable_stops_at_whichever_delimiter_comes_first() {
        let buf = b"name\x1Earray_desc";
        let (value, next) = fetch_variable(buf, 0, UNIT_TERMINATOR, FIELD_TERMINATOR).unwrap();
        assert_eq!(value, b"name");
        assert_eq!(next, 5);
    }

    #[test]
    fn fetch_variable_missing_terminator_is_none() {
        assert!(fetch_variable(b"no terminator here", 0, FIELD_TERMINATOR, FIELD_TERMINATOR).is_none());
    }
}
