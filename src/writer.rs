//! Small helpers shared by [`crate::record::Record::write`] and
//! [`crate::module::Module::create`] for assembling directory entries.

/// Renders `value` as `width` zero-padded ASCII digits, right-truncating
/// (keeping the least-significant digits) if it doesn't fit — matching the
/// original's `sprintf("%0*d", ...)` directory-entry formatting, which never
/// grows a field beyond its declared width.
pub fn pad_number(value: usize, width: usize) -> Vec<u8> {
    let text = format!("{:0width$}", value, width = width);
    if text.len() > width {
        text.as_bytes()[text.len() - width..].to_vec()
    } else {
        text.into_bytes()
    }
}

/// Writes one directory entry (`tag` left-justified and space-padded, then
/// `length` and `position` as zero-padded digit runs) into `out`.
pub fn write_directory_entry(
    out: &mut [u8],
    tag: &str,
    length: usize,
    position: usize,
    tag_width: usize,
    length_width: usize,
    position_width: usize,
) {
    let tag_bytes = tag.as_bytes();
    let n = tag_bytes.len().min(tag_width);
    out[..n].copy_from_slice(&tag_bytes[..n]);
    for b in &mut out[n..tag_width] {
        *b = b' ';
    }
    out[tag_width..tag_width + length_width].copy_from_slice(&pad_number(length, length_width));
    out[tag_width + length_width..tag_width + length_width + position_width]
        .copy_from_slice(&pad_number(position, position_width));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_and_truncates() {
        assert_eq!(pad_number(7, 5), b"00007");
        assert_eq!(pad_number(123_456, 5), b"23456");
    }

    #[test]
    fn writes_directory_entry_fields() {
        let mut buf = vec![0u8; 4 + 5 + 5];
        write_directory_entry(&mut buf, "AB", 12, 34, 4, 5, 5);
        assert_eq!(&buf[0..4], b"AB  ");
        assert_eq!(&buf[4..9], b"00012");
        assert_eq!(&buf[9..14], b"00034");
    }
}
