//! `SubfieldDefn` — format-token parsing and the int/float/string codecs
//! used to pull typed values out of (or push them into) a field's raw bytes.

use crate::bytes::{FIELD_TERMINATOR, UNIT_TERMINATOR};
use crate::error::{Error, Result};

/// The abstract value kind a subfield extracts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubfieldType {
    String,
    Int,
    Float,
    /// `B(n)` with `n > 32 bits`: no integer interpretation is attempted,
    /// the raw bytes are the value.
    BinaryString,
}

/// For binary-layout subfields, which abstract numeric kind the on-disk
/// bytes represent. Byte order is tracked separately (`big_endian`), since
/// both the `B(n)` and `B<digit><width>` format forms pick the abstract kind
/// one way and the byte order another — see `SubfieldDefn::new` below and
/// `DESIGN.md`'s note on this reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryKind {
    NotBinary,
    UnsignedInt,
    SignedInt,
    Float,
}

#[derive(Debug, Clone)]
pub struct SubfieldDefn {
    pub name: String,
    pub format: String,
    pub value_type: SubfieldType,
    pub fixed_width: bool,
    pub width: usize,
    pub binary_kind: BinaryKind,
    pub big_endian: bool,
}

impl SubfieldDefn {
    /// Parses one format-controls token (`A`, `A(12)`, `I(5)`, `R`, `b14`,
    /// `B(32)`, ...) into a fully-classified subfield definition.
    pub fn new(name: &str, format: &str) -> Result<SubfieldDefn> {
        let mut chars = format.chars();
        let first = chars.next().ok_or_else(|| Error::FormatParse {
            format: format.to_string(),
            reason: "empty format token".into(),
        })?;
        let rest = chars.as_str();

        let make = |value_type, fixed_width, width, binary_kind, big_endian| SubfieldDefn {
            name: name.to_string(),
            format: format.to_string(),
            value_type,
            fixed_width,
            width,
            binary_kind,
            big_endian,
        };

        match first {
            'A' | 'C' => {
                let width = parse_width_suffix(format, rest)?;
                Ok(make(
                    SubfieldType::String,
                    width.is_some(),
                    width.unwrap_or(0),
                    BinaryKind::NotBinary,
                    true,
                ))
            }
            'R' => {
                let width = parse_width_suffix(format, rest)?;
                Ok(make(
                    SubfieldType::Float,
                    width.is_some(),
                    width.unwrap_or(0),
                    BinaryKind::NotBinary,
                    true,
                ))
            }
            'I' | 'S' => {
                let width = parse_width_suffix(format, rest)?;
                Ok(make(
                    SubfieldType::Int,
                    width.is_some(),
                    width.unwrap_or(0),
                    BinaryKind::NotBinary,
                    true,
                ))
            }
            'B' | 'b' => {
                let big_endian_letter = first == 'B';
                if rest.starts_with('(') {
                    let inner = rest
                        .strip_prefix('(')
                        .and_then(|s| s.strip_suffix(')'))
                        .ok_or_else(|| Error::FormatParse {
                            format: format.to_string(),
                            reason: "unbalanced parentheses in B(n) form".into(),
                        })?;
                    let bits: usize = inner.parse().map_err(|_| Error::FormatParse {
                        format: format.to_string(),
                        reason: format!("`{inner}` is not a non-negative integer"),
                    })?;
                    if bits == 0 || bits % 8 != 0 {
                        return Err(Error::FormatParse {
                            format: format.to_string(),
                            reason: format!("bit width {bits} is not a positive multiple of 8"),
                        });
                    }
                    let width = bits / 8;
                    if width <= 4 {
                        Ok(make(
                            SubfieldType::Int,
                            true,
                            width,
                            BinaryKind::SignedInt,
                            big_endian_letter,
                        ))
                    } else {
                        Ok(make(
                            SubfieldType::BinaryString,
                            true,
                            width,
                            BinaryKind::NotBinary,
                            big_endian_letter,
                        ))
                    }
                } else {
                    let mut digits = rest.chars();
                    let digit = digits.next().ok_or_else(|| Error::FormatParse {
                        format: format.to_string(),
                        reason: "expected a layout digit after B/b".into(),
                    })?;
                    let width: usize = digits.as_str().parse().map_err(|_| Error::FormatParse {
                        format: format.to_string(),
                        reason: "expected a numeric width after the layout digit".into(),
                    })?;
                    let (value_type, binary_kind, big_endian) = match digit {
                        '1' => (SubfieldType::Int, BinaryKind::UnsignedInt, true),
                        '2' => (SubfieldType::Int, BinaryKind::UnsignedInt, false),
                        '3' => (SubfieldType::Int, BinaryKind::SignedInt, true),
                        '4' => (SubfieldType::Int, BinaryKind::SignedInt, false),
                        '5' => (SubfieldType::Float, BinaryKind::Float, true),
                        '6' => (SubfieldType::Float, BinaryKind::Float, false),
                        other => {
                            return Err(Error::FormatParse {
                                format: format.to_string(),
                                reason: format!("`{other}` is not a layout digit 1-6"),
                            })
                        }
                    };
                    Ok(make(value_type, true, width, binary_kind, big_endian))
                }
            }
            other => Err(Error::FormatParse {
                format: format.to_string(),
                reason: format!("unrecognised format letter `{other}`"),
            }),
        }
    }

    /// Returns `(value_length, consumed)` for the subfield value starting at
    /// the front of `data`, which must cover at least to the end of the
    /// owning field's bytes.
    pub fn get_data_length(&self, data: &[u8]) -> (usize, usize) {
        if self.fixed_width {
            let n = data.len().min(self.width);
            if data.len() < self.width {
                log::warn!(
                    "subfield `{}` short buffer: needed {} bytes, had {}",
                    self.name,
                    self.width,
                    data.len()
                );
            }
            return (n, n);
        }

        let dbcs = data.len() >= 2
            && matches!(data[data.len() - 2], UNIT_TERMINATOR | FIELD_TERMINATOR)
            && data[data.len() - 1] == 0;

        if dbcs {
            let mut i = 0;
            while i + 1 < data.len() {
                if matches!(data[i], UNIT_TERMINATOR | FIELD_TERMINATOR) && data[i + 1] == 0 {
                    let mut consumed = i + 2;
                    if data[i] == UNIT_TERMINATOR
                        && consumed < data.len()
                        && data[consumed] == FIELD_TERMINATOR
                    {
                        consumed += 1;
                    }
                    return (i, consumed);
                }
                i += 1;
            }
            return (data.len(), data.len());
        }

        for (i, &b) in data.iter().enumerate() {
            if b == UNIT_TERMINATOR || b == FIELD_TERMINATOR {
                let mut consumed = i + 1;
                if b == UNIT_TERMINATOR && consumed < data.len() && data[consumed] == FIELD_TERMINATOR {
                    consumed += 1;
                }
                return (i, consumed);
            }
        }
        (data.len(), data.len())
    }

    pub fn extract_string(&self, data: &[u8]) -> String {
        let (len, _) = self.get_data_length(data);
        String::from_utf8_lossy(&data[..len]).into_owned()
    }

    pub fn extract_bytes(&self, data: &[u8]) -> Vec<u8> {
        let (len, _) = self.get_data_length(data);
        data[..len].to_vec()
    }

    pub fn extract_int(&self, data: &[u8]) -> i64 {
        if self.binary_kind != BinaryKind::NotBinary {
            let (len, _) = self.get_data_length(data);
            let signed = matches!(self.binary_kind, BinaryKind::SignedInt);
            return bytes_to_i64(&data[..len], self.big_endian, signed);
        }
        let (len, _) = self.get_data_length(data);
        crate::bytes::scan_int(&data[..len])
    }

    pub fn extract_float(&self, data: &[u8]) -> f64 {
        if self.binary_kind == BinaryKind::Float {
            let (len, _) = self.get_data_length(data);
            return bytes_to_f64(&data[..len], self.big_endian);
        }
        if self.binary_kind != BinaryKind::NotBinary {
            return self.extract_int(data) as f64;
        }
        let (len, _) = self.get_data_length(data);
        std::str::from_utf8(&data[..len])
            .ok()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .unwrap_or(0.0)
    }

    pub fn format_string(&self, value: &str) -> Vec<u8> {
        if !self.fixed_width {
            let mut out = value.as_bytes().to_vec();
            out.push(UNIT_TERMINATOR);
            return out;
        }
        let bytes = value.as_bytes();
        let mut out = vec![b' '; self.width];
        let n = bytes.len().min(self.width);
        if bytes.len() > self.width {
            log::warn!(
                "subfield `{}` value `{}` truncated to fixed width {}",
                self.name,
                value,
                self.width
            );
        }
        out[..n].copy_from_slice(&bytes[..n]);
        out
    }

    pub fn format_int(&self, n: i64) -> Result<Vec<u8>> {
        if self.binary_kind != BinaryKind::NotBinary {
            return Ok(bytes_from_i64(n, self.width, self.big_endian));
        }
        let text = n.to_string();
        if !self.fixed_width {
            let mut out = text.into_bytes();
            out.push(UNIT_TERMINATOR);
            return Ok(out);
        }
        if text.len() > self.width {
            return Err(Error::FormatOverflowAtWrite {
                subfield: self.name.clone(),
                width: self.width,
            });
        }
        let mut out = vec![b'0'; self.width];
        let start = self.width - text.len();
        out[start..].copy_from_slice(text.as_bytes());
        Ok(out)
    }

    pub fn format_float(&self, x: f64) -> Result<Vec<u8>> {
        if self.binary_kind == BinaryKind::Float {
            return Ok(bytes_from_f64(x, self.width, self.big_endian));
        }
        let text = format!("{x}");
        if !self.fixed_width {
            let mut out = text.into_bytes();
            out.push(UNIT_TERMINATOR);
            return Ok(out);
        }
        if text.len() > self.width {
            return Err(Error::FormatOverflowAtWrite {
                subfield: self.name.clone(),
                width: self.width,
            });
        }
        let mut out = vec![b' '; self.width];
        let start = self.width - text.len();
        out[start..].copy_from_slice(text.as_bytes());
        Ok(out)
    }

    pub fn default_value(&self) -> Vec<u8> {
        if !self.fixed_width {
            return vec![UNIT_TERMINATOR];
        }
        match self.value_type {
            SubfieldType::String => vec![b' '; self.width],
            SubfieldType::Int | SubfieldType::Float if self.binary_kind == BinaryKind::NotBinary => {
                vec![b'0'; self.width]
            }
            _ => vec![0u8; self.width],
        }
    }
}

fn parse_width_suffix(format: &str, rest: &str) -> Result<Option<usize>> {
    if rest.is_empty() {
        return Ok(None);
    }
    let inner = rest
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .ok_or_else(|| Error::FormatParse {
            format: format.to_string(),
            reason: format!("unexpected trailing text `{rest}`"),
        })?;
    let width: usize = inner.parse().map_err(|_| Error::FormatParse {
        format: format.to_string(),
        reason: format!("`{inner}` is not a non-negative integer width"),
    })?;
    Ok(Some(width))
}

fn bytes_to_i64(bytes: &[u8], big_endian: bool, signed: bool) -> i64 {
    if bytes.is_empty() || bytes.len() > 8 {
        return 0;
    }
    let mut buf = [0u8; 8];
    let val = if big_endian {
        let start = 8 - bytes.len();
        buf[start..].copy_from_slice(bytes);
        u64::from_be_bytes(buf)
    } else {
        buf[..bytes.len()].copy_from_slice(bytes);
        u64::from_le_bytes(buf)
    };
    if signed {
        let bits = bytes.len() * 8;
        let shift = 64 - bits;
        ((val << shift) as i64) >> shift
    } else {
        val as i64
    }
}

fn bytes_from_i64(n: i64, width: usize, big_endian: bool) -> Vec<u8> {
    let full = (n as u64).to_be_bytes();
    let mut out = full[8 - width.min(8)..].to_vec();
    if !big_endian {
        out.reverse();
    }
    out
}

fn bytes_to_f64(bytes: &[u8], big_endian: bool) -> f64 {
    match bytes.len() {
        4 => {
            let arr: [u8; 4] = bytes.try_into().unwrap();
            if big_endian {
                f32::from_be_bytes(arr) as f64
            } else {
                f32::from_le_bytes(arr) as f64
            }
        }
        8 => {
            let arr: [u8; 8] = bytes.try_into().unwrap();
            if big_endian {
                f64::from_be_bytes(arr)
            } else {
                f64::from_le_bytes(arr)
            }
        }
        _ => 0.0,
    }
}

fn bytes_from_f64(x: f64, width: usize, big_endian: bool) -> Vec<u8> {
    match width {
        4 => {
            let v = x as f32;
            if big_endian {
                v.to_be_bytes().to_vec()
            } else {
                v.to_le_bytes().to_vec()
            }
        }
        _ => {
            if big_endian {
                x.to_be_bytes().to_vec()
            } else {
                x.to_le_bytes().to_vec()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fixed_ascii_string() {
        let sf = SubfieldDefn::new("DSNM", "A(12)").unwrap();
        assert_eq!(sf.value_type, SubfieldType::String);
        assert!(sf.fixed_width);
        assert_eq!(sf.width, 12);
    }

    #[test]
    fn parses_variable_string() {
        let sf = SubfieldDefn::new("COMT", "A").unwrap();
        assert!(!sf.fixed_width);
        assert_eq!(sf.extract_string(b"hello\x1Fmore"), "hello");
    }

    #[test]
    fn digit_form_unsigned_big_endian_four_bytes() {
        let sf = SubfieldDefn::new("RCID", "b14").unwrap();
        assert_eq!(sf.binary_kind, BinaryKind::UnsignedInt);
        assert!(sf.big_endian);
        assert_eq!(sf.extract_int(&[1, 0, 0, 0]), 16_777_216);
    }

    #[test]
    fn bit_width_form_is_signed_regardless_of_case() {
        let be = SubfieldDefn::new("X", "B(32)").unwrap();
        let le = SubfieldDefn::new("X", "b(32)").unwrap();
        assert_eq!(be.extract_int(&[0xFF, 0xFF, 0xFF, 0xFF]), -1);
        assert_eq!(le.extract_int(&[0xFF, 0xFF, 0xFF, 0xFF]), -1);
    }

    #[test]
    fn format_int_overflows_fixed_width() {
        let sf = SubfieldDefn::new("X", "I(2)").unwrap();
        assert!(sf.format_int(12345).is_err());
        assert_eq!(sf.format_int(42).unwrap(), b"42");
    }

    #[test]
    fn rejects_non_multiple_of_8_bit_width() {
        assert!(SubfieldDefn::new("X", "B(14)").is_err());
    }
}
