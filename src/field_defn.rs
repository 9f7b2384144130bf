//! `FieldDefn` — DDR entry decoding, array-descriptor normalisation and
//! format-controls expansion.

use crate::bytes::{fetch_variable, FIELD_TERMINATOR, UNIT_TERMINATOR};
use crate::error::{Error, Result};
use crate::subfield::SubfieldDefn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataStructure {
    Elementary,
    Vector,
    Array,
    Concatenated,
}

impl DataStructure {
    fn from_byte(b: u8) -> DataStructure {
        match b {
            b' ' | b'0' => DataStructure::Elementary,
            b'1' => DataStructure::Vector,
            b'2' => DataStructure::Array,
            b'3' => DataStructure::Concatenated,
            _ => {
                log::warn!("data structure code {:?} unrecognised, defaulting to elementary", b as char);
                DataStructure::Elementary
            }
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            DataStructure::Elementary => b'0',
            DataStructure::Vector => b'1',
            DataStructure::Array => b'2',
            DataStructure::Concatenated => b'3',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    CharString,
    ImplicitPoint,
    ExplicitPoint,
    ExplicitPointScaled,
    CharBitString,
    BitString,
    MixedDataType,
}

impl DataType {
    fn from_byte(b: u8) -> DataType {
        match b {
            b' ' | b'0' => DataType::CharString,
            b'1' => DataType::ImplicitPoint,
            b'2' => DataType::ExplicitPoint,
            b'3' => DataType::ExplicitPointScaled,
            b'4' => DataType::CharBitString,
            b'5' => DataType::BitString,
            b'6' => DataType::MixedDataType,
            _ => {
                log::warn!("data type code {:?} unrecognised, defaulting to char_string", b as char);
                DataType::CharString
            }
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            DataType::CharString => b'0',
            DataType::ImplicitPoint => b'1',
            DataType::ExplicitPoint => b'2',
            DataType::ExplicitPointScaled => b'3',
            DataType::CharBitString => b'4',
            DataType::BitString => b'5',
            DataType::MixedDataType => b'6',
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDefn {
    pub tag: String,
    pub name: String,
    pub array_descriptor: String,
    pub format_controls: String,
    pub data_structure: DataStructure,
    pub data_type: DataType,
    pub repeating: bool,
    pub fixed_width: usize,
    pub subfields: Vec<SubfieldDefn>,
}

impl FieldDefn {
    /// Builds a `FieldDefn` directly (for programmatic schema construction
    /// ahead of `Module::create`), running the same array-descriptor and
    /// format-controls expansion that `from_ddr_entry` runs for bytes read
    /// off disk.
    pub fn new(
        tag: &str,
        name: &str,
        array_descriptor: &str,
        format_controls: &str,
        data_structure: DataStructure,
        data_type: DataType,
    ) -> Result<FieldDefn> {
        let (repeating, effective_descriptor) = normalize_array_descriptor(array_descriptor);
        let subfields = if data_structure == DataStructure::Elementary {
            Vec::new()
        } else {
            build_subfields(&effective_descriptor, format_controls)?
        };
        let fixed_width = compute_fixed_width(&subfields);
        Ok(FieldDefn {
            tag: tag.to_string(),
            name: name.to_string(),
            array_descriptor: array_descriptor.to_string(),
            format_controls: format_controls.to_string(),
            data_structure,
            data_type,
            repeating,
            fixed_width,
            subfields,
        })
    }

    /// Decodes one DDR directory entry's field-area bytes: a
    /// `field_control_length`-byte prefix (structure code, type code,
    /// filler), then name / array-descriptor / format-controls separated by
    /// unit terminators and closed by the entry's trailing field terminator.
    ///
    /// `data` is the entry exactly as it appears on disk, including that
    /// trailing field terminator (the directory's declared field length
    /// always bakes it in).
    pub fn from_ddr_entry(tag: &str, field_control_length: usize, data: &[u8]) -> Result<FieldDefn> {
        if data.len() < field_control_length {
            return Err(Error::FormatParse {
                format: tag.to_string(),
                reason: format!(
                    "field area shorter ({}) than field control length ({field_control_length})",
                    data.len()
                ),
            });
        }
        let data_structure = DataStructure::from_byte(data[0]);
        let data_type = DataType::from_byte(data[1]);
        let rest = &data[field_control_length..];

        let (name_bytes, next) =
            fetch_variable(rest, 0, UNIT_TERMINATOR, FIELD_TERMINATOR).ok_or_else(|| Error::FormatParse {
                format: tag.to_string(),
                reason: "missing field name in DDR entry".into(),
            })?;
        let name = String::from_utf8_lossy(name_bytes).into_owned();

        let (descriptor_bytes, next) =
            fetch_variable(rest, next, UNIT_TERMINATOR, FIELD_TERMINATOR).ok_or_else(|| Error::FormatParse {
                format: tag.to_string(),
                reason: "DDR entry missing field terminator".into(),
            })?;
        let array_descriptor = String::from_utf8_lossy(descriptor_bytes).into_owned();

        let format_controls = if next < rest.len() {
            let (fc_bytes, _) = fetch_variable(rest, next, FIELD_TERMINATOR, FIELD_TERMINATOR).ok_or_else(
                || Error::FormatParse {
                    format: tag.to_string(),
                    reason: "DDR entry missing field terminator".into(),
                },
            )?;
            String::from_utf8_lossy(fc_bytes).into_owned()
        } else {
            String::new()
        };

        FieldDefn::new(
            tag,
            &name,
            &array_descriptor,
            &format_controls,
            data_structure,
            data_type,
        )
    }

    /// Produces the complete field-area bytes for this definition's DDR
    /// directory entry, including its trailing field terminator — the
    /// declared directory length for this entry must equal `out.len()`.
    pub fn to_ddr_entry(&self, field_control_length: usize) -> Vec<u8> {
        let mut out = vec![b' '; field_control_length];
        out[0] = self.data_structure.to_byte();
        out[1] = self.data_type.to_byte();
        if field_control_length > 2 {
            let filler = b"00;&   ";
            let n = filler.len().min(field_control_length - 2);
            out[2..2 + n].copy_from_slice(&filler[..n]);
        }
        out.extend_from_slice(self.name.as_bytes());
        out.push(UNIT_TERMINATOR);
        out.extend_from_slice(self.array_descriptor.as_bytes());
        if !self.format_controls.is_empty() {
            out.push(UNIT_TERMINATOR);
            out.extend_from_slice(self.format_controls.as_bytes());
        }
        out.push(FIELD_TERMINATOR);
        out
    }

    pub fn find_subfield(&self, name: &str) -> Option<&SubfieldDefn> {
        self.subfields
            .iter()
            .find(|sf| sf.name.eq_ignore_ascii_case(name))
    }

    /// Concatenation of every subfield's default-value bytes, used to seed a
    /// freshly-added field instance.
    pub fn default_instance(&self) -> Vec<u8> {
        self.subfields.iter().flat_map(|sf| sf.default_value()).collect()
    }
}

fn normalize_array_descriptor(descriptor: &str) -> (bool, String) {
    let repeating = descriptor.starts_with('*');
    if let Some(pos) = descriptor.rfind('*') {
        (repeating, descriptor[pos + 1..].to_string())
    } else {
        (repeating, descriptor.to_string())
    }
}

fn build_subfields(effective_descriptor: &str, format_controls: &str) -> Result<Vec<SubfieldDefn>> {
    let names: Vec<&str> = if effective_descriptor.is_empty() {
        Vec::new()
    } else {
        effective_descriptor.split('!').collect()
    };

    if format_controls.is_empty() {
        return Err(Error::FormatParse {
            format: format_controls.to_string(),
            reason: "non-elementary field has no format controls".into(),
        });
    }
    if !format_controls.starts_with('(') || !format_controls.ends_with(')') {
        return Err(Error::FormatParse {
            format: format_controls.to_string(),
            reason: "format controls must be enclosed in parentheses".into(),
        });
    }

    let expanded = expand_format(format_controls.as_bytes())?;
    let tokens: Vec<&str> = expanded.split(',').filter(|t| !t.is_empty()).collect();

    if tokens.len() > names.len() {
        log::warn!(
            "format controls `{}` declare more tokens ({}) than subfield names ({}); truncating",
            format_controls,
            tokens.len(),
            names.len()
        );
    } else if tokens.len() < names.len() {
        return Err(Error::FormatParse {
            format: format_controls.to_string(),
            reason: format!(
                "format controls declare {} tokens but there are {} subfield names",
                tokens.len(),
                names.len()
            ),
        });
    }

    let mut subfields = Vec::with_capacity(names.len());
    for (name, token) in names.iter().zip(tokens.iter()) {
        let bare = strip_leading_digits(token);
        subfields.push(SubfieldDefn::new(name, bare)?);
    }
    Ok(subfields)
}

fn strip_leading_digits(token: &str) -> &str {
    token.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn compute_fixed_width(subfields: &[SubfieldDefn]) -> usize {
    if subfields.is_empty() {
        return 0;
    }
    if subfields.iter().all(|sf| sf.fixed_width && sf.width > 0) {
        subfields.iter().map(|sf| sf.width).sum()
    } else {
        0
    }
}

/// Finds the raw (unstripped) length of the next top-level item in `src`
/// (up to but not including a depth-0 comma, or the end of the string), and
/// returns the item with any enclosing brackets stripped.
fn extract_substring(src: &[u8]) -> (&[u8], usize) {
    let mut depth = 0i32;
    let mut end = src.len();
    for (i, &b) in src.iter().enumerate() {
        match b {
            b'(' => depth += 1,
            b')' => depth -= 1,
            b',' if depth == 0 => {
                end = i;
                break;
            }
            _ => {}
        }
    }
    let raw = &src[..end];
    let stripped = if raw.first() == Some(&b'(') && raw.last() == Some(&b')') && raw.len() >= 2 {
        &raw[1..raw.len() - 1]
    } else {
        raw
    };
    (stripped, end)
}

/// Expands nested parenthesised groups and leading digit-repeat counts into
/// a flat, comma-separated token string.
fn expand_format(src: &[u8]) -> Result<String> {
    let mut out = String::new();
    let mut i = 0;
    let mut at_item_start = true;
    while i < src.len() {
        let c = src[i];
        if at_item_start && c == b'(' {
            let (inner, consumed) = extract_substring(&src[i..]);
            out.push_str(&expand_format(inner)?);
            i += consumed;
            at_item_start = false;
        } else if at_item_start && c.is_ascii_digit() {
            let start = i;
            while i < src.len() && src[i].is_ascii_digit() {
                i += 1;
            }
            let count: usize = std::str::from_utf8(&src[start..i])
                .unwrap()
                .parse()
                .map_err(|_| Error::FormatParse {
                    format: String::from_utf8_lossy(src).into_owned(),
                    reason: "repeat count overflowed".into(),
                })?;
            let (inner, consumed) = extract_substring(&src[i..]);
            let expanded = expand_format(inner)?;
            for k in 0..count {
                if k > 0 {
                    out.push(',');
                }
                out.push_str(&expanded);
            }
            i += consumed;
            at_item_start = false;
        } else if c == b',' {
            out.push(',');
            i += 1;
            at_item_start = true;
        } else {
            out.push(c as char);
            i += 1;
            at_item_start = false;
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_structure_prefix_from_array_descriptor() {
        let (repeating, effective) = normalize_array_descriptor("*STPT!CTPT!ENPT*YCOO!XCOO");
        assert!(!repeating);
        assert_eq!(effective, "YCOO!XCOO");
    }

    #[test]
    fn leading_star_sets_repeating() {
        let (repeating, effective) = normalize_array_descriptor("*A!B");
        assert!(repeating);
        assert_eq!(effective, "A!B");
    }

    #[test]
    fn expands_bare_digit_repeat() {
        assert_eq!(expand_format(b"(3A)").unwrap(), "A,A,A");
    }

    #[test]
    fn expands_nested_group_repeat() {
        assert_eq!(expand_format(b"(2(A,I))").unwrap(), "A,I,A,I");
    }

    #[test]
    fn expands_mixed_tokens() {
        assert_eq!(expand_format(b"(A,I,R)").unwrap(), "A,I,R");
    }

    #[test]
    fn builds_field_defn_from_new() {
        let fd = FieldDefn::new(
            "DSID",
            "Data set identification field",
            "RCNM!RCID!EXPP!INTU",
            "(b11,b14,b11,b11)",
            DataStructure::Vector,
            DataType::MixedDataType,
        )
        .unwrap();
        assert_eq!(fd.subfields.len(), 4);
        assert_eq!(fd.fixed_width, 1 + 4 + 1 + 1);
        assert!(fd.find_subfield("rcid").is_some());
    }

    #[test]
    fn repeating_variable_field_from_scenario() {
        let fd = FieldDefn::new(
            "TEST",
            "",
            "*A!B",
            "(A,I)",
            DataStructure::Vector,
            DataType::MixedDataType,
        )
        .unwrap();
        assert!(fd.repeating);
        assert_eq!(fd.subfields[0].name, "A");
        assert_eq!(fd.subfields[1].name, "B");
    }
}
