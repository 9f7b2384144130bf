//! `Field` — a named, typed view over one field's span of bytes inside its
//! owning record's buffer.
//!
//! Rather than a raw pointer into the record's buffer (the original C++
//! model, which requires rebinding on every buffer reallocation), a `Field`
//! stores an offset and length into the `Record`'s `Vec<u8>`. Every method
//! here that reads bytes takes the record's data slice explicitly.

use std::rc::Rc;

use crate::field_defn::FieldDefn;

#[derive(Debug, Clone)]
pub struct Field {
    pub defn: Rc<FieldDefn>,
    pub start: usize,
    pub len: usize,
}

impl Field {
    pub fn new(defn: Rc<FieldDefn>, start: usize, len: usize) -> Field {
        Field { defn, start, len }
    }

    /// This field's raw bytes, excluding its trailing field-terminator.
    pub fn data<'a>(&self, record_data: &'a [u8]) -> &'a [u8] {
        &record_data[self.start..self.start + self.len]
    }

    /// Returns the bytes for one subfield instance, per `subfield_index`
    /// (0-based iteration within a repeating field). `None` if the index is
    /// out of range for this field's data.
    pub fn subfield_data<'a>(
        &self,
        record_data: &'a [u8],
        subfield_index: usize,
        mut subfield_position_in_defn: usize,
    ) -> Option<&'a [u8]> {
        let data = self.data(record_data);
        let fixed_width = self.defn.fixed_width;

        if fixed_width > 0 {
            let start = fixed_width * subfield_index;
            if start > data.len() {
                return None;
            }
            let mut offset = start;
            let mut target_idx = subfield_position_in_defn;
            for sf in &self.defn.subfields {
                if target_idx == 0 {
                    if offset > data.len() {
                        return None;
                    }
                    let (len, _) = sf.get_data_length(&data[offset..]);
                    return Some(&data[offset..offset + len]);
                }
                let (_, consumed) = sf.get_data_length(&data[offset..]);
                offset += consumed;
                target_idx -= 1;
            }
            return None;
        }

        // Variable-width: walk subfield-by-subfield, repeating the full
        // subfield list `subfield_index` times before landing on the target.
        let mut offset = 0usize;
        let mut remaining_iterations = subfield_index;
        loop {
            for sf in &self.defn.subfields {
                if offset > data.len() {
                    return None;
                }
                if remaining_iterations == 0 && subfield_position_in_defn == 0 {
                    let (len, _) = sf.get_data_length(&data[offset..]);
                    return Some(&data[offset..offset + len]);
                }
                let (_, consumed) = sf.get_data_length(&data[offset..]);
                offset += consumed;
                if remaining_iterations == 0 {
                    subfield_position_in_defn -= 1;
                }
            }
            if remaining_iterations == 0 {
                return None;
            }
            remaining_iterations -= 1;
            if offset >= data.len() {
                return None;
            }
        }
    }

    /// Number of repeated subfield-group instances in this field's data.
    pub fn repeat_count(&self, record_data: &[u8]) -> usize {
        if !self.defn.repeating {
            return 1;
        }
        let data = self.data(record_data);
        let fixed_width = self.defn.fixed_width;
        if fixed_width > 0 {
            return (data.len() / fixed_width).max(1);
        }
        if self.defn.subfields.is_empty() {
            return 1;
        }
        let mut offset = 0usize;
        let mut count = 0usize;
        loop {
            if data.len().saturating_sub(offset) < 2 {
                break;
            }
            let iteration_start = offset;
            let mut overran = false;
            for sf in &self.defn.subfields {
                if offset >= data.len() {
                    overran = true;
                    break;
                }
                let (_, consumed) = sf.get_data_length(&data[offset..]);
                offset += consumed;
            }
            if overran {
                offset = iteration_start;
                break;
            }
            count += 1;
        }
        count.max(1)
    }

    /// The byte span, within this field's data, covered by one iteration —
    /// including interior unit-terminators but excluding the field's
    /// trailing field-terminator (already excluded from `data`).
    pub fn instance_data<'a>(&self, record_data: &'a [u8], instance: usize) -> Option<&'a [u8]> {
        let data = self.data(record_data);
        let (start, len) = self.instance_span(data, instance)?;
        data.get(start..start + len)
    }

    /// Like [`Field::instance_data`] but returns `(offset, length)` relative
    /// to this field's own data, for callers that need to splice bytes
    /// in-place rather than just read them.
    pub fn instance_span(&self, data: &[u8], instance: usize) -> Option<(usize, usize)> {
        if self.defn.subfields.is_empty() {
            return if instance == 0 { Some((0, data.len())) } else { None };
        }
        let last_index = self.defn.subfields.len() - 1;
        let first_start = self.subfield_start_offset(data, instance, 0)?;
        let last_start = self.subfield_start_offset(data, instance, last_index)?;
        let last_sf = &self.defn.subfields[last_index];
        let (last_len, _) = last_sf.get_data_length(&data[last_start..]);
        Some((first_start, (last_start + last_len) - first_start))
    }

    fn subfield_start_offset(&self, data: &[u8], instance: usize, subfield_position: usize) -> Option<usize> {
        let fixed_width = self.defn.fixed_width;
        if fixed_width > 0 {
            let mut offset = fixed_width * instance;
            for sf in &self.defn.subfields[..subfield_position] {
                let (_, consumed) = sf.get_data_length(&data[offset..]);
                offset += consumed;
            }
            return Some(offset);
        }
        let mut offset = 0usize;
        for _ in 0..instance {
            for sf in &self.defn.subfields {
                if offset >= data.len() {
                    return None;
                }
                let (_, consumed) = sf.get_data_length(&data[offset..]);
                offset += consumed;
            }
        }
        for sf in &self.defn.subfields[..subfield_position] {
            if offset >= data.len() {
                return None;
            }
            let (_, consumed) = sf.get_data_length(&data[offset..]);
            offset += consumed;
        }
        Some(offset)
    }

    /// Produces a short, human-readable dump of this field's bytes for
    /// debugging and logs: non-printable bytes are hex-escaped.
    pub fn summarize(&self, record_data: &[u8], max_instances: usize) -> String {
        let mut out = format!("Field `{}`:", self.defn.tag);
        let instances = self.repeat_count(record_data).min(max_instances.max(1));
        for i in 0..instances {
            if let Some(bytes) = self.instance_data(record_data, i) {
                out.push_str(&format!(" [{}]=", i));
                for &b in bytes {
                    if (0x20..=0x7E).contains(&b) {
                        out.push(b as char);
                    } else {
                        out.push_str(&format!("\\x{b:02X}"));
                    }
                }
            }
        }
        out
    }
}
