//! `Record` — a single parsed (or in-progress, for writing) data record:
//! its owning byte buffer, the bound `Field`s that borrow into it, and the
//! mutation operations that keep the two coherent.

use std::io::{Read, Seek, SeekFrom};
use std::rc::Rc;

use crate::bytes::{scan_int, FIELD_TERMINATOR};
use crate::error::{Error, Result};
use crate::field::Field;
use crate::field_defn::FieldDefn;
use crate::leader::{Leader, LEADER_SIZE};
use crate::writer::write_directory_entry;

/// A single data record.
///
/// `data` holds the directory and field area exactly as they would appear
/// on disk (minus the 24-byte leader, which is tracked separately so it can
/// be regenerated on write); `field_offset` is the length of the directory
/// prefix, i.e. where the field area begins within `data`. Every `Field`'s
/// `start`/`len` are absolute offsets into `data`.
#[derive(Debug, Clone, Default)]
pub struct Record {
    pub data: Vec<u8>,
    pub field_offset: usize,
    pub fields: Vec<Field>,
    pub reuse_header: bool,
    pub is_clone: bool,
    size_field_length: usize,
    size_field_pos: usize,
    size_field_tag: usize,
}

impl Record {
    pub fn new() -> Record {
        Record {
            size_field_length: 5,
            size_field_pos: 5,
            ..Default::default()
        }
    }

    /// Drops all parsed state, forcing the next `read` to perform a full
    /// header parse rather than a reuse-header overlay.
    pub fn clear(&mut self) {
        *self = Record::new();
    }

    /// Reads one record from `reader`, dispatching between a full header
    /// parse and a reuse-header overlay depending on this record's current
    /// `reuse_header` flag. Returns `Ok(false)` at a clean end-of-file.
    pub fn read<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        offset: &mut u64,
        find_defn: &dyn Fn(&str) -> Option<Rc<FieldDefn>>,
    ) -> Result<bool> {
        if self.reuse_header {
            let remaining = self.data.len().saturating_sub(self.field_offset);
            let mut buf = vec![0u8; remaining];
            let n = read_to_buf(reader, &mut buf, *offset)?;
            if n == 0 {
                return Ok(false);
            }
            if n < remaining {
                return Err(Error::io_at(
                    *offset + n as u64,
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "reuse-header record's field area is short",
                    ),
                ));
            }
            *offset += remaining as u64;
            self.data[self.field_offset..].copy_from_slice(&buf);
            return Ok(true);
        }
        self.read_header(reader, offset, find_defn)
    }

    fn read_header<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        offset: &mut u64,
        find_defn: &dyn Fn(&str) -> Option<Rc<FieldDefn>>,
    ) -> Result<bool> {
        let mut leader_buf = [0u8; LEADER_SIZE];
        let start_offset = *offset;
        let n = read_to_buf(reader, &mut leader_buf, *offset)?;
        if n == 0 {
            return Ok(false);
        }
        if n < LEADER_SIZE {
            return Err(Error::io_at(
                *offset,
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short record leader"),
            ));
        }
        *offset += LEADER_SIZE as u64;
        let leader = Leader::parse_dr(&leader_buf, start_offset)?;
        self.size_field_length = leader.size_field_length;
        self.size_field_pos = leader.size_field_pos;
        self.size_field_tag = leader.size_field_tag;
        self.reuse_header = leader.leader_identifier == b'R';

        if leader.record_length == 0 {
            return self.read_zero_length_variant(reader, offset, &leader, find_defn);
        }

        let data_size = leader.record_length - LEADER_SIZE;
        let mut data = vec![0u8; data_size];
        let n = read_to_buf(reader, &mut data, *offset)?;
        *offset += n as u64;
        if n < data_size {
            return Err(Error::io_at(
                *offset,
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "data record is short"),
            ));
        }

        loop {
            let last_ok = data.last() == Some(&FIELD_TERMINATOR);
            let second_last_ok = data.len() >= 2 && data[data.len() - 2] == FIELD_TERMINATOR;
            if last_ok || second_last_ok {
                break;
            }
            let mut extra = [0u8; 1];
            let got = read_to_buf(reader, &mut extra, *offset)?;
            if got == 0 {
                break;
            }
            *offset += 1;
            log::debug!("didn't find field terminator, read one more byte");
            data.push(extra[0]);
        }

        let entry_width = leader.entry_width();
        let mut pos = 0usize;
        let mut entries = Vec::new();
        while pos < data.len() && data[pos] != FIELD_TERMINATOR {
            if pos + entry_width > data.len() {
                return Err(Error::HeaderTruncated {
                    reason: "directory entry runs past declared record length".into(),
                });
            }
            entries.push(self.decode_entry(&data[pos..pos + entry_width]));
            pos += entry_width;
        }

        let mut fields = Vec::with_capacity(entries.len());
        for (tag, length, position) in entries {
            let defn = find_defn(&tag).ok_or_else(|| Error::UndefinedTag { tag: tag.clone() })?;
            let start = leader.field_area_start as i64 + position - LEADER_SIZE as i64;
            if length < 0 || start < 0 || (start as usize + length as usize) > data.len() {
                return Err(Error::FieldPositionOutOfRange {
                    position,
                    length,
                    data_size: data.len(),
                });
            }
            log::trace!("bound field `{tag}` at {start}..{}", start + length);
            fields.push(Field::new(defn, start as usize, length as usize));
        }

        self.field_offset = leader.field_area_start - LEADER_SIZE;
        self.data = data;
        self.fields = fields;
        Ok(true)
    }

    fn read_zero_length_variant<R: Read + Seek>(
        &mut self,
        reader: &mut R,
        offset: &mut u64,
        leader: &Leader,
        find_defn: &dyn Fn(&str) -> Option<Rc<FieldDefn>>,
    ) -> Result<bool> {
        let entry_width = leader.entry_width();
        let mut entries = Vec::new();
        loop {
            let mut chunk = vec![0u8; entry_width];
            let n = read_to_buf(reader, &mut chunk, *offset)?;
            if n < entry_width {
                return Err(Error::HeaderTruncated {
                    reason: "EOF inside zero-length-record directory".into(),
                });
            }
            *offset += entry_width as u64;
            if chunk[0] == FIELD_TERMINATOR {
                reader
                    .seek(SeekFrom::Current(-((entry_width - 1) as i64)))
                    .map_err(|e| Error::io_at(*offset, e))?;
                *offset -= (entry_width - 1) as u64;
                break;
            }
            entries.push(self.decode_entry(&chunk));
        }

        let mut data = Vec::new();
        let mut field_specs = Vec::with_capacity(entries.len());
        for (tag, length, _position) in entries {
            let start = data.len();
            let mut fbuf = vec![0u8; length.max(0) as usize];
            let n = read_to_buf(reader, &mut fbuf, *offset)?;
            if n < fbuf.len() {
                return Err(Error::io_at(
                    *offset,
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "zero-length record field is short",
                    ),
                ));
            }
            *offset += fbuf.len() as u64;
            data.extend_from_slice(&fbuf);
            field_specs.push((tag, start, length as usize));
        }

        let mut fields = Vec::with_capacity(field_specs.len());
        for (tag, start, length) in field_specs {
            let defn = find_defn(&tag).ok_or_else(|| Error::UndefinedTag { tag: tag.clone() })?;
            if start + length > data.len() {
                return Err(Error::FieldPositionOutOfRange {
                    position: start as i64,
                    length: length as i64,
                    data_size: data.len(),
                });
            }
            fields.push(Field::new(defn, start, length));
        }

        self.field_offset = 0;
        self.data = data;
        self.fields = fields;
        Ok(true)
    }

    fn decode_entry(&self, entry: &[u8]) -> (String, i64, i64) {
        let tag = String::from_utf8_lossy(&entry[..self.size_field_tag]).into_owned();
        let length = scan_int(&entry[self.size_field_tag..self.size_field_tag + self.size_field_length]);
        let position = scan_int(&entry[self.size_field_tag + self.size_field_length..]);
        (tag, length, position)
    }

    /// Linear scan for the `field_index`-th field whose definition name
    /// matches `name` (case-insensitive).
    pub fn find_field(&self, name: &str, field_index: usize) -> Option<usize> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(_, f)| f.defn.name.eq_ignore_ascii_case(name) || f.defn.tag.eq_ignore_ascii_case(name))
            .nth(field_index)
            .map(|(i, _)| i)
    }

    /// Appends a new, empty field bound to `defn`, then seeds it with its
    /// subfields' default values.
    pub fn add_field(&mut self, defn: Rc<FieldDefn>) -> Result<usize> {
        let start = self
            .fields
            .last()
            .map(|f| f.start + f.len)
            .unwrap_or(self.field_offset)
            .max(self.field_offset);
        let idx = self.fields.len();
        self.fields.push(Field::new(defn.clone(), start, 0));
        let default = defn.default_instance();
        self.set_field_raw(idx, 0, &default)?;
        Ok(idx)
    }

    pub fn delete_field(&mut self, field_index: usize) -> Result<()> {
        self.resize_field(field_index, 0)?;
        self.fields.remove(field_index);
        Ok(())
    }

    /// Grows or shrinks field `field_index`'s byte span to `new_size`,
    /// shifting every following byte (and rebinding every following
    /// field's offset) to match.
    pub fn resize_field(&mut self, field_index: usize, new_size: usize) -> Result<()> {
        let old_size = self.fields[field_index].len;
        let old_start = self.fields[field_index].start;
        let tail_start = old_start + old_size;
        let delta = new_size as i64 - old_size as i64;

        if delta > 0 {
            let grow = delta as usize;
            let old_len = self.data.len();
            self.data.resize(old_len + grow, 0);
            self.data.copy_within(tail_start..old_len, tail_start + grow);
        } else if delta < 0 {
            let shrink = (-delta) as usize;
            let old_len = self.data.len();
            self.data.copy_within(tail_start..old_len, tail_start - shrink);
            self.data.truncate(old_len - shrink);
        }

        self.fields[field_index].len = new_size;
        for f in self.fields.iter_mut().skip(field_index + 1) {
            f.start = (f.start as i64 + delta) as usize;
        }
        Ok(())
    }

    /// Appends a new repeat instance (if `index_within_field` is the
    /// current repeat count) or splices a replacement instance in place.
    pub fn set_field_raw(&mut self, field_index: usize, index_within_field: usize, raw: &[u8]) -> Result<()> {
        let repeat_count = self.fields[field_index].repeat_count(&self.data);
        let is_repeating = self.fields[field_index].defn.repeating;
        let old_len = self.fields[field_index].len;

        if !is_repeating && index_within_field > 0 {
            return Err(Error::FieldIndexOutOfRange {
                name: self.fields[field_index].defn.name.clone(),
                index: index_within_field,
            });
        }

        let appending =
            index_within_field == repeat_count || (!is_repeating && index_within_field == 0 && old_len == 0);

        if appending {
            let base = old_len;
            self.resize_field(field_index, base + raw.len() + 1)?;
            let start = self.fields[field_index].start;
            self.data[start + base..start + base + raw.len()].copy_from_slice(raw);
            self.data[start + base + raw.len()] = FIELD_TERMINATOR;
            Ok(())
        } else if index_within_field < repeat_count {
            let field_data = self.fields[field_index].data(&self.data).to_vec();
            let (inst_start, inst_len) = self.fields[field_index]
                .instance_span(&field_data, index_within_field)
                .ok_or_else(|| Error::FieldIndexOutOfRange {
                    name: self.fields[field_index].defn.name.clone(),
                    index: index_within_field,
                })?;
            let mut spliced = Vec::with_capacity(field_data.len() - inst_len + raw.len());
            spliced.extend_from_slice(&field_data[..inst_start]);
            spliced.extend_from_slice(raw);
            spliced.extend_from_slice(&field_data[inst_start + inst_len..]);
            self.resize_field(field_index, spliced.len())?;
            let start = self.fields[field_index].start;
            self.data[start..start + spliced.len()].copy_from_slice(&spliced);
            Ok(())
        } else {
            Err(Error::FieldIndexOutOfRange {
                name: self.fields[field_index].defn.name.clone(),
                index: index_within_field,
            })
        }
    }

    /// Overwrites `old_size` bytes at `start_offset_within_instance` inside
    /// one repeat instance with `new_bytes`, resizing the field as needed.
    pub fn update_field_raw(
        &mut self,
        field_index: usize,
        field_instance: usize,
        start_offset_within_instance: usize,
        old_size: usize,
        new_bytes: &[u8],
    ) -> Result<()> {
        let field_data = self.fields[field_index].data(&self.data).to_vec();
        let (inst_start, _inst_len) = self.fields[field_index]
            .instance_span(&field_data, field_instance)
            .ok_or_else(|| Error::FieldIndexOutOfRange {
                name: self.fields[field_index].defn.name.clone(),
                index: field_instance,
            })?;
        let abs_start = inst_start + start_offset_within_instance;

        if new_bytes.len() == old_size {
            let field_start = self.fields[field_index].start;
            self.data[field_start + abs_start..field_start + abs_start + old_size].copy_from_slice(new_bytes);
            return Ok(());
        }

        let field_len = self.fields[field_index].len;
        let new_field_len = (field_len as i64 - old_size as i64 + new_bytes.len() as i64) as usize;
        if new_bytes.len() < old_size {
            let field_start = self.fields[field_index].start;
            self.data[field_start + abs_start..field_start + abs_start + new_bytes.len()]
                .copy_from_slice(new_bytes);
            self.data.copy_within(
                field_start + abs_start + old_size..field_start + field_len,
                field_start + abs_start + new_bytes.len(),
            );
            self.resize_field(field_index, new_field_len)?;
        } else {
            self.resize_field(field_index, new_field_len)?;
            let field_start = self.fields[field_index].start;
            let grow = new_bytes.len() - old_size;
            self.data.copy_within(
                field_start + abs_start + old_size..field_start + field_len,
                field_start + abs_start + old_size + grow,
            );
            self.data[field_start + abs_start..field_start + abs_start + new_bytes.len()]
                .copy_from_slice(new_bytes);
        }
        Ok(())
    }

    pub fn set_string_subfield(
        &mut self,
        field_index: usize,
        field_instance: usize,
        subfield_name: &str,
        value: &str,
    ) -> Result<()> {
        let defn = self.fields[field_index].defn.clone();
        let sf = defn
            .find_subfield(subfield_name)
            .ok_or_else(|| Error::SubfieldNotFound {
                field: defn.name.clone(),
                name: subfield_name.to_string(),
            })?;
        let formatted = sf.format_string(value);
        self.splice_subfield(field_index, field_instance, subfield_name, &formatted)
    }

    pub fn set_int_subfield(
        &mut self,
        field_index: usize,
        field_instance: usize,
        subfield_name: &str,
        value: i64,
    ) -> Result<()> {
        let defn = self.fields[field_index].defn.clone();
        let sf = defn
            .find_subfield(subfield_name)
            .ok_or_else(|| Error::SubfieldNotFound {
                field: defn.name.clone(),
                name: subfield_name.to_string(),
            })?;
        let formatted = sf.format_int(value)?;
        self.splice_subfield(field_index, field_instance, subfield_name, &formatted)
    }

    pub fn set_float_subfield(
        &mut self,
        field_index: usize,
        field_instance: usize,
        subfield_name: &str,
        value: f64,
    ) -> Result<()> {
        let defn = self.fields[field_index].defn.clone();
        let sf = defn
            .find_subfield(subfield_name)
            .ok_or_else(|| Error::SubfieldNotFound {
                field: defn.name.clone(),
                name: subfield_name.to_string(),
            })?;
        let formatted = sf.format_float(value)?;
        self.splice_subfield(field_index, field_instance, subfield_name, &formatted)
    }

    fn splice_subfield(
        &mut self,
        field_index: usize,
        field_instance: usize,
        subfield_name: &str,
        formatted: &[u8],
    ) -> Result<()> {
        let defn = self.fields[field_index].defn.clone();
        let subfield_position = defn
            .subfields
            .iter()
            .position(|sf| sf.name.eq_ignore_ascii_case(subfield_name))
            .ok_or_else(|| Error::SubfieldNotFound {
                field: defn.name.clone(),
                name: subfield_name.to_string(),
            })?;

        if self.fields[field_index].len == 0 {
            let default = defn.default_instance();
            self.set_field_raw(field_index, 0, &default)?;
        }

        let field_data = self.fields[field_index].data(&self.data).to_vec();
        let start = self.fields[field_index]
            .subfield_data(&field_data, field_instance, subfield_position)
            .map(|slice| slice.as_ptr() as usize - field_data.as_ptr() as usize)
            .ok_or_else(|| Error::SubfieldNotFound {
                field: defn.name.clone(),
                name: subfield_name.to_string(),
            })?;
        let (old_len, _) = defn.subfields[subfield_position].get_data_length(&field_data[start..]);

        self.update_field_raw(field_index, field_instance, start, old_len, formatted)
    }

    /// Chooses directory-entry widths (length 5, position 5, tag as
    /// declared), reallocates the buffer if the directory's size changed,
    /// and writes one entry per field followed by a field-terminator.
    pub fn reset_directory(&mut self, tag_width: usize) {
        self.size_field_length = 5;
        self.size_field_pos = 5;
        self.size_field_tag = tag_width;
        let entry_width = tag_width + 5 + 5;
        let new_dir_size = entry_width * self.fields.len() + 1;

        if new_dir_size != self.field_offset {
            let delta = new_dir_size as i64 - self.field_offset as i64;
            if delta > 0 {
                let grow = delta as usize;
                let old_len = self.data.len();
                self.data.resize(old_len + grow, 0);
                self.data.copy_within(self.field_offset..old_len, self.field_offset + grow);
            } else if delta < 0 {
                let shrink = (-delta) as usize;
                let old_len = self.data.len();
                self.data.copy_within(self.field_offset..old_len, self.field_offset - shrink);
                self.data.truncate(old_len - shrink);
            }
            for f in self.fields.iter_mut() {
                f.start = (f.start as i64 + delta) as usize;
            }
            self.field_offset = new_dir_size;
        }

        for (i, field) in self.fields.iter().enumerate() {
            let entry_start = entry_width * i;
            let position = field.start - self.field_offset;
            write_directory_entry(
                &mut self.data[entry_start..entry_start + entry_width],
                &field.defn.tag,
                field.len,
                position,
                tag_width,
                5,
                5,
            );
        }
        self.data[entry_width * self.fields.len()] = FIELD_TERMINATOR;
    }

    /// Serialises this record (directory + field area, preceded by a fresh
    /// leader) and writes it to `writer`.
    pub fn write<W: std::io::Write>(&mut self, writer: &mut W, tag_width: usize) -> Result<()> {
        self.reset_directory(tag_width);
        let record_length = LEADER_SIZE + self.data.len();
        let leader = Leader {
            record_length,
            interchange_level: b'3',
            leader_identifier: b'D',
            code_extension_indicator: b' ',
            version_number: b'1',
            application_indicator: b' ',
            field_control_length: 9,
            field_area_start: LEADER_SIZE + self.field_offset,
            extended_char_set: [b' ', b'!', b' '],
            size_field_length: 5,
            size_field_pos: 5,
            size_field_tag: tag_width,
        };
        writer.write_all(&leader.write()).map_err(|e| Error::io_at(0, e))?;
        writer.write_all(&self.data).map_err(|e| Error::io_at(0, e))?;
        Ok(())
    }

    /// Deep-copies this record's buffer and fields. The clone is
    /// independent: mutating it never affects `self`.
    pub fn clone_record(&self) -> Record {
        Record {
            data: self.data.clone(),
            field_offset: self.field_offset,
            fields: self.fields.clone(),
            reuse_header: false,
            is_clone: true,
            size_field_length: self.size_field_length,
            size_field_pos: self.size_field_pos,
            size_field_tag: self.size_field_tag,
        }
    }

    /// Like [`Record::clone_record`], but re-resolves each field's
    /// definition by name against `find_defn` instead of keeping the
    /// original module's `FieldDefn`s. Fails if any field's name is
    /// undefined in the target schema.
    pub fn clone_onto(&self, find_defn: &dyn Fn(&str) -> Option<Rc<FieldDefn>>) -> Result<Record> {
        for field in &self.fields {
            if find_defn(&field.defn.tag).is_none() {
                return Err(Error::UndefinedTag {
                    tag: field.defn.tag.clone(),
                });
            }
        }
        let mut clone = self.clone_record();
        for field in &mut clone.fields {
            field.defn = find_defn(&field.defn.tag).expect("checked above");
        }
        Ok(clone)
    }

    /// A human-readable summary of every field in this record, for logging.
    pub fn summarize(&self, max_instances_per_field: usize) -> String {
        self.fields
            .iter()
            .map(|f| f.summarize(&self.data, max_instances_per_field))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn read_to_buf<R: Read>(reader: &mut R, buf: &mut [u8], offset: u64) -> Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::io_at(offset + total as u64, e)),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_defn::{DataStructure, DataType};
    use std::io::Cursor;

    fn test_defn() -> Rc<FieldDefn> {
        Rc::new(
            FieldDefn::new("TEST", "", "*A!B", "(A,I)", DataStructure::Vector, DataType::MixedDataType).unwrap(),
        )
    }

    #[test]
    fn repeating_variable_field_scenario() {
        let defn = test_defn();
        let mut data = b"foo\x1F12\x1Fbar\x1F34\x1F".to_vec();
        data.push(FIELD_TERMINATOR);
        let field = Field::new(defn, 0, data.len() - 1);
        assert_eq!(field.repeat_count(&data), 2);
        assert_eq!(field.subfield_data(&data, 1, 0).unwrap(), b"bar");
        let sf_i = field.defn.find_subfield("I").unwrap();
        let raw = field.subfield_data(&data, 1, 1).unwrap();
        assert_eq!(sf_i.extract_int(raw), 34);
    }

    #[test]
    fn add_and_delete_field_round_trips() {
        let defn = test_defn();
        let mut record = Record::new();
        let idx = record.add_field(defn).unwrap();
        assert_eq!(record.fields.len(), 1);
        record.set_string_subfield(idx, 0, "A", "hi").unwrap();
        record.delete_field(idx).unwrap();
        assert!(record.fields.is_empty());
        assert!(record.data.is_empty());
    }

    #[test]
    fn write_then_read_back() {
        let defn = test_defn();
        let mut record = Record::new();
        let idx = record.add_field(defn.clone()).unwrap();
        record.set_string_subfield(idx, 0, "A", "hi").unwrap();

        let mut out = Vec::new();
        record.write(&mut out, 4).unwrap();

        let mut cursor = Cursor::new(out);
        let mut offset = 0u64;
        let mut read_back = Record::new();
        let find = |tag: &str| if tag == "TEST" { Some(defn.clone()) } else { None };
        let ok = read_back.read(&mut cursor, &mut offset, &find).unwrap();
        assert!(ok);
        assert_eq!(read_back.fields.len(), 1);
    }
}
