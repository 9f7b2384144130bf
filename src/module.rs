//! `Module` — an open ISO 8211 file: its schema (field definitions parsed
//! from the DDR) and the read/write cursor over its data records.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::rc::Rc;

use crate::bytes::{scan_int, FIELD_TERMINATOR};
use crate::error::{Error, Result};
use crate::field_defn::{DataStructure, DataType, FieldDefn};
use crate::leader::{Leader, LEADER_SIZE};
use crate::record::Record;
use crate::writer::write_directory_entry;

/// An open ISO 8211 file: schema plus a read or write cursor.
///
/// A `Module` owns the field definitions parsed out of (or destined for) the
/// leader record, and hands back [`Record`]s one at a time via
/// [`Module::read_record`]. Every `Record` it returns borrows nothing from
/// the module; records are fully independent once read.
pub struct Module<F> {
    file: F,
    field_defns: Vec<Rc<FieldDefn>>,
    tag_width: usize,
    field_control_length: usize,
    first_record_offset: u64,
    cursor: u64,
    current: Record,
    read_only: bool,
}

impl Module<BufReader<File>> {
    /// Opens an ISO 8211 file for reading, parsing its DDR immediately.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Module<BufReader<File>>> {
        let file = File::open(path.as_ref()).map_err(|e| Error::io_at(0, e))?;
        Module::open_reader(BufReader::new(file))
    }
}

impl<F: Read + Seek> Module<F> {
    /// Parses the DDR from an already-open reader.
    pub fn open_reader(mut file: F) -> Result<Module<F>> {
        let mut leader_buf = [0u8; LEADER_SIZE];
        file.read_exact(&mut leader_buf)
            .map_err(|e| Error::io_at(0, e))?;
        let leader = Leader::parse_ddr(&leader_buf, 0)?;

        log::debug!(
            "DDR leader: record_length={} field_area_start={} interchange_level={}",
            leader.record_length,
            leader.field_area_start,
            leader.interchange_level as char
        );

        let mut rest = vec![0u8; leader.record_length - LEADER_SIZE];
        file.read_exact(&mut rest).map_err(|e| Error::io_at(LEADER_SIZE as u64, e))?;

        let entry_width = leader.entry_width();
        let mut pos = 0usize;
        let mut entries = Vec::new();
        while pos < rest.len() && rest[pos] != FIELD_TERMINATOR {
            if pos + entry_width > rest.len() {
                return Err(Error::HeaderTruncated {
                    reason: "DDR directory entry runs past record length".into(),
                });
            }
            let entry = &rest[pos..pos + entry_width];
            let tag = String::from_utf8_lossy(&entry[..leader.size_field_tag]).into_owned();
            let length = scan_int(&entry[leader.size_field_tag..leader.size_field_tag + leader.size_field_length]);
            let position =
                scan_int(&entry[leader.size_field_tag + leader.size_field_length..]);
            entries.push((tag, length, position));
            pos += entry_width;
        }

        let mut field_defns = Vec::with_capacity(entries.len());
        for (tag, length, position) in entries {
            let field_start = leader.field_area_start as i64 + position - LEADER_SIZE as i64;
            if length < 0
                || field_start < 0
                || (field_start as usize + length as usize) > rest.len()
            {
                return Err(Error::FieldPositionOutOfRange {
                    position,
                    length,
                    data_size: rest.len(),
                });
            }
            let field_bytes = &rest[field_start as usize..field_start as usize + length as usize];
            let defn = FieldDefn::from_ddr_entry(&tag, leader.field_control_length, field_bytes)?;
            log::trace!("defined field `{}` ({})", defn.tag, defn.name);
            field_defns.push(Rc::new(defn));
        }

        let first_record_offset = LEADER_SIZE as u64 + rest.len() as u64;

        Ok(Module {
            file,
            field_defns,
            tag_width: leader.size_field_tag,
            field_control_length: leader.field_control_length,
            first_record_offset,
            cursor: first_record_offset,
            current: Record::new(),
            read_only: true,
        })
    }

    /// Fetches the definition of the named field (case-insensitive; matches
    /// on either the field's DDR name or its tag).
    pub fn find_field_defn(&self, name: &str) -> Option<Rc<FieldDefn>> {
        self.field_defns
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name) || d.tag.eq_ignore_ascii_case(name))
            .cloned()
    }

    pub fn field_defns(&self) -> &[Rc<FieldDefn>] {
        &self.field_defns
    }

    /// Reads the next record. Returns `Ok(None)` at a clean end of file.
    ///
    /// The returned reference is reused from call to call (mirroring the
    /// original's single-working-record model): clone it with
    /// [`Record::clone_record`] if it needs to outlive the next read.
    pub fn read_record(&mut self) -> Result<Option<&Record>> {
        let field_defns = &self.field_defns;
        let find = |tag: &str| {
            field_defns
                .iter()
                .find(|d| d.name.eq_ignore_ascii_case(tag) || d.tag.eq_ignore_ascii_case(tag))
                .cloned()
        };
        let ok = self.current.read(&mut self.file, &mut self.cursor, &find)?;
        if ok {
            Ok(Some(&self.current))
        } else {
            Ok(None)
        }
    }

    /// Seeks back to `offset` (or the first data record, if `None`) so the
    /// next [`Module::read_record`] re-reads from there.
    pub fn rewind(&mut self, offset: Option<u64>) -> Result<()> {
        let target = offset.unwrap_or(self.first_record_offset);
        self.file
            .seek(SeekFrom::Start(target))
            .map_err(|e| Error::io_at(target, e))?;
        self.cursor = target;
        if target == self.first_record_offset {
            self.current.clear();
        }
        Ok(())
    }
}

/// Configuration for [`Module::create`], mirroring the leader fields an
/// application can customize when establishing a new DDR.
#[derive(Debug, Clone)]
pub struct ModuleCreateOptions {
    pub interchange_level: u8,
    pub leader_identifier: u8,
    pub code_extension_indicator: u8,
    pub version_number: u8,
    pub app_indicator: u8,
    pub extended_char_set: [u8; 3],
    pub size_field_length: usize,
    pub size_field_pos: usize,
    pub size_field_tag: usize,
}

impl Default for ModuleCreateOptions {
    fn default() -> ModuleCreateOptions {
        ModuleCreateOptions {
            interchange_level: b'3',
            leader_identifier: b'L',
            code_extension_indicator: b'1',
            version_number: b'1',
            app_indicator: b' ',
            extended_char_set: [b' ', b'!', b' '],
            size_field_length: 5,
            size_field_pos: 5,
            size_field_tag: 4,
        }
    }
}

impl Module<BufWriter<File>> {
    /// Creates a new ISO 8211 file for writing and immediately emits its DDR,
    /// built from `field_defns` and `options`.
    pub fn create<P: AsRef<Path>>(
        path: P,
        field_defns: Vec<FieldDefn>,
        options: ModuleCreateOptions,
    ) -> Result<Module<BufWriter<File>>> {
        let file = File::create(path.as_ref()).map_err(|e| Error::io_at(0, e))?;
        let mut writer = BufWriter::new(file);

        let field_control_length = 9;
        let entry_width = options.size_field_length + options.size_field_pos + options.size_field_tag;
        let entries: Vec<Vec<u8>> = field_defns
            .iter()
            .map(|d| d.to_ddr_entry(field_control_length))
            .collect();

        let dir_size = entry_width * entries.len() + 1;
        let mut record_length = LEADER_SIZE + dir_size;
        let field_area_start = record_length;
        for entry in &entries {
            record_length += entry.len();
        }

        let leader = Leader {
            record_length,
            interchange_level: options.interchange_level,
            leader_identifier: options.leader_identifier,
            code_extension_indicator: options.code_extension_indicator,
            version_number: options.version_number,
            application_indicator: options.app_indicator,
            field_control_length,
            field_area_start,
            extended_char_set: options.extended_char_set,
            size_field_length: options.size_field_length,
            size_field_pos: options.size_field_pos,
            size_field_tag: options.size_field_tag,
        };
        writer.write_all(&leader.write()).map_err(|e| Error::io_at(0, e))?;

        let mut offset = 0usize;
        for (defn, entry) in field_defns.iter().zip(entries.iter()) {
            let mut dir_entry = vec![b' '; entry_width];
            write_directory_entry(
                &mut dir_entry,
                &defn.tag,
                entry.len(),
                offset,
                options.size_field_tag,
                options.size_field_length,
                options.size_field_pos,
            );
            writer.write_all(&dir_entry).map_err(|e| Error::io_at(0, e))?;
            offset += entry.len();
        }
        writer.write_all(&[FIELD_TERMINATOR]).map_err(|e| Error::io_at(0, e))?;

        for entry in &entries {
            writer.write_all(entry).map_err(|e| Error::io_at(0, e))?;
        }
        writer.flush().map_err(|e| Error::io_at(0, e))?;

        let field_defns: Vec<Rc<FieldDefn>> = field_defns.into_iter().map(Rc::new).collect();

        Ok(Module {
            file: writer,
            field_defns,
            tag_width: options.size_field_tag,
            field_control_length,
            first_record_offset: record_length as u64,
            cursor: record_length as u64,
            current: Record::new(),
            read_only: false,
        })
    }

    /// Appends one data record, seeding any field whose tag matches
    /// `record`'s fields from this module's schema by position.
    pub fn write_record(&mut self, record: &mut Record) -> Result<()> {
        if self.read_only {
            return Err(Error::HeaderTruncated {
                reason: "module opened read-only, cannot write a record".into(),
            });
        }
        record.write(&mut self.file, self.tag_width)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.file.flush().map_err(|e| Error::io_at(0, e))
    }
}

impl<F> Module<F> {
    /// Begins a brand-new, unbound record against this module's own field
    /// definitions (for building up a record to pass to
    /// [`Module::write_record`]).
    pub fn new_record(&self) -> Record {
        Record::new()
    }

    pub fn field_control_length(&self) -> usize {
        self.field_control_length
    }
}

/// Convenience constructor mirroring `DDFFieldDefn::Create`-style callers
/// that assemble a schema programmatically ahead of [`Module::create`].
pub fn field_defn(
    tag: &str,
    name: &str,
    array_descriptor: &str,
    format_controls: &str,
    data_structure: DataStructure,
    data_type: DataType,
) -> Result<FieldDefn> {
    FieldDefn::new(tag, name, array_descriptor, format_controls, data_structure, data_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_ddr_bytes() -> Vec<u8> {
        // One field `TEST` with a single elementary subfield `A` (format `(A)`).
        let defn = FieldDefn::new(
            "TEST",
            "Test field",
            "A",
            "(A)",
            DataStructure::Elementary,
            DataType::CharString,
        )
        .unwrap();
        let entry = defn.to_ddr_entry(9);
        let entry_width = 4 + 5 + 5;
        let dir_size = entry_width + 1;
        let record_length = LEADER_SIZE + dir_size + entry.len();
        let field_area_start = LEADER_SIZE + dir_size;

        let leader = Leader {
            record_length,
            interchange_level: b'3',
            leader_identifier: b'L',
            code_extension_indicator: b' ',
            version_number: b'1',
            application_indicator: b' ',
            field_control_length: 9,
            field_area_start,
            extended_char_set: [b' ', b'!', b' '],
            size_field_length: 5,
            size_field_pos: 5,
            size_field_tag: 4,
        };

        let mut out = leader.write().to_vec();
        let mut dir_entry = vec![b' '; entry_width];
        dir_entry[..4].copy_from_slice(b"TEST");
        dir_entry[4..9].copy_from_slice(format!("{:05}", entry.len()).as_bytes());
        dir_entry[9..14].copy_from_slice(format!("{:05}", 0).as_bytes());
        out.extend_from_slice(&dir_entry);
        out.push(FIELD_TERMINATOR);
        out.extend_from_slice(&entry);
        out
    }

    #[test]
    fn opens_ddr_and_defines_field() {
        let bytes = sample_ddr_bytes();
        let module = Module::open_reader(Cursor::new(bytes)).unwrap();
        assert_eq!(module.field_defns().len(), 1);
        assert!(module.find_field_defn("TEST").is_some());
        assert!(module.find_field_defn("Test field").is_some());
    }

    #[test]
    fn rejects_corrupt_leader() {
        let mut bytes = sample_ddr_bytes();
        bytes[6] = b'X';
        let err = Module::open_reader(Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, Error::LeaderCorrupt { .. }));
    }
}
