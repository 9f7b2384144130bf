use std::io::Cursor;

use criterion::{criterion_group, criterion_main, Criterion};
use iso8211::field_defn::{DataStructure, DataType, FieldDefn};
use iso8211::leader::{Leader, LEADER_SIZE};
use iso8211::module::Module;

const FIELD_TERMINATOR: u8 = 0x1E;

fn sample_file() -> Vec<u8> {
    let defn = FieldDefn::new(
        "ATTR",
        "Attributes",
        "*NAME!VALUE",
        "(A,A)",
        DataStructure::Vector,
        DataType::MixedDataType,
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
    dir_entry[..4].copy_from_slice(b"ATTR");
    dir_entry[4..9].copy_from_slice(format!("{:05}", entry.len()).as_bytes());
    dir_entry[9..14].copy_from_slice(format!("{:05}", 0).as_bytes());
    out.extend_from_slice(&dir_entry);
    out.push(FIELD_TERMINATOR);
    out.extend_from_slice(&entry);

    // One data record with five repeated NAME/VALUE subfield pairs.
    let mut field_data = Vec::new();
    for i in 0..5 {
        field_data.extend_from_slice(format!("attr{i}\x1Fvalue{i}\x1F").as_bytes());
    }
    field_data.push(FIELD_TERMINATOR);

    let dr_entry_width = 4 + 5 + 5;
    let dr_dir_size = dr_entry_width + 1;
    let dr_record_length = LEADER_SIZE + dr_dir_size + field_data.len();
    let dr_field_area_start = LEADER_SIZE + dr_dir_size;

    let dr_leader = Leader {
        record_length: dr_record_length,
        interchange_level: b'3',
        leader_identifier: b'D',
        code_extension_indicator: b' ',
        version_number: b'1',
        application_indicator: b' ',
        field_control_length: 9,
        field_area_start: dr_field_area_start,
        extended_char_set: [b' ', b'!', b' '],
        size_field_length: 5,
        size_field_pos: 5,
        size_field_tag: 4,
    };

    out.extend_from_slice(&dr_leader.write());
    let mut dr_dir_entry = vec![b' '; dr_entry_width];
    dr_dir_entry[..4].copy_from_slice(b"ATTR");
    dr_dir_entry[4..9].copy_from_slice(format!("{:05}", field_data.len()).as_bytes());
    dr_dir_entry[9..14].copy_from_slice(format!("{:05}", 0).as_bytes());
    out.extend_from_slice(&dr_dir_entry);
    out.push(FIELD_TERMINATOR);
    out.extend_from_slice(&field_data);

    out
}

fn decode_benchmark(c: &mut Criterion) {
    let _ = env_logger::try_init();
    let bytes = sample_file();
    c.bench_function("decode_record", |b| {
        b.iter(|| {
            let mut module = Module::open_reader(Cursor::new(bytes.clone())).unwrap();
            let record = module.read_record().unwrap().unwrap();
            assert_eq!(record.fields.len(), 1);
        })
    });
}

criterion_group!(benches, decode_benchmark);
criterion_main!(benches);
