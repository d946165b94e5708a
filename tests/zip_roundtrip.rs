use std::io::{Read, Write};
use std::thread;

use encoding_rs::{SHIFT_JIS, WINDOWS_1252};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use time::macros::datetime;

use zipcodec::checksum::{Checksum, Crc32};
use zipcodec::zip::{CompressionMethod, Zip64Mode};
use zipcodec::{LocalFileReader, ZipArchive, ZipEntry, ZipError, ZipReader, ZipWriter};

const EOCD64_SIGNATURE: &[u8] = b"PK\x06\x06";
const DESCRIPTOR_SIGNATURE: &[u8] = b"PK\x07\x08";

struct Expected {
    name: String,
    data: Vec<u8>,
}

fn random_entries(seed: u64, count: usize) -> Vec<Expected> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| {
            let len = rng.random_range(0..20_000);
            let data = if i % 2 == 0 {
                let word = format!("entry {i} says hello. ");
                word.as_bytes().iter().copied().cycle().take(len).collect()
            } else {
                (0..len).map(|_| rng.random::<u8>()).collect()
            };
            Expected {
                name: format!("dir{}/file{i}.bin", i % 3),
                data,
            }
        })
        .collect()
}

/// Write entries, alternating STORED and DEFLATED.
fn write_archive(entries: &[Expected], mode: Zip64Mode) -> Vec<u8> {
    let mut w = ZipWriter::new(Vec::new());
    w.set_zip64_mode(mode);
    for (i, e) in entries.iter().enumerate() {
        let mut entry = ZipEntry::new(e.name.as_str());
        if i % 2 == 1 {
            entry.set_method(CompressionMethod::Stored);
            entry.set_size(e.data.len() as u64);
            entry.set_crc(Crc32::checksum(&e.data));
        }
        w.put_next_entry(entry).unwrap();
        w.write_all(&e.data).unwrap();
        w.close_entry().unwrap();
    }
    w.into_inner().unwrap()
}

fn read_with_archive(bytes: Vec<u8>) -> Vec<(ZipEntry, Vec<u8>)> {
    let archive = ZipArchive::new(bytes).unwrap();
    archive
        .entries()
        .iter()
        .map(|e| {
            let mut data = Vec::new();
            archive.open(e).unwrap().read_to_end(&mut data).unwrap();
            (e.clone(), data)
        })
        .collect()
}

fn read_with_stream(bytes: &[u8]) -> Vec<(ZipEntry, Vec<u8>)> {
    let mut reader = ZipReader::new(bytes);
    let mut out = Vec::new();
    while reader.next_entry().unwrap().is_some() {
        let mut data = Vec::new();
        reader.read_to_end(&mut data).unwrap();
        out.push((reader.entry().unwrap().clone(), data));
    }
    out
}

fn assert_same(expected: &[Expected], actual: &[(ZipEntry, Vec<u8>)]) {
    assert_eq!(expected.len(), actual.len());
    for (e, (entry, data)) in expected.iter().zip(actual) {
        assert_eq!(entry.name(), e.name);
        assert_eq!(entry.size(), Some(e.data.len() as u64));
        assert_eq!(entry.crc(), Some(Crc32::checksum(&e.data)));
        assert!(data == &e.data, "data of {} differs", e.name);
    }
}

#[test]
fn entries_round_trip_through_both_readers() {
    for count in [0, 1, 7] {
        let expected = random_entries(count as u64, count);
        for mode in [Zip64Mode::Auto, Zip64Mode::Always] {
            let bytes = write_archive(&expected, mode);
            assert_same(&expected, &read_with_stream(&bytes));
            assert_same(&expected, &read_with_archive(bytes));
        }
    }
}

#[test]
fn empty_archive_with_comment() {
    let mut w = ZipWriter::new(Vec::new());
    w.set_comment("nothing to see").unwrap();
    let bytes = w.into_inner().unwrap();
    assert_eq!(bytes.len(), 22 + "nothing to see".len());

    let archive = ZipArchive::new(bytes.clone()).unwrap();
    assert!(archive.is_empty());
    assert_eq!(archive.comment(), "nothing to see");
    assert!(ZipReader::new(&bytes[..]).next_entry().unwrap().is_none());
}

fn empty_stored_archive(count: usize, mode: Zip64Mode) -> Vec<u8> {
    let mut w = ZipWriter::new(Vec::new());
    w.set_method(CompressionMethod::Stored).unwrap();
    w.set_zip64_mode(mode);
    for i in 0..count {
        let mut entry = ZipEntry::new(format!("{i}"));
        entry.set_size(0);
        entry.set_crc(0);
        entry.set_dos_time(zipcodec::zip::DosDateTime::MIN);
        w.put_next_entry(entry).unwrap();
        w.close_entry().unwrap();
    }
    w.into_inner().unwrap()
}

fn has_zip64_end(bytes: &[u8]) -> bool {
    // End records follow the last directory header, so the tail suffices.
    let tail = &bytes[bytes.len().saturating_sub(22 + 20 + 56)..];
    tail.windows(4).any(|w| w == EOCD64_SIGNATURE)
}

#[test]
fn entry_count_crosses_the_zip64_boundary() {
    for count in [65534usize, 65535, 65536, 65537, 65538] {
        let bytes = empty_stored_archive(count, Zip64Mode::Auto);
        assert_eq!(has_zip64_end(&bytes), count >= 65535, "{count} entries");

        let archive = ZipArchive::new(&bytes[..]).unwrap();
        assert_eq!(archive.len(), count);
        assert_eq!(archive.entries()[count - 1].name(), format!("{}", count - 1));

        let mut reader = ZipReader::new(&bytes[..]);
        let mut seen = 0;
        while let Some(entry) = reader.next_entry().unwrap() {
            assert_eq!(entry.name(), format!("{seen}"));
            seen += 1;
        }
        assert_eq!(seen, count);
    }
}

#[test]
fn never_mode_wraps_the_entry_count() {
    let bytes = empty_stored_archive(65537, Zip64Mode::Never);
    assert!(!has_zip64_end(&bytes));
    let eocd = &bytes[bytes.len() - 22..];
    assert_eq!(u16::from_le_bytes([eocd[10], eocd[11]]), 1);

    let archive = ZipArchive::new(bytes).unwrap();
    assert_eq!(archive.len(), 65537);
}

#[test]
fn descriptor_values_match_the_directory() {
    let data = b"streamed without knowing its size ".repeat(300);
    let mut w = ZipWriter::new(Vec::new());
    w.put_next_entry(ZipEntry::new("stream.txt")).unwrap();
    w.write_all(&data).unwrap();
    w.close_entry().unwrap();
    let bytes = w.into_inner().unwrap();
    assert!(bytes.windows(4).any(|w| w == DESCRIPTOR_SIGNATURE));

    let archive = ZipArchive::new(&bytes[..]).unwrap();
    let central = archive.by_name("stream.txt").unwrap().clone();
    assert!(central.has_data_descriptor());

    let mut reader = ZipReader::new(&bytes[..]);
    let local = reader.next_entry().unwrap().unwrap();
    assert_eq!(local.crc(), None);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);

    let finished = reader.entry().unwrap();
    assert_eq!(finished.size(), central.size());
    assert_eq!(finished.compressed_size(), central.compressed_size());
    assert_eq!(finished.crc(), central.crc());
    assert_eq!(finished.crc(), Some(Crc32::checksum(&data)));
    assert!(reader.next_entry().unwrap().is_none());
}

#[test]
fn unsigned_descriptor_is_accepted() {
    let data = b"descriptor without its signature".repeat(10);
    let mut w = ZipWriter::new(Vec::new());
    w.put_next_entry(ZipEntry::new("a.txt")).unwrap();
    w.write_all(&data).unwrap();
    w.close_entry().unwrap();
    w.put_next_entry(ZipEntry::new("b.txt")).unwrap();
    w.write_all(b"second").unwrap();
    let mut bytes = w.into_inner().unwrap();

    let at = bytes
        .windows(4)
        .position(|w| w == DESCRIPTOR_SIGNATURE)
        .unwrap();
    bytes.drain(at..at + 4);

    let mut reader = ZipReader::new(&bytes[..]);
    let mut names = Vec::new();
    while let Some(entry) = reader.next_entry().unwrap() {
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        names.push(entry.name().to_string());
        if entry.name() == "a.txt" {
            assert_eq!(out, data);
            assert_eq!(reader.entry().unwrap().size(), Some(data.len() as u64));
        }
    }
    assert_eq!(names, ["a.txt", "b.txt"]);
}

#[test]
fn stored_corruption_is_reported_after_preceding_bytes() {
    let data = vec![0x5Au8; 1000];
    let mut entry = ZipEntry::new("plain.bin");
    entry.set_method(CompressionMethod::Stored);
    entry.set_size(data.len() as u64);
    entry.set_crc(Crc32::checksum(&data));
    let mut w = ZipWriter::new(Vec::new());
    w.put_next_entry(entry).unwrap();
    w.write_all(&data).unwrap();
    let mut bytes = w.into_inner().unwrap();

    let start = bytes.windows(4).position(|w| w == [0x5A; 4]).unwrap();
    bytes[start + 600] ^= 0x01;

    let mut reader = ZipReader::new(&bytes[..]);
    reader.next_entry().unwrap().unwrap();
    let mut out = Vec::new();
    let err = reader.read_to_end(&mut out).unwrap_err();
    assert_eq!(out.len(), 1000);
    assert_eq!(&out[..600], &data[..600]);
    match ZipError::from_io_ref(&err) {
        Some(ZipError::CrcMismatch { name, .. }) => assert_eq!(name, "plain.bin"),
        other => panic!("unexpected error {other:?}"),
    }

    let archive = ZipArchive::new(bytes).unwrap();
    let mut out = Vec::new();
    let err = archive
        .open(&archive.entries()[0])
        .unwrap()
        .read_to_end(&mut out)
        .unwrap_err();
    assert!(matches!(ZipError::from_io_ref(&err), Some(ZipError::CrcMismatch { .. })));
}

#[test]
fn pre_1980_times_and_extra_order() {
    let custom = [0xFE, 0xCA, 0x02, 0x00, 0xAB, 0xCD];
    let old = datetime!(1970-01-02 03:04:05 UTC);

    let mut entry = ZipEntry::new("old.txt");
    entry.set_time(old);
    entry.set_extra(custom.to_vec()).unwrap();
    let mut w = ZipWriter::new(Vec::new());
    w.set_zip64_mode(Zip64Mode::Always);
    w.put_next_entry(entry).unwrap();
    w.write_all(b"from the past").unwrap();
    let bytes = w.into_inner().unwrap();

    let archive = ZipArchive::new(&bytes[..]).unwrap();
    let central = &archive.entries()[0];
    assert_eq!(central.time(), Some(old));
    assert_eq!(central.dos_time(), Some(zipcodec::zip::DosDateTime::MIN));
    let tags: Vec<u16> = record_tags(central.extra());
    assert_eq!(tags, [0xCAFE, 0x5455]);

    let mut reader = ZipReader::new(&bytes[..]);
    let local = reader.next_entry().unwrap().unwrap();
    assert_eq!(local.time(), Some(old));
    assert_eq!(record_tags(local.extra()), [0xCAFE, 0x0001, 0x5455]);
    let mut text = String::new();
    reader.read_to_string(&mut text).unwrap();
    assert_eq!(text, "from the past");
}

fn record_tags(extra: &[u8]) -> Vec<u16> {
    let mut tags = Vec::new();
    let mut rest = extra;
    while rest.len() >= 4 {
        let tag = u16::from_le_bytes([rest[0], rest[1]]);
        let len = u16::from_le_bytes([rest[2], rest[3]]) as usize;
        tags.push(tag);
        rest = &rest[(4 + len).min(rest.len())..];
    }
    tags
}

#[test]
fn legacy_charset_names_through_both_readers() {
    for (encoding, name) in [(SHIFT_JIS, "日本語/テスト.txt"), (WINDOWS_1252, "café/résumé.txt")] {
        let mut w = ZipWriter::with_encoding(Vec::new(), encoding);
        w.put_next_entry(ZipEntry::new(name)).unwrap();
        w.write_all(b"charset").unwrap();
        let bytes = w.into_inner().unwrap();
        assert!(!bytes.windows(name.len()).any(|w| w == name.as_bytes()));

        let archive = ZipArchive::with_encoding(&bytes[..], encoding).unwrap();
        assert!(archive.by_name(name).is_some(), "{}", encoding.name());
        assert_eq!(archive.entries()[0].flags() & (1 << 11), 0);

        let mut reader = ZipReader::with_encoding(&bytes[..], encoding);
        assert_eq!(reader.next_entry().unwrap().unwrap().name(), name);
    }

    let mut w = ZipWriter::with_encoding(Vec::new(), WINDOWS_1252);
    let err = w.put_next_entry(ZipEntry::new("日本")).unwrap_err();
    assert!(matches!(err, ZipError::Encoding { .. }));
}

#[test]
fn rewritten_file_makes_the_directory_stale() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("archive.zip");
    let mut w = ZipWriter::new(Vec::new());
    w.put_next_entry(ZipEntry::new("a.txt")).unwrap();
    w.write_all(b"original content").unwrap();
    std::fs::write(&path, w.into_inner().unwrap()).unwrap();

    let archive = ZipArchive::new(LocalFileReader::new(&path).unwrap()).unwrap();
    let entry = archive.by_name("a.txt").unwrap().clone();
    let mut text = String::new();
    archive.open(&entry).unwrap().read_to_string(&mut text).unwrap();
    assert_eq!(text, "original content");

    let mut w = ZipWriter::new(Vec::new());
    w.put_next_entry(ZipEntry::new("something-else.txt")).unwrap();
    w.write_all(b"replacement").unwrap();
    std::fs::write(&path, w.into_inner().unwrap()).unwrap();

    assert!(matches!(
        archive.open(&entry),
        Err(ZipError::StaleDirectory { .. })
    ));
}

#[test]
fn entries_read_concurrently() {
    let expected = random_entries(42, 12);
    let archive = ZipArchive::new(write_archive(&expected, Zip64Mode::Auto)).unwrap();

    thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                for (e, entry) in expected.iter().zip(archive.entries()) {
                    let mut data = Vec::new();
                    archive.open(entry).unwrap().read_to_end(&mut data).unwrap();
                    assert!(data == e.data);
                }
            });
        }
    });

    // Several readers open at once on the same thread.
    let mut readers: Vec<_> = archive
        .entries()
        .iter()
        .map(|e| archive.open(e).unwrap())
        .collect();
    let mut outputs = vec![Vec::new(); readers.len()];
    let mut buf = [0u8; 100];
    let mut active = true;
    while active {
        active = false;
        for (r, out) in readers.iter_mut().zip(outputs.iter_mut()) {
            let n = r.read(&mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
            active |= n > 0;
        }
    }
    for (e, out) in expected.iter().zip(&outputs) {
        assert!(*out == e.data);
    }
}

#[test]
fn duplicate_and_invalid_names_are_rejected() {
    let mut w = ZipWriter::new(Vec::new());
    w.put_next_entry(ZipEntry::new("same")).unwrap();
    w.close_entry().unwrap();
    assert!(matches!(
        w.put_next_entry(ZipEntry::new("same")),
        Err(ZipError::DuplicateEntry(_))
    ));
    for bad in ["", "/abs", "back\\slash"] {
        assert!(matches!(
            w.put_next_entry(ZipEntry::new(bad)),
            Err(ZipError::InvalidEntryName { .. })
        ));
    }
}
