//! End-to-end decoding of hand-built archives, including the pathological
//! ones a salvage reader exists for: no central directory, data-descriptor
//! boundaries, truncation mid-entry.

use std::io::{self, Cursor, Read, Write};

use flate2::write::DeflateEncoder;
use flate2::Compression;
use zip_salvage::{Crc32Reader, SalvageArchive, SalvageEntry, ZipError};

const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
const FLAG_UTF8: u16 = 1 << 11;

const STORE: u16 = 0;
const DEFLATE: u16 = 8;

#[allow(clippy::too_many_arguments)]
fn local_header(
    name: &str,
    method: u16,
    flags: u16,
    crc32: u32,
    compressed: u32,
    uncompressed: u32,
    extra: &[u8],
) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"PK\x03\x04");
    out.extend_from_slice(&20u16.to_le_bytes()); // version needed
    out.extend_from_slice(&flags.to_le_bytes());
    out.extend_from_slice(&method.to_le_bytes());
    out.extend_from_slice(&0x6c32u16.to_le_bytes()); // 13:33:36
    out.extend_from_slice(&0x5a41u16.to_le_bytes()); // 2025-02-01
    out.extend_from_slice(&crc32.to_le_bytes());
    out.extend_from_slice(&compressed.to_le_bytes());
    out.extend_from_slice(&uncompressed.to_le_bytes());
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(&(extra.len() as u16).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(extra);
    out
}

fn descriptor(crc32: u32, compressed: u32, uncompressed: u32, with_signature: bool) -> Vec<u8> {
    let mut out = Vec::new();
    if with_signature {
        out.extend_from_slice(b"PK\x07\x08");
    }
    out.extend_from_slice(&crc32.to_le_bytes());
    out.extend_from_slice(&compressed.to_le_bytes());
    out.extend_from_slice(&uncompressed.to_le_bytes());
    out
}

fn deflate(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

fn open(stream: Vec<u8>) -> SalvageArchive<Cursor<Vec<u8>>> {
    SalvageArchive::new(Cursor::new(stream))
}

fn body_of(entry: &mut SalvageEntry<'_, Cursor<Vec<u8>>>) -> Vec<u8> {
    let mut out = Vec::new();
    entry.read_to_end(&mut out).unwrap();
    out
}

#[test]
fn stored_entry_without_descriptor() {
    let mut stream = local_header("a.txt", STORE, 0, 0x3610A686, 5, 5, &[]);
    stream.extend_from_slice(b"hello");

    let mut archive = open(stream);
    let mut entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(entry.name(), "a.txt");
    assert!(!entry.is_dir());
    assert_eq!(body_of(&mut entry), b"hello");
    assert_eq!(entry.crc32().unwrap(), 0x3610A686);
    assert_eq!(entry.crc32().unwrap(), crc32fast::hash(b"hello"));
    assert_eq!(entry.compressed_size().unwrap(), 5);
    assert_eq!(entry.original_size().unwrap(), 5);
    drop(entry);
    assert!(archive.next_entry().unwrap().is_none());
}

#[test]
fn deflated_entry_with_descriptor() {
    let payload = deflate(b"hi\n");
    let crc = crc32fast::hash(b"hi\n");

    let mut stream = local_header("b.txt", DEFLATE, FLAG_DATA_DESCRIPTOR, 0, 0, 0, &[]);
    stream.extend_from_slice(&payload);
    stream.extend_from_slice(&descriptor(crc, payload.len() as u32, 3, true));
    stream.extend_from_slice(b"PK\x01\x02");

    let mut archive = open(stream);
    let mut entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(entry.name(), "b.txt");
    assert_eq!(body_of(&mut entry), b"hi\n");

    // The reported values are the descriptor's, resolvable now that the
    // body has been consumed.
    assert_eq!(entry.crc32().unwrap(), crc);
    assert_eq!(entry.compressed_size().unwrap(), payload.len() as u64);
    assert_eq!(entry.original_size().unwrap(), 3);
    drop(entry);
    assert!(archive.next_entry().unwrap().is_none());
}

#[test]
fn directory_entry_has_no_body() {
    let stream = local_header("dir/", STORE, 0, 0, 0, 0, &[]);

    let mut archive = open(stream);
    let mut entry = archive.next_entry().unwrap().unwrap();
    assert!(entry.is_dir());
    assert_eq!(entry.name(), "dir/");
    assert_eq!(body_of(&mut entry), b"");
    drop(entry);
    assert!(archive.next_entry().unwrap().is_none());
}

#[test]
fn zip64_extra_field_upgrades_sizes() {
    let mut extra = Vec::new();
    extra.extend_from_slice(&0x0001u16.to_le_bytes());
    extra.extend_from_slice(&16u16.to_le_bytes());
    extra.extend_from_slice(&(1u64 << 32).to_le_bytes());
    extra.extend_from_slice(&(1u64 << 32).to_le_bytes());

    let stream = local_header("big.bin", STORE, 0, 0, 0xFFFFFFFF, 0xFFFFFFFF, &extra);

    let mut archive = open(stream);
    let mut entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(entry.original_size().unwrap(), 1 << 32);
    assert_eq!(entry.compressed_size().unwrap(), 1 << 32);
}

#[test]
fn zip64_upgrades_only_the_overflowed_field() {
    // Only compressed_size carries the sentinel, so the 8-byte ZIP64
    // record belongs to it; the 32-bit uncompressed size must survive.
    let mut extra = Vec::new();
    extra.extend_from_slice(&0x0001u16.to_le_bytes());
    extra.extend_from_slice(&8u16.to_le_bytes());
    extra.extend_from_slice(&(1u64 << 32).to_le_bytes());

    let stream = local_header("big.bin", STORE, 0, 0, 0xFFFFFFFF, 1000, &extra);

    let mut archive = open(stream);
    let mut entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(entry.original_size().unwrap(), 1000);
    assert_eq!(entry.compressed_size().unwrap(), 1 << 32);
}

#[test]
fn garbage_input_reports_signature_not_found() {
    let mut archive = open(b"THISISNOTAZIPFILE".to_vec());
    let err = match archive.next_entry() {
        Err(e) => e,
        Ok(_) => panic!("expected an error"),
    };
    assert!(matches!(err, ZipError::SignatureNotFound));
    // The failure is terminal.
    assert!(archive.next_entry().unwrap().is_none());
}

#[test]
fn stored_descriptor_entry_flows_into_the_next() {
    let crc = crc32fast::hash(b"HOGEHOGE");
    let mut stream = local_header("h.bin", STORE, FLAG_DATA_DESCRIPTOR, 0, 0, 0, &[]);
    stream.extend_from_slice(b"HOGEHOGE");
    stream.extend_from_slice(&descriptor(crc, 8, 8, true));
    stream.extend_from_slice(&local_header(
        "tail.txt",
        STORE,
        0,
        crc32fast::hash(b"ok"),
        2,
        2,
        &[],
    ));
    stream.extend_from_slice(b"ok");

    let mut archive = open(stream);

    let mut entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(entry.name(), "h.bin");
    assert_eq!(body_of(&mut entry), b"HOGEHOGE");
    assert_eq!(entry.crc32().unwrap(), crc);
    assert_eq!(entry.compressed_size().unwrap(), 8);
    drop(entry);

    // The scanner already consumed the next signature; the iterator must
    // pick the second entry up from there.
    let mut entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(entry.name(), "tail.txt");
    assert_eq!(body_of(&mut entry), b"ok");
    drop(entry);
    assert!(archive.next_entry().unwrap().is_none());
}

#[test]
fn descriptor_without_signature_validates_too() {
    let crc = crc32fast::hash(b"HOGEHOGE");
    let mut stream = local_header("h.bin", STORE, FLAG_DATA_DESCRIPTOR, 0, 0, 0, &[]);
    stream.extend_from_slice(b"HOGEHOGE");
    stream.extend_from_slice(&descriptor(crc, 8, 8, false));
    stream.extend_from_slice(b"PK\x01\x02");

    let mut archive = open(stream);
    let mut entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(body_of(&mut entry), b"HOGEHOGE");
    assert_eq!(entry.crc32().unwrap(), crc);
    drop(entry);
    assert!(archive.next_entry().unwrap().is_none());
}

#[test]
fn entries_decode_in_stream_order() {
    let texts: [&[u8]; 3] = [b"first body", b"second body, deflated", b"third"];
    let second = deflate(texts[1]);

    let mut stream = Vec::new();
    stream.extend_from_slice(&local_header(
        "one.txt",
        STORE,
        0,
        crc32fast::hash(texts[0]),
        texts[0].len() as u32,
        texts[0].len() as u32,
        &[],
    ));
    stream.extend_from_slice(texts[0]);
    stream.extend_from_slice(&local_header(
        "two.txt",
        DEFLATE,
        0,
        crc32fast::hash(texts[1]),
        second.len() as u32,
        texts[1].len() as u32,
        &[],
    ));
    stream.extend_from_slice(&second);
    stream.extend_from_slice(&local_header(
        "three.txt",
        STORE,
        0,
        crc32fast::hash(texts[2]),
        texts[2].len() as u32,
        texts[2].len() as u32,
        &[],
    ));
    stream.extend_from_slice(texts[2]);
    stream.extend_from_slice(b"PK\x01\x02");

    let mut archive = open(stream);
    let mut seen = Vec::new();
    while let Some(mut entry) = archive.next_entry().unwrap() {
        let body = body_of(&mut entry);

        let mut check = Crc32Reader::new(&body[..]);
        io::copy(&mut check, &mut io::sink()).unwrap();
        assert_eq!(check.crc32(), entry.crc32().unwrap());

        seen.push((entry.name().to_owned(), body));
    }
    assert_eq!(
        seen.iter().map(|(n, _)| n.as_str()).collect::<Vec<_>>(),
        ["one.txt", "two.txt", "three.txt"]
    );
    for ((_, body), text) in seen.iter().zip(texts) {
        assert_eq!(body, text);
    }
}

#[test]
fn unread_entries_are_skipped_cleanly() {
    let payload = deflate(b"never read");
    let mut stream = Vec::new();
    stream.extend_from_slice(&local_header("a.txt", STORE, 0, 0, 7, 7, &[]));
    stream.extend_from_slice(b"ignored");
    stream.extend_from_slice(&local_header(
        "b.txt",
        DEFLATE,
        FLAG_DATA_DESCRIPTOR,
        0,
        0,
        0,
        &[],
    ));
    stream.extend_from_slice(&payload);
    stream.extend_from_slice(&descriptor(
        crc32fast::hash(b"never read"),
        payload.len() as u32,
        10,
        true,
    ));
    stream.extend_from_slice(&local_header("c.txt", STORE, 0, 0, 4, 4, &[]));
    stream.extend_from_slice(b"tail");
    stream.extend_from_slice(b"PK\x01\x02");

    let mut archive = open(stream);
    let mut names = Vec::new();
    while let Some(entry) = archive.next_entry().unwrap() {
        names.push(entry.name().to_owned());
        // bodies intentionally left unread
    }
    assert_eq!(names, ["a.txt", "b.txt", "c.txt"]);
}

#[test]
fn directory_with_descriptor_reaches_the_next_entry() {
    let mut stream = local_header("d/", STORE, FLAG_DATA_DESCRIPTOR, 0, 0, 0, &[]);
    stream.extend_from_slice(&descriptor(0, 0, 0, true));
    stream.extend_from_slice(&local_header("f.txt", STORE, 0, 0, 3, 3, &[]));
    stream.extend_from_slice(b"end");

    let mut archive = open(stream);
    let entry = archive.next_entry().unwrap().unwrap();
    assert!(entry.is_dir());
    drop(entry);

    let mut entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(entry.name(), "f.txt");
    assert_eq!(body_of(&mut entry), b"end");
}

#[test]
fn truncated_descriptor_body_yields_what_was_there() {
    let mut stream = local_header("cut.bin", STORE, FLAG_DATA_DESCRIPTOR, 0, 0, 0, &[]);
    stream.extend_from_slice(b"partial payload, archive ends here");

    let mut archive = open(stream);
    let mut entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(body_of(&mut entry), b"partial payload, archive ends here");
    // No descriptor was ever seen, so the header sentinels stand.
    assert_eq!(entry.crc32().unwrap(), 0);
    assert_eq!(entry.compressed_size().unwrap(), 0);
    drop(entry);
    assert!(archive.next_entry().unwrap().is_none());
}

#[test]
fn truncation_inside_a_header_is_an_error() {
    let mut stream = local_header("a.txt", STORE, 0, 0, 5, 5, &[]);
    stream.extend_from_slice(b"hello");
    stream.extend_from_slice(b"PK\x03\x04\x14\x00"); // next header cut short

    let mut archive = open(stream);
    let mut entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(body_of(&mut entry), b"hello");
    drop(entry);
    let err = match archive.next_entry() {
        Err(e) => e,
        Ok(_) => panic!("expected an error"),
    };
    assert!(matches!(err, ZipError::UnexpectedEof(_)));
}

#[test]
fn utf8_flagged_names_skip_the_legacy_decoder() {
    let name = "日本語.txt";
    let mut stream = local_header(name, STORE, FLAG_UTF8, 0, 2, 2, &[]);
    stream.extend_from_slice(b"ok");

    let mut archive = open(stream);
    // A decoder that would mangle everything proves it is not consulted.
    archive.set_name_decoder(|_| Ok("wrong".to_owned()));
    let entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(entry.name(), name);
}

#[test]
fn leading_slash_is_stripped() {
    let mut stream = local_header("/abs/path.txt", STORE, FLAG_UTF8, 0, 1, 1, &[]);
    stream.extend_from_slice(b"x");

    let mut archive = open(stream);
    let entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(entry.name(), "abs/path.txt");
}

#[test]
fn extended_timestamp_resolves_unix_times() {
    let mut extra = Vec::new();
    extra.extend_from_slice(&0x5455u16.to_le_bytes());
    extra.extend_from_slice(&9u16.to_le_bytes());
    extra.push(0b0000_0011); // mtime + atime
    extra.extend_from_slice(&1714635025u32.to_le_bytes());
    extra.extend_from_slice(&1714635999u32.to_le_bytes());

    let mut stream = local_header("t.txt", STORE, 0, 0, 4, 4, &extra);
    stream.extend_from_slice(b"data");

    let mut archive = open(stream);
    let entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(entry.last_modification_time(), Some(1714635025));
    assert_eq!(entry.last_access_time(), Some(1714635999));
    assert_eq!(entry.creation_time(), None);

    let modified = entry.last_modified().unwrap();
    assert_eq!(modified.year(), 2025);
    assert_eq!(modified.month(), 2);
    assert_eq!(modified.day(), 1);
}

#[test]
fn empty_input_is_a_clean_end() {
    let mut archive = open(Vec::new());
    assert!(archive.next_entry().unwrap().is_none());
}

#[test]
fn payload_containing_header_magic_is_not_split() {
    // A descriptor-bounded body whose payload embeds PK\x03\x04: the
    // boundary may only be accepted where the descriptor accounts for
    // every payload byte.
    let payload = b"prefix PK\x03\x04 suffix that keeps going for a while";
    let crc = crc32fast::hash(payload);
    let mut stream = local_header("tricky.bin", STORE, FLAG_DATA_DESCRIPTOR, 0, 0, 0, &[]);
    stream.extend_from_slice(payload);
    stream.extend_from_slice(&descriptor(crc, payload.len() as u32, payload.len() as u32, true));
    stream.extend_from_slice(b"PK\x01\x02");

    let mut archive = open(stream);
    let mut entry = archive.next_entry().unwrap().unwrap();
    assert_eq!(body_of(&mut entry), payload);
    assert_eq!(entry.crc32().unwrap(), crc);
    drop(entry);
    assert!(archive.next_entry().unwrap().is_none());
}
