use std::io::{Read, Write};

use flate2::read::{DeflateDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, ZlibEncoder};
use flate2::{Compression, Decompress, FlushDecompress};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use zipcodec::checksum::{Adler32, Checksum, Crc32};
use zipcodec::deflate::{Deflater, FlushMode, Inflater, Level, Strategy, compress, decompress};
use zipcodec::stream::{DeflaterWriter, InflaterReader};

/// Text-like data with long repeats, interleaved with noise.
fn payload(seed: u64, len: usize) -> Vec<u8> {
    const WORDS: [&[u8]; 6] = [b"deflate ", b"inflate ", b"archive ", b"entry ", b"zip ", b"\n"];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        if rng.random_range(0..8) == 0 {
            let n = rng.random_range(1..64);
            out.extend((0..n).map(|_| rng.random::<u8>()));
        } else {
            out.extend_from_slice(WORDS[rng.random_range(0..WORDS.len())]);
        }
    }
    out.truncate(len);
    out
}

/// Compress `data` fed in `chunk` sized pieces.
fn deflate_chunked(deflater: &mut Deflater, data: &[u8], chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 1024];
    for piece in data.chunks(chunk.max(1)) {
        deflater.set_input(piece).unwrap();
        while !deflater.needs_input() {
            let n = deflater.deflate(&mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
        }
    }
    deflater.finish().unwrap();
    while !deflater.finished() {
        let n = deflater.deflate(&mut buf).unwrap();
        out.extend_from_slice(&buf[..n]);
    }
    out
}

/// Decompress `data` fed in `chunk` sized pieces.
fn inflate_chunked(inflater: &mut Inflater, data: &[u8], chunk: usize) -> Vec<u8> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; 777];
    let mut pieces = data.chunks(chunk.max(1));
    while !inflater.finished() {
        let n = inflater.inflate(&mut buf).unwrap();
        out.extend_from_slice(&buf[..n]);
        if n == 0 && inflater.needs_input() {
            let piece = pieces.next().expect("stream ended early");
            inflater.set_input(piece).unwrap();
        }
    }
    out
}

#[test]
fn checksum_known_values() {
    assert_eq!(Crc32::checksum(b"123456789"), 0xCBF4_3926);
    assert_eq!(Adler32::checksum(b"Wikipedia"), 0x11E6_0398);
    assert_eq!(Adler32::checksum(b""), 1);
    assert_eq!(Crc32::checksum(b""), 0);
}

#[test]
fn checksums_agree_with_flate2() {
    let data = payload(7, 200_000);
    let mut crc = Crc32::new();
    let mut adler = Adler32::new();
    for piece in data.chunks(4093) {
        crc.update(piece);
        adler.update(piece);
    }
    let mut reference = flate2::Crc::new();
    reference.update(&data);
    assert_eq!(crc.value(), reference.sum());

    // The zlib trailer carries the Adler-32 of the content.
    let zlib = compress(&data, Level::BEST_SPEED, true).unwrap();
    let trailer = u32::from_be_bytes(zlib[zlib.len() - 4..].try_into().unwrap());
    assert_eq!(adler.value(), trailer);
}

#[test]
fn every_level_and_strategy_round_trips() {
    let data = payload(1, 70_000);
    let strategies = [Strategy::Default, Strategy::Filtered, Strategy::HuffmanOnly];
    for level in 0..=9 {
        for (i, strategy) in strategies.iter().enumerate() {
            for zlib in [false, true] {
                let mut deflater = Deflater::new(Level::new(level).unwrap(), zlib);
                deflater.set_strategy(*strategy).unwrap();
                let packed = deflate_chunked(&mut deflater, &data, 1000 + 3333 * i);
                assert_eq!(deflater.bytes_read(), data.len() as u64);

                let mut inflater = Inflater::new(zlib);
                let unpacked = inflate_chunked(&mut inflater, &packed, 17 + 500 * i);
                assert_eq!(unpacked, data, "level {level}, {strategy:?}, zlib {zlib}");
                assert_eq!(inflater.bytes_written(), data.len() as u64);
            }
        }
    }
}

#[test]
fn odd_chunkings_round_trip() {
    let data = payload(2, 5000);
    for chunk in [1, 2, 3, 255, 256, 257, 4999, 5000] {
        let mut deflater = Deflater::raw(Level::Default);
        let packed = deflate_chunked(&mut deflater, &data, chunk);
        let mut inflater = Inflater::raw();
        assert_eq!(inflate_chunked(&mut inflater, &packed, chunk), data);
    }
}

#[test]
fn empty_and_incompressible_input() {
    for zlib in [false, true] {
        let packed = compress(b"", Level::Default, zlib).unwrap();
        assert!(decompress(&packed, zlib).unwrap().is_empty());
    }

    let mut rng = StdRng::seed_from_u64(3);
    let mut noise = vec![0u8; 100_000];
    rng.fill(&mut noise[..]);
    let packed = compress(&noise, Level::BEST_COMPRESSION, false).unwrap();
    // Stored fallback bounds the expansion.
    assert!(packed.len() < noise.len() + noise.len() / 100 + 64);
    assert_eq!(decompress(&packed, false).unwrap(), noise);
}

#[test]
fn flate2_decodes_our_output() {
    let data = payload(4, 150_000);
    for level in [Level::NO_COMPRESSION, Level::BEST_SPEED, Level::Default, Level::BEST_COMPRESSION] {
        let raw = compress(&data, level, false).unwrap();
        let mut out = Vec::new();
        DeflateDecoder::new(&raw[..]).read_to_end(&mut out).unwrap();
        assert_eq!(out, data);

        let zlib = compress(&data, level, true).unwrap();
        let mut out = Vec::new();
        ZlibDecoder::new(&zlib[..]).read_to_end(&mut out).unwrap();
        assert_eq!(out, data);
    }
}

#[test]
fn we_decode_flate2_output() {
    let data = payload(5, 150_000);
    for level in [0, 1, 6, 9] {
        let mut enc = DeflateEncoder::new(Vec::new(), Compression::new(level));
        enc.write_all(&data).unwrap();
        let raw = enc.finish().unwrap();
        assert_eq!(decompress(&raw, false).unwrap(), data);

        let mut enc = ZlibEncoder::new(Vec::new(), Compression::new(level));
        enc.write_all(&data).unwrap();
        let zlib = enc.finish().unwrap();
        let mut inflater = Inflater::new(true);
        assert_eq!(inflate_chunked(&mut inflater, &zlib, 333), data);
        assert_eq!(inflater.get_adler(), Adler32::checksum(&data));
    }
}

#[test]
fn sync_flush_prefix_decodes_with_flate2() {
    let first = payload(6, 3000);
    let second = payload(8, 3000);

    let mut deflater = Deflater::raw(Level::Default);
    let mut buf = vec![0u8; 64 * 1024];
    deflater.set_input(&first).unwrap();
    let n = deflater.deflate_with_flush(&mut buf, FlushMode::Sync).unwrap();
    let prefix = buf[..n].to_vec();
    assert_eq!(&prefix[prefix.len() - 4..], &[0x00, 0x00, 0xFF, 0xFF]);

    let mut d = Decompress::new(false);
    let mut out = Vec::with_capacity(first.len() + 1024);
    d.decompress_vec(&prefix, &mut out, FlushDecompress::Sync).unwrap();
    assert_eq!(out, first);

    // The rest of the stream still decodes as one.
    let mut whole = prefix;
    whole.extend(deflate_chunked(&mut deflater, &second, 1024));
    let mut expected = first;
    expected.extend_from_slice(&second);
    assert_eq!(decompress(&whole, false).unwrap(), expected);
}

#[test]
fn full_flush_resets_history() {
    let text = b"repeated phrase, repeated phrase, repeated phrase. ".repeat(40);
    let mut deflater = Deflater::raw(Level::Default);
    let mut buf = vec![0u8; 64 * 1024];
    deflater.set_input(&text).unwrap();
    let n = deflater.deflate_with_flush(&mut buf, FlushMode::Full).unwrap();
    let prefix_len = n;
    let mut packed = buf[..n].to_vec();
    packed.extend(deflate_chunked(&mut deflater, &text, text.len()));

    // The part after a full flush point references nothing before it.
    let mut out = Vec::new();
    DeflateDecoder::new(&packed[prefix_len..])
        .read_to_end(&mut out)
        .unwrap();
    assert_eq!(out, text);
}

#[test]
fn preset_dictionary_example() {
    let text = b"Welcome to the US Open;".repeat(6);
    let dict = b"Open";

    let mut deflater = Deflater::new(Level::Default, true);
    deflater.set_dictionary_range(dict, 1, 3).unwrap();
    let packed = deflate_chunked(&mut deflater, &text, text.len());

    let mut inflater = Inflater::new(true);
    inflater.set_input(&packed).unwrap();
    let mut out = vec![0u8; 256];
    assert_eq!(inflater.inflate(&mut out).unwrap(), 0);
    assert!(inflater.needs_dictionary());
    assert_eq!(inflater.get_adler(), Adler32::checksum(b"pen"));

    let err = inflater.set_dictionary(b"Open").unwrap_err();
    assert!(matches!(err, zipcodec::ZipError::DictionaryMismatch { .. }));
    assert!(inflater.needs_dictionary());

    inflater.set_dictionary_range(dict, 1, 3).unwrap();
    let mut total = 0;
    while !inflater.finished() {
        total += inflater.inflate(&mut out[total..]).unwrap();
    }
    assert_eq!(total, 138);
    assert_eq!(&out[..total], &text[..]);
}

#[test]
fn level_change_mid_stream() {
    let data = payload(9, 40_000);
    let mut deflater = Deflater::raw(Level::NO_COMPRESSION);
    let mut out = Vec::new();
    let mut buf = vec![0u8; 4096];
    for (i, piece) in data.chunks(10_000).enumerate() {
        if i == 2 {
            deflater.set_level(Level::BEST_COMPRESSION).unwrap();
        }
        deflater.set_input(piece).unwrap();
        while !deflater.needs_input() {
            let n = deflater.deflate(&mut buf).unwrap();
            out.extend_from_slice(&buf[..n]);
        }
    }
    deflater.finish().unwrap();
    while !deflater.finished() {
        let n = deflater.deflate(&mut buf).unwrap();
        out.extend_from_slice(&buf[..n]);
    }
    assert_eq!(deflater.level(), Level::BEST_COMPRESSION);
    assert_eq!(decompress(&out, false).unwrap(), data);
}

#[test]
fn stream_adapters_interoperate() {
    let data = payload(10, 120_000);

    let mut writer = DeflaterWriter::with_level(Vec::new(), Level::BEST_SPEED, true);
    for piece in data.chunks(3000) {
        writer.write_all(piece).unwrap();
    }
    let zlib = writer.into_inner().unwrap();

    let mut reference = Vec::new();
    ZlibDecoder::new(&zlib[..]).read_to_end(&mut reference).unwrap();
    assert_eq!(reference, data);

    let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
    enc.write_all(&data).unwrap();
    let raw = enc.finish().unwrap();
    let mut reader = InflaterReader::raw(&raw[..]);
    let mut out = Vec::new();
    reader.read_to_end(&mut out).unwrap();
    assert_eq!(out, data);
}
