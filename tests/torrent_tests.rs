mod common;

use remora::torrent::Torrent;

use sha1::{Digest, Sha1};
use std::fs;
use tempfile::TempDir;

fn descriptor(piece_count: usize, piece_length: u32, length: u64) -> Torrent {
    Torrent {
        announce: "http://localhost:8090/announce".to_string(),
        info_hash: [1; 20],
        piece_hashes: vec![[0; 20]; piece_count],
        piece_length,
        length,
        name: "data.bin".to_string(),
    }
}

#[test]
fn test_piece_sizes_with_short_last_piece() {
    let torrent = descriptor(2, 16384, 20000);

    assert_eq!(torrent.nb_pieces(), 2);
    assert_eq!(torrent.piece_size(0), 16384);
    assert_eq!(torrent.piece_size(1), 3616);
    assert_eq!(torrent.piece_bounds(0), (0, 16384));
    assert_eq!(torrent.piece_bounds(1), (16384, 20000));
}

#[test]
fn test_piece_sizes_with_exact_multiple() {
    let torrent = descriptor(2, 16384, 32768);

    assert_eq!(torrent.piece_size(0), 16384);
    assert_eq!(torrent.piece_size(1), 16384);
}

#[test]
fn test_create_hashes_every_piece() {
    let dir = TempDir::new().unwrap();
    let file_path = dir.path().join("data.bin");
    let data = common::patterned_bytes(20000);
    fs::write(&file_path, &data).unwrap();

    let torrent = Torrent::create(&file_path, "http://localhost:8090/announce", 16384).unwrap();

    assert_eq!(torrent.nb_pieces(), 2);
    assert_eq!(torrent.length, 20000);
    assert_eq!(torrent.piece_length, 16384);
    assert_eq!(torrent.name(), "data.bin");

    let expected_0: [u8; 20] = Sha1::digest(&data[..16384]).into();
    let expected_1: [u8; 20] = Sha1::digest(&data[16384..]).into();
    assert_eq!(torrent.piece_hashes[0], expected_0);
    assert_eq!(torrent.piece_hashes[1], expected_1);
}

#[test]
fn test_create_computes_bencode_infohash() {
    let dir = TempDir::new().unwrap();
    let file_path = dir.path().join("data.bin");
    let data = common::patterned_bytes(20000);
    fs::write(&file_path, &data).unwrap();

    let torrent = Torrent::create(&file_path, "http://localhost:8090/announce", 16384).unwrap();

    // The infohash is the SHA-1 of the bencoded info dictionary
    let mut info = Vec::new();
    info.extend_from_slice(b"d6:lengthi20000e4:name8:data.bin12:piece lengthi16384e6:pieces40:");
    info.extend_from_slice(&torrent.piece_hashes[0]);
    info.extend_from_slice(&torrent.piece_hashes[1]);
    info.extend_from_slice(b"e");
    let expected: [u8; 20] = Sha1::digest(&info).into();

    assert_eq!(torrent.info_hash, expected);
}

#[test]
fn test_create_rejects_bad_input() {
    let dir = TempDir::new().unwrap();
    let file_path = dir.path().join("data.bin");
    fs::write(&file_path, b"hello").unwrap();

    assert!(Torrent::create(&file_path, "not a url", 16384).is_err());
    assert!(Torrent::create(&file_path, "http://localhost:8090/announce", 0).is_err());
}

#[test]
fn test_save_and_load_roundtrip() {
    let dir = TempDir::new().unwrap();
    let file_path = dir.path().join("data.bin");
    fs::write(&file_path, common::patterned_bytes(40000)).unwrap();
    let torrent = Torrent::create(&file_path, "http://localhost:8090/announce", 16384).unwrap();

    let descriptor_path = dir.path().join("data.bin.json");
    torrent.save(&descriptor_path).unwrap();
    let loaded = Torrent::load(&descriptor_path).unwrap();

    assert_eq!(loaded.announce, torrent.announce);
    assert_eq!(loaded.info_hash, torrent.info_hash);
    assert_eq!(loaded.piece_hashes, torrent.piece_hashes);
    assert_eq!(loaded.piece_length, torrent.piece_length);
    assert_eq!(loaded.length, torrent.length);
    assert_eq!(loaded.name(), torrent.name());
}

#[test]
fn test_descriptor_uses_pascal_case_fields() {
    let dir = TempDir::new().unwrap();
    let file_path = dir.path().join("data.bin");
    fs::write(&file_path, b"hello world").unwrap();
    let torrent = Torrent::create(&file_path, "http://localhost:8090/announce", 16384).unwrap();

    let descriptor_path = dir.path().join("data.bin.json");
    torrent.save(&descriptor_path).unwrap();
    let raw = fs::read_to_string(&descriptor_path).unwrap();

    for field in [
        "\"Announce\"",
        "\"InfoHash\"",
        "\"PieceHashes\"",
        "\"PieceLength\"",
        "\"Length\"",
        "\"Name\"",
    ] {
        assert!(raw.contains(field), "missing {} in {}", field, raw);
    }
}

#[test]
fn test_load_rejects_wrong_piece_count() {
    let dir = TempDir::new().unwrap();
    let file_path = dir.path().join("data.bin");
    fs::write(&file_path, common::patterned_bytes(20000)).unwrap();
    let mut torrent = Torrent::create(&file_path, "http://localhost:8090/announce", 16384).unwrap();

    // One hash too many for the declared length
    torrent.piece_hashes.push([0; 20]);
    let descriptor_path = dir.path().join("data.bin.json");
    torrent.save(&descriptor_path).unwrap();

    assert!(Torrent::load(&descriptor_path).is_err());
}
