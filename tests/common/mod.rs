//! Shared fixtures: in-process seeders, scripted fake peers and a
//! one-shot fake tracker, all over localhost TCP.

#![allow(dead_code)]

use remora::bitfield::Bitfield;
use remora::catalog::Catalog;
use remora::handshake::{read_handshake, Handshake};
use remora::message::*;
use remora::peer::Peer;
use remora::seeder::Seeder;
use remora::torrent::Torrent;

use std::fs;
use std::io::{Read, Write};
use std::net::{IpAddr, Ipv4Addr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread;

use tempfile::TempDir;

/// Deterministic non-repeating filler for test files.
pub fn patterned_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn local_peer(port: u16) -> Peer {
    Peer {
        id: format!("peer-{}", port),
        ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
        port,
    }
}

/// A packed bitfield with every piece set.
pub fn full_bitfield(nb_pieces: usize) -> Vec<u8> {
    let mut bitfield = Bitfield::new(nb_pieces);
    for index in 0..nb_pieces {
        bitfield.set(index as u32);
    }
    bitfield.as_bytes().to_vec()
}

/// A live seeder and everything it serves from.
pub struct SeedFixture {
    /// Holds the scratch files alive for the duration of the test
    pub dir: TempDir,
    pub torrent: Torrent,
    pub peer: Peer,
}

/// Spawn a seeder for `data`, split at `piece_length`.
pub fn spawn_seeder(data: &[u8], piece_length: u32, announce: &str) -> SeedFixture {
    spawn_seeder_with_copy(data, piece_length, announce, None)
}

/// Spawn a seeder whose on-disk copy may differ from the descriptor.
///
/// The descriptor and catalog always describe `data`; when `serve_copy`
/// is given, the file on disk holds those bytes instead, so the seeder
/// only advertises the pieces where the two agree.
pub fn spawn_seeder_with_copy(
    data: &[u8],
    piece_length: u32,
    announce: &str,
    serve_copy: Option<&[u8]>,
) -> SeedFixture {
    let dir = TempDir::new().unwrap();

    let file_path = dir.path().join("data.bin");
    fs::write(&file_path, data).unwrap();
    let torrent = Torrent::create(&file_path, announce, piece_length).unwrap();

    let torrents_dir = dir.path().join("torrents");
    fs::create_dir_all(&torrents_dir).unwrap();
    torrent
        .save(&torrents_dir.join("data.bin.json"))
        .unwrap();

    if let Some(copy) = serve_copy {
        fs::write(&file_path, copy).unwrap();
    }

    let catalog_path = dir.path().join("catalog.json");
    let mut catalog = Catalog::load(&catalog_path).unwrap();
    catalog.insert(&torrent.info_hash, &file_path);
    catalog.save(&catalog_path).unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let seeder = Seeder::new(catalog_path, torrents_dir);
    thread::spawn(move || {
        let _ = seeder.serve(listener);
    });

    SeedFixture {
        dir,
        torrent,
        peer: local_peer(port),
    }
}

/// Behavior of a scripted peer.
#[derive(Clone)]
pub struct FakePeerScript {
    /// File contents blocks are cut from
    pub data: Vec<u8>,
    pub piece_length: u32,
    pub info_hash: [u8; 20],
    /// Raw bitfield payload to advertise
    pub bitfield: Vec<u8>,
    /// Flip every served byte
    pub corrupt: bool,
    /// Close the connection after this many served blocks
    pub close_after_blocks: Option<usize>,
    /// Send this many keep-alives before every block
    pub keepalives_before_block: usize,
}

impl FakePeerScript {
    pub fn new(data: Vec<u8>, piece_length: u32, info_hash: [u8; 20], nb_pieces: usize) -> Self {
        FakePeerScript {
            data,
            piece_length,
            info_hash,
            bitfield: full_bitfield(nb_pieces),
            corrupt: false,
            close_after_blocks: None,
            keepalives_before_block: 0,
        }
    }
}

/// Spawn a peer that follows `script` for every inbound connection.
pub fn spawn_fake_peer(script: FakePeerScript) -> Peer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    thread::spawn(move || {
        for conn in listener.incoming() {
            let mut conn = match conn {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let _ = run_script(&mut conn, &script);
        }
    });

    local_peer(port)
}

fn run_script(conn: &mut TcpStream, script: &FakePeerScript) -> anyhow::Result<()> {
    read_handshake(conn)?;
    let reply = Handshake::new(script.info_hash, *b"remora-test-fakepeer");
    conn.write_all(&reply.serialize())?;

    let bitfield = Message::new_with_payload(MESSAGE_BITFIELD, script.bitfield.clone());
    conn.write_all(&bitfield.serialize()?)?;

    let mut served = 0;
    loop {
        let message = match read_frame(conn)? {
            Frame::KeepAlive => continue,
            Frame::Message(message) => message,
        };
        if message.id != MESSAGE_REQUEST {
            continue;
        }

        let (index, begin, length) = message.parse_request()?;

        for _ in 0..script.keepalives_before_block {
            conn.write_all(&[0, 0, 0, 0])?;
        }

        let offset = index as usize * script.piece_length as usize + begin as usize;
        let mut block = script.data[offset..offset + length as usize].to_vec();
        if script.corrupt {
            for byte in block.iter_mut() {
                *byte ^= 0xFF;
            }
        }

        conn.write_all(&Message::piece(index, begin, block)?.serialize()?)?;

        served += 1;
        if let Some(max) = script.close_after_blocks {
            if served >= max {
                return Ok(());
            }
        }
    }
}

/// Spawn a one-shot tracker answering with `body` under `status`.
///
/// Returns the announce URL and a channel yielding the raw request text.
pub fn spawn_tracker(status: &str, body: String) -> (String, mpsc::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let status = status.to_string();
    let (request_tx, request_rx) = mpsc::channel();

    thread::spawn(move || {
        if let Ok((mut conn, _)) = listener.accept() {
            // Read until the end of the request headers
            let mut request = Vec::new();
            let mut buf = [0; 1024];
            while !request.windows(4).any(|window| window == b"\r\n\r\n") {
                match conn.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let _ = request_tx.send(String::from_utf8_lossy(&request).into_owned());

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = conn.write_all(response.as_bytes());
        }
    });

    (format!("http://127.0.0.1:{}/announce", port), request_rx)
}
