//! # Seed Server
//!
//! The reverse role: accept inbound peer connections and serve blocks of
//! files this node possesses.
//!
//! Per connection, under a 3-second handshake deadline:
//!
//! 1. Read the remote handshake and look its infohash up in the catalog;
//!    an unknown infohash drops the connection
//! 2. Reply with a handshake carrying the matched infohash
//! 3. Hash the local file piece by piece and send a BITFIELD marking only
//!    the pieces whose hash matches the descriptor
//! 4. Serve REQUESTs from one shared read-only file handle until EOF
//!
//! Sessions are independent: each runs on its own thread with its own
//! file handle and shares nothing mutable with the leech path or with
//! other sessions. A failing session is logged and the listener keeps
//! accepting.

use crate::bitfield::Bitfield;
use crate::catalog::{to_hex, Catalog};
use crate::handshake::{read_handshake, Handshake};
use crate::message::*;
use crate::torrent::{read_chunk, Torrent};

use anyhow::{anyhow, Result};
use rand::Rng;
use sha1::{Digest, Sha1};

use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::net::{TcpListener, TcpStream};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

// Deadline for the inbound handshake exchange
const HANDSHAKE_TIMEOUT_SECS: u64 = 3;

// Largest block a REQUEST may ask for before the session is dropped
const MAX_REQUEST_SIZE: u32 = 131072;

/// Serves catalog files to inbound peers.
#[derive(Clone)]
pub struct Seeder {
    /// Catalog mapping infohashes to local files
    catalog_path: PathBuf,
    /// Directory holding the companion torrent descriptors
    torrents_dir: PathBuf,
    /// This node's 20-byte peer id
    peer_id: [u8; 20],
}

impl Seeder {
    /// Build a seeder with a fresh random peer id.
    pub fn new(catalog_path: PathBuf, torrents_dir: PathBuf) -> Seeder {
        let mut peer_id = [0; 20];
        let mut rng = rand::thread_rng();
        for byte in peer_id.iter_mut() {
            *byte = rng.gen();
        }

        Seeder {
            catalog_path,
            torrents_dir,
            peer_id,
        }
    }

    /// Bind `addr` and serve inbound peers forever.
    pub fn listen(&self, addr: &str) -> Result<()> {
        let listener = match TcpListener::bind(addr) {
            Ok(listener) => listener,
            Err(_) => return Err(anyhow!("could not bind listener on {}", addr)),
        };

        info!("Seeding on {}", addr);

        self.serve(listener)
    }

    /// Accept connections from an already-bound listener.
    ///
    /// One thread per connection; a failed session never stops the
    /// accept loop.
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        for conn in listener.incoming() {
            let conn = match conn {
                Ok(conn) => conn,
                Err(e) => {
                    warn!("Could not accept connection: {}", e);
                    continue;
                }
            };

            let seeder = self.clone();
            thread::spawn(move || {
                if let Err(e) = seeder.serve_connection(conn) {
                    debug!("Seed session ended: {}", e);
                }
            });
        }

        Ok(())
    }

    /// Drive one inbound session from handshake to EOF.
    fn serve_connection(&self, mut conn: TcpStream) -> Result<()> {
        set_timeouts(&conn, Some(HANDSHAKE_TIMEOUT_SECS))?;

        let handshake = read_handshake(&mut conn)?;

        // The catalog snapshot taken here is all this session ever sees
        let catalog = Catalog::load(&self.catalog_path)?;
        let file_path = match catalog.lookup(&handshake.info_hash) {
            Some(file_path) => file_path,
            None => {
                return Err(anyhow!(
                    "no local file matches infohash {}",
                    to_hex(&handshake.info_hash)
                ))
            }
        };

        let reply = Handshake::new(handshake.info_hash, self.peer_id);
        if conn.write_all(&reply.serialize()).is_err() {
            return Err(anyhow!("could not send handshake to peer"));
        }

        // The companion descriptor carries the expected piece hashes
        let file_name = match file_path.file_name() {
            Some(file_name) => file_name.to_string_lossy().into_owned(),
            None => return Err(anyhow!("catalog entry {:?} has no file name", file_path)),
        };
        let torrent = Torrent::load(&self.torrents_dir.join(format!("{}.json", file_name)))?;

        // One file handle for the whole session
        let mut file = match File::open(&file_path) {
            Ok(file) => file,
            Err(_) => return Err(anyhow!("could not open catalog file {:?}", file_path)),
        };

        let bitfield = build_bitfield(&mut file, &torrent)?;
        let message = Message::new_with_payload(MESSAGE_BITFIELD, bitfield.as_bytes().to_vec());
        if conn.write_all(&message.serialize()?).is_err() {
            return Err(anyhow!("could not send bitfield to peer"));
        }

        info!("Serving {:?} to {}", torrent.name(), conn.peer_addr()?);

        // Handshake done; the session now lives until the peer goes away
        set_timeouts(&conn, None)?;

        self.serve_requests(conn, file, &torrent)
    }

    /// Answer REQUESTs until the peer disconnects.
    fn serve_requests(&self, mut conn: TcpStream, mut file: File, torrent: &Torrent) -> Result<()> {
        loop {
            // The peer closing the connection ends the session cleanly
            let frame = match read_frame(&mut conn) {
                Ok(frame) => frame,
                Err(_) => return Ok(()),
            };

            let message = match frame {
                Frame::KeepAlive => continue,
                Frame::Message(message) => message,
            };
            if message.id != MESSAGE_REQUEST {
                continue;
            }

            let (index, begin, length) = message.parse_request()?;
            if index as usize >= torrent.nb_pieces() {
                return Err(anyhow!("received request for piece {} of {}", index, torrent.nb_pieces()));
            }
            if length > MAX_REQUEST_SIZE {
                return Err(anyhow!("received oversized request of {} bytes", length));
            }

            // Read the block; a short read at EOF trims the last block
            let offset = index as u64 * torrent.piece_length as u64 + begin as u64;
            file.seek(SeekFrom::Start(offset))?;
            let mut block = vec![0; length as usize];
            let n = read_chunk(&mut file, &mut block)?;
            block.truncate(n);

            debug!("Serve piece {} [{}:{}]", index, begin, begin as usize + n);

            let reply = Message::piece(index, begin, block)?;
            if conn.write_all(&reply.serialize()?).is_err() {
                return Err(anyhow!("could not send block to peer"));
            }
        }
    }
}

/// Hash the local file and mark the pieces that match the descriptor.
///
/// A piece whose hash differs is simply left unset: the peer can still
/// serve every piece it really has, and nothing it does not.
fn build_bitfield(file: &mut File, torrent: &Torrent) -> Result<Bitfield> {
    let mut bitfield = Bitfield::new(torrent.nb_pieces());
    let mut buf = vec![0; torrent.piece_length as usize];

    for (index, expected) in torrent.piece_hashes.iter().enumerate() {
        let n = read_chunk(file, &mut buf)?;
        let hash: [u8; 20] = Sha1::digest(&buf[..n]).into();
        if hash == *expected {
            bitfield.set(index as u32);
        } else {
            debug!("Piece {} differs from descriptor, not advertising", index);
        }
    }

    file.seek(SeekFrom::Start(0))?;

    Ok(bitfield)
}

fn set_timeouts(conn: &TcpStream, secs: Option<u64>) -> Result<()> {
    let timeout = secs.map(Duration::from_secs);

    if conn.set_read_timeout(timeout).is_err() {
        return Err(anyhow!("could not set read timeout"));
    }
    if conn.set_write_timeout(timeout).is_err() {
        return Err(anyhow!("could not set write timeout"));
    }

    Ok(())
}
