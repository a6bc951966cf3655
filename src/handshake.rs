//! # BitTorrent Handshake
//!
//! The handshake is the first exchange on every peer connection, in both
//! directions and in both roles:
//!
//! ```text
//! <pstrlen><pstr><reserved><info_hash><peer_id>
//! ```
//!
//! - **pstrlen**: 1 byte - length of the protocol string (19)
//! - **pstr**: "BitTorrent protocol"
//! - **reserved**: 8 bytes, all zeros
//! - **info_hash**: 20 bytes - identifies the swarm
//! - **peer_id**: 20 bytes - identifies the peer
//!
//! The total length is always `49 + pstrlen` bytes. The infohash is what
//! binds the connection to one specific file: the leech side verifies the
//! echoed infohash matches its own, the seed side uses it to look up the
//! file in its catalog.

use anyhow::{anyhow, Result};

use std::io::Read;

const PROTOCOL_ID: &str = "BitTorrent protocol";

/// A handshake message, pinned to the standard protocol string.
pub struct Handshake {
    /// 20-byte SHA-1 hash of the bencoded info dictionary
    pub info_hash: [u8; 20],
    /// 20-byte unique identifier of the sending peer
    pub peer_id: [u8; 20],
}

impl Handshake {
    /// Build a new handshake.
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Handshake { info_hash, peer_id }
    }

    /// Serialize the handshake for transmission.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf: Vec<u8> = Vec::with_capacity(49 + PROTOCOL_ID.len());

        buf.push(PROTOCOL_ID.len() as u8);
        buf.extend_from_slice(PROTOCOL_ID.as_bytes());
        buf.extend_from_slice(&[0; 8]);
        buf.extend_from_slice(&self.info_hash);
        buf.extend_from_slice(&self.peer_id);

        buf
    }
}

/// Read a handshake from a stream.
///
/// Blocks until the full `49 + pstrlen` bytes arrived. A zero pstrlen or
/// a stream that ends early is an error; validating the infohash is the
/// caller's job.
pub fn read_handshake(reader: &mut impl Read) -> Result<Handshake> {
    // Read the protocol string length
    let mut len_buf = [0; 1];
    if reader.read_exact(&mut len_buf).is_err() {
        return Err(anyhow!("could not read handshake length from peer"));
    }

    let pstrlen = len_buf[0] as usize;
    if pstrlen == 0 {
        return Err(anyhow!("received invalid handshake length from peer"));
    }

    // Read the remainder: pstr, reserved bytes, infohash, peer id
    let mut buf: Vec<u8> = vec![0; 48 + pstrlen];
    if reader.read_exact(&mut buf).is_err() {
        return Err(anyhow!("could not read handshake from peer"));
    }

    let mut info_hash = [0; 20];
    let mut peer_id = [0; 20];
    info_hash.copy_from_slice(&buf[pstrlen + 8..pstrlen + 28]);
    peer_id.copy_from_slice(&buf[pstrlen + 28..pstrlen + 48]);

    Ok(Handshake { info_hash, peer_id })
}
