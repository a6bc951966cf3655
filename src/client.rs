//! # Leech-Side Peer Session
//!
//! A [`Client`] owns one TCP connection to one remote peer and drives the
//! leech half of the peer wire protocol:
//!
//! 1. **Connect**: TCP with a 15-second dial deadline
//! 2. **Handshake**: exchange handshakes and verify the echoed infohash
//! 3. **Bitfield**: receive the peer's piece map before anything else
//! 4. **Exchange**: send UNCHOKE/INTERESTED/REQUEST/HAVE, ingest
//!    CHOKE/UNCHOKE/HAVE/PIECE
//!
//! The session is owned end-to-end by the worker thread driving it; no
//! state is shared with other sessions. Any error leaves the session
//! unusable and the caller drops it, re-queueing whatever piece was in
//! flight.

use crate::bitfield::Bitfield;
use crate::handshake::{read_handshake, Handshake};
use crate::message::*;
use crate::peer::Peer;
use crate::piece::PieceProgress;

use anyhow::{anyhow, Result};

use std::io::Write;
use std::net::TcpStream;
use std::time::Duration;

// Dial deadline for the initial TCP connect
const CONNECT_TIMEOUT_SECS: u64 = 15;

// Socket deadline covering the handshake and the initial bitfield
const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// A connection to a remote peer, past handshake and bitfield.
pub struct Client {
    /// The remote endpoint, for logging
    peer: Peer,
    /// TCP stream to the peer
    conn: TcpStream,
    /// Pieces the remote peer claims to have
    bitfield: Bitfield,
    /// Whether the remote peer currently chokes us
    choked: bool,
}

impl Client {
    /// Connect to a peer and complete the protocol preamble.
    ///
    /// Dials with a 15-second deadline, then under a 10-second socket
    /// deadline writes our handshake, reads and verifies the peer's, and
    /// waits for the initial BITFIELD. Keep-alives before the bitfield
    /// are tolerated; any other message first ends the session.
    pub fn connect(peer: Peer, peer_id: [u8; 20], info_hash: [u8; 20]) -> Result<Client> {
        let mut conn = match TcpStream::connect_timeout(
            &peer.addr(),
            Duration::from_secs(CONNECT_TIMEOUT_SECS),
        ) {
            Ok(conn) => conn,
            Err(_) => return Err(anyhow!("could not connect to peer {}", peer)),
        };

        set_timeouts(&conn, Some(HANDSHAKE_TIMEOUT_SECS))?;

        // Send our handshake and check the peer answers for the same file
        let handshake = Handshake::new(info_hash, peer_id);
        if conn.write_all(&handshake.serialize()).is_err() {
            return Err(anyhow!("could not send handshake to peer {}", peer));
        }

        let reply = read_handshake(&mut conn)?;
        if reply.info_hash != info_hash {
            return Err(anyhow!("received wrong infohash from peer {}", peer));
        }

        // The bitfield must be the first real message on the wire
        let bitfield = loop {
            match read_frame(&mut conn)? {
                Frame::KeepAlive => continue,
                Frame::Message(message) if message.id == MESSAGE_BITFIELD => {
                    break Bitfield::from_bytes(message.payload)
                }
                Frame::Message(message) => {
                    return Err(anyhow!(
                        "expected BITFIELD from peer {}, got message id {}",
                        peer,
                        message.id
                    ))
                }
            }
        };

        info!("Connected to peer {}", peer);

        Ok(Client {
            peer,
            conn,
            bitfield,
            choked: true,
        })
    }

    /// Whether the remote peer currently chokes this client.
    pub fn is_choked(&self) -> bool {
        self.choked
    }

    /// Start a piece attempt with an open request pipeline.
    ///
    /// The serve path answers REQUESTs without ever issuing UNCHOKE, so
    /// each attempt begins unchoked; an incoming CHOKE still halts new
    /// requests immediately.
    pub fn assume_unchoked(&mut self) {
        self.choked = false;
    }

    /// Whether the remote peer claims to have a piece.
    pub fn has_piece(&self, index: u32) -> bool {
        self.bitfield.has(index)
    }

    /// Set both socket deadlines, or clear them with `None`.
    pub fn set_connection_timeout(&self, secs: Option<u64>) -> Result<()> {
        set_timeouts(&self.conn, secs)
    }

    /// Read the next frame from the peer.
    pub fn read_frame(&mut self) -> Result<Frame> {
        read_frame(&mut self.conn)
    }

    /// Process a CHOKE: the peer will stop answering requests.
    pub fn read_choke(&mut self) {
        debug!("Receive CHOKE from peer {}", self.peer);
        self.choked = true;
    }

    /// Process an UNCHOKE: the peer will answer requests again.
    pub fn read_unchoke(&mut self) {
        debug!("Receive UNCHOKE from peer {}", self.peer);
        self.choked = false;
    }

    /// Process a HAVE and record the piece in the peer's bitfield.
    pub fn read_have(&mut self, message: Message) -> Result<()> {
        let index = message.parse_have()?;
        self.bitfield.set(index);

        Ok(())
    }

    /// Process a PIECE against the piece currently in progress.
    ///
    /// Copies the block into the assembly buffer and settles one slot of
    /// the request backlog.
    pub fn read_piece(&mut self, message: Message, progress: &mut PieceProgress) -> Result<()> {
        let n = message.parse_piece(progress.index, &mut progress.buf)? as u32;

        debug!(
            "Receive block of {} bytes for piece {} from peer {}",
            n, progress.index, self.peer
        );

        progress.downloaded += n;
        // An unsolicited block must not underflow the pipeline window
        progress.backlog = progress.backlog.saturating_sub(1);

        Ok(())
    }

    /// Send an UNCHOKE to the peer.
    pub fn send_unchoke(&mut self) -> Result<()> {
        self.send_message(Message::new(MESSAGE_UNCHOKE))
    }

    /// Send an INTERESTED to the peer.
    pub fn send_interested(&mut self) -> Result<()> {
        self.send_message(Message::new(MESSAGE_INTERESTED))
    }

    /// Send a HAVE announcing a verified piece.
    pub fn send_have(&mut self, index: u32) -> Result<()> {
        self.send_message(Message::have(index)?)
    }

    /// Send a REQUEST for one block.
    pub fn send_request(&mut self, index: u32, begin: u32, length: u32) -> Result<()> {
        debug!(
            "Send REQUEST for piece {} [{}:{}] to peer {}",
            index,
            begin,
            begin + length,
            self.peer
        );

        self.send_message(Message::request(index, begin, length)?)
    }

    fn send_message(&mut self, message: Message) -> Result<()> {
        let encoded = message.serialize()?;
        if self.conn.write_all(&encoded).is_err() {
            return Err(anyhow!(
                "could not send message id {} to peer {}",
                message.id,
                self.peer
            ));
        }

        Ok(())
    }
}

fn set_timeouts(conn: &TcpStream, secs: Option<u64>) -> Result<()> {
    let timeout = secs.map(Duration::from_secs);

    if conn.set_write_timeout(timeout).is_err() {
        return Err(anyhow!("could not set write timeout"));
    }
    if conn.set_read_timeout(timeout).is_err() {
        return Err(anyhow!("could not set read timeout"));
    }

    Ok(())
}
