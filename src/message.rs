//! # Peer Wire Messages
//!
//! Framing and parsing for the peer wire protocol. After the handshake,
//! every byte on a peer connection belongs to a length-prefixed frame:
//!
//! ```text
//! <length prefix><message ID><payload>
//! ```
//!
//! - **Length prefix**: 4 bytes (big-endian u32) - bytes following the prefix
//! - **Message ID**: 1 byte
//! - **Payload**: `length - 1` bytes
//!
//! ## Message Types
//!
//! | ID | Name | Payload |
//! |----|------|---------|
//! | 0 | CHOKE | none |
//! | 1 | UNCHOKE | none |
//! | 2 | INTERESTED | none |
//! | 3 | NOT INTERESTED | none |
//! | 4 | HAVE | piece index |
//! | 5 | BITFIELD | packed piece map |
//! | 6 | REQUEST | index, begin, length |
//! | 7 | PIECE | index, begin, block |
//! | 8 | CANCEL | index, begin, length |
//!
//! A frame whose length prefix is zero is a keep-alive: it carries no id
//! and no payload. Reads return a [`Frame`] so keep-alives stay a distinct
//! variant instead of a sentinel message id.

use anyhow::{anyhow, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use std::io::{Cursor, Read};

type MessageId = u8;
type MessagePayload = Vec<u8>;

pub const MESSAGE_CHOKE: MessageId = 0;
pub const MESSAGE_UNCHOKE: MessageId = 1;
pub const MESSAGE_INTERESTED: MessageId = 2;
pub const MESSAGE_NOT_INTERESTED: MessageId = 3;
pub const MESSAGE_HAVE: MessageId = 4;
pub const MESSAGE_BITFIELD: MessageId = 5;
pub const MESSAGE_REQUEST: MessageId = 6;
pub const MESSAGE_PIECE: MessageId = 7;
pub const MESSAGE_CANCEL: MessageId = 8;

/// One frame read off the wire: either a keep-alive or a real message.
#[derive(Debug)]
pub enum Frame {
    /// A zero-length frame; the peer only signals liveness.
    KeepAlive,
    /// A message with an id and payload.
    Message(Message),
}

#[derive(Default, Debug)]
pub struct Message {
    /// Message type identifier
    pub id: MessageId,
    /// Message payload data
    pub payload: MessagePayload,
}

impl Message {
    /// Build a new message without a payload.
    pub fn new(id: MessageId) -> Self {
        Message {
            id,
            payload: vec![],
        }
    }

    /// Build a new message with a payload.
    pub fn new_with_payload(id: MessageId, payload: MessagePayload) -> Self {
        Message { id, payload }
    }

    /// Build a REQUEST for `length` bytes at offset `begin` of a piece.
    pub fn request(index: u32, begin: u32, length: u32) -> Result<Message> {
        let mut payload: Vec<u8> = vec![];
        payload.write_u32::<BigEndian>(index)?;
        payload.write_u32::<BigEndian>(begin)?;
        payload.write_u32::<BigEndian>(length)?;

        Ok(Message::new_with_payload(MESSAGE_REQUEST, payload))
    }

    /// Build a HAVE announcing possession of a piece.
    pub fn have(index: u32) -> Result<Message> {
        let mut payload: Vec<u8> = vec![];
        payload.write_u32::<BigEndian>(index)?;

        Ok(Message::new_with_payload(MESSAGE_HAVE, payload))
    }

    /// Build a PIECE carrying `block` at offset `begin` of a piece.
    pub fn piece(index: u32, begin: u32, block: Vec<u8>) -> Result<Message> {
        let mut payload: Vec<u8> = Vec::with_capacity(8 + block.len());
        payload.write_u32::<BigEndian>(index)?;
        payload.write_u32::<BigEndian>(begin)?;
        payload.extend_from_slice(&block);

        Ok(Message::new_with_payload(MESSAGE_PIECE, payload))
    }

    /// Serialize the message with its length prefix.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let message_len = 1 + self.payload.len();

        let mut serialized: Vec<u8> = Vec::with_capacity(4 + message_len);
        serialized.write_u32::<BigEndian>(message_len as u32)?;
        serialized.push(self.id);
        serialized.extend_from_slice(&self.payload);

        Ok(serialized)
    }

    /// Parse a HAVE message into the announced piece index.
    pub fn parse_have(&self) -> Result<u32> {
        if self.id != MESSAGE_HAVE || self.payload.len() != 4 {
            return Err(anyhow!("received invalid HAVE from peer"));
        }

        let mut cursor = Cursor::new(&self.payload);
        let index = cursor.read_u32::<BigEndian>()?;

        Ok(index)
    }

    /// Parse a REQUEST message into `(index, begin, length)`.
    pub fn parse_request(&self) -> Result<(u32, u32, u32)> {
        if self.id != MESSAGE_REQUEST || self.payload.len() != 12 {
            return Err(anyhow!("received invalid REQUEST from peer"));
        }

        let mut cursor = Cursor::new(&self.payload);
        let index = cursor.read_u32::<BigEndian>()?;
        let begin = cursor.read_u32::<BigEndian>()?;
        let length = cursor.read_u32::<BigEndian>()?;

        Ok((index, begin, length))
    }

    /// Parse a PIECE message and copy its block into `buf`.
    ///
    /// The message must target `expected_index`, and the block must fit
    /// inside `buf` at the offset the peer declared. Returns the number of
    /// bytes written.
    pub fn parse_piece(&self, expected_index: u32, buf: &mut [u8]) -> Result<usize> {
        if self.id != MESSAGE_PIECE || self.payload.len() < 8 {
            return Err(anyhow!("received invalid PIECE from peer"));
        }

        let mut cursor = Cursor::new(&self.payload[0..8]);
        let index = cursor.read_u32::<BigEndian>()?;
        let begin = cursor.read_u32::<BigEndian>()? as usize;

        if index != expected_index {
            return Err(anyhow!(
                "received block for piece {} while downloading piece {}",
                index,
                expected_index
            ));
        }

        let block = &self.payload[8..];
        if begin + block.len() > buf.len() {
            return Err(anyhow!("received block outside piece bounds from peer"));
        }

        buf[begin..begin + block.len()].copy_from_slice(block);

        Ok(block.len())
    }
}

/// Read one length-prefixed frame from a stream.
///
/// Blocks until a full frame is available. A zero length prefix yields
/// [`Frame::KeepAlive`]; anything else yields the framed message.
pub fn read_frame(reader: &mut impl Read) -> Result<Frame> {
    // Read the 4-byte length prefix
    let mut len_buf = [0; 4];
    if reader.read_exact(&mut len_buf).is_err() {
        return Err(anyhow!("could not read message length from peer"));
    }
    let message_len = Cursor::new(&len_buf).read_u32::<BigEndian>()? as usize;

    if message_len == 0 {
        return Ok(Frame::KeepAlive);
    }

    // Read id and payload
    let mut message_buf: Vec<u8> = vec![0; message_len];
    if reader.read_exact(&mut message_buf).is_err() {
        return Err(anyhow!("could not read message from peer"));
    }

    let id = message_buf[0];
    let payload = message_buf[1..].to_vec();

    Ok(Frame::Message(Message::new_with_payload(id, payload)))
}
