//! # Remora
//!
//! A peer-to-peer file-transfer client speaking the BitTorrent wire
//! protocol. Remora downloads a file described by a torrent descriptor
//! from a swarm of peers, verifying every piece, and seeds the files it
//! possesses to inbound peers.
//!
//! ## Architecture
//!
//! - **Coordinator** ([`torrent`]): announces to the tracker, fills a
//!   work queue with one entry per piece, and assembles verified pieces
//!   into the output buffer
//! - **Workers** ([`worker`]): one thread per peer, each owning its TCP
//!   connection end-to-end and pipelining block requests
//! - **Seeder** ([`seeder`]): accepts inbound connections, matches the
//!   infohash against the local [`catalog`], and serves blocks
//!
//! The coordinator and the workers communicate only through channels:
//! piece work in, verified pieces out. Failed pieces are re-queued, so
//! any peer can pick up where another one gave up.

#[macro_use]
extern crate log;

pub mod bitfield;
pub mod catalog;
pub mod client;
pub mod handshake;
pub mod message;
pub mod peer;
pub mod piece;
pub mod seeder;
pub mod torrent;
pub mod worker;
