//! # Download Worker
//!
//! One worker per peer, each on its own thread. A worker owns its peer
//! session end-to-end and talks to the coordinator only through two
//! channels: it pulls [`PieceWork`](crate::piece::PieceWork) items from
//! the bounded work channel and pushes verified
//! [`PieceResult`](crate::piece::PieceResult)s to the results channel.
//!
//! ## Piece pipeline
//!
//! Blocks of at most 16 KiB are requested with up to five requests in
//! flight, which caps the data outstanding on one connection at 80 KiB
//! and lets the TCP read loop back-pressure the request loop.
//!
//! ## Failure policy
//!
//! - Session setup fails: the peer is lost, the worker exits.
//! - A piece download fails (I/O, protocol, 30-second deadline): the
//!   piece goes back on the queue and the worker exits with its peer.
//! - A completed piece fails verification: the piece goes back on the
//!   queue and the session continues with the next work item.
//! - The peer lacks the piece: the piece goes back on the queue and the
//!   worker yields before pulling the next item.

use crate::client::Client;
use crate::message::*;
use crate::peer::Peer;
use crate::piece::{PieceProgress, PieceResult, PieceWork};

use anyhow::{anyhow, Result};
use crossbeam_channel::{Receiver, Sender};
use sha1::{Digest, Sha1};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

// Maximum number of unanswered block requests in the pipeline
const MAX_BACKLOG: u32 = 5;

// Largest number of bytes one REQUEST may ask for (16 KiB)
const MAX_BLOCK_SIZE: u32 = 16384;

// Socket deadline for downloading a single piece
const PIECE_TIMEOUT_SECS: u64 = 30;

/// Downloads pieces from a single peer until the work runs out.
pub struct Worker {
    /// The remote endpoint this worker is responsible for
    peer: Peer,
    /// Our 20-byte peer id
    peer_id: [u8; 20],
    /// Infohash of the file being downloaded
    info_hash: [u8; 20],
    /// Work queue: received from, and re-enqueued to, on failure
    work_chan: (Sender<PieceWork>, Receiver<PieceWork>),
    /// Verified pieces flow back to the coordinator here
    results: Sender<PieceResult>,
    /// Count of workers with a live session, for progress display
    live_workers: Arc<AtomicUsize>,
}

impl Worker {
    pub fn new(
        peer: Peer,
        peer_id: [u8; 20],
        info_hash: [u8; 20],
        work_chan: (Sender<PieceWork>, Receiver<PieceWork>),
        results: Sender<PieceResult>,
        live_workers: Arc<AtomicUsize>,
    ) -> Worker {
        Worker {
            peer,
            peer_id,
            info_hash,
            work_chan,
            results,
            live_workers,
        }
    }

    /// Run the worker until its peer dies or the work channel closes.
    pub fn run(&self) {
        let mut client = match Client::connect(self.peer.clone(), self.peer_id, self.info_hash) {
            Ok(client) => client,
            Err(e) => {
                debug!("Dropping peer {}: {}", self.peer, e);
                return;
            }
        };

        // This client chokes nobody on the leech path
        if client.send_unchoke().is_err() {
            return;
        }
        if client.send_interested().is_err() {
            return;
        }

        self.live_workers.fetch_add(1, Ordering::SeqCst);
        self.work_loop(&mut client);
        self.live_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn work_loop(&self, client: &mut Client) {
        loop {
            // The channel closing is the shutdown signal
            let work = match self.work_chan.1.recv() {
                Ok(work) => work,
                Err(_) => return,
            };

            // A peer that does not have the piece must not block it
            if !client.has_piece(work.index) {
                if self.work_chan.0.send(work).is_err() {
                    return;
                }
                thread::yield_now();
                continue;
            }

            let data = match self.download_piece(client, &work) {
                Ok(data) => data,
                Err(e) => {
                    warn!("Peer {} lost while downloading: {}", self.peer, e);
                    let _ = self.work_chan.0.send(work);
                    return;
                }
            };

            if verify_piece_integrity(&work, &data).is_err() {
                warn!("Piece {} from peer {} failed integrity check", work.index, self.peer);
                if self.work_chan.0.send(work).is_err() {
                    return;
                }
                continue;
            }

            if client.send_have(work.index).is_err() {
                error!("Could not announce piece {} to peer {}", work.index, self.peer);
            }

            if self
                .results
                .send(PieceResult::new(work.index, data))
                .is_err()
            {
                return;
            }
        }
    }

    /// Download one piece through the pipelined request loop.
    ///
    /// Keeps up to [`MAX_BACKLOG`] requests of at most [`MAX_BLOCK_SIZE`]
    /// bytes in flight while unchoked, then blocks on the next frame and
    /// dispatches it, until the whole piece has arrived.
    fn download_piece(&self, client: &mut Client, work: &PieceWork) -> Result<Vec<u8>> {
        // A 30-second deadline gets unresponsive peers unstuck
        client.set_connection_timeout(Some(PIECE_TIMEOUT_SECS))?;

        let mut progress = PieceProgress::new(work.index, work.length);
        client.assume_unchoked();

        while progress.downloaded < work.length {
            if !client.is_choked() {
                while progress.backlog < MAX_BACKLOG && progress.requested < work.length {
                    // The final block of a piece may be shorter
                    let block_size = MAX_BLOCK_SIZE.min(work.length - progress.requested);

                    client.send_request(work.index, progress.requested, block_size)?;
                    progress.backlog += 1;
                    progress.requested += block_size;
                }
            }

            match client.read_frame()? {
                Frame::KeepAlive => debug!("Receive keep-alive from peer {}", self.peer),
                Frame::Message(message) => match message.id {
                    MESSAGE_CHOKE => client.read_choke(),
                    MESSAGE_UNCHOKE => client.read_unchoke(),
                    MESSAGE_HAVE => client.read_have(message)?,
                    MESSAGE_PIECE => client.read_piece(message, &mut progress)?,
                    _ => {}
                },
            }
        }

        debug!("Downloaded piece {} from peer {}", work.index, self.peer);

        Ok(progress.buf)
    }
}

/// Compare a completed piece against its expected SHA-1 hash.
fn verify_piece_integrity(work: &PieceWork, data: &[u8]) -> Result<()> {
    let hash: [u8; 20] = Sha1::digest(data).into();

    if hash != work.hash {
        return Err(anyhow!("piece {} failed integrity check", work.index));
    }

    Ok(())
}
