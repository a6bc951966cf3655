//! # Torrent Descriptors and Download Coordination
//!
//! A torrent descriptor is a JSON document describing one file: the
//! tracker announce URL, the infohash identifying the swarm, the SHA-1
//! hash of every piece, the piece length and the total length. This
//! module loads, saves and creates descriptors, discovers peers through
//! the tracker, and coordinates the download.
//!
//! ## Download coordination
//!
//! 1. **Announce** to the tracker and collect a peer list
//! 2. **Fill the work queue** with one piece per entry; its capacity
//!    equals the piece count so re-enqueues never block
//! 3. **Spawn one worker per peer**; each owns its connection end-to-end
//! 4. **Collect results** into the output buffer, piece by piece; every
//!    piece lands in a disjoint slice, so arrival order does not matter
//!
//! The collection loop is the only writer of the output buffer and the
//! only consumer of the results channel. Once the last piece is in, the
//! coordinator drops its channel handles and returns the buffer.

use crate::catalog::to_hex;
use crate::peer::Peer;
use crate::piece::{PieceResult, PieceWork};
use crate::worker::Worker;

use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use indicatif::{ProgressBar, ProgressStyle};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use sha1::{Digest, Sha1};
use url::Url;

use std::fs;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

// Port announced to the tracker
const PORT: u16 = 6881;

// Deadline for the announce round trip
const TRACKER_TIMEOUT_SECS: u64 = 15;

/// A torrent descriptor, immutable once loaded.
///
/// Serialized as JSON with PascalCase field names:
///
/// ```json
/// {"Announce": "...", "InfoHash": [..20 bytes..], "PieceHashes": [[..]],
///  "PieceLength": 262144, "Length": 1048576, "Name": "file.bin"}
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Torrent {
    /// Tracker announce URL
    pub announce: String,
    /// SHA-1 hash of the bencoded info dictionary
    pub info_hash: [u8; 20],
    /// SHA-1 hash of each piece, in piece order
    pub piece_hashes: Vec<[u8; 20]>,
    /// Length of every piece except possibly the last, in bytes
    pub piece_length: u32,
    /// Total file length in bytes
    pub length: u64,
    /// Suggested filename
    pub name: String,
}

/// The info dictionary whose bencoding is hashed into the infohash.
///
/// Field order matches the sorted-key order bencode requires.
#[derive(Serialize)]
struct BencodeInfo {
    length: u64,
    name: String,
    #[serde(rename = "piece length")]
    piece_length: u32,
    pieces: ByteBuf,
}

/// The tracker's answer to an announce.
#[derive(Deserialize)]
struct TrackerResponse {
    peers: Vec<Peer>,
}

impl Torrent {
    /// Load a descriptor from a JSON file.
    pub fn load(path: &Path) -> Result<Torrent> {
        let data = match fs::read(path) {
            Ok(data) => data,
            Err(_) => return Err(anyhow!("could not read torrent descriptor {:?}", path)),
        };

        let torrent: Torrent = match serde_json::from_slice(&data) {
            Ok(torrent) => torrent,
            Err(_) => return Err(anyhow!("could not decode torrent descriptor {:?}", path)),
        };

        torrent.validate()?;

        Ok(torrent)
    }

    /// Save the descriptor as a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_vec(self)?;
        if fs::write(path, data).is_err() {
            return Err(anyhow!("could not write torrent descriptor {:?}", path));
        }

        Ok(())
    }

    /// Create a descriptor for a local file.
    ///
    /// Hashes the file at `piece_length` granularity and computes the
    /// infohash as the SHA-1 of the bencoded info dictionary, so the
    /// identity of the swarm depends only on the file contents, its name
    /// and the piece length.
    pub fn create(source: &Path, announce: &str, piece_length: u32) -> Result<Torrent> {
        if piece_length == 0 {
            return Err(anyhow!("piece length must not be zero"));
        }
        if Url::parse(announce).is_err() {
            return Err(anyhow!("could not parse announce url"));
        }

        let name = match source.file_name() {
            Some(name) => name.to_string_lossy().into_owned(),
            None => return Err(anyhow!("could not determine file name of {:?}", source)),
        };

        let mut file = match File::open(source) {
            Ok(file) => file,
            Err(_) => return Err(anyhow!("could not open {:?}", source)),
        };
        let length = file.metadata()?.len();

        // Hash the file one piece at a time; the last piece may be short
        let nb_pieces = length.div_ceil(piece_length as u64) as usize;
        let mut piece_hashes: Vec<[u8; 20]> = Vec::with_capacity(nb_pieces);
        let mut buf = vec![0; piece_length as usize];
        for _ in 0..nb_pieces {
            let n = read_chunk(&mut file, &mut buf)?;
            piece_hashes.push(Sha1::digest(&buf[..n]).into());
        }

        // The infohash is the SHA-1 of the bencoded info dictionary
        let info = BencodeInfo {
            length,
            name: name.clone(),
            piece_length,
            pieces: ByteBuf::from(
                piece_hashes
                    .iter()
                    .flat_map(|hash| hash.iter().copied())
                    .collect::<Vec<u8>>(),
            ),
        };
        let info_hash: [u8; 20] = Sha1::digest(serde_bencode::ser::to_bytes(&info)?).into();

        Ok(Torrent {
            announce: announce.to_owned(),
            info_hash,
            piece_hashes,
            piece_length,
            length,
            name,
        })
    }

    /// The suggested filename from the descriptor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of pieces in the torrent.
    pub fn nb_pieces(&self) -> usize {
        self.piece_hashes.len()
    }

    /// Byte range `[begin, end)` the piece occupies in the file.
    pub fn piece_bounds(&self, index: u32) -> (u64, u64) {
        let begin = index as u64 * self.piece_length as u64;
        let end = (begin + self.piece_length as u64).min(self.length);
        (begin, end)
    }

    /// Length of the piece in bytes; only the last piece may be short.
    pub fn piece_size(&self, index: u32) -> u32 {
        let (begin, end) = self.piece_bounds(index);
        (end - begin) as u32
    }

    fn validate(&self) -> Result<()> {
        if self.piece_length == 0 {
            return Err(anyhow!("torrent descriptor has a zero piece length"));
        }
        if self.length.div_ceil(self.piece_length as u64) != self.piece_hashes.len() as u64 {
            return Err(anyhow!(
                "torrent descriptor declares {} pieces for {} bytes",
                self.piece_hashes.len(),
                self.length
            ));
        }

        Ok(())
    }

    /// Ask the tracker for peers.
    ///
    /// Performs one HTTP GET of the announce URL with the classical query
    /// parameters attached and a 15-second deadline. Anything but an HTTP
    /// 200 carrying the JSON peer list is an error, and tracker failure
    /// is fatal to the download.
    pub fn request_peers(&self, peer_id: &[u8; 20], port: u16) -> Result<Vec<Peer>> {
        let url = self.build_tracker_url(peer_id, port)?;

        let client = match reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(TRACKER_TIMEOUT_SECS))
            .build()
        {
            Ok(client) => client,
            Err(_) => return Err(anyhow!("could not build tracker client")),
        };

        let response = match client.get(&url).send() {
            Ok(response) => response,
            Err(_) => return Err(anyhow!("could not reach tracker {}", self.announce)),
        };
        if !response.status().is_success() {
            return Err(anyhow!("tracker returned HTTP {}", response.status()));
        }

        let body = match response.bytes() {
            Ok(body) => body,
            Err(_) => return Err(anyhow!("could not read tracker response")),
        };
        let tracker: TrackerResponse = match serde_json::from_slice(&body) {
            Ok(tracker) => tracker,
            Err(_) => return Err(anyhow!("could not decode tracker response")),
        };

        Ok(tracker.peers)
    }

    /// Build the announce URL with its query parameters.
    fn build_tracker_url(&self, peer_id: &[u8; 20], port: u16) -> Result<String> {
        /// Percent-encode every byte as %XX so binary survives the URL
        fn percent_encode_binary(data: &[u8]) -> String {
            const HEX_DIGITS: &[u8] = b"0123456789ABCDEF";
            let mut encoded = String::with_capacity(data.len() * 3);

            for &byte in data {
                encoded.push('%');
                encoded.push(HEX_DIGITS[(byte >> 4) as usize] as char);
                encoded.push(HEX_DIGITS[(byte & 0x0F) as usize] as char);
            }

            encoded
        }

        let base_url = match Url::parse(&self.announce) {
            Ok(url) => url,
            Err(_) => return Err(anyhow!("could not parse tracker url")),
        };

        // Build the query manually: the infohash and peer id are binary
        let query = format!(
            "info_hash={}&peer_id={}&port={}&uploaded=0&downloaded=0&left={}&compact=1",
            percent_encode_binary(&self.info_hash),
            percent_encode_binary(peer_id),
            port,
            self.length
        );

        let mut url = base_url.to_string();
        if url.contains('?') {
            url.push('&');
        } else {
            url.push('?');
        }
        url.push_str(&query);

        Ok(url)
    }

    /// Download the torrent: announce, then fetch from the swarm.
    ///
    /// The whole file is assembled in memory and returned.
    pub fn download(&self) -> Result<Vec<u8>> {
        // Generate a random 20-byte peer id for this download
        let mut peer_id = [0; 20];
        let mut rng = rand::thread_rng();
        for byte in peer_id.iter_mut() {
            *byte = rng.gen();
        }

        let peers = self.request_peers(&peer_id, PORT)?;
        info!(
            "Tracker returned {} peers for {}",
            peers.len(),
            to_hex(&self.info_hash)
        );

        self.download_from(peer_id, peers)
    }

    /// Download the torrent from a known list of peers.
    pub fn download_from(&self, peer_id: [u8; 20], peers: Vec<Peer>) -> Result<Vec<u8>> {
        let nb_pieces = self.nb_pieces();

        println!("Downloading {:?} ({} pieces)", self.name, nb_pieces);

        // Capacity equals the piece count so re-enqueues never block
        let work_chan: (Sender<PieceWork>, Receiver<PieceWork>) = bounded(nb_pieces);
        let result_chan: (Sender<PieceResult>, Receiver<PieceResult>) = unbounded();

        for index in 0..nb_pieces {
            let index = index as u32;
            let piece_work = PieceWork::new(
                index,
                self.piece_hashes[index as usize],
                self.piece_size(index),
            );

            if work_chan.0.send(piece_work).is_err() {
                return Err(anyhow!("could not fill the work queue"));
            }
        }

        // One worker per peer, each owning its connection end-to-end
        let live_workers = Arc::new(AtomicUsize::new(0));
        for peer in peers {
            let worker = Worker::new(
                peer,
                peer_id,
                self.info_hash,
                work_chan.clone(),
                result_chan.0.clone(),
                Arc::clone(&live_workers),
            );

            thread::spawn(move || {
                worker.run();
            });
        }

        // Workers hold the only remaining senders: if every peer is
        // lost, the channel closes and the receive below fails instead
        // of blocking forever
        drop(result_chan.0);

        let pb = ProgressBar::new(self.length);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {bytes}/{total_bytes} [{bar:40.cyan/blue}] {percent}% {msg}")
                .unwrap()
                .progress_chars("#>-"),
        );

        // Collect pieces into the output buffer; each piece writes a
        // disjoint slice, so arrival order does not matter
        let mut data: Vec<u8> = vec![0; self.length as usize];
        let mut nb_pieces_downloaded = 0;
        let mut bytes_downloaded: u64 = 0;
        let start = Instant::now();
        while nb_pieces_downloaded < nb_pieces {
            let piece_result: PieceResult = match result_chan.1.recv() {
                Ok(piece_result) => piece_result,
                Err(_) => return Err(anyhow!("could not receive piece from channel")),
            };

            let (begin, end) = self.piece_bounds(piece_result.index);
            data[begin as usize..end as usize].copy_from_slice(&piece_result.data);

            nb_pieces_downloaded += 1;
            bytes_downloaded += piece_result.data.len() as u64;

            let rate = bytes_downloaded as f64 / start.elapsed().as_secs_f64().max(0.001);
            pb.inc(piece_result.data.len() as u64);
            pb.set_message(format!(
                "piece #{} | {} peers | {:.2} MiB/s",
                piece_result.index,
                live_workers.load(Ordering::SeqCst),
                rate / (1024.0 * 1024.0)
            ));
        }
        pb.finish();

        // All pieces are in: close the work queue
        drop(work_chan);

        Ok(data)
    }
}

/// Read into `buf` until it is full or the reader hits EOF.
///
/// Returns the number of bytes read, which is short only at EOF.
pub(crate) fn read_chunk(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }

    Ok(filled)
}
