//! # Remora Command-Line Interface
//!
//! ```bash
//! remora download <torrent.json> [-o <output>]
//! remora seed [--bind <addr>] [--catalog <path>] [--torrents <dir>]
//! remora create <file> --announce <url> [--piece-length <bytes>]
//! ```
//!
//! `create` writes a torrent descriptor next to the catalog entry so the
//! file can be seeded right away; `download` fetches a descriptor's file
//! from the swarm and registers the result in the catalog on completion.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use remora::catalog::Catalog;
use remora::seeder::Seeder;
use remora::torrent::Torrent;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    version,
    about = "A peer-to-peer file transfer client speaking the BitTorrent wire protocol."
)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download the file described by a torrent descriptor
    Download {
        /// Path to the torrent descriptor
        torrent: PathBuf,

        /// Output filename (defaults to name from the descriptor)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Seed catalog to register the completed file in
        #[arg(long, default_value = "catalog.json")]
        catalog: PathBuf,
    },

    /// Serve catalog files to inbound peers
    Seed {
        /// Address to listen on
        #[arg(long, default_value = "0.0.0.0:6881")]
        bind: String,

        /// Seed catalog mapping infohashes to local files
        #[arg(long, default_value = "catalog.json")]
        catalog: PathBuf,

        /// Directory holding the companion torrent descriptors
        #[arg(long, default_value = "torrents")]
        torrents: PathBuf,
    },

    /// Create a torrent descriptor for a local file
    Create {
        /// File to describe
        file: PathBuf,

        /// Tracker announce URL
        #[arg(short, long)]
        announce: String,

        /// Piece length in bytes
        #[arg(long, default_value_t = 262_144)]
        piece_length: u32,

        /// Directory to write the descriptor into
        #[arg(long, default_value = "torrents")]
        torrents: PathBuf,

        /// Seed catalog to register the file in
        #[arg(long, default_value = "catalog.json")]
        catalog: PathBuf,
    },
}

/// Sanitize a filename to prevent path traversal and basic issues.
fn sanitize_filename(filename: &str) -> String {
    // Replace path separators with underscores to prevent directory traversal
    let safe_name = filename.replace(['/', '\\'], "_");

    if safe_name.trim().is_empty() {
        "download".to_string()
    } else {
        safe_name
    }
}

/// Register a finished file under its infohash so it can be seeded.
fn register_in_catalog(catalog_path: &Path, info_hash: &[u8; 20], file: &Path) -> Result<()> {
    let absolute = match fs::canonicalize(file) {
        Ok(absolute) => absolute,
        Err(_) => return Err(anyhow!("could not resolve path {:?}", file)),
    };

    let mut catalog = Catalog::load(catalog_path)?;
    catalog.insert(info_hash, &absolute);
    catalog.save(catalog_path)?;

    Ok(())
}

fn download(torrent_path: &Path, output: Option<PathBuf>, catalog_path: &Path) -> Result<()> {
    if !torrent_path.exists() {
        return Err(anyhow!("could not find torrent descriptor: {:?}", torrent_path));
    }

    let torrent = Torrent::load(torrent_path)?;

    // Determine output filename
    let default_filename = sanitize_filename(torrent.name());
    let output_filepath = output.unwrap_or_else(|| PathBuf::from(&default_filename));

    // Check if the output file already exists
    if output_filepath.exists() {
        println!("Output file {:?} already exists.", output_filepath);
        print!("Do you want to overwrite it? (y/N): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let input = input.trim().to_lowercase();

        if input != "y" && input != "yes" {
            println!("Download cancelled.");
            return Ok(());
        }
    }

    let data = torrent.download()?;

    if fs::write(&output_filepath, &data).is_err() {
        return Err(anyhow!("could not write data to file {:?}", output_filepath));
    }

    // The finished file is seedable from now on
    register_in_catalog(catalog_path, &torrent.info_hash, &output_filepath)?;

    println!("Saved in {:?}.", output_filepath);

    Ok(())
}

fn seed(bind: &str, catalog_path: PathBuf, torrents_dir: PathBuf) -> Result<()> {
    let catalog = Catalog::load(&catalog_path)?;
    println!("Seeding {} files from {:?}", catalog.len(), catalog_path);

    Seeder::new(catalog_path, torrents_dir).listen(bind)
}

fn create(
    file: &Path,
    announce: &str,
    piece_length: u32,
    torrents_dir: &Path,
    catalog_path: &Path,
) -> Result<()> {
    if !file.exists() {
        return Err(anyhow!("could not find file: {:?}", file));
    }

    let torrent = Torrent::create(file, announce, piece_length)?;

    if fs::create_dir_all(torrents_dir).is_err() {
        return Err(anyhow!("could not create directory {:?}", torrents_dir));
    }
    let descriptor_path = torrents_dir.join(format!("{}.json", torrent.name()));
    torrent.save(&descriptor_path)?;

    register_in_catalog(catalog_path, &torrent.info_hash, file)?;

    println!(
        "Created {:?} ({} pieces).",
        descriptor_path,
        torrent.nb_pieces()
    );

    Ok(())
}

fn run(args: Args) -> Result<()> {
    match args.command {
        Command::Download {
            torrent,
            output,
            catalog,
        } => download(&torrent, output, &catalog),
        Command::Seed {
            bind,
            catalog,
            torrents,
        } => seed(&bind, catalog, torrents),
        Command::Create {
            file,
            announce,
            piece_length,
            torrents,
            catalog,
        } => create(&file, &announce, piece_length, &torrents, &catalog),
    }
}

fn main() {
    // Initialize logger
    pretty_env_logger::init_timed();

    // Parse arguments
    let args = Args::parse();

    // Run program, eventually exit failure
    if let Err(error) = run(args) {
        eprintln!("Error: {}", error);
        std::process::exit(1);
    }

    // Exit success
    std::process::exit(0);
}
