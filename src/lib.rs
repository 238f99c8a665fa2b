//! # stowzip
//!
//! A streaming ZIP writer and random-access ZIP reader for packaging
//! collections of already-compressed assets.
//!
//! The writer consumes an ordered sequence of named byte streams and emits
//! a valid archive without ever holding a whole file in memory: each entry
//! is written as local header, raw payload and data descriptor, and only a
//! small central directory record per entry is kept until the archive is
//! finished. The reader locates the central directory from the archive's
//! tail and exposes every entry as a lazy byte-range stream.
//!
//! ## Features
//!
//! - Single-pass writing to any async sink, or as a pull-based chunk stream
//! - Random access reading from local files, memory and HTTP URLs (Range requests)
//! - UTF-8 file names, DOS timestamps, POSIX permission bits
//! - Explicit CRC32 verification of extracted entries
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stowzip::{ArchiveWriter, Entry, MemoryReader, ZipExtractor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let now = jiff::Timestamp::now();
//!
//!     let mut writer = ArchiveWriter::new(Vec::new());
//!     writer.write_entry(Entry::from_bytes("scene.gltf", now, "{}")).await?;
//!     let archive = writer.finish(None).await?;
//!
//!     let extractor = ZipExtractor::open(Arc::new(MemoryReader::new(archive))).await?;
//!     for entry in extractor.list_files().await? {
//!         println!("{} ({} bytes)", entry.name(), entry.uncompressed_size);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod error;
pub mod io;
pub mod logging;
pub mod zip;

pub use cli::Cli;
pub use error::{Result, ZipError};
pub use io::{HttpRangeReader, LocalFileReader, MemoryReader, ReadAt};
pub use zip::{ArchiveWriter, CdHeader, Entry, ReadOptions, ZipExtractor, zip_stream};
