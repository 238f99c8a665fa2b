//! ZIP archive writing, parsing and extraction.
//!
//! This module packages named byte streams into a store-only ZIP archive in
//! a single forward pass, and reads such archives back with random access.
//!
//! ## Architecture
//!
//! - [`crc32`]: incremental CRC-32 with a compile-time lookup table
//! - [`datetime`]: MS-DOS packed timestamps
//! - [`structures`]: byte layouts of the ZIP records, with builders and parsers
//! - [`writer`]: streaming writer ([`ArchiveWriter`], [`zip_stream`])
//! - [`parser`]: EOCD locator and central directory walker
//! - [`extractor`]: high-level reading API for end users
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers, raw data and data descriptors for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! The writer cannot seek back, so every local header has the "data
//! descriptor" flag set and zeroed CRC/size fields; the real values follow
//! the payload. The reader starts from the EOCD, then the Central Directory,
//! which allows listing files without reading the entire archive.
//!
//! ## Limitations
//!
//! - Entries are always stored; other methods are read back verbatim
//! - No encryption, ZIP64 or multi-disk support (rejected on read)

pub mod crc32;
pub mod datetime;
mod extractor;
mod parser;
pub mod structures;
mod writer;

pub use extractor::{ReadOptions, ZipExtractor};
pub use parser::{CentralDirectory, CentralDirectoryInfo, ZipParser};
pub use structures::{CdHeader, CompressionMethod, DataDescriptor, EndOfCentralDirectory, FileHeader};
pub use writer::{ArchiveWriter, Entry, EntrySource, zip_stream};
