//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. Read the Central Directory to get metadata for all files
//! 3. For extraction, read each file's Local File Header to find its data
//!
//! This approach is efficient for HTTP Range requests, as we only
//! need to fetch the file's tail to list contents.

use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{Result, ZipError};
use crate::io::ReadAt;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Where the central directory lives, as declared by the EOCD record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CentralDirectoryInfo {
    pub entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    /// Size of the whole archive in bytes.
    pub archive_size: u64,
    /// Offset of the EOCD record itself.
    pub eocd_offset: u64,
    pub comment: String,
}

/// Low-level ZIP file parser.
///
/// This struct handles reading and parsing ZIP structures from
/// a data source. It's generic over the reader type to support
/// local files, in-memory buffers and HTTP sources.
///
/// ## Usage
///
/// Typically used through [`ZipExtractor`](super::ZipExtractor)
/// rather than directly.
///
/// ## Example
///
/// ```ignore
/// let parser = ZipParser::new(reader);
/// let info = parser.find_eocd().await?;
/// for header in parser.central_directory(&info).await? {
///     let header = header?;
///     let offset = parser.get_data_offset(&header).await?;
///     // Read file data from offset...
/// }
/// ```
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Reads only the archive's tail: first the bare 22-byte record for the
    /// common no-comment case, then at most `65535 + 22` bytes, scanning
    /// backwards for a signature whose declared comment length reaches
    /// exactly to the end of the file.
    ///
    /// # Errors
    ///
    /// [`ZipError::NoEocd`] if no consistent record exists in that window,
    /// and [`ZipError::Unsupported`] for ZIP64 or multi-disk archives.
    pub async fn find_eocd(&self) -> Result<CentralDirectoryInfo> {
        let eocd_size = EndOfCentralDirectory::SIZE as u64;
        if self.size < eocd_size {
            return Err(ZipError::NoEocd);
        }

        // Optimization: First try the simple case where there's no comment.
        // This avoids reading extra data in the common case.
        let offset = self.size - eocd_size;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf).await?;
        if let Some(eocd) = Self::candidate(&buf, 0) {
            return self.located(eocd, offset).await;
        }

        // EOCD not at expected location - search for it.
        // The EOCD could be earlier if there's a ZIP comment.
        let search_size = (MAX_COMMENT_SIZE + eocd_size).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf).await?;

        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if let Some(eocd) = Self::candidate(&buf, i) {
                return self.located(eocd, search_start + i as u64).await;
            }
        }

        Err(ZipError::NoEocd)
    }

    /// Parse an EOCD at `buf[i..]` if its signature matches and its comment
    /// runs exactly to the end of `buf` (which always ends at end of file).
    fn candidate(buf: &[u8], i: usize) -> Option<EndOfCentralDirectory> {
        let record = &buf[i..];
        if record.len() < EndOfCentralDirectory::SIZE
            || record[0..4] != EndOfCentralDirectory::SIGNATURE.to_le_bytes()
        {
            return None;
        }

        let comment_len = u16::from_le_bytes([record[20], record[21]]) as usize;
        if comment_len != record.len() - EndOfCentralDirectory::SIZE {
            return None;
        }

        EndOfCentralDirectory::from_bytes(record).ok()
    }

    async fn located(
        &self,
        eocd: EndOfCentralDirectory,
        eocd_offset: u64,
    ) -> Result<CentralDirectoryInfo> {
        if eocd.has_zip64_sentinels() && self.has_zip64_locator(eocd_offset).await? {
            return Err(ZipError::Unsupported("ZIP64 archives"));
        }
        if eocd.is_multi_disk() {
            return Err(ZipError::Unsupported("multi-disk archives"));
        }

        let cd_end = eocd.cd_offset as u64 + eocd.cd_size as u64;
        if cd_end > eocd_offset {
            return Err(ZipError::Truncated {
                record: "central directory",
                needed: cd_end as usize,
                available: eocd_offset as usize,
            });
        }

        debug!(
            "Found EOCD at offset {}: {} entries, central directory {} bytes at offset {}",
            eocd_offset, eocd.total_entries, eocd.cd_size, eocd.cd_offset
        );

        Ok(CentralDirectoryInfo {
            entries: eocd.total_entries,
            cd_size: eocd.cd_size,
            cd_offset: eocd.cd_offset,
            archive_size: self.size,
            eocd_offset,
            comment: eocd.comment,
        })
    }

    /// Whether a ZIP64 end of central directory locator sits directly before
    /// the EOCD record at `eocd_offset`.
    async fn has_zip64_locator(&self, eocd_offset: u64) -> Result<bool> {
        let Some(locator_offset) = eocd_offset.checked_sub(ZIP64_LOCATOR_SIZE as u64) else {
            return Ok(false);
        };
        let mut signature = [0u8; 4];
        self.reader
            .read_exact_at(locator_offset, &mut signature)
            .await?;
        Ok(u32::from_le_bytes(signature) == ZIP64_LOCATOR_SIGNATURE)
    }

    /// Read the whole central directory in one request and walk it lazily.
    pub async fn central_directory(&self, info: &CentralDirectoryInfo) -> Result<CentralDirectory> {
        // Read the entire Central Directory in one request
        // (efficient for HTTP as it's a single Range request)
        let mut cd_data = vec![0u8; info.cd_size as usize];
        self.reader
            .read_exact_at(info.cd_offset as u64, &mut cd_data)
            .await?;

        Ok(CentralDirectory::new(Bytes::from(cd_data), info.entries))
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header (LFH) has variable-length fields (filename,
    /// extra field) that may differ from the Central Directory entry.
    /// This method reads the LFH to calculate where the actual file
    /// data begins.
    pub async fn get_data_offset(&self, entry: &CdHeader) -> Result<u64> {
        let mut lfh_buf = [0u8; LFH_SIZE];
        self.reader
            .read_exact_at(entry.offset as u64, &mut lfh_buf)
            .await?;

        Ok(entry.offset as u64 + FileHeader::local_len(&lfh_buf)?)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }
}

/// Single-pass iterator over the records of a central directory buffer.
///
/// Stops once the buffer is consumed. After the first error it yields
/// nothing further.
#[derive(Debug)]
pub struct CentralDirectory {
    data: Bytes,
    pos: usize,
    declared_entries: u16,
    parsed: usize,
}

impl CentralDirectory {
    pub fn new(data: Bytes, declared_entries: u16) -> Self {
        Self {
            data,
            pos: 0,
            declared_entries,
            parsed: 0,
        }
    }

    /// Entry count declared by the EOCD record.
    pub fn declared_entries(&self) -> u16 {
        self.declared_entries
    }
}

impl Iterator for CentralDirectory {
    type Item = Result<CdHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.data.len() {
            return None;
        }

        match CdHeader::parse(&self.data, self.pos) {
            Ok((header, used)) => {
                self.pos += used;
                self.parsed += 1;
                if self.pos == self.data.len() && self.parsed != self.declared_entries as usize {
                    warn!(
                        "Central directory holds {} entries but the EOCD declares {}",
                        self.parsed, self.declared_entries
                    );
                }
                Some(Ok(header))
            }
            Err(err) => {
                self.pos = self.data.len();
                Some(Err(err))
            }
        }
    }
}
