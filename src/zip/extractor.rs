use bytes::Bytes;
use futures::stream::{self, Stream, TryStreamExt};
use std::path::Path;
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Result, ZipError};
use crate::io::ReadAt;

use super::crc32::Crc32;
use super::parser::{CentralDirectory, CentralDirectoryInfo, ZipParser};
use super::structures::CdHeader;

/// Tuning for entry streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Largest chunk a payload stream yields.
    pub chunk_size: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
        }
    }
}

/// Random-access view of an archive.
///
/// Opening reads the EOCD record only; the central directory is fetched on
/// demand and entry payloads are streamed as byte ranges of the source.
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
    info: CentralDirectoryInfo,
    options: ReadOptions,
}

impl<R: ReadAt + 'static> ZipExtractor<R> {
    pub async fn open(reader: Arc<R>) -> Result<Self> {
        Self::open_with_options(reader, ReadOptions::default()).await
    }

    pub async fn open_with_options(reader: Arc<R>, options: ReadOptions) -> Result<Self> {
        let parser = ZipParser::new(reader);
        let info = parser.find_eocd().await?;
        Ok(Self {
            parser,
            info,
            options: ReadOptions {
                chunk_size: options.chunk_size.max(1),
            },
        })
    }

    /// What the EOCD record declares about this archive.
    pub fn info(&self) -> &CentralDirectoryInfo {
        &self.info
    }

    pub fn comment(&self) -> &str {
        &self.info.comment
    }

    /// Lazily walk the central directory.
    pub async fn central_directory(&self) -> Result<CentralDirectory> {
        self.parser.central_directory(&self.info).await
    }

    /// List all entries in the archive
    pub async fn list_files(&self) -> Result<Vec<CdHeader>> {
        self.central_directory().await?.collect()
    }

    /// Stream an entry's stored bytes.
    ///
    /// The stream owns a handle to the reader and reads at explicit offsets,
    /// so several entry streams over one source may be interleaved. Entries
    /// using another compression method are returned verbatim, still
    /// compressed.
    pub async fn entry_stream(
        &self,
        entry: &CdHeader,
    ) -> Result<impl Stream<Item = Result<Bytes>> + Send + 'static> {
        if entry.is_encrypted() {
            return Err(ZipError::Unsupported("encrypted entries"));
        }

        let start = self.parser.get_data_offset(entry).await?;
        let end = start + entry.compressed_size as u64;
        if end > self.info.archive_size {
            return Err(ZipError::Truncated {
                record: "entry data",
                needed: end as usize,
                available: self.info.archive_size as usize,
            });
        }

        debug!("Streaming `{}` from bytes {}..{}", entry.name(), start, end);

        let reader = self.parser.reader().clone();
        let chunk_size = self.options.chunk_size as u64;
        Ok(stream::try_unfold(start, move |pos| {
            read_chunk(reader.clone(), pos, end, chunk_size)
        }))
    }

    /// Copy an entry into `writer`, returning the number of bytes written.
    pub async fn extract_to_writer<W>(&self, entry: &CdHeader, writer: &mut W) -> Result<u64>
    where
        W: AsyncWrite + Unpin,
    {
        let mut stream = std::pin::pin!(self.entry_stream(entry).await?);
        let mut written = 0;
        while let Some(chunk) = stream.try_next().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;
        Ok(written)
    }

    /// Extract file data to memory
    pub async fn extract_to_memory(&self, entry: &CdHeader) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.extract_to_writer(entry, &mut buf).await?;
        Ok(buf)
    }

    /// Extract an entry to disk, creating parent directories as needed.
    ///
    /// Directory entries create the directory itself.
    pub async fn extract_to_file(&self, entry: &CdHeader, output_path: &Path) -> Result<()> {
        if entry.is_directory() {
            fs::create_dir_all(output_path).await?;
            return Ok(());
        }

        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut file = fs::File::create(output_path).await?;
        self.extract_to_writer(entry, &mut file).await?;
        Ok(())
    }

    /// Extract file to stdout
    pub async fn extract_to_stdout(&self, entry: &CdHeader) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        self.extract_to_writer(entry, &mut stdout).await?;
        Ok(())
    }

    /// Recompute an entry's CRC32 and compare it with the central directory.
    pub async fn verify_entry(&self, entry: &CdHeader) -> Result<()> {
        let mut stream = std::pin::pin!(self.entry_stream(entry).await?);
        let mut crc = Crc32::new();
        while let Some(chunk) = stream.try_next().await? {
            crc.update(&chunk);
        }

        let actual = crc.finalize();
        if actual != entry.crc32 {
            return Err(ZipError::ChecksumMismatch {
                name: entry.name().to_string(),
                expected: entry.crc32,
                actual,
            });
        }
        Ok(())
    }
}

/// Read the next chunk of `[pos, end)`, or `None` once the range is exhausted.
async fn read_chunk<R: ReadAt>(
    reader: Arc<R>,
    pos: u64,
    end: u64,
    chunk_size: u64,
) -> Result<Option<(Bytes, u64)>> {
    if pos >= end {
        return Ok(None);
    }
    let mut buf = vec![0u8; (end - pos).min(chunk_size) as usize];
    reader.read_exact_at(pos, &mut buf).await?;
    let next = pos + buf.len() as u64;
    Ok(Some((Bytes::from(buf), next)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::MemoryReader;
    use crate::zip::structures::FLAG_ENCRYPTED;
    use crate::zip::writer::{ArchiveWriter, Entry};
    use futures::StreamExt;
    use jiff::Timestamp;

    fn mtime() -> Timestamp {
        "2023-03-29T13:02:10Z".parse().unwrap()
    }

    async fn open(data: Vec<u8>, chunk_size: usize) -> ZipExtractor<MemoryReader> {
        let reader = Arc::new(MemoryReader::new(data));
        ZipExtractor::open_with_options(reader, ReadOptions { chunk_size })
            .await
            .unwrap()
    }

    async fn archive() -> Vec<u8> {
        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 253) as u8).collect();
        let mut writer = ArchiveWriter::new(Vec::new());
        for entry in [
            Entry::directory("meshes", mtime()),
            Entry::from_bytes("meshes/hull.bin", mtime(), payload),
            Entry::from_bytes("notes.txt", mtime(), "hello world\n"),
        ] {
            writer.write_entry(entry).await.unwrap();
        }
        writer.finish(Some("scene export")).await.unwrap()
    }

    #[tokio::test]
    async fn streams_in_chunks() {
        let zip = open(archive().await, 4096).await;
        let entries = zip.list_files().await.unwrap();

        let chunks: Vec<Bytes> = zip.entry_stream(&entries[1]).await.unwrap().try_collect().await.unwrap();
        let lengths: Vec<usize> = chunks.iter().map(Bytes::len).collect();
        assert_eq!(lengths, [4096, 4096, 1808]);

        let data = chunks.concat();
        assert_eq!(data.len(), 10_000);
        assert!(data.iter().enumerate().all(|(i, b)| *b == (i % 253) as u8));
    }

    #[tokio::test]
    async fn interleaved_streams() {
        let zip = open(archive().await, 3).await;
        let entries = zip.list_files().await.unwrap();

        let mut hull = Box::pin(zip.entry_stream(&entries[1]).await.unwrap());
        let mut notes = Box::pin(zip.entry_stream(&entries[2]).await.unwrap());

        let mut text = Vec::new();
        let mut hull_bytes = Vec::new();
        while let Some(chunk) = notes.next().await {
            text.extend_from_slice(&chunk.unwrap());
            hull_bytes.extend_from_slice(&hull.next().await.unwrap().unwrap());
        }
        assert_eq!(text, b"hello world\n");
        assert_eq!(hull_bytes.len(), 12);
        assert_eq!(hull_bytes, (0..12u8).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn directory_and_empty_entries_stream_nothing() {
        let zip = open(archive().await, 16).await;
        let entries = zip.list_files().await.unwrap();

        assert!(entries[0].is_directory());
        let chunks: Vec<Bytes> = zip.entry_stream(&entries[0]).await.unwrap().try_collect().await.unwrap();
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn verifies_checksums() {
        let data = archive().await;
        let zip = open(data.clone(), 1024).await;
        let entries = zip.list_files().await.unwrap();
        for entry in &entries {
            zip.verify_entry(entry).await.unwrap();
        }
        assert_eq!(zip.comment(), "scene export");

        // Flip one payload byte of notes.txt.
        let mut corrupted = data;
        let at = zip.parser.get_data_offset(&entries[2]).await.unwrap() as usize;
        corrupted[at] ^= 0xFF;

        let zip = open(corrupted, 1024).await;
        let entries = zip.list_files().await.unwrap();
        let err = zip.verify_entry(&entries[2]).await.unwrap_err();
        assert!(matches!(
            err,
            ZipError::ChecksumMismatch { expected: 0xaf08_3b2d, .. }
        ));
    }

    #[tokio::test]
    async fn refuses_encrypted_entries() {
        let zip = open(archive().await, 1024).await;
        let mut entry = zip.list_files().await.unwrap().remove(2);
        entry.header.flags |= FLAG_ENCRYPTED;
        assert!(matches!(
            zip.entry_stream(&entry).await.err(),
            Some(ZipError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn rejects_sizes_past_end_of_archive() {
        let zip = open(archive().await, 1024).await;
        let mut entry = zip.list_files().await.unwrap().remove(2);
        entry.compressed_size = u32::MAX;

        assert!(matches!(
            zip.extract_to_memory(&entry).await,
            Err(ZipError::Truncated { record: "entry data", .. })
        ));
    }

    #[tokio::test]
    async fn extracts_to_disk() {
        let zip = open(archive().await, 1024).await;
        let entries = zip.list_files().await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        for entry in &entries {
            zip.extract_to_file(entry, &dir.path().join(entry.name()))
                .await
                .unwrap();
        }

        assert!(dir.path().join("meshes").is_dir());
        assert_eq!(
            std::fs::read(dir.path().join("notes.txt")).unwrap(),
            b"hello world\n"
        );
        assert_eq!(
            std::fs::metadata(dir.path().join("meshes/hull.bin"))
                .unwrap()
                .len(),
            10_000
        );
    }
}
