//! Streaming archive writer.
//!
//! Entries are written in a single forward pass: local header, raw payload,
//! data descriptor. Only the central directory records (one small struct per
//! entry) are held in memory until the archive is finished.
//!
//! Two front ends share the same encoder:
//!
//! - [`ArchiveWriter`] pushes bytes into an [`AsyncWrite`] sink, one entry at a time.
//! - [`zip_stream`] is pull-based: it yields one output chunk per poll.

use std::fmt;
use std::io;

use bytes::{Bytes, BytesMut};
use futures::stream::{self, BoxStream, Stream, StreamExt, TryStreamExt};
use jiff::Timestamp;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, trace};

use crate::error::{Result, ZipError};

use super::crc32::Crc32;
use super::datetime;
use super::structures::{
    CdHeader, DataDescriptor, EndOfCentralDirectory, FLAG_DATA_DESCRIPTOR, FLAG_UTF8, FileHeader,
};

/// Ordered chunks of an entry's content.
pub type EntrySource = BoxStream<'static, io::Result<Bytes>>;

/// One input to the writer. Consumed exactly once.
pub struct Entry {
    pub name: String,
    pub is_directory: bool,
    pub mtime: Timestamp,
    pub source: Option<EntrySource>,
}

impl Entry {
    pub fn directory(name: impl Into<String>, mtime: Timestamp) -> Self {
        Self {
            name: name.into(),
            is_directory: true,
            mtime,
            source: None,
        }
    }

    pub fn from_stream<S>(name: impl Into<String>, mtime: Timestamp, source: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self {
            name: name.into(),
            is_directory: false,
            mtime,
            source: Some(source.boxed()),
        }
    }

    /// Content pulled from an async reader in `ReaderStream`-sized chunks.
    pub fn from_reader<R>(name: impl Into<String>, mtime: Timestamp, reader: R) -> Self
    where
        R: AsyncRead + Send + 'static,
    {
        Self::from_stream(name, mtime, ReaderStream::new(reader))
    }

    pub fn from_bytes(name: impl Into<String>, mtime: Timestamp, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let chunk = (!data.is_empty()).then_some(Ok(data));
        Self::from_stream(name, mtime, stream::iter(chunk))
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("name", &self.name)
            .field("is_directory", &self.is_directory)
            .field("mtime", &self.mtime)
            .field("source", &self.source.as_ref().map(|_| ".."))
            .finish()
    }
}

const MAX_ENTRIES: usize = u16::MAX as usize;

/// An entry whose header has been emitted but whose descriptor has not.
struct OpenEntry {
    header: FileHeader,
    is_directory: bool,
    offset: u32,
    crc: Crc32,
    size: u64,
}

/// Byte-level archive state shared by both writer front ends.
#[derive(Debug, Default)]
struct Encoder {
    /// Bytes emitted so far; the offset of whatever is emitted next.
    offset: u64,
    central_directory: Vec<CdHeader>,
}

impl Encoder {
    fn begin(
        &mut self,
        name: String,
        is_directory: bool,
        mtime: Timestamp,
        has_source: bool,
    ) -> Result<(OpenEntry, Bytes)> {
        if !is_directory && !has_source {
            return Err(ZipError::MissingSource { name });
        }
        if is_directory && has_source {
            return Err(ZipError::DirectoryWithSource { name });
        }
        if self.central_directory.len() >= MAX_ENTRIES {
            return Err(ZipError::too_large(
                "entry count",
                self.central_directory.len() as u64 + 1,
                MAX_ENTRIES as u64,
            ));
        }
        let offset = u32::try_from(self.offset)
            .map_err(|_| ZipError::too_large("local header offset", self.offset, u32::MAX))?;

        let mut name = name;
        if is_directory && !name.ends_with('/') {
            name.push('/');
        }

        let header = FileHeader::new(
            name,
            datetime::clamp(mtime),
            FLAG_DATA_DESCRIPTOR | FLAG_UTF8,
        );
        let bytes = header.to_bytes()?;
        self.offset += bytes.len() as u64;

        debug!("Writing `{}` at offset {}", header.name, offset);

        let entry = OpenEntry {
            header,
            is_directory,
            offset,
            crc: Crc32::new(),
            size: 0,
        };
        Ok((entry, bytes))
    }

    fn payload(&mut self, entry: &mut OpenEntry, chunk: &[u8]) {
        trace!("`{}`: {} byte chunk", entry.header.name, chunk.len());
        entry.crc.update(chunk);
        entry.size += chunk.len() as u64;
        self.offset += chunk.len() as u64;
    }

    fn end(&mut self, entry: OpenEntry) -> Result<Bytes> {
        let size = u32::try_from(entry.size)
            .map_err(|_| ZipError::too_large("entry size", entry.size, u32::MAX))?;
        let descriptor = DataDescriptor::stored(size, entry.crc.finalize());
        let bytes = descriptor.to_bytes();
        self.offset += bytes.len() as u64;

        debug!(
            "Finished `{}`: {} bytes, crc32 {:#010x}",
            entry.header.name, size, descriptor.crc32
        );

        self.central_directory.push(CdHeader::stored(
            entry.header,
            entry.is_directory,
            descriptor,
            entry.offset,
        ));
        Ok(bytes)
    }

    /// Serialize the central directory and the EOCD record.
    fn finish(&mut self, comment: &str) -> Result<(Bytes, Bytes)> {
        let cd_offset = u32::try_from(self.offset)
            .map_err(|_| ZipError::too_large("central directory offset", self.offset, u32::MAX))?;

        let headers = std::mem::take(&mut self.central_directory);
        let mut central_directory = BytesMut::new();
        for header in &headers {
            header.write_to(&mut central_directory)?;
        }
        let cd_size = u32::try_from(central_directory.len()).map_err(|_| {
            ZipError::too_large("central directory size", central_directory.len() as u64, u32::MAX)
        })?;

        // `begin` caps the entry count at `u16::MAX`.
        let eocd = EndOfCentralDirectory::new(headers.len() as u16, cd_size, cd_offset, comment);
        let eocd = eocd.to_bytes()?;
        self.offset += central_directory.len() as u64 + eocd.len() as u64;

        debug!(
            "Central directory: {} entries, {} bytes at offset {}",
            headers.len(),
            cd_size,
            cd_offset
        );

        Ok((central_directory.freeze(), eocd))
    }
}

/// Writes an archive into an async sink.
///
/// The writer never seeks: sizes and CRCs go into data descriptors, so any
/// sink works, including sockets and pipes.
///
/// ## Example
///
/// ```no_run
/// use stowzip::{ArchiveWriter, Entry};
///
/// # async fn run() -> stowzip::Result<()> {
/// let file = tokio::fs::File::create("scene.zip").await?;
/// let mut writer = ArchiveWriter::new(file);
/// let now = jiff::Timestamp::now();
/// writer.write_entry(Entry::directory("textures", now)).await?;
/// writer.write_entry(Entry::from_bytes("scene.gltf", now, "{}")).await?;
/// writer.finish(None).await?;
/// # Ok(())
/// # }
/// ```
pub struct ArchiveWriter<W> {
    sink: W,
    encoder: Encoder,
}

impl<W: AsyncWrite + Unpin> ArchiveWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            encoder: Encoder::default(),
        }
    }

    /// Total bytes written to the sink so far.
    pub fn bytes_written(&self) -> u64 {
        self.encoder.offset
    }

    /// Number of entries written so far.
    pub fn entry_count(&self) -> usize {
        self.encoder.central_directory.len()
    }

    /// Append one entry, pulling its content chunk by chunk.
    ///
    /// A non-directory entry without a source is rejected before anything
    /// is written.
    pub async fn write_entry(&mut self, entry: Entry) -> Result<()> {
        let Entry {
            name,
            is_directory,
            mtime,
            source,
        } = entry;

        let (mut open, header) = self
            .encoder
            .begin(name, is_directory, mtime, source.is_some())?;
        self.sink.write_all(&header).await?;

        if let Some(mut source) = source {
            while let Some(chunk) = source.try_next().await? {
                self.encoder.payload(&mut open, &chunk);
                self.sink.write_all(&chunk).await?;
            }
        }

        let descriptor = self.encoder.end(open)?;
        self.sink.write_all(&descriptor).await?;
        Ok(())
    }

    /// Write the central directory and EOCD record, then hand back the sink.
    pub async fn finish(mut self, comment: Option<&str>) -> Result<W> {
        let (central_directory, eocd) = self.encoder.finish(comment.unwrap_or_default())?;
        self.sink.write_all(&central_directory).await?;
        self.sink.write_all(&eocd).await?;
        self.sink.flush().await?;
        Ok(self.sink)
    }
}

enum State {
    Entries,
    Payload {
        entry: OpenEntry,
        source: Option<EntrySource>,
    },
    Trailer {
        eocd: Bytes,
    },
    Done,
}

struct ZipStream {
    encoder: Encoder,
    entries: BoxStream<'static, Entry>,
    comment: String,
    state: State,
}

/// Encode `entries` as a lazy stream of archive chunks.
///
/// Nothing is read from an entry source until the consumer asks for the next
/// chunk. Concatenating every chunk gives the complete archive.
pub fn zip_stream<S>(
    entries: S,
    comment: Option<String>,
) -> impl Stream<Item = Result<Bytes>> + Send + 'static
where
    S: Stream<Item = Entry> + Send + 'static,
{
    let state = ZipStream {
        encoder: Encoder::default(),
        entries: entries.boxed(),
        comment: comment.unwrap_or_default(),
        state: State::Entries,
    };
    stream::try_unfold(state, next_chunk)
}

async fn next_chunk(mut zip: ZipStream) -> Result<Option<(Bytes, ZipStream)>> {
    loop {
        match std::mem::replace(&mut zip.state, State::Done) {
            State::Entries => {
                let Some(entry) = zip.entries.next().await else {
                    let (central_directory, eocd) = zip.encoder.finish(&zip.comment)?;
                    if central_directory.is_empty() {
                        return Ok(Some((eocd, zip)));
                    }
                    zip.state = State::Trailer { eocd };
                    return Ok(Some((central_directory, zip)));
                };

                let Entry {
                    name,
                    is_directory,
                    mtime,
                    source,
                } = entry;
                let (entry, header) =
                    zip.encoder
                        .begin(name, is_directory, mtime, source.is_some())?;
                zip.state = State::Payload { entry, source };
                return Ok(Some((header, zip)));
            }
            State::Payload {
                mut entry,
                mut source,
            } => {
                if let Some(chunk) = match source.as_mut() {
                    Some(source) => source.try_next().await?,
                    None => None,
                } {
                    zip.encoder.payload(&mut entry, &chunk);
                    zip.state = State::Payload { entry, source };
                    if chunk.is_empty() {
                        continue;
                    }
                    return Ok(Some((chunk, zip)));
                }

                let descriptor = zip.encoder.end(entry)?;
                zip.state = State::Entries;
                return Ok(Some((descriptor, zip)));
            }
            State::Trailer { eocd } => return Ok(Some((eocd, zip))),
            State::Done => return Ok(None),
        }
    }
}
