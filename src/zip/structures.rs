use byteorder::{LittleEndian, ReadBytesExt};
use bytes::{BufMut, Bytes, BytesMut};
use jiff::Timestamp;
use std::io::Cursor;

use crate::error::{Result, ZipError};

use super::datetime::DosDateTime;

/// Local File Header (LFH) - 30 bytes + name + extra
pub const LFH_SIGNATURE: u32 = 0x0403_4B50;
pub const LFH_SIZE: usize = 30;

/// Data descriptor - 16 bytes (signature included)
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4B50;
pub const DATA_DESCRIPTOR_SIZE: usize = 16;

/// Central Directory File Header (CDFH) - 46 bytes + name + extra + comment
pub const CDFH_SIGNATURE: u32 = 0x0201_4B50;
pub const CDFH_MIN_SIZE: usize = 46;

/// ZIP64 end of central directory locator - 20 bytes, directly before the EOCD
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4B50;
pub const ZIP64_LOCATOR_SIZE: usize = 20;

/// Version needed to extract: 2.0 (directories, stored entries, data descriptors).
pub const VERSION_NEEDED: u16 = 20;

/// Version made by: UNIX host, ZIP 2.0.
pub const VERSION_MADE_BY: u16 = (3 << 8) | 20;

/// General purpose flag bit 0: entry is encrypted.
pub const FLAG_ENCRYPTED: u16 = 1 << 0;
/// General purpose flag bit 3: sizes and CRC follow the payload in a data descriptor.
pub const FLAG_DATA_DESCRIPTOR: u16 = 1 << 3;
/// General purpose flag bit 11: name and comment are UTF-8.
pub const FLAG_UTF8: u16 = 1 << 11;

/// MS-DOS directory attribute bit.
pub const DOS_DIRECTORY: u16 = 0x10;

/// `drwxr-xr-x`
pub const UNIX_DIRECTORY_MODE: u16 = 0o040755;
/// `-rw-r--r--`
pub const UNIX_FILE_MODE: u16 = 0o100644;
const UNIX_TYPE_MASK: u16 = 0o170000;
const UNIX_TYPE_DIRECTORY: u16 = 0o040000;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

/// Fields shared by the local file header and the central directory header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub name: String,
    pub extra: Vec<u8>,
    pub mtime: Timestamp,
    pub flags: u16,
}

impl FileHeader {
    pub fn new(name: impl Into<String>, mtime: Timestamp, flags: u16) -> Self {
        Self {
            name: name.into(),
            extra: Vec::new(),
            mtime,
            flags,
        }
    }

    /// Serialize as a local file header.
    ///
    /// CRC and sizes are written as zero; the real values follow the payload
    /// in a data descriptor.
    pub fn to_bytes(&self) -> Result<Bytes> {
        let (name_len, extra_len) = self.variable_lengths()?;

        let mut buf = BytesMut::with_capacity(LFH_SIZE + self.name.len() + self.extra.len());
        buf.put_u32_le(LFH_SIGNATURE);
        buf.put_u16_le(VERSION_NEEDED);
        buf.put_u16_le(self.flags);
        buf.put_u16_le(CompressionMethod::Stored.as_u16());
        self.put_mtime(&mut buf);
        buf.put_u32_le(0); // crc32
        buf.put_u32_le(0); // compressed size
        buf.put_u32_le(0); // uncompressed size
        buf.put_u16_le(name_len);
        buf.put_u16_le(extra_len);
        buf.put_slice(self.name.as_bytes());
        buf.put_slice(&self.extra);

        Ok(buf.freeze())
    }

    /// Total length of a local file header, given at least its fixed 30-byte prefix.
    pub fn local_len(prefix: &[u8]) -> Result<u64> {
        if prefix.len() < LFH_SIZE {
            return Err(ZipError::Truncated {
                record: "local file header",
                needed: LFH_SIZE,
                available: prefix.len(),
            });
        }

        let mut cursor = Cursor::new(prefix);
        check_signature(&mut cursor, "local file header", LFH_SIGNATURE)?;

        cursor.set_position(26); // Offset to filename length field
        let name_len = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_len = cursor.read_u16::<LittleEndian>()? as u64;

        Ok(LFH_SIZE as u64 + name_len + extra_len)
    }

    fn variable_lengths(&self) -> Result<(u16, u16)> {
        let name_len = u16::try_from(self.name.len())
            .map_err(|_| ZipError::too_large("file name length", self.name.len() as u64, u16::MAX))?;
        let extra_len = u16::try_from(self.extra.len())
            .map_err(|_| ZipError::too_large("extra field length", self.extra.len() as u64, u16::MAX))?;
        Ok((name_len, extra_len))
    }

    fn put_mtime(&self, buf: &mut BytesMut) {
        let dos = DosDateTime::from_timestamp(self.mtime);
        buf.put_u16_le(dos.time());
        buf.put_u16_le(dos.date());
    }
}

/// Trailing record carrying the CRC and sizes of a streamed entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
}

impl DataDescriptor {
    /// Descriptor for a stored entry, where both sizes are equal.
    pub fn stored(size: u32, crc32: u32) -> Self {
        Self {
            crc32,
            compressed_size: size,
            uncompressed_size: size,
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(DATA_DESCRIPTOR_SIZE);
        buf.put_u32_le(DATA_DESCRIPTOR_SIGNATURE);
        buf.put_u32_le(self.crc32);
        buf.put_u32_le(self.compressed_size);
        buf.put_u32_le(self.uncompressed_size);
        buf.freeze()
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < DATA_DESCRIPTOR_SIZE {
            return Err(ZipError::Truncated {
                record: "data descriptor",
                needed: DATA_DESCRIPTOR_SIZE,
                available: data.len(),
            });
        }

        let mut cursor = Cursor::new(data);
        check_signature(&mut cursor, "data descriptor", DATA_DESCRIPTOR_SIGNATURE)?;

        Ok(Self {
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
        })
    }
}

/// Central directory record for one entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CdHeader {
    pub header: FileHeader,
    pub version_made_by: u16,
    pub method: CompressionMethod,
    /// Low word of the external attributes.
    pub dos_attributes: u16,
    /// High word of the external attributes: POSIX type and permission bits.
    pub unix_mode: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    /// Offset of the entry's local file header from the start of the archive.
    pub offset: u32,
    pub comment: String,
}

impl CdHeader {
    /// Record for a stored entry written by this crate.
    pub fn stored(
        header: FileHeader,
        is_directory: bool,
        descriptor: DataDescriptor,
        offset: u32,
    ) -> Self {
        let (dos_attributes, unix_mode) = if is_directory {
            (DOS_DIRECTORY, UNIX_DIRECTORY_MODE)
        } else {
            (0, UNIX_FILE_MODE)
        };

        Self {
            header,
            version_made_by: VERSION_MADE_BY,
            method: CompressionMethod::Stored,
            dos_attributes,
            unix_mode,
            crc32: descriptor.crc32,
            compressed_size: descriptor.compressed_size,
            uncompressed_size: descriptor.uncompressed_size,
            offset,
            comment: String::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.header.name
    }

    pub fn mtime(&self) -> Timestamp {
        self.header.mtime
    }

    pub fn flags(&self) -> u16 {
        self.header.flags
    }

    pub fn is_directory(&self) -> bool {
        self.header.name.ends_with('/')
            || self.dos_attributes & DOS_DIRECTORY != 0
            || self.unix_mode & UNIX_TYPE_MASK == UNIX_TYPE_DIRECTORY
    }

    pub fn is_encrypted(&self) -> bool {
        self.header.flags & FLAG_ENCRYPTED != 0
    }

    pub fn external_attributes(&self) -> u32 {
        ((self.unix_mode as u32) << 16) | self.dos_attributes as u32
    }

    /// Size of the serialized record.
    pub fn encoded_len(&self) -> usize {
        CDFH_MIN_SIZE + self.header.name.len() + self.header.extra.len() + self.comment.len()
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.write_to(&mut buf)?;
        Ok(buf.freeze())
    }

    /// Append the serialized record to `buf`.
    pub fn write_to(&self, buf: &mut BytesMut) -> Result<()> {
        let (name_len, extra_len) = self.header.variable_lengths()?;
        let comment_len = u16::try_from(self.comment.len())
            .map_err(|_| ZipError::too_large("file comment length", self.comment.len() as u64, u16::MAX))?;

        buf.reserve(self.encoded_len());
        buf.put_u32_le(CDFH_SIGNATURE);
        buf.put_u16_le(self.version_made_by);
        buf.put_u16_le(VERSION_NEEDED);
        buf.put_u16_le(self.header.flags);
        buf.put_u16_le(self.method.as_u16());
        self.header.put_mtime(buf);
        buf.put_u32_le(self.crc32);
        buf.put_u32_le(self.compressed_size);
        buf.put_u32_le(self.uncompressed_size);
        buf.put_u16_le(name_len);
        buf.put_u16_le(extra_len);
        buf.put_u16_le(comment_len);
        buf.put_u16_le(0); // disk number start
        buf.put_u16_le(0); // internal attributes
        buf.put_u32_le(self.external_attributes());
        buf.put_u32_le(self.offset);
        buf.put_slice(self.header.name.as_bytes());
        buf.put_slice(&self.header.extra);
        buf.put_slice(self.comment.as_bytes());

        Ok(())
    }

    /// Parse the record starting at `offset` in `data`.
    ///
    /// Returns the record and the number of bytes it occupies, so the caller
    /// can step to the next one.
    pub fn parse(data: &[u8], offset: usize) -> Result<(Self, usize)> {
        let available = data.len().saturating_sub(offset);
        if available < CDFH_MIN_SIZE {
            return Err(ZipError::Truncated {
                record: "central directory header",
                needed: CDFH_MIN_SIZE,
                available,
            });
        }

        let record = &data[offset..];
        let mut cursor = Cursor::new(record);
        check_signature(&mut cursor, "central directory header", CDFH_SIGNATURE)?;

        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let _version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let method = cursor.read_u16::<LittleEndian>()?;
        let time = cursor.read_u16::<LittleEndian>()?;
        let date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()?;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()?;
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let extra_len = cursor.read_u16::<LittleEndian>()? as usize;
        let comment_len = cursor.read_u16::<LittleEndian>()? as usize;
        let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let external_attrs = cursor.read_u32::<LittleEndian>()?;
        let local_offset = cursor.read_u32::<LittleEndian>()?;

        let consumed = CDFH_MIN_SIZE + name_len + extra_len + comment_len;
        if consumed > available {
            return Err(ZipError::Truncated {
                record: "central directory header",
                needed: consumed,
                available,
            });
        }

        let name_end = CDFH_MIN_SIZE + name_len;
        let extra_end = name_end + extra_len;
        let name = String::from_utf8_lossy(&record[CDFH_MIN_SIZE..name_end]).into_owned();
        let extra = record[name_end..extra_end].to_vec();
        let comment = String::from_utf8_lossy(&record[extra_end..consumed]).into_owned();

        let mtime = DosDateTime::from_packed(((date as u32) << 16) | time as u32).to_timestamp();

        let header = Self {
            header: FileHeader {
                name,
                extra,
                mtime,
                flags,
            },
            version_made_by,
            method: CompressionMethod::from_u16(method),
            dos_attributes: external_attrs as u16,
            unix_mode: (external_attrs >> 16) as u16,
            crc32,
            compressed_size,
            uncompressed_size,
            offset: local_offset,
            comment,
        };

        Ok((header, consumed))
    }
}

/// End of Central Directory (EOCD) - 22 bytes + comment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: String,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: u32 = 0x0605_4B50;
    pub const SIZE: usize = 22;

    /// Record for a single-disk archive; both entry counts are equal.
    pub fn new(entries: u16, cd_size: u32, cd_offset: u32, comment: impl Into<String>) -> Self {
        Self {
            disk_number: 0,
            disk_with_cd: 0,
            disk_entries: entries,
            total_entries: entries,
            cd_size,
            cd_offset,
            comment: comment.into(),
        }
    }

    /// Parse the fixed record plus as much of the comment as `data` holds.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::SIZE {
            return Err(ZipError::Truncated {
                record: "end of central directory",
                needed: Self::SIZE,
                available: data.len(),
            });
        }

        let mut cursor = Cursor::new(data);
        check_signature(&mut cursor, "end of central directory", Self::SIGNATURE)?;

        let disk_number = cursor.read_u16::<LittleEndian>()?;
        let disk_with_cd = cursor.read_u16::<LittleEndian>()?;
        let disk_entries = cursor.read_u16::<LittleEndian>()?;
        let total_entries = cursor.read_u16::<LittleEndian>()?;
        let cd_size = cursor.read_u32::<LittleEndian>()?;
        let cd_offset = cursor.read_u32::<LittleEndian>()?;
        let comment_len = cursor.read_u16::<LittleEndian>()? as usize;

        let comment_end = (Self::SIZE + comment_len).min(data.len());
        let comment = String::from_utf8_lossy(&data[Self::SIZE..comment_end]).into_owned();

        Ok(Self {
            disk_number,
            disk_with_cd,
            disk_entries,
            total_entries,
            cd_size,
            cd_offset,
            comment,
        })
    }

    pub fn to_bytes(&self) -> Result<Bytes> {
        let comment_len = u16::try_from(self.comment.len())
            .map_err(|_| ZipError::too_large("archive comment length", self.comment.len() as u64, u16::MAX))?;

        let mut buf = BytesMut::with_capacity(Self::SIZE + self.comment.len());
        buf.put_u32_le(Self::SIGNATURE);
        buf.put_u16_le(self.disk_number);
        buf.put_u16_le(self.disk_with_cd);
        buf.put_u16_le(self.disk_entries);
        buf.put_u16_le(self.total_entries);
        buf.put_u32_le(self.cd_size);
        buf.put_u32_le(self.cd_offset);
        buf.put_u16_le(comment_len);
        buf.put_slice(self.comment.as_bytes());
        Ok(buf.freeze())
    }

    /// Whether any field holds its all-ones value.
    ///
    /// These are legal ZIP32 values on their own (65535 entries is a valid
    /// archive); they only mean ZIP64 when a ZIP64 locator precedes the record.
    pub fn has_zip64_sentinels(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }

    pub fn is_multi_disk(&self) -> bool {
        self.disk_number != 0 || self.disk_with_cd != 0 || self.disk_entries != self.total_entries
    }
}

fn check_signature(cursor: &mut Cursor<&[u8]>, record: &'static str, expected: u32) -> Result<()> {
    let found = cursor.read_u32::<LittleEndian>()?;
    if found != expected {
        return Err(ZipError::InvalidSignature {
            record,
            expected,
            found,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mtime() -> Timestamp {
        "2023-03-29T13:02:10Z".parse().unwrap()
    }

    fn sample_cd_header(name: &str) -> CdHeader {
        CdHeader::stored(
            FileHeader::new(name, mtime(), FLAG_DATA_DESCRIPTOR | FLAG_UTF8),
            false,
            DataDescriptor::stored(12, 0xaf08_3b2d),
            1234,
        )
    }

    #[test]
    fn local_header_layout() {
        let header = FileHeader::new("scene.glb", mtime(), FLAG_DATA_DESCRIPTOR | FLAG_UTF8);
        let bytes = header.to_bytes().unwrap();

        assert_eq!(bytes.len(), LFH_SIZE + "scene.glb".len());
        assert_eq!(&bytes[0..4], b"PK\x03\x04");
        assert_eq!(&bytes[4..6], &20u16.to_le_bytes());
        assert_eq!(&bytes[6..8], &0x0808u16.to_le_bytes());
        assert_eq!(&bytes[8..10], &[0, 0]);
        assert_eq!(&bytes[10..14], &1_451_059_269u32.to_le_bytes());
        assert_eq!(&bytes[14..26], &[0u8; 12]);
        assert_eq!(&bytes[26..28], &9u16.to_le_bytes());
        assert_eq!(&bytes[28..30], &[0, 0]);
        assert_eq!(&bytes[30..], b"scene.glb");

        assert_eq!(FileHeader::local_len(&bytes).unwrap(), bytes.len() as u64);
    }

    #[test]
    fn local_header_rejects_bad_signature() {
        let mut bytes = FileHeader::new("a", mtime(), 0).to_bytes().unwrap().to_vec();
        bytes[0] = b'X';
        assert!(matches!(
            FileHeader::local_len(&bytes),
            Err(ZipError::InvalidSignature { record: "local file header", .. })
        ));
    }

    #[test]
    fn data_descriptor_layout() {
        let bytes = DataDescriptor::stored(12, 0xaf08_3b2d).to_bytes();
        assert_eq!(bytes.len(), DATA_DESCRIPTOR_SIZE);
        assert_eq!(&bytes[0..4], b"PK\x07\x08");
        assert_eq!(
            DataDescriptor::from_bytes(&bytes).unwrap(),
            DataDescriptor {
                crc32: 0xaf08_3b2d,
                compressed_size: 12,
                uncompressed_size: 12,
            }
        );
    }

    #[test]
    fn cd_header_layout() {
        let header = sample_cd_header("a.txt");
        let bytes = header.to_bytes().unwrap();

        assert_eq!(bytes.len(), CDFH_MIN_SIZE + 5);
        assert_eq!(&bytes[0..4], b"PK\x01\x02");
        assert_eq!(&bytes[4..6], &0x0314u16.to_le_bytes());
        assert_eq!(&bytes[16..20], &0xaf08_3b2du32.to_le_bytes());
        assert_eq!(&bytes[38..42], &((0o100644u32) << 16).to_le_bytes());
        assert_eq!(&bytes[42..46], &1234u32.to_le_bytes());
    }

    #[test]
    fn cd_header_parse_reports_consumed_length() {
        let first = sample_cd_header("models/ünïcödé-模型.glb");
        let mut second = sample_cd_header("textures/");
        second.dos_attributes = DOS_DIRECTORY;
        second.unix_mode = UNIX_DIRECTORY_MODE;
        second.comment = "note".to_string();

        let mut buf = BytesMut::new();
        first.write_to(&mut buf).unwrap();
        second.write_to(&mut buf).unwrap();

        let (parsed, used) = CdHeader::parse(&buf, 0).unwrap();
        assert_eq!(parsed, first);
        assert_eq!(used, first.encoded_len());
        assert!(!parsed.is_directory());

        let (parsed, used) = CdHeader::parse(&buf, used).unwrap();
        assert_eq!(parsed, second);
        assert_eq!(used, second.encoded_len());
        assert!(parsed.is_directory());
    }

    #[test]
    fn cd_header_parse_rejects_overlong_lengths() {
        let bytes = sample_cd_header("a.txt").to_bytes().unwrap();
        let err = CdHeader::parse(&bytes[..bytes.len() - 1], 0).unwrap_err();
        assert!(matches!(
            err,
            ZipError::Truncated {
                needed: 51,
                available: 50,
                ..
            }
        ));

        let err = CdHeader::parse(&bytes, 10).unwrap_err();
        assert!(matches!(err, ZipError::Truncated { .. }));
    }

    #[test]
    fn cd_header_parse_rejects_bad_signature() {
        let mut bytes = sample_cd_header("a.txt").to_bytes().unwrap().to_vec();
        bytes[2] = 0x03;
        assert!(matches!(
            CdHeader::parse(&bytes, 0),
            Err(ZipError::InvalidSignature { expected: CDFH_SIGNATURE, .. })
        ));
    }

    #[test]
    fn name_too_long() {
        let header = FileHeader::new("x".repeat(70_000), mtime(), 0);
        assert!(matches!(header.to_bytes(), Err(ZipError::TooLarge { .. })));
    }

    #[test]
    fn eocd_layout() {
        let eocd = EndOfCentralDirectory::new(3, 150, 4096, "exported scene");
        let bytes = eocd.to_bytes().unwrap();
        assert_eq!(bytes.len(), EndOfCentralDirectory::SIZE + 14);
        assert_eq!(&bytes[8..10], &bytes[10..12]);

        let parsed = EndOfCentralDirectory::from_bytes(&bytes).unwrap();
        assert_eq!(parsed, eocd);
        assert!(!parsed.has_zip64_sentinels());
        assert!(!parsed.is_multi_disk());
    }

    #[test]
    fn eocd_sentinels() {
        let mut eocd = EndOfCentralDirectory::new(1, 46, 0, "");
        eocd.cd_offset = 0xFFFF_FFFF;
        assert!(eocd.has_zip64_sentinels());

        let eocd = EndOfCentralDirectory::new(u16::MAX, 46, 0, "");
        assert!(eocd.has_zip64_sentinels());
        assert!(!eocd.is_multi_disk());

        let mut eocd = EndOfCentralDirectory::new(1, 46, 0, "");
        eocd.disk_number = 1;
        assert!(eocd.is_multi_disk());
    }
}
