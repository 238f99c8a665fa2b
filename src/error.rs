//! Error types shared by the writer and the reader.

/// Errors produced while writing or reading an archive.
#[derive(Debug, thiserror::Error)]
pub enum ZipError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Not a supported ZIP archive: no end of central directory record found")]
    NoEocd,

    #[error("Invalid {record} signature: expected {expected:#010x}, found {found:#010x}")]
    InvalidSignature {
        record: &'static str,
        expected: u32,
        found: u32,
    },

    #[error("Truncated {record}: needs {needed} bytes but only {available} are available")]
    Truncated {
        record: &'static str,
        needed: usize,
        available: usize,
    },

    #[error("Entry `{name}` is not a directory but has no content source")]
    MissingSource { name: String },

    #[error("Directory entry `{name}` cannot carry content")]
    DirectoryWithSource { name: String },

    #[error("{field} of {value} exceeds the ZIP limit of {limit}")]
    TooLarge {
        field: &'static str,
        value: u64,
        limit: u64,
    },

    #[error("Unsupported archive feature: {0}")]
    Unsupported(&'static str),

    #[error("CRC32 mismatch for `{name}`: expected {expected:#010x}, computed {actual:#010x}")]
    ChecksumMismatch {
        name: String,
        expected: u32,
        actual: u32,
    },
}

impl ZipError {
    /// Returns `true` if the input was rejected as not being a ZIP archive at all.
    pub fn is_not_an_archive(&self) -> bool {
        matches!(self, Self::NoEocd)
    }

    pub(crate) fn too_large(field: &'static str, value: impl Into<u64>, limit: impl Into<u64>) -> Self {
        Self::TooLarge {
            field,
            value: value.into(),
            limit: limit.into(),
        }
    }
}

pub type Result<T, E = ZipError> = std::result::Result<T, E>;
