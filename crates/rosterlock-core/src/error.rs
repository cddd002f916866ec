use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A key file is absent. Recoverable: the caller may generate a new pair.
    #[error("key file not found: {}", .path.display())]
    KeyNotFound { path: PathBuf },

    /// Key material exists but cannot be used (parse failure, mismatched
    /// halves, or an incomplete pair on disk).
    #[error("key material invalid: {0}")]
    InvalidKey(String),

    #[error("field encryption failed: {0}")]
    Encryption(String),

    /// Ciphertext/key mismatch or corruption. Never coerced to a default
    /// value; callers that want leniency must surface an explicit marker.
    #[error("field decryption failed: {0}")]
    Decryption(String),

    #[error("malformed audit record on line {line}: expected {expected} fields, got {got}")]
    MalformedRecord {
        line: usize,
        expected: usize,
        got: usize,
    },

    #[error("backup archive not found: {name}")]
    ArchiveNotFound { name: String },

    /// A destination stayed locked through the bounded retry loop.
    #[error("{} still locked after {attempts} attempts: {source}", .path.display())]
    LockedResource {
        path: PathBuf,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}
