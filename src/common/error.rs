use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not empty: {0}")]
    NotEmpty(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl Error {
    /// Errno reported to the kernel transport for this error.
    pub fn errno(&self) -> i32 {
        match self {
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
            Error::NotFound(_) => libc::ENOENT,
            Error::PermissionDenied(_) => libc::EPERM,
            Error::NotEmpty(_) => libc::ENOTEMPTY,
            Error::Storage(_) | Error::InvalidPath(_) | Error::Internal(_) => libc::EIO,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
