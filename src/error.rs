use std::path::PathBuf;
use thiserror::Error;

pub type VcxResult<T> = std::result::Result<T, VcxError>;

/// Header errors cover structurally invalid metadata (bad column order,
/// missing required declaration keys, unparsable CSQ format clause). Parse
/// errors cover record-level problems and always propagate to the caller
/// that triggered the failing access.
#[derive(Debug, Error)]
pub enum VcxError {
    #[error("header error: {0}")]
    Header(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("Invalid gzip header: {}", path.display())]
    InvalidGzipHeader { path: PathBuf },
}

impl VcxError {
    pub fn header(message: impl Into<String>) -> Self {
        Self::Header(message.into())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }
}

#[macro_export]
macro_rules! vcx_header_error {
    ($($arg:tt)*) => {
        $crate::error::VcxError::header(format!($($arg)*))
    };
}

#[macro_export]
macro_rules! vcx_parse_error {
    ($($arg:tt)*) => {
        $crate::error::VcxError::parse(format!($($arg)*))
    };
}
