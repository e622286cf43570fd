use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("storage area is not available")]
    Unavailable,
    #[error("quota exceeded while writing `{key}` ({requested} bytes requested, quota is {quota} bytes)")]
    QuotaExceeded { key: String, requested: usize, quota: usize },
    #[error("cookies are not supported")]
    CookiesUnsupported,
    #[error("malformed cookie assignment `{0}`")]
    MalformedCookie(String),
    #[error("IO error: {0:?}")]
    IO(#[from] io::Error),
    #[error("Serde error: {0:?}")]
    Serde(#[from] serde_json::Error),
    #[error("invalid filter expression: {0}")]
    InvalidFilter(#[from] regex::Error),
}
