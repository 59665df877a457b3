//! Error taxonomy shared by the archive readers, hash stack and importer.
//!
//! Application-level code (the coordinator, the CLI actions in `main.rs`)
//! works in terms of `anyhow::Result`, the way the teacher's `main.rs` does
//! for every action function. The enums here exist so the hash stack's
//! `Suppressing` wrapper can match on a specific kind instead of swallowing
//! everything opaque.

use thiserror::Error;

/// Errors raised while walking an `ar`/tar container or the gzip/xz/bzip2
/// wrappers around it.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("ar global magic not found")]
    BadMagic,
    #[error("ar member header malformed: {0}")]
    BadHeader(String),
    #[error("archive truncated")]
    Truncated,
    #[error("no data.tar.{{gz,bz2,xz}} member found")]
    NoData,
    #[error("control.tar.gz missing or not the first member")]
    MissingControl,
    #[error("duplicate control file")]
    DuplicateControl,
    #[error("unsupported compression for member {0:?}")]
    UnsupportedCompression(String),
}

/// Errors raised while decompressing or decoding file content.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("gzip magic not found")]
    BadMagic,
    #[error("deflate error: {0}")]
    Deflate(String),
    #[error("lzma error: {0}")]
    Lzma(String),
    #[error("bzip2 error: {0}")]
    Bz2(String),
    #[error("not an image")]
    NotAnImage,
    #[error("image too large")]
    TooLarge,
    #[error("image decode error: {0}")]
    Decode(String),
}

/// The importer's top-level error, covering one `.deb` stream.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("control paragraph missing required field `{0}`")]
    MissingField(String),
    #[error("control paragraph is not valid UTF-8/ASCII: {0}")]
    BadControl(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
