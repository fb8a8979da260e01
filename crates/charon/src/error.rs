//! Error type shared by all file implementations.

use std::io;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A write was attempted on a container opened read-only. Carries the
    /// target virtual path, or the name of the operation when no single path
    /// is involved.
    #[error("cannot write to a container opened read-only ({0})")]
    ReadOnly(String),

    #[error("cannot read from a container opened write-only")]
    WriteOnly,

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("invalid g-code header: {0}")]
    InvalidHeader(String),

    #[error("unknown file extension: {0:?}")]
    UnknownExtension(String),

    /// A content type for an extension, or a relation for a target within an
    /// origin, already exists.
    #[error("{0}")]
    Duplicate(String),

    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// The relationships subtree is maintained by the container itself and is
    /// never writable through the stream API.
    #[error("writing to the relationships subtree is forbidden: {0}")]
    ReservedPath(String),

    #[error("png scaling failed: {0}")]
    Scaling(String),

    #[error("failed to read or write the archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("failed to parse an XML manifest: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("failed to parse an XML attribute: {0}")]
    XmlAttr(#[from] quick_xml::events::attributes::AttrError),

    #[error("failed to encode or decode JSON metadata: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}
