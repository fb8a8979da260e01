//! Reading and writing of 3D-printing container files.
//!
//! Two file families are supported: ZIP-based packages following the Open
//! Packaging Convention (with the Ultimaker Format Package and Cura package
//! profiles layered on top), and plain or gzip-compressed g-code text with a
//! structured semicolon-comment header. Both are addressed through the same
//! virtual-path API: paths under `/metadata` resolve against the metadata
//! tree, everything else resolves against file resources.

mod dispatch;
pub mod error;
pub mod gcode;
pub mod metadata;
pub mod opc;
pub mod paths;
pub mod scale;

pub use self::dispatch::{
    extension_to_mime, EntryStream, EntryWriter, FileFormat, OpenMode, VirtualFile,
};
pub use self::error::{Error, Result};
pub use self::metadata::{DataMap, MetadataMap, Variant};
pub use self::opc::{OpcContainer, OpcProfile};
