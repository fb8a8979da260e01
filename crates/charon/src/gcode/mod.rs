//! G-code toolpath files: plain text, gzip-compressed, or served over a
//! stream socket. All variants share the header parser; the file
//! implementation itself is read-only.

mod header;
mod lines;
mod socket;

pub use self::header::{parse_header, MAX_HEADER_LINES};
pub use self::lines::{LineRead, LineReader, PlainLines, SeekableLines};
pub use self::socket::{SocketLineStream, GCODE_SOCKET_PORT};

use crate::dispatch::EntryStream;
use crate::error::{Error, Result};
use crate::metadata::{DataMap, MetadataMap};
use crate::paths::{ensure_leading_slash, METADATA_PREFIX};

/// Header metadata of a standalone g-code file lives under this prefix.
pub const TOOLPATH_METADATA_PREFIX: &str = "/toolpath/default/";

/// A read-only g-code file: the parsed header metadata plus the remaining
/// toolpath body.
#[derive(Debug)]
pub struct GCodeFile<L: LineRead> {
    stream: L,
    metadata: MetadataMap,
}

impl<L: LineRead> GCodeFile<L> {
    /// Parses the header and validates its dialect. Seekable streams are
    /// rewound, so the body starts at the first line again; forward-only
    /// streams continue after the header.
    pub fn open_stream(mut stream: L) -> Result<Self> {
        let metadata = header::parse_header(&mut stream, TOOLPATH_METADATA_PREFIX)?;
        Ok(GCodeFile { stream, metadata })
    }

    pub fn get_data(&mut self, virtual_path: &str) -> Result<DataMap> {
        match virtual_path.strip_prefix(METADATA_PREFIX) {
            Some(stripped) => self.get_metadata(stripped),
            None => Ok(DataMap::new()),
        }
    }

    pub fn set_data(&mut self, data: DataMap) -> Result<()> {
        let path = data.keys().next().cloned().unwrap_or_default();
        Err(Error::ReadOnly(path))
    }

    /// Returns header entries exactly matching the path plus everything
    /// beneath it, keyed with the `/metadata` prefix.
    pub fn get_metadata(&self, virtual_path: &str) -> Result<MetadataMap> {
        let canonical = ensure_leading_slash(virtual_path);

        let mut result = MetadataMap::new();
        if let Some(value) = self.metadata.get(&canonical) {
            result.insert(
                format!("{}{}", METADATA_PREFIX, virtual_path),
                value.clone(),
            );
        }
        let child_prefix = format!("{}/", canonical);
        for (key, value) in &self.metadata {
            if let Some(suffix) = key.strip_prefix(child_prefix.as_str()) {
                result.insert(
                    format!("{}{}/{}", METADATA_PREFIX, virtual_path, suffix),
                    value.clone(),
                );
            }
        }
        Ok(result)
    }

    pub fn set_metadata(&mut self, _metadata: MetadataMap) -> Result<()> {
        Err(Error::ReadOnly("set_metadata".to_string()))
    }

    /// Returns the remaining toolpath body as a byte stream, regardless of
    /// the requested path.
    pub fn get_stream(&mut self, _virtual_path: &str) -> Result<EntryStream<'_>> {
        Ok(EntryStream::Reader(Box::new(LineReader::new(
            &mut self.stream,
        ))))
    }

    pub fn list_paths(&self) -> Vec<String> {
        self.metadata.keys().cloned().collect()
    }

    pub fn close(self) -> Result<()> {
        Ok(())
    }
}
