//! Maps file extensions and MIME types onto concrete file implementations,
//! and defines the operation set they all share.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Write};

use flate2::read::GzDecoder;

use crate::error::{Error, Result};
use crate::gcode::{GCodeFile, PlainLines, SeekableLines, SocketLineStream};
use crate::metadata::{DataMap, MetadataMap};
use crate::opc::{OpcContainer, OpcProfile};

/// Whether a container accepts reads or writes. Mutation is only possible
/// between open and close, and never both ways on the same container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    WriteOnly,
}

/// An open entry stream, in the mode of the container that produced it.
pub enum EntryStream<'a> {
    Reader(Box<dyn Read + 'a>),
    Writer(EntryWriter<'a>),
}

impl<'a> EntryStream<'a> {
    /// Consumes a read stream into a byte vector. Fails on write streams.
    pub fn read_all(self) -> Result<Vec<u8>> {
        match self {
            EntryStream::Reader(mut reader) => {
                let mut bytes = Vec::new();
                reader.read_to_end(&mut bytes)?;
                Ok(bytes)
            }
            EntryStream::Writer(_) => Err(Error::WriteOnly),
        }
    }
}

/// The single writable entry stream of a container. Bytes are buffered and
/// committed to the archive when the next entry opens, or on flush.
pub struct EntryWriter<'a> {
    buffer: &'a mut Vec<u8>,
}

impl<'a> EntryWriter<'a> {
    pub(crate) fn new(buffer: &'a mut Vec<u8>) -> Self {
        EntryWriter { buffer }
    }
}

impl Write for EntryWriter<'_> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(bytes);
        Ok(bytes.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// The fixed operation set every file implementation exposes. Data and
/// metadata are addressed by virtual path; reads fail on write-only
/// containers and vice versa.
pub trait FileFormat {
    fn get_data(&mut self, virtual_path: &str) -> Result<DataMap>;
    fn set_data(&mut self, data: DataMap) -> Result<()>;
    fn get_metadata(&mut self, virtual_path: &str) -> Result<MetadataMap>;
    fn set_metadata(&mut self, metadata: MetadataMap) -> Result<()>;
    fn get_stream(&mut self, virtual_path: &str) -> Result<EntryStream<'_>>;
    fn list_paths(&mut self) -> Result<Vec<String>>;
    fn to_byte_array(&mut self, offset: u64, count: Option<u64>) -> Result<Vec<u8>>;
}

impl<S: Read + Write + io::Seek> FileFormat for OpcContainer<S> {
    fn get_data(&mut self, virtual_path: &str) -> Result<DataMap> {
        OpcContainer::get_data(self, virtual_path)
    }

    fn set_data(&mut self, data: DataMap) -> Result<()> {
        OpcContainer::set_data(self, data)
    }

    fn get_metadata(&mut self, virtual_path: &str) -> Result<MetadataMap> {
        OpcContainer::get_metadata(self, virtual_path)
    }

    fn set_metadata(&mut self, metadata: MetadataMap) -> Result<()> {
        OpcContainer::set_metadata(self, metadata)
    }

    fn get_stream(&mut self, virtual_path: &str) -> Result<EntryStream<'_>> {
        OpcContainer::get_stream(self, virtual_path)
    }

    fn list_paths(&mut self) -> Result<Vec<String>> {
        Ok(OpcContainer::list_paths(self))
    }

    fn to_byte_array(&mut self, offset: u64, count: Option<u64>) -> Result<Vec<u8>> {
        OpcContainer::to_byte_array(self, offset, count)
    }
}

impl<L: crate::gcode::LineRead> FileFormat for GCodeFile<L> {
    fn get_data(&mut self, virtual_path: &str) -> Result<DataMap> {
        GCodeFile::get_data(self, virtual_path)
    }

    fn set_data(&mut self, data: DataMap) -> Result<()> {
        GCodeFile::set_data(self, data)
    }

    fn get_metadata(&mut self, virtual_path: &str) -> Result<MetadataMap> {
        GCodeFile::get_metadata(self, virtual_path)
    }

    fn set_metadata(&mut self, metadata: MetadataMap) -> Result<()> {
        GCodeFile::set_metadata(self, metadata)
    }

    fn get_stream(&mut self, virtual_path: &str) -> Result<EntryStream<'_>> {
        GCodeFile::get_stream(self, virtual_path)
    }

    fn list_paths(&mut self) -> Result<Vec<String>> {
        Ok(GCodeFile::list_paths(self))
    }

    fn to_byte_array(&mut self, _offset: u64, _count: Option<u64>) -> Result<Vec<u8>> {
        Err(Error::Io(io::Error::new(
            io::ErrorKind::Unsupported,
            "g-code streams have no archive representation",
        )))
    }
}

/// The extension → MIME table. Longer extensions are listed first so that
/// `.gcode.gz` wins over `.gz`.
const EXTENSION_TO_MIME: &[(&str, &str)] = &[
    (".ufp", "application/x-ufp"),
    (".curapackage", "application/x-curapackage"),
    (".gcode.gz", "text/x-gcode-gz"),
    (".gz", "text/x-gcode-gz"),
    (".gcode", "text/x-gcode"),
    (".gsock", "text/x-gcode-socket"),
];

/// Resolves a file name to its MIME type by extension.
pub fn extension_to_mime(file_path: &str) -> Option<&'static str> {
    EXTENSION_TO_MIME
        .iter()
        .find(|(extension, _)| file_path.ends_with(extension))
        .map(|(_, mime)| *mime)
}

fn extension_of(file_path: &str) -> String {
    match file_path.rfind('.') {
        Some(dot) => file_path[dot..].to_string(),
        None => String::new(),
    }
}

/// A façade over the concrete file implementations, selected by extension or
/// MIME type. The operation set is fixed: every call goes through an
/// explicit match, there is no dynamic forwarding.
pub enum VirtualFile {
    Opc(OpcContainer<File>),
    GCode(GCodeFile<SeekableLines<BufReader<File>>>),
    GCodeGz(GCodeFile<PlainLines<BufReader<GzDecoder<File>>>>),
    GCodeSocket(GCodeFile<SocketLineStream>),
}

impl std::fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = match self {
            VirtualFile::Opc(_) => "Opc",
            VirtualFile::GCode(_) => "GCode",
            VirtualFile::GCodeGz(_) => "GCodeGz",
            VirtualFile::GCodeSocket(_) => "GCodeSocket",
        };
        f.debug_tuple(variant).finish()
    }
}

impl VirtualFile {
    /// Opens a file, choosing the implementation by extension.
    #[tracing::instrument(level = "debug")]
    pub fn open(file_path: &str, mode: OpenMode) -> Result<Self> {
        let mime = extension_to_mime(file_path)
            .ok_or_else(|| Error::UnknownExtension(extension_of(file_path)))?;
        Self::open_with_mime(file_path, mime, mode)
    }

    /// Opens a file with an explicit MIME type.
    pub fn open_with_mime(file_path: &str, mime: &str, mode: OpenMode) -> Result<Self> {
        if let Some(profile) = OpcProfile::for_mime(mime) {
            let file = match mode {
                OpenMode::ReadOnly => OpenOptions::new().read(true).open(file_path)?,
                OpenMode::WriteOnly => OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(file_path)?,
            };
            return Ok(VirtualFile::Opc(OpcContainer::open_stream(
                file, profile, mode,
            )?));
        }

        // The g-code family is read-only.
        if mode != OpenMode::ReadOnly {
            return Err(Error::ReadOnly(file_path.to_string()));
        }
        match mime {
            "text/x-gcode" => {
                let reader = BufReader::new(File::open(file_path)?);
                Ok(VirtualFile::GCode(GCodeFile::open_stream(
                    SeekableLines::new(reader),
                )?))
            }
            "text/x-gcode-gz" => {
                let reader = BufReader::new(GzDecoder::new(File::open(file_path)?));
                Ok(VirtualFile::GCodeGz(GCodeFile::open_stream(
                    PlainLines::new(reader),
                )?))
            }
            "text/x-gcode-socket" => {
                let stream = SocketLineStream::connect(file_path)?;
                Ok(VirtualFile::GCodeSocket(GCodeFile::open_stream(stream)?))
            }
            other => Err(Error::UnknownExtension(other.to_string())),
        }
    }

    pub fn close(self) -> Result<()> {
        match self {
            VirtualFile::Opc(container) => container.close(),
            VirtualFile::GCode(file) => file.close(),
            VirtualFile::GCodeGz(file) => file.close(),
            VirtualFile::GCodeSocket(file) => file.close(),
        }
    }

    fn inner(&mut self) -> &mut dyn FileFormat {
        match self {
            VirtualFile::Opc(container) => container,
            VirtualFile::GCode(file) => file,
            VirtualFile::GCodeGz(file) => file,
            VirtualFile::GCodeSocket(file) => file,
        }
    }
}

impl FileFormat for VirtualFile {
    fn get_data(&mut self, virtual_path: &str) -> Result<DataMap> {
        self.inner().get_data(virtual_path)
    }

    fn set_data(&mut self, data: DataMap) -> Result<()> {
        self.inner().set_data(data)
    }

    fn get_metadata(&mut self, virtual_path: &str) -> Result<MetadataMap> {
        self.inner().get_metadata(virtual_path)
    }

    fn set_metadata(&mut self, metadata: MetadataMap) -> Result<()> {
        self.inner().set_metadata(metadata)
    }

    fn get_stream(&mut self, virtual_path: &str) -> Result<EntryStream<'_>> {
        self.inner().get_stream(virtual_path)
    }

    fn list_paths(&mut self) -> Result<Vec<String>> {
        self.inner().list_paths()
    }

    fn to_byte_array(&mut self, offset: u64, count: Option<u64>) -> Result<Vec<u8>> {
        self.inner().to_byte_array(offset, count)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn extensions_resolve_to_mime_types() {
        assert_eq!(Some("application/x-ufp"), extension_to_mime("model.ufp"));
        assert_eq!(Some("text/x-gcode"), extension_to_mime("model.gcode"));
        assert_eq!(Some("text/x-gcode-gz"), extension_to_mime("model.gcode.gz"));
        assert_eq!(Some("text/x-gcode-gz"), extension_to_mime("model.gz"));
        assert_eq!(
            Some("text/x-gcode-socket"),
            extension_to_mime("gsock://printer/model.gsock")
        );
        assert_eq!(
            Some("application/x-curapackage"),
            extension_to_mime("material.curapackage")
        );
        assert_eq!(None, extension_to_mime("model.stl"));
    }

    #[test]
    fn unknown_extensions_are_reported() {
        let err = VirtualFile::open("model.stl", OpenMode::ReadOnly).unwrap_err();
        match err {
            Error::UnknownExtension(extension) => assert_eq!(".stl", extension),
            other => panic!("expected UnknownExtension, got {:?}", other),
        }
    }
}
