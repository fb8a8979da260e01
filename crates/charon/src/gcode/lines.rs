//! Line-oriented access to toolpath streams.
//!
//! The header parser only needs two things from its input: UTF-8 lines, and
//! an optional "go back to the start" so a seekable stream stays reusable as
//! the toolpath body after the header has been read. Gzip streams cannot
//! rewind; the socket protocol rewinds by resetting its line counter.

use std::io::{self, BufRead, Read, Seek, SeekFrom};

pub trait LineRead {
    /// Reads one line, including its terminator, appending to `buf`.
    /// Returns the number of bytes read; zero means end of stream.
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize>;

    /// Rewinds to the first line when the source supports it. Returns
    /// whether it did.
    fn rewind(&mut self) -> io::Result<bool>;
}

/// A seekable line source, e.g. a plain g-code file.
#[derive(Debug)]
pub struct SeekableLines<R: BufRead + Seek> {
    inner: R,
}

impl<R: BufRead + Seek> SeekableLines<R> {
    pub fn new(inner: R) -> Self {
        SeekableLines { inner }
    }
}

impl<R: BufRead + Seek> LineRead for SeekableLines<R> {
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        self.inner.read_line(buf)
    }

    fn rewind(&mut self) -> io::Result<bool> {
        self.inner.seek(SeekFrom::Start(0))?;
        Ok(true)
    }
}

/// A forward-only line source, e.g. a gzip stream or an archive entry.
#[derive(Debug)]
pub struct PlainLines<R: BufRead> {
    inner: R,
}

impl<R: BufRead> PlainLines<R> {
    pub fn new(inner: R) -> Self {
        PlainLines { inner }
    }
}

impl<R: BufRead> LineRead for PlainLines<R> {
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        self.inner.read_line(buf)
    }

    fn rewind(&mut self) -> io::Result<bool> {
        Ok(false)
    }
}

/// Adapts a [`LineRead`] back into an [`io::Read`] over its remaining lines,
/// so the toolpath body can be served as an ordinary byte stream.
pub struct LineReader<'a> {
    source: &'a mut dyn LineRead,
    buffer: Vec<u8>,
    position: usize,
}

impl<'a> LineReader<'a> {
    pub fn new(source: &'a mut dyn LineRead) -> Self {
        LineReader {
            source,
            buffer: Vec::new(),
            position: 0,
        }
    }
}

impl Read for LineReader<'_> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.position == self.buffer.len() {
            let mut line = String::new();
            if self.source.read_line(&mut line)? == 0 {
                return Ok(0);
            }
            self.buffer = line.into_bytes();
            self.position = 0;
        }
        let available = &self.buffer[self.position..];
        let count = available.len().min(out.len());
        out[..count].copy_from_slice(&available[..count]);
        self.position += count;
        Ok(count)
    }
}
