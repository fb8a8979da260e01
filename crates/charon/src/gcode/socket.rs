//! G-code served dynamically over a stream socket.
//!
//! The client sends a 4-byte big-endian line index; the server answers with
//! that line, terminated by `\n`. There is no byte-level addressing, so only
//! line iteration is supported; rewinding just resets the line counter.

use std::io::{self, Read, Write};
use std::net::TcpStream;

use url::Url;

use super::lines::LineRead;
use crate::error::{Error, Result};

/// The fixed port g-code socket servers listen on.
pub const GCODE_SOCKET_PORT: u16 = 1337;

#[derive(Debug)]
pub struct SocketLineStream {
    stream: TcpStream,
    current_line: u32,
}

impl SocketLineStream {
    /// Connects to the host named by a `gsock://` style URL.
    pub fn connect(address: &str) -> Result<Self> {
        let url = Url::parse(address).map_err(|err| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid g-code socket address {:?}: {}", address, err),
            ))
        })?;
        let host = url.host_str().ok_or_else(|| {
            Error::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("g-code socket address {:?} has no host", address),
            ))
        })?;
        let stream = TcpStream::connect((host, GCODE_SOCKET_PORT))?;
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: TcpStream) -> Self {
        SocketLineStream {
            stream,
            current_line: 0,
        }
    }
}

impl LineRead for SocketLineStream {
    fn read_line(&mut self, buf: &mut String) -> io::Result<usize> {
        self.stream.write_all(&self.current_line.to_be_bytes())?;

        let mut line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            let read = self.stream.read(&mut byte)?;
            if read == 0 {
                // Server hung up; an empty line means end of stream.
                break;
            }
            line.push(byte[0]);
            if byte[0] == b'\n' {
                break;
            }
        }
        if line.is_empty() {
            return Ok(0);
        }

        let text = std::str::from_utf8(&line)
            .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
        buf.push_str(text);
        self.current_line += 1;
        Ok(line.len())
    }

    fn rewind(&mut self) -> io::Result<bool> {
        self.current_line = 0;
        Ok(true)
    }
}
