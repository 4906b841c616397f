//! The `file` builtin type returned by the `os`-backed `open()` function.
//!
//! Only present when the embedding [`crate::context::Config::enable_os_access`]
//! flag is set; `open()` raises `OSError` otherwise (see
//! [`crate::modules::os`]).

use std::fs::File as StdFile;
use std::io::{BufReader, BufWriter, Read, Write};

#[derive(Debug)]
pub enum FileHandle {
    Read(BufReader<StdFile>),
    Write(BufWriter<StdFile>),
    /// A file that has had `close()` called on it; further operations raise
    /// `ValueError`, matching CPython.
    Closed,
}

impl FileHandle {
    pub fn read_to_string(&mut self) -> std::io::Result<String> {
        match self {
            Self::Read(r) => {
                let mut buf = String::new();
                r.read_to_string(&mut buf)?;
                Ok(buf)
            }
            Self::Write(_) => Err(std::io::Error::new(std::io::ErrorKind::Other, "file not open for reading")),
            Self::Closed => Err(std::io::Error::new(std::io::ErrorKind::Other, "I/O operation on closed file")),
        }
    }

    pub fn write_str(&mut self, text: &str) -> std::io::Result<usize> {
        match self {
            Self::Write(w) => {
                w.write_all(text.as_bytes())?;
                Ok(text.len())
            }
            Self::Read(_) => Err(std::io::Error::new(std::io::ErrorKind::Other, "file not open for writing")),
            Self::Closed => Err(std::io::Error::new(std::io::ErrorKind::Other, "I/O operation on closed file")),
        }
    }

    pub fn close(&mut self) {
        if let Self::Write(w) = self {
            let _ = w.flush();
        }
        *self = Self::Closed;
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
