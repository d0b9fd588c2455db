//! Asynchronous file I/O: open, read, write, close, each a single kernel
//! op submitted through [`crate::io_future::IoOpFuture`].

use std::os::unix::io::RawFd;

use crate::error::Result;
use crate::io_future::IoOpFuture;
use crate::op::{Completion, Operation};

/// An open file. Closing is explicit via [`File::close`] — dropping a
/// `File` without closing it leaks the descriptor, same as a raw `RawFd`
/// would.
#[derive(Debug)]
pub struct File {
    fd: RawFd,
}

/// Opens `path` with the given mode string (`r`, `w`, `rw`, `a`, any
/// combination — see [`crate::op::FileMode::parse`]), creating it first
/// if `mode` includes `c`.
pub async fn open_file(path: &str, mode: &str) -> Result<File> {
    let op = Operation::file_open(path, mode)?;
    match IoOpFuture::new(op).await? {
        Completion::FileOpened { fd } => Ok(File { fd }),
        other => unreachable!("file_open produced {other:?}"),
    }
}

impl File {
    pub fn raw_fd(&self) -> RawFd {
        self.fd
    }

    /// Reads up to `len` bytes starting at `offset`. The returned buffer's
    /// length is the number of bytes actually read, which may be less
    /// than `len` (including zero, at end of file).
    pub async fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let op = Operation::file_read(self.fd, Some(len), offset)?;
        match IoOpFuture::new(op).await? {
            Completion::FileRead { data } => Ok(data.into_vec()),
            other => unreachable!("file_read produced {other:?}"),
        }
    }

    /// Writes `data` starting at `offset`, returning the number of bytes
    /// the kernel accepted (may be a short write).
    pub async fn write(&self, offset: u64, data: Vec<u8>) -> Result<usize> {
        let op = Operation::file_write(self.fd, crate::buffer::Buffer::from_vec(data), offset);
        match IoOpFuture::new(op).await? {
            Completion::FileWritten { bytes } => Ok(bytes),
            other => unreachable!("file_write produced {other:?}"),
        }
    }

    pub async fn close(self) -> Result<()> {
        let op = Operation::Close { fd: self.fd };
        match IoOpFuture::new(op).await? {
            Completion::Closed => Ok(()),
            other => unreachable!("close produced {other:?}"),
        }
    }
}
