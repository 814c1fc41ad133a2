// Copyright 2022 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Module for input byte source handling.

use std::fs::File;
use std::io;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;

use super::error::SourceError;
use super::error::SourceErrorReason;

/// Trait for pull-based byte sources the decoder reads from.
///
/// Calls may block for an arbitrarily long time. The decoder never calls a
/// source from more than one thread at once.
pub trait ByteSource {
    /// Reads up to `buf.len()` bytes into `buf`.
    ///
    /// Returns the number of bytes read; `0` indicates the end of the stream.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` when the underlying I/O failed.
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, SourceError>;

    /// Moves the read head to the absolute byte offset.
    ///
    /// # Errors
    ///
    /// The default implementation always returns an error with
    /// [`SourceErrorReason::Unsupported`].
    fn seek(&mut self, offset: u64) -> Result<(), SourceError> {
        let _ = offset;
        Err(SourceError::by_reason(SourceErrorReason::Unsupported))
    }

    /// Returns true if [`ByteSource::seek`] is expected to work.
    fn is_seekable(&self) -> bool {
        false
    }

    /// Returns the absolute offset of the next byte to be read.
    fn current_offset(&self) -> u64;

    /// Returns the total length of the stream in bytes if known.
    fn len(&self) -> Option<u64> {
        None
    }

    /// Returns true if the source is known to be empty.
    fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl<S: ByteSource + ?Sized> ByteSource for Box<S> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        (**self).read_into(buf)
    }

    fn seek(&mut self, offset: u64) -> Result<(), SourceError> {
        (**self).seek(offset)
    }

    fn is_seekable(&self) -> bool {
        (**self).is_seekable()
    }

    fn current_offset(&self) -> u64 {
        (**self).current_offset()
    }

    fn len(&self) -> Option<u64> {
        (**self).len()
    }
}

/// Reads from `reader` retrying on `ErrorKind::Interrupted`.
fn read_retrying<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize, SourceError> {
    loop {
        match reader.read(buf) {
            Ok(n) => return Ok(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SourceError::from_io_error(e)),
        }
    }
}

/// Forward-only [`ByteSource`] over any [`Read`], e.g. a network stream.
#[derive(Debug)]
pub struct ReadSource<R> {
    inner: R,
    offset: u64,
    len: Option<u64>,
}

impl<R: Read> ReadSource<R> {
    /// Wraps `inner` as a non-seekable source.
    pub const fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            len: None,
        }
    }

    /// Declares the total length of the stream (e.g. from a content-length
    /// header).
    #[must_use]
    pub fn with_len(self, len: u64) -> Self {
        Self {
            len: Some(len),
            ..self
        }
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> ByteSource for ReadSource<R> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let n = read_retrying(&mut self.inner, buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn current_offset(&self) -> u64 {
        self.offset
    }

    fn len(&self) -> Option<u64> {
        self.len
    }
}

/// Seekable [`ByteSource`] over [`Read`] + [`Seek`], e.g. a file or a cursor.
#[derive(Debug)]
pub struct SeekableSource<R> {
    inner: R,
    offset: u64,
    len: Option<u64>,
}

impl<R: Read + Seek> SeekableSource<R> {
    /// Wraps `inner`, measuring its length and rewinding it to the start.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` if the length cannot be determined.
    pub fn new(mut inner: R) -> Result<Self, SourceError> {
        let len = inner
            .seek(SeekFrom::End(0))
            .map_err(SourceError::from_io_error)?;
        inner
            .seek(SeekFrom::Start(0))
            .map_err(SourceError::from_io_error)?;
        Ok(Self {
            inner,
            offset: 0,
            len: Some(len),
        })
    }

    /// Returns the wrapped reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl SeekableSource<File> {
    /// Opens the file at `path`.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` if the file cannot be opened.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let file = File::open(path).map_err(SourceError::from_io_error)?;
        Self::new(file)
    }
}

impl<R: Read + Seek> ByteSource for SeekableSource<R> {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let n = read_retrying(&mut self.inner, buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> Result<(), SourceError> {
        self.offset = self
            .inner
            .seek(SeekFrom::Start(offset))
            .map_err(SourceError::from_io_error)?;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn current_offset(&self) -> u64 {
        self.offset
    }

    fn len(&self) -> Option<u64> {
        self.len
    }
}

/// [`ByteSource`] that reads from the preloaded bytes.
#[derive(Clone, Debug, Default)]
pub struct MemSource {
    data: Vec<u8>,
    head: usize,
}

impl MemSource {
    /// Constructs `MemSource` that owns `data`.
    pub const fn new(data: Vec<u8>) -> Self {
        Self { data, head: 0 }
    }

    /// Reads the whole file at `path` into memory.
    ///
    /// # Errors
    ///
    /// Returns `SourceError` if the file cannot be read.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        let data = std::fs::read(path).map_err(SourceError::from_io_error)?;
        Ok(Self::new(data))
    }

    /// Returns the whole content.
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemSource {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl ByteSource for MemSource {
    fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, SourceError> {
        let rest = &self.data[self.head.min(self.data.len())..];
        let n = rest.len().min(buf.len());
        buf[..n].copy_from_slice(&rest[..n]);
        self.head += n;
        Ok(n)
    }

    fn seek(&mut self, offset: u64) -> Result<(), SourceError> {
        let offset = usize::try_from(offset)
            .map_err(|_| SourceError::by_reason(SourceErrorReason::OutOfRange))?;
        self.head = offset;
        Ok(())
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn current_offset(&self) -> u64 {
        self.head as u64
    }

    fn len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}
