// Copyright 2024 Google LLC
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

//! Bit-granular reader on top of a [`ByteSource`].

use crate::error::DecodeError;
use crate::error::FormatError;
use crate::source::ByteSource;

/// Reads a FLAC bitstream from a [`ByteSource`] through a staging buffer.
///
/// The reader keeps at most one refill chunk (plus bytes pushed back with
/// [`BitReader::unread`]) in memory. Optionally, the raw bytes consumed since
/// [`BitReader::start_capture`] are recorded so that callers can compute
/// checksums over them or rescan them.
#[derive(Debug)]
pub struct BitReader<S> {
    source: S,
    buf: Vec<u8>,
    len: usize,
    pos: usize,
    bit: usize,
    /// Absolute source offset of `buf[0]`.
    buf_offset: u64,
    chunk_size: usize,
    capturing: bool,
    capture_from: usize,
    captured: Vec<u8>,
}

impl<S: ByteSource> BitReader<S> {
    /// Constructs `BitReader` that refills `chunk_size` bytes at once.
    pub fn new(source: S, chunk_size: usize) -> Self {
        let buf_offset = source.current_offset();
        let chunk_size = chunk_size.max(1);
        Self {
            source,
            buf: vec![0u8; chunk_size],
            len: 0,
            pos: 0,
            bit: 0,
            buf_offset,
            chunk_size,
            capturing: false,
            capture_from: 0,
            captured: Vec::new(),
        }
    }

    /// Returns the offset of the read head in the number of bits.
    pub fn current_bit_offset(&self) -> u64 {
        self.byte_offset() * 8 + self.bit as u64
    }

    /// Returns the absolute offset of the byte the read head is in.
    pub fn byte_offset(&self) -> u64 {
        self.buf_offset + self.pos as u64
    }

    /// Returns true if the read head is on a byte boundary.
    pub const fn is_aligned(&self) -> bool {
        self.bit == 0
    }

    /// Returns true if the underlying source can seek.
    pub fn is_seekable(&self) -> bool {
        self.source.is_seekable()
    }

    /// Returns the total length of the source if known.
    pub fn source_len(&self) -> Option<u64> {
        self.source.len()
    }

    /// Seeks the source to `offset` and drops all staged bytes.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`ByteSource::seek`]. The reader state is kept
    /// when seeking failed.
    pub fn seek(&mut self, offset: u64) -> Result<(), DecodeError> {
        self.source.seek(offset)?;
        self.len = 0;
        self.pos = 0;
        self.bit = 0;
        self.buf_offset = offset;
        self.stop_capture();
        Ok(())
    }

    /// Fetches the next chunk from the source.
    fn refill(&mut self) -> Result<(), DecodeError> {
        debug_assert!(self.pos >= self.len);
        self.flush_capture();
        self.buf_offset += self.len as u64;
        self.len = 0;
        self.pos = 0;
        self.capture_from = 0;
        if self.buf.len() < self.chunk_size {
            self.buf.resize(self.chunk_size, 0u8);
        }
        let n = self.source.read_into(&mut self.buf[..self.chunk_size])?;
        if n == 0 {
            return Err(DecodeError::UnexpectedEndOfStream);
        }
        self.len = n;
        Ok(())
    }

    /// Returns the byte the read head is in, refilling if needed.
    #[inline]
    fn current_byte(&mut self) -> Result<u8, DecodeError> {
        if self.pos >= self.len {
            self.refill()?;
        }
        Ok(self.buf[self.pos])
    }

    #[inline]
    fn advance_bits(&mut self, bits: usize) {
        self.bit += bits;
        if self.bit == 8 {
            self.bit = 0;
            self.pos += 1;
        }
    }

    /// Skips to the next byte boundary.
    pub fn skip_to_next_byte(&mut self) {
        if self.bit != 0 {
            self.bit = 0;
            self.pos += 1;
        }
    }

    /// Reads unsigned integer from the next `bits` bits.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEndOfStream` if the source ends before `bits` bits.
    pub fn read_u64(&mut self, bits: usize) -> Result<u64, DecodeError> {
        debug_assert!(bits <= 64);
        let mut ret = 0u64;
        let mut remaining = bits;
        while remaining > 0 {
            let byte = u32::from(self.current_byte()?);
            let avail = 8 - self.bit;
            let take = avail.min(remaining);
            let chunk = (byte >> (avail - take)) & ((1u32 << take) - 1);
            ret = (ret << take) | u64::from(chunk);
            remaining -= take;
            self.advance_bits(take);
        }
        Ok(ret)
    }

    /// Reads signed integer from the next `bits` bits.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEndOfStream` if the source ends before `bits` bits.
    pub fn read_i64(&mut self, bits: usize) -> Result<i64, DecodeError> {
        if bits == 0 {
            return Ok(0);
        }
        let u = self.read_u64(bits)?;
        let shift = 64 - bits;
        Ok(((u << shift) as i64) >> shift)
    }

    /// Reads one byte after skipping to the next byte boundary.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEndOfStream` at the end of the source.
    #[inline]
    pub fn read_u8_aligned(&mut self) -> Result<u8, DecodeError> {
        self.skip_to_next_byte();
        let b = self.current_byte()?;
        self.pos += 1;
        Ok(b)
    }

    /// Reads bytes from the next byte boundary.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEndOfStream` if the source ends before `buf` is
    /// filled.
    pub fn read_bytes_aligned(&mut self, buf: &mut [u8]) -> Result<(), DecodeError> {
        self.skip_to_next_byte();
        let mut filled = 0;
        while filled < buf.len() {
            if self.pos >= self.len {
                self.refill()?;
            }
            let n = (self.len - self.pos).min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            filled += n;
        }
        Ok(())
    }

    /// Utility function that calls `read_bytes_aligned` and returns results in `Vec`.
    ///
    /// # Errors
    ///
    /// Same as [`BitReader::read_bytes_aligned`].
    pub fn read_bytevec_aligned(&mut self, bytes: usize) -> Result<Vec<u8>, DecodeError> {
        let mut ret = vec![0; bytes];
        self.read_bytes_aligned(&mut ret)?;
        Ok(ret)
    }

    /// Discards `bytes` bytes from the next byte boundary.
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEndOfStream` if the source is shorter.
    pub fn skip_bytes(&mut self, bytes: u64) -> Result<(), DecodeError> {
        self.skip_to_next_byte();
        let mut remaining = bytes;
        while remaining > 0 {
            if self.pos >= self.len {
                self.refill()?;
            }
            let n = ((self.len - self.pos) as u64).min(remaining);
            self.pos += n as usize;
            remaining -= n;
        }
        Ok(())
    }

    /// Reads UTF-8-like encoded integer used for frame/ sample numbers.
    ///
    /// # Errors
    ///
    /// Returns `Format` error for an invalid leading or continuation byte.
    pub fn read_utf8_aligned(&mut self) -> Result<u64, DecodeError> {
        let head = u64::from(self.read_u8_aligned()?);

        let (tail_count, acc) = if head < 0x80 {
            (0, head & 0x7F)
        } else if head < 0xC0 {
            return Err(FormatError::new(self.current_bit_offset(), "invalid UTF-8 head").into());
        } else if head < 0xE0 {
            (1, head & 0x1F)
        } else if head < 0xF0 {
            (2, head & 0x0F)
        } else if head < 0xF8 {
            (3, head & 0x07)
        } else if head < 0xFC {
            (4, head & 0x03)
        } else if head < 0xFE {
            (5, head & 0x01)
        } else if head == 0xFE {
            (6, 0)
        } else {
            return Err(FormatError::new(self.current_bit_offset(), "invalid UTF-8 head").into());
        };

        let mut acc: u64 = acc;
        for _ in 0..tail_count {
            let b = self.read_u8_aligned()?;
            if b & 0xC0 != 0x80 {
                return Err(
                    FormatError::new(self.current_bit_offset(), "invalid UTF-8 tail").into(),
                );
            }
            acc = acc << 6 | u64::from(b & 0x3F);
        }
        Ok(acc)
    }

    /// Reads unary code (i.e. counts the number of leading "0"s before "1").
    ///
    /// # Errors
    ///
    /// Returns `UnexpectedEndOfStream` if the source ends before "1".
    pub fn read_unary(&mut self) -> Result<u32, DecodeError> {
        let mut count = 0u32;
        loop {
            let byte = self.current_byte()?;
            let rest = byte << self.bit;
            if rest == 0 {
                count += (8 - self.bit) as u32;
                self.bit = 0;
                self.pos += 1;
            } else {
                let zeros = rest.leading_zeros();
                count += zeros;
                self.advance_bits(zeros as usize + 1);
                return Ok(count);
            }
        }
    }

    /// Starts recording consumed bytes. `prefix` is recorded as if it was
    /// consumed right before the current read head.
    ///
    /// Capturing must start on a byte boundary.
    pub fn start_capture(&mut self, prefix: &[u8]) {
        debug_assert!(self.is_aligned());
        self.captured.clear();
        self.captured.extend_from_slice(prefix);
        self.capturing = true;
        self.capture_from = self.pos;
    }

    /// Moves fully consumed bytes of the staging buffer to the capture.
    fn flush_capture(&mut self) {
        if self.capturing {
            let end = self.pos.min(self.len);
            if end > self.capture_from {
                self.captured
                    .extend_from_slice(&self.buf[self.capture_from..end]);
            }
            self.capture_from = end;
        }
    }

    /// Returns the bytes fully consumed since [`BitReader::start_capture`].
    ///
    /// A partially consumed byte is not included.
    pub fn captured(&mut self) -> &[u8] {
        self.flush_capture();
        &self.captured
    }

    /// Stops recording and returns the recorded bytes.
    pub fn take_capture(&mut self) -> Vec<u8> {
        self.flush_capture();
        self.capturing = false;
        std::mem::take(&mut self.captured)
    }

    /// Stops recording and discards the recorded bytes.
    pub fn stop_capture(&mut self) {
        self.capturing = false;
        self.captured.clear();
    }

    /// Pushes `bytes` back so that they are read again before the rest.
    ///
    /// The read head is moved to the next byte boundary first. The pushed
    /// bytes are assumed to directly precede the read head in the source.
    pub fn unread(&mut self, bytes: &[u8]) {
        self.skip_to_next_byte();
        self.stop_capture();
        if bytes.is_empty() {
            return;
        }
        if bytes.len() <= self.pos {
            let start = self.pos - bytes.len();
            self.buf[start..self.pos].copy_from_slice(bytes);
            self.pos = start;
            return;
        }
        let rest_len = self.len.saturating_sub(self.pos);
        let mut merged = Vec::with_capacity((bytes.len() + rest_len).max(self.chunk_size));
        merged.extend_from_slice(bytes);
        if rest_len > 0 {
            merged.extend_from_slice(&self.buf[self.pos..self.len]);
        }
        let new_len = merged.len();
        let new_offset = self.byte_offset() - bytes.len() as u64;
        self.buf = merged;
        self.len = new_len;
        self.pos = 0;
        self.buf_offset = new_offset;
    }
}
