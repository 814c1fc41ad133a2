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

//! FIFO of interleaved PCM bytes waiting to be read.

use crate::config::OutputFormat;

/// Appends interleaved samples from `channels[..][start..]` to `dest` as
/// little-endian integers of the given layout.
pub fn interleave_into<C: AsRef<[i64]>>(
    channels: &[C],
    start: usize,
    bits_per_sample: usize,
    format: OutputFormat,
    dest: &mut Vec<u8>,
) {
    let Some(block_size) = channels.first().map(|c| c.as_ref().len()) else {
        return;
    };
    let width = format.bytes_per_sample(bits_per_sample);
    dest.reserve(block_size.saturating_sub(start) * channels.len() * width);
    for t in start..block_size {
        for ch in channels {
            let v = ch.as_ref()[t];
            let v = match format {
                OutputFormat::Native => v,
                OutputFormat::S16 if bits_per_sample < 16 => v << (16 - bits_per_sample),
                OutputFormat::S16 => v >> (bits_per_sample - 16),
            };
            dest.extend_from_slice(&v.to_le_bytes()[..width]);
        }
    }
}

/// Queue of packed, interleaved samples.
#[derive(Clone, Debug)]
pub struct PcmBuffer {
    data: Vec<u8>,
    head: usize,
    channels: usize,
    bits_per_sample: usize,
    format: OutputFormat,
}

impl PcmBuffer {
    pub fn new(channels: usize, bits_per_sample: usize, format: OutputFormat) -> Self {
        Self {
            data: Vec::new(),
            head: 0,
            channels,
            bits_per_sample,
            format,
        }
    }

    /// Returns the number of bytes used for one sample.
    pub const fn bytes_per_sample(&self) -> usize {
        self.format.bytes_per_sample(self.bits_per_sample)
    }

    /// Returns the number of bytes used for one inter-channel sample.
    pub const fn bytes_per_frame(&self) -> usize {
        self.bytes_per_sample() * self.channels
    }

    /// Returns the number of bytes ready to be drained.
    pub fn available_bytes(&self) -> usize {
        self.data.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.available_bytes() == 0
    }

    /// Appends one decoded frame skipping the first `start` inter-channel
    /// samples.
    pub fn append<C: AsRef<[i64]>>(&mut self, channels: &[C], start: usize) {
        debug_assert_eq!(channels.len(), self.channels);
        if self.head > 0 {
            self.data.drain(..self.head);
            self.head = 0;
        }
        interleave_into(
            channels,
            start,
            self.bits_per_sample,
            self.format,
            &mut self.data,
        );
    }

    /// Moves bytes to `buf` and returns the number of bytes moved.
    ///
    /// The number is rounded down to a multiple of the sample size.
    pub fn drain(&mut self, buf: &mut [u8]) -> usize {
        let width = self.bytes_per_sample();
        let n = buf.len().min(self.available_bytes()) / width * width;
        buf[..n].copy_from_slice(&self.data[self.head..self.head + n]);
        self.head += n;
        if self.head == self.data.len() {
            self.data.clear();
            self.head = 0;
        }
        n
    }

    /// Drops up to `bytes` bytes and returns the number of bytes dropped.
    pub fn discard(&mut self, bytes: usize) -> usize {
        let n = bytes.min(self.available_bytes());
        self.head += n;
        if self.head == self.data.len() {
            self.clear();
        }
        n
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.head = 0;
    }
}
