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

//! Decoder configuration structs.

#[cfg(feature = "serde")]
use serde::Deserialize;
#[cfg(feature = "serde")]
use serde::Serialize;

use super::constant::decoder::DEFAULT_MAX_RESYNC_BYTES;
use super::constant::decoder::DEFAULT_READ_CHUNK_SIZE;
use super::constant::decoder::MAX_READ_CHUNK_SIZE;
use super::constant::decoder::MIN_READ_CHUNK_SIZE;
use super::error::verify_range;
use super::error::verify_true;
use super::error::Verify;
use super::error::VerifyError;

/// Configuration for decoder.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Decoder {
    /// Number of bytes requested from the source per refill.
    pub read_chunk_size: usize,
    /// Number of bytes that can be skipped in a single `step` while searching
    /// for a decodable frame before the stream is considered broken.
    pub max_resync_bytes: usize,
    /// If set to false, CRC-8 and CRC-16 of frames are not checked.
    pub check_crc: bool,
    /// If set, MD5 of the decoded signal is compared with `STREAMINFO` when a
    /// stream is decoded from the start to the end without seeking.
    pub verify_md5: bool,
    /// If set, samples preceding the seek target in the first frame after a
    /// seek are dropped.
    pub sample_accurate_seek: bool,
    /// Layout of samples written to the PCM output buffer.
    pub output_format: OutputFormat,
}

impl Default for Decoder {
    fn default() -> Self {
        Self {
            read_chunk_size: DEFAULT_READ_CHUNK_SIZE,
            max_resync_bytes: DEFAULT_MAX_RESYNC_BYTES,
            check_crc: true,
            verify_md5: false,
            sample_accurate_seek: false,
            output_format: OutputFormat::default(),
        }
    }
}

impl Verify for Decoder {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!(
            "read_chunk_size",
            self.read_chunk_size,
            MIN_READ_CHUNK_SIZE..=MAX_READ_CHUNK_SIZE
        )?;
        verify_true!(
            "max_resync_bytes",
            self.max_resync_bytes > 0,
            "must be positive"
        )?;
        Ok(())
    }
}

/// Sample layout of the PCM output.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub enum OutputFormat {
    /// Little-endian signed samples in the smallest byte container that fits
    /// the bits-per-sample of the stream. Values are not rescaled.
    #[default]
    Native,
    /// Little-endian signed 16-bit samples. Streams with other bit depths are
    /// shifted left or right to 16 bits.
    S16,
}

impl OutputFormat {
    /// Returns the number of bytes used for a sample of the given bit depth.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacstream::config::OutputFormat;
    /// assert_eq!(OutputFormat::Native.bytes_per_sample(12), 2);
    /// assert_eq!(OutputFormat::Native.bytes_per_sample(24), 3);
    /// assert_eq!(OutputFormat::S16.bytes_per_sample(24), 2);
    /// ```
    pub const fn bytes_per_sample(self, bits_per_sample: usize) -> usize {
        match self {
            Self::Native => (bits_per_sample + 7) / 8,
            Self::S16 => 2,
        }
    }
}
