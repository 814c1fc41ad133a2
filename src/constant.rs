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

//! Format and decoder constants

#![allow(dead_code)] // it's okay if some FLAC-format constants are not used.

// Constants sorted in an alphabetical-order.  Top-level constants first, and
// then sub-modules. Constants that are used only in a specific sub-module or
// its caller should be placed in the corresponding submodule.

/// Maximum number of channels.
pub const MAX_CHANNELS: usize = 8;

/// Maximum bits-per-sample in the format.
pub const MAX_BITS_PER_SAMPLE: usize = 32;

/// Maximum length of a block in the format.
pub const MAX_BLOCKSIZE: usize = 65535;

/// Maximum sample rate that `STREAMINFO` can describe.
pub const MAX_SAMPLE_RATE: usize = 655_350;

/// Minimum bits-per-sample in the format.
pub const MIN_BITS_PER_SAMPLE: usize = 4;

/// Sub-module containing constants related to build-time information.
pub mod build_info {
    pub const CRATE_VERSION: &str = match option_env!("CARGO_PKG_VERSION") {
        Some(v) => v,
        None => "unknown",
    };
}

/// Constants used as defaults of [`config::Decoder`].
///
/// [`config::Decoder`]: crate::config::Decoder
pub mod decoder {
    /// Default number of bytes requested from a source per refill.
    pub const DEFAULT_READ_CHUNK_SIZE: usize = 16 * 1024;

    /// Smallest refill chunk accepted by the configuration.
    pub const MIN_READ_CHUNK_SIZE: usize = 16;

    /// Largest refill chunk accepted by the configuration.
    pub const MAX_READ_CHUNK_SIZE: usize = 1 << 24;

    /// Default number of bytes that can be skipped while searching a valid
    /// frame in a single `step`.
    pub const DEFAULT_MAX_RESYNC_BYTES: usize = 1 << 20;
}

/// Constants related to fixed-parameter LPC.
pub mod fixed {
    /// Maximum order of fixed LPC.
    pub const MAX_LPC_ORDER: usize = 4;
}

/// Constants related to frames and frame headers.
pub mod frame {
    /// 14-bit sync code, left aligned in a 16-bit word.
    pub const SYNC_CODE: u16 = 0xFFF8;

    /// Mask applied to the first two bytes of a frame before comparing with
    /// [`SYNC_CODE`]. The last bit is the blocking strategy.
    pub const SYNC_MASK: u16 = 0xFFFE;
}

/// Constants related to metadata blocks.
pub mod metadata {
    /// Stream marker at the beginning of every FLAC stream.
    pub const STREAM_MARKER: [u8; 4] = *b"fLaC";

    /// Length of the `STREAMINFO` payload in bytes.
    pub const STREAM_INFO_LEN: usize = 34;

    /// Length of a single seek point in bytes.
    pub const SEEK_POINT_LEN: usize = 18;

    /// Sample number used for placeholder seek points.
    pub const PLACEHOLDER_SAMPLE: u64 = u64::MAX;

    /// Upper bound of a `VORBIS_COMMENT` payload that is kept in memory.
    pub const MAX_VORBIS_COMMENT_LEN: usize = 1 << 20;
}

/// Constants related to quantized linear predictive coding (QLPC).
pub mod qlpc {
    /// The number of bits used for encoding shift bits of QLPC.
    pub const SHIFT_BITS: usize = 5;

    /// The number of bits used for encoding coefficient precision.
    pub const PRECISION_BITS: usize = 4;

    /// Maximum order of LPC in the format.
    pub const MAX_ORDER: usize = 32;
}

/// Constants related to partitioned rice coding (PRC).
pub mod rice {
    /// Bits of a rice parameter in coding method 0.
    pub const PARAMETER_BITS: usize = 4;

    /// Bits of a rice parameter in coding method 1.
    pub const EXTENDED_PARAMETER_BITS: usize = 5;

    /// Bits of the width field that follows an escape code.
    pub const ESCAPED_WIDTH_BITS: usize = 5;
}

/// Constants related to seeking.
pub mod seek {
    /// Byte window below which the bisection stops and frames are decoded
    /// linearly.
    pub const LINEAR_SCAN_BYTES: u64 = 64 * 1024;

    /// Maximum number of bisection probes.
    pub const MAX_PROBES: usize = 64;
}

/// Module for internal error messages.
///
/// Use `panic!` and those messages only for env-related unrecoverable errors.
/// It's okay to use them in tests, but it's not okay to add another variable
/// only for test functions.
pub(crate) mod panic_msg {
    pub const DATA_INCONSISTENT: &str = "INTERNAL ERROR: Internal variable inconsistency detected.";
}
