// Copyright 2023-2024 Google LLC
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

#![allow(dead_code)]

// mimic clippy. This file acts as a part of the crate when checked by clippy.
// but it is outside of the crate when it is actually used by doctests.
#[cfg(clippy)]
use crate as flacstream;

use flacstream::frame::FRAME_CRC;
use flacstream::frame::HEADER_CRC;

const BLOCK_SIZE: usize = 1024;
const FRAMES: usize = 4;

/// Makes a mono, 16-bit, 44.1 kHz stream of verbatim frames for doctest.
pub fn sine_stream() -> Vec<u8> {
    let mut bytes = b"fLaC".to_vec();
    // last-block flag and STREAMINFO type, then 34-byte length.
    bytes.extend_from_slice(&[0x80, 0x00, 0x00, 34]);
    bytes.extend_from_slice(&(BLOCK_SIZE as u16).to_be_bytes());
    bytes.extend_from_slice(&(BLOCK_SIZE as u16).to_be_bytes());
    bytes.extend_from_slice(&[0u8; 6]);
    let packed: u64 = (44100 << 44) | (15 << 36) | (BLOCK_SIZE * FRAMES) as u64;
    bytes.extend_from_slice(&packed.to_be_bytes());
    bytes.extend_from_slice(&[0u8; 16]);

    for n in 0..FRAMES {
        let start = bytes.len();
        // block size 1024, 44.1 kHz, mono, 16 bits, frame number.
        bytes.extend_from_slice(&[0xFF, 0xF8, 0xA9, 0x08, n as u8]);
        bytes.push(HEADER_CRC.checksum(&bytes[start..]));
        // verbatim subframe.
        bytes.push(0x02);
        for t in 0..BLOCK_SIZE {
            let phase = (n * BLOCK_SIZE + t) as f64 * 0.05;
            let v = (phase.sin() * 8000.0) as i16;
            bytes.extend_from_slice(&v.to_be_bytes());
        }
        let crc = FRAME_CRC.checksum(&bytes[start..]);
        bytes.extend_from_slice(&crc.to_be_bytes());
    }
    bytes
}
