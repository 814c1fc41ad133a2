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

//! Functions for partitioned rice coding (PRC).

use crate::bitsource::BitReader;
use crate::constant::rice::ESCAPED_WIDTH_BITS;
use crate::constant::rice::EXTENDED_PARAMETER_BITS;
use crate::constant::rice::PARAMETER_BITS;
use crate::error::DecodeError;
use crate::error::FormatError;
use crate::source::ByteSource;

/// Maps a zigzag-coded unsigned value back to the signed residual.
#[inline]
pub(crate) const fn decode_signbit(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

/// Reads a partitioned-rice coded residual into `dest[warmup_length..]`.
///
/// `dest.len()` is the block size. The first partition is shorter than the
/// others by `warmup_length` samples.
///
/// # Errors
///
/// Returns `Format` error for a reserved coding method or a partitioning that
/// doesn't fit the block, and propagates reader errors.
pub(crate) fn read_residual<S: ByteSource>(
    src: &mut BitReader<S>,
    warmup_length: usize,
    dest: &mut [i64],
) -> Result<(), DecodeError> {
    let block_size = dest.len();
    let parameter_bits = match src.read_u64(2)? {
        0 => PARAMETER_BITS,
        1 => EXTENDED_PARAMETER_BITS,
        _ => {
            return Err(FormatError::new(
                src.current_bit_offset(),
                "reserved residual coding method",
            )
            .into())
        }
    };
    let escape_code = (1u64 << parameter_bits) - 1;

    let partition_order = src.read_u64(4)? as usize;
    let nparts = 1usize << partition_order;
    if block_size % nparts != 0 {
        return Err(FormatError::new(
            src.current_bit_offset(),
            "block size is not divisible by the number of partitions",
        )
        .into());
    }
    let part_len = block_size >> partition_order;
    if part_len < warmup_length {
        return Err(FormatError::new(
            src.current_bit_offset(),
            "first partition is shorter than the predictor order",
        )
        .into());
    }

    let mut t = warmup_length;
    for p in 0..nparts {
        let end = (p + 1) * part_len;
        let rice_p = src.read_u64(parameter_bits)?;
        if rice_p == escape_code {
            let width = src.read_u64(ESCAPED_WIDTH_BITS)? as usize;
            for x in &mut dest[t..end] {
                *x = src.read_i64(width)?;
            }
        } else {
            let rice_p = rice_p as usize;
            for x in &mut dest[t..end] {
                let quotient = u64::from(src.read_unary()?);
                let remainder = src.read_u64(rice_p)?;
                *x = decode_signbit((quotient << rice_p) | remainder);
            }
        }
        t = end;
    }
    Ok(())
}
