// Copyright 2022-2024 Google LLC
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

//! Subframe parsing and signal reconstruction.

use heapless::Vec as HVec;

use crate::bitsource::BitReader;
use crate::constant::fixed::MAX_LPC_ORDER as MAX_FIXED_LPC_ORDER;
use crate::constant::panic_msg;
use crate::constant::qlpc::MAX_ORDER as MAX_LPC_ORDER;
use crate::constant::qlpc::PRECISION_BITS;
use crate::constant::qlpc::SHIFT_BITS;
use crate::error::DecodeError;
use crate::error::FormatError;
use crate::rice;
use crate::source::ByteSource;

const FIXED_LPC_COEFS: [[i64; MAX_FIXED_LPC_ORDER]; MAX_FIXED_LPC_ORDER + 1] = [
    [0, 0, 0, 0],
    [1, 0, 0, 0],
    [2, -1, 0, 0],
    [3, -3, 1, 0],
    [4, -6, 4, -1],
];

/// Prediction method of a subframe.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Prediction {
    Constant,
    Verbatim,
    /// Fixed LPC with the given order (0-4).
    Fixed(usize),
    /// Quantized LPC with the given order (1-32).
    Lpc(usize),
}

impl Prediction {
    /// Interprets the 6-bit subframe type field.
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Self::Constant),
            1 => Some(Self::Verbatim),
            8..=12 => Some(Self::Fixed(tag as usize - 8)),
            32..=63 => Some(Self::Lpc(tag as usize - 31)),
            _ => None,
        }
    }

    /// Number of warm-up samples.
    pub const fn order(self) -> usize {
        match self {
            Self::Constant | Self::Verbatim => 0,
            Self::Fixed(order) | Self::Lpc(order) => order,
        }
    }
}

/// Parsed subframe header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SubframeHeader {
    pub prediction: Prediction,
    pub wasted_bits: usize,
}

/// Reads the subframe header.
///
/// # Errors
///
/// Returns `Format` error when the padding bit is set, the type is reserved,
/// or the wasted bits are not less than `bits_per_sample`.
pub fn read_subframe_header<S: ByteSource>(
    src: &mut BitReader<S>,
    bits_per_sample: usize,
) -> Result<SubframeHeader, DecodeError> {
    if src.read_u64(1)? != 0 {
        return Err(FormatError::new(src.current_bit_offset(), "subframe padding bit is set").into());
    }
    let tag = src.read_u64(6)? as u8;
    let prediction = Prediction::from_tag(tag).ok_or_else(|| {
        FormatError::new(src.current_bit_offset(), "reserved subframe type")
    })?;
    let wasted_bits = if src.read_u64(1)? == 0 {
        0
    } else {
        src.read_unary()? as usize + 1
    };
    if wasted_bits >= bits_per_sample {
        return Err(FormatError::new(
            src.current_bit_offset(),
            "wasted bits must be less than the sample size",
        )
        .into());
    }
    Ok(SubframeHeader {
        prediction,
        wasted_bits,
    })
}

/// Reads one subframe and writes the reconstructed signal to `dest`.
///
/// `dest.len()` is used as the block size. `bits_per_sample` must already
/// include the extra bit of side channels.
///
/// # Errors
///
/// Returns `Format` error on malformed subframes, and propagates reader
/// errors.
pub fn read_subframe<S: ByteSource>(
    src: &mut BitReader<S>,
    bits_per_sample: usize,
    dest: &mut [i64],
) -> Result<(), DecodeError> {
    let header = read_subframe_header(src, bits_per_sample)?;
    let bits_per_sample = bits_per_sample - header.wasted_bits;
    let order = header.prediction.order();
    if order > dest.len() {
        return Err(FormatError::new(
            src.current_bit_offset(),
            "predictor order exceeds the block size",
        )
        .into());
    }

    match header.prediction {
        Prediction::Constant => {
            let v = src.read_i64(bits_per_sample)?;
            dest.fill(v);
        }
        Prediction::Verbatim => {
            for x in dest.iter_mut() {
                *x = src.read_i64(bits_per_sample)?;
            }
        }
        Prediction::Fixed(order) => {
            read_warm_up(src, bits_per_sample, &mut dest[..order])?;
            rice::read_residual(src, order, dest)?;
            restore_lpc(&FIXED_LPC_COEFS[order][..order], 0, dest);
        }
        Prediction::Lpc(order) => {
            read_warm_up(src, bits_per_sample, &mut dest[..order])?;
            let precision = src.read_u64(PRECISION_BITS)? as usize;
            if precision == (1 << PRECISION_BITS) - 1 {
                return Err(FormatError::new(
                    src.current_bit_offset(),
                    "invalid QLPC coefficient precision",
                )
                .into());
            }
            let precision = precision + 1;
            let shift = src.read_i64(SHIFT_BITS)?;
            if shift < 0 {
                return Err(
                    FormatError::new(src.current_bit_offset(), "negative QLPC shift").into(),
                );
            }
            let mut coefs: HVec<i64, MAX_LPC_ORDER> = HVec::new();
            for _ in 0..order {
                coefs
                    .push(src.read_i64(precision)?)
                    .expect(panic_msg::DATA_INCONSISTENT);
            }
            rice::read_residual(src, order, dest)?;
            restore_lpc(&coefs, shift as usize, dest);
        }
    }

    if header.wasted_bits > 0 {
        for x in dest.iter_mut() {
            *x <<= header.wasted_bits;
        }
    }
    Ok(())
}

fn read_warm_up<S: ByteSource>(
    src: &mut BitReader<S>,
    bits_per_sample: usize,
    dest: &mut [i64],
) -> Result<(), DecodeError> {
    for x in dest {
        *x = src.read_i64(bits_per_sample)?;
    }
    Ok(())
}

/// Adds predictions to the residual stored in `signal[coefs.len()..]`.
///
/// Arithmetic wraps on corrupted input.
fn restore_lpc(coefs: &[i64], shift: usize, signal: &mut [i64]) {
    let order = coefs.len();
    for t in order..signal.len() {
        let mut pred = 0i64;
        for (tau, w) in coefs.iter().enumerate() {
            pred = pred.wrapping_add(w.wrapping_mul(signal[t - 1 - tau]));
        }
        signal[t] = signal[t].wrapping_add(pred >> shift);
    }
}
