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

//! Mapping from sample positions to frame offsets.

use crate::bitsource::BitReader;
use crate::config;
use crate::constant::seek::LINEAR_SCAN_BYTES;
use crate::constant::seek::MAX_PROBES;
use crate::error::DecodeError;
use crate::frame::find_sync;
use crate::frame::read_frame_header;
use crate::frame::rewind_after_sync;
use crate::frame::FrameDecoder;
use crate::metadata::Metadata;
use crate::metadata::StreamInfo;
use crate::source::ByteSource;

/// Pair of a frame offset in bytes and its first sample.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Bound {
    offset: u64,
    sample: u64,
}

/// Result of [`locate`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Located {
    /// The frame containing the target starts at `offset`.
    Frame { offset: u64, first_sample: u64 },
    /// The stream ended before the target. `position` is the end of the last
    /// decodable frame.
    End { position: u64 },
}

/// Finds the frame that contains the sample `target`.
///
/// The reader is left at an arbitrary position; callers seek it to the
/// returned offset. `frame_decoder` is used as a scratch space.
///
/// # Errors
///
/// Propagates source errors, and returns `UnrecoverableStreamCorruption` if
/// no frame can be found within the resynchronization limit.
pub fn locate<S: ByteSource>(
    src: &mut BitReader<S>,
    metadata: &Metadata,
    frame_decoder: &mut FrameDecoder,
    config: &config::Decoder,
    target: u64,
) -> Result<Located, DecodeError> {
    let info = metadata.stream_info();
    let first = metadata.first_frame_offset();
    let table = metadata.seek_table();

    let initial = table
        .and_then(|t| t.lower_bound(target))
        .map_or(
            Bound {
                offset: first,
                sample: 0,
            },
            |p| Bound {
                offset: first.saturating_add(p.offset),
                sample: p.sample_number,
            },
        );
    let upper = table
        .and_then(|t| t.upper_bound(target))
        .map(|p| Bound {
            offset: first.saturating_add(p.offset),
            sample: p.sample_number,
        })
        .or_else(|| {
            let len = src.source_len()?;
            (info.total_samples() > 0).then_some(Bound {
                offset: len,
                sample: info.total_samples(),
            })
        });

    let lower = match upper {
        Some(upper) => bisect(src, info, initial, upper, target)?,
        None => initial,
    };

    let located = walk_forward(src, info, frame_decoder, config, lower, target)?;
    match located {
        Located::Frame { first_sample, .. } if first_sample > target && lower != initial => {
            log::debug!(
                target: "flacstream::seek",
                "{{ msg: \"bisection overshot\", target: {}, found: {} }}",
                target, first_sample
            );
            walk_forward(src, info, frame_decoder, config, initial, target)
        }
        _ => Ok(located),
    }
}

/// Narrows `[lower, upper)` down to a window that is scanned linearly.
fn bisect<S: ByteSource>(
    src: &mut BitReader<S>,
    info: &StreamInfo,
    mut lower: Bound,
    mut upper: Bound,
    target: u64,
) -> Result<Bound, DecodeError> {
    let window = LINEAR_SCAN_BYTES.max(2 * info.max_frame_size() as u64);
    let mut probes = 0;
    while upper.offset.saturating_sub(lower.offset) > window && probes < MAX_PROBES {
        let span = upper.offset - lower.offset;
        let pos = if probes == 0 && upper.sample > lower.sample && target >= lower.sample {
            let ratio_num = u128::from(target - lower.sample);
            let ratio_den = u128::from(upper.sample - lower.sample);
            lower.offset + (ratio_num * u128::from(span) / ratio_den) as u64
        } else {
            lower.offset + span / 2
        };
        let pos = pos.clamp(lower.offset + 1, upper.offset - 1);
        probes += 1;

        let found = probe(src, info, pos, upper.offset)?;
        log::debug!(
            target: "flacstream::seek",
            "{{ msg: \"probe\", pos: {}, lower: {}, upper: {}, found: {:?} }}",
            pos, lower.offset, upper.offset, found
        );
        match found {
            None => upper.offset = pos,
            Some(b) if b.sample <= target => lower = b,
            Some(b) => upper = b,
        }
    }
    Ok(lower)
}

/// Returns the first frame header at or after `pos` and before `limit`.
fn probe<S: ByteSource>(
    src: &mut BitReader<S>,
    info: &StreamInfo,
    pos: u64,
    limit: u64,
) -> Result<Option<Bound>, DecodeError> {
    src.seek(pos)?;
    loop {
        let max_skip = limit.saturating_sub(src.byte_offset()) as usize;
        let sync = match find_sync(src, max_skip) {
            Ok(Some((sync, _))) => sync,
            Ok(None) => return Ok(None),
            Err(e) if e.is_stream_ended() => return Ok(None),
            Err(e) => return Err(e),
        };
        let offset = src.byte_offset() - 2;
        if offset >= limit {
            return Ok(None);
        }
        src.start_capture(&[0xFF, sync]);
        match read_frame_header(src, sync, info, true) {
            Ok(header) => {
                src.stop_capture();
                return Ok(Some(Bound {
                    offset,
                    sample: header.first_sample(info),
                }));
            }
            Err(e) if e.is_recoverable() => rewind_after_sync(src),
            Err(e) if e.is_stream_ended() => return Ok(None),
            Err(e) => return Err(e),
        }
    }
}

/// Decodes frames from `from` until the frame containing `target`.
fn walk_forward<S: ByteSource>(
    src: &mut BitReader<S>,
    info: &StreamInfo,
    frame_decoder: &mut FrameDecoder,
    config: &config::Decoder,
    from: Bound,
    target: u64,
) -> Result<Located, DecodeError> {
    src.seek(from.offset)?;
    let mut end = from.sample;
    let mut skipped = 0usize;
    loop {
        let search_start = src.byte_offset();
        let (sync, n) = match find_sync(src, config.max_resync_bytes.saturating_sub(skipped)) {
            Ok(Some(found)) => found,
            Ok(None) => return Err(DecodeError::UnrecoverableStreamCorruption { search_start }),
            Err(e) if e.is_stream_ended() => return Ok(Located::End { position: end }),
            Err(e) => return Err(e),
        };
        skipped += n;
        let offset = src.byte_offset() - 2;
        src.start_capture(&[0xFF, sync]);
        match frame_decoder.decode(src, sync, offset, info, config.check_crc) {
            Ok(header) => {
                src.stop_capture();
                skipped = 0;
                let first_sample = header.first_sample(info);
                end = first_sample + header.block_size() as u64;
                if end > target {
                    return Ok(Located::Frame {
                        offset,
                        first_sample,
                    });
                }
            }
            Err(e) if e.is_recoverable() || e.is_stream_ended() => {
                rewind_after_sync(src);
                skipped += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
