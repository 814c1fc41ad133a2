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

//! Metadata blocks preceding the audio frames.

use nom::bytes::complete::take;
use nom::multi::count;
use nom::multi::length_data;
use nom::number::complete::be_u16;
use nom::number::complete::be_u24;
use nom::number::complete::be_u64;
use nom::number::complete::le_u32;
use nom::sequence::tuple;
use nom::IResult;

#[cfg(feature = "serde")]
use serde::Deserialize;
#[cfg(feature = "serde")]
use serde::Serialize;

use crate::bitsource::BitReader;
use crate::constant::metadata::MAX_VORBIS_COMMENT_LEN;
use crate::constant::metadata::PLACEHOLDER_SAMPLE;
use crate::constant::metadata::SEEK_POINT_LEN;
use crate::constant::metadata::STREAM_INFO_LEN;
use crate::constant::metadata::STREAM_MARKER;
use crate::constant::MAX_BITS_PER_SAMPLE;
use crate::constant::MAX_CHANNELS;
use crate::constant::MAX_SAMPLE_RATE;
use crate::constant::MIN_BITS_PER_SAMPLE;
use crate::error::verify_range;
use crate::error::verify_true;
use crate::error::DecodeError;
use crate::error::FormatError;
use crate::error::Verify;
use crate::error::VerifyError;
use crate::source::ByteSource;

/// Metadata block types that the parser interprets.
mod block_type {
    pub const STREAM_INFO: u8 = 0;
    pub const PADDING: u8 = 1;
    pub const SEEK_TABLE: u8 = 3;
    pub const VORBIS_COMMENT: u8 = 4;
    pub const INVALID: u8 = 127;
}

/// Properties of the stream stored in `STREAMINFO`.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct StreamInfo {
    min_block_size: usize,
    max_block_size: usize,
    min_frame_size: usize,
    max_frame_size: usize,
    sample_rate: usize,
    channels: usize,
    bits_per_sample: usize,
    total_samples: u64,
    md5: [u8; 16],
}

impl StreamInfo {
    /// Constructs `StreamInfo` with unknown sizes, length and signature.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError` if an argument is out of the range the format
    /// can represent.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacstream::metadata::StreamInfo;
    /// let info = StreamInfo::new(44100, 2, 16).unwrap();
    /// assert_eq!(info.total_samples(), 0);
    /// assert!(StreamInfo::new(44100, 9, 16).is_err());
    /// ```
    pub fn new(
        sample_rate: usize,
        channels: usize,
        bits_per_sample: usize,
    ) -> Result<Self, VerifyError> {
        let ret = Self {
            min_block_size: 0,
            max_block_size: 0,
            min_frame_size: 0,
            max_frame_size: 0,
            sample_rate,
            channels,
            bits_per_sample,
            total_samples: 0,
            md5: [0u8; 16],
        };
        ret.verify()?;
        Ok(ret)
    }

    pub const fn min_block_size(&self) -> usize {
        self.min_block_size
    }

    pub const fn max_block_size(&self) -> usize {
        self.max_block_size
    }

    /// Returns the minimum frame size in bytes. 0 if unknown.
    pub const fn min_frame_size(&self) -> usize {
        self.min_frame_size
    }

    /// Returns the maximum frame size in bytes. 0 if unknown.
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    pub const fn sample_rate(&self) -> usize {
        self.sample_rate
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    pub const fn bits_per_sample(&self) -> usize {
        self.bits_per_sample
    }

    /// Returns the number of inter-channel samples. 0 if unknown.
    pub const fn total_samples(&self) -> u64 {
        self.total_samples
    }

    /// Returns MD5 digest of the unencoded signal. All zeros if unknown.
    pub const fn md5(&self) -> &[u8; 16] {
        &self.md5
    }

    /// Returns true if the MD5 digest is set.
    pub fn has_md5(&self) -> bool {
        self.md5.iter().any(|b| *b != 0)
    }
}

impl Verify for StreamInfo {
    fn verify(&self) -> Result<(), VerifyError> {
        verify_range!("sample_rate", self.sample_rate, 1..=MAX_SAMPLE_RATE)?;
        verify_range!("channels", self.channels, 1..=MAX_CHANNELS)?;
        verify_range!(
            "bits_per_sample",
            self.bits_per_sample,
            MIN_BITS_PER_SAMPLE..=MAX_BITS_PER_SAMPLE
        )?;
        Ok(())
    }
}

/// A point in `SEEKTABLE`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct SeekPoint {
    /// Index of the first sample in the target frame.
    pub sample_number: u64,
    /// Byte offset of the target frame from the first frame.
    pub offset: u64,
    /// Number of samples in the target frame.
    pub frame_samples: u16,
}

/// Seek points sorted by the sample number without placeholders.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct SeekTable {
    points: Vec<SeekPoint>,
}

impl SeekTable {
    /// Constructs `SeekTable` from points in arbitrary order.
    pub fn new(points: &[SeekPoint]) -> Self {
        let mut points: Vec<SeekPoint> = points
            .iter()
            .filter(|p| p.sample_number != PLACEHOLDER_SAMPLE)
            .copied()
            .collect();
        points.sort_by_key(|p| p.sample_number);
        points.dedup_by_key(|p| p.sample_number);
        Self { points }
    }

    pub fn points(&self) -> &[SeekPoint] {
        &self.points
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Returns the last point with `sample_number <= sample`.
    pub fn lower_bound(&self, sample: u64) -> Option<&SeekPoint> {
        let n = self.points.partition_point(|p| p.sample_number <= sample);
        n.checked_sub(1).map(|i| &self.points[i])
    }

    /// Returns the first point with `sample_number > sample`.
    pub fn upper_bound(&self, sample: u64) -> Option<&SeekPoint> {
        let n = self.points.partition_point(|p| p.sample_number <= sample);
        self.points.get(n)
    }
}

/// Contents of `VORBIS_COMMENT`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(Deserialize, Serialize))]
pub struct VorbisComment {
    vendor: String,
    comments: Vec<String>,
}

impl VorbisComment {
    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    /// Returns all comments in the `NAME=value` form.
    pub fn comments(&self) -> &[String] {
        &self.comments
    }

    /// Returns the values of the field `name` (case-insensitive).
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.comments.iter().filter_map(move |c| field_value(c, name))
    }

    /// Returns the first value of the field `name` (case-insensitive).
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacstream::metadata::VorbisComment;
    /// let comment = VorbisComment::new("ref", &["TITLE=Etude", "artist=Someone"]);
    /// assert_eq!(comment.get("ARTIST"), Some("Someone"));
    /// assert_eq!(comment.get("album"), None);
    /// ```
    pub fn get(&self, name: &str) -> Option<&str> {
        self.comments.iter().find_map(|c| field_value(c, name))
    }

    pub fn new(vendor: &str, comments: &[&str]) -> Self {
        Self {
            vendor: vendor.to_owned(),
            comments: comments.iter().map(|s| (*s).to_owned()).collect(),
        }
    }
}

/// Returns the value part of `comment` if its field name is `name`.
fn field_value<'a>(comment: &'a str, name: &str) -> Option<&'a str> {
    let (key, value) = comment.split_once('=')?;
    key.eq_ignore_ascii_case(name).then_some(value)
}

/// Everything parsed before the first frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Metadata {
    stream_info: StreamInfo,
    seek_table: Option<SeekTable>,
    vorbis_comment: Option<VorbisComment>,
    first_frame_offset: u64,
    skipped_blocks: usize,
}

impl Metadata {
    pub const fn stream_info(&self) -> &StreamInfo {
        &self.stream_info
    }

    pub const fn seek_table(&self) -> Option<&SeekTable> {
        self.seek_table.as_ref()
    }

    pub const fn vorbis_comment(&self) -> Option<&VorbisComment> {
        self.vorbis_comment.as_ref()
    }

    /// Returns the absolute byte offset of the first frame.
    pub const fn first_frame_offset(&self) -> u64 {
        self.first_frame_offset
    }

    /// Returns the number of blocks that were skipped without parsing.
    pub const fn skipped_blocks(&self) -> usize {
        self.skipped_blocks
    }
}

type NomError<'a> = nom::Err<nom::error::Error<&'a [u8]>>;

/// Converts a parse failure in a block payload to `FormatError`.
fn payload_error(payload_bit_offset: u64, payload: &[u8], err: &NomError<'_>) -> FormatError {
    let remaining = match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e.input.len(),
        nom::Err::Incomplete(_) => 0,
    };
    FormatError::new(
        payload_bit_offset + 8 * (payload.len() - remaining) as u64,
        "truncated metadata block",
    )
}

fn parse_stream_info(input: &[u8]) -> IResult<&[u8], StreamInfo> {
    let (input, (min_block_size, max_block_size, min_frame_size, max_frame_size)) =
        tuple((be_u16, be_u16, be_u24, be_u24))(input)?;
    // 20-bit sample rate, 3-bit channels, 5-bit bits-per-sample, and 36-bit
    // total samples.
    let (input, packed) = be_u64(input)?;
    let (input, md5) = take(16usize)(input)?;
    let mut md5_bytes = [0u8; 16];
    md5_bytes.copy_from_slice(md5);
    Ok((
        input,
        StreamInfo {
            min_block_size: min_block_size as usize,
            max_block_size: max_block_size as usize,
            min_frame_size: min_frame_size as usize,
            max_frame_size: max_frame_size as usize,
            sample_rate: (packed >> 44) as usize,
            channels: ((packed >> 41) & 0x07) as usize + 1,
            bits_per_sample: ((packed >> 36) & 0x1F) as usize + 1,
            total_samples: packed & 0x000F_FFFF_FFFF,
            md5: md5_bytes,
        },
    ))
}

fn parse_seek_point(input: &[u8]) -> IResult<&[u8], SeekPoint> {
    let (input, (sample_number, offset, frame_samples)) =
        tuple((be_u64, be_u64, be_u16))(input)?;
    Ok((
        input,
        SeekPoint {
            sample_number,
            offset,
            frame_samples,
        },
    ))
}

fn parse_vorbis_comment(input: &[u8]) -> IResult<&[u8], VorbisComment> {
    let (input, vendor) = length_data(le_u32)(input)?;
    let (input, n) = le_u32(input)?;
    let (input, comments) = count(length_data(le_u32), n as usize)(input)?;
    Ok((
        input,
        VorbisComment {
            vendor: String::from_utf8_lossy(vendor).into_owned(),
            comments: comments
                .into_iter()
                .map(|c| String::from_utf8_lossy(c).into_owned())
                .collect(),
        },
    ))
}

/// Skips an ID3v2 tag if the stream starts with one.
///
/// Returns the first four bytes after the tag.
fn skip_id3v2<S: ByteSource>(src: &mut BitReader<S>) -> Result<[u8; 4], DecodeError> {
    let mut head = [0u8; 4];
    src.read_bytes_aligned(&mut head)?;
    if &head[..3] != b"ID3" {
        return Ok(head);
    }
    let mut rest = [0u8; 6];
    src.read_bytes_aligned(&mut rest)?;
    let flags = rest[1];
    let size = rest[2..]
        .iter()
        .fold(0u64, |acc, b| (acc << 7) | u64::from(b & 0x7F));
    let footer = if flags & 0x10 != 0 { 10 } else { 0 };
    log::debug!(
        target: "flacstream::metadata",
        "{{ msg: \"ID3v2 tag skipped\", size: {} }}",
        size + footer
    );
    src.skip_bytes(size + footer)?;
    src.read_bytes_aligned(&mut head)?;
    Ok(head)
}

/// Reads the stream marker and all metadata blocks.
///
/// On success, the read head is at the first frame.
///
/// # Errors
///
/// Returns `NotAFlacStream` when the marker is missing, `MissingStreamInfo`
/// when no `STREAMINFO` is found, `Format` error for malformed blocks, and
/// propagates reader errors.
pub fn read_metadata<S: ByteSource>(src: &mut BitReader<S>) -> Result<Metadata, DecodeError> {
    let marker = skip_id3v2(src).map_err(|e| {
        if e.is_stream_ended() {
            DecodeError::NotAFlacStream
        } else {
            e
        }
    })?;
    if marker != STREAM_MARKER {
        return Err(DecodeError::NotAFlacStream);
    }

    let mut stream_info: Option<StreamInfo> = None;
    let mut seek_table: Option<SeekTable> = None;
    let mut vorbis_comment: Option<VorbisComment> = None;
    let mut skipped_blocks = 0usize;

    loop {
        let header = src.read_u8_aligned()?;
        let is_last = header & 0x80 != 0;
        let kind = header & 0x7F;
        let block_size = src.read_u64(24)? as usize;
        let payload_bit_offset = src.current_bit_offset();

        log::debug!(
            target: "flacstream::metadata",
            "{{ msg: \"MetadataBlock found\", is_last: {}, block_type: {}, block_size: {} }}",
            is_last, kind, block_size,
        );

        match kind {
            block_type::STREAM_INFO => {
                if stream_info.is_some() {
                    return Err(
                        FormatError::new(payload_bit_offset, "duplicate STREAMINFO").into()
                    );
                }
                if block_size != STREAM_INFO_LEN {
                    return Err(
                        FormatError::new(payload_bit_offset, "invalid STREAMINFO length").into(),
                    );
                }
                let payload = src.read_bytevec_aligned(block_size)?;
                let (_, info) = parse_stream_info(&payload)
                    .map_err(|e| payload_error(payload_bit_offset, &payload, &e))?;
                info.verify().map_err(|e| {
                    FormatError::new(payload_bit_offset, &e.within("stream_info").to_string())
                })?;
                stream_info = Some(info);
            }
            block_type::SEEK_TABLE => {
                if block_size % SEEK_POINT_LEN != 0 {
                    return Err(
                        FormatError::new(payload_bit_offset, "invalid SEEKTABLE length").into(),
                    );
                }
                let payload = src.read_bytevec_aligned(block_size)?;
                let (_, points) =
                    count(parse_seek_point, block_size / SEEK_POINT_LEN)(payload.as_slice())
                        .map_err(|e| payload_error(payload_bit_offset, &payload, &e))?;
                seek_table = Some(SeekTable::new(&points));
            }
            block_type::VORBIS_COMMENT if block_size <= MAX_VORBIS_COMMENT_LEN => {
                let payload = src.read_bytevec_aligned(block_size)?;
                match parse_vorbis_comment(&payload) {
                    Ok((_, comment)) => vorbis_comment = Some(comment),
                    Err(e) => {
                        log::warn!(
                            "ignoring malformed VORBIS_COMMENT: {}",
                            payload_error(payload_bit_offset, &payload, &e)
                        );
                    }
                }
            }
            block_type::INVALID => {
                return Err(
                    FormatError::new(payload_bit_offset, "invalid metadata block type").into(),
                );
            }
            _ => {
                if kind != block_type::PADDING {
                    skipped_blocks += 1;
                }
                src.skip_bytes(block_size as u64)?;
            }
        }

        if is_last {
            break;
        }
    }

    let stream_info = stream_info.ok_or(DecodeError::MissingStreamInfo)?;
    Ok(Metadata {
        stream_info,
        seek_table,
        vorbis_comment,
        first_frame_offset: src.byte_offset(),
        skipped_blocks,
    })
}
