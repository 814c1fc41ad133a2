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

//! Frame header parsing and frame decoding.

use crate::bitsource::BitReader;
use crate::constant::frame::SYNC_CODE;
use crate::constant::frame::SYNC_MASK;
use crate::constant::MAX_BLOCKSIZE;
use crate::error::DecodeError;
use crate::error::FormatError;
use crate::metadata::StreamInfo;
use crate::source::ByteSource;
use crate::subframe;

const CRC_8_FLAC: crc::Algorithm<u8> = crc::CRC_8_SMBUS;
const CRC_16_FLAC: crc::Algorithm<u16> = crc::CRC_16_UMTS;

/// CRC-16 computed over a whole frame except the footer.
pub static FRAME_CRC: crc::Crc<u16, crc::Table<16>> =
    crc::Crc::<u16, crc::Table<16>>::new(&CRC_16_FLAC);

/// CRC-8 computed over a frame header except the last byte.
pub static HEADER_CRC: crc::Crc<u8, crc::Table<16>> =
    crc::Crc::<u8, crc::Table<16>>::new(&CRC_8_FLAC);

const SAMPLE_RATES: [usize; 11] = [
    88200, 176_400, 192_000, 8000, 16000, 22050, 24000, 32000, 44100, 48000, 96000,
];

/// Channel assignment of a frame.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelAssignment {
    Independent(u8),
    LeftSide,
    RightSide,
    MidSide,
}

impl ChannelAssignment {
    /// Interprets the 4-bit channel assignment field.
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0..=7 => Some(Self::Independent(tag + 1)),
            8 => Some(Self::LeftSide),
            9 => Some(Self::RightSide),
            10 => Some(Self::MidSide),
            _ => None,
        }
    }

    /// Returns the number of channels.
    pub const fn channels(&self) -> usize {
        match self {
            Self::Independent(n) => *n as usize,
            Self::LeftSide | Self::RightSide | Self::MidSide => 2,
        }
    }

    /// Returns 1 if the channel `ch` is a side channel, 0 otherwise.
    pub const fn bits_per_sample_offset(&self, ch: usize) -> usize {
        match self {
            Self::Independent(_) => 0,
            Self::LeftSide | Self::MidSide => (ch == 1) as usize,
            Self::RightSide => (ch == 0) as usize,
        }
    }
}

/// Frame or sample number stored in the frame header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FrameOffset {
    /// Fixed blocking strategy.
    Frame(u64),
    /// Variable blocking strategy.
    StartSample(u64),
}

/// Parsed frame header.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FrameHeader {
    offset: FrameOffset,
    block_size: usize,
    sample_rate: Option<usize>,
    channel_assignment: ChannelAssignment,
    bits_per_sample: Option<usize>,
}

impl FrameHeader {
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the sample rate if the header overrides `STREAMINFO`.
    pub const fn sample_rate(&self) -> Option<usize> {
        self.sample_rate
    }

    pub const fn channel_assignment(&self) -> ChannelAssignment {
        self.channel_assignment
    }

    /// Returns the sample size if the header overrides `STREAMINFO`.
    pub const fn bits_per_sample(&self) -> Option<usize> {
        self.bits_per_sample
    }

    /// Returns the index of the first sample of this frame.
    pub fn first_sample(&self, stream_info: &StreamInfo) -> u64 {
        match self.offset {
            FrameOffset::StartSample(n) => n,
            FrameOffset::Frame(n) => {
                let block_size = if stream_info.min_block_size() == stream_info.max_block_size()
                    && stream_info.max_block_size() > 0
                {
                    stream_info.max_block_size()
                } else {
                    self.block_size
                };
                n * block_size as u64
            }
        }
    }
}

/// Scans forward for the next frame sync code.
///
/// On success, the two sync bytes are consumed and the second one is returned
/// together with the number of bytes skipped before the sync code. Returns
/// `None` when more than `max_skip` bytes were skipped.
///
/// # Errors
///
/// Propagates errors from the reader, including `UnexpectedEndOfStream`.
pub fn find_sync<S: ByteSource>(
    src: &mut BitReader<S>,
    max_skip: usize,
) -> Result<Option<(u8, usize)>, DecodeError> {
    src.skip_to_next_byte();
    let mut prev: Option<u8> = None;
    let mut consumed = 0usize;
    loop {
        let b = src.read_u8_aligned()?;
        consumed += 1;
        if let Some(p) = prev {
            if (u16::from(p) << 8 | u16::from(b)) & SYNC_MASK == SYNC_CODE {
                return Ok(Some((b, consumed - 2)));
            }
        }
        if consumed - 1 > max_skip {
            return Ok(None);
        }
        prev = Some(b);
    }
}

fn read_block_size<S: ByteSource>(src: &mut BitReader<S>, tag: u8) -> Result<usize, DecodeError> {
    Ok(match tag {
        0 => {
            return Err(FormatError::new(src.current_bit_offset(), "reserved block size").into())
        }
        1 => 192,
        2..=5 => 576 << (tag - 2),
        6 => src.read_u64(8)? as usize + 1,
        7 => src.read_u64(16)? as usize + 1,
        _ => 256 << (tag - 8),
    })
}

fn read_sample_rate<S: ByteSource>(
    src: &mut BitReader<S>,
    tag: u8,
) -> Result<Option<usize>, DecodeError> {
    Ok(match tag {
        0 => None,
        1..=11 => Some(SAMPLE_RATES[tag as usize - 1]),
        12 => Some(src.read_u64(8)? as usize * 1000),
        13 => Some(src.read_u64(16)? as usize),
        14 => Some(src.read_u64(16)? as usize * 10),
        _ => {
            return Err(FormatError::new(src.current_bit_offset(), "invalid sample rate").into())
        }
    })
}

fn bits_per_sample_from_tag(tag: u8) -> Result<Option<usize>, &'static str> {
    match tag {
        0 => Ok(None),
        1 => Ok(Some(8)),
        2 => Ok(Some(12)),
        4 => Ok(Some(16)),
        5 => Ok(Some(20)),
        6 => Ok(Some(24)),
        7 => Ok(Some(32)),
        _ => Err("reserved sample size"),
    }
}

/// Reads a frame header following the sync code.
///
/// The caller must have started capturing with the two sync bytes as the
/// prefix so that CRC-8 can be checked.
///
/// # Errors
///
/// Returns `Format` error for reserved values, header fields inconsistent
/// with `stream_info`, or CRC-8 mismatch (when `check_crc` is set).
pub fn read_frame_header<S: ByteSource>(
    src: &mut BitReader<S>,
    sync_byte: u8,
    stream_info: &StreamInfo,
    check_crc: bool,
) -> Result<FrameHeader, DecodeError> {
    let variable_blocking = sync_byte & 0x01 != 0;
    let block_size_tag = src.read_u64(4)? as u8;
    let sample_rate_tag = src.read_u64(4)? as u8;
    let channel_assignment = ChannelAssignment::from_tag(src.read_u64(4)? as u8)
        .ok_or_else(|| FormatError::new(src.current_bit_offset(), "reserved channel assignment"))?;
    let bits_per_sample = bits_per_sample_from_tag(src.read_u64(3)? as u8)
        .map_err(|msg| FormatError::new(src.current_bit_offset(), msg))?;
    if src.read_u64(1)? != 0 {
        return Err(FormatError::new(src.current_bit_offset(), "reserved bit is set").into());
    }

    let number = src.read_utf8_aligned()?;
    let offset = if variable_blocking {
        FrameOffset::StartSample(number)
    } else {
        if number >= 1 << 31 {
            return Err(FormatError::new(src.current_bit_offset(), "frame number overflow").into());
        }
        FrameOffset::Frame(number)
    };
    let block_size = read_block_size(src, block_size_tag)?;
    let sample_rate = read_sample_rate(src, sample_rate_tag)?;

    let computed = HEADER_CRC.checksum(src.captured());
    let stored = src.read_u64(8)? as u8;
    if check_crc && stored != computed {
        return Err(FormatError::new(src.current_bit_offset(), "header CRC mismatch").into());
    }

    if block_size > MAX_BLOCKSIZE {
        return Err(FormatError::new(src.current_bit_offset(), "block size too large").into());
    }
    if channel_assignment.channels() != stream_info.channels() {
        return Err(FormatError::new(
            src.current_bit_offset(),
            "channel count differs from STREAMINFO",
        )
        .into());
    }
    if bits_per_sample.is_some_and(|bps| bps != stream_info.bits_per_sample()) {
        return Err(FormatError::new(
            src.current_bit_offset(),
            "sample size differs from STREAMINFO",
        )
        .into());
    }

    Ok(FrameHeader {
        offset,
        block_size,
        sample_rate,
        channel_assignment,
        bits_per_sample,
    })
}

/// Pushes back the bytes of a rejected frame except its first byte, so that
/// the next sync search starts one byte after the rejected sync code.
pub fn rewind_after_sync<S: ByteSource>(src: &mut BitReader<S>) {
    src.skip_to_next_byte();
    let captured = src.take_capture();
    if captured.len() > 1 {
        src.unread(&captured[1..]);
    }
}

/// Decoder that keeps channel buffers across frames.
#[derive(Clone, Debug)]
pub struct FrameDecoder {
    channels: Vec<Vec<i64>>,
    block_size: usize,
}

impl FrameDecoder {
    /// Constructs `FrameDecoder` for a stream with `channels` channels.
    pub fn new(channels: usize) -> Self {
        Self {
            channels: vec![vec![]; channels],
            block_size: 0,
        }
    }

    /// Returns the decoded signal of the last frame, one buffer per channel.
    ///
    /// Only valid after [`FrameDecoder::decode`] succeeded.
    pub fn channels(&self) -> &[Vec<i64>] {
        &self.channels
    }

    /// Returns the block size of the last decoded frame.
    pub const fn block_size(&self) -> usize {
        self.block_size
    }

    /// Decodes a frame whose sync code has just been consumed.
    ///
    /// `frame_offset` is the byte offset of the sync code, used in errors.
    ///
    /// # Errors
    ///
    /// Returns `Format` error for malformed frames, `FrameCrcMismatch` when
    /// the footer doesn't match, and propagates reader errors. In all error
    /// cases, the capture of the reader is still active.
    pub fn decode<S: ByteSource>(
        &mut self,
        src: &mut BitReader<S>,
        sync_byte: u8,
        frame_offset: u64,
        stream_info: &StreamInfo,
        check_crc: bool,
    ) -> Result<FrameHeader, DecodeError> {
        let header = read_frame_header(src, sync_byte, stream_info, check_crc)?;
        let block_size = header.block_size();
        let bits_per_sample = stream_info.bits_per_sample();
        let assignment = header.channel_assignment();

        self.block_size = 0;
        for (ch, buf) in self.channels.iter_mut().enumerate() {
            buf.resize(block_size, 0);
            subframe::read_subframe(
                src,
                bits_per_sample + assignment.bits_per_sample_offset(ch),
                buf,
            )?;
        }
        src.skip_to_next_byte();
        let computed = FRAME_CRC.checksum(src.captured());
        let expected = src.read_u64(16)? as u16;
        if check_crc && computed != expected {
            return Err(DecodeError::FrameCrcMismatch {
                frame_offset,
                expected,
                actual: computed,
            });
        }

        self.block_size = block_size;
        self.decorrelate(assignment);
        Ok(header)
    }

    fn decorrelate(&mut self, assignment: ChannelAssignment) {
        let n = self.block_size;
        if let [ch0, ch1] = &mut self.channels[..] {
            let (ch0, ch1) = (&mut ch0[..n], &mut ch1[..n]);
            match assignment {
                ChannelAssignment::Independent(_) => {}
                ChannelAssignment::LeftSide => {
                    for (l, s) in ch0.iter().zip(ch1.iter_mut()) {
                        *s = l.wrapping_sub(*s);
                    }
                }
                ChannelAssignment::RightSide => {
                    for (s, r) in ch0.iter_mut().zip(ch1.iter()) {
                        *s = s.wrapping_add(*r);
                    }
                }
                ChannelAssignment::MidSide => {
                    for (m, s) in ch0.iter_mut().zip(ch1.iter_mut()) {
                        let side = *s;
                        let mid = (*m << 1) | (side & 1);
                        *m = mid.wrapping_add(side) >> 1;
                        *s = mid.wrapping_sub(side) >> 1;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::rstest;

    use crate::metadata;
    use crate::source::MemSource;
    use crate::test_helper::test_signal;
    use crate::test_helper::BitWriter;
    use crate::test_helper::ChannelMode;
    use crate::test_helper::ResidualCoding;
    use crate::test_helper::StreamBuilder;
    use crate::test_helper::SubframeKind;
    use crate::test_helper::TestStream;

    fn open(stream: &TestStream) -> (BitReader<MemSource>, StreamInfo) {
        let mut src = BitReader::new(MemSource::new(stream.bytes.clone()), 256);
        let meta = metadata::read_metadata(&mut src).unwrap();
        (src, meta.stream_info().clone())
    }

    /// Decodes all frames and returns interleaved samples.
    fn decode_all(stream: &TestStream) -> Vec<i32> {
        let (mut src, info) = open(stream);
        let mut dec = FrameDecoder::new(info.channels());
        let mut ret = vec![];
        for f in &stream.frames {
            let (sync, skipped) = find_sync(&mut src, 0).unwrap().unwrap();
            assert_eq!(skipped, 0);
            src.start_capture(&[0xFF, sync]);
            let header = dec
                .decode(&mut src, sync, f.offset as u64, &info, true)
                .unwrap();
            src.stop_capture();
            assert_eq!(header.first_sample(&info), f.first_sample);
            assert_eq!(header.block_size(), f.block_size);
            let chs = dec.channels();
            for t in 0..dec.block_size() {
                for ch in chs {
                    ret.push(ch[t] as i32);
                }
            }
        }
        assert!(find_sync(&mut src, 0).unwrap_err().is_stream_ended());
        ret
    }

    #[test]
    fn channel_assignment_tags() {
        assert_eq!(
            ChannelAssignment::from_tag(0),
            Some(ChannelAssignment::Independent(1))
        );
        assert_eq!(
            ChannelAssignment::from_tag(7),
            Some(ChannelAssignment::Independent(8))
        );
        assert_eq!(ChannelAssignment::from_tag(10), Some(ChannelAssignment::MidSide));
        assert_eq!(ChannelAssignment::from_tag(11), None);
        assert_eq!(ChannelAssignment::RightSide.bits_per_sample_offset(0), 1);
        assert_eq!(ChannelAssignment::RightSide.bits_per_sample_offset(1), 0);
        assert_eq!(ChannelAssignment::MidSide.bits_per_sample_offset(1), 1);
    }

    #[rstest]
    fn decodes_every_channel_mode(
        #[values(
            ChannelMode::Independent,
            ChannelMode::LeftSide,
            ChannelMode::RightSide,
            ChannelMode::MidSide
        )]
        mode: ChannelMode,
        #[values(SubframeKind::Verbatim, SubframeKind::Fixed(1), SubframeKind::Fixed(3))]
        kind: SubframeKind,
    ) {
        let signal = test_signal(2, 3000, 16, 7);
        let stream = StreamBuilder::new(44100, 2, 16)
            .block_size(1152)
            .channel_mode(mode)
            .subframe(kind)
            .build(&signal);
        assert_eq!(decode_all(&stream), signal);
    }

    #[rstest]
    #[case(8000, 8, 192)]
    #[case(22050, 12, 576)]
    #[case(96000, 24, 4608)]
    #[case(12000, 20, 100)] // kHz sample rate code, 8-bit block size
    #[case(11025, 16, 300)] // Hz sample rate code, 16-bit block size
    #[case(110_250, 16, 512)] // daHz sample rate code
    fn decodes_header_codes(
        #[case] sample_rate: usize,
        #[case] bits_per_sample: usize,
        #[case] block_size: usize,
    ) {
        let signal = test_signal(1, 1000, bits_per_sample, 3);
        let stream = StreamBuilder::new(sample_rate, 1, bits_per_sample)
            .block_size(block_size)
            .subframe(SubframeKind::Fixed(2))
            .build(&signal);
        assert_eq!(decode_all(&stream), signal);

        let (mut src, info) = open(&stream);
        let (sync, _) = find_sync(&mut src, 0).unwrap().unwrap();
        src.start_capture(&[0xFF, sync]);
        let header = read_frame_header(&mut src, sync, &info, true).unwrap();
        assert_eq!(header.sample_rate(), Some(sample_rate));
        assert_eq!(header.bits_per_sample(), Some(bits_per_sample));
    }

    #[test]
    fn variable_blocking_and_deferred_header_fields() {
        let signal = test_signal(1, 5000, 16, 4);
        let stream = StreamBuilder::new(44100, 1, 16)
            .variable_block_sizes(&[1000, 333, 4096])
            .defer_to_stream_info()
            .residual(ResidualCoding::Escaped, 0)
            .subframe(SubframeKind::Fixed(4))
            .build(&signal);
        assert_eq!(decode_all(&stream), signal);
    }

    #[test]
    fn wasted_bits_and_lpc() {
        let signal: Vec<i32> = test_signal(2, 2048, 24, 5)
            .into_iter()
            .map(|x| (x >> 3) << 3)
            .collect();
        let stream = StreamBuilder::new(48000, 2, 24)
            .block_size(1024)
            .wasted_bits(3)
            .subframe(SubframeKind::Lpc {
                coefs: vec![1900, -880],
                precision: 13,
                shift: 10,
            })
            .build(&signal);
        assert_eq!(decode_all(&stream), signal);
    }

    #[test]
    fn detects_crc_mismatch() {
        let signal = test_signal(1, 1024, 16, 8);
        let mut stream = StreamBuilder::new(44100, 1, 16)
            .block_size(1024)
            .build(&signal);
        let f = stream.frames[0];
        stream.bytes[f.offset + f.len / 2] ^= 0x10;

        let (mut src, info) = open(&stream);
        let mut dec = FrameDecoder::new(1);
        let (sync, _) = find_sync(&mut src, 0).unwrap().unwrap();
        src.start_capture(&[0xFF, sync]);
        let err = dec
            .decode(&mut src, sync, f.offset as u64, &info, true)
            .unwrap_err();
        assert!(matches!(
            err,
            DecodeError::FrameCrcMismatch { frame_offset, .. } if frame_offset == f.offset as u64
        ));
        assert!(err.is_recoverable());

        // the same frame is accepted when CRC is not checked.
        let (mut src, info) = open(&stream);
        let (sync, _) = find_sync(&mut src, 0).unwrap().unwrap();
        src.start_capture(&[0xFF, sync]);
        assert!(dec
            .decode(&mut src, sync, f.offset as u64, &info, false)
            .is_ok());
    }

    #[test]
    fn detects_header_corruption() {
        let signal = test_signal(1, 1024, 16, 8);
        let mut stream = StreamBuilder::new(44100, 1, 16)
            .block_size(1024)
            .build(&signal);
        let f = stream.frames[0];
        // frame number byte.
        stream.bytes[f.offset + 4] = 0x05;
        let (mut src, info) = open(&stream);
        let (sync, _) = find_sync(&mut src, 0).unwrap().unwrap();
        src.start_capture(&[0xFF, sync]);
        assert!(matches!(
            read_frame_header(&mut src, sync, &info, true),
            Err(DecodeError::Format(_))
        ));
    }

    #[test]
    fn rejects_channel_mismatch() {
        let signal = test_signal(2, 512, 16, 9);
        let stereo = StreamBuilder::new(44100, 2, 16)
            .block_size(512)
            .build(&signal);
        let mono_header = StreamBuilder::new(44100, 1, 16).build(&signal[..512]);
        let (_, mono_info) = open(&mono_header);

        let mut src = BitReader::new(MemSource::new(stereo.bytes.clone()), 64);
        src.skip_bytes(stereo.first_frame_offset as u64).unwrap();
        let (sync, _) = find_sync(&mut src, 0).unwrap().unwrap();
        src.start_capture(&[0xFF, sync]);
        assert!(read_frame_header(&mut src, sync, &mono_info, true).is_err());
    }

    #[test]
    fn sync_search_skips_garbage() {
        let mut w = BitWriter::new();
        for b in [0x00u8, 0xFF, 0xFF, 0xF0, 0x12, 0xFF, 0xFF, 0xF9, 0xAA] {
            w.write(u64::from(b), 8);
        }
        let mut src = BitReader::new(MemSource::new(w.into_bytes()), 4);
        assert_eq!(find_sync(&mut src, 100).unwrap(), Some((0xF9, 6)));
        assert_eq!(src.byte_offset(), 8);

        let mut src = BitReader::new(MemSource::new(vec![0u8; 64]), 4);
        assert_eq!(find_sync(&mut src, 10).unwrap(), None);
        assert!(src.byte_offset() <= 12);
    }

    #[test]
    fn rewinding_restarts_after_sync_byte() {
        let mut src = BitReader::new(MemSource::new(vec![0xFF, 0xF8, 0xFF, 0xF8, 0x00]), 2);
        let (sync, _) = find_sync(&mut src, 0).unwrap().unwrap();
        src.start_capture(&[0xFF, sync]);
        let _ = src.read_u64(12).unwrap();
        rewind_after_sync(&mut src);
        assert_eq!(src.byte_offset(), 1);
        assert_eq!(find_sync(&mut src, 8).unwrap(), Some((0xF8, 1)));
    }
}
