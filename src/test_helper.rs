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

#![allow(clippy::missing_panics_doc)]

use std::io::Cursor;

use md5::Digest;
use rand::Rng;
use rand::SeedableRng;

use super::frame::FRAME_CRC;
use super::frame::HEADER_CRC;

/// Inverse of `rice::decode_signbit`.
pub const fn encode_signbit(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}

/// Number of bits needed to store `v` as a two's complement integer.
const fn signed_width(v: i64) -> usize {
    if v == 0 {
        0
    } else if v > 0 {
        65 - v.leading_zeros() as usize
    } else {
        65 - (!v).leading_zeros() as usize
    }
}

/// How residual partitions are written by [`BitWriter::write_residual`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResidualCoding {
    /// Coding method 0 (4-bit parameters).
    Rice,
    /// Coding method 1 (5-bit parameters).
    Rice5,
    /// Every partition uses the escape code with raw samples.
    Escaped,
}

/// MSB-first bit writer used to synthesize test bitstreams.
#[derive(Clone, Debug, Default)]
pub struct BitWriter {
    bytes: Vec<u8>,
    bit: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_bit(&mut self, b: bool) {
        if self.bit == 0 {
            self.bytes.push(0u8);
        }
        if b {
            *self.bytes.last_mut().unwrap() |= 0x80 >> self.bit;
        }
        self.bit = (self.bit + 1) % 8;
    }

    /// Writes the lowest `bits` bits of `value`.
    pub fn write(&mut self, value: u64, bits: usize) {
        assert!(bits <= 64);
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
    }

    pub fn write_signed(&mut self, value: i64, bits: usize) {
        assert!(
            bits >= signed_width(value),
            "{value} does not fit in {bits} bits"
        );
        let mask = if bits == 64 {
            u64::MAX
        } else {
            (1u64 << bits) - 1
        };
        self.write(value as u64 & mask, bits);
    }

    pub fn write_unary(&mut self, count: u32) {
        for _ in 0..count {
            self.push_bit(false);
        }
        self.push_bit(true);
    }

    /// Writes FLAC's UTF-8-like number.
    pub fn write_utf8(&mut self, v: u64) {
        self.align();
        if v < 0x80 {
            self.write(v, 8);
            return;
        }
        let bits = 64 - v.leading_zeros() as usize;
        let nbytes = match bits {
            0..=11 => 2,
            12..=16 => 3,
            17..=21 => 4,
            22..=26 => 5,
            27..=31 => 6,
            32..=36 => 7,
            _ => panic!("{v} is too large for UTF-8 coding"),
        };
        let prefix = (0xFF00u64 >> nbytes) & 0xFF;
        self.write(prefix | (v >> (6 * (nbytes - 1))), 8);
        for k in (0..nbytes - 1).rev() {
            self.write(0x80 | ((v >> (6 * k)) & 0x3F), 8);
        }
    }

    /// Pads zeros up to the next byte boundary.
    pub fn align(&mut self) {
        while self.bit != 0 {
            self.push_bit(false);
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    /// Writes residual section for `residual[warmup_length..]`.
    pub fn write_residual(
        &mut self,
        residual: &[i64],
        warmup_length: usize,
        partition_order: usize,
        coding: ResidualCoding,
    ) {
        let (method, param_bits) = match coding {
            ResidualCoding::Rice | ResidualCoding::Escaped => (0, 4),
            ResidualCoding::Rice5 => (1, 5),
        };
        let escape = (1u64 << param_bits) - 1;
        self.write(method, 2);
        self.write(partition_order as u64, 4);
        let part_len = residual.len() >> partition_order;
        assert_eq!(part_len << partition_order, residual.len());
        assert!(part_len >= warmup_length);
        for p in 0..(1usize << partition_order) {
            let start = if p == 0 { warmup_length } else { p * part_len };
            let part = &residual[start..(p + 1) * part_len];
            if coding == ResidualCoding::Escaped {
                let width = part.iter().map(|x| signed_width(*x)).max().unwrap_or(0);
                assert!(width < 32);
                self.write(escape, param_bits);
                self.write(width as u64, 5);
                for x in part {
                    self.write_signed(*x, width);
                }
            } else {
                let param = choose_rice_parameter(part, escape as usize - 1);
                self.write(param as u64, param_bits);
                for x in part {
                    let u = encode_signbit(*x);
                    self.write_unary((u >> param) as u32);
                    self.write(u & ((1u64 << param) - 1), param);
                }
            }
        }
    }
}

fn choose_rice_parameter(part: &[i64], max_param: usize) -> usize {
    if part.is_empty() {
        return 0;
    }
    let mean = part.iter().map(|x| encode_signbit(*x)).sum::<u64>() / part.len() as u64;
    let p = 64 - mean.leading_zeros() as usize;
    p.saturating_sub(1).min(max_param)
}

/// Predictor coefficients of fixed LPC, most recent sample first.
pub const FIXED_COEFS: [&[i64]; 5] = [&[], &[1], &[2, -1], &[3, -3, 1], &[4, -6, 4, -1]];

/// Computes prediction error of `x`. The first `coefs.len()` elements are zero.
pub fn lpc_residual(x: &[i64], coefs: &[i64], shift: usize) -> Vec<i64> {
    let order = coefs.len();
    let mut residual = vec![0i64; x.len()];
    for t in order..x.len() {
        let pred: i64 = coefs
            .iter()
            .enumerate()
            .map(|(j, c)| c * x[t - 1 - j])
            .sum();
        residual[t] = x[t] - (pred >> shift);
    }
    residual
}

/// Prediction method used for all subframes written by [`StreamBuilder`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SubframeKind {
    Verbatim,
    /// Constant subframe when the block is constant, verbatim otherwise.
    Constant,
    Fixed(usize),
    Lpc {
        coefs: Vec<i64>,
        precision: usize,
        shift: usize,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChannelMode {
    Independent,
    LeftSide,
    RightSide,
    MidSide,
}

/// Location of an encoded frame in a [`TestStream`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameInfo {
    pub offset: usize,
    pub len: usize,
    pub first_sample: u64,
    pub block_size: usize,
}

/// Encoded test stream with the information needed to check the decoder.
#[derive(Clone, Debug)]
pub struct TestStream {
    pub bytes: Vec<u8>,
    pub first_frame_offset: usize,
    pub frames: Vec<FrameInfo>,
    /// Interleaved input signal.
    pub samples: Vec<i32>,
    pub channels: usize,
    pub bits_per_sample: usize,
}

impl TestStream {
    /// Returns the signal packed as little-endian bytes of the given width.
    pub fn packed(&self, bytes_per_sample: usize) -> Vec<u8> {
        pack_samples(&self.samples, bytes_per_sample)
    }

    /// Returns the interleaved samples from PCM frame `from`.
    pub fn samples_from(&self, from: usize) -> &[i32] {
        &self.samples[(from * self.channels).min(self.samples.len())..]
    }

    pub fn total_samples(&self) -> usize {
        self.samples.len() / self.channels
    }
}

pub fn pack_samples(samples: &[i32], bytes_per_sample: usize) -> Vec<u8> {
    let mut ret = Vec::with_capacity(samples.len() * bytes_per_sample);
    for v in samples {
        ret.extend_from_slice(&v.to_le_bytes()[..bytes_per_sample]);
    }
    ret
}

/// Builder for minimal FLAC streams.
#[derive(Clone, Debug)]
pub struct StreamBuilder {
    sample_rate: usize,
    channels: usize,
    bits_per_sample: usize,
    block_sizes: Vec<usize>,
    variable_blocking: bool,
    subframe: SubframeKind,
    channel_mode: ChannelMode,
    wasted_bits: usize,
    residual_coding: ResidualCoding,
    partition_order: usize,
    seek_interval: Option<usize>,
    comments: Option<(String, Vec<String>)>,
    padding: Option<usize>,
    known_total: bool,
    header_rate_and_bits: bool,
}

impl StreamBuilder {
    pub fn new(sample_rate: usize, channels: usize, bits_per_sample: usize) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
            block_sizes: vec![4096],
            variable_blocking: false,
            subframe: SubframeKind::Verbatim,
            channel_mode: ChannelMode::Independent,
            wasted_bits: 0,
            residual_coding: ResidualCoding::Rice,
            partition_order: 2,
            seek_interval: None,
            comments: None,
            padding: None,
            known_total: true,
            header_rate_and_bits: true,
        }
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_sizes = vec![block_size];
        self.variable_blocking = false;
        self
    }

    /// Uses the variable blocking strategy cycling through `block_sizes`.
    pub fn variable_block_sizes(mut self, block_sizes: &[usize]) -> Self {
        self.block_sizes = block_sizes.to_vec();
        self.variable_blocking = true;
        self
    }

    pub fn subframe(mut self, kind: SubframeKind) -> Self {
        self.subframe = kind;
        self
    }

    pub fn channel_mode(mut self, mode: ChannelMode) -> Self {
        assert!(mode == ChannelMode::Independent || self.channels == 2);
        self.channel_mode = mode;
        self
    }

    /// Signals `bits` wasted bits in every subframe. Input samples must be
    /// multiples of `1 << bits`.
    pub fn wasted_bits(mut self, bits: usize) -> Self {
        self.wasted_bits = bits;
        self
    }

    pub fn residual(mut self, coding: ResidualCoding, partition_order: usize) -> Self {
        self.residual_coding = coding;
        self.partition_order = partition_order;
        self
    }

    /// Adds SEEKTABLE with a point every `frames` frames and one placeholder.
    pub fn seek_table(mut self, frames: usize) -> Self {
        self.seek_interval = Some(frames);
        self
    }

    pub fn vorbis_comment(mut self, vendor: &str, comments: &[&str]) -> Self {
        self.comments = Some((
            vendor.to_owned(),
            comments.iter().map(|s| (*s).to_owned()).collect(),
        ));
        self
    }

    pub fn padding(mut self, len: usize) -> Self {
        self.padding = Some(len);
        self
    }

    /// Writes zero as the total number of samples in STREAMINFO.
    pub fn unknown_total(mut self) -> Self {
        self.known_total = false;
        self
    }

    /// Makes frame headers refer to STREAMINFO for sample rate and bit depth.
    pub fn defer_to_stream_info(mut self) -> Self {
        self.header_rate_and_bits = false;
        self
    }

    /// Encodes interleaved `samples`.
    pub fn build(&self, samples: &[i32]) -> TestStream {
        assert_eq!(samples.len() % self.channels, 0);
        let total = samples.len() / self.channels;

        let mut frames_bytes: Vec<Vec<u8>> = vec![];
        let mut frames: Vec<FrameInfo> = vec![];
        let mut t = 0;
        let mut n = 0;
        while t < total {
            let bs = self.block_sizes[n % self.block_sizes.len()].min(total - t);
            let block = &samples[t * self.channels..(t + bs) * self.channels];
            let number = if self.variable_blocking { t as u64 } else { n as u64 };
            let bytes = self.encode_frame(block, bs, number);
            frames.push(FrameInfo {
                offset: 0,
                len: bytes.len(),
                first_sample: t as u64,
                block_size: bs,
            });
            frames_bytes.push(bytes);
            t += bs;
            n += 1;
        }

        let mut blocks: Vec<(u8, Vec<u8>)> = vec![(0, self.stream_info_payload(samples, &frames))];
        if let Some(interval) = self.seek_interval {
            let mut payload = BitWriter::new();
            let mut offset = 0usize;
            for (i, f) in frames.iter().enumerate() {
                if i % interval == 0 {
                    payload.write(f.first_sample, 64);
                    payload.write(offset as u64, 64);
                    payload.write(f.block_size as u64, 16);
                }
                offset += f.len;
            }
            payload.write(u64::MAX, 64);
            payload.write(0, 64);
            payload.write(0, 16);
            blocks.push((3, payload.into_bytes()));
        }
        if let Some((vendor, comments)) = &self.comments {
            let mut payload = vec![];
            payload.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
            payload.extend_from_slice(vendor.as_bytes());
            payload.extend_from_slice(&(comments.len() as u32).to_le_bytes());
            for c in comments {
                payload.extend_from_slice(&(c.len() as u32).to_le_bytes());
                payload.extend_from_slice(c.as_bytes());
            }
            blocks.push((4, payload));
        }
        if let Some(len) = self.padding {
            blocks.push((1, vec![0u8; len]));
        }

        let mut bytes = b"fLaC".to_vec();
        let nblocks = blocks.len();
        for (i, (block_type, payload)) in blocks.into_iter().enumerate() {
            let last = if i + 1 == nblocks { 0x80 } else { 0x00 };
            bytes.push(last | block_type);
            bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes()[1..]);
            bytes.extend_from_slice(&payload);
        }
        let first_frame_offset = bytes.len();
        for (f, b) in frames.iter_mut().zip(frames_bytes) {
            f.offset = bytes.len();
            bytes.extend_from_slice(&b);
        }
        TestStream {
            bytes,
            first_frame_offset,
            frames,
            samples: samples.to_vec(),
            channels: self.channels,
            bits_per_sample: self.bits_per_sample,
        }
    }

    fn stream_info_payload(&self, samples: &[i32], frames: &[FrameInfo]) -> Vec<u8> {
        let min_block = *self.block_sizes.iter().min().unwrap();
        let max_block = *self.block_sizes.iter().max().unwrap();
        let min_frame = frames.iter().map(|f| f.len).min().unwrap_or(0);
        let max_frame = frames.iter().map(|f| f.len).max().unwrap_or(0);
        let total = if self.known_total {
            (samples.len() / self.channels) as u64
        } else {
            0
        };
        let mut md5 = md5::Md5::new();
        md5.update(pack_samples(samples, (self.bits_per_sample + 7) / 8));

        let mut w = BitWriter::new();
        w.write(min_block as u64, 16);
        w.write(max_block as u64, 16);
        w.write(min_frame as u64, 24);
        w.write(max_frame as u64, 24);
        w.write(self.sample_rate as u64, 20);
        w.write(self.channels as u64 - 1, 3);
        w.write(self.bits_per_sample as u64 - 1, 5);
        w.write(total, 36);
        let mut bytes = w.into_bytes();
        bytes.extend_from_slice(&md5.finalize());
        bytes
    }

    fn block_size_code(bs: usize) -> (u64, Option<(u64, usize)>) {
        match bs {
            192 => (1, None),
            576 | 1152 | 2304 | 4608 => (2 + u64::from((bs / 576).trailing_zeros()), None),
            256 | 512 | 1024 | 2048 | 4096 | 8192 | 16384 | 32768 => {
                (8 + u64::from((bs / 256).trailing_zeros()), None)
            }
            1..=256 => (6, Some((bs as u64 - 1, 8))),
            _ => (7, Some((bs as u64 - 1, 16))),
        }
    }

    fn sample_rate_code(&self) -> (u64, Option<(u64, usize)>) {
        const TABLE: [usize; 11] = [
            88200, 176_400, 192_000, 8000, 16000, 22050, 24000, 32000, 44100, 48000, 96000,
        ];
        let rate = self.sample_rate;
        if !self.header_rate_and_bits {
            return (0, None);
        }
        if let Some(i) = TABLE.iter().position(|r| *r == rate) {
            (i as u64 + 1, None)
        } else if rate % 1000 == 0 && rate / 1000 < 256 {
            (12, Some((rate as u64 / 1000, 8)))
        } else if rate < 65536 {
            (13, Some((rate as u64, 16)))
        } else if rate % 10 == 0 && rate / 10 < 65536 {
            (14, Some((rate as u64 / 10, 16)))
        } else {
            (0, None)
        }
    }

    fn bits_per_sample_code(&self) -> u64 {
        if !self.header_rate_and_bits {
            return 0;
        }
        match self.bits_per_sample {
            8 => 1,
            12 => 2,
            16 => 4,
            20 => 5,
            24 => 6,
            32 => 7,
            _ => 0,
        }
    }

    fn encode_frame(&self, block: &[i32], bs: usize, number: u64) -> Vec<u8> {
        let nch = self.channels;
        let mut w = BitWriter::new();
        w.write(0b11_1111_1111_1110, 14);
        w.write(0, 1);
        w.write(u64::from(self.variable_blocking), 1);
        let (bs_code, bs_extra) = Self::block_size_code(bs);
        let (sr_code, sr_extra) = self.sample_rate_code();
        w.write(bs_code, 4);
        w.write(sr_code, 4);
        let ch_code = match self.channel_mode {
            ChannelMode::Independent => nch as u64 - 1,
            ChannelMode::LeftSide => 8,
            ChannelMode::RightSide => 9,
            ChannelMode::MidSide => 10,
        };
        w.write(ch_code, 4);
        w.write(self.bits_per_sample_code(), 3);
        w.write(0, 1);
        w.write_utf8(number);
        if let Some((v, bits)) = bs_extra {
            w.write(v, bits);
        }
        if let Some((v, bits)) = sr_extra {
            w.write(v, bits);
        }
        let crc8 = HEADER_CRC.checksum(w.as_bytes());
        w.write(u64::from(crc8), 8);

        let planar: Vec<Vec<i64>> = (0..nch)
            .map(|ch| (0..bs).map(|t| i64::from(block[t * nch + ch])).collect())
            .collect();
        let coded: Vec<(Vec<i64>, usize)> = match self.channel_mode {
            ChannelMode::Independent => planar
                .into_iter()
                .map(|x| (x, self.bits_per_sample))
                .collect(),
            ChannelMode::LeftSide | ChannelMode::RightSide | ChannelMode::MidSide => {
                let (l, r) = (&planar[0], &planar[1]);
                let side: Vec<i64> = l.iter().zip(r).map(|(a, b)| a - b).collect();
                let bps = self.bits_per_sample;
                match self.channel_mode {
                    ChannelMode::LeftSide => vec![(l.clone(), bps), (side, bps + 1)],
                    ChannelMode::RightSide => vec![(side, bps + 1), (r.clone(), bps)],
                    _ => {
                        let mid = l.iter().zip(r).map(|(a, b)| (a + b) >> 1).collect();
                        vec![(mid, bps), (side, bps + 1)]
                    }
                }
            }
        };
        for (signal, bps) in &coded {
            self.encode_subframe(&mut w, signal, *bps);
        }
        w.align();
        let crc16 = FRAME_CRC.checksum(w.as_bytes());
        w.write(u64::from(crc16), 16);
        w.into_bytes()
    }

    fn encode_subframe(&self, w: &mut BitWriter, signal: &[i64], bps: usize) {
        let wasted = self.wasted_bits;
        assert!(signal.iter().all(|x| x % (1i64 << wasted) == 0));
        let x: Vec<i64> = signal.iter().map(|v| v >> wasted).collect();
        let bps = bps - wasted;
        let write_wasted = |w: &mut BitWriter| {
            if wasted == 0 {
                w.write(0, 1);
            } else {
                w.write(1, 1);
                w.write_unary(wasted as u32 - 1);
            }
        };

        let is_constant = x.iter().all(|v| *v == x[0]);
        let order = match &self.subframe {
            SubframeKind::Fixed(order) => *order,
            SubframeKind::Lpc { coefs, .. } => coefs.len(),
            SubframeKind::Verbatim | SubframeKind::Constant => 0,
        };
        let kind = match &self.subframe {
            SubframeKind::Constant if !is_constant => &SubframeKind::Verbatim,
            _ if order > x.len() => &SubframeKind::Verbatim,
            k => k,
        };

        match kind {
            SubframeKind::Constant => {
                w.write(0, 1);
                w.write(0, 6);
                write_wasted(w);
                w.write_signed(x[0], bps);
            }
            SubframeKind::Verbatim => {
                w.write(0, 1);
                w.write(1, 6);
                write_wasted(w);
                for v in &x {
                    w.write_signed(*v, bps);
                }
            }
            SubframeKind::Fixed(order) => {
                let order = *order;
                w.write(0, 1);
                w.write(8 + order as u64, 6);
                write_wasted(w);
                for v in &x[..order] {
                    w.write_signed(*v, bps);
                }
                let residual = lpc_residual(&x, FIXED_COEFS[order], 0);
                self.write_residual_part(w, &residual, order);
            }
            SubframeKind::Lpc {
                coefs,
                precision,
                shift,
            } => {
                let order = coefs.len();
                w.write(0, 1);
                w.write(31 + order as u64, 6);
                write_wasted(w);
                for v in &x[..order] {
                    w.write_signed(*v, bps);
                }
                w.write(*precision as u64 - 1, 4);
                w.write_signed(*shift as i64, 5);
                for c in coefs {
                    w.write_signed(*c, *precision);
                }
                let residual = lpc_residual(&x, coefs, *shift);
                self.write_residual_part(w, &residual, order);
            }
        }
    }

    fn write_residual_part(&self, w: &mut BitWriter, residual: &[i64], order: usize) {
        let mut po = self.partition_order;
        while po > 0 && (residual.len() % (1 << po) != 0 || (residual.len() >> po) < order) {
            po -= 1;
        }
        w.write_residual(residual, order, po, self.residual_coding);
    }
}

/// Generates interleaved noisy sinusoids that fit in `bits_per_sample` bits.
pub fn test_signal(channels: usize, len: usize, bits_per_sample: usize, seed: u64) -> Vec<i32> {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let amp = ((1i64 << (bits_per_sample - 1)) - 1) as f64;
    let lim = (1i64 << (bits_per_sample - 1)) - 1;
    let mut ret = Vec::with_capacity(channels * len);
    for t in 0..len {
        for ch in 0..channels {
            let phase = t as f64 * 0.01 * (ch + 1) as f64;
            let noise: f64 = rng.gen_range(-0.05..0.05);
            let v = (amp * 0.8).mul_add(phase.sin(), amp * noise) as i64;
            ret.push(v.clamp(-lim - 1, lim) as i32);
        }
    }
    ret
}

/// Decodes `bytes` with `claxon` as an independent reference.
pub fn decode_with_claxon(bytes: &[u8]) -> Vec<i32> {
    let mut reader =
        claxon::FlacReader::new(Cursor::new(bytes)).expect("claxon failed to read the header");
    reader
        .samples()
        .map(|s| s.expect("claxon failed to decode"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claxon_accepts_written_streams() {
        let signal = test_signal(2, 5000, 16, 1);
        for mode in [
            ChannelMode::Independent,
            ChannelMode::LeftSide,
            ChannelMode::RightSide,
            ChannelMode::MidSide,
        ] {
            let stream = StreamBuilder::new(44100, 2, 16)
                .block_size(1152)
                .channel_mode(mode)
                .subframe(SubframeKind::Fixed(2))
                .build(&signal);
            assert_eq!(decode_with_claxon(&stream.bytes), signal);
        }
    }

    #[test]
    fn frame_offsets_are_recorded() {
        let signal = test_signal(1, 3000, 16, 2);
        let stream = StreamBuilder::new(44100, 1, 16)
            .block_size(1024)
            .seek_table(1)
            .build(&signal);
        assert_eq!(stream.frames.len(), 3);
        assert_eq!(stream.frames[0].offset, stream.first_frame_offset);
        assert_eq!(stream.frames[2].block_size, 3000 - 2048);
        for f in &stream.frames {
            assert_eq!(&stream.bytes[f.offset..f.offset + 2], &[0xFF, 0xF8]);
        }
    }
}
