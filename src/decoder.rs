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

//! Pull-based decoding engine.

use std::fmt;

use md5::Digest;

use crate::bitsource::BitReader;
use crate::config;
use crate::config::OutputFormat;
use crate::error::DecodeError;
use crate::error::Verify;
use crate::frame::find_sync;
use crate::frame::rewind_after_sync;
use crate::frame::FrameDecoder;
use crate::metadata::read_metadata;
use crate::metadata::Metadata;
use crate::metadata::StreamInfo;
use crate::pcm::interleave_into;
use crate::pcm::PcmBuffer;
use crate::seek;
use crate::seek::Located;
use crate::source::ByteSource;

/// Lifecycle state of [`FlacDecoder`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DecoderState {
    /// Metadata is parsed and no frame is decoded yet.
    Ready,
    /// At least one frame is decoded, or a seek has completed.
    Decoding,
    /// The stream ended cleanly. Buffered PCM can still be read.
    Exhausted,
    /// An unrecoverable error occurred.
    Errored,
    /// [`FlacDecoder::release`] was called.
    Released,
}

/// Counters of decoding events.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct DecodeStats {
    /// Number of frames decoded successfully.
    pub frames_decoded: u64,
    /// Number of frames rejected because of CRC mismatch or malformed data.
    pub frames_dropped: u64,
    /// Number of bytes skipped while searching for frame sync codes.
    pub bytes_skipped: u64,
}

/// Everything owned by a live decoder. Dropped on release.
struct Engine<S> {
    reader: BitReader<S>,
    metadata: Metadata,
    frames: FrameDecoder,
    pcm: PcmBuffer,
    /// Sample index of the next frame to be decoded.
    position: u64,
    /// Number of leading samples to drop from the following frames.
    pending_skip: u64,
    md5: Option<md5::Md5>,
    md5_scratch: Vec<u8>,
    md5_verified: Option<bool>,
}

impl<S: ByteSource> Engine<S> {
    /// Decodes frames until one produces output. Returns false at a clean end
    /// of the stream.
    fn decode_next(
        &mut self,
        config: &config::Decoder,
        stats: &mut DecodeStats,
    ) -> Result<bool, DecodeError> {
        let info = self.metadata.stream_info();
        let search_start = self.reader.byte_offset();
        let mut skipped = 0usize;
        // Start of a frame that ran past the end of the stream.
        let mut truncated: Option<u64> = None;
        loop {
            let max_skip = config.max_resync_bytes.saturating_sub(skipped);
            let (sync, n) = match find_sync(&mut self.reader, max_skip) {
                Ok(Some(found)) => found,
                Ok(None) => return Err(DecodeError::UnrecoverableStreamCorruption { search_start }),
                Err(e) if e.is_stream_ended() => {
                    return truncated.map_or(Ok(false), |offset| {
                        Err(DecodeError::UnrecoverableStreamCorruption {
                            search_start: offset,
                        })
                    })
                }
                Err(e) => return Err(e),
            };
            skipped += n;
            stats.bytes_skipped += n as u64;
            let offset = self.reader.byte_offset() - 2;

            self.reader.start_capture(&[0xFF, sync]);
            let header = match self
                .frames
                .decode(&mut self.reader, sync, offset, info, config.check_crc)
            {
                Ok(header) => header,
                Err(e) if e.is_recoverable() || e.is_stream_ended() => {
                    log::warn!("dropping frame at byte {offset}: {e}");
                    if e.is_stream_ended() {
                        truncated.get_or_insert(offset);
                    }
                    stats.frames_dropped += 1;
                    rewind_after_sync(&mut self.reader);
                    skipped += 1;
                    stats.bytes_skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.reader.stop_capture();
            truncated = None;
            stats.frames_decoded += 1;
            if n > 0 {
                log::debug!(
                    target: "flacstream::decoder",
                    "{{ msg: \"resynchronized\", skipped: {}, frame_offset: {} }}",
                    n, offset
                );
            }

            if let Some(md5) = &mut self.md5 {
                self.md5_scratch.clear();
                interleave_into(
                    self.frames.channels(),
                    0,
                    info.bits_per_sample(),
                    OutputFormat::Native,
                    &mut self.md5_scratch,
                );
                md5.update(&self.md5_scratch);
            }

            let block_size = header.block_size() as u64;
            self.position += block_size;
            if self.pending_skip >= block_size {
                self.pending_skip -= block_size;
                continue;
            }
            self.pcm
                .append(self.frames.channels(), self.pending_skip as usize);
            self.pending_skip = 0;
            return Ok(true);
        }
    }

    fn finish(&mut self) {
        self.pending_skip = 0;
        if let Some(md5) = self.md5.take() {
            let expected = self.metadata.stream_info().md5();
            let ok = md5.finalize().as_slice() == expected.as_slice();
            if !ok {
                log::warn!("MD5 of the decoded signal doesn't match STREAMINFO");
            }
            self.md5_verified = Some(ok);
        }
    }

    /// Moves to `target` on a seekable source. Returns true if the stream
    /// ended before `target`.
    fn relocate(&mut self, config: &config::Decoder, target: u64) -> Result<bool, DecodeError> {
        let located = seek::locate(
            &mut self.reader,
            &self.metadata,
            &mut self.frames,
            config,
            target,
        )?;
        self.pcm.clear();
        match located {
            Located::Frame {
                offset,
                first_sample,
            } => {
                self.reader.seek(offset)?;
                self.position = first_sample;
                self.pending_skip = if config.sample_accurate_seek {
                    target.saturating_sub(first_sample)
                } else {
                    0
                };
                Ok(false)
            }
            Located::End { position } => {
                self.position = position;
                self.pending_skip = 0;
                Ok(true)
            }
        }
    }
}

/// Streaming FLAC decoder over a [`ByteSource`].
///
/// Decoding is driven by the caller: [`FlacDecoder::step`] decodes one frame
/// into an internal PCM buffer, and [`FlacDecoder::read`] drains it. Methods
/// with sentinel return values (`step`, `read` and the accessors) never fail;
/// their `try_` counterparts report the reason.
///
/// # Examples
///
/// ```
/// # #[path = "doctest_helper.rs"]
/// # mod doctest_helper;
/// # use flacstream::*;
/// # let bytes = doctest_helper::sine_stream();
/// let mut decoder = FlacDecoder::new(source::MemSource::new(bytes)).unwrap();
/// let mut pcm = vec![];
/// let mut buf = [0u8; 4096];
/// while decoder.step() {
///     loop {
///         let n = decoder.read(&mut buf);
///         if n <= 0 {
///             break;
///         }
///         pcm.extend_from_slice(&buf[..n as usize]);
///     }
/// }
/// assert_eq!(decoder.state(), DecoderState::Exhausted);
/// assert_eq!(
///     pcm.len() as u64,
///     decoder.total_sample_count() * decoder.channel_count() as u64 * 2
/// );
/// ```
pub struct FlacDecoder<S> {
    engine: Option<Engine<S>>,
    config: config::Decoder,
    state: DecoderState,
    stats: DecodeStats,
}

impl<S: ByteSource> FlacDecoder<S> {
    /// Opens a stream with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `NotAFlacStream` or `MissingStreamInfo` if the source doesn't
    /// start with valid metadata, and propagates source errors.
    pub fn new(source: S) -> Result<Self, DecodeError> {
        Self::with_config(source, &config::Decoder::default())
    }

    /// Opens a stream and parses its metadata.
    ///
    /// # Errors
    ///
    /// In addition to the errors of [`FlacDecoder::new`], returns `Config`
    /// error if `config` is invalid.
    pub fn with_config(source: S, config: &config::Decoder) -> Result<Self, DecodeError> {
        config.verify().map_err(|e| e.within("decoder"))?;
        let mut reader = BitReader::new(source, config.read_chunk_size);
        let metadata = read_metadata(&mut reader)?;
        let info = metadata.stream_info();
        log::debug!(
            target: "flacstream::decoder",
            "{{ msg: \"opened\", sample_rate: {}, channels: {}, bits_per_sample: {}, total_samples: {} }}",
            info.sample_rate(),
            info.channels(),
            info.bits_per_sample(),
            info.total_samples()
        );

        let md5 = (config.verify_md5 && info.has_md5()).then(md5::Md5::new);
        let engine = Engine {
            frames: FrameDecoder::new(info.channels()),
            pcm: PcmBuffer::new(
                info.channels(),
                info.bits_per_sample(),
                config.output_format,
            ),
            reader,
            metadata,
            position: 0,
            pending_skip: 0,
            md5,
            md5_scratch: Vec::new(),
            md5_verified: None,
        };
        Ok(Self {
            engine: Some(engine),
            config: config.clone(),
            state: DecoderState::Ready,
            stats: DecodeStats::default(),
        })
    }

    /// Returns the engine if the decoder can still operate.
    fn live_engine(&mut self) -> Result<&mut Engine<S>, DecodeError> {
        match self.state {
            DecoderState::Released => Err(DecodeError::Released),
            DecoderState::Errored => Err(DecodeError::Errored),
            _ => self.engine.as_mut().ok_or(DecodeError::Released),
        }
    }

    /// Decodes the next frame into the PCM buffer.
    ///
    /// Returns false when the stream has ended.
    ///
    /// # Errors
    ///
    /// Returns `UnrecoverableStreamCorruption` when no frame is found within
    /// the resynchronization limit or the stream ends inside a frame, and
    /// propagates source errors. Both move the decoder to `Errored`.
    pub fn try_step(&mut self) -> Result<bool, DecodeError> {
        if self.state == DecoderState::Exhausted {
            return Ok(false);
        }
        let config = &self.config;
        let engine = match self.state {
            DecoderState::Released => return Err(DecodeError::Released),
            DecoderState::Errored => return Err(DecodeError::Errored),
            _ => self.engine.as_mut().ok_or(DecodeError::Released)?,
        };
        match engine.decode_next(config, &mut self.stats) {
            Ok(true) => {
                self.state = DecoderState::Decoding;
                Ok(true)
            }
            Ok(false) => {
                engine.finish();
                self.state = DecoderState::Exhausted;
                Ok(false)
            }
            Err(e) => {
                log::warn!("decoding stopped: {e}");
                self.state = DecoderState::Errored;
                Err(e)
            }
        }
    }

    /// Decodes the next frame. Returns false at the end of stream, on error,
    /// or after release.
    pub fn step(&mut self) -> bool {
        self.try_step().unwrap_or(false)
    }

    /// Moves decoded PCM bytes into `buf` and returns the number of bytes
    /// moved.
    ///
    /// # Errors
    ///
    /// Returns `Released` or `Errored` if the decoder is not operable.
    pub fn try_read(&mut self, buf: &mut [u8]) -> Result<usize, DecodeError> {
        Ok(self.live_engine()?.pcm.drain(buf))
    }

    /// Moves decoded PCM bytes into `buf`. Returns the number of bytes moved,
    /// or -1 if the decoder is released or errored.
    pub fn read(&mut self, buf: &mut [u8]) -> i64 {
        self.try_read(buf).map_or(-1, |n| n as i64)
    }

    /// Moves the decoding position to the sample `target`.
    ///
    /// # Errors
    ///
    /// Returns `SeekNotSupported` without changing the state when the source
    /// can't move backwards to `target`. Other errors move the decoder to
    /// `Errored`.
    pub fn seek_to(&mut self, target: u64) -> Result<(), DecodeError> {
        let config = &self.config;
        let engine = match self.state {
            DecoderState::Released => return Err(DecodeError::Released),
            DecoderState::Errored => return Err(DecodeError::Errored),
            _ => self.engine.as_mut().ok_or(DecodeError::Released)?,
        };
        let total = engine.metadata.stream_info().total_samples();

        if total > 0 && target >= total {
            engine.md5 = None;
            engine.pcm.clear();
            engine.position = total;
            engine.pending_skip = 0;
            self.state = DecoderState::Exhausted;
            return Ok(());
        }

        if !engine.reader.is_seekable() {
            let frame_bytes = engine.pcm.bytes_per_frame() as u64;
            let buffered = engine.pcm.available_bytes() as u64 / frame_bytes;
            let buffer_start = engine.position - buffered;
            if target < buffer_start {
                return Err(DecodeError::SeekNotSupported);
            }
            engine.md5 = None;
            if target < engine.position {
                engine.pcm.discard(((target - buffer_start) * frame_bytes) as usize);
            } else {
                engine.pcm.clear();
                engine.pending_skip = target - engine.position;
                self.state = DecoderState::Decoding;
            }
            return Ok(());
        }

        engine.md5 = None;
        match engine.relocate(config, target) {
            Ok(ended) => {
                log::debug!(
                    target: "flacstream::decoder",
                    "{{ msg: \"seeked\", target: {}, position: {} }}",
                    target, engine.position
                );
                self.state = if ended {
                    DecoderState::Exhausted
                } else {
                    DecoderState::Decoding
                };
                Ok(())
            }
            Err(e) => {
                log::warn!("seek failed: {e}");
                self.state = DecoderState::Errored;
                Err(e)
            }
        }
    }

    /// Drops the source and all buffers. Later calls return sentinels.
    pub fn release(&mut self) {
        self.engine = None;
        self.state = DecoderState::Released;
    }

    pub const fn state(&self) -> DecoderState {
        self.state
    }

    pub const fn stats(&self) -> DecodeStats {
        self.stats
    }

    pub const fn config(&self) -> &config::Decoder {
        &self.config
    }

    /// Returns parsed metadata, or `None` after release.
    pub fn metadata(&self) -> Option<&Metadata> {
        self.engine.as_ref().map(|e| &e.metadata)
    }

    pub fn stream_info(&self) -> Option<&StreamInfo> {
        self.metadata().map(Metadata::stream_info)
    }

    pub fn sample_rate(&self) -> usize {
        self.stream_info().map_or(0, StreamInfo::sample_rate)
    }

    pub fn channel_count(&self) -> usize {
        self.stream_info().map_or(0, StreamInfo::channels)
    }

    pub fn bits_per_sample(&self) -> usize {
        self.stream_info().map_or(0, StreamInfo::bits_per_sample)
    }

    /// Returns the number of inter-channel samples, or 0 if unknown.
    pub fn total_sample_count(&self) -> u64 {
        self.stream_info().map_or(0, StreamInfo::total_samples)
    }

    /// Returns the number of bytes per sample in the PCM output.
    pub fn bytes_per_sample(&self) -> usize {
        self.engine.as_ref().map_or(0, |e| e.pcm.bytes_per_sample())
    }

    /// Returns the sample index that the next decoded frame continues from.
    ///
    /// Samples already in the PCM buffer precede this position.
    pub fn pcm_frame_position(&self) -> u64 {
        self.engine
            .as_ref()
            .map_or(0, |e| e.position + e.pending_skip)
    }

    /// Returns the number of bytes that can be read.
    pub fn bytes_ready_count(&self) -> usize {
        self.engine.as_ref().map_or(0, |e| e.pcm.available_bytes())
    }

    /// Returns the result of MD5 verification.
    ///
    /// `None` unless verification is enabled, the stream carries a signature,
    /// and it was decoded to the end without seeking.
    pub fn md5_verified(&self) -> Option<bool> {
        self.engine.as_ref().and_then(|e| e.md5_verified)
    }
}

impl<S> fmt::Debug for FlacDecoder<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlacDecoder")
            .field("state", &self.state)
            .field("stats", &self.stats)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
