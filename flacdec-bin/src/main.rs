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

#![doc = include_str!("../README.md")]
// Note that clippy attributes should be in sync with those declared in "lib.rs"
#![warn(clippy::all, clippy::nursery, clippy::pedantic, clippy::cargo)]
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss,
    clippy::multiple_crate_versions,
    clippy::must_use_candidate
)]
// Some from restriction lint-group
#![warn(
    clippy::clone_on_ref_ptr,
    clippy::create_dir,
    clippy::dbg_macro,
    clippy::empty_structs_with_brackets,
    clippy::exit,
    clippy::if_then_some_else_none,
    clippy::impl_trait_in_params,
    clippy::lossy_float_literal,
    clippy::multiple_inherent_impl,
    clippy::print_stdout,
    clippy::rc_buffer,
    clippy::rc_mutex,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::separated_literal_suffix,
    clippy::str_to_string,
    clippy::string_add,
    clippy::string_to_string,
    clippy::try_err,
    clippy::unnecessary_self_imports,
    clippy::wildcard_enum_match_arm
)]

use std::fs::File;
use std::io::Write;
use std::time::Instant;

use clap::Parser;
use log::info;
use log::warn;

use termcolor::ColorChoice;
use termcolor::ColorSpec;
use termcolor::StandardStream;
use termcolor::WriteColor;

use flacstream::config;
use flacstream::error::DecodeError;
use flacstream::error::Verify;
use flacstream::source::ByteSource;
use flacstream::source::ReadSource;
use flacstream::source::SeekableSource;
use flacstream::FlacDecoder;

/// Version of the decoder binary.
const CRATE_VERSION: &str = match option_env!("CARGO_PKG_VERSION") {
    Some(v) => v,
    None => "unknown",
};

/// Size of the buffer used for draining PCM from the decoder.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// FLAC decoder.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Path for the output WAV file.
    #[clap(short, long)]
    output: String,
    /// If set, load config from the specified file.
    #[clap(short, long)]
    config: Option<String>,
    /// If set, dump the config used to the specified path.
    #[clap(long)]
    dump_config: Option<String>,
    /// If set, start decoding from the specified inter-channel sample.
    #[clap(long)]
    seek: Option<u64>,
    /// Path for the input FLAC file. "-" reads from the standard input.
    source: String,
}

#[repr(i32)]
enum ExitCode {
    InvalidConfig = -1,
    InvalidStream = -2,
    DecodeFailed = -3,
}

/// Shows program banner.
///
/// # Errors
///
/// Propagates unknown I/O errors.
pub fn show_banner() -> Result<(), std::io::Error> {
    let mut termout = StandardStream::stderr(ColorChoice::Auto);
    termout.set_color(ColorSpec::new().set_bold(true))?;
    write!(termout, "\n{:>10} ", "flacdec")?;
    termout.reset()?;
    writeln!(
        termout,
        "(decCLI v{}, engine v{})",
        CRATE_VERSION,
        flacstream::constant::build_info::CRATE_VERSION,
    )?;
    termout.reset()
}

/// Converts a little-endian sample of `width` bytes to `i32`.
fn sample_from_le(bytes: &[u8]) -> i32 {
    let width = bytes.len();
    let mut buf = [0u8; 4];
    buf[4 - width..].copy_from_slice(bytes);
    i32::from_le_bytes(buf) >> (8 * (4 - width))
}

#[allow(clippy::expect_used)]
fn decode_to_wav<S: ByteSource>(
    mut decoder: FlacDecoder<S>,
    seek: Option<u64>,
    output: &str,
) -> Result<u64, DecodeError> {
    if let Some(target) = seek {
        decoder.seek_to(target)?;
        info!("Decoding from sample {}.", decoder.pcm_frame_position());
    }

    let width = decoder.bytes_per_sample();
    let container_bits = width * 8;
    // samples are rescaled so that WAV players see a standard container.
    let scale = container_bits.saturating_sub(decoder.bits_per_sample());
    let scale = if decoder.config().output_format == config::OutputFormat::S16 {
        0
    } else {
        scale
    };
    let mut writer = hound::WavWriter::create(
        output,
        hound::WavSpec {
            channels: decoder.channel_count() as u16,
            sample_rate: decoder.sample_rate() as u32,
            bits_per_sample: container_bits as u16,
            sample_format: hound::SampleFormat::Int,
        },
    )
    .expect("Failed to create writer");

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut samples = 0u64;
    while decoder.try_step()? {
        loop {
            let n = decoder.try_read(&mut buf)?;
            if n == 0 {
                break;
            }
            for bytes in buf[..n].chunks_exact(width) {
                writer
                    .write_sample(sample_from_le(bytes) << scale)
                    .expect("Failed to write a sample.");
            }
            samples += (n / width) as u64;
        }
    }
    writer.finalize().expect("Failed to finalize the WAV file.");

    let stats = decoder.stats();
    if stats.frames_dropped > 0 {
        warn!(
            "{} frames were dropped, {} bytes were skipped.",
            stats.frames_dropped, stats.bytes_skipped
        );
    }
    match decoder.md5_verified() {
        Some(true) => info!("MD5 signature verified."),
        Some(false) => warn!("MD5 signature mismatch."),
        None => {}
    }
    Ok(samples / decoder.channel_count().max(1) as u64)
}

fn log_stream_info<S: ByteSource>(decoder: &FlacDecoder<S>) {
    info!(
        target: "flacdec-bin::stream_info::jsonl",
        "{{ sample_rate: {}, channels: {}, bits_per_sample: {}, total_samples: {} }}",
        decoder.sample_rate(),
        decoder.channel_count(),
        decoder.bits_per_sample(),
        decoder.total_sample_count(),
    );
    if let Some(comment) = decoder.metadata().and_then(|m| m.vorbis_comment()) {
        info!("Vendor: {}", comment.vendor());
        for c in comment.comments() {
            info!("  {c}");
        }
    }
}

fn run<S: ByteSource>(
    source: S,
    decoder_config: &config::Decoder,
    args: &Args,
) -> Result<(), i32> {
    let decoder = FlacDecoder::with_config(source, decoder_config).map_err(|e| {
        eprintln!("Error: {e}");
        ExitCode::InvalidStream as i32
    })?;
    log_stream_info(&decoder);

    let start = Instant::now();
    let samples = decode_to_wav(decoder, args.seek, &args.output).map_err(|e| {
        eprintln!("Error: {e}");
        ExitCode::DecodeFailed as i32
    })?;
    info!(
        "Decoded {samples} samples in {:.3} secs.",
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

#[allow(clippy::let_underscore_must_use, clippy::expect_used)]
fn main_body(args: Args) -> Result<(), i32> {
    let _ = show_banner();
    info!(
        target: "flacdec-bin::build_info::jsonl",
        "{{ version: \"{}\", engine: \"{}\" }}",
        CRATE_VERSION,
        flacstream::constant::build_info::CRATE_VERSION,
    );

    let decoder_config = args
        .config
        .as_ref()
        .map_or_else(config::Decoder::default, |path| {
            let conf_str = std::fs::read_to_string(path).expect("Config file read error.");
            toml::from_str(&conf_str).expect("Config file syntax error.")
        });
    if let Err(e) = decoder_config.verify() {
        eprintln!("Error: {}", e.within("decoder_config"));
        return Err(ExitCode::InvalidConfig as i32);
    }
    if let Some(path) = &args.dump_config {
        let mut file = File::create(path).expect("Failed to create a file.");
        file.write_all(
            toml::to_string(&decoder_config)
                .expect("Config serialization failed.")
                .as_bytes(),
        )
        .expect("File write failed.");
    }

    if args.source == "-" {
        run(
            ReadSource::new(std::io::stdin().lock()),
            &decoder_config,
            &args,
        )
    } else {
        let source = SeekableSource::from_path(&args.source).expect("Failed to open the input.");
        run(source, &decoder_config, &args)
    }
}

fn main() -> Result<(), i32> {
    env_logger::Builder::from_env("FLACSTREAM_LOG")
        .format_timestamp(None)
        .init();
    main_body(Args::parse())
}
