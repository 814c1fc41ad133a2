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

#![no_main]

use arbitrary::Arbitrary;
use arbitrary::Unstructured;
use libfuzzer_sys::fuzz_target;

use flacstream::config;
use flacstream::source::MemSource;
use flacstream::source::ReadSource;
use flacstream::DecoderState;
use flacstream::FlacDecoder;

#[derive(Debug)]
enum Op {
    Step,
    Read(usize),
    Seek(u64),
}

#[derive(Debug)]
struct Input {
    config: config::Decoder,
    seekable: bool,
    ops: Vec<Op>,
    bytes: Vec<u8>,
}

impl<'a> Arbitrary<'a> for Input {
    fn arbitrary(u: &mut Unstructured<'a>) -> Result<Self, arbitrary::Error> {
        let config = config::Decoder {
            read_chunk_size: u.int_in_range(16..=4096)?,
            max_resync_bytes: u.int_in_range(1..=1 << 16)?,
            check_crc: bool::arbitrary(u)?,
            verify_md5: bool::arbitrary(u)?,
            sample_accurate_seek: bool::arbitrary(u)?,
            output_format: if bool::arbitrary(u)? {
                config::OutputFormat::S16
            } else {
                config::OutputFormat::Native
            },
        };
        let seekable = bool::arbitrary(u)?;
        let op_count = u.int_in_range(0..=64usize)?;
        let mut ops = Vec::with_capacity(op_count);
        for _ in 0..op_count {
            ops.push(match u.int_in_range(0..=2u8)? {
                0 => Op::Step,
                1 => Op::Read(u.int_in_range(0..=8192)?),
                _ => Op::Seek(u64::arbitrary(u)? % (1 << 24)),
            });
        }
        let bytes = u.bytes(u.len())?.to_vec();
        Ok(Self {
            config,
            seekable,
            ops,
            bytes,
        })
    }
}

fn run<S: flacstream::source::ByteSource>(mut decoder: FlacDecoder<S>, ops: &[Op]) {
    for op in ops {
        match op {
            Op::Step => {
                let before = decoder.pcm_frame_position();
                if decoder.step() {
                    assert!(decoder.pcm_frame_position() > before);
                }
            }
            Op::Read(n) => {
                let mut buf = vec![0u8; *n];
                let ret = decoder.read(&mut buf);
                let width = decoder.bytes_per_sample() as i64;
                assert!(ret == -1 || (ret as usize <= *n && ret % width.max(1) == 0));
            }
            Op::Seek(target) => {
                let _ = decoder.seek_to(*target);
            }
        }
    }
    while decoder.step() {}
    assert_ne!(decoder.state(), DecoderState::Decoding);
    decoder.release();
    assert_eq!(decoder.read(&mut [0u8; 4]), -1);
}

fuzz_target!(|input: Input| {
    if input.seekable {
        if let Ok(decoder) = FlacDecoder::with_config(MemSource::new(input.bytes), &input.config) {
            run(decoder, &input.ops);
        }
    } else if let Ok(decoder) = FlacDecoder::with_config(
        ReadSource::new(std::io::Cursor::new(input.bytes)),
        &input.config,
    ) {
        run(decoder, &input.ops);
    }
});
