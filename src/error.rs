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

//! Error and verification traits

use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Enum of errors that can be returned from the decoder.
#[derive(Clone, Debug)]
#[allow(clippy::module_name_repetitions)]
#[non_exhaustive]
pub enum DecodeError {
    /// The stream does not start with the `fLaC` marker.
    NotAFlacStream,
    /// Metadata ended without a `STREAMINFO` block.
    MissingStreamInfo,
    /// The source ended in the middle of a syntax element.
    UnexpectedEndOfStream,
    /// CRC-16 stored in a frame footer doesn't match the frame content.
    FrameCrcMismatch {
        /// Byte offset of the frame sync code.
        frame_offset: u64,
        /// Checksum stored in the stream.
        expected: u16,
        /// Checksum computed over the frame.
        actual: u16,
    },
    /// A field in the stream has an invalid or reserved value.
    Format(FormatError),
    /// Seeking was requested on a source that cannot seek backwards.
    SeekNotSupported,
    /// No decodable frame was found within the resynchronization window.
    UnrecoverableStreamCorruption {
        /// Byte offset where the search for a valid frame started.
        search_start: u64,
    },
    /// The decoder has already been released.
    Released,
    /// The decoder stopped at an earlier unrecoverable error.
    Errored,
    /// I/O error propagated from the [`ByteSource`].
    ///
    /// [`ByteSource`]: crate::source::ByteSource
    Source(SourceError),
    /// Invalid decoder configuration.
    Config(VerifyError),
}

impl DecodeError {
    /// Returns true if error is due to the end of input.
    ///
    /// `UnexpectedEndOfStream` error can be ignored if it is happened on the
    /// frame boundary.
    pub const fn is_stream_ended(&self) -> bool {
        matches!(self, Self::UnexpectedEndOfStream)
    }

    /// Returns true if the current frame can be dropped and decoding can
    /// continue from the next frame.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::FrameCrcMismatch { .. } | Self::Format(_))
    }
}

impl Error for DecodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Format(e) => Some(e),
            Self::Source(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::NotAFlacStream
            | Self::MissingStreamInfo
            | Self::UnexpectedEndOfStream
            | Self::FrameCrcMismatch { .. }
            | Self::SeekNotSupported
            | Self::UnrecoverableStreamCorruption { .. }
            | Self::Released
            | Self::Errored => None,
        }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAFlacStream => {
                write!(f, "stream marker not found (probably, non FLAC input given?)")
            }
            Self::MissingStreamInfo => write!(f, "no STREAMINFO block in the stream"),
            Self::UnexpectedEndOfStream => write!(f, "stream ended unexpectedly"),
            Self::FrameCrcMismatch {
                frame_offset,
                expected,
                actual,
            } => write!(
                f,
                "frame CRC mismatch at byte {frame_offset} (expected={expected:#06x}, actual={actual:#06x})"
            ),
            Self::Format(err) => err.fmt(f),
            Self::SeekNotSupported => write!(f, "source doesn't support seeking"),
            Self::UnrecoverableStreamCorruption { search_start } => write!(
                f,
                "no decodable frame found after byte {search_start}"
            ),
            Self::Released => write!(f, "decoder is already released"),
            Self::Errored => write!(f, "decoder stopped due to an earlier error"),
            Self::Source(err) => err.fmt(f),
            Self::Config(err) => err.fmt(f),
        }
    }
}

impl From<FormatError> for DecodeError {
    fn from(e: FormatError) -> Self {
        Self::Format(e)
    }
}

impl From<SourceError> for DecodeError {
    fn from(e: SourceError) -> Self {
        Self::Source(e)
    }
}

impl From<VerifyError> for DecodeError {
    fn from(e: VerifyError) -> Self {
        Self::Config(e)
    }
}

/// An error type for input format error.
#[derive(Clone, Debug, Eq, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub struct FormatError {
    /// The location of error in bit offset.
    location_in_bits: u64,
    /// Message that described the reason.
    message: String,
}

impl FormatError {
    /// Constructs new `FormatError`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacstream::error::*;
    /// let err = FormatError::new(80, "reserved bit is set");
    /// assert_eq!(
    ///     format!("{}", err),
    ///     "input format error detected at b=80. (reason=reserved bit is set)"
    /// );
    /// ```
    pub fn new(location_in_bits: u64, message: &str) -> Self {
        Self {
            location_in_bits,
            message: message.to_owned(),
        }
    }

    /// Returns the bit offset where the error was detected.
    pub const fn location_in_bits(&self) -> u64 {
        self.location_in_bits
    }
}

impl Error for FormatError {}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "input format error detected at b={}. (reason={})",
            self.location_in_bits, self.message
        )
    }
}

/// Struct that wraps errors from [`ByteSource`].
///
/// [`ByteSource`]: crate::source::ByteSource
#[derive(Clone, Debug)]
#[allow(clippy::module_name_repetitions)]
pub struct SourceError {
    reason: SourceErrorReason,
}

impl SourceError {
    /// Constructs `SourceError` by choosing a reason.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacstream::error::*;
    /// let err = SourceError::by_reason(SourceErrorReason::Unsupported);
    /// assert_eq!(
    ///     format!("{}", err),
    ///     "error occurred while accessing the source. reason: operation is not supported."
    /// );
    /// ```
    pub const fn by_reason(reason: SourceErrorReason) -> Self {
        Self { reason }
    }

    /// Constructs `SourceError` from an [`io::Error`].
    ///
    /// [`io::Error`]: std::io::Error
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacstream::error::*;
    /// # use std::io;
    /// let err = SourceError::from_io_error(io::Error::new(io::ErrorKind::Other, "oh no!"));
    /// assert_eq!(
    ///     format!("{}", err),
    ///     "error occurred while accessing the source. reason: I/O error: oh no!."
    /// );
    /// ```
    pub fn from_io_error<E: Error + Send + Sync + 'static>(e: E) -> Self {
        Self {
            reason: SourceErrorReason::IO(Some(Arc::new(e))),
        }
    }

    /// Returns the reason of this error.
    pub const fn reason(&self) -> &SourceErrorReason {
        &self.reason
    }
}

/// Enum covering possible error reasons from [`ByteSource`].
///
/// [`ByteSource`]: crate::source::ByteSource
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum SourceErrorReason {
    /// The requested operation (typically seeking) is not available.
    Unsupported,
    /// Seek target is beyond what the source can address.
    OutOfRange,
    /// Other IO-related error.
    IO(Option<Arc<dyn Error + Send + Sync + 'static>>),
}

impl Error for SourceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "error occurred while accessing the source. reason: {}.",
            self.reason
        )
    }
}

impl fmt::Display for SourceErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => {
                write!(f, "operation is not supported")
            }
            Self::OutOfRange => {
                write!(f, "offset is out of range")
            }
            Self::IO(Some(cause)) => {
                write!(f, "I/O error: {cause}")
            }
            Self::IO(None) => {
                write!(f, "unknown I/O error")
            }
        }
    }
}

/// Error object returned when integrity verification failed.
///
/// This error maintains a path to the component that is actually erroneous
/// in the nested components.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[allow(clippy::module_name_repetitions)]
pub struct VerifyError {
    components: Vec<String>,
    reason: String,
}

impl VerifyError {
    /// Makes verification error for an invalid variable `component`.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacstream::error::*;
    /// let err = VerifyError::new("channels", "must be less than or equal to 8");
    /// assert_eq!(
    ///     format!("{}", err),
    ///     "verification error: `channels` is not valid. reason: must be less than or equal to 8"
    /// );
    /// ```
    pub fn new(component: &str, reason: &str) -> Self {
        Self {
            components: vec![component.to_owned()],
            reason: reason.to_owned(),
        }
    }

    /// Prepends the name of an enclosing component to the error location.
    ///
    /// # Examples
    ///
    /// ```
    /// # use flacstream::error::*;
    /// let err = VerifyError::new("read_chunk_size", "must be greater than or equal to 16");
    /// let err = err.within("decoder");
    /// assert_eq!(err.path(), "decoder.read_chunk_size");
    /// ```
    #[must_use]
    pub fn within(self, component: &str) -> Self {
        let mut components = self.components;
        let reason = self.reason;
        components.push(component.to_owned());
        Self { components, reason }
    }

    /// Gets dot-separated path string for the error location.
    pub fn path(&self) -> String {
        let mut path = String::new();
        for (i, name) in self.components.iter().rev().enumerate() {
            if i != 0 {
                path.push('.');
            }
            path.push_str(name);
        }
        path
    }
}

impl Error for VerifyError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        None
    }
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "verification error: `{}` is not valid. reason: {}",
            self.path(),
            self.reason
        )
    }
}

/// Trait for verifiable structs.
pub trait Verify: Sized + seal_verify::Sealed {
    /// Verifies there's no internal data inconsistency.
    ///
    /// # Errors
    ///
    /// Returns `VerifyError` if there's an invalid variable.
    ///
    /// # Examples
    ///
    /// [`config::Decoder`] implements `Verify`.
    ///
    /// [`config::Decoder`]: crate::config::Decoder
    ///
    /// ```
    /// # use flacstream::error::*;
    /// # use flacstream::config::Decoder;
    /// let mut config = Decoder::default();
    /// config.read_chunk_size = 0;  // invalid setting
    /// assert!(config.verify().is_err());
    ///
    /// config.read_chunk_size = 4096; // valid setting
    /// assert!(config.verify().is_ok());
    /// ```
    fn verify(&self) -> Result<(), VerifyError>;
}

/// A wrapping function to make it compatible with "?" operator.
pub(crate) fn verify_macro_impl(cond: bool, varname: &str, msg: &str) -> Result<(), VerifyError> {
    if !cond {
        return Err(VerifyError::new(varname, msg));
    }
    Ok(())
}

/// Checks if `$cond` is true and do `return Err(...)` if so.
///
/// An error object `VerifyErr` is constructed using `$varname` and
/// `$msg` that are formatted using the extra args (`$args`).
macro_rules! verify_true {
    ($varname:literal, $cond:expr, $msg:literal, $($args: expr),*) => {
        crate::error::verify_macro_impl(
            $cond,
            &format!($varname, $($args),*),
            &format!($msg, $($args),*),
        )
    };
    ($varname:literal, $cond:expr, $msg:literal) => {
        verify_true!($varname, $cond, $msg,)
    }
}
pub(crate) use verify_true;

/// Checks if `$actual` is in the range, and emits err with default msgs if not.
///
/// An error is constructed using the same way as [`verify_true`].
macro_rules! verify_range {
    ($varname: literal, $actual:expr, $lowlimit:tt ..= $highlimit:tt) => {
        verify_range!($varname, $actual, ($lowlimit)..)
            .and_then(|()| verify_range!($varname, $actual, ..=($highlimit)))
    };
    ($varname: literal, $actual:expr, $lowlimit:tt ..) => {{
        #[allow(unused_parens)]
        let limit = $lowlimit;
        verify_true!(
            $varname,
            $actual >= limit,
            "must be greater than or equal to {limit}"
        )
    }};
    ($varname: literal, $actual:expr, ..= $highlimit:tt) => {{
        #[allow(unused_parens)]
        let limit = $highlimit;
        verify_true!(
            $varname,
            $actual <= limit,
            "must be less than or equal to {limit}"
        )
    }};
}
pub(crate) use verify_range;

mod seal_verify {
    pub trait Sealed {}

    impl Sealed for crate::config::Decoder {}
    impl Sealed for crate::metadata::StreamInfo {}
}
