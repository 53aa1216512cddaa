//! Primitives shared by the whole crate, gathered here.
//!
//! - The public error type and its numeric outcome
//! - Pixel color spaces

use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
};

use serde::{Deserialize, Serialize};

use crate::codec::JColorSpace;
use crate::diag::CodecError;

/// General result type
pub type Result<T> = std::result::Result<T, ThumbError>;

/// Everything that can go wrong with a handle.
///
/// Codec faults are kept as the source, so `{:#}` through anyhow shows
/// what the decoder or encoder actually tripped on.
#[derive(Debug, thiserror::Error)]
pub enum ThumbError {
    /// The file could not be read or its header is not a usable JPEG.
    OpenFailed(#[source] CodecError),
    /// The header declares an empty image.
    InvalidDimensions { width: u32, height: u32 },
    /// Pixels already exist; a handle decodes once.
    AlreadyDecoded,
    /// A handle encodes once.
    AlreadyEncoded,
    /// Target width or height below 1.
    InvalidTargetSize { width: u32, height: u32 },
    /// The scanline cursor stopped moving.
    DecodeStalled { row: u32 },
    /// The codec gave up during decode.
    DecodeAborted(#[source] CodecError),
    /// The pixel buffer could not be allocated.
    OutOfMemory { bytes: usize },
    /// Scaling or encoding was asked for before any pixels exist.
    NotDecoded,
    /// The output file could not be created.
    OutputOpenFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Neither a file nor a memory output was configured.
    NoOutput,
    /// The codec gave up during encode.
    EncodeAborted(#[source] CodecError),
    /// Arguments to a preview copy do not fit the decoded pixels.
    PreviewGeometry {
        width: u32,
        height: u32,
        stride: usize,
    },
}

impl Display for ThumbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        use ThumbError::*;
        match self {
            OpenFailed(_) => write!(f, "cannot open JPEG"),
            InvalidDimensions { width, height } => {
                write!(f, "invalid image dimensions {width}x{height}")
            }
            AlreadyDecoded => write!(f, "image was already decoded"),
            AlreadyEncoded => write!(f, "image was already encoded"),
            InvalidTargetSize { width, height } => {
                write!(f, "invalid target size {width}x{height}")
            }
            DecodeStalled { row } => {
                write!(f, "decode made no progress at scanline {row}")
            }
            DecodeAborted(_) => write!(f, "decode aborted"),
            OutOfMemory { bytes } => {
                write!(f, "cannot allocate {bytes} bytes of pixels")
            }
            NotDecoded => write!(f, "no decoded pixels"),
            OutputOpenFailed { path, .. } => {
                write!(f, "cannot open output {}", path.display())
            }
            NoOutput => write!(f, "no output configured"),
            EncodeAborted(_) => write!(f, "encode aborted"),
            PreviewGeometry {
                width,
                height,
                stride,
            } => write!(
                f,
                "preview {width}x{height} with stride {stride} does not fit the pixels"
            ),
        }
    }
}

/// The numeric result of the combined decode, scale and encode run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Outcome {
    Ok = 0,
    ScaleFailed = 1,
    EncodeFailed = 2,
    /// Decode failed in an orderly way (misuse, stall, memory).
    DecodeFailed = 3,
    /// The codec bailed out in the middle of decoding.
    DecodeAborted = 4,
}

impl Outcome {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl ThumbError {
    /// Which stage failed, as a number callers can switch on.
    pub fn outcome(&self) -> Outcome {
        use ThumbError::*;
        match self {
            DecodeAborted(_) => Outcome::DecodeAborted,
            OpenFailed(_)
            | InvalidDimensions { .. }
            | AlreadyDecoded
            | InvalidTargetSize { .. }
            | DecodeStalled { .. }
            | OutOfMemory { .. } => Outcome::DecodeFailed,
            NotDecoded | PreviewGeometry { .. } => Outcome::ScaleFailed,
            AlreadyEncoded | OutputOpenFailed { .. } | NoOutput | EncodeAborted(_) => {
                Outcome::EncodeFailed
            }
        }
    }
}

impl<T> From<&Result<T>> for Outcome {
    fn from(r: &Result<T>) -> Self {
        match r {
            Ok(_) => Outcome::Ok,
            Err(e) => e.outcome(),
        }
    }
}

/// Pixel layouts a handle can report.
///
/// Decoding only ever produces three of them: gray sources come out as
/// `Gray8`, CMYK sources as `Cmyk`, everything else as `Rgb8`. The rest
/// describe caller-side layouts and map onto the nearest codec space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ColorSpace {
    Gray8,
    Rgb8,
    Bgr8,
    Rgba8,
    Bgra8,
    Argb32,
    Yuv8,
    Cmyk,
}

impl ColorSpace {
    /// What a handle reports for a file stored in `cs`.
    pub fn from_jpeg(cs: JColorSpace) -> Self {
        match cs {
            JColorSpace::Grayscale => Self::Gray8,
            JColorSpace::Cmyk | JColorSpace::Ycck => Self::Cmyk,
            _ => Self::Rgb8,
        }
    }

    /// Codec output space used when decoding to this layout.
    pub fn decode_space(self) -> JColorSpace {
        match self {
            Self::Gray8 => JColorSpace::Grayscale,
            Self::Yuv8 => JColorSpace::YCbCr,
            Self::Cmyk => JColorSpace::Cmyk,
            Self::Rgb8 | Self::Bgr8 | Self::Rgba8 | Self::Bgra8 | Self::Argb32 => JColorSpace::Rgb,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_codes_are_stable() {
        assert_eq!(Outcome::Ok.code(), 0);
        assert_eq!(ThumbError::NotDecoded.outcome().code(), 1);
        assert_eq!(ThumbError::NoOutput.outcome().code(), 2);
        assert_eq!(ThumbError::DecodeStalled { row: 3 }.outcome().code(), 3);
        assert_eq!(
            ThumbError::DecodeAborted(CodecError::NoImage).outcome().code(),
            4
        );
    }

    #[test]
    fn only_three_spaces_come_out_of_a_file() {
        assert_eq!(ColorSpace::from_jpeg(JColorSpace::Grayscale), ColorSpace::Gray8);
        assert_eq!(ColorSpace::from_jpeg(JColorSpace::YCbCr), ColorSpace::Rgb8);
        assert_eq!(ColorSpace::from_jpeg(JColorSpace::Rgb), ColorSpace::Rgb8);
        assert_eq!(ColorSpace::from_jpeg(JColorSpace::Ycck), ColorSpace::Cmyk);
    }
}
