//! A small baseline/progressive JPEG codec with the knobs thumbnailing needs:
//! decode-time downscaling, per-row corruption tracking, marker saving,
//! and a scanline-push encoder.

mod color;
mod compress;
mod decompress;
mod entropy;
mod idct;
mod marker;

pub use color::JColorSpace;
pub use compress::{Compressor, DEFAULT_QUALITY, FULL_CHROMA_QUALITY};
pub use decompress::Decompressor;
pub use idct::DctMethod;
pub use marker::{Process, SavedMarker};

/// Marker codes callers may ask to keep.
pub mod markers {
    pub use super::marker::{APP0, APP14, APP7, COM};
}
