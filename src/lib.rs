//! Fast JPEG thumbnails.
//!
//! Open a JPEG, say how big the result should be, encode. The decoder
//! drops resolution in the DCT domain wherever it can, so a large photo
//! is never fully decoded just to throw most of it away.
//!
//! ```no_run
//! use jpegthumb::{ImageHandle, OutputSlot};
//!
//! let mut img = ImageHandle::open_file("photo.jpg".as_ref())?;
//! img.set_target_size(160, 120);
//! let slot = OutputSlot::new();
//! img.set_memory_output(&slot);
//! img.encode()?;
//! let jpeg = slot.take();
//! # Ok::<(), jpegthumb::ThumbError>(())
//! ```

pub mod codec; // JPEG decompressor and compressor
pub mod diag; // Codec errors, warnings and the per-decode context
pub mod memstream; // In-memory source and destination
pub mod plan; // Crop and target clamping
pub mod prim; // Public error type, outcome codes, color spaces
pub mod stream; // Source and destination traits, file adapters
pub mod thumb; // Fit-in-a-box thumbnails

mod decode; // Decode engine
mod encode; // Encode engine
mod handle; // The image handle
mod scale; // Nearest and smoothing scalers

pub use decode::{PixelBuffer, ScanlineIndex};
pub use handle::{ImageHandle, APP7_SAVE_LIMIT, COM_SAVE_LIMIT};
pub use memstream::OutputSlot;
pub use plan::Region;
pub use prim::{ColorSpace, Outcome, Result, ThumbError};
