//! Make thumbnails that fit a bounding box.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::codec::DEFAULT_QUALITY;
use crate::handle::ImageHandle;
use crate::memstream::OutputSlot;

/// How to make a thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbOptions {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
    pub smoothing: bool,
}

impl Default for ThumbOptions {
    fn default() -> Self {
        Self {
            max_width: 200,
            max_height: 200,
            quality: DEFAULT_QUALITY,
            smoothing: false,
        }
    }
}

/// A finished thumbnail.
#[derive(Debug, Clone, Serialize)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub source_width: u32,
    pub source_height: u32,
    /// See [`ImageHandle::last_valid_row`].
    pub last_valid_row: Option<u32>,
    #[serde(skip)]
    pub jpeg: Vec<u8>,
}

/// Largest size with the aspect ratio of `native` that fits in `bound`.
/// Never enlarges.
pub fn fit_size(native: (u32, u32), bound: (u32, u32)) -> (u32, u32) {
    let (w, h) = (native.0 as u64, native.1 as u64);
    let (bw, bh) = (bound.0.max(1) as u64, bound.1.max(1) as u64);
    if w <= bw && h <= bh {
        return native;
    }
    // Compare bw/w against bh/h without dividing.
    if bw * h <= bh * w {
        (bw as u32, ((h * bw + w / 2) / w).max(1) as u32)
    } else {
        (((w * bh + h / 2) / h).max(1) as u32, bh as u32)
    }
}

/// Shrink an opened image into the box and encode it to memory.
#[instrument(skip(handle))]
pub fn fit(mut handle: ImageHandle, opts: &ThumbOptions) -> Result<Thumbnail> {
    let (sw, sh) = handle.size();
    let (tw, th) = fit_size((sw, sh), (opts.max_width, opts.max_height));
    handle.set_quality(opts.quality, opts.smoothing);
    handle.set_target_size(tw as i32, th as i32);

    let slot = OutputSlot::new();
    handle.set_memory_output(&slot);
    handle
        .encode()
        .with_context(|| format!("fit: cannot thumbnail {sw}x{sh} to {tw}x{th}"))?;
    let jpeg = slot.take().context("fit: encoder delivered nothing")?;

    Ok(Thumbnail {
        width: tw,
        height: th,
        source_width: sw,
        source_height: sh,
        last_valid_row: handle.last_valid_row(),
        jpeg,
    })
}

/// [`fit`] for a file.
pub fn fit_file(path: &Path, opts: &ThumbOptions) -> Result<Thumbnail> {
    let handle = ImageHandle::open_file(path)
        .with_context(|| format!("fit_file: cannot open {}", path.display()))?;
    fit(handle, opts)
}

/// [`fit`] for bytes in memory.
pub fn fit_bytes(data: &[u8], opts: &ThumbOptions) -> Result<Thumbnail> {
    let handle = ImageHandle::open_memory(data).context("fit_bytes: cannot open image")?;
    fit(handle, opts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use jpeg_encoder::{ColorType, Encoder};

    #[test]
    fn fit_keeps_aspect() {
        assert_eq!(fit_size((800, 600), (200, 200)), (200, 150));
        assert_eq!(fit_size((600, 800), (200, 200)), (150, 200));
        assert_eq!(fit_size((1000, 10), (100, 100)), (100, 1));
    }

    #[test]
    fn fit_never_enlarges() {
        assert_eq!(fit_size((50, 40), (200, 200)), (50, 40));
        assert_eq!(fit_size((5000, 1), (0, 0)), (1, 1));
    }

    #[test]
    fn options_fill_in_defaults() {
        let opts: ThumbOptions = serde_json::from_str(r#"{"max_width": 64}"#).unwrap();
        assert_eq!(opts.max_width, 64);
        assert_eq!(opts.max_height, 200);
        assert_eq!(opts.quality, 75);
    }

    #[test]
    fn thumbnail_from_bytes() {
        let data = vec![60u8; 96 * 64];
        let mut src = Vec::new();
        Encoder::new(&mut src, 90)
            .encode(&data, 96, 64, ColorType::Luma)
            .unwrap();
        let opts = ThumbOptions {
            max_width: 48,
            max_height: 48,
            ..Default::default()
        };
        let t = fit_bytes(&src, &opts).unwrap();
        assert_eq!((t.width, t.height), (48, 32));
        assert_eq!((t.source_width, t.source_height), (96, 64));
        let back = image::load_from_memory(&t.jpeg).unwrap();
        assert_eq!((back.width(), back.height()), (48, 32));
    }
}
