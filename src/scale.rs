//! Scaler: shrink the decoded crop to the target size.
//!
//! Nearest-neighbour works in place, reading ahead of where it writes.
//! Smoothing reads neighbours above the current row, so it builds the
//! result on the side and copies it back.

use tracing::instrument;

use crate::decode::PixelBuffer;
use crate::handle::ImageHandle;
use crate::plan::Region;
use crate::prim::{Result, ThumbError};

/// The crop, mapped into decoded pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    pub fn map(crop: Region, native: (u32, u32), decoded: (usize, usize)) -> Self {
        let along = |v: u32, dec: usize, nat: u32| (v as u64 * dec as u64 / nat as u64) as usize;
        Self {
            x: along(crop.x, decoded.0, native.0),
            y: along(crop.y, decoded.1, native.1),
            width: along(crop.width, decoded.0, native.0),
            height: along(crop.height, decoded.1, native.1),
        }
    }

    /// Decoded column for virtual column `v` of a grid `n` wide.
    #[inline]
    fn col(&self, v: usize, n: usize) -> usize {
        self.x + v * self.width / n
    }

    #[inline]
    fn row(&self, v: usize, n: usize) -> usize {
        self.y + v * self.height / n
    }
}

/// Nearest-neighbour, in place, top to bottom.
pub(crate) fn nearest(p: &mut PixelBuffer, win: Window, tw: usize, th: usize) {
    let nc = p.components();
    for y in 0..th {
        let src_row = p.index().offset(win.row(y, th));
        let dst_row = p.index().offset(y);
        for x in 0..tw {
            let src = src_row + win.col(x, tw) * nc;
            let dst = dst_row + x * nc;
            p.data.copy_within(src..src + nc, dst);
        }
    }
}

/// Five-tap average on a `(2tw+1)`×`(2th+1)` grid over the window.
pub(crate) fn smooth(p: &mut PixelBuffer, win: Window, tw: usize, th: usize) -> Result<()> {
    let nc = p.components();
    let (gw, gh) = (tw * 2 + 1, th * 2 + 1);
    let bytes = tw * th * nc;
    let mut out = Vec::new();
    out.try_reserve_exact(bytes)
        .map_err(|_| ThumbError::OutOfMemory { bytes })?;

    let at = |gx: usize, gy: usize| p.index().offset(win.row(gy, gh)) + win.col(gx, gw) * nc;
    for y in 0..th {
        let gy = y * 2 + 1;
        for x in 0..tw {
            let gx = x * 2 + 1;
            let c = at(gx, gy);
            let l = at(gx - 1, gy);
            let r = at(gx + 1, gy);
            let a = at(gx, gy - 1);
            let b = at(gx, gy + 1);
            for k in 0..nc {
                let px = |o: usize| p.data[o + k] as u32;
                let sum = 2 * px(c) + px(l) + px(r) + px(a) + px(b);
                out.push((sum / 6) as u8);
            }
        }
    }

    let line = tw * nc;
    for (y, src) in out.chunks_exact(line).enumerate() {
        let dst = p.index().offset(y);
        p.data[dst..dst + line].copy_from_slice(src);
    }
    Ok(())
}

impl ImageHandle {
    /// Shrink the pixels to the target. Does nothing when the target is
    /// the native size or the pixels were already scaled.
    #[instrument(skip(self), fields(origin = %self.origin))]
    pub(crate) fn scale(&mut self) -> Result<()> {
        if self.target == self.native || self.scaled {
            return Ok(());
        }
        let pixels = self.pixels.as_mut().ok_or(ThumbError::NotDecoded)?;
        let win = Window::map(self.crop, self.native, (pixels.width(), pixels.height()));
        let (tw, th) = (self.target.0 as usize, self.target.1 as usize);
        tracing::debug!(?win, tw, th, smoothing = self.smoothing, "scaling");
        if self.smoothing {
            smooth(pixels, win, tw, th)?;
        } else {
            nearest(pixels, win, tw, th);
        }
        pixels.set_view(tw, th);
        self.scaled = true;
        Ok(())
    }
}
