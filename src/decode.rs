//! Decode engine.
//!
//! Picks the DCT scale from the crop and target, pulls every scanline into
//! one owned buffer and records how much of it can be trusted.

use tracing::instrument;

use crate::codec::{DctMethod, JColorSpace};
use crate::handle::ImageHandle;
use crate::prim::{Result, ThumbError};

/// Byte offset of every row in a [`PixelBuffer`].
#[derive(Debug, Clone)]
pub struct ScanlineIndex(Vec<usize>);

impl ScanlineIndex {
    fn new(rows: usize, stride: usize) -> Self {
        Self((0..rows).map(|y| y * stride).collect())
    }

    pub fn offset(&self, row: usize) -> usize {
        self.0[row]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Decoded pixels, interleaved, rows `stride` bytes apart.
///
/// The scaler rewrites the top left corner in place and shrinks the view;
/// the allocation and row offsets never change.
#[derive(Debug)]
pub struct PixelBuffer {
    pub(crate) data: Vec<u8>,
    width: usize,
    height: usize,
    components: usize,
    space: JColorSpace,
    index: ScanlineIndex,
    view: (usize, usize),
}

impl PixelBuffer {
    pub(crate) fn allocate(
        width: usize,
        height: usize,
        components: usize,
        space: JColorSpace,
    ) -> Result<Self> {
        let stride = width * components;
        let bytes = stride
            .checked_mul(height)
            .ok_or(ThumbError::OutOfMemory { bytes: usize::MAX })?;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| ThumbError::OutOfMemory { bytes })?;
        data.resize(bytes, 0);
        Ok(Self {
            data,
            width,
            height,
            components,
            space,
            index: ScanlineIndex::new(height, stride),
            view: (width, height),
        })
    }

    /// Decoded width.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Decoded height.
    pub fn height(&self) -> usize {
        self.height
    }

    pub fn components(&self) -> usize {
        self.components
    }

    pub fn stride(&self) -> usize {
        self.width * self.components
    }

    /// Codec color space of the samples.
    pub fn space(&self) -> JColorSpace {
        self.space
    }

    pub fn index(&self) -> &ScanlineIndex {
        &self.index
    }

    /// Width and height of the meaningful part.
    pub fn view(&self) -> (usize, usize) {
        self.view
    }

    pub(crate) fn set_view(&mut self, width: usize, height: usize) {
        self.view = (width.min(self.width), height.min(self.height));
    }

    /// Full decoded row `y`.
    pub fn row(&self, y: usize) -> &[u8] {
        let at = self.index.offset(y);
        &self.data[at..at + self.stride()]
    }

    /// Row `y` cut to the view width.
    pub fn view_row(&self, y: usize) -> &[u8] {
        let at = self.index.offset(y);
        &self.data[at..at + self.view.0 * self.components]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// DCT divisor for decoding `crop` to at least `out` pixels.
pub(crate) fn scale_divisor(crop: (u32, u32), out: (u32, u32)) -> u32 {
    let sw = crop.0 / out.0.max(1);
    let sh = crop.1 / out.1.max(1);
    sw.min(sh).clamp(1, 8)
}

/// Call `read` with the next row until `height` rows are in. `read`
/// returns the row it got up to; a call that gets nowhere is a stall.
pub(crate) fn pull_rows(
    mut row: u32,
    height: u32,
    mut read: impl FnMut(u32) -> Result<u32>,
) -> Result<()> {
    while row < height {
        let next = read(row)?;
        if next <= row {
            tracing::warn!(row, "decoder stopped producing scanlines");
            return Err(ThumbError::DecodeStalled { row });
        }
        row = next;
    }
    Ok(())
}

impl ImageHandle {
    /// Decode the pixels. A handle decodes at most once.
    #[instrument(skip(self), fields(origin = %self.origin))]
    pub(crate) fn decode(&mut self) -> Result<()> {
        if self.pixels.is_some() {
            return Err(ThumbError::AlreadyDecoded);
        }
        let (tw, th) = self.target;
        if tw < 1 || th < 1 {
            return Err(ThumbError::InvalidTargetSize {
                width: tw,
                height: th,
            });
        }
        // Taken for good: whatever happens below, the decoder and its
        // source are released when this returns.
        let mut dec = self.decoder.take().ok_or(ThumbError::AlreadyDecoded)?;
        // Header warnings say nothing about which rows are intact.
        dec.err_mut().reset();
        dec.err_mut().set_trace_level(self.trace_level);

        let out = if self.smoothing {
            (tw * 2 + 1, th * 2 + 1)
        } else {
            (tw, th)
        };
        let scale = scale_divisor((self.crop.width, self.crop.height), out);
        dec.set_scale(scale);
        dec.set_dct_method(if scale == 1 {
            DctMethod::IntegerSlow
        } else {
            DctMethod::Fast
        });
        dec.set_out_color_space(self.color_space.decode_space());
        dec.calc_output_dimensions()
            .map_err(ThumbError::DecodeAborted)?;

        let width = dec.output_width() as usize;
        let height = dec.output_height() as usize;
        let components = dec.output_components();
        let mut pixels =
            PixelBuffer::allocate(width, height, components, dec.out_color_space())?;
        tracing::debug!(scale, width, height, components, "decoding");

        dec.start_decompress().map_err(ThumbError::DecodeAborted)?;
        let stride = pixels.stride();
        let (first, last) = (dec.output_scanline(), dec.output_height());
        let batch = dec.rec_outbuf_height();
        let pulled = pull_rows(first, last, |row| {
            let at = pixels.index.offset(row as usize);
            dec.read_scanlines(&mut pixels.data[at..], stride, batch)
                .map_err(ThumbError::DecodeAborted)?;
            Ok(dec.output_scanline())
        });
        if let Err(e) = pulled {
            if matches!(e, ThumbError::DecodeStalled { .. }) {
                dec.abort();
            }
            return Err(e);
        }
        dec.finish_decompress().map_err(ThumbError::DecodeAborted)?;

        self.last_valid_row = dec.err().last_valid_row();
        self.warnings = dec.err().num_warnings();
        if let Some(row) = self.last_valid_row {
            tracing::info!(
                row,
                warnings = self.warnings,
                "image is damaged below row {row}"
            );
        }
        self.pixels = Some(pixels);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn divisor_follows_the_smaller_ratio() {
        assert_eq!(scale_divisor((800, 600), (100, 100)), 6);
        assert_eq!(scale_divisor((800, 600), (400, 100)), 2);
        assert_eq!(scale_divisor((10_000, 10_000), (10, 10)), 8);
        assert_eq!(scale_divisor((64, 64), (64, 64)), 1);
    }

    #[test]
    fn pulling_stops_when_no_rows_arrive() {
        let mut calls = 0;
        let r = pull_rows(0, 16, |row| {
            calls += 1;
            Ok(if row < 8 { row + 4 } else { row })
        });
        assert!(matches!(r, Err(ThumbError::DecodeStalled { row: 8 })));
        assert_eq!(calls, 3);
        assert!(matches!(
            pull_rows(0, 4, |row| Ok(row)),
            Err(ThumbError::DecodeStalled { row: 0 })
        ));
    }

    #[test]
    fn pulling_reads_every_batch() {
        let mut seen = Vec::new();
        pull_rows(0, 10, |row| {
            seen.push(row);
            Ok((row + 4).min(10))
        })
        .unwrap();
        assert_eq!(seen, [0, 4, 8]);
        pull_rows(5, 5, |_| unreachable!()).unwrap();
    }

    #[test]
    fn divisor_never_drops_below_one() {
        assert_eq!(scale_divisor((1, 1), (3, 3)), 1);
        assert_eq!(scale_divisor((5, 5), (0, 0)), 5);
    }

    #[test]
    fn index_points_at_rows() {
        let p = PixelBuffer::allocate(5, 3, 3, JColorSpace::Rgb).unwrap();
        assert_eq!(p.index().len(), 3);
        assert_eq!(p.index().offset(2), 30);
        assert_eq!(p.row(1).len(), 15);
        assert_eq!(p.as_bytes().len(), 45);
    }

    #[test]
    fn view_is_bounded_by_the_buffer() {
        let mut p = PixelBuffer::allocate(5, 3, 1, JColorSpace::Grayscale).unwrap();
        p.set_view(9, 2);
        assert_eq!(p.view(), (5, 2));
        assert_eq!(p.view_row(0).len(), 5);
    }
}
