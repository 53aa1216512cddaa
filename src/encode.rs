//! Encode engine and the public decode/scale/encode operations.

use tracing::instrument;

use crate::codec::{Compressor, FULL_CHROMA_QUALITY};
use crate::diag::CodecError;
use crate::handle::{ImageHandle, OutputSink};
use crate::memstream::MemoryDestination;
use crate::prim::{Result, ThumbError};
use crate::stream::{Destination, FileDestination};

impl ImageHandle {
    /// Decode, scale and encode to the configured output.
    ///
    /// Use [`crate::Outcome::from`] on the result for the numeric code.
    #[instrument(skip(self), fields(origin = %self.origin))]
    pub fn encode(&mut self) -> Result<()> {
        self.decode()?;
        self.scale()?;
        self.encode_pixels()
    }

    fn open_destination(&self) -> Result<Box<dyn Destination>> {
        match &self.output {
            OutputSink::File(path) => {
                let dest = FileDestination::create(path).map_err(|source| {
                    ThumbError::OutputOpenFailed {
                        path: path.clone(),
                        source,
                    }
                })?;
                Ok(Box::new(dest))
            }
            OutputSink::Memory(slot) => Ok(Box::new(MemoryDestination::new(slot.clone()))),
            OutputSink::None => Err(ThumbError::NoOutput),
        }
    }

    fn encode_pixels(&mut self) -> Result<()> {
        if self.encoded {
            return Err(ThumbError::AlreadyEncoded);
        }
        let (tw, th) = self.target;
        if tw < 1 || th < 1 {
            return Err(ThumbError::InvalidTargetSize {
                width: tw,
                height: th,
            });
        }
        let pixels = self.pixels.as_ref().ok_or(ThumbError::NotDecoded)?;
        let dest = self.open_destination()?;
        self.encoded = true;

        let quality = self.quality;
        let run = || -> std::result::Result<(), CodecError> {
            let (w, h) = pixels.view();
            let mut c = Compressor::new(dest, w, h, pixels.space())?;
            c.set_quality(quality);
            c.set_full_chroma(quality >= FULL_CHROMA_QUALITY);
            c.start_compress()?;
            for y in 0..h {
                c.write_scanlines(&[pixels.view_row(y)])?;
            }
            c.finish_compress()
        };
        match run() {
            Ok(()) => {
                tracing::debug!(tw, th, quality, "encoded");
                Ok(())
            }
            Err(e) => {
                tracing::warn!("encode failed: {e}");
                self.errored = true;
                Err(ThumbError::EncodeAborted(e))
            }
        }
    }

    /// Decode and scale, then put a zeroed `stride × target height` buffer
    /// in the memory output for [`ImageHandle::copy_preview`] to fill.
    #[instrument(skip(self), fields(origin = %self.origin))]
    pub fn decode_raw(&mut self, stride: usize) -> Result<()> {
        self.decode()?;
        self.scale()?;
        let OutputSink::Memory(slot) = &self.output else {
            return Err(ThumbError::NoOutput);
        };
        let bytes = stride
            .checked_mul(self.target.1 as usize)
            .ok_or(ThumbError::OutOfMemory { bytes: usize::MAX })?;
        let mut buf = Vec::new();
        buf.try_reserve_exact(bytes)
            .map_err(|_| ThumbError::OutOfMemory { bytes })?;
        buf.resize(bytes, 0);
        slot.deliver(buf);
        Ok(())
    }

    /// Copy the pixels into the buffer [`ImageHandle::decode_raw`] left in
    /// the memory output, bottom row first.
    ///
    /// Three-channel pixels go out with red and blue swapped, `width`
    /// pixels per row. Other layouts copy `stride` raw bytes per row.
    #[instrument(skip(self), fields(origin = %self.origin))]
    pub fn copy_preview(&self, width: u32, height: u32, stride: usize) -> Result<()> {
        let pixels = self.pixels.as_ref().ok_or(ThumbError::NotDecoded)?;
        let OutputSink::Memory(slot) = &self.output else {
            return Err(ThumbError::NoOutput);
        };
        let geometry = || ThumbError::PreviewGeometry {
            width,
            height,
            stride,
        };
        let (w, h) = (width as usize, height as usize);
        let nc = pixels.components();
        let (vw, vh) = pixels.view();
        let row_bytes = w.checked_mul(3).ok_or_else(geometry)?;
        if h > vh || (nc == 3 && (w > vw || stride < row_bytes)) {
            return Err(geometry());
        }
        let need = stride.checked_mul(h).ok_or_else(geometry)?;

        slot.with_buffer(|out| {
            if out.len() < need {
                return Err(geometry());
            }
            let src = pixels.as_bytes();
            for y in 0..h {
                let from = pixels.index().offset(h - y - 1);
                let dst = &mut out[y * stride..(y + 1) * stride];
                if nc == 3 {
                    for (d, s) in dst[..row_bytes]
                        .chunks_exact_mut(3)
                        .zip(src[from..from + row_bytes].chunks_exact(3))
                    {
                        d[0] = s[2];
                        d[1] = s[1];
                        d[2] = s[0];
                    }
                } else {
                    let n = stride.min(src.len() - from);
                    dst[..n].copy_from_slice(&src[from..from + n]);
                }
            }
            Ok(())
        })
        .ok_or(ThumbError::NoOutput)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memstream::OutputSlot;
    use crate::prim::Outcome;
    use jpeg_encoder::{ColorType, Encoder};

    fn rgb_jpeg(w: u16, h: u16) -> Vec<u8> {
        let mut data = Vec::new();
        for y in 0..h {
            for x in 0..w {
                data.extend_from_slice(&[(x * 8) as u8, (y * 8) as u8, 200]);
            }
        }
        let mut out = Vec::new();
        Encoder::new(&mut out, 95)
            .encode(&data, w, h, ColorType::Rgb)
            .unwrap();
        out
    }

    #[test]
    fn encode_without_output_fails_at_the_encode_stage() {
        let mut h = ImageHandle::open_memory(&rgb_jpeg(16, 16)).unwrap();
        let r = h.encode();
        assert_eq!(Outcome::from(&r), Outcome::EncodeFailed);
        assert!(h.is_decoded());
        assert!(!h.is_encoded());
    }

    #[test]
    fn second_encode_is_a_decode_failure() {
        let slot = OutputSlot::new();
        let mut h = ImageHandle::open_memory(&rgb_jpeg(16, 16)).unwrap();
        h.set_memory_output(&slot);
        assert_eq!(Outcome::from(&h.encode()), Outcome::Ok);
        assert!(slot.is_filled());
        assert_eq!(Outcome::from(&h.encode()), Outcome::DecodeFailed);
    }

    #[test]
    fn preview_needs_decode_raw_first() {
        let slot = OutputSlot::new();
        let mut h = ImageHandle::open_memory(&rgb_jpeg(16, 16)).unwrap();
        h.set_memory_output(&slot);
        assert!(matches!(h.copy_preview(4, 4, 12), Err(ThumbError::NotDecoded)));
        h.decode_raw(16 * 3).unwrap();
        assert_eq!(slot.len(), Some(16 * 3 * 16));
        h.copy_preview(16, 16, 16 * 3).unwrap();
        assert!(matches!(
            h.copy_preview(17, 16, 64),
            Err(ThumbError::PreviewGeometry { .. })
        ));
    }

    #[test]
    fn preview_rejects_strides_that_overflow() {
        let slot = OutputSlot::new();
        let mut h = ImageHandle::open_memory(&rgb_jpeg(16, 16)).unwrap();
        h.set_memory_output(&slot);
        h.decode_raw(48).unwrap();
        assert!(matches!(
            h.copy_preview(16, 16, usize::MAX),
            Err(ThumbError::PreviewGeometry { .. })
        ));
        assert!(matches!(
            h.copy_preview(16, 2, usize::MAX / 2 + 1),
            Err(ThumbError::PreviewGeometry { .. })
        ));
        // The buffer is untouched and still usable.
        h.copy_preview(16, 16, 48).unwrap();
        assert_eq!(slot.len(), Some(48 * 16));
    }

    #[test]
    fn preview_flips_and_swaps() {
        let slot = OutputSlot::new();
        let mut h = ImageHandle::open_memory(&rgb_jpeg(16, 16)).unwrap();
        h.set_memory_output(&slot);
        h.decode_raw(48).unwrap();
        h.copy_preview(16, 16, 48).unwrap();
        let out = slot.take().unwrap();
        let img = h.pixels().unwrap().to_rgb8();
        let bottom_left = img.get_pixel(0, 15).0;
        assert_eq!(&out[..3], &[bottom_left[2], bottom_left[1], bottom_left[0]]);
        let top_right = img.get_pixel(15, 0).0;
        let last = &out[15 * 48 + 45..15 * 48 + 48];
        assert_eq!(last, &[top_right[2], top_right[1], top_right[0]]);
    }
}
