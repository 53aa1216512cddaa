//! Scanline-push compressor.
//!
//! Rows are pushed in top to bottom. The entropy coding itself is done by
//! `jpeg-encoder` once the last row is in, and the result goes to a
//! [`Destination`].

use jpeg_encoder::{ColorType, Encoder, SamplingFactor};

use super::color::JColorSpace;
use crate::diag::CodecError;
use crate::stream::Destination;

/// Quality used until someone says otherwise.
pub const DEFAULT_QUALITY: u8 = 75;

/// From this quality up chroma is kept at full resolution.
pub const FULL_CHROMA_QUALITY: u8 = 90;

pub struct Compressor {
    dest: Box<dyn Destination>,
    width: u16,
    height: u16,
    color: JColorSpace,
    quality: u8,
    full_chroma: bool,
    frame: Vec<u8>,
    next_scanline: u32,
    started: bool,
}

impl Compressor {
    /// Set up a compressor for a `width`×`height` image in `color`.
    pub fn new(
        dest: Box<dyn Destination>,
        width: usize,
        height: usize,
        color: JColorSpace,
    ) -> Result<Self, CodecError> {
        let too_big = || CodecError::ImageTooBig { width, height };
        if width == 0 || height == 0 {
            return Err(too_big());
        }
        let w = u16::try_from(width).map_err(|_| too_big())?;
        let h = u16::try_from(height).map_err(|_| too_big())?;
        if !matches!(
            color,
            JColorSpace::Grayscale | JColorSpace::Rgb | JColorSpace::YCbCr | JColorSpace::Cmyk
        ) {
            return Err(CodecError::ConversionNotImplemented);
        }
        Ok(Self {
            dest,
            width: w,
            height: h,
            color,
            quality: DEFAULT_QUALITY,
            full_chroma: false,
            frame: Vec::new(),
            next_scanline: 0,
            started: false,
        })
    }

    /// Set the quality, 1 to 100. Anything outside is pulled into range.
    pub fn set_quality(&mut self, quality: u8) {
        self.quality = quality.clamp(1, 100);
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Keep every component at full resolution instead of 2×2 chroma.
    pub fn set_full_chroma(&mut self, full: bool) {
        self.full_chroma = full;
    }

    fn row_bytes(&self) -> usize {
        self.width as usize * self.color.components()
    }

    pub fn start_compress(&mut self) -> Result<(), CodecError> {
        if self.started {
            return Err(CodecError::BadState("compressor already started"));
        }
        let total = self.row_bytes() * self.height as usize;
        self.frame
            .try_reserve_exact(total)
            .map_err(|_| CodecError::OutOfMemory)?;
        self.started = true;
        Ok(())
    }

    pub fn next_scanline(&self) -> u32 {
        self.next_scanline
    }

    /// Push rows. Each row must hold at least one full line of samples.
    /// Returns how many were taken.
    pub fn write_scanlines(&mut self, rows: &[&[u8]]) -> Result<usize, CodecError> {
        if !self.started {
            return Err(CodecError::BadState("write_scanlines before start_compress"));
        }
        let row_bytes = self.row_bytes();
        let room = (self.height as u32 - self.next_scanline) as usize;
        let mut taken = 0;
        for row in rows.iter().take(room) {
            let line = row
                .get(..row_bytes)
                .ok_or(CodecError::BadState("short scanline"))?;
            self.frame.extend_from_slice(line);
            taken += 1;
        }
        self.next_scanline += taken as u32;
        Ok(taken)
    }

    /// Entropy code everything and close the destination.
    pub fn finish_compress(mut self) -> Result<(), CodecError> {
        if self.next_scanline < self.height as u32 {
            return Err(CodecError::BadState("finish before all scanlines were written"));
        }
        let color = match self.color {
            JColorSpace::Grayscale => ColorType::Luma,
            JColorSpace::Rgb => ColorType::Rgb,
            JColorSpace::YCbCr => ColorType::Ycbcr,
            JColorSpace::Cmyk => ColorType::Cmyk,
            _ => return Err(CodecError::ConversionNotImplemented),
        };
        let sampling = if self.full_chroma {
            SamplingFactor::F_1_1
        } else {
            SamplingFactor::F_2_2
        };
        tracing::trace!(
            width = self.width,
            height = self.height,
            quality = self.quality,
            full_chroma = self.full_chroma,
            "encoding"
        );
        let mut encoder = Encoder::new(&mut *self.dest, self.quality);
        encoder.set_sampling_factor(sampling);
        encoder.encode(&self.frame, self.width, self.height, color)?;
        self.dest.term_destination()?;
        Ok(())
    }
}
