//! The image handle: one JPEG, from header to encoded thumbnail.
//!
//! Opening reads the header only. Pixels are decoded once, on the first
//! [`ImageHandle::encode`] or [`ImageHandle::decode_raw`], and everything
//! about the output (target size, crop, quality, sink) has to be set
//! before that.

use std::fmt::{Debug, Display, Formatter};
use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, RgbImage};
use tracing::instrument;

use crate::codec::markers::{APP7, COM};
use crate::codec::{Decompressor, SavedMarker, DEFAULT_QUALITY};
use crate::decode::PixelBuffer;
use crate::diag::CodecError;
use crate::memstream::{MemorySource, OutputSlot};
use crate::plan::{clamp_target, plan_crop, Region};
use crate::prim::{ColorSpace, Result, ThumbError};
use crate::stream::{DataSource, FileSource};

/// Longest APP7 payload kept.
pub const APP7_SAVE_LIMIT: usize = 1024;
/// Longest comment kept.
pub const COM_SAVE_LIMIT: usize = 65535;

/// Where a handle's bytes came from. Only used for logging.
#[derive(Debug, Clone)]
pub(crate) enum Origin {
    File(PathBuf),
    Memory(usize),
}

impl Display for Origin {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::File(p) => write!(f, "{}", p.display()),
            Origin::Memory(n) => write!(f, "<{n} bytes in memory>"),
        }
    }
}

/// Where the encoded JPEG goes.
#[derive(Debug, Clone, Default)]
pub(crate) enum OutputSink {
    #[default]
    None,
    File(PathBuf),
    Memory(OutputSlot),
}

/// An opened JPEG.
///
/// Dropping the handle releases the decoder, the source and the pixels.
/// Bytes already delivered to an [`OutputSlot`] stay with the slot.
pub struct ImageHandle {
    pub(crate) origin: Origin,
    /// Present from open until the decode is attempted.
    pub(crate) decoder: Option<Decompressor>,
    pub(crate) native: (u32, u32),
    pub(crate) color_space: ColorSpace,
    pub(crate) crop: Region,
    pub(crate) target: (u32, u32),
    pub(crate) quality: u8,
    pub(crate) smoothing: bool,
    pub(crate) pixels: Option<PixelBuffer>,
    pub(crate) last_valid_row: Option<u32>,
    pub(crate) warnings: u32,
    pub(crate) output: OutputSink,
    pub(crate) scaled: bool,
    pub(crate) encoded: bool,
    pub(crate) errored: bool,
    pub(crate) markers: Vec<SavedMarker>,
    pub(crate) trace_level: u8,
}

impl Debug for ImageHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageHandle")
            .field("origin", &self.origin)
            .field("native", &self.native)
            .field("color_space", &self.color_space)
            .field("crop", &self.crop)
            .field("target", &self.target)
            .field("decoded", &self.pixels.is_some())
            .field("encoded", &self.encoded)
            .finish_non_exhaustive()
    }
}

impl ImageHandle {
    /// Open a JPEG file and read its header.
    #[instrument]
    pub fn open_file(path: &Path) -> Result<Self> {
        let src = FileSource::open(path).map_err(ThumbError::OpenFailed)?;
        Self::open_source(Box::new(src), Origin::File(path.to_path_buf()))
    }

    /// Open a JPEG held in memory. The bytes are copied, so `data` may be
    /// dropped as soon as this returns.
    #[instrument(skip(data), fields(len = data.len()))]
    pub fn open_memory(data: &[u8]) -> Result<Self> {
        let src = MemorySource::copy_from(data);
        Self::open_source(Box::new(src), Origin::Memory(data.len()))
    }

    fn open_source(src: Box<dyn DataSource>, origin: Origin) -> Result<Self> {
        let mut dec = Decompressor::new(src, 0);
        dec.save_markers(APP7, APP7_SAVE_LIMIT);
        dec.save_markers(COM, COM_SAVE_LIMIT);
        dec.read_header().map_err(|e| match e {
            CodecError::EmptyImage { width, height } => ThumbError::InvalidDimensions {
                width: width as u32,
                height: height as u32,
            },
            e => ThumbError::OpenFailed(e),
        })?;

        let (width, height) = (dec.image_width(), dec.image_height());
        if width < 1 || height < 1 {
            return Err(ThumbError::InvalidDimensions { width, height });
        }
        let color_space = ColorSpace::from_jpeg(dec.jpeg_color_space());
        dec.set_out_color_space(color_space.decode_space());
        let markers = dec.saved_markers().to_vec();
        tracing::debug!(width, height, ?color_space, "header read from {origin}");

        Ok(Self {
            origin,
            decoder: Some(dec),
            native: (width, height),
            color_space,
            crop: Region::full(width, height),
            target: (width, height),
            quality: DEFAULT_QUALITY,
            smoothing: false,
            pixels: None,
            last_valid_row: None,
            warnings: 0,
            output: OutputSink::None,
            scaled: false,
            encoded: false,
            errored: false,
            markers,
            trace_level: 0,
        })
    }

    /// Native dimensions.
    pub fn size(&self) -> (u32, u32) {
        self.native
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    /// Current crop region, in native coordinates.
    pub fn crop(&self) -> Region {
        self.crop
    }

    /// Dimensions the output will have.
    pub fn target_size(&self) -> (u32, u32) {
        self.target
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    pub fn smoothing(&self) -> bool {
        self.smoothing
    }

    /// Set output quality (0 to 100) and whether to smooth when shrinking.
    pub fn set_quality(&mut self, quality: u8, smoothing: bool) {
        self.quality = quality.min(100);
        self.smoothing = smoothing;
    }

    /// Scale the whole image to `width`×`height`. Values are clamped to
    /// `[1, native]`. Ignored once pixels exist.
    pub fn set_target_size(&mut self, width: i32, height: i32) {
        if self.pixels.is_some() {
            tracing::debug!("target size change after decode ignored");
            return;
        }
        self.target = clamp_target(width as i64, height as i64, self.native);
        self.crop = Region::full(self.native.0, self.native.1);
    }

    /// Cut out `xw`×`xh` at (`x`, `y`) and scale it to `width`×`height`.
    /// Everything is clamped into the image. Ignored once pixels exist.
    pub fn set_crop_bounds(
        &mut self,
        x: i32,
        y: i32,
        xw: i32,
        xh: i32,
        width: i32,
        height: i32,
    ) {
        if self.pixels.is_some() {
            tracing::debug!("crop change after decode ignored");
            return;
        }
        let (crop, target) = plan_crop(
            x as i64,
            y as i64,
            xw as i64,
            xh as i64,
            (width as i64, height as i64),
            self.native,
        );
        self.crop = crop;
        self.target = target;
    }

    /// Write the encoded JPEG to `path`, or nowhere.
    pub fn set_file_output(&mut self, path: Option<&Path>) {
        self.output = match path {
            Some(p) => OutputSink::File(p.to_path_buf()),
            None => OutputSink::None,
        };
    }

    /// Deliver the encoded JPEG into `slot`.
    pub fn set_memory_output(&mut self, slot: &OutputSlot) {
        self.output = OutputSink::Memory(slot.clone());
    }

    /// How chatty the codec is. At 3 and above every warning is logged.
    pub fn set_trace_level(&mut self, level: u8) {
        self.trace_level = level;
        if let Some(dec) = self.decoder.as_mut() {
            dec.err_mut().set_trace_level(level);
        }
    }

    /// Saved APP7 and COM segments, in file order.
    pub fn markers(&self) -> &[SavedMarker] {
        &self.markers
    }

    /// The first comment segment, lossily decoded as UTF-8.
    pub fn comment(&self) -> Option<String> {
        self.markers
            .iter()
            .find(|m| m.code == COM)
            .map(|m| String::from_utf8_lossy(&m.data).into_owned())
    }

    /// First native row that may be damaged, or `None` if the decode
    /// raised no warnings.
    pub fn last_valid_row(&self) -> Option<u32> {
        self.last_valid_row
    }

    /// Warnings the decode raised.
    pub fn warnings(&self) -> u32 {
        self.warnings
    }

    pub fn is_decoded(&self) -> bool {
        self.pixels.is_some()
    }

    pub fn is_encoded(&self) -> bool {
        self.encoded
    }

    /// Whether an encode failed midway.
    pub fn is_errored(&self) -> bool {
        self.errored
    }

    /// The current pixels as an image, after scaling if that has run.
    /// Only gray and RGB layouts are offered.
    pub fn pixels(&self) -> Option<DynamicImage> {
        let pixels = self.pixels.as_ref()?;
        let (w, h) = pixels.view();
        let mut data = Vec::with_capacity(w * h * pixels.components());
        for y in 0..h {
            data.extend_from_slice(pixels.view_row(y));
        }
        match pixels.components() {
            1 => GrayImage::from_raw(w as u32, h as u32, data).map(DynamicImage::ImageLuma8),
            3 => RgbImage::from_raw(w as u32, h as u32, data).map(DynamicImage::ImageRgb8),
            _ => None,
        }
    }

    /// Release everything. Same as dropping.
    #[instrument(skip(self), fields(origin = %self.origin))]
    pub fn close(self) {
        tracing::debug!("closing");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jpeg_encoder::{ColorType, Encoder};

    fn jpeg(width: u16, height: u16) -> Vec<u8> {
        let mut out = Vec::new();
        let data = vec![128u8; width as usize * height as usize * 3];
        Encoder::new(&mut out, 80)
            .encode(&data, width, height, ColorType::Rgb)
            .unwrap();
        out
    }

    #[test]
    fn defaults_after_open() {
        let h = ImageHandle::open_memory(&jpeg(40, 30)).unwrap();
        assert_eq!(h.size(), (40, 30));
        assert_eq!(h.target_size(), (40, 30));
        assert_eq!(h.crop(), Region::full(40, 30));
        assert_eq!(h.quality(), 75);
        assert!(!h.smoothing());
        assert_eq!(h.color_space(), ColorSpace::Rgb8);
        assert_eq!(h.last_valid_row(), None);
    }

    #[test]
    fn garbage_does_not_open() {
        let err = ImageHandle::open_memory(b"definitely not a jpeg").unwrap_err();
        assert!(matches!(err, ThumbError::OpenFailed(_)));
        assert!(matches!(
            ImageHandle::open_memory(&[]).unwrap_err(),
            ThumbError::OpenFailed(_)
        ));
    }

    #[test]
    fn target_resets_crop() {
        let mut h = ImageHandle::open_memory(&jpeg(40, 30)).unwrap();
        h.set_crop_bounds(5, 5, 10, 10, 5, 5);
        assert_eq!(h.crop().width, 10);
        h.set_target_size(0, 100);
        assert_eq!(h.target_size(), (1, 30));
        assert_eq!(h.crop(), Region::full(40, 30));
    }

    #[test]
    fn quality_is_capped() {
        let mut h = ImageHandle::open_memory(&jpeg(8, 8)).unwrap();
        h.set_quality(250, true);
        assert_eq!(h.quality(), 100);
        assert!(h.smoothing());
    }

    #[test]
    fn no_pixels_before_decode() {
        let h = ImageHandle::open_memory(&jpeg(8, 8)).unwrap();
        assert!(h.pixels().is_none());
        assert!(h.comment().is_none());
        h.close();
    }
}
