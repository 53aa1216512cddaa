//! Color spaces and per-pixel conversion.

use serde::{Deserialize, Serialize};

use super::marker::{Component, MarkerState};
use crate::diag::CodecError;

/// Color spaces as the codec sees them, in the file or on output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JColorSpace {
    Unknown,
    Grayscale,
    Rgb,
    YCbCr,
    Cmyk,
    Ycck,
}

impl JColorSpace {
    /// Samples per pixel.
    pub fn components(self) -> usize {
        match self {
            Self::Grayscale => 1,
            Self::Rgb | Self::YCbCr => 3,
            Self::Cmyk | Self::Ycck => 4,
            Self::Unknown => 0,
        }
    }

    /// Guess how the file's components were encoded.
    pub(crate) fn detect(components: &[Component], markers: &MarkerState) -> Self {
        match components.len() {
            1 => Self::Grayscale,
            3 => {
                if markers.saw_jfif {
                    return Self::YCbCr;
                }
                match markers.adobe_transform {
                    Some(0) => Self::Rgb,
                    Some(_) => Self::YCbCr,
                    None => {
                        let ids: Vec<u8> = components.iter().map(|c| c.id).collect();
                        if ids == [b'R', b'G', b'B'] {
                            Self::Rgb
                        } else {
                            Self::YCbCr
                        }
                    }
                }
            }
            4 => match markers.adobe_transform {
                Some(2) => Self::Ycck,
                _ => Self::Cmyk,
            },
            _ => Self::Unknown,
        }
    }

    /// The output space a decoder picks when nobody asks for one.
    pub fn default_output(self) -> Self {
        match self {
            Self::Grayscale => Self::Grayscale,
            Self::Rgb | Self::YCbCr => Self::Rgb,
            Self::Cmyk | Self::Ycck => Self::Cmyk,
            Self::Unknown => Self::Unknown,
        }
    }
}

/// A pixel converter from one codec color space to another.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Converter {
    from: JColorSpace,
    to: JColorSpace,
}

impl Converter {
    pub fn new(from: JColorSpace, to: JColorSpace) -> Result<Self, CodecError> {
        use JColorSpace::*;
        let ok = matches!(
            (from, to),
            (Grayscale, Grayscale)
                | (Grayscale, Rgb)
                | (YCbCr, Grayscale)
                | (YCbCr, Rgb)
                | (YCbCr, YCbCr)
                | (Rgb, Rgb)
                | (Cmyk, Cmyk)
                | (Ycck, Cmyk)
        );
        if !ok {
            return Err(CodecError::ConversionNotImplemented);
        }
        Ok(Self { from, to })
    }

    pub fn out_components(&self) -> usize {
        self.to.components()
    }

    /// Convert one pixel's input samples into `out`.
    #[inline]
    pub fn convert(&self, s: &[u8; 4], out: &mut [u8]) {
        use JColorSpace::*;
        match (self.from, self.to) {
            (Grayscale, Grayscale) | (YCbCr, Grayscale) => out[0] = s[0],
            (Grayscale, Rgb) => out[..3].fill(s[0]),
            (YCbCr, Rgb) => {
                let [r, g, b] = ycc_to_rgb(s[0], s[1], s[2]);
                out[0] = r;
                out[1] = g;
                out[2] = b;
            }
            (YCbCr, YCbCr) | (Rgb, Rgb) => out[..3].copy_from_slice(&s[..3]),
            // Samples go out as stored; Adobe's inverted convention is the caller's business.
            (Cmyk, Cmyk) => out[..4].copy_from_slice(s),
            (Ycck, Cmyk) => {
                let [r, g, b] = ycc_to_rgb(s[0], s[1], s[2]);
                out[0] = 255 - r;
                out[1] = 255 - g;
                out[2] = 255 - b;
                out[3] = s[3];
            }
            _ => {
                let n = out.len().min(4);
                out[..n].copy_from_slice(&s[..n]);
            }
        }
    }
}

const FIX_1_40200: i32 = 91881;
const FIX_0_34414: i32 = 22554;
const FIX_0_71414: i32 = 46802;
const FIX_1_77200: i32 = 116130;
const ONE_HALF: i32 = 1 << 15;

#[inline]
fn clamp(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// JFIF YCbCr to RGB, 16-bit fixed point.
#[inline]
pub(crate) fn ycc_to_rgb(y: u8, cb: u8, cr: u8) -> [u8; 3] {
    let y = y as i32;
    let cb = cb as i32 - 128;
    let cr = cr as i32 - 128;
    let r = y + ((FIX_1_40200 * cr + ONE_HALF) >> 16);
    let g = y + ((-FIX_0_34414 * cb - FIX_0_71414 * cr + ONE_HALF) >> 16);
    let b = y + ((FIX_1_77200 * cb + ONE_HALF) >> 16);
    [clamp(r), clamp(g), clamp(b)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn neutral_chroma_is_grey() {
        for y in [0u8, 17, 128, 255] {
            assert_eq!(ycc_to_rgb(y, 128, 128), [y, y, y]);
        }
    }

    #[test]
    fn pure_red_roughly_survives() {
        // Y, Cb, Cr of (255, 0, 0) per JFIF.
        let [r, g, b] = ycc_to_rgb(76, 85, 255);
        assert!(r >= 250 && g <= 4 && b <= 4, "{r} {g} {b}");
    }

    #[test]
    fn rgb_to_gray_is_refused() {
        assert!(Converter::new(JColorSpace::Rgb, JColorSpace::Grayscale).is_err());
    }

    #[test]
    fn ycck_keeps_black_and_complements_the_rest() {
        let c = Converter::new(JColorSpace::Ycck, JColorSpace::Cmyk).unwrap();
        let mut out = [0u8; 4];
        c.convert(&[255, 128, 128, 200], &mut out);
        assert_eq!(out, [0, 0, 0, 200]);
    }
}
