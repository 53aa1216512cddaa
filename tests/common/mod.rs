//! Fixtures shared by the integration tests. Every JPEG is made on the fly.

#![allow(dead_code)]

use jpeg_encoder::{ColorType, Encoder, SamplingFactor};

/// RGB gradient: red grows to the right, green downwards.
pub fn gradient(w: u16, h: u16) -> Vec<u8> {
    let (w, h) = (w as usize, h as usize);
    let mut data = Vec::with_capacity(w * h * 3);
    for y in 0..h {
        for x in 0..w {
            data.push((x * 255 / w.max(2)) as u8);
            data.push((y * 255 / h.max(2)) as u8);
            data.push(((x + y) * 127 / (w + h)) as u8 + 64);
        }
    }
    data
}

/// How to write a fixture.
#[derive(Debug, Clone, Copy)]
pub struct Fixture {
    pub quality: u8,
    pub sampling: SamplingFactor,
    pub progressive: bool,
    pub restart_interval: u16,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            quality: 90,
            sampling: SamplingFactor::F_2_2,
            progressive: false,
            restart_interval: 0,
        }
    }
}

impl Fixture {
    pub fn progressive() -> Self {
        Self {
            progressive: true,
            ..Self::default()
        }
    }

    pub fn full_chroma() -> Self {
        Self {
            sampling: SamplingFactor::F_1_1,
            ..Self::default()
        }
    }

    pub fn restarts(every: u16) -> Self {
        Self {
            restart_interval: every,
            ..Self::default()
        }
    }

    pub fn encode(&self, data: &[u8], w: u16, h: u16, color: ColorType) -> Vec<u8> {
        let mut out = Vec::new();
        let mut enc = Encoder::new(&mut out, self.quality);
        enc.set_sampling_factor(self.sampling);
        enc.set_progressive(self.progressive);
        if self.restart_interval > 0 {
            enc.set_restart_interval(self.restart_interval);
        }
        enc.encode(data, w, h, color).unwrap();
        out
    }

    pub fn rgb(&self, w: u16, h: u16) -> Vec<u8> {
        self.encode(&gradient(w, h), w, h, ColorType::Rgb)
    }
}

pub fn rgb_jpeg(w: u16, h: u16) -> Vec<u8> {
    Fixture::default().rgb(w, h)
}

pub fn gray_jpeg(w: u16, h: u16) -> Vec<u8> {
    let data: Vec<u8> = gradient(w, h).chunks(3).map(|p| p[0] / 2 + p[1] / 2).collect();
    Fixture::default().encode(&data, w, h, ColorType::Luma)
}

/// A flat image of one color.
pub fn flat_jpeg(w: u16, h: u16, rgb: [u8; 3]) -> Vec<u8> {
    let data: Vec<u8> = (0..w as usize * h as usize).flat_map(|_| rgb).collect();
    Fixture::default().encode(&data, w, h, ColorType::Rgb)
}

/// Put a marker segment right after SOI.
pub fn with_segment(jpeg: &[u8], code: u8, payload: &[u8]) -> Vec<u8> {
    let len = (payload.len() + 2) as u16;
    let mut out = jpeg[..2].to_vec();
    out.extend_from_slice(&[0xFF, code]);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&jpeg[2..]);
    out
}

/// Walk the marker segments up to SOS: `(code, offset of the 0xFF, length)`.
pub fn segments(jpeg: &[u8]) -> Vec<(u8, usize, usize)> {
    let mut found = Vec::new();
    let mut i = 2;
    while i + 4 <= jpeg.len() && jpeg[i] == 0xFF {
        let code = jpeg[i + 1];
        let len = u16::from_be_bytes([jpeg[i + 2], jpeg[i + 3]]) as usize;
        found.push((code, i, len));
        if code == 0xDA {
            break;
        }
        i += 2 + len;
    }
    found
}

/// Sampling bytes of each component in the frame header.
pub fn sof_sampling(jpeg: &[u8]) -> Vec<u8> {
    segments(jpeg)
        .into_iter()
        .find(|(code, _, _)| matches!(code, 0xC0 | 0xC1 | 0xC2))
        .map(|(_, at, _)| {
            let n = jpeg[at + 9] as usize;
            (0..n).map(|c| jpeg[at + 11 + c * 3]).collect()
        })
        .unwrap_or_default()
}

/// Offset of the first byte of entropy-coded data.
pub fn scan_data_start(jpeg: &[u8]) -> usize {
    let (_, at, len) = *segments(jpeg)
        .iter()
        .find(|(code, _, _)| *code == 0xDA)
        .unwrap();
    at + 2 + len
}

/// Mean absolute difference of two equally sized sample buffers.
pub fn mean_abs_diff(a: &[u8], b: &[u8]) -> f64 {
    assert_eq!(a.len(), b.len());
    let sum: u64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| (x as i32 - y as i32).unsigned_abs() as u64)
        .sum();
    sum as f64 / a.len() as f64
}

/// Offset of the marker that ends the entropy-coded data starting at `start`.
pub fn scan_data_end(jpeg: &[u8], start: usize) -> usize {
    (start..jpeg.len() - 1)
        .find(|&i| jpeg[i] == 0xFF && jpeg[i + 1] != 0 && !(0xD0..=0xD7).contains(&jpeg[i + 1]))
        .unwrap_or(jpeg.len())
}

/// Offsets of every SOS marker in the file, in order.
pub fn sos_offsets(jpeg: &[u8]) -> Vec<usize> {
    jpeg.windows(2)
        .enumerate()
        .filter(|(_, w)| w == &[0xFF, 0xDA])
        .map(|(i, _)| i)
        .collect()
}
