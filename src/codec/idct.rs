//! Inverse DCT, full size and reduced.
//!
//! A block of 64 dequantized coefficients comes in, an N×N patch of
//! samples comes out, where N is 8, 4, 2 or 1 depending on how far the
//! image is being shrunk. Shrinking here is much cheaper than decoding
//! at full size and throwing pixels away afterwards.

/// Zig-zag index to natural (row-major) index.
#[rustfmt::skip]
pub(crate) const ZIGZAG: [usize; 64] = [
     0,  1,  8, 16,  9,  2,  3, 10,
    17, 24, 32, 25, 18, 11,  4,  5,
    12, 19, 26, 33, 40, 48, 41, 34,
    27, 20, 13,  6,  7, 14, 21, 28,
    35, 42, 49, 56, 57, 50, 43, 36,
    29, 22, 15, 23, 30, 37, 44, 51,
    58, 59, 52, 45, 38, 31, 39, 46,
    53, 60, 61, 54, 47, 55, 62, 63,
];

/// How the inverse transform is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DctMethod {
    /// Accurate integer transform. Used when decoding at full size.
    IntegerSlow,
    /// Cheaper transform. Used whenever the image is being scaled down.
    Fast,
}

// Fixed-point constants of the accurate transform, CONST_BITS = 13.
const CB: i64 = 13;
const P1: i64 = 2;
const F0298: i64 = 2446;
const F0390: i64 = 3196;
const F0541: i64 = 4433;
const F0765: i64 = 6270;
const F0899: i64 = 7373;
const F1175: i64 = 9633;
const F1501: i64 = 12299;
const F1847: i64 = 15137;
const F1961: i64 = 16069;
const F2053: i64 = 16819;
const F2562: i64 = 20995;
const F3072: i64 = 25172;

/// A configured inverse transform.
#[derive(Debug, Clone)]
pub(crate) struct Idct {
    method: DctMethod,
    size: usize,
    /// size×size cosine basis for the table-driven path, `[x * size + u]`.
    basis: Vec<f32>,
}

impl Idct {
    /// `size` is the output patch edge: 8, 4, 2 or 1.
    pub fn new(method: DctMethod, size: usize) -> Self {
        let size = size.clamp(1, 8);
        let mut basis = vec![0f32; size * size];
        for x in 0..size {
            for u in 0..size {
                let cu = if u == 0 {
                    std::f32::consts::FRAC_1_SQRT_2
                } else {
                    1.0
                };
                let angle = ((2 * x + 1) * u) as f32 * std::f32::consts::PI / (2 * size) as f32;
                // Same per-coefficient weight as the 8-point transform, so a
                // DC of D still comes out as D / 8 at every size.
                basis[x * size + u] = 0.5 * cu * angle.cos();
            }
        }
        Self {
            method,
            size,
            basis,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Transform one block. `coef` and `quant` are in natural order.
    /// Writes `size` rows of `size` samples starting at `out[0]`, `stride` apart.
    pub fn transform(&self, coef: &[i16; 64], quant: &[u16; 64], out: &mut [u8], stride: usize) {
        if self.size == 8 && self.method == DctMethod::IntegerSlow {
            islow(coef, quant, out, stride);
        } else {
            self.reduced(coef, quant, out, stride);
        }
    }

    /// Table-driven transform over the low `size`×`size` coefficients.
    ///
    /// Evaluating only the low frequencies on an `size`-point grid gives the
    /// block averaged down by `8 / size`.
    fn reduced(&self, coef: &[i16; 64], quant: &[u16; 64], out: &mut [u8], stride: usize) {
        let n = self.size;
        if n == 1 {
            let dc = coef[0] as f32 * quant[0] as f32 / 8.0;
            out[0] = clamp_f(dc + 128.0);
            return;
        }
        let mut tmp = [0f32; 64];
        // Horizontal pass: for each frequency row v, samples x.
        for v in 0..n {
            for x in 0..n {
                let mut acc = 0f32;
                for u in 0..n {
                    let c = coef[v * 8 + u];
                    if c != 0 {
                        acc += self.basis[x * n + u] * c as f32 * quant[v * 8 + u] as f32;
                    }
                }
                tmp[v * n + x] = acc;
            }
        }
        // Vertical pass.
        for y in 0..n {
            let row = &mut out[y * stride..y * stride + n];
            for (x, px) in row.iter_mut().enumerate() {
                let mut acc = 0f32;
                for v in 0..n {
                    acc += self.basis[y * n + v] * tmp[v * n + x];
                }
                *px = clamp_f(acc + 128.0);
            }
        }
    }
}

#[inline]
fn clamp_f(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[inline]
fn descale(x: i64, n: i64) -> i64 {
    (x + (1 << (n - 1))) >> n
}

#[inline]
fn clamp(x: i64) -> u8 {
    x.clamp(0, 255) as u8
}

/// One 8-point butterfly. Returns the eight outputs before descaling.
#[inline]
fn butterfly(d: [i64; 8]) -> [i64; 8] {
    let [d0, d1, d2, d3, d4, d5, d6, d7] = d;

    let z1 = (d2 + d6) * F0541;
    let tmp2 = z1 - d6 * F1847;
    let tmp3 = z1 + d2 * F0765;
    let tmp0 = (d0 + d4) << CB;
    let tmp1 = (d0 - d4) << CB;
    let (t10, t13) = (tmp0 + tmp3, tmp0 - tmp3);
    let (t11, t12) = (tmp1 + tmp2, tmp1 - tmp2);

    let (zz1, zz2, zz3, zz4) = (d7 + d1, d5 + d3, d7 + d3, d5 + d1);
    let z5 = (zz3 + zz4) * F1175;
    let mut o0 = d7 * F0298;
    let mut o1 = d5 * F2053;
    let mut o2 = d3 * F3072;
    let mut o3 = d1 * F1501;
    let (s1, s2) = (-zz1 * F0899, -zz2 * F2562);
    let s3 = -zz3 * F1961 + z5;
    let s4 = -zz4 * F0390 + z5;
    o0 += s1 + s3;
    o1 += s2 + s4;
    o2 += s2 + s3;
    o3 += s1 + s4;

    [
        t10 + o3,
        t11 + o2,
        t12 + o1,
        t13 + o0,
        t13 - o0,
        t12 - o1,
        t11 - o2,
        t10 - o3,
    ]
}

/// Accurate 8×8 integer transform.
fn islow(coef: &[i16; 64], quant: &[u16; 64], out: &mut [u8], stride: usize) {
    let mut ws = [0i64; 64];

    for row in 0..8 {
        let b = row * 8;
        let mut d = [0i64; 8];
        for (i, v) in d.iter_mut().enumerate() {
            *v = coef[b + i] as i64 * quant[b + i] as i64;
        }
        if d[1..].iter().all(|&v| v == 0) {
            ws[b..b + 8].fill(d[0] << P1);
            continue;
        }
        let o = butterfly(d);
        for i in 0..8 {
            ws[b + i] = descale(o[i], CB - P1);
        }
    }

    for col in 0..8 {
        let mut d = [0i64; 8];
        for (i, v) in d.iter_mut().enumerate() {
            *v = ws[col + i * 8];
        }
        if d[1..].iter().all(|&v| v == 0) {
            let v = clamp(descale(d[0], P1 + 3) + 128);
            for y in 0..8 {
                out[y * stride + col] = v;
            }
            continue;
        }
        let o = butterfly(d);
        for y in 0..8 {
            out[y * stride + col] = clamp(descale(o[y], CB + P1 + 3) + 128);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_quant() -> [u16; 64] {
        [1u16; 64]
    }

    #[test]
    fn dc_only_block_is_flat_at_every_size() {
        let mut coef = [0i16; 64];
        // DC of 80 with unit quantization is +10 over mid-grey.
        coef[0] = 80;
        for (method, size) in [
            (DctMethod::IntegerSlow, 8),
            (DctMethod::Fast, 8),
            (DctMethod::Fast, 4),
            (DctMethod::Fast, 2),
            (DctMethod::Fast, 1),
        ] {
            let idct = Idct::new(method, size);
            let mut out = vec![0u8; size * size];
            idct.transform(&coef, &flat_quant(), &mut out, size);
            assert!(out.iter().all(|&v| v == 138), "{method:?} {size}: {out:?}");
        }
    }

    #[test]
    fn fast_and_slow_agree_closely() {
        let mut coef = [0i16; 64];
        coef[0] = -200;
        coef[1] = 31;
        coef[8] = -17;
        coef[9] = 6;
        coef[18] = 4;
        let q = flat_quant();
        let mut slow = [0u8; 64];
        let mut fast = [0u8; 64];
        Idct::new(DctMethod::IntegerSlow, 8).transform(&coef, &q, &mut slow, 8);
        Idct::new(DctMethod::Fast, 8).transform(&coef, &q, &mut fast, 8);
        for (a, b) in slow.iter().zip(fast.iter()) {
            assert!((*a as i32 - *b as i32).abs() <= 1, "{a} vs {b}");
        }
    }

    #[test]
    fn reduced_output_tracks_block_average() {
        // A horizontal ramp: left half dark, right half bright.
        let mut coef = [0i16; 64];
        coef[1] = -100;
        let q = flat_quant();
        let mut full = [0u8; 64];
        Idct::new(DctMethod::IntegerSlow, 8).transform(&coef, &q, &mut full, 8);
        let mut half = [0u8; 16];
        Idct::new(DctMethod::Fast, 4).transform(&coef, &q, &mut half, 4);
        // Each 4x4 output sample should sit near the mean of its 2x2 source patch.
        for y in 0..4 {
            for x in 0..4 {
                let mean = (full[(2 * y) * 8 + 2 * x] as i32
                    + full[(2 * y) * 8 + 2 * x + 1] as i32
                    + full[(2 * y + 1) * 8 + 2 * x] as i32
                    + full[(2 * y + 1) * 8 + 2 * x + 1] as i32)
                    / 4;
                assert!((half[y * 4 + x] as i32 - mean).abs() <= 3);
            }
        }
        assert!(half[0] < half[3]);
    }

    #[test]
    fn garbage_coefficients_do_not_overflow() {
        let coef = [i16::MAX; 64];
        let q = [u16::MAX; 64];
        let mut out = [0u8; 64];
        Idct::new(DctMethod::IntegerSlow, 8).transform(&coef, &q, &mut out, 8);
        Idct::new(DctMethod::Fast, 4).transform(&coef, &q, &mut out, 4);
    }
}
