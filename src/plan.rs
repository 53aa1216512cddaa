//! Crop region and target size planning.
//!
//! Pure clamping: whatever the caller asks for, the result fits inside
//! the native image and is at least one pixel in each direction.

use serde::{Deserialize, Serialize};

/// A rectangle in native image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// The whole image.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

fn clamp_to(v: i64, lo: i64, hi: i64) -> u32 {
    v.clamp(lo, hi.max(lo)) as u32
}

/// Clamp a requested target size to `[1, native]`.
pub fn clamp_target(w: i64, h: i64, native: (u32, u32)) -> (u32, u32) {
    (
        clamp_to(w, 1, native.0 as i64),
        clamp_to(h, 1, native.1 as i64),
    )
}

/// Clamp a crop request and its target.
///
/// The origin is pulled inside the image first; the extent then shrinks
/// to fit, the origin never moves for it. The target is kept within the
/// crop so that scaling only ever shrinks.
pub fn plan_crop(
    x: i64,
    y: i64,
    xw: i64,
    xh: i64,
    target: (i64, i64),
    native: (u32, u32),
) -> (Region, (u32, u32)) {
    let (nw, nh) = (native.0 as i64, native.1 as i64);
    let cx = clamp_to(x, 0, nw - 1);
    let cy = clamp_to(y, 0, nh - 1);
    let cw = clamp_to(xw, 1, nw - cx as i64);
    let ch = clamp_to(xh, 1, nh - cy as i64);
    let (tw, th) = clamp_target(target.0, target.1, native);
    (
        Region {
            x: cx,
            y: cy,
            width: cw,
            height: ch,
        },
        (tw.min(cw), th.min(ch)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_is_clamped_both_ways() {
        assert_eq!(clamp_target(0, -5, (100, 50)), (1, 1));
        assert_eq!(clamp_target(500, 20, (100, 50)), (100, 20));
    }

    #[test]
    fn crop_shrinks_extent_not_origin() {
        let (r, t) = plan_crop(90, 40, 50, 50, (10, 10), (100, 50));
        assert_eq!(
            r,
            Region {
                x: 90,
                y: 40,
                width: 10,
                height: 10
            }
        );
        assert_eq!(t, (10, 10));
    }

    #[test]
    fn crop_origin_is_pulled_inside() {
        let (r, _) = plan_crop(-3, 1000, 0, 0, (1, 1), (100, 50));
        assert_eq!(
            r,
            Region {
                x: 0,
                y: 49,
                width: 1,
                height: 1
            }
        );
    }

    #[test]
    fn target_never_exceeds_crop() {
        let (r, t) = plan_crop(10, 10, 20, 5, (64, 64), (100, 50));
        assert_eq!((r.width, r.height), (20, 5));
        assert_eq!(t, (20, 5));
    }

    #[test]
    fn degenerate_one_pixel_crop() {
        let (r, t) = plan_crop(0, 0, 1, 1, (1, 1), (1, 1));
        assert_eq!(r, Region::full(1, 1));
        assert_eq!(t, (1, 1));
    }
}
