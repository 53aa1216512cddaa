//! Handle configuration, sinks and metadata.

mod common;

use common::*;
use jpeg_encoder::ColorType;
use jpegthumb::{
    codec::markers::{APP7, COM},
    thumb::{self, ThumbOptions},
    ColorSpace, ImageHandle, Outcome, OutputSlot, Region, ThumbError,
};

#[test]
fn file_in_file_out() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("in.jpg");
    let output = dir.path().join("out.jpg");
    std::fs::write(&input, rgb_jpeg(120, 90)).unwrap();

    let mut handle = ImageHandle::open_file(&input).unwrap();
    assert_eq!(handle.size(), (120, 90));
    handle.set_target_size(40, 30);
    handle.set_file_output(Some(&output));
    handle.encode().unwrap();
    handle.close();

    let img = image::open(&output).unwrap();
    assert_eq!((img.width(), img.height()), (40, 30));
}

#[test]
fn missing_file_does_not_open() {
    let dir = tempfile::tempdir().unwrap();
    let err = ImageHandle::open_file(&dir.path().join("nope.jpg")).unwrap_err();
    assert!(matches!(err, ThumbError::OpenFailed(_)));
    assert_eq!(err.outcome(), Outcome::DecodeFailed);
}

#[test]
fn unwritable_output_is_an_encode_failure() {
    let dir = tempfile::tempdir().unwrap();
    let mut handle = ImageHandle::open_memory(&rgb_jpeg(32, 32)).unwrap();
    handle.set_file_output(Some(&dir.path().join("missing").join("out.jpg")));
    let r = handle.encode();
    assert_eq!(Outcome::from(&r), Outcome::EncodeFailed);
    assert!(matches!(r, Err(ThumbError::OutputOpenFailed { .. })));
}

#[test]
fn corrupt_later_scan_aborts_the_decode() {
    let mut jpeg = Fixture::progressive().rgb(64, 48);
    let sos = sos_offsets(&jpeg);
    assert!(sos.len() > 1);
    // First component id of the second scan: not in the frame.
    jpeg[sos[1] + 5] = 0x77;

    let slot = OutputSlot::new();
    let mut handle = ImageHandle::open_memory(&jpeg).unwrap();
    handle.set_memory_output(&slot);
    let r = handle.encode();
    assert_eq!(Outcome::from(&r), Outcome::DecodeAborted);
    assert!(matches!(r, Err(ThumbError::DecodeAborted(_))));
    assert!(!slot.is_filled());
    assert!(!handle.is_decoded());
}

#[cfg(target_os = "linux")]
#[test]
fn failing_write_is_an_encode_abort() {
    let mut handle = ImageHandle::open_memory(&rgb_jpeg(64, 64)).unwrap();
    handle.set_file_output(Some(std::path::Path::new("/dev/full")));
    let r = handle.encode();
    assert_eq!(Outcome::from(&r), Outcome::EncodeFailed);
    assert!(matches!(r, Err(ThumbError::EncodeAborted(_))), "{r:?}");
    assert!(handle.is_decoded());
    assert!(handle.is_errored());
}

#[test]
fn memory_output_is_left_alone_until_success() {
    let slot = OutputSlot::new();
    let mut handle = ImageHandle::open_memory(&rgb_jpeg(32, 32)).unwrap();
    handle.set_memory_output(&slot);
    assert!(!slot.is_filled());
    handle.encode().unwrap();
    let first = slot.snapshot().unwrap();
    assert_eq!(&first[..2], &[0xFF, 0xD8]);
    assert_eq!(&first[first.len() - 2..], &[0xFF, 0xD9]);
    drop(handle);
    assert_eq!(slot.take().unwrap(), first);
}

#[test]
fn settings_after_decode_are_ignored() {
    let slot = OutputSlot::new();
    let mut handle = ImageHandle::open_memory(&rgb_jpeg(64, 64)).unwrap();
    handle.set_target_size(16, 16);
    handle.set_memory_output(&slot);
    handle.decode_raw(16 * 3).unwrap();
    handle.set_target_size(8, 8);
    handle.set_crop_bounds(1, 1, 2, 2, 2, 2);
    assert_eq!(handle.target_size(), (16, 16));
    assert_eq!(handle.crop(), Region::full(64, 64));
}

#[test]
fn crop_then_scale() {
    // Left half red, right half blue.
    let (w, h) = (64u16, 32u16);
    let data: Vec<u8> = (0..w as usize * h as usize)
        .flat_map(|i| {
            if i % w as usize > 32 {
                [20, 20, 240]
            } else {
                [240, 20, 20]
            }
        })
        .collect();
    let jpeg = Fixture::full_chroma().encode(&data, w, h, ColorType::Rgb);

    let mut handle = ImageHandle::open_memory(&jpeg).unwrap();
    handle.set_crop_bounds(40, 0, 100, 100, 8, 8);
    assert_eq!(
        handle.crop(),
        Region {
            x: 40,
            y: 0,
            width: 24,
            height: 32
        }
    );
    let slot = OutputSlot::new();
    handle.set_memory_output(&slot);
    handle.decode_raw(8 * 3).unwrap();
    let img = handle.pixels().unwrap().to_rgb8();
    assert_eq!(img.dimensions(), (8, 8));
    for px in img.pixels() {
        assert!(px.0[2] > 180 && px.0[0] < 80, "{px:?}");
    }
}

#[test]
fn gray_stays_gray() {
    let mut handle = ImageHandle::open_memory(&gray_jpeg(40, 40)).unwrap();
    assert_eq!(handle.color_space(), ColorSpace::Gray8);
    handle.set_target_size(20, 20);
    let slot = OutputSlot::new();
    handle.set_memory_output(&slot);
    handle.encode().unwrap();
    let out = slot.take().unwrap();
    assert_eq!(sof_sampling(&out).len(), 1);
    let back = ImageHandle::open_memory(&out).unwrap();
    assert_eq!(back.color_space(), ColorSpace::Gray8);
    assert_eq!(back.size(), (20, 20));
}

#[test]
fn cmyk_round_trip() {
    let data: Vec<u8> = (0..32 * 24).flat_map(|_| [10u8, 200, 30, 60]).collect();
    let jpeg = Fixture::default().encode(&data, 32, 24, ColorType::Cmyk);
    let mut handle = ImageHandle::open_memory(&jpeg).unwrap();
    assert_eq!(handle.color_space(), ColorSpace::Cmyk);
    handle.set_target_size(16, 12);
    let slot = OutputSlot::new();
    handle.set_memory_output(&slot);
    handle.encode().unwrap();
    let out = slot.take().unwrap();
    assert_eq!(sof_sampling(&out).len(), 4);
    let back = ImageHandle::open_memory(&out).unwrap();
    assert_eq!(back.size(), (16, 12));
    assert_eq!(back.color_space(), ColorSpace::Cmyk);
    assert!(handle.pixels().is_none());
}

#[test]
fn saved_markers_are_capped() {
    let app7 = vec![7u8; 2000];
    let jpeg = with_segment(&rgb_jpeg(16, 16), APP7, &app7);
    let jpeg = with_segment(&jpeg, COM, b"shot on a potato");
    let handle = ImageHandle::open_memory(&jpeg).unwrap();

    let markers = handle.markers();
    assert_eq!(markers.len(), 2);
    assert_eq!(markers[0].code, COM);
    assert_eq!(markers[1].code, APP7);
    assert_eq!(markers[1].original_length, 2000);
    assert_eq!(markers[1].data.len(), 1024);
    assert_eq!(handle.comment().as_deref(), Some("shot on a potato"));
}

#[test]
fn preview_is_bottom_up_bgr() {
    let slot = OutputSlot::new();
    let mut handle = ImageHandle::open_memory(&rgb_jpeg(32, 16)).unwrap();
    handle.set_target_size(16, 8);
    handle.set_memory_output(&slot);
    let stride = 16 * 3 + 4;
    handle.decode_raw(stride).unwrap();
    handle.copy_preview(16, 8, stride).unwrap();
    let preview = slot.take().unwrap();
    assert_eq!(preview.len(), stride * 8);

    let img = handle.pixels().unwrap().to_rgb8();
    for y in 0..8 {
        for x in 0..16 {
            let src = img.get_pixel(x, 7 - y).0;
            let at = y as usize * stride + x as usize * 3;
            assert_eq!(&preview[at..at + 3], &[src[2], src[1], src[0]]);
        }
    }
}

#[test]
fn preview_without_memory_output() {
    let mut handle = ImageHandle::open_memory(&rgb_jpeg(16, 16)).unwrap();
    let r = handle.decode_raw(48);
    assert!(matches!(r, Err(ThumbError::NoOutput)));
    assert!(matches!(
        handle.copy_preview(16, 16, 48),
        Err(ThumbError::NoOutput)
    ));
}

#[test]
fn thumbnails_fit_the_box() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wide.jpg");
    std::fs::write(&path, rgb_jpeg(400, 100)).unwrap();
    let opts = ThumbOptions {
        max_width: 100,
        max_height: 100,
        quality: 60,
        smoothing: true,
    };
    let t = thumb::fit_file(&path, &opts).unwrap();
    assert_eq!((t.width, t.height), (100, 25));
    let img = image::load_from_memory(&t.jpeg).unwrap();
    assert_eq!((img.width(), img.height()), (100, 25));

    let err = thumb::fit_bytes(b"nope", &opts).unwrap_err();
    assert!(err.downcast_ref::<ThumbError>().is_some());
}
