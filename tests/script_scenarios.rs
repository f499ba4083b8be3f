//! End-to-end script scenarios against the scripting runtime: the reference
//! images and expectations the engine is specified against.

use std::sync::Arc;

use vidscript::{Histogram, Image, ImageProcessor, Item};

fn processor() -> Arc<ImageProcessor> {
    Arc::new(ImageProcessor::with_threads(4).unwrap())
}

/// 4x4 grayscale test image: a 2x2 block of 255 surrounded by 0.
fn cross_image() -> Image {
    #[rustfmt::skip]
    let plane = vec![
        0, 0, 0, 0,
        0, 255, 255, 0,
        0, 255, 255, 0,
        0, 0, 0, 0,
    ];
    Image::gray_from_plane(4, 4, plane).unwrap()
}

/// Mean 3x3 with constant border: the interior pixels average four 255
/// samples over nine taps.
#[test]
fn mean_constant_border_reference_values() {
    let processor = processor();
    let id = processor
        .compile("a = input(\"gray\", 8);\nb = mean(a, 3, 3, \"constant\");\nb")
        .unwrap();
    let out = processor
        .evaluate(id, cross_image())
        .unwrap()
        .into_image()
        .unwrap();
    assert_eq!(out.sample(0, 1, 1), (255 * 4) / 9);
    assert_eq!(out.sample(0, 1, 1), 113);
}

/// Otsu binary threshold recovers the 2x2 foreground block.
#[test]
fn binary_threshold_reference_partition() {
    let processor = processor();
    let id = processor
        .compile("a = input(\"gray\", 8);\nb = binary_threshold(a, \"normal\");\nb")
        .unwrap();
    let out = processor
        .evaluate(id, cross_image())
        .unwrap()
        .into_image()
        .unwrap();
    let white = out.plane(0).iter().filter(|&&p| p == 255).count();
    let black = out.plane(0).iter().filter(|&&p| p == 0).count();
    assert_eq!((white, black), (4, 12));
}

/// The inter-frame diff of two identical frames is all zero.
#[test]
fn pair_diff_of_identical_frames_is_zero() {
    let processor = processor();
    let id = processor
        .compile(
            "a = input(\"gray\", 8);\nb = input(\"gray\", 8, 2);\nc = diff(a, b, 0);\nc",
        )
        .unwrap();
    let frame = cross_image();
    let out = processor
        .evaluate_pair(id, frame.clone(), frame)
        .unwrap()
        .into_image()
        .unwrap();
    assert!(out.plane(0).iter().all(|&p| p == 0));
}

/// Tile associativity: a full-image histogram over a large gradient image
/// is identical for fine and degenerate cutoffs.
#[test]
fn histogram_is_tile_shape_independent() {
    let size = 1024u32;
    let mut plane = Vec::with_capacity((size * size) as usize);
    for y in 0..size {
        for x in 0..size {
            plane.push(((x + y) % 256) as u8);
        }
    }
    let image = Image::gray_from_plane(size, size, plane).unwrap();
    let script = "a = input(\"gray\", 8);\nh = histogram(a);\nh";

    let take_histogram = |cutoff: i32| -> Histogram {
        let processor = processor();
        processor.add_param("cutoff_x", Item::SignedInteger(cutoff));
        processor.add_param("cutoff_y", Item::SignedInteger(cutoff));
        let id = processor.compile(script).unwrap();
        match processor.evaluate(id, image.clone()).unwrap() {
            Item::Histogram(h) => h,
            other => panic!("expected a histogram, got {:?}", other.item_type()),
        }
    };

    let fine = take_histogram(128);
    let coarse = take_histogram(2048);
    assert_eq!(fine, coarse);
    assert_eq!(fine.total(), (size as u64) * (size as u64));
}

/// Unit tile cutoff invokes the kernel per pixel and still matches the
/// whole-image result.
#[test]
fn unit_cutoff_matches_whole_image_result() {
    let script = "a = input(\"gray\", 8);\nb = mean(a, 3, 3, \"mirror\");\nb";

    let evaluate_with_cutoff = |cutoff: i32| -> Image {
        let processor = processor();
        processor.add_param("cutoff_x", Item::SignedInteger(cutoff));
        processor.add_param("cutoff_y", Item::SignedInteger(cutoff));
        let id = processor.compile(script).unwrap();
        processor
            .evaluate(id, cross_image())
            .unwrap()
            .into_image()
            .unwrap()
    };

    let per_pixel = evaluate_with_cutoff(1);
    let whole = evaluate_with_cutoff(4096);
    assert_eq!(per_pixel.plane(0), whole.plane(0));
}

/// A diamond-shaped graph (two filters feeding a diff) evaluates its
/// independent branches and joins them correctly.
#[test]
fn parallel_branches_join() {
    let processor = processor();
    let id = processor
        .compile(
            "a = input(\"gray\", 8);\n\
             b = mean(a, 3, 3, \"constant\");\n\
             c = mean(a, 3, 3, \"mirror\");\n\
             d = diff(b, c, 0);\n\
             d",
        )
        .unwrap();
    let out = processor
        .evaluate(id, cross_image())
        .unwrap()
        .into_image()
        .unwrap();
    // Interior pixels see no border, so both branches agree there.
    assert_eq!(out.sample(0, 1, 1), 0);
    assert_eq!(out.sample(0, 2, 2), 0);
}

/// The RGB identity script reproduces its input bit-exactly.
#[test]
fn rgb_identity_is_bit_exact() {
    let processor = processor();
    let id = processor.compile("a = input(\"rgb\", 8);\na").unwrap();
    let len = 5 * 3;
    let image = Image::rgb_from_planes(
        5,
        3,
        [
            (0..len).map(|i| i as u8).collect(),
            (0..len).map(|i| (i * 2) as u8).collect(),
            (0..len).map(|i| (255 - i) as u8).collect(),
        ],
    )
    .unwrap();
    let out = processor
        .evaluate(id, image.clone())
        .unwrap()
        .into_image()
        .unwrap();
    for c in 0..3 {
        assert_eq!(out.plane(c), image.plane(c));
    }
}
