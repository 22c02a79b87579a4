use inpaint_core as ic;

use ic::{
    image::{self, Rgb},
    BatchParams, Compositor, Coord, Dims, EnergyCalculatorSelector, EnergyInput, Image,
    ScalablePyramid, SoftMask, SoftMaskBlender, ENERGY_MAX,
};

const DIM: u32 = 24;
const HOLE: std::ops::Range<u32> = 8..16;
const PATCH: u32 = 8;

fn stripe(x: u32) -> Rgb<u8> {
    let phase = (x % 4) as u8;
    Rgb([phase * 60, 255 - phase * 60, 30])
}

fn in_hole(x: u32, y: u32) -> bool {
    HOLE.contains(&x) && HOLE.contains(&y)
}

/// Every position an 8x8 patch fits at without touching the hole
fn known_sources(dims: Dims, patch: u32, hole: std::ops::Range<u32>) -> Vec<Coord> {
    let mut sources = Vec::new();
    for y in 0..=dims.height - patch {
        for x in 0..=dims.width - patch {
            let clear_x = x + patch <= hole.start || x >= hole.end;
            let clear_y = y + patch <= hole.start || y >= hole.end;
            if clear_x || clear_y {
                sources.push(Coord::new(x, y));
            }
        }
    }
    sources
}

fn best(
    selector: &mut EnergyCalculatorSelector<Rgb<u8>>,
    input: &EnergyInput<'_, Rgb<u8>>,
    params: &BatchParams,
    sources: &[Coord],
) -> (Coord, f64) {
    let mut energies = vec![0.0; sources.len()];
    selector.calculate(input, params, sources, &mut energies);

    sources
        .iter()
        .zip(energies)
        .fold((sources[0], ENERGY_MAX), |(bc, be), (&c, e)| {
            if e < be {
                (c, e)
            } else {
                (bc, be)
            }
        })
}

#[test]
fn fills_a_hole_in_stripes() {
    let original = Image::from_fn(DIM, DIM, |x, _| stripe(x));
    let corrupted = Image::from_fn(DIM, DIM, |x, y| {
        if in_hole(x, y) {
            Rgb([0, 0, 0])
        } else {
            stripe(x)
        }
    });
    let mask = SoftMask::from_fn(DIM, DIM, |x, y| if in_hole(x, y) { 1.0 } else { 0.0 }).unwrap();

    let mut selector = EnergyCalculatorSelector::builder()
        .measurement_samples(2)
        .build()
        .unwrap();

    let mut image_lod = ScalablePyramid::new(&corrupted).unwrap();
    let mut mask_lod = ScalablePyramid::new(&mask).unwrap();

    // Coarse pass, every target still has a perfect match at half resolution
    image_lod.scale_down();
    mask_lod.scale_down();
    {
        let input = EnergyInput::from_pyramids(&image_lod, &mask_lod);
        assert_eq!(input.dims(), Dims::square(DIM / 2));

        let sources = known_sources(input.dims(), PATCH / 2, 4..8);
        for &(tx, ty) in &[(3, 3), (5, 3), (3, 5), (5, 5)] {
            let params = BatchParams::new(Dims::square(PATCH / 2), Coord::new(tx, ty));
            let (_, energy) = best(&mut selector, &input, &params, &sources);
            assert!(energy < 1.0, "coarse energy {}", energy);
        }
    }

    image_lod.scale_up();
    mask_lod.scale_up();

    let input = EnergyInput::from_pyramids(&image_lod, &mask_lod);
    let sources = known_sources(input.dims(), PATCH, HOLE);

    let mut placements = Vec::new();
    for ty in HOLE.step_by(4) {
        for tx in HOLE.step_by(4) {
            // An 8x8 target around each 4x4 block of the hole, so it sees
            // some known pixels
            let params = BatchParams::new(Dims::square(PATCH), Coord::new(tx - 2, ty - 2));
            let (source, energy) = best(&mut selector, &input, &params, &sources);
            assert!(energy < 1e-3, "no exact match for ({}, {}): {}", tx, ty, energy);

            placements.push((
                Coord::new(source.x + 2, source.y + 2),
                Coord::new(tx, ty),
            ));
        }
    }

    let (view, mask_view) = (corrupted.view(), mask.view());
    let mut compositor = Compositor::new(&view, &mask_view);
    for (src, dst) in placements {
        compositor.place(src, dst, Dims::square(4));
    }

    let mut output = image::RgbImage::new(1, 1);
    compositor.compose(&SoftMaskBlender, &mut output);

    assert_eq!(output.dimensions(), (DIM, DIM));
    assert_eq!(output.as_raw(), original.data());
}

#[test]
fn gray_image_white_corner() {
    let gray = image::Luma([127u8]);
    let img = image::GrayImage::from_pixel(4, 4, gray);
    let mask = SoftMask::from_hard(
        4,
        4,
        &[
            false, false, false, false, //
            false, false, false, false, //
            false, false, true, true, //
            false, false, true, true,
        ],
    )
    .unwrap();
    let white = Image::from_pixel(2, 2, image::Luma([255u8]));

    let view = ic::ImageView::borrowed(&img).unwrap();
    let mask_view = mask.view();
    let mut compositor = Compositor::new(&view, &mask_view);
    compositor.patches_mut().add_patch(
        &white.view(),
        Coord::new(0, 0),
        Coord::new(2, 2),
        Dims::square(2),
        1.0,
    );

    let mut output = Image::<image::Luma<u8>>::new(1, 1);
    compositor.compose(&SoftMaskBlender, &mut output);

    for y in 0..4 {
        for x in 0..4 {
            let expected = if x >= 2 && y >= 2 { 255 } else { 127 };
            assert_eq!(output.get_pixel(x, y).0[0], expected, "pixel ({}, {})", x, y);
        }
    }
}

#[test]
fn revisited_depths_give_the_same_energies() {
    let img = Image::from_fn(40, 40, |x, y| {
        Rgb([(x * 6) as u8, (y * 6) as u8, ((x * y) % 256) as u8])
    });
    let mask = SoftMask::from_fn(40, 40, |x, y| if x > 20 && y > 20 { 1.0 } else { 0.0 })
        .unwrap()
        .feathered(2);

    let mut selector = EnergyCalculatorSelector::builder()
        .accelerated(false)
        .build()
        .unwrap();
    let mut image_lod = ScalablePyramid::new(&img).unwrap();
    let mut mask_lod = ScalablePyramid::new(&mask).unwrap();

    let params = BatchParams::new(Dims::square(3), Coord::new(4, 4));
    let sources = [Coord::new(0, 0), Coord::new(1, 2), Coord::new(6, 3)];

    let mut energies_at_2 = |image_lod: &ScalablePyramid<'_, Rgb<u8>>,
                             mask_lod: &ScalablePyramid<'_, image::Luma<f32>>| {
        let input = EnergyInput::from_pyramids(image_lod, mask_lod);
        assert_eq!(input.depth(), 2);
        let mut energies = vec![0.0; sources.len()];
        selector.calculate(&input, &params, &sources, &mut energies);
        energies
    };

    image_lod.scale_to(2);
    mask_lod.scale_to(2);
    let first = energies_at_2(&image_lod, &mask_lod);

    image_lod.scale_to(0);
    mask_lod.scale_to(0);
    assert_eq!(image_lod.materialized_levels(), 1);

    image_lod.scale_to(2);
    mask_lod.scale_to(2);
    let second = energies_at_2(&image_lod, &mask_lod);

    assert_eq!(first, second);
}
