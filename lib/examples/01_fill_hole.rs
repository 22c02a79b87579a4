use inpaint_core as ic;

use ic::{
    image::Rgb, BatchParams, Compositor, Coord, Dims, EnergyCalculatorSelector, EnergyInput,
    Image, MaskView, ScalablePyramid, SoftMask, SoftMaskBlender, ENERGY_MAX,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SIZE: u32 = 128;
/// Side of the blocks the hole is filled with, at full resolution
const BLOCK: u32 = 8;
/// Known context around each block that the search matches against
const MARGIN: u32 = 2;
const COARSEST: usize = 2;
/// How far a match may move when refining it at the next finer level
const REFINE_RADIUS: i64 = 2;

fn bricks(x: u32, y: u32) -> Rgb<u8> {
    let row = y / 12;
    let x = x + if row % 2 == 0 { 0 } else { 12 };
    if y % 12 < 2 || x % 24 < 2 {
        Rgb([200, 200, 190])
    } else {
        let shade = ((x / 24 + row) % 3) as u8 * 20;
        Rgb([150 + shade, 60 + shade / 2, 40])
    }
}

fn in_hole(x: u32, y: u32) -> bool {
    (48..80).contains(&x) && (40..88).contains(&y)
}

/// Every position a `patch` sized square covers only known pixels
fn known_sources(mask: &MaskView<'_>, patch: u32) -> Vec<Coord> {
    let mut sources = Vec::new();
    for y in 0..=mask.height() - patch {
        for x in 0..=mask.width() - patch {
            let known = (y..y + patch).all(|py| {
                mask.row(py)[x as usize..(x + patch) as usize]
                    .iter()
                    .all(|&m| m == 0.0)
            });
            if known {
                sources.push(Coord::new(x, y));
            }
        }
    }
    sources
}

struct Block {
    /// Top left at full resolution
    at: Coord,
    /// Where the block's content comes from at the last searched level
    source: Option<Coord>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let corrupted = Image::from_fn(SIZE, SIZE, |x, y| {
        if in_hole(x, y) {
            Rgb([255, 0, 255])
        } else {
            bricks(x, y)
        }
    });
    let hole = SoftMask::from_fn(SIZE, SIZE, |x, y| if in_hole(x, y) { 1.0 } else { 0.0 })?;

    let mut blocks: Vec<Block> = (0..SIZE / BLOCK)
        .flat_map(|by| (0..SIZE / BLOCK).map(move |bx| Coord::new(bx * BLOCK, by * BLOCK)))
        .filter(|b| in_hole(b.x, b.y))
        .map(|at| Block { at, source: None })
        .collect();

    let mut selector = EnergyCalculatorSelector::builder().build()?;
    let mut image_lod = ScalablePyramid::new(&corrupted)?;
    let mut mask_lod = ScalablePyramid::new(&hole)?;
    image_lod.scale_to(COARSEST);
    mask_lod.scale_to(COARSEST);

    // Patch placements at full resolution, source then destination
    let mut placements = Vec::with_capacity(blocks.len());

    loop {
        let depth = image_lod.depth();
        let input = EnergyInput::from_pyramids(&image_lod, &mask_lod);
        let dims = input.dims();
        let block = BLOCK >> depth;
        let patch = block + 2 * MARGIN;
        let sources = known_sources(input.mask(), patch);

        info!(
            depth,
            width = dims.width,
            height = dims.height,
            sources = sources.len(),
            "searching"
        );

        for b in &mut blocks {
            let at = Coord::new(b.at.x >> depth, b.at.y >> depth);
            let target = Coord::new(
                at.x.saturating_sub(MARGIN).min(dims.width - patch),
                at.y.saturating_sub(MARGIN).min(dims.height - patch),
            );
            let (off_x, off_y) = (at.x - target.x, at.y - target.y);

            let candidates: Vec<Coord> = match b.source {
                None => sources.clone(),
                Some(prev) => {
                    let near: Vec<Coord> = sources
                        .iter()
                        .copied()
                        .filter(|s| {
                            let dx = i64::from(s.x + off_x) - 2 * i64::from(prev.x);
                            let dy = i64::from(s.y + off_y) - 2 * i64::from(prev.y);
                            dx.abs() <= REFINE_RADIUS && dy.abs() <= REFINE_RADIUS
                        })
                        .collect();

                    if near.is_empty() {
                        sources.clone()
                    } else {
                        near
                    }
                }
            };

            let params = BatchParams::new(Dims::square(patch), target);
            let mut energies = vec![0.0; candidates.len()];
            selector.calculate(&input, &params, &candidates, &mut energies);

            let (best, _) = candidates.iter().zip(&energies).fold(
                (candidates[0], ENERGY_MAX),
                |(bc, be), (&c, &e)| if e < be { (c, e) } else { (bc, be) },
            );

            b.source = Some(Coord::new(best.x + off_x, best.y + off_y));
            if depth == 0 {
                placements.push((best, target, patch));
            }
        }

        if depth == 0 {
            break;
        }

        image_lod.scale_up();
        mask_lod.scale_up();
    }

    let blend_mask = hole.feathered(2);
    let (view, mask_view) = (corrupted.view(), blend_mask.view());
    let mut compositor = Compositor::new(&view, &mask_view);
    for (src, dst, patch) in placements {
        compositor.place(src, dst, Dims::square(patch));
    }

    let mut output = Image::<Rgb<u8>>::new(1, 1);
    compositor.compose(&SoftMaskBlender, &mut output);

    std::fs::create_dir_all("out")?;
    corrupted.clone().into_image_buffer().save("out/01_corrupted.png")?;
    output.into_image_buffer().save("out/01_fill_hole.png")?;

    Ok(())
}
