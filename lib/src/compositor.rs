//! Turns the patches picked by a solve into the final image.

use crate::energy::Coord;
use crate::img::{Channel, Image, ImageView, OutputImage, PixelFormat};
use crate::mask::MaskView;
use crate::Dims;
use std::marker::PhantomData;

/// Sums weighted copies of patches, so that overlapping patches average out.
pub struct PatchAccumulator<P: PixelFormat> {
    dims: Dims,
    sums: Vec<f64>,
    weights: Vec<f64>,
    _pixel: PhantomData<P>,
}

impl<P: PixelFormat> PatchAccumulator<P> {
    pub fn new(dims: Dims) -> Self {
        let pixels = dims.width as usize * dims.height as usize;
        Self {
            dims,
            sums: vec![0.0; pixels * P::CHANNELS],
            weights: vec![0.0; pixels],
            _pixel: PhantomData,
        }
    }

    #[inline]
    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// Adds the `size` patch of `source` at `src`, placed at `dst`.
    ///
    /// # Panics
    /// If either rectangle is out of bounds, or the weight is negative
    pub fn add_patch(
        &mut self,
        source: &ImageView<'_, P>,
        src: Coord,
        dst: Coord,
        size: Dims,
        weight: f64,
    ) {
        assert!(weight >= 0.0, "patch weights must not be negative");
        assert!(
            src.x + size.width <= source.width() && src.y + size.height <= source.height(),
            "source patch is outside the source image"
        );
        assert!(
            dst.x + size.width <= self.dims.width && dst.y + size.height <= self.dims.height,
            "destination patch is outside the output"
        );

        let channels = P::CHANNELS;
        let width = self.dims.width as usize;

        for py in 0..size.height {
            let src_row = source.row(src.y + py);
            for px in 0..size.width {
                let s = (src.x + px) as usize * channels;
                let d = (dst.y + py) as usize * width + (dst.x + px) as usize;

                self.weights[d] += weight;
                for (sum, c) in self.sums[d * channels..(d + 1) * channels]
                    .iter_mut()
                    .zip(&src_row[s..s + channels])
                {
                    *sum += weight * c.to_f64();
                }
            }
        }
    }

    /// The total weight of the patches covering a pixel
    pub fn coverage(&self, x: u32, y: u32) -> f64 {
        self.weights[y as usize * self.dims.width as usize + x as usize]
    }

    /// The weighted average of the patches at every pixel. Pixels no patch
    /// covers take their value from `original`.
    ///
    /// # Panics
    /// If `original` is a different size
    pub fn finish(self, original: &ImageView<'_, P>) -> Image<P::Float> {
        assert_eq!(
            original.dims(),
            self.dims,
            "the original must be the same size as the patch output"
        );

        let channels = P::CHANNELS;
        let mut blended = Image::<P::Float>::new(self.dims.width, self.dims.height);

        for (((out, sums), &weight), orig) in blended
            .data_mut()
            .chunks_exact_mut(channels)
            .zip(self.sums.chunks_exact(channels))
            .zip(&self.weights)
            .zip(original.data().chunks_exact(channels))
        {
            if weight > 0.0 {
                for (o, s) in out.iter_mut().zip(sums) {
                    *o = (s / weight) as f32;
                }
            } else {
                for (o, c) in out.iter_mut().zip(orig) {
                    *o = c.to_f64() as f32;
                }
            }
        }

        blended
    }
}

/// Combines the original image with the blended patch output.
pub trait OutputBlender<P: PixelFormat> {
    /// Writes the final image into `output`, which is resized to match the
    /// original.
    fn blend<O: OutputImage<P>>(
        &self,
        original: &ImageView<'_, P>,
        mask: &MaskView<'_>,
        patches: &Image<P::Float>,
        output: &mut O,
    );
}

/// Linear blend by mask weight: `(1 - m) * original + m * patch`.
///
/// Weight 0 copies the original untouched and weight 1 takes the patch value
/// as is.
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftMaskBlender;

impl<P: PixelFormat> OutputBlender<P> for SoftMaskBlender {
    fn blend<O: OutputImage<P>>(
        &self,
        original: &ImageView<'_, P>,
        mask: &MaskView<'_>,
        patches: &Image<P::Float>,
        output: &mut O,
    ) {
        let dims = original.dims();
        assert_eq!(dims, mask.dims(), "the mask must be the same size as the image");
        assert_eq!(
            dims,
            patches.dims(),
            "the patch output must be the same size as the image"
        );

        let channels = P::CHANNELS;
        output.init(dims.width, dims.height);

        let pixels = mask
            .data()
            .iter()
            .zip(original.data().chunks_exact(channels))
            .zip(patches.data().chunks_exact(channels));

        for (out, ((&m, orig), patch)) in output
            .data_mut()
            .chunks_exact_mut(channels)
            .zip(pixels)
        {
            debug_assert!(
                (0.0..=1.0).contains(&m),
                "mask weight {} is outside the range of 0-1",
                m
            );

            if m <= 0.0 {
                out.copy_from_slice(orig);
            } else if m >= 1.0 {
                for (o, &p) in out.iter_mut().zip(patch) {
                    *o = P::Channel::from_f64(f64::from(p));
                }
            } else {
                let m = f64::from(m);
                for ((o, a), &p) in out.iter_mut().zip(orig).zip(patch) {
                    *o = P::Channel::from_f64((1.0 - m) * a.to_f64() + m * f64::from(p));
                }
            }
        }
    }
}

/// Collects the final patch placements of a solve and blends them into the
/// output once.
pub struct Compositor<'a, P: PixelFormat> {
    original: &'a ImageView<'a, P>,
    mask: &'a MaskView<'a>,
    patches: PatchAccumulator<P>,
}

impl<'a, P: PixelFormat> Compositor<'a, P> {
    /// # Panics
    /// If the mask is a different size than the image
    pub fn new(original: &'a ImageView<'a, P>, mask: &'a MaskView<'a>) -> Self {
        assert_eq!(
            original.dims(),
            mask.dims(),
            "the mask must be the same size as the image"
        );

        Self {
            original,
            mask,
            patches: PatchAccumulator::new(original.dims()),
        }
    }

    /// Places the `size` patch of the original at `src` over `dst` with a
    /// weight of 1
    pub fn place(&mut self, src: Coord, dst: Coord, size: Dims) {
        self.patches.add_patch(self.original, src, dst, size, 1.0);
    }

    /// Gives access to the accumulator, eg to add weighted patches from
    /// another source image
    pub fn patches_mut(&mut self) -> &mut PatchAccumulator<P> {
        &mut self.patches
    }

    /// Blends the accumulated patches with the original into `output`
    pub fn compose<B: OutputBlender<P>, O: OutputImage<P>>(self, blender: &B, output: &mut O) {
        let patches = self.patches.finish(self.original);
        blender.blend(self.original, self.mask, &patches, output);
    }
}
