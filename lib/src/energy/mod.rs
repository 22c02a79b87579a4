//! Patch energy (cost) calculation.
//!
//! The energy of a candidate is the sum of squared channel differences
//! between the target patch `A` and a candidate source patch `B` of the same
//! size, each pixel weighted by how much of `A` is known there
//! (`1 - mask`). Lower is better.
//!
//! Several interchangeable [`EnergyCalculator`]s produce the same energies
//! at different speeds. The [`EnergyCalculatorSelector`] measures them
//! against the live workload and hands out whichever is fastest for each
//! kind of batch.

#[cfg(feature = "fft")]
mod fft;
mod measurer;
mod per_pixel;
mod selector;

#[cfg(feature = "fft")]
pub use fft::{FftCalculatorFactory, FftEnergyCalculator};
pub(crate) use measurer::MeasureSettings;
pub use per_pixel::PerPixelEnergyCalculator;
pub use selector::{EnergyCalculatorSelector, SelectorBuilder};

use crate::img::{ImageView, PixelFormat};
use crate::img_pyramid::ScalablePyramid;
use crate::mask::MaskView;
use crate::{Dims, Error};
use image::Luma;
use std::rc::Rc;

pub type Energy = f64;

/// Reported for every candidate whose energy exceeds the batch's
/// `max_energy`
pub const ENERGY_MAX: Energy = f64::MAX;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Coord {
    pub x: u32,
    pub y: u32,
}

impl Coord {
    #[inline]
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }
}

/// Everything shared by the energy calculations of one batch: the target
/// patch and the cut off above which exact energies are no longer needed.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BatchParams {
    pub max_energy: Energy,
    /// Patch width
    pub width: u32,
    /// Patch height
    pub height: u32,
    /// Left edge of the target patch
    pub a_left: u32,
    /// Top edge of the target patch
    pub a_top: u32,
}

impl BatchParams {
    pub fn new(size: Dims, target: Coord) -> Self {
        Self {
            max_energy: ENERGY_MAX,
            width: size.width,
            height: size.height,
            a_left: target.x,
            a_top: target.y,
        }
    }

    pub fn with_max_energy(mut self, max_energy: Energy) -> Self {
        self.max_energy = max_energy;
        self
    }

    /// The class of work this batch belongs to, calculators are measured
    /// and picked per class.
    pub fn class(&self, batch_size: usize) -> BatchClass {
        BatchClass {
            width: self.width,
            height: self.height,
            size_bucket: batch_size.next_power_of_two().trailing_zeros(),
        }
    }
}

/// Describes the shape of a batch's work, but none of its values: the patch
/// size and the batch size rounded up to a power of two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BatchClass {
    pub width: u32,
    pub height: u32,
    pub size_bucket: u32,
}

/// The image and mask of a single resolution that energies are computed on.
pub struct EnergyInput<'a, P: PixelFormat> {
    image: &'a ImageView<'a, P>,
    mask: &'a MaskView<'a>,
    depth: usize,
}

impl<'a, P: PixelFormat> EnergyInput<'a, P> {
    /// # Panics
    /// If the image and mask dimensions differ
    pub fn new(image: &'a ImageView<'a, P>, mask: &'a MaskView<'a>) -> Self {
        assert_eq!(
            image.dims(),
            mask.dims(),
            "the mask must be the same size as the image"
        );

        Self {
            image,
            mask,
            depth: 0,
        }
    }

    /// Tags the input with the pyramid depth it was taken from
    pub fn at_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    /// The current resolution of an image pyramid and its mask pyramid.
    ///
    /// # Panics
    /// If the pyramids are at different depths or their levels differ in size
    pub fn from_pyramids(
        image: &'a ScalablePyramid<'a, P>,
        mask: &'a ScalablePyramid<'a, Luma<f32>>,
    ) -> Self {
        assert_eq!(
            image.depth(),
            mask.depth(),
            "image and mask pyramids must be at the same depth"
        );

        Self::new(image.current(), mask.current()).at_depth(image.depth())
    }

    #[inline]
    pub fn image(&self) -> &ImageView<'a, P> {
        self.image
    }

    #[inline]
    pub fn mask(&self) -> &MaskView<'a> {
        self.mask
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn dims(&self) -> Dims {
        self.image.dims()
    }

    #[inline]
    pub(crate) fn assert_patch_fits(&self, params: &BatchParams, at: Coord) {
        let dims = self.dims();
        assert!(
            at.x + params.width <= dims.width && at.y + params.height <= dims.height,
            "{}x{} patch at ({}, {}) does not fit in the {}x{} image",
            params.width,
            params.height,
            at.x,
            at.y,
            dims.width,
            dims.height
        );
    }
}

/// Computes the energy of every candidate source patch of a batch.
///
/// Implementations must agree on the energies they produce (up to floating
/// point error), they only differ in how fast they get there.
pub trait EnergyCalculator<P: PixelFormat> {
    fn name(&self) -> &str;

    /// Writes the energy of the `B` patch at each of `candidates` into the
    /// matching slot of `energies`.
    ///
    /// # Panics
    /// If `energies` is shorter than `candidates`, or a patch doesn't fit
    /// inside the image
    fn calculate(
        &self,
        input: &EnergyInput<'_, P>,
        params: &BatchParams,
        candidates: &[Coord],
        energies: &mut [Energy],
    );
}

/// Builds an accelerated calculator for one resolution. Building may fail,
/// eg if the calculator would need too much memory at this size, in which
/// case the selector sticks with the baseline.
///
/// The calculator is handed every later input of the same depth and size,
/// which may hold different pixels than the input it was built from.
/// Anything it precomputes from the pixels has to be checked against the
/// input of each batch.
pub trait CalculatorFactory<P: PixelFormat> {
    fn name(&self) -> &str;

    fn create(&self, input: &EnergyInput<'_, P>) -> Result<Rc<dyn EnergyCalculator<P>>, Error>;
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::img::Image;
    use crate::mask::SoftMask;
    use image::Rgb;
    use rand::{Rng, SeedableRng};
    use rand_pcg::Pcg32;

    pub(crate) fn noise(width: u32, height: u32, seed: u64) -> Image<Rgb<u8>> {
        let mut rng = Pcg32::seed_from_u64(seed);
        Image::from_fn(width, height, |_, _| Rgb([rng.gen(), rng.gen(), rng.gen()]))
    }

    pub(crate) fn soft_hole(width: u32, height: u32) -> SoftMask {
        let hole: Vec<bool> = (0..height)
            .flat_map(|y| (0..width).map(move |x| (x, y)))
            .map(|(x, y)| x >= width / 3 && x < width / 2 && y >= height / 3 && y < height / 2)
            .collect();

        SoftMask::from_hard(width, height, &hole).unwrap().feathered(2)
    }

    /// Every position a patch of `size` fits at
    pub(crate) fn all_positions(dims: Dims, size: Dims) -> Vec<Coord> {
        let mut positions = Vec::new();
        for y in 0..=dims.height - size.height {
            for x in 0..=dims.width - size.width {
                positions.push(Coord::new(x, y));
            }
        }
        positions
    }
}
