use super::{
    BatchParams, CalculatorFactory, Coord, Energy, EnergyCalculator, EnergyInput, ENERGY_MAX,
};
use crate::img::{Channel, PixelFormat};
use crate::Error;
use rustfft::{num_complex::Complex, Fft, FftDirection, FftPlanner};
use std::{cell::RefCell, rc::Rc, sync::Arc};
use tracing::{debug, trace};

const ZERO: Complex<f64> = Complex { re: 0.0, im: 0.0 };

/// Computes a whole batch with a handful of frequency domain correlations.
///
/// Expanding the weighted squared difference gives
/// `sum(W * A^2) - 2 * sum(W * A * B) + sum(W * B^2)`. The first term is the
/// same for every candidate, the other two are correlations of the weighted
/// target patch against the image (and the squared image), which are
/// evaluated for every possible `B` position at once. The image spectra are
/// computed when the calculator is built and reused for as long as the image
/// holds the same pixels, each batch then costs a forward transform per
/// channel and a single inverse transform. Edits to the image are detected
/// on the next batch and the spectra recomputed.
///
/// Results match [`PerPixelEnergyCalculator`](super::PerPixelEnergyCalculator)
/// up to floating point error.
pub struct FftEnergyCalculator {
    width: usize,
    height: usize,
    channels: usize,
    spectra: RefCell<Spectra>,
    forward: Transform2d,
    inverse: Transform2d,
}

/// The image the spectra were computed from, and the spectra themselves
struct Spectra {
    /// Channel values as the spectra saw them, so edits to the image are
    /// noticed before a batch uses stale spectra
    pixels: Vec<f64>,
    /// Spectrum of every channel of the image
    channels: Vec<Vec<Complex<f64>>>,
    /// Spectrum of the per pixel sum of squared channels
    squared: Vec<Complex<f64>>,
}

impl Spectra {
    fn matches<C: Channel>(&self, data: &[C]) -> bool {
        self.pixels.len() == data.len()
            && self
                .pixels
                .iter()
                .zip(data)
                .all(|(a, b)| a.to_bits() == Channel::to_f64(*b).to_bits())
    }
}

impl FftEnergyCalculator {
    pub fn new<P: PixelFormat>(input: &EnergyInput<'_, P>) -> Self {
        let dims = input.dims();
        let (width, height) = (dims.width as usize, dims.height as usize);
        let channels = P::CHANNELS;

        let mut planner = FftPlanner::new();
        let forward = Transform2d::new(&mut planner, width, height, FftDirection::Forward);
        let inverse = Transform2d::new(&mut planner, width, height, FftDirection::Inverse);
        let spectra = compute_spectra(&forward, input.image().data(), channels);

        trace!(width, height, channels, "built image spectra");

        Self {
            width,
            height,
            channels,
            spectra: RefCell::new(spectra),
            forward,
            inverse,
        }
    }

    /// Recomputes the spectra if the image no longer holds the pixels they
    /// were computed from
    fn refresh<C: Channel>(&self, data: &[C]) {
        if self.spectra.borrow().matches(data) {
            return;
        }

        debug!(
            width = self.width,
            height = self.height,
            "image changed, recomputing spectra"
        );
        *self.spectra.borrow_mut() = compute_spectra(&self.forward, data, self.channels);
    }
}

fn compute_spectra<C: Channel>(forward: &Transform2d, data: &[C], channels: usize) -> Spectra {
    let pixels: Vec<f64> = data.iter().map(|&c| Channel::to_f64(c)).collect();

    let mut squared = vec![ZERO; pixels.len() / channels];
    for (sq, pixel) in squared.iter_mut().zip(pixels.chunks_exact(channels)) {
        sq.re = pixel.iter().map(|c| c * c).sum();
    }
    forward.process(&mut squared);

    let channel_spectra = (0..channels)
        .map(|c| {
            let mut spectrum: Vec<_> = pixels
                .chunks_exact(channels)
                .map(|pixel| Complex::new(pixel[c], 0.0))
                .collect();
            forward.process(&mut spectrum);
            spectrum
        })
        .collect();

    Spectra {
        pixels,
        channels: channel_spectra,
        squared,
    }
}

impl<P: PixelFormat> EnergyCalculator<P> for FftEnergyCalculator {
    fn name(&self) -> &str {
        "fft"
    }

    fn calculate(
        &self,
        input: &EnergyInput<'_, P>,
        params: &BatchParams,
        candidates: &[Coord],
        energies: &mut [Energy],
    ) {
        let dims = input.dims();
        assert!(
            dims.width as usize == self.width
                && dims.height as usize == self.height
                && P::CHANNELS == self.channels,
            "fft energy calculator was built for a different image"
        );
        assert!(
            energies.len() >= candidates.len(),
            "{} candidates but only room for {} energies",
            candidates.len(),
            energies.len()
        );
        input.assert_patch_fits(params, Coord::new(params.a_left, params.a_top));

        let (image, mask) = (input.image(), input.mask());
        self.refresh(image.data());
        let spectra = self.spectra.borrow();
        let width = self.width;
        let n = self.width * self.height;

        // The weights of the target patch, placed at the origin
        let mut weights = vec![ZERO; n];
        for py in 0..params.height {
            let mask_row = mask.row(params.a_top + py);
            for px in 0..params.width {
                let known = 1.0 - f64::from(mask_row[(params.a_left + px) as usize]);
                weights[py as usize * width + px as usize].re = known.max(0.0);
            }
        }

        let mut target_energy = 0.0;
        let mut template = vec![ZERO; n];
        let mut correlation = vec![ZERO; n];

        for (c, spectrum) in spectra.channels.iter().enumerate() {
            template.fill(ZERO);
            for py in 0..params.height {
                let a_row = image.row(params.a_top + py);
                for px in 0..params.width {
                    let i = py as usize * width + px as usize;
                    let a = a_row[(params.a_left + px) as usize * self.channels + c].to_f64();
                    template[i].re = weights[i].re * a;
                    target_energy += weights[i].re * a * a;
                }
            }

            self.forward.process(&mut template);
            for ((acc, t), s) in correlation.iter_mut().zip(&template).zip(spectrum) {
                *acc -= t.conj() * s * 2.0;
            }
        }

        self.forward.process(&mut weights);
        for ((acc, w), s) in correlation
            .iter_mut()
            .zip(&weights)
            .zip(&spectra.squared)
        {
            *acc += w.conj() * s;
        }

        self.inverse.process(&mut correlation);
        let scale = 1.0 / n as f64;

        for (&b, energy) in candidates.iter().zip(energies.iter_mut()) {
            input.assert_patch_fits(params, b);

            let cross = correlation[b.y as usize * width + b.x as usize].re * scale;
            // Cancellation can leave tiny negatives where the true energy is 0
            let e = (target_energy + cross).max(0.0);
            *energy = if e > params.max_energy { ENERGY_MAX } else { e };
        }
    }
}

/// Builds an [`FftEnergyCalculator`] per resolution, as long as the image is
/// no larger than `max_pixels`. Each instance holds a spectrum per channel
/// plus one, so memory use grows quickly with the image size.
#[derive(Clone, Debug)]
pub struct FftCalculatorFactory {
    max_pixels: usize,
}

impl FftCalculatorFactory {
    pub fn new(max_pixels: usize) -> Self {
        Self { max_pixels }
    }
}

impl<P: PixelFormat> CalculatorFactory<P> for FftCalculatorFactory {
    fn name(&self) -> &str {
        "fft"
    }

    fn create(&self, input: &EnergyInput<'_, P>) -> Result<Rc<dyn EnergyCalculator<P>>, Error> {
        let dims = input.dims();
        let pixels = dims.width as usize * dims.height as usize;

        if pixels > self.max_pixels {
            return Err(Error::Unsupported(format!(
                "{}x{} exceeds the fft limit of {} pixels",
                dims.width, dims.height, self.max_pixels
            )));
        }

        Ok(Rc::new(FftEnergyCalculator::new(input)))
    }
}

/// A row major 2D transform done as row transforms, a transpose, and column
/// transforms. Like rustfft itself the result is not normalized.
struct Transform2d {
    width: usize,
    height: usize,
    rows: Arc<dyn Fft<f64>>,
    cols: Arc<dyn Fft<f64>>,
}

impl Transform2d {
    fn new(
        planner: &mut FftPlanner<f64>,
        width: usize,
        height: usize,
        direction: FftDirection,
    ) -> Self {
        Self {
            width,
            height,
            rows: planner.plan_fft(width, direction),
            cols: planner.plan_fft(height, direction),
        }
    }

    fn process(&self, data: &mut [Complex<f64>]) {
        let scratch_len = self
            .rows
            .get_inplace_scratch_len()
            .max(self.cols.get_inplace_scratch_len());
        let mut scratch = vec![ZERO; scratch_len];
        let mut transposed = vec![ZERO; data.len()];

        // rustfft processes every `len` sized chunk of the buffer
        self.rows.process_with_scratch(data, &mut scratch);
        transpose(data, &mut transposed, self.width, self.height);
        self.cols.process_with_scratch(&mut transposed, &mut scratch);
        transpose(&transposed, data, self.height, self.width);
    }
}

fn transpose(src: &[Complex<f64>], dst: &mut [Complex<f64>], width: usize, height: usize) {
    for y in 0..height {
        for x in 0..width {
            dst[x * height + y] = src[y * width + x];
        }
    }
}
