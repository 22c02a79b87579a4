use super::{BatchParams, Coord, Energy, EnergyCalculator, EnergyInput, ENERGY_MAX};
use crate::img::{Channel, PixelFormat};

/// The reference calculator, walks every pixel of every candidate patch.
///
/// It works at any resolution and patch size, which makes it the fallback
/// whenever nothing faster is available. Large batches are split across
/// threads.
#[derive(Clone, Debug)]
pub struct PerPixelEnergyCalculator {
    max_thread_count: usize,
    parallel_threshold: usize,
}

impl Default for PerPixelEnergyCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl PerPixelEnergyCalculator {
    /// A single threaded calculator
    pub fn new() -> Self {
        Self {
            max_thread_count: 1,
            parallel_threshold: usize::MAX,
        }
    }

    /// Splits batches of at least `parallel_threshold` candidates across up
    /// to `max_thread_count` threads
    pub fn with_threads(max_thread_count: usize, parallel_threshold: usize) -> Self {
        Self {
            max_thread_count: max_thread_count.max(1),
            parallel_threshold: parallel_threshold.max(1),
        }
    }

    fn thread_count(&self, batch_size: usize) -> usize {
        if batch_size < self.parallel_threshold {
            return 1;
        }

        self.max_thread_count
            .min(batch_size / self.parallel_threshold)
            .max(1)
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn calculate_parallel<P: PixelFormat>(
        &self,
        threads: usize,
        input: &EnergyInput<'_, P>,
        params: &BatchParams,
        candidates: &[Coord],
        energies: &mut [Energy],
    ) {
        let chunk_size = (candidates.len() + threads - 1) / threads;

        let result = crossbeam_utils::thread::scope(|scope| {
            for (candidates, energies) in candidates
                .chunks(chunk_size)
                .zip(energies.chunks_mut(chunk_size))
            {
                scope.spawn(move |_| calculate_serial(input, params, candidates, energies));
            }
        });

        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
    }
}

impl<P: PixelFormat> EnergyCalculator<P> for PerPixelEnergyCalculator {
    fn name(&self) -> &str {
        "per-pixel"
    }

    fn calculate(
        &self,
        input: &EnergyInput<'_, P>,
        params: &BatchParams,
        candidates: &[Coord],
        energies: &mut [Energy],
    ) {
        assert!(
            energies.len() >= candidates.len(),
            "{} candidates but only room for {} energies",
            candidates.len(),
            energies.len()
        );
        input.assert_patch_fits(params, Coord::new(params.a_left, params.a_top));
        let energies = &mut energies[..candidates.len()];

        #[cfg(not(target_arch = "wasm32"))]
        {
            let threads = self.thread_count(candidates.len());
            if threads > 1 {
                return self.calculate_parallel(threads, input, params, candidates, energies);
            }
        }

        calculate_serial(input, params, candidates, energies);
    }
}

fn calculate_serial<P: PixelFormat>(
    input: &EnergyInput<'_, P>,
    params: &BatchParams,
    candidates: &[Coord],
    energies: &mut [Energy],
) {
    for (&b, energy) in candidates.iter().zip(energies.iter_mut()) {
        input.assert_patch_fits(params, b);
        *energy = patch_energy(input, params, b);
    }
}

fn patch_energy<P: PixelFormat>(
    input: &EnergyInput<'_, P>,
    params: &BatchParams,
    b: Coord,
) -> Energy {
    let (image, mask) = (input.image(), input.mask());
    let channels = P::CHANNELS;
    let mut energy = 0.0;

    for py in 0..params.height {
        let a_row = image.row(params.a_top + py);
        let b_row = image.row(b.y + py);
        let mask_row = mask.row(params.a_top + py);

        for px in 0..params.width {
            let ax = (params.a_left + px) as usize;
            let known = 1.0 - f64::from(mask_row[ax]);
            if known <= 0.0 {
                continue;
            }

            let bx = (b.x + px) as usize;
            let a_px = &a_row[ax * channels..(ax + 1) * channels];
            let b_px = &b_row[bx * channels..(bx + 1) * channels];

            let diff: f64 = a_px
                .iter()
                .zip(b_px)
                .map(|(a, b)| {
                    let d = a.to_f64() - b.to_f64();
                    d * d
                })
                .sum();
            energy += known * diff;
        }

        // Energies only ever grow, so the rest of the patch can't bring this
        // candidate back under the cut off
        if energy > params.max_energy {
            return ENERGY_MAX;
        }
    }

    energy
}
