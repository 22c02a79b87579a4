use super::{BatchParams, Coord, Energy, EnergyCalculator, EnergyInput};
use crate::img::PixelFormat;
use std::{
    cell::{Cell, RefCell},
    rc::Rc,
    time::{Duration, Instant},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Verdict {
    /// Not enough samples yet
    Pending,
    Faster,
    NotFaster,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct MeasureSettings {
    pub(crate) samples: u32,
    pub(crate) speedup_margin: f64,
    pub(crate) stability: f64,
}

/// Stands in for the incumbent calculator while timing a candidate against
/// it on the same batches.
///
/// The incumbent always produces the energies the caller sees, the
/// candidate's results go to a scratch buffer and are thrown away.
pub(crate) struct Measurer<P: PixelFormat> {
    incumbent: Rc<dyn EnergyCalculator<P>>,
    candidate: Rc<dyn EnergyCalculator<P>>,
    settings: MeasureSettings,
    samples: Cell<u32>,
    /// Samples where the candidate beat the incumbent
    wins: Cell<u32>,
    /// Accumulated seconds per candidate patch
    incumbent_cost: Cell<f64>,
    candidate_cost: Cell<f64>,
    scratch: RefCell<Vec<Energy>>,
}

impl<P: PixelFormat> Measurer<P> {
    pub(crate) fn new(
        incumbent: Rc<dyn EnergyCalculator<P>>,
        candidate: Rc<dyn EnergyCalculator<P>>,
        settings: MeasureSettings,
    ) -> Self {
        Self {
            incumbent,
            candidate,
            settings,
            samples: Cell::new(0),
            wins: Cell::new(0),
            incumbent_cost: Cell::new(0.0),
            candidate_cost: Cell::new(0.0),
            scratch: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn incumbent(&self) -> &Rc<dyn EnergyCalculator<P>> {
        &self.incumbent
    }

    pub(crate) fn candidate(&self) -> &Rc<dyn EnergyCalculator<P>> {
        &self.candidate
    }

    pub(crate) fn samples(&self) -> u32 {
        self.samples.get()
    }

    /// Mean seconds per candidate patch for the incumbent and the candidate
    pub(crate) fn mean_costs(&self) -> (f64, f64) {
        let samples = f64::from(self.samples.get().max(1));
        (
            self.incumbent_cost.get() / samples,
            self.candidate_cost.get() / samples,
        )
    }

    pub(crate) fn verdict(&self) -> Verdict {
        let samples = self.samples.get();
        if samples < self.settings.samples {
            return Verdict::Pending;
        }

        let faster = self.candidate_cost.get() * (1.0 + self.settings.speedup_margin)
            < self.incumbent_cost.get();
        let stable = f64::from(self.wins.get()) >= self.settings.stability * f64::from(samples);

        if faster && stable {
            Verdict::Faster
        } else {
            Verdict::NotFaster
        }
    }
}

impl<P: PixelFormat> EnergyCalculator<P> for Measurer<P> {
    fn name(&self) -> &str {
        self.incumbent.name()
    }

    fn calculate(
        &self,
        input: &EnergyInput<'_, P>,
        params: &BatchParams,
        candidates: &[Coord],
        energies: &mut [Energy],
    ) {
        if candidates.is_empty() {
            self.incumbent.calculate(input, params, candidates, energies);
            return;
        }

        let mut scratch = self.scratch.borrow_mut();
        scratch.clear();
        scratch.resize(candidates.len(), 0.0);

        // The second run finds the caches the first one warmed, so the order
        // flips every sample
        let (incumbent_time, candidate_time) = if self.samples.get() % 2 == 0 {
            let incumbent_time =
                timed(|| self.incumbent.calculate(input, params, candidates, energies));
            let candidate_time =
                timed(|| self.candidate.calculate(input, params, candidates, &mut scratch[..]));
            (incumbent_time, candidate_time)
        } else {
            let candidate_time =
                timed(|| self.candidate.calculate(input, params, candidates, &mut scratch[..]));
            let incumbent_time =
                timed(|| self.incumbent.calculate(input, params, candidates, energies));
            (incumbent_time, candidate_time)
        };

        let per_patch = candidates.len() as f64;
        self.incumbent_cost
            .set(self.incumbent_cost.get() + incumbent_time.as_secs_f64() / per_patch);
        self.candidate_cost
            .set(self.candidate_cost.get() + candidate_time.as_secs_f64() / per_patch);
        if candidate_time < incumbent_time {
            self.wins.set(self.wins.get() + 1);
        }
        self.samples.set(self.samples.get() + 1);
    }
}

fn timed<F: FnOnce()>(f: F) -> Duration {
    let start = Instant::now();
    f();
    start.elapsed()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::energy::PerPixelEnergyCalculator;
    use crate::img::Image;
    use crate::mask::SoftMask;
    use crate::Dims;
    use image::Luma;
    use std::{thread, time::Duration};

    struct Fixed {
        name: &'static str,
        value: Energy,
        delay: Duration,
    }

    impl EnergyCalculator<Luma<u8>> for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn calculate(
            &self,
            _input: &EnergyInput<'_, Luma<u8>>,
            _params: &BatchParams,
            candidates: &[Coord],
            energies: &mut [Energy],
        ) {
            thread::sleep(self.delay);
            energies[..candidates.len()].iter_mut().for_each(|e| *e = self.value);
        }
    }

    fn settings(samples: u32) -> MeasureSettings {
        MeasureSettings {
            samples,
            speedup_margin: 0.1,
            stability: 0.75,
        }
    }

    fn run(measurer: &Measurer<Luma<u8>>, times: usize) -> Vec<Energy> {
        let img = Image::from_pixel(4, 4, Luma([9u8]));
        let mask = SoftMask::unmasked(4, 4);
        let (view, mask_view) = (img.view(), mask.view());
        let input = EnergyInput::new(&view, &mask_view);
        let params = BatchParams::new(Dims::square(2), Coord::new(0, 0));

        let candidates = [Coord::new(1, 1), Coord::new(2, 2)];
        let mut energies = vec![0.0; 2];
        for _ in 0..times {
            measurer.calculate(&input, &params, &candidates, &mut energies);
        }
        energies
    }

    #[test]
    fn incumbent_results_are_returned() {
        let measurer = Measurer::new(
            Rc::new(Fixed {
                name: "slow",
                value: 1.0,
                delay: Duration::from_millis(0),
            }),
            Rc::new(Fixed {
                name: "fast",
                value: 2.0,
                delay: Duration::from_millis(0),
            }),
            settings(3),
        );

        assert_eq!(run(&measurer, 1), vec![1.0, 1.0]);
        assert_eq!(measurer.name(), "slow");
    }

    #[test]
    fn pending_until_enough_samples() {
        let measurer: Measurer<Luma<u8>> = Measurer::new(
            Rc::new(PerPixelEnergyCalculator::new()),
            Rc::new(PerPixelEnergyCalculator::new()),
            settings(4),
        );

        run(&measurer, 3);
        assert_eq!(measurer.verdict(), Verdict::Pending);
        run(&measurer, 1);
        assert_eq!(measurer.samples(), 4);
        assert_ne!(measurer.verdict(), Verdict::Pending);
    }

    #[test]
    fn faster_candidate_wins() {
        let measurer = Measurer::new(
            Rc::new(Fixed {
                name: "slow",
                value: 1.0,
                delay: Duration::from_millis(3),
            }),
            Rc::new(Fixed {
                name: "fast",
                value: 1.0,
                delay: Duration::from_millis(0),
            }),
            settings(4),
        );

        run(&measurer, 4);
        assert_eq!(measurer.verdict(), Verdict::Faster);
        let (incumbent, candidate) = measurer.mean_costs();
        assert!(candidate < incumbent);
    }

    #[test]
    fn slower_candidate_loses() {
        let measurer = Measurer::new(
            Rc::new(Fixed {
                name: "fast",
                value: 1.0,
                delay: Duration::from_millis(0),
            }),
            Rc::new(Fixed {
                name: "slow",
                value: 1.0,
                delay: Duration::from_millis(3),
            }),
            settings(4),
        );

        run(&measurer, 4);
        assert_eq!(measurer.verdict(), Verdict::NotFaster);
    }

    #[test]
    fn empty_batches_are_not_samples() {
        let measurer: Measurer<Luma<u8>> = Measurer::new(
            Rc::new(PerPixelEnergyCalculator::new()),
            Rc::new(PerPixelEnergyCalculator::new()),
            settings(1),
        );

        let img = Image::from_pixel(4, 4, Luma([9u8]));
        let mask = SoftMask::unmasked(4, 4);
        let (view, mask_view) = (img.view(), mask.view());
        let input = EnergyInput::new(&view, &mask_view);
        let params = BatchParams::new(Dims::square(2), Coord::new(0, 0));

        measurer.calculate(&input, &params, &[], &mut []);
        assert_eq!(measurer.verdict(), Verdict::Pending);
    }

    struct Logged {
        name: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
    }

    impl EnergyCalculator<Luma<u8>> for Logged {
        fn name(&self) -> &str {
            self.name
        }

        fn calculate(
            &self,
            _input: &EnergyInput<'_, Luma<u8>>,
            _params: &BatchParams,
            _candidates: &[Coord],
            _energies: &mut [Energy],
        ) {
            self.log.borrow_mut().push(self.name);
        }
    }

    #[test]
    fn run_order_alternates() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let measurer = Measurer::new(
            Rc::new(Logged {
                name: "incumbent",
                log: Rc::clone(&log),
            }),
            Rc::new(Logged {
                name: "candidate",
                log: Rc::clone(&log),
            }),
            settings(4),
        );

        run(&measurer, 4);
        assert_eq!(
            *log.borrow(),
            vec![
                "incumbent",
                "candidate",
                "candidate",
                "incumbent",
                "incumbent",
                "candidate",
                "candidate",
                "incumbent",
            ]
        );
        assert_eq!(measurer.samples(), 4);
    }
}
