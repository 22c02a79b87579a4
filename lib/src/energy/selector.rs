use super::measurer::{MeasureSettings, Measurer, Verdict};
use super::{
    BatchClass, BatchParams, CalculatorFactory, Coord, Energy, EnergyCalculator, EnergyInput,
    PerPixelEnergyCalculator,
};
use crate::img::PixelFormat;
use crate::{errors, Dims, Error, Settings};
use std::{collections::HashMap, rc::Rc};
use tracing::debug;

/// Configures and builds an [`EnergyCalculatorSelector`].
pub struct SelectorBuilder<P: PixelFormat> {
    settings: Settings,
    factories: Vec<Box<dyn CalculatorFactory<P>>>,
    baseline: Option<Rc<dyn EnergyCalculator<P>>>,
}

impl<P: PixelFormat> Default for SelectorBuilder<P> {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            factories: Vec::new(),
            baseline: None,
        }
    }
}

impl<P: PixelFormat> SelectorBuilder<P> {
    /// Creates a new `SelectorBuilder` with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// How many measured batches a candidate calculator gets before the
    /// selector decides whether to switch to it.
    ///
    /// Default: 8
    pub fn measurement_samples(mut self, samples: u32) -> Self {
        self.settings.measurement_samples = samples;
        self
    }

    /// How much cheaper per patch, as a fraction of the current calculator's
    /// cost, a candidate has to be before it is adopted. Range: 0-1.
    ///
    /// Default: 0.1
    pub fn speedup_margin(mut self, margin: f32) -> Self {
        self.settings.speedup_margin = margin;
        self
    }

    /// The fraction of individual samples a candidate must win, so that a
    /// few lucky batches can't cause a switch. Range: 0-1.
    ///
    /// Default: 0.75
    pub fn stability(mut self, stability: f32) -> Self {
        self.settings.stability = stability;
        self
    }

    /// Controls the maximum number of threads the baseline calculator splits
    /// a single batch across. Ignored on wasm32.
    ///
    /// Default: The number of logical cores on this system.
    pub fn max_thread_count(mut self, count: usize) -> Self {
        self.settings.max_thread_count = Some(count);
        self
    }

    /// Batches with fewer candidates than this are never split across
    /// threads.
    ///
    /// Default: 2048
    pub fn parallel_threshold(mut self, candidates: usize) -> Self {
        self.settings.parallel_threshold = candidates;
        self
    }

    /// The largest image, in pixels, the FFT calculator is built for.
    ///
    /// Default: 4 megapixels
    pub fn fft_max_pixels(mut self, pixels: usize) -> Self {
        self.settings.fft_max_pixels = pixels;
        self
    }

    /// Whether the built-in accelerated calculators are registered.
    /// Factories added with [`register`](Self::register) are always used.
    ///
    /// Default: true
    pub fn accelerated(mut self, enabled: bool) -> Self {
        self.settings.accelerated = enabled;
        self
    }

    /// Adds an accelerated calculator that will be measured against the
    /// baseline.
    pub fn register<F: CalculatorFactory<P> + 'static>(mut self, factory: F) -> Self {
        self.factories.push(Box::new(factory));
        self
    }

    /// Replaces the per-pixel baseline calculator.
    pub fn baseline<C: EnergyCalculator<P> + 'static>(mut self, calculator: C) -> Self {
        self.baseline = Some(Rc::new(calculator));
        self
    }

    /// Creates the selector, or returns an error if a setting is invalid.
    pub fn build(self) -> Result<EnergyCalculatorSelector<P>, Error> {
        self.check_settings_validity()?;

        let settings = self.settings;
        let baseline = self.baseline.unwrap_or_else(|| {
            Rc::new(PerPixelEnergyCalculator::with_threads(
                settings.thread_count(),
                settings.parallel_threshold,
            ))
        });

        let mut factories = Vec::with_capacity(self.factories.len() + 1);

        #[cfg(feature = "fft")]
        {
            if settings.accelerated {
                factories.push(Box::new(super::FftCalculatorFactory::new(settings.fft_max_pixels))
                    as Box<dyn CalculatorFactory<P>>);
            }
        }

        factories.extend(self.factories);

        Ok(EnergyCalculatorSelector {
            measure: settings.to_measure_settings(),
            baseline,
            factories,
            accelerated: Vec::new(),
            resolution: None,
            classes: HashMap::new(),
        })
    }

    fn check_settings_validity(&self) -> Result<(), Error> {
        let s = &self.settings;

        if s.measurement_samples < 1 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: u32::MAX as f32,
                value: s.measurement_samples as f32,
                name: "measurement-samples",
            }));
        }

        if !(0.0..=1.0).contains(&s.speedup_margin) {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 0.0,
                max: 1.0,
                value: s.speedup_margin,
                name: "speedup-margin",
            }));
        }

        if !(0.0..=1.0).contains(&s.stability) {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 0.0,
                max: 1.0,
                value: s.stability,
                name: "stability",
            }));
        }

        if s.max_thread_count == Some(0) {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: usize::MAX as f32,
                value: 0.0,
                name: "max-thread-count",
            }));
        }

        if s.parallel_threshold < 1 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: usize::MAX as f32,
                value: 0.0,
                name: "parallel-threshold",
            }));
        }

        if s.fft_max_pixels < 1 {
            return Err(Error::InvalidRange(errors::InvalidRange {
                min: 1.0,
                max: usize::MAX as f32,
                value: 0.0,
                name: "fft-max-pixels",
            }));
        }

        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Resolution {
    depth: usize,
    dims: Dims,
}

enum ClassState<P: PixelFormat> {
    /// Every candidate still being timed against the baseline, handed out
    /// in turn
    Measuring {
        measurers: Vec<Measurer<P>>,
        next: usize,
    },
    Settled(Rc<dyn EnergyCalculator<P>>),
}

impl<P: PixelFormat> ClassState<P> {
    /// Acts on any measurers that have reached a verdict
    fn resolve(&mut self, class: BatchClass) {
        let settled = match self {
            Self::Measuring { measurers, next } => {
                let incumbent = Rc::clone(measurers[0].incumbent());
                let mut winner: Option<(f64, Rc<dyn EnergyCalculator<P>>)> = None;

                measurers.retain(|measurer| match measurer.verdict() {
                    Verdict::Pending => true,
                    Verdict::Faster => {
                        let (incumbent_cost, cost) = measurer.mean_costs();
                        debug!(
                            ?class,
                            candidate = measurer.candidate().name(),
                            samples = measurer.samples(),
                            incumbent_cost,
                            cost,
                            "candidate energy calculator is faster"
                        );
                        if winner.as_ref().map_or(true, |(best, _)| cost < *best) {
                            winner = Some((cost, Rc::clone(measurer.candidate())));
                        }
                        false
                    }
                    Verdict::NotFaster => {
                        let (incumbent_cost, cost) = measurer.mean_costs();
                        debug!(
                            ?class,
                            candidate = measurer.candidate().name(),
                            samples = measurer.samples(),
                            incumbent_cost,
                            cost,
                            "candidate energy calculator rejected"
                        );
                        false
                    }
                });

                if let Some((_, winner)) = winner {
                    debug!(?class, calculator = winner.name(), "switching energy calculator");
                    Some(winner)
                } else if measurers.is_empty() {
                    Some(incumbent)
                } else {
                    *next %= measurers.len();
                    None
                }
            }
            Self::Settled(_) => None,
        };

        if let Some(calculator) = settled {
            *self = Self::Settled(calculator);
        }
    }

    fn current(&mut self) -> &dyn EnergyCalculator<P> {
        match self {
            Self::Settled(calculator) => &**calculator,
            Self::Measuring { measurers, next } => {
                let index = *next % measurers.len();
                *next = index + 1;
                &measurers[index]
            }
        }
    }
}

/// Hands out the fastest known energy calculator for each batch.
///
/// Every batch class starts out on the baseline calculator. The first time a
/// class is seen, each accelerated calculator available at the current
/// resolution is wrapped in a measurer that runs it alongside the baseline.
/// Once a candidate has been measured for enough batches it is either
/// adopted for the class, ending all measurement for that class, or
/// dropped. Changing resolution rebuilds the accelerated calculators and
/// starts over.
///
/// The selector keeps mutable state without synchronization, each solve
/// needs its own instance.
pub struct EnergyCalculatorSelector<P: PixelFormat> {
    measure: MeasureSettings,
    baseline: Rc<dyn EnergyCalculator<P>>,
    factories: Vec<Box<dyn CalculatorFactory<P>>>,
    accelerated: Vec<Rc<dyn EnergyCalculator<P>>>,
    resolution: Option<Resolution>,
    classes: HashMap<BatchClass, ClassState<P>>,
}

impl<P: PixelFormat> EnergyCalculatorSelector<P> {
    pub fn builder() -> SelectorBuilder<P> {
        SelectorBuilder::new()
    }

    /// The calculator to use for a batch of `batch_size` candidates.
    ///
    /// Whatever is returned produces the authoritative energies for the
    /// batch, even while it is secretly measuring other calculators.
    pub fn get(
        &mut self,
        input: &EnergyInput<'_, P>,
        params: &BatchParams,
        batch_size: usize,
    ) -> &dyn EnergyCalculator<P> {
        if self.factories.is_empty() {
            return &*self.baseline;
        }

        self.sync_resolution(input);
        if self.accelerated.is_empty() {
            return &*self.baseline;
        }

        let class = params.class(batch_size);
        let (baseline, accelerated, measure) = (&self.baseline, &self.accelerated, self.measure);

        let state = self.classes.entry(class).or_insert_with(|| ClassState::Measuring {
            measurers: accelerated
                .iter()
                .map(|candidate| Measurer::new(Rc::clone(baseline), Rc::clone(candidate), measure))
                .collect(),
            next: 0,
        });

        state.resolve(class);
        state.current()
    }

    /// Computes the energies of a batch with whichever calculator
    /// [`get`](Self::get) picks.
    pub fn calculate(
        &mut self,
        input: &EnergyInput<'_, P>,
        params: &BatchParams,
        candidates: &[Coord],
        energies: &mut [Energy],
    ) {
        self.get(input, params, candidates.len())
            .calculate(input, params, candidates, energies);
    }

    /// The calculator a batch class has settled on, if measurement is over
    pub fn preferred(&self, class: BatchClass) -> Option<&str> {
        match self.classes.get(&class) {
            Some(ClassState::Settled(calculator)) => Some(calculator.name()),
            _ => None,
        }
    }

    /// Whether any batch class is still measuring candidates
    pub fn is_measuring(&self) -> bool {
        self.classes
            .values()
            .any(|state| matches!(state, ClassState::Measuring { .. }))
    }

    /// The names of the baseline and every accelerated calculator built for
    /// the current resolution
    pub fn available(&self) -> impl Iterator<Item = &str> + '_ {
        std::iter::once(self.baseline.name()).chain(self.accelerated.iter().map(|c| c.name()))
    }

    fn sync_resolution(&mut self, input: &EnergyInput<'_, P>) {
        let resolution = Resolution {
            depth: input.depth(),
            dims: input.dims(),
        };

        if self.resolution == Some(resolution) {
            return;
        }

        debug!(
            depth = resolution.depth,
            width = resolution.dims.width,
            height = resolution.dims.height,
            "rebuilding energy calculators for new resolution"
        );

        self.classes.clear();
        // Release the previous resolution's calculators before building new ones
        self.accelerated.clear();

        for factory in &self.factories {
            match factory.create(input) {
                Ok(calculator) => {
                    debug!(calculator = calculator.name(), "built energy calculator");
                    self.accelerated.push(calculator);
                }
                Err(err) => {
                    debug!(
                        factory = factory.name(),
                        error = %err,
                        "energy calculator unavailable, using the baseline"
                    );
                }
            }
        }

        self.resolution = Some(resolution);
    }
}
