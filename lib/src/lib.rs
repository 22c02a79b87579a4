// BEGIN - Embark standard lints v0.4
// do not change or add/remove here, but one can add exceptions after this section
// for more info see: <https://github.com/EmbarkStudios/rust-ecosystem/issues/59>
#![deny(unsafe_code)]
#![warn(
    clippy::all,
    clippy::await_holding_lock,
    clippy::char_lit_as_u8,
    clippy::checked_conversions,
    clippy::dbg_macro,
    clippy::debug_assert_with_mut_call,
    clippy::doc_markdown,
    clippy::empty_enum,
    clippy::enum_glob_use,
    clippy::exit,
    clippy::expl_impl_clone_on_copy,
    clippy::explicit_deref_methods,
    clippy::explicit_into_iter_loop,
    clippy::fallible_impl_from,
    clippy::filter_map_next,
    clippy::float_cmp_const,
    clippy::fn_params_excessive_bools,
    clippy::if_let_mutex,
    clippy::implicit_clone,
    clippy::imprecise_flops,
    clippy::inefficient_to_string,
    clippy::invalid_upcast_comparisons,
    clippy::large_types_passed_by_value,
    clippy::let_unit_value,
    clippy::linkedlist,
    clippy::lossy_float_literal,
    clippy::macro_use_imports,
    clippy::manual_ok_or,
    clippy::map_err_ignore,
    clippy::map_flatten,
    clippy::map_unwrap_or,
    clippy::match_on_vec_items,
    clippy::match_same_arms,
    clippy::match_wildcard_for_single_variants,
    clippy::mem_forget,
    clippy::mismatched_target_os,
    clippy::mut_mut,
    clippy::mutex_integer,
    clippy::needless_borrow,
    clippy::needless_continue,
    clippy::option_option,
    clippy::path_buf_push_overwrite,
    clippy::ptr_as_ptr,
    clippy::ref_option_ref,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_functions_in_if_condition,
    clippy::semicolon_if_nothing_returned,
    clippy::string_add_assign,
    clippy::string_add,
    clippy::string_lit_as_bytes,
    clippy::string_to_string,
    clippy::todo,
    clippy::trait_duplication_in_bounds,
    clippy::unimplemented,
    clippy::unnested_or_patterns,
    clippy::unused_self,
    clippy::useless_transmute,
    clippy::verbose_file_reads,
    clippy::zero_sized_map_values,
    future_incompatible,
    nonstandard_style,
    rust_2018_idioms
)]
// END - Embark standard lints v0.4

//! `inpaint-core` is the image-handling core of a patch-based inpainting
//! (hole filling) solver.
//!
//! It provides the three pieces a solver is built around:
//!
//! 1. [`ScalablePyramid`], a lazily computed multi-resolution view of the
//!    image (and of its [`SoftMask`]) for coarse-to-fine optimization
//! 2. [`EnergyCalculatorSelector`], which hands out the fastest patch
//!    energy calculator for each batch by measuring the candidates against
//!    the live workload
//! 3. [`Compositor`], which blends the chosen patches into the original
//!    through the soft mask once the solve is done
//!
//! The search itself (which patches to try, when to stop) is left to the
//! solver.
//!
//! ## Usage
//!
//! ```no_run
//! use inpaint_core::{
//!     image::Rgb, BatchParams, Compositor, Coord, Dims, EnergyCalculatorSelector, EnergyInput,
//!     Image, ScalablePyramid, SoftMask, SoftMaskBlender,
//! };
//!
//! let img = Image::from_pixel(64, 64, Rgb([128u8, 128, 128]));
//! let mask = SoftMask::from_fn(64, 64, |x, y| if x > 40 && y > 40 { 1.0 } else { 0.0 })?
//!     .feathered(2);
//!
//! let mut image_lod = ScalablePyramid::new(&img)?;
//! let mut mask_lod = ScalablePyramid::new(&mask)?;
//! image_lod.scale_to(2);
//! mask_lod.scale_to(2);
//!
//! // Score every 3x3 candidate against the patch at (8, 8) at 1/4 resolution
//! let mut selector = EnergyCalculatorSelector::builder().build()?;
//! let input = EnergyInput::from_pyramids(&image_lod, &mask_lod);
//! let params = BatchParams::new(Dims::square(3), Coord::new(8, 8));
//! let candidates = vec![Coord::new(0, 0), Coord::new(4, 2)];
//! let mut energies = vec![0.0; candidates.len()];
//! selector.calculate(&input, &params, &candidates, &mut energies);
//!
//! // Blend the final placements at full resolution
//! let (view, mask_view) = (img.view(), mask.view());
//! let mut compositor = Compositor::new(&view, &mask_view);
//! compositor.place(Coord::new(0, 0), Coord::new(41, 41), Dims::square(23));
//!
//! let mut output = Image::<Rgb<u8>>::new(1, 1);
//! compositor.compose(&SoftMaskBlender, &mut output);
//! # Ok::<(), inpaint_core::Error>(())
//! ```
//!
//! ## Features
//!
//! - `fft` (default): registers the FFT energy calculator with every
//!   selector, it is only used where it measures faster than the per-pixel
//!   baseline.
mod compositor;
pub mod energy;
mod errors;
mod img;
mod img_pyramid;
mod mask;

pub use image;

pub use compositor::{Compositor, OutputBlender, PatchAccumulator, SoftMaskBlender};
pub use energy::{
    BatchClass, BatchParams, CalculatorFactory, Coord, Energy, EnergyCalculator,
    EnergyCalculatorSelector, EnergyInput, PerPixelEnergyCalculator, SelectorBuilder,
    ENERGY_MAX,
};
pub use errors::Error;
pub use img::{Channel, Image, ImageView, InputImage, OutputImage, PixelFormat};
pub use img_pyramid::ScalablePyramid;
pub use mask::{ChannelMask, MaskView, SoftMask};

/// Simple dimensions struct
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Dims {
    pub width: u32,
    pub height: u32,
}

impl Dims {
    pub fn square(size: u32) -> Self {
        Self {
            width: size,
            height: size,
        }
    }
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

#[derive(Copy, Clone, Debug)]
struct Settings {
    measurement_samples: u32,
    speedup_margin: f32,
    stability: f32,
    max_thread_count: Option<usize>,
    parallel_threshold: usize,
    fft_max_pixels: usize,
    accelerated: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            measurement_samples: 8,
            speedup_margin: 0.1,
            stability: 0.75,
            max_thread_count: None,
            parallel_threshold: 2048,
            fft_max_pixels: 4 * 1024 * 1024,
            accelerated: true,
        }
    }
}

impl Settings {
    fn thread_count(&self) -> usize {
        self.max_thread_count.unwrap_or_else(num_cpus::get)
    }

    fn to_measure_settings(self) -> energy::MeasureSettings {
        energy::MeasureSettings {
            samples: self.measurement_samples,
            speedup_margin: f64::from(self.speedup_margin),
            stability: f64::from(self.stability),
        }
    }
}
