use crate::img::{Channel, Image, ImageView, InputImage, PixelFormat};
use crate::{Dims, Error};
use image::Luma;
use std::path::Path;

/// A view over the weights of a [`SoftMask`], or of one of its downsampled
/// pyramid levels
pub type MaskView<'a> = ImageView<'a, Luma<f32>>;

/// Helper type used to pick the channel of an image that becomes a mask
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelMask {
    R,
    G,
    B,
    A,
}

impl ChannelMask {
    fn index(self, channels: usize) -> Result<usize, Error> {
        let index = match self {
            ChannelMask::R => Some(0),
            ChannelMask::G if channels >= 3 => Some(1),
            ChannelMask::B if channels >= 3 => Some(2),
            ChannelMask::A if channels == 2 || channels == 4 => Some(channels - 1),
            _ => None,
        };

        index.ok_or(Error::InvalidChannel {
            channel: self as usize,
            channels,
        })
    }
}

/// Per-pixel weights in [0, 1] aligned with an image.
///
/// A weight of 1 marks a pixel as fully masked: its content is unknown and
/// will be sourced entirely from patches. A weight of 0 is original content
/// that is kept as is. Anything in between is blended.
#[derive(Clone)]
pub struct SoftMask {
    weights: Image<Luma<f32>>,
}

impl SoftMask {
    pub fn new(width: u32, height: u32, weights: Vec<f32>) -> Result<Self, Error> {
        if let Some((index, &value)) = weights
            .iter()
            .enumerate()
            .find(|(_, w)| !(**w >= 0.0 && **w <= 1.0))
        {
            return Err(Error::InvalidWeight { index, value });
        }

        Ok(Self {
            weights: Image::from_raw(width, height, weights)?,
        })
    }

    pub fn from_fn<F: FnMut(u32, u32) -> f32>(
        width: u32,
        height: u32,
        mut f: F,
    ) -> Result<Self, Error> {
        if width == 0 || height == 0 {
            return Err(Error::ZeroDimension);
        }

        let mut weights = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                weights.push(f(x, y));
            }
        }

        Self::new(width, height, weights)
    }

    /// A mask with every weight at 0
    ///
    /// # Panics
    /// If either dimension is zero
    pub fn unmasked(width: u32, height: u32) -> Self {
        Self {
            weights: Image::new(width, height),
        }
    }

    /// Converts a hole map, `true` being masked, into weights of 0 or 1
    pub fn from_hard(width: u32, height: u32, hole: &[bool]) -> Result<Self, Error> {
        let weights = hole.iter().map(|&h| if h { 1.0 } else { 0.0 }).collect();
        Self::new(width, height, weights)
    }

    /// Uses one channel of `image`, normalised to 0-1, as the weights
    pub fn from_channel<P, S>(image: &S, mask: ChannelMask) -> Result<Self, Error>
    where
        P: PixelFormat,
        S: InputImage<P> + ?Sized,
    {
        if !image.is_valid() {
            return Err(Error::InvalidImage);
        }

        let channel = mask.index(P::CHANNELS)?;
        let weights = image
            .data()
            .chunks_exact(P::CHANNELS)
            .map(|pixel| (pixel[channel].to_f64() / P::Channel::WHITE).max(0.0).min(1.0) as f32)
            .collect();

        Self::new(image.width(), image.height(), weights)
    }

    /// Swaps masked and unmasked, `w` becomes `1 - w`
    pub fn inverted(&self) -> Self {
        let mut inverted = self.clone();
        for w in inverted.weights.data_mut() {
            *w = 1.0 - *w;
        }
        inverted
    }

    /// Softens the mask's edge so that blending hides seams.
    ///
    /// Pixels outside the fully masked region get a weight falling off
    /// linearly with their distance to it, reaching 0 at `radius + 1` pixels.
    /// Existing weights are never lowered.
    pub fn feathered(&self, radius: u32) -> Self {
        if radius == 0 {
            return self.clone();
        }

        let dims = self.dims();
        let distances = chamfer_distance(self.weights.data(), dims);
        let falloff = radius as f32 + 1.0;

        let mut feathered = self.clone();
        for (w, d) in feathered.weights.data_mut().iter_mut().zip(distances) {
            let ramp = (1.0 - d / falloff).max(0.0);
            *w = w.max(ramp);
        }
        feathered
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.weights.width()
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.weights.height()
    }

    #[inline]
    pub fn dims(&self) -> Dims {
        self.weights.dims()
    }

    #[inline]
    pub fn weight(&self, x: u32, y: u32) -> f32 {
        self.weights.get_pixel(x, y).0[0]
    }

    #[inline]
    pub fn weights(&self) -> &[f32] {
        self.weights.data()
    }

    pub fn view(&self) -> MaskView<'_> {
        self.weights.view()
    }
}

impl InputImage<Luma<f32>> for SoftMask {
    fn width(&self) -> u32 {
        self.weights.width()
    }

    fn height(&self) -> u32 {
        self.weights.height()
    }

    fn data(&self) -> &[f32] {
        self.weights.data()
    }

    fn file_path(&self) -> Option<&Path> {
        InputImage::file_path(&self.weights)
    }
}

// Two pass 8-connected chamfer distance to the nearest fully masked pixel
fn chamfer_distance(weights: &[f32], dims: Dims) -> Vec<f32> {
    const ORTHO: f32 = 1.0;
    const DIAG: f32 = std::f32::consts::SQRT_2;

    let (w, h) = (dims.width as usize, dims.height as usize);
    let mut dist: Vec<f32> = weights
        .iter()
        .map(|&m| if m >= 1.0 { 0.0 } else { f32::INFINITY })
        .collect();

    for y in 0..h {
        for x in 0..w {
            let mut d = dist[y * w + x];
            if x > 0 {
                d = d.min(dist[y * w + x - 1] + ORTHO);
            }
            if y > 0 {
                d = d.min(dist[(y - 1) * w + x] + ORTHO);
                if x > 0 {
                    d = d.min(dist[(y - 1) * w + x - 1] + DIAG);
                }
                if x + 1 < w {
                    d = d.min(dist[(y - 1) * w + x + 1] + DIAG);
                }
            }
            dist[y * w + x] = d;
        }
    }

    for y in (0..h).rev() {
        for x in (0..w).rev() {
            let mut d = dist[y * w + x];
            if x + 1 < w {
                d = d.min(dist[y * w + x + 1] + ORTHO);
            }
            if y + 1 < h {
                d = d.min(dist[(y + 1) * w + x] + ORTHO);
                if x + 1 < w {
                    d = d.min(dist[(y + 1) * w + x + 1] + DIAG);
                }
                if x > 0 {
                    d = d.min(dist[(y + 1) * w + x - 1] + DIAG);
                }
            }
            dist[y * w + x] = d;
        }
    }

    dist
}
