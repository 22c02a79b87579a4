use crate::img::{pixel_count, Channel, Image, ImageView, InputImage, PixelFormat};
use crate::{Dims, Error};
use tracing::trace;

/// A multi-resolution view of one image that is navigated a level at a time.
///
/// Depth 0 is the original image, each deeper level is half the size of the
/// one above it (never smaller than 1x1). Levels are computed lazily on
/// `scale_down` and freed again on `scale_up`, so only the levels between the
/// original and the current depth are ever held in memory. Freed slots are
/// rebuilt from the level above if the pyramid descends past them again.
pub struct ScalablePyramid<'a, P: PixelFormat> {
    levels: Vec<Option<ImageView<'a, P>>>,
    depth: usize,
}

impl<'a, P: PixelFormat> ScalablePyramid<'a, P> {
    /// Creates a pyramid whose depth 0 delegates to `source`.
    pub fn new<S: InputImage<P> + ?Sized>(source: &'a S) -> Result<Self, Error> {
        Ok(Self::from_view(ImageView::borrowed(source)?))
    }

    /// Creates a pyramid that owns its depth 0 image.
    pub fn from_image(image: Image<P>) -> Self {
        Self::from_view(ImageView::owned(image))
    }

    fn from_view(base: ImageView<'a, P>) -> Self {
        Self {
            levels: vec![Some(base)],
            depth: 0,
        }
    }

    /// Moves to the next coarser resolution, computing it from the current
    /// one if it isn't cached.
    pub fn scale_down(&mut self) {
        let next = self.depth + 1;

        if next == self.levels.len() {
            self.levels.push(None);
        }

        if self.levels[next].is_none() {
            let down = downsample(self.current());
            trace!(
                depth = next,
                width = down.width(),
                height = down.height(),
                "materialized pyramid level"
            );
            self.levels[next] = Some(down);
        }

        self.depth = next;
    }

    /// Moves to the next finer resolution and frees the level that was just
    /// left.
    ///
    /// # Panics
    /// If the pyramid is already at depth 0
    pub fn scale_up(&mut self) {
        assert!(self.depth > 0, "cannot scale up past the original image");

        self.levels[self.depth] = None;
        trace!(depth = self.depth, "freed pyramid level");
        self.depth -= 1;
    }

    /// Scales up or down until the pyramid is at `depth`
    pub fn scale_to(&mut self, depth: usize) {
        while self.depth < depth {
            self.scale_down();
        }
        while self.depth > depth {
            self.scale_up();
        }
    }

    /// The image at the current depth
    #[inline]
    pub fn current(&self) -> &ImageView<'a, P> {
        match &self.levels[self.depth] {
            Some(level) => level,
            None => unreachable!("every level up to the current depth is materialized"),
        }
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    #[inline]
    pub fn dims(&self) -> Dims {
        self.current().dims()
    }

    /// The level at `depth`, if it is currently materialized
    pub fn level(&self, depth: usize) -> Option<&ImageView<'a, P>> {
        self.levels.get(depth).and_then(Option::as_ref)
    }

    pub fn materialized_levels(&self) -> usize {
        self.levels.iter().filter(|level| level.is_some()).count()
    }

    /// Whether scaling down would still shrink the image. Scaling down a
    /// level with a dimension of 1 keeps that dimension at 1.
    pub fn can_scale_down(&self) -> bool {
        let current = self.current();
        current.width() >= 2 && current.height() >= 2
    }
}

/// Averages each 2x2 block of `src` into a single pixel. Blocks on the
/// right or bottom edge of an odd sized (or 1 pixel wide) image average only
/// the pixels that exist.
pub(crate) fn downsample<P: PixelFormat>(src: &ImageView<'_, P>) -> ImageView<'static, P> {
    let (src_w, src_h) = (src.width(), src.height());
    let width = (src_w / 2).max(1);
    let height = (src_h / 2).max(1);

    let mut data = Vec::with_capacity(pixel_count(width, height) * P::CHANNELS);
    let mut sums = vec![0f64; P::CHANNELS];

    for y in 0..height {
        let (y0, y1) = (2 * y, 2 * y + 1);
        let rows: u32 = if y1 < src_h { 2 } else { 1 };

        for x in 0..width {
            let (x0, x1) = (2 * x, 2 * x + 1);
            let cols: u32 = if x1 < src_w { 2 } else { 1 };

            sums.iter_mut().for_each(|s| *s = 0.0);
            for sy in (y0..=y1).take(rows as usize) {
                for sx in (x0..=x1).take(cols as usize) {
                    for (sum, c) in sums.iter_mut().zip(src.pixel(sx, sy)) {
                        *sum += c.to_f64();
                    }
                }
            }

            let count = f64::from(rows * cols);
            for sum in &sums {
                let avg = sum / count;
                debug_assert!(
                    avg >= P::Channel::MIN && avg <= P::Channel::MAX,
                    "downsampled channel {} is outside of the valid range",
                    avg
                );
                data.push(P::Channel::from_f64(avg));
            }
        }
    }

    ImageView::from_parts(width, height, data)
}

#[cfg(test)]
mod test {
    use super::*;
    use image::{Luma, Rgb};

    fn gradient(width: u32, height: u32) -> Image<Rgb<u8>> {
        Image::from_fn(width, height, |x, y| {
            Rgb([(x * 17 % 256) as u8, (y * 29 % 256) as u8, ((x + y) * 5 % 256) as u8])
        })
    }

    #[test]
    fn halves_dimensions() {
        for &(w, h) in &[(8, 8), (7, 5), (2, 9), (1, 6), (1, 1)] {
            let img = gradient(w, h);
            let mut pyramid = ScalablePyramid::new(&img).unwrap();
            pyramid.scale_down();

            let expected = Dims::new((w / 2).max(1), (h / 2).max(1));
            assert_eq!(pyramid.dims(), expected, "scaling {}x{}", w, h);
        }
    }

    #[test]
    fn one_by_one_does_not_underflow() {
        let img = Image::from_pixel(1, 1, Luma([200u8]));
        let mut pyramid = ScalablePyramid::new(&img).unwrap();

        for _ in 0..4 {
            assert!(!pyramid.can_scale_down());
            pyramid.scale_down();
            assert_eq!(pyramid.dims(), Dims::square(1));
            assert_eq!(pyramid.current().pixel(0, 0), &[200]);
        }
    }

    #[test]
    fn uniform_block_keeps_color() {
        let img = Image::from_pixel(2, 2, Rgb([12u8, 200, 77]));
        let mut pyramid = ScalablePyramid::new(&img).unwrap();
        pyramid.scale_down();

        assert_eq!(pyramid.current().get_pixel(0, 0), Rgb([12, 200, 77]));
    }

    #[test]
    fn checkerboard_averages() {
        let img = Image::from_fn(4, 4, |x, y| {
            if (x + y) % 2 == 0 {
                Rgb([10u8, 100, 250])
            } else {
                Rgb([30u8, 0, 150])
            }
        });
        let mut pyramid = ScalablePyramid::new(&img).unwrap();
        pyramid.scale_down();

        let level = pyramid.current();
        for y in 0..2 {
            for x in 0..2 {
                assert_eq!(level.get_pixel(x, y), Rgb([20, 50, 200]));
            }
        }

        let img = Image::from_fn(2, 2, |x, y| {
            Luma([if (x + y) % 2 == 0 { 0.0f32 } else { 1.0 }])
        });
        let mut pyramid = ScalablePyramid::new(&img).unwrap();
        pyramid.scale_down();
        assert_eq!(pyramid.current().get_pixel(0, 0), Luma([0.5]));
    }

    #[test]
    fn odd_edges_average_existing_pixels() {
        // 3x1: the single output pixel averages columns 0 and 1 only
        let img: Image<Luma<u8>> = Image::from_raw(3, 1, vec![10, 20, 90]).unwrap();
        let mut pyramid = ScalablePyramid::new(&img).unwrap();
        pyramid.scale_down();
        assert_eq!(pyramid.current().data(), &[15]);

        // 1x3: a single column halves into rows 0 and 1
        let img: Image<Luma<u8>> = Image::from_raw(1, 3, vec![40, 60, 255]).unwrap();
        let mut pyramid = ScalablePyramid::new(&img).unwrap();
        pyramid.scale_down();
        assert_eq!(pyramid.current().data(), &[50]);
    }

    #[test]
    fn channels_stay_in_range() {
        let img = Image::from_fn(33, 17, |x, y| {
            let v = if (x * 7 + y * 13) % 3 == 0 { 255u8 } else { 0 };
            Rgb([v, 255 - v, 255])
        });
        let mut pyramid = ScalablePyramid::new(&img).unwrap();

        while pyramid.can_scale_down() {
            pyramid.scale_down();
            for c in pyramid.current().data() {
                let v = c.to_f64();
                assert!(v >= 0.0 && v <= 255.0);
            }
        }
        assert_eq!(pyramid.current().data()[2], 255);
    }

    #[test]
    fn depth_tracks_scale_down_and_up() {
        let img = gradient(64, 48);
        let mut pyramid = ScalablePyramid::new(&img).unwrap();
        assert_eq!(pyramid.depth(), 0);
        assert!(!pyramid.current().is_owned());

        let n = 4;
        for _ in 0..n {
            pyramid.scale_down();
        }
        assert_eq!(pyramid.depth(), n);
        assert_eq!(pyramid.materialized_levels(), n + 1);
        assert!(pyramid.current().is_owned());
        assert_eq!(pyramid.dims(), Dims::new(4, 3));

        pyramid.scale_up();
        assert_eq!(pyramid.depth(), n - 1);
        assert_eq!(pyramid.materialized_levels(), n);
        assert!(pyramid.level(n).is_none());
        assert_eq!(pyramid.dims(), Dims::new(8, 6));
    }

    #[test]
    fn revisiting_a_freed_depth_rebuilds_it() {
        let img = gradient(40, 24);

        let mut reference = ScalablePyramid::new(&img).unwrap();
        reference.scale_to(3);
        let expected = reference.current().data().to_vec();

        let mut pyramid = ScalablePyramid::new(&img).unwrap();
        pyramid.scale_to(3);
        pyramid.scale_up();
        pyramid.scale_up();
        assert_eq!(pyramid.materialized_levels(), 2);

        pyramid.scale_down();
        pyramid.scale_down();
        assert_eq!(pyramid.depth(), 3);
        assert_eq!(pyramid.dims(), Dims::new(5, 3));
        assert_eq!(pyramid.current().data(), expected.as_slice());
    }

    #[test]
    fn cached_levels_are_reused() {
        let img = gradient(16, 16);
        let mut pyramid = ScalablePyramid::new(&img).unwrap();
        pyramid.scale_to(2);
        pyramid.scale_up();

        let level1 = pyramid.current().data().as_ptr();
        pyramid.scale_down();
        pyramid.scale_up();
        assert!(std::ptr::eq(level1, pyramid.current().data().as_ptr()));
    }

    #[test]
    #[should_panic(expected = "cannot scale up")]
    fn scale_up_at_depth_zero_panics() {
        let img = gradient(4, 4);
        let mut pyramid = ScalablePyramid::new(&img).unwrap();
        pyramid.scale_up();
    }

    #[test]
    fn owned_base_level() {
        let mut pyramid = ScalablePyramid::from_image(gradient(6, 6));
        assert!(pyramid.current().is_owned());
        pyramid.scale_down();
        assert_eq!(pyramid.dims(), Dims::square(3));
    }

    #[test]
    fn invalid_source_is_rejected() {
        struct Broken;
        impl InputImage<Luma<u8>> for Broken {
            fn width(&self) -> u32 {
                4
            }
            fn height(&self) -> u32 {
                4
            }
            fn data(&self) -> &[u8] {
                &[0; 3]
            }
        }

        assert!(matches!(
            ScalablePyramid::new(&Broken),
            Err(Error::InvalidImage)
        ));
    }
}
