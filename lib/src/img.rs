//! Pixel formats, the owned `Image` and the `ImageView` every other part of
//! the crate reads pixels through.

use crate::{Dims, Error};
use std::{
    fmt,
    marker::PhantomData,
    path::{Path, PathBuf},
};

/// Element type of a single pixel channel.
pub trait Channel: image::Primitive + fmt::Debug + Default + Send + Sync + 'static {
    /// Smallest valid channel value
    const MIN: f64;
    /// Largest valid channel value
    const MAX: f64;
    /// Full intensity, used to normalise channel values to 0-1
    const WHITE: f64;

    fn to_f64(self) -> f64;

    /// Converts back from `f64`, rounding to nearest and saturating for
    /// integer channels.
    fn from_f64(value: f64) -> Self;
}

macro_rules! impl_integer_channel {
    ($ty:ty) => {
        impl Channel for $ty {
            const MIN: f64 = <$ty>::MIN as f64;
            const MAX: f64 = <$ty>::MAX as f64;
            const WHITE: f64 = <$ty>::MAX as f64;

            #[inline]
            fn to_f64(self) -> f64 {
                f64::from(self)
            }

            #[inline]
            fn from_f64(value: f64) -> Self {
                value
                    .round()
                    .max(<Self as Channel>::MIN)
                    .min(<Self as Channel>::MAX) as $ty
            }
        }
    };
}

impl_integer_channel!(u8);
impl_integer_channel!(u16);

impl Channel for f32 {
    const MIN: f64 = f32::MIN as f64;
    const MAX: f64 = f32::MAX as f64;
    const WHITE: f64 = 1.0;

    #[inline]
    fn to_f64(self) -> f64 {
        f64::from(self)
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

/// Compile-time description of a pixel: its channel type and count.
///
/// Implemented for the `image` crate's `Luma`, `LumaA`, `Rgb` and `Rgba`
/// pixels over any [`Channel`].
pub trait PixelFormat: Copy + Send + Sync + 'static {
    type Channel: Channel;
    /// The same layout with `f32` channels, used for blended patch output
    type Float: PixelFormat<Channel = f32>;

    const CHANNELS: usize;

    fn as_channels(&self) -> &[Self::Channel];

    /// # Panics
    /// If `channels` holds fewer than `CHANNELS` values
    fn from_channel_slice(channels: &[Self::Channel]) -> Self;
}

macro_rules! impl_pixel_format {
    ($pixel:ident, $count:expr) => {
        impl<C: Channel> PixelFormat for image::$pixel<C> {
            type Channel = C;
            type Float = image::$pixel<f32>;

            const CHANNELS: usize = $count;

            #[inline]
            fn as_channels(&self) -> &[C] {
                &self.0
            }

            #[inline]
            fn from_channel_slice(channels: &[C]) -> Self {
                let mut data = [C::default(); $count];
                data.copy_from_slice(&channels[..$count]);
                image::$pixel(data)
            }
        }
    };
}

impl_pixel_format!(Luma, 1);
impl_pixel_format!(LumaA, 2);
impl_pixel_format!(Rgb, 3);
impl_pixel_format!(Rgba, 4);

/// The read side of an image handed to the core, typically by whatever
/// loaded it from disk.
///
/// Pixels are stored row-major with no padding between rows.
pub trait InputImage<P: PixelFormat> {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn data(&self) -> &[P::Channel];

    /// The path the image was loaded from, if any
    fn file_path(&self) -> Option<&Path> {
        None
    }

    fn is_valid(&self) -> bool {
        let expected = self.width() as usize * self.height() as usize * P::CHANNELS;
        self.width() > 0 && self.height() > 0 && self.data().len() == expected
    }
}

/// An image the core can write its result into.
pub trait OutputImage<P: PixelFormat>: InputImage<P> {
    /// Resizes the image to the specified dimensions, the previous contents
    /// are not preserved.
    fn init(&mut self, width: u32, height: u32);
    fn data_mut(&mut self) -> &mut [P::Channel];
}

/// An owned, row-major image.
#[derive(Clone, Debug)]
pub struct Image<P: PixelFormat> {
    width: u32,
    height: u32,
    data: Vec<P::Channel>,
    file_path: Option<PathBuf>,
}

impl<P: PixelFormat> Image<P> {
    /// Creates an image with every channel set to its default (zero).
    ///
    /// # Panics
    /// If either dimension is zero
    pub fn new(width: u32, height: u32) -> Self {
        assert!(width > 0 && height > 0, "images must be at least 1x1");
        Self {
            width,
            height,
            data: vec![P::Channel::default(); pixel_count(width, height) * P::CHANNELS],
            file_path: None,
        }
    }

    pub fn from_pixel(width: u32, height: u32, pixel: P) -> Self {
        Self::from_fn(width, height, |_, _| pixel)
    }

    pub fn from_fn<F: FnMut(u32, u32) -> P>(width: u32, height: u32, mut f: F) -> Self {
        let mut img = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                img.put_pixel(x, y, f(x, y));
            }
        }
        img
    }

    /// Wraps an existing buffer, which must hold exactly
    /// `width * height * P::CHANNELS` elements.
    pub fn from_raw(width: u32, height: u32, data: Vec<P::Channel>) -> Result<Self, Error> {
        if width == 0 || height == 0 {
            return Err(Error::ZeroDimension);
        }

        let expected = pixel_count(width, height) * P::CHANNELS;
        if data.len() != expected {
            return Err(Error::BufferLength {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            data,
            file_path: None,
        })
    }

    pub fn with_file_path<F: Into<PathBuf>>(mut self, path: F) -> Self {
        self.file_path = Some(path.into());
        self
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn dims(&self) -> Dims {
        Dims::new(self.width, self.height)
    }

    #[inline]
    pub fn data(&self) -> &[P::Channel] {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut [P::Channel] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<P::Channel> {
        self.data
    }

    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> P {
        let i = channel_index::<P>(self.width, x, y);
        P::from_channel_slice(&self.data[i..i + P::CHANNELS])
    }

    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, pixel: P) {
        let i = channel_index::<P>(self.width, x, y);
        self.data[i..i + P::CHANNELS].copy_from_slice(pixel.as_channels());
    }

    /// Borrows the image as a non-owning view
    pub fn view(&self) -> ImageView<'_, P> {
        ImageView {
            width: self.width,
            height: self.height,
            storage: Storage::Borrowed(&self.data),
            file_path: self.file_path.clone(),
            _pixel: PhantomData,
        }
    }
}

impl<P> Image<P>
where
    P: PixelFormat + image::Pixel<Subpixel = <P as PixelFormat>::Channel>,
{
    pub fn from_image_buffer(
        buffer: image::ImageBuffer<P, Vec<<P as PixelFormat>::Channel>>,
    ) -> Result<Self, Error> {
        let (width, height) = buffer.dimensions();
        Self::from_raw(width, height, buffer.into_raw())
    }

    pub fn into_image_buffer(self) -> image::ImageBuffer<P, Vec<<P as PixelFormat>::Channel>> {
        match image::ImageBuffer::from_raw(self.width, self.height, self.data) {
            Some(buffer) => buffer,
            None => unreachable!("image buffer length is validated on construction"),
        }
    }
}

impl<P: PixelFormat> InputImage<P> for Image<P> {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn data(&self) -> &[P::Channel] {
        &self.data
    }

    fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }
}

impl<P: PixelFormat> OutputImage<P> for Image<P> {
    fn init(&mut self, width: u32, height: u32) {
        *self = Self::new(width, height);
    }

    fn data_mut(&mut self) -> &mut [P::Channel] {
        &mut self.data
    }
}

impl<P> InputImage<P> for image::ImageBuffer<P, Vec<<P as PixelFormat>::Channel>>
where
    P: PixelFormat + image::Pixel<Subpixel = <P as PixelFormat>::Channel>,
{
    fn width(&self) -> u32 {
        image::ImageBuffer::width(self)
    }

    fn height(&self) -> u32 {
        image::ImageBuffer::height(self)
    }

    fn data(&self) -> &[P::Channel] {
        self.as_raw()
    }
}

impl<P> OutputImage<P> for image::ImageBuffer<P, Vec<<P as PixelFormat>::Channel>>
where
    P: PixelFormat + image::Pixel<Subpixel = <P as PixelFormat>::Channel>,
{
    fn init(&mut self, width: u32, height: u32) {
        *self = image::ImageBuffer::new(width, height);
    }

    fn data_mut(&mut self) -> &mut [P::Channel] {
        &mut **self
    }
}

/// Whether a view owns its pixels or borrows them from another image that
/// must outlive it.
#[derive(Clone)]
enum Storage<'a, C> {
    Owned(Vec<C>),
    Borrowed(&'a [C]),
}

/// Read-only view over a rectangular grid of pixels.
///
/// A view computed by the core (eg a downsampled pyramid level) owns its
/// buffer, a view over an input image borrows it, and the borrow checker
/// keeps the input alive for as long as the view exists.
#[derive(Clone)]
pub struct ImageView<'a, P: PixelFormat> {
    width: u32,
    height: u32,
    storage: Storage<'a, P::Channel>,
    file_path: Option<PathBuf>,
    _pixel: PhantomData<P>,
}

impl<'a, P: PixelFormat> ImageView<'a, P> {
    /// Delegates to the pixels of `source` without copying them.
    pub fn borrowed<S: InputImage<P> + ?Sized>(source: &'a S) -> Result<Self, Error> {
        if !source.is_valid() {
            return Err(Error::InvalidImage);
        }

        Ok(Self {
            width: source.width(),
            height: source.height(),
            storage: Storage::Borrowed(source.data()),
            file_path: source.file_path().map(Path::to_path_buf),
            _pixel: PhantomData,
        })
    }

    /// Takes ownership of `image`'s pixels.
    pub fn owned(image: Image<P>) -> Self {
        Self {
            width: image.width,
            height: image.height,
            storage: Storage::Owned(image.data),
            file_path: image.file_path,
            _pixel: PhantomData,
        }
    }

    pub(crate) fn from_parts(width: u32, height: u32, data: Vec<P::Channel>) -> Self {
        debug_assert_eq!(data.len(), pixel_count(width, height) * P::CHANNELS);
        Self {
            width,
            height,
            storage: Storage::Owned(data),
            file_path: None,
            _pixel: PhantomData,
        }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn dims(&self) -> Dims {
        Dims::new(self.width, self.height)
    }

    #[inline]
    pub fn is_owned(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }

    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    #[inline]
    pub fn data(&self) -> &[P::Channel] {
        match &self.storage {
            Storage::Owned(data) => data.as_slice(),
            Storage::Borrowed(data) => *data,
        }
    }

    /// Number of channel elements between the starts of two rows
    #[inline]
    pub fn stride(&self) -> usize {
        self.width as usize * P::CHANNELS
    }

    #[inline]
    pub fn stride_bytes(&self) -> usize {
        self.stride() * std::mem::size_of::<P::Channel>()
    }

    #[inline]
    pub fn row(&self, y: u32) -> &[P::Channel] {
        let start = y as usize * self.stride();
        &self.data()[start..start + self.stride()]
    }

    /// The channels of the pixel at `x`, `y`
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> &[P::Channel] {
        let i = channel_index::<P>(self.width, x, y);
        &self.data()[i..i + P::CHANNELS]
    }

    #[inline]
    pub fn get_pixel(&self, x: u32, y: u32) -> P {
        P::from_channel_slice(self.pixel(x, y))
    }

    /// Copies the pixels out into an owned image
    pub fn to_image(&self) -> Image<P> {
        Image {
            width: self.width,
            height: self.height,
            data: self.data().to_vec(),
            file_path: self.file_path.clone(),
        }
    }
}

impl<'a, P: PixelFormat> InputImage<P> for ImageView<'a, P> {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn data(&self) -> &[P::Channel] {
        ImageView::data(self)
    }

    fn file_path(&self) -> Option<&Path> {
        ImageView::file_path(self)
    }
}

impl<'a, P: PixelFormat> fmt::Debug for ImageView<'a, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageView")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &P::CHANNELS)
            .field("owned", &self.is_owned())
            .finish()
    }
}

#[inline]
pub(crate) fn pixel_count(width: u32, height: u32) -> usize {
    width as usize * height as usize
}

#[inline]
fn channel_index<P: PixelFormat>(width: u32, x: u32, y: u32) -> usize {
    (y as usize * width as usize + x as usize) * P::CHANNELS
}
