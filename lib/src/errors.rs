use std::fmt;

#[derive(Debug)]
pub struct InvalidRange {
    pub(crate) min: f32,
    pub(crate) max: f32,
    pub(crate) value: f32,
    pub(crate) name: &'static str,
}

impl fmt::Display for InvalidRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "parameter '{}' - value '{}' is outside the range of {}-{}",
            self.name, self.value, self.min, self.max
        )
    }
}

#[derive(Debug)]
pub enum Error {
    /// A setting had a value outside of its valid range
    InvalidRange(InvalidRange),
    /// A raw pixel buffer does not hold exactly width * height * channels
    /// elements
    BufferLength { expected: usize, actual: usize },
    /// Images must be at least 1x1
    ZeroDimension,
    /// An input image failed its own validity check
    InvalidImage,
    /// The requested channel does not exist in the pixel format
    InvalidChannel { channel: usize, channels: usize },
    /// A mask weight was outside of [0, 1]
    InvalidWeight { index: usize, value: f32 },
    /// An accelerated energy calculator can't be built for the current
    /// resolution. The selector swallows this and keeps the baseline.
    Unsupported(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidRange(ir) => write!(f, "{}", ir),
            Self::BufferLength { expected, actual } => write!(
                f,
                "pixel buffer holds {} elements, but the dimensions require {}",
                actual, expected
            ),
            Self::ZeroDimension => write!(f, "images must be at least 1x1"),
            Self::InvalidImage => write!(f, "the input image is not valid"),
            Self::InvalidChannel { channel, channels } => write!(
                f,
                "channel {} was requested, but the pixel format only has {}",
                channel, channels
            ),
            Self::InvalidWeight { index, value } => write!(
                f,
                "mask weight '{}' at index {} is outside the range of 0-1",
                value, index
            ),
            Self::Unsupported(reason) => {
                write!(f, "energy calculator is not supported here: {}", reason)
            }
        }
    }
}
