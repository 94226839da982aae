//! Raw image buffers delivered by video-capable transports.

/// Pixel layout of a [`MediaFrame`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb24,
    Gray8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb24 => 3,
            PixelFormat::Gray8 => 1,
        }
    }
}

/// A decoded video frame.
#[derive(Debug, Clone)]
pub struct MediaFrame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    pub format: PixelFormat,
    /// Row-major pixel data, `width * height * bytes_per_pixel` bytes.
    pub data: Vec<u8>,
    /// Capture time, seconds since the Unix epoch.
    pub timestamp: f64,
}

impl MediaFrame {
    /// `true` when `data` has exactly the length implied by the dimensions.
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.width as usize * self.height as usize * self.format.bytes_per_pixel()
    }
}
