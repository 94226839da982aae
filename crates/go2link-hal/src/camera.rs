//! Generic `FrameSource` trait and the synthetic test-pattern camera.

use go2link_types::{DeviceError, MediaFrame, PixelFormat, unix_now};

/// A camera or other image-capture device.
pub trait FrameSource: Send {
    /// Stable identifier for this source, e.g. `"front"`.
    fn id(&self) -> &str;

    /// Capture and return the next available frame.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError`] if the frame cannot be captured (e.g. the
    /// device is disconnected or the buffer is unavailable).
    fn capture(&mut self) -> Result<MediaFrame, DeviceError>;
}

/// Frame size of the robot's front camera stream.
pub const TEST_PATTERN_WIDTH: u32 = 640;
pub const TEST_PATTERN_HEIGHT: u32 = 480;

/// Height of the scan band drawn across the pattern.
const BAND_HEIGHT: u32 = 8;

/// Simulated camera emitting an RGB24 colour gradient that scrolls by one
/// pixel per frame, with a white scan band sweeping downwards.
pub struct TestPatternCamera {
    id: String,
    width: u32,
    height: u32,
    frame_index: u64,
}

impl TestPatternCamera {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_size(id, TEST_PATTERN_WIDTH, TEST_PATTERN_HEIGHT)
    }

    pub fn with_size(id: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            id: id.into(),
            width: width.max(1),
            height: height.max(1),
            frame_index: 0,
        }
    }

    pub fn frames_captured(&self) -> u64 {
        self.frame_index
    }
}

impl FrameSource for TestPatternCamera {
    fn id(&self) -> &str {
        &self.id
    }

    fn capture(&mut self) -> Result<MediaFrame, DeviceError> {
        let (w, h) = (self.width, self.height);
        let offset = (self.frame_index % u64::from(w.max(h))) as u32;
        let band_top = offset.wrapping_mul(4) % h;
        let mut data = Vec::with_capacity(w as usize * h as usize * 3);

        for y in 0..h {
            let in_band = y.wrapping_sub(band_top) % h < BAND_HEIGHT;
            for x in 0..w {
                if in_band {
                    data.extend_from_slice(&[255, 255, 255]);
                } else {
                    let r = ((x + offset) % w * 255 / w) as u8;
                    let g = ((y + offset) % h * 255 / h) as u8;
                    data.extend_from_slice(&[r, g, 96]);
                }
            }
        }

        self.frame_index += 1;
        Ok(MediaFrame {
            width: w,
            height: h,
            format: PixelFormat::Rgb24,
            data,
            timestamp: unix_now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_frame_is_well_formed() {
        let mut cam = TestPatternCamera::new("front");
        assert_eq!(cam.id(), "front");
        let frame = cam.capture().unwrap();
        assert_eq!(frame.width, 640);
        assert_eq!(frame.height, 480);
        assert_eq!(frame.format, PixelFormat::Rgb24);
        assert!(frame.is_well_formed());
    }

    #[test]
    fn consecutive_frames_differ() {
        let mut cam = TestPatternCamera::with_size("front", 32, 24);
        let a = cam.capture().unwrap();
        let b = cam.capture().unwrap();
        assert_ne!(a.data, b.data);
        assert_eq!(cam.frames_captured(), 2);
    }

    #[test]
    fn degenerate_size_is_bumped_to_one_pixel() {
        let mut cam = TestPatternCamera::with_size("tiny", 0, 0);
        let frame = cam.capture().unwrap();
        assert_eq!(frame.data.len(), 3);
    }
}
