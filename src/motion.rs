// src/motion.rs - frame-differencing motion gate
use image::imageops;
use image::{DynamicImage, GrayImage};

/// Gaussian blur sigma applied before differencing, to suppress sensor
/// noise.
const BLUR_SIGMA: f32 = 3.5;
/// Per-pixel intensity delta above which a pixel counts as changed.
const DIFF_THRESHOLD: u8 = 25;

/// A cheap per-frame motion signal that gates the expensive recognition
/// stages.
pub trait MotionGate: Send {
    /// Returns whether motion was detected and the percentage of pixels
    /// that changed. The first call on a fresh gate establishes the
    /// baseline and always reports no motion.
    fn detect(&mut self, frame: &DynamicImage) -> (bool, f64);
}

/// Detects motion between consecutive frames by grayscale differencing.
pub struct FrameDiffGate {
    threshold: f64,
    prev: Option<GrayImage>,
}

impl FrameDiffGate {
    /// `threshold` is the percentage of pixels that must change to signal
    /// motion, e.g. 1.0 for 1%.
    pub fn new(threshold: f64) -> Self {
        Self { threshold, prev: None }
    }

    /// Clears the stored baseline; the next frame re-arms it.
    pub fn reset(&mut self) {
        self.prev = None;
    }

    pub fn set_threshold(&mut self, threshold: f64) {
        if threshold <= 0.0 {
            return;
        }
        self.threshold = threshold;
    }
}

impl MotionGate for FrameDiffGate {
    fn detect(&mut self, frame: &DynamicImage) -> (bool, f64) {
        let gray = frame.to_luma8();
        let blurred = imageops::blur(&gray, BLUR_SIGMA);

        let prev = match self.prev.take() {
            // First frame, or the capture resolution changed: rebaseline.
            None => {
                self.prev = Some(blurred);
                return (false, 0.0);
            }
            Some(prev) if prev.dimensions() != blurred.dimensions() => {
                self.prev = Some(blurred);
                return (false, 0.0);
            }
            Some(prev) => prev,
        };

        let changed = blurred
            .as_raw()
            .iter()
            .zip(prev.as_raw().iter())
            .filter(|(a, b)| a.abs_diff(**b) > DIFF_THRESHOLD)
            .count();
        let total = blurred.as_raw().len();

        let change_percent = changed as f64 / total as f64 * 100.0;
        self.prev = Some(blurred);

        (change_percent > self.threshold, change_percent)
    }
}
