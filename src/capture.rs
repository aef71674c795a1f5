// src/capture.rs - frame acquisition from the camera device
use image::DynamicImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use thiserror::Error;
use tracing::debug;

// Capture defaults, kept low for performance.
pub const DEFAULT_WIDTH: u32 = 640;
pub const DEFAULT_HEIGHT: u32 = 480;
pub const DEFAULT_FPS: u32 = 5;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("camera is not open")]
    NotOpen,
    #[error("camera error: {0}")]
    Camera(#[from] nokhwa::NokhwaError),
}

/// A source of video frames for the detection pipeline.
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<(), CaptureError>;
    fn read_frame(&mut self) -> Result<DynamicImage, CaptureError>;
    /// Requests a capture rate in frames per second. Best effort; the
    /// pipeline's own tick cadence is authoritative.
    fn set_rate(&mut self, fps: u32);
    fn close(&mut self);
    fn is_open(&self) -> bool;
}

/// Captures frames from a local camera device.
pub struct CameraSource {
    index: u32,
    fps: u32,
    camera: Option<Camera>,
}

impl CameraSource {
    pub fn new(index: u32) -> Self {
        Self { index, fps: DEFAULT_FPS, camera: None }
    }
}

impl FrameSource for CameraSource {
    fn open(&mut self) -> Result<(), CaptureError> {
        if self.camera.is_some() {
            return Ok(());
        }

        let format = CameraFormat::new(
            Resolution::new(DEFAULT_WIDTH, DEFAULT_HEIGHT),
            FrameFormat::MJPEG,
            30,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));

        let mut camera = Camera::new(CameraIndex::Index(self.index), requested)?;
        camera.open_stream()?;
        if let Err(e) = camera.set_frame_rate(self.fps) {
            debug!(fps = self.fps, error = %e, "camera rejected frame rate");
        }

        self.camera = Some(camera);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<DynamicImage, CaptureError> {
        let camera = self.camera.as_mut().ok_or(CaptureError::NotOpen)?;

        let frame = camera.frame()?;
        let decoded = frame.decode_image::<RgbFormat>()?;
        Ok(DynamicImage::ImageRgb8(decoded))
    }

    fn set_rate(&mut self, fps: u32) {
        if fps == 0 {
            return;
        }
        self.fps = fps;
        if let Some(camera) = self.camera.as_mut() {
            if let Err(e) = camera.set_frame_rate(fps) {
                debug!(fps, error = %e, "camera rejected frame rate");
            }
        }
    }

    fn close(&mut self) {
        if let Some(mut camera) = self.camera.take() {
            let _ = camera.stop_stream();
        }
    }

    fn is_open(&self) -> bool {
        self.camera.is_some()
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}
