// src/bin/camera_probe.rs - standalone camera access check
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{ApiBackend, CameraIndex, RequestedFormat, RequestedFormatType};
use nokhwa::Camera;

fn main() {
    println!("Probing camera access...\n");

    match nokhwa::query(ApiBackend::Auto) {
        Ok(cameras) => {
            println!("Found {} camera(s):", cameras.len());
            for (i, camera) in cameras.iter().enumerate() {
                println!("  [{}] {}", i, camera.human_name());
            }
        }
        Err(e) => println!("Failed to query cameras: {}", e),
    }
    println!();

    let index = CameraIndex::Index(0);
    let format = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);

    match Camera::new(index, format) {
        Ok(mut camera) => {
            println!("✓ Camera opened");

            match camera.open_stream() {
                Ok(_) => {
                    println!("✓ Stream opened");
                    match camera.frame() {
                        Ok(frame) => match frame.decode_image::<RgbFormat>() {
                            Ok(image) => println!("✓ Frame captured ({}x{})", image.width(), image.height()),
                            Err(e) => println!("✗ Failed to decode frame: {}", e),
                        },
                        Err(e) => println!("✗ Failed to capture frame: {}", e),
                    }
                    let _ = camera.stop_stream();
                }
                Err(e) => println!("✗ Failed to open stream: {}", e),
            }
        }
        Err(e) => {
            println!("✗ Failed to open camera: {}", e);
            println!("\nPossible causes:");
            println!("1. Camera is being used by another app");
            println!("2. Camera permissions not granted");
            println!("3. No camera connected");
        }
    }
}
