// src/trainer.rs - turning recorded samples into gesture templates
use nalgebra::Vector3;
use thiserror::Error;

use crate::gesture::PathPoint;
use crate::landmarks::NUM_LANDMARKS;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("no samples provided")]
    NoSamples,
    #[error("sample {index} has {got} landmarks, expected {expected}")]
    LandmarkCountMismatch { index: usize, got: usize, expected: usize },
    #[error("sample {index} has insufficient path points")]
    PathTooShort { index: usize },
}

/// A recorded static gesture sample.
#[derive(Debug, Clone)]
pub struct StaticSample {
    pub landmarks: Vec<Vector3<f64>>,
    pub timestamp: i64,
}

/// A recorded dynamic gesture sample.
#[derive(Debug, Clone)]
pub struct DynamicSample {
    pub path: Vec<PathPoint>,
    pub timestamp: i64,
}

/// Averages static landmark samples into a single template landmark set.
///
/// All samples must carry the same number of landmarks (normally 21).
pub fn train_static(samples: &[StaticSample]) -> Result<Vec<Vector3<f64>>, TrainError> {
    if samples.is_empty() {
        return Err(TrainError::NoSamples);
    }

    let expected = samples[0].landmarks.len();
    if expected == 0 {
        return Err(TrainError::LandmarkCountMismatch { index: 0, got: 0, expected: NUM_LANDMARKS });
    }
    for (index, sample) in samples.iter().enumerate() {
        if sample.landmarks.len() != expected {
            return Err(TrainError::LandmarkCountMismatch {
                index,
                got: sample.landmarks.len(),
                expected,
            });
        }
    }

    let n = samples.len() as f64;
    let mut averaged = vec![Vector3::zeros(); expected];
    for sample in samples {
        for (avg, lm) in averaged.iter_mut().zip(sample.landmarks.iter()) {
            *avg += *lm;
        }
    }
    for avg in averaged.iter_mut() {
        *avg /= n;
    }

    Ok(averaged)
}

/// Averages dynamic path samples into a single template path.
///
/// Samples of different lengths are resampled to the first sample's length
/// before averaging, so recording speed does not skew the template.
pub fn train_dynamic(samples: &[DynamicSample]) -> Result<Vec<PathPoint>, TrainError> {
    if samples.is_empty() {
        return Err(TrainError::NoSamples);
    }
    for (index, sample) in samples.iter().enumerate() {
        if sample.path.len() < 2 {
            return Err(TrainError::PathTooShort { index });
        }
    }

    let target_len = samples[0].path.len();
    let resampled: Vec<Vec<PathPoint>> =
        samples.iter().map(|s| resample_path(&s.path, target_len)).collect();

    let n = samples.len() as f64;
    let mut averaged = Vec::with_capacity(target_len);
    for i in 0..target_len {
        let sum_x: f64 = resampled.iter().map(|p| p[i].x).sum();
        let sum_y: f64 = resampled.iter().map(|p| p[i].y).sum();
        averaged.push(PathPoint {
            x: sum_x / n,
            y: sum_y / n,
            // Timestamps come from the first sample as the reference.
            timestamp: resampled[0][i].timestamp,
        });
    }

    Ok(averaged)
}

/// Resamples a path to exactly `target_len` points using linear
/// interpolation.
pub fn resample_path(path: &[PathPoint], target_len: usize) -> Vec<PathPoint> {
    if path.is_empty() {
        return Vec::new();
    }
    if path.len() == 1 || target_len <= 1 {
        return vec![path[0]];
    }

    let mut result = Vec::with_capacity(target_len);
    for i in 0..target_len {
        let t = i as f64 / (target_len - 1) as f64;
        let pos = t * (path.len() - 1) as f64;

        let idx = (pos as usize).min(path.len() - 2);
        let frac = pos - idx as f64;

        let p1 = path[idx];
        let p2 = path[idx + 1];

        result.push(PathPoint {
            x: p1.x + frac * (p2.x - p1.x),
            y: p1.y + frac * (p2.y - p1.y),
            timestamp: p1.timestamp + (frac * (p2.timestamp - p1.timestamp) as f64) as i64,
        });
    }

    result
}
