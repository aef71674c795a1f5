// src/landmarks.rs - hand landmark types and pose normalization
use nalgebra::Vector3;

// Hand landmark indices following the MediaPipe convention.
// See: https://developers.google.com/mediapipe/solutions/vision/hand_landmarker
pub const WRIST: usize = 0;
pub const THUMB_CMC: usize = 1;
pub const THUMB_MCP: usize = 2;
pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_MCP: usize = 5;
pub const INDEX_PIP: usize = 6;
pub const INDEX_DIP: usize = 7;
pub const INDEX_TIP: usize = 8;
pub const MIDDLE_MCP: usize = 9;
pub const MIDDLE_PIP: usize = 10;
pub const MIDDLE_DIP: usize = 11;
pub const MIDDLE_TIP: usize = 12;
pub const RING_MCP: usize = 13;
pub const RING_PIP: usize = 14;
pub const RING_DIP: usize = 15;
pub const RING_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_PIP: usize = 18;
pub const PINKY_DIP: usize = 19;
pub const PINKY_TIP: usize = 20;
pub const NUM_LANDMARKS: usize = 21;

/// A pose is degenerate when the wrist-to-middle-MCP distance falls below
/// this; normalization then skips the scaling step to avoid dividing by
/// near-zero.
const MIN_SCALE: f64 = 1e-10;

/// The 21 hand landmarks detected for one hand in one frame.
#[derive(Debug, Clone)]
pub struct HandPose {
    pub points: [Vector3<f64>; NUM_LANDMARKS],
    pub handedness: String, // "Left" or "Right"
    pub score: f64,
}

impl HandPose {
    pub fn new(handedness: impl Into<String>, score: f64) -> Self {
        Self {
            points: [Vector3::zeros(); NUM_LANDMARKS],
            handedness: handedness.into(),
            score,
        }
    }

    /// Normalizes the landmarks relative to wrist position and hand size.
    ///
    /// The normalized pose has the wrist at the origin and is scaled so the
    /// distance from wrist to middle finger MCP is 1.0. A degenerate pose
    /// (scale below MIN_SCALE) is returned translated but unscaled.
    pub fn normalize(&self) -> HandPose {
        let mut normalized = HandPose {
            points: self.points,
            handedness: self.handedness.clone(),
            score: self.score,
        };

        let wrist = self.points[WRIST];
        for point in normalized.points.iter_mut() {
            *point -= wrist;
        }

        let scale = normalized.points[MIDDLE_MCP].norm();
        if scale < MIN_SCALE {
            return normalized;
        }

        for point in normalized.points.iter_mut() {
            *point /= scale;
        }

        normalized
    }
}

/// Sums the Euclidean distances between corresponding points of two
/// landmark sequences. If the lengths differ, only the shorter prefix is
/// compared.
pub fn euclidean_distance(a: &[Vector3<f64>], b: &[Vector3<f64>]) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    a.iter().zip(b.iter()).map(|(p, q)| (p - q).norm()).sum()
}
