// src/gesture.rs - gesture templates and static pose matching
use std::sync::Arc;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::landmarks::{euclidean_distance, HandPose};

/// The kind of gesture a template describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// A single hand pose, matched per frame.
    Static,
    /// A motion path over time, matched against the buffered trajectory.
    Dynamic,
}

/// One sample of a tracked 2D point over time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub x: f64,
    pub y: f64,
    /// Milliseconds since the Unix epoch, monotonic in pipeline-tick order.
    pub timestamp: i64,
}

/// The matching payload of a template.
#[derive(Debug, Clone)]
pub enum TemplateData {
    /// Normalized landmarks for a static gesture.
    Static(Vec<Vector3<f64>>),
    /// Recorded path for a dynamic gesture.
    Dynamic(Vec<PathPoint>),
}

/// A trained gesture template to match against.
#[derive(Debug, Clone)]
pub struct Template {
    pub id: String,
    pub name: String,
    /// Maximum distance at which the template still matches.
    pub tolerance: f64,
    pub data: TemplateData,
}

impl Template {
    pub fn kind(&self) -> Kind {
        match self.data {
            TemplateData::Static(_) => Kind::Static,
            TemplateData::Dynamic(_) => Kind::Dynamic,
        }
    }
}

/// A match between an observed pose or path and a template.
#[derive(Debug, Clone)]
pub struct Match {
    pub template: Arc<Template>,
    /// 1 / (1 + distance), in (0, 1].
    pub score: f64,
    pub distance: f64,
}

pub(crate) fn score_for(distance: f64) -> f64 {
    1.0 / (1.0 + distance)
}

pub(crate) fn sort_by_score(matches: &mut [Match]) {
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
}

/// Matches static hand gestures against registered templates.
///
/// The matcher owns its template list; live edits go through
/// `add_template`/`remove_template` under the caller's lock.
#[derive(Debug, Default)]
pub struct StaticMatcher {
    templates: Vec<Arc<Template>>,
}

impl StaticMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_template(&mut self, template: Template) {
        self.templates.push(Arc::new(template));
    }

    pub fn remove_template(&mut self, id: &str) {
        self.templates.retain(|t| t.id != id);
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Finds templates matching the given pose, best score first.
    pub fn match_pose(&self, pose: &HandPose) -> Vec<Match> {
        let normalized = pose.normalize();

        let mut matches = Vec::new();
        for template in &self.templates {
            let TemplateData::Static(landmarks) = &template.data else {
                continue;
            };

            let distance = euclidean_distance(&normalized.points, landmarks);
            if distance <= template.tolerance {
                matches.push(Match {
                    template: Arc::clone(template),
                    score: score_for(distance),
                    distance,
                });
            }
        }

        sort_by_score(&mut matches);
        matches
    }
}
