// src/dtw.rs - dynamic time warping and trajectory matching
use std::sync::Arc;

use nalgebra::Vector2;

use crate::gesture::{score_for, sort_by_score, Match, PathPoint, Template, TemplateData};

/// Calculates the Dynamic Time Warping distance between two paths.
///
/// DTW aligns the two sequences elastically, so a gesture performed fast
/// (few samples) and slow (many samples) along the same trajectory yields a
/// small distance. The result is normalized by the longer path length.
/// Returns infinity if either path is empty.
pub fn dtw_distance(a: &[PathPoint], b: &[PathPoint]) -> f64 {
    let n = a.len();
    let m = b.len();

    if n == 0 || m == 0 {
        return f64::INFINITY;
    }

    let mut cost = vec![vec![f64::INFINITY; m + 1]; n + 1];
    cost[0][0] = 0.0;

    for i in 1..=n {
        for j in 1..=m {
            let d = point_distance(&a[i - 1], &b[j - 1]);
            let best = cost[i - 1][j].min(cost[i][j - 1]).min(cost[i - 1][j - 1]);
            cost[i][j] = d + best;
        }
    }

    cost[n][m] / n.max(m) as f64
}

// Timestamps are ignored: only the 2D shape is compared.
fn point_distance(a: &PathPoint, b: &PathPoint) -> f64 {
    (Vector2::new(a.x, a.y) - Vector2::new(b.x, b.y)).norm()
}

/// Rescales a path into the unit square using its own bounding box.
///
/// The x and y axes are normalized independently. A single-point path maps
/// to (0, 0), an empty path stays empty, and timestamps pass through
/// unchanged.
pub fn normalize_path(path: &[PathPoint]) -> Vec<PathPoint> {
    if path.is_empty() {
        return Vec::new();
    }
    if path.len() == 1 {
        return vec![PathPoint { x: 0.0, y: 0.0, timestamp: path[0].timestamp }];
    }

    let mut min_x = path[0].x;
    let mut max_x = path[0].x;
    let mut min_y = path[0].y;
    let mut max_y = path[0].y;
    for p in path {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }

    let range_x = max_x - min_x;
    let range_y = max_y - min_y;

    path.iter()
        .map(|p| PathPoint {
            x: if range_x > 0.0 { (p.x - min_x) / range_x } else { 0.0 },
            y: if range_y > 0.0 { (p.y - min_y) / range_y } else { 0.0 },
            timestamp: p.timestamp,
        })
        .collect()
}

/// Matches dynamic gestures against registered templates using DTW.
#[derive(Debug, Default)]
pub struct DynamicMatcher {
    templates: Vec<Arc<Template>>,
}

impl DynamicMatcher {
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

    /// Finds templates matching the given path, best score first.
    pub fn match_path(&self, path: &[PathPoint]) -> Vec<Match> {
        if path.is_empty() {
            return Vec::new();
        }

        let normalized_input = normalize_path(path);

        let mut matches = Vec::new();
        for template in &self.templates {
            let TemplateData::Dynamic(template_path) = &template.data else {
                continue;
            };
            if template_path.is_empty() {
                continue;
            }

            let normalized_template = normalize_path(template_path);
            let distance = dtw_distance(&normalized_input, &normalized_template);
            if distance.is_infinite() {
                continue;
            }

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

#[cfg(test)]
mod tests {
    use super::*;

    fn path_from(coords: &[(f64, f64)]) -> Vec<PathPoint> {
        coords
            .iter()
            .enumerate()
            .map(|(i, &(x, y))| PathPoint { x, y, timestamp: i as i64 * 33 })
            .collect()
    }

    fn line_path(n: usize) -> Vec<PathPoint> {
        (0..n)
            .map(|i| {
                let t = i as f64 / (n - 1) as f64;
                PathPoint { x: t, y: t, timestamp: i as i64 * 33 }
            })
            .collect()
    }

    #[test]
    fn dtw_distance_to_self_is_zero() {
        let path = path_from(&[(0.0, 0.0), (0.3, 0.1), (0.7, 0.4), (1.0, 1.0)]);
        assert_eq!(dtw_distance(&path, &path), 0.0);
    }

    #[test]
    fn dtw_distance_empty_is_infinite() {
        let path = path_from(&[(0.0, 0.0), (1.0, 1.0)]);
        assert!(dtw_distance(&[], &path).is_infinite());
        assert!(dtw_distance(&path, &[]).is_infinite());
        assert!(dtw_distance(&[], &[]).is_infinite());
    }

    #[test]
    fn dtw_is_speed_invariant_on_straight_line() {
        // Same straight-line trajectory sampled fast (3 points) and slow
        // (9 points) must stay close under DTW.
        let fast = line_path(3);
        let slow = line_path(9);

        let distance = dtw_distance(&normalize_path(&fast), &normalize_path(&slow));
        assert!(distance < 0.5, "distance = {distance}");
    }

    #[test]
    fn dtw_separates_different_shapes() {
        let line = line_path(8);
        let mut zigzag = line_path(8);
        for (i, p) in zigzag.iter_mut().enumerate() {
            p.y = if i % 2 == 0 { 0.0 } else { 1.0 };
        }

        let same = dtw_distance(&normalize_path(&line), &normalize_path(&line_path(5)));
        let different = dtw_distance(&normalize_path(&line), &normalize_path(&zigzag));
        assert!(different > same);
    }

    #[test]
    fn normalize_path_uses_bounding_box() {
        let path = path_from(&[(2.0, 10.0), (4.0, 30.0), (6.0, 20.0)]);
        let normalized = normalize_path(&path);

        assert_eq!(normalized[0].x, 0.0);
        assert_eq!(normalized[1].x, 0.5);
        assert_eq!(normalized[2].x, 1.0);
        assert_eq!(normalized[0].y, 0.0);
        assert_eq!(normalized[1].y, 1.0);
        assert_eq!(normalized[2].y, 0.5);
    }

    #[test]
    fn normalize_path_preserves_timestamps() {
        let path = path_from(&[(2.0, 10.0), (4.0, 30.0)]);
        let normalized = normalize_path(&path);
        assert_eq!(normalized[0].timestamp, 0);
        assert_eq!(normalized[1].timestamp, 33);
    }

    #[test]
    fn normalize_path_single_point_maps_to_origin() {
        let normalized = normalize_path(&[PathPoint { x: 5.0, y: 7.0, timestamp: 42 }]);
        assert_eq!(normalized, vec![PathPoint { x: 0.0, y: 0.0, timestamp: 42 }]);
    }

    #[test]
    fn normalize_path_degenerate_axis_maps_to_zero() {
        // A horizontal path has zero y-range; y collapses to 0.
        let path = path_from(&[(0.0, 0.5), (1.0, 0.5), (2.0, 0.5)]);
        let normalized = normalize_path(&path);
        for p in &normalized {
            assert_eq!(p.y, 0.0);
        }
        assert_eq!(normalized[2].x, 1.0);
    }

    #[test]
    fn normalize_path_empty_stays_empty() {
        assert!(normalize_path(&[]).is_empty());
    }

    #[test]
    fn matcher_matches_same_shape_at_different_speed() {
        let mut matcher = DynamicMatcher::new();
        matcher.add_template(Template {
            id: "line".into(),
            name: "diagonal".into(),
            tolerance: 0.5,
            data: TemplateData::Dynamic(line_path(9)),
        });

        let matches = matcher.match_path(&line_path(3));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].template.id, "line");
        assert!(matches[0].score > 0.6);
    }

    #[test]
    fn matcher_skips_empty_template_paths() {
        let mut matcher = DynamicMatcher::new();
        matcher.add_template(Template {
            id: "empty".into(),
            name: "empty".into(),
            tolerance: 10.0,
            data: TemplateData::Dynamic(Vec::new()),
        });

        assert!(matcher.match_path(&line_path(4)).is_empty());
    }

    #[test]
    fn matcher_empty_input_returns_empty() {
        let mut matcher = DynamicMatcher::new();
        matcher.add_template(Template {
            id: "line".into(),
            name: "line".into(),
            tolerance: 10.0,
            data: TemplateData::Dynamic(line_path(5)),
        });

        assert!(matcher.match_path(&[]).is_empty());
    }

    #[test]
    fn matcher_sorts_by_descending_score() {
        let mut zigzag = line_path(9);
        for (i, p) in zigzag.iter_mut().enumerate() {
            p.y = if i % 2 == 0 { 0.0 } else { 1.0 };
        }

        let mut matcher = DynamicMatcher::new();
        matcher.add_template(Template {
            id: "zigzag".into(),
            name: "zigzag".into(),
            tolerance: 10.0,
            data: TemplateData::Dynamic(zigzag),
        });
        matcher.add_template(Template {
            id: "line".into(),
            name: "line".into(),
            tolerance: 10.0,
            data: TemplateData::Dynamic(line_path(9)),
        });

        let matches = matcher.match_path(&line_path(6));
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].template.id, "line");
        assert!(matches[0].score >= matches[1].score);
    }
}
