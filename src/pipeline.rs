// src/pipeline.rs - motion-gated detection pipeline state machine
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{info, warn};

use crate::capture::FrameSource;
use crate::detector::HandDetector;
use crate::dispatch::Dispatcher;
use crate::dtw::DynamicMatcher;
use crate::gesture::{PathPoint, StaticMatcher};
use crate::landmarks::{HandPose, INDEX_TIP};
use crate::motion::MotionGate;

/// Frame rate while idle, waiting for motion.
pub const DEFAULT_IDLE_FPS: u32 = 5;
/// Frame rate during active detection.
pub const DEFAULT_ACTIVE_FPS: u32 = 15;
/// Quiet time without motion before dropping back to idle.
pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(2000);
/// Most-recent trajectory samples kept for dynamic matching.
pub const DEFAULT_PATH_CAPACITY: usize = 60;
/// Samples required before dynamic matching runs at all.
pub const DEFAULT_MIN_PATH_POINTS: usize = 10;

/// A bounded most-recent-N buffer of trajectory samples.
///
/// Appending past capacity drops exactly the oldest sample; iteration
/// order is oldest first.
#[derive(Debug)]
pub struct PathBuffer {
    points: VecDeque<PathPoint>,
    capacity: usize,
}

impl PathBuffer {
    pub fn new(capacity: usize) -> Self {
        Self { points: VecDeque::with_capacity(capacity), capacity }
    }

    pub fn push(&mut self, point: PathPoint) {
        if self.points.len() >= self.capacity {
            self.points.pop_front();
        }
        self.points.push_back(point);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn clear(&mut self) {
        self.points.clear();
    }

    /// Copies the buffered samples out in chronological order.
    pub fn points(&self) -> Vec<PathPoint> {
        self.points.iter().copied().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Active,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub idle_fps: u32,
    pub active_fps: u32,
    pub quiet_period: Duration,
    pub path_capacity: usize,
    pub min_path_points: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            idle_fps: DEFAULT_IDLE_FPS,
            active_fps: DEFAULT_ACTIVE_FPS,
            quiet_period: DEFAULT_QUIET_PERIOD,
            path_capacity: DEFAULT_PATH_CAPACITY,
            min_path_points: DEFAULT_MIN_PATH_POINTS,
        }
    }
}

fn tick_period(fps: u32) -> Duration {
    Duration::from_secs_f64(1.0 / fps.max(1) as f64)
}

/// The detection loop: reads frames, gates on motion, runs the matchers,
/// and hands matches to the dispatcher.
///
/// Per tick, motion evaluation precedes the mode transition, which
/// precedes landmark detection, matching, and dispatch. Frame-read and
/// detector failures skip the tick; nothing here is fatal.
pub struct Pipeline<S, G, D> {
    source: S,
    gate: G,
    detector: D,
    static_matcher: Arc<RwLock<StaticMatcher>>,
    dynamic_matcher: Arc<RwLock<DynamicMatcher>>,
    dispatcher: Arc<Dispatcher>,
    enabled: Arc<AtomicBool>,
    config: PipelineConfig,
    mode: Mode,
    last_motion: Instant,
    path: PathBuffer,
}

impl<S, G, D> Pipeline<S, G, D>
where
    S: FrameSource,
    G: MotionGate,
    D: HandDetector,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: S,
        gate: G,
        detector: D,
        static_matcher: Arc<RwLock<StaticMatcher>>,
        dynamic_matcher: Arc<RwLock<DynamicMatcher>>,
        dispatcher: Arc<Dispatcher>,
        enabled: Arc<AtomicBool>,
        config: PipelineConfig,
    ) -> Self {
        let path = PathBuffer::new(config.path_capacity);
        Self {
            source,
            gate,
            detector,
            static_matcher,
            dynamic_matcher,
            dispatcher,
            enabled,
            config,
            mode: Mode::Idle,
            last_motion: Instant::now(),
            path,
        }
    }

    /// Drives ticks until the stop signal fires. The stop is observed at
    /// the next tick boundary; the frame source and detector are released
    /// before returning.
    pub async fn run(mut self, mut stop: watch::Receiver<bool>) {
        let mut interval = time::interval(tick_period(self.config.idle_fps));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(idle_fps = self.config.idle_fps, active_fps = self.config.active_fps, "detection pipeline started");

        loop {
            tokio::select! {
                _ = stop.changed() => break,
                _ = interval.tick() => {
                    if !self.enabled.load(Ordering::Relaxed) {
                        continue;
                    }
                    if let Some(fps) = self.tick().await {
                        self.source.set_rate(fps);
                        interval = time::interval(tick_period(fps));
                        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    }
                }
            }
        }

        self.detector.close().await;
        self.source.close();
        info!("detection pipeline stopped");
    }

    /// Runs one pipeline tick. Returns the new frame rate when the mode
    /// changed, so the caller can retune its timer.
    async fn tick(&mut self) -> Option<u32> {
        let frame = match self.source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "failed to read frame");
                return None;
            }
        };

        let (motion, _score) = self.gate.detect(&frame);

        let mut rate_change = None;
        if motion {
            self.last_motion = Instant::now();
            if self.mode == Mode::Idle {
                self.mode = Mode::Active;
                rate_change = Some(self.config.active_fps);
                info!("switched to active mode");
            }
        } else if self.mode == Mode::Active && self.last_motion.elapsed() >= self.config.quiet_period {
            self.mode = Mode::Idle;
            rate_change = Some(self.config.idle_fps);
            self.path.clear();
            info!("switched to idle mode");
        }

        if self.mode != Mode::Active {
            return rate_change;
        }

        let poses = match self.detector.detect(&frame).await {
            Ok(poses) => poses,
            Err(e) => {
                warn!(error = %e, "hand detection failed");
                return rate_change;
            }
        };
        if poses.is_empty() {
            return rate_change;
        }

        for pose in &poses {
            self.process_pose(pose);
        }

        rate_change
    }

    fn process_pose(&mut self, pose: &HandPose) {
        let static_matches = self.static_matcher.read().unwrap().match_pose(pose);
        if let Some(best) = static_matches.first() {
            info!(gesture = %best.template.name, score = best.score, "static gesture matched");
            self.dispatcher.dispatch(&best.template.id, &best.template.name);
        }

        // Track the index fingertip for dynamic gestures.
        let tip = pose.points[INDEX_TIP];
        self.path.push(PathPoint { x: tip.x, y: tip.y, timestamp: Utc::now().timestamp_millis() });

        if self.path.len() >= self.config.min_path_points {
            let buffered = self.path.points();
            let dynamic_matches = self.dynamic_matcher.read().unwrap().match_path(&buffered);
            if let Some(best) = dynamic_matches.first() {
                info!(gesture = %best.template.name, score = best.score, "dynamic gesture matched");
                self.dispatcher.dispatch(&best.template.id, &best.template.name);
                // Suppress repeated triggers from the same continuous motion.
                self.path.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use image::{DynamicImage, Rgb, RgbImage};
    use nalgebra::Vector3;

    use crate::capture::CaptureError;
    use crate::detector::{open_palm_pose, MockDetector};
    use crate::gesture::{Template, TemplateData};
    use crate::plugin::{Executor, Manager};
    use crate::store::JsonStore;

    struct ScriptedSource {
        fail_reads: bool,
        rates: Vec<u32>,
        closed: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new() -> Self {
            Self { fail_reads: false, rates: Vec::new(), closed: Arc::new(AtomicBool::new(false)) }
        }
    }

    impl FrameSource for ScriptedSource {
        fn open(&mut self) -> Result<(), CaptureError> {
            Ok(())
        }

        fn read_frame(&mut self) -> Result<DynamicImage, CaptureError> {
            if self.fail_reads {
                return Err(CaptureError::NotOpen);
            }
            Ok(DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]))))
        }

        fn set_rate(&mut self, fps: u32) {
            self.rates.push(fps);
        }

        fn close(&mut self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
    }

    struct ScriptedGate {
        motions: VecDeque<bool>,
    }

    impl ScriptedGate {
        fn new(motions: &[bool]) -> Self {
            Self { motions: motions.iter().copied().collect() }
        }
    }

    impl MotionGate for ScriptedGate {
        fn detect(&mut self, _frame: &DynamicImage) -> (bool, f64) {
            let motion = self.motions.pop_front().unwrap_or(false);
            (motion, if motion { 5.0 } else { 0.0 })
        }
    }

    type TestPipeline = Pipeline<ScriptedSource, ScriptedGate, MockDetector>;
    type Matched = Arc<Mutex<Vec<(String, String)>>>;

    fn test_pipeline(motions: &[bool], config: PipelineConfig) -> (TestPipeline, Matched) {
        let matched: Matched = Arc::new(Mutex::new(Vec::new()));
        let hook_sink = Arc::clone(&matched);

        let store = Arc::new(JsonStore::in_memory());
        let manager = Arc::new(Manager::new("/nonexistent/plugins"));
        let mut dispatcher = Dispatcher::new(store, manager, Arc::new(Executor::new(1000)));
        dispatcher.set_on_match(Arc::new(move |id, name| {
            hook_sink.lock().unwrap().push((id.to_string(), name.to_string()));
        }));

        let pipeline = Pipeline::new(
            ScriptedSource::new(),
            ScriptedGate::new(motions),
            MockDetector::new(),
            Arc::new(RwLock::new(StaticMatcher::new())),
            Arc::new(RwLock::new(DynamicMatcher::new())),
            Arc::new(dispatcher),
            Arc::new(AtomicBool::new(true)),
            config,
        );
        (pipeline, matched)
    }

    fn line_template(id: &str, tolerance: f64) -> Template {
        let path = (0..9)
            .map(|i| {
                let t = i as f64 / 8.0;
                PathPoint { x: t, y: t, timestamp: i as i64 * 66 }
            })
            .collect();
        Template {
            id: id.to_string(),
            name: format!("gesture-{id}"),
            tolerance,
            data: TemplateData::Dynamic(path),
        }
    }

    #[test]
    fn path_buffer_never_exceeds_capacity() {
        let mut buffer = PathBuffer::new(3);
        for i in 0..10 {
            buffer.push(PathPoint { x: i as f64, y: 0.0, timestamp: i });
            assert!(buffer.len() <= 3);
        }
    }

    #[test]
    fn path_buffer_evicts_oldest_first() {
        let mut buffer = PathBuffer::new(3);
        for i in 0..5 {
            buffer.push(PathPoint { x: i as f64, y: 0.0, timestamp: i });
        }

        let points = buffer.points();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].x, 2.0);
        assert_eq!(points[2].x, 4.0);
    }

    #[tokio::test]
    async fn idle_to_active_within_one_tick_of_motion() {
        let (mut pipeline, _) = test_pipeline(&[true], PipelineConfig::default());
        assert_eq!(pipeline.mode, Mode::Idle);

        let rate = pipeline.tick().await;
        assert_eq!(pipeline.mode, Mode::Active);
        assert_eq!(rate, Some(DEFAULT_ACTIVE_FPS));
    }

    #[tokio::test(start_paused = true)]
    async fn active_to_idle_only_after_quiet_period() {
        let (mut pipeline, _) = test_pipeline(&[true, false, false], PipelineConfig::default());

        pipeline.tick().await;
        assert_eq!(pipeline.mode, Mode::Active);

        // One second of quiet: not enough.
        time::advance(Duration::from_millis(1000)).await;
        assert_eq!(pipeline.tick().await, None);
        assert_eq!(pipeline.mode, Mode::Active);

        // Past the 2000 ms quiet period: back to idle.
        time::advance(Duration::from_millis(1100)).await;
        let rate = pipeline.tick().await;
        assert_eq!(pipeline.mode, Mode::Idle);
        assert_eq!(rate, Some(DEFAULT_IDLE_FPS));
    }

    #[tokio::test(start_paused = true)]
    async fn path_buffer_clears_on_idle_transition() {
        let (mut pipeline, _) = test_pipeline(&[true, false], PipelineConfig::default());
        pipeline.detector.set_hands(vec![open_palm_pose()]);

        pipeline.tick().await;
        assert_eq!(pipeline.path.len(), 1);

        time::advance(Duration::from_millis(2100)).await;
        pipeline.tick().await;
        assert_eq!(pipeline.mode, Mode::Idle);
        assert!(pipeline.path.is_empty());
    }

    #[tokio::test]
    async fn frame_read_failure_skips_the_tick() {
        let (mut pipeline, matched) = test_pipeline(&[true], PipelineConfig::default());
        pipeline.source.fail_reads = true;

        let rate = pipeline.tick().await;
        assert_eq!(rate, None);
        assert_eq!(pipeline.mode, Mode::Idle);
        assert!(matched.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn detector_failure_degrades_to_no_hands() {
        let (mut pipeline, matched) = test_pipeline(&[true, true], PipelineConfig::default());
        pipeline.detector.set_failing(true);

        // The mode transition still happens; matching is skipped.
        let rate = pipeline.tick().await;
        assert_eq!(pipeline.mode, Mode::Active);
        assert_eq!(rate, Some(DEFAULT_ACTIVE_FPS));

        pipeline.tick().await;
        assert!(matched.lock().unwrap().is_empty());
        assert!(pipeline.path.is_empty());
    }

    #[tokio::test]
    async fn static_match_dispatches_best_candidate() {
        let (mut pipeline, matched) = test_pipeline(&[true], PipelineConfig::default());

        let pose = open_palm_pose();
        pipeline.static_matcher.write().unwrap().add_template(Template {
            id: "palm".into(),
            name: "open-palm".into(),
            tolerance: 0.5,
            data: TemplateData::Static(pose.normalize().points.to_vec()),
        });
        pipeline.detector.set_hands(vec![pose]);

        pipeline.tick().await;

        let matched = matched.lock().unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0], ("palm".to_string(), "open-palm".to_string()));
    }

    #[tokio::test]
    async fn dynamic_match_fires_and_clears_the_buffer() {
        let config = PipelineConfig { min_path_points: 3, ..PipelineConfig::default() };
        let (mut pipeline, matched) = test_pipeline(&[true; 4], config);
        pipeline.dynamic_matcher.write().unwrap().add_template(line_template("swipe", 0.5));

        // Move the index fingertip along a diagonal over three ticks.
        for i in 0..3 {
            let mut pose = open_palm_pose();
            pose.points[INDEX_TIP] = Vector3::new(0.2 + 0.3 * i as f64, 0.2 + 0.3 * i as f64, 0.0);
            pipeline.detector.set_hands(vec![pose]);
            pipeline.tick().await;
        }

        let matched = matched.lock().unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].0, "swipe");
        // Cleared after the match so the same motion cannot re-trigger.
        assert!(pipeline.path.is_empty());
    }

    #[tokio::test]
    async fn no_dynamic_match_below_minimum_samples() {
        let config = PipelineConfig { min_path_points: 5, ..PipelineConfig::default() };
        let (mut pipeline, matched) = test_pipeline(&[true; 4], config);
        pipeline.dynamic_matcher.write().unwrap().add_template(line_template("swipe", 10.0));

        for i in 0..3 {
            let mut pose = open_palm_pose();
            pose.points[INDEX_TIP] = Vector3::new(0.1 * i as f64, 0.1 * i as f64, 0.0);
            pipeline.detector.set_hands(vec![pose]);
            pipeline.tick().await;
        }

        assert!(matched.lock().unwrap().is_empty());
        assert_eq!(pipeline.path.len(), 3);
    }

    #[tokio::test]
    async fn idle_mode_skips_detection_entirely() {
        let (mut pipeline, matched) = test_pipeline(&[false, false], PipelineConfig::default());
        pipeline.detector.set_hands(vec![open_palm_pose()]);

        pipeline.tick().await;
        pipeline.tick().await;

        assert_eq!(pipeline.mode, Mode::Idle);
        assert!(matched.lock().unwrap().is_empty());
        assert!(pipeline.path.is_empty());
    }

    #[tokio::test]
    async fn stop_signal_terminates_run_and_releases_the_source() {
        let (pipeline, _) = test_pipeline(&[], PipelineConfig::default());
        let closed = Arc::clone(&pipeline.source.closed);

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(pipeline.run(stop_rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        stop_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("pipeline did not stop promptly")
            .unwrap();
        assert!(closed.load(Ordering::SeqCst));
    }
}
