// src/app.rs - wiring the detection pipeline, stores, and dispatch together
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::capture::{CameraSource, FrameSource};
use crate::config::Config;
use crate::detector::{AnyDetector, DetectorConfig, MediaPipeDetector, MockDetector};
use crate::dispatch::{Dispatcher, MatchHook};
use crate::dtw::DynamicMatcher;
use crate::gesture::{Kind, StaticMatcher, Template};
use crate::motion::FrameDiffGate;
use crate::pipeline::Pipeline;
use crate::plugin::{Executor, Manager};
use crate::store::{BindingStore, JsonStore, TemplateStore};
use crate::trainer;

/// The daemon: owns the stores, matchers, and plugin registry, and runs
/// the detection pipeline as a background task.
pub struct App {
    config: Config,
    store: Arc<JsonStore>,
    plugins: Arc<Manager>,
    executor: Arc<Executor>,
    static_matcher: Arc<RwLock<StaticMatcher>>,
    dynamic_matcher: Arc<RwLock<DynamicMatcher>>,
    enabled: Arc<AtomicBool>,
    on_match: Option<MatchHook>,
    stop_tx: Option<watch::Sender<bool>>,
    pipeline: Option<JoinHandle<()>>,
}

impl App {
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(JsonStore::open(config.store_path()).context("open gesture store")?);

        let plugins = Arc::new(Manager::new(config.plugin_dir()));
        match plugins.discover() {
            Ok(()) => info!(count = plugins.list().len(), dir = %plugins.plugin_dir().display(), "plugins discovered"),
            Err(e) => warn!(error = %e, "plugin discovery failed"),
        }

        let executor = Arc::new(Executor::new(config.exec_timeout_ms));

        Ok(Self {
            config,
            store,
            plugins,
            executor,
            static_matcher: Arc::new(RwLock::new(StaticMatcher::new())),
            dynamic_matcher: Arc::new(RwLock::new(DynamicMatcher::new())),
            enabled: Arc::new(AtomicBool::new(false)),
            on_match: None,
            stop_tx: None,
            pipeline: None,
        })
    }

    /// Registers an observer for recognition events. Takes effect for
    /// pipelines started afterwards.
    pub fn set_on_match(&mut self, hook: MatchHook) {
        self.on_match = Some(hook);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn store(&self) -> &Arc<JsonStore> {
        &self.store
    }

    pub fn plugins(&self) -> &Arc<Manager> {
        &self.plugins
    }

    /// Loads stored gesture definitions into the matchers. Malformed
    /// records are skipped with a warning, never matched against.
    pub fn load_gestures(&self) -> Result<()> {
        let mut loaded = 0usize;
        for kind in [Kind::Static, Kind::Dynamic] {
            for record in self.store.list_by_kind(kind)? {
                match record.to_template() {
                    Ok(template) => {
                        self.add_template(template);
                        loaded += 1;
                    }
                    Err(e) => warn!(gesture = %record.name, error = %e, "skipping malformed gesture"),
                }
            }
        }

        info!(count = loaded, "gesture templates loaded");
        Ok(())
    }

    /// Adds a template to the matcher for its kind. Called by
    /// configuration-management code when gestures are created or edited
    /// while the pipeline runs.
    pub fn add_template(&self, template: Template) {
        match template.kind() {
            Kind::Static => self.static_matcher.write().unwrap().add_template(template),
            Kind::Dynamic => self.dynamic_matcher.write().unwrap().add_template(template),
        }
    }

    pub fn remove_template(&self, id: &str) {
        self.static_matcher.write().unwrap().remove_template(id);
        self.dynamic_matcher.write().unwrap().remove_template(id);
    }

    /// Rebuilds a gesture's template from its recorded samples and swaps
    /// it into the live matcher.
    pub fn train_gesture(&self, gesture_id: &str) -> Result<()> {
        let mut record = self
            .store
            .get_gesture(gesture_id)?
            .ok_or_else(|| anyhow!("gesture not found: {gesture_id}"))?;

        let samples = self.store.samples_for(gesture_id)?;
        match record.kind {
            Kind::Static => {
                let samples: Vec<trainer::StaticSample> = samples
                    .iter()
                    .filter(|s| s.kind == Kind::Static)
                    .map(|s| trainer::StaticSample {
                        landmarks: s.landmarks.iter().copied().map(Into::into).collect(),
                        timestamp: s.recorded_at.timestamp_millis(),
                    })
                    .collect();
                let averaged = trainer::train_static(&samples)?;
                record.landmarks = averaged.into_iter().map(Into::into).collect();
            }
            Kind::Dynamic => {
                let samples: Vec<trainer::DynamicSample> = samples
                    .iter()
                    .filter(|s| s.kind == Kind::Dynamic)
                    .map(|s| trainer::DynamicSample {
                        path: s.path.clone(),
                        timestamp: s.recorded_at.timestamp_millis(),
                    })
                    .collect();
                record.path = trainer::train_dynamic(&samples)?;
            }
        }

        self.store.update_gesture(record.clone())?;
        self.remove_template(&record.id);
        self.add_template(record.to_template()?);
        info!(gesture = %record.name, "gesture retrained");
        Ok(())
    }

    /// Opens the camera and starts the detection pipeline. Starting twice
    /// is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.pipeline.is_some() {
            return Ok(());
        }

        let mut camera = CameraSource::new(self.config.camera_id);
        camera.open().context("open camera")?;
        camera.set_rate(self.config.idle_fps);

        let gate = FrameDiffGate::new(self.config.motion_threshold);
        let detector = self.build_detector();

        let mut dispatcher = Dispatcher::new(
            Arc::clone(&self.store) as Arc<dyn BindingStore>,
            Arc::clone(&self.plugins),
            Arc::clone(&self.executor),
        );
        if let Some(hook) = &self.on_match {
            dispatcher.set_on_match(Arc::clone(hook));
        }

        let pipeline = Pipeline::new(
            camera,
            gate,
            detector,
            Arc::clone(&self.static_matcher),
            Arc::clone(&self.dynamic_matcher),
            Arc::new(dispatcher),
            Arc::clone(&self.enabled),
            self.config.pipeline(),
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        self.pipeline = Some(tokio::spawn(pipeline.run(stop_rx)));
        self.stop_tx = Some(stop_tx);
        Ok(())
    }

    fn build_detector(&self) -> AnyDetector {
        let detector_config = DetectorConfig {
            script: self.config.detector_script.clone(),
            python: self.config.python_bin.clone(),
            idle_timeout: Duration::from_secs(self.config.detector_idle_secs),
        };

        match MediaPipeDetector::new(detector_config) {
            Ok(detector) => {
                info!("using mediapipe hand detection");
                AnyDetector::MediaPipe(detector)
            }
            Err(e) => {
                warn!(error = %e, "hand detection service unavailable, using mock detector");
                AnyDetector::Mock(MockDetector::new())
            }
        }
    }

    /// Stops the pipeline and waits for it to release the camera and
    /// detector. In-flight action dispatches are left to their timeouts.
    pub async fn stop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }
        if let Some(pipeline) = self.pipeline.take() {
            if let Err(e) = pipeline.await {
                warn!(error = %e, "pipeline task failed");
            }
        }
    }
}
