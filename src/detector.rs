// src/detector.rs - hand landmark detection via an external MediaPipe service
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, ImageOutputFormat};
use nalgebra::Vector3;
use once_cell::sync::Lazy;
use serde::Deserialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::landmarks::{
    HandPose, INDEX_MCP, MIDDLE_MCP, NUM_LANDMARKS, PINKY_MCP, RING_MCP, THUMB_CMC, THUMB_IP,
    THUMB_MCP, THUMB_TIP, WRIST,
};

const JPEG_QUALITY: u8 = 80;
const SERVICE_SCRIPT: &str = "mediapipe_service.py";

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("mediapipe_service.py not found")]
    ScriptNotFound,
    #[error("detector unavailable")]
    Unavailable,
    #[error("detection service exited")]
    ProcessExited,
    #[error("encode frame: {0}")]
    Encode(#[from] image::ImageError),
    #[error("detection service i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse detector response: {0}")]
    BadResponse(#[from] serde_json::Error),
}

/// A hand landmark detector.
///
/// Implementations may fail transiently (service hiccup, process restart);
/// callers treat any error as "no hands this tick" and keep going.
#[allow(async_fn_in_trait)]
pub trait HandDetector: Send {
    async fn detect(&mut self, frame: &DynamicImage) -> Result<Vec<HandPose>, DetectorError>;
    async fn close(&mut self);
}

/// Configuration for the MediaPipe subprocess detector.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Path to the detection service script; discovered if unset.
    pub script: Option<PathBuf>,
    /// Python interpreter; a project venv is preferred if unset.
    pub python: Option<PathBuf>,
    /// Shut the subprocess down after this long without a detection call.
    pub idle_timeout: Duration,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self { script: None, python: None, idle_timeout: Duration::from_secs(30) }
    }
}

struct ProcState {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
    last_used: Instant,
    watchdog: Option<JoinHandle<()>>,
}

/// Detects hand landmarks through a Python MediaPipe subprocess.
///
/// Protocol: 4-byte big-endian length + JPEG bytes on stdin, one JSON line
/// per frame on stdout. The process is started lazily on the first
/// detection and shut down again after `idle_timeout` without use.
pub struct MediaPipeDetector {
    script: PathBuf,
    python: PathBuf,
    idle_timeout: Duration,
    proc: Arc<Mutex<ProcState>>,
}

impl MediaPipeDetector {
    pub fn new(config: DetectorConfig) -> Result<Self, DetectorError> {
        let script = match config.script {
            Some(path) if path.exists() => path,
            Some(_) | None => find_service_script().ok_or(DetectorError::ScriptNotFound)?,
        };
        let python = config
            .python
            .or_else(find_venv_python)
            .unwrap_or_else(|| PathBuf::from("python3"));

        Ok(Self {
            script,
            python,
            idle_timeout: config.idle_timeout,
            proc: Arc::new(Mutex::new(ProcState {
                child: None,
                stdin: None,
                stdout: None,
                last_used: Instant::now(),
                watchdog: None,
            })),
        })
    }

    fn ensure_started(&self, st: &mut ProcState) -> Result<(), DetectorError> {
        if st.child.is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.python)
            .arg(&self.script)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        st.stdin = child.stdin.take();
        st.stdout = child.stdout.take().map(BufReader::new);
        st.child = Some(child);
        st.last_used = Instant::now();
        info!(script = %self.script.display(), "hand detection service started");

        if st.watchdog.as_ref().map_or(true, |h| h.is_finished()) {
            let proc = Arc::clone(&self.proc);
            let idle = self.idle_timeout;
            st.watchdog = Some(tokio::spawn(async move {
                loop {
                    tokio::time::sleep(idle / 2).await;
                    let mut st = proc.lock().await;
                    if st.child.is_none() {
                        break;
                    }
                    if st.last_used.elapsed() >= idle {
                        debug!("hand detection service idle, shutting down");
                        shutdown_proc(&mut st).await;
                        break;
                    }
                }
            }));
        }

        Ok(())
    }

    async fn round_trip(st: &mut ProcState, jpeg: &[u8]) -> Result<Vec<HandPose>, DetectorError> {
        let stdin = st.stdin.as_mut().ok_or(DetectorError::ProcessExited)?;
        stdin.write_all(&(jpeg.len() as u32).to_be_bytes()).await?;
        stdin.write_all(jpeg).await?;
        stdin.flush().await?;

        let stdout = st.stdout.as_mut().ok_or(DetectorError::ProcessExited)?;
        let mut line = String::new();
        if stdout.read_line(&mut line).await? == 0 {
            return Err(DetectorError::ProcessExited);
        }

        let response: WireResponse = serde_json::from_str(&line)?;
        Ok(response.hands.into_iter().map(WireHand::into_pose).collect())
    }
}

impl HandDetector for MediaPipeDetector {
    async fn detect(&mut self, frame: &DynamicImage) -> Result<Vec<HandPose>, DetectorError> {
        let mut jpeg = Vec::new();
        frame.write_to(&mut Cursor::new(&mut jpeg), ImageOutputFormat::Jpeg(JPEG_QUALITY))?;

        let mut st = self.proc.lock().await;
        self.ensure_started(&mut st)?;

        match Self::round_trip(&mut st, &jpeg).await {
            Ok(hands) => {
                st.last_used = Instant::now();
                Ok(hands)
            }
            Err(e) => {
                // A broken pipe means a dead service; restart lazily on the
                // next call.
                shutdown_proc(&mut st).await;
                Err(e)
            }
        }
    }

    async fn close(&mut self) {
        let mut st = self.proc.lock().await;
        if let Some(watchdog) = st.watchdog.take() {
            watchdog.abort();
        }
        shutdown_proc(&mut st).await;
    }
}

async fn shutdown_proc(st: &mut ProcState) {
    // Closing stdin signals EOF; the service exits on its own.
    st.stdin = None;
    st.stdout = None;
    if let Some(mut child) = st.child.take() {
        if tokio::time::timeout(Duration::from_secs(2), child.wait()).await.is_err() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
    }
}

static SCRIPT_CANDIDATES: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    let mut candidates = vec![
        PathBuf::from("scripts").join(SERVICE_SCRIPT),
        PathBuf::from("..").join("scripts").join(SERVICE_SCRIPT),
    ];
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            candidates.push(dir.join("scripts").join(SERVICE_SCRIPT));
        }
    }
    if let Some(base) = directories::BaseDirs::new() {
        candidates.push(base.home_dir().join(".mudra").join("scripts").join(SERVICE_SCRIPT));
    }
    candidates
});

fn find_service_script() -> Option<PathBuf> {
    SCRIPT_CANDIDATES.iter().find(|p| p.exists()).map(|p| {
        std::fs::canonicalize(p).unwrap_or_else(|_| p.to_path_buf())
    })
}

fn find_venv_python() -> Option<PathBuf> {
    let mut candidates = vec![
        PathBuf::from("venv/bin/python"),
        PathBuf::from("../venv/bin/python"),
    ];
    if let Some(base) = directories::BaseDirs::new() {
        candidates.push(base.home_dir().join(".mudra").join("venv/bin/python"));
    }
    candidates.into_iter().find(|p| p.exists())
}

/// A scripted detector for tests and for running without the Python
/// service installed.
#[derive(Debug, Default)]
pub struct MockDetector {
    hands: Vec<HandPose>,
    failing: bool,
}

impl MockDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hands(&mut self, hands: Vec<HandPose>) {
        self.hands = hands;
    }

    pub fn set_failing(&mut self, failing: bool) {
        self.failing = failing;
    }
}

impl HandDetector for MockDetector {
    async fn detect(&mut self, _frame: &DynamicImage) -> Result<Vec<HandPose>, DetectorError> {
        if self.failing {
            return Err(DetectorError::Unavailable);
        }
        Ok(self.hands.clone())
    }

    async fn close(&mut self) {}
}

/// The detector the app actually runs with: MediaPipe when the service is
/// installed, the mock otherwise.
pub enum AnyDetector {
    MediaPipe(MediaPipeDetector),
    Mock(MockDetector),
}

impl HandDetector for AnyDetector {
    async fn detect(&mut self, frame: &DynamicImage) -> Result<Vec<HandPose>, DetectorError> {
        match self {
            AnyDetector::MediaPipe(d) => d.detect(frame).await,
            AnyDetector::Mock(d) => d.detect(frame).await,
        }
    }

    async fn close(&mut self) {
        match self {
            AnyDetector::MediaPipe(d) => d.close().await,
            AnyDetector::Mock(d) => d.close().await,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    hands: Vec<WireHand>,
}

#[derive(Debug, Deserialize)]
struct WireHand {
    #[serde(default)]
    points: Vec<WirePoint>,
    #[serde(default)]
    handedness: String,
    #[serde(default)]
    score: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct WirePoint {
    x: f64,
    y: f64,
    z: f64,
}

impl WireHand {
    fn into_pose(self) -> HandPose {
        let mut pose = HandPose::new(self.handedness, self.score);
        for (i, p) in self.points.into_iter().take(NUM_LANDMARKS).enumerate() {
            pose.points[i] = Vector3::new(p.x, p.y, p.z);
        }
        pose
    }
}

/// A preset open-palm pose: all five fingers extended upward from the
/// wrist. Useful as a recognizable test gesture.
pub fn open_palm_pose() -> HandPose {
    let mut pose = HandPose::new("Right", 0.95);
    pose.points[WRIST] = Vector3::new(0.5, 0.8, 0.0);

    // Finger bases fan out above the wrist, tips extend further up.
    let fingers: [(usize, f64); 5] = [
        (THUMB_CMC, 0.38),
        (INDEX_MCP, 0.44),
        (MIDDLE_MCP, 0.50),
        (RING_MCP, 0.56),
        (PINKY_MCP, 0.62),
    ];
    for (base, x) in fingers {
        for joint in 0..4 {
            pose.points[base + joint] = Vector3::new(x, 0.68 - 0.12 * joint as f64, -0.01 * joint as f64);
        }
    }
    pose
}

/// A preset thumbs-up pose: thumb extended upward, other fingers curled
/// toward the palm.
pub fn thumbs_up_pose() -> HandPose {
    let mut pose = HandPose::new("Right", 0.95);
    pose.points[WRIST] = Vector3::new(0.5, 0.8, 0.0);

    // Thumb pointing up.
    pose.points[THUMB_CMC] = Vector3::new(0.55, 0.75, 0.0);
    pose.points[THUMB_MCP] = Vector3::new(0.58, 0.65, 0.0);
    pose.points[THUMB_IP] = Vector3::new(0.58, 0.50, 0.0);
    pose.points[THUMB_TIP] = Vector3::new(0.58, 0.35, 0.0);

    // Remaining fingers curled: tips folded back toward the wrist.
    let fingers: [(usize, f64); 4] =
        [(INDEX_MCP, 0.55), (MIDDLE_MCP, 0.50), (RING_MCP, 0.45), (PINKY_MCP, 0.40)];
    for (base, x) in fingers {
        pose.points[base] = Vector3::new(x, 0.70, -0.02);
        pose.points[base + 1] = Vector3::new(x, 0.68, -0.05);
        pose.points[base + 2] = Vector3::new(x - 0.03, 0.70, -0.04);
        pose.points[base + 3] = Vector3::new(x - 0.05, 0.72, -0.02);
    }
    pose
}
