// src/config.rs - daemon configuration
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::pipeline::{
    PipelineConfig, DEFAULT_ACTIVE_FPS, DEFAULT_IDLE_FPS, DEFAULT_MIN_PATH_POINTS,
    DEFAULT_PATH_CAPACITY,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera_id: u32,
    pub idle_fps: u32,
    pub active_fps: u32,
    /// Quiet time in milliseconds before dropping back to idle.
    pub idle_timeout_ms: u64,
    pub path_buffer_size: usize,
    pub min_path_points: usize,
    /// Percentage of changed pixels that counts as motion.
    pub motion_threshold: f64,
    /// Hard cap on a single action handler invocation.
    pub exec_timeout_ms: u64,
    /// Shut the detection service down after this many idle seconds.
    pub detector_idle_secs: u64,
    pub plugin_dir: Option<PathBuf>,
    pub store_path: Option<PathBuf>,
    pub detector_script: Option<PathBuf>,
    pub python_bin: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_id: 0,
            idle_fps: DEFAULT_IDLE_FPS,
            active_fps: DEFAULT_ACTIVE_FPS,
            idle_timeout_ms: 2000,
            path_buffer_size: DEFAULT_PATH_CAPACITY,
            min_path_points: DEFAULT_MIN_PATH_POINTS,
            motion_threshold: 1.0,
            exec_timeout_ms: 5000,
            detector_idle_secs: 30,
            plugin_dir: None,
            store_path: None,
            detector_script: None,
            python_bin: None,
        }
    }
}

impl Config {
    /// Loads configuration from the given file, or from the conventional
    /// location if none is given. A missing conventional file falls back
    /// to defaults; an explicitly named file must exist.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match default_config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let data = std::fs::read(&path)
            .with_context(|| format!("read config file {}", path.display()))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("parse config file {}", path.display()))
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            idle_fps: self.idle_fps,
            active_fps: self.active_fps,
            quiet_period: Duration::from_millis(self.idle_timeout_ms),
            path_capacity: self.path_buffer_size,
            min_path_points: self.min_path_points,
        }
    }

    pub fn plugin_dir(&self) -> PathBuf {
        self.plugin_dir.clone().unwrap_or_else(|| data_dir().join("plugins"))
    }

    pub fn store_path(&self) -> PathBuf {
        self.store_path.clone().unwrap_or_else(|| data_dir().join("gestures.json"))
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "mudra")
}

fn data_dir() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.json"))
}
