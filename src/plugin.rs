// src/plugin.rs - action handler plugins: discovery and sandboxed execution
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::RwLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin not found: {0}")]
    NotFound(String),
    #[error("plugin execution timeout after {0}ms")]
    Timeout(u64),
    #[error("plugin execution failed: {0}")]
    Failed(String),
    #[error("plugin i/o: {0}")]
    Io(#[from] std::io::Error),
    #[error("plugin response: {0}")]
    BadResponse(#[from] serde_json::Error),
}

/// A plugin's manifest, read from `plugin.json` in its directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub description: String,
    pub executable: String,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default, rename = "configSchema", skip_serializing_if = "Option::is_none")]
    pub config_schema: Option<Value>,
}

/// A request sent to a plugin on stdin, as a single JSON document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub action: String,
    pub gesture: String,
    #[serde(default)]
    pub config: Value,
    #[serde(default)]
    pub params: Value,
}

/// A plugin's response, parsed from its stdout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub data: Value,
}

/// A discovered plugin: manifest plus filesystem location.
#[derive(Debug, Clone)]
pub struct Plugin {
    pub manifest: Manifest,
    pub path: PathBuf,
    pub executable: PathBuf,
}

/// Discovers plugins and resolves them by name.
///
/// Each subdirectory of the plugin directory holding a `plugin.json` is a
/// plugin; everything else is skipped silently.
pub struct Manager {
    plugin_dir: PathBuf,
    plugins: RwLock<HashMap<String, Plugin>>,
}

impl Manager {
    pub fn new(plugin_dir: impl Into<PathBuf>) -> Self {
        Self { plugin_dir: plugin_dir.into(), plugins: RwLock::new(HashMap::new()) }
    }

    /// Rescans the plugin directory, replacing the current set.
    pub fn discover(&self) -> Result<(), PluginError> {
        let mut discovered = HashMap::new();

        if self.plugin_dir.is_dir() {
            for entry in std::fs::read_dir(&self.plugin_dir)? {
                let entry = entry?;
                if !entry.path().is_dir() {
                    continue;
                }

                match load_plugin(&entry.path()) {
                    Some(plugin) => {
                        debug!(name = %plugin.manifest.name, path = %plugin.path.display(), "discovered plugin");
                        discovered.insert(plugin.manifest.name.clone(), plugin);
                    }
                    None => continue,
                }
            }
        }

        *self.plugins.write().unwrap() = discovered;
        Ok(())
    }

    /// Resolves a plugin by name.
    pub fn resolve(&self, name: &str) -> Result<Plugin, PluginError> {
        self.plugins
            .read()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| PluginError::NotFound(name.to_string()))
    }

    pub fn list(&self) -> Vec<Plugin> {
        self.plugins.read().unwrap().values().cloned().collect()
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }
}

fn load_plugin(dir: &Path) -> Option<Plugin> {
    let manifest_path = dir.join("plugin.json");
    let data = std::fs::read(&manifest_path).ok()?;
    let manifest: Manifest = match serde_json::from_slice(&data) {
        Ok(m) => m,
        Err(e) => {
            warn!(path = %manifest_path.display(), error = %e, "skipping plugin with invalid manifest");
            return None;
        }
    };

    let executable = dir.join(&manifest.executable);
    Some(Plugin { manifest, path: dir.to_path_buf(), executable })
}

/// Runs plugins with a hard timeout.
///
/// The request is written to the plugin's stdin as JSON; the plugin's
/// stdout must be a single JSON response. A plugin that outlives the
/// timeout is killed.
pub struct Executor {
    timeout: Duration,
}

impl Executor {
    pub fn new(timeout_ms: u64) -> Self {
        Self { timeout: Duration::from_millis(timeout_ms) }
    }

    pub async fn execute(&self, plugin: &Plugin, request: &Request) -> Result<Response, PluginError> {
        let payload = serde_json::to_vec(request)?;

        let mut child = Command::new(&plugin.executable)
            .current_dir(&plugin.path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&payload).await?;
            // Dropping stdin closes the pipe so the plugin sees EOF.
        }

        // wait_with_output owns the child; if the timeout wins, dropping the
        // future kills the process (kill_on_drop).
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(PluginError::Timeout(self.timeout.as_millis() as u64)),
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(PluginError::Failed(format!(
                "exit status {}, stderr: {}",
                output.status,
                stderr.trim()
            )));
        }

        Ok(serde_json::from_slice(&output.stdout)?)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn write_plugin(dir: &Path, name: &str, script: &str) -> Plugin {
        let plugin_dir = dir.join(name);
        std::fs::create_dir_all(&plugin_dir).unwrap();

        let manifest = serde_json::json!({
            "name": name,
            "version": "1.0.0",
            "executable": "run.sh",
            "actions": ["run"],
        });
        std::fs::write(plugin_dir.join("plugin.json"), manifest.to_string()).unwrap();

        let script_path = plugin_dir.join("run.sh");
        std::fs::write(&script_path, script).unwrap();
        let mut perms = std::fs::metadata(&script_path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script_path, perms).unwrap();

        load_plugin(&plugin_dir).unwrap()
    }

    fn request() -> Request {
        Request {
            action: "run".into(),
            gesture: "swipe-left".into(),
            config: serde_json::json!({"key": "value"}),
            params: Value::Null,
        }
    }

    #[test]
    fn discover_finds_valid_plugins() {
        let dir = tempfile::tempdir().unwrap();
        write_plugin(dir.path(), "keyboard", "#!/bin/sh\necho '{\"success\":true}'\n");
        write_plugin(dir.path(), "lights", "#!/bin/sh\necho '{\"success\":true}'\n");
        // A directory without a manifest is not a plugin.
        std::fs::create_dir_all(dir.path().join("junk")).unwrap();

        let manager = Manager::new(dir.path());
        manager.discover().unwrap();

        assert_eq!(manager.list().len(), 2);
        assert!(manager.resolve("keyboard").is_ok());
        assert!(matches!(manager.resolve("missing"), Err(PluginError::NotFound(_))));
    }

    #[test]
    fn discover_skips_invalid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("broken");
        std::fs::create_dir_all(&bad).unwrap();
        std::fs::write(bad.join("plugin.json"), "{not json").unwrap();

        let manager = Manager::new(dir.path());
        manager.discover().unwrap();
        assert!(manager.list().is_empty());
    }

    #[test]
    fn discover_missing_directory_is_empty() {
        let manager = Manager::new("/nonexistent/plugins");
        manager.discover().unwrap();
        assert!(manager.list().is_empty());
    }

    #[tokio::test]
    async fn execute_parses_success_response() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = write_plugin(
            dir.path(),
            "echo",
            "#!/bin/sh\necho '{\"success\":true,\"data\":{\"message\":\"hello\"}}'\n",
        );

        let executor = Executor::new(5000);
        let response = executor.execute(&plugin, &request()).await.unwrap();

        assert!(response.success);
        assert_eq!(response.error, "");
        assert_eq!(response.data["message"], "hello");
    }

    #[tokio::test]
    async fn execute_passes_request_on_stdin() {
        let dir = tempfile::tempdir().unwrap();
        // The script reflects the gesture name it received back in the data.
        let plugin = write_plugin(
            dir.path(),
            "reflect",
            "#!/bin/sh\nin=$(cat)\nprintf '{\"success\":true,\"data\":{\"received\":%s}}' \"$in\"\n",
        );

        let executor = Executor::new(5000);
        let response = executor.execute(&plugin, &request()).await.unwrap();

        assert!(response.success);
        assert_eq!(response.data["received"]["gesture"], "swipe-left");
    }

    #[tokio::test]
    async fn execute_reports_handler_failure() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = write_plugin(
            dir.path(),
            "fail",
            "#!/bin/sh\necho '{\"success\":false,\"error\":\"no such display\"}'\n",
        );

        let executor = Executor::new(5000);
        let response = executor.execute(&plugin, &request()).await.unwrap();

        assert!(!response.success);
        assert_eq!(response.error, "no such display");
    }

    #[tokio::test]
    async fn execute_kills_plugin_on_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = write_plugin(dir.path(), "hang", "#!/bin/sh\nsleep 60\n");

        let executor = Executor::new(200);
        let started = std::time::Instant::now();
        let err = executor.execute(&plugin, &request()).await.unwrap_err();

        assert!(matches!(err, PluginError::Timeout(200)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn execute_nonzero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let plugin = write_plugin(dir.path(), "crash", "#!/bin/sh\necho 'boom' >&2\nexit 3\n");

        let executor = Executor::new(5000);
        let err = executor.execute(&plugin, &request()).await.unwrap_err();

        match err {
            PluginError::Failed(msg) => assert!(msg.contains("boom"), "message: {msg}"),
            other => panic!("expected Failed, got {other:?}"),
        }
    }
}
