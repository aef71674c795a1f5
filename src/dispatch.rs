// src/dispatch.rs - fire-and-forget action dispatch for matched gestures
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::plugin::{Executor, Manager, Request};
use crate::store::BindingStore;

/// Observer for recognition events, fired once per dispatched match.
pub type MatchHook = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Resolves a matched gesture to its bound action and runs the handler
/// without blocking the pipeline.
///
/// Every failure mode here is log-and-move-on: a missing or disabled
/// binding is a silent no-op, and handler errors or timeouts never reach
/// the pipeline.
pub struct Dispatcher {
    bindings: Arc<dyn BindingStore>,
    plugins: Arc<Manager>,
    executor: Arc<Executor>,
    on_match: Option<MatchHook>,
}

impl Dispatcher {
    pub fn new(bindings: Arc<dyn BindingStore>, plugins: Arc<Manager>, executor: Arc<Executor>) -> Self {
        Self { bindings, plugins, executor, on_match: None }
    }

    pub fn set_on_match(&mut self, hook: MatchHook) {
        self.on_match = Some(hook);
    }

    /// Dispatches the action bound to a recognized gesture, if any.
    ///
    /// The handler runs in a detached task bounded by the executor's
    /// timeout; this call returns immediately.
    pub fn dispatch(&self, gesture_id: &str, gesture_name: &str) {
        if let Some(hook) = &self.on_match {
            hook(gesture_id, gesture_name);
        }

        let binding = match self.bindings.get_by_gesture_id(gesture_id) {
            Ok(Some(binding)) => binding,
            // Gestures without a bound action are normal.
            Ok(None) => return,
            Err(e) => {
                warn!(gesture = gesture_name, error = %e, "action binding lookup failed");
                return;
            }
        };
        if !binding.enabled {
            return;
        }

        let plugin = match self.plugins.resolve(&binding.plugin) {
            Ok(plugin) => plugin,
            Err(e) => {
                warn!(gesture = gesture_name, plugin = %binding.plugin, error = %e, "handler not found");
                return;
            }
        };

        let request = Request {
            action: binding.action,
            gesture: gesture_name.to_string(),
            config: binding.config,
            params: Value::Null,
        };
        let executor = Arc::clone(&self.executor);
        let gesture = gesture_name.to_string();

        tokio::spawn(async move {
            match executor.execute(&plugin, &request).await {
                Ok(response) if response.success => {
                    debug!(gesture = %gesture, "action completed");
                }
                Ok(response) => {
                    warn!(gesture = %gesture, error = %response.error, "action handler reported failure");
                }
                Err(e) => {
                    warn!(gesture = %gesture, error = %e, "action execution failed");
                }
            }
        });
    }
}
