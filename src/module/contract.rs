//! The component lifecycle trait and metrics snapshot.

use super::{ModuleManifest, ModuleResult, ModuleStatus};
use std::collections::HashMap;
use std::fmt::Write as _;

/// Point-in-time metrics reported by a component.
#[derive(Debug, Clone, Default)]
pub struct MetricsPayload {
    /// Counter metrics (monotonically increasing).
    pub counters: HashMap<String, u64>,

    /// Gauge metrics (can go up and down).
    pub gauges: HashMap<String, f64>,
}

impl MetricsPayload {
    /// Creates a new empty metrics payload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a counter metric.
    pub fn counter(&mut self, name: impl Into<String>, value: u64) {
        self.counters.insert(name.into(), value);
    }

    /// Adds a gauge metric.
    pub fn gauge(&mut self, name: impl Into<String>, value: f64) {
        self.gauges.insert(name.into(), value);
    }

    /// Renders the payload as `prefix_name value` lines, sorted by name.
    #[must_use]
    pub fn to_text(&self, prefix: &str) -> String {
        let mut lines: Vec<(&str, String)> = self
            .counters
            .iter()
            .map(|(name, value)| (name.as_str(), value.to_string()))
            .chain(
                self.gauges
                    .iter()
                    .map(|(name, value)| (name.as_str(), value.to_string())),
            )
            .collect();
        lines.sort_by(|a, b| a.0.cmp(b.0));

        let mut output = String::new();
        for (name, value) in lines {
            let _ = writeln!(output, "{prefix}_{name} {value}");
        }
        output
    }
}

/// Lifecycle contract implemented by every cluster component.
///
/// # Lifecycle
///
/// 1. `manifest()` - identity and capabilities
/// 2. `start()` - subscribe to the bus and spawn background tasks
/// 3. `status()` / `metrics()` / `heartbeat()` - ongoing monitoring
/// 4. `stop()` - signal background tasks and release resources
///
/// `start` must be called from inside a Tokio runtime.
pub trait ModuleContract: Send + Sync {
    /// Returns the component's manifest.
    fn manifest(&self) -> ModuleManifest;

    /// Starts the component's background work.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::StartFailed` if no Tokio runtime is available or
    /// a bus subscription cannot be opened, and `ModuleError::InvalidState`
    /// if the component is already running.
    fn start(&mut self) -> ModuleResult<()>;

    /// Stops the component.
    ///
    /// # Errors
    ///
    /// Returns `ModuleError::InvalidState` if the component is not running.
    fn stop(&mut self) -> ModuleResult<()>;

    /// Returns the current status.
    fn status(&self) -> ModuleStatus;

    /// Returns the current metrics.
    fn metrics(&self) -> MetricsPayload;

    /// Liveness check. Defaults to `status().is_operational()`.
    fn heartbeat(&self) -> bool {
        self.status().is_operational()
    }
}
