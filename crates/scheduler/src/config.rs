//! Scheduler configuration surface.

use conclave_types::Event;
use indexmap::{IndexMap, IndexSet};
use std::time::Duration;

/// Recognized configuration options for one agent.
///
/// Loading (files, flags, environment) is the embedding's concern; this is
/// the validated in-memory form the scheduler builder consumes.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Per-event timeout overrides applied on top of the app declaration.
    /// Overriding an event no edge emits is a construction-time error.
    pub event_timeout_overrides: IndexMap<Event, Duration>,

    /// Background apps to run, by name. `None` enables all attached
    /// background apps.
    pub enabled_background_apps: Option<IndexSet<String>>,
}

impl EngineConfig {
    /// Whether the named background app is enabled under this config.
    pub fn background_enabled(&self, name: &str) -> bool {
        match &self.enabled_background_apps {
            None => true,
            Some(enabled) => enabled.contains(name),
        }
    }
}
